/// K8s API objects
pub mod api;

/// Last-observed object bodies keyed by uid
pub mod cache;

/// Cluster collaborators: discovery, watch streams, aggregate reads/writes
pub mod cluster;

/// In-process event fan-out
pub mod events;

/// HTTP read API over the cache
pub mod http;

/// Watch callbacks writing to the cache and the event bus
pub mod ingest;

pub mod locks;
pub mod prerequisites;
pub mod repository;
pub mod settings;

/// Site configuration read from the operator config map
pub mod site;

pub mod value;
pub mod watcher;

/// Aggregate reconciliation
pub mod writers;

#[cfg(test)]
pub(crate) mod testing;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Kube error: {0}")]
    Kube(#[from] kube::Error),
    #[error("Serde error: {0}")]
    SerdeJson(#[from] serde_json::Error),
    #[error("Conflicting write to {0}, the object changed on the server")]
    Conflict(String),
    #[error("Aggregate {0} does not exist")]
    AggregateMissing(String),
    #[error("Config map {namespace}/{name} not found")]
    ConfigMapMissing { namespace: String, name: String },
    #[error("Invalid site configuration: {0}")]
    InvalidSite(#[from] garde::Report),
    #[error("Missing field in object: {0}")]
    MissingField(&'static str),
    #[error("Prerequisite checks failed:\n- {}", .0.join("\n- "))]
    Prerequisites(Vec<String>),
}

impl Error {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
