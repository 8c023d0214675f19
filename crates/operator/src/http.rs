use std::{net::IpAddr, sync::Arc};

use futures::{FutureExt, future::BoxFuture};
use kube::api::DynamicObject;
use rocket::{
    Build, Rocket, State, get,
    http::Status,
    response::status::Custom,
    routes,
    serde::json::Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    Result,
    api::{KUBERNETES_PROVIDER, MACHINE_PROVIDER},
    cache::ObjectCache,
    cluster::AggregateApi,
    repository::Repository,
    site::SiteService,
};

/// Where the routes look up the aggregate name.
pub trait SiteName: Send + Sync + 'static {
    fn name(&self) -> BoxFuture<'_, Result<String>>;
}

impl<A: AggregateApi> SiteName for SiteService<A> {
    fn name(&self) -> BoxFuture<'_, Result<String>> {
        SiteService::name(self).boxed()
    }
}

type Site = Arc<dyn SiteName>;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

type ApiResult<T> = std::result::Result<Json<T>, Custom<Json<ErrorBody>>>;

fn error(status: Status, message: impl Into<String>) -> Custom<Json<ErrorBody>> {
    Custom(
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
}

#[derive(Debug, Serialize)]
pub struct VersionInfo {
    pub name: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Serialize)]
pub struct NameResponse {
    pub name: String,
}

/// Read API server, not yet launched.
pub fn rocket(cache: Arc<ObjectCache>, site: Site, address: IpAddr, port: u16) -> Rocket<Build> {
    let figment = rocket::Config::figment()
        .merge(("address", address))
        .merge(("port", port));

    rocket::custom(figment)
        .manage(cache)
        .manage(site)
        .mount("/", routes![health])
        .mount(
            "/v1",
            routes![
                version,
                vitistack_name,
                kubernetes_providers,
                kubernetes_provider,
                machine_providers,
                machine_provider
            ],
        )
}

#[get("/health")]
fn health() -> &'static str {
    "ok"
}

#[get("/info/version")]
fn version() -> Json<VersionInfo> {
    Json(VersionInfo {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[get("/vitistack/name")]
async fn vitistack_name(site: &State<Site>) -> ApiResult<NameResponse> {
    match site.name().await {
        Ok(name) => Ok(Json(NameResponse { name })),
        Err(e) => {
            tracing::error!(error = %e, "Failed to resolve vitistack name");
            Err(error(Status::InternalServerError, e.to_string()))
        }
    }
}

fn list(cache: &ObjectCache, kind: &'static str) -> Json<Vec<DynamicObject>> {
    Json(Repository::new(cache, kind).get_all())
}

fn by_uid(cache: &ObjectCache, kind: &'static str, uid: &str) -> ApiResult<DynamicObject> {
    if Uuid::parse_str(uid).is_err() {
        return Err(error(Status::BadRequest, format!("invalid uid: {uid}")));
    }
    Repository::new(cache, kind)
        .get_by_uid(uid)
        .map(Json)
        .ok_or_else(|| error(Status::NotFound, format!("{kind} {uid} not found")))
}

#[get("/kubernetesproviders")]
fn kubernetes_providers(cache: &State<Arc<ObjectCache>>) -> Json<Vec<DynamicObject>> {
    list(cache, KUBERNETES_PROVIDER)
}

#[get("/kubernetesproviders/<uid>")]
fn kubernetes_provider(cache: &State<Arc<ObjectCache>>, uid: &str) -> ApiResult<DynamicObject> {
    by_uid(cache, KUBERNETES_PROVIDER, uid)
}

#[get("/machineproviders")]
fn machine_providers(cache: &State<Arc<ObjectCache>>) -> Json<Vec<DynamicObject>> {
    list(cache, MACHINE_PROVIDER)
}

#[get("/machineproviders/<uid>")]
fn machine_provider(cache: &State<Arc<ObjectCache>>, uid: &str) -> ApiResult<DynamicObject> {
    by_uid(cache, MACHINE_PROVIDER, uid)
}
