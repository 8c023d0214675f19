use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use kube::{Client, CustomResourceExt};
use tokio::sync::watch;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use vitistack_operator::{
    api::{Vitistack, watch_targets},
    cache::ObjectCache,
    cluster::KubeCluster,
    events::{EventBus, log_events},
    http,
    ingest::Ingest,
    prerequisites,
    settings::Settings,
    site::SiteService,
    watcher::ResourceWatcher,
    writers::Writers,
};

#[derive(Debug, Clone, Parser)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone, Subcommand)]
enum Commands {
    /// Watch resources and keep the Vitistack object in sync
    Run(Settings),
    /// Output K8s manifest for the Vitistack CRD
    CrdManifest,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_file(true)
                .with_line_number(true),
        )
        .with(EnvFilter::from_default_env())
        .try_init()?;

    let cli = Cli::parse();
    match cli.command {
        Some(Commands::Run(settings)) => run_operator(settings).await?,
        Some(Commands::CrdManifest) => {
            println!("{}", serde_yaml_ng::to_string(&Vitistack::crd())?);
        }
        None => {}
    }

    Ok(())
}

async fn run_operator(settings: Settings) -> anyhow::Result<()> {
    let client = Client::try_default().await.context("connect to k8s")?;
    prerequisites::check(&client, &settings).await?;

    let cluster = Arc::new(KubeCluster::new(client));
    let cache = Arc::new(ObjectCache::new());
    let bus = Arc::new(EventBus::new());
    let site = Arc::new(SiteService::new(
        Arc::clone(&cache),
        Arc::clone(&cluster),
        &settings.namespace,
        &settings.config_map_name,
    ));

    log_events(&bus);
    Arc::new(Writers::new(
        Arc::clone(&cluster),
        Arc::clone(&site),
        settings.writer_config(),
    ))
    .register(&bus);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let watches = ResourceWatcher::new(cluster)
        .with_sync_timeout(settings.sync_timeout())
        .start(
            watch_targets(),
            Arc::new(Ingest::new(Arc::clone(&cache), bus)),
            shutdown_rx,
        );

    // rocket owns signal handling, watchers are stopped once it shuts down
    http::rocket(cache, site, settings.http_address(), settings.http_port)
        .launch()
        .await?;

    tracing::info!("HTTP server stopped, shutting down watchers");
    shutdown_tx.send_replace(true);
    for (target, exit) in watches.join().await {
        tracing::info!(%target, ?exit, "Watcher exited");
    }

    tracing::info!("operator terminated");
    Ok(())
}
