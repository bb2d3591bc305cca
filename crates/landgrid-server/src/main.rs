//! landgrid server binary.
//!
//! Reads `landgrid.toml` (or the path specified with `--config`) plus
//! `LANDGRID_*` environment overrides, opens an in-process SQLite store, and
//! serves the JSON API over HTTP under `/api`.
//!
//! ```
//! cargo run -p landgrid-server -- --config landgrid.toml
//! ```

mod settings;

use std::{path::PathBuf, sync::Arc};

use anyhow::Context as _;
use axum::Router;
use clap::Parser;
use landgrid_core::engine::ImpactEngine;
use landgrid_store_sqlite::SqliteStore;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::settings::ServerConfig;

const DEFAULT_CONFIG_PATH: &str = "landgrid.toml";

#[derive(Parser)]
#[command(author, version, about = "Landgrid impact aggregation server")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
  config: PathBuf,

  /// Rebuild the derived aggregate once and exit.
  #[arg(long)]
  refresh_only: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  // Initialise tracing.
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();
  let server_cfg = ServerConfig::load(&cli.config)?;

  let store_path = server_cfg.resolved_store_path();
  if let Some(parent) = store_path.parent() {
    std::fs::create_dir_all(parent)
      .with_context(|| format!("failed to create {parent:?}"))?;
  }
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  let engine = Arc::new(ImpactEngine::new(
    Arc::new(store),
    server_cfg.engine_settings(),
  ));

  if cli.refresh_only {
    let state = engine
      .maintainer()
      .refresh()
      .await
      .context("aggregate refresh failed")?;
    tracing::info!(?state, "aggregate refreshed");
    return Ok(());
  }

  // Populate an empty aggregate before taking traffic.
  engine
    .maintainer()
    .ensure_fresh()
    .await
    .context("initial aggregate build failed")?;
  let _refresher = server_cfg
    .refresh_interval()
    .map(|every| engine.maintainer().spawn_periodic_refresh(every));

  let app = Router::new()
    .nest("/api", landgrid_api::api_router(engine))
    .layer(TraceLayer::new_for_http());
  let address = format!("{}:{}", server_cfg.host, server_cfg.port);

  tracing::info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app).await.context("server error")?;

  Ok(())
}
