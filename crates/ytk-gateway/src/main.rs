// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use ytk_gateway::{AppState, GatewayConfig, build_app};
use ytk_ocr::MockVisionModel;
use ytk_permit::{MemorySecretSource, SigningKey};
use ytk_store::{
    MemoryBatchJobRepo, MemoryKvStore, MemoryObjectStore, MemoryTransactionRepo, SystemClock,
};

#[derive(Parser, Debug)]
#[command(name = "ytk-gateway", version, about = "Yorutsuke cloud gateway")]
struct Args {
    /// Bind address.
    #[arg(long, default_value = "127.0.0.1:8080")]
    bind: String,

    /// Enable request/response debug logging.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.debug {
        EnvFilter::new("ytk=debug,ytk_gateway=debug")
    } else {
        EnvFilter::new("ytk=info,ytk_gateway=info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = GatewayConfig::from_env().context("load gateway configuration")?;

    // Self-hosted mode resolves the permit secret from the environment; a
    // real deployment points the same ARN at an external secret store.
    let secret = std::env::var("YTK_PERMIT_SECRET").context("read YTK_PERMIT_SECRET")?;
    let secrets = MemorySecretSource::new().with_keys(
        &config.permit_secret_arn,
        vec![SigningKey {
            version: 1,
            secret,
        }],
    );

    let state = AppState::init(
        config,
        &secrets,
        Arc::new(MemoryObjectStore::new()),
        Arc::new(MemoryTransactionRepo::new()),
        Arc::new(MemoryBatchJobRepo::new()),
        Arc::new(MemoryKvStore::new()),
        Arc::new(MemoryKvStore::new()),
        Arc::new(MockVisionModel::new()),
        Arc::new(SystemClock),
    )
    .await
    .context("initialise gateway state")?;

    let app = build_app(state);
    let listener = tokio::net::TcpListener::bind(&args.bind)
        .await
        .with_context(|| format!("bind {}", args.bind))?;
    info!(bind = %args.bind, "ytk-gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("serve")
}
