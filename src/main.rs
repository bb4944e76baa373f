// Copyright 2026 The Parley Project
// SPDX-License-Identifier: Apache-2.0

use clap::Parser;
use parley::config;
use parley::reaper;
use parley::server::{self, AppState};
use parley::session::SessionStore;
use parley::turn::TurnController;
use parley::upstream::ReqwestUpstreamClient;

use std::net::SocketAddr;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "parley", about = "Session-aware streaming chat relay")]
struct Cli {
    /// Path to the parley.yaml config file
    #[arg(long, default_value = "parley.yaml", env = "PARLEY_CONFIG")]
    config: String,

    /// Port to listen on
    #[arg(long, default_value_t = 3000, env = "PARLEY_PORT")]
    port: u16,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .json()
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let source = config::FileSource {
        path: std::path::PathBuf::from(cli.config),
    };
    let config = match config::load_config(&source) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("failed to load config: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(
        model = %config.upstream.model,
        endpoint = %config.upstream.endpoint,
        streaming = config.chat.streaming,
        max_history = config.chat.max_history,
        "config loaded"
    );

    let store = Arc::new(SessionStore::new(config.chat.system_prompt.clone()));
    let upstream = Arc::new(ReqwestUpstreamClient::new(
        reqwest::Client::new(),
        &config.upstream,
    ));
    let turns = Arc::new(TurnController::new(
        store.clone(),
        upstream,
        config.upstream.clone(),
        config.chat.clone(),
    ));

    reaper::spawn(store, config.session);

    let app = server::build_router(AppState {
        turns,
        streaming: config.chat.streaming,
    });

    let addr = SocketAddr::from((server::BIND_ADDR, cli.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind to address");

    tracing::info!(%addr, "parley listening");

    axum::serve(listener, app).await.expect("server error");
}
