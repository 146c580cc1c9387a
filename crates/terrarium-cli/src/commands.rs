use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::Value;
use terrarium_api::{build_app, AppState};
use terrarium_config::TerrariumConfig;
use terrarium_runner::{RunCoordinator, TerrariumService};
use terrarium_store::{KvStore, LocalKvStore, StoreError};
use terrarium_tofu::TofuExecutor;
use tracing::{info, warn};

// ── Serve ─────────────────────────────────────────────────────────────────────

pub async fn serve(config: TerrariumConfig) -> Result<()> {
    let store = Arc::new(LocalKvStore::new(config.snapshot_path()));
    match store.load().await {
        Ok(()) => info!(path = %config.snapshot_path().display(), "loaded snapshot"),
        Err(StoreError::SnapshotMissing(path)) => {
            warn!(path = %path, "no snapshot found; starting with an empty store")
        }
        Err(e) => return Err(e).context("Failed to load the key-value snapshot"),
    }

    let store: Arc<dyn KvStore> = store;
    let executor = Arc::new(TofuExecutor::new(config.tofu_binary.clone()));
    let coordinator = RunCoordinator::new(store.clone(), executor);
    let service = TerrariumService::new(store.clone(), coordinator, &config.root);

    let state = AppState::new(service, config.api.auth_token.clone());
    let app = build_app(state.clone());

    let addr = format!("{}:{}", config.api.bind, config.api.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    state.set_ready(true);
    info!(
        addr = %addr,
        root = %config.root.display(),
        tofu = %config.tofu_binary,
        auth = config.api.auth_token.is_some(),
        "terrarium API listening"
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;
    state.set_ready(false);

    store
        .save()
        .await
        .context("Failed to save the key-value snapshot")?;
    info!(path = %config.snapshot_path().display(), "saved snapshot");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for Ctrl+C; shut down by killing the process");
        std::future::pending::<()>().await;
    }
    info!("received shutdown signal");
}

// ── Client commands ───────────────────────────────────────────────────────────

pub struct Client {
    base: String,
    token: Option<String>,
    http: reqwest::Client,
}

impl Client {
    pub fn new(remote: Option<String>, token: Option<String>, config: &TerrariumConfig) -> Self {
        let base = remote
            .unwrap_or_else(|| format!("http://localhost:{}", config.api.port))
            .trim_end_matches('/')
            .to_string();
        Self {
            base,
            token: token.or_else(|| config.api.auth_token.clone()),
            http: reqwest::Client::new(),
        }
    }

    async fn get(&self, path: &str) -> Result<Value> {
        let url = format!("{}/terrarium{}", self.base, path);
        let mut req = self.http.get(&url);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        let resp = req
            .send()
            .await
            .with_context(|| format!("Failed to reach server at {}", self.base))?;
        let status = resp.status();
        let body: Value = resp.json().await.context("Malformed server response")?;
        if !status.is_success() {
            let msg = body
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("request failed");
            anyhow::bail!("{status}: {msg}");
        }
        Ok(body)
    }
}

pub async fn list(client: &Client) -> Result<()> {
    let body = client.get("/tr").await?;
    let items = body
        .get("object")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    if items.is_empty() {
        println!("No terrariums.");
        return Ok(());
    }
    for item in items {
        let id = item.get("id").and_then(Value::as_str).unwrap_or("?");
        let enrichments = item
            .get("enrichments")
            .and_then(Value::as_str)
            .unwrap_or("-");
        println!("{id}\t{enrichments}");
    }
    Ok(())
}

pub async fn history(client: &Client, tr_id: &str, request_id: &str) -> Result<()> {
    let body = client
        .get(&format!("/tr/{tr_id}/request/{request_id}"))
        .await?;
    let report = body.get("detail").and_then(Value::as_str).unwrap_or_default();
    print!("{report}");
    Ok(())
}
