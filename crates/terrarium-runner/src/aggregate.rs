use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use terrarium_domain::{RequestId, TerrariumId};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::error::RunError;

/// Target-name suffix used when none is given: `<provider>_vpn_info`.
pub const DEFAULT_TARGET_SUFFIX: &str = "vpn_info";

/// Something that can read one named output of a terrarium.
#[async_trait]
pub trait OutputSource: Send + Sync + 'static {
    /// Raw JSON text of the output called `name`.
    async fn output(
        &self,
        tr_id: &TerrariumId,
        req_id: &RequestId,
        name: &str,
    ) -> Result<String, RunError>;
}

/// Queries one output per provider concurrently and merges the results.
///
/// A provider whose query fails is logged and left out; the others still
/// contribute. The merged map starts out as `{"terrarium_id": <id>}`, so a
/// provider payload can override it. A `null` payload contributes nothing.
#[derive(Clone)]
pub struct Aggregator {
    source: Arc<dyn OutputSource>,
    target_suffix: String,
}

impl Aggregator {
    pub fn new(source: Arc<dyn OutputSource>) -> Self {
        Self {
            source,
            target_suffix: DEFAULT_TARGET_SUFFIX.to_string(),
        }
    }

    pub fn with_target_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.target_suffix = suffix.into();
        self
    }

    pub fn target_name(&self, provider: &str) -> String {
        format!("{provider}_{}", self.target_suffix)
    }

    pub async fn aggregate_outputs(
        &self,
        tr_id: &TerrariumId,
        req_id: &RequestId,
        providers: &[String],
    ) -> Result<Map<String, Value>, RunError> {
        if providers.is_empty() {
            return Err(RunError::NoProviders(tr_id.clone()));
        }

        // One slot per provider: no sender ever waits on the drain below.
        let (tx, mut rx) = mpsc::channel::<(String, Result<String, RunError>)>(providers.len());

        let mut handles = Vec::with_capacity(providers.len());
        for provider in providers {
            let source = self.source.clone();
            let tx = tx.clone();
            let provider = provider.clone();
            let target = self.target_name(&provider);
            let (tr_id, req_id) = (tr_id.clone(), req_id.clone());
            handles.push(tokio::spawn(async move {
                let result = source.output(&tr_id, &req_id, &target).await;
                let _ = tx.send((provider, result)).await;
            }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                error!(tr_id = %tr_id, error = %e, "provider output task panicked");
            }
        }
        drop(tx);

        let mut merged = Map::new();
        merged.insert("terrarium_id".into(), Value::String(tr_id.to_string()));
        let mut contributed = 0usize;
        while let Some((provider, result)) = rx.recv().await {
            let raw = match result {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(tr_id = %tr_id, provider = %provider, error = %e, "skipping provider output");
                    continue;
                }
            };
            let decoded: Option<Map<String, Value>> = serde_json::from_str(&raw)
                .map_err(|e| RunError::Decode {
                    provider: provider.clone(),
                    source: e,
                })?;
            let Some(decoded) = decoded else {
                debug!(tr_id = %tr_id, provider = %provider, "provider output is null");
                continue;
            };
            debug!(tr_id = %tr_id, provider = %provider, keys = decoded.len(), "merging provider output");
            merge_resource_info(&mut merged, decoded);
            contributed += 1;
        }

        if contributed == 0 {
            warn!(tr_id = %tr_id, ?providers, "no provider returned output");
        }
        Ok(merged)
    }
}

/// Merge `src` into `dst`: objects merge recursively, arrays concatenate,
/// anything else is replaced by the value from `src`.
pub fn merge_resource_info(dst: &mut Map<String, Value>, src: Map<String, Value>) {
    for (key, value) in src {
        let slot = dst.entry(key).or_insert(Value::Null);
        match (slot, value) {
            (Value::Object(d), Value::Object(s)) => merge_resource_info(d, s),
            (Value::Array(d), Value::Array(s)) => d.extend(s),
            (slot, value) => *slot = value,
        }
    }
}
