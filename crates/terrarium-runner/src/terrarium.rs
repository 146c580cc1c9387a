use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use terrarium_domain::keys::{status_key, terrarium_key, TERRARIUM_PREFIX};
use terrarium_domain::{DomainError, RequestId, TerrariumId, TerrariumInfo};
use terrarium_store::{KvStore, StoreError};
use terrarium_tofu::{log_file_path, Subcommand, TofuCommand};
use tracing::{debug, info, warn};

use crate::aggregate::{Aggregator, OutputSource, DEFAULT_TARGET_SUFFIX};
use crate::coordinator::RunCoordinator;
use crate::error::RunError;

/// Directory under the configured root that holds one sub-directory per terrarium.
pub const TERRARIUM_DIR_NAME: &str = ".terrarium";

/// Variables file OpenTofu loads automatically from the working directory.
pub const TFVARS_FILE_NAME: &str = "terraform.tfvars.json";

/// Whether a state-changing command blocks the caller or runs in the background.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecMode {
    #[default]
    Sync,
    Async,
}

/// Terrarium records, their workspaces and the `tofu` actions run in them.
#[derive(Clone)]
pub struct TerrariumService {
    store: Arc<dyn KvStore>,
    coordinator: RunCoordinator,
    base_dir: PathBuf,
}

impl TerrariumService {
    pub fn new(store: Arc<dyn KvStore>, coordinator: RunCoordinator, root: impl AsRef<Path>) -> Self {
        Self {
            store,
            coordinator,
            base_dir: root.as_ref().join(TERRARIUM_DIR_NAME),
        }
    }

    pub fn coordinator(&self) -> &RunCoordinator {
        &self.coordinator
    }

    // ── Records ───────────────────────────────────────────────────────────────

    /// Register a new terrarium and create its directory.
    pub async fn issue(&self, info: TerrariumInfo) -> Result<TerrariumInfo, RunError> {
        info.validate()?;
        let encoded = serde_json::to_string(&info).map_err(StoreError::from)?;
        if !self
            .store
            .compare_and_swap(&terrarium_key(&info.id), None, encoded)
            .await?
        {
            return Err(RunError::AlreadyExists(info.id));
        }

        let dir = self.base_dir.join(info.id.as_str());
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| RunError::io(&dir, e))?;
        info!(tr_id = %info.id, dir = %dir.display(), "issued terrarium");
        Ok(info)
    }

    pub async fn get(&self, id: &TerrariumId) -> Result<TerrariumInfo, RunError> {
        self.store
            .get_json(&terrarium_key(id))
            .await?
            .ok_or_else(|| RunError::NotFound(id.clone()))
    }

    /// Every terrarium record, sorted by id. Values that are not records are skipped.
    pub async fn list(&self) -> Result<Vec<TerrariumInfo>, RunError> {
        let mut out: Vec<TerrariumInfo> = self
            .store
            .get_with_prefix(TERRARIUM_PREFIX)
            .await?
            .iter()
            .filter_map(|raw| serde_json::from_str(raw).ok())
            .collect();
        out.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
        Ok(out)
    }

    /// Replace an existing record's labels. Enrichments and providers are kept.
    pub async fn update(&self, info: TerrariumInfo) -> Result<TerrariumInfo, RunError> {
        info.validate()?;
        self.modify(&info.id.clone(), move |current| {
            current.name = info.name.clone();
            current.description = info.description.clone();
            Ok(())
        })
        .await
    }

    pub async fn set_enrichments(
        &self,
        id: &TerrariumId,
        kind: &str,
    ) -> Result<TerrariumInfo, RunError> {
        self.modify(id, |info| info.set_enrichments(kind)).await
    }

    pub async fn set_providers(
        &self,
        id: &TerrariumId,
        providers: &[String],
    ) -> Result<TerrariumInfo, RunError> {
        self.modify(id, |info| {
            info.set_providers(providers.iter().cloned());
            Ok(())
        })
        .await
    }

    /// Read-modify-write a record with compare-and-swap, retrying on a lost race.
    async fn modify<F>(&self, id: &TerrariumId, f: F) -> Result<TerrariumInfo, RunError>
    where
        F: Fn(&mut TerrariumInfo) -> Result<(), DomainError>,
    {
        let key = terrarium_key(id);
        loop {
            let raw = self
                .store
                .get(&key)
                .await?
                .ok_or_else(|| RunError::NotFound(id.clone()))?;
            let mut info: TerrariumInfo = serde_json::from_str(&raw).map_err(StoreError::from)?;
            f(&mut info)?;

            let encoded = serde_json::to_string(&info).map_err(StoreError::from)?;
            if self
                .store
                .compare_and_swap(&key, Some(raw.as_str()), encoded)
                .await?
            {
                return Ok(info);
            }
        }
    }

    /// Remove the terrarium: its directory, record and run status.
    ///
    /// The run slot is held for the whole removal so no run can start in a
    /// directory that is being deleted.
    pub async fn erase(&self, id: &TerrariumId) -> Result<(), RunError> {
        id.validate()?;
        self.get(id).await?;
        let previous = self.coordinator.hold(id).await?;

        let dir = self.base_dir.join(id.as_str());
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                self.coordinator.release(id, previous).await?;
                return Err(RunError::io(&dir, e));
            }
        }
        self.store.delete(&terrarium_key(id)).await?;
        self.store.delete(&status_key(id)).await?;
        info!(tr_id = %id, "erased terrarium");
        Ok(())
    }

    /// Delete everything inside the terrarium directory but keep the directory.
    ///
    /// Holds the run slot while deleting; the previous status is restored after.
    pub async fn empty_out(&self, id: &TerrariumId) -> Result<(), RunError> {
        id.validate()?;
        let previous = self.coordinator.hold(id).await?;
        let result = self.clear_dir(&self.base_dir.join(id.as_str())).await;
        self.coordinator.release(id, previous).await?;
        result?;
        info!(tr_id = %id, "emptied out terrarium environment");
        Ok(())
    }

    async fn clear_dir(&self, dir: &Path) -> Result<(), RunError> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| RunError::io(dir, e))?;

        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| RunError::io(dir, e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| RunError::io(dir, e))?
        {
            let path = entry.path();
            let is_dir = entry
                .file_type()
                .await
                .map_err(|e| RunError::io(&path, e))?
                .is_dir();
            let removed = if is_dir {
                tokio::fs::remove_dir_all(&path).await
            } else {
                tokio::fs::remove_file(&path).await
            };
            removed.map_err(|e| RunError::io(&path, e))?;
        }
        Ok(())
    }

    // ── Workspace ─────────────────────────────────────────────────────────────

    /// `<root>/.terrarium/<id>/<enrichments>`, created if absent.
    pub async fn workspace_dir(&self, id: &TerrariumId) -> Result<PathBuf, RunError> {
        id.validate()?;
        let info = self.get(id).await?;
        let dir = self.workspace_path(&info);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| RunError::io(&dir, e))?;
        Ok(dir)
    }

    fn workspace_path(&self, info: &TerrariumInfo) -> PathBuf {
        let dir = self.base_dir.join(info.id.as_str());
        if info.has_enrichments() {
            dir.join(&info.enrichments)
        } else {
            dir
        }
    }

    /// Write `vars` as `terraform.tfvars.json` in the workspace.
    pub async fn write_tfvars(&self, id: &TerrariumId, vars: &Value) -> Result<PathBuf, RunError> {
        let path = self.workspace_dir(id).await?.join(TFVARS_FILE_NAME);
        let content = serde_json::to_string_pretty(vars).map_err(StoreError::from)?;
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| RunError::io(&path, e))?;
        debug!(tr_id = %id, path = %path.display(), "wrote tfvars");
        Ok(path)
    }

    // ── Actions ───────────────────────────────────────────────────────────────

    async fn command(&self, id: &TerrariumId, sub: Subcommand) -> Result<TofuCommand, RunError> {
        Ok(TofuCommand::new(sub).chdir(self.workspace_dir(id).await?))
    }

    async fn dispatch(
        &self,
        id: &TerrariumId,
        req: &RequestId,
        cmd: TofuCommand,
        mode: ExecMode,
    ) -> Result<String, RunError> {
        req.validate()?;
        if cmd.is_read_only() {
            return self.coordinator.run_shared(id, req, cmd.to_args()).await;
        }
        match mode {
            ExecMode::Sync => self.coordinator.run(id, req, cmd.to_args()).await,
            ExecMode::Async => self.coordinator.run_async(id, req, cmd.to_args()).await,
        }
    }

    pub async fn init(&self, id: &TerrariumId, req: &RequestId) -> Result<String, RunError> {
        let cmd = self.command(id, Subcommand::Init).await?;
        self.dispatch(id, req, cmd, ExecMode::Sync).await
    }

    pub async fn plan(&self, id: &TerrariumId, req: &RequestId) -> Result<String, RunError> {
        let cmd = self.command(id, Subcommand::Plan).await?;
        self.dispatch(id, req, cmd, ExecMode::Sync).await
    }

    pub async fn refresh(&self, id: &TerrariumId, req: &RequestId) -> Result<String, RunError> {
        let cmd = self.command(id, Subcommand::Refresh).await?;
        self.dispatch(id, req, cmd, ExecMode::Sync).await
    }

    pub async fn apply(
        &self,
        id: &TerrariumId,
        req: &RequestId,
        mode: ExecMode,
    ) -> Result<String, RunError> {
        let cmd = self.command(id, Subcommand::Apply).await?.auto_approve();
        self.dispatch(id, req, cmd, mode).await
    }

    pub async fn destroy(
        &self,
        id: &TerrariumId,
        req: &RequestId,
        mode: ExecMode,
    ) -> Result<String, RunError> {
        let cmd = self.command(id, Subcommand::Destroy).await?.auto_approve();
        self.dispatch(id, req, cmd, mode).await
    }

    /// `state rm <address>`: stop managing a resource without destroying it.
    pub async fn detach_resource(
        &self,
        id: &TerrariumId,
        req: &RequestId,
        address: &str,
    ) -> Result<String, RunError> {
        let cmd = self
            .command(id, Subcommand::State)
            .await?
            .args(["rm", address]);
        self.dispatch(id, req, cmd, ExecMode::Sync).await
    }

    pub async fn output(
        &self,
        id: &TerrariumId,
        req: &RequestId,
        name: &str,
        json: bool,
    ) -> Result<String, RunError> {
        let mut cmd = self.command(id, Subcommand::Output).await?;
        if json {
            cmd = cmd.json();
        }
        if !name.is_empty() {
            cmd = cmd.arg(name);
        }
        self.dispatch(id, req, cmd, ExecMode::Sync).await
    }

    pub async fn show(&self, id: &TerrariumId, req: &RequestId, json: bool) -> Result<String, RunError> {
        let mut cmd = self.command(id, Subcommand::Show).await?;
        if json {
            cmd = cmd.json();
        }
        self.dispatch(id, req, cmd, ExecMode::Sync).await
    }

    /// Status plus log of one request against this terrarium.
    pub async fn history(&self, id: &TerrariumId, req: &RequestId) -> Result<String, RunError> {
        id.validate()?;
        req.validate()?;
        let dir = match self.get(id).await {
            Ok(info) => self.workspace_path(&info),
            Err(RunError::NotFound(_)) => self.base_dir.join(id.as_str()),
            Err(e) => return Err(e),
        };
        self.coordinator
            .get_history(id, &log_file_path(&dir, req))
            .await
    }

    pub async fn tofu_version(&self, req: &RequestId) -> Result<String, RunError> {
        let cmd = TofuCommand::new(Subcommand::Version);
        self.coordinator.run_untracked(req, cmd.to_args()).await
    }

    /// Outputs `<provider>_<suffix>` of every provider of the terrarium, merged.
    pub async fn resource_info(
        &self,
        id: &TerrariumId,
        req: &RequestId,
        suffix: Option<&str>,
    ) -> Result<Map<String, Value>, RunError> {
        let info = self.get(id).await?;
        if info.providers.is_empty() {
            warn!(tr_id = %id, "resource info requested for terrarium without providers");
            return Err(RunError::NoProviders(id.clone()));
        }
        let aggregator = Aggregator::new(Arc::new(self.clone()))
            .with_target_suffix(suffix.unwrap_or(DEFAULT_TARGET_SUFFIX));
        aggregator.aggregate_outputs(id, req, &info.providers).await
    }
}

#[async_trait]
impl OutputSource for TerrariumService {
    async fn output(
        &self,
        tr_id: &TerrariumId,
        req_id: &RequestId,
        name: &str,
    ) -> Result<String, RunError> {
        TerrariumService::output(self, tr_id, req_id, name, true).await
    }
}
