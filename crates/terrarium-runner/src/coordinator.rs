use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;

use terrarium_domain::keys::status_key;
use terrarium_domain::{RequestId, RunStatus, TerrariumId};
use terrarium_store::KvStore;
use terrarium_tofu::Executor;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::RunError;

/// Wraps an [`Executor`] with per-terrarium single-flight admission and
/// durable run-status bookkeeping.
///
/// At most one admitted run per terrarium id is in flight at any time. A
/// second caller is rejected with [`RunError::InProgress`]; nothing queues.
#[derive(Clone)]
pub struct RunCoordinator {
    store: Arc<dyn KvStore>,
    executor: Arc<dyn Executor>,
    cancel: CancellationToken,
}

impl RunCoordinator {
    pub fn new(store: Arc<dyn KvStore>, executor: Arc<dyn Executor>) -> Self {
        Self {
            store,
            executor,
            cancel: CancellationToken::new(),
        }
    }

    /// Parent of every per-run token. Cancelling it aborts all in-flight runs.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Admit, execute and record one run, returning the captured output.
    ///
    /// Execution and the status write happen on a spawned task, so a caller
    /// that goes away mid-run still leaves a terminal status behind.
    pub async fn run(
        &self,
        tr_id: &TerrariumId,
        req_id: &RequestId,
        args: Vec<String>,
    ) -> Result<String, RunError> {
        self.admit(tr_id).await?;

        let this = self.clone();
        let (tr_id, req_id) = (tr_id.clone(), req_id.clone());
        match tokio::spawn(async move { this.finish(&tr_id, &req_id, args).await }).await {
            Ok(result) => result,
            Err(e) => Err(RunError::Panicked(panic_reason(e))),
        }
    }

    /// Admit the run and execute it in the background.
    ///
    /// Returns an acknowledgement as soon as the slot is claimed; the caller
    /// polls [`get_history`](Self::get_history) for the outcome.
    pub async fn run_async(
        &self,
        tr_id: &TerrariumId,
        req_id: &RequestId,
        args: Vec<String>,
    ) -> Result<String, RunError> {
        self.admit(tr_id).await?;

        let this = self.clone();
        let (tr_id, req_id) = (tr_id.clone(), req_id.clone());
        let ack = format!(
            "Request (reqId: {req_id}) in progress. Please use the status check API with the request ID."
        );
        tokio::spawn(async move {
            if let Err(e) = this.finish(&tr_id, &req_id, args).await {
                warn!(tr_id = %tr_id, req_id = %req_id, error = %e, "background run failed");
            }
        });
        Ok(ack)
    }

    /// Execute a read-only command without claiming the slot.
    ///
    /// Refused while an admitted run is in flight; leaves the status untouched
    /// so concurrent reads of the same terrarium do not reject each other.
    pub async fn run_shared(
        &self,
        tr_id: &TerrariumId,
        req_id: &RequestId,
        args: Vec<String>,
    ) -> Result<String, RunError> {
        if self.status(tr_id).await?.is_some_and(|s| s.is_running()) {
            return Err(RunError::InProgress(tr_id.clone()));
        }
        self.spawn_execute(req_id, args).await
    }

    /// Execute without admission or status bookkeeping, e.g. `tofu version`.
    pub async fn run_untracked(
        &self,
        req_id: &RequestId,
        args: Vec<String>,
    ) -> Result<String, RunError> {
        self.spawn_execute(req_id, args).await
    }

    /// Current status, or `None` if nothing has ever run for `tr_id`.
    pub async fn status(&self, tr_id: &TerrariumId) -> Result<Option<RunStatus>, RunError> {
        let Some(raw) = self.store.get(&status_key(tr_id)).await? else {
            return Ok(None);
        };
        match serde_json::from_str::<RunStatus>(&raw) {
            Ok(status) => Ok(Some(status)),
            Err(e) => {
                warn!(tr_id = %tr_id, raw = %raw, error = %e, "ignoring undecodable run status");
                Ok(None)
            }
        }
    }

    /// Current status label followed by the contents of `log_file`.
    pub async fn get_history(
        &self,
        tr_id: &TerrariumId,
        log_file: &Path,
    ) -> Result<String, RunError> {
        let status = self
            .status(tr_id)
            .await?
            .ok_or_else(|| RunError::NoRequest(tr_id.clone()))?;

        let log = match tokio::fs::read_to_string(log_file).await {
            Ok(s) => s,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(RunError::LogMissing(log_file.display().to_string()));
            }
            Err(e) => return Err(RunError::io(log_file, e)),
        };
        Ok(format!("[Request status: {status}]\n{log}"))
    }

    /// Claim the slot without running anything, e.g. while a workspace is
    /// being deleted. Returns the raw status it replaced; hand it back to
    /// [`release`](Self::release).
    pub async fn hold(&self, tr_id: &TerrariumId) -> Result<Option<String>, RunError> {
        self.admit(tr_id).await
    }

    /// Put back the status a [`hold`](Self::hold) replaced.
    pub async fn release(
        &self,
        tr_id: &TerrariumId,
        previous: Option<String>,
    ) -> Result<(), RunError> {
        let key = status_key(tr_id);
        match previous {
            Some(raw) => self.store.put_raw(&key, raw).await?,
            None => self.store.delete(&key).await?,
        }
        Ok(())
    }

    /// Move the status to `Running` unless it already is; returns the old value.
    async fn admit(&self, tr_id: &TerrariumId) -> Result<Option<String>, RunError> {
        let key = status_key(tr_id);
        let running = encode_status(RunStatus::Running);
        loop {
            let current = self.store.get(&key).await?;
            if current.as_deref() == Some(running.as_str()) {
                return Err(RunError::InProgress(tr_id.clone()));
            }
            if self
                .store
                .compare_and_swap(&key, current.as_deref(), running.clone())
                .await?
            {
                return Ok(current);
            }
            // Lost a race with another writer; look again.
        }
    }

    async fn finish(
        &self,
        tr_id: &TerrariumId,
        req_id: &RequestId,
        args: Vec<String>,
    ) -> Result<String, RunError> {
        let result = self.spawn_execute(req_id, args).await;
        let status = if result.is_ok() {
            RunStatus::Success
        } else {
            RunStatus::Failed
        };

        if let Err(e) = self
            .store
            .put_raw(&status_key(tr_id), encode_status(status))
            .await
        {
            error!(tr_id = %tr_id, error = %e, "failed to record run status");
            return Err(e.into());
        }
        info!(tr_id = %tr_id, req_id = %req_id, %status, "run finished");
        result
    }

    /// Run the executor on its own task so a panic surfaces as an error here.
    async fn spawn_execute(&self, req_id: &RequestId, args: Vec<String>) -> Result<String, RunError> {
        let executor = self.executor.clone();
        let cancel = self.cancel.child_token();
        let req_id = req_id.clone();
        let handle = tokio::spawn(async move { executor.execute(&req_id, &args, cancel).await });

        match handle.await {
            Ok(result) => result.map_err(RunError::from),
            Err(e) => {
                let reason = panic_reason(e);
                error!(reason = %reason, "execution task panicked");
                Err(RunError::Panicked(reason))
            }
        }
    }
}

fn encode_status(status: RunStatus) -> String {
    format!("\"{status}\"")
}

fn panic_reason(err: JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".into()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use terrarium_store::LocalKvStore;
    use terrarium_tofu::ExecError;
    use tokio::sync::Semaphore;

    use super::*;

    /// Blocks every run until released; counts how many runs started.
    struct GatedExecutor {
        started: AtomicUsize,
        gate: Semaphore,
    }

    impl GatedExecutor {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                started: AtomicUsize::new(0),
                gate: Semaphore::new(0),
            })
        }

        fn release(&self, runs: usize) {
            self.gate.add_permits(runs);
        }
    }

    #[async_trait]
    impl Executor for GatedExecutor {
        async fn execute(
            &self,
            _req: &RequestId,
            args: &[String],
            _cancel: CancellationToken,
        ) -> Result<String, ExecError> {
            self.started.fetch_add(1, Ordering::SeqCst);
            self.gate.acquire().await.unwrap().forget();
            Ok(format!("ran {}\n", args.join(" ")))
        }
    }

    struct FailingExecutor;

    #[async_trait]
    impl Executor for FailingExecutor {
        async fn execute(
            &self,
            _req: &RequestId,
            _args: &[String],
            _cancel: CancellationToken,
        ) -> Result<String, ExecError> {
            Err(ExecError::CommandFailed {
                command: "tofu apply".into(),
                code: Some(1),
                output: "Error: quota exceeded\n".into(),
            })
        }
    }

    struct PanickingExecutor;

    #[async_trait]
    impl Executor for PanickingExecutor {
        async fn execute(
            &self,
            _req: &RequestId,
            _args: &[String],
            _cancel: CancellationToken,
        ) -> Result<String, ExecError> {
            panic!("boom");
        }
    }

    struct CancellableExecutor;

    #[async_trait]
    impl Executor for CancellableExecutor {
        async fn execute(
            &self,
            _req: &RequestId,
            _args: &[String],
            cancel: CancellationToken,
        ) -> Result<String, ExecError> {
            cancel.cancelled().await;
            Err(ExecError::Cancelled {
                command: "tofu apply".into(),
                output: String::new(),
            })
        }
    }

    fn coordinator(executor: Arc<dyn Executor>) -> RunCoordinator {
        RunCoordinator::new(Arc::new(LocalKvStore::in_memory()), executor)
    }

    fn args(sub: &str) -> Vec<String> {
        vec![sub.to_string()]
    }

    async fn wait_for_status(c: &RunCoordinator, id: &TerrariumId, want: RunStatus) {
        for _ in 0..200 {
            if c.status(id).await.unwrap() == Some(want) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("status never became {want}");
    }

    #[tokio::test]
    async fn second_run_is_rejected_while_first_is_in_flight() {
        let exec = GatedExecutor::new();
        let c = coordinator(exec.clone());
        let id = TerrariumId::new("tr01");

        let first = {
            let c = c.clone();
            let id = id.clone();
            tokio::spawn(async move { c.run(&id, &RequestId::new("r1"), args("apply")).await })
        };
        wait_for_status(&c, &id, RunStatus::Running).await;

        let err = c.run(&id, &RequestId::new("r2"), args("plan")).await.unwrap_err();
        assert!(matches!(err, RunError::InProgress(_)));
        let err = c
            .run_async(&id, &RequestId::new("r3"), args("destroy"))
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::InProgress(_)));

        exec.release(1);
        let out = first.await.unwrap().unwrap();
        assert_eq!(out, "ran apply\n");
        assert_eq!(exec.started.load(Ordering::SeqCst), 1);
        assert_eq!(c.status(&id).await.unwrap(), Some(RunStatus::Success));
    }

    #[tokio::test]
    async fn dropped_caller_still_records_terminal_status() {
        let exec = GatedExecutor::new();
        let c = coordinator(exec.clone());
        let id = TerrariumId::new("tr01");

        let caller = {
            let c = c.clone();
            let id = id.clone();
            tokio::spawn(async move { c.run(&id, &RequestId::new("r1"), args("apply")).await })
        };
        wait_for_status(&c, &id, RunStatus::Running).await;
        caller.abort();
        assert!(caller.await.unwrap_err().is_cancelled());

        exec.release(1);
        wait_for_status(&c, &id, RunStatus::Success).await;

        exec.release(1);
        let out = c.run(&id, &RequestId::new("r2"), args("plan")).await.unwrap();
        assert_eq!(out, "ran plan\n");
    }

    #[tokio::test]
    async fn held_slot_blocks_runs_and_restores_status() {
        let c = coordinator(Arc::new(FailingExecutor));
        let id = TerrariumId::new("tr01");
        let _ = c.run(&id, &RequestId::new("r1"), args("apply")).await;

        let previous = c.hold(&id).await.unwrap();
        assert_eq!(c.status(&id).await.unwrap(), Some(RunStatus::Running));
        for err in [
            c.run(&id, &RequestId::new("r2"), args("apply")).await.unwrap_err(),
            c.run_async(&id, &RequestId::new("r3"), args("apply")).await.unwrap_err(),
            c.run_shared(&id, &RequestId::new("r4"), args("output")).await.unwrap_err(),
            c.hold(&id).await.unwrap_err(),
        ] {
            assert!(matches!(err, RunError::InProgress(_)));
        }

        c.release(&id, previous).await.unwrap();
        assert_eq!(c.status(&id).await.unwrap(), Some(RunStatus::Failed));

        let fresh = TerrariumId::new("tr02");
        let previous = c.hold(&fresh).await.unwrap();
        assert_eq!(previous, None);
        c.release(&fresh, previous).await.unwrap();
        assert_eq!(c.status(&fresh).await.unwrap(), None);
    }

    #[tokio::test]
    async fn concurrent_admissions_have_one_winner() {
        let exec = GatedExecutor::new();
        let c = coordinator(exec.clone());
        let id = TerrariumId::new("tr01");

        let mut handles = Vec::new();
        for i in 0..12 {
            let c = c.clone();
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                c.run_async(&id, &RequestId::new(format!("r{i}")), args("apply"))
                    .await
            }));
        }
        let mut accepted = 0;
        let mut rejected = 0;
        for h in handles {
            match h.await.unwrap() {
                Ok(_) => accepted += 1,
                Err(RunError::InProgress(_)) => rejected += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!((accepted, rejected), (1, 11));

        exec.release(1);
        wait_for_status(&c, &id, RunStatus::Success).await;
        assert_eq!(exec.started.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_ids_do_not_block_each_other() {
        let exec = GatedExecutor::new();
        let c = coordinator(exec.clone());

        c.run_async(&TerrariumId::new("a"), &RequestId::new("r1"), args("apply"))
            .await
            .unwrap();
        c.run_async(&TerrariumId::new("b"), &RequestId::new("r2"), args("apply"))
            .await
            .unwrap();

        exec.release(2);
        wait_for_status(&c, &TerrariumId::new("a"), RunStatus::Success).await;
        wait_for_status(&c, &TerrariumId::new("b"), RunStatus::Success).await;
    }

    #[tokio::test]
    async fn async_run_acknowledges_with_request_id() {
        let exec = GatedExecutor::new();
        let c = coordinator(exec.clone());
        let id = TerrariumId::new("tr01");

        let ack = c
            .run_async(&id, &RequestId::new("req-42"), args("apply"))
            .await
            .unwrap();
        assert_eq!(
            ack,
            "Request (reqId: req-42) in progress. Please use the status check API with the request ID."
        );
        assert_eq!(c.status(&id).await.unwrap(), Some(RunStatus::Running));

        exec.release(1);
        wait_for_status(&c, &id, RunStatus::Success).await;
    }

    #[tokio::test]
    async fn status_moves_from_unset_through_running_to_terminal() {
        let c = coordinator(Arc::new(FailingExecutor));
        let id = TerrariumId::new("tr01");
        assert_eq!(c.status(&id).await.unwrap(), None);

        let err = c.run(&id, &RequestId::new("r1"), args("apply")).await.unwrap_err();
        assert_eq!(err.output(), Some("Error: quota exceeded\n"));
        assert_eq!(c.status(&id).await.unwrap(), Some(RunStatus::Failed));

        // A failed run does not hold the slot.
        let err = c.run(&id, &RequestId::new("r2"), args("apply")).await.unwrap_err();
        assert!(matches!(err, RunError::Exec(_)));
    }

    #[tokio::test]
    async fn panic_lands_on_failed() {
        let c = coordinator(Arc::new(PanickingExecutor));
        let id = TerrariumId::new("tr01");

        let err = c.run(&id, &RequestId::new("r1"), args("apply")).await.unwrap_err();
        match err {
            RunError::Panicked(reason) => assert_eq!(reason, "boom"),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(c.status(&id).await.unwrap(), Some(RunStatus::Failed));
    }

    #[tokio::test]
    async fn panic_in_background_run_lands_on_failed() {
        let c = coordinator(Arc::new(PanickingExecutor));
        let id = TerrariumId::new("tr01");

        c.run_async(&id, &RequestId::new("r1"), args("destroy"))
            .await
            .unwrap();
        wait_for_status(&c, &id, RunStatus::Failed).await;
    }

    #[tokio::test]
    async fn cancellation_lands_on_failed() {
        let c = coordinator(Arc::new(CancellableExecutor));
        let id = TerrariumId::new("tr01");

        c.run_async(&id, &RequestId::new("r1"), args("apply"))
            .await
            .unwrap();
        assert_eq!(c.status(&id).await.unwrap(), Some(RunStatus::Running));

        c.cancellation_token().cancel();
        wait_for_status(&c, &id, RunStatus::Failed).await;
    }

    #[tokio::test]
    async fn shared_runs_do_not_claim_the_slot() {
        let exec = GatedExecutor::new();
        let c = coordinator(exec.clone());
        let id = TerrariumId::new("tr01");

        let reads: Vec<_> = (0..3)
            .map(|i| {
                let c = c.clone();
                let id = id.clone();
                tokio::spawn(async move {
                    c.run_shared(&id, &RequestId::new(format!("r{i}")), args("output"))
                        .await
                })
            })
            .collect();

        for _ in 0..200 {
            if exec.started.load(Ordering::SeqCst) == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(exec.started.load(Ordering::SeqCst), 3);
        assert_eq!(c.status(&id).await.unwrap(), None);

        exec.release(3);
        for r in reads {
            assert_eq!(r.await.unwrap().unwrap(), "ran output\n");
        }
        assert_eq!(c.status(&id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn shared_run_refused_while_running() {
        let exec = GatedExecutor::new();
        let c = coordinator(exec.clone());
        let id = TerrariumId::new("tr01");

        c.run_async(&id, &RequestId::new("r1"), args("apply"))
            .await
            .unwrap();
        let err = c
            .run_shared(&id, &RequestId::new("r2"), args("output"))
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::InProgress(_)));

        exec.release(1);
        wait_for_status(&c, &id, RunStatus::Success).await;
    }

    #[tokio::test]
    async fn history_on_unknown_id_is_no_request() {
        let c = coordinator(Arc::new(FailingExecutor));
        let err = c
            .get_history(&TerrariumId::new("nonexistent"), Path::new("/any/path.log"))
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::NoRequest(_)));
    }

    #[tokio::test]
    async fn history_without_log_file_is_log_missing() {
        let c = coordinator(Arc::new(FailingExecutor));
        let id = TerrariumId::new("tr01");
        let _ = c.run(&id, &RequestId::new("r1"), args("apply")).await;

        let dir = tempfile::TempDir::new().unwrap();
        let err = c
            .get_history(&id, &dir.path().join("runningLogs/r1.log"))
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::LogMissing(_)));
    }

    #[tokio::test]
    async fn history_prefixes_status_label() {
        let c = coordinator(Arc::new(FailingExecutor));
        let id = TerrariumId::new("tr01");
        let _ = c.run(&id, &RequestId::new("r1"), args("apply")).await;

        let dir = tempfile::TempDir::new().unwrap();
        let log = dir.path().join("r1.log");
        std::fs::write(&log, "Error: quota exceeded\n").unwrap();

        let report = c.get_history(&id, &log).await.unwrap();
        assert_eq!(report, "[Request status: Failed]\nError: quota exceeded\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn history_accumulates_across_runs_with_one_request_id() {
        use std::os::unix::fs::PermissionsExt;
        use terrarium_tofu::{log_file_path, TofuExecutor};

        let bin = tempfile::TempDir::new().unwrap();
        let tofu = bin.path().join("tofu");
        std::fs::write(&tofu, "#!/bin/sh\necho \"tofu $2\"\n").unwrap();
        std::fs::set_permissions(&tofu, std::fs::Permissions::from_mode(0o755)).unwrap();

        let ws = tempfile::TempDir::new().unwrap();
        let c = coordinator(Arc::new(TofuExecutor::new(tofu.display().to_string())));
        let id = TerrariumId::new("tr01");
        let req = RequestId::new("req-1");
        let chdir = format!("-chdir={}", ws.path().display());

        c.run(&id, &req, vec![chdir.clone(), "init".into()]).await.unwrap();
        c.run(&id, &req, vec![chdir, "apply".into()]).await.unwrap();

        let report = c
            .get_history(&id, &log_file_path(ws.path(), &req))
            .await
            .unwrap();
        assert_eq!(report, "[Request status: Success]\ntofu init\ntofu apply\n");
    }
}
