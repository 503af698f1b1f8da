//! Process-based supervisor implementation
//!
//! [`ProcessSupervisor`] owns the in-memory process table: one
//! [`RunningProcess`] per live worker plus the set of ids that are mid-start.
//! Membership in the starting set is the only guard against duplicate
//! starts, and it is tested and inserted under one lock.
//!
//! A `stop` that races an in-flight `start` for the same id can find no
//! handle, return, and let the start register one afterwards. Callers that
//! need stop to win must wait for the start to finish first.

use crate::health::HealthProber;
use crate::reclaim::{PortReclaimer, default_reclaimer, is_port_free};
use crate::sync::{ConfigSynchronizer, SyncReport};
use crate::{Result, SupervisorError};
use corral_core::config::SupervisorSettings;
use corral_core::model::{StopReason, WorkerDescriptor, WorkerStatus};
use corral_core::store::{
    PlaintextCipher, ProviderKeyStore, SecretCipher, SkillStore, ToolStore, WorkerStore,
};
use rand::Rng;
use rand::distributions::Alphanumeric;
use std::collections::{HashMap, HashSet};
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{oneshot, watch};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Environment variable names handed to workers
pub const ENV_WORKER_ID: &str = "CORRAL_WORKER_ID";
pub const ENV_WORKER_PORT: &str = "CORRAL_WORKER_PORT";
pub const ENV_DATA_DIR: &str = "CORRAL_DATA_DIR";
pub const ENV_WORKER_TOKEN: &str = "CORRAL_WORKER_TOKEN";

const TOKEN_LEN: usize = 48;

/// Handle to a live worker process.
///
/// The OS child is owned by its exit-observer task. Dropping the handle
/// kills the process.
#[derive(Debug)]
pub struct RunningProcess {
    pub pid: Option<u32>,
    pub port: u16,
    generation: u64,
    kill: Option<oneshot::Sender<()>>,
    stopping: Arc<AtomicBool>,
    exited: watch::Receiver<Option<StopReason>>,
}

impl RunningProcess {
    fn kill(mut self) -> watch::Receiver<Option<StopReason>> {
        self.stopping.store(true, Ordering::SeqCst);
        if let Some(tx) = self.kill.take() {
            let _ = tx.send(());
        }
        self.exited.clone()
    }
}

#[derive(Debug, Default)]
struct TableState {
    running: HashMap<String, RunningProcess>,
    starting: HashSet<String>,
}

type Table = Arc<Mutex<TableState>>;

fn lock(table: &Table) -> MutexGuard<'_, TableState> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Removes the id from the starting set on every exit path of `start`
struct StartGuard {
    table: Table,
    id: String,
}

impl Drop for StartGuard {
    fn drop(&mut self) {
        lock(&self.table).starting.remove(&self.id);
    }
}

/// Outcome of [`ProcessSupervisor::restore`] for one worker
#[derive(Debug)]
pub struct RestoreOutcome {
    pub worker_id: String,
    pub result: Result<u16>,
}

/// Supervises agent worker processes on the local host
pub struct ProcessSupervisor {
    settings: SupervisorSettings,
    workers: Arc<dyn WorkerStore>,
    tools: Arc<dyn ToolStore>,
    skills: Arc<dyn SkillStore>,
    provider_keys: Arc<dyn ProviderKeyStore>,
    cipher: Arc<dyn SecretCipher>,
    reclaimer: Arc<dyn PortReclaimer>,
    prober: HealthProber,
    synchronizer: ConfigSynchronizer,
    client: reqwest::Client,
    table: Table,
    shutting_down: Arc<AtomicBool>,
    generation: AtomicU64,
}

impl std::fmt::Debug for ProcessSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessSupervisor")
            .field("settings", &self.settings)
            .field("running", &self.running_workers())
            .field("shutting_down", &self.shutting_down.load(Ordering::SeqCst))
            .finish()
    }
}

impl ProcessSupervisor {
    /// Create a new supervisor builder
    pub fn builder(settings: SupervisorSettings) -> ProcessSupervisorBuilder {
        ProcessSupervisorBuilder::new(settings)
    }

    fn table(&self) -> MutexGuard<'_, TableState> {
        lock(&self.table)
    }

    /// Test-and-insert into the starting set
    fn begin_start(&self, id: &str) -> Result<StartGuard> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(SupervisorError::Other(anyhow::anyhow!(
                "supervisor is shutting down"
            )));
        }
        let mut table = self.table();
        if table.running.contains_key(id) {
            return Err(SupervisorError::AlreadyRunning(id.to_string()));
        }
        if !table.starting.insert(id.to_string()) {
            return Err(SupervisorError::AlreadyStarting(id.to_string()));
        }
        Ok(StartGuard {
            table: Arc::clone(&self.table),
            id: id.to_string(),
        })
    }

    /// Start a worker and return its port
    pub async fn start(&self, id: &str) -> Result<u16> {
        let guard = self.begin_start(id)?;
        info!(worker_id = id, "starting worker");
        let workdir = self.worker_dir(id)?;

        let worker = self
            .workers
            .get_worker(id)
            .await?
            .ok_or_else(|| SupervisorError::WorkerNotFound(id.to_string()))?;
        let port = worker
            .port
            .ok_or_else(|| SupervisorError::NoPortAssigned(id.to_string()))?;

        let token = self.worker_token(&worker).await?;
        self.free_port(port, Some(&token)).await?;

        let workdir = self.prepare_workdir(id, &workdir).await?;
        let env = self.worker_env(&worker, port, &workdir, &token).await?;
        let generation = self.spawn(id, port, &workdir, env)?;

        let exited = match self.finish_start(&worker, port, &token).await {
            Ok(exited) => exited,
            Err(e) => {
                self.discard(id, generation).await;
                return Err(e);
            }
        };

        // The exit observer leaves exits to us until the claim is released.
        drop(guard);
        let early_exit = *exited.borrow();
        if let Some(reason) = early_exit {
            return Err(self.exited_during_startup(id, reason).await);
        }

        info!(worker_id = id, port, "worker running");
        Ok(port)
    }

    /// Record an exit seen before `start` returned and build its error
    async fn exited_during_startup(&self, id: &str, reason: StopReason) -> SupervisorError {
        warn!(worker_id = id, %reason, "worker exited during startup");
        if let Err(e) = self
            .workers
            .set_status(id, WorkerStatus::Stopped, Some(reason))
            .await
        {
            warn!(worker_id = id, error = %e, "failed to record worker exit");
        }
        SupervisorError::Spawn(format!("worker {id} exited during startup ({reason})"))
    }

    /// Steps after spawn: health, sync, status. Returns the exit watch of
    /// the new process.
    async fn finish_start(
        &self,
        worker: &WorkerDescriptor,
        port: u16,
        token: &str,
    ) -> Result<watch::Receiver<Option<StopReason>>> {
        let exited = self
            .table()
            .running
            .get(&worker.id)
            .map(|handle| handle.exited.clone());

        let Some(mut exited) = exited else {
            return Err(SupervisorError::Spawn(format!(
                "worker {} exited before registration",
                worker.id
            )));
        };

        let healthy = tokio::select! {
            healthy = self.prober.probe(port) => healthy,
            _ = exited.wait_for(Option::is_some) => false,
        };

        if !healthy {
            let early_exit = *exited.borrow();
            if let Some(reason) = early_exit {
                return Err(self.exited_during_startup(&worker.id, reason).await);
            }
            if let Err(e) = self
                .workers
                .set_status(
                    &worker.id,
                    WorkerStatus::Stopped,
                    Some(StopReason::HealthCheckFailed),
                )
                .await
            {
                warn!(worker_id = %worker.id, error = %e, "failed to record health failure");
            }
            return Err(SupervisorError::HealthCheckTimeout {
                port,
                attempts: self.settings.health_attempts,
            });
        }

        let report = self.sync_worker(worker, port, token).await;
        if !report.is_clean() {
            warn!(
                worker_id = %worker.id,
                failures = ?report.failures,
                "worker started with incomplete configuration"
            );
        }

        self.workers
            .set_status(&worker.id, WorkerStatus::Running, None)
            .await?;
        Ok(exited)
    }

    async fn sync_worker(&self, worker: &WorkerDescriptor, port: u16, token: &str) -> SyncReport {
        let mut servers = Vec::new();
        for server_id in &worker.tool_server_ids {
            match self.tools.get_server(server_id).await {
                Ok(Some(server)) => servers.push(server),
                Ok(None) => warn!(worker_id = %worker.id, server_id, "bound tool server missing"),
                Err(e) => warn!(
                    worker_id = %worker.id,
                    server_id,
                    error = %e,
                    "tool server lookup failed"
                ),
            }
        }

        let mut skills = Vec::new();
        for skill_id in &worker.skill_ids {
            match self.skills.get_skill(skill_id).await {
                Ok(Some(skill)) => skills.push(skill),
                Ok(None) => warn!(worker_id = %worker.id, skill_id, "bound skill missing"),
                Err(e) => warn!(
                    worker_id = %worker.id,
                    skill_id,
                    error = %e,
                    "skill lookup failed"
                ),
            }
        }

        self.synchronizer
            .sync(port, token, worker, &servers, &skills)
            .await
    }

    /// Kill and forget a process registered by a failed start
    async fn discard(&self, id: &str, generation: u64) {
        let handle = {
            let mut table = self.table();
            match table.running.get(id) {
                Some(handle) if handle.generation == generation => table.running.remove(id),
                _ => None,
            }
        };
        if let Some(handle) = handle {
            self.terminate(id, handle).await;
        }
    }

    /// Decrypted worker credential, created and stored on first use
    async fn worker_token(&self, worker: &WorkerDescriptor) -> Result<String> {
        if let Some(encrypted) = &worker.auth_token {
            return Ok(self.cipher.decrypt(encrypted)?);
        }

        let token: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(TOKEN_LEN)
            .map(char::from)
            .collect();
        let encrypted = self.cipher.encrypt(&token)?;
        self.workers.set_auth_token(&worker.id, &encrypted).await?;
        debug!(worker_id = %worker.id, "generated worker credential");
        Ok(token)
    }

    /// Make sure nothing holds `port`, escalating from a polite shutdown
    /// request to killing the owner
    async fn free_port(&self, port: u16, token: Option<&str>) -> Result<()> {
        if is_port_free(port) {
            return Ok(());
        }

        if self.prober.probe_once(port).await {
            info!(port, "port held by a live worker, requesting shutdown");
            self.request_shutdown(port, token).await;
            tokio::time::sleep(self.settings.port_recheck_delay).await;
            if is_port_free(port) {
                return Ok(());
            }
        }

        match self.reclaimer.reclaim(port).await {
            Ok(killed) => info!(port, killed, "reclaimed port"),
            Err(e) => warn!(port, error = %e, "port reclaim failed"),
        }
        tokio::time::sleep(self.settings.reclaim_settle_delay).await;

        if is_port_free(port) {
            Ok(())
        } else {
            Err(SupervisorError::PortInUse(port))
        }
    }

    /// Best-effort `POST /shutdown`
    async fn request_shutdown(&self, port: u16, token: Option<&str>) {
        let mut request = self
            .client
            .post(format!("http://127.0.0.1:{port}/shutdown"))
            .timeout(self.settings.shutdown_grace);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        match request.send().await {
            Ok(response) => debug!(port, status = %response.status(), "shutdown requested"),
            Err(e) => debug!(port, error = %e, "shutdown request failed"),
        }
    }

    /// `{data_dir}/workers/{id}`; the id must be one plain path segment
    fn worker_dir(&self, id: &str) -> Result<PathBuf> {
        let mut components = Path::new(id).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => {
                Ok(self.settings.data_dir.join("workers").join(id))
            }
            _ => Err(SupervisorError::InvalidWorkerId(id.to_string())),
        }
    }

    async fn prepare_workdir(&self, id: &str, dir: &Path) -> Result<PathBuf> {
        let root = self.settings.data_dir.join("workers");
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| anyhow::anyhow!("failed to create {}: {e}", root.display()))?;
        let root = tokio::fs::canonicalize(&root)
            .await
            .map_err(|e| anyhow::anyhow!("failed to resolve {}: {e}", root.display()))?;

        if self.settings.clean_start && tokio::fs::try_exists(dir).await.unwrap_or(false) {
            let resolved = tokio::fs::canonicalize(dir)
                .await
                .map_err(|e| anyhow::anyhow!("failed to resolve {}: {e}", dir.display()))?;
            if resolved == root || !resolved.starts_with(&root) {
                return Err(SupervisorError::InvalidWorkerId(id.to_string()));
            }
            debug!(worker_id = id, dir = %resolved.display(), "wiping worker directory");
            tokio::fs::remove_dir_all(&resolved)
                .await
                .map_err(|e| anyhow::anyhow!("failed to clean {}: {e}", resolved.display()))?;
        }
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| anyhow::anyhow!("failed to create {}: {e}", dir.display()))?;
        let resolved = tokio::fs::canonicalize(dir)
            .await
            .map_err(|e| anyhow::anyhow!("failed to resolve {}: {e}", dir.display()))?;
        if !resolved.starts_with(&root) {
            return Err(SupervisorError::InvalidWorkerId(id.to_string()));
        }
        Ok(resolved)
    }

    async fn worker_env(
        &self,
        worker: &WorkerDescriptor,
        port: u16,
        workdir: &Path,
        token: &str,
    ) -> Result<Vec<(String, String)>> {
        let mut env = vec![
            (ENV_WORKER_ID.to_string(), worker.id.clone()),
            (ENV_WORKER_PORT.to_string(), port.to_string()),
            (ENV_DATA_DIR.to_string(), workdir.display().to_string()),
            (ENV_WORKER_TOKEN.to_string(), token.to_string()),
        ];

        match self.provider_keys.provider_key(&worker.provider).await? {
            Some(encrypted) => {
                let key = self.cipher.decrypt(&encrypted)?;
                env.push((provider_key_var(&worker.provider), key));
            }
            None => debug!(
                worker_id = %worker.id,
                provider = %worker.provider,
                "no provider key stored"
            ),
        }

        Ok(env)
    }

    /// Spawn the worker, register its handle and attach the exit observer.
    /// Returns the handle generation.
    fn spawn(
        &self,
        id: &str,
        port: u16,
        workdir: &Path,
        env: Vec<(String, String)>,
    ) -> Result<u64> {
        let binary = resolve_binary(&self.settings.worker_binary);
        let mut child = tokio::process::Command::new(&binary)
            .current_dir(workdir)
            .envs(env)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SupervisorError::Spawn(format!("{}: {e}", binary.display())))?;

        let pid = child.id();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst);
        let (kill_tx, kill_rx) = oneshot::channel();
        let (exited_tx, exited_rx) = watch::channel(None);
        let stopping = Arc::new(AtomicBool::new(false));

        let handle = RunningProcess {
            pid,
            port,
            generation,
            kill: Some(kill_tx),
            stopping: Arc::clone(&stopping),
            exited: exited_rx,
        };
        self.table().running.insert(id.to_string(), handle);
        info!(worker_id = id, pid = ?pid, port, "spawned worker process");

        let table = Arc::clone(&self.table);
        let shutting_down = Arc::clone(&self.shutting_down);
        let workers = Arc::clone(&self.workers);
        let id = id.to_string();

        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = kill_rx => {
                    if let Err(e) = child.start_kill() {
                        debug!(worker_id = %id, error = %e, "kill failed");
                    }
                    child.wait().await
                }
            };
            let reason = match &status {
                Ok(status) if status.success() => StopReason::Exited,
                _ => StopReason::Crashed,
            };
            let _ = exited_tx.send(Some(reason));

            if stopping.load(Ordering::SeqCst) || shutting_down.load(Ordering::SeqCst) {
                debug!(worker_id = %id, ?status, "worker exited on request");
                return;
            }

            let record = {
                let mut table = lock(&table);
                let ours = table
                    .running
                    .get(&id)
                    .is_some_and(|handle| handle.generation == generation);
                if ours {
                    table.running.remove(&id);
                }
                // An in-flight start reports its own failure.
                ours && !table.starting.contains(&id)
            };
            if !record {
                debug!(worker_id = %id, ?status, "worker exited");
                return;
            }

            warn!(worker_id = %id, ?status, %reason, "worker exited unexpectedly");

            if let Err(e) = workers
                .set_status(&id, WorkerStatus::Stopped, Some(reason))
                .await
            {
                warn!(worker_id = %id, error = %e, "failed to record worker exit");
            }
        });

        Ok(generation)
    }

    /// Kill a removed handle and wait for its exit
    async fn terminate(&self, id: &str, handle: RunningProcess) {
        let mut exited = handle.kill();
        if timeout(self.settings.shutdown_grace, exited.wait_for(Option::is_some))
            .await
            .is_err()
        {
            warn!(worker_id = id, "worker did not exit after kill");
        }
    }

    /// Decrypted credential of a stored worker, if any
    fn stored_token(&self, worker: Option<&WorkerDescriptor>) -> Option<String> {
        let worker = worker?;
        let encrypted = worker.auth_token.as_deref()?;
        match self.cipher.decrypt(encrypted) {
            Ok(token) => Some(token),
            Err(e) => {
                warn!(
                    worker_id = %worker.id,
                    error = %e,
                    "failed to decrypt worker credential"
                );
                None
            }
        }
    }

    async fn lookup_worker(&self, id: &str) -> Option<WorkerDescriptor> {
        match self.workers.get_worker(id).await {
            Ok(worker) => worker,
            Err(e) => {
                warn!(worker_id = id, error = %e, "worker lookup failed");
                None
            }
        }
    }

    /// Stop a worker: graceful request, kill, port check, status update.
    ///
    /// A tracked process is killed even when the worker is gone from the
    /// store; the status write is then skipped.
    pub async fn stop(&self, id: &str, reason: StopReason) -> Result<()> {
        info!(worker_id = id, %reason, "stopping worker");

        let handle = self.table().running.remove(id);
        if let Some(handle) = &handle {
            handle.stopping.store(true, Ordering::SeqCst);
        }

        let worker = self.lookup_worker(id).await;
        let port = handle
            .as_ref()
            .map(|h| h.port)
            .or_else(|| worker.as_ref().and_then(|w| w.port));
        let token = self.stored_token(worker.as_ref());

        if let Some(port) = port {
            if handle.is_some() || !is_port_free(port) {
                self.request_shutdown(port, token.as_deref()).await;
            }
        }

        match handle {
            Some(handle) => self.terminate(id, handle).await,
            None => debug!(worker_id = id, "no running process"),
        }

        if let Some(port) = port {
            if !is_port_free(port) {
                tokio::time::sleep(self.settings.port_recheck_delay).await;
            }
            if let Err(e) = self.free_port(port, token.as_deref()).await {
                warn!(worker_id = id, port, error = %e, "port still bound after stop");
            }
        }

        if worker.is_none() {
            warn!(worker_id = id, "worker no longer stored, status not recorded");
            return Ok(());
        }
        self.workers
            .set_status(id, WorkerStatus::Stopped, Some(reason))
            .await?;
        Ok(())
    }

    /// `stop(id, Restart)` followed by `start(id)`
    pub async fn restart(&self, id: &str) -> Result<u16> {
        self.stop(id, StopReason::Restart).await?;
        self.start(id).await
    }

    /// Stop every tracked process without touching stored status, so a
    /// later [`restore`](Self::restore) brings the same workers back.
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        let handles: Vec<(String, RunningProcess)> = self.table().running.drain().collect();
        info!(count = handles.len(), "supervisor shutting down");

        let stops = handles.into_iter().map(|(id, handle)| async move {
            handle.stopping.store(true, Ordering::SeqCst);
            let worker = self.lookup_worker(&id).await;
            let token = self.stored_token(worker.as_ref());
            self.request_shutdown(handle.port, token.as_deref()).await;
            self.terminate(&id, handle).await;
        });
        futures::future::join_all(stops).await;
    }

    /// Boot-time recovery: start every worker whose stored status is running
    pub async fn restore(&self) -> Result<Vec<RestoreOutcome>> {
        let workers = self.workers.list_workers().await?;
        let mut outcomes = Vec::new();

        for worker in workers
            .into_iter()
            .filter(|w| w.status == WorkerStatus::Running)
        {
            let result = self.start(&worker.id).await;
            if let Err(e) = &result {
                warn!(worker_id = %worker.id, error = %e, "restore failed");
                if let Err(e) = self
                    .workers
                    .set_status(
                        &worker.id,
                        WorkerStatus::Stopped,
                        Some(StopReason::RestoreFailed),
                    )
                    .await
                {
                    warn!(worker_id = %worker.id, error = %e, "failed to record restore failure");
                }
            }
            outcomes.push(RestoreOutcome {
                worker_id: worker.id,
                result,
            });
        }

        Ok(outcomes)
    }

    pub fn is_running(&self, id: &str) -> bool {
        self.table().running.contains_key(id)
    }

    pub fn running_port(&self, id: &str) -> Option<u16> {
        self.table().running.get(id).map(|h| h.port)
    }

    /// `(id, port)` of every tracked process, sorted by id
    pub fn running_workers(&self) -> Vec<(String, u16)> {
        let mut running: Vec<(String, u16)> = self
            .table()
            .running
            .iter()
            .map(|(id, h)| (id.clone(), h.port))
            .collect();
        running.sort();
        running
    }
}

/// `openai` -> `OPENAI_API_KEY`, `azure-openai` -> `AZURE_OPENAI_API_KEY`
pub fn provider_key_var(provider: &str) -> String {
    let name: String = provider
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("{name}_API_KEY")
}

/// Relative paths with a directory part are made absolute, since the child
/// runs in its own working directory. Bare names go through `PATH`.
fn resolve_binary(binary: &Path) -> PathBuf {
    if binary.is_absolute() || binary.components().count() < 2 {
        return binary.to_path_buf();
    }
    std::path::absolute(binary).unwrap_or_else(|_| binary.to_path_buf())
}

/// Builder for [`ProcessSupervisor`]
pub struct ProcessSupervisorBuilder {
    settings: SupervisorSettings,
    workers: Option<Arc<dyn WorkerStore>>,
    tools: Option<Arc<dyn ToolStore>>,
    skills: Option<Arc<dyn SkillStore>>,
    provider_keys: Option<Arc<dyn ProviderKeyStore>>,
    cipher: Arc<dyn SecretCipher>,
    reclaimer: Arc<dyn PortReclaimer>,
    public_url: String,
}

impl ProcessSupervisorBuilder {
    pub fn new(settings: SupervisorSettings) -> Self {
        Self {
            settings,
            workers: None,
            tools: None,
            skills: None,
            provider_keys: None,
            cipher: Arc::new(PlaintextCipher),
            reclaimer: default_reclaimer(),
            public_url: corral_core::config::GatewaySettings::default().public_url,
        }
    }

    /// Use one object for every store seam
    pub fn store<S>(mut self, store: Arc<S>) -> Self
    where
        S: WorkerStore + ToolStore + SkillStore + ProviderKeyStore + 'static,
    {
        self.workers = Some(store.clone());
        self.tools = Some(store.clone());
        self.skills = Some(store.clone());
        self.provider_keys = Some(store);
        self
    }

    pub fn worker_store(mut self, store: Arc<dyn WorkerStore>) -> Self {
        self.workers = Some(store);
        self
    }

    pub fn tool_store(mut self, store: Arc<dyn ToolStore>) -> Self {
        self.tools = Some(store);
        self
    }

    pub fn skill_store(mut self, store: Arc<dyn SkillStore>) -> Self {
        self.skills = Some(store);
        self
    }

    pub fn provider_key_store(mut self, store: Arc<dyn ProviderKeyStore>) -> Self {
        self.provider_keys = Some(store);
        self
    }

    pub fn cipher(mut self, cipher: Arc<dyn SecretCipher>) -> Self {
        self.cipher = cipher;
        self
    }

    pub fn reclaimer(mut self, reclaimer: Arc<dyn PortReclaimer>) -> Self {
        self.reclaimer = reclaimer;
        self
    }

    /// Gateway base URL advertised to workers
    pub fn public_url(mut self, url: impl Into<String>) -> Self {
        self.public_url = url.into();
        self
    }

    pub fn build(self) -> Result<ProcessSupervisor> {
        let missing = |what: &str| {
            SupervisorError::Other(anyhow::anyhow!("supervisor builder is missing a {what}"))
        };
        let settings = self.settings;

        Ok(ProcessSupervisor {
            workers: self.workers.ok_or_else(|| missing("worker store"))?,
            tools: self.tools.ok_or_else(|| missing("tool store"))?,
            skills: self.skills.ok_or_else(|| missing("skill store"))?,
            provider_keys: self
                .provider_keys
                .ok_or_else(|| missing("provider key store"))?,
            cipher: self.cipher,
            reclaimer: self.reclaimer,
            prober: HealthProber::new(
                settings.health_attempts,
                settings.health_delay,
                settings.health_request_timeout,
            ),
            synchronizer: ConfigSynchronizer::new(self.public_url, settings.request_timeout),
            client: reqwest::Client::new(),
            table: Arc::new(Mutex::new(TableState::default())),
            shutting_down: Arc::new(AtomicBool::new(false)),
            generation: AtomicU64::new(0),
            settings,
        })
    }
}
