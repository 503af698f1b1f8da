//! Integration tests for the process supervisor
//!
//! These drive the real `corral-echo-worker` binary through the supervisor:
//! spawning, health probing, config push, port reclaim and exit detection.

#![cfg(unix)]

use async_trait::async_trait;
use corral_core::config::SupervisorSettings;
use corral_core::model::{SkillDefinition, StopReason, ToolServer, WorkerDescriptor, WorkerStatus};
use corral_core::CorralError;
use corral_core::store::{FleetManifest, InMemoryStore, WorkerStore};
use corral_supervisor::{
    NoopReclaimer, PortReclaimer, ProcessSupervisor, SupervisorError, is_port_free,
};
use serde_json::Value;
use std::net::TcpListener;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

const ECHO_WORKER: &str = env!("CARGO_BIN_EXE_corral-echo-worker");

fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind");
    listener.local_addr().unwrap().port()
}

fn settings(data_dir: &Path, binary: PathBuf) -> SupervisorSettings {
    SupervisorSettings {
        worker_binary: binary,
        data_dir: data_dir.to_path_buf(),
        health_attempts: 50,
        health_delay: Duration::from_millis(100),
        health_request_timeout: Duration::from_millis(300),
        shutdown_grace: Duration::from_secs(2),
        port_recheck_delay: Duration::from_millis(100),
        reclaim_settle_delay: Duration::from_millis(100),
        request_timeout: Duration::from_secs(2),
        ..Default::default()
    }
}

/// Shell wrapper that runs the echo worker with extra flags
fn wrapper(dir: &Path, name: &str, flags: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\nexec \"{ECHO_WORKER}\" {flags} \"$@\"\n"))
        .expect("Failed to write wrapper");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("Failed to chmod wrapper");
    path
}

fn worker(id: &str, port: Option<u16>) -> WorkerDescriptor {
    let mut worker = WorkerDescriptor::new(id, "openai", "gpt-4o");
    worker.port = port;
    worker
}

async fn store_with(workers: Vec<WorkerDescriptor>) -> Arc<InMemoryStore> {
    let store = Arc::new(InMemoryStore::new(FleetManifest::default()));
    for w in workers {
        store.insert_worker(w).await.expect("Failed to insert worker");
    }
    store
}

fn supervisor(store: Arc<InMemoryStore>, settings: SupervisorSettings) -> ProcessSupervisor {
    ProcessSupervisor::builder(settings)
        .store(store)
        .reclaimer(Arc::new(NoopReclaimer))
        .public_url("http://127.0.0.1:4000")
        .build()
        .expect("Failed to build supervisor")
}

fn read_json(path: PathBuf) -> Value {
    let text = std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("Failed to read {}: {e}", path.display()));
    serde_json::from_str(&text).expect("Invalid JSON")
}

async fn stored(store: &InMemoryStore, id: &str) -> WorkerDescriptor {
    store.get_worker(id).await.unwrap().expect("worker missing")
}

/// Poll until the stored status leaves `running`
async fn wait_for_stop(store: &InMemoryStore, id: &str) -> WorkerDescriptor {
    for _ in 0..100 {
        let w = stored(store, id).await;
        if w.status == WorkerStatus::Stopped {
            return w;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("worker {id} never stopped");
}

/// Drops a listener held on the contested port when asked to reclaim
struct FakeReclaimer {
    held: Mutex<Option<TcpListener>>,
    calls: AtomicUsize,
}

#[async_trait]
impl PortReclaimer for FakeReclaimer {
    async fn reclaim(&self, _port: u16) -> corral_supervisor::Result<usize> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let released = self.held.lock().unwrap().take().is_some();
        Ok(usize::from(released))
    }
}

#[tokio::test]
async fn test_start_configures_worker_and_stop_releases_port() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let port = free_port();

    let mut alpha = worker("alpha", Some(port));
    alpha.tool_server_ids = vec!["weather".into()];
    alpha.skill_ids = vec!["sk1".into()];
    let store = store_with(vec![alpha]).await;
    store
        .insert_server(ToolServer {
            id: "weather".into(),
            name: "Weather".into(),
            description: None,
            env: Default::default(),
            port: None,
        })
        .await
        .unwrap();
    store
        .insert_skill(SkillDefinition {
            id: "sk1".into(),
            name: "summarize".into(),
            description: "Summaries".into(),
            content: "# Summarize".into(),
        })
        .await
        .unwrap();
    store.set_provider_key("openai", "sk-test").await.unwrap();

    let sup = supervisor(store.clone(), settings(dir.path(), ECHO_WORKER.into()));
    assert_eq!(sup.start("alpha").await.unwrap(), port);
    assert!(sup.is_running("alpha"));
    assert_eq!(sup.running_port("alpha"), Some(port));
    assert_eq!(sup.running_workers(), vec![("alpha".to_string(), port)]);

    let w = stored(&store, "alpha").await;
    assert_eq!(w.status, WorkerStatus::Running);
    assert!(w.auth_token.is_some(), "credential should be generated and stored");

    let workdir = dir.path().join("workers").join("alpha");
    let startup = read_json(workdir.join("worker.json"));
    assert_eq!(startup["id"], "alpha");
    assert_eq!(startup["port"], port);
    assert_eq!(startup["token_set"], true);
    assert!(
        startup["provider_keys"]
            .as_array()
            .unwrap()
            .iter()
            .any(|k| k == "OPENAI_API_KEY")
    );
    let data_dir = PathBuf::from(startup["data_dir"].as_str().unwrap());
    assert_eq!(data_dir, std::fs::canonicalize(&workdir).unwrap());

    let config = read_json(workdir.join("config.json"));
    assert_eq!(config["agent_id"], "alpha");
    assert_eq!(config["mcp_servers"][0]["url"], "http://127.0.0.1:4000/mcp/weather");
    assert_eq!(config["skills"][0], "sk1");
    assert_eq!(read_json(workdir.join("skills/summarize.json"))["content"], "# Summarize");
    assert_eq!(read_json(workdir.join("skills_status.json"))["enabled"], true);

    sup.stop("alpha", StopReason::Manual).await.unwrap();
    assert!(!sup.is_running("alpha"));
    assert!(is_port_free(port));

    let w = stored(&store, "alpha").await;
    assert_eq!(w.status, WorkerStatus::Stopped);
    assert_eq!(w.stop_reason, Some(StopReason::Manual));
}

#[tokio::test]
async fn test_port_and_credential_survive_restart() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let port = free_port();
    let store = store_with(vec![worker("alpha", Some(port))]).await;
    let sup = supervisor(store.clone(), settings(dir.path(), ECHO_WORKER.into()));

    assert_eq!(sup.start("alpha").await.unwrap(), port);
    let first = stored(&store, "alpha").await.auth_token;

    assert_eq!(sup.restart("alpha").await.unwrap(), port);
    assert_eq!(stored(&store, "alpha").await.auth_token, first);
    assert_eq!(stored(&store, "alpha").await.status, WorkerStatus::Running);

    sup.stop("alpha", StopReason::Manual).await.unwrap();
    assert_eq!(stored(&store, "alpha").await.port, Some(port));
    assert_eq!(sup.start("alpha").await.unwrap(), port);
    assert_eq!(sup.running_port("alpha"), Some(port));
    assert_eq!(stored(&store, "alpha").await.auth_token, first);

    sup.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_presents_worker_credential() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let port = free_port();
    let store = store_with(vec![worker("alpha", Some(port))]).await;
    let sup = supervisor(store, settings(dir.path(), ECHO_WORKER.into()));

    sup.start("alpha").await.unwrap();
    let marker = dir.path().join("workers").join("alpha").join("shutdown.json");
    assert!(!marker.exists());

    sup.shutdown().await;
    assert!(marker.exists(), "worker never saw an authorized /shutdown");
}

/// Worker store that can forget a worker, as if it was deleted mid-stop
struct ForgetfulStore {
    inner: Arc<InMemoryStore>,
    forgotten: AtomicBool,
}

#[async_trait]
impl WorkerStore for ForgetfulStore {
    async fn get_worker(&self, id: &str) -> corral_core::Result<Option<WorkerDescriptor>> {
        if self.forgotten.load(Ordering::SeqCst) {
            return Ok(None);
        }
        self.inner.get_worker(id).await
    }

    async fn list_workers(&self) -> corral_core::Result<Vec<WorkerDescriptor>> {
        self.inner.list_workers().await
    }

    async fn set_status(
        &self,
        id: &str,
        status: WorkerStatus,
        reason: Option<StopReason>,
    ) -> corral_core::Result<()> {
        if self.forgotten.load(Ordering::SeqCst) {
            return Err(CorralError::WorkerNotFound(id.to_string()));
        }
        self.inner.set_status(id, status, reason).await
    }

    async fn set_auth_token(&self, id: &str, encrypted: &str) -> corral_core::Result<()> {
        self.inner.set_auth_token(id, encrypted).await
    }
}

#[tokio::test]
async fn test_stop_kills_process_of_deleted_worker() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let port = free_port();
    let inner = store_with(vec![worker("alpha", Some(port))]).await;
    let workers = Arc::new(ForgetfulStore {
        inner: inner.clone(),
        forgotten: AtomicBool::new(false),
    });
    let sup = ProcessSupervisor::builder(settings(dir.path(), ECHO_WORKER.into()))
        .store(inner)
        .worker_store(workers.clone())
        .reclaimer(Arc::new(NoopReclaimer))
        .build()
        .unwrap();

    sup.start("alpha").await.unwrap();
    workers.forgotten.store(true, Ordering::SeqCst);

    sup.stop("alpha", StopReason::Manual).await.unwrap();
    assert!(!sup.is_running("alpha"));
    assert!(is_port_free(port));
}

#[tokio::test]
async fn test_concurrent_starts_spawn_once() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let port = free_port();
    let store = store_with(vec![worker("alpha", Some(port))]).await;
    let sup = supervisor(store, settings(dir.path(), ECHO_WORKER.into()));

    let (a, b) = tokio::join!(sup.start("alpha"), sup.start("alpha"));
    let oks = [&a, &b].iter().filter(|r| r.is_ok()).count();
    assert_eq!(oks, 1, "a = {a:?}, b = {b:?}");

    let err = if a.is_err() { a } else { b }.unwrap_err();
    assert!(matches!(
        err,
        SupervisorError::AlreadyStarting(_) | SupervisorError::AlreadyRunning(_)
    ));

    assert!(matches!(
        sup.start("alpha").await,
        Err(SupervisorError::AlreadyRunning(_))
    ));
    sup.shutdown().await;
}

#[tokio::test]
async fn test_missing_port_fails_without_spawning() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let store = store_with(vec![worker("alpha", None)]).await;
    let sup = supervisor(store, settings(dir.path(), ECHO_WORKER.into()));

    assert!(matches!(
        sup.start("alpha").await,
        Err(SupervisorError::NoPortAssigned(_))
    ));
    assert!(!sup.is_running("alpha"));
    assert!(!dir.path().join("workers").join("alpha").exists());
}

#[tokio::test]
async fn test_stale_listener_is_reclaimed() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let held = TcpListener::bind("127.0.0.1:0").expect("Failed to bind");
    let port = held.local_addr().unwrap().port();

    let store = store_with(vec![worker("alpha", Some(port))]).await;
    let reclaimer = Arc::new(FakeReclaimer {
        held: Mutex::new(Some(held)),
        calls: AtomicUsize::new(0),
    });
    let sup = ProcessSupervisor::builder(settings(dir.path(), ECHO_WORKER.into()))
        .store(store.clone())
        .reclaimer(reclaimer.clone())
        .build()
        .unwrap();

    assert_eq!(sup.start("alpha").await.unwrap(), port);
    assert_eq!(reclaimer.calls.load(Ordering::SeqCst), 1);
    assert_eq!(stored(&store, "alpha").await.status, WorkerStatus::Running);
    sup.shutdown().await;
}

#[tokio::test]
async fn test_port_that_cannot_be_freed_is_reported() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let held = TcpListener::bind("127.0.0.1:0").expect("Failed to bind");
    let port = held.local_addr().unwrap().port();

    let store = store_with(vec![worker("alpha", Some(port))]).await;
    let sup = supervisor(store, settings(dir.path(), ECHO_WORKER.into()));

    assert!(matches!(
        sup.start("alpha").await,
        Err(SupervisorError::PortInUse(p)) if p == port
    ));
    assert!(!sup.is_running("alpha"));
    drop(held);
}

#[tokio::test]
async fn test_previous_worker_on_port_is_asked_to_shut_down() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let port = free_port();
    let store = store_with(vec![worker("alpha", Some(port))]).await;

    // A worker left over from an earlier supervisor run.
    let first = supervisor(store.clone(), settings(dir.path(), ECHO_WORKER.into()));
    first.start("alpha").await.unwrap();

    let mut patient = settings(dir.path(), ECHO_WORKER.into());
    patient.port_recheck_delay = Duration::from_millis(500);
    patient.reclaim_settle_delay = Duration::from_millis(500);
    let second = supervisor(store.clone(), patient);
    assert_eq!(second.start("alpha").await.unwrap(), port);
    assert!(second.is_running("alpha"));

    second.shutdown().await;
    first.shutdown().await;
}

#[tokio::test]
async fn test_unhealthy_worker_is_killed() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let port = free_port();
    let binary = wrapper(dir.path(), "unhealthy.sh", "--unhealthy");
    let store = store_with(vec![worker("alpha", Some(port))]).await;

    let mut settings = settings(dir.path(), binary);
    settings.health_attempts = 5;
    let sup = supervisor(store.clone(), settings);

    match sup.start("alpha").await {
        Err(SupervisorError::HealthCheckTimeout { port: p, attempts }) => {
            assert_eq!(p, port);
            assert_eq!(attempts, 5);
        }
        other => panic!("expected HealthCheckTimeout, got {other:?}"),
    }
    assert!(!sup.is_running("alpha"));

    let w = stored(&store, "alpha").await;
    assert_eq!(w.status, WorkerStatus::Stopped);
    assert_eq!(w.stop_reason, Some(StopReason::HealthCheckFailed));

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(is_port_free(port));
}

#[tokio::test]
async fn test_immediate_exit_is_reported_as_crash_not_timeout() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let port = free_port();
    let binary = dir.path().join("die.sh");
    std::fs::write(&binary, "#!/bin/sh\nexit 3\n").expect("Failed to write script");
    std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o755))
        .expect("Failed to chmod script");
    let store = store_with(vec![worker("alpha", Some(port))]).await;
    let sup = supervisor(store.clone(), settings(dir.path(), binary));

    let started = std::time::Instant::now();
    let err = sup.start("alpha").await.unwrap_err();

    assert!(matches!(err, SupervisorError::Spawn(_)), "{err:?}");
    assert!(started.elapsed() < Duration::from_secs(4), "waited out every health attempt");
    assert!(!sup.is_running("alpha"));

    let w = stored(&store, "alpha").await;
    assert_eq!(w.status, WorkerStatus::Stopped);
    assert_eq!(w.stop_reason, Some(StopReason::Crashed));
}

#[tokio::test]
async fn test_exit_right_after_startup_is_recorded() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let port = free_port();
    let binary = wrapper(dir.path(), "blink.sh", "--exit-after 150 --exit-code 0");
    let store = store_with(vec![worker("alpha", Some(port))]).await;
    let sup = supervisor(store.clone(), settings(dir.path(), binary));

    // Depending on timing start succeeds or reports the exit itself.
    let _ = sup.start("alpha").await;
    let w = wait_for_stop(&store, "alpha").await;

    assert_eq!(w.stop_reason, Some(StopReason::Exited));
    assert!(!sup.is_running("alpha"));
}

#[tokio::test]
async fn test_clean_exit_is_recorded_as_exited() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let port = free_port();
    let binary = wrapper(dir.path(), "exit0.sh", "--exit-after 1500 --exit-code 0");
    let store = store_with(vec![worker("alpha", Some(port))]).await;
    let sup = supervisor(store.clone(), settings(dir.path(), binary));

    sup.start("alpha").await.unwrap();
    let w = wait_for_stop(&store, "alpha").await;

    assert_eq!(w.stop_reason, Some(StopReason::Exited));
    assert!(!sup.is_running("alpha"));
}

#[tokio::test]
async fn test_crash_is_recorded_as_crashed() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let port = free_port();
    let binary = wrapper(dir.path(), "exit3.sh", "--exit-after 1500 --exit-code 3");
    let store = store_with(vec![worker("alpha", Some(port))]).await;
    let sup = supervisor(store.clone(), settings(dir.path(), binary));

    sup.start("alpha").await.unwrap();
    let w = wait_for_stop(&store, "alpha").await;

    assert_eq!(w.stop_reason, Some(StopReason::Crashed));
    assert!(!sup.is_running("alpha"));
}

#[tokio::test]
async fn test_shutdown_keeps_status_for_restore() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let port = free_port();
    let store = store_with(vec![worker("alpha", Some(port)), worker("beta", None)]).await;

    let sup = supervisor(store.clone(), settings(dir.path(), ECHO_WORKER.into()));
    sup.start("alpha").await.unwrap();
    sup.shutdown().await;

    assert!(!sup.is_running("alpha"));
    assert_eq!(stored(&store, "alpha").await.status, WorkerStatus::Running);

    // beta claims to be running but cannot start.
    store
        .set_status("beta", WorkerStatus::Running, None)
        .await
        .unwrap();

    let rebooted = supervisor(store.clone(), settings(dir.path(), ECHO_WORKER.into()));
    let outcomes = rebooted.restore().await.unwrap();
    assert_eq!(outcomes.len(), 2);

    let alpha = outcomes.iter().find(|o| o.worker_id == "alpha").unwrap();
    assert_eq!(*alpha.result.as_ref().unwrap(), port);
    assert!(rebooted.is_running("alpha"));

    let beta = outcomes.iter().find(|o| o.worker_id == "beta").unwrap();
    assert!(matches!(beta.result, Err(SupervisorError::NoPortAssigned(_))));
    let w = stored(&store, "beta").await;
    assert_eq!(w.status, WorkerStatus::Stopped);
    assert_eq!(w.stop_reason, Some(StopReason::RestoreFailed));

    rebooted.shutdown().await;
}

#[tokio::test]
async fn test_clean_start_wipes_worker_directory() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let port = free_port();
    let store = store_with(vec![worker("alpha", Some(port))]).await;

    let workdir = dir.path().join("workers").join("alpha");
    std::fs::create_dir_all(&workdir).unwrap();
    std::fs::write(workdir.join("stale.txt"), "old").unwrap();

    let mut settings = settings(dir.path(), ECHO_WORKER.into());
    settings.clean_start = true;
    let sup = supervisor(store, settings);
    sup.start("alpha").await.unwrap();

    assert!(!workdir.join("stale.txt").exists());
    assert!(workdir.join("worker.json").exists());
    sup.shutdown().await;
}
