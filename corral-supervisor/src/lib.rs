//! Corral Supervisor - runs agent workers as local OS processes
//!
//! Each worker gets a permanent port, a private data directory and a bearer
//! credential. The supervisor spawns it, waits for its `/health` endpoint,
//! pushes its configuration and skills, and records unexpected exits in the
//! store.
//!
//! ## Example
//!
//! ```rust,no_run
//! use corral_core::config::SupervisorSettings;
//! use corral_core::store::{FleetManifest, InMemoryStore};
//! use corral_supervisor::ProcessSupervisor;
//! use std::sync::Arc;
//!
//! # async fn example() -> corral_supervisor::Result<()> {
//! let store = Arc::new(InMemoryStore::new(FleetManifest::default()));
//! let supervisor = ProcessSupervisor::builder(SupervisorSettings::default())
//!     .store(store)
//!     .public_url("http://127.0.0.1:4000")
//!     .build()?;
//!
//! let port = supervisor.start("alpha").await?;
//! println!("alpha listening on {port}");
//! supervisor.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod error;
pub mod health;
pub mod ports;
mod process;
pub mod reclaim;
pub mod sync;

pub use error::{Result, SupervisorError};
pub use health::HealthProber;
pub use ports::PortAllocator;
pub use process::{
    ENV_DATA_DIR, ENV_WORKER_ID, ENV_WORKER_PORT, ENV_WORKER_TOKEN, ProcessSupervisor,
    ProcessSupervisorBuilder, RestoreOutcome, RunningProcess, provider_key_var,
};
pub use reclaim::{NoopReclaimer, PortReclaimer, default_reclaimer, is_port_free};
#[cfg(unix)]
pub use reclaim::LsofReclaimer;
pub use sync::{ConfigSynchronizer, SyncReport};
