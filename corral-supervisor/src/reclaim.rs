//! Freeing ports held by stray processes
//!
//! A worker port can stay bound after the supervisor loses track of its
//! owner: a previous supervisor crashed, or an unrelated process grabbed it.
//! The supervisor asks a [`PortReclaimer`] to kill whatever listens there.
//! Reclaiming is best-effort and platform dependent, so it sits behind a
//! trait.

use crate::Result;
use async_trait::async_trait;

/// Kills the processes listening on a port
#[async_trait]
pub trait PortReclaimer: Send + Sync {
    /// Returns how many processes were signalled
    async fn reclaim(&self, port: u16) -> Result<usize>;
}

/// `true` if nothing is bound to `127.0.0.1:port`
pub fn is_port_free(port: u16) -> bool {
    std::net::TcpListener::bind(("127.0.0.1", port)).is_ok()
}

/// Does nothing; used where no reclaim strategy exists
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopReclaimer;

#[async_trait]
impl PortReclaimer for NoopReclaimer {
    async fn reclaim(&self, _port: u16) -> Result<usize> {
        Ok(0)
    }
}

/// Finds listeners with `lsof` and sends them `SIGKILL`.
///
/// Never targets PID 0, PID 1 or the supervisor itself.
#[cfg(unix)]
#[derive(Debug, Clone, Copy, Default)]
pub struct LsofReclaimer;

#[cfg(unix)]
const PROTECTED_PIDS: [i32; 2] = [0, 1];

#[cfg(unix)]
fn parse_pids(output: &str) -> Vec<i32> {
    let own = std::process::id() as i32;
    let mut pids: Vec<i32> = output
        .lines()
        .filter_map(|line| line.trim().parse::<i32>().ok())
        .filter(|pid| *pid > 0 && !PROTECTED_PIDS.contains(pid) && *pid != own)
        .collect();
    pids.sort_unstable();
    pids.dedup();
    pids
}

#[cfg(unix)]
#[async_trait]
impl PortReclaimer for LsofReclaimer {
    async fn reclaim(&self, port: u16) -> Result<usize> {
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid;
        use tracing::{debug, info, warn};

        let output = tokio::process::Command::new("lsof")
            .arg("-t")
            .arg("-i")
            .arg(format!("tcp:{port}"))
            .arg("-sTCP:LISTEN")
            .output()
            .await
            .map_err(|e| anyhow::anyhow!("failed to run lsof: {e}"))?;

        // lsof exits 1 when nothing matches.
        let pids = parse_pids(&String::from_utf8_lossy(&output.stdout));
        if pids.is_empty() {
            debug!(port, "no listening process found");
            return Ok(0);
        }

        let mut killed = 0;
        for pid in pids {
            match signal::kill(Pid::from_raw(pid), Signal::SIGKILL) {
                Ok(()) => {
                    info!(port, pid, "killed process holding port");
                    killed += 1;
                }
                Err(nix::errno::Errno::ESRCH) => {
                    debug!(port, pid, "process already gone");
                }
                Err(e) => {
                    warn!(port, pid, error = %e, "failed to kill process holding port");
                }
            }
        }
        Ok(killed)
    }
}

/// Platform default reclaimer
pub fn default_reclaimer() -> std::sync::Arc<dyn PortReclaimer> {
    #[cfg(unix)]
    {
        std::sync::Arc::new(LsofReclaimer)
    }
    #[cfg(not(unix))]
    {
        std::sync::Arc::new(NoopReclaimer)
    }
}
