//! Port assignment

use crate::Result;
use corral_core::store::{PortClass, PortLedger};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// Hands out monotonically increasing ports per [`PortClass`].
///
/// A port, once recorded in the ledger, belongs to its resource for good.
/// New ports are `max(assigned) + 1`, or the class base for the first one.
pub struct PortAllocator {
    ledger: Arc<dyn PortLedger>,
    agent_base: u16,
    mcp_base: u16,
    lock: Mutex<()>,
}

impl std::fmt::Debug for PortAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortAllocator")
            .field("agent_base", &self.agent_base)
            .field("mcp_base", &self.mcp_base)
            .finish()
    }
}

impl PortAllocator {
    pub fn new(ledger: Arc<dyn PortLedger>, agent_base: u16, mcp_base: u16) -> Self {
        Self {
            ledger,
            agent_base,
            mcp_base,
            lock: Mutex::new(()),
        }
    }

    fn base(&self, class: PortClass) -> u16 {
        match class {
            PortClass::Agent => self.agent_base,
            PortClass::McpServer => self.mcp_base,
        }
    }

    /// Port of `id`, assigning the next free one if it has none yet
    pub async fn assign(&self, class: PortClass, id: &str) -> Result<u16> {
        let _guard = self.lock.lock().await;

        if let Some(port) = self.ledger.port_of(class, id).await? {
            return Ok(port);
        }

        let port = match self.ledger.assigned_ports(class).await?.into_iter().max() {
            Some(max) => max.checked_add(1).ok_or_else(|| {
                anyhow::anyhow!("port range exhausted for {:?} after {}", class, max)
            })?,
            None => self.base(class),
        };

        let base = self.base(class);
        let other = self.base(class.other());
        if base < other && port >= other {
            return Err(anyhow::anyhow!(
                "port range exhausted for {:?}: {} would reach the {:?} base",
                class,
                port,
                class.other()
            )
            .into());
        }

        self.ledger.record_port(class, id, port).await?;
        info!(?class, id, port, "assigned port");
        Ok(port)
    }
}
