//! Store and cipher seams
//!
//! Persistent CRUD storage and secret encryption live outside corral. The
//! supervisor and the gateway only see the narrow traits below.
//! [`InMemoryStore`] implements all of them over a YAML fleet manifest and is
//! what the CLI and the tests run against.

use crate::error::{CorralError, Result};
use crate::model::{
    SkillDefinition, StopReason, ToolDefinition, ToolServer, WorkerDescriptor, WorkerStatus,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::debug;

/// Read/write access to worker descriptors
#[async_trait]
pub trait WorkerStore: Send + Sync {
    async fn get_worker(&self, id: &str) -> Result<Option<WorkerDescriptor>>;

    async fn list_workers(&self) -> Result<Vec<WorkerDescriptor>>;

    /// Record a status transition; `reason` is only meaningful for `Stopped`
    async fn set_status(
        &self,
        id: &str,
        status: WorkerStatus,
        reason: Option<StopReason>,
    ) -> Result<()>;

    /// Store the (already encrypted) worker credential
    async fn set_auth_token(&self, id: &str, encrypted: &str) -> Result<()>;
}

/// Read-only access to tool servers and their tools
#[async_trait]
pub trait ToolStore: Send + Sync {
    async fn get_server(&self, id: &str) -> Result<Option<ToolServer>>;

    async fn list_tools(&self, server_id: &str) -> Result<Vec<ToolDefinition>>;

    async fn find_tool(&self, server_id: &str, name: &str) -> Result<Option<ToolDefinition>>;
}

#[async_trait]
pub trait SkillStore: Send + Sync {
    async fn get_skill(&self, id: &str) -> Result<Option<SkillDefinition>>;
}

/// Encrypted upstream provider credentials, keyed by provider name
#[async_trait]
pub trait ProviderKeyStore: Send + Sync {
    async fn provider_key(&self, provider: &str) -> Result<Option<String>>;
}

/// Resource classes that draw ports from separate ranges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortClass {
    Agent,
    McpServer,
}

impl PortClass {
    /// The class whose range bounds this one
    pub fn other(self) -> Self {
        match self {
            PortClass::Agent => PortClass::McpServer,
            PortClass::McpServer => PortClass::Agent,
        }
    }
}

/// Durable record of which resource owns which port
#[async_trait]
pub trait PortLedger: Send + Sync {
    async fn port_of(&self, class: PortClass, id: &str) -> Result<Option<u16>>;

    async fn assigned_ports(&self, class: PortClass) -> Result<Vec<u16>>;

    async fn record_port(&self, class: PortClass, id: &str, port: u16) -> Result<()>;
}

/// Opaque secret encryption
pub trait SecretCipher: Send + Sync {
    fn encrypt(&self, plaintext: &str) -> Result<String>;

    fn decrypt(&self, ciphertext: &str) -> Result<String>;
}

/// Identity cipher for development setups where secrets are stored in clear
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaintextCipher;

impl SecretCipher for PlaintextCipher {
    fn encrypt(&self, plaintext: &str) -> Result<String> {
        Ok(plaintext.to_string())
    }

    fn decrypt(&self, ciphertext: &str) -> Result<String> {
        Ok(ciphertext.to_string())
    }
}

/// On-disk fleet manifest
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FleetManifest {
    #[serde(default)]
    pub workers: Vec<WorkerDescriptor>,
    #[serde(default)]
    pub servers: Vec<ToolServer>,
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
    #[serde(default)]
    pub skills: Vec<SkillDefinition>,
    /// Provider name -> encrypted API key
    #[serde(default)]
    pub provider_keys: BTreeMap<String, String>,
}

impl FleetManifest {
    pub fn from_yaml(text: &str) -> Result<Self> {
        let manifest: FleetManifest = serde_yaml::from_str(text)?;
        manifest.validate()?;
        Ok(manifest)
    }

    fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for tool in &self.tools {
            if !seen.insert((tool.server_id.as_str(), tool.name.as_str())) {
                return Err(CorralError::Configuration(format!(
                    "duplicate tool '{}' on server '{}'",
                    tool.name, tool.server_id
                )));
            }
        }
        Ok(())
    }
}

/// In-memory implementation of every store trait.
///
/// When built with [`InMemoryStore::open`], each mutation is written back to
/// the manifest file so port assignments and statuses survive restarts.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    manifest: RwLock<FleetManifest>,
    path: Option<PathBuf>,
}

impl InMemoryStore {
    pub fn new(manifest: FleetManifest) -> Self {
        Self {
            manifest: RwLock::new(manifest),
            path: None,
        }
    }

    /// Load a manifest file and persist later mutations back to it
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let manifest = match tokio::fs::read_to_string(&path).await {
            Ok(text) => FleetManifest::from_yaml(&text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => FleetManifest::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            manifest: RwLock::new(manifest),
            path: Some(path),
        })
    }

    /// Snapshot of the current manifest
    pub async fn snapshot(&self) -> FleetManifest {
        self.manifest.read().await.clone()
    }

    pub async fn insert_worker(&self, worker: WorkerDescriptor) -> Result<()> {
        let mut manifest = self.manifest.write().await;
        manifest.workers.retain(|w| w.id != worker.id);
        manifest.workers.push(worker);
        self.persist(&manifest).await
    }

    pub async fn insert_server(&self, server: ToolServer) -> Result<()> {
        let mut manifest = self.manifest.write().await;
        manifest.servers.retain(|s| s.id != server.id);
        manifest.servers.push(server);
        self.persist(&manifest).await
    }

    pub async fn insert_tool(&self, tool: ToolDefinition) -> Result<()> {
        let mut manifest = self.manifest.write().await;
        manifest
            .tools
            .retain(|t| !(t.server_id == tool.server_id && t.name == tool.name));
        manifest.tools.push(tool);
        self.persist(&manifest).await
    }

    pub async fn insert_skill(&self, skill: SkillDefinition) -> Result<()> {
        let mut manifest = self.manifest.write().await;
        manifest.skills.retain(|s| s.id != skill.id);
        manifest.skills.push(skill);
        self.persist(&manifest).await
    }

    pub async fn set_provider_key(&self, provider: &str, encrypted: &str) -> Result<()> {
        let mut manifest = self.manifest.write().await;
        manifest
            .provider_keys
            .insert(provider.to_string(), encrypted.to_string());
        self.persist(&manifest).await
    }

    async fn persist(&self, manifest: &FleetManifest) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let yaml = serde_yaml::to_string(manifest)?;
        tokio::fs::write(path, yaml).await?;
        debug!(path = %path.display(), "manifest persisted");
        Ok(())
    }
}

#[async_trait]
impl WorkerStore for InMemoryStore {
    async fn get_worker(&self, id: &str) -> Result<Option<WorkerDescriptor>> {
        let manifest = self.manifest.read().await;
        Ok(manifest.workers.iter().find(|w| w.id == id).cloned())
    }

    async fn list_workers(&self) -> Result<Vec<WorkerDescriptor>> {
        Ok(self.manifest.read().await.workers.clone())
    }

    async fn set_status(
        &self,
        id: &str,
        status: WorkerStatus,
        reason: Option<StopReason>,
    ) -> Result<()> {
        let mut manifest = self.manifest.write().await;
        let worker = manifest
            .workers
            .iter_mut()
            .find(|w| w.id == id)
            .ok_or_else(|| CorralError::WorkerNotFound(id.to_string()))?;
        worker.status = status;
        worker.stop_reason = match status {
            WorkerStatus::Running => None,
            WorkerStatus::Stopped => reason,
        };
        self.persist(&manifest).await
    }

    async fn set_auth_token(&self, id: &str, encrypted: &str) -> Result<()> {
        let mut manifest = self.manifest.write().await;
        let worker = manifest
            .workers
            .iter_mut()
            .find(|w| w.id == id)
            .ok_or_else(|| CorralError::WorkerNotFound(id.to_string()))?;
        worker.auth_token = Some(encrypted.to_string());
        self.persist(&manifest).await
    }
}

#[async_trait]
impl ToolStore for InMemoryStore {
    async fn get_server(&self, id: &str) -> Result<Option<ToolServer>> {
        let manifest = self.manifest.read().await;
        Ok(manifest.servers.iter().find(|s| s.id == id).cloned())
    }

    async fn list_tools(&self, server_id: &str) -> Result<Vec<ToolDefinition>> {
        let manifest = self.manifest.read().await;
        Ok(manifest
            .tools
            .iter()
            .filter(|t| t.server_id == server_id)
            .cloned()
            .collect())
    }

    async fn find_tool(&self, server_id: &str, name: &str) -> Result<Option<ToolDefinition>> {
        let manifest = self.manifest.read().await;
        Ok(manifest
            .tools
            .iter()
            .find(|t| t.server_id == server_id && t.name == name)
            .cloned())
    }
}

#[async_trait]
impl SkillStore for InMemoryStore {
    async fn get_skill(&self, id: &str) -> Result<Option<SkillDefinition>> {
        let manifest = self.manifest.read().await;
        Ok(manifest.skills.iter().find(|s| s.id == id).cloned())
    }
}

#[async_trait]
impl ProviderKeyStore for InMemoryStore {
    async fn provider_key(&self, provider: &str) -> Result<Option<String>> {
        Ok(self.manifest.read().await.provider_keys.get(provider).cloned())
    }
}

#[async_trait]
impl PortLedger for InMemoryStore {
    async fn port_of(&self, class: PortClass, id: &str) -> Result<Option<u16>> {
        let manifest = self.manifest.read().await;
        Ok(match class {
            PortClass::Agent => manifest.workers.iter().find(|w| w.id == id).and_then(|w| w.port),
            PortClass::McpServer => manifest
                .servers
                .iter()
                .find(|s| s.id == id)
                .and_then(|s| s.port),
        })
    }

    async fn assigned_ports(&self, class: PortClass) -> Result<Vec<u16>> {
        let manifest = self.manifest.read().await;
        Ok(match class {
            PortClass::Agent => manifest.workers.iter().filter_map(|w| w.port).collect(),
            PortClass::McpServer => manifest.servers.iter().filter_map(|s| s.port).collect(),
        })
    }

    async fn record_port(&self, class: PortClass, id: &str, port: u16) -> Result<()> {
        let mut manifest = self.manifest.write().await;
        let slot = match class {
            PortClass::Agent => manifest
                .workers
                .iter_mut()
                .find(|w| w.id == id)
                .map(|w| &mut w.port)
                .ok_or_else(|| CorralError::WorkerNotFound(id.to_string()))?,
            PortClass::McpServer => manifest
                .servers
                .iter_mut()
                .find(|s| s.id == id)
                .map(|s| &mut s.port)
                .ok_or_else(|| CorralError::ServerNotFound(id.to_string()))?,
        };
        if let Some(existing) = *slot {
            if existing != port {
                return Err(CorralError::Store(format!(
                    "{} already owns port {}, refusing to reassign to {}",
                    id, existing, port
                )));
            }
        }
        *slot = Some(port);
        self.persist(&manifest).await
    }
}
