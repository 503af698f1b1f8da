//! # Corral - control plane for a fleet of agent workers
//!
//! This crate holds everything the supervisor and the CLI share:
//!
//! - the fleet data model (workers, tool servers, tools, skills)
//! - the store and cipher seams the control plane is written against
//! - layered configuration
//! - the restricted template engine
//! - the JSON-RPC tool execution gateway and its handler strategies
//!
//! Process supervision lives in `corral-supervisor`.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use corral_core::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = CorralConfig::load()?;
//!     let store = Arc::new(InMemoryStore::open("fleet.yaml").await?);
//!
//!     let gateway = ToolGateway::builder(store)
//!         .gateway_settings(config.gateway.clone())
//!         .script_settings(config.script.clone())
//!         .build();
//!
//!     let (_tx, rx) = tokio::sync::watch::channel(false);
//!     corral_core::gateway::http::serve(&config.gateway.listen, gateway, rx).await
//! }
//! ```

pub mod config;
pub mod error;
pub mod gateway;
pub mod model;
pub mod store;
pub mod template;

pub use error::{CorralError, Result};

/// Current library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{
        CorralConfig, GatewaySettings, LogFormat, LogSettings, ScriptSettings, SupervisorSettings,
    };
    pub use crate::error::{CorralError, Result};
    pub use crate::gateway::{
        HandlerError, JsonRpcRequest, JsonRpcResponse, ToolCallResult, ToolGateway, ToolHandler,
    };
    pub use crate::model::{
        CredentialSet, HttpTemplate, SkillDefinition, StopReason, ToolDefinition,
        ToolHandlerSpec, ToolServer, WorkerDescriptor, WorkerStatus,
    };
    pub use crate::store::{
        FleetManifest, InMemoryStore, PlaintextCipher, PortClass, PortLedger, ProviderKeyStore,
        SecretCipher, SkillStore, ToolStore, WorkerStore,
    };
    pub use crate::template::{TemplateEngine, TemplateError};
}
