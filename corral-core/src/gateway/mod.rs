//! Tool Execution Gateway
//!
//! A JSON-RPC 2.0 server that exposes dynamically defined tools, scoped per
//! tool server. Callers address a server with `POST /mcp/{server_id}` and use
//! four methods:
//!
//! - `initialize` - protocol version, capabilities and server metadata
//! - `notifications/initialized` - acknowledged with an empty result
//! - `tools/list` - enabled tools of the server
//! - `tools/call` - run one tool through its handler strategy
//!
//! # Example
//!
//! ```rust,no_run
//! use corral_core::gateway::ToolGateway;
//! use corral_core::store::{FleetManifest, InMemoryStore};
//! use std::sync::Arc;
//!
//! # async fn run() -> corral_core::Result<()> {
//! let store = Arc::new(InMemoryStore::new(FleetManifest::default()));
//! let gateway = ToolGateway::builder(store).build();
//!
//! let body = br#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#;
//! let response = gateway.handle("weather", body).await;
//! println!("{}", serde_json::to_string(&response)?);
//! # Ok(())
//! # }
//! ```

pub mod handlers;
pub mod http;
pub mod protocol;
mod server;

pub use handlers::{HandlerError, HandlerSet, ToolHandler};
pub use protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, RequestId, ToolCallResult};
pub use server::{ToolGateway, ToolGatewayBuilder};
