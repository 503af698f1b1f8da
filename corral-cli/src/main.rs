//! Corral CLI - runs the control plane and its developer tools

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use corral_core::config::{CorralConfig, LogFormat, LogSettings};
use corral_core::gateway::{ToolGateway, http};
use corral_core::store::{FleetManifest, InMemoryStore, PortClass, WorkerStore};
use corral_core::template::TemplateEngine;
use corral_supervisor::{PortAllocator, ProcessSupervisor};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "corral")]
#[command(about = "Agent worker supervisor and tool execution gateway", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Restore workers and serve the tool gateway until Ctrl-C
    Serve {
        /// Configuration file (replaces corral.toml and CORRAL_* lookup)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Fleet manifest (YAML); overrides `manifest` from the config
        #[arg(short, long, env = "CORRAL_MANIFEST")]
        manifest: Option<PathBuf>,
    },
    /// Render a template against arguments and print the result
    Render {
        /// Template as inline JSON, or a file containing it
        #[arg(short, long)]
        template: String,

        /// Arguments object as JSON
        #[arg(short, long, default_value = "{}")]
        args: String,

        /// Fail on unrecognized expressions
        #[arg(long)]
        strict: bool,
    },
    /// Print the effective configuration as JSON
    Config {
        /// Configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Version information
    Version,
}

fn init_tracing(settings: &LogSettings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.filter));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match settings.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

fn load_config(path: Option<&Path>) -> Result<CorralConfig> {
    let config = match path {
        Some(path) => CorralConfig::from_file(path),
        None => CorralConfig::load(),
    };
    config.context("failed to load configuration")
}

async fn open_store(manifest: Option<&Path>) -> Result<Arc<InMemoryStore>> {
    let store = match manifest {
        Some(path) => InMemoryStore::open(path)
            .await
            .with_context(|| format!("failed to open manifest {}", path.display()))?,
        None => {
            warn!("no fleet manifest configured, starting with an empty fleet");
            InMemoryStore::new(FleetManifest::default())
        }
    };
    Ok(Arc::new(store))
}

/// Give every worker without a port its permanent one
async fn assign_ports(store: &Arc<InMemoryStore>, config: &CorralConfig) -> Result<()> {
    let allocator = PortAllocator::new(
        store.clone(),
        config.supervisor.agent_port_base,
        config.supervisor.mcp_port_base,
    );
    for worker in store.list_workers().await? {
        if worker.port.is_none() {
            allocator.assign(PortClass::Agent, &worker.id).await?;
        }
    }
    Ok(())
}

async fn serve(config: CorralConfig, manifest: Option<PathBuf>) -> Result<()> {
    let manifest = manifest.or_else(|| config.manifest.clone());
    let store = open_store(manifest.as_deref()).await?;
    assign_ports(&store, &config).await?;

    let gateway = ToolGateway::builder(store.clone())
        .gateway_settings(config.gateway.clone())
        .script_settings(config.script.clone())
        .build();

    let supervisor = ProcessSupervisor::builder(config.supervisor.clone())
        .store(store.clone())
        .public_url(config.gateway.public_url.clone())
        .build()?;

    for outcome in supervisor.restore().await? {
        match outcome.result {
            Ok(port) => info!(worker_id = %outcome.worker_id, port, "worker restored"),
            Err(e) => warn!(worker_id = %outcome.worker_id, error = %e, "worker not restored"),
        }
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let listen = config.gateway.listen.clone();
    let mut server = tokio::spawn(async move { http::serve(&listen, gateway, shutdown_rx).await });

    let served = tokio::select! {
        result = &mut server => Some(result),
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, shutting down");
            None
        }
    };

    let served = match served {
        Some(result) => result,
        None => {
            let _ = shutdown_tx.send(true);
            server.await
        }
    };

    supervisor.shutdown().await;
    served.context("gateway task failed")??;
    Ok(())
}

/// Inline JSON, a file holding JSON, or a bare string template
fn read_template(input: &str) -> Result<Value> {
    let text = if Path::new(input).is_file() {
        std::fs::read_to_string(input).with_context(|| format!("failed to read {input}"))?
    } else {
        input.to_string()
    };
    Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
}

fn render(template: &str, args: &str, strict: bool) -> Result<Value> {
    let template = read_template(template)?;
    let args: Value = serde_json::from_str(args).context("--args must be a JSON object")?;
    let engine = if strict {
        TemplateEngine::strict()
    } else {
        TemplateEngine::lenient()
    };
    Ok(engine.render(&template, &args)?)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, manifest } => {
            let config = load_config(config.as_deref())?;
            init_tracing(&config.log);
            serve(config, manifest).await?;
        }
        Commands::Render {
            template,
            args,
            strict,
        } => {
            init_tracing(&LogSettings::default());
            let rendered = render(&template, &args, strict)?;
            println!("{}", serde_json::to_string_pretty(&rendered)?);
        }
        Commands::Config { config } => {
            let config = load_config(config.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Commands::Version => {
            println!("corral {}", env!("CARGO_PKG_VERSION"));
            println!("corral-core {}", corral_core::VERSION);
        }
    }

    Ok(())
}
