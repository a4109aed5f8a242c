//! Endorsement Distribution - CoSERV query resolution service
//!
//! Serves reference values and trust anchors to remote attestation verifiers.

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use clap::{Parser, Subcommand};
use endorsement_distribution::{
    api::{build_app, shutdown_signal, AppState},
    config::{ServiceConfig, StoreBackend},
    coserv::{
        Artifact, ArtifactType, ClassSelector, EnvironmentSelector, InstanceSelector, Query,
    },
    store, Resolver,
};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "endorsement-distribution")]
#[command(author = "A3S Lab Team")]
#[command(version)]
#[command(about = "CoSERV endorsement distribution service")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "ENDORSEMENT_DISTRIBUTION_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP service
    Serve {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides config)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Write artifacts into the configured store
    Provision {
        /// Lookup key to replace
        #[arg(long, requires = "file", conflicts_with = "seed")]
        key: Option<String>,

        /// Files holding one raw artifact each, stored in the given order
        #[arg(long, num_args = 1..)]
        file: Vec<PathBuf>,

        /// JSON seed file mapping keys to base64 artifacts
        #[arg(long)]
        seed: Option<PathBuf>,
    },

    /// Build a base64url CoSERV query for use in a request path
    EncodeQuery {
        /// Profile identifier
        #[arg(long)]
        profile: String,

        /// reference-values, trust-anchors or endorsed-values
        #[arg(long, default_value = "reference-values")]
        artifact_type: ArtifactType,

        /// Implementation identifier (base64), one per class selector
        #[arg(long)]
        class_id: Vec<String>,

        /// Instance UEID (base64), one per instance selector
        #[arg(long)]
        instance_id: Vec<String>,
    },

    /// Show configuration
    Config {
        /// Show default configuration
        #[arg(long)]
        default: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ServiceConfig::discover(cli.config.as_deref())?;
    init_logging(cli.verbose, cli.log_json || config.logging.json);

    match cli.command {
        Commands::Serve { host, port } => {
            run_server(config, host, port).await?;
        }
        Commands::Provision { key, file, seed } => {
            provision(&config, key, file, seed).await?;
        }
        Commands::EncodeQuery {
            profile,
            artifact_type,
            class_id,
            instance_id,
        } => {
            let encoded = encode_query(profile, artifact_type, &class_id, &instance_id)?;
            println!("{}", encoded);
        }
        Commands::Config { default } => {
            let shown = if default { ServiceConfig::default() } else { config };
            println!("{}", shown.to_toml()?);
        }
    }

    Ok(())
}

fn init_logging(verbose: bool, json: bool) {
    let log_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("endorsement_distribution={},tower_http={}", log_level, log_level).into()
    });

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn run_server(
    mut config: ServiceConfig,
    host: Option<String>,
    port: Option<u16>,
) -> Result<()> {
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    config.validate()?;

    tracing::info!("Starting endorsement distribution service");

    let store = store::open(&config.store).await?;
    let resolver =
        Resolver::new(store.clone()).with_fetch_timeout(config.resolver.fetch_timeout());
    let state = AppState::new(resolver, &config.resolver.tenant_id);
    let app = build_app(state, &config.server.cors_origins);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    tracing::info!(
        addr = %addr,
        backend = store.name(),
        tenant = %config.resolver.tenant_id,
        "Endorsement distribution service is running. Press Ctrl+C or send SIGTERM to stop."
    );

    let shutdown = shutdown_signal().context("failed to install signal handlers")?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    tracing::info!("Server exited");
    Ok(())
}

async fn provision(
    config: &ServiceConfig,
    key: Option<String>,
    files: Vec<PathBuf>,
    seed: Option<PathBuf>,
) -> Result<()> {
    if config.store.backend == StoreBackend::Memory {
        tracing::warn!("Provisioning the memory backend; artifacts are discarded on exit");
    }
    let store = store::open(&config.store).await?;

    match (key, seed) {
        (Some(key), None) => {
            let mut artifacts = Vec::with_capacity(files.len());
            for path in &files {
                let bytes = tokio::fs::read(path)
                    .await
                    .with_context(|| format!("failed to read {}", path.display()))?;
                artifacts.push(Artifact::from(bytes));
            }
            let count = artifacts.len();
            store.replace(&key, artifacts).await?;
            println!("Replaced {} artifact(s) under {}", count, key);
        }
        (None, Some(seed)) => {
            let keys = store::load_seed_file(store.as_ref(), &seed).await?;
            println!("Provisioned {} key(s) from {}", keys, seed.display());
        }
        _ => bail!("provide either --key with --file, or --seed"),
    }

    Ok(())
}

fn encode_query(
    profile: String,
    artifact_type: ArtifactType,
    class_ids: &[String],
    instance_ids: &[String],
) -> Result<String> {
    let decode = |s: &String| {
        STANDARD
            .decode(s)
            .with_context(|| format!("'{}' is not valid base64", s))
    };

    let selector = EnvironmentSelector {
        classes: class_ids
            .iter()
            .map(|id| decode(id).map(ClassSelector::from_impl_id))
            .collect::<Result<_>>()?,
        instances: instance_ids
            .iter()
            .map(|id| decode(id).map(InstanceSelector::from_ueid))
            .collect::<Result<_>>()?,
    };

    Ok(Query::new(profile, artifact_type, selector).to_base64url()?)
}
