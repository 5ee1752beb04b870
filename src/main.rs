//! Zentinel gRPC Mock - CLI Entry Point
//!
//! Replays a single call against the mock store and prints every outbound
//! event as a JSON line.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use zentinel_grpc_mock::{CallKind, EngineConfig, MockEngine, Outbound};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Kind {
    Unary,
    ServerStreaming,
    ClientStreaming,
    Bidi,
}

impl From<Kind> for CallKind {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::Unary => CallKind::Unary,
            Kind::ServerStreaming => CallKind::ServerStreaming,
            Kind::ClientStreaming => CallKind::ClientStreaming,
            Kind::Bidi => CallKind::Bidi,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "zentinel-grpc-mock",
    about = "File-based gRPC mock engine - replay templated unary and streaming responses",
    version
)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "grpc-mock.yaml")]
    config: PathBuf,

    /// Override the mock store root
    #[arg(short, long)]
    mocks_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: Level,

    /// Print default configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,

    /// Handler to call, e.g. `pkg.Greeter.Hello` or `/pkg.Greeter/Hello`
    #[arg(long)]
    handler: Option<String>,

    /// Call shape
    #[arg(short, long, value_enum, default_value = "unary")]
    kind: Kind,

    /// Request payload for unary and server-streaming calls (JSON)
    #[arg(short, long, default_value = "{}")]
    request: String,

    /// Client message for client-streaming and bidi calls (JSON, repeatable)
    #[arg(long = "message")]
    messages: Vec<String>,
}

fn parse_json(raw: &str) -> Result<Value> {
    serde_json::from_str(raw).with_context(|| format!("invalid JSON payload: {raw}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Print default config if requested
    if args.print_config {
        print!("{}", serde_yaml::to_string(&EngineConfig::default())?);
        return Ok(());
    }

    // Load configuration
    let mut config = if args.config.exists() {
        info!(path = ?args.config, "Loading configuration");
        EngineConfig::from_file(&args.config)?
    } else if args.validate {
        anyhow::bail!("Configuration file not found: {:?}", args.config);
    } else {
        info!("Using default configuration");
        EngineConfig::default()
    };

    if let Some(mocks_dir) = args.mocks_dir {
        config.mocks_dir = mocks_dir;
    }

    // Validate and exit if requested
    if args.validate {
        config.validate()?;
        println!(
            "Configuration is valid (mocks in {})",
            config.mocks_dir.display()
        );
        return Ok(());
    }

    let handler = args
        .handler
        .context("--handler is required to replay a call")?;
    let request = parse_json(&args.request)?;
    let messages = args
        .messages
        .iter()
        .map(|m| parse_json(m))
        .collect::<Result<Vec<_>>>()?;

    let engine = Arc::new(MockEngine::new(config));
    let kind = CallKind::from(args.kind);

    let mut call = match kind {
        CallKind::Unary => engine.unary(&handler, request)?,
        CallKind::ServerStreaming => engine.server_streaming(&handler, request)?,
        CallKind::ClientStreaming => engine.client_streaming(&handler)?,
        CallKind::Bidi => engine.bidi(&handler)?,
    };

    if matches!(kind, CallKind::ClientStreaming | CallKind::Bidi) {
        for message in messages {
            call.send(message);
        }
        call.client_done();
    }

    info!(handler = %handler, kind = kind.as_str(), "Replaying call");
    let start = Instant::now();

    loop {
        let event = tokio::select! {
            event = call.next() => event,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, cancelling call");
                call.cancel();
                break;
            }
        };

        let Some(event) = event else { break };
        let elapsed_ms = start.elapsed().as_millis() as u64;
        let line = match event {
            Outbound::Write(message) => json!({"at_ms": elapsed_ms, "write": message}),
            Outbound::Reply(message) => json!({"at_ms": elapsed_ms, "reply": message}),
            Outbound::Close => json!({"at_ms": elapsed_ms, "close": true}),
        };
        println!("{line}");
    }

    Ok(())
}
