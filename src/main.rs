//! snippet-sandbox service entry point.
//!
//! Usage:
//!   snippet-sandbox --bind 127.0.0.1:8000 --cpu-seconds 5 --memory-mib 256

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use snippet_sandbox::logging::{init_logging, LogFormat};
use snippet_sandbox::prelude::*;
use snippet_sandbox::sandbox::deadline::designate_primary_thread;
use snippet_sandbox::sandbox::limits::{install_limits, ResourceLimits};
use snippet_sandbox::server::{build_router, AppState, DEFAULT_BODY_LIMIT};

#[derive(Parser, Debug)]
#[command(name = "snippet-sandbox")]
#[command(about = "Run untrusted Python snippets under process limits over HTTP")]
#[command(version)]
struct ServerArgs {
    /// Address to listen on
    #[arg(long, env = "SANDBOX_BIND", default_value = "127.0.0.1:8000")]
    bind: SocketAddr,

    /// Process CPU-time ceiling in seconds (0 leaves it unlimited)
    #[arg(long, env = "SANDBOX_CPU_SECONDS", default_value_t = 5)]
    cpu_seconds: u64,

    /// Process address-space ceiling in MiB (0 leaves it unlimited)
    #[arg(long, env = "SANDBOX_MEMORY_MIB", default_value_t = 256)]
    memory_mib: u64,

    /// Wall-clock budget of one execution, in seconds
    #[arg(long, env = "SANDBOX_TIMEOUT_SECS", default_value_t = 5)]
    timeout_secs: u64,

    /// Which contexts get a wall-clock deadline (everywhere, primary-thread)
    #[arg(long, env = "SANDBOX_DEADLINE_SCOPE", default_value = "everywhere")]
    deadline_scope: DeadlineScope,

    /// Maximum request body size in bytes
    #[arg(long, env = "SANDBOX_BODY_LIMIT", default_value_t = DEFAULT_BODY_LIMIT)]
    body_limit: usize,

    /// Tokio worker threads
    #[arg(long, env = "SANDBOX_WORKERS", default_value_t = 2)]
    workers: usize,

    /// Upper bound on concurrently running snippets
    #[arg(long, env = "SANDBOX_MAX_CONCURRENT", default_value_t = 4)]
    max_concurrent: usize,

    /// Base log level (trace, debug, info, warn, error)
    #[arg(long, env = "SANDBOX_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Log output format (pretty, json)
    #[arg(long, env = "SANDBOX_LOG_FORMAT", default_value = "pretty")]
    log_format: LogFormat,
}

impl ServerArgs {
    fn resource_limits(&self) -> ResourceLimits {
        ResourceLimits {
            cpu_seconds: (self.cpu_seconds > 0).then_some(self.cpu_seconds),
            memory_bytes: (self.memory_mib > 0).then(|| self.memory_mib * 1024 * 1024),
        }
    }

    fn sandbox_config(&self) -> SandboxConfig {
        SandboxConfig::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .deadline_scope(self.deadline_scope)
            .build()
    }
}

fn main() -> Result<()> {
    let args = ServerArgs::parse();
    init_logging(&args.log_level, args.log_format);
    designate_primary_thread();

    let sandbox = PythonSandbox::new(args.sandbox_config()).context("invalid sandbox configuration")?;

    let limits = args.resource_limits();
    if let Some(memory_bytes) = limits.memory_bytes {
        sandbox
            .config()
            .fits_memory(memory_bytes, args.max_concurrent)
            .context("sandbox caps do not fit the memory limit")?;
    }
    install_limits(&limits).context("could not install process resource limits")?;
    tracing::info!(
        cpu_seconds = ?limits.cpu_seconds,
        memory_bytes = ?limits.memory_bytes,
        "process limits installed"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(args.workers.max(1))
        .max_blocking_threads(args.max_concurrent.max(1))
        .thread_name("sandbox-worker")
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    runtime.block_on(serve(args, sandbox))
}

async fn serve(args: ServerArgs, sandbox: PythonSandbox) -> Result<()> {
    let app = build_router(AppState::new(sandbox).with_body_limit(args.body_limit));

    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("failed to bind {}", args.bind))?;

    tracing::info!(
        addr = %args.bind,
        timeout_secs = args.timeout_secs,
        deadline_scope = %args.deadline_scope,
        "snippet-sandbox v{} listening",
        env!("CARGO_PKG_VERSION")
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "could not listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
