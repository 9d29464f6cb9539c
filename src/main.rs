//! binsync command-line entry point.
//!
//! Architecture:
//! - Main thread: runs the host loop (the analysis host is single-threaded)
//! - Background thread: runs the tokio runtime with the RPC server and the
//!   sync worker

use binsync::client::{DescriptorConnector, RpcClient};
use binsync::host::memory::HostFixture;
use binsync::server::bootstrap::{launch, ServeConfig, BASE_PORT, DEFAULT_DESCRIPTOR_DIR};
use binsync::session::{find_descriptor, list_descriptors, sync_queue, SyncWorker};
use binsync::{expand_path, main_thread_channel, InMemoryHost, MainThread};
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use std::net::IpAddr;
use std::rc::Rc;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(
    name = "binsync",
    version,
    about = "Navigation sync and diff coloring between paired analysis sessions"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a session over an in-memory host and serve its RPC interface
    Serve(ServeArgs),
    /// Call an RPC method on a running session
    Call(CallArgs),
    /// List published session descriptors
    Sessions(SessionsArgs),
}

#[derive(Args)]
struct ServeArgs {
    /// JSON image fixture describing the analyzed binary
    #[arg(long)]
    fixture: String,
    /// Address to bind the RPC server on
    #[arg(long, default_value = "127.0.0.1")]
    bind_host: IpAddr,
    /// First port to try; later ports are scanned upward
    #[arg(long, default_value_t = BASE_PORT)]
    base_port: u16,
    /// Directory holding session descriptors
    #[arg(long, default_value = DEFAULT_DESCRIPTOR_DIR)]
    descriptor_dir: String,
    /// Timeout for calls to peer sessions in seconds (default: none)
    #[arg(long)]
    peer_timeout_secs: Option<u64>,
}

impl ServeArgs {
    fn config(&self) -> ServeConfig {
        ServeConfig {
            bind_host: self.bind_host,
            base_port: self.base_port,
            descriptor_dir: expand_path(&self.descriptor_dir),
            peer_timeout: self.peer_timeout_secs.map(Duration::from_secs),
        }
    }
}

#[derive(Args)]
struct CallArgs {
    /// RPC method name (e.g. get_md5, jumpto, show_diff)
    method: String,
    /// JSON params, object or array (default: {})
    params: Option<String>,
    /// Content hash of the target session
    #[arg(long)]
    md5: Option<String>,
    /// Port of the target session (skips descriptor lookup)
    #[arg(long)]
    port: Option<u16>,
    /// Directory holding session descriptors
    #[arg(long, default_value = DEFAULT_DESCRIPTOR_DIR)]
    descriptor_dir: String,
    /// Request timeout in seconds (default: none)
    #[arg(long)]
    timeout_secs: Option<u64>,
}

#[derive(Args)]
struct SessionsArgs {
    /// Directory holding session descriptors
    #[arg(long, default_value = DEFAULT_DESCRIPTOR_DIR)]
    descriptor_dir: String,
}

fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries command output
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("binsync=info")))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => run_serve(args),
        Command::Call(args) => run_call(args),
        Command::Sessions(args) => run_sessions(args),
    }
}

async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        tokio::select! {
            _ = sigterm.recv() => {},
            _ = sigint.recv() => {},
            _ = tokio::signal::ctrl_c() => {},
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }

    Ok(())
}

fn run_serve(args: ServeArgs) -> anyhow::Result<()> {
    let fixture_path = expand_path(&args.fixture);
    let text = std::fs::read_to_string(&fixture_path)
        .map_err(|e| anyhow::anyhow!("{}: {e}", fixture_path.display()))?;
    let fixture = HostFixture::from_json(&text)
        .map_err(|e| anyhow::anyhow!("invalid fixture {}: {e}", fixture_path.display()))?;
    info!(
        root_filename = %fixture.root_filename,
        content_hash = %fixture.content_hash,
        "Starting session"
    );
    let host = InMemoryHost::new(fixture);
    let config = args.config();

    // This thread becomes the host's main thread.
    let (main, host_loop) = main_thread_channel();

    let server_handle = thread::spawn(move || {
        let result = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(anyhow::Error::from)
            .and_then(|rt| rt.block_on(serve_session(main.clone(), config)));
        // Release the main thread whatever happened here.
        if let Err(e) = main.shutdown() {
            warn!(error = %e, "Host loop already stopped");
        }
        result
    });

    info!("Starting host loop");
    host_loop.run(Rc::new(host));
    info!("Host loop finished");

    match server_handle.join() {
        Ok(result) => result?,
        Err(e) => error!("Server thread panicked: {:?}", e),
    }

    info!("Session stopped");
    Ok(())
}

async fn serve_session(main: MainThread, config: ServeConfig) -> anyhow::Result<()> {
    let (sync, sync_rx) = sync_queue();
    let connector = DescriptorConnector::new(config.descriptor_dir.clone(), config.peer_timeout);
    let worker = SyncWorker::new(sync_rx, connector).spawn();

    let session = launch(main, sync, &config).await?;
    println!("{}", session.port());

    if let Err(e) = wait_for_shutdown_signal().await {
        warn!(error = %e, "Signal handler failed, shutting down");
    } else {
        info!("Shutdown signal received");
    }

    session.shutdown();
    session.join().await;
    worker.abort();
    Ok(())
}

fn run_call(args: CallArgs) -> anyhow::Result<()> {
    let params: Value = match args.params.as_deref() {
        Some(text) => serde_json::from_str(text)
            .map_err(|e| anyhow::anyhow!("params must be JSON: {e}"))?,
        None => Value::Object(Default::default()),
    };
    let port = resolve_port(&args)?;
    let timeout = args.timeout_secs.map(Duration::from_secs);

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let result = rt.block_on(async move {
        let client = RpcClient::new("127.0.0.1", port, timeout)?;
        client.call(&args.method, params).await
    })?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn resolve_port(args: &CallArgs) -> anyhow::Result<u16> {
    if let Some(port) = args.port {
        return Ok(port);
    }
    let dir = expand_path(&args.descriptor_dir);
    if let Some(md5) = args.md5.as_deref() {
        return Ok(find_descriptor(&dir, md5)?.port);
    }
    match list_descriptors(&dir)?.as_slice() {
        [only] => Ok(only.port),
        [] => Err(anyhow::anyhow!("no sessions in {}", dir.display())),
        _ => Err(anyhow::anyhow!(
            "several sessions in {}; pass --md5 or --port",
            dir.display()
        )),
    }
}

fn run_sessions(args: SessionsArgs) -> anyhow::Result<()> {
    let dir = expand_path(&args.descriptor_dir);
    let descriptors = list_descriptors(&dir)?;
    println!("{}", serde_json::to_string_pretty(&descriptors)?);
    Ok(())
}
