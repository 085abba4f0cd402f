//! CLI binary: serve `POST /api/extract_tables`.
//!
//! Binds pdfium once at startup so a missing library fails fast instead of
//! on the first request.

use anyhow::{Context, Result};
use clap::Parser;
use pdf_toolbelt::cli::{bold, init_logging};
use pdf_toolbelt::config::DEFAULT_ALLOWED_ORIGIN;
use pdf_toolbelt::server::EXTRACT_PATH;
use pdf_toolbelt::{router, PdfiumTableExtractor, ServerState};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

/// Extract tables from base64-encoded PDFs and return them as a spreadsheet.
#[derive(Parser, Debug)]
#[command(name = "tables-server", version)]
struct Cli {
    /// Address to bind.
    #[arg(long, default_value = "127.0.0.1", env = "TABLES_BIND")]
    bind: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 3000, env = "PORT")]
    port: u16,

    /// Value of Access-Control-Allow-Origin on every response.
    #[arg(long, default_value = DEFAULT_ALLOWED_ORIGIN, env = "TABLES_ALLOW_ORIGIN")]
    allow_origin: String,

    /// Directory containing the pdfium shared library.
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_lib_path: Option<std::path::PathBuf>,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long)]
    verbose: bool,

    /// Only log errors.
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let extractor = match cli.pdfium_lib_path {
        Some(dir) => PdfiumTableExtractor::new(Some(dir), Default::default()),
        None => PdfiumTableExtractor::from_env(),
    };
    extractor.check_binding().context("pdfium is not available")?;

    let state = ServerState::new(Arc::new(extractor), &cli.allow_origin)?;
    let addr: SocketAddr = format!("{}:{}", cli.bind, cli.port)
        .parse()
        .with_context(|| format!("Invalid bind address {}:{}", cli.bind, cli.port))?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("tables-server listening on {}", bold(&format!("http://{addr}{EXTRACT_PATH}")));
    info!("├ Allowed origin: {}", cli.allow_origin);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;
    info!("tables-server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C signal"),
        () = terminate => info!("Received SIGTERM signal"),
    }
}
