use std::sync::Arc;

use anyhow::Context;

use statement_dispatch::config::Config;
use statement_dispatch::dispatcher::StatementDispatcher;
use statement_dispatch::mailer::SmtpMailer;
use statement_dispatch::routes::dispatch_routes;
use statement_dispatch::store::LibSqlDirectory;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    // A `.env` file is optional; real environment variables win.
    let dotenv_path = dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    if let Some(path) = &dotenv_path {
        tracing::info!("Loaded environment from {}", path.display());
    }

    let config = Config::from_env().context("Failed to load configuration")?;

    eprintln!("📄 Statement Dispatch v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Statements: {}", config.dispatch.statements_dir.display());
    eprintln!("   Sent: {}", config.dispatch.sent_dir.display());
    eprintln!(
        "   SMTP: {}:{} as {}",
        config.smtp.host, config.smtp.port, config.smtp.from_address
    );

    // ── Collaborators ───────────────────────────────────────────────────
    let directory = LibSqlDirectory::open(&config.directory)
        .await
        .context("Failed to open customer directory")?;
    let mailer = SmtpMailer::new(config.smtp.clone()).context("Failed to set up SMTP")?;

    let dispatcher = Arc::new(StatementDispatcher::new(
        config.dispatch.clone(),
        Arc::new(directory),
        Arc::new(mailer),
    ));

    // ── HTTP ────────────────────────────────────────────────────────────
    let app = dispatch_routes(dispatcher);
    let addr = (config.server.bind_addr, config.server.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}:{}", addr.0, addr.1))?;

    tracing::info!(port = config.server.port, "Server running on http://localhost:{}", config.server.port);
    eprintln!("   Trigger: GET http://{}:{}/send-statements\n", addr.0, addr.1);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
