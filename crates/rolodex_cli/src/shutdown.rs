use console::Term;
use tokio_util::sync::CancellationToken;

/// Set up the Ctrl+C handler for graceful shutdown.
///
/// The first Ctrl+C cancels `token`; running jobs stop at the next batch
/// boundary and stay resumable. A second Ctrl+C exits immediately.
pub(crate) fn setup_shutdown_handler(token: CancellationToken) {
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to install Ctrl+C handler: {}", e);
            return;
        }

        let is_tty = Term::stdout().is_term();
        if is_tty {
            eprintln!("\n\nShutdown requested, finishing current batch...");
            eprintln!("Press Ctrl+C again to force quit.");
        } else {
            tracing::warn!("Shutdown requested, finishing current batch");
        }

        token.cancel();

        if tokio::signal::ctrl_c().await.is_ok() {
            if is_tty {
                eprintln!("Force quit!");
            }
            std::process::exit(130);
        }
    });
}
