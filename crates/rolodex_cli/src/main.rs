//! Rolodex CLI - command-line interface for CRM contact mirroring.

mod commands;
mod config;
mod progress;
mod shutdown;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use console::Term;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::commands::output::OutputFormat;

#[derive(Parser)]
#[command(name = "rolodex")]
#[command(version)]
#[command(about = "Resumable CRM contact mirroring")]
#[command(
    long_about = "Rolodex keeps a local mirror of a CRM's contacts current. Sync jobs fetch \
contacts in batches and save their cursor after every batch, so an interrupted run resumes \
where it stopped. It also keeps the CRM session credentials fresh and checks candidate \
contacts for existence in the CRM before export."
)]
#[command(after_long_help = r#"EXAMPLES
    Connect the CRM integration with the API user's password:
        $ rolodex auth login

    Start a full sync and run it to completion:
        $ rolodex sync start

    Create a job for a scheduler and run one bounded invocation:
        $ rolodex sync start --detach
        $ rolodex sync resume <JOB_ID> --once

    Resume a failed job from its saved cursor:
        $ rolodex sync start --resume-from <JOB_ID>

    Check which candidates already exist in the CRM:
        $ rolodex overlap candidates.json

    Serve the OAuth callback for browser-based connection:
        $ rolodex serve --bind 0.0.0.0:8080

CONFIGURATION
    Rolodex reads configuration from:
      1. ~/.config/rolodex/config.toml (or $XDG_CONFIG_HOME/rolodex/config.toml)
      2. ./rolodex.toml
      3. Environment variables (ROLODEX_* prefix, `__` between sections)
      4. .env file in current directory

ENVIRONMENT VARIABLES
    ROLODEX_DATABASE__URL         Database connection string (default: ~/.local/state/rolodex/rolodex.db)
    ROLODEX_CRM__AUTH_URL         OAuth server base URL
    ROLODEX_CRM__LOGIN_URL        REST login server base URL
    ROLODEX_CRM__CLIENT_ID        OAuth client id
    ROLODEX_CRM__CLIENT_SECRET    OAuth client secret
    ROLODEX_CRM__USERNAME         API user for unattended re-login
    ROLODEX_CRM__PASSWORD         API user password
    ROLODEX_SYNC__BATCH_SIZE      Contacts per batch (default: 200, max: 500)
"#)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage database migrations
    Migrate {
        #[command(subcommand)]
        action: MigrateAction,
    },

    /// Create, run and inspect sync jobs
    Sync {
        #[command(subcommand)]
        action: SyncAction,
    },

    /// Check which candidate contacts already exist in the CRM
    #[command(after_long_help = r#"INPUT
    A JSON array of candidates:
        [{"email": "ada@example.com", "firstName": "Ada"}, ...]

    With --run, a JSON object mapping run ids to candidate arrays:
        {"run-42": [{"email": "ada@example.com"}]}
"#)]
    Overlap {
        /// JSON file with the candidate contacts
        file: PathBuf,

        /// Check only this enrichment run from the file
        #[arg(long)]
        run: Option<String>,

        /// Look up at most this many distinct emails
        #[arg(long)]
        max_lookups: Option<usize>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },

    /// Show mirror size and the most recent sync job
    Stats {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },

    /// Connect, inspect or disconnect the CRM integration
    Auth {
        #[command(subcommand)]
        action: AuthAction,
    },

    /// Serve the OAuth authorize and callback routes
    Serve {
        /// Address to listen on (overrides server.bind)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },

    /// Generate man pages
    Man {
        /// Output directory for man pages (prints to stdout if not specified)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum MigrateAction {
    /// Apply all pending migrations
    Up,
    /// Rollback the last migration
    Down,
    /// Show migration status
    Status,
    /// Drop all tables and reapply all migrations
    Fresh,
}

#[derive(Subcommand)]
enum SyncAction {
    /// Create a sync job and run it
    Start {
        /// Contacts per batch (1-500)
        #[arg(long)]
        batch_size: Option<u32>,

        /// Batches per invocation before yielding
        #[arg(long)]
        max_batches: Option<u32>,

        /// Include contacts deleted in the CRM (`--include-deleted=false` overrides config)
        #[arg(
            long,
            value_name = "BOOL",
            num_args = 0..=1,
            require_equals = true,
            default_missing_value = "true"
        )]
        include_deleted: Option<bool>,

        /// Stop after this many contacts
        #[arg(long)]
        max_contacts: Option<u64>,

        /// Continue from the cursor of a failed or cancelled job
        #[arg(long, value_name = "JOB_ID")]
        resume_from: Option<Uuid>,

        /// Who asked for the job (recorded on the job)
        #[arg(long, env = "USER")]
        requested_by: Option<String>,

        /// Only create the job; do not run it
        #[arg(long, conflicts_with = "once")]
        detach: bool,

        /// Run a single bounded invocation instead of running to completion
        #[arg(long)]
        once: bool,
    },

    /// Run a queued, running or interrupted job
    Resume {
        job_id: Uuid,

        /// Run a single bounded invocation instead of running to completion
        #[arg(long)]
        once: bool,
    },

    /// Show one job
    Status {
        job_id: Uuid,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },

    /// List recent jobs, newest first
    List {
        /// Number of jobs to show (1-100)
        #[arg(short, long)]
        limit: Option<u64>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },

    /// Cancel a job
    Cancel { job_id: Uuid },

    /// List running jobs whose heartbeat is stale
    Stale {
        /// Mark every stale job as failed (abandoned)
        #[arg(long)]
        mark: bool,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },
}

#[derive(Subcommand)]
enum AuthAction {
    /// Print the URL an operator opens to connect the integration
    Url,
    /// Show the stored session
    Status,
    /// Connect with the configured API user's username and password
    Login,
    /// Connect with an authorization code obtained from the consent page
    Code {
        code: String,
    },
    /// Delete the stored credentials
    Disconnect,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Structured logging for non-TTY runs and for the server.
    if !Term::stdout().is_term() || matches!(cli.command, Commands::Serve { .. }) {
        let env_filter = match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => EnvFilter::new("rolodex=info,rolodex_cli=info,tower_http=info"),
        };

        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }

    // Load configuration (config files -> env vars -> defaults)
    let config = config::Config::load();

    // Handle commands that don't require database access first
    match &cli.command {
        Commands::Completions { shell } => {
            commands::meta::handle_completions(*shell)?;
            return Ok(());
        }
        Commands::Man { output } => {
            commands::meta::handle_man(output.clone())?;
            return Ok(());
        }
        _ => {}
    }

    let database_url = config
        .database_url()
        .ok_or("Failed to determine database URL; set database.url or ROLODEX_DATABASE__URL")?;

    // Ensure the database directory exists for SQLite
    if database_url.starts_with("sqlite://") {
        let db_path = database_url.trim_start_matches("sqlite://");
        // Strip query parameters (e.g., ?mode=rwc) before path operations
        let db_path = db_path.split('?').next().unwrap_or(db_path);
        let db_path = std::path::Path::new(db_path);

        if db_path.is_relative() && !db_path.as_os_str().is_empty() {
            tracing::warn!(
                "Database path '{}' is relative - behavior depends on current directory. \
                 Consider using an absolute path.",
                db_path.display()
            );
        }

        if let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
    }

    let command = match cli.command {
        Commands::Migrate { action } => {
            commands::migrate::handle_migrate(action, &database_url).await?;
            return Ok(());
        }
        command => command,
    };

    let db = Arc::new(rolodex::connect_and_migrate(&database_url).await?);

    // Ctrl+C stops work at the next batch boundary.
    let cancel = CancellationToken::new();
    shutdown::setup_shutdown_handler(cancel.clone());

    match command {
        Commands::Sync { action } => {
            commands::sync::handle_sync(action, &config, db, cancel).await?;
        }
        Commands::Overlap {
            file,
            run,
            max_lookups,
            output,
        } => {
            commands::overlap::handle_overlap(
                &file,
                run.as_deref(),
                max_lookups,
                output,
                &config,
                db,
                cancel,
            )
            .await?;
        }
        Commands::Stats { output } => {
            commands::stats::handle_stats(output, &config, db).await?;
        }
        Commands::Auth { action } => {
            commands::auth::handle_auth(action, &config, db).await?;
        }
        Commands::Serve { bind } => {
            commands::serve::handle_serve(bind, &config, db, cancel).await?;
        }
        // Handled before connecting.
        Commands::Migrate { .. } | Commands::Completions { .. } | Commands::Man { .. } => {}
    }

    Ok(())
}
