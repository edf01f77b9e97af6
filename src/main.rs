//! # Tender Index CLI (`tdx`)
//!
//! ## Usage
//!
//! ```bash
//! tdx --config ./config/tdx.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `tdx init` | Create the SQLite database and run schema migrations |
//! | `tdx org set <org> --tier <tier>` | Create or update an organization's plan |
//! | `tdx upload <path> --tender <id>` | Store a file and register the upload |
//! | `tdx ingest <upload_id>` | Index an upload, as the transport hook would |
//! | `tdx ensure <file> --org <org>` | Ensure a file is indexed, optionally restarting a failure |
//! | `tdx progress <doc_hash> [--watch]` | Show (or follow) indexing progress |
//! | `tdx history <doc_hash>` | Show the transition log |
//! | `tdx tender <tender_id> --org <org>` | Tender-level ingestion summary |
//! | `tdx ask <file> "<question>" --org <org>` | Metered question over one file |
//! | `tdx brief <file> --org <org>` | Metered tender brief of one file |
//! | `tdx usage --org <org> --tender <id>` | Usage counters for this billing period |
//! | `tdx serve` | Start the HTTP server |
//!
//! Logging is controlled by `RUST_LOG` (default `info`) and written to
//! stderr.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use tender_index::commands;
use tender_index::config;
use tender_index::server;
use tender_index::services::Services;
use tender_index::upload::UploadOptions;

/// Tender Index CLI: per-document indexing, grounded Q&A and metered
/// access for tender files.
#[derive(Parser)]
#[command(
    name = "tdx",
    about = "Tender Index: per-document indexing, grounded Q&A and metered access for tender files",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/tdx.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema and blob directory.
    ///
    /// Idempotent; running it multiple times is safe.
    Init,

    /// Manage organizations and their plans.
    Org {
        #[command(subcommand)]
        action: OrgAction,
    },

    /// Store a file and register it as an upload to a tender.
    ///
    /// Stand-in for the upload transport. Does not start indexing; run
    /// `tdx ingest` with the printed upload id for that.
    Upload {
        /// File to upload.
        path: PathBuf,

        /// Tender the file belongs to.
        #[arg(long)]
        tender: String,

        /// Owning organization. Omit for an anonymous upload.
        #[arg(long)]
        org: Option<String>,

        /// Make the upload visible to other organizations.
        #[arg(long)]
        published: bool,

        /// Override the content type guessed from the extension.
        #[arg(long)]
        content_type: Option<String>,
    },

    /// Index an upload and wait for the run to finish.
    ///
    /// Anonymous and non-indexable uploads are skipped.
    Ingest {
        upload_id: String,
    },

    /// Ensure a file is indexed and wait for any run this starts.
    Ensure {
        /// Upload id or file id.
        file: String,

        #[arg(long)]
        org: String,

        /// Restart the document if it previously failed.
        #[arg(long)]
        restart: bool,
    },

    /// Show indexing progress of a document.
    Progress {
        doc_hash: String,

        /// Caller organization. Omit to read as an anonymous visitor.
        #[arg(long)]
        org: Option<String>,

        /// Poll until the document is READY or FAILED, printing each new
        /// state to stderr.
        #[arg(long)]
        watch: bool,

        /// Emit watch progress as JSON lines.
        #[arg(long)]
        json: bool,
    },

    /// Show the transition log of a document.
    History {
        doc_hash: String,

        #[arg(long)]
        org: Option<String>,
    },

    /// Show the ingestion summary of one of your tenders.
    Tender {
        tender_id: String,

        #[arg(long)]
        org: String,
    },

    /// Ask a question answered only from one file.
    Ask {
        /// Upload id or file id.
        file: String,

        question: String,

        #[arg(long)]
        org: String,
    },

    /// Generate (or fetch the cached) brief of one file.
    Brief {
        /// Upload id or file id.
        file: String,

        #[arg(long)]
        org: String,

        /// `short`, `medium` or `long`.
        #[arg(long, default_value = "medium")]
        length: String,

        /// Print the structured JSON instead of Markdown.
        #[arg(long)]
        json: bool,
    },

    /// Show usage counters for an org and tender.
    Usage {
        #[arg(long)]
        org: String,

        #[arg(long)]
        tender: String,

        /// Also list the org's most recent gate decisions.
        #[arg(long)]
        audit: bool,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

#[derive(Subcommand)]
enum OrgAction {
    /// Create or update an organization.
    Set {
        org_id: String,

        /// `free`, `starter`, `pro` or `enterprise`.
        #[arg(long)]
        tier: String,

        /// Trial length in days from now (free tier only).
        #[arg(long)]
        trial_days: Option<i64>,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    let services = match cli.command {
        Commands::Init => return commands::run_init(&cfg).await,
        _ => Services::open(&cfg).await?,
    };

    match cli.command {
        Commands::Init => {}
        Commands::Org { action } => match action {
            OrgAction::Set {
                org_id,
                tier,
                trial_days,
            } => commands::run_org_set(&services, &org_id, &tier, trial_days).await?,
        },
        Commands::Upload {
            path,
            tender,
            org,
            published,
            content_type,
        } => {
            let opts = UploadOptions {
                org_id: org,
                tender_id: tender,
                published,
                content_type,
            };
            commands::run_upload(&services, &path, &opts).await?;
        }
        Commands::Ingest { upload_id } => commands::run_ingest(&services, &upload_id).await?,
        Commands::Ensure { file, org, restart } => {
            commands::run_ensure(&services, &file, &org, restart).await?
        }
        Commands::Progress {
            doc_hash,
            org,
            watch,
            json,
        } => commands::run_progress(&services, &doc_hash, org.as_deref(), watch, json).await?,
        Commands::History { doc_hash, org } => {
            commands::run_history(&services, &doc_hash, org.as_deref()).await?
        }
        Commands::Tender { tender_id, org } => {
            commands::run_tender(&services, &tender_id, &org).await?
        }
        Commands::Ask {
            file,
            question,
            org,
        } => commands::run_ask(&services, &file, &question, &org).await?,
        Commands::Brief {
            file,
            org,
            length,
            json,
        } => commands::run_brief(&services, &file, &length, &org, json).await?,
        Commands::Usage { org, tender, audit } => {
            commands::run_usage(&services, &org, &tender, audit).await?
        }
        Commands::Serve => server::run_server(services).await?,
    }

    Ok(())
}
