//! # Gated Context CLI (`gctx`)
//!
//! ## Usage
//!
//! ```bash
//! gctx --config ./config/gctx.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `gctx init` | Create the SQLite database and run schema migrations |
//! | `gctx ingest <path> --owner <subject>` | Index a file or directory and grant ownership |
//! | `gctx grant <subject> <relation> <id>` | Create a warrant |
//! | `gctx revoke <subject> <relation> <id>` | Delete a warrant |
//! | `gctx check <subject> <relation> <id>` | Point authorization check |
//! | `gctx accessible <subject>` | List documents a subject can view |
//! | `gctx warrants [id]` | List warrants |
//! | `gctx share --from <owner> --to <grantee> <ids...> [--at-revision N]` | Owner shares documents |
//! | `gctx search <subject> "<query>"` | Access-filtered search |
//! | `gctx serve` | Start the HTTP server |
//!
//! Subjects are written `type:id` (`user:alice`, `group:eng`); a bare id
//! means `user:<id>`.
//!
//! Exit status is 0 on success, 3 when the operation was denied by an
//! authorization check, and 1 for any other failure. Diagnostics go to
//! stderr; set `GCTX_LOG` (e.g. `GCTX_LOG=debug`) to see them.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use gated_context::config;
use gated_context::{commands, migrate, server};
use gated_context_core::error::GateError;
use gated_context_core::models::{Subject, WriteOp};

const DENIED_EXIT: u8 = 3;

/// Gated Context CLI: authorization-gated retrieval over local documents.
#[derive(Parser)]
#[command(
    name = "gctx",
    about = "Gated Context: relationship-based access control intersected with vector search",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/gctx.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Index a .txt, .md or .pdf file (or every such file under a directory)
    /// and grant the owner relation on it.
    Ingest {
        path: PathBuf,
        /// Subject that becomes the document's owner.
        #[arg(long)]
        owner: Subject,
        /// Document id. Defaults to a stable id derived from the file path.
        #[arg(long)]
        id: Option<String>,
        /// Display name. Defaults to the first Markdown heading or file name.
        #[arg(long)]
        title: Option<String>,
    },

    /// Create a warrant.
    Grant {
        subject: Subject,
        relation: String,
        resource_id: String,
        /// Resource type. Defaults to `[authz].document_type`.
        #[arg(long = "type")]
        resource_type: Option<String>,
    },

    /// Delete a warrant. Deleting an absent warrant succeeds.
    Revoke {
        subject: Subject,
        relation: String,
        resource_id: String,
        #[arg(long = "type")]
        resource_type: Option<String>,
    },

    /// Check whether a subject holds a relation on a resource.
    Check {
        subject: Subject,
        relation: String,
        resource_id: String,
        #[arg(long = "type")]
        resource_type: Option<String>,
        /// Fail instead of answering from state older than this revision.
        #[arg(long)]
        at_revision: Option<u64>,
    },

    /// List documents on which a subject holds a relation.
    Accessible {
        subject: Subject,
        /// Relation to resolve. Defaults to `[authz].viewer_relation`.
        #[arg(long)]
        relation: Option<String>,
        #[arg(long)]
        at_revision: Option<u64>,
    },

    /// List warrants on a resource type, or on one resource.
    Warrants {
        resource_id: Option<String>,
        #[arg(long = "type")]
        resource_type: Option<String>,
    },

    /// Grant viewer on documents the sharer owns. All or nothing.
    Share {
        #[arg(long = "from")]
        owner: Subject,
        #[arg(long = "to")]
        grantee: Subject,
        #[arg(required = true)]
        resource_ids: Vec<String>,
        /// Revision of the ownership write, e.g. from `gctx ingest`.
        #[arg(long)]
        at_revision: Option<u64>,
    },

    /// Search documents the subject may view.
    Search {
        subject: Subject,
        query: String,
        /// Number of chunks to return. Defaults to `[retrieval].top_k`.
        #[arg(long)]
        top_k: Option<usize>,
        #[arg(long)]
        at_revision: Option<u64>,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("GCTX_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => match e.downcast_ref::<GateError>() {
            Some(gate) if gate.is_denial() => {
                eprintln!("denied: {}", gate);
                ExitCode::from(DENIED_EXIT)
            }
            _ => {
                eprintln!("Error: {:#}", e);
                ExitCode::FAILURE
            }
        },
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest {
            path,
            owner,
            id,
            title,
        } => {
            commands::run_ingest(&cfg, &path, &owner, id.as_deref(), title.as_deref()).await?;
        }
        Commands::Grant {
            subject,
            relation,
            resource_id,
            resource_type,
        } => {
            commands::run_write(
                &cfg,
                WriteOp::Create,
                &subject,
                &relation,
                resource_type.as_deref(),
                &resource_id,
            )
            .await?;
        }
        Commands::Revoke {
            subject,
            relation,
            resource_id,
            resource_type,
        } => {
            commands::run_write(
                &cfg,
                WriteOp::Delete,
                &subject,
                &relation,
                resource_type.as_deref(),
                &resource_id,
            )
            .await?;
        }
        Commands::Check {
            subject,
            relation,
            resource_id,
            resource_type,
            at_revision,
        } => {
            commands::run_check(
                &cfg,
                &subject,
                &relation,
                resource_type.as_deref(),
                &resource_id,
                at_revision,
            )
            .await?;
        }
        Commands::Accessible {
            subject,
            relation,
            at_revision,
        } => {
            commands::run_accessible(&cfg, &subject, relation.as_deref(), at_revision).await?;
        }
        Commands::Warrants {
            resource_id,
            resource_type,
        } => {
            commands::run_list_warrants(&cfg, resource_type.as_deref(), resource_id.as_deref())
                .await?;
        }
        Commands::Share {
            owner,
            grantee,
            resource_ids,
            at_revision,
        } => {
            commands::run_share(&cfg, &owner, &grantee, &resource_ids, at_revision).await?;
        }
        Commands::Search {
            subject,
            query,
            top_k,
            at_revision,
        } => {
            commands::run_search(&cfg, &subject, &query, top_k, at_revision).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
