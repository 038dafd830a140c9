//! Operator CLI for project keys. Plaintext keys are printed only by `issue`
//! and `reveal`; everything else shows masked values or owner ids.

use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use forprompt_keys::admin::AdminAuthority;
use forprompt_keys::config::{load_config, ServiceConfig};
use forprompt_keys::crypto::passwords::hash_passphrase;
use forprompt_keys::key;
use forprompt_keys::logging;
use forprompt_keys::migration::MigrationCheck;
use forprompt_keys::store::SqliteKeyStore;
use forprompt_keys::{KeyService, MatchPath, OwnerId, Verdict};

/// Manage ForPrompt project API keys.
#[derive(Parser)]
#[command(name = "forprompt-keys")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the JSON service config
    #[arg(global = true, short, long)]
    config: Option<PathBuf>,

    /// Key database path (overrides the config file)
    #[arg(global = true, long)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a fresh key without storing it
    Generate,

    /// Issue a key for a project and print it once
    Issue {
        #[arg(long)]
        owner: String,

        #[arg(long)]
        created_by: String,

        /// Index the new record right away instead of waiting for `migrate`
        #[arg(long)]
        index: bool,
    },

    /// Check which project a key belongs to
    Verify {
        /// Key to check; read from FORPROMPT_API_KEY when omitted
        key: Option<String>,
    },

    /// Upgrade records to the v1 envelope and fill in their index
    Migrate {
        /// Migrate a single project instead of the whole table
        #[arg(long)]
        owner: Option<String>,

        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Re-derive the index of a migrated record and compare it with storage
    CheckMigration {
        #[arg(long)]
        owner: Option<String>,
    },

    /// List keys in masked form
    List {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print a project's full key (requires the operator passphrase)
    Reveal {
        #[arg(long)]
        owner: String,

        /// Environment variable holding the operator passphrase
        #[arg(long, default_value = "FORPROMPT_ADMIN_PASSPHRASE")]
        passphrase_env: String,
    },

    /// Delete a project's key (when the project itself is deleted)
    Delete {
        #[arg(long)]
        owner: String,
    },

    /// Hash an operator passphrase for the `adminPasswordHash` setting
    HashPassword { plaintext: String },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => match load_config(path) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("config load failed: {err}");
                return ExitCode::FAILURE;
            }
        },
        None => ServiceConfig::default(),
    };
    if let Some(database) = cli.database.clone() {
        config.database_path = database;
    }

    if let Err(err) = logging::init(&config.log_level) {
        eprintln!("{err}");
    }

    match run(cli.command, config) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(command: Commands, mut config: ServiceConfig) -> Result<ExitCode, Box<dyn Error>> {
    if let Commands::Migrate {
        batch_size: Some(batch_size),
        ..
    } = &command
    {
        config.migration_batch_size = (*batch_size).max(1);
    }
    let open = || -> Result<KeyService<SqliteKeyStore>, Box<dyn Error>> {
        let store = SqliteKeyStore::open(&config.database_path)?;
        Ok(KeyService::from_config(store, &config))
    };

    match command {
        Commands::Generate => println!("{}", key::generate()),
        Commands::Issue {
            owner,
            created_by,
            index,
        } => {
            let service = open()?;
            let issued = service.issue(OwnerId::new(owner), &created_by)?;
            if index {
                service.migrate_owner(&issued.owner_id)?;
            }
            println!("{}", issued.expose());
        }
        Commands::Verify { key } => {
            let service = open()?;
            let candidate = match key {
                Some(key) => key,
                None => std::env::var("FORPROMPT_API_KEY")
                    .map_err(|_| "no key given and FORPROMPT_API_KEY is not set")?,
            };
            match service.verify(candidate.trim())? {
                Verdict::Authenticated { owner_id, path } => {
                    let via = match path {
                        MatchPath::Indexed => "index",
                        MatchPath::Fallback => "fallback scan",
                    };
                    println!("match: {owner_id} (via {via})");
                }
                Verdict::NoMatch => {
                    println!("no-match");
                    return Ok(ExitCode::FAILURE);
                }
            }
        }
        Commands::Migrate {
            owner: Some(owner), ..
        } => {
            let service = open()?;
            let outcome = service.migrate_owner(&OwnerId::new(owner))?;
            println!("{outcome:?}");
        }
        Commands::Migrate { owner: None, .. } => {
            let service = open()?;
            let report = service.migrate_all()?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if report.errored > 0 {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::CheckMigration { owner } => {
            let service = open()?;
            let owner = owner.map(OwnerId::new);
            match service.verify_migration(owner.as_ref())? {
                MigrationCheck::Consistent(owner_id) => println!("consistent: {owner_id}"),
                MigrationCheck::Inconsistent(owner_id) => {
                    println!("inconsistent: {owner_id}");
                    return Ok(ExitCode::FAILURE);
                }
                MigrationCheck::NotMigrated(owner_id) => println!("not migrated: {owner_id}"),
                MigrationCheck::NothingMigrated => println!("no migrated records"),
            }
        }
        Commands::List { format } => {
            let service = open()?;
            let keys = service.masked_keys()?;
            if format == "json" {
                println!("{}", serde_json::to_string_pretty(&keys)?);
            } else {
                for entry in keys {
                    let state = if entry.indexed { "indexed" } else { "pending" };
                    println!(
                        "{}\t{}\t{}\t{}",
                        entry.owner_id,
                        entry.masked,
                        state,
                        entry.created_at.to_rfc3339()
                    );
                }
            }
        }
        Commands::Reveal {
            owner,
            passphrase_env,
        } => {
            let service = open()?;
            let hash = config
                .admin_password_hash
                .as_deref()
                .ok_or("adminPasswordHash is not configured")?;
            let authority = AdminAuthority::new(hash)?;
            let passphrase = std::env::var(&passphrase_env)
                .map_err(|_| format!("{passphrase_env} is not set"))?;
            let grant = authority
                .authorize(&passphrase)
                .ok_or("operator passphrase rejected")?;
            println!("{}", service.reveal(&OwnerId::new(owner), grant)?);
        }
        Commands::Delete { owner } => {
            let service = open()?;
            let removed = service.delete(&OwnerId::new(owner))?;
            println!("{}", if removed { "deleted" } else { "not found" });
        }
        Commands::HashPassword { plaintext } => {
            println!("{}", hash_passphrase(&plaintext)?);
        }
    }

    Ok(ExitCode::SUCCESS)
}
