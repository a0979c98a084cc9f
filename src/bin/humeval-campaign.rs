use chrono::Utc;
use clap::{Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use humeval::agenda::{self, Severity};
use humeval::campaign::{self, Manifest};
use humeval::dispatch::{self, Submission};
use humeval::errors::{self, Result};
use humeval::ingest::{self, ImportOptions};
use humeval::model::{Id, TaskKind};
use humeval::records::{self, ExtractOptions};
use humeval::reliability::{self, QcSettings};
use humeval::store::{SharedStore, Store};
use log::{error, info, warn};
use std::path::PathBuf;
use std::{env, process};

const SECRET_KEY_VAR: &str = "HUMEVAL_SECRET_KEY";

/// Manage evaluation campaigns stored in a JSON file
#[derive(Parser)]
#[command(author, version, about)]
struct Args {
    /// Store file (JSON), created if missing
    store: PathBuf,
    #[command(subcommand)]
    command: Command,
    /// Verbosity
    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,
}

#[derive(Subcommand)]
enum Command {
    /// Register a campaign from a manifest
    Create {
        manifest: PathBuf,
        #[arg(long, default_value = "admin")]
        owner: String,
    },
    /// Import a batch file (JSON or ZIP) into a campaign
    Import {
        campaign: String,
        batch: PathBuf,
        /// Task type of the campaign
        #[arg(long, default_value = "Direct")]
        task_type: String,
        /// Stop after this many valid tasks
        #[arg(long)]
        max_count: Option<usize>,
        #[arg(long)]
        domain: Option<String>,
        #[arg(long)]
        corpus_name: Option<String>,
    },
    /// Activate the tasks of an imported batch
    Activate {
        batch: Id,
        #[arg(long, default_value = "admin")]
        owner: String,
    },
    /// Create users, team and agendas
    Init {
        manifest: PathBuf,
        #[arg(long, default_value = "admin")]
        owner: String,
        /// Only put activated tasks on agendas
        #[arg(long)]
        only_activated: bool,
    },
    /// Print annotator credentials as CSV
    Credentials { manifest: PathBuf },
    /// Show the next item for a user, claiming a free task if needed
    Next {
        campaign: String,
        user: String,
        /// Target language of tasks to claim
        #[arg(long)]
        language: Option<String>,
    },
    /// Record a score
    Submit {
        user: String,
        task: Id,
        item: Id,
        score: f64,
        #[arg(long)]
        score2: Option<f64>,
        #[arg(long)]
        start: f64,
        #[arg(long)]
        end: f64,
    },
    /// Print confirmation tokens of users with finished agendas
    Tokens {
        campaign: String,
        users: Vec<String>,
        /// Assess the users before handing out a success token
        #[arg(long)]
        qc: bool,
        #[arg(long, default_value_t = reliability::DEFAULT_P_VALUE)]
        p_value: f64,
        /// Used when the environment variable is not set
        #[arg(long)]
        secret_key: Option<String>,
    },
    /// Release stale task assignments
    Unlink,
    /// Archive the results of a user so that the agenda can be done again
    Reset { campaign: String, user: String },
    /// Export results as CSV
    Export {
        campaign: String,
        outfile: PathBuf,
        /// Include REF and BAD items
        #[arg(long)]
        extended: bool,
        /// One record per system of a multi-system candidate
        #[arg(long)]
        expand_systems: bool,
        #[arg(long)]
        include_inactive: bool,
        #[arg(long)]
        completed_only: bool,
    },
}

fn campaign_id(store: &Store, name: &str) -> Result<Id> {
    Ok(store.campaign_by_name(name)?.id)
}

fn secret_key(fallback: &Option<String>) -> Result<String> {
    env::var(SECRET_KEY_VAR)
        .ok()
        .or_else(|| fallback.clone())
        .ok_or_else(|| errors::invalid_argument(format!("set {SECRET_KEY_VAR} or --secret-key")))
}

fn next(store: Store, campaign: &str, user: &str, language: &Option<String>) -> Result<Store> {
    let id = campaign_id(&store, campaign)?;
    let mut task = dispatch::get_task_for_user(&store, Some(id), user)?;
    let shared = SharedStore::new(store);
    if task.is_none() {
        if let Some(code) = language {
            task = dispatch::claim_next_free_task(&shared, code, id, user)?;
        }
    }
    let store = shared.snapshot()?;
    match task {
        None => println!("{}", serde_json::json!({ "task": null, "item": null })),
        Some(task) => {
            let item = dispatch::next_item_for_user(&store, task, user)?;
            println!(
                "{}",
                serde_json::json!({ "task": task, "item": item.map(|i| i.id), "content": item.map(|i| &i.content) })
            );
        }
    }
    Ok(store)
}

/// Returns true if the store changed.
fn run(store: &mut Store, command: &Command) -> Result<bool> {
    match command {
        Command::Create { manifest, owner } => {
            let manifest = Manifest::load(manifest)?;
            campaign::create_campaign(store, &manifest, owner)?;
            Ok(true)
        }
        Command::Import {
            campaign,
            batch,
            task_type,
            max_count,
            domain,
            corpus_name,
        } => {
            let id = campaign_id(store, campaign)?;
            let kind: TaskKind = task_type.parse()?;
            let mut options = ImportOptions {
                max_count: *max_count,
                ..ImportOptions::default()
            };
            if let Some(domain) = domain {
                options.domain = domain.clone();
            }
            if let Some(corpus) = corpus_name {
                options.corpus_name = corpus.clone();
            }
            let report = ingest::import_batch(store, id, kind, batch, &options)?;
            println!(
                "batch {}: {} tasks, {} items, {} skipped",
                report.batch,
                report.tasks.len(),
                report.items,
                report.skipped
            );
            Ok(true)
        }
        Command::Activate { batch, owner } => {
            let n = ingest::activate_batch(store, *batch, owner)?;
            println!("activated {n} tasks");
            Ok(true)
        }
        Command::Init {
            manifest,
            owner,
            only_activated,
        } => {
            let manifest = Manifest::load(manifest)?;
            let report = campaign::init_campaign(store, &manifest, owner, *only_activated)?;
            for pair in &report.skipped_pairs {
                warn!(target: "humeval", "{pair}: no tasks yet");
            }
            println!(
                "{} users created, {} open and {} completed agenda entries",
                report.users_created, report.opened, report.completed
            );
            Ok(true)
        }
        Command::Credentials { manifest } => {
            let manifest = Manifest::load(manifest)?;
            println!("username,password,url");
            for c in campaign::credentials(&manifest) {
                println!("{},{},{}", c.username, c.password, c.url);
            }
            Ok(false)
        }
        Command::Next { .. } => Ok(false),
        Command::Submit {
            user,
            task,
            item,
            score,
            score2,
            start,
            end,
        } => {
            let shared = SharedStore::new(store.clone());
            let submission = Submission {
                task: *task,
                item: *item,
                score: *score,
                score2: *score2,
                start_time: *start,
                end_time: *end,
            };
            let id = dispatch::submit_result(&shared, user, &submission)?;
            *store = shared.snapshot()?;
            println!("result {id}");
            Ok(true)
        }
        Command::Tokens {
            campaign,
            users,
            qc,
            p_value,
            secret_key: fallback,
        } => {
            let id = campaign_id(store, campaign)?;
            let secret = secret_key(fallback)?;
            let settings = QcSettings {
                p_value: *p_value,
                ..QcSettings::default()
            };
            let qc = qc.then_some(&settings);
            let users: Vec<String> = if users.is_empty() {
                store
                    .agendas
                    .iter()
                    .filter(|a| a.campaign == id)
                    .map(|a| a.user.clone())
                    .collect()
            } else {
                users.clone()
            };
            for user in users {
                match reliability::completion_token(store, id, &user, &secret, qc)? {
                    Some(token) => println!("{user},{token}"),
                    None => info!(target: "humeval", "{user}: agenda not finished"),
                }
            }
            Ok(false)
        }
        Command::Unlink => {
            let n = dispatch::unlink_stale_assignments(store, Utc::now());
            println!("released {n} assignments");
            Ok(n > 0)
        }
        Command::Reset { campaign, user } => {
            let id = campaign_id(store, campaign)?;
            let outcome = agenda::reset_taskagenda(store, user, id);
            match outcome.severity {
                Severity::Error => return Err(errors::invalid_state(outcome.message)),
                Severity::Warning => warn!(target: "humeval", "{}", outcome.message),
                Severity::Info => info!(target: "humeval", "{}", outcome.message),
            }
            Ok(outcome.ok)
        }
        Command::Export {
            campaign,
            outfile,
            extended,
            expand_systems,
            include_inactive,
            completed_only,
        } => {
            let id = campaign_id(store, campaign)?;
            let options = ExtractOptions {
                extended: *extended,
                expand_systems: *expand_systems,
                include_inactive: *include_inactive,
                completed_only: *completed_only,
            };
            let records = records::extract(store, id, &options)?;
            records::write_csv_file(outfile, &records)?;
            Ok(false)
        }
    }
}

fn process(args: &Args) -> Result<()> {
    let mut store = Store::load_or_default(&args.store)?;
    if let Command::Next {
        campaign,
        user,
        language,
    } = &args.command
    {
        let store = next(store, campaign, user, language)?;
        return store.save(&args.store);
    }
    if run(&mut store, &args.command)? {
        store.save(&args.store)?;
    }
    Ok(())
}

fn main() {
    let args = Args::parse();
    pretty_env_logger::formatted_timed_builder()
        .filter_level(args.verbose.log_level_filter())
        .init();
    match process(&args) {
        Ok(()) => (),
        Err(e) => {
            error!(target: "humeval", "{e}");
            process::exit(1);
        }
    }
}
