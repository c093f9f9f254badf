//! cronkeep - manage crontab jobs through a validated store.
//!
//! Usage:
//!   cronkeep list                 List stored jobs
//!   cronkeep add -s <expr> -c <cmd>  Store a new job
//!   cronkeep publish              Compile and install the crontab
//!   cronkeep next <id>            Preview upcoming runs of a job

use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use cronkeep::{
    Installer, JobDraft, JobId, JobPatch, JobStore, Mailing, Schedule, Settings,
    StorageConfig, StoreError, parse_crontab, validation,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

const DEFAULT_CONFIG: &str = "/etc/cronkeep/cronkeep.yaml";

/// cronkeep - validated crontab job manager
#[derive(Parser)]
#[command(name = "cronkeep")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Settings file (default: /etc/cronkeep/cronkeep.yaml when present)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override the configured storage backend
    #[arg(long, global = true, value_enum)]
    storage: Option<BackendKind>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BackendKind {
    Sqlite,
    Redis,
    Memory,
}

#[derive(Subcommand)]
enum Commands {
    /// List stored jobs, newest first
    List,

    /// Show a job as JSON
    Show {
        #[arg(value_name = "JOB_ID")]
        id: String,
    },

    /// Store a new job
    Add {
        /// Macro or 5/6-field cron expression
        #[arg(short, long)]
        schedule: String,

        /// Shell command to run
        #[arg(short, long)]
        command: String,

        #[arg(short, long)]
        name: Option<String>,

        /// Append captured output to log files
        #[arg(long)]
        logging: bool,

        /// Command fed the job's stdout after each run
        #[arg(long)]
        hook: Option<String>,

        #[arg(long)]
        mail_on_error: bool,

        #[arg(long)]
        mail_on_success: bool,

        /// Store the job without installing it
        #[arg(long)]
        stopped: bool,
    },

    /// Change fields of a job
    Edit {
        #[arg(value_name = "JOB_ID")]
        id: String,

        #[arg(short, long)]
        schedule: Option<String>,

        #[arg(short, long)]
        command: Option<String>,

        #[arg(short, long)]
        name: Option<String>,

        #[arg(long)]
        logging: Option<bool>,

        #[arg(long, conflicts_with = "clear_hook")]
        hook: Option<String>,

        /// Remove the job's hook
        #[arg(long)]
        clear_hook: bool,

        #[arg(long)]
        mail_on_error: Option<bool>,

        #[arg(long)]
        mail_on_success: Option<bool>,
    },

    /// Stop a job; it stays stored but is not installed
    Stop {
        #[arg(value_name = "JOB_ID")]
        id: String,
    },

    /// Start a stopped job
    Start {
        #[arg(value_name = "JOB_ID")]
        id: String,
    },

    /// Delete a job
    Remove {
        #[arg(value_name = "JOB_ID")]
        id: String,
    },

    /// Print the shared environment, or replace it from a file
    Env {
        #[arg(long, value_name = "FILE")]
        set: Option<PathBuf>,
    },

    /// Print the crontab text publish would install
    Compile,

    /// Compile, write and install the crontab
    Publish {
        /// Store this environment file before publishing
        #[arg(long, value_name = "FILE")]
        env: Option<PathBuf>,
    },

    /// Check values without storing anything
    Validate {
        #[arg(short, long)]
        schedule: Option<String>,

        #[arg(short, long)]
        command: Option<String>,

        #[arg(short, long)]
        name: Option<String>,
    },

    /// Store the jobs found in an existing crontab file
    Import {
        #[arg(value_name = "CRONTAB_FILE")]
        file: PathBuf,

        /// Also replace the stored environment with the file's assignments
        #[arg(long)]
        with_env: bool,
    },

    /// List available database backups
    Backups,

    /// Show recorded runs of a job
    Runs {
        #[arg(value_name = "JOB_ID")]
        id: String,

        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },

    /// Preview upcoming occurrences of a job's schedule
    Next {
        #[arg(value_name = "JOB_ID")]
        id: String,

        #[arg(short = 'n', long, default_value = "5")]
        count: usize,
    },
}

impl Commands {
    /// Whether the command changes stored state.
    fn mutates(&self) -> bool {
        matches!(
            self,
            Commands::Add { .. }
                | Commands::Edit { .. }
                | Commands::Stop { .. }
                | Commands::Start { .. }
                | Commands::Remove { .. }
                | Commands::Env { set: Some(_) }
                | Commands::Import { .. }
        )
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    let settings = load_settings(cli.config.as_deref(), cli.storage)?;

    if let Commands::Validate {
        schedule,
        command,
        name,
    } = &cli.command
    {
        return validate_values(&settings, schedule.as_deref(), command.as_deref(), name.as_deref());
    }

    let store = Arc::new(JobStore::from_settings(&settings).await?);
    let autosave = settings.autosave && cli.command.mutates();

    match cli.command {
        Commands::List => list_jobs(&store).await?,
        Commands::Show { id } => {
            let job = require_job(&store, &id).await?;
            println!("{}", serde_json::to_string_pretty(&job)?);
        }
        Commands::Add {
            schedule,
            command,
            name,
            logging,
            hook,
            mail_on_error,
            mail_on_success,
            stopped,
        } => {
            let mut draft = JobDraft::new(command, schedule)
                .with_logging(logging)
                .with_stopped(stopped)
                .with_mailing(mailing_flags(Mailing::default(), Some(mail_on_error), Some(mail_on_success)));
            if let Some(name) = name {
                draft = draft.with_name(name);
            }
            if let Some(hook) = hook {
                draft = draft.with_hook(hook);
            }
            let job = store.create(draft).await?;
            println!("{}", job.id);
        }
        Commands::Edit {
            id,
            schedule,
            command,
            name,
            logging,
            hook,
            clear_hook,
            mail_on_error,
            mail_on_success,
        } => {
            let id = JobId::new(id);
            let mailing = if mail_on_error.is_some() || mail_on_success.is_some() {
                let current = require_job(&store, id.as_str()).await?;
                Some(mailing_flags(current.mailing, mail_on_error, mail_on_success))
            } else {
                None
            };
            let patch = JobPatch {
                name,
                command,
                schedule,
                stopped: None,
                logging,
                mailing,
                hook: if clear_hook { Some(None) } else { hook.map(Some) },
            };
            if patch.is_empty() {
                warn!("Nothing to change for job '{}'", id);
                return Ok(());
            }
            store.update(&id, patch).await?;
            info!("Updated job '{}'", id);
        }
        Commands::Stop { id } => {
            store.set_stopped(&JobId::new(id.as_str()), true).await?;
            info!("Stopped job '{}'", id);
        }
        Commands::Start { id } => {
            store.set_stopped(&JobId::new(id.as_str()), false).await?;
            info!("Started job '{}'", id);
        }
        Commands::Remove { id } => {
            store.delete(&JobId::new(id.as_str())).await?;
            info!("Removed job '{}'", id);
        }
        Commands::Env { set: Some(path) } => {
            store.set_environment(&read_file(&path)?).await?;
            info!("Environment replaced from {}", path.display());
        }
        Commands::Env { set: None } => {
            print!("{}", ensure_newline(&store.environment().await?));
        }
        Commands::Compile => {
            let installer = Installer::from_settings(store.clone(), &settings)?;
            let compiled = installer.preview().await?;
            for skip in &compiled.skipped {
                warn!("{}", skip);
            }
            print!("{}", compiled.text);
        }
        Commands::Publish { env } => {
            let env = env.as_deref().map(read_file).transpose()?;
            publish(&store, &settings, env.as_deref()).await?;
        }
        Commands::Validate { .. } => {}
        Commands::Import { file, with_env } => {
            import_crontab(&store, &file, with_env).await?;
        }
        Commands::Backups => {
            let backups = store.backups().await?;
            if backups.is_empty() {
                println!("No backups found");
            }
            for backup in &backups {
                let location = backup
                    .path
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default();
                println!("{}  {}  {}", backup.created.to_rfc3339(), backup.name, location);
            }
        }
        Commands::Runs { id, limit } => {
            let id = JobId::new(id);
            let runs = store.runs(&id, limit).await?;
            if runs.is_empty() {
                println!("No runs recorded for job '{}'", id);
            }
            for run in &runs {
                let exit = run
                    .exit_code
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!("{}  started {}  exit {}", run.id, run.started_at.to_rfc3339(), exit);
            }
        }
        Commands::Next { id, count } => {
            let job = require_job(&store, &id).await?;
            let schedule = Schedule::with_timezone(job.schedule.as_str(), settings.timezone.as_str())?;
            if schedule.is_reboot() {
                println!("{} runs only at boot", job.display_name());
            }
            for at in schedule.next_n_after(Utc::now(), count)? {
                println!("{}", at.to_rfc3339());
            }
        }
    }

    let outcome = if autosave {
        publish(&store, &settings, None).await
    } else {
        Ok(())
    };
    store.flush_mirror().await;
    outcome
}

/// Load settings from `--config`, the default location or built-in defaults.
fn load_settings(
    path: Option<&Path>,
    backend: Option<BackendKind>,
) -> Result<Settings, Box<dyn std::error::Error>> {
    let mut settings = match path {
        Some(path) => Settings::load(path)?,
        None if Path::new(DEFAULT_CONFIG).exists() => Settings::load(DEFAULT_CONFIG)?,
        None => Settings::default(),
    };

    match backend {
        Some(BackendKind::Memory) => settings.storage = StorageConfig::Memory,
        Some(BackendKind::Sqlite) if settings.storage.kind() != "sqlite" => {
            settings.storage = StorageConfig::default();
        }
        Some(BackendKind::Redis) if settings.storage.kind() != "redis" => {
            return Err("--storage redis requires a redis url in the settings file".into());
        }
        _ => {}
    }

    Ok(settings)
}

async fn require_job(store: &JobStore, id: &str) -> Result<cronkeep::Job, StoreError> {
    let id = JobId::new(id);
    store.get(&id).await?.ok_or(StoreError::NotFound(id))
}

fn mailing_flags(mut mailing: Mailing, on_error: Option<bool>, on_success: Option<bool>) -> Mailing {
    match on_error {
        Some(true) => mailing.on_error = Some(true),
        Some(false) => mailing.on_error = None,
        None => {}
    }
    match on_success {
        Some(true) => mailing.on_success = Some(true),
        Some(false) => mailing.on_success = None,
        None => {}
    }
    mailing
}

fn read_file(path: &Path) -> Result<String, std::io::Error> {
    std::fs::read_to_string(path)
}

fn ensure_newline(text: &str) -> String {
    if text.is_empty() || text.ends_with('\n') {
        text.to_string()
    } else {
        format!("{}\n", text)
    }
}

/// List stored jobs.
async fn list_jobs(store: &JobStore) -> Result<(), StoreError> {
    let jobs = store.list().await?;

    if jobs.is_empty() {
        println!("No jobs stored");
        return Ok(());
    }

    for job in &jobs {
        let state = if job.stopped { "stopped" } else { "active" };
        let saved = if job.saved { "saved" } else { "unsaved" };
        println!("{}  {:<7} {:<7}  {}", job.id, state, saved, job.display_name());
        println!("    {}  {}", job.schedule, job.command);
    }

    Ok(())
}

/// Run a publish and report what was installed.
async fn publish(
    store: &Arc<JobStore>,
    settings: &Settings,
    env: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let installer = Installer::from_settings(store.clone(), settings)?;

    match installer.publish(env).await {
        Ok(report) => {
            for skip in &report.skipped {
                warn!("{}", skip);
            }
            info!(
                "Published {} job(s) to {} ({} marked saved)",
                report.included.len(),
                report.schedule_path.display(),
                report.marked
            );
            Ok(())
        }
        Err(e) => {
            error!("Publish failed: {}", e);
            Err(e.into())
        }
    }
}

/// Check individual values against the validation rules.
fn validate_values(
    settings: &Settings,
    schedule: Option<&str>,
    command: Option<&str>,
    name: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    if schedule.is_none() && command.is_none() && name.is_none() {
        return Err("nothing to validate: pass --schedule, --command or --name".into());
    }

    if let Some(schedule) = schedule {
        validation::check_schedule(schedule, &settings.timezone)?;
        println!("schedule: OK");
    }
    if let Some(command) = command {
        validation::check_command(command)?;
        println!("command: OK");
    }
    if let Some(name) = name {
        validation::check_name(name)?;
        println!("name: OK");
    }

    Ok(())
}

/// Store every job line of a crontab file.
async fn import_crontab(
    store: &JobStore,
    file: &Path,
    with_env: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let imported = parse_crontab(&read_file(file)?);

    for line in &imported.unrecognized {
        warn!("{}:{}: not a job or assignment, skipped", file.display(), line);
    }

    if with_env && !imported.environment.is_blank() {
        store.set_environment(imported.environment.as_str()).await?;
        info!("Environment replaced from {}", file.display());
    } else if !imported.environment.is_blank() {
        let count = imported.environment.assignment_lines().count();
        info!("Ignoring {} environment assignment(s); pass --with-env to store them", count);
    }

    let mut stored = 0;
    for draft in imported.drafts {
        let command = draft.command.clone();
        match store.create(draft).await {
            Ok(job) => {
                stored += 1;
                println!("{}", job.id);
            }
            Err(StoreError::Validation(e)) => warn!("Rejected '{}': {}", command, e),
            Err(e) => return Err(e.into()),
        }
    }

    info!("Imported {} job(s) from {}", stored, file.display());
    Ok(())
}
