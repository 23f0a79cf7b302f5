use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use jobwrap::config::{JobwrapConfig, LogFormat};

/// Upper bound for `schedule dry-run --hours`.
const MAX_PREVIEW_HOURS: u64 = 24 * 366;

#[derive(Parser)]
#[command(
    name = "jobwrap",
    about = "Overlap-safe, fault-isolated cron job runner with run history",
    version,
    long_about = None
)]
struct Cli {
    /// Path to the TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (scheduler + history + API)
    Serve,

    /// Run one configured job now, through the full wrapper chain
    Run {
        /// Job name
        #[arg(long)]
        job: String,
    },

    /// Inspect recorded job history
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },

    /// Inspect configured schedules
    Schedule {
        #[command(subcommand)]
        action: ScheduleAction,
    },
}

#[derive(Subcommand)]
enum HistoryAction {
    /// Show when a job last completed successfully
    Last {
        /// Job name
        #[arg(long)]
        job: String,
    },

    /// List the most recent runs of a job
    List {
        /// Job name
        #[arg(long)]
        job: String,

        /// Maximum number of runs to show
        #[arg(long, default_value = "20")]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum ScheduleAction {
    /// List configured jobs
    List,

    /// Preview what will run in the next N hours
    DryRun {
        /// Hours to preview
        #[arg(long, default_value = "24")]
        hours: u64,
    },
}

/// Load the config with a plain stderr subscriber in scope, so warnings about
/// unreadable config files are not lost before logging is configured.
fn resolve_config(explicit: Option<&std::path::Path>) -> Result<JobwrapConfig> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let bootstrap = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::with_default(bootstrap, || JobwrapConfig::resolve(explicit))
}

fn init_tracing(config: &JobwrapConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match config.logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = resolve_config(cli.config.as_deref())?;
    init_tracing(&config);

    match cli.command {
        Commands::Serve => {
            tracing::info!(jobs = config.jobs.len(), "Starting jobwrap daemon");
            jobwrap::serve(config).await?;
        }
        Commands::Run { job } => {
            let job_config = config
                .job(&job)
                .with_context(|| format!("no job named '{job}' in configuration"))?
                .clone();
            let command = jobwrap::command::CommandJob::from(&job_config);

            let runtime = jobwrap::Runtime::build(&config)?;
            let record = runtime
                .chain
                .run_once(&job_config.name, || async move { command.run().await })
                .await;
            runtime.shutdown().await;

            match record {
                Some(record) => {
                    println!("{}", serde_json::to_string_pretty(&record)?);
                    if !record.succeeded {
                        std::process::exit(1);
                    }
                }
                None => println!("Job '{job}' is already running, skipped."),
            }
        }
        Commands::History { action } => {
            let history = jobwrap::history::open(&config.history)?;

            match action {
                HistoryAction::Last { job } => match history.last_completion(&job).await? {
                    Some(at) => println!("{}: last completed {}", job, at.to_rfc3339()),
                    None => println!("{}: no successful run on record", job),
                },
                HistoryAction::List { job, limit } => {
                    let runs = history.recent_runs(&job, limit).await?;
                    if runs.is_empty() {
                        println!("No runs recorded for '{}'.", job);
                    } else {
                        println!("{:<32} | {:<10} | {:<8} | Message", "Finished", "Duration", "Status");
                        println!("{:-<32}-|-{:-<10}-|-{:-<8}-|-{:-<20}", "", "", "", "");
                        for run in runs {
                            let status = if run.succeeded { "OK" } else { "FAILED" };
                            println!(
                                "{:<32} | {:<10} | {:<8} | {}",
                                run.finished.to_rfc3339(),
                                format!("{}ms", run.duration.as_millis()),
                                status,
                                run.message
                            );
                        }
                    }
                }
            }
        }
        Commands::Schedule { action } => match action {
            ScheduleAction::List => {
                if config.jobs.is_empty() {
                    println!("No jobs configured.");
                } else {
                    println!("{:<20} | {:<20} | Command", "Name", "Cron");
                    println!("{:-<20}-|-{:-<20}-|-{:-<20}", "", "", "");
                    for job in &config.jobs {
                        println!(
                            "{:<20} | {:<20} | {} {}",
                            job.name,
                            job.schedule,
                            job.command,
                            job.args.join(" ")
                        );
                    }
                }
            }
            ScheduleAction::DryRun { hours } => {
                let now = chrono::Utc::now();
                let until = now + chrono::Duration::hours(hours.min(MAX_PREVIEW_HOURS) as i64);
                let upcoming = jobwrap::scheduler::cron::preview(
                    config
                        .jobs
                        .iter()
                        .map(|job| (job.name.as_str(), job.schedule.as_str())),
                    now,
                    until,
                )?;

                if upcoming.is_empty() {
                    println!("Nothing scheduled in the next {} hours.", hours);
                } else {
                    for run in upcoming {
                        println!("{}  {}", run.at.to_rfc3339(), run.job);
                    }
                }
            }
        },
    }

    Ok(())
}
