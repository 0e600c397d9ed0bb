//! workq CLI: queue now, process now.
//!
//! Loads JSON payloads into an in-memory queue and drains it through an
//! executable hook, one process per item.

use clap::{Parser, Subcommand};
use serde_json::Value;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command as HookCommand;
use tracing::{debug, info, warn};
use workq::config::Config;
use workq::model::Item;
use workq::queue::{QueueFactory, QueueSettings, QueueStore, lease_from_secs};
use workq::runner::{Disposition, DrainReport, Handler, Runner, RunnerConfig};
use workq::telemetry::{TelemetryConfig, init_telemetry};

/// Hook exit status that suspends the queue instead of retrying the item.
const EX_TEMPFAIL: i32 = 75;

#[derive(Parser)]
#[command(name = "workq", about = "Lease-based work queue runner")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Queue one item per JSON line and process them through a hook
    Run {
        /// JSON-lines file with one payload per line ("-" for stdin)
        #[arg(long)]
        input: PathBuf,
        /// Executable run once per item
        #[arg(long)]
        command: PathBuf,
        /// Queue name
        #[arg(long, default_value = "default")]
        queue: String,
        /// Lease per claim in seconds (overrides settings and env)
        #[arg(long)]
        lease: Option<i64>,
        /// Claims before a failing item is dropped
        #[arg(long)]
        max_attempts: Option<u32>,
        /// Stop claiming new items after this many seconds
        #[arg(long)]
        time_limit: Option<u64>,
        /// Directory of queue settings TOML files
        #[arg(long)]
        queues_dir: Option<PathBuf>,
    },
    /// Validate queue settings files and print them
    Check {
        /// Directory of queue settings TOML files
        #[arg(long, default_value = "queues")]
        queues_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            input,
            command,
            queue,
            lease,
            max_attempts,
            time_limit,
            queues_dir,
        } => {
            let opts = RunOptions {
                input,
                command,
                queue,
                lease,
                max_attempts,
                time_limit: time_limit.map(Duration::from_secs),
                queues_dir,
            };
            cmd_run(opts).await
        }
        Command::Check { queues_dir } => cmd_check(&queues_dir),
    }
}

struct RunOptions {
    input: PathBuf,
    command: PathBuf,
    queue: String,
    lease: Option<i64>,
    max_attempts: Option<u32>,
    time_limit: Option<Duration>,
    queues_dir: Option<PathBuf>,
}

async fn cmd_run(opts: RunOptions) -> anyhow::Result<()> {
    let config = Config::from_env()?;
    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "workq".to_string(),
        filter: config.log_level.clone(),
    })?;

    let settings = match opts.queues_dir {
        Some(ref dir) => QueueSettings::load_from_dir(dir)?,
        None => Vec::new(),
    };
    let has_settings = settings.iter().any(|s| s.name == opts.queue);
    let factory: QueueFactory<Value> = QueueFactory::new().with_settings(settings);
    let queue = factory.get(&opts.queue)?;

    let payloads = read_payloads(&opts.input)?;
    for payload in payloads {
        queue.create_item(payload)?;
    }
    info!(queue = %opts.queue, items = queue.number_of_items()?, "items queued");

    let mut runner_config = RunnerConfig::from(&config);
    // --lease, then the queue's settings file, then WORKQ_LEASE_SECS.
    runner_config.lease = match opts.lease {
        Some(secs) => Some(lease_from_secs(secs)?),
        None if has_settings => None,
        None => Some(config.lease),
    };
    if let Some(n) = opts.max_attempts {
        anyhow::ensure!(n > 0, "--max-attempts must be at least 1");
        runner_config.max_attempts = n;
    }
    runner_config.time_limit = opts.time_limit;

    let handler = Arc::new(HookHandler {
        queue: opts.queue.clone(),
        command: opts.command,
    });
    let store: Arc<dyn QueueStore<Value>> = queue.clone();
    let runner = Runner::new(store, handler, runner_config);

    let ctrl = runner.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        ctrl.shutdown();
    });

    // Retried items only come back after a drain ends, so keep draining
    // until every item is done or dropped.
    let started = Instant::now();
    let mut total = DrainReport::default();
    loop {
        let report = runner.drain().await?;
        total.processed += report.processed;
        total.retried += report.retried;
        total.abandoned += report.abandoned;
        total.suspended |= report.suspended;

        let out_of_time = opts.time_limit.is_some_and(|limit| started.elapsed() >= limit);
        if report.is_idle() || report.suspended || out_of_time || queue.number_of_items()? == 0 {
            break;
        }
    }

    println!("Queue:      {}", opts.queue);
    println!("Processed:  {}", total.processed);
    println!("Retried:    {}", total.retried);
    println!("Dropped:    {}", total.abandoned);
    println!("Suspended:  {}", if total.suspended { "yes" } else { "no" });
    println!("Remaining:  {}", queue.number_of_items()?);

    Ok(())
}

fn cmd_check(queues_dir: &Path) -> anyhow::Result<()> {
    let settings = QueueSettings::load_from_dir(queues_dir)?;

    if settings.is_empty() {
        println!("No queue settings found in {}.", queues_dir.display());
        return Ok(());
    }

    println!("{:<24}  {:>6}  POLICY", "QUEUE", "LEASE");
    println!("{}", "-".repeat(56));
    for s in &settings {
        println!("{:<24}  {:>5}s  {}", s.name, s.lease_secs, s.policy);
    }
    println!("\n{} queue(s)", settings.len());
    Ok(())
}

/// One payload per non-blank line.
fn read_payloads(input: &Path) -> anyhow::Result<Vec<Value>> {
    let reader: Box<dyn BufRead> = if input == Path::new("-") {
        Box::new(std::io::stdin().lock())
    } else {
        Box::new(std::io::BufReader::new(std::fs::File::open(input)?))
    };

    let mut payloads = Vec::new();
    for (n, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let value = serde_json::from_str(&line)
            .map_err(|e| anyhow::anyhow!("{}:{}: invalid JSON: {e}", input.display(), n + 1))?;
        payloads.push(value);
    }
    Ok(payloads)
}

/// Runs an executable per item with the payload in its environment.
struct HookHandler {
    queue: String,
    command: PathBuf,
}

impl HookHandler {
    fn resolved_command(&self) -> std::io::Result<PathBuf> {
        if self.command.is_relative() && self.command.components().count() > 1 {
            Ok(std::env::current_dir()?.join(&self.command))
        } else {
            Ok(self.command.clone())
        }
    }
}

impl Handler<Value> for HookHandler {
    async fn handle(&self, item: &Item<Value>) -> Disposition {
        let command = match self.resolved_command() {
            Ok(c) => c,
            Err(e) => return Disposition::Suspend(format!("cannot resolve hook: {e}")),
        };
        debug!(id = %item.id, command = %command.display(), "running hook");

        let status = HookCommand::new(&command)
            .env("WORKQ_QUEUE", &self.queue)
            .env("WORKQ_ITEM_ID", item.id.to_string())
            .env("WORKQ_PAYLOAD", item.payload.to_string())
            .status()
            .await;

        match status {
            Ok(status) if status.success() => Disposition::Done,
            Ok(status) if status.code() == Some(EX_TEMPFAIL) => {
                Disposition::Suspend(format!("hook asked to suspend (exit {EX_TEMPFAIL})"))
            }
            Ok(status) => Disposition::Retry(format!(
                "hook exited with status {}",
                status.code().unwrap_or(-1)
            )),
            Err(e) => {
                warn!(command = %command.display(), "hook failed to start: {e}");
                Disposition::Suspend(format!("hook failed to start: {e}"))
            }
        }
    }
}
