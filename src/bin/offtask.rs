use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};

use offtask::{
    Connectivity, Database, HttpGateway, SyncCoordinator, Task, TaskClient, TaskPayload,
    TaskStatus,
};

const DEFAULT_API_URL: &str = "http://localhost:3000/api/v1";

#[derive(Parser)]
#[command(name = "offtask", about = "Offline-first task manager CLI")]
struct Cli {
    /// Database path (default: ~/.offtask/offtask.db)
    #[arg(long)]
    db: Option<String>,

    /// API base URL (default: the `api_url` config key, else http://localhost:3000/api/v1)
    #[arg(long)]
    api_url: Option<String>,

    /// Treat the session as offline: mutations queue locally and sync later
    #[arg(long)]
    offline: bool,

    /// Increase logging verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a task
    Add {
        title: String,
        #[arg(long)]
        description: Option<String>,
        /// pending | in_progress | completed
        #[arg(long)]
        status: Option<String>,
        /// Due date (YYYY-MM-DD or RFC 3339)
        #[arg(long)]
        due: Option<String>,
    },
    /// List tasks, newest first
    List {
        /// Filter by status
        #[arg(long)]
        status: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a single task
    Show { id: String },
    /// Update fields on a task
    Update {
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        due: Option<String>,
    },
    /// Mark a task completed
    Complete { id: String },
    /// Delete a task
    Delete { id: String },
    /// Run one sync pass (drain the queue, then merge the server list)
    Sync,
    /// Run the background sync loop until interrupted
    Watch {
        /// Seconds between periodic sync passes
        #[arg(long, default_value = "30")]
        interval: u64,
    },
    /// Show connectivity, pending queue size, and task counts
    Status,
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Attach a file to a task (online only; uploads are not queued)
    Attach {
        id: String,
        path: std::path::PathBuf,
    },
    /// List a task's file attachments
    Files { id: String },
    /// Delete a file attachment
    Detach { id: String, file_id: i64 },
}

#[derive(Subcommand)]
enum ConfigAction {
    Get { key: String },
    Set { key: String, value: String },
    List,
}

fn parse_status(s: &str) -> anyhow::Result<TaskStatus> {
    s.parse::<TaskStatus>().map_err(|e| anyhow::anyhow!("{e}"))
}

/// Accept `YYYY-MM-DD` (midnight UTC) or a full RFC 3339 timestamp.
fn parse_due(s: &str) -> anyhow::Result<DateTime<Utc>> {
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        let midnight = date
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| anyhow::anyhow!("invalid date: {s}"))?;
        return Ok(DateTime::from_naive_utc_and_offset(midnight, Utc));
    }
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| anyhow::anyhow!("invalid due date '{s}': {e}"))
}

fn build_payload(
    title: Option<String>,
    description: Option<String>,
    status: Option<String>,
    due: Option<String>,
) -> anyhow::Result<TaskPayload> {
    Ok(TaskPayload {
        title,
        description,
        status: status.as_deref().map(parse_status).transpose()?,
        due_date: due.as_deref().map(parse_due).transpose()?,
    })
}

fn print_task(task: &Task) {
    let due = task
        .due_date
        .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".into());
    let sync = if task.synced { "" } else { "  (pending sync)" };
    println!("{:<14} {:<12} {:<10} {}{}", task.id, task.status, due, task.title, sync);
    if let Some(description) = &task.description {
        if !description.is_empty() {
            println!("{:<14} {description}", "");
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let db = match &cli.db {
        Some(path) => Database::open_at(path).await?,
        None => Database::open().await?,
    };

    let api_url = match cli.api_url.clone() {
        Some(url) => url,
        None => db
            .reader()
            .call(|conn| offtask::storage::repository::get_config(conn, "api_url"))
            .await?
            .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
    };

    let gateway: Arc<HttpGateway> = Arc::new(HttpGateway::new(&api_url)?);
    let connectivity = Connectivity::new(!cli.offline);
    let client = TaskClient::new(db.clone(), gateway.clone(), connectivity.clone());

    match cli.command {
        Commands::Add {
            title,
            description,
            status,
            due,
        } => {
            let payload = build_payload(Some(title), description, status, due)?;
            let task = client.create_task(payload).await?;
            if task.synced {
                println!("Created task {}", task.id);
            } else {
                println!("Created task {} (offline, will sync later)", task.id);
            }
        }
        Commands::List { status, json } => {
            let filter = status.as_deref().map(parse_status).transpose()?;
            let mut tasks = client.load_tasks().await?;
            if let Some(filter) = filter {
                tasks.retain(|t| t.status == filter);
            }
            tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            if json {
                println!("{}", serde_json::to_string_pretty(&tasks)?);
            } else if tasks.is_empty() {
                println!("No tasks.");
            } else {
                for task in &tasks {
                    print_task(task);
                }
            }
        }
        Commands::Show { id } => match client.get_task(&id).await? {
            Some(task) => print_task(&task),
            None => anyhow::bail!("task {id} not found"),
        },
        Commands::Update {
            id,
            title,
            description,
            status,
            due,
        } => {
            let payload = build_payload(title, description, status, due)?;
            let task = client.update_task(&id, payload).await?;
            if task.synced {
                println!("Updated task {}", task.id);
            } else {
                println!("Updated task {} (will sync later)", task.id);
            }
        }
        Commands::Complete { id } => {
            let payload = TaskPayload {
                status: Some(TaskStatus::Completed),
                ..Default::default()
            };
            let task = client.update_task(&id, payload).await?;
            println!("Completed task {}", task.id);
        }
        Commands::Delete { id } => {
            client.delete_task(&id).await?;
            println!("Deleted task {id}");
        }
        Commands::Sync => match client.sync().await? {
            Some(report) => {
                println!(
                    "Sync finished ({:?}): {} replayed, {} failed, {} dropped, {} merged",
                    report.status(),
                    report.replayed,
                    report.failed,
                    report.dropped,
                    report.merged
                );
            }
            None => println!("Sync skipped (offline or already running)"),
        },
        Commands::Watch { interval } => {
            let coordinator = SyncCoordinator::new(db, gateway, connectivity)
                .with_tick(std::time::Duration::from_secs(interval));
            println!("Watching for changes (sync every {interval}s, Ctrl-C to stop)");
            coordinator.run().await;
        }
        Commands::Status => {
            let pending = client.pending_sync_count().await?;
            let tasks = client
                .db()
                .reader()
                .call(|conn| offtask::storage::repository::list_tasks(conn))
                .await?;
            let unsynced = tasks.iter().filter(|t| !t.synced).count();
            println!(
                "Connectivity: {}",
                if connectivity.is_online() { "online" } else { "offline" }
            );
            println!("API:          {api_url}");
            println!("Tasks:        {} ({} pending sync)", tasks.len(), unsynced);
            println!("Queue:        {pending} operation(s) pending");
        }
        Commands::Config { action } => match action {
            ConfigAction::Get { key } => match client.config_get(&key).await? {
                Some(value) => println!("{value}"),
                None => println!("(not set)"),
            },
            ConfigAction::Set { key, value } => {
                client.config_set(&key, &value).await?;
                println!("Set {key}");
            }
            ConfigAction::List => {
                for (key, value) in client.config_list().await? {
                    println!("{key} = {value}");
                }
            }
        },
        Commands::Attach { id, path } => {
            let bytes = std::fs::read(&path)?;
            let filename = path
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| anyhow::anyhow!("invalid file name: {}", path.display()))?;
            let file_id = client.attach_file(&id, filename, bytes).await?;
            println!("Attached {filename} as file {file_id}");
        }
        Commands::Files { id } => {
            let files = client.list_files(&id).await?;
            if files.is_empty() {
                println!("No files.");
            } else {
                for file in files {
                    println!(
                        "{:<6} {:<30} {:>10}  {}",
                        file.id,
                        file.filename,
                        file.byte_size.map(|b| b.to_string()).unwrap_or_default(),
                        file.url.unwrap_or_default()
                    );
                }
            }
        }
        Commands::Detach { id, file_id } => {
            client.delete_file(&id, file_id).await?;
            println!("Deleted file {file_id}");
        }
    }

    Ok(())
}
