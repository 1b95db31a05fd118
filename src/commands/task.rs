//! `taskd task list|show|create|update|delete|run|results|clear-results`.

use clap::{Arg, ArgAction, ArgMatches, Command};
use std::sync::Arc;
use std::time::Duration;

use taskd_core::task::{EventType, NewTask, Task, TaskId, TriggerType};
use taskd_core::{api, Store};

pub fn command() -> Command {
    Command::new("task")
        .about("Manage scheduled and event-driven tasks")
        .subcommand(Command::new("list").about("List all tasks"))
        .subcommand(
            Command::new("show")
                .about("Show one task")
                .arg(id_arg()),
        )
        .subcommand(
            Command::new("create")
                .about("Create a task")
                .args(definition_args(false)),
        )
        .subcommand(
            Command::new("update")
                .about("Update a task (unset fields keep their current value)")
                .arg(id_arg())
                .args(definition_args(true)),
        )
        .subcommand(
            Command::new("delete")
                .about("Delete a task")
                .arg(id_arg()),
        )
        .subcommand(
            Command::new("run")
                .about("Fire a task immediately and wait for it to finish")
                .arg(id_arg()),
        )
        .subcommand(
            Command::new("results")
                .about("Show recent execution results for a task")
                .arg(id_arg())
                .arg(
                    Arg::new("limit")
                        .long("limit")
                        .value_name("N")
                        .default_value("20"),
                ),
        )
        .subcommand(
            Command::new("clear-results")
                .about("Delete all execution history for a task")
                .arg(id_arg()),
        )
}

fn id_arg() -> Arg {
    Arg::new("id").value_name("ID").required(true)
}

fn definition_args(optional_name: bool) -> Vec<Arg> {
    vec![
        Arg::new("name")
            .long("name")
            .value_name("NAME")
            .required(!optional_name),
        Arg::new("account")
            .long("account")
            .value_name("ACCOUNT")
            .help("OS account the script runs as"),
        Arg::new("trigger-type")
            .long("trigger-type")
            .value_name("schedule|event"),
        Arg::new("schedule")
            .long("schedule")
            .value_name("CRON")
            .help("5-field cron expression, required when trigger-type=schedule"),
        Arg::new("event-type")
            .long("event-type")
            .value_name("script|system_boot|system_shutdown"),
        Arg::new("condition-script")
            .long("condition-script")
            .value_name("SCRIPT")
            .help("probe script, required when event-type=script"),
        Arg::new("condition-interval")
            .long("condition-interval")
            .value_name("SECONDS"),
        Arg::new("script")
            .long("script")
            .value_name("SCRIPT")
            .help("shell/PowerShell body to execute on fire"),
        Arg::new("pre-task-ids")
            .long("pre-task-ids")
            .value_name("ID,ID,...")
            .help("comma-separated prerequisite task ids"),
        Arg::new("inactive")
            .long("inactive")
            .action(ArgAction::SetTrue)
            .help("create/update as disabled"),
    ]
}

pub async fn run(matches: &ArgMatches, config_path: Option<&str>) -> anyhow::Result<()> {
    let (store, _config) = super::open_store(config_path)?;
    match matches.subcommand() {
        Some(("list", _)) => cmd_list(store.as_ref()).await,
        Some(("show", sub)) => cmd_show(store.as_ref(), parse_id(sub)?).await,
        Some(("create", sub)) => cmd_create(store.as_ref(), sub).await,
        Some(("update", sub)) => cmd_update(store.as_ref(), parse_id(sub)?, sub).await,
        Some(("delete", sub)) => cmd_delete(store.as_ref(), parse_id(sub)?).await,
        Some(("run", sub)) => cmd_run(&store, parse_id(sub)?, config_path).await,
        Some(("results", sub)) => cmd_results(store.as_ref(), parse_id(sub)?, sub).await,
        Some(("clear-results", sub)) => cmd_clear_results(store.as_ref(), parse_id(sub)?).await,
        _ => {
            eprintln!("Unknown task subcommand. Use --help for usage.");
            std::process::exit(1)
        }
    }
}

fn parse_id(matches: &ArgMatches) -> anyhow::Result<TaskId> {
    let raw = matches.get_one::<String>("id").expect("id is required");
    Ok(TaskId(raw.parse()?))
}

async fn cmd_list(store: &Store) -> anyhow::Result<()> {
    let tasks = api::list_tasks(store).await?;
    if tasks.is_empty() {
        println!("No tasks.");
        return Ok(());
    }
    println!(
        "{:<5} {:<20} {:<10} {:<8} {:<10} {:<20}",
        "ID", "NAME", "TRIGGER", "ACTIVE", "STATUS", "NEXT RUN"
    );
    println!("{}", "-".repeat(80));
    for t in &tasks {
        let next = t
            .task
            .next_run_at
            .map(|ts| ts.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        let status = t
            .task
            .last_status
            .map(|s| s.as_str().to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<5} {:<20} {:<10} {:<8} {:<10} {:<20}",
            t.task.id,
            truncate(&t.task.name, 18),
            t.task.trigger_type.as_str(),
            t.task.is_active,
            status,
            next,
        );
    }
    Ok(())
}

async fn cmd_show(store: &Store, id: TaskId) -> anyhow::Result<()> {
    match store.get_task(id).await? {
        Some(task) => {
            println!("{}", serde_json::to_string_pretty(&task)?);
            Ok(())
        }
        None => {
            eprintln!("task {id} not found");
            std::process::exit(1)
        }
    }
}

async fn cmd_create(store: &Store, sub: &ArgMatches) -> anyhow::Result<()> {
    let new = build_new_task(sub, None)?;
    let task = api::create_task(store, new).await?;
    println!("created task {}", task.id);
    Ok(())
}

async fn cmd_update(store: &Store, id: TaskId, sub: &ArgMatches) -> anyhow::Result<()> {
    let existing = store
        .get_task(id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("task {id} not found"))?;
    let new = build_new_task(sub, Some(&existing))?;
    api::update_task(store, id, new).await?;
    println!("updated task {id}");
    Ok(())
}

async fn cmd_delete(store: &Store, id: TaskId) -> anyhow::Result<()> {
    if api::delete_task(store, id).await? {
        println!("deleted task {id}");
        Ok(())
    } else {
        eprintln!("task {id} not found");
        std::process::exit(1)
    }
}

/// Fires the task directly and blocks until it (and anything it cascades
/// into) finishes, since a one-off CLI invocation has no daemon around to
/// keep the process alive for it.
async fn cmd_run(store: &Arc<Store>, id: TaskId, config_path: Option<&str>) -> anyhow::Result<()> {
    let config = super::load_config(config_path)?;
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let runner = Arc::new(taskd_core::runner::Runner::new(
        store.clone(),
        tx,
        Duration::from_secs(config.task_timeout_secs),
        config.log_cap_bytes,
        config.max_concurrent_tasks,
    ));
    runner.clone().spawn_consumer(rx);

    let outcome = api::run_task(&runner, id).await?;
    println!("{outcome:?}");
    runner
        .wait_drained(Duration::from_secs(config.task_timeout_secs + 5))
        .await;
    Ok(())
}

async fn cmd_results(store: &Store, id: TaskId, sub: &ArgMatches) -> anyhow::Result<()> {
    let limit: u32 = sub.get_one::<String>("limit").unwrap().parse()?;
    let results = api::list_results(store, id, limit).await?;
    if results.is_empty() {
        println!("No results for task {id}.");
        return Ok(());
    }
    for r in &results {
        println!(
            "#{} {} started={} reason={} exit={}",
            r.id,
            r.status,
            r.started_at.format("%Y-%m-%d %H:%M:%S"),
            r.trigger_reason,
            r.exit_code.map(|c| c.to_string()).unwrap_or_else(|| "-".into()),
        );
    }
    Ok(())
}

async fn cmd_clear_results(store: &Store, id: TaskId) -> anyhow::Result<()> {
    let n = api::clear_results(store, id).await?;
    println!("cleared {n} result(s) for task {id}");
    Ok(())
}

fn build_new_task(sub: &ArgMatches, existing: Option<&Task>) -> anyhow::Result<NewTask> {
    let name = sub
        .get_one::<String>("name")
        .cloned()
        .or_else(|| existing.map(|t| t.name.clone()))
        .ok_or_else(|| anyhow::anyhow!("--name is required"))?;
    let account = sub
        .get_one::<String>("account")
        .cloned()
        .or_else(|| existing.map(|t| t.account.clone()))
        .unwrap_or_else(|| std::env::var("USER").unwrap_or_else(|_| "root".into()));
    let trigger_type = match sub.get_one::<String>("trigger-type") {
        Some(s) => s.parse::<TriggerType>().map_err(anyhow::Error::msg)?,
        None => existing.map(|t| t.trigger_type).unwrap_or(TriggerType::Schedule),
    };
    let schedule_expression = sub
        .get_one::<String>("schedule")
        .cloned()
        .or_else(|| existing.and_then(|t| t.schedule_expression.clone()));
    let event_type = match sub.get_one::<String>("event-type") {
        Some(s) => Some(s.parse::<EventType>().map_err(anyhow::Error::msg)?),
        None => existing.and_then(|t| t.event_type),
    };
    let condition_script = sub
        .get_one::<String>("condition-script")
        .cloned()
        .or_else(|| existing.and_then(|t| t.condition_script.clone()));
    let condition_interval = match sub.get_one::<String>("condition-interval") {
        Some(s) => Some(s.parse()?),
        None => existing.map(|t| t.condition_interval),
    };
    let script_body = sub
        .get_one::<String>("script")
        .cloned()
        .or_else(|| existing.map(|t| t.script_body.clone()))
        .ok_or_else(|| anyhow::anyhow!("--script is required"))?;
    let pre_task_ids = match sub.get_one::<String>("pre-task-ids") {
        Some(s) => parse_id_list(s)?,
        None => existing.map(|t| t.pre_task_ids.clone()).unwrap_or_default(),
    };
    let is_active = if sub.get_flag("inactive") {
        false
    } else {
        existing.map(|t| t.is_active).unwrap_or(true)
    };

    Ok(NewTask {
        name,
        account,
        trigger_type,
        schedule_expression,
        event_type,
        condition_script,
        condition_interval,
        script_body,
        pre_task_ids,
        is_active,
    })
}

fn parse_id_list(s: &str) -> anyhow::Result<Vec<TaskId>> {
    s.split(',')
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .map(|p| Ok(TaskId(p.parse()?)))
        .collect()
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        format!("{}…", &s[..max.saturating_sub(1)])
    }
}
