//! `taskd batch --action <delete|enable|disable|run> --ids <id,id,...>` (spec §4.6).

use clap::{Arg, ArgMatches, Command};
use std::sync::Arc;
use std::time::Duration;

use taskd_core::batch::{BatchAction, BatchOutcome, BatchRequest};
use taskd_core::task::TaskId;
use taskd_core::{api, runner::Runner};

pub fn command() -> Command {
    Command::new("batch")
        .about("Apply one action to many tasks at once")
        .arg(
            Arg::new("action")
                .long("action")
                .value_name("delete|enable|disable|run")
                .required(true),
        )
        .arg(
            Arg::new("ids")
                .long("ids")
                .value_name("ID,ID,...")
                .required(true),
        )
}

pub async fn run(matches: &ArgMatches, config_path: Option<&str>) -> anyhow::Result<()> {
    let (store, config) = super::open_store(config_path)?;

    let action = match matches.get_one::<String>("action").unwrap().as_str() {
        "delete" => BatchAction::Delete,
        "enable" => BatchAction::Enable,
        "disable" => BatchAction::Disable,
        "run" => BatchAction::Run,
        other => anyhow::bail!("unknown batch action '{other}', expected delete|enable|disable|run"),
    };
    let task_ids: Vec<TaskId> = matches
        .get_one::<String>("ids")
        .unwrap()
        .split(',')
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .map(|p| p.parse::<i64>().map(TaskId))
        .collect::<Result<_, _>>()?;

    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let runner = Arc::new(Runner::new(
        store.clone(),
        tx,
        Duration::from_secs(config.task_timeout_secs),
        config.log_cap_bytes,
        config.max_concurrent_tasks,
    ));
    runner.clone().spawn_consumer(rx);

    let req = BatchRequest { action, task_ids };
    let fires = matches!(req.action, BatchAction::Run);
    let outcome = api::run_batch_op(&store, &runner, req).await?;
    print_outcome(&outcome);

    if fires {
        runner
            .wait_drained(Duration::from_secs(config.task_timeout_secs + 5))
            .await;
    }
    Ok(())
}

fn print_outcome(outcome: &BatchOutcome) {
    match outcome {
        BatchOutcome::Delete(o) => {
            println!("deleted: {:?}", o.deleted);
            println!("missing: {:?}", o.missing);
        }
        BatchOutcome::Enable(o) | BatchOutcome::Disable(o) => {
            println!("updated: {:?}", o.updated);
            println!("unchanged: {:?}", o.unchanged);
            println!("missing: {:?}", o.missing);
        }
        BatchOutcome::Run(o) => {
            println!("queued: {:?}", o.queued);
            println!("running: {:?}", o.running);
            println!("blocked: {:?}", o.blocked);
            println!("missing: {:?}", o.missing);
        }
    }
}
