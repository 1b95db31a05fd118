#![allow(clippy::multiple_crate_versions)]

use clap::{Arg, Command};

mod commands;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let matches = Command::new("taskd")
        .version(VERSION)
        .about("Single-process task scheduler: cron and event-driven shell/PowerShell execution")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .global(true)
                .help("TOML config file, overlaid on top of TASKD_* environment variables"),
        )
        .subcommand(commands::daemon::command())
        .subcommand(commands::task::command())
        .subcommand(commands::batch::command())
        .subcommand(Command::new("accounts").about("Report whether OS account resolution is supported here"))
        .get_matches();

    let config_path = matches.get_one::<String>("config").map(String::as_str);

    let result = match matches.subcommand() {
        Some(("run", _)) => {
            let config = match commands::load_config(config_path) {
                Ok(c) => c,
                Err(e) => {
                    eprintln!("failed to load config: {e}");
                    std::process::exit(1)
                }
            };
            taskd_core::init_tracing(&config);
            commands::daemon::run(config_path).await
        }
        Some(("task", sub)) => commands::task::run(sub, config_path).await,
        Some(("batch", sub)) => commands::batch::run(sub, config_path).await,
        Some(("accounts", _)) => {
            let hook = taskd_core::api::accounts_hook();
            println!("{}", serde_json::to_string_pretty(&hook).unwrap());
            Ok(())
        }
        _ => {
            println!("taskd v{VERSION}");
            println!("Use --help for available commands");
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
