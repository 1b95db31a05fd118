//! Core scheduling and execution engine: the Store, CronParser, Dispatcher,
//! Runner, ConditionPoller, BatchOps, and the transport-free `api` surface
//! a front-end (CLI or HTTP) drives.

pub mod api;
pub mod batch;
pub mod condition_poller;
pub mod config;
pub mod cron;
pub mod dispatcher;
pub mod error;
pub mod result;
pub mod runner;
pub mod store;
pub mod task;
pub mod time;

pub use config::CoreConfig;
pub use dispatcher::Engine;
pub use error::{CoreError, ErrorKind, Result};
pub use store::Store;
pub use task::{NewTask, Task, TaskId};

/// Installs a `tracing` subscriber from `CoreConfig::log_level`/`log_format`.
/// Call once at process start; a second call is a no-op (the global
/// subscriber can only be set once per process).
pub fn init_tracing(config: &CoreConfig) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(&config.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    let result = if config.log_format == "json" {
        subscriber.json().try_init()
    } else {
        subscriber.try_init()
    };
    if let Err(e) = result {
        eprintln!("tracing subscriber already initialized: {e}");
    }
}
