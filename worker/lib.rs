mod child;
mod config;
mod context;
mod error;
mod gc;
mod handler;
mod identity;
mod memory;
mod registry;
mod runner;
mod signals;
mod stats;
mod worker;

pub use child::{run_job, ChildConfig};
pub use config::WorkerConfig;
pub use context::JobContext;
pub use error::{Error, PerformError, Result};
pub use gc::GarbageCollector;
pub use handler::{split_class, HandlerRegistry, JobHandler};
pub use identity::{hostname, runtime_version, worker_id};
pub use registry::HostRegistry;
pub use runner::{ChildProcess, JOB_RUNNER_SUBCOMMAND};
pub use signals::Command;
pub use worker::Worker;
