use std::sync::atomic::{AtomicBool, Ordering};

use tracing::subscriber::set_global_default;
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_log::LogTracer;
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Registry};

static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Install a JSON-line tracing subscriber for the given service name, bridging the
/// `log` facade so dependency crates' log records are captured too. Idempotent: a
/// second call is a no-op, which matters because both the worker loop and its
/// forked job-runner subcommand call this during their own startup.
pub fn configure(name: impl Into<String>) {
    if INITIALIZED.swap(true, Ordering::Acquire) {
        return;
    }

    LogTracer::builder()
        .with_max_level(log::LevelFilter::Debug)
        .init()
        .expect("Failed to create logger");

    let env_filter = EnvFilter::try_from_env("LOG")
        .or_else(|_| EnvFilter::try_from_env("RUST_LOG"))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let formatting_layer = BunyanFormattingLayer::new(name.into(), std::io::stdout);
    let subscriber = Registry::default()
        .with(env_filter)
        .with(JsonStorageLayer)
        .with(formatting_layer);
    set_global_default(subscriber).expect("Setting subscriber");
}
