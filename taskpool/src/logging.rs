// Logging for taskpool
//
// A thin configuration layer over `tracing-subscriber`. The pool itself only
// emits `tracing` events; installing a subscriber is left to the application.
// Worker threads capture the caller's dispatcher when they are spawned, so
// anything logged from inside a task lands in the same subscriber as the
// pool manager's own events.
//
// # Usage Examples
//
// ```rust
// use taskpool::logging;
//
// // INFO level, human-readable console output
// logging::init_default();
//
// // Or pick the fields yourself
// let config = logging::LogConfig {
//     level: tracing::Level::DEBUG,
//     target_filters: Some("taskpool::manager=trace".to_string()),
//     ..Default::default()
// };
// logging::init(config);
// ```
//
// ## Domain macros
//
// ```rust
// let span = taskpool::pool_span!("scale_up", workers = 4);
// let _guard = span.enter();
// taskpool::log_task!(task_id, "retrying", attempt = 2);
// ```

use std::fs::File;
use std::io;
use std::sync::{Arc, Once};

use tracing::{Level, Subscriber};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Configuration for the logging subscriber
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level to display
    pub level: Level,
    /// Emit one JSON object per event instead of text
    pub json_format: bool,
    /// Include source file and line
    pub show_file_line: bool,
    /// Include thread name and id. Worker threads are named
    /// `{thread_name_prefix}-{id}`, which makes this useful.
    pub show_thread_info: bool,
    /// Include timestamps
    pub show_time: bool,
    /// Extra directives, e.g. `"taskpool=debug,taskpool::worker=trace"`
    pub target_filters: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            json_format: false,
            show_file_line: true,
            show_thread_info: true,
            show_time: true,
            target_filters: None,
        }
    }
}

// Only the first init* call installs a subscriber
static INIT: Once = Once::new();

fn env_filter(config: &LogConfig) -> EnvFilter {
    let mut filter = EnvFilter::from_default_env().add_directive(config.level.into());
    if let Some(filters) = &config.target_filters {
        for directive in filters.split(',').filter(|s| !s.trim().is_empty()) {
            match directive.trim().parse() {
                Ok(directive) => filter = filter.add_directive(directive),
                Err(err) => eprintln!("ignoring log directive `{directive}`: {err}"),
            }
        }
    }
    filter
}

/// Install the global subscriber described by `config`.
///
/// Safe to call more than once; only the first call takes effect.
pub fn init(config: LogConfig) {
    INIT.call_once(|| {
        let registry = tracing_subscriber::registry().with(env_filter(&config));

        let subscriber: Box<dyn Subscriber + Send + Sync> = if config.json_format {
            Box::new(
                registry.with(
                    fmt::layer()
                        .json()
                        .flatten_event(true)
                        .with_thread_names(config.show_thread_info),
                ),
            )
        } else {
            let layer = fmt::layer()
                .with_ansi(atty::is(atty::Stream::Stdout))
                .with_file(config.show_file_line)
                .with_line_number(config.show_file_line)
                .with_thread_names(config.show_thread_info)
                .with_thread_ids(config.show_thread_info);
            if config.show_time {
                Box::new(registry.with(layer))
            } else {
                Box::new(registry.with(layer.without_time()))
            }
        };

        set_global_subscriber(subscriber);
    });
}

fn set_global_subscriber<S>(subscriber: S)
where
    S: Subscriber + Send + Sync + 'static,
{
    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Error setting global tracing subscriber: {}", err);
    }
}

/// Open `path` for appending, creating it if needed.
///
/// The handle is shared by every event the layer writes, so the file is
/// opened exactly once.
pub fn file_writer(path: &str) -> io::Result<Arc<File>> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    Ok(Arc::new(file))
}

/// Log to the console and append plain text to `log_file`.
///
/// The file is opened up front so a bad path is reported to the caller
/// instead of being swallowed on the first event.
pub fn init_with_file(config: LogConfig, log_file: &str) -> io::Result<()> {
    let file = file_writer(log_file)?;

    INIT.call_once(|| {
        let console_layer = fmt::layer()
            .with_ansi(atty::is(atty::Stream::Stdout))
            .with_file(config.show_file_line)
            .with_line_number(config.show_file_line)
            .with_thread_names(config.show_thread_info)
            .with_thread_ids(config.show_thread_info);

        let file_layer = fmt::layer()
            .with_ansi(false)
            .with_writer(file)
            .with_file(true)
            .with_line_number(true)
            .with_thread_names(true);

        let subscriber = tracing_subscriber::registry()
            .with(env_filter(&config))
            .with(console_layer)
            .with(file_layer);

        set_global_subscriber(subscriber);
    });

    Ok(())
}

/// INFO level, console output.
pub fn init_default() {
    init(LogConfig::default());
}

/// DEBUG for everything, TRACE for the dispatch protocol.
pub fn init_development() {
    init(LogConfig {
        level: Level::DEBUG,
        target_filters: Some("taskpool=debug,taskpool::worker=trace".to_string()),
        ..LogConfig::default()
    });
}

/// JSON lines at INFO, no source locations.
pub fn init_production() {
    init(LogConfig {
        level: Level::INFO,
        json_format: true,
        show_file_line: false,
        show_thread_info: true,
        show_time: true,
        target_filters: None,
    });
}

/// Warnings and errors only, compact.
pub fn init_test() {
    init(LogConfig {
        level: Level::WARN,
        json_format: false,
        show_file_line: true,
        show_thread_info: false,
        show_time: false,
        target_filters: None,
    });
}

/// Span covering a pool-level operation
///
/// ```rust
/// let span = taskpool::pool_span!("destroy");
/// let _guard = span.enter();
/// let span = taskpool::pool_span!("replenish", missing = 2);
/// ```
#[macro_export]
macro_rules! pool_span {
    ($operation:expr) => {
        ::tracing::info_span!("pool", operation = $operation)
    };
    ($operation:expr, $($fields:tt)*) => {
        ::tracing::info_span!("pool", operation = $operation, $($fields)*)
    };
}

/// Worker lifecycle events (spawned, replaced, terminated)
#[macro_export]
macro_rules! log_worker {
    ($worker:expr, $event:expr) => {
        ::tracing::info!(worker = %$worker, event = $event)
    };
    ($worker:expr, $event:expr, $($fields:tt)*) => {
        ::tracing::info!(worker = %$worker, event = $event, $($fields)*)
    };
}

/// Per-task events; these are frequent, so they log at DEBUG
#[macro_export]
macro_rules! log_task {
    ($task:expr, $event:expr) => {
        ::tracing::debug!(task = %$task, event = $event)
    };
    ($task:expr, $event:expr, $($fields:tt)*) => {
        ::tracing::debug!(task = %$task, event = $event, $($fields)*)
    };
}

/// Scheduling decisions of the pool manager
#[macro_export]
macro_rules! log_scheduler {
    ($event:expr) => {
        ::tracing::trace!(scheduler = "pool_manager", event = $event)
    };
    ($event:expr, $($fields:tt)*) => {
        ::tracing::trace!(scheduler = "pool_manager", event = $event, $($fields)*)
    };
}

/// Dispatcher in effect on the calling thread.
///
/// Captured when a worker thread is spawned so its events reach the same
/// subscriber as the code that created the pool.
#[inline]
pub fn current_subscriber() -> tracing::Dispatch {
    tracing::dispatcher::get_default(|d| d.clone())
}

pub use tracing::{debug, error, info, trace, warn};
