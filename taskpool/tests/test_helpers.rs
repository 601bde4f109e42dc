#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::json;
use taskpool::{decode_arg, task_fn, Args, Pool, PoolConfig, PoolStats, TaskRegistry};

/// Default wait for conditions the pool reaches asynchronously
pub const DEFAULT_WAIT: Duration = Duration::from_secs(5);

#[task_fn]
pub fn add(a: i64, b: i64) -> i64 {
    a + b
}

/// Shared observation point for the probe tasks
#[derive(Clone, Default)]
pub struct Probe {
    pub attempts: Arc<AtomicUsize>,
    pub running: Arc<AtomicUsize>,
    pub peak: Arc<AtomicUsize>,
    pub log: Arc<Mutex<Vec<String>>>,
}

impl Probe {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

/// Registry used by the pool tests:
///
/// - `add(a, b)`
/// - `sleep_then(index, ms)`: sleeps, returns `index`, tracks peak concurrency
/// - `fail()`: always fails with "boom"
/// - `hang()`: never returns
/// - `explode()`: panics, taking its worker down
/// - `record(label, failures)`: appends `label` to the log, failing the
///   first `failures` attempts for that label
pub fn probe_registry(probe: &Probe) -> TaskRegistry {
    let sleeper = probe.clone();
    let failer = probe.clone();
    let recorder = probe.clone();

    TaskRegistry::builder()
        .task(AddTask)
        .task_fn("sleep_then", move |args: Args| {
            let probe = sleeper.clone();
            async move {
                let index: u64 = decode_arg(&args, 0)?;
                let ms: u64 = decode_arg(&args, 1)?;
                let now = probe.running.fetch_add(1, Ordering::SeqCst) + 1;
                probe.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                probe.running.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, anyhow::Error>(json!(index))
            }
        })
        .task_fn("fail", move |_args: Args| {
            let probe = failer.clone();
            async move {
                probe.attempts.fetch_add(1, Ordering::SeqCst);
                Err::<serde_json::Value, _>(anyhow::anyhow!("boom"))
            }
        })
        .task_fn("hang", |_args: Args| async move {
            std::future::pending::<()>().await;
            Ok::<_, anyhow::Error>(json!(null))
        })
        .blocking_fn("explode", |_args: Args| -> anyhow::Result<serde_json::Value> {
            panic!("kaboom")
        })
        .blocking_fn("record", move |args: Args| {
            let label: String = decode_arg(&args, 0)?;
            let failures: usize = decode_arg(&args, 1)?;
            let mut log = recorder.log.lock().unwrap();
            let seen = log.iter().filter(|entry| **entry == label).count();
            log.push(label.clone());
            if seen < failures {
                anyhow::bail!("{label} failed on attempt {}", seen + 1);
            }
            Ok(json!(label))
        })
        .build()
        .expect("probe registry")
}

pub fn test_config(min_pool_size: usize, max_pool_size: usize) -> PoolConfig {
    PoolConfig {
        min_pool_size,
        max_pool_size,
        sweep_interval: Duration::from_millis(20),
        shutdown_timeout: Duration::from_secs(1),
        thread_name_prefix: "taskpool-test".to_string(),
        ..PoolConfig::default()
    }
}

/// Build a pool over the probe registry, with test logging installed.
pub fn setup_pool(min_pool_size: usize, max_pool_size: usize) -> anyhow::Result<(Pool, Probe)> {
    taskpool::logging::init_test();
    let probe = Probe::default();
    let pool = Pool::new(test_config(min_pool_size, max_pool_size), probe_registry(&probe))?;
    Ok((pool, probe))
}

/// Poll the pool's stats until `check` holds.
pub async fn wait_until<F>(pool: &Pool, what: &str, check: F) -> anyhow::Result<PoolStats>
where
    F: Fn(&PoolStats) -> bool,
{
    let deadline = Instant::now() + DEFAULT_WAIT;
    loop {
        let stats = pool.stats();
        if check(&stats) {
            return Ok(stats);
        }
        if Instant::now() > deadline {
            anyhow::bail!("timed out waiting for {what}; last stats: {stats:?}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
