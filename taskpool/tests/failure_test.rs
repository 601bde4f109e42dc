mod test_helpers;

use std::time::{Duration, Instant};

use serde_json::json;
use taskpool::{args, Pool, PoolConfig, PoolError, TaskOptions};
use test_helpers::*;

#[tokio::test]
async fn test_retry_exhaustion_attempts_k_plus_one() -> anyhow::Result<()> {
    let (pool, probe) = setup_pool(1, 2)?;

    let options = TaskOptions::new().with_max_retries(2);
    let err = pool.run_with_options("fail", options, args![]).await.unwrap_err();

    assert_eq!(probe.attempts(), 3);
    assert_eq!(err.attempts(), Some(3));
    assert!(err.is_task_failure());
    assert!(err.to_string().contains("boom"), "{err}");

    let stats = wait_until(&pool, "failure counted", |s| s.tasks_failed == 1).await?;
    assert_eq!(stats.tasks_retried, 2);
    // execution errors leave the worker healthy
    assert_eq!(stats.workers_replaced, 0);

    pool.destroy().await?;
    Ok(())
}

#[tokio::test]
async fn test_default_retry_budget_is_one() -> anyhow::Result<()> {
    let (pool, probe) = setup_pool(1, 1)?;

    let err = pool.run("fail", args![]).await.unwrap_err();
    assert_eq!(probe.attempts(), 2);
    assert!(matches!(err, PoolError::TaskExecution { attempts: 2, .. }));

    pool.destroy().await?;
    Ok(())
}

#[tokio::test]
async fn test_timeout_rejects_and_frees_the_slot() -> anyhow::Result<()> {
    let (pool, _probe) = setup_pool(1, 1)?;

    let started = Instant::now();
    let options = TaskOptions::new()
        .with_timeout(Duration::from_millis(100))
        .with_max_retries(0);
    let hung = pool.run_with_options("hang", options, args![]);
    // queued behind the hung task on the only worker
    let queued = pool.run("add", args![2, 2]);

    let err = hung.await.unwrap_err();
    let elapsed = started.elapsed();
    assert!(
        matches!(err, PoolError::TaskTimeout { attempts: 1, timeout, .. } if timeout == Duration::from_millis(100))
    );
    assert!(elapsed >= Duration::from_millis(100), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(2), "{elapsed:?}");

    assert_eq!(queued.await?, json!(4));
    let stats = wait_until(&pool, "worker replaced", |s| s.workers_replaced == 1).await?;
    assert_eq!(stats.total_workers, 1);

    pool.destroy().await?;
    Ok(())
}

#[tokio::test]
async fn test_timeout_fires_at_deadline_with_default_sweep() -> anyhow::Result<()> {
    let probe = Probe::default();
    let config = PoolConfig {
        min_pool_size: 1,
        max_pool_size: 1,
        ..PoolConfig::default()
    };
    let pool = Pool::new(config, probe_registry(&probe))?;

    let started = Instant::now();
    let options = TaskOptions::new()
        .with_timeout(Duration::from_millis(100))
        .with_max_retries(0);
    let err = pool.run_with_options("hang", options, args![]).await.unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(err, PoolError::TaskTimeout { attempts: 1, .. }), "{err}");
    assert!(elapsed >= Duration::from_millis(100), "{elapsed:?}");
    // well under the 5s sweep period
    assert!(elapsed < Duration::from_millis(500), "{elapsed:?}");

    pool.destroy().await?;
    Ok(())
}

#[tokio::test]
async fn test_timeout_is_retried_within_budget() -> anyhow::Result<()> {
    let (pool, _probe) = setup_pool(1, 2)?;

    let options = TaskOptions::new()
        .with_timeout(Duration::from_millis(60))
        .with_max_retries(1);
    let err = pool.run_with_options("hang", options, args![]).await.unwrap_err();
    assert!(matches!(err, PoolError::TaskTimeout { attempts: 2, .. }));

    let stats = wait_until(&pool, "two replacements", |s| s.workers_replaced == 2).await?;
    assert_eq!(stats.tasks_retried, 1);
    assert!(stats.total_workers >= 1);

    pool.destroy().await?;
    Ok(())
}

#[tokio::test]
async fn test_crash_is_retried_and_pool_recovers() -> anyhow::Result<()> {
    let (pool, _probe) = setup_pool(2, 2)?;

    let err = pool.run("explode", args![]).await.unwrap_err();
    match &err {
        PoolError::WorkerCrash { task, attempts, reason } => {
            assert_eq!(task, "explode");
            assert_eq!(*attempts, 2);
            assert!(reason.contains("kaboom"), "{reason}");
        }
        other => panic!("unexpected error {other:?}"),
    }

    let stats = wait_until(&pool, "min workers restored", |s| {
        s.total_workers == 2 && s.workers_replaced == 2
    })
    .await?;
    assert_eq!(stats.idle_workers, 2);

    // the replacements are fully functional
    assert_eq!(pool.run("add", args![1, 2]).await?, json!(3));

    pool.destroy().await?;
    Ok(())
}

#[tokio::test]
async fn test_fire_and_forget_failure_is_silent() -> anyhow::Result<()> {
    let (pool, probe) = setup_pool(1, 1)?;

    let options = TaskOptions::new().with_max_retries(1);
    let id = pool.fire_and_forget_with_options("fail", options, args![])?;
    assert_ne!(id.to_string(), "");
    pool.fire_and_forget("explode", args![])?;

    wait_until(&pool, "both failures absorbed", |s| s.tasks_failed == 2).await?;
    assert_eq!(probe.attempts(), 2);
    assert_eq!(pool.run("add", args![5, 5]).await?, json!(10));

    pool.destroy().await?;
    Ok(())
}

#[tokio::test]
async fn test_fire_and_forget_success() -> anyhow::Result<()> {
    let (pool, probe) = setup_pool(1, 1)?;

    pool.fire_and_forget("record", args!["only", 0])?;
    wait_until(&pool, "task completed", |s| s.tasks_completed == 1).await?;
    assert_eq!(probe.log(), ["only"]);

    pool.destroy().await?;
    Ok(())
}

#[tokio::test]
async fn test_retry_runs_before_later_submissions() -> anyhow::Result<()> {
    let (pool, probe) = setup_pool(1, 1)?;

    let a = pool.run("record", args!["a", 1]);
    let b = pool.run("record", args!["b", 0]);
    let c = pool.run("record", args!["c", 0]);

    assert_eq!(a.await?, json!("a"));
    assert_eq!(b.await?, json!("b"));
    assert_eq!(c.await?, json!("c"));
    assert_eq!(probe.log(), ["a", "a", "b", "c"]);

    pool.destroy().await?;
    Ok(())
}
