//! Pool saturation scenarios
//!
//! All timing runs on tokio's paused clock, so "sleep 2s" and "timeout 1s"
//! are exact and the tests finish instantly.

use std::time::Duration;

use stacpool_core::testing::{EventKind, MemoryDriver};
use stacpool_core::{build_engine, with_session, Engine, ErrorKind, PoolConfig, Role, SessionError};
use tokio::time::Instant;

fn engine(driver: &MemoryDriver, config: PoolConfig) -> Engine<MemoryDriver> {
    build_engine(driver.clone(), "memory://stac", config, Role::Reader).unwrap()
}

/// Spawn a scoped session whose body holds its connection for `hold`
fn spawn_sleeper(
    engine: &Engine<MemoryDriver>,
    hold: Duration,
) -> tokio::task::JoinHandle<(Result<(), SessionError>, Duration)> {
    let engine = engine.clone();
    tokio::spawn(async move {
        let started = Instant::now();
        let result = with_session(&engine, move |s| {
            Box::pin(async move {
                s.connection().await?;
                tokio::time::sleep(hold).await;
                Ok(())
            })
        })
        .await;
        (result, started.elapsed())
    })
}

#[tokio::test(start_paused = true)]
async fn capacity_is_pool_size_plus_overflow() {
    for (pool_size, max_overflow) in [(1, 0), (2, 3), (5, 10)] {
        let driver = MemoryDriver::new();
        let engine = engine(
            &driver,
            PoolConfig::new()
                .with_pool_size(pool_size)
                .with_max_overflow(max_overflow)
                .with_timeout_seconds(5),
        );
        let capacity = (pool_size + max_overflow) as usize;

        let started = Instant::now();
        let mut held = Vec::new();
        for _ in 0..capacity {
            held.push(engine.checkout().await.unwrap());
        }
        // None of these had to wait
        assert_eq!(started.elapsed(), Duration::ZERO);

        let extra = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.checkout().await.map(|c| c.id()) })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!extra.is_finished(), "checkout {} should block", capacity + 1);

        drop(held);
        assert!(extra.await.unwrap().is_ok());
        assert_eq!(driver.peak_connections(), capacity);
    }
}

#[tokio::test(start_paused = true)]
async fn blocked_checkout_never_fails_early() {
    let driver = MemoryDriver::new();
    let engine = engine(
        &driver,
        PoolConfig::new()
            .with_pool_size(1)
            .with_max_overflow(0)
            .with_timeout_seconds(7),
    );
    let _held = engine.checkout().await.unwrap();

    let started = Instant::now();
    let err = with_session(&engine, |_s| Box::pin(async move { Ok(()) }))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), Some(ErrorKind::PoolExhausted));
    assert!(started.elapsed() >= Duration::from_secs(7));
}

#[tokio::test(start_paused = true)]
async fn third_sleeper_is_exhausted_after_timeout() {
    let driver = MemoryDriver::new();
    let engine = engine(
        &driver,
        PoolConfig::new()
            .with_pool_size(2)
            .with_max_overflow(0)
            .with_timeout_seconds(1),
    );

    let handles: Vec<_> = (0..3)
        .map(|_| spawn_sleeper(&engine, Duration::from_secs(2)))
        .collect();

    let mut ok = 0;
    let mut exhausted = Vec::new();
    for handle in handles {
        let (result, elapsed) = handle.await.unwrap();
        match result {
            Ok(()) => ok += 1,
            Err(SessionError::PoolExhausted { .. }) => exhausted.push(elapsed),
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    assert_eq!(ok, 2);
    assert_eq!(exhausted.len(), 1);
    assert!(exhausted[0] >= Duration::from_secs(1));
    assert!(exhausted[0] < Duration::from_secs(2));
    assert_eq!(engine.status().available, 2);
}

#[tokio::test]
async fn second_insert_of_same_key_conflicts() {
    let driver = MemoryDriver::new();
    let engine = engine(&driver, PoolConfig::default());

    let insert = |key: &'static str| {
        let engine = engine.clone();
        async move {
            with_session(&engine, move |s| {
                Box::pin(async move {
                    s.connection().await?.insert("collections", key)?;
                    Ok(())
                })
            })
            .await
        }
    };

    insert("landsat-c2-l2").await.unwrap();
    let err = insert("landsat-c2-l2").await.unwrap_err();

    assert!(matches!(err, SessionError::Conflict));
    assert_eq!(driver.committed("collections"), vec!["landsat-c2-l2"]);
}

#[tokio::test]
async fn every_outcome_returns_the_connection_once() {
    let driver = MemoryDriver::new();
    let engine = engine(&driver, PoolConfig::new().with_pool_size(2).with_max_overflow(1));
    let before = engine.status().available;

    let ok = with_session(&engine, |s| {
        Box::pin(async move {
            s.connection().await?.insert("items", "a")?;
            Ok(())
        })
    })
    .await;
    assert!(ok.is_ok());
    assert_eq!(engine.status().available, before);

    let conflict = with_session(&engine, |s| {
        Box::pin(async move {
            s.connection().await?.insert("items", "a")?;
            Ok(())
        })
    })
    .await;
    assert_eq!(conflict.unwrap_err().kind(), Some(ErrorKind::Conflict));
    assert_eq!(engine.status().available, before);

    let unclassified = with_session(&engine, |s| {
        Box::pin(async move {
            s.connection().await?.execute_invalid()?;
            Ok(())
        })
    })
    .await;
    assert_eq!(
        unclassified.unwrap_err().kind(),
        Some(ErrorKind::UnclassifiedDatabaseError)
    );
    assert_eq!(engine.status().available, before);

    // Every session that began ended in exactly one commit or rollback
    let begins = driver.count(EventKind::Begin);
    let ends = driver.count(EventKind::Commit) + driver.count(EventKind::Rollback);
    assert_eq!(begins, 3);
    assert_eq!(ends, 3);
}

#[tokio::test(start_paused = true)]
async fn concurrent_checkouts_never_share_a_connection() {
    let driver = MemoryDriver::new();
    let engine = engine(
        &driver,
        PoolConfig::new().with_pool_size(3).with_max_overflow(2),
    );

    let handles: Vec<_> = (0..5)
        .map(|_| {
            let engine = engine.clone();
            tokio::spawn(async move {
                let conn = engine.checkout().await.unwrap();
                let id = conn.id();
                tokio::time::sleep(Duration::from_millis(100)).await;
                drop(conn);
                id
            })
        })
        .collect();

    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap());
    }
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 5);
}
