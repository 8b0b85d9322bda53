//! PostgreSQL integration tests
//!
//! Run with: DATABASE_URL=postgres://... cargo test -p stacpool-core -- --ignored

use stacpool_core::{
    build_engine, with_session, DriverError, ErrorKind, PgDriver, PoolConfig, Role,
};

fn database_url() -> String {
    std::env::var("DATABASE_URL").expect("DATABASE_URL required")
}

#[tokio::test]
#[ignore = "requires database"]
async fn session_runs_queries() {
    let engine = build_engine(PgDriver, &database_url(), PoolConfig::default(), Role::Reader).unwrap();

    let value = with_session(&engine, |s| {
        Box::pin(async move {
            let conn = s.connection().await?;
            let row: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&mut **conn).await?;
            Ok(row.0)
        })
    })
    .await
    .unwrap();

    assert_eq!(value, 1);
}

#[tokio::test]
#[ignore = "requires database"]
async fn unique_violation_maps_to_conflict() {
    let engine = build_engine(PgDriver, &database_url(), PoolConfig::default(), Role::Writer).unwrap();
    let table = format!("stacpool_test_{}", uuid::Uuid::new_v4().simple());

    let create = format!("CREATE TABLE {table} (id TEXT PRIMARY KEY)");
    with_session(&engine, move |s| {
        Box::pin(async move {
            sqlx::query(&create).execute(&mut **s.connection().await?).await?;
            Ok(())
        })
    })
    .await
    .unwrap();

    let insert = format!("INSERT INTO {table} (id) VALUES ('a')");
    for expected in [None, Some(ErrorKind::Conflict)] {
        let insert = insert.clone();
        let result = with_session(&engine, move |s| {
            Box::pin(async move {
                sqlx::query(&insert).execute(&mut **s.connection().await?).await?;
                Ok::<_, DriverError>(())
            })
        })
        .await;
        assert_eq!(result.err().and_then(|e| e.kind()), expected);
    }

    let drop_table = format!("DROP TABLE {table}");
    with_session(&engine, move |s| {
        Box::pin(async move {
            sqlx::query(&drop_table).execute(&mut **s.connection().await?).await?;
            Ok(())
        })
    })
    .await
    .unwrap();
}

#[tokio::test]
#[ignore = "requires database"]
async fn engine_is_reachable() {
    let engine = build_engine(PgDriver, &database_url(), PoolConfig::default(), Role::Reader).unwrap();
    engine.check_reachable().await.unwrap();
    assert_eq!(engine.status().idle, 1);
}
