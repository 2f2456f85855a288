//! Job store integration tests. These need a live Postgres; set
//! `REFRAX_TEST_DATABASE_URL` and run with `--ignored`.

use sqlx::postgres::PgPoolOptions;

use refrax_core::jobs::{JobStore, MIGRATOR};
use refrax_model::{JobPriority, JobStatus, TransformParams};

async fn store() -> JobStore {
    let url = std::env::var("REFRAX_TEST_DATABASE_URL")
        .expect("REFRAX_TEST_DATABASE_URL must point at a scratch database");
    let pool = PgPoolOptions::new()
        .max_connections(4)
        .connect(&url)
        .await
        .expect("connect to test database");
    MIGRATOR.run(&pool).await.expect("run migrations");
    sqlx::query("TRUNCATE video_jobs")
        .execute(&pool)
        .await
        .expect("truncate");
    JobStore::new(pool)
}

fn params_json(width: u32) -> String {
    TransformParams {
        width: Some(width),
        height: Some(720),
        ..Default::default()
    }
    .to_json_normalized()
}

#[tokio::test]
#[ignore]
async fn create_dedups_active_jobs() {
    let store = store().await;
    let params = params_json(1280);

    let (first, created) = store
        .create("clip.mp4", &params, "cache/one", JobPriority::Normal, 3)
        .await
        .unwrap();
    assert!(created);

    let (second, created) = store
        .create("clip.mp4", &params, "cache/one", JobPriority::Normal, 3)
        .await
        .unwrap();
    assert!(!created);
    assert_eq!(first.id, second.id);

    // A different params key is a different job.
    let (third, created) = store
        .create("clip.mp4", &params_json(640), "cache/two", JobPriority::Normal, 3)
        .await
        .unwrap();
    assert!(created);
    assert_ne!(first.id, third.id);
}

#[tokio::test]
#[ignore]
async fn claim_order_and_exclusivity() {
    let store = store().await;
    let (normal, _) = store
        .create("a.mp4", &params_json(100), "c/a", JobPriority::Normal, 3)
        .await
        .unwrap();
    let (high, _) = store
        .create("b.mp4", &params_json(100), "c/b", JobPriority::High, 3)
        .await
        .unwrap();

    let first = store.claim_next().await.unwrap().unwrap();
    assert_eq!(first.id, high.id);
    assert_eq!(first.status, JobStatus::Processing);
    assert!(first.started_at.is_some());

    let second = store.claim_next().await.unwrap().unwrap();
    assert_eq!(second.id, normal.id);

    assert!(store.claim_next().await.unwrap().is_none());
}

#[tokio::test]
#[ignore]
async fn retry_gates_on_status_and_budget() {
    let store = store().await;
    let (job, _) = store
        .create("c.mp4", &params_json(100), "c/c", JobPriority::Normal, 1)
        .await
        .unwrap();

    // Retry of a non-errored job is a no-op returning false.
    assert!(!store.retry(job.id).await.unwrap());

    store.claim_next().await.unwrap().unwrap();
    store
        .update(job.id, JobStatus::Error, None, Some("boom"))
        .await
        .unwrap();
    assert!(store.retry(job.id).await.unwrap());

    let reloaded = store.get_by_id(job.id).await.unwrap().unwrap();
    assert_eq!(reloaded.status, JobStatus::Pending);
    assert_eq!(reloaded.retry_count, 1);
    assert!(reloaded.error_text.is_none());

    // Budget spent: error again, no more retries.
    store.claim_next().await.unwrap().unwrap();
    store
        .update(job.id, JobStatus::Error, None, Some("boom again"))
        .await
        .unwrap();
    assert!(!store.retry(job.id).await.unwrap());
}

#[tokio::test]
#[ignore]
async fn orphan_reset_rewrites_processing_rows() {
    let store = store().await;
    store
        .create("d.mp4", &params_json(100), "c/d", JobPriority::Normal, 3)
        .await
        .unwrap();
    let claimed = store.claim_next().await.unwrap().unwrap();

    let reset = store.reset_orphans().await.unwrap();
    assert_eq!(reset, 1);

    let next = store.claim_next().await.unwrap().unwrap();
    assert_eq!(next.id, claimed.id);
}

#[tokio::test]
#[ignore]
async fn cancel_only_touches_pending() {
    let store = store().await;
    let (job, _) = store
        .create("e.mp4", &params_json(100), "c/e", JobPriority::Normal, 3)
        .await
        .unwrap();
    assert!(store.cancel(job.id).await.unwrap());
    assert!(!store.cancel(job.id).await.unwrap());

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.cancelled, 1);
    assert_eq!(stats.pending, 0);
}
