
use chrono::Utc;
use fanout_core::FanoutConfig;
use fanout_domain::{unique_conversation_id, DistributeRecord, DistributeStatus, PriorityTier};
use test_support::{test_config, Harness, TENANT};
use tokio::sync::broadcast::error::TryRecvError;
use tokio_test::{assert_err, assert_ok};

fn rows(origin: &str, n: usize, status: DistributeStatus) -> Vec<DistributeRecord> {
    (0..n).map(|i| {
              let user = format!("u{i}");
              DistributeRecord { tenant_id: TENANT.into(),
                                 conversation_id: unique_conversation_id(TENANT, &user),
                                 user_id: user,
                                 shard_id: "0".into(),
                                 origin_message_id: origin.into(),
                                 message_id: uuid::Uuid::new_v4().to_string(),
                                 quote_message_id: None,
                                 category: "PLAIN_TEXT".into(),
                                 data: String::new(),
                                 representative_id: Some("sender".into()),
                                 level: PriorityTier::High,
                                 status,
                                 created_at: Utc::now() }
          })
          .collect()
}

async fn small_batches() -> Harness {
    Harness::with_config(FanoutConfig { batch_size: 2, ..test_config() }).await
}

#[tokio::test]
async fn rows_are_written_in_batches_with_a_single_wake() {
    let h = small_batches().await;
    let mut wake = h.wake.subscribe();

    let report = assert_ok!(h.bulk.persist_batch(TENANT, &rows("m1", 5, DistributeStatus::Pending)).await);
    assert_eq!(report.inserted, 5);
    assert_eq!(report.batches, 3);
    assert!(report.woke);
    assert_eq!(h.store.distribute_insert_calls(), 3);

    assert_eq!(wake.try_recv().unwrap(), TENANT);
    assert!(matches!(wake.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn persisting_twice_is_idempotent() {
    let h = small_batches().await;
    let first = rows("m1", 5, DistributeStatus::Pending);
    h.bulk.persist_batch(TENANT, &first).await.unwrap();

    // Mismo origen y destinatarios con ids locales nuevos: todo duplicado
    let again = h.bulk.persist_batch(TENANT, &rows("m1", 5, DistributeStatus::Pending)).await.unwrap();
    assert_eq!(again.inserted, 0);
    assert_eq!(again.duplicates, 5);
    assert_eq!(h.store.distribute_rows().await, first);
}

#[tokio::test]
async fn non_pending_rows_do_not_wake() {
    let h = small_batches().await;
    let mut wake = h.wake.subscribe();
    let report = h.bulk.persist_batch(TENANT, &rows("m1", 3, DistributeStatus::Standalone)).await.unwrap();
    assert!(!report.woke);
    assert!(matches!(wake.try_recv(), Err(TryRecvError::Empty)));

    let empty = h.bulk.persist_batch(TENANT, &[]).await.unwrap();
    assert_eq!(empty.batches, 0);
    assert_eq!(h.store.distribute_insert_calls(), 2);
}

#[tokio::test]
async fn failure_abandons_remaining_batches() {
    let h = small_batches().await;
    let mut wake = h.wake.subscribe();
    h.store.fail_distribute_inserts_from(1);

    assert_err!(h.bulk.persist_batch(TENANT, &rows("m1", 5, DistributeStatus::Pending)).await);
    assert_eq!(h.store.distribute_insert_calls(), 2);
    assert_eq!(h.store.distribute_rows().await.len(), 2);
    // El primer lote sí se confirmó
    assert_eq!(wake.try_recv().unwrap(), TENANT);

    h.store.fail_distribute_inserts_from(usize::MAX);
    let retry = h.bulk.persist_batch(TENANT, &rows("m1", 5, DistributeStatus::Pending)).await.unwrap();
    assert_eq!(retry.inserted, 3);
    assert_eq!(retry.duplicates, 2);
    assert_eq!(h.store.distribute_rows().await.len(), 5);
}
