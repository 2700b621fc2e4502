
use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use fanout_core::{SharedStore, Supervisor, TickOutcome};
use fanout_domain::{MessageStatus, PriorityTier};
use test_support::{Harness, TENANT};

async fn seeded() -> Harness {
    let h = Harness::new().await;
    h.member("u1", PriorityTier::High).await;
    h.member("u2", PriorityTier::High).await;
    h.member("u3", PriorityTier::Low).await;
    h
}

#[tokio::test]
async fn pending_preempts_privileged() {
    let h = seeded().await;
    let t0 = Utc::now() - ChronoDuration::minutes(10);
    h.message("old-privileged", "u1", MessageStatus::Privileged, t0).await;
    h.message("new-pending", "u1", MessageStatus::Pending, t0 + ChronoDuration::minutes(5)).await;

    let first = h.scheduler.tick(TENANT).await;
    assert_eq!(first, TickOutcome::Expanded { status: MessageStatus::Privileged, rows: 1 });
    assert_eq!(h.store.message(TENANT, "new-pending").await.unwrap().status, MessageStatus::Privileged);
    assert_eq!(h.store.message(TENANT, "old-privileged").await.unwrap().status, MessageStatus::Privileged);

    // Ahora el privilegiado más antiguo pasa al nivel bajo
    let second = h.scheduler.tick(TENANT).await;
    assert_eq!(second, TickOutcome::Expanded { status: MessageStatus::Finished, rows: 1 });
    assert_eq!(h.store.message(TENANT, "old-privileged").await.unwrap().status, MessageStatus::Finished);
    assert_eq!(h.store.rows_for(TENANT, "u3").await[0].origin_message_id, "old-privileged");
}

#[tokio::test]
async fn oldest_pending_goes_first() {
    let h = seeded().await;
    let t0 = Utc::now() - ChronoDuration::minutes(10);
    h.message("b", "u1", MessageStatus::Pending, t0 + ChronoDuration::seconds(1)).await;
    h.message("a", "u1", MessageStatus::Pending, t0).await;

    h.scheduler.tick(TENANT).await;
    assert_eq!(h.store.message(TENANT, "a").await.unwrap().status, MessageStatus::Privileged);
    assert_eq!(h.store.message(TENANT, "b").await.unwrap().status, MessageStatus::Pending);
}

#[tokio::test]
async fn idle_tick_reshards_only_when_stale() {
    let h = seeded().await;
    assert_eq!(h.scheduler.tick(TENANT).await, TickOutcome::Idle { resharded: true });
    assert!(h.shards.table(TENANT).is_some());
    assert_eq!(h.scheduler.tick(TENANT).await, TickOutcome::Idle { resharded: false });
}

#[tokio::test]
async fn store_failure_is_reported_not_propagated() {
    let h = seeded().await;
    h.store.fail_next_message_reads(1);
    assert_eq!(h.scheduler.tick(TENANT).await, TickOutcome::Failed);
    assert!(matches!(h.scheduler.tick(TENANT).await, TickOutcome::Idle { .. }));
}

#[tokio::test]
async fn supervisor_runs_tenant_loops_until_stopped() {
    let h = seeded().await;
    let shared: SharedStore = h.store.clone();
    let supervisor = Supervisor::new(shared, h.scheduler.clone(), h.shards.clone());

    assert_eq!(supervisor.start_all().await.unwrap(), 1);
    assert!(supervisor.is_running(TENANT));
    assert!(!supervisor.start_tenant(TENANT));

    h.message("m1", "u1", MessageStatus::Pending, Utc::now()).await;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while h.store.message(TENANT, "m1").await.unwrap().status != MessageStatus::Finished {
        assert!(tokio::time::Instant::now() < deadline, "message never finished");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(h.store.distribute_rows().await.len(), 2);

    assert!(supervisor.stop_tenant(TENANT).await);
    assert!(!supervisor.is_running(TENANT));
    assert!(h.shards.table(TENANT).is_none());
    assert!(!supervisor.stop_tenant(TENANT).await);
}

#[tokio::test]
async fn sync_follows_tenant_registry_and_shutdown_stops_all() {
    let h = seeded().await;
    let shared: SharedStore = h.store.clone();
    let supervisor = Arc::new(Supervisor::new(shared, h.scheduler.clone(), h.shards.clone()));

    h.store.add_tenant("t2").await;
    assert_eq!(supervisor.sync_tenants().await.unwrap(), (2, 0));
    h.store.remove_tenant("t2").await;
    assert_eq!(supervisor.sync_tenants().await.unwrap(), (0, 1));
    assert!(supervisor.is_running(TENANT));
    assert!(!supervisor.is_running("t2"));

    supervisor.shutdown().await;
    assert!(supervisor.running().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_starts_spawn_a_single_loop() {
    let h = seeded().await;
    let shared: SharedStore = h.store.clone();
    let supervisor = Arc::new(Supervisor::new(shared, h.scheduler.clone(), h.shards.clone()));

    let starts: Vec<_> = (0..8).map(|_| {
                                   let supervisor = supervisor.clone();
                                   tokio::spawn(async move { supervisor.start_tenant(TENANT) })
                               })
                               .collect();
    let mut started = 0;
    for s in starts {
        if s.await.unwrap() {
            started += 1;
        }
    }
    assert_eq!(started, 1);
    assert_eq!(supervisor.running(), vec![TENANT.to_string()]);

    supervisor.shutdown().await;
    assert!(supervisor.running().is_empty());
}
