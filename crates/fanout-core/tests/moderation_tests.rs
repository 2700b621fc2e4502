
use chrono::{Duration, Utc};
use fanout_core::{FanoutError, IngestOutcome, InboundMessage, TickOutcome, MAX_MUTE_HOURS};
use fanout_domain::payload::{decode_json, encode_data, encode_json};
use fanout_domain::{MemberStatus, MessageStatus, PriorityTier, RecallBody, TenantMember, CATEGORY_PLAIN_TEXT,
                    CATEGORY_RECALL};
use test_support::{Harness, TENANT};

fn inbound(id: &str, sender: &str) -> InboundMessage {
    InboundMessage { sender_id: sender.into(),
                     message_id: id.into(),
                     category: CATEGORY_PLAIN_TEXT.into(),
                     data: encode_data(b"hola"),
                     quote_message_id: Some(String::new()),
                     representative_id: None }
}

#[tokio::test]
async fn ingest_accepts_members_once() {
    let h = Harness::new().await;
    h.member("u1", PriorityTier::High).await;

    assert_eq!(h.ingestor.ingest(TENANT, inbound("m1", "u1")).await.unwrap(), IngestOutcome::Accepted);
    assert_eq!(h.ingestor.ingest(TENANT, inbound("m1", "u1")).await.unwrap(), IngestOutcome::Duplicate);

    let stored = h.store.message(TENANT, "m1").await.unwrap();
    assert_eq!(stored.status, MessageStatus::Pending);
    assert_eq!(stored.quote_message_id, None);
}

#[tokio::test]
async fn ingest_rejects_strangers_and_blocked_but_not_the_tenant() {
    let h = Harness::new().await;
    h.member("u3", PriorityTier::Low).await;
    assert_eq!(h.ingestor.ingest(TENANT, inbound("m1", "nobody")).await.unwrap(), IngestOutcome::NotMember);

    h.gate.block_member(TENANT, "u3").await.unwrap();
    assert_eq!(h.ingestor.ingest(TENANT, inbound("m2", "u3")).await.unwrap(), IngestOutcome::Blocked);

    assert_eq!(h.ingestor.ingest(TENANT, inbound("m3", TENANT)).await.unwrap(), IngestOutcome::Accepted);
}

#[tokio::test]
async fn muted_member_can_only_recall() {
    let h = Harness::new().await;
    h.member("u1", PriorityTier::High).await;
    h.moderation.mute_member(TENANT, "u1", 2).await.unwrap();

    match h.ingestor.ingest(TENANT, inbound("m1", "u1")).await.unwrap() {
        IngestOutcome::Muted { hours, minutes } => {
            assert_eq!(hours, 1);
            assert!(minutes >= 58);
        }
        other => panic!("unexpected {other:?}"),
    }

    let mut recall = inbound("r1", "u1");
    recall.category = CATEGORY_RECALL.into();
    recall.data = encode_json(&RecallBody { message_id: "m0".into() }).unwrap();
    assert_eq!(h.ingestor.ingest(TENANT, recall).await.unwrap(), IngestOutcome::Accepted);

    h.moderation.mute_member(TENANT, "u1", 0).await.unwrap();
    assert_eq!(h.ingestor.ingest(TENANT, inbound("m2", "u1")).await.unwrap(), IngestOutcome::Accepted);
}

#[tokio::test]
async fn block_member_recalls_last_hour_and_stops_delivery() {
    let h = Harness::new().await;
    h.member("u1", PriorityTier::High).await;
    h.member("u2", PriorityTier::High).await;
    h.member("u3", PriorityTier::High).await;
    let now = Utc::now();
    h.message("recent", "u3", MessageStatus::Finished, now - Duration::minutes(10)).await;
    h.message("old", "u3", MessageStatus::Finished, now - Duration::hours(3)).await;
    h.planner
     .expand(TENANT, &h.store.message(TENANT, "recent").await.unwrap(), &[PriorityTier::High, PriorityTier::Low])
     .await
     .unwrap();

    assert_eq!(h.moderation.block_member(TENANT, "u3").await.unwrap(), 1);
    let member = h.store.member(TENANT, "u3").await.unwrap();
    assert_eq!(member.priority, PriorityTier::Stop);
    assert_eq!(member.status, MemberStatus::Blocked);
    assert!(h.gate.is_excluded(TENANT, "u3"));

    // El recall generado se expande como cualquier otro mensaje
    let outcome = h.scheduler.tick(TENANT).await;
    assert_eq!(outcome, TickOutcome::Expanded { status: MessageStatus::Privileged, rows: 2 });
    assert_eq!(h.store.message(TENANT, "recent").await.unwrap().status, MessageStatus::Recalled);
    assert_eq!(h.store.message(TENANT, "old").await.unwrap().status, MessageStatus::Finished);
    let recall_rows: Vec<_> = h.store
                               .distribute_rows()
                               .await
                               .into_iter()
                               .filter(|r| r.category == CATEGORY_RECALL)
                               .collect();
    assert_eq!(recall_rows.len(), 2);
    for row in recall_rows {
        let body: RecallBody = decode_json(&row.data).unwrap();
        assert_ne!(body.message_id, "recent");
    }

    h.moderation.unblock_member(TENANT, "u3").await.unwrap();
    assert!(!h.gate.is_excluded(TENANT, "u3"));
    assert_eq!(h.store.member(TENANT, "u3").await.unwrap().priority, PriorityTier::Low);
}

#[tokio::test]
async fn global_block_applies_to_every_tenant() {
    let h = Harness::new().await;
    h.store.add_member(TenantMember::new("t2", "spam", PriorityTier::Low)).await;
    h.moderation.block_globally("spam").await.unwrap();
    assert!(h.gate.is_excluded(TENANT, "spam"));
    assert_eq!(h.ingestor.ingest("t2", inbound("m1", "spam")).await.unwrap(), IngestOutcome::Blocked);

    h.gate.refresh().await.unwrap();
    assert!(h.gate.is_excluded("t2", "spam"));
}

#[tokio::test]
async fn moderation_of_unknown_member_fails() {
    let h = Harness::new().await;
    let err = h.moderation.mute_member(TENANT, "ghost", 1).await.unwrap_err();
    assert!(matches!(err, FanoutError::UnknownMember { .. }));
    assert!(h.moderation.block_member(TENANT, "ghost").await.is_err());
}

#[tokio::test]
async fn mute_is_capped_and_never_overflows() {
    let h = Harness::new().await;
    h.member("u2", PriorityTier::High).await;

    let err = h.moderation.mute_member(TENANT, "u2", u32::MAX).await.unwrap_err();
    assert!(matches!(err, FanoutError::InvalidMute { hours: u32::MAX, max: MAX_MUTE_HOURS }));
    assert!(h.store.member(TENANT, "u2").await.unwrap().muted_until.is_none());

    h.moderation.mute_member(TENANT, "u2", MAX_MUTE_HOURS).await.unwrap();
    let until = h.store.member(TENANT, "u2").await.unwrap().muted_until.unwrap();
    assert!(until > Utc::now() + Duration::days(364));
}

#[tokio::test]
async fn tenant_scoped_moderation_needs_a_registered_tenant() {
    let h = Harness::new().await;
    h.store.add_member(TenantMember::new("t2", "u1", PriorityTier::Low)).await;

    let err = h.moderation.mute_member("t2", "u1", 1).await.unwrap_err();
    assert!(matches!(err, FanoutError::UnknownTenant(ref t) if t == "t2"));
    assert!(matches!(h.moderation.block_member("t2", "u1").await, Err(FanoutError::UnknownTenant(_))));
    assert!(matches!(h.moderation.recall_as_manager("t2", "m1", "mgr").await, Err(FanoutError::UnknownTenant(_))));
    assert!(h.store.messages("t2").await.is_empty());
    assert!(!h.gate.is_excluded("t2", "u1"));
}

#[tokio::test]
async fn manager_recall_excludes_the_manager_and_hits_every_copy() {
    let h = Harness::new().await;
    h.member("u1", PriorityTier::High).await;
    h.member("u2", PriorityTier::High).await;
    h.member("mgr", PriorityTier::High).await;
    h.message("m1", "u1", MessageStatus::Finished, Utc::now() - Duration::minutes(1)).await;
    h.planner
     .expand(TENANT, &h.store.message(TENANT, "m1").await.unwrap(), &[PriorityTier::High])
     .await
     .unwrap();

    let recall_id = h.moderation.recall_as_manager(TENANT, "m1", "mgr").await.unwrap();
    let recall = h.store.message(TENANT, &recall_id).await.unwrap();
    assert_eq!(recall.status, MessageStatus::Pending);
    assert_eq!(recall.category, CATEGORY_RECALL);

    h.scheduler.tick(TENANT).await;
    assert_eq!(h.store.message(TENANT, "m1").await.unwrap().status, MessageStatus::Recalled);
    let recipients: Vec<String> = h.store
                                   .distribute_rows()
                                   .await
                                   .into_iter()
                                   .filter(|r| r.origin_message_id == recall_id)
                                   .map(|r| r.user_id)
                                   .collect();
    // u2 tenía copia; mgr es el emisor del recall
    assert_eq!(recipients, vec!["u2"]);
}
