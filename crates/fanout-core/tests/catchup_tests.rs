
use chrono::{Duration, Utc};
use fanout_core::{FanoutConfig, FanoutError, FanoutStore};
use fanout_domain::payload::{decode_json, encode_json};
use fanout_domain::{unique_conversation_id, CanonicalMessage, DistributeStatus, MessageStatus, PinAction, PinBody,
                    PriorityTier, RecallBody, CATEGORY_PIN, CATEGORY_RECALL};
use test_support::{test_config, Harness, TENANT};

/// Backlog de 1 hora: m1..m3 entregados por u1, uno propio de u9, un
/// control y un pendiente.
async fn backlog(h: &Harness) -> chrono::DateTime<Utc> {
    let start = Utc::now() - Duration::hours(1);
    h.member("u9", PriorityTier::Low).await;
    h.message("m1", "u1", MessageStatus::Finished, start + Duration::minutes(1)).await;
    h.message("m2", "u1", MessageStatus::Privileged, start + Duration::minutes(2)).await;
    h.message("own", "u9", MessageStatus::Finished, start + Duration::minutes(3)).await;
    h.message("m3", "u1", MessageStatus::Pinned, start + Duration::minutes(4)).await;
    h.message("later", "u1", MessageStatus::Pending, start + Duration::minutes(5)).await;
    let recall = CanonicalMessage::new(TENANT,
                                       "r1",
                                       "u1",
                                       CATEGORY_RECALL,
                                       encode_json(&RecallBody { message_id: "x".into() }).unwrap())
        .with_status(MessageStatus::Finished)
        .with_created_at(start + Duration::minutes(6));
    h.store.insert_message(&recall).await.unwrap();
    start
}

#[tokio::test]
async fn resend_selects_delivered_content_and_advances_cursor() {
    let h = Harness::new().await;
    let start = backlog(&h).await;

    let cursor = h.catchup.resend(TENANT, "u9", start).await.unwrap();
    // El más nuevo seleccionado es "own" o m3; controles y pendientes no cuentan
    assert_eq!(cursor, Some(start + Duration::minutes(4)));

    let sent = h.transport.sent_to("u9");
    let categories: Vec<&str> = sent.iter().map(|m| m.category.as_str()).collect();
    assert_eq!(categories, vec!["PLAIN_TEXT", "PLAIN_TEXT", "PLAIN_TEXT", CATEGORY_PIN]);
    // Orden cronológico, sin mensajes propios
    let origins: Vec<String> = h.store
                                .rows_for(TENANT, "u9")
                                .await
                                .into_iter()
                                .map(|r| r.origin_message_id)
                                .collect();
    assert_eq!(&origins[..3], &["m1", "m2", "m3"]);
    assert!(sent.iter().all(|m| m.conversation_id == unique_conversation_id(TENANT, "u9")));
    assert!(h.store
             .rows_for(TENANT, "u9")
             .await
             .iter()
             .all(|r| r.status == DistributeStatus::Finished));

    // Siguiente llamada: nada posterior al cursor
    assert_eq!(h.catchup.resend(TENANT, "u9", cursor.unwrap()).await.unwrap(), None);
}

#[tokio::test]
async fn pinned_message_gets_companion_pin() {
    let h = Harness::new().await;
    let start = backlog(&h).await;
    h.catchup.resend(TENANT, "u9", start).await.unwrap();

    let rows = h.store.rows_for(TENANT, "u9").await;
    let m3_copy = rows.iter().find(|r| r.origin_message_id == "m3").unwrap();
    let companion = rows.iter().find(|r| r.category == CATEGORY_PIN).unwrap();
    assert_eq!(companion.message_id, unique_conversation_id("u9", "m3"));
    let body: PinBody = decode_json(&companion.data).unwrap();
    assert_eq!(body.action, PinAction::Pin);
    assert_eq!(body.message_ids, vec![m3_copy.message_id.clone()]);
    assert_eq!(companion.representative_id, None);
}

#[tokio::test]
async fn repeated_resend_does_not_duplicate() {
    let h = Harness::new().await;
    let start = backlog(&h).await;
    h.catchup.resend(TENANT, "u9", start).await.unwrap();
    let first = h.transport.sent().len();
    h.catchup.resend(TENANT, "u9", start).await.unwrap();
    assert_eq!(h.transport.sent().len(), first);
    assert_eq!(h.store.rows_for(TENANT, "u9").await.len(), 4);
}

#[tokio::test]
async fn catch_up_loop_terminates() {
    let h = Harness::new().await;
    let start = backlog(&h).await;
    let rounds = h.catchup.catch_up_from(TENANT, "u9", start).await.unwrap();
    assert_eq!(rounds, 1);
    assert_eq!(h.catchup.catch_up_from(TENANT, "u9", Utc::now()).await.unwrap(), 0);
}

#[tokio::test]
async fn catch_up_rounds_are_bounded() {
    let h = Harness::with_config(FanoutConfig { catchup_max_rounds: 1, ..test_config() }).await;
    let start = backlog(&h).await;
    let err = h.catchup.catch_up_from(TENANT, "u9", start).await.unwrap_err();
    assert!(matches!(err, FanoutError::CatchupExhausted { rounds: 1 }));
}

#[tokio::test]
async fn unknown_tenant_is_rejected_before_any_send() {
    let h = Harness::new().await;
    backlog(&h).await;
    let from = Utc::now() - Duration::hours(2);

    let err = h.catchup.resend("nope", "u9", from).await.unwrap_err();
    assert!(matches!(err, FanoutError::UnknownTenant(ref t) if t == "nope"));
    assert!(matches!(h.catchup.catch_up_from("nope", "u9", from).await, Err(FanoutError::UnknownTenant(_))));
    assert!(matches!(h.catchup.backfill_latest("nope", "u9").await, Err(FanoutError::UnknownTenant(_))));
    assert!(matches!(h.catchup.flush_standalone("nope", "u9").await, Err(FanoutError::UnknownTenant(_))));
    assert!(h.transport.sent().is_empty());
    assert!(h.store.distribute_rows().await.is_empty());
}

#[tokio::test]
async fn failed_sends_stay_standalone_until_flushed() {
    let h = Harness::new().await;
    let start = backlog(&h).await;
    h.transport.fail_for("u9");
    h.catchup.resend(TENANT, "u9", start).await.unwrap();
    assert!(h.transport.sent_to("u9").is_empty());
    let rows = h.store.rows_for(TENANT, "u9").await;
    assert_eq!(rows.len(), 4);
    assert!(rows.iter().all(|r| r.status == DistributeStatus::Standalone));

    h.transport.recover("u9");
    assert_eq!(h.catchup.flush_standalone(TENANT, "u9").await.unwrap(), 4);
    assert!(h.store
             .rows_for(TENANT, "u9")
             .await
             .iter()
             .all(|r| r.status == DistributeStatus::Finished));
    assert_eq!(h.catchup.flush_standalone(TENANT, "u9").await.unwrap(), 0);
}

#[tokio::test]
async fn backfill_sends_latest_plus_pinned_and_restores_priority() {
    let h = Harness::with_config(FanoutConfig { backfill_count: 1, ..test_config() }).await;
    h.member("new", PriorityTier::High).await;
    let now = Utc::now();
    h.message("old-pin", "u1", MessageStatus::Pinned, now - Duration::days(3)).await;
    h.message("old", "u1", MessageStatus::Finished, now - Duration::days(2)).await;
    h.message("a", "u1", MessageStatus::Finished, now - Duration::hours(2)).await;
    h.message("b", "u1", MessageStatus::Finished, now - Duration::hours(1)).await;

    let sent = h.catchup.backfill_latest(TENANT, "new").await.unwrap();
    // b (último) + old-pin + su pin compañero
    assert_eq!(sent, 3);
    let mut origins: Vec<String> = h.store
                                    .rows_for(TENANT, "new")
                                    .await
                                    .into_iter()
                                    .map(|r| r.origin_message_id)
                                    .filter(|o| o == "b" || o == "old-pin" || o == "a" || o == "old")
                                    .collect();
    origins.sort();
    assert_eq!(origins, vec!["b", "old-pin"]);
    assert_eq!(h.store.member(TENANT, "new").await.unwrap().priority, PriorityTier::High);
}

#[tokio::test]
async fn backfill_of_unknown_or_stopped_member() {
    let h = Harness::new().await;
    let err = h.catchup.backfill_latest(TENANT, "ghost").await.unwrap_err();
    assert!(matches!(err, FanoutError::UnknownMember { .. }));

    h.member("stopped", PriorityTier::Stop).await;
    h.message("a", "u1", MessageStatus::Finished, Utc::now() - Duration::minutes(5)).await;
    assert_eq!(h.catchup.backfill_latest(TENANT, "stopped").await.unwrap(), 0);
    assert!(h.transport.sent().is_empty());
}
