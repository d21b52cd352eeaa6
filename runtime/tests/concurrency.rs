//! Racing callers against one engine.

#![allow(clippy::unwrap_used)]

use futures::future::join_all;
use std::collections::BTreeSet;
use waitlist_core::{Decision, ErrorKind, UserId, WaitlistStatus};
use waitlist_testing::TestHarness;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_joins_by_one_user_leave_one_active_entry() {
    let h = TestHarness::new();
    let event = h.full_event(5);
    let user = UserId::new();

    let results = join_all((0..8).map(|_| {
        let engine = h.engine.clone();
        tokio::spawn(async move { engine.join(event, user).await })
    }))
    .await;

    let (ok, err): (Vec<_>, Vec<_>) = results
        .into_iter()
        .map(|joined| joined.unwrap())
        .partition(Result::is_ok);
    assert_eq!(ok.len(), 1);
    assert!(err.iter().all(|r| r.as_ref().unwrap_err().kind() == ErrorKind::Conflict));
    assert_eq!(h.store.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_cancellations_promote_exactly_the_earliest_joiners() {
    let h = TestHarness::new();
    let event = h.full_event(10);
    let users = h.join_in_order(event, 6).await;

    for _ in 0..3 {
        h.tracker.cancel_external(event);
    }
    let results = join_all((0..3).map(|_| {
        let engine = h.engine.clone();
        tokio::spawn(async move { engine.on_participant_canceled(event).await })
    }))
    .await;

    let promoted: usize = results
        .into_iter()
        .map(|report| report.unwrap().unwrap().promoted.len())
        .sum();
    assert_eq!(promoted, 3);

    let notified: BTreeSet<UserId> = h
        .store
        .entries(event)
        .into_iter()
        .filter(|e| e.status == WaitlistStatus::Notified)
        .map(|e| e.user_id)
        .collect();
    assert_eq!(notified, users[..3].iter().copied().collect());
    assert_eq!(h.engine.position_of(event, users[3]).await.unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_accepts_register_once() {
    let h = TestHarness::new();
    let event = h.full_event(3);
    let users = h.join_in_order(event, 1).await;
    h.cancel_participant(event).await;

    let results = join_all((0..4).map(|_| {
        let engine = h.engine.clone();
        let user = users[0];
        tokio::spawn(async move { engine.respond(event, user, Decision::Accept).await })
    }))
    .await;

    for result in results {
        assert_eq!(result.unwrap().unwrap().status, WaitlistStatus::Accepted);
    }
    assert_eq!(h.tracker.confirmed(event), 3);
    assert_eq!(h.tracker.registered(event).len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn accept_racing_the_sweep_has_one_winner() {
    let h = TestHarness::new();
    let event = h.full_event(3);
    let users = h.join_in_order(event, 2).await;
    let report = h.cancel_participant(event).await;
    h.clock.set(report.promoted[0].response_deadline.unwrap());

    let engine = h.engine.clone();
    let user = users[0];
    let accept = tokio::spawn(async move { engine.respond(event, user, Decision::Accept).await });
    let engine = h.engine.clone();
    let sweep = tokio::spawn(async move { engine.run_maintenance().await });

    let accepted = accept.await.unwrap().unwrap();
    sweep.await.unwrap().unwrap();

    // At the deadline the response is still on time and the sweep has nothing to expire.
    assert_eq!(accepted.status, WaitlistStatus::Accepted);
    assert_eq!(h.store.status_of(event, users[1]), Some(WaitlistStatus::Waiting));
    assert_eq!(h.tracker.confirmed(event), 3);
}
