//! Cancellation identities, deduplication, and settlement accounting.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use tiller_core::{Effect, Reducer};
use tiller_testkit::{StoreError, TestStore};

#[derive(Debug, PartialEq, Eq)]
enum SyncAction {
    Start,
    Stop,
}

#[tokio::test]
async fn cancel_by_id_settles_the_waiting_effect() {
    let reducer = Reducer::new(|_state: &mut (), action: SyncAction, _env: &()| match action {
        SyncAction::Start => Effect::run(|ctx| async move {
            ctx.cancelled().await;
            Ok(())
        })
        .cancellable("sync"),
        SyncAction::Stop => Effect::cancel("sync"),
    });
    let store = TestStore::new((), reducer, ());

    store.send(SyncAction::Start).await;
    store.send(SyncAction::Stop).await;
    store.finish().await;

    assert!(store.diagnostics().is_empty());
}

#[tokio::test]
async fn cancel_with_no_matching_work_is_a_no_op() {
    let reducer = Reducer::new(|_state: &mut (), action: SyncAction, _env: &()| match action {
        SyncAction::Start => Effect::none(),
        SyncAction::Stop => Effect::cancel("sync"),
    });
    let store = TestStore::new((), reducer, ());

    store.send(SyncAction::Stop).await;
    store.send(SyncAction::Stop).await;
    store.finish().await;

    assert!(store.diagnostics().is_empty());
}

#[tokio::test]
async fn replacing_id_cancels_the_in_flight_predecessor() {
    let observed = Arc::new(AtomicUsize::new(0));
    let reducer = {
        let observed = Arc::clone(&observed);
        Reducer::new(move |_state: &mut (), action: SyncAction, _env: &()| match action {
            SyncAction::Start => {
                let observed = Arc::clone(&observed);
                Effect::run(move |ctx| async move {
                    ctx.cancelled().await;
                    observed.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .cancellable_replacing("sync")
            }
            SyncAction::Stop => Effect::cancel("sync"),
        })
    };
    let store = TestStore::new((), reducer, ());

    store.send(SyncAction::Start).await;
    // The second trigger replaces the first in-flight effect.
    store.send(SyncAction::Start).await;
    store.send(SyncAction::Stop).await;
    store.finish().await;

    assert_eq!(observed.load(Ordering::SeqCst), 2);
    assert!(store.diagnostics().is_empty());
}

#[tokio::test]
async fn finish_timeout_names_the_outstanding_effect() {
    let reducer = Reducer::new(|_state: &mut (), action: SyncAction, _env: &()| match action {
        SyncAction::Start => Effect::run(|ctx| async move {
            // Never completes without a cancellation signal.
            ctx.cancelled().await;
            Ok(())
        }),
        SyncAction::Stop => Effect::none(),
    });
    let store = TestStore::new((), reducer, ());

    store.send(SyncAction::Start).await;
    let outcome = store.finish_within(Duration::from_millis(50)).await;

    assert_matches!(
        &outcome,
        Err(StoreError::FinishTimeout { outstanding }) if outstanding.len() == 1
    );
    let message = outcome.expect_err("the wait must time out").to_string();
    assert!(message.contains("cancellation.rs"));
}
