//! End-to-end effect feedback scenarios driven through the test store.

use std::time::Duration;

use tiller_core::{Effect, Reducer};
use tiller_testkit::{DiagnosticKind, TestStore};

#[derive(Clone, Debug, PartialEq, Eq, Default)]
struct FeedState {
    responses: u32,
}

#[derive(Debug, PartialEq, Eq)]
enum FeedAction {
    Tapped,
    Response,
}

fn feed_reducer(
    on_tapped: impl Fn() -> Effect<FeedAction> + Send + Sync + 'static,
) -> Reducer<FeedState, FeedAction, ()> {
    Reducer::new(move |state: &mut FeedState, action: FeedAction, _env: &()| match action {
        FeedAction::Tapped => on_tapped(),
        FeedAction::Response => {
            state.responses += 1;
            Effect::none()
        }
    })
}

#[tokio::test]
async fn run_effect_feeds_its_action_back() {
    tiller_testkit::init_test_logging();
    let reducer = feed_reducer(|| {
        Effect::run(|ctx| async move {
            ctx.send(FeedAction::Response).await;
            Ok(())
        })
    });
    let store = TestStore::new(FeedState::default(), reducer, ());

    store.send(FeedAction::Tapped).await;
    store.receive(FeedAction::Response).await;
    store.finish().await;

    assert_eq!(store.state().await.responses, 1);
    assert!(store.diagnostics().is_empty());
}

#[tokio::test]
async fn catch_handler_receives_the_failure_and_can_send() {
    let reducer = feed_reducer(|| {
        Effect::run_catching(
            |_ctx| async move { Err(anyhow::anyhow!("backend unavailable")) },
            |_failure, ctx| async move {
                ctx.send(FeedAction::Response).await;
            },
        )
    });
    let store = TestStore::new(FeedState::default(), reducer, ());

    store.send(FeedAction::Tapped).await;
    store.receive(FeedAction::Response).await;
    store.finish().await;

    // The handled failure never becomes a diagnostic.
    assert_eq!(store.state().await.responses, 1);
    assert!(store.diagnostics().is_empty());
}

#[tokio::test]
async fn unhandled_failure_is_reported_not_lost() {
    let reducer =
        feed_reducer(|| Effect::run(|_ctx| async move { Err(anyhow::anyhow!("backend exploded")) }));
    let store = TestStore::new(FeedState::default(), reducer, ());

    let task = store.send(FeedAction::Tapped).await;
    task.finish_within(Duration::from_secs(5))
        .await
        .expect("the failed effect still settles");

    let diagnostics = store.diagnostics();
    assert_eq!(diagnostics.len(), 1, "exactly one diagnostic per failure");
    assert_eq!(diagnostics[0].kind, DiagnosticKind::UnhandledFailure);
    assert!(diagnostics[0].message.contains("effect_run.rs"));
    assert!(diagnostics[0].message.contains("backend exploded"));
    assert!(diagnostics[0].message.contains("must be handled explicitly"));

    // The transition loop survived the contract violation.
    store.send(FeedAction::Response).await;
    assert_eq!(store.state().await.responses, 1);
}

#[tokio::test]
async fn self_cancelled_effect_delivers_nothing() {
    let reducer = feed_reducer(|| {
        Effect::run(|ctx| async move {
            ctx.cancel_current();
            ctx.send(FeedAction::Response).await;
            Ok(())
        })
    });
    let store = TestStore::new(FeedState::default(), reducer, ());

    store.send(FeedAction::Tapped).await.finish().await;
    store.finish().await;

    assert_eq!(store.pending_actions(), 0);
    assert_eq!(store.state().await.responses, 0);
    assert!(store.diagnostics().is_empty());
}

#[tokio::test]
async fn cancellation_short_circuits_the_catch_handler() {
    let reducer = feed_reducer(|| {
        Effect::run_catching(
            |ctx| async move {
                ctx.cancel_current();
                ctx.check_cancellation()?;
                ctx.send(FeedAction::Response).await;
                Ok(())
            },
            |_failure, ctx| async move {
                ctx.send(FeedAction::Response).await;
            },
        )
    });
    let store = TestStore::new(FeedState::default(), reducer, ());

    store.send(FeedAction::Tapped).await.finish().await;
    store.finish().await;

    assert_eq!(store.pending_actions(), 0);
    assert_eq!(store.state().await.responses, 0);
    assert!(store.diagnostics().is_empty());
}

#[derive(Clone, Debug, PartialEq, Eq, Default)]
struct BranchState {
    a: u32,
    b: u32,
}

#[derive(Debug, PartialEq, Eq)]
enum BranchAction {
    Tapped,
    ResponseA,
    ResponseB,
}

#[tokio::test]
async fn cancelling_one_concurrent_branch_keeps_the_other() {
    let reducer = Reducer::new(
        |state: &mut BranchState, action: BranchAction, _env: &()| match action {
            BranchAction::Tapped => Effect::run(|ctx| async move {
                let mut group = ctx.task_group();
                group.spawn_unless_cancelled(|ctx| async move {
                    ctx.cancel_current();
                    ctx.send(BranchAction::ResponseA).await;
                    Ok(())
                });
                group.spawn_unless_cancelled(|ctx| async move {
                    ctx.send(BranchAction::ResponseB).await;
                    Ok(())
                });
                group.wait_all().await
            }),
            BranchAction::ResponseA => {
                state.a += 1;
                Effect::none()
            }
            BranchAction::ResponseB => {
                state.b += 1;
                Effect::none()
            }
        },
    );
    let store = TestStore::new(BranchState::default(), reducer, ());

    store.send(BranchAction::Tapped).await;
    store.receive(BranchAction::ResponseB).await;
    store.finish().await;

    // The cancelled branch's action is never observed.
    let state = store.state().await;
    assert_eq!(state, BranchState { a: 0, b: 1 });
    assert_eq!(store.pending_actions(), 0);
    assert!(store.diagnostics().is_empty());
}

#[tokio::test]
async fn group_propagates_the_first_unhandled_child_failure() {
    let reducer = feed_reducer(|| {
        Effect::run_catching(
            |ctx| async move {
                let mut group = ctx.task_group();
                group.spawn_unless_cancelled(|_ctx| async move {
                    Err(anyhow::anyhow!("child blew up"))
                });
                group.spawn_unless_cancelled(|ctx| async move {
                    ctx.cancel_current();
                    Err(anyhow::anyhow!("cancelled child failure is suppressed"))
                });
                group.wait_all().await
            },
            |failure, ctx| async move {
                assert!(failure.to_string().contains("child blew up"));
                ctx.send(FeedAction::Response).await;
            },
        )
    });
    let store = TestStore::new(FeedState::default(), reducer, ());

    store.send(FeedAction::Tapped).await;
    store.receive(FeedAction::Response).await;
    store.finish().await;

    assert_eq!(store.state().await.responses, 1);
    assert!(store.diagnostics().is_empty());
}

#[tokio::test]
async fn send_expecting_asserts_the_transition() {
    let reducer = feed_reducer(Effect::none);
    let store = TestStore::new(FeedState::default(), reducer, ());

    store
        .send_expecting(FeedAction::Response, |state| state.responses = 1)
        .await;
    store.finish().await;
}
