//! Routing, dialog matching and shutdown of the session registry

mod common;

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use tokio::sync::watch;

use tonecall_call_core::{CallEvent, CallState, RegistryError, SessionRegistry};
use tonecall_sip_core::Method;

use common::*;

#[tokio::test(start_paused = true)]
async fn test_retransmitted_invite_reuses_session() {
    let sender = RecordingSender::new();
    let registry = SessionRegistry::new(test_config(), sender.clone(), SpyAudio::new());

    let inv = invite("dup-1", "r1");
    let first = registry.dispatch(dialog_of(&inv), CallEvent::Invite(inv.clone())).await.unwrap();
    let second = registry.dispatch(dialog_of(&inv), CallEvent::Invite(inv.clone())).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(registry.len(), 1);

    let mut state = registry.subscribe("dup-1", "r1").unwrap();
    wait_for_state(&mut state, CallState::Ringing).await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(sender.statuses(Method::Invite), vec![100, 180]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_invites_create_one_session() {
    let sender = RecordingSender::new();
    let registry = SessionRegistry::new(test_config(), sender.clone(), SpyAudio::new());

    let mut handles = Vec::new();
    for _ in 0..16 {
        let registry = registry.clone();
        handles.push(tokio::spawn(async move {
            let inv = invite("dup-2", "r2");
            registry.dispatch(dialog_of(&inv), CallEvent::Invite(inv)).await
        }));
    }

    let mut local_tags = Vec::new();
    for handle in handles {
        local_tags.push(handle.await.unwrap().unwrap().local_tag);
    }
    local_tags.dedup();
    assert_eq!(local_tags.len(), 1);
    assert_eq!(registry.len(), 1);
    registry.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_distinct_from_tags_are_distinct_calls() {
    let registry = SessionRegistry::new(test_config(), RecordingSender::new(), SpyAudio::new());

    let a = invite("shared-call-id", "caller-a");
    let b = invite("shared-call-id", "caller-b");
    let dialog_a = registry.dispatch(dialog_of(&a), CallEvent::Invite(a)).await.unwrap();
    let dialog_b = registry.dispatch(dialog_of(&b), CallEvent::Invite(b)).await.unwrap();

    assert_ne!(dialog_a, dialog_b);
    assert_eq!(registry.len(), 2);
    assert_eq!(registry.dialog_of("shared-call-id", "caller-a"), Some(dialog_a));
}

#[tokio::test(start_paused = true)]
async fn test_requests_for_unknown_dialogs() {
    let registry = SessionRegistry::new(test_config(), RecordingSender::new(), SpyAudio::new());

    let stale = bye("nobody", "r1", "deadbeef");
    let err = registry.dispatch(dialog_of(&stale), CallEvent::Bye(stale)).await.unwrap_err();
    assert!(err.is_unknown_dialog());

    let err = registry.handle_request(cancel("nobody", "r1")).await.unwrap_err();
    assert!(err.is_unknown_dialog());

    let inv = invite("known", "r1");
    let dialog = registry.dispatch(dialog_of(&inv), CallEvent::Invite(inv)).await.unwrap();
    let wrong_tag = format!("{}x", dialog.local_tag);
    let misrouted = bye("known", "r1", &wrong_tag);
    let err = registry
        .dispatch(dialog_of(&misrouted), CallEvent::Bye(misrouted))
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::UnknownDialog { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_tagged_invite_without_session_is_rejected() {
    let registry = SessionRegistry::new(test_config(), RecordingSender::new(), SpyAudio::new());
    let inv = invite("reinvite", "r1");
    let dialog = dialog_of(&inv).with_local_tag("abcd1234");

    let err = registry.dispatch(dialog, CallEvent::Invite(inv)).await.unwrap_err();
    assert!(err.is_unknown_dialog());
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_register_and_options_are_answered() {
    let sender = RecordingSender::new();
    let registry = SessionRegistry::new(test_config(), sender.clone(), SpyAudio::new());

    registry.handle_request(request(Method::Register, "reg-1")).await.unwrap();
    registry.handle_request(request(Method::Options, "opt-1")).await.unwrap();

    assert_eq!(sender.statuses(Method::Register), vec![200]);
    let options = sender.last_for(Method::Options).unwrap();
    assert_eq!(options.status.as_u16(), 200);
    let allow = options.headers.iter().find(|h| h.is("Allow")).unwrap();
    assert_eq!(allow.value, Method::allow_header_value());
    let accept = options.headers.iter().find(|h| h.is("Accept")).unwrap();
    assert_eq!(accept.value, "application/sdp");
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_unsupported_method_and_missing_tag() {
    let registry = SessionRegistry::new(test_config(), RecordingSender::new(), SpyAudio::new());

    let message = request(Method::Extension("MESSAGE".to_string()), "msg-1");
    let err = registry.handle_request(message).await.unwrap_err();
    assert_eq!(err, RegistryError::UnsupportedMethod("MESSAGE".to_string()));

    let mut untagged = invite("no-tag", "r1");
    let mut stripped = (*untagged.request).clone();
    for header in stripped.headers.iter_mut().filter(|h| h.is("From")) {
        header.value = "<sip:alice@192.0.2.20>".to_string();
    }
    untagged.request = Arc::new(stripped);
    let err = registry.handle_request(untagged).await.unwrap_err();
    assert_eq!(err, RegistryError::MissingDialogField("From tag"));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_rejects_pending_invites() {
    let sender = RecordingSender::new();
    let registry = SessionRegistry::new(test_config(), sender.clone(), SpyAudio::new());

    let ringing = invite("sd-1", "r1");
    registry.dispatch(dialog_of(&ringing), CallEvent::Invite(ringing)).await.unwrap();
    let mut state = registry.subscribe("sd-1", "r1").unwrap();
    wait_for_state(&mut state, CallState::Ringing).await;

    registry.shutdown().await;
    assert_eq!(*state.borrow(), CallState::Terminated);
    assert_eq!(sender.statuses(Method::Invite), vec![100, 180, 503]);
    assert!(registry.is_empty());
    assert!(registry.is_shutting_down());

    let late = invite("sd-2", "r2");
    let err = registry.dispatch(dialog_of(&late), CallEvent::Invite(late)).await.unwrap_err();
    assert_eq!(err, RegistryError::ShuttingDown);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shutdown_racing_new_invites_leaves_no_session() {
    for round in 0..20 {
        let registry = SessionRegistry::new(test_config(), RecordingSender::new(), SpyAudio::new());

        let mut handles = Vec::new();
        for n in 0..8 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                let tx = invite(&format!("race-{}-{}", round, n), "r1");
                registry.dispatch(dialog_of(&tx), CallEvent::Invite(tx)).await
            }));
        }
        registry.shutdown().await;
        for handle in handles {
            // Each INVITE either got in before shutdown or was refused
            let _ = handle.await.unwrap();
        }

        assert!(registry.is_empty(), "round {} left {} sessions", round, registry.len());
    }
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_established_call() {
    let sender = RecordingSender::new();
    let registry = SessionRegistry::new(test_config(), sender.clone(), SpyAudio::new());

    let inv = invite("sd-3", "r3");
    let dialog = registry.dispatch(dialog_of(&inv), CallEvent::Invite(inv)).await.unwrap();
    let mut state = registry.subscribe("sd-3", "r3").unwrap();
    wait_for_state(&mut state, CallState::Accepted).await;
    let ack = ack("sd-3", "r3", &dialog.local_tag);
    registry.dispatch(dialog_of(&ack), CallEvent::Ack(ack)).await.unwrap();
    wait_for_state(&mut state, CallState::Established).await;

    registry.shutdown().await;
    assert_eq!(*state.borrow(), CallState::Terminated);
    // Only the INVITE was answered; an established call gets no 503
    assert_eq!(sender.statuses(Method::Invite), vec![100, 180, 200]);
}

#[derive(Debug, Clone)]
enum Op {
    Invite,
    Ack,
    Bye,
    Cancel,
    Wait(u64),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::Invite),
        Just(Op::Ack),
        Just(Op::Bye),
        Just(Op::Cancel),
        (0u64..40_000).prop_map(Op::Wait),
    ]
}

async fn apply(registry: &SessionRegistry, op: &Op, local_tag: &str) {
    let result = match op {
        Op::Invite => {
            let tx = invite("prop", "rp");
            registry.dispatch(dialog_of(&tx), CallEvent::Invite(tx)).await
        }
        Op::Ack => {
            let tx = ack("prop", "rp", local_tag);
            registry.dispatch(dialog_of(&tx), CallEvent::Ack(tx)).await
        }
        Op::Bye => {
            let tx = bye("prop", "rp", local_tag);
            registry.dispatch(dialog_of(&tx), CallEvent::Bye(tx)).await
        }
        Op::Cancel => {
            let tx = cancel("prop", "rp");
            registry.dispatch(dialog_of(&tx), CallEvent::Cancel(tx)).await
        }
        Op::Wait(ms) => {
            tokio::time::sleep(Duration::from_millis(*ms)).await;
            return;
        }
    };
    // Requests for unknown or finished dialogs are expected here
    let _ = result;
}

fn collect_states(mut rx: watch::Receiver<CallState>) -> tokio::task::JoinHandle<Vec<CallState>> {
    tokio::spawn(async move {
        let mut seen = vec![*rx.borrow_and_update()];
        while rx.changed().await.is_ok() {
            seen.push(*rx.borrow_and_update());
        }
        seen
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn states_never_move_backwards(ops in proptest::collection::vec(op(), 1..24)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .start_paused(true)
            .build()
            .unwrap();

        let observed = runtime.block_on(async {
            let sender = RecordingSender::new();
            // Long linger keeps the first session routable for the whole run
            let config = test_config().with_linger(Duration::from_secs(3600));
            let registry = SessionRegistry::new(config, sender.clone(), SpyAudio::new());

            // The first INVITE fixes the dialog so later requests can carry its tag
            let first = invite("prop", "rp");
            let dialog = registry.dispatch(dialog_of(&first), CallEvent::Invite(first)).await.unwrap();
            let collector = collect_states(registry.subscribe("prop", "rp").unwrap());

            for op in &ops {
                apply(&registry, op, &dialog.local_tag).await;
            }
            registry.shutdown().await;

            let finals = sender
                .statuses(Method::Invite)
                .into_iter()
                .filter(|code| *code >= 200)
                .count();
            (collector.await.unwrap(), finals)
        });

        let (states, invite_finals) = observed;
        for pair in states.windows(2) {
            prop_assert!(pair[0] <= pair[1], "state moved backwards: {:?}", states);
        }
        prop_assert_eq!(states.last().copied(), Some(CallState::Terminated));
        prop_assert!(invite_finals <= 1);
    }
}
