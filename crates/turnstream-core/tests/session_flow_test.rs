mod support;

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use support::{FaultyStore, Harness, app, event, preview_contents, session, stream};
use turnstream_core::Error;
use turnstream_core::app::domain::{
    AppId, MessageId, MessageUpdate, Role, StreamEvent, build_chat_request,
};
use turnstream_core::app::runtime::{
    Activation, AuthorizationCheck, ConsentError, ConsentGate, EngineError, ExecutionDescriptor,
    ExecutionEngine, ExecutionRequest, RetryPolicy, SendArgs, SendOutcome,
    StreamDescriptor, StreamStatus, TurnOutcome, UiEvent,
};

struct MissingProviders(Vec<String>);

#[async_trait]
impl ConsentGate for MissingProviders {
    async fn check_authorization(
        &self,
        _app_id: &AppId,
        _descriptor: &ExecutionDescriptor,
    ) -> Result<AuthorizationCheck, ConsentError> {
        Ok(AuthorizationCheck {
            missing_providers: self.0.clone(),
        })
    }
}

fn patch(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
    value.as_object().cloned().unwrap()
}

fn started(outcome: SendOutcome) -> turnstream_core::app::runtime::TurnHandle {
    match outcome {
        SendOutcome::Started(handle) => handle,
        SendOutcome::AuthorizationPending { providers } => {
            panic!("unexpected authorization request for {providers:?}")
        }
    }
}

#[tokio::test]
async fn hello_turn_streams_and_persists() {
    let mut h = Harness::new();
    let feed = h.handler.next_turn();
    let orchestrator = h.orchestrator();

    let turn = started(orchestrator.send(SendArgs::text("Hello")).await.unwrap());

    let history = h.store.query_messages(&session()).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].role, Role::User);
    assert_eq!(history[0].content, "Hello");
    assert!(history[0].files.is_empty());

    feed.send(vec![StreamEvent::text_delta("Hi")]).unwrap();
    feed.send(vec![StreamEvent::text_delta(" there")]).unwrap();
    feed.send(vec![StreamEvent::terminal()]).unwrap();

    let outcome = turn.wait().await.unwrap();
    let TurnOutcome::Completed(message) = outcome else {
        panic!("expected the send subscriber to persist the turn");
    };
    assert_eq!(message.content, "Hi there");

    let history = h.store.query_messages(&session()).await.unwrap();
    let contents: Vec<_> = history.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["Hello", "Hi there"]);

    let ui = h.drain_ui();
    assert_eq!(preview_contents(&ui), vec!["", "Hi", "Hi there"]);
    assert_eq!(ui.first(), Some(&UiEvent::SendingChanged(true)));
    assert_eq!(ui.last(), Some(&UiEvent::SendingChanged(false)));
    assert!(ui.contains(&UiEvent::PreviewCleared {
        message_id: message.id.clone()
    }));
    assert_eq!(h.context.visible_message(), Some(message));
}

#[tokio::test]
async fn terminal_is_persisted_once_across_subscribers() {
    let h = Harness::new();
    let feed = h.handler.next_turn();
    let orchestrator = h.orchestrator();

    let turn = started(orchestrator.send(SendArgs::text("Hello")).await.unwrap());
    feed.send(vec![StreamEvent::text_delta("ok"), StreamEvent::terminal()])
        .unwrap();
    turn.wait().await.unwrap();

    let controller = h.controller();
    assert_eq!(
        controller.status(&stream()).await,
        StreamStatus::CompleteProcessed
    );
    assert!(matches!(
        controller.activate(&stream()).await.unwrap(),
        Activation::AlreadyProcessed
    ));

    let history = h.store.query_messages(&session()).await.unwrap();
    assert_eq!(history.len(), 2);
}

#[tokio::test]
async fn missing_providers_suspend_the_send() {
    let mut h = Harness::new();
    let orchestrator = h
        .orchestrator()
        .with_consent_gate(Arc::new(MissingProviders(vec!["github".into()])));
    let args = SendArgs {
        content: "Open a PR".into(),
        tools: vec!["github.create_pr".into()],
        ..SendArgs::default()
    };

    let outcome = orchestrator.send(args.clone()).await.unwrap();

    assert!(matches!(
        outcome,
        SendOutcome::AuthorizationPending { ref providers } if providers == &["github".to_string()]
    ));
    assert!(h.store.query_messages(&session()).await.unwrap().is_empty());
    assert_eq!(orchestrator.pending_retry(), Some(args.clone()));

    let ui = h.drain_ui();
    let requests: Vec<_> = ui
        .iter()
        .filter(|e| matches!(e, UiEvent::AuthorizationRequired { .. }))
        .collect();
    assert_eq!(
        requests,
        vec![&UiEvent::AuthorizationRequired {
            providers: vec!["github".into()]
        }]
    );
    assert!(!ui.iter().any(|e| matches!(e, UiEvent::SendFailed { .. })));

    let feed = h.handler.next_turn();
    let replay = orchestrator.on_authorization_granted().await.unwrap();
    let turn = started(replay.unwrap());
    assert_eq!(orchestrator.pending_retry(), None);
    assert_eq!(turn.user_message.content, "Open a PR");
    assert_eq!(turn.user_message.tools, args.tools);

    feed.send(vec![StreamEvent::terminal()]).unwrap();
    turn.wait().await.unwrap();
    assert_eq!(h.store.query_messages(&session()).await.unwrap().len(), 2);
}

#[tokio::test]
async fn engine_authorization_error_is_replayed_without_a_second_user_message() {
    let mut h = Harness::new();
    h.handler.reject_next(EngineError::Unauthorized {
        providers: vec!["slack".into()],
    });
    let orchestrator = h.orchestrator();

    let outcome = orchestrator.send(SendArgs::text("Post it")).await.unwrap();
    assert!(matches!(outcome, SendOutcome::AuthorizationPending { .. }));
    assert!(!h.context.subscriptions.has_primary(&stream()));
    assert!(
        !h.drain_ui()
            .iter()
            .any(|e| matches!(e, UiEvent::SendFailed { .. }))
    );

    let feed = h.handler.next_turn();
    let turn = started(orchestrator.on_authorization_granted().await.unwrap().unwrap());
    feed.send(vec![StreamEvent::text_delta("posted"), StreamEvent::terminal()])
        .unwrap();
    turn.wait().await.unwrap();

    let history = h.store.query_messages(&session()).await.unwrap();
    let users = history.iter().filter(|m| m.role == Role::User).count();
    assert_eq!(users, 1);
    assert_eq!(history.len(), 2);
}

#[tokio::test]
async fn grant_without_pending_send_is_a_no_op() {
    let h = Harness::new();
    let orchestrator = h.orchestrator();
    assert!(
        orchestrator
            .on_authorization_granted()
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn backend_failure_rolls_back_optimistic_state() {
    let mut h = Harness::new();
    h.handler
        .reject_next(EngineError::unavailable("connection refused"));
    let orchestrator = h.orchestrator();

    let err = orchestrator
        .send(SendArgs::text("Hello"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::Engine(EngineError::Unavailable { .. })
    ));
    assert!(!h.context.subscriptions.has_primary(&stream()));
    assert!(h.context.visible_message().is_none());

    let ui = h.drain_ui();
    let failures = ui
        .iter()
        .filter(|e| matches!(e, UiEvent::SendFailed { .. }))
        .count();
    assert_eq!(failures, 1);
    assert!(ui.iter().any(|e| matches!(e, UiEvent::PreviewCleared { .. })));
    assert_eq!(ui.last(), Some(&UiEvent::SendingChanged(false)));
}

#[tokio::test]
async fn transient_execute_failures_are_retried_within_the_bound() {
    let h = Harness::new();
    h.handler.reject_next(EngineError::unavailable("busy"));
    h.handler.reject_next(EngineError::unavailable("busy"));
    let feed = h.handler.next_turn();
    let mut config = h.config();
    config.retry = RetryPolicy {
        max_attempts: 3,
        backoff: Duration::from_millis(1),
    };
    let orchestrator = h.orchestrator_with(config);

    let turn = started(orchestrator.send(SendArgs::text("Hello")).await.unwrap());
    assert_eq!(h.handler.attempts(), 3);

    feed.send(vec![StreamEvent::terminal()]).unwrap();
    assert!(matches!(
        turn.wait().await.unwrap(),
        TurnOutcome::Completed(_)
    ));
}

#[tokio::test]
async fn local_patches_accumulate_into_the_scoped_record() {
    let h = Harness::new();
    let feed = h.handler.next_turn();
    let orchestrator = h.orchestrator();

    let turn = started(orchestrator.send(SendArgs::text("Hello")).await.unwrap());
    feed.send(vec![StreamEvent::SessionLocalPatch(patch(json!({"x": 1})))])
        .unwrap();
    feed.send(vec![StreamEvent::SessionLocalPatch(patch(json!({"y": 2})))])
        .unwrap();
    feed.send(vec![StreamEvent::terminal()]).unwrap();
    turn.wait().await.unwrap();

    let local = h
        .store
        .load_local_state(&session(), &event())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(local.patch, patch(json!({"x": 1, "y": 2})));
}

#[tokio::test]
async fn scoped_state_from_earlier_turns_is_sent_with_the_next_request() {
    let h = Harness::new();
    let orchestrator = h.orchestrator();

    let feed = h.handler.next_turn();
    let turn = started(orchestrator.send(SendArgs::text("one")).await.unwrap());
    feed.send(vec![
        StreamEvent::SessionGlobalPatch(patch(json!({"plan": "pro"}))),
        StreamEvent::terminal(),
    ])
    .unwrap();
    turn.wait().await.unwrap();

    let feed = h.handler.next_turn();
    let turn = started(orchestrator.send(SendArgs::text("two")).await.unwrap());
    feed.send(vec![StreamEvent::text_delta("second"), StreamEvent::terminal()])
        .unwrap();
    let TurnOutcome::Completed(second) = turn.wait().await.unwrap() else {
        panic!("second turn should complete");
    };
    assert_eq!(second.content, "second");

    let global = h
        .store
        .load_global_state(&app(), &event())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(global.patch, patch(json!({"plan": "pro"})));

    let history = h.store.query_messages(&session()).await.unwrap();
    let contents: Vec<_> = history.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["one", "", "two", "second"]);
}

#[tokio::test]
async fn reconnect_after_remount_resumes_the_same_message() {
    let h = Harness::new();
    let user = turnstream_core::app::domain::Message::user(session(), app(), "Hello", vec![], vec![]);
    h.store.put_message(&user).await.unwrap();

    let descriptor = StreamDescriptor {
        session_id: session(),
        app_id: app(),
        event_id: event(),
        response_message_id: MessageId::from_string("msg_resume"),
    };
    let feed = h.handler.next_turn();
    h.engine
        .execute(
            &stream(),
            ExecutionRequest {
                descriptor,
                payload: build_chat_request(&session(), &[user], 5, None, None, vec![], vec![]),
                offline: false,
                checkpoint_interval: 1,
            },
        )
        .await
        .unwrap();

    let first = h.controller().with_checkpoint_interval(1);
    let Activation::Attached(first_turn) = first.activate(&stream()).await.unwrap() else {
        panic!("first mount should attach");
    };
    feed.send(vec![StreamEvent::text_delta("par")]).unwrap();

    first.deactivate().await;
    assert_eq!(first_turn.await.unwrap().unwrap(), TurnOutcome::Detached);

    let second = h.controller();
    let Activation::Attached(second_turn) = second.activate(&stream()).await.unwrap() else {
        panic!("remount should attach again");
    };
    feed.send(vec![StreamEvent::text_delta("tial")]).unwrap();
    feed.send(vec![StreamEvent::terminal()]).unwrap();

    let TurnOutcome::Completed(message) = second_turn.await.unwrap().unwrap() else {
        panic!("remounted subscriber should persist the turn");
    };
    assert_eq!(message.id, MessageId::from_string("msg_resume"));
    assert_eq!(message.content, "partial");

    let history = h.store.query_messages(&session()).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].content, "partial");
}

#[tokio::test]
async fn completed_unprocessed_stream_is_folded_from_history() {
    let h = Harness::new();
    let descriptor = StreamDescriptor {
        session_id: session(),
        app_id: app(),
        event_id: event(),
        response_message_id: MessageId::from_string("msg_offline"),
    };
    let feed = h.handler.next_turn();
    h.engine
        .execute(
            &stream(),
            ExecutionRequest {
                descriptor,
                payload: build_chat_request(&session(), &[], 5, None, None, vec![], vec![]),
                offline: true,
                checkpoint_interval: 10,
            },
        )
        .await
        .unwrap();
    feed.send(vec![StreamEvent::text_delta("while ")]).unwrap();
    feed.send(vec![
        StreamEvent::text_delta("away"),
        StreamEvent::SessionLocalPatch(patch(json!({"seen": true}))),
        StreamEvent::terminal(),
    ])
    .unwrap();
    h.wait_until_complete(&stream()).await;

    let controller = h.controller();
    assert_eq!(
        controller.status(&stream()).await,
        StreamStatus::CompleteUnprocessed
    );
    let Activation::Recovered(message) = controller.activate(&stream()).await.unwrap() else {
        panic!("completed stream should be recovered");
    };
    assert_eq!(message.content, "while away");
    assert!(
        h.store
            .load_local_state(&session(), &event())
            .await
            .unwrap()
            .is_some()
    );
    assert!(matches!(
        controller.activate(&stream()).await.unwrap(),
        Activation::AlreadyProcessed
    ));
}

#[tokio::test]
async fn interaction_answers_are_accepted_once() {
    let mut h = Harness::new();
    let feed = h.handler.next_turn();
    let orchestrator = h.orchestrator();
    let turn = started(orchestrator.send(SendArgs::text("Book it")).await.unwrap());

    let request = StreamEvent::from_value(json!({
        "event_type": "interaction_request",
        "payload": {
            "id": "confirm-1",
            "name": "Confirm booking",
            "interaction_type": {"type": "single_choice", "options": []}
        }
    }));
    feed.send(vec![request]).unwrap();
    feed.send(vec![StreamEvent::terminal()]).unwrap();
    turn.wait().await.unwrap();

    let id = turnstream_core::app::domain::InteractionId::from_string("confirm-1");
    assert!(
        orchestrator
            .respond_to_interaction(&id, json!({"choice": "yes"}))
            .await
            .unwrap()
    );
    assert!(
        !orchestrator
            .respond_to_interaction(&id, json!({"choice": "no"}))
            .await
            .unwrap()
    );

    let ui = h.drain_ui();
    assert_eq!(
        ui.iter()
            .filter(|e| matches!(e, UiEvent::InteractionRequested(_)))
            .count(),
        1
    );
    assert_eq!(
        ui.iter()
            .filter(|e| matches!(e, UiEvent::InteractionResolved { .. }))
            .count(),
        1
    );
}

#[tokio::test]
async fn stored_messages_can_be_rated() {
    let h = Harness::new();
    let feed = h.handler.next_turn();
    let orchestrator = h.orchestrator();
    let turn = started(orchestrator.send(SendArgs::text("Hello")).await.unwrap());
    feed.send(vec![StreamEvent::text_delta("Hi"), StreamEvent::terminal()])
        .unwrap();
    let TurnOutcome::Completed(reply) = turn.wait().await.unwrap() else {
        panic!("turn should complete");
    };

    let updated = orchestrator
        .update_message(
            &reply.id,
            MessageUpdate {
                rating: Some(1),
                ..MessageUpdate::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(updated.id, reply.id);
    assert_eq!(updated.rating, Some(1));
    assert_eq!(updated.content, "Hi");
}

#[tokio::test]
async fn failed_terminal_write_leaves_the_turn_recoverable() {
    let store = Arc::new(FaultyStore::default());
    store.fail_replies(1);
    let mut h = Harness::with_store(store.clone());
    let orchestrator = h.orchestrator();

    let feed = h.handler.next_turn();
    let turn = started(orchestrator.send(SendArgs::text("one")).await.unwrap());
    feed.send(vec![StreamEvent::text_delta("kept"), StreamEvent::terminal()])
        .unwrap();

    let err = turn.wait().await.unwrap_err();
    assert!(matches!(err, Error::Store(_)));
    assert!(!h.context.subscriptions.has_primary(&stream()));

    let ui = h.drain_ui();
    let failures = ui
        .iter()
        .filter(|e| matches!(e, UiEvent::SendFailed { .. }))
        .count();
    assert_eq!(failures, 1);
    assert_eq!(ui.last(), Some(&UiEvent::SendingChanged(false)));

    h.wait_until_complete(&stream()).await;
    let controller = h.controller();
    assert_eq!(
        controller.status(&stream()).await,
        StreamStatus::CompleteUnprocessed
    );
    let Activation::Recovered(recovered) = controller.activate(&stream()).await.unwrap() else {
        panic!("the failed turn should be recovered from the stream history");
    };
    assert_eq!(recovered.content, "kept");

    let feed = h.handler.next_turn();
    let turn = started(orchestrator.send(SendArgs::text("two")).await.unwrap());
    feed.send(vec![StreamEvent::text_delta("fine"), StreamEvent::terminal()])
        .unwrap();
    assert!(matches!(
        turn.wait().await.unwrap(),
        TurnOutcome::Completed(_)
    ));

    let history = h.store.query_messages(&session()).await.unwrap();
    let contents: Vec<_> = history.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["one", "kept", "two", "fine"]);
}

#[tokio::test]
async fn stalled_checkpoint_does_not_overwrite_the_final_reply() {
    let store = Arc::new(FaultyStore::default());
    store.stall_on("partial");
    let h = Harness::with_store(store.clone());
    let feed = h.handler.next_turn();
    let mut config = h.config();
    config.checkpoint_interval = 1;
    let orchestrator = h.orchestrator_with(config);

    let turn = started(orchestrator.send(SendArgs::text("q")).await.unwrap());
    feed.send(vec![StreamEvent::text_delta("partial")]).unwrap();
    store.writing.notified().await;
    feed.send(vec![StreamEvent::text_delta(" answer"), StreamEvent::terminal()])
        .unwrap();
    h.wait_until_complete(&stream()).await;

    let activation = h.controller().activate(&stream()).await.unwrap();
    assert!(matches!(
        activation,
        Activation::AlreadyAttached | Activation::AlreadyProcessed
    ));

    let TurnOutcome::Completed(reply) = turn.wait().await.unwrap() else {
        panic!("the live subscriber should persist the turn");
    };
    assert_eq!(reply.content, "partial answer");

    let history = h.store.query_messages(&session()).await.unwrap();
    let contents: Vec<_> = history.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["q", "partial answer"]);
}
