mod common;

use std::sync::Arc;

use anyhow::Result;
use axum::{Json, Router, extract::State, response::IntoResponse, routing::post};
use futures::StreamExt as _;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, oneshot};

use tollgate_a2a::{
    ExecutionEvent, GateError, MessageSendConfiguration, PushNotificationConfig, TaskState,
};

use common::{
    RecordingFacilitator, ScriptedEvent, harness, paid_agent_card, text_params, validated_context,
    wait_until,
};

#[derive(Clone)]
struct WebhookState {
    received: Arc<Mutex<Vec<Value>>>,
}

struct WebhookStub {
    url: String,
    received: Arc<Mutex<Vec<Value>>>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl WebhookStub {
    async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

async fn spawn_webhook_stub() -> Result<WebhookStub> {
    let received = Arc::new(Mutex::new(Vec::new()));
    let state = WebhookState {
        received: received.clone(),
    };
    let app = Router::new()
        .route("/hook", post(hook_handler))
        .with_state(state);

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        let server = axum::serve(listener, app).with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        });
        let _ = server.await;
    });

    Ok(WebhookStub {
        url: format!("http://{addr}/hook"),
        received,
        shutdown: Some(shutdown_tx),
    })
}

async fn hook_handler(
    State(state): State<WebhookState>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    state.received.lock().await.push(body);
    axum::http::StatusCode::OK
}

#[tokio::test]
async fn stream_forwards_events_unchanged_and_settles_once() {
    let harness = harness(
        paid_agent_card(),
        RecordingFacilitator::new(),
        vec![
            ScriptedEvent::working(),
            ScriptedEvent::completed(Some(2)),
        ],
    );
    harness
        .handler
        .set_context_for_message("mid", validated_context());

    let stream = harness
        .handler
        .on_message_send_stream(text_params("mid"))
        .await;
    let Ok(stream) = stream else {
        assert!(false, "expected a stream");
        return;
    };

    let events: Vec<ExecutionEvent> = stream.collect().await;
    assert_eq!(events.len(), 2);

    let states: Vec<TaskState> = events
        .iter()
        .filter_map(|event| event.as_status_update())
        .map(|update| update.status.state)
        .collect();
    assert_eq!(states, vec![TaskState::Working, TaskState::Completed]);

    // Terminal metered event settled inline, exactly once.
    let facilitator = harness.facilitator.clone();
    assert!(wait_until(move || facilitator.settle_calls().len() == 1).await);
    let settles = harness.facilitator.settle_calls();
    assert_eq!(settles[0].max_amount, 2);
    assert_eq!(settles[0].plan_id, "plan-1");

    // The monitor's cleanup removes the migrated context.
    let task_id = events
        .iter()
        .filter_map(|event| event.task_id())
        .next()
        .unwrap_or_default()
        .to_string();
    let handler_ref = &harness.handler;
    assert!(wait_until(|| handler_ref.context(Some(&task_id), None).is_none()).await);
}

#[tokio::test]
async fn stream_without_context_is_unauthorized() {
    let harness = harness(
        paid_agent_card(),
        RecordingFacilitator::new(),
        vec![ScriptedEvent::completed(Some(1))],
    );

    let outcome = harness
        .handler
        .on_message_send_stream(text_params("mid"))
        .await;

    assert!(matches!(outcome.err(), Some(GateError::Unauthorized(_))));
    assert!(harness.facilitator.settle_calls().is_empty());
}

#[tokio::test]
async fn stream_settlement_failure_still_yields_all_events() {
    let harness = harness(
        paid_agent_card(),
        RecordingFacilitator::failing_settlement(),
        vec![
            ScriptedEvent::working(),
            ScriptedEvent::completed(Some(9)),
        ],
    );
    harness
        .handler
        .set_context_for_message("mid", validated_context());

    let stream = harness
        .handler
        .on_message_send_stream(text_params("mid"))
        .await;
    let Ok(stream) = stream else {
        assert!(false, "expected a stream");
        return;
    };

    let events: Vec<ExecutionEvent> = stream.collect().await;
    assert_eq!(events.len(), 2);
    assert_eq!(harness.facilitator.settle_calls().len(), 1);
}

#[tokio::test]
async fn stream_delivers_push_notification_on_terminal_state() -> Result<()> {
    let stub = spawn_webhook_stub().await?;
    let harness = harness(
        paid_agent_card(),
        RecordingFacilitator::new(),
        vec![ScriptedEvent::completed(Some(1))],
    );
    harness
        .handler
        .set_context_for_message("mid", validated_context());

    let mut params = text_params("mid");
    params.configuration = Some(MessageSendConfiguration {
        blocking: None,
        push_notification_config: Some(PushNotificationConfig {
            url: stub.url.clone(),
            token: None,
            authentication: None,
        }),
    });

    let stream = harness.handler.on_message_send_stream(params).await;
    let Ok(stream) = stream else {
        assert!(false, "expected a stream");
        return Ok(());
    };
    let events: Vec<ExecutionEvent> = stream.collect().await;
    assert_eq!(events.len(), 1);

    for _ in 0..200 {
        if !stub.received.lock().await.is_empty() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    let received = stub.received.lock().await.clone();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0]["state"], "completed");
    stub.stop().await;
    Ok(())
}

#[tokio::test]
async fn blocking_send_delivers_push_notification_on_terminal_state() -> Result<()> {
    let stub = spawn_webhook_stub().await?;
    let harness = harness(
        paid_agent_card(),
        RecordingFacilitator::new(),
        vec![ScriptedEvent::completed(Some(1))],
    );
    harness
        .handler
        .set_context_for_message("mid", validated_context());

    let mut params = text_params("mid");
    params.configuration = Some(MessageSendConfiguration {
        blocking: Some(true),
        push_notification_config: Some(PushNotificationConfig {
            url: stub.url.clone(),
            token: None,
            authentication: None,
        }),
    });

    let outcome = harness.handler.on_message_send(params).await;
    assert!(outcome.is_ok());

    let received = stub.received.lock().await.clone();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0]["state"], "completed");
    stub.stop().await;
    Ok(())
}
