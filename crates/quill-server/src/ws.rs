//! WebSocket transport
//!
//! One long-lived socket per session. Outbound frames are pumped from the
//! session's channel in order; inbound frames are decoded through the
//! staged envelope decoder, and rejections are logged and dropped without
//! ever tearing the session down.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use quill_core::llm::SystemPromptBuilder;
use quill_core::{encode_outbound, HttpChatModel, Inbound, RawFrame, RuntimeConfig, Session};

#[derive(Clone)]
pub struct AppState {
    config: RuntimeConfig,
}

impl AppState {
    pub fn new(config: RuntimeConfig) -> Self {
        Self { config }
    }
}

pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| client_session(state, socket))
}

async fn client_session(state: AppState, socket: WebSocket) {
    let prompt = SystemPromptBuilder::new();
    let model = HttpChatModel::new(
        state.config.model.clone(),
        prompt.build(),
        state.config.history_limit,
    );

    let (session, mut outbound) = match Session::new(
        state.config.clone(),
        Box::new(model),
        prompt.collect_globals(),
    ) {
        Ok(pair) => pair,
        Err(e) => {
            warn!(error = %e, "cannot create session");
            return;
        }
    };

    let (mut sink, mut stream) = socket.split();
    let hello = session.hello();
    if sink
        .send(Message::Text(encode_outbound(&hello).into()))
        .await
        .is_err()
    {
        return;
    }

    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            let text = encode_outbound(&frame);
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(message) = stream.next().await {
        let raw = match message {
            Ok(Message::Text(text)) => RawFrame::Text(text.to_string()),
            Ok(Message::Binary(bytes)) => RawFrame::Binary(bytes.to_vec()),
            Ok(Message::Close(_)) => break,
            Ok(_) => continue, // ping/pong
            Err(e) => {
                debug!(error = %e, "socket read failed");
                break;
            }
        };

        match quill_core::decode_inbound(&raw) {
            Ok(Inbound::UserMessage(payload)) => session.handle_user_message(payload),
            Ok(Inbound::UiSubmit(payload)) => session.handle_ui_submit(payload).await,
            Ok(Inbound::CallbackInvoke(payload)) => session.handle_callback_invoke(payload).await,
            Ok(Inbound::ClientLog(payload)) => session.handle_client_log(payload),
            Err(rejection) => {
                warn!(code = rejection.code, detail = %rejection.detail, "inbound frame rejected");
                session.notify_rejection(&rejection);
            }
        }
    }

    info!(session = %session.id(), "client disconnected");
    session.stop();
    writer.abort();
}
