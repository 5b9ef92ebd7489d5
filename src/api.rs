//! Local HTTP API.
//!
//! Binds a random port on loopback and writes it to the port file so local
//! tooling can find the server. All responses use a uniform envelope:
//! `{ "ok": true, "data": ... }` on success, `{ "ok": false, "error": ... }`
//! with the serialized [`AppError`] on failure.

use std::sync::Arc;

use axum::extract::{Extension, Path};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;

use crate::chat::{self, NoopChatEmitter};
use crate::error::AppError;
use crate::merge;
use crate::settings::LlmConfigInfo;
use crate::state::AppState;
use crate::store::MessageBody;

fn ok_json<T: serde::Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(json!({ "ok": true, "data": data }))).into_response()
}

fn err_json(error: &AppError) -> Response {
    let status = match error {
        AppError::NotFound { .. } => StatusCode::NOT_FOUND,
        AppError::Validation { .. } | AppError::InvalidSpan { .. } => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "ok": false, "error": error }))).into_response()
}

fn respond<T: serde::Serialize>(result: Result<T, AppError>) -> Response {
    match result {
        Ok(data) => ok_json(data),
        Err(e) => err_json(&e),
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/plugins", get(list_plugins))
        .route("/api/plugins/{id}/state", get(get_plugin_state))
        .route("/api/plugins/{id}/state", post(set_plugin_state))
        .route("/api/conversations", get(list_conversations))
        .route("/api/conversations", post(create_conversation))
        .route("/api/conversations/{id}", delete(remove_conversation))
        .route("/api/conversations/{id}/activate", post(activate_conversation))
        .route("/api/conversations/{id}/rename", post(rename_conversation))
        .route("/api/conversations/{id}/messages", get(list_messages))
        .route(
            "/api/conversations/{id}/messages/{message}",
            delete(remove_message),
        )
        .route(
            "/api/conversations/{id}/messages/{message}/segments",
            get(message_segments),
        )
        .route("/api/chat", post(send_chat))
        .route("/api/chat/cancel", post(cancel_chat))
        .route("/api/settings", get(get_settings))
        .route("/api/settings", put(put_settings))
        .layer(CorsLayer::permissive())
        .layer(Extension(state))
}

/// Bind on a random loopback port, write the port file, serve forever.
pub async fn start_api_server(state: Arc<AppState>) -> Result<u16, AppError> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();

    crate::storage::atomic_write(
        &crate::paths::port_file_path(state.config_dir()),
        port.to_string().as_bytes(),
    )?;
    state.set_api_port(port);

    let app = router(Arc::clone(&state));
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            log::error!("api server exited: {e}");
        }
    });

    Ok(port)
}

// ── Plugins ──────────────────────────────────────────────────────

async fn list_plugins(Extension(state): Extension<Arc<AppState>>) -> Response {
    let plugins = state.registry.catalog();
    let states = state.with_store(|store| store.plugin_states.clone());
    let data: Vec<Value> = plugins
        .into_iter()
        .map(|info| {
            let plugin_state = states.get(&info.id).cloned().unwrap_or(Value::Null);
            json!({ "plugin": info, "state": plugin_state })
        })
        .collect();
    ok_json(data)
}

async fn get_plugin_state(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    respond(state.with_store(|store| {
        store
            .plugin_state(&id)
            .cloned()
            .ok_or(AppError::NotFound {
                what: format!("plugin {id}"),
            })
    }))
}

async fn set_plugin_state(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    if state.registry.by_id(&id).is_none() {
        return err_json(&AppError::NotFound {
            what: format!("plugin {id}"),
        });
    }
    respond(state.update_store(|store| store.set_plugin_state(&id, body)))
}

// ── Conversations ────────────────────────────────────────────────

async fn list_conversations(Extension(state): Extension<Arc<AppState>>) -> Response {
    let data = state.with_store(|store| {
        let conversations: Vec<Value> = store
            .conversations
            .iter()
            .map(|c| {
                json!({
                    "uuid": c.uuid,
                    "title": c.title,
                    "messages": c.messages.len(),
                })
            })
            .collect();
        json!({ "conversations": conversations, "active": store.active })
    });
    ok_json(data)
}

async fn create_conversation(Extension(state): Extension<Arc<AppState>>) -> Response {
    respond(state.update_store(|store| json!({ "uuid": store.add_conversation() })))
}

async fn remove_conversation(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    respond(state.update_store(|store| store.remove_conversation(&id)).and_then(|r| r))
}

async fn activate_conversation(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    respond(state.update_store(|store| store.set_active(&id)).and_then(|r| r))
}

#[derive(Deserialize)]
struct RenameBody {
    title: String,
}

async fn rename_conversation(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<RenameBody>,
) -> Response {
    respond(
        state
            .update_store(|store| store.rename_conversation(&id, &body.title))
            .and_then(|r| r),
    )
}

async fn list_messages(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    respond(state.with_store(|store| store.conversation(&id).cloned()))
}

async fn remove_message(
    Extension(state): Extension<Arc<AppState>>,
    Path((id, message)): Path<(String, String)>,
) -> Response {
    respond(
        state
            .update_store(|store| store.remove_message(&id, &message))
            .and_then(|r| r),
    )
}

/// The merged view of one answer: literal text runs interleaved with its
/// command segments, ready for rendering.
async fn message_segments(
    Extension(state): Extension<Arc<AppState>>,
    Path((id, message)): Path<(String, String)>,
) -> Response {
    respond(state.with_store(|store| {
        let conversation = store.conversation(&id)?;
        let target = conversation
            .messages
            .iter()
            .find(|m| m.uuid == message)
            .ok_or(AppError::NotFound {
                what: format!("message {message}"),
            })?;
        match &target.body {
            MessageBody::Answer {
                content,
                substitutions,
            } => merge::merge(content, substitutions),
            MessageBody::Question { .. } => Err(AppError::Validation {
                message: "questions have no segments".to_string(),
            }),
        }
    }))
}

// ── Chat ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ChatBody {
    /// Defaults to the active conversation.
    conversation: Option<String>,
    message: String,
}

async fn send_chat(
    Extension(state): Extension<Arc<AppState>>,
    Json(body): Json<ChatBody>,
) -> Response {
    let conversation = body
        .conversation
        .unwrap_or_else(|| state.with_store(|store| store.active.clone()));
    respond(
        chat::send_message(&state, &NoopChatEmitter, &conversation, &body.message).await,
    )
}

async fn cancel_chat(Extension(state): Extension<Arc<AppState>>) -> Response {
    state.chat.cancel();
    ok_json(json!({ "cancelled": true }))
}

// ── Settings ─────────────────────────────────────────────────────

async fn get_settings(Extension(state): Extension<Arc<AppState>>) -> Response {
    state.with_settings(|settings| match settings {
        Some(settings) => ok_json(json!({
            "version": settings.version,
            "llm": LlmConfigInfo::from(&settings.llm),
        })),
        None => err_json(&AppError::NoSettings),
    })
}

#[derive(Deserialize)]
struct SettingsBody {
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    temperature: Option<f64>,
}

async fn put_settings(
    Extension(state): Extension<Arc<AppState>>,
    Json(body): Json<SettingsBody>,
) -> Response {
    let mut settings = state.with_settings(|s| s.cloned()).unwrap_or_default();
    if let Some(api_key) = body.api_key {
        settings.llm.api_key = Some(api_key);
    }
    if let Some(base_url) = body.base_url {
        settings.llm.base_url = base_url;
    }
    if body.model.is_some() {
        settings.llm.model = body.model;
    }
    if body.temperature.is_some() {
        settings.llm.temperature = body.temperature;
    }
    respond(
        state
            .save_settings(settings.clone())
            .map(|()| LlmConfigInfo::from(&settings.llm)),
    )
}
