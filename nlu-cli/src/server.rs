//! API HTTP + WebSocket sobre o pipeline NLU

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use nlu_core::corpus::demo_texts;
use nlu_core::render::intent_name;
use nlu_core::{Entity, NluPipeline, PipelineEvent};

#[derive(Deserialize)]
struct ParseRequest {
    text: String,
}

#[derive(Serialize)]
struct ParseResponse {
    text: String,
    intent: usize,
    intent_name: Option<String>,
    intent_confidence: f64,
    entities: Vec<Entity>,
    processing_ms: u64,
}

pub fn router(pipeline: Arc<NluPipeline>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/parse", post(parse_handler))
        .route("/ws", get(ws_handler))
        .route("/demo-texts", get(demo_texts_handler))
        .layer(cors)
        .with_state(pipeline)
}

pub async fn serve(pipeline: Arc<NluPipeline>, addr: SocketAddr) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("falha ao abrir {addr}"))?;
    info!("servidor NLU iniciado em http://{addr}");
    axum::serve(listener, router(pipeline))
        .await
        .context("servidor encerrado com erro")
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Análise via HTTP POST (sem streaming)
async fn parse_handler(
    State(pipeline): State<Arc<NluPipeline>>,
    Json(req): Json<ParseRequest>,
) -> Response {
    if req.text.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "texto vazio" })),
        )
            .into_response();
    }

    let worker = Arc::clone(&pipeline);
    let result = tokio::task::spawn_blocking(move || worker.analyze(&req.text)).await;

    match result {
        Ok(Ok(prediction)) => {
            let config = pipeline.aligner().config();
            Json(ParseResponse {
                intent_name: intent_name(config, prediction.intent).map(str::to_string),
                text: prediction.text,
                intent: prediction.intent,
                intent_confidence: prediction.intent_confidence,
                entities: prediction.entities,
                processing_ms: prediction.processing_ms,
            })
            .into_response()
        }
        Ok(Err(err)) => {
            error!(error = %err, "falha na análise");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": err.to_string() })),
            )
                .into_response()
        }
        Err(err) => {
            error!(error = %err, "tarefa de análise abortada");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn demo_texts_handler() -> impl IntoResponse {
    let texts: Vec<serde_json::Value> = demo_texts()
        .iter()
        .map(|(intent, text)| serde_json::json!({ "intent": intent, "text": text }))
        .collect();
    Json(texts)
}

/// Upgrade HTTP → WebSocket
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(pipeline): State<Arc<NluPipeline>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, pipeline))
}

/// Cada mensagem de texto (puro ou `{"text": ...}`) vira uma sequência de eventos JSON.
async fn handle_websocket(mut socket: WebSocket, pipeline: Arc<NluPipeline>) {
    info!("WebSocket conectado");

    while let Some(Ok(msg)) = socket.recv().await {
        match msg {
            Message::Text(raw) => {
                let text = match serde_json::from_str::<ParseRequest>(&raw) {
                    Ok(req) => req.text.trim().to_string(),
                    Err(_) => raw.trim().to_string(),
                };
                if text.is_empty() {
                    continue;
                }

                info!(chars = text.chars().count(), "analisando via WebSocket");

                // O pipeline é síncrono: roda fora do runtime e os eventos são lidos depois
                let (tx, rx) = std::sync::mpsc::channel::<PipelineEvent>();
                let worker = Arc::clone(&pipeline);
                let handle = tokio::task::spawn_blocking(move || worker.analyze_streaming(&text, tx));
                if handle.await.is_err() {
                    error!("tarefa de análise abortada");
                    continue;
                }

                let events: Vec<PipelineEvent> = rx.try_iter().collect();
                for event in &events {
                    if let Ok(json) = serde_json::to_string(event) {
                        if socket.send(Message::Text(json)).await.is_err() {
                            return; // cliente desconectou
                        }
                    }
                }
            }
            Message::Close(_) => {
                info!("WebSocket desconectado");
                return;
            }
            Message::Ping(payload) => {
                let _ = socket.send(Message::Pong(payload)).await;
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request};
    use tower::ServiceExt;

    use crate::repl::tests::pipeline;

    fn app() -> Router {
        router(Arc::new(pipeline()))
    }

    fn parse_request(body: &str) -> Request<Body> {
        Request::post("/parse")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = app()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_parse_rejects_empty_text() {
        let response = app().oneshot(parse_request(r#"{"text": "  "}"#)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_parse_returns_named_intent() {
        let response = app()
            .oneshot(parse_request(r#"{"text": "照明をつけて"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["text"], "照明をつけて");
        assert_eq!(body["intent"], 0);
        assert_eq!(body["intent_name"], "なし");
        assert!(body["entities"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_demo_texts_cover_every_intent() {
        let response = app()
            .oneshot(Request::get("/demo-texts").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(json_body(response).await.as_array().unwrap().len(), 7);
    }
}
