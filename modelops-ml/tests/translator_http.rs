//! Translator against an in-process mock of the hosted inference API.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use modelops_core::config::TranslatorConfig;
use modelops_ml::inference::{HfPipelineFactory, PredictModel, Translator};
use modelops_ml::{DataBatch, MlError};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct Seen {
    calls: Vec<(String, Option<String>, Value)>,
}

type Shared = Arc<Mutex<Seen>>;

async fn translate(
    State(seen): State<Shared>,
    Path(model): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    seen.lock()
        .unwrap()
        .calls
        .push((model.clone(), auth, body.clone()));

    if model.ends_with("loading") {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "Model is currently loading" })),
        )
            .into_response();
    }
    let text = body["inputs"].as_str().unwrap_or_default();
    Json(json!([{ "translation_text": format!("fr({text})") }])).into_response()
}

async fn spawn_mock() -> (String, Shared) {
    let seen: Shared = Arc::default();
    let app = Router::new()
        .route("/models/{*model}", post(translate))
        .with_state(seen.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}/models"), seen)
}

fn translator(url: &str, model: &str, token: Option<&str>) -> Translator<HfPipelineFactory> {
    let config = TranslatorConfig {
        model: model.to_string(),
        inference_url: url.to_string(),
        ..TranslatorConfig::default()
    };
    let factory =
        HfPipelineFactory::new(url, token.map(str::to_string), Duration::from_secs(5)).unwrap();
    Translator::new(config, factory)
}

fn rows() -> DataBatch {
    DataBatch::new(
        vec!["text".into(), "lang".into()],
        vec![
            vec![json!("Hello"), json!("en")],
            vec![json!("How are you?"), json!("en")],
            vec![json!("Good night"), json!("en")],
        ],
    )
    .unwrap()
}

#[tokio::test]
async fn test_translates_every_row_through_the_endpoint() {
    let (url, seen) = spawn_mock().await;
    let translator = translator(&url, "Helsinki-NLP/opus-mt-en-fr", Some("secret"));

    let out = translator.predict(rows()).await.unwrap();

    assert_eq!(out.row_count(), 3);
    assert_eq!(out.columns, vec!["text", "lang"]);
    assert_eq!(out.rows[1], vec![json!("fr(How are you?)"), json!("en")]);

    let seen = seen.lock().unwrap();
    let calls = &seen.calls;
    assert_eq!(calls.len(), 3);
    let (model, auth, body) = &calls[0];
    assert_eq!(model, "Helsinki-NLP/opus-mt-en-fr");
    assert_eq!(auth.as_deref(), Some("Bearer secret"));
    assert_eq!(body, &json!({ "inputs": "Hello" }));
}

#[tokio::test]
async fn test_no_token_sends_no_authorization() {
    let (url, seen) = spawn_mock().await;
    translator(&url, "m", None).predict(rows()).await.unwrap();
    assert!(seen.lock().unwrap().calls.iter().all(|(_, auth, _)| auth.is_none()));
}

#[tokio::test]
async fn test_endpoint_error_is_an_inference_error() {
    let (url, _) = spawn_mock().await;
    let err = translator(&url, "org/still-loading", None)
        .predict(rows())
        .await
        .unwrap_err();
    assert!(matches!(err, MlError::Inference(_)));
    assert!(err.to_string().contains("currently loading"));
}
