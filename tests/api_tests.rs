use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use parrot::api::{router, AppState};
use parrot::engine::{Engine, EngineConfig};
use parrot::store::SqliteStore;

fn test_state() -> AppState {
    let store = Arc::new(SqliteStore::open(":memory:").expect("in-memory store"));
    let engine = Arc::new(Engine::new(
        EngineConfig {
            order: 2,
            load_concurrency: 4,
        },
        store.clone(),
    ));
    AppState { engine, store }
}

async fn body_json(resp: axum::response::Response) -> serde_json::Value {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn json_req(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

fn get_req(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn health_reports_counts() {
    let app = router(test_state());
    let resp = app.oneshot(get_req("/")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let json = body_json(resp).await;
    assert_eq!(json["name"], "parrot");
    assert_eq!(json["models"], 0);
    assert_eq!(json["conversations"], 0);
}

#[tokio::test]
async fn post_message_persists_and_trains() {
    let state = test_state();
    let app = router(state.clone());

    let resp = app
        .clone()
        .oneshot(json_req(
            "POST",
            "/conversations/1/messages",
            serde_json::json!({"user_id": 42, "text": "привет как дела"}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let json = body_json(resp).await;
    assert_eq!(json["conversation_id"], 1);
    assert_eq!(json["user_id"], 42);
    assert_eq!(json["text"], "привет как дела");

    let resp = app.oneshot(get_req("/conversations/1/stats")).await.unwrap();
    let json = body_json(resp).await;
    assert_eq!(json["order"], 2);
    assert_eq!(json["unique_ngrams"], 4);
    assert_eq!(json["total_transitions"], 4);
    assert_eq!(json["message_count"], 1);
}

#[tokio::test]
async fn generate_without_model_is_not_found() {
    let app = router(test_state());
    let resp = app
        .oneshot(json_req(
            "POST",
            "/conversations/9/generate",
            serde_json::json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let json = body_json(resp).await;
    assert!(json["error"].as_str().unwrap().contains("no trained model"));
}

#[tokio::test]
async fn train_then_generate_roundtrip() {
    let app = router(test_state());

    app.clone()
        .oneshot(json_req(
            "POST",
            "/conversations/1/messages",
            serde_json::json!({"user_id": 7, "text": "привет как дела"}),
        ))
        .await
        .unwrap();

    let resp = app
        .oneshot(json_req(
            "POST",
            "/conversations/1/generate",
            serde_json::json!({"prefix": "привет как", "max_length": 10}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    let text = json["text"].as_str().unwrap();
    assert!(text.starts_with("привет как"), "got: {text}");
}

#[tokio::test]
async fn delete_wipes_history_and_model() {
    let app = router(test_state());

    app.clone()
        .oneshot(json_req(
            "POST",
            "/conversations/1/messages",
            serde_json::json!({"user_id": 7, "text": "привет как дела"}),
        ))
        .await
        .unwrap();

    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/conversations/1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["deleted"], 1);

    let resp = app
        .clone()
        .oneshot(get_req("/conversations/1/stats"))
        .await
        .unwrap();
    let json = body_json(resp).await;
    assert_eq!(json["total_transitions"], 0);
    assert_eq!(json["message_count"], 0);

    let resp = app
        .oneshot(json_req(
            "POST",
            "/conversations/1/generate",
            serde_json::json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn load_rebuilds_model_from_store() {
    let state = test_state();
    let app = router(state.clone());

    // persist without training (directly through the store)
    state
        .store
        .append(parrot::store::NewMessage {
            conversation_id: 3,
            user_id: 1,
            text: "привет как дела".into(),
        })
        .await
        .unwrap();
    assert_eq!(state.engine.stats(3).total_transitions, 0);

    let resp = app
        .clone()
        .oneshot(json_req(
            "POST",
            "/conversations/3/load",
            serde_json::json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    // recent tier trains at weight 2
    assert_eq!(json["total_transitions"], 8);

    let resp = app
        .oneshot(json_req(
            "POST",
            "/conversations/3/generate",
            serde_json::json!({"prefix": "привет как"}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn load_all_reports_loaded_count() {
    let state = test_state();
    let app = router(state.clone());

    for id in 1..=2_i64 {
        state
            .store
            .append(parrot::store::NewMessage {
                conversation_id: id,
                user_id: 1,
                text: "раз два три".into(),
            })
            .await
            .unwrap();
    }

    let resp = app
        .oneshot(json_req("POST", "/load-all", serde_json::json!({})))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["loaded"], 2);
}
