use axum::body::{Body, Bytes};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use formula_core::config::BuildConfig;
use formula_core::persist::{save_snapshot, IndexPaths};
use formula_core::snapshot::RawFormula;
use formula_core::{IndexSnapshot, PipelineConfig};
use http_body_util::BodyExt;
use serde_json::Value;
use std::fs;
use tempfile::tempdir;
use tower::ServiceExt;

fn build_tiny_index(dir: &std::path::Path) {
    let raws = vec![
        RawFormula { id: "id1".into(), latex: "a+b".into(), skeleton: None },
        RawFormula { id: "id2".into(), latex: "a+c".into(), skeleton: None },
        RawFormula { id: "id3".into(), latex: "x*y".into(), skeleton: None },
    ];
    let snapshot = IndexSnapshot::ingest(raws, &BuildConfig::default()).unwrap();
    save_snapshot(&IndexPaths::new(dir), &snapshot, "2024-01-01T00:00:00Z".into()).unwrap();
}

fn app(dir: &std::path::Path) -> Router {
    server::build_app(dir.to_string_lossy().to_string(), PipelineConfig::default()).unwrap()
}

async fn call(app: Router, req: Request<Body>) -> (StatusCode, Bytes) {
    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    (status, body)
}

#[tokio::test]
async fn health_is_ok() {
    let dir = tempdir().unwrap();
    build_tiny_index(dir.path());
    let (status, body) = call(app(dir.path()), Request::get("/health").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"ok");
}

#[tokio::test]
async fn search_returns_ranked_results() {
    let dir = tempdir().unwrap();
    build_tiny_index(dir.path());

    let (status, body) = call(app(dir.path()), Request::get("/search?q=a%2Bb&k=2").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["canonical"], "a+b");
    let arr = json["results"].as_array().unwrap();
    assert_eq!(arr.len(), 2);
    assert_eq!(arr[0]["id"], "id1");
    assert_eq!(arr[0]["latex"], "a+b");
    assert_eq!(arr[1]["id"], "id2");
}

#[tokio::test]
async fn post_search_fuses_semantic_ranking() {
    let dir = tempdir().unwrap();
    build_tiny_index(dir.path());

    let payload = serde_json::json!({
        "latex": "q^2",
        "semantic": [{"id": "id3", "score": 0.9}],
        "k": 5
    });
    let req = Request::post("/search")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(payload.to_string()))
        .unwrap();
    let (status, body) = call(app(dir.path()), req).await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["results"][0]["id"], "id3");
    let notes = json["notes"].as_array().unwrap();
    assert!(notes.iter().any(|n| n["note"] == "index_miss"));
}

#[tokio::test]
async fn formula_lookup() {
    let dir = tempdir().unwrap();
    build_tiny_index(dir.path());

    let (status, body) = call(app(dir.path()), Request::get("/formula/id3").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["canonical"], "x*y");
    assert_eq!(json["structural_hash"].as_str().unwrap().len(), 32);

    let (status, _) = call(app(dir.path()), Request::get("/formula/nope").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn corrupt_index_refuses_to_start() {
    let dir = tempdir().unwrap();
    build_tiny_index(dir.path());
    fs::write(IndexPaths::new(dir.path()).records(), b"garbage").unwrap();
    assert!(server::build_app(dir.path().to_string_lossy().to_string(), PipelineConfig::default()).is_err());
}
