//! HTTP surface against a live server on a free port.

use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use gated_context::app::App;
use gated_context::config::parse_config;
use gated_context::embedding::HashProvider;
use gated_context::ingest::ingest_file;
use gated_context::server::router;
use gated_context_core::models::Subject;
use serde_json::{json, Value};

struct TestServer {
    base: String,
    client: reqwest::Client,
    _tmp: TempDir,
}

impl TestServer {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn post(&self, path: &str, body: Value) -> (u16, Value) {
        let resp = self
            .client
            .post(self.url(path))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }

    async fn get(&self, path: &str) -> (u16, Value) {
        let resp = self.client.get(self.url(path)).send().await.unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }
}

async fn wait_for_server(client: &reqwest::Client, base: &str) {
    for _ in 0..50 {
        if let Ok(resp) = client.get(format!("{}/health", base)).send().await {
            if resp.status().is_success() {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("server did not start at {}", base);
}

/// Alice owns doc_plan, bob owns doc_notes.
async fn start_server() -> TestServer {
    let tmp = TempDir::new().unwrap();
    let cfg = parse_config(&format!(
        "[db]\npath = \"{}\"\n\n[embedding]\nprovider = \"hash\"\ndims = 128\n",
        tmp.path().join("gctx.sqlite").display()
    ))
    .unwrap();
    let app = App::open_with_embedder(&cfg, Arc::new(HashProvider::new(128).unwrap()))
        .await
        .unwrap();

    let plan = tmp.path().join("plan.md");
    fs::write(&plan, "# Plan\n\nThe quarterly budget and hiring plan.").unwrap();
    let notes = tmp.path().join("notes.txt");
    fs::write(&notes, "Meeting notes about the budget review.").unwrap();
    ingest_file(&app, &plan, &Subject::user("alice"), Some("doc_plan"), None)
        .await
        .unwrap();
    ingest_file(&app, &notes, &Subject::user("bob"), Some("doc_notes"), None)
        .await
        .unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        axum::serve(listener, router(app)).await.unwrap();
    });

    let client = reqwest::Client::new();
    wait_for_server(&client, &base).await;
    TestServer {
        base,
        client,
        _tmp: tmp,
    }
}

#[tokio::test]
async fn test_health() {
    let server = start_server().await;
    let (status, body) = server.get("/health").await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_search_filters_by_subject() {
    let server = start_server().await;

    let (status, body) = server
        .post("/search", json!({"subject": "user:alice", "query": "budget"}))
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "ok");
    let results = body["results"].as_array().unwrap();
    assert!(!results.is_empty());
    assert!(results.iter().all(|r| r["document_id"] == "doc_plan"));
    assert_eq!(results[0]["document_name"], "Plan");

    let (status, body) = server
        .post("/search", json!({"subject": "carol", "query": "budget"}))
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "no_accessible_documents");
    assert_eq!(body["results"], json!([]));
}

#[tokio::test]
async fn test_check_and_accessible() {
    let server = start_server().await;

    let (_, body) = server
        .post(
            "/check",
            json!({"subject": "alice", "relation": "viewer", "resource_id": "doc_plan"}),
        )
        .await;
    assert_eq!(body["allowed"], true);

    let (_, body) = server
        .post(
            "/check",
            json!({"subject": "alice", "relation": "owner", "resource_id": "doc_notes"}),
        )
        .await;
    assert_eq!(body["allowed"], false);

    let (status, body) = server.get("/accessible?subject=user:bob").await;
    assert_eq!(status, 200);
    assert_eq!(body["resource_ids"], json!(["doc_notes"]));
}

#[tokio::test]
async fn test_share_then_search_at_revision() {
    let server = start_server().await;

    let (status, body) = server
        .post(
            "/share",
            json!({"owner": "alice", "grantee": "carol", "resource_ids": ["doc_plan"]}),
        )
        .await;
    assert_eq!(status, 200);
    let revision = body["revision"].as_u64().unwrap();

    let (status, body) = server
        .post(
            "/search",
            json!({"subject": "carol", "query": "budget", "at_revision": revision}),
        )
        .await;
    assert_eq!(status, 200);
    let results = body["results"].as_array().unwrap();
    assert!(!results.is_empty());
    assert!(results.iter().all(|r| r["document_id"] == "doc_plan"));
}

#[tokio::test]
async fn test_share_at_revision() {
    let server = start_server().await;

    let (status, body) = server
        .post(
            "/share",
            json!({"owner": "alice", "grantee": "carol", "resource_ids": ["doc_plan"], "at_revision": 9999}),
        )
        .await;
    assert_eq!(status, 503);
    assert_eq!(body["error"]["code"], "store_unavailable");

    let (_, body) = server.get("/accessible?subject=carol").await;
    assert_eq!(body["resource_ids"], json!([]));

    let (status, body) = server
        .post(
            "/share",
            json!({"owner": "alice", "grantee": "carol", "resource_ids": ["doc_plan"], "at_revision": 1}),
        )
        .await;
    assert_eq!(status, 200, "{}", body);
    assert!(body["revision"].as_u64().unwrap() > 1);
}

#[tokio::test]
async fn test_share_denial_is_forbidden_and_atomic() {
    let server = start_server().await;

    let (status, body) = server
        .post(
            "/share",
            json!({"owner": "alice", "grantee": "carol", "resource_ids": ["doc_plan", "doc_notes"]}),
        )
        .await;
    assert_eq!(status, 403);
    assert_eq!(body["error"]["code"], "not_authorized");

    let (_, body) = server.get("/accessible?subject=carol").await;
    assert_eq!(body["resource_ids"], json!([]));
}

#[tokio::test]
async fn test_warrant_write_and_list() {
    let server = start_server().await;

    let (status, body) = server
        .post(
            "/warrants",
            json!({
                "op": "create",
                "warrant": {
                    "resource_type": "document",
                    "resource_id": "doc_notes",
                    "relation": "viewer",
                    "subject": "group:eng"
                }
            }),
        )
        .await;
    assert_eq!(status, 200, "{}", body);
    assert!(body["revision"].as_u64().unwrap() > 0);

    let (status, body) = server.get("/warrants?resource_id=doc_notes").await;
    assert_eq!(status, 200);
    let subjects: Vec<&str> = body["warrants"]
        .as_array()
        .unwrap()
        .iter()
        .map(|w| w["subject"].as_str().unwrap())
        .collect();
    assert!(subjects.contains(&"group:eng"));
    assert!(subjects.contains(&"user:bob"));
}

#[tokio::test]
async fn test_error_codes() {
    let server = start_server().await;

    let (status, body) = server
        .post(
            "/search",
            json!({"subject": "alice", "query": "budget", "top_k": 0}),
        )
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "invalid_request");

    let (status, body) = server
        .post(
            "/check",
            json!({"subject": "alice", "relation": "editor", "resource_id": "doc_plan"}),
        )
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "invalid_relation");

    let (status, body) = server.post("/search", json!({"query": "no subject"})).await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "invalid_request");

    let (status, body) = server
        .post(
            "/search",
            json!({"subject": "alice", "query": "budget", "at_revision": 9999}),
        )
        .await;
    assert_eq!(status, 503);
    assert_eq!(body["error"]["code"], "store_unavailable");
}
