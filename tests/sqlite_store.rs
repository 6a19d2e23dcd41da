//! SQLite backends and ingestion against a temporary database.

use std::collections::BTreeSet;
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

use gated_context::app::App;
use gated_context::config::{parse_config, Config};
use gated_context::config::EmbeddingConfig;
use gated_context::embedding::{HashProvider, OllamaProvider};
use gated_context::ingest::{ingest_file, ingest_path, stable_document_id};
use gated_context_core::error::GateError;
use gated_context_core::index::VectorIndex;
use gated_context_core::models::{
    Chunk, Consistency, ResourceRef, Revision, Subject, Warrant, WarrantFilter, WriteOp,
};
use gated_context_core::retrieval::RetrievalRequest;
use gated_context_core::store::WarrantBackend;

use gated_context::sqlite_warrants::SqliteWarrantBackend;

fn test_config(tmp: &TempDir) -> Config {
    let db_path = tmp.path().join("data").join("gctx.sqlite");
    parse_config(&format!(
        r#"
[db]
path = "{}"

[chunking]
max_tokens = 40

[embedding]
provider = "hash"
dims = 128
"#,
        db_path.display()
    ))
    .unwrap()
}

async fn open(tmp: &TempDir) -> App {
    let cfg = test_config(tmp);
    App::open_with_embedder(&cfg, Arc::new(HashProvider::new(128).unwrap()))
        .await
        .unwrap()
}

fn warrant(doc: &str, rel: &str, user: &str) -> Warrant {
    Warrant::new(ResourceRef::new("document", doc), rel, Subject::user(user))
}

#[tokio::test]
async fn test_warrant_writes_are_idempotent_and_versioned() {
    let tmp = TempDir::new().unwrap();
    let app = open(&tmp).await;
    let backend = SqliteWarrantBackend::new(app.pool.clone());

    let w = warrant("doc_A", "owner", "alice");
    let r1 = backend.put(&w).await.unwrap();
    let r2 = backend.put(&w).await.unwrap();
    assert_eq!(r1, Revision(1));
    assert_eq!(r1, r2, "repeated create must not advance the revision");

    let all = backend
        .read(&WarrantFilter::default(), Consistency::Eventual)
        .await
        .unwrap();
    assert_eq!(all, vec![w.clone()]);

    let r3 = backend.delete(&w).await.unwrap();
    assert_eq!(r3, Revision(2));
    let r4 = backend.delete(&w).await.unwrap();
    assert_eq!(r4, r3, "deleting an absent warrant is a no-op");
}

#[tokio::test]
async fn test_warrant_filter_and_consistency() {
    let tmp = TempDir::new().unwrap();
    let app = open(&tmp).await;
    let backend = SqliteWarrantBackend::new(app.pool.clone());

    backend.put(&warrant("doc_A", "owner", "alice")).await.unwrap();
    backend.put(&warrant("doc_A", "viewer", "bob")).await.unwrap();
    let rev = backend
        .put(&Warrant::new(
            ResourceRef::new("document", "doc_B"),
            "viewer",
            Subject::new("group", "eng"),
        ))
        .await
        .unwrap();

    let bob = backend
        .read(
            &WarrantFilter {
                subject: Some(Subject::user("bob")),
                ..Default::default()
            },
            Consistency::AtLeast(rev),
        )
        .await
        .unwrap();
    assert_eq!(bob, vec![warrant("doc_A", "viewer", "bob")]);

    let on_a = backend
        .read(
            &WarrantFilter::for_resource(&ResourceRef::new("document", "doc_A")),
            Consistency::Eventual,
        )
        .await
        .unwrap();
    assert_eq!(on_a.len(), 2);

    let err = backend
        .read(
            &WarrantFilter::default(),
            Consistency::AtLeast(Revision(rev.0 + 10)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, GateError::StoreUnavailable(_)));
}

#[tokio::test]
async fn test_store_rejects_undeclared_relation() {
    let tmp = TempDir::new().unwrap();
    let app = open(&tmp).await;
    let err = app
        .store()
        .write(&warrant("doc_A", "editor", "alice"), WriteOp::Create)
        .await
        .unwrap_err();
    assert_eq!(err, GateError::invalid_relation("document", "editor"));
}

fn chunk(doc: &str, idx: i64, text: &str) -> Chunk {
    Chunk {
        id: format!("{}-{}", doc, idx),
        document_id: doc.to_string(),
        chunk_index: idx,
        text: text.to_string(),
        hash: String::new(),
    }
}

#[tokio::test]
async fn test_index_replace_and_filtered_search() {
    let tmp = TempDir::new().unwrap();
    let app = open(&tmp).await;

    app.index
        .replace_document(
            "doc_A",
            &[chunk("doc_A", 0, "a0"), chunk("doc_A", 1, "a1")],
            &[vec![1.0, 0.0], vec![0.9, 0.1]],
        )
        .await
        .unwrap();
    app.index
        .replace_document("doc_B", &[chunk("doc_B", 0, "b0")], &[vec![1.0, 0.0]])
        .await
        .unwrap();
    assert_eq!(app.index.chunk_count("doc_A").await.unwrap(), 2);

    // Re-ingest with one chunk: the old second chunk must be gone.
    app.index
        .replace_document("doc_A", &[chunk("doc_A", 0, "a0 v2")], &[vec![1.0, 0.0]])
        .await
        .unwrap();
    assert_eq!(app.index.chunk_count("doc_A").await.unwrap(), 1);

    let only_b = BTreeSet::from(["doc_B".to_string()]);
    let hits = app
        .index
        .search_filtered(&[1.0, 0.0], &only_b, 10)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].document_id, "doc_B");

    let both = BTreeSet::from(["doc_A".to_string(), "doc_B".to_string()]);
    let hits = app.adapter.search(&[1.0, 0.0], &both, 1).await.unwrap();
    assert_eq!(hits.len(), 1);

    let none = app
        .adapter
        .search(&[1.0, 0.0], &BTreeSet::new(), 10)
        .await
        .unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn test_ingest_then_search_respects_warrants() {
    let tmp = TempDir::new().unwrap();
    let app = open(&tmp).await;

    let files = tmp.path().join("files");
    fs::create_dir_all(&files).unwrap();
    let budget = files.join("budget.md");
    fs::write(
        &budget,
        "# Budget 2025\n\nThe quarterly budget covers hiring and travel.\n\nMarketing budget is flat.",
    )
    .unwrap();
    let roadmap = files.join("roadmap.txt");
    fs::write(&roadmap, "Product roadmap: search, sharing, audit logs.").unwrap();

    let alice = Subject::user("alice");
    let bob = Subject::user("bob");

    let a = ingest_file(&app, &budget, &alice, None, None).await.unwrap();
    assert_eq!(a.title, "Budget 2025");
    assert_eq!(a.document_id, stable_document_id(&budget.canonicalize().unwrap()));
    let b = ingest_file(&app, &roadmap, &bob, Some("doc_roadmap"), None)
        .await
        .unwrap();
    assert_eq!(b.document_id, "doc_roadmap");

    let outcome = app
        .service
        .retrieve(&RetrievalRequest::new(alice.clone(), "quarterly budget", 5))
        .await
        .unwrap();
    assert!(!outcome.results().is_empty());
    assert!(outcome.results().iter().all(|r| r.document_id == a.document_id));
    assert_eq!(
        outcome.results()[0].document_name.as_deref(),
        Some("Budget 2025")
    );

    let carol = app
        .service
        .retrieve(&RetrievalRequest::new(Subject::user("carol"), "budget", 5))
        .await
        .unwrap();
    assert!(carol.is_no_access());

    // Bob shares nothing he does not own.
    let err = app
        .service
        .share(&bob, &Subject::user("carol"), &[a.document_id.clone()])
        .await
        .unwrap_err();
    assert!(err.is_denial());

    let rev = app
        .service
        .share(&alice, &Subject::user("carol"), &[a.document_id.clone()])
        .await
        .unwrap();
    let carol = app
        .service
        .retrieve(
            &RetrievalRequest::new(Subject::user("carol"), "budget", 5)
                .with_consistency(Consistency::AtLeast(rev)),
        )
        .await
        .unwrap();
    assert!(carol
        .results()
        .iter()
        .all(|r| r.document_id == a.document_id));
    assert!(!carol.results().is_empty());
}

#[tokio::test]
async fn test_reingest_replaces_chunks() {
    let tmp = TempDir::new().unwrap();
    let app = open(&tmp).await;
    let path = tmp.path().join("notes.txt");
    let alice = Subject::user("alice");

    let long: String = (0..20)
        .map(|i| format!("Paragraph {} about budgets and planning.", i))
        .collect::<Vec<_>>()
        .join("\n\n");
    fs::write(&path, &long).unwrap();
    let first = ingest_file(&app, &path, &alice, None, None).await.unwrap();
    assert!(first.chunks > 1);

    fs::write(&path, "Short now.").unwrap();
    let second = ingest_file(&app, &path, &alice, None, None).await.unwrap();
    assert_eq!(first.document_id, second.document_id);
    assert_eq!(second.chunks, 1);
    assert_eq!(app.index.chunk_count(&second.document_id).await.unwrap(), 1);

    let owners = app
        .store()
        .list_warrants("document", Some(&second.document_id))
        .await
        .unwrap();
    assert_eq!(owners.len(), 1, "repeat ingestion must not duplicate the owner warrant");
}

#[tokio::test]
async fn test_ingest_directory_skips_unsupported_files() {
    let tmp = TempDir::new().unwrap();
    let app = open(&tmp).await;
    let dir = tmp.path().join("docs");
    fs::create_dir_all(dir.join("nested")).unwrap();
    fs::write(dir.join("a.md"), "# A\n\nalpha").unwrap();
    fs::write(dir.join("nested").join("b.txt"), "beta").unwrap();
    fs::write(dir.join("image.png"), [0u8, 1, 2]).unwrap();
    fs::write(dir.join("broken.pdf"), b"not a pdf").unwrap();

    let reports = ingest_path(&app, &dir, &Subject::user("alice"), None, None)
        .await
        .unwrap();
    assert_eq!(reports.len(), 2);

    let visible = app
        .evaluator()
        .list_accessible(&Subject::user("alice"), "viewer", "document")
        .await
        .unwrap();
    assert_eq!(visible.len(), 2);

    assert!(ingest_path(&app, &dir, &Subject::user("alice"), Some("x"), None)
        .await
        .is_err());
}

#[tokio::test]
async fn test_list_matches_check_over_sqlite() {
    let tmp = TempDir::new().unwrap();
    let app = open(&tmp).await;
    let store = app.store();

    let users = ["u1", "u2", "u3"];
    let docs = ["d1", "d2", "d3"];
    let mut n = 0u32;
    for d in docs {
        for u in users {
            n += 1;
            let rel = match n % 3 {
                0 => Some("owner"),
                1 => Some("viewer"),
                _ => None,
            };
            if let Some(rel) = rel {
                store.write(&warrant(d, rel, u), WriteOp::Create).await.unwrap();
            }
        }
    }

    for u in users {
        let subject = Subject::user(u);
        for relation in ["owner", "viewer"] {
            let listed = app
                .evaluator()
                .list_accessible(&subject, relation, "document")
                .await
                .unwrap();
            for d in docs {
                let checked = app
                    .evaluator()
                    .check(&subject, relation, &ResourceRef::new("document", d))
                    .await
                    .unwrap();
                assert_eq!(listed.contains(d), checked, "{} {} {}", u, relation, d);
            }
        }
    }
}

#[tokio::test]
async fn test_search_surfaces_provider_error_not_timeout() {
    use axum::{http::StatusCode, routing::post, Router};

    let app_429 = Router::new().route(
        "/api/embed",
        post(|| async { (StatusCode::TOO_MANY_REQUESTS, "quota exceeded") }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        axum::serve(listener, app_429).await.unwrap();
    });

    let tmp = TempDir::new().unwrap();
    let mut cfg = test_config(&tmp);
    cfg.retrieval.timeout_ms = 2000;
    let provider = OllamaProvider::new(&EmbeddingConfig {
        provider: "ollama".to_string(),
        model: Some("nomic-embed-text".to_string()),
        dims: Some(128),
        url: Some(url),
        max_retries: 5,
        timeout_secs: 5,
    })
    .unwrap();
    let app = App::open_with_embedder(&cfg, Arc::new(provider)).await.unwrap();
    app.store()
        .write(&warrant("doc_A", "owner", "alice"), WriteOp::Create)
        .await
        .unwrap();

    let err = app
        .service
        .retrieve(&RetrievalRequest::new(Subject::user("alice"), "budget", 5))
        .await
        .unwrap_err();
    assert!(matches!(err, GateError::ProviderError(_)), "{:?}", err);
}
