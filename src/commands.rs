//! CLI command implementations.
//!
//! Each `run_*` function opens an [`App`], performs one operation, and prints
//! a human-readable result to stdout. Errors propagate to `main`, which
//! decides the exit code.

use anyhow::Result;
use std::path::Path;

use gated_context_core::models::{Consistency, ResourceRef, Revision, Subject, Warrant, WriteOp};
use gated_context_core::retrieval::{RetrievalOutcome, RetrievalRequest};

use crate::app::App;
use crate::config::Config;
use crate::ingest::ingest_path;

fn consistency(at_revision: Option<u64>) -> Consistency {
    at_revision
        .map(|r| Consistency::AtLeast(Revision(r)))
        .unwrap_or_default()
}

pub async fn run_ingest(
    config: &Config,
    path: &Path,
    owner: &Subject,
    id: Option<&str>,
    title: Option<&str>,
) -> Result<()> {
    let app = App::open(config).await?;
    let reports = ingest_path(&app, path, owner, id, title).await?;

    if reports.is_empty() {
        println!("No supported files found.");
    }
    for r in &reports {
        println!(
            "ingested {} \"{}\" ({} chunks) owner={} revision={}",
            r.document_id, r.title, r.chunks, owner, r.revision
        );
    }
    app.pool.close().await;
    Ok(())
}

pub async fn run_write(
    config: &Config,
    op: WriteOp,
    subject: &Subject,
    relation: &str,
    resource_type: Option<&str>,
    resource_id: &str,
) -> Result<()> {
    let app = App::open(config).await?;
    let resource_type = resource_type.unwrap_or(config.authz.document_type.as_str());
    let warrant = Warrant::new(ResourceRef::new(resource_type, resource_id), relation, subject.clone());

    let revision = app.store().write(&warrant, op).await?;
    let verb = match op {
        WriteOp::Create => "granted",
        WriteOp::Delete => "revoked",
    };
    println!("{} {} (revision {})", verb, warrant, revision);
    app.pool.close().await;
    Ok(())
}

pub async fn run_check(
    config: &Config,
    subject: &Subject,
    relation: &str,
    resource_type: Option<&str>,
    resource_id: &str,
    at_revision: Option<u64>,
) -> Result<()> {
    let app = App::open(config).await?;
    let resource = ResourceRef::new(
        resource_type.unwrap_or(config.authz.document_type.as_str()),
        resource_id,
    );
    let allowed = app
        .evaluator()
        .check_with(subject, relation, &resource, consistency(at_revision))
        .await?;
    println!(
        "{}: {} {} {}",
        if allowed { "allowed" } else { "denied" },
        subject,
        relation,
        resource
    );
    app.pool.close().await;
    Ok(())
}

pub async fn run_accessible(
    config: &Config,
    subject: &Subject,
    relation: Option<&str>,
    at_revision: Option<u64>,
) -> Result<()> {
    let app = App::open(config).await?;
    let relation = relation.unwrap_or(config.authz.viewer_relation.as_str());
    let ids = app
        .evaluator()
        .list_accessible_with(
            subject,
            relation,
            &config.authz.document_type,
            consistency(at_revision),
        )
        .await?;

    if ids.is_empty() {
        println!("No accessible documents.");
    }
    for id in &ids {
        println!("{}", id);
    }
    app.pool.close().await;
    Ok(())
}

pub async fn run_list_warrants(
    config: &Config,
    resource_type: Option<&str>,
    resource_id: Option<&str>,
) -> Result<()> {
    let app = App::open(config).await?;
    let resource_type = resource_type.unwrap_or(config.authz.document_type.as_str());
    let warrants = app.store().list_warrants(resource_type, resource_id).await?;

    if warrants.is_empty() {
        println!("No warrants.");
    } else {
        println!("{:<40} {:<12} SUBJECT", "RESOURCE", "RELATION");
        for w in &warrants {
            println!(
                "{:<40} {:<12} {}",
                w.resource.to_string(),
                w.relation,
                w.subject
            );
        }
    }
    app.pool.close().await;
    Ok(())
}

pub async fn run_share(
    config: &Config,
    owner: &Subject,
    grantee: &Subject,
    resource_ids: &[String],
    at_revision: Option<u64>,
) -> Result<()> {
    let app = App::open(config).await?;
    let revision = app
        .service
        .share_with(owner, grantee, resource_ids, consistency(at_revision))
        .await?;
    println!(
        "shared {} document(s) with {} (revision {})",
        resource_ids.len(),
        grantee,
        revision
    );
    app.pool.close().await;
    Ok(())
}

pub async fn run_search(
    config: &Config,
    subject: &Subject,
    query: &str,
    top_k: Option<usize>,
    at_revision: Option<u64>,
) -> Result<()> {
    let app = App::open(config).await?;
    let req = RetrievalRequest::new(
        subject.clone(),
        query,
        top_k.unwrap_or(config.retrieval.top_k),
    )
    .with_consistency(consistency(at_revision));

    match app.service.retrieve(&req).await? {
        RetrievalOutcome::NoAccessibleDocuments => {
            println!("No accessible documents for {}.", subject);
        }
        RetrievalOutcome::Results(results) if results.is_empty() => {
            println!("No results.");
        }
        RetrievalOutcome::Results(results) => {
            for (i, r) in results.iter().enumerate() {
                println!(
                    "{}. [{:.2}] {}",
                    i + 1,
                    r.score,
                    r.document_name.as_deref().unwrap_or("(untitled)")
                );
                println!("    document: {}", r.document_id);
                println!("    excerpt: \"{}\"", excerpt(&r.text, 240));
                println!("    chunk: {}", r.chunk_id);
                println!();
            }
        }
    }
    app.pool.close().await;
    Ok(())
}

fn excerpt(text: &str, max_chars: usize) -> String {
    let flat = text.replace('\n', " ");
    let flat = flat.trim();
    match flat.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &flat[..cut]),
        None => flat.to_string(),
    }
}
