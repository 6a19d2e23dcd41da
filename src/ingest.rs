//! Ingestion: file → text → chunks → vectors → index, then an owner warrant.
//!
//! The document's chunks and vectors are replaced in one transaction, so a
//! re-ingested document never keeps chunks from its previous version. The
//! owner warrant is written only after the index write succeeds; a failure
//! in between leaves an indexed document nobody can see, never a visible
//! document with missing content.

use anyhow::{bail, Context, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use gated_context_core::models::{ResourceRef, Revision, Subject, Warrant, WriteOp};

use crate::app::App;
use crate::chunk::chunk_text;
use crate::extract::{content_type_for, extract_text, guess_title};
use crate::sqlite_index::DocumentRecord;

#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub document_id: String,
    pub title: String,
    pub source_path: String,
    pub chunks: usize,
    pub revision: Revision,
}

/// `doc_` + the first 16 hex chars of SHA-256 over the canonical path.
pub fn stable_document_id(canonical: &Path) -> String {
    let digest = Sha256::digest(canonical.to_string_lossy().as_bytes());
    let hex = format!("{:x}", digest);
    format!("doc_{}", &hex[..16])
}

/// Ingest one file or every supported file under a directory.
///
/// `id` and `title` apply only to a single file.
pub async fn ingest_path(
    app: &App,
    path: &Path,
    owner: &Subject,
    id: Option<&str>,
    title: Option<&str>,
) -> Result<Vec<IngestReport>> {
    if !path.is_dir() {
        return Ok(vec![ingest_file(app, path, owner, id, title).await?]);
    }
    if id.is_some() || title.is_some() {
        bail!("--id and --title can only be used when ingesting a single file");
    }

    let mut files: Vec<PathBuf> = WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| content_type_for(p).is_some())
        .collect();
    files.sort();

    let mut reports = Vec::with_capacity(files.len());
    for file in files {
        match ingest_file(app, &file, owner, None, None).await {
            Ok(r) => reports.push(r),
            // Extraction failures skip the file; backend failures stop the run.
            Err(e) if e.downcast_ref::<crate::extract::ExtractError>().is_some() => {
                tracing::warn!(path = %file.display(), error = %e, "skipping file");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(reports)
}

pub async fn ingest_file(
    app: &App,
    path: &Path,
    owner: &Subject,
    id: Option<&str>,
    title: Option<&str>,
) -> Result<IngestReport> {
    let canonical = path
        .canonicalize()
        .with_context(|| format!("Cannot read {}", path.display()))?;
    let content_type = content_type_for(&canonical).ok_or_else(|| {
        anyhow::anyhow!(
            "Unsupported file type: {} (expected .txt, .md or .pdf)",
            canonical.display()
        )
    })?;

    let bytes = std::fs::read(&canonical)
        .with_context(|| format!("Failed to read {}", canonical.display()))?;
    let text = extract_text(&bytes, content_type)?;

    let document_id = match id {
        Some(id) if !id.trim().is_empty() => id.trim().to_string(),
        Some(_) => bail!("--id must not be empty"),
        None => stable_document_id(&canonical),
    };
    let title = title
        .map(str::to_string)
        .unwrap_or_else(|| guess_title(&canonical, &text, content_type));

    let chunks = chunk_text(&document_id, &text, app.config.chunking.max_tokens);
    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    let vectors = app.embedder.embed_batch(&texts).await?;

    app.index
        .upsert_document(&DocumentRecord {
            id: document_id.clone(),
            title: title.clone(),
            source_path: Some(canonical.to_string_lossy().to_string()),
            content_hash: format!("{:x}", Sha256::digest(&bytes)),
        })
        .await?;
    app.adapter
        .replace_document(&document_id, &chunks, &vectors)
        .await?;

    let authz = &app.config.authz;
    let revision = app
        .store()
        .write(
            &Warrant::new(
                ResourceRef::new(&authz.document_type, &document_id),
                &authz.owner_relation,
                owner.clone(),
            ),
            WriteOp::Create,
        )
        .await?;

    tracing::info!(document_id = %document_id, chunks = chunks.len(), %owner, "ingested");
    Ok(IngestReport {
        document_id,
        title,
        source_path: canonical.to_string_lossy().to_string(),
        chunks: chunks.len(),
        revision,
    })
}
