//! Core data types: principals, resources, warrants, chunks, and the
//! consistency tokens that flow between the store and its readers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::GateError;

/// Subject type assumed when a subject is written without a `type:` prefix.
pub const DEFAULT_SUBJECT_TYPE: &str = "user";

/// An opaque principal (user or group), written `type:id`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Subject {
    pub subject_type: String,
    pub subject_id: String,
}

impl Subject {
    pub fn new(subject_type: impl Into<String>, subject_id: impl Into<String>) -> Self {
        Self {
            subject_type: subject_type.into(),
            subject_id: subject_id.into(),
        }
    }

    pub fn user(subject_id: impl Into<String>) -> Self {
        Self::new(DEFAULT_SUBJECT_TYPE, subject_id)
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.subject_type, self.subject_id)
    }
}

impl FromStr for Subject {
    type Err = GateError;

    /// Parses `type:id`; a bare `id` is read as `user:id`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (subject_type, subject_id) = match s.split_once(':') {
            Some((t, id)) => (t, id),
            None => (DEFAULT_SUBJECT_TYPE, s),
        };
        if subject_type.is_empty() || subject_id.is_empty() {
            return Err(GateError::InvalidRequest(format!(
                "subject must be 'type:id' or 'id', got '{}'",
                s
            )));
        }
        Ok(Subject::new(subject_type, subject_id))
    }
}

impl TryFrom<String> for Subject {
    type Error = GateError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Subject> for String {
    fn from(s: Subject) -> Self {
        s.to_string()
    }
}

/// A typed, identified resource (e.g. `document:doc_A`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    pub resource_type: String,
    pub resource_id: String,
}

impl ResourceRef {
    pub fn new(resource_type: impl Into<String>, resource_id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource_type, self.resource_id)
    }
}

/// A direct grant: `subject` holds `relation` on `resource`.
///
/// Warrants are never created by inheritance; implied relations are
/// computed at read time by the [`Evaluator`](crate::evaluator::Evaluator).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Warrant {
    #[serde(flatten)]
    pub resource: ResourceRef,
    pub relation: String,
    pub subject: Subject,
}

impl Warrant {
    pub fn new(resource: ResourceRef, relation: impl Into<String>, subject: Subject) -> Self {
        Self {
            resource,
            relation: relation.into(),
            subject,
        }
    }
}

impl fmt::Display for Warrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}@{}", self.resource, self.relation, self.subject)
    }
}

/// Write operation applied to a single warrant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteOp {
    Create,
    Delete,
}

/// Field-wise filter over warrants; `None` matches anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WarrantFilter {
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub relation: Option<String>,
    pub subject: Option<Subject>,
}

impl WarrantFilter {
    pub fn for_resource(resource: &ResourceRef) -> Self {
        Self {
            resource_type: Some(resource.resource_type.clone()),
            resource_id: Some(resource.resource_id.clone()),
            ..Default::default()
        }
    }

    pub fn matches(&self, w: &Warrant) -> bool {
        self.resource_type
            .as_ref()
            .map_or(true, |t| *t == w.resource.resource_type)
            && self
                .resource_id
                .as_ref()
                .map_or(true, |id| *id == w.resource.resource_id)
            && self.relation.as_ref().map_or(true, |r| *r == w.relation)
            && self.subject.as_ref().map_or(true, |s| *s == w.subject)
    }
}

/// Monotonic store revision returned by every write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Revision(pub u64);

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Read consistency requested from the relation store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Consistency {
    /// Any replica may answer; recent writes may not be visible yet.
    #[default]
    Eventual,
    /// The answer must reflect at least this revision.
    AtLeast(Revision),
}

/// A unit of embedded content belonging to one document.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub hash: String,
}

/// One similarity-search hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkHit {
    pub chunk_id: String,
    pub score: f64,
    pub document_id: String,
    pub text: String,
}
