//! In-memory [`WarrantBackend`] for tests and embedded use.
//!
//! Warrants live in a `BTreeSet` behind a `std::sync::RwLock`, so reads run
//! concurrently and each write is applied atomically. The backend is a single
//! primary: every read sees every completed write.

use std::collections::BTreeSet;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::{GateError, GateResult};
use crate::models::{Consistency, Revision, Warrant, WarrantFilter};

use super::WarrantBackend;

#[derive(Default)]
struct State {
    warrants: BTreeSet<Warrant>,
    revision: u64,
}

pub struct InMemoryWarrantBackend {
    state: RwLock<State>,
}

impl InMemoryWarrantBackend {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
        }
    }

    /// Seed the backend with warrants, as if each had been created in order.
    pub fn with_warrants(warrants: impl IntoIterator<Item = Warrant>) -> Self {
        let mut state = State::default();
        for w in warrants {
            if state.warrants.insert(w) {
                state.revision += 1;
            }
        }
        Self {
            state: RwLock::new(state),
        }
    }

    pub fn len(&self) -> usize {
        self.state.read().map(|s| s.warrants.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryWarrantBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned() -> GateError {
    GateError::StoreUnavailable("in-memory warrant lock poisoned".to_string())
}

#[async_trait]
impl WarrantBackend for InMemoryWarrantBackend {
    async fn put(&self, warrant: &Warrant) -> GateResult<Revision> {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        if state.warrants.insert(warrant.clone()) {
            state.revision += 1;
        }
        Ok(Revision(state.revision))
    }

    async fn delete(&self, warrant: &Warrant) -> GateResult<Revision> {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        if state.warrants.remove(warrant) {
            state.revision += 1;
        }
        Ok(Revision(state.revision))
    }

    async fn read(
        &self,
        filter: &WarrantFilter,
        consistency: Consistency,
    ) -> GateResult<Vec<Warrant>> {
        let state = self.state.read().map_err(|_| poisoned())?;
        if let Consistency::AtLeast(wanted) = consistency {
            if wanted.0 > state.revision {
                return Err(GateError::StoreUnavailable(format!(
                    "revision {} not yet visible (at {})",
                    wanted, state.revision
                )));
            }
        }
        Ok(state
            .warrants
            .iter()
            .filter(|w| filter.matches(w))
            .cloned()
            .collect())
    }

    async fn revision(&self) -> GateResult<Revision> {
        let state = self.state.read().map_err(|_| poisoned())?;
        Ok(Revision(state.revision))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ResourceRef, Subject};

    fn w(doc: &str, rel: &str, user: &str) -> Warrant {
        Warrant::new(ResourceRef::new("document", doc), rel, Subject::user(user))
    }

    #[tokio::test]
    async fn test_seeded_backend_reads_back() {
        let backend = InMemoryWarrantBackend::with_warrants(vec![
            w("a", "owner", "u1"),
            w("b", "viewer", "u2"),
            w("a", "owner", "u1"),
        ]);
        assert_eq!(backend.len(), 2);
        assert_eq!(backend.revision().await.unwrap(), Revision(2));

        let filter = WarrantFilter {
            subject: Some(Subject::user("u2")),
            ..Default::default()
        };
        let found = backend.read(&filter, Consistency::Eventual).await.unwrap();
        assert_eq!(found, vec![w("b", "viewer", "u2")]);
    }

    #[tokio::test]
    async fn test_at_least_future_revision_is_unavailable() {
        let backend = InMemoryWarrantBackend::new();
        let rev = backend.put(&w("a", "owner", "u1")).await.unwrap();

        let ok = backend
            .read(&WarrantFilter::default(), Consistency::AtLeast(rev))
            .await;
        assert!(ok.is_ok());

        let ahead = backend
            .read(
                &WarrantFilter::default(),
                Consistency::AtLeast(Revision(rev.0 + 1)),
            )
            .await;
        assert!(matches!(ahead, Err(GateError::StoreUnavailable(_))));
    }
}
