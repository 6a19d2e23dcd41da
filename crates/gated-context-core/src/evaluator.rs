//! Authorization evaluator: point checks and set queries over the relation
//! store, with relation inheritance resolved at read time.
//!
//! Both operations go through the same granting set from the schema
//! ([`RelationSchema::granting_relations`](crate::schema::RelationSchema::granting_relations)),
//! so `list_accessible(S, R, T)` is exactly `{ r in T : check(S, R, r) }`.
//! Unknown subjects and unknown resources simply have no warrants; an
//! undeclared relation is an `InvalidRelation` error.

use std::collections::BTreeSet;

use crate::error::GateResult;
use crate::models::{Consistency, ResourceRef, Subject, WarrantFilter};
use crate::store::RelationStore;

#[derive(Clone)]
pub struct Evaluator {
    store: RelationStore,
}

impl Evaluator {
    pub fn new(store: RelationStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &RelationStore {
        &self.store
    }

    /// Does `subject` hold `relation` on `resource`, directly or by inheritance?
    pub async fn check(
        &self,
        subject: &Subject,
        relation: &str,
        resource: &ResourceRef,
    ) -> GateResult<bool> {
        self.check_with(subject, relation, resource, Consistency::Eventual)
            .await
    }

    pub async fn check_with(
        &self,
        subject: &Subject,
        relation: &str,
        resource: &ResourceRef,
        consistency: Consistency,
    ) -> GateResult<bool> {
        let granting = self
            .store
            .schema()
            .granting_relations(&resource.resource_type, relation)?;

        let filter = WarrantFilter {
            subject: Some(subject.clone()),
            ..WarrantFilter::for_resource(resource)
        };
        let warrants = self.store.read(&filter, consistency).await?;
        let allowed = warrants.iter().any(|w| granting.contains(&w.relation));

        tracing::debug!(%subject, relation, %resource, allowed, "check");
        Ok(allowed)
    }

    /// Every resource of `resource_type` on which `subject` holds `relation`.
    pub async fn list_accessible(
        &self,
        subject: &Subject,
        relation: &str,
        resource_type: &str,
    ) -> GateResult<BTreeSet<String>> {
        self.list_accessible_with(subject, relation, resource_type, Consistency::Eventual)
            .await
    }

    pub async fn list_accessible_with(
        &self,
        subject: &Subject,
        relation: &str,
        resource_type: &str,
        consistency: Consistency,
    ) -> GateResult<BTreeSet<String>> {
        let granting = self
            .store
            .schema()
            .granting_relations(resource_type, relation)?;

        let filter = WarrantFilter {
            resource_type: Some(resource_type.to_string()),
            subject: Some(subject.clone()),
            ..Default::default()
        };
        let accessible: BTreeSet<String> = self
            .store
            .read(&filter, consistency)
            .await?
            .into_iter()
            .filter(|w| granting.contains(&w.relation))
            .map(|w| w.resource.resource_id)
            .collect();

        tracing::debug!(%subject, relation, resource_type, count = accessible.len(), "list accessible");
        Ok(accessible)
    }
}
