//! Declarative relation schema.
//!
//! Each resource type declares a set of primitive relations and zero or more
//! implication edges (`owner` implies `viewer`). The schema is data, loaded
//! once at startup, so new resource types and relations are additive.
//!
//! At load time the implication graph is checked for cycles and dangling
//! targets, then each relation's *granting set* is computed: every relation
//! whose holder also holds it, directly or transitively. The evaluator only
//! ever consults these precomputed sets.
//!
//! ```rust
//! use gated_context_core::schema::RelationSchema;
//!
//! let schema = RelationSchema::default_documents();
//! let granting = schema.granting_relations("document", "viewer").unwrap();
//! assert!(granting.contains("owner"));
//! assert!(granting.contains("viewer"));
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{GateError, GateResult};

/// Serialized form of one resource type, as written in TOML config.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct TypeDefinition {
    pub relations: Vec<String>,
    /// `implies.owner = ["viewer"]` means holding `owner` implies `viewer`.
    #[serde(default)]
    pub implies: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct TypeSchema {
    relations: BTreeSet<String>,
    implies: BTreeMap<String, BTreeSet<String>>,
    granting: BTreeMap<String, BTreeSet<String>>,
}

/// Validated relation schema for all resource types.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "BTreeMap<String, TypeDefinition>")]
pub struct RelationSchema {
    types: BTreeMap<String, TypeSchema>,
}

impl RelationSchema {
    /// `document` with `owner` and `viewer`, where `owner` implies `viewer`.
    pub fn default_documents() -> Self {
        let mut defs = BTreeMap::new();
        defs.insert(
            "document".to_string(),
            TypeDefinition {
                relations: vec!["owner".to_string(), "viewer".to_string()],
                implies: BTreeMap::from([("owner".to_string(), vec!["viewer".to_string()])]),
            },
        );
        // The literal above is acyclic and closed, so validation cannot fail.
        match Self::from_definitions(defs) {
            Ok(schema) => schema,
            Err(e) => unreachable!("default schema rejected: {}", e),
        }
    }

    /// Validate definitions and precompute granting sets.
    pub fn from_definitions(defs: BTreeMap<String, TypeDefinition>) -> GateResult<Self> {
        let mut types = BTreeMap::new();
        for (type_name, def) in defs {
            types.insert(type_name.clone(), build_type(&type_name, def)?);
        }
        Ok(Self { types })
    }

    pub fn resource_types(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    pub fn relations(&self, resource_type: &str) -> Option<impl Iterator<Item = &str>> {
        self.types
            .get(resource_type)
            .map(|t| t.relations.iter().map(String::as_str))
    }

    /// Fails with `InvalidRelation` if `relation` is not declared on `resource_type`.
    pub fn validate(&self, resource_type: &str, relation: &str) -> GateResult<()> {
        match self.types.get(resource_type) {
            Some(t) if t.relations.contains(relation) => Ok(()),
            _ => Err(GateError::invalid_relation(resource_type, relation)),
        }
    }

    /// Every relation whose holder also holds `relation` (including itself).
    pub fn granting_relations(
        &self,
        resource_type: &str,
        relation: &str,
    ) -> GateResult<&BTreeSet<String>> {
        self.types
            .get(resource_type)
            .and_then(|t| t.granting.get(relation))
            .ok_or_else(|| GateError::invalid_relation(resource_type, relation))
    }

    /// Relations directly implied by `relation` (one hop).
    pub fn implied_by(&self, resource_type: &str, relation: &str) -> Option<&BTreeSet<String>> {
        self.types
            .get(resource_type)
            .and_then(|t| t.implies.get(relation))
    }
}

impl Default for RelationSchema {
    fn default() -> Self {
        Self::default_documents()
    }
}

impl TryFrom<BTreeMap<String, TypeDefinition>> for RelationSchema {
    type Error = GateError;

    fn try_from(defs: BTreeMap<String, TypeDefinition>) -> Result<Self, Self::Error> {
        Self::from_definitions(defs)
    }
}

fn build_type(type_name: &str, def: TypeDefinition) -> GateResult<TypeSchema> {
    if def.relations.is_empty() {
        return Err(GateError::InvalidSchema(format!(
            "resource type '{}' declares no relations",
            type_name
        )));
    }
    let relations: BTreeSet<String> = def.relations.into_iter().collect();

    let mut implies: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for (from, targets) in def.implies {
        if !relations.contains(&from) {
            return Err(GateError::InvalidSchema(format!(
                "'{}' implication source '{}' is not a declared relation",
                type_name, from
            )));
        }
        for to in targets {
            if !relations.contains(&to) {
                return Err(GateError::InvalidSchema(format!(
                    "'{}' implication target '{}' is not a declared relation",
                    type_name, to
                )));
            }
            implies.entry(from.clone()).or_default().insert(to);
        }
    }

    check_acyclic(type_name, &relations, &implies)?;
    let granting = granting_closure(&relations, &implies);

    Ok(TypeSchema {
        relations,
        implies,
        granting,
    })
}

/// Kahn's algorithm: if a topological order does not cover every relation,
/// the leftover relations sit on a cycle.
fn check_acyclic(
    type_name: &str,
    relations: &BTreeSet<String>,
    implies: &BTreeMap<String, BTreeSet<String>>,
) -> GateResult<()> {
    let mut in_degree: BTreeMap<&str, usize> =
        relations.iter().map(|r| (r.as_str(), 0)).collect();
    for targets in implies.values() {
        for to in targets {
            *in_degree.entry(to.as_str()).or_default() += 1;
        }
    }

    let mut ready: Vec<&str> = in_degree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(r, _)| *r)
        .collect();
    let mut visited = 0usize;

    while let Some(rel) = ready.pop() {
        visited += 1;
        if let Some(targets) = implies.get(rel) {
            for to in targets {
                if let Some(d) = in_degree.get_mut(to.as_str()) {
                    *d -= 1;
                    if *d == 0 {
                        ready.push(to.as_str());
                    }
                }
            }
        }
    }

    if visited != relations.len() {
        let cyclic: Vec<&str> = in_degree
            .iter()
            .filter(|(_, d)| **d > 0)
            .map(|(r, _)| *r)
            .collect();
        return Err(GateError::InvalidSchema(format!(
            "'{}' implication cycle through: {}",
            type_name,
            cyclic.join(", ")
        )));
    }
    Ok(())
}

/// Fixed-point closure over the reversed implication graph: a relation is
/// granted by itself and by anything that implies a relation granting it.
fn granting_closure(
    relations: &BTreeSet<String>,
    implies: &BTreeMap<String, BTreeSet<String>>,
) -> BTreeMap<String, BTreeSet<String>> {
    let mut granting: BTreeMap<String, BTreeSet<String>> = relations
        .iter()
        .map(|r| (r.clone(), BTreeSet::from([r.clone()])))
        .collect();

    loop {
        let mut changed = false;
        for (from, targets) in implies {
            for to in targets {
                let from_granting = granting.get(from).cloned().unwrap_or_default();
                if let Some(set) = granting.get_mut(to) {
                    for g in from_granting {
                        changed |= set.insert(g);
                    }
                }
            }
        }
        if !changed {
            break;
        }
    }

    granting
}
