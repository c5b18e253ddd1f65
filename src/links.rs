//! Reverse-reference resolution
//!
//! Given a document, find every document of every registered model that
//! points at it. Reference paths are discovered from the registry, one query
//! per model is fanned out concurrently, and the results are merged into a
//! [`LinkMap`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;

use crate::document::{Document, DocumentId};
use crate::error::Result;
use crate::registry::ModelRegistry;
use crate::schema::{FieldDef, FieldKind};
use crate::store::{Connections, Filter};

/// A field path holding references to `target`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReferencePath {
    pub path: String,
    pub target: String,
    /// Array of references rather than a single one
    pub many: bool,
}

impl ReferencePath {
    pub fn from_field(field: &FieldDef) -> Option<Self> {
        let (target, many) = match &field.kind {
            FieldKind::SingleReference(target) => (target, false),
            FieldKind::ReferenceArray(target) => (target, true),
            FieldKind::Scalar | FieldKind::Other => return None,
        };
        Some(Self {
            path: field.name.clone(),
            target: target.clone(),
            many,
        })
    }
}

/// What to do when one model's query fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FanOutPolicy {
    /// Any failed query fails the whole resolution
    #[default]
    FailFast,
    /// Failed models are logged and left out of the result
    SkipFailed,
}

/// One fan-out query of a resolution plan
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkQuery {
    pub model: String,
    pub connection: String,
    pub paths: Vec<String>,
    pub filter: Filter,
}

/// Model name → identifiers of documents referencing the resolved document
///
/// Never empty: a resolution with no matches yields `None` instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LinkMap(BTreeMap<String, Vec<DocumentId>>);

impl LinkMap {
    /// Identifiers of linking documents of one model
    pub fn get(&self, model: &str) -> Option<&[DocumentId]> {
        self.0.get(model).map(Vec::as_slice)
    }

    /// Models with at least one linking document, sorted
    pub fn models(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[DocumentId])> {
        self.0.iter().map(|(model, ids)| (model.as_str(), ids.as_slice()))
    }

    pub fn model_count(&self) -> usize {
        self.0.len()
    }

    /// Total number of linking documents across models
    pub fn total(&self) -> usize {
        self.0.values().map(Vec::len).sum()
    }

    pub fn into_inner(self) -> BTreeMap<String, Vec<DocumentId>> {
        self.0
    }
}

/// Resolver installed on every augmented schema
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkResolver {
    policy: FanOutPolicy,
}

impl LinkResolver {
    pub fn new(policy: FanOutPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> FanOutPolicy {
        self.policy
    }

    /// Queries needed to find documents referencing `id` of `model_name`
    ///
    /// Models without a matching path are skipped. Each remaining model gets
    /// exactly one query, OR-ing its matching paths.
    pub fn plan(model_name: &str, id: &DocumentId, registry: &ModelRegistry) -> Vec<LinkQuery> {
        registry
            .list_schemas()
            .filter_map(|(other, schema)| {
                let paths: Vec<String> = schema
                    .link_paths()
                    .iter()
                    .filter(|reference| reference.target == model_name)
                    .map(|reference| reference.path.clone())
                    .collect();
                if paths.is_empty() {
                    return None;
                }

                Some(LinkQuery {
                    model: other.to_string(),
                    connection: schema.connection().to_string(),
                    filter: Filter::any_eq(&paths, id.to_value()),
                    paths,
                })
            })
            .collect()
    }

    /// Find every document referencing `doc`
    ///
    /// Returns `Ok(None)` when nothing links to it. Queries run concurrently
    /// and the merge waits for all of them.
    pub async fn find_links(
        &self,
        doc: &Document,
        model_name: &str,
        registry: &ModelRegistry,
        connections: &Connections,
    ) -> Result<Option<LinkMap>> {
        let queries = Self::plan(model_name, doc.id(), registry);
        if queries.is_empty() {
            return Ok(None);
        }

        let jobs = queries
            .into_iter()
            .map(|query| connections.get(&query.connection).map(|store| (query, store)))
            .collect::<Result<Vec<_>>>()?;

        tracing::debug!(model = model_name, id = %doc.id(), queries = jobs.len(), "resolving links");

        let mut tasks = JoinSet::new();
        for (query, store) in jobs {
            tasks.spawn(async move {
                let result = store.find_ids(&query.model, &query.filter).await;
                (query.model, result)
            });
        }

        let mut links = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            let (model, result) = match joined {
                Ok(outcome) => outcome,
                Err(err) => {
                    tasks.detach_all();
                    return Err(err.into());
                }
            };

            match result {
                Ok(ids) => {
                    if !ids.is_empty() {
                        links.insert(model, ids);
                    }
                }
                // A registered model the store cannot resolve is always fatal
                Err(err) if err.is_not_found() || self.policy == FanOutPolicy::FailFast => {
                    tasks.detach_all();
                    return Err(err);
                }
                Err(err) => {
                    tracing::warn!(model = %model, error = %err, "link query failed, excluding model");
                }
            }
        }

        if links.is_empty() {
            Ok(None)
        } else {
            Ok(Some(LinkMap(links)))
        }
    }
}
