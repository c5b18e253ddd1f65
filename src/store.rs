//! Query and write interfaces consumed by the model layer
//!
//! Connection lifecycle belongs to the host; this module only sees a named set
//! of ready [`DocumentStore`]s. [`MemoryStore`] is an in-process implementation.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::audit;
use crate::document::{Document, DocumentId, Populated};
use crate::error::{ModelError, Result};
use crate::registry::ModelRegistry;
use crate::schema::{FieldKind, ModelSchema};
use crate::versioning::WriteContext;

/// Connection used by schemas that do not name one
pub const DEFAULT_CONNECTION: &str = "default";

/// Document selector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Filter {
    /// Field equals value, or contains it when the stored value is an array
    Eq { path: String, value: Value },
    /// Any of the inner filters matches
    Or { any: Vec<Filter> },
}

impl Filter {
    pub fn eq(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq {
            path: path.into(),
            value: value.into(),
        }
    }

    /// Match `value` on any of `paths`
    pub fn any_eq(paths: &[String], value: Value) -> Self {
        match paths {
            [path] => Filter::eq(path.clone(), value),
            _ => Filter::Or {
                any: paths.iter().map(|path| Filter::eq(path.clone(), value.clone())).collect(),
            },
        }
    }

    /// Field paths this filter inspects
    pub fn paths(&self) -> Vec<&str> {
        match self {
            Filter::Eq { path, .. } => vec![path.as_str()],
            Filter::Or { any } => any.iter().flat_map(Filter::paths).collect(),
        }
    }

    pub fn matches(&self, id: &DocumentId, values: &Map<String, Value>) -> bool {
        match self {
            Filter::Eq { path, value } if path == audit::ID => value.as_str() == Some(id.as_str()),
            Filter::Eq { path, value } => match lookup(values, path) {
                Some(Value::Array(items)) => items.contains(value),
                Some(found) => found == value,
                None => false,
            },
            Filter::Or { any } => any.iter().any(|filter| filter.matches(id, values)),
        }
    }
}

/// Walk a dotted path through nested objects
fn lookup<'a>(values: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = values.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// A ready connection to a document store
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Identifiers of documents of `model` matching `filter`, in storage order
    async fn find_ids(&self, model: &str, filter: &Filter) -> Result<Vec<DocumentId>>;

    /// Stored values of one document
    async fn load(&self, model: &str, id: &DocumentId) -> Result<Option<Map<String, Value>>>;

    /// Insert or replace one document
    async fn persist(&self, model: &str, id: &DocumentId, values: Map<String, Value>) -> Result<()>;
}

/// Named set of live stores
#[derive(Clone, Default)]
pub struct Connections {
    stores: BTreeMap<String, Arc<dyn DocumentStore>>,
}

impl Connections {
    pub fn new() -> Self {
        Self::default()
    }

    /// A set holding only the default connection
    pub fn single(store: Arc<dyn DocumentStore>) -> Self {
        Self::new().with(DEFAULT_CONNECTION, store)
    }

    pub fn with(mut self, name: impl Into<String>, store: Arc<dyn DocumentStore>) -> Self {
        self.insert(name, store);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, store: Arc<dyn DocumentStore>) -> Option<Arc<dyn DocumentStore>> {
        self.stores.insert(name.into(), store)
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn DocumentStore>> {
        self.stores
            .get(name)
            .cloned()
            .ok_or_else(|| ModelError::UnknownConnection(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.stores.keys().map(String::as_str)
    }

    /// Store holding documents of `schema`
    pub fn for_schema(&self, schema: &ModelSchema) -> Result<Arc<dyn DocumentStore>> {
        self.get(schema.connection())
    }

    /// Persist a document
    ///
    /// Pre-write hooks run on a staged copy. The caller's document is only
    /// replaced once every hook and the store write have succeeded.
    pub async fn save(&self, doc: &mut Document, ctx: &WriteContext) -> Result<()> {
        let schema = Arc::clone(doc.schema());
        let store = self.for_schema(&schema)?;

        let mut staged = doc.clone();
        for hook in schema.hooks() {
            if let Err(err) = hook.before_write(&mut staged, ctx) {
                tracing::debug!(model = schema.model_name(), id = %doc.id(), hook = hook.name(), error = %err, "write aborted");
                return Err(err);
            }
        }

        store
            .persist(schema.model_name(), staged.id(), staged.values().clone())
            .await?;
        staged.mark_persisted();
        *doc = staged;
        Ok(())
    }

    /// Load one document of `model`
    pub async fn find_by_id(&self, registry: &ModelRegistry, model: &str, id: &DocumentId) -> Result<Option<Document>> {
        let schema = registry.get_schema(model)?;
        let store = self.for_schema(&schema)?;
        let values = store.load(model, id).await?;
        Ok(values.map(|values| Document::from_stored(&schema, id.clone(), values)))
    }

    /// Load the documents referenced by `field` and attach them to `doc`
    pub async fn populate(&self, registry: &ModelRegistry, doc: &mut Document, field: &str) -> Result<()> {
        let schema = Arc::clone(doc.schema());
        let def = schema.field(field).ok_or_else(|| ModelError::UnknownField {
            model: schema.model_name().to_string(),
            field: field.to_string(),
        })?;
        let not_a_reference = || ModelError::NotAReference {
            model: schema.model_name().to_string(),
            field: field.to_string(),
        };
        let target = def.kind.target().ok_or_else(not_a_reference)?;

        let raw = match doc.get(field) {
            None | Some(Value::Null) => return Ok(()),
            Some(raw) => raw.clone(),
        };
        let invalid = || ModelError::InvalidPopulate {
            model: schema.model_name().to_string(),
            field: field.to_string(),
            reason: format!("stored value {} is not an identifier", raw),
        };

        let populated = match &def.kind {
            FieldKind::ReferenceArray(_) => {
                let items = raw.as_array().ok_or_else(invalid)?;
                let mut docs = Vec::with_capacity(items.len());
                for item in items {
                    let id = DocumentId::from_value(item).ok_or_else(invalid)?;
                    docs.push(self.load_reference(registry, target, &id).await?);
                }
                Populated::Many(docs)
            }
            _ => {
                let id = DocumentId::from_value(&raw).ok_or_else(invalid)?;
                Populated::One(Box::new(self.load_reference(registry, target, &id).await?))
            }
        };

        doc.populate(field, populated)
    }

    async fn load_reference(&self, registry: &ModelRegistry, model: &str, id: &DocumentId) -> Result<Document> {
        self.find_by_id(registry, model, id)
            .await?
            .ok_or_else(|| ModelError::DocumentNotFound {
                model: model.to_string(),
                id: id.to_string(),
            })
    }
}

impl fmt::Debug for Connections {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.stores.keys()).finish()
    }
}

/// In-process document store
///
/// Collections keep insertion order. Every query is recorded so callers can
/// inspect how many queries a resolution issued.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<BTreeMap<String, Vec<(DocumentId, Map<String, Value>)>>>,
    queries: Mutex<Vec<(String, Filter)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents stored for `model`
    pub fn count(&self, model: &str) -> usize {
        self.collections.read().get(model).map_or(0, Vec::len)
    }

    /// Queries received so far, in arrival order
    pub fn query_log(&self) -> Vec<(String, Filter)> {
        self.queries.lock().clone()
    }

    pub fn clear_query_log(&self) {
        self.queries.lock().clear();
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn find_ids(&self, model: &str, filter: &Filter) -> Result<Vec<DocumentId>> {
        self.queries.lock().push((model.to_string(), filter.clone()));

        let collections = self.collections.read();
        let ids = collections
            .get(model)
            .map(|docs| {
                docs.iter()
                    .filter(|(id, values)| filter.matches(id, values))
                    .map(|(id, _)| id.clone())
                    .collect()
            })
            .unwrap_or_default();
        Ok(ids)
    }

    async fn load(&self, model: &str, id: &DocumentId) -> Result<Option<Map<String, Value>>> {
        let collections = self.collections.read();
        Ok(collections
            .get(model)
            .and_then(|docs| docs.iter().find(|(stored, _)| stored == id))
            .map(|(_, values)| values.clone()))
    }

    async fn persist(&self, model: &str, id: &DocumentId, values: Map<String, Value>) -> Result<()> {
        let mut collections = self.collections.write();
        let docs = collections.entry(model.to_string()).or_default();
        match docs.iter_mut().find(|(stored, _)| stored == id) {
            Some(entry) => entry.1 = values,
            None => docs.push((id.clone(), values)),
        }
        Ok(())
    }
}
