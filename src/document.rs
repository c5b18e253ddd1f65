//! Live document instances
//!
//! A [`Document`] keeps raw stored values (reference fields hold bare
//! identifiers) apart from populated sub-documents, so anything that needs the
//! stored shape never sees an expanded reference.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::audit;
use crate::error::{ModelError, Result};
use crate::links::LinkMap;
use crate::registry::ModelRegistry;
use crate::schema::{FieldDef, FieldDefault, FieldKind, ModelSchema};
use crate::store::Connections;
use crate::versioning::{self, VersionSnapshot, WriteContext};

/// Identifier of a stored document
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    /// Generate a fresh identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_value(&self) -> Value {
        Value::String(self.0.clone())
    }

    /// Read an identifier from a stored reference value
    pub fn from_value(value: &Value) -> Option<Self> {
        value.as_str().map(Self::from)
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for DocumentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for DocumentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Expanded value of a reference field
#[derive(Debug, Clone)]
pub enum Populated {
    One(Box<Document>),
    Many(Vec<Document>),
}

impl Populated {
    fn to_json(&self, options: &ToJsonOptions) -> Result<Value> {
        match self {
            Populated::One(doc) => Ok(Value::Object(doc.to_json(options)?)),
            Populated::Many(docs) => docs
                .iter()
                .map(|doc| doc.to_json(options).map(Value::Object))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
        }
    }
}

/// Options for [`Document::to_json`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToJsonOptions {
    pub virtuals: bool,
    pub getters: bool,
    /// Route through the schema's public transform
    pub transform: bool,
}

impl ToJsonOptions {
    /// Stored values only: no virtuals, no getters, no transform
    pub const RAW: Self = Self {
        virtuals: false,
        getters: false,
        transform: false,
    };
}

impl Default for ToJsonOptions {
    fn default() -> Self {
        Self {
            virtuals: false,
            getters: false,
            transform: true,
        }
    }
}

/// One document of a registered model
#[derive(Clone)]
pub struct Document {
    schema: Arc<ModelSchema>,
    id: DocumentId,
    values: Map<String, Value>,
    populated: BTreeMap<String, Populated>,
    persisted: bool,
}

impl Document {
    /// New unsaved document with a fresh identifier
    pub fn new(schema: &Arc<ModelSchema>) -> Self {
        Self::with_id(schema, DocumentId::new())
    }

    /// New unsaved document; defaults are applied except timestamps, which
    /// are filled in at write time
    pub fn with_id(schema: &Arc<ModelSchema>, id: DocumentId) -> Self {
        let mut values = Map::new();
        for field in schema.fields() {
            if matches!(field.default, FieldDefault::Now) {
                continue;
            }
            if let Some(value) = field.default.generate() {
                values.insert(field.name.clone(), value);
            }
        }

        Self {
            schema: Arc::clone(schema),
            id,
            values,
            populated: BTreeMap::new(),
            persisted: false,
        }
    }

    /// Rehydrate a document read back from a store
    pub fn from_stored(schema: &Arc<ModelSchema>, id: DocumentId, mut values: Map<String, Value>) -> Self {
        values.shift_remove(audit::ID);
        Self {
            schema: Arc::clone(schema),
            id,
            values,
            populated: BTreeMap::new(),
            persisted: true,
        }
    }

    pub fn id(&self) -> &DocumentId {
        &self.id
    }

    pub fn model_name(&self) -> &str {
        self.schema.model_name()
    }

    pub fn schema(&self) -> &Arc<ModelSchema> {
        &self.schema
    }

    /// Whether the document has never been written
    pub fn is_new(&self) -> bool {
        !self.persisted
    }

    /// Raw stored value of a field (identifiers for reference fields)
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }

    /// All raw stored values
    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    /// Set a field's raw value, dropping any populated value it had
    pub fn set(&mut self, field: &str, value: impl Into<Value>) -> Result<()> {
        let immutable = self.field_def(field)?.immutable;
        if immutable && self.persisted && self.values.contains_key(field) {
            return Err(ModelError::ImmutableField {
                model: self.model_name().to_string(),
                field: field.to_string(),
            });
        }

        self.populated.remove(field);
        self.values.insert(field.to_string(), value.into());
        Ok(())
    }

    /// Remove a field's value
    pub fn unset(&mut self, field: &str) -> Result<Option<Value>> {
        let immutable = self.field_def(field)?.immutable;
        if immutable && self.persisted && self.values.contains_key(field) {
            return Err(ModelError::ImmutableField {
                model: self.model_name().to_string(),
                field: field.to_string(),
            });
        }

        self.populated.remove(field);
        Ok(self.values.shift_remove(field))
    }

    /// Attach expanded sub-documents to a reference field
    ///
    /// The raw value is rewritten to the sub-documents' identifiers, so stored
    /// and populated views never disagree.
    pub fn populate(&mut self, field: &str, value: Populated) -> Result<()> {
        let kind = self.field_def(field)?.kind.clone();

        let raw = match (&kind, &value) {
            (FieldKind::SingleReference(target), Populated::One(doc)) => {
                self.check_target(field, target, doc)?;
                doc.id().to_value()
            }
            (FieldKind::ReferenceArray(target), Populated::Many(docs)) => {
                for doc in docs {
                    self.check_target(field, target, doc)?;
                }
                Value::Array(docs.iter().map(|doc| doc.id().to_value()).collect())
            }
            (FieldKind::SingleReference(_), Populated::Many(_)) => {
                return Err(self.populate_error(field, "expected a single document"));
            }
            (FieldKind::ReferenceArray(_), Populated::One(_)) => {
                return Err(self.populate_error(field, "expected a list of documents"));
            }
            (FieldKind::Scalar | FieldKind::Other, _) => {
                return Err(ModelError::NotAReference {
                    model: self.model_name().to_string(),
                    field: field.to_string(),
                });
            }
        };

        self.values.insert(field.to_string(), raw);
        self.populated.insert(field.to_string(), value);
        Ok(())
    }

    /// Drop the populated value of a field, keeping its identifiers
    pub fn depopulate(&mut self, field: &str) -> Option<Populated> {
        self.populated.remove(field)
    }

    pub fn populated(&self, field: &str) -> Option<&Populated> {
        self.populated.get(field)
    }

    pub fn is_populated(&self, field: &str) -> bool {
        self.populated.contains_key(field)
    }

    /// Version history, oldest first
    pub fn versions(&self) -> Result<Vec<VersionSnapshot>> {
        versioning::snapshots(self)
    }

    /// Current version number (0 before the first versioned write)
    pub fn version(&self) -> u64 {
        self.values.get(audit::VERSION).and_then(Value::as_u64).unwrap_or(0)
    }

    /// JSON shape of the document
    ///
    /// Without `transform` this is the default shape: `_id` followed by the
    /// schema fields in declaration order. Populated references are emitted as
    /// the sub-document's own default shape, untransformed.
    pub fn to_json(&self, options: &ToJsonOptions) -> Result<Map<String, Value>> {
        if options.transform {
            return self.schema.output().apply(self);
        }

        let mut ret = Map::new();
        ret.insert(audit::ID.to_string(), self.id.to_value());

        for field in self.schema.fields() {
            if let Some(populated) = self.populated.get(&field.name) {
                ret.insert(field.name.clone(), populated.to_json(options)?);
                continue;
            }

            let Some(value) = self.values.get(&field.name) else {
                continue;
            };
            let value = match (&field.getter, options.getters) {
                (Some(getter), true) => getter(value),
                _ => value.clone(),
            };
            ret.insert(field.name.clone(), value);
        }

        if options.virtuals {
            for virtual_field in self.schema.virtuals() {
                ret.insert(virtual_field.name().to_string(), virtual_field.compute(self));
            }
        }

        Ok(ret)
    }

    /// Public JSON shape (custom transform, no version history, expanded references)
    pub fn to_public_json(&self) -> Result<Map<String, Value>> {
        self.schema.output().apply(self)
    }

    /// Find every document in the registry that references this one
    pub async fn find_links(&self, registry: &ModelRegistry, connections: &Connections) -> Result<Option<LinkMap>> {
        self.schema
            .link_resolver()
            .find_links(self, self.model_name(), registry, connections)
            .await
    }

    /// Run the pre-write hooks and persist through the model's connection
    pub async fn save(&mut self, connections: &Connections, ctx: &WriteContext) -> Result<()> {
        connections.save(self, ctx).await
    }

    /// Copy holding only stored values: no populated references, no history
    pub(crate) fn detached(&self) -> Document {
        let values = self
            .values
            .iter()
            .filter(|(key, _)| key.as_str() != audit::VERSIONS)
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        Document {
            schema: Arc::clone(&self.schema),
            id: self.id.clone(),
            values,
            populated: BTreeMap::new(),
            persisted: self.persisted,
        }
    }

    /// Write a bookkeeping value, bypassing immutability checks
    pub(crate) fn stamp(&mut self, field: &str, value: Value) {
        self.populated.remove(field);
        self.values.insert(field.to_string(), value);
    }

    pub(crate) fn mark_persisted(&mut self) {
        self.persisted = true;
    }

    fn field_def(&self, field: &str) -> Result<&FieldDef> {
        self.schema.field(field).ok_or_else(|| ModelError::UnknownField {
            model: self.model_name().to_string(),
            field: field.to_string(),
        })
    }

    fn check_target(&self, field: &str, target: &str, doc: &Document) -> Result<()> {
        if doc.model_name() == target {
            Ok(())
        } else {
            Err(self.populate_error(
                field,
                format!("expected a {} document, got {}", target, doc.model_name()),
            ))
        }
    }

    fn populate_error(&self, field: &str, reason: impl Into<String>) -> ModelError {
        ModelError::InvalidPopulate {
            model: self.model_name().to_string(),
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("model", &self.model_name())
            .field("id", &self.id)
            .field("values", &self.values)
            .field("populated", &self.populated.keys().collect::<Vec<_>>())
            .field("persisted", &self.persisted)
            .finish()
    }
}
