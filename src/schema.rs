//! Schema types and structures
//!
//! A [`Schema`] starts life as a `Schema<Unaugmented>` builder. The only way to
//! obtain a [`ModelSchema`] (`Schema<Augmented>`) is through
//! [`SchemaAugmenter::augment`](crate::augment::SchemaAugmenter::augment), which
//! consumes the builder, so a schema cannot be augmented twice.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::audit;
use crate::document::Document;
use crate::links::{LinkResolver, ReferencePath};
use crate::store::DEFAULT_CONNECTION;
use crate::transform::{PublicTransform, Transform};
use crate::versioning::{PreWriteHook, VersioningOptions};

// =============================================================================
// Field Types
// =============================================================================

/// Semantic type of a stored field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Number,
    Integer,
    Boolean,
    /// RFC 3339 timestamp
    Date,
    /// Identifier of another document
    ObjectId,
    Array,
    Object,
    Mixed,
}

impl FieldType {
    /// Parse a type name as it appears in model definitions ("String", "ObjectId", ...)
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "string" => Some(FieldType::String),
            "number" | "double" | "decimal" => Some(FieldType::Number),
            "integer" | "int" => Some(FieldType::Integer),
            "boolean" | "bool" => Some(FieldType::Boolean),
            "date" => Some(FieldType::Date),
            "objectid" | "object_id" | "id" => Some(FieldType::ObjectId),
            "array" => Some(FieldType::Array),
            "object" => Some(FieldType::Object),
            "mixed" | "any" => Some(FieldType::Mixed),
            _ => None,
        }
    }
}

/// What a field holds, as far as reference handling is concerned
///
/// Resolved once from the raw definition and cached on the schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "target", rename_all = "snake_case")]
pub enum FieldKind {
    /// Plain value
    Scalar,
    /// Identifier of one document of the target model
    SingleReference(String),
    /// Array of identifiers of documents of the target model
    ReferenceArray(String),
    /// Containers and anything not recognised as a reference
    Other,
}

impl FieldKind {
    /// Target model name for reference kinds
    pub fn target(&self) -> Option<&str> {
        match self {
            FieldKind::SingleReference(target) | FieldKind::ReferenceArray(target) => Some(target),
            FieldKind::Scalar | FieldKind::Other => None,
        }
    }

    pub fn is_reference(&self) -> bool {
        self.target().is_some()
    }

    /// Default kind for a field of the given type that carries no reference metadata
    pub fn for_type(field_type: FieldType) -> Self {
        match field_type {
            FieldType::Array | FieldType::Object | FieldType::Mixed => FieldKind::Other,
            _ => FieldKind::Scalar,
        }
    }

    /// Classify a raw field definition
    ///
    /// Recognised reference shapes:
    /// - `{ "type": "ObjectId", "ref": "user" }`
    /// - `[{ "type": "ObjectId", "ref": "user" }]`
    /// - `{ "type": [{ "type": "ObjectId", "ref": "user" }] }`
    ///
    /// Nested containers of references classify as [`FieldKind::Other`].
    pub fn classify(definition: &Value) -> (FieldType, FieldKind) {
        match definition {
            Value::String(name) => match FieldType::parse(name) {
                Some(field_type) => (field_type, FieldKind::for_type(field_type)),
                None => (FieldType::Mixed, FieldKind::Other),
            },
            Value::Array(items) => classify_array(items.first()),
            Value::Object(map) => {
                if let Some(target) = map.get("ref").and_then(Value::as_str) {
                    return (FieldType::ObjectId, FieldKind::SingleReference(target.to_string()));
                }
                match map.get("type") {
                    Some(Value::Array(items)) => classify_array(items.first()),
                    Some(Value::String(name)) => match FieldType::parse(name) {
                        Some(field_type) => (field_type, FieldKind::for_type(field_type)),
                        None => (FieldType::Mixed, FieldKind::Other),
                    },
                    Some(_) => (FieldType::Mixed, FieldKind::Other),
                    // No `type` key: an inline nested object
                    None => (FieldType::Object, FieldKind::Other),
                }
            }
            _ => (FieldType::Mixed, FieldKind::Other),
        }
    }
}

fn classify_array(element: Option<&Value>) -> (FieldType, FieldKind) {
    let kind = match element.map(FieldKind::classify) {
        Some((_, FieldKind::SingleReference(target))) => FieldKind::ReferenceArray(target),
        _ => FieldKind::Other,
    };
    (FieldType::Array, kind)
}

/// Default value generator for a field
#[derive(Debug, Clone, PartialEq, Default)]
pub enum FieldDefault {
    /// No value until one is set
    #[default]
    Absent,
    /// Current time, filled in at write time when the field is still unset
    Now,
    EmptyArray,
    Value(Value),
}

impl FieldDefault {
    /// Produce the default value, if any
    pub fn generate(&self) -> Option<Value> {
        match self {
            FieldDefault::Absent => None,
            FieldDefault::Now => Some(audit::now()),
            FieldDefault::EmptyArray => Some(Value::Array(Vec::new())),
            FieldDefault::Value(value) => Some(value.clone()),
        }
    }
}

/// Read-time value mapper applied when getters are enabled
pub type Getter = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// A single field definition
#[derive(Clone)]
pub struct FieldDef {
    pub name: String,
    pub field_type: FieldType,
    pub kind: FieldKind,
    pub default: FieldDefault,
    /// Reject writes once the document has been persisted with a value
    pub immutable: bool,
    pub getter: Option<Getter>,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, field_type: FieldType, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            field_type,
            kind,
            default: FieldDefault::Absent,
            immutable: false,
            getter: None,
        }
    }

    /// A non-reference field of the given type
    pub fn scalar(name: impl Into<String>, field_type: FieldType) -> Self {
        Self::new(name, field_type, FieldKind::for_type(field_type))
    }

    /// A field holding the identifier of one `target` document
    pub fn reference(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(name, FieldType::ObjectId, FieldKind::SingleReference(target.into()))
    }

    /// A field holding an array of `target` identifiers
    pub fn reference_array(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(name, FieldType::Array, FieldKind::ReferenceArray(target.into()))
    }

    /// Build a field from a raw model-file definition
    pub fn from_definition(name: impl Into<String>, definition: &Value) -> Self {
        let (field_type, kind) = FieldKind::classify(definition);
        let mut field = Self::new(name, field_type, kind);

        if let Some(options) = definition.as_object() {
            field.immutable = options.get("immutable").and_then(Value::as_bool).unwrap_or(false);
            field.default = match options.get("default") {
                None => FieldDefault::Absent,
                Some(Value::String(s)) if field_type == FieldType::Date && s == "now" => FieldDefault::Now,
                Some(value) => FieldDefault::Value(value.clone()),
            };
        }
        field
    }

    pub fn with_default(mut self, default: FieldDefault) -> Self {
        self.default = default;
        self
    }

    pub fn immutable(mut self) -> Self {
        self.immutable = true;
        self
    }

    pub fn with_getter(mut self, getter: impl Fn(&Value) -> Value + Send + Sync + 'static) -> Self {
        self.getter = Some(Arc::new(getter));
        self
    }

    pub fn is_reference(&self) -> bool {
        self.kind.is_reference()
    }
}

impl fmt::Debug for FieldDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDef")
            .field("name", &self.name)
            .field("field_type", &self.field_type)
            .field("kind", &self.kind)
            .field("default", &self.default)
            .field("immutable", &self.immutable)
            .field("getter", &self.getter.is_some())
            .finish()
    }
}

/// Computed field emitted only when virtuals are enabled
pub type VirtualFn = Arc<dyn Fn(&Document) -> Value + Send + Sync>;

#[derive(Clone)]
pub struct VirtualField {
    name: String,
    compute: VirtualFn,
}

impl VirtualField {
    pub fn new(name: impl Into<String>, compute: impl Fn(&Document) -> Value + Send + Sync + 'static) -> Self {
        Self {
            name: name.into(),
            compute: Arc::new(compute),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn compute(&self, doc: &Document) -> Value {
        (self.compute)(doc)
    }
}

impl fmt::Debug for VirtualField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("VirtualField").field(&self.name).finish()
    }
}

// =============================================================================
// Schema Options
// =============================================================================

/// Per-schema options, as written in model definitions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaOptions {
    /// Skip version snapshots for this model
    #[serde(default)]
    pub versions_disabled: bool,

    /// Maximum retained snapshots (falls back to the configured default)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_count: Option<usize>,

    /// Named connection holding this model's documents
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<String>,

    /// Emit virtual fields in the public shape
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub virtuals: Option<bool>,

    /// Apply field getters in the public shape
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub getters: Option<bool>,
}

// =============================================================================
// Schema
// =============================================================================

/// Builder state: fields can still be added
#[derive(Debug, Clone, Copy, Default)]
pub struct Unaugmented;

/// State produced by the augmenter
#[derive(Clone)]
pub struct Augmented {
    pub(crate) model: String,
    /// Every reference field, audit fields included
    pub(crate) references: Arc<[ReferencePath]>,
    /// Reference fields considered by link resolution
    pub(crate) link_paths: Arc<[ReferencePath]>,
    pub(crate) versioning: VersioningOptions,
    pub(crate) output: PublicTransform,
    pub(crate) links: LinkResolver,
}

impl fmt::Debug for Augmented {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Augmented")
            .field("model", &self.model)
            .field("references", &self.references)
            .field("versioning", &self.versioning)
            .field("links", &self.links)
            .finish()
    }
}

/// A schema that has been through the augmenter
pub type ModelSchema = Schema<Augmented>;

/// An ordered collection of field definitions plus the hooks attached to them
#[derive(Clone)]
pub struct Schema<S = Unaugmented> {
    pub(crate) fields: Vec<FieldDef>,
    pub(crate) virtuals: Vec<VirtualField>,
    pub(crate) options: SchemaOptions,
    pub(crate) transform: Option<Arc<dyn Transform>>,
    pub(crate) hooks: Vec<Arc<dyn PreWriteHook>>,
    pub(crate) state: S,
}

impl<S> Schema<S> {
    /// Field definitions in declaration order
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    /// Look up a field by name
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn virtuals(&self) -> &[VirtualField] {
        &self.virtuals
    }

    pub fn options(&self) -> &SchemaOptions {
        &self.options
    }

    /// Pre-write hooks in execution order
    pub fn hooks(&self) -> &[Arc<dyn PreWriteHook>] {
        &self.hooks
    }
}

impl Schema<Unaugmented> {
    pub fn new() -> Self {
        Self {
            fields: Vec::new(),
            virtuals: Vec::new(),
            options: SchemaOptions::default(),
            transform: None,
            hooks: Vec::new(),
            state: Unaugmented,
        }
    }

    pub fn with_field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_virtual(
        mut self,
        name: impl Into<String>,
        compute: impl Fn(&Document) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.virtuals.push(VirtualField::new(name, compute));
        self
    }

    /// Declare a custom output transform
    pub fn with_transform(mut self, transform: impl Transform + 'static) -> Self {
        self.transform = Some(Arc::new(transform));
        self
    }

    pub fn with_hook(mut self, hook: impl PreWriteHook + 'static) -> Self {
        self.hooks.push(Arc::new(hook));
        self
    }

    pub fn with_options(mut self, options: SchemaOptions) -> Self {
        self.options = options;
        self
    }

    pub fn add_field(&mut self, field: FieldDef) {
        self.fields.push(field);
    }

    pub fn options_mut(&mut self) -> &mut SchemaOptions {
        &mut self.options
    }

    /// The custom output transform declared on this schema, if any
    pub fn custom_transform(&self) -> Option<&Arc<dyn Transform>> {
        self.transform.as_ref()
    }
}

impl Default for Schema<Unaugmented> {
    fn default() -> Self {
        Self::new()
    }
}

impl Schema<Augmented> {
    /// Name the schema was registered under
    pub fn model_name(&self) -> &str {
        &self.state.model
    }

    /// All reference fields, audit fields included
    pub fn references(&self) -> &[ReferencePath] {
        &self.state.references
    }

    /// Reference fields consulted when resolving inbound links
    pub fn link_paths(&self) -> &[ReferencePath] {
        &self.state.link_paths
    }

    pub fn versioning(&self) -> VersioningOptions {
        self.state.versioning
    }

    /// Composed public JSON transform
    pub fn output(&self) -> &PublicTransform {
        &self.state.output
    }

    pub fn link_resolver(&self) -> &LinkResolver {
        &self.state.links
    }

    /// The custom transform wrapped by the public transform, if any
    pub fn custom_transform(&self) -> Option<&Arc<dyn Transform>> {
        self.state.output.custom()
    }

    /// Connection name holding this model's documents
    pub fn connection(&self) -> &str {
        self.options.connection.as_deref().unwrap_or(DEFAULT_CONNECTION)
    }
}

impl<S: fmt::Debug> fmt::Debug for Schema<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hooks: Vec<&str> = self.hooks.iter().map(|h| h.name()).collect();
        f.debug_struct("Schema")
            .field("fields", &self.fields)
            .field("virtuals", &self.virtuals)
            .field("options", &self.options)
            .field("custom_transform", &self.transform.is_some())
            .field("hooks", &hooks)
            .field("state", &self.state)
            .finish()
    }
}
