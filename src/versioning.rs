//! Version snapshots captured before every write
//!
//! [`VersionSnapshotEngine`] is installed as the last pre-write hook of every
//! augmented schema. It refreshes audit timestamps and appends a snapshot of
//! the stored values to the document's bounded history.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::audit;
use crate::document::{Document, DocumentId, ToJsonOptions};
use crate::error::{ModelError, Result};
use crate::schema::FieldDefault;

/// Default number of retained snapshots
pub const DEFAULT_VERSION_COUNT: usize = 100;

/// Hook run on a document immediately before it is persisted
///
/// Returning an error aborts the write.
pub trait PreWriteHook: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    fn before_write(&self, doc: &mut Document, ctx: &WriteContext) -> Result<()>;
}

/// Who is performing a write
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteContext {
    pub actor: Option<DocumentId>,
}

impl WriteContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context for a write performed by the given user
    pub fn by(actor: impl Into<DocumentId>) -> Self {
        Self {
            actor: Some(actor.into()),
        }
    }
}

/// Resolved versioning settings for one schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersioningOptions {
    pub disabled: bool,
    pub max_versions: usize,
}

impl Default for VersioningOptions {
    fn default() -> Self {
        Self {
            disabled: false,
            max_versions: DEFAULT_VERSION_COUNT,
        }
    }
}

/// One entry of a document's version history
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VersionSnapshot {
    pub version: u64,
    /// Stored values at the time of the write, references as identifiers
    pub values: Map<String, Value>,
}

impl VersionSnapshot {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }
}

/// Parse a document's history into typed snapshots
pub(crate) fn snapshots(doc: &Document) -> Result<Vec<VersionSnapshot>> {
    history(doc)?.iter().map(|entry| parse_entry(doc, entry)).collect()
}

fn history(doc: &Document) -> Result<&[Value]> {
    match doc.get(audit::VERSIONS) {
        None | Some(Value::Null) => Ok(&[][..]),
        Some(Value::Array(entries)) => Ok(entries.as_slice()),
        Some(_) => Err(snapshot_error(doc, "version history is not an array")),
    }
}

fn parse_entry(doc: &Document, entry: &Value) -> Result<VersionSnapshot> {
    let values = entry
        .as_object()
        .ok_or_else(|| snapshot_error(doc, "version entry is not an object"))?;
    let version = values
        .get(audit::VERSION)
        .and_then(Value::as_u64)
        .ok_or_else(|| snapshot_error(doc, "version entry has no version number"))?;

    let mut values = values.clone();
    values.shift_remove(audit::VERSION);
    Ok(VersionSnapshot { version, values })
}

fn snapshot_error(doc: &Document, reason: &str) -> ModelError {
    ModelError::Snapshot {
        model: doc.model_name().to_string(),
        id: doc.id().to_string(),
        reason: reason.to_string(),
    }
}

/// Pre-write hook maintaining audit timestamps and version history
#[derive(Debug, Clone, Copy, Default)]
pub struct VersionSnapshotEngine {
    options: VersioningOptions,
}

impl VersionSnapshotEngine {
    pub fn new(options: VersioningOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> VersioningOptions {
        self.options
    }

    /// Compute the history after this write without touching the document
    ///
    /// `staged` is the detached, already stamped copy the snapshot is taken from.
    fn next_history(&self, doc: &Document, staged: &Document) -> Result<(u64, Vec<Value>)> {
        let history = history(doc)?;
        let previous = match history.last() {
            Some(entry) => parse_entry(doc, entry)?.version,
            None => 0,
        };

        let mut snapshot = staged.to_json(&ToJsonOptions::RAW)?;
        snapshot.shift_remove(audit::VERSIONS);
        for reference in doc.schema().references() {
            if let Some(value) = snapshot.get_mut(&reference.path) {
                *value = match value.take() {
                    Value::Array(items) if reference.many => {
                        Value::Array(items.into_iter().map(reference_id).collect())
                    }
                    other => reference_id(other),
                };
            }
        }
        let version = previous + 1;
        snapshot.insert(audit::VERSION.to_string(), Value::from(version));

        // Oldest entries go first once the bound is exceeded
        let evicted = (history.len() + 1).saturating_sub(self.options.max_versions);
        let mut next = Vec::with_capacity(history.len() + 1 - evicted);
        next.extend(history.iter().skip(evicted).cloned());
        next.push(Value::Object(snapshot));

        Ok((version, next))
    }
}

impl PreWriteHook for VersionSnapshotEngine {
    fn name(&self) -> &str {
        "versions"
    }

    fn before_write(&self, doc: &mut Document, ctx: &WriteContext) -> Result<()> {
        let now = audit::now();

        let next = if self.options.disabled {
            None
        } else {
            let mut staged = doc.detached();
            stamp(&mut staged, &now, ctx);
            Some(self.next_history(doc, &staged)?)
        };

        stamp(doc, &now, ctx);

        if let Some((version, history)) = next {
            tracing::trace!(
                model = doc.model_name(),
                id = %doc.id(),
                version,
                retained = history.len(),
                "captured version snapshot"
            );
            doc.stamp(audit::VERSIONS, Value::Array(history));
            doc.stamp(audit::VERSION, Value::from(version));
        }

        Ok(())
    }
}

/// Reduce an embedded document to its identifier
fn reference_id(value: Value) -> Value {
    match value {
        Value::Object(mut embedded) => embedded.shift_remove(audit::ID).unwrap_or(Value::Null),
        other => other,
    }
}

/// Apply write-time audit values
fn stamp(doc: &mut Document, now: &Value, ctx: &WriteContext) {
    let schema = Arc::clone(doc.schema());
    for field in schema.fields() {
        if matches!(field.default, FieldDefault::Now) && doc.get(&field.name).is_none() {
            doc.stamp(&field.name, now.clone());
        }
    }
    doc.stamp(audit::UPDATED_AT, now.clone());

    if let Some(actor) = &ctx.actor {
        if doc.is_new() && doc.get(audit::CREATED_BY).is_none() {
            doc.stamp(audit::CREATED_BY, actor.to_value());
        }
        doc.stamp(audit::UPDATED_BY, actor.to_value());
    }
}
