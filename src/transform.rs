//! Public JSON shape of documents
//!
//! The augmenter captures any custom transform declared on a schema inside a
//! [`PublicTransform`]. Applying it delegates to the captured transform first,
//! then strips the version history and re-serializes populated references
//! through their own public shape.

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::audit;
use crate::document::{Document, Populated, ToJsonOptions};
use crate::error::Result;
use crate::links::ReferencePath;

/// Custom output transform declared on a schema
///
/// Receives the document and its default shape, returns the shape to publish.
pub trait Transform: Send + Sync {
    fn transform(&self, doc: &Document, ret: Map<String, Value>) -> Result<Map<String, Value>>;
}

impl<F> Transform for F
where
    F: Fn(&Document, Map<String, Value>) -> Result<Map<String, Value>> + Send + Sync,
{
    fn transform(&self, doc: &Document, ret: Map<String, Value>) -> Result<Map<String, Value>> {
        self(doc, ret)
    }
}

/// Composed output transform installed on every augmented schema
#[derive(Clone)]
pub struct PublicTransform {
    custom: Option<Arc<dyn Transform>>,
    references: Arc<[ReferencePath]>,
    shape: ToJsonOptions,
}

impl PublicTransform {
    pub(crate) fn new(
        custom: Option<Arc<dyn Transform>>,
        references: Arc<[ReferencePath]>,
        virtuals: bool,
        getters: bool,
    ) -> Self {
        Self {
            custom,
            references,
            // The default shape must never re-enter this transform
            shape: ToJsonOptions {
                virtuals,
                getters,
                transform: false,
            },
        }
    }

    /// The wrapped custom transform, if the schema declared one
    pub fn custom(&self) -> Option<&Arc<dyn Transform>> {
        self.custom.as_ref()
    }

    /// Options used to build the default shape
    pub fn shape(&self) -> ToJsonOptions {
        self.shape
    }

    /// Produce the public shape of `doc`
    pub fn apply(&self, doc: &Document) -> Result<Map<String, Value>> {
        // Populated sub-documents are not transformed by the default shape
        let mut expanded = Vec::new();
        for reference in self.references.iter() {
            let value = match doc.populated(&reference.path) {
                Some(Populated::One(sub)) => Value::Object(sub.to_public_json()?),
                Some(Populated::Many(subs)) => Value::Array(
                    subs.iter()
                        .map(|sub| sub.to_public_json().map(Value::Object))
                        .collect::<Result<Vec<_>>>()?,
                ),
                None => continue,
            };
            expanded.push((reference.path.as_str(), value));
        }

        let mut base = doc.to_json(&self.shape)?;
        for (path, value) in &expanded {
            base.insert(path.to_string(), value.clone());
        }

        let mut ret = match &self.custom {
            Some(custom) => custom.transform(doc, base)?,
            None => base,
        };

        ret.shift_remove(audit::VERSIONS);

        // A custom transform may have replaced the value but keeps the key
        for (path, value) in expanded {
            if let Some(slot) = ret.get_mut(path) {
                *slot = value;
            }
        }

        Ok(ret)
    }
}

impl fmt::Debug for PublicTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicTransform")
            .field("custom", &self.custom.is_some())
            .field("references", &self.references)
            .field("shape", &self.shape)
            .finish()
    }
}
