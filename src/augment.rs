//! Schema augmentation
//!
//! [`SchemaAugmenter::augment`] turns a plain schema into a [`ModelSchema`]:
//! audit fields are appended, the version snapshot hook is installed last, the
//! custom output transform is wrapped, and the link resolver is attached.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::audit;
use crate::error::{ModelError, Result};
use crate::links::{FanOutPolicy, LinkResolver, ReferencePath};
use crate::schema::{Augmented, ModelSchema, Schema, Unaugmented};
use crate::transform::PublicTransform;
use crate::versioning::{VersionSnapshotEngine, VersioningOptions, DEFAULT_VERSION_COUNT};

/// Defaults applied to every schema the augmenter sees
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AugmentConfig {
    /// Model referenced by `_created_by` and `_updated_by`
    pub user_model: String,
    /// Snapshot bound for schemas that do not set `versionCount`
    pub version_count: usize,
    /// Versioning for schemas that do not disable it themselves
    pub versions_enabled: bool,
    pub virtuals: bool,
    pub getters: bool,
    pub link_policy: FanOutPolicy,
    /// Let `_created_by`/`_updated_by` count as inbound links
    pub audit_links: bool,
}

impl Default for AugmentConfig {
    fn default() -> Self {
        Self {
            user_model: "user".to_string(),
            version_count: DEFAULT_VERSION_COUNT,
            versions_enabled: true,
            virtuals: true,
            getters: true,
            link_policy: FanOutPolicy::default(),
            audit_links: false,
        }
    }
}

/// Builds model schemas from plain ones
#[derive(Debug, Clone, Default)]
pub struct SchemaAugmenter {
    config: AugmentConfig,
}

impl SchemaAugmenter {
    pub fn new(config: AugmentConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AugmentConfig {
        &self.config
    }

    /// Augment `schema` for the model `model_name`
    ///
    /// Fails when the schema declares a field named like an audit field or
    /// `_id`, declares the same name twice, or asks for a zero-sized history.
    pub fn augment(&self, model_name: &str, schema: Schema<Unaugmented>) -> Result<ModelSchema> {
        let Schema {
            mut fields,
            virtuals,
            options,
            transform,
            mut hooks,
            state: Unaugmented,
        } = schema;

        let invalid = |reason: String| ModelError::InvalidSchema {
            model: model_name.to_string(),
            reason,
        };

        if model_name.is_empty() {
            return Err(invalid("model name is empty".to_string()));
        }

        let mut seen = HashSet::new();
        let names = fields
            .iter()
            .map(|f| f.name.as_str())
            .chain(virtuals.iter().map(|v| v.name()));
        for name in names {
            if name.is_empty() {
                return Err(invalid("field name is empty".to_string()));
            }
            if name == audit::ID || audit::is_audit_field(name) {
                return Err(invalid(format!("`{}` is a reserved field name", name)));
            }
            if !seen.insert(name) {
                return Err(invalid(format!("field `{}` is declared twice", name)));
            }
        }

        let max_versions = options.version_count.unwrap_or(self.config.version_count);
        if max_versions == 0 {
            return Err(invalid("versionCount must be at least 1".to_string()));
        }
        let versioning = VersioningOptions {
            disabled: options.versions_disabled || !self.config.versions_enabled,
            max_versions,
        };

        fields.extend(audit::audit_fields(&self.config.user_model));

        let references: Arc<[ReferencePath]> = fields.iter().filter_map(ReferencePath::from_field).collect();
        let link_paths: Arc<[ReferencePath]> = references
            .iter()
            .filter(|reference| self.config.audit_links || !audit::is_audit_field(&reference.path))
            .cloned()
            .collect();

        let output = PublicTransform::new(
            transform.clone(),
            Arc::clone(&references),
            options.virtuals.unwrap_or(self.config.virtuals),
            options.getters.unwrap_or(self.config.getters),
        );

        // Snapshots must see every change made by earlier hooks
        hooks.push(Arc::new(VersionSnapshotEngine::new(versioning)));

        tracing::debug!(
            model = model_name,
            fields = fields.len(),
            references = references.len(),
            versions = !versioning.disabled,
            max_versions,
            "augmented schema"
        );

        Ok(Schema {
            fields,
            virtuals,
            options,
            transform,
            hooks,
            state: Augmented {
                model: model_name.to_string(),
                references,
                link_paths,
                versioning,
                output,
                links: LinkResolver::new(self.config.link_policy),
            },
        })
    }
}
