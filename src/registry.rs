//! Model Registry
//!
//! Owns every augmented schema by model name. Registration runs the schema
//! modifiers, augments the result, and refuses to replace an existing model.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::augment::SchemaAugmenter;
use crate::config::ModelsConfig;
use crate::error::{ModelError, Result};
use crate::schema::{ModelSchema, Schema, Unaugmented};

/// Hook that may adjust a schema before it is augmented
pub trait SchemaModifier: Send + Sync {
    fn modify_schema(&self, model_name: &str, schema: &mut Schema<Unaugmented>);
}

impl<F> SchemaModifier for F
where
    F: Fn(&str, &mut Schema<Unaugmented>) + Send + Sync,
{
    fn modify_schema(&self, model_name: &str, schema: &mut Schema<Unaugmented>) {
        self(model_name, schema)
    }
}

/// The model registry
pub struct ModelRegistry {
    augmenter: SchemaAugmenter,
    modifiers: Vec<Arc<dyn SchemaModifier>>,
    /// Augmented schemas, ordered by model name
    models: BTreeMap<String, Arc<ModelSchema>>,
}

impl ModelRegistry {
    pub fn new(augmenter: SchemaAugmenter) -> Self {
        Self {
            augmenter,
            modifiers: Vec::new(),
            models: BTreeMap::new(),
        }
    }

    /// Registry using the augmentation defaults from `config`
    pub fn from_config(config: &ModelsConfig) -> Self {
        Self::new(SchemaAugmenter::new(config.augment_config()))
    }

    /// Add a modifier run on every schema registered afterwards
    pub fn with_modifier(mut self, modifier: impl SchemaModifier + 'static) -> Self {
        self.modifiers.push(Arc::new(modifier));
        self
    }

    pub fn augmenter(&self) -> &SchemaAugmenter {
        &self.augmenter
    }

    /// Augment and register a schema under `name`
    ///
    /// Registering a name twice is an error; the first registration stays.
    pub fn register(&mut self, name: &str, mut schema: Schema<Unaugmented>) -> Result<Arc<ModelSchema>> {
        if self.models.contains_key(name) {
            tracing::error!(model = name, "model already registered, keeping existing schema");
            return Err(ModelError::AlreadyRegistered {
                name: name.to_string(),
            });
        }

        for modifier in &self.modifiers {
            modifier.modify_schema(name, &mut schema);
        }

        let model = Arc::new(self.augmenter.augment(name, schema)?);
        self.models.insert(name.to_string(), Arc::clone(&model));

        tracing::debug!(model = name, total = self.models.len(), "registered model");
        Ok(model)
    }

    /// Get a registered schema by model name
    pub fn get_schema(&self, name: &str) -> Result<Arc<ModelSchema>> {
        self.models.get(name).cloned().ok_or_else(|| ModelError::NotFound {
            name: name.to_string(),
        })
    }

    /// All registered schemas, sorted by model name
    pub fn list_schemas(&self) -> impl Iterator<Item = (&str, &Arc<ModelSchema>)> {
        self.models.iter().map(|(name, schema)| (name.as_str(), schema))
    }

    pub fn model_names(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.models.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new(SchemaAugmenter::default())
    }
}

impl fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("augmenter", &self.augmenter)
            .field("modifiers", &self.modifiers.len())
            .field("models", &self.models.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldDef, FieldType};

    fn user() -> Schema {
        Schema::new().with_field(FieldDef::scalar("name", FieldType::String))
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = ModelRegistry::default();
        registry.register("user", user()).unwrap();
        registry.register("account", user()).unwrap();

        assert_eq!(registry.len(), 2);
        assert!(registry.contains("user"));
        assert_eq!(registry.model_names().collect::<Vec<_>>(), vec!["account", "user"]);
        assert_eq!(registry.get_schema("user").unwrap().model_name(), "user");
    }

    #[test]
    fn test_duplicate_registration_keeps_first() {
        let mut registry = ModelRegistry::default();
        let first = registry.register("user", user()).unwrap();

        let second = Schema::new().with_field(FieldDef::scalar("email", FieldType::String));
        let err = registry.register("user", second).unwrap_err();
        assert!(matches!(err, ModelError::AlreadyRegistered { .. }));

        let kept = registry.get_schema("user").unwrap();
        assert!(Arc::ptr_eq(&first, &kept));
        assert!(kept.field("email").is_none());
    }

    #[test]
    fn test_unknown_model() {
        let registry = ModelRegistry::default();
        let err = registry.get_schema("ghost").unwrap_err();
        assert!(err.is_not_found());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_modifiers_run_before_augmentation() {
        let mut registry = ModelRegistry::default().with_modifier(|name: &str, schema: &mut Schema| {
            if name == "user" {
                schema.add_field(FieldDef::scalar("locale", FieldType::String));
            }
        });
        registry.register("user", user()).unwrap();
        registry.register("team", Schema::new()).unwrap();

        assert!(registry.get_schema("user").unwrap().field("locale").is_some());
        assert!(registry.get_schema("team").unwrap().field("locale").is_none());
    }
}
