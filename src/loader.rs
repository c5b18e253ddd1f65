//! Model definition loading
//!
//! Reads model definitions from JSON files:
//!
//! ```json
//! {
//!   "model": "post",
//!   "fields": {
//!     "title": "String",
//!     "author": { "type": "ObjectId", "ref": "user" },
//!     "tags": [{ "type": "ObjectId", "ref": "tag" }]
//!   },
//!   "options": { "versionCount": 20 }
//! }
//! ```
//!
//! The model name defaults to the file stem.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use walkdir::WalkDir;

use crate::error::{ModelError, Result};
use crate::registry::ModelRegistry;
use crate::schema::{FieldDef, Schema, SchemaOptions};

/// A parsed model definition, ready to register
#[derive(Debug)]
pub struct ModelDefinition {
    pub name: String,
    /// Source file, when loaded from disk
    pub path: Option<PathBuf>,
    pub schema: Schema,
}

/// Parse one definition, using `fallback_name` when it does not name its model
pub fn parse_definition(definition: &Value, fallback_name: &str) -> Result<ModelDefinition> {
    let name = definition
        .get("model")
        .and_then(Value::as_str)
        .unwrap_or(fallback_name)
        .to_string();

    let invalid = |reason: &str| ModelError::InvalidSchema {
        model: name.clone(),
        reason: reason.to_string(),
    };

    let root = definition
        .as_object()
        .ok_or_else(|| invalid("definition is not an object"))?;

    let mut schema = Schema::new();
    match root.get("fields") {
        None => {}
        Some(Value::Object(fields)) => {
            for (field_name, field) in fields {
                schema.add_field(FieldDef::from_definition(field_name.as_str(), field));
            }
        }
        Some(_) => return Err(invalid("`fields` is not an object")),
    }

    if let Some(options) = root.get("options") {
        *schema.options_mut() = serde_json::from_value::<SchemaOptions>(options.clone())?;
    }

    Ok(ModelDefinition {
        name,
        path: None,
        schema,
    })
}

/// Load every `*.json` definition under `dir`, in file name order
pub fn load_from_directory(dir: &Path) -> Result<Vec<ModelDefinition>> {
    let mut definitions = Vec::new();

    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(std::io::Error::from)?;
        let path = entry.path();
        if !entry.file_type().is_file() || path.extension().map(|e| e != "json").unwrap_or(true) {
            continue;
        }

        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
        let content = fs::read_to_string(path)?;
        let value: Value = serde_json::from_str(&content)?;

        let mut definition = parse_definition(&value, stem)?;
        definition.path = Some(path.to_path_buf());
        tracing::debug!(model = %definition.name, path = %path.display(), "loaded model definition");
        definitions.push(definition);
    }

    Ok(definitions)
}

/// Load every definition under `dir` into `registry`
///
/// A definition naming an already registered model is skipped; the first one wins.
pub fn register_directory(registry: &mut ModelRegistry, dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for definition in load_from_directory(dir)? {
        match registry.register(&definition.name, definition.schema) {
            Ok(_) => names.push(definition.name),
            Err(ModelError::AlreadyRegistered { .. }) => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(names)
}
