//! Familiar Document Models
//!
//! Augments document schemas with audit metadata, bounded version history and
//! reverse-reference ("links") resolution for the Familiar platform.
//!
//! ## Features
//!
//! - **Audit Fields**: `_created_at`, `_created_by`, `_updated_at`, `_updated_by` on every model
//! - **Version History**: A bounded snapshot of the stored values is captured before every write
//! - **Public Shape**: Custom transforms are composed, history is stripped, populated references are re-serialized
//! - **Links**: Find every document of every model that references a given document
//!
//! ## Architecture
//!
//! ```text
//! Schema<Unaugmented> ──SchemaAugmenter──▶ ModelSchema ──▶ ModelRegistry
//!                                              │
//!                      ┌───────────────────────┼────────────────────┐
//!                      ▼                       ▼                    ▼
//!            VersionSnapshotEngine      PublicTransform        LinkResolver
//!              (pre-write hook)        (to_public_json)   (fan-out over Connections)
//! ```

pub mod audit;
pub mod augment;
pub mod config;
pub mod document;
pub mod error;
pub mod links;
pub mod loader;
pub mod registry;
pub mod schema;
pub mod store;
pub mod transform;
pub mod versioning;

pub use augment::{AugmentConfig, SchemaAugmenter};
pub use config::ModelsConfig;
pub use document::{Document, DocumentId, Populated, ToJsonOptions};
pub use error::{ModelError, Result};
pub use links::{FanOutPolicy, LinkMap, LinkQuery, LinkResolver, ReferencePath};
pub use registry::{ModelRegistry, SchemaModifier};
pub use schema::{FieldDef, FieldDefault, FieldKind, FieldType, ModelSchema, Schema, SchemaOptions};
pub use store::{Connections, DocumentStore, Filter, MemoryStore};
pub use transform::{PublicTransform, Transform};
pub use versioning::{PreWriteHook, VersionSnapshot, VersionSnapshotEngine, WriteContext};
