//! Audit fields injected into every model

use chrono::{SecondsFormat, Utc};
use serde_json::Value;

use crate::schema::{FieldDef, FieldDefault, FieldKind, FieldType};

/// Document identifier key in every JSON shape
pub const ID: &str = "_id";
pub const CREATED_AT: &str = "_created_at";
pub const CREATED_BY: &str = "_created_by";
pub const UPDATED_AT: &str = "_updated_at";
pub const UPDATED_BY: &str = "_updated_by";
/// Version history, never part of the public shape
pub const VERSIONS: &str = "_versions";
/// Current version number
pub const VERSION: &str = "_version";

/// Names of all injected fields
pub const AUDIT_FIELDS: [&str; 6] = [CREATED_AT, CREATED_BY, UPDATED_AT, UPDATED_BY, VERSIONS, VERSION];

pub fn is_audit_field(name: &str) -> bool {
    AUDIT_FIELDS.contains(&name)
}

/// Field definitions appended by the augmenter
pub fn audit_fields(user_model: &str) -> Vec<FieldDef> {
    vec![
        FieldDef::scalar(CREATED_AT, FieldType::Date)
            .with_default(FieldDefault::Now)
            .immutable(),
        FieldDef::reference(CREATED_BY, user_model),
        FieldDef::scalar(UPDATED_AT, FieldType::Date).with_default(FieldDefault::Now),
        FieldDef::reference(UPDATED_BY, user_model),
        FieldDef::new(VERSIONS, FieldType::Array, FieldKind::Other).with_default(FieldDefault::EmptyArray),
        FieldDef::scalar(VERSION, FieldType::Integer),
    ]
}

/// Current time as stored in timestamp fields
pub fn now() -> Value {
    Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true))
}
