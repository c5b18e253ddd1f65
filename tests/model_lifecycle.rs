//! End-to-end behaviour of augmented models: writes, history, public shape and links

use std::sync::Arc;

use async_trait::async_trait;
use familiar_models::audit;
use familiar_models::{
    AugmentConfig, Connections, Document, DocumentId, DocumentStore, FanOutPolicy, FieldDef, FieldType, Filter,
    MemoryStore, ModelError, ModelRegistry, Result, Schema, SchemaAugmenter, SchemaOptions, WriteContext,
};
use serde_json::{json, Map, Value};

fn registry_with(config: AugmentConfig) -> ModelRegistry {
    let mut registry = ModelRegistry::new(SchemaAugmenter::new(config));
    registry
        .register("user", Schema::new().with_field(FieldDef::scalar("name", FieldType::String)))
        .unwrap();
    registry
        .register(
            "post",
            Schema::new()
                .with_field(FieldDef::scalar("title", FieldType::String))
                .with_field(FieldDef::reference("author", "user"))
                .with_options(SchemaOptions {
                    version_count: Some(3),
                    ..SchemaOptions::default()
                }),
        )
        .unwrap();
    registry
        .register(
            "comment",
            Schema::new()
                .with_field(FieldDef::scalar("body", FieldType::String))
                .with_field(FieldDef::reference_array("authors", "user")),
        )
        .unwrap();
    registry
}

fn registry() -> ModelRegistry {
    registry_with(AugmentConfig::default())
}

async fn save_new(
    registry: &ModelRegistry,
    connections: &Connections,
    model: &str,
    id: &str,
    values: Value,
) -> Document {
    let schema = registry.get_schema(model).unwrap();
    let mut doc = Document::with_id(&schema, DocumentId::from(id));
    for (field, value) in values.as_object().unwrap() {
        doc.set(field, value.clone()).unwrap();
    }
    doc.save(connections, &WriteContext::new()).await.unwrap();
    doc
}

/// Store that fails every query against one model
struct FailingStore {
    inner: Arc<MemoryStore>,
    model: &'static str,
    error: fn(&str) -> ModelError,
}

#[async_trait]
impl DocumentStore for FailingStore {
    async fn find_ids(&self, model: &str, filter: &Filter) -> Result<Vec<DocumentId>> {
        if model == self.model {
            return Err((self.error)(model));
        }
        self.inner.find_ids(model, filter).await
    }

    async fn load(&self, model: &str, id: &DocumentId) -> Result<Option<Map<String, Value>>> {
        self.inner.load(model, id).await
    }

    async fn persist(&self, model: &str, id: &DocumentId, values: Map<String, Value>) -> Result<()> {
        self.inner.persist(model, id, values).await
    }
}

fn query_error(model: &str) -> ModelError {
    ModelError::Query {
        model: model.to_string(),
        reason: "connection reset".to_string(),
    }
}

fn missing_model(model: &str) -> ModelError {
    ModelError::NotFound {
        name: model.to_string(),
    }
}

// =============================================================================
// Version history
// =============================================================================

#[tokio::test]
async fn test_history_length_and_numbering() {
    let registry = registry();
    let store = Arc::new(MemoryStore::new());
    let connections = Connections::single(store.clone());

    let mut doc = save_new(&registry, &connections, "comment", "c1", json!({ "body": "v1" })).await;
    for i in 2..=5 {
        doc.set("body", format!("v{}", i)).unwrap();
        doc.save(&connections, &WriteContext::new()).await.unwrap();
    }

    let versions = doc.versions().unwrap();
    assert_eq!(versions.len(), 5);
    let numbers: Vec<u64> = versions.iter().map(|v| v.version).collect();
    assert_eq!(numbers, vec![1, 2, 3, 4, 5]);
    assert_eq!(versions[4].get("body"), Some(&json!("v5")));
    assert!(versions.iter().all(|v| v.get(audit::VERSIONS).is_none()));

    // Persisted copy carries the same history
    let stored = connections
        .find_by_id(&registry, "comment", &DocumentId::from("c1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.versions().unwrap().len(), 5);
    assert_eq!(stored.version(), 5);
    assert_eq!(store.count("comment"), 1);
}

#[tokio::test]
async fn test_oldest_snapshot_evicted_first() {
    let registry = registry();
    let connections = Connections::single(Arc::new(MemoryStore::new()));

    let mut doc = save_new(&registry, &connections, "post", "p1", json!({ "title": "t1" })).await;
    for i in 2..=4 {
        doc.set("title", format!("t{}", i)).unwrap();
        doc.save(&connections, &WriteContext::new()).await.unwrap();
        assert!(doc.versions().unwrap().len() <= 3);
    }

    let versions = doc.versions().unwrap();
    let numbers: Vec<u64> = versions.iter().map(|v| v.version).collect();
    assert_eq!(numbers, vec![2, 3, 4]);
    assert_eq!(versions[0].get("title"), Some(&json!("t2")));
}

#[tokio::test]
async fn test_history_stores_reference_ids_not_subdocuments() {
    let registry = registry();
    let connections = Connections::single(Arc::new(MemoryStore::new()));

    save_new(&registry, &connections, "user", "u1", json!({ "name": "Ada" })).await;
    let mut post = save_new(&registry, &connections, "post", "p1", json!({ "title": "Hello", "author": "u1" })).await;

    connections.populate(&registry, &mut post, "author").await.unwrap();
    assert!(post.is_populated("author"));
    post.set("title", "Hello again").unwrap();
    connections.populate(&registry, &mut post, "author").await.unwrap();
    post.save(&connections, &WriteContext::new()).await.unwrap();

    for snapshot in post.versions().unwrap() {
        assert_eq!(snapshot.get("author"), Some(&json!("u1")));
    }
    // The live instance keeps its populated value
    assert!(post.is_populated("author"));
}

#[tokio::test]
async fn test_history_reduces_embedded_references_to_ids() {
    let registry = registry();
    let connections = Connections::single(Arc::new(MemoryStore::new()));

    let schema = registry.get_schema("post").unwrap();
    let mut post = Document::with_id(&schema, DocumentId::from("p1"));
    post.set("author", json!({ "_id": "u1", "name": "Ada" })).unwrap();
    post.save(&connections, &WriteContext::new()).await.unwrap();

    let schema = registry.get_schema("comment").unwrap();
    let mut comment = Document::with_id(&schema, DocumentId::from("c1"));
    comment.set("authors", json!([{ "_id": "u1", "name": "Ada" }, "u2"])).unwrap();
    comment.save(&connections, &WriteContext::new()).await.unwrap();

    assert_eq!(post.versions().unwrap()[0].get("author"), Some(&json!("u1")));
    assert_eq!(comment.versions().unwrap()[0].get("authors"), Some(&json!(["u1", "u2"])));
}

#[tokio::test]
async fn test_failed_snapshot_aborts_write() {
    let registry = registry();
    let store = Arc::new(MemoryStore::new());
    let connections = Connections::single(store.clone());

    let schema = registry.get_schema("comment").unwrap();
    let mut doc = Document::with_id(&schema, DocumentId::from("c1"));
    doc.set("body", "text").unwrap();
    doc.set(audit::VERSIONS, json!("not a history")).unwrap();
    let before = doc.values().clone();

    let err = doc.save(&connections, &WriteContext::new()).await.unwrap_err();
    assert!(matches!(err, ModelError::Snapshot { .. }));
    assert_eq!(store.count("comment"), 0);
    assert_eq!(doc.values(), &before);
    assert!(doc.is_new());
}

#[tokio::test]
async fn test_audit_actor_and_timestamps() {
    let registry = registry();
    let connections = Connections::single(Arc::new(MemoryStore::new()));

    let schema = registry.get_schema("comment").unwrap();
    let mut doc = Document::with_id(&schema, DocumentId::from("c1"));
    doc.save(&connections, &WriteContext::by("u1")).await.unwrap();
    let created_at = doc.get(audit::CREATED_AT).cloned().unwrap();

    doc.set("body", "edited").unwrap();
    doc.save(&connections, &WriteContext::by("u2")).await.unwrap();

    assert_eq!(doc.get(audit::CREATED_BY), Some(&json!("u1")));
    assert_eq!(doc.get(audit::UPDATED_BY), Some(&json!("u2")));
    assert_eq!(doc.get(audit::CREATED_AT), Some(&created_at));
    assert!(doc.get(audit::UPDATED_AT).unwrap().as_str().unwrap() >= created_at.as_str().unwrap());

    let err = doc.set(audit::CREATED_AT, "1970-01-01T00:00:00.000Z").unwrap_err();
    assert!(matches!(err, ModelError::ImmutableField { .. }));
}

// =============================================================================
// Public shape
// =============================================================================

#[tokio::test]
async fn test_public_shape_idempotent_and_expands_references() {
    let registry = registry();
    let connections = Connections::single(Arc::new(MemoryStore::new()));

    let author = save_new(&registry, &connections, "user", "u1", json!({ "name": "Ada" })).await;
    let mut post = save_new(&registry, &connections, "post", "p1", json!({ "title": "Hello", "author": "u1" })).await;

    let unpopulated = post.to_public_json().unwrap();
    assert_eq!(unpopulated["author"], json!("u1"));
    assert!(!unpopulated.contains_key(audit::VERSIONS));

    connections.populate(&registry, &mut post, "author").await.unwrap();
    let first = post.to_public_json().unwrap();
    let second = post.to_public_json().unwrap();
    assert_eq!(first, second);

    let expected = Value::Object(author.to_public_json().unwrap());
    assert_eq!(first["author"], expected);
    assert!(first["author"].get(audit::VERSIONS).is_none());
}

#[tokio::test]
async fn test_custom_transform_rename_survives_composition() {
    let mut registry = registry();
    let schema = Schema::new()
        .with_field(FieldDef::scalar("title", FieldType::String))
        .with_field(FieldDef::reference("author", "user"))
        .with_transform(|_doc: &Document, mut ret: Map<String, Value>| -> Result<Map<String, Value>> {
            if let Some(title) = ret.shift_remove("title") {
                ret.insert("headline".to_string(), title);
            }
            Ok(ret)
        });
    registry.register("article", schema).unwrap();
    let connections = Connections::single(Arc::new(MemoryStore::new()));

    let author = save_new(&registry, &connections, "user", "u1", json!({ "name": "Ada" })).await;
    let mut article =
        save_new(&registry, &connections, "article", "a1", json!({ "title": "News", "author": "u1" })).await;
    connections.populate(&registry, &mut article, "author").await.unwrap();

    let out = article.to_public_json().unwrap();
    assert_eq!(out["headline"], json!("News"));
    assert!(!out.contains_key("title"));
    assert!(!out.contains_key(audit::VERSIONS));
    assert_eq!(out["author"], Value::Object(author.to_public_json().unwrap()));
}

#[tokio::test]
async fn test_renamed_populated_reference_hides_history() {
    let mut registry = registry();
    let schema = Schema::new()
        .with_field(FieldDef::reference("author", "user"))
        .with_transform(|_doc: &Document, mut ret: Map<String, Value>| -> Result<Map<String, Value>> {
            if let Some(author) = ret.shift_remove("author") {
                ret.insert("writer".to_string(), author);
            }
            Ok(ret)
        });
    registry.register("review", schema).unwrap();
    let connections = Connections::single(Arc::new(MemoryStore::new()));

    let author = save_new(&registry, &connections, "user", "u1", json!({ "name": "Ada" })).await;
    let mut review = save_new(&registry, &connections, "review", "r1", json!({ "author": "u1" })).await;
    connections.populate(&registry, &mut review, "author").await.unwrap();

    let out = review.to_public_json().unwrap();
    assert_eq!(out["writer"], Value::Object(author.to_public_json().unwrap()));
    assert!(out["writer"].get(audit::VERSIONS).is_none());
    assert!(!out.contains_key("author"));
}

#[tokio::test]
async fn test_populate_missing_reference() {
    let registry = registry();
    let connections = Connections::single(Arc::new(MemoryStore::new()));
    let mut post = save_new(&registry, &connections, "post", "p1", json!({ "author": "ghost" })).await;

    let err = connections.populate(&registry, &mut post, "author").await.unwrap_err();
    assert!(matches!(err, ModelError::DocumentNotFound { ref model, .. } if model == "user"));
    assert!(!post.is_populated("author"));
}

// =============================================================================
// Links
// =============================================================================

#[tokio::test]
async fn test_find_links_example() {
    let registry = registry();
    let store = Arc::new(MemoryStore::new());
    let connections = Connections::single(store.clone());

    let u1 = save_new(&registry, &connections, "user", "U1", json!({ "name": "Ada" })).await;
    let u2 = save_new(&registry, &connections, "user", "U2", json!({ "name": "Grace" })).await;
    save_new(&registry, &connections, "post", "p1", json!({ "author": "U1" })).await;
    save_new(&registry, &connections, "post", "p2", json!({ "author": "U2" })).await;
    save_new(&registry, &connections, "post", "p3", json!({ "author": "U1" })).await;
    save_new(&registry, &connections, "comment", "c1", json!({ "authors": ["U2", "U1"] })).await;
    save_new(&registry, &connections, "comment", "c2", json!({ "authors": ["U2"] })).await;
    store.clear_query_log();

    let links = u1.find_links(&registry, &connections).await.unwrap().unwrap();

    let log = store.query_log();
    assert_eq!(log.len(), 2);
    let mut queried: Vec<_> = log.iter().map(|(model, _)| model.as_str()).collect();
    queried.sort();
    assert_eq!(queried, vec!["comment", "post"]);

    assert_eq!(links.models().collect::<Vec<_>>(), vec!["comment", "post"]);
    assert_eq!(links.get("post").unwrap(), &[DocumentId::from("p1"), DocumentId::from("p3")]);
    assert_eq!(links.get("comment").unwrap(), &[DocumentId::from("c1")]);
    assert_eq!(links.total(), 3);

    let serialized = serde_json::to_value(&links).unwrap();
    assert_eq!(serialized, json!({ "comment": ["c1"], "post": ["p1", "p3"] }));

    let u2_links = u2.find_links(&registry, &connections).await.unwrap().unwrap();
    assert_eq!(u2_links.get("post").unwrap(), &[DocumentId::from("p2")]);
    assert_eq!(u2_links.get("comment").unwrap().len(), 2);
}

#[tokio::test]
async fn test_find_links_absent_when_unreferenced() {
    let registry = registry();
    let connections = Connections::single(Arc::new(MemoryStore::new()));
    let lonely = save_new(&registry, &connections, "user", "U9", json!({ "name": "Nobody" })).await;
    save_new(&registry, &connections, "post", "p1", json!({ "author": "U1" })).await;

    assert!(lonely.find_links(&registry, &connections).await.unwrap().is_none());

    // Nothing references comments at all: no query is issued
    let comment = save_new(&registry, &connections, "comment", "c1", json!({ "authors": [] })).await;
    assert!(comment.find_links(&registry, &connections).await.unwrap().is_none());
}

#[tokio::test]
async fn test_audit_references_count_when_enabled() {
    let registry = registry_with(AugmentConfig {
        audit_links: true,
        ..AugmentConfig::default()
    });
    let connections = Connections::single(Arc::new(MemoryStore::new()));

    let schema = registry.get_schema("comment").unwrap();
    let mut comment = Document::with_id(&schema, DocumentId::from("c1"));
    comment.save(&connections, &WriteContext::by("U1")).await.unwrap();
    let user = save_new(&registry, &connections, "user", "U1", json!({ "name": "Ada" })).await;

    let links = user.find_links(&registry, &connections).await.unwrap().unwrap();
    assert_eq!(links.get("comment").unwrap(), &[DocumentId::from("c1")]);
}

async fn failing_setup(config: AugmentConfig, error: fn(&str) -> ModelError) -> (ModelRegistry, Connections, Document) {
    let registry = registry_with(config);
    let inner = Arc::new(MemoryStore::new());
    let connections = Connections::single(Arc::new(FailingStore {
        inner,
        model: "comment",
        error,
    }));

    let user = save_new(&registry, &connections, "user", "U1", json!({ "name": "Ada" })).await;
    save_new(&registry, &connections, "post", "p1", json!({ "author": "U1" })).await;
    save_new(&registry, &connections, "comment", "c1", json!({ "authors": ["U1"] })).await;
    (registry, connections, user)
}

#[tokio::test]
async fn test_fail_fast_is_default() {
    let (registry, connections, user) = failing_setup(AugmentConfig::default(), query_error).await;
    assert_eq!(user.schema().link_resolver().policy(), FanOutPolicy::FailFast);

    let err = user.find_links(&registry, &connections).await.unwrap_err();
    assert!(matches!(err, ModelError::Query { ref model, .. } if model == "comment"));
}

#[tokio::test]
async fn test_skip_failed_excludes_failing_model() {
    let config = AugmentConfig {
        link_policy: FanOutPolicy::SkipFailed,
        ..AugmentConfig::default()
    };
    let (registry, connections, user) = failing_setup(config, query_error).await;

    let links = user.find_links(&registry, &connections).await.unwrap().unwrap();
    assert_eq!(links.models().collect::<Vec<_>>(), vec!["post"]);
}

#[tokio::test]
async fn test_missing_model_is_fatal_even_when_skipping() {
    let config = AugmentConfig {
        link_policy: FanOutPolicy::SkipFailed,
        ..AugmentConfig::default()
    };
    let (registry, connections, user) = failing_setup(config, missing_model).await;

    let err = user.find_links(&registry, &connections).await.unwrap_err();
    assert!(err.is_not_found());
}

// =============================================================================
// Connections
// =============================================================================

#[tokio::test]
async fn test_named_connections_route_writes_and_queries() {
    let mut registry = registry();
    registry
        .register(
            "audit_entry",
            Schema::new()
                .with_field(FieldDef::reference("subject", "user"))
                .with_options(SchemaOptions {
                    connection: Some("archive".to_string()),
                    ..SchemaOptions::default()
                }),
        )
        .unwrap();

    let primary = Arc::new(MemoryStore::new());
    let archive = Arc::new(MemoryStore::new());
    let connections = Connections::single(primary.clone()).with("archive", archive.clone());

    let user = save_new(&registry, &connections, "user", "U1", json!({ "name": "Ada" })).await;
    save_new(&registry, &connections, "audit_entry", "e1", json!({ "subject": "U1" })).await;
    assert_eq!(archive.count("audit_entry"), 1);
    assert_eq!(primary.count("audit_entry"), 0);

    primary.clear_query_log();
    let links = user.find_links(&registry, &connections).await.unwrap().unwrap();
    assert_eq!(links.get("audit_entry").unwrap(), &[DocumentId::from("e1")]);
    assert_eq!(archive.query_log().len(), 1);
    assert_eq!(primary.query_log().len(), 2);

    // Without the archive connection the model cannot be written
    let only_primary = Connections::single(primary.clone());
    let schema = registry.get_schema("audit_entry").unwrap();
    let mut entry = Document::new(&schema);
    let err = entry.save(&only_primary, &WriteContext::new()).await.unwrap_err();
    assert!(matches!(err, ModelError::UnknownConnection(ref name) if name == "archive"));
}
