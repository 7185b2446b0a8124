//! Memory lifecycle: add, get, update, delete, bulk ingest, and the
//! cross-store invariants around them.

mod common;

use common::{function_memory, requirement, requirement_numbered, stack};
use serde_json::{json, Value};

use loci_core::{Filter, GraphStore, MemoryKind, SyncStatus, VectorStore};

#[tokio::test]
async fn test_add_then_get_returns_identical_fields() {
    let stack = stack().await;
    let memory = requirement("The importer shall validate record ids");
    let original_id = memory.id;
    let original_content = memory.content.clone();

    let (id, conflicts) = stack.manager.add(memory, true, true).await.unwrap();
    assert_eq!(id, original_id);
    assert!(conflicts.is_empty());

    let fetched = stack
        .manager
        .get(id, MemoryKind::Requirements, false, false)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(fetched.id, original_id);
    assert_eq!(fetched.content, original_content);
    assert_eq!(fetched.kind(), MemoryKind::Requirements);
    assert!(!fetched.deleted);
    // Requirements base 0.8, Medium priority adds nothing.
    assert!((fetched.importance_score - 0.8).abs() < 1e-5);
    assert_eq!(fetched.sync_status, SyncStatus::Synced);
}

#[tokio::test]
async fn test_add_is_idempotent_by_id() {
    let stack = stack().await;
    let memory = requirement("Idempotent writes leave one row");

    let (first, _) = stack.manager.add(memory.clone(), false, true).await.unwrap();
    let (second, _) = stack.manager.add(memory, false, true).await.unwrap();
    assert_eq!(first, second);

    let count = stack
        .vector
        .count(MemoryKind::Requirements.collection(), &Filter::new())
        .await
        .unwrap();
    assert_eq!(count, 1);
    assert_eq!(
        stack.graph.count_nodes(Some("Requirement"), None).await.unwrap(),
        1
    );
}

#[tokio::test]
async fn test_add_reports_paraphrase_conflict() {
    let stack = stack().await;

    let (first_id, conflicts) = stack
        .manager
        .add(
            requirement_numbered("System shall authenticate all requests", 1),
            true,
            true,
        )
        .await
        .unwrap();
    assert!(conflicts.is_empty());

    let (second_id, conflicts) = stack
        .manager
        .add(
            requirement_numbered("The system shall authenticate every request", 2),
            true,
            true,
        )
        .await
        .unwrap();

    // The paraphrase is reported at or above the conflict threshold, and
    // the write still happens.
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].id, first_id);
    assert!(conflicts[0].score >= 0.95);

    for id in [first_id, second_id] {
        assert!(stack
            .manager
            .get(id, MemoryKind::Requirements, false, false)
            .await
            .unwrap()
            .is_some());
    }
}

#[tokio::test]
async fn test_get_tracks_access() {
    let stack = stack().await;
    let (id, _) = stack
        .manager
        .add(requirement("Access counting"), false, true)
        .await
        .unwrap();

    stack
        .manager
        .get(id, MemoryKind::Requirements, false, true)
        .await
        .unwrap();
    let second = stack
        .manager
        .get(id, MemoryKind::Requirements, false, true)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(second.access_count, 2);
    assert!(second.last_accessed_at.is_some());
}

#[tokio::test]
async fn test_update_advances_updated_at_and_reembeds_on_content_change() {
    let stack = stack().await;
    let (id, _) = stack
        .manager
        .add(requirement("Original wording of the rule"), false, true)
        .await
        .unwrap();

    let before = stack
        .manager
        .get(id, MemoryKind::Requirements, true, false)
        .await
        .unwrap()
        .unwrap();

    // Patch without content: embedding untouched, updated_at advances.
    let mut patch = serde_json::Map::new();
    patch.insert("title".into(), json!("Renamed"));
    let updated = stack
        .manager
        .update(id, MemoryKind::Requirements, patch, true)
        .await
        .unwrap()
        .unwrap();
    assert!(updated.updated_at > before.updated_at);

    let unchanged = stack
        .manager
        .get(id, MemoryKind::Requirements, true, false)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(unchanged.embedding, before.embedding);

    // Content change regenerates the vector.
    let mut patch = serde_json::Map::new();
    patch.insert(
        "content".into(),
        json!("Completely different phrasing about exports"),
    );
    stack
        .manager
        .update(id, MemoryKind::Requirements, patch, true)
        .await
        .unwrap()
        .unwrap();

    let reembedded = stack
        .manager
        .get(id, MemoryKind::Requirements, true, false)
        .await
        .unwrap()
        .unwrap();
    assert_ne!(reembedded.embedding, before.embedding);
}

#[tokio::test]
async fn test_soft_delete_then_restore() {
    let stack = stack().await;
    let (id, _) = stack
        .manager
        .add(requirement("Deletable"), false, true)
        .await
        .unwrap();

    assert!(stack
        .manager
        .delete(id, MemoryKind::Requirements, true)
        .await
        .unwrap());

    let deleted = stack
        .manager
        .get(id, MemoryKind::Requirements, false, false)
        .await
        .unwrap()
        .unwrap();
    assert!(deleted.deleted);
    assert!(deleted.deleted_at.is_some());

    // Restore by update.
    let mut patch = serde_json::Map::new();
    patch.insert("deleted".into(), json!(false));
    let restored = stack
        .manager
        .update(id, MemoryKind::Requirements, patch, false)
        .await
        .unwrap()
        .unwrap();
    assert!(!restored.deleted);
    assert!(restored.deleted_at.is_none());
}

#[tokio::test]
async fn test_hard_delete_cascades_graph_edges() {
    let stack = stack().await;
    let (requirement_id, _) = stack
        .manager
        .add(requirement("Implemented by a function"), false, true)
        .await
        .unwrap();
    let (function_id, _) = stack
        .manager
        .add(
            function_memory("save", "def save(self)", "Persist the row."),
            false,
            true,
        )
        .await
        .unwrap();

    stack
        .graph
        .create_relationship(
            function_id,
            requirement_id,
            "IMPLEMENTS",
            loci_core::Payload::new(),
        )
        .await
        .unwrap();

    assert!(stack
        .manager
        .delete(requirement_id, MemoryKind::Requirements, false)
        .await
        .unwrap());

    // The node is gone from both stores and no edge references it.
    assert!(stack
        .manager
        .get(requirement_id, MemoryKind::Requirements, false, false)
        .await
        .unwrap()
        .is_none());
    assert!(stack
        .graph
        .get_node(requirement_id, None)
        .await
        .unwrap()
        .is_none());
    let related = stack
        .graph
        .get_related(function_id, None, loci_core::Direction::Both, 1, 10)
        .await
        .unwrap();
    assert!(related.is_empty());
}

#[tokio::test]
async fn test_delete_unknown_id_is_not_found() {
    let stack = stack().await;
    let deleted = stack
        .manager
        .delete(uuid::Uuid::new_v4(), MemoryKind::Requirements, true)
        .await
        .unwrap();
    assert!(!deleted);
}

#[tokio::test]
async fn test_bulk_add_mixes_kinds_and_reports_validation_errors() {
    let stack = stack().await;

    let mut invalid = requirement("has a broken requirement id");
    if let loci_core::MemoryFields::Requirements(fields) = &mut invalid.fields {
        fields.requirement_id = "not-a-req-id".to_string();
    }

    let memories = vec![
        requirement_numbered("Bulk requirement about imports", 10),
        function_memory("load", "def load(path)", "Load a file."),
        invalid,
    ];

    let (added, errors) = stack.manager.bulk_add(memories, false, true).await.unwrap();
    assert_eq!(added.len(), 2);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].error.contains("requirement_id"));

    let counts = stack.manager.counts().await.unwrap();
    assert_eq!(counts["requirements"], 1);
    assert_eq!(counts["function"], 1);
}

#[tokio::test]
async fn test_importance_bounds_by_priority() {
    let stack = stack().await;

    let mut critical = requirement_numbered("Critical rule", 20);
    if let loci_core::MemoryFields::Requirements(fields) = &mut critical.fields {
        fields.priority = loci_core::Priority::Critical;
    }
    let (id, _) = stack.manager.add(critical, false, false).await.unwrap();

    let fetched = stack
        .manager
        .get(id, MemoryKind::Requirements, false, false)
        .await
        .unwrap()
        .unwrap();
    // 0.8 base + 0.2 critical, clamped into [0, 1].
    assert!((fetched.importance_score - 1.0).abs() < 1e-5);

    let (function_id, _) = stack
        .manager
        .add(
            function_memory("tiny", "def tiny()", "Does little."),
            false,
            false,
        )
        .await
        .unwrap();
    let function = stack
        .manager
        .get(function_id, MemoryKind::Function, false, false)
        .await
        .unwrap()
        .unwrap();
    assert!((function.importance_score - 0.4).abs() < 1e-5);
}

#[tokio::test]
async fn test_export_payload_shape_excludes_embedding() {
    let stack = stack().await;
    stack
        .manager
        .add(requirement("Exported without vectors"), false, true)
        .await
        .unwrap();

    let page = stack
        .vector
        .scroll(
            MemoryKind::Requirements.collection(),
            &Filter::new(),
            10,
            None,
            false,
        )
        .await
        .unwrap();
    let payload = &page.points[0].payload;
    assert!(payload.get("embedding").is_none());
    assert_eq!(payload["kind"], Value::from("requirements"));
    assert!(payload.get("requirement_id").is_some());
}
