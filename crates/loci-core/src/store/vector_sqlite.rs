//! Embedded vector store.
//!
//! One SQLite database holds every collection: rows of
//! `(collection, id, vector BLOB, payload JSON)`. Search is filter-first
//! exact cosine over the surviving candidates, which trivially meets the
//! recall requirement of an ANN index.
//!
//! All methods take `&self`; a single writer connection behind a mutex keeps
//! the store `Send + Sync` so callers share it as `Arc<SqliteVectorStore>`.

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use super::filter::Filter;
use super::{ScoredPoint, ScrollPage, StoredPoint, VectorStore};
use crate::error::{CoreError, Result};
use crate::memory::{MemoryKind, Payload, EMBEDDING_DIMENSIONS};
use crate::store::cosine_similarity;

/// Payload keys that get expression indexes in every collection.
const INDEXED_PAYLOAD_KEYS: [&str; 6] = [
    "kind",
    "deleted",
    "sync_status",
    "created_at",
    "updated_at",
    "importance_score",
];

/// Serialize a vector as little-endian f32 bytes.
fn vector_to_bytes(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Deserialize little-endian f32 bytes back into a vector.
fn vector_from_bytes(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

fn parse_payload(raw: &str) -> Result<Payload> {
    serde_json::from_str(raw).map_err(|e| CoreError::Internal(format!("corrupt payload: {}", e)))
}

pub struct SqliteVectorStore {
    conn: Mutex<Connection>,
}

impl SqliteVectorStore {
    /// Open the store. `None` keeps it in memory (tests, ephemeral runs).
    pub fn open(db_path: Option<&Path>) -> Result<Self> {
        let conn = match db_path {
            Some(path) => Connection::open(path)?,
            None => Connection::open_in_memory()?,
        };

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS collections (
                 name TEXT PRIMARY KEY
             );
             CREATE TABLE IF NOT EXISTS points (
                 collection TEXT NOT NULL REFERENCES collections(name),
                 id         TEXT NOT NULL,
                 vector     BLOB NOT NULL,
                 payload    TEXT NOT NULL,
                 PRIMARY KEY (collection, id)
             );",
        )?;

        info!(path = ?db_path, "vector store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| CoreError::StorageUnavailable("vector store lock poisoned".into()))
    }

    fn ensure_collection(conn: &Connection, collection: &str) -> Result<()> {
        let exists: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM collections WHERE name = ?1",
                params![collection],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(CoreError::CollectionMissing(collection.to_string()));
        }
        Ok(())
    }

    fn check_dimension(vector: &[f32]) -> Result<()> {
        // Empty vectors are permitted transiently, before embedding assignment.
        if !vector.is_empty() && vector.len() != EMBEDDING_DIMENSIONS {
            return Err(CoreError::DimensionMismatch {
                expected: EMBEDDING_DIMENSIONS,
                actual: vector.len(),
            });
        }
        Ok(())
    }

    /// Load every candidate of a collection passing the filter, in stable
    /// id order. The workhorse behind search/scroll/count/delete_by_filter.
    fn filtered_rows(
        conn: &Connection,
        collection: &str,
        filter: &Filter,
        with_vectors: bool,
    ) -> Result<Vec<StoredPoint>> {
        let mut stmt = conn.prepare(
            "SELECT id, vector, payload FROM points WHERE collection = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![collection], |row| {
            let id: String = row.get(0)?;
            let vector: Vec<u8> = row.get(1)?;
            let payload: String = row.get(2)?;
            Ok((id, vector, payload))
        })?;

        let mut points = Vec::new();
        for row in rows {
            let (id, vector, payload) = row?;
            let payload = parse_payload(&payload)?;
            if !filter.matches(&payload) {
                continue;
            }
            let id = Uuid::parse_str(&id)
                .map_err(|e| CoreError::Internal(format!("corrupt point id: {}", e)))?;
            points.push(StoredPoint {
                id,
                payload,
                vector: with_vectors.then(|| vector_from_bytes(&vector)),
            });
        }
        Ok(points)
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn initialize_collections(&self) -> Result<()> {
        let conn = self.lock()?;
        for kind in MemoryKind::ALL {
            conn.execute(
                "INSERT OR IGNORE INTO collections (name) VALUES (?1)",
                params![kind.collection()],
            )?;
        }
        for key in INDEXED_PAYLOAD_KEYS {
            conn.execute_batch(&format!(
                "CREATE INDEX IF NOT EXISTS idx_points_{key} \
                 ON points (collection, json_extract(payload, '$.{key}'));"
            ))?;
        }
        info!("vector collections initialized");
        Ok(())
    }

    async fn health_check(&self) -> bool {
        self.lock()
            .and_then(|conn| {
                conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                    .map_err(CoreError::from)
            })
            .is_ok()
    }

    async fn upsert(
        &self,
        collection: &str,
        id: Uuid,
        vector: &[f32],
        payload: Payload,
    ) -> Result<()> {
        Self::check_dimension(vector)?;
        let conn = self.lock()?;
        Self::ensure_collection(&conn, collection)?;
        conn.execute(
            "INSERT OR REPLACE INTO points (collection, id, vector, payload)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                collection,
                id.to_string(),
                vector_to_bytes(vector),
                serde_json::to_string(&payload)?
            ],
        )?;
        debug!(collection, %id, "point upserted");
        Ok(())
    }

    async fn upsert_batch(
        &self,
        collection: &str,
        points: Vec<(Uuid, Vec<f32>, Payload)>,
    ) -> Result<()> {
        for (_, vector, _) in &points {
            Self::check_dimension(vector)?;
        }
        let mut conn = self.lock()?;
        Self::ensure_collection(&conn, collection)?;

        let count = points.len();
        let tx = conn.transaction().map_err(CoreError::from)?;
        for (id, vector, payload) in points {
            tx.execute(
                "INSERT OR REPLACE INTO points (collection, id, vector, payload)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    collection,
                    id.to_string(),
                    vector_to_bytes(&vector),
                    serde_json::to_string(&payload)?
                ],
            )?;
        }
        tx.commit().map_err(CoreError::from)?;
        debug!(collection, count, "batch upserted");
        Ok(())
    }

    async fn get(
        &self,
        collection: &str,
        id: Uuid,
        with_vector: bool,
    ) -> Result<Option<StoredPoint>> {
        let conn = self.lock()?;
        let row: Option<(Vec<u8>, String)> = conn
            .query_row(
                "SELECT vector, payload FROM points WHERE collection = ?1 AND id = ?2",
                params![collection, id.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match row {
            Some((vector, payload)) => Ok(Some(StoredPoint {
                id,
                payload: parse_payload(&payload)?,
                vector: with_vector.then(|| vector_from_bytes(&vector)),
            })),
            None => Ok(None),
        }
    }

    async fn update_payload(&self, collection: &str, id: Uuid, patch: Payload) -> Result<bool> {
        let conn = self.lock()?;
        let existing: Option<String> = conn
            .query_row(
                "SELECT payload FROM points WHERE collection = ?1 AND id = ?2",
                params![collection, id.to_string()],
                |row| row.get(0),
            )
            .optional()?;

        let Some(raw) = existing else {
            return Ok(false);
        };

        let mut payload = parse_payload(&raw)?;
        for (key, value) in patch {
            payload.insert(key, value);
        }
        conn.execute(
            "UPDATE points SET payload = ?3 WHERE collection = ?1 AND id = ?2",
            params![collection, id.to_string(), serde_json::to_string(&payload)?],
        )?;
        Ok(true)
    }

    async fn delete(&self, collection: &str, id: Uuid) -> Result<bool> {
        let conn = self.lock()?;
        let affected = conn.execute(
            "DELETE FROM points WHERE collection = ?1 AND id = ?2",
            params![collection, id.to_string()],
        )?;
        Ok(affected > 0)
    }

    async fn delete_by_filter(&self, collection: &str, filter: &Filter) -> Result<u64> {
        let mut conn = self.lock()?;
        let matches = Self::filtered_rows(&conn, collection, filter, false)?;

        let tx = conn.transaction().map_err(CoreError::from)?;
        for point in &matches {
            tx.execute(
                "DELETE FROM points WHERE collection = ?1 AND id = ?2",
                params![collection, point.id.to_string()],
            )?;
        }
        tx.commit().map_err(CoreError::from)?;

        let deleted = matches.len() as u64;
        if deleted > 0 {
            info!(collection, deleted, "points deleted by filter");
        }
        Ok(deleted)
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        filter: &Filter,
        score_threshold: Option<f32>,
    ) -> Result<Vec<ScoredPoint>> {
        let conn = self.lock()?;
        Self::ensure_collection(&conn, collection)?;
        let candidates = Self::filtered_rows(&conn, collection, filter, true)?;
        drop(conn);

        let mut scored: Vec<ScoredPoint> = candidates
            .into_iter()
            .filter_map(|point| {
                let candidate = point.vector.as_deref()?;
                if candidate.is_empty() {
                    return None;
                }
                let score = cosine_similarity(vector, candidate);
                if let Some(threshold) = score_threshold {
                    if score < threshold {
                        return None;
                    }
                }
                Some(ScoredPoint {
                    id: point.id,
                    score,
                    payload: point.payload,
                    vector: None,
                })
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }

    async fn scroll(
        &self,
        collection: &str,
        filter: &Filter,
        limit: usize,
        offset: Option<u64>,
        with_vectors: bool,
    ) -> Result<ScrollPage> {
        let conn = self.lock()?;
        Self::ensure_collection(&conn, collection)?;
        let rows = Self::filtered_rows(&conn, collection, filter, with_vectors)?;
        drop(conn);

        let offset = offset.unwrap_or(0) as usize;
        let remaining = rows.len().saturating_sub(offset);
        let points: Vec<StoredPoint> = rows.into_iter().skip(offset).take(limit).collect();
        let next_offset = (remaining > limit).then(|| (offset + points.len()) as u64);

        Ok(ScrollPage { points, next_offset })
    }

    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64> {
        let conn = self.lock()?;
        Self::ensure_collection(&conn, collection)?;
        if filter.is_empty() {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM points WHERE collection = ?1",
                params![collection],
                |row| row.get(0),
            )?;
            return Ok(count as u64);
        }
        Ok(Self::filtered_rows(&conn, collection, filter, false)?.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> SqliteVectorStore {
        let store = SqliteVectorStore::open(None).unwrap();
        futures_block(store.initialize_collections()).unwrap();
        store
    }

    /// Tiny helper so the sync unit tests can drive the async trait.
    fn futures_block<F: std::future::Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(future)
    }

    fn unit_vector(hot: usize) -> Vec<f32> {
        let mut v = vec![0.0_f32; EMBEDDING_DIMENSIONS];
        v[hot] = 1.0;
        v
    }

    fn payload(value: serde_json::Value) -> Payload {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_vector_byte_roundtrip() {
        let original = vec![1.5_f32, -2.25, 0.0, 42.0];
        let restored = vector_from_bytes(&vector_to_bytes(&original));
        assert_eq!(original, restored);
    }

    #[test]
    fn test_upsert_requires_collection() {
        let store = store();
        let err = futures_block(store.upsert(
            "nonexistent",
            Uuid::new_v4(),
            &unit_vector(0),
            Payload::new(),
        ))
        .unwrap_err();
        assert!(matches!(err, CoreError::CollectionMissing(_)));
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let store = store();
        let err = futures_block(store.upsert(
            "functions",
            Uuid::new_v4(),
            &[0.1, 0.2],
            Payload::new(),
        ))
        .unwrap_err();
        assert!(matches!(err, CoreError::DimensionMismatch { actual: 2, .. }));
    }

    #[test]
    fn test_upsert_get_roundtrip_and_idempotence() {
        let store = store();
        let id = Uuid::new_v4();
        let body = payload(json!({"content": "hello", "deleted": false}));

        futures_block(store.upsert("functions", id, &unit_vector(3), body.clone())).unwrap();
        futures_block(store.upsert("functions", id, &unit_vector(3), body)).unwrap();

        assert_eq!(
            futures_block(store.count("functions", &Filter::new())).unwrap(),
            1
        );
        let point = futures_block(store.get("functions", id, true)).unwrap().unwrap();
        assert_eq!(point.payload["content"], json!("hello"));
        assert_eq!(point.vector.unwrap()[3], 1.0);
    }

    #[test]
    fn test_search_filter_first_and_threshold() {
        let store = store();
        let live = Uuid::new_v4();
        let dead = Uuid::new_v4();
        futures_block(store.upsert(
            "functions",
            live,
            &unit_vector(0),
            payload(json!({"deleted": false})),
        ))
        .unwrap();
        futures_block(store.upsert(
            "functions",
            dead,
            &unit_vector(0),
            payload(json!({"deleted": true})),
        ))
        .unwrap();

        let hits = futures_block(store.search(
            "functions",
            &unit_vector(0),
            10,
            &Filter::new().eq("deleted", false),
            Some(0.9),
        ))
        .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, live);
        assert!(hits[0].score > 0.99);

        // Orthogonal query falls under the threshold entirely.
        let hits = futures_block(store.search(
            "functions",
            &unit_vector(7),
            10,
            &Filter::new(),
            Some(0.5),
        ))
        .unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_update_payload_shallow_merge() {
        let store = store();
        let id = Uuid::new_v4();
        futures_block(store.upsert(
            "sessions",
            id,
            &unit_vector(1),
            payload(json!({"access_count": 0, "deleted": false})),
        ))
        .unwrap();

        let patched = futures_block(store.update_payload(
            "sessions",
            id,
            payload(json!({"access_count": 1})),
        ))
        .unwrap();
        assert!(patched);

        let point = futures_block(store.get("sessions", id, false)).unwrap().unwrap();
        assert_eq!(point.payload["access_count"], json!(1));
        assert_eq!(point.payload["deleted"], json!(false));

        let missing = futures_block(store.update_payload(
            "sessions",
            Uuid::new_v4(),
            Payload::new(),
        ))
        .unwrap();
        assert!(!missing);
    }

    #[test]
    fn test_scroll_pagination_is_stable() {
        let store = store();
        for i in 0..5 {
            futures_block(store.upsert(
                "components",
                Uuid::new_v4(),
                &unit_vector(i),
                payload(json!({"deleted": false, "n": i})),
            ))
            .unwrap();
        }

        let mut seen = Vec::new();
        let mut offset = None;
        loop {
            let page = futures_block(store.scroll(
                "components",
                &Filter::new(),
                2,
                offset,
                false,
            ))
            .unwrap();
            seen.extend(page.points.iter().map(|p| p.id));
            match page.next_offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }
        assert_eq!(seen.len(), 5);
        let unique: std::collections::HashSet<_> = seen.iter().collect();
        assert_eq!(unique.len(), 5);
    }

    #[test]
    fn test_delete_by_filter_counts() {
        let store = store();
        for source in ["indexer", "indexer", "manual"] {
            futures_block(store.upsert(
                "functions",
                Uuid::new_v4(),
                &unit_vector(0),
                payload(json!({"source": source})),
            ))
            .unwrap();
        }
        let deleted = futures_block(
            store.delete_by_filter("functions", &Filter::new().eq("source", "indexer")),
        )
        .unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(
            futures_block(store.count("functions", &Filter::new())).unwrap(),
            1
        );
    }
}
