//! Embedded property graph store.
//!
//! Nodes carry one kind label plus the implicit common `Memory` label;
//! edges are typed, directed, and dropped via `ON DELETE CASCADE` when an
//! endpoint is deleted, which is exactly the detach-delete invariant.
//!
//! `execute_query` evaluates the read-only subset parsed by
//! [`super::query`]; the security validator upstream has already rejected
//! anything that could write.

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use super::query::{self, CmpOp, Expr, LimitSpec, Operand, ParsedQuery, ReturnItem};
use super::{Direction, GraphNode, GraphStore, RelatedNode};
use crate::error::{CoreError, Result};
use crate::memory::Payload;

/// Label implicitly carried by every node.
pub const COMMON_LABEL: &str = "Memory";

fn parse_properties(raw: &str) -> Result<Payload> {
    serde_json::from_str(raw)
        .map_err(|e| CoreError::Internal(format!("corrupt node properties: {}", e)))
}

fn node_labels(label: &str) -> Vec<String> {
    vec![label.to_string(), COMMON_LABEL.to_string()]
}

/// Equality with numeric coercion, mirroring the vector filter semantics.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

pub struct SqliteGraphStore {
    conn: Mutex<Connection>,
}

struct NodeRow {
    id: Uuid,
    label: String,
    properties: Payload,
}

impl SqliteGraphStore {
    /// Open the store. `None` keeps it in memory.
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

        // id is the cross-store primary key, so (label, id) uniqueness is
        // implied by the stronger per-id uniqueness here.
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS nodes (
                 id         TEXT PRIMARY KEY,
                 label      TEXT NOT NULL,
                 properties TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS edges (
                 id         INTEGER PRIMARY KEY AUTOINCREMENT,
                 source     TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
                 target     TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
                 rel_type   TEXT NOT NULL,
                 properties TEXT NOT NULL
             );",
        )?;

        info!(path = ?db_path, "graph store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| CoreError::StorageUnavailable("graph store lock poisoned".into()))
    }

    fn fetch_node(conn: &Connection, id: Uuid) -> Result<Option<NodeRow>> {
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT label, properties FROM nodes WHERE id = ?1",
                params![id.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        match row {
            Some((label, properties)) => Ok(Some(NodeRow {
                id,
                label,
                properties: parse_properties(&properties)?,
            })),
            None => Ok(None),
        }
    }

    fn label_matches(node_label: &str, wanted: Option<&str>) -> bool {
        match wanted {
            None => true,
            Some(label) => label == COMMON_LABEL || label == node_label,
        }
    }

    /// Neighbors of a node in the given direction, with the connecting edge
    /// type. Respects the relationship-type restriction.
    fn neighbors(
        conn: &Connection,
        id: Uuid,
        relationship_types: Option<&[String]>,
        direction: Direction,
    ) -> Result<Vec<(Uuid, String)>> {
        let mut out = Vec::new();
        let id_str = id.to_string();

        let mut collect = |sql: &str| -> Result<()> {
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt.query_map(params![id_str], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            for row in rows {
                let (other, rel_type) = row?;
                if let Some(allowed) = relationship_types {
                    if !allowed.iter().any(|t| t == &rel_type) {
                        continue;
                    }
                }
                let other = Uuid::parse_str(&other)
                    .map_err(|e| CoreError::Internal(format!("corrupt edge endpoint: {}", e)))?;
                out.push((other, rel_type));
            }
            Ok(())
        };

        if matches!(direction, Direction::Outgoing | Direction::Both) {
            collect("SELECT target, rel_type FROM edges WHERE source = ?1")?;
        }
        if matches!(direction, Direction::Incoming | Direction::Both) {
            collect("SELECT source, rel_type FROM edges WHERE target = ?1")?;
        }
        Ok(out)
    }

    fn resolve_operand<'a>(operand: &'a Operand, parameters: &'a Payload) -> Result<&'a Value> {
        match operand {
            Operand::Literal(value) => Ok(value),
            Operand::Param(name) => parameters.get(name).ok_or_else(|| {
                CoreError::validation("parameters", format!("missing parameter '{}'", name))
            }),
        }
    }

    fn eval_expr(expr: &Expr, properties: &Payload, parameters: &Payload) -> Result<bool> {
        match expr {
            Expr::And(left, right) => Ok(Self::eval_expr(left, properties, parameters)?
                && Self::eval_expr(right, properties, parameters)?),
            Expr::Or(left, right) => Ok(Self::eval_expr(left, properties, parameters)?
                || Self::eval_expr(right, properties, parameters)?),
            Expr::Cmp {
                property,
                op,
                value,
            } => {
                let wanted = Self::resolve_operand(value, parameters)?;
                let actual = properties.get(property);
                Ok(match op {
                    CmpOp::Eq => actual.map(|a| values_equal(a, wanted)).unwrap_or(false),
                    CmpOp::Ne => actual.map(|a| !values_equal(a, wanted)).unwrap_or(true),
                    CmpOp::Contains => match (actual.and_then(Value::as_str), wanted.as_str()) {
                        (Some(haystack), Some(needle)) => haystack.contains(needle),
                        _ => false,
                    },
                })
            }
        }
    }

    fn eval_query(
        conn: &Connection,
        parsed: &ParsedQuery,
        parameters: &Payload,
    ) -> Result<Vec<Payload>> {
        let limit = match &parsed.limit {
            None => usize::MAX,
            Some(LimitSpec::Literal(n)) => *n,
            Some(LimitSpec::Param(name)) => parameters
                .get(name)
                .and_then(Value::as_u64)
                .ok_or_else(|| {
                    CoreError::validation(
                        "parameters",
                        format!("LIMIT parameter '{}' must be a non-negative integer", name),
                    )
                })? as usize,
        };

        let mut stmt = conn.prepare("SELECT id, label, properties FROM nodes ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let is_count = parsed
            .returns
            .iter()
            .any(|item| matches!(item, ReturnItem::Count { .. }));

        let mut matched = 0_u64;
        let mut results = Vec::new();

        for row in rows {
            let (id, label, properties) = row?;
            if !Self::label_matches(&label, parsed.label.as_deref()) {
                continue;
            }
            let properties = parse_properties(&properties)?;
            if let Some(predicate) = &parsed.predicate {
                if !Self::eval_expr(predicate, &properties, parameters)? {
                    continue;
                }
            }
            matched += 1;

            if is_count {
                continue;
            }

            let mut record = Payload::new();
            for item in &parsed.returns {
                let column = item.column_name(&parsed.variable);
                let value = match item {
                    ReturnItem::Node { .. } | ReturnItem::Properties { .. } => {
                        Value::Object(properties.clone())
                    }
                    ReturnItem::Property { property, .. } => {
                        properties.get(property).cloned().unwrap_or(Value::Null)
                    }
                    ReturnItem::Labels { .. } => {
                        Value::Array(node_labels(&label).into_iter().map(Value::String).collect())
                    }
                    ReturnItem::Count { .. } => unreachable!("count handled above"),
                };
                record.insert(column, value);
            }
            let _ = id; // id travels inside properties
            results.push(record);

            if results.len() >= limit {
                break;
            }
        }

        if is_count {
            let mut record = Payload::new();
            for item in &parsed.returns {
                if matches!(item, ReturnItem::Count { .. }) {
                    record.insert(item.column_name(&parsed.variable), Value::from(matched));
                }
            }
            return Ok(vec![record]);
        }

        Ok(results)
    }
}

#[async_trait]
impl GraphStore for SqliteGraphStore {
    async fn initialize_schema(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "CREATE INDEX IF NOT EXISTS idx_nodes_label ON nodes (label);
             CREATE INDEX IF NOT EXISTS idx_nodes_status
                 ON nodes (json_extract(properties, '$.status'));
             CREATE INDEX IF NOT EXISTS idx_nodes_file_path
                 ON nodes (json_extract(properties, '$.file_path'));
             CREATE INDEX IF NOT EXISTS idx_nodes_name
                 ON nodes (json_extract(properties, '$.name'));
             CREATE INDEX IF NOT EXISTS idx_edges_source ON edges (source);
             CREATE INDEX IF NOT EXISTS idx_edges_target ON edges (target);
             CREATE INDEX IF NOT EXISTS idx_edges_type ON edges (rel_type);",
        )?;
        info!("graph schema initialized");
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

    async fn create_node(&self, label: &str, properties: Payload) -> Result<Uuid> {
        let id = properties
            .get("id")
            .and_then(Value::as_str)
            .and_then(|s| Uuid::parse_str(s).ok())
            .ok_or_else(|| CoreError::validation("id", "node properties must carry a uuid id"))?;

        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO nodes (id, label, properties) VALUES (?1, ?2, ?3)",
            params![
                id.to_string(),
                label,
                serde_json::to_string(&properties)?
            ],
        )?;
        debug!(%id, label, "node created");
        Ok(id)
    }

    async fn get_node(&self, id: Uuid, label: Option<&str>) -> Result<Option<GraphNode>> {
        let conn = self.lock()?;
        match Self::fetch_node(&conn, id)? {
            Some(node) if Self::label_matches(&node.label, label) => Ok(Some(GraphNode {
                id: node.id,
                labels: node_labels(&node.label),
                properties: node.properties,
            })),
            _ => Ok(None),
        }
    }

    async fn update_node(&self, id: Uuid, patch: Payload, label: Option<&str>) -> Result<bool> {
        let conn = self.lock()?;
        let Some(node) = Self::fetch_node(&conn, id)? else {
            return Ok(false);
        };
        if !Self::label_matches(&node.label, label) {
            return Ok(false);
        }

        let mut properties = node.properties;
        for (key, value) in patch {
            properties.insert(key, value);
        }
        conn.execute(
            "UPDATE nodes SET properties = ?2 WHERE id = ?1",
            params![id.to_string(), serde_json::to_string(&properties)?],
        )?;
        Ok(true)
    }

    async fn delete_node(&self, id: Uuid, label: Option<&str>, detach: bool) -> Result<bool> {
        let conn = self.lock()?;
        let Some(node) = Self::fetch_node(&conn, id)? else {
            return Ok(false);
        };
        if !Self::label_matches(&node.label, label) {
            return Ok(false);
        }

        if !detach {
            let edge_count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM edges WHERE source = ?1 OR target = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )?;
            if edge_count > 0 {
                return Err(CoreError::Conflict(format!(
                    "node {} still has {} relationships; delete with detach",
                    id, edge_count
                )));
            }
        }

        // Cascading foreign keys remove the node's edges with it.
        conn.execute("DELETE FROM nodes WHERE id = ?1", params![id.to_string()])?;
        debug!(%id, detach, "node deleted");
        Ok(true)
    }

    async fn create_relationship(
        &self,
        source: Uuid,
        target: Uuid,
        relationship_type: &str,
        properties: Payload,
    ) -> Result<()> {
        let conn = self.lock()?;
        for endpoint in [source, target] {
            if Self::fetch_node(&conn, endpoint)?.is_none() {
                return Err(CoreError::NotFound(format!(
                    "relationship endpoint {} does not exist",
                    endpoint
                )));
            }
        }
        conn.execute(
            "INSERT INTO edges (source, target, rel_type, properties) VALUES (?1, ?2, ?3, ?4)",
            params![
                source.to_string(),
                target.to_string(),
                relationship_type,
                serde_json::to_string(&properties)?
            ],
        )?;
        debug!(%source, %target, relationship_type, "relationship created");
        Ok(())
    }

    async fn delete_relationship(
        &self,
        source: Uuid,
        target: Uuid,
        relationship_type: Option<&str>,
    ) -> Result<u64> {
        let conn = self.lock()?;
        let deleted = match relationship_type {
            Some(rel_type) => conn.execute(
                "DELETE FROM edges WHERE source = ?1 AND target = ?2 AND rel_type = ?3",
                params![source.to_string(), target.to_string(), rel_type],
            )?,
            None => conn.execute(
                "DELETE FROM edges WHERE source = ?1 AND target = ?2",
                params![source.to_string(), target.to_string()],
            )?,
        };
        Ok(deleted as u64)
    }

    async fn get_related(
        &self,
        id: Uuid,
        relationship_types: Option<&[String]>,
        direction: Direction,
        depth: usize,
        limit: usize,
    ) -> Result<Vec<RelatedNode>> {
        let conn = self.lock()?;
        let mut visited: HashSet<Uuid> = HashSet::from([id]);
        let mut frontier = vec![id];
        let mut results = Vec::new();

        for _ in 0..depth.max(1) {
            let mut next_frontier = Vec::new();
            for node in frontier {
                for (neighbor, rel_type) in
                    Self::neighbors(&conn, node, relationship_types, direction)?
                {
                    if !visited.insert(neighbor) {
                        continue;
                    }
                    // Endpoint validation at creation plus cascade deletion
                    // means the neighbor row must exist.
                    let Some(row) = Self::fetch_node(&conn, neighbor)? else {
                        continue;
                    };
                    results.push(RelatedNode {
                        id: row.id,
                        labels: node_labels(&row.label),
                        properties: row.properties,
                        relationship_type: rel_type,
                    });
                    if results.len() >= limit {
                        return Ok(results);
                    }
                    next_frontier.push(neighbor);
                }
            }
            if next_frontier.is_empty() {
                break;
            }
            frontier = next_frontier;
        }

        Ok(results)
    }

    async fn find_path(
        &self,
        start: Uuid,
        end: Uuid,
        relationship_types: Option<&[String]>,
        max_depth: usize,
    ) -> Result<Option<Vec<GraphNode>>> {
        let conn = self.lock()?;
        if Self::fetch_node(&conn, start)?.is_none() || Self::fetch_node(&conn, end)?.is_none() {
            return Ok(None);
        }
        if start == end {
            let row = Self::fetch_node(&conn, start)?.expect("checked above");
            return Ok(Some(vec![GraphNode {
                id: row.id,
                labels: node_labels(&row.label),
                properties: row.properties,
            }]));
        }

        // Unweighted shortest path: BFS over undirected edges.
        let mut parents: HashMap<Uuid, Uuid> = HashMap::new();
        let mut visited: HashSet<Uuid> = HashSet::from([start]);
        let mut queue: VecDeque<(Uuid, usize)> = VecDeque::from([(start, 0)]);
        let mut found = false;

        while let Some((node, dist)) = queue.pop_front() {
            if dist >= max_depth {
                continue;
            }
            for (neighbor, _) in
                Self::neighbors(&conn, node, relationship_types, Direction::Both)?
            {
                if !visited.insert(neighbor) {
                    continue;
                }
                parents.insert(neighbor, node);
                if neighbor == end {
                    found = true;
                    break;
                }
                queue.push_back((neighbor, dist + 1));
            }
            if found {
                break;
            }
        }

        if !found {
            return Ok(None);
        }

        let mut ids = vec![end];
        let mut cursor = end;
        while let Some(&parent) = parents.get(&cursor) {
            ids.push(parent);
            cursor = parent;
        }
        ids.reverse();

        let mut path = Vec::with_capacity(ids.len());
        for node_id in ids {
            let Some(row) = Self::fetch_node(&conn, node_id)? else {
                return Ok(None);
            };
            path.push(GraphNode {
                id: row.id,
                labels: node_labels(&row.label),
                properties: row.properties,
            });
        }
        Ok(Some(path))
    }

    async fn execute_query(&self, query_text: &str, parameters: &Payload) -> Result<Vec<Payload>> {
        let parsed = query::parse(query_text)?;
        let conn = self.lock()?;
        Self::eval_query(&conn, &parsed, parameters)
    }

    async fn count_nodes(&self, label: Option<&str>, filter: Option<&Payload>) -> Result<u64> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT label, properties FROM nodes")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut count = 0_u64;
        for row in rows {
            let (node_label, properties) = row?;
            if !Self::label_matches(&node_label, label) {
                continue;
            }
            if let Some(wanted) = filter {
                let properties = parse_properties(&properties)?;
                let all_match = wanted
                    .iter()
                    .all(|(k, v)| properties.get(k).map(|a| values_equal(a, v)).unwrap_or(false));
                if !all_match {
                    continue;
                }
            }
            count += 1;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn block<F: std::future::Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(future)
    }

    fn store() -> SqliteGraphStore {
        let store = SqliteGraphStore::open(None).unwrap();
        block(store.initialize_schema()).unwrap();
        store
    }

    fn props(id: Uuid, extra: serde_json::Value) -> Payload {
        let mut map = extra.as_object().unwrap().clone();
        map.insert("id".into(), json!(id.to_string()));
        map
    }

    fn add_node(store: &SqliteGraphStore, label: &str, extra: serde_json::Value) -> Uuid {
        let id = Uuid::new_v4();
        block(store.create_node(label, props(id, extra))).unwrap();
        id
    }

    #[test]
    fn test_node_crud() {
        let store = store();
        let id = add_node(&store, "Function", json!({"name": "foo", "deleted": false}));

        let node = block(store.get_node(id, None)).unwrap().unwrap();
        assert_eq!(node.labels, vec!["Function", "Memory"]);
        assert_eq!(node.properties["name"], json!("foo"));

        // Label filter: exact and common label both match, others do not.
        assert!(block(store.get_node(id, Some("Function"))).unwrap().is_some());
        assert!(block(store.get_node(id, Some("Memory"))).unwrap().is_some());
        assert!(block(store.get_node(id, Some("Design"))).unwrap().is_none());

        assert!(block(store.update_node(id, props(id, json!({"deleted": true})), None)).unwrap());
        let node = block(store.get_node(id, None)).unwrap().unwrap();
        assert_eq!(node.properties["deleted"], json!(true));

        assert!(block(store.delete_node(id, None, true)).unwrap());
        assert!(block(store.get_node(id, None)).unwrap().is_none());
    }

    #[test]
    fn test_relationship_requires_endpoints() {
        let store = store();
        let a = add_node(&store, "Function", json!({}));
        let err = block(store.create_relationship(a, Uuid::new_v4(), "CALLS", Payload::new()))
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[test]
    fn test_detach_delete_cascades_edges() {
        let store = store();
        let a = add_node(&store, "Function", json!({}));
        let b = add_node(&store, "Function", json!({}));
        block(store.create_relationship(a, b, "CALLS", Payload::new())).unwrap();

        // Undetached delete refuses while edges exist.
        assert!(block(store.delete_node(b, None, false)).is_err());

        assert!(block(store.delete_node(b, None, true)).unwrap());
        let related = block(store.get_related(a, None, Direction::Both, 1, 10)).unwrap();
        assert!(related.is_empty());
    }

    #[test]
    fn test_get_related_depth_and_types() {
        let store = store();
        let a = add_node(&store, "Component", json!({"name": "a"}));
        let b = add_node(&store, "Function", json!({"name": "b"}));
        let c = add_node(&store, "Function", json!({"name": "c"}));
        block(store.create_relationship(a, b, "IMPLEMENTS", Payload::new())).unwrap();
        block(store.create_relationship(b, c, "CALLS", Payload::new())).unwrap();

        let depth1 = block(store.get_related(a, None, Direction::Outgoing, 1, 10)).unwrap();
        assert_eq!(depth1.len(), 1);
        assert_eq!(depth1[0].id, b);
        assert_eq!(depth1[0].relationship_type, "IMPLEMENTS");

        let depth2 = block(store.get_related(a, None, Direction::Both, 2, 10)).unwrap();
        assert_eq!(depth2.len(), 2);

        let only_calls = block(store.get_related(
            a,
            Some(&["CALLS".to_string()]),
            Direction::Both,
            2,
            10,
        ))
        .unwrap();
        // The CALLS edge hangs off b, which is unreachable when the first
        // hop is restricted to CALLS.
        assert!(only_calls.is_empty());
    }

    #[test]
    fn test_find_path() {
        let store = store();
        let a = add_node(&store, "Requirement", json!({}));
        let b = add_node(&store, "Component", json!({}));
        let c = add_node(&store, "Function", json!({}));
        let lone = add_node(&store, "Session", json!({}));
        block(store.create_relationship(b, a, "IMPLEMENTS", Payload::new())).unwrap();
        block(store.create_relationship(c, b, "DEPENDS_ON", Payload::new())).unwrap();

        let path = block(store.find_path(a, c, None, 5)).unwrap().unwrap();
        assert_eq!(path.len(), 3);
        assert_eq!(path[0].id, a);
        assert_eq!(path[2].id, c);

        assert!(block(store.find_path(a, lone, None, 5)).unwrap().is_none());
    }

    #[test]
    fn test_execute_query_contains_and_params() {
        let store = store();
        add_node(
            &store,
            "Requirement",
            json!({"deleted": false, "content": "authenticate requests", "title": "Auth"}),
        );
        add_node(
            &store,
            "Design",
            json!({"deleted": false, "content": "cache layout", "title": "Cache"}),
        );
        add_node(
            &store,
            "Requirement",
            json!({"deleted": true, "content": "authenticate sessions", "title": "Old auth"}),
        );

        let mut parameters = Payload::new();
        parameters.insert("query".into(), json!("authenticate"));
        parameters.insert("limit".into(), json!(10));

        let rows = block(store.execute_query(
            "MATCH (n:Memory) WHERE n.deleted = false \
             AND (n.content CONTAINS $query OR n.title CONTAINS $query) \
             RETURN n.id AS id, labels(n) AS labels, properties(n) AS properties \
             LIMIT $limit",
            &parameters,
        ))
        .unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["labels"], json!(["Requirement", "Memory"]));
        assert_eq!(rows[0]["properties"]["title"], json!("Auth"));
    }

    #[test]
    fn test_execute_query_count() {
        let store = store();
        add_node(&store, "Function", json!({"deleted": false}));
        add_node(&store, "Function", json!({"deleted": false}));
        add_node(&store, "Design", json!({"deleted": false}));

        let rows = block(store.execute_query(
            "MATCH (n:Function) RETURN count(n) AS total",
            &Payload::new(),
        ))
        .unwrap();
        assert_eq!(rows, vec![{
            let mut m = Payload::new();
            m.insert("total".into(), json!(2));
            m
        }]);
    }

    #[test]
    fn test_count_nodes_with_filter() {
        let store = store();
        add_node(&store, "Function", json!({"deleted": false}));
        add_node(&store, "Function", json!({"deleted": true}));

        let mut filter = Payload::new();
        filter.insert("deleted".into(), json!(false));
        assert_eq!(
            block(store.count_nodes(Some("Function"), Some(&filter))).unwrap(),
            1
        );
        assert_eq!(block(store.count_nodes(None, None)).unwrap(), 2);
    }
}
