//! SQLite-backed graph store.
//!
//! Nodes and edges live in two tables; props are JSON text. Writes touching
//! the same node are serialized by SQLite itself, and update paths re-read
//! the row inside the transaction before writing.

use crate::traits::GraphStore;
use crate::types::{now_millis, EdgeKind, GraphEdge, GraphNode, NodeKind};
use async_trait::async_trait;
use engram_common::{MemoryError, Result};
use rusqlite::{params, Connection};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// SQLite graph backend.
pub struct SqliteGraph {
    db_path: PathBuf,
}

impl SqliteGraph {
    /// Open (and initialize) the graph database under `data_dir`.
    pub fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let db_path = data_dir.join("graph.db");
        let conn = Connection::open(&db_path).map_err(store_err)?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS nodes (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                props TEXT NOT NULL,
                lookup TEXT,
                snippet TEXT NOT NULL DEFAULT '',
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                deleted INTEGER NOT NULL DEFAULT 0,
                superseded INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_nodes_kind ON nodes(kind);
            CREATE INDEX IF NOT EXISTS idx_nodes_lookup ON nodes(kind, lookup);

            CREATE TABLE IF NOT EXISTS edges (
                from_id TEXT NOT NULL,
                to_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                PRIMARY KEY (from_id, to_id, kind)
            );

            CREATE INDEX IF NOT EXISTS idx_edges_to ON edges(to_id);
            "#,
        )
        .map_err(store_err)?;

        Ok(Self { db_path })
    }

    async fn with_conn<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = Connection::open(&db_path).map_err(store_err)?;
            op(&mut conn)
        })
        .await
        .map_err(store_err)?
    }
}

fn store_err(e: impl std::fmt::Display) -> MemoryError {
    MemoryError::store_unavailable("graph", e)
}

fn row_to_node(row: &rusqlite::Row<'_>) -> rusqlite::Result<GraphNode> {
    let id: String = row.get(0)?;
    let kind_str: String = row.get(1)?;
    let props_str: String = row.get(2)?;
    let lookup: Option<String> = row.get(3)?;
    let snippet: String = row.get(4)?;
    let created_at: i64 = row.get(5)?;
    let updated_at: i64 = row.get(6)?;
    let deleted: bool = row.get::<_, i64>(7)? != 0;
    let superseded: bool = row.get::<_, i64>(8)? != 0;

    let kind = NodeKind::parse(&kind_str).unwrap_or(NodeKind::Entity);
    let props = serde_json::from_str(&props_str).unwrap_or_default();

    Ok(GraphNode {
        id,
        kind,
        props,
        lookup,
        snippet,
        created_at,
        updated_at,
        deleted,
        superseded,
    })
}

const NODE_COLUMNS: &str =
    "id, kind, props, lookup, snippet, created_at, updated_at, deleted, superseded";

fn write_node(tx: &rusqlite::Transaction<'_>, node: &GraphNode) -> Result<()> {
    let props = serde_json::to_string(&node.props)?;
    tx.execute(
        r#"
        INSERT INTO nodes (id, kind, props, lookup, snippet, created_at, updated_at, deleted, superseded)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        ON CONFLICT(id) DO UPDATE SET
            props = excluded.props,
            lookup = excluded.lookup,
            snippet = excluded.snippet,
            updated_at = excluded.updated_at,
            deleted = excluded.deleted,
            superseded = excluded.superseded
        "#,
        params![
            node.id,
            node.kind.as_str(),
            props,
            node.lookup,
            node.snippet,
            node.created_at,
            node.updated_at,
            node.deleted as i64,
            node.superseded as i64,
        ],
    )
    .map_err(store_err)?;
    Ok(())
}

fn write_edge(tx: &rusqlite::Transaction<'_>, edge: &GraphEdge) -> Result<()> {
    tx.execute(
        "INSERT OR IGNORE INTO edges (from_id, to_id, kind) VALUES (?1, ?2, ?3)",
        params![edge.from, edge.to, edge.kind.as_str()],
    )
    .map_err(store_err)?;
    Ok(())
}

/// Neighbors of `ids` in either edge direction, as (neighbor, edge kind).
fn adjacent(conn: &Connection, ids: &HashSet<String>) -> Result<Vec<(String, EdgeKind)>> {
    let mut out = Vec::new();
    let mut stmt = conn
        .prepare("SELECT from_id, to_id, kind FROM edges WHERE from_id = ?1 OR to_id = ?1")
        .map_err(store_err)?;
    for id in ids {
        let rows = stmt
            .query_map(params![id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .map_err(store_err)?;
        for row in rows.flatten() {
            let (from, to, kind_str) = row;
            let Some(kind) = EdgeKind::parse(&kind_str) else {
                continue;
            };
            let neighbor = if &from == id { to } else { from };
            out.push((neighbor, kind));
        }
    }
    Ok(out)
}

#[async_trait]
impl GraphStore for SqliteGraph {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn insert(&self, nodes: Vec<GraphNode>, edges: Vec<GraphEdge>) -> Result<()> {
        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(store_err)?;
            for node in &nodes {
                write_node(&tx, node)?;
            }
            for edge in &edges {
                write_edge(&tx, edge)?;
            }
            tx.commit().map_err(store_err)?;
            tracing::debug!(nodes = nodes.len(), edges = edges.len(), "Graph write committed");
            Ok(())
        })
        .await
    }

    async fn get(&self, id: &str) -> Result<Option<GraphNode>> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(&format!("SELECT {NODE_COLUMNS} FROM nodes WHERE id = ?1"))
                .map_err(store_err)?;
            let node = stmt.query_row(params![id], row_to_node).ok();
            Ok(node)
        })
        .await
    }

    async fn update_props(
        &self,
        id: &str,
        props: serde_json::Map<String, serde_json::Value>,
        snippet: Option<String>,
    ) -> Result<()> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(store_err)?;

            // re-read before update
            let existing: Option<String> = tx
                .query_row("SELECT snippet FROM nodes WHERE id = ?1", params![id], |row| {
                    row.get(0)
                })
                .ok();
            let Some(old_snippet) = existing else {
                return Err(MemoryError::NotFound(format!("node {id}")));
            };

            let props_str = serde_json::to_string(&props)?;
            let snippet = snippet.unwrap_or(old_snippet);
            tx.execute(
                "UPDATE nodes SET props = ?2, snippet = ?3, updated_at = ?4 WHERE id = ?1",
                params![id, props_str, snippet, now_millis()],
            )
            .map_err(store_err)?;
            tx.commit().map_err(store_err)?;
            Ok(())
        })
        .await
    }

    async fn set_flags(
        &self,
        ids: &[String],
        deleted: Option<bool>,
        superseded: Option<bool>,
    ) -> Result<()> {
        let ids = ids.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(store_err)?;
            let now = now_millis();
            for id in &ids {
                if let Some(flag) = deleted {
                    tx.execute(
                        "UPDATE nodes SET deleted = ?2, updated_at = ?3 WHERE id = ?1",
                        params![id, flag as i64, now],
                    )
                    .map_err(store_err)?;
                }
                if let Some(flag) = superseded {
                    tx.execute(
                        "UPDATE nodes SET superseded = ?2, updated_at = ?3 WHERE id = ?1",
                        params![id, flag as i64, now],
                    )
                    .map_err(store_err)?;
                }
            }
            tx.commit().map_err(store_err)?;
            Ok(())
        })
        .await
    }

    async fn remove(&self, ids: &[String]) -> Result<()> {
        let ids = ids.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(store_err)?;
            for id in &ids {
                tx.execute("DELETE FROM nodes WHERE id = ?1", params![id])
                    .map_err(store_err)?;
                tx.execute(
                    "DELETE FROM edges WHERE from_id = ?1 OR to_id = ?1",
                    params![id],
                )
                .map_err(store_err)?;
            }
            tx.commit().map_err(store_err)?;
            Ok(())
        })
        .await
    }

    async fn add_edge(&self, edge: GraphEdge) -> Result<()> {
        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(store_err)?;
            write_edge(&tx, &edge)?;
            tx.commit().map_err(store_err)?;
            Ok(())
        })
        .await
    }

    async fn remove_edges(&self, node_id: &str, kind: Option<EdgeKind>) -> Result<()> {
        let node_id = node_id.to_string();
        self.with_conn(move |conn| {
            match kind {
                Some(kind) => conn.execute(
                    "DELETE FROM edges WHERE (from_id = ?1 OR to_id = ?1) AND kind = ?2",
                    params![node_id, kind.as_str()],
                ),
                None => conn.execute(
                    "DELETE FROM edges WHERE from_id = ?1 OR to_id = ?1",
                    params![node_id],
                ),
            }
            .map_err(store_err)?;
            Ok(())
        })
        .await
    }

    async fn find_by_lookup(&self, kind: NodeKind, lookup: &str) -> Result<Option<GraphNode>> {
        let lookup = lookup.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {NODE_COLUMNS} FROM nodes \
                     WHERE kind = ?1 AND lookup = ?2 AND deleted = 0 AND superseded = 0"
                ))
                .map_err(store_err)?;
            let node = stmt
                .query_row(params![kind.as_str(), lookup], row_to_node)
                .ok();
            Ok(node)
        })
        .await
    }

    async fn match_seeds(&self, terms: &[String]) -> Result<Vec<GraphNode>> {
        let terms: Vec<String> = terms.iter().map(|t| t.to_lowercase()).collect();
        self.with_conn(move |conn| {
            let mut seen = HashSet::new();
            let mut seeds = Vec::new();
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {NODE_COLUMNS} FROM nodes \
                     WHERE kind IN ('entity', 'fact') AND deleted = 0 AND superseded = 0 \
                     AND lower(snippet) LIKE ?1"
                ))
                .map_err(store_err)?;
            for term in &terms {
                let pattern = format!("%{term}%");
                let rows = stmt.query_map(params![pattern], row_to_node).map_err(store_err)?;
                for node in rows.flatten() {
                    if seen.insert(node.id.clone()) {
                        seeds.push(node);
                    }
                }
            }
            Ok(seeds)
        })
        .await
    }

    async fn neighborhood(&self, seeds: &[String], max_hops: u32) -> Result<Vec<(GraphNode, u32)>> {
        let seeds = seeds.to_vec();
        self.with_conn(move |conn| {
            let mut visited: HashMap<String, u32> = HashMap::new();
            let mut frontier: HashSet<String> = seeds.into_iter().collect();
            for id in &frontier {
                visited.insert(id.clone(), 0);
            }

            for hop in 1..=max_hops {
                if frontier.is_empty() {
                    break;
                }
                let mut next = HashSet::new();
                for (neighbor, _kind) in adjacent(conn, &frontier)? {
                    if !visited.contains_key(&neighbor) {
                        visited.insert(neighbor.clone(), hop);
                        next.insert(neighbor);
                    }
                }
                frontier = next;
            }

            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {NODE_COLUMNS} FROM nodes WHERE id = ?1 AND deleted = 0"
                ))
                .map_err(store_err)?;
            let mut out = Vec::with_capacity(visited.len());
            for (id, hops) in visited {
                if let Ok(node) = stmt.query_row(params![id], row_to_node) {
                    out.push((node, hops));
                }
            }
            Ok(out)
        })
        .await
    }

    async fn descendants(&self, root: &str) -> Result<Vec<GraphNode>> {
        let root = root.to_string();
        self.with_conn(move |conn| {
            let mut collected: Vec<String> = Vec::new();
            let mut seen: HashSet<String> = HashSet::from([root.clone()]);
            let mut frontier: HashSet<String> = HashSet::from([root]);

            let mut stmt = conn
                .prepare("SELECT to_id, kind FROM edges WHERE from_id = ?1")
                .map_err(store_err)?;
            while !frontier.is_empty() {
                let mut next = HashSet::new();
                for id in &frontier {
                    let rows = stmt
                        .query_map(params![id], |row| {
                            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                        })
                        .map_err(store_err)?;
                    for (child, kind_str) in rows.flatten() {
                        let is_containment = EdgeKind::parse(&kind_str)
                            .is_some_and(EdgeKind::is_containment);
                        if is_containment && seen.insert(child.clone()) {
                            collected.push(child.clone());
                            next.insert(child);
                        }
                    }
                }
                frontier = next;
            }

            let mut node_stmt = conn
                .prepare(&format!("SELECT {NODE_COLUMNS} FROM nodes WHERE id = ?1"))
                .map_err(store_err)?;
            let mut out = Vec::with_capacity(collected.len());
            for id in collected {
                if let Ok(node) = node_stmt.query_row(params![id], row_to_node) {
                    out.push(node);
                }
            }
            Ok(out)
        })
        .await
    }

    async fn count(&self, kind: Option<NodeKind>) -> Result<usize> {
        self.with_conn(move |conn| {
            let count: i64 = match kind {
                Some(kind) => conn.query_row(
                    "SELECT COUNT(*) FROM nodes WHERE kind = ?1 AND deleted = 0",
                    params![kind.as_str()],
                    |row| row.get(0),
                ),
                None => conn.query_row(
                    "SELECT COUNT(*) FROM nodes WHERE deleted = 0",
                    [],
                    |row| row.get(0),
                ),
            }
            .map_err(store_err)?;
            Ok(count as usize)
        })
        .await
    }

    async fn list(&self, kind: NodeKind, limit: usize) -> Result<Vec<GraphNode>> {
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {NODE_COLUMNS} FROM nodes \
                     WHERE kind = ?1 AND deleted = 0 AND superseded = 0 \
                     ORDER BY updated_at DESC LIMIT ?2"
                ))
                .map_err(store_err)?;
            let rows = stmt
                .query_map(params![kind.as_str(), limit as i64], row_to_node)
                .map_err(store_err)?;
            Ok(rows.flatten().collect())
        })
        .await
    }

    async fn health_check(&self) -> bool {
        self.with_conn(|conn| {
            conn.execute_batch("SELECT 1").map_err(store_err)?;
            Ok(())
        })
        .await
        .is_ok()
    }
}
