//! SQLite implementation of [`GraphBackend`].
//!
//! [`SqliteBackend`] persists twin graphs in a SQLite database with WAL
//! mode, explicit transactions on every write, and automatic schema
//! migrations. Property maps are stored as JSON TEXT columns via
//! serde_json. The connection is mutex-guarded, so write transactions are
//! serialised and reads observe a quiescent view.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use rusqlite::{params, Connection};

use doppel_core::registry::CONTENT_ADDRESS_KEY;
use doppel_core::{NodeHash, PropertyMap, RawNode};

use crate::error::BackendError;
use crate::schema;
use crate::sweep::{collect_assemblies, NodeKey};
use crate::traits::{
    AssemblyRecord, GraphBackend, NodeSelector, ReadTransaction, RetractOutcome, WriteTransaction,
};

/// SQLite-backed implementation of [`GraphBackend`].
pub struct SqliteBackend {
    conn: Mutex<Connection>,
    depth_bound: usize,
}

impl SqliteBackend {
    /// Opens (or creates) a SQLite database at `path`.
    pub fn open(path: &str) -> Result<Self, BackendError> {
        Ok(SqliteBackend {
            conn: Mutex::new(schema::open_database(path)?),
            depth_bound: crate::memory::DEFAULT_DEPTH_BOUND,
        })
    }

    /// Opens an in-memory SQLite database (for testing).
    pub fn in_memory() -> Result<Self, BackendError> {
        Ok(SqliteBackend {
            conn: Mutex::new(schema::open_in_memory()?),
            depth_bound: crate::memory::DEFAULT_DEPTH_BOUND,
        })
    }

    /// Replaces the sweep depth bound.
    pub fn with_depth_bound(mut self, depth_bound: usize) -> Self {
        self.depth_bound = depth_bound;
        self
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("sqlite connection poisoned")
    }
}

/// Upserts one node row, creating it with fresh timestamps or refreshing
/// its properties and `modified_at`.
fn exec_assert_node(conn: &Connection, node: &RawNode) -> Result<u64, BackendError> {
    let props = serde_json::to_string(&node.props)?;
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO nodes (label, content_address, props, created_at, modified_at)
         VALUES (?1, ?2, ?3, ?4, ?4)
         ON CONFLICT(label, content_address)
         DO UPDATE SET props = excluded.props, modified_at = excluded.modified_at",
        params![node.label, node.content_address.to_hex(), props, now],
    )?;
    Ok(conn.changes() as u64)
}

fn row_to_raw_node(
    label: String,
    address: String,
    props_json: String,
    created_at: String,
    modified_at: String,
) -> Result<RawNode, BackendError> {
    let props: PropertyMap = serde_json::from_str(&props_json)?;
    let mut metadata = PropertyMap::new();
    metadata.insert(CONTENT_ADDRESS_KEY, address.clone());
    metadata.insert("_created_at", created_at);
    metadata.insert("_last_modified", modified_at);
    Ok(RawNode {
        label,
        content_address: NodeHash::from_hex(&address).map_err(doppel_core::CodecError::from)?,
        props,
        metadata,
    })
}

fn load_raw_node(conn: &Connection, key: &NodeKey) -> Result<RawNode, BackendError> {
    let (props, created_at, modified_at) = conn.query_row(
        "SELECT props, created_at, modified_at FROM nodes WHERE label = ?1 AND content_address = ?2",
        params![key.label, key.address],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        },
    )?;
    row_to_raw_node(
        key.label.clone(),
        key.address.clone(),
        props,
        created_at,
        modified_at,
    )
}

/// Loads the nodes at the far end of the edges matched by `sql`.
fn select_adjacent<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> Result<Vec<RawNode>, BackendError> {
    let mut stmt = conn.prepare_cached(sql)?;
    let rows = stmt.query_map(params, |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, String>(4)?,
        ))
    })?;

    let mut adjacent = Vec::new();
    for row in rows {
        let (label, address, props, created_at, modified_at) = row?;
        adjacent.push(row_to_raw_node(label, address, props, created_at, modified_at)?);
    }
    Ok(adjacent)
}

struct SqliteWriteTx<'a> {
    conn: MutexGuard<'a, Connection>,
    open: bool,
}

impl SqliteWriteTx<'_> {
    fn finish(&mut self, statement: &str) -> Result<(), BackendError> {
        if self.open {
            self.open = false;
            self.conn.execute_batch(statement)?;
        }
        Ok(())
    }
}

impl Drop for SqliteWriteTx<'_> {
    fn drop(&mut self) {
        if self.open {
            let _ = self.conn.execute_batch("ROLLBACK");
        }
    }
}

impl WriteTransaction for SqliteWriteTx<'_> {
    fn assert_node(&mut self, node: &RawNode) -> Result<u64, BackendError> {
        exec_assert_node(&self.conn, node)
    }

    fn retract_node(&mut self, node: &RawNode) -> Result<RetractOutcome, BackendError> {
        let address = node.content_address.to_hex();

        let adjacent = select_adjacent(
            &self.conn,
            "SELECT DISTINCT n.label, n.content_address, n.props, n.created_at, n.modified_at
             FROM nodes n
             JOIN edges e
               ON (e.to_label = n.label AND e.to_address = n.content_address
                   AND e.from_label = ?1 AND e.from_address = ?2)
               OR (e.from_label = n.label AND e.from_address = n.content_address
                   AND e.to_label = ?1 AND e.to_address = ?2)",
            params![node.label, address],
        )?;

        self.conn.execute(
            "DELETE FROM edges
             WHERE (from_label = ?1 AND from_address = ?2)
                OR (to_label = ?1 AND to_address = ?2)",
            params![node.label, address],
        )?;
        self.conn.execute(
            "DELETE FROM nodes WHERE label = ?1 AND content_address = ?2",
            params![node.label, address],
        )?;

        Ok(RetractOutcome {
            affected: self.conn.changes() as u64,
            adjacent,
        })
    }

    fn assert_edge(&mut self, from: &RawNode, to: &RawNode) -> Result<u64, BackendError> {
        exec_assert_node(&self.conn, from)?;
        exec_assert_node(&self.conn, to)?;

        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO edges (from_label, from_address, to_label, to_address, created_at, modified_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)
             ON CONFLICT(from_label, from_address, to_label, to_address)
             DO UPDATE SET modified_at = excluded.modified_at",
            params![
                from.label,
                from.content_address.to_hex(),
                to.label,
                to.content_address.to_hex(),
                now
            ],
        )?;
        Ok(self.conn.changes() as u64)
    }

    fn retract_edges(
        &mut self,
        node: &RawNode,
        target_label: &str,
    ) -> Result<RetractOutcome, BackendError> {
        let address = node.content_address.to_hex();

        let adjacent = select_adjacent(
            &self.conn,
            "SELECT DISTINCT n.label, n.content_address, n.props, n.created_at, n.modified_at
             FROM nodes n
             JOIN edges e
               ON (e.to_label = n.label AND e.to_address = n.content_address
                   AND e.from_label = ?1 AND e.from_address = ?2 AND e.to_label = ?3)
               OR (e.from_label = n.label AND e.from_address = n.content_address
                   AND e.to_label = ?1 AND e.to_address = ?2 AND e.from_label = ?3)",
            params![node.label, address, target_label],
        )?;

        let affected = self.conn.execute(
            "DELETE FROM edges
             WHERE (from_label = ?1 AND from_address = ?2 AND to_label = ?3)
                OR (to_label = ?1 AND to_address = ?2 AND from_label = ?3)",
            params![node.label, address, target_label],
        )?;

        Ok(RetractOutcome {
            affected: affected as u64,
            adjacent,
        })
    }

    fn commit(mut self: Box<Self>) -> Result<(), BackendError> {
        self.finish("COMMIT")
    }

    fn rollback(mut self: Box<Self>) -> Result<(), BackendError> {
        self.finish("ROLLBACK")
    }
}

struct SqliteReadTx<'a> {
    conn: MutexGuard<'a, Connection>,
    depth_bound: usize,
    open: bool,
}

impl Drop for SqliteReadTx<'_> {
    fn drop(&mut self) {
        if self.open {
            let _ = self.conn.execute_batch("COMMIT");
        }
    }
}

impl ReadTransaction for SqliteReadTx<'_> {
    fn fetch_assemblies(
        &mut self,
        seed: Option<&NodeSelector>,
    ) -> Result<Vec<AssemblyRecord>, BackendError> {
        let mut nodes: BTreeSet<NodeKey> = BTreeSet::new();
        {
            let mut stmt = self
                .conn
                .prepare_cached("SELECT label, content_address FROM nodes")?;
            let rows = stmt.query_map([], |row| {
                Ok(NodeKey {
                    label: row.get(0)?,
                    address: row.get(1)?,
                })
            })?;
            for row in rows {
                nodes.insert(row?);
            }
        }

        let mut out_edges: BTreeMap<NodeKey, BTreeSet<NodeKey>> = BTreeMap::new();
        {
            let mut stmt = self.conn.prepare_cached(
                "SELECT from_label, from_address, to_label, to_address FROM edges",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    NodeKey {
                        label: row.get(0)?,
                        address: row.get(1)?,
                    },
                    NodeKey {
                        label: row.get(2)?,
                        address: row.get(3)?,
                    },
                ))
            })?;
            for row in rows {
                let (from, to) = row?;
                out_edges.entry(from).or_default().insert(to);
            }
        }

        let seed_key = seed.map(|s| NodeKey {
            label: s.label.clone(),
            address: s.content_address.to_hex(),
        });

        let conn = &*self.conn;
        let mut cache: HashMap<NodeKey, RawNode> = HashMap::new();
        collect_assemblies(
            &nodes,
            &out_edges,
            seed_key.as_ref(),
            self.depth_bound,
            &mut |key| {
                if let Some(node) = cache.get(key) {
                    return Ok(node.clone());
                }
                let node = load_raw_node(conn, key)?;
                cache.insert(key.clone(), node.clone());
                Ok(node)
            },
        )
    }
}

impl GraphBackend for SqliteBackend {
    fn write(&self) -> Result<Box<dyn WriteTransaction + '_>, BackendError> {
        let conn = self.lock();
        conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(Box::new(SqliteWriteTx { conn, open: true }))
    }

    fn read(&self) -> Result<Box<dyn ReadTransaction + '_>, BackendError> {
        let conn = self.lock();
        conn.execute_batch("BEGIN")?;
        Ok(Box::new(SqliteReadTx {
            conn,
            depth_bound: self.depth_bound,
            open: true,
        }))
    }

    fn bootstrap(&self, labels: &[String]) -> Result<(), BackendError> {
        let conn = self.lock();
        for label in labels {
            // The label is interpolated into the index name and predicate,
            // so restrict it to identifier characters.
            if !label
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
            {
                return Err(BackendError::Integrity(format!(
                    "label {label:?} is not a valid identifier"
                )));
            }
            conn.execute_batch(&format!(
                "CREATE UNIQUE INDEX IF NOT EXISTS \"uniq_address_{label}\"
                 ON nodes(content_address) WHERE label = '{label}'"
            ))?;
        }
        Ok(())
    }

    fn rewrite_wrapped_content_addresses(&self) -> Result<u64, BackendError> {
        let conn = self.lock();
        conn.execute_batch("BEGIN IMMEDIATE")?;

        let result = (|| -> Result<u64, BackendError> {
            // The textual form wraps the bare hex as node(<hex>); strip the
            // surrounding wrapper in place.
            let mut rewritten = conn.execute(
                "UPDATE nodes
                 SET content_address = substr(content_address, 6, length(content_address) - 6)
                 WHERE content_address LIKE 'node(%)'",
                [],
            )?;
            rewritten += conn.execute(
                "UPDATE edges
                 SET from_address = substr(from_address, 6, length(from_address) - 6)
                 WHERE from_address LIKE 'node(%)'",
                [],
            )?;
            rewritten += conn.execute(
                "UPDATE edges
                 SET to_address = substr(to_address, 6, length(to_address) - 6)
                 WHERE to_address LIKE 'node(%)'",
                [],
            )?;
            Ok(rewritten as u64)
        })();

        match result {
            Ok(count) => {
                conn.execute_batch("COMMIT")?;
                tracing::debug!(count, "rewrote wrapped content addresses");
                Ok(count)
            }
            Err(err) => {
                let _ = conn.execute_batch("ROLLBACK");
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(label: &str, b: u8) -> RawNode {
        RawNode {
            label: label.to_string(),
            content_address: NodeHash::from([b; 20]),
            props: PropertyMap::new(),
            metadata: PropertyMap::new(),
        }
    }

    #[test]
    fn committed_writes_are_visible_to_readers() {
        let backend = SqliteBackend::in_memory().unwrap();

        let mut tx = backend.write().unwrap();
        assert_eq!(tx.assert_node(&raw("A", 1)).unwrap(), 1);
        tx.commit().unwrap();

        let mut read = backend.read().unwrap();
        let records = read.fetch_assemblies(None).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].root.label, "A");
        assert!(records[0].root.metadata.contains_key("_created_at"));
    }

    #[test]
    fn rollback_discards_writes() {
        let backend = SqliteBackend::in_memory().unwrap();

        let mut tx = backend.write().unwrap();
        tx.assert_node(&raw("A", 1)).unwrap();
        tx.rollback().unwrap();

        let mut read = backend.read().unwrap();
        assert!(read.fetch_assemblies(None).unwrap().is_empty());
    }

    #[test]
    fn dropped_transactions_roll_back() {
        let backend = SqliteBackend::in_memory().unwrap();
        {
            let mut tx = backend.write().unwrap();
            tx.assert_node(&raw("A", 1)).unwrap();
        }
        let mut read = backend.read().unwrap();
        assert!(read.fetch_assemblies(None).unwrap().is_empty());
    }

    #[test]
    fn assert_edge_creates_both_endpoints() {
        let backend = SqliteBackend::in_memory().unwrap();

        let mut tx = backend.write().unwrap();
        assert_eq!(tx.assert_edge(&raw("A", 1), &raw("B", 2)).unwrap(), 1);
        tx.commit().unwrap();

        let mut read = backend.read().unwrap();
        let records = read.fetch_assemblies(None).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].tuples.len(), 1);
        let tuple = &records[0].tuples[0];
        assert_eq!(tuple.from.as_ref().unwrap().label, "A");
        assert_eq!(tuple.to.as_ref().unwrap().label, "B");
    }

    #[test]
    fn retract_node_removes_incident_edges_and_reports_neighbours() {
        let backend = SqliteBackend::in_memory().unwrap();

        let mut tx = backend.write().unwrap();
        tx.assert_edge(&raw("A", 1), &raw("B", 2)).unwrap();
        tx.assert_edge(&raw("B", 2), &raw("C", 3)).unwrap();
        tx.commit().unwrap();

        let mut tx = backend.write().unwrap();
        let outcome = tx.retract_node(&raw("B", 2)).unwrap();
        tx.commit().unwrap();

        assert_eq!(outcome.affected, 1);
        let mut labels: Vec<&str> = outcome.adjacent.iter().map(|n| n.label.as_str()).collect();
        labels.sort();
        assert_eq!(labels, vec!["A", "C"]);

        let mut read = backend.read().unwrap();
        let records = read.fetch_assemblies(None).unwrap();
        // A and C survive as isolated roots.
        assert_eq!(records.len(), 2);
        for record in &records {
            assert!(record.tuples[0].from.is_none());
        }
    }

    #[test]
    fn retract_edges_scopes_by_label_and_direction_insensitivity() {
        let backend = SqliteBackend::in_memory().unwrap();

        let mut tx = backend.write().unwrap();
        tx.assert_edge(&raw("A", 1), &raw("B", 2)).unwrap();
        tx.assert_edge(&raw("C", 3), &raw("A", 1)).unwrap();
        tx.commit().unwrap();

        let mut tx = backend.write().unwrap();
        let outcome = tx.retract_edges(&raw("A", 1), "C").unwrap();
        assert_eq!(outcome.affected, 1);
        assert_eq!(outcome.adjacent[0].label, "C");
        let outcome = tx.retract_edges(&raw("A", 1), "Z").unwrap();
        assert_eq!(outcome.affected, 0);
        tx.commit().unwrap();
    }

    #[test]
    fn bootstrap_enforces_per_label_address_uniqueness() {
        let backend = SqliteBackend::in_memory().unwrap();
        backend
            .bootstrap(&["A".to_string(), "B".to_string()])
            .unwrap();
        // Idempotent.
        backend.bootstrap(&["A".to_string()]).unwrap();

        assert!(matches!(
            backend.bootstrap(&["bad-label".to_string()]),
            Err(BackendError::Integrity(_))
        ));
    }

    #[test]
    fn rewrite_unwraps_legacy_addresses() {
        let backend = SqliteBackend::in_memory().unwrap();
        let bare = NodeHash::from([7; 20]).to_hex();

        {
            let conn = backend.lock();
            conn.execute(
                "INSERT INTO nodes (label, content_address, props, created_at, modified_at)
                 VALUES ('A', ?1, '{}', '2020-01-01T00:00:00Z', '2020-01-01T00:00:00Z')",
                params![format!("node({bare})")],
            )
            .unwrap();
        }

        assert_eq!(backend.rewrite_wrapped_content_addresses().unwrap(), 1);
        assert_eq!(backend.rewrite_wrapped_content_addresses().unwrap(), 0);

        let mut read = backend.read().unwrap();
        let records = read.fetch_assemblies(None).unwrap();
        assert_eq!(records[0].root.content_address.to_hex(), bare);
    }
}
