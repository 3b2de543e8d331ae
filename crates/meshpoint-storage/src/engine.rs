//! Store lifecycle: database open, tree handles, root bootstrap.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use meshpoint_types::{node_type, MeshpointError, Result};

use crate::tree::Tree;

// ---------------------------------------------------------------------------
// Keyspace
// ---------------------------------------------------------------------------

/// Tree of node metadata: `<id>` → [`NodeMeta`].
const TREE_NODES: &str = "nodes";
/// Tree of latest points: `<nodeID>/<type>/<key>` → `Point`.
const TREE_POINTS: &str = "points";
/// Tree of relations: `<parentID>/<childID>` → [`EdgeMeta`].
const TREE_EDGES: &str = "edges";
/// Tree of latest edge points: `<parentID>/<childID>/<type>/<key>` → `Point`.
const TREE_EDGE_POINTS: &str = "edgePoints";
/// Reverse index: `<childID>/<parentID>` → `()`.
const TREE_EDGES_BY_CHILD: &str = "edgesByChild";
/// Singleton metadata tree.
const TREE_META: &str = "meta";

/// Key of the root node id in the meta tree.
const META_ROOT_ID: &str = "rootID";

// ---------------------------------------------------------------------------
// Stored records
// ---------------------------------------------------------------------------

/// Node metadata record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct NodeMeta {
    /// Type discriminator.
    pub typ: String,
    /// Creation time of the record.
    pub created: DateTime<Utc>,
}

/// Edge existence record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct EdgeMeta {
    /// Creation time of the relation; orders primary-parent selection.
    pub created: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// StoreEngine
// ---------------------------------------------------------------------------

/// The persistent node store.
///
/// Owns the sled database and one typed tree per keyspace. Opening is
/// idempotent: the first open of a data directory bootstraps the
/// singular root node under the sentinel parent `"root"`.
pub struct StoreEngine {
    db: sled::Db,
    pub(crate) nodes: Tree<NodeMeta>,
    pub(crate) points: Tree<meshpoint_types::Point>,
    pub(crate) edges: Tree<EdgeMeta>,
    pub(crate) edge_points: Tree<meshpoint_types::Point>,
    pub(crate) edges_by_child: Tree<()>,
    root_id: String,
}

impl StoreEngine {
    /// Opens (or creates) the store at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let db = sled::open(path).map_err(|e| MeshpointError::Storage {
            reason: format!("failed to open database at {}: {e}", path.display()),
        })?;

        let nodes = Tree::new(open_tree(&db, TREE_NODES)?);
        let points = Tree::new(open_tree(&db, TREE_POINTS)?);
        let edges = Tree::new(open_tree(&db, TREE_EDGES)?);
        let edge_points = Tree::new(open_tree(&db, TREE_EDGE_POINTS)?);
        let edges_by_child = Tree::new(open_tree(&db, TREE_EDGES_BY_CHILD)?);
        let meta = open_tree(&db, TREE_META)?;

        let root_id = match meta.get(META_ROOT_ID).map_err(|e| MeshpointError::Storage {
            reason: format!("failed to read root id: {e}"),
        })? {
            Some(raw) => String::from_utf8_lossy(&raw).to_string(),
            None => {
                let id = uuid::Uuid::new_v4().to_string();
                nodes.insert(
                    &id,
                    &NodeMeta {
                        typ: node_type::DEVICE.to_string(),
                        created: Utc::now(),
                    },
                )?;
                edges.insert(
                    &crate::nodes::edge_key(meshpoint_types::node::ROOT_PARENT, &id),
                    &EdgeMeta {
                        created: Utc::now(),
                    },
                )?;
                edges_by_child.insert(
                    &crate::nodes::child_index_key(&id, meshpoint_types::node::ROOT_PARENT),
                    &(),
                )?;
                meta.insert(META_ROOT_ID, id.as_bytes())
                    .map_err(|e| MeshpointError::Storage {
                        reason: format!("failed to persist root id: {e}"),
                    })?;
                tracing::info!(root = %id, "bootstrapped new store");
                id
            }
        };

        Ok(Self {
            db,
            nodes,
            points,
            edges,
            edge_points,
            edges_by_child,
            root_id,
        })
    }

    /// Id of the singular root node.
    pub fn root_id(&self) -> &str {
        &self.root_id
    }

    /// Flushes buffered writes to disk.
    pub fn flush(&self) -> Result<()> {
        self.db.flush().map_err(|e| MeshpointError::Storage {
            reason: format!("flush failed: {e}"),
        })?;
        Ok(())
    }
}

fn open_tree(db: &sled::Db, name: &str) -> Result<sled::Tree> {
    db.open_tree(name).map_err(|e| MeshpointError::Storage {
        reason: format!("failed to open tree {name}: {e}"),
    })
}
