//! Node store operations: merge, read, traversal.
//!
//! Merge rules (both node and edge points): a slot identified by
//! `(type, key)` is replaced only by a point with a strictly greater
//! time; an equal or older time keeps the stored point, which makes
//! replays idempotent.

use std::collections::{HashSet, VecDeque};

use chrono::Utc;

use meshpoint_types::node::ROOT_PARENT;
use meshpoint_types::{
    node_type, point, point_type, Edge, MeshpointError, Node, NodeEdge, Point, Result, User,
};

use crate::engine::{EdgeMeta, NodeMeta, StoreEngine};

// ---------------------------------------------------------------------------
// Key builders
// ---------------------------------------------------------------------------

pub(crate) fn point_key(node_id: &str, typ: &str, key: &str) -> String {
    format!("{node_id}/{typ}/{key}")
}

pub(crate) fn edge_key(parent_id: &str, child_id: &str) -> String {
    format!("{parent_id}/{child_id}")
}

pub(crate) fn edge_point_key(parent_id: &str, child_id: &str, typ: &str, key: &str) -> String {
    format!("{parent_id}/{child_id}/{typ}/{key}")
}

pub(crate) fn child_index_key(child_id: &str, parent_id: &str) -> String {
    format!("{child_id}/{parent_id}")
}

// ---------------------------------------------------------------------------
// Merge operations
// ---------------------------------------------------------------------------

impl StoreEngine {
    /// Merges a point batch into a node, creating the node record on
    /// first write.
    ///
    /// A created node takes its type from a co-submitted `nodeType`
    /// point; absent that, `device` (transports routinely announce
    /// hardware before anything has described it).
    pub fn merge_points(&self, node_id: &str, points: &[Point]) -> Result<()> {
        if node_id.is_empty() {
            return Err(MeshpointError::Decode {
                reason: "empty node id in point write".into(),
            });
        }

        if self.nodes.get(node_id)?.is_none() {
            let typ = point::find_text(points, point_type::NODE_TYPE);
            let typ = if typ.is_empty() {
                node_type::DEVICE.to_string()
            } else {
                typ
            };
            self.nodes.insert(
                node_id,
                &NodeMeta {
                    typ,
                    created: Utc::now(),
                },
            )?;
        }

        for p in points {
            let key = point_key(node_id, &p.typ, &p.key);
            let replace = match self.points.get(&key)? {
                Some(existing) => p.time > existing.time,
                None => true,
            };
            if replace {
                self.points.insert(&key, p)?;
            }
        }

        Ok(())
    }

    /// Merges an edge point batch into the `parent_id`→`child_id`
    /// relation, creating the relation on first write.
    ///
    /// Fails with [`MeshpointError::Cycle`] when a new relation would
    /// make `parent_id` its own descendant, and with
    /// [`MeshpointError::NotFound`] when either endpoint is missing.
    /// Tombstone points against the root's sentinel edge are refused —
    /// the root cannot be deleted.
    pub fn merge_edge_points(
        &self,
        child_id: &str,
        parent_id: &str,
        points: &[Point],
    ) -> Result<()> {
        if child_id.is_empty() || parent_id.is_empty() {
            return Err(MeshpointError::Decode {
                reason: "empty node id in edge point write".into(),
            });
        }

        if child_id == self.root_id() || parent_id == ROOT_PARENT {
            let deletes = points
                .iter()
                .any(|p| p.typ == point_type::TOMBSTONE && p.value != 0.0);
            if deletes {
                return Err(MeshpointError::Decode {
                    reason: "the root node cannot be deleted".into(),
                });
            }
        }

        if self.nodes.get(child_id)?.is_none() {
            return Err(MeshpointError::NotFound {
                reason: format!("edge child {child_id}"),
            });
        }
        if parent_id != ROOT_PARENT && self.nodes.get(parent_id)?.is_none() {
            return Err(MeshpointError::NotFound {
                reason: format!("edge parent {parent_id}"),
            });
        }

        let key = edge_key(parent_id, child_id);
        if !self.edges.contains_key(&key)? {
            self.check_cycle(parent_id, child_id)?;
            self.edges.insert(
                &key,
                &EdgeMeta {
                    created: Utc::now(),
                },
            )?;
            self.edges_by_child
                .insert(&child_index_key(child_id, parent_id), &())?;
        }

        for p in points {
            let key = edge_point_key(parent_id, child_id, &p.typ, &p.key);
            let replace = match self.edge_points.get(&key)? {
                Some(existing) => p.time > existing.time,
                None => true,
            };
            if replace {
                self.edge_points.insert(&key, p)?;
            }
        }

        Ok(())
    }

    /// Rejects a proposed `parent`→`child` edge when `parent` is
    /// reachable *downward* from `child` (or is `child` itself).
    ///
    /// Tombstoned edges count: undeleting one later must not be able
    /// to close a cycle.
    fn check_cycle(&self, parent_id: &str, child_id: &str) -> Result<()> {
        if parent_id == child_id {
            return Err(MeshpointError::Cycle {
                reason: format!("{child_id} cannot be its own parent"),
            });
        }
        if parent_id == ROOT_PARENT {
            return Ok(());
        }

        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([child_id.to_string()]);

        while let Some(current) = queue.pop_front() {
            if !visited.insert(current.clone()) {
                continue;
            }
            for child in self.child_edges(&current)? {
                if child == parent_id {
                    return Err(MeshpointError::Cycle {
                        reason: format!("{parent_id} is downstream of {child_id}"),
                    });
                }
                queue.push_back(child);
            }
        }

        Ok(())
    }

    /// Child ids under a parent, in edge-key order.
    fn child_edges(&self, parent_id: &str) -> Result<Vec<String>> {
        let prefix = format!("{parent_id}/");
        let entries = self.edges.scan_prefix(&prefix)?;
        Ok(entries
            .into_iter()
            .map(|(key, _)| key[prefix.len()..].to_string())
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Read operations
// ---------------------------------------------------------------------------

impl StoreEngine {
    /// Reads a node with its merged points.
    pub fn node(&self, id: &str) -> Result<Node> {
        let meta = self.nodes.get(id)?.ok_or_else(|| MeshpointError::NotFound {
            reason: format!("node {id}"),
        })?;

        let mut points: Vec<Point> = self
            .points
            .scan_prefix(&format!("{id}/"))?
            .into_iter()
            .map(|(_, p)| p)
            .collect();
        point::sort(&mut points);

        Ok(Node {
            id: id.to_string(),
            typ: meta.typ,
            points,
        })
    }

    /// Edge points of the `parent`→`child` relation.
    fn edge_points_vec(&self, parent_id: &str, child_id: &str) -> Result<Vec<Point>> {
        let mut points: Vec<Point> = self
            .edge_points
            .scan_prefix(&format!("{parent_id}/{child_id}/"))?
            .into_iter()
            .map(|(_, p)| p)
            .collect();
        point::sort(&mut points);
        Ok(points)
    }

    /// A node viewed through one parent edge.
    fn build_node_edge(&self, id: &str, parent_id: &str) -> Result<NodeEdge> {
        let node = self.node(id)?;
        let edge_points = self.edge_points_vec(parent_id, id)?;
        Ok(node.to_node_edge(parent_id, edge_points))
    }

    /// Reads per-edge views of a node.
    ///
    /// - `parent == "all"` — one view per parent edge (tombstoned
    ///   included; the caller filters).
    /// - `parent == ""` — the primary parent: the most recently
    ///   created non-tombstoned edge.
    /// - otherwise — the view through that specific parent.
    pub fn node_edge(&self, id: &str, parent: &str) -> Result<Vec<NodeEdge>> {
        match parent {
            "all" => {
                let parents = self.parent_ids(id)?;
                if parents.is_empty() {
                    return Ok(vec![self.node(id)?.to_node_edge("", Vec::new())]);
                }
                parents
                    .iter()
                    .map(|p| self.build_node_edge(id, p))
                    .collect()
            }
            "" => {
                let primary = self.primary_parent(id)?;
                match primary {
                    Some(p) => Ok(vec![self.build_node_edge(id, &p)?]),
                    None => Ok(vec![self.node(id)?.to_node_edge("", Vec::new())]),
                }
            }
            specific => {
                if !self.edges.contains_key(&edge_key(specific, id))? {
                    return Err(MeshpointError::NotFound {
                        reason: format!("edge {specific}->{id}"),
                    });
                }
                Ok(vec![self.build_node_edge(id, specific)?])
            }
        }
    }

    /// Parent ids of a node, in index order.
    fn parent_ids(&self, id: &str) -> Result<Vec<String>> {
        let prefix = format!("{id}/");
        Ok(self
            .edges_by_child
            .scan_prefix(&prefix)?
            .into_iter()
            .map(|(key, _)| key[prefix.len()..].to_string())
            .collect())
    }

    /// The most recently created non-tombstoned parent edge, falling
    /// back to any parent when all are tombstoned.
    fn primary_parent(&self, id: &str) -> Result<Option<String>> {
        let parents = self.parent_ids(id)?;
        let mut best: Option<(chrono::DateTime<Utc>, String)> = None;
        for p in &parents {
            let Some(meta) = self.edges.get(&edge_key(p, id))? else {
                continue;
            };
            let edge = Edge {
                up: p.clone(),
                down: id.to_string(),
                points: self.edge_points_vec(p, id)?,
            };
            if edge.is_tombstone() {
                continue;
            }
            if best.as_ref().map(|(t, _)| meta.created > *t).unwrap_or(true) {
                best = Some((meta.created, p.clone()));
            }
        }
        Ok(best.map(|(_, p)| p).or_else(|| parents.first().cloned()))
    }

    /// Breadth-first descendant enumeration.
    ///
    /// One view is returned per parent edge encountered, so a
    /// multi-parent child can appear more than once (callers that
    /// care deduplicate by node id). Children behind tombstoned edges
    /// are omitted and not traversed unless `include_tombstoned`.
    /// When `type_filter` is non-empty only matching nodes are
    /// *returned*, but traversal continues through non-matching ones
    /// when `recursive`. Each node's children are scanned at most
    /// once — the visited set doubles as the cycle guard.
    pub fn descendants(
        &self,
        id: &str,
        type_filter: &str,
        recursive: bool,
        include_tombstoned: bool,
    ) -> Result<Vec<NodeEdge>> {
        let mut out = Vec::new();
        let mut visited = HashSet::from([id.to_string()]);
        let mut queue = VecDeque::from([id.to_string()]);

        while let Some(current) = queue.pop_front() {
            for child in self.child_edges(&current)? {
                let view = self.build_node_edge(&child, &current)?;
                if view.is_tombstone() && !include_tombstoned {
                    continue;
                }
                if type_filter.is_empty() || view.typ == type_filter {
                    out.push(view);
                }
                if recursive && visited.insert(child.clone()) {
                    queue.push_back(child);
                }
            }
        }

        Ok(out)
    }

    /// Parent edges of a node.
    pub fn edges_up(&self, id: &str, include_tombstoned: bool) -> Result<Vec<Edge>> {
        let mut out = Vec::new();
        for parent in self.parent_ids(id)? {
            let edge = Edge {
                up: parent.clone(),
                down: id.to_string(),
                points: self.edge_points_vec(&parent, id)?,
            };
            if edge.is_tombstone() && !include_tombstoned {
                continue;
            }
            out.push(edge);
        }
        Ok(out)
    }

    /// Looks up `user` nodes whose email and password points match.
    ///
    /// Used by the `auth.user` handler; returns primary-parent views.
    pub fn user_check(&self, email: &str, pass: &str) -> Result<Vec<NodeEdge>> {
        if email.is_empty() {
            return Ok(Vec::new());
        }

        let mut out = Vec::new();
        for (id, meta) in self.nodes.iter_all()? {
            if meta.typ != node_type::USER {
                continue;
            }
            let node = self.node(&id)?;
            let user = User::from_node(&node);
            if user.email == email && user.pass == pass {
                out.extend(self.node_edge(&id, "")?);
            }
        }
        Ok(out)
    }
}
