//! Dependency Graph (§4.4): classifies tasks/initiatives as blocked or
//! ready against their `blocked_by` lists, and topologically sorts a
//! manifest-import batch so dependencies land before dependents.
//!
//! Operates on arbitrary string ids spanning many tasks and
//! initiatives, since this is an inter-entity graph rather than an
//! intra-task one. The cycle check is Kahn's algorithm: build
//! in-degrees, drain a zero-in-degree queue, and anything left over is
//! a cycle.

use std::collections::{HashMap, HashSet};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DepsError {
    #[error("unknown dependency '{dep}' referenced by '{id}'")]
    UnknownDependency { id: String, dep: String },
    #[error("cycle detected among: {0:?}")]
    Cycle(Vec<String>),
}

/// A node with an id and the ids it must wait on.
pub trait Dependent {
    fn id(&self) -> &str;
    fn blocked_by(&self) -> &[String];

    /// Whether this node is still active work that can meaningfully be
    /// `Ready`/`Blocked`. A node that's already terminal (a completed
    /// task, a completed or archived initiative) classifies as `Other`
    /// instead, regardless of its `blocked_by` list.
    fn is_pending(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Ready,
    Blocked,
    Other,
}

/// Classifies every node as `Ready`, `Blocked`, or `Other` (not
/// pending). A `blocked_by` id is treated as unmet — and so the node
/// `Blocked` — whenever it's absent from `satisfied`, whether or not it
/// refers to another node in `nodes`: a dependency on a missing id is
/// never silently satisfied. `satisfied` names ids considered already
/// complete (e.g. tasks whose stored status is terminal) even though
/// they're not in `nodes`.
pub fn classify<'a, T: Dependent>(
    nodes: &'a [T],
    satisfied: &HashSet<String>,
) -> HashMap<&'a str, Classification> {
    nodes
        .iter()
        .map(|n| {
            let classification = if !n.is_pending() {
                Classification::Other
            } else if n.blocked_by().iter().any(|dep| !satisfied.contains(dep)) {
                Classification::Blocked
            } else {
                Classification::Ready
            };
            (n.id(), classification)
        })
        .collect()
}

/// Ids still outstanding among a node's `blocked_by` list.
pub fn unmet_dependencies<'a, T: Dependent>(
    node: &'a T,
    satisfied: &HashSet<String>,
) -> Vec<&'a str> {
    node.blocked_by()
        .iter()
        .filter(|dep| !satisfied.contains(dep.as_str()))
        .map(|s| s.as_str())
        .collect()
}

/// Topologically sorts `nodes` so every id appears after everything it
/// is `blocked_by`, erroring on an unknown reference or a cycle.
pub fn toposort<T: Dependent>(nodes: Vec<T>) -> Result<Vec<T>, DepsError> {
    let index_of: HashMap<&str, usize> =
        nodes.iter().enumerate().map(|(i, n)| (n.id(), i)).collect();

    let mut forward_edges: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    let mut in_degree: Vec<usize> = vec![0; nodes.len()];

    for (to_idx, node) in nodes.iter().enumerate() {
        for dep in node.blocked_by() {
            let from_idx = *index_of.get(dep.as_str()).ok_or_else(|| DepsError::UnknownDependency {
                id: node.id().to_string(),
                dep: dep.clone(),
            })?;
            forward_edges[from_idx].push(to_idx);
            in_degree[to_idx] += 1;
        }
    }

    let mut queue: Vec<usize> = in_degree
        .iter()
        .enumerate()
        .filter(|&(_, deg)| *deg == 0)
        .map(|(i, _)| i)
        .collect();
    // Stable ordering: process in original-index order rather than
    // LIFO, so output order doesn't depend on HashMap iteration order.
    queue.sort_unstable();

    let mut order = Vec::with_capacity(nodes.len());
    let mut cursor = 0;
    while cursor < queue.len() {
        let node = queue[cursor];
        cursor += 1;
        order.push(node);

        let mut newly_ready = Vec::new();
        for &dependent in &forward_edges[node] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                newly_ready.push(dependent);
            }
        }
        newly_ready.sort_unstable();
        queue.extend(newly_ready);
    }

    if order.len() != nodes.len() {
        let stuck: Vec<String> = in_degree
            .iter()
            .enumerate()
            .filter(|&(_, deg)| *deg > 0)
            .map(|(i, _)| nodes[i].id().to_string())
            .collect();
        return Err(DepsError::Cycle(stuck));
    }

    let mut nodes: Vec<Option<T>> = nodes.into_iter().map(Some).collect();
    Ok(order.into_iter().map(|i| nodes[i].take().unwrap()).collect())
}

impl Dependent for crate::store::models::Task {
    fn id(&self) -> &str {
        &self.id
    }
    fn blocked_by(&self) -> &[String] {
        &self.blocked_by
    }
    fn is_pending(&self) -> bool {
        !self.status.is_terminal()
    }
}

impl Dependent for crate::store::models::Initiative {
    fn id(&self) -> &str {
        &self.id
    }
    fn blocked_by(&self) -> &[String] {
        &self.blocked_by
    }
    fn is_pending(&self) -> bool {
        !matches!(
            self.status,
            crate::store::models::InitiativeStatus::Completed | crate::store::models::InitiativeStatus::Archived
        )
    }
}
