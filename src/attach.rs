//! Child attachment with idempotent edge creation

use crate::error::{NotFound, Outcome, Result};
use crate::model::{NewEdge, NodeRef, Scope};
use crate::store::GraphStore;
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, info};

/// Per-child classification of an attach request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AttachReport {
    #[serde(rename = "Added")]
    pub added: Vec<String>,
    #[serde(rename = "NotFound")]
    pub not_found: Vec<String>,
    #[serde(rename = "Existed")]
    pub existed: Vec<String>,
}

impl AttachReport {
    pub fn total(&self) -> usize {
        self.added.len() + self.not_found.len() + self.existed.len()
    }
}

/// Resolve a child id as a task owned by the author, then as a scoped box
fn resolve_child<S: GraphStore + ?Sized>(
    store: &S,
    scope: &Scope,
    key: &str,
) -> Result<Option<NodeRef>> {
    if let Some(task) = store.find_task(key, &scope.author)? {
        return Ok(Some(task.node()));
    }
    Ok(store.find_box(scope, key)?.map(|found| found.node()))
}

/// Attach `child_keys` under the pipeline or box `parent_key`.
///
/// Box children get an edge parent -> child, task children an edge
/// task -> parent. An id that resolves to nothing, or to the parent itself,
/// is reported under `NotFound`; one bad id never aborts the rest.
pub fn attach<S: GraphStore + ?Sized>(
    store: &S,
    scope: &Scope,
    parent_key: &str,
    child_keys: &[String],
) -> Result<Outcome<AttachReport>> {
    let Some(parent) = store.resolve_stage(scope, parent_key)? else {
        return Ok(Outcome::NotFound(NotFound::Stage(parent_key.to_string())));
    };
    let parent_node = parent.node();

    let mut report = AttachReport::default();
    let mut seen = HashSet::new();
    for key in child_keys {
        if !seen.insert(key.as_str()) {
            continue;
        }

        let child = match resolve_child(store, scope, key)? {
            Some(child) if child != parent_node => child,
            _ => {
                report.not_found.push(key.clone());
                continue;
            }
        };
        let (from, to) = match &child {
            NodeRef::Task(_) => (&child, &parent_node),
            _ => (&parent_node, &child),
        };

        if store.find_edge(from, to)?.is_some() {
            report.existed.push(key.clone());
            continue;
        }
        let inserted = store.insert_edge(NewEdge {
            from,
            to,
            scope,
            parent: Some(parent.key()),
        })?;
        match inserted {
            Some(edge) => {
                debug!(edge = %edge.key, from = %from, to = %to, "edge added");
                report.added.push(key.clone());
            }
            // Another writer inserted the same pair since our lookup
            None => report.existed.push(key.clone()),
        }
    }

    info!(
        parent = %parent_node,
        added = report.added.len(),
        existed = report.existed.len(),
        not_found = report.not_found.len(),
        "attach finished"
    );
    Ok(Outcome::Done(report))
}
