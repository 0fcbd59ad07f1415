//! Cascade deletion of a pipeline or box subtree
//!
//! Descendants go first, deepest first, so an interrupted run never leaves a
//! live box hanging under a deleted parent. A box that is also attached
//! somewhere outside the subtree survives together with everything below it;
//! only its edges to deleted nodes go away.

use crate::error::{NotFound, Outcome, Result};
use crate::model::{NodeRef, Scope};
use crate::store::GraphStore;
use crate::tree::{materialize, TreeNode};
use serde::Serialize;
use std::collections::HashSet;
use tracing::{error, info, warn};

/// What a cascade removed and what it left in place
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeletedSummary {
    /// `collection/key` of the deleted root
    pub root: String,
    /// The subtree as it was materialized before deletion
    pub tree: TreeNode,
    /// Keys in deletion order, root last
    pub deleted: Vec<String>,
    /// Descendant keys kept because another parent still holds them
    pub kept: Vec<String>,
    pub edges_removed: usize,
    pub truncated: bool,
}

/// Descendants (preorder, each once) that may be deleted, and those that must stay
fn partition<S: GraphStore + ?Sized>(
    store: &S,
    root: &NodeRef,
    descendants: &[String],
) -> Result<(Vec<String>, Vec<String>)> {
    let mut doomed: HashSet<NodeRef> = descendants
        .iter()
        .map(|key| NodeRef::Box(key.clone()))
        .collect();
    doomed.insert(root.clone());

    // Drop anything with a live parent outside the doomed set until stable
    let mut kept = HashSet::new();
    loop {
        let mut changed = false;
        for key in descendants {
            let node = NodeRef::Box(key.clone());
            if !doomed.contains(&node) {
                continue;
            }
            let held_elsewhere = store
                .parents_of(&node)?
                .into_iter()
                .map(NodeRef::from)
                .any(|parent| !doomed.contains(&parent));
            if held_elsewhere {
                doomed.remove(&node);
                kept.insert(key.clone());
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    let (kept, doomed): (Vec<String>, Vec<String>) = descendants
        .iter()
        .cloned()
        .partition(|key| kept.contains(key));
    Ok((doomed, kept))
}

/// Delete `node` and every edge touching it, returning the edge count
fn remove_node<S: GraphStore + ?Sized>(store: &S, node: &NodeRef) -> Result<usize> {
    let mut edges = store.delete_edges_from(node)?;
    edges += store.delete_edges_to(node)?;
    match node {
        NodeRef::Pipeline(key) => store.delete_pipeline(key)?,
        NodeRef::Box(key) => store.delete_box(key)?,
        NodeRef::Project(_) | NodeRef::Task(_) => 0,
    };
    Ok(edges)
}

/// Delete the pipeline or box `root_key` with its whole subtree.
///
/// Steps are not transactional. On a store failure the deepest nodes are
/// already gone and the shallower ones, root included, are intact.
pub fn delete_subtree<S: GraphStore + ?Sized>(
    store: &S,
    scope: &Scope,
    root_key: &str,
) -> Result<Outcome<DeletedSummary>> {
    if store.find_project(&scope.project, &scope.author)?.is_none() {
        return Ok(Outcome::NotFound(NotFound::Project(scope.project.clone())));
    }
    let Some(root) = store.resolve_stage(scope, root_key)? else {
        return Ok(Outcome::NotFound(NotFound::Stage(root_key.to_string())));
    };
    let root_node = root.node();
    let Some(tree) = materialize(store, &root_node)? else {
        return Ok(Outcome::NotFound(NotFound::Stage(root_key.to_string())));
    };

    let truncated = tree.is_truncated();
    if truncated {
        warn!(root = %root_node, "subtree deeper than the depth ceiling, nodes below it will be orphaned");
    }

    // A cycle back through the root lists it among its own descendants
    let mut seen = HashSet::new();
    let descendants: Vec<String> = tree
        .descendant_ids()
        .into_iter()
        .filter(|key| key.as_str() != root.key() && seen.insert(key.clone()))
        .collect();
    let (doomed, kept) = partition(store, &root_node, &descendants)?;
    for key in &kept {
        info!(node = %key, root = %root_node, "box still attached elsewhere, kept");
    }

    let mut deleted = Vec::with_capacity(doomed.len() + 1);
    let mut edges_removed = 0;
    for key in doomed.iter().rev() {
        let node = NodeRef::Box(key.clone());
        edges_removed += remove_node(store, &node).map_err(|e| {
            error!(
                node = %node,
                root = %root_node,
                deleted = ?deleted,
                error = %e,
                "cascade interrupted, remaining subtree left in place"
            );
            e
        })?;
        deleted.push(key.clone());
    }

    edges_removed += remove_node(store, &root_node).map_err(|e| {
        error!(
            node = %root_node,
            deleted = ?deleted,
            error = %e,
            "descendants removed but root delete failed"
        );
        e
    })?;
    deleted.push(root.key().to_string());

    info!(
        root = %root_node,
        deleted = deleted.len(),
        kept = kept.len(),
        edges_removed,
        "subtree deleted"
    );
    Ok(Outcome::Done(DeletedSummary {
        root: root_node.to_string(),
        tree,
        deleted,
        kept,
        edges_removed,
        truncated,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{link, temp_store};

    #[test]
    fn test_deletes_leaves_first() {
        let (_dir, db) = temp_store();
        let project = db.insert_project("u1", "proj").unwrap();
        let scope = Scope::new("u1", project.key.clone());
        let pipeline = db.insert_pipeline(&scope, "P").unwrap();
        let b1 = db.insert_box(&scope, &pipeline.key, "B1").unwrap();
        let b2 = db.insert_box(&scope, &b1.key, "B2").unwrap();
        link(&db, &scope, &project.node(), &pipeline.node());
        link(&db, &scope, &pipeline.node(), &b1.node());
        link(&db, &scope, &b1.node(), &b2.node());

        let summary = delete_subtree(&db, &scope, &pipeline.key)
            .unwrap()
            .done()
            .unwrap();
        assert_eq!(
            summary.deleted,
            vec![b2.key.clone(), b1.key.clone(), pipeline.key.clone()]
        );
        assert_eq!(summary.edges_removed, 3);
        assert!(summary.kept.is_empty());
        assert_eq!(summary.root, pipeline.node().to_string());

        assert!(materialize(&db, &pipeline.node()).unwrap().is_none());
        assert!(materialize(&db, &b1.node()).unwrap().is_none());
        assert!(materialize(&db, &b2.node()).unwrap().is_none());
        assert!(db.all_edges().unwrap().is_empty());
    }

    #[test]
    fn test_box_root_keeps_siblings() {
        let (_dir, db) = temp_store();
        let project = db.insert_project("u1", "proj").unwrap();
        let scope = Scope::new("u1", project.key.clone());
        let pipeline = db.insert_pipeline(&scope, "P").unwrap();
        let doomed = db.insert_box(&scope, &pipeline.key, "doomed").unwrap();
        let sibling = db.insert_box(&scope, &pipeline.key, "sibling").unwrap();
        link(&db, &scope, &pipeline.node(), &doomed.node());
        link(&db, &scope, &pipeline.node(), &sibling.node());

        delete_subtree(&db, &scope, &doomed.key).unwrap().done().unwrap();

        let tree = materialize(&db, &pipeline.node()).unwrap().unwrap();
        assert_eq!(tree.descendant_ids(), vec![sibling.key]);
    }

    #[test]
    fn test_shared_box_survives() {
        let (_dir, db) = temp_store();
        let project = db.insert_project("u1", "proj").unwrap();
        let scope = Scope::new("u1", project.key.clone());
        let p1 = db.insert_pipeline(&scope, "P1").unwrap();
        let p2 = db.insert_pipeline(&scope, "P2").unwrap();
        let shared = db.insert_box(&scope, &p1.key, "shared").unwrap();
        let below = db.insert_box(&scope, &shared.key, "below").unwrap();
        let own = db.insert_box(&scope, &p1.key, "own").unwrap();
        link(&db, &scope, &p1.node(), &shared.node());
        link(&db, &scope, &p2.node(), &shared.node());
        link(&db, &scope, &shared.node(), &below.node());
        link(&db, &scope, &p1.node(), &own.node());

        let summary = delete_subtree(&db, &scope, &p1.key).unwrap().done().unwrap();
        assert_eq!(summary.kept, vec![shared.key.clone(), below.key.clone()]);
        assert_eq!(summary.deleted, vec![own.key.clone(), p1.key.clone()]);

        let survivor = materialize(&db, &p2.node()).unwrap().unwrap();
        assert_eq!(survivor.descendant_ids(), vec![shared.key, below.key]);
    }

    #[test]
    fn test_cycle_through_root_is_deleted() {
        let (_dir, db) = temp_store();
        let project = db.insert_project("u1", "proj").unwrap();
        let scope = Scope::new("u1", project.key.clone());
        let pipeline = db.insert_pipeline(&scope, "P").unwrap();
        let a = db.insert_box(&scope, &pipeline.key, "A").unwrap();
        let b = db.insert_box(&scope, &a.key, "B").unwrap();
        link(&db, &scope, &pipeline.node(), &a.node());
        link(&db, &scope, &a.node(), &b.node());
        link(&db, &scope, &b.node(), &a.node());

        let summary = delete_subtree(&db, &scope, &a.key)
            .unwrap()
            .done()
            .unwrap();
        assert_eq!(summary.deleted, vec![b.key.clone(), a.key.clone()]);
        assert!(summary.kept.is_empty());
        assert_eq!(summary.edges_removed, 3);

        assert!(db.find_box(&scope, &a.key).unwrap().is_none());
        assert!(db.find_box(&scope, &b.key).unwrap().is_none());
        assert!(db.edges_from(&pipeline.node()).unwrap().is_empty());
        assert!(db.all_edges().unwrap().is_empty());
    }

    #[test]
    fn test_task_nodes_are_only_detached() {
        let (_dir, db) = temp_store();
        let project = db.insert_project("u1", "proj").unwrap();
        let scope = Scope::new("u1", project.key.clone());
        let parent = db.insert_box(&scope, "p", "B").unwrap();
        let task = db.insert_task("u1", "despike").unwrap();
        link(&db, &scope, &task.node(), &parent.node());

        delete_subtree(&db, &scope, &parent.key).unwrap().done().unwrap();
        assert!(db.find_task(&task.key, "u1").unwrap().is_some());
        assert!(db.edges_from(&task.node()).unwrap().is_empty());
    }

    #[test]
    fn test_not_found_cases() {
        let (_dir, db) = temp_store();
        let project = db.insert_project("u1", "proj").unwrap();

        let no_project = delete_subtree(&db, &Scope::new("u1", "ghost"), "p").unwrap();
        assert_eq!(
            no_project.not_found(),
            Some(&NotFound::Project("ghost".to_string()))
        );

        let foreign = delete_subtree(&db, &Scope::new("u2", project.key.clone()), "p").unwrap();
        assert!(matches!(foreign.not_found(), Some(NotFound::Project(_))));

        let no_root = delete_subtree(&db, &Scope::new("u1", project.key), "p").unwrap();
        assert_eq!(no_root.not_found(), Some(&NotFound::Stage("p".to_string())));
    }
}
