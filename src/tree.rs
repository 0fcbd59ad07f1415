//! Recursive tree materialization
//!
//! Rebuilds the nested view of a pipeline or box from one-hop store queries.
//! The walk uses an explicit worklist and a depth counter instead of native
//! recursion, so a long chain of boxes cannot exhaust the stack.

use crate::error::{NotFound, Outcome, Result};
use crate::model::{NodeRef, Scope, TaskSummary, TreeLevel};
use crate::store::GraphStore;
use serde::Serialize;
use tracing::{debug, warn};

/// Number of levels a materialized tree may have, root included
pub const MAX_DEPTH: usize = 50;

/// A pipeline or box with its nested boxes and attached tasks
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeNode {
    pub id: String,
    pub name: String,
    pub status: i32,
    pub boxes: Vec<TreeNode>,
    pub tasks: Vec<TaskSummary>,
    /// Set when box children exist below the depth ceiling but were not fetched
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
}

impl TreeNode {
    /// Box ids below this node, depth-first, parents before children
    pub fn descendant_ids(&self) -> Vec<String> {
        let mut ids = Vec::new();
        let mut stack: Vec<&TreeNode> = self.boxes.iter().rev().collect();
        while let Some(node) = stack.pop() {
            ids.push(node.id.clone());
            stack.extend(node.boxes.iter().rev());
        }
        ids
    }

    /// Number of levels, counting this node as one
    pub fn depth(&self) -> usize {
        let mut deepest = 0;
        let mut stack = vec![(self, 1usize)];
        while let Some((node, level)) = stack.pop() {
            deepest = deepest.max(level);
            stack.extend(node.boxes.iter().map(|child| (child, level + 1)));
        }
        deepest
    }

    /// Whether any node in the tree hit the depth ceiling
    pub fn is_truncated(&self) -> bool {
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            if node.truncated {
                return true;
            }
            stack.extend(node.boxes.iter());
        }
        false
    }
}

/// A fetched level waiting for its children to be assembled
struct Slot {
    level: TreeLevel,
    depth: usize,
    children: Vec<usize>,
    truncated: bool,
}

/// Materialize the tree rooted at `root`.
///
/// Returns `None` when the root does not exist. Box children that vanish
/// between their parent's query and their own are dropped from the result.
pub fn materialize<S: GraphStore + ?Sized>(store: &S, root: &NodeRef) -> Result<Option<TreeNode>> {
    let Some(level) = store.tree_level(root)? else {
        debug!(node = %root, "tree root not found");
        return Ok(None);
    };

    let mut arena = vec![Slot {
        level,
        depth: 0,
        children: Vec::new(),
        truncated: false,
    }];
    let mut worklist = vec![0usize];

    while let Some(index) = worklist.pop() {
        let depth = arena[index].depth;
        if arena[index].level.boxes.is_empty() {
            continue;
        }
        if depth + 1 >= MAX_DEPTH {
            arena[index].truncated = true;
            continue;
        }

        let child_ids: Vec<String> = arena[index]
            .level
            .boxes
            .iter()
            .map(|child| child.id.clone())
            .collect();
        for child_id in child_ids {
            let child = NodeRef::Box(child_id);
            match store.tree_level(&child)? {
                Some(level) => {
                    let slot = arena.len();
                    arena.push(Slot {
                        level,
                        depth: depth + 1,
                        children: Vec::new(),
                        truncated: false,
                    });
                    arena[index].children.push(slot);
                    worklist.push(slot);
                }
                None => warn!(node = %child, "child vanished during materialization, pruned"),
            }
        }
    }

    // Children always sit at a higher index than their parent
    let mut built: Vec<Option<TreeNode>> = Vec::with_capacity(arena.len());
    built.resize_with(arena.len(), || None);
    for (index, slot) in arena.into_iter().enumerate().rev() {
        let boxes = slot
            .children
            .iter()
            .filter_map(|child| built[*child].take())
            .collect();
        built[index] = Some(TreeNode {
            id: slot.level.id,
            name: slot.level.name,
            status: slot.level.status,
            boxes,
            tasks: slot.level.tasks,
            truncated: slot.truncated,
        });
    }

    let tree = built.into_iter().next().flatten();
    if let Some(tree) = &tree {
        if tree.is_truncated() {
            warn!(node = %root, max_depth = MAX_DEPTH, "tree truncated at depth ceiling");
        }
    }
    Ok(tree)
}

/// Resolve `key` as a pipeline or box of the scope, then materialize it
pub fn find_tree<S: GraphStore + ?Sized>(
    store: &S,
    scope: &Scope,
    key: &str,
) -> Result<Outcome<TreeNode>> {
    let missing = || Outcome::NotFound(NotFound::Stage(key.to_string()));
    let Some(root) = store.resolve_stage(scope, key)? else {
        return Ok(missing());
    };
    Ok(materialize(store, &root.node())?.map_or_else(missing, Outcome::Done))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{link, temp_store};

    #[test]
    fn test_missing_root_is_none() {
        let (_dir, db) = temp_store();
        let tree = materialize(&db, &NodeRef::Pipeline("nope".to_string())).unwrap();
        assert!(tree.is_none());
    }

    #[test]
    fn test_leaf_has_empty_boxes() {
        let (_dir, db) = temp_store();
        let scope = Scope::new("u1", "x");
        let pipeline = db.insert_pipeline(&scope, "P").unwrap();

        let tree = materialize(&db, &pipeline.node()).unwrap().unwrap();
        assert_eq!(tree.id, pipeline.key);
        assert_eq!(tree.name, "P");
        assert!(tree.boxes.is_empty());
        assert!(tree.tasks.is_empty());
        assert_eq!(tree.depth(), 1);

        let json = serde_json::to_value(&tree).unwrap();
        assert_eq!(json["boxes"], serde_json::json!([]));
        assert_eq!(json["tasks"], serde_json::json!([]));
        assert!(json.get("truncated").is_none());
    }

    #[test]
    fn test_nested_boxes_and_tasks() {
        let (_dir, db) = temp_store();
        let scope = Scope::new("u1", "x");
        let pipeline = db.insert_pipeline(&scope, "P").unwrap();
        let b1 = db.insert_box(&scope, &pipeline.key, "B1").unwrap();
        let b2 = db.insert_box(&scope, &b1.key, "B2").unwrap();
        let b3 = db.insert_box(&scope, &pipeline.key, "B3").unwrap();
        let task = db.insert_task("u1", "denoise").unwrap();
        link(&db, &scope, &pipeline.node(), &b1.node());
        link(&db, &scope, &b1.node(), &b2.node());
        link(&db, &scope, &pipeline.node(), &b3.node());
        link(&db, &scope, &task.node(), &b2.node());

        let tree = materialize(&db, &pipeline.node()).unwrap().unwrap();
        assert_eq!(tree.boxes.len(), 2);
        assert_eq!(tree.boxes[0].id, b1.key);
        assert_eq!(tree.boxes[1].id, b3.key);
        assert_eq!(tree.boxes[0].boxes[0].id, b2.key);
        assert_eq!(tree.boxes[0].boxes[0].tasks[0].id, task.key);
        assert_eq!(tree.depth(), 3);
        assert_eq!(tree.descendant_ids(), vec![b1.key, b2.key, b3.key]);
        assert!(!tree.is_truncated());
    }

    #[test]
    fn test_deep_chain_stops_at_ceiling() {
        let (_dir, db) = temp_store();
        let scope = Scope::new("u1", "x");
        let pipeline = db.insert_pipeline(&scope, "P").unwrap();
        let mut parent = pipeline.node();
        for i in 0..60 {
            let child = db.insert_box(&scope, parent.key(), &format!("B{}", i)).unwrap();
            link(&db, &scope, &parent, &child.node());
            parent = child.node();
        }

        let tree = materialize(&db, &pipeline.node()).unwrap().unwrap();
        assert_eq!(tree.depth(), MAX_DEPTH);
        assert!(tree.is_truncated());
        assert_eq!(tree.descendant_ids().len(), MAX_DEPTH - 1);

        let mut deepest = &tree;
        while let Some(next) = deepest.boxes.first() {
            deepest = next;
        }
        assert!(deepest.truncated);
        assert!(deepest.boxes.is_empty());
    }

    #[test]
    fn test_cycle_stops_at_ceiling() {
        let (_dir, db) = temp_store();
        let scope = Scope::new("u1", "x");
        let a = db.insert_box(&scope, "p", "A").unwrap();
        let b = db.insert_box(&scope, &a.key, "B").unwrap();
        link(&db, &scope, &a.node(), &b.node());
        link(&db, &scope, &b.node(), &a.node());

        let tree = materialize(&db, &a.node()).unwrap().unwrap();
        assert_eq!(tree.depth(), MAX_DEPTH);
        assert!(tree.is_truncated());

        // The walk alternates B, A, B, ... below the root
        let ids = tree.descendant_ids();
        assert_eq!(ids.len(), MAX_DEPTH - 1);
        assert_eq!(ids[0], b.key);
        assert_eq!(ids[1], a.key);
    }

    #[test]
    fn test_dangling_child_is_pruned() {
        let (_dir, db) = temp_store();
        let scope = Scope::new("u1", "x");
        let pipeline = db.insert_pipeline(&scope, "P").unwrap();
        let kept = db.insert_box(&scope, &pipeline.key, "kept").unwrap();
        let gone = db.insert_box(&scope, &pipeline.key, "gone").unwrap();
        link(&db, &scope, &pipeline.node(), &kept.node());
        link(&db, &scope, &pipeline.node(), &gone.node());
        db.delete_box(&gone.key).unwrap();

        let tree = materialize(&db, &pipeline.node()).unwrap().unwrap();
        assert_eq!(tree.descendant_ids(), vec![kept.key]);
    }

    #[test]
    fn test_find_tree_is_scoped() {
        let (_dir, db) = temp_store();
        let scope = Scope::new("u1", "x");
        let stage = db.insert_box(&scope, "p", "B").unwrap();

        let found = find_tree(&db, &scope, &stage.key).unwrap().done().unwrap();
        assert_eq!(found.name, "B");

        let other = find_tree(&db, &Scope::new("u1", "y"), &stage.key).unwrap();
        assert_eq!(other.not_found(), Some(&NotFound::Stage(stage.key.clone())));
    }
}
