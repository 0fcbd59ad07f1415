//! Graph store interface consumed by the tree engine
//!
//! The engine never talks to SQLite directly. Every operation in
//! [`crate::tree`], [`crate::attach`], [`crate::cascade`] and [`crate::stage`]
//! is a plain function over a `&S where S: GraphStore`, so the store handle is
//! passed in rather than held globally.

use crate::error::Result;
use crate::model::{
    BoxNode, Edge, NewEdge, NodeRef, ParentRef, Pipeline, Project, Scope, StagePatch, Task,
    TaskPatch, TreeLevel,
};

/// Node and edge repository over a graph store
///
/// Lookups that take a [`Scope`] must filter by both author and project.
/// Lookups by bare key are only used after a scoped lookup resolved the node.
pub trait GraphStore {
    // ------------------------------------------------------------------
    // Projects
    // ------------------------------------------------------------------

    fn insert_project(&self, author: &str, name: &str) -> Result<Project>;

    /// Project by key, only if owned by `author`
    fn find_project(&self, key: &str, author: &str) -> Result<Option<Project>>;

    fn list_projects(&self, author: &str) -> Result<Vec<Project>>;

    // ------------------------------------------------------------------
    // Pipelines
    // ------------------------------------------------------------------

    fn insert_pipeline(&self, scope: &Scope, name: &str) -> Result<Pipeline>;

    fn find_pipeline(&self, scope: &Scope, key: &str) -> Result<Option<Pipeline>>;

    /// All pipelines of the scope, in insertion order
    fn list_pipelines(&self, scope: &Scope) -> Result<Vec<Pipeline>>;

    fn update_pipeline(&self, key: &str, patch: &StagePatch) -> Result<Option<Pipeline>>;

    fn delete_pipeline(&self, key: &str) -> Result<usize>;

    // ------------------------------------------------------------------
    // Boxes
    // ------------------------------------------------------------------

    fn insert_box(&self, scope: &Scope, parent: &str, name: &str) -> Result<BoxNode>;

    fn find_box(&self, scope: &Scope, key: &str) -> Result<Option<BoxNode>>;

    fn update_box(&self, key: &str, patch: &StagePatch) -> Result<Option<BoxNode>>;

    fn delete_box(&self, key: &str) -> Result<usize>;

    // ------------------------------------------------------------------
    // Tasks
    // ------------------------------------------------------------------

    fn insert_task(&self, author: &str, name: &str) -> Result<Task>;

    /// Task by key, only if owned by `author`
    fn find_task(&self, key: &str, author: &str) -> Result<Option<Task>>;

    /// Tasks whose key is in `keys`; unknown keys are skipped
    fn tasks_by_keys(&self, keys: &[String]) -> Result<Vec<Task>>;

    fn update_task(&self, key: &str, patch: &TaskPatch) -> Result<Option<Task>>;

    fn delete_task(&self, key: &str) -> Result<usize>;

    // ------------------------------------------------------------------
    // Edges
    // ------------------------------------------------------------------

    /// Insert unless an edge with the same (from, to) pair exists.
    /// Returns `None` when the pair was already present.
    fn insert_edge(&self, edge: NewEdge<'_>) -> Result<Option<Edge>>;

    fn find_edge(&self, from: &NodeRef, to: &NodeRef) -> Result<Option<Edge>>;

    fn edges_from(&self, node: &NodeRef) -> Result<Vec<Edge>>;

    fn edges_to(&self, node: &NodeRef) -> Result<Vec<Edge>>;

    fn delete_edges_from(&self, node: &NodeRef) -> Result<usize>;

    fn delete_edges_to(&self, node: &NodeRef) -> Result<usize>;

    // ------------------------------------------------------------------
    // Pattern query
    // ------------------------------------------------------------------

    /// One-hop neighbourhood of a pipeline or box: its own projected fields,
    /// outbound box children and inbound task children, in edge insertion
    /// order. `None` if the node does not exist.
    fn tree_level(&self, node: &NodeRef) -> Result<Option<TreeLevel>>;

    // ------------------------------------------------------------------
    // Composed lookups
    // ------------------------------------------------------------------

    /// Resolve a key as a pipeline first, then as a box
    fn resolve_stage(&self, scope: &Scope, key: &str) -> Result<Option<ParentRef>> {
        if let Some(pipeline) = self.find_pipeline(scope, key)? {
            return Ok(Some(ParentRef::Pipeline(pipeline.key)));
        }
        Ok(self
            .find_box(scope, key)?
            .map(|found| ParentRef::Box(found.key)))
    }

    /// Pipelines and boxes holding `node` through an inbound edge
    fn parents_of(&self, node: &NodeRef) -> Result<Vec<ParentRef>> {
        let mut parents = Vec::new();
        for edge in self.edges_to(node)? {
            let from: NodeRef = edge.from_id.parse()?;
            if let Some(parent) = from.as_parent() {
                parents.push(parent);
            }
        }
        Ok(parents)
    }
}
