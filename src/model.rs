//! Entities of the pipeline graph and the references between them
//!
//! Every node lives in a collection and is addressed as `collection/key`
//! (`pipeline/3f2c...`, `box/91ab...`). Edges store both endpoints in that
//! form, so the collection prefix is what tells a box child from a task.

use crate::error::StoreError;
use diesel::Queryable;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const PROJECTS: &str = "projects";
pub const PIPELINES: &str = "pipeline";
pub const BOXES: &str = "box";
pub const TASKS: &str = "tasks";

// ============================================================================
// Node references
// ============================================================================

/// A typed `collection/key` node id
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeRef {
    Project(String),
    Pipeline(String),
    Box(String),
    Task(String),
}

impl NodeRef {
    pub fn collection(&self) -> &'static str {
        match self {
            NodeRef::Project(_) => PROJECTS,
            NodeRef::Pipeline(_) => PIPELINES,
            NodeRef::Box(_) => BOXES,
            NodeRef::Task(_) => TASKS,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            NodeRef::Project(key)
            | NodeRef::Pipeline(key)
            | NodeRef::Box(key)
            | NodeRef::Task(key) => key,
        }
    }

    /// Narrow to a parent reference; only pipelines and boxes can hold boxes
    pub fn as_parent(&self) -> Option<ParentRef> {
        match self {
            NodeRef::Pipeline(key) => Some(ParentRef::Pipeline(key.clone())),
            NodeRef::Box(key) => Some(ParentRef::Box(key.clone())),
            NodeRef::Project(_) | NodeRef::Task(_) => None,
        }
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection(), self.key())
    }
}

impl FromStr for NodeRef {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (collection, key) = s
            .split_once('/')
            .ok_or_else(|| StoreError::Malformed(format!("node id without collection: {}", s)))?;
        if key.is_empty() {
            return Err(StoreError::Malformed(format!("node id without key: {}", s)));
        }
        let key = key.to_string();
        match collection {
            PROJECTS => Ok(NodeRef::Project(key)),
            PIPELINES => Ok(NodeRef::Pipeline(key)),
            BOXES => Ok(NodeRef::Box(key)),
            TASKS => Ok(NodeRef::Task(key)),
            other => Err(StoreError::Malformed(format!("unknown collection: {}", other))),
        }
    }
}

/// Something a box can be nested under, resolved once at entry
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ParentRef {
    Pipeline(String),
    Box(String),
}

impl ParentRef {
    pub fn key(&self) -> &str {
        match self {
            ParentRef::Pipeline(key) | ParentRef::Box(key) => key,
        }
    }

    pub fn node(&self) -> NodeRef {
        match self {
            ParentRef::Pipeline(key) => NodeRef::Pipeline(key.clone()),
            ParentRef::Box(key) => NodeRef::Box(key.clone()),
        }
    }
}

impl From<ParentRef> for NodeRef {
    fn from(parent: ParentRef) -> Self {
        parent.node()
    }
}

/// Tenant scope every pipeline and box read/write is filtered by
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    pub author: String,
    pub project: String,
}

impl Scope {
    pub fn new(author: impl Into<String>, project: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            project: project.into(),
        }
    }
}

// ============================================================================
// Stored entities
// ============================================================================

#[derive(Queryable, Debug, Clone, PartialEq, Serialize)]
pub struct Project {
    #[serde(skip)]
    pub rowid: i32,
    #[serde(rename = "id")]
    pub key: String,
    pub author: String,
    pub name: String,
    pub created_at: String,
}

impl Project {
    pub fn node(&self) -> NodeRef {
        NodeRef::Project(self.key.clone())
    }
}

#[derive(Queryable, Debug, Clone, PartialEq, Serialize)]
pub struct Pipeline {
    #[serde(skip)]
    pub rowid: i32,
    #[serde(rename = "id")]
    pub key: String,
    pub author: String,
    pub project: String,
    pub name: String,
    pub complete: i32,
    pub created_at: String,
    pub updated_at: String,
}

impl Pipeline {
    pub fn node(&self) -> NodeRef {
        NodeRef::Pipeline(self.key.clone())
    }
}

/// A processing stage. Named `BoxNode` to stay clear of `std::boxed::Box`.
#[derive(Queryable, Debug, Clone, PartialEq, Serialize)]
pub struct BoxNode {
    #[serde(skip)]
    pub rowid: i32,
    #[serde(rename = "id")]
    pub key: String,
    pub author: String,
    pub project: String,
    pub parent: String,
    pub name: String,
    pub complete: i32,
    pub created_at: String,
    pub updated_at: String,
}

impl BoxNode {
    pub fn node(&self) -> NodeRef {
        NodeRef::Box(self.key.clone())
    }
}

#[derive(Queryable, Debug, Clone, PartialEq, Serialize)]
pub struct Task {
    #[serde(skip)]
    pub rowid: i32,
    #[serde(rename = "id")]
    pub key: String,
    pub author: String,
    pub name: String,
    pub status: String,
    pub created_at: String,
}

impl Task {
    pub fn node(&self) -> NodeRef {
        NodeRef::Task(self.key.clone())
    }
}

#[derive(Queryable, Debug, Clone, PartialEq, Serialize)]
pub struct Edge {
    #[serde(skip)]
    pub rowid: i32,
    #[serde(rename = "id")]
    pub key: String,
    #[serde(rename = "_from")]
    pub from_id: String,
    #[serde(rename = "_to")]
    pub to_id: String,
    pub author: String,
    pub project: String,
    pub parent: Option<String>,
    pub created_at: String,
}

/// Edge to insert; author and project are copied from the scope
#[derive(Debug, Clone)]
pub struct NewEdge<'a> {
    pub from: &'a NodeRef,
    pub to: &'a NodeRef,
    pub scope: &'a Scope,
    pub parent: Option<&'a str>,
}

// ============================================================================
// Patches
// ============================================================================

/// Partial field replace for pipelines and boxes
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct StagePatch {
    pub name: Option<String>,
    pub complete: Option<i32>,
}

/// Partial field replace for tasks
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TaskPatch {
    pub name: Option<String>,
    pub status: Option<String>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.status.is_none()
    }
}

// ============================================================================
// One-hop neighbourhood
// ============================================================================

/// Projected fields of a box child
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChildSummary {
    pub id: String,
    pub name: String,
    pub status: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskSummary {
    pub id: String,
    pub name: String,
    pub status: String,
}

/// A node with its outbound box children and inbound task children
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeLevel {
    pub id: String,
    pub name: String,
    pub status: i32,
    pub boxes: Vec<ChildSummary>,
    pub tasks: Vec<TaskSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_ref_round_trip() {
        let node: NodeRef = "box/abc".parse().unwrap();
        assert_eq!(node, NodeRef::Box("abc".to_string()));
        assert_eq!(node.to_string(), "box/abc");
        assert_eq!(node.collection(), "box");
        assert_eq!(node.key(), "abc");
    }

    #[test]
    fn test_node_ref_rejects_malformed() {
        assert!("abc".parse::<NodeRef>().is_err());
        assert!("box/".parse::<NodeRef>().is_err());
        assert!("jobs/1".parse::<NodeRef>().is_err());
    }

    #[test]
    fn test_as_parent() {
        let pipeline = NodeRef::Pipeline("p".to_string());
        assert_eq!(pipeline.as_parent(), Some(ParentRef::Pipeline("p".to_string())));
        assert_eq!(NodeRef::Task("t".to_string()).as_parent(), None);
        assert_eq!(ParentRef::Box("b".to_string()).node().to_string(), "box/b");
    }

    #[test]
    fn test_edge_serializes_endpoints() {
        let edge = Edge {
            rowid: 1,
            key: "e1".to_string(),
            from_id: "pipeline/p".to_string(),
            to_id: "box/b".to_string(),
            author: "u1".to_string(),
            project: "x".to_string(),
            parent: Some("p".to_string()),
            created_at: "2025-01-01T00:00:00Z".to_string(),
        };
        let json = serde_json::to_string(&edge).unwrap();
        assert!(json.contains("\"_from\":\"pipeline/p\""));
        assert!(json.contains("\"_to\":\"box/b\""));
        assert!(json.contains("\"id\":\"e1\""));
        assert!(!json.contains("rowid"));
    }
}
