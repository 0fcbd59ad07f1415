//! Pipetree - pipeline trees stored as a graph
//!
//! Projects hold pipelines, pipelines hold nested processing stages ("boxes"),
//! and tasks hang off boxes. Everything is a node, every containment is an edge.
//!
//! # Overview
//!
//! The store only knows nodes and one-hop edges. This crate adds the tree
//! semantics on top:
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`tree`] | Rebuild the nested view of a pipeline or box, depth-capped |
//! | [`attach`] | Link existing boxes or tasks under a parent, idempotently |
//! | [`cascade`] | Delete a subtree leaves first |
//! | [`stage`] | Create, list and update projects, pipelines and boxes |
//! | [`task`] | Create, update and detach tasks |
//!
//! Every engine function takes the store as a parameter (`&impl GraphStore`)
//! and returns `Result<Outcome<T>, StoreError>`: a missing entity is an
//! ordinary outcome, a failing store is an error.
//!
//! # Quick Start
//!
//! ```no_run
//! use pipetree::{attach, stage, tree, Database, Scope};
//!
//! let db = Database::open_at("pipetree.db").unwrap();
//!
//! let project = stage::create_project(&db, "survey", "alice").unwrap();
//! let pipeline = stage::create_pipeline(&db, &project.key, "ingest", "alice")
//!     .unwrap()
//!     .done()
//!     .unwrap();
//! let stage_box = stage::create_box(&db, &project.key, &pipeline.node.key, "clean", "alice")
//!     .unwrap()
//!     .done()
//!     .unwrap();
//!
//! // Attaching again is a no-op reported as Existed
//! let scope = Scope::new("alice", project.key.clone());
//! let report = attach::attach(&db, &scope, &pipeline.node.key, &[stage_box.node.key.clone()])
//!     .unwrap();
//!
//! let tree = tree::materialize(&db, &pipeline.node.node()).unwrap();
//! println!("{:?} {:?}", report, tree);
//! ```

pub mod attach;
pub mod cascade;
pub mod config;
pub mod db;
pub mod error;
pub mod model;
pub mod response;
pub mod schema;
pub mod stage;
pub mod store;
pub mod task;
pub mod tree;

pub use attach::AttachReport;
pub use cascade::DeletedSummary;
pub use config::{Config, ConfigError};
pub use db::{Database, StoreSchema, CURRENT_SCHEMA};
pub use error::{NotFound, Outcome, StoreError};
pub use model::{
    BoxNode, Edge, NodeRef, ParentRef, Pipeline, Project, Scope, StagePatch, Task, TaskPatch,
};
pub use response::Response;
pub use stage::{Created, PipelineTree};
pub use store::GraphStore;
pub use tree::{TreeNode, MAX_DEPTH};
