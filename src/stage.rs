//! Creating, listing and updating projects, pipelines and boxes
//!
//! Creation is two store writes (node, then linking edge) with no rollback.
//! If the edge write fails the node stays behind as an orphan; its id is
//! logged so it can be cleaned up.

use crate::error::{NotFound, Outcome, Result, StoreError};
use crate::model::{BoxNode, Edge, NewEdge, NodeRef, Pipeline, Project, Scope, StagePatch};
use crate::store::GraphStore;
use crate::tree::{materialize, TreeNode};
use serde::Serialize;
use tracing::{error, info};

/// A freshly created node together with the edge that links it in
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Created<T> {
    #[serde(flatten)]
    pub node: T,
    pub nested: Edge,
}

/// A pipeline with its materialized box children
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineTree {
    #[serde(flatten)]
    pub pipeline: Pipeline,
    pub boxes: Vec<TreeNode>,
}

fn link<S: GraphStore + ?Sized>(
    store: &S,
    from: &NodeRef,
    to: &NodeRef,
    scope: &Scope,
    parent: Option<&str>,
) -> Result<Edge> {
    let inserted = store
        .insert_edge(NewEdge {
            from,
            to,
            scope,
            parent,
        })
        .and_then(|edge| {
            edge.ok_or_else(|| StoreError::Conflict(format!("edge {} -> {} already exists", from, to)))
        });
    inserted.map_err(|e| {
        error!(orphan = %to, parent = %from, error = %e, "node created but edge insert failed");
        e
    })
}

pub fn create_project<S: GraphStore + ?Sized>(store: &S, name: &str, author: &str) -> Result<Project> {
    let project = store.insert_project(author, name)?;
    info!(project = %project.key, author, "project created");
    Ok(project)
}

/// Owned projects of `author`, oldest first
pub fn list_projects<S: GraphStore + ?Sized>(store: &S, author: &str) -> Result<Vec<Project>> {
    store.list_projects(author)
}

pub fn create_pipeline<S: GraphStore + ?Sized>(
    store: &S,
    project_key: &str,
    name: &str,
    author: &str,
) -> Result<Outcome<Created<Pipeline>>> {
    let Some(project) = store.find_project(project_key, author)? else {
        return Ok(Outcome::NotFound(NotFound::Project(project_key.to_string())));
    };
    let scope = Scope::new(author, project_key);

    let pipeline = store.insert_pipeline(&scope, name)?;
    let nested = link(store, &project.node(), &pipeline.node(), &scope, None)?;
    info!(pipeline = %pipeline.key, project = %project_key, "pipeline created");
    Ok(Outcome::Done(Created {
        node: pipeline,
        nested,
    }))
}

/// Create a box under the pipeline or box `parent_key`
pub fn create_box<S: GraphStore + ?Sized>(
    store: &S,
    project_key: &str,
    parent_key: &str,
    name: &str,
    author: &str,
) -> Result<Outcome<Created<BoxNode>>> {
    if store.find_project(project_key, author)?.is_none() {
        return Ok(Outcome::NotFound(NotFound::Project(project_key.to_string())));
    }
    let scope = Scope::new(author, project_key);
    let Some(parent) = store.resolve_stage(&scope, parent_key)? else {
        return Ok(Outcome::NotFound(NotFound::Stage(parent_key.to_string())));
    };

    let created = store.insert_box(&scope, parent.key(), name)?;
    let nested = link(
        store,
        &parent.node(),
        &created.node(),
        &scope,
        Some(parent.key()),
    )?;
    info!(box_key = %created.key, parent = %parent.node(), "box created");
    Ok(Outcome::Done(Created {
        node: created,
        nested,
    }))
}

/// Every pipeline of the project with its boxes materialized
pub fn list_pipelines<S: GraphStore + ?Sized>(
    store: &S,
    project_key: &str,
    author: &str,
) -> Result<Outcome<Vec<PipelineTree>>> {
    if store.find_project(project_key, author)?.is_none() {
        return Ok(Outcome::NotFound(NotFound::Project(project_key.to_string())));
    }
    let scope = Scope::new(author, project_key);

    let mut listed = Vec::new();
    for pipeline in store.list_pipelines(&scope)? {
        // Deleted since the listing query
        let Some(tree) = materialize(store, &pipeline.node())? else {
            continue;
        };
        listed.push(PipelineTree {
            pipeline,
            boxes: tree.boxes,
        });
    }
    Ok(Outcome::Done(listed))
}

pub fn update_pipeline<S: GraphStore + ?Sized>(
    store: &S,
    scope: &Scope,
    key: &str,
    patch: &StagePatch,
) -> Result<Outcome<Pipeline>> {
    if store.find_project(&scope.project, &scope.author)?.is_none() {
        return Ok(Outcome::NotFound(NotFound::Project(scope.project.clone())));
    }
    if store.find_pipeline(scope, key)?.is_none() {
        return Ok(Outcome::NotFound(NotFound::Pipeline(key.to_string())));
    }
    Ok(match store.update_pipeline(key, patch)? {
        Some(updated) => {
            info!(pipeline = %key, "pipeline updated");
            Outcome::Done(updated)
        }
        None => Outcome::NotFound(NotFound::Pipeline(key.to_string())),
    })
}

pub fn update_box<S: GraphStore + ?Sized>(
    store: &S,
    scope: &Scope,
    key: &str,
    patch: &StagePatch,
) -> Result<Outcome<BoxNode>> {
    if store.find_project(&scope.project, &scope.author)?.is_none() {
        return Ok(Outcome::NotFound(NotFound::Project(scope.project.clone())));
    }
    if store.find_box(scope, key)?.is_none() {
        return Ok(Outcome::NotFound(NotFound::Box(key.to_string())));
    }
    Ok(match store.update_box(key, patch)? {
        Some(updated) => {
            info!(box_key = %key, "box updated");
            Outcome::Done(updated)
        }
        None => Outcome::NotFound(NotFound::Box(key.to_string())),
    })
}
