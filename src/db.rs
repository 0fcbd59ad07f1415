//! SQLite graph store with Diesel ORM
//!
//! Stores projects, pipelines, boxes and tasks as nodes, and every link between
//! them as a row in a single `edges` table keyed by `collection/key` endpoints.
//! The `(from_id, to_id)` pair is unique, so attaching twice cannot duplicate
//! an edge even when two writers race.

use crate::config::Config;
use crate::error::{Result, StoreError};
use crate::model::{
    BoxNode, ChildSummary, Edge, NewEdge, NodeRef, Pipeline, Project, Scope, StagePatch, Task,
    TaskPatch, TaskSummary, TreeLevel,
};
use crate::schema::*;
use crate::store::GraphStore;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel::sqlite::SqliteConnection;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

/// Walk up directory tree to find .pipetree folder (like git finds .git)
/// Can be overridden with PIPETREE_DB_PATH env var or `store.path` in config
fn get_db_path(config: &Config) -> PathBuf {
    // Env var always takes priority
    if let Ok(path) = std::env::var("PIPETREE_DB_PATH") {
        return PathBuf::from(path);
    }

    if let Some(path) = &config.store.path {
        return PathBuf::from(path);
    }

    if let Ok(current_dir) = std::env::current_dir() {
        let mut dir = current_dir.as_path();
        loop {
            let store_dir = dir.join(".pipetree");
            if store_dir.is_dir() {
                return store_dir.join("pipetree.db");
            }
            match dir.parent() {
                Some(parent) => dir = parent,
                None => break,
            }
        }
    }

    PathBuf::from(".pipetree/pipetree.db")
}

/// Current schema version for pipetree
pub const CURRENT_SCHEMA: StoreSchema = StoreSchema {
    major: 1,
    minor: 0,
    patch: 0,
    name: "pipeline-graph",
    features: &["projects", "pipelines", "boxes", "tasks", "edges", "unique_edge_pair"],
};

/// Describes the version and capabilities of the schema
#[derive(Debug, Clone)]
pub struct StoreSchema {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub name: &'static str,
    pub features: &'static [&'static str],
}

impl StoreSchema {
    pub fn version_string(&self) -> String {
        format!("{}.{}.{}", self.major, self.minor, self.patch)
    }

    /// Whether a registered `major.minor.patch` string can be opened by this schema
    pub fn accepts(&self, version: &str) -> bool {
        let major = version
            .split('.')
            .next()
            .and_then(|major| major.parse::<u32>().ok());
        major == Some(self.major)
    }
}

impl std::fmt::Display for StoreSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{} ({})", self.version_string(), self.name)
    }
}

// ============================================================================
// Diesel Models
// ============================================================================

#[derive(Insertable)]
#[diesel(table_name = schema_versions)]
struct NewSchemaVersion<'a> {
    version: &'a str,
    name: &'a str,
    features: &'a str,
    introduced_at: &'a str,
}

#[derive(Insertable)]
#[diesel(table_name = projects)]
struct NewProjectRow<'a> {
    node_key: &'a str,
    author: &'a str,
    name: &'a str,
    created_at: &'a str,
}

#[derive(Insertable)]
#[diesel(table_name = pipelines)]
struct NewPipelineRow<'a> {
    node_key: &'a str,
    author: &'a str,
    project: &'a str,
    name: &'a str,
    complete: i32,
    created_at: &'a str,
    updated_at: &'a str,
}

#[derive(Insertable)]
#[diesel(table_name = boxes)]
struct NewBoxRow<'a> {
    node_key: &'a str,
    author: &'a str,
    project: &'a str,
    parent: &'a str,
    name: &'a str,
    complete: i32,
    created_at: &'a str,
    updated_at: &'a str,
}

#[derive(Insertable)]
#[diesel(table_name = tasks)]
struct NewTaskRow<'a> {
    node_key: &'a str,
    author: &'a str,
    name: &'a str,
    status: &'a str,
    created_at: &'a str,
}

#[derive(Insertable)]
#[diesel(table_name = edges)]
struct NewEdgeRow<'a> {
    edge_key: &'a str,
    from_id: &'a str,
    to_id: &'a str,
    author: &'a str,
    project: &'a str,
    parent: Option<&'a str>,
    created_at: &'a str,
}

#[derive(AsChangeset)]
#[diesel(table_name = pipelines)]
struct PipelineChanges<'a> {
    name: Option<&'a str>,
    complete: Option<i32>,
    updated_at: &'a str,
}

#[derive(AsChangeset)]
#[diesel(table_name = boxes)]
struct BoxChanges<'a> {
    name: Option<&'a str>,
    complete: Option<i32>,
    updated_at: &'a str,
}

#[derive(AsChangeset)]
#[diesel(table_name = tasks)]
struct TaskChanges<'a> {
    name: Option<&'a str>,
    status: Option<&'a str>,
}

// ============================================================================
// Database Connection
// ============================================================================

type DbPool = Pool<ConnectionManager<SqliteConnection>>;
type DbConn = PooledConnection<ConnectionManager<SqliteConnection>>;

/// Database connection wrapper with connection pool
pub struct Database {
    pool: DbPool,
}

fn now() -> String {
    chrono::Local::now().to_rfc3339()
}

fn new_key() -> String {
    Uuid::new_v4().to_string()
}

impl Database {
    /// Get the database path that will be used for `config`
    pub fn db_path(config: &Config) -> PathBuf {
        get_db_path(config)
    }

    /// Open database at the configured path (respects PIPETREE_DB_PATH env var)
    pub fn open(config: &Config) -> Result<Self> {
        let path = get_db_path(config);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).ok();
            }
        }
        Self::open_with_pool_size(&path, config.store.pool_size)
    }

    /// Open database at specified path
    pub fn open_at<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_pool_size(path, 5)
    }

    fn open_with_pool_size<P: AsRef<Path>>(path: P, pool_size: u32) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        let manager = ConnectionManager::<SqliteConnection>::new(&path_str);
        let pool = Pool::builder()
            .max_size(pool_size.max(1))
            .build(manager)
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let db = Self { pool };
        db.init_schema()?;
        debug!(path = %path_str, "graph store opened");
        Ok(db)
    }

    fn get_conn(&self) -> Result<DbConn> {
        Ok(self.pool.get()?)
    }

    fn init_schema(&self) -> Result<()> {
        let mut conn = self.get_conn()?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS schema_versions (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                version TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                features TEXT NOT NULL,
                introduced_at TEXT NOT NULL
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS projects (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                node_key TEXT NOT NULL UNIQUE,
                author TEXT NOT NULL,
                name TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS pipelines (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                node_key TEXT NOT NULL UNIQUE,
                author TEXT NOT NULL,
                project TEXT NOT NULL,
                name TEXT NOT NULL,
                complete INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS boxes (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                node_key TEXT NOT NULL UNIQUE,
                author TEXT NOT NULL,
                project TEXT NOT NULL,
                parent TEXT NOT NULL,
                name TEXT NOT NULL,
                complete INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                node_key TEXT NOT NULL UNIQUE,
                author TEXT NOT NULL,
                name TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                created_at TEXT NOT NULL
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS edges (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                edge_key TEXT NOT NULL UNIQUE,
                from_id TEXT NOT NULL,
                to_id TEXT NOT NULL,
                author TEXT NOT NULL,
                project TEXT NOT NULL,
                parent TEXT,
                created_at TEXT NOT NULL,
                UNIQUE(from_id, to_id)
            )
        "#).execute(&mut conn)?;

        diesel::sql_query("CREATE INDEX IF NOT EXISTS idx_projects_author ON projects(author)").execute(&mut conn)?;
        diesel::sql_query("CREATE INDEX IF NOT EXISTS idx_pipelines_scope ON pipelines(author, project)").execute(&mut conn)?;
        diesel::sql_query("CREATE INDEX IF NOT EXISTS idx_boxes_scope ON boxes(author, project)").execute(&mut conn)?;
        diesel::sql_query("CREATE INDEX IF NOT EXISTS idx_tasks_author ON tasks(author)").execute(&mut conn)?;
        diesel::sql_query("CREATE INDEX IF NOT EXISTS idx_edges_from ON edges(from_id)").execute(&mut conn)?;
        diesel::sql_query("CREATE INDEX IF NOT EXISTS idx_edges_to ON edges(to_id)").execute(&mut conn)?;

        self.check_schema(&CURRENT_SCHEMA)?;
        self.register_schema(&CURRENT_SCHEMA)?;
        Ok(())
    }

    /// Refuse a database written by an incompatible major version
    fn check_schema(&self, schema: &StoreSchema) -> Result<()> {
        if let Some(version) = self
            .schema_versions()?
            .into_iter()
            .find(|version| !schema.accepts(version))
        {
            return Err(StoreError::Schema(format!(
                "database has schema {}, this build understands {}",
                version, schema
            )));
        }
        Ok(())
    }

    fn register_schema(&self, schema: &StoreSchema) -> Result<()> {
        let mut conn = self.get_conn()?;
        let now = now();
        let features_json = serde_json::to_string(&schema.features)
            .map_err(|e| StoreError::Malformed(e.to_string()))?;

        let new_schema = NewSchemaVersion {
            version: &schema.version_string(),
            name: schema.name,
            features: &features_json,
            introduced_at: &now,
        };

        diesel::insert_or_ignore_into(schema_versions::table)
            .values(&new_schema)
            .execute(&mut conn)?;

        Ok(())
    }

    /// Version strings registered in this database, oldest first
    pub fn schema_versions(&self) -> Result<Vec<String>> {
        let mut conn = self.get_conn()?;
        let versions = schema_versions::table
            .order(schema_versions::id.asc())
            .select(schema_versions::version)
            .load::<String>(&mut conn)?;
        Ok(versions)
    }

    /// Every edge in insertion order
    pub fn all_edges(&self) -> Result<Vec<Edge>> {
        let mut conn = self.get_conn()?;
        let rows = edges::table
            .order(edges::id.asc())
            .load::<Edge>(&mut conn)?;
        Ok(rows)
    }
}

// ============================================================================
// Graph Store
// ============================================================================

impl GraphStore for Database {
    fn insert_project(&self, author: &str, name: &str) -> Result<Project> {
        let mut conn = self.get_conn()?;
        let key = new_key();
        let now = now();

        let row = NewProjectRow {
            node_key: &key,
            author,
            name,
            created_at: &now,
        };
        diesel::insert_into(projects::table)
            .values(&row)
            .execute(&mut conn)?;

        let project = projects::table
            .filter(projects::node_key.eq(&key))
            .first::<Project>(&mut conn)?;
        Ok(project)
    }

    fn find_project(&self, key: &str, author: &str) -> Result<Option<Project>> {
        let mut conn = self.get_conn()?;
        let project = projects::table
            .filter(projects::node_key.eq(key))
            .filter(projects::author.eq(author))
            .first::<Project>(&mut conn)
            .optional()?;
        Ok(project)
    }

    fn list_projects(&self, author: &str) -> Result<Vec<Project>> {
        let mut conn = self.get_conn()?;
        let rows = projects::table
            .filter(projects::author.eq(author))
            .order(projects::id.asc())
            .load::<Project>(&mut conn)?;
        Ok(rows)
    }

    fn insert_pipeline(&self, scope: &Scope, name: &str) -> Result<Pipeline> {
        let mut conn = self.get_conn()?;
        let key = new_key();
        let now = now();

        let row = NewPipelineRow {
            node_key: &key,
            author: &scope.author,
            project: &scope.project,
            name,
            complete: 0,
            created_at: &now,
            updated_at: &now,
        };
        diesel::insert_into(pipelines::table)
            .values(&row)
            .execute(&mut conn)?;

        let pipeline = pipelines::table
            .filter(pipelines::node_key.eq(&key))
            .first::<Pipeline>(&mut conn)?;
        Ok(pipeline)
    }

    fn find_pipeline(&self, scope: &Scope, key: &str) -> Result<Option<Pipeline>> {
        let mut conn = self.get_conn()?;
        let pipeline = pipelines::table
            .filter(pipelines::node_key.eq(key))
            .filter(pipelines::author.eq(&scope.author))
            .filter(pipelines::project.eq(&scope.project))
            .first::<Pipeline>(&mut conn)
            .optional()?;
        Ok(pipeline)
    }

    fn list_pipelines(&self, scope: &Scope) -> Result<Vec<Pipeline>> {
        let mut conn = self.get_conn()?;
        let rows = pipelines::table
            .filter(pipelines::author.eq(&scope.author))
            .filter(pipelines::project.eq(&scope.project))
            .order(pipelines::id.asc())
            .load::<Pipeline>(&mut conn)?;
        Ok(rows)
    }

    fn update_pipeline(&self, key: &str, patch: &StagePatch) -> Result<Option<Pipeline>> {
        let mut conn = self.get_conn()?;
        let now = now();

        let changes = PipelineChanges {
            name: patch.name.as_deref(),
            complete: patch.complete,
            updated_at: &now,
        };
        let updated = diesel::update(pipelines::table.filter(pipelines::node_key.eq(key)))
            .set(&changes)
            .execute(&mut conn)?;
        if updated == 0 {
            return Ok(None);
        }

        let pipeline = pipelines::table
            .filter(pipelines::node_key.eq(key))
            .first::<Pipeline>(&mut conn)
            .optional()?;
        Ok(pipeline)
    }

    fn delete_pipeline(&self, key: &str) -> Result<usize> {
        let mut conn = self.get_conn()?;
        let deleted = diesel::delete(pipelines::table.filter(pipelines::node_key.eq(key)))
            .execute(&mut conn)?;
        Ok(deleted)
    }

    fn insert_box(&self, scope: &Scope, parent: &str, name: &str) -> Result<BoxNode> {
        let mut conn = self.get_conn()?;
        let key = new_key();
        let now = now();

        let row = NewBoxRow {
            node_key: &key,
            author: &scope.author,
            project: &scope.project,
            parent,
            name,
            complete: 0,
            created_at: &now,
            updated_at: &now,
        };
        diesel::insert_into(boxes::table)
            .values(&row)
            .execute(&mut conn)?;

        let created = boxes::table
            .filter(boxes::node_key.eq(&key))
            .first::<BoxNode>(&mut conn)?;
        Ok(created)
    }

    fn find_box(&self, scope: &Scope, key: &str) -> Result<Option<BoxNode>> {
        let mut conn = self.get_conn()?;
        let found = boxes::table
            .filter(boxes::node_key.eq(key))
            .filter(boxes::author.eq(&scope.author))
            .filter(boxes::project.eq(&scope.project))
            .first::<BoxNode>(&mut conn)
            .optional()?;
        Ok(found)
    }

    fn update_box(&self, key: &str, patch: &StagePatch) -> Result<Option<BoxNode>> {
        let mut conn = self.get_conn()?;
        let now = now();

        let changes = BoxChanges {
            name: patch.name.as_deref(),
            complete: patch.complete,
            updated_at: &now,
        };
        let updated = diesel::update(boxes::table.filter(boxes::node_key.eq(key)))
            .set(&changes)
            .execute(&mut conn)?;
        if updated == 0 {
            return Ok(None);
        }

        let found = boxes::table
            .filter(boxes::node_key.eq(key))
            .first::<BoxNode>(&mut conn)
            .optional()?;
        Ok(found)
    }

    fn delete_box(&self, key: &str) -> Result<usize> {
        let mut conn = self.get_conn()?;
        let deleted = diesel::delete(boxes::table.filter(boxes::node_key.eq(key)))
            .execute(&mut conn)?;
        Ok(deleted)
    }

    fn insert_task(&self, author: &str, name: &str) -> Result<Task> {
        let mut conn = self.get_conn()?;
        let key = new_key();
        let now = now();

        let row = NewTaskRow {
            node_key: &key,
            author,
            name,
            status: "pending",
            created_at: &now,
        };
        diesel::insert_into(tasks::table)
            .values(&row)
            .execute(&mut conn)?;

        let task = tasks::table
            .filter(tasks::node_key.eq(&key))
            .first::<Task>(&mut conn)?;
        Ok(task)
    }

    fn find_task(&self, key: &str, author: &str) -> Result<Option<Task>> {
        let mut conn = self.get_conn()?;
        let task = tasks::table
            .filter(tasks::node_key.eq(key))
            .filter(tasks::author.eq(author))
            .first::<Task>(&mut conn)
            .optional()?;
        Ok(task)
    }

    fn tasks_by_keys(&self, keys: &[String]) -> Result<Vec<Task>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.get_conn()?;
        let wanted: Vec<&str> = keys.iter().map(String::as_str).collect();
        let rows = tasks::table
            .filter(tasks::node_key.eq_any(wanted))
            .order(tasks::id.asc())
            .load::<Task>(&mut conn)?;
        Ok(rows)
    }

    fn update_task(&self, key: &str, patch: &TaskPatch) -> Result<Option<Task>> {
        let mut conn = self.get_conn()?;

        // Diesel rejects an empty changeset
        if !patch.is_empty() {
            let changes = TaskChanges {
                name: patch.name.as_deref(),
                status: patch.status.as_deref(),
            };
            diesel::update(tasks::table.filter(tasks::node_key.eq(key)))
                .set(&changes)
                .execute(&mut conn)?;
        }

        let task = tasks::table
            .filter(tasks::node_key.eq(key))
            .first::<Task>(&mut conn)
            .optional()?;
        Ok(task)
    }

    fn delete_task(&self, key: &str) -> Result<usize> {
        let mut conn = self.get_conn()?;
        let deleted = diesel::delete(tasks::table.filter(tasks::node_key.eq(key)))
            .execute(&mut conn)?;
        Ok(deleted)
    }

    fn insert_edge(&self, edge: NewEdge<'_>) -> Result<Option<Edge>> {
        let mut conn = self.get_conn()?;
        let key = new_key();
        let now = now();
        let from_id = edge.from.to_string();
        let to_id = edge.to.to_string();

        let row = NewEdgeRow {
            edge_key: &key,
            from_id: &from_id,
            to_id: &to_id,
            author: &edge.scope.author,
            project: &edge.scope.project,
            parent: edge.parent,
            created_at: &now,
        };

        // UNIQUE(from_id, to_id) turns a duplicate into a no-op
        let inserted = diesel::insert_or_ignore_into(edges::table)
            .values(&row)
            .execute(&mut conn)?;
        if inserted == 0 {
            return Ok(None);
        }

        let created = edges::table
            .filter(edges::edge_key.eq(&key))
            .first::<Edge>(&mut conn)?;
        Ok(Some(created))
    }

    fn find_edge(&self, from: &NodeRef, to: &NodeRef) -> Result<Option<Edge>> {
        let mut conn = self.get_conn()?;
        let edge = edges::table
            .filter(edges::from_id.eq(from.to_string()))
            .filter(edges::to_id.eq(to.to_string()))
            .first::<Edge>(&mut conn)
            .optional()?;
        Ok(edge)
    }

    fn edges_from(&self, node: &NodeRef) -> Result<Vec<Edge>> {
        let mut conn = self.get_conn()?;
        let rows = edges::table
            .filter(edges::from_id.eq(node.to_string()))
            .order(edges::id.asc())
            .load::<Edge>(&mut conn)?;
        Ok(rows)
    }

    fn edges_to(&self, node: &NodeRef) -> Result<Vec<Edge>> {
        let mut conn = self.get_conn()?;
        let rows = edges::table
            .filter(edges::to_id.eq(node.to_string()))
            .order(edges::id.asc())
            .load::<Edge>(&mut conn)?;
        Ok(rows)
    }

    fn delete_edges_from(&self, node: &NodeRef) -> Result<usize> {
        let mut conn = self.get_conn()?;
        let deleted = diesel::delete(edges::table.filter(edges::from_id.eq(node.to_string())))
            .execute(&mut conn)?;
        Ok(deleted)
    }

    fn delete_edges_to(&self, node: &NodeRef) -> Result<usize> {
        let mut conn = self.get_conn()?;
        let deleted = diesel::delete(edges::table.filter(edges::to_id.eq(node.to_string())))
            .execute(&mut conn)?;
        Ok(deleted)
    }

    fn tree_level(&self, node: &NodeRef) -> Result<Option<TreeLevel>> {
        let mut conn = self.get_conn()?;
        let node_id = node.to_string();
        debug!(node = %node_id, "fetching tree level");

        // One read transaction per level; levels are not isolated from each other
        conn.transaction::<_, StoreError, _>(|conn| {
            let head: Option<(String, String, i32)> = match node {
                NodeRef::Pipeline(key) => pipelines::table
                    .filter(pipelines::node_key.eq(key))
                    .select((pipelines::node_key, pipelines::name, pipelines::complete))
                    .first(conn)
                    .optional()?,
                NodeRef::Box(key) => boxes::table
                    .filter(boxes::node_key.eq(key))
                    .select((boxes::node_key, boxes::name, boxes::complete))
                    .first(conn)
                    .optional()?,
                NodeRef::Project(_) | NodeRef::Task(_) => None,
            };
            let Some((id, name, status)) = head else {
                return Ok(None);
            };

            let child_keys: Vec<String> = edges::table
                .filter(edges::from_id.eq(&node_id))
                .filter(edges::to_id.like("box/%"))
                .order(edges::id.asc())
                .select(edges::to_id)
                .load::<String>(conn)?
                .into_iter()
                .filter_map(|to| to.strip_prefix("box/").map(str::to_string))
                .collect();
            let wanted: Vec<&str> = child_keys.iter().map(String::as_str).collect();
            let mut found: HashMap<String, ChildSummary> = boxes::table
                .filter(boxes::node_key.eq_any(wanted))
                .select((boxes::node_key, boxes::name, boxes::complete))
                .load::<(String, String, i32)>(conn)?
                .into_iter()
                .map(|(id, name, status)| (id.clone(), ChildSummary { id, name, status }))
                .collect();
            // Dangling edges (child row already gone) drop out here
            let boxes = child_keys
                .iter()
                .filter_map(|key| found.remove(key))
                .collect();

            let task_keys: Vec<String> = edges::table
                .filter(edges::to_id.eq(&node_id))
                .filter(edges::from_id.like("tasks/%"))
                .order(edges::id.asc())
                .select(edges::from_id)
                .load::<String>(conn)?
                .into_iter()
                .filter_map(|from| from.strip_prefix("tasks/").map(str::to_string))
                .collect();
            let wanted: Vec<&str> = task_keys.iter().map(String::as_str).collect();
            let mut found_tasks: HashMap<String, TaskSummary> = tasks::table
                .filter(tasks::node_key.eq_any(wanted))
                .select((tasks::node_key, tasks::name, tasks::status))
                .load::<(String, String, String)>(conn)?
                .into_iter()
                .map(|(id, name, status)| (id.clone(), TaskSummary { id, name, status }))
                .collect();
            let tasks = task_keys
                .iter()
                .filter_map(|key| found_tasks.remove(key))
                .collect();

            Ok(Some(TreeLevel {
                id,
                name,
                status,
                boxes,
                tasks,
            }))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::temp_store;

    #[test]
    fn test_schema_registered_once() {
        let (dir, db) = temp_store();
        assert_eq!(db.schema_versions().unwrap(), vec!["1.0.0".to_string()]);

        // Reopening must not register the version again
        let reopened = Database::open_at(dir.path().join("test.db")).unwrap();
        assert_eq!(reopened.schema_versions().unwrap().len(), 1);
        assert_eq!(CURRENT_SCHEMA.to_string(), "v1.0.0 (pipeline-graph)");
    }

    #[test]
    fn test_schema_accepts_same_major_only() {
        assert!(CURRENT_SCHEMA.accepts("1.0.0"));
        assert!(CURRENT_SCHEMA.accepts("1.4.2"));
        assert!(!CURRENT_SCHEMA.accepts("2.0.0"));
        assert!(!CURRENT_SCHEMA.accepts("garbage"));
    }

    #[test]
    fn test_open_rejects_newer_major_schema() {
        let (dir, db) = temp_store();
        let mut conn = db.get_conn().unwrap();
        diesel::insert_into(schema_versions::table)
            .values(&NewSchemaVersion {
                version: "2.0.0",
                name: "future",
                features: "[]",
                introduced_at: "2030-01-01T00:00:00Z",
            })
            .execute(&mut conn)
            .unwrap();
        drop(conn);

        match Database::open_at(dir.path().join("test.db")) {
            Err(StoreError::Schema(message)) => assert!(message.contains("2.0.0")),
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("opened a database with an incompatible schema"),
        }
    }

    #[test]
    fn test_scoped_lookups_enforce_author_and_project() {
        let (_dir, db) = temp_store();
        let scope = Scope::new("u1", "x");
        let pipeline = db.insert_pipeline(&scope, "P").unwrap();

        assert!(db.find_pipeline(&scope, &pipeline.key).unwrap().is_some());
        assert!(db
            .find_pipeline(&Scope::new("u2", "x"), &pipeline.key)
            .unwrap()
            .is_none());
        assert!(db
            .find_pipeline(&Scope::new("u1", "y"), &pipeline.key)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_insert_edge_ignores_duplicate_pair() {
        let (_dir, db) = temp_store();
        let scope = Scope::new("u1", "x");
        let from = NodeRef::Pipeline("p".to_string());
        let to = NodeRef::Box("b".to_string());
        let edge = NewEdge {
            from: &from,
            to: &to,
            scope: &scope,
            parent: Some("p"),
        };

        assert!(db.insert_edge(edge.clone()).unwrap().is_some());
        assert!(db.insert_edge(edge).unwrap().is_none());
        assert_eq!(db.all_edges().unwrap().len(), 1);
    }

    #[test]
    fn test_tree_level_missing_node() {
        let (_dir, db) = temp_store();
        assert!(db
            .tree_level(&NodeRef::Box("nope".to_string()))
            .unwrap()
            .is_none());
        assert!(db
            .tree_level(&NodeRef::Task("nope".to_string()))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_tree_level_lists_children_in_insertion_order() {
        let (_dir, db) = temp_store();
        let scope = Scope::new("u1", "x");
        let pipeline = db.insert_pipeline(&scope, "P").unwrap();
        let mut expected = Vec::new();
        for name in ["first", "second", "third"] {
            let child = db.insert_box(&scope, &pipeline.key, name).unwrap();
            db.insert_edge(NewEdge {
                from: &pipeline.node(),
                to: &child.node(),
                scope: &scope,
                parent: Some(pipeline.key.as_str()),
            })
            .unwrap();
            expected.push(name.to_string());
        }

        let level = db.tree_level(&pipeline.node()).unwrap().unwrap();
        assert_eq!(level.id, pipeline.key);
        assert_eq!(level.status, 0);
        let names: Vec<String> = level.boxes.into_iter().map(|b| b.name).collect();
        assert_eq!(names, expected);
        assert!(level.tasks.is_empty());
    }

    #[test]
    fn test_tree_level_skips_dangling_child() {
        let (_dir, db) = temp_store();
        let scope = Scope::new("u1", "x");
        let parent = db.insert_box(&scope, "p", "parent").unwrap();
        let ghost = NodeRef::Box("ghost".to_string());
        db.insert_edge(NewEdge {
            from: &parent.node(),
            to: &ghost,
            scope: &scope,
            parent: Some(parent.key.as_str()),
        })
        .unwrap();

        let level = db.tree_level(&parent.node()).unwrap().unwrap();
        assert!(level.boxes.is_empty());
    }

    #[test]
    fn test_update_task_with_empty_patch_returns_task() {
        let (_dir, db) = temp_store();
        let task = db.insert_task("u1", "segment").unwrap();
        let same = db
            .update_task(&task.key, &TaskPatch::default())
            .unwrap()
            .unwrap();
        assert_eq!(same, task);
        assert!(db.update_task("missing", &TaskPatch::default()).unwrap().is_none());
    }
}
