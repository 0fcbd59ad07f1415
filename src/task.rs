//! Tasks: the leaf work items attached to boxes

use crate::error::{NotFound, Outcome, Result};
use crate::model::{Task, TaskPatch};
use crate::store::GraphStore;
use tracing::{debug, info};

pub fn create_task<S: GraphStore + ?Sized>(store: &S, author: &str, name: &str) -> Result<Task> {
    let task = store.insert_task(author, name)?;
    info!(task = %task.key, author, "task created");
    Ok(task)
}

pub fn get_task<S: GraphStore + ?Sized>(store: &S, author: &str, key: &str) -> Result<Outcome<Task>> {
    Ok(match store.find_task(key, author)? {
        Some(task) => Outcome::Done(task),
        None => Outcome::NotFound(NotFound::Task(key.to_string())),
    })
}

/// Tasks of `author` among `keys`, in stored order. Unknown keys are skipped.
pub fn tasks_by_keys<S: GraphStore + ?Sized>(
    store: &S,
    author: &str,
    keys: &[String],
) -> Result<Vec<Task>> {
    let tasks = store
        .tasks_by_keys(keys)?
        .into_iter()
        .filter(|task| task.author == author)
        .collect();
    Ok(tasks)
}

pub fn update_task<S: GraphStore + ?Sized>(
    store: &S,
    author: &str,
    key: &str,
    patch: &TaskPatch,
) -> Result<Outcome<Task>> {
    if store.find_task(key, author)?.is_none() {
        return Ok(Outcome::NotFound(NotFound::Task(key.to_string())));
    }
    Ok(match store.update_task(key, patch)? {
        Some(task) => Outcome::Done(task),
        None => Outcome::NotFound(NotFound::Task(key.to_string())),
    })
}

/// Apply `patch` to every task in `keys`, skipping the ones that do not resolve
pub fn update_tasks<S: GraphStore + ?Sized>(
    store: &S,
    author: &str,
    keys: &[String],
    patch: &TaskPatch,
) -> Result<Vec<Task>> {
    let mut updated = Vec::with_capacity(keys.len());
    for key in keys {
        match update_task(store, author, key, patch)? {
            Outcome::Done(task) => updated.push(task),
            Outcome::NotFound(missing) => debug!(%missing, "skipping task"),
        }
    }
    info!(requested = keys.len(), updated = updated.len(), "tasks updated");
    Ok(updated)
}

/// Detach the task from every box and delete it
pub fn delete_task<S: GraphStore + ?Sized>(store: &S, author: &str, key: &str) -> Result<Outcome<Task>> {
    let Some(task) = store.find_task(key, author)? else {
        return Ok(Outcome::NotFound(NotFound::Task(key.to_string())));
    };
    let node = task.node();
    let edges = store.delete_edges_from(&node)? + store.delete_edges_to(&node)?;
    store.delete_task(key)?;
    info!(task = %key, edges, "task deleted");
    Ok(Outcome::Done(task))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attach::attach;
    use crate::model::Scope;
    use crate::test_support::temp_store;
    use crate::tree::materialize;

    #[test]
    fn test_tasks_by_keys_filters_author_and_unknown() {
        let (_dir, db) = temp_store();
        let mine = create_task(&db, "u1", "a").unwrap();
        let theirs = create_task(&db, "u2", "b").unwrap();

        let found = tasks_by_keys(
            &db,
            "u1",
            &[mine.key.clone(), theirs.key.clone(), "ghost".to_string()],
        )
        .unwrap();
        assert_eq!(found, vec![mine]);
    }

    #[test]
    fn test_update_tasks_skips_missing() {
        let (_dir, db) = temp_store();
        let first = create_task(&db, "u1", "a").unwrap();
        let second = create_task(&db, "u1", "b").unwrap();
        let patch = TaskPatch {
            name: None,
            status: Some("done".to_string()),
        };

        let updated = update_tasks(
            &db,
            "u1",
            &[first.key.clone(), "ghost".to_string(), second.key.clone()],
            &patch,
        )
        .unwrap();
        assert_eq!(updated.len(), 2);
        assert!(updated.iter().all(|task| task.status == "done"));
        assert_eq!(updated[0].name, "a");
    }

    #[test]
    fn test_get_task_respects_author() {
        let (_dir, db) = temp_store();
        let task = create_task(&db, "u1", "a").unwrap();
        assert_eq!(task.status, "pending");
        assert!(get_task(&db, "u1", &task.key).unwrap().is_done());
        assert_eq!(
            get_task(&db, "u2", &task.key).unwrap().not_found(),
            Some(&NotFound::Task(task.key.clone()))
        );
    }

    #[test]
    fn test_delete_task_detaches_it() {
        let (_dir, db) = temp_store();
        let scope = Scope::new("u1", "x");
        let stage = db.insert_box(&scope, "p", "B").unwrap();
        let task = create_task(&db, "u1", "a").unwrap();
        attach(&db, &scope, &stage.key, &[task.key.clone()]).unwrap();
        assert_eq!(
            materialize(&db, &stage.node()).unwrap().unwrap().tasks.len(),
            1
        );

        let deleted = delete_task(&db, "u1", &task.key).unwrap().done().unwrap();
        assert_eq!(deleted.key, task.key);
        assert!(materialize(&db, &stage.node()).unwrap().unwrap().tasks.is_empty());
        assert!(delete_task(&db, "u1", &task.key).unwrap().not_found().is_some());
    }
}
