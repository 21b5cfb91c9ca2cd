//! Pending task sets, one per project
//!
//! Each project keeps two ordered sets over the same task map:
//! - `ready`: tasks whose `exetime` has passed, ordered by priority
//!   (highest first), then `exetime`, then `task_id`
//! - `delayed`: tasks waiting for their `exetime`, ordered by `exetime`

use crate::task::Task;
use chrono::{DateTime, Utc};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, HashMap};

type ReadyKey = (Reverse<i32>, DateTime<Utc>, String);
type DelayedKey = (DateTime<Utc>, String);

#[derive(Debug, Default)]
struct ProjectQueue {
    tasks: HashMap<String, Task>,
    ready: BTreeSet<ReadyKey>,
    delayed: BTreeSet<DelayedKey>,
}

impl ProjectQueue {
    fn insert(&mut self, task: Task, now: DateTime<Utc>) {
        self.remove(&task.task_id);

        let exetime = task.schedule.exetime;
        if exetime <= now {
            self.ready
                .insert((Reverse(task.priority), exetime, task.task_id.clone()));
        } else {
            self.delayed.insert((exetime, task.task_id.clone()));
        }
        self.tasks.insert(task.task_id.clone(), task);
    }

    fn remove(&mut self, task_id: &str) -> Option<Task> {
        let task = self.tasks.remove(task_id)?;
        let exetime = task.schedule.exetime;
        if !self
            .ready
            .remove(&(Reverse(task.priority), exetime, task.task_id.clone()))
        {
            self.delayed.remove(&(exetime, task.task_id.clone()));
        }
        Some(task)
    }

    fn promote(&mut self, now: DateTime<Utc>) -> usize {
        let mut promoted = 0;
        while let Some((exetime, task_id)) = self.delayed.first().cloned() {
            if exetime > now {
                break;
            }
            self.delayed.pop_first();
            if let Some(task) = self.tasks.get(&task_id) {
                self.ready
                    .insert((Reverse(task.priority), exetime, task_id));
                promoted += 1;
            }
        }
        promoted
    }

    fn peek_ready(&self) -> Option<&Task> {
        let (_, _, task_id) = self.ready.first()?;
        self.tasks.get(task_id)
    }

    fn pop_ready(&mut self) -> Option<Task> {
        let (_, _, task_id) = self.ready.pop_first()?;
        self.tasks.remove(&task_id)
    }
}

/// Pending tasks of every project
#[derive(Debug, Default)]
pub struct Frontier {
    projects: BTreeMap<String, ProjectQueue>,
}

impl Frontier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a task, replacing any pending entry with the same id
    pub fn insert(&mut self, task: Task, now: DateTime<Utc>) {
        self.projects
            .entry(task.project.clone())
            .or_default()
            .insert(task, now);
    }

    pub fn remove(&mut self, project: &str, task_id: &str) -> Option<Task> {
        self.projects.get_mut(project)?.remove(task_id)
    }

    pub fn get(&self, project: &str, task_id: &str) -> Option<&Task> {
        self.projects.get(project)?.tasks.get(task_id)
    }

    pub fn contains(&self, project: &str, task_id: &str) -> bool {
        self.get(project, task_id).is_some()
    }

    /// Moves every delayed task whose `exetime` has passed into the ready set
    pub fn promote(&mut self, now: DateTime<Utc>) -> usize {
        self.projects
            .values_mut()
            .map(|queue| queue.promote(now))
            .sum()
    }

    /// The next task of a project in dispatch order
    pub fn peek_ready(&self, project: &str) -> Option<&Task> {
        self.projects.get(project)?.peek_ready()
    }

    pub fn pop_ready(&mut self, project: &str) -> Option<Task> {
        self.projects.get_mut(project)?.pop_ready()
    }

    /// Projects with at least one ready task, in name order
    pub fn ready_projects(&self) -> Vec<String> {
        self.projects
            .iter()
            .filter(|(_, queue)| !queue.ready.is_empty())
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Earliest `exetime` among delayed tasks
    pub fn next_exetime(&self) -> Option<DateTime<Utc>> {
        self.projects
            .values()
            .filter_map(|queue| queue.delayed.first().map(|(exetime, _)| *exetime))
            .min()
    }

    /// Drops every pending task of a project
    pub fn remove_project(&mut self, project: &str) -> usize {
        self.projects
            .remove(project)
            .map_or(0, |queue| queue.tasks.len())
    }

    pub fn project_len(&self, project: &str) -> usize {
        self.projects
            .get(project)
            .map_or(0, |queue| queue.tasks.len())
    }

    pub fn ready_len(&self) -> usize {
        self.projects.values().map(|queue| queue.ready.len()).sum()
    }

    pub fn len(&self) -> usize {
        self.projects.values().map(|queue| queue.tasks.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
