//! Parallel execution grouping
//!
//! Greedy first-fit: each task, in input order, joins the first group that
//! has room and holds no task it shares a direct dependency edge with.

use std::collections::BTreeSet;

use crate::task::{Task, TaskId};

/// Partition `tasks` into groups of at most `cap` tasks with no direct
/// dependency edge inside a group. Deterministic for a given input order.
pub fn group_for_parallel_execution(tasks: &[Task], cap: usize) -> Vec<Vec<TaskId>> {
    let cap = cap.max(1);
    let mut groups: Vec<Vec<&Task>> = Vec::new();

    for task in tasks {
        let slot = groups.iter().position(|group| {
            group.len() < cap && group.iter().all(|other| !shares_edge(task, other))
        });
        match slot {
            Some(i) => groups[i].push(task),
            None => groups.push(vec![task]),
        }
    }

    groups
        .into_iter()
        .map(|g| g.into_iter().map(|t| t.id.clone()).collect())
        .collect()
}

fn shares_edge(a: &Task, b: &Task) -> bool {
    a.dependencies.contains(&b.id) || b.dependencies.contains(&a.id)
}

/// Tasks whose dependencies are all in `completed`
pub fn ready_tasks<'a>(tasks: &'a [Task], completed: &BTreeSet<TaskId>) -> Vec<&'a Task> {
    tasks
        .iter()
        .filter(|t| t.dependencies.iter().all(|d| completed.contains(d)))
        .collect()
}
