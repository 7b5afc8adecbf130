//! Dependency graph over task ids.
//!
//! Edges point from a task to the tasks it depends on. Ordered maps keep
//! traversal order stable, so cycle reports and closures are reproducible.

use std::collections::{BTreeMap, BTreeSet};

use crate::domain::TaskId;

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    edges: BTreeMap<TaskId, BTreeSet<TaskId>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    /// On the current DFS path.
    Gray,
    /// Fully explored.
    Black,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// `task` depends on `depends_on`.
    pub fn add_dependency(&mut self, task: TaskId, depends_on: TaskId) {
        self.edges.entry(task).or_default().insert(depends_on);
    }

    fn dependencies(&self, task: TaskId) -> impl Iterator<Item = TaskId> + '_ {
        self.edges.get(&task).into_iter().flatten().copied()
    }

    /// Every task reachable from `root` through dependency edges, `root`
    /// excluded, in id order.
    pub fn closure(&self, root: TaskId) -> Vec<TaskId> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<TaskId> = self.dependencies(root).collect();
        while let Some(node) = stack.pop() {
            if node == root || !seen.insert(node) {
                continue;
            }
            stack.extend(self.dependencies(node));
        }
        seen.into_iter().collect()
    }

    /// First cycle reachable from `root`.
    ///
    /// The returned path starts and ends with the same node, e.g.
    /// `[b, c, d, b]`.
    pub fn detect_cycle_from(&self, root: TaskId) -> Option<Vec<TaskId>> {
        let mut colors = BTreeMap::new();
        let mut path = Vec::new();
        self.visit(root, &mut colors, &mut path)
    }

    fn visit(
        &self,
        node: TaskId,
        colors: &mut BTreeMap<TaskId, Color>,
        path: &mut Vec<TaskId>,
    ) -> Option<Vec<TaskId>> {
        match colors.get(&node) {
            Some(Color::Black) => return None,
            Some(Color::Gray) => {
                let start = path.iter().position(|&n| n == node)?;
                let mut cycle = path[start..].to_vec();
                cycle.push(node);
                return Some(cycle);
            }
            None => {}
        }

        colors.insert(node, Color::Gray);
        path.push(node);
        let deps: Vec<TaskId> = self.dependencies(node).collect();
        for dep in deps {
            if let Some(cycle) = self.visit(dep, colors, path) {
                return Some(cycle);
            }
        }
        path.pop();
        colors.insert(node, Color::Black);
        None
    }
}
