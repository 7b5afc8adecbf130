//! Dependency resolver backed by the in-memory task store.
//!
//! The environment document has the shape
//!
//! ```json
//! {
//!   "task": {"id": 3, "name": "billing:charge", "workflow": "billing", "step": "charge"},
//!   "input": {...},
//!   "dependencies": {"fetch": {"id": 1, "status": "SUCCEEDED", "output": {...}}}
//! }
//! ```
//!
//! `dependencies` covers the transitive closure of `depends_on`, keyed by
//! step name. When two dependencies share a step name the higher id wins.

use std::collections::VecDeque;

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use super::{DependencyGraph, InMemoryTaskStore};
use crate::domain::{ResolveError, Task};
use crate::ports::DependencyResolver;

pub struct GraphDependencyResolver {
    store: InMemoryTaskStore,
}

impl GraphDependencyResolver {
    pub fn new(store: InMemoryTaskStore) -> Self {
        Self { store }
    }

    /// Loads every task reachable from `root` and the edges between them.
    fn load_graph(&self, root: &Task) -> Result<DependencyGraph, ResolveError> {
        let mut graph = DependencyGraph::new();
        let mut queue: VecDeque<Task> = VecDeque::from([root.clone()]);
        let mut loaded = std::collections::BTreeSet::from([root.id]);

        while let Some(task) = queue.pop_front() {
            for &dep in &task.depends_on {
                graph.add_dependency(task.id, dep);
                if !loaded.insert(dep) {
                    continue;
                }
                let Some(found) = self.store.task(dep)? else {
                    return Err(ResolveError::MissingDependency {
                        task_id: task.id,
                        missing: dep,
                    });
                };
                queue.push_back(found);
            }
        }
        Ok(graph)
    }
}

#[async_trait]
impl DependencyResolver for GraphDependencyResolver {
    async fn resolve(&self, task: &Task) -> Result<Value, ResolveError> {
        let graph = self.load_graph(task)?;
        if let Some(cycle) = graph.detect_cycle_from(task.id) {
            return Err(ResolveError::Cycle(cycle));
        }

        let mut dependencies = Map::new();
        for dep in self.store.tasks(&graph.closure(task.id))? {
            let name = dep
                .parsed_name()
                .map_err(|_| ResolveError::MalformedDependency(dep.id))?;
            dependencies.insert(
                name.step().to_string(),
                json!({
                    "id": dep.id,
                    "status": dep.status,
                    "output": dep.output.unwrap_or(Value::Null),
                }),
            );
        }

        let (workflow, step) = match task.parsed_name() {
            Ok(name) => (json!(name.workflow()), json!(name.step())),
            Err(_) => (Value::Null, Value::Null),
        };

        Ok(json!({
            "task": {
                "id": task.id,
                "name": task.name,
                "workflow": workflow,
                "step": step,
            },
            "input": task.input,
            "dependencies": dependencies,
        }))
    }
}
