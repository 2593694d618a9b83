//! Execution plan: the validated dependency graph for one request.
//!
//! The plan is built once from the decomposed task list and its topology is
//! frozen afterwards. Only task status/result fields change during a run.
//! Edges point from a dependency to its dependent, so "outgoing" neighbors
//! form the reverse-dependency index the scheduler walks on completion.

use crate::core::descriptor::TaskDescriptor;
use crate::core::task::{Task, TaskId, TaskResult, TaskStatus};
use crate::error::PlanError;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

/// The task dependency graph for one request.
///
/// Node indices follow the order of the original task list, which makes
/// insertion order available everywhere as a cheap `usize` rank.
pub struct ExecutionPlan {
    /// The underlying directed graph (dependency -> dependent).
    graph: DiGraph<Task, ()>,
    /// Index mapping from TaskId to NodeIndex for fast lookups.
    task_index: HashMap<TaskId, NodeIndex>,
    /// Number of distinct dependencies per task, by position.
    in_degree: Vec<usize>,
    /// Dependents per task, by position, sorted by position.
    dependents: Vec<Vec<usize>>,
    /// A topological order found while validating the plan.
    topo_order: Vec<usize>,
}

impl ExecutionPlan {
    /// Build and validate a plan from decomposed task descriptors.
    ///
    /// # Errors
    /// - `DuplicateId` when two descriptors share an id
    /// - `UnknownDependency` when a dependency id is not in the list
    /// - `CycleDetected` when Kahn's algorithm cannot peel every node
    pub fn build(descriptors: &[TaskDescriptor]) -> Result<Self, PlanError> {
        let mut graph = DiGraph::with_capacity(descriptors.len(), descriptors.len());
        let mut task_index = HashMap::with_capacity(descriptors.len());

        for desc in descriptors {
            if task_index.contains_key(&desc.id) {
                return Err(PlanError::DuplicateId(desc.id.clone()));
            }
            let mut seen = HashSet::new();
            let deps: Vec<TaskId> = desc
                .dependencies
                .iter()
                .filter(|d| seen.insert((*d).clone()))
                .cloned()
                .collect();
            let task = Task::new(desc.id.clone(), &desc.task, desc.agent, deps);
            let index = graph.add_node(task);
            task_index.insert(desc.id.clone(), index);
        }

        let node_count = graph.node_count();
        let mut in_degree = vec![0usize; node_count];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); node_count];
        let mut edges = Vec::new();

        for index in graph.node_indices() {
            let task = &graph[index];
            for dep in &task.dependencies {
                let dep_index = task_index.get(dep).ok_or_else(|| PlanError::UnknownDependency {
                    task: task.id.clone(),
                    missing: dep.clone(),
                })?;
                edges.push((*dep_index, index));
                in_degree[index.index()] += 1;
                dependents[dep_index.index()].push(index.index());
            }
        }
        for (from, to) in edges {
            graph.add_edge(from, to, ());
        }
        for list in &mut dependents {
            list.sort_unstable();
        }

        let topo_order = kahn_order(&in_degree, &dependents).map_err(|remaining| {
            PlanError::CycleDetected {
                remaining: remaining
                    .into_iter()
                    .map(|pos| graph[NodeIndex::new(pos)].id.clone())
                    .collect(),
            }
        })?;

        Ok(Self {
            graph,
            task_index,
            in_degree,
            dependents,
            topo_order,
        })
    }

    /// Get a reference to a task by its ID.
    pub fn get_task(&self, id: &TaskId) -> Option<&Task> {
        self.task_index
            .get(id)
            .and_then(|&index| self.graph.node_weight(index))
    }

    /// Get a mutable reference to a task by its ID.
    ///
    /// Only status and result fields should be touched; topology is fixed.
    pub fn get_task_mut(&mut self, id: &TaskId) -> Option<&mut Task> {
        let index = *self.task_index.get(id)?;
        self.graph.node_weight_mut(index)
    }

    /// Position of a task in the original task list.
    pub fn position(&self, id: &TaskId) -> Option<usize> {
        self.task_index.get(id).map(|index| index.index())
    }

    pub fn task_at(&self, position: usize) -> Option<&Task> {
        self.graph.node_weight(NodeIndex::new(position))
    }

    pub fn task_at_mut(&mut self, position: usize) -> Option<&mut Task> {
        self.graph.node_weight_mut(NodeIndex::new(position))
    }

    /// Get the number of tasks in the plan.
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Get the number of dependency edges.
    pub fn dependency_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn contains_task(&self, id: &TaskId) -> bool {
        self.task_index.contains_key(id)
    }

    /// All tasks in plan (insertion) order.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.graph.node_weights()
    }

    /// Task ids in plan order.
    pub fn task_ids(&self) -> Vec<TaskId> {
        self.tasks().map(|t| t.id.clone()).collect()
    }

    /// Direct dependencies of a task, as listed in the decomposition.
    pub fn dependencies(&self, id: &TaskId) -> &[TaskId] {
        self.get_task(id)
            .map(|t| t.dependencies.as_slice())
            .unwrap_or(&[])
    }

    /// Tasks that directly depend on the given task, in plan order.
    pub fn dependents(&self, id: &TaskId) -> Vec<&Task> {
        match self.position(id) {
            Some(pos) => self.dependents[pos]
                .iter()
                .filter_map(|&p| self.task_at(p))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Reverse-dependency index entry by position.
    pub fn dependents_at(&self, position: usize) -> &[usize] {
        self.dependents
            .get(position)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Fresh copy of the precomputed in-degree counts, by position.
    pub fn in_degrees(&self) -> Vec<usize> {
        self.in_degree.clone()
    }

    pub fn in_degree(&self, id: &TaskId) -> Option<usize> {
        self.position(id).map(|pos| self.in_degree[pos])
    }

    /// Every transitive descendant of a task, in plan order.
    pub fn descendants(&self, id: &TaskId) -> Vec<TaskId> {
        let Some(&start) = self.task_index.get(id) else {
            return Vec::new();
        };
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([start]);
        while let Some(index) = queue.pop_front() {
            for next in self.graph.neighbors_directed(index, Direction::Outgoing) {
                if seen.insert(next.index()) {
                    queue.push_back(next);
                }
            }
        }
        let mut positions: Vec<usize> = seen.into_iter().collect();
        positions.sort_unstable();
        positions
            .into_iter()
            .filter_map(|p| self.task_at(p).map(|t| t.id.clone()))
            .collect()
    }

    /// Tasks in the topological order found at build time.
    pub fn topological_order(&self) -> Vec<&Task> {
        self.topo_order
            .iter()
            .filter_map(|&p| self.task_at(p))
            .collect()
    }

    /// Group tasks into dependency levels: level 0 has no dependencies,
    /// level n depends on at least one task at level n-1.
    pub fn levels(&self) -> Vec<Vec<&Task>> {
        let mut depth = vec![0usize; self.len()];
        for &pos in &self.topo_order {
            for &child in &self.dependents[pos] {
                depth[child] = depth[child].max(depth[pos] + 1);
            }
        }
        let max_depth = depth.iter().copied().max();
        let mut levels: Vec<Vec<&Task>> = match max_depth {
            Some(max) => vec![Vec::new(); max + 1],
            None => Vec::new(),
        };
        for (pos, &d) in depth.iter().enumerate() {
            if let Some(task) = self.task_at(pos) {
                levels[d].push(task);
            }
        }
        levels
    }

    /// True once every task is in a terminal state.
    pub fn all_terminal(&self) -> bool {
        self.tasks().all(Task::is_terminal)
    }

    /// Ids of tasks whose status matches the predicate, in plan order.
    pub fn ids_where(&self, predicate: impl Fn(&TaskStatus) -> bool) -> Vec<TaskId> {
        self.tasks()
            .filter(|t| predicate(&t.status))
            .map(|t| t.id.clone())
            .collect()
    }

    /// Serializable copy of the plan state for hosts that persist runs.
    pub fn snapshot(&self) -> PlanSnapshot {
        PlanSnapshot {
            tasks: self.tasks().cloned().collect(),
        }
    }
}

impl std::fmt::Debug for ExecutionPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionPlan")
            .field("tasks", &self.len())
            .field("dependencies", &self.dependency_count())
            .finish()
    }
}

/// Plan state as plain data, in plan order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanSnapshot {
    pub tasks: Vec<Task>,
}

impl PlanSnapshot {
    /// Validated results of Done tasks, in plan order.
    pub fn results(&self) -> Vec<TaskResult> {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Done)
            .filter_map(|t| {
                t.result.clone().map(|result| TaskResult {
                    task_id: t.id.clone(),
                    agent: t.agent,
                    result,
                })
            })
            .collect()
    }
}

/// Kahn's algorithm over positions. Zero in-degree nodes are peeled in
/// position order; on a cycle, the positions that could not be peeled are
/// returned as the error.
fn kahn_order(in_degree: &[usize], dependents: &[Vec<usize>]) -> Result<Vec<usize>, Vec<usize>> {
    let mut remaining = in_degree.to_vec();
    let mut queue: VecDeque<usize> = remaining
        .iter()
        .enumerate()
        .filter(|(_, &d)| d == 0)
        .map(|(pos, _)| pos)
        .collect();
    let mut order = Vec::with_capacity(in_degree.len());

    while let Some(pos) = queue.pop_front() {
        order.push(pos);
        for &child in &dependents[pos] {
            remaining[child] -= 1;
            if remaining[child] == 0 {
                queue.push_back(child);
            }
        }
    }

    if order.len() == in_degree.len() {
        Ok(order)
    } else {
        let peeled: HashSet<usize> = order.into_iter().collect();
        Err((0..in_degree.len()).filter(|p| !peeled.contains(p)).collect())
    }
}
