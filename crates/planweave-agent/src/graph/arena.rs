use std::collections::{HashMap, VecDeque};

use planweave_core::workflow::{Workflow, WorkflowStep};

/// Index-based view of a workflow.
///
/// Steps live in a flat arena in proposal order; edges are arena indices.
/// When an id is proposed twice the first occurrence wins, and references to
/// unknown ids are kept aside as dangling rather than turned into edges.
#[derive(Debug, Clone)]
pub struct StepGraph {
    steps: Vec<WorkflowStep>,
    index: HashMap<String, usize>,
    adjacency: Vec<Vec<usize>>,
    dangling: Vec<(usize, String)>,
}

impl StepGraph {
    pub fn build(workflow: &Workflow) -> Self {
        let mut steps = Vec::with_capacity(workflow.steps.len());
        let mut index = HashMap::new();
        for step in &workflow.steps {
            if !index.contains_key(&step.id) {
                index.insert(step.id.clone(), steps.len());
                steps.push(step.clone());
            }
        }

        let mut adjacency = Vec::with_capacity(steps.len());
        let mut dangling = Vec::new();
        for (idx, step) in steps.iter().enumerate() {
            let mut targets = Vec::new();
            for id in step.successors() {
                match index.get(id) {
                    Some(&t) => targets.push(t),
                    None => dangling.push((idx, id.to_string())),
                }
            }
            adjacency.push(targets);
        }

        Self {
            steps,
            index,
            adjacency,
            dangling,
        }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn entry(&self) -> Option<usize> {
        if self.steps.is_empty() {
            None
        } else {
            Some(0)
        }
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn step(&self, idx: usize) -> &WorkflowStep {
        &self.steps[idx]
    }

    pub fn steps(&self) -> impl Iterator<Item = (usize, &WorkflowStep)> {
        self.steps.iter().enumerate()
    }

    /// All effective successors of `idx`, both branch arms included.
    pub fn successors(&self, idx: usize) -> &[usize] {
        &self.adjacency[idx]
    }

    /// Map a list of step ids to indices, dropping unknown ids and repeats.
    pub fn resolve(&self, ids: &[String]) -> Vec<usize> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(idx) = self.index_of(id) {
                if !out.contains(&idx) {
                    out.push(idx);
                }
            }
        }
        out
    }

    /// `(from, missing_id)` for every reference to an unknown step.
    pub fn dangling(&self) -> &[(usize, String)] {
        &self.dangling
    }

    /// Steps with no effective successors at all.
    pub fn terminals(&self) -> Vec<usize> {
        (0..self.steps.len())
            .filter(|&idx| self.steps[idx].is_terminal())
            .collect()
    }

    /// Indices reachable from the entry step, including the entry itself.
    pub fn reachable(&self) -> Vec<bool> {
        let mut seen = vec![false; self.steps.len()];
        let Some(entry) = self.entry() else {
            return seen;
        };
        let mut queue = VecDeque::from([entry]);
        seen[entry] = true;
        while let Some(idx) = queue.pop_front() {
            for &next in &self.adjacency[idx] {
                if !seen[next] {
                    seen[next] = true;
                    queue.push_back(next);
                }
            }
        }
        seen
    }

    /// Kahn's algorithm; `None` if the graph has a cycle.
    pub fn topological_order(&self) -> Option<Vec<usize>> {
        let mut in_degree = vec![0usize; self.steps.len()];
        for targets in &self.adjacency {
            for &t in targets {
                in_degree[t] += 1;
            }
        }

        let mut queue: VecDeque<usize> = (0..self.steps.len())
            .filter(|&idx| in_degree[idx] == 0)
            .collect();
        let mut order = Vec::with_capacity(self.steps.len());
        while let Some(idx) = queue.pop_front() {
            order.push(idx);
            for &next in &self.adjacency[idx] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    queue.push_back(next);
                }
            }
        }

        (order.len() == self.steps.len()).then_some(order)
    }
}
