//! Dependency graph validation and ordering.
//!
//! The graph is rebuilt from the registry whenever it is needed; it is a
//! snapshot, never shared state. Nodes keep registration order so that
//! cycle reports and execution order are reproducible.

use std::collections::{HashMap, VecDeque};

use crate::error::SchedulerError;

/// DFS colouring used by cycle detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// Snapshot of job names and their prerequisite edges.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    nodes: Vec<String>,
    index: HashMap<String, usize>,
    /// Declared dependency names per node, as given.
    declared: Vec<Vec<String>>,
    /// Distinct registered prerequisites per node.
    prerequisites: Vec<Vec<usize>>,
}

impl DependencyGraph {
    /// Build a graph from `(name, dependencies)` pairs in registration order.
    ///
    /// Dependencies naming unknown jobs are kept in `declared` but produce
    /// no edge.
    pub fn new<'a, I>(jobs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a [String])>,
    {
        let mut graph = Self::default();
        for (name, deps) in jobs {
            if graph.index.contains_key(name) {
                continue;
            }
            graph.index.insert(name.to_string(), graph.nodes.len());
            graph.nodes.push(name.to_string());
            graph.declared.push(deps.to_vec());
        }

        graph.prerequisites = graph
            .declared
            .iter()
            .map(|deps| {
                let mut edges: Vec<usize> = Vec::with_capacity(deps.len());
                for dep in deps {
                    if let Some(&idx) = graph.index.get(dep)
                        && !edges.contains(&idx)
                    {
                        edges.push(idx);
                    }
                }
                edges
            })
            .collect();

        graph
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Fail with `DependencyNotFound` on the first declared dependency of
    /// `job` that is not a node of this graph.
    pub fn check_references(&self, job: &str) -> Result<(), SchedulerError> {
        let Some(&idx) = self.index.get(job) else {
            return Err(SchedulerError::JobNotFound {
                name: job.to_string(),
            });
        };
        match self.declared[idx].iter().find(|dep| !self.contains(dep)) {
            Some(missing) => Err(SchedulerError::DependencyNotFound {
                job: job.to_string(),
                dependency: missing.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Check every node's references.
    pub fn check_all_references(&self) -> Result<(), SchedulerError> {
        self.nodes
            .iter()
            .try_for_each(|name| self.check_references(name))
    }

    /// Three-colour DFS over every node.
    ///
    /// Each node is used as a root in registration order, so cycles that are
    /// unreachable from any particular job are still found.
    pub fn detect_cycles(&self) -> Result<(), SchedulerError> {
        let mut marks = vec![Mark::Unvisited; self.nodes.len()];
        let mut stack = Vec::new();

        for root in 0..self.nodes.len() {
            if marks[root] == Mark::Unvisited {
                self.visit(root, &mut marks, &mut stack)?;
            }
        }
        Ok(())
    }

    fn visit(
        &self,
        node: usize,
        marks: &mut [Mark],
        stack: &mut Vec<usize>,
    ) -> Result<(), SchedulerError> {
        marks[node] = Mark::InProgress;
        stack.push(node);

        for &dep in &self.prerequisites[node] {
            match marks[dep] {
                Mark::InProgress => {
                    let start = stack.iter().position(|&n| n == dep).unwrap_or(0);
                    let mut cycle: Vec<String> =
                        stack[start..].iter().map(|&n| self.nodes[n].clone()).collect();
                    cycle.push(self.nodes[dep].clone());
                    return Err(SchedulerError::CircularDependency {
                        job: self.nodes[dep].clone(),
                        cycle,
                    });
                }
                Mark::Unvisited => self.visit(dep, marks, stack)?,
                Mark::Done => {}
            }
        }

        stack.pop();
        marks[node] = Mark::Done;
        Ok(())
    }

    /// Kahn's algorithm. Every job appears after all of its prerequisites;
    /// ties are broken by registration order.
    pub fn resolve_order(&self) -> Result<Vec<String>, SchedulerError> {
        let mut in_degree: Vec<usize> = self.prerequisites.iter().map(Vec::len).collect();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); self.nodes.len()];
        for (node, prereqs) in self.prerequisites.iter().enumerate() {
            for &prereq in prereqs {
                dependents[prereq].push(node);
            }
        }

        let mut queue: VecDeque<usize> = (0..self.nodes.len())
            .filter(|&n| in_degree[n] == 0)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(node) = queue.pop_front() {
            order.push(self.nodes[node].clone());
            for &dependent in &dependents[node] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    queue.push_back(dependent);
                }
            }
        }

        if order.len() < self.nodes.len() {
            return Err(SchedulerError::UnresolvedOrder {
                resolved: order.len(),
                total: self.nodes.len(),
            });
        }
        Ok(order)
    }
}
