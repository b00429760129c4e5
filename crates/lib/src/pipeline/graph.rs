//! The pipeline's task graph.
//!
//! Steps are nodes; an edge `a -> b` means `b` consumes what `a` produced.
//! The executor runs steps in a topological order of this graph, so ordering
//! is explicit data rather than an accident of how the code is laid out.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};

use super::types::{PipelineError, StepId};

#[derive(Debug, Default)]
pub struct TaskGraph {
  graph: DiGraph<StepId, ()>,
  nodes: HashMap<StepId, NodeIndex>,
}

impl TaskGraph {
  pub fn new() -> Self {
    Self::default()
  }

  /// The graph every build runs.
  ///
  /// Each stage is a chain in declaration order. The target stage additionally
  /// consumes the sealed BuildOutput: `builder.seal -> target.copy`.
  pub fn standard() -> Self {
    let mut graph = Self::new();
    graph.chain(&StepId::ALL);
    graph.add_dependency(StepId::BuilderSeal, StepId::TargetCopy);
    graph
  }

  /// Add a step with no dependencies. Adding a step twice is a no-op.
  pub fn add_step(&mut self, step: StepId) -> NodeIndex {
    if let Some(&idx) = self.nodes.get(&step) {
      return idx;
    }
    let idx = self.graph.add_node(step);
    self.nodes.insert(step, idx);
    idx
  }

  /// Declare that `dependent` needs `dependency` to have completed.
  pub fn add_dependency(&mut self, dependency: StepId, dependent: StepId) {
    let from = self.add_step(dependency);
    let to = self.add_step(dependent);
    if !self.graph.contains_edge(from, to) {
      self.graph.add_edge(from, to, ());
    }
  }

  /// Link `steps` so each depends on the one before it.
  pub fn chain(&mut self, steps: &[StepId]) {
    for step in steps {
      self.add_step(*step);
    }
    for pair in steps.windows(2) {
      self.add_dependency(pair[0], pair[1]);
    }
  }

  pub fn len(&self) -> usize {
    self.graph.node_count()
  }

  pub fn is_empty(&self) -> bool {
    self.graph.node_count() == 0
  }

  /// Steps in an order where every dependency comes before its dependents.
  ///
  /// Ties are broken by declaration order of [`StepId`] so the order is stable.
  /// Steps left unvisited once no step is ready sit on a cycle.
  pub fn order(&self) -> Result<Vec<StepId>, PipelineError> {
    let mut waiting: Vec<usize> = self
      .graph
      .node_indices()
      .map(|idx| self.graph.neighbors_directed(idx, Direction::Incoming).count())
      .collect();
    let mut ready: BinaryHeap<Reverse<StepId>> = self
      .graph
      .node_indices()
      .filter(|idx| waiting[idx.index()] == 0)
      .map(|idx| Reverse(self.graph[idx]))
      .collect();

    let mut order = Vec::with_capacity(self.len());
    while let Some(Reverse(step)) = ready.pop() {
      order.push(step);
      for next in self.graph.neighbors_directed(self.nodes[&step], Direction::Outgoing) {
        waiting[next.index()] -= 1;
        if waiting[next.index()] == 0 {
          ready.push(Reverse(self.graph[next]));
        }
      }
    }

    if order.len() < self.len() {
      return Err(PipelineError::CycleDetected);
    }
    Ok(order)
  }

  /// Direct dependencies of `step`.
  pub fn dependencies(&self, step: StepId) -> Vec<StepId> {
    let Some(&idx) = self.nodes.get(&step) else {
      return Vec::new();
    };
    let mut deps: Vec<StepId> = self
      .graph
      .neighbors_directed(idx, Direction::Incoming)
      .map(|dep| self.graph[dep])
      .collect();
    deps.sort();
    deps
  }
}
