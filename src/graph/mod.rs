//! Explicit task graph over [`AnalysisState`].
//!
//! Nodes declare the state fields they read and the single field they write.
//! [`GraphBuilder::build`] checks the wiring once; [`TaskGraph::execute`]
//! starts every node as soon as all of its producers have finished and merges
//! outputs into the state as a disjoint union.

mod pipeline;

pub use pipeline::Pipeline;

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::debug;

use crate::error::{PipelineError, PipelineResult};
use crate::stages::{AnalysisState, ClassificationOutput, FactCheckOutput, Verdict};

/// A named slot of [`AnalysisState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateField {
    Content,
    ContentId,
    Classification,
    Narrative,
    FactCheck,
    Verdict,
}

impl StateField {
    pub fn as_str(&self) -> &'static str {
        match self {
            StateField::Content => "content",
            StateField::ContentId => "content_id",
            StateField::Classification => "classification",
            StateField::Narrative => "narrative",
            StateField::FactCheck => "fact_check",
            StateField::Verdict => "verdict",
        }
    }

    /// Fields present before any node runs
    pub fn is_initial(&self) -> bool {
        matches!(self, StateField::Content | StateField::ContentId)
    }
}

impl std::fmt::Display for StateField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Value written by a node into its output slot.
#[derive(Debug, Clone)]
pub enum NodeOutput {
    Classification(ClassificationOutput),
    Narrative(String),
    FactCheck(FactCheckOutput),
    Verdict(Verdict),
}

impl NodeOutput {
    /// The slot this output fills
    pub fn field(&self) -> StateField {
        match self {
            NodeOutput::Classification(_) => StateField::Classification,
            NodeOutput::Narrative(_) => StateField::Narrative,
            NodeOutput::FactCheck(_) => StateField::FactCheck,
            NodeOutput::Verdict(_) => StateField::Verdict,
        }
    }

    /// Write into an empty slot. A slot that is already filled is a merge conflict.
    fn merge_into(self, state: &mut AnalysisState, node: &str) -> PipelineResult<()> {
        fn fill<T>(slot: &mut Option<T>, value: T, field: StateField, node: &str) -> PipelineResult<()> {
            if slot.is_some() {
                return Err(PipelineError::MergeConflict {
                    field: field.to_string(),
                    node: node.to_string(),
                });
            }
            *slot = Some(value);
            Ok(())
        }

        let field = self.field();
        match self {
            NodeOutput::Classification(v) => fill(&mut state.classification, v, field, node),
            NodeOutput::Narrative(v) => fill(&mut state.narrative, v, field, node),
            NodeOutput::FactCheck(v) => fill(&mut state.fact_check, v, field, node),
            NodeOutput::Verdict(v) => fill(&mut state.verdict, v, field, node),
        }
    }
}

/// One unit of work in the task graph.
#[async_trait]
pub trait GraphNode: Send + Sync {
    /// Unique node name
    fn id(&self) -> &'static str;

    /// Fields that must be available before the node starts
    fn inputs(&self) -> &'static [StateField];

    /// The single field this node writes
    fn output(&self) -> StateField;

    /// Run against a snapshot of the state
    async fn execute(&self, state: AnalysisState) -> NodeOutput;
}

/// Collects nodes and validates their wiring.
#[derive(Default)]
pub struct GraphBuilder {
    nodes: Vec<Arc<dyn GraphNode>>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node
    pub fn node(mut self, node: Arc<dyn GraphNode>) -> Self {
        self.nodes.push(node);
        self
    }

    /// Validate and freeze the graph.
    ///
    /// Rejects duplicate node ids, fields with more than one producer, nodes
    /// writing initial fields, inputs nobody produces, cycles, and anything
    /// other than exactly one terminal node.
    pub fn build(self) -> PipelineResult<TaskGraph> {
        let invalid = |message: String| PipelineError::InvalidGraph { message };
        let nodes = self.nodes;

        if nodes.is_empty() {
            return Err(invalid("graph has no nodes".to_string()));
        }

        let mut ids = HashSet::new();
        for node in &nodes {
            if !ids.insert(node.id()) {
                return Err(invalid(format!("duplicate node id '{}'", node.id())));
            }
        }

        let mut producers: HashMap<StateField, usize> = HashMap::new();
        for (index, node) in nodes.iter().enumerate() {
            let field = node.output();
            if field.is_initial() {
                return Err(invalid(format!(
                    "node '{}' writes initial field '{}'",
                    node.id(),
                    field
                )));
            }
            if let Some(&other) = producers.get(&field) {
                return Err(invalid(format!(
                    "field '{}' produced by both '{}' and '{}'",
                    field,
                    nodes[other].id(),
                    node.id()
                )));
            }
            producers.insert(field, index);
        }

        let mut upstream: Vec<Vec<usize>> = Vec::with_capacity(nodes.len());
        for node in &nodes {
            let mut deps = Vec::new();
            for field in node.inputs() {
                if field.is_initial() {
                    continue;
                }
                let producer = producers.get(field).ok_or_else(|| {
                    invalid(format!(
                        "input '{}' of node '{}' has no producer",
                        field,
                        node.id()
                    ))
                })?;
                if !deps.contains(producer) {
                    deps.push(*producer);
                }
            }
            upstream.push(deps);
        }

        let mut downstream: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
        for (index, deps) in upstream.iter().enumerate() {
            for &dep in deps {
                downstream[dep].push(index);
            }
        }

        // Kahn's algorithm: every node must be reachable in topological order.
        let mut pending: Vec<usize> = upstream.iter().map(Vec::len).collect();
        let mut ready: Vec<usize> = (0..nodes.len()).filter(|&i| pending[i] == 0).collect();
        let mut visited = 0;
        while let Some(index) = ready.pop() {
            visited += 1;
            for &next in &downstream[index] {
                pending[next] -= 1;
                if pending[next] == 0 {
                    ready.push(next);
                }
            }
        }
        if visited != nodes.len() {
            return Err(invalid("graph contains a cycle".to_string()));
        }

        let terminals: Vec<usize> = (0..nodes.len())
            .filter(|&i| downstream[i].is_empty())
            .collect();
        if terminals.len() != 1 {
            let names: Vec<&str> = terminals.iter().map(|&i| nodes[i].id()).collect();
            return Err(invalid(format!(
                "expected exactly one terminal node, found [{}]",
                names.join(", ")
            )));
        }

        Ok(TaskGraph {
            terminal: terminals[0],
            nodes,
            upstream,
            downstream,
        })
    }
}

/// A validated, immutable task graph.
#[derive(Clone)]
pub struct TaskGraph {
    nodes: Vec<Arc<dyn GraphNode>>,
    upstream: Vec<Vec<usize>>,
    downstream: Vec<Vec<usize>>,
    terminal: usize,
}

impl TaskGraph {
    /// Ids of nodes with no upstream dependency
    pub fn entry_nodes(&self) -> Vec<&'static str> {
        self.upstream
            .iter()
            .enumerate()
            .filter(|(_, deps)| deps.is_empty())
            .map(|(i, _)| self.nodes[i].id())
            .collect()
    }

    /// Id of the sole node nothing depends on
    pub fn terminal_node(&self) -> &'static str {
        self.nodes[self.terminal].id()
    }

    /// Run every node once, in dependency order, merging outputs into `state`.
    pub async fn execute(&self, mut state: AnalysisState) -> PipelineResult<AnalysisState> {
        let mut pending: Vec<usize> = self.upstream.iter().map(Vec::len).collect();
        let mut in_flight: HashSet<usize> = HashSet::new();
        let mut join_set: JoinSet<(usize, NodeOutput)> = JoinSet::new();

        for index in 0..self.nodes.len() {
            if pending[index] == 0 {
                self.spawn(&mut join_set, &mut in_flight, index, &state);
            }
        }

        while let Some(joined) = join_set.join_next().await {
            let (index, output) = joined.map_err(|e| {
                let mut names: Vec<&str> = in_flight.iter().map(|&i| self.nodes[i].id()).collect();
                names.sort_unstable();
                PipelineError::NodeAborted {
                    node: names.join(", "),
                    message: e.to_string(),
                }
            })?;
            in_flight.remove(&index);

            let node = &self.nodes[index];
            debug!(node = node.id(), field = %output.field(), "Node finished");
            if output.field() != node.output() {
                return Err(PipelineError::InvalidGraph {
                    message: format!(
                        "node '{}' declared output '{}' but produced '{}'",
                        node.id(),
                        node.output(),
                        output.field()
                    ),
                });
            }
            output.merge_into(&mut state, node.id())?;

            for &next in &self.downstream[index] {
                pending[next] -= 1;
                if pending[next] == 0 {
                    self.spawn(&mut join_set, &mut in_flight, next, &state);
                }
            }
        }

        Ok(state)
    }

    fn spawn(
        &self,
        join_set: &mut JoinSet<(usize, NodeOutput)>,
        in_flight: &mut HashSet<usize>,
        index: usize,
        state: &AnalysisState,
    ) {
        let node = Arc::clone(&self.nodes[index]);
        let snapshot = state.clone();
        debug!(node = node.id(), "Node started");
        in_flight.insert(index);
        join_set.spawn(async move { (index, node.execute(snapshot).await) });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::TechniqueSet;

    struct FixedNode {
        id: &'static str,
        inputs: &'static [StateField],
        output: StateField,
    }

    #[async_trait]
    impl GraphNode for FixedNode {
        fn id(&self) -> &'static str {
            self.id
        }

        fn inputs(&self) -> &'static [StateField] {
            self.inputs
        }

        fn output(&self) -> StateField {
            self.output
        }

        async fn execute(&self, state: AnalysisState) -> NodeOutput {
            match self.output {
                StateField::Classification => NodeOutput::Classification(ClassificationOutput {
                    probability: 0.7,
                    techniques: TechniqueSet::new(),
                    is_manipulation: None,
                    score: None,
                    threshold: 0.5,
                }),
                StateField::Narrative => NodeOutput::Narrative(format!(
                    "saw classification: {}",
                    state.classification.is_some()
                )),
                StateField::FactCheck => NodeOutput::FactCheck(FactCheckOutput::default()),
                _ => NodeOutput::Verdict(Verdict {
                    manipulation: false,
                    techniques: TechniqueSet::new(),
                    disinfo: Vec::new(),
                    explanation: state.narrative.unwrap_or_default(),
                }),
            }
        }
    }

    fn node(
        id: &'static str,
        inputs: &'static [StateField],
        output: StateField,
    ) -> Arc<dyn GraphNode> {
        Arc::new(FixedNode { id, inputs, output })
    }

    /// Waits on a shared barrier before producing its output.
    struct BarrierNode {
        inner: FixedNode,
        barrier: Arc<tokio::sync::Barrier>,
    }

    #[async_trait]
    impl GraphNode for BarrierNode {
        fn id(&self) -> &'static str {
            self.inner.id
        }

        fn inputs(&self) -> &'static [StateField] {
            self.inner.inputs
        }

        fn output(&self) -> StateField {
            self.inner.output
        }

        async fn execute(&self, state: AnalysisState) -> NodeOutput {
            self.barrier.wait().await;
            self.inner.execute(state).await
        }
    }

    /// Declares the narrative slot but writes a fact check.
    struct MislabeledNode;

    #[async_trait]
    impl GraphNode for MislabeledNode {
        fn id(&self) -> &'static str {
            "mislabeled"
        }

        fn inputs(&self) -> &'static [StateField] {
            &[StateField::Content]
        }

        fn output(&self) -> StateField {
            StateField::Narrative
        }

        async fn execute(&self, _state: AnalysisState) -> NodeOutput {
            NodeOutput::FactCheck(FactCheckOutput::default())
        }
    }

    fn diamond() -> GraphBuilder {
        GraphBuilder::new()
            .node(node("classify", &[StateField::Content], StateField::Classification))
            .node(node("fact", &[StateField::Content], StateField::FactCheck))
            .node(node(
                "narrate",
                &[StateField::Content, StateField::Classification],
                StateField::Narrative,
            ))
            .node(node(
                "verify",
                &[
                    StateField::Classification,
                    StateField::Narrative,
                    StateField::FactCheck,
                ],
                StateField::Verdict,
            ))
    }

    #[test]
    fn test_build_reports_entries_and_terminal() {
        let graph = diamond().build().unwrap();
        let mut entries = graph.entry_nodes();
        entries.sort_unstable();
        assert_eq!(entries, vec!["classify", "fact"]);
        assert_eq!(graph.terminal_node(), "verify");
    }

    #[test]
    fn test_rejects_duplicate_producer() {
        let err = diamond()
            .node(node("again", &[StateField::Content], StateField::FactCheck))
            .build()
            .err()
            .unwrap();
        assert!(err.to_string().contains("produced by both"));
    }

    #[test]
    fn test_rejects_missing_producer() {
        let err = GraphBuilder::new()
            .node(node("verify", &[StateField::Narrative], StateField::Verdict))
            .build()
            .err()
            .unwrap();
        assert!(err.to_string().contains("has no producer"));
    }

    #[test]
    fn test_rejects_cycle() {
        let err = GraphBuilder::new()
            .node(node("a", &[StateField::Narrative], StateField::Classification))
            .node(node("b", &[StateField::Classification], StateField::Narrative))
            .build()
            .err()
            .unwrap();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_rejects_multiple_terminals() {
        let err = GraphBuilder::new()
            .node(node("a", &[StateField::Content], StateField::Classification))
            .node(node("b", &[StateField::Content], StateField::FactCheck))
            .build()
            .err()
            .unwrap();
        assert!(err.to_string().contains("exactly one terminal"));
    }

    #[test]
    fn test_rejects_writing_initial_field() {
        let err = GraphBuilder::new()
            .node(node("a", &[], StateField::Content))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, PipelineError::InvalidGraph { .. }));
    }

    #[tokio::test]
    async fn test_execute_respects_dependencies() {
        let graph = diamond().build().unwrap();
        let state = graph.execute(AnalysisState::new("text")).await.unwrap();

        assert!(state.classification.is_some());
        assert!(state.fact_check.is_some());
        assert_eq!(state.narrative.as_deref(), Some("saw classification: true"));
        assert_eq!(
            state.verdict.map(|v| v.explanation),
            Some("saw classification: true".to_string())
        );
    }

    #[tokio::test]
    async fn test_entry_nodes_run_concurrently() {
        // Each entry node blocks until the other reaches the barrier.
        let barrier = Arc::new(tokio::sync::Barrier::new(2));
        let entry = |id, output| -> Arc<dyn GraphNode> {
            Arc::new(BarrierNode {
                inner: FixedNode {
                    id,
                    inputs: &[StateField::Content],
                    output,
                },
                barrier: Arc::clone(&barrier),
            })
        };
        let graph = GraphBuilder::new()
            .node(entry("classify", StateField::Classification))
            .node(entry("fact", StateField::FactCheck))
            .node(node(
                "narrate",
                &[StateField::Content, StateField::Classification],
                StateField::Narrative,
            ))
            .node(node(
                "verify",
                &[
                    StateField::Classification,
                    StateField::Narrative,
                    StateField::FactCheck,
                ],
                StateField::Verdict,
            ))
            .build()
            .unwrap();

        let result = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            graph.execute(AnalysisState::new("text")),
        )
        .await;

        let state = result.expect("entry nodes deadlocked").unwrap();
        assert!(state.classification.is_some());
        assert!(state.fact_check.is_some());
        assert!(state.verdict.is_some());
    }

    #[tokio::test]
    async fn test_output_outside_declared_field_is_rejected() {
        let graph = GraphBuilder::new()
            .node(node("classify", &[StateField::Content], StateField::Classification))
            .node(Arc::new(MislabeledNode))
            .node(node("fact", &[StateField::Content], StateField::FactCheck))
            .node(node(
                "verify",
                &[
                    StateField::Classification,
                    StateField::Narrative,
                    StateField::FactCheck,
                ],
                StateField::Verdict,
            ))
            .build()
            .unwrap();

        let err = graph.execute(AnalysisState::new("text")).await.err().unwrap();
        match err {
            PipelineError::InvalidGraph { message } => {
                assert!(message.contains("'mislabeled' declared output 'narrative'"));
            }
            other => panic!("expected InvalidGraph, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_prefilled_slot_is_merge_conflict() {
        let graph = diamond().build().unwrap();
        let mut state = AnalysisState::new("text");
        state.narrative = Some("already there".to_string());

        let err = graph.execute(state).await.err().unwrap();
        assert!(matches!(err, PipelineError::MergeConflict { .. }));
    }
}
