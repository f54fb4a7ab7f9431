//! The per-function IR root: the graph, the node side table, the string
//! pool and the unwind labels, plus structural verification.

use std::sync::Arc;

use tracing::debug;

use crate::bytecode::CompiledFunction;

use super::graph::Graph;
use super::node::{NodeId, NodeInfo, NodeWorkList};
use super::operation::OpKind;
use super::types::Type;
use super::StringId;

pub struct Function {
    source: Arc<CompiledFunction>,
    graph: Graph,
    node_info: Vec<Option<NodeInfo>>,
    string_pool: Vec<String>,
    unwind_label_offsets: Vec<i32>,
}

impl Function {
    pub fn new(source: Arc<CompiledFunction>) -> Function {
        Function {
            source,
            graph: Graph::new(),
            node_info: Vec::with_capacity(128),
            string_pool: Vec::new(),
            unwind_label_offsets: Vec::new(),
        }
    }

    #[inline]
    pub fn source(&self) -> &Arc<CompiledFunction> {
        &self.source
    }

    pub fn name(&self) -> &str {
        self.source.name()
    }

    #[inline]
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    #[inline]
    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }

    pub fn add_string(&mut self, s: impl Into<String>) -> StringId {
        self.string_pool.push(s.into());
        self.string_pool.len() - 1
    }

    pub fn string(&self, id: StringId) -> &str {
        &self.string_pool[id]
    }

    pub fn node_info(&self, n: NodeId) -> Option<&NodeInfo> {
        self.node_info.get(n.index()).and_then(|i| i.as_ref())
    }

    /// The node's side info, created on first access with the operation's
    /// type.
    pub fn node_info_mut(&mut self, n: NodeId) -> &mut NodeInfo {
        if n.index() >= self.node_info.len() {
            self.node_info.resize(n.index() * 2 + 1, None);
        }
        let typ = self.graph.op(n).typ();
        self.node_info[n.index()].get_or_insert_with(|| NodeInfo::new(typ))
    }

    /// The node's annotated type, falling back to the operation's type.
    pub fn node_type(&self, n: NodeId) -> Type {
        match self.node_info(n) {
            Some(info) => info.typ(),
            None => self.graph.op(n).typ(),
        }
    }

    pub fn copy_bytecode_offsets(&mut self, from: NodeId, to: NodeId) {
        if let Some(info) = self.node_info(from) {
            let (cur, next) = (info.current_instruction_offset(), info.next_instruction_offset());
            self.node_info_mut(to).set_bytecode_offsets(cur, next);
        }
    }

    pub fn add_unwind_label_offset(&mut self, absolute_offset: i32) {
        self.unwind_label_offsets.push(absolute_offset);
    }

    pub fn unwind_label_offsets(&self) -> &[i32] {
        &self.unwind_label_offsets
    }

    pub fn dump(&self, description: &str) {
        super::dump::dump(self, description);
    }

    /// Check structural invariants of the graph; aborts compilation when
    /// any are broken.
    pub fn verify(&self) {
        let graph = &self.graph;
        let mut problems_found = 0usize;

        let mut verify_node = |n: NodeId| {
            let op = graph.op(n);
            if op.total_input_count() != graph.input_count(n) {
                problems_found += 1;
                debug!(
                    target: "seajit::ir::verify",
                    node = ?n,
                    inputs = graph.input_count(n),
                    operation = %op.debug_string(),
                    required = op.total_input_count(),
                    "node input count does not match its operation"
                );
            }

            if matches!(op.kind(), OpKind::Phi | OpKind::EffectPhi) {
                match graph.control_input(n) {
                    Some(control) if graph.opcode(control) == OpKind::Region => {
                        if graph.input_count(control) + 1 != graph.input_count(n) {
                            problems_found += 1;
                            debug!(
                                target: "seajit::ir::verify",
                                node = ?n,
                                region_inputs = graph.input_count(control),
                                phi_inputs = graph.input_count(n),
                                "phi arity does not match its region"
                            );
                        }
                    }
                    _ => {
                        problems_found += 1;
                        debug!(
                            target: "seajit::ir::verify",
                            node = ?n,
                            "control input of phi node is not a region"
                        );
                    }
                }
            }
        };

        let mut todo = NodeWorkList::new(graph);
        todo.enqueue(graph.end_node());
        while let Some(n) = todo.dequeue_next_node_for_visiting() {
            todo.enqueue_all_inputs(graph, n);
            todo.enqueue_all_uses(graph, n);
            verify_node(n);
        }

        if problems_found != 0 {
            self.dump("Problematic graph");
            panic!("found {} problems during graph verification", problems_found);
        }
    }
}
