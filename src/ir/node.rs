//! Nodes and their bookkeeping.
//!
//! A node is one computation, action or marker in the graph: an operation
//! plus an array of input slots. Every input slot is a `Use` record living
//! in the graph's use arena; the records of all uses of one node form a
//! doubly-linked list threaded through that arena, so disconnecting an
//! edge never scans.
//!
//! This module also carries the worklist and reachability helpers the
//! passes share, and the per-node side info attached by the function.

use smallvec::SmallVec;

use super::graph::Graph;
use super::operation::{OpKind, OpRef};
use super::types::Type;

/// Dense node identifier, allocated by the graph.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Debug for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Index of a `Use` record in the graph's use arena.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) struct UseId(pub(crate) u32);

impl UseId {
    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// One input slot of a node, linked into the use list of its source.
#[derive(Debug)]
pub(crate) struct UseRec {
    pub(crate) source: Option<NodeId>,
    pub(crate) user: NodeId,
    pub(crate) prev: Option<UseId>,
    pub(crate) next: Option<UseId>,
}

/// A node: operation plus input slots. All edge surgery goes through
/// [`Graph`], which owns the arenas.
pub struct Node {
    pub(crate) op: OpRef,
    pub(crate) inputs: SmallVec<[UseId; 4]>,
    pub(crate) first_use: Option<UseId>,
    pub(crate) id: NodeId,
}

impl Node {
    #[inline]
    pub fn id(&self) -> NodeId {
        self.id
    }

    #[inline]
    pub fn operation(&self) -> &OpRef {
        &self.op
    }

    #[inline]
    pub fn opcode(&self) -> OpKind {
        self.op.kind()
    }
}

/// An edge yielded by use iteration: `user`'s input at `index` is the
/// iterated node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UseEdge {
    pub user: NodeId,
    pub index: usize,
}

pub const NO_INSTRUCTION_OFFSET: i32 = -1;

/// Side info a function keeps per node: the value type and the bytecode
/// offsets of the instruction the node was created for.
#[derive(Debug, Clone)]
pub struct NodeInfo {
    typ: Type,
    current_instruction_offset: i32,
    next_instruction_offset: i32,
}

impl NodeInfo {
    pub(crate) fn new(typ: Type) -> NodeInfo {
        NodeInfo {
            typ,
            current_instruction_offset: NO_INSTRUCTION_OFFSET,
            next_instruction_offset: NO_INSTRUCTION_OFFSET,
        }
    }

    #[inline]
    pub fn typ(&self) -> Type {
        self.typ
    }

    pub fn set_type(&mut self, t: Type) {
        self.typ = t;
    }

    #[inline]
    pub fn current_instruction_offset(&self) -> i32 {
        self.current_instruction_offset
    }

    #[inline]
    pub fn next_instruction_offset(&self) -> i32 {
        self.next_instruction_offset
    }

    pub fn set_bytecode_offsets(&mut self, current: i32, next: i32) {
        assert_ne!(current, NO_INSTRUCTION_OFFSET);
        assert_ne!(next, NO_INSTRUCTION_OFFSET);
        self.current_instruction_offset = current;
        self.next_instruction_offset = next;
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum State {
    Unvisited,
    Queued,
    Visited,
}

/// LIFO worklist with per-node visit state.
pub struct NodeWorkList {
    worklist: Vec<NodeId>,
    state: Vec<State>,
}

impl NodeWorkList {
    pub fn new(graph: &Graph) -> NodeWorkList {
        let mut worklist = Vec::new();
        worklist.reserve(64);
        NodeWorkList {
            worklist,
            state: vec![State::Unvisited; graph.node_count()],
        }
    }

    pub fn reset(&mut self) {
        self.state.fill(State::Unvisited);
        self.worklist.clear();
    }

    fn state_mut(&mut self, n: NodeId) -> &mut State {
        if n.index() >= self.state.len() {
            self.state.resize(n.index() + 1, State::Unvisited);
        }
        &mut self.state[n.index()]
    }

    /// Queue a node unless it was queued or visited before.
    pub fn enqueue(&mut self, n: NodeId) -> bool {
        let s = self.state_mut(n);
        if *s == State::Queued || *s == State::Visited {
            return false;
        }
        *s = State::Queued;
        self.worklist.push(n);
        true
    }

    /// Queue a node again, also when it was already visited.
    pub fn re_enqueue(&mut self, n: NodeId) {
        let s = self.state_mut(n);
        if *s == State::Queued {
            return;
        }
        *s = State::Queued;
        self.worklist.push(n);
    }

    pub fn enqueue_all_inputs(&mut self, graph: &Graph, n: NodeId) {
        for input in graph.inputs(n).flatten().collect::<SmallVec<[NodeId; 8]>>() {
            self.enqueue(input);
        }
    }

    pub fn enqueue_all_uses(&mut self, graph: &Graph, n: NodeId) {
        for edge in graph.uses(n).collect::<SmallVec<[UseEdge; 8]>>() {
            self.enqueue(edge.user);
        }
    }

    pub fn dequeue_next_node_for_visiting(&mut self) -> Option<NodeId> {
        let n = self.worklist.pop()?;
        let s = self.state_mut(n);
        debug_assert!(*s == State::Queued);
        *s = State::Visited;
        Some(n)
    }

    pub fn is_visited(&self, n: NodeId) -> bool {
        self.state.get(n.index()).is_some_and(|&s| s == State::Visited)
    }

    pub fn is_empty(&self) -> bool {
        self.worklist.is_empty()
    }

    pub fn status(&self, n: NodeId) -> String {
        let s = match self.state.get(n.index()) {
            Some(State::Queued) => "queued",
            Some(State::Visited) => "visited",
            _ => "unvisited",
        };
        format!("status for node {:?}: {}", n, s)
    }
}

/// Collects the nodes reachable from the graph's end node by walking
/// inputs (and optionally uses).
pub struct NodeCollector {
    reachable: Vec<NodeId>,
    is_reachable: Vec<bool>,
}

impl NodeCollector {
    pub fn new(graph: &Graph, collect_uses: bool, skip_framestate: bool) -> NodeCollector {
        let mut collector = NodeCollector {
            reachable: Vec::new(),
            is_reachable: Vec::new(),
        };
        collector.mark_reachable(graph.end_node());

        // reachable keeps growing while we scan it
        let mut i = 0;
        while i < collector.reachable.len() {
            let n = collector.reachable[i];
            i += 1;
            for input in graph.inputs(n).flatten().collect::<SmallVec<[NodeId; 8]>>() {
                if collector.is_reachable(input) {
                    continue;
                }
                if skip_framestate && graph.opcode(input) == OpKind::FrameState {
                    continue;
                }
                collector.mark_reachable(input);
            }

            if collect_uses {
                for edge in graph.uses(n).collect::<SmallVec<[UseEdge; 8]>>() {
                    if !collector.is_reachable(edge.user) {
                        collector.mark_reachable(edge.user);
                    }
                }
            }
        }

        collector
    }

    pub fn reachable(&self) -> &[NodeId] {
        &self.reachable
    }

    pub fn sort_by_id(&mut self) {
        self.reachable.sort();
    }

    pub fn is_reachable(&self, n: NodeId) -> bool {
        self.is_reachable.get(n.index()).copied().unwrap_or(false)
    }

    /// Mark a node live; used by passes that add nodes after collection.
    pub fn mark_reachable(&mut self, n: NodeId) {
        self.reachable.push(n);
        if n.index() >= self.is_reachable.len() {
            self.is_reachable.resize(n.index() + 1, false);
        }
        self.is_reachable[n.index()] = true;
    }
}
