//! The graph: node and use arenas plus the designated nodes every function
//! graph has.
//!
//! All nodes live for the whole compilation; killing a node clears its
//! input slots but never frees it. Edge surgery maintains the use lists,
//! so "replace everywhere" style operations stay proportional to the
//! number of affected uses.

use smallvec::SmallVec;

use crate::bytecode::Value;

use super::node::{Node, NodeId, UseEdge, UseId, UseRec};
use super::operation::{OpKind, OpRef, OperationBuilder};

pub struct Graph {
    nodes: Vec<Node>,
    uses: Vec<UseRec>,
    op_builder: OperationBuilder,

    undefined_node: NodeId,
    empty_node: NodeId,
    null_node: NodeId,
    true_node: NodeId,
    false_node: NodeId,

    start_node: Option<NodeId>,
    engine_node: Option<NodeId>,
    function_node: Option<NodeId>,
    cpp_frame_node: Option<NodeId>,
    end_node: Option<NodeId>,
    initial_frame_state: Option<NodeId>,
}

impl Graph {
    pub fn new() -> Graph {
        let mut g = Graph {
            nodes: Vec::new(),
            uses: Vec::new(),
            op_builder: OperationBuilder::new(),
            undefined_node: NodeId(0),
            empty_node: NodeId(0),
            null_node: NodeId(0),
            true_node: NodeId(0),
            false_node: NodeId(0),
            start_node: None,
            engine_node: None,
            function_node: None,
            cpp_frame_node: None,
            end_node: None,
            initial_frame_state: None,
        };
        g.undefined_node = {
            let op = g.op_builder.get(OpKind::Undefined);
            g.create_node(op, &[])
        };
        g.empty_node = {
            let op = g.op_builder.get(OpKind::Empty);
            g.create_node(op, &[])
        };
        g.null_node = {
            let op = g.op_builder.get_constant(Value::Null);
            g.create_node(op, &[])
        };
        g.true_node = {
            let op = g.op_builder.get_constant(Value::Bool(true));
            g.create_node(op, &[])
        };
        g.false_node = {
            let op = g.op_builder.get_constant(Value::Bool(false));
            g.create_node(op, &[])
        };
        g
    }

    #[inline]
    pub fn op_builder(&mut self) -> &mut OperationBuilder {
        &mut self.op_builder
    }

    /// Read-only access to the operation builder; everything except the
    /// cached frame-state operation is available through this.
    #[inline]
    pub fn ops(&self) -> &OperationBuilder {
        &self.op_builder
    }

    #[inline]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Create a node from an operation and its input nodes.
    pub fn create_node(&mut self, op: OpRef, inputs: &[NodeId]) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            op,
            inputs: SmallVec::new(),
            first_use: None,
            id,
        });
        for &input in inputs {
            let use_id = self.new_use(id);
            self.nodes[id.index()].inputs.push(use_id);
            self.link_use(use_id, input);
        }
        id
    }

    pub fn create_constant_bool(&mut self, value: bool) -> NodeId {
        let op = self.op_builder.get_constant(Value::Bool(value));
        self.create_node(op, &[])
    }

    pub fn create_constant_int(&mut self, value: i32) -> NodeId {
        let op = self.op_builder.get_constant(Value::Int32(value));
        self.create_node(op, &[])
    }

    // cached constants

    #[inline]
    pub fn undefined_node(&self) -> NodeId {
        self.undefined_node
    }

    #[inline]
    pub fn empty_node(&self) -> NodeId {
        self.empty_node
    }

    #[inline]
    pub fn null_node(&self) -> NodeId {
        self.null_node
    }

    #[inline]
    pub fn true_constant(&self) -> NodeId {
        self.true_node
    }

    #[inline]
    pub fn false_constant(&self) -> NodeId {
        self.false_node
    }

    // designated nodes

    pub fn start_node(&self) -> NodeId {
        self.start_node.expect("start node not built yet")
    }

    pub fn engine_node(&self) -> NodeId {
        self.engine_node.expect("engine node not built yet")
    }

    pub fn function_node(&self) -> NodeId {
        self.function_node.expect("function node not built yet")
    }

    pub fn cpp_frame_node(&self) -> NodeId {
        self.cpp_frame_node.expect("cpp frame node not built yet")
    }

    pub fn end_node(&self) -> NodeId {
        self.end_node.expect("end node not built yet")
    }

    pub fn end_node_opt(&self) -> Option<NodeId> {
        self.end_node
    }

    pub fn initial_frame_state(&self) -> NodeId {
        self.initial_frame_state.expect("initial frame state not built yet")
    }

    pub fn set_start_node(&mut self, n: NodeId) {
        self.start_node = Some(n);
    }

    pub fn set_engine_node(&mut self, n: NodeId) {
        self.engine_node = Some(n);
    }

    pub fn set_function_node(&mut self, n: NodeId) {
        self.function_node = Some(n);
    }

    pub fn set_cpp_frame_node(&mut self, n: NodeId) {
        self.cpp_frame_node = Some(n);
    }

    pub fn set_end_node(&mut self, n: NodeId) {
        self.end_node = Some(n);
    }

    pub fn set_initial_frame_state(&mut self, n: NodeId) {
        self.initial_frame_state = Some(n);
    }

    /// Widen the end node by one control input.
    pub fn add_end_input(&mut self, n: NodeId) {
        if let Some(end) = self.end_node {
            let arity = self.op(end).control_input_count() + 1;
            let new_end = self.op_builder.get_end(arity);
            self.set_operation(end, new_end);
            self.add_input(end, n);
        }
    }

    // node accessors

    #[inline]
    pub fn node(&self, n: NodeId) -> &Node {
        &self.nodes[n.index()]
    }

    #[inline]
    pub fn op(&self, n: NodeId) -> &OpRef {
        &self.nodes[n.index()].op
    }

    #[inline]
    pub fn opcode(&self, n: NodeId) -> OpKind {
        self.nodes[n.index()].op.kind()
    }

    pub fn set_operation(&mut self, n: NodeId, op: OpRef) {
        self.nodes[n.index()].op = op;
    }

    #[inline]
    pub fn input_count(&self, n: NodeId) -> usize {
        self.nodes[n.index()].inputs.len()
    }

    /// The input at `idx`; panics when the slot was cleared.
    pub fn input(&self, n: NodeId, idx: usize) -> NodeId {
        self.input_opt(n, idx)
            .unwrap_or_else(|| panic!("input {} of {:?} is cleared", idx, n))
    }

    pub fn input_opt(&self, n: NodeId, idx: usize) -> Option<NodeId> {
        let use_id = self.nodes[n.index()].inputs[idx];
        self.uses[use_id.index()].source
    }

    /// Iterate all input slots in order; cleared slots yield `None`.
    pub fn inputs(&self, n: NodeId) -> impl Iterator<Item = Option<NodeId>> + '_ {
        self.nodes[n.index()]
            .inputs
            .iter()
            .map(move |u| self.uses[u.index()].source)
    }

    pub fn effect_input(&self, n: NodeId) -> Option<NodeId> {
        let op = self.op(n);
        if op.effect_input_count() == 0 {
            return None;
        }
        self.input_opt(n, op.index_of_first_effect())
    }

    pub fn control_input(&self, n: NodeId) -> Option<NodeId> {
        self.control_input_at(n, 0)
    }

    pub fn control_input_at(&self, n: NodeId, control_index: usize) -> Option<NodeId> {
        let op = self.op(n);
        if control_index >= op.control_input_count() {
            return None;
        }
        self.input_opt(n, op.index_of_first_control() + control_index)
    }

    pub fn frame_state_input(&self, n: NodeId) -> Option<NodeId> {
        let idx = self.op(n).index_of_frame_state_input()?;
        self.input_opt(n, idx)
    }

    pub fn set_frame_state_input(&mut self, n: NodeId, new_frame_state: NodeId) {
        if let Some(idx) = self.op(n).index_of_frame_state_input() {
            self.replace_input(n, idx, new_frame_state);
        }
    }

    // edge surgery

    pub fn replace_input(&mut self, n: NodeId, idx: usize, new_input: NodeId) {
        let use_id = self.nodes[n.index()].inputs[idx];
        self.set_use_source(use_id, Some(new_input));
    }

    pub fn clear_input(&mut self, n: NodeId, idx: usize) {
        let use_id = self.nodes[n.index()].inputs[idx];
        self.set_use_source(use_id, None);
    }

    pub fn add_input(&mut self, n: NodeId, new_input: NodeId) {
        let use_id = self.new_use(n);
        self.nodes[n.index()].inputs.push(use_id);
        self.link_use(use_id, new_input);
    }

    /// Insert an input before `index`, shifting the later inputs up.
    pub fn insert_input(&mut self, n: NodeId, index: usize, new_input: NodeId) {
        assert!(index < self.input_count(n));
        let last = self.input(n, self.input_count(n) - 1);
        self.add_input(n, last);
        let mut i = self.input_count(n) - 1;
        while i > index {
            let prev = self.input(n, i - 1);
            self.replace_input(n, i, prev);
            i -= 1;
        }
        self.replace_input(n, index, new_input);
    }

    /// Remove one input, shifting the later inputs down.
    pub fn remove_input(&mut self, n: NodeId, index: usize) {
        let count = self.input_count(n);
        assert!(index < count);
        for i in index..count - 1 {
            let next = self.input(n, i + 1);
            self.replace_input(n, i, next);
        }
        self.trim_input_count(n, count - 1);
    }

    /// Clear a range of input slots without removing them.
    pub fn remove_inputs(&mut self, n: NodeId, start: usize, count: usize) {
        for idx in start..start + count {
            self.clear_input(n, idx);
        }
    }

    pub fn remove_all_inputs(&mut self, n: NodeId) {
        let count = self.input_count(n);
        self.remove_inputs(n, 0, count);
    }

    /// Kill a node: clear every input slot. The slot array is kept, which
    /// is what marks the node dead.
    pub fn kill(&mut self, n: NodeId) {
        self.remove_all_inputs(n);
    }

    /// A node is dead when it has input slots but the first one is cleared.
    pub fn is_dead(&self, n: NodeId) -> bool {
        let node = &self.nodes[n.index()];
        !node.inputs.is_empty() && self.uses[node.inputs[0].index()].source.is_none()
    }

    pub fn trim_input_count(&mut self, n: NodeId, new_count: usize) {
        let current = self.input_count(n);
        if new_count == current {
            return;
        }
        assert!(new_count < current);
        self.remove_inputs(n, new_count, current - new_count);
        self.nodes[n.index()].inputs.truncate(new_count);
    }

    /// Rewire every use of `n` to `replacement`.
    pub fn replace_all_uses_with(&mut self, n: NodeId, replacement: NodeId) {
        while let Some(use_id) = self.nodes[n.index()].first_use {
            let user = self.uses[use_id.index()].user;
            let idx = self.input_index_of(user, use_id);
            self.replace_input(user, idx, replacement);
        }
    }

    /// Rewire the uses of `n`, choosing the replacement by the edge kind of
    /// each use.
    pub fn replace_uses(
        &mut self,
        n: NodeId,
        new_value_input: NodeId,
        new_effect_input: NodeId,
        new_control_input: NodeId,
    ) {
        while let Some(use_id) = self.nodes[n.index()].first_use {
            let user = self.uses[use_id.index()].user;
            let idx = self.input_index_of(user, use_id);
            let user_op = self.op(user);
            let replacement = if idx < user_op.value_input_count() {
                new_value_input
            } else if idx < user_op.index_of_first_control() {
                new_effect_input
            } else {
                new_control_input
            };
            self.replace_input(user, idx, replacement);
        }
    }

    /// Disconnect the exception edge of `n`: the first use sitting in an
    /// `OnException` node is cleared.
    pub fn remove_exception_handler_use(&mut self, n: NodeId) {
        let handler_use = self
            .uses(n)
            .find(|edge| self.opcode(edge.user) == OpKind::OnException);
        if let Some(edge) = handler_use {
            self.clear_input(edge.user, edge.index);
        }
    }

    /// Iterate the uses of `n` as (user, input index) edges.
    pub fn uses(&self, n: NodeId) -> Uses<'_> {
        Uses {
            graph: self,
            current: self.nodes[n.index()].first_use,
        }
    }

    pub fn has_uses(&self, n: NodeId) -> bool {
        self.nodes[n.index()].first_use.is_some()
    }

    pub fn use_count(&self, n: NodeId) -> usize {
        self.uses(n).count()
    }

    pub fn first_value_use(&self, n: NodeId) -> Option<NodeId> {
        self.uses(n)
            .find(|e| self.use_is_value(*e))
            .map(|e| e.user)
    }

    #[inline]
    pub fn use_is_value(&self, edge: UseEdge) -> bool {
        edge.index < self.op(edge.user).value_input_count()
    }

    #[inline]
    pub fn use_is_control(&self, edge: UseEdge) -> bool {
        edge.index >= self.op(edge.user).index_of_first_control()
            && self
                .op(edge.user)
                .index_of_frame_state_input()
                .is_none_or(|fs| edge.index < fs)
    }

    // use-list internals

    fn input_index_of(&self, user: NodeId, use_id: UseId) -> usize {
        self.nodes[user.index()]
            .inputs
            .iter()
            .position(|&u| u == use_id)
            .expect("use record does not belong to its user")
    }

    fn new_use(&mut self, user: NodeId) -> UseId {
        let id = UseId(self.uses.len() as u32);
        self.uses.push(UseRec {
            source: None,
            user,
            prev: None,
            next: None,
        });
        id
    }

    fn link_use(&mut self, use_id: UseId, source: NodeId) {
        debug_assert!(self.uses[use_id.index()].source.is_none());
        let head = self.nodes[source.index()].first_use;
        {
            let rec = &mut self.uses[use_id.index()];
            rec.source = Some(source);
            rec.prev = None;
            rec.next = head;
        }
        if let Some(h) = head {
            self.uses[h.index()].prev = Some(use_id);
        }
        self.nodes[source.index()].first_use = Some(use_id);
    }

    fn unlink_use(&mut self, use_id: UseId) {
        let (source, prev, next) = {
            let rec = &self.uses[use_id.index()];
            (rec.source.expect("use not linked"), rec.prev, rec.next)
        };
        match prev {
            None => self.nodes[source.index()].first_use = next,
            Some(p) => self.uses[p.index()].next = next,
        }
        if let Some(nx) = next {
            self.uses[nx.index()].prev = prev;
        }
        let rec = &mut self.uses[use_id.index()];
        rec.source = None;
        rec.prev = None;
        rec.next = None;
    }

    fn set_use_source(&mut self, use_id: UseId, new_source: Option<NodeId>) {
        if self.uses[use_id.index()].source.is_some() {
            self.unlink_use(use_id);
        }
        if let Some(source) = new_source {
            self.link_use(use_id, source);
        }
    }
}

impl Default for Graph {
    fn default() -> Graph {
        Graph::new()
    }
}

/// Iterator over the uses of a node. The next edge is fetched before the
/// current one is yielded, mirroring how use lists are walked during
/// replacement.
pub struct Uses<'g> {
    graph: &'g Graph,
    current: Option<UseId>,
}

impl Iterator for Uses<'_> {
    type Item = UseEdge;

    fn next(&mut self) -> Option<UseEdge> {
        let use_id = self.current?;
        let rec = &self.graph.uses[use_id.index()];
        self.current = rec.next;
        let user = rec.user;
        Some(UseEdge {
            user,
            index: self.graph.input_index_of(user, use_id),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::operation::OpKind;

    fn graph_with_add() -> (Graph, NodeId, NodeId, NodeId) {
        let mut g = Graph::new();
        let one = g.create_constant_int(1);
        let two = g.create_constant_int(2);
        // use a pure operation so no effect/control inputs are required
        let op = g.op_builder().get(OpKind::ToBoolean);
        let add = g.create_node(op, &[one]);
        (g, one, two, add)
    }

    #[test]
    fn test_use_lists_after_creation() {
        let (g, one, two, n) = graph_with_add();
        assert_eq!(g.input(n, 0), one);
        assert_eq!(g.use_count(one), 1);
        assert_eq!(g.use_count(two), 0);
        let edge = g.uses(one).next().unwrap();
        assert_eq!(edge.user, n);
        assert_eq!(edge.index, 0);
    }

    #[test]
    fn test_replace_input_moves_use() {
        let (mut g, one, two, n) = graph_with_add();
        g.replace_input(n, 0, two);
        assert_eq!(g.input(n, 0), two);
        assert_eq!(g.use_count(one), 0);
        assert_eq!(g.use_count(two), 1);
    }

    #[test]
    fn test_replace_all_uses_with() {
        let mut g = Graph::new();
        let a = g.create_constant_int(1);
        let b = g.create_constant_int(2);
        let op = g.op_builder().get(OpKind::ToBoolean);
        let u1 = g.create_node(op.clone(), &[a]);
        let u2 = g.create_node(op.clone(), &[a]);
        let not_op = g.op_builder().get(OpKind::BooleanNot);
        let u3 = g.create_node(not_op, &[a]);

        assert_eq!(g.use_count(a), 3);
        g.replace_all_uses_with(a, b);
        assert_eq!(g.use_count(a), 0);
        assert_eq!(g.use_count(b), 3);
        for n in [u1, u2, u3] {
            assert_eq!(g.input(n, 0), b);
        }
    }

    #[test]
    fn test_kill_marks_dead() {
        let (mut g, one, _two, n) = graph_with_add();
        assert!(!g.is_dead(n));
        g.kill(n);
        assert!(g.is_dead(n));
        assert_eq!(g.use_count(one), 0);
        // the slot array is kept
        assert_eq!(g.input_count(n), 1);
        assert_eq!(g.input_opt(n, 0), None);
    }

    #[test]
    fn test_insert_and_remove_input() {
        let mut g = Graph::new();
        let a = g.create_constant_int(1);
        let b = g.create_constant_int(2);
        let c = g.create_constant_int(3);
        let region_op = g.op_builder().get_region(2);
        // region inputs are control; using constants keeps the test small
        let r = g.create_node(region_op, &[a, b]);

        g.insert_input(r, 1, c);
        assert_eq!(g.input(r, 0), a);
        assert_eq!(g.input(r, 1), c);
        assert_eq!(g.input(r, 2), b);

        g.remove_input(r, 0);
        assert_eq!(g.input_count(r), 2);
        assert_eq!(g.input(r, 0), c);
        assert_eq!(g.input(r, 1), b);
        assert_eq!(g.use_count(a), 0);
    }

    #[test]
    fn test_trim_input_count() {
        let mut g = Graph::new();
        let a = g.create_constant_int(1);
        let b = g.create_constant_int(2);
        let region_op = g.op_builder().get_region(2);
        let r = g.create_node(region_op, &[a, b]);
        g.trim_input_count(r, 1);
        assert_eq!(g.input_count(r), 1);
        assert_eq!(g.input(r, 0), a);
        assert_eq!(g.use_count(b), 0);
    }

    #[test]
    fn test_remove_exception_handler_use() {
        let mut g = Graph::new();
        let thrower = g.create_constant_int(0);
        let on_exception_op = g.op_builder().get(OpKind::OnException);
        let on_exception = g.create_node(on_exception_op, &[thrower]);
        let not_op = g.op_builder().get(OpKind::BooleanNot);
        let other_use = g.create_node(not_op, &[thrower]);

        g.remove_exception_handler_use(thrower);
        assert_eq!(g.input_opt(on_exception, 0), None);
        assert_eq!(g.input(other_use, 0), thrower);
        assert_eq!(g.use_count(thrower), 1);
    }

    #[test]
    fn test_add_end_input_widens_the_end_node() {
        let mut g = Graph::new();
        let exit1 = g.create_constant_int(1);
        let exit2 = g.create_constant_int(2);
        let end_op = g.op_builder().get_end(1);
        let end = g.create_node(end_op, &[exit1]);
        g.set_end_node(end);

        g.add_end_input(exit2);
        assert_eq!(g.op(end).control_input_count(), 2);
        assert_eq!(g.input_count(end), 2);
        assert_eq!(g.input(end, 1), exit2);
    }

    #[test]
    fn test_replace_uses_by_edge_kind() {
        let mut g = Graph::new();
        let v = g.create_constant_int(1);
        // Return(value, effect, control): all three input kinds in one node
        let ret_op = g.op_builder().get(OpKind::Return);
        let ret = g.create_node(ret_op, &[v, v, v]);

        let value = g.create_constant_int(10);
        let effect = g.create_constant_int(11);
        let control = g.create_constant_int(12);
        g.replace_uses(v, value, effect, control);

        assert_eq!(g.input(ret, 0), value);
        assert_eq!(g.input(ret, 1), effect);
        assert_eq!(g.input(ret, 2), control);
        assert_eq!(g.use_count(v), 0);
    }
}
