//! Builds the sea-of-nodes graph from a function's bytecode.
//!
//! The builder walks the instruction stream like an abstract interpreter.
//! An [`Environment`] tracks, for the current instruction, the control and
//! effect dependencies and the SSA node currently bound to every
//! interpreter frame slot. Join points (jump targets, fallthroughs after
//! branches, loop starts) keep one environment per bytecode offset;
//! arriving there a second time merges environments by growing `Region`,
//! `Phi` and `EffectPhi` nodes.
//!
//! One extra frame slot past the interpreter registers holds the current
//! unwind-handler offset as a constant node; zero means no handler. Every
//! throwing operation forks an `OnException` edge into the registered
//! handler environment while there is one.

use std::collections::HashMap;

use smallvec::SmallVec;
use tracing::debug;

use crate::bytecode::{call_data, dispatch, ByteCodeHandler, Opcode, Value, Verdict};
use crate::ir::function::Function;
use crate::ir::node::NodeId;
use crate::ir::operation::{OpKind, OpRef};

const TARGET: &str = "seajit::ir::graphbuilder";

/// The abstract interpreter state at one bytecode position.
#[derive(Clone)]
pub struct Environment {
    effect: NodeId,
    control: NodeId,
    /// One node per interpreter register, plus the trailing slot holding
    /// the unwind-handler offset constant.
    frame: Vec<NodeId>,
}

pub struct GraphBuilder<'f> {
    func: &'f mut Function,
    env: Option<Environment>,
    exit_controls: Vec<NodeId>,
    env_for_offset: HashMap<i32, Environment>,
    /// Bytecode offsets that start a loop.
    label_infos: Vec<u32>,
    current_unwind_handler_offset: i32,
    current_offset: i32,
    next_offset: i32,
}

impl<'f> GraphBuilder<'f> {
    /// Build the complete graph for `function`; on return the graph's end
    /// node collects every function exit.
    pub fn build_graph(function: &'f mut Function) {
        let source = function.source().clone();

        let mut builder = GraphBuilder::new(function);
        builder.start_graph();
        builder.setup_start_environment();
        let initial_frame_state = builder.create_frame_state();
        builder.func.graph_mut().set_initial_frame_state(initial_frame_state);
        dispatch(&source, &mut builder);
        builder.end_graph();
    }

    fn new(function: &'f mut Function) -> GraphBuilder<'f> {
        let label_infos = function.source().label_infos().to_vec();
        for &label in &label_infos {
            debug!(target: TARGET, offset = label, "loop start");
        }
        GraphBuilder {
            func: function,
            env: None,
            exit_controls: Vec::new(),
            env_for_offset: HashMap::new(),
            label_infos,
            current_unwind_handler_offset: 0,
            current_offset: 0,
            next_offset: 0,
        }
    }

    // environment access

    fn env(&self) -> &Environment {
        self.env.as_ref().expect("no active environment")
    }

    fn env_mut(&mut self) -> &mut Environment {
        self.env.as_mut().expect("no active environment")
    }

    fn accumulator(&self) -> NodeId {
        self.slot(call_data::ACCUMULATOR as i32)
    }

    fn bind_acc(&mut self, n: NodeId) -> NodeId {
        self.bind_node_to_slot(n, call_data::ACCUMULATOR as i32)
    }

    fn bind_node_to_slot(&mut self, n: NodeId, slot: i32) -> NodeId {
        self.env_mut().frame[slot as usize] = n;
        n
    }

    fn slot(&self, slot: i32) -> NodeId {
        self.env().frame[slot as usize]
    }

    fn slot_count(&self) -> usize {
        self.env().frame.len()
    }

    fn unwind_handler_offset(&self) -> i32 {
        Self::unwind_handler_offset_of(self.func, self.env())
    }

    fn unwind_handler_offset_of(func: &Function, env: &Environment) -> i32 {
        let node = *env.frame.last().unwrap();
        let op = func.graph().op(node);
        debug_assert_eq!(op.kind(), OpKind::Constant);
        op.constant_payload()
            .expect("unwind handler slot must hold a constant")
            .as_int32()
    }

    fn set_unwind_handler_offset(&mut self, offset: i32) {
        let node = self.create_constant(offset);
        *self.env_mut().frame.last_mut().unwrap() = node;
    }

    // graph access

    fn op(&self, kind: OpKind) -> OpRef {
        self.func.graph().ops().get(kind)
    }

    fn absolute_offset(&self, offset: i32) -> i32 {
        offset + self.next_offset
    }

    // node creation

    /// Create a node, append the environment's effect/control/frame-state
    /// dependencies as the operation requires, and advance the environment.
    ///
    /// When the operation can throw and an unwind handler is set, the
    /// exception edge is forked off here and merged into the handler's
    /// environment; the caller continues on the success path. For that
    /// reason, accumulator binding must happen after this returns, never on
    /// an environment captured before the call.
    fn create_and_link_node(&mut self, op: OpRef, operands: &[NodeId]) -> NodeId {
        debug_assert!(op.effect_input_count() < 2);
        debug_assert!(op.control_input_count() < 2);

        let mut inputs: SmallVec<[NodeId; 8]> = SmallVec::from_slice(operands);
        if op.effect_input_count() == 1 {
            inputs.push(self.env().effect);
        }
        if op.control_input_count() == 1 {
            inputs.push(self.env().control);
        }
        if op.has_frame_state_input() {
            inputs.push(self.create_frame_state());
        }

        let node = self.func.graph_mut().create_node(op.clone(), &inputs);

        if op.needs_bytecode_offsets() {
            let (cur, next) = (self.current_offset, self.next_offset);
            self.func.node_info_mut(node).set_bytecode_offsets(cur, next);
        }

        if op.effect_output_count() > 0 {
            self.env_mut().effect = node;
        }
        if op.control_output_count() > 0 {
            self.env_mut().control = node;
        }

        if op.can_throw() && self.unwind_handler_offset() != 0 {
            let success_env = self.env.clone();
            let control = self.env().control;
            let on_exception_op = self.op(OpKind::OnException);
            let on_exception = self.func.graph_mut().create_node(on_exception_op, &[control]);
            self.env_mut().control = on_exception;
            let unwind_handler_offset = self.unwind_handler_offset();
            self.merge_into_successor(unwind_handler_offset);
            self.env = success_env;
        }

        node
    }

    fn create_node(&mut self, op: OpRef, operands: &[NodeId]) -> NodeId {
        self.create_and_link_node(op, operands)
    }

    fn create_region(&mut self, n_control_inputs: usize) -> NodeId {
        let op = self.func.graph().ops().get_region(n_control_inputs);
        self.create_node(op, &[])
    }

    fn create_if_true(&mut self) -> NodeId {
        let op = self.op(OpKind::IfTrue);
        self.create_node(op, &[])
    }

    fn create_if_false(&mut self) -> NodeId {
        let op = self.op(OpKind::IfFalse);
        self.create_node(op, &[])
    }

    fn create_constant(&mut self, v: i32) -> NodeId {
        self.func.graph_mut().create_constant_int(v)
    }

    fn create_phi(&mut self, n_inputs: usize, input: NodeId, control: NodeId) -> NodeId {
        let op = self.func.graph().ops().get_phi(n_inputs);
        let mut buffer: SmallVec<[NodeId; 8]> = SmallVec::from_elem(input, n_inputs);
        buffer.push(control);
        self.func.graph_mut().create_node(op, &buffer)
    }

    fn create_effect_phi(&mut self, n_inputs: usize, input: NodeId, control: NodeId) -> NodeId {
        let op = self.func.graph().ops().get_effect_phi(n_inputs);
        let mut buffer: SmallVec<[NodeId; 8]> = SmallVec::from_elem(input, n_inputs);
        buffer.push(control);
        self.func.graph_mut().create_node(op, &buffer)
    }

    fn create_handle_unwind(&mut self, offset: i32) -> NodeId {
        let op = self.func.graph().ops().get_handle_unwind(offset);
        self.create_node(op, &[])
    }

    fn create_to_boolean(&mut self, input: NodeId) -> NodeId {
        let op = self.op(OpKind::ToBoolean);
        self.create_node(op, &[input])
    }

    fn create_frame_state(&mut self) -> NodeId {
        let frame = self.env().frame.clone();
        let op = self.func.graph_mut().op_builder().get_frame_state(frame.len());
        self.func.graph_mut().create_node(op, &frame)
    }

    // merges

    fn merge_control(&mut self, c1: NodeId, c2: NodeId) -> NodeId {
        let graph = self.func.graph_mut();
        if graph.opcode(c1) == OpKind::Region {
            let n_inputs = graph.op(c1).control_input_count() + 1;
            graph.add_input(c1, c2);
            let op = graph.ops().get_region(n_inputs);
            graph.set_operation(c1, op);
            return c1;
        }
        let op = graph.ops().get_region(2);
        graph.create_node(op, &[c1, c2])
    }

    fn merge_effect(&mut self, e1: NodeId, e2: NodeId, control: NodeId) -> NodeId {
        let graph = self.func.graph_mut();
        let n_inputs = graph.op(control).control_input_count();
        if graph.opcode(e1) == OpKind::EffectPhi && graph.control_input(e1) == Some(control) {
            graph.insert_input(e1, n_inputs - 1, e2);
            let op = graph.ops().get_effect_phi(n_inputs);
            graph.set_operation(e1, op);
            return e1;
        }

        if e1 != e2 {
            let phi = self.create_effect_phi(n_inputs, e1, control);
            self.func.graph_mut().replace_input(phi, n_inputs - 1, e2);
            return phi;
        }

        e1
    }

    fn merge_value(&mut self, v1: NodeId, v2: NodeId, control: NodeId) -> NodeId {
        let graph = self.func.graph_mut();
        let n_inputs = graph.op(control).control_input_count();
        if graph.opcode(v1) == OpKind::Phi && graph.control_input(v1) == Some(control) {
            graph.insert_input(v1, n_inputs - 1, v2);
            let op = graph.ops().get_phi(n_inputs);
            graph.set_operation(v1, op);
            return v1;
        }

        if v1 != v2 {
            let phi = self.create_phi(n_inputs, v1, control);
            self.func.graph_mut().replace_input(phi, n_inputs - 1, v2);
            return phi;
        }

        v1
    }

    /// Merge `other` into `target`, updating phis for every slot whose
    /// values differ. The unwind-handler slot is never merged.
    fn merge_environments(&mut self, target: &mut Environment, other: &Environment) {
        assert_eq!(target.frame.len(), other.frame.len());

        let merged_control = self.merge_control(target.control, other.control);
        target.control = merged_control;
        target.effect = self.merge_effect(target.effect, other.effect, merged_control);

        for i in 0..target.frame.len() - 1 {
            target.frame[i] = self.merge_value(target.frame[i], other.frame[i], merged_control);
        }
        debug_assert!(Self::unwind_handler_offset_of(self.func, target) >= 0);
    }

    /// Hand the current environment to the given bytecode offset: register
    /// it if the offset was not reached before, merge otherwise. The
    /// current environment ends here.
    fn merge_into_successor(&mut self, offset: i32) {
        match self.env_for_offset.remove(&offset) {
            None => {
                self.create_region(1);
                let env = self.env.take().expect("no active environment");
                self.env_for_offset.insert(offset, env);
            }
            Some(mut successor) => {
                let env = self.env.take().expect("no active environment");
                self.merge_environments(&mut successor, &env);
                self.env_for_offset.insert(offset, successor);
            }
        }
    }

    // function shape

    fn start_graph(&mut self) {
        let n_values_out = 1 + call_data::HEADER_SIZE + self.func.source().formal_count();
        let start_op = self.func.graph().ops().get_start(n_values_out);
        let start = self.func.graph_mut().create_node(start_op, &[]);
        self.func.node_info_mut(start).set_bytecode_offsets(0, 0);

        let graph = self.func.graph_mut();
        graph.set_start_node(start);
        let engine_op = graph.ops().get(OpKind::Engine);
        let engine = graph.create_node(engine_op, &[start]);
        graph.set_engine_node(engine);
        let frame_op = graph.ops().get(OpKind::CppFrame);
        let frame = graph.create_node(frame_op, &[start]);
        graph.set_cpp_frame_node(frame);
        let function_op = graph.ops().get(OpKind::Function);
        let function = graph.create_node(function_op, &[frame]);
        graph.set_function_node(function);
    }

    fn setup_start_environment(&mut self) {
        let source = self.func.source().clone();
        let n_formals = source.formal_count();
        let n_registers = source.register_count();
        let start = self.func.graph().start_node();

        // one extra slot for the unwind-handler offset
        let mut frame = Vec::with_capacity(n_registers + 1);

        let mut create_param = |builder: &mut Self, index: usize, name: &str| {
            let string_id = builder.func.add_string(name);
            let op = builder.func.graph().ops().get_param(index, string_id);
            builder.func.graph_mut().create_node(op, &[start])
        };

        for (index, name) in ["%function", "%context", "%acc", "%this", "%newTarget", "%argc"]
            .iter()
            .enumerate()
        {
            frame.push(create_param(self, index, name));
        }
        for i in 0..n_formals {
            let slot = call_data::HEADER_SIZE + i;
            let name = source.string(source.formal_name(i) as usize).to_string();
            frame.push(create_param(self, slot, &name));
        }

        let undefined = self.func.graph().undefined_node();
        let empty = self.func.graph().empty_node();
        let first_dead = source.first_tdz_register();
        let dead_count = source.tdz_register_count();
        for i in call_data::HEADER_SIZE + n_formals..n_registers {
            let is_dead = i >= first_dead && i < first_dead + dead_count;
            frame.push(if is_dead { empty } else { undefined });
        }

        frame.push(self.create_constant(0));

        self.env = Some(Environment {
            effect: start,
            control: start,
            frame,
        });
    }

    fn end_graph(&mut self) {
        let graph = self.func.graph_mut();
        assert!(graph.end_node_opt().is_none());
        let op = graph.ops().get_end(self.exit_controls.len());
        let end = graph.create_node(op, &self.exit_controls);
        graph.set_end_node(end);
    }

    fn queue_function_exit(&mut self, exit_node: NodeId) {
        self.exit_controls.push(exit_node);
        self.env = None;
    }

    // loops and unwinding

    fn is_loop_start(&self, offset: i32) -> bool {
        self.label_infos.contains(&(offset as u32))
    }

    /// Unconditionally materialize a one-input region with one-input phis
    /// for every live slot, giving later back-edges a merge target.
    fn handle_loop_start(&mut self, offset: i32) {
        debug_assert!(self.env.is_some());

        let control = self.create_region(1);
        let effect = self.env().effect;
        let effect_phi = self.create_effect_phi(1, effect, control);
        self.env_mut().effect = effect_phi;

        // phis for every slot except the accumulator, which is never live
        // on loop entry, and the unwind-handler slot
        for i in 0..self.slot_count() - 1 {
            if i == call_data::ACCUMULATOR {
                continue;
            }
            let value = self.env().frame[i];
            let phi = self.create_phi(1, value, control);
            self.env_mut().frame[i] = phi;
        }

        let env = self.env.clone().unwrap();
        self.env_for_offset.insert(offset, env);
    }

    fn start_unwinding(&mut self) {
        let target = self.unwind_handler_offset();
        if target != 0 {
            self.merge_into_successor(target);
        } else {
            let undefined = self.func.graph().undefined_node();
            self.bind_acc(undefined);
            self.generate_ret();
        }
    }

    // call helpers

    fn populate(&mut self, args: &mut SmallVec<[NodeId; 32]>, argc: i32, argv: i32) {
        for i in 0..argc {
            args.push(self.slot(argv + i));
        }
        debug_assert!(argc >= 0 && argc <= u16::MAX as i32);
    }

    fn finalize_call(&mut self, kind: OpKind, mut args: SmallVec<[NodeId; 32]>, argc: i32, argv: i32) {
        self.populate(&mut args, argc, argv);
        let op = self.func.graph().ops().get_js_vararg_call(kind, args.len());
        let n = self.create_and_link_node(op, &args);
        self.bind_acc(n);
    }

    fn bind_acc_node(&mut self, kind: OpKind, operands: &[NodeId]) {
        let op = self.op(kind);
        let n = self.create_node(op, operands);
        self.bind_acc(n);
    }

    fn emit_node(&mut self, kind: OpKind, operands: &[NodeId]) -> NodeId {
        let op = self.op(kind);
        self.create_node(op, operands)
    }
}

impl ByteCodeHandler for GraphBuilder<'_> {
    fn start_instruction(&mut self, _op: Opcode, offset: i32, next_offset: i32) -> Verdict {
        self.current_offset = offset;
        self.next_offset = next_offset;

        if let Some(mut registered) = self.env_for_offset.remove(&offset) {
            // A jump from earlier registered an environment for this
            // offset. If control also falls through to here (an
            // if-then-else join), merge the fallthrough environment in;
            // after a loop-closing jump there is no current environment
            // and the registered one is taken unchanged. Either way we
            // continue on a copy: this offset may also be a loop start,
            // whose registered environment must stay as-is.
            if let Some(current) = self.env.take() {
                self.merge_environments(&mut registered, &current);
            }
            self.env = Some(registered.clone());
            self.env_for_offset.insert(offset, registered);
        }

        if self.env.is_none() {
            // No environment: nobody jumps here and the previous
            // instruction does not continue here. Dead code.
            return Verdict::SkipInstruction;
        }

        if self.is_loop_start(offset) {
            self.handle_loop_start(offset);
        }

        Verdict::ProcessInstruction
    }

    fn end_instruction(&mut self, _op: Opcode) {}

    fn generate_ret(&mut self) {
        let acc = self.accumulator();
        let control = self.emit_node(OpKind::Return, &[acc]);
        self.queue_function_exit(control);
    }

    fn generate_debug(&mut self) {
        panic!("the Debug instruction is not supported by the tracing JIT");
    }

    fn generate_load_const(&mut self, index: i32) {
        let v = self.func.source().constant(index as usize).clone();
        let op = self.func.graph().ops().get_constant(v);
        let n = self.create_node(op, &[]);
        self.bind_acc(n);
    }

    fn generate_load_zero(&mut self) {
        let n = self.create_constant(0);
        self.bind_acc(n);
    }

    fn generate_load_true(&mut self) {
        let n = self.func.graph().true_constant();
        self.bind_acc(n);
    }

    fn generate_load_false(&mut self) {
        let n = self.func.graph().false_constant();
        self.bind_acc(n);
    }

    fn generate_load_null(&mut self) {
        let n = self.func.graph().null_node();
        self.bind_acc(n);
    }

    fn generate_load_undefined(&mut self) {
        let n = self.func.graph().undefined_node();
        self.bind_acc(n);
    }

    fn generate_load_int(&mut self, value: i32) {
        let n = self.create_constant(value);
        self.bind_acc(n);
    }

    fn generate_move_const(&mut self, const_index: i32, dest_temp: i32) {
        let v = self.func.source().constant(const_index as usize).clone();
        let op = self.func.graph().ops().get_constant(v);
        let n = self.create_node(op, &[]);
        self.bind_node_to_slot(n, dest_temp);
    }

    fn generate_load_reg(&mut self, reg: i32) {
        let n = self.slot(reg);
        self.bind_acc(n);
    }

    fn generate_store_reg(&mut self, reg: i32) {
        let mut n = self.accumulator();
        if reg as usize == call_data::THIS {
            n = self.emit_node(OpKind::StoreThis, &[n]);
        }
        self.bind_node_to_slot(n, reg);
    }

    fn generate_move_reg(&mut self, src_reg: i32, dest_reg: i32) {
        let n = self.slot(src_reg);
        self.bind_node_to_slot(n, dest_reg);
    }

    fn generate_load_import(&mut self, index: i32) {
        let v = self.func.source().import(index as usize).clone();
        let op = self.func.graph().ops().get_constant(v);
        let n = self.create_node(op, &[]);
        self.bind_acc(n);
    }

    fn generate_load_runtime_string(&mut self, string_id: i32) {
        let s = self.func.source().string(string_id as usize).to_string();
        let op = self.func.graph().ops().get_constant(Value::String(s.into()));
        let n = self.create_node(op, &[]);
        self.bind_acc(n);
    }

    fn generate_move_reg_exp(&mut self, reg_exp_id: i32, dest_reg: i32) {
        let id = self.create_constant(reg_exp_id);
        let n = self.emit_node(OpKind::LoadRegExp, &[id]);
        self.bind_node_to_slot(n, dest_reg);
    }

    fn generate_load_closure(&mut self, value: i32) {
        let id = self.create_constant(value);
        self.bind_acc_node(OpKind::JsLoadClosure, &[id]);
    }

    fn generate_load_local(&mut self, index: i32, _trace_slot: i32) {
        let scope = self.create_constant(0);
        let index = self.create_constant(index);
        self.bind_acc_node(OpKind::ScopedLoad, &[scope, index]);
    }

    fn generate_store_local(&mut self, index: i32) {
        let scope = self.create_constant(0);
        let index = self.create_constant(index);
        let acc = self.accumulator();
        self.emit_node(OpKind::ScopedStore, &[scope, index, acc]);
    }

    fn generate_load_scoped_local(&mut self, scope: i32, index: i32, _trace_slot: i32) {
        let scope = self.create_constant(scope);
        let index = self.create_constant(index);
        self.bind_acc_node(OpKind::ScopedLoad, &[scope, index]);
    }

    fn generate_store_scoped_local(&mut self, scope: i32, index: i32) {
        let scope = self.create_constant(scope);
        let index = self.create_constant(index);
        let acc = self.accumulator();
        self.emit_node(OpKind::ScopedStore, &[scope, index, acc]);
    }

    fn generate_load_name(&mut self, name: i32, _trace_slot: i32) {
        let name = self.create_constant(name);
        self.bind_acc_node(OpKind::JsLoadName, &[name]);
    }

    fn generate_load_global_lookup(&mut self, index: i32, _trace_slot: i32) {
        let index = self.create_constant(index);
        self.bind_acc_node(OpKind::JsLoadGlobalLookup, &[index]);
    }

    fn generate_store_name_sloppy(&mut self, name: i32) {
        let name = self.create_constant(name);
        let acc = self.accumulator();
        self.emit_node(OpKind::JsStoreNameSloppy, &[name, acc]);
    }

    fn generate_store_name_strict(&mut self, name: i32) {
        let name = self.create_constant(name);
        let acc = self.accumulator();
        self.emit_node(OpKind::JsStoreNameStrict, &[name, acc]);
    }

    fn generate_load_element(&mut self, base: i32, _trace_slot: i32) {
        let base = self.slot(base);
        let acc = self.accumulator();
        self.bind_acc_node(OpKind::JsLoadElement, &[base, acc]);
    }

    fn generate_store_element(&mut self, base: i32, index: i32, _trace_slot: i32) {
        let base = self.slot(base);
        let index = self.slot(index);
        let acc = self.accumulator();
        self.emit_node(OpKind::JsStoreElement, &[base, index, acc]);
    }

    fn generate_load_property(&mut self, name: i32, _trace_slot: i32) {
        let acc = self.accumulator();
        let name = self.create_constant(name);
        self.bind_acc_node(OpKind::JsLoadProperty, &[acc, name]);
    }

    fn generate_get_lookup(&mut self, index: i32, _trace_slot: i32) {
        let acc = self.accumulator();
        let index = self.create_constant(index);
        self.bind_acc_node(OpKind::JsGetLookup, &[acc, index]);
    }

    fn generate_store_property(&mut self, name: i32, base: i32) {
        let base = self.slot(base);
        let name = self.create_constant(name);
        let acc = self.accumulator();
        self.emit_node(OpKind::JsStoreProperty, &[base, name, acc]);
    }

    fn generate_set_lookup(&mut self, index: i32, base: i32) {
        let base = self.slot(base);
        let index = self.create_constant(index);
        let acc = self.accumulator();
        let kind = if self.func.source().is_strict() {
            OpKind::JsSetLookupStrict
        } else {
            OpKind::JsSetLookupSloppy
        };
        self.emit_node(kind, &[base, index, acc]);
    }

    fn generate_load_super_property(&mut self, property: i32) {
        let property = self.slot(property);
        self.bind_acc_node(OpKind::JsLoadSuperProperty, &[property]);
    }

    fn generate_store_super_property(&mut self, property: i32) {
        let property = self.create_constant(property);
        let acc = self.accumulator();
        self.emit_node(OpKind::JsStoreSuperProperty, &[property, acc]);
    }

    fn generate_store_scope_object_property(&mut self, base: i32, property_index: i32) {
        let base = self.slot(base);
        let property = self.create_constant(property_index);
        let acc = self.accumulator();
        self.emit_node(OpKind::QmlStoreScopeObjectProperty, &[base, property, acc]);
    }

    fn generate_store_context_object_property(&mut self, base: i32, property_index: i32) {
        let base = self.slot(base);
        let property = self.create_constant(property_index);
        let acc = self.accumulator();
        self.emit_node(OpKind::QmlStoreContextObjectProperty, &[base, property, acc]);
    }

    fn generate_load_scope_object_property(&mut self, property_index: i32, base: i32, capture_required: i32) {
        let base = self.slot(base);
        let property = self.create_constant(property_index);
        let capture = self.create_constant(capture_required);
        self.bind_acc_node(OpKind::QmlLoadScopeObjectProperty, &[base, property, capture]);
    }

    fn generate_load_context_object_property(&mut self, property_index: i32, base: i32, capture_required: i32) {
        let base = self.slot(base);
        let property = self.create_constant(property_index);
        let capture = self.create_constant(capture_required);
        self.bind_acc_node(OpKind::QmlLoadContextObjectProperty, &[base, property, capture]);
    }

    fn generate_load_id_object(&mut self, index: i32, base: i32) {
        let base = self.slot(base);
        let index = self.create_constant(index);
        self.bind_acc_node(OpKind::QmlLoadIdObject, &[base, index]);
    }

    fn generate_yield(&mut self) {
        panic!("resumable functions are not supported by the tracing JIT");
    }

    fn generate_yield_star(&mut self) {
        panic!("resumable functions are not supported by the tracing JIT");
    }

    fn generate_resume(&mut self, _offset: i32) {
        panic!("resumable functions are not supported by the tracing JIT");
    }

    fn generate_call_value(&mut self, name: i32, argc: i32, argv: i32, _trace_slot: i32) {
        let mut args: SmallVec<[NodeId; 32]> = SmallVec::new();
        args.push(self.slot(name));
        self.finalize_call(OpKind::JsCallValue, args, argc, argv);
    }

    fn generate_call_with_receiver(&mut self, name: i32, this_object: i32, argc: i32, argv: i32, _trace_slot: i32) {
        let mut args: SmallVec<[NodeId; 32]> = SmallVec::new();
        args.push(self.slot(name));
        args.push(self.slot(this_object));
        self.finalize_call(OpKind::JsCallWithReceiver, args, argc, argv);
    }

    fn generate_call_property(&mut self, name: i32, base: i32, argc: i32, argv: i32, _trace_slot: i32) {
        let mut args: SmallVec<[NodeId; 32]> = SmallVec::new();
        args.push(self.slot(base));
        let name = self.create_constant(name);
        args.push(name);
        self.finalize_call(OpKind::JsCallProperty, args, argc, argv);
    }

    fn generate_call_property_lookup(&mut self, lookup_index: i32, base: i32, argc: i32, argv: i32, _trace_slot: i32) {
        let mut args: SmallVec<[NodeId; 32]> = SmallVec::new();
        args.push(self.slot(base));
        let index = self.create_constant(lookup_index);
        args.push(index);
        self.finalize_call(OpKind::JsCallLookup, args, argc, argv);
    }

    fn generate_call_element(&mut self, base: i32, index: i32, argc: i32, argv: i32, _trace_slot: i32) {
        let mut args: SmallVec<[NodeId; 32]> = SmallVec::new();
        args.push(self.slot(base));
        args.push(self.slot(index));
        self.finalize_call(OpKind::JsCallElement, args, argc, argv);
    }

    fn generate_call_name(&mut self, name: i32, argc: i32, argv: i32, _trace_slot: i32) {
        let mut args: SmallVec<[NodeId; 32]> = SmallVec::new();
        let name = self.create_constant(name);
        args.push(name);
        self.finalize_call(OpKind::JsCallName, args, argc, argv);
    }

    fn generate_call_possibly_direct_eval(&mut self, argc: i32, argv: i32, _trace_slot: i32) {
        let args: SmallVec<[NodeId; 32]> = SmallVec::new();
        self.finalize_call(OpKind::JsCallPossiblyDirectEval, args, argc, argv);
    }

    fn generate_call_global_lookup(&mut self, index: i32, argc: i32, argv: i32, _trace_slot: i32) {
        let mut args: SmallVec<[NodeId; 32]> = SmallVec::new();
        let index = self.create_constant(index);
        args.push(index);
        self.finalize_call(OpKind::JsCallGlobalLookup, args, argc, argv);
    }

    fn generate_call_scope_object_property(&mut self, prop_idx: i32, base: i32, argc: i32, argv: i32, _trace_slot: i32) {
        let mut args: SmallVec<[NodeId; 32]> = SmallVec::new();
        args.push(self.slot(base));
        let prop = self.create_constant(prop_idx);
        args.push(prop);
        self.finalize_call(OpKind::QmlCallScopeObjectProperty, args, argc, argv);
    }

    fn generate_call_context_object_property(&mut self, prop_idx: i32, base: i32, argc: i32, argv: i32, _trace_slot: i32) {
        let mut args: SmallVec<[NodeId; 32]> = SmallVec::new();
        args.push(self.slot(base));
        let prop = self.create_constant(prop_idx);
        args.push(prop);
        self.finalize_call(OpKind::QmlCallContextObjectProperty, args, argc, argv);
    }

    fn generate_call_with_spread(&mut self, func: i32, this_object: i32, argc: i32, argv: i32, _trace_slot: i32) {
        let mut args: SmallVec<[NodeId; 32]> = SmallVec::new();
        args.push(self.slot(func));
        args.push(self.slot(this_object));
        self.finalize_call(OpKind::JsCallWithSpread, args, argc, argv);
    }

    fn generate_tail_call(&mut self, func: i32, this_object: i32, argc: i32, argv: i32) {
        let mut args: SmallVec<[NodeId; 32]> = SmallVec::new();
        args.push(self.slot(func));
        args.push(self.slot(this_object));
        self.populate(&mut args, argc, argv);
        let op = self.func.graph().ops().get_js_tail_call(args.len());
        let n = self.create_and_link_node(op, &args);
        self.queue_function_exit(n);
    }

    fn generate_construct(&mut self, func: i32, argc: i32, argv: i32) {
        let mut args: SmallVec<[NodeId; 32]> = SmallVec::new();
        args.push(self.slot(func));
        args.push(self.accumulator());
        self.finalize_call(OpKind::JsConstruct, args, argc, argv);
    }

    fn generate_construct_with_spread(&mut self, func: i32, argc: i32, argv: i32) {
        let mut args: SmallVec<[NodeId; 32]> = SmallVec::new();
        args.push(self.slot(func));
        args.push(self.accumulator());
        self.finalize_call(OpKind::JsConstructWithSpread, args, argc, argv);
    }

    fn generate_set_unwind_handler(&mut self, offset: i32) {
        self.current_unwind_handler_offset =
            if offset != 0 { self.absolute_offset(offset) } else { 0 };
        let handler = self.current_unwind_handler_offset;
        self.set_unwind_handler_offset(handler);
    }

    fn generate_unwind_dispatch(&mut self) {
        let engine = self.func.graph().engine_node();
        let e = self.emit_node(OpKind::HasException, &[engine]);
        self.emit_node(OpKind::Branch, &[e]);
        {
            let parent = self.env.clone();
            self.create_if_true();
            self.start_unwinding();
            self.env = parent;
        }

        self.create_if_false();

        let unwind_handler_offset = self.unwind_handler_offset();
        let fallthrough_offset = self.next_offset;
        let mut n_continuations = self.func.unwind_label_offsets().len() + 1;
        if unwind_handler_offset != 0 {
            n_continuations += 1;
        }
        let op = self.func.graph().ops().get_unwind_dispatch(
            n_continuations,
            unwind_handler_offset,
            fallthrough_offset,
        );
        self.create_node(op, &[]);

        {
            let parent = self.env.clone();
            self.merge_into_successor(fallthrough_offset);
            self.env = parent;
        }

        if unwind_handler_offset != 0 {
            let parent = self.env.clone();
            self.create_handle_unwind(unwind_handler_offset);
            self.merge_into_successor(unwind_handler_offset);
            self.env = parent;
        }

        let labels = self.func.unwind_label_offsets().to_vec();
        for unwind_label_offset in labels {
            if unwind_label_offset <= self.current_offset {
                continue;
            }
            let parent = self.env.clone();
            self.create_handle_unwind(unwind_label_offset);
            self.merge_into_successor(unwind_label_offset);
            self.env = parent;
        }

        self.env = None;
    }

    fn generate_unwind_to_label(&mut self, level: i32, offset: i32) {
        let unwinder = self.absolute_offset(offset);
        let level = self.create_constant(level);
        let target = self.create_constant(unwinder);
        self.emit_node(OpKind::UnwindToLabel, &[level, target]);
        self.func.add_unwind_label_offset(unwinder);
        self.start_unwinding();
    }

    fn generate_dead_temporal_zone_check(&mut self, name: i32) {
        let acc = self.accumulator();
        let check = self.emit_node(OpKind::IsEmpty, &[acc]);
        self.emit_node(OpKind::Branch, &[check]);

        {
            let parent = self.env.clone();
            self.create_if_true();
            let name = self.create_constant(name);
            self.emit_node(OpKind::ThrowReferenceError, &[name]);
            self.start_unwinding();
            self.env = parent;
        }

        self.create_if_false();
    }

    fn generate_throw_exception(&mut self) {
        let acc = self.accumulator();
        self.emit_node(OpKind::Throw, &[acc]);
        self.start_unwinding();
    }

    fn generate_get_exception(&mut self) {
        self.bind_acc_node(OpKind::GetException, &[]);
    }

    fn generate_set_exception(&mut self) {
        let acc = self.accumulator();
        self.emit_node(OpKind::SetException, &[acc]);
    }

    fn generate_create_call_context(&mut self) {
        self.emit_node(OpKind::JsCreateCallContext, &[]);
    }

    fn generate_push_catch_context(&mut self, index: i32, name: i32) {
        let index = self.create_constant(index);
        let name = self.create_constant(name);
        self.emit_node(OpKind::JsCreateCatchContext, &[index, name]);
    }

    fn generate_push_with_context(&mut self) {
        let acc = self.accumulator();
        self.bind_acc_node(OpKind::JsCreateWithContext, &[acc]);
    }

    fn generate_push_block_context(&mut self, index: i32) {
        let index = self.create_constant(index);
        self.emit_node(OpKind::JsCreateBlockContext, &[index]);
    }

    fn generate_clone_block_context(&mut self) {
        self.emit_node(OpKind::JsCloneBlockContext, &[]);
    }

    fn generate_push_script_context(&mut self, index: i32) {
        let index = self.create_constant(index);
        self.emit_node(OpKind::JsCreateScriptContext, &[index]);
    }

    fn generate_pop_script_context(&mut self) {
        self.emit_node(OpKind::JsPopScriptContext, &[]);
    }

    fn generate_pop_context(&mut self) {
        self.emit_node(OpKind::PopContext, &[]);
    }

    fn generate_get_iterator(&mut self, iterator: i32) {
        let acc = self.accumulator();
        let iterator = self.create_constant(iterator);
        self.bind_acc_node(OpKind::JsGetIterator, &[acc, iterator]);
    }

    fn generate_iterator_next(&mut self, value: i32, done: i32) {
        // The runtime routine writes the iteration value through its last
        // argument and only then is the exception flag checked, so the
        // operation itself is modeled as non-throwing and the check is
        // emitted here, after the SelectOutput.
        let acc = self.accumulator();
        let undefined = self.func.graph().undefined_node();
        let n = self.emit_node(OpKind::JsIteratorNext, &[acc, undefined]);
        self.bind_acc(n);
        self.bind_node_to_slot(n, done);
        self.iterator_next_trailing(n, value);
    }

    fn generate_iterator_next_for_yield_star(&mut self, iterator: i32, object: i32) {
        let acc = self.accumulator();
        let iterator = self.slot(iterator);
        let undefined = self.func.graph().undefined_node();
        let n = self.emit_node(OpKind::JsIteratorNextForYieldStar, &[acc, iterator, undefined]);
        self.bind_acc(n);
        self.iterator_next_trailing(n, object);
    }

    fn generate_iterator_close(&mut self, done: i32) {
        let acc = self.accumulator();
        let done = self.slot(done);
        self.bind_acc_node(OpKind::JsIteratorClose, &[acc, done]);
    }

    fn generate_destructure_rest_element(&mut self) {
        let acc = self.accumulator();
        self.bind_acc_node(OpKind::JsDestructureRestElement, &[acc]);
    }

    fn generate_delete_property(&mut self, base: i32, index: i32) {
        let base = self.slot(base);
        let index = self.slot(index);
        self.bind_acc_node(OpKind::JsDeleteProperty, &[base, index]);
    }

    fn generate_delete_name(&mut self, name: i32) {
        let name = self.create_constant(name);
        self.bind_acc_node(OpKind::JsDeleteName, &[name]);
    }

    fn generate_typeof_name(&mut self, name: i32) {
        let name = self.create_constant(name);
        self.bind_acc_node(OpKind::JsTypeofName, &[name]);
    }

    fn generate_typeof_value(&mut self) {
        let acc = self.accumulator();
        self.bind_acc_node(OpKind::JsTypeofValue, &[acc]);
    }

    fn generate_declare_var(&mut self, var_name: i32, is_deletable: i32) {
        let deletable = self.create_constant(is_deletable);
        let name = self.create_constant(var_name);
        self.bind_acc_node(OpKind::JsDeclareVar, &[deletable, name]);
    }

    fn generate_define_array(&mut self, argc: i32, argv: i32) {
        let args: SmallVec<[NodeId; 32]> = SmallVec::new();
        self.finalize_call(OpKind::JsDefineArray, args, argc, argv);
    }

    fn generate_define_object_literal(&mut self, internal_class_id: i32, argc: i32, argv: i32) {
        let mut args: SmallVec<[NodeId; 32]> = SmallVec::new();
        let class_id = self.create_constant(internal_class_id);
        args.push(class_id);
        self.finalize_call(OpKind::JsDefineObjectLiteral, args, argc, argv);
    }

    fn generate_create_class(&mut self, class_index: i32, heritage: i32, computed_names: i32) {
        // methods with computed names pass those names as arguments
        let argc = self.func.source().class(class_index as usize).computed_name_count() as i32;
        let argv = computed_names;

        let mut args: SmallVec<[NodeId; 32]> = SmallVec::new();
        let class_index = self.create_constant(class_index);
        args.push(class_index);
        args.push(self.slot(heritage));
        self.finalize_call(OpKind::JsCreateClass, args, argc, argv);
    }

    fn generate_create_mapped_arguments_object(&mut self) {
        self.bind_acc_node(OpKind::JsCreateMappedArgumentsObject, &[]);
    }

    fn generate_create_unmapped_arguments_object(&mut self) {
        self.bind_acc_node(OpKind::JsCreateUnmappedArgumentsObject, &[]);
    }

    fn generate_create_rest_parameter(&mut self, arg_index: i32) {
        let index = self.create_constant(arg_index);
        self.bind_acc_node(OpKind::JsCreateRestParameter, &[index]);
    }

    fn generate_convert_this_to_object(&mut self) {
        let this = self.slot(call_data::THIS as i32);
        let n = self.emit_node(OpKind::JsThisToObject, &[this]);
        self.bind_node_to_slot(n, call_data::THIS as i32);
    }

    fn generate_load_super_constructor(&mut self) {
        let function = self.slot(call_data::FUNCTION as i32);
        self.bind_acc_node(OpKind::JsLoadSuperConstructor, &[function]);
    }

    fn generate_to_object(&mut self) {
        let acc = self.accumulator();
        self.bind_acc_node(OpKind::ToObject, &[acc]);
    }

    fn generate_throw_on_null_or_undefined(&mut self) {
        let acc = self.accumulator();
        self.emit_node(OpKind::JsThrowOnNullOrUndefined, &[acc]);
    }

    fn generate_get_template_object(&mut self, index: i32) {
        let index = self.create_constant(index);
        self.bind_acc_node(OpKind::JsGetTemplateObject, &[index]);
    }

    fn generate_jump(&mut self, offset: i32) {
        let jump_target = self.absolute_offset(offset);
        self.merge_into_successor(jump_target);
    }

    fn generate_jump_true(&mut self, _trace_slot: i32, offset: i32) {
        let acc = self.accumulator();
        let condition = self.create_to_boolean(acc);
        self.emit_node(OpKind::Branch, &[condition]);

        {
            let parent = self.env.clone();
            let jump_target = self.absolute_offset(offset);
            self.create_if_true();
            self.merge_into_successor(jump_target);
            self.env = parent;
        }

        self.create_if_false();
    }

    fn generate_jump_false(&mut self, _trace_slot: i32, offset: i32) {
        let acc = self.accumulator();
        self.jump_false_on(acc, offset);
    }

    fn generate_jump_no_exception(&mut self, offset: i32) {
        let engine = self.func.graph().engine_node();
        let e = self.emit_node(OpKind::HasException, &[engine]);
        self.emit_node(OpKind::Branch, &[e]);

        {
            let parent = self.env.clone();
            let jump_target = self.absolute_offset(offset);
            self.create_if_false();
            self.merge_into_successor(jump_target);
            self.env = parent;
        }

        self.create_if_true();
    }

    fn generate_jump_not_undefined(&mut self, offset: i32) {
        let acc = self.accumulator();
        let undefined = self.func.graph().undefined_node();
        let condition = self.emit_node(OpKind::JsStrictEqual, &[acc, undefined]);
        self.jump_false_on(condition, offset);
    }

    fn generate_cmp_eq_null(&mut self) {
        let acc = self.accumulator();
        let null = self.func.graph().null_node();
        self.bind_acc_node(OpKind::JsEqual, &[acc, null]);
    }

    fn generate_cmp_ne_null(&mut self) {
        self.generate_cmp_eq_null();
        let acc = self.accumulator();
        self.bind_acc_node(OpKind::BooleanNot, &[acc]);
    }

    fn generate_cmp_eq_int(&mut self, lhs: i32) {
        let left = self.create_constant(lhs);
        let acc = self.accumulator();
        self.bind_acc_node(OpKind::JsEqual, &[left, acc]);
    }

    fn generate_cmp_ne_int(&mut self, lhs: i32) {
        self.generate_cmp_eq_int(lhs);
        let acc = self.accumulator();
        self.bind_acc_node(OpKind::BooleanNot, &[acc]);
    }

    fn generate_cmp_eq(&mut self, lhs: i32) {
        let lhs = self.slot(lhs);
        let acc = self.accumulator();
        self.bind_acc_node(OpKind::JsEqual, &[lhs, acc]);
    }

    fn generate_cmp_ne(&mut self, lhs: i32) {
        self.generate_cmp_eq(lhs);
        let acc = self.accumulator();
        self.bind_acc_node(OpKind::BooleanNot, &[acc]);
    }

    fn generate_cmp_gt(&mut self, lhs: i32) {
        let lhs = self.slot(lhs);
        let acc = self.accumulator();
        self.bind_acc_node(OpKind::JsGreaterThan, &[lhs, acc]);
    }

    fn generate_cmp_ge(&mut self, lhs: i32) {
        let lhs = self.slot(lhs);
        let acc = self.accumulator();
        self.bind_acc_node(OpKind::JsGreaterEqual, &[lhs, acc]);
    }

    fn generate_cmp_lt(&mut self, lhs: i32) {
        let lhs = self.slot(lhs);
        let acc = self.accumulator();
        self.bind_acc_node(OpKind::JsLessThan, &[lhs, acc]);
    }

    fn generate_cmp_le(&mut self, lhs: i32) {
        let lhs = self.slot(lhs);
        let acc = self.accumulator();
        self.bind_acc_node(OpKind::JsLessEqual, &[lhs, acc]);
    }

    fn generate_cmp_strict_equal(&mut self, lhs: i32) {
        let lhs = self.slot(lhs);
        let acc = self.accumulator();
        self.bind_acc_node(OpKind::JsStrictEqual, &[lhs, acc]);
    }

    fn generate_cmp_strict_not_equal(&mut self, lhs: i32) {
        self.generate_cmp_strict_equal(lhs);
        let acc = self.accumulator();
        self.bind_acc_node(OpKind::BooleanNot, &[acc]);
    }

    fn generate_cmp_in(&mut self, lhs: i32) {
        let lhs = self.slot(lhs);
        let acc = self.accumulator();
        self.bind_acc_node(OpKind::JsIn, &[lhs, acc]);
    }

    fn generate_cmp_instance_of(&mut self, lhs: i32) {
        let lhs = self.slot(lhs);
        let acc = self.accumulator();
        self.bind_acc_node(OpKind::JsInstanceOf, &[lhs, acc]);
    }

    fn generate_unot(&mut self) {
        let acc = self.accumulator();
        let b = self.create_to_boolean(acc);
        self.bind_acc_node(OpKind::BooleanNot, &[b]);
    }

    fn generate_uplus(&mut self, _trace_slot: i32) {
        let acc = self.accumulator();
        self.bind_acc_node(OpKind::JsToNumber, &[acc]);
    }

    fn generate_uminus(&mut self, _trace_slot: i32) {
        let acc = self.accumulator();
        self.bind_acc_node(OpKind::JsNegate, &[acc]);
    }

    fn generate_ucompl(&mut self) {
        let acc = self.accumulator();
        let minus_one = self.create_constant(-1);
        self.bind_acc_node(OpKind::JsBitXor, &[acc, minus_one]);
    }

    fn generate_increment(&mut self, _trace_slot: i32) {
        let acc = self.accumulator();
        let one = self.create_constant(1);
        self.bind_acc_node(OpKind::JsAdd, &[acc, one]);
    }

    fn generate_decrement(&mut self, _trace_slot: i32) {
        let acc = self.accumulator();
        let one = self.create_constant(1);
        self.bind_acc_node(OpKind::JsSubtract, &[acc, one]);
    }

    fn generate_add(&mut self, lhs: i32, _trace_slot: i32) {
        let lhs = self.slot(lhs);
        let acc = self.accumulator();
        self.bind_acc_node(OpKind::JsAdd, &[lhs, acc]);
    }

    fn generate_bit_and(&mut self, lhs: i32) {
        let lhs = self.slot(lhs);
        let acc = self.accumulator();
        self.bind_acc_node(OpKind::JsBitAnd, &[lhs, acc]);
    }

    fn generate_bit_or(&mut self, lhs: i32) {
        let lhs = self.slot(lhs);
        let acc = self.accumulator();
        self.bind_acc_node(OpKind::JsBitOr, &[lhs, acc]);
    }

    fn generate_bit_xor(&mut self, lhs: i32) {
        let lhs = self.slot(lhs);
        let acc = self.accumulator();
        self.bind_acc_node(OpKind::JsBitXor, &[lhs, acc]);
    }

    fn generate_ushr(&mut self, lhs: i32) {
        let lhs = self.slot(lhs);
        let acc = self.accumulator();
        self.bind_acc_node(OpKind::JsUnsignedShiftRight, &[lhs, acc]);
    }

    fn generate_shr(&mut self, lhs: i32) {
        let lhs = self.slot(lhs);
        let acc = self.accumulator();
        self.bind_acc_node(OpKind::JsShiftRight, &[lhs, acc]);
    }

    fn generate_shl(&mut self, lhs: i32) {
        let lhs = self.slot(lhs);
        let acc = self.accumulator();
        self.bind_acc_node(OpKind::JsShiftLeft, &[lhs, acc]);
    }

    fn generate_bit_and_const(&mut self, rhs: i32) {
        let acc = self.accumulator();
        let rhs = self.create_constant(rhs);
        self.bind_acc_node(OpKind::JsBitAnd, &[acc, rhs]);
    }

    fn generate_bit_or_const(&mut self, rhs: i32) {
        let acc = self.accumulator();
        let rhs = self.create_constant(rhs);
        self.bind_acc_node(OpKind::JsBitOr, &[acc, rhs]);
    }

    fn generate_bit_xor_const(&mut self, rhs: i32) {
        let acc = self.accumulator();
        let rhs = self.create_constant(rhs);
        self.bind_acc_node(OpKind::JsBitXor, &[acc, rhs]);
    }

    fn generate_ushr_const(&mut self, rhs: i32) {
        let acc = self.accumulator();
        let rhs = self.create_constant(rhs);
        self.bind_acc_node(OpKind::JsUnsignedShiftRight, &[acc, rhs]);
    }

    fn generate_shr_const(&mut self, rhs: i32) {
        let acc = self.accumulator();
        let rhs = self.create_constant(rhs);
        self.bind_acc_node(OpKind::JsShiftRight, &[acc, rhs]);
    }

    fn generate_shl_const(&mut self, rhs: i32) {
        let acc = self.accumulator();
        let rhs = self.create_constant(rhs);
        self.bind_acc_node(OpKind::JsShiftLeft, &[acc, rhs]);
    }

    fn generate_exp(&mut self, lhs: i32) {
        let lhs = self.slot(lhs);
        let acc = self.accumulator();
        self.bind_acc_node(OpKind::JsExponentiate, &[lhs, acc]);
    }

    fn generate_mul(&mut self, lhs: i32, _trace_slot: i32) {
        let lhs = self.slot(lhs);
        let acc = self.accumulator();
        self.bind_acc_node(OpKind::JsMultiply, &[lhs, acc]);
    }

    fn generate_div(&mut self, lhs: i32) {
        let lhs = self.slot(lhs);
        let acc = self.accumulator();
        self.bind_acc_node(OpKind::JsDivide, &[lhs, acc]);
    }

    fn generate_mod(&mut self, lhs: i32, _trace_slot: i32) {
        let lhs = self.slot(lhs);
        let acc = self.accumulator();
        self.bind_acc_node(OpKind::JsModulo, &[lhs, acc]);
    }

    fn generate_sub(&mut self, lhs: i32, _trace_slot: i32) {
        let lhs = self.slot(lhs);
        let acc = self.accumulator();
        self.bind_acc_node(OpKind::JsSubtract, &[lhs, acc]);
    }

    fn generate_load_qml_context(&mut self, result: i32) {
        let n = self.emit_node(OpKind::QmlLoadContext, &[]);
        self.bind_node_to_slot(n, result);
    }

    fn generate_load_qml_imported_scripts(&mut self, result: i32) {
        let n = self.emit_node(OpKind::QmlLoadImportedScripts, &[]);
        self.bind_node_to_slot(n, result);
    }

    fn generate_initialize_block_dead_temporal_zone(&mut self, first_reg: i32, count: i32) {
        let empty = self.func.graph().empty_node();
        for reg in first_reg..first_reg + count {
            self.bind_node_to_slot(empty, reg);
        }
    }
}

impl GraphBuilder<'_> {
    /// Branch on `condition`, merging the false edge into the jump target
    /// and continuing on the true edge.
    fn jump_false_on(&mut self, condition: NodeId, offset: i32) {
        let condition = self.create_to_boolean(condition);
        self.emit_node(OpKind::Branch, &[condition]);

        {
            let parent = self.env.clone();
            let jump_target = self.absolute_offset(offset);
            self.create_if_false();
            self.merge_into_successor(jump_target);
            self.env = parent;
        }

        self.create_if_true();
    }

    /// Emitted after `JsIteratorNext`-style nodes: select the inout result
    /// into its slot and branch on the engine's exception flag.
    fn iterator_next_trailing(&mut self, iteration_node: NodeId, result_slot: i32) {
        debug_assert_eq!(self.func.graph().op(iteration_node).control_output_count(), 1);
        debug_assert_eq!(self.func.graph().op(iteration_node).effect_output_count(), 1);

        let one = self.create_constant(1);
        let undefined = self.func.graph().undefined_node();
        let selected = self.emit_node(OpKind::SelectOutput, &[iteration_node, one, undefined]);
        self.bind_node_to_slot(selected, result_slot);

        // note: the accumulator keeps the runtime call's return value here
        let engine = self.func.graph().engine_node();
        let eh_check = self.emit_node(OpKind::HasException, &[engine]);
        self.emit_node(OpKind::Branch, &[eh_check]);

        {
            let parent = self.env.clone();
            self.create_if_true();
            let eh_offset = self.unwind_handler_offset();
            if eh_offset != 0 {
                self.merge_into_successor(eh_offset);
            } else {
                // no handler: keep the exception set in the engine and
                // leave the function
                let undefined = self.func.graph().undefined_node();
                self.bind_acc(undefined);
                self.generate_ret();
            }
            self.env = parent;
        }

        self.create_if_false();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::CompiledFunction;
    use crate::ir::operation::OpKind;

    #[test]
    fn test_empty_function_graph() {
        let mut fb = CompiledFunction::builder("empty");
        fb.code().emit(Opcode::LoadUndefined, &[]);
        fb.code().emit(Opcode::Ret, &[]);
        let mut function = Function::new(fb.build());
        GraphBuilder::build_graph(&mut function);

        let graph = function.graph();
        let end = graph.end_node();
        assert_eq!(graph.opcode(end), OpKind::End);
        assert_eq!(graph.input_count(end), 1);
        let ret = graph.input(end, 0);
        assert_eq!(graph.opcode(ret), OpKind::Return);
        assert_eq!(graph.input(ret, 0), graph.undefined_node());
        function.verify();
    }

    #[test]
    fn test_straight_line_arithmetic() {
        // return a + b
        let mut fb = CompiledFunction::builder("addition");
        let a = fb.add_formal("a");
        let b = fb.add_formal("b");
        let a_slot = (call_data::HEADER_SIZE + a) as i32;
        let b_slot = (call_data::HEADER_SIZE + b) as i32;
        fb.code().emit(Opcode::LoadReg, &[b_slot]);
        fb.code().emit(Opcode::Add, &[a_slot, -1]);
        fb.code().emit(Opcode::Ret, &[]);
        let mut function = Function::new(fb.build());
        GraphBuilder::build_graph(&mut function);
        function.verify();

        let graph = function.graph();
        let ret = graph.input(graph.end_node(), 0);
        let add = graph.input(ret, 0);
        assert_eq!(graph.opcode(add), OpKind::JsAdd);
        // both operands are parameters
        for i in 0..2 {
            let input = graph.input(add, i);
            assert_eq!(graph.opcode(input), OpKind::Parameter);
        }
    }

    #[test]
    fn test_if_then_else_shape() {
        // if (c) return 1; else return 2;
        let mut fb = CompiledFunction::builder("branchy");
        let c = fb.add_formal("c");
        let c_slot = (call_data::HEADER_SIZE + c) as i32;
        fb.code().emit(Opcode::LoadReg, &[c_slot]);
        let else_jump = fb.code().emit_jump(Opcode::JumpFalse, &[-1]);
        fb.code().emit(Opcode::LoadInt, &[1]);
        fb.code().emit(Opcode::Ret, &[]);
        fb.code().patch_jump(else_jump);
        fb.code().emit(Opcode::LoadInt, &[2]);
        fb.code().emit(Opcode::Ret, &[]);
        let mut function = Function::new(fb.build());
        GraphBuilder::build_graph(&mut function);
        function.verify();

        let graph = function.graph();
        let end = graph.end_node();
        assert_eq!(graph.input_count(end), 2);
        for i in 0..2 {
            assert_eq!(graph.opcode(graph.input(end, i)), OpKind::Return);
        }
    }

    #[test]
    fn test_loop_header_phis() {
        // var i = 0; while (i < 10) i = i + 1; return i;
        let mut fb = CompiledFunction::builder("loopy");
        fb.set_local_count(1);
        let i_slot = call_data::HEADER_SIZE as i32;
        fb.code().emit(Opcode::LoadZero, &[]);
        fb.code().emit(Opcode::StoreReg, &[i_slot]);
        fb.mark_loop_start();
        let header = fb.code().current_offset();
        fb.code().emit(Opcode::LoadInt, &[10]);
        fb.code().emit(Opcode::CmpLt, &[i_slot]);
        let exit = fb.code().emit_jump(Opcode::JumpFalse, &[-1]);
        fb.code().emit(Opcode::LoadReg, &[i_slot]);
        fb.code().emit(Opcode::Increment, &[-1]);
        fb.code().emit(Opcode::StoreReg, &[i_slot]);
        fb.code().emit_jump_to(Opcode::Jump, &[], header);
        fb.code().patch_jump(exit);
        fb.code().emit(Opcode::LoadReg, &[i_slot]);
        fb.code().emit(Opcode::Ret, &[]);
        let mut function = Function::new(fb.build());
        GraphBuilder::build_graph(&mut function);
        function.verify();

        let graph = function.graph();
        let ret = graph.input(graph.end_node(), 0);
        let i_value = graph.input(ret, 0);
        // the returned value is the loop phi over i
        assert_eq!(graph.opcode(i_value), OpKind::Phi);
        let region = graph.control_input(i_value).unwrap();
        assert_eq!(graph.opcode(region), OpKind::Region);
        // entry edge plus one back edge
        assert_eq!(graph.input_count(region), 2);
        assert_eq!(graph.input_count(i_value), 3);
    }

    #[test]
    #[should_panic(expected = "resumable functions")]
    fn test_generators_are_rejected() {
        let mut fb = CompiledFunction::builder("generator");
        fb.code().emit(Opcode::Yield, &[]);
        fb.code().emit(Opcode::Ret, &[]);
        let mut function = Function::new(fb.build());
        GraphBuilder::build_graph(&mut function);
    }
}
