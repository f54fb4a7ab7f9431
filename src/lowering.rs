//! Generic lowering: rewrite every runtime-callable operation into a
//! uniform `Call` node whose payload names the callee.
//!
//! Calls get explicit engine/function/frame arguments prepended as their
//! runtime signature demands; value arguments that must live on the JS
//! stack are wrapped in `Alloca`. Vararg calls additionally materialize
//! their arguments into a value array via `VaAlloc`/`VaStore`/`VaSeal`.

use smallvec::SmallVec;
use tracing::debug;

use crate::ir::function::Function;
use crate::ir::node::{NodeId, NodeWorkList, UseEdge};
use crate::ir::operation::OpKind;
use crate::runtime;

const TARGET: &str = "seajit::lowering";

pub struct GenericLowering<'f> {
    func: &'f mut Function,
}

impl<'f> GenericLowering<'f> {
    pub fn new(func: &'f mut Function) -> GenericLowering<'f> {
        GenericLowering { func }
    }

    pub fn lower(&mut self) {
        // one pass over all reachable nodes; order does not matter for
        // generic lowering
        let mut worklist = NodeWorkList::new(self.func.graph());
        worklist.enqueue_all_inputs(self.func.graph(), self.func.graph().end_node());

        while let Some(n) = worklist.dequeue_next_node_for_visiting() {
            worklist.enqueue_all_inputs(self.func.graph(), n);

            let kind = self.func.graph().opcode(n);
            if !runtime::is_runtime_call(kind) {
                continue;
            }

            if runtime::is_var_args_call(kind) {
                self.replace_with_var_args_call(n);
            } else {
                self.replace_with_call(n);
            }
        }
    }

    /// Wrap `input` in an `Alloca` when the callee needs it materialized
    /// on the JS stack at this argument position.
    fn maybe_alloca(&mut self, kind: OpKind, arg_position: usize, input: NodeId) -> NodeId {
        let graph = self.func.graph();
        let is_constant = graph.op(input).is_constant();
        let node_type = self.func.node_type(input);
        if runtime::needs_storage_on_js_stack(kind, arg_position, is_constant, node_type) {
            let graph = self.func.graph_mut();
            let op = graph.ops().get(OpKind::Alloca);
            graph.create_node(op, &[input])
        } else {
            input
        }
    }

    fn replace_with_call(&mut self, n: NodeId) {
        let kind = self.func.graph().opcode(n);
        let new_op = self.func.graph().ops().get_call(kind);

        let mut args: SmallVec<[NodeId; 32]> = SmallVec::new();
        if runtime::takes_engine_as_arg(kind, 0) {
            args.push(self.func.graph().engine_node());
        }
        if runtime::takes_function_as_arg(kind, args.len()) {
            args.push(self.func.graph().function_node());
        }
        if runtime::takes_frame_as_arg(kind, args.len()) {
            args.push(self.func.graph().cpp_frame_node());
        }
        let extra_leading_arguments = args.len();

        let value_input_count = self.func.graph().op(n).value_input_count();
        for arg in 0..self.func.graph().input_count(n) {
            let input = self.func.graph().input(n, arg);
            if self.func.graph().opcode(input) == OpKind::FrameState {
                continue;
            }

            if arg >= value_input_count {
                // effect or control input
                args.push(input);
                continue;
            }

            let input = self.maybe_alloca(kind, args.len(), input);
            args.push(input);
        }

        let new_call = self.func.graph_mut().create_node(new_op.clone(), &args);

        debug!(
            target: TARGET,
            old = ?n,
            new = ?new_call,
            operation = %new_op.debug_string(),
            "replacing runtime-callable node with call"
        );

        self.func
            .node_info_mut(new_call)
            .set_type(runtime::return_type(kind));
        self.func.graph_mut().replace_all_uses_with(n, new_call);
        self.func.graph_mut().kill(n);

        // fix up the selected index of any SelectOutput user
        let uses: SmallVec<[UseEdge; 8]> = self.func.graph().uses(new_call).collect();
        for edge in uses {
            if self.func.graph().opcode(edge.user) != OpKind::SelectOutput {
                continue;
            }
            let old_index = self
                .func
                .graph()
                .op(self.func.graph().input(edge.user, 1))
                .constant_payload()
                .expect("SelectOutput index must be a constant")
                .as_int32();
            let new_index = old_index + extra_leading_arguments as i32;
            let index_node = self.func.graph_mut().create_constant_int(new_index);
            self.func.graph_mut().replace_input(edge.user, 1, index_node);
            let selected = self.func.graph().input(new_call, new_index as usize);
            self.func.graph_mut().replace_input(edge.user, 2, selected);
            break;
        }
    }

    fn replace_with_var_args_call(&mut self, n: NodeId) {
        let kind = self.func.graph().opcode(n);
        let is_tail_call = kind == OpKind::JsTailCall;
        let new_op = if is_tail_call {
            self.func.graph().ops().get_tail_call()
        } else {
            self.func.graph().ops().get_call(kind)
        };

        let value_input_count = self.func.graph().op(n).value_input_count();
        let var_args_start = runtime::var_args_start(kind);
        let vararg_count = value_input_count - var_args_start;

        let effect = self
            .func
            .graph()
            .effect_input(n)
            .expect("vararg call without effect input");
        let va_alloc = {
            let graph = self.func.graph_mut();
            let count = graph.create_constant_int(vararg_count as i32);
            let op = graph.ops().get(OpKind::VaAlloc);
            graph.create_node(op, &[count, effect])
        };

        let mut va_seal_in: SmallVec<[NodeId; 32]> = SmallVec::new();
        va_seal_in.push(va_alloc);
        for i in var_args_start..value_input_count {
            let input = self.func.graph().input(n, i);
            let graph = self.func.graph_mut();
            let index = graph.create_constant_int((va_seal_in.len() - 1) as i32);
            let op = graph.ops().get(OpKind::VaStore);
            va_seal_in.push(graph.create_node(op, &[va_alloc, index, input]));
        }
        va_seal_in.push(va_alloc);
        let va_seal = {
            let graph = self.func.graph_mut();
            let op = graph.ops().get_va_seal(va_seal_in.len() - 2);
            graph.create_node(op, &va_seal_in)
        };

        let mut call_args: SmallVec<[NodeId; 8]> = SmallVec::new();
        if is_tail_call {
            call_args.push(self.func.graph().cpp_frame_node());
        }
        call_args.push(self.func.graph().engine_node());
        for i in 0..var_args_start {
            let input = self.func.graph().input(n, i);
            let input = self.maybe_alloca(kind, call_args.len(), input);
            call_args.push(input);
        }
        call_args.push(va_seal); // args
        if kind != OpKind::JsCreateClass {
            // argc; CreateClass is the odd duck without it
            let argc = self
                .func
                .graph_mut()
                .create_constant_int((va_seal_in.len() - 2) as i32);
            call_args.push(argc);
        }
        call_args.push(va_seal); // effect
        let control = self
            .func
            .graph()
            .control_input(n)
            .expect("vararg call without control input");
        call_args.push(control);

        let new_call = self.func.graph_mut().create_node(new_op.clone(), &call_args);

        debug!(
            target: TARGET,
            old = ?n,
            new = ?new_call,
            operation = %new_op.debug_string(),
            "replacing vararg node with call"
        );

        self.func.graph_mut().replace_all_uses_with(n, new_call);
        self.func.graph_mut().kill(n);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{call_data, CompiledFunction, Opcode};
    use crate::graphbuilder::GraphBuilder;
    use crate::ir::Function;

    fn build(f: std::sync::Arc<CompiledFunction>) -> Function {
        let mut function = Function::new(f);
        GraphBuilder::build_graph(&mut function);
        GenericLowering::new(&mut function).lower();
        function
    }

    #[test]
    fn test_add_lowers_to_runtime_call() {
        let mut fb = CompiledFunction::builder("addition");
        let a = fb.add_formal("a");
        let b = fb.add_formal("b");
        fb.code().emit(Opcode::LoadReg, &[(call_data::HEADER_SIZE + b) as i32]);
        fb.code().emit(Opcode::Add, &[(call_data::HEADER_SIZE + a) as i32, -1]);
        fb.code().emit(Opcode::Ret, &[]);
        let function = build(fb.build());

        let graph = function.graph();
        let ret = graph.input(graph.end_node(), 0);
        let call = graph.input(ret, 0);
        assert_eq!(graph.opcode(call), OpKind::Call);
        assert_eq!(graph.op(call).call_payload(), Some(OpKind::JsAdd));
        // engine plus the two parameters
        assert_eq!(graph.op(call).value_input_count(), 3);
        assert_eq!(graph.input(call, 0), graph.engine_node());
        for i in 1..3 {
            assert_eq!(graph.opcode(graph.input(call, i)), OpKind::Parameter);
        }
        // the original JsAdd node is dead
        let reachable = crate::ir::NodeCollector::new(graph, false, false);
        for &n in reachable.reachable() {
            assert_ne!(graph.opcode(n), OpKind::JsAdd);
        }
    }

    #[test]
    fn test_constant_arguments_get_alloca() {
        // 1 + 2: both operands are constants and Add takes them by
        // reference, so they are materialized on the JS stack
        let mut fb = CompiledFunction::builder("const_add");
        fb.code().emit(Opcode::LoadInt, &[1]);
        fb.code().emit(Opcode::StoreReg, &[call_data::HEADER_SIZE as i32]);
        fb.set_local_count(1);
        fb.code().emit(Opcode::LoadInt, &[2]);
        fb.code().emit(Opcode::Add, &[call_data::HEADER_SIZE as i32, -1]);
        fb.code().emit(Opcode::Ret, &[]);
        let function = build(fb.build());

        let graph = function.graph();
        let ret = graph.input(graph.end_node(), 0);
        let call = graph.input(ret, 0);
        assert_eq!(graph.opcode(call), OpKind::Call);
        for i in 1..3 {
            assert_eq!(graph.opcode(graph.input(call, i)), OpKind::Alloca);
        }
    }

    #[test]
    fn test_vararg_call_shape() {
        // f(x): call a name with one register argument
        let mut fb = CompiledFunction::builder("caller");
        fb.set_local_count(2);
        let name_id = fb.add_string("f") as i32;
        let arg_base = (call_data::HEADER_SIZE + 1) as i32;
        fb.code().emit(Opcode::LoadInt, &[41]);
        fb.code().emit(Opcode::StoreReg, &[arg_base]);
        fb.code().emit(Opcode::CallName, &[name_id, 1, arg_base, -1]);
        fb.code().emit(Opcode::Ret, &[]);
        let function = build(fb.build());

        let graph = function.graph();
        let ret = graph.input(graph.end_node(), 0);
        let call = graph.input(ret, 0);
        assert_eq!(graph.opcode(call), OpKind::Call);
        assert_eq!(graph.op(call).call_payload(), Some(OpKind::JsCallName));
        // engine, name, argv, argc
        assert_eq!(graph.op(call).value_input_count(), 4);
        assert_eq!(graph.input(call, 0), graph.engine_node());
        let va_seal = graph.input(call, 2);
        assert_eq!(graph.opcode(va_seal), OpKind::VaSeal);
        // the array: alloc, one store, and the alloc again as effect
        assert_eq!(graph.input_count(va_seal), 3);
        assert_eq!(graph.opcode(graph.input(va_seal, 0)), OpKind::VaAlloc);
        assert_eq!(graph.opcode(graph.input(va_seal, 1)), OpKind::VaStore);
        assert_eq!(graph.input(va_seal, 2), graph.input(va_seal, 0));
        // the effect input of the call is the seal
        let effect_index = graph.op(call).index_of_first_effect();
        assert_eq!(graph.input(call, effect_index), va_seal);
    }
}
