//! The compilation pipeline.
//!
//! Built on the sea-of-nodes concept: the graph is constructed from the
//! bytecode, runtime-callable operations are lowered to uniform calls, and
//! the scheduler flattens the graph into an ordered MI function. The
//! pipeline applies no optimizations, which makes the output independent
//! of any recorded trace data; optimizations are additions on top.
//!
//! Resumable functions (generators) are not supported.

use std::sync::Arc;

use tracing::debug;

use crate::bytecode::CompiledFunction;
use crate::graphbuilder::GraphBuilder;
use crate::ir::function::Function;
use crate::lowering::GenericLowering;
use crate::mi::MIFunction;
use crate::scheduler::NodeScheduler;

/// Compile one function to its machine-interface form, ready for the
/// assembler.
///
/// The IR function is returned along with the MI function: instructions
/// and operands refer back to graph nodes for types and payloads.
pub fn compile(source: &Arc<CompiledFunction>) -> (Function, MIFunction) {
    let mut function = Function::new(source.clone());
    debug!(target: "seajit::tracing", name = %function.name(), "compiling function");

    GraphBuilder::build_graph(&mut function);
    function.dump("initial IR");
    function.verify();

    GenericLowering::new(&mut function).lower();
    function.dump("IR after generic lowering");

    let mi = NodeScheduler::new(&mut function).build_mi_function();
    (function, mi)
}
