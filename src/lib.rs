//! seajit - a tracing-JIT compiler front-end and mid-end for a stack-based
//! JavaScript bytecode interpreter.
//!
//! The compiler is organized around a sea-of-nodes intermediate
//! representation: every computation is a node, connected by value, effect
//! and control edges, with no basic-block structure until scheduling.
//!
//! # Pipeline
//!
//! 1. **Graph construction** (`graphbuilder`) - walk the bytecode like an
//!    abstract interpreter, producing an SSA graph with phi insertion at
//!    merges, exception-edge splitting and frame-state snapshots.
//! 2. **Generic lowering** (`lowering`) - rewrite runtime-callable
//!    operations into uniform `Call` nodes with explicit engine, function
//!    and frame arguments, materializing vararg value arrays.
//! 3. **Node scheduling** (`scheduler`) - build the control flow graph,
//!    compute dominators (`domtree`) and loops (`loopinfo`), place every
//!    node with the schedule-early/schedule-late algorithm (hoisting out
//!    of loops where legal), and sequence the nodes inside each block.
//! 4. **Block scheduling** (`blockscheduler`) - lay the blocks out with
//!    loop bodies contiguous, exception handlers late and deoptimization
//!    blocks last.
//!
//! The result is an [`mi::MIFunction`]: ordered blocks of instructions
//! with virtual-register and stack-slot operands, consumed by a downstream
//! assembler.
//!
//! # Example
//!
//! ```
//! use seajit::bytecode::{call_data, CompiledFunction, Opcode};
//!
//! // function f(a, b) { return a + b; }
//! let mut fb = CompiledFunction::builder("f");
//! let a = fb.add_formal("a");
//! let b = fb.add_formal("b");
//! fb.code().emit(Opcode::LoadReg, &[(call_data::HEADER_SIZE + b) as i32]);
//! fb.code().emit(Opcode::Add, &[(call_data::HEADER_SIZE + a) as i32, -1]);
//! fb.code().emit(Opcode::Ret, &[]);
//!
//! let (_ir, mi) = seajit::compile(&fb.build());
//! assert!(mi.block_count() >= 1);
//! ```
//!
//! Compilation is strictly single-threaded per function; compiling
//! different functions from different threads is fine. Invariant
//! violations and unsupported input (resumable functions) abort with a
//! panic; there is no partial-compilation recovery.

pub mod blockscheduler;
pub mod bytecode;
pub mod domtree;
pub mod graphbuilder;
pub mod ir;
pub mod jit;
pub mod loopinfo;
pub mod lowering;
pub mod mi;
pub mod runtime;
pub mod scheduler;

pub use bytecode::{ChunkBuilder, CompiledFunction, FunctionBuilder, Opcode, Value};
pub use ir::{Function, Graph, NodeId, OpKind, Type};
pub use jit::compile;
pub use mi::{MIBlock, MIFunction, MIInstr, MIOperand};

#[cfg(test)]
mod tests {
    use super::*;
    use bytecode::call_data;

    #[test]
    fn test_compile_empty_function() {
        let mut fb = CompiledFunction::builder("empty");
        fb.code().emit(Opcode::LoadUndefined, &[]);
        fb.code().emit(Opcode::Ret, &[]);
        let (_ir, mi) = compile(&fb.build());
        assert!(mi.block_count() >= 1);
        assert_eq!(mi.vreg_count(), 0);
    }

    #[test]
    fn test_compile_addition() {
        let mut fb = CompiledFunction::builder("add");
        let a = fb.add_formal("a");
        let b = fb.add_formal("b");
        fb.code().emit(Opcode::LoadReg, &[(call_data::HEADER_SIZE + b) as i32]);
        fb.code().emit(Opcode::Add, &[(call_data::HEADER_SIZE + a) as i32, -1]);
        fb.code().emit(Opcode::Ret, &[]);
        let (ir, mi) = compile(&fb.build());
        assert!(mi.block_count() >= 1);
        // the lowered call produced a value into a vreg
        assert!(mi.vreg_count() > 0);
        // and the call's destination resolves back through the graph
        let call_instr = mi
            .blocks()
            .iter()
            .flat_map(|b| b.instructions())
            .find(|i| i.opcode(ir.graph()) == crate::ir::OpKind::Call)
            .expect("no call scheduled");
        assert!(call_instr.destination().unwrap().is_virtual_register());
    }
}
