//! Bytecode front: opcodes, compiled-function containers and the handler
//! interface the graph builder is driven through.

pub mod chunk;
pub mod handler;
pub mod opcodes;

pub use chunk::{BytecodeChunk, ChunkBuilder, ClassInfo, CompiledFunction, FunctionBuilder, Value};
pub use handler::{dispatch, ByteCodeHandler, Verdict};
pub use opcodes::Opcode;

/// Frame slot conventions of the interpreter's call data.
///
/// The first `HEADER_SIZE` interpreter registers hold the call header;
/// formal parameters follow, locals after that.
pub mod call_data {
    pub const FUNCTION: usize = 0;
    pub const CONTEXT: usize = 1;
    pub const ACCUMULATOR: usize = 2;
    pub const THIS: usize = 3;
    pub const NEW_TARGET: usize = 4;
    pub const ARGC: usize = 5;
    pub const HEADER_SIZE: usize = 6;
}
