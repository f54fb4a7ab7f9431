//! The machine interface (MI): the post-scheduling representation the
//! assembler consumes.
//!
//! An [`MIFunction`] is an ordered vector of [`MIBlock`]s; each block holds
//! an ordered list of [`MIInstr`]s whose [`MIOperand`]s say where inputs
//! and results live. Instructions keep a reference to the IR node they
//! were created from, so type and payload queries go back to the graph.
//!
//! About stack slots: there are two stacks, the JS stack and the native
//! stack. The native frame is split into a quad-word part (64-bit values)
//! and a double-word part (32-bit values like bool and int32). The slot
//! kind records which part a value lives in, because moving it to the JS
//! stack requires boxing it correctly.

use std::collections::HashSet;

use itertools::Itertools;
use smallvec::{smallvec, SmallVec};
use tracing::debug;

use crate::bytecode::Value;
use crate::ir::function::Function;
use crate::ir::graph::Graph;
use crate::ir::node::NodeId;
use crate::ir::operation::OpKind;

pub type BlockIndex = u32;
pub const INVALID_BLOCK: BlockIndex = u32::MAX;

/// Where an instruction input or result lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MIOperand {
    /// Placeholder until the real operand is linked in.
    Invalid,
    Constant { node: NodeId },
    VirtualRegister { node: NodeId, vreg: u32 },
    EngineRegister { node: NodeId },
    CppFrameRegister { node: NodeId },
    Function { node: NodeId },
    JsStackSlot { node: NodeId, slot: u32 },
    BoolStackSlot { node: NodeId, slot: u32 },
    JumpTarget { node: NodeId, target: BlockIndex },
}

impl MIOperand {
    #[inline]
    pub fn is_valid(&self) -> bool {
        !matches!(self, MIOperand::Invalid)
    }

    #[inline]
    pub fn is_constant(&self) -> bool {
        matches!(self, MIOperand::Constant { .. })
    }

    #[inline]
    pub fn is_virtual_register(&self) -> bool {
        matches!(self, MIOperand::VirtualRegister { .. })
    }

    #[inline]
    pub fn is_stack_slot(&self) -> bool {
        matches!(
            self,
            MIOperand::JsStackSlot { .. } | MIOperand::BoolStackSlot { .. }
        )
    }

    /// The IR node this operand stands for; panics on `Invalid`.
    pub fn node(&self) -> NodeId {
        match self {
            MIOperand::Invalid => panic!("invalid operand has no node"),
            MIOperand::Constant { node }
            | MIOperand::VirtualRegister { node, .. }
            | MIOperand::EngineRegister { node }
            | MIOperand::CppFrameRegister { node }
            | MIOperand::Function { node }
            | MIOperand::JsStackSlot { node, .. }
            | MIOperand::BoolStackSlot { node, .. }
            | MIOperand::JumpTarget { node, .. } => *node,
        }
    }

    pub fn virtual_register(&self) -> u32 {
        match self {
            MIOperand::VirtualRegister { vreg, .. } => *vreg,
            _ => panic!("not a virtual register"),
        }
    }

    pub fn stack_slot(&self) -> u32 {
        match self {
            MIOperand::JsStackSlot { slot, .. } | MIOperand::BoolStackSlot { slot, .. } => *slot,
            _ => panic!("not a stack slot"),
        }
    }

    pub fn target_block(&self) -> BlockIndex {
        match self {
            MIOperand::JumpTarget { target, .. } => *target,
            _ => panic!("not a jump target"),
        }
    }

    /// The constant value of a constant operand.
    pub fn constant_value(&self, graph: &Graph) -> Value {
        let node = self.node();
        debug_assert!(self.is_constant());
        if graph.opcode(node) == OpKind::Undefined {
            return Value::Undefined;
        }
        graph
            .op(node)
            .constant_payload()
            .expect("constant operand without constant payload")
            .clone()
    }

    pub fn debug_string(&self, graph: &Graph) -> String {
        match self {
            MIOperand::Invalid => "<<INVALID>>".to_string(),
            MIOperand::Constant { .. } => self.constant_value(graph).debug_string(),
            MIOperand::VirtualRegister { vreg, .. } => format!("vreg{}", vreg),
            MIOperand::EngineRegister { .. } => "engine".to_string(),
            MIOperand::CppFrameRegister { .. } => "cppFrame".to_string(),
            MIOperand::Function { .. } => "function".to_string(),
            MIOperand::JsStackSlot { slot, .. } => format!("jsstack[{}]", slot),
            MIOperand::BoolStackSlot { slot, .. } => format!("bstack[{}]", slot),
            MIOperand::JumpTarget { target, .. } => format!("L{}", target),
        }
    }
}

/// One scheduled instruction: the IR node it represents, an optional
/// destination, and its operands. Positions are assigned when the function
/// is renumbered after scheduling.
#[derive(Debug, Clone)]
pub struct MIInstr {
    node: NodeId,
    destination: Option<MIOperand>,
    operands: SmallVec<[MIOperand; 4]>,
    position: i32,
}

impl MIInstr {
    pub fn new(node: NodeId, n_operands: usize) -> MIInstr {
        MIInstr {
            node,
            destination: None,
            operands: smallvec![MIOperand::Invalid; n_operands],
            position: -1,
        }
    }

    #[inline]
    pub fn ir_node(&self) -> NodeId {
        self.node
    }

    pub fn opcode(&self, graph: &Graph) -> OpKind {
        graph.opcode(self.node)
    }

    #[inline]
    pub fn position(&self) -> i32 {
        self.position
    }

    pub fn has_destination(&self) -> bool {
        self.destination.is_some()
    }

    pub fn destination(&self) -> Option<&MIOperand> {
        self.destination.as_ref()
    }

    pub fn set_destination(&mut self, dest: MIOperand) {
        self.destination = Some(dest);
    }

    #[inline]
    pub fn operand(&self, index: usize) -> &MIOperand {
        &self.operands[index]
    }

    pub fn set_operand(&mut self, index: usize, op: MIOperand) {
        self.operands[index] = op;
    }

    #[inline]
    pub fn operands(&self) -> &[MIOperand] {
        &self.operands
    }

    pub fn operand_count(&self) -> usize {
        self.operands.len()
    }
}

/// A linearized basic block.
pub struct MIBlock {
    instructions: Vec<MIInstr>,
    arguments: Vec<MIOperand>,
    in_edges: SmallVec<[BlockIndex; 4]>,
    out_edges: SmallVec<[BlockIndex; 2]>,
    index: BlockIndex,
    is_deopt_block: bool,
}

impl MIBlock {
    fn new(index: BlockIndex) -> MIBlock {
        MIBlock {
            instructions: Vec::new(),
            arguments: Vec::new(),
            in_edges: SmallVec::new(),
            out_edges: SmallVec::new(),
            index,
            is_deopt_block: false,
        }
    }

    #[inline]
    pub fn instructions(&self) -> &[MIInstr] {
        &self.instructions
    }

    #[inline]
    pub fn instructions_mut(&mut self) -> &mut Vec<MIInstr> {
        &mut self.instructions
    }

    pub fn first_instruction(&self) -> &MIInstr {
        self.instructions.first().expect("block has no instructions")
    }

    pub fn terminator(&self) -> &MIInstr {
        self.instructions.last().expect("block has no instructions")
    }

    pub fn terminator_mut(&mut self) -> &mut MIInstr {
        self.instructions.last_mut().expect("block has no instructions")
    }

    pub fn add_argument(&mut self, arg: MIOperand) {
        self.arguments.push(arg);
    }

    #[inline]
    pub fn arguments(&self) -> &[MIOperand] {
        &self.arguments
    }

    #[inline]
    pub fn in_edges(&self) -> &[BlockIndex] {
        &self.in_edges
    }

    pub fn add_in_edge(&mut self, edge: BlockIndex) {
        self.in_edges.push(edge);
    }

    #[inline]
    pub fn out_edges(&self) -> &[BlockIndex] {
        &self.out_edges
    }

    pub fn add_out_edge(&mut self, edge: BlockIndex) {
        self.out_edges.push(edge);
    }

    #[inline]
    pub fn index(&self) -> BlockIndex {
        self.index
    }

    #[inline]
    pub fn is_deopt_block(&self) -> bool {
        self.is_deopt_block
    }

    pub fn mark_as_deopt_block(&mut self) {
        self.is_deopt_block = true;
    }
}

/// The scheduled function: ordered blocks plus slot bookkeeping. Block 0
/// is the start block by contract.
pub struct MIFunction {
    blocks: Vec<MIBlock>,
    vreg_count: u32,
    dword_slot_count: u32,
    qword_slot_count: u32,
    js_slot_count: u32,
}

pub const START_BLOCK_INDEX: BlockIndex = 0;

impl MIFunction {
    pub fn new() -> MIFunction {
        MIFunction {
            blocks: Vec::new(),
            vreg_count: 0,
            dword_slot_count: 0,
            qword_slot_count: 0,
            js_slot_count: 0,
        }
    }

    #[inline]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    #[inline]
    pub fn block(&self, index: BlockIndex) -> &MIBlock {
        &self.blocks[index as usize]
    }

    #[inline]
    pub fn block_mut(&mut self, index: BlockIndex) -> &mut MIBlock {
        &mut self.blocks[index as usize]
    }

    #[inline]
    pub fn blocks(&self) -> &[MIBlock] {
        &self.blocks
    }

    pub fn add_block(&mut self) -> BlockIndex {
        let index = self.blocks.len() as BlockIndex;
        self.blocks.push(MIBlock::new(index));
        index
    }

    /// Move the given block to the front of the block vector.
    pub fn set_start_block(&mut self, new_start: BlockIndex) {
        let pos = self
            .blocks
            .iter()
            .position(|b| b.index == new_start)
            .expect("unknown start block");
        self.blocks.swap(0, pos);
    }

    /// Reassign dense indices following the current vector order, fixing
    /// up the stored edge indices. Returns the old-index to new-index map
    /// so callers can fix up any block references they hold.
    pub fn renumber_blocks(&mut self) -> Vec<BlockIndex> {
        let mut remap = vec![INVALID_BLOCK; self.blocks.len()];
        for (pos, b) in self.blocks.iter().enumerate() {
            remap[b.index as usize] = pos as BlockIndex;
        }
        for b in &mut self.blocks {
            b.index = remap[b.index as usize];
            for e in &mut b.in_edges {
                *e = remap[*e as usize];
            }
            for e in &mut b.out_edges {
                *e = remap[*e as usize];
            }
        }
        remap
    }

    pub fn renumber_instructions(&mut self) {
        let mut pos = 0;
        for b in &mut self.blocks {
            for instr in &mut b.instructions {
                pos += 2;
                instr.position = pos;
            }
        }
    }

    /// Reorder the block vector. Stored indices are left alone; past this
    /// point positions and indices no longer coincide.
    pub fn set_block_order(&mut self, sequence: &[BlockIndex]) {
        assert_eq!(sequence.len(), self.blocks.len());
        let mut slots: Vec<Option<MIBlock>> = self.blocks.drain(..).map(Some).collect();
        for &index in sequence {
            self.blocks.push(
                slots[index as usize]
                    .take()
                    .expect("block scheduled more than once"),
            );
        }
    }

    #[inline]
    pub fn vreg_count(&self) -> u32 {
        self.vreg_count
    }

    pub fn set_vreg_count(&mut self, vreg_count: u32) {
        self.vreg_count = vreg_count;
    }

    #[inline]
    pub fn dword_slot_count(&self) -> u32 {
        self.dword_slot_count
    }

    #[inline]
    pub fn qword_slot_count(&self) -> u32 {
        self.qword_slot_count
    }

    #[inline]
    pub fn js_slot_count(&self) -> u32 {
        self.js_slot_count
    }

    pub fn set_stack_slot_counts(&mut self, dword: u32, qword: u32, js: u32) {
        self.vreg_count = 0;
        self.dword_slot_count = dword;
        self.qword_slot_count = qword;
        self.js_slot_count = js;
    }

    /// Check edge symmetry and the start-block contract; aborts on
    /// violation. Blocks may be out of position order here (right after
    /// the start-block swap), so edges are resolved through the stored
    /// indices.
    pub fn verify_cfg(&self, graph: &Graph) {
        if self.blocks[0].first_instruction().opcode(graph) != OpKind::Start {
            panic!("block 0 is not the start block");
        }

        let mut position_of = vec![usize::MAX; self.blocks.len()];
        for (pos, b) in self.blocks.iter().enumerate() {
            position_of[b.index as usize] = pos;
        }
        let by_index = |index: BlockIndex| &self.blocks[position_of[index as usize]];

        for b in &self.blocks {
            for &in_edge in b.in_edges() {
                if !by_index(in_edge).out_edges().contains(&b.index) {
                    panic!(
                        "block {} has incoming edge from block {}, but does not appear in that \
                         block's outgoing edges",
                        b.index, in_edge
                    );
                }
            }
            for &out_edge in b.out_edges() {
                if !by_index(out_edge).in_edges().contains(&b.index) {
                    panic!(
                        "block {} has outgoing edge to block {}, but does not appear in that \
                         block's incoming edges",
                        b.index, out_edge
                    );
                }
            }
        }
    }

    /// Log the function under the `seajit::mi` target.
    pub fn dump(&self, func: &Function, description: &str) {
        if !tracing::enabled!(target: "seajit::mi", tracing::Level::DEBUG) {
            return;
        }
        let graph = func.graph();
        debug!(target: "seajit::mi", "{}:", description);
        debug!(target: "seajit::mi", "function {} {{", func.name());
        for b in &self.blocks {
            let args = if b.arguments.is_empty() {
                String::new()
            } else {
                format!("({})", b.arguments.iter().map(|a| a.debug_string(graph)).join(", "))
            };
            let preds = if b.in_edges.is_empty() {
                "<none>".to_string()
            } else {
                b.in_edges.iter().map(|e| format!("L{}", e)).join(", ")
            };
            debug!(target: "seajit::mi", "L{}{}:    ; preds: {}", b.index, args, preds);
            for instr in &b.instructions {
                let mut line = format!("{:6}: ", instr.position());
                if let Some(dest) = instr.destination() {
                    line += &format!("{} = ", dest.debug_string(graph));
                }
                line += &graph.op(instr.ir_node()).debug_string();
                line += &instr
                    .operands()
                    .iter()
                    .map(|op| format!(" {}", op.debug_string(graph)))
                    .join(",");
                line += &format!("    ; node-id: {}", instr.ir_node().index());
                if graph.op(instr.ir_node()).needs_bytecode_offsets() {
                    if let Some(info) = func.node_info(instr.ir_node()) {
                        line += &format!(", bytecode-offset: {}", info.current_instruction_offset());
                    }
                }
                debug!(target: "seajit::mi", "{}", line);
            }
            let succs = if b.out_edges.is_empty() {
                "<none>".to_string()
            } else {
                b.out_edges.iter().map(|e| format!("L{}", e)).join(", ")
            };
            debug!(target: "seajit::mi", "      ; succs: {}", succs);
        }
        debug!(target: "seajit::mi", "}}");
    }
}

impl Default for MIFunction {
    fn default() -> MIFunction {
        MIFunction::new()
    }
}

/// A set of blocks, small-vector backed until it grows past a handful of
/// entries.
pub struct MIBlockSet {
    small: SmallVec<[BlockIndex; 8]>,
    large: Option<HashSet<BlockIndex>>,
}

const MAX_VECTOR_CAPACITY: usize = 8;

impl MIBlockSet {
    pub fn new() -> MIBlockSet {
        MIBlockSet {
            small: SmallVec::new(),
            large: None,
        }
    }

    pub fn insert(&mut self, block: BlockIndex) {
        if let Some(large) = &mut self.large {
            large.insert(block);
            return;
        }
        if self.small.contains(&block) {
            return;
        }
        if self.small.len() == MAX_VECTOR_CAPACITY {
            let mut large: HashSet<BlockIndex> = self.small.drain(..).collect();
            large.insert(block);
            self.large = Some(large);
        } else {
            self.small.push(block);
        }
    }

    pub fn remove(&mut self, block: BlockIndex) {
        if let Some(large) = &mut self.large {
            large.remove(&block);
            return;
        }
        if let Some(pos) = self.small.iter().position(|&b| b == block) {
            self.small.remove(pos);
        }
    }

    pub fn contains(&self, block: BlockIndex) -> bool {
        match &self.large {
            Some(large) => large.contains(&block),
            None => self.small.contains(&block),
        }
    }

    pub fn is_empty(&self) -> bool {
        match &self.large {
            Some(large) => large.is_empty(),
            None => self.small.is_empty(),
        }
    }

    pub fn iter(&self) -> Box<dyn Iterator<Item = BlockIndex> + '_> {
        match &self.large {
            Some(large) => Box::new(large.iter().copied()),
            None => Box::new(self.small.iter().copied()),
        }
    }
}

impl Default for MIBlockSet {
    fn default() -> MIBlockSet {
        MIBlockSet::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_set_small_and_large() {
        let mut set = MIBlockSet::new();
        for i in 0..8 {
            set.insert(i);
        }
        assert!(set.large.is_none());
        set.insert(3); // duplicate, still small
        assert!(set.large.is_none());
        set.insert(100); // spills
        assert!(set.large.is_some());
        for i in 0..8 {
            assert!(set.contains(i));
        }
        assert!(set.contains(100));
        set.remove(100);
        assert!(!set.contains(100));
    }

    #[test]
    fn test_renumber_blocks_remaps_edges() {
        let mut f = MIFunction::new();
        let a = f.add_block();
        let b = f.add_block();
        f.block_mut(a).add_out_edge(b);
        f.block_mut(b).add_in_edge(a);

        // swap the order, then renumber
        f.set_start_block(b);
        f.renumber_blocks();
        // b is now index 0, a index 1, and the edge follows
        assert_eq!(f.block(1).out_edges(), &[0]);
        assert_eq!(f.block(0).in_edges(), &[1]);
    }

    #[test]
    fn test_set_block_order() {
        let mut f = MIFunction::new();
        let a = f.add_block();
        let b = f.add_block();
        let c = f.add_block();
        f.set_block_order(&[a, c, b]);
        assert_eq!(f.blocks()[0].index(), a);
        assert_eq!(f.blocks()[1].index(), c);
        assert_eq!(f.blocks()[2].index(), b);
    }

    #[test]
    fn test_renumber_instructions() {
        let mut f = MIFunction::new();
        let a = f.add_block();
        f.block_mut(a).instructions_mut().push(MIInstr::new(NodeId(0), 0));
        f.block_mut(a).instructions_mut().push(MIInstr::new(NodeId(1), 1));
        f.renumber_instructions();
        assert_eq!(f.block(a).instructions()[0].position(), 2);
        assert_eq!(f.block(a).instructions()[1].position(), 4);
    }
}
