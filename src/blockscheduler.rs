//! Block layout: order the MI blocks for code emission.
//!
//! High-level algorithm:
//!  1. emit the start block
//!  2. postpone its outgoing edges that were not emitted yet; exception
//!     successors are postponed first so they end up visited last
//!  3. pick the next candidate from the current group's postponed stack; a
//!     candidate is only emittable when every non-back-edge, non-deopt
//!     predecessor was emitted. Otherwise it is dropped here and another
//!     predecessor's postpone will surface it again
//!  4. a candidate that is a loop header opens a new group; the previous
//!     group is resumed once the loop's group drains, which keeps all
//!     blocks of a loop (and of nested loops) contiguous
//!  5. when everything drains, the deoptimization blocks go to the end in
//!     their original order
//!
//! Postponing places a successor into the group of its loop header, or
//! into an enclosing group when the edge leaves the current loop (a
//! labeled break or continue). Keeping each loop's blocks together gives
//! the register allocator short lifetimes with few holes, and if-then-else
//! diamonds stay together for the same reason.

use std::collections::HashMap;

use smallvec::SmallVec;
use tracing::debug;

use crate::domtree::DominatorTree;
use crate::ir::graph::Graph;
use crate::ir::operation::OpKind;
use crate::loopinfo::LoopInfo;
use crate::mi::{BlockIndex, MIFunction};

struct WorkForGroup {
    /// The loop header owning this group; `None` for the function-level
    /// group.
    group: Option<BlockIndex>,
    postponed: Vec<BlockIndex>,
}

impl WorkForGroup {
    fn new(group: Option<BlockIndex>) -> WorkForGroup {
        WorkForGroup {
            group,
            postponed: Vec::new(),
        }
    }
}

pub struct BlockScheduler<'a> {
    function: &'a MIFunction,
    graph: &'a Graph,
    dominator_tree: &'a DominatorTree,
    loop_info: &'a LoopInfo,
    current_group: WorkForGroup,
    postponed_groups: Vec<WorkForGroup>,
    sequence: Vec<BlockIndex>,
    emitted: Vec<bool>,
    loops_start_end: HashMap<BlockIndex, BlockIndex>,
}

impl<'a> BlockScheduler<'a> {
    pub fn new(
        function: &'a MIFunction,
        graph: &'a Graph,
        dominator_tree: &'a DominatorTree,
        loop_info: &'a LoopInfo,
    ) -> BlockScheduler<'a> {
        let mut scheduler = BlockScheduler {
            function,
            graph,
            dominator_tree,
            loop_info,
            current_group: WorkForGroup::new(None),
            postponed_groups: Vec::new(),
            sequence: Vec::new(),
            emitted: vec![false; function.block_count()],
            loops_start_end: HashMap::new(),
        };

        scheduler.schedule(function.blocks()[0].index());

        scheduler.dump();

        if function.block_count() != scheduler.sequence.len() {
            // Usually caused by an execution path that skips an unwind
            // handler reset: an exception after that point jumps back to
            // the handler, creating a loop with two entry points.
            panic!(
                "the block scheduler did not schedule all blocks ({} of {}); this is most \
                 likely caused by a non-natural loop",
                scheduler.sequence.len(),
                function.block_count()
            );
        }

        scheduler
    }

    pub fn scheduled_block_sequence(&self) -> &[BlockIndex] {
        &self.sequence
    }

    pub fn loop_ends_by_start_block(&self) -> &HashMap<BlockIndex, BlockIndex> {
        &self.loops_start_end
    }

    fn check_candidate(&mut self, candidate: BlockIndex) -> bool {
        debug_assert_eq!(
            self.loop_info.loop_header_for(candidate),
            self.current_group.group
        );

        for &pred in self.function.block(candidate).in_edges() {
            if self.function.block(pred).is_deopt_block() {
                continue;
            }

            if self.emitted[pred as usize] {
                continue;
            }

            if self.dominator_tree.dominates(candidate, pred) {
                // the jump back to the top of a loop
                continue;
            }

            if pred == candidate {
                // a very tight loop: L1: ...; goto L1. Can appear when
                // basic-block merging removed an empty body block; the
                // block is schedulable once all other incoming edges are
                // back edges or emitted.
                continue;
            }

            return false; // an unemitted incoming edge that is no back edge
        }

        if self.loop_info.is_loop_header(candidate) {
            // postpone everything else and lay out the loop first
            let opened = WorkForGroup::new(Some(candidate));
            let previous = std::mem::replace(&mut self.current_group, opened);
            self.postponed_groups.push(previous);
        }

        true
    }

    fn pick_next(&mut self) -> Option<BlockIndex> {
        loop {
            while self.current_group.postponed.is_empty() {
                let resumed = self.postponed_groups.pop()?;
                if let Some(group) = self.current_group.group {
                    // record where the drained loop ends
                    self.loops_start_end
                        .insert(group, *self.sequence.last().unwrap());
                }
                self.current_group = resumed;
            }

            let next = self.current_group.postponed.pop().unwrap();
            if self.check_candidate(next) {
                return Some(next);
            }
        }
    }

    fn emit_block(&mut self, block: BlockIndex) {
        if self.emitted[block as usize] {
            return;
        }
        self.sequence.push(block);
        self.emitted[block as usize] = true;
    }

    fn schedule(&mut self, function_entry_point: BlockIndex) {
        let mut next = Some(function_entry_point);

        while let Some(block) = next {
            self.emit_block(block);

            // postpone the outgoing edges; exception targets first, so
            // they are taken from the stack last
            let mut non_exception_edges: SmallVec<[BlockIndex; 32]> = SmallVec::new();
            for &out in self.function.block(block).out_edges().iter().rev() {
                if self.emitted[out as usize] {
                    continue;
                }
                let first = self.function.block(out).first_instruction().ir_node();
                if self.graph.opcode(first) == OpKind::OnException {
                    self.postpone(out);
                } else {
                    non_exception_edges.push(out);
                }
            }
            for &edge in &non_exception_edges {
                self.postpone(edge);
            }

            next = self.pick_next();
        }

        // finally lay out all deoptimization blocks at the end
        for block in self.function.blocks() {
            if block.is_deopt_block() {
                self.emit_block(block.index());
            }
        }
    }

    fn postpone(&mut self, block: BlockIndex) {
        let header = self.loop_info.loop_header_for(block);

        if self.current_group.group == header {
            self.current_group.postponed.push(block);
            return;
        }

        for group in self.postponed_groups.iter_mut().rev() {
            if group.group == header {
                group.postponed.push(block);
                return;
            }
        }

        panic!("block {} postponed outside any enclosing loop group", block);
    }

    fn dump(&self) {
        if !tracing::enabled!(target: "seajit::blockscheduler", tracing::Level::DEBUG) {
            return;
        }
        debug!(target: "seajit::blockscheduler", "scheduled blocks:");
        for &block in &self.sequence {
            let mut line = format!("    L{}", block);
            if let Some(loop_end) = self.loops_start_end.get(&block) {
                line += &format!(", loop start, ends at L{}", loop_end);
            }
            debug!(target: "seajit::blockscheduler", "{}", line);
        }
    }
}
