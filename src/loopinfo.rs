//! Loop detection on the MI control flow graph.
//!
//! Detecting loops on the CFG is more reliable than trusting statement
//! structure: a `while (true) { if (c) break; else break; }` has a
//! loop-like statement but no loop. A back-edge is an incoming edge whose
//! source is dominated by its target; a block with back-edges is a loop
//! header.
//!
//! Blocks are visited in an order that sees every block after all blocks
//! it dominates. Inner loops are therefore identified before the loops
//! containing them, which makes nesting detection a matter of walking to
//! the outermost already-discovered loop. Two back-edges into the same
//! header form one loop, not two.

use itertools::Itertools;
use tracing::debug;

use crate::domtree::DominatorTree;
use crate::mi::{BlockIndex, MIFunction};

#[derive(Default, Clone)]
struct BlockInfo {
    /// Header of the innermost loop containing this block, if any.
    loop_header: Option<BlockIndex>,
    is_loop_header: bool,
    loop_exits: Vec<BlockIndex>,
}

pub struct LoopInfo {
    block_infos: Vec<BlockInfo>,
}

impl LoopInfo {
    pub fn new(function: &MIFunction, dom_tree: &DominatorTree) -> LoopInfo {
        let mut info = LoopInfo {
            block_infos: vec![BlockInfo::default(); function.block_count()],
        };
        info.detect_loops(function, dom_tree);
        info
    }

    /// Header of the innermost loop containing `block`. A header is not
    /// contained in its own loop; nested headers answer with their parent
    /// loop.
    pub fn loop_header_for(&self, block: BlockIndex) -> Option<BlockIndex> {
        self.block_infos[block as usize].loop_header
    }

    pub fn is_loop_header(&self, block: BlockIndex) -> bool {
        self.block_infos[block as usize].is_loop_header
    }

    pub fn loop_exits_for_loop(&self, loop_header: BlockIndex) -> &[BlockIndex] {
        &self.block_infos[loop_header as usize].loop_exits
    }

    fn detect_loops(&mut self, function: &MIFunction, dom_tree: &DominatorTree) {
        let mut backedges: Vec<BlockIndex> = Vec::with_capacity(4);

        let order = dom_tree.calculate_df_node_iter_order(function);
        for &block in &order {
            if function.block(block).is_deopt_block() {
                continue;
            }

            backedges.clear();
            for &pred in function.block(block).in_edges() {
                if block == pred || dom_tree.dominates(block, pred) {
                    backedges.push(pred);
                }
            }

            if !backedges.is_empty() {
                self.sub_loop(function, block, &backedges);
            }
        }

        self.collect_loop_exits(function);

        self.dump();
    }

    fn sub_loop(&mut self, function: &MIFunction, loop_head: BlockIndex, backedges: &[BlockIndex]) {
        self.block_infos[loop_head as usize].is_loop_header = true;

        let mut worklist: Vec<BlockIndex> = backedges.to_vec();
        while let Some(mut pred) = worklist.pop() {
            match self.block_infos[pred as usize].loop_header {
                Some(mut subloop) => {
                    // an already discovered block; find its outermost
                    // discovered loop
                    while let Some(parent) = self.block_infos[subloop as usize].loop_header {
                        subloop = parent;
                    }

                    if subloop == loop_head {
                        continue;
                    }

                    // a subloop of this loop
                    self.block_infos[subloop as usize].loop_header = Some(loop_head);
                    pred = subloop;

                    // continue with the subloop header's predecessors that
                    // are not inside the subloop; they may be in other
                    // loops, which then also become subloops of this one
                    for &pred_in in function.block(pred).in_edges() {
                        if self.block_infos[pred_in as usize].loop_header != Some(subloop) {
                            worklist.push(pred_in);
                        }
                    }
                }
                None => {
                    if pred == loop_head {
                        continue;
                    }

                    // an undiscovered block; map it to this loop
                    self.block_infos[pred as usize].loop_header = Some(loop_head);

                    for &pred_in in function.block(pred).in_edges() {
                        worklist.push(pred_in);
                    }
                }
            }
        }
    }

    fn collect_loop_exits(&mut self, function: &MIFunction) {
        for i in 0..self.block_infos.len() {
            let block = i as BlockIndex;
            if self.block_infos[i].is_loop_header {
                for &out in function.block(block).out_edges() {
                    if out != block && !self.in_loop_or_sub_loop(out, block) {
                        self.block_infos[i].loop_exits.push(out);
                    }
                }
            }
            if let Some(containing) = self.block_infos[i].loop_header {
                for &out in function.block(block).out_edges() {
                    if out != containing && !self.in_loop_or_sub_loop(out, containing) {
                        self.block_infos[containing as usize].loop_exits.push(out);
                    }
                }
            }
        }
    }

    fn in_loop_or_sub_loop(&self, block: BlockIndex, loop_header: BlockIndex) -> bool {
        let Some(header_for_block) = self.block_infos[block as usize].loop_header else {
            return false; // block is not in any loop
        };

        let mut header = Some(loop_header);
        while let Some(h) = header {
            if h == header_for_block {
                return true;
            }
            // look into the parent loop
            header = self.block_infos[h as usize].loop_header;
        }
        false
    }

    fn dump(&self) {
        if !tracing::enabled!(target: "seajit::loopinfo", tracing::Level::DEBUG) {
            return;
        }
        debug!(target: "seajit::loopinfo", "loop information:");
        for (i, bi) in self.block_infos.iter().enumerate() {
            let header = match bi.loop_header {
                Some(h) => h.to_string(),
                None => "<none>".to_string(),
            };
            let mut line = format!(
                "    {} : is loop header: {}, contained in loop header's loop: {}",
                i,
                if bi.is_loop_header { "yes" } else { "no" },
                header
            );
            if bi.is_loop_header {
                let exits = if bi.loop_exits.is_empty() {
                    "<none>".to_string()
                } else {
                    bi.loop_exits.iter().map(|e| e.to_string()).join(", ")
                };
                line += &format!(", loop exits: {}", exits);
            }
            debug!(target: "seajit::loopinfo", "{}", line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mi::MIFunction;

    fn cfg(block_count: usize, edges: &[(BlockIndex, BlockIndex)]) -> MIFunction {
        let mut f = MIFunction::new();
        for _ in 0..block_count {
            f.add_block();
        }
        for &(from, to) in edges {
            f.block_mut(from).add_out_edge(to);
            f.block_mut(to).add_in_edge(from);
        }
        f
    }

    #[test]
    fn test_simple_loop() {
        // 0 -> 1 -> 2 -> 1, 1 -> 3
        let f = cfg(4, &[(0, 1), (1, 2), (2, 1), (1, 3)]);
        let dt = DominatorTree::new(&f);
        let li = LoopInfo::new(&f, &dt);

        assert!(li.is_loop_header(1));
        assert!(!li.is_loop_header(0));
        assert!(!li.is_loop_header(2));
        assert_eq!(li.loop_header_for(2), Some(1));
        assert_eq!(li.loop_header_for(0), None);
        assert_eq!(li.loop_header_for(3), None);
        assert_eq!(li.loop_exits_for_loop(1), &[3]);
    }

    #[test]
    fn test_nested_loops() {
        // outer: 1..4, inner: 2..3
        // 0 -> 1 -> 2 -> 3 -> 2 (inner back edge), 3 -> 4 -> 1 (outer), 4 -> 5
        let f = cfg(6, &[(0, 1), (1, 2), (2, 3), (3, 2), (3, 4), (4, 1), (4, 5)]);
        let dt = DominatorTree::new(&f);
        let li = LoopInfo::new(&f, &dt);

        assert!(li.is_loop_header(1));
        assert!(li.is_loop_header(2));
        // the inner header's containing loop is the outer loop
        assert_eq!(li.loop_header_for(2), Some(1));
        assert_eq!(li.loop_header_for(3), Some(2));
        assert_eq!(li.loop_header_for(4), Some(1));
        assert_eq!(li.loop_exits_for_loop(1), &[5]);
    }

    #[test]
    fn test_two_backedges_one_loop() {
        // two `continue` paths: 1 is the single header for both back edges
        // 0 -> 1 -> 2; 2 -> 3 -> 1; 2 -> 4 -> 1; 1 -> 5
        let f = cfg(6, &[(0, 1), (1, 2), (2, 3), (3, 1), (2, 4), (4, 1), (1, 5)]);
        let dt = DominatorTree::new(&f);
        let li = LoopInfo::new(&f, &dt);

        let headers: Vec<_> = (0..6).filter(|&b| li.is_loop_header(b)).collect();
        assert_eq!(headers, vec![1]);
        for b in [2, 3, 4] {
            assert_eq!(li.loop_header_for(b), Some(1));
        }
        assert_eq!(li.loop_exits_for_loop(1), &[5]);
    }
}
