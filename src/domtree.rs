//! Dominator tree over the MI control flow graph, computed with the
//! Lengauer-Tarjan algorithm (with path compression), plus dominance
//! frontiers.

use std::collections::HashMap;

use tracing::debug;

use crate::mi::{BlockIndex, MIBlockSet, MIFunction, INVALID_BLOCK};

/// Transient state of the Lengauer-Tarjan run; dropped once the immediate
/// dominators are known.
struct Data {
    dfnum: Vec<u32>,
    vertex: Vec<BlockIndex>,
    parent: Vec<BlockIndex>,
    ancestor: Vec<BlockIndex>,
    best: Vec<BlockIndex>,
    semi: Vec<BlockIndex>,
    samedom: Vec<BlockIndex>,
    size: usize,
}

pub struct DominatorTree {
    idom: Vec<BlockIndex>,
}

impl DominatorTree {
    pub fn new(function: &MIFunction) -> DominatorTree {
        let mut tree = DominatorTree { idom: Vec::new() };
        tree.calculate_idoms(function);
        tree
    }

    pub fn immediate_dominator(&self, block: BlockIndex) -> BlockIndex {
        self.idom[block as usize]
    }

    /// Strict dominance: a block never dominates itself.
    pub fn dominates(&self, dominator: BlockIndex, dominated: BlockIndex) -> bool {
        // dominator can be invalid when the dominated block has no
        // dominator, i.e. the start block
        debug_assert_ne!(dominated, INVALID_BLOCK);

        if dominator == dominated {
            return false;
        }

        let mut it = self.idom[dominated as usize];
        while it != INVALID_BLOCK {
            if it == dominator {
                return true;
            }
            it = self.idom[it as usize];
        }
        false
    }

    pub fn inside_same_dominator_chain(&self, one: BlockIndex, other: BlockIndex) -> bool {
        one == other || self.dominates(one, other) || self.dominates(other, one)
    }

    /// Iteration order over the dominator tree with every block sorted
    /// after the blocks it dominates.
    ///
    /// This is not a true pre-/post-order: blocks are sorted by decreasing
    /// tree depth, which has the same "children before parents" property
    /// without materializing the tree. The order of blocks on one depth is
    /// unspecified.
    pub fn calculate_df_node_iter_order(&self, function: &MIFunction) -> Vec<BlockIndex> {
        let depths = self.calculate_node_depths(function);
        let mut order: Vec<BlockIndex> = function.blocks().iter().map(|b| b.index()).collect();
        order.sort_by(|&a, &b| depths[b as usize].cmp(&depths[a as usize]));
        order
    }

    /// Depth of every block in the dominator tree. The start block and
    /// unreachable blocks are at depth 0.
    pub fn calculate_node_depths(&self, function: &MIFunction) -> Vec<i32> {
        let mut depths = vec![-1i32; function.block_count()];
        for b in function.blocks() {
            let index = b.index() as usize;
            if depths[index] != -1 {
                continue;
            }
            let idom = self.idom[index];
            if idom == INVALID_BLOCK {
                depths[index] = 0;
            } else {
                let mut idom_depth = depths[idom as usize];
                if idom_depth == -1 {
                    idom_depth = self.calculate_node_depth(idom, &mut depths);
                }
                depths[index] = idom_depth + 1;
            }
        }
        depths
    }

    // Walk the dominator chain up to the first block with a known depth,
    // stacking the unknown ones, then assign depths on the way back down.
    // Each block is computed once, so the whole run stays linear.
    fn calculate_node_depth(&self, mut block: BlockIndex, depths: &mut [i32]) -> i32 {
        let mut worklist = Vec::with_capacity(8);
        let mut depth = -1;

        while depth == -1 {
            worklist.push(block);
            block = self.idom[block as usize];
            depth = depths[block as usize];
        }

        for &b in worklist.iter().rev() {
            depth += 1;
            depths[b as usize] = depth;
        }

        depth
    }

    fn dfs(data: &mut Data, function: &MIFunction, node: BlockIndex) {
        struct Todo {
            node: BlockIndex,
            parent: BlockIndex,
        }

        let mut worklist: Vec<Todo> = Vec::with_capacity(function.block_count() / 2 + 1);
        let mut todo = Todo { node, parent: INVALID_BLOCK };

        loop {
            let n = todo.node;

            if data.dfnum[n as usize] == 0 {
                data.dfnum[n as usize] = data.size as u32;
                data.vertex[data.size] = n;
                data.parent[n as usize] = todo.parent;
                data.size += 1;

                let out = function.block(n).out_edges();
                for &succ in out.iter().skip(1).rev() {
                    worklist.push(Todo { node: succ, parent: n });
                }

                if let Some(&first) = out.first() {
                    todo = Todo { node: first, parent: n };
                    continue;
                }
            }

            match worklist.pop() {
                Some(next) => todo = next,
                None => break,
            }
        }
    }

    fn link(data: &mut Data, p: BlockIndex, n: BlockIndex) {
        data.ancestor[n as usize] = p;
        data.best[n as usize] = n;
    }

    fn calculate_idoms(&mut self, function: &MIFunction) {
        assert!(
            function.block(0).in_edges().is_empty(),
            "the start block must have no predecessors"
        );

        let block_count = function.block_count();
        let mut data = Data {
            dfnum: vec![0; block_count],
            vertex: vec![INVALID_BLOCK; block_count],
            parent: vec![INVALID_BLOCK; block_count],
            ancestor: vec![INVALID_BLOCK; block_count],
            best: vec![INVALID_BLOCK; block_count],
            semi: vec![INVALID_BLOCK; block_count],
            samedom: vec![INVALID_BLOCK; block_count],
            size: 0,
        };
        self.idom = vec![INVALID_BLOCK; block_count];

        let mut bucket: HashMap<BlockIndex, Vec<BlockIndex>> = HashMap::new();

        Self::dfs(&mut data, function, function.block(0).index());

        let mut worklist: Vec<BlockIndex> = Vec::with_capacity(block_count / 2 + 1);

        for i in (1..data.size).rev() {
            let n = data.vertex[i];
            let p = data.parent[n as usize];
            let mut s = p;

            for &in_edge in function.block(n).in_edges() {
                // deoptimization blocks are laid out later and must not
                // influence the tree
                if function.block(in_edge).is_deopt_block() {
                    continue;
                }
                let v = in_edge;
                let ss = if data.dfnum[v as usize] <= data.dfnum[n as usize] {
                    v
                } else {
                    let anc = Self::ancestor_with_lowest_semi(&mut data, v, &mut worklist);
                    data.semi[anc as usize]
                };
                if data.dfnum[ss as usize] < data.dfnum[s as usize] {
                    s = ss;
                }
            }
            data.semi[n as usize] = s;
            bucket.entry(s).or_default().push(n);
            Self::link(&mut data, p, n);
            if let Some(entries) = bucket.remove(&p) {
                for v in entries {
                    let y = Self::ancestor_with_lowest_semi(&mut data, v, &mut worklist);
                    let semi_v = data.semi[v as usize];
                    if data.semi[y as usize] == semi_v {
                        self.idom[v as usize] = semi_v;
                    } else {
                        data.samedom[v as usize] = y;
                    }
                }
            }
        }

        for i in 1..data.size {
            let n = data.vertex[i];
            debug_assert_ne!(n, INVALID_BLOCK);
            debug_assert_ne!(data.ancestor[n as usize], INVALID_BLOCK);
            let sdn = data.samedom[n as usize];
            if sdn != INVALID_BLOCK {
                self.idom[n as usize] = self.idom[sdn as usize];
            }
        }

        if tracing::enabled!(target: "seajit::domtree", tracing::Level::DEBUG) {
            self.dump_immediate_dominators(function);
        }
    }

    fn ancestor_with_lowest_semi(
        data: &mut Data,
        v: BlockIndex,
        worklist: &mut Vec<BlockIndex>,
    ) -> BlockIndex {
        worklist.clear();
        let mut it = v;
        while it != INVALID_BLOCK {
            worklist.push(it);
            it = data.ancestor[it as usize];
        }

        if worklist.len() < 2 {
            return data.best[v as usize];
        }

        let mut b = INVALID_BLOCK;
        let last = *worklist.last().unwrap();
        for &block in worklist[..worklist.len() - 1].iter().rev() {
            data.ancestor[block as usize] = last;
            let best_it = data.best[block as usize];
            if b != INVALID_BLOCK
                && data.dfnum[data.semi[b as usize] as usize]
                    < data.dfnum[data.semi[best_it as usize] as usize]
            {
                data.best[block as usize] = b;
            } else {
                b = best_it;
            }
        }
        b
    }

    fn dump_immediate_dominators(&self, function: &MIFunction) {
        debug!(target: "seajit::domtree", "immediate dominators:");
        for to in function.blocks() {
            let from = self.idom[to.index() as usize];
            if from != INVALID_BLOCK {
                debug!(target: "seajit::domtree", "        {} dominates {}", from, to.index());
            } else {
                debug!(target: "seajit::domtree", "   (none) dominates {}", to.index());
            }
        }
    }
}

/// Dominance frontiers: `DF(n)` is the set of blocks `y` such that `n`
/// dominates a predecessor of `y` but not strictly `y` itself.
pub struct DominatorFrontier {
    df: Vec<MIBlockSet>,
}

impl DominatorFrontier {
    pub fn new(function: &MIFunction, dom_tree: &DominatorTree) -> DominatorFrontier {
        let mut frontier = DominatorFrontier { df: Vec::new() };
        frontier.compute(function, dom_tree);
        frontier
    }

    pub fn frontier(&self, block: BlockIndex) -> &MIBlockSet {
        &self.df[block as usize]
    }

    fn compute(&mut self, function: &MIFunction, dom_tree: &DominatorTree) {
        struct NodeProgress {
            children: Vec<BlockIndex>,
            todo: Vec<BlockIndex>,
        }

        let block_count = function.block_count();
        self.df = (0..block_count).map(|_| MIBlockSet::new()).collect();

        // children of each node in the dominator tree
        let mut children: Vec<Vec<BlockIndex>> = vec![Vec::new(); block_count];
        for b in function.blocks() {
            let idom = dom_tree.immediate_dominator(b.index());
            if idom == INVALID_BLOCK {
                continue; // nothing dominates the start block
            }
            children[idom as usize].push(b.index());
        }

        let mut node_status: Vec<NodeProgress> = (0..block_count)
            .map(|i| NodeProgress {
                children: children[i].clone(),
                todo: children[i].clone(),
            })
            .collect();
        let mut worklist: Vec<BlockIndex> = function.blocks().iter().map(|b| b.index()).collect();
        let mut df_done = vec![false; block_count];

        while let Some(&node) = worklist.last() {
            if df_done[node as usize] {
                worklist.pop();
                continue;
            }

            // process the children first
            let np = &mut node_status[node as usize];
            let mut descend = false;
            while let Some(&child) = np.todo.first() {
                if df_done[child as usize] {
                    np.todo.remove(0);
                } else {
                    worklist.push(child);
                    descend = true;
                    break;
                }
            }
            if descend {
                continue;
            }

            let mut set = MIBlockSet::new();
            for &succ in function.block(node).out_edges() {
                if dom_tree.immediate_dominator(succ) != node {
                    set.insert(succ);
                }
            }
            for &child in &node_status[node as usize].children {
                for w in self.df[child as usize].iter().collect::<Vec<_>>() {
                    if node == w || !dom_tree.dominates(node, w) {
                        set.insert(w);
                    }
                }
            }
            self.df[node as usize] = set;
            df_done[node as usize] = true;
            worklist.pop();
        }

        if tracing::enabled!(target: "seajit::domfrontier", tracing::Level::DEBUG) {
            self.dump(function);
        }
    }

    fn dump(&self, function: &MIFunction) {
        use itertools::Itertools;
        debug!(target: "seajit::domfrontier", "dominance frontiers:");
        for b in function.blocks() {
            let entries = self.df[b.index() as usize]
                .iter()
                .sorted()
                .map(|i| i.to_string())
                .join(", ");
            debug!(target: "seajit::domfrontier", "    DF[{}]: {{{}}}", b.index(), entries);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mi::MIFunction;

    /// Build an MI CFG from an edge list, block 0 first.
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
    fn test_diamond_idoms() {
        //    0
        //   / \
        //  1   2
        //   \ /
        //    3
        let f = cfg(4, &[(0, 1), (0, 2), (1, 3), (2, 3)]);
        let dt = DominatorTree::new(&f);
        assert_eq!(dt.immediate_dominator(0), INVALID_BLOCK);
        assert_eq!(dt.immediate_dominator(1), 0);
        assert_eq!(dt.immediate_dominator(2), 0);
        assert_eq!(dt.immediate_dominator(3), 0);
    }

    #[test]
    fn test_dominates_is_strict_and_transitive() {
        // 0 -> 1 -> 2 -> 3
        let f = cfg(4, &[(0, 1), (1, 2), (2, 3)]);
        let dt = DominatorTree::new(&f);
        assert!(!dt.dominates(1, 1));
        assert!(dt.dominates(0, 1));
        assert!(dt.dominates(1, 2));
        assert!(dt.dominates(0, 3));
        assert!(!dt.dominates(3, 0));
        // exactly one block has no immediate dominator
        let roots = (0..4).filter(|&b| dt.immediate_dominator(b) == INVALID_BLOCK).count();
        assert_eq!(roots, 1);
    }

    #[test]
    fn test_loop_idoms() {
        // 0 -> 1 -> 2 -> 1, 1 -> 3
        let f = cfg(4, &[(0, 1), (1, 2), (2, 1), (1, 3)]);
        let dt = DominatorTree::new(&f);
        assert_eq!(dt.immediate_dominator(1), 0);
        assert_eq!(dt.immediate_dominator(2), 1);
        assert_eq!(dt.immediate_dominator(3), 1);
        assert!(dt.dominates(1, 2));
        assert!(!dt.dominates(2, 1));
    }

    #[test]
    fn test_node_depths_and_iter_order() {
        let f = cfg(4, &[(0, 1), (0, 2), (1, 3), (2, 3)]);
        let dt = DominatorTree::new(&f);
        let depths = dt.calculate_node_depths(&f);
        assert_eq!(depths[0], 0);
        assert_eq!(depths[1], 1);
        assert_eq!(depths[2], 1);
        assert_eq!(depths[3], 1);

        let f2 = cfg(4, &[(0, 1), (1, 2), (2, 3)]);
        let dt2 = DominatorTree::new(&f2);
        let order = dt2.calculate_df_node_iter_order(&f2);
        assert_eq!(order, vec![3, 2, 1, 0]);
    }

    #[test]
    fn test_dominance_frontier_of_diamond() {
        let f = cfg(4, &[(0, 1), (0, 2), (1, 3), (2, 3)]);
        let dt = DominatorTree::new(&f);
        let df = DominatorFrontier::new(&f, &dt);
        assert!(df.frontier(1).contains(3));
        assert!(df.frontier(2).contains(3));
        assert!(df.frontier(0).is_empty());
        assert!(df.frontier(3).is_empty());
    }

    #[test]
    fn test_dominance_frontier_of_loop() {
        // 0 -> 1 -> 2 -> 1, 1 -> 3: the loop header is in the frontier of
        // its own body
        let f = cfg(4, &[(0, 1), (1, 2), (2, 1), (1, 3)]);
        let dt = DominatorTree::new(&f);
        let df = DominatorFrontier::new(&f, &dt);
        assert!(df.frontier(2).contains(1));
        assert!(df.frontier(1).contains(1));
    }
}
