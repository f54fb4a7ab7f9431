//! Node scheduling: flatten the graph into basic blocks with ordered
//! instructions.
//!
//! The steps, in order: build the CFG from the control-dependency
//! structure (splitting critical edges and forcing every block to end in a
//! true terminator), renumber the blocks, compute the dominator tree and
//! loop info over the MI CFG, run schedule-early then schedule-late with
//! loop hoisting, sequence the nodes inside each block, and finally hand
//! the blocks to the block scheduler for layout.

use smallvec::SmallVec;
use tracing::debug;

use crate::blockscheduler::BlockScheduler;
use crate::domtree::DominatorTree;
use crate::ir::function::Function;
use crate::ir::graph::Graph;
use crate::ir::node::{NodeCollector, NodeId, NodeWorkList, UseEdge};
use crate::ir::operation::OpKind;
use crate::loopinfo::LoopInfo;
use crate::mi::{BlockIndex, MIFunction, MIInstr, MIOperand, START_BLOCK_INDEX};

const TARGET: &str = "seajit::scheduling";

const NOT_YET_CALCULATED: u32 = u32::MAX;
const NO_VREG: u32 = u32::MAX;

#[derive(Clone)]
struct SchedulerData {
    minimum_block: Option<BlockIndex>,
    is_fixed: bool,
    is_scheduled_in_block: bool,
    unscheduled_uses: u32,
}

impl Default for SchedulerData {
    fn default() -> SchedulerData {
        SchedulerData {
            minimum_block: None,
            is_fixed: false,
            is_scheduled_in_block: false,
            unscheduled_uses: NOT_YET_CALCULATED,
        }
    }
}

fn needs_scheduling(graph: &Graph, n: NodeId) -> bool {
    if graph.op(n).is_constant() {
        return false;
    }
    !matches!(
        graph.opcode(n),
        OpKind::Function | OpKind::CppFrame | OpKind::Phi | OpKind::EffectPhi
    )
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum ScheduleOrNot {
    DontSchedule,
    Schedule,
}
use ScheduleOrNot::{DontSchedule, Schedule};

pub struct NodeScheduler<'f> {
    func: &'f mut Function,
    mi: MIFunction,
    dom_tree: Option<DominatorTree>,
    loop_info: Option<LoopInfo>,
    dominator_depth_for_block: Vec<i32>,
    vregs: Vec<u32>,
    scheduler_data: Vec<SchedulerData>,
    live: NodeCollector,
    next_vreg: u32,
}

impl<'f> NodeScheduler<'f> {
    pub fn new(func: &'f mut Function) -> NodeScheduler<'f> {
        // explicitly do NOT collect uses here: only nodes reachable from
        // the end are live
        let live = NodeCollector::new(func.graph(), false, false);
        let node_count = func.graph().node_count();
        NodeScheduler {
            func,
            mi: MIFunction::new(),
            dom_tree: None,
            loop_info: None,
            dominator_depth_for_block: Vec::new(),
            vregs: vec![NO_VREG; node_count],
            scheduler_data: Vec::new(),
            live,
            next_vreg: 0,
        }
    }

    pub fn build_mi_function(mut self) -> MIFunction {
        // step 1: build the CFG
        let roots = self.build_cfg();
        let remap = self.mi.renumber_blocks();
        for sd in &mut self.scheduler_data {
            if let Some(min) = sd.minimum_block {
                sd.minimum_block = Some(remap[min as usize]);
            }
        }
        self.mi.dump(self.func, "CFG after renumbering");

        assert_eq!(self.mi.block(START_BLOCK_INDEX).index(), START_BLOCK_INDEX);
        assert_eq!(
            self.mi
                .block(START_BLOCK_INDEX)
                .first_instruction()
                .opcode(self.func.graph()),
            OpKind::Start
        );

        // step 2: the dominator tree over the MI CFG
        if tracing::enabled!(target: "seajit::scheduling::cfg", tracing::Level::DEBUG) {
            self.dump_dot_cfg();
        }
        let dom_tree = DominatorTree::new(&self.mi);
        self.dominator_depth_for_block = dom_tree.calculate_node_depths(&self.mi);

        // step 3: find loops
        let loop_info = LoopInfo::new(&self.mi, &dom_tree);
        self.dom_tree = Some(dom_tree);
        self.loop_info = Some(loop_info);

        // step 4: schedule early
        self.schedule_early(&roots);
        self.show_nodes_by_block("nodes per block after early scheduling");

        // step 5: schedule late
        self.schedule_late(&roots);
        self.show_nodes_by_block("nodes per block after late scheduling");

        // step 6: schedule instructions inside each block
        self.schedule_nodes_in_blocks();

        self.mi.dump(self.func, "MI before block scheduling");

        // step 7: order the basic blocks
        let sequence = {
            let block_scheduler = BlockScheduler::new(
                &self.mi,
                self.func.graph(),
                self.dom_tree.as_ref().unwrap(),
                self.loop_info.as_ref().unwrap(),
            );
            block_scheduler.scheduled_block_sequence().to_vec()
        };
        self.mi.set_block_order(&sequence);

        self.mi.renumber_instructions();
        self.mi.set_vreg_count(self.next_vreg);
        self.mi.dump(self.func, "MI after scheduling");
        self.mi
    }

    // scheduler data access

    fn sd_mut(&mut self, n: NodeId) -> &mut SchedulerData {
        if n.index() >= self.scheduler_data.len() {
            self.scheduler_data.resize(n.index() + 8, SchedulerData::default());
        }
        &mut self.scheduler_data[n.index()]
    }

    fn minimum_block(&self, n: NodeId) -> Option<BlockIndex> {
        self.scheduler_data.get(n.index()).and_then(|sd| sd.minimum_block)
    }

    fn is_fixed(&self, n: NodeId) -> bool {
        self.scheduler_data.get(n.index()).is_some_and(|sd| sd.is_fixed)
    }

    fn is_scheduled_in_block(&self, n: NodeId) -> bool {
        self.scheduler_data
            .get(n.index())
            .is_some_and(|sd| sd.is_scheduled_in_block)
    }

    fn unscheduled_uses(&self, n: NodeId) -> u32 {
        self.scheduler_data
            .get(n.index())
            .map_or(NOT_YET_CALCULATED, |sd| sd.unscheduled_uses)
    }

    fn is_live(&self, n: NodeId) -> bool {
        self.live.is_reachable(n)
    }

    fn place(&mut self, node: NodeId, block: BlockIndex) {
        debug_assert!(!self.func.graph().is_dead(node));
        self.sd_mut(node).minimum_block = Some(block);
    }

    fn place_fixed(&mut self, node: NodeId, block: BlockIndex, mark_scheduled: ScheduleOrNot) {
        self.place(node, block);
        let sd = self.sd_mut(node);
        debug_assert!(!sd.is_fixed);
        sd.is_fixed = true;
        sd.is_scheduled_in_block = mark_scheduled == Schedule;
    }

    fn vreg_for_node(&mut self, node: NodeId) -> u32 {
        if node.index() >= self.vregs.len() {
            self.vregs.resize(node.index() + 1, NO_VREG);
        }
        if self.vregs[node.index()] == NO_VREG {
            self.vregs[node.index()] = self.next_vreg;
            self.next_vreg += 1;
        }
        self.vregs[node.index()]
    }

    // node classification

    fn can_start_block(&self, node: NodeId) -> bool {
        matches!(
            self.func.graph().opcode(node),
            OpKind::Start
                | OpKind::IfTrue
                | OpKind::IfFalse
                | OpKind::Region
                | OpKind::HandleUnwind
                | OpKind::OnException
        )
    }

    fn is_control_flow_split(&self, node: NodeId) -> bool {
        let graph = self.func.graph();
        let n_outputs = graph.op(node).control_output_count();
        if n_outputs == 2 {
            // a "missing" control output is exception flow without an
            // unwinder
            let mut control_uses = 0;
            for edge in graph.uses(node) {
                if self.is_live(edge.user) && graph.use_is_control(edge) {
                    control_uses += 1;
                }
            }
            return control_uses == 2;
        }
        n_outputs > 2
    }

    fn is_block_terminator(&self, node: NodeId) -> bool {
        match self.func.graph().opcode(node) {
            OpKind::Branch
            | OpKind::Jump
            | OpKind::Return
            | OpKind::TailCall
            | OpKind::UnwindDispatch
            | OpKind::End => true,
            OpKind::Call => self.is_control_flow_split(node),
            _ => false,
        }
    }

    fn get_common_dominator(&self, one: BlockIndex, other: BlockIndex) -> BlockIndex {
        let dom_tree = self.dom_tree.as_ref().unwrap();
        let mut a = one;
        let mut b = other;
        while a != b {
            if self.dominator_depth_for_block[a as usize]
                < self.dominator_depth_for_block[b as usize]
            {
                b = dom_tree.immediate_dominator(b);
            } else {
                a = dom_tree.immediate_dominator(a);
            }
        }
        a
    }

    /// The block a value could be hoisted to if `block` sits inside a
    /// loop: the block preceding the loop header, provided `block`
    /// dominates every exit of that loop.
    fn get_hoist_block(&self, block: BlockIndex) -> Option<BlockIndex> {
        let dom_tree = self.dom_tree.as_ref().unwrap();
        let loop_info = self.loop_info.as_ref().unwrap();

        if loop_info.is_loop_header(block) {
            return Some(dom_tree.immediate_dominator(block));
        }

        let loop_header = loop_info.loop_header_for(block)?;

        // block must dominate all exits from the loop; otherwise some exit
        // is reachable before block, and hoisting would compute a value
        // that exit never needs
        for &exit in loop_info.loop_exits_for_loop(loop_header) {
            if self.get_common_dominator(block, exit) != block {
                return None;
            }
        }

        Some(dom_tree.immediate_dominator(loop_header))
    }

    // step 1: CFG construction

    fn split_edge(&mut self, node: NodeId, input_index: usize) -> NodeId {
        let graph = self.func.graph_mut();
        let input = graph.input(node, input_index);
        let region_op = graph.ops().get_region(1);
        let region = graph.create_node(region_op, &[input]);
        let jump_op = graph.ops().get(OpKind::Jump);
        let jump = graph.create_node(jump_op, &[region]);

        debug!(
            target: TARGET,
            from = ?node,
            to = ?input,
            jump = ?jump,
            region = ?region,
            "splitting critical edge"
        );

        graph.replace_input(node, input_index, jump);
        jump
    }

    fn enqueue_control_inputs(&mut self, node: NodeId, todo: &mut NodeWorkList) {
        let control_input_count = self.func.graph().op(node).control_input_count();
        let first_control = self.func.graph().op(node).index_of_first_control();
        for i in 0..control_input_count {
            let input_index = first_control + i;
            let mut input = self.func.graph().input(node, input_index);
            if self.func.graph().opcode(node) == OpKind::Region
                && control_input_count > 1
                && self.is_control_flow_split(input)
            {
                // critical edge!
                input = self.split_edge(node, input_index);
                self.live.mark_reachable(input);
                let region = self.func.graph().control_input(input).unwrap();
                self.live.mark_reachable(region);
            }
            if !self.is_block_terminator(input) {
                let graph = self.func.graph_mut();
                let jump_op = graph.ops().get(OpKind::Jump);
                let jump = graph.create_node(jump_op, &[input]);
                graph.replace_input(node, input_index, jump);
                self.live.mark_reachable(jump);
                debug!(
                    target: TARGET,
                    jump = ?jump,
                    user = ?node,
                    input = ?input,
                    "inserting jump in front of non-terminator control use"
                );
                input = jump;
            }
            todo.enqueue(input);
        }
    }

    fn build_cfg(&mut self) -> Vec<NodeId> {
        let mut roots: Vec<NodeId> = Vec::with_capacity(32);
        let mut todo = NodeWorkList::new(self.func.graph());

        // create the CFG by walking control dependencies that start or end
        // blocks
        todo.enqueue(self.func.graph().end_node());
        while let Some(mut node) = todo.dequeue_next_node_for_visiting() {
            debug_assert!(self.is_block_terminator(node));

            if self.minimum_block(node).is_some() {
                continue;
            }

            let block = self.mi.add_block();
            debug!(target: TARGET, node = ?node, block, "terminator starts new block");
            let instr = self.create_mi_instruction(node);
            self.mi.block_mut(block).instructions_mut().insert(0, instr);
            self.place_fixed(node, block, Schedule);
            roots.push(node);

            if let Some(frame_state) = self.func.graph().frame_state_input(node) {
                self.place_fixed(frame_state, block, DontSchedule);
                debug!(
                    target: TARGET,
                    frame_state = ?frame_state,
                    block,
                    "placing frame-state dependency with its terminator"
                );
            }

            if self.func.graph().opcode(node) == OpKind::End {
                self.enqueue_control_inputs(node, &mut todo);
                continue;
            }

            loop {
                let Some(control_dependency) = self.func.graph().control_input(node) else {
                    break;
                };
                if todo.is_visited(control_dependency) {
                    break;
                }
                if self.is_fixed(control_dependency) {
                    break;
                }

                if self.func.graph().opcode(control_dependency) == OpKind::Start {
                    debug!(target: TARGET, node = ?control_dependency, block, "placing start node");
                    self.handle_start_node(control_dependency, block);
                    self.place_fixed(control_dependency, block, Schedule);
                    roots.push(control_dependency);
                    break;
                }
                if self.is_block_terminator(control_dependency) {
                    // the block ends against another block's terminator;
                    // close it off with a synthetic region
                    debug!(
                        target: TARGET,
                        terminator = ?control_dependency,
                        block,
                        "found terminator of another block, finishing this one"
                    );
                    let graph = self.func.graph_mut();
                    let region_op = graph.ops().get_region(1);
                    let merge = graph.create_node(region_op, &[control_dependency]);
                    let first_control = graph.op(node).index_of_first_control();
                    graph.replace_input(node, first_control, merge);
                    self.add_block_start(&mut roots, merge, block);
                    self.place_fixed(merge, block, Schedule);
                    self.live.mark_reachable(merge);
                    todo.enqueue(control_dependency);
                    break;
                }
                let starts_block = self.can_start_block(control_dependency) || {
                    let control = self
                        .func
                        .graph()
                        .control_input(control_dependency)
                        .expect("control chain node without control input");
                    self.is_fixed(control)
                };
                if starts_block {
                    debug!(
                        target: TARGET,
                        node = ?control_dependency,
                        block,
                        "found block start for this block"
                    );
                    self.add_block_start(&mut roots, control_dependency, block);
                    self.place_fixed(control_dependency, block, Schedule);
                    roots.push(control_dependency);
                    self.enqueue_control_inputs(control_dependency, &mut todo);
                    break;
                }
                debug!(target: TARGET, node = ?control_dependency, "skipping node");
                node = control_dependency;
            }
        }

        self.link_block_edges();

        self.func.dump("graph after building CFG");

        let start_block = self
            .minimum_block(self.func.graph().start_node())
            .expect("start node was not placed");
        self.mi.set_start_block(start_block);

        self.mi.dump(self.func, "control flow graph before renumbering");
        self.mi.verify_cfg(self.func.graph());

        roots
    }

    /// Link the in/out edges of all blocks, and fill in the block argument
    /// operands on the jump-like terminators of region predecessors.
    fn link_block_edges(&mut self) {
        for block in 0..self.mi.block_count() as BlockIndex {
            debug_assert!(!self.mi.block(block).instructions().is_empty());
            let to_node = self.mi.block(block).first_instruction().ir_node();
            match self.func.graph().opcode(to_node) {
                OpKind::Region => {
                    let inputs: SmallVec<[NodeId; 4]> =
                        self.func.graph().inputs(to_node).flatten().collect();
                    for (input_nr, &input) in inputs.iter().enumerate() {
                        let from_block = self
                            .minimum_block(input)
                            .expect("region predecessor without block");
                        self.mi.block_mut(from_block).add_out_edge(block);
                        self.mi.block_mut(block).add_in_edge(from_block);

                        let terminator = self.mi.block(from_block).terminator().ir_node();
                        let terminator_kind = self.func.graph().opcode(terminator);
                        if terminator_kind == OpKind::Jump
                            || terminator_kind == OpKind::UnwindDispatch
                        {
                            let phis: SmallVec<[NodeId; 8]> = self
                                .mi
                                .block(block)
                                .arguments()
                                .iter()
                                .map(|a| a.node())
                                .collect();
                            for (arg, &phi) in phis.iter().enumerate() {
                                let value = self.func.graph().input(phi, input_nr);
                                let operand = self.create_mi_operand(value);
                                self.mi
                                    .block_mut(from_block)
                                    .terminator_mut()
                                    .set_operand(arg, operand);
                            }
                        }
                    }
                }
                OpKind::End => {
                    let inputs: SmallVec<[NodeId; 8]> =
                        self.func.graph().inputs(to_node).flatten().collect();
                    for input in inputs {
                        let from_block = self
                            .minimum_block(input)
                            .expect("end predecessor without block");
                        self.mi.block_mut(from_block).add_out_edge(block);
                        self.mi.block_mut(block).add_in_edge(from_block);
                    }
                }
                _ => {
                    if let Some(from_node) = self.func.graph().control_input(to_node) {
                        let from_block = self
                            .minimum_block(from_node)
                            .expect("predecessor without block");
                        self.mi.block_mut(from_block).add_out_edge(block);
                        self.mi.block_mut(block).add_in_edge(from_block);
                    }
                }
            }
        }
    }

    /// Insert the block-start instruction and, for regions, turn the live
    /// phis into block arguments.
    fn add_block_start(&mut self, roots: &mut Vec<NodeId>, start_node: NodeId, block: BlockIndex) {
        let instr = self.create_mi_instruction(start_node);
        self.mi.block_mut(block).instructions_mut().insert(0, instr);
        if self.func.graph().opcode(start_node) == OpKind::Region {
            let edges: SmallVec<[UseEdge; 8]> = self.func.graph().uses(start_node).collect();
            for edge in edges {
                let user = edge.user;
                match self.func.graph().opcode(user) {
                    OpKind::Phi if self.is_live(user) => {
                        let vreg = self.vreg_for_node(user);
                        self.mi
                            .block_mut(block)
                            .add_argument(MIOperand::VirtualRegister { node: user, vreg });
                        self.place_fixed(user, block, Schedule);
                        roots.push(user);
                    }
                    OpKind::EffectPhi if self.is_live(user) => {
                        self.place_fixed(user, block, Schedule);
                        roots.push(user);
                    }
                    _ => {}
                }
            }
        }
    }

    /// The start block: parameters become block arguments in index order;
    /// the engine/frame/function projections are fixed here.
    fn handle_start_node(&mut self, start_node: NodeId, start_block: BlockIndex) {
        let instr = self.create_mi_instruction(start_node);
        self.mi.block_mut(start_block).instructions_mut().insert(0, instr);

        let mut args: SmallVec<[Option<NodeId>; 32]> = SmallVec::new();
        let edges: SmallVec<[UseEdge; 32]> = self.func.graph().uses(start_node).collect();
        for edge in edges {
            let user = edge.user;
            match self.func.graph().opcode(user) {
                OpKind::Engine | OpKind::CppFrame | OpKind::Function => {
                    self.place_fixed(user, start_block, Schedule);
                }
                OpKind::Parameter => {
                    let (index, _name) = self.func.graph().op(user).parameter_payload().unwrap();
                    if args.len() <= index {
                        args.resize(index + 1, None);
                    }
                    args[index] = Some(user);
                    self.place_fixed(user, start_block, Schedule);
                }
                _ => {}
            }
        }

        for (slot, arg) in args.iter().enumerate() {
            if let Some(node) = *arg {
                self.mi
                    .block_mut(start_block)
                    .add_argument(MIOperand::JsStackSlot { node, slot: slot as u32 });
            }
        }
    }

    // steps 4 and 5: early and late placement

    fn schedule_early(&mut self, roots: &[NodeId]) {
        // scheduling one node can re-queue its dependencies
        let mut todo = NodeWorkList::new(self.func.graph());
        for &root in roots {
            todo.enqueue(root);
            while let Some(node) = todo.dequeue_next_node_for_visiting() {
                self.schedule_early_node(node, &mut todo);
            }
        }
    }

    fn schedule_early_node(&mut self, node: NodeId, todo: &mut NodeWorkList) {
        let minimum_block = self
            .minimum_block(node)
            .expect("node visited by early scheduling without minimum block");

        let edges: SmallVec<[UseEdge; 8]> = self.func.graph().uses(node).collect();
        for edge in edges {
            if self.is_live(edge.user) {
                self.propagate_minimum_position(minimum_block, edge.user, todo);
            }
        }
    }

    fn propagate_minimum_position(
        &mut self,
        new_minimum_position: BlockIndex,
        to_node: NodeId,
        todo: &mut NodeWorkList,
    ) {
        if self.is_fixed(to_node) {
            return;
        }

        let minimum_block_index = self.minimum_block(to_node).unwrap_or(START_BLOCK_INDEX);
        debug_assert!(self
            .dom_tree
            .as_ref()
            .unwrap()
            .inside_same_dominator_chain(new_minimum_position, minimum_block_index));
        if self.minimum_block(to_node).is_none()
            || self.dominator_depth_for_block[new_minimum_position as usize]
                > self.dominator_depth_for_block[minimum_block_index as usize]
        {
            // some input of to_node is scheduled after the current minimum
            // depth, so the minimum position moves down; this may
            // re-schedule to_node's uses
            self.place(to_node, new_minimum_position);
            todo.re_enqueue(to_node);
        }
    }

    fn schedule_late(&mut self, roots: &[NodeId]) {
        let mut todo = NodeWorkList::new(self.func.graph());
        for &root in roots {
            todo.enqueue(root);
        }

        while let Some(node) = todo.dequeue_next_node_for_visiting() {
            self.schedule_node_late(node, &mut todo);
        }
    }

    fn schedule_node_late(&mut self, node: NodeId, todo: &mut NodeWorkList) {
        if !needs_scheduling(self.func.graph(), node) {
            return;
        }

        if self.unscheduled_uses(node) == NOT_YET_CALCULATED {
            let mut count = 0;
            let edges: SmallVec<[UseEdge; 8]> = self.func.graph().uses(node).collect();
            for edge in edges {
                if !self.is_live(edge.user) {
                    continue;
                }
                if !needs_scheduling(self.func.graph(), edge.user) {
                    continue;
                }
                if self.is_fixed(edge.user) {
                    continue;
                }
                todo.enqueue(edge.user);
                count += 1;
            }
            self.sd_mut(node).unscheduled_uses = count;
        }

        if self.is_fixed(node) {
            self.enqueue_inputs(node, todo);
            return;
        }

        if self.unscheduled_uses(node) > 0 {
            // not all uses are placed yet; postpone
            debug!(target: TARGET, node = ?node, "{}", todo.status(node));
            return;
        }

        if self.minimum_block(node).is_none() {
            self.sd_mut(node).minimum_block = Some(START_BLOCK_INDEX);
        }
        let min_block = self.minimum_block(node).unwrap();
        let common_use_dominator = self.common_dominator_of_uses(node);
        debug!(
            target: TARGET,
            node = ?node,
            common_use_dominator,
            "computed common use dominator"
        );

        // the minimum block dominates the uses and their common dominator
        debug_assert!(
            min_block == common_use_dominator
                || self
                    .dom_tree
                    .as_ref()
                    .unwrap()
                    .dominates(min_block, common_use_dominator)
        );

        let mut target_block = common_use_dominator;

        if self.func.graph().opcode(node) == OpKind::FrameState {
            // never hoist frame states: they keep their inputs alive, and
            // hoisting would end those lifetimes prematurely
        } else {
            // prevent the node from sinking into a loop: while a hoist
            // block exists and is still at or below the minimum block,
            // lift the candidate one loop level out
            let mut hoist_block = self.get_hoist_block(target_block);
            while let Some(hoist) = hoist_block {
                if self.dominator_depth_for_block[hoist as usize]
                    < self.dominator_depth_for_block[min_block as usize]
                {
                    break;
                }
                debug!(
                    target: TARGET,
                    node = ?node,
                    from = target_block,
                    to = hoist,
                    "hoisting node out of loop"
                );
                target_block = hoist;
                hoist_block = self.get_hoist_block(target_block);
            }
        }

        debug!(
            target: TARGET,
            node = ?node,
            block = target_block,
            minimum = min_block,
            "fixating node"
        );

        self.place_fixed(node, target_block, DontSchedule);
        self.enqueue_inputs(node, todo);
    }

    fn enqueue_inputs(&mut self, node: NodeId, todo: &mut NodeWorkList) {
        let inputs: SmallVec<[NodeId; 8]> = self.func.graph().inputs(node).flatten().collect();
        for input in inputs {
            if !needs_scheduling(self.func.graph(), input) {
                continue;
            }
            if !self.is_live(input) {
                continue;
            }
            if self.is_fixed(input) {
                continue;
            }
            let uses = self.unscheduled_uses(input);
            if uses != NOT_YET_CALCULATED {
                let sd = self.sd_mut(input);
                if sd.unscheduled_uses > 0 {
                    sd.unscheduled_uses -= 1;
                }
                if sd.unscheduled_uses == 0 {
                    todo.re_enqueue(input);
                }
            } else {
                todo.re_enqueue(input);
            }
        }
    }

    fn common_dominator_of_uses(&mut self, node: NodeId) -> BlockIndex {
        let mut common_dominator: Option<BlockIndex> = None;
        let edges: SmallVec<[UseEdge; 8]> = self.func.graph().uses(node).collect();
        for edge in edges {
            let mut use_node = edge.user;
            if !self.is_live(use_node) {
                continue;
            }
            // region nodes consume other nodes through their control
            // dependency, and those were placed as terminators already
            debug_assert_ne!(self.func.graph().opcode(use_node), OpKind::Region);
            if matches!(
                self.func.graph().opcode(use_node),
                OpKind::Phi | OpKind::EffectPhi
            ) {
                // the relevant block is the predecessor contributing this
                // phi input
                let region = self.func.graph().control_input(use_node).unwrap();
                let input = self
                    .func
                    .graph()
                    .control_input_at(region, edge.index)
                    .expect("phi input index out of region bounds");
                use_node = input;
            }
            let min_block = self
                .minimum_block(use_node)
                .expect("use without minimum block");
            common_dominator = Some(match common_dominator {
                None => min_block,
                Some(common) => self.get_common_dominator(common, min_block),
            });
        }
        common_dominator.expect("node without live uses")
    }

    // step 6: in-block sequencing

    fn schedule_nodes_in_blocks(&mut self) {
        let reachable: Vec<NodeId> = self.live.reachable().to_vec();
        for &n in &reachable {
            if self.minimum_block(n).is_none() {
                self.sd_mut(n).minimum_block = Some(START_BLOCK_INDEX);
            }
        }

        let mut nodes_for_block: Vec<Vec<NodeId>> = vec![Vec::new(); self.mi.block_count()];

        for index in 0..self.scheduler_data.len() {
            let node = NodeId(index as u32);
            if !self.is_live(node) {
                continue;
            }
            let minimum_block = self.scheduler_data[index].minimum_block;
            let mut count = 0;
            for edge in self.func.graph().uses(node) {
                if !needs_scheduling(self.func.graph(), edge.user) {
                    continue;
                }
                if self.is_scheduled_in_block(edge.user) {
                    continue;
                }
                if self.minimum_block(edge.user) == minimum_block {
                    count += 1;
                }
            }
            self.scheduler_data[index].unscheduled_uses = count;
            if count == 0 {
                if let Some(block) = minimum_block {
                    nodes_for_block[block as usize].push(node);
                }
            }
        }

        let mut todo = NodeWorkList::new(self.func.graph());
        for block in 0..self.mi.block_count() as BlockIndex {
            debug!(target: TARGET, block, "scheduling inside block");
            let mut insertion_point = self.mi.block(block).instructions().len() - 1;
            let terminator = self.mi.block(block).terminator().ir_node();
            todo.enqueue(terminator);
            self.schedule_block_worklist(block, &mut insertion_point, &mut todo);
            debug_assert!(todo.is_empty());
            for &node in &nodes_for_block[block as usize] {
                if !self.is_scheduled_in_block(node) {
                    todo.enqueue(node);
                }
            }
            self.schedule_block_worklist(block, &mut insertion_point, &mut todo);
            debug_assert!(todo.is_empty());
            todo.reset();
        }
    }

    fn schedule_block_worklist(
        &mut self,
        block: BlockIndex,
        insertion_point: &mut usize,
        todo: &mut NodeWorkList,
    ) {
        while let Some(node) = todo.dequeue_next_node_for_visiting() {
            self.schedule_node_in_block(node, block, insertion_point, todo);
        }
    }

    fn schedule_node_in_block(
        &mut self,
        node: NodeId,
        block: BlockIndex,
        insertion_point: &mut usize,
        todo: &mut NodeWorkList,
    ) {
        debug_assert!(!self.func.graph().is_dead(node));

        if !self.is_live(node) {
            return;
        }
        if !needs_scheduling(self.func.graph(), node) {
            return;
        }
        if self.minimum_block(node) != Some(block) {
            return;
        }

        let was_already_scheduled = self.is_scheduled_in_block(node);
        if !was_already_scheduled {
            if self.unscheduled_uses(node) > 0 {
                return;
            }
            self.schedule_node_now(node, block, insertion_point);
        }

        if let Some(frame_state) = self.func.graph().frame_state_input(node) {
            self.schedule_node_in_block(frame_state, block, insertion_point, todo);
        }

        let inputs: SmallVec<[NodeId; 8]> = self.func.graph().inputs(node).flatten().collect();
        for input in inputs {
            if !needs_scheduling(self.func.graph(), input) {
                continue;
            }
            if !self.is_live(input) {
                continue;
            }
            if self.is_scheduled_in_block(input) {
                continue;
            }
            debug_assert!(self.minimum_block(input).is_some());
            if self.minimum_block(input) != Some(block) {
                continue;
            }
            debug_assert!(!self.func.graph().is_dead(input));
            debug_assert_ne!(self.unscheduled_uses(input), NOT_YET_CALCULATED);
            if !was_already_scheduled && self.unscheduled_uses(input) > 0 {
                self.sd_mut(input).unscheduled_uses -= 1;
            }
            if self.unscheduled_uses(input) == 0 {
                todo.enqueue(input);
            }
        }
    }

    fn schedule_node_now(&mut self, node: NodeId, block: BlockIndex, insertion_point: &mut usize) {
        debug!(
            target: TARGET,
            node = ?node,
            block,
            position = *insertion_point,
            "scheduling node before the current insertion point"
        );
        let instr = self.create_mi_instruction(node);
        self.mi
            .block_mut(block)
            .instructions_mut()
            .insert(*insertion_point, instr);
    }

    // MI creation

    fn first_control_output(&self, node: NodeId) -> Option<NodeId> {
        let graph = self.func.graph();
        graph
            .uses(node)
            .find(|&edge| graph.use_is_control(edge))
            .map(|edge| edge.user)
    }

    fn create_mi_instruction(&mut self, node: NodeId) -> MIInstr {
        let opcode = self.func.graph().opcode(node);

        let n_args = match opcode {
            OpKind::UnwindDispatch | OpKind::Jump => {
                // one operand per live phi in the target region; the
                // operands are linked in with the block arguments
                let mut n = 0;
                if let Some(target) = self.first_control_output(node) {
                    if self.func.graph().opcode(target) == OpKind::Region {
                        for edge in self.func.graph().uses(target) {
                            if self.func.graph().opcode(edge.user) == OpKind::Phi
                                && self.is_live(edge.user)
                            {
                                n += 1;
                            }
                        }
                    }
                }
                n
            }
            OpKind::Branch => 1,
            OpKind::Return => 1,
            _ => self.func.graph().op(node).value_input_count(),
        };

        let mut instr = MIInstr::new(node, n_args);
        for i in 0..self.func.graph().op(node).value_input_count() {
            let input = self.func.graph().input(node, i);
            let operand = self.create_mi_operand(input);
            instr.set_operand(i, operand);
        }
        if opcode != OpKind::Start && self.func.graph().op(node).value_output_count() > 0 {
            let dest = self.create_mi_operand(node);
            instr.set_destination(dest);
        }

        self.sd_mut(node).is_scheduled_in_block = true;
        instr
    }

    fn create_mi_operand(&mut self, node: NodeId) -> MIOperand {
        let graph = self.func.graph();
        if graph.op(node).is_constant() {
            return MIOperand::Constant { node };
        }

        match graph.opcode(node) {
            OpKind::Parameter => {
                let (index, _name) = graph.op(node).parameter_payload().unwrap();
                MIOperand::JsStackSlot { node, slot: index as u32 }
            }
            OpKind::Engine => MIOperand::EngineRegister { node },
            OpKind::CppFrame => MIOperand::CppFrameRegister { node },
            OpKind::Function => MIOperand::Function { node },
            opcode => {
                // `this` stays in its frame slot by convention
                let writes_this = (opcode == OpKind::Call
                    && graph.op(node).call_payload() == Some(OpKind::JsThisToObject))
                    || opcode == OpKind::StoreThis;
                if writes_this {
                    MIOperand::JsStackSlot {
                        node,
                        slot: crate::bytecode::call_data::THIS as u32,
                    }
                } else {
                    let vreg = self.vreg_for_node(node);
                    MIOperand::VirtualRegister { node, vreg }
                }
            }
        }
    }

    // debug output

    fn show_nodes_by_block(&self, description: &str) {
        if !tracing::enabled!(target: TARGET, tracing::Level::DEBUG) {
            return;
        }
        debug!(target: TARGET, "{}", description);
        for block in 0..self.mi.block_count() as BlockIndex {
            let mut entries = String::new();
            for (index, sd) in self.scheduler_data.iter().enumerate() {
                let node = NodeId(index as u32);
                if !self.is_live(node) {
                    continue;
                }
                if sd.minimum_block == Some(block) {
                    if !entries.is_empty() {
                        entries += ", ";
                    }
                    entries += &format!(
                        "{} ({})",
                        index,
                        self.func.graph().op(node).debug_string()
                    );
                }
            }
            if entries.is_empty() {
                entries = "<<none>>".to_string();
            }
            debug!(target: TARGET, "nodes in block {}: {}", block, entries);
        }
    }

    fn dump_dot_cfg(&self) {
        let mut out = String::from("\n");
        out += &format!(
            "digraph{{root=\"L{}\" label=\"Control Flow Graph\";node[shape=circle];edge[dir=forward fontsize=10]\n",
            START_BLOCK_INDEX
        );
        for src in self.mi.blocks() {
            for &dst in src.out_edges() {
                out += &format!("L{}->L{}\n", src.index(), dst);
            }
        }
        out += "}\n";
        debug!(target: "seajit::scheduling::cfg", "{}", out);
    }
}
