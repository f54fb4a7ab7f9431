//! End-to-end pipeline tests: bytecode in, scheduled MI function out.

use std::collections::HashMap;

use seajit::blockscheduler::BlockScheduler;
use seajit::bytecode::{call_data, CompiledFunction, Opcode};
use seajit::domtree::DominatorTree;
use seajit::graphbuilder::GraphBuilder;
use seajit::ir::{Function, Graph, NodeCollector, NodeId, OpKind};
use seajit::loopinfo::LoopInfo;
use seajit::mi::{BlockIndex, MIBlock, MIFunction};

/// Set SEAJIT_TEST_LOG=1 to see the per-pass debug output while a test
/// runs.
fn init_logging() {
    if std::env::var_os("SEAJIT_TEST_LOG").is_some() {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .try_init();
    }
}

fn reachable_opcodes(function: &Function) -> Vec<(NodeId, OpKind)> {
    let graph = function.graph();
    NodeCollector::new(graph, false, false)
        .reachable()
        .iter()
        .map(|&n| (n, graph.opcode(n)))
        .collect()
}

fn count_opcode(function: &Function, kind: OpKind) -> usize {
    reachable_opcodes(function)
        .iter()
        .filter(|(_, k)| *k == kind)
        .count()
}

/// Map from stored block index to position in the final sequence.
fn positions(mi: &MIFunction) -> HashMap<BlockIndex, usize> {
    mi.blocks()
        .iter()
        .enumerate()
        .map(|(pos, b)| (b.index(), pos))
        .collect()
}

fn block_by_index(mi: &MIFunction, index: BlockIndex) -> &MIBlock {
    mi.blocks()
        .iter()
        .find(|b| b.index() == index)
        .expect("unknown block index")
}

#[test]
fn empty_function_has_one_code_block() {
    init_logging();
    // function f() { return; }
    let mut fb = CompiledFunction::builder("f");
    fb.code().emit(Opcode::LoadUndefined, &[]);
    fb.code().emit(Opcode::Ret, &[]);
    let source = fb.build();

    // graph shape: End collects exactly the one Return, whose value is
    // undefined
    let mut function = Function::new(source.clone());
    GraphBuilder::build_graph(&mut function);
    function.verify();
    {
        let graph = function.graph();
        let end = graph.end_node();
        assert_eq!(graph.input_count(end), 1);
        let ret = graph.input(end, 0);
        assert_eq!(graph.opcode(ret), OpKind::Return);
        assert_eq!(graph.input(ret, 0), graph.undefined_node());
    }

    let (_ir, mi) = seajit::compile(&source);
    // one block of code plus the block collecting the end node
    assert_eq!(mi.block_count(), 2);
    // the start block holds at least the start marker and the return
    assert!(mi.blocks()[0].instructions().len() >= 2);
}

#[test]
fn straight_line_arithmetic_lowers_to_call() {
    init_logging();
    // function f(a, b) { return a + b; }
    let mut fb = CompiledFunction::builder("f");
    let a = fb.add_formal("a");
    let b = fb.add_formal("b");
    fb.code().emit(Opcode::LoadReg, &[(call_data::HEADER_SIZE + b) as i32]);
    fb.code().emit(Opcode::Add, &[(call_data::HEADER_SIZE + a) as i32, -1]);
    fb.code().emit(Opcode::Ret, &[]);
    let source = fb.build();

    // before lowering: JsAdd over the two parameters
    let mut function = Function::new(source.clone());
    GraphBuilder::build_graph(&mut function);
    assert_eq!(count_opcode(&function, OpKind::JsAdd), 1);

    // after lowering: a Call[JsAdd] taking the engine first
    seajit::lowering::GenericLowering::new(&mut function).lower();
    assert_eq!(count_opcode(&function, OpKind::JsAdd), 0);
    let graph = function.graph();
    let ret = graph.input(graph.end_node(), 0);
    let call = graph.input(ret, 0);
    assert_eq!(graph.opcode(call), OpKind::Call);
    assert_eq!(graph.op(call).call_payload(), Some(OpKind::JsAdd));
    assert_eq!(graph.input(call, 0), graph.engine_node());

    // the full pipeline schedules everything into one code block
    let (_ir, mi) = seajit::compile(&source);
    assert_eq!(mi.block_count(), 2);
    assert!(mi.vreg_count() >= 1);
}

#[test]
fn if_then_else_shape_and_layout() {
    init_logging();
    // function f(c) { if (c) return 1; else return 2; }
    let mut fb = CompiledFunction::builder("f");
    let c = fb.add_formal("c");
    fb.code().emit(Opcode::LoadReg, &[(call_data::HEADER_SIZE + c) as i32]);
    let to_else = fb.code().emit_jump(Opcode::JumpFalse, &[-1]);
    fb.code().emit(Opcode::LoadInt, &[1]);
    fb.code().emit(Opcode::Ret, &[]);
    fb.code().patch_jump(to_else);
    fb.code().emit(Opcode::LoadInt, &[2]);
    fb.code().emit(Opcode::Ret, &[]);
    let source = fb.build();

    let mut function = Function::new(source.clone());
    GraphBuilder::build_graph(&mut function);
    function.verify();
    {
        let graph = function.graph();
        assert_eq!(count_opcode(&function, OpKind::Branch), 1);
        assert_eq!(count_opcode(&function, OpKind::IfTrue), 1);
        assert_eq!(count_opcode(&function, OpKind::IfFalse), 1);
        assert_eq!(graph.input_count(graph.end_node()), 2);
    }

    let (_ir, mi) = seajit::compile(&source);
    // entry, then, else, and the end block
    assert_eq!(mi.block_count(), 4);

    // the entry block comes first and both its successors directly follow
    // it, keeping the diamond together; the end block is last
    let pos = positions(&mi);
    let entry = &mi.blocks()[0];
    assert_eq!(entry.out_edges().len(), 2);
    for &succ in entry.out_edges() {
        let p = pos[&succ];
        assert!(p == 1 || p == 2);
    }
}

#[test]
fn while_loop_produces_loop_phis_and_contiguous_blocks() {
    init_logging();
    // function f() { var i = 0; while (i < 10) i = i + 1; return i; }
    let mut fb = CompiledFunction::builder("f");
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
    let source = fb.build();

    // loop-header shape in the graph: a two-input region controlling the
    // phi for i, and a comparison driving the branch
    let mut function = Function::new(source.clone());
    GraphBuilder::build_graph(&mut function);
    function.verify();
    {
        let graph = function.graph();
        let ret = graph.input(graph.end_node(), 0);
        let i_phi = graph.input(ret, 0);
        assert_eq!(graph.opcode(i_phi), OpKind::Phi);
        let region = graph.control_input(i_phi).unwrap();
        assert_eq!(graph.opcode(region), OpKind::Region);
        assert_eq!(graph.input_count(region), 2);
        assert_eq!(count_opcode(&function, OpKind::JsLessThan), 1);
    }

    let (_ir, mi) = seajit::compile(&source);
    let pos = positions(&mi);

    // the loop header is the block with a back edge: one of its
    // predecessors sits after it in the layout
    let loop_header = mi
        .blocks()
        .iter()
        .find(|b| b.in_edges().len() == 2 && !b.arguments().is_empty())
        .expect("no loop header found");
    // the loop-entry phis arrive as block arguments; the frame state of
    // the loop branch keeps them all alive
    let n_args = loop_header.arguments().len();
    assert!(n_args >= 1);

    let back_edge_pred = loop_header
        .in_edges()
        .iter()
        .copied()
        .find(|&p| pos[&p] > pos[&loop_header.index()])
        .expect("no back edge");
    // all loop blocks are contiguous: the body directly follows the header
    assert_eq!(pos[&back_edge_pred], pos[&loop_header.index()] + 1);

    // the back-edge jump feeds every loop phi
    let body = block_by_index(&mi, back_edge_pred);
    let terminator = body.terminator();
    assert_eq!(terminator.operand_count(), n_args);
    for i in 0..n_args {
        assert!(terminator.operand(i).is_valid());
    }
}

#[test]
fn exception_handling_builds_unwind_plumbing() {
    init_logging();
    // try { acc = a + 1 } catch { return exception-ish } return
    let mut fb = CompiledFunction::builder("f");
    let a = fb.add_formal("a");
    let a_slot = (call_data::HEADER_SIZE + a) as i32;

    // offsets: SetUnwindHandler(5), LoadInt(5), Add(9),
    // SetUnwindHandler(5), UnwindDispatch(1), Jump(5), catch:
    // GetException(1), Ret(1), end: LoadUndefined(1), Ret(1)
    let catch_offset = 30;
    let end_offset = 32;
    fb.code().emit(Opcode::SetUnwindHandler, &[catch_offset - 5]);
    fb.code().emit(Opcode::LoadInt, &[1]);
    fb.code().emit(Opcode::Add, &[a_slot, -1]);
    fb.code().emit(Opcode::SetUnwindHandler, &[0]);
    fb.code().emit(Opcode::UnwindDispatch, &[]);
    fb.code().emit(Opcode::Jump, &[end_offset - 30]);
    assert_eq!(fb.code().current_offset(), catch_offset as usize);
    fb.code().emit(Opcode::GetException, &[]);
    fb.code().emit(Opcode::Ret, &[]);
    assert_eq!(fb.code().current_offset(), end_offset as usize);
    fb.code().emit(Opcode::LoadUndefined, &[]);
    fb.code().emit(Opcode::Ret, &[]);
    let source = fb.build();

    let mut function = Function::new(source.clone());
    GraphBuilder::build_graph(&mut function);
    function.verify();

    // the throwing add forked an exception edge into the handler
    assert_eq!(count_opcode(&function, OpKind::OnException), 1);
    assert_eq!(count_opcode(&function, OpKind::GetException), 1);
    // the unwind dispatch has one continuation: the handler was already
    // reset when it runs
    let graph = function.graph();
    let (dispatch, _) = reachable_opcodes(&function)
        .into_iter()
        .find(|(_, k)| *k == OpKind::UnwindDispatch)
        .expect("no unwind dispatch");
    assert_eq!(graph.op(dispatch).control_output_count(), 1);
    assert_eq!(graph.op(dispatch).unwind_dispatch_payload(), Some((0, 25)));
    // three ways out: the catch return, the no-handler unwind return, and
    // the regular return
    assert_eq!(graph.input_count(graph.end_node()), 3);

    // and the pipeline completes with every block scheduled exactly once
    let (_ir, mi) = seajit::compile(&source);
    let mut seen = std::collections::HashSet::new();
    for b in mi.blocks() {
        assert!(seen.insert(b.index()), "block scheduled twice");
    }
    assert_eq!(seen.len(), mi.block_count());
}

#[test]
fn final_cfg_has_no_critical_edges() {
    init_logging();
    for source in [
        {
            // if-then-else with a join
            let mut fb = CompiledFunction::builder("join");
            let c = fb.add_formal("c");
            fb.code().emit(Opcode::LoadReg, &[(call_data::HEADER_SIZE + c) as i32]);
            let to_else = fb.code().emit_jump(Opcode::JumpFalse, &[-1]);
            fb.code().emit(Opcode::LoadInt, &[1]);
            let to_end = fb.code().emit_jump(Opcode::Jump, &[]);
            fb.code().patch_jump(to_else);
            fb.code().emit(Opcode::LoadInt, &[2]);
            fb.code().patch_jump(to_end);
            fb.code().emit(Opcode::Ret, &[]);
            fb.build()
        },
        {
            // a loop
            let mut fb = CompiledFunction::builder("loop");
            fb.set_local_count(1);
            let i = call_data::HEADER_SIZE as i32;
            fb.code().emit(Opcode::LoadZero, &[]);
            fb.code().emit(Opcode::StoreReg, &[i]);
            fb.mark_loop_start();
            let header = fb.code().current_offset();
            fb.code().emit(Opcode::LoadInt, &[10]);
            fb.code().emit(Opcode::CmpLt, &[i]);
            let exit = fb.code().emit_jump(Opcode::JumpFalse, &[-1]);
            fb.code().emit(Opcode::LoadReg, &[i]);
            fb.code().emit(Opcode::Increment, &[-1]);
            fb.code().emit(Opcode::StoreReg, &[i]);
            fb.code().emit_jump_to(Opcode::Jump, &[], header);
            fb.code().patch_jump(exit);
            fb.code().emit(Opcode::LoadReg, &[i]);
            fb.code().emit(Opcode::Ret, &[]);
            fb.build()
        },
    ] {
        let (_ir, mi) = seajit::compile(&source);
        for b in mi.blocks() {
            if b.in_edges().len() > 1 {
                for &pred in b.in_edges() {
                    assert!(
                        block_by_index(&mi, pred).out_edges().len() <= 1,
                        "critical edge from block {} to block {}",
                        pred,
                        b.index()
                    );
                }
            }
        }
    }
}

#[test]
fn scheduling_places_every_live_node_exactly_once() {
    init_logging();
    // if-then-else with a join, so phis, regions and jumps all appear
    let mut fb = CompiledFunction::builder("f");
    let c = fb.add_formal("c");
    fb.code().emit(Opcode::LoadReg, &[(call_data::HEADER_SIZE + c) as i32]);
    let to_else = fb.code().emit_jump(Opcode::JumpFalse, &[-1]);
    fb.code().emit(Opcode::LoadInt, &[1]);
    let to_end = fb.code().emit_jump(Opcode::Jump, &[]);
    fb.code().patch_jump(to_else);
    fb.code().emit(Opcode::LoadInt, &[2]);
    fb.code().patch_jump(to_end);
    fb.code().emit(Opcode::Ret, &[]);

    let mut function = Function::new(fb.build());
    GraphBuilder::build_graph(&mut function);
    function.verify();
    seajit::lowering::GenericLowering::new(&mut function).lower();
    let mi = seajit::scheduler::NodeScheduler::new(&mut function).build_mi_function();

    // no node is emitted into more than one block
    let mut seen = std::collections::HashSet::new();
    for b in mi.blocks() {
        for instr in b.instructions() {
            assert!(
                seen.insert(instr.ir_node()),
                "node {:?} scheduled more than once",
                instr.ir_node()
            );
        }
    }

    // the join block carries the phi as a block argument, and both
    // predecessors feed it through their jump operands; the start block
    // also has arguments (the parameters), so select by predecessor count
    let join = mi
        .blocks()
        .iter()
        .find(|b| !b.arguments().is_empty() && b.in_edges().len() == 2)
        .expect("no join block with arguments");
    assert_eq!(join.in_edges().len(), 2);
    for &pred in join.in_edges() {
        let terminator = block_by_index(&mi, pred).terminator();
        assert_eq!(terminator.operand_count(), 1);
        assert!(terminator.operand(0).is_valid());
    }
}

/// Build a bare MI CFG for block-scheduler level tests. Every block gets a
/// placeholder instruction so opcode queries work.
fn manual_cfg(
    graph: &mut Graph,
    block_count: usize,
    edges: &[(BlockIndex, BlockIndex)],
) -> MIFunction {
    let mut mi = MIFunction::new();
    for _ in 0..block_count {
        let b = mi.add_block();
        let node = graph.create_constant_int(b as i32);
        mi.block_mut(b)
            .instructions_mut()
            .push(seajit::mi::MIInstr::new(node, 0));
    }
    for &(from, to) in edges {
        mi.block_mut(from).add_out_edge(to);
        mi.block_mut(to).add_in_edge(from);
    }
    mi
}

#[test]
fn deopt_blocks_are_laid_out_last() {
    init_logging();
    let mut graph = Graph::new();
    // 0 -> 1 -> 2, with deopt blocks 3 and 4 jumping back into block 2
    let mut mi = manual_cfg(&mut graph, 5, &[(0, 1), (1, 2), (3, 2), (4, 2)]);
    mi.block_mut(3).mark_as_deopt_block();
    mi.block_mut(4).mark_as_deopt_block();

    let dt = DominatorTree::new(&mi);
    let li = LoopInfo::new(&mi, &dt);
    let scheduler = BlockScheduler::new(&mi, &graph, &dt, &li);
    let sequence = scheduler.scheduled_block_sequence();

    assert_eq!(sequence.len(), 5);
    assert_eq!(&sequence[..3], &[0, 1, 2]);
    // deopt blocks last, in their original order
    assert_eq!(&sequence[3..], &[3, 4]);
}

#[test]
fn loop_groups_stay_contiguous() {
    init_logging();
    let mut graph = Graph::new();
    // 0 -> 1 (header) -> 2 -> 1, 1 -> 3; the exit must not interleave
    // with the loop body
    let mi = manual_cfg(&mut graph, 4, &[(0, 1), (1, 2), (2, 1), (1, 3)]);

    let dt = DominatorTree::new(&mi);
    let li = LoopInfo::new(&mi, &dt);
    let scheduler = BlockScheduler::new(&mi, &graph, &dt, &li);

    assert_eq!(scheduler.scheduled_block_sequence(), &[0, 1, 2, 3]);
    assert_eq!(scheduler.loop_ends_by_start_block().get(&1), Some(&2));
}

#[test]
fn nested_loops_group_fully() {
    init_logging();
    let mut graph = Graph::new();
    // outer loop 1..4 with inner loop 2..3
    let mi = manual_cfg(
        &mut graph,
        6,
        &[(0, 1), (1, 2), (2, 3), (3, 2), (3, 4), (4, 1), (4, 5)],
    );

    let dt = DominatorTree::new(&mi);
    let li = LoopInfo::new(&mi, &dt);
    let scheduler = BlockScheduler::new(&mi, &graph, &dt, &li);
    let sequence = scheduler.scheduled_block_sequence();

    assert_eq!(sequence.len(), 6);
    let pos = |b: BlockIndex| sequence.iter().position(|&x| x == b).unwrap();
    // the outer loop 1,2,3,4 occupies one contiguous range
    let outer: Vec<usize> = [1, 2, 3, 4].iter().map(|&b| pos(b)).collect();
    let min = *outer.iter().min().unwrap();
    let max = *outer.iter().max().unwrap();
    assert_eq!(max - min, 3);
    // the inner loop is nested inside it
    assert!(pos(2) > pos(1) && pos(3) > pos(1) && pos(4) > pos(1));
    assert_eq!(pos(3), pos(2) + 1);
    // the exit comes after everything in the loop
    assert_eq!(pos(5), 5);
}
