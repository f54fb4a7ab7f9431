//! Debug-only graph dumps: a JSON rendition of nodes and typed edges, and
//! a dot rendition for graphviz. Both go through `tracing` and are off by
//! default; neither is part of the compiler contract.

use serde_json::{json, Value as Json};
use tracing::debug;

use crate::bytecode::Value;

use super::function::Function;
use super::node::{NodeCollector, NodeId};
use super::operation::OpKind;

/// Dump the function's graph under the `seajit::ir::json` and
/// `seajit::ir::dot` targets.
pub fn dump(f: &Function, description: &str) {
    if tracing::enabled!(target: "seajit::ir::json", tracing::Level::DEBUG) {
        let text = serde_json::to_string_pretty(&json_dump(f)).unwrap_or_default();
        debug!(target: "seajit::ir::json", "{}:", description);
        for line in text.lines() {
            debug!(target: "seajit::ir::json", "{}", line);
        }
    }

    if tracing::enabled!(target: "seajit::ir::dot", tracing::Level::DEBUG) {
        debug!(target: "seajit::ir::dot", "{}", dot(f, description));
    }
}

fn constant_to_json(v: &Value) -> Json {
    match v {
        Value::Undefined | Value::Empty => Json::Null,
        Value::Null => Json::Null,
        Value::Bool(b) => json!(b),
        Value::Int32(i) => json!(i),
        Value::Double(d) => json!(d),
        Value::String(s) => json!(s.as_ref()),
        Value::Managed(_) => json!("<managed>"),
    }
}

fn node_to_json(f: &Function, n: NodeId) -> Json {
    let graph = f.graph();
    let op = graph.op(n);
    let mut obj = json!({
        "id": n.index(),
        "kind": op.debug_string(),
    });
    match op.kind() {
        OpKind::Parameter => {
            let (index, name) = op.parameter_payload().unwrap();
            obj["name"] = json!(f.string(name));
            obj["index"] = json!(index);
        }
        OpKind::Constant => {
            if let Some(v) = op.constant_payload() {
                obj["value"] = constant_to_json(v);
            }
        }
        _ => {}
    }
    obj
}

/// The structured dump: all reachable nodes plus their typed edges.
pub fn json_dump(f: &Function) -> Json {
    let graph = f.graph();
    let mut nodes = Vec::new();
    let mut edges = Vec::new();

    let mut collector = NodeCollector::new(graph, /* collect_uses */ true, false);
    collector.sort_by_id();
    for &n in collector.reachable() {
        nodes.push(node_to_json(f, n));
        let op = graph.op(n);
        for (input_index, input) in graph.inputs(n).enumerate() {
            let Some(input) = input else { continue };
            let kind = if input_index < op.value_input_count() {
                "value"
            } else if input_index < op.value_input_count() + op.effect_input_count() {
                "effect"
            } else {
                "control"
            };
            edges.push(json!({
                "from": input.index(),
                "to": n.index(),
                "index": input_index,
                "type": kind,
            }));
        }
    }

    json!({
        "name": f.name(),
        "graph": { "nodes": nodes, "edges": edges },
    })
}

fn skip_framestate_in_dot() -> bool {
    static SKIP: std::sync::OnceLock<bool> = std::sync::OnceLock::new();
    *SKIP.get_or_init(|| std::env::var_os("SEAJIT_DOT_SKIP_FRAMESTATE").is_some())
}

/// Render the graph in dot format. Value inputs are solid edges, effect
/// inputs dotted, control inputs dashed.
pub fn dot(f: &Function, description: &str) -> String {
    let graph = f.graph();

    let node_line = |n: NodeId| {
        format!(
            "n{}[label=\"{}: {}{}\"];\n",
            n.index(),
            n.index(),
            graph.op(n).debug_string(),
            if graph.is_dead(n) { " (dead)" } else { "" }
        )
    };

    let mut out = String::from("\n");
    out += &format!(
        "digraph{{root=\"n{}\" label=\"{}\";node[shape=rect];edge[dir=back fontsize=10];\n",
        graph.start_node().index(),
        description
    );
    out += &node_line(graph.start_node());

    let collector = NodeCollector::new(graph, false, skip_framestate_in_dot());
    for &n in collector.reachable() {
        if n == graph.start_node() {
            continue;
        }

        out += &node_line(n);

        let op = graph.op(n);
        for (input_index, input) in graph.inputs(n).enumerate() {
            let Some(input) = input else { continue };
            out += &format!("n{}->n{}[style=", input.index(), n.index());
            if input_index < op.value_input_count()
                || op.index_of_frame_state_input() == Some(input_index)
            {
                out += &format!("solid headlabel=\"{}\"", input_index);
            } else if input_index < op.value_input_count() + op.effect_input_count() {
                out += &format!("dotted headlabel=\"{}\"", input_index);
            } else {
                out += &format!("dashed headlabel=\"{}\"", input_index);
            }
            out += "];\n";
        }
    }
    out += "}\n";
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{CompiledFunction, Opcode};
    use crate::graphbuilder::GraphBuilder;
    use std::collections::HashSet;

    fn small_function() -> Function {
        let mut fb = CompiledFunction::builder("f");
        fb.code().emit(Opcode::LoadInt, &[7]);
        fb.code().emit(Opcode::Ret, &[]);
        let mut function = Function::new(fb.build());
        GraphBuilder::build_graph(&mut function);
        function
    }

    #[test]
    fn test_json_dump_matches_reachable_node_set() {
        let function = small_function();
        let dumped = json_dump(&function);

        let mut collector = NodeCollector::new(function.graph(), true, false);
        collector.sort_by_id();
        let expected: HashSet<usize> =
            collector.reachable().iter().map(|n| n.index()).collect();

        let nodes = dumped["graph"]["nodes"].as_array().unwrap();
        let dumped_ids: HashSet<usize> = nodes
            .iter()
            .map(|n| n["id"].as_u64().unwrap() as usize)
            .collect();
        assert_eq!(dumped_ids, expected);

        // every edge connects two dumped nodes and has a typed kind
        for edge in dumped["graph"]["edges"].as_array().unwrap() {
            assert!(dumped_ids.contains(&(edge["from"].as_u64().unwrap() as usize)));
            assert!(dumped_ids.contains(&(edge["to"].as_u64().unwrap() as usize)));
            let kind = edge["type"].as_str().unwrap();
            assert!(matches!(kind, "value" | "effect" | "control"));
        }
    }

    #[test]
    fn test_dot_output_mentions_every_reachable_node() {
        let function = small_function();
        let out = dot(&function, "test");
        let collector = NodeCollector::new(function.graph(), false, false);
        for n in collector.reachable() {
            assert!(out.contains(&format!("n{}[", n.index())));
        }
        assert!(out.starts_with('\n'));
        assert!(out.ends_with("}\n"));
    }
}
