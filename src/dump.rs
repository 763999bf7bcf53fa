//! `UDump`: graph serializer that walks the pipe graph from one or more
//! source pipes and emits a dot-format description (spec.md §2 "UDump
//! (2%)", §4.11).
//!
//! Grounded on the original library's `upipe_dump.c`, which walks a
//! `ulist` of visited pipes and prints `digraph`/subgraph/label lines;
//! here the same walk is expressed over [`crate::pipe::UPipe`] handles,
//! tracking visited-pipe identity in a side table instead of hijacking
//! each pipe's opaque slot for traversal state (spec.md's own REDESIGN
//! FLAGS rule out reusing the opaque slot as transient storage, since
//! Rust has no equivalent of safely aliasing a `void *` the caller
//! still owns).

use crate::pipe::UPipe;
use fnv::FnvHashMap;
use std::fmt::Write as _;

struct VisitState {
    id: usize,
    output_dumped: bool,
}

/// Walk the graph reachable from `roots` following each pipe's `output`
/// link and sub-pipe table, emitting a Graphviz `digraph` description.
/// Bins render as subgraphs; sub-pipe edges are dashed.
pub fn dump(roots: &[UPipe]) -> String {
    let mut visited: FnvHashMap<*const (), VisitState> = FnvHashMap::default();
    let mut next_id = 0usize;
    let mut out = String::new();
    out.push_str("digraph upipe {\n");

    for root in roots {
        walk(root, &mut visited, &mut next_id, &mut out);
    }

    out.push_str("}\n");
    out
}

fn identity(pipe: &UPipe) -> *const () {
    pipe.identity()
}

fn walk(pipe: &UPipe, visited: &mut FnvHashMap<*const (), VisitState>, next_id: &mut usize, out: &mut String) {
    let key = identity(pipe);
    if visited.contains_key(&key) {
        return;
    }
    let id = *next_id;
    *next_id += 1;
    visited.insert(key, VisitState { id, output_dumped: false });

    let label = pipe.flow_def().and_then(|f| f.flow_def_name().map(str::to_string)).unwrap_or_else(|| "pipe".to_string());
    let _ = writeln!(out, "  n{id} [label=\"{label}\"];");

    let sub_pipes = pipe.iterate_sub();
    if !sub_pipes.is_empty() {
        let _ = writeln!(out, "  subgraph cluster_{id} {{");
        for sub in &sub_pipes {
            walk(sub, visited, next_id, out);
            let sub_id = visited.get(&identity(sub)).unwrap().id;
            let _ = writeln!(out, "  n{id} -> n{sub_id} [style=dashed];");
        }
        out.push_str("  }\n");
    }

    if let Some(output) = pipe.output() {
        walk(&output, visited, next_id, out);
        let out_id = visited.get(&identity(&output)).unwrap().id;
        let _ = writeln!(out, "  n{id} -> n{out_id};");
        if let Some(state) = visited.get_mut(&key) {
            state.output_dumped = true;
        }
    }
}
