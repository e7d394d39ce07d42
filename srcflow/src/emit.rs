//! Render the tables and graphs of a session into files.

use std::borrow::Cow;
use std::io::Write;
use std::path::{Path, PathBuf};

use itertools::Itertools;

use crate::control_flow::ControlFlowGraph;
use crate::data_flow_graph::DataFlowGraph;
use crate::def_use::DefUseTable;
use crate::extraction_config::ExtractionConfig;
use crate::log::*;
use crate::session::ExtractionSession;

/// Which artifacts made it to disk
#[derive(Debug, Default)]
pub struct EmissionReport {
    pub written: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, std::io::Error)>,
}

impl EmissionReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    fn record(&mut self, path: PathBuf, result: std::io::Result<()>) {
        match result {
            Ok(()) => {
                trace!("Wrote artifact"; "path" => %path.display());
                self.written.push(path);
            }
            Err(e) => {
                warn!("Could not write artifact"; "path" => %path.display(), "error" => %e);
                self.failed.push((path, e));
            }
        }
    }
}

/// Keep only characters allowed in a DOT identifier
fn sanitize_id(s: &str) -> String {
    let mut r: String = s
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if r.starts_with(|c: char| c.is_ascii_digit()) {
        r.insert(0, '_');
    }
    r
}

/// Escape the field separators of record-shaped node labels in `s`. Quotes are left to
/// [`dot::LabelText::escaped`].
fn record_escape(s: &str) -> String {
    let mut r = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '\\' | '{' | '}' | '|' | '<' | '>') {
            r.push('\\');
        }
        r.push(c);
    }
    r
}

struct CfgDot<'a> {
    cfg: &'a ControlFlowGraph,
    /// Per-node label contents, one entry per line
    descriptions: Vec<Vec<String>>,
}

impl<'a> CfgDot<'a> {
    fn new(cfg: &'a ControlFlowGraph, def_use: &DefUseTable, config: &ExtractionConfig) -> Self {
        let descriptions = cfg
            .nodes
            .iter()
            .map(|n| {
                if config.cfg_node_descriptions {
                    n.lines
                        .iter()
                        .map(|l| def_use.describe(l, config))
                        .collect::<std::collections::BTreeSet<_>>()
                        .into_iter()
                        .collect()
                } else {
                    vec![]
                }
            })
            .collect();
        Self { cfg, descriptions }
    }
}

impl<'a> dot::Labeller<'a, usize, (usize, usize)> for CfgDot<'a> {
    fn graph_id(&'a self) -> dot::Id<'a> {
        dot::Id::new(format!("CFG_{}", sanitize_id(&self.cfg.function))).unwrap()
    }
    fn node_id(&'a self, n: &usize) -> dot::Id<'a> {
        dot::Id::new(format!("Node{}", n)).unwrap()
    }
    fn node_label<'b>(&'b self, n: &usize) -> dot::LabelText<'b> {
        let name = record_escape(&self.cfg.nodes[*n].name);
        let desc = &self.descriptions[*n];
        if desc.is_empty() {
            dot::LabelText::escaped(format!("{{{}}}", name))
        } else {
            dot::LabelText::escaped(format!(
                "{{{}|{}\\l}}",
                name,
                desc.iter().map(|d| record_escape(d)).join("\\l")
            ))
        }
    }
    fn node_shape(&'a self, _n: &usize) -> Option<dot::LabelText<'a>> {
        Some(dot::LabelText::label("record"))
    }
}

impl<'a> dot::GraphWalk<'a, usize, (usize, usize)> for CfgDot<'a> {
    fn nodes(&self) -> dot::Nodes<'a, usize> {
        Cow::Owned((0..self.cfg.nodes.len()).collect())
    }
    fn edges(&'a self) -> dot::Edges<'a, (usize, usize)> {
        Cow::Borrowed(&self.cfg.edges)
    }
    fn source(&self, e: &(usize, usize)) -> usize {
        e.0
    }
    fn target(&self, e: &(usize, usize)) -> usize {
        e.1
    }
}

/// A DFG edge, flagged when it is an instruction-level control edge
type DfgEdge = (usize, usize, bool);

struct DfgDot<'a> {
    dfg: &'a DataFlowGraph,
}

impl<'a> dot::Labeller<'a, usize, DfgEdge> for DfgDot<'a> {
    fn graph_id(&'a self) -> dot::Id<'a> {
        dot::Id::new(format!("DFG_{}", sanitize_id(&self.dfg.function))).unwrap()
    }
    fn node_id(&'a self, n: &usize) -> dot::Id<'a> {
        dot::Id::new(format!("Node{}", n)).unwrap()
    }
    fn node_label<'b>(&'b self, n: &usize) -> dot::LabelText<'b> {
        dot::LabelText::escaped(format!("{{{}}}", record_escape(&self.dfg.labels[*n])))
    }
    fn node_shape(&'a self, _n: &usize) -> Option<dot::LabelText<'a>> {
        Some(dot::LabelText::label("record"))
    }
    fn edge_color(&'a self, e: &DfgEdge) -> Option<dot::LabelText<'a>> {
        Some(dot::LabelText::label(if e.2 { "black" } else { "red" }))
    }
}

impl<'a> dot::GraphWalk<'a, usize, DfgEdge> for DfgDot<'a> {
    fn nodes(&self) -> dot::Nodes<'a, usize> {
        Cow::Owned((0..self.dfg.nodes.len()).collect())
    }
    fn edges(&'a self) -> dot::Edges<'a, DfgEdge> {
        let data = self.dfg.edges.iter().map(|&(s, t)| (s, t, false));
        let control = self.dfg.control_edges.iter().map(|&(s, t)| (s, t, true));
        Cow::Owned(data.chain(control).collect())
    }
    fn source(&self, e: &DfgEdge) -> usize {
        e.0
    }
    fn target(&self, e: &DfgEdge) -> usize {
        e.1
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> std::io::Result<String> {
    let mut s = serde_json::to_string_pretty(value)?;
    s.push('\n');
    Ok(s)
}

fn write_linecalls(path: &Path, lines: &[String], append: bool) -> std::io::Result<()> {
    let mut f = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .append(append)
        .truncate(!append)
        .open(path)?;
    for l in lines {
        writeln!(f, "{}", l)?;
    }
    Ok(())
}

/// Write every artifact of `session` into `out_dir`, creating it if needed. Each artifact is
/// attempted regardless of earlier failures.
pub fn emit(session: &ExtractionSession, out_dir: &Path) -> EmissionReport {
    let config = session.config();
    let mut report = EmissionReport::default();

    if let Err(e) = std::fs::create_dir_all(out_dir) {
        warn!("Could not create output directory"; "path" => %out_dir.display(), "error" => %e);
    }

    for (cfg, dfg) in session.cfgs.iter().zip(&session.dfgs) {
        let path = out_dir.join(format!("cfg.{}.dot", cfg.function));
        let g = CfgDot::new(cfg, &session.def_use, config);
        let res = std::fs::File::create(&path).and_then(|mut f| dot::render(&g, &mut f));
        report.record(path, res);

        let path = out_dir.join(format!("dfg.{}.dot", dfg.function));
        let g = DfgDot { dfg };
        let res = std::fs::File::create(&path).and_then(|mut f| dot::render(&g, &mut f));
        report.record(path, res);
    }

    let tables = [
        ("duVar.json", to_json(&session.def_use.normalized(config))),
        ("bbLine.json", to_json(&session.block_lines)),
        ("linebb.json", to_json(&session.line_blocks)),
        ("maxLine.json", to_json(&session.max_line)),
        ("bbFunc.json", to_json(&session.block_function)),
        ("funcEntry.json", to_json(&session.function_entry)),
        ("lineCallsPre.json", to_json(&session.calls.by_callee)),
        ("lineCallsPost.json", to_json(&session.calls.by_site)),
    ];
    for (name, contents) in tables {
        let path = out_dir.join(name);
        let res = contents.and_then(|s| std::fs::write(&path, s));
        report.record(path, res);
    }

    let path = out_dir.join("linecalls.txt");
    let res = write_linecalls(&path, &session.calls.log_lines, config.append_linecalls);
    report.record(path, res);

    info!("Emitted artifacts";
          "out_dir" => %out_dir.display(),
          "written" => report.written.len(),
          "failed" => report.failed.len());
    report
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn identifiers_and_labels_are_escaped() {
        assert_eq!(sanitize_id("main"), "main");
        assert_eq!(sanitize_id("foo.bar$1"), "foo_bar_1");
        assert_eq!(sanitize_id("1x"), "_1x");
        assert_eq!(record_escape("a.c:3#1"), "a.c:3#1");
        assert_eq!(record_escape("{a|b}"), "\\{a\\|b\\}");
    }
}
