//! Per-function instruction-level data-flow graphs.

use itertools::Itertools;

use crate::containers::unordered::UnorderedSet;
use crate::containers::InsertionOrderedSet;
use crate::control_flow::instruction_edges;
use crate::extraction_config::ExtractionConfig;
use crate::il::{FuncId, InsnId, Module, Opcode, Operand};
use crate::location::Resolution;
use crate::log::*;
use crate::variable_names::VariableNameResolver;

/// A value taking part in data flow
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub enum DfgNode {
    Insn(InsnId),
    Global(String),
}

impl DfgNode {
    /// The node standing for `op`, if it has a producer
    fn of(op: &Operand) -> Option<Self> {
        match op {
            Operand::Insn(i) => Some(DfgNode::Insn(*i)),
            Operand::Global(g) => Some(DfgNode::Global(g.clone())),
            Operand::Terminal => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct DataFlowGraph {
    pub function: String,
    /// Nodes, in order of first appearance
    pub nodes: Vec<DfgNode>,
    /// Label of each node, indexed like `nodes`
    pub labels: Vec<String>,
    /// Data-flow edges between `nodes`, without duplicates
    pub edges: Vec<(usize, usize)>,
    /// Instruction-level control edges, only filled in when requested by the configuration
    pub control_edges: Vec<(usize, usize)>,
}

pub struct DataFlowGraphBuilder<'a> {
    module: &'a Module,
    locations: &'a [Resolution],
    names: &'a VariableNameResolver<'a>,
    config: &'a ExtractionConfig,
}

impl<'a> DataFlowGraphBuilder<'a> {
    pub fn new(
        module: &'a Module,
        locations: &'a [Resolution],
        names: &'a VariableNameResolver<'a>,
        config: &'a ExtractionConfig,
    ) -> Self {
        Self {
            module,
            locations,
            names,
            config,
        }
    }

    pub fn build(&self, f: FuncId) -> DataFlowGraph {
        let mut nodes = InsertionOrderedSet::new();
        let mut edges = vec![];
        let mut seen = UnorderedSet::new();
        let mut add_edge =
            |nodes: &mut InsertionOrderedSet<DfgNode>, src: DfgNode, tgt: DfgNode| {
                let e = (nodes.insert(src), nodes.insert(tgt));
                if seen.insert(e) {
                    edges.push(e);
                }
            };

        for i in self.module.instructions_of(f) {
            if self.locations[i.index()].is_library_internal() {
                trace!("Library-internal instruction originates no data-flow edge"; "insn" => ?i);
                continue;
            }
            let insn = self.module.insn(i);
            let this = DfgNode::Insn(i);
            match &insn.opcode {
                Opcode::Load => {
                    if let Some(ptr) = DfgNode::of(&insn.operands[0]) {
                        add_edge(&mut nodes, ptr, this);
                    }
                }
                Opcode::Store => {
                    // The store sits between the value read and the location written
                    if let Some(val) = DfgNode::of(&insn.operands[0]) {
                        add_edge(&mut nodes, val, this.clone());
                    }
                    if let Some(ptr) = DfgNode::of(&insn.operands[1]) {
                        add_edge(&mut nodes, this, ptr);
                    }
                }
                Opcode::BitCast | Opcode::Call | Opcode::Phi | Opcode::Other(_) => {
                    for op in &insn.operands {
                        if let Operand::Insn(p) = op {
                            add_edge(&mut nodes, DfgNode::Insn(*p), this.clone());
                        }
                    }
                }
            }
        }

        let mut control_edges = vec![];
        if self.config.dfg_control_edges {
            for (a, b) in instruction_edges(self.module, f) {
                control_edges.push((
                    nodes.insert(DfgNode::Insn(a)),
                    nodes.insert(DfgNode::Insn(b)),
                ));
            }
        }

        let nodes = nodes.into_vec();
        let labels = nodes.iter().map(|n| self.label(n)).collect();
        DataFlowGraph {
            function: self.module.function(f).name.clone(),
            nodes,
            labels,
            edges,
            control_edges,
        }
    }

    fn label(&self, n: &DfgNode) -> String {
        match n {
            DfgNode::Global(g) => format!("@{}", g),
            DfgNode::Insn(i) => {
                let loc = self.locations[i.index()].to_string();
                if self.config.dfg_operand_names {
                    let operand_names = self
                        .module
                        .insn(*i)
                        .operands
                        .iter()
                        .map(|op| self.names.resolve(op))
                        .filter(|n| !n.is_empty())
                        .join(",");
                    format!("{}:{}", loc, operand_names)
                } else {
                    loc
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::il::{DebugLoc, Instruction, ValueType};
    use crate::location::LocationResolver;

    fn build(m: &Module, f: FuncId, config: &ExtractionConfig) -> DataFlowGraph {
        let resolver = LocationResolver::new(config);
        let locs: Vec<Resolution> = m.instructions.iter().map(|i| resolver.resolve(i)).collect();
        let names = VariableNameResolver::new(m, config.max_search_depth);
        DataFlowGraphBuilder::new(m, &locs, &names, config).build(f)
    }

    fn edge_set(g: &DataFlowGraph) -> Vec<(DfgNode, DfgNode)> {
        g.edges
            .iter()
            .map(|&(s, t)| (g.nodes[s].clone(), g.nodes[t].clone()))
            .collect()
    }

    #[test]
    fn memory_and_operand_edges() {
        let mut m = Module::new("m");
        let f = m.begin_function("f", [Some("n".to_owned())]);
        let bb = m.add_block();
        let loc = || DebugLoc::new("a.c", 2);
        let x = m.add_instruction(
            bb,
            Instruction::new(Opcode::Other("alloca".into()))
                .with_result("x", ValueType::Pointer)
                .at(loc()),
        );
        let st = m.add_instruction(
            bb,
            Instruction::new(Opcode::Store)
                .with_operands([Operand::Terminal, Operand::Insn(x)])
                .at(loc()),
        );
        let ld = m.add_instruction(
            bb,
            Instruction::new(Opcode::Load)
                .with_operands([Operand::Insn(x)])
                .with_type(ValueType::Integer)
                .at(loc()),
        );
        let add = m.add_instruction(
            bb,
            Instruction::new(Opcode::Other("add".into()))
                .with_operands([Operand::Insn(ld), Operand::Terminal])
                .with_result("add", ValueType::Integer)
                .at(loc()),
        );
        let st2 = m.add_instruction(
            bb,
            Instruction::new(Opcode::Store)
                .with_operands([Operand::Insn(add), Operand::Global("g".into())])
                .at(loc()),
        );
        m.end_function();

        let config = ExtractionConfig::default();
        let g = build(&m, f, &config);
        use DfgNode::*;
        assert_eq!(
            edge_set(&g),
            vec![
                (Insn(st), Insn(x)),
                (Insn(x), Insn(ld)),
                (Insn(ld), Insn(add)),
                (Insn(add), Insn(st2)),
                (Insn(st2), Global("g".into())),
            ]
        );
        assert!(g.control_edges.is_empty());
        assert_eq!(g.labels.iter().filter(|l| *l == "a.c:2").count(), 5);
        assert!(g.labels.contains(&"@g".to_owned()));
    }

    #[test]
    fn library_instructions_originate_no_edges() {
        let mut m = Module::new("m");
        let f = m.begin_function("f", []);
        let bb = m.add_block();
        let a = m.add_instruction(
            bb,
            Instruction::new(Opcode::Other("alloca".into()))
                .with_result("a", ValueType::Pointer)
                .at(DebugLoc::new("/usr/include/x.h", 3)),
        );
        let l = m.add_instruction(
            bb,
            Instruction::new(Opcode::Load)
                .with_operands([Operand::Insn(a)])
                .with_result("v", ValueType::Integer)
                .at(DebugLoc::new("/usr/include/x.h", 4)),
        );
        let u = m.add_instruction(
            bb,
            Instruction::new(Opcode::Other("add".into()))
                .with_operands([Operand::Insn(l), Operand::Insn(a)])
                .with_result("w", ValueType::Integer),
        );
        m.end_function();

        let mut config = ExtractionConfig::default();
        config.dfg_operand_names = true;
        let g = build(&m, f, &config);
        use DfgNode::*;
        // The load itself is skipped, but the unlocated add still points back at it
        assert_eq!(edge_set(&g), vec![(Insn(l), Insn(u)), (Insn(a), Insn(u))]);
        assert_eq!(g.labels, vec!["undefined:a", "undefined:v,a", "undefined:"]);
    }

    #[test]
    fn control_edges_overlay_on_request() {
        let mut m = Module::new("m");
        let f = m.begin_function("f", []);
        let b0 = m.add_block();
        let b1 = m.add_block();
        m.set_successors(b0, [b1]);
        let i0 = m.add_instruction(b0, Instruction::new(Opcode::Other("br".into())));
        let i1 = m.add_instruction(b1, Instruction::new(Opcode::Other("ret".into())));
        m.end_function();

        let mut config = ExtractionConfig::default();
        config.dfg_control_edges = true;
        let g = build(&m, f, &config);
        assert!(g.edges.is_empty());
        assert_eq!(g.nodes, vec![DfgNode::Insn(i0), DfgNode::Insn(i1)]);
        assert_eq!(g.control_edges, vec![(0, 1)]);
    }
}
