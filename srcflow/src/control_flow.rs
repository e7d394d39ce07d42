//! Per-function control-flow graphs over named basic blocks.

use crate::block_naming::{BlockNames, NamedFunction};
use crate::containers::unordered::{UnorderedMap, UnorderedSet};
use crate::il::{BlockId, FuncId, InsnId, Module};
use crate::location::SourceLocation;

/// A CFG node: a named block together with the in-scope lines it contains
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CfgNode {
    pub block: BlockId,
    pub name: String,
    pub lines: Vec<SourceLocation>,
}

#[derive(Clone, Debug)]
pub struct ControlFlowGraph {
    pub function: String,
    pub nodes: Vec<CfgNode>,
    /// Edges between `nodes`, as indexes into it. Unnamed blocks are bridged over, so an edge
    /// `a -> b` exists whenever `b` is reachable from `a` through unnamed blocks only.
    pub edges: Vec<(usize, usize)>,
    /// See [`instruction_edges`]
    pub insn_edges: Vec<(InsnId, InsnId)>,
}

impl ControlFlowGraph {
    /// Build the CFG of `f` from the blocks named by `named`. Returns `None` if no block of the
    /// function got a name.
    pub fn build(
        module: &Module,
        f: FuncId,
        named: &NamedFunction,
        names: &BlockNames,
    ) -> Option<Self> {
        if named.blocks.is_empty() {
            return None;
        }
        let func = module.function(f);

        let nodes: Vec<CfgNode> = named
            .blocks
            .iter()
            .map(|(bb, lines)| CfgNode {
                block: *bb,
                name: names
                    .get(*bb)
                    .expect("Blocks reported as named have a name")
                    .to_owned(),
                lines: lines.clone(),
            })
            .collect();
        let node_of: UnorderedMap<BlockId, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.block, i))
            .collect();

        let mut edges = vec![];
        let mut seen_edges = UnorderedSet::new();
        for (src, node) in nodes.iter().enumerate() {
            for tgt in named_successors(module, node.block, &node_of) {
                if seen_edges.insert((src, tgt)) {
                    edges.push((src, tgt));
                }
            }
        }

        Some(Self {
            function: func.name.clone(),
            nodes,
            edges,
            insn_edges: instruction_edges(module, f),
        })
    }

    /// Names of the blocks at both ends of each edge
    pub fn named_edges(&self) -> impl Iterator<Item = (&str, &str)> {
        self.edges
            .iter()
            .map(move |&(s, t)| (self.nodes[s].name.as_str(), self.nodes[t].name.as_str()))
    }
}

/// Instruction-level control edges of `f`: consecutive instructions of a block, and each block's
/// terminator to the first instruction of each of its successors.
pub fn instruction_edges(module: &Module, f: FuncId) -> Vec<(InsnId, InsnId)> {
    let mut edges = vec![];
    for &bb in &module.function(f).blocks {
        let block = module.block(bb);
        for w in block.instructions.windows(2) {
            edges.push((w[0], w[1]));
        }
        if let Some(&terminator) = block.instructions.last() {
            for &succ in &block.successors {
                if let Some(&first) = module.block(succ).instructions.first() {
                    edges.push((terminator, first));
                }
            }
        }
    }
    edges
}

/// Nodes reachable from `bb` by following successors through unnamed blocks only, in successor
/// order.
fn named_successors(
    module: &Module,
    bb: BlockId,
    node_of: &UnorderedMap<BlockId, usize>,
) -> Vec<usize> {
    let mut result = vec![];
    let mut visited: UnorderedSet<BlockId> = UnorderedSet::new();
    let mut worklist: Vec<BlockId> = module.block(bb).successors.iter().rev().copied().collect();
    while let Some(s) = worklist.pop() {
        if let Some(&n) = node_of.get(&s) {
            if !result.contains(&n) {
                result.push(n);
            }
        } else if visited.insert(s) {
            worklist.extend(module.block(s).successors.iter().rev().copied());
        }
    }
    result
}
