//! Name basic blocks after the earliest in-scope source line they contain.

use crate::containers::unordered::UnorderedSet;
use crate::extraction_config::UnnamedBlockPolicy;
use crate::il::{BlockId, FuncId, Module};
use crate::location::{Resolution, SourceLocation};
use crate::log::*;

/// Names assigned to the blocks of a module. Each name is assigned at most once and never
/// changes afterwards. Names are unique across the module: a block whose first line collides with
/// an already-named block gets a `#n` suffix.
#[derive(Debug)]
pub struct BlockNames {
    names: Vec<Option<String>>,
    taken: UnorderedSet<String>,
}

impl BlockNames {
    pub fn new(num_blocks: usize) -> Self {
        Self {
            names: vec![None; num_blocks],
            taken: Default::default(),
        }
    }

    pub fn get(&self, block: BlockId) -> Option<&str> {
        self.names[block.0].as_deref()
    }

    /// Assign `base` (made unique if needed) to `block`, returning the name actually used. If the
    /// block already has a name, it is kept and returned instead.
    fn assign(&mut self, block: BlockId, base: String) -> &str {
        if self.names[block.0].is_none() {
            let mut name = base.clone();
            let mut n = 1;
            while self.taken.contains(&name) {
                name = format!("{}#{}", base, n);
                n += 1;
            }
            self.taken.insert(name.clone());
            self.names[block.0] = Some(name);
        }
        self.names[block.0].as_deref().unwrap()
    }
}

/// Everything learnt while naming one function's blocks
#[derive(Debug, Default)]
pub struct NamedFunction {
    /// Named blocks of the function, in block order, with the in-scope locations each contains
    /// (in instruction order, without duplicates)
    pub blocks: Vec<(BlockId, Vec<SourceLocation>)>,
    /// Name of the entry block, if it got one
    pub entry: Option<String>,
}

pub struct BlockNamer<'a> {
    module: &'a Module,
    locations: &'a [Resolution],
    policy: UnnamedBlockPolicy,
}

impl<'a> BlockNamer<'a> {
    /// `locations` holds the resolved location of every instruction of `module`, indexed by
    /// instruction.
    pub fn new(
        module: &'a Module,
        locations: &'a [Resolution],
        policy: UnnamedBlockPolicy,
    ) -> Self {
        Self {
            module,
            locations,
            policy,
        }
    }

    /// Name every block of `f`. The first instruction (in order) with an in-scope location names
    /// its block `<file>:<line>`.
    pub fn name_function(&self, f: FuncId, names: &mut BlockNames) -> NamedFunction {
        let func = self.module.function(f);
        let mut result = NamedFunction::default();

        for (idx, &bb) in func.blocks.iter().enumerate() {
            let mut lines: Vec<SourceLocation> = vec![];
            for &i in &self.module.block(bb).instructions {
                if let Some(loc) = self.locations[i.index()].in_scope() {
                    if !lines.contains(loc) {
                        lines.push(loc.clone());
                    }
                }
            }
            match (lines.first(), self.policy) {
                (Some(first), _) => {
                    names.assign(bb, first.to_string());
                }
                (None, UnnamedBlockPolicy::Fallback) => {
                    let name = names.assign(bb, format!("{}:%{}", func.name, idx));
                    trace!("Block has no in-scope line; using fallback name"; "name" => name);
                }
                (None, UnnamedBlockPolicy::Exclude) => {
                    trace!("Block has no in-scope line; leaving unnamed";
                           "function" => &func.name, "block" => ?bb);
                    continue;
                }
            }
            result.blocks.push((bb, lines));
        }

        result.entry = func
            .entry_block()
            .and_then(|bb| names.get(bb))
            .map(str::to_owned);
        result
    }
}
