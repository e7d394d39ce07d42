//! Source-variable def-use tables, keyed by source location.

use std::collections::{BTreeMap, BTreeSet};

use itertools::Itertools;

use crate::extraction_config::ExtractionConfig;
use crate::il::{FuncId, Module, Opcode, Operand};
use crate::location::{Resolution, SourceLocation};
use crate::log::*;
use crate::variable_names::VariableNameResolver;

/// The variables defined and used at one source location
#[derive(Clone, PartialEq, Eq, Debug, Default, serde::Serialize)]
pub struct DefUse {
    pub def: BTreeSet<String>,
    #[serde(rename = "use")]
    pub uses: BTreeSet<String>,
}

/// Def-use sets of every source location of a module. Names are kept exactly as resolved;
/// storage-shadow suffixes are only stripped by [`DefUseTable::normalized`].
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct DefUseTable {
    entries: BTreeMap<SourceLocation, DefUse>,
}

impl DefUseTable {
    pub fn get(&self, loc: &SourceLocation) -> Option<&DefUse> {
        self.entries.get(loc)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SourceLocation, &DefUse)> {
        self.entries.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn define(&mut self, loc: &SourceLocation, name: String) {
        if !name.is_empty() {
            self.entries.entry(loc.clone()).or_default().def.insert(name);
        }
    }

    fn use_(&mut self, loc: &SourceLocation, name: String) {
        if !name.is_empty() {
            self.entries.entry(loc.clone()).or_default().uses.insert(name);
        }
    }

    /// The table as it should be shown externally, with storage-shadow suffixes stripped
    pub fn normalized(&self, config: &ExtractionConfig) -> BTreeMap<SourceLocation, DefUse> {
        let norm = |names: &BTreeSet<String>| {
            names
                .iter()
                .map(|n| config.normalize_variable_name(n).to_owned())
                .collect()
        };
        self.entries
            .iter()
            .map(|(loc, du)| {
                (
                    loc.clone(),
                    DefUse {
                        def: norm(&du.def),
                        uses: norm(&du.uses),
                    },
                )
            })
            .collect()
    }

    /// `<loc>-def:a,b-use:c`, with normalized names
    pub fn describe(&self, loc: &SourceLocation, config: &ExtractionConfig) -> String {
        let join = |names: &BTreeSet<String>| {
            names
                .iter()
                .map(|n| config.normalize_variable_name(n))
                .sorted()
                .dedup()
                .join(",")
        };
        match self.entries.get(loc) {
            Some(du) => format!("{}-def:{}-use:{}", loc, join(&du.def), join(&du.uses)),
            None => format!("{}-def:-use:", loc),
        }
    }
}

pub struct DefUseTableBuilder<'a> {
    module: &'a Module,
    locations: &'a [Resolution],
    names: &'a VariableNameResolver<'a>,
    config: &'a ExtractionConfig,
}

impl<'a> DefUseTableBuilder<'a> {
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

    /// Add the def-use information of every in-scope instruction of `f` into `table`
    pub fn record(&self, f: FuncId, table: &mut DefUseTable) {
        for i in self.module.instructions_of(f) {
            let loc = match self.locations[i.index()].in_scope() {
                Some(loc) => loc,
                None => continue,
            };
            let insn = self.module.insn(i);
            match &insn.opcode {
                Opcode::Store => {
                    let (dest, values) = insn
                        .operands
                        .split_last()
                        .expect("Stores are validated to have two operands");
                    table.define(loc, self.names.resolve(dest));
                    for v in values {
                        table.use_(loc, self.names.resolve(v));
                    }
                }
                Opcode::Load => {
                    table.use_(loc, self.names.resolve(&insn.operands[0]));
                }
                Opcode::BitCast => {
                    table.define(loc, self.names.resolve(&Operand::Insn(i)));
                }
                Opcode::Call => {
                    if let Some(callee) = &insn.callee {
                        if self.config.is_blacklisted(callee) {
                            trace!("Ignoring arguments of call to blacklisted function";
                                   "callee" => callee, "loc" => %loc);
                            continue;
                        }
                    }
                    for arg in &insn.operands {
                        let resolved = self.names.resolve_with_type(arg);
                        // A pointer argument may be written through by the callee
                        if resolved.leaf_type.map_or(false, |t| t.is_pointer()) {
                            table.define(loc, resolved.name.clone());
                        }
                        table.use_(loc, resolved.name);
                    }
                }
                Opcode::Phi | Opcode::Other(_) => {}
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::il::{DebugLoc, Instruction, ValueType};
    use crate::location::LocationResolver;

    fn names(xs: &[&str]) -> BTreeSet<String> {
        xs.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn classification_by_opcode() {
        let mut m = Module::new("m");
        let f = m.begin_function("f", [Some("p".to_owned())]);
        let bb = m.add_block();
        let at = |l| DebugLoc::new("t.c", l);
        let p_addr = m.add_instruction(
            bb,
            Instruction::new(Opcode::Other("alloca".into()))
                .with_result("p.addr", ValueType::Pointer)
                .at(at(1)),
        );
        let x = m.add_instruction(
            bb,
            Instruction::new(Opcode::Other("alloca".into()))
                .with_result("x", ValueType::Pointer)
                .at(at(1)),
        );
        m.add_instruction(
            bb,
            Instruction::new(Opcode::Store)
                .with_operands([Operand::Terminal, Operand::Insn(p_addr)])
                .at(at(2)),
        );
        let v = m.add_instruction(
            bb,
            Instruction::new(Opcode::Load)
                .with_operands([Operand::Insn(p_addr)])
                .with_type(ValueType::Integer)
                .at(at(3)),
        );
        m.add_instruction(
            bb,
            Instruction::new(Opcode::Store)
                .with_operands([Operand::Insn(v), Operand::Insn(x)])
                .at(at(3)),
        );
        m.add_instruction(
            bb,
            Instruction::new(Opcode::BitCast)
                .with_operands([Operand::Insn(x)])
                .with_result("xc", ValueType::Pointer)
                .at(at(4)),
        );
        m.add_instruction(
            bb,
            Instruction::new(Opcode::Call)
                .with_operands([Operand::Insn(x), Operand::Insn(v), Operand::Terminal])
                .calling("g")
                .at(at(5)),
        );
        m.add_instruction(
            bb,
            Instruction::new(Opcode::Call)
                .with_operands([Operand::Insn(x)])
                .calling("free")
                .at(at(6)),
        );
        m.add_instruction(
            bb,
            Instruction::new(Opcode::Phi)
                .with_operands([Operand::Insn(v)])
                .with_result("merged", ValueType::Integer)
                .at(at(7)),
        );
        m.end_function();

        let config = ExtractionConfig::default();
        let resolver = LocationResolver::new(&config);
        let locs: Vec<Resolution> = m.instructions.iter().map(|i| resolver.resolve(i)).collect();
        let vn = VariableNameResolver::new(&m, config.max_search_depth);
        let mut table = DefUseTable::default();
        DefUseTableBuilder::new(&m, &locs, &vn, &config).record(f, &mut table);

        let loc = |l| SourceLocation::new("t.c", l);
        // Allocations alone define nothing
        assert_eq!(table.get(&loc(1)), None);
        // The constant stored has no name
        assert_eq!(table.get(&loc(2)).unwrap().def, names(&["p.addr"]));
        assert!(table.get(&loc(2)).unwrap().uses.is_empty());
        assert_eq!(table.get(&loc(3)).unwrap().def, names(&["x"]));
        assert_eq!(table.get(&loc(3)).unwrap().uses, names(&["p.addr"]));
        // A named cast defines itself
        assert_eq!(table.get(&loc(4)).unwrap().def, names(&["xc"]));
        // `x` is a pointer, `v` resolves to the stack slot it was loaded from
        assert_eq!(table.get(&loc(5)).unwrap().def, names(&["p.addr", "x"]));
        assert_eq!(table.get(&loc(5)).unwrap().uses, names(&["p.addr", "x"]));
        assert_eq!(table.get(&loc(6)), None);
        assert_eq!(table.get(&loc(7)), None);
        assert!(table.iter().all(|(_, du)| !du.def.contains("") && !du.uses.contains("")));

        // Only the emitted view is normalized
        let normalized = table.normalized(&config);
        assert_eq!(normalized[&loc(3)].uses, names(&["p"]));
        assert_eq!(table.describe(&loc(3), &config), "t.c:3-def:x-use:p");
        assert_eq!(table.describe(&loc(1), &config), "t.c:1-def:-use:");
    }
}
