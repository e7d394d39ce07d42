//! Recover source-variable names for operands by a forward search over producer chains.
//!
//! Compiler-only operations (address computation, casts, loads of stack slots) sit between a
//! source variable and its uses. Following an operand back through the instructions that produced
//! it, and keeping the deepest name seen, recovers the variable the source code talked about. A
//! named load or cast is itself a source-level variable, so the walk stops there.
//!
//! The search is recursive, guarded by the set of instructions on the current path (operand graphs
//! are expected to be acyclic except through phi-nodes, but this is not trusted) and by a depth cap.

use std::collections::BTreeSet;

use crate::containers::unordered::UnorderedSet;
use crate::il::{InsnId, Instruction, Module, Opcode, Operand, ValueType};
use crate::log::*;

/// The best name found so far, along with the type of the instruction (or global) it came from.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct ResolvedName {
    /// Empty if no name was found
    pub name: String,
    /// Type of the leaf the name came from; `None` if no name was found
    pub leaf_type: Option<ValueType>,
}

pub struct VariableNameResolver<'a> {
    module: &'a Module,
    max_depth: usize,
}

impl<'a> VariableNameResolver<'a> {
    pub fn new(module: &'a Module, max_depth: usize) -> Self {
        Self { module, max_depth }
    }

    /// The best-effort declared-variable name reachable from `op`. Empty if none.
    ///
    /// The last name assigned during a pre-order walk of the producer chain wins, so deeper names
    /// override shallower ones. Phi-nodes are opaque: neither their name nor their operands take
    /// part. Named loads and casts are leaves: their own name is final.
    pub fn resolve(&self, op: &Operand) -> String {
        self.resolve_with_type(op).name
    }

    /// Like [`Self::resolve`], additionally reporting the static type of the leaf that provided
    /// the name.
    pub fn resolve_with_type(&self, op: &Operand) -> ResolvedName {
        let mut candidate = ResolvedName::default();
        let mut on_path = UnorderedSet::new();
        self.search(op, &mut candidate, &mut on_path, 0);
        candidate
    }

    fn search(
        &self,
        op: &Operand,
        candidate: &mut ResolvedName,
        on_path: &mut UnorderedSet<InsnId>,
        depth: usize,
    ) {
        match op {
            Operand::Terminal => {}
            Operand::Global(name) => {
                if !name.is_empty() {
                    candidate.name = name.clone();
                    // A global is referred to by its address
                    candidate.leaf_type = Some(ValueType::Pointer);
                }
            }
            Operand::Insn(id) => {
                let insn = self.module.insn(*id);
                if insn.opcode == Opcode::Phi {
                    return;
                }
                if depth >= self.max_depth || !on_path.insert(*id) {
                    trace!("Forward search cut short"; "insn" => ?id, "depth" => depth);
                    return;
                }
                if let Some(name) = insn.name() {
                    candidate.name = name.to_owned();
                    candidate.leaf_type = Some(insn.ty);
                }
                if !ends_walk(insn) {
                    for op in &insn.operands {
                        self.search(op, candidate, on_path, depth + 1);
                    }
                }
                on_path.remove(id);
            }
        }
    }

    /// All distinct non-empty leaf names feeding `op`, one per explored branch of the producer
    /// chain. Unlike [`Self::resolve`], phi-nodes are looked through, so that each incoming value
    /// of a conditional merge contributes. Named loads and casts end their branch, as in
    /// [`Self::resolve`].
    pub fn resolve_contributors(&self, op: &Operand) -> BTreeSet<String> {
        let mut found = BTreeSet::new();
        let mut on_path = UnorderedSet::new();
        self.collect(op, None, &mut found, &mut on_path, 0);
        found
    }

    fn collect(
        &self,
        op: &Operand,
        inherited: Option<&str>,
        found: &mut BTreeSet<String>,
        on_path: &mut UnorderedSet<InsnId>,
        depth: usize,
    ) {
        match op {
            Operand::Terminal => {}
            Operand::Global(name) => {
                if !name.is_empty() {
                    found.insert(name.clone());
                }
            }
            Operand::Insn(id) => {
                let insn = self.module.insn(*id);
                let name = insn.name().or(inherited);
                if depth >= self.max_depth || !on_path.insert(*id) {
                    // The branch ends here; whatever was named on the way is its leaf
                    trace!("Contributor search cut short"; "insn" => ?id, "depth" => depth);
                    if let Some(n) = inherited {
                        found.insert(n.to_owned());
                    }
                    return;
                }
                let searchable = insn
                    .operands
                    .iter()
                    .filter(|o| !matches!(o, Operand::Terminal))
                    .collect::<Vec<_>>();
                if searchable.is_empty() || ends_walk(insn) {
                    if let Some(n) = name {
                        found.insert(n.to_owned());
                    }
                } else {
                    for op in searchable {
                        self.collect(op, name, found, on_path, depth + 1);
                    }
                }
                on_path.remove(id);
            }
        }
    }
}

/// Whether `insn` names a value of its own that the search must not look behind
fn ends_walk(insn: &Instruction) -> bool {
    insn.name().is_some() && matches!(insn.opcode, Opcode::Load | Opcode::BitCast)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::il::{Instruction, ValueType};

    fn other(m: &str) -> Opcode {
        Opcode::Other(m.into())
    }

    #[test]
    fn deepest_name_wins() {
        let mut m = Module::new("m");
        m.begin_function("f", []);
        let bb = m.add_block();
        let x = m.add_instruction(
            bb,
            Instruction::new(other("alloca")).with_result("x", ValueType::Pointer),
        );
        // An unnamed load does not hide the stack slot it reads
        let t = m.add_instruction(
            bb,
            Instruction::new(Opcode::Load)
                .with_operands([Operand::Insn(x)])
                .with_type(ValueType::Integer),
        );
        let conv = m.add_instruction(
            bb,
            Instruction::new(other("sext"))
                .with_operands([Operand::Insn(t)])
                .with_result("conv", ValueType::Integer),
        );
        m.end_function();

        let r = VariableNameResolver::new(&m, 64);
        assert_eq!(r.resolve(&Operand::Insn(conv)), "x");
        assert_eq!(
            r.resolve_with_type(&Operand::Insn(t)),
            ResolvedName {
                name: "x".into(),
                leaf_type: Some(ValueType::Pointer)
            }
        );
        assert_eq!(r.resolve(&Operand::Terminal), "");
        assert_eq!(r.resolve(&Operand::Global("g".into())), "g");
    }

    #[test]
    fn later_operands_override_earlier_ones() {
        let mut m = Module::new("m");
        m.begin_function("f", []);
        let bb = m.add_block();
        let a = m.add_instruction(
            bb,
            Instruction::new(other("alloca")).with_result("a", ValueType::Pointer),
        );
        let add = m.add_instruction(
            bb,
            Instruction::new(other("add"))
                .with_operands([Operand::Insn(a), Operand::Global("b".into()), Operand::Terminal])
                .with_result("add", ValueType::Integer),
        );
        m.end_function();

        let r = VariableNameResolver::new(&m, 64);
        assert_eq!(r.resolve(&Operand::Insn(add)), "b");
        assert_eq!(
            r.resolve_contributors(&Operand::Insn(add)),
            ["a", "b"].iter().map(|s| s.to_string()).collect()
        );
    }

    #[test]
    fn phi_is_opaque_to_single_name_search() {
        let mut m = Module::new("m");
        m.begin_function("f", []);
        let bb = m.add_block();
        let b = m.add_instruction(
            bb,
            Instruction::new(other("alloca")).with_result("b", ValueType::Pointer),
        );
        let a = m.add_instruction(
            bb,
            Instruction::new(Opcode::Phi)
                .with_operands([Operand::Insn(b), Operand::Terminal])
                .with_result("a", ValueType::Pointer),
        );
        let c = m.add_instruction(
            bb,
            Instruction::new(Opcode::BitCast)
                .with_operands([Operand::Insn(a)])
                .with_result("c", ValueType::Pointer),
        );
        m.end_function();

        let r = VariableNameResolver::new(&m, 64);
        assert_eq!(r.resolve(&Operand::Insn(c)), "c");
        assert_eq!(r.resolve(&Operand::Insn(a)), "");
        // Contributors look through the merge
        assert_eq!(
            r.resolve_contributors(&Operand::Insn(a)),
            std::iter::once("b".to_string()).collect()
        );
    }

    #[test]
    fn named_loads_and_casts_are_leaves() {
        let mut m = Module::new("m");
        m.begin_function("f", []);
        let bb = m.add_block();
        let b = m.add_instruction(
            bb,
            Instruction::new(other("alloca")).with_result("b", ValueType::Pointer),
        );
        let a = m.add_instruction(
            bb,
            Instruction::new(other("getelementptr"))
                .with_operands([Operand::Insn(b), Operand::Terminal])
                .with_result("a", ValueType::Pointer),
        );
        let c = m.add_instruction(
            bb,
            Instruction::new(Opcode::BitCast)
                .with_operands([Operand::Insn(a)])
                .with_result("c", ValueType::Pointer),
        );
        let t = m.add_instruction(
            bb,
            Instruction::new(Opcode::Load)
                .with_operands([Operand::Insn(b)])
                .with_result("t", ValueType::Integer),
        );
        let unnamed = m.add_instruction(
            bb,
            Instruction::new(Opcode::BitCast).with_operands([Operand::Insn(a)]),
        );
        m.end_function();

        let r = VariableNameResolver::new(&m, 64);
        assert_eq!(r.resolve(&Operand::Insn(a)), "b");
        assert_eq!(
            r.resolve_with_type(&Operand::Insn(c)),
            ResolvedName {
                name: "c".into(),
                leaf_type: Some(ValueType::Pointer)
            }
        );
        assert_eq!(r.resolve(&Operand::Insn(t)), "t");
        // Without a name of its own, a cast is looked through
        assert_eq!(r.resolve(&Operand::Insn(unnamed)), "b");

        let one = |n: &str| std::iter::once(n.to_string()).collect::<BTreeSet<_>>();
        assert_eq!(r.resolve_contributors(&Operand::Insn(c)), one("c"));
        assert_eq!(r.resolve_contributors(&Operand::Insn(t)), one("t"));
        assert_eq!(r.resolve_contributors(&Operand::Insn(unnamed)), one("b"));
    }

    #[test]
    fn cycles_and_depth_are_bounded() {
        let mut m = Module::new("m");
        m.begin_function("f", []);
        let header = m.add_block();
        let body = m.add_block();
        m.set_successors(header, [body]);
        m.set_successors(body, [header]);
        // i = phi [0, i.next]; i.next = add i, 1
        let i = m.add_instruction(
            header,
            Instruction::new(Opcode::Phi)
                .with_operands([Operand::Terminal, Operand::Terminal])
                .with_result("i", ValueType::Integer),
        );
        let next = m.add_instruction(
            body,
            Instruction::new(other("add"))
                .with_operands([Operand::Insn(i), Operand::Terminal])
                .with_result("i.next", ValueType::Integer),
        );
        m.end_function();
        // Close the loop
        m.instructions[i.index()].operands[1] = Operand::Insn(next);

        let r = VariableNameResolver::new(&m, 64);
        assert_eq!(r.resolve(&Operand::Insn(next)), "i.next");
        // The walk comes back around to `i.next` through the merge, ending the branch at `i`
        assert_eq!(
            r.resolve_contributors(&Operand::Insn(next)),
            std::iter::once("i".to_string()).collect()
        );

        let shallow = VariableNameResolver::new(&m, 1);
        assert_eq!(shallow.resolve(&Operand::Insn(next)), "i.next");
    }
}
