//! A lifter from the JSON module export produced by the compiler driver.
//!
//! Block indices in the export are local to their function; instruction indices are local to their
//! function too, counting instructions in block order.

use serde::Deserialize;

use crate::il::{DebugLoc, Instruction, InsnId, Module, Opcode, Operand, ValueType};
use crate::log::*;

#[derive(Deserialize, Debug)]
struct ExportedModule {
    name: String,
    #[serde(default)]
    functions: Vec<ExportedFunction>,
}

#[derive(Deserialize, Debug)]
struct ExportedFunction {
    name: String,
    #[serde(default)]
    params: Vec<Option<String>>,
    #[serde(default)]
    blocks: Vec<ExportedBlock>,
}

#[derive(Deserialize, Debug)]
struct ExportedBlock {
    #[serde(default)]
    successors: Vec<usize>,
    #[serde(default)]
    instructions: Vec<ExportedInstruction>,
}

#[derive(Deserialize, Debug)]
struct ExportedInstruction {
    opcode: String,
    #[serde(default)]
    operands: Vec<ExportedOperand>,
    #[serde(default)]
    result: Option<String>,
    #[serde(default, rename = "type")]
    ty: ExportedType,
    #[serde(default)]
    loc: Option<ExportedLoc>,
    #[serde(default)]
    callee: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "lowercase")]
enum ExportedOperand {
    Insn(usize),
    Global(String),
    Terminal,
}

#[derive(Deserialize, Debug, Clone, Copy)]
#[serde(rename_all = "lowercase")]
enum ExportedType {
    Void,
    Integer,
    Float,
    Pointer,
    Aggregate,
}

impl Default for ExportedType {
    fn default() -> Self {
        ExportedType::Void
    }
}

#[derive(Deserialize, Debug)]
struct ExportedLoc {
    #[serde(default)]
    file: String,
    #[serde(default)]
    line: u32,
    #[serde(default)]
    inlined_at: Option<Box<ExportedLoc>>,
}

impl From<ExportedType> for ValueType {
    fn from(t: ExportedType) -> Self {
        match t {
            ExportedType::Void => ValueType::Void,
            ExportedType::Integer => ValueType::Integer,
            ExportedType::Float => ValueType::Float,
            ExportedType::Pointer => ValueType::Pointer,
            ExportedType::Aggregate => ValueType::Aggregate,
        }
    }
}

impl From<ExportedLoc> for DebugLoc {
    fn from(l: ExportedLoc) -> Self {
        let loc = DebugLoc::new(l.file, l.line);
        match l.inlined_at {
            Some(parent) => loc.inlined_at((*parent).into()),
            None => loc,
        }
    }
}

fn lift_opcode(mnemonic: String) -> Opcode {
    match mnemonic.as_str() {
        "load" => Opcode::Load,
        "store" => Opcode::Store,
        "bitcast" => Opcode::BitCast,
        "call" => Opcode::Call,
        "phi" => Opcode::Phi,
        _ => Opcode::Other(mnemonic),
    }
}

/// Lift a JSON module export into a [`Module`] on which flow extraction can be performed.
pub fn lift_from(exported: &str) -> Result<Module, String> {
    let exported: ExportedModule =
        serde_json::from_str(exported).map_err(|e| format!("Malformed module export: {}", e))?;
    let mut module = Module::new(exported.name);

    for func in exported.functions {
        if module.function_by_name(&func.name).is_some() {
            return Err(format!("Function {} is exported more than once", func.name));
        }
        if func.blocks.is_empty() {
            module.declare_function(func.name, func.params);
            continue;
        }
        trace!("Lifting function"; "name" => &func.name, "blocks" => func.blocks.len());

        let base = module.instructions.len();
        let num_insns: usize = func.blocks.iter().map(|b| b.instructions.len()).sum();
        let name = func.name;
        module.begin_function(name.clone(), func.params);
        let blocks = func
            .blocks
            .iter()
            .map(|_| module.add_block())
            .collect::<Vec<_>>();

        for (bb, block) in blocks.iter().zip(func.blocks) {
            let successors = block
                .successors
                .iter()
                .map(|&s| {
                    blocks.get(s).copied().ok_or_else(|| {
                        format!("Successor {} out of range in function {}", s, name)
                    })
                })
                .collect::<Result<Vec<_>, String>>()?;
            module.set_successors(*bb, successors);

            for insn in block.instructions {
                let operands = insn
                    .operands
                    .into_iter()
                    .map(|op| match op {
                        ExportedOperand::Insn(i) if i < num_insns => {
                            Ok(Operand::Insn(InsnId(base + i)))
                        }
                        ExportedOperand::Insn(i) => Err(format!(
                            "Operand refers to instruction {} out of range in function {}",
                            i, name
                        )),
                        ExportedOperand::Global(g) => Ok(Operand::Global(g)),
                        ExportedOperand::Terminal => Ok(Operand::Terminal),
                    })
                    .collect::<Result<Vec<_>, String>>()?;
                let mut lifted = Instruction::new(lift_opcode(insn.opcode))
                    .with_operands(operands)
                    .with_type(insn.ty.into());
                lifted.result = insn.result;
                lifted.loc = insn.loc.map(Into::into);
                lifted.callee = insn.callee;
                lifted
                    .try_confirm_valid()
                    .map_err(|e| format!("In function {}: {}", name, e))?;
                module.add_instruction(*bb, lifted);
            }
        }
        module.end_function();
    }

    module.try_confirm_valid()?;
    debug!("Lifted module";
           "name" => &module.name,
           "functions" => module.functions.len(),
           "instructions" => module.instructions.len());
    Ok(module)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn lifts_functions_blocks_and_operands() {
        let m = lift_from(
            r#"{
                "name": "test.c",
                "functions": [
                    { "name": "foo", "params": ["y", null] },
                    { "name": "main", "params": [], "blocks": [
                        { "successors": [1], "instructions": [
                            { "opcode": "alloca", "result": "x", "type": "pointer",
                              "loc": { "file": "/src/test.c", "line": 3 } },
                            { "opcode": "store", "operands": ["terminal", {"insn": 0}],
                              "loc": { "file": "", "line": 9,
                                       "inlined_at": { "file": "test.c", "line": 4 } } },
                            { "opcode": "br" }
                        ]},
                        { "instructions": [
                            { "opcode": "call", "operands": [{"insn": 0}, {"global": "g"}],
                              "callee": "foo" },
                            { "opcode": "ret" }
                        ]}
                    ]}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(m.name, "test.c");
        assert!(m.function_by_name("foo").unwrap().is_declaration());
        let main = m.function_by_name("main").unwrap();
        assert_eq!(main.blocks.len(), 2);
        assert_eq!(m.block(main.blocks[0]).successors, vec![main.blocks[1]]);
        let insns = m.instructions.iter().collect::<Vec<_>>();
        assert_eq!(insns.len(), 5);
        assert_eq!(insns[0].name(), Some("x"));
        assert_eq!(insns[0].ty, ValueType::Pointer);
        assert_eq!(insns[1].opcode, Opcode::Store);
        assert_eq!(
            insns[1].operands,
            vec![Operand::Terminal, Operand::Insn(InsnId(0))]
        );
        assert_eq!(
            insns[1].loc.as_ref().unwrap().inlined_at.as_deref(),
            Some(&DebugLoc::new("test.c", 4))
        );
        assert_eq!(insns[2].opcode, Opcode::Other("br".into()));
        assert_eq!(insns[3].callee.as_deref(), Some("foo"));
        assert_eq!(insns[3].operands[1], Operand::Global("g".into()));
    }

    #[test]
    fn rejects_malformed_exports() {
        assert!(lift_from("{").is_err());
        // Store with a single operand
        assert!(lift_from(
            r#"{ "name": "m", "functions": [ { "name": "f", "blocks": [ { "instructions": [
                { "opcode": "store", "operands": ["terminal"] } ] } ] } ] }"#
        )
        .is_err());
        // Dangling instruction reference
        assert!(lift_from(
            r#"{ "name": "m", "functions": [ { "name": "f", "blocks": [ { "instructions": [
                { "opcode": "load", "operands": [{"insn": 7}] } ] } ] } ] }"#
        )
        .is_err());
        // Dangling successor
        assert!(lift_from(
            r#"{ "name": "m", "functions": [ { "name": "f", "blocks": [ { "successors": [3] } ] } ] }"#
        )
        .is_err());
        // Duplicate function
        assert!(lift_from(
            r#"{ "name": "m", "functions": [ { "name": "f" }, { "name": "f" } ] }"#
        )
        .is_err());
    }
}
