//! Instruction-level intermediate representation handed over by the compiler driver.
//!
//! The module is held as a set of arenas: every [`BasicBlock`] and every [`Instruction`] lives in
//! a module-wide vector, and is referred to by a [`BlockId`] or [`InsnId`] respectively. Functions
//! own an ordered list of blocks, and blocks own an ordered list of instructions. Order matters:
//! it decides which source line names a block.

use crate::containers::unordered::UnorderedMap;

/// Index of an [`Instruction`] in its [`Module`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InsnId(pub(crate) usize);

/// Index of a [`BasicBlock`] in its [`Module`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub(crate) usize);

/// Index of a [`Function`] in its [`Module`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FuncId(pub(crate) usize);

impl std::fmt::Debug for InsnId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "i{}", self.0)
    }
}
impl std::fmt::Debug for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "bb{}", self.0)
    }
}
impl std::fmt::Debug for FuncId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "fn{}", self.0)
    }
}

impl InsnId {
    /// Position of the instruction in the module-wide arena
    pub fn index(self) -> usize {
        self.0
    }
}

/// The operation performed by an [`Instruction`], as far as flow extraction cares.
#[derive(Clone, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub enum Opcode {
    /// Read from memory at `operands[0]`
    Load,
    /// Write `operands[0]` into memory at `operands[1]`
    Store,
    /// Reinterpret `operands[0]` as a different type, without changing its bits
    BitCast,
    /// Call the function named by [`Instruction::callee`] (if direct) with `operands` as the actual
    /// arguments, in order
    Call,
    /// SSA merge of the incoming values in `operands`, one per control-flow predecessor
    Phi,
    /// Anything else (arithmetic, comparisons, address computation, terminators, ...). The
    /// driver's mnemonic is kept only for debugging output.
    Other(String),
}

impl Opcode {
    /// A short human-readable mnemonic
    pub fn mnemonic(&self) -> &str {
        match self {
            Opcode::Load => "load",
            Opcode::Store => "store",
            Opcode::BitCast => "bitcast",
            Opcode::Call => "call",
            Opcode::Phi => "phi",
            Opcode::Other(m) => m,
        }
    }
}

/// A value consumed by an [`Instruction`].
#[derive(Clone, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub enum Operand {
    /// The value produced by another instruction
    Insn(InsnId),
    /// A reference to a named global
    Global(String),
    /// A constant, a function argument, or any other value with no producer in the module
    Terminal,
}

/// Static type of the value an instruction produces. Only as fine-grained as needed to tell
/// pointers apart from everything else.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub enum ValueType {
    Void,
    Integer,
    Float,
    Pointer,
    Aggregate,
}

impl ValueType {
    pub fn is_pointer(self) -> bool {
        matches!(self, ValueType::Pointer)
    }
}

/// Source-location metadata attached to an instruction by the compiler.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct DebugLoc {
    /// The file, as recorded by the compiler (possibly a full path; possibly empty)
    pub file: String,
    /// 1-based line; `0` means unknown
    pub line: u32,
    /// The location of the call site this instruction was inlined into, if any
    pub inlined_at: Option<Box<DebugLoc>>,
}

impl DebugLoc {
    pub fn new(file: impl Into<String>, line: u32) -> Self {
        Self {
            file: file.into(),
            line,
            inlined_at: None,
        }
    }

    /// Mark this location as inlined into `parent`
    pub fn inlined_at(mut self, parent: DebugLoc) -> Self {
        self.inlined_at = Some(Box::new(parent));
        self
    }
}

/// A single IR instruction.
#[derive(Clone, PartialEq, Eq)]
pub struct Instruction {
    pub opcode: Opcode,
    /// Ordered operands. For [`Opcode::Store`] this is `[value, pointer]`; for [`Opcode::Call`]
    /// these are the actual arguments only (the callee is held separately).
    pub operands: Vec<Operand>,
    /// Name of the SSA value produced, if the compiler kept one
    pub result: Option<String>,
    /// Type of the value produced
    pub ty: ValueType,
    pub loc: Option<DebugLoc>,
    /// Name of the called function. Only set for direct calls.
    pub callee: Option<String>,
}

impl std::fmt::Debug for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "Instruction {{ op: {}, result: {:?}, ty: {:?}, operands: {:?}, callee: {:?}, loc: {:?} }}",
            self.opcode.mnemonic(),
            self.result,
            self.ty,
            self.operands,
            self.callee,
            self.loc.as_ref().map(|l| (&l.file, l.line)),
        )
    }
}

impl Instruction {
    /// A new instruction with no operands, no result name, no location, producing nothing.
    pub fn new(opcode: Opcode) -> Self {
        Self {
            opcode,
            operands: vec![],
            result: None,
            ty: ValueType::Void,
            loc: None,
            callee: None,
        }
    }

    pub fn with_operands(mut self, operands: impl IntoIterator<Item = Operand>) -> Self {
        self.operands = operands.into_iter().collect();
        self
    }

    pub fn with_result(mut self, name: impl Into<String>, ty: ValueType) -> Self {
        self.result = Some(name.into());
        self.ty = ty;
        self
    }

    pub fn with_type(mut self, ty: ValueType) -> Self {
        self.ty = ty;
        self
    }

    pub fn at(mut self, loc: DebugLoc) -> Self {
        self.loc = Some(loc);
        self
    }

    pub fn calling(mut self, callee: impl Into<String>) -> Self {
        self.callee = Some(callee.into());
        self
    }

    /// The result name, if present and non-empty
    pub fn name(&self) -> Option<&str> {
        self.result.as_deref().filter(|n| !n.is_empty())
    }

    /// Confirms the validity of the instruction. Panics if invalid.
    fn confirm_valid(&self) {
        if let Err(e) = self.try_confirm_valid() {
            panic!("{}", e)
        }
    }

    /// Confirms the validity of the instruction's operand shape.
    pub fn try_confirm_valid(&self) -> Result<(), String> {
        let arity = self.operands.len();
        let expect = |ok: bool, expected: &str| {
            if ok {
                Ok(())
            } else {
                Err(format!(
                    "Got {} operand(s) for {} instruction. Expected {}. Instruction: {:?}",
                    arity,
                    self.opcode.mnemonic(),
                    expected,
                    self
                ))
            }
        };
        match self.opcode {
            Opcode::Load => expect(arity == 1, "exactly 1")?,
            Opcode::BitCast => expect(arity == 1, "exactly 1")?,
            // Vector-lane store variants with a different operand count are not supported
            Opcode::Store => expect(arity == 2, "exactly 2 (value, pointer)")?,
            Opcode::Phi => expect(arity >= 1, "at least 1")?,
            Opcode::Call | Opcode::Other(_) => {}
        }
        if self.callee.is_some() && self.opcode != Opcode::Call {
            return Err(format!(
                "Got callee {:?} on non-call instruction {:?}",
                self.callee, self
            ));
        }
        Ok(())
    }
}

/// A basic block: an ordered, straight-line sequence of instructions.
#[derive(Clone, Debug)]
pub struct BasicBlock {
    /// The function this block belongs to
    pub function: FuncId,
    pub instructions: Vec<InsnId>,
    /// Control-flow successors, in the order the terminator lists them
    pub successors: Vec<BlockId>,
}

/// A function: either a definition with at least one block, or a body-less declaration.
#[derive(Clone, Debug)]
pub struct Function {
    pub name: String,
    /// Formal parameter names in declaration order; `None` for anonymous parameters
    pub params: Vec<Option<String>>,
    /// Ordered blocks; the first is the entry block
    pub blocks: Vec<BlockId>,
}

impl Function {
    pub fn is_declaration(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn entry_block(&self) -> Option<BlockId> {
        self.blocks.first().copied()
    }
}

/// A whole compilation unit
#[derive(Debug)]
pub struct Module {
    pub name: String,
    pub functions: Vec<Function>,
    pub blocks: Vec<BasicBlock>,
    pub instructions: Vec<Instruction>,
    /// Owning block of each instruction, indexed like `instructions`
    insn_block: Vec<BlockId>,
    fn_by_name: UnorderedMap<String, FuncId>,
    /// The function currently being built, if any
    open_function: Option<FuncId>,
}

impl Module {
    /// A new empty module
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            functions: Vec::new(),
            blocks: Vec::new(),
            instructions: Vec::new(),
            insn_block: Vec::new(),
            fn_by_name: Default::default(),
            open_function: None,
        }
    }

    /// Begin adding blocks for a new function with name `name` and formal parameters `params`.
    pub fn begin_function(
        &mut self,
        name: impl Into<String>,
        params: impl IntoIterator<Item = Option<String>>,
    ) -> FuncId {
        assert!(
            self.open_function.is_none(),
            "Should have called `end_function` before calling `begin_function` again"
        );
        let name = name.into();
        let id = FuncId(self.functions.len());
        if self.fn_by_name.insert(name.clone(), id).is_some() {
            panic!("Function {} was already added earlier", name);
        }
        self.functions.push(Function {
            name,
            params: params.into_iter().collect(),
            blocks: vec![],
        });
        self.open_function = Some(id);
        id
    }

    /// End adding blocks for the current function. Expected to be called before the next
    /// [`Self::begin_function`].
    pub fn end_function(&mut self) {
        let f = self
            .open_function
            .take()
            .expect("`end_function` called with no function open");
        for &bb in &self.functions[f.0].blocks {
            for s in &self.blocks[bb.0].successors {
                assert_eq!(
                    self.blocks[s.0].function, f,
                    "Successor {:?} of {:?} lies outside function {}",
                    s, bb, self.functions[f.0].name
                );
            }
        }
    }

    /// Add a body-less function (only its signature is known)
    pub fn declare_function(
        &mut self,
        name: impl Into<String>,
        params: impl IntoIterator<Item = Option<String>>,
    ) -> FuncId {
        let id = self.begin_function(name, params);
        self.end_function();
        id
    }

    /// Append a new, empty block to the function currently being built
    pub fn add_block(&mut self) -> BlockId {
        let f = self
            .open_function
            .expect("Should have called `begin_function` before adding blocks");
        let id = BlockId(self.blocks.len());
        self.blocks.push(BasicBlock {
            function: f,
            instructions: vec![],
            successors: vec![],
        });
        self.functions[f.0].blocks.push(id);
        id
    }

    /// Set the control-flow successors of `block`. May be called after the successor blocks have
    /// been added, so that forward branches can be expressed.
    pub fn set_successors(&mut self, block: BlockId, successors: impl IntoIterator<Item = BlockId>) {
        self.blocks[block.0].successors = successors.into_iter().collect();
    }

    /// Append `insn` to the end of `block`. Panics if the instruction is malformed.
    pub fn add_instruction(&mut self, block: BlockId, insn: Instruction) -> InsnId {
        assert_eq!(
            Some(self.blocks[block.0].function),
            self.open_function,
            "Instructions can only be added to blocks of the function being built"
        );
        insn.confirm_valid();
        let id = InsnId(self.instructions.len());
        self.instructions.push(insn);
        self.insn_block.push(block);
        self.blocks[block.0].instructions.push(id);
        id
    }

    pub fn insn(&self, id: InsnId) -> &Instruction {
        &self.instructions[id.0]
    }

    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.0]
    }

    pub fn function(&self, id: FuncId) -> &Function {
        &self.functions[id.0]
    }

    /// The block that owns instruction `id`
    pub fn block_of(&self, id: InsnId) -> BlockId {
        self.insn_block[id.0]
    }

    /// The function that owns instruction `id`
    pub fn function_of(&self, id: InsnId) -> FuncId {
        self.blocks[self.insn_block[id.0].0].function
    }

    pub fn function_by_name(&self, name: &str) -> Option<&Function> {
        self.fn_by_name.get(name).map(|&f| &self.functions[f.0])
    }

    pub fn function_ids(&self) -> impl Iterator<Item = FuncId> {
        (0..self.functions.len()).map(FuncId)
    }

    /// All instructions of `f`, in block order then instruction order
    pub fn instructions_of(&self, f: FuncId) -> impl Iterator<Item = InsnId> + '_ {
        self.functions[f.0]
            .blocks
            .iter()
            .flat_map(move |&bb| self.blocks[bb.0].instructions.iter().copied())
    }

    /// Confirms the validity of the whole module: every instruction is well-formed, and every
    /// instruction or block reference is in bounds and stays within its function.
    pub fn try_confirm_valid(&self) -> Result<(), String> {
        if let Some(f) = self.open_function {
            return Err(format!(
                "Function {} was never ended",
                self.functions[f.0].name
            ));
        }
        for (i, insn) in self.instructions.iter().enumerate() {
            insn.try_confirm_valid()?;
            let owner = self.function_of(InsnId(i));
            for op in &insn.operands {
                if let Operand::Insn(p) = op {
                    if p.0 >= self.instructions.len() {
                        return Err(format!("Instruction i{} uses out-of-bounds {:?}", i, p));
                    }
                    if self.function_of(*p) != owner {
                        return Err(format!(
                            "Instruction i{} in {} uses {:?} from another function",
                            i, self.functions[owner.0].name, p
                        ));
                    }
                }
            }
        }
        for (b, bb) in self.blocks.iter().enumerate() {
            for s in &bb.successors {
                if s.0 >= self.blocks.len() || self.blocks[s.0].function != bb.function {
                    return Err(format!(
                        "Block bb{} has successor {:?} outside function {}",
                        b, s, self.functions[bb.function.0].name
                    ));
                }
            }
        }
        Ok(())
    }
}
