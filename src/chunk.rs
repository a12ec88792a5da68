use strum_macros::{Display, EnumString, FromRepr};

use crate::value::Value;

/// The bytecode instruction set. Every opcode's operand layout is fixed by
/// its mnemonic; the stack effect is noted as `[before] -> [after]`.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, FromRepr)]
pub enum OpCode {
    Import,              // op8 | [string] -> [value]
    VarSet,              // op8 index16 | [value] -> [value]
    VarGetOpSet,         // op8 opassign8 index16 | [value] -> [value]
    VarSetUp,            // op8 up8 index16 | [value] -> [value]
    VarGetOpSetUp,       // op8 opassign8 up8 index16 | [value] -> [value]
    VarGet,              // op8 index16 | [] -> [value]
    VarGetUp,            // op8 up8 index16 | [] -> [value]
    FieldSet,            // op8 | [table, field, value] -> [value]
    FieldGetOpSet,       // op8 opassign8 | [table, field, value] -> [value]
    FieldSetS,           // op8 | [table, string, value] -> [value]
    FieldGetOpSetS,      // op8 opassign8 | [table, string, value] -> [value]
    FieldGet,            // op8 | [table, field] -> [value]
    FieldGetS,           // op8 | [table, string] -> [value]
    FieldGetPushParent,  // op8 | [table, field] -> [table, value]
    FieldGetSPushParent, // op8 | [table, string] -> [table, value]

    Constant,         // op8 index16 | [] -> [value]
    ConstantSmallInt, // op8 imm16 | [] -> [value]

    ArrayLit, // op8 imm16 | [v1, ..., vn] -> [value]
    TableLit, // op8 imm16 | [k1, v1, ..., kn, vn] -> [value]
    True,     // op8 | [] -> [value]
    False,    // op8 | [] -> [value]
    Nil,      // op8 | [] -> [value]
    PushSelf, // op8 | [] -> [self]

    Call,           // op8 nargs8 | [func, arg1, ..., argn] -> [result]
    CallWithParent, // op8 nargs8 | [parent, func, arg1, ..., argn] -> [result]

    Negate,       // op8 | [value] -> [value]
    Not,          // op8 | [value] -> [value]
    Add,          // op8 | [value1, value2] -> [value]
    Subtract,     // op8 | [value1, value2] -> [value]
    Multiply,     // op8 | [value1, value2] -> [value]
    Divide,       // op8 | [value1, value2] -> [value]
    Modulo,       // op8 | [value1, value2] -> [value]
    NotEqual,     // op8 | [value1, value2] -> [value]
    Equal,        // op8 | [value1, value2] -> [value]
    Less,         // op8 | [value1, value2] -> [value]
    LessEqual,    // op8 | [value1, value2] -> [value]
    Greater,      // op8 | [value1, value2] -> [value]
    GreaterEqual, // op8 | [value1, value2] -> [value]

    JumpIfTrueOrPop,  // op8 addr16 | cond ? [cond] -> [cond] : [cond] -> []
    JumpIfFalseOrPop, // op8 addr16 | cond ? [cond] -> [] : [cond] -> [cond]
    JumpIfFalse,      // op8 addr16 | [cond] -> []
    Jump,             // op8 addr16 | [] -> []

    Pop,    // op8 | [value] -> []
    Return, // op8 | [value] -> []
}

impl OpCode {
    #[inline(always)]
    pub fn from_byte(byte: u8) -> Option<Self> {
        Self::from_repr(byte)
    }

    #[inline(always)]
    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

/// The read-modify-write operator carried by the op-assign opcode forms.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, FromRepr)]
pub enum OpAssign {
    Plus,
    Minus,
    Mul,
    Div,
    Mod,
}

impl OpAssign {
    #[inline(always)]
    pub fn from_byte(byte: u8) -> Option<Self> {
        Self::from_repr(byte)
    }

    #[inline(always)]
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    /// The plain arithmetic opcode this op-assign applies.
    pub fn opcode(self) -> OpCode {
        match self {
            OpAssign::Plus => OpCode::Add,
            OpAssign::Minus => OpCode::Subtract,
            OpAssign::Mul => OpCode::Multiply,
            OpAssign::Div => OpCode::Divide,
            OpAssign::Mod => OpCode::Modulo,
        }
    }
}

/// A named variable slot. Holds the current value for locals and for slots
/// captured by nested chunks through the parent link.
pub struct Variable {
    pub name: String,
    pub value: Value,
}

/// Identifier of a chunk in the [`ChunkArena`]. Parent links between chunks
/// are stored as ids, never as references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkId(u32);

/// One compiled lexical scope: a top-level program or a function body.
pub struct Chunk {
    pub parent: Option<ChunkId>,
    pub code: Vec<u8>,
    /// Source line of each bytecode byte, parallel to `code`.
    pub lines: Vec<u32>,
    pub ip: usize,
    pub consts: Vec<Value>,
    pub vars: Vec<Variable>,
    compile_line: u32,
}

impl Chunk {
    pub fn new(parent: Option<ChunkId>) -> Self {
        Chunk {
            parent,
            code: Vec::new(),
            lines: Vec::new(),
            ip: 0,
            consts: Vec::new(),
            vars: Vec::new(),
            compile_line: 1,
        }
    }

    /// Drop the bytecode but keep constants and variables. Used when a REPL
    /// recompiles into its persistent top-level chunk.
    pub fn reset_code(&mut self) {
        self.code.clear();
        self.lines.clear();
        self.ip = 0;
    }

    #[inline(always)]
    pub fn current_address(&self) -> usize {
        self.code.len()
    }

    pub fn set_line(&mut self, line: u32) {
        self.compile_line = line;
    }

    /// Source line of the instruction the ip last fetched from.
    pub fn current_line(&self) -> u32 {
        if self.ip > 0 && self.ip <= self.lines.len() {
            self.lines[self.ip - 1]
        } else {
            self.compile_line
        }
    }

    #[inline(always)]
    fn emit_byte(&mut self, byte: u8) {
        self.code.push(byte);
        self.lines.push(self.compile_line);
    }

    pub fn emit(&mut self, opcode: OpCode) {
        self.emit_byte(opcode.to_byte());
    }

    pub fn emit_arg8(&mut self, opcode: OpCode, arg8: u8) {
        self.emit_byte(opcode.to_byte());
        self.emit_byte(arg8);
    }

    pub fn emit_arg16(&mut self, opcode: OpCode, arg16: u16) {
        self.emit_byte(opcode.to_byte());
        self.emit_byte((arg16 >> 8) as u8);
        self.emit_byte((arg16 & 0xff) as u8);
    }

    pub fn emit_arg8_arg16(&mut self, opcode: OpCode, arg8: u8, arg16: u16) {
        self.emit_byte(opcode.to_byte());
        self.emit_byte(arg8);
        self.emit_byte((arg16 >> 8) as u8);
        self.emit_byte((arg16 & 0xff) as u8);
    }

    pub fn emit_arg8_arg8_arg16(&mut self, opcode: OpCode, arg8_1: u8, arg8_2: u8, arg16: u16) {
        self.emit_byte(opcode.to_byte());
        self.emit_byte(arg8_1);
        self.emit_byte(arg8_2);
        self.emit_byte((arg16 >> 8) as u8);
        self.emit_byte((arg16 & 0xff) as u8);
    }

    /// Emit a jump to `dest` and return the address of its operand so it can
    /// be patched later.
    pub fn emit_jump(&mut self, opcode: OpCode, dest: u16) -> usize {
        self.emit_byte(opcode.to_byte());
        let addr_location = self.code.len();
        self.emit_byte((dest >> 8) as u8);
        self.emit_byte((dest & 0xff) as u8);
        addr_location
    }

    /// Point a previously emitted jump at the current end of the code.
    pub fn patch_jump(&mut self, addr_location: usize) {
        let addr = self.code.len() as u16;
        self.code[addr_location] = (addr >> 8) as u8;
        self.code[addr_location + 1] = (addr & 0xff) as u8;
    }

    /// Find or declare a variable slot for `name`.
    pub fn add_var(&mut self, name: &str) -> usize {
        if let Some(index) = self.find_var(name) {
            return index;
        }
        self.vars.push(Variable {
            name: name.to_string(),
            value: Value::Nil,
        });
        self.vars.len() - 1
    }

    pub fn find_var(&self, name: &str) -> Option<usize> {
        self.vars.iter().position(|v| v.name == name)
    }

    #[inline(always)]
    pub fn get_var(&self, index: usize) -> Value {
        self.vars[index].value
    }

    #[inline(always)]
    pub fn set_var(&mut self, index: usize, value: Value) {
        self.vars[index].value = value;
    }
}

/// Arena of all chunks owned by the interpreter state. Slots retired by a
/// function's reclamation are never reused, so a stale parent id surfaces as
/// a missing scope instead of aliasing a newer chunk.
pub struct ChunkArena {
    chunks: Vec<Option<Chunk>>,
}

impl ChunkArena {
    pub fn new() -> Self {
        ChunkArena { chunks: Vec::new() }
    }

    pub fn alloc(&mut self, parent: Option<ChunkId>) -> ChunkId {
        self.chunks.push(Some(Chunk::new(parent)));
        ChunkId((self.chunks.len() - 1) as u32)
    }

    #[inline(always)]
    pub fn get(&self, id: ChunkId) -> &Chunk {
        match &self.chunks[id.0 as usize] {
            Some(chunk) => chunk,
            None => panic!("use of retired chunk {}", id.0),
        }
    }

    #[inline(always)]
    pub fn get_mut(&mut self, id: ChunkId) -> &mut Chunk {
        match &mut self.chunks[id.0 as usize] {
            Some(chunk) => chunk,
            None => panic!("use of retired chunk {}", id.0),
        }
    }

    pub fn try_get(&self, id: ChunkId) -> Option<&Chunk> {
        self.chunks.get(id.0 as usize)?.as_ref()
    }

    pub fn try_get_mut(&mut self, id: ChunkId) -> Option<&mut Chunk> {
        self.chunks.get_mut(id.0 as usize)?.as_mut()
    }

    pub fn free(&mut self, id: ChunkId) {
        self.chunks[id.0 as usize] = None;
    }

    pub fn live_chunks(&self) -> usize {
        self.chunks.iter().filter(|c| c.is_some()).count()
    }
}

impl Default for ChunkArena {
    fn default() -> Self {
        ChunkArena::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_bytes_round_trip() {
        for byte in 0..=255u8 {
            if let Some(op) = OpCode::from_byte(byte) {
                assert_eq!(op.to_byte(), byte);
            }
        }
        assert_eq!(OpCode::from_byte(OpCode::Return.to_byte()), Some(OpCode::Return));
        assert_eq!(OpCode::from_byte(0xff), None);
    }

    #[test]
    fn emit_and_patch_jump() {
        let mut chunk = Chunk::new(None);
        let patch = chunk.emit_jump(OpCode::JumpIfFalse, 0);
        chunk.emit(OpCode::Nil);
        chunk.emit(OpCode::Pop);
        chunk.patch_jump(patch);
        let addr = ((chunk.code[patch] as u16) << 8) | chunk.code[patch + 1] as u16;
        assert_eq!(addr as usize, chunk.code.len());
    }

    #[test]
    fn variables_are_deduplicated_by_name() {
        let mut chunk = Chunk::new(None);
        let a = chunk.add_var("a");
        let b = chunk.add_var("b");
        assert_eq!(chunk.add_var("a"), a);
        assert_ne!(a, b);
        chunk.set_var(a, Value::Int(3));
        assert!(matches!(chunk.get_var(a), Value::Int(3)));
    }

    #[test]
    fn lines_run_parallel_to_code() {
        let mut chunk = Chunk::new(None);
        chunk.set_line(1);
        chunk.emit(OpCode::Nil);
        chunk.set_line(2);
        chunk.emit_arg16(OpCode::Constant, 0);
        assert_eq!(chunk.code.len(), chunk.lines.len());
        assert_eq!(chunk.lines, vec![1, 2, 2, 2]);
    }

    #[test]
    fn retired_chunk_slots_are_not_reused() {
        let mut arena = ChunkArena::new();
        let a = arena.alloc(None);
        arena.free(a);
        let b = arena.alloc(None);
        assert_ne!(a, b);
        assert!(arena.try_get(a).is_none());
        assert!(arena.try_get(b).is_some());
    }
}
