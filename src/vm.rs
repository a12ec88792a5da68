use std::cmp::Ordering;

use crate::chunk::{ChunkId, OpAssign, OpCode};
use crate::compiler;
use crate::debug;
use crate::errors::{self, RuntimeError};
use crate::modules;
use crate::state::Interp;
use crate::value::{self, Type, Value};

/// Module names resolve against the working directory with this extension.
pub const SOURCE_EXTENSION: &str = "ri";

/// Interpreted call depth mirrors host recursion, so it is capped and the
/// overflow surfaces as a regular runtime error.
pub const MAX_CALL_DEPTH: usize = 256;

#[derive(Debug)]
pub enum InterpretResult {
    Ok(Value),
    CompileError,
    RuntimeError,
}

/// Compile and run one program. In REPL mode the persistent top-level chunk
/// is reused so variables carry over between calls; otherwise the program
/// gets a fresh, discarded chunk. The previous error context clears at entry.
pub fn interpret(state: &mut Interp, source: &str, repl: bool) -> InterpretResult {
    state.clear_error();
    let reuse = if repl { state.main } else { Value::Nil };
    let main = match compiler::compile(state, source, reuse) {
        Ok(main) => main,
        Err(_) => return InterpretResult::CompileError,
    };
    state.main = main;

    if state.debug {
        if let Value::Function(h) = main {
            let chunk = state.heap.function(h).chunk;
            debug::disassemble_chunk(state, chunk, "program");
        }
    }

    let mut vm = Vm::new();
    match vm.exec_function(state, main) {
        Ok(result) => {
            let roots = [state.main, result];
            state.collect(&roots);
            InterpretResult::Ok(result)
        }
        Err(e) => {
            if e.line == 0 {
                eprintln!("Error: {}", e.message);
            }
            state.set_error(e);
            let roots = [state.main];
            state.collect(&roots);
            InterpretResult::RuntimeError
        }
    }
}

/// The embedding contract: `(success, result)`. A failed run of either error
/// class yields `(false, nil)`.
pub fn execute(state: &mut Interp, source: &str, repl: bool) -> (bool, Value) {
    match interpret(state, source, repl) {
        InterpretResult::Ok(v) => (true, v),
        _ => (false, Value::Nil),
    }
}

pub struct Vm {
    stack: Vec<Value>,
    depth: usize,
}

impl Vm {
    pub fn new() -> Vm {
        Vm {
            stack: Vec::with_capacity(64),
            depth: 0,
        }
    }

    /// Run one function activation. The chunk's instruction pointer is saved
    /// and restored around the activation, since chunks are entered
    /// reentrantly by recursive calls.
    fn exec_function(&mut self, state: &mut Interp, fval: Value) -> Result<Value, RuntimeError> {
        let function = match fval {
            Value::Function(h) => *state.heap.function(h),
            _ => {
                return Err(RuntimeError::new(format!(
                    "Can't call <{}>",
                    fval.type_of()
                )))
            }
        };
        if self.depth >= MAX_CALL_DEPTH {
            return Err(RuntimeError::new("stack overflow"));
        }
        self.depth += 1;

        let chunk_id = function.chunk;
        let saved_ip = {
            let chunk = state.chunks.get_mut(chunk_id);
            let saved = chunk.ip;
            chunk.ip = 0;
            saved
        };
        let self_val = if function.takes_self && function.nargs > 0 {
            state.chunks.get(chunk_id).get_var(0)
        } else {
            Value::Nil
        };

        let result = self
            .run(state, fval, chunk_id, self_val)
            .map_err(|e| self.locate(state, chunk_id, e));

        state.chunks.get_mut(chunk_id).ip = saved_ip;
        self.depth -= 1;
        result
    }

    fn run(
        &mut self,
        state: &mut Interp,
        fval: Value,
        chunk_id: ChunkId,
        self_val: Value,
    ) -> Result<Value, RuntimeError> {
        loop {
            #[cfg(feature = "debug_trace_execution")]
            {
                let chunk = state.chunks.get(chunk_id);
                debug::disassemble_instruction(state, chunk, chunk.ip);
            }

            let byte = self.read8(state, chunk_id)?;
            let op = OpCode::from_byte(byte)
                .ok_or_else(|| RuntimeError::new(format!("unknown opcode {}", byte)))?;

            match op {
                OpCode::Import => {
                    let name_value = self.pop();
                    let Value::Str(h) = name_value else {
                        return Err(errors::type_mismatch(Type::String, name_value.type_of()));
                    };
                    let name = state.heap.str_text(h).to_string();
                    let v = self.import_module(state, &name)?;
                    self.push(v);
                }
                OpCode::VarSet => {
                    let index = self.read16(state, chunk_id)? as usize;
                    let v = self.peek();
                    state.chunks.get_mut(chunk_id).set_var(index, v);
                }
                OpCode::VarGet => {
                    let index = self.read16(state, chunk_id)? as usize;
                    let v = state.chunks.get(chunk_id).get_var(index);
                    self.push(v);
                }
                OpCode::VarGetOpSet => {
                    let opassign = self.read_opassign(state, chunk_id)?;
                    let index = self.read16(state, chunk_id)? as usize;
                    let rhs = self.pop();
                    let current = state.chunks.get(chunk_id).get_var(index);
                    let result = binary(state, opassign.opcode(), current, rhs)?;
                    state.chunks.get_mut(chunk_id).set_var(index, result);
                    self.push(result);
                }
                OpCode::VarSetUp => {
                    let ups = self.read8(state, chunk_id)? as usize;
                    let index = self.read16(state, chunk_id)? as usize;
                    let target = resolve_up(state, chunk_id, ups)?;
                    let v = self.peek();
                    state.chunks.get_mut(target).set_var(index, v);
                }
                OpCode::VarGetUp => {
                    let ups = self.read8(state, chunk_id)? as usize;
                    let index = self.read16(state, chunk_id)? as usize;
                    let target = resolve_up(state, chunk_id, ups)?;
                    let v = state.chunks.get(target).get_var(index);
                    self.push(v);
                }
                OpCode::VarGetOpSetUp => {
                    let opassign = self.read_opassign(state, chunk_id)?;
                    let ups = self.read8(state, chunk_id)? as usize;
                    let index = self.read16(state, chunk_id)? as usize;
                    let target = resolve_up(state, chunk_id, ups)?;
                    let rhs = self.pop();
                    let current = state.chunks.get(target).get_var(index);
                    let result = binary(state, opassign.opcode(), current, rhs)?;
                    state.chunks.get_mut(target).set_var(index, result);
                    self.push(result);
                }
                OpCode::FieldSet | OpCode::FieldSetS => {
                    let v = self.pop();
                    let field = self.pop();
                    let container = self.pop();
                    field_set(state, container, field, v, op == OpCode::FieldSetS)?;
                    self.push(v);
                }
                OpCode::FieldGet | OpCode::FieldGetS => {
                    let field = self.pop();
                    let container = self.pop();
                    let v = field_get(state, container, field, op == OpCode::FieldGetS)?;
                    self.push(v);
                }
                OpCode::FieldGetPushParent | OpCode::FieldGetSPushParent => {
                    let field = self.pop();
                    let container = self.peek();
                    let hooked = op == OpCode::FieldGetSPushParent;
                    let v = field_get(state, container, field, hooked)?;
                    self.push(v);
                }
                OpCode::FieldGetOpSet | OpCode::FieldGetOpSetS => {
                    let opassign = self.read_opassign(state, chunk_id)?;
                    let hooked = op == OpCode::FieldGetOpSetS;
                    let rhs = self.pop();
                    let field = self.pop();
                    let container = self.pop();
                    let current = field_get(state, container, field, hooked)?;
                    let result = binary(state, opassign.opcode(), current, rhs)?;
                    field_set(state, container, field, result, hooked)?;
                    self.push(result);
                }
                OpCode::Constant => {
                    let index = self.read16(state, chunk_id)? as usize;
                    let v = state
                        .chunks
                        .get(chunk_id)
                        .consts
                        .get(index)
                        .copied()
                        .ok_or_else(|| RuntimeError::new("constant index out of range"))?;
                    self.push(v);
                }
                OpCode::ConstantSmallInt => {
                    let imm = self.read16(state, chunk_id)?;
                    self.push(Value::Int(imm as i64));
                }
                OpCode::ArrayLit => {
                    let elements = self.read16(state, chunk_id)? as usize;
                    let mut values = vec![Value::Nil; elements];
                    for i in (0..elements).rev() {
                        values[i] = self.pop();
                    }
                    let arr = state.new_array_from(values);
                    self.push(arr);
                }
                OpCode::TableLit => {
                    let elements = self.read16(state, chunk_id)? as usize;
                    let table = state.new_table(elements);
                    let Value::Table(h) = table else {
                        unreachable!("new_table returns a table value");
                    };
                    for _ in 0..elements {
                        let v = self.pop();
                        let k = self.pop();
                        modules::table::set(state, h, k, v);
                    }
                    self.push(table);
                }
                OpCode::True => self.push(Value::Bool(true)),
                OpCode::False => self.push(Value::Bool(false)),
                OpCode::Nil => self.push(Value::Nil),
                OpCode::PushSelf => self.push(self_val),
                OpCode::Call => {
                    let given = self.read8(state, chunk_id)? as usize;
                    let callee = self.peekn(given);
                    let function = self.check_callee(state, callee, given, 0)?;
                    // Chunks are entered reentrantly: the callee's frame
                    // slots are saved and restored around the activation,
                    // like its instruction pointer.
                    let saved = save_frame(state, function.chunk);
                    for i in (0..given).rev() {
                        let v = self.pop();
                        state.chunks.get_mut(function.chunk).set_var(i, v);
                    }
                    self.pop(); // the callee itself
                    let result = self.exec_function(state, callee);
                    restore_frame(state, function.chunk, saved);
                    match result {
                        Ok(ret) => self.push(ret),
                        Err(e) => {
                            self.print_backtrace(state, fval, chunk_id);
                            return Err(e);
                        }
                    }
                }
                OpCode::CallWithParent => {
                    let given = self.read8(state, chunk_id)? as usize;
                    let callee = self.peekn(given);
                    let Value::Function(h) = callee else {
                        return Err(RuntimeError::new(format!(
                            "Can't call <{}>",
                            callee.type_of()
                        )));
                    };
                    let receiver_slot = if state.heap.function(h).takes_self { 1 } else { 0 };
                    let function = self.check_callee(state, callee, given, receiver_slot)?;
                    let saved = save_frame(state, function.chunk);
                    for i in (receiver_slot..given + receiver_slot).rev() {
                        let v = self.pop();
                        state.chunks.get_mut(function.chunk).set_var(i, v);
                    }
                    self.pop(); // the callee itself
                    let parent = self.pop();
                    if function.takes_self {
                        state.chunks.get_mut(function.chunk).set_var(0, parent);
                    }
                    let result = self.exec_function(state, callee);
                    restore_frame(state, function.chunk, saved);
                    match result {
                        Ok(ret) => self.push(ret),
                        Err(e) => {
                            self.print_backtrace(state, fval, chunk_id);
                            return Err(e);
                        }
                    }
                }
                OpCode::Negate => {
                    let v = self.pop();
                    match v {
                        Value::Int(i) => self.push(Value::Int(i.wrapping_neg())),
                        Value::Float(f) => self.push(Value::Float(-f)),
                        _ => {
                            return Err(errors::type_mismatch2(
                                Type::Int,
                                Type::Float,
                                v.type_of(),
                            ))
                        }
                    }
                }
                OpCode::Not => {
                    let v = self.pop();
                    self.push(Value::Bool(v.is_falsey()));
                }
                OpCode::Add
                | OpCode::Subtract
                | OpCode::Multiply
                | OpCode::Divide
                | OpCode::Modulo => {
                    let v2 = self.pop();
                    let v1 = self.pop();
                    let result = binary(state, op, v1, v2)?;
                    self.push(result);
                }
                OpCode::NotEqual => {
                    let v2 = self.pop();
                    let v1 = self.pop();
                    let eq = value::equal(state, v1, v2);
                    self.push(Value::Bool(!eq));
                }
                OpCode::Equal => {
                    let v2 = self.pop();
                    let v1 = self.pop();
                    let eq = value::equal(state, v1, v2);
                    self.push(Value::Bool(eq));
                }
                OpCode::Less => {
                    let ord = self.compare_operands(state)?;
                    self.push(Value::Bool(ord == Ordering::Less));
                }
                OpCode::LessEqual => {
                    let ord = self.compare_operands(state)?;
                    self.push(Value::Bool(ord != Ordering::Greater));
                }
                OpCode::Greater => {
                    let ord = self.compare_operands(state)?;
                    self.push(Value::Bool(ord == Ordering::Greater));
                }
                OpCode::GreaterEqual => {
                    let ord = self.compare_operands(state)?;
                    self.push(Value::Bool(ord != Ordering::Less));
                }
                OpCode::JumpIfTrueOrPop => {
                    let addr = self.read16(state, chunk_id)? as usize;
                    if !self.peek().is_falsey() {
                        state.chunks.get_mut(chunk_id).ip = addr;
                    } else {
                        self.pop();
                    }
                }
                OpCode::JumpIfFalseOrPop => {
                    let addr = self.read16(state, chunk_id)? as usize;
                    if self.peek().is_falsey() {
                        state.chunks.get_mut(chunk_id).ip = addr;
                    } else {
                        self.pop();
                    }
                }
                OpCode::JumpIfFalse => {
                    let addr = self.read16(state, chunk_id)? as usize;
                    if self.pop().is_falsey() {
                        state.chunks.get_mut(chunk_id).ip = addr;
                    }
                }
                OpCode::Jump => {
                    let addr = self.read16(state, chunk_id)? as usize;
                    state.chunks.get_mut(chunk_id).ip = addr;
                }
                OpCode::Pop => {
                    self.pop();
                }
                OpCode::Return => {
                    return Ok(self.pop());
                }
            }
        }
    }

    /// Pop a module string, read and compile `<cwd>/<name>.ri`, run it as a
    /// fresh program and yield its result. Any failure inside the module
    /// collapses to a single error in the importer.
    fn import_module(&mut self, state: &mut Interp, name: &str) -> Result<Value, RuntimeError> {
        let path = format!("{}.{}", name, SOURCE_EXTENSION);
        let source = match std::fs::read_to_string(&path) {
            Ok(source) => source,
            Err(_) => {
                return Err(RuntimeError::new(format!(
                    "could not read module '{}'",
                    name
                )))
            }
        };
        let module = match compiler::compile(state, &source, Value::Nil) {
            Ok(module) => module,
            Err(_) => {
                return Err(RuntimeError::new(format!(
                    "could not compile module '{}'",
                    name
                )))
            }
        };
        match self.exec_function(state, module) {
            Ok(v) => Ok(v),
            Err(_) => Err(RuntimeError::new(format!(
                "runtime error in module '{}'",
                name
            ))),
        }
    }

    fn check_callee(
        &self,
        state: &Interp,
        callee: Value,
        given: usize,
        receiver_slot: usize,
    ) -> Result<crate::heap::FunctionObject, RuntimeError> {
        let Value::Function(h) = callee else {
            return Err(RuntimeError::new(format!(
                "Can't call <{}>",
                callee.type_of()
            )));
        };
        let function = *state.heap.function(h);
        if given + receiver_slot != function.nargs as usize {
            return Err(RuntimeError::new(format!(
                "expected {} args, but {} args given",
                function.nargs,
                given + receiver_slot
            )));
        }
        Ok(function)
    }

    fn compare_operands(&mut self, state: &Interp) -> Result<Ordering, RuntimeError> {
        let v2 = self.pop();
        let v1 = self.pop();
        compare_values(state, v1, v2)
    }

    fn read8(&mut self, state: &mut Interp, chunk_id: ChunkId) -> Result<u8, RuntimeError> {
        let chunk = state.chunks.get_mut(chunk_id);
        match chunk.code.get(chunk.ip) {
            Some(&byte) => {
                chunk.ip += 1;
                Ok(byte)
            }
            None => Err(RuntimeError::new("unexpected end of bytecode")),
        }
    }

    fn read16(&mut self, state: &mut Interp, chunk_id: ChunkId) -> Result<u16, RuntimeError> {
        let hi = self.read8(state, chunk_id)? as u16;
        let lo = self.read8(state, chunk_id)? as u16;
        Ok((hi << 8) | lo)
    }

    fn read_opassign(
        &mut self,
        state: &mut Interp,
        chunk_id: ChunkId,
    ) -> Result<OpAssign, RuntimeError> {
        let byte = self.read8(state, chunk_id)?;
        OpAssign::from_byte(byte).ok_or_else(|| RuntimeError::new("malformed op-assign operand"))
    }

    #[inline(always)]
    fn push(&mut self, v: Value) {
        self.stack.push(v);
    }

    #[inline(always)]
    fn pop(&mut self) -> Value {
        self.stack.pop().unwrap_or(Value::Nil)
    }

    #[inline(always)]
    fn peek(&self) -> Value {
        self.stack.last().copied().unwrap_or(Value::Nil)
    }

    #[inline(always)]
    fn peekn(&self, n: usize) -> Value {
        if self.stack.len() > n {
            self.stack[self.stack.len() - 1 - n]
        } else {
            Value::Nil
        }
    }

    /// Attach the raise line to an error the first time it surfaces, and
    /// report it. Errors bubbling out of deeper activations already carry
    /// their line.
    fn locate(&self, state: &Interp, chunk_id: ChunkId, mut e: RuntimeError) -> RuntimeError {
        if e.line == 0 {
            e.line = state
                .chunks
                .try_get(chunk_id)
                .map(|c| c.current_line())
                .unwrap_or(0)
                .max(1);
            eprintln!("Error in line {}: {}", e.line, e.message);
        }
        e
    }

    /// One line per abandoned frame while a runtime error unwinds.
    fn print_backtrace(&self, state: &Interp, fval: Value, chunk_id: ChunkId) {
        let line = state
            .chunks
            .try_get(chunk_id)
            .map(|c| c.current_line())
            .unwrap_or(0);
        eprintln!("    in {}({})", value::inspect(state, fval), line);
    }
}

impl Default for Vm {
    fn default() -> Self {
        Vm::new()
    }
}

/// Dispatch a binary arithmetic operator through the left operand's module.
fn binary(state: &mut Interp, op: OpCode, v1: Value, v2: Value) -> Result<Value, RuntimeError> {
    let module = state.module(v1.type_of());
    let f = match op {
        OpCode::Add => module.add,
        OpCode::Subtract => module.sub,
        OpCode::Multiply => module.mul,
        OpCode::Divide => module.div,
        OpCode::Modulo => module.modulo,
        _ => None,
    };
    match f {
        Some(f) => f(state, v1, v2),
        None => Err(errors::no_method(op_symbol(op), v1.type_of())),
    }
}

fn op_symbol(op: OpCode) -> &'static str {
    match op {
        OpCode::Add => "+",
        OpCode::Subtract => "-",
        OpCode::Multiply => "*",
        OpCode::Divide => "/",
        OpCode::Modulo => "%",
        _ => "?",
    }
}

/// Three-way comparison: same types go through the module's compare, mixed
/// Int/Float promotes, anything else is a compare mismatch.
fn compare_values(state: &Interp, v1: Value, v2: Value) -> Result<Ordering, RuntimeError> {
    match (v1, v2) {
        (Value::Int(a), Value::Float(b)) => {
            Ok((a as f64).partial_cmp(&b).unwrap_or(Ordering::Equal))
        }
        (Value::Float(a), Value::Int(b)) => {
            Ok(a.partial_cmp(&(b as f64)).unwrap_or(Ordering::Equal))
        }
        _ if v1.type_of() == v2.type_of() => match state.module(v1.type_of()).compare {
            Some(compare) => Ok(compare(state, v1, v2)),
            None => Err(errors::compare_mismatch(v1.type_of(), v2.type_of())),
        },
        _ => Err(errors::compare_mismatch(v1.type_of(), v2.type_of())),
    }
}

fn save_frame(state: &Interp, chunk_id: ChunkId) -> Vec<Value> {
    state
        .chunks
        .get(chunk_id)
        .vars
        .iter()
        .map(|v| v.value)
        .collect()
}

fn restore_frame(state: &mut Interp, chunk_id: ChunkId, saved: Vec<Value>) {
    let chunk = state.chunks.get_mut(chunk_id);
    for (var, value) in chunk.vars.iter_mut().zip(saved) {
        var.value = value;
    }
}

/// Walk `ups` parent links from the executing chunk.
fn resolve_up(state: &Interp, chunk_id: ChunkId, ups: usize) -> Result<ChunkId, RuntimeError> {
    let mut id = chunk_id;
    for _ in 0..ups {
        let parent = state
            .chunks
            .try_get(id)
            .and_then(|c| c.parent)
            .filter(|p| state.chunks.try_get(*p).is_some());
        match parent {
            Some(p) => id = p,
            None => {
                return Err(RuntimeError::new(format!(
                    "Can't get upvalue from up chunk {}",
                    ups
                )))
            }
        }
    }
    Ok(id)
}

fn field_get(
    state: &Interp,
    container: Value,
    field: Value,
    hooked: bool,
) -> Result<Value, RuntimeError> {
    match container {
        Value::Array(h) => modules::array::get(state, h, field),
        Value::Table(h) => Ok(modules::table::get(state, h, field)),
        _ => {
            if hooked {
                if let Value::Str(key) = field {
                    let hook = state.module(container.type_of()).fieldget_s;
                    if let Some(v) = hook(state, container, state.heap.str_text(key)) {
                        return Ok(v);
                    }
                }
            }
            Err(RuntimeError::new(format!(
                "Can't get field of <{}>, expected <array> or <table>",
                container.type_of()
            )))
        }
    }
}

fn field_set(
    state: &mut Interp,
    container: Value,
    field: Value,
    v: Value,
    hooked: bool,
) -> Result<(), RuntimeError> {
    match container {
        Value::Array(h) => modules::array::set(state, h, field, v),
        Value::Table(h) => {
            modules::table::set(state, h, field, v);
            Ok(())
        }
        _ => {
            if hooked {
                if let Value::Str(key) = field {
                    let key = state.heap.str_text(key).to_string();
                    let hook = state.module(container.type_of()).fieldset_s;
                    if hook(state, container, &key, v) {
                        return Ok(());
                    }
                }
            }
            Err(RuntimeError::new(format!(
                "Can't set field of <{}>, expected <array> or <table>",
                container.type_of()
            )))
        }
    }
}
