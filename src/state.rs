use std::collections::HashMap;

use crate::chunk::{ChunkArena, ChunkId};
use crate::errors::RuntimeError;
use crate::heap::{ArrayObject, FunctionObject, Handle, Heap, ObjKind, StrObject, TableObject};
use crate::modules::{self, Module};
use crate::value::{self, Type, Value, TYPE_COUNT};

/// Tables are sized at creation but never below this many slots.
const TABLE_MIN_SLOTS: usize = 16;

/// The interpreter state: heap, chunk arena, per-type module registry,
/// interned strings, the persistent top-level program value, and the current
/// error context. Created once per program lifetime and passed by reference
/// into every compiler, VM and GC operation.
pub struct Interp {
    pub heap: Heap,
    pub chunks: ChunkArena,
    modules: [Module; TYPE_COUNT],
    intern: HashMap<String, Handle>,
    /// The top-level program function. A REPL keeps compiling into this
    /// value's chunk so top-level variables persist across evaluations.
    pub main: Value,
    pub debug: bool,
    error: Option<RuntimeError>,
}

impl Interp {
    pub fn new() -> Self {
        Interp {
            heap: Heap::new(),
            chunks: ChunkArena::new(),
            modules: modules::registry(),
            intern: HashMap::new(),
            main: Value::Nil,
            debug: false,
            error: None,
        }
    }

    #[inline(always)]
    pub fn module(&self, t: Type) -> &Module {
        &self.modules[t as usize]
    }

    /// Intern `text`: identical literals share one heap string that sweep
    /// never reclaims.
    pub fn intern_string(&mut self, text: &str) -> Value {
        if let Some(&h) = self.intern.get(text) {
            return Value::Str(h);
        }
        let h = self.heap.alloc(ObjKind::Str(StrObject {
            text: text.to_string(),
            interned: true,
        }));
        self.intern.insert(text.to_string(), h);
        Value::Str(h)
    }

    /// A fresh, collectable string (runtime results such as concatenations).
    pub fn new_string(&mut self, text: String) -> Value {
        Value::Str(self.heap.alloc(ObjKind::Str(StrObject {
            text,
            interned: false,
        })))
    }

    /// An array of `size` nil elements.
    pub fn new_array(&mut self, size: usize) -> Value {
        self.new_array_from(vec![Value::Nil; size])
    }

    pub fn new_array_from(&mut self, values: Vec<Value>) -> Value {
        Value::Array(self.heap.alloc(ObjKind::Array(ArrayObject { values })))
    }

    pub fn new_table(&mut self, size: usize) -> Value {
        let slots = size.max(TABLE_MIN_SLOTS);
        Value::Table(self.heap.alloc(ObjKind::Table(TableObject {
            entries: vec![None; slots],
        })))
    }

    pub fn new_function(&mut self, chunk: ChunkId, nargs: u8, takes_self: bool) -> Value {
        Value::Function(self.heap.alloc(ObjKind::Function(FunctionObject {
            chunk,
            nargs,
            takes_self,
        })))
    }

    /// Add `v` to the chunk's constant pool, reusing an existing slot if an
    /// equal constant is already present.
    pub fn chunk_add_constant(&mut self, id: ChunkId, v: Value) -> usize {
        let existing = self
            .chunks
            .get(id)
            .consts
            .iter()
            .position(|c| value::equal(self, *c, v));
        match existing {
            Some(index) => index,
            None => {
                let consts = &mut self.chunks.get_mut(id).consts;
                consts.push(v);
                consts.len() - 1
            }
        }
    }

    pub fn set_error(&mut self, e: RuntimeError) {
        self.error = Some(e);
    }

    pub fn clear_error(&mut self) {
        self.error = None;
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn last_error(&self) -> Option<&RuntimeError> {
        self.error.as_ref()
    }

    /// Explicitly run a collection. Everything reachable from `roots`
    /// survives; interned strings always survive; the rest is finalized.
    pub fn collect(&mut self, roots: &[Value]) -> usize {
        self.heap.collect(roots, &mut self.chunks)
    }
}

impl Default for Interp {
    fn default() -> Self {
        Interp::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_deduplicates_by_content() {
        let mut state = Interp::new();
        let a = state.intern_string("hello");
        let b = state.intern_string("hello");
        assert_eq!(a.gc_handle(), b.gc_handle());
        let c = state.new_string("hello".to_string());
        assert_ne!(a.gc_handle(), c.gc_handle());
    }

    #[test]
    fn constants_are_deduplicated_by_equality() {
        let mut state = Interp::new();
        let id = state.chunks.alloc(None);
        let a = state.chunk_add_constant(id, Value::Int(42));
        let b = state.chunk_add_constant(id, Value::Int(42));
        let c = state.chunk_add_constant(id, Value::Float(1.5));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(state.chunks.get(id).consts.len(), 2);

        let s1 = state.intern_string("txt");
        let s2 = state.new_string("txt".to_string());
        let i1 = state.chunk_add_constant(id, s1);
        let i2 = state.chunk_add_constant(id, s2);
        assert_eq!(i1, i2, "string constants dedup by content");
    }

    #[test]
    fn collect_rooted_at_nothing_keeps_interned_strings() {
        let mut state = Interp::new();
        let interned = state.intern_string("stay");
        let fresh = state.new_string("go".to_string());
        state.collect(&[]);
        assert!(state.heap.contains(interned.gc_handle().unwrap()));
        assert!(!state.heap.contains(fresh.gc_handle().unwrap()));
    }
}
