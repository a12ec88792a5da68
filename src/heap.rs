use crate::chunk::{ChunkArena, ChunkId};
use crate::value::Value;

// Lightweight tracing macro (only active with the gc_debug feature)
#[cfg(feature = "gc_debug")]
macro_rules! gc_trace { ($($arg:tt)*) => { eprintln!("[gc-trace] {}", format_args!($($arg)*)); } }
#[cfg(not(feature = "gc_debug"))]
macro_rules! gc_trace { ($($arg:tt)*) => {}; }

/// Index of a live object in the heap's slot arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(u32);

impl Handle {
    #[inline(always)]
    pub fn index(&self) -> u32 {
        self.0
    }
}

/// Immutable byte string. Interned strings are owned by the interner for the
/// life of the state and are never reclaimed by a collection.
pub struct StrObject {
    pub text: String,
    pub interned: bool,
}

/// Fixed-logical-size sequence of values. Index operations bounds-check
/// against `values.len()`.
pub struct ArrayObject {
    pub values: Vec<Value>,
}

/// Open-addressed value-to-value mapping. An empty slot is `None`, a real
/// third state distinct from any nil the program can construct.
pub struct TableObject {
    pub entries: Vec<Option<(Value, Value)>>,
}

/// A compiled function: its chunk, declared arity, and whether slot 0 binds
/// an implicit receiver. The chunk is owned exclusively by this function and
/// is retired when the function is reclaimed.
#[derive(Debug, Clone, Copy)]
pub struct FunctionObject {
    pub chunk: ChunkId,
    pub nargs: u8,
    pub takes_self: bool,
}

pub enum ObjKind {
    Str(StrObject),
    Array(ArrayObject),
    Table(TableObject),
    Function(FunctionObject),
}

struct HeapObject {
    marked: bool,
    kind: ObjKind,
}

/// Aggregated collector statistics.
#[derive(Default, Debug, Clone)]
pub struct GcStats {
    pub cycles: u64,
    pub total_freed: usize,
    pub last_freed: usize,
}

impl GcStats {
    fn record(&mut self, freed: usize) {
        self.cycles += 1;
        self.total_freed += freed;
        self.last_freed = freed;
    }
}

/// Mark-and-sweep heap. Objects live in an arena indexed by [`Handle`];
/// collection is explicitly requested with the roots that must survive.
pub struct Heap {
    slots: Vec<Option<HeapObject>>,
    free: Vec<u32>,
    stats: GcStats,
}

impl Heap {
    pub fn new() -> Self {
        Heap {
            slots: Vec::new(),
            free: Vec::new(),
            stats: GcStats::default(),
        }
    }

    pub fn alloc(&mut self, kind: ObjKind) -> Handle {
        let obj = HeapObject { marked: false, kind };
        let handle = match self.free.pop() {
            Some(i) => {
                self.slots[i as usize] = Some(obj);
                Handle(i)
            }
            None => {
                self.slots.push(Some(obj));
                Handle((self.slots.len() - 1) as u32)
            }
        };
        gc_trace!("alloc {}", handle.index());
        handle
    }

    #[inline(always)]
    fn get(&self, h: Handle) -> &ObjKind {
        match &self.slots[h.0 as usize] {
            Some(obj) => &obj.kind,
            None => panic!("use of reclaimed heap object {}", h.0),
        }
    }

    #[inline(always)]
    fn get_mut(&mut self, h: Handle) -> &mut ObjKind {
        match &mut self.slots[h.0 as usize] {
            Some(obj) => &mut obj.kind,
            None => panic!("use of reclaimed heap object {}", h.0),
        }
    }

    pub fn str_text(&self, h: Handle) -> &str {
        match self.get(h) {
            ObjKind::Str(s) => &s.text,
            _ => panic!("heap object {} is not a string", h.0),
        }
    }

    pub fn array(&self, h: Handle) -> &ArrayObject {
        match self.get(h) {
            ObjKind::Array(a) => a,
            _ => panic!("heap object {} is not an array", h.0),
        }
    }

    pub fn array_mut(&mut self, h: Handle) -> &mut ArrayObject {
        match self.get_mut(h) {
            ObjKind::Array(a) => a,
            _ => panic!("heap object {} is not an array", h.0),
        }
    }

    pub fn table(&self, h: Handle) -> &TableObject {
        match self.get(h) {
            ObjKind::Table(t) => t,
            _ => panic!("heap object {} is not a table", h.0),
        }
    }

    pub fn table_mut(&mut self, h: Handle) -> &mut TableObject {
        match self.get_mut(h) {
            ObjKind::Table(t) => t,
            _ => panic!("heap object {} is not a table", h.0),
        }
    }

    pub fn function(&self, h: Handle) -> &FunctionObject {
        match self.get(h) {
            ObjKind::Function(f) => f,
            _ => panic!("heap object {} is not a function", h.0),
        }
    }

    pub fn function_mut(&mut self, h: Handle) -> &mut FunctionObject {
        match self.get_mut(h) {
            ObjKind::Function(f) => f,
            _ => panic!("heap object {} is not a function", h.0),
        }
    }

    /// Whether the handle still refers to a live object.
    pub fn contains(&self, h: Handle) -> bool {
        self.slots
            .get(h.0 as usize)
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }

    pub fn live_objects(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn stats(&self) -> &GcStats {
        &self.stats
    }

    /// Mark everything reachable from `roots`, then sweep the whole arena.
    /// Unmarked non-interned objects are finalized: a reclaimed function also
    /// retires its chunk. Returns the number of objects freed.
    pub fn collect(&mut self, roots: &[Value], chunks: &mut ChunkArena) -> usize {
        let mut gray: Vec<Handle> = roots.iter().filter_map(|v| v.gc_handle()).collect();
        while let Some(h) = gray.pop() {
            let Some(obj) = self.slots[h.0 as usize].as_mut() else {
                continue;
            };
            if obj.marked {
                continue;
            }
            obj.marked = true;
            gc_trace!("mark {}", h.index());
            match &obj.kind {
                ObjKind::Str(_) => {}
                ObjKind::Array(a) => {
                    gray.extend(a.values.iter().filter_map(Value::gc_handle));
                }
                ObjKind::Table(t) => {
                    for (k, v) in t.entries.iter().flatten() {
                        gray.extend(k.gc_handle());
                        gray.extend(v.gc_handle());
                    }
                }
                ObjKind::Function(f) => {
                    // The chunk is arena memory, not a heap object: its
                    // constants and variable slots are this function's
                    // children.
                    if let Some(chunk) = chunks.try_get(f.chunk) {
                        gray.extend(chunk.consts.iter().filter_map(Value::gc_handle));
                        gray.extend(chunk.vars.iter().filter_map(|v| v.value.gc_handle()));
                    }
                }
            }
        }

        let mut freed = 0;
        for i in 0..self.slots.len() {
            let reclaim = match &self.slots[i] {
                None => false,
                Some(obj) if obj.marked => false,
                Some(obj) => !matches!(&obj.kind, ObjKind::Str(s) if s.interned),
            };
            if reclaim {
                if let Some(obj) = self.slots[i].take() {
                    if let ObjKind::Function(f) = obj.kind {
                        chunks.free(f.chunk);
                    }
                    gc_trace!("free {}", i);
                    self.free.push(i as u32);
                    freed += 1;
                }
            } else if let Some(obj) = self.slots[i].as_mut() {
                obj.marked = false;
            }
        }
        self.stats.record(freed);
        gc_trace!("cycle done: freed={}", freed);
        freed
    }
}

impl Default for Heap {
    fn default() -> Self {
        Heap::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_string(heap: &mut Heap, text: &str) -> Handle {
        heap.alloc(ObjKind::Str(StrObject {
            text: text.to_string(),
            interned: false,
        }))
    }

    #[test]
    fn collect_frees_unreachable_objects() {
        let mut heap = Heap::new();
        let mut chunks = ChunkArena::new();
        let keep = fresh_string(&mut heap, "keep");
        let drop1 = fresh_string(&mut heap, "drop1");
        let drop2 = fresh_string(&mut heap, "drop2");

        let freed = heap.collect(&[Value::Str(keep)], &mut chunks);
        assert_eq!(freed, 2);
        assert!(heap.contains(keep));
        assert!(!heap.contains(drop1));
        assert!(!heap.contains(drop2));
        assert_eq!(heap.stats().cycles, 1);
        assert_eq!(heap.stats().last_freed, 2);
    }

    #[test]
    fn collect_traces_through_containers() {
        let mut heap = Heap::new();
        let mut chunks = ChunkArena::new();
        let inner = fresh_string(&mut heap, "inner");
        let arr = heap.alloc(ObjKind::Array(ArrayObject {
            values: vec![Value::Str(inner), Value::Int(1)],
        }));
        let key = fresh_string(&mut heap, "key");
        let table = heap.alloc(ObjKind::Table(TableObject {
            entries: vec![Some((Value::Str(key), Value::Array(arr))), None],
        }));
        let garbage = fresh_string(&mut heap, "garbage");

        heap.collect(&[Value::Table(table)], &mut chunks);
        assert!(heap.contains(table));
        assert!(heap.contains(arr));
        assert!(heap.contains(inner));
        assert!(heap.contains(key));
        assert!(!heap.contains(garbage));
    }

    #[test]
    fn interned_strings_survive_every_collection() {
        let mut heap = Heap::new();
        let mut chunks = ChunkArena::new();
        let interned = heap.alloc(ObjKind::Str(StrObject {
            text: "lives".to_string(),
            interned: true,
        }));
        heap.collect(&[], &mut chunks);
        assert!(heap.contains(interned));
    }

    #[test]
    fn reclaiming_a_function_retires_its_chunk() {
        let mut heap = Heap::new();
        let mut chunks = ChunkArena::new();
        let id = chunks.alloc(None);
        let func = heap.alloc(ObjKind::Function(FunctionObject {
            chunk: id,
            nargs: 0,
            takes_self: false,
        }));
        heap.collect(&[], &mut chunks);
        assert!(!heap.contains(func));
        assert!(chunks.try_get(id).is_none());
    }

    #[test]
    fn marks_survive_only_one_cycle() {
        let mut heap = Heap::new();
        let mut chunks = ChunkArena::new();
        let h = fresh_string(&mut heap, "twice");
        heap.collect(&[Value::Str(h)], &mut chunks);
        // The mark bit was cleared; an unrooted second cycle reclaims it.
        heap.collect(&[], &mut chunks);
        assert!(!heap.contains(h));
    }
}
