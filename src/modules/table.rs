use crate::heap::Handle;
use crate::modules::Module;
use crate::state::Interp;
use crate::value::{self, Value};

pub fn module() -> Module {
    Module::new(inspect, equals)
}

fn table_of(v: Value) -> Handle {
    match v {
        Value::Table(h) => h,
        _ => panic!("table module applied to <{}>", v.type_of()),
    }
}

/// Lookup by value equality; a missing key reads as nil.
pub fn get(state: &Interp, table: Handle, key: Value) -> Value {
    for (k, v) in state.heap.table(table).entries.iter().flatten() {
        if value::equal(state, *k, key) {
            return *v;
        }
    }
    Value::Nil
}

enum Slot {
    Existing(usize),
    Empty(usize),
    Full,
}

/// Update an existing entry or linearly probe for an unused slot; a table
/// with no unused slot left grows by one.
pub fn set(state: &mut Interp, table: Handle, key: Value, v: Value) {
    let slot = {
        let entries = &state.heap.table(table).entries;
        let mut empty = None;
        let mut found = None;
        for (i, entry) in entries.iter().enumerate() {
            match entry {
                Some((k, _)) => {
                    if value::equal(state, *k, key) {
                        found = Some(i);
                        break;
                    }
                }
                None => {
                    if empty.is_none() {
                        empty = Some(i);
                    }
                }
            }
        }
        match (found, empty) {
            (Some(i), _) => Slot::Existing(i),
            (None, Some(i)) => Slot::Empty(i),
            (None, None) => Slot::Full,
        }
    };

    let entries = &mut state.heap.table_mut(table).entries;
    match slot {
        Slot::Existing(i) | Slot::Empty(i) => entries[i] = Some((key, v)),
        Slot::Full => entries.push(Some((key, v))),
    }
}

fn inspect(state: &Interp, v: Value) -> String {
    let parts: Vec<String> = state
        .heap
        .table(table_of(v))
        .entries
        .iter()
        .flatten()
        .map(|(k, v)| format!("{}: {}", value::inspect(state, *k), value::inspect(state, *v)))
        .collect();
    format!("{{{}}}", parts.join(", "))
}

fn equals(_state: &Interp, a: Value, b: Value) -> bool {
    table_of(a) == table_of(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_uses_value_equality_not_identity() {
        let mut state = Interp::new();
        let t = table_of(state.new_table(4));
        let k1 = state.new_string("key".to_string());
        set(&mut state, t, k1, Value::Int(1));
        // A different string object with the same content finds the entry.
        let k2 = state.new_string("key".to_string());
        assert!(matches!(get(&state, t, k2), Value::Int(1)));
        // And the numeric tower applies to keys too.
        set(&mut state, t, Value::Int(2), Value::Int(20));
        assert!(matches!(get(&state, t, Value::Float(2.0)), Value::Int(20)));
    }

    #[test]
    fn missing_keys_read_as_nil() {
        let mut state = Interp::new();
        let t = table_of(state.new_table(0));
        assert!(matches!(get(&state, t, Value::Int(9)), Value::Nil));
    }

    #[test]
    fn overwriting_a_key_keeps_one_entry() {
        let mut state = Interp::new();
        let t = table_of(state.new_table(4));
        set(&mut state, t, Value::Int(1), Value::Int(10));
        set(&mut state, t, Value::Int(1), Value::Int(11));
        assert!(matches!(get(&state, t, Value::Int(1)), Value::Int(11)));
        let live = state.heap.table(t).entries.iter().flatten().count();
        assert_eq!(live, 1);
    }

    #[test]
    fn a_full_table_grows_instead_of_dropping_entries() {
        let mut state = Interp::new();
        let t = table_of(state.new_table(0));
        let slots = state.heap.table(t).entries.len();
        for i in 0..(slots as i64 + 4) {
            set(&mut state, t, Value::Int(i), Value::Int(i * 10));
        }
        for i in 0..(slots as i64 + 4) {
            assert!(matches!(get(&state, t, Value::Int(i)), Value::Int(v) if v == i * 10));
        }
    }

    #[test]
    fn tables_compare_by_identity() {
        let mut state = Interp::new();
        let a = state.new_table(0);
        let b = state.new_table(0);
        assert!(value::equal(&state, a, a));
        assert!(!value::equal(&state, a, b));
    }
}
