use std::cmp::Ordering;

use crate::errors::{self, RuntimeError};
use crate::heap::Handle;
use crate::modules::Module;
use crate::state::Interp;
use crate::value::{Type, Value};

pub fn module() -> Module {
    let mut m = Module::new(inspect, equals);
    m.compare = Some(compare);
    m.add = Some(add);
    m.mul = Some(mul);
    m
}

fn str_of(v: Value) -> Handle {
    match v {
        Value::Str(h) => h,
        _ => panic!("string module applied to <{}>", v.type_of()),
    }
}

fn inspect(state: &Interp, v: Value) -> String {
    format!("\"{}\"", state.heap.str_text(str_of(v)))
}

fn equals(state: &Interp, a: Value, b: Value) -> bool {
    state.heap.str_text(str_of(a)) == state.heap.str_text(str_of(b))
}

fn compare(state: &Interp, a: Value, b: Value) -> Ordering {
    state.heap.str_text(str_of(a)).cmp(state.heap.str_text(str_of(b)))
}

fn add(state: &mut Interp, a: Value, b: Value) -> Result<Value, RuntimeError> {
    let a = str_of(a);
    match b {
        Value::Str(b) => {
            let mut text = state.heap.str_text(a).to_string();
            text.push_str(state.heap.str_text(b));
            Ok(state.new_string(text))
        }
        _ => Err(errors::type_mismatch(Type::String, b.type_of())),
    }
}

fn mul(state: &mut Interp, a: Value, b: Value) -> Result<Value, RuntimeError> {
    let a = str_of(a);
    match b {
        Value::Int(n) if n < 0 => Err(RuntimeError::new("negative repeat count")),
        Value::Int(n) => {
            let text = state.heap.str_text(a).repeat(n as usize);
            Ok(state.new_string(text))
        }
        _ => Err(errors::type_mismatch(Type::Int, b.type_of())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value;

    #[test]
    fn concatenation_builds_a_fresh_string() {
        let mut state = Interp::new();
        let a = state.intern_string("foo");
        let b = state.intern_string("bar");
        let out = add(&mut state, a, b).unwrap();
        assert_eq!(state.heap.str_text(out.gc_handle().unwrap()), "foobar");
        // The result is collectable, unlike its interned operands.
        state.collect(&[]);
        assert!(!state.heap.contains(out.gc_handle().unwrap()));
        assert!(state.heap.contains(a.gc_handle().unwrap()));
    }

    #[test]
    fn repeat_and_reject_negative_counts() {
        let mut state = Interp::new();
        let s = state.intern_string("ab");
        let out = mul(&mut state, s, Value::Int(3)).unwrap();
        assert_eq!(state.heap.str_text(out.gc_handle().unwrap()), "ababab");
        assert!(mul(&mut state, s, Value::Int(-1)).is_err());
    }

    #[test]
    fn inspect_quotes_the_content() {
        let mut state = Interp::new();
        let s = state.intern_string("hi");
        assert_eq!(value::inspect(&state, s), "\"hi\"");
    }
}
