use crate::heap::Handle;
use crate::modules::Module;
use crate::state::Interp;
use crate::value::Value;

pub fn module() -> Module {
    Module::new(inspect, equals)
}

fn function_of(v: Value) -> Handle {
    match v {
        Value::Function(h) => h,
        _ => panic!("function module applied to <{}>", v.type_of()),
    }
}

fn inspect(_state: &Interp, v: Value) -> String {
    format!("<function {}>", function_of(v).index())
}

fn equals(state: &Interp, a: Value, b: Value) -> bool {
    // Two functions are equal only when they share a chunk.
    state.heap.function(function_of(a)).chunk == state.heap.function(function_of(b)).chunk
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value;

    #[test]
    fn functions_compare_by_chunk_identity() {
        let mut state = Interp::new();
        let c1 = state.chunks.alloc(None);
        let c2 = state.chunks.alloc(None);
        let f1 = state.new_function(c1, 0, false);
        let f2 = state.new_function(c1, 0, false);
        let g = state.new_function(c2, 0, false);
        assert!(value::equal(&state, f1, f2));
        assert!(!value::equal(&state, f1, g));
    }

    #[test]
    fn arithmetic_on_functions_is_a_missing_method() {
        let state = Interp::new();
        let m = state.module(crate::value::Type::Function);
        assert!(m.add.is_none());
        assert!(m.compare.is_none());
    }
}
