use crate::errors::{self, RuntimeError};
use crate::heap::Handle;
use crate::modules::Module;
use crate::state::Interp;
use crate::value::{self, Type, Value};

pub fn module() -> Module {
    let mut m = Module::new(inspect, equals);
    m.add = Some(add);
    m.sub = Some(sub);
    m.mul = Some(mul);
    m
}

fn array_of(v: Value) -> Handle {
    match v {
        Value::Array(h) => h,
        _ => panic!("array module applied to <{}>", v.type_of()),
    }
}

/// Bounds-checked indexed read; the key must be an Int in `[0, size)`.
pub fn get(state: &Interp, arr: Handle, index: Value) -> Result<Value, RuntimeError> {
    let Value::Int(i) = index else {
        return Err(errors::type_mismatch(Type::Int, index.type_of()));
    };
    let values = &state.heap.array(arr).values;
    if i < 0 || i as usize >= values.len() {
        return Err(RuntimeError::new(format!(
            "index {} out of bounds for array of length {}",
            i,
            values.len()
        )));
    }
    Ok(values[i as usize])
}

/// Bounds-checked indexed write.
pub fn set(state: &mut Interp, arr: Handle, index: Value, v: Value) -> Result<(), RuntimeError> {
    let Value::Int(i) = index else {
        return Err(errors::type_mismatch(Type::Int, index.type_of()));
    };
    let values = &mut state.heap.array_mut(arr).values;
    if i < 0 || i as usize >= values.len() {
        return Err(RuntimeError::new(format!(
            "index {} out of bounds for array of length {}",
            i,
            values.len()
        )));
    }
    values[i as usize] = v;
    Ok(())
}

fn inspect(state: &Interp, v: Value) -> String {
    let parts: Vec<String> = state
        .heap
        .array(array_of(v))
        .values
        .iter()
        .map(|e| value::inspect(state, *e))
        .collect();
    format!("[{}]", parts.join(", "))
}

fn equals(state: &Interp, a: Value, b: Value) -> bool {
    let a = &state.heap.array(array_of(a)).values;
    let b = &state.heap.array(array_of(b)).values;
    a.len() == b.len()
        && a.iter()
            .zip(b.iter())
            .all(|(x, y)| value::equal(state, *x, *y))
}

fn add(state: &mut Interp, a: Value, b: Value) -> Result<Value, RuntimeError> {
    let a = array_of(a);
    let Value::Array(b) = b else {
        return Err(errors::type_mismatch(Type::Array, b.type_of()));
    };
    let mut values = state.heap.array(a).values.clone();
    values.extend_from_slice(&state.heap.array(b).values);
    Ok(state.new_array_from(values))
}

fn sub(state: &mut Interp, a: Value, b: Value) -> Result<Value, RuntimeError> {
    let a = array_of(a);
    let Value::Array(b) = b else {
        return Err(errors::type_mismatch(Type::Array, b.type_of()));
    };
    let mut kept = Vec::new();
    {
        let a_values = &state.heap.array(a).values;
        let b_values = &state.heap.array(b).values;
        for v in a_values {
            if !b_values.iter().any(|d| value::equal(state, *v, *d)) {
                kept.push(*v);
            }
        }
    }
    Ok(state.new_array_from(kept))
}

fn mul(state: &mut Interp, a: Value, b: Value) -> Result<Value, RuntimeError> {
    let a = array_of(a);
    match b {
        Value::Int(n) if n < 0 => Err(RuntimeError::new("negative repeat count")),
        Value::Int(n) => {
            let mut values = Vec::new();
            for _ in 0..n {
                values.extend_from_slice(&state.heap.array(a).values);
            }
            Ok(state.new_array_from(values))
        }
        _ => Err(errors::type_mismatch(Type::Int, b.type_of())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arr(state: &mut Interp, values: &[i64]) -> Value {
        let values = values.iter().map(|i| Value::Int(*i)).collect();
        state.new_array_from(values)
    }

    #[test]
    fn equal_sized_pairwise_equal_arrays_compare_equal() {
        let mut state = Interp::new();
        let a = arr(&mut state, &[1, 2, 3]);
        let b = arr(&mut state, &[1, 2, 3]);
        let c = arr(&mut state, &[1, 2]);
        assert!(value::equal(&state, a, b));
        assert!(!value::equal(&state, a, c));
    }

    #[test]
    fn numeric_tower_reaches_into_elements() {
        let mut state = Interp::new();
        let a = arr(&mut state, &[3]);
        let b = state.new_array_from(vec![Value::Float(3.0)]);
        assert!(value::equal(&state, a, b));
    }

    #[test]
    fn add_concatenates_sub_removes_mul_repeats() {
        let mut state = Interp::new();
        let a = arr(&mut state, &[1, 2]);
        let b = arr(&mut state, &[3]);
        let sum = add(&mut state, a, b).unwrap();
        let expect = arr(&mut state, &[1, 2, 3]);
        assert!(value::equal(&state, sum, expect));

        let a = arr(&mut state, &[1, 2, 3]);
        let b = arr(&mut state, &[2]);
        let diff = sub(&mut state, a, b).unwrap();
        let expect = arr(&mut state, &[1, 3]);
        assert!(value::equal(&state, diff, expect));

        let a = arr(&mut state, &[1, 2]);
        let doubled = mul(&mut state, a, Value::Int(2)).unwrap();
        let expect = arr(&mut state, &[1, 2, 1, 2]);
        assert!(value::equal(&state, doubled, expect));
    }

    #[test]
    fn index_errors() {
        let mut state = Interp::new();
        let a = arr(&mut state, &[1, 2]);
        let h = a.gc_handle().unwrap();
        assert!(get(&state, h, Value::Int(2)).is_err());
        assert!(get(&state, h, Value::Int(-1)).is_err());
        assert!(get(&state, h, Value::Bool(true)).is_err());
        assert!(matches!(get(&state, h, Value::Int(1)), Ok(Value::Int(2))));
        assert!(set(&mut state, h, Value::Int(5), Value::Nil).is_err());
    }

    #[test]
    fn inspect_lists_elements_in_order() {
        let mut state = Interp::new();
        let a = arr(&mut state, &[1, 2, 3]);
        assert_eq!(value::inspect(&state, a), "[1, 2, 3]");
        let empty = state.new_array(0);
        assert_eq!(value::inspect(&state, empty), "[]");
    }
}
