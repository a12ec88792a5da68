use std::cmp::Ordering;

use crate::errors::{self, RuntimeError};
use crate::modules::Module;
use crate::state::Interp;
use crate::value::{Type, Value};

pub fn module() -> Module {
    let mut m = Module::new(inspect, equals);
    m.compare = Some(compare);
    m.add = Some(add);
    m.sub = Some(sub);
    m.mul = Some(mul);
    m.div = Some(div);
    m
}

fn float_of(v: Value) -> f64 {
    match v {
        Value::Float(f) => f,
        _ => panic!("float module applied to <{}>", v.type_of()),
    }
}

fn inspect(_state: &Interp, v: Value) -> String {
    // Debug formatting keeps a trailing ".0" on whole floats, so the
    // rendering re-reads as a float literal.
    format!("{:?}", float_of(v))
}

fn equals(_state: &Interp, a: Value, b: Value) -> bool {
    float_of(a) == float_of(b)
}

fn compare(_state: &Interp, a: Value, b: Value) -> Ordering {
    float_of(a).partial_cmp(&float_of(b)).unwrap_or(Ordering::Equal)
}

fn add(_state: &mut Interp, a: Value, b: Value) -> Result<Value, RuntimeError> {
    let a = float_of(a);
    match b {
        Value::Float(b) => Ok(Value::Float(a + b)),
        Value::Int(b) => Ok(Value::Float(a + b as f64)),
        _ => Err(errors::type_mismatch2(Type::Float, Type::Int, b.type_of())),
    }
}

fn sub(_state: &mut Interp, a: Value, b: Value) -> Result<Value, RuntimeError> {
    let a = float_of(a);
    match b {
        Value::Float(b) => Ok(Value::Float(a - b)),
        Value::Int(b) => Ok(Value::Float(a - b as f64)),
        _ => Err(errors::type_mismatch2(Type::Float, Type::Int, b.type_of())),
    }
}

fn mul(_state: &mut Interp, a: Value, b: Value) -> Result<Value, RuntimeError> {
    let a = float_of(a);
    match b {
        Value::Float(b) => Ok(Value::Float(a * b)),
        Value::Int(b) => Ok(Value::Float(a * b as f64)),
        _ => Err(errors::type_mismatch2(Type::Float, Type::Int, b.type_of())),
    }
}

fn div(_state: &mut Interp, a: Value, b: Value) -> Result<Value, RuntimeError> {
    let a = float_of(a);
    match b {
        Value::Float(b) if b == 0.0 => Err(errors::division_by_zero()),
        Value::Int(0) => Err(errors::division_by_zero()),
        Value::Float(b) => Ok(Value::Float(a / b)),
        Value::Int(b) => Ok(Value::Float(a / b as f64)),
        _ => Err(errors::type_mismatch2(Type::Float, Type::Int, b.type_of())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_int_division_promotes() {
        let mut state = Interp::new();
        match div(&mut state, Value::Float(5.0), Value::Int(2)) {
            Ok(Value::Float(f)) => assert_eq!(f, 2.5),
            other => panic!("expected 2.5, got {:?}", other),
        }
    }

    #[test]
    fn zero_divisor_never_yields_infinity() {
        let mut state = Interp::new();
        assert!(div(&mut state, Value::Float(5.0), Value::Float(0.0)).is_err());
        assert!(div(&mut state, Value::Float(5.0), Value::Int(0)).is_err());
    }

    #[test]
    fn modulo_is_not_defined_for_floats() {
        let state = Interp::new();
        assert!(state.module(Type::Float).modulo.is_none());
    }
}
