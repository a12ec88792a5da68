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
    m.modulo = Some(modulo);
    m
}

fn int_of(v: Value) -> i64 {
    match v {
        Value::Int(i) => i,
        _ => panic!("int module applied to <{}>", v.type_of()),
    }
}

fn inspect(_state: &Interp, v: Value) -> String {
    int_of(v).to_string()
}

fn equals(_state: &Interp, a: Value, b: Value) -> bool {
    int_of(a) == int_of(b)
}

fn compare(_state: &Interp, a: Value, b: Value) -> Ordering {
    int_of(a).cmp(&int_of(b))
}

fn add(_state: &mut Interp, a: Value, b: Value) -> Result<Value, RuntimeError> {
    let a = int_of(a);
    match b {
        Value::Int(b) => Ok(Value::Int(a.wrapping_add(b))),
        Value::Float(b) => Ok(Value::Float(a as f64 + b)),
        _ => Err(errors::type_mismatch2(Type::Int, Type::Float, b.type_of())),
    }
}

fn sub(_state: &mut Interp, a: Value, b: Value) -> Result<Value, RuntimeError> {
    let a = int_of(a);
    match b {
        Value::Int(b) => Ok(Value::Int(a.wrapping_sub(b))),
        Value::Float(b) => Ok(Value::Float(a as f64 - b)),
        _ => Err(errors::type_mismatch2(Type::Int, Type::Float, b.type_of())),
    }
}

fn mul(_state: &mut Interp, a: Value, b: Value) -> Result<Value, RuntimeError> {
    let a = int_of(a);
    match b {
        Value::Int(b) => Ok(Value::Int(a.wrapping_mul(b))),
        Value::Float(b) => Ok(Value::Float(a as f64 * b)),
        _ => Err(errors::type_mismatch2(Type::Int, Type::Float, b.type_of())),
    }
}

fn div(_state: &mut Interp, a: Value, b: Value) -> Result<Value, RuntimeError> {
    let a = int_of(a);
    match b {
        Value::Int(0) => Err(errors::division_by_zero()),
        Value::Int(b) => Ok(Value::Int(a.wrapping_div(b))),
        Value::Float(b) if b == 0.0 => Err(errors::division_by_zero()),
        Value::Float(b) => Ok(Value::Float(a as f64 / b)),
        _ => Err(errors::type_mismatch2(Type::Int, Type::Float, b.type_of())),
    }
}

fn modulo(_state: &mut Interp, a: Value, b: Value) -> Result<Value, RuntimeError> {
    let a = int_of(a);
    match b {
        Value::Int(0) => Err(errors::division_by_zero()),
        Value::Int(b) => Ok(Value::Int(a.wrapping_rem(b))),
        _ => Err(errors::type_mismatch(Type::Int, b.type_of())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_int_stays_int() {
        let mut state = Interp::new();
        assert!(matches!(add(&mut state, Value::Int(2), Value::Int(3)), Ok(Value::Int(5))));
        assert!(matches!(mul(&mut state, Value::Int(4), Value::Int(5)), Ok(Value::Int(20))));
        assert!(matches!(div(&mut state, Value::Int(7), Value::Int(2)), Ok(Value::Int(3))));
        assert!(matches!(modulo(&mut state, Value::Int(7), Value::Int(2)), Ok(Value::Int(1))));
    }

    #[test]
    fn int_float_promotes_to_float() {
        let mut state = Interp::new();
        match add(&mut state, Value::Int(2), Value::Float(0.5)) {
            Ok(Value::Float(f)) => assert_eq!(f, 2.5),
            other => panic!("expected float, got {:?}", other),
        }
    }

    #[test]
    fn division_by_zero_raises() {
        let mut state = Interp::new();
        assert!(div(&mut state, Value::Int(5), Value::Int(0)).is_err());
        assert!(div(&mut state, Value::Int(5), Value::Float(0.0)).is_err());
        assert!(modulo(&mut state, Value::Int(5), Value::Int(0)).is_err());
    }

    #[test]
    fn arithmetic_wraps_at_the_boundaries() {
        let mut state = Interp::new();
        assert!(matches!(
            add(&mut state, Value::Int(i64::MAX), Value::Int(1)),
            Ok(Value::Int(i64::MIN))
        ));
        assert!(matches!(
            div(&mut state, Value::Int(i64::MIN), Value::Int(-1)),
            Ok(Value::Int(i64::MIN))
        ));
    }

    #[test]
    fn mismatched_operand_raises_naming_both_expected_types() {
        let mut state = Interp::new();
        let err = add(&mut state, Value::Int(1), Value::Bool(true)).unwrap_err();
        assert!(err.message.contains("<int>"));
        assert!(err.message.contains("<float>"));
        assert!(err.message.contains("<bool>"));
    }
}
