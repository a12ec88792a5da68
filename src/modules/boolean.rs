use std::cmp::Ordering;

use crate::modules::Module;
use crate::state::Interp;
use crate::value::Value;

pub fn module() -> Module {
    let mut m = Module::new(inspect, equals);
    m.compare = Some(compare);
    m
}

fn bool_of(v: Value) -> bool {
    match v {
        Value::Bool(b) => b,
        _ => panic!("bool module applied to <{}>", v.type_of()),
    }
}

fn inspect(_state: &Interp, v: Value) -> String {
    if bool_of(v) { "true" } else { "false" }.to_string()
}

fn equals(_state: &Interp, a: Value, b: Value) -> bool {
    bool_of(a) == bool_of(b)
}

fn compare(_state: &Interp, a: Value, b: Value) -> Ordering {
    bool_of(a).cmp(&bool_of(b))
}
