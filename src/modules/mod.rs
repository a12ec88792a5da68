//! Per-type operation tables. Each value type registers one [`Module`] in the
//! interpreter state; the VM resolves operator dispatch through the table of
//! the left operand's type.

pub mod array;
pub mod boolean;
pub mod float;
pub mod function;
pub mod int;
pub mod nil;
pub mod string;
pub mod table;

use std::cmp::Ordering;

use crate::errors::RuntimeError;
use crate::state::Interp;
use crate::value::{Value, TYPE_COUNT};

pub type InspectFn = fn(&Interp, Value) -> String;
pub type EqualsFn = fn(&Interp, Value, Value) -> bool;
pub type CompareFn = fn(&Interp, Value, Value) -> Ordering;
pub type BinaryFn = fn(&mut Interp, Value, Value) -> Result<Value, RuntimeError>;
pub type FieldGetFn = fn(&Interp, Value, &str) -> Option<Value>;
pub type FieldSetFn = fn(&mut Interp, Value, &str, Value) -> bool;

/// Operation table for one value type. `inspect` and `equals` are mandatory;
/// the optional operators fall back to a "no such method" / compare-mismatch
/// error when absent. `fieldget_s`/`fieldset_s` handle string-keyed field
/// access for non-container types; every current type declines.
pub struct Module {
    pub inspect: InspectFn,
    pub equals: EqualsFn,
    pub fieldget_s: FieldGetFn,
    pub fieldset_s: FieldSetFn,
    pub compare: Option<CompareFn>,
    pub add: Option<BinaryFn>,
    pub sub: Option<BinaryFn>,
    pub mul: Option<BinaryFn>,
    pub div: Option<BinaryFn>,
    pub modulo: Option<BinaryFn>,
}

impl Module {
    pub fn new(inspect: InspectFn, equals: EqualsFn) -> Self {
        Module {
            inspect,
            equals,
            fieldget_s: fieldget_declined,
            fieldset_s: fieldset_declined,
            compare: None,
            add: None,
            sub: None,
            mul: None,
            div: None,
            modulo: None,
        }
    }
}

fn fieldget_declined(_state: &Interp, _this: Value, _field: &str) -> Option<Value> {
    None
}

fn fieldset_declined(_state: &mut Interp, _this: Value, _field: &str, _v: Value) -> bool {
    false
}

/// The module table, indexed by `Type as usize`.
pub fn registry() -> [Module; TYPE_COUNT] {
    [
        nil::module(),
        boolean::module(),
        int::module(),
        float::module(),
        string::module(),
        array::module(),
        table::module(),
        function::module(),
    ]
}
