//! Per-type prototype maps (spec §4.3 "`__isa` chain"; §4.4 "Type
//! prototypes"): `"abc".upper` resolves through `string.upper`, where
//! `string` is this lazily-built, per-`Machine` map of intrinsic
//! references. Built once per `Machine` and cached on `Machine::prototypes`
//! so a script mutating `numberType` only affects its own VM.

use crate::value::{MsMap, Rmap, Value};
use crate::vm::Machine;

fn build(names: &[&str]) -> Rmap {
    let mut map = MsMap::new();
    for name in names {
        map.raw_set(Value::string(*name), Value::Intrinsic((*name).into()));
    }
    std::rc::Rc::new(std::cell::RefCell::new(map))
}

pub fn number_type(m: &mut Machine) -> Rmap {
    const NAMES: &[&str] = &[
        "abs", "acos", "asin", "atan", "ceil", "floor", "cos", "sin", "tan", "log", "sign", "sqrt", "round",
        "bitAnd", "bitOr", "bitXor", "char",
    ];
    m.prototypes.number.get_or_insert_with(|| build(NAMES)).clone()
}

pub fn string_type(m: &mut Machine) -> Rmap {
    const NAMES: &[&str] = &[
        "len", "upper", "lower", "val", "code", "indexOf", "hasIndex", "indexes", "insert", "remove", "replace",
        "slice", "split", "hash", "refEquals",
    ];
    m.prototypes.string.get_or_insert_with(|| build(NAMES)).clone()
}

pub fn list_type(m: &mut Machine) -> Rmap {
    const NAMES: &[&str] = &[
        "len", "hasIndex", "indexes", "indexOf", "insert", "remove", "replace", "slice", "values", "join", "push",
        "pop", "pull", "sort", "shuffle", "sum", "refEquals",
    ];
    m.prototypes.list.get_or_insert_with(|| build(NAMES)).clone()
}

pub fn map_type(m: &mut Machine) -> Rmap {
    const NAMES: &[&str] = &[
        "len", "hasIndex", "indexes", "indexOf", "remove", "replace", "values", "sum", "hash", "refEquals",
    ];
    m.prototypes.map.get_or_insert_with(|| build(NAMES)).clone()
}

pub fn func_ref_type(m: &mut Machine) -> Rmap {
    const NAMES: &[&str] = &["refEquals"];
    m.prototypes.func_ref.get_or_insert_with(|| build(NAMES)).clone()
}
