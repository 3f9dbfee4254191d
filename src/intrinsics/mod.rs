//! The intrinsic library: a process-wide table of built-in functions
//! dispatched by name from `CallIntrinsicA` (spec §4.4).
//!
//! Each intrinsic is a plain Rust function `(&mut Machine, &[Value],
//! Option<Value>) -> Result<IntrinsicOutcome, RuntimeError>`; the `Option`
//! carries a prior partial result for the handful of intrinsics that
//! suspend (`wait` is the only one in this crate, but the shape is generic
//! so a host embedding more I/O-bound intrinsics can reuse it).

mod bitwise;
mod control;
mod math;
mod sequence;
mod string;
mod types;

use crate::error::RuntimeError;
use crate::value::{MsMap, Value};
use crate::vm::Machine;

/// The result of one intrinsic invocation (spec §4.4 / Design Notes
/// "Intrinsic table as data").
pub enum IntrinsicOutcome {
    Done(Value),
    Partial(Value),
}

impl From<Value> for IntrinsicOutcome {
    fn from(value: Value) -> Self {
        IntrinsicOutcome::Done(value)
    }
}

/// All names registered in the intrinsic table (spec §4.4.1 roster).
/// Order is the roster's category order; it has no runtime significance
/// beyond documenting the categories in one place.
pub const ROSTER: &[&str] = &[
    // Math
    "abs", "acos", "asin", "atan", "ceil", "floor", "cos", "sin", "tan", "log", "pi", "sign", "sqrt", "round",
    // Bitwise
    "bitAnd", "bitOr", "bitXor",
    // Character
    "char", "code",
    // Sequences
    "len", "hasIndex", "indexes", "indexOf", "insert", "remove", "replace", "slice", "values", "join", "split",
    "push", "pop", "pull", "sort", "shuffle", "sum", "range",
    // Strings
    "lower", "upper", "str", "val", "hash", "refEquals",
    // Type prototypes
    "number", "string", "list", "map", "funcRef",
    // Control / IO
    "print", "yield", "wait", "time", "stackTrace", "intrinsics", "version",
];

pub fn is_registered(name: &str) -> bool {
    ROSTER.contains(&name)
}

/// Dispatch one `CallIntrinsicA`/auto-invoke call by name.
pub fn dispatch(
    machine: &mut Machine,
    name: &str,
    args: Vec<Value>,
    partial: Option<Value>,
) -> Result<IntrinsicOutcome, RuntimeError> {
    match name {
        // -- Math --------------------------------------------------
        "abs" => math::abs(machine, &args).map(Into::into),
        "acos" => math::acos(machine, &args).map(Into::into),
        "asin" => math::asin(machine, &args).map(Into::into),
        "atan" => math::atan(machine, &args).map(Into::into),
        "ceil" => math::ceil(machine, &args).map(Into::into),
        "floor" => math::floor(machine, &args).map(Into::into),
        "cos" => math::cos(machine, &args).map(Into::into),
        "sin" => math::sin(machine, &args).map(Into::into),
        "tan" => math::tan(machine, &args).map(Into::into),
        "log" => math::log(machine, &args).map(Into::into),
        "pi" => Ok(Value::Number(std::f64::consts::PI).into()),
        "sign" => math::sign(machine, &args).map(Into::into),
        "sqrt" => math::sqrt(machine, &args).map(Into::into),
        "round" => math::round(machine, &args).map(Into::into),

        // -- Bitwise -------------------------------------------------
        "bitAnd" => bitwise::bit_and(machine, &args).map(Into::into),
        "bitOr" => bitwise::bit_or(machine, &args).map(Into::into),
        "bitXor" => bitwise::bit_xor(machine, &args).map(Into::into),

        // -- Character -------------------------------------------------
        "char" => string::char_(machine, &args).map(Into::into),
        "code" => string::code(machine, &args).map(Into::into),

        // -- Sequences -------------------------------------------------
        "len" => sequence::len(machine, &args).map(Into::into),
        "hasIndex" => sequence::has_index(machine, &args).map(Into::into),
        "indexes" => sequence::indexes(machine, &args).map(Into::into),
        "indexOf" => sequence::index_of(machine, &args).map(Into::into),
        "insert" => sequence::insert(machine, &args).map(Into::into),
        "remove" => sequence::remove(machine, &args).map(Into::into),
        "replace" => sequence::replace(machine, &args).map(Into::into),
        "slice" => sequence::slice(machine, &args).map(Into::into),
        "values" => sequence::values(machine, &args).map(Into::into),
        "join" => sequence::join(machine, &args).map(Into::into),
        "split" => sequence::split(machine, &args).map(Into::into),
        "push" => sequence::push(machine, &args).map(Into::into),
        "pop" => sequence::pop(machine, &args).map(Into::into),
        "pull" => sequence::pull(machine, &args).map(Into::into),
        "sort" => sequence::sort(machine, &args).map(Into::into),
        "shuffle" => sequence::shuffle(machine, &args).map(Into::into),
        "sum" => sequence::sum(machine, &args).map(Into::into),
        "range" => sequence::range(machine, &args).map(Into::into),

        // -- Strings -------------------------------------------------
        "lower" => string::lower(machine, &args).map(Into::into),
        "upper" => string::upper(machine, &args).map(Into::into),
        "str" => string::str_(machine, &args).map(Into::into),
        "val" => string::val(machine, &args).map(Into::into),
        "hash" => string::hash(machine, &args).map(Into::into),
        "refEquals" => string::ref_equals(machine, &args).map(Into::into),

        // -- Type prototypes -------------------------------------------------
        "number" => Ok(Value::Map(types::number_type(machine)).into()),
        "string" => Ok(Value::Map(types::string_type(machine)).into()),
        "list" => Ok(Value::Map(types::list_type(machine)).into()),
        "map" => Ok(Value::Map(types::map_type(machine)).into()),
        "funcRef" => Ok(Value::Map(types::func_ref_type(machine)).into()),

        // -- Control / IO -------------------------------------------------
        "print" => control::print(machine, &args).map(Into::into),
        "yield" => control::yield_(machine, &args).map(Into::into),
        "wait" => control::wait(machine, &args, partial),
        "time" => Ok(Value::Number(machine.elapsed_seconds()).into()),
        "stackTrace" => Ok(control::stack_trace(machine).into()),
        "intrinsics" => Ok(Value::Map(control::intrinsics_map()).into()),
        "version" => Ok(Value::Map(machine.version_map.clone()).into()),

        other => Err(machine.err(RuntimeError::undefined_identifier(other, machine.context_name()))),
    }
}

/// Resolve `base.name` against the implicit per-type prototype map: the
/// method-dispatch path for primitives (spec §4.3 `__isa` chain note) and
/// the fallback a map's own `__isa` chain takes once it comes up empty
/// (spec §4.4 "Type prototypes").
pub(crate) fn prototype_method(machine: &mut Machine, base: &Value, name: &str) -> Option<Value> {
    let proto = match base {
        Value::Number(_) => types::number_type(machine),
        Value::String(_) => types::string_type(machine),
        Value::List(_) => types::list_type(machine),
        Value::Map(_) => types::map_type(machine),
        Value::Function(..) | Value::Intrinsic(_) => types::func_ref_type(machine),
        _ => return None,
    };
    let found = proto.borrow().get(&Value::string(name));
    found
}

/// Built once per `Machine` and cached on it (spec §4.4 `version`: "cached
/// info map"). `HostInfo` itself is an out-of-scope external collaborator
/// (spec §1); this is the core's own minimal substitute.
pub fn build_version_map() -> MsMap {
    let mut m = MsMap::new();
    m.raw_set(Value::string("version"), Value::string(env!("CARGO_PKG_VERSION")));
    m.raw_set(Value::string("host"), Value::string("miniscript-rs"));
    m.raw_set(Value::string("hostVersion"), Value::Number(1.0));
    m.raw_set(Value::string("hostIsFullyMiniscript"), Value::Number(1.0));
    m
}

// ----------------------------------------------------------------
// shared argument-coercion helpers
// ----------------------------------------------------------------

pub(crate) fn arg(args: &[Value], i: usize) -> Value {
    args.get(i).cloned().unwrap_or(Value::Null)
}

pub(crate) fn arg_opt(args: &[Value], i: usize) -> Option<Value> {
    args.get(i).cloned()
}

pub(crate) fn expect_number(machine: &Machine, v: &Value, who: &str) -> Result<f64, RuntimeError> {
    v.as_number()
        .ok_or_else(|| machine.err(RuntimeError::type_error(format!("{who}: expected a number"), machine.context_name())))
}

pub(crate) fn expect_string(machine: &Machine, v: &Value, who: &str) -> Result<std::rc::Rc<str>, RuntimeError> {
    match v {
        Value::String(s) => Ok(s.clone()),
        _ => Err(machine.err(RuntimeError::type_error(format!("{who}: expected a string"), machine.context_name()))),
    }
}

pub(crate) fn expect_list(machine: &Machine, v: &Value, who: &str) -> Result<crate::value::Rlist, RuntimeError> {
    match v {
        Value::List(l) => Ok(l.clone()),
        _ => Err(machine.err(RuntimeError::type_error(format!("{who}: expected a list"), machine.context_name()))),
    }
}

pub(crate) fn expect_map(machine: &Machine, v: &Value, who: &str) -> Result<crate::value::Rmap, RuntimeError> {
    match v {
        Value::Map(m) => Ok(m.clone()),
        _ => Err(machine.err(RuntimeError::type_error(format!("{who}: expected a map"), machine.context_name()))),
    }
}

/// Resolve a (possibly negative) index against a length, per the
/// negative-wrap rule shared by every sequence intrinsic (spec §4.4).
pub(crate) fn wrap(idx: i64, len: usize) -> Option<usize> {
    let resolved = if idx < 0 { idx + len as i64 } else { idx };
    if resolved < 0 || resolved as usize > len {
        None
    } else {
        Some(resolved as usize)
    }
}
