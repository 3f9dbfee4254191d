//! The tagged-union runtime value, plus the three compile-time expression
//! nodes (`Var`, `Temp`, `SeqElem`) that self-evaluate in a [`crate::vm::Context`].
//!
//! Kept as a closed `match`-dispatched sum per the Design Notes: dynamic
//! typing is modeled as data, not open subtyping, so the hot paths
//! (equality, `isa`, arithmetic) stay a single `match` each.

pub mod format;
pub mod map;

mod function;

pub use function::{Param, VFunction};
pub use map::MsMap;

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

/// Maximum length for strings and lists (2^24 - 1), per spec §3.
pub const MAX_SIZE: usize = (1 << 24) - 1;

/// How strictly a not-yet-bound local name is treated while compiling the
/// RHS of its own assignment (spec §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalOnlyMode {
    Off,
    Warn,
    Strict,
}

pub type Rlist = Rc<RefCell<Vec<Value>>>;
pub type Rmap = Rc<RefCell<MsMap>>;

#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Number(f64),
    String(Rc<str>),
    List(Rlist),
    Map(Rmap),
    Function(Rc<VFunction>, Option<Rmap>),
    /// A name resolved from the intrinsic table by plain identifier lookup
    /// (spec §4.3 `get_var` step 6), callable through the same
    /// `CallFunctionA` protocol as a user function.
    Intrinsic(Rc<str>),

    // --- compile-time expression nodes; never appear as a "settled" runtime
    // value but flow through TAC operands and self-evaluate in a context ---
    Var {
        name: Rc<str>,
        no_invoke: bool,
        local_only: LocalOnlyMode,
    },
    Temp(usize),
    SeqElem {
        base: Box<Value>,
        index: Box<Value>,
        no_invoke: bool,
    },
}

impl Value {
    pub fn string(s: impl Into<Rc<str>>) -> Self {
        Value::String(s.into())
    }

    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn map(map: MsMap) -> Self {
        Value::Map(Rc::new(RefCell::new(map)))
    }

    pub fn var(name: impl Into<Rc<str>>) -> Self {
        Value::Var {
            name: name.into(),
            no_invoke: false,
            local_only: LocalOnlyMode::Off,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_function(&self) -> bool {
        matches!(self, Value::Function(..) | Value::Intrinsic(_))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Function(..) | Value::Intrinsic(_) => "function",
            Value::Var { .. } | Value::Temp(_) | Value::SeqElem { .. } => "expression",
        }
    }

    /// MiniScript truthiness: nonzero numbers, non-empty strings, and any
    /// list/map/function are truthy; `null` and `0`/`""` are not.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Number(n) => *n != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::List(_) | Value::Map(_) | Value::Function(..) | Value::Intrinsic(_) => true,
            Value::Var { .. } | Value::Temp(_) | Value::SeqElem { .. } => false,
        }
    }

    /// Truncate toward zero, the integer coercion used for jump targets and
    /// `GotoAifTrulyB`'s "integer part != 0" test.
    pub fn as_int(&self) -> i64 {
        match self {
            Value::Number(n) => *n as i64,
            _ => 0,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Key used for map identity comparison (spec §3 "Value identity").
    pub fn identity_key(&self) -> ValueKey {
        match self {
            Value::Null => ValueKey::Null,
            Value::Number(n) => ValueKey::Number(n.to_bits()),
            Value::String(s) => ValueKey::Str(s.clone()),
            Value::List(list) => {
                let items = list.borrow().iter().map(Value::identity_key).collect();
                ValueKey::List(items)
            }
            Value::Map(map) => ValueKey::Ptr(Rc::as_ptr(map) as usize),
            Value::Function(f, _) => ValueKey::Ptr(Rc::as_ptr(f) as usize),
            Value::Intrinsic(name) => ValueKey::Str(name.clone()),
            Value::Var { .. } | Value::Temp(_) | Value::SeqElem { .. } => ValueKey::Null,
        }
    }

    /// Recursive, cycle-safe fuzzy equality returning a double in `[0, 1]`
    /// (spec §3). `1.0` / `0.0` for exact (in)equality of scalars; lists and
    /// maps recurse element-wise, averaging partial matches.
    pub fn fuzzy_eq(&self, other: &Value) -> f64 {
        let mut visited = HashSet::new();
        fuzzy_eq_inner(self, other, &mut visited)
    }

    pub fn eq_bool(&self, other: &Value) -> bool {
        self.fuzzy_eq(other) >= 1.0
    }
}

fn pair_key(a: &Value, b: &Value) -> Option<(usize, usize)> {
    let ptr = |v: &Value| match v {
        Value::List(l) => Some(Rc::as_ptr(l) as usize),
        Value::Map(m) => Some(Rc::as_ptr(m) as usize),
        _ => None,
    };
    Some((ptr(a)?, ptr(b)?))
}

fn fuzzy_eq_inner(a: &Value, b: &Value, visited: &mut HashSet<(usize, usize)>) -> f64 {
    match (a, b) {
        (Value::Null, Value::Null) => 1.0,
        (Value::Number(x), Value::Number(y)) => {
            if x == y {
                1.0
            } else {
                0.0
            }
        }
        (Value::String(x), Value::String(y)) => {
            if x == y {
                1.0
            } else {
                0.0
            }
        }
        (Value::List(x), Value::List(y)) => {
            if Rc::ptr_eq(x, y) {
                return 1.0;
            }
            if let Some(key) = pair_key(a, b) {
                if !visited.insert(key) {
                    return 1.0; // already comparing this pair; assume equal to break cycle
                }
            }
            let xb = x.borrow();
            let yb = y.borrow();
            let result = if xb.len() != yb.len() {
                0.0
            } else if xb.is_empty() {
                1.0
            } else {
                let sum: f64 = xb.iter().zip(yb.iter()).map(|(l, r)| fuzzy_eq_inner(l, r, visited)).sum();
                sum / xb.len() as f64
            };
            if let Some(key) = pair_key(a, b) {
                visited.remove(&key);
            }
            result
        }
        (Value::Map(x), Value::Map(y)) => {
            if Rc::ptr_eq(x, y) {
                return 1.0;
            }
            if let Some(key) = pair_key(a, b) {
                if !visited.insert(key) {
                    return 1.0;
                }
            }
            let xb = x.borrow();
            let yb = y.borrow();
            let result = if xb.len() != yb.len() {
                0.0
            } else if xb.is_empty() {
                1.0
            } else {
                let mut sum = 0.0;
                let mut ok = true;
                for (k, v) in xb.iter() {
                    match yb.get(k) {
                        Some(other_v) => sum += fuzzy_eq_inner(v, &other_v, visited),
                        None => {
                            ok = false;
                            break;
                        }
                    }
                }
                if ok {
                    sum / xb.len() as f64
                } else {
                    0.0
                }
            };
            if let Some(key) = pair_key(a, b) {
                visited.remove(&key);
            }
            result
        }
        (Value::Function(x, _), Value::Function(y, _)) => {
            if Rc::ptr_eq(x, y) {
                1.0
            } else {
                0.0
            }
        }
        _ => 0.0,
    }
}

/// Hashable/eq projection of a [`Value`] used as a map key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueKey {
    Null,
    Number(u64),
    Str(Rc<str>),
    List(Vec<ValueKey>),
    Ptr(usize),
}

pub fn clamp01(x: f64) -> f64 {
    if x.is_nan() {
        0.0
    } else {
        x.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fuzzy_equality_reflexive_and_symmetric_on_cycles() {
        let map = Rc::new(RefCell::new(MsMap::new()));
        let a = Value::Map(map.clone());
        map.borrow_mut().raw_set(Value::string("self"), a.clone());
        assert_eq!(a.fuzzy_eq(&a), 1.0);

        let map2 = Rc::new(RefCell::new(MsMap::new()));
        let b = Value::Map(map2.clone());
        map2.borrow_mut().raw_set(Value::string("self"), b.clone());

        let ab = a.fuzzy_eq(&b);
        let ba = b.fuzzy_eq(&a);
        assert_eq!(ab, ba);
    }

    #[test]
    fn truthy_matches_spec() {
        assert!(!Value::Null.truthy());
        assert!(!Value::Number(0.0).truthy());
        assert!(Value::Number(-1.0).truthy());
        assert!(!Value::string("").truthy());
        assert!(Value::string("x").truthy());
    }

    #[test]
    fn identity_keys_distinguish_numbers_and_strings() {
        assert_eq!(Value::Number(1.0).identity_key(), Value::Number(1.0).identity_key());
        assert_ne!(Value::Number(1.0).identity_key(), Value::string("1").identity_key());
    }
}
