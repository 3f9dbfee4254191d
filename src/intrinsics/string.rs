//! Character and string intrinsics (spec §4.4 "Character", "Strings").

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use crate::error::RuntimeError;
use crate::value::format::{display_string, parse_number};
use crate::value::Value;
use crate::vm::Machine;

use super::{arg, expect_number, expect_string};

pub fn char_(m: &Machine, args: &[Value]) -> Result<Value, RuntimeError> {
    let code_point = expect_number(m, &arg(args, 0), "char")?;
    let c = char::from_u32(code_point as u32)
        .ok_or_else(|| m.err(RuntimeError::type_error("char: not a valid Unicode code point", m.context_name())))?;
    Ok(Value::string(c.to_string()))
}

pub fn code(m: &Machine, args: &[Value]) -> Result<Value, RuntimeError> {
    let s = expect_string(m, &arg(args, 0), "code")?;
    let c = s
        .chars()
        .next()
        .ok_or_else(|| m.err(RuntimeError::type_error("code: empty string", m.context_name())))?;
    Ok(Value::Number(c as u32 as f64))
}

pub fn lower(m: &Machine, args: &[Value]) -> Result<Value, RuntimeError> {
    let s = expect_string(m, &arg(args, 0), "lower")?;
    Ok(Value::string(s.to_lowercase()))
}

pub fn upper(m: &Machine, args: &[Value]) -> Result<Value, RuntimeError> {
    let s = expect_string(m, &arg(args, 0), "upper")?;
    Ok(Value::string(s.to_uppercase()))
}

/// `str(x)`: the plain (unquoted) string form of any value.
pub fn str_(_m: &Machine, args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::string(display_string(&arg(args, 0))))
}

/// `val(s)`: parse a number out of a string (or pass a number through).
pub fn val(m: &Machine, args: &[Value]) -> Result<Value, RuntimeError> {
    match arg(args, 0) {
        Value::Number(n) => Ok(Value::Number(n)),
        Value::String(s) => {
            let trimmed = s.trim();
            Ok(Value::Number(parse_number(trimmed).unwrap_or(0.0)))
        }
        _ => Err(m.err(RuntimeError::type_error("val: expected a string or number", m.context_name()))),
    }
}

pub fn hash(_m: &Machine, args: &[Value]) -> Result<Value, RuntimeError> {
    let mut hasher = DefaultHasher::new();
    arg(args, 0).identity_key().hash(&mut hasher);
    Ok(Value::Number(hasher.finish() as f64))
}

/// `refEquals(a, b)`: identity comparison (same container/function object,
/// bypassing `==`'s deep/fuzzy semantics).
pub fn ref_equals(_m: &Machine, args: &[Value]) -> Result<Value, RuntimeError> {
    let a = arg(args, 0);
    let b = arg(args, 1);
    let equal = match (&a, &b) {
        (Value::List(x), Value::List(y)) => Rc::ptr_eq(x, y),
        (Value::Map(x), Value::Map(y)) => Rc::ptr_eq(x, y),
        (Value::Function(x, _), Value::Function(y, _)) => Rc::ptr_eq(x, y),
        _ => a.identity_key() == b.identity_key(),
    };
    Ok(Value::Number(equal as i32 as f64))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m() -> Machine {
        crate::vm::Machine::new(
            std::rc::Rc::new(vec![]),
            crate::vm::buffering_sink(std::rc::Rc::new(std::cell::RefCell::new(String::new()))),
            crate::vm::buffering_sink(std::rc::Rc::new(std::cell::RefCell::new(String::new()))),
        )
    }

    #[test]
    fn char_and_code_round_trip() {
        let machine = m();
        let c = char_(&machine, &[Value::Number(65.0)]).unwrap();
        assert_eq!(c.as_str(), Some("A"));
        let back = code(&machine, &[c]).unwrap();
        assert_eq!(back.as_number(), Some(65.0));
    }

    #[test]
    fn val_parses_trimmed_number() {
        let machine = m();
        let v = val(&machine, &[Value::string(" 42.5 ")]).unwrap();
        assert_eq!(v.as_number(), Some(42.5));
    }
}
