//! Bitwise intrinsics: sign-magnitude split over a 32-bit absolute value,
//! then the sign is recombined onto the result (spec §4.4 "Bitwise").

use crate::error::RuntimeError;
use crate::value::Value;
use crate::vm::Machine;

use super::{arg, expect_number};

fn to_u32_magnitude(x: f64) -> (bool, u32) {
    (x < 0.0, x.abs() as u32)
}

pub fn bit_and(m: &Machine, args: &[Value]) -> Result<Value, RuntimeError> {
    let a = expect_number(m, &arg(args, 0), "bitAnd")?;
    let b = expect_number(m, &arg(args, 1), "bitAnd")?;
    let (sa, ma) = to_u32_magnitude(a);
    let (sb, mb) = to_u32_magnitude(b);
    let result = ma & mb;
    let sign = if sa && sb { -1.0 } else { 1.0 };
    Ok(Value::Number(sign * result as f64))
}

pub fn bit_or(m: &Machine, args: &[Value]) -> Result<Value, RuntimeError> {
    let a = expect_number(m, &arg(args, 0), "bitOr")?;
    let b = expect_number(m, &arg(args, 1), "bitOr")?;
    let (sa, ma) = to_u32_magnitude(a);
    let (sb, mb) = to_u32_magnitude(b);
    let result = ma | mb;
    let sign = if sa || sb { -1.0 } else { 1.0 };
    Ok(Value::Number(sign * result as f64))
}

pub fn bit_xor(m: &Machine, args: &[Value]) -> Result<Value, RuntimeError> {
    let a = expect_number(m, &arg(args, 0), "bitXor")?;
    let b = expect_number(m, &arg(args, 1), "bitXor")?;
    let (sa, ma) = to_u32_magnitude(a);
    let (sb, mb) = to_u32_magnitude(b);
    let result = ma ^ mb;
    let sign = if sa != sb { -1.0 } else { 1.0 };
    Ok(Value::Number(sign * result as f64))
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
    fn bit_and_of_positives() {
        let machine = m();
        let v = bit_and(&machine, &[Value::Number(6.0), Value::Number(3.0)]).unwrap();
        assert_eq!(v.as_number(), Some(2.0));
    }
}
