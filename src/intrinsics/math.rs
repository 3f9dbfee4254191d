//! Math intrinsics (spec §4.4 "Math").

use crate::error::RuntimeError;
use crate::value::Value;
use crate::vm::Machine;

use super::{arg, arg_opt, expect_number};

pub fn abs(m: &Machine, args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::Number(expect_number(m, &arg(args, 0), "abs")?.abs()))
}

pub fn acos(m: &Machine, args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::Number(expect_number(m, &arg(args, 0), "acos")?.acos()))
}

pub fn asin(m: &Machine, args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::Number(expect_number(m, &arg(args, 0), "asin")?.asin()))
}

/// `atan(y, x)`: two-argument arctangent; `x` defaults to `1` (matching the
/// single-argument `atan(y)` form some callers use).
pub fn atan(m: &Machine, args: &[Value]) -> Result<Value, RuntimeError> {
    let y = expect_number(m, &arg(args, 0), "atan")?;
    let x = match arg_opt(args, 1) {
        Some(v) => expect_number(m, &v, "atan")?,
        None => 1.0,
    };
    Ok(Value::Number(y.atan2(x)))
}

pub fn ceil(m: &Machine, args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::Number(expect_number(m, &arg(args, 0), "ceil")?.ceil()))
}

pub fn floor(m: &Machine, args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::Number(expect_number(m, &arg(args, 0), "floor")?.floor()))
}

pub fn cos(m: &Machine, args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::Number(expect_number(m, &arg(args, 0), "cos")?.cos()))
}

pub fn sin(m: &Machine, args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::Number(expect_number(m, &arg(args, 0), "sin")?.sin()))
}

pub fn tan(m: &Machine, args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::Number(expect_number(m, &arg(args, 0), "tan")?.tan()))
}

/// `log(x, base)`: natural log by default, arbitrary base if given.
pub fn log(m: &Machine, args: &[Value]) -> Result<Value, RuntimeError> {
    let x = expect_number(m, &arg(args, 0), "log")?;
    match arg_opt(args, 1) {
        Some(base_v) => {
            let base = expect_number(m, &base_v, "log")?;
            Ok(Value::Number(x.log(base)))
        }
        None => Ok(Value::Number(x.ln())),
    }
}

pub fn sign(m: &Machine, args: &[Value]) -> Result<Value, RuntimeError> {
    let x = expect_number(m, &arg(args, 0), "sign")?;
    Ok(Value::Number(if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }))
}

pub fn sqrt(m: &Machine, args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::Number(expect_number(m, &arg(args, 0), "sqrt")?.sqrt()))
}

/// `round(x, places)`; negative `places` rounds to powers of ten (spec
/// §4.4 "`round(x, places)` — `places<0` rounds to powers of 10").
pub fn round(m: &Machine, args: &[Value]) -> Result<Value, RuntimeError> {
    let x = expect_number(m, &arg(args, 0), "round")?;
    let places = match arg_opt(args, 1) {
        Some(v) => expect_number(m, &v, "round")?.trunc() as i32,
        None => 0,
    };
    let factor = 10f64.powi(places);
    Ok(Value::Number((x * factor).round() / factor))
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
    fn round_with_negative_places_rounds_to_power_of_ten() {
        let machine = m();
        let v = round(&machine, &[Value::Number(1234.0), Value::Number(-2.0)]).unwrap();
        assert_eq!(v.as_number(), Some(1200.0));
    }

    #[test]
    fn sign_matches_spec() {
        let machine = m();
        assert_eq!(sign(&machine, &[Value::Number(-5.0)]).unwrap().as_number(), Some(-1.0));
        assert_eq!(sign(&machine, &[Value::Number(0.0)]).unwrap().as_number(), Some(0.0));
    }
}
