//! Numeric formatting and "code form" stringification (spec §6).

use super::Value;
use std::cell::RefCell;
use std::collections::HashSet;

/// Render a number the way `print`/`str` does: integers without decimals,
/// exponential form with 6 significant digits outside `[1e-6, 1e10]`
/// (exponent rendered as `E-06`-style), otherwise decimal with up to 6
/// fractional digits and trailing zeros stripped. `-0` normalizes to `0`.
pub fn format_number(x: f64) -> String {
    if x == 0.0 {
        return "0".to_owned();
    }
    if x.is_nan() {
        return "NaN".to_owned();
    }
    if x.is_infinite() {
        return if x > 0.0 { "Infinity".to_owned() } else { "-Infinity".to_owned() };
    }

    let abs = x.abs();
    if x.fract() == 0.0 && abs < 1e15 {
        return format!("{}", x as i64);
    }

    if abs > 1e10 || abs < 1e-6 {
        return format_exponential(x);
    }

    let mut s = format!("{x:.6}");
    if s.contains('.') {
        while s.ends_with('0') {
            s.pop();
        }
        if s.ends_with('.') {
            s.pop();
        }
    }
    s
}

fn format_exponential(x: f64) -> String {
    let sign = if x < 0.0 { "-" } else { "" };
    let abs = x.abs();
    let exp = abs.log10().floor() as i32;
    let mantissa = abs / 10f64.powi(exp);
    // 6 significant digits total, so 5 after the decimal point.
    let mantissa_str = format!("{mantissa:.5}");
    format!("{sign}{mantissa_str}E{exp:+03}")
}

/// Parse a number from MiniScript numeral text (lexer already validated the
/// character set); used both at compile time (literal folding) and by the
/// `val` intrinsic.
pub fn parse_number(text: &str) -> Option<f64> {
    text.parse::<f64>().ok()
}

thread_local! {
    static CODE_FORM_DEPTH: RefCell<usize> = const { RefCell::new(0) };
}

const MAX_CODE_FORM_DEPTH: usize = 16;

/// Render a value the way map/list inspection and `code` output do: strings
/// quoted with internal `"` doubled, maps as `{k: v, ...}`, lists as
/// `[...]`, with a recursion limit applied per call.
pub fn code_form(value: &Value) -> String {
    let mut visited = HashSet::new();
    code_form_inner(value, &mut visited)
}

fn code_form_inner(value: &Value, visited: &mut HashSet<usize>) -> String {
    let too_deep = CODE_FORM_DEPTH.with(|d| {
        let mut d = d.borrow_mut();
        if *d >= MAX_CODE_FORM_DEPTH {
            true
        } else {
            *d += 1;
            false
        }
    });
    if too_deep {
        return "...".to_owned();
    }
    let result = code_form_uncounted(value, visited);
    CODE_FORM_DEPTH.with(|d| *d.borrow_mut() -= 1);
    result
}

fn code_form_uncounted(value: &Value, visited: &mut HashSet<usize>) -> String {
    match value {
        Value::Null => "null".to_owned(),
        Value::Number(n) => format_number(*n),
        Value::String(s) => quote_string(s),
        Value::List(list) => {
            let ptr = std::rc::Rc::as_ptr(list) as usize;
            if !visited.insert(ptr) {
                return "[...]".to_owned();
            }
            let items = list
                .borrow()
                .iter()
                .map(|v| code_form_inner(v, visited))
                .collect::<Vec<_>>()
                .join(", ");
            visited.remove(&ptr);
            format!("[{items}]")
        }
        Value::Map(map) => {
            let ptr = std::rc::Rc::as_ptr(map) as usize;
            if !visited.insert(ptr) {
                return "{...}".to_owned();
            }
            let entries = map
                .borrow()
                .iter()
                .map(|(k, v)| format!("{}: {}", code_form_inner(k, visited), code_form_inner(v, visited)))
                .collect::<Vec<_>>()
                .join(", ");
            visited.remove(&ptr);
            format!("{{{entries}}}")
        }
        Value::Function(f, _) => format!("FUNCTION({})", f.params.len()),
        other => format!("{other:?}"),
    }
}

pub fn quote_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        if c == '"' {
            out.push('"');
            out.push('"');
        } else {
            out.push(c);
        }
    }
    out.push('"');
    out
}

/// Plain (unquoted) display used by `print`/string concatenation.
pub fn display_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Number(n) => format_number(*n),
        Value::String(s) => s.to_string(),
        other => code_form(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_render_without_decimals() {
        assert_eq!(format_number(42.0), "42");
        assert_eq!(format_number(-0.0), "0");
    }

    #[test]
    fn fractional_trims_trailing_zeros() {
        assert_eq!(format_number(1.5), "1.5");
        assert_eq!(format_number(1.100000), "1.1");
    }

    #[test]
    fn exponential_form_for_extremes() {
        assert!(format_number(1e12).contains('E'));
        assert!(format_number(1e-8).contains('E'));
    }

    #[test]
    fn quotes_double_internal_quote() {
        assert_eq!(quote_string("a\"b"), "\"a\"\"b\"");
    }
}
