//! Sequence intrinsics: shared operations over lists, maps and strings
//! (spec §4.4 "Sequences").

use std::cell::Cell;

use crate::error::RuntimeError;
use crate::value::Value;
use crate::vm::Machine;

use super::{arg, arg_opt, expect_list, expect_number, expect_string, wrap};

pub fn len(m: &Machine, args: &[Value]) -> Result<Value, RuntimeError> {
    let n = match arg(args, 0) {
        Value::List(l) => l.borrow().len(),
        Value::String(s) => s.chars().count(),
        Value::Map(map) => map.borrow().len(),
        _ => return Err(m.err(RuntimeError::type_error("len: expected a list, map or string", m.context_name()))),
    };
    Ok(Value::Number(n as f64))
}

pub fn has_index(m: &Machine, args: &[Value]) -> Result<Value, RuntimeError> {
    let found = match arg(args, 0) {
        Value::List(l) => {
            let len = l.borrow().len();
            let idx = expect_number(m, &arg(args, 1), "hasIndex")? as i64;
            wrap(idx, len).map(|i| i < len).unwrap_or(false)
        }
        Value::String(s) => {
            let len = s.chars().count();
            let idx = expect_number(m, &arg(args, 1), "hasIndex")? as i64;
            wrap(idx, len).map(|i| i < len).unwrap_or(false)
        }
        Value::Map(map) => map.borrow().contains_key(&arg(args, 1)),
        _ => return Err(m.err(RuntimeError::type_error("hasIndex: expected a list, map or string", m.context_name()))),
    };
    Ok(Value::Number(found as i32 as f64))
}

/// `indexes(self)`: `0..len-1` for lists/strings, the key list for maps.
pub fn indexes(m: &Machine, args: &[Value]) -> Result<Value, RuntimeError> {
    let out = match arg(args, 0) {
        Value::List(l) => (0..l.borrow().len()).map(|i| Value::Number(i as f64)).collect(),
        Value::String(s) => (0..s.chars().count()).map(|i| Value::Number(i as f64)).collect(),
        Value::Map(map) => map.borrow().keys().cloned().collect(),
        _ => return Err(m.err(RuntimeError::type_error("indexes: expected a list, map or string", m.context_name()))),
    };
    Ok(Value::list(out))
}

/// `indexOf(self, value, after)`: first (or next-after) matching index, or
/// `null` if not found. Strict bounds — there is no one-past-end reading
/// here, only valid element positions.
pub fn index_of(m: &Machine, args: &[Value]) -> Result<Value, RuntimeError> {
    let needle = arg(args, 1);
    let after = arg_opt(args, 2).map(|v| v.as_int());
    match arg(args, 0) {
        Value::List(l) => {
            let items = l.borrow();
            let start = match after {
                Some(a) => wrap(a, items.len()).map(|i| i + 1).unwrap_or(items.len()),
                None => 0,
            };
            for (i, v) in items.iter().enumerate().skip(start) {
                if v.eq_bool(&needle) {
                    return Ok(Value::Number(i as f64));
                }
            }
            Ok(Value::Null)
        }
        Value::String(s) => {
            let chars: Vec<char> = s.chars().collect();
            let needle_s = expect_string(m, &needle, "indexOf")?;
            let start = match after {
                Some(a) => wrap(a, chars.len()).map(|i| i + 1).unwrap_or(chars.len()),
                None => 0,
            };
            let needle_chars: Vec<char> = needle_s.chars().collect();
            if needle_chars.is_empty() {
                return Ok(Value::Null);
            }
            'outer: for i in start..chars.len() {
                if i + needle_chars.len() > chars.len() {
                    break;
                }
                for (j, c) in needle_chars.iter().enumerate() {
                    if chars[i + j] != *c {
                        continue 'outer;
                    }
                }
                return Ok(Value::Number(i as f64));
            }
            Ok(Value::Null)
        }
        Value::Map(map) => {
            let map = map.borrow();
            for (k, v) in map.iter() {
                if v.eq_bool(&needle) {
                    return Ok(k.clone());
                }
            }
            Ok(Value::Null)
        }
        _ => Err(m.err(RuntimeError::type_error("indexOf: expected a list, map or string", m.context_name()))),
    }
}

/// `insert(self, index, value)`: one-past-end (`index == len`) is a valid
/// append position, unlike ordinary element access.
pub fn insert(m: &Machine, args: &[Value]) -> Result<Value, RuntimeError> {
    let target = arg(args, 0);
    let value = arg(args, 2);
    match &target {
        Value::List(l) => {
            let mut items = l.borrow_mut();
            let len = items.len();
            let idx = expect_number(m, &arg(args, 1), "insert")? as i64;
            let at = wrap(idx, len)
                .ok_or_else(|| m.err(RuntimeError::index("insert: index out of bounds", m.context_name())))?;
            items.insert(at, value);
        }
        Value::String(s) => {
            let chars: Vec<char> = s.chars().collect();
            let len = chars.len();
            let idx = expect_number(m, &arg(args, 1), "insert")? as i64;
            let at = wrap(idx, len)
                .ok_or_else(|| m.err(RuntimeError::index("insert: index out of bounds", m.context_name())))?;
            let insertion = expect_string(m, &value, "insert")?;
            let mut out: String = chars[..at].iter().collect();
            out.push_str(&insertion);
            out.push_str(&chars[at..].iter().collect::<String>());
            return Ok(Value::string(out));
        }
        _ => return Err(m.err(RuntimeError::type_error("insert: expected a list or string", m.context_name()))),
    }
    Ok(target)
}

/// `remove(self, key)`: drops a map entry, or a list/string element at a
/// (strict, in-bounds) index.
pub fn remove(m: &Machine, args: &[Value]) -> Result<Value, RuntimeError> {
    match arg(args, 0) {
        Value::List(l) => {
            let mut items = l.borrow_mut();
            let len = items.len();
            let idx = expect_number(m, &arg(args, 1), "remove")? as i64;
            let at = wrap(idx, len)
                .filter(|&i| i < len)
                .ok_or_else(|| m.err(RuntimeError::index("remove: index out of bounds", m.context_name())))?;
            Ok(items.remove(at))
        }
        Value::Map(map) => {
            let key = arg(args, 1);
            map.borrow_mut()
                .remove(&key)
                .ok_or_else(|| m.err(RuntimeError::key("remove: key not found", m.context_name())))
        }
        Value::String(s) => {
            let chars: Vec<char> = s.chars().collect();
            let len = chars.len();
            let idx = expect_number(m, &arg(args, 1), "remove")? as i64;
            let at = wrap(idx, len)
                .filter(|&i| i < len)
                .ok_or_else(|| m.err(RuntimeError::index("remove: index out of bounds", m.context_name())))?;
            let mut out: String = chars[..at].iter().collect();
            out.push_str(&chars[at + 1..].iter().collect::<String>());
            Ok(Value::string(out))
        }
        _ => Err(m.err(RuntimeError::type_error("remove: expected a list, map or string", m.context_name()))),
    }
}

/// `replace(self, old, new, maxCount)`: string substring replacement or
/// list element-value replacement, capped at `maxCount` occurrences if given.
pub fn replace(m: &Machine, args: &[Value]) -> Result<Value, RuntimeError> {
    let max_count = match arg_opt(args, 3) {
        Some(v) => expect_number(m, &v, "replace")? as i64,
        None => i64::MAX,
    };
    match arg(args, 0) {
        Value::String(s) => {
            let old = expect_string(m, &arg(args, 1), "replace")?;
            let new = expect_string(m, &arg(args, 2), "replace")?;
            if old.is_empty() || max_count <= 0 {
                return Ok(Value::string(s.to_string()));
            }
            let mut out = String::new();
            let mut rest: &str = &s;
            let mut count = 0i64;
            while count < max_count {
                match rest.find(old.as_ref()) {
                    Some(pos) => {
                        out.push_str(&rest[..pos]);
                        out.push_str(&new);
                        rest = &rest[pos + old.len()..];
                        count += 1;
                    }
                    None => break,
                }
            }
            out.push_str(rest);
            Ok(Value::string(out))
        }
        Value::List(l) => {
            let old = arg(args, 1);
            let new = arg(args, 2);
            let mut items = l.borrow_mut();
            let mut count = 0i64;
            for item in items.iter_mut() {
                if count >= max_count {
                    break;
                }
                if item.eq_bool(&old) {
                    *item = new.clone();
                    count += 1;
                }
            }
            Ok(Value::List(l.clone()))
        }
        Value::Map(map) => {
            let old = arg(args, 1);
            let new = arg(args, 2);
            let mut map = map.borrow_mut();
            let keys: Vec<Value> = map.keys().cloned().collect();
            let mut count = 0i64;
            for k in keys {
                if count >= max_count {
                    break;
                }
                if let Some(v) = map.get(&k) {
                    if v.eq_bool(&old) {
                        map.raw_set(k, new.clone());
                        count += 1;
                    }
                }
            }
            Ok(arg(args, 0))
        }
        _ => Err(m.err(RuntimeError::type_error("replace: expected a list, map or string", m.context_name()))),
    }
}

/// `slice(seq, from, to)`: Python-style half-open slice with negative
/// wraparound and clamping; `to` defaults to the sequence length.
pub fn slice(m: &Machine, args: &[Value]) -> Result<Value, RuntimeError> {
    fn clamp_bound(idx: i64, len: usize) -> usize {
        let resolved = if idx < 0 { idx + len as i64 } else { idx };
        resolved.clamp(0, len as i64) as usize
    }

    match arg(args, 0) {
        Value::List(l) => {
            let items = l.borrow();
            let len = items.len();
            let from = expect_number(m, &arg(args, 1), "slice")? as i64;
            let to = match arg_opt(args, 2) {
                Some(v) => expect_number(m, &v, "slice")? as i64,
                None => len as i64,
            };
            let (from, to) = (clamp_bound(from, len), clamp_bound(to, len));
            if from >= to {
                Ok(Value::list(vec![]))
            } else {
                Ok(Value::list(items[from..to].to_vec()))
            }
        }
        Value::String(s) => {
            let chars: Vec<char> = s.chars().collect();
            let len = chars.len();
            let from = expect_number(m, &arg(args, 1), "slice")? as i64;
            let to = match arg_opt(args, 2) {
                Some(v) => expect_number(m, &v, "slice")? as i64,
                None => len as i64,
            };
            let (from, to) = (clamp_bound(from, len), clamp_bound(to, len));
            if from >= to {
                Ok(Value::string(""))
            } else {
                Ok(Value::string(chars[from..to].iter().collect::<String>()))
            }
        }
        _ => Err(m.err(RuntimeError::type_error("slice: expected a list or string", m.context_name()))),
    }
}

pub fn values(m: &Machine, args: &[Value]) -> Result<Value, RuntimeError> {
    match arg(args, 0) {
        Value::Map(map) => Ok(Value::list(map.borrow().values().cloned().collect())),
        Value::List(l) => Ok(Value::List(l)),
        _ => Err(m.err(RuntimeError::type_error("values: expected a list or map", m.context_name()))),
    }
}

pub fn join(m: &Machine, args: &[Value]) -> Result<Value, RuntimeError> {
    let list = expect_list(m, &arg(args, 0), "join")?;
    let delim = match arg_opt(args, 1) {
        Some(v) => expect_string(m, &v, "join")?.to_string(),
        None => " ".to_string(),
    };
    let items = list.borrow();
    let rendered: Vec<String> = items.iter().map(crate::value::format::display_string).collect();
    Ok(Value::string(rendered.join(&delim)))
}

pub fn split(m: &Machine, args: &[Value]) -> Result<Value, RuntimeError> {
    let s = expect_string(m, &arg(args, 0), "split")?;
    let delim = match arg_opt(args, 1) {
        Some(v) => Some(expect_string(m, &v, "split")?),
        None => None,
    };
    let max_count = match arg_opt(args, 2) {
        Some(v) => expect_number(m, &v, "split")? as usize,
        None => usize::MAX,
    };
    let pieces: Vec<Value> = match delim.as_deref() {
        None | Some("") => s.split_whitespace().map(Value::string).collect(),
        Some(d) => {
            if max_count == usize::MAX {
                s.split(d).map(Value::string).collect()
            } else {
                s.splitn(max_count.max(1), d).map(Value::string).collect()
            }
        }
    };
    Ok(Value::list(pieces))
}

pub fn push(m: &Machine, args: &[Value]) -> Result<Value, RuntimeError> {
    let list = expect_list(m, &arg(args, 0), "push")?;
    list.borrow_mut().push(arg(args, 1));
    Ok(Value::List(list))
}

pub fn pop(m: &Machine, args: &[Value]) -> Result<Value, RuntimeError> {
    let list = expect_list(m, &arg(args, 0), "pop")?;
    Ok(list.borrow_mut().pop().unwrap_or(Value::Null))
}

pub fn pull(m: &Machine, args: &[Value]) -> Result<Value, RuntimeError> {
    let list = expect_list(m, &arg(args, 0), "pull")?;
    let mut items = list.borrow_mut();
    if items.is_empty() {
        Ok(Value::Null)
    } else {
        Ok(items.remove(0))
    }
}

/// `sort(self, byKey, ascending)`: stable sort; when `byKey` names a map
/// field, elements missing that key sort as if it were `null`, which in
/// turn sorts before every other value (spec §4.4 `sort`).
pub fn sort(m: &Machine, args: &[Value]) -> Result<Value, RuntimeError> {
    let list = expect_list(m, &arg(args, 0), "sort")?;
    let by_key = arg_opt(args, 1).filter(|v| !v.is_null());
    let ascending = match arg_opt(args, 2) {
        Some(v) => expect_number(m, &v, "sort")? != 0.0,
        None => true,
    };

    fn sort_key(v: &Value, by_key: &Option<Value>) -> Value {
        match by_key {
            Some(key) => match v {
                Value::Map(map) => map.borrow().get(key).unwrap_or(Value::Null),
                Value::List(list) => {
                    let idx = key.as_int();
                    let items = list.borrow();
                    if idx >= 0 && (idx as usize) < items.len() {
                        items[idx as usize].clone()
                    } else {
                        Value::Null
                    }
                }
                _ => Value::Null,
            },
            None => v.clone(),
        }
    }

    // Null placement differs by whether `byKey` was supplied (spec §4.4):
    // direct comparison sorts nulls to the end (ascending), while
    // key-extraction sorts nulls to the start (ascending) — both reverse for
    // descending, so only the ascending-order null placement needs to vary.
    fn cmp(a: &Value, b: &Value, by_key_given: bool) -> std::cmp::Ordering {
        use std::cmp::Ordering;
        let null_first = by_key_given;
        match (a, b) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => {
                if null_first {
                    Ordering::Less
                } else {
                    Ordering::Greater
                }
            }
            (_, Value::Null) => {
                if null_first {
                    Ordering::Greater
                } else {
                    Ordering::Less
                }
            }
            (Value::Number(x), Value::Number(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
            (Value::String(x), Value::String(y)) => x.cmp(y),
            // Incomparable types (lists, maps, functions): stable by
            // insertion order, since there is no natural ordering between
            // them (spec §4.4 `sort` only defines number/string/null order).
            _ => Ordering::Equal,
        }
    }

    let by_key_given = by_key.is_some();
    let mut items = list.borrow().clone();
    items.sort_by(|a, b| {
        let ord = cmp(&sort_key(a, &by_key), &sort_key(b, &by_key), by_key_given);
        if ascending {
            ord
        } else {
            ord.reverse()
        }
    });
    Ok(Value::list(items))
}

/// A small xorshift64* generator, since no RNG crate is part of the
/// dependency stack — seeded once from the address of a thread-local and
/// then advanced in place.
thread_local! {
    static RNG_STATE: Cell<u64> = Cell::new(0x2545F4914F6CDD1D);
}

fn next_u64() -> u64 {
    RNG_STATE.with(|cell| {
        let mut x = cell.get();
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        cell.set(x);
        x
    })
}

pub fn shuffle(m: &Machine, args: &[Value]) -> Result<Value, RuntimeError> {
    let list = expect_list(m, &arg(args, 0), "shuffle")?;
    let mut items = list.borrow_mut();
    let len = items.len();
    for i in (1..len).rev() {
        let j = (next_u64() % (i as u64 + 1)) as usize;
        items.swap(i, j);
    }
    drop(items);
    Ok(Value::List(list))
}

pub fn sum(m: &Machine, args: &[Value]) -> Result<Value, RuntimeError> {
    match arg(args, 0) {
        Value::List(l) => {
            let items = l.borrow();
            let mut total = 0.0;
            for v in items.iter() {
                total += expect_number(m, v, "sum")?;
            }
            Ok(Value::Number(total))
        }
        Value::Map(map) => {
            let map = map.borrow();
            let mut total = 0.0;
            for v in map.values() {
                total += expect_number(m, v, "sum")?;
            }
            Ok(Value::Number(total))
        }
        _ => Err(m.err(RuntimeError::type_error("sum: expected a list or map", m.context_name()))),
    }
}

/// `range(from, to, step)`: `step` defaults to `1` (or `-1` when `to < from`).
pub fn range(m: &Machine, args: &[Value]) -> Result<Value, RuntimeError> {
    let from = expect_number(m, &arg(args, 0), "range")?;
    let to = expect_number(m, &arg(args, 1), "range")?;
    let step = match arg_opt(args, 2) {
        Some(v) => expect_number(m, &v, "range")?,
        None if to < from => -1.0,
        None => 1.0,
    };
    if step == 0.0 {
        return Err(m.err(RuntimeError::type_error("range: step must not be 0", m.context_name())));
    }
    const MAX_RANGE_ELEMENTS: u32 = 10_000_000;
    let mut out = Vec::new();
    let mut x = from;
    let mut guard = 0u32;
    while (step > 0.0 && x <= to) || (step < 0.0 && x >= to) {
        out.push(Value::Number(x));
        x += step;
        guard += 1;
        if guard > MAX_RANGE_ELEMENTS {
            return Err(m.err(RuntimeError::limit_exceeded("range: too many elements", m.context_name())));
        }
    }
    Ok(Value::list(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::MsMap;

    fn m() -> Machine {
        crate::vm::Machine::new(
            std::rc::Rc::new(vec![]),
            crate::vm::buffering_sink(std::rc::Rc::new(std::cell::RefCell::new(String::new()))),
            crate::vm::buffering_sink(std::rc::Rc::new(std::cell::RefCell::new(String::new()))),
        )
    }

    #[test]
    fn index_of_wraps_negative_after() {
        let machine = m();
        let list = Value::list(vec![Value::Number(1.0), Value::Number(2.0), Value::Number(1.0)]);
        let found = index_of(&machine, &[list, Value::Number(1.0), Value::Number(-1.0)]).unwrap();
        assert_eq!(found.as_number(), Some(2.0));
    }

    #[test]
    fn slice_clamps_out_of_range() {
        let machine = m();
        let list = Value::list(vec![Value::Number(1.0), Value::Number(2.0), Value::Number(3.0)]);
        let sliced = slice(&machine, &[list, Value::Number(-100.0), Value::Number(100.0)]).unwrap();
        match sliced {
            Value::List(l) => assert_eq!(l.borrow().len(), 3),
            _ => panic!("expected list"),
        }
    }

    #[test]
    fn sort_puts_missing_key_first() {
        let machine = m();
        let mut a = MsMap::new();
        a.raw_set(Value::string("k"), Value::Number(5.0));
        let b = MsMap::new();
        let list = Value::list(vec![Value::map(a), Value::map(b)]);
        let sorted = sort(&machine, &[list, Value::string("k")]).unwrap();
        match sorted {
            Value::List(l) => {
                let items = l.borrow();
                match &items[0] {
                    Value::Map(mm) => assert!(mm.borrow().get(&Value::string("k")).is_none()),
                    _ => panic!("expected map"),
                }
            }
            _ => panic!("expected list"),
        }
    }

    #[test]
    fn sort_without_by_key_puts_nulls_last_ascending() {
        let machine = m();
        let list = Value::list(vec![Value::Null, Value::Number(3.0), Value::Number(1.0)]);
        let sorted = sort(&machine, &[list]).unwrap();
        match sorted {
            Value::List(l) => {
                let items = l.borrow();
                assert_eq!(items[0].as_number(), Some(1.0));
                assert_eq!(items[1].as_number(), Some(3.0));
                assert!(items[2].is_null());
            }
            _ => panic!("expected list"),
        }
    }

    #[test]
    fn range_default_step_descends_when_to_less_than_from() {
        let machine = m();
        let r = range(&machine, &[Value::Number(3.0), Value::Number(1.0)]).unwrap();
        match r {
            Value::List(l) => {
                let items = l.borrow();
                assert_eq!(items.len(), 3);
                assert_eq!(items[2].as_number(), Some(1.0));
            }
            _ => panic!("expected list"),
        }
    }
}
