//! Control-flow and host I/O intrinsics (spec §4.4 "Control / IO").

use crate::error::RuntimeError;
use crate::value::{MsMap, Value};
use crate::vm::Machine;

use super::{arg, arg_opt, IntrinsicOutcome};

/// `print(s, delimiter)`: writes to the host's standard-output sink.
/// `delimiter` defaults to a trailing newline; passing `""` suppresses it
/// (spec §6 `standard_output`).
pub fn print(m: &Machine, args: &[Value]) -> Result<Value, RuntimeError> {
    let text = crate::value::format::display_string(&arg(args, 0));
    match arg_opt(args, 1) {
        Some(Value::String(delim)) if delim.is_empty() => m.write_stdout(&text, false),
        Some(Value::String(delim)) => {
            m.write_stdout(&text, false);
            m.write_stdout(&delim, false);
        }
        _ => m.write_stdout(&text, true),
    }
    Ok(Value::Null)
}

/// `yield`: suspend the current run, to be resumed by the next `step`/`run`
/// call (spec §4.3 "Stepping", §5 `running()`).
pub fn yield_(m: &mut Machine, _args: &[Value]) -> Result<Value, RuntimeError> {
    m.yielding = true;
    Ok(Value::Null)
}

/// `wait(seconds)`: cooperative sleep. The first call stashes the target
/// wall-clock time as its `Partial` result; later re-entries compare the
/// stashed deadline against `elapsed_seconds()` and keep suspending until
/// it has passed (spec §4.4 "resumable intrinsics").
pub fn wait(m: &mut Machine, args: &[Value], partial: Option<Value>) -> Result<IntrinsicOutcome, RuntimeError> {
    let deadline = match partial {
        Some(v) => v.as_number().unwrap_or(0.0),
        None => {
            let seconds = super::expect_number(m, &arg(args, 0), "wait")?;
            m.elapsed_seconds() + seconds
        }
    };
    if m.elapsed_seconds() >= deadline {
        Ok(IntrinsicOutcome::Done(Value::Null))
    } else {
        Ok(IntrinsicOutcome::Partial(Value::Number(deadline)))
    }
}

/// `stackTrace`: a list of `"<context> line N"` strings, newest call first
/// (spec §9 resolved Open Question).
pub fn stack_trace(m: &Machine) -> Value {
    let frames = m
        .stack_trace_frames()
        .into_iter()
        .map(|(name, loc)| match loc {
            Some(l) => Value::string(format!("{name} line {}", l.line)),
            None => Value::string(name),
        })
        .collect();
    Value::list(frames)
}

/// `intrinsics`: a read-only map of every registered intrinsic name to its
/// `Value::Intrinsic` reference (spec §4.4 "`intrinsics` ... read-only").
pub fn intrinsics_map() -> crate::value::Rmap {
    let mut map = MsMap::new();
    for name in super::ROSTER {
        map.raw_set(Value::string(*name), Value::Intrinsic((*name).into()));
    }
    map.assign_override = Some(Box::new(|_, _| true));
    std::rc::Rc::new(std::cell::RefCell::new(map))
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
    fn print_writes_to_stdout_sink() {
        let buf = std::rc::Rc::new(std::cell::RefCell::new(String::new()));
        let machine = crate::vm::Machine::new(std::rc::Rc::new(vec![]), crate::vm::buffering_sink(buf.clone()), crate::vm::buffering_sink(std::rc::Rc::new(std::cell::RefCell::new(String::new()))));
        print(&machine, &[Value::string("hi")]).unwrap();
        assert_eq!(buf.borrow().as_str(), "hi\n");
    }

    #[test]
    fn yield_sets_flag() {
        let mut machine = m();
        assert!(!machine.yielding);
        yield_(&mut machine, &[]).unwrap();
        assert!(machine.yielding);
    }

    #[test]
    fn intrinsics_map_is_read_only() {
        let map = intrinsics_map();
        let set = map.borrow_mut().set(Value::string("abs"), Value::Null);
        assert!(!set);
    }
}
