//! End-to-end scenarios (input script → expected stdout), exercised
//! directly through the `Interpreter` embedding API with a captured-stdout
//! sink rather than a subprocess, matching the way a host actually drives
//! this crate.

use std::cell::RefCell;
use std::rc::Rc;

use miniscript::vm::buffering_sink;
use miniscript::Interpreter;

/// Compile and run `source` to completion, returning everything written to
/// `standard_output`.
fn run(source: &str) -> String {
    let out = Rc::new(RefCell::new(String::new()));
    let err = Rc::new(RefCell::new(String::new()));
    let mut interp = Interpreter::new(Some(source), Some(buffering_sink(out.clone())), Some(buffering_sink(err.clone())));
    interp.compile().unwrap_or_else(|e| panic!("compile error: {e}"));
    let done = interp.run_until_done(5.0, false);
    assert!(done, "script did not finish: {}", err.borrow());
    assert!(err.borrow().is_empty(), "unexpected runtime error: {}", err.borrow());
    out.borrow().clone()
}

#[test]
fn simple_arithmetic_print() {
    assert_eq!(run("print 6*7"), "42\n");
}

#[test]
fn function_call_and_return() {
    let script = "f = function(x)\n  return x*3\nend function\nprint f(14)";
    assert_eq!(run(script), "42\n");
}

#[test]
fn list_method_dispatch_via_dot_call() {
    let script = "x = [1,2,3]\nx.push 42\nprint x.sum";
    assert_eq!(run(script), "48\n");
}

#[test]
fn for_loop_over_descending_range() {
    let script = "for i in range(3,1)\n  print i\nend for";
    assert_eq!(run(script), "3\n2\n1\n");
}

#[test]
fn map_method_dispatch_falls_back_to_map_prototype() {
    let script = "d = {\"a\":1}\nd.b = 2\nprint d.values.sum";
    assert_eq!(run(script), "3\n");
}

#[test]
fn doubled_quote_escapes_an_embedded_quote() {
    let script = "print \"Hi\"\"There\"";
    assert_eq!(run(script), "Hi\"There\n");
}

#[test]
fn chained_comparison() {
    let script = "if 1 < 2 < 3 then print \"ok\" else print \"no\"";
    assert_eq!(run(script), "ok\n");
}

#[test]
fn sort_then_join() {
    let script = "a = [3,1,2]\na.sort\nprint a.join(\"-\")";
    assert_eq!(run(script), "1-2-3\n");
}

/// A REPL line that defines a variable must still be visible to the next
/// line's recompiled program: each `repl()` call compiles only the
/// newly-buffered source, so the root context's locals have to survive
/// `Interpreter::compile()`/`Machine::set_code` across calls.
#[test]
fn repl_variables_persist_across_lines() {
    let out = Rc::new(RefCell::new(String::new()));
    let err = Rc::new(RefCell::new(String::new()));
    let mut interp = Interpreter::new(None, Some(buffering_sink(out.clone())), Some(buffering_sink(err.clone())));

    let done = interp.repl(Some("x = 41"), 5.0).unwrap();
    assert!(done, "first line should run to completion");
    assert!(err.borrow().is_empty(), "unexpected error: {}", err.borrow());

    let done = interp.repl(Some("print x + 1"), 5.0).unwrap();
    assert!(done, "second line should run to completion");
    assert!(err.borrow().is_empty(), "unexpected error: {}", err.borrow());
    assert_eq!(out.borrow().as_str(), "42\n");
}

/// `get_global_value`/`set_global_value` read/write the same root-context
/// locals a script's top-level assignments use.
#[test]
fn global_value_accessors_round_trip_script_state() {
    let mut interp = Interpreter::new(Some("x = 10"), None, None);
    interp.compile().unwrap();
    assert!(interp.run_until_done(5.0, false));
    assert_eq!(
        interp.get_global_value("x").map(|v| v.as_number().unwrap()),
        Some(10.0)
    );
    interp.set_global_value("y", miniscript::Value::Number(99.0));
    assert_eq!(interp.get_global_value("y").map(|v| v.as_number().unwrap()), Some(99.0));
}

/// Auto-invoking a bare function reference must drive any nested call the
/// function itself makes to completion on its own frame, then read back the
/// *outer* function's return value — not whatever the nested call returned.
#[test]
fn auto_invoke_settles_nested_function_calls() {
    let script = "helper = function()\n  return 10\nend function\ncompute = function()\n  x = helper()\n  return x+5\nend function\nprint compute";
    assert_eq!(run(script), "15\n");
}
