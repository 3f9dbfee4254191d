//! The host-facing embedding API (spec §6): wraps a [`crate::parser::Parser`]
//! and a [`crate::vm::Machine`] behind `compile`/`step`/`run_until_done`, and
//! owns the three effect sinks a host supplies.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Instant;

use log::info;

use crate::error::{CompileError, MiniscriptError, RuntimeError};
use crate::parser::Parser;
use crate::value::Value;
use crate::vm::{buffering_sink, Machine, Sink};

/// Default time slice for `run_until_done`/`repl` (spec §6 `run_until_done(time_limit_seconds=60, ...)`).
pub const DEFAULT_TIME_LIMIT_SECONDS: f64 = 60.0;

/// An embeddable MiniScript interpreter: own a source string, compile it to
/// TAC, and step a [`Machine`] over it, echoing effects through three
/// host-supplied sinks. `!Send`/`!Sync` by construction (its `Machine`
/// shares `Rc`-based containers), per spec §5's host-embedding note — a host
/// wanting one VM per thread simply constructs one `Interpreter` per thread.
pub struct Interpreter {
    source: String,
    machine: Machine,
    compiled: bool,
    pub standard_output: Sink,
    pub implicit_output: Sink,
    pub error_output: Sink,
}

impl Interpreter {
    pub fn new(source: Option<&str>, standard_output: Option<Sink>, error_output: Option<Sink>) -> Self {
        let standard_output = standard_output.unwrap_or_else(|| buffering_sink(Rc::new(RefCell::new(String::new()))));
        let error_output = error_output.unwrap_or_else(|| buffering_sink(Rc::new(RefCell::new(String::new()))));
        let implicit_output = buffering_sink(Rc::new(RefCell::new(String::new())));
        let machine = Machine::new(Rc::new(vec![]), standard_output.clone(), implicit_output.clone());
        Self {
            source: source.unwrap_or_default().to_owned(),
            machine,
            compiled: false,
            standard_output,
            implicit_output,
            error_output,
        }
    }

    /// Build from separate lines, joined with `\n` (spec §6 `from_lines`).
    pub fn from_lines(lines: &[&str]) -> Self {
        Self::new(Some(&lines.join("\n")), None, None)
    }

    pub fn set_source(&mut self, source: &str) {
        self.source = source.to_owned();
        self.compiled = false;
    }

    /// Replace the source and forget any prior compilation (spec §6 `reset(source)`).
    pub fn reset(&mut self, source: &str) {
        self.set_source(source);
        self.machine.reset(true);
    }

    /// Compile the current source into TAC and load it into the VM. Leaves
    /// prior global variables untouched (only `reset` clears them).
    pub fn compile(&mut self) -> Result<(), MiniscriptError> {
        let code = Parser::compile(&self.source).map_err(|e: CompileError| {
            self.report_error(&e.to_string());
            MiniscriptError::from(e)
        })?;
        info!("compiled {} TAC line(s)", code.len());
        self.machine.set_code(Rc::new(code));
        self.compiled = true;
        Ok(())
    }

    /// Recompile the current source from scratch, truncating the call stack
    /// (spec §6 `restart()`).
    pub fn restart(&mut self) -> Result<(), MiniscriptError> {
        self.machine.reset(false);
        self.compile()
    }

    pub fn stop(&mut self) {
        self.machine.stop();
    }

    pub fn running(&self) -> bool {
        self.machine.running()
    }

    pub fn done(&self) -> bool {
        self.machine.is_done()
    }

    /// Whether the buffered source ends mid-statement and the REPL should
    /// keep appending lines before attempting to compile (spec §4.2).
    pub fn need_more_input(&self) -> bool {
        Parser::ends_with_line_continuation(&self.source)
    }

    pub fn get_global_value(&self, name: &str) -> Option<Value> {
        self.machine.global_locals().borrow().get(&Value::string(name))
    }

    pub fn set_global_value(&mut self, name: &str, value: Value) {
        self.machine.global_locals().borrow_mut().set(Value::string(name), value);
    }

    fn report_error(&self, text: &str) {
        (self.error_output.borrow_mut())(text, true);
    }

    /// Run one TAC line (spec §6 `step()`).
    pub fn step(&mut self) -> Result<(), MiniscriptError> {
        self.machine.step().map_err(|e: RuntimeError| {
            self.report_error(&e.to_string());
            self.machine.stop();
            MiniscriptError::from(e)
        })
    }

    /// Loop `step()` until the program ends, `yield` suspends it, a
    /// non-done partial intrinsic result is pending and `return_early` is
    /// set, or the wall-clock time budget is exceeded (spec §5 scheduling
    /// model). Returns `Ok(())` either way; a `RuntimeError` along the way is
    /// reported via `error_output` and halts the machine, matching the
    /// "`run_until_done` catches it, reports it, and calls `stop()`"
    /// propagation rule (spec §6 Propagation).
    pub fn run_until_done(&mut self, time_limit_seconds: f64, return_early: bool) -> bool {
        let started = Instant::now();
        self.machine.yielding = false;
        while self.machine.running() {
            if let Err(e) = self.machine.step() {
                self.report_error(&e.to_string());
                self.machine.stop();
                return true;
            }
            if return_early && self.machine.has_partial_result() {
                break;
            }
            if started.elapsed().as_secs_f64() >= time_limit_seconds {
                break;
            }
        }
        let done = self.machine.is_done();
        info!("run_until_done finished (done={done}) after {:.3}s", started.elapsed().as_secs_f64());
        done
    }

    /// Feed one REPL line: append it to the buffered source, and if it does
    /// not need more input, compile-and-run the buffer, clearing it after a
    /// successful run so the next `repl` call starts fresh (spec §6 `repl(line?, time_limit=60)`).
    pub fn repl(&mut self, line: Option<&str>, time_limit_seconds: f64) -> Result<bool, MiniscriptError> {
        if let Some(line) = line {
            if self.source.is_empty() {
                self.source = line.to_owned();
            } else {
                self.source.push('\n');
                self.source.push_str(line);
            }
        }
        if self.need_more_input() {
            return Ok(false);
        }
        self.machine.store_implicit = true;
        self.compile()?;
        let done = self.run_until_done(time_limit_seconds, true);
        if done {
            self.source.clear();
        }
        Ok(done)
    }
}
