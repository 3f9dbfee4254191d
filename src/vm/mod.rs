//! The stepping virtual machine: opcode dispatch, call protocol, variable
//! resolution and the arithmetic/string semantics TAC relies on.
//!
//! Modeled on the cursor-plus-scope-stack shape of `why_lib`'s
//! `CodegenContext` (`crates/why_lib/src/codegen/context.rs`) — a handle
//! type holding `RefCell`-guarded state with `enter_scope`/`find_variable`
//! style accessors — generalized here from lexical LLVM scopes to
//! MiniScript's prototype-chain, one-frame-per-call model.

pub mod context;

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Instant;

use log::{debug, trace};

use crate::error::{RuntimeError, SourceLoc};
use crate::intrinsics::{self, IntrinsicOutcome};
use crate::tac::{Line, Opcode};
use crate::value::{clamp01, MsMap, Rmap, Value};

use context::Context;

/// A host-supplied effect sink: `(text, append_eol)`, matching the shape of
/// `Interpreter::standard_output`/`implicit_output`/`error_output` in spec
/// §6. Shared via `Rc<RefCell<_>>` so both the `Interpreter` and the
/// `Machine` it drives can hold a handle to the same closure.
pub type Sink = Rc<RefCell<dyn FnMut(&str, bool)>>;

pub fn buffering_sink(buffer: Rc<RefCell<String>>) -> Sink {
    Rc::new(RefCell::new(move |text: &str, append_eol: bool| {
        let mut buf = buffer.borrow_mut();
        buf.push_str(text);
        if append_eol {
            buf.push('\n');
        }
    }))
}

/// Lazily-cloned per-VM method tables for primitive types (spec §4.3
/// `__isa` chain note); cloned from the intrinsic library's templates the
/// first time a script resolves a method on that type, so mutating one
/// script's `numberType` map never leaks into another VM.
#[derive(Default)]
pub struct Prototypes {
    pub number: Option<Rmap>,
    pub string: Option<Rmap>,
    pub list: Option<Rmap>,
    pub map: Option<Rmap>,
    pub func_ref: Option<Rmap>,
}

pub struct Machine {
    contexts: Vec<Context>,
    pub prototypes: Prototypes,
    pub yielding: bool,
    pub run_started_at: Option<Instant>,
    pub stdout: Sink,
    /// Separate sink for the implicit `_`-assignment echo a bare command
    /// statement produces at the REPL (spec §6 `implicit_output`).
    pub implicit_output: Sink,
    /// Cached `version` intrinsic result (spec §4.4 "cached info map").
    pub version_map: Rmap,
    /// Whether a bare command-call statement's result is captured into `_`
    /// and echoed to `implicit_output` — on for the REPL, off for compiled
    /// programs (spec §3 Context `implicit_result_counter`).
    pub store_implicit: bool,
    pub implicit_result_counter: usize,
}

impl Machine {
    pub fn new(code: Rc<Vec<Line>>, stdout: Sink, implicit_output: Sink) -> Self {
        Self {
            contexts: vec![Context::global(code)],
            prototypes: Prototypes::default(),
            yielding: false,
            run_started_at: None,
            stdout,
            implicit_output,
            version_map: Rc::new(RefCell::new(intrinsics::build_version_map())),
            store_implicit: false,
            implicit_result_counter: 0,
        }
    }

    /// Write through the `print`/command-echo sink.
    pub fn write_stdout(&self, text: &str, append_eol: bool) {
        (self.stdout.borrow_mut())(text, append_eol);
    }

    pub fn write_implicit(&self, text: &str, append_eol: bool) {
        (self.implicit_output.borrow_mut())(text, append_eol);
    }

    /// Innermost-first-reversed call-stack snapshot for `stackTrace`:
    /// newest frame first, per the spec's resolved Open Question (§9).
    pub fn stack_trace_frames(&self) -> Vec<(String, Option<SourceLoc>)> {
        self.contexts
            .iter()
            .rev()
            .map(|c| (c.name.clone(), c.current_line().and_then(|l| l.location)))
            .collect()
    }

    pub fn call_depth(&self) -> usize {
        self.contexts.len()
    }

    /// The top-level script's own variable store, regardless of how deep
    /// the call stack currently is (spec §5 `getGlobalValue`/`setGlobalValue`).
    pub fn global_locals(&self) -> Rmap {
        self.contexts[0].locals.clone()
    }

    /// Whether the innermost context is parked on a non-done partial
    /// intrinsic result (spec §5 `run_until_done`'s `return_early` case).
    pub fn has_partial_result(&self) -> bool {
        self.contexts.last().map(|c| c.partial_result.is_some()).unwrap_or(false)
    }

    pub fn is_done(&self) -> bool {
        self.contexts.len() == 1 && self.contexts[0].is_done()
    }

    pub fn running(&self) -> bool {
        !self.is_done() && !self.yielding
    }

    /// Truncate the call stack to the global context and park its `pc` past
    /// the end of its code (spec §5 `stop()`).
    pub fn stop(&mut self) {
        self.contexts.truncate(1);
        let global = &mut self.contexts[0];
        global.pc = global.code.len();
        self.yielding = false;
    }

    /// Reset execution to the top of the global code, optionally wiping
    /// globals too (spec §5 `reset(clearVariables)`).
    pub fn reset(&mut self, clear_variables: bool) {
        let code = self.contexts[0].code.clone();
        let preserved_locals = self.contexts[0].locals.clone();
        self.contexts.truncate(1);
        self.contexts[0] = Context::global(code);
        if !clear_variables {
            self.contexts[0].locals = preserved_locals;
        }
        self.yielding = false;
        self.run_started_at = None;
    }

    /// Load a freshly compiled code vector, preserving the root context's
    /// locals (the script's global-scope variables) across recompiles so a
    /// REPL's variables survive each line's incremental `compile()` call;
    /// only an explicit `reset(clearVariables=true)` wipes them.
    pub fn set_code(&mut self, code: Rc<Vec<Line>>) {
        let preserved_locals = self.contexts.first().map(|c| c.locals.clone());
        self.contexts = vec![Context::global(code)];
        if let Some(locals) = preserved_locals {
            self.contexts[0].locals = locals;
        }
        self.yielding = false;
    }

    fn cur(&self) -> &Context {
        self.contexts.last().unwrap()
    }

    fn cur_mut(&mut self) -> &mut Context {
        self.contexts.last_mut().unwrap()
    }

    pub(crate) fn context_name(&self) -> String {
        self.cur().name.clone()
    }

    fn current_location(&self) -> Option<SourceLoc> {
        self.cur().current_line().and_then(|l| l.location)
    }

    pub(crate) fn err(&self, e: RuntimeError) -> RuntimeError {
        if e.location.is_some() {
            e
        } else if let Some(loc) = self.current_location() {
            e.with_location(loc)
        } else {
            e
        }
    }

    /// Run one TAC line. Pops finished contexts (storing `null` into their
    /// result slot) until a non-done context remains or only global is left
    /// (spec §4.3 "Stepping").
    pub fn step(&mut self) -> Result<(), RuntimeError> {
        self.run_started_at.get_or_insert_with(Instant::now);

        while self.contexts.len() > 1 && self.cur().is_done() {
            self.pop_context(Value::Null)?;
        }
        if self.is_done() || self.yielding {
            return Ok(());
        }

        let line = self.cur().current_line().cloned().expect("checked not done above");
        self.execute(&line)
    }

    fn pop_context(&mut self, result: Value) -> Result<(), RuntimeError> {
        let finished = self.contexts.pop().expect("pop_context called with empty stack");
        debug!("returning from '{}' ({} context(s) left)", finished.name, self.contexts.len());
        if let Some(target) = finished.result_storage {
            self.store(&target, result)?;
        }
        Ok(())
    }

    fn execute(&mut self, line: &Line) -> Result<(), RuntimeError> {
        let mut advance = true;
        match line.op {
            Opcode::Assign => {
                let v = self.eval(line.rhs_a.as_ref().expect("Assign missing rhsA"))?;
                self.store(line.lhs.as_ref().expect("Assign missing lhs"), v)?;
            }
            Opcode::AssignImplicit => {
                if self.store_implicit {
                    let v = self.eval(line.rhs_a.as_ref().expect("AssignImplicit missing rhsA"))?;
                    self.store(line.lhs.as_ref().expect("AssignImplicit missing lhs"), v.clone())?;
                    self.implicit_result_counter += 1;
                    if !v.is_null() {
                        let text = crate::value::format::display_string(&v);
                        self.write_implicit(&text, true);
                    }
                }
            }
            Opcode::Copy => {
                let v = self.eval_copy(line.rhs_a.as_ref().expect("Copy missing rhsA"))?;
                self.store(line.lhs.as_ref().expect("Copy missing lhs"), v)?;
            }
            Opcode::APlusB | Opcode::AMinusB | Opcode::ATimesB | Opcode::ADividedByB | Opcode::AModB | Opcode::APowB => {
                let a = self.eval(line.rhs_a.as_ref().unwrap())?;
                let b = self.eval(line.rhs_b.as_ref().unwrap())?;
                let v = self.arith(line.op, a, b)?;
                self.store(line.lhs.as_ref().unwrap(), v)?;
            }
            Opcode::AEqualB
            | Opcode::ANotEqualB
            | Opcode::ALessB
            | Opcode::ALessOrEqualB
            | Opcode::AGreaterB
            | Opcode::AGreaterOrEqualB => {
                let a = self.eval(line.rhs_a.as_ref().unwrap())?;
                let b = self.eval(line.rhs_b.as_ref().unwrap())?;
                let v = self.compare(line.op, a, b)?;
                self.store(line.lhs.as_ref().unwrap(), v)?;
            }
            Opcode::AAndB => {
                let a = self.eval(line.rhs_a.as_ref().unwrap())?;
                let b = self.eval(line.rhs_b.as_ref().unwrap())?;
                let v = fuzzy_val(&a) * fuzzy_val(&b);
                self.store(line.lhs.as_ref().unwrap(), Value::Number(clamp01(v)))?;
            }
            Opcode::AOrB => {
                let a = self.eval(line.rhs_a.as_ref().unwrap())?;
                let b = self.eval(line.rhs_b.as_ref().unwrap())?;
                let (fa, fb) = (fuzzy_val(&a), fuzzy_val(&b));
                self.store(line.lhs.as_ref().unwrap(), Value::Number(clamp01(fa + fb - fa * fb)))?;
            }
            Opcode::NotA => {
                let a = self.eval(line.rhs_a.as_ref().unwrap())?;
                self.store(line.lhs.as_ref().unwrap(), Value::Number(clamp01(1.0 - fuzzy_val(&a))))?;
            }
            Opcode::AIsaB => {
                let a = self.eval(line.rhs_a.as_ref().unwrap())?;
                let b = self.eval(line.rhs_b.as_ref().unwrap())?;
                let v = self.isa(&a, &b)?;
                self.store(line.lhs.as_ref().unwrap(), Value::Number(v))?;
            }
            Opcode::BindAssign => {
                let template = line.rhs_a.as_ref().unwrap();
                let Value::Function(vfunc, _) = template else {
                    return Err(self.err(RuntimeError::type_error("BindAssignA requires a function template", self.context_name())));
                };
                let bound = Value::Function(vfunc.clone(), Some(self.cur().locals.clone()));
                self.store(line.lhs.as_ref().unwrap(), bound)?;
            }
            Opcode::New => {
                let proto = self.eval(line.rhs_a.as_ref().unwrap())?;
                let Value::Map(proto_map) = proto else {
                    return Err(self.err(RuntimeError::type_error("new requires a map prototype", self.context_name())));
                };
                let mut m = MsMap::new();
                m.raw_set(Value::string("__isa"), Value::Map(proto_map));
                self.store(line.lhs.as_ref().unwrap(), Value::map(m))?;
            }
            Opcode::Goto => {
                self.jump_to(line.rhs_a.as_ref().unwrap())?;
                advance = false;
            }
            Opcode::GotoIfB => {
                let cond = self.eval(line.rhs_b.as_ref().unwrap())?;
                if cond.truthy() {
                    self.jump_to(line.rhs_a.as_ref().unwrap())?;
                    advance = false;
                }
            }
            Opcode::GotoIfTrulyB => {
                let cond = self.eval(line.rhs_b.as_ref().unwrap())?;
                if cond.as_int() != 0 {
                    self.jump_to(line.rhs_a.as_ref().unwrap())?;
                    advance = false;
                }
            }
            Opcode::GotoIfNotB => {
                let cond = self.eval(line.rhs_b.as_ref().unwrap())?;
                if !cond.truthy() {
                    self.jump_to(line.rhs_a.as_ref().unwrap())?;
                    advance = false;
                }
            }
            Opcode::PushParam => {
                let v = self.eval(line.rhs_a.as_ref().unwrap())?;
                let ctx = self.cur_mut();
                ctx.pending_args.push(v);
                if ctx.pending_args.len() > 255 {
                    return Err(self.err(RuntimeError::too_many_arguments("too many pending arguments", self.context_name())));
                }
            }
            Opcode::CallFunction => {
                self.call_function(line)?;
            }
            Opcode::CallIntrinsic => {
                let Some(Value::String(name)) = &line.rhs_a else {
                    return Err(self.err(RuntimeError::type_error("CallIntrinsicA requires a name", self.context_name())));
                };
                let name = name.clone();
                let keep_pc = self.dispatch_intrinsic(&name, line.lhs.as_ref())?;
                advance = !keep_pc;
            }
            Opcode::Return => {
                let v = match &line.rhs_a {
                    Some(expr) => self.eval(expr)?,
                    None => Value::Null,
                };
                self.cur_mut().pc = self.cur().code.len();
                self.pop_context(v)?;
                advance = false;
            }
            Opcode::ElemBofA => {
                let a = self.eval(line.rhs_a.as_ref().unwrap())?;
                let b = self.eval(line.rhs_b.as_ref().unwrap())?;
                let v = self.index_get(&a, &b, false)?;
                let v = self.maybe_invoke(v, false, Some(a))?;
                self.store(line.lhs.as_ref().unwrap(), v)?;
            }
            Opcode::ElemBofIterA => {
                let a = self.eval(line.rhs_a.as_ref().unwrap())?;
                let b = self.eval(line.rhs_b.as_ref().unwrap())?;
                let v = self.index_get(&a, &b, true)?;
                self.store(line.lhs.as_ref().unwrap(), v)?;
            }
            Opcode::LengthOfA => {
                let a = self.eval(line.rhs_a.as_ref().unwrap())?;
                let v = self.length_of(&a)?;
                self.store(line.lhs.as_ref().unwrap(), Value::Number(v as f64))?;
            }
        }
        if advance {
            self.cur_mut().pc += 1;
        }
        Ok(())
    }

    fn jump_to(&mut self, target: &Value) -> Result<(), RuntimeError> {
        let n = target.as_int();
        if n < 0 {
            return Err(self.err(RuntimeError::new(
                crate::error::RuntimeErrorKind::Other,
                "jump to unresolved (negative) target — compiler bug",
                self.context_name(),
            )));
        }
        self.cur_mut().pc = n as usize;
        Ok(())
    }

    // ------------------------------------------------------------
    // operand evaluation
    // ------------------------------------------------------------

    /// Evaluate an operand, applying auto-invoke to bare function reads
    /// unless suppressed by `@` (spec §4.2 "Auto-invoke").
    pub fn eval(&mut self, operand: &Value) -> Result<Value, RuntimeError> {
        match operand {
            Value::Var { name, no_invoke, .. } => {
                let v = self.get_var(name)?;
                self.maybe_invoke(v, *no_invoke, None)
            }
            Value::Temp(n) => Ok(self.cur().get_temp(*n)),
            Value::SeqElem { base, index, no_invoke } => {
                let b = self.eval(base)?;
                let i = self.eval(index)?;
                let v = self.index_get(&b, &i, false)?;
                self.maybe_invoke(v, *no_invoke, Some(b))
            }
            other => Ok(other.clone()),
        }
    }

    /// Like [`Self::eval`] but never auto-invokes — used to resolve the
    /// callee operand of `CallFunctionA` itself (spec §4.3 call protocol
    /// step 1: we want the function value, not its zero-arg result).
    fn eval_raw(&mut self, operand: &Value) -> Result<Value, RuntimeError> {
        match operand {
            Value::Var { name, .. } => self.get_var(name),
            Value::Temp(n) => Ok(self.cur().get_temp(*n)),
            Value::SeqElem { base, index, .. } => {
                let b = self.eval(base)?;
                let i = self.eval(index)?;
                self.index_get(&b, &i, false)
            }
            other => Ok(other.clone()),
        }
    }

    /// `CopyA`'s "fresh copy with element-wise val() evaluation" for list
    /// and map literal templates; settled scalars/containers pass through
    /// [`Self::eval`] unchanged (spec §4.3 `CopyA`).
    fn eval_copy(&mut self, operand: &Value) -> Result<Value, RuntimeError> {
        match operand {
            Value::List(items) => {
                let source: Vec<Value> = items.borrow().clone();
                let mut out = Vec::with_capacity(source.len());
                for item in &source {
                    out.push(self.eval(item)?);
                }
                Ok(Value::list(out))
            }
            Value::Map(map) => {
                let entries: Vec<(Value, Value)> = map.borrow().iter().cloned().collect();
                let mut out = MsMap::new();
                for (k, v) in &entries {
                    let kk = self.eval(k)?;
                    let vv = self.eval(v)?;
                    out.raw_set(kk, vv);
                }
                Ok(Value::map(out))
            }
            other => self.eval(other),
        }
    }

    fn maybe_invoke(&mut self, value: Value, no_invoke: bool, receiver: Option<Value>) -> Result<Value, RuntimeError> {
        if no_invoke || !value.is_function() {
            return Ok(value);
        }
        self.invoke_zero_arg(value, receiver)
    }

    /// Auto-invoke: call a function/intrinsic value with zero explicit
    /// arguments and return its result, driving the call to completion in a
    /// private sub-stack so the caller sees a settled value (spec §4.2).
    /// `receiver` is the dot call's base (e.g. `x` in bare `x.sum`), bound
    /// as `self`/prepended as the implicit first argument (spec §4.4
    /// "self"-first convention); `None` for a bare identifier read.
    fn invoke_zero_arg(&mut self, callee: Value, receiver: Option<Value>) -> Result<Value, RuntimeError> {
        match callee {
            Value::Intrinsic(name) => {
                let args = receiver.into_iter().collect();
                match intrinsics::dispatch(self, &name, args, None)? {
                    IntrinsicOutcome::Done(v) => Ok(v),
                    IntrinsicOutcome::Partial(_) => Ok(Value::Null),
                }
            }
            Value::Function(vfunc, outer) => {
                let super_value = match &receiver {
                    Some(Value::Map(m)) => m.borrow().isa(),
                    _ => None,
                };
                // Give the pushed sub-stack a real result slot in the
                // caller's own frame, the same as an ordinary `CallFunctionA`
                // would, so a nested call inside the auto-invoked function
                // can push and pop its own frames without this loop
                // mistaking a deeper `ReturnA` for the top-level one.
                let slot = self.cur_mut().alloc_temp_slot();
                let frame = Context::call(
                    vfunc.code.clone().into(),
                    outer,
                    receiver,
                    super_value,
                    Some(Value::Temp(slot)),
                    vfunc.name.clone(),
                );
                self.contexts.push(frame);
                let base_depth = self.contexts.len() - 1;
                loop {
                    while self.contexts.len() > base_depth && self.cur().is_done() {
                        self.pop_context(Value::Null)?;
                    }
                    if self.contexts.len() <= base_depth {
                        break;
                    }
                    let line = self.cur().current_line().cloned().unwrap();
                    self.execute(&line)?;
                }
                Ok(self.cur_mut().get_temp(slot))
            }
            other => Ok(other),
        }
    }

    fn store(&mut self, target: &Value, value: Value) -> Result<(), RuntimeError> {
        match target {
            Value::Temp(n) => {
                self.cur_mut().set_temp(*n, value);
                Ok(())
            }
            Value::Var { name, .. } => self.set_var(name, value),
            Value::SeqElem { base, index, .. } => {
                let base_val = self.eval(base)?;
                let index_val = self.eval(index)?;
                self.set_indexed(&base_val, index_val, value)
            }
            _ => Ok(()),
        }
    }

    // ------------------------------------------------------------
    // variable resolution (spec §4.3 get_var / set_var)
    // ------------------------------------------------------------

    fn get_var(&mut self, name: &str) -> Result<Value, RuntimeError> {
        match name {
            "self" => return Ok(self.cur().self_value.clone().unwrap_or(Value::Null)),
            "super" => return Ok(self.cur().super_value.clone().unwrap_or(Value::Null)),
            "outer" => {
                return Ok(match &self.cur().outer_vars {
                    Some(m) => Value::Map(m.clone()),
                    None => Value::Map(self.global_locals()),
                })
            }
            "locals" => return Ok(Value::Map(self.cur().locals.clone())),
            "globals" => return Ok(Value::Map(self.global_locals())),
            _ => {}
        }

        if let Some(v) = self.cur().locals.borrow().get(&Value::string(name)) {
            return Ok(v);
        }

        if let Some(v) = self.cur().outer_vars.clone() {
            if let Some(found) = v.borrow().get(&Value::string(name)) {
                return Ok(found);
            }
        }
        let is_root = self.contexts.len() == 1;
        if !is_root {
            if let Some(found) = self.global_locals().borrow().get(&Value::string(name)) {
                return Ok(found);
            }
        }
        if intrinsics::is_registered(name) {
            return Ok(Value::Intrinsic(name.into()));
        }
        Err(self.err(RuntimeError::undefined_identifier(name, self.context_name())))
    }

    fn set_var(&mut self, name: &str, value: Value) -> Result<(), RuntimeError> {
        match name {
            "self" => {
                self.cur_mut().self_value = Some(value);
                Ok(())
            }
            "globals" | "locals" => Err(self.err(RuntimeError::new(
                crate::error::RuntimeErrorKind::Other,
                format!("cannot assign to '{name}'"),
                self.context_name(),
            ))),
            _ => {
                self.cur().locals.borrow_mut().set(Value::string(name), value);
                Ok(())
            }
        }
    }

    // ------------------------------------------------------------
    // call protocol (spec §4.3 CallFunctionA)
    // ------------------------------------------------------------

    fn call_function(&mut self, line: &Line) -> Result<(), RuntimeError> {
        let callee_node = line.rhs_a.as_ref().expect("CallFunctionA missing rhsA").clone();
        let arg_count = line.rhs_b.as_ref().map(|v| v.as_int()).unwrap_or(0);

        // Resolve the callee. For a dot call (`x.push 42`) the receiver is
        // evaluated exactly once here and carried alongside the resolved
        // callee, so it can serve both the `self`-binding below and as the
        // implicit first argument an intrinsic expects (spec §4.3 call
        // protocol; §4.4 "self"-first convention).
        let (callee_val, receiver) = match &callee_node {
            Value::SeqElem { base, index, .. } => {
                let is_super = matches!(base.as_ref(), Value::Var { name, .. } if name.as_ref() == "super");
                let base_val = if is_super {
                    self.cur().self_value.clone().unwrap_or(Value::Null)
                } else {
                    self.eval(base)?
                };
                let index_val = self.eval(index)?;
                let resolved = self.index_get(&base_val, &index_val, false)?;
                (resolved, Some((base_val, is_super)))
            }
            _ => (self.eval_raw(&callee_node)?, None),
        };

        if !callee_val.is_function() {
            if arg_count > 0 {
                self.cur_mut().pending_args.clear();
                return Err(self.err(RuntimeError::too_many_arguments(
                    "cannot call a non-function value with arguments",
                    self.context_name(),
                )));
            }
            self.store(line.lhs.as_ref().unwrap(), callee_val)?;
            return Ok(());
        }

        if let Value::Intrinsic(name) = &callee_val {
            let name = name.clone();
            if let Some((base_val, is_super)) = &receiver {
                if !*is_super {
                    self.cur_mut().pending_args.insert(0, base_val.clone());
                }
            }
            self.dispatch_intrinsic(&name, line.lhs.as_ref())?;
            return Ok(());
        }

        let Value::Function(vfunc, outer_vars) = callee_val else {
            unreachable!("checked is_function above");
        };

        let (self_value, super_value) = match &receiver {
            Some((base_val, is_super)) => {
                if *is_super {
                    (self.cur().self_value.clone(), None)
                } else {
                    let super_val = match base_val {
                        Value::Map(m) => m.borrow().isa(),
                        _ => None,
                    };
                    (Some(base_val.clone()), super_val)
                }
            }
            None => (None, None),
        };

        let args: Vec<Value> = self.cur_mut().pending_args.drain(..).collect();

        let mut params = vfunc.params.iter();
        if self_value.is_some() {
            if let Some(first) = vfunc.params.first() {
                if first.name == "self" {
                    params.next();
                }
            }
        }
        let params: Vec<_> = params.collect();

        if args.len() > params.len() {
            return Err(self.err(RuntimeError::too_many_arguments(
                format!("{} takes {} argument(s), got {}", vfunc.name, params.len(), args.len()),
                self.context_name(),
            )));
        }

        let mut frame = Context::call(
            vfunc.code.clone().into(),
            outer_vars,
            self_value,
            super_value,
            line.lhs.clone(),
            vfunc.name.clone(),
        );
        for (i, param) in params.iter().enumerate() {
            let value = args.get(i).cloned().or_else(|| param.default.clone()).unwrap_or(Value::Null);
            frame.locals.borrow_mut().raw_set(Value::string(param.name.as_str()), value);
        }

        debug!("calling '{}' ({} context(s) deep)", vfunc.name, self.contexts.len() + 1);
        self.contexts.push(frame);
        Ok(())
    }

    /// Drain pending args, dispatch to the intrinsic table, and either
    /// store the result (returns `false`, advance `pc` normally) or stash
    /// the partial result and signal a retry on the same line (returns
    /// `true`, spec §5 "Partial intrinsic result").
    fn dispatch_intrinsic(&mut self, name: &str, lhs: Option<&Value>) -> Result<bool, RuntimeError> {
        trace!("dispatching intrinsic '{name}'");
        let args: Vec<Value> = self.cur_mut().pending_args.drain(..).collect();
        let prior = self.cur_mut().partial_result.take();
        match intrinsics::dispatch(self, name, args, prior)? {
            IntrinsicOutcome::Done(v) => {
                if let Some(target) = lhs {
                    self.store(target, v)?;
                }
                self.cur_mut().partial_result = None;
                Ok(false)
            }
            IntrinsicOutcome::Partial(opaque) => {
                self.cur_mut().partial_result = Some(opaque);
                Ok(true)
            }
        }
    }

    // ------------------------------------------------------------
    // arithmetic / comparison / isa / indexing
    // ------------------------------------------------------------

    fn arith(&self, op: Opcode, a: Value, b: Value) -> Result<Value, RuntimeError> {
        use Opcode::*;
        match (op, &a, &b) {
            (_, Value::Number(x), Value::Number(y)) => {
                let r = match op {
                    APlusB => x + y,
                    AMinusB => x - y,
                    ATimesB => x * y,
                    ADividedByB => x / y,
                    AModB => x - y * (x / y).floor(),
                    APowB => x.powf(*y),
                    _ => unreachable!(),
                };
                Ok(Value::Number(r))
            }
            (APlusB, Value::String(x), Value::String(y)) => Ok(Value::string(format!("{x}{y}"))),
            (APlusB, Value::String(x), other) => Ok(Value::string(format!("{x}{}", crate::value::format::display_string(other)))),
            (AMinusB, Value::String(x), Value::String(y)) => {
                Ok(Value::string(x.strip_suffix(y.as_ref()).unwrap_or(x).to_owned()))
            }
            (ATimesB, Value::String(x), Value::Number(n)) => {
                let count = n.trunc().max(0.0) as usize;
                Ok(Value::string(x.repeat(count)))
            }
            (ADividedByB, Value::String(x), Value::Number(n)) if *n != 0.0 => {
                let count = (1.0 / n).trunc().max(0.0) as usize;
                Ok(Value::string(x.repeat(count)))
            }
            (APlusB, Value::List(x), Value::List(y)) => {
                let mut out: Vec<Value> = x.borrow().clone();
                out.extend(y.borrow().iter().cloned());
                self.check_size(out.len())?;
                Ok(Value::list(out))
            }
            (ATimesB, Value::List(x), Value::Number(n)) => {
                let count = n.trunc().max(0.0) as usize;
                let base = x.borrow();
                let mut out = Vec::with_capacity(base.len() * count);
                for _ in 0..count {
                    out.extend(base.iter().cloned());
                }
                self.check_size(out.len())?;
                Ok(Value::list(out))
            }
            _ => Err(self.err(RuntimeError::type_error(
                format!("unsupported operand types for {op:?}: {} and {}", a.type_name(), b.type_name()),
                self.context_name(),
            ))),
        }
    }

    fn check_size(&self, len: usize) -> Result<(), RuntimeError> {
        if len > crate::value::MAX_SIZE {
            Err(self.err(RuntimeError::limit_exceeded("result exceeds maximum container size", self.context_name())))
        } else {
            Ok(())
        }
    }

    fn compare(&self, op: Opcode, a: Value, b: Value) -> Result<Value, RuntimeError> {
        use Opcode::*;
        if matches!(op, AEqualB | ANotEqualB) {
            let eq = a.eq_bool(&b);
            return Ok(Value::Number(if matches!(op, AEqualB) { eq as i32 as f64 } else { !eq as i32 as f64 }));
        }
        let ordering = match (&a, &b) {
            (Value::Number(x), Value::Number(y)) => x.partial_cmp(y),
            (Value::String(x), Value::String(y)) => Some(x.as_ref().cmp(y.as_ref())),
            _ => {
                return Err(self.err(RuntimeError::type_error(
                    format!("cannot order {} and {}", a.type_name(), b.type_name()),
                    self.context_name(),
                )))
            }
        };
        let Some(ordering) = ordering else {
            return Ok(Value::Number(0.0));
        };
        use std::cmp::Ordering::*;
        let truth = match (op, ordering) {
            (ALessB, Less) | (ALessOrEqualB, Less | Equal) | (AGreaterB, Greater) | (AGreaterOrEqualB, Greater | Equal) => 1.0,
            _ => 0.0,
        };
        Ok(Value::Number(truth))
    }

    fn isa(&self, a: &Value, b: &Value) -> Result<f64, RuntimeError> {
        if a.is_null() {
            return Ok(if b.is_null() { 1.0 } else { 0.0 });
        }
        let Value::Map(start) = a else {
            return Ok(0.0);
        };
        if let Value::Map(target) = b {
            if Rc::ptr_eq(start, target) {
                return Ok(1.0);
            }
        }
        const MAX_DEPTH: usize = 256;
        let mut current = start.borrow().isa();
        let mut depth = 0;
        while let Some(Value::Map(next)) = current {
            if let Value::Map(target) = b {
                if Rc::ptr_eq(&next, target) {
                    return Ok(1.0);
                }
            }
            depth += 1;
            if depth >= MAX_DEPTH {
                return Err(self.err(RuntimeError::limit_exceeded("__isa chain exceeded maximum depth", self.context_name())));
            }
            current = next.borrow().isa();
        }
        Ok(0.0)
    }

    /// `a[b]`; `for_iter` selects `ElemBofIterA`'s map-pair behavior. A
    /// string-keyed access on a list/string/number/function, or a map whose
    /// own `__isa` chain comes up empty, redirects to that type's implicit
    /// prototype (spec §4.3 `__isa` chain note; §4.4 "Type prototypes").
    fn index_get(&mut self, a: &Value, b: &Value, for_iter: bool) -> Result<Value, RuntimeError> {
        match a {
            Value::Map(m) => {
                if for_iter {
                    let pair_key = m.borrow().keys().nth(b.as_int().max(0) as usize).cloned();
                    let Some(key) = pair_key else {
                        return Err(self.err(RuntimeError::index("map iteration index out of range", self.context_name())));
                    };
                    let value = m.borrow().get(&key).unwrap_or(Value::Null);
                    let mut pair = MsMap::new();
                    pair.raw_set(Value::string("key"), key);
                    pair.raw_set(Value::string("value"), value);
                    Ok(Value::map(pair))
                } else {
                    let found = match m.borrow().lookup_chain(b) {
                        Ok(found) => found,
                        Err(()) => return Err(self.err(RuntimeError::limit_exceeded("__isa chain exceeded maximum depth", self.context_name()))),
                    };
                    if let Some(v) = found {
                        return Ok(v);
                    }
                    if let Value::String(name) = b {
                        if let Some(v) = intrinsics::prototype_method(self, a, name) {
                            return Ok(v);
                        }
                    }
                    Err(self.err(RuntimeError::key(format!("key not found: {}", crate::value::format::code_form(b)), self.context_name())))
                }
            }
            Value::List(list) => {
                if let Value::String(name) = b {
                    return intrinsics::prototype_method(self, a, name)
                        .ok_or_else(|| self.err(RuntimeError::undefined_identifier(name.as_ref(), self.context_name())));
                }
                let items = list.borrow();
                let idx = wrap_index(b.as_int(), items.len())
                    .ok_or_else(|| self.err(RuntimeError::index("list index out of range", self.context_name())))?;
                Ok(items[idx].clone())
            }
            Value::String(s) => {
                if let Value::String(name) = b {
                    return intrinsics::prototype_method(self, a, name)
                        .ok_or_else(|| self.err(RuntimeError::undefined_identifier(name.as_ref(), self.context_name())));
                }
                let chars: Vec<char> = s.chars().collect();
                let idx = wrap_index(b.as_int(), chars.len())
                    .ok_or_else(|| self.err(RuntimeError::index("string index out of range", self.context_name())))?;
                Ok(Value::string(chars[idx].to_string()))
            }
            Value::Number(_) | Value::Function(..) | Value::Intrinsic(_) => {
                if let Value::String(name) = b {
                    if let Some(v) = intrinsics::prototype_method(self, a, name) {
                        return Ok(v);
                    }
                }
                Err(self.err(RuntimeError::type_error(format!("cannot index into a {}", a.type_name()), self.context_name())))
            }
            _ => Err(self.err(RuntimeError::type_error(format!("cannot index into a {}", a.type_name()), self.context_name()))),
        }
    }

    fn set_indexed(&mut self, base: &Value, index: Value, value: Value) -> Result<(), RuntimeError> {
        match base {
            Value::Map(m) => {
                m.borrow_mut().set(index, value);
                Ok(())
            }
            Value::List(list) => {
                let len = list.borrow().len();
                let idx = wrap_index(index.as_int(), len)
                    .ok_or_else(|| self.err(RuntimeError::index("list index out of range", self.context_name())))?;
                list.borrow_mut()[idx] = value;
                Ok(())
            }
            other => Err(self.err(RuntimeError::type_error(format!("cannot assign into a {}", other.type_name()), self.context_name()))),
        }
    }

    fn length_of(&self, a: &Value) -> Result<usize, RuntimeError> {
        match a {
            Value::String(s) => Ok(s.chars().count()),
            Value::List(l) => Ok(l.borrow().len()),
            Value::Map(m) => Ok(m.borrow().len()),
            _ => Err(self.err(RuntimeError::type_error(format!("{} has no length", a.type_name()), self.context_name()))),
        }
    }

    pub fn elapsed_seconds(&self) -> f64 {
        self.run_started_at.map(|t| t.elapsed().as_secs_f64()).unwrap_or(0.0)
    }
}

/// Resolve a fuzzy-logic truth value in `[0, 1]` for `and`/`or`/`not`: a
/// number's clamped absolute value, or 1.0/0.0 for any other truthy/falsy
/// value (spec §4.3 `aAndB, aOrB, notA`).
fn fuzzy_val(v: &Value) -> f64 {
    match v {
        Value::Number(n) => clamp01(n.abs()),
        other => {
            if other.truthy() {
                1.0
            } else {
                0.0
            }
        }
    }
}

/// Negative-index wraparound shared by list/string indexing: `-1` is the
/// last element. Returns `None` if still out of range after wrapping.
fn wrap_index(idx: i64, len: usize) -> Option<usize> {
    let resolved = if idx < 0 { idx + len as i64 } else { idx };
    if resolved < 0 || resolved as usize >= len {
        None
    } else {
        Some(resolved as usize)
    }
}
