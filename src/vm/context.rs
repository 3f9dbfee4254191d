//! A single activation record on the [`super::Machine`]'s call stack.

use std::rc::Rc;

use crate::tac::Line;
use crate::value::{MsMap, Rmap, Value};

/// One nested function activation, or the global (root) activation.
pub struct Context {
    pub code: Rc<Vec<Line>>,
    pub pc: usize,
    pub locals: Rmap,
    pub outer_vars: Option<Rmap>,
    pub self_value: Option<Value>,
    pub super_value: Option<Value>,
    /// Where the caller wants this context's return value stored, evaluated
    /// against the *caller's* frame once this context pops (spec §4.3 call
    /// protocol step 3).
    pub result_storage: Option<Value>,
    pub pending_args: Vec<Value>,
    /// Opaque state stashed by an intrinsic that returned "not done" (e.g.
    /// `wait`'s target wake time), re-presented to the same call on the next
    /// step.
    pub partial_result: Option<Value>,
    temps: Vec<Value>,
    /// Function name or `"global"`, used only for diagnostics.
    pub name: String,
}

impl Context {
    pub fn global(code: Rc<Vec<Line>>) -> Self {
        Self {
            code,
            pc: 0,
            locals: Rc::new(std::cell::RefCell::new(MsMap::new())),
            outer_vars: None,
            self_value: None,
            super_value: None,
            result_storage: None,
            pending_args: vec![],
            partial_result: None,
            temps: vec![],
            name: "global".to_owned(),
        }
    }

    pub fn call(
        code: Rc<Vec<Line>>,
        outer_vars: Option<Rmap>,
        self_value: Option<Value>,
        super_value: Option<Value>,
        result_storage: Option<Value>,
        name: String,
    ) -> Self {
        Self {
            code,
            pc: 0,
            locals: Rc::new(std::cell::RefCell::new(MsMap::new())),
            outer_vars,
            self_value,
            super_value,
            result_storage,
            pending_args: vec![],
            partial_result: None,
            temps: vec![],
            name,
        }
    }

    pub fn is_done(&self) -> bool {
        self.pc >= self.code.len()
    }

    pub fn current_line(&self) -> Option<&Line> {
        self.code.get(self.pc)
    }

    pub fn get_temp(&self, n: usize) -> Value {
        self.temps.get(n).cloned().unwrap_or(Value::Null)
    }

    pub fn set_temp(&mut self, n: usize, value: Value) {
        if n >= self.temps.len() {
            self.temps.resize(n + 1, Value::Null);
        }
        self.temps[n] = value;
    }

    /// Reserve a fresh temp slot (used by auto-invoke to give a pushed
    /// sub-stack somewhere to land its `ReturnA` result).
    pub fn alloc_temp_slot(&mut self) -> usize {
        let n = self.temps.len();
        self.temps.push(Value::Null);
        n
    }
}
