//! Per-function-body compiler state: the emitted code vector plus the
//! backpatch and jump-point tables used to resolve forward/backward
//! branches (spec §4.2). Modeled after the cursor-with-index style of
//! `why_lib`'s `ParseState` (`crates/why_lib/src/parser/parse_state.rs`),
//! but tracking TAC line indices rather than a token cursor.

use crate::tac::Line;
use crate::value::LocalOnlyMode;

/// What a pending backpatch is waiting to be resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackpatchTag {
    /// Sentinel marking the start of an `if` block; never itself patched.
    IfMark,
    /// Sentinel marking the start of a loop body, scoping `break` patches.
    LoopMark,
    Else,
    EndIf,
    /// Patched to just past a `while`/`for` loop, i.e. the condition-false exit.
    LoopExit,
    Break,
}

#[derive(Debug, Clone, Copy)]
pub struct Backpatch {
    pub line_index: usize,
    pub tag: BackpatchTag,
}

/// A recorded position inside a loop, targeted by `continue` and by the
/// unconditional jump at the loop's bottom.
#[derive(Debug, Clone, Copy)]
pub struct JumpPoint {
    pub line_index: usize,
}

/// Compiler state for one nested function body (or the top-level program).
/// Pushed when entering `function`, popped on `end function`.
#[derive(Default)]
pub struct FuncState {
    pub code: Vec<Line>,
    pub backpatches: Vec<Backpatch>,
    pub jump_points: Vec<JumpPoint>,
    next_temp_num: usize,
    pub local_only_identifier: Option<String>,
    pub local_only_mode: LocalOnlyMode,
    /// Name of the currently-compiling function, used for diagnostics only.
    pub name: String,
    /// Nonzero while parsing the body of a single-line `if cond then stmt`
    /// (spec §4.2: "patch_if_block(true)... forbids nested loops on the
    /// single line"). Nests for `if 1 then if 2 then ...`.
    pub single_line_if_depth: usize,
}

impl FuncState {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            local_only_mode: LocalOnlyMode::Off,
            ..Default::default()
        }
    }

    pub fn next_temp(&mut self) -> usize {
        let n = self.next_temp_num;
        self.next_temp_num += 1;
        n
    }

    pub fn emit(&mut self, line: Line) -> usize {
        self.code.push(line);
        self.code.len() - 1
    }

    pub fn here(&self) -> usize {
        self.code.len()
    }

    /// True if any already-emitted jump targets `line`, or any still-open
    /// jump point does — used by the peephole retargeting optimization to
    /// avoid silently eliding a jump destination. Only backward jumps (whose
    /// target line is already known at emission time) can target a line
    /// that precedes them, so scanning resolved operands is sufficient:
    /// forward jumps are still pending backpatches and cannot yet target
    /// anything at or before the current position.
    pub fn is_jump_target(&self, line: usize) -> bool {
        use crate::tac::Opcode;
        use crate::value::Value;
        let targets_line = |l: &Line| {
            matches!(
                l.op,
                Opcode::Goto | Opcode::GotoIfB | Opcode::GotoIfTrulyB | Opcode::GotoIfNotB
            ) && matches!(l.rhs_a, Some(Value::Number(n)) if n as usize == line)
        };
        self.code.iter().any(targets_line) || self.jump_points.iter().any(|jp| jp.line_index == line)
    }
}
