//! Recursive-descent parser/compiler: turns a token stream into TAC.
//!
//! One [`state::FuncState`] is pushed per nested function body; the parser
//! never builds a full AST — expressions are compiled straight to TAC as
//! they are parsed, in the spirit of `y-lang`'s single-pass
//! lexer-to-instruction pipeline (`src/compiler/mod.rs`), generalized here
//! to backpatched forward branches instead of straight-line x86 codegen.

mod state;

use log::{debug, trace};

use crate::error::{CompileError, SourceLoc};
use crate::lexer::{Keyword, Lexer, OpKind, Token, TokenKind};
use crate::tac::{Line, Opcode};
use crate::value::{LocalOnlyMode, MsMap, Param, VFunction, Value};

use state::{Backpatch, BackpatchTag, FuncState, JumpPoint};

pub struct Parser {
    lexer: Lexer,
    states: Vec<FuncState>,
    /// REPL mode relaxes "unexpected EOF" into a `NeedMoreInput` signal
    /// instead of a hard error.
    repl_mode: bool,
}

/// Result of a top-level `compile()` call.
pub struct CompiledProgram {
    pub code: Vec<Line>,
}

impl Parser {
    pub fn new(source: &str, repl_mode: bool) -> Self {
        Self {
            lexer: Lexer::new(source),
            states: vec![FuncState::new("global")],
            repl_mode,
        }
    }

    /// Compile a complete, non-REPL program. Returns `Err` with
    /// `CompileError` on the first detected mistake.
    pub fn compile(source: &str) -> Result<Vec<Line>, CompileError> {
        let mut parser = Parser::new(source, false);
        parser.parse_program().map_err(|e| {
            debug!("compile failed: {e}");
            e
        })?;
        let code = parser.states.pop().unwrap().code;
        trace!("compiled {} TAC lines", code.len());
        Ok(code)
    }

    /// True if a trailing token (operator, open bracket, comma, dot, `@`, or
    /// one of `and/or/isa/not/new`) indicates the REPL should buffer another
    /// line before attempting to compile (spec §4.2 line-continuation).
    pub fn ends_with_line_continuation(src: &str) -> bool {
        let Some(tok) = crate::lexer::last_token(src) else {
            return false;
        };
        match &tok.kind {
            TokenKind::Op(_) => true,
            TokenKind::LParen | TokenKind::LSquare | TokenKind::LCurly => true,
            TokenKind::Comma | TokenKind::Dot | TokenKind::Colon | TokenKind::AddressOf => true,
            TokenKind::Keyword(k) => matches!(
                k,
                Keyword::And | Keyword::Or | Keyword::Isa | Keyword::Not | Keyword::New
            ),
            _ => false,
        }
    }

    fn cur(&mut self) -> &mut FuncState {
        self.states.last_mut().unwrap()
    }

    fn loc(&self) -> SourceLoc {
        SourceLoc::new(self.lexer.line_num())
    }

    fn err(&self, message: impl Into<String>) -> CompileError {
        let err = CompileError::new(message, self.loc());
        trace!("{err}");
        err
    }

    fn peek(&mut self) -> Result<Token, CompileError> {
        self.lexer.peek().map_err(|e| CompileError::new(e.message, e.location.unwrap_or_default()))
    }

    fn next(&mut self) -> Result<Token, CompileError> {
        self.lexer.dequeue().map_err(|e| CompileError::new(e.message, e.location.unwrap_or_default()))
    }

    fn peek_kind(&mut self) -> Result<TokenKind, CompileError> {
        Ok(self.peek()?.kind)
    }

    fn is_keyword(&mut self, kw: Keyword) -> Result<bool, CompileError> {
        Ok(matches!(self.peek_kind()?, TokenKind::Keyword(k) if k == kw))
    }

    fn expect_keyword(&mut self, kw: Keyword) -> Result<(), CompileError> {
        let tok = self.next()?;
        match tok.kind {
            TokenKind::Keyword(k) if k == kw => Ok(()),
            _ => Err(self.err(format!("expected '{}', found '{}'", kw.text(), tok.text))),
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<Token, CompileError> {
        let tok = self.next()?;
        if std::mem::discriminant(&tok.kind) == std::mem::discriminant(&kind) {
            Ok(tok)
        } else {
            Err(self.err(format!("expected {what}, found '{}'", tok.text)))
        }
    }

    fn skip_eols(&mut self) -> Result<(), CompileError> {
        while matches!(self.peek_kind()?, TokenKind::Eol) {
            self.next()?;
        }
        Ok(())
    }

    fn at_statement_end(&mut self) -> Result<bool, CompileError> {
        Ok(matches!(self.peek_kind()?, TokenKind::Eol | TokenKind::Eof))
    }

    fn is_block_terminator(kind: &TokenKind) -> bool {
        matches!(
            kind,
            TokenKind::Keyword(
                Keyword::Else
                    | Keyword::ElseIf
                    | Keyword::EndIf
                    | Keyword::EndWhile
                    | Keyword::EndFor
                    | Keyword::EndFunction
            ) | TokenKind::Eof
        )
    }

    // ----------------------------------------------------------------
    // Top level / statement sequencing
    // ----------------------------------------------------------------

    fn parse_program(&mut self) -> Result<(), CompileError> {
        self.skip_eols()?;
        while !matches!(self.peek_kind()?, TokenKind::Eof) {
            self.parse_statement()?;
            self.end_statement()?;
        }
        if self.states.len() != 1 {
            return Err(self.err("unmatched 'function' at end of input"));
        }
        let backpatches_len = self.cur().backpatches.len();
        if backpatches_len != 0 {
            return Err(self.err("unmatched block (missing 'end if'/'end while'/'end for')"));
        }
        Ok(())
    }

    /// Consume the statement terminator: one or more EOLs, or a lookahead
    /// block terminator (handled by the caller), or EOF.
    fn end_statement(&mut self) -> Result<(), CompileError> {
        match self.peek_kind()? {
            TokenKind::Eol => {
                self.skip_eols()?;
                Ok(())
            }
            TokenKind::Eof => Ok(()),
            ref k if Self::is_block_terminator(k) => Ok(()),
            _ => {
                let tok = self.next()?;
                Err(self.err(format!("expected end of statement, found '{}'", tok.text)))
            }
        }
    }

    /// Parse a block of statements until a terminator keyword is reached
    /// (the terminator itself is left unconsumed).
    fn parse_block_until(&mut self, stop: impl Fn(&TokenKind) -> bool) -> Result<(), CompileError> {
        self.skip_eols()?;
        while !stop(&self.peek_kind()?) {
            self.parse_statement()?;
            self.end_statement()?;
        }
        Ok(())
    }

    fn parse_statement(&mut self) -> Result<(), CompileError> {
        match self.peek_kind()? {
            TokenKind::Keyword(Keyword::Return) => self.parse_return(),
            TokenKind::Keyword(Keyword::If) => self.parse_if(),
            TokenKind::Keyword(Keyword::While) => self.parse_while(),
            TokenKind::Keyword(Keyword::For) => self.parse_for(),
            TokenKind::Keyword(Keyword::Break) => self.parse_break(),
            TokenKind::Keyword(Keyword::Continue) => self.parse_continue(),
            _ => self.parse_assignment_or_command(),
        }
    }

    // ----------------------------------------------------------------
    // return / break / continue
    // ----------------------------------------------------------------

    fn parse_return(&mut self) -> Result<(), CompileError> {
        self.expect_keyword(Keyword::Return)?;
        let expr = if self.at_statement_end()? || Self::is_block_terminator(&self.peek_kind()?) {
            Value::Null
        } else {
            self.parse_expr()?
        };
        let loc = self.loc();
        self.cur().emit(Line::new(None, Opcode::Return, Some(expr), None).with_location(loc));
        Ok(())
    }

    fn parse_break(&mut self) -> Result<(), CompileError> {
        self.expect_keyword(Keyword::Break)?;
        if self.cur().jump_points.is_empty() {
            return Err(self.err("'break' outside of a loop"));
        }
        let loc = self.loc();
        let line = self.cur().emit(Line::new(None, Opcode::Goto, Some(Value::Number(-1.0)), None).with_location(loc));
        self.cur().backpatches.push(Backpatch {
            line_index: line,
            tag: BackpatchTag::Break,
        });
        Ok(())
    }

    fn parse_continue(&mut self) -> Result<(), CompileError> {
        self.expect_keyword(Keyword::Continue)?;
        let Some(jp) = self.cur().jump_points.last().copied() else {
            return Err(self.err("'continue' outside of a loop"));
        };
        let loc = self.loc();
        self.cur()
            .emit(Line::new(None, Opcode::Goto, Some(Value::Number(jp.line_index as f64)), None).with_location(loc));
        Ok(())
    }

    // ----------------------------------------------------------------
    // if / else if / else / end if
    // ----------------------------------------------------------------

    fn parse_if(&mut self) -> Result<(), CompileError> {
        self.expect_keyword(Keyword::If)?;
        self.parse_if_tail(true)
    }

    /// Shared by the initial `if` and by `end_if_or_else` for `else if`
    /// branches; `is_first` controls whether an `if:MARK` sentinel is
    /// pushed.
    fn parse_if_tail(&mut self, is_first: bool) -> Result<(), CompileError> {
        let cond = self.parse_expr()?;
        self.expect_keyword(Keyword::Then)?;
        let loc = self.loc();
        let goto_line = self
            .cur()
            .emit(Line::new(None, Opcode::GotoIfNotB, Some(Value::Number(-1.0)), Some(cond)).with_location(loc));
        if is_first {
            self.cur().backpatches.push(Backpatch {
                line_index: goto_line,
                tag: BackpatchTag::IfMark,
            });
        }
        self.cur().backpatches.push(Backpatch {
            line_index: goto_line,
            tag: BackpatchTag::Else,
        });

        let single_line = !matches!(self.peek_kind()?, TokenKind::Eol | TokenKind::Eof);
        if single_line {
            self.cur().single_line_if_depth += 1;
            let result = self.parse_statement();
            self.cur().single_line_if_depth -= 1;
            result?;
            while matches!(self.peek_kind()?, TokenKind::Keyword(Keyword::Else | Keyword::ElseIf)) {
                self.parse_else_branch(true)?;
            }
            self.patch_if_block();
        } else {
            self.skip_eols()?;
            self.parse_block_until(|k| {
                matches!(
                    k,
                    TokenKind::Keyword(Keyword::Else | Keyword::ElseIf | Keyword::EndIf) | TokenKind::Eof
                )
            })?;
            while matches!(self.peek_kind()?, TokenKind::Keyword(Keyword::Else | Keyword::ElseIf)) {
                self.parse_else_branch(false)?;
            }
            self.expect_keyword(Keyword::EndIf)?;
            self.patch_if_block();
        }
        Ok(())
    }

    fn parse_else_branch(&mut self, single_line: bool) -> Result<(), CompileError> {
        let is_elseif = self.is_keyword(Keyword::ElseIf)?;
        self.next()?; // consume else / else if

        let loc = self.loc();
        let goto_endif = self
            .cur()
            .emit(Line::new(None, Opcode::Goto, Some(Value::Number(-1.0)), None).with_location(loc));
        self.cur().backpatches.push(Backpatch {
            line_index: goto_endif,
            tag: BackpatchTag::EndIf,
        });
        self.patch_top_tag(BackpatchTag::Else);

        if is_elseif {
            let cond = self.parse_expr()?;
            self.expect_keyword(Keyword::Then)?;
            let loc = self.loc();
            let guard = self
                .cur()
                .emit(Line::new(None, Opcode::GotoIfNotB, Some(Value::Number(-1.0)), Some(cond)).with_location(loc));
            self.cur().backpatches.push(Backpatch {
                line_index: guard,
                tag: BackpatchTag::Else,
            });
        }

        if single_line {
            if !matches!(self.peek_kind()?, TokenKind::Keyword(Keyword::Else | Keyword::ElseIf) | TokenKind::Eol | TokenKind::Eof)
            {
                self.cur().single_line_if_depth += 1;
                let result = self.parse_statement();
                self.cur().single_line_if_depth -= 1;
                result?;
            }
        } else {
            self.skip_eols()?;
            self.parse_block_until(|k| {
                matches!(
                    k,
                    TokenKind::Keyword(Keyword::Else | Keyword::ElseIf | Keyword::EndIf) | TokenKind::Eof
                )
            })?;
        }
        Ok(())
    }

    /// Patch the most recent backpatch entry with the given tag to the
    /// current code position, then drop it from the stack. Must remove
    /// (not just mark consumed) so `patch_if_block`'s final walk doesn't
    /// mistake it for the chain's `IfMark` sentinel and stop early, leaving
    /// earlier branches' `end if` gotos unpatched.
    fn patch_top_tag(&mut self, tag: BackpatchTag) {
        let here = self.cur().here();
        if let Some(pos) = self.cur().backpatches.iter().rposition(|b| b.tag == tag) {
            let bp = self.cur().backpatches.remove(pos);
            self.cur().code[bp.line_index].rhs_a = Some(Value::Number(here as f64));
        }
    }

    /// Walk the backpatch stack from the top, patching every `else` and
    /// `end if` entry to the current position, stopping at (and consuming)
    /// `if:MARK` (spec §4.2, property #5).
    fn patch_if_block(&mut self) {
        let here = self.cur().here();
        loop {
            let Some(bp) = self.cur().backpatches.pop() else { break };
            match bp.tag {
                BackpatchTag::IfMark => break,
                BackpatchTag::Else | BackpatchTag::EndIf => {
                    self.cur().code[bp.line_index].rhs_a = Some(Value::Number(here as f64));
                }
                _ => {}
            }
        }
    }

    // ----------------------------------------------------------------
    // while / end while
    // ----------------------------------------------------------------

    fn parse_while(&mut self) -> Result<(), CompileError> {
        if self.cur().single_line_if_depth > 0 {
            return Err(self.err("a single-line 'if' body cannot contain a 'while' loop"));
        }
        self.expect_keyword(Keyword::While)?;
        let loop_start = self.cur().here();
        self.cur().jump_points.push(JumpPoint { line_index: loop_start });
        self.cur().backpatches.push(Backpatch {
            line_index: loop_start,
            tag: BackpatchTag::LoopMark,
        });

        let cond = self.parse_expr()?;
        let loc = self.loc();
        let exit = self
            .cur()
            .emit(Line::new(None, Opcode::GotoIfNotB, Some(Value::Number(-1.0)), Some(cond)).with_location(loc));
        self.cur().backpatches.push(Backpatch {
            line_index: exit,
            tag: BackpatchTag::LoopExit,
        });

        self.parse_block_until(|k| matches!(k, TokenKind::Keyword(Keyword::EndWhile) | TokenKind::Eof))?;
        self.expect_keyword(Keyword::EndWhile)?;

        let loc = self.loc();
        self.cur()
            .emit(Line::new(None, Opcode::Goto, Some(Value::Number(loop_start as f64)), None).with_location(loc));
        self.close_loop();
        Ok(())
    }

    /// Patch every `LoopExit`/`Break` entry pushed since the matching
    /// `LoopMark` to the current position, then pop the loop's jump point.
    fn close_loop(&mut self) {
        let here = self.cur().here();
        loop {
            let Some(bp) = self.cur().backpatches.pop() else { break };
            match bp.tag {
                BackpatchTag::LoopMark => break,
                BackpatchTag::LoopExit | BackpatchTag::Break => {
                    self.cur().code[bp.line_index].rhs_a = Some(Value::Number(here as f64));
                }
                _ => {}
            }
        }
        self.cur().jump_points.pop();
    }

    // ----------------------------------------------------------------
    // for / end for
    // ----------------------------------------------------------------

    fn parse_for(&mut self) -> Result<(), CompileError> {
        if self.cur().single_line_if_depth > 0 {
            return Err(self.err("a single-line 'if' body cannot contain a 'for' loop"));
        }
        self.expect_keyword(Keyword::For)?;
        let var_tok = self.expect(TokenKind::Identifier(String::new()), "loop variable")?;
        let TokenKind::Identifier(var_name) = var_tok.kind else { unreachable!() };
        self.expect_keyword(Keyword::In)?;
        let seq_expr = self.parse_expr()?;

        let seq_temp = self.to_temp(seq_expr);
        let len_temp = self.emit_unary(Opcode::LengthOfA, seq_temp.clone());
        let idx_name = format!("__{var_name}_idx");
        let loc = self.loc();
        self.cur().emit(
            Line::new(Some(Value::var(idx_name.clone())), Opcode::Assign, Some(Value::Number(-1.0)), None)
                .with_location(loc),
        );

        let loop_start = self.cur().here();
        self.cur().jump_points.push(JumpPoint { line_index: loop_start });
        self.cur().backpatches.push(Backpatch {
            line_index: loop_start,
            tag: BackpatchTag::LoopMark,
        });

        let loc = self.loc();
        let incremented = self.emit_binop(Opcode::APlusB, Value::var(idx_name.clone()), Value::Number(1.0));
        self.cur()
            .emit(Line::new(Some(Value::var(idx_name.clone())), Opcode::Assign, Some(incremented), None).with_location(loc));

        let cond = self.emit_binop(Opcode::AGreaterOrEqualB, Value::var(idx_name.clone()), len_temp);
        let loc = self.loc();
        let exit = self
            .cur()
            .emit(Line::new(None, Opcode::GotoIfB, Some(Value::Number(-1.0)), Some(cond)).with_location(loc));
        self.cur().backpatches.push(Backpatch {
            line_index: exit,
            tag: BackpatchTag::LoopExit,
        });

        let loc = self.loc();
        self.cur().emit(
            Line::new(
                Some(Value::var(var_name.clone())),
                Opcode::ElemBofIterA,
                Some(seq_temp),
                Some(Value::var(idx_name)),
            )
            .with_location(loc),
        );

        self.parse_block_until(|k| matches!(k, TokenKind::Keyword(Keyword::EndFor) | TokenKind::Eof))?;
        self.expect_keyword(Keyword::EndFor)?;

        let loc = self.loc();
        self.cur()
            .emit(Line::new(None, Opcode::Goto, Some(Value::Number(loop_start as f64)), None).with_location(loc));
        self.close_loop();
        Ok(())
    }

    // ----------------------------------------------------------------
    // assignment / command-call statements
    // ----------------------------------------------------------------

    fn parse_assignment_or_command(&mut self) -> Result<(), CompileError> {
        let (candidate, had_postfix) = self.parse_postfix(true)?;

        match self.peek_kind()? {
            TokenKind::Op(OpKind::Eq) => {
                self.next()?;
                self.begin_local_only(&candidate);
                let rhs = self.parse_expr()?;
                self.end_local_only();
                self.emit_assign(candidate, rhs);
                Ok(())
            }
            TokenKind::Op(op @ (OpKind::PlusEq | OpKind::MinusEq | OpKind::StarEq | OpKind::SlashEq | OpKind::PercentEq | OpKind::CaretEq)) => {
                self.next()?;
                let rhs = self.parse_expr()?;
                let binop = match op {
                    OpKind::PlusEq => Opcode::APlusB,
                    OpKind::MinusEq => Opcode::AMinusB,
                    OpKind::StarEq => Opcode::ATimesB,
                    OpKind::SlashEq => Opcode::ADividedByB,
                    OpKind::PercentEq => Opcode::AModB,
                    OpKind::CaretEq => Opcode::APowB,
                    _ => unreachable!(),
                };
                let combined = self.emit_binop(binop, candidate.clone(), rhs);
                self.emit_assign(candidate, combined);
                Ok(())
            }
            _ => self.parse_command_tail(candidate, had_postfix),
        }
    }

    fn begin_local_only(&mut self, candidate: &Value) {
        if let Value::Var { name, .. } = candidate {
            self.cur().local_only_identifier = Some(name.to_string());
            self.cur().local_only_mode = LocalOnlyMode::Warn;
        }
    }

    fn end_local_only(&mut self) {
        self.cur().local_only_identifier = None;
        self.cur().local_only_mode = LocalOnlyMode::Off;
    }

    /// Retarget the last emitted line's `lhs` to `target` instead of
    /// emitting a fresh `AssignA`, when safe (peephole optimization, spec
    /// §4.2): only valid when the last line wrote into the temp we're about
    /// to overwrite and nothing jumps into the line right after it.
    fn try_retarget_last(&mut self, rhs: &Value, target: &Value) -> bool {
        let Value::Temp(n) = rhs else { return false };
        let here = self.cur().here();
        if here == 0 {
            return false;
        }
        let last_idx = here - 1;
        let writes_temp = matches!(self.cur().code[last_idx].lhs, Some(Value::Temp(m)) if m == *n);
        if !writes_temp {
            return false;
        }
        if self.cur().is_jump_target(here) {
            return false;
        }
        self.cur().code[last_idx].lhs = Some(target.clone());
        true
    }

    fn emit_assign(&mut self, target: Value, rhs: Value) {
        if self.try_retarget_last(&rhs, &target) {
            return;
        }
        let loc = self.loc();
        self.cur().emit(Line::new(Some(target), Opcode::Assign, Some(rhs), None).with_location(loc));
    }

    /// `print 6*7`-style command call, or a bare expression statement.
    fn parse_command_tail(&mut self, callee: Value, had_postfix: bool) -> Result<(), CompileError> {
        let _ = had_postfix;
        let mut args = vec![];
        if !self.at_statement_end()? && !Self::is_block_terminator(&self.peek_kind()?) {
            args.push(self.parse_expr()?);
            while matches!(self.peek_kind()?, TokenKind::Comma) {
                self.next()?;
                self.skip_line_breaks_in_args()?;
                args.push(self.parse_expr()?);
            }
        }
        for arg in &args {
            let loc = self.loc();
            self.cur().emit(Line::new(None, Opcode::PushParam, Some(arg.clone()), None).with_location(loc));
        }
        let result_temp = self.cur().next_temp();
        let loc = self.loc();
        self.cur().emit(
            Line::new(
                Some(Value::Temp(result_temp)),
                Opcode::CallFunction,
                Some(callee),
                Some(Value::Number(args.len() as f64)),
            )
            .with_location(loc),
        );
        let loc = self.loc();
        self.cur().emit(
            Line::new(Some(Value::var("_")), Opcode::AssignImplicit, Some(Value::Temp(result_temp)), None)
                .with_location(loc),
        );
        Ok(())
    }

    fn skip_line_breaks_in_args(&mut self) -> Result<(), CompileError> {
        self.skip_eols()
    }

    // ----------------------------------------------------------------
    // Expression precedence chain (low -> high binding)
    // ----------------------------------------------------------------

    fn parse_expr(&mut self) -> Result<Value, CompileError> {
        if self.is_keyword(Keyword::Function)? {
            return self.parse_function_literal();
        }
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Value, CompileError> {
        let mut lhs = self.parse_and()?;
        while self.is_keyword(Keyword::Or)? {
            self.next()?;
            let rhs_start_guard = lhs.clone();
            let rhs = self.parse_and()?;
            lhs = self.emit_short_circuit_or(rhs_start_guard, rhs);
        }
        Ok(lhs)
    }

    fn emit_short_circuit_or(&mut self, a: Value, b: Value) -> Value {
        let a_temp = self.to_temp(a);
        let loc = self.loc();
        let guard = self
            .cur()
            .emit(Line::new(None, Opcode::GotoIfTrulyB, Some(Value::Number(-1.0)), Some(a_temp.clone())).with_location(loc));
        let fuzzy = self.emit_binop(Opcode::AOrB, a_temp, b);
        let result_temp = self.cur().next_temp();
        let loc = self.loc();
        self.cur()
            .emit(Line::new(Some(Value::Temp(result_temp)), Opcode::Assign, Some(fuzzy), None).with_location(loc));
        let loc = self.loc();
        let skip = self
            .cur()
            .emit(Line::new(None, Opcode::Goto, Some(Value::Number(-1.0)), None).with_location(loc));
        let force_true = self.cur().here();
        self.cur().code[guard].rhs_a = Some(Value::Number(force_true as f64));
        let loc = self.loc();
        self.cur()
            .emit(Line::new(Some(Value::Temp(result_temp)), Opcode::Assign, Some(Value::Number(1.0)), None).with_location(loc));
        let after = self.cur().here();
        self.cur().code[skip].rhs_a = Some(Value::Number(after as f64));
        Value::Temp(result_temp)
    }

    fn parse_and(&mut self) -> Result<Value, CompileError> {
        let mut lhs = self.parse_not()?;
        while self.is_keyword(Keyword::And)? {
            self.next()?;
            let rhs = self.parse_not()?;
            lhs = self.emit_short_circuit_and(lhs, rhs);
        }
        Ok(lhs)
    }

    fn emit_short_circuit_and(&mut self, a: Value, b: Value) -> Value {
        let a_temp = self.to_temp(a);
        let loc = self.loc();
        let guard = self
            .cur()
            .emit(Line::new(None, Opcode::GotoIfNotB, Some(Value::Number(-1.0)), Some(a_temp.clone())).with_location(loc));
        let fuzzy = self.emit_binop(Opcode::AAndB, a_temp, b);
        let result_temp = self.cur().next_temp();
        let loc = self.loc();
        self.cur()
            .emit(Line::new(Some(Value::Temp(result_temp)), Opcode::Assign, Some(fuzzy), None).with_location(loc));
        let loc = self.loc();
        let skip = self
            .cur()
            .emit(Line::new(None, Opcode::Goto, Some(Value::Number(-1.0)), None).with_location(loc));
        let force_false = self.cur().here();
        self.cur().code[guard].rhs_a = Some(Value::Number(force_false as f64));
        let loc = self.loc();
        self.cur()
            .emit(Line::new(Some(Value::Temp(result_temp)), Opcode::Assign, Some(Value::Number(0.0)), None).with_location(loc));
        let after = self.cur().here();
        self.cur().code[skip].rhs_a = Some(Value::Number(after as f64));
        Value::Temp(result_temp)
    }

    fn parse_not(&mut self) -> Result<Value, CompileError> {
        if self.is_keyword(Keyword::Not)? {
            self.next()?;
            let operand = self.parse_isa()?;
            return Ok(self.emit_unary(Opcode::NotA, operand));
        }
        self.parse_isa()
    }

    fn parse_isa(&mut self) -> Result<Value, CompileError> {
        let lhs = self.parse_comparison()?;
        if self.is_keyword(Keyword::Isa)? {
            self.next()?;
            let rhs = self.parse_comparison()?;
            return Ok(self.emit_binop(Opcode::AIsaB, lhs, rhs));
        }
        Ok(lhs)
    }

    fn parse_comparison(&mut self) -> Result<Value, CompileError> {
        let mut lhs = self.parse_additive()?;
        let mut running: Option<Value> = None;
        loop {
            let op = match self.peek_kind()? {
                TokenKind::Op(OpKind::EqEq) => Opcode::AEqualB,
                TokenKind::Op(OpKind::NotEq) => Opcode::ANotEqualB,
                TokenKind::Op(OpKind::Less) => Opcode::ALessB,
                TokenKind::Op(OpKind::LessEq) => Opcode::ALessOrEqualB,
                TokenKind::Op(OpKind::Greater) => Opcode::AGreaterB,
                TokenKind::Op(OpKind::GreaterEq) => Opcode::AGreaterOrEqualB,
                TokenKind::Op(OpKind::Eq) => {
                    return Err(self.err("'=' is not a comparison operator; did you mean '=='?"));
                }
                _ => break,
            };
            self.next()?;
            let rhs = self.parse_additive()?;
            let cmp = self.emit_binop(op, lhs.clone(), rhs.clone());
            running = Some(match running {
                None => cmp,
                Some(prev) => self.emit_binop(Opcode::ATimesB, prev, cmp),
            });
            lhs = rhs;
        }
        Ok(running.unwrap_or(lhs))
    }

    fn parse_additive(&mut self) -> Result<Value, CompileError> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek_kind()? {
                TokenKind::Op(OpKind::Plus) => Opcode::APlusB,
                TokenKind::Op(OpKind::Minus) => Opcode::AMinusB,
                _ => break,
            };
            self.next()?;
            let rhs = self.parse_multiplicative()?;
            lhs = self.emit_binop(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Value, CompileError> {
        let mut lhs = self.parse_unary_minus()?;
        loop {
            let op = match self.peek_kind()? {
                TokenKind::Op(OpKind::Star) => Opcode::ATimesB,
                TokenKind::Op(OpKind::Slash) => Opcode::ADividedByB,
                TokenKind::Op(OpKind::Percent) => Opcode::AModB,
                _ => break,
            };
            self.next()?;
            let rhs = self.parse_unary_minus()?;
            lhs = self.emit_binop(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_unary_minus(&mut self) -> Result<Value, CompileError> {
        if matches!(self.peek_kind()?, TokenKind::Op(OpKind::Minus)) {
            self.next()?;
            let operand = self.parse_new()?;
            return Ok(self.emit_binop(Opcode::AMinusB, Value::Number(0.0), operand));
        }
        self.parse_new()
    }

    fn parse_new(&mut self) -> Result<Value, CompileError> {
        if self.is_keyword(Keyword::New)? {
            self.next()?;
            let operand = self.parse_power()?;
            return Ok(self.emit_unary(Opcode::New, operand));
        }
        self.parse_power()
    }

    fn parse_power(&mut self) -> Result<Value, CompileError> {
        let base = self.parse_address_of()?;
        if matches!(self.peek_kind()?, TokenKind::Op(OpKind::Caret)) {
            self.next()?;
            let exponent = self.parse_power()?; // right-associative
            return Ok(self.emit_binop(Opcode::APowB, base, exponent));
        }
        Ok(base)
    }

    fn parse_address_of(&mut self) -> Result<Value, CompileError> {
        if matches!(self.peek_kind()?, TokenKind::AddressOf) {
            self.next()?;
            let (mut operand, _) = self.parse_postfix(false)?;
            match &mut operand {
                Value::Var { no_invoke, .. } | Value::SeqElem { no_invoke, .. } => *no_invoke = true,
                _ => {}
            }
            return Ok(operand);
        }
        Ok(self.parse_postfix(false)?.0)
    }

    // ----------------------------------------------------------------
    // postfix (call / dot / index / slice) and primary
    // ----------------------------------------------------------------

    /// Parses a postfix chain. `as_lval` suppresses compiling the *final*
    /// `.ident`/`[idx]` access so it can become an assignment target
    /// (spec §4.2). Returns the resulting operand and whether any postfix
    /// was applied at all.
    fn parse_postfix(&mut self, as_lval: bool) -> Result<(Value, bool), CompileError> {
        let mut base = self.parse_primary()?;
        let mut had_postfix = false;
        loop {
            match self.peek_kind()? {
                TokenKind::Dot => {
                    self.next()?;
                    let name_tok = self.expect(TokenKind::Identifier(String::new()), "identifier after '.'")?;
                    let TokenKind::Identifier(name) = name_tok.kind else { unreachable!() };
                    let is_last = as_lval && !self.continues_postfix()?;
                    if is_last {
                        base = Value::SeqElem {
                            base: Box::new(base),
                            index: Box::new(Value::string(name)),
                            no_invoke: false,
                        };
                    } else {
                        base = self.emit_binop(Opcode::ElemBofA, base, Value::string(name));
                    }
                    had_postfix = true;
                }
                TokenKind::LSquare => {
                    self.next()?;
                    if matches!(self.peek_kind()?, TokenKind::Colon) {
                        self.next()?;
                        let to = if matches!(self.peek_kind()?, TokenKind::RSquare) {
                            Value::Null
                        } else {
                            self.parse_expr()?
                        };
                        self.expect(TokenKind::RSquare, "']'")?;
                        base = self.emit_slice_call(base, Value::Null, to);
                    } else {
                        let idx = self.parse_expr()?;
                        if matches!(self.peek_kind()?, TokenKind::Colon) {
                            self.next()?;
                            let to = if matches!(self.peek_kind()?, TokenKind::RSquare) {
                                Value::Null
                            } else {
                                self.parse_expr()?
                            };
                            self.expect(TokenKind::RSquare, "']'")?;
                            base = self.emit_slice_call(base, idx, to);
                        } else {
                            self.expect(TokenKind::RSquare, "']'")?;
                            let is_last = as_lval && !self.continues_postfix()?;
                            if is_last {
                                base = Value::SeqElem {
                                    base: Box::new(base),
                                    index: Box::new(idx),
                                    no_invoke: false,
                                };
                            } else {
                                base = self.emit_binop(Opcode::ElemBofA, base, idx);
                            }
                        }
                    }
                    had_postfix = true;
                }
                TokenKind::LParen => {
                    self.next()?;
                    let mut args = vec![];
                    self.skip_eols()?;
                    if !matches!(self.peek_kind()?, TokenKind::RParen) {
                        args.push(self.parse_expr()?);
                        self.skip_eols()?;
                        while matches!(self.peek_kind()?, TokenKind::Comma) {
                            self.next()?;
                            self.skip_eols()?;
                            args.push(self.parse_expr()?);
                            self.skip_eols()?;
                        }
                    }
                    self.expect(TokenKind::RParen, "')'")?;
                    for arg in &args {
                        let loc = self.loc();
                        self.cur().emit(Line::new(None, Opcode::PushParam, Some(arg.clone()), None).with_location(loc));
                    }
                    let result_temp = self.cur().next_temp();
                    let loc = self.loc();
                    self.cur().emit(
                        Line::new(
                            Some(Value::Temp(result_temp)),
                            Opcode::CallFunction,
                            Some(base),
                            Some(Value::Number(args.len() as f64)),
                        )
                        .with_location(loc),
                    );
                    base = Value::Temp(result_temp);
                    had_postfix = true;
                }
                _ => break,
            }
        }
        Ok((base, had_postfix))
    }

    fn continues_postfix(&mut self) -> Result<bool, CompileError> {
        Ok(matches!(self.peek_kind()?, TokenKind::Dot | TokenKind::LSquare | TokenKind::LParen))
    }

    fn emit_slice_call(&mut self, seq: Value, from: Value, to: Value) -> Value {
        let name_temp = self.cur().next_temp();
        let loc = self.loc();
        // `slice` is dispatched as an ordinary intrinsic call with three
        // pushed arguments, matching the shape of any other command call.
        self.cur().emit(Line::new(None, Opcode::PushParam, Some(seq), None).with_location(loc));
        self.cur().emit(Line::new(None, Opcode::PushParam, Some(from), None).with_location(loc));
        self.cur().emit(Line::new(None, Opcode::PushParam, Some(to), None).with_location(loc));
        self.cur().emit(
            Line::new(
                Some(Value::Temp(name_temp)),
                Opcode::CallIntrinsic,
                Some(Value::string("slice")),
                Some(Value::Number(3.0)),
            )
            .with_location(loc),
        );
        Value::Temp(name_temp)
    }

    fn parse_primary(&mut self) -> Result<Value, CompileError> {
        match self.peek_kind()? {
            TokenKind::LCurly => self.parse_map_literal(),
            TokenKind::LSquare => self.parse_list_literal(),
            TokenKind::LParen => {
                self.next()?;
                self.skip_eols()?;
                let inner = self.parse_expr()?;
                self.skip_eols()?;
                self.expect(TokenKind::RParen, "')'")?;
                Ok(inner)
            }
            TokenKind::Keyword(Keyword::Function) => self.parse_function_literal(),
            _ => self.parse_atom(),
        }
    }

    fn parse_atom(&mut self) -> Result<Value, CompileError> {
        let tok = self.next()?;
        match tok.kind {
            TokenKind::Number => {
                let n = crate::value::format::parse_number(&tok.text)
                    .ok_or_else(|| self.err(format!("invalid numeric literal '{}'", tok.text)))?;
                Ok(Value::Number(n))
            }
            TokenKind::String(s) => Ok(Value::string(s)),
            TokenKind::Keyword(Keyword::Null) => Ok(Value::Null),
            TokenKind::Keyword(Keyword::True) => Ok(Value::Number(1.0)),
            TokenKind::Keyword(Keyword::False) => Ok(Value::Number(0.0)),
            TokenKind::Identifier(name) => {
                let local_only = if self.cur().local_only_identifier.as_deref() == Some(name.as_str()) {
                    self.cur().local_only_mode
                } else {
                    LocalOnlyMode::Off
                };
                let no_invoke = name == "self" || name == "super";
                Ok(Value::Var {
                    name: name.into(),
                    no_invoke,
                    local_only,
                })
            }
            other => Err(self.err(format!("unexpected token in expression: {other:?} ('{}')", tok.text))),
        }
    }

    fn parse_map_literal(&mut self) -> Result<Value, CompileError> {
        self.expect(TokenKind::LCurly, "'{'")?;
        let mut map = MsMap::new();
        self.skip_eols()?;
        if !matches!(self.peek_kind()?, TokenKind::RCurly) {
            loop {
                self.skip_eols()?;
                let key = self.parse_expr()?;
                self.expect(TokenKind::Colon, "':'")?;
                self.skip_eols()?;
                let value = self.parse_expr()?;
                map.raw_set(key, value);
                self.skip_eols()?;
                if matches!(self.peek_kind()?, TokenKind::Comma) {
                    self.next()?;
                    self.skip_eols()?;
                    if matches!(self.peek_kind()?, TokenKind::RCurly) {
                        break;
                    }
                    continue;
                }
                break;
            }
        }
        self.skip_eols()?;
        self.expect(TokenKind::RCurly, "'}'")?;
        let template = Value::map(map);
        let result_temp = self.cur().next_temp();
        let loc = self.loc();
        self.cur()
            .emit(Line::new(Some(Value::Temp(result_temp)), Opcode::Copy, Some(template), None).with_location(loc));
        Ok(Value::Temp(result_temp))
    }

    fn parse_list_literal(&mut self) -> Result<Value, CompileError> {
        self.expect(TokenKind::LSquare, "'['")?;
        let mut items = vec![];
        self.skip_eols()?;
        if !matches!(self.peek_kind()?, TokenKind::RSquare) {
            loop {
                self.skip_eols()?;
                items.push(self.parse_expr()?);
                self.skip_eols()?;
                if matches!(self.peek_kind()?, TokenKind::Comma) {
                    self.next()?;
                    self.skip_eols()?;
                    if matches!(self.peek_kind()?, TokenKind::RSquare) {
                        break;
                    }
                    continue;
                }
                break;
            }
        }
        self.skip_eols()?;
        self.expect(TokenKind::RSquare, "']'")?;
        let template = Value::list(items);
        let result_temp = self.cur().next_temp();
        let loc = self.loc();
        self.cur()
            .emit(Line::new(Some(Value::Temp(result_temp)), Opcode::Copy, Some(template), None).with_location(loc));
        Ok(Value::Temp(result_temp))
    }

    // ----------------------------------------------------------------
    // function literal
    // ----------------------------------------------------------------

    fn parse_function_literal(&mut self) -> Result<Value, CompileError> {
        self.expect_keyword(Keyword::Function)?;
        self.expect(TokenKind::LParen, "'('")?;
        let mut params = vec![];
        self.skip_eols()?;
        if !matches!(self.peek_kind()?, TokenKind::RParen) {
            loop {
                self.skip_eols()?;
                let name_tok = self.expect(TokenKind::Identifier(String::new()), "parameter name")?;
                let TokenKind::Identifier(name) = name_tok.kind else { unreachable!() };
                let default = if matches!(self.peek_kind()?, TokenKind::Op(OpKind::Eq)) {
                    self.next()?;
                    let value = self.parse_expr()?;
                    Some(self.require_literal_constant(value)?)
                } else {
                    None
                };
                params.push(Param { name, default });
                self.skip_eols()?;
                if matches!(self.peek_kind()?, TokenKind::Comma) {
                    self.next()?;
                    self.skip_eols()?;
                    continue;
                }
                break;
            }
        }
        self.expect(TokenKind::RParen, "')'")?;

        self.states.push(FuncState::new("<anonymous>"));
        self.skip_eols()?;
        self.parse_block_until(|k| matches!(k, TokenKind::Keyword(Keyword::EndFunction) | TokenKind::Eof))?;
        self.expect_keyword(Keyword::EndFunction)?;
        let finished = self.states.pop().unwrap();
        if !finished.backpatches.is_empty() {
            return Err(self.err("unmatched block inside function body"));
        }
        let vfunc = VFunction::new(params, finished.code);

        let result_temp = self.cur().next_temp();
        let loc = self.loc();
        self.cur().emit(
            Line::new(
                Some(Value::Temp(result_temp)),
                Opcode::BindAssign,
                Some(Value::Function(vfunc, None)),
                None,
            )
            .with_location(loc),
        );
        Ok(Value::Temp(result_temp))
    }

    fn require_literal_constant(&self, v: Value) -> Result<Value, CompileError> {
        match v {
            Value::Number(_) | Value::String(_) | Value::Null => Ok(v),
            _ => Err(self.err("default parameter values must be literal constants")),
        }
    }

    // ----------------------------------------------------------------
    // small emission helpers
    // ----------------------------------------------------------------

    fn to_temp(&mut self, v: Value) -> Value {
        if matches!(v, Value::Temp(_)) {
            return v;
        }
        let n = self.cur().next_temp();
        let loc = self.loc();
        self.cur().emit(Line::new(Some(Value::Temp(n)), Opcode::Assign, Some(v), None).with_location(loc));
        Value::Temp(n)
    }

    fn emit_binop(&mut self, op: Opcode, a: Value, b: Value) -> Value {
        let n = self.cur().next_temp();
        let loc = self.loc();
        self.cur()
            .emit(Line::new(Some(Value::Temp(n)), op, Some(a), Some(b)).with_location(loc));
        Value::Temp(n)
    }

    fn emit_unary(&mut self, op: Opcode, a: Value) -> Value {
        let n = self.cur().next_temp();
        let loc = self.loc();
        self.cur().emit(Line::new(Some(Value::Temp(n)), op, Some(a), None).with_location(loc));
        Value::Temp(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// After a successful non-REPL parse, every backpatch stack is closed
    /// and only the global function state remains on the state stack.
    #[test]
    fn backpatch_stacks_close_after_successful_parse() {
        let source = "\
if 1 < 2 then
  for i in range(3,1)
    while i > 0
      print i
      i = i - 1
    end while
  end for
else
  print \"no\"
end if
f = function(x)
  if x then
    return x
  end if
  return 0
end function
print f(1)
";
        let mut parser = Parser::new(source, false);
        parser.parse_program().expect("program should compile");
        assert_eq!(parser.states.len(), 1, "only the global FuncState should remain");
        assert!(parser.states[0].backpatches.is_empty(), "no dangling backpatches");
    }

    #[test]
    fn unmatched_if_block_is_a_compile_error() {
        assert!(Parser::compile("if 1 < 2 then\nprint 1").is_err());
    }

    #[test]
    fn single_line_if_rejects_nested_loop() {
        assert!(Parser::compile("if 1 then while 1\nend while").is_err());
        assert!(Parser::compile("if 1 then for i in [1]\nend for").is_err());
    }

    #[test]
    fn multiline_if_allows_nested_loop() {
        assert!(Parser::compile("if 1 then\n  while 0\n  end while\nend if").is_ok());
    }
}
