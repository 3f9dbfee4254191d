//! Three-address code: the VM's intermediate representation.
//!
//! Each [`Line`] has an optional `lhs` and up to two `rhs` operands; an
//! operand is a [`crate::value::Value`], which may be a settled runtime
//! value (for literals folded at compile time) or one of the compile-time
//! expression nodes (`Var`, `Temp`, `SeqElem`) that self-evaluate when the
//! VM reaches that line.

use crate::error::SourceLoc;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Assign,
    AssignImplicit,
    Copy,
    APlusB,
    AMinusB,
    ATimesB,
    ADividedByB,
    AModB,
    APowB,
    AEqualB,
    ANotEqualB,
    ALessB,
    ALessOrEqualB,
    AGreaterB,
    AGreaterOrEqualB,
    AAndB,
    AOrB,
    NotA,
    AIsaB,
    BindAssign,
    New,
    Goto,
    GotoIfB,
    GotoIfTrulyB,
    GotoIfNotB,
    PushParam,
    CallFunction,
    CallIntrinsic,
    Return,
    ElemBofA,
    ElemBofIterA,
    LengthOfA,
}

#[derive(Debug, Clone)]
pub struct Line {
    pub lhs: Option<Value>,
    pub op: Opcode,
    pub rhs_a: Option<Value>,
    pub rhs_b: Option<Value>,
    pub location: Option<SourceLoc>,
}

impl Line {
    pub fn new(lhs: Option<Value>, op: Opcode, rhs_a: Option<Value>, rhs_b: Option<Value>) -> Self {
        Self {
            lhs,
            op,
            rhs_a,
            rhs_b,
            location: None,
        }
    }

    pub fn with_location(mut self, loc: SourceLoc) -> Self {
        self.location = Some(loc);
        self
    }
}
