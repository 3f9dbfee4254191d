/// The closed set of MiniScript keywords.
///
/// `end X`/`else if` compounds are represented as a single [`Keyword`]
/// variant produced by the lexer, not re-parsed by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Keyword {
    Break,
    Continue,
    Else,
    ElseIf,
    End,
    EndIf,
    EndWhile,
    EndFor,
    EndFunction,
    For,
    Function,
    If,
    In,
    Isa,
    New,
    Null,
    Then,
    Repeat,
    Return,
    While,
    And,
    Or,
    Not,
    True,
    False,
}

impl Keyword {
    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "break" => Keyword::Break,
            "continue" => Keyword::Continue,
            "else" => Keyword::Else,
            "end" => Keyword::End,
            "for" => Keyword::For,
            "function" => Keyword::Function,
            "if" => Keyword::If,
            "in" => Keyword::In,
            "isa" => Keyword::Isa,
            "new" => Keyword::New,
            "null" => Keyword::Null,
            "then" => Keyword::Then,
            "repeat" => Keyword::Repeat,
            "return" => Keyword::Return,
            "while" => Keyword::While,
            "and" => Keyword::And,
            "or" => Keyword::Or,
            "not" => Keyword::Not,
            "true" => Keyword::True,
            "false" => Keyword::False,
            _ => return None,
        })
    }

    /// Combine a bare `end` with the keyword that follows it, e.g.
    /// `end` + `if` -> `end if`. Returns `None` if `follower` cannot end a
    /// block.
    pub fn combine_end(follower: Keyword) -> Option<Self> {
        Some(match follower {
            Keyword::If => Keyword::EndIf,
            Keyword::While => Keyword::EndWhile,
            Keyword::For => Keyword::EndFor,
            Keyword::Function => Keyword::EndFunction,
            _ => return None,
        })
    }

    pub fn text(&self) -> &'static str {
        match self {
            Keyword::Break => "break",
            Keyword::Continue => "continue",
            Keyword::Else => "else",
            Keyword::ElseIf => "else if",
            Keyword::End => "end",
            Keyword::EndIf => "end if",
            Keyword::EndWhile => "end while",
            Keyword::EndFor => "end for",
            Keyword::EndFunction => "end function",
            Keyword::For => "for",
            Keyword::Function => "function",
            Keyword::If => "if",
            Keyword::In => "in",
            Keyword::Isa => "isa",
            Keyword::New => "new",
            Keyword::Null => "null",
            Keyword::Then => "then",
            Keyword::Repeat => "repeat",
            Keyword::Return => "return",
            Keyword::While => "while",
            Keyword::And => "and",
            Keyword::Or => "or",
            Keyword::Not => "not",
            Keyword::True => "true",
            Keyword::False => "false",
        }
    }
}

/// Operator and punctuation kinds recognized by the lexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
    Eq,
    EqEq,
    NotEq,
    Less,
    LessEq,
    Greater,
    GreaterEq,
    PlusEq,
    MinusEq,
    StarEq,
    SlashEq,
    PercentEq,
    CaretEq,
}

impl OpKind {
    pub fn text(&self) -> &'static str {
        match self {
            OpKind::Plus => "+",
            OpKind::Minus => "-",
            OpKind::Star => "*",
            OpKind::Slash => "/",
            OpKind::Percent => "%",
            OpKind::Caret => "^",
            OpKind::Eq => "=",
            OpKind::EqEq => "==",
            OpKind::NotEq => "!=",
            OpKind::Less => "<",
            OpKind::LessEq => "<=",
            OpKind::Greater => ">",
            OpKind::GreaterEq => ">=",
            OpKind::PlusEq => "+=",
            OpKind::MinusEq => "-=",
            OpKind::StarEq => "*=",
            OpKind::SlashEq => "/=",
            OpKind::PercentEq => "%=",
            OpKind::CaretEq => "^=",
        }
    }
}

/// The kind of a single token, per the lexer's public contract.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Unknown,
    Keyword(Keyword),
    /// Raw numeral text; the parser is responsible for `str::parse::<f64>`.
    Number,
    String(String),
    Identifier(String),
    Op(OpKind),
    LParen,
    RParen,
    LSquare,
    RSquare,
    LCurly,
    RCurly,
    AddressOf,
    Comma,
    Dot,
    Colon,
    Comment,
    Eol,
    Eof,
}
