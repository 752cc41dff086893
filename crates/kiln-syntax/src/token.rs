use crate::span::Span;

macro_rules! keywords {
    ($($variant:ident => $text:literal,)*) => {
        /// Reserved keywords. Contextual keywords (`var`, `await`, `from`, `yield`...) lex as
        /// identifiers and are recognised by the parser from their position.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Keyword {
            $($variant,)*
        }

        impl Keyword {
            pub fn from_ident(text: &str) -> Option<Self> {
                match text {
                    $($text => Some(Keyword::$variant),)*
                    _ => None,
                }
            }

            pub fn as_str(self) -> &'static str {
                match self {
                    $(Keyword::$variant => $text,)*
                }
            }
        }
    };
}

keywords! {
    Abstract => "abstract",
    As => "as",
    Base => "base",
    Bool => "bool",
    Break => "break",
    Byte => "byte",
    Case => "case",
    Catch => "catch",
    Char => "char",
    Checked => "checked",
    Class => "class",
    Const => "const",
    Continue => "continue",
    Decimal => "decimal",
    Default => "default",
    Delegate => "delegate",
    Do => "do",
    Double => "double",
    Else => "else",
    Enum => "enum",
    Event => "event",
    Explicit => "explicit",
    Extern => "extern",
    False => "false",
    Finally => "finally",
    Fixed => "fixed",
    Float => "float",
    For => "for",
    Foreach => "foreach",
    Goto => "goto",
    If => "if",
    Implicit => "implicit",
    In => "in",
    Int => "int",
    Interface => "interface",
    Internal => "internal",
    Is => "is",
    Lock => "lock",
    Long => "long",
    Namespace => "namespace",
    New => "new",
    Null => "null",
    Object => "object",
    Operator => "operator",
    Out => "out",
    Override => "override",
    Params => "params",
    Private => "private",
    Protected => "protected",
    Public => "public",
    Readonly => "readonly",
    Ref => "ref",
    Return => "return",
    Sbyte => "sbyte",
    Sealed => "sealed",
    Short => "short",
    Sizeof => "sizeof",
    Stackalloc => "stackalloc",
    Static => "static",
    String => "string",
    Struct => "struct",
    Switch => "switch",
    This => "this",
    Throw => "throw",
    True => "true",
    Try => "try",
    Typeof => "typeof",
    Uint => "uint",
    Ulong => "ulong",
    Unchecked => "unchecked",
    Unsafe => "unsafe",
    Ushort => "ushort",
    Using => "using",
    Virtual => "virtual",
    Void => "void",
    Volatile => "volatile",
    While => "while",
}

impl Keyword {
    /// Keywords naming a predefined type (`int`, `float`, `string`...).
    pub fn is_predefined_type(self) -> bool {
        matches!(
            self,
            Keyword::Bool
                | Keyword::Byte
                | Keyword::Char
                | Keyword::Decimal
                | Keyword::Double
                | Keyword::Float
                | Keyword::Int
                | Keyword::Long
                | Keyword::Object
                | Keyword::Sbyte
                | Keyword::Short
                | Keyword::String
                | Keyword::Uint
                | Keyword::Ulong
                | Keyword::Ushort
                | Keyword::Void
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Punct {
    LBrace,
    RBrace,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Semi,
    Comma,
    Dot,
    DotDot,
    Colon,
    ColonColon,
    Question,
    QuestionQuestion,
    QuestionQuestionEq,
    QuestionDot,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Amp,
    AmpAmp,
    Pipe,
    PipePipe,
    Caret,
    Bang,
    Tilde,
    Eq,
    EqEq,
    BangEq,
    Lt,
    LtEq,
    /// Always lexed alone; `>>` and `>>=` are recombined by the parser so nested generic
    /// argument lists close correctly.
    Gt,
    GtEq,
    Shl,
    PlusEq,
    MinusEq,
    StarEq,
    SlashEq,
    PercentEq,
    AmpEq,
    PipeEq,
    CaretEq,
    ShlEq,
    PlusPlus,
    MinusMinus,
    Arrow,
    At,
}

impl Punct {
    pub fn as_str(self) -> &'static str {
        match self {
            Punct::LBrace => "{",
            Punct::RBrace => "}",
            Punct::LParen => "(",
            Punct::RParen => ")",
            Punct::LBracket => "[",
            Punct::RBracket => "]",
            Punct::Semi => ";",
            Punct::Comma => ",",
            Punct::Dot => ".",
            Punct::DotDot => "..",
            Punct::Colon => ":",
            Punct::ColonColon => "::",
            Punct::Question => "?",
            Punct::QuestionQuestion => "??",
            Punct::QuestionQuestionEq => "??=",
            Punct::QuestionDot => "?.",
            Punct::Plus => "+",
            Punct::Minus => "-",
            Punct::Star => "*",
            Punct::Slash => "/",
            Punct::Percent => "%",
            Punct::Amp => "&",
            Punct::AmpAmp => "&&",
            Punct::Pipe => "|",
            Punct::PipePipe => "||",
            Punct::Caret => "^",
            Punct::Bang => "!",
            Punct::Tilde => "~",
            Punct::Eq => "=",
            Punct::EqEq => "==",
            Punct::BangEq => "!=",
            Punct::Lt => "<",
            Punct::LtEq => "<=",
            Punct::Gt => ">",
            Punct::GtEq => ">=",
            Punct::Shl => "<<",
            Punct::PlusEq => "+=",
            Punct::MinusEq => "-=",
            Punct::StarEq => "*=",
            Punct::SlashEq => "/=",
            Punct::PercentEq => "%=",
            Punct::AmpEq => "&=",
            Punct::PipeEq => "|=",
            Punct::CaretEq => "^=",
            Punct::ShlEq => "<<=",
            Punct::PlusPlus => "++",
            Punct::MinusMinus => "--",
            Punct::Arrow => "=>",
            Punct::At => "@",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Ident(String),
    Keyword(Keyword),
    /// Integer literal text, including any prefix and suffix (`0xFFu`).
    Int(String),
    /// Real literal text, including any suffix (`1.5f`).
    Real(String),
    Char(char),
    Str(String),
    Punct(Punct),
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn is_punct(&self, punct: Punct) -> bool {
        matches!(self.kind, TokenKind::Punct(p) if p == punct)
    }

    pub fn is_keyword(&self, keyword: Keyword) -> bool {
        matches!(self.kind, TokenKind::Keyword(k) if k == keyword)
    }

    /// True for an identifier with the given text (used for contextual keywords).
    pub fn is_ident(&self, text: &str) -> bool {
        matches!(&self.kind, TokenKind::Ident(name) if name == text)
    }

    pub fn describe(&self) -> String {
        match &self.kind {
            TokenKind::Ident(name) => format!("identifier `{name}`"),
            TokenKind::Keyword(k) => format!("keyword `{}`", k.as_str()),
            TokenKind::Int(text) | TokenKind::Real(text) => format!("literal `{text}`"),
            TokenKind::Char(c) => format!("character literal {c:?}"),
            TokenKind::Str(_) => "string literal".to_owned(),
            TokenKind::Punct(p) => format!("`{}`", p.as_str()),
            TokenKind::Eof => "end of input".to_owned(),
        }
    }
}
