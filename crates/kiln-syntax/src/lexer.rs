use crate::error::ParseError;
use crate::span::Span;
use crate::token::{Keyword, Punct, Token, TokenKind};

/// Upper bound on accepted source size; shader sources are small and this bounds token
/// allocation for hostile inputs.
pub const MAX_SOURCE_BYTES: usize = 4 * 1024 * 1024;

/// Tokenizes `source`, always ending the stream with a [`TokenKind::Eof`] token.
pub fn tokenize(source: &str) -> Result<Vec<Token>, ParseError> {
    if source.len() > MAX_SOURCE_BYTES {
        return Err(ParseError::new(
            format!(
                "source length {} exceeds maximum {} bytes",
                source.len(),
                MAX_SOURCE_BYTES
            ),
            Span::new(0, 0, 1, 1),
        ));
    }

    let mut lexer = Lexer {
        src: source,
        pos: 0,
        line: 1,
        column: 1,
        at_line_start: true,
    };
    let mut tokens = Vec::new();
    loop {
        let token = lexer.next_token()?;
        let eof = token.kind == TokenKind::Eof;
        tokens.push(token);
        if eof {
            return Ok(tokens);
        }
    }
}

struct Lexer<'a> {
    src: &'a str,
    pos: usize,
    line: u32,
    column: u32,
    at_line_start: bool,
}

impl Lexer<'_> {
    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn peek_at(&self, n: usize) -> Option<char> {
        self.src[self.pos..].chars().nth(n)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.column = 1;
            self.at_line_start = true;
        } else {
            self.column += 1;
            if !c.is_whitespace() {
                self.at_line_start = false;
            }
        }
        Some(c)
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn here(&self) -> Span {
        Span::new(self.pos as u32, self.pos as u32, self.line, self.column)
    }

    fn error(&self, message: impl Into<String>, start: Span) -> ParseError {
        ParseError::new(message, start.to(self.here()))
    }

    fn skip_trivia(&mut self) -> Result<(), ParseError> {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('#') if self.at_line_start => {
                    // Preprocessor directives (`#pragma`, `#nullable`, `#region`) carry no
                    // shader semantics.
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                Some('/') if self.peek_at(1) == Some('/') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                Some('/') if self.peek_at(1) == Some('*') => {
                    let start = self.here();
                    self.bump();
                    self.bump();
                    loop {
                        match self.bump() {
                            Some('*') if self.peek() == Some('/') => {
                                self.bump();
                                break;
                            }
                            Some(_) => {}
                            None => return Err(self.error("unterminated block comment", start)),
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn next_token(&mut self) -> Result<Token, ParseError> {
        self.skip_trivia()?;
        let start = self.here();
        let Some(c) = self.peek() else {
            return Ok(Token {
                kind: TokenKind::Eof,
                span: start,
            });
        };

        let kind = if c == '@' && self.peek_at(1) == Some('"') {
            self.bump();
            TokenKind::Str(self.verbatim_string(start)?)
        } else if (c == '$' || c == '@')
            && matches!(self.peek_at(1), Some('$') | Some('@'))
            && self.peek_at(2) == Some('"')
        {
            self.bump();
            self.bump();
            TokenKind::Str(self.verbatim_string(start)?)
        } else if c == '$' && self.peek_at(1) == Some('"') {
            self.bump();
            TokenKind::Str(self.regular_string(start)?)
        } else if c == '@' && self.peek_at(1).is_some_and(is_ident_start) {
            // `@name` escapes a keyword; the identifier keeps its bare text.
            self.bump();
            TokenKind::Ident(self.ident_text())
        } else if is_ident_start(c) {
            let text = self.ident_text();
            match Keyword::from_ident(&text) {
                Some(keyword) => TokenKind::Keyword(keyword),
                None => TokenKind::Ident(text),
            }
        } else if c.is_ascii_digit() || (c == '.' && self.peek_at(1).is_some_and(|d| d.is_ascii_digit())) {
            self.number()
        } else if c == '"' {
            TokenKind::Str(self.regular_string(start)?)
        } else if c == '\'' {
            TokenKind::Char(self.char_literal(start)?)
        } else {
            TokenKind::Punct(self.punct(start)?)
        };

        Ok(Token {
            kind,
            span: start.to(self.here()),
        })
    }

    fn ident_text(&mut self) -> String {
        let begin = self.pos;
        while self.peek().is_some_and(is_ident_continue) {
            self.bump();
        }
        self.src[begin..self.pos].to_owned()
    }

    fn number(&mut self) -> TokenKind {
        let begin = self.pos;
        let mut real = false;

        if self.peek() == Some('0') && matches!(self.peek_at(1), Some('x' | 'X' | 'b' | 'B')) {
            self.bump();
            self.bump();
            while self.peek().is_some_and(|c| c.is_ascii_hexdigit() || c == '_') {
                self.bump();
            }
        } else {
            self.digits();
            if self.peek() == Some('.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
                real = true;
                self.bump();
                self.digits();
            }
            if matches!(self.peek(), Some('e' | 'E')) {
                let sign = matches!(self.peek_at(1), Some('+' | '-'));
                let digit_at = if sign { 2 } else { 1 };
                if self.peek_at(digit_at).is_some_and(|c| c.is_ascii_digit()) {
                    real = true;
                    self.bump();
                    if sign {
                        self.bump();
                    }
                    self.digits();
                }
            }
        }

        match self.peek() {
            Some('f' | 'F' | 'd' | 'D' | 'm' | 'M') if !self.src[begin..].starts_with("0x") => {
                real = true;
                self.bump();
            }
            Some('u' | 'U') => {
                self.bump();
                if matches!(self.peek(), Some('l' | 'L')) {
                    self.bump();
                }
            }
            Some('l' | 'L') => {
                self.bump();
                if matches!(self.peek(), Some('u' | 'U')) {
                    self.bump();
                }
            }
            _ => {}
        }

        let text = self.src[begin..self.pos].to_owned();
        if real {
            TokenKind::Real(text)
        } else {
            TokenKind::Int(text)
        }
    }

    fn digits(&mut self) {
        while self.peek().is_some_and(|c| c.is_ascii_digit() || c == '_') {
            self.bump();
        }
    }

    fn escape(&mut self, start: Span) -> Result<char, ParseError> {
        let Some(c) = self.bump() else {
            return Err(self.error("unterminated escape sequence", start));
        };
        Ok(match c {
            'n' => '\n',
            'r' => '\r',
            't' => '\t',
            '0' => '\0',
            'a' => '\u{7}',
            'b' => '\u{8}',
            'f' => '\u{c}',
            'v' => '\u{b}',
            'u' => {
                let mut value = 0u32;
                for _ in 0..4 {
                    let digit = self
                        .bump()
                        .and_then(|d| d.to_digit(16))
                        .ok_or_else(|| self.error("invalid unicode escape", start))?;
                    value = value * 16 + digit;
                }
                char::from_u32(value).ok_or_else(|| self.error("invalid unicode escape", start))?
            }
            other => other,
        })
    }

    fn regular_string(&mut self, start: Span) -> Result<String, ParseError> {
        self.bump();
        let mut out = String::new();
        loop {
            match self.bump() {
                Some('"') => return Ok(out),
                Some('\\') => out.push(self.escape(start)?),
                Some('\n') | None => return Err(self.error("unterminated string literal", start)),
                Some(c) => out.push(c),
            }
        }
    }

    fn verbatim_string(&mut self, start: Span) -> Result<String, ParseError> {
        self.bump();
        let mut out = String::new();
        loop {
            match self.bump() {
                Some('"') if self.peek() == Some('"') => {
                    self.bump();
                    out.push('"');
                }
                Some('"') => return Ok(out),
                Some(c) => out.push(c),
                None => return Err(self.error("unterminated verbatim string literal", start)),
            }
        }
    }

    fn char_literal(&mut self, start: Span) -> Result<char, ParseError> {
        self.bump();
        let value = match self.bump() {
            Some('\\') => self.escape(start)?,
            Some('\'') | Some('\n') | None => {
                return Err(self.error("empty or unterminated character literal", start))
            }
            Some(c) => c,
        };
        if !self.eat('\'') {
            return Err(self.error("unterminated character literal", start));
        }
        Ok(value)
    }

    fn punct(&mut self, start: Span) -> Result<Punct, ParseError> {
        let Some(c) = self.bump() else {
            return Err(self.error("unexpected end of input", start));
        };
        let punct = match c {
            '{' => Punct::LBrace,
            '}' => Punct::RBrace,
            '(' => Punct::LParen,
            ')' => Punct::RParen,
            '[' => Punct::LBracket,
            ']' => Punct::RBracket,
            ';' => Punct::Semi,
            ',' => Punct::Comma,
            '~' => Punct::Tilde,
            '@' => Punct::At,
            '.' => {
                if self.eat('.') {
                    Punct::DotDot
                } else {
                    Punct::Dot
                }
            }
            ':' => {
                if self.eat(':') {
                    Punct::ColonColon
                } else {
                    Punct::Colon
                }
            }
            '?' => {
                if self.eat('?') {
                    if self.eat('=') {
                        Punct::QuestionQuestionEq
                    } else {
                        Punct::QuestionQuestion
                    }
                } else if self.peek() == Some('.') && !self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
                    self.bump();
                    Punct::QuestionDot
                } else {
                    Punct::Question
                }
            }
            '+' => {
                if self.eat('+') {
                    Punct::PlusPlus
                } else if self.eat('=') {
                    Punct::PlusEq
                } else {
                    Punct::Plus
                }
            }
            '-' => {
                if self.eat('-') {
                    Punct::MinusMinus
                } else if self.eat('=') {
                    Punct::MinusEq
                } else {
                    Punct::Minus
                }
            }
            '*' => self.with_eq(Punct::Star, Punct::StarEq),
            '/' => self.with_eq(Punct::Slash, Punct::SlashEq),
            '%' => self.with_eq(Punct::Percent, Punct::PercentEq),
            '^' => self.with_eq(Punct::Caret, Punct::CaretEq),
            '!' => self.with_eq(Punct::Bang, Punct::BangEq),
            '&' => {
                if self.eat('&') {
                    Punct::AmpAmp
                } else {
                    self.with_eq(Punct::Amp, Punct::AmpEq)
                }
            }
            '|' => {
                if self.eat('|') {
                    Punct::PipePipe
                } else {
                    self.with_eq(Punct::Pipe, Punct::PipeEq)
                }
            }
            '=' => {
                if self.eat('=') {
                    Punct::EqEq
                } else if self.eat('>') {
                    Punct::Arrow
                } else {
                    Punct::Eq
                }
            }
            '<' => {
                if self.eat('<') {
                    self.with_eq(Punct::Shl, Punct::ShlEq)
                } else {
                    self.with_eq(Punct::Lt, Punct::LtEq)
                }
            }
            '>' => self.with_eq(Punct::Gt, Punct::GtEq),
            other => return Err(self.error(format!("unexpected character {other:?}"), start)),
        };
        Ok(punct)
    }

    fn with_eq(&mut self, plain: Punct, with_eq: Punct) -> Punct {
        if self.eat('=') {
            with_eq
        } else {
            plain
        }
    }
}

fn is_ident_start(c: char) -> bool {
    c == '_' || c.is_alphabetic()
}

fn is_ident_continue(c: char) -> bool {
    c == '_' || c.is_alphanumeric()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        tokenize(src)
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn numbers_keep_suffixes() {
        assert_eq!(
            kinds("1 2u 3.5f 4.0 1e3 0xFFu 7L"),
            vec![
                TokenKind::Int("1".into()),
                TokenKind::Int("2u".into()),
                TokenKind::Real("3.5f".into()),
                TokenKind::Real("4.0".into()),
                TokenKind::Real("1e3".into()),
                TokenKind::Int("0xFFu".into()),
                TokenKind::Int("7L".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn closing_generics_lex_as_separate_angles() {
        assert_eq!(
            kinds("a >> b"),
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::Punct(Punct::Gt),
                TokenKind::Punct(Punct::Gt),
                TokenKind::Ident("b".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn member_access_on_integer_is_not_a_real() {
        assert_eq!(
            kinds("1.X"),
            vec![
                TokenKind::Int("1".into()),
                TokenKind::Punct(Punct::Dot),
                TokenKind::Ident("X".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn skips_comments_and_directives() {
        let tokens = tokenize("#nullable enable\n// line\n/* block\n */ x").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Ident("x".into()));
        assert_eq!(tokens[0].span.line, 4);
        assert_eq!(tokens[0].span.column, 5);
    }

    #[test]
    fn strings_and_escaped_identifiers() {
        assert_eq!(
            kinds(r#"@"a""b" "c\n" @float"#),
            vec![
                TokenKind::Str("a\"b".into()),
                TokenKind::Str("c\n".into()),
                TokenKind::Ident("float".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn unterminated_string_is_an_error() {
        let err = tokenize("\"abc").unwrap_err();
        assert!(err.message.contains("unterminated"), "{err}");
    }
}
