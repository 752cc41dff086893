//! Recursive-descent parser for shader source files.
//!
//! The parser accepts a broad slice of the host language on purpose: constructs HLSL
//! cannot express still have to parse so that the legality pass can point at them.

mod expr;
mod stmt;
mod types;

use crate::ast::*;
use crate::error::ParseError;
use crate::lexer::tokenize;
use crate::span::Span;
use crate::token::{Keyword, Punct, Token, TokenKind};

/// Maximum nesting depth for statements/expressions/types. Guards the recursive descent
/// against stack exhaustion on adversarial input.
pub const MAX_NESTING_DEPTH: u32 = 200;

/// Parses a complete source file.
pub fn parse(source: &str) -> Result<CompilationUnit, ParseError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser::new(tokens);
    parser.compilation_unit()
}

/// Parses a single expression; used by tests and tooling.
pub fn parse_expr(source: &str) -> Result<Expr, ParseError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser::new(tokens);
    let expr = parser.expr()?;
    parser.expect_eof()?;
    Ok(expr)
}

/// Parses a single statement; used by tests and tooling.
pub fn parse_stmt(source: &str) -> Result<Stmt, ParseError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser::new(tokens);
    let stmt = parser.stmt()?;
    parser.expect_eof()?;
    Ok(stmt)
}

pub(crate) struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: u32,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    // ---- cursor helpers -------------------------------------------------------------

    fn peek(&self) -> &Token {
        self.peek_n(0)
    }

    fn peek_n(&self, n: usize) -> &Token {
        let idx = (self.pos + n).min(self.tokens.len() - 1);
        &self.tokens[idx]
    }

    fn bump(&mut self) -> Token {
        let token = self.peek().clone();
        if token.kind != TokenKind::Eof {
            self.pos += 1;
        }
        token
    }

    fn prev_span(&self) -> Span {
        if self.pos == 0 {
            self.peek().span
        } else {
            self.tokens[self.pos - 1].span
        }
    }

    fn at_punct(&self, punct: Punct) -> bool {
        self.peek().is_punct(punct)
    }

    fn at_keyword(&self, keyword: Keyword) -> bool {
        self.peek().is_keyword(keyword)
    }

    fn at_ident(&self, text: &str) -> bool {
        self.peek().is_ident(text)
    }

    fn at_eof(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    fn eat_punct(&mut self, punct: Punct) -> bool {
        if self.at_punct(punct) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, keyword: Keyword) -> bool {
        if self.at_keyword(keyword) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn eat_ident(&mut self, text: &str) -> bool {
        if self.at_ident(text) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, punct: Punct) -> Result<Span, ParseError> {
        if self.at_punct(punct) {
            Ok(self.bump().span)
        } else {
            Err(self.unexpected(&format!("`{}`", punct.as_str())))
        }
    }

    fn expect_keyword(&mut self, keyword: Keyword) -> Result<Span, ParseError> {
        if self.at_keyword(keyword) {
            Ok(self.bump().span)
        } else {
            Err(self.unexpected(&format!("`{}`", keyword.as_str())))
        }
    }

    fn expect_ident(&mut self) -> Result<(String, Span), ParseError> {
        match &self.peek().kind {
            TokenKind::Ident(name) => {
                let name = name.clone();
                let span = self.bump().span;
                Ok((name, span))
            }
            _ => Err(self.unexpected("an identifier")),
        }
    }

    fn expect_eof(&mut self) -> Result<(), ParseError> {
        if self.at_eof() {
            Ok(())
        } else {
            Err(self.unexpected("end of input"))
        }
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        let token = self.peek();
        ParseError::new(
            format!("expected {expected}, found {}", token.describe()),
            token.span,
        )
    }

    fn error_here(&self, message: impl Into<String>) -> ParseError {
        ParseError::new(message, self.peek().span)
    }

    /// Two tokens with no whitespace between them (used to rebuild `>>` and `>>=`).
    fn adjacent(&self, n: usize) -> bool {
        self.peek_n(n).span.end == self.peek_n(n + 1).span.start
    }

    /// Runs `f` speculatively: on failure the cursor is restored and `None` returned.
    fn speculate<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T, ParseError>) -> Option<T> {
        let saved_pos = self.pos;
        let saved_depth = self.depth;
        match f(self) {
            Ok(value) => Some(value),
            Err(_) => {
                self.pos = saved_pos;
                self.depth = saved_depth;
                None
            }
        }
    }

    fn enter(&mut self) -> Result<(), ParseError> {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            return Err(self.error_here(format!(
                "nesting depth exceeds maximum of {MAX_NESTING_DEPTH}"
            )));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    // ---- declarations ---------------------------------------------------------------

    fn compilation_unit(&mut self) -> Result<CompilationUnit, ParseError> {
        let mut unit = CompilationUnit::default();
        self.namespace_body(&mut unit, None, false)?;
        Ok(unit)
    }

    fn namespace_body(
        &mut self,
        unit: &mut CompilationUnit,
        namespace: Option<String>,
        braced: bool,
    ) -> Result<(), ParseError> {
        let mut namespace = namespace;
        loop {
            if braced && self.eat_punct(Punct::RBrace) {
                return Ok(());
            }
            if self.at_eof() {
                if braced {
                    return Err(self.unexpected("`}`"));
                }
                return Ok(());
            }

            if self.at_ident("global") && self.peek_n(1).is_keyword(Keyword::Using) {
                self.bump();
            }
            if self.at_keyword(Keyword::Using) {
                let directive = self.using_directive()?;
                unit.usings.push(directive);
                continue;
            }
            if self.eat_keyword(Keyword::Namespace) {
                let name = self.qualified_name()?;
                let full = match &namespace {
                    Some(outer) => format!("{outer}.{name}"),
                    None => name,
                };
                if self.eat_punct(Punct::Semi) {
                    namespace = Some(full);
                } else {
                    self.expect_punct(Punct::LBrace)?;
                    self.namespace_body(unit, Some(full), true)?;
                }
                continue;
            }
            if self.eat_punct(Punct::Semi) {
                continue;
            }

            let start = self.peek().span;
            let attributes = self.attributes()?;
            let modifiers = self.modifiers();
            let decl = self.type_decl(attributes, modifiers, start, namespace.clone())?;
            unit.types.push(decl);
        }
    }

    fn using_directive(&mut self) -> Result<UsingDirective, ParseError> {
        let start = self.expect_keyword(Keyword::Using)?;
        let is_static = self.eat_keyword(Keyword::Static);
        let alias = if matches!(self.peek().kind, TokenKind::Ident(_))
            && self.peek_n(1).is_punct(Punct::Eq)
        {
            let (name, _) = self.expect_ident()?;
            self.bump();
            Some(name)
        } else {
            None
        };
        let target = self.type_ref()?;
        self.expect_punct(Punct::Semi)?;
        Ok(UsingDirective {
            alias,
            is_static,
            target,
            span: start.to(self.prev_span()),
        })
    }

    fn qualified_name(&mut self) -> Result<String, ParseError> {
        let (mut name, _) = self.expect_ident()?;
        while self.eat_punct(Punct::Dot) {
            let (part, _) = self.expect_ident()?;
            name.push('.');
            name.push_str(&part);
        }
        Ok(name)
    }

    fn attributes(&mut self) -> Result<Vec<Attribute>, ParseError> {
        let mut attributes = Vec::new();
        while self.at_punct(Punct::LBracket) {
            self.bump();
            // Attribute targets (`assembly:`, `return:`, `field:`).
            let is_target = matches!(self.peek().kind, TokenKind::Ident(_) | TokenKind::Keyword(_))
                && self.peek_n(1).is_punct(Punct::Colon);
            if is_target {
                self.bump();
                self.bump();
            }
            loop {
                let start = self.peek().span;
                let name = self.qualified_name()?;
                let args = if self.at_punct(Punct::LParen) {
                    self.arguments(Punct::LParen, Punct::RParen)?
                } else {
                    Vec::new()
                };
                let simple = name.rsplit('.').next().unwrap_or(&name);
                let simple = simple.strip_suffix("Attribute").unwrap_or(simple).to_owned();
                attributes.push(Attribute {
                    name: simple,
                    args,
                    span: start.to(self.prev_span()),
                });
                if !self.eat_punct(Punct::Comma) || self.at_punct(Punct::RBracket) {
                    break;
                }
            }
            self.expect_punct(Punct::RBracket)?;
        }
        Ok(attributes)
    }

    /// Consumes modifier keywords. Contextual modifiers (`partial`, `async`, `required`,
    /// `file`) only count when another declaration token follows.
    fn modifiers(&mut self) -> Modifiers {
        let mut modifiers = Modifiers::empty();
        loop {
            let flag = match &self.peek().kind {
                TokenKind::Keyword(k) => match k {
                    Keyword::Public => Modifiers::PUBLIC,
                    Keyword::Private => Modifiers::PRIVATE,
                    Keyword::Protected => Modifiers::PROTECTED,
                    Keyword::Internal => Modifiers::INTERNAL,
                    Keyword::Static => Modifiers::STATIC,
                    Keyword::Readonly => Modifiers::READONLY,
                    Keyword::Const => Modifiers::CONST,
                    Keyword::Unsafe if !self.peek_n(1).is_punct(Punct::LBrace) => {
                        Modifiers::UNSAFE
                    }
                    Keyword::Extern => Modifiers::EXTERN,
                    Keyword::Volatile => Modifiers::VOLATILE,
                    Keyword::New => Modifiers::NEW,
                    Keyword::Override => Modifiers::OVERRIDE,
                    Keyword::Virtual => Modifiers::VIRTUAL,
                    Keyword::Abstract => Modifiers::ABSTRACT,
                    Keyword::Sealed => Modifiers::SEALED,
                    Keyword::Fixed if !self.peek_n(1).is_punct(Punct::LParen) => Modifiers::FIXED,
                    Keyword::Ref
                        if self.peek_n(1).is_keyword(Keyword::Struct)
                            || self.peek_n(1).is_ident("partial") =>
                    {
                        Modifiers::REF
                    }
                    _ => break,
                },
                TokenKind::Ident(name) => {
                    let next = self.peek_n(1);
                    let declaration_follows =
                        matches!(next.kind, TokenKind::Ident(_) | TokenKind::Keyword(_));
                    if !declaration_follows {
                        break;
                    }
                    match name.as_str() {
                        "partial" => Modifiers::PARTIAL,
                        "async" => Modifiers::ASYNC,
                        "required" => Modifiers::REQUIRED,
                        "file" => Modifiers::FILE,
                        _ => break,
                    }
                }
                _ => break,
            };
            modifiers |= flag;
            self.bump();
        }
        modifiers
    }

    fn type_decl(
        &mut self,
        attributes: Vec<Attribute>,
        modifiers: Modifiers,
        start: Span,
        namespace: Option<String>,
    ) -> Result<TypeDecl, ParseError> {
        let kind = if self.eat_keyword(Keyword::Struct) {
            TypeDeclKind::Struct
        } else if self.eat_keyword(Keyword::Class) {
            TypeDeclKind::Class
        } else if self.eat_keyword(Keyword::Interface) {
            TypeDeclKind::Interface
        } else if self.eat_ident("record") {
            if self.eat_keyword(Keyword::Struct) {
                TypeDeclKind::RecordStruct
            } else {
                self.eat_keyword(Keyword::Class);
                TypeDeclKind::Record
            }
        } else if self.at_keyword(Keyword::Enum) || self.at_keyword(Keyword::Delegate) {
            return Err(self.error_here("enum and delegate declarations are not supported"));
        } else {
            return Err(self.unexpected("a type declaration"));
        };

        let (name, _) = self.expect_ident()?;
        let type_params = self.type_params()?;
        if self.at_punct(Punct::LParen) {
            return Err(self.error_here("primary constructors are not supported"));
        }

        let mut bases = Vec::new();
        if self.eat_punct(Punct::Colon) {
            loop {
                bases.push(self.type_ref()?);
                if !self.eat_punct(Punct::Comma) {
                    break;
                }
            }
        }
        self.skip_where_clauses()?;

        self.expect_punct(Punct::LBrace)?;
        let mut members = Vec::new();
        while !self.eat_punct(Punct::RBrace) {
            if self.at_eof() {
                return Err(self.unexpected("`}`"));
            }
            if self.eat_punct(Punct::Semi) {
                continue;
            }
            members.push(self.member(&name, namespace.clone())?);
        }
        self.eat_punct(Punct::Semi);

        Ok(TypeDecl {
            attributes,
            modifiers,
            kind,
            name,
            type_params,
            bases,
            members,
            namespace,
            span: start.to(self.prev_span()),
        })
    }

    fn type_params(&mut self) -> Result<Vec<String>, ParseError> {
        let mut params = Vec::new();
        if self.eat_punct(Punct::Lt) {
            loop {
                self.attributes()?;
                // Variance annotations.
                if !self.eat_keyword(Keyword::In) {
                    self.eat_keyword(Keyword::Out);
                }
                let (name, _) = self.expect_ident()?;
                params.push(name);
                if !self.eat_punct(Punct::Comma) {
                    break;
                }
            }
            self.expect_punct(Punct::Gt)?;
        }
        Ok(params)
    }

    fn skip_where_clauses(&mut self) -> Result<(), ParseError> {
        while self.at_ident("where") {
            while !self.at_punct(Punct::LBrace)
                && !self.at_punct(Punct::Semi)
                && !self.at_punct(Punct::Arrow)
                && !self.at_ident("where")
            {
                if self.at_eof() {
                    return Err(self.unexpected("`{`"));
                }
                self.bump();
                if self.at_ident("where") {
                    break;
                }
            }
        }
        Ok(())
    }

    fn member(&mut self, type_name: &str, namespace: Option<String>) -> Result<Member, ParseError> {
        let start = self.peek().span;
        let attributes = self.attributes()?;
        let modifiers = self.modifiers();

        if self.at_keyword(Keyword::Struct)
            || self.at_keyword(Keyword::Class)
            || self.at_keyword(Keyword::Interface)
            || (self.at_ident("record") && matches!(self.peek_n(1).kind, TokenKind::Ident(_) | TokenKind::Keyword(Keyword::Struct | Keyword::Class)))
        {
            let decl = self.type_decl(attributes, modifiers, start, namespace)?;
            return Ok(Member::Type(decl));
        }
        if self.at_keyword(Keyword::Enum)
            || self.at_keyword(Keyword::Delegate)
            || self.at_keyword(Keyword::Event)
            || self.at_keyword(Keyword::Implicit)
            || self.at_keyword(Keyword::Explicit)
        {
            return Err(self.error_here(format!(
                "{} declarations are not supported",
                self.peek().describe()
            )));
        }
        if self.at_punct(Punct::Tilde) {
            return Err(self.error_here("finalizers are not supported"));
        }

        // Constructor: `Name(`.
        if self.at_ident(type_name) && self.peek_n(1).is_punct(Punct::LParen) {
            self.bump();
            let params = self.params()?;
            if self.eat_punct(Punct::Colon) {
                // `: this(...)` / `: base(...)` initializer.
                self.bump();
                self.arguments(Punct::LParen, Punct::RParen)?;
            }
            let body = self.method_body()?;
            return Ok(Member::Constructor(ConstructorDecl {
                modifiers,
                name: type_name.to_owned(),
                params,
                body,
                span: start.to(self.prev_span()),
            }));
        }

        let ty = self.type_ref()?;

        if self.at_keyword(Keyword::Operator) {
            return Err(self.error_here("operator declarations are not supported"));
        }
        if self.at_keyword(Keyword::This) {
            return Err(self.error_here("indexer declarations are not supported"));
        }

        let (mut name, name_span) = self.expect_ident()?;
        // `IComputeShader.Execute`: every segment before the last names the interface.
        let mut explicit_interface: Option<TypeRef> = None;
        loop {
            let mut args = Vec::new();
            if self.at_punct(Punct::Lt) && self.interface_qualifier_follows() {
                args = self.type_args()?;
            } else if !self.at_punct(Punct::Dot) {
                break;
            }
            self.expect_punct(Punct::Dot)?;
            let full = match explicit_interface.take() {
                Some(TypeRef {
                    kind: TypeRefKind::Named { name: outer, .. },
                    ..
                }) => format!("{outer}.{name}"),
                _ => name.clone(),
            };
            explicit_interface = Some(TypeRef {
                kind: TypeRefKind::Named { name: full, args },
                span: name_span,
            });
            name = self.expect_ident()?.0;
        }

        if self.at_punct(Punct::LParen) || self.at_punct(Punct::Lt) {
            let type_params = self.type_params()?;
            let params = self.params()?;
            self.skip_where_clauses()?;
            let body = self.method_body()?;
            return Ok(Member::Method(MethodDecl {
                attributes,
                modifiers,
                return_type: ty,
                explicit_interface,
                name,
                type_params,
                params,
                body,
                span: start.to(self.prev_span()),
            }));
        }

        if self.at_punct(Punct::LBrace) || self.at_punct(Punct::Arrow) {
            return self
                .property(attributes, modifiers, ty, name, start)
                .map(Member::Property);
        }

        let first_span = self.prev_span();
        let declarators = self.field_declarators(name, first_span)?;
        self.expect_punct(Punct::Semi)?;
        Ok(Member::Field(FieldDecl {
            attributes,
            modifiers,
            ty,
            declarators,
            span: start.to(self.prev_span()),
        }))
    }

    fn interface_qualifier_follows(&mut self) -> bool {
        let saved = self.pos;
        let ok = self.type_args().is_ok() && self.at_punct(Punct::Dot);
        self.pos = saved;
        ok
    }

    fn field_declarators(
        &mut self,
        first: String,
        first_span: Span,
    ) -> Result<Vec<VariableDeclarator>, ParseError> {
        let mut declarators = Vec::new();
        let mut name = first;
        let mut span = first_span;
        loop {
            let fixed_size = if self.eat_punct(Punct::LBracket) {
                let size = self.expr()?;
                self.expect_punct(Punct::RBracket)?;
                Some(size)
            } else {
                None
            };
            let init = if self.eat_punct(Punct::Eq) {
                Some(self.variable_initializer()?)
            } else {
                None
            };
            declarators.push(VariableDeclarator {
                name,
                fixed_size,
                init,
                span: span.to(self.prev_span()),
            });
            if !self.eat_punct(Punct::Comma) {
                return Ok(declarators);
            }
            let (next, next_span) = self.expect_ident()?;
            name = next;
            span = next_span;
        }
    }

    fn property(
        &mut self,
        attributes: Vec<Attribute>,
        modifiers: Modifiers,
        ty: TypeRef,
        name: String,
        start: Span,
    ) -> Result<PropertyDecl, ParseError> {
        let mut accessors = Vec::new();
        let mut expression_body = None;
        let mut init = None;

        if self.eat_punct(Punct::Arrow) {
            expression_body = Some(self.expr()?);
            self.expect_punct(Punct::Semi)?;
        } else {
            self.expect_punct(Punct::LBrace)?;
            while !self.eat_punct(Punct::RBrace) {
                let accessor_start = self.peek().span;
                self.attributes()?;
                self.modifiers();
                let (accessor, _) = self.expect_ident()?;
                let body = if self.eat_punct(Punct::Semi) {
                    None
                } else {
                    self.method_body()?
                };
                accessors.push(Accessor {
                    name: accessor,
                    body,
                    span: accessor_start.to(self.prev_span()),
                });
            }
            if self.eat_punct(Punct::Eq) {
                init = Some(self.variable_initializer()?);
                self.expect_punct(Punct::Semi)?;
            }
        }

        Ok(PropertyDecl {
            attributes,
            modifiers,
            ty,
            name,
            accessors,
            expression_body,
            init,
            span: start.to(self.prev_span()),
        })
    }

    fn params(&mut self) -> Result<Vec<Param>, ParseError> {
        self.expect_punct(Punct::LParen)?;
        let mut params = Vec::new();
        if self.eat_punct(Punct::RParen) {
            return Ok(params);
        }
        loop {
            let start = self.peek().span;
            let attributes = self.attributes()?;
            self.eat_ident("scoped");
            let modifier = if self.eat_keyword(Keyword::Ref) {
                self.eat_keyword(Keyword::Readonly);
                Some(ParamModifier::Ref)
            } else if self.eat_keyword(Keyword::Out) {
                Some(ParamModifier::Out)
            } else if self.eat_keyword(Keyword::In) {
                Some(ParamModifier::In)
            } else if self.eat_keyword(Keyword::This) {
                Some(ParamModifier::This)
            } else if self.eat_keyword(Keyword::Params) {
                Some(ParamModifier::Params)
            } else {
                None
            };
            let ty = self.type_ref()?;
            let (name, _) = self.expect_ident()?;
            let default = if self.eat_punct(Punct::Eq) {
                Some(self.expr()?)
            } else {
                None
            };
            params.push(Param {
                attributes,
                modifier,
                ty,
                name,
                default,
                span: start.to(self.prev_span()),
            });
            if !self.eat_punct(Punct::Comma) {
                break;
            }
        }
        self.expect_punct(Punct::RParen)?;
        Ok(params)
    }

    fn method_body(&mut self) -> Result<Option<MethodBody>, ParseError> {
        if self.eat_punct(Punct::Semi) {
            return Ok(None);
        }
        if self.eat_punct(Punct::Arrow) {
            let expr = self.expr()?;
            self.expect_punct(Punct::Semi)?;
            return Ok(Some(MethodBody::Expr(expr)));
        }
        Ok(Some(MethodBody::Block(self.block()?)))
    }

    /// `= { 1, 2, 3 }` style initializers are allowed wherever a variable is declared.
    fn variable_initializer(&mut self) -> Result<Expr, ParseError> {
        if self.at_punct(Punct::LBrace) {
            let start = self.peek().span;
            let items = self.initializer_list()?;
            return Ok(Expr::new(ExprKind::ArrayInit(items), start.to(self.prev_span())));
        }
        self.expr()
    }

    fn initializer_list(&mut self) -> Result<Vec<Expr>, ParseError> {
        self.expect_punct(Punct::LBrace)?;
        let mut items = Vec::new();
        while !self.eat_punct(Punct::RBrace) {
            items.push(self.variable_initializer()?);
            if !self.eat_punct(Punct::Comma) {
                self.expect_punct(Punct::RBrace)?;
                break;
            }
        }
        Ok(items)
    }
}
