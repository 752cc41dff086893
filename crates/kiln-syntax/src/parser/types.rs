use super::Parser;
use crate::ast::{TypeRef, TypeRefKind};
use crate::error::ParseError;
use crate::token::{Keyword, Punct, TokenKind};

impl Parser {
    pub(crate) fn type_ref(&mut self) -> Result<TypeRef, ParseError> {
        self.enter()?;
        let result = self.type_ref_inner();
        self.leave();
        result
    }

    fn type_ref_inner(&mut self) -> Result<TypeRef, ParseError> {
        let start = self.peek().span;

        if self.eat_keyword(Keyword::Ref) {
            let readonly = self.eat_keyword(Keyword::Readonly);
            let inner = self.type_ref()?;
            return Ok(TypeRef {
                span: start.to(inner.span),
                kind: TypeRefKind::Ref {
                    readonly,
                    inner: Box::new(inner),
                },
            });
        }

        let mut ty = if self.at_punct(Punct::LParen) {
            self.tuple_type()?
        } else if self.at_keyword(Keyword::Delegate) && self.peek_n(1).is_punct(Punct::Star) {
            self.function_pointer_type()?
        } else if let TokenKind::Keyword(keyword) = self.peek().kind {
            if !keyword.is_predefined_type() {
                return Err(self.unexpected("a type"));
            }
            let span = self.bump().span;
            TypeRef::named(keyword.as_str(), span)
        } else {
            self.named_type()?
        };

        loop {
            if self.at_punct(Punct::Question) && self.nullable_follows() {
                self.bump();
                ty = TypeRef {
                    span: ty.span.to(self.prev_span()),
                    kind: TypeRefKind::Nullable(Box::new(ty)),
                };
            } else if self.at_punct(Punct::Star) {
                self.bump();
                ty = TypeRef {
                    span: ty.span.to(self.prev_span()),
                    kind: TypeRefKind::Pointer(Box::new(ty)),
                };
            } else if self.at_punct(Punct::LBracket)
                && (self.peek_n(1).is_punct(Punct::RBracket)
                    || self.peek_n(1).is_punct(Punct::Comma))
            {
                self.bump();
                let mut rank = 1;
                while self.eat_punct(Punct::Comma) {
                    rank += 1;
                }
                self.expect_punct(Punct::RBracket)?;
                ty = TypeRef {
                    span: ty.span.to(self.prev_span()),
                    kind: TypeRefKind::Array {
                        element: Box::new(ty),
                        rank,
                    },
                };
            } else {
                return Ok(ty);
            }
        }
    }

    /// `T?` is only a nullable type when the `?` cannot start a conditional expression.
    fn nullable_follows(&self) -> bool {
        let next = self.peek_n(1);
        matches!(next.kind, TokenKind::Ident(_))
            || [
                Punct::Gt,
                Punct::Comma,
                Punct::RParen,
                Punct::RBracket,
                Punct::LBracket,
                Punct::Semi,
                Punct::Eq,
            ]
            .iter()
            .any(|p| next.is_punct(*p))
    }

    fn named_type(&mut self) -> Result<TypeRef, ParseError> {
        let (mut name, start) = self.expect_ident()?;
        if self.eat_punct(Punct::ColonColon) {
            // `global::System.Single`
            let (next, _) = self.expect_ident()?;
            name = next;
        }
        let mut args = Vec::new();
        loop {
            if self.at_punct(Punct::Lt) {
                args = self.type_args()?;
            }
            if self.at_punct(Punct::Dot) && matches!(self.peek_n(1).kind, TokenKind::Ident(_)) {
                self.bump();
                let (part, _) = self.expect_ident()?;
                name.push('.');
                name.push_str(&part);
                args.clear();
            } else {
                break;
            }
        }
        Ok(TypeRef {
            kind: TypeRefKind::Named { name, args },
            span: start.to(self.prev_span()),
        })
    }

    pub(crate) fn type_args(&mut self) -> Result<Vec<TypeRef>, ParseError> {
        self.expect_punct(Punct::Lt)?;
        let mut args = Vec::new();
        loop {
            args.push(self.type_ref()?);
            if !self.eat_punct(Punct::Comma) {
                break;
            }
        }
        self.expect_punct(Punct::Gt)?;
        Ok(args)
    }

    fn tuple_type(&mut self) -> Result<TypeRef, ParseError> {
        let start = self.expect_punct(Punct::LParen)?;
        let mut items = Vec::new();
        loop {
            items.push(self.type_ref()?);
            // Element names are irrelevant to analysis.
            if matches!(self.peek().kind, TokenKind::Ident(_)) {
                self.bump();
            }
            if !self.eat_punct(Punct::Comma) {
                break;
            }
        }
        self.expect_punct(Punct::RParen)?;
        if items.len() < 2 {
            return Err(self.error_here("tuple types need at least two elements"));
        }
        Ok(TypeRef {
            kind: TypeRefKind::Tuple(items),
            span: start.to(self.prev_span()),
        })
    }

    fn function_pointer_type(&mut self) -> Result<TypeRef, ParseError> {
        let start = self.expect_keyword(Keyword::Delegate)?;
        self.expect_punct(Punct::Star)?;
        // Calling convention: `managed`, `unmanaged`, `unmanaged[Cdecl]`.
        if self.eat_ident("managed") || self.eat_ident("unmanaged") {
            if self.eat_punct(Punct::LBracket) {
                while !self.eat_punct(Punct::RBracket) {
                    if self.at_eof() {
                        return Err(self.unexpected("`]`"));
                    }
                    self.bump();
                }
            }
        }
        self.expect_punct(Punct::Lt)?;
        let mut params = Vec::new();
        loop {
            if !self.eat_keyword(Keyword::Ref) && !self.eat_keyword(Keyword::Out) {
                self.eat_keyword(Keyword::In);
            }
            params.push(self.type_ref()?);
            if !self.eat_punct(Punct::Comma) {
                break;
            }
        }
        self.expect_punct(Punct::Gt)?;
        Ok(TypeRef {
            kind: TypeRefKind::FunctionPointer { params },
            span: start.to(self.prev_span()),
        })
    }
}
