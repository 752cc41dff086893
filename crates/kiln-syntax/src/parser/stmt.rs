use super::Parser;
use crate::ast::*;
use crate::error::ParseError;
use crate::span::Span;
use crate::token::{Keyword, Punct, TokenKind};

impl Parser {
    pub(crate) fn block(&mut self) -> Result<Block, ParseError> {
        let start = self.expect_punct(Punct::LBrace)?;
        let mut stmts = Vec::new();
        while !self.eat_punct(Punct::RBrace) {
            if self.at_eof() {
                return Err(self.unexpected("`}`"));
            }
            stmts.push(self.stmt()?);
        }
        Ok(Block {
            stmts,
            span: start.to(self.prev_span()),
        })
    }

    pub(crate) fn stmt(&mut self) -> Result<Stmt, ParseError> {
        self.enter()?;
        let start = self.peek().span;
        let result = self
            .stmt_kind()
            .map(|kind| Stmt {
                kind,
                span: start.to(self.prev_span()),
            });
        self.leave();
        result
    }

    fn stmt_kind(&mut self) -> Result<StmtKind, ParseError> {
        if self.at_punct(Punct::LBrace) {
            return Ok(StmtKind::Block(self.block()?));
        }
        if self.eat_punct(Punct::Semi) {
            return Ok(StmtKind::Empty);
        }

        if let TokenKind::Keyword(keyword) = self.peek().kind {
            match keyword {
                Keyword::If => return self.if_stmt(),
                Keyword::While => {
                    self.bump();
                    let cond = self.paren_expr()?;
                    let body = Box::new(self.stmt()?);
                    return Ok(StmtKind::While { cond, body });
                }
                Keyword::Do => {
                    self.bump();
                    let body = Box::new(self.stmt()?);
                    self.expect_keyword(Keyword::While)?;
                    let cond = self.paren_expr()?;
                    self.expect_punct(Punct::Semi)?;
                    return Ok(StmtKind::DoWhile { body, cond });
                }
                Keyword::For => return self.for_stmt(),
                Keyword::Foreach => return self.foreach_stmt(),
                Keyword::Switch => return self.switch_stmt(),
                Keyword::Return => {
                    self.bump();
                    let value = if self.at_punct(Punct::Semi) {
                        None
                    } else {
                        Some(self.expr()?)
                    };
                    self.expect_punct(Punct::Semi)?;
                    return Ok(StmtKind::Return(value));
                }
                Keyword::Break => {
                    self.bump();
                    self.expect_punct(Punct::Semi)?;
                    return Ok(StmtKind::Break);
                }
                Keyword::Continue => {
                    self.bump();
                    self.expect_punct(Punct::Semi)?;
                    return Ok(StmtKind::Continue);
                }
                Keyword::Goto => return Err(self.error_here("goto statements are not supported")),
                Keyword::Lock => {
                    self.bump();
                    let target = self.paren_expr()?;
                    let body = Box::new(self.stmt()?);
                    return Ok(StmtKind::Lock { target, body });
                }
                Keyword::Try => return self.try_stmt(),
                Keyword::Throw => {
                    self.bump();
                    let value = if self.at_punct(Punct::Semi) {
                        None
                    } else {
                        Some(self.expr()?)
                    };
                    self.expect_punct(Punct::Semi)?;
                    return Ok(StmtKind::Throw(value));
                }
                Keyword::Using => return self.using_stmt(),
                Keyword::Checked | Keyword::Unchecked
                    if self.peek_n(1).is_punct(Punct::LBrace) =>
                {
                    self.bump();
                    let body = self.block()?;
                    return Ok(StmtKind::Checked {
                        unchecked: keyword == Keyword::Unchecked,
                        body,
                    });
                }
                Keyword::Unsafe if self.peek_n(1).is_punct(Punct::LBrace) => {
                    self.bump();
                    return Ok(StmtKind::Unsafe(self.block()?));
                }
                Keyword::Fixed if self.peek_n(1).is_punct(Punct::LParen) => {
                    self.bump();
                    self.expect_punct(Punct::LParen)?;
                    let decl = self.local_decl_after_type(None, false, false)?;
                    self.expect_punct(Punct::RParen)?;
                    let body = Box::new(self.stmt()?);
                    return Ok(StmtKind::Fixed { decl, body });
                }
                Keyword::Const => {
                    self.bump();
                    let decl = self.local_decl_after_type(None, true, false)?;
                    self.expect_punct(Punct::Semi)?;
                    return Ok(StmtKind::Local(decl));
                }
                Keyword::Static | Keyword::Unsafe | Keyword::Extern => {
                    return self.local_function().map(StmtKind::LocalFunction);
                }
                _ => {}
            }
        }

        if self.at_ident("yield")
            && (self.peek_n(1).is_keyword(Keyword::Return) || self.peek_n(1).is_keyword(Keyword::Break))
        {
            self.bump();
            let value = if self.eat_keyword(Keyword::Return) {
                Some(self.expr()?)
            } else {
                self.bump();
                None
            };
            self.expect_punct(Punct::Semi)?;
            return Ok(StmtKind::Yield(value));
        }

        if self.at_ident("async")
            && matches!(self.peek_n(1).kind, TokenKind::Ident(_) | TokenKind::Keyword(_))
            && !self.peek_n(2).is_punct(Punct::Eq)
        {
            return self.local_function().map(StmtKind::LocalFunction);
        }

        if let Some(kind) = self.speculate(Self::declaration_stmt) {
            return Ok(kind);
        }

        let expr = self.expr()?;
        self.expect_punct(Punct::Semi)?;
        Ok(StmtKind::Expr(expr))
    }

    /// `T name ...` (local) or `T name(...)` (local function).
    fn declaration_stmt(&mut self) -> Result<StmtKind, ParseError> {
        let start = self.peek().span;
        let ty = self.type_ref()?;
        if ty.simple_name() == Some("await") {
            return Err(self.unexpected("an expression"));
        }
        let TokenKind::Ident(_) = self.peek().kind else {
            return Err(self.unexpected("an identifier"));
        };
        let next = self.peek_n(1);
        if next.is_punct(Punct::LParen) || next.is_punct(Punct::Lt) {
            let function = self.local_function_after_type(Modifiers::empty(), ty, start)?;
            if function.body.is_none() {
                return Err(self.error_here("local functions need a body"));
            }
            return Ok(StmtKind::LocalFunction(function));
        }
        if !(next.is_punct(Punct::Eq)
            || next.is_punct(Punct::Semi)
            || next.is_punct(Punct::Comma))
        {
            return Err(self.unexpected("a declaration"));
        }
        let decl = self.local_decl_after_type(Some((ty, start)), false, false)?;
        self.expect_punct(Punct::Semi)?;
        Ok(StmtKind::Local(decl))
    }

    fn local_function(&mut self) -> Result<MethodDecl, ParseError> {
        let start = self.peek().span;
        let mut modifiers = Modifiers::empty();
        loop {
            let flag = if self.at_keyword(Keyword::Static) {
                Modifiers::STATIC
            } else if self.at_keyword(Keyword::Unsafe) {
                Modifiers::UNSAFE
            } else if self.at_keyword(Keyword::Extern) {
                Modifiers::EXTERN
            } else if self.at_ident("async")
                && matches!(self.peek_n(1).kind, TokenKind::Ident(_) | TokenKind::Keyword(_))
            {
                Modifiers::ASYNC
            } else {
                break;
            };
            modifiers |= flag;
            self.bump();
        }
        let ty = self.type_ref()?;
        self.local_function_after_type(modifiers, ty, start)
    }

    fn local_function_after_type(
        &mut self,
        modifiers: Modifiers,
        return_type: TypeRef,
        start: Span,
    ) -> Result<MethodDecl, ParseError> {
        let (name, _) = self.expect_ident()?;
        let type_params = self.type_params()?;
        let params = self.params()?;
        self.skip_where_clauses()?;
        let body = self.method_body()?;
        Ok(MethodDecl {
            attributes: Vec::new(),
            modifiers,
            return_type,
            explicit_interface: None,
            name,
            type_params,
            params,
            body,
            span: start.to(self.prev_span()),
        })
    }

    /// Parses declarators after an optional already-parsed type.
    fn local_decl_after_type(
        &mut self,
        ty: Option<(TypeRef, Span)>,
        is_const: bool,
        is_using: bool,
    ) -> Result<LocalDecl, ParseError> {
        let (ty, start) = match ty {
            Some(parsed) => parsed,
            None => {
                let start = self.peek().span;
                (self.type_ref()?, start)
            }
        };
        let mut declarators = Vec::new();
        loop {
            let (name, name_span) = self.expect_ident()?;
            let init = if self.eat_punct(Punct::Eq) {
                Some(self.local_initializer()?)
            } else {
                None
            };
            declarators.push(VariableDeclarator {
                name,
                fixed_size: None,
                init,
                span: name_span.to(self.prev_span()),
            });
            if !self.eat_punct(Punct::Comma) {
                break;
            }
        }
        Ok(LocalDecl {
            ty,
            declarators,
            is_const,
            is_using,
            span: start.to(self.prev_span()),
        })
    }

    fn local_initializer(&mut self) -> Result<Expr, ParseError> {
        if self.at_keyword(Keyword::Ref) {
            let start = self.bump().span;
            let inner = self.expr()?;
            return Ok(Expr::new(
                ExprKind::Ref(Box::new(inner)),
                start.to(self.prev_span()),
            ));
        }
        self.variable_initializer()
    }

    pub(crate) fn paren_expr(&mut self) -> Result<Expr, ParseError> {
        self.expect_punct(Punct::LParen)?;
        let expr = self.expr()?;
        self.expect_punct(Punct::RParen)?;
        Ok(expr)
    }

    fn if_stmt(&mut self) -> Result<StmtKind, ParseError> {
        self.expect_keyword(Keyword::If)?;
        let cond = self.paren_expr()?;
        let then_branch = Box::new(self.stmt()?);
        let else_branch = if self.eat_keyword(Keyword::Else) {
            Some(Box::new(self.stmt()?))
        } else {
            None
        };
        Ok(StmtKind::If {
            cond,
            then_branch,
            else_branch,
        })
    }

    fn for_stmt(&mut self) -> Result<StmtKind, ParseError> {
        self.expect_keyword(Keyword::For)?;
        self.expect_punct(Punct::LParen)?;

        let init = if self.at_punct(Punct::Semi) {
            None
        } else if let Some(decl) = self.speculate(|p| {
            let start = p.peek().span;
            let ty = p.type_ref()?;
            if !matches!(p.peek().kind, TokenKind::Ident(_)) {
                return Err(p.unexpected("an identifier"));
            }
            p.local_decl_after_type(Some((ty, start)), false, false)
        }) {
            Some(ForInit::Decl(decl))
        } else {
            Some(ForInit::Exprs(self.expr_list(Punct::Semi)?))
        };
        self.expect_punct(Punct::Semi)?;

        let cond = if self.at_punct(Punct::Semi) {
            None
        } else {
            Some(self.expr()?)
        };
        self.expect_punct(Punct::Semi)?;

        let step = if self.at_punct(Punct::RParen) {
            Vec::new()
        } else {
            self.expr_list(Punct::RParen)?
        };
        self.expect_punct(Punct::RParen)?;
        let body = Box::new(self.stmt()?);
        Ok(StmtKind::For {
            init,
            cond,
            step,
            body,
        })
    }

    fn expr_list(&mut self, terminator: Punct) -> Result<Vec<Expr>, ParseError> {
        let mut exprs = vec![self.expr()?];
        while !self.at_punct(terminator) && self.eat_punct(Punct::Comma) {
            exprs.push(self.expr()?);
        }
        Ok(exprs)
    }

    fn foreach_stmt(&mut self) -> Result<StmtKind, ParseError> {
        self.expect_keyword(Keyword::Foreach)?;
        self.expect_punct(Punct::LParen)?;
        let ty = self.type_ref()?;
        let (name, _) = self.expect_ident()?;
        self.expect_keyword(Keyword::In)?;
        let iter = self.expr()?;
        self.expect_punct(Punct::RParen)?;
        let body = Box::new(self.stmt()?);
        Ok(StmtKind::ForEach {
            ty,
            name,
            iter,
            body,
        })
    }

    fn switch_stmt(&mut self) -> Result<StmtKind, ParseError> {
        self.expect_keyword(Keyword::Switch)?;
        let scrutinee = self.paren_expr()?;
        self.expect_punct(Punct::LBrace)?;
        let mut sections = Vec::new();
        while !self.eat_punct(Punct::RBrace) {
            let start = self.peek().span;
            let mut labels = Vec::new();
            loop {
                if self.eat_keyword(Keyword::Case) {
                    let pattern = self.pattern()?;
                    let guard = if self.eat_ident("when") {
                        Some(self.expr()?)
                    } else {
                        None
                    };
                    self.expect_punct(Punct::Colon)?;
                    labels.push(SwitchLabel::Case { pattern, guard });
                } else if self.at_keyword(Keyword::Default) && self.peek_n(1).is_punct(Punct::Colon) {
                    self.bump();
                    self.bump();
                    labels.push(SwitchLabel::Default);
                } else {
                    break;
                }
            }
            if labels.is_empty() {
                return Err(self.unexpected("`case` or `default`"));
            }
            let mut stmts = Vec::new();
            while !self.at_keyword(Keyword::Case)
                && !(self.at_keyword(Keyword::Default) && self.peek_n(1).is_punct(Punct::Colon))
                && !self.at_punct(Punct::RBrace)
            {
                if self.at_eof() {
                    return Err(self.unexpected("`}`"));
                }
                stmts.push(self.stmt()?);
            }
            sections.push(SwitchSection {
                labels,
                stmts,
                span: start.to(self.prev_span()),
            });
        }
        Ok(StmtKind::Switch {
            scrutinee,
            sections,
        })
    }

    fn try_stmt(&mut self) -> Result<StmtKind, ParseError> {
        self.expect_keyword(Keyword::Try)?;
        let body = self.block()?;
        let mut catches = Vec::new();
        while self.eat_keyword(Keyword::Catch) {
            let (ty, name) = if self.eat_punct(Punct::LParen) {
                let ty = self.type_ref()?;
                let name = if let TokenKind::Ident(_) = self.peek().kind {
                    Some(self.expect_ident()?.0)
                } else {
                    None
                };
                self.expect_punct(Punct::RParen)?;
                (Some(ty), name)
            } else {
                (None, None)
            };
            let filter = if self.eat_ident("when") {
                Some(self.paren_expr()?)
            } else {
                None
            };
            let body = self.block()?;
            catches.push(CatchClause {
                ty,
                name,
                filter,
                body,
            });
        }
        let finally = if self.eat_keyword(Keyword::Finally) {
            Some(self.block()?)
        } else {
            None
        };
        if catches.is_empty() && finally.is_none() {
            return Err(self.unexpected("`catch` or `finally`"));
        }
        Ok(StmtKind::Try {
            body,
            catches,
            finally,
        })
    }

    fn using_stmt(&mut self) -> Result<StmtKind, ParseError> {
        self.expect_keyword(Keyword::Using)?;
        if self.eat_punct(Punct::LParen) {
            let decl = self.speculate(|p| {
                let start = p.peek().span;
                let ty = p.type_ref()?;
                if !(matches!(p.peek().kind, TokenKind::Ident(_)) && p.peek_n(1).is_punct(Punct::Eq)) {
                    return Err(p.unexpected("a declaration"));
                }
                p.local_decl_after_type(Some((ty, start)), false, true)
            });
            let expr = match decl {
                Some(_) => None,
                None => Some(self.expr()?),
            };
            self.expect_punct(Punct::RParen)?;
            let body = Box::new(self.stmt()?);
            return Ok(StmtKind::Using { decl, expr, body });
        }
        let decl = self.local_decl_after_type(None, false, true)?;
        self.expect_punct(Punct::Semi)?;
        Ok(StmtKind::Local(decl))
    }
}
