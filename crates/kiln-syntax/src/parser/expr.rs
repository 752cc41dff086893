use super::Parser;
use crate::ast::*;
use crate::error::ParseError;
use crate::span::Span;
use crate::token::{Keyword, Punct, TokenKind};

// Binary precedence levels, loosest first. `??`, `?:` and assignment are handled above
// the table; range sits between unary and multiplicative.
const PREC_OR: u8 = 1;
const PREC_AND: u8 = 2;
const PREC_BIT_OR: u8 = 3;
const PREC_BIT_XOR: u8 = 4;
const PREC_BIT_AND: u8 = 5;
const PREC_EQUALITY: u8 = 6;
const PREC_RELATIONAL: u8 = 7;
const PREC_SHIFT: u8 = 8;
const PREC_ADDITIVE: u8 = 9;
const PREC_MULTIPLICATIVE: u8 = 10;

const QUERY_CLAUSES: &[&str] = &[
    "from", "where", "select", "let", "orderby", "join", "group", "into",
];

enum BinaryToken {
    Op(BinaryOp, usize),
    Is,
    As,
}

impl Parser {
    pub(crate) fn expr(&mut self) -> Result<Expr, ParseError> {
        self.enter()?;
        let result = self.assignment();
        self.leave();
        result
    }

    fn assignment(&mut self) -> Result<Expr, ParseError> {
        let start = self.peek().span;

        if self.at_keyword(Keyword::Throw) {
            self.bump();
            let inner = self.expr()?;
            return Ok(Expr::new(
                ExprKind::Throw(Box::new(inner)),
                start.to(self.prev_span()),
            ));
        }
        if self.query_follows() {
            return self.query();
        }
        if matches!(self.peek().kind, TokenKind::Ident(_)) && self.peek_n(1).is_punct(Punct::Arrow) {
            return Err(self.error_here("lambda expressions are not supported"));
        }

        let target = self.conditional()?;

        let op = match self.peek().kind {
            TokenKind::Punct(Punct::Eq) => Some((AssignOp::Assign, 1)),
            TokenKind::Punct(Punct::PlusEq) => Some((AssignOp::Add, 1)),
            TokenKind::Punct(Punct::MinusEq) => Some((AssignOp::Sub, 1)),
            TokenKind::Punct(Punct::StarEq) => Some((AssignOp::Mul, 1)),
            TokenKind::Punct(Punct::SlashEq) => Some((AssignOp::Div, 1)),
            TokenKind::Punct(Punct::PercentEq) => Some((AssignOp::Rem, 1)),
            TokenKind::Punct(Punct::AmpEq) => Some((AssignOp::BitAnd, 1)),
            TokenKind::Punct(Punct::PipeEq) => Some((AssignOp::BitOr, 1)),
            TokenKind::Punct(Punct::CaretEq) => Some((AssignOp::BitXor, 1)),
            TokenKind::Punct(Punct::ShlEq) => Some((AssignOp::Shl, 1)),
            TokenKind::Punct(Punct::QuestionQuestionEq) => Some((AssignOp::Coalesce, 1)),
            TokenKind::Punct(Punct::Gt)
                if self.peek_n(1).is_punct(Punct::GtEq) && self.adjacent(0) =>
            {
                Some((AssignOp::Shr, 2))
            }
            _ => None,
        };
        let Some((op, tokens)) = op else {
            if self.at_punct(Punct::Arrow) {
                return Err(self.error_here("lambda expressions are not supported"));
            }
            return Ok(target);
        };
        for _ in 0..tokens {
            self.bump();
        }
        let value = if op == AssignOp::Assign && self.at_keyword(Keyword::Ref) {
            let ref_start = self.bump().span;
            let inner = self.expr()?;
            Expr::new(ExprKind::Ref(Box::new(inner)), ref_start.to(self.prev_span()))
        } else {
            self.expr()?
        };
        Ok(Expr::new(
            ExprKind::Assign {
                op,
                target: Box::new(target),
                value: Box::new(value),
            },
            start.to(self.prev_span()),
        ))
    }

    fn conditional(&mut self) -> Result<Expr, ParseError> {
        let start = self.peek().span;
        let cond = self.coalesce()?;
        if !self.eat_punct(Punct::Question) {
            return Ok(cond);
        }
        let then_expr = self.expr()?;
        self.expect_punct(Punct::Colon)?;
        let else_expr = self.expr()?;
        Ok(Expr::new(
            ExprKind::Conditional {
                cond: Box::new(cond),
                then_expr: Box::new(then_expr),
                else_expr: Box::new(else_expr),
            },
            start.to(self.prev_span()),
        ))
    }

    fn coalesce(&mut self) -> Result<Expr, ParseError> {
        let start = self.peek().span;
        let lhs = self.binary(PREC_OR)?;
        if !self.eat_punct(Punct::QuestionQuestion) {
            return Ok(lhs);
        }
        let rhs = if self.at_keyword(Keyword::Throw) {
            self.assignment()?
        } else {
            self.coalesce()?
        };
        Ok(Expr::new(
            ExprKind::Binary {
                op: BinaryOp::Coalesce,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            start.to(self.prev_span()),
        ))
    }

    fn binary_token(&self) -> Option<(BinaryToken, u8)> {
        let token = self.peek();
        let op = match &token.kind {
            TokenKind::Keyword(Keyword::Is) => return Some((BinaryToken::Is, PREC_RELATIONAL)),
            TokenKind::Keyword(Keyword::As) => return Some((BinaryToken::As, PREC_RELATIONAL)),
            TokenKind::Punct(p) => *p,
            _ => return None,
        };
        let (op, tokens, prec) = match op {
            Punct::PipePipe => (BinaryOp::Or, 1, PREC_OR),
            Punct::AmpAmp => (BinaryOp::And, 1, PREC_AND),
            Punct::Pipe => (BinaryOp::BitOr, 1, PREC_BIT_OR),
            Punct::Caret => (BinaryOp::BitXor, 1, PREC_BIT_XOR),
            Punct::Amp => (BinaryOp::BitAnd, 1, PREC_BIT_AND),
            Punct::EqEq => (BinaryOp::Eq, 1, PREC_EQUALITY),
            Punct::BangEq => (BinaryOp::Ne, 1, PREC_EQUALITY),
            Punct::Lt => (BinaryOp::Lt, 1, PREC_RELATIONAL),
            Punct::LtEq => (BinaryOp::Le, 1, PREC_RELATIONAL),
            Punct::GtEq => (BinaryOp::Ge, 1, PREC_RELATIONAL),
            Punct::Gt => {
                if self.adjacent(0) && self.peek_n(1).is_punct(Punct::Gt) {
                    (BinaryOp::Shr, 2, PREC_SHIFT)
                } else if self.adjacent(0) && self.peek_n(1).is_punct(Punct::GtEq) {
                    // `>>=` belongs to the assignment level.
                    return None;
                } else {
                    (BinaryOp::Gt, 1, PREC_RELATIONAL)
                }
            }
            Punct::Shl => (BinaryOp::Shl, 1, PREC_SHIFT),
            Punct::Plus => (BinaryOp::Add, 1, PREC_ADDITIVE),
            Punct::Minus => (BinaryOp::Sub, 1, PREC_ADDITIVE),
            Punct::Star => (BinaryOp::Mul, 1, PREC_MULTIPLICATIVE),
            Punct::Slash => (BinaryOp::Div, 1, PREC_MULTIPLICATIVE),
            Punct::Percent => (BinaryOp::Rem, 1, PREC_MULTIPLICATIVE),
            _ => return None,
        };
        Some((BinaryToken::Op(op, tokens), prec))
    }

    pub(crate) fn binary(&mut self, min_prec: u8) -> Result<Expr, ParseError> {
        let start = self.peek().span;
        let mut lhs = self.range()?;
        while let Some((token, prec)) = self.binary_token() {
            if prec < min_prec {
                break;
            }
            match token {
                BinaryToken::Is => {
                    self.bump();
                    let pattern = self.pattern()?;
                    lhs = Expr::new(
                        ExprKind::Is {
                            expr: Box::new(lhs),
                            pattern: Box::new(pattern),
                        },
                        start.to(self.prev_span()),
                    );
                }
                BinaryToken::As => {
                    self.bump();
                    let ty = self.type_ref()?;
                    lhs = Expr::new(
                        ExprKind::As {
                            expr: Box::new(lhs),
                            ty,
                        },
                        start.to(self.prev_span()),
                    );
                }
                BinaryToken::Op(op, tokens) => {
                    for _ in 0..tokens {
                        self.bump();
                    }
                    self.enter()?;
                    let rhs = self.binary(prec + 1);
                    self.leave();
                    let rhs = rhs?;
                    lhs = Expr::new(
                        ExprKind::Binary {
                            op,
                            lhs: Box::new(lhs),
                            rhs: Box::new(rhs),
                        },
                        start.to(self.prev_span()),
                    );
                }
            }
        }
        Ok(lhs)
    }

    fn range(&mut self) -> Result<Expr, ParseError> {
        let start = self.peek().span;
        let lhs = if self.at_punct(Punct::DotDot) {
            None
        } else {
            Some(self.unary()?)
        };
        if !self.eat_punct(Punct::DotDot) {
            return lhs.ok_or_else(|| self.unexpected("an expression"));
        }
        let rhs = if self.range_end_follows() {
            Some(Box::new(self.unary()?))
        } else {
            None
        };
        Ok(Expr::new(
            ExprKind::Range {
                start: lhs.map(Box::new),
                end: rhs,
            },
            start.to(self.prev_span()),
        ))
    }

    fn range_end_follows(&self) -> bool {
        let token = self.peek();
        match &token.kind {
            TokenKind::Punct(p) => matches!(
                p,
                Punct::LParen
                    | Punct::Minus
                    | Punct::Plus
                    | Punct::Bang
                    | Punct::Tilde
                    | Punct::Caret
                    | Punct::PlusPlus
                    | Punct::MinusMinus
            ),
            TokenKind::Eof => false,
            _ => true,
        }
    }

    fn unary(&mut self) -> Result<Expr, ParseError> {
        self.enter()?;
        let result = self.unary_inner();
        self.leave();
        result
    }

    fn unary_inner(&mut self) -> Result<Expr, ParseError> {
        let start = self.peek().span;
        let op = match self.peek().kind {
            TokenKind::Punct(Punct::Minus) => Some(UnaryOp::Neg),
            TokenKind::Punct(Punct::Plus) => Some(UnaryOp::Plus),
            TokenKind::Punct(Punct::Bang) => Some(UnaryOp::Not),
            TokenKind::Punct(Punct::Tilde) => Some(UnaryOp::BitNot),
            TokenKind::Punct(Punct::PlusPlus) => Some(UnaryOp::PreInc),
            TokenKind::Punct(Punct::MinusMinus) => Some(UnaryOp::PreDec),
            TokenKind::Punct(Punct::Amp) => Some(UnaryOp::AddressOf),
            TokenKind::Punct(Punct::Star) => Some(UnaryOp::Deref),
            TokenKind::Punct(Punct::Caret) => Some(UnaryOp::IndexFromEnd),
            _ => None,
        };
        if let Some(op) = op {
            self.bump();
            let operand = self.unary()?;
            return Ok(Expr::new(
                ExprKind::Unary {
                    op,
                    operand: Box::new(operand),
                },
                start.to(self.prev_span()),
            ));
        }

        if self.at_ident("await") && self.expression_start_at(1) {
            self.bump();
            let operand = self.unary()?;
            return Ok(Expr::new(
                ExprKind::Await(Box::new(operand)),
                start.to(self.prev_span()),
            ));
        }

        if self.at_punct(Punct::LParen) {
            if let Some(cast) = self.speculate(Self::cast) {
                return Ok(cast);
            }
        }

        let primary = self.primary()?;
        self.postfix(primary)
    }

    fn cast(&mut self) -> Result<Expr, ParseError> {
        let start = self.expect_punct(Punct::LParen)?;
        let predefined = matches!(self.peek().kind, TokenKind::Keyword(k) if k.is_predefined_type());
        let ty = self.type_ref()?;
        self.expect_punct(Punct::RParen)?;

        let next = self.peek();
        let operand_follows = match &next.kind {
            TokenKind::Ident(_)
            | TokenKind::Int(_)
            | TokenKind::Real(_)
            | TokenKind::Char(_)
            | TokenKind::Str(_) => true,
            TokenKind::Keyword(k) => matches!(
                k,
                Keyword::This
                    | Keyword::New
                    | Keyword::Default
                    | Keyword::True
                    | Keyword::False
                    | Keyword::Null
                    | Keyword::Typeof
                    | Keyword::Sizeof
                    | Keyword::Checked
                    | Keyword::Unchecked
                    | Keyword::Base
            ) || k.is_predefined_type(),
            TokenKind::Punct(p) => {
                matches!(p, Punct::LParen | Punct::Bang | Punct::Tilde)
                    || (predefined
                        && matches!(
                            p,
                            Punct::Minus | Punct::Plus | Punct::PlusPlus | Punct::MinusMinus
                        ))
            }
            TokenKind::Eof => false,
        };
        if !operand_follows {
            return Err(self.unexpected("a cast operand"));
        }
        let expr = self.unary()?;
        Ok(Expr::new(
            ExprKind::Cast {
                ty,
                expr: Box::new(expr),
            },
            start.to(self.prev_span()),
        ))
    }

    fn expression_start_at(&self, n: usize) -> bool {
        let token = self.peek_n(n);
        match &token.kind {
            TokenKind::Ident(_)
            | TokenKind::Int(_)
            | TokenKind::Real(_)
            | TokenKind::Char(_)
            | TokenKind::Str(_) => true,
            TokenKind::Keyword(k) => !matches!(k, Keyword::Is | Keyword::As | Keyword::In),
            TokenKind::Punct(p) => matches!(
                p,
                Punct::LParen | Punct::Bang | Punct::Tilde | Punct::Minus | Punct::Plus
            ),
            TokenKind::Eof => false,
        }
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        let token = self.peek().clone();
        let start = token.span;
        let kind = match &token.kind {
            TokenKind::Int(text) => {
                self.bump();
                ExprKind::Literal(int_literal(text, start)?)
            }
            TokenKind::Real(text) => {
                self.bump();
                ExprKind::Literal(real_literal(text))
            }
            TokenKind::Char(c) => {
                self.bump();
                ExprKind::Literal(Literal::Char(*c))
            }
            TokenKind::Str(s) => {
                self.bump();
                ExprKind::Literal(Literal::Str(s.clone()))
            }
            TokenKind::Ident(name) => {
                self.bump();
                if self.at_punct(Punct::Lt) {
                    if let Some(type_args) = self.speculate(Self::generic_call_args) {
                        let callee = Expr::ident(name.clone(), start);
                        return self.finish_generic_call(callee, type_args, start);
                    }
                }
                ExprKind::Ident(name.clone())
            }
            TokenKind::Keyword(keyword) => return self.keyword_primary(*keyword, start),
            TokenKind::Punct(Punct::LParen) => return self.paren_or_tuple(),
            TokenKind::Punct(Punct::LBrace) => {
                let items = self.initializer_list()?;
                ExprKind::ArrayInit(items)
            }
            _ => return Err(self.unexpected("an expression")),
        };
        Ok(Expr::new(kind, start.to(self.prev_span())))
    }

    /// Type arguments in expression position are only accepted when a call or member access
    /// follows, which disambiguates them from `<` comparisons.
    fn generic_call_args(&mut self) -> Result<Vec<TypeRef>, ParseError> {
        let args = self.type_args()?;
        if self.at_punct(Punct::LParen) || self.at_punct(Punct::Dot) {
            Ok(args)
        } else {
            Err(self.unexpected("`(` after type arguments"))
        }
    }

    fn finish_generic_call(
        &mut self,
        callee: Expr,
        type_args: Vec<TypeRef>,
        start: Span,
    ) -> Result<Expr, ParseError> {
        if self.at_punct(Punct::Dot) {
            // `Foo<int>.Bar`: keep the generic owner as a plain identifier.
            return self.postfix(callee);
        }
        let args = self.arguments(Punct::LParen, Punct::RParen)?;
        let call = Expr::new(
            ExprKind::Call {
                callee: Box::new(callee),
                type_args,
                args,
            },
            start.to(self.prev_span()),
        );
        self.postfix(call)
    }

    fn keyword_primary(&mut self, keyword: Keyword, start: Span) -> Result<Expr, ParseError> {
        let kind = match keyword {
            Keyword::True | Keyword::False => {
                self.bump();
                ExprKind::Literal(Literal::Bool(keyword == Keyword::True))
            }
            Keyword::Null => {
                self.bump();
                ExprKind::Literal(Literal::Null)
            }
            Keyword::This => {
                self.bump();
                ExprKind::This
            }
            Keyword::Base => return Err(self.error_here("`base` access is not supported")),
            Keyword::New => return self.new_expr(),
            Keyword::Default => {
                self.bump();
                if self.eat_punct(Punct::LParen) {
                    let ty = self.type_ref()?;
                    self.expect_punct(Punct::RParen)?;
                    ExprKind::Default(Some(ty))
                } else {
                    ExprKind::Default(None)
                }
            }
            Keyword::Sizeof | Keyword::Typeof => {
                self.bump();
                self.expect_punct(Punct::LParen)?;
                let ty = self.type_ref()?;
                self.expect_punct(Punct::RParen)?;
                if keyword == Keyword::Sizeof {
                    ExprKind::SizeOf(ty)
                } else {
                    ExprKind::TypeOf(ty)
                }
            }
            Keyword::Checked | Keyword::Unchecked => {
                self.bump();
                let expr = self.paren_expr()?;
                ExprKind::Checked {
                    unchecked: keyword == Keyword::Unchecked,
                    expr: Box::new(expr),
                }
            }
            Keyword::Stackalloc => {
                self.bump();
                let ty = self.named_or_predefined_element()?;
                let size = if self.eat_punct(Punct::LBracket) {
                    let size = if self.at_punct(Punct::RBracket) {
                        None
                    } else {
                        Some(Box::new(self.expr()?))
                    };
                    self.expect_punct(Punct::RBracket)?;
                    size
                } else {
                    None
                };
                let initializer = if self.at_punct(Punct::LBrace) {
                    Some(self.initializer_list()?)
                } else {
                    None
                };
                ExprKind::StackAlloc {
                    ty,
                    size,
                    initializer,
                }
            }
            Keyword::Ref => {
                self.bump();
                let inner = self.unary()?;
                ExprKind::Ref(Box::new(inner))
            }
            Keyword::Delegate => {
                return Err(self.error_here("anonymous methods are not supported"));
            }
            k if k.is_predefined_type() => {
                self.bump();
                ExprKind::PredefinedType(k.as_str().to_owned())
            }
            _ => return Err(self.unexpected("an expression")),
        };
        Ok(Expr::new(kind, start.to(self.prev_span())))
    }

    /// Element type of `stackalloc`/`new T[...]`: a type without array rank suffixes.
    fn named_or_predefined_element(&mut self) -> Result<TypeRef, ParseError> {
        let start = self.peek().span;
        if let TokenKind::Keyword(k) = self.peek().kind {
            if k.is_predefined_type() {
                self.bump();
                let mut ty = TypeRef::named(k.as_str(), start);
                while self.at_punct(Punct::Star) {
                    self.bump();
                    ty = TypeRef {
                        span: start.to(self.prev_span()),
                        kind: TypeRefKind::Pointer(Box::new(ty)),
                    };
                }
                return Ok(ty);
            }
        }
        let (mut name, _) = self.expect_ident()?;
        while self.at_punct(Punct::Dot) {
            self.bump();
            let (part, _) = self.expect_ident()?;
            name.push('.');
            name.push_str(&part);
        }
        let args = if self.at_punct(Punct::Lt) {
            self.type_args()?
        } else {
            Vec::new()
        };
        Ok(TypeRef {
            kind: TypeRefKind::Named { name, args },
            span: start.to(self.prev_span()),
        })
    }

    fn new_expr(&mut self) -> Result<Expr, ParseError> {
        let start = self.expect_keyword(Keyword::New)?;

        if self.at_punct(Punct::LBrace) {
            self.bump();
            let mut members = Vec::new();
            while !self.eat_punct(Punct::RBrace) {
                let name = if matches!(self.peek().kind, TokenKind::Ident(_))
                    && self.peek_n(1).is_punct(Punct::Eq)
                {
                    let (name, _) = self.expect_ident()?;
                    self.bump();
                    Some(name)
                } else {
                    None
                };
                members.push((name, self.expr()?));
                if !self.eat_punct(Punct::Comma) {
                    self.expect_punct(Punct::RBrace)?;
                    break;
                }
            }
            return Ok(Expr::new(
                ExprKind::AnonymousNew(members),
                start.to(self.prev_span()),
            ));
        }

        if self.at_punct(Punct::LParen) {
            let args = self.arguments(Punct::LParen, Punct::RParen)?;
            let initializer = if self.at_punct(Punct::LBrace) {
                Some(self.initializer_list()?)
            } else {
                None
            };
            return Ok(Expr::new(
                ExprKind::New {
                    ty: None,
                    args,
                    initializer,
                },
                start.to(self.prev_span()),
            ));
        }

        if self.at_punct(Punct::LBracket) {
            // `new[] { 1, 2 }`
            self.bump();
            self.expect_punct(Punct::RBracket)?;
            let initializer = self.initializer_list()?;
            let span = start.to(self.prev_span());
            return Ok(Expr::new(
                ExprKind::NewArray {
                    element: TypeRef::named("var", span),
                    sizes: Vec::new(),
                    initializer: Some(initializer),
                },
                span,
            ));
        }

        let element = self.named_or_predefined_element()?;
        let element = self.nullable_suffix(element);

        if self.at_punct(Punct::LBracket) {
            self.bump();
            let mut sizes = Vec::new();
            while !self.eat_punct(Punct::RBracket) {
                if !self.at_punct(Punct::Comma) {
                    sizes.push(self.expr()?);
                }
                if !self.eat_punct(Punct::Comma) {
                    self.expect_punct(Punct::RBracket)?;
                    break;
                }
            }
            // Jagged suffixes (`new float[4][]`) only add rank.
            let mut element = element;
            while self.at_punct(Punct::LBracket) && self.peek_n(1).is_punct(Punct::RBracket) {
                self.bump();
                self.bump();
                element = TypeRef {
                    span: element.span.to(self.prev_span()),
                    kind: TypeRefKind::Array {
                        element: Box::new(element),
                        rank: 1,
                    },
                };
            }
            let initializer = if self.at_punct(Punct::LBrace) {
                Some(self.initializer_list()?)
            } else {
                None
            };
            return Ok(Expr::new(
                ExprKind::NewArray {
                    element,
                    sizes,
                    initializer,
                },
                start.to(self.prev_span()),
            ));
        }

        let args = if self.at_punct(Punct::LParen) {
            self.arguments(Punct::LParen, Punct::RParen)?
        } else {
            Vec::new()
        };
        let initializer = if self.at_punct(Punct::LBrace) {
            Some(self.initializer_list()?)
        } else {
            None
        };
        if args.is_empty() && initializer.is_none() && !self.prev_is_close_paren() {
            return Err(self.unexpected("`(` or an initializer"));
        }
        Ok(Expr::new(
            ExprKind::New {
                ty: Some(element),
                args,
                initializer,
            },
            start.to(self.prev_span()),
        ))
    }

    fn nullable_suffix(&mut self, ty: TypeRef) -> TypeRef {
        if self.at_punct(Punct::Question)
            && (self.peek_n(1).is_punct(Punct::LParen) || self.peek_n(1).is_punct(Punct::LBracket))
        {
            self.bump();
            return TypeRef {
                span: ty.span.to(self.prev_span()),
                kind: TypeRefKind::Nullable(Box::new(ty)),
            };
        }
        ty
    }

    fn prev_is_close_paren(&self) -> bool {
        self.pos > 0 && self.tokens[self.pos - 1].is_punct(Punct::RParen)
    }

    fn paren_or_tuple(&mut self) -> Result<Expr, ParseError> {
        let start = self.expect_punct(Punct::LParen)?;
        let first = self.argument()?;
        if self.eat_punct(Punct::RParen) {
            if self.at_punct(Punct::Arrow) {
                return Err(self.error_here("lambda expressions are not supported"));
            }
            if first.name.is_some() || first.modifier.is_some() {
                return Err(self.unexpected("`,`"));
            }
            return Ok(Expr::new(
                ExprKind::Paren(Box::new(first.expr)),
                start.to(self.prev_span()),
            ));
        }
        let mut items = vec![first];
        while self.eat_punct(Punct::Comma) {
            items.push(self.argument()?);
        }
        self.expect_punct(Punct::RParen)?;
        if self.at_punct(Punct::Arrow) {
            return Err(self.error_here("lambda expressions are not supported"));
        }
        Ok(Expr::new(ExprKind::Tuple(items), start.to(self.prev_span())))
    }

    fn postfix(&mut self, mut expr: Expr) -> Result<Expr, ParseError> {
        let start = expr.span;
        loop {
            let token = self.peek();
            if token.is_punct(Punct::Dot) || token.is_punct(Punct::QuestionDot) {
                let conditional = token.is_punct(Punct::QuestionDot);
                self.bump();
                let (name, _) = self.expect_ident()?;
                let member = Expr::new(
                    ExprKind::Member {
                        target: Box::new(expr),
                        name,
                        conditional,
                    },
                    start.to(self.prev_span()),
                );
                if self.at_punct(Punct::Lt) {
                    if let Some(type_args) = self.speculate(Self::generic_call_args) {
                        expr = self.finish_generic_call(member, type_args, start)?;
                        continue;
                    }
                }
                expr = member;
            } else if token.is_punct(Punct::LParen) {
                let args = self.arguments(Punct::LParen, Punct::RParen)?;
                expr = Expr::new(
                    ExprKind::Call {
                        callee: Box::new(expr),
                        type_args: Vec::new(),
                        args,
                    },
                    start.to(self.prev_span()),
                );
            } else if token.is_punct(Punct::LBracket) {
                let args = self.arguments(Punct::LBracket, Punct::RBracket)?;
                expr = Expr::new(
                    ExprKind::Index {
                        target: Box::new(expr),
                        args,
                    },
                    start.to(self.prev_span()),
                );
            } else if token.is_punct(Punct::PlusPlus) || token.is_punct(Punct::MinusMinus) {
                let op = if token.is_punct(Punct::PlusPlus) {
                    PostfixOp::Inc
                } else {
                    PostfixOp::Dec
                };
                self.bump();
                expr = Expr::new(
                    ExprKind::Postfix {
                        op,
                        operand: Box::new(expr),
                    },
                    start.to(self.prev_span()),
                );
            } else if token.is_punct(Punct::Bang) && self.null_forgiving_follows() {
                self.bump();
                expr = Expr::new(
                    ExprKind::Postfix {
                        op: PostfixOp::NullForgiving,
                        operand: Box::new(expr),
                    },
                    start.to(self.prev_span()),
                );
            } else if token.is_keyword(Keyword::Switch) {
                return Err(self.error_here("switch expressions are not supported"));
            } else {
                return Ok(expr);
            }
        }
    }

    fn null_forgiving_follows(&self) -> bool {
        let next = self.peek_n(1);
        [
            Punct::Dot,
            Punct::RParen,
            Punct::Semi,
            Punct::Comma,
            Punct::LBracket,
            Punct::RBracket,
        ]
        .iter()
        .any(|p| next.is_punct(*p))
    }

    pub(crate) fn arguments(&mut self, open: Punct, close: Punct) -> Result<Vec<Argument>, ParseError> {
        self.expect_punct(open)?;
        let mut args = Vec::new();
        if self.eat_punct(close) {
            return Ok(args);
        }
        loop {
            args.push(self.argument()?);
            if !self.eat_punct(Punct::Comma) {
                break;
            }
        }
        self.expect_punct(close)?;
        Ok(args)
    }

    fn argument(&mut self) -> Result<Argument, ParseError> {
        let name = if matches!(self.peek().kind, TokenKind::Ident(_))
            && self.peek_n(1).is_punct(Punct::Colon)
        {
            let (name, _) = self.expect_ident()?;
            self.bump();
            Some(name)
        } else {
            None
        };
        let modifier = if self.at_keyword(Keyword::Ref) {
            self.bump();
            Some(ParamModifier::Ref)
        } else if self.eat_keyword(Keyword::Out) {
            Some(ParamModifier::Out)
        } else if self.eat_keyword(Keyword::In) {
            Some(ParamModifier::In)
        } else {
            None
        };
        if modifier == Some(ParamModifier::Out)
            && (self.at_ident("var")
                || matches!(self.peek().kind, TokenKind::Keyword(k) if k.is_predefined_type())
                || (matches!(self.peek().kind, TokenKind::Ident(_))
                    && matches!(self.peek_n(1).kind, TokenKind::Ident(_))))
        {
            return Err(self.error_here("out variable declarations are not supported"));
        }
        let expr = self.expr()?;
        Ok(Argument {
            name,
            modifier,
            expr,
        })
    }

    // ---- patterns -------------------------------------------------------------------

    pub(crate) fn pattern(&mut self) -> Result<Pattern, ParseError> {
        self.enter()?;
        let result = self.or_pattern();
        self.leave();
        result
    }

    fn or_pattern(&mut self) -> Result<Pattern, ParseError> {
        let mut lhs = self.and_pattern()?;
        while self.eat_ident("or") {
            let rhs = self.and_pattern()?;
            lhs = Pattern::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn and_pattern(&mut self) -> Result<Pattern, ParseError> {
        let mut lhs = self.not_pattern()?;
        while self.eat_ident("and") {
            let rhs = self.not_pattern()?;
            lhs = Pattern::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn not_pattern(&mut self) -> Result<Pattern, ParseError> {
        if self.eat_ident("not") {
            let inner = self.not_pattern()?;
            return Ok(Pattern::Not(Box::new(inner)));
        }
        self.primary_pattern()
    }

    fn primary_pattern(&mut self) -> Result<Pattern, ParseError> {
        let start = self.peek().span;

        let relational = match self.peek().kind {
            TokenKind::Punct(Punct::Lt) => Some(BinaryOp::Lt),
            TokenKind::Punct(Punct::LtEq) => Some(BinaryOp::Le),
            TokenKind::Punct(Punct::Gt) => Some(BinaryOp::Gt),
            TokenKind::Punct(Punct::GtEq) => Some(BinaryOp::Ge),
            _ => None,
        };
        if let Some(op) = relational {
            self.bump();
            let value = self.binary(PREC_SHIFT)?;
            return Ok(Pattern::Relational {
                op,
                span: start.to(self.prev_span()),
                value,
            });
        }

        if self.at_punct(Punct::LBrace) {
            let properties = self.property_subpatterns()?;
            let designation = self.designation();
            return Ok(Pattern::Recursive {
                ty: None,
                positional: None,
                properties: Some(properties),
                designation,
                span: start.to(self.prev_span()),
            });
        }

        if self.at_punct(Punct::LParen) {
            if let Some(pattern) = self.speculate(Self::parenthesized_pattern) {
                return Ok(pattern);
            }
        }

        if self.at_ident("_") && !self.peek_n(1).is_punct(Punct::Dot) {
            let span = self.bump().span;
            return Ok(Pattern::Discard(span));
        }

        if self.at_ident("var") && matches!(self.peek_n(1).kind, TokenKind::Ident(_)) {
            self.bump();
            let (name, _) = self.expect_ident()?;
            return Ok(Pattern::Var {
                name,
                span: start.to(self.prev_span()),
            });
        }

        if let Some(pattern) = self.speculate(Self::type_led_pattern) {
            return Ok(pattern);
        }

        let value = self.binary(PREC_SHIFT)?;
        Ok(Pattern::Constant(value))
    }

    fn parenthesized_pattern(&mut self) -> Result<Pattern, ParseError> {
        let start = self.peek().span;
        let mut items = self.positional_subpatterns()?;
        if items.len() == 1 && items[0].name.is_none() && !self.at_punct(Punct::LBrace) {
            if let Some(item) = items.pop() {
                return Ok(item.pattern);
            }
        }
        let properties = if self.at_punct(Punct::LBrace) {
            Some(self.property_subpatterns()?)
        } else {
            None
        };
        let designation = self.designation();
        Ok(Pattern::Recursive {
            ty: None,
            positional: Some(items),
            properties,
            designation,
            span: start.to(self.prev_span()),
        })
    }

    /// `Type {..}`, `Type(..)` or `Type name`; fails when no such shape follows so the
    /// caller can fall back to a constant pattern.
    fn type_led_pattern(&mut self) -> Result<Pattern, ParseError> {
        let start = self.peek().span;
        let ty = self.type_ref()?;
        if self.at_punct(Punct::LBrace) || self.at_punct(Punct::LParen) {
            let positional = if self.at_punct(Punct::LParen) {
                Some(self.positional_subpatterns()?)
            } else {
                None
            };
            let properties = if self.at_punct(Punct::LBrace) {
                Some(self.property_subpatterns()?)
            } else {
                None
            };
            let designation = self.designation();
            return Ok(Pattern::Recursive {
                ty: Some(ty),
                positional,
                properties,
                designation,
                span: start.to(self.prev_span()),
            });
        }
        if let Some(name) = self.designation() {
            return Ok(Pattern::Declaration {
                ty,
                name,
                span: start.to(self.prev_span()),
            });
        }
        Err(self.unexpected("a pattern"))
    }

    fn designation(&mut self) -> Option<String> {
        match &self.peek().kind {
            TokenKind::Ident(name) if !matches!(name.as_str(), "and" | "or" | "when") => {
                let name = name.clone();
                self.bump();
                Some(name)
            }
            _ => None,
        }
    }

    fn positional_subpatterns(&mut self) -> Result<Vec<Subpattern>, ParseError> {
        self.expect_punct(Punct::LParen)?;
        let mut items = Vec::new();
        if self.eat_punct(Punct::RParen) {
            return Ok(items);
        }
        loop {
            items.push(self.subpattern()?);
            if !self.eat_punct(Punct::Comma) {
                break;
            }
        }
        self.expect_punct(Punct::RParen)?;
        Ok(items)
    }

    fn property_subpatterns(&mut self) -> Result<Vec<Subpattern>, ParseError> {
        self.expect_punct(Punct::LBrace)?;
        let mut items = Vec::new();
        while !self.eat_punct(Punct::RBrace) {
            items.push(self.subpattern()?);
            if !self.eat_punct(Punct::Comma) {
                self.expect_punct(Punct::RBrace)?;
                break;
            }
        }
        Ok(items)
    }

    fn subpattern(&mut self) -> Result<Subpattern, ParseError> {
        let name = if matches!(self.peek().kind, TokenKind::Ident(_))
            && (self.peek_n(1).is_punct(Punct::Colon) || self.peek_n(1).is_punct(Punct::Dot))
            && self.property_path_follows()
        {
            let mut name = self.expect_ident()?.0;
            while self.eat_punct(Punct::Dot) {
                name.push('.');
                name.push_str(&self.expect_ident()?.0);
            }
            self.expect_punct(Punct::Colon)?;
            Some(name)
        } else {
            None
        };
        let pattern = self.pattern()?;
        Ok(Subpattern { name, pattern })
    }

    fn property_path_follows(&self) -> bool {
        let mut n = 0;
        loop {
            if !matches!(self.peek_n(n).kind, TokenKind::Ident(_)) {
                return false;
            }
            n += 1;
            if self.peek_n(n).is_punct(Punct::Colon) {
                return true;
            }
            if !self.peek_n(n).is_punct(Punct::Dot) {
                return false;
            }
            n += 1;
        }
    }

    // ---- query expressions ----------------------------------------------------------

    fn query_follows(&self) -> bool {
        if !self.at_ident("from") {
            return false;
        }
        let ident_at = |n: usize| matches!(self.peek_n(n).kind, TokenKind::Ident(_));
        (ident_at(1) && self.peek_n(2).is_keyword(Keyword::In))
            || ((ident_at(1)
                || matches!(self.peek_n(1).kind, TokenKind::Keyword(k) if k.is_predefined_type()))
                && ident_at(2)
                && self.peek_n(3).is_keyword(Keyword::In))
    }

    fn query(&mut self) -> Result<Expr, ParseError> {
        let start = self.peek().span;
        let mut clauses = Vec::new();
        loop {
            let Some(clause) = QUERY_CLAUSES
                .iter()
                .copied()
                .find(|c| self.at_ident(c))
            else {
                break;
            };
            self.bump();
            let parsed = match clause {
                "from" | "join" => {
                    if !self.peek_n(1).is_keyword(Keyword::In) {
                        self.type_ref()?;
                    }
                    let (name, _) = self.expect_ident()?;
                    self.expect_keyword(Keyword::In)?;
                    let source = self.expr()?;
                    if clause == "from" {
                        QueryClause::From { name, source }
                    } else {
                        if !self.eat_ident("on") {
                            return Err(self.unexpected("`on`"));
                        }
                        let on = self.expr()?;
                        if !self.eat_ident("equals") {
                            return Err(self.unexpected("`equals`"));
                        }
                        let equals = self.expr()?;
                        QueryClause::Join {
                            name,
                            source,
                            on,
                            equals,
                        }
                    }
                }
                "let" => {
                    let (name, _) = self.expect_ident()?;
                    self.expect_punct(Punct::Eq)?;
                    QueryClause::Let {
                        name,
                        value: self.expr()?,
                    }
                }
                "where" => QueryClause::Where(self.expr()?),
                "orderby" => {
                    let mut keys = Vec::new();
                    loop {
                        keys.push(self.expr()?);
                        if !self.eat_ident("ascending") {
                            self.eat_ident("descending");
                        }
                        if !self.eat_punct(Punct::Comma) {
                            break;
                        }
                    }
                    QueryClause::OrderBy(keys)
                }
                "select" => QueryClause::Select(self.expr()?),
                "group" => {
                    let element = self.expr()?;
                    if !self.eat_ident("by") {
                        return Err(self.unexpected("`by`"));
                    }
                    QueryClause::GroupBy {
                        element,
                        key: self.expr()?,
                    }
                }
                _ => QueryClause::Into(self.expect_ident()?.0),
            };
            clauses.push(parsed);
        }
        Ok(Expr::new(
            ExprKind::Query(clauses),
            start.to(self.prev_span()),
        ))
    }
}

fn int_literal(text: &str, span: Span) -> Result<Literal, ParseError> {
    let lower = text.to_ascii_lowercase();
    let digits_end = lower
        .trim_end_matches(|c: char| c == 'u' || c == 'l')
        .len();
    let (body, suffix) = lower.split_at(digits_end);
    let suffix = match suffix {
        "" => "",
        "u" => "u",
        "l" => "l",
        _ => "ul",
    };
    let body = body.replace('_', "");
    let value = if let Some(hex) = body.strip_prefix("0x") {
        u64::from_str_radix(hex, 16)
    } else if let Some(bin) = body.strip_prefix("0b") {
        u64::from_str_radix(bin, 2)
    } else {
        body.parse::<u64>()
    }
    .map_err(|_| ParseError::new(format!("invalid integer literal `{text}`"), span))?;
    Ok(Literal::Int {
        text: text.to_owned(),
        value,
        suffix: suffix.to_owned(),
    })
}

fn real_literal(text: &str) -> Literal {
    let cleaned = text.replace('_', "");
    match cleaned.chars().last() {
        Some(c @ ('f' | 'F' | 'd' | 'D' | 'm' | 'M')) => Literal::Real {
            digits: cleaned[..cleaned.len() - 1].to_owned(),
            suffix: Some(c.to_ascii_lowercase()),
        },
        _ => Literal::Real {
            digits: cleaned,
            suffix: None,
        },
    }
}
