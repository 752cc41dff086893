//! Construct legality analysis.
//!
//! A single walk over the shader type and every helper method it reaches. Each rule looks
//! at one kind of node and reports into the diagnostic bag; nothing here stops the walk,
//! so one run reports every problem in the source.

use kiln_syntax::ast::{
    Argument, AssignOp, BinaryOp, Block, Expr, ExprKind, FieldDecl, ForInit, Literal, LocalDecl, Member,
    MethodDecl, Modifiers, Pattern, Stmt, StmtKind, SwitchLabel, TypeRef, TypeRefKind, UnaryOp,
};
use kiln_syntax::visit::{walk_block, walk_expr, walk_local_decl, walk_method, walk_pattern, walk_stmt};
use kiln_syntax::{Span, Visit};
use tracing::debug;

use crate::diagnostics::{DiagnosticId, Diagnostics};
use crate::program::ShaderKind;
use crate::resolve::{reachable_methods, CallResolver, CallTarget, DispatchInfo};
use crate::scope::{matrix_index, TypeEnv};
use crate::types::{ForbiddenShape, HlslType, ResolvedType, ScalarType};

/// Runs every construct rule over the shader type and its helper closure.
pub fn analyze(resolver: &CallResolver<'_, '_>) -> Diagnostics {
    let program = resolver.program();
    let mut analyzer = LegalityAnalyzer {
        env: TypeEnv::new(resolver, &program.shader.name),
        kind: program.kind,
        entry: program.entry,
        method: String::new(),
        in_entry: false,
        diagnostics: Diagnostics::new(),
    };

    if program.shader.modifiers.contains(Modifiers::UNSAFE) {
        analyzer.report(
            DiagnosticId::UnsafeModifier,
            program.shader.span,
            &[&program.shader.name],
        );
    }
    for member in &program.shader.members {
        match member {
            Member::Field(field) => analyzer.visit_field(field),
            Member::Method(method) => analyzer.visit_method(method),
            Member::Property(_) | Member::Constructor(_) | Member::Type(_) => {}
        }
    }

    for key in reachable_methods(resolver) {
        if key.owner == program.shader.name {
            continue;
        }
        if let Some(method) = program.method(&key) {
            analyzer.env.owner = key.owner.clone();
            analyzer.visit_method(method);
        }
    }

    debug!(
        shader = %program.shader.name,
        diagnostics = analyzer.diagnostics.len(),
        "legality analysis finished"
    );
    analyzer.diagnostics
}

struct LegalityAnalyzer<'r, 'p, 'a> {
    env: TypeEnv<'r, 'p, 'a>,
    kind: ShaderKind,
    entry: Option<&'a MethodDecl>,
    /// `Owner.Method` of the method being walked.
    method: String,
    /// Inside the entry point body, outside of any local function.
    in_entry: bool,
    diagnostics: Diagnostics,
}

impl LegalityAnalyzer<'_, '_, '_> {
    fn report(&mut self, id: DiagnosticId, span: Span, args: &[&str]) {
        self.diagnostics.report(id, Some(span), args);
    }

    fn check_modifiers(&mut self, modifiers: Modifiers, name: &str, span: Span) {
        if modifiers.contains(Modifiers::ASYNC) {
            self.report(DiagnosticId::AsyncModifier, span, &[name]);
        }
        if modifiers.contains(Modifiers::UNSAFE) {
            self.report(DiagnosticId::UnsafeModifier, span, &[name]);
        }
    }

    fn declare_params(&mut self, method: &MethodDecl) {
        for param in &method.params {
            let ty = match self.env.resolver.program().resolve(&param.ty) {
                ResolvedType::Value(ty) => Some(ty),
                _ => None,
            };
            self.env.scope.declare(&param.name, ty);
        }
    }

    /// Reports a body-level type that has no HLSL equivalent.
    fn check_body_type(&mut self, ty: &TypeRef, managed: DiagnosticId) {
        match self.env.resolver.program().resolve(ty) {
            ResolvedType::Managed(name) => self.report(managed, ty.span, &[&name]),
            ResolvedType::Resource(_) => self.report(managed, ty.span, &[&ty.to_string()]),
            ResolvedType::Unsupported(name) => {
                self.report(DiagnosticId::InvalidDiscoveredType, ty.span, &[&name])
            }
            ResolvedType::Value(_) | ResolvedType::Forbidden(_) => {}
        }
    }

    fn check_dispatch_usage(&mut self, expr: &Expr) {
        let Some(info) = self.env.dispatch_info(expr) else {
            return;
        };
        if self.in_entry && self.kind.is_dispatched() {
            return;
        }
        let id = match info {
            DispatchInfo::ThreadIds => DiagnosticId::InvalidThreadIdsUsage,
            DispatchInfo::GroupIds => DiagnosticId::InvalidGroupIdsUsage,
            DispatchInfo::GridIds => DiagnosticId::InvalidGridIdsUsage,
            DispatchInfo::GroupSize => DiagnosticId::InvalidGroupSizeUsage,
            DispatchInfo::DispatchSize => DiagnosticId::InvalidDispatchSizeUsage,
        };
        let method = self.method.clone();
        self.report(id, expr.span, &[&method]);
    }

    fn check_call(&mut self, callee: &Expr, args: &[Argument], span: Span) {
        match self.env.resolve_call(callee, args) {
            CallTarget::Unknown(name) => {
                self.report(DiagnosticId::InvalidMethodCall, span, &[&name])
            }
            CallTarget::Ambiguous(name) => {
                self.report(DiagnosticId::AmbiguousMethodCall, span, &[&name])
            }
            _ => {}
        }
    }

    fn check_matrix_indexer(&mut self, target: &Expr, args: &[Argument], span: Span) {
        if !matches!(self.env.infer(target), Some(HlslType::Matrix { .. })) {
            return;
        }
        let constant = args.iter().filter(|a| matrix_index(&a.expr).is_some()).count();
        let row_index = args.len() == 1
            && matches!(
                self.env.infer(&args[0].expr),
                Some(HlslType::Scalar(ScalarType::Int | ScalarType::UInt))
            );
        if constant != args.len() && !row_index {
            self.report(DiagnosticId::NonConstantMatrixSwizzle, span, &[]);
        }
    }
}

impl Visit for LegalityAnalyzer<'_, '_, '_> {
    fn visit_field(&mut self, field: &FieldDecl) {
        if field.modifiers.contains(Modifiers::UNSAFE) {
            let name = field.declarators.first().map_or("", |d| d.name.as_str());
            self.report(DiagnosticId::UnsafeModifier, field.span, &[name]);
        }
        self.visit_type_ref(&field.ty);
        self.method = format!("{}.<field>", self.env.owner);
        for declarator in &field.declarators {
            let Some(init) = &declarator.init else {
                continue;
            };
            match &init.kind {
                // Array initializers of static and group shared fields are lowered to HLSL
                // array declarations.
                ExprKind::NewArray {
                    sizes, initializer, ..
                } => {
                    for item in sizes.iter().chain(initializer.iter().flatten()) {
                        self.visit_expr(item);
                    }
                }
                ExprKind::ArrayInit(items) => {
                    for item in items {
                        self.visit_expr(item);
                    }
                }
                _ => self.visit_expr(init),
            }
        }
    }

    fn visit_method(&mut self, method: &MethodDecl) {
        self.check_modifiers(method.modifiers, &method.name, method.span);
        let saved = (self.method.clone(), self.in_entry);
        self.method = format!("{}.{}", self.env.owner, method.name);
        self.in_entry = self
            .entry
            .is_some_and(|entry| std::ptr::eq(entry, method))
            && self.env.owner == self.env.resolver.program().shader.name;

        self.env.scope.push();
        self.declare_params(method);
        walk_method(self, method);
        self.env.scope.pop();

        (self.method, self.in_entry) = saved;
    }

    fn visit_block(&mut self, block: &Block) {
        self.env.scope.push();
        for stmt in &block.stmts {
            if let StmtKind::LocalFunction(function) = &stmt.kind {
                let ty = match self.env.resolver.program().resolve(&function.return_type) {
                    ResolvedType::Value(ty) => Some(ty),
                    _ => None,
                };
                self.env.scope.declare_function(&function.name, ty);
            }
        }
        walk_block(self, block);
        self.env.scope.pop();
    }

    fn visit_stmt(&mut self, stmt: &Stmt) {
        let span = stmt.span;
        match &stmt.kind {
            StmtKind::ForEach { name, .. } => {
                self.report(DiagnosticId::ForEachStatement, span, &[]);
                self.env.scope.push();
                self.env.scope.declare(name, None);
                walk_stmt(self, stmt);
                self.env.scope.pop();
                return;
            }
            StmtKind::For {
                init,
                cond,
                step,
                body,
            } => {
                self.env.scope.push();
                match init {
                    Some(ForInit::Decl(decl)) => self.visit_local_decl(decl),
                    Some(ForInit::Exprs(exprs)) => {
                        for expr in exprs {
                            self.visit_expr(expr);
                        }
                    }
                    None => {}
                }
                if let Some(cond) = cond {
                    self.visit_expr(cond);
                }
                for expr in step {
                    self.visit_expr(expr);
                }
                self.visit_stmt(body);
                self.env.scope.pop();
                return;
            }
            StmtKind::LocalFunction(function) => {
                let saved = self.in_entry;
                self.in_entry = false;
                self.check_modifiers(function.modifiers, &function.name, function.span);
                let method = std::mem::replace(
                    &mut self.method,
                    format!("{}.{}", self.env.owner, function.name),
                );
                self.env.scope.push();
                self.declare_params(function);
                walk_method(self, function);
                self.env.scope.pop();
                self.method = method;
                self.in_entry = saved;
                return;
            }
            StmtKind::Switch { sections, .. } => {
                for section in sections {
                    for label in &section.labels {
                        if let SwitchLabel::Case {
                            guard: Some(guard), ..
                        } = label
                        {
                            self.report(
                                DiagnosticId::UnsupportedExpression,
                                guard.span,
                                &["switch case guard"],
                            );
                        }
                    }
                }
            }
            StmtKind::Lock { .. } => self.report(DiagnosticId::LockStatement, span, &[]),
            StmtKind::Try { .. } => self.report(DiagnosticId::TryCatch, span, &[]),
            StmtKind::Throw(_) => self.report(DiagnosticId::Throw, span, &[]),
            StmtKind::Using { .. } => self.report(DiagnosticId::UsingStatement, span, &[]),
            StmtKind::Yield(_) => self.report(DiagnosticId::Yield, span, &[]),
            StmtKind::Checked { .. } => self.report(DiagnosticId::CheckedStatement, span, &[]),
            StmtKind::Unsafe(_) => self.report(DiagnosticId::UnsafeStatement, span, &[]),
            StmtKind::Fixed { .. } => self.report(DiagnosticId::FixedStatement, span, &[]),
            _ => {}
        }
        walk_stmt(self, stmt);
    }

    fn visit_local_decl(&mut self, decl: &LocalDecl) {
        if decl.is_using {
            self.report(DiagnosticId::UsingStatement, decl.span, &[]);
        }
        if !decl.ty.is_var() {
            self.check_body_type(&decl.ty, DiagnosticId::InvalidLocalType);
        }
        walk_local_decl(self, decl);

        let declared = match self.env.resolver.program().resolve(&decl.ty) {
            ResolvedType::Value(ty) if !decl.ty.is_var() => Some(ty),
            _ => None,
        };
        for declarator in &decl.declarators {
            let ty = declared.clone().or_else(|| {
                declarator
                    .init
                    .as_ref()
                    .and_then(|init| self.env.infer(init))
            });
            self.env.scope.declare(&declarator.name, ty);
        }
    }

    fn visit_expr(&mut self, expr: &Expr) {
        let span = expr.span;
        match &expr.kind {
            ExprKind::Ident(_) => self.check_dispatch_usage(expr),
            ExprKind::AnonymousNew(_) => self.report(DiagnosticId::AnonymousObject, span, &[]),
            ExprKind::Await(_) => self.report(DiagnosticId::AwaitExpression, span, &[]),
            ExprKind::Checked { .. } => self.report(DiagnosticId::CheckedExpression, span, &[]),
            ExprKind::Query(_) => self.report(DiagnosticId::QueryExpression, span, &[]),
            ExprKind::Range { .. } => self.report(DiagnosticId::RangeExpression, span, &[]),
            ExprKind::Ref(_) => self.report(DiagnosticId::RefType, span, &[]),
            ExprKind::SizeOf(_) => self.report(DiagnosticId::SizeOf, span, &[]),
            ExprKind::StackAlloc { .. } => self.report(DiagnosticId::StackAlloc, span, &[]),
            ExprKind::Throw(_) => self.report(DiagnosticId::Throw, span, &[]),
            ExprKind::Tuple(_) => self.report(DiagnosticId::TupleType, span, &[]),
            ExprKind::Unary { op, .. } => match op {
                UnaryOp::IndexFromEnd => self.report(DiagnosticId::RangeExpression, span, &[]),
                UnaryOp::AddressOf | UnaryOp::Deref => {
                    self.report(DiagnosticId::PointerType, span, &[])
                }
                _ => {}
            },
            ExprKind::Literal(literal) => match literal {
                Literal::Str(_) => self.report(DiagnosticId::StringLiteral, span, &[]),
                Literal::Char(_) => {
                    self.report(DiagnosticId::UnsupportedExpression, span, &["character literal"])
                }
                Literal::Null => {
                    self.report(DiagnosticId::UnsupportedExpression, span, &["null literal"])
                }
                Literal::Real {
                    suffix: Some('m'), ..
                } => self.report(DiagnosticId::InvalidDiscoveredType, span, &["decimal"]),
                Literal::Int { suffix, .. } if suffix.contains('l') => {
                    let name = if suffix.contains('u') { "ulong" } else { "long" };
                    self.report(DiagnosticId::InvalidDiscoveredType, span, &[name]);
                }
                // Unsuffixed literals past uint.MaxValue are typed as long.
                Literal::Int { value, suffix, .. } if *value > u64::from(u32::MAX) => {
                    let unsigned = suffix.contains(|c| matches!(c, 'u' | 'U'));
                    let name = if unsigned { "ulong" } else { "long" };
                    self.report(DiagnosticId::InvalidDiscoveredType, span, &[name]);
                }
                _ => {}
            },
            ExprKind::TypeOf(_) => self.report(DiagnosticId::UnsupportedExpression, span, &["typeof"]),
            ExprKind::As { .. } => self.report(DiagnosticId::UnsupportedExpression, span, &["as"]),
            ExprKind::Binary {
                op: BinaryOp::Coalesce,
                ..
            }
            | ExprKind::Assign {
                op: AssignOp::Coalesce,
                ..
            } => self.report(DiagnosticId::UnsupportedExpression, span, &["null-coalescing"]),
            ExprKind::Member {
                conditional: true, ..
            } => self.report(
                DiagnosticId::UnsupportedExpression,
                span,
                &["null-conditional access"],
            ),
            ExprKind::New {
                ty,
                args,
                initializer,
            } => {
                if let Some(ty) = ty {
                    match self.env.resolver.program().resolve(ty) {
                        ResolvedType::Value(HlslType::Struct(_)) if !args.is_empty() => {
                            self.report(DiagnosticId::InvalidObjectCreation, ty.span, &[&ty.to_string()])
                        }
                        _ => self.check_body_type(ty, DiagnosticId::InvalidObjectCreation),
                    }
                }
                if initializer.is_some() {
                    self.report(DiagnosticId::UnsupportedExpression, span, &["object initializer"]);
                }
            }
            ExprKind::NewArray { element, .. } => self.report(
                DiagnosticId::InvalidObjectCreation,
                span,
                &[&format!("{element}[]")],
            ),
            ExprKind::Cast { ty, .. } => self.check_body_type(ty, DiagnosticId::InvalidObjectCreation),
            ExprKind::Default(Some(ty)) => {
                self.check_body_type(ty, DiagnosticId::InvalidObjectCreation)
            }
            ExprKind::Call { callee, args, .. } => self.check_call(callee, args, span),
            ExprKind::Index { target, args } => self.check_matrix_indexer(target, args, span),
            _ => {}
        }
        walk_expr(self, expr);
    }

    fn visit_pattern(&mut self, pattern: &Pattern) {
        match pattern {
            Pattern::Recursive { span, .. } => {
                self.report(DiagnosticId::RecursivePattern, *span, &[]);
                return;
            }
            Pattern::Relational { span, .. } => {
                self.report(DiagnosticId::RelationalPattern, *span, &[])
            }
            Pattern::Declaration { span, .. } | Pattern::Var { span, .. } => {
                self.report(DiagnosticId::UnsupportedExpression, *span, &["declaration pattern"])
            }
            Pattern::Discard(span) => {
                self.report(DiagnosticId::UnsupportedExpression, *span, &["discard pattern"])
            }
            Pattern::Constant(_) | Pattern::Not(_) | Pattern::And(..) | Pattern::Or(..) => {}
        }
        walk_pattern(self, pattern);
    }

    fn visit_type_ref(&mut self, ty: &TypeRef) {
        let shape = match &ty.kind {
            TypeRefKind::Pointer(_) => ForbiddenShape::Pointer,
            TypeRefKind::FunctionPointer { .. } => ForbiddenShape::FunctionPointer,
            TypeRefKind::Tuple(_) => ForbiddenShape::Tuple,
            TypeRefKind::Ref { .. } => ForbiddenShape::Ref,
            TypeRefKind::Named { args, .. } => {
                for arg in args {
                    self.visit_type_ref(arg);
                }
                return;
            }
            TypeRefKind::Array { element, .. } => return self.visit_type_ref(element),
            TypeRefKind::Nullable(inner) => return self.visit_type_ref(inner),
        };
        let id = match shape {
            ForbiddenShape::Pointer => DiagnosticId::PointerType,
            ForbiddenShape::FunctionPointer => DiagnosticId::FunctionPointerType,
            ForbiddenShape::Tuple => DiagnosticId::TupleType,
            ForbiddenShape::Ref => DiagnosticId::RefType,
        };
        self.report(id, ty.span, &[]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    use kiln_syntax::parse;

    use crate::program::Program;

    fn ids(body: &str, members: &str) -> BTreeSet<DiagnosticId> {
        let source = format!(
            "struct S : IComputeShader {{
                ReadWriteBuffer<float> buffer;
                {members}
                void Execute() {{ {body} }}
            }}"
        );
        let unit = parse(&source).unwrap();
        let program = Program::new(&unit, &unit.types[0], &mut Diagnostics::new()).unwrap();
        let resolver = CallResolver::new(&program);
        analyze(&resolver).ids()
    }

    #[test]
    fn clean_body_has_no_diagnostics() {
        let body = "
            int i = ThreadIds.X;
            var v = new Float4(1, 2, 3, 4);
            Float4 w = default;
            for (int j = 0; j < 4; j++) { v.X += Hlsl.Abs(v.Y); }
            switch (i) { case 0: break; default: buffer[i] = v.X; break; }
            buffer[i] = i is 1 or 2 ? Square(v.W) : MathF.Sqrt(buffer[i]);
        ";
        let members = "static float Square(float x) => x * x;";
        assert_eq!(ids(body, members), BTreeSet::new());
    }

    #[test]
    fn every_occurrence_is_reported() {
        let body = "throw new Exception(); throw null;";
        let unit = parse(&format!(
            "struct S : IComputeShader {{ ReadWriteBuffer<float> b; void Execute() {{ {body} }} }}"
        ))
        .unwrap();
        let program = Program::new(&unit, &unit.types[0], &mut Diagnostics::new()).unwrap();
        let resolver = CallResolver::new(&program);
        let diagnostics = analyze(&resolver);
        assert_eq!(
            diagnostics
                .iter()
                .filter(|d| d.id == DiagnosticId::Throw)
                .count(),
            2
        );
    }

    #[test]
    fn dispatch_info_outside_entry() {
        let members = "float Helper() => ThreadIds.X + GroupIds.Index;";
        let body = "buffer[0] = Helper();";
        assert_eq!(
            ids(body, members),
            BTreeSet::from([
                DiagnosticId::InvalidThreadIdsUsage,
                DiagnosticId::InvalidGroupIdsUsage
            ])
        );
    }

    #[test]
    fn local_shadows_dispatch_info() {
        assert_eq!(ids("int ThreadIds = 1; buffer[0] = ThreadIds;", ""), BTreeSet::new());
    }

    #[test]
    fn matrix_swizzles_need_constants() {
        let body = "Float4x4 m = default; int k = 1; float a = m[M11]; Float2 b = m[M11, M22]; Float4 row = m[k];";
        assert_eq!(ids(body, ""), BTreeSet::new());
        let body = "Float4x4 m = default; int k = 1; Float2 b = m[M11, k];";
        assert_eq!(
            ids(body, ""),
            BTreeSet::from([DiagnosticId::NonConstantMatrixSwizzle])
        );
    }
}
