//! Read-only traversal over the syntax tree.
//!
//! Implementors override the `visit_*` hooks they care about and call the matching
//! `walk_*` function to keep descending.

use crate::ast::*;

pub trait Visit {
    fn visit_type_decl(&mut self, decl: &TypeDecl) {
        walk_type_decl(self, decl);
    }

    fn visit_field(&mut self, field: &FieldDecl) {
        walk_field(self, field);
    }

    fn visit_method(&mut self, method: &MethodDecl) {
        walk_method(self, method);
    }

    fn visit_block(&mut self, block: &Block) {
        walk_block(self, block);
    }

    fn visit_stmt(&mut self, stmt: &Stmt) {
        walk_stmt(self, stmt);
    }

    fn visit_local_decl(&mut self, decl: &LocalDecl) {
        walk_local_decl(self, decl);
    }

    fn visit_expr(&mut self, expr: &Expr) {
        walk_expr(self, expr);
    }

    fn visit_pattern(&mut self, pattern: &Pattern) {
        walk_pattern(self, pattern);
    }

    fn visit_type_ref(&mut self, _ty: &TypeRef) {}
}

pub fn walk_type_decl<V: Visit + ?Sized>(v: &mut V, decl: &TypeDecl) {
    for base in &decl.bases {
        v.visit_type_ref(base);
    }
    for member in &decl.members {
        match member {
            Member::Field(field) => v.visit_field(field),
            Member::Method(method) => v.visit_method(method),
            Member::Property(prop) => {
                v.visit_type_ref(&prop.ty);
                for accessor in &prop.accessors {
                    if let Some(body) = &accessor.body {
                        walk_method_body(v, body);
                    }
                }
                if let Some(expr) = &prop.expression_body {
                    v.visit_expr(expr);
                }
                if let Some(init) = &prop.init {
                    v.visit_expr(init);
                }
            }
            Member::Constructor(ctor) => {
                for param in &ctor.params {
                    v.visit_type_ref(&param.ty);
                }
                if let Some(body) = &ctor.body {
                    walk_method_body(v, body);
                }
            }
            Member::Type(nested) => v.visit_type_decl(nested),
        }
    }
}

pub fn walk_field<V: Visit + ?Sized>(v: &mut V, field: &FieldDecl) {
    v.visit_type_ref(&field.ty);
    for declarator in &field.declarators {
        walk_declarator(v, declarator);
    }
}

pub fn walk_method<V: Visit + ?Sized>(v: &mut V, method: &MethodDecl) {
    v.visit_type_ref(&method.return_type);
    for param in &method.params {
        v.visit_type_ref(&param.ty);
        if let Some(default) = &param.default {
            v.visit_expr(default);
        }
    }
    if let Some(body) = &method.body {
        walk_method_body(v, body);
    }
}

pub fn walk_method_body<V: Visit + ?Sized>(v: &mut V, body: &MethodBody) {
    match body {
        MethodBody::Block(block) => v.visit_block(block),
        MethodBody::Expr(expr) => v.visit_expr(expr),
    }
}

pub fn walk_block<V: Visit + ?Sized>(v: &mut V, block: &Block) {
    for stmt in &block.stmts {
        v.visit_stmt(stmt);
    }
}

fn walk_declarator<V: Visit + ?Sized>(v: &mut V, declarator: &VariableDeclarator) {
    if let Some(size) = &declarator.fixed_size {
        v.visit_expr(size);
    }
    if let Some(init) = &declarator.init {
        v.visit_expr(init);
    }
}

pub fn walk_local_decl<V: Visit + ?Sized>(v: &mut V, decl: &LocalDecl) {
    v.visit_type_ref(&decl.ty);
    for declarator in &decl.declarators {
        walk_declarator(v, declarator);
    }
}

pub fn walk_stmt<V: Visit + ?Sized>(v: &mut V, stmt: &Stmt) {
    match &stmt.kind {
        StmtKind::Block(block) | StmtKind::Unsafe(block) => v.visit_block(block),
        StmtKind::Checked { body, .. } => v.visit_block(body),
        StmtKind::Local(decl) => v.visit_local_decl(decl),
        StmtKind::LocalFunction(method) => v.visit_method(method),
        StmtKind::Expr(expr) => v.visit_expr(expr),
        StmtKind::If {
            cond,
            then_branch,
            else_branch,
        } => {
            v.visit_expr(cond);
            v.visit_stmt(then_branch);
            if let Some(else_branch) = else_branch {
                v.visit_stmt(else_branch);
            }
        }
        StmtKind::While { cond, body } | StmtKind::DoWhile { body, cond } => {
            v.visit_expr(cond);
            v.visit_stmt(body);
        }
        StmtKind::For {
            init,
            cond,
            step,
            body,
        } => {
            match init {
                Some(ForInit::Decl(decl)) => v.visit_local_decl(decl),
                Some(ForInit::Exprs(exprs)) => {
                    for expr in exprs {
                        v.visit_expr(expr);
                    }
                }
                None => {}
            }
            if let Some(cond) = cond {
                v.visit_expr(cond);
            }
            for expr in step {
                v.visit_expr(expr);
            }
            v.visit_stmt(body);
        }
        StmtKind::ForEach { ty, iter, body, .. } => {
            v.visit_type_ref(ty);
            v.visit_expr(iter);
            v.visit_stmt(body);
        }
        StmtKind::Switch {
            scrutinee,
            sections,
        } => {
            v.visit_expr(scrutinee);
            for section in sections {
                for label in &section.labels {
                    if let SwitchLabel::Case { pattern, guard } = label {
                        v.visit_pattern(pattern);
                        if let Some(guard) = guard {
                            v.visit_expr(guard);
                        }
                    }
                }
                for stmt in &section.stmts {
                    v.visit_stmt(stmt);
                }
            }
        }
        StmtKind::Return(expr) | StmtKind::Throw(expr) | StmtKind::Yield(expr) => {
            if let Some(expr) = expr {
                v.visit_expr(expr);
            }
        }
        StmtKind::Lock { target, body } => {
            v.visit_expr(target);
            v.visit_stmt(body);
        }
        StmtKind::Try {
            body,
            catches,
            finally,
        } => {
            v.visit_block(body);
            for catch in catches {
                if let Some(ty) = &catch.ty {
                    v.visit_type_ref(ty);
                }
                if let Some(filter) = &catch.filter {
                    v.visit_expr(filter);
                }
                v.visit_block(&catch.body);
            }
            if let Some(finally) = finally {
                v.visit_block(finally);
            }
        }
        StmtKind::Using { decl, expr, body } => {
            if let Some(decl) = decl {
                v.visit_local_decl(decl);
            }
            if let Some(expr) = expr {
                v.visit_expr(expr);
            }
            v.visit_stmt(body);
        }
        StmtKind::Fixed { decl, body } => {
            v.visit_local_decl(decl);
            v.visit_stmt(body);
        }
        StmtKind::Break | StmtKind::Continue | StmtKind::Empty => {}
    }
}

fn walk_args<V: Visit + ?Sized>(v: &mut V, args: &[Argument]) {
    for arg in args {
        v.visit_expr(&arg.expr);
    }
}

pub fn walk_expr<V: Visit + ?Sized>(v: &mut V, expr: &Expr) {
    match &expr.kind {
        ExprKind::Literal(_) | ExprKind::Ident(_) | ExprKind::This | ExprKind::PredefinedType(_) => {}
        ExprKind::Member { target, .. } => v.visit_expr(target),
        ExprKind::Index { target, args } => {
            v.visit_expr(target);
            walk_args(v, args);
        }
        ExprKind::Call {
            callee,
            type_args,
            args,
        } => {
            v.visit_expr(callee);
            for ty in type_args {
                v.visit_type_ref(ty);
            }
            walk_args(v, args);
        }
        ExprKind::Unary { operand, .. } | ExprKind::Postfix { operand, .. } => {
            v.visit_expr(operand)
        }
        ExprKind::Binary { lhs, rhs, .. } => {
            v.visit_expr(lhs);
            v.visit_expr(rhs);
        }
        ExprKind::Assign { target, value, .. } => {
            v.visit_expr(target);
            v.visit_expr(value);
        }
        ExprKind::Conditional {
            cond,
            then_expr,
            else_expr,
        } => {
            v.visit_expr(cond);
            v.visit_expr(then_expr);
            v.visit_expr(else_expr);
        }
        ExprKind::Cast { ty, expr } | ExprKind::As { expr, ty } => {
            v.visit_type_ref(ty);
            v.visit_expr(expr);
        }
        ExprKind::Paren(inner)
        | ExprKind::Await(inner)
        | ExprKind::Throw(inner)
        | ExprKind::Ref(inner)
        | ExprKind::Checked { expr: inner, .. } => v.visit_expr(inner),
        ExprKind::New {
            ty,
            args,
            initializer,
        } => {
            if let Some(ty) = ty {
                v.visit_type_ref(ty);
            }
            walk_args(v, args);
            for item in initializer.iter().flatten() {
                v.visit_expr(item);
            }
        }
        ExprKind::NewArray {
            element,
            sizes,
            initializer,
        } => {
            v.visit_type_ref(element);
            for size in sizes {
                v.visit_expr(size);
            }
            for item in initializer.iter().flatten() {
                v.visit_expr(item);
            }
        }
        ExprKind::AnonymousNew(members) => {
            for (_, value) in members {
                v.visit_expr(value);
            }
        }
        ExprKind::ArrayInit(items) => {
            for item in items {
                v.visit_expr(item);
            }
        }
        ExprKind::Default(ty) => {
            if let Some(ty) = ty {
                v.visit_type_ref(ty);
            }
        }
        ExprKind::SizeOf(ty) | ExprKind::TypeOf(ty) => v.visit_type_ref(ty),
        ExprKind::StackAlloc {
            ty,
            size,
            initializer,
        } => {
            v.visit_type_ref(ty);
            if let Some(size) = size {
                v.visit_expr(size);
            }
            for item in initializer.iter().flatten() {
                v.visit_expr(item);
            }
        }
        ExprKind::Is { expr, pattern } => {
            v.visit_expr(expr);
            v.visit_pattern(pattern);
        }
        ExprKind::Range { start, end } => {
            if let Some(start) = start {
                v.visit_expr(start);
            }
            if let Some(end) = end {
                v.visit_expr(end);
            }
        }
        ExprKind::Tuple(items) => walk_args(v, items),
        ExprKind::Query(clauses) => {
            for clause in clauses {
                match clause {
                    QueryClause::From { source, .. } => v.visit_expr(source),
                    QueryClause::Let { value, .. } => v.visit_expr(value),
                    QueryClause::Where(e) | QueryClause::Select(e) => v.visit_expr(e),
                    QueryClause::Join {
                        source, on, equals, ..
                    } => {
                        v.visit_expr(source);
                        v.visit_expr(on);
                        v.visit_expr(equals);
                    }
                    QueryClause::OrderBy(keys) => {
                        for key in keys {
                            v.visit_expr(key);
                        }
                    }
                    QueryClause::GroupBy { element, key } => {
                        v.visit_expr(element);
                        v.visit_expr(key);
                    }
                    QueryClause::Into(_) => {}
                }
            }
        }
    }
}

pub fn walk_pattern<V: Visit + ?Sized>(v: &mut V, pattern: &Pattern) {
    match pattern {
        Pattern::Discard(_) | Pattern::Var { .. } => {}
        Pattern::Constant(expr) | Pattern::Relational { value: expr, .. } => v.visit_expr(expr),
        Pattern::Recursive {
            ty,
            positional,
            properties,
            ..
        } => {
            if let Some(ty) = ty {
                v.visit_type_ref(ty);
            }
            for sub in positional.iter().flatten().chain(properties.iter().flatten()) {
                v.visit_pattern(&sub.pattern);
            }
        }
        Pattern::Declaration { ty, .. } => v.visit_type_ref(ty),
        Pattern::Not(inner) => v.visit_pattern(inner),
        Pattern::And(lhs, rhs) | Pattern::Or(lhs, rhs) => {
            v.visit_pattern(lhs);
            v.visit_pattern(rhs);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse;

    #[derive(Default)]
    struct Idents(Vec<String>);

    impl Visit for Idents {
        fn visit_expr(&mut self, expr: &Expr) {
            if let ExprKind::Ident(name) = &expr.kind {
                self.0.push(name.clone());
            }
            walk_expr(self, expr);
        }
    }

    #[test]
    fn walks_nested_statements_in_order() {
        let unit = parse(
            "struct S { void M() { if (a) { b = c; } for (int i = d; i < e; i++) { f(g); } } }",
        )
        .unwrap();
        let mut idents = Idents::default();
        idents.visit_type_decl(&unit.types[0]);
        assert_eq!(idents.0, ["a", "b", "c", "d", "i", "e", "i", "f", "g"]);
    }
}
