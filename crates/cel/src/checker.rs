//! 静态类型检查
//!
//! 把语法树转换为可执行节点：解析变量、确定函数重载、预编译常量正则。

use std::collections::BTreeMap;

use crate::ast::{Ast, BinaryOp, Expr, Literal, UnaryOp};
use crate::env::Env;
use crate::error::{CompileError, CompileErrorKind};
use crate::program::{Node, Pattern, Program, TextFn, compile_regex};
use crate::types::Type;
use crate::value::Value;

pub(crate) fn check(env: &Env, ast: &Ast) -> Result<Program, CompileError> {
    let mut checker = Checker {
        env,
        references: BTreeMap::new(),
    };
    let (root, ty) = checker.check(ast.root())?;
    if ty != Type::Bool {
        return Err(CompileError::type_error(format!(
            "expression must evaluate to bool, found {}",
            ty
        )));
    }
    Ok(Program {
        source: ast.source().to_string(),
        root,
        references: checker.references,
    })
}

struct Checker<'e> {
    env: &'e Env,
    references: BTreeMap<String, Type>,
}

fn no_overload(op: &str, lt: &Type, rt: &Type) -> CompileError {
    CompileError::type_error(format!(
        "no matching overload for '{}' applied to ({}, {})",
        op, lt, rt
    ))
}

fn no_unary_overload(op: &str, ty: &Type) -> CompileError {
    CompileError::type_error(format!(
        "no matching overload for '{}' applied to ({})",
        op, ty
    ))
}

fn wrong_arity(function: &str) -> CompileError {
    CompileError::type_error(format!(
        "wrong number of arguments or call style for '{}'",
        function
    ))
}

fn conversion_target(function: &str) -> Option<Type> {
    match function {
        "int" => Some(Type::Int),
        "uint" => Some(Type::Uint),
        "double" => Some(Type::Double),
        "string" => Some(Type::String),
        "bytes" => Some(Type::Bytes),
        _ => None,
    }
}

fn literal(lit: &Literal) -> (Node, Type) {
    let (value, ty) = match lit {
        Literal::Int(v) => (Value::Int(*v), Type::Int),
        Literal::Uint(v) => (Value::Uint(*v), Type::Uint),
        Literal::Double(v) => (Value::Double(*v), Type::Double),
        Literal::Bool(v) => (Value::Bool(*v), Type::Bool),
        Literal::String(v) => (Value::String(v.clone()), Type::String),
        Literal::Bytes(v) => (Value::Bytes(v.clone()), Type::Bytes),
    };
    (Node::Const(value), ty)
}

impl Checker<'_> {
    fn check(&mut self, expr: &Expr) -> Result<(Node, Type), CompileError> {
        match expr {
            Expr::Literal(lit) => Ok(literal(lit)),
            Expr::Ident(name) => self
                .variable(name)
                .ok_or_else(|| CompileError::unknown_identifier(name)),
            Expr::Select(operand, field) => {
                if let Some(found) = expr.qualified_name().and_then(|name| self.variable(&name)) {
                    return Ok(found);
                }
                let (_, ty) = self.check(operand)?;
                Err(CompileError::type_error(format!(
                    "field selection '.{}' is not supported on {}",
                    field, ty
                )))
            }
            Expr::List(items) => self.list(items),
            Expr::Unary(op, operand) => {
                let (node, ty) = self.check(operand)?;
                match (op, &ty) {
                    (UnaryOp::Not, Type::Bool) => Ok((Node::Not(Box::new(node)), Type::Bool)),
                    (UnaryOp::Neg, Type::Int | Type::Double) => {
                        Ok((Node::Neg(Box::new(node)), ty))
                    }
                    (UnaryOp::Not, _) => Err(no_unary_overload("!", &ty)),
                    (UnaryOp::Neg, _) => Err(no_unary_overload("-", &ty)),
                }
            }
            Expr::Binary(op, l, r) => self.binary(*op, l, r),
            Expr::Conditional(cond, then, otherwise) => {
                let (cn, ct) = self.check(cond)?;
                if ct != Type::Bool {
                    return Err(CompileError::type_error(format!(
                        "conditional test must be bool, found {}",
                        ct
                    )));
                }
                let (tn, tt) = self.check(then)?;
                let (on, ot) = self.check(otherwise)?;
                if tt != ot {
                    return Err(CompileError::type_error(format!(
                        "conditional branches have different types ({}, {})",
                        tt, ot
                    )));
                }
                Ok((
                    Node::Conditional(Box::new(cn), Box::new(tn), Box::new(on)),
                    tt,
                ))
            }
            Expr::Index(operand, index) => {
                let (on, ot) = self.check(operand)?;
                let (inode, it) = self.check(index)?;
                match (&ot, &it) {
                    (Type::List(elem), Type::Int | Type::Uint) => {
                        let elem = (**elem).clone();
                        Ok((Node::Index(Box::new(on), Box::new(inode)), elem))
                    }
                    _ => Err(no_overload("_[_]", &ot, &it)),
                }
            }
            Expr::Call {
                target,
                function,
                args,
            } => self.call(target.as_deref(), function, args),
        }
    }

    fn variable(&mut self, name: &str) -> Option<(Node, Type)> {
        let ty = self.env.lookup(name)?.clone();
        self.references.insert(name.to_string(), ty.clone());
        Some((
            Node::Var {
                name: name.to_string(),
                ty: ty.clone(),
            },
            ty,
        ))
    }

    fn list(&mut self, items: &[Expr]) -> Result<(Node, Type), CompileError> {
        let mut nodes = Vec::with_capacity(items.len());
        let mut elem: Option<Type> = None;
        for item in items {
            let (node, ty) = self.check(item)?;
            match &elem {
                None => elem = Some(ty),
                Some(e) if *e == ty => {}
                Some(e) => {
                    return Err(CompileError::type_error(format!(
                        "list elements must share one type, found {} and {}",
                        e, ty
                    )));
                }
            }
            nodes.push(node);
        }
        let elem = elem
            .ok_or_else(|| CompileError::type_error("empty list literal has no element type"))?;
        let list_ty = Type::List(Box::new(elem));

        // 全部为常量时折叠
        if nodes.iter().all(|n| matches!(n, Node::Const(_))) {
            let values = nodes
                .into_iter()
                .filter_map(|n| match n {
                    Node::Const(v) => Some(v),
                    _ => None,
                })
                .collect();
            return Ok((Node::Const(Value::List(values)), list_ty));
        }
        Ok((Node::List(nodes), list_ty))
    }

    fn binary(&mut self, op: BinaryOp, l: &Expr, r: &Expr) -> Result<(Node, Type), CompileError> {
        let (ln, lt) = self.check(l)?;
        let (rn, rt) = self.check(r)?;
        let both_numeric = lt.is_numeric() && rt.is_numeric();
        let (lhs, rhs) = (Box::new(ln), Box::new(rn));

        match op {
            BinaryOp::And | BinaryOp::Or => {
                if lt != Type::Bool || rt != Type::Bool {
                    return Err(no_overload(op.symbol(), &lt, &rt));
                }
                let node = if op == BinaryOp::And {
                    Node::And(lhs, rhs)
                } else {
                    Node::Or(lhs, rhs)
                };
                Ok((node, Type::Bool))
            }
            BinaryOp::Eq | BinaryOp::Ne => {
                if lt != rt && !both_numeric {
                    return Err(no_overload(op.symbol(), &lt, &rt));
                }
                Ok((Node::Compare(op, lhs, rhs), Type::Bool))
            }
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                let ordered = both_numeric
                    || (lt == rt && matches!(lt, Type::String | Type::Bytes | Type::Bool));
                if !ordered {
                    return Err(no_overload(op.symbol(), &lt, &rt));
                }
                Ok((Node::Compare(op, lhs, rhs), Type::Bool))
            }
            BinaryOp::In => match &rt {
                Type::List(elem) if **elem == lt || (elem.is_numeric() && lt.is_numeric()) => {
                    Ok((Node::In(lhs, rhs), Type::Bool))
                }
                _ => Err(no_overload(op.symbol(), &lt, &rt)),
            },
            BinaryOp::Add => {
                let ok = lt == rt
                    && matches!(
                        lt,
                        Type::Int
                            | Type::Uint
                            | Type::Double
                            | Type::String
                            | Type::Bytes
                            | Type::List(_)
                    );
                if !ok {
                    return Err(no_overload(op.symbol(), &lt, &rt));
                }
                Ok((Node::Arith(op, lhs, rhs), lt))
            }
            BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => {
                if lt != rt || !lt.is_numeric() {
                    return Err(no_overload(op.symbol(), &lt, &rt));
                }
                Ok((Node::Arith(op, lhs, rhs), lt))
            }
            BinaryOp::Mod => {
                if lt != rt || !matches!(lt, Type::Int | Type::Uint) {
                    return Err(no_overload(op.symbol(), &lt, &rt));
                }
                Ok((Node::Arith(op, lhs, rhs), lt))
            }
        }
    }

    fn call(
        &mut self,
        target: Option<&Expr>,
        function: &str,
        args: &[Expr],
    ) -> Result<(Node, Type), CompileError> {
        if let Some(to) = conversion_target(function) {
            let (None, [arg]) = (target, args) else {
                return Err(wrong_arity(function));
            };
            let (node, from) = self.check(arg)?;
            let allowed = match to {
                Type::Int | Type::Uint | Type::Double => {
                    matches!(from, Type::Int | Type::Uint | Type::Double | Type::String)
                }
                Type::String => from.is_scalar(),
                Type::Bytes => matches!(from, Type::String | Type::Bytes),
                Type::Bool | Type::List(_) => false,
            };
            if !allowed {
                return Err(no_unary_overload(function, &from));
            }
            return Ok((Node::Convert(to.clone(), Box::new(node)), to));
        }

        match function {
            "size" => {
                let operand = match (target, args) {
                    (Some(t), []) => t,
                    (None, [a]) => a,
                    _ => return Err(wrong_arity(function)),
                };
                let (node, ty) = self.check(operand)?;
                match ty {
                    Type::String | Type::Bytes | Type::List(_) => {
                        Ok((Node::Size(Box::new(node)), Type::Int))
                    }
                    other => Err(no_unary_overload(function, &other)),
                }
            }
            "contains" | "startsWith" | "endsWith" => {
                let (Some(subject), [arg]) = (target, args) else {
                    return Err(wrong_arity(function));
                };
                let (sn, st) = self.check(subject)?;
                let (an, at) = self.check(arg)?;
                if st != Type::String || at != Type::String {
                    return Err(no_overload(function, &st, &at));
                }
                let text_fn = match function {
                    "contains" => TextFn::Contains,
                    "startsWith" => TextFn::StartsWith,
                    _ => TextFn::EndsWith,
                };
                Ok((
                    Node::Text(text_fn, Box::new(sn), Box::new(an)),
                    Type::Bool,
                ))
            }
            "matches" => {
                let (subject, pattern) = match (target, args) {
                    (Some(t), [p]) => (t, p),
                    (None, [s, p]) => (s, p),
                    _ => return Err(wrong_arity(function)),
                };
                let (sn, st) = self.check(subject)?;
                let (pn, pt) = self.check(pattern)?;
                if st != Type::String || pt != Type::String {
                    return Err(no_overload(function, &st, &pt));
                }
                let pattern = match pn {
                    Node::Const(Value::String(p)) => {
                        let regex = compile_regex(&p).map_err(|e| {
                            CompileError::syntax(format!(
                                "invalid regular expression {:?}: {}",
                                p, e
                            ))
                        })?;
                        Pattern::Compiled(regex)
                    }
                    other => Pattern::Dynamic(Box::new(other)),
                };
                Ok((Node::Matches(Box::new(sn), pattern), Type::Bool))
            }
            _ => Err(CompileError {
                kind: CompileErrorKind::UnknownIdentifier,
                message: format!("undeclared reference to function '{}'", function),
            }),
        }
    }
}
