//! 语法树

use std::collections::BTreeSet;

/// 字面量
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Uint(u64),
    Double(f64),
    Bool(bool),
    String(String),
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Or => "||",
            BinaryOp::And => "&&",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::In => "in",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
        }
    }
}

/// 表达式节点
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    Ident(String),
    List(Vec<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
    /// `operand.field`
    Select(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    /// `f(args)` 或 `target.f(args)`
    Call {
        target: Option<Box<Expr>>,
        function: String,
        args: Vec<Expr>,
    },
}

impl Expr {
    /// 由标识符与字段选择组成的限定名，如 `user.name`
    pub fn qualified_name(&self) -> Option<String> {
        match self {
            Expr::Ident(name) => Some(name.clone()),
            Expr::Select(operand, field) => {
                operand.qualified_name().map(|prefix| format!("{}.{}", prefix, field))
            }
            _ => None,
        }
    }

    /// 树高
    pub fn depth(&self) -> usize {
        let children = match self {
            Expr::Literal(_) | Expr::Ident(_) => return 1,
            Expr::List(items) => items.iter().map(Expr::depth).max().unwrap_or(0),
            Expr::Unary(_, e) | Expr::Select(e, _) => e.depth(),
            Expr::Binary(_, l, r) | Expr::Index(l, r) => l.depth().max(r.depth()),
            Expr::Conditional(c, t, f) => c.depth().max(t.depth()).max(f.depth()),
            Expr::Call { target, args, .. } => {
                let args_depth = args.iter().map(Expr::depth).max().unwrap_or(0);
                target.as_ref().map_or(args_depth, |t| t.depth().max(args_depth))
            }
        };
        children + 1
    }

    fn collect_unresolved(&self, is_declared: &dyn Fn(&str) -> bool, out: &mut BTreeSet<String>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Ident(name) => {
                if !is_declared(name) {
                    out.insert(name.clone());
                }
            }
            Expr::Select(operand, _) => {
                let declared = self.qualified_name().is_some_and(|name| is_declared(&name));
                if !declared {
                    operand.collect_unresolved(is_declared, out);
                }
            }
            Expr::List(items) => {
                for item in items {
                    item.collect_unresolved(is_declared, out);
                }
            }
            Expr::Unary(_, e) => e.collect_unresolved(is_declared, out),
            Expr::Binary(_, l, r) | Expr::Index(l, r) => {
                l.collect_unresolved(is_declared, out);
                r.collect_unresolved(is_declared, out);
            }
            Expr::Conditional(c, t, f) => {
                c.collect_unresolved(is_declared, out);
                t.collect_unresolved(is_declared, out);
                f.collect_unresolved(is_declared, out);
            }
            Expr::Call { target, args, .. } => {
                if let Some(target) = target {
                    target.collect_unresolved(is_declared, out);
                }
                for arg in args {
                    arg.collect_unresolved(is_declared, out);
                }
            }
        }
    }
}

/// 解析结果
#[derive(Debug, Clone, PartialEq)]
pub struct Ast {
    pub(crate) source: String,
    pub(crate) root: Expr,
}

impl Ast {
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn root(&self) -> &Expr {
        &self.root
    }

    /// 未声明的自由标识符（函数名不计入）
    pub fn unresolved_identifiers(&self, is_declared: impl Fn(&str) -> bool) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.root.collect_unresolved(&is_declared, &mut out);
        out
    }
}
