//! 求值
//!
//! 求值器逐节点计步；每隔固定步数检查一次截止时间与取消标志，
//! 不依赖额外的看门狗线程。

use std::borrow::Cow;
use std::cmp::Ordering;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::time::{Duration, Instant};

use crate::ast::BinaryOp;
use crate::error::EvalError;
use crate::program::{Activation, Node, Pattern, TextFn, compile_regex};
use crate::types::Type;
use crate::value::Value;

/// 每隔多少步检查一次时钟与取消标志
const CHECK_INTERVAL: u64 = 64;

/// 取消标志，克隆后共享同一个状态
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, AtomicOrdering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(AtomicOrdering::Acquire)
    }
}

/// 求值上下文：截止时间、步数预算、值大小上限与取消标志
#[derive(Debug, Clone)]
pub struct EvalContext {
    deadline: Option<Instant>,
    max_steps: u64,
    max_value_bytes: usize,
    cancel: Option<CancelFlag>,
}

impl Default for EvalContext {
    fn default() -> Self {
        Self {
            deadline: None,
            max_steps: 100_000,
            max_value_bytes: 1024 * 1024,
            cancel: None,
        }
    }
}

impl EvalContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_max_steps(mut self, max_steps: u64) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_max_value_bytes(mut self, max_value_bytes: usize) -> Self {
        self.max_value_bytes = max_value_bytes;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// 取消优先于超时
    pub fn check(&self) -> Result<(), EvalError> {
        if self.cancel.as_ref().is_some_and(CancelFlag::is_cancelled) {
            return Err(EvalError::cancelled());
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(EvalError::timeout("evaluation exceeded time budget"));
        }
        Ok(())
    }
}

fn no_overload(op: &str, values: &[&Value]) -> EvalError {
    let types: Vec<&str> = values.iter().map(|v| v.type_name()).collect();
    EvalError::type_mismatch(format!(
        "no matching overload for '{}' applied to ({})",
        op,
        types.join(", ")
    ))
}

pub(crate) struct Evaluator<'a, A: ?Sized> {
    activation: &'a A,
    ctx: &'a EvalContext,
    steps: u64,
}

impl<'a, A: Activation + ?Sized> Evaluator<'a, A> {
    pub(crate) fn new(activation: &'a A, ctx: &'a EvalContext) -> Self {
        Self {
            activation,
            ctx,
            steps: 0,
        }
    }

    fn tick(&mut self) -> Result<(), EvalError> {
        self.steps += 1;
        if self.steps > self.ctx.max_steps {
            return Err(EvalError::timeout(format!(
                "evaluation exceeded step budget of {}",
                self.ctx.max_steps
            )));
        }
        if self.steps % CHECK_INTERVAL == 0 {
            self.ctx.check()?;
        }
        Ok(())
    }

    fn check_size(&self, len: usize) -> Result<(), EvalError> {
        if len > self.ctx.max_value_bytes {
            return Err(EvalError::runtime(format!(
                "value size {} exceeds limit of {} bytes",
                len, self.ctx.max_value_bytes
            )));
        }
        Ok(())
    }

    fn eval_bool(&mut self, node: &'a Node) -> Result<bool, EvalError> {
        match self.eval(node)?.as_ref() {
            Value::Bool(b) => Ok(*b),
            other => Err(EvalError::type_mismatch(format!(
                "expected bool, found {}",
                other.type_name()
            ))),
        }
    }

    pub(crate) fn eval(&mut self, node: &'a Node) -> Result<Cow<'a, Value>, EvalError> {
        self.tick()?;
        match node {
            Node::Const(v) => Ok(Cow::Borrowed(v)),
            Node::Var { name, ty } => {
                let value = self.activation.resolve(name).ok_or_else(|| {
                    EvalError::runtime(format!("no value bound for variable '{}'", name))
                })?;
                if !value.has_type(ty) {
                    return Err(EvalError::type_mismatch(format!(
                        "variable '{}' is declared as {} but bound to {}",
                        name,
                        ty,
                        value.type_name()
                    )));
                }
                Ok(Cow::Borrowed(value))
            }
            Node::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                let mut total = 0usize;
                for item in items {
                    let value = self.eval(item)?;
                    total = total.saturating_add(value.byte_len());
                    self.check_size(total)?;
                    out.push(value.into_owned());
                }
                Ok(Cow::Owned(Value::List(out)))
            }
            Node::Not(operand) => Ok(Cow::Owned(Value::Bool(!self.eval_bool(operand)?))),
            Node::Neg(operand) => {
                let v = self.eval(operand)?;
                let result = match v.as_ref() {
                    Value::Int(i) => Value::Int(
                        i.checked_neg()
                            .ok_or_else(|| EvalError::runtime("int overflow"))?,
                    ),
                    Value::Double(d) => Value::Double(-d),
                    other => return Err(no_overload("-", &[other])),
                };
                Ok(Cow::Owned(result))
            }
            Node::And(l, r) => self.logical(l, r, false).map(|b| Cow::Owned(Value::Bool(b))),
            Node::Or(l, r) => self.logical(l, r, true).map(|b| Cow::Owned(Value::Bool(b))),
            Node::Compare(op, l, r) => {
                let a = self.eval(l)?;
                let b = self.eval(r)?;
                compare(*op, &a, &b).map(|b| Cow::Owned(Value::Bool(b)))
            }
            Node::In(l, r) => {
                let needle = self.eval(l)?;
                let haystack = self.eval(r)?;
                match haystack.as_ref() {
                    Value::List(items) => Ok(Cow::Owned(Value::Bool(
                        items.iter().any(|item| item.equals(&needle)),
                    ))),
                    other => Err(no_overload("in", &[&needle, other])),
                }
            }
            Node::Arith(op, l, r) => {
                let a = self.eval(l)?;
                let b = self.eval(r)?;
                self.arithmetic(*op, &a, &b).map(Cow::Owned)
            }
            Node::Conditional(cond, then, otherwise) => {
                if self.eval_bool(cond)? {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
            Node::Index(operand, index) => {
                let list = self.eval(operand)?;
                let idx = self.eval(index)?;
                let position = match idx.as_ref() {
                    Value::Int(i) => usize::try_from(*i).ok(),
                    Value::Uint(u) => usize::try_from(*u).ok(),
                    other => return Err(no_overload("_[_]", &[&list, other])),
                };
                match list {
                    Cow::Borrowed(Value::List(items)) => position
                        .and_then(|p| items.get(p))
                        .map(Cow::Borrowed)
                        .ok_or_else(|| EvalError::runtime(format!("index {} out of range", idx))),
                    Cow::Owned(Value::List(mut items)) => match position {
                        Some(p) if p < items.len() => Ok(Cow::Owned(items.swap_remove(p))),
                        _ => Err(EvalError::runtime(format!("index {} out of range", idx))),
                    },
                    other => Err(no_overload("_[_]", &[&other, &idx])),
                }
            }
            Node::Size(operand) => {
                let v = self.eval(operand)?;
                let size = match v.as_ref() {
                    Value::String(s) => s.chars().count(),
                    Value::Bytes(b) => b.len(),
                    Value::List(items) => items.len(),
                    other => return Err(no_overload("size", &[other])),
                };
                let size = i64::try_from(size).map_err(|_| EvalError::runtime("int overflow"))?;
                Ok(Cow::Owned(Value::Int(size)))
            }
            Node::Text(text_fn, subject, arg) => {
                let s = self.eval(subject)?;
                let a = self.eval(arg)?;
                let (Value::String(s), Value::String(a)) = (s.as_ref(), a.as_ref()) else {
                    return Err(no_overload("string function", &[&s, &a]));
                };
                let result = match text_fn {
                    TextFn::Contains => s.contains(a.as_str()),
                    TextFn::StartsWith => s.starts_with(a.as_str()),
                    TextFn::EndsWith => s.ends_with(a.as_str()),
                };
                Ok(Cow::Owned(Value::Bool(result)))
            }
            Node::Matches(subject, pattern) => {
                let s = self.eval(subject)?;
                let Value::String(text) = s.as_ref() else {
                    return Err(no_overload("matches", &[&s]));
                };
                let matched = match pattern {
                    Pattern::Compiled(regex) => regex.is_match(text),
                    Pattern::Dynamic(node) => {
                        let p = self.eval(node)?;
                        let Value::String(p) = p.as_ref() else {
                            return Err(no_overload("matches", &[&s, &p]));
                        };
                        let regex = compile_regex(p).map_err(|e| {
                            EvalError::runtime(format!("invalid regular expression {:?}: {}", p, e))
                        })?;
                        regex.is_match(text)
                    }
                };
                Ok(Cow::Owned(Value::Bool(matched)))
            }
            Node::Convert(to, operand) => {
                let v = self.eval(operand)?;
                let converted = convert(to, &v)?;
                self.check_size(converted.byte_len())?;
                Ok(Cow::Owned(converted))
            }
        }
    }

    /// `&&`（short = false）与 `||`（short = true）
    ///
    /// 任一侧得到短路值即返回该值；否则返回左侧的可吸收错误。
    fn logical(&mut self, l: &'a Node, r: &'a Node, short: bool) -> Result<bool, EvalError> {
        match self.eval_bool(l) {
            Ok(v) if v == short => Ok(short),
            Ok(_) => self.eval_bool(r),
            Err(e) if e.is_absorbable() => match self.eval_bool(r) {
                Ok(v) if v == short => Ok(short),
                Err(re) if !re.is_absorbable() => Err(re),
                _ => Err(e),
            },
            Err(e) => Err(e),
        }
    }

    fn arithmetic(&self, op: BinaryOp, a: &Value, b: &Value) -> Result<Value, EvalError> {
        match (a, b) {
            (Value::Int(x), Value::Int(y)) => int_arith(op, *x, *y).map(Value::Int),
            (Value::Uint(x), Value::Uint(y)) => uint_arith(op, *x, *y).map(Value::Uint),
            (Value::Double(x), Value::Double(y)) => match op {
                BinaryOp::Add => Ok(Value::Double(x + y)),
                BinaryOp::Sub => Ok(Value::Double(x - y)),
                BinaryOp::Mul => Ok(Value::Double(x * y)),
                BinaryOp::Div => Ok(Value::Double(x / y)),
                _ => Err(no_overload(op.symbol(), &[a, b])),
            },
            (Value::String(x), Value::String(y)) if op == BinaryOp::Add => {
                self.check_size(x.len() + y.len())?;
                let mut s = String::with_capacity(x.len() + y.len());
                s.push_str(x);
                s.push_str(y);
                Ok(Value::String(s))
            }
            (Value::Bytes(x), Value::Bytes(y)) if op == BinaryOp::Add => {
                self.check_size(x.len() + y.len())?;
                Ok(Value::Bytes([x.as_slice(), y.as_slice()].concat()))
            }
            (Value::List(x), Value::List(y)) if op == BinaryOp::Add => {
                self.check_size(a.byte_len() + b.byte_len())?;
                Ok(Value::List(x.iter().chain(y).cloned().collect()))
            }
            _ => Err(no_overload(op.symbol(), &[a, b])),
        }
    }
}

fn int_arith(op: BinaryOp, x: i64, y: i64) -> Result<i64, EvalError> {
    let result = match op {
        BinaryOp::Add => x.checked_add(y),
        BinaryOp::Sub => x.checked_sub(y),
        BinaryOp::Mul => x.checked_mul(y),
        BinaryOp::Div if y == 0 => return Err(EvalError::runtime("division by zero")),
        BinaryOp::Div => x.checked_div(y),
        BinaryOp::Mod if y == 0 => return Err(EvalError::runtime("modulus by zero")),
        BinaryOp::Mod => x.checked_rem(y),
        _ => return Err(no_overload(op.symbol(), &[&Value::Int(x), &Value::Int(y)])),
    };
    result.ok_or_else(|| EvalError::runtime("int overflow"))
}

fn uint_arith(op: BinaryOp, x: u64, y: u64) -> Result<u64, EvalError> {
    let result = match op {
        BinaryOp::Add => x.checked_add(y),
        BinaryOp::Sub => x.checked_sub(y),
        BinaryOp::Mul => x.checked_mul(y),
        BinaryOp::Div if y == 0 => return Err(EvalError::runtime("division by zero")),
        BinaryOp::Div => x.checked_div(y),
        BinaryOp::Mod if y == 0 => return Err(EvalError::runtime("modulus by zero")),
        BinaryOp::Mod => x.checked_rem(y),
        _ => return Err(no_overload(op.symbol(), &[&Value::Uint(x), &Value::Uint(y)])),
    };
    result.ok_or_else(|| EvalError::runtime("uint overflow"))
}

fn compare(op: BinaryOp, a: &Value, b: &Value) -> Result<bool, EvalError> {
    match op {
        BinaryOp::Eq => return Ok(a.equals(b)),
        BinaryOp::Ne => return Ok(!a.equals(b)),
        _ => {}
    }
    let ordering = a.compare(b);
    let comparable = a.type_name() == b.type_name()
        || (matches!(a, Value::Int(_) | Value::Uint(_) | Value::Double(_))
            && matches!(b, Value::Int(_) | Value::Uint(_) | Value::Double(_)));
    if ordering.is_none() && !comparable {
        return Err(no_overload(op.symbol(), &[a, b]));
    }
    Ok(match op {
        BinaryOp::Lt => ordering == Some(Ordering::Less),
        BinaryOp::Le => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
        BinaryOp::Gt => ordering == Some(Ordering::Greater),
        BinaryOp::Ge => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
        _ => return Err(no_overload(op.symbol(), &[a, b])),
    })
}

fn convert(to: &Type, v: &Value) -> Result<Value, EvalError> {
    let invalid = || {
        EvalError::runtime(format!("cannot convert {} {} to {}", v.type_name(), v, to))
    };
    let converted = match (to, v) {
        (Type::Int, Value::Int(i)) => Value::Int(*i),
        (Type::Int, Value::Uint(u)) => Value::Int(i64::try_from(*u).map_err(|_| invalid())?),
        (Type::Int, Value::Double(d)) => {
            if !(d.is_finite() && *d >= -9.223_372_036_854_775_808e18 && *d < 9.223_372_036_854_775_808e18) {
                return Err(invalid());
            }
            Value::Int(d.trunc() as i64)
        }
        (Type::Int, Value::String(s)) => Value::Int(s.trim().parse().map_err(|_| invalid())?),
        (Type::Uint, Value::Uint(u)) => Value::Uint(*u),
        (Type::Uint, Value::Int(i)) => Value::Uint(u64::try_from(*i).map_err(|_| invalid())?),
        (Type::Uint, Value::Double(d)) => {
            if !(d.is_finite() && *d > -1.0 && *d < 1.844_674_407_370_955_2e19) {
                return Err(invalid());
            }
            Value::Uint(d.trunc() as u64)
        }
        (Type::Uint, Value::String(s)) => Value::Uint(s.trim().parse().map_err(|_| invalid())?),
        (Type::Double, Value::Double(d)) => Value::Double(*d),
        (Type::Double, Value::Int(i)) => Value::Double(*i as f64),
        (Type::Double, Value::Uint(u)) => Value::Double(*u as f64),
        (Type::Double, Value::String(s)) => {
            Value::Double(s.trim().parse().map_err(|_| invalid())?)
        }
        (Type::String, Value::String(s)) => Value::String(s.clone()),
        (Type::String, Value::Int(i)) => Value::String(i.to_string()),
        (Type::String, Value::Uint(u)) => Value::String(u.to_string()),
        (Type::String, Value::Double(d)) => Value::String(d.to_string()),
        (Type::String, Value::Bool(b)) => Value::String(b.to_string()),
        (Type::String, Value::Bytes(b)) => {
            Value::String(String::from_utf8(b.clone()).map_err(|_| invalid())?)
        }
        (Type::Bytes, Value::Bytes(b)) => Value::Bytes(b.clone()),
        (Type::Bytes, Value::String(s)) => Value::Bytes(s.as_bytes().to_vec()),
        _ => return Err(no_overload(&to.to_string(), &[v])),
    };
    Ok(converted)
}
