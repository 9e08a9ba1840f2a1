use winnow::ascii::{digit1, hex_digit1, till_line_ending};
use winnow::combinator::{alt, cut_err, delimited, opt, preceded, repeat, separated};
use winnow::error::{ErrMode, ModalResult, StrContext, StrContextValue};
use winnow::prelude::*;
use winnow::token::{any, one_of, take_while};

use crate::ast::{BinaryOp, Expr, Literal, UnaryOp};
use crate::error::CompileError;

// -- Whitespace & comments --------------------------------------------------

fn ws(input: &mut &str) -> ModalResult<()> {
    let _: () = repeat(
        0..,
        alt((
            take_while(1.., |c: char| c.is_whitespace()).void(),
            ("//", till_line_ending).void(),
        )),
    )
    .parse_next(input)?;
    Ok(())
}

// -- Identifiers ------------------------------------------------------------

fn ident<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    (
        take_while(1, |c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(0.., |c: char| c.is_ascii_alphanumeric() || c == '_'),
    )
        .take()
        .parse_next(input)
}

fn keyword<'i>(kw: &'static str) -> impl FnMut(&mut &'i str) -> ModalResult<&'i str> {
    move |input: &mut &'i str| ident.verify(|word: &str| word == kw).parse_next(input)
}

// -- String & bytes literals ------------------------------------------------

trait LiteralSink {
    fn push_char(&mut self, c: char);
    fn push_hex(&mut self, b: u8);
}

impl LiteralSink for String {
    fn push_char(&mut self, c: char) {
        self.push(c);
    }

    fn push_hex(&mut self, b: u8) {
        self.push(char::from(b));
    }
}

impl LiteralSink for Vec<u8> {
    fn push_char(&mut self, c: char) {
        let mut buf = [0u8; 4];
        self.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
    }

    fn push_hex(&mut self, b: u8) {
        self.push(b);
    }
}

fn hex_escape(input: &mut &str, digits: usize) -> ModalResult<u32> {
    let hex = cut_err(
        take_while(digits, |c: char| c.is_ascii_hexdigit())
            .context(StrContext::Expected(StrContextValue::Description("hex digits"))),
    )
    .parse_next(input)?;
    u32::from_str_radix(hex, 16).map_err(|_| ErrMode::from_input(input).cut())
}

fn quoted_into<S: LiteralSink>(input: &mut &str, out: &mut S) -> ModalResult<()> {
    let quote = one_of(['"', '\'']).parse_next(input)?;
    loop {
        let ch = cut_err(any.context(StrContext::Expected(StrContextValue::CharLiteral(quote))))
            .parse_next(input)?;
        match ch {
            c if c == quote => return Ok(()),
            '\n' | '\r' => return Err(ErrMode::from_input(input).cut()),
            '\\' => {
                let esc = cut_err(any).parse_next(input)?;
                match esc {
                    'n' => out.push_char('\n'),
                    'r' => out.push_char('\r'),
                    't' => out.push_char('\t'),
                    '0' => out.push_char('\0'),
                    '\\' | '"' | '\'' | '`' | '?' => out.push_char(esc),
                    'x' | 'X' => {
                        let v = hex_escape(input, 2)?;
                        out.push_hex(v as u8);
                    }
                    'u' | 'U' => {
                        let digits = if esc == 'u' { 4 } else { 8 };
                        let v = hex_escape(input, digits)?;
                        let c = char::from_u32(v).ok_or_else(|| ErrMode::from_input(input).cut())?;
                        out.push_char(c);
                    }
                    _ => return Err(ErrMode::from_input(input).cut()),
                }
            }
            c => out.push_char(c),
        }
    }
}

fn string_literal(input: &mut &str) -> ModalResult<String> {
    let mut s = String::new();
    quoted_into(input, &mut s)?;
    Ok(s)
}

fn bytes_literal(input: &mut &str) -> ModalResult<Vec<u8>> {
    one_of(['b', 'B']).parse_next(input)?;
    let mut b = Vec::new();
    quoted_into(input, &mut b)?;
    Ok(b)
}

// -- Numbers ----------------------------------------------------------------

fn number_text<'i>(input: &mut &'i str) -> ModalResult<(&'i str, u32)> {
    alt((
        preceded(alt(("0x", "0X")), hex_digit1).map(|d| (d, 16)),
        (
            digit1,
            opt(('.', digit1)),
            opt((one_of(['e', 'E']), opt(one_of(['+', '-'])), digit1)),
        )
            .take()
            .map(|d| (d, 10)),
    ))
    .parse_next(input)
}

fn numeric_literal(text: &str, radix: u32, unsigned: bool, negative: bool) -> Option<Literal> {
    if radix == 10 && text.contains(|c| matches!(c, '.' | 'e' | 'E')) {
        if unsigned {
            return None;
        }
        let v: f64 = text.parse().ok()?;
        return Some(Literal::Double(if negative { -v } else { v }));
    }
    let magnitude = u64::from_str_radix(text, radix).ok()?;
    match (unsigned, negative) {
        (true, true) => None,
        (true, false) => Some(Literal::Uint(magnitude)),
        (false, true) if magnitude == 1u64 << 63 => Some(Literal::Int(i64::MIN)),
        (false, true) => i64::try_from(magnitude).ok().map(|v| Literal::Int(-v)),
        (false, false) => i64::try_from(magnitude).ok().map(Literal::Int),
    }
}

fn number(input: &mut &str, negative: bool) -> ModalResult<Literal> {
    let (text, radix) = number_text.parse_next(input)?;
    let unsigned = opt(one_of(['u', 'U'])).parse_next(input)?.is_some();
    numeric_literal(text, radix, unsigned, negative).ok_or_else(|| ErrMode::from_input(input).cut())
}

fn unsigned_number(input: &mut &str) -> ModalResult<Literal> {
    (|i: &mut &str| number(i, false))
        .context(StrContext::Label("numeric literal"))
        .parse_next(input)
}

fn negative_number(input: &mut &str) -> ModalResult<Literal> {
    (|i: &mut &str| number(i, true))
        .context(StrContext::Label("numeric literal"))
        .parse_next(input)
}

// -- Primary & postfix ------------------------------------------------------

fn call_args(input: &mut &str) -> ModalResult<Vec<Expr>> {
    '('.parse_next(input)?;
    let args: Vec<Expr> = separated(0.., expression, (ws, ',')).parse_next(input)?;
    cut_err((ws, ')'))
        .context(StrContext::Expected(StrContextValue::CharLiteral(')')))
        .parse_next(input)?;
    Ok(args)
}

fn list_literal(input: &mut &str) -> ModalResult<Expr> {
    '['.parse_next(input)?;
    let items: Vec<Expr> = separated(0.., expression, (ws, ',')).parse_next(input)?;
    let _ = opt((ws, ',')).parse_next(input)?;
    cut_err((ws, ']'))
        .context(StrContext::Expected(StrContextValue::CharLiteral(']')))
        .parse_next(input)?;
    Ok(Expr::List(items))
}

fn ident_or_call(input: &mut &str) -> ModalResult<Expr> {
    let name = ident.parse_next(input)?;
    match name {
        "true" => return Ok(Expr::Literal(Literal::Bool(true))),
        "false" => return Ok(Expr::Literal(Literal::Bool(false))),
        "in" | "null" => return Err(ErrMode::from_input(input).cut()),
        _ => {}
    }
    let checkpoint = input.checkpoint();
    ws.parse_next(input)?;
    if input.starts_with('(') {
        let args = call_args.parse_next(input)?;
        Ok(Expr::Call {
            target: None,
            function: name.to_owned(),
            args,
        })
    } else {
        input.reset(&checkpoint);
        Ok(Expr::Ident(name.to_owned()))
    }
}

fn primary(input: &mut &str) -> ModalResult<Expr> {
    ws.parse_next(input)?;
    alt((
        delimited('(', cut_err(expression), cut_err((ws, ')'))),
        list_literal,
        string_literal.map(|s| Expr::Literal(Literal::String(s))),
        bytes_literal.map(|b| Expr::Literal(Literal::Bytes(b))),
        unsigned_number.map(Expr::Literal),
        ident_or_call,
    ))
    .context(StrContext::Expected(StrContextValue::Description(
        "expression",
    )))
    .parse_next(input)
}

fn postfix(input: &mut &str, mut base: Expr) -> ModalResult<Expr> {
    loop {
        let checkpoint = input.checkpoint();
        ws.parse_next(input)?;
        if opt('.').parse_next(input)?.is_some() {
            ws.parse_next(input)?;
            let field = cut_err(
                ident.context(StrContext::Expected(StrContextValue::Description("field name"))),
            )
            .parse_next(input)?;
            let call_checkpoint = input.checkpoint();
            ws.parse_next(input)?;
            if input.starts_with('(') {
                let args = call_args.parse_next(input)?;
                base = Expr::Call {
                    target: Some(Box::new(base)),
                    function: field.to_owned(),
                    args,
                };
            } else {
                input.reset(&call_checkpoint);
                base = Expr::Select(Box::new(base), field.to_owned());
            }
        } else if opt('[').parse_next(input)?.is_some() {
            let index = cut_err(expression).parse_next(input)?;
            cut_err((ws, ']'))
                .context(StrContext::Expected(StrContextValue::CharLiteral(']')))
                .parse_next(input)?;
            base = Expr::Index(Box::new(base), Box::new(index));
        } else {
            input.reset(&checkpoint);
            return Ok(base);
        }
    }
}

// -- Operators (precedence: ?: < || < && < relation < +- < */% < unary) -----

fn unary(input: &mut &str) -> ModalResult<Expr> {
    let mut ops = Vec::new();
    let base = loop {
        ws.parse_next(input)?;
        if opt('!').parse_next(input)?.is_some() {
            ops.push(UnaryOp::Not);
            continue;
        }
        let negative_literal = input
            .strip_prefix('-')
            .is_some_and(|rest| rest.starts_with(|c: char| c.is_ascii_digit()));
        if negative_literal {
            '-'.parse_next(input)?;
            let lit = negative_number.parse_next(input)?;
            break postfix(input, Expr::Literal(lit))?;
        }
        if opt('-').parse_next(input)?.is_some() {
            ops.push(UnaryOp::Neg);
            continue;
        }
        let atom = primary.parse_next(input)?;
        break postfix(input, atom)?;
    };
    Ok(ops
        .into_iter()
        .rev()
        .fold(base, |acc, op| Expr::Unary(op, Box::new(acc))))
}

fn fold_binary(first: Expr, rest: Vec<(BinaryOp, Expr)>) -> Expr {
    rest.into_iter()
        .fold(first, |acc, (op, rhs)| Expr::Binary(op, Box::new(acc), Box::new(rhs)))
}

fn multiplicative(input: &mut &str) -> ModalResult<Expr> {
    let first = unary(input)?;
    let rest: Vec<(BinaryOp, Expr)> = repeat(
        0..,
        (
            preceded(
                ws,
                alt((
                    '*'.value(BinaryOp::Mul),
                    '/'.value(BinaryOp::Div),
                    '%'.value(BinaryOp::Mod),
                )),
            ),
            cut_err(unary),
        ),
    )
    .parse_next(input)?;
    Ok(fold_binary(first, rest))
}

fn additive(input: &mut &str) -> ModalResult<Expr> {
    let first = multiplicative(input)?;
    let rest: Vec<(BinaryOp, Expr)> = repeat(
        0..,
        (
            preceded(
                ws,
                alt(('+'.value(BinaryOp::Add), '-'.value(BinaryOp::Sub))),
            ),
            cut_err(multiplicative),
        ),
    )
    .parse_next(input)?;
    Ok(fold_binary(first, rest))
}

fn relation_op(input: &mut &str) -> ModalResult<BinaryOp> {
    ws.parse_next(input)?;
    alt((
        "<=".value(BinaryOp::Le),
        "<".value(BinaryOp::Lt),
        ">=".value(BinaryOp::Ge),
        ">".value(BinaryOp::Gt),
        "==".value(BinaryOp::Eq),
        "!=".value(BinaryOp::Ne),
        keyword("in").value(BinaryOp::In),
    ))
    .parse_next(input)
}

fn relation(input: &mut &str) -> ModalResult<Expr> {
    let first = additive(input)?;
    let rest: Vec<(BinaryOp, Expr)> =
        repeat(0.., (relation_op, cut_err(additive))).parse_next(input)?;
    Ok(fold_binary(first, rest))
}

fn and_expr(input: &mut &str) -> ModalResult<Expr> {
    let first = relation(input)?;
    let rest: Vec<(BinaryOp, Expr)> = repeat(
        0..,
        (
            preceded(ws, "&&").value(BinaryOp::And),
            cut_err(relation),
        ),
    )
    .parse_next(input)?;
    Ok(fold_binary(first, rest))
}

fn or_expr(input: &mut &str) -> ModalResult<Expr> {
    let first = and_expr(input)?;
    let rest: Vec<(BinaryOp, Expr)> = repeat(
        0..,
        (preceded(ws, "||").value(BinaryOp::Or), cut_err(and_expr)),
    )
    .parse_next(input)?;
    Ok(fold_binary(first, rest))
}

/// `c1 ? t1 : c2 ? t2 : e`，else 分支链迭代解析
fn conditional(input: &mut &str) -> ModalResult<Expr> {
    let mut branches = Vec::new();
    let mut current = or_expr(input)?;
    loop {
        let checkpoint = input.checkpoint();
        ws.parse_next(input)?;
        if opt('?').parse_next(input)?.is_none() {
            input.reset(&checkpoint);
            break;
        }
        let then = cut_err(conditional).parse_next(input)?;
        cut_err((ws, ':'))
            .context(StrContext::Expected(StrContextValue::CharLiteral(':')))
            .parse_next(input)?;
        branches.push((current, then));
        current = cut_err(or_expr).parse_next(input)?;
    }
    Ok(branches
        .into_iter()
        .rev()
        .fold(current, |otherwise, (cond, then)| {
            Expr::Conditional(Box::new(cond), Box::new(then), Box::new(otherwise))
        }))
}

fn expression(input: &mut &str) -> ModalResult<Expr> {
    ws.parse_next(input)?;
    conditional(input)
}

// -- Entry point ------------------------------------------------------------

pub(crate) fn parse_expression(source: &str) -> Result<Expr, CompileError> {
    (expression, ws)
        .map(|(expr, ())| expr)
        .parse(source)
        .map_err(|e| {
            let detail = e.inner().to_string().replace('\n', "; ");
            if detail.is_empty() {
                CompileError::syntax(format!("unexpected input at offset {}", e.offset()))
            } else {
                CompileError::syntax(format!("{} at offset {}", detail, e.offset()))
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> Expr {
        parse_expression(src).unwrap_or_else(|e| panic!("failed to parse {:?}: {}", src, e))
    }

    fn ident(name: &str) -> Box<Expr> {
        Box::new(Expr::Ident(name.to_string()))
    }

    fn int(v: i64) -> Box<Expr> {
        Box::new(Expr::Literal(Literal::Int(v)))
    }

    #[test]
    fn test_comparison() {
        assert_eq!(
            parse("price > 0"),
            Expr::Binary(BinaryOp::Gt, ident("price"), int(0))
        );
    }

    #[test]
    fn test_precedence() {
        // a || b && c  ==>  a || (b && c)
        assert_eq!(
            parse("a || b && c"),
            Expr::Binary(
                BinaryOp::Or,
                ident("a"),
                Box::new(Expr::Binary(BinaryOp::And, ident("b"), ident("c")))
            )
        );
        // 1 + 2 * 3 < x
        assert_eq!(
            parse("1 + 2 * 3 < x"),
            Expr::Binary(
                BinaryOp::Lt,
                Box::new(Expr::Binary(
                    BinaryOp::Add,
                    int(1),
                    Box::new(Expr::Binary(BinaryOp::Mul, int(2), int(3)))
                )),
                ident("x")
            )
        );
    }

    #[test]
    fn test_left_associative_subtraction() {
        assert_eq!(
            parse("a - b - c"),
            Expr::Binary(
                BinaryOp::Sub,
                Box::new(Expr::Binary(BinaryOp::Sub, ident("a"), ident("b"))),
                ident("c")
            )
        );
    }

    #[test]
    fn test_function_and_method_calls() {
        assert_eq!(
            parse("size(image) < 360"),
            Expr::Binary(
                BinaryOp::Lt,
                Box::new(Expr::Call {
                    target: None,
                    function: "size".into(),
                    args: vec![Expr::Ident("image".into())],
                }),
                int(360)
            )
        );
        assert_eq!(
            parse("name.startsWith('a')"),
            Expr::Call {
                target: Some(ident("name")),
                function: "startsWith".into(),
                args: vec![Expr::Literal(Literal::String("a".into()))],
            }
        );
    }

    #[test]
    fn test_literals() {
        assert_eq!(parse("42u"), Expr::Literal(Literal::Uint(42)));
        assert_eq!(parse("0x1F"), Expr::Literal(Literal::Int(31)));
        assert_eq!(parse("1.5e2"), Expr::Literal(Literal::Double(150.0)));
        assert_eq!(parse("-7"), Expr::Literal(Literal::Int(-7)));
        assert_eq!(
            parse("-9223372036854775808"),
            Expr::Literal(Literal::Int(i64::MIN))
        );
        assert_eq!(
            parse(r#""a\tbé""#),
            Expr::Literal(Literal::String("a\tbé".into()))
        );
        assert_eq!(
            parse(r#"b"\xff\x00""#),
            Expr::Literal(Literal::Bytes(vec![0xff, 0x00]))
        );
        assert_eq!(parse("true"), Expr::Literal(Literal::Bool(true)));
    }

    #[test]
    fn test_list_and_in() {
        assert_eq!(
            parse("x in [1, 2,]"),
            Expr::Binary(
                BinaryOp::In,
                ident("x"),
                Box::new(Expr::List(vec![
                    Expr::Literal(Literal::Int(1)),
                    Expr::Literal(Literal::Int(2)),
                ]))
            )
        );
    }

    #[test]
    fn test_identifier_starting_with_keyword() {
        assert_eq!(
            parse("index > 1"),
            Expr::Binary(BinaryOp::Gt, ident("index"), int(1))
        );
        assert_eq!(parse("bar"), Expr::Ident("bar".into()));
    }

    #[test]
    fn test_conditional_chain() {
        assert_eq!(
            parse("a ? 1 : b ? 2 : 3"),
            Expr::Conditional(
                ident("a"),
                int(1),
                Box::new(Expr::Conditional(ident("b"), int(2), int(3)))
            )
        );
    }

    #[test]
    fn test_unary_chain() {
        assert_eq!(
            parse("!!flag"),
            Expr::Unary(
                UnaryOp::Not,
                Box::new(Expr::Unary(UnaryOp::Not, ident("flag")))
            )
        );
        assert_eq!(parse("- x"), Expr::Unary(UnaryOp::Neg, ident("x")));
    }

    #[test]
    fn test_comments_and_whitespace() {
        assert_eq!(
            parse("  price // must be positive\n > 0 "),
            Expr::Binary(BinaryOp::Gt, ident("price"), int(0))
        );
    }

    #[test]
    fn test_syntax_errors() {
        for src in [
            "price >",
            "(a",
            "a b",
            "\"unterminated",
            "1 +* 2",
            "99999999999999999999",
            "-1u",
            "a ? b",
            "x.",
            "null == x",
            "a = 1",
        ] {
            assert!(parse_expression(src).is_err(), "expected error for {:?}", src);
        }
    }
}
