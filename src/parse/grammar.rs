use ipnetwork::Ipv4Network;
use winnow::ascii::{dec_int, till_line_ending};
use winnow::combinator::{alt, cut_err, delimited, opt, preceded, repeat, separated};
use winnow::error::{ErrMode, ModalResult, StrContext, StrContextValue};
use winnow::prelude::*;
use winnow::token::{any, take_while};

use crate::{Pattern, Value};

use super::parser::{BinaryOp, PolicyExpr};

// -- Whitespace & comments --------------------------------------------------

fn ws(input: &mut &str) -> ModalResult<()> {
    let _: () = repeat(
        0..,
        alt((
            take_while(1.., |c: char| c.is_ascii_whitespace()).void(),
            ('#', till_line_ending).void(),
        )),
    )
    .parse_next(input)?;
    Ok(())
}

// -- Identifiers ------------------------------------------------------------

fn ident<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    (
        take_while(1.., |c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(0.., |c: char| c.is_ascii_alphanumeric() || c == '_'),
    )
        .take()
        .parse_next(input)
}

// -- Literals ---------------------------------------------------------------

fn string_literal(input: &mut &str) -> ModalResult<String> {
    '"'.parse_next(input)?;
    let mut s = String::new();
    loop {
        let ch = any.parse_next(input)?;
        match ch {
            '"' => return Ok(s),
            '\\' => {
                let esc = any.parse_next(input)?;
                match esc {
                    '"' => s.push('"'),
                    '\\' => s.push('\\'),
                    other => {
                        s.push('\\');
                        s.push(other);
                    }
                }
            }
            c => s.push(c),
        }
    }
}

/// A dotted IPv4 address, optionally with a `/len` suffix.
fn address(input: &mut &str) -> ModalResult<Ipv4Network> {
    take_while(1.., |c: char| c.is_ascii_digit() || c == '.' || c == '/')
        .verify(|s: &str| s.contains('.'))
        .try_map(|s: &str| s.parse::<Ipv4Network>())
        .parse_next(input)
}

fn int(input: &mut &str) -> ModalResult<i64> {
    ws.parse_next(input)?;
    dec_int::<_, i64, _>
        .context(StrContext::Expected(StrContextValue::Description("integer")))
        .parse_next(input)
}

fn pattern(input: &mut &str) -> ModalResult<Pattern> {
    ws.parse_next(input)?;
    alt((
        string_literal.map(Pattern::from),
        address.map(Pattern::prefix),
        dec_int::<_, i64, _>.map(Pattern::from),
    ))
    .context(StrContext::Expected(StrContextValue::Description(
        "integer, address, prefix or string",
    )))
    .parse_next(input)
}

fn assigned_value(input: &mut &str) -> ModalResult<Option<Value>> {
    ws.parse_next(input)?;
    alt((
        "none".value(None),
        string_literal.map(|s| Some(Value::String(s))),
        address
            .verify(|net: &Ipv4Network| net.prefix() == 32)
            .map(|net| Some(Value::Ip(net.ip()))),
        dec_int::<_, i64, _>.map(|i| Some(Value::Int(i))),
    ))
    .context(StrContext::Expected(StrContextValue::Description(
        "integer, address, string or none",
    )))
    .parse_next(input)
}

fn assignments<O>(
    value: fn(&mut &str) -> ModalResult<O>,
) -> impl FnMut(&mut &str) -> ModalResult<Vec<(String, O)>> {
    move |input: &mut &str| {
        let field = |input: &mut &str| -> ModalResult<(String, O)> {
            ws.parse_next(input)?;
            let name = ident.parse_next(input)?;
            (ws, cut_err('=')).parse_next(input)?;
            let v = cut_err(value).parse_next(input)?;
            Ok((name.to_owned(), v))
        };
        delimited(
            (ws, '('),
            separated(0.., field, (ws, ',')),
            (ws, cut_err(')')),
        )
        .parse_next(input)
    }
}

fn int_args(count: usize, input: &mut &str) -> ModalResult<Vec<i64>> {
    let args: Vec<i64> = delimited(
        (ws, cut_err('(')),
        cut_err(separated(count, int, (ws, ','))),
        (ws, cut_err(')')),
    )
    .parse_next(input)?;
    Ok(args)
}

// -- Atoms ------------------------------------------------------------------

fn call_or_keyword(input: &mut &str) -> ModalResult<PolicyExpr> {
    let name = ident.parse_next(input)?;
    match name {
        "identity" | "passthrough" => Ok(PolicyExpr::Identity),
        "drop" => Ok(PolicyExpr::Drop),
        "controller" => Ok(PolicyExpr::Controller),
        "match" => cut_err(assignments(pattern))
            .map(PolicyExpr::Match)
            .parse_next(input),
        "modify" => cut_err(assignments(assigned_value))
            .map(PolicyExpr::Modify)
            .parse_next(input),
        "fwd" | "xfwd" => {
            let args = int_args(1, input)?;
            let port = args[0];
            Ok(if name == "fwd" {
                PolicyExpr::Fwd(port)
            } else {
                PolicyExpr::Xfwd(port)
            })
        }
        "link" => {
            let args = int_args(4, input)?;
            Ok(PolicyExpr::Link {
                switch_out: args[0],
                port_out: args[1],
                switch_in: args[2],
                port_in: args[3],
            })
        }
        "if" => conditional(input),
        _ => Err(ErrMode::from_input(input).cut()),
    }
}

fn conditional(input: &mut &str) -> ModalResult<PolicyExpr> {
    (ws, cut_err('(')).parse_next(input)?;
    let predicate = cut_err(policy).parse_next(input)?;
    (ws, cut_err(',')).parse_next(input)?;
    let then = cut_err(policy).parse_next(input)?;
    let otherwise = opt(preceded((ws, ','), cut_err(policy))).parse_next(input)?;
    (ws, cut_err(')')).parse_next(input)?;
    Ok(PolicyExpr::If {
        predicate: Box::new(predicate),
        then: Box::new(then),
        otherwise: otherwise.map(Box::new),
    })
}

fn primary(input: &mut &str) -> ModalResult<PolicyExpr> {
    ws.parse_next(input)?;
    alt((delimited('(', policy, (ws, cut_err(')'))), call_or_keyword))
        .context(StrContext::Expected(StrContextValue::Description("policy")))
        .parse_next(input)
}

// -- Operators (loosest first: | & >> + - ~) --------------------------------

fn binary(op: BinaryOp, lhs: PolicyExpr, rhs: PolicyExpr) -> PolicyExpr {
    PolicyExpr::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}

fn unary(input: &mut &str) -> ModalResult<PolicyExpr> {
    ws.parse_next(input)?;
    if opt('~').parse_next(input)?.is_some() {
        let inner = cut_err(unary).parse_next(input)?;
        Ok(PolicyExpr::Not(Box::new(inner)))
    } else {
        primary(input)
    }
}

fn additive(input: &mut &str) -> ModalResult<PolicyExpr> {
    let first = unary(input)?;
    let rest: Vec<(BinaryOp, PolicyExpr)> = repeat(
        0..,
        (
            preceded(
                ws,
                alt((
                    '+'.value(BinaryOp::Parallel),
                    '-'.value(BinaryOp::Difference),
                )),
            ),
            cut_err(unary),
        ),
    )
    .parse_next(input)?;
    Ok(rest
        .into_iter()
        .fold(first, |acc, (op, r)| binary(op, acc, r)))
}

fn sequential(input: &mut &str) -> ModalResult<PolicyExpr> {
    let first = additive(input)?;
    let rest: Vec<PolicyExpr> =
        repeat(0.., preceded((ws, ">>"), cut_err(additive))).parse_next(input)?;
    Ok(rest
        .into_iter()
        .fold(first, |acc, r| binary(BinaryOp::Sequential, acc, r)))
}

fn intersection(input: &mut &str) -> ModalResult<PolicyExpr> {
    let first = sequential(input)?;
    let rest: Vec<PolicyExpr> =
        repeat(0.., preceded((ws, '&'), cut_err(sequential))).parse_next(input)?;
    Ok(rest
        .into_iter()
        .fold(first, |acc, r| binary(BinaryOp::Intersection, acc, r)))
}

fn union(input: &mut &str) -> ModalResult<PolicyExpr> {
    let first = intersection(input)?;
    let rest: Vec<PolicyExpr> =
        repeat(0.., preceded((ws, '|'), cut_err(intersection))).parse_next(input)?;
    Ok(rest
        .into_iter()
        .fold(first, |acc, r| binary(BinaryOp::Union, acc, r)))
}

fn policy(input: &mut &str) -> ModalResult<PolicyExpr> {
    ws.parse_next(input)?;
    union(input)
}

// -- Top-level parser -------------------------------------------------------

pub fn parse_policy(input: &mut &str) -> ModalResult<PolicyExpr> {
    let expr = policy(input)?;
    ws.parse_next(input)?;
    Ok(expr)
}
