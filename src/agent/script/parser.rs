//! Behavior script parser.
use crate::agent::error::Error;
use crate::agent::script::{Expr, Handler, HandlerPair, Stmt};
use chumsky::prelude::*;
use chumsky::Parser;
use itertools::Itertools;

type Err<'a> = extra::Err<Rich<'a, char>>;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Section {
    Enter,
    Leave,
}

fn ident<'a>() -> impl Parser<'a, &'a str, String, Err<'a>> + Clone {
    text::ascii::ident()
        .map(|s: &str| s.to_string())
        .labelled("identifier")
}

fn string<'a>() -> impl Parser<'a, &'a str, String, Err<'a>> + Clone {
    let escape = just('\\').ignore_then(choice((
        just('\\'),
        just('"'),
        just('n').to('\n'),
        just('t').to('\t'),
    )));

    none_of("\\\"")
        .or(escape)
        .repeated()
        .collect::<String>()
        .delimited_by(just('"'), just('"'))
        .labelled("string")
}

fn integer<'a>() -> impl Parser<'a, &'a str, i64, Err<'a>> + Clone {
    just('-')
        .or_not()
        .then(text::int(10))
        .to_slice()
        .try_map(|s: &str, span| s.parse::<i64>().map_err(|e| Rich::custom(span, e)))
        .labelled("integer")
}

fn index<'a>() -> impl Parser<'a, &'a str, usize, Err<'a>> + Clone {
    text::int(10)
        .try_map(|s: &str, span| s.parse::<usize>().map_err(|e| Rich::custom(span, e)))
        .labelled("argument index")
}

fn expr<'a>() -> impl Parser<'a, &'a str, Expr, Err<'a>> + Clone {
    recursive(|expr| {
        let op = |c| just(c).padded();

        let arg = just("args")
            .ignore_then(index().padded().delimited_by(op('['), op(']')))
            .map(Expr::Arg);
        let state = just("state")
            .ignore_then(op('.'))
            .ignore_then(ident())
            .map(Expr::State);
        let param = just("params")
            .ignore_then(op('.'))
            .ignore_then(ident())
            .map(Expr::Param);

        let term = choice((
            string().map(Expr::Str),
            integer().map(Expr::Int),
            arg,
            state,
            param,
            just("retval").to(Expr::Retval),
            just("name").to(Expr::Name),
            expr.delimited_by(op('('), op(')')),
        ))
        .padded();

        term.clone().foldl(op('+').ignore_then(term).repeated(), |lhs, rhs| {
            Expr::Add(Box::new(lhs), Box::new(rhs))
        })
    })
}

fn statement<'a>() -> impl Parser<'a, &'a str, Stmt, Err<'a>> + Clone {
    let op = |c| just(c).padded();

    let log = just("log")
        .ignore_then(
            expr()
                .separated_by(op(','))
                .collect::<Vec<_>>()
                .delimited_by(op('('), op(')')),
        )
        .map(Stmt::Log);
    let set_state = just("state")
        .ignore_then(op('.'))
        .ignore_then(ident())
        .then_ignore(op('='))
        .then(expr())
        .map(|(key, value)| Stmt::SetState(key, value));
    let r#return = just("return").ignore_then(expr()).map(Stmt::Return);
    let throw = just("throw").ignore_then(expr()).map(Stmt::Throw);
    let raise = just("raise").ignore_then(expr()).map(Stmt::Raise);

    choice((log, set_state, r#return, throw, raise))
        .padded()
        .then_ignore(op(';'))
        .labelled("statement")
}

fn statements<'a>() -> impl Parser<'a, &'a str, Vec<Stmt>, Err<'a>> + Clone {
    statement().repeated().collect::<Vec<_>>()
}

fn behavior<'a>() -> impl Parser<'a, &'a str, HandlerPair, Err<'a>> {
    let op = |c| just(c).padded();

    let section = choice((
        just("enter").to(Section::Enter),
        just("leave").to(Section::Leave),
    ))
    .padded()
    .then(statements().delimited_by(op('{'), op('}')))
    .labelled("enter or leave section");

    section
        .repeated()
        .collect::<Vec<_>>()
        .padded()
        .then_ignore(end())
        .map(|sections| {
            let mut enter = vec![];
            let mut leave = vec![];
            for (section, body) in sections {
                match section {
                    Section::Enter => enter.extend(body),
                    Section::Leave => leave.extend(body),
                }
            }
            HandlerPair {
                on_enter: Handler::new(enter),
                on_leave: Handler::new(leave),
            }
        })
}

fn errors_to_string(errors: Vec<Rich<'_, char>>) -> String {
    errors.iter().map(|e| e.to_string()).join("; ")
}

/// Parse a behavior script, repeated sections are concatenated.
pub fn parse_behavior(source: &str) -> Result<HandlerPair, Error> {
    behavior()
        .parse(source)
        .into_result()
        .map_err(|e| Error::ScriptParsing(errors_to_string(e)))
}

/// Parse an initialization script (statements without sections).
pub fn parse_init(source: &str) -> Result<Vec<Stmt>, Error> {
    statements()
        .padded()
        .then_ignore(end())
        .parse(source)
        .into_result()
        .map_err(|e| Error::ScriptParsing(errors_to_string(e)))
}
