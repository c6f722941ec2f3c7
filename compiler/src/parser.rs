// Parser for actor machine `.am` source files.
//
// Parses a token stream (from the lexer) into an AST. Uses chumsky
// combinators.
//
// Preconditions: input is a valid token stream from `lexer::lex()`.
// Postconditions: returns an AST plus any parse errors (non-fatal).
// Failure modes: syntax errors produce `Rich` diagnostics; parsing continues.
// Side effects: none.

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;
use chumsky::span::SimpleSpan;

use crate::ast::*;
use crate::lexer::Token;

/// Result of parsing: AST plus any errors.
#[derive(Debug)]
pub struct ParseResult {
    pub file: Option<File>,
    pub errors: Vec<Rich<'static, Token, SimpleSpan>>,
}

/// Parse an `.am` source string. Lexes then parses.
///
/// Returns an AST (if parsing succeeded) plus any errors.
pub fn parse(source: &str) -> ParseResult {
    let lex_result = crate::lexer::lex(source);
    let len = source.len();

    // Convert lexer output to chumsky stream.
    let token_iter = lex_result.tokens.into_iter().map(|(tok, span)| {
        let cspan: SimpleSpan = (span.start..span.end).into();
        (tok, cspan)
    });
    let eoi: SimpleSpan = (len..len).into();
    let stream = Stream::from_iter(token_iter).map(eoi, |(t, s): (_, _)| (t, s));

    let parser = file_parser(source);
    let (file, parse_errors) = parser.parse(stream).into_output_errors();

    // Merge lex errors + parse errors.
    let mut all_errors: Vec<Rich<'static, Token, SimpleSpan>> = lex_result
        .errors
        .into_iter()
        .map(|e| {
            let span: SimpleSpan = (e.span.start..e.span.end).into();
            Rich::custom(span, e.message)
        })
        .collect();
    all_errors.extend(parse_errors.into_iter().map(|e| e.into_owned()));

    ParseResult {
        file,
        errors: all_errors,
    }
}

// ── Main parser builder ──
//
// All grammar rules are built inside `file_parser` so that the `source`
// reference is captured once and shared by all combinators.

fn file_parser<'tokens, 'src: 'tokens, I>(
    source: &'src str,
) -> impl Parser<'tokens, I, File, extra::Err<Rich<'tokens, Token, SimpleSpan>>> + 'src
where
    'tokens: 'src,
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    // ── Terminals ──

    let ident = just(Token::Ident).map_with(move |_, e| {
        let span: SimpleSpan = e.span();
        Ident {
            name: source[span.start()..span.end()].to_string(),
            span,
        }
    });

    let index = select! {
        Token::Int(v) = e => Index { value: v, span: e.span() },
    };

    let string = select! {
        Token::StringLit(s) = e => (s, e.span()),
    };

    let index_list = index
        .clone()
        .separated_by(just(Token::Comma))
        .allow_trailing()
        .collect::<Vec<_>>()
        .delimited_by(just(Token::LBracket), just(Token::RBracket));

    let reads = just(Token::Reads)
        .ignore_then(index_list.clone())
        .or_not()
        .map(Option::unwrap_or_default);

    let kills = just(Token::Kills)
        .ignore_then(index_list.clone())
        .or_not()
        .map(Option::unwrap_or_default);

    // ── Ports ──

    let input_item = just(Token::Input).ignore_then(ident.clone()).map(ItemKind::Input);
    let output_item = just(Token::Output)
        .ignore_then(ident.clone())
        .map(ItemKind::Output);

    // ── scope ──

    let lifetime = choice((
        just(Token::Transient).to(ScopeLifetime::Transient),
        just(Token::Persistent).to(ScopeLifetime::Persistent),
    ));

    let decls = ident
        .clone()
        .separated_by(just(Token::Comma))
        .allow_trailing()
        .collect::<Vec<_>>()
        .delimited_by(just(Token::LParen), just(Token::RParen))
        .or_not()
        .map(Option::unwrap_or_default);

    let scope_item = just(Token::Scope)
        .ignore_then(index.clone())
        .then(lifetime)
        .then(decls)
        .then(reads.clone())
        .map(|(((index, lifetime), declarations), reads)| {
            ItemKind::Scope(ScopeItem {
                index,
                lifetime,
                declarations,
                reads,
            })
        });

    // ── condition ──

    let condition_body = choice((
        just(Token::Tokens)
            .ignore_then(ident.clone())
            .then(index.clone())
            .map(|(port, count)| ConditionBody::Tokens { port, count }),
        just(Token::Space)
            .ignore_then(ident.clone())
            .then(index.clone())
            .map(|(port, count)| ConditionBody::Space { port, count }),
        just(Token::Guard)
            .ignore_then(string.clone())
            .then(reads.clone())
            .map(|((expr, expr_span), reads)| ConditionBody::Guard {
                expr,
                expr_span,
                reads,
            }),
    ));

    let condition_item = just(Token::Condition)
        .ignore_then(index.clone())
        .then_ignore(just(Token::Equals))
        .then(condition_body)
        .map(|(index, body)| ItemKind::Condition(ConditionItem { index, body }));

    // ── transition ──

    let rate = choice((
        just(Token::Consume).to(RateKind::Consume),
        just(Token::Produce).to(RateKind::Produce),
    ))
    .then(ident.clone())
    .then(index.clone())
    .map(|((kind, port), count)| Rate { kind, port, count });

    let transition_item = just(Token::Transition)
        .ignore_then(index.clone())
        .then_ignore(just(Token::Equals))
        .then(string.clone())
        .then(rate.repeated().collect::<Vec<_>>())
        .then(reads.clone())
        .then(kills)
        .then(just(Token::Latency).ignore_then(index.clone()).or_not())
        .map(|(((((index, (body, _)), rates), reads), kills), latency)| {
            ItemKind::Transition(TransitionItem {
                index,
                body,
                rates,
                reads,
                kills,
                latency,
            })
        });

    // ── initial / state ──

    let initial_item = just(Token::Initial).ignore_then(index.clone()).map(ItemKind::Initial);

    let instr = choice((
        just(Token::Test)
            .ignore_then(index.clone())
            .then_ignore(just(Token::Arrow))
            .then(index.clone())
            .then_ignore(just(Token::Else))
            .then(index.clone())
            .map(|((condition, if_true), if_false)| InstrAst::Test {
                condition,
                if_true,
                if_false,
            }),
        just(Token::Wait)
            .ignore_then(just(Token::Arrow))
            .ignore_then(index.clone())
            .map(|target| InstrAst::Wait { target }),
        just(Token::Exec)
            .ignore_then(index.clone())
            .then_ignore(just(Token::Arrow))
            .then(index.clone())
            .map(|(transition, target)| InstrAst::Exec { transition, target }),
    ));

    let state_item = just(Token::State)
        .ignore_then(index.clone())
        .then_ignore(just(Token::Equals))
        .then(instr)
        .map(|(index, instr)| ItemKind::State(StateItem { index, instr }));

    // ── Item dispatch ──

    let item = choice((
        input_item,
        output_item,
        scope_item,
        condition_item,
        transition_item,
        initial_item,
        state_item,
    ))
    .then_ignore(just(Token::Semi))
    .map_with(|kind, e| Item {
        kind,
        span: e.span(),
    });

    // ── Actor / file ──

    let actor = just(Token::Actor)
        .ignore_then(ident)
        .then(
            item.repeated()
                .collect::<Vec<_>>()
                .delimited_by(just(Token::LBrace), just(Token::RBrace)),
        )
        .map_with(|(name, items), e| ActorDef {
            name,
            items,
            span: e.span(),
        });

    actor
        .repeated()
        .collect::<Vec<_>>()
        .map_with(|actors, e| File {
            actors,
            span: e.span(),
        })
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(source: &str) -> File {
        let result = parse(source);
        assert!(
            result.errors.is_empty(),
            "unexpected errors: {:#?}",
            result.errors
        );
        result.file.expect("expected file")
    }

    fn parse_one_item(body: &str) -> ItemKind {
        let file = parse_ok(&format!("actor A {{ {body} }}"));
        assert_eq!(file.actors.len(), 1);
        let actor = file.actors.into_iter().next().unwrap();
        assert_eq!(actor.items.len(), 1, "expected 1 item");
        actor.items.into_iter().next().unwrap().kind
    }

    #[test]
    fn empty_file() {
        assert!(parse_ok("").actors.is_empty());
    }

    #[test]
    fn comment_only_file() {
        assert!(parse_ok("# nothing here\n").actors.is_empty());
    }

    #[test]
    fn actor_name_and_ports() {
        let file = parse_ok("actor Copy { input IN; output OUT; }");
        let actor = &file.actors[0];
        assert_eq!(actor.name.name, "Copy");
        assert!(matches!(&actor.items[0].kind, ItemKind::Input(id) if id.name == "IN"));
        assert!(matches!(&actor.items[1].kind, ItemKind::Output(id) if id.name == "OUT"));
    }

    #[test]
    fn scope_with_decls_and_reads() {
        let ItemKind::Scope(s) = parse_one_item("scope 1 transient (x, y) reads [0];") else {
            panic!("expected Scope")
        };
        assert_eq!(s.index.value, 1);
        assert_eq!(s.lifetime, ScopeLifetime::Transient);
        let names: Vec<&str> = s.declarations.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["x", "y"]);
        assert_eq!(s.reads.len(), 1);
        assert_eq!(s.reads[0].value, 0);
    }

    #[test]
    fn bare_persistent_scope() {
        let ItemKind::Scope(s) = parse_one_item("scope 0 persistent;") else {
            panic!("expected Scope")
        };
        assert_eq!(s.lifetime, ScopeLifetime::Persistent);
        assert!(s.declarations.is_empty());
        assert!(s.reads.is_empty());
    }

    #[test]
    fn port_conditions() {
        let ItemKind::Condition(c) = parse_one_item("condition 0 = tokens IN 2;") else {
            panic!("expected Condition")
        };
        assert!(matches!(
            c.body,
            ConditionBody::Tokens { ref port, count } if port.name == "IN" && count.value == 2
        ));

        let ItemKind::Condition(c) = parse_one_item("condition 1 = space OUT 1;") else {
            panic!("expected Condition")
        };
        assert!(matches!(c.body, ConditionBody::Space { .. }));
    }

    #[test]
    fn guard_condition_with_reads() {
        let ItemKind::Condition(c) = parse_one_item(r#"condition 2 = guard "x > 0" reads [1];"#)
        else {
            panic!("expected Condition")
        };
        let ConditionBody::Guard { expr, reads, .. } = c.body else {
            panic!("expected Guard")
        };
        assert_eq!(expr, "x > 0");
        assert_eq!(reads[0].value, 1);
    }

    #[test]
    fn transition_with_all_clauses() {
        let ItemKind::Transition(t) = parse_one_item(
            r#"transition 0 = "copy" consume IN 1 produce OUT 2 reads [0] kills [1] latency 3;"#,
        ) else {
            panic!("expected Transition")
        };
        assert_eq!(t.body, "copy");
        assert_eq!(t.rates.len(), 2);
        assert_eq!(t.rates[0].kind, RateKind::Consume);
        assert_eq!(t.rates[1].kind, RateKind::Produce);
        assert_eq!(t.rates[1].count.value, 2);
        assert_eq!(t.reads.len(), 1);
        assert_eq!(t.kills.len(), 1);
        assert_eq!(t.latency.map(|l| l.value), Some(3));
    }

    #[test]
    fn minimal_transition() {
        let ItemKind::Transition(t) = parse_one_item(r#"transition 0 = "tick";"#) else {
            panic!("expected Transition")
        };
        assert!(t.rates.is_empty());
        assert!(t.latency.is_none());
    }

    #[test]
    fn instructions() {
        let ItemKind::State(s) = parse_one_item("state 0 = test 1 -> 2 else 3;") else {
            panic!("expected State")
        };
        assert!(matches!(
            s.instr,
            InstrAst::Test { condition, if_true, if_false }
                if condition.value == 1 && if_true.value == 2 && if_false.value == 3
        ));

        let ItemKind::State(s) = parse_one_item("state 4 = wait -> 0;") else {
            panic!("expected State")
        };
        assert!(matches!(s.instr, InstrAst::Wait { target } if target.value == 0));

        let ItemKind::State(s) = parse_one_item("state 5 = exec 0 -> 1;") else {
            panic!("expected State")
        };
        assert!(matches!(s.instr, InstrAst::Exec { transition, target }
            if transition.value == 0 && target.value == 1));
    }

    #[test]
    fn initial_item() {
        assert!(matches!(parse_one_item("initial 3;"), ItemKind::Initial(i) if i.value == 3));
    }

    #[test]
    fn two_actors() {
        let file = parse_ok("actor A { initial 0; } actor B { initial 0; }");
        assert_eq!(file.actors.len(), 2);
        assert_eq!(file.actors[1].name.name, "B");
    }

    #[test]
    fn missing_semicolon_is_an_error() {
        let result = parse("actor A { input IN }");
        assert!(!result.errors.is_empty());
    }

    #[test]
    fn lex_errors_are_merged() {
        let result = parse("actor A { input I$N; }");
        assert!(!result.errors.is_empty());
    }
}
