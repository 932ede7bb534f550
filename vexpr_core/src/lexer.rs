use logos::Lexer;
use logos::Logos;

use crate::tokens::Operator;
use crate::tokens::Token;

/// Raw tokens produced by logos. Two-character operators win over their
/// single-character prefixes because logos always takes the longest match.
#[derive(Logos, Debug, PartialEq)]
#[logos(skip r"[ \t\r\n\x0B\x0C]+")]
enum RawToken {
	#[token("==", |_| Operator::Eq)]
	#[token("!=", |_| Operator::NotEq)]
	#[token(">=", |_| Operator::Gte)]
	#[token("<=", |_| Operator::Lte)]
	#[token("&&", |_| Operator::And)]
	#[token("||", |_| Operator::Or)]
	#[token("|", |_| Operator::Pipe)]
	#[token("(", |_| Operator::ParenOpen)]
	#[token(")", |_| Operator::ParenClose)]
	#[token(".", |_| Operator::Dot)]
	#[token("[", |_| Operator::BracketOpen)]
	#[token("]", |_| Operator::BracketClose)]
	#[token(",", |_| Operator::Comma)]
	#[token("?", |_| Operator::Question)]
	#[token(":", |_| Operator::Colon)]
	#[token("=", |_| Operator::Assign)]
	#[token("+", |_| Operator::Plus)]
	#[token("-", |_| Operator::Minus)]
	#[token("*", |_| Operator::Star)]
	#[token("/", |_| Operator::Slash)]
	#[token("%", |_| Operator::Percent)]
	#[token(">", |_| Operator::Gt)]
	#[token("!", |_| Operator::Bang)]
	#[token("<", |_| Operator::Lt)]
	Op(Operator),
	#[token("\"", |lex| quoted(lex, b'"'))]
	#[token("'", |lex| quoted(lex, b'\''))]
	Quoted(String),
	#[regex(r"[0-9][0-9.]*")]
	Number,
	#[regex(r"[a-zA-Z_][a-zA-Z0-9_]*")]
	Ident,
}

/// Consume a quoted string after its opening delimiter.
///
/// A delimiter closes the string only when preceded by an even run of
/// backslashes. An unterminated string runs to the end of the input.
fn quoted(lex: &mut Lexer<'_, RawToken>, delimiter: u8) -> String {
	let remainder = lex.remainder();
	let bytes = remainder.as_bytes();
	let mut cursor = 0;

	while cursor < bytes.len() {
		if bytes[cursor] == delimiter {
			let backslashes = bytes[..cursor]
				.iter()
				.rev()
				.take_while(|byte| **byte == b'\\')
				.count();

			if backslashes % 2 == 0 {
				break;
			}
		}
		cursor += 1;
	}

	let inner = &remainder[..cursor];
	lex.bump((cursor + 1).min(bytes.len()));

	let delimiter = delimiter as char;
	inner.replace(&format!("\\{delimiter}"), &delimiter.to_string())
}

/// Parse the longest prefix of a digits-and-dots run that is a valid float,
/// so `1.2.3` reads as `1.2`.
pub(crate) fn leading_float(slice: &str) -> f64 {
	(1..=slice.len())
		.rev()
		.find_map(|end| slice[..end].parse::<f64>().ok())
		.unwrap_or(0.0)
}

/// Convert raw expression text into a flat token stream.
///
/// Tokenization never fails: whitespace and unrecognized characters are
/// dropped.
pub fn tokenize(source: &str) -> Vec<Token> {
	let mut lexer = RawToken::lexer(source);
	let mut tokens = Vec::new();

	while let Some(result) = lexer.next() {
		let Ok(raw) = result else {
			continue;
		};

		let token = match raw {
			RawToken::Op(op) => Token::Op(op),
			RawToken::Quoted(value) => Token::Str(value),
			RawToken::Number => Token::Num(leading_float(lexer.slice())),
			RawToken::Ident => {
				let ident = lexer.slice();
				if ident.eq_ignore_ascii_case("true") {
					Token::Bool(true)
				} else if ident.eq_ignore_ascii_case("false") {
					Token::Bool(false)
				} else if ident.eq_ignore_ascii_case("null") {
					Token::Null
				} else {
					Token::Ident(ident.to_string())
				}
			}
		};

		tokens.push(token);
	}

	tokens
}
