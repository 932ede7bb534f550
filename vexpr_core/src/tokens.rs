use std::fmt::Display;

use float_cmp::approx_eq;

/// A single lexical unit of an expression.
///
/// Whitespace is never represented; the tokenizer drops it along with any
/// character it does not recognize.
#[derive(Debug, Clone)]
pub enum Token {
	/// An operator or punctuation mark, e.g. `|`, `==`, `[`.
	Op(Operator),
	/// A quoted string with escaped delimiters already unescaped.
	Str(String),
	/// A numeric literal, e.g. `42` or `3.14`.
	Num(f64),
	/// `true` or `false`, in any letter case.
	Bool(bool),
	/// `null`, in any letter case.
	Null,
	/// An identifier, e.g. `post` or `upper`.
	Ident(String),
}

impl Eq for Token {}
impl PartialEq for Token {
	fn eq(&self, other: &Self) -> bool {
		match (self, other) {
			(Token::Op(op), Token::Op(other_op)) => op == other_op,
			(Token::Str(value), Token::Str(other_value))
			| (Token::Ident(value), Token::Ident(other_value)) => value == other_value,
			(Token::Num(value), Token::Num(other_value)) => {
				approx_eq!(f64, *value, *other_value, ulps = 2)
			}
			(Token::Bool(value), Token::Bool(other_value)) => value == other_value,
			(Token::Null, Token::Null) => true,
			_ => false,
		}
	}
}

impl Token {
	pub fn kind(&self) -> TokenKind {
		match self {
			Token::Op(_) => TokenKind::Op,
			Token::Str(_) => TokenKind::Str,
			Token::Num(_) => TokenKind::Num,
			Token::Bool(_) => TokenKind::Bool,
			Token::Null => TokenKind::Null,
			Token::Ident(_) => TokenKind::Ident,
		}
	}

	/// Returns true when this token is exactly the given operator.
	pub fn is_op(&self, op: Operator) -> bool {
		matches!(self, Token::Op(current) if *current == op)
	}
}

impl Display for Token {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Token::Op(op) => write!(f, "{op}"),
			Token::Str(value) => write!(f, "{value:?}"),
			Token::Num(value) => write!(f, "{value}"),
			Token::Bool(value) => write!(f, "{value}"),
			Token::Null => write!(f, "null"),
			Token::Ident(ident) => write!(f, "{ident}"),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
	Op,
	Str,
	Num,
	Bool,
	Null,
	Ident,
}

impl Display for TokenKind {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Op => write!(f, "OP"),
			Self::Str => write!(f, "STR"),
			Self::Num => write!(f, "NUM"),
			Self::Bool => write!(f, "BOOL"),
			Self::Null => write!(f, "NULL"),
			Self::Ident => write!(f, "ID"),
		}
	}
}

/// Operators and punctuation recognized by the tokenizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
	/// `==`
	Eq,
	/// `!=`
	NotEq,
	/// `>=`
	Gte,
	/// `<=`
	Lte,
	/// `&&`
	And,
	/// `||`
	Or,
	/// `|`
	Pipe,
	/// `(`
	ParenOpen,
	/// `)`
	ParenClose,
	/// `.`
	Dot,
	/// `[`
	BracketOpen,
	/// `]`
	BracketClose,
	/// `,`
	Comma,
	/// `?`
	Question,
	/// `:`
	Colon,
	/// `=`
	Assign,
	/// `+`
	Plus,
	/// `-`
	Minus,
	/// `*`
	Star,
	/// `/`
	Slash,
	/// `%`
	Percent,
	/// `>`
	Gt,
	/// `!`
	Bang,
	/// `<`
	Lt,
}

impl Operator {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Eq => "==",
			Self::NotEq => "!=",
			Self::Gte => ">=",
			Self::Lte => "<=",
			Self::And => "&&",
			Self::Or => "||",
			Self::Pipe => "|",
			Self::ParenOpen => "(",
			Self::ParenClose => ")",
			Self::Dot => ".",
			Self::BracketOpen => "[",
			Self::BracketClose => "]",
			Self::Comma => ",",
			Self::Question => "?",
			Self::Colon => ":",
			Self::Assign => "=",
			Self::Plus => "+",
			Self::Minus => "-",
			Self::Star => "*",
			Self::Slash => "/",
			Self::Percent => "%",
			Self::Gt => ">",
			Self::Bang => "!",
			Self::Lt => "<",
		}
	}
}

impl Display for Operator {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}
