use std::sync::Arc;

use crate::ast::BinaryOp;
use crate::ast::FilterArg;
use crate::ast::Node;
use crate::tokens::Operator;
use crate::tokens::Token;

/// Iteration cap for the filter-argument and access-chain loops.
const LOOP_SAFETY: usize = 64;

/// Deepest tree the parser builds. Past it the innermost operand is
/// [`Node::Null`] and the remaining tokens are discarded, so neither parsing
/// nor walking and dropping the tree can exhaust the stack.
pub const MAX_NESTING: usize = 64;

/// Parse a token stream into an expression tree.
///
/// Parsing never fails. Malformed input yields a partial tree: a dangling `|`
/// ends the filter chain, a dangling `.` ends the access chain and a missing
/// operand becomes [`Node::Null`]. Tokens left over after the top-level
/// expression are ignored, and so is everything nested deeper than
/// [`MAX_NESTING`].
pub fn parse(tokens: &[Token]) -> Node {
	Parser::new(tokens).expression()
}

/// Recursive-descent cursor over a borrowed token slice.
///
/// A fresh parser is created for every parse, so nested evaluations never
/// share cursor state.
struct Parser<'a> {
	tokens: &'a [Token],
	pos: usize,
	/// Depth of the node under construction, counted from the root.
	depth: usize,
}

impl<'a> Parser<'a> {
	fn new(tokens: &'a [Token]) -> Self {
		Self {
			tokens,
			pos: 0,
			depth: 0,
		}
	}

	/// Go one level deeper. Returns `false`, and abandons the rest of the
	/// input, once the nesting cap is passed. Every call is paired with
	/// [`Parser::leave`].
	fn enter(&mut self) -> bool {
		self.depth += 1;

		if self.depth > MAX_NESTING {
			self.pos = self.tokens.len();
			return false;
		}

		true
	}

	fn leave(&mut self, levels: usize) {
		self.depth = self.depth.saturating_sub(levels);
	}

	fn peek(&self) -> Option<&'a Token> {
		self.tokens.get(self.pos)
	}

	fn peek_next(&self) -> Option<&'a Token> {
		self.tokens.get(self.pos + 1)
	}

	/// Consume the current token when it is the given operator.
	fn eat(&mut self, op: Operator) -> bool {
		if self.peek().is_some_and(|token| token.is_op(op)) {
			self.pos += 1;
			return true;
		}

		false
	}

	/// Consume the first of the given operators that matches the current
	/// token.
	fn eat_any(&mut self, ops: &[Operator]) -> Option<Operator> {
		ops.iter().copied().find(|op| self.eat(*op))
	}

	fn ident(&mut self) -> Option<String> {
		match self.peek() {
			Some(Token::Ident(name)) => {
				self.pos += 1;
				Some(name.clone())
			}
			_ => None,
		}
	}

	/// Whether the argument loop of a filter should stop at the current
	/// token.
	fn at_argument_boundary(&self) -> bool {
		match self.peek() {
			None => true,
			Some(token) => {
				token.is_op(Operator::Pipe)
					|| token.is_op(Operator::ParenClose)
					|| token.is_op(Operator::BracketClose)
			}
		}
	}

	/// `ternary ( '|' ident argument* )*`
	fn expression(&mut self) -> Node {
		let mut node = self.ternary();
		let mut levels = 0;

		while self.eat(Operator::Pipe) {
			let Some(name) = self.ident() else {
				break;
			};

			levels += 1;
			if !self.enter() {
				break;
			}

			let args = self.filter_args();

			node = Node::Filter {
				input: Arc::new(node),
				name,
				args,
			};
		}

		self.leave(levels);
		node
	}

	fn filter_args(&mut self) -> Vec<FilterArg> {
		let mut args = Vec::new();
		let mut iterations = 0;

		while !self.at_argument_boundary() {
			let before = self.pos;

			if self.eat(Operator::Comma) {
				continue;
			}

			let named = matches!(self.peek(), Some(Token::Ident(_) | Token::Str(_)))
				&& self.peek_next().is_some_and(|token| token.is_op(Operator::Assign));

			if named {
				let name = match self.peek() {
					Some(Token::Ident(value) | Token::Str(value)) => Some(value.clone()),
					_ => None,
				};
				self.pos += 2;
				args.push(FilterArg {
					name,
					value: self.ternary(),
				});
			} else {
				args.push(FilterArg {
					name: None,
					value: self.ternary(),
				});
			}

			iterations += 1;

			if self.pos == before {
				// Nothing was consumed: drop the placeholder and skip the stuck token.
				args.pop();
				self.pos += 1;
				break;
			}

			if iterations > LOOP_SAFETY {
				break;
			}
		}

		args
	}

	/// `or ( '?' ternary ':' ternary )?`
	fn ternary(&mut self) -> Node {
		let condition = self.or();

		if !self.eat(Operator::Question) {
			return condition;
		}

		let entered = self.enter();
		let (then, otherwise) = if entered {
			let then = self.ternary();
			self.eat(Operator::Colon);
			(then, self.ternary())
		} else {
			(Node::Null, Node::Null)
		};
		self.leave(1);

		Node::Ternary {
			condition: Arc::new(condition),
			then: Arc::new(then),
			otherwise: Arc::new(otherwise),
		}
	}

	fn or(&mut self) -> Node {
		self.binary(&[Operator::Or], Self::and)
	}

	fn and(&mut self) -> Node {
		self.binary(&[Operator::And], Self::equality)
	}

	fn equality(&mut self) -> Node {
		self.binary(&[Operator::Eq, Operator::NotEq], Self::relational)
	}

	fn relational(&mut self) -> Node {
		self.binary(
			&[Operator::Lt, Operator::Gt, Operator::Lte, Operator::Gte],
			Self::additive,
		)
	}

	fn additive(&mut self) -> Node {
		self.binary(&[Operator::Plus, Operator::Minus], Self::multiplicative)
	}

	fn multiplicative(&mut self) -> Node {
		self.binary(
			&[Operator::Star, Operator::Slash, Operator::Percent],
			Self::access,
		)
	}

	/// Left-associative binary level: `operand ( op operand )*`.
	fn binary(&mut self, ops: &[Operator], operand: fn(&mut Self) -> Node) -> Node {
		let mut left = operand(self);
		let mut levels = 0;

		while let Some(op) = self.eat_any(ops) {
			levels += 1;
			if !self.enter() {
				break;
			}

			let right = operand(self);
			let Some(op) = BinaryOp::from_operator(op) else {
				break;
			};

			left = Node::Binary {
				op,
				left: Arc::new(left),
				right: Arc::new(right),
			};
		}

		self.leave(levels);
		left
	}

	/// `atom ( '.' ident | '[' expression ']' )*`
	fn access(&mut self) -> Node {
		let mut node = self.atom();
		let mut levels = 0;

		for _ in 0..LOOP_SAFETY {
			let continues = self
				.peek()
				.is_some_and(|token| token.is_op(Operator::Dot) || token.is_op(Operator::BracketOpen));
			if !continues {
				break;
			}

			levels += 1;
			if !self.enter() {
				break;
			}

			if self.eat(Operator::Dot) {
				let Some(key) = self.ident() else {
					break;
				};

				node = Node::Get {
					target: Arc::new(node),
					key,
				};
			} else if self.eat(Operator::BracketOpen) {
				let key = self.expression();
				self.eat(Operator::BracketClose);

				node = Node::GetDyn {
					target: Arc::new(node),
					key: Arc::new(key),
				};
			} else {
				break;
			}
		}

		self.leave(levels);
		node
	}

	fn atom(&mut self) -> Node {
		if self.eat(Operator::ParenOpen) {
			let node = if self.enter() {
				self.expression()
			} else {
				Node::Null
			};
			self.leave(1);
			self.eat(Operator::ParenClose);
			return node;
		}

		if self.eat(Operator::Bang) {
			let node = if self.enter() {
				Node::Not(Arc::new(self.access()))
			} else {
				Node::Null
			};
			self.leave(1);
			return node;
		}

		let node = match self.peek() {
			Some(Token::Ident(name)) => Node::Var(name.clone()),
			Some(Token::Str(value)) => Node::Str(value.clone()),
			Some(Token::Num(value)) => Node::Num(*value),
			Some(Token::Bool(value)) => Node::Bool(*value),
			Some(Token::Null) => Node::Null,
			Some(Token::Op(_)) | None => return Node::Null,
		};

		self.pos += 1;
		node
	}
}
