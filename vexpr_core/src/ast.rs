use std::fmt::Display;
use std::sync::Arc;

use crate::tokens::Operator;

/// A node in the immutable expression tree.
///
/// Nodes are built once per distinct source text and shared from the
/// [`AstCache`](crate::AstCache) behind an [`Arc`], so nothing here is ever
/// mutated after parsing.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
	Str(String),
	Num(f64),
	Bool(bool),
	Null,
	/// A root variable such as `post` or `user`.
	Var(String),
	/// Static member access: `target.key`.
	Get { target: Arc<Node>, key: String },
	/// Dynamic member access: `target[key]`.
	GetDyn { target: Arc<Node>, key: Arc<Node> },
	/// Logical negation. `!` is the only unary operator.
	Not(Arc<Node>),
	Binary {
		op: BinaryOp,
		left: Arc<Node>,
		right: Arc<Node>,
	},
	Ternary {
		condition: Arc<Node>,
		then: Arc<Node>,
		otherwise: Arc<Node>,
	},
	Filter {
		input: Arc<Node>,
		name: String,
		args: Vec<FilterArg>,
	},
}

impl Node {
	/// The stable textual path of a static access chain, e.g. `post.meta.color`.
	///
	/// Returns `None` when the chain is not rooted at a variable or passes
	/// through a dynamic access.
	pub fn path(&self) -> Option<String> {
		match self {
			Node::Var(name) => Some(name.clone()),
			Node::Get { target, key } => target.path().map(|base| format!("{base}.{key}")),
			_ => None,
		}
	}
}

/// A single filter argument. Named arguments are written `name = value`.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterArg {
	pub name: Option<String>,
	pub value: Node,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
	Or,
	And,
	Eq,
	NotEq,
	Lt,
	Gt,
	Lte,
	Gte,
	Add,
	Sub,
	Mul,
	Div,
	Mod,
}

impl BinaryOp {
	pub(crate) fn from_operator(op: Operator) -> Option<Self> {
		let binary = match op {
			Operator::Or => Self::Or,
			Operator::And => Self::And,
			Operator::Eq => Self::Eq,
			Operator::NotEq => Self::NotEq,
			Operator::Lt => Self::Lt,
			Operator::Gt => Self::Gt,
			Operator::Lte => Self::Lte,
			Operator::Gte => Self::Gte,
			Operator::Plus => Self::Add,
			Operator::Minus => Self::Sub,
			Operator::Star => Self::Mul,
			Operator::Slash => Self::Div,
			Operator::Percent => Self::Mod,
			_ => return None,
		};

		Some(binary)
	}
}

impl Display for BinaryOp {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let symbol = match self {
			Self::Or => "||",
			Self::And => "&&",
			Self::Eq => "==",
			Self::NotEq => "!=",
			Self::Lt => "<",
			Self::Gt => ">",
			Self::Lte => "<=",
			Self::Gte => ">=",
			Self::Add => "+",
			Self::Sub => "-",
			Self::Mul => "*",
			Self::Div => "/",
			Self::Mod => "%",
		};

		write!(f, "{symbol}")
	}
}
