use std::cmp::Ordering;

use crate::ast::BinaryOp;
use crate::ast::Node;
use crate::context::Resolution;
use crate::engine::Engine;
use crate::error::VexprResult;
use crate::library::FilterArgs;
use crate::value::Value;

impl Engine {
	/// Evaluate expression source text (without `{{ }}` delimiters).
	///
	/// Text without any tokens evaluates to `null`.
	pub(crate) fn evaluate_source(&mut self, source: &str, depth: usize) -> VexprResult<Value> {
		let Some(node) = self.cache.get_or_parse(source) else {
			return Ok(Value::Null);
		};

		self.run(&node, depth)
	}

	/// Interpret one node. Past the depth cap every node is `null`.
	pub(crate) fn run(&mut self, node: &Node, depth: usize) -> VexprResult<Value> {
		if depth > self.limits.max_depth {
			tracing::debug!(depth, "evaluation depth cap reached");
			return Ok(Value::Null);
		}

		let next = depth + 1;

		match node {
			Node::Str(text) => self.interpolate(text, next),
			Node::Num(value) => Ok(Value::Number(*value)),
			Node::Bool(value) => Ok(Value::Bool(*value)),
			Node::Null => Ok(Value::Null),
			Node::Var(name) => self.resolve_root(name, next),
			Node::Get { target, key } => {
				let Some(path) = node.path() else {
					let target = self.run(target, next)?;
					return self.resolve_member(&target, &Value::from(key.as_str()), next);
				};

				if self.context.is_resolving(&path) {
					tracing::debug!(path, "resolution cycle");
					return Ok(Value::String(String::new()));
				}

				self.context.push_resolution(path.as_str());
				let result = self.run(target, next).and_then(|target| {
					self.resolve_member(&target, &Value::from(key.as_str()), next)
				});
				self.context.pop_resolution(&path);

				result
			}
			Node::GetDyn { target, key } => {
				let target = self.run(target, next)?;
				let key = self.run(key, next)?;
				self.resolve_member(&target, &key, next)
			}
			Node::Not(operand) => Ok(Value::Bool(!self.run(operand, next)?.is_truthy())),
			Node::Ternary {
				condition,
				then,
				otherwise,
			} => {
				if self.run(condition, next)?.is_truthy() {
					self.run(then, next)
				} else {
					self.run(otherwise, next)
				}
			}
			Node::Binary { op, left, right } => {
				let left = self.run(left, next)?;

				match op {
					BinaryOp::And if !left.is_truthy() => return Ok(Value::Bool(false)),
					BinaryOp::Or if left.is_truthy() => return Ok(Value::Bool(true)),
					BinaryOp::And | BinaryOp::Or => {
						return Ok(Value::Bool(self.run(right, next)?.is_truthy()));
					}
					_ => {}
				}

				let right = self.run(right, next)?;
				Ok(self.binary(*op, &left, &right))
			}
			Node::Filter { input, name, args } => {
				let input = self.run(input, next)?;

				if name == "render" {
					return Ok(self.render_value(input));
				}

				let mut evaluated = FilterArgs::default();
				for arg in args {
					let value = self.run(&arg.value, next)?;
					match &arg.name {
						Some(name) => evaluated.named.push((name.clone(), value)),
						None => evaluated.positional.push(value),
					}
				}

				self.apply_filter(name, input, &evaluated, next)
			}
		}
	}

	/// Resolve a root variable. Root aliases are guarded by their name on the
	/// resolution stack, so an alias that refers to itself yields empty text.
	fn resolve_root(&mut self, name: &str, depth: usize) -> VexprResult<Value> {
		match self.context.get(name)? {
			Resolution::Value(value) => Ok(value),
			computed @ Resolution::Computed { .. } => {
				if self.context.is_resolving(name) {
					tracing::debug!(root = name, "resolution cycle");
					return Ok(Value::String(String::new()));
				}

				self.context.push_resolution(name);
				let result = self.settle(computed, depth);
				self.context.pop_resolution(name);

				result
			}
		}
	}

	fn resolve_member(&mut self, target: &Value, key: &Value, depth: usize) -> VexprResult<Value> {
		let resolution = self.context.access(target, key)?;
		self.settle(resolution, depth)
	}

	/// Turn a resolution into a value, evaluating computed aliases with `this`
	/// bound to their target.
	pub(crate) fn settle(&mut self, resolution: Resolution, depth: usize) -> VexprResult<Value> {
		match resolution {
			Resolution::Value(value) => Ok(value),
			Resolution::Computed { expression, this } => {
				self.context.push_this(this);
				let result = self.evaluate_source(&expression, depth);
				self.context.pop_this();

				result
			}
		}
	}

	/// Substitute every `{expr}` not preceded by a backslash with the string
	/// form of its value. `\{` becomes a literal `{`.
	fn interpolate(&mut self, text: &str, depth: usize) -> VexprResult<Value> {
		if !text.contains('{') {
			return Ok(Value::String(text.to_string()));
		}

		let mut output = String::with_capacity(text.len());
		let mut rest = text;

		while let Some(open) = rest.find('{') {
			let escaped = rest[..open].ends_with('\\');
			let close = rest[open + 1..].find('}').map(|offset| open + 1 + offset);

			match close {
				Some(close) if !escaped => {
					output.push_str(&rest[..open].replace("\\{", "{"));
					let value = self.evaluate_source(&rest[open + 1..close], depth)?;
					output.push_str(&value.to_safe_string(self.debug));
					rest = &rest[close + 1..];
				}
				_ => {
					output.push_str(&rest[..=open].replace("\\{", "{"));
					rest = &rest[open + 1..];
				}
			}
		}

		output.push_str(&rest.replace("\\{", "{"));
		Ok(Value::String(output))
	}

	fn binary(&self, op: BinaryOp, left: &Value, right: &Value) -> Value {
		match op {
			BinaryOp::Add if left.is_non_numeric_string() || right.is_non_numeric_string() => {
				let mut joined = left.to_safe_string(self.debug);
				joined.push_str(&right.to_safe_string(self.debug));
				Value::String(joined)
			}
			BinaryOp::Add => Value::Number(left.to_number() + right.to_number()),
			BinaryOp::Sub => Value::Number(left.to_number() - right.to_number()),
			BinaryOp::Mul => Value::Number(left.to_number() * right.to_number()),
			BinaryOp::Div => {
				let divisor = right.to_number();
				if divisor == 0.0 {
					Value::Number(0.0)
				} else {
					Value::Number(left.to_number() / divisor)
				}
			}
			BinaryOp::Mod => {
				let divisor = right.to_integer();
				if divisor == 0 {
					Value::Number(0.0)
				} else {
					Value::from(left.to_integer().wrapping_rem(divisor))
				}
			}
			BinaryOp::Eq => Value::Bool(left.loose_eq(right)),
			BinaryOp::NotEq => Value::Bool(!left.loose_eq(right)),
			BinaryOp::Lt => Value::Bool(left.loose_cmp(right) == Some(Ordering::Less)),
			BinaryOp::Gt => Value::Bool(left.loose_cmp(right) == Some(Ordering::Greater)),
			BinaryOp::Lte => {
				Value::Bool(matches!(
					left.loose_cmp(right),
					Some(Ordering::Less | Ordering::Equal)
				))
			}
			BinaryOp::Gte => {
				Value::Bool(matches!(
					left.loose_cmp(right),
					Some(Ordering::Greater | Ordering::Equal)
				))
			}
			BinaryOp::And => Value::Bool(left.is_truthy() && right.is_truthy()),
			BinaryOp::Or => Value::Bool(left.is_truthy() || right.is_truthy()),
		}
	}

	/// The native `render` filter: strings holding a span are scanned again,
	/// everything else passes through.
	fn render_value(&mut self, input: Value) -> Value {
		match input {
			Value::String(text) if text.contains("{{") => Value::String(self.scan(&text)),
			other => other,
		}
	}
}
