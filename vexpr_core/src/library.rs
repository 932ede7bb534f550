use crate::date::format_date;
use crate::engine::Engine;
use crate::error::VexprError;
use crate::error::VexprResult;
use crate::html::esc_attr;
use crate::html::esc_html;
use crate::meta::MetaProxy;
use crate::value::SafeString;
use crate::value::Value;
use crate::value::is_numeric_str;
use crate::value::leading_number;

/// Built-in filters. Names not listed here go to
/// [`Hooks::apply_unknown_filter`](crate::Hooks::apply_unknown_filter).
///
/// `render` is not a library filter: the evaluator handles it because it
/// re-enters the template scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Filter {
	Upper,
	Lower,
	Capitalize,
	Default,
	If,
	Match,
	Map,
	Join,
	Truncate,
	Trim,
	Replace,
	Kebab,
	Prop,
	GetPost,
	GetUser,
	GetMeta,
	Date,
	EscHtml,
	EscAttr,
	Raw,
}

impl Filter {
	pub fn from_name(name: &str) -> Option<Self> {
		let filter = match name {
			"upper" | "uppercase" => Self::Upper,
			"lower" | "lowercase" => Self::Lower,
			"capitalize" | "upper_first" => Self::Capitalize,
			"default" => Self::Default,
			"if" => Self::If,
			"match" => Self::Match,
			"map" => Self::Map,
			"join" => Self::Join,
			"truncate" => Self::Truncate,
			"trim" => Self::Trim,
			"replace" => Self::Replace,
			"kebab" => Self::Kebab,
			"prop" | "get" => Self::Prop,
			"get_post" | "resolve" => Self::GetPost,
			"get_user" => Self::GetUser,
			"get_meta" => Self::GetMeta,
			"date" => Self::Date,
			"esc_html" => Self::EscHtml,
			"esc_attr" => Self::EscAttr,
			"raw" => Self::Raw,
			_ => return None,
		};

		Some(filter)
	}
}

/// Evaluated filter arguments in source order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterArgs {
	pub positional: Vec<Value>,
	pub named: Vec<(String, Value)>,
}

impl FilterArgs {
	pub fn named(&self, name: &str) -> Option<&Value> {
		self.named
			.iter()
			.find(|(key, _)| key == name)
			.map(|(_, value)| value)
	}

	pub fn positional(&self, index: usize) -> Option<&Value> {
		self.positional.get(index)
	}

	/// The named argument `name`, falling back to positional `index`. A `null`
	/// argument counts as missing.
	pub fn get(&self, name: &str, index: usize) -> Option<&Value> {
		self.named(name)
			.filter(|value| !value.is_null())
			.or_else(|| self.positional(index))
			.filter(|value| !value.is_null())
	}

	fn text(&self, name: &str, index: usize) -> Option<String> {
		self.get(name, index).map(|value| value.to_safe_string(false))
	}
}

impl Engine {
	/// Apply the filter called `name` to `input`.
	pub fn apply_filter(
		&mut self,
		name: &str,
		input: Value,
		args: &FilterArgs,
		depth: usize,
	) -> VexprResult<Value> {
		let Some(filter) = Filter::from_name(name) else {
			return self.context.hooks().apply_unknown_filter(name, input, args);
		};

		let text = input.to_safe_string(false);

		let value = match filter {
			Filter::Upper => Value::String(text.to_uppercase()),
			Filter::Lower => Value::String(text.to_lowercase()),
			Filter::Capitalize => Value::String(capitalize_words(&text)),
			Filter::Default => {
				if input.is_truthy() {
					input
				} else {
					args.positional(0).cloned().unwrap_or_else(|| Value::from(""))
				}
			}
			Filter::If => {
				let branch = if input.is_truthy() {
					args.get("then", 0)
				} else {
					args.get("else", 1)
				};
				branch.cloned().unwrap_or_default()
			}
			Filter::Match => match_case(&input, args),
			Filter::Map => map_key(&input, args),
			Filter::Join => {
				let glue = args.text("glue", 0).unwrap_or_else(|| ",".to_string());
				let joined = input
					.to_list()
					.iter()
					.map(|item| item.to_safe_string(false))
					.collect::<Vec<_>>()
					.join(&glue);
				Value::String(joined)
			}
			Filter::Truncate => truncate(&text, args)?,
			Filter::Trim => {
				let trimmed = match args.text("chars", 0) {
					Some(chars) => text.trim_matches(|character: char| chars.contains(character)),
					None => text.trim(),
				};
				Value::String(trimmed.to_string())
			}
			Filter::Replace => {
				let search = args.text("search", 0).unwrap_or_default();
				let replacement = args.text("replace", 1).unwrap_or_default();
				if search.is_empty() {
					Value::String(text)
				} else {
					Value::String(text.replace(&search, &replacement))
				}
			}
			Filter::Kebab => Value::String(kebab(&text)),
			Filter::Prop => {
				let key = args.get("key", 0).cloned().unwrap_or_default();
				let resolution = self.context.access(&input, &key)?;
				self.settle(resolution, depth)?
			}
			Filter::GetPost => {
				match entity_id(&input) {
					Some(id) => self.context.provider().document(id)?.map_or(Value::Null, Value::Entity),
					None => Value::Null,
				}
			}
			Filter::GetUser => {
				match entity_id(&input) {
					Some(id) => self.context.provider().principal(id)?.map_or(Value::Null, Value::Entity),
					None => Value::Null,
				}
			}
			Filter::GetMeta => {
				let key = args.text("key", 0).unwrap_or_default();
				match input.as_entity() {
					Some(entity) if !key.is_empty() => {
						MetaProxy::new(entity.kind, entity.id).get(
							self.context.provider(),
							self.context.meta_policy(),
							&key,
						)?
					}
					_ => Value::Null,
				}
			}
			Filter::Date => {
				let format = args
					.text("format", 0)
					.unwrap_or_else(|| self.site.date_format.clone());
				Value::String(format_date(&input, &format, self.site.offset()))
			}
			Filter::EscHtml => Value::Safe(SafeString::new(esc_html(&text))),
			Filter::EscAttr => Value::Safe(SafeString::new(esc_attr(&text))),
			Filter::Raw => {
				let sanitized = self.context.hooks().sanitize(&text);
				Value::Safe(SafeString::new(sanitized))
			}
		};

		Ok(value)
	}
}

/// A positive integer id from a number or numeric string.
fn entity_id(input: &Value) -> Option<u64> {
	if !input.is_numeric() {
		return None;
	}

	u64::try_from(input.to_integer()).ok().filter(|id| *id > 0)
}

/// Return the value of the first named case whose key equals the input,
/// else the `default` case.
fn match_case(input: &Value, args: &FilterArgs) -> Value {
	let matched = args
		.named
		.iter()
		.filter(|(key, _)| key != "default")
		.find(|(key, _)| {
			let exact = input.as_str().is_some_and(|text| text == key);
			let numeric = is_numeric_str(key)
				&& input.is_numeric()
				&& leading_number(key) == input.to_number();
			exact || numeric
		})
		.map(|(_, value)| value);

	matched
		.or_else(|| args.named("default"))
		.cloned()
		.unwrap_or_default()
}

/// Project one key out of every element. Entities are never projected.
fn map_key(input: &Value, args: &FilterArgs) -> Value {
	let items = input.to_list();
	let Some(key) = args.get("key", 0).filter(|key| key.is_truthy()) else {
		return Value::List(items);
	};
	let key = key.to_safe_string(false);

	let projected = items
		.iter()
		.map(|item| {
			match item {
				Value::Map(entries) => entries.get(&key).cloned().unwrap_or_default(),
				Value::List(values) => {
					key.parse::<usize>()
						.ok()
						.and_then(|index| values.get(index).cloned())
						.unwrap_or_default()
				}
				_ => Value::Null,
			}
		})
		.collect();

	Value::List(projected)
}

fn truncate(text: &str, args: &FilterArgs) -> VexprResult<Value> {
	let Some(length) = args.get("length", 0) else {
		return Ok(Value::String(text.to_string()));
	};

	if !length.is_numeric() {
		return Err(VexprError::Filter {
			name: "truncate".to_string(),
			reason: format!("length must be a number, got `{}`", length.to_safe_string(true)),
		});
	}

	let length = usize::try_from(length.to_integer()).unwrap_or_default();
	if text.chars().count() <= length {
		return Ok(Value::String(text.to_string()));
	}

	let suffix = args.text("suffix", 1).unwrap_or_else(|| "…".to_string());
	let mut truncated: String = text.chars().take(length).collect();
	truncated.push_str(&suffix);

	Ok(Value::String(truncated))
}

/// Uppercase the first letter of every whitespace-separated word.
fn capitalize_words(text: &str) -> String {
	let mut output = String::with_capacity(text.len());
	let mut at_word_start = true;

	for character in text.chars() {
		if at_word_start {
			output.extend(character.to_uppercase());
		} else {
			output.push(character);
		}
		at_word_start = character.is_whitespace();
	}

	output
}

/// Lowercase ASCII slug: runs of anything other than letters and digits
/// become a single `-`.
fn kebab(text: &str) -> String {
	let mut slug = String::with_capacity(text.len());

	for character in text.chars() {
		if character.is_ascii_alphanumeric() {
			slug.push(character.to_ascii_lowercase());
		} else if !slug.is_empty() && !slug.ends_with('-') {
			slug.push('-');
		}
	}

	while slug.ends_with('-') {
		slug.pop();
	}

	slug
}
