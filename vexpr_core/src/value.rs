use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt::Display;
use std::sync::Arc;

use derive_more::Deref;
use derive_more::Display as DeriveDisplay;
use serde::Deserialize;
use serde::Serialize;
use serde::Serializer;
use serde::ser::SerializeMap;
use serde::ser::SerializeSeq;

use crate::meta::MetaProxy;

/// A runtime value produced by evaluating an expression.
#[derive(Debug, Clone, Default)]
pub enum Value {
	#[default]
	Null,
	Bool(bool),
	Number(f64),
	String(String),
	/// Pre-sanitized markup that bypasses escaping on output.
	Safe(SafeString),
	List(Vec<Value>),
	Map(BTreeMap<String, Value>),
	/// A document or principal record from the data provider.
	Entity(Arc<Entity>),
	/// The security-filtered metadata view of an entity.
	Meta(MetaProxy),
}

/// Markup that has already been sanitized and must be emitted verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deref, DeriveDisplay)]
pub struct SafeString(String);

impl SafeString {
	/// Wrap markup the caller has already sanitized.
	pub fn new(markup: impl Into<String>) -> Self {
		Self(markup.into())
	}

	pub fn into_inner(self) -> String {
		self.0
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
	/// A content record such as a post or page.
	Document,
	/// An acting identity such as a user account.
	Principal,
}

impl Display for EntityKind {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Document => write!(f, "document"),
			Self::Principal => write!(f, "principal"),
		}
	}
}

/// A record held by the data provider. Fields are keyed by their storage
/// names (`post_title`, `display_name`, ...), never by expression aliases.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
	pub kind: EntityKind,
	pub id: u64,
	pub fields: BTreeMap<String, Value>,
}

impl Entity {
	pub fn new(kind: EntityKind, id: u64) -> Self {
		Self {
			kind,
			id,
			fields: BTreeMap::new(),
		}
	}

	#[must_use]
	pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
		self.fields.insert(name.into(), value.into());
		self
	}

	/// Read a storage field. `ID` always resolves to the record id.
	pub fn field(&self, name: &str) -> Option<Value> {
		if name == "ID" {
			return Some(Value::from(self.id));
		}

		self.fields.get(name).cloned()
	}

	pub fn is_document(&self) -> bool {
		self.kind == EntityKind::Document
	}

	pub fn is_principal(&self) -> bool {
		self.kind == EntityKind::Principal
	}
}

impl Value {
	/// Truthiness: `null`, `false`, `0`, `""`, `"0"` and empty collections are
	/// falsy. Everything else, including every entity, is truthy.
	pub fn is_truthy(&self) -> bool {
		match self {
			Self::Null => false,
			Self::Bool(value) => *value,
			Self::Number(value) => *value != 0.0,
			Self::String(value) => !(value.is_empty() || value == "0"),
			Self::List(items) => !items.is_empty(),
			Self::Map(entries) => !entries.is_empty(),
			Self::Safe(_) | Self::Entity(_) | Self::Meta(_) => true,
		}
	}

	pub fn is_null(&self) -> bool {
		matches!(self, Self::Null)
	}

	/// The string payload of plain and safe strings.
	pub fn as_str(&self) -> Option<&str> {
		match self {
			Self::String(value) => Some(value.as_str()),
			Self::Safe(value) => Some(value.as_str()),
			_ => None,
		}
	}

	pub fn as_entity(&self) -> Option<&Arc<Entity>> {
		match self {
			Self::Entity(entity) => Some(entity),
			_ => None,
		}
	}

	/// Whether this is a string that does not look like a number.
	pub fn is_non_numeric_string(&self) -> bool {
		self.as_str().is_some_and(|value| !is_numeric_str(value))
	}

	/// Whether the value is a number or a numeric-looking string.
	pub fn is_numeric(&self) -> bool {
		match self {
			Self::Number(_) => true,
			_ => self.as_str().is_some_and(is_numeric_str),
		}
	}

	pub fn is_scalar(&self) -> bool {
		matches!(
			self,
			Self::Bool(_) | Self::Number(_) | Self::String(_) | Self::Safe(_)
		)
	}

	/// Numeric coercion. Strings contribute their leading numeric prefix;
	/// collections, entities and `null` coerce to zero.
	pub fn to_number(&self) -> f64 {
		match self {
			Self::Bool(value) => f64::from(u8::from(*value)),
			Self::Number(value) => *value,
			Self::String(_) | Self::Safe(_) => self.as_str().map_or(0.0, leading_number),
			_ => 0.0,
		}
	}

	/// Integer coercion, truncating toward zero.
	pub fn to_integer(&self) -> i64 {
		let number = self.to_number();
		if number.is_finite() { number.trunc() as i64 } else { 0 }
	}

	/// Render the value as output text without leaking structure.
	///
	/// Collections and entities become empty text, or a `[Array]` / `[Object]`
	/// marker when `debug` is set.
	pub fn to_safe_string(&self, debug: bool) -> String {
		match self {
			Self::Null => String::new(),
			Self::Bool(true) => "1".to_string(),
			Self::Bool(false) => String::new(),
			Self::Number(value) => format_number(*value),
			Self::String(value) => value.clone(),
			Self::Safe(value) => value.to_string(),
			Self::List(_) | Self::Map(_) if debug => "[Array]".to_string(),
			Self::Entity(_) | Self::Meta(_) if debug => "[Object]".to_string(),
			Self::List(_) | Self::Map(_) | Self::Entity(_) | Self::Meta(_) => String::new(),
		}
	}

	/// Loose comparison. Returns `None` when the operands are unordered, e.g.
	/// two distinct entities or a `NaN`.
	pub fn loose_cmp(&self, other: &Value) -> Option<Ordering> {
		match (self, other) {
			(Self::Null, Self::Null) => Some(Ordering::Equal),
			(Self::Bool(_), _) | (_, Self::Bool(_)) => {
				Some(self.is_truthy().cmp(&other.is_truthy()))
			}
			(Self::Null, _) => {
				match other.as_str() {
					Some(text) => Some("".cmp(text)),
					None => Some(false.cmp(&other.is_truthy())),
				}
			}
			(_, Self::Null) => other.loose_cmp(self).map(Ordering::reverse),
			(Self::Number(left), Self::Number(right)) => left.partial_cmp(right),
			(Self::Number(left), _) => {
				match other {
					Self::List(_) | Self::Map(_) => Some(Ordering::Less),
					_ => {
						let text = other.as_str()?;
						if is_numeric_str(text) {
							left.partial_cmp(&leading_number(text))
						} else {
							Some(format_number(*left).as_str().cmp(text))
						}
					}
				}
			}
			(_, Self::Number(_)) => other.loose_cmp(self).map(Ordering::reverse),
			(Self::String(_) | Self::Safe(_), Self::String(_) | Self::Safe(_)) => {
				let left = self.as_str().unwrap_or_default();
				let right = other.as_str().unwrap_or_default();
				if is_numeric_str(left) && is_numeric_str(right) {
					leading_number(left).partial_cmp(&leading_number(right))
				} else {
					Some(left.cmp(right))
				}
			}
			(Self::List(left), Self::List(right)) => {
				match left.len().cmp(&right.len()) {
					Ordering::Equal => {}
					unequal => return Some(unequal),
				}
				for (left, right) in left.iter().zip(right) {
					match left.loose_cmp(right)? {
						Ordering::Equal => {}
						unequal => return Some(unequal),
					}
				}
				Some(Ordering::Equal)
			}
			(Self::Map(left), Self::Map(right)) => {
				if left.len() != right.len() {
					return Some(left.len().cmp(&right.len()));
				}
				for (key, left) in left {
					match left.loose_cmp(right.get(key)?)? {
						Ordering::Equal => {}
						unequal => return Some(unequal),
					}
				}
				Some(Ordering::Equal)
			}
			(Self::Entity(left), Self::Entity(right))
				if left.kind == right.kind && left.id == right.id =>
			{
				Some(Ordering::Equal)
			}
			(Self::Meta(left), Self::Meta(right)) if left == right => Some(Ordering::Equal),
			_ => None,
		}
	}

	pub fn loose_eq(&self, other: &Value) -> bool {
		self.loose_cmp(other) == Some(Ordering::Equal)
	}

	/// Elements of a list-like value. Maps yield their values; scalars yield
	/// themselves; `null` yields nothing.
	pub fn to_list(&self) -> Vec<Value> {
		match self {
			Self::Null => Vec::new(),
			Self::List(items) => items.clone(),
			Self::Map(entries) => entries.values().cloned().collect(),
			other => vec![other.clone()],
		}
	}
}

/// Whether `text` looks like a number: optional surrounding whitespace, an
/// optional sign, digits with an optional fraction and an optional exponent.
pub fn is_numeric_str(text: &str) -> bool {
	let trimmed = text.trim_matches(is_number_padding);
	if trimmed.is_empty() {
		return false;
	}

	let body = trimmed
		.strip_prefix(['+', '-'])
		.unwrap_or(trimmed);
	let (mantissa, exponent) = match body.find(['e', 'E']) {
		Some(index) => (&body[..index], Some(&body[index + 1..])),
		None => (body, None),
	};

	let mut parts = mantissa.splitn(2, '.');
	let whole = parts.next().unwrap_or_default();
	let fraction = parts.next();
	let digits = |part: &str| part.bytes().all(|byte| byte.is_ascii_digit());

	let mantissa_ok = digits(whole)
		&& fraction.is_none_or(digits)
		&& !(whole.is_empty() && fraction.is_none_or(str::is_empty));
	let exponent_ok = exponent.is_none_or(|exponent| {
		let exponent = exponent.strip_prefix(['+', '-']).unwrap_or(exponent);
		!exponent.is_empty() && digits(exponent)
	});

	mantissa_ok && exponent_ok
}

/// The numeric value of the longest numeric prefix of `text`, or zero.
pub fn leading_number(text: &str) -> f64 {
	let trimmed = text.trim_start_matches(is_number_padding);
	let candidate_len = trimmed
		.bytes()
		.take_while(|byte| byte.is_ascii_digit() || matches!(byte, b'.' | b'e' | b'E' | b'+' | b'-'))
		.count();

	(1..=candidate_len)
		.rev()
		.map(|end| &trimmed[..end])
		.find(|prefix| is_numeric_str(prefix))
		.and_then(|prefix| prefix.parse::<f64>().ok())
		.unwrap_or(0.0)
}

fn is_number_padding(character: char) -> bool {
	matches!(character, ' ' | '\t' | '\n' | '\r' | '\x0B' | '\x0C')
}

/// Format a number the way it is shown in output: integral values without a
/// fraction, everything else in its shortest round-trip form.
pub fn format_number(value: f64) -> String {
	if value.is_nan() {
		return "NAN".to_string();
	}

	if value.is_infinite() {
		let infinity = if value.is_sign_positive() { "INF" } else { "-INF" };
		return infinity.to_string();
	}

	if value.fract() == 0.0 && value.abs() < 1e15 {
		return format!("{}", value as i64);
	}

	format!("{value}")
}

impl Display for Value {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(&self.to_safe_string(false))
	}
}

impl PartialEq for Value {
	fn eq(&self, other: &Self) -> bool {
		match (self, other) {
			(Self::Null, Self::Null) => true,
			(Self::Bool(left), Self::Bool(right)) => left == right,
			(Self::Number(left), Self::Number(right)) => {
				float_cmp::approx_eq!(f64, *left, *right, ulps = 2)
			}
			(Self::String(left), Self::String(right)) => left == right,
			(Self::Safe(left), Self::Safe(right)) => left == right,
			(Self::List(left), Self::List(right)) => left == right,
			(Self::Map(left), Self::Map(right)) => left == right,
			(Self::Entity(left), Self::Entity(right)) => left == right,
			(Self::Meta(left), Self::Meta(right)) => left == right,
			_ => false,
		}
	}
}

impl From<bool> for Value {
	fn from(value: bool) -> Self {
		Self::Bool(value)
	}
}

impl From<f64> for Value {
	fn from(value: f64) -> Self {
		Self::Number(value)
	}
}

impl From<i64> for Value {
	fn from(value: i64) -> Self {
		Self::Number(value as f64)
	}
}

impl From<u64> for Value {
	fn from(value: u64) -> Self {
		Self::Number(value as f64)
	}
}

impl From<&str> for Value {
	fn from(value: &str) -> Self {
		Self::String(value.to_string())
	}
}

impl From<String> for Value {
	fn from(value: String) -> Self {
		Self::String(value)
	}
}

impl From<SafeString> for Value {
	fn from(value: SafeString) -> Self {
		Self::Safe(value)
	}
}

impl From<Entity> for Value {
	fn from(value: Entity) -> Self {
		Self::Entity(Arc::new(value))
	}
}

impl<T: Into<Value>> From<Vec<T>> for Value {
	fn from(values: Vec<T>) -> Self {
		Self::List(values.into_iter().map(Into::into).collect())
	}
}

impl<T: Into<Value>> From<Option<T>> for Value {
	fn from(value: Option<T>) -> Self {
		value.map_or(Self::Null, Into::into)
	}
}

impl From<serde_json::Value> for Value {
	fn from(value: serde_json::Value) -> Self {
		match value {
			serde_json::Value::Null => Self::Null,
			serde_json::Value::Bool(value) => Self::Bool(value),
			serde_json::Value::Number(number) => Self::Number(number.as_f64().unwrap_or_default()),
			serde_json::Value::String(value) => Self::String(value),
			serde_json::Value::Array(items) => Self::List(items.into_iter().map(Self::from).collect()),
			serde_json::Value::Object(entries) => {
				Self::Map(
					entries
						.into_iter()
						.map(|(key, value)| (key, Self::from(value)))
						.collect(),
				)
			}
		}
	}
}

impl Serialize for Value {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		match self {
			Self::Null | Self::Meta(_) => serializer.serialize_unit(),
			Self::Bool(value) => serializer.serialize_bool(*value),
			Self::Number(value) if value.fract() == 0.0 && value.abs() < 1e15 => {
				serializer.serialize_i64(*value as i64)
			}
			Self::Number(value) => serializer.serialize_f64(*value),
			Self::String(value) => serializer.serialize_str(value),
			Self::Safe(value) => serializer.serialize_str(value),
			Self::List(items) => {
				let mut seq = serializer.serialize_seq(Some(items.len()))?;
				for item in items {
					seq.serialize_element(item)?;
				}
				seq.end()
			}
			Self::Map(entries) => {
				let mut map = serializer.serialize_map(Some(entries.len()))?;
				for (key, value) in entries {
					map.serialize_entry(key, value)?;
				}
				map.end()
			}
			Self::Entity(entity) => {
				let mut map = serializer.serialize_map(Some(2))?;
				map.serialize_entry("kind", &entity.kind)?;
				map.serialize_entry("id", &entity.id)?;
				map.end()
			}
		}
	}
}
