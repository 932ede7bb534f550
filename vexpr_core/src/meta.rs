use serde::Deserialize;
use serde::Serialize;

use crate::context::DataProvider;
use crate::error::VexprResult;
use crate::value::EntityKind;
use crate::value::Value;

/// Keys that are never readable, regardless of configuration.
const HARD_DENIED_KEYS: &[&str] = &["session_tokens", "capabilities", "user_level"];

pub const DEFAULT_SENSITIVE_KEYWORDS: &[&str] = &[
	"pass",
	"token",
	"secret",
	"api_key",
	"auth",
	"nonce",
	"salt",
	"credential",
	"private_key",
];

/// Rules deciding which metadata keys an expression may read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetaPolicy {
	/// Keys starting with this prefix are private to the host.
	pub protected_prefix: String,
	/// Prefix the host puts in front of capability and level keys, e.g.
	/// `site1_capabilities`.
	pub table_prefix: String,
	/// Extra exact keys to deny on top of the built-in list.
	pub denied_keys: Vec<String>,
	/// Any key whose lowercase form contains one of these is denied.
	pub sensitive_keywords: Vec<String>,
}

impl Default for MetaPolicy {
	fn default() -> Self {
		Self {
			protected_prefix: "_".to_string(),
			table_prefix: String::new(),
			denied_keys: Vec::new(),
			sensitive_keywords: DEFAULT_SENSITIVE_KEYWORDS
				.iter()
				.map(ToString::to_string)
				.collect(),
		}
	}
}

impl MetaPolicy {
	/// Whether `key` (already sanitized) may be read.
	pub fn allows(&self, key: &str) -> bool {
		if key.is_empty() {
			return false;
		}

		if !self.protected_prefix.is_empty() && key.starts_with(&self.protected_prefix) {
			return false;
		}

		let prefixed = |name: &str| format!("{}{name}", self.table_prefix);
		let hard_denied = HARD_DENIED_KEYS
			.iter()
			.any(|denied| key == *denied || key == prefixed(*denied));

		if hard_denied || self.denied_keys.iter().any(|denied| denied == key) {
			return false;
		}

		let lowercase = key.to_lowercase();
		!self
			.sensitive_keywords
			.iter()
			.filter(|keyword| !keyword.is_empty())
			.any(|keyword| lowercase.contains(&keyword.to_lowercase()))
	}
}

/// Normalize a metadata key: markup tags and control characters are removed,
/// whitespace runs collapse to one space and the ends are trimmed.
pub fn sanitize_key(key: &str) -> String {
	let mut cleaned = String::with_capacity(key.len());
	let mut in_tag = false;

	for character in key.chars() {
		match character {
			'<' => in_tag = true,
			'>' if in_tag => in_tag = false,
			_ if in_tag => {}
			character if character.is_whitespace() => {
				if !cleaned.ends_with(' ') {
					cleaned.push(' ');
				}
			}
			character if character.is_control() => {}
			character => cleaned.push(character),
		}
	}

	cleaned.trim().to_string()
}

/// A lazy, security-filtered view over the metadata of one entity.
///
/// The proxy holds no data. Each read goes through [`MetaPolicy`] and then
/// to the [`DataProvider`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MetaProxy {
	pub owner: EntityKind,
	pub owner_id: u64,
}

impl MetaProxy {
	pub fn new(owner: EntityKind, owner_id: u64) -> Self {
		Self { owner, owner_id }
	}

	/// Read one metadata value, or `null` when the key is denied or absent.
	pub fn get(
		&self,
		provider: &dyn DataProvider,
		policy: &MetaPolicy,
		key: &str,
	) -> VexprResult<Value> {
		let key = sanitize_key(key);

		if !policy.allows(&key) {
			tracing::debug!(owner = %self.owner, id = self.owner_id, key, "denied metadata key");
			return Ok(Value::Null);
		}

		let value = provider.meta(self.owner, self.owner_id, &key)?;
		Ok(value.unwrap_or_default())
	}
}
