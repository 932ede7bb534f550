use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use crate::context::DataProvider;
use crate::error::VexprError;
use crate::error::VexprResult;
use crate::value::Entity;
use crate::value::EntityKind;
use crate::value::Value;

/// Site keys that always exist under the `site` root.
const SITE_KEYS: &[&str] = &["name", "description", "url", "language"];

/// An in-memory [`DataProvider`], loadable from a JSON, TOML or YAML file.
///
/// ```yaml
/// site:
///   name: Example
///   url: https://example.com
/// current_user: 1
/// current_post: 10
/// users:
///   - id: 1
///     display_name: Ada
///     meta:
///       favorite_color: teal
/// posts:
///   - id: 10
///     post_title: Hello
///     post_name: hello
///     post_author: 1
/// ```
///
/// Record fields use storage names (`post_title`, `display_name`, ...). A
/// document without a `permalink` gets `{site.url}/{post_name}/`.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
	site: BTreeMap<String, Value>,
	documents: BTreeMap<u64, Arc<Entity>>,
	principals: BTreeMap<u64, Arc<Entity>>,
	meta: BTreeMap<(EntityKind, u64), BTreeMap<String, Value>>,
	permalinks: BTreeMap<u64, String>,
	current_principal: Option<u64>,
	current_document: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StoreFile {
	site: BTreeMap<String, serde_json::Value>,
	current_user: Option<u64>,
	current_post: Option<u64>,
	users: Vec<RecordFile>,
	posts: Vec<RecordFile>,
}

#[derive(Debug, Deserialize)]
struct RecordFile {
	id: u64,
	#[serde(default)]
	meta: BTreeMap<String, serde_json::Value>,
	#[serde(default)]
	permalink: Option<String>,
	#[serde(flatten)]
	fields: BTreeMap<String, serde_json::Value>,
}

impl MemoryStore {
	pub fn new() -> Self {
		Self::default()
	}

	/// Load a store from a data file. The format is taken from `format` or,
	/// when absent, from the file extension.
	pub fn load(path: &Path, format: Option<&str>) -> VexprResult<Self> {
		let path_display = path.display().to_string();
		let content = std::fs::read_to_string(path).map_err(|e| {
			VexprError::DataFile {
				path: path_display.clone(),
				reason: e.to_string(),
			}
		})?;
		let format = format
			.map(str::to_string)
			.or_else(|| path.extension().and_then(|e| e.to_str()).map(str::to_string))
			.unwrap_or_default()
			.to_ascii_lowercase();

		let value = parse_data_file(&content, &format, &path_display)?;
		let store = Self::from_json(value).map_err(|e| {
			VexprError::DataFile {
				path: path_display.clone(),
				reason: e.to_string(),
			}
		})?;
		tracing::debug!(
			path = path_display,
			documents = store.documents.len(),
			principals = store.principals.len(),
			"loaded data store"
		);

		Ok(store)
	}

	/// Build a store from an already-parsed JSON document.
	pub fn from_json(value: serde_json::Value) -> Result<Self, serde_json::Error> {
		let file: StoreFile = serde_json::from_value(value)?;
		let mut store = Self {
			site: file
				.site
				.into_iter()
				.map(|(key, value)| (key, Value::from(value)))
				.collect(),
			current_principal: file.current_user,
			current_document: file.current_post,
			..Self::default()
		};

		for (kind, records) in [
			(EntityKind::Principal, file.users),
			(EntityKind::Document, file.posts),
		] {
			for record in records {
				store.insert_record(kind, record);
			}
		}

		Ok(store)
	}

	fn insert_record(&mut self, kind: EntityKind, record: RecordFile) {
		let mut entity = Entity::new(kind, record.id);
		for (name, value) in record.fields {
			entity = entity.with_field(name, Value::from(value));
		}

		let meta = self.meta.entry((kind, record.id)).or_default();
		for (key, value) in record.meta {
			meta.insert(key, Value::from(value));
		}

		if let Some(permalink) = record.permalink {
			self.permalinks.insert(record.id, permalink);
		}

		match kind {
			EntityKind::Document => self.documents.insert(record.id, Arc::new(entity)),
			EntityKind::Principal => self.principals.insert(record.id, Arc::new(entity)),
		};
	}

	#[must_use]
	pub fn with_site(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
		self.site.insert(key.into(), value.into());
		self
	}

	#[must_use]
	pub fn with_document(mut self, document: Entity) -> Self {
		self.documents.insert(document.id, Arc::new(document));
		self
	}

	#[must_use]
	pub fn with_principal(mut self, principal: Entity) -> Self {
		self.principals.insert(principal.id, Arc::new(principal));
		self
	}

	#[must_use]
	pub fn with_meta(
		mut self,
		owner: EntityKind,
		id: u64,
		key: impl Into<String>,
		value: impl Into<Value>,
	) -> Self {
		self.meta
			.entry((owner, id))
			.or_default()
			.insert(key.into(), value.into());
		self
	}

	#[must_use]
	pub fn with_permalink(mut self, id: u64, permalink: impl Into<String>) -> Self {
		self.permalinks.insert(id, permalink.into());
		self
	}

	#[must_use]
	pub fn with_current_principal(mut self, id: u64) -> Self {
		self.current_principal = Some(id);
		self
	}

	#[must_use]
	pub fn with_current_document(mut self, id: u64) -> Self {
		self.current_document = Some(id);
		self
	}

	pub fn set_current_document(&mut self, id: Option<u64>) {
		self.current_document = id;
	}

	pub fn set_current_principal(&mut self, id: Option<u64>) {
		self.current_principal = id;
	}
}

impl DataProvider for MemoryStore {
	fn current_principal(&self) -> VexprResult<Option<Arc<Entity>>> {
		Ok(self
			.current_principal
			.and_then(|id| self.principals.get(&id).cloned()))
	}

	fn current_document(&self) -> VexprResult<Option<Arc<Entity>>> {
		Ok(self
			.current_document
			.and_then(|id| self.documents.get(&id).cloned()))
	}

	fn site(&self) -> VexprResult<BTreeMap<String, Value>> {
		let mut site = self.site.clone();
		for key in SITE_KEYS {
			site.entry((*key).to_string())
				.or_insert_with(|| Value::String(String::new()));
		}

		Ok(site)
	}

	fn document(&self, id: u64) -> VexprResult<Option<Arc<Entity>>> {
		Ok(self.documents.get(&id).cloned())
	}

	fn principal(&self, id: u64) -> VexprResult<Option<Arc<Entity>>> {
		Ok(self.principals.get(&id).cloned())
	}

	fn meta(&self, owner: EntityKind, id: u64, key: &str) -> VexprResult<Option<Value>> {
		Ok(self
			.meta
			.get(&(owner, id))
			.and_then(|entries| entries.get(key))
			.cloned())
	}

	fn permalink(&self, document: &Entity) -> VexprResult<Option<String>> {
		if let Some(permalink) = self.permalinks.get(&document.id) {
			return Ok(Some(permalink.clone()));
		}

		let base = self
			.site
			.get("url")
			.map(|url| url.to_safe_string(false))
			.unwrap_or_default();
		let base = base.trim_end_matches('/');

		let permalink = match document.field("post_name").map(|slug| slug.to_safe_string(false)) {
			Some(slug) if !slug.is_empty() => format!("{base}/{slug}/"),
			_ => format!("{base}/?p={}", document.id),
		};

		Ok(Some(permalink))
	}
}

/// Parse a data file's content into a `serde_json::Value` based on its
/// format.
fn parse_data_file(content: &str, format: &str, path_display: &str) -> VexprResult<serde_json::Value> {
	let data_error = |reason: String| {
		VexprError::DataFile {
			path: path_display.to_string(),
			reason,
		}
	};

	match format {
		"json" => serde_json::from_str(content).map_err(|e| data_error(e.to_string())),
		"toml" => {
			let toml_value: toml::Value =
				toml::from_str(content).map_err(|e| data_error(e.to_string()))?;
			Ok(toml_to_json(toml_value))
		}
		"yaml" | "yml" => serde_yaml_ng::from_str(content).map_err(|e| data_error(e.to_string())),
		other => Err(VexprError::UnsupportedDataFormat(other.to_string())),
	}
}

/// Convert a `toml::Value` to a `serde_json::Value`. Non-finite floats
/// become `null`.
fn toml_to_json(value: toml::Value) -> serde_json::Value {
	match value {
		toml::Value::String(s) => serde_json::Value::String(s),
		toml::Value::Integer(i) => serde_json::Value::Number(i.into()),
		toml::Value::Float(f) => {
			serde_json::Number::from_f64(f).map_or(serde_json::Value::Null, serde_json::Value::Number)
		}
		toml::Value::Boolean(b) => serde_json::Value::Bool(b),
		toml::Value::Datetime(dt) => serde_json::Value::String(dt.to_string()),
		toml::Value::Array(arr) => serde_json::Value::Array(arr.into_iter().map(toml_to_json).collect()),
		toml::Value::Table(table) => {
			serde_json::Value::Object(
				table
					.into_iter()
					.map(|(k, v)| (k, toml_to_json(v)))
					.collect(),
			)
		}
	}
}
