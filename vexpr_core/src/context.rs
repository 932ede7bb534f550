use std::collections::BTreeMap;
use std::collections::HashSet;
use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;

use crate::error::VexprResult;
use crate::hooks::Hooks;
use crate::meta::MetaPolicy;
use crate::meta::MetaProxy;
use crate::value::Entity;
use crate::value::EntityKind;
use crate::value::Value;

/// Storage fields that hold a document's own rendered body.
const PROTECTED_CONTENT_FIELDS: &[&str] = &["post_content", "post_excerpt"];

/// The host's data store, consulted synchronously during evaluation.
pub trait DataProvider: Send + Sync {
	/// The principal making the current request, or `None` when anonymous.
	fn current_principal(&self) -> VexprResult<Option<Arc<Entity>>>;

	/// The document currently being routed or rendered.
	fn current_document(&self) -> VexprResult<Option<Arc<Entity>>>;

	/// Site-wide settings exposed under the `site` root.
	fn site(&self) -> VexprResult<BTreeMap<String, Value>>;

	fn document(&self, id: u64) -> VexprResult<Option<Arc<Entity>>>;

	fn principal(&self, id: u64) -> VexprResult<Option<Arc<Entity>>>;

	/// Read one raw metadata value. Access control happens before this is
	/// called; implementations should not filter.
	fn meta(&self, owner: EntityKind, id: u64, key: &str) -> VexprResult<Option<Value>>;

	/// The public URL of a document.
	fn permalink(&self, document: &Entity) -> VexprResult<Option<String>>;

	/// Resolve a root name other than `user`, `post` and `site`.
	fn resolve_unknown_root(&self, _name: &str) -> VexprResult<Option<Value>> {
		Ok(None)
	}
}

/// Where an expression-level field name points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AliasTarget {
	/// A storage field on the entity, e.g. `post_title`.
	Field(String),
	/// An expression evaluated with `this` bound to the entity.
	Expression { expression: String },
}

impl AliasTarget {
	pub fn field(name: impl Into<String>) -> Self {
		Self::Field(name.into())
	}

	pub fn expression(expression: impl Into<String>) -> Self {
		Self::Expression {
			expression: expression.into(),
		}
	}
}

/// Maps expression-level field names to storage fields for one entity kind.
pub type AliasTable = BTreeMap<String, AliasTarget>;

pub fn default_document_aliases() -> AliasTable {
	[
		("id", "ID"),
		("title", "post_title"),
		("content", "post_content"),
		("excerpt", "post_excerpt"),
		("status", "post_status"),
		("type", "post_type"),
		("date", "post_date"),
		("author", "post_author"),
		("slug", "post_name"),
	]
	.into_iter()
	.map(|(alias, field)| (alias.to_string(), AliasTarget::field(field)))
	.collect()
}

pub fn default_principal_aliases() -> AliasTable {
	[
		("id", "ID"),
		("name", "display_name"),
		("email", "user_email"),
		("login", "user_login"),
		("registered", "user_registered"),
		("url", "user_url"),
		("roles", "roles"),
	]
	.into_iter()
	.map(|(alias, field)| (alias.to_string(), AliasTarget::field(field)))
	.collect()
}

/// The outcome of resolving a root or a member.
///
/// Computed aliases cannot be resolved by the context alone; the engine
/// evaluates their expression with `this` bound.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
	Value(Value),
	Computed { expression: String, this: Value },
}

impl From<Value> for Resolution {
	fn from(value: Value) -> Self {
		Self::Value(value)
	}
}

/// Per-session resolution state over a [`DataProvider`].
///
/// A context belongs to one rendering session. The resolution stack, the
/// `this` stack and the nested-render depth are mutable session state and
/// must not be shared between concurrent renders.
pub struct Context {
	provider: Arc<dyn DataProvider>,
	hooks: Arc<dyn Hooks>,
	document_aliases: AliasTable,
	principal_aliases: AliasTable,
	roots: BTreeMap<String, String>,
	meta_policy: MetaPolicy,
	resolving: HashSet<String>,
	this: Vec<Value>,
	protect_content: bool,
	render_depth: usize,
}

impl std::fmt::Debug for Context {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Context")
			.field("document_aliases", &self.document_aliases)
			.field("principal_aliases", &self.principal_aliases)
			.field("roots", &self.roots)
			.field("meta_policy", &self.meta_policy)
			.field("resolving", &self.resolving)
			.field("protect_content", &self.protect_content)
			.field("render_depth", &self.render_depth)
			.finish_non_exhaustive()
	}
}

impl Context {
	/// Build a context. Alias tables are passed through the alias hooks once,
	/// here, so hooks see the configured tables.
	pub fn new(
		provider: Arc<dyn DataProvider>,
		hooks: Arc<dyn Hooks>,
		document_aliases: AliasTable,
		principal_aliases: AliasTable,
		roots: BTreeMap<String, String>,
		meta_policy: MetaPolicy,
	) -> Self {
		let document_aliases = hooks.document_aliases(document_aliases);
		let principal_aliases = hooks.principal_aliases(principal_aliases);

		Self {
			provider,
			hooks,
			document_aliases,
			principal_aliases,
			roots,
			meta_policy,
			resolving: HashSet::new(),
			this: Vec::new(),
			protect_content: false,
			render_depth: 0,
		}
	}

	pub fn provider(&self) -> &dyn DataProvider {
		self.provider.as_ref()
	}

	pub fn hooks(&self) -> &dyn Hooks {
		self.hooks.as_ref()
	}

	pub fn meta_policy(&self) -> &MetaPolicy {
		&self.meta_policy
	}

	/// Resolve a root variable.
	pub fn get(&self, root: &str) -> VexprResult<Resolution> {
		let value = match root {
			"user" => {
				let principal = self
					.provider
					.current_principal()?
					.unwrap_or_else(|| Arc::new(Entity::new(EntityKind::Principal, 0)));
				Value::Entity(principal)
			}
			"post" => self.provider.current_document()?.map_or(Value::Null, Value::Entity),
			"site" => Value::Map(self.hooks.site(self.provider.site()?)),
			"this" if !self.this.is_empty() => self.this.last().cloned().unwrap_or_default(),
			_ => {
				if let Some(expression) = self.roots.get(root) {
					return Ok(Resolution::Computed {
						expression: expression.clone(),
						this: Value::Null,
					});
				}

				self.provider.resolve_unknown_root(root)?.unwrap_or_default()
			}
		};

		Ok(value.into())
	}

	/// Resolve `key` on `target`.
	///
	/// Non-scalar keys and unknown members resolve to `null`. Documents and
	/// principals only expose their aliased fields, the computed members
	/// `meta`, `is_logged_in`, `author_name` and `url`.
	pub fn access(&self, target: &Value, key: &Value) -> VexprResult<Resolution> {
		if !key.is_scalar() {
			return Ok(Value::Null.into());
		}

		let key = key.to_safe_string(false);
		let value = match target {
			Value::Map(entries) => entries.get(&key).cloned().unwrap_or_default(),
			Value::List(items) => {
				key.parse::<usize>()
					.ok()
					.and_then(|index| items.get(index).cloned())
					.unwrap_or_default()
			}
			Value::Meta(proxy) => proxy.get(self.provider(), &self.meta_policy, &key)?,
			Value::Entity(entity) => return self.access_entity(entity, &key),
			_ => Value::Null,
		};

		Ok(value.into())
	}

	fn access_entity(&self, entity: &Arc<Entity>, key: &str) -> VexprResult<Resolution> {
		let value = match (entity.kind, key) {
			(_, "meta") => Value::Meta(MetaProxy::new(entity.kind, entity.id)),
			(EntityKind::Principal, "is_logged_in") => Value::Bool(entity.id > 0),
			(EntityKind::Document, "author_name") => self.author_name(entity)?,
			(EntityKind::Document, "url") => {
				Value::String(self.provider.permalink(entity)?.unwrap_or_default())
			}
			(kind, _) => {
				let aliases = match kind {
					EntityKind::Document => &self.document_aliases,
					EntityKind::Principal => &self.principal_aliases,
				};

				match aliases.get(key) {
					None => Value::Null,
					Some(AliasTarget::Expression { expression }) => {
						return Ok(Resolution::Computed {
							expression: expression.clone(),
							this: Value::Entity(Arc::clone(entity)),
						});
					}
					Some(AliasTarget::Field(field)) => {
						if self.is_protected(entity, field)? {
							tracing::debug!(id = entity.id, field, "content protection blocked field");
							Value::String(String::new())
						} else {
							entity.field(field).unwrap_or_default()
						}
					}
				}
			}
		};

		Ok(value.into())
	}

	fn author_name(&self, document: &Entity) -> VexprResult<Value> {
		let author_id = document
			.field("post_author")
			.map(|author| author.to_integer())
			.and_then(|id| u64::try_from(id).ok())
			.unwrap_or_default();

		let name = match self.provider.principal(author_id)? {
			Some(author) => author.field("display_name").unwrap_or_default(),
			None => Value::String(String::new()),
		};

		Ok(name)
	}

	/// Whether reading `field` of `entity` must be blanked because it is the
	/// body of the document being rendered.
	fn is_protected(&self, entity: &Entity, field: &str) -> VexprResult<bool> {
		if !self.protect_content
			|| !entity.is_document()
			|| !PROTECTED_CONTENT_FIELDS.contains(&field)
		{
			return Ok(false);
		}

		let current = self.provider.current_document()?;
		Ok(current.is_some_and(|current| current.id == entity.id))
	}

	pub fn is_resolving(&self, path: &str) -> bool {
		self.resolving.contains(path)
	}

	pub fn push_resolution(&mut self, path: impl Into<String>) {
		self.resolving.insert(path.into());
	}

	pub fn pop_resolution(&mut self, path: &str) {
		self.resolving.remove(path);
	}

	pub(crate) fn push_this(&mut self, value: Value) {
		self.this.push(value);
	}

	pub(crate) fn pop_this(&mut self) {
		self.this.pop();
	}

	pub fn content_protection(&self) -> bool {
		self.protect_content
	}

	pub fn set_content_protection(&mut self, protect: bool) {
		self.protect_content = protect;
	}

	pub(crate) fn render_depth(&self) -> usize {
		self.render_depth
	}

	pub(crate) fn enter_render(&mut self) {
		self.render_depth += 1;
	}

	pub(crate) fn exit_render(&mut self) {
		self.render_depth = self.render_depth.saturating_sub(1);
	}
}
