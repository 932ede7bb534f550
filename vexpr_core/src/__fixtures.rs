use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use crate::AstCache;
use crate::Engine;
use crate::Entity;
use crate::EntityKind;
use crate::FilterArgs;
use crate::Hooks;
use crate::Value;
use crate::VexprError;
use crate::VexprResult;
use crate::config::VexprConfig;
use crate::store::MemoryStore;

pub fn ada() -> Entity {
	Entity::new(EntityKind::Principal, 1)
		.with_field("display_name", "Ada")
		.with_field("user_email", "ada@example.com")
		.with_field("user_login", "ada")
		.with_field("roles", vec![Value::from("editor"), Value::from("author")])
}

pub fn hello_post() -> Entity {
	Entity::new(EntityKind::Document, 10)
		.with_field("post_title", "Hello <World>")
		.with_field("post_content", "The body {{ post.content }}")
		.with_field("post_excerpt", "A summary")
		.with_field("post_status", "publish")
		.with_field("post_date", "2024-03-05 10:30:00")
		.with_field("post_author", 1_u64)
		.with_field("post_name", "hello-world")
}

pub fn second_post() -> Entity {
	Entity::new(EntityKind::Document, 11)
		.with_field("post_title", "Second")
		.with_field("post_content", "Second body")
		.with_field("post_author", 1_u64)
		.with_field("post_name", "second")
}

/// A store with one signed-in principal rendering the `hello-world` post.
pub fn sample_store() -> MemoryStore {
	MemoryStore::new()
		.with_site("name", "Example")
		.with_site("url", "https://example.com")
		.with_site("tags", vec![Value::from("news"), Value::from("rust")])
		.with_principal(ada())
		.with_document(hello_post())
		.with_document(second_post())
		.with_meta(EntityKind::Principal, 1, "favorite_color", "teal")
		.with_meta(EntityKind::Principal, 1, "session_tokens", "s3cr3t")
		.with_meta(EntityKind::Principal, 1, "api_key", "k-123")
		.with_meta(EntityKind::Principal, 1, "_edit_lock", "1700000000:1")
		.with_meta(EntityKind::Document, 10, "subtitle", "Sub <b>title</b>")
		.with_current_principal(1)
		.with_current_document(10)
}

/// An engine over `store` with its own cache, so tests never share parsed
/// trees or counters.
pub fn engine_with(store: MemoryStore, config: VexprConfig) -> VexprResult<Engine> {
	Engine::builder(Arc::new(store))
		.config(config)
		.cache(Arc::new(AstCache::new(64)))
		.build()
}

pub fn engine() -> VexprResult<Engine> {
	engine_with(sample_store(), VexprConfig::default())
}

pub fn config(toml: &str) -> VexprResult<VexprConfig> {
	VexprConfig::from_toml(toml)
}

/// Hooks that count calls to the `tick` filter and record reported errors.
#[derive(Debug, Clone, Default)]
pub struct RecordingHooks {
	pub ticks: Arc<AtomicUsize>,
	pub errors: Arc<Mutex<Vec<String>>>,
}

impl RecordingHooks {
	pub fn tick_count(&self) -> usize {
		self.ticks.load(Ordering::SeqCst)
	}

	pub fn reported(&self) -> Vec<String> {
		self.errors
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.clone()
	}
}

impl Hooks for RecordingHooks {
	fn apply_unknown_filter(
		&self,
		name: &str,
		input: Value,
		_args: &FilterArgs,
	) -> VexprResult<Value> {
		match name {
			"tick" => {
				self.ticks.fetch_add(1, Ordering::SeqCst);
				Ok(input)
			}
			"explode" => {
				Err(VexprError::Filter {
					name: name.to_string(),
					reason: "boom".to_string(),
				})
			}
			_ => Ok(input),
		}
	}

	fn on_error(&self, error: &VexprError, expression: &str) {
		self.errors
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.push(format!("{}: {error}", expression.trim()));
	}
}

pub fn recording_engine(hooks: &RecordingHooks) -> VexprResult<Engine> {
	Engine::builder(Arc::new(sample_store()))
		.hooks(hooks.clone())
		.cache(Arc::new(AstCache::new(64)))
		.build()
}
