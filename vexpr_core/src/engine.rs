use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;

use crate::ast_cache::AstCache;
use crate::config::LimitsConfig;
use crate::config::SiteConfig;
use crate::config::VexprConfig;
use crate::context::Context;
use crate::context::DataProvider;
use crate::error::VexprResult;
use crate::hooks::DefaultHooks;
use crate::hooks::Hooks;
use crate::scanner::ScanPatterns;
use crate::scanner::strip_delimiters;
use crate::value::Value;

/// A rendering session: expression evaluation and template expansion over
/// one [`Context`].
///
/// An engine owns session state (the resolution stack, the nested render
/// depth and the content-protection flag), so every method that evaluates
/// takes `&mut self`. Use one engine per concurrent render. Engines share
/// parsed expressions through their [`AstCache`].
#[derive(Debug)]
pub struct Engine {
	pub(crate) context: Context,
	pub(crate) cache: Arc<AstCache>,
	pub(crate) limits: LimitsConfig,
	pub(crate) site: SiteConfig,
	pub(crate) patterns: ScanPatterns,
	pub(crate) debug: bool,
}

/// The result of previewing a single expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preview {
	/// The rendered value, or the failure message when `valid` is false.
	pub preview: String,
	pub valid: bool,
}

impl Engine {
	pub fn builder(provider: Arc<dyn DataProvider>) -> EngineBuilder {
		EngineBuilder::new(provider)
	}

	pub fn context(&self) -> &Context {
		&self.context
	}

	pub fn context_mut(&mut self) -> &mut Context {
		&mut self.context
	}

	pub fn cache(&self) -> &Arc<AstCache> {
		&self.cache
	}

	pub fn is_debug(&self) -> bool {
		self.debug
	}

	/// Evaluate a single expression, with or without surrounding `{{ }}`.
	pub fn evaluate_expression(&mut self, text: &str) -> VexprResult<Value> {
		self.evaluate_source(strip_delimiters(text), 0)
	}

	pub fn content_protection(&self) -> bool {
		self.context.content_protection()
	}

	/// While set, the body and summary of the document being rendered
	/// resolve to empty text.
	pub fn set_content_protection(&mut self, protect: bool) {
		self.context.set_content_protection(protect);
	}

	/// Run `f` with content protection on, restoring the previous setting
	/// afterwards.
	pub fn with_content_protection<T>(&mut self, f: impl FnOnce(&mut Self) -> T) -> T {
		let previous = self.content_protection();
		self.set_content_protection(true);
		let result = f(self);
		self.set_content_protection(previous);

		result
	}

	/// Scan the body of the document being rendered. Content protection is on
	/// for the duration of the call, so the body cannot embed itself.
	pub fn render_content(&mut self, text: &str) -> String {
		self.with_content_protection(|engine| engine.scan(text))
	}

	/// Evaluate an expression for a live preview, with content protection on.
	pub fn preview(&mut self, expression: &str) -> Preview {
		self.with_content_protection(|engine| {
			match engine.evaluate_expression(expression) {
				Ok(value) => {
					Preview {
						preview: value.to_safe_string(engine.debug),
						valid: true,
					}
				}
				Err(error) => {
					Preview {
						preview: error.to_string(),
						valid: false,
					}
				}
			}
		})
	}

	/// Evaluate an attribute value. A value that is exactly one `{{ … }}` span
	/// yields the expression's value itself; anything else is scanned as a
	/// template and yields a string.
	pub fn parse_attribute(&mut self, value: &str) -> VexprResult<Value> {
		let trimmed = value.trim();

		if let Some(inner) = trimmed
			.strip_prefix("{{")
			.and_then(|rest| rest.strip_suffix("}}"))
		{
			if !inner.contains("{{") && !inner.contains("}}") {
				return self.evaluate_source(inner, 0);
			}
		}

		Ok(Value::String(self.scan(value)))
	}
}

/// Builds an [`Engine`] from a provider, optional hooks, config and cache.
pub struct EngineBuilder {
	provider: Arc<dyn DataProvider>,
	hooks: Arc<dyn Hooks>,
	config: VexprConfig,
	cache: Option<Arc<AstCache>>,
}

impl EngineBuilder {
	pub fn new(provider: Arc<dyn DataProvider>) -> Self {
		Self {
			provider,
			hooks: Arc::new(DefaultHooks),
			config: VexprConfig::default(),
			cache: None,
		}
	}

	#[must_use]
	pub fn hooks(mut self, hooks: impl Hooks + 'static) -> Self {
		self.hooks = Arc::new(hooks);
		self
	}

	#[must_use]
	pub fn shared_hooks(mut self, hooks: Arc<dyn Hooks>) -> Self {
		self.hooks = hooks;
		self
	}

	#[must_use]
	pub fn config(mut self, config: VexprConfig) -> Self {
		self.config = config;
		self
	}

	/// Use `cache` instead of the process-wide [`AstCache::global`].
	#[must_use]
	pub fn cache(mut self, cache: Arc<AstCache>) -> Self {
		self.cache = Some(cache);
		self
	}

	pub fn build(self) -> VexprResult<Engine> {
		let Self {
			provider,
			hooks,
			config,
			cache,
		} = self;

		let patterns = ScanPatterns::new(&config.scanner)?;
		let context = Context::new(
			provider,
			hooks,
			config.aliases.document_table(),
			config.aliases.principal_table(),
			config.roots.clone(),
			config.security.meta_policy(),
		);

		Ok(Engine {
			context,
			cache: cache.unwrap_or_else(AstCache::global),
			limits: config.limits,
			site: config.site,
			patterns,
			debug: config.scanner.debug,
		})
	}
}
