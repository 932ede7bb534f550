use std::collections::BTreeMap;

use crate::context::AliasTable;
use crate::error::VexprError;
use crate::error::VexprResult;
use crate::html::sanitize_html;
use crate::library::FilterArgs;
use crate::logic::BlockLogic;
use crate::logic::RenderInstructions;
use crate::value::Value;

/// Extension points the host can override. Every method has a default, so an
/// implementation only overrides what it needs.
pub trait Hooks: Send + Sync {
	/// Adjust the document alias table.
	fn document_aliases(&self, aliases: AliasTable) -> AliasTable {
		aliases
	}

	/// Adjust the principal alias table.
	fn principal_aliases(&self, aliases: AliasTable) -> AliasTable {
		aliases
	}

	/// Adjust the values exposed under the `site` root.
	fn site(&self, site: BTreeMap<String, Value>) -> BTreeMap<String, Value> {
		site
	}

	/// Apply a filter the built-in library does not know. The default passes
	/// the input through unchanged.
	fn apply_unknown_filter(
		&self,
		name: &str,
		input: Value,
		_args: &FilterArgs,
	) -> VexprResult<Value> {
		tracing::trace!(name, "unknown filter passed through");
		Ok(input)
	}

	/// Observe an evaluation failure. Never alters control flow.
	fn on_error(&self, error: &VexprError, expression: &str) {
		tracing::warn!(expression, %error, "expression failed to evaluate");
	}

	/// Wrap the value of each evaluated span before it is escaped.
	fn render_token(&self, value: Value, _expression: &str, _is_raw: bool) -> Value {
		value
	}

	/// Reduce markup to the safe subset used for raw output.
	fn sanitize(&self, html: &str) -> String {
		sanitize_html(html)
	}

	/// Amend the instructions computed for a block.
	fn calculate_logic(
		&self,
		instructions: RenderInstructions,
		_logic: &BlockLogic,
	) -> RenderInstructions {
		instructions
	}
}

/// Hooks with every default behavior.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultHooks;

impl Hooks for DefaultHooks {}
