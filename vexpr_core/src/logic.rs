use serde::Deserialize;
use serde::Serialize;

use crate::engine::Engine;
use crate::error::VexprResult;

/// What happens to a block when its visibility condition is truthy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisibleAction {
	#[default]
	Show,
	Hide,
}

/// Conditional-rendering settings attached to a block of content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockLogic {
	/// Visibility condition. Empty means always visible.
	pub visible: String,
	pub visible_action: VisibleAction,
	/// Class template. May mix static text with `{{ }}` spans.
	pub class: String,
}

impl BlockLogic {
	pub fn is_empty(&self) -> bool {
		self.visible.trim().is_empty() && self.class.trim().is_empty()
	}
}

/// The computed outcome of a [`BlockLogic`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderInstructions {
	pub render: bool,
	pub classes: Vec<String>,
}

impl Default for RenderInstructions {
	fn default() -> Self {
		Self {
			render: true,
			classes: Vec::new(),
		}
	}
}

impl Engine {
	/// Evaluate a block's visibility condition and class template, then let
	/// [`Hooks::calculate_logic`](crate::Hooks::calculate_logic) amend the
	/// result. The class template is only expanded for visible blocks.
	pub fn evaluate_block_logic(&mut self, logic: &BlockLogic) -> VexprResult<RenderInstructions> {
		let mut instructions = RenderInstructions::default();

		if !logic.visible.trim().is_empty() {
			let condition = self.evaluate_expression(&logic.visible)?.is_truthy();
			instructions.render = match logic.visible_action {
				VisibleAction::Show => condition,
				VisibleAction::Hide => !condition,
			};
		}

		if instructions.render && !logic.class.trim().is_empty() {
			let class = self.scan(&logic.class);
			let class = class.trim();
			if !class.is_empty() {
				instructions.classes.push(class.to_string());
			}
		}

		Ok(self.context.hooks().calculate_logic(instructions, logic))
	}

	/// Render a block of content: hidden blocks become empty, visible ones
	/// are scanned.
	pub fn render_block(&mut self, content: &str, logic: Option<&BlockLogic>) -> VexprResult<String> {
		let logic = match logic {
			Some(logic) if !logic.is_empty() && !content.trim().is_empty() => logic,
			_ => return Ok(self.scan(content)),
		};

		let instructions = self.evaluate_block_logic(logic)?;
		if !instructions.render {
			return Ok(String::new());
		}

		Ok(self.scan(content))
	}
}
