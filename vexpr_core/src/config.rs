use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;

use chrono::FixedOffset;
use chrono::Offset;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

use crate::ast_cache::DEFAULT_CACHE_CAPACITY;
use crate::context::AliasTable;
use crate::context::AliasTarget;
use crate::context::default_document_aliases;
use crate::context::default_principal_aliases;
use crate::date::DEFAULT_DATE_FORMAT;
use crate::error::VexprError;
use crate::error::VexprResult;
use crate::meta::MetaPolicy;

/// Default cap on nested node evaluation.
pub const DEFAULT_MAX_DEPTH: usize = 100;

/// Default cap on nested template re-expansion through `render`.
pub const DEFAULT_MAX_RENDER_DEPTH: usize = 5;

pub const DEFAULT_PILL_ATTRIBUTE: &str = "data-vexpr";

/// Supported config file locations in discovery order (highest precedence
/// first).
pub const CONFIG_FILE_CANDIDATES: [&str; 3] = ["vexpr.toml", ".vexpr.toml", ".config/vexpr.toml"];

/// Configuration loaded from a `vexpr.toml` file. Every section is optional.
///
/// ```toml
/// [limits]
/// max_depth = 100
/// max_render_depth = 5
/// cache_capacity = 512
///
/// [site]
/// date_format = "F j, Y"
/// utc_offset_minutes = 120
///
/// [security]
/// sensitive_keywords = ["pass", "token", "secret"]
/// denied_meta_keys = ["internal_notes"]
///
/// [aliases.post]
/// headline = "post_title"
/// shout = { expression = "this.title | upper" }
///
/// [roots]
/// author = "post.author | get_user"
///
/// [scanner]
/// debug = true
///
/// [data]
/// path = "fixtures/site.yaml"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VexprConfig {
	pub limits: LimitsConfig,
	pub site: SiteConfig,
	pub security: SecurityConfig,
	pub aliases: AliasesConfig,
	/// Extra root names mapped to the expression they stand for.
	pub roots: BTreeMap<String, String>,
	pub scanner: ScannerConfig,
	pub data: Option<DataConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
	/// Nested node evaluations beyond this resolve to `null`.
	pub max_depth: usize,
	/// Nested `render` expansions beyond this leave text unexpanded.
	pub max_render_depth: usize,
	/// Entries an engine-owned AST cache holds before it is cleared.
	pub cache_capacity: usize,
}

impl Default for LimitsConfig {
	fn default() -> Self {
		Self {
			max_depth: DEFAULT_MAX_DEPTH,
			max_render_depth: DEFAULT_MAX_RENDER_DEPTH,
			cache_capacity: DEFAULT_CACHE_CAPACITY,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
	/// Format used by the `date` filter when none is given.
	pub date_format: String,
	/// Offset from UTC, in minutes, that dates are displayed in.
	pub utc_offset_minutes: i32,
}

impl Default for SiteConfig {
	fn default() -> Self {
		Self {
			date_format: DEFAULT_DATE_FORMAT.to_string(),
			utc_offset_minutes: 0,
		}
	}
}

impl SiteConfig {
	/// The configured offset, falling back to UTC when out of range.
	pub fn offset(&self) -> FixedOffset {
		self.utc_offset_minutes
			.checked_mul(60)
			.and_then(FixedOffset::east_opt)
			.unwrap_or_else(|| Utc.fix())
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
	pub sensitive_keywords: Vec<String>,
	pub denied_meta_keys: Vec<String>,
	pub protected_meta_prefix: String,
	pub table_prefix: String,
}

impl Default for SecurityConfig {
	fn default() -> Self {
		let policy = MetaPolicy::default();

		Self {
			sensitive_keywords: policy.sensitive_keywords,
			denied_meta_keys: policy.denied_keys,
			protected_meta_prefix: policy.protected_prefix,
			table_prefix: policy.table_prefix,
		}
	}
}

impl SecurityConfig {
	pub fn meta_policy(&self) -> MetaPolicy {
		MetaPolicy {
			protected_prefix: self.protected_meta_prefix.clone(),
			table_prefix: self.table_prefix.clone(),
			denied_keys: self.denied_meta_keys.clone(),
			sensitive_keywords: self.sensitive_keywords.clone(),
		}
	}
}

/// Alias overrides merged over the built-in tables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AliasesConfig {
	pub post: BTreeMap<String, AliasTarget>,
	pub user: BTreeMap<String, AliasTarget>,
}

impl AliasesConfig {
	pub fn document_table(&self) -> AliasTable {
		let mut table = default_document_aliases();
		table.extend(self.post.clone());
		table
	}

	pub fn principal_table(&self) -> AliasTable {
		let mut table = default_principal_aliases();
		table.extend(self.user.clone());
		table
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
	/// Attribute that marks an already-materialized expression element.
	pub pill_attribute: String,
	/// Elements whose content is never scanned.
	pub masked_tags: Vec<String>,
	/// Emit failures as HTML comments and render collections as markers.
	pub debug: bool,
}

impl Default for ScannerConfig {
	fn default() -> Self {
		Self {
			pill_attribute: DEFAULT_PILL_ATTRIBUTE.to_string(),
			masked_tags: vec!["code".to_string(), "pre".to_string(), "kbd".to_string()],
			debug: false,
		}
	}
}

/// The data file backing the reference store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataConfig {
	pub path: PathBuf,
	/// Explicit format. Inferred from the file extension when absent.
	#[serde(default)]
	pub format: Option<String>,
}

impl VexprConfig {
	/// Resolve the config path from known discovery candidates.
	#[must_use]
	pub fn resolve_path(root: &Path) -> Option<PathBuf> {
		CONFIG_FILE_CANDIDATES
			.iter()
			.map(|candidate| root.join(candidate))
			.find(|path| path.is_file())
	}

	/// Load the config from the first discovered config file at `root`.
	/// Returns `None` if the file does not exist.
	pub fn load(root: &Path) -> VexprResult<Option<VexprConfig>> {
		let Some(config_path) = Self::resolve_path(root) else {
			return Ok(None);
		};

		let content = std::fs::read_to_string(&config_path)?;
		let config = Self::from_toml(&content)?;
		tracing::debug!(path = %config_path.display(), "loaded config");

		Ok(Some(config))
	}

	pub fn from_toml(content: &str) -> VexprResult<VexprConfig> {
		toml::from_str(content).map_err(|e| VexprError::ConfigParse(e.to_string()))
	}
}
