use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Diagnostic, Error)]
#[non_exhaustive]
pub enum VexprError {
	#[error(transparent)]
	#[diagnostic(code(vexpr::io_error))]
	Io(#[from] std::io::Error),

	#[error("failed to parse config file: {0}")]
	#[diagnostic(
		code(vexpr::config_parse),
		help("check that vexpr.toml is valid TOML with [limits], [site], [security] and/or [aliases] sections")
	)]
	ConfigParse(String),

	#[error("failed to load data file `{path}`: {reason}")]
	#[diagnostic(code(vexpr::data_file))]
	DataFile { path: String, reason: String },

	#[error("unsupported data file format: `{0}`")]
	#[diagnostic(
		code(vexpr::unsupported_format),
		help("supported formats: json, toml, yaml, yml")
	)]
	UnsupportedDataFormat(String),

	#[error("invalid pattern `{pattern}`: {reason}")]
	#[diagnostic(
		code(vexpr::invalid_pattern),
		help("`scanner.masked_tags` and `scanner.pill_attribute` must be plain tag and attribute names")
	)]
	InvalidPattern { pattern: String, reason: String },

	#[error("data provider failed to resolve `{subject}`: {reason}")]
	#[diagnostic(code(vexpr::provider))]
	Provider { subject: String, reason: String },

	#[error("filter `{name}` failed: {reason}")]
	#[diagnostic(code(vexpr::filter))]
	Filter { name: String, reason: String },
}

pub type VexprResult<T> = Result<T, VexprError>;
pub type AnyError = Box<dyn std::error::Error>;
pub type AnyEmptyResult = Result<(), AnyError>;
pub type AnyResult<T> = Result<T, AnyError>;
