use std::path::PathBuf;

use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;

#[derive(Parser)]
#[command(
	author,
	version,
	about = "Evaluate inline personalization expressions in markup.",
	long_about = "vexpr evaluates `{{ expression }}` spans embedded in markup against a site, \
	              its documents and the signed-in user.\n\nData comes from a JSON, TOML or YAML \
	              file named with `--data` or in the `[data]` section of `vexpr.toml`.\n\nQuick \
	              start:\n  vexpr init                 Create a sample config and data file\n  \
	              vexpr eval 'user.name'     Evaluate one expression\n  vexpr render page.html    \
	              Expand every span in a file\n  vexpr check page.html     Report spans that \
	              fail to evaluate"
)]
pub struct VexprCli {
	#[command(subcommand)]
	pub command: Option<Commands>,

	/// Path to the project root directory, where `vexpr.toml` is discovered.
	#[arg(long, short, global = true)]
	pub path: Option<PathBuf>,

	/// Data file to evaluate against. Overrides `[data].path` from the
	/// config.
	#[arg(long, short, global = true)]
	pub data: Option<PathBuf>,

	/// Enable verbose output.
	#[arg(long, short, global = true, default_value_t = false)]
	pub verbose: bool,

	/// Disable colored output.
	#[arg(long, global = true, default_value_t = false)]
	pub no_color: bool,
}

#[derive(Subcommand)]
pub enum Commands {
	/// Create a sample `vexpr.toml` and `site.yaml` in the project root.
	///
	/// Existing files are left untouched.
	Init,
	/// Expand every expression span in a file and print the result.
	///
	/// Plain spans `{{ … }}` are HTML-escaped, raw spans `{{{ … }}}` are
	/// sanitized and comments `{{-- … --}}` are removed. Spans that fail to
	/// evaluate render as empty text and are logged as warnings.
	Render {
		/// The file to render.
		file: PathBuf,

		/// Treat the file as the body of the current document, so it cannot
		/// embed its own content or excerpt.
		#[arg(long, default_value_t = false)]
		protect: bool,
	},
	/// Evaluate a single expression and print its value.
	///
	/// The expression may be written with or without the surrounding `{{ }}`.
	Eval {
		/// The expression, e.g. `post.title | upper`.
		expression: String,

		/// Output format. `text` prints the rendered value, `json` prints the
		/// value as JSON.
		#[arg(long, value_enum, default_value_t = OutputFormat::Text)]
		format: OutputFormat,
	},
	/// Preview an expression the way an editor would, as JSON.
	///
	/// Prints `{"preview": …, "valid": …}`. Content protection is on, and a
	/// failing expression reports its error message as the preview.
	Preview {
		/// The expression to preview.
		expression: String,
	},
	/// Evaluate every span in a file and report the ones that fail.
	///
	/// Exits with a non-zero status code when any span fails. Spans inside
	/// `<code>`, `<pre>` and `<kbd>` are skipped.
	Check {
		/// The file to check.
		file: PathBuf,

		/// Output format for check results. Use `text` for human-readable
		/// output or `json` for programmatic consumption.
		#[arg(long, value_enum, default_value_t = OutputFormat::Text)]
		format: OutputFormat,
	},
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
	/// Human-readable text output.
	Text,
	/// JSON output for programmatic consumption.
	Json,
}
