use std::path::Path;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::Parser;
use owo_colors::OwoColorize;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use vexpr_cli::Commands;
use vexpr_cli::OutputFormat;
use vexpr_cli::VexprCli;
use vexpr_core::AstCache;
use vexpr_core::Engine;
use vexpr_core::SpanReport;
use vexpr_core::config::VexprConfig;
use vexpr_core::store::MemoryStore;

static USE_COLOR: std::sync::atomic::AtomicBool = std::sync::atomic::AtomicBool::new(true);

fn color_enabled() -> bool {
	USE_COLOR.load(std::sync::atomic::Ordering::Relaxed)
}

/// Apply ANSI color codes only when color is enabled.
macro_rules! colored {
	($text:expr,red) => {
		if color_enabled() {
			format!("{}", $text.red())
		} else {
			format!("{}", $text)
		}
	};
	($text:expr,green) => {
		if color_enabled() {
			format!("{}", $text.green())
		} else {
			format!("{}", $text)
		}
	};
	($text:expr,bold) => {
		if color_enabled() {
			format!("{}", $text.bold())
		} else {
			format!("{}", $text)
		}
	};
}

const SAMPLE_CONFIG: &str = "# vexpr configuration\n\n[data]\npath = \"site.yaml\"\n\n# \
                             [limits]\n# max_depth = 100\n# max_render_depth = 5\n\n# [site]\n# \
                             date_format = \"F j, Y\"\n# utc_offset_minutes = 0\n\n# \
                             [aliases.post]\n# headline = \"post_title\"\n\n# [scanner]\n# debug \
                             = true\n";

const SAMPLE_DATA: &str = "site:\n  name: Example\n  url: https://example.com\ncurrent_user: \
                           1\ncurrent_post: 10\nusers:\n  - id: 1\n    display_name: Ada\n    \
                           user_login: ada\n    meta:\n      favorite_color: teal\nposts:\n  - \
                           id: 10\n    post_title: Hello\n    post_name: hello\n    post_author: \
                           1\n    post_date: 2024-03-05 10:30:00\n";

fn main() {
	let args = VexprCli::parse();

	// Respect NO_COLOR env var, the --no-color flag and terminal support.
	let use_color = !args.no_color
		&& std::env::var_os("NO_COLOR").is_none()
		&& supports_color::on(supports_color::Stream::Stderr).is_some();
	if !use_color {
		USE_COLOR.store(false, std::sync::atomic::Ordering::Relaxed);
	}

	init_tracing(args.verbose, use_color);

	// Install miette's fancy handler for rich error diagnostics.
	miette::set_hook(Box::new(move |_| {
		Box::new(
			miette::MietteHandlerOpts::new()
				.color(use_color)
				.unicode(use_color)
				.build(),
		)
	}))
	.ok();

	let result = match &args.command {
		Some(Commands::Init) => run_init(&args),
		Some(Commands::Render { file, protect }) => run_render(&args, file, *protect),
		Some(Commands::Eval { expression, format }) => run_eval(&args, expression, *format),
		Some(Commands::Preview { expression }) => run_preview(&args, expression),
		Some(Commands::Check { file, format }) => run_check(&args, file, *format),
		None => {
			eprintln!("No subcommand specified. Run `vexpr --help` for usage.");
			process::exit(1);
		}
	};

	match result {
		Ok(true) => {}
		Ok(false) => process::exit(1),
		Err(e) => {
			// Try to render through miette for rich diagnostics with help text
			// and error codes.
			match e.downcast::<vexpr_core::VexprError>() {
				Ok(vexpr_err) => {
					let report: miette::Report = (*vexpr_err).into();
					eprintln!("{report:?}");
				}
				Err(e) => {
					eprintln!("{} {e}", colored!("error:", red));
				}
			}
			process::exit(2);
		}
	}
}

/// Log to stderr. `RUST_LOG` wins over `--verbose`.
fn init_tracing(verbose: bool, use_color: bool) {
	let level = if verbose { "debug" } else { "warn" };
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

	tracing_subscriber::registry()
		.with(
			tracing_subscriber::fmt::layer()
				.with_writer(std::io::stderr)
				.with_ansi(use_color)
				.with_target(verbose)
				.with_filter(filter),
		)
		.init();
}

fn resolve_root(args: &VexprCli) -> PathBuf {
	args.path
		.clone()
		.unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
}

/// Build an engine from the discovered config and the data file named by
/// `--data` or `[data].path`. Without either, the store is empty.
fn build_engine(args: &VexprCli) -> Result<Engine, Box<dyn std::error::Error>> {
	let root = resolve_root(args);
	let config = VexprConfig::load(&root)?.unwrap_or_default();

	let data = match (&args.data, &config.data) {
		(Some(path), _) => Some((path.clone(), None)),
		(None, Some(data)) => Some((root.join(&data.path), data.format.clone())),
		(None, None) => None,
	};

	let store = match data {
		Some((path, format)) => MemoryStore::load(&path, format.as_deref())?,
		None => {
			tracing::debug!("no data file configured, using an empty store");
			MemoryStore::new()
		}
	};

	let cache = Arc::new(AstCache::new(config.limits.cache_capacity));
	let engine = Engine::builder(Arc::new(store))
		.config(config)
		.cache(cache)
		.build()?;

	Ok(engine)
}

fn run_init(args: &VexprCli) -> Result<bool, Box<dyn std::error::Error>> {
	let root = resolve_root(args);
	let config_path = root.join("vexpr.toml");
	let data_path = root.join("site.yaml");

	if VexprConfig::resolve_path(&root).is_some() {
		println!("Config file already exists.");
	} else {
		std::fs::write(&config_path, SAMPLE_CONFIG)?;
		println!("Created config file: {}", config_path.display());
	}

	if data_path.exists() {
		println!("Data file already exists: {}", data_path.display());
	} else {
		std::fs::write(&data_path, SAMPLE_DATA)?;
		println!("Created data file: {}", data_path.display());

		println!();
		println!("Next steps:");
		println!("  1. Edit {} with your site data", data_path.display());
		println!("  2. Try an expression:");
		println!("     vexpr eval '{{{{ user.name | upper }}}}'");
	}

	Ok(true)
}

fn run_render(args: &VexprCli, file: &Path, protect: bool) -> Result<bool, Box<dyn std::error::Error>> {
	let mut engine = build_engine(args)?;
	let text = std::fs::read_to_string(file)?;

	let output = if protect {
		engine.render_content(&text)
	} else {
		engine.scan(&text)
	};
	print!("{output}");

	Ok(true)
}

fn run_eval(
	args: &VexprCli,
	expression: &str,
	format: OutputFormat,
) -> Result<bool, Box<dyn std::error::Error>> {
	let mut engine = build_engine(args)?;
	let value = engine.evaluate_expression(expression)?;

	match format {
		OutputFormat::Text => println!("{}", value.to_safe_string(engine.is_debug())),
		OutputFormat::Json => println!("{}", serde_json::to_string(&value)?),
	}

	Ok(true)
}

fn run_preview(args: &VexprCli, expression: &str) -> Result<bool, Box<dyn std::error::Error>> {
	let mut engine = build_engine(args)?;
	let preview = engine.preview(expression);
	println!("{}", serde_json::to_string(&preview)?);

	Ok(true)
}

/// Report every failing span. Returns `false` when any span fails.
fn run_check(
	args: &VexprCli,
	file: &Path,
	format: OutputFormat,
) -> Result<bool, Box<dyn std::error::Error>> {
	let mut engine = build_engine(args)?;
	let text = std::fs::read_to_string(file)?;
	let reports = engine.diagnose(&text);
	let failures: Vec<&SpanReport> = reports.iter().filter(|report| !report.is_ok()).collect();

	match format {
		OutputFormat::Json => {
			let output = serde_json::json!({
				"ok": failures.is_empty(),
				"spans": reports.len(),
				"errors": failures,
			});
			println!("{output}");
		}
		OutputFormat::Text if failures.is_empty() => {
			println!(
				"{} {} span(s) evaluated without errors.",
				colored!("Check passed:", green),
				reports.len()
			);
		}
		OutputFormat::Text => {
			eprintln!("{}", colored!("Check failed.", bold));
			for failure in &failures {
				eprintln!(
					"  `{}` at {}:{}:{}: {}",
					failure.expression,
					file.display(),
					failure.position.line,
					failure.position.column,
					failure.error.as_deref().unwrap_or_default()
				);
			}
			eprintln!();
			eprintln!(
				"{} of {} span(s) failed to evaluate",
				failures.len(),
				reports.len()
			);
		}
	}

	Ok(failures.is_empty())
}
