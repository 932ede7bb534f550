use regex::Captures;
use regex::Regex;
use serde::Serialize;

use crate::config::ScannerConfig;
use crate::engine::Engine;
use crate::error::VexprError;
use crate::error::VexprResult;
use crate::html::decode_entities;
use crate::html::escape_html;
use crate::value::Value;

/// URL-encoded sequences some editors leave in saved markup.
const PERCENT_ENCODINGS: &[(&str, &str)] = &[
	("%7B%7B", "{{"),
	("%7D%7D", "}}"),
	("%7C", "|"),
	("%22", "\""),
	("%27", "'"),
	("%3D", "="),
];

const ESCAPED_OPEN: &str = "\\{{";
const ESCAPED_PLACEHOLDER: &str = "\u{2}vexpr:escaped\u{3}";

/// Decode [`PERCENT_ENCODINGS`] in one left-to-right pass. The second value
/// maps every byte of the decoded text, plus its end, to the source offset
/// it came from.
fn decode_percent(text: &str) -> (String, Vec<usize>) {
	let mut decoded = String::with_capacity(text.len());
	let mut origins = Vec::with_capacity(text.len() + 1);
	let mut cursor = 0;

	while let Some(rest) = text.get(cursor..).filter(|rest| !rest.is_empty()) {
		if let Some((encoded, plain)) = PERCENT_ENCODINGS
			.iter()
			.find(|(encoded, _)| rest.starts_with(encoded))
		{
			origins.extend(std::iter::repeat_n(cursor, plain.len()));
			decoded.push_str(plain);
			cursor += encoded.len();
			continue;
		}

		let Some(ch) = rest.chars().next() else {
			break;
		};
		origins.extend(cursor..cursor + ch.len_utf8());
		decoded.push(ch);
		cursor += ch.len_utf8();
	}

	origins.push(text.len());
	(decoded, origins)
}

fn mask_placeholder(index: usize) -> String {
	format!("\u{2}vexpr:mask:{index}\u{3}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanKind {
	/// `{{ expr }}`: the value is HTML-escaped.
	Escaped,
	/// `{{{ expr }}}`: the value is sanitized to safe markup.
	Raw,
	/// `{{-- note --}}`: removed from output.
	Comment,
	/// `<span data-vexpr="expr">…</span>`: the element is replaced by the
	/// escaped value.
	Pill,
}

/// One token span found in a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Span {
	pub kind: SpanKind,
	/// Byte offset of the opening delimiter.
	pub start: usize,
	/// Byte offset just past the closing delimiter.
	pub end: usize,
	/// Byte range of the text between the delimiters.
	pub inner: std::ops::Range<usize>,
}

/// Find every span in `text`, left to right.
///
/// At each `{{` the raw form `{{{ … }}}` is tried first, then the comment
/// form `{{-- … --}}`, then the plain form `{{ … }}`. An opener without a
/// matching closer is left as literal text.
pub fn find_spans(text: &str) -> Vec<Span> {
	let mut spans = Vec::new();
	let mut cursor = 0;

	while let Some(found) = text[cursor..].find("{{") {
		let start = cursor + found;
		let rest = &text[start..];

		let span = if rest.starts_with("{{{") {
			closing(text, start, 3, "}}}", SpanKind::Raw)
				.or_else(|| closing(text, start, 2, "}}", SpanKind::Escaped))
		} else if rest.starts_with("{{--") {
			closing(text, start, 4, "--}}", SpanKind::Comment)
		} else {
			closing(text, start, 2, "}}", SpanKind::Escaped)
		};

		match span {
			Some(span) => {
				cursor = span.end;
				spans.push(span);
			}
			None => cursor = start + 1,
		}
	}

	spans
}

fn closing(text: &str, start: usize, open_len: usize, close: &str, kind: SpanKind) -> Option<Span> {
	let inner_start = start + open_len;
	let inner_end = inner_start + text[inner_start..].find(close)?;

	Some(Span {
		kind,
		start,
		end: inner_end + close.len(),
		inner: inner_start..inner_end,
	})
}

/// A 1-indexed line and column with the byte offset it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Point {
	pub line: usize,
	pub column: usize,
	pub offset: usize,
}

/// Pre-computed line starts for offset-to-point conversion.
struct LineTable {
	line_starts: Vec<usize>,
}

impl LineTable {
	fn new(content: &str) -> Self {
		let mut line_starts = vec![0];
		for (i, byte) in content.bytes().enumerate() {
			if byte == b'\n' {
				line_starts.push(i + 1);
			}
		}
		Self { line_starts }
	}

	fn point(&self, offset: usize) -> Point {
		let line_idx = match self.line_starts.binary_search(&offset) {
			Ok(exact) => exact,
			Err(insert) => insert.saturating_sub(1),
		};

		Point {
			line: line_idx + 1,
			column: offset - self.line_starts[line_idx] + 1,
			offset,
		}
	}
}

/// The outcome of evaluating one span during [`Engine::diagnose`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpanReport {
	pub kind: SpanKind,
	pub expression: String,
	pub position: Point,
	/// The failure message, when evaluation failed.
	pub error: Option<String>,
}

impl SpanReport {
	pub fn is_ok(&self) -> bool {
		self.error.is_none()
	}
}

/// Patterns compiled from [`ScannerConfig`] once per engine.
#[derive(Debug, Clone)]
pub(crate) struct ScanPatterns {
	masks: Option<Regex>,
	pill: Regex,
	pill_attribute: String,
}

impl ScanPatterns {
	pub(crate) fn new(config: &ScannerConfig) -> VexprResult<Self> {
		if config.pill_attribute.trim().is_empty() {
			return Err(VexprError::InvalidPattern {
				pattern: config.pill_attribute.clone(),
				reason: "the pill attribute must not be empty".to_string(),
			});
		}

		let masks = if config.masked_tags.is_empty() {
			None
		} else {
			let alternatives = config
				.masked_tags
				.iter()
				.map(|tag| {
					let tag = regex::escape(tag);
					format!(r"<{tag}\b[^>]*>.*?</{tag}\s*>")
				})
				.collect::<Vec<_>>()
				.join("|");
			Some(compile(&format!("(?is){alternatives}"))?)
		};

		let attribute = regex::escape(&config.pill_attribute);
		let pill = compile(&format!(
			r#"(?is)<span\b[^>]*\s{attribute}="([^"]+)"[^>]*>.*?</span\s*>"#
		))?;

		Ok(Self {
			masks,
			pill,
			pill_attribute: config.pill_attribute.clone(),
		})
	}
}

fn compile(pattern: &str) -> VexprResult<Regex> {
	Regex::new(pattern).map_err(|e| {
		VexprError::InvalidPattern {
			pattern: pattern.to_string(),
			reason: e.to_string(),
		}
	})
}

impl Engine {
	/// Expand every span in `text`.
	///
	/// Comment spans are removed, raw spans are sanitized and plain spans are
	/// escaped. A failing span is reported to [`Hooks::on_error`] and renders
	/// as empty text, or as an HTML comment in debug mode; it never aborts the
	/// rest of the scan. Beyond the nested render depth the text is returned
	/// unchanged.
	///
	/// [`Hooks::on_error`]: crate::Hooks::on_error
	pub fn scan(&mut self, text: &str) -> String {
		let has_work = text.contains("{{")
			|| text.contains("%7B%7B")
			|| text.contains(&self.patterns.pill_attribute);

		if !has_work {
			return text.to_string();
		}

		if self.context.render_depth() >= self.limits.max_render_depth {
			tracing::debug!(
				depth = self.context.render_depth(),
				"nested render depth reached, leaving text unexpanded"
			);
			return text.to_string();
		}

		self.context.enter_render();
		let output = self.expand(text);
		self.context.exit_render();

		output
	}

	fn expand(&mut self, text: &str) -> String {
		let mut template = if text.contains("%7B%7B") {
			decode_percent(text).0
		} else {
			text.to_string()
		};

		let has_escaped = template.contains(ESCAPED_OPEN);
		if has_escaped {
			template = template.replace(ESCAPED_OPEN, ESCAPED_PLACEHOLDER);
		}

		let mut masked = Vec::new();
		if let Some(masks) = &self.patterns.masks {
			template = masks
				.replace_all(&template, |captures: &Captures<'_>| {
					masked.push(captures[0].to_string());
					mask_placeholder(masked.len() - 1)
				})
				.into_owned();
		}

		if template.contains(&self.patterns.pill_attribute) {
			template = self.expand_pills(&template);
		}

		let mut output = String::with_capacity(template.len());
		let mut last = 0;

		for span in find_spans(&template) {
			output.push_str(&template[last..span.start]);
			last = span.end;

			if span.kind == SpanKind::Comment {
				continue;
			}

			let expression = &template[span.inner.clone()];
			output.push_str(&self.render_span(expression, span.kind == SpanKind::Raw));
		}

		output.push_str(&template[last..]);

		for (index, original) in masked.iter().enumerate() {
			output = output.replace(&mask_placeholder(index), original);
		}

		if has_escaped {
			output = output.replace(ESCAPED_PLACEHOLDER, "{{");
		}

		output
	}

	/// Replace each materialized pill element with a fresh rendering of the
	/// expression it carries.
	fn expand_pills(&mut self, template: &str) -> String {
		let pill = self.patterns.pill.clone();

		pill.replace_all(template, |captures: &Captures<'_>| {
			let expression = decode_entities(&captures[1]);
			let expression = strip_delimiters(&expression).to_string();

			match self.evaluate_source(&expression, 0) {
				Ok(Value::Safe(safe)) => safe.into_inner(),
				Ok(value) => escape_html(&value.to_safe_string(self.debug)),
				Err(error) => self.report(&error, &expression),
			}
		})
		.into_owned()
	}

	fn render_span(&mut self, expression: &str, is_raw: bool) -> String {
		let value = match self.evaluate_source(expression, 0) {
			Ok(value) => value,
			Err(error) => return self.report(&error, expression),
		};

		let hooks = self.context.hooks();
		match hooks.render_token(value, expression, is_raw) {
			Value::Safe(safe) => safe.into_inner(),
			value if is_raw => hooks.sanitize(&value.to_safe_string(self.debug)),
			value => escape_html(&value.to_safe_string(self.debug)),
		}
	}

	fn report(&self, error: &VexprError, expression: &str) -> String {
		self.context.hooks().on_error(error, expression);

		if self.debug {
			format!("<!-- vexpr error: {} -->", escape_html(&error.to_string()))
		} else {
			String::new()
		}
	}

	/// Evaluate every span and pill in `text` and report which ones fail,
	/// with their positions in `text`. Percent-encoded delimiters are decoded
	/// first, as [`Engine::scan`] does. Spans inside masked elements, escaped
	/// spans and comments are skipped. Nothing is reported to
	/// [`Hooks::on_error`].
	///
	/// [`Hooks::on_error`]: crate::Hooks::on_error
	pub fn diagnose(&mut self, text: &str) -> Vec<SpanReport> {
		let decoded = text.contains("%7B%7B").then(|| decode_percent(text));
		let (source, origins) = match &decoded {
			Some((source, origins)) => (source.as_str(), Some(origins.as_slice())),
			None => (text, None),
		};
		let origin = |offset: usize| origins.map_or(offset, |origins| origins[offset]);

		let masked_ranges: Vec<_> = self
			.patterns
			.masks
			.as_ref()
			.map(|masks| masks.find_iter(source).map(|found| found.range()).collect())
			.unwrap_or_default();
		let is_masked = |offset: usize| masked_ranges.iter().any(|range| range.contains(&offset));

		let pills: Vec<_> = if source.contains(&self.patterns.pill_attribute) {
			self.patterns
				.pill
				.captures_iter(source)
				.filter_map(|captures| {
					let element = captures.get(0)?;
					let expression = decode_entities(&captures[1]);
					Some((element.range(), strip_delimiters(&expression).to_string()))
				})
				.filter(|(range, _)| !is_masked(range.start))
				.collect()
		} else {
			Vec::new()
		};

		let lines = LineTable::new(text);
		let mut reports = Vec::new();

		for (range, expression) in &pills {
			let error = self
				.evaluate_source(expression, 0)
				.err()
				.map(|error| error.to_string());

			reports.push(SpanReport {
				kind: SpanKind::Pill,
				expression: expression.clone(),
				position: lines.point(origin(range.start)),
				error,
			});
		}

		for span in find_spans(source) {
			let in_pill = pills.iter().any(|(range, _)| range.contains(&span.start));
			let escaped = source[..span.start].ends_with('\\');

			if is_masked(span.start) || in_pill || escaped || span.kind == SpanKind::Comment {
				continue;
			}

			let expression = source[span.inner.clone()].to_string();
			let error = self
				.evaluate_source(&expression, 0)
				.err()
				.map(|error| error.to_string());

			reports.push(SpanReport {
				kind: span.kind,
				expression: expression.trim().to_string(),
				position: lines.point(origin(span.start)),
				error,
			});
		}

		reports.sort_by_key(|report| report.position.offset);
		reports
	}
}

/// Strip one pair of surrounding `{{ }}` from an expression, if present.
pub(crate) fn strip_delimiters(text: &str) -> &str {
	let trimmed = text.trim();

	if trimmed.len() >= 4 && trimmed.starts_with("{{") && trimmed.ends_with("}}") {
		return &trimmed[2..trimmed.len() - 2];
	}

	trimmed
}
