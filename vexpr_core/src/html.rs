use std::sync::LazyLock;

use lol_html::RewriteStrSettings;
use lol_html::element;
use lol_html::rewrite_str;
use regex::Captures;
use regex::Regex;

/// Elements removed together with everything inside them. Besides scripting
/// and embedding, this covers every element whose content the browser does
/// not parse as markup, so unwrapping it could never turn its text into
/// tags.
const STRIPPED_ELEMENTS: &[&str] = &[
	"applet", "embed", "frame", "frameset", "iframe", "math", "noembed", "noframes", "noscript",
	"object", "plaintext", "script", "style", "svg", "template", "textarea", "title", "xmp",
];

/// Elements kept by [`sanitize_html`]. Any other tag is dropped while its text
/// content stays.
const ALLOWED_TAGS: &[&str] = &[
	"a",
	"abbr",
	"b",
	"blockquote",
	"br",
	"cite",
	"code",
	"del",
	"div",
	"em",
	"figcaption",
	"figure",
	"h1",
	"h2",
	"h3",
	"h4",
	"h5",
	"h6",
	"hr",
	"i",
	"img",
	"ins",
	"kbd",
	"li",
	"mark",
	"ol",
	"p",
	"pre",
	"q",
	"s",
	"small",
	"span",
	"strong",
	"sub",
	"sup",
	"table",
	"tbody",
	"td",
	"th",
	"thead",
	"time",
	"tr",
	"u",
	"ul",
];

const ALLOWED_ATTRIBUTES: &[&str] = &[
	"alt", "class", "colspan", "datetime", "height", "href", "id", "lang", "rel", "rowspan",
	"src", "target", "title", "width",
];

const URL_ATTRIBUTES: &[&str] = &["href", "src"];

const ALLOWED_PROTOCOLS: &[&str] = &["http", "https", "mailto", "tel"];

static ENTITY: LazyLock<Regex> =
	LazyLock::new(|| compile(r"&(?:[a-zA-Z][a-zA-Z0-9]*|#[0-9]+|#[xX][0-9a-fA-F]+);"));

/// Compile a built-in pattern.
fn compile(pattern: &str) -> Regex {
	match Regex::new(pattern) {
		Ok(regex) => regex,
		Err(error) => panic!("invalid built-in pattern `{pattern}`: {error}"),
	}
}

/// Escape `& < > " '` for HTML text and attribute contexts.
pub fn escape_html(text: &str) -> String {
	let mut escaped = String::with_capacity(text.len());

	for character in text.chars() {
		match character {
			'&' => escaped.push_str("&amp;"),
			'<' => escaped.push_str("&lt;"),
			'>' => escaped.push_str("&gt;"),
			'"' => escaped.push_str("&quot;"),
			'\'' => escaped.push_str("&#039;"),
			character => escaped.push(character),
		}
	}

	escaped
}

/// Escape for HTML without double-encoding entities already present.
pub fn esc_html(text: &str) -> String {
	let mut escaped = String::with_capacity(text.len());
	let mut last = 0;

	for entity in ENTITY.find_iter(text) {
		escaped.push_str(&escape_html(&text[last..entity.start()]));
		escaped.push_str(entity.as_str());
		last = entity.end();
	}

	escaped.push_str(&escape_html(&text[last..]));
	escaped
}

/// Escape for an HTML attribute value. Identical rules to [`esc_html`].
pub fn esc_attr(text: &str) -> String {
	esc_html(text)
}

/// Decode the character references that can appear in a serialized
/// attribute value.
pub fn decode_entities(text: &str) -> String {
	ENTITY
		.replace_all(text, |captures: &Captures<'_>| {
			let entity = &captures[0];
			let name = &entity[1..entity.len() - 1];

			let decoded = match name {
				"amp" => Some('&'),
				"lt" => Some('<'),
				"gt" => Some('>'),
				"quot" => Some('"'),
				"apos" => Some('\''),
				"nbsp" => Some('\u{a0}'),
				_ => {
					let code = if let Some(hex) = name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
						u32::from_str_radix(hex, 16).ok()
					} else if let Some(decimal) = name.strip_prefix('#') {
						decimal.parse::<u32>().ok()
					} else {
						None
					};
					code.and_then(char::from_u32)
				}
			};

			decoded.map_or_else(|| entity.to_string(), |character| character.to_string())
		})
		.into_owned()
}

/// Reduce markup to a safe subset.
///
/// Scripting elements are removed with their content, unknown tags are
/// dropped while their text is kept, event-handler and unknown attributes are
/// removed and URLs with unsafe protocols are discarded. Comments are removed
/// and every `<` that does not open a complete tag is escaped, so the output
/// cannot leave a tag open for the surrounding page to finish.
pub fn sanitize_html(html: &str) -> String {
	if !html.contains('<') {
		return html.to_string();
	}

	let prepared = close_markup(html);
	let result = rewrite_str(
		&prepared,
		RewriteStrSettings {
			element_content_handlers: vec![element!("*", |el| {
				let tag = el.tag_name();

				if STRIPPED_ELEMENTS.contains(&tag.as_str()) {
					el.remove();
					return Ok(());
				}

				if !ALLOWED_TAGS.contains(&tag.as_str()) {
					el.remove_and_keep_content();
					return Ok(());
				}

				let attributes: Vec<(String, String)> = el
					.attributes()
					.iter()
					.map(|attribute| (attribute.name(), attribute.value()))
					.collect();

				// Re-added attributes are serialized quoted, whatever the source used.
				for (name, _) in &attributes {
					el.remove_attribute(name);
				}

				for (name, value) in &attributes {
					if keeps_attribute(name, value) {
						el.set_attribute(name, value)?;
					}
				}

				Ok(())
			})],
			..Default::default()
		},
	);

	match result {
		Ok(sanitized) => sanitized,
		Err(error) => {
			tracing::warn!(%error, "failed to sanitize markup, escaping it instead");
			escape_html(html)
		}
	}
}

fn keeps_attribute(name: &str, value: &str) -> bool {
	let allowed =
		ALLOWED_ATTRIBUTES.contains(&name) || name.starts_with("data-") || name.starts_with("aria-");

	allowed && (!URL_ATTRIBUTES.contains(&name) || is_safe_url(&decode_entities(value)))
}

/// Drop comments and escape every `<` that does not start a tag closed
/// within `html`. Tags, attribute values and comments end where the browser
/// ends them.
fn close_markup(html: &str) -> String {
	let bytes = html.as_bytes();
	let mut output = String::with_capacity(html.len());
	let mut cursor = 0;

	while let Some(offset) = html[cursor..].find('<') {
		let start = cursor + offset;
		output.push_str(&html[cursor..start]);

		let (end, keep) = match &bytes[start + 1..] {
			[first, ..] if first.is_ascii_alphabetic() => (tag_end(bytes, start + 1), true),
			[b'/', first, ..] if first.is_ascii_alphabetic() => (tag_end(bytes, start + 2), true),
			[b'!', b'-', b'-', ..] => (comment_end(html, start + 4), false),
			_ => (None, false),
		};

		match end {
			Some(end) => {
				if keep {
					output.push_str(&html[start..end]);
				}
				cursor = end;
			}
			None => {
				output.push_str("&lt;");
				cursor = start + 1;
			}
		}
	}

	output.push_str(&html[cursor..]);
	output
}

/// The index just past the `>` closing the tag whose name starts at `from`.
/// Quotes only delimit attribute values. `None` when the input ends first.
fn tag_end(bytes: &[u8], from: usize) -> Option<usize> {
	let is_space = |byte: u8| matches!(byte, b' ' | b'\t' | b'\n' | b'\r' | b'\x0C');
	let mut cursor = from;

	while !is_space(*bytes.get(cursor)?) && !matches!(bytes[cursor], b'/' | b'>') {
		cursor += 1;
	}

	loop {
		while is_space(*bytes.get(cursor)?) || bytes[cursor] == b'/' {
			cursor += 1;
		}

		if bytes[cursor] == b'>' {
			return Some(cursor + 1);
		}

		// Attribute name. A leading `=` belongs to the name.
		cursor += 1;
		while !is_space(*bytes.get(cursor)?) && !matches!(bytes[cursor], b'/' | b'>' | b'=') {
			cursor += 1;
		}

		while is_space(*bytes.get(cursor)?) {
			cursor += 1;
		}

		if bytes[cursor] != b'=' {
			continue;
		}

		cursor += 1;
		while is_space(*bytes.get(cursor)?) {
			cursor += 1;
		}

		match bytes[cursor] {
			quote @ (b'"' | b'\'') => {
				cursor += 1;
				cursor += bytes.get(cursor..)?.iter().position(|byte| *byte == quote)? + 1;
			}
			b'>' => return Some(cursor + 1),
			_ => {
				while !is_space(*bytes.get(cursor)?) && bytes[cursor] != b'>' {
					cursor += 1;
				}
			}
		}
	}
}

/// The index just past the end of a comment whose body starts at `from`.
fn comment_end(html: &str, from: usize) -> Option<usize> {
	let body = html.get(from..)?;

	if body.starts_with('>') {
		return Some(from + 1);
	}

	if body.starts_with("->") {
		return Some(from + 2);
	}

	[("-->", 3), ("--!>", 4)]
		.into_iter()
		.filter_map(|(marker, len)| body.find(marker).map(|index| (index, index + len)))
		.min()
		.map(|(_, end)| from + end)
}

/// A URL is safe when it is relative or uses an allowed protocol.
fn is_safe_url(url: &str) -> bool {
	let compact: String = url
		.chars()
		.filter(|character| !character.is_whitespace() && !character.is_control())
		.collect();

	// A colon after the first path, query or fragment delimiter is not a scheme.
	let scheme_end = compact.find(['/', '?', '#']).unwrap_or(compact.len());
	let head = &compact[..scheme_end];

	// A character reference left in the scheme could still decode to a colon.
	if head.contains('&') {
		return false;
	}

	let Some(colon) = head.find(':') else {
		return true;
	};

	let protocol = head[..colon].to_ascii_lowercase();
	ALLOWED_PROTOCOLS.contains(&protocol.as_str())
}
