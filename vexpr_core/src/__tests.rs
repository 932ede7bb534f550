use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::FixedOffset;
use chrono::Offset;
use chrono::Utc;
use rstest::rstest;
use similar_asserts::assert_eq;
use tracing_test::traced_test;

use super::__fixtures::*;
use super::*;
use crate::config::DEFAULT_MAX_RENDER_DEPTH;
use crate::config::VexprConfig;
use crate::store::MemoryStore;

fn render(expression: &str) -> VexprResult<String> {
	Ok(engine()?.evaluate_expression(expression)?.to_safe_string(false))
}

fn get(target: Node, key: &str) -> Node {
	Node::Get {
		target: Arc::new(target),
		key: key.to_string(),
	}
}

fn var(name: &str) -> Node {
	Node::Var(name.to_string())
}

#[rstest]
#[case::access(
	"post.title | upper",
	vec![
		Token::Ident("post".into()),
		Token::Op(Operator::Dot),
		Token::Ident("title".into()),
		Token::Op(Operator::Pipe),
		Token::Ident("upper".into()),
	]
)]
#[case::two_character_operators(
	"a >= 1.5 && TRUE || Null",
	vec![
		Token::Ident("a".into()),
		Token::Op(Operator::Gte),
		Token::Num(1.5),
		Token::Op(Operator::And),
		Token::Bool(true),
		Token::Op(Operator::Or),
		Token::Null,
	]
)]
#[case::escaped_delimiter(r"'it\'s'", vec![Token::Str("it's".into())])]
#[case::other_delimiter_untouched(r#""say \'hi\'""#, vec![Token::Str(r"say \'hi\'".into())])]
#[case::unterminated_string("'open", vec![Token::Str("open".into())])]
#[case::dotted_number("1.2.3", vec![Token::Num(1.2)])]
#[case::unknown_characters("a # b", vec![Token::Ident("a".into()), Token::Ident("b".into())])]
#[case::empty("   ", vec![])]
fn tokenize_expressions(#[case] source: &str, #[case] expected: Vec<Token>) {
	assert_eq!(tokenize(source), expected);
}

#[test]
fn parse_member_access() {
	let node = parse(&tokenize("post.meta.color"));
	assert_eq!(node, get(get(var("post"), "meta"), "color"));
	assert_eq!(node.path().as_deref(), Some("post.meta.color"));
}

#[test]
fn parse_dynamic_access_has_no_path() {
	let node = parse(&tokenize("site['name']"));
	assert_eq!(
		node,
		Node::GetDyn {
			target: Arc::new(var("site")),
			key: Arc::new(Node::Str("name".into())),
		}
	);
	assert_eq!(node.path(), None);
}

#[test]
fn parse_respects_precedence() {
	let node = parse(&tokenize("1 + 2 * 3"));
	assert_eq!(
		node,
		Node::Binary {
			op: BinaryOp::Add,
			left: Arc::new(Node::Num(1.0)),
			right: Arc::new(Node::Binary {
				op: BinaryOp::Mul,
				left: Arc::new(Node::Num(2.0)),
				right: Arc::new(Node::Num(3.0)),
			}),
		}
	);
}

#[test]
fn parse_filter_arguments() {
	let node = parse(&tokenize("x | truncate 5, '...' | if then='a' else='b'"));
	let truncate = Node::Filter {
		input: Arc::new(var("x")),
		name: "truncate".into(),
		args: vec![
			FilterArg {
				name: None,
				value: Node::Num(5.0),
			},
			FilterArg {
				name: None,
				value: Node::Str("...".into()),
			},
		],
	};

	assert_eq!(
		node,
		Node::Filter {
			input: Arc::new(truncate),
			name: "if".into(),
			args: vec![
				FilterArg {
					name: Some("then".into()),
					value: Node::Str("a".into()),
				},
				FilterArg {
					name: Some("else".into()),
					value: Node::Str("b".into()),
				},
			],
		}
	);
}

#[rstest]
#[case::dangling_dot("post.", var("post"))]
#[case::dangling_pipe("x |", var("x"))]
#[case::missing_operand("!", Node::Not(Arc::new(Node::Null)))]
#[case::trailing_tokens("a b c", var("a"))]
fn parse_malformed_input(#[case] source: &str, #[case] expected: Node) {
	assert_eq!(parse(&tokenize(source)), expected);
}

#[rstest]
#[case::upper("upper", Some(Filter::Upper))]
#[case::uppercase("uppercase", Some(Filter::Upper))]
#[case::upper_first("upper_first", Some(Filter::Capitalize))]
#[case::get("get", Some(Filter::Prop))]
#[case::resolve("resolve", Some(Filter::GetPost))]
#[case::render_is_native("render", None)]
#[case::unknown("sparkle", None)]
fn filter_names(#[case] name: &str, #[case] expected: Option<Filter>) {
	assert_eq!(Filter::from_name(name), expected);
}

#[rstest]
#[case::null(Value::Null, false)]
#[case::zero(Value::from(0_i64), false)]
#[case::zero_string(Value::from("0"), false)]
#[case::empty_string(Value::from(""), false)]
#[case::empty_list(Value::List(vec![]), false)]
#[case::zero_point_zero_string(Value::from("0.0"), true)]
#[case::text(Value::from("no"), true)]
#[case::anonymous_entity(Value::from(Entity::new(EntityKind::Principal, 0)), true)]
#[case::safe_empty(Value::Safe(SafeString::new("")), true)]
fn truthiness(#[case] value: Value, #[case] expected: bool) {
	assert_eq!(value.is_truthy(), expected);
}

#[rstest]
#[case::integer("42", true)]
#[case::signed_fraction(" -4.5 ", true)]
#[case::exponent("1e3", true)]
#[case::leading_dot(".5", true)]
#[case::bare_dot(".", false)]
#[case::trailing_text("12px", false)]
#[case::empty("", false)]
fn numeric_strings(#[case] text: &str, #[case] expected: bool) {
	assert_eq!(is_numeric_str(text), expected);
}

#[rstest]
#[case::integral(3.0, "3")]
#[case::negative(-12.0, "-12")]
#[case::fraction(0.5, "0.5")]
#[case::nan(f64::NAN, "NAN")]
#[case::infinite(f64::NEG_INFINITY, "-INF")]
fn number_formatting(#[case] value: f64, #[case] expected: &str) {
	assert_eq!(format_number(value), expected);
}

#[rstest]
#[case::number_and_numeric_string("1 == '1'", true)]
#[case::number_and_decimal_string("1 == '1.0'", true)]
#[case::number_and_text("'abc' == 0", false)]
#[case::null_and_false("null == false", true)]
#[case::null_and_empty("null == ''", true)]
#[case::bool_and_text("true == 'x'", true)]
#[case::numeric_strings("'10' > '9'", true)]
#[case::text_strings("'abc' < 'abd'", true)]
#[case::gte("2 >= 2", true)]
#[case::lte("3 <= 2", false)]
#[case::not_equal("1 != 2", true)]
#[case::same_entity("post == (10 | get_post)", true)]
#[case::different_entity("post == (11 | get_post)", false)]
fn loose_comparisons(#[case] expression: &str, #[case] expected: bool) -> VexprResult<()> {
	let value = engine()?.evaluate_expression(expression)?;
	assert_eq!(value, Value::Bool(expected));

	Ok(())
}

#[rstest]
#[case::concatenate("'Hi ' + 1 + 1", Value::from("Hi 11"))]
#[case::numeric_string_sum("1 + '2'", Value::from(3_i64))]
#[case::numbers_first("1 + 1 + ' apples'", Value::from("2 apples"))]
#[case::multiply_strings("'5' * '2'", Value::from(10_i64))]
#[case::subtract("10 - 2.5", Value::from(7.5))]
#[case::divide("9 / 2", Value::from(4.5))]
#[case::divide_by_zero("10 / 0", Value::from(0_i64))]
#[case::modulo("7 % 3", Value::from(1_i64))]
#[case::modulo_by_zero("10 % 0", Value::from(0_i64))]
#[case::and_returns_bool("'a' && 'b'", Value::Bool(true))]
#[case::or_returns_bool("0 || ''", Value::Bool(false))]
#[case::not("!user.is_logged_in", Value::Bool(false))]
#[case::grouping("(1 + 2) * 3", Value::from(9_i64))]
#[case::empty_source("", Value::Null)]
fn arithmetic_and_logic(#[case] expression: &str, #[case] expected: Value) -> VexprResult<()> {
	assert_eq!(engine()?.evaluate_expression(expression)?, expected);

	Ok(())
}

#[rstest]
#[case::user_name("user.name", "Ada")]
#[case::user_email("user.email", "ada@example.com")]
#[case::user_id("user.id", "1")]
#[case::post_id("post.id", "10")]
#[case::post_status("post.status", "publish")]
#[case::post_slug("post.slug", "hello-world")]
#[case::author_name("post.author_name", "Ada")]
#[case::permalink("post.url", "https://example.com/hello-world/")]
#[case::logged_in("user.is_logged_in", "1")]
#[case::index("user.roles[1]", "author")]
#[case::dynamic_key("site['name']", "Example")]
#[case::dynamic_expression_key("site['na' + 'me']", "Example")]
#[case::missing_site_key("site.description", "")]
#[case::unknown_member("post.nope", "")]
#[case::storage_field_hidden("post.post_title", "")]
#[case::unknown_root("nothing.here", "")]
#[case::interpolation("'Hello {user.name}!'", "Hello Ada!")]
#[case::escaped_interpolation(r"'literal \{user.name}'", "literal {user.name}")]
#[case::unclosed_interpolation("'open { brace'", "open { brace")]
#[case::ternary("user.is_logged_in ? 'in' : 'out'", "in")]
#[case::nested_ternary("0 ? 'a' : 1 ? 'b' : 'c'", "b")]
#[case::collection_output("site.tags", "")]
fn resolve_expressions(#[case] expression: &str, #[case] expected: &str) -> VexprResult<()> {
	assert_eq!(render(expression)?, expected);

	Ok(())
}

#[rstest]
#[case::upper("'hello world' | upper", "HELLO WORLD")]
#[case::lowercase("'HeLLo' | lowercase", "hello")]
#[case::capitalize("'hello big world' | capitalize", "Hello Big World")]
#[case::trim("'  padded  ' | trim", "padded")]
#[case::trim_chars("'xxhixx' | trim 'x'", "hi")]
#[case::replace("'a-b-c' | replace '-', '+'", "a+b+c")]
#[case::replace_named("'a-b-c' | replace search='-' replace=''", "abc")]
#[case::kebab("'Hello, World! 2024' | kebab", "hello-world-2024")]
#[case::truncate("'abcdef' | truncate 3", "abc…")]
#[case::truncate_suffix("'abcdef' | truncate 3 '...'", "abc...")]
#[case::truncate_short("'abc' | truncate 5", "abc")]
#[case::join("site.tags | join ', '", "news, rust")]
#[case::join_default_glue("user.roles | join", "editor,author")]
#[case::map_without_key("site.tags | map | join '/'", "news/rust")]
#[case::if_named("user.is_logged_in | if then='yes' else='no'", "yes")]
#[case::if_positional("0 | if 'yes', 'no'", "no")]
#[case::if_missing_branch("0 | if 'yes'", "")]
#[case::match_case("'b' | match a='Apple' b='Banana' default='Other'", "Banana")]
#[case::match_default("'z' | match a='Apple' default='Other'", "Other")]
#[case::match_numeric("2 | match '1'='one' '2'='two'", "two")]
#[case::default_missing("user.meta.nickname | default 'friend'", "friend")]
#[case::default_zero("0 | default 'x'", "x")]
#[case::default_set("'set' | default 'x'", "set")]
#[case::default_without_argument("null | default", "")]
#[case::get_user("post.author | get_user | prop 'name'", "Ada")]
#[case::get_post("11 | get_post | prop 'title'", "Second")]
#[case::resolve_alias("'11' | resolve | get 'title'", "Second")]
#[case::get_post_invalid_id("'abc' | get_post | prop 'title'", "")]
#[case::get_meta("user | get_meta 'favorite_color'", "teal")]
#[case::get_meta_denied("user | get_meta 'session_tokens'", "")]
#[case::esc_html("'<b>&amp;</b>' | esc_html", "&lt;b&gt;&amp;&lt;/b&gt;")]
#[case::esc_attr("'\"quoted\"' | esc_attr", "&quot;quoted&quot;")]
#[case::raw("'<em onclick=\"x()\">hi</em>' | raw", "<em>hi</em>")]
#[case::raw_unterminated_tag("'<img src=x onerror=alert(1)' | raw", "&lt;img src=x onerror=alert(1)")]
#[case::unknown_filter("'x' | sparkle", "x")]
#[case::chained("post.title | lower | kebab", "hello-world")]
fn filters(#[case] expression: &str, #[case] expected: &str) -> VexprResult<()> {
	assert_eq!(render(expression)?, expected);

	Ok(())
}

#[test]
fn truncate_rejects_non_numeric_length() -> VexprResult<()> {
	let result = engine()?.evaluate_expression("'abc' | truncate 'x'");
	let Err(VexprError::Filter { name, reason }) = result else {
		panic!("expected a filter error, got {result:?}");
	};

	assert_eq!(name, "truncate");
	assert_eq!(reason, "length must be a number, got `x`");

	Ok(())
}

#[rstest]
#[case::identity("plain text { } }} without spans", "plain text { } }} without spans")]
#[case::greeting("Hi {{ user.name }}!", "Hi Ada!")]
#[case::escaped_output("{{ post.title }}", "Hello &lt;World&gt;")]
#[case::raw_output("{{{ post.meta.subtitle }}}", "Sub <b>title</b>")]
#[case::raw_output_sanitized("{{{ post.title }}}", "Hello ")]
#[case::raw_output_unterminated_tag(
	r#"<p>{{{ '<img src=x onerror="alert(1)"' }}}</p>"#,
	r#"<p>&lt;img src=x onerror="alert(1)"</p>"#
)]
#[case::plain_markup_escaped("{{ post.meta.subtitle }}", "Sub &lt;b&gt;title&lt;/b&gt;")]
#[case::comment("a{{-- editor note --}}b", "ab")]
#[case::escaped_span(r"\{{ user.name }}", "{{ user.name }}")]
#[case::unclosed_span("{{ user.name", "{{ user.name")]
#[case::masked_code("<code>{{ user.name }}</code> {{ user.name }}", "<code>{{ user.name }}</code> Ada")]
#[case::masked_pre("<pre class=\"x\">{{ user.name }}</pre>", "<pre class=\"x\">{{ user.name }}</pre>")]
#[case::percent_encoded("%7B%7B user.name %7D%7D", "Ada")]
#[case::percent_encoded_filter("%7B%7B user.name %7C upper %7D%7D", "ADA")]
#[case::pill(
	"<p><span class=\"pill\" data-vexpr=\"{{ user.name }}\">stale</span></p>",
	"<p>Ada</p>"
)]
#[case::pill_with_entities(
	"<span data-vexpr=\"{{ user.meta.nickname | default &quot;friend&quot; }}\">x</span>",
	"friend"
)]
#[case::safe_values_not_double_escaped("{{ '<b>' | esc_html }}", "&lt;b&gt;")]
#[case::meta_allowed("{{ user.meta.favorite_color }}", "teal")]
#[case::meta_hard_denied("[{{ user.meta.session_tokens }}]", "[]")]
#[case::meta_sensitive("[{{ user.meta.api_key }}]", "[]")]
#[case::meta_protected_prefix("[{{ user.meta._edit_lock }}]", "[]")]
#[case::meta_missing("[{{ user.meta.nothing }}]", "[]")]
#[case::not_rendered_again("{{ post.content }}", "The body {{ post.content }}")]
#[case::multiple("{{ user.name }} / {{ site.name }}", "Ada / Example")]
fn scan_templates(#[case] template: &str, #[case] expected: &str) -> VexprResult<()> {
	assert_eq!(engine()?.scan(template), expected);

	Ok(())
}

#[test]
fn ternary_evaluates_only_the_taken_branch() -> VexprResult<()> {
	let hooks = RecordingHooks::default();
	let mut engine = recording_engine(&hooks)?;

	assert_eq!(engine.scan("{{ true ? 'a' : (1 | tick) }}"), "a");
	assert_eq!(engine.scan("{{ false ? (1 | tick) : 'b' }}"), "b");
	assert_eq!(hooks.tick_count(), 0);

	assert_eq!(engine.scan("{{ true ? (1 | tick) : 'b' }}"), "1");
	assert_eq!(hooks.tick_count(), 1);

	Ok(())
}

#[test]
fn logical_operators_short_circuit() -> VexprResult<()> {
	let hooks = RecordingHooks::default();
	let mut engine = recording_engine(&hooks)?;

	assert_eq!(engine.evaluate_expression("false && (1 | tick)")?, Value::Bool(false));
	assert_eq!(engine.evaluate_expression("true || (1 | tick)")?, Value::Bool(true));
	assert_eq!(hooks.tick_count(), 0);

	assert_eq!(engine.evaluate_expression("true && (1 | tick)")?, Value::Bool(true));
	assert_eq!(engine.evaluate_expression("false || (0 | tick)")?, Value::Bool(false));
	assert_eq!(hooks.tick_count(), 2);

	Ok(())
}

#[test]
fn failing_spans_render_empty_and_are_reported() -> VexprResult<()> {
	let hooks = RecordingHooks::default();
	let mut engine = recording_engine(&hooks)?;

	assert_eq!(engine.scan("a{{ 'x' | explode }}b{{ user.name }}"), "abAda");
	assert_eq!(
		hooks.reported(),
		vec!["'x' | explode: filter `explode` failed: boom".to_string()]
	);

	Ok(())
}

#[test]
fn debug_mode_reports_failures_inline() -> VexprResult<()> {
	let config = config("[scanner]\ndebug = true\n")?;
	let mut engine = engine_with(sample_store(), config)?;

	assert_eq!(
		engine.scan("{{ 'abc' | truncate 'x' }}"),
		"<!-- vexpr error: filter `truncate` failed: length must be a number, got `x` -->"
	);
	assert_eq!(engine.scan("{{ site.tags }}|{{ user }}"), "[Array]|[Object]");
	assert!(engine.is_debug());

	Ok(())
}

#[test]
fn self_referencing_root_alias_terminates() -> VexprResult<()> {
	let config = config("[roots]\na = \"a.b\"\nauthor = \"post.author | get_user\"\n")?;
	let mut engine = engine_with(sample_store(), config)?;

	assert_eq!(engine.scan("[{{ a.b }}]"), "[]");
	assert!(engine.evaluate_expression("a.b")?.is_null());
	assert_eq!(engine.scan("{{ author.name }}"), "Ada");

	Ok(())
}

#[test]
fn self_referencing_field_alias_resolves_to_empty() -> VexprResult<()> {
	let config = config(
		r#"
[aliases.post]
title = { expression = "post.title" }
shout = { expression = "this.slug | upper" }
"#,
	)?;
	let mut engine = engine_with(sample_store(), config)?;

	assert_eq!(engine.evaluate_expression("post.title")?, Value::from(""));
	assert_eq!(engine.scan("{{ post.shout }}"), "HELLO-WORLD");
	assert_eq!(engine.scan("{{ 11 | get_post | prop 'shout' }}"), "SECOND");
	assert!(!engine.context().is_resolving("post.title"));

	Ok(())
}

#[test]
fn deep_nesting_is_capped() -> VexprResult<()> {
	let expression = format!("{}true", "!".repeat(150));
	let value = engine()?.evaluate_expression(&expression)?;
	assert!(matches!(value, Value::Bool(_)));

	let config = config("[limits]\nmax_depth = 0\n")?;
	let mut engine = engine_with(sample_store(), config)?;
	assert_eq!(engine.evaluate_expression("1")?, Value::from(1_i64));
	assert!(engine.evaluate_expression("post.title")?.is_null());

	Ok(())
}

/// Length of the longest path from `node` to a leaf.
fn node_depth(node: &Node) -> usize {
	let children: Vec<&Node> = match node {
		Node::Str(_) | Node::Num(_) | Node::Bool(_) | Node::Null | Node::Var(_) => Vec::new(),
		Node::Get { target, .. } => vec![target.as_ref()],
		Node::GetDyn { target, key } => vec![target.as_ref(), key.as_ref()],
		Node::Not(operand) => vec![operand.as_ref()],
		Node::Binary { left, right, .. } => vec![left.as_ref(), right.as_ref()],
		Node::Ternary {
			condition,
			then,
			otherwise,
		} => vec![condition.as_ref(), then.as_ref(), otherwise.as_ref()],
		Node::Filter { input, args, .. } => {
			let mut children = vec![input.as_ref()];
			children.extend(args.iter().map(|arg| &arg.value));
			children
		}
	};

	1 + children.into_iter().map(node_depth).max().unwrap_or(0)
}

#[rstest]
#[case::parentheses(format!("{}1{}", "(".repeat(5_000), ")".repeat(5_000)))]
#[case::negations(format!("{}true", "!".repeat(5_000)))]
#[case::dynamic_access(format!("{}1{}", "a[".repeat(5_000), "]".repeat(5_000)))]
#[case::ternaries("a ? b : ".repeat(5_000) + "c")]
#[case::additions(format!("1{}", " + 1".repeat(20_000)))]
#[case::filter_chain(format!("'x'{}", " | upper".repeat(20_000)))]
#[case::filter_arguments(format!("'x'{}", " | default (".repeat(5_000)))]
fn deep_parenthesis_nesting_degrades(#[case] expression: String) -> VexprResult<()> {
	let node = parse(&tokenize(&expression));
	assert!(node_depth(&node) <= 2 * MAX_NESTING + 2);

	let mut engine = engine()?;
	let rendered = engine.scan(&format!("<p>{{{{ {expression} }}}}</p>"));
	assert!(rendered.starts_with("<p>"));
	assert!(rendered.ends_with("</p>"));

	Ok(())
}

#[test]
fn shallow_nesting_is_unaffected_by_the_parser_cap() -> VexprResult<()> {
	let expression = format!("{}1 + 1{}", "(".repeat(10), ")".repeat(10));
	assert_eq!(engine()?.evaluate_expression(&expression)?, Value::from(2_i64));

	let expression = format!("{}true", "!".repeat(MAX_NESTING - 1));
	assert_eq!(engine()?.evaluate_expression(&expression)?, Value::Bool(false));

	Ok(())
}

#[test]
fn render_filter_expands_nested_templates() -> VexprResult<()> {
	let store = sample_store().with_site("greeting", "Hello {{ user.name }}");
	let mut engine = engine_with(store, VexprConfig::default())?;

	assert_eq!(engine.scan("{{ site.greeting | render }}"), "Hello Ada");
	assert_eq!(engine.scan("{{ site.greeting }}"), "Hello {{ user.name }}");

	Ok(())
}

#[test]
fn nested_render_depth_is_capped() -> VexprResult<()> {
	let store = sample_store().with_site("loop", "L{{ site.loop | render }}");
	let mut engine = engine_with(store, VexprConfig::default())?;

	assert_eq!(
		engine.scan("{{ site.loop | render }}"),
		"LLLLL{{ site.loop | render }}"
	);
	// The depth counter unwinds after every scan.
	assert_eq!(engine.scan("{{ user.name }}"), "Ada");

	let config = config("[limits]\nmax_render_depth = 2\n")?;
	let store = sample_store().with_site("loop", "L{{ site.loop | render }}");
	let mut engine = engine_with(store, config)?;
	assert_eq!(
		engine.scan("{{ site.loop | render }}"),
		"LL{{ site.loop | render }}"
	);

	Ok(())
}

#[test]
fn cache_is_transparent() -> VexprResult<()> {
	let cache = Arc::new(AstCache::new(8));
	let mut engine = Engine::builder(Arc::new(sample_store()))
		.cache(Arc::clone(&cache))
		.build()?;

	let cold = engine.evaluate_expression("1 + 2")?;
	let warm = engine.evaluate_expression("1 + 2")?;
	assert_eq!(cold, warm);
	assert_eq!(cold, Value::from(3_i64));

	insta::assert_debug_snapshot!(cache.stats(), @r"
	CacheStats {
	    hits: 1,
	    misses: 1,
	    resets: 0,
	    entries: 1,
	}
	");

	Ok(())
}

#[test]
fn cache_clears_at_capacity() {
	let cache = AstCache::new(2);

	assert!(cache.get_or_parse("a").is_some());
	assert!(cache.get_or_parse("b").is_some());
	assert!(cache.get_or_parse("c").is_some());
	assert!(cache.get_or_parse("   ").is_none());

	let stats = cache.stats();
	assert_eq!(stats.resets, 1);
	assert_eq!(stats.entries, 1);
	assert_eq!(cache.capacity(), 2);

	cache.clear();
	assert!(cache.is_empty());
}

#[test]
fn sessions_share_a_cache_across_threads() -> VexprResult<()> {
	let cache = Arc::new(AstCache::new(32));
	let outputs = std::thread::scope(|scope| {
		let handles: Vec<_> = (0..4)
			.map(|_| {
				let cache = Arc::clone(&cache);
				scope.spawn(move || -> VexprResult<String> {
					let mut engine = Engine::builder(Arc::new(sample_store()))
						.cache(cache)
						.build()?;
					Ok(engine.scan("{{ user.name | upper }} reads {{ post.slug }}"))
				})
			})
			.collect();

		handles
			.into_iter()
			.map(|handle| handle.join().unwrap_or_else(|_| panic!("render thread panicked")))
			.collect::<VexprResult<Vec<_>>>()
	})?;

	for output in outputs {
		assert_eq!(output, "ADA reads hello-world");
	}

	Ok(())
}

#[test]
fn content_protection_blanks_the_current_body() -> VexprResult<()> {
	let mut engine = engine()?;
	let body = "The body {{ post.content }}";

	assert_eq!(engine.render_content(body), "The body ");
	assert!(!engine.content_protection());

	engine.set_content_protection(true);
	assert_eq!(engine.scan("[{{ post.excerpt }}]"), "[]");
	assert_eq!(engine.scan("{{ 11 | get_post | prop 'content' }}"), "Second body");
	assert_eq!(engine.scan("{{ post.title }}"), "Hello &lt;World&gt;");
	engine.set_content_protection(false);

	assert_eq!(engine.scan("{{ post.excerpt }}"), "A summary");

	Ok(())
}

#[test]
fn with_content_protection_restores_previous_setting() -> VexprResult<()> {
	let mut engine = engine()?;
	engine.set_content_protection(true);

	let inner = engine.with_content_protection(|engine| engine.content_protection());
	assert!(inner);
	assert!(engine.content_protection());

	Ok(())
}

#[test]
fn preview_expressions() -> VexprResult<()> {
	let mut engine = engine()?;

	assert_eq!(
		engine.preview("{{ user.name | upper }}"),
		Preview {
			preview: "ADA".into(),
			valid: true,
		}
	);
	assert_eq!(
		engine.preview("post.content"),
		Preview {
			preview: String::new(),
			valid: true,
		}
	);
	assert_eq!(
		engine.preview("'abc' | truncate 'x'"),
		Preview {
			preview: "filter `truncate` failed: length must be a number, got `x`".into(),
			valid: false,
		}
	);

	Ok(())
}

#[rstest]
#[case::single_span("{{ site.tags }}", Value::List(vec![Value::from("news"), Value::from("rust")]))]
#[case::single_span_number(" {{ 1 + 1 }} ", Value::from(2_i64))]
#[case::mixed_text("Hello {{ user.name }}", Value::from("Hello Ada"))]
#[case::two_spans("{{ 1 }}{{ 2 }}", Value::from("12"))]
#[case::static_text("plain", Value::from("plain"))]
fn parse_attributes(#[case] attribute: &str, #[case] expected: Value) -> VexprResult<()> {
	assert_eq!(engine()?.parse_attribute(attribute)?, expected);

	Ok(())
}

#[test]
fn diagnose_reports_positions_and_failures() -> VexprResult<()> {
	let hooks = RecordingHooks::default();
	let mut engine = recording_engine(&hooks)?;
	let text = "line1\n{{ user.name }} {{ 'x' | explode }}\n<code>{{ ignored }}</code>{{-- note --}}";

	let reports = engine.diagnose(text);
	assert_eq!(reports.len(), 2);

	assert!(reports[0].is_ok());
	assert_eq!(reports[0].expression, "user.name");
	assert_eq!(
		reports[0].position,
		Point {
			line: 2,
			column: 1,
			offset: 6,
		}
	);

	assert_eq!(reports[1].kind, SpanKind::Escaped);
	assert_eq!(reports[1].error.as_deref(), Some("filter `explode` failed: boom"));
	assert_eq!(reports[1].position.line, 2);
	assert_eq!(reports[1].position.column, 17);

	assert!(hooks.reported().is_empty());

	Ok(())
}

#[test]
fn diagnose_decodes_percent_delimiters_and_pills() -> VexprResult<()> {
	let hooks = RecordingHooks::default();
	let mut engine = recording_engine(&hooks)?;
	let text = "a %7B%7B 'x' %7C explode %7D%7D\n<span data-vexpr=\"{{ 'y' | explode }}\">old</span> {{ user.name }}";

	let reports = engine.diagnose(text);
	let summary: Vec<_> = reports
		.iter()
		.map(|report| (report.kind, report.expression.as_str(), report.is_ok()))
		.collect();
	assert_eq!(
		summary,
		vec![
			(SpanKind::Escaped, "'x' | explode", false),
			(SpanKind::Pill, "'y' | explode", false),
			(SpanKind::Escaped, "user.name", true),
		]
	);

	let points: Vec<_> = reports.iter().map(|report| report.position).collect();
	assert_eq!(
		points,
		vec![
			Point {
				line: 1,
				column: 3,
				offset: 2,
			},
			Point {
				line: 2,
				column: 1,
				offset: 32,
			},
			Point {
				line: 2,
				column: 50,
				offset: 82,
			},
		]
	);

	Ok(())
}

#[test]
fn diagnose_skips_pills_inside_masked_elements() -> VexprResult<()> {
	let mut engine = engine()?;
	let reports = engine.diagnose("<code><span data-vexpr=\"{{ 'x' | nope }}\">x</span></code>");

	assert!(reports.is_empty());

	Ok(())
}

#[test]
fn find_spans_prefers_raw_then_comment_then_plain() {
	let text = "{{{ a }}} {{-- b --}} {{ c }} {{ d";
	let spans = find_spans(text);

	let kinds: Vec<_> = spans.iter().map(|span| span.kind).collect();
	assert_eq!(kinds, vec![SpanKind::Raw, SpanKind::Comment, SpanKind::Escaped]);

	let inners: Vec<_> = spans.iter().map(|span| &text[span.inner.clone()]).collect();
	assert_eq!(inners, vec![" a ", " b ", " c "]);
}

#[test]
fn anonymous_visitors_resolve_to_a_placeholder_principal() -> VexprResult<()> {
	let mut store = sample_store();
	store.set_current_principal(None);
	let mut engine = engine_with(store, VexprConfig::default())?;

	assert_eq!(engine.scan("{{ user.is_logged_in ? 'in' : 'out' }}"), "out");
	assert_eq!(engine.scan("{{ user.name | default 'Guest' }}"), "Guest");
	assert_eq!(engine.scan("[{{ user.meta.favorite_color }}]"), "[]");

	Ok(())
}

#[test]
#[traced_test]
fn denied_meta_keys_are_logged() -> VexprResult<()> {
	let mut engine = engine()?;

	assert_eq!(engine.scan("{{ user.meta.api_key }}"), "");
	assert!(logs_contain("denied metadata key"));

	Ok(())
}

#[rstest]
#[case::plain("favorite_color", true)]
#[case::hard_denied("session_tokens", false)]
#[case::prefixed_capabilities("wp_capabilities", false)]
#[case::prefixed_level("wp_user_level", false)]
#[case::protected_prefix("_secret_thing", false)]
#[case::keyword_case_insensitive("User_PASSWORD", false)]
#[case::configured_denial("internal_notes", false)]
#[case::empty("", false)]
fn meta_policy(#[case] key: &str, #[case] expected: bool) {
	let policy = MetaPolicy {
		table_prefix: "wp_".into(),
		denied_keys: vec!["internal_notes".into()],
		..MetaPolicy::default()
	};

	assert_eq!(policy.allows(key), expected);
}

#[test]
fn meta_keys_are_sanitized() {
	assert_eq!(sanitize_key("  <b>favorite</b>\n\t color "), "favorite color");
	assert_eq!(sanitize_key("a\u{0}b"), "ab");
}

#[test]
fn hooks_customize_resolution_and_output() -> VexprResult<()> {
	#[derive(Debug)]
	struct SiteHooks;

	impl Hooks for SiteHooks {
		fn site(&self, mut site: BTreeMap<String, Value>) -> BTreeMap<String, Value> {
			site.insert("year".into(), Value::from(2024_i64));
			site
		}

		fn principal_aliases(&self, mut aliases: AliasTable) -> AliasTable {
			aliases.insert("handle".into(), AliasTarget::field("user_login"));
			aliases
		}

		fn render_token(&self, value: Value, expression: &str, _is_raw: bool) -> Value {
			if expression.trim() == "user.name" {
				return Value::Safe(SafeString::new(format!("<strong>{value}</strong>")));
			}

			value
		}

		fn sanitize(&self, html: &str) -> String {
			html.to_uppercase()
		}

		fn calculate_logic(
			&self,
			mut instructions: RenderInstructions,
			_logic: &BlockLogic,
		) -> RenderInstructions {
			instructions.classes.push("hooked".into());
			instructions
		}
	}

	let mut engine = Engine::builder(Arc::new(sample_store()))
		.hooks(SiteHooks)
		.cache(Arc::new(AstCache::new(16)))
		.build()?;

	assert_eq!(engine.scan("{{ site.year }} @{{ user.handle }}"), "2024 @ada");
	assert_eq!(engine.scan("{{ user.name }}"), "<strong>Ada</strong>");
	assert_eq!(engine.scan("{{{ '<i>x</i>' }}}"), "<I>X</I>");

	let logic = BlockLogic {
		class: "base".into(),
		..BlockLogic::default()
	};
	assert_eq!(
		engine.evaluate_block_logic(&logic)?.classes,
		vec!["base".to_string(), "hooked".to_string()]
	);

	Ok(())
}

#[rstest]
#[case::show_when_true(
	BlockLogic {
		visible: "user.is_logged_in".into(),
		visible_action: VisibleAction::Show,
		class: "member-{{ user.login }}".into(),
	},
	RenderInstructions { render: true, classes: vec!["member-ada".into()] }
)]
#[case::hide_when_true(
	BlockLogic {
		visible: "{{ user.is_logged_in }}".into(),
		visible_action: VisibleAction::Hide,
		class: "member".into(),
	},
	RenderInstructions { render: false, classes: vec![] }
)]
#[case::show_when_false(
	BlockLogic {
		visible: "post.status == 'draft'".into(),
		visible_action: VisibleAction::Show,
		class: String::new(),
	},
	RenderInstructions { render: false, classes: vec![] }
)]
#[case::class_only(
	BlockLogic {
		visible: String::new(),
		visible_action: VisibleAction::Show,
		class: " {{ post.status }} ".into(),
	},
	RenderInstructions { render: true, classes: vec!["publish".into()] }
)]
fn block_logic(
	#[case] logic: BlockLogic,
	#[case] expected: RenderInstructions,
) -> VexprResult<()> {
	assert_eq!(engine()?.evaluate_block_logic(&logic)?, expected);

	Ok(())
}

#[test]
fn render_block_applies_visibility() -> VexprResult<()> {
	let mut engine = engine()?;
	let hidden = BlockLogic {
		visible: "user.is_logged_in".into(),
		visible_action: VisibleAction::Hide,
		..BlockLogic::default()
	};

	assert_eq!(engine.render_block("Hi {{ user.name }}", Some(&hidden))?, "");
	assert_eq!(engine.render_block("Hi {{ user.name }}", None)?, "Hi Ada");
	assert_eq!(
		engine.render_block("Hi {{ user.name }}", Some(&BlockLogic::default()))?,
		"Hi Ada"
	);

	Ok(())
}

#[rstest]
#[case::default_format("2024-03-05 10:30:00", DEFAULT_DATE_FORMAT, "March 5, 2024")]
#[case::iso("2024-03-05 10:30:00", "Y-m-d H:i", "2024-03-05 10:30")]
#[case::escaped_letters("2024-03-05", r"jS \o\f F", "5th of March")]
#[case::short_names("2024-03-05", "D, d M y", "Tue, 05 Mar 24")]
#[case::leap_and_month_length("2024-02-10", "L t", "1 29")]
#[case::twelve_hour("2024-03-05 15:04:05", "g:i A", "3:04 PM")]
#[case::rfc3339("2024-03-05T10:30:00+00:00", "U", "1709634600")]
#[case::timestamp("0", "Y-m-d", "1970-01-01")]
#[case::ordinal_teens("2024-03-12", "jS", "12th")]
#[case::unparseable("not a date", "Y", "")]
fn format_dates(#[case] input: &str, #[case] format: &str, #[case] expected: &str) {
	assert_eq!(format_date(&Value::from(input), format, Utc.fix()), expected);
}

#[test]
fn dates_use_the_site_offset() -> VexprResult<()> {
	let offset = FixedOffset::east_opt(2 * 3600).unwrap_or_else(|| Utc.fix());
	assert_eq!(format_date(&Value::from(0_i64), "Y-m-d H:i P", offset), "1970-01-01 02:00 +02:00");

	let config = config("[site]\nutc_offset_minutes = 120\ndate_format = \"Y/m/d\"\n")?;
	let mut engine = engine_with(sample_store(), config)?;
	assert_eq!(engine.scan("{{ post.date | date }}"), "2024/03/05");
	assert_eq!(engine.scan("{{ 0 | date 'H:i' }}"), "02:00");

	Ok(())
}

#[rstest]
#[case::event_handlers(r#"<p onclick="x()">Hi<script>alert(1)</script></p>"#, "<p>Hi</p>")]
#[case::javascript_urls(r#"<a href="javascript:alert(1)" title="t">x</a>"#, r#"<a title="t">x</a>"#)]
#[case::encoded_urls(r#"<a href="https://e.com/?a=1&amp;b=2">x</a>"#, r#"<a href="https://e.com/?a=1&amp;b=2">x</a>"#)]
#[case::unquoted_attributes("<img src=x onerror=alert(1)>", r#"<img src="x">"#)]
#[case::comments_and_unknown_tags("<!-- c --><b>bold</b><custom>text</custom>", "<b>bold</b>text")]
#[case::data_attributes(r#"<span data-id="7" style="color:red">x</span>"#, r#"<span data-id="7">x</span>"#)]
#[case::self_closing("line<br/>", "line<br/>")]
#[case::plain_text("no markup & more", "no markup & more")]
#[case::unterminated_tag(r#"<img src=x onerror="alert(1)""#, r#"&lt;img src=x onerror="alert(1)""#)]
#[case::unterminated_quote("<b title='>x", "&lt;b title='>x")]
#[case::stray_angle_before_unknown_tag(
	"<<custom>img src=x onerror=alert(1)>",
	"&lt;img src=x onerror=alert(1)>"
)]
#[case::text_angle("1 < 2 and 3 > 2", "1 &lt; 2 and 3 > 2")]
#[case::short_comment("<!-->hi", "hi")]
#[case::bang_closed_comment("a<!-- x --!><b>b</b>", "a<b>b</b>")]
#[case::unterminated_comment("a<!-- x", "a&lt;!-- x")]
#[case::declaration("<!DOCTYPE html><p>x</p>", "&lt;!DOCTYPE html><p>x</p>")]
#[case::title_content("<title><img src=x onerror=alert(1)></title>ok", "ok")]
#[case::entity_encoded_scheme(r#"<a href="javascript&colon;alert(1)">x</a>"#, "<a>x</a>")]
fn sanitize_markup(#[case] html: &str, #[case] expected: &str) {
	assert_eq!(sanitize_html(html), expected);
}

#[test]
fn escaping_helpers() {
	assert_eq!(
		escape_html(r#"<a href="x">'&'</a>"#),
		"&lt;a href=&quot;x&quot;&gt;&#039;&amp;&#039;&lt;/a&gt;"
	);
	assert_eq!(esc_html("Tom &amp; Jerry & co"), "Tom &amp; Jerry &amp; co");
	assert_eq!(esc_attr("a\"b"), "a&quot;b");
	assert_eq!(decode_entities("&lt;b&gt; &#65;&#x42; &unknown;"), "<b> AB &unknown;");
}

#[test]
fn config_from_toml() -> VexprResult<()> {
	let config = config(
		r#"
[limits]
max_depth = 50
cache_capacity = 16

[site]
date_format = "Y"

[security]
denied_meta_keys = ["internal_notes"]
table_prefix = "wp_"

[aliases.user]
nickname = "nickname_field"

[roots]
author = "post.author | get_user"

[scanner]
masked_tags = ["code"]
pill_attribute = "data-expr"
"#,
	)?;

	assert_eq!(config.limits.max_depth, 50);
	assert_eq!(config.limits.max_render_depth, DEFAULT_MAX_RENDER_DEPTH);
	assert_eq!(config.limits.cache_capacity, 16);
	assert_eq!(config.site.date_format, "Y");
	assert_eq!(config.security.meta_policy().table_prefix, "wp_");
	assert_eq!(
		config.aliases.principal_table().get("nickname"),
		Some(&AliasTarget::field("nickname_field"))
	);
	assert_eq!(
		config.aliases.principal_table().get("name"),
		Some(&AliasTarget::field("display_name"))
	);
	assert_eq!(config.roots.get("author").map(String::as_str), Some("post.author | get_user"));
	assert_eq!(config.scanner.masked_tags, vec!["code".to_string()]);
	assert!(config.data.is_none());

	Ok(())
}

#[test]
fn custom_pill_attribute_and_masks() -> VexprResult<()> {
	let config = config("[scanner]\nmasked_tags = [\"kbd\"]\npill_attribute = \"data-expr\"\n")?;
	let mut engine = engine_with(sample_store(), config)?;

	assert_eq!(
		engine.scan("<code>{{ user.name }}</code><kbd>{{ user.name }}</kbd>"),
		"<code>Ada</code><kbd>{{ user.name }}</kbd>"
	);
	assert_eq!(
		engine.scan("<span data-expr=\"{{ site.name }}\">old</span>"),
		"Example"
	);

	Ok(())
}

#[rstest]
#[case::empty("")]
#[case::blank("  ")]
fn empty_pill_attribute_is_rejected(#[case] attribute: &str) -> VexprResult<()> {
	let config = config(&format!("[scanner]\npill_attribute = \"{attribute}\"\n"))?;
	let result = engine_with(sample_store(), config);

	assert!(matches!(
		result,
		Err(VexprError::InvalidPattern { ref pattern, .. }) if pattern == attribute
	));

	Ok(())
}

#[test]
fn invalid_config_is_an_error() {
	let result = VexprConfig::from_toml("[limits]\nmax_depth = \"deep\"\n");
	assert!(matches!(result, Err(VexprError::ConfigParse(_))));
}

#[test]
fn config_discovery_precedence() -> VexprResult<()> {
	let dir = tempfile::tempdir()?;
	assert_eq!(VexprConfig::load(dir.path())?, None);

	std::fs::create_dir_all(dir.path().join(".config"))?;
	std::fs::write(dir.path().join(".config/vexpr.toml"), "[limits]\nmax_depth = 3\n")?;
	let loaded = VexprConfig::load(dir.path())?;
	assert_eq!(loaded.map(|config| config.limits.max_depth), Some(3));

	std::fs::write(dir.path().join("vexpr.toml"), "[limits]\nmax_depth = 7\n")?;
	std::fs::write(dir.path().join(".vexpr.toml"), "[limits]\nmax_depth = 5\n")?;
	assert_eq!(
		VexprConfig::resolve_path(dir.path()),
		Some(dir.path().join("vexpr.toml"))
	);
	let loaded = VexprConfig::load(dir.path())?;
	assert_eq!(loaded.map(|config| config.limits.max_depth), Some(7));

	Ok(())
}

#[rstest]
#[case::yaml(
	"site.yaml",
	r"
site:
  name: Yaml Site
current_user: 1
users:
  - id: 1
    display_name: Grace
    meta:
      favorite_color: green
"
)]
#[case::json(
	"site.json",
	r#"{
  "site": { "name": "Yaml Site" },
  "current_user": 1,
  "users": [{ "id": 1, "display_name": "Grace", "meta": { "favorite_color": "green" } }]
}"#
)]
#[case::toml(
	"site.toml",
	r#"
current_user = 1

[site]
name = "Yaml Site"

[[users]]
id = 1
display_name = "Grace"

[users.meta]
favorite_color = "green"
"#
)]
fn load_data_files(#[case] file_name: &str, #[case] content: &str) -> VexprResult<()> {
	let dir = tempfile::tempdir()?;
	let path = dir.path().join(file_name);
	std::fs::write(&path, content)?;

	let store = MemoryStore::load(&path, None)?;
	let mut engine = engine_with(store, VexprConfig::default())?;

	assert_eq!(
		engine.scan("{{ site.name }}: {{ user.name }} likes {{ user.meta.favorite_color }}"),
		"Yaml Site: Grace likes green"
	);

	Ok(())
}

#[test]
fn data_file_errors() -> VexprResult<()> {
	let dir = tempfile::tempdir()?;
	let path = dir.path().join("site.ini");
	std::fs::write(&path, "name = x")?;

	assert!(matches!(
		MemoryStore::load(&path, None),
		Err(VexprError::UnsupportedDataFormat(format)) if format == "ini"
	));
	assert!(matches!(
		MemoryStore::load(&dir.path().join("missing.json"), None),
		Err(VexprError::DataFile { .. })
	));

	let json = dir.path().join("broken.json");
	std::fs::write(&json, "{ not json")?;
	assert!(matches!(
		MemoryStore::load(&json, None),
		Err(VexprError::DataFile { .. })
	));

	// An explicit format wins over the extension.
	let data = dir.path().join("site.data");
	std::fs::write(&data, "{\"site\": {\"name\": \"Forced\"}}")?;
	let mut engine = engine_with(MemoryStore::load(&data, Some("JSON"))?, VexprConfig::default())?;
	assert_eq!(engine.scan("{{ site.name }}"), "Forced");

	Ok(())
}

#[test]
fn permalinks_fall_back_to_the_site_url() -> VexprResult<()> {
	let store = sample_store()
		.with_document(Entity::new(EntityKind::Document, 12).with_field("post_title", "No slug"))
		.with_permalink(11, "https://example.com/custom/");
	let mut engine = engine_with(store, VexprConfig::default())?;

	assert_eq!(engine.scan("{{ 11 | get_post | prop 'url' }}"), "https://example.com/custom/");
	assert_eq!(engine.scan("{{ 12 | get_post | prop 'url' }}"), "https://example.com/?p=12");

	Ok(())
}

#[test]
fn values_serialize_without_leaking_entities() -> AnyEmptyResult {
	let value = Value::List(vec![
		Value::from(Entity::new(EntityKind::Document, 10).with_field("post_title", "x")),
		Value::from(2.5),
		Value::from(3_i64),
		Value::Meta(MetaProxy::new(EntityKind::Principal, 1)),
	]);

	let json = serde_json::to_value(&value)?;
	assert_eq!(
		json,
		serde_json::json!([{ "kind": "document", "id": 10 }, 2.5, 3, null])
	);

	Ok(())
}
