mod common;

use rstest::rstest;
use vexpr_core::AnyEmptyResult;

#[rstest]
#[case::root("vexpr.toml")]
#[case::hidden(".vexpr.toml")]
#[case::config_dir(".config/vexpr.toml")]
fn config_candidates_are_discovered(#[case] candidate: &str) -> AnyEmptyResult {
	let tmp = tempfile::tempdir()?;
	let config_path = tmp.path().join(candidate);
	if let Some(parent) = config_path.parent() {
		std::fs::create_dir_all(parent)?;
	}
	std::fs::write(tmp.path().join("site.yaml"), common::SITE_YAML)?;
	std::fs::write(
		&config_path,
		"[data]\npath = \"site.yaml\"\n\n[aliases.post]\nheadline = \"post_title\"\n",
	)?;

	common::vexpr_cmd()
		.arg("eval")
		.arg("post.headline")
		.arg("--path")
		.arg(tmp.path())
		.assert()
		.success()
		.stdout("Hello <World>\n");

	Ok(())
}

#[test]
fn root_config_wins_over_hidden_config() -> AnyEmptyResult {
	let tmp = tempfile::tempdir()?;
	common::write_project(tmp.path(), "[limits]\nmax_depth = 0\n")?;
	std::fs::write(
		tmp.path().join(".vexpr.toml"),
		"[data]\npath = \"site.yaml\"\n",
	)?;

	// `max_depth = 0` from the root config stops member access.
	common::vexpr_cmd()
		.arg("eval")
		.arg("post.title")
		.arg("--path")
		.arg(tmp.path())
		.assert()
		.success()
		.stdout("\n");

	Ok(())
}

#[test]
fn data_format_override() -> AnyEmptyResult {
	let tmp = tempfile::tempdir()?;
	std::fs::write(
		tmp.path().join("site.data"),
		"{ \"site\": { \"name\": \"From JSON\" } }",
	)?;
	std::fs::write(
		tmp.path().join("vexpr.toml"),
		"[data]\npath = \"site.data\"\nformat = \"json\"\n",
	)?;

	common::vexpr_cmd()
		.arg("eval")
		.arg("site.name")
		.arg("--path")
		.arg(tmp.path())
		.assert()
		.success()
		.stdout("From JSON\n");

	Ok(())
}

#[test]
fn invalid_config_reports_diagnostic() -> AnyEmptyResult {
	let tmp = tempfile::tempdir()?;
	std::fs::write(tmp.path().join("vexpr.toml"), "[limits\nmax_depth = ")?;

	common::vexpr_cmd()
		.arg("eval")
		.arg("1")
		.arg("--path")
		.arg(tmp.path())
		.assert()
		.code(2)
		.stderr(predicates::str::contains("vexpr::config_parse"));

	Ok(())
}

#[test]
fn missing_data_file_reports_diagnostic() -> AnyEmptyResult {
	let tmp = tempfile::tempdir()?;
	std::fs::write(
		tmp.path().join("vexpr.toml"),
		"[data]\npath = \"nowhere.yaml\"\n",
	)?;

	common::vexpr_cmd()
		.arg("eval")
		.arg("1")
		.arg("--path")
		.arg(tmp.path())
		.assert()
		.code(2)
		.stderr(predicates::str::contains("vexpr::data_file"));

	Ok(())
}

#[test]
fn unsupported_data_format_reports_diagnostic() -> AnyEmptyResult {
	let tmp = tempfile::tempdir()?;
	let data = tmp.path().join("site.ini");
	std::fs::write(&data, "name = x\n")?;

	common::vexpr_cmd()
		.arg("eval")
		.arg("1")
		.arg("--path")
		.arg(tmp.path())
		.arg("--data")
		.arg(&data)
		.assert()
		.code(2)
		.stderr(predicates::str::contains("vexpr::unsupported_format"));

	Ok(())
}
