#![allow(dead_code)]

use std::path::Path;

use assert_cmd::Command;
use insta_cmd::get_cargo_bin;

pub const SITE_YAML: &str = "site:
  name: Example
  url: https://example.com
current_user: 1
current_post: 10
users:
  - id: 1
    display_name: Ada
    user_login: ada
    meta:
      favorite_color: teal
      session_tokens: s3cr3t
posts:
  - id: 10
    post_title: Hello <World>
    post_name: hello
    post_author: 1
    post_content: Body {{ post.content }}
";

pub fn vexpr_cmd() -> Command {
	let mut cmd = Command::new(get_cargo_bin("vexpr"));
	cmd.env("NO_COLOR", "1");
	cmd.env_remove("RUST_LOG");
	cmd
}

/// Write `site.yaml` and a `vexpr.toml` pointing at it.
pub fn write_project(root: &Path, extra_config: &str) -> std::io::Result<()> {
	std::fs::write(root.join("site.yaml"), SITE_YAML)?;
	std::fs::write(
		root.join("vexpr.toml"),
		format!("[data]\npath = \"site.yaml\"\n\n{extra_config}"),
	)
}
