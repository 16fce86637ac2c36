//! CLI integration tests driving the real binary, grounded in the teacher's
//! `versatiles/tests/command.rs` (`assert_cmd` + `predicates` + `rstest`).

use assert_cmd::Command;
use assert_fs::TempDir;
use assert_fs::prelude::*;
use predicates::prelude::*;
use rstest::rstest;

fn bin() -> Command {
	Command::cargo_bin("tilekeeper").unwrap()
}

fn write_config(dir: &TempDir) -> std::path::PathBuf {
	let config = dir.child("tilekeeper.json");
	config
		.write_str(
			r#"{
				"regions": { "testregion": { "bbox": [28.9, 41.0, 29.0, 41.05], "min_zoom": 10, "max_zoom": 10 } },
				"servers": [],
				"output_dir": "tiles",
				"max_workers_per_server": 2,
				"retry_attempts": 1,
				"timeout": 5
			}"#,
		)
		.unwrap();
	config.path().to_path_buf()
}

#[test]
fn missing_config_file_exits_nonzero_with_readable_error() {
	let dir = TempDir::new().unwrap();
	bin()
		.current_dir(&dir)
		.args(["--config", "does-not-exist.json", "--region", "testregion"])
		.assert()
		.failure()
		.stderr(predicate::str::contains("loading configuration"));
}

#[test]
fn interactive_flag_is_rejected_with_explicit_error() {
	let dir = TempDir::new().unwrap();
	let config = write_config(&dir);
	bin().current_dir(&dir).args(["--config", config.to_str().unwrap(), "--interactive"]).assert().failure();
}

#[test]
fn list_sources_on_empty_registry_prints_nothing_and_succeeds() {
	let dir = TempDir::new().unwrap();
	let config = write_config(&dir);
	bin()
		.current_dir(&dir)
		.args(["--config", config.to_str().unwrap(), "--list-sources"])
		.assert()
		.success()
		.stdout(predicate::str::is_empty());
}

#[test]
fn download_without_region_bbox_or_place_fails() {
	let dir = TempDir::new().unwrap();
	let config = write_config(&dir);
	bin().current_dir(&dir).args(["--config", config.to_str().unwrap()]).assert().failure();
}

#[rstest]
#[case(&["--help"])]
#[case(&["serve", "--help"])]
fn help_output_documents_the_invocation(#[case] args: &[&str]) {
	bin().args(args).assert().success().stdout(predicate::str::contains("tilekeeper"));
}

#[test]
fn bbox_requires_exactly_four_values() {
	let dir = TempDir::new().unwrap();
	let config = write_config(&dir);
	bin()
		.current_dir(&dir)
		.args(["--config", config.to_str().unwrap(), "--bbox", "1", "2", "3"])
		.assert()
		.failure()
		.code(2);
}
