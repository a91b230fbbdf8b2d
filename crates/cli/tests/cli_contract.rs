use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;

const BUDGET_ENV: [&str; 6] = [
    "DOCVIEW_TOTAL_RAM_GB",
    "DOCVIEW_MOBILE",
    "DOCVIEW_MAX_RESIDENT_PAGES",
    "DOCVIEW_MAX_CANVAS_PIXELS",
    "DOCVIEW_PREFETCH_PAGES",
    "DOCVIEW_AVERAGE_PAGE_BYTES",
];

// Points the user config directory somewhere empty so a local viewer.toml is never picked up.
const NO_USER_CONFIG: &str = "/nonexistent/docview-test-home";

fn docview() -> Command {
    let mut cmd = cargo_bin_cmd!("docview");
    for key in BUDGET_ENV {
        cmd.env_remove(key);
    }
    cmd.env("HOME", NO_USER_CONFIG).env_remove("XDG_CONFIG_HOME");
    cmd
}

fn json_stdout(cmd: &mut Command) -> Value {
    let output = cmd.assert().success().get_output().stdout.clone();
    serde_json::from_slice(&output).expect("stdout should contain valid json")
}

fn pages(value: &Value) -> Vec<u64> {
    value.as_array().expect("page list").iter().filter_map(Value::as_u64).collect()
}

#[test]
fn budget_reports_desktop_tier() {
    let value = json_stdout(docview().args(["budget", "--total-ram-gb", "4"]));

    assert_eq!(value["budget"]["max_resident_pages"], 10);
    assert_eq!(value["budget"]["max_canvas_pixels"], 8_388_608);
    assert_eq!(value["budget"]["prefetch_pages"], 2);
    assert_eq!(value["byte_limit"], 10 * 8 * 1024 * 1024);
    assert_eq!(value["capabilities"]["mobile"], false);
}

#[test]
fn budget_emits_stable_json_contract() {
    let value = json_stdout(docview().args(["budget", "--total-ram-gb", "4"]));

    insta::assert_json_snapshot!("budget_four_gb_desktop", value);
}

#[test]
fn budget_mobile_flag_selects_mobile_tier() {
    let value = json_stdout(docview().args(["budget", "--total-ram-gb", "16", "--mobile"]));

    assert_eq!(value["budget"]["max_canvas_pixels"], 4_194_304);
    assert_eq!(value["budget"]["prefetch_pages"], 1);
    assert_eq!(value["capabilities"]["mobile"], true);
}

#[test]
fn budget_applies_env_overrides() {
    let value = json_stdout(
        docview()
            .args(["budget", "--total-ram-gb", "8"])
            .env("DOCVIEW_MAX_RESIDENT_PAGES", "7")
            .env("DOCVIEW_PREFETCH_PAGES", "0"),
    );

    assert_eq!(value["budget"]["max_resident_pages"], 7);
    assert_eq!(value["budget"]["prefetch_pages"], 0);
}

#[test]
fn budget_rejects_invalid_override() {
    docview()
        .args(["budget"])
        .env("DOCVIEW_MAX_RESIDENT_PAGES", "0")
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid value for DOCVIEW_MAX_RESIDENT_PAGES"));
}

#[test]
fn simulate_page_jump_keeps_the_prefetch_window_resident() {
    let value = json_stdout(docview().args(["simulate", "--pages", "50", "--goto", "10", "--prefetch", "3"]));

    assert_eq!(value["page_count"], 50);
    assert_eq!(value["current_page"], 10);
    assert_eq!(pages(&value["pages"]["resident"]), (7..=13).collect::<Vec<_>>());
    assert_eq!(pages(&value["pages"]["evicted"]), vec![1, 2, 3, 4]);
    assert_eq!(value["pages"]["unseen"], 39);
    assert_eq!(value["windows"]["prefetch"]["first"], 7);
    assert_eq!(value["windows"]["prefetch"]["last"], 13);

    let hit_rate = value["hit_rate"].as_f64().expect("hit rate");
    assert!((0.0..=1.0).contains(&hit_rate));
    let utilization = value["memory_utilization"].as_f64().expect("memory utilization");
    let stats = &value["stats"];
    let expected = stats["resident_bytes"].as_f64().unwrap() / stats["byte_limit"].as_f64().unwrap();
    assert!((utilization - expected).abs() < 1e-9);
}

#[test]
fn simulate_zoom_renders_at_the_matching_tier() {
    let value = json_stdout(docview().args(["simulate", "--pages", "10", "--zoom", "200"]));

    assert_eq!(value["zoom_percent"], 200.0);
    assert_eq!(value["tier"], 2.0);
    assert!(pages(&value["pages"]["resident"]).contains(&1));
}

#[test]
fn simulate_marks_persistently_failing_page() {
    let value = json_stdout(docview().args(["simulate", "--pages", "5", "--fail-page", "2"]));

    assert_eq!(pages(&value["pages"]["failed"]), vec![2]);
    assert_eq!(value["stats"]["failures"], 3);
    assert!(pages(&value["pages"]["resident"]).contains(&1));
}

#[test]
fn simulate_rejects_out_of_range_jump() {
    docview()
        .args(["simulate", "--pages", "5", "--goto", "9"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("page 9 is out of range"));
}

#[test]
fn simulate_reads_config_file() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let path = temp.path().join("viewer.toml");
    std::fs::write(&path, "[budget]\nmax_resident_pages = 4\nprefetch_pages = 1\n").unwrap();

    let value = json_stdout(docview().args(["simulate", "--pages", "20", "--goto", "10", "--config"]).arg(&path));

    assert_eq!(value["stats"]["byte_limit"], 4 * 8 * 1024 * 1024);
    assert_eq!(pages(&value["pages"]["resident"]), vec![9, 10, 11]);
}

#[cfg(target_os = "linux")]
#[test]
fn simulate_reads_user_config_directory() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let dir = temp.path().join("docview");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("viewer.toml"), "[budget]\nmax_resident_pages = 3\n").unwrap();

    let value = json_stdout(docview().args(["simulate", "--pages", "10"]).env("XDG_CONFIG_HOME", temp.path()));

    assert_eq!(value["stats"]["byte_limit"], 3 * 8 * 1024 * 1024);
}

#[test]
fn simulate_reports_malformed_config() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let path = temp.path().join("viewer.toml");
    std::fs::write(&path, "page_gap = \"wide\"").unwrap();

    docview()
        .args(["simulate", "--config"])
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load config"));
}

#[test]
fn version_prints_package_version() {
    docview()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}
