use assert_cmd::cargo::cargo_bin_cmd;

fn help_text(args: &[&str]) -> String {
    let mut cmd = cargo_bin_cmd!("lumenctl");
    let output = cmd
        .args(args)
        .arg("--help")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    String::from_utf8_lossy(&output).into_owned()
}

#[test]
fn top_level_help_lists_subcommands() {
    let text = help_text(&[]);
    for sub in ["check-config", "simulate", "dedupe", "snapshot-inspect"] {
        assert!(text.contains(sub), "help missing {sub}");
    }
}

#[test]
fn simulate_documents_trace_and_predict() {
    let text = help_text(&["simulate"]);
    assert!(text.contains("--trace"), "simulate help missing --trace");
    assert!(text.contains("--predict"), "simulate help missing --predict");
}

#[test]
fn check_config_reports_warnings_for_a_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lumen.toml");
    std::fs::write(&path, "[eviction]\nlow_water_ratio = 2.0\n").unwrap();

    let mut cmd = cargo_bin_cmd!("lumenctl");
    let output = cmd
        .arg("check-config")
        .arg("--path")
        .arg(&path)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8_lossy(&output);
    assert!(text.contains("low_water_ratio"), "missing warning: {text}");

    let mut strict = cargo_bin_cmd!("lumenctl");
    strict
        .arg("check-config")
        .arg("--path")
        .arg(&path)
        .arg("--strict")
        .assert()
        .failure();
}
