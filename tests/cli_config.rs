use predicates::prelude::*;

fn shopforge(dir: &std::path::Path) -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("shopforge");
    cmd.current_dir(dir)
        .env_remove("SHOPFORGE_GITHUB_TOKEN")
        .env_remove("SHOPFORGE_VERCEL_TOKEN")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn show_prints_defaults_without_a_saved_config() {
    let dir = tempfile::tempdir().unwrap();

    shopforge(dir.path())
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""name": "My Store""#))
        .stdout(predicate::str::contains(r#""currency": "UAH""#))
        .stdout(predicate::str::contains(r#""version": 0"#));
}

#[test]
fn empty_domain_is_rejected_and_previous_config_survives() {
    let dir = tempfile::tempdir().unwrap();

    shopforge(dir.path())
        .args(["config", "set", "--domain", "https://shop.example"])
        .assert()
        .success();

    shopforge(dir.path())
        .args(["config", "set", "--domain", ""])
        .assert()
        .failure()
        .stderr(predicate::str::contains("missing required fields: domain"));

    shopforge(dir.path())
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""domain": "https://shop.example""#));
}

#[test]
fn renaming_the_store_derives_a_dated_database_name() {
    let dir = tempfile::tempdir().unwrap();

    let output = shopforge(dir.path())
        .args(["config", "set", "--name", "Fo Shop"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let saved: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(saved["version"], 1);
    assert_eq!(saved["identity"]["name"], "Fo Shop");
    let database = saved["identity"]["database"].as_str().unwrap();
    assert!(database.starts_with("fo-shop_"), "{database}");

    assert!(
        dir.path()
            .join("shopforge-data")
            .join("store.json")
            .is_file()
    );
}

#[test]
fn explicit_database_name_is_kept() {
    let dir = tempfile::tempdir().unwrap();

    shopforge(dir.path())
        .args(["config", "set", "--name", "Fo Shop", "--database", "fo-prod"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""database": "fo-prod""#));
}

#[test]
fn connections_without_tokens_reports_both_disconnected() {
    let dir = tempfile::tempdir().unwrap();

    shopforge(dir.path())
        .arg("connections")
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""github": false"#))
        .stdout(predicate::str::contains(r#""vercel": false"#));
}
