use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

#[test]
fn test_init_and_run_all() {
    let dir = tempfile::tempdir().unwrap();

    cargo_bin_cmd!("dmt")
        .args(["init", dir.path().to_str().unwrap()])
        .assert()
        .success();

    assert!(dir.path().join("dmt.yaml").exists());
    assert!(dir.path().join("migrations/sample.yaml").exists());
    assert!(dir.path().join("data/input.jsonl").exists());

    // Sample paths are relative to the project root
    cargo_bin_cmd!("dmt")
        .current_dir(dir.path())
        .args(["validate", "--all"])
        .assert()
        .success()
        .stdout(predicate::str::contains("sample.yaml"));

    cargo_bin_cmd!("dmt")
        .current_dir(dir.path())
        .args(["run", "--all"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "sample.yaml [1] completed: 3 read, 3 written",
        ));

    let output = std::fs::read_to_string(dir.path().join("data/output.csv")).unwrap();
    assert_eq!(
        output,
        "id,name,born\n1,Ada Lovelace,1815\n2,Alan Turing,1912\n3,Grace Hopper,1906\n"
    );
}

#[test]
fn test_init_refuses_existing_project() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("dmt.yaml"), "").unwrap();

    cargo_bin_cmd!("dmt")
        .args(["init", dir.path().to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already contains"));
}

#[test]
fn test_run_with_flags() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.json");
    let output = dir.path().join("out.jsonl");
    std::fs::write(&input, r#"[{"id": 1, "note": null}, {"id": 2}]"#).unwrap();

    cargo_bin_cmd!("dmt")
        .current_dir(dir.path())
        .args([
            "run",
            "--source",
            "JSON-File",
            "--sink",
            "JSONL-File",
            "--source-setting",
            "FilePath=in.json",
            "--sink-setting",
            "FilePath=out.jsonl",
        ])
        .assert()
        .success();

    assert_eq!(
        std::fs::read_to_string(output).unwrap(),
        "{\"id\":1}\n{\"id\":2}\n"
    );
}

#[test]
fn test_validate_reports_missing_settings() {
    let dir = tempfile::tempdir().unwrap();

    cargo_bin_cmd!("dmt")
        .current_dir(dir.path())
        .args(["validate", "--source", "CSV-File", "--sink", "SQLite"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("SourceSettings:FilePath"))
        .stderr(predicate::str::contains("SinkSettings:Table"));
}

#[test]
fn test_run_failure_exits_nonzero() {
    let dir = tempfile::tempdir().unwrap();

    cargo_bin_cmd!("dmt")
        .current_dir(dir.path())
        .args([
            "run",
            "--source",
            "JSON-File",
            "--sink",
            "JSON-File",
            "--source-setting",
            "FilePath=missing.json",
            "--sink-setting",
            "FilePath=out.json",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("source 'JSON-File' failed"));

    assert!(!dir.path().join("out.json").exists());
}

#[test]
fn test_extensions_list_and_settings() {
    let dir = tempfile::tempdir().unwrap();

    cargo_bin_cmd!("dmt")
        .current_dir(dir.path())
        .args(["extensions", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("JSONL-File"))
        .stdout(predicate::str::contains("formatter:CSV+target:Blob"));

    cargo_bin_cmd!("dmt")
        .current_dir(dir.path())
        .args(["extensions", "settings", "sqlite", "--direction", "sink"])
        .assert()
        .success()
        .stdout(predicate::str::contains("WriteMode"))
        .stdout(predicate::str::contains("one of Insert|Upsert"));

    cargo_bin_cmd!("dmt")
        .current_dir(dir.path())
        .args(["extensions", "settings", "SQLite", "--direction", "source"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown source extension"));
}

#[test]
fn test_manifest_to_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sinks.json");

    cargo_bin_cmd!("dmt")
        .current_dir(dir.path())
        .args(["manifest", "--direction", "sink", "--output"])
        .arg(&path)
        .assert()
        .success();

    let manifest: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    let names: Vec<&str> = manifest["extensions"]
        .as_array()
        .unwrap()
        .iter()
        .map(|item| item["name"].as_str().unwrap())
        .collect();
    assert!(names.contains(&"SQLite"));
    assert!(names.contains(&"CSV-Blob"));
    assert!(manifest["appVersion"].is_string());
}

#[test]
fn test_command_prints_and_saves_document() {
    let dir = tempfile::tempdir().unwrap();
    let saved = dir.path().join("migration.json");

    cargo_bin_cmd!("dmt")
        .current_dir(dir.path())
        .args([
            "command",
            "--source",
            "CSV-File",
            "--sink",
            "SQLite",
            "--source-setting",
            "FilePath=my data.csv",
            "--sink-setting",
            "Table=people",
            "--save",
        ])
        .arg(&saved)
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "dmt run --source CSV-File --sink SQLite --source-setting 'FilePath=my data.csv'",
        ));

    let document: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&saved).unwrap()).unwrap();
    assert_eq!(document["sinkSettings"]["Table"], "people");
}

#[test]
fn test_explicit_missing_config_fails() {
    let dir = tempfile::tempdir().unwrap();

    cargo_bin_cmd!("dmt")
        .current_dir(dir.path())
        .args(["--config", "nope.yaml", "extensions", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("configuration file not found"));
}

#[test]
fn test_disabled_extension_from_config() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("dmt.yaml"),
        "extensions:\n  disabled:\n    - SQLite\n",
    )
    .unwrap();

    cargo_bin_cmd!("dmt")
        .current_dir(dir.path())
        .args(["extensions", "list", "--direction", "sink"])
        .assert()
        .success()
        .stdout(predicate::str::contains("JSON-File"))
        .stdout(predicate::str::contains("SQLite").not());
}

#[test]
fn test_account_key_never_echoed() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("in.json"), r#"[{"id": 1}]"#).unwrap();
    let connection = format!(
        "ConnectionString=BlobEndpoint={};AccountKey=hunter2-secret",
        dir.path().join("container").display()
    );
    let args = [
        "--source",
        "JSON-File",
        "--sink",
        "JSONL-Blob",
        "--source-setting",
        "FilePath=in.json",
        "--sink-setting",
        connection.as_str(),
        "--sink-setting",
        "BlobName=out.jsonl",
    ];

    let run = cargo_bin_cmd!("dmt")
        .current_dir(dir.path())
        .arg("--verbose")
        .arg("run")
        .args(args)
        .assert()
        .success()
        .get_output()
        .clone();
    assert!(!String::from_utf8_lossy(&run.stdout).contains("hunter2"));
    assert!(!String::from_utf8_lossy(&run.stderr).contains("hunter2"));
    assert_eq!(
        std::fs::read_to_string(dir.path().join("container/out.jsonl")).unwrap(),
        "{\"id\":1}\n"
    );

    cargo_bin_cmd!("dmt")
        .current_dir(dir.path())
        .arg("command")
        .args(args)
        .assert()
        .success()
        .stdout(predicate::str::contains("'ConnectionString=***'"))
        .stdout(predicate::str::contains("hunter2").not());

    let output = cargo_bin_cmd!("dmt")
        .current_dir(dir.path())
        .args(["manifest", "--direction", "sink"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let manifest: serde_json::Value = serde_json::from_slice(&output).unwrap();
    let blob = manifest["extensions"]
        .as_array()
        .unwrap()
        .iter()
        .find(|item| item["name"] == "JSONL-Blob")
        .unwrap();
    let setting = blob["settings"]
        .as_array()
        .unwrap()
        .iter()
        .find(|setting| setting["name"] == "ConnectionString")
        .unwrap();
    assert_eq!(setting["isSensitive"], true);
    assert!(setting["defaultValue"].is_null());

    // a different key is refused
    let wrong = connection.replace("hunter2-secret", "other-key");
    cargo_bin_cmd!("dmt")
        .current_dir(dir.path())
        .arg("run")
        .args([
            "--source",
            "JSON-File",
            "--sink",
            "JSONL-Blob",
            "--source-setting",
            "FilePath=in.json",
            "--sink-setting",
            wrong.as_str(),
            "--sink-setting",
            "BlobName=out.jsonl",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("rejected the account key"))
        .stderr(predicate::str::contains("other-key").not());
}
