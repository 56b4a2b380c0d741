use predicates::prelude::*;

fn search_cmd(dir: &std::path::Path) -> assert_cmd::Command {
    let mut cmd = assert_cmd::Command::new(assert_cmd::cargo::cargo_bin!("answerpipe"));
    cmd.current_dir(dir)
        .env_remove("SEARCH_API")
        .env_remove("TAVILY_API_KEY")
        .env_remove("EXA_API_KEY")
        .env_remove("SEARXNG_API_URL")
        .env_remove("SEARCHXNG_API_URL");
    cmd
}

#[test]
fn search_without_credentials_returns_empty_results() {
    let dir = tempfile::tempdir().expect("tempdir");
    let out = search_cmd(dir.path())
        .args(["search", "cats"])
        .assert()
        .success()
        .stderr(predicate::str::contains("[search] failed"))
        .get_output()
        .stdout
        .clone();

    let v: serde_json::Value = serde_json::from_slice(&out).expect("parse search json");
    assert_eq!(v["results"], serde_json::json!([]));
    assert_eq!(v["images"], serde_json::json!([]));
    assert_eq!(v["number_of_results"].as_u64(), Some(0));
    assert_eq!(v["query"].as_str(), Some("cats "));
}

#[test]
fn search_rejects_unknown_depth() {
    let dir = tempfile::tempdir().expect("tempdir");
    search_cmd(dir.path())
        .args(["search", "cats", "--depth", "deep"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("search_depth"));
}

#[test]
fn search_provider_flag_selects_searxng() {
    let dir = tempfile::tempdir().expect("tempdir");
    let out = search_cmd(dir.path())
        .args(["search", "rust lang", "--provider", "searxng"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let v: serde_json::Value = serde_json::from_slice(&out).expect("parse search json");
    assert_eq!(v["query"].as_str(), Some("rust lang"));
    assert_eq!(v["number_of_results"].as_u64(), Some(0));
}
