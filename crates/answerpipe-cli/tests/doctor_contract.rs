const KEYS: &[&str] = &[
    "SEARCH_API",
    "TAVILY_API_KEY",
    "EXA_API_KEY",
    "SEARXNG_API_URL",
    "SEARCHXNG_API_URL",
    "OLLAMA_MODEL",
    "OLLAMA_BASE_URL",
    "ANTHROPIC_API_KEY",
    "ANTHROPIC_API_BASE",
    "ANTHROPIC_API_MODEL",
    "OPENAI_API_KEY",
];

#[test]
fn answerpipe_doctor_reports_booleans_only() {
    let bin = assert_cmd::cargo::cargo_bin!("answerpipe");
    let dir = tempfile::tempdir().expect("tempdir");

    let mut cmd = std::process::Command::new(bin);
    cmd.arg("doctor").current_dir(dir.path());
    for k in KEYS {
        cmd.env_remove(k);
    }
    cmd.env("TAVILY_API_KEY", "tvly-secret-value");
    let out = cmd.output().expect("run answerpipe doctor");

    assert!(out.status.success(), "answerpipe doctor failed");
    let s = String::from_utf8_lossy(&out.stdout);
    assert!(!s.contains("tvly-secret-value"), "doctor leaked a secret");
    let v: serde_json::Value = serde_json::from_str(&s).expect("parse doctor json");

    assert_eq!(v["schema_version"].as_u64(), Some(1));
    assert_eq!(v["name"].as_str(), Some("answerpipe"));
    assert_eq!(v["search_api"].as_str(), Some("tavily"));
    assert_eq!(v["profile"].as_str(), Some("standard"));
    assert_eq!(v["configured"]["search"]["tavily"].as_bool(), Some(true));
    assert_eq!(v["configured"]["search"]["exa"].as_bool(), Some(false));
    assert!(v["configured"]["llm"]["anthropic"].is_boolean());
}

#[test]
fn answerpipe_doctor_picks_tool_limited_profile_for_ollama() {
    let bin = assert_cmd::cargo::cargo_bin!("answerpipe");
    let dir = tempfile::tempdir().expect("tempdir");

    let mut cmd = std::process::Command::new(bin);
    cmd.arg("doctor").current_dir(dir.path());
    for k in KEYS {
        cmd.env_remove(k);
    }
    let out = cmd
        .env("OLLAMA_MODEL", "llama3.1")
        .env("OLLAMA_BASE_URL", "http://127.0.0.1:9")
        .env("ANTHROPIC_API_KEY", "k")
        .output()
        .expect("run answerpipe doctor");

    assert!(out.status.success());
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).expect("parse doctor json");
    assert_eq!(v["profile"].as_str(), Some("tool_limited"));
    assert_eq!(v["model_backend"].as_str(), Some("ollama"));
}

#[test]
fn answerpipe_doctor_routes_anthropic_key_to_its_backend() {
    let bin = assert_cmd::cargo::cargo_bin!("answerpipe");
    let dir = tempfile::tempdir().expect("tempdir");

    let mut cmd = std::process::Command::new(bin);
    cmd.arg("doctor").current_dir(dir.path());
    for k in KEYS {
        cmd.env_remove(k);
    }
    let out = cmd
        .env("ANTHROPIC_API_KEY", "sk-ant-secret-value")
        .output()
        .expect("run answerpipe doctor");

    assert!(out.status.success());
    let s = String::from_utf8_lossy(&out.stdout);
    assert!(!s.contains("sk-ant-secret-value"), "doctor leaked a secret");
    let v: serde_json::Value = serde_json::from_str(&s).expect("parse doctor json");
    assert_eq!(v["profile"].as_str(), Some("post_tool_ui"));
    assert_eq!(v["model_backend"].as_str(), Some("anthropic"));
    assert_eq!(v["configured"]["llm"]["anthropic"].as_bool(), Some(true));
}
