use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn rag_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("rag");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(
        files_dir.join("alpha.txt"),
        "Alpha document about Rust programming, cargo and crates.",
    )
    .unwrap();
    fs::write(files_dir.join("report.docx"), b"PK\x03\x04 not really").unwrap();

    let config_content = format!(
        r#"[storage]
data_dir = "{root}/data"
database_dir = "{root}/database"

[chunking]
chunk_size = 100
chunk_overlap = 10

[retrieval]
top_k = 4

[embedding]
provider = "disabled"

[llm]
api_key_env = "RAG_TEST_UNSET_API_KEY"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("rag.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_rag(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = rag_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("RAG_TEST_UNSET_API_KEY")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run rag binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_status_on_empty_knowledge_base() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_rag(&config_path, &["status"]);
    assert!(success, "status failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Chunks:      0"), "got: {}", stdout);
    assert!(stdout.contains("not_ready"), "got: {}", stdout);
    assert!(stdout.contains("100 words, 10 overlap"), "got: {}", stdout);
    assert!(stdout.contains("RAG_TEST_UNSET_API_KEY not set"), "got: {}", stdout);
}

#[test]
fn test_status_creates_storage_dirs() {
    let (tmp, config_path) = setup_test_env();

    let (_, _, success) = run_rag(&config_path, &["status"]);
    assert!(success);
    assert!(tmp.path().join("data").is_dir());
    assert!(tmp.path().join("database").is_dir());
}

#[test]
fn test_query_on_empty_knowledge_base() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_rag(&config_path, &["query", "What is Rust?"]);
    assert!(success, "query failed: stderr={}", stderr);
    assert!(
        stdout.contains("No documents available. Please upload some documents first."),
        "got: {}",
        stdout
    );
}

#[test]
fn test_ingest_errors_when_embeddings_disabled() {
    let (tmp, config_path) = setup_test_env();
    let file = tmp.path().join("files/alpha.txt");

    let (_, stderr, success) = run_rag(&config_path, &["ingest", file.to_str().unwrap()]);
    assert!(!success, "ingest should fail with the disabled provider");
    assert!(
        stderr.contains("embedding provider is disabled"),
        "Expected disabled-provider error, got: {}",
        stderr
    );

    // nothing was stored
    let (stdout, _, _) = run_rag(&config_path, &["docs"]);
    assert!(stdout.contains("No documents."), "got: {}", stdout);
}

#[test]
fn test_ingest_unsupported_file_type() {
    let (tmp, config_path) = setup_test_env();
    let file = tmp.path().join("files/report.docx");

    let (_, stderr, success) = run_rag(&config_path, &["ingest", file.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("unsupported file type"), "got: {}", stderr);
}

#[test]
fn test_ingest_missing_file() {
    let (tmp, config_path) = setup_test_env();
    let file = tmp.path().join("files/nope.txt");

    let (_, stderr, success) = run_rag(&config_path, &["ingest", file.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("Failed to read"), "got: {}", stderr);
}

#[test]
fn test_ingest_rejects_invalid_chunking() {
    let (tmp, config_path) = setup_test_env();
    let file = tmp.path().join("files/alpha.txt");

    let (_, stderr, success) = run_rag(
        &config_path,
        &[
            "ingest",
            file.to_str().unwrap(),
            "--chunk-size",
            "10",
            "--chunk-overlap",
            "10",
        ],
    );
    assert!(!success);
    assert!(stderr.contains("invalid chunking options"), "got: {}", stderr);
}

#[test]
fn test_docs_and_clear_on_empty() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_rag(&config_path, &["docs"]);
    assert!(success);
    assert!(stdout.contains("No documents."));

    let (stdout, _, success) = run_rag(&config_path, &["clear"]);
    assert!(success);
    assert!(stdout.contains("cleared 0 chunks"), "got: {}", stdout);
}

#[test]
fn test_config_prints_effective_toml() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_rag(&config_path, &["config"]);
    assert!(success, "config failed: {}", stderr);
    assert!(stdout.contains("chunk_size = 100"), "got: {}", stdout);
    assert!(stdout.contains("top_k = 4"), "got: {}", stdout);
    assert!(stdout.contains("provider = \"disabled\""), "got: {}", stdout);
    assert!(stdout.contains("model = \"llama3-8b-8192\""), "got: {}", stdout);

    // the printed configuration parses back
    let parsed: toml::Value = toml::from_str(&stdout).unwrap();
    assert_eq!(parsed["retrieval"]["top_k"].as_integer(), Some(4));
}

#[test]
fn test_invalid_config_is_rejected() {
    let (tmp, _) = setup_test_env();
    let bad = tmp.path().join("config/bad.toml");
    fs::write(&bad, "[chunking]\nchunk_size = 50\nchunk_overlap = 50\n").unwrap();

    let (_, stderr, success) = run_rag(&bad, &["status"]);
    assert!(!success);
    assert!(stderr.contains("invalid [chunking] section"), "got: {}", stderr);
}

#[test]
fn test_explicit_missing_config_is_an_error() {
    let (tmp, _) = setup_test_env();
    let missing = tmp.path().join("config/missing.toml");

    let (_, stderr, success) = run_rag(&missing, &["status"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"), "got: {}", stderr);
}

#[test]
fn test_corrupt_database_starts_empty() {
    let (tmp, config_path) = setup_test_env();
    let db = tmp.path().join("database");
    fs::create_dir_all(&db).unwrap();
    fs::write(db.join("documents.json"), "not json").unwrap();
    fs::write(db.join("embeddings.json"), "[]").unwrap();
    fs::write(db.join("index.bin"), b"garbage").unwrap();

    let (stdout, stderr, success) = run_rag(&config_path, &["status"]);
    assert!(success, "status failed: {}", stderr);
    assert!(stdout.contains("Chunks:      0"), "got: {}", stdout);
    assert!(stderr.contains("discarding persisted knowledge base"), "got: {}", stderr);
}

#[test]
fn test_reindex_on_empty_knowledge_base() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_rag(&config_path, &["reindex"]);
    assert!(success, "reindex failed: {}", stderr);
    assert!(stdout.contains("reindexed 0 chunks"), "got: {}", stdout);
    assert!(stdout.contains("ok"));
}
