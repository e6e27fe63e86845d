use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn ragchat_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_ragchat"))
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(
        files_dir.join("bananas.txt"),
        "Bananas are vegetables. Bananas can attend preschool.",
    )
    .unwrap();
    fs::write(
        files_dir.join("cars.txt"),
        "Cars have four wheels and an engine. Trucks carry heavy loads over long roads.",
    )
    .unwrap();
    fs::write(files_dir.join("empty.txt"), "   \n").unwrap();

    let config_content = format!(
        r#"[storage]
root = "{}/data"

[chunking]
chunk_size = 20
overlap = 5

[embedding]
provider = "hashing"
dims = 384

[retrieval]
top_k = 3
"#,
        root.display()
    );

    let config_path = config_dir.join("ragchat.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_ragchat(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = ragchat_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run ragchat binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn file(config_path: &Path, name: &str) -> String {
    config_path
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .join("files")
        .join(name)
        .to_str()
        .unwrap()
        .to_string()
}

fn ingest(config_path: &Path, owner: &str, name: &str, id: &str) {
    let path = file(config_path, name);
    let (stdout, stderr, success) =
        run_ragchat(config_path, &["ingest", owner, &path, "--id", id]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
}

#[test]
fn test_ingest_reports_chunks() {
    let (_tmp, config_path) = setup_test_env();
    let path = file(&config_path, "bananas.txt");

    let (stdout, stderr, success) =
        run_ragchat(&config_path, &["ingest", "u1", &path, "--id", "bananas"]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("document: bananas"));
    assert!(stdout.contains("chunks written: 1"));
    assert!(stdout.contains("ok"));
}

#[test]
fn test_ingest_empty_file_fails() {
    let (_tmp, config_path) = setup_test_env();
    let path = file(&config_path, "empty.txt");

    let (_, stderr, success) = run_ragchat(&config_path, &["ingest", "u1", &path]);
    assert!(!success);
    assert!(stderr.contains("no text"), "stderr={}", stderr);
}

#[test]
fn test_ingest_duplicate_id_fails() {
    let (_tmp, config_path) = setup_test_env();
    ingest(&config_path, "u1", "bananas.txt", "bananas");

    let path = file(&config_path, "bananas.txt");
    let (_, stderr, success) =
        run_ragchat(&config_path, &["ingest", "u1", &path, "--id", "bananas"]);
    assert!(!success);
    assert!(stderr.contains("already indexed"), "stderr={}", stderr);
}

#[test]
fn test_search_ranks_matching_document_first() {
    let (_tmp, config_path) = setup_test_env();
    ingest(&config_path, "u1", "cars.txt", "cars");
    ingest(&config_path, "u1", "bananas.txt", "bananas");

    let (stdout, stderr, success) =
        run_ragchat(&config_path, &["search", "u1", "What are bananas?", "-k", "1"]);
    assert!(success, "search failed: stdout={}, stderr={}", stdout, stderr);
    let first = stdout.lines().next().unwrap();
    assert!(first.starts_with("1. ["), "stdout={}", stdout);
    assert!(first.ends_with("bananas:0"), "stdout={}", stdout);
    assert!(stdout.contains("Bananas are vegetables"));
    assert!(!stdout.contains("2. ["));
}

#[test]
fn test_search_deterministic() {
    let (_tmp, config_path) = setup_test_env();
    ingest(&config_path, "u1", "cars.txt", "cars");
    ingest(&config_path, "u1", "bananas.txt", "bananas");

    let (first, _, _) = run_ragchat(&config_path, &["search", "u1", "heavy trucks"]);
    let (second, _, _) = run_ragchat(&config_path, &["search", "u1", "heavy trucks"]);
    assert_eq!(first, second);
}

#[test]
fn test_search_unknown_owner_is_empty() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_ragchat(&config_path, &["search", "u2", "hello"]);
    assert!(success, "search failed: stderr={}", stderr);
    assert!(stdout.contains("No results."));
}

#[test]
fn test_search_zero_k_rejected() {
    let (_tmp, config_path) = setup_test_env();
    ingest(&config_path, "u1", "bananas.txt", "bananas");

    let (_, stderr, success) = run_ragchat(&config_path, &["search", "u1", "bananas", "-k", "0"]);
    assert!(!success);
    assert!(stderr.contains("Invalid argument"), "stderr={}", stderr);
}

#[test]
fn test_owners_do_not_see_each_other() {
    let (_tmp, config_path) = setup_test_env();
    ingest(&config_path, "u1", "bananas.txt", "bananas");

    let (stdout, _, success) = run_ragchat(&config_path, &["search", "u2", "bananas"]);
    assert!(success);
    assert!(stdout.contains("No results."));
}

#[test]
fn test_ask_dry_run_prints_prompt() {
    let (_tmp, config_path) = setup_test_env();
    ingest(&config_path, "u1", "bananas.txt", "bananas");

    let (stdout, stderr, success) = run_ragchat(
        &config_path,
        &["ask", "u1", "What are bananas?", "--dry-run"],
    );
    assert!(success, "ask failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Source facts:"));
    assert!(stdout.contains("[1] Bananas are vegetables"));
    assert!(stdout.contains("new_query: What are bananas?"));
    assert!(stdout.contains("sources: bananas:0"));
}

#[test]
fn test_docs_remove_reset() {
    let (_tmp, config_path) = setup_test_env();
    ingest(&config_path, "u1", "bananas.txt", "bananas");
    ingest(&config_path, "u1", "cars.txt", "cars");

    let (stdout, _, success) = run_ragchat(&config_path, &["docs", "u1"]);
    assert!(success);
    assert!(stdout.contains("bananas"));
    assert!(stdout.contains("cars.txt"));

    let (stdout, stderr, success) = run_ragchat(&config_path, &["remove", "u1", "cars"]);
    assert!(success, "remove failed: stderr={}", stderr);
    assert!(stdout.contains("vectors removed: 1"));

    let (_, _, success) = run_ragchat(&config_path, &["remove", "u1", "cars"]);
    assert!(!success, "removing twice should fail");

    let (stdout, _, _) = run_ragchat(&config_path, &["docs", "u1"]);
    assert!(!stdout.contains("cars"));

    let (stdout, _, success) = run_ragchat(&config_path, &["reset", "u1"]);
    assert!(success);
    assert!(stdout.contains("reset u1: ok"));

    let (stdout, _, _) = run_ragchat(&config_path, &["docs", "u1"]);
    assert!(stdout.contains("No documents."));
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_ragchat(&tmp.path().join("nope.toml"), &["docs", "u1"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"), "stderr={}", stderr);
}

#[test]
fn test_invalid_config_rejected() {
    let (_tmp, config_path) = setup_test_env();
    let content = fs::read_to_string(&config_path)
        .unwrap()
        .replace("overlap = 5", "overlap = 20");
    fs::write(&config_path, content).unwrap();

    let (_, stderr, success) = run_ragchat(&config_path, &["docs", "u1"]);
    assert!(!success);
    assert!(stderr.contains("chunking.overlap"), "stderr={}", stderr);
}
