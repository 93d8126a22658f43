#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::time::{SystemTime, UNIX_EPOCH};

use gufi_rollup::core::config::Config;
use gufi_rollup::index::db::{IndexWriter, OpenMode, open_index};
use gufi_rollup::index::schema::{EntryRow, SummaryRow};
use tempfile::TempDir;

pub const UID: u32 = 1000;
pub const GID: u32 = 1000;

/// Scratch index tree whose directories get hand-picked summary permissions.
pub struct IndexTree {
    _tmp: TempDir,
    pub root: PathBuf,
}

impl IndexTree {
    pub fn new() -> Self {
        let tmp = TempDir::new().expect("create temp dir");
        let root = tmp.path().join("a");
        fs::create_dir(&root).expect("create index root");
        Self { _tmp: tmp, root }
    }

    /// Index directory at `rel` ("" is the root) with the given summary mode.
    pub fn dir(&self, rel: &str, mode: u32, files: &[&str]) -> PathBuf {
        self.dir_owned(rel, mode, UID, GID, files)
    }

    pub fn dir_owned(&self, rel: &str, mode: u32, uid: u32, gid: u32, files: &[&str]) -> PathBuf {
        let dir = if rel.is_empty() {
            self.root.clone()
        } else {
            self.root.join(rel)
        };
        fs::create_dir_all(&dir).expect("create index dir");
        let mut writer = IndexWriter::create(&dir, "db.db").expect("create db");
        let rows: Vec<EntryRow> = files.iter().map(|f| EntryRow::file(*f, 7)).collect();
        writer.insert_entries(&rows).expect("insert entries");
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut summary = SummaryRow::directory(name, mode, uid, gid);
        for row in &rows {
            summary.account(row);
        }
        writer.insert_root_summary(&summary).expect("insert summary");
        dir
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        if rel.is_empty() {
            self.root.clone()
        } else {
            self.root.join(rel)
        }
    }

    pub fn db(&self, rel: &str) -> PathBuf {
        self.path(rel).join("db.db")
    }
}

pub fn config(threads: usize) -> Config {
    let mut config = Config::default();
    config.walker.threads = threads;
    config
}

/// Sorted `entries.name` values of one database.
pub fn entry_names(db: &Path) -> Vec<String> {
    query_names(db, "SELECT name FROM entries")
}

/// Sorted non-root `summary.name` values of one database.
pub fn summary_names(db: &Path) -> Vec<String> {
    query_names(db, "SELECT name FROM summary WHERE isroot = 0")
}

pub fn rollup_score(db: &Path) -> i64 {
    let conn = open_index(db, OpenMode::ReadOnly).expect("open db");
    conn.query_row("SELECT rollupscore FROM summary WHERE isroot = 1", [], |r| r.get(0))
        .expect("read score")
}

fn query_names(db: &Path, sql: &str) -> Vec<String> {
    let conn = open_index(db, OpenMode::ReadOnly).expect("open db");
    let mut stmt = conn.prepare(sql).expect("prepare");
    let mut names: Vec<String> = stmt
        .query_map([], |r| r.get(0))
        .expect("query")
        .map(|r| r.expect("row"))
        .collect();
    names.sort();
    names
}

/// Every file under `root` with its bytes, keyed by path.
pub fn snapshot(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    let mut out = BTreeMap::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        out.insert(dir.clone(), Vec::new());
        for entry in fs::read_dir(&dir).expect("read dir") {
            let path = entry.expect("entry").path();
            if path.is_dir() {
                stack.push(path);
            } else {
                out.insert(path.clone(), fs::read(&path).expect("read file"));
            }
        }
    }
    out
}

pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn resolve_bin_path() -> PathBuf {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_gufi") {
        return PathBuf::from(path);
    }

    let exe_name = if cfg!(windows) { "gufi.exe" } else { "gufi" };
    let fallback = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(PathBuf::from))
        .and_then(|deps| deps.parent().map(PathBuf::from))
        .map(|debug_dir| debug_dir.join(exe_name));

    match fallback {
        Some(path) if path.exists() => path,
        _ => panic!("unable to resolve gufi binary path for integration test"),
    }
}

/// Run the CLI with an isolated HOME and keep a transcript per case.
pub fn run_cli_case(case_name: &str, args: &[&str]) -> CmdResult {
    let root = std::env::temp_dir().join("gufi-test-logs");
    fs::create_dir_all(&root).expect("create temp test log dir");
    let home = TempDir::new().expect("create temp home");

    let log_path = root.join(format!("{}-{}.log", sanitize(case_name), now_millis()));
    let bin_path = resolve_bin_path();

    let output = Command::new(&bin_path)
        .args(args)
        .env("HOME", home.path())
        .env_remove("GUFI_WALKER_THREADS")
        .env_remove("GUFI_ROLLUP_DRY_RUN")
        .env_remove("GUFI_PATHS_EVENT_LOG")
        .env("RUST_BACKTRACE", "1")
        .output()
        .expect("execute gufi command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let mut log_content = String::new();
    log_content.push_str(&format!("case={case_name}\n"));
    log_content.push_str(&format!("bin={}\n", bin_path.display()));
    log_content.push_str(&format!("args={args:?}\n"));
    log_content.push_str(&format!("status={}\n", output.status));
    log_content.push_str("----- stdout -----\n");
    log_content.push_str(&stdout);
    log_content.push('\n');
    log_content.push_str("----- stderr -----\n");
    log_content.push_str(&stderr);
    log_content.push('\n');
    fs::write(&log_path, log_content).expect("write test log");

    CmdResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}
