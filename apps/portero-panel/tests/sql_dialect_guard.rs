//! Every query in this workspace targets Postgres. A `?` placeholder inside
//! a sqlx query literal means someone pasted SQLite-dialect SQL; catch it at
//! test time instead of at the first 500.

use std::fs;
use std::path::{Path, PathBuf};

fn collect_rs_files(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_rs_files(&path, out);
        } else if path.extension().and_then(|s| s.to_str()) == Some("rs") {
            out.push(path);
        }
    }
}

/// Extracts the first string literal after `start`, tolerating both `"..."`
/// and `r#"..."#` forms. Returns the literal body, or None.
fn literal_after(content: &str, start: usize) -> Option<String> {
    let rest = &content[start..];
    let open = rest.find('(')?;
    let mut idx = start + open + 1;
    let bytes = content.as_bytes();

    while idx < bytes.len() && bytes[idx].is_ascii_whitespace() {
        idx += 1;
    }

    if bytes.get(idx) == Some(&b'r') {
        let mut hashes = 0;
        let mut j = idx + 1;
        while bytes.get(j) == Some(&b'#') {
            hashes += 1;
            j += 1;
        }
        if bytes.get(j) != Some(&b'"') {
            return None;
        }
        let body_start = j + 1;
        let close = format!("\"{}", "#".repeat(hashes));
        let end = content[body_start..].find(&close)?;
        return Some(content[body_start..body_start + end].to_string());
    }

    if bytes.get(idx) == Some(&b'"') {
        let body_start = idx + 1;
        let mut j = body_start;
        let mut escaped = false;
        while j < bytes.len() {
            match (escaped, bytes[j]) {
                (true, _) => escaped = false,
                (false, b'\\') => escaped = true,
                (false, b'"') => return Some(content[body_start..j].to_string()),
                _ => {}
            }
            j += 1;
        }
    }
    None
}

#[test]
fn no_sqlite_placeholders_in_queries() {
    let roots = [
        PathBuf::from("src"),
        PathBuf::from("../../libs/portero-db/src"),
    ];

    let mut files = Vec::new();
    for root in &roots {
        collect_rs_files(root, &mut files);
    }
    assert!(!files.is_empty(), "no source files found to scan");

    let mut offenders = Vec::new();
    for file in &files {
        let content = fs::read_to_string(file).unwrap();
        for needle in ["sqlx::query_as", "sqlx::query_scalar", "sqlx::query"] {
            for (pos, _) in content.match_indices(needle) {
                if let Some(sql) = literal_after(&content, pos) {
                    if sql.contains('?') {
                        offenders.push(format!("{}: {}", file.display(), sql.trim()));
                    }
                }
            }
        }
    }

    assert!(
        offenders.is_empty(),
        "SQLite-style placeholders found:\n{}",
        offenders.join("\n")
    );
}
