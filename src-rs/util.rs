use chrono::Utc;
use rand::Rng;
use serde::Serialize;
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

pub fn ensure_parent_dir(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

pub fn write_json_pretty<T: Serialize + ?Sized>(path: &Path, value: &T) -> io::Result<()> {
    ensure_parent_dir(path)?;
    let raw = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
    fs::write(path, raw)
}

pub fn write_bytes(path: &Path, bytes: &[u8]) -> io::Result<()> {
    ensure_parent_dir(path)?;
    fs::write(path, bytes)
}

/// `<dir>/<stem>.json` next to an output file.
pub fn sidecar_for(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    path.parent()
        .unwrap_or_else(|| Path::new(""))
        .join(format!("{stem}.json"))
}

pub fn abs_path(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(path)
}

/// Lowercase file-name-safe slug; whitespace becomes `-`.
pub fn slugify(input: &str, fallback: &str) -> String {
    let out: String = input
        .chars()
        .filter_map(|ch| {
            let lower = ch.to_ascii_lowercase();
            if lower.is_ascii_alphanumeric() || matches!(lower, '.' | '_' | '-') {
                Some(lower)
            } else if lower.is_ascii_whitespace() {
                Some('-')
            } else {
                None
            }
        })
        .collect();
    if out.is_empty() {
        fallback.to_string()
    } else {
        out
    }
}

pub fn timestamp_compact() -> String {
    Utc::now().format("%Y%m%d-%H%M%S").to_string()
}

pub fn timestamp_iso() -> String {
    Utc::now().to_rfc3339()
}

/// Unique-enough id for artifacts of one run.
pub fn run_id() -> String {
    format!(
        "{}-{}-{}",
        timestamp_compact(),
        std::process::id(),
        rand::thread_rng().gen_range(1000..9999)
    )
}

pub fn round_to(v: f64, digits: u32) -> f64 {
    let factor = 10f64.powi(digits as i32);
    (v * factor).round() / factor
}

pub fn truncate_text(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    text.chars().take(limit).collect::<String>() + "\n...<truncated>..."
}

pub fn command_exists(name: &str) -> bool {
    Command::new("bash")
        .arg("-lc")
        .arg(format!("command -v {name} >/dev/null 2>&1"))
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn writes_json_into_missing_dirs() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("a").join("b.json");
        write_json_pretty(&target, &json!({"ok": true})).unwrap();
        let raw = fs::read_to_string(&target).unwrap();
        assert!(raw.contains("\"ok\": true"));
    }

    #[test]
    fn sidecar_sits_next_to_output() {
        assert_eq!(
            sidecar_for(Path::new("out/crop-1.jpg")),
            PathBuf::from("out/crop-1.json")
        );
    }

    #[test]
    fn slugify_keeps_safe_chars() {
        assert_eq!(slugify("Quadratic Eq/2", "item"), "quadratic-eq2");
        assert_eq!(slugify("///", "item"), "item");
    }

    #[test]
    fn truncates_long_text() {
        assert_eq!(truncate_text("abc", 5), "abc");
        assert_eq!(truncate_text("abcdef", 3), "abc\n...<truncated>...");
    }
}
