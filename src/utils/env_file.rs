// src/utils/env_file.rs
//! Minimal `.env` reader for spawn-time secret loading
//!
//! Credentials forwarded into containers are kept out of `EngineConfig` and
//! out of the host process environment. The spawner calls `read_env_file`
//! with the keys it needs immediately before each spawn; values live only
//! for the duration of the spawn call.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Read selected keys from a `KEY=VALUE` env file.
///
/// A missing file or missing keys yield no entries. Lines starting with `#`
/// are comments; surrounding quotes on values are stripped.
pub fn read_env_file(path: &Path, keys: &[&str]) -> HashMap<String, String> {
    let mut values = HashMap::new();

    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(_) => return values,
    };

    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some((key, value)) = line.split_once('=') {
            let key = key.trim();
            if !keys.contains(&key) {
                continue;
            }

            let value = value.trim().trim_matches('"').trim_matches('\'');
            values.insert(key.to_string(), value.to_string());
        }
    }

    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_env(contents: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        (dir, path)
    }

    #[test]
    fn test_reads_requested_keys_only() {
        let (_dir, path) = write_env("AGENT_API_KEY=secret\nOTHER=nope\n");
        let values = read_env_file(&path, &["AGENT_API_KEY"]);

        assert_eq!(values.get("AGENT_API_KEY").map(String::as_str), Some("secret"));
        assert!(!values.contains_key("OTHER"));
    }

    #[test]
    fn test_skips_comments_and_strips_quotes() {
        let (_dir, path) = write_env("# comment\nAGENT_API_KEY=\"quoted\"\n");
        let values = read_env_file(&path, &["AGENT_API_KEY"]);
        assert_eq!(values.get("AGENT_API_KEY").map(String::as_str), Some("quoted"));
    }

    #[test]
    fn test_missing_file_yields_empty() {
        let values = read_env_file(Path::new("/nonexistent/.env"), &["AGENT_API_KEY"]);
        assert!(values.is_empty());
    }
}
