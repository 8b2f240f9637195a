//! `fido generate-key`: create a key and store it in an env file.

use anyhow::Context;
use std::{fs, io::ErrorKind, path::Path};

use crate::crypto::{FieldCipher, generate_encryption_key, generate_secret_key};

/// Generate a value suited to `name` and write `name=value` into `env_file`.
///
/// `ENCRYPTION_KEY` gets an AES-256 key that is checked by building a cipher from it; any other
/// name gets a random secret. Returns the generated value.
pub fn generate_into_env_file(env_file: &Path, name: &str) -> anyhow::Result<String> {
    let value = if name == "ENCRYPTION_KEY" {
        let key = generate_encryption_key();
        FieldCipher::from_key(&key).context("generated key was rejected by the cipher")?;
        key
    } else {
        generate_secret_key()
    };

    write_env_var(env_file, name, &value)?;
    Ok(value)
}

/// Set `name=value` in an env file, creating the file if it does not exist.
pub fn write_env_var(env_file: &Path, name: &str, value: &str) -> anyhow::Result<()> {
    let existing = match fs::read_to_string(env_file) {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e).with_context(|| format!("failed to read {}", env_file.display())),
    };

    let updated = upsert_env_line(&existing, name, value);
    fs::write(env_file, updated).with_context(|| format!("failed to write {}", env_file.display()))?;
    Ok(())
}

/// Replace the first assignment of `name` (dropping any later duplicates) or append one.
/// Every other line, comments included, is kept in place.
pub fn upsert_env_line(contents: &str, name: &str, value: &str) -> String {
    let assignment = format!("{name}={value}");
    let mut replaced = false;
    let mut lines: Vec<String> = Vec::new();

    for line in contents.lines() {
        if assigns(line, name) {
            if !replaced {
                lines.push(assignment.clone());
                replaced = true;
            }
        } else {
            lines.push(line.to_string());
        }
    }

    if !replaced {
        lines.push(assignment);
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

fn assigns(line: &str, name: &str) -> bool {
    let line = line.trim_start();
    let line = line.strip_prefix("export ").map(str::trim_start).unwrap_or(line);
    line.strip_prefix(name)
        .map(|rest| rest.trim_start().starts_with('='))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn appends_to_empty_contents() {
        assert_eq!(upsert_env_line("", "ENCRYPTION_KEY", "abc"), "ENCRYPTION_KEY=abc\n");
    }

    #[test]
    fn replaces_existing_assignment_and_keeps_other_lines() {
        let contents = "# database\nPOSTGRES_USER=fido\nENCRYPTION_KEY=old\n\nREDIS_HOST=redis\n";
        let updated = upsert_env_line(contents, "ENCRYPTION_KEY", "new");
        assert_eq!(updated, "# database\nPOSTGRES_USER=fido\nENCRYPTION_KEY=new\n\nREDIS_HOST=redis\n");
    }

    #[test]
    fn handles_export_prefix_and_duplicates() {
        let contents = "export ENCRYPTION_KEY=one\nOTHER=1\nENCRYPTION_KEY = two\n";
        let updated = upsert_env_line(contents, "ENCRYPTION_KEY", "three");
        assert_eq!(updated, "ENCRYPTION_KEY=three\nOTHER=1\n");
    }

    #[test]
    fn does_not_match_longer_names() {
        let contents = "ENCRYPTION_KEY_OLD=keep\n";
        let updated = upsert_env_line(contents, "ENCRYPTION_KEY", "new");
        assert_eq!(updated, "ENCRYPTION_KEY_OLD=keep\nENCRYPTION_KEY=new\n");
    }

    #[test]
    fn creates_missing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".env");

        let key = generate_into_env_file(&path, "ENCRYPTION_KEY").unwrap();

        let written = fs::read_to_string(&path).unwrap();
        assert_eq!(written, format!("ENCRYPTION_KEY={key}\n"));
        assert!(FieldCipher::from_key(&key).is_ok());
    }

    #[test]
    fn regenerating_replaces_previous_key() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".env");
        fs::write(&path, "SECRET_KEY=keep-me\nENCRYPTION_KEY=stale\n").unwrap();

        let key = generate_into_env_file(&path, "ENCRYPTION_KEY").unwrap();

        let written = fs::read_to_string(&path).unwrap();
        assert_eq!(written, format!("SECRET_KEY=keep-me\nENCRYPTION_KEY={key}\n"));
    }

    #[test]
    fn secret_key_name_gets_a_secret() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".env");

        let secret = generate_into_env_file(&path, "SECRET_KEY").unwrap();
        assert_eq!(secret.len(), 43);
        assert!(fs::read_to_string(&path).unwrap().contains(&format!("SECRET_KEY={secret}")));
    }

    #[test]
    fn unwritable_path_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing-dir").join(".env");
        assert!(generate_into_env_file(&path, "ENCRYPTION_KEY").is_err());
    }
}
