use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};

use crate::models::{Configuration, KeySource};
use crate::storage::{restrict_dir, restrict_file};

pub const CONFIG_ENV: &str = "PWDMGR_CONFIG";
const CONFIG_DIR: &str = "pwdmgr";
const CONFIG_FILE: &str = "config.json";
const DEFAULT_RECORD_FILE: &str = "passwords.json";

pub fn default_config_path() -> Result<PathBuf> {
    if let Some(path) = std::env::var_os(CONFIG_ENV) {
        return Ok(PathBuf::from(path));
    }
    let base = dirs::config_dir().ok_or_else(|| anyhow!("Could not determine config directory"))?;
    Ok(base.join(CONFIG_DIR).join(CONFIG_FILE))
}

pub fn default_record_path() -> Result<PathBuf> {
    let base = dirs::data_dir()
        .or_else(dirs::home_dir)
        .ok_or_else(|| anyhow!("Could not determine data directory"))?;
    Ok(base.join(CONFIG_DIR).join(DEFAULT_RECORD_FILE))
}

/// `Ok(None)` when no configuration file exists yet.
pub fn load_config(path: &Path) -> Result<Option<Configuration>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path.display())),
    };
    let cfg: Configuration = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid configuration in {}", path.display()))?;
    Ok(Some(cfg))
}

pub fn save_config(path: &Path, cfg: &Configuration) -> Result<()> {
    let parent = path.parent().ok_or_else(|| anyhow!("Invalid config path"))?;
    if !parent.as_os_str().is_empty() && !parent.exists() {
        fs::create_dir_all(parent)?;
        restrict_dir(parent)?;
    }
    let dir = if parent.as_os_str().is_empty() {
        Path::new(".")
    } else {
        parent
    };
    let data = serde_json::to_string_pretty(cfg)?;
    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    temp.write_all(data.as_bytes())?;
    temp.flush()?;
    temp.as_file().sync_all()?;
    temp.persist(path)
        .map_err(|e| anyhow!("Atomic write failed: {}", e.error))?;
    restrict_file(path)?;
    Ok(())
}

/// Asks for identity, record file and key source on `input`, echoing prompts
/// to `output`. Empty answers take the defaults.
pub fn create_config<R: BufRead, W: Write>(
    input: &mut R,
    output: &mut W,
    default_path: &Path,
) -> Result<Configuration> {
    let identity = loop {
        let answer = prompt(input, output, "Identity (e-mail) used for encryption: ")?;
        if !answer.is_empty() {
            break answer;
        }
        writeln!(output, "An identity is required.")?;
    };

    let path = prompt(
        input,
        output,
        &format!("Path to passwords file [{}]: ", default_path.display()),
    )?;
    let path = if path.is_empty() {
        default_path.to_path_buf()
    } else {
        PathBuf::from(path)
    };

    let source = prompt(input, output, "Key source, keyring or passphrase [keyring]: ")?;
    let key_source = match source.to_lowercase().as_str() {
        "" | "keyring" | "k" => KeySource::Keyring,
        "passphrase" | "p" => KeySource::Passphrase,
        other => return Err(anyhow!("Unknown key source: {other}")),
    };

    Ok(Configuration {
        identity,
        path,
        key_source,
    })
}

fn prompt<R: BufRead, W: Write>(input: &mut R, output: &mut W, text: &str) -> Result<String> {
    write!(output, "{text}")?;
    output.flush()?;
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Err(anyhow!("Unexpected end of input"));
    }
    Ok(line.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config(&dir.path().join("config.json")).unwrap().is_none());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("config.json");
        let cfg = Configuration::new("me@example.com", "/data/passwords.json");
        save_config(&path, &cfg).unwrap();
        assert_eq!(load_config(&path).unwrap(), Some(cfg));
    }

    #[test]
    fn invalid_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{").unwrap();
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn interactive_creation_uses_defaults() {
        let mut input = io::Cursor::new("\nme@example.com\n\n\n");
        let mut output = Vec::new();
        let cfg = create_config(&mut input, &mut output, Path::new("/d/p.json")).unwrap();
        assert_eq!(cfg, Configuration::new("me@example.com", "/d/p.json"));
        let shown = String::from_utf8(output).unwrap();
        assert!(shown.contains("An identity is required."));
    }

    #[test]
    fn interactive_creation_accepts_passphrase_source() {
        let mut input = io::Cursor::new("me@example.com\n/x/y.json\npassphrase\n");
        let mut output = Vec::new();
        let cfg = create_config(&mut input, &mut output, Path::new("/d/p.json")).unwrap();
        assert_eq!(cfg.path, PathBuf::from("/x/y.json"));
        assert_eq!(cfg.key_source, KeySource::Passphrase);
    }

    #[test]
    fn interactive_creation_fails_on_eof() {
        let mut input = io::Cursor::new("");
        let mut output = Vec::new();
        assert!(create_config(&mut input, &mut output, Path::new("/d/p.json")).is_err());
    }
}
