use crate::emit::EmitMode;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Top-level configuration loaded from mailfuse.toml.
#[derive(Debug, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct FuseConfig {
    pub input: InputConfig,
    pub output: OutputConfig,
    pub poll: PollConfig,
    pub emit: EmitConfig,
    pub rotation: RotationConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct InputConfig {
    /// Mail log to tail. Required here or as the positional CLI argument.
    pub file: Option<PathBuf>,
    /// Where the read offset is persisted. Defaults to `<file>.offset`.
    pub checkpoint_file: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub file: PathBuf,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub interval_secs: u64,
    /// Drop all in-flight records at the end of every cycle. Disabling
    /// trades bounded memory for transactions that may span cycles.
    pub clear_between_cycles: bool,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct EmitConfig {
    pub mode: EmitMode,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RotationConfig {
    pub max_bytes: u64,
    /// How many compressed archives to retain; 0 keeps them all.
    pub keep_archives: usize,
}

// --- Default implementations ---

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            file: PathBuf::from("/var/log/mailfuse/mailfuse.log"),
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            clear_between_cycles: true,
        }
    }
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            max_bytes: 2 * 1024 * 1024,
            keep_archives: 7,
        }
    }
}

/// Errors loading the config file.
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
        }
    }
}

impl FuseConfig {
    /// Load from a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };
        toml::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_config(contents: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mailfuse.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        (dir, path)
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let config = FuseConfig::load(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config.poll.interval_secs, 5);
        assert!(config.poll.clear_between_cycles);
        assert_eq!(config.rotation.max_bytes, 2 * 1024 * 1024);
        assert_eq!(config.rotation.keep_archives, 7);
        assert_eq!(config.emit.mode, EmitMode::Permissive);
        assert_eq!(
            config.output.file,
            PathBuf::from("/var/log/mailfuse/mailfuse.log")
        );
        assert!(config.input.file.is_none());
    }

    #[test]
    fn partial_config_fills_in_defaults() {
        let (_dir, path) = write_config(
            r#"
[input]
file = "/var/log/mail/mail.log"

[poll]
interval_secs = 30
"#,
        );
        let config = FuseConfig::load(&path).unwrap();
        assert_eq!(
            config.input.file,
            Some(PathBuf::from("/var/log/mail/mail.log"))
        );
        assert_eq!(config.poll.interval_secs, 30);
        assert!(config.poll.clear_between_cycles);
        assert_eq!(config.rotation.keep_archives, 7);
    }

    #[test]
    fn strict_mode_parses() {
        let (_dir, path) = write_config("[emit]\nmode = \"strict\"\n");
        let config = FuseConfig::load(&path).unwrap();
        assert_eq!(config.emit.mode, EmitMode::Strict);
    }

    #[test]
    fn unknown_mode_is_a_parse_error() {
        let (_dir, path) = write_config("[emit]\nmode = \"lenient\"\n");
        assert!(matches!(
            FuseConfig::load(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let (_dir, path) = write_config("[poll\ninterval_secs = 5");
        assert!(matches!(
            FuseConfig::load(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn rotation_overrides_parse() {
        let (_dir, path) = write_config(
            r#"
[rotation]
max_bytes = 2097152000
keep_archives = 0
"#,
        );
        let config = FuseConfig::load(&path).unwrap();
        assert_eq!(config.rotation.max_bytes, 2_097_152_000);
        assert_eq!(config.rotation.keep_archives, 0);
    }
}
