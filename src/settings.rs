use std::{
    fmt, fs, io,
    path::{Path, PathBuf},
};

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{error, info};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Settings {
    pub(crate) port: Option<u16>,
    pub(crate) file: Option<PathBuf>,
    pub(crate) server_ready: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FileProblem {
    NotFound,
    NotAbsolute,
}

impl fmt::Display for FileProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => f.write_str("The selected file is not found!"),
            Self::NotAbsolute => f.write_str("Absolute path needed!"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub(crate) enum ConfigError {
    #[error("The settings.json file is missing! ({})", path.display())]
    Missing { path: PathBuf },
    #[error("Malformed or missing JSON in settings.json file! ({reason})")]
    Malformed { path: PathBuf, reason: String },
    #[error("Invalid or missing port number! ({raw})")]
    InvalidPort { raw: String },
    #[error("{problem} ({})", path.display())]
    FileUnusable { path: PathBuf, problem: FileProblem },
}

/// Receives configuration failures that the user has to see. The bridge keeps
/// running after every notification.
pub(crate) trait FatalNotifier: Send + Sync {
    fn notify(&self, error: &ConfigError);
}

pub(crate) struct LogNotifier;

impl FatalNotifier for LogNotifier {
    fn notify(&self, error: &ConfigError) {
        error!("{error}");
    }
}

#[derive(Debug, Deserialize)]
struct RawSettings {
    #[serde(default)]
    port: Value,
    #[serde(default)]
    file: Option<String>,
}

pub(crate) fn load(path: &Path, notifier: &dyn FatalNotifier) -> Settings {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(error) if error.kind() == io::ErrorKind::NotFound => {
            notifier.notify(&ConfigError::Missing {
                path: path.to_path_buf(),
            });
            return Settings::default();
        }
        Err(error) => {
            notifier.notify(&ConfigError::Malformed {
                path: path.to_path_buf(),
                reason: error.to_string(),
            });
            return Settings::default();
        }
    };

    let raw = match parse_document(&contents) {
        Ok(raw) => raw,
        Err(reason) => {
            notifier.notify(&ConfigError::Malformed {
                path: path.to_path_buf(),
                reason,
            });
            return Settings::default();
        }
    };

    let mut settings = Settings {
        port: None,
        file: None,
        server_ready: true,
    };

    match coerce_port(&raw.port) {
        Some(port) => settings.port = Some(port),
        None => {
            settings.server_ready = false;
            notifier.notify(&ConfigError::InvalidPort {
                raw: describe_port(&raw.port),
            });
        }
    }

    if let Some(file) = raw.file {
        match check_target_file(Path::new(&file)) {
            Ok(()) => settings.file = Some(PathBuf::from(file)),
            Err(problem) => {
                settings.server_ready = false;
                notifier.notify(&ConfigError::FileUnusable {
                    path: PathBuf::from(file),
                    problem,
                });
            }
        }
    }

    info!(
        port = ?settings.port,
        file = ?settings.file,
        ready = settings.server_ready,
        "settings loaded from {}",
        path.display()
    );
    settings
}

// A derived struct also accepts a JSON array by field position, so the
// document shape is checked before the fields are read.
fn parse_document(contents: &str) -> Result<RawSettings, String> {
    let document = serde_json::from_str::<Value>(contents).map_err(|error| error.to_string())?;
    if !document.is_object() {
        return Err("settings document is not a JSON object".to_string());
    }
    serde_json::from_value(document).map_err(|error| error.to_string())
}

fn coerce_port(value: &Value) -> Option<u16> {
    let number = match value {
        Value::Number(number) => {
            if let Some(integer) = number.as_i64() {
                integer
            } else {
                let float = number.as_f64()?;
                if !float.is_finite() || float.fract() != 0.0 {
                    return None;
                }
                float as i64
            }
        }
        Value::String(raw) => raw.trim().parse::<i64>().ok()?,
        _ => return None,
    };

    u16::try_from(number).ok()
}

fn describe_port(value: &Value) -> String {
    match value {
        Value::Null => "missing".to_string(),
        other => other.to_string(),
    }
}

fn check_target_file(path: &Path) -> Result<(), FileProblem> {
    if !path.is_absolute() {
        return Err(FileProblem::NotAbsolute);
    }
    if !path.exists() {
        return Err(FileProblem::NotFound);
    }
    Ok(())
}
