use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ResonateError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Input file '{}' doesn't exist or is not readable", .0.display())]
    InputNotFound(PathBuf),

    #[error("Preset not found: {0}")]
    PresetNotFound(String),

    #[error("{}", external_tool_message(.tool, .code, .stderr, .timed_out))]
    ExternalTool {
        tool: String,
        code: Option<i32>,
        stderr: String,
        timed_out: bool,
    },

    #[error("Failed to execute {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed probe output: {0}")]
    MalformedProbeOutput(String),

    #[error("Failed to write output '{}': {source}", .path.display())]
    OutputWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid value '{value}' for option '{key}': {reason}")]
    InvalidOption {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ResonateError {
    /// Stderr captured from a failed external tool, if any.
    pub fn diagnostics(&self) -> Option<&str> {
        match self {
            Self::ExternalTool { stderr, .. } if !stderr.trim().is_empty() => Some(stderr),
            _ => None,
        }
    }
}

const DIAGNOSTIC_TAIL_LINES: usize = 8;

fn external_tool_message(tool: &str, code: &Option<i32>, stderr: &str, timed_out: &bool) -> String {
    if *timed_out {
        return format!("{} timed out", tool);
    }
    let status = match code {
        Some(code) => format!("exited with code {}", code),
        None => "was terminated by a signal".to_string(),
    };
    // ffmpeg prints its banner and stream summary first; the cause is at the end
    let lines: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
    let log = lines[lines.len().saturating_sub(DIAGNOSTIC_TAIL_LINES)..].join("\n");
    if log.is_empty() {
        format!("{} {}", tool, status)
    } else {
        format!("{} {}: {}", tool, status, log)
    }
}

pub type Result<T> = std::result::Result<T, ResonateError>;
