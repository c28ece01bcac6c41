// External media tool integration
//
// - commands: ToolCommand builder and argument de-duplication
// - runner: ProcessRunner trait and the tokio-backed implementation
// - probe: ffprobe invocation and JSON parsing
// - transcode: ffmpeg invocation applying a filter chain

pub mod commands;
pub mod probe;
pub mod runner;
pub mod transcode;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

pub use commands::*;
pub use probe::*;
pub use runner::*;
pub use transcode::*;

use crate::error::Result;

/// Where a tool reads its input from
#[derive(Debug, Clone, PartialEq)]
pub enum MediaSource {
    File(PathBuf),
    /// Fully buffered input fed to the tool's stdin
    Bytes(Arc<[u8]>),
}

impl MediaSource {
    pub fn path(&self) -> Option<&Path> {
        match self {
            MediaSource::File(path) => Some(path),
            MediaSource::Bytes(_) => None,
        }
    }
}

impl fmt::Display for MediaSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaSource::File(path) => write!(f, "{}", path.display()),
            MediaSource::Bytes(bytes) => write!(f, "<stdin, {} bytes>", bytes.len()),
        }
    }
}

/// Get the first line of a tool's `-version` output
pub async fn tool_version(runner: &dyn ProcessRunner, program: &Path) -> Result<String> {
    let command = ToolCommand::new(program, "Version check").arg("-version");
    let result = runner.run(command).await?;
    let version_info = String::from_utf8_lossy(&result.stdout);
    let first_line = version_info.lines().next().unwrap_or("Unknown version").trim();
    info!("{} is available: {}", program.display(), first_line);
    Ok(first_line.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tool_version_first_line() {
        let mut runner = MockProcessRunner::new();
        runner
            .expect_run()
            .withf(|command| command.args == vec!["-version".to_string()])
            .returning(|_| {
                Ok(ProcessResult {
                    exit_code: 0,
                    stdout: b"ffmpeg version 6.1.1 Copyright (c) 2000-2023\nbuilt with gcc\n".to_vec(),
                    stderr: String::new(),
                })
            });

        let version = tool_version(&runner, Path::new("ffmpeg")).await.unwrap();
        assert_eq!(version, "ffmpeg version 6.1.1 Copyright (c) 2000-2023");
    }

    #[test]
    fn test_media_source_display() {
        assert_eq!(MediaSource::File(PathBuf::from("a.mp3")).to_string(), "a.mp3");
        let bytes: Arc<[u8]> = Arc::from(&[0u8; 4][..]);
        assert_eq!(MediaSource::Bytes(bytes).to_string(), "<stdin, 4 bytes>");
    }
}
