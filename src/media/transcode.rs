use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::commands::ToolCommand;
use super::runner::ProcessRunner;
use super::MediaSource;
use crate::error::Result;
use crate::filters::FilterChain;

/// Encoded output and the tool's diagnostic log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeOutput {
    pub data: Vec<u8>,
    pub log: String,
}

/// Applies a filter chain with ffmpeg, streaming the result to stdout
pub struct MediaTranscoder {
    runner: Arc<dyn ProcessRunner>,
    ffmpeg_path: PathBuf,
    timeout: Option<Duration>,
}

impl MediaTranscoder {
    pub fn new(runner: Arc<dyn ProcessRunner>, ffmpeg_path: PathBuf, timeout: Option<Duration>) -> Self {
        Self {
            runner,
            ffmpeg_path,
            timeout,
        }
    }

    /// Build the full ffmpeg invocation.
    ///
    /// The output goes to a pipe, so the container format is always passed
    /// explicitly. A format already present in the chain takes precedence.
    pub fn build_command(&self, source: &MediaSource, chain: &FilterChain, format: &str) -> ToolCommand {
        let command = ToolCommand::new(&self.ffmpeg_path, "Audio transcode");
        let command = match source {
            MediaSource::File(path) => command.input(path),
            MediaSource::Bytes(bytes) => command.input_bytes(bytes.clone()),
        };
        command
            .args(chain.to_args())
            .format(format)
            .output_pipe()
            .timeout(self.timeout)
            .dedup_flags()
    }

    pub async fn transcode(
        &self,
        source: &MediaSource,
        chain: &FilterChain,
        format: &str,
    ) -> Result<TranscodeOutput> {
        let command = self.build_command(source, chain, format);
        info!("Using ffmpeg args '{}'", command.args.join(" "));

        let result = self.runner.run(command).await?;
        debug!("Transcoded {} into {} bytes of {}", source, result.stdout.len(), format);

        Ok(TranscodeOutput {
            data: result.stdout,
            log: result.stderr,
        })
    }
}
