use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::commands::ToolCommand;
use super::runner::ProcessRunner;
use super::MediaSource;
use crate::error::{ResonateError, Result};

/// Properties of an input reported by ffprobe.
///
/// Always has a positive sample rate and at least one format alias.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaInfo {
    sample_rate: u32,
    formats: Vec<String>,
}

impl MediaInfo {
    pub fn new(sample_rate: u32, formats: Vec<String>) -> Result<Self> {
        if sample_rate == 0 {
            return Err(ResonateError::MalformedProbeOutput(
                "sample rate must be positive".to_string(),
            ));
        }
        if formats.is_empty() {
            return Err(ResonateError::MalformedProbeOutput(
                "empty format name".to_string(),
            ));
        }
        Ok(Self {
            sample_rate,
            formats,
        })
    }

    /// Sample rate of the audio stream in Hz
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Container format aliases in the order ffprobe reported them
    pub fn formats(&self) -> &[String] {
        &self.formats
    }

    /// First reported container alias
    pub fn primary_format(&self) -> &str {
        self.formats.first().map(String::as_str).unwrap_or_default()
    }

    /// The reported alias matching `name` case-insensitively
    pub fn find_format(&self, name: &str) -> Option<&str> {
        self.formats
            .iter()
            .find(|format| format.eq_ignore_ascii_case(name))
            .map(String::as_str)
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    format: ProbeFormat,
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    format_name: String,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    sample_rate: Option<String>,
}

/// Parse ffprobe's `-print_format json -show_format -show_streams` output.
pub fn parse_probe_output(output: &[u8]) -> Result<MediaInfo> {
    let probe: ProbeOutput = serde_json::from_slice(output)
        .map_err(|e| ResonateError::MalformedProbeOutput(format!("invalid JSON: {}", e)))?;

    // Containers with video list it first; take the first stream that carries audio
    let raw_rate = probe
        .streams
        .iter()
        .find_map(|stream| stream.sample_rate.as_deref())
        .ok_or_else(|| {
            ResonateError::MalformedProbeOutput("no stream reports a sample rate".to_string())
        })?;

    let sample_rate = raw_rate
        .trim()
        .parse::<u32>()
        .ok()
        .filter(|rate| *rate > 0)
        .ok_or_else(|| {
            ResonateError::MalformedProbeOutput(format!("invalid sample rate '{}'", raw_rate))
        })?;

    let formats: Vec<String> = probe
        .format
        .format_name
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect();

    MediaInfo::new(sample_rate, formats)
}

/// Inspects inputs with ffprobe
pub struct MediaProber {
    runner: Arc<dyn ProcessRunner>,
    ffprobe_path: PathBuf,
    timeout: Option<Duration>,
}

impl MediaProber {
    pub fn new(runner: Arc<dyn ProcessRunner>, ffprobe_path: PathBuf, timeout: Option<Duration>) -> Self {
        Self {
            runner,
            ffprobe_path,
            timeout,
        }
    }

    /// Build the ffprobe invocation for a source
    pub fn build_command(&self, source: &MediaSource) -> ToolCommand {
        let command = ToolCommand::new(&self.ffprobe_path, "Media probe");
        let command = match source {
            MediaSource::File(path) => command.input(path),
            MediaSource::Bytes(bytes) => command.input_bytes(bytes.clone()),
        };
        command
            .args(["-print_format", "json", "-show_format", "-show_streams"])
            .timeout(self.timeout)
            .dedup_flags()
    }

    /// Probe a source for its sample rate and container formats.
    ///
    /// A non-zero ffprobe exit is returned unchanged; there is no fallback.
    pub async fn probe(&self, source: &MediaSource) -> Result<MediaInfo> {
        info!("Probing {}", source);
        let result = self.runner.run(self.build_command(source)).await?;
        let info = parse_probe_output(&result.stdout)?;
        debug!(
            "Probed {}: {} Hz, formats {}",
            source,
            info.sample_rate(),
            info.formats().join(",")
        );
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::runner::{MockProcessRunner, ProcessResult};

    const M4A_PROBE: &str = r#"{
        "streams": [
            {
                "index": 0,
                "codec_name": "aac",
                "codec_type": "audio",
                "sample_rate": "44100",
                "channels": 2
            }
        ],
        "format": {
            "filename": "song.m4a",
            "format_name": "mov,mp4,m4a,3gp,3g2,mj2",
            "duration": "212.4"
        }
    }"#;

    fn ok(stdout: &str) -> ProcessResult {
        ProcessResult {
            exit_code: 0,
            stdout: stdout.as_bytes().to_vec(),
            stderr: String::new(),
        }
    }

    #[test]
    fn test_parse_probe_output() {
        let info = parse_probe_output(M4A_PROBE.as_bytes()).unwrap();
        assert_eq!(info.sample_rate(), 44100);
        assert_eq!(info.formats(), ["mov", "mp4", "m4a", "3gp", "3g2", "mj2"]);
        assert_eq!(info.primary_format(), "mov");
        assert_eq!(info.find_format("M4A"), Some("m4a"));
        assert_eq!(info.find_format("mp3"), None);
    }

    #[test]
    fn test_media_info_requires_rate_and_format() {
        assert!(matches!(
            MediaInfo::new(44100, Vec::new()),
            Err(ResonateError::MalformedProbeOutput(_))
        ));
        assert!(MediaInfo::new(0, vec!["wav".to_string()]).is_err());

        let info = MediaInfo::new(22050, vec!["ogg".to_string()]).unwrap();
        assert_eq!(info.primary_format(), "ogg");
        assert_eq!(info.sample_rate(), 22050);
    }

    #[test]
    fn test_parse_skips_streams_without_sample_rate() {
        let json = r#"{
            "streams": [
                { "codec_type": "video", "width": 1920 },
                { "codec_type": "audio", "sample_rate": "48000" }
            ],
            "format": { "format_name": "matroska,webm" }
        }"#;
        let info = parse_probe_output(json.as_bytes()).unwrap();
        assert_eq!(info.sample_rate(), 48000);
        assert_eq!(info.formats(), ["matroska", "webm"]);
    }

    #[test]
    fn test_malformed_output() {
        for bad in [
            "",
            "not json",
            r#"{"streams": [{"sample_rate": "44100"}]"#,
            r#"{"streams": [], "format": {"format_name": "mp3"}}"#,
            r#"{"streams": [{"sample_rate": "zero"}], "format": {"format_name": "mp3"}}"#,
            r#"{"streams": [{"sample_rate": "0"}], "format": {"format_name": "mp3"}}"#,
            r#"{"streams": [{"sample_rate": "44100"}], "format": {"format_name": ""}}"#,
        ] {
            assert!(
                matches!(
                    parse_probe_output(bad.as_bytes()),
                    Err(ResonateError::MalformedProbeOutput(_))
                ),
                "expected malformed output for {bad:?}"
            );
        }
    }

    #[test]
    fn test_build_command_for_file() {
        let prober = MediaProber::new(
            Arc::new(MockProcessRunner::new()),
            PathBuf::from("/usr/bin/ffprobe"),
            None,
        );
        let command = prober.build_command(&MediaSource::File(PathBuf::from("in.mp3")));
        assert_eq!(
            command.args,
            vec!["-i", "in.mp3", "-print_format", "json", "-show_format", "-show_streams"]
        );
        assert!(command.stdin.is_none());
    }

    #[test]
    fn test_build_command_for_bytes() {
        let prober = MediaProber::new(
            Arc::new(MockProcessRunner::new()),
            PathBuf::from("ffprobe"),
            Some(Duration::from_secs(5)),
        );
        let bytes: Arc<[u8]> = Arc::from(&b"ID3"[..]);
        let command = prober.build_command(&MediaSource::Bytes(bytes));
        assert_eq!(command.args[..2], ["-i", "-"]);
        assert_eq!(command.stdin.as_deref(), Some(&b"ID3"[..]));
        assert_eq!(command.timeout, Some(Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn test_probe_runs_ffprobe() {
        let mut runner = MockProcessRunner::new();
        runner
            .expect_run()
            .withf(|command| command.program == PathBuf::from("ffprobe"))
            .times(1)
            .returning(|_| Ok(ok(M4A_PROBE)));

        let prober = MediaProber::new(Arc::new(runner), PathBuf::from("ffprobe"), None);
        let info = prober
            .probe(&MediaSource::File(PathBuf::from("song.m4a")))
            .await
            .unwrap();
        assert_eq!(info.sample_rate(), 44100);
    }

    #[tokio::test]
    async fn test_probe_propagates_tool_errors() {
        let mut runner = MockProcessRunner::new();
        runner.expect_run().returning(|_| {
            Err(ResonateError::ExternalTool {
                tool: "ffprobe".to_string(),
                code: Some(1),
                stderr: "song.m4a: Invalid data found when processing input".to_string(),
                timed_out: false,
            })
        });

        let prober = MediaProber::new(Arc::new(runner), PathBuf::from("ffprobe"), None);
        let err = prober
            .probe(&MediaSource::File(PathBuf::from("song.m4a")))
            .await
            .unwrap_err();
        assert!(matches!(err, ResonateError::ExternalTool { code: Some(1), .. }));
    }

    #[tokio::test]
    async fn test_probe_rejects_truncated_output() {
        let mut runner = MockProcessRunner::new();
        runner
            .expect_run()
            .returning(|_| Ok(ok(r#"{"streams": [{"sample_rate": "441"#)));

        let prober = MediaProber::new(Arc::new(runner), PathBuf::from("ffprobe"), None);
        let err = prober
            .probe(&MediaSource::File(PathBuf::from("song.m4a")))
            .await
            .unwrap_err();
        assert!(matches!(err, ResonateError::MalformedProbeOutput(_)));
    }
}
