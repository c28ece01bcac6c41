use std::collections::HashSet;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::Config;
use crate::error::{ResonateError, Result};
use crate::filters::FilterChain;
use crate::media::{
    tool_version, MediaInfo, MediaProber, MediaSource, MediaTranscoder, ProcessRunner,
    TokioProcessRunner, ToolCommand, PIPE,
};
use crate::options::{EffectiveOptions, OptionKey, OptionSet};
use crate::preset::PresetStore;

/// File extensions picked up by batch processing
pub const MEDIA_EXTENSIONS: &[&str] = &[
    "mp3", "wav", "flac", "ogg", "oga", "opus", "m4a", "aac", "wma", "aif", "aiff", "mp4", "mkv",
    "webm", "mov",
];

/// Stem used for derived output names when reading from stdin
pub const STDIN_OUTPUT_STEM: &str = "output";

/// Appended to a derived output stem that would otherwise overwrite the input
pub const COLLISION_SUFFIX: &str = "-resonate";

/// Stages of a single pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Validating,
    Probing,
    BuildingFilters,
    Transcoding,
    Writing,
    Done,
    Failed,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Idle => "idle",
            PipelineState::Validating => "validating",
            PipelineState::Probing => "probing",
            PipelineState::BuildingFilters => "building filters",
            PipelineState::Transcoding => "transcoding",
            PipelineState::Writing => "writing",
            PipelineState::Done => "done",
            PipelineState::Failed => "failed",
        };
        f.write_str(name)
    }
}

impl PipelineState {
    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Failed)
    }
}

#[derive(Debug)]
struct StateTracker {
    history: Vec<PipelineState>,
}

impl StateTracker {
    fn new() -> Self {
        Self {
            history: vec![PipelineState::Idle],
        }
    }

    fn current(&self) -> PipelineState {
        *self.history.last().unwrap_or(&PipelineState::Idle)
    }

    fn enter(&mut self, next: PipelineState) {
        debug!("Pipeline: {} -> {}", self.current(), next);
        self.history.push(next);
    }

    fn fail(&mut self, error: &ResonateError) {
        warn!("Pipeline failed while {}: {}", self.current(), error);
        self.history.push(PipelineState::Failed);
    }
}

/// Where the result is written
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    File(PathBuf),
    Stdout,
}

impl fmt::Display for OutputTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputTarget::File(path) => write!(f, "{}", path.display()),
            OutputTarget::Stdout => f.write_str("<stdout>"),
        }
    }
}

/// Everything decided before transcoding starts
#[derive(Debug, Clone)]
pub struct PipelinePlan {
    pub source: MediaSource,
    pub media: MediaInfo,
    pub chain: FilterChain,
    pub format: String,
    pub output: OutputTarget,
    pub command: ToolCommand,
}

/// Result of a completed pipeline run
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub output: OutputTarget,
    pub format: String,
    pub media: MediaInfo,
    pub chain: FilterChain,
    pub bytes_written: usize,
    /// ffmpeg's diagnostic log
    pub log: String,
    pub states: Vec<PipelineState>,
}

#[derive(Debug, Clone, Default)]
pub struct BatchSummary {
    pub succeeded: Vec<(PathBuf, OutputTarget)>,
    pub failed: Vec<(PathBuf, String)>,
}

/// Output format: an explicit request wins, then the input's extension if
/// the prober reported it as an alias, then the first reported alias.
pub fn resolve_output_format(requested: Option<&str>, input: Option<&Path>, media: &MediaInfo) -> String {
    if let Some(format) = requested {
        return format.to_string();
    }
    input
        .and_then(|path| path.extension())
        .and_then(|ext| ext.to_str())
        .and_then(|ext| media.find_format(ext))
        .unwrap_or_else(|| media.primary_format())
        .to_string()
}

/// `<output_dir>/<input stem>.<format>`
pub fn derive_output_path(output_dir: &Path, input: Option<&Path>, format: &str) -> PathBuf {
    let stem = input
        .and_then(|path| path.file_stem())
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| STDIN_OUTPUT_STEM.to_string());
    output_dir.join(format!("{}.{}", stem, format))
}

async fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a).await, fs::canonicalize(b).await) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Replace `<stem>.<ext>` with `<stem><suffix>.<ext>`
fn with_stem_suffix(path: &Path, suffix: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{}{}.{}", stem, suffix, ext.to_string_lossy()),
        None => format!("{}{}", stem, suffix),
    };
    path.with_file_name(name)
}

/// Buffer piped input. An empty stream counts as a missing input.
async fn read_piped_input<R: AsyncRead + Unpin>(mut reader: R) -> Result<MediaSource> {
    let mut buffer = Vec::new();
    reader.read_to_end(&mut buffer).await?;
    if buffer.is_empty() {
        return Err(ResonateError::InputNotFound(PathBuf::from(PIPE)));
    }
    debug!("Read {} bytes of piped input", buffer.len());
    Ok(MediaSource::Bytes(buffer.into()))
}

async fn write_piped_output<W: AsyncWrite + Unpin>(mut writer: W, data: &[u8]) -> Result<()> {
    let to_err = |source| ResonateError::OutputWrite {
        path: PathBuf::from(PIPE),
        source,
    };
    writer.write_all(data).await.map_err(to_err)?;
    writer.flush().await.map_err(to_err)?;
    Ok(())
}

/// Directory for derived output paths, plus the paths earlier files of the
/// same batch already wrote to.
struct OutputScope<'a> {
    directory: &'a Path,
    claimed: &'a HashSet<PathBuf>,
}

/// Write `data` next to `path` and rename it into place, so a failed write
/// never leaves a partial file behind.
fn write_atomically(path: &Path, data: &[u8]) -> Result<()> {
    let to_err = |source: std::io::Error| ResonateError::OutputWrite {
        path: path.to_path_buf(),
        source,
    };

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir).map_err(to_err)?;

    let mut file = tempfile::Builder::new()
        .prefix(".resonate-")
        .suffix(".part")
        .tempfile_in(&dir)
        .map_err(to_err)?;
    file.write_all(data).map_err(to_err)?;
    file.as_file().sync_all().map_err(to_err)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.as_file()
            .set_permissions(std::fs::Permissions::from_mode(0o644))
            .map_err(to_err)?;
    }

    file.persist(path).map_err(|e| to_err(e.error))?;
    Ok(())
}

/// Collect media files under `dir`, skipping `exclude` (and everything below it).
pub fn collect_media_files(dir: &Path, exclude: Option<&Path>) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_entry(|entry| exclude.is_none_or(|skip| entry.path() != skip))
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| MEDIA_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        })
        .map(|entry| entry.into_path())
        .collect();
    files.sort();
    files
}

/// `<output_dir>/<directory of file relative to root>`
pub fn batch_output_directory(output_dir: &Path, root: &Path, file: &Path) -> PathBuf {
    match file
        .strip_prefix(root)
        .ok()
        .and_then(Path::parent)
        .filter(|relative| !relative.as_os_str().is_empty())
    {
        Some(relative) => output_dir.join(relative),
        None => output_dir.to_path_buf(),
    }
}

pub struct Workflow {
    config: Config,
    presets: PresetStore,
    runner: Arc<dyn ProcessRunner>,
}

impl Workflow {
    pub fn new(config: Config, presets: PresetStore) -> Self {
        Self::with_runner(config, presets, Arc::new(TokioProcessRunner::new()))
    }

    pub fn with_runner(config: Config, presets: PresetStore, runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            config,
            presets,
            runner,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn presets(&self) -> &PresetStore {
        &self.presets
    }

    fn ffmpeg_path(&self, options: &EffectiveOptions<'_>) -> PathBuf {
        options
            .value(OptionKey::FfmpegPath)
            .map(PathBuf::from)
            .unwrap_or_else(|| self.config.media.ffmpeg_path.clone())
    }

    fn ffprobe_path(&self, options: &EffectiveOptions<'_>) -> PathBuf {
        options
            .value(OptionKey::FfprobePath)
            .map(PathBuf::from)
            .unwrap_or_else(|| self.config.media.ffprobe_path.clone())
    }

    fn prober(&self, ffprobe_path: PathBuf) -> MediaProber {
        MediaProber::new(self.runner.clone(), ffprobe_path, self.config.media.timeout())
    }

    fn transcoder(&self, ffmpeg_path: PathBuf) -> MediaTranscoder {
        MediaTranscoder::new(self.runner.clone(), ffmpeg_path, self.config.media.timeout())
    }

    /// Confirm a file input exists and is readable
    async fn open_file(&self, path: &Path) -> Result<MediaSource> {
        let readable = match fs::metadata(path).await {
            Ok(metadata) if metadata.is_file() => fs::File::open(path).await.is_ok(),
            _ => false,
        };
        if !readable {
            return Err(ResonateError::InputNotFound(path.to_path_buf()));
        }
        Ok(MediaSource::File(path.to_path_buf()))
    }

    async fn open_input(&self, options: &EffectiveOptions<'_>) -> Result<MediaSource> {
        let input = options
            .value(OptionKey::Input)
            .ok_or_else(|| ResonateError::Config("No input file given".to_string()))?;

        if input != PIPE {
            return self.open_file(Path::new(input)).await;
        }

        read_piped_input(tokio::io::stdin()).await
    }

    async fn resolve_output(
        &self,
        options: &EffectiveOptions<'_>,
        source: &MediaSource,
        format: &str,
        scope: &OutputScope<'_>,
    ) -> Result<OutputTarget> {
        match options.value(OptionKey::Output) {
            Some(PIPE) => return Ok(OutputTarget::Stdout),
            Some(path) => return Ok(OutputTarget::File(PathBuf::from(path))),
            None => {}
        }

        let input = source.path();
        let mut derived = derive_output_path(scope.directory, input, format);
        let Some(input) = input else {
            return Ok(OutputTarget::File(derived));
        };

        if same_file(input, &derived).await {
            let renamed = with_stem_suffix(&derived, COLLISION_SUFFIX);
            info!(
                "Derived output {} is the input file, writing {} instead",
                derived.display(),
                renamed.display()
            );
            derived = renamed;
        }

        // Same stem, different extension (a.flac and a.mp3 both becoming a.mp3)
        if scope.claimed.contains(&derived) {
            let ext = input
                .extension()
                .map(|ext| ext.to_string_lossy().to_lowercase())
                .unwrap_or_default();
            let renamed = with_stem_suffix(&derived, &format!("-{}", ext));
            if ext.is_empty() || scope.claimed.contains(&renamed) {
                return Err(ResonateError::Config(format!(
                    "Output {} was already written by another input",
                    derived.display()
                )));
            }
            warn!(
                "Output {} was already written by another input, writing {} instead",
                derived.display(),
                renamed.display()
            );
            derived = renamed;
        }

        Ok(OutputTarget::File(derived))
    }

    async fn prepare(
        &self,
        options: &OptionSet,
        scope: &OutputScope<'_>,
        tracker: &mut StateTracker,
    ) -> Result<PipelinePlan> {
        tracker.enter(PipelineState::Validating);
        let effective = self.presets.resolve(options)?;
        if let Some(preset) = effective.preset() {
            info!("Using preset '{}'", preset.name);
        }
        let source = self.open_input(&effective).await?;

        tracker.enter(PipelineState::Probing);
        let media = self.prober(self.ffprobe_path(&effective)).probe(&source).await?;

        tracker.enter(PipelineState::BuildingFilters);
        let chain = FilterChain::build(&effective, media.sample_rate());
        let format = resolve_output_format(chain.format(), source.path(), &media);
        let output = self.resolve_output(&effective, &source, &format, scope).await?;
        let command = self
            .transcoder(self.ffmpeg_path(&effective))
            .build_command(&source, &chain, &format);
        info!("Filter chain: {}", chain.describe());

        Ok(PipelinePlan {
            source,
            media,
            chain,
            format,
            output,
            command,
        })
    }

    async fn execute(
        &self,
        options: &OptionSet,
        scope: &OutputScope<'_>,
        tracker: &mut StateTracker,
    ) -> Result<PipelineOutcome> {
        let plan = self.prepare(options, scope, tracker).await?;

        tracker.enter(PipelineState::Transcoding);
        let program = plan.command.program.clone();
        let output = self
            .transcoder(program)
            .transcode(&plan.source, &plan.chain, &plan.format)
            .await?;

        tracker.enter(PipelineState::Writing);
        let bytes_written = output.data.len();
        match &plan.output {
            OutputTarget::Stdout => write_piped_output(tokio::io::stdout(), &output.data).await?,
            OutputTarget::File(path) => {
                let path = path.clone();
                let data = output.data;
                tokio::task::spawn_blocking(move || write_atomically(&path, &data))
                    .await
                    .map_err(|e| ResonateError::Io(std::io::Error::other(e)))??;
            }
        }

        Ok(PipelineOutcome {
            output: plan.output,
            format: plan.format,
            media: plan.media,
            chain: plan.chain,
            bytes_written,
            log: output.log,
            states: Vec::new(),
        })
    }

    /// Probe the input and assemble the ffmpeg invocation without running it.
    pub async fn plan(&self, options: &OptionSet) -> Result<PipelinePlan> {
        let claimed = HashSet::new();
        let scope = OutputScope {
            directory: &self.config.output.directory,
            claimed: &claimed,
        };
        let mut tracker = StateTracker::new();
        self.prepare(options, &scope, &mut tracker)
            .await
            .inspect_err(|e| tracker.fail(e))
    }

    /// Run the full pipeline for one input: validate, probe, build the filter
    /// chain, transcode and write the result.
    pub async fn apply(&self, options: &OptionSet) -> Result<PipelineOutcome> {
        let claimed = HashSet::new();
        let scope = OutputScope {
            directory: &self.config.output.directory,
            claimed: &claimed,
        };
        self.run(options, &scope).await
    }

    async fn run(&self, options: &OptionSet, scope: &OutputScope<'_>) -> Result<PipelineOutcome> {
        let mut tracker = StateTracker::new();
        match self.execute(options, scope, &mut tracker).await {
            Ok(mut outcome) => {
                tracker.enter(PipelineState::Done);
                info!("Finished! Saved at '{}'", outcome.output);
                outcome.states = tracker.history;
                Ok(outcome)
            }
            Err(e) => {
                tracker.fail(&e);
                Err(e)
            }
        }
    }

    /// Probe a single file
    pub async fn probe(&self, input: &Path) -> Result<MediaInfo> {
        let source = self.open_file(input).await?;
        self.prober(self.config.media.ffprobe_path.clone())
            .probe(&source)
            .await
    }

    /// Run `-version` against ffmpeg and ffprobe
    pub async fn check_tools(&self) -> Vec<(PathBuf, Result<String>)> {
        let mut results = Vec::new();
        for program in [&self.config.media.ffmpeg_path, &self.config.media.ffprobe_path] {
            let version = tool_version(self.runner.as_ref(), program).await;
            results.push((program.clone(), version));
        }
        results
    }

    /// Apply the same options to every media file in a directory, one
    /// isolated pipeline per file. Individual failures are collected, not fatal.
    ///
    /// Outputs keep the input's subdirectory under the output directory. When
    /// two inputs in one folder would still map to the same output (`a.flac`
    /// and `a.mp3` rendered as mp3), the later one gets its source extension
    /// appended to the stem (`a-mp3.mp3`).
    pub async fn process_directory<P, F>(
        &self,
        input_dir: P,
        options: &OptionSet,
        mut on_file: F,
    ) -> Result<BatchSummary>
    where
        P: AsRef<Path>,
        F: FnMut(&Path, usize, usize),
    {
        let input_dir = input_dir.as_ref();
        info!("Processing directory: {}", input_dir.display());

        if !input_dir.is_dir() {
            return Err(ResonateError::Config(format!(
                "Input path {} is not a directory",
                input_dir.display()
            )));
        }
        if options.contains(OptionKey::Output) || options.contains(OptionKey::Input) {
            return Err(ResonateError::Config(
                "input and output are derived per file in batch mode".to_string(),
            ));
        }
        // A missing preset must fail before any file is touched
        self.presets.resolve(options)?;

        // Keep outputs written inside the input tree out of the walk
        let root = fs::canonicalize(input_dir).await?;
        let exclude = fs::canonicalize(&self.config.output.directory)
            .await
            .ok()
            .filter(|dir| *dir != root && dir.starts_with(&root));

        let files = collect_media_files(&root, exclude.as_deref());
        info!("Found {} media files to process", files.len());

        let mut summary = BatchSummary::default();
        let mut claimed = HashSet::new();
        for (index, file) in files.iter().enumerate() {
            on_file(file, index, files.len());

            let mut file_options = options.clone();
            file_options.set_value(OptionKey::Input, &file.to_string_lossy())?;

            // Mirror the input tree so equal stems in different folders stay apart
            let directory = batch_output_directory(&self.config.output.directory, &root, file);
            let scope = OutputScope {
                directory: &directory,
                claimed: &claimed,
            };

            match self.run(&file_options, &scope).await {
                Ok(outcome) => {
                    info!("Successfully processed: {}", file.display());
                    if let OutputTarget::File(path) = &outcome.output {
                        claimed.insert(path.clone());
                    }
                    summary.succeeded.push((file.clone(), outcome.output));
                }
                Err(e) => {
                    warn!("Failed to process {}: {}", file.display(), e);
                    summary.failed.push((file.clone(), e.to_string()));
                }
            }
        }

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{MockProcessRunner, ProcessResult};
    use assert_fs::prelude::*;
    use assert_fs::TempDir;

    const WAV_PROBE: &str = r#"{
        "streams": [{ "codec_type": "audio", "sample_rate": "44100" }],
        "format": { "format_name": "wav" }
    }"#;

    fn probe_ok(json: &'static str) -> Result<ProcessResult> {
        Ok(ProcessResult {
            exit_code: 0,
            stdout: json.as_bytes().to_vec(),
            stderr: String::new(),
        })
    }

    fn config_with_output(dir: &Path) -> Config {
        let mut config = Config::default();
        config.output.directory = dir.to_path_buf();
        config
    }

    /// Runner answering ffprobe with `probe_json` and ffmpeg with `audio`
    fn fake_tools(probe_json: &'static str, audio: &'static [u8]) -> MockProcessRunner {
        let mut runner = MockProcessRunner::new();
        runner
            .expect_run()
            .withf(|command| command.tool_name() == "ffprobe")
            .returning(move |_| probe_ok(probe_json));
        runner
            .expect_run()
            .withf(|command| command.tool_name() == "ffmpeg")
            .returning(move |_| {
                Ok(ProcessResult {
                    exit_code: 0,
                    stdout: audio.to_vec(),
                    stderr: "size=1kB".to_string(),
                })
            });
        runner
    }

    fn media(formats: &[&str]) -> MediaInfo {
        MediaInfo::new(44100, formats.iter().map(|f| f.to_string()).collect()).unwrap()
    }

    #[test]
    fn test_resolve_output_format() {
        let m4a = media(&["mov", "mp4", "m4a"]);
        assert_eq!(resolve_output_format(None, Some(Path::new("a.m4a")), &m4a), "m4a");
        assert_eq!(resolve_output_format(None, Some(Path::new("a.M4A")), &m4a), "m4a");
        assert_eq!(resolve_output_format(None, Some(Path::new("a.aac")), &m4a), "mov");
        assert_eq!(resolve_output_format(None, None, &m4a), "mov");
        assert_eq!(resolve_output_format(Some("ogg"), Some(Path::new("a.m4a")), &m4a), "ogg");
    }

    #[test]
    fn test_derive_output_path() {
        assert_eq!(
            derive_output_path(Path::new("out"), Some(Path::new("music/song.flac")), "mp3"),
            PathBuf::from("out/song.mp3")
        );
        assert_eq!(
            derive_output_path(Path::new("."), None, "wav"),
            PathBuf::from("./output.wav")
        );
    }

    #[test]
    fn test_state_display() {
        assert_eq!(PipelineState::BuildingFilters.to_string(), "building filters");
        assert!(PipelineState::Failed.is_terminal());
        assert!(!PipelineState::Writing.is_terminal());
    }

    #[tokio::test]
    async fn test_apply_writes_output() {
        let temp = TempDir::new().unwrap();
        let input = temp.child("song.wav");
        input.write_binary(b"RIFF....WAVE").unwrap();
        let out_dir = temp.child("out");

        let workflow = Workflow::with_runner(
            config_with_output(out_dir.path()),
            PresetStore::default(),
            Arc::new(fake_tools(WAV_PROBE, b"processed")),
        );

        let mut options = OptionSet::new();
        options.set_value(OptionKey::Input, &input.path().to_string_lossy()).unwrap();
        options.set_flag(OptionKey::Nightcore, true).unwrap();

        let outcome = workflow.apply(&options).await.unwrap();

        let expected = out_dir.child("song.wav");
        assert_eq!(outcome.output, OutputTarget::File(expected.path().to_path_buf()));
        assert_eq!(outcome.format, "wav");
        assert_eq!(outcome.bytes_written, 9);
        assert_eq!(outcome.log, "size=1kB");
        assert_eq!(outcome.chain.filters(), ["asetrate=44100*1.25,aresample=44100"]);
        assert_eq!(std::fs::read(expected.path()).unwrap(), b"processed");
        assert_eq!(
            outcome.states,
            vec![
                PipelineState::Idle,
                PipelineState::Validating,
                PipelineState::Probing,
                PipelineState::BuildingFilters,
                PipelineState::Transcoding,
                PipelineState::Writing,
                PipelineState::Done,
            ]
        );
    }

    #[tokio::test]
    async fn test_apply_does_not_overwrite_input() {
        let temp = TempDir::new().unwrap();
        let input = temp.child("song.wav");
        input.write_binary(b"original").unwrap();

        let workflow = Workflow::with_runner(
            config_with_output(temp.path()),
            PresetStore::default(),
            Arc::new(fake_tools(WAV_PROBE, b"processed")),
        );

        let mut options = OptionSet::new();
        options.set_value(OptionKey::Input, &input.path().to_string_lossy()).unwrap();

        let outcome = workflow.apply(&options).await.unwrap();
        assert_eq!(
            outcome.output,
            OutputTarget::File(temp.child("song-resonate.wav").path().to_path_buf())
        );
        assert_eq!(std::fs::read(input.path()).unwrap(), b"original");
    }

    #[tokio::test]
    async fn test_explicit_output_and_format() {
        let temp = TempDir::new().unwrap();
        let input = temp.child("song.wav");
        input.write_binary(b"RIFF").unwrap();
        let output = temp.child("nested/dir/remix.ogg");

        let mut runner = MockProcessRunner::new();
        runner
            .expect_run()
            .withf(|command| command.tool_name() == "ffprobe")
            .returning(|_| probe_ok(WAV_PROBE));
        runner
            .expect_run()
            .withf(|command| {
                command.tool_name() == "ffmpeg"
                    && command.args.ends_with(&["-f".to_string(), "ogg".to_string(), "-".to_string()])
            })
            .times(1)
            .returning(|_| {
                Ok(ProcessResult {
                    exit_code: 0,
                    stdout: b"OggS".to_vec(),
                    stderr: String::new(),
                })
            });

        let workflow = Workflow::with_runner(Config::default(), PresetStore::default(), Arc::new(runner));
        let mut options = OptionSet::new();
        options.set_value(OptionKey::Input, &input.path().to_string_lossy()).unwrap();
        options.set_value(OptionKey::Output, &output.path().to_string_lossy()).unwrap();
        options.set_value(OptionKey::Format, "ogg").unwrap();

        let outcome = workflow.apply(&options).await.unwrap();
        assert_eq!(outcome.format, "ogg");
        assert_eq!(std::fs::read(output.path()).unwrap(), b"OggS");
    }

    #[tokio::test]
    async fn test_missing_preset_spawns_nothing() {
        let temp = TempDir::new().unwrap();
        let input = temp.child("song.wav");
        input.write_binary(b"RIFF").unwrap();

        let mut runner = MockProcessRunner::new();
        runner.expect_run().times(0);

        let workflow = Workflow::with_runner(Config::default(), PresetStore::default(), Arc::new(runner));
        let mut options = OptionSet::new();
        options.set_value(OptionKey::Input, &input.path().to_string_lossy()).unwrap();
        options.set_value(OptionKey::Preset, "nightcore").unwrap();

        let err = workflow.apply(&options).await.unwrap_err();
        assert!(matches!(err, ResonateError::PresetNotFound(_)));
    }

    #[tokio::test]
    async fn test_missing_input_spawns_nothing() {
        let temp = TempDir::new().unwrap();
        let mut runner = MockProcessRunner::new();
        runner.expect_run().times(0);

        let workflow = Workflow::with_runner(Config::default(), PresetStore::default(), Arc::new(runner));
        let mut options = OptionSet::new();
        options
            .set_value(OptionKey::Input, &temp.child("nope.mp3").path().to_string_lossy())
            .unwrap();

        let err = workflow.apply(&options).await.unwrap_err();
        assert!(matches!(err, ResonateError::InputNotFound(_)));

        // Directories are not readable inputs either
        options.set_value(OptionKey::Input, &temp.path().to_string_lossy()).unwrap();
        let err = workflow.apply(&options).await.unwrap_err();
        assert!(matches!(err, ResonateError::InputNotFound(_)));
    }

    #[tokio::test]
    async fn test_probe_failure_skips_transcode() {
        let temp = TempDir::new().unwrap();
        let input = temp.child("song.wav");
        input.write_binary(b"RIFF").unwrap();

        let mut runner = MockProcessRunner::new();
        runner
            .expect_run()
            .withf(|command| command.tool_name() == "ffprobe")
            .times(1)
            .returning(|_| probe_ok("this is not json"));
        runner
            .expect_run()
            .withf(|command| command.tool_name() == "ffmpeg")
            .times(0);

        let workflow = Workflow::with_runner(
            config_with_output(temp.path()),
            PresetStore::default(),
            Arc::new(runner),
        );
        let mut options = OptionSet::new();
        options.set_value(OptionKey::Input, &input.path().to_string_lossy()).unwrap();

        let err = workflow.apply(&options).await.unwrap_err();
        assert!(matches!(err, ResonateError::MalformedProbeOutput(_)));
    }

    #[tokio::test]
    async fn test_transcode_failure_leaves_no_output() {
        let temp = TempDir::new().unwrap();
        let input = temp.child("song.wav");
        input.write_binary(b"RIFF").unwrap();
        let out_dir = temp.child("out");
        out_dir.create_dir_all().unwrap();

        let mut runner = MockProcessRunner::new();
        runner
            .expect_run()
            .withf(|command| command.tool_name() == "ffprobe")
            .returning(|_| probe_ok(WAV_PROBE));
        runner
            .expect_run()
            .withf(|command| command.tool_name() == "ffmpeg")
            .returning(|_| {
                Err(ResonateError::ExternalTool {
                    tool: "ffmpeg".to_string(),
                    code: Some(1),
                    stderr: "Error initializing filters".to_string(),
                    timed_out: false,
                })
            });

        let workflow = Workflow::with_runner(
            config_with_output(out_dir.path()),
            PresetStore::default(),
            Arc::new(runner),
        );
        let mut options = OptionSet::new();
        options.set_value(OptionKey::Input, &input.path().to_string_lossy()).unwrap();

        let err = workflow.apply(&options).await.unwrap_err();
        assert_eq!(err.diagnostics(), Some("Error initializing filters"));
        assert_eq!(std::fs::read_dir(out_dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_plan_uses_configured_tool_paths() {
        let temp = TempDir::new().unwrap();
        let input = temp.child("song.wav");
        input.write_binary(b"RIFF").unwrap();

        let mut runner = MockProcessRunner::new();
        runner
            .expect_run()
            .withf(|command| command.program == PathBuf::from("/opt/bin/ffprobe"))
            .times(1)
            .returning(|_| probe_ok(WAV_PROBE));

        let mut config = config_with_output(temp.path());
        config.media.ffmpeg_path = PathBuf::from("/opt/bin/ffmpeg");
        config.media.ffprobe_path = PathBuf::from("/opt/bin/ffprobe");
        let workflow = Workflow::with_runner(config, PresetStore::default(), Arc::new(runner));

        let mut options = OptionSet::new();
        options.set_value(OptionKey::Input, &input.path().to_string_lossy()).unwrap();
        options.set_value(OptionKey::Volume, "50").unwrap();

        let plan = workflow.plan(&options).await.unwrap();
        assert_eq!(plan.command.program, PathBuf::from("/opt/bin/ffmpeg"));
        assert!(plan.command.args.contains(&"volume=0.5".to_string()));
        assert_eq!(plan.format, "wav");
    }

    #[test]
    fn test_write_atomically_replaces_existing_file() {
        let temp = TempDir::new().unwrap();
        let target = temp.child("out.mp3");
        target.write_binary(b"old").unwrap();

        write_atomically(target.path(), b"new").unwrap();
        assert_eq!(std::fs::read(target.path()).unwrap(), b"new");
        // Only the target remains; the temporary file was renamed into place
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_write_failure_is_an_output_error() {
        let temp = TempDir::new().unwrap();
        let blocker = temp.child("file");
        blocker.write_binary(b"x").unwrap();

        // Parent "directory" is a regular file
        let err = write_atomically(&blocker.path().join("out.mp3"), b"data").unwrap_err();
        assert!(matches!(err, ResonateError::OutputWrite { .. }));
    }

    #[test]
    fn test_collect_media_files() {
        let temp = TempDir::new().unwrap();
        temp.child("b.mp3").touch().unwrap();
        temp.child("a.FLAC").touch().unwrap();
        temp.child("notes.txt").touch().unwrap();
        temp.child("sub/c.wav").touch().unwrap();
        temp.child("out/old.wav").touch().unwrap();

        let out = temp.child("out");
        let files = collect_media_files(temp.path(), Some(out.path()));
        let names: Vec<String> = files
            .iter()
            .map(|f| f.strip_prefix(temp.path()).unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.FLAC", "b.mp3", "sub/c.wav"]);
    }

    #[tokio::test]
    async fn test_process_directory_collects_failures() {
        let temp = TempDir::new().unwrap();
        temp.child("music/good.wav").write_binary(b"RIFF").unwrap();
        temp.child("music/bad.wav").write_binary(b"RIFF").unwrap();
        let out_dir = temp.child("music/out");

        let mut runner = MockProcessRunner::new();
        runner
            .expect_run()
            .withf(|command| {
                command.tool_name() == "ffprobe"
                    && command.args.iter().any(|arg| arg.ends_with("bad.wav"))
            })
            .returning(|_| {
                Err(ResonateError::ExternalTool {
                    tool: "ffprobe".to_string(),
                    code: Some(1),
                    stderr: "Invalid data found when processing input".to_string(),
                    timed_out: false,
                })
            });
        runner
            .expect_run()
            .withf(|command| {
                command.tool_name() == "ffprobe"
                    && !command.args.iter().any(|arg| arg.ends_with("bad.wav"))
            })
            .returning(|_| probe_ok(WAV_PROBE));
        runner
            .expect_run()
            .withf(|command| command.tool_name() == "ffmpeg")
            .times(1)
            .returning(|_| {
                Ok(ProcessResult {
                    exit_code: 0,
                    stdout: b"done".to_vec(),
                    stderr: String::new(),
                })
            });

        let workflow = Workflow::with_runner(
            config_with_output(out_dir.path()),
            PresetStore::default(),
            Arc::new(runner),
        );

        let mut options = OptionSet::new();
        options.set_flag(OptionKey::Reverse, true).unwrap();

        let mut seen = Vec::new();
        let summary = workflow
            .process_directory(temp.child("music").path(), &options, |file, index, total| {
                seen.push((file.file_name().unwrap().to_string_lossy().to_string(), index, total));
            })
            .await
            .unwrap();

        assert_eq!(seen, vec![("bad.wav".to_string(), 0, 2), ("good.wav".to_string(), 1, 2)]);
        assert_eq!(summary.succeeded.len(), 1);
        assert_eq!(summary.failed.len(), 1);
        assert!(summary.failed[0].0.ends_with("bad.wav"));
        assert_eq!(std::fs::read(out_dir.child("good.wav").path()).unwrap(), b"done");
    }

    /// Runner whose ffmpeg "output" is the input path it was given
    fn echo_input_tools() -> MockProcessRunner {
        let mut runner = MockProcessRunner::new();
        runner
            .expect_run()
            .withf(|command| command.tool_name() == "ffprobe")
            .returning(|_| probe_ok(WAV_PROBE));
        runner
            .expect_run()
            .withf(|command| command.tool_name() == "ffmpeg")
            .returning(|command: ToolCommand| {
                Ok(ProcessResult {
                    exit_code: 0,
                    stdout: command.args[1].clone().into_bytes(),
                    stderr: String::new(),
                })
            });
        runner
    }

    #[tokio::test]
    async fn test_process_directory_keeps_same_stems_apart() {
        let temp = TempDir::new().unwrap();
        temp.child("music/a/song.wav").write_binary(b"RIFF").unwrap();
        temp.child("music/b/song.wav").write_binary(b"RIFF").unwrap();
        let out_dir = temp.child("out");

        let workflow = Workflow::with_runner(
            config_with_output(out_dir.path()),
            PresetStore::default(),
            Arc::new(echo_input_tools()),
        );

        let summary = workflow
            .process_directory(temp.child("music").path(), &OptionSet::new(), |_, _, _| {})
            .await
            .unwrap();

        assert_eq!(summary.succeeded.len(), 2);
        assert!(summary.failed.is_empty());
        let first = std::fs::read_to_string(out_dir.child("a/song.wav").path()).unwrap();
        let second = std::fs::read_to_string(out_dir.child("b/song.wav").path()).unwrap();
        assert!(first.ends_with("a/song.wav"), "{first}");
        assert!(second.ends_with("b/song.wav"), "{second}");
    }

    #[tokio::test]
    async fn test_process_directory_renames_same_stem_in_one_folder() {
        let temp = TempDir::new().unwrap();
        temp.child("music/a.flac").write_binary(b"fLaC").unwrap();
        temp.child("music/a.wav").write_binary(b"RIFF").unwrap();
        let out_dir = temp.child("out");

        let workflow = Workflow::with_runner(
            config_with_output(out_dir.path()),
            PresetStore::default(),
            Arc::new(echo_input_tools()),
        );
        let mut options = OptionSet::new();
        options.set_value(OptionKey::Format, "mp3").unwrap();

        let summary = workflow
            .process_directory(temp.child("music").path(), &options, |_, _, _| {})
            .await
            .unwrap();

        assert_eq!(summary.succeeded.len(), 2);
        assert_eq!(
            summary.succeeded[1].1,
            OutputTarget::File(out_dir.child("a-wav.mp3").path().to_path_buf())
        );
        let flac = std::fs::read_to_string(out_dir.child("a.mp3").path()).unwrap();
        let wav = std::fs::read_to_string(out_dir.child("a-wav.mp3").path()).unwrap();
        assert!(flac.ends_with("a.flac"));
        assert!(wav.ends_with("a.wav"));
    }

    #[test]
    fn test_batch_output_directory_mirrors_input_tree() {
        let root = Path::new("/music");
        assert_eq!(
            batch_output_directory(Path::new("out"), root, Path::new("/music/live/2019/song.flac")),
            PathBuf::from("out/live/2019")
        );
        assert_eq!(
            batch_output_directory(Path::new("out"), root, Path::new("/music/song.flac")),
            PathBuf::from("out")
        );
        assert_eq!(
            with_stem_suffix(Path::new("out/song.mp3"), "-flac"),
            PathBuf::from("out/song-flac.mp3")
        );
    }

    #[tokio::test]
    async fn test_dash_output_targets_stdout() {
        let temp = TempDir::new().unwrap();
        let input = temp.child("song.wav");
        input.write_binary(b"RIFF").unwrap();
        let out_dir = temp.child("out");
        out_dir.create_dir_all().unwrap();

        let workflow = Workflow::with_runner(
            config_with_output(out_dir.path()),
            PresetStore::default(),
            Arc::new(fake_tools(WAV_PROBE, b"")),
        );
        let mut options = OptionSet::new();
        options.set_value(OptionKey::Input, &input.path().to_string_lossy()).unwrap();
        options.set_value(OptionKey::Output, PIPE).unwrap();

        let plan = workflow.plan(&options).await.unwrap();
        assert_eq!(plan.output, OutputTarget::Stdout);
        assert_eq!(plan.command.args.last().map(String::as_str), Some(PIPE));

        let outcome = workflow.apply(&options).await.unwrap();
        assert_eq!(outcome.output, OutputTarget::Stdout);
        assert_eq!(outcome.states.last(), Some(&PipelineState::Done));
        assert_eq!(std::fs::read_dir(out_dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_piped_input_and_output() {
        let source = read_piped_input(&b"ID3 audio"[..]).await.unwrap();
        assert_eq!(source, MediaSource::Bytes(Arc::from(&b"ID3 audio"[..])));

        let err = read_piped_input(&b""[..]).await.unwrap_err();
        assert!(matches!(err, ResonateError::InputNotFound(ref path) if path == Path::new(PIPE)));

        let mut sink: Vec<u8> = Vec::new();
        write_piped_output(&mut sink, b"encoded").await.unwrap();
        assert_eq!(sink, b"encoded");
    }

    #[tokio::test]
    async fn test_process_directory_rejects_explicit_output() {
        let temp = TempDir::new().unwrap();
        let workflow = Workflow::with_runner(
            Config::default(),
            PresetStore::default(),
            Arc::new(MockProcessRunner::new()),
        );
        let mut options = OptionSet::new();
        options.set_value(OptionKey::Output, "x.mp3").unwrap();

        let result = workflow.process_directory(temp.path(), &options, |_, _, _| {}).await;
        assert!(matches!(result, Err(ResonateError::Config(_))));
    }
}
