use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Marker used by ffmpeg/ffprobe for stdin input and stdout output
pub const PIPE: &str = "-";

/// An external tool invocation: program, discrete argument vector, optional
/// bytes for the child's stdin and an optional deadline.
///
/// Arguments are never passed through a shell.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub stdin: Option<Arc<[u8]>>,
    pub timeout: Option<Duration>,
    pub description: String,
}

impl ToolCommand {
    /// Create a new tool command
    pub fn new<P: Into<PathBuf>, S: Into<String>>(program: P, description: S) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
            timeout: None,
            description: description.into(),
        }
    }

    /// Add an argument
    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(|s| s.into()));
        self
    }

    /// Add input file
    pub fn input<P: AsRef<Path>>(self, path: P) -> Self {
        self.arg("-i").arg(path.as_ref().to_string_lossy().to_string())
    }

    /// Read input from stdin, feeding it the given bytes
    pub fn input_bytes(mut self, bytes: Arc<[u8]>) -> Self {
        self.stdin = Some(bytes);
        self.arg("-i").arg(PIPE)
    }

    /// Add output file
    pub fn output<P: AsRef<Path>>(self, path: P) -> Self {
        self.arg(path.as_ref().to_string_lossy().to_string())
    }

    /// Write output to stdout
    pub fn output_pipe(self) -> Self {
        self.arg(PIPE)
    }

    /// Set audio filter graph
    pub fn audio_filter<S: Into<String>>(self, filter: S) -> Self {
        self.arg("-af").arg(filter)
    }

    /// Set output container format
    pub fn format<S: Into<String>>(self, format: S) -> Self {
        self.arg("-f").arg(format)
    }

    /// Limit how long the process may run
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Short tool name for messages (file name of the program)
    pub fn tool_name(&self) -> String {
        self.program
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.display().to_string())
    }

    /// Drop repeated flags (with their value) and repeated bare tokens,
    /// keeping the first occurrence of each.
    pub fn dedup_flags(mut self) -> Self {
        self.args = dedup_flag_pairs(&self.args);
        self
    }

    /// Command line for display purposes
    pub fn display_line(&self) -> String {
        let mut parts = vec![self.program.display().to_string()];
        parts.extend(self.args.iter().map(|arg| {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                format!("'{}'", arg)
            } else {
                arg.clone()
            }
        }));
        parts.join(" ")
    }
}

fn is_flag(token: &str) -> bool {
    token.len() > 1 && token.starts_with('-')
}

/// De-duplicate an argument vector while preserving first-occurrence order.
///
/// A flag followed by a non-flag token is a pair and is compared by flag name
/// only, so `-f mp3 ... -f wav` keeps `-f mp3`. Other tokens are compared by
/// value. Values are never compared across different flags: `-c:a mp3 -f mp3`
/// stays intact.
pub fn dedup_flag_pairs(args: &[String]) -> Vec<String> {
    let mut seen_flags: HashSet<&str> = HashSet::new();
    let mut seen_tokens: HashSet<&str> = HashSet::new();
    let mut result = Vec::with_capacity(args.len());

    let mut i = 0;
    while i < args.len() {
        let token = args[i].as_str();
        let value = args.get(i + 1).filter(|next| !is_flag(next));

        if is_flag(token) {
            let width = if value.is_some() { 2 } else { 1 };
            if seen_flags.insert(token) {
                result.extend(args[i..i + width].iter().cloned());
            }
            i += width;
        } else {
            if seen_tokens.insert(token) {
                result.push(token.to_string());
            }
            i += 1;
        }
    }

    result
}
