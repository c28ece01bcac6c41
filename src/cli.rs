use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

use crate::error::Result;
use crate::options::{OptionKey, OptionSet};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Path to the ffmpeg binary
    #[arg(long, visible_alias = "ffmpeg", global = true)]
    pub ffmpeg_path: Option<PathBuf>,

    /// Path to the ffprobe binary
    #[arg(long, visible_alias = "ffprobe", global = true)]
    pub ffprobe_path: Option<PathBuf>,

    /// Kill ffmpeg/ffprobe after this many seconds
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    /// Preset file (TOML)
    #[arg(long, global = true)]
    pub presets: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Apply audio effects to a single file
    Apply {
        /// Input media file, or - to read stdin
        #[arg(short, long)]
        input: String,

        /// Output file, or - to write stdout (derived from the input when omitted)
        #[arg(short, long)]
        output: Option<String>,

        /// Print the ffmpeg command instead of running it
        #[arg(long)]
        dry_run: bool,

        #[command(flatten)]
        effects: EffectArgs,
    },

    /// Apply the same effects to every media file in a directory
    Batch {
        /// Input directory containing media files
        #[arg(short, long)]
        input_dir: PathBuf,

        /// Output directory for processed files
        #[arg(long)]
        output_dir: Option<PathBuf>,

        #[command(flatten)]
        effects: EffectArgs,
    },

    /// Show the sample rate and container formats of a file
    Probe {
        /// Input media file
        #[arg(short, long)]
        input: PathBuf,
    },

    /// List presets from the preset file
    Presets,

    /// Check that ffmpeg and ffprobe can be run
    Check,

    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Write a configuration file with default values
    Init {
        /// Where to write the file
        #[arg(short, long, default_value = "resonate.toml")]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Effect, encoder and preset options shared by `apply` and `batch`
#[derive(ClapArgs, Debug, Default, Clone)]
pub struct EffectArgs {
    /// Speed up and raise the pitch (rate x1.25)
    #[arg(short, long, visible_aliases = ["speed", "spedup"])]
    pub nightcore: bool,

    /// Slow down and lower the pitch (rate x0.9)
    #[arg(long)]
    pub slowed: bool,

    /// Play the audio backwards
    #[arg(long)]
    pub reverse: bool,

    /// FFT based noise reduction
    #[arg(long)]
    pub noise_reduction: bool,

    /// Flanger effect
    #[arg(long)]
    pub flanger: bool,

    /// Phaser effect
    #[arg(long)]
    pub phaser: bool,

    /// Multiply the sample rate (changes pitch and speed)
    #[arg(long, allow_negative_numbers = true)]
    pub pitch: Option<String>,

    /// Bass gain in dB
    #[arg(long, allow_negative_numbers = true)]
    pub bass: Option<String>,

    /// Tempo factor without changing pitch
    #[arg(long, allow_negative_numbers = true)]
    pub tempo: Option<String>,

    /// Pulsator frequency in Hz
    #[arg(long, allow_negative_numbers = true)]
    pub pulsate: Option<String>,

    /// High-pass cutoff in Hz
    #[arg(long, allow_negative_numbers = true)]
    pub highpass: Option<String>,

    /// Low-pass cutoff in Hz
    #[arg(long, allow_negative_numbers = true)]
    pub lowpass: Option<String>,

    /// Volume in percent (100 = unchanged)
    #[arg(long, visible_alias = "vol", allow_negative_numbers = true)]
    pub volume: Option<String>,

    /// Extra ffmpeg audio filters appended verbatim
    #[arg(long, visible_aliases = ["audio-filters", "af"], allow_hyphen_values = true)]
    pub raw_audio_filters: Option<String>,

    /// Audio bitrate (e.g. 192k)
    #[arg(short, long)]
    pub bitrate: Option<String>,

    /// Audio codec (e.g. libmp3lame)
    #[arg(short, long)]
    pub codec: Option<String>,

    /// Output container format (e.g. mp3)
    #[arg(short, long)]
    pub format: Option<String>,

    /// Preset id or name providing defaults
    #[arg(short, long)]
    pub preset: Option<String>,
}

impl EffectArgs {
    /// Collect the given options. Absent flags are left unset so a preset
    /// can still enable them.
    pub fn to_option_set(&self) -> Result<OptionSet> {
        let mut options = OptionSet::new();

        for (key, enabled) in [
            (OptionKey::Nightcore, self.nightcore),
            (OptionKey::Slowed, self.slowed),
            (OptionKey::Reverse, self.reverse),
            (OptionKey::NoiseReduction, self.noise_reduction),
            (OptionKey::Flanger, self.flanger),
            (OptionKey::Phaser, self.phaser),
        ] {
            if enabled {
                options.set_flag(key, true)?;
            }
        }

        for (key, value) in [
            (OptionKey::Pitch, &self.pitch),
            (OptionKey::Bass, &self.bass),
            (OptionKey::Tempo, &self.tempo),
            (OptionKey::Pulsate, &self.pulsate),
            (OptionKey::Highpass, &self.highpass),
            (OptionKey::Lowpass, &self.lowpass),
            (OptionKey::Volume, &self.volume),
            (OptionKey::RawAudioFilters, &self.raw_audio_filters),
            (OptionKey::Bitrate, &self.bitrate),
            (OptionKey::Codec, &self.codec),
            (OptionKey::Format, &self.format),
            (OptionKey::Preset, &self.preset),
        ] {
            if let Some(value) = value {
                options.set_value(key, value)?;
            }
        }

        Ok(options)
    }
}
