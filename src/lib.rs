//! Resonate - audio effects for media files
//!
//! Resolves effect options (optionally defaulted by a preset), probes the
//! input with ffprobe, builds an ffmpeg audio filter chain and transcodes
//! the result to a file or stdout.

pub mod cli;
pub mod config;
pub mod error;
pub mod filters;
pub mod media;
pub mod options;
pub mod preset;
pub mod workflow;
