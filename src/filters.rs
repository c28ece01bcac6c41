//! Filter-chain assembly.
//!
//! Translates effective options into the ordered list of ffmpeg audio filter
//! expressions plus the encoder flags that accompany them. Filters are applied
//! sequentially by ffmpeg, so the order of the filter table is significant and is the
//! only order in which expressions are ever emitted.

use crate::options::{EffectiveOptions, OptionKey};

/// Speed factor of the nightcore shortcut
pub const NIGHTCORE_RATE: &str = "1.25";
/// Speed factor of the slowed shortcut
pub const SLOWED_RATE: &str = "0.9";

/// Shape of the expression a transformation renders to
#[derive(Debug, Clone, Copy)]
enum Expr {
    /// `asetrate={sr}*{value}`
    ScaleRate,
    /// `asetrate={sr}*{factor}`, optionally followed by `aresample={sr}`
    FixedRate { factor: &'static str, resample: bool },
    /// `{name}={value / divisor}`
    Scaled { name: &'static str, divisor: f64 },
    /// `{prefix}{value}`
    Param { prefix: &'static str },
    /// Parameterless filter
    Bare(&'static str),
    /// Caller-supplied expression appended as-is
    Verbatim,
}

#[derive(Debug, Clone, Copy)]
struct FilterRule {
    key: OptionKey,
    expr: Expr,
}

const FILTER_TABLE: [FilterRule; 14] = [
    FilterRule { key: OptionKey::Pitch, expr: Expr::ScaleRate },
    FilterRule { key: OptionKey::Volume, expr: Expr::Scaled { name: "volume", divisor: 100.0 } },
    FilterRule {
        key: OptionKey::Nightcore,
        expr: Expr::FixedRate { factor: NIGHTCORE_RATE, resample: true },
    },
    FilterRule {
        key: OptionKey::Slowed,
        expr: Expr::FixedRate { factor: SLOWED_RATE, resample: false },
    },
    FilterRule { key: OptionKey::Bass, expr: Expr::Param { prefix: "bass=g=" } },
    FilterRule { key: OptionKey::Tempo, expr: Expr::Param { prefix: "atempo=" } },
    FilterRule { key: OptionKey::Reverse, expr: Expr::Bare("areverse") },
    FilterRule { key: OptionKey::Highpass, expr: Expr::Param { prefix: "highpass=f=" } },
    FilterRule { key: OptionKey::Lowpass, expr: Expr::Param { prefix: "lowpass=f=" } },
    FilterRule { key: OptionKey::Pulsate, expr: Expr::Param { prefix: "apulsator=hz=" } },
    FilterRule { key: OptionKey::NoiseReduction, expr: Expr::Bare("afftdn") },
    FilterRule { key: OptionKey::Flanger, expr: Expr::Bare("flanger") },
    FilterRule { key: OptionKey::Phaser, expr: Expr::Bare("aphaser") },
    FilterRule { key: OptionKey::RawAudioFilters, expr: Expr::Verbatim },
];

/// Encoder flags in emission order
const ENCODER_FLAGS: [(OptionKey, &str); 3] = [
    (OptionKey::Bitrate, "-b:a"),
    (OptionKey::Codec, "-c:a"),
    (OptionKey::Format, "-f"),
];

/// Decimal places kept when a value is divided before rendering
const SCALED_PRECISION: f64 = 1e9;

/// Render a number in its shortest round-trip decimal form (`2`, `0.5`, `1.25`).
pub fn format_number(value: f64) -> String {
    format!("{}", value)
}

/// Render `value / divisor`, rounded so that binary division noise does not
/// leak into the expression (`12.3 / 100` is `0.123`, not `0.12300000000000001`).
pub fn format_scaled(value: f64, divisor: f64) -> String {
    format_number((value / divisor * SCALED_PRECISION).round() / SCALED_PRECISION)
}

impl FilterRule {
    fn render(&self, options: &EffectiveOptions<'_>, sample_rate: u32) -> Option<String> {
        match self.expr {
            Expr::ScaleRate => options
                .number(self.key)
                .map(|factor| format!("asetrate={}*{}", sample_rate, format_number(factor))),
            Expr::FixedRate { factor, resample } => {
                if !options.is_enabled(self.key) {
                    return None;
                }
                let rate = format!("asetrate={}*{}", sample_rate, factor);
                Some(if resample {
                    format!("{},aresample={}", rate, sample_rate)
                } else {
                    rate
                })
            }
            Expr::Scaled { name, divisor } => options
                .number(self.key)
                .map(|value| format!("{}={}", name, format_scaled(value, divisor))),
            Expr::Param { prefix } => options
                .number(self.key)
                .map(|value| format!("{}{}", prefix, format_number(value))),
            Expr::Bare(name) => options.is_enabled(self.key).then(|| name.to_string()),
            Expr::Verbatim => options
                .value(self.key)
                .filter(|raw| !raw.trim().is_empty())
                .map(str::to_string),
        }
    }
}

/// Ordered filter expressions plus ancillary encoder flag pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterChain {
    filters: Vec<String>,
    encoder_flags: Vec<(String, String)>,
}

impl FilterChain {
    /// Build the chain for the given options and input sample rate.
    ///
    /// Pure: the same options and sample rate always yield the same chain.
    /// `nightcore` and `pitch` are independent and compound when both are set.
    pub fn build(options: &EffectiveOptions<'_>, sample_rate: u32) -> Self {
        let filters = FILTER_TABLE
            .iter()
            .filter_map(|rule| rule.render(options, sample_rate))
            .collect();

        let encoder_flags = ENCODER_FLAGS
            .iter()
            .filter_map(|(key, flag)| {
                options
                    .value(*key)
                    .map(|value| (flag.to_string(), value.to_string()))
            })
            .collect();

        Self {
            filters,
            encoder_flags,
        }
    }

    pub fn filters(&self) -> &[String] {
        &self.filters
    }

    pub fn encoder_flags(&self) -> &[(String, String)] {
        &self.encoder_flags
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty() && self.encoder_flags.is_empty()
    }

    /// The comma-joined `-af` argument, if any filter is present
    pub fn filter_expression(&self) -> Option<String> {
        if self.filters.is_empty() {
            None
        } else {
            Some(self.filters.join(","))
        }
    }

    /// Requested output format, when set explicitly
    pub fn format(&self) -> Option<&str> {
        self.encoder_flags
            .iter()
            .find(|(flag, _)| flag == "-f")
            .map(|(_, value)| value.as_str())
    }

    /// ffmpeg arguments for this chain: `-af` followed by encoder flag pairs
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(expression) = self.filter_expression() {
            args.push("-af".to_string());
            args.push(expression);
        }
        for (flag, value) in &self.encoder_flags {
            args.push(flag.clone());
            args.push(value.clone());
        }
        args
    }

    /// One-line human readable summary
    pub fn describe(&self) -> String {
        if self.is_empty() {
            return "no filters".to_string();
        }
        let mut parts = Vec::new();
        if let Some(expression) = self.filter_expression() {
            parts.push(format!("filters [{}]", expression));
        }
        for (flag, value) in &self.encoder_flags {
            parts.push(format!("{} {}", flag, value));
        }
        parts.join(", ")
    }
}
