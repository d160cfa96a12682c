use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables read from the optional YAML config file. Every section may be
/// omitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub merge: MergeConfig,
    pub reader: ReaderConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MergeConfig {
    #[serde(default = "default_merge_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Timeouts when every input is read once to its end
    #[serde(default = "default_batch_timeouts")]
    pub batch: FlushTimeouts,
    /// Timeouts when inputs are followed
    #[serde(default = "default_follow_timeouts")]
    pub follow: FlushTimeouts,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_merge_poll_interval(),
            queue_capacity: default_queue_capacity(),
            batch: default_batch_timeouts(),
            follow: default_follow_timeouts(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FlushTimeouts {
    #[serde(with = "humantime_serde")]
    pub inactivity_flush_timeout: Duration,
    /// `0s` disables force flushing
    #[serde(with = "humantime_serde")]
    pub force_flush_timeout: Duration,
}

fn default_merge_poll_interval() -> Duration {
    Duration::from_millis(250)
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_batch_timeouts() -> FlushTimeouts {
    FlushTimeouts {
        inactivity_flush_timeout: Duration::from_secs(1),
        force_flush_timeout: Duration::ZERO,
    }
}

fn default_follow_timeouts() -> FlushTimeouts {
    FlushTimeouts {
        inactivity_flush_timeout: Duration::from_millis(750),
        force_flush_timeout: Duration::from_secs(2),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReaderConfig {
    #[serde(default = "default_reader_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_reader_poll_interval(),
        }
    }
}

fn default_reader_poll_interval() -> Duration {
    Duration::from_millis(100)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    #[serde(default = "default_who_width")]
    pub who_width: usize,
    #[serde(default)]
    pub color: ColorMode,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            who_width: default_who_width(),
            color: ColorMode::default(),
        }
    }
}

fn default_who_width() -> usize {
    45
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ColorMode {
    /// Colour when writing to a terminal on stdout
    #[default]
    On,
    Off,
    Always,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// Merge all inputs into one time-ordered output
    Single,
    /// One formatted output per input file
    #[default]
    Per,
}
