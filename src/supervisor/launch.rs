//! Launch command construction for the dsd-fme capture process.
//!
//! The decoder is always run in DMR stereo mode against an RTL-SDR input.
//! Only the device index, frequency, and gain are configurable; ppm,
//! bandwidth, squelch, and volume are fixed constants in the input string.

use std::path::PathBuf;

use crate::config::{IngestConfig, RadioConfig};

/// Immutable launch parameters, derived once from configuration
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    /// Decoder binary
    pub program: String,
    /// Tuner frequency in MHz
    pub frequency: f64,
    /// Tuner gain
    pub gain: f64,
    /// RTL-SDR device index
    pub device_index: u32,
    /// Directory per-call wav files are written to (`-P -7`)
    pub staging_dir: PathBuf,
    /// Structured decode log (`-Q`)
    pub decode_log: PathBuf,
    /// Event log (`-J`)
    pub event_log: PathBuf,
    /// File the decoder's stderr is appended to
    pub stderr_log: PathBuf,
}

impl LaunchSpec {
    pub fn from_config(radio: &RadioConfig, ingest: &IngestConfig) -> Self {
        Self {
            program: radio.program.clone(),
            frequency: radio.frequency,
            gain: radio.gain,
            device_index: radio.device_index,
            staging_dir: ingest.staging_dir.clone(),
            decode_log: radio.decode_log.clone(),
            event_log: radio.event_log.clone(),
            stderr_log: radio.stderr_log.clone(),
        }
    }

    /// RTL-SDR input specification.
    ///
    /// Format: `rtl:dev:freq:gain:ppm:bw:sq:vol` with ppm=0, bandwidth=12,
    /// squelch=0, volume=3.
    pub fn rtl_input(&self) -> String {
        format!(
            "rtl:{}:{}M:{}:0:12:0:3",
            self.device_index, self.frequency, self.gain
        )
    }

    /// Full argument vector for the decoder.
    ///
    /// Equivalent to:
    /// `dsd-fme -fs -i rtl:... -P -7 <staging> -Q <log> -J <events> -a -t 1 -o null`
    pub fn command_args(&self) -> Vec<String> {
        vec![
            // DMR stereo mode
            "-fs".to_string(),
            "-i".to_string(),
            self.rtl_input(),
            // Per-call wav output directory
            "-P".to_string(),
            "-7".to_string(),
            self.staging_dir.display().to_string(),
            "-Q".to_string(),
            self.decode_log.display().to_string(),
            "-J".to_string(),
            self.event_log.display().to_string(),
            // Auto-detect frame type
            "-a".to_string(),
            // Frame timeout
            "-t".to_string(),
            "1".to_string(),
            // No audio output
            "-o".to_string(),
            "null".to_string(),
        ]
    }

    /// Render the full command line for logging
    pub fn render(&self) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.command_args());
        parts.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> LaunchSpec {
        LaunchSpec {
            program: "dsd-fme".to_string(),
            frequency: 461.375,
            gain: 32.0,
            device_index: 0,
            staging_dir: PathBuf::from("temp"),
            decode_log: PathBuf::from("dmr_log.jsonl"),
            event_log: PathBuf::from("events.txt"),
            stderr_log: PathBuf::from("dsd-fme.jsonl"),
        }
    }

    #[test]
    fn test_rtl_input_format() {
        assert_eq!(spec().rtl_input(), "rtl:0:461.375M:32:0:12:0:3");
    }

    #[test]
    fn test_rtl_input_device_index() {
        let mut s = spec();
        s.device_index = 2;
        s.gain = 49.6;
        assert_eq!(s.rtl_input(), "rtl:2:461.375M:49.6:0:12:0:3");
    }

    #[test]
    fn test_command_args() {
        let args = spec().command_args();
        assert_eq!(
            args,
            vec![
                "-fs",
                "-i",
                "rtl:0:461.375M:32:0:12:0:3",
                "-P",
                "-7",
                "temp",
                "-Q",
                "dmr_log.jsonl",
                "-J",
                "events.txt",
                "-a",
                "-t",
                "1",
                "-o",
                "null",
            ]
        );
    }

    #[test]
    fn test_render_starts_with_program() {
        let rendered = spec().render();
        assert!(rendered.starts_with("dsd-fme -fs -i rtl:"));
        assert!(rendered.ends_with("-o null"));
    }
}
