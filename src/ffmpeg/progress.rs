//! `-progress` output parsing
//!
//! ffmpeg writes `key=value` lines; only the output timestamp and the final
//! `progress=end` marker matter here. Despite its name, `out_time_ms` is in
//! microseconds as well.

use std::time::Duration;

use super::ProgressFn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressEvent {
    OutTime(Duration),
    End,
}

pub fn parse_line(line: &str) -> Option<ProgressEvent> {
    let (key, value) = line.trim().split_once('=')?;
    match key {
        "out_time_us" | "out_time_ms" => value
            .trim()
            .parse::<u64>()
            .ok()
            .map(|us| ProgressEvent::OutTime(Duration::from_micros(us))),
        "progress" if value.trim() == "end" => Some(ProgressEvent::End),
        _ => None,
    }
}

/// Turns progress lines into percentages, reporting each value once
pub struct ProgressTracker {
    total: Option<Duration>,
    last: Option<u8>,
    callback: ProgressFn,
}

impl ProgressTracker {
    /// `total` is the input duration; without it only completion is reported
    pub fn new(total: Option<Duration>, callback: ProgressFn) -> Self {
        Self {
            total: total.filter(|d| !d.is_zero()),
            last: None,
            callback,
        }
    }

    pub fn feed(&mut self, line: &str) {
        let percent = match parse_line(line) {
            Some(ProgressEvent::End) => 100,
            Some(ProgressEvent::OutTime(t)) => match self.total {
                // 100 is reserved for the end marker
                Some(total) => ((t.as_secs_f64() / total.as_secs_f64()) * 100.0).clamp(0.0, 99.0) as u8,
                None => return,
            },
            None => return,
        };
        if self.last.map_or(true, |last| percent > last) {
            self.last = Some(percent);
            (self.callback)(percent);
        }
    }
}
