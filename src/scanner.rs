//! Activity and usage scanning
//!
//! Classifies what an interactive program is doing purely from its rendered
//! screen text, and pulls cost and token figures out of status lines. Nothing
//! here knows which program is running; everything is pattern matching.
//!
//! Rules are ordered: an "awaiting input" cue wins over a "generating" cue,
//! so a confirmation prompt drawn under a stale spinner still reads as
//! waiting on the user.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, select, tick, Sender};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ScannerConfig;

/// What the program on a session appears to be doing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityState {
    #[default]
    Idle,
    Generating,
    AwaitingInput,
}

/// Last seen usage figures; `None` until first detected.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub cost_usd: Option<f64>,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
}

impl Usage {
    pub fn is_empty(&self) -> bool {
        self.cost_usd.is_none()
            && self.input_tokens.is_none()
            && self.output_tokens.is_none()
            && self.total_tokens.is_none()
    }

    /// Take every field `newer` knows; fields it lacks keep their old value.
    pub fn merge(&mut self, newer: &Usage) {
        if newer.cost_usd.is_some() {
            self.cost_usd = newer.cost_usd;
        }
        if newer.input_tokens.is_some() {
            self.input_tokens = newer.input_tokens;
        }
        if newer.output_tokens.is_some() {
            self.output_tokens = newer.output_tokens;
        }
        if newer.total_tokens.is_some() {
            self.total_tokens = newer.total_tokens;
        }
    }
}

/// Confirmation prompts and other cues that the program waits on the user.
pub const DEFAULT_AWAITING_PATTERNS: &[&str] = &[
    r"(?i)[(\[]\s*y(?:es)?\s*/\s*n(?:o)?\s*[)\]]",
    r"(?i)\bdo you want to\b",
    r"(?i)\bpress enter to (?:continue|confirm)",
    r"❯\s*1\.\s*Yes",
    r"(?i)\bwaiting for (?:your )?(?:approval|confirmation|input)\b",
];

/// Spinners and interrupt hints shown while output is being produced.
pub const DEFAULT_GENERATING_PATTERNS: &[&str] = &[
    r"(?i)\besc to interrupt\b",
    r"(?m)^\s*[·✻✽✶✳✢]\s+\S+…",
    r"[⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏]",
    r"(?i)\b(?:thinking|generating|working)(?:\.\.\.|…)",
];

static DEFAULT_AWAITING: Lazy<Vec<Regex>> = Lazy::new(|| {
    DEFAULT_AWAITING_PATTERNS
        .iter()
        .map(|p| Regex::new(p).unwrap())
        .collect()
});

static DEFAULT_GENERATING: Lazy<Vec<Regex>> = Lazy::new(|| {
    DEFAULT_GENERATING_PATTERNS
        .iter()
        .map(|p| Regex::new(p).unwrap())
        .collect()
});

/// Dollar cost such as `$0.42` or `$1,204.50`
static COST_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$(\d[\d,]*\.\d+)").unwrap());

/// `↑ 1.2k`, `input: 300`, `input tokens 4,096`
static INPUT_TOKENS_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:↑|\binput(?:\s+tokens)?:?)\s*(\d[\d,]*(?:\.\d+)?)\s*([km])?\b").unwrap()
});

/// `↓ 2.8k`, `output: 300`
static OUTPUT_TOKENS_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:↓|\boutput(?:\s+tokens)?:?)\s*(\d[\d,]*(?:\.\d+)?)\s*([km])?\b").unwrap()
});

/// `12.5k tokens`
static TOTAL_TOKENS_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\d[\d,]*(?:\.\d+)?)\s*([km])?\s+tokens\b").unwrap()
});

/// Compiled classification rules.
#[derive(Clone, Debug)]
pub struct PatternSet {
    awaiting: Vec<Regex>,
    generating: Vec<Regex>,
}

impl Default for PatternSet {
    fn default() -> Self {
        Self {
            awaiting: DEFAULT_AWAITING.clone(),
            generating: DEFAULT_GENERATING.clone(),
        }
    }
}

impl PatternSet {
    pub fn new<S: AsRef<str>>(awaiting: &[S], generating: &[S]) -> Result<Self, regex::Error> {
        Ok(Self {
            awaiting: compile(awaiting)?,
            generating: compile(generating)?,
        })
    }

    /// Configured lists replace the built-in ones; an empty list keeps the default.
    pub fn from_config(config: &ScannerConfig) -> Result<Self, regex::Error> {
        let awaiting = if config.awaiting_patterns.is_empty() {
            DEFAULT_AWAITING.clone()
        } else {
            compile(&config.awaiting_patterns)?
        };
        let generating = if config.generating_patterns.is_empty() {
            DEFAULT_GENERATING.clone()
        } else {
            compile(&config.generating_patterns)?
        };
        Ok(Self {
            awaiting,
            generating,
        })
    }

    pub fn classify(&self, text: &str) -> ActivityState {
        if self.awaiting.iter().any(|re| re.is_match(text)) {
            ActivityState::AwaitingInput
        } else if self.generating.iter().any(|re| re.is_match(text)) {
            ActivityState::Generating
        } else {
            ActivityState::Idle
        }
    }
}

fn compile<S: AsRef<str>>(patterns: &[S]) -> Result<Vec<Regex>, regex::Error> {
    patterns.iter().map(|p| Regex::new(p.as_ref())).collect()
}

/// Parse `2.8` + `k` into 2800.
fn parse_count(number: &str, suffix: Option<&str>) -> Option<u64> {
    let value: f64 = number.replace(',', "").parse().ok()?;
    let scale = match suffix.map(str::to_ascii_lowercase).as_deref() {
        Some("k") => 1_000.0,
        Some("m") => 1_000_000.0,
        _ => 1.0,
    };
    Some((value * scale).round() as u64)
}

fn last_count(pattern: &Regex, text: &str) -> Option<u64> {
    let caps = pattern.captures_iter(text).last()?;
    parse_count(caps.get(1)?.as_str(), caps.get(2).map(|m| m.as_str()))
}

/// Pull usage figures out of screen text. The last match of each kind wins.
pub fn extract_usage(text: &str) -> Usage {
    let cost_usd = COST_PATTERN
        .captures_iter(text)
        .last()
        .and_then(|caps| caps.get(1)?.as_str().replace(',', "").parse().ok());

    // "↓ 2.8k tokens" is an output count, not a total
    let total_tokens = TOTAL_TOKENS_PATTERN
        .captures_iter(text)
        .filter(|caps| {
            let start = caps.get(0).map_or(0, |m| m.start());
            let before = text[..start].trim_end().to_lowercase();
            !(before.ends_with('↑')
                || before.ends_with('↓')
                || before.ends_with("input")
                || before.ends_with("output")
                || before.ends_with("input:")
                || before.ends_with("output:"))
        })
        .last()
        .and_then(|caps| parse_count(caps.get(1)?.as_str(), caps.get(2).map(|m| m.as_str())));

    Usage {
        cost_usd,
        input_tokens: last_count(&INPUT_TOKENS_PATTERN, text),
        output_tokens: last_count(&OUTPUT_TOKENS_PATTERN, text),
        total_tokens,
    }
}

/// Current classification and usage for one session.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivityStatus {
    pub state: ActivityState,
    pub usage: Usage,
}

/// Per-session scan state.
#[derive(Debug, Default)]
pub struct ActivityTracker {
    status: ActivityStatus,
    finished: bool,
}

impl ActivityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> &ActivityStatus {
        &self.status
    }

    /// Scan one screen's text. Returns `(previous, current)` on a state
    /// transition; usage is updated either way.
    pub fn observe(&mut self, text: &str, patterns: &PatternSet) -> Option<(ActivityState, ActivityState)> {
        self.status.usage.merge(&extract_usage(text));

        let next = patterns.classify(text);
        if next == self.status.state {
            return None;
        }
        let previous = std::mem::replace(&mut self.status.state, next);
        Some((previous, next))
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Last scan once the program is gone: keep any final usage figures and
    /// settle on `Idle`. Later calls do nothing.
    pub fn finish(&mut self, text: &str) -> Option<(ActivityState, ActivityState)> {
        if self.finished {
            return None;
        }
        self.finished = true;
        self.status.usage.merge(&extract_usage(text));

        if self.status.state == ActivityState::Idle {
            return None;
        }
        let previous = std::mem::replace(&mut self.status.state, ActivityState::Idle);
        Some((previous, ActivityState::Idle))
    }
}

/// Background thread calling `tick` on a fixed interval until stopped.
pub struct Scanner {
    shutdown: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl Scanner {
    pub fn spawn<F>(interval: Duration, mut tick_fn: F) -> std::io::Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let ticker = tick(interval);
        let thread = thread::Builder::new()
            .name("activity-scanner".to_string())
            .spawn(move || {
                debug!(?interval, "activity scanner started");
                loop {
                    select! {
                        recv(ticker) -> _ => tick_fn(),
                        recv(shutdown_rx) -> _ => break,
                    }
                }
                debug!("activity scanner stopped");
            })?;

        Ok(Self {
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }

    /// Stop the thread and wait for an in-flight tick to finish.
    pub fn stop(&mut self) {
        // Dropping the sender wakes the select
        self.shutdown.take();
        if let Some(handle) = self.thread.take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for Scanner {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_classify_defaults() {
        let patterns = PatternSet::default();
        assert_eq!(patterns.classify("$ ls\nCargo.toml"), ActivityState::Idle);
        assert_eq!(
            patterns.classify("✢ Undulating… (3m 2s · ↓ 2.8k tokens · thinking)"),
            ActivityState::Generating
        );
        assert_eq!(
            patterns.classify("Overwrite file? (y/n)"),
            ActivityState::AwaitingInput
        );
        assert_eq!(
            patterns.classify("Do you want to make this edit?\n❯ 1. Yes\n  2. No"),
            ActivityState::AwaitingInput
        );
    }

    #[test]
    fn test_awaiting_wins_over_generating() {
        let patterns = PatternSet::default();
        let text = "· Working… (esc to interrupt)\nProceed? [Y/n]";
        assert_eq!(patterns.classify(text), ActivityState::AwaitingInput);
    }

    #[test]
    fn test_configured_patterns_replace_defaults() {
        let config = ScannerConfig {
            awaiting_patterns: vec!["READY>".to_string()],
            ..ScannerConfig::default()
        };
        let patterns = PatternSet::from_config(&config).unwrap();
        assert_eq!(patterns.classify("continue? (y/n)"), ActivityState::Idle);
        assert_eq!(patterns.classify("READY>"), ActivityState::AwaitingInput);
        // Generating list was left empty, so the defaults still apply
        assert_eq!(patterns.classify("esc to interrupt"), ActivityState::Generating);
    }

    #[test]
    fn test_invalid_pattern_is_an_error() {
        let config = ScannerConfig {
            generating_patterns: vec!["(unclosed".to_string()],
            ..ScannerConfig::default()
        };
        assert!(PatternSet::from_config(&config).is_err());
    }

    #[test]
    fn test_extract_usage() {
        let usage = extract_usage("Total cost: $0.13\n✢ Thinking… (12s · ↑ 1.5k · ↓ 2.8k tokens)\nlater $0.42");
        assert_eq!(usage.cost_usd, Some(0.42));
        assert_eq!(usage.input_tokens, Some(1_500));
        assert_eq!(usage.output_tokens, Some(2_800));
        assert_eq!(usage.total_tokens, None);

        let usage = extract_usage("Input tokens: 1,204  Output: 88\nContext: 45.2k tokens used");
        assert_eq!(usage.input_tokens, Some(1_204));
        assert_eq!(usage.output_tokens, Some(88));
        assert_eq!(usage.total_tokens, Some(45_200));
        assert_eq!(usage.cost_usd, None);

        assert!(extract_usage("nothing to see").is_empty());
    }

    #[test]
    fn test_cost_retained_when_missing_later() {
        let patterns = PatternSet::default();
        let mut tracker = ActivityTracker::new();

        tracker.observe("Session cost $0.42", &patterns);
        assert_eq!(tracker.status().usage.cost_usd, Some(0.42));

        tracker.observe("plain prompt", &patterns);
        assert_eq!(tracker.status().usage.cost_usd, Some(0.42));

        tracker.observe("Session cost $0.57", &patterns);
        assert_eq!(tracker.status().usage.cost_usd, Some(0.57));
    }

    #[test]
    fn test_only_transitions_are_reported() {
        let patterns = PatternSet::default();
        let mut tracker = ActivityTracker::new();

        assert_eq!(tracker.observe("idle prompt", &patterns), None);
        assert_eq!(
            tracker.observe("esc to interrupt", &patterns),
            Some((ActivityState::Idle, ActivityState::Generating))
        );
        assert_eq!(tracker.observe("still... esc to interrupt", &patterns), None);
        assert_eq!(
            tracker.observe("done", &patterns),
            Some((ActivityState::Generating, ActivityState::Idle))
        );
    }

    #[test]
    fn test_finish_settles_on_idle_once() {
        let patterns = PatternSet::default();
        let mut tracker = ActivityTracker::new();
        tracker.observe("✻ Pondering… (esc to interrupt)", &patterns);

        assert_eq!(
            tracker.finish("esc to interrupt\nTotal cost: $1.25"),
            Some((ActivityState::Generating, ActivityState::Idle))
        );
        assert!(tracker.is_finished());
        assert_eq!(tracker.status().state, ActivityState::Idle);
        assert_eq!(tracker.status().usage.cost_usd, Some(1.25));
        assert_eq!(tracker.finish("esc to interrupt"), None);

        let mut idle = ActivityTracker::new();
        assert_eq!(idle.finish("$ "), None);
    }

    #[test]
    fn test_scanner_ticks_until_stopped() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let mut scanner = Scanner::spawn(Duration::from_millis(10), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while count.load(Ordering::SeqCst) < 3 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        scanner.stop();
        let after_stop = count.load(Ordering::SeqCst);
        assert!(after_stop >= 3);

        thread::sleep(Duration::from_millis(50));
        assert_eq!(count.load(Ordering::SeqCst), after_stop);
    }
}
