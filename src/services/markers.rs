//! Package-manager output interpretation.
//!
//! The package manager has no structured progress API, so progress and
//! outcome are read from its output. Each rule lists substrings that must
//! all occur somewhere in a line; rules are tried in order and the first
//! match wins, which lets the more specific "... done" rules shadow their
//! bare counterparts.

use crate::services::process::{LineControl, LineSink};

/// Sentinel appended after a package-manager install
pub const INSTALL_SENTINEL: &str = "Conda Install Complete";
/// Sentinel appended after a package-manager removal
pub const REMOVE_SENTINEL: &str = "Conda Remove Complete";

/// Outcome implied by a matched line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerOutcome {
    AlreadyInstalled,
    Conflict,
    NotFound,
    ToolError,
}

impl MarkerOutcome {
    pub fn describe(&self) -> &'static str {
        match self {
            MarkerOutcome::AlreadyInstalled => "package already installed",
            MarkerOutcome::Conflict => "package conflicts found",
            MarkerOutcome::NotFound => "package not found",
            MarkerOutcome::ToolError => "package manager error",
        }
    }
}

/// One line-matching rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkerRule {
    pub required: &'static [&'static str],
    pub notification: Option<&'static str>,
    pub outcome: Option<MarkerOutcome>,
    pub terminal: bool,
}

impl MarkerRule {
    pub fn matches(&self, line: &str) -> bool {
        !self.required.is_empty() && self.required.iter().all(|needle| line.contains(needle))
    }
}

const fn progress(required: &'static [&'static str], text: &'static str) -> MarkerRule {
    MarkerRule {
        required,
        notification: Some(text),
        outcome: None,
        terminal: false,
    }
}

const fn outcome(
    required: &'static [&'static str],
    text: &'static str,
    outcome: MarkerOutcome,
) -> MarkerRule {
    MarkerRule {
        required,
        notification: Some(text),
        outcome: Some(outcome),
        terminal: false,
    }
}

const fn sentinel(required: &'static [&'static str]) -> MarkerRule {
    MarkerRule {
        required,
        notification: None,
        outcome: None,
        terminal: true,
    }
}

pub const INSTALL_RULES: &[MarkerRule] = &[
    progress(&["Collecting package metadata"], "Collecting package metadata..."),
    progress(&["Solving environment", "done"], "Solving Environment: Done"),
    progress(&["Solving environment"], "Solving Environment..."),
    progress(&["Verifying transaction", "done"], "Verifying Transaction: Done"),
    progress(&["Executing transaction", "done"], "Executing Transaction: Done"),
    outcome(
        &["All requested packages already installed."],
        "Application package is already installed in this conda environment.",
        MarkerOutcome::AlreadyInstalled,
    ),
    progress(&["Found conflicts!"], "Looking for package conflicts..."),
    outcome(
        &["UnsatisfiableError"],
        "Package conflicts found. Installation aborted.",
        MarkerOutcome::Conflict,
    ),
    outcome(
        &["PackagesNotFoundError"],
        "Package not found in the requested channel.",
        MarkerOutcome::NotFound,
    ),
    outcome(
        &["CondaHTTPError"],
        "Could not reach the package channel.",
        MarkerOutcome::ToolError,
    ),
    outcome(
        &["CondaError:"],
        "The package manager reported an error. Check the install logs for details.",
        MarkerOutcome::ToolError,
    ),
    sentinel(&[INSTALL_SENTINEL]),
];

pub const REMOVE_RULES: &[MarkerRule] = &[
    progress(&["Collecting package metadata"], "Collecting package metadata..."),
    progress(&["Solving environment", "done"], "Solving Environment: Done"),
    progress(&["Verifying transaction", "done"], "Verifying Transaction: Done"),
    progress(&["Executing transaction", "done"], "Removing package: Done"),
    outcome(
        &["PackagesNotFoundError"],
        "Package not installed through the package manager.",
        MarkerOutcome::NotFound,
    ),
    sentinel(&[REMOVE_SENTINEL]),
];

/// First rule matching `line`
pub fn match_line<'a>(rules: &'a [MarkerRule], line: &str) -> Option<&'a MarkerRule> {
    rules.iter().find(|rule| rule.matches(line))
}

/// Accumulated interpretation of one package-manager run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarkerReport {
    pub notifications: Vec<&'static str>,
    pub outcome: Option<MarkerOutcome>,
    pub sentinel_seen: bool,
}

impl MarkerReport {
    /// Fold one line into the report; returns the matched rule, if any
    pub fn observe(&mut self, rules: &[MarkerRule], line: &str) -> Option<MarkerRule> {
        let rule = *match_line(rules, line)?;
        if let Some(text) = rule.notification {
            self.notifications.push(text);
        }
        if let Some(outcome) = rule.outcome {
            self.outcome.get_or_insert(outcome);
        }
        if rule.terminal {
            self.sentinel_seen = true;
        }
        Some(rule)
    }

    /// Sentinel output is authoritative; the exit code only decides when
    /// the sentinel never showed up
    pub fn succeeded(&self, exit_code: Option<i32>) -> bool {
        if self.outcome.is_some() {
            return false;
        }
        self.sentinel_seen || exit_code == Some(0)
    }
}

/// Line sink applying a rule table and forwarding every line and
/// notification to callbacks
pub struct MarkerSink<'r, L, N>
where
    L: FnMut(&str) + Send,
    N: FnMut(&str) + Send,
{
    rules: &'r [MarkerRule],
    report: MarkerReport,
    on_line: L,
    on_notification: N,
}

impl<'r, L, N> MarkerSink<'r, L, N>
where
    L: FnMut(&str) + Send,
    N: FnMut(&str) + Send,
{
    pub fn new(rules: &'r [MarkerRule], on_line: L, on_notification: N) -> Self {
        Self {
            rules,
            report: MarkerReport::default(),
            on_line,
            on_notification,
        }
    }

    pub fn into_report(self) -> MarkerReport {
        self.report
    }
}

impl<L, N> LineSink for MarkerSink<'_, L, N>
where
    L: FnMut(&str) + Send,
    N: FnMut(&str) + Send,
{
    fn on_line(&mut self, line: &str) -> LineControl {
        (self.on_line)(line);
        match self.report.observe(self.rules, line) {
            Some(rule) => {
                if let Some(text) = rule.notification {
                    (self.on_notification)(text);
                }
                if rule.terminal {
                    LineControl::Stop
                } else {
                    LineControl::Continue
                }
            }
            None => LineControl::Continue,
        }
    }
}
