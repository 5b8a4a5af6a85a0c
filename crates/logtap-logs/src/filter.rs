use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, LazyLock};

use parking_lot::{RwLock, RwLockReadGuard};
use regex::Regex;
use serde::Deserialize;

/// Tag that opens a structured log line
pub const DEFAULT_STRUCTURED_TAG: &str = "EP_LOG";

/// High-volume network, TLS and session chatter
pub const DEFAULT_NOISE_PATTERNS: &[&str] = &[
    "nw_connection",
    "nw_endpoint",
    "nw_path",
    "nw_protocol",
    "nw_socket",
    "boringssl",
    "tls handshake",
    "ssl_handshake",
    "quic_conn",
    "tcp_input",
    "tcp_output",
    "cfnetwork",
    "nsurlsession",
    "session task",
    "sec_trust",
    "connection reset by peer",
];

/// Levels whose tagged lines are dropped
pub const DEFAULT_LEVEL_BLACKLIST: &[&str] = &["debug", "verbose", "trace"];

/// Punctuation that does not count towards the garbage heuristic
const ALLOWED_PUNCTUATION: &[char] = &[
    '.', ',', ':', ';', '!', '?', '-', '_', '(', ')', '[', ']', '{', '}', '\'', '"', '/', '\\',
    '@', '#', '%', '&', '*', '+', '=', '<', '>', '|', '$', '~',
];

/// Timestamp and bracketed level that follow the structured tag
static STRUCTURED_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^ - \d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}\.\d{4} - \[([A-Za-z]+)\]")
        .expect("structured log pattern is valid")
});

/// Filter settings as read from configuration
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub structured_tag: String,
    pub noise_patterns: Vec<String>,
    pub level_blacklist: Vec<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            structured_tag: DEFAULT_STRUCTURED_TAG.to_string(),
            noise_patterns: DEFAULT_NOISE_PATTERNS.iter().map(|p| p.to_string()).collect(),
            level_blacklist: DEFAULT_LEVEL_BLACKLIST.iter().map(|l| l.to_string()).collect(),
        }
    }
}

/// Pattern and level sets the filter rules read
#[derive(Clone, Debug)]
pub struct FilterRules {
    structured_tag: String,
    patterns: BTreeSet<String>,
    levels: BTreeSet<String>,
}

impl FilterRules {
    pub fn new(config: &FilterConfig) -> Self {
        let mut rules = Self {
            structured_tag: config.structured_tag.clone(),
            patterns: BTreeSet::new(),
            levels: BTreeSet::new(),
        };
        for pattern in &config.noise_patterns {
            rules.add_pattern(pattern);
        }
        for level in &config.level_blacklist {
            rules.add_level(level);
        }
        rules
    }

    /// Add a noise substring. Returns false for empty or duplicate patterns.
    pub fn add_pattern(&mut self, pattern: &str) -> bool {
        match normalize(pattern) {
            Some(p) => self.patterns.insert(p),
            None => false,
        }
    }

    pub fn remove_pattern(&mut self, pattern: &str) -> bool {
        normalize(pattern).is_some_and(|p| self.patterns.remove(&p))
    }

    pub fn patterns(&self) -> Vec<String> {
        self.patterns.iter().cloned().collect()
    }

    /// Add a blacklisted level name (matched as `[name]` or `name:`)
    pub fn add_level(&mut self, level: &str) -> bool {
        match normalize(level) {
            Some(l) => self.levels.insert(l),
            None => false,
        }
    }

    pub fn remove_level(&mut self, level: &str) -> bool {
        normalize(level).is_some_and(|l| self.levels.remove(&l))
    }

    pub fn levels(&self) -> Vec<String> {
        self.levels.iter().cloned().collect()
    }

    /// Bracketed level of a structured line, or None if the line is not structured
    pub fn structured_level<'a>(&self, line: &'a str) -> Option<&'a str> {
        if self.structured_tag.is_empty() {
            return None;
        }
        line.match_indices(self.structured_tag.as_str())
            .find_map(|(idx, tag)| {
                STRUCTURED_SUFFIX
                    .captures(&line[idx + tag.len()..])
                    .and_then(|caps| caps.get(1))
            })
            .map(|m| m.as_str())
    }

    pub fn is_structured(&self, line: &str) -> bool {
        self.structured_level(line).is_some()
    }
}

impl Default for FilterRules {
    fn default() -> Self {
        Self::new(&FilterConfig::default())
    }
}

fn normalize(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_lowercase())
    }
}

// ============================================================================
// Rules
// ============================================================================

/// A single filter rule, listed in evaluation order
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rule {
    Blank,
    Structured,
    NoisePattern,
    LevelBlacklist,
    SpecialCharacters,
    TooShort,
    AllDigits,
    Repetitive,
    /// No rule fired
    Fallthrough,
}

impl Rule {
    const ORDER: [Rule; 8] = [
        Rule::Blank,
        Rule::Structured,
        Rule::NoisePattern,
        Rule::LevelBlacklist,
        Rule::SpecialCharacters,
        Rule::TooShort,
        Rule::AllDigits,
        Rule::Repetitive,
    ];

    fn check(self, line: &Candidate<'_>, rules: &FilterRules) -> Option<Verdict> {
        let fired = match self {
            Rule::Blank => line.text.is_empty(),
            Rule::Structured => {
                return rules
                    .is_structured(line.text)
                    .then_some(Verdict::Accept(self));
            }
            Rule::NoisePattern => rules.patterns.iter().any(|p| line.lower.contains(p.as_str())),
            Rule::LevelBlacklist => rules.levels.iter().any(|level| {
                line.lower.contains(&format!("[{level}]"))
                    || line.lower.contains(&format!("{level}:"))
            }),
            Rule::SpecialCharacters => {
                let special = line
                    .text
                    .chars()
                    .filter(|c| {
                        !(c.is_alphanumeric()
                            || c.is_whitespace()
                            || ALLOWED_PUNCTUATION.contains(c))
                    })
                    .count();
                special * 2 > line.char_count
            }
            Rule::TooShort => line.char_count < 3,
            Rule::AllDigits => line.text.chars().all(|c| c.is_ascii_digit()),
            Rule::Repetitive => {
                line.char_count > 10 && line.text.chars().collect::<HashSet<_>>().len() <= 2
            }
            Rule::Fallthrough => false,
        };
        fired.then_some(Verdict::Reject(self))
    }
}

/// Outcome of running a line through the rules
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    Accept(Rule),
    Reject(Rule),
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Accept(_))
    }

    /// The rule that decided the outcome
    pub fn rule(&self) -> Rule {
        match self {
            Verdict::Accept(rule) | Verdict::Reject(rule) => *rule,
        }
    }
}

struct Candidate<'a> {
    text: &'a str,
    lower: String,
    char_count: usize,
}

/// Run a line through every rule in order; the first rule that fires decides
pub fn evaluate(line: &str, rules: &FilterRules) -> Verdict {
    let text = line.trim();
    let candidate = Candidate {
        text,
        lower: text.to_lowercase(),
        char_count: text.chars().count(),
    };

    Rule::ORDER
        .iter()
        .find_map(|rule| rule.check(&candidate, rules))
        .unwrap_or(Verdict::Accept(Rule::Fallthrough))
}

// ============================================================================
// Shared handle
// ============================================================================

/// Cloneable filter handle shared between the capture thread and its owner
///
/// Writers take the lock only for the duration of a set mutation; a check
/// racing with a mutation sees either the old or the new set.
#[derive(Clone, Debug, Default)]
pub struct LogFilter {
    rules: Arc<RwLock<FilterRules>>,
}

impl LogFilter {
    pub fn new(rules: FilterRules) -> Self {
        Self {
            rules: Arc::new(RwLock::new(rules)),
        }
    }

    pub fn from_config(config: &FilterConfig) -> Self {
        Self::new(FilterRules::new(config))
    }

    /// Whether the line should be kept
    pub fn accepts(&self, line: &str) -> bool {
        self.verdict(line).is_accepted()
    }

    pub fn verdict(&self, line: &str) -> Verdict {
        evaluate(line, &self.rules.read())
    }

    /// Hold the rules for several checks against one consistent view
    pub fn read(&self) -> RwLockReadGuard<'_, FilterRules> {
        self.rules.read()
    }

    pub fn add_pattern(&self, pattern: &str) -> bool {
        self.rules.write().add_pattern(pattern)
    }

    pub fn remove_pattern(&self, pattern: &str) -> bool {
        self.rules.write().remove_pattern(pattern)
    }

    pub fn list_patterns(&self) -> Vec<String> {
        self.rules.read().patterns()
    }

    pub fn add_level(&self, level: &str) -> bool {
        self.rules.write().add_level(level)
    }

    pub fn remove_level(&self, level: &str) -> bool {
        self.rules.write().remove_level(level)
    }

    pub fn list_levels(&self) -> Vec<String> {
        self.rules.read().levels()
    }
}
