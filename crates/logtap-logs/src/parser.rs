use logtap_types::DEFAULT_LEVEL;

use crate::filter::FilterRules;

/// Extracts a level tag from captured lines
pub struct LogParser;

impl LogParser {
    /// Level for a captured line
    ///
    /// Structured lines report their own bracketed level. Other lines are
    /// scanned for common level markers; anything else is `INFO`.
    pub fn detect_level(line: &str, rules: &FilterRules) -> String {
        if let Some(level) = rules.structured_level(line) {
            return level.to_uppercase();
        }
        Self::extract_level_from_text(line)
            .unwrap_or(DEFAULT_LEVEL)
            .to_string()
    }

    /// Extract log level from plain text patterns
    fn extract_level_from_text(content: &str) -> Option<&'static str> {
        let upper = content.to_uppercase();

        // Check for bracketed patterns first [ERROR], [WARN], etc.
        let bracket_patterns = [
            ("[FATAL]", "FATAL"),
            ("[PANIC]", "FATAL"),
            ("[CRITICAL]", "FATAL"),
            ("[ERROR]", "ERROR"),
            ("[ERR]", "ERROR"),
            ("[WARN]", "WARN"),
            ("[WARNING]", "WARN"),
            ("[INFO]", "INFO"),
            ("[NOTICE]", "INFO"),
            ("[DEBUG]", "DEBUG"),
            ("[TRACE]", "TRACE"),
        ];

        for (pattern, level) in bracket_patterns {
            if upper.contains(pattern) {
                return Some(level);
            }
        }

        // Check for colon patterns: ERROR:, WARN:, etc.
        let colon_patterns = [
            ("FATAL:", "FATAL"),
            ("PANIC:", "FATAL"),
            ("ERROR:", "ERROR"),
            ("WARNING:", "WARN"),
            ("WARN:", "WARN"),
            ("INFO:", "INFO"),
            ("DEBUG:", "DEBUG"),
            ("TRACE:", "TRACE"),
        ];

        for (pattern, level) in colon_patterns {
            if upper.contains(pattern) {
                return Some(level);
            }
        }

        // Level as the first word
        let first_word = upper.split_whitespace().next().unwrap_or_default();
        match first_word {
            "FATAL" | "PANIC" => Some("FATAL"),
            "ERROR" | "ERR" => Some("ERROR"),
            "WARN" | "WARNING" => Some("WARN"),
            "INFO" => Some("INFO"),
            "DEBUG" => Some("DEBUG"),
            "TRACE" => Some("TRACE"),
            _ => None,
        }
    }
}
