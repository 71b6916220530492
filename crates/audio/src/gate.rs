//! Wake-phrase prefix gate

/// Normalise transcribed text: strip punctuation, uppercase, collapse
/// runs of whitespace.
pub fn normalize(text: &str) -> String {
    let cleaned: String = text
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { ' ' })
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Requires a transcribed utterance to open with a configured wake
/// phrase before any command match is attempted.
pub struct PrefixGate {
    phrases: Vec<String>,
}

impl PrefixGate {
    pub fn new(phrases: &[String]) -> Self {
        Self {
            phrases: phrases.iter().map(|p| normalize(p)).collect(),
        }
    }

    /// Whether `normalized` opens with one of the wake phrases on a
    /// word boundary.
    pub fn check(&self, normalized: &str) -> bool {
        self.matched_phrase(normalized).is_some()
    }

    /// Remove the matched wake phrase; text without one is returned
    /// unchanged (the manual bypass path).
    pub fn strip(&self, normalized: &str) -> String {
        match self.matched_phrase(normalized) {
            Some(phrase) => normalized[phrase.len()..].trim_start().to_string(),
            None => normalized.to_string(),
        }
    }

    fn matched_phrase(&self, normalized: &str) -> Option<&str> {
        self.phrases
            .iter()
            .find(|phrase| {
                normalized.starts_with(phrase.as_str())
                    && normalized[phrase.len()..]
                        .chars()
                        .next()
                        .map_or(true, |c| c == ' ')
            })
            .map(|s| s.as_str())
    }
}
