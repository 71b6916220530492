//! Intent vocabulary and fuzzy command matching
//!
//! A closed set of movement and pose intents. The matcher works on
//! normalised text: stop-words are filtered, adjacent tokens are also
//! tried joined ("hands up" -> "handsup"), exact hits on the first two
//! positions win outright, and anything else falls back to a
//! Levenshtein-ratio comparison against the keyword table.

use serde::{Deserialize, Serialize};

/// Stop-words ignored during matching.
const GRAMMAR_WORDS: &[&str] = &["is", "am", "are", "the", "a", "an"];
const POLITE_WORDS: &[&str] = &["please", "kindly", "can", "you"];

/// Fuzzy comparison is skipped for tokens longer than this.
const MAX_FUZZY_TOKEN_LEN: usize = 10;

/// Closed set of voice-controllable intents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Forward,
    Backward,
    Left,
    Right,
    Stop,
    ResetPosition,
    HandsUp,
    HeadLeft,
    HeadRight,
    HeadUp,
    HeadDown,
}

impl Intent {
    pub const ALL: &'static [Intent] = &[
        Intent::Forward,
        Intent::Backward,
        Intent::Left,
        Intent::Right,
        Intent::Stop,
        Intent::ResetPosition,
        Intent::HandsUp,
        Intent::HeadLeft,
        Intent::HeadRight,
        Intent::HeadUp,
        Intent::HeadDown,
    ];

    /// The command name put on the wire, also the match keyword.
    pub fn command_name(&self) -> &'static str {
        match self {
            Self::Forward => "forward",
            Self::Backward => "backward",
            Self::Left => "left",
            Self::Right => "right",
            Self::Stop => "stop",
            Self::ResetPosition => "resetposition",
            Self::HandsUp => "handsup",
            Self::HeadLeft => "headleft",
            Self::HeadRight => "headright",
            Self::HeadUp => "headup",
            Self::HeadDown => "headdown",
        }
    }

    /// Routing class: movement verbs go to the wheel base, poses to
    /// the servo controller.
    pub fn device_type(&self) -> &'static str {
        match self {
            Self::Forward | Self::Backward | Self::Left | Self::Right | Self::Stop => "wheel",
            _ => "servo",
        }
    }
}

/// A matched intent with its confidence score.
#[derive(Debug, Clone, Copy)]
pub struct IntentMatch {
    pub intent: Intent,
    pub confidence: f32,
}

/// Pure-function contract for the fuzzy matcher collaborator.
pub trait IntentMatcher: Send + Sync {
    /// Best intent candidate for `text`, or `None` when nothing in the
    /// utterance is worth scoring. Thresholding is the caller's job.
    fn match_intent(&self, text: &str) -> Option<IntentMatch>;
}

/// Default keyword matcher over the closed intent set.
#[derive(Debug, Default)]
pub struct KeywordMatcher;

impl KeywordMatcher {
    pub fn new() -> Self {
        Self
    }

    fn filter_tokens(text: &str) -> Vec<String> {
        text.split_whitespace()
            .map(|t| t.to_ascii_lowercase())
            .filter(|t| !GRAMMAR_WORDS.contains(&t.as_str()) && !POLITE_WORDS.contains(&t.as_str()))
            .collect()
    }
}

impl IntentMatcher for KeywordMatcher {
    fn match_intent(&self, text: &str) -> Option<IntentMatch> {
        let tokens = Self::filter_tokens(text);
        if tokens.is_empty() {
            return None;
        }

        let bigrams: Vec<(usize, String)> = tokens
            .windows(2)
            .enumerate()
            .map(|(i, pair)| (i, format!("{}{}", pair[0], pair[1])))
            .collect();

        // Exact hits near the front of the utterance win outright.
        for token in tokens.iter().take(2) {
            if let Some(intent) = keyword_lookup(token) {
                return Some(IntentMatch {
                    intent,
                    confidence: 1.0,
                });
            }
        }
        for (idx, joined) in &bigrams {
            if *idx <= 1 {
                if let Some(intent) = keyword_lookup(joined) {
                    return Some(IntentMatch {
                        intent,
                        confidence: 1.0,
                    });
                }
            }
        }

        // Fuzzy fallback over the same leading candidates.
        let candidates = tokens
            .iter()
            .take(2)
            .cloned()
            .chain(
                bigrams
                    .iter()
                    .filter(|(idx, _)| *idx <= 1)
                    .map(|(_, joined)| joined.clone()),
            );

        let mut best: Option<IntentMatch> = None;
        for candidate in candidates {
            if candidate.len() > MAX_FUZZY_TOKEN_LEN {
                continue;
            }
            for intent in Intent::ALL {
                let score = similarity(&candidate, intent.command_name());
                if best.map_or(true, |b| score > b.confidence) {
                    best = Some(IntentMatch {
                        intent: *intent,
                        confidence: score,
                    });
                }
            }
        }
        best
    }
}

fn keyword_lookup(token: &str) -> Option<Intent> {
    Intent::ALL
        .iter()
        .find(|intent| intent.command_name() == token)
        .copied()
}

/// Normalised Levenshtein similarity in [0, 1].
fn similarity(a: &str, b: &str) -> f32 {
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return 1.0;
    }
    1.0 - levenshtein(a, b) as f32 / longest as f32
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];

    for (i, &ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution
                .min(previous[j + 1] + 1)
                .min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}
