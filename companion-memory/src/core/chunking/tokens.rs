//! Token cost approximation
//!
//! Costs are counted in quarter tokens so the estimate stays in integer
//! arithmetic: a wide (CJK) character costs 1.5 tokens, anything else 0.25,
//! and the total is rounded up.

use crate::models::Message;

const QUARTERS_PER_TOKEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenEstimator {
    wide_quarters: usize,
    narrow_quarters: usize,
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self {
            wide_quarters: 6,
            narrow_quarters: 1,
        }
    }
}

impl TokenEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Estimated token cost of `text`, rounded up.
    pub fn estimate(&self, text: &str) -> usize {
        let quarters: usize = text
            .chars()
            .map(|c| {
                if is_wide(c) {
                    self.wide_quarters
                } else {
                    self.narrow_quarters
                }
            })
            .sum();
        quarters.div_ceil(QUARTERS_PER_TOKEN)
    }

    pub fn estimate_message(&self, message: &Message) -> usize {
        self.estimate(&message.content)
    }

    pub fn estimate_messages(&self, messages: &[Message]) -> usize {
        messages.iter().map(|m| self.estimate_message(m)).sum()
    }
}

/// CJK ideographs, kana, hangul and full-width forms.
pub fn is_wide(c: char) -> bool {
    matches!(
        c,
        '\u{4E00}'..='\u{9FFF}'
            | '\u{3400}'..='\u{4DBF}'
            | '\u{F900}'..='\u{FAFF}'
            | '\u{3000}'..='\u{303F}'
            | '\u{3040}'..='\u{30FF}'
            | '\u{AC00}'..='\u{D7AF}'
            | '\u{FF00}'..='\u{FFEF}'
    )
}
