//! Approximate token counting.
//!
//! Engines that cannot tokenize on demand fall back to a characters-per-token
//! ratio. The estimate only has to be stable, not exact.

/// Characters-per-token ratio used for estimation.
const CHARS_PER_TOKEN: f32 = 4.0;

/// Estimate how many tokens `text` occupies.
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    (text.chars().count() as f32 / CHARS_PER_TOKEN).ceil() as usize
}

/// Tokens left in a window of `capacity` after `context`, floored at zero.
pub fn remaining_after(capacity: usize, context: &str) -> usize {
    capacity.saturating_sub(estimate_tokens(context))
}
