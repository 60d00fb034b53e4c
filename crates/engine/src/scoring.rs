//! Variant scoring.
//!
//! Each variant in a batch gets a score used to order results for the
//! client: earlier variants in a batch score higher, a user-supplied prompt
//! and continuation of a prior editing context earn small bonuses, and the
//! result is always clamped to the valid range.

/// Lowest score a variant can carry.
pub const MIN_SCORE: f32 = 0.1;
/// Highest score a variant can carry.
pub const MAX_SCORE: f32 = 1.0;

/// Base score for the first variant of a batch.
const BASE_SCORE: f32 = 0.9;
/// How much each later batch position costs.
const INDEX_STEP: f32 = 0.1;
/// Bonus for a user-supplied prompt.
const PROMPT_BONUS: f32 = 0.05;
/// Bonus for continuing a prior editing context.
const CONTINUATION_BONUS: f32 = 0.05;

/// Score one variant by its position in the batch.
pub fn variant_score(index: usize, has_prompt: bool, continuation: bool) -> f32 {
    let mut score = BASE_SCORE - INDEX_STEP * index as f32;
    if has_prompt {
        score += PROMPT_BONUS;
    }
    if continuation {
        score += CONTINUATION_BONUS;
    }
    score.clamp(MIN_SCORE, MAX_SCORE)
}
