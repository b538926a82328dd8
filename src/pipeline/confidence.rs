/// Confidence thresholds used across stages and by the review UI
pub mod thresholds {
    /// Below this: the result is a guess. Reviewers should recount.
    pub const VERY_LOW: f32 = 0.30;

    /// Below this: significant uncertainty.
    pub const LOW: f32 = 0.50;

    /// Below this: some uncertainty. Discovery warns.
    pub const MODERATE: f32 = 0.60;

    /// At or above this: deterministic match strong enough to auto-resolve.
    pub const HIGH: f32 = 0.85;

    /// Explicit signage schedule territory.
    pub const VERY_HIGH: f32 = 0.95;
}

/// Clamp to [0, 1], mapping NaN to 0.
pub fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Quantity-weighted mean of entry confidences. Empty input yields 0.
pub fn weighted_entry_confidence(entries: &[super::types::Entry]) -> f32 {
    let total: u32 = entries.iter().map(|e| e.quantity).sum();
    if total == 0 {
        return 0.0;
    }
    let weighted: f32 = entries
        .iter()
        .map(|e| e.confidence * e.quantity as f32)
        .sum();
    clamp_unit(weighted / total as f32)
}
