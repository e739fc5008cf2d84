use std::collections::BTreeMap;

/// `usage_details` keys the converter and cost calculator both recognise.
/// `total` is always recomputed at ingest rather than trusted from the
/// producer.
pub mod keys {
    pub const INPUT: &str = "input";
    pub const OUTPUT: &str = "output";
    pub const TOTAL: &str = "total";
    pub const CACHE_READ_INPUT_TOKENS: &str = "cache_read_input_tokens";
    pub const CACHE_CREATION_INPUT_TOKENS: &str = "cache_creation_input_tokens";
    pub const REASONING_TOKENS: &str = "reasoning_tokens";
    pub const AUDIO_INPUT: &str = "audio_input";
    pub const AUDIO_OUTPUT: &str = "audio_output";
    pub const IMAGE_TOKENS: &str = "image_tokens";
    pub const VIDEO_TOKENS: &str = "video_tokens";
}

pub type UsageDetails = BTreeMap<String, u64>;

/// Recompute `total` as input + output + reasoning + audio_in + audio_out +
/// image + video. Cache sub-tokens are NOT added; they're already counted
/// in `input`.
pub fn recompute_total(usage: &mut UsageDetails) {
    let sum = usage.get(keys::INPUT).copied().unwrap_or(0)
        + usage.get(keys::OUTPUT).copied().unwrap_or(0)
        + usage.get(keys::REASONING_TOKENS).copied().unwrap_or(0)
        + usage.get(keys::AUDIO_INPUT).copied().unwrap_or(0)
        + usage.get(keys::AUDIO_OUTPUT).copied().unwrap_or(0)
        + usage.get(keys::IMAGE_TOKENS).copied().unwrap_or(0)
        + usage.get(keys::VIDEO_TOKENS).copied().unwrap_or(0);
    usage.insert(keys::TOTAL.to_string(), sum);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recompute_total_excludes_cache_subtokens() {
        let mut usage = UsageDetails::new();
        usage.insert(keys::INPUT.to_string(), 1000);
        usage.insert(keys::OUTPUT.to_string(), 500);
        usage.insert(keys::CACHE_READ_INPUT_TOKENS.to_string(), 200);
        recompute_total(&mut usage);
        assert_eq!(usage[keys::TOTAL], 1500);
    }

    #[test]
    fn recompute_total_includes_multimodal_and_reasoning() {
        let mut usage = UsageDetails::new();
        usage.insert(keys::INPUT.to_string(), 10);
        usage.insert(keys::OUTPUT.to_string(), 5);
        usage.insert(keys::REASONING_TOKENS.to_string(), 3);
        usage.insert(keys::AUDIO_INPUT.to_string(), 1);
        usage.insert(keys::AUDIO_OUTPUT.to_string(), 1);
        usage.insert(keys::IMAGE_TOKENS.to_string(), 2);
        usage.insert(keys::VIDEO_TOKENS.to_string(), 4);
        recompute_total(&mut usage);
        assert_eq!(usage[keys::TOTAL], 26);
    }
}
