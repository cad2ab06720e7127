//! Provider credential display helpers.
//!
//! Plaintext API keys never leave the fulfillment crate; anything shown to a
//! seller or written to logs goes through [`mask_api_key`].

/// Placeholder shown in place of a stored secret.
pub const MASKED_SECRET: &str = "••••••••";

const VISIBLE_PREFIX: usize = 8;
const VISIBLE_SUFFIX: usize = 12;

/// Mask an API key, keeping the first 8 and last 12 characters.
///
/// Keys shorter than 20 characters are fully masked.
///
/// ```rust
/// # use podbridge_core::mask_api_key;
/// assert_eq!(
///     mask_api_key("0a1b2c3d-4e5f-6789-abcd-ef0123456789"),
///     "0a1b2c3d-••••••••-ef0123456789"
/// );
/// assert_eq!(mask_api_key("short"), "••••••••");
/// ```
#[must_use]
pub fn mask_api_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() < VISIBLE_PREFIX + VISIBLE_SUFFIX {
        return MASKED_SECRET.to_owned();
    }

    let prefix: String = chars.iter().take(VISIBLE_PREFIX).collect();
    let suffix: String = chars
        .iter()
        .skip(chars.len() - VISIBLE_SUFFIX)
        .collect();
    format!("{prefix}-{MASKED_SECRET}-{suffix}")
}
