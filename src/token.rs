//! Correlation tokens.
//!
//! Tokens are the only key matching a reply to its request, so they come from
//! the thread-local CSPRNG rather than a counter.

use rand::Rng;
use rand::distr::Alphanumeric;

/// Token length in characters (about 130 bits of entropy).
pub(crate) const TOKEN_LEN: usize = 22;

/// Returns a fresh random alphanumeric token.
pub(crate) fn correlation_token() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect()
}
