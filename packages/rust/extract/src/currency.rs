//! Price text normalization.
//!
//! Store pages render prices as localized display text such as `Rp1.234.567,00`.
//! The comma is the fraction separator and the dot groups thousands.

use std::sync::LazyLock;

use regex::Regex;

/// Matches the fractional suffix (first comma onward) and every non-digit.
static NON_AMOUNT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",.*|\D").expect("valid regex"));

/// Convert display price text to whole currency units.
///
/// Returns 0 when no integer part is present or the digits overflow `i64`.
/// Missing price text is normal for some page variants, so this never fails.
pub fn normalize_price(text: &str) -> i64 {
    let digits = NON_AMOUNT_RE.replace_all(text, "");
    digits.parse().unwrap_or(0)
}
