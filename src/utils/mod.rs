//! # Utilities Module
//!
//! Helper functions used across the backend service: CELF amount
//! formatting, receive-address derivation and validation, log helpers.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use uuid::Uuid;

/// Prefix of every CELF receive address.
pub const ADDRESS_PREFIX: &str = "celf";

/// Length of a receive address: prefix + 22 base64url chars (16 bytes).
pub const ADDRESS_LEN: usize = 26;

/// Format a micro-CELF amount as human-readable CELF.
///
/// ## Examples
///
/// ```rust,ignore
/// assert_eq!(format_celf(1_000_000), "1.000000 CELF");
/// assert_eq!(format_celf(2_500_000), "2.500000 CELF");
/// ```
pub fn format_celf(amount: i64) -> String {
    let sign = if amount < 0 { "-" } else { "" };
    let abs = amount.unsigned_abs();
    format!("{}{}.{:06} CELF", sign, abs / 1_000_000, abs % 1_000_000)
}

/// Parse a CELF amount string ("2.5", "2.5 CELF") to micro-CELF.
pub fn parse_celf(amount_str: &str) -> Result<i64, String> {
    let cleaned = amount_str.trim().trim_end_matches("CELF").trim();

    let (whole_str, frac_str) = match cleaned.split_once('.') {
        Some((w, f)) => (w, f),
        None => (cleaned, ""),
    };
    if frac_str.len() > 6 {
        return Err(format!("Too many decimal places: {}", amount_str));
    }

    let whole: i64 = whole_str
        .parse()
        .map_err(|_| format!("Invalid amount: {}", amount_str))?;
    if whole < 0 {
        return Err("Amount cannot be negative".to_string());
    }

    let mut frac: i64 = 0;
    if !frac_str.is_empty() {
        frac = frac_str
            .parse()
            .map_err(|_| format!("Invalid amount: {}", amount_str))?;
        // Scale "5" in "2.5" up to 500000 micro-CELF.
        for _ in frac_str.len()..6 {
            frac *= 10;
        }
    }

    whole
        .checked_mul(1_000_000)
        .and_then(|w| w.checked_add(frac))
        .ok_or_else(|| format!("Amount out of range: {}", amount_str))
}

/// Derive a fresh opaque receive address.
///
/// The payload is a random UUID encoded as URL-safe base64, so addresses
/// are unguessable and carry no user information.
pub fn new_address() -> String {
    format!(
        "{}{}",
        ADDRESS_PREFIX,
        URL_SAFE_NO_PAD.encode(Uuid::new_v4().as_bytes())
    )
}

/// Validate the shape of a receive address.
///
/// ## Returns
///
/// * `Ok(())` - Well-formed address
/// * `Err(String)` - Invalid format
pub fn validate_address(address: &str) -> Result<(), String> {
    if !address.starts_with(ADDRESS_PREFIX) {
        return Err(format!("Address must start with '{}'", ADDRESS_PREFIX));
    }
    if address.len() != ADDRESS_LEN {
        return Err(format!(
            "Invalid address length: {} (expected {})",
            address.len(),
            ADDRESS_LEN
        ));
    }
    let payload = &address[ADDRESS_PREFIX.len()..];
    if URL_SAFE_NO_PAD.decode(payload).is_err() {
        return Err("Invalid character in address".to_string());
    }
    Ok(())
}

/// Whether a transfer destination looks like a receive address rather
/// than a bare user id.
pub fn looks_like_address(destination: &str) -> bool {
    destination.starts_with(ADDRESS_PREFIX) && destination.len() == ADDRESS_LEN
}

/// Truncate a string to a maximum length.
///
/// Useful for logging long identifiers.
#[allow(dead_code)]
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        let half = (max_len - 3) / 2;
        format!("{}...{}", &s[..half], &s[s.len() - half..])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_celf() {
        assert_eq!(format_celf(1_000_000), "1.000000 CELF");
        assert_eq!(format_celf(0), "0.000000 CELF");
        assert_eq!(format_celf(500_000), "0.500000 CELF");
        assert_eq!(format_celf(-2_500_000), "-2.500000 CELF");
    }

    #[test]
    fn test_parse_celf() {
        assert_eq!(parse_celf("100.00").unwrap(), 100_000_000);
        assert_eq!(parse_celf("1.5").unwrap(), 1_500_000);
        assert_eq!(parse_celf("2.5 CELF").unwrap(), 2_500_000);
        assert_eq!(parse_celf("0").unwrap(), 0);
        assert!(parse_celf("-1").is_err());
        assert!(parse_celf("1.1234567").is_err());
        assert!(parse_celf("abc").is_err());
    }

    #[test]
    fn test_address_round_trip() {
        let address = new_address();
        assert!(validate_address(&address).is_ok());
        assert!(looks_like_address(&address));
    }

    #[test]
    fn test_validate_address_rejects_garbage() {
        assert!(validate_address("not-an-address").is_err());
        assert!(validate_address("celfshort").is_err());
        // Right length, bad payload characters.
        assert!(validate_address("celf!!!!!!!!!!!!!!!!!!!!!!").is_err());
    }

    #[test]
    fn test_truncate_string() {
        assert_eq!(truncate_string("abcdefghij", 10), "abcdefghij");
        assert_eq!(truncate_string("abcdefghijklmnop", 10), "abc...nop");
    }
}
