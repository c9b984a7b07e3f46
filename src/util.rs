//! Some utilities.

use failure::Error;

/// Logs an error, including its causes and backtrace (if possible).
pub fn log_err(err: Error) {
    let mut first = true;
    let num_errs = err.iter_chain().count();
    if num_errs <= 1 {
        error!("{}", err);
    } else {
        for cause in err.iter_chain() {
            if first {
                first = false;
                error!("           {}", cause);
            } else {
                error!("caused by: {}", cause);
            }
        }
    }
    let bt = err.backtrace().to_string();
    if bt != "" {
        error!("{}", bt);
    }
}

/// Normalizes an email address for lookups: takes the address out of a
/// `Name <addr>` form if present, checks that it looks like `local@domain`,
/// and lowercases it. Returns `None` for anything that isn't an address.
pub fn normalize_email(text: &str) -> Option<String> {
    let text = text.trim();
    let addr = match (text.rfind('<'), text.rfind('>')) {
        (Some(start), Some(end)) if start < end => text[start + 1..end].trim(),
        _ => text,
    };

    if addr.chars().any(char::is_whitespace) {
        return None;
    }
    let mut parts = addr.split('@');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(local), Some(domain), None) if !local.is_empty() && !domain.is_empty() => {
            Some(addr.to_lowercase())
        }
        _ => None,
    }
}

/// Encodes a number in base 62, most significant digit first.
pub fn base62(mut n: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

    let mut out = Vec::new();
    loop {
        out.push(DIGITS[(n % 62) as usize]);
        n /= 62;
        if n == 0 {
            break;
        }
    }
    out.reverse();
    out.into_iter().map(char::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_plain_and_named_addresses() {
        assert_eq!(
            normalize_email("  Alice@Example.COM "),
            Some("alice@example.com".to_string())
        );
        assert_eq!(
            normalize_email("Alice Liddell <Alice@Example.com>"),
            Some("alice@example.com".to_string())
        );
    }

    #[test]
    fn rejects_non_addresses() {
        assert_eq!(normalize_email(""), None);
        assert_eq!(normalize_email("alice"), None);
        assert_eq!(normalize_email("@example.com"), None);
        assert_eq!(normalize_email("alice@"), None);
        assert_eq!(normalize_email("a@b@c"), None);
        assert_eq!(normalize_email("al ice@example.com"), None);
    }

    #[test]
    fn base62_codes() {
        assert_eq!(base62(0), "0");
        assert_eq!(base62(61), "Z");
        assert_eq!(base62(62), "10");
        assert_eq!(base62(3843), "ZZ");
    }
}
