/// PII redaction utilities for logging
///
/// Masks account logins and vehicle identifiers so logs can be shared
/// while still telling vehicles and accounts apart.

/// Redact a VIN, keeping only the last 4 characters visible.
/// Example: "WVWZZZE1ZMP000001" -> "*************0001"
pub fn vin(vin: &str) -> String {
    let chars: Vec<char> = vin.trim().chars().collect();

    if chars.len() <= 4 {
        // Too short to meaningfully redact
        return "*".repeat(chars.len());
    }

    let visible: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{}", "*".repeat(chars.len() - 4), visible)
}

/// Redact an email address, keeping domain visible.
/// Example: "user@example.com" -> "u***@example.com"
pub fn email(email: &str) -> String {
    let Some(at_pos) = email.find('@') else {
        // Not an email; logins can be plain user names
        return login_name(email);
    };
    if at_pos == 0 {
        return email.to_string();
    }
    let local = &email[..at_pos];
    let domain = &email[at_pos..];

    let mut chars = local.chars();
    match (chars.next(), chars.next()) {
        (Some(_), None) => format!("*{}", domain),
        (Some(first), Some(_)) => format!("{}***{}", first, domain),
        (None, _) => email.to_string(),
    }
}

fn login_name(name: &str) -> String {
    match name.chars().next() {
        Some(first) if name.chars().count() > 1 => format!("{}***", first),
        Some(_) => "*".to_string(),
        None => String::new(),
    }
}



/// Kani formal verification proofs
#[cfg(kani)]
mod kani_proofs {
    use super::*;

    fn any_vin_string<const N: usize>() -> String {
        let mut s = String::new();
        for _ in 0..N {
            let c: u8 = kani::any();
            kani::assume(c.is_ascii_alphanumeric());
            s.push(c as char);
        }
        s
    }

    /// Proves: a 17-character VIN keeps its length and masks the first 13
    #[kani::proof]
    #[kani::unwind(19)]
    fn vin_prefix_masked() {
        let input = any_vin_string::<17>();
        let result = vin(&input);
        kani::assert(result.len() == 17, "redacted length must match");
        for c in result.chars().take(13) {
            kani::assert(c == '*', "prefix must be all asterisks");
        }
    }

    /// Proves: short identifiers are fully masked
    #[kani::proof]
    #[kani::unwind(6)]
    fn vin_short_fully_masked() {
        let input = any_vin_string::<4>();
        let result = vin(&input);
        for c in result.chars() {
            kani::assert(c == '*', "short identifiers must be fully masked");
        }
    }
}
