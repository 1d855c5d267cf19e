//! Input checks shared by the link and account services.

use url::Url;

/// Prefix `http://` when the input carries neither `http://` nor `https://`.
/// The scheme is matched case-insensitively and kept as written.
pub fn normalize_url(raw: &str) -> String {
    let raw = raw.trim();
    let lower = raw.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        raw.to_owned()
    } else {
        format!("http://{raw}")
    }
}

/// Validate a link target and return it with its scheme normalised.
///
/// Returns `None` for empty input, unparseable URLs, an empty host, or a host
/// containing spaces, `..` or quote characters.
pub fn checked_url(raw: &str) -> Option<String> {
    if raw.trim().is_empty() {
        return None;
    }

    let normalized = normalize_url(raw);
    let parsed = Url::parse(&normalized).ok()?;
    let host = parsed.host_str()?;

    if host.is_empty()
        || host.contains(' ')
        || host.contains("..")
        || host.contains('\'')
        || host.contains('"')
    {
        return None;
    }

    Some(normalized)
}

/// `local@domain.tld` where the local part is `[A-Za-z0-9._%+-]+`, the
/// domain `[A-Za-z0-9.-]+` and the final label at least two ASCII letters.
pub fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };

    if local.is_empty()
        || !local
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "._%+-".contains(c))
    {
        return false;
    }

    let Some((name, tld)) = domain.rsplit_once('.') else {
        return false;
    };

    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
        && tld.len() >= 2
        && tld.chars().all(|c| c.is_ascii_alphabetic())
}

/// At least 8 characters with one ASCII letter and one ASCII digit.
pub fn is_valid_password(password: &str) -> bool {
    password.chars().count() >= 8
        && password.chars().any(|c| c.is_ascii_alphabetic())
        && password.chars().any(|c| c.is_ascii_digit())
}
