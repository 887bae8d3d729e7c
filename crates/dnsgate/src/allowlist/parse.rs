use super::normalize_domain;

/// Extracts allow-list entries from a list file.
///
/// One domain per line. Leading whitespace, empty lines and `#` comments are
/// skipped, and anything after the first whitespace-separated token is
/// ignored, so `example.com  # docs` is accepted.
pub fn parse_allowlist(data: &str) -> Vec<String> {
    data.lines()
        .filter_map(|line| {
            let line = line.trim_start();
            // Skip comments and empty lines
            if line.is_empty() || line.starts_with('#') {
                return None;
            }

            let token = line.split_whitespace().next()?;
            let domain = parse_domain_name(token);
            if domain.is_none() {
                tracing::debug!("Skipping malformed allow-list line '{}'", line);
            }
            domain
        })
        .collect()
}

fn parse_domain_name(token: &str) -> Option<String> {
    let domain = normalize_domain(token);
    // Subdomains are always covered, so a wildcard is the same as its parent
    let domain = domain.strip_prefix("*.").map(str::to_owned).unwrap_or(domain);

    if domain.is_empty() || domain.starts_with('.') || domain.contains("..") {
        return None;
    }

    let valid_chars = domain
        .bytes()
        .all(|byte| byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' || byte == b'.');
    valid_chars.then_some(domain)
}
