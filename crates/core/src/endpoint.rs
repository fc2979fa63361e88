use url::Url;

/// Parses a service base URL, keeping its path as a directory so joins
/// append to it instead of replacing the last segment.
pub fn base_url(raw: &str) -> Result<Url, url::ParseError> {
    let trimmed = raw.trim();
    if trimmed.ends_with('/') {
        Url::parse(trimmed)
    } else {
        Url::parse(&format!("{trimmed}/"))
    }
}
