use url::Url;

/// Resolve a possibly-relative href against the site base URL.
///
/// Returns `None` when either side is unparsable.
/// Example: `("https://site.test", "/show/abc")` → `"https://site.test/show/abc"`
pub fn join_url(base: &str, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    let base = Url::parse(base).ok()?;
    base.join(href).ok().map(|u| u.to_string())
}

/// Pull the URL out of a CSS `background-image: url("...")` style expression.
///
/// Handles double, single and unquoted forms.
pub fn parse_background_image(style: &str) -> Option<String> {
    let start = style.find("url(")? + "url(".len();
    let rest = &style[start..];
    let end = rest.find(')')?;
    let inner = rest[..end].trim().trim_matches(|c| c == '"' || c == '\'');
    if inner.is_empty() {
        None
    } else {
        Some(inner.to_string())
    }
}

/// Parse a filter option label into a year, if it is a plain integer.
pub fn parse_year_label(label: &str) -> Option<i32> {
    let label = label.trim();
    if label.is_empty() || !label.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    label.parse().ok()
}

/// True for tokens shaped like a 4-digit year.
pub fn is_year_token(token: &str) -> bool {
    token.len() == 4 && token.chars().all(|c| c.is_ascii_digit())
}

/// Truncate text to at most `cap` characters, appending `...` when cut.
pub fn truncate_text(text: &str, cap: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= cap {
        return text.to_string();
    }
    let cut: String = text.chars().take(cap).collect();
    format!("{}...", cut.trim_end())
}

/// Collapse runs of whitespace in scraped text.
pub fn squash_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
