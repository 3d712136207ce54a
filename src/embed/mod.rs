//! Allow-list validation for editor-supplied map embeds.
//!
//! Input is either a bare URL or an `<iframe>` snippet copied from a mapping
//! provider. Only `http`/`https` URLs whose host is one of
//! [`ALLOWED_EMBED_DOMAINS`] (or a subdomain of one) are accepted.
//!
//! `sanitize` never echoes attacker-controlled markup: a snippet is returned
//! unchanged only when it is a single `<iframe>` element made of known
//! presentational attributes. Everything else that validates is rebuilt from
//! the URL with a restrictive sandbox.

use regex::Regex;
use url::Url;

/// Mapping providers whose widgets may be embedded.
pub const ALLOWED_EMBED_DOMAINS: &[&str] = &[
    "yandex.ru",
    "yandex.com",
    "google.com",
    "openstreetmap.org",
    "2gis.ru",
];

/// Sandbox for generated frames. No top navigation, no pointer lock.
pub const EMBED_SANDBOX: &str = "allow-scripts allow-same-origin allow-popups allow-forms";

/// Attributes a pasted snippet may carry and still be passed through as is.
const PASSTHROUGH_ATTRIBUTES: &[&str] = &[
    "src",
    "width",
    "height",
    "frameborder",
    "allowfullscreen",
    "style",
    "title",
    "loading",
    "referrerpolicy",
    "class",
];

/// Start tag of an `<iframe>`. Quoted values may contain `<` and `>`.
const IFRAME_TAG: &str = r#"<iframe\b((?:[^<>"']|"[^"]*"|'[^']*')*)>"#;

/// One attribute: name, then an optional double-quoted, single-quoted or bare value.
const ATTRIBUTE: &str = r#"\s*([^\s=/>"']+)(?:\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'=<>`]+)))?"#;

/// Attribute list of a start tag, names lower-cased, values raw (not entity-decoded).
type Attributes = Vec<(String, Option<String>)>;

/// Split the inside of a start tag into attributes.
///
/// Tokens must follow each other with nothing but whitespace in between, so a
/// `src=` written inside another attribute's value is never read as an attribute.
fn parse_attributes(raw: &str) -> Option<Attributes> {
    let attribute = Regex::new(ATTRIBUTE).ok()?;
    let mut attributes = Vec::new();
    let mut position = 0;
    for captures in attribute.captures_iter(raw) {
        let whole = captures.get(0)?;
        if whole.start() != position {
            return None;
        }
        let name = captures.get(1)?.as_str().to_ascii_lowercase();
        let value = captures
            .get(2)
            .or_else(|| captures.get(3))
            .or_else(|| captures.get(4))
            .map(|m| m.as_str().to_string());
        attributes.push((name, value));
        position = whole.end();
    }
    raw[position..].trim().is_empty().then_some(attributes)
}

/// The single, non-empty `src` value. Duplicates are rejected.
fn single_src(attributes: &Attributes) -> Option<&str> {
    let mut sources = attributes.iter().filter(|(name, _)| name == "src");
    let (_, value) = sources.next()?;
    if sources.next().is_some() {
        return None;
    }
    value.as_deref().map(str::trim).filter(|value| !value.is_empty())
}

/// Attributes of the first `<iframe>` start tag in `markup`.
fn first_iframe_attributes(markup: &str) -> Option<Attributes> {
    let tag = Regex::new(&format!("(?is){IFRAME_TAG}")).ok()?;
    let captures = tag.captures(markup)?;
    parse_attributes(captures.get(1)?.as_str())
}

/// Pull the URL to validate out of `input`.
///
/// Markup containing an `<iframe>` yields the `src` of its first iframe (or
/// `None` when it is missing, repeated or unparseable); anything else is
/// treated as a bare URL.
#[must_use]
pub fn extract_embed_src(input: &str) -> Option<String> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }
    if !input.to_ascii_lowercase().contains("<iframe") {
        return Some(input.to_string());
    }

    let attributes = first_iframe_attributes(input)?;
    single_src(&attributes).map(|src| src.replace("&amp;", "&"))
}

/// Parse `candidate` and check scheme and host against the allow-list.
#[must_use]
pub fn validate_embed_url(candidate: &str) -> Option<Url> {
    let url = Url::parse(candidate).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    let host = url.host_str()?.trim_end_matches('.').to_ascii_lowercase();
    ALLOWED_EMBED_DOMAINS
        .iter()
        .any(|domain| host == *domain || host.ends_with(&format!(".{domain}")))
        .then_some(url)
}

#[must_use]
pub fn is_valid_embed_url(input: &str) -> bool {
    extract_embed_src(input)
        .and_then(|candidate| validate_embed_url(&candidate))
        .is_some()
}

/// Markup safe to render for `input`, or `None` when it fails validation.
#[must_use]
pub fn sanitize(input: &str) -> Option<String> {
    let url = extract_embed_src(input).and_then(|candidate| validate_embed_url(&candidate))?;
    let trimmed = input.trim();
    if is_clean_iframe(trimmed) {
        return Some(trimmed.to_string());
    }
    Some(build_iframe(&url))
}

/// A single `<iframe ...></iframe>` whose attributes are all presentational
/// and whose `src` the browser reads exactly as we do.
fn is_clean_iframe(markup: &str) -> bool {
    let Ok(lone) = Regex::new(&format!(r"(?is)^{IFRAME_TAG}\s*</iframe>$")) else {
        return false;
    };
    let Some(attributes) = lone
        .captures(markup)
        .and_then(|captures| captures.get(1))
        .and_then(|raw| parse_attributes(raw.as_str()))
    else {
        return false;
    };
    if !attributes
        .iter()
        .all(|(name, _)| PASSTHROUGH_ATTRIBUTES.contains(&name.as_str()))
    {
        return false;
    }
    single_src(&attributes).is_some_and(only_inert_ampersands)
}

/// Every `&` is either `&amp;` or a query separator like `&source=`, which
/// browsers leave undecoded inside attributes. Anything else (`&quest;`,
/// `&#47;`) would make the browser read a different URL than we validated.
fn only_inert_ampersands(src: &str) -> bool {
    Regex::new(r"&(?:amp;|[A-Za-z0-9]+=)")
        .is_ok_and(|inert| !inert.replace_all(src, "").contains('&'))
}

fn build_iframe(url: &Url) -> String {
    format!(
        "<iframe src=\"{}\" width=\"100%\" height=\"400\" frameborder=\"0\" \
         style=\"border: 0;\" sandbox=\"{EMBED_SANDBOX}\" loading=\"lazy\" \
         referrerpolicy=\"no-referrer-when-downgrade\"></iframe>",
        escape_attribute(url.as_str())
    )
}

fn escape_attribute(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    const YANDEX_WIDGET: &str =
        "https://yandex.ru/map-widget/v1/?um=constructor%3Aabc123&source=constructor";

    #[test]
    fn allow_list_accepts_providers_and_subdomains() {
        assert!(is_valid_embed_url(YANDEX_WIDGET));
        assert!(is_valid_embed_url("https://www.google.com/maps/embed?pb=!1m18"));
        assert!(is_valid_embed_url("https://WWW.OpenStreetMap.org/export/embed.html"));
        assert!(is_valid_embed_url("http://widgets.2gis.ru/widget?type=firmsonmap"));
    }

    #[test]
    fn foreign_hosts_are_rejected() {
        assert!(!is_valid_embed_url("https://evil.example/x"));
        assert!(!is_valid_embed_url("https://evilyandex.ru/map-widget/v1/"));
        assert!(!is_valid_embed_url("https://yandex.ru.evil.example/map"));
        assert!(!is_valid_embed_url("https://google.com@evil.example/"));
    }

    #[test]
    fn non_http_schemes_are_rejected() {
        assert!(!is_valid_embed_url("javascript:alert(1)"));
        assert!(!is_valid_embed_url("data:text/html,<script>alert(1)</script>"));
        assert!(!is_valid_embed_url("ftp://yandex.ru/map"));
    }

    #[test]
    fn garbage_and_empty_inputs_are_rejected() {
        assert!(!is_valid_embed_url(""));
        assert!(!is_valid_embed_url("   "));
        assert!(!is_valid_embed_url("yandex.ru/map-widget"));
        assert!(!is_valid_embed_url("<iframe width=\"600\"></iframe>"));
        assert_eq!(sanitize("<iframe width=\"600\"></iframe>"), None);
    }

    #[test]
    fn iframe_src_is_extracted() {
        let snippet = format!(
            "<iframe src=\"{}\" width=\"560\" height=\"400\" frameborder=\"1\" allowfullscreen=\"true\"></iframe>",
            YANDEX_WIDGET.replace('&', "&amp;")
        );
        assert_eq!(extract_embed_src(&snippet).as_deref(), Some(YANDEX_WIDGET));
        assert!(is_valid_embed_url(&snippet));
    }

    #[test]
    fn clean_snippet_passes_through_unchanged() {
        let snippet = format!(
            "<iframe src=\"{YANDEX_WIDGET}\" width=\"560\" height=\"400\" frameborder=\"1\" allowfullscreen></iframe>"
        );
        assert_eq!(sanitize(&snippet).as_deref(), Some(snippet.as_str()));
    }

    #[test]
    fn snippet_with_handlers_is_rebuilt() -> anyhow::Result<()> {
        let snippet = format!(
            "<iframe src=\"{YANDEX_WIDGET}\" onload=\"steal()\"></iframe><script>alert(1)</script>"
        );
        let markup = sanitize(&snippet).ok_or_else(|| anyhow::anyhow!("rejected"))?;
        assert!(!markup.contains("onload"));
        assert!(!markup.contains("<script"));
        assert!(markup.contains(&format!("sandbox=\"{EMBED_SANDBOX}\"")));
        Ok(())
    }

    #[test]
    fn hostile_snippet_src_is_rejected() {
        let snippet = "<iframe src=\"https://evil.example/phish\"></iframe>";
        assert!(!is_valid_embed_url(snippet));
        assert_eq!(sanitize(snippet), None);
        assert_eq!(
            sanitize("<IFRAME SRC='javascript:alert(1)'></IFRAME>"),
            None
        );
    }

    #[test]
    fn src_hidden_in_another_attribute_is_not_the_src() {
        let snippet = "<iframe title=\"src='https://yandex.ru/map-widget/v1/'\" \
                       src=\"https://evil.example/phish\"></iframe>";
        assert_eq!(
            extract_embed_src(snippet).as_deref(),
            Some("https://evil.example/phish")
        );
        assert!(!is_valid_embed_url(snippet));
        assert_eq!(sanitize(snippet), None);
    }

    #[test]
    fn allowed_src_next_to_smuggled_text_is_passed_through() {
        let snippet = format!(
            "<iframe title=\"src='https://evil.example/' > <b>\" src=\"{YANDEX_WIDGET}\"></iframe>"
        );
        assert_eq!(extract_embed_src(&snippet).as_deref(), Some(YANDEX_WIDGET));
        assert_eq!(sanitize(&snippet).as_deref(), Some(snippet.as_str()));
    }

    #[test]
    fn duplicate_src_is_rejected() {
        let snippet = format!(
            "<iframe src=\"{YANDEX_WIDGET}\" SRC=\"https://evil.example/phish\"></iframe>"
        );
        assert_eq!(extract_embed_src(&snippet), None);
        assert_eq!(sanitize(&snippet), None);
    }

    #[test]
    fn unparseable_attribute_list_is_rejected() {
        assert_eq!(
            sanitize("<iframe/src=\"https://yandex.ru/map-widget/v1/\"></iframe>"),
            None
        );
        assert_eq!(
            sanitize("<iframe src=\"https://yandex.ru/map\" \"stray\"></iframe>"),
            None
        );
    }

    #[test]
    fn character_references_in_src_force_a_rebuild() -> anyhow::Result<()> {
        let snippet = "<iframe src=\"https://yandex.ru/map?q=&#47;x\"></iframe>";
        let markup = sanitize(snippet).ok_or_else(|| anyhow::anyhow!("rejected"))?;
        assert_ne!(markup, snippet);
        assert!(markup.contains(&format!("sandbox=\"{EMBED_SANDBOX}\"")));
        assert!(markup.contains("q=&amp;#47;x"));

        assert!(only_inert_ampersands("https://a.example/?a=1&b=2&amp;c=3"));
        assert!(!only_inert_ampersands("https://evil.example&quest;.yandex.ru/"));
        assert!(!only_inert_ampersands("https://a.example/?a=1&lt_x=2"));
        Ok(())
    }

    #[test]
    fn bare_url_is_wrapped_in_sandboxed_frame() -> anyhow::Result<()> {
        let markup = sanitize(YANDEX_WIDGET).ok_or_else(|| anyhow::anyhow!("rejected"))?;
        assert!(markup.starts_with("<iframe src=\"https://yandex.ru/map-widget/v1/?um=constructor%3Aabc123&amp;source=constructor\""));
        assert!(markup.contains("sandbox=\"allow-scripts allow-same-origin allow-popups allow-forms\""));
        assert!(!markup.contains("allow-top-navigation"));
        assert!(!markup.contains("allow-pointer-lock"));
        assert!(markup.contains("frameborder=\"0\""));
        assert!(markup.contains("loading=\"lazy\""));
        assert!(markup.contains("referrerpolicy=\"no-referrer-when-downgrade\""));
        Ok(())
    }

    #[test]
    fn generated_markup_escapes_quotes() -> anyhow::Result<()> {
        let markup = sanitize("https://yandex.ru/map?q=\"><script>")
            .ok_or_else(|| anyhow::anyhow!("rejected"))?;
        assert!(!markup.contains("<script>"));
        assert!(!markup.contains("\"><script"));
        assert!(markup.contains("q=%22%3E%3Cscript%3E"));
        Ok(())
    }

    #[test]
    fn escape_attribute_covers_html_specials() {
        assert_eq!(
            escape_attribute("a&b\"c'd<e>"),
            "a&amp;b&quot;c&#39;d&lt;e&gt;"
        );
    }
}
