//! HTML parsing: metadata, clean text, social links, and e-mail addresses.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use falcon_core::SocialLink;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

/// Below this many words a page is treated as a shell needing rendering.
pub const MIN_SUFFICIENT_WORDS: usize = 50;

/// Phrases that mark bot walls and error pages.
const BLOCKING_PHRASES: &[&str] = &[
    "access denied",
    "blocked",
    "cloudflare",
    "please enable javascript",
    "bot detection",
];

const SKIPPED_TAGS: &[&str] = &["script", "style", "noscript", "template", "nav", "header", "footer", "aside"];

const INLINE_TAGS: &[&str] = &[
    "a", "abbr", "b", "code", "em", "i", "label", "mark", "small", "span", "strong", "sub", "sup", "u",
];

const SOCIAL_DOMAINS: &[(&str, &[&str])] = &[
    ("facebook", &["facebook.com", "fb.com"]),
    ("twitter", &["twitter.com", "x.com"]),
    ("linkedin", &["linkedin.com"]),
    ("instagram", &["instagram.com"]),
    ("youtube", &["youtube.com", "youtu.be"]),
    ("github", &["github.com"]),
    ("tiktok", &["tiktok.com"]),
    ("discord", &["discord.gg", "discord.com"]),
    ("telegram", &["t.me", "telegram.me"]),
    ("whatsapp", &["wa.me", "whatsapp.com"]),
];

const PLACEHOLDER_DOMAINS: &[&str] = &[
    "example.com",
    "domain.com",
    "email.com",
    "test.com",
    "sampleemail.com",
    "youremail.com",
];

const FALSE_POSITIVES: &[&str] = &["inform@ion", "contact@us", "more@info", "@you.", "@us.", "@it."];

const IMAGE_SUFFIXES: &[&str] = &[".png", ".jpg", ".jpeg", ".gif", ".svg", ".webp"];

static RE_EMAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap());

static RE_OBFUSCATED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)([A-Za-z0-9._%+-]+)\s*(?:\[at\]|\(at\)|\s+at\s+)\s*([A-Za-z0-9-]+(?:\.[A-Za-z0-9-]+)*)\s*(?:\[dot\]|\(dot\)|\s+dot\s+)\s*([A-Za-z]{2,})\b",
    )
    .unwrap()
});

static RE_VALID_EMAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}$").unwrap());

static SEL_TITLE: LazyLock<Selector> = LazyLock::new(|| Selector::parse("title").unwrap());
static SEL_META_DESC: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"meta[name="description"]"#).unwrap());
static SEL_BODY: LazyLock<Selector> = LazyLock::new(|| Selector::parse("body").unwrap());
static SEL_LINKS: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a[href]").unwrap());
static SEL_JSON_LD: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"script[type="application/ld+json"]"#).unwrap());

/// Everything the pipeline needs from one page of markup.
#[derive(Debug, Clone, Default)]
pub struct ParsedPage {
    pub title: String,
    pub meta_description: String,
    pub text: String,
    pub social_links: BTreeMap<String, Vec<SocialLink>>,
    pub emails: Vec<String>,
}

/// Parse `html` fetched from `base_url`.
pub fn parse(html: &str, base_url: &str) -> ParsedPage {
    let doc = Html::parse_document(html);
    let base = Url::parse(base_url).ok();
    let text = clean_text(&doc);

    ParsedPage {
        title: doc
            .select(&SEL_TITLE)
            .next()
            .map(|el| collapse_whitespace(&el.text().collect::<String>()))
            .unwrap_or_default(),
        meta_description: doc
            .select(&SEL_META_DESC)
            .next()
            .and_then(|el| el.value().attr("content"))
            .map(collapse_whitespace)
            .unwrap_or_default(),
        social_links: social_links(&doc, base.as_ref()),
        emails: emails(&doc, html, &text),
        text,
    }
}

/// Whether extracted text is real content rather than a shell or a bot wall.
pub fn is_sufficient(text: &str) -> bool {
    if text.split_whitespace().count() < MIN_SUFFICIENT_WORDS {
        return false;
    }
    let lower = text.to_lowercase();
    !BLOCKING_PHRASES.iter().any(|p| lower.contains(p))
}

pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Visible body text with boilerplate elements dropped.
fn clean_text(doc: &Html) -> String {
    let mut out = String::new();
    match doc.select(&SEL_BODY).next() {
        Some(body) => push_text(body, &mut out),
        None => push_text(doc.root_element(), &mut out),
    }
    collapse_whitespace(&out)
}

fn push_text(el: ElementRef<'_>, out: &mut String) {
    for child in el.children() {
        if let Some(text) = child.value().as_text() {
            out.push_str(text);
        } else if let Some(child_el) = ElementRef::wrap(child) {
            let name = child_el.value().name();
            if SKIPPED_TAGS.contains(&name) {
                continue;
            }
            push_text(child_el, out);
            if !INLINE_TAGS.contains(&name) {
                out.push(' ');
            }
        }
    }
}

fn social_links(doc: &Html, base: Option<&Url>) -> BTreeMap<String, Vec<SocialLink>> {
    let mut found: BTreeMap<String, Vec<SocialLink>> = BTreeMap::new();

    for el in doc.select(&SEL_LINKS) {
        let Some(href) = el.value().attr("href") else { continue };
        let resolved = match base {
            Some(b) => b.join(href),
            None => Url::parse(href),
        };
        let Ok(link) = resolved else { continue };
        let Some(host) = link.host_str().map(|h| h.to_ascii_lowercase()) else { continue };

        let platform = SOCIAL_DOMAINS.iter().find(|(_, domains)| {
            domains
                .iter()
                .any(|d| host == *d || host.strip_suffix(d).is_some_and(|p| p.ends_with('.')))
        });
        let Some((platform, _)) = platform else { continue };

        let entry = found.entry((*platform).to_string()).or_default();
        if entry.iter().any(|l| l.url == href) {
            continue;
        }
        entry.push(SocialLink {
            url: href.to_string(),
            text: collapse_whitespace(&el.text().collect::<String>()),
        });
    }
    found
}

fn emails(doc: &Html, html: &str, text: &str) -> Vec<String> {
    let mut candidates: BTreeSet<String> = BTreeSet::new();

    for source in [text, html] {
        for m in RE_EMAIL.find_iter(source) {
            candidates.insert(m.as_str().to_string());
        }
    }

    for el in doc.select(&SEL_LINKS) {
        if let Some(href) = el.value().attr("href") {
            if let Some(rest) = strip_prefix_ci(href, "mailto:") {
                let addr = rest.split(['?', '#']).next().unwrap_or_default();
                if !addr.is_empty() {
                    candidates.insert(addr.to_string());
                }
            }
        }
    }

    for caps in RE_OBFUSCATED.captures_iter(text) {
        candidates.insert(format!("{}@{}.{}", &caps[1], &caps[2], &caps[3]));
    }

    for el in doc.select(&SEL_JSON_LD) {
        let raw = el.text().collect::<String>();
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(&raw) {
            collect_json_emails(&value, &mut candidates);
        }
    }

    candidates
        .into_iter()
        .filter_map(|c| normalize_email(&c))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn collect_json_emails(value: &serde_json::Value, out: &mut BTreeSet<String>) {
    match value {
        serde_json::Value::Object(map) => {
            for (k, v) in map {
                match v {
                    serde_json::Value::String(s)
                        if matches!(k.to_lowercase().as_str(), "email" | "emailaddress") =>
                    {
                        out.insert(s.trim_start_matches("mailto:").to_string());
                    }
                    _ => collect_json_emails(v, out),
                }
            }
        }
        serde_json::Value::Array(items) => {
            for v in items {
                collect_json_emails(v, out);
            }
        }
        _ => {}
    }
}

fn normalize_email(raw: &str) -> Option<String> {
    let email: String = raw.trim().to_lowercase().chars().filter(|c| !c.is_whitespace()).collect();
    let (local, domain) = email.split_once('@')?;

    let plausible = email.len() > 5
        && local.len() >= 2
        && domain.split('.').next().is_some_and(|label| label.len() >= 2)
        && !PLACEHOLDER_DOMAINS.iter().any(|d| domain == *d || domain.ends_with(&format!(".{d}")))
        && !FALSE_POSITIVES.iter().any(|p| email.contains(p))
        && !IMAGE_SUFFIXES.iter().any(|s| email.ends_with(s))
        && RE_VALID_EMAIL.is_match(&email);

    plausible.then_some(email)
}

fn strip_prefix_ci<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let head = s.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix).then(|| &s[prefix.len()..])
}
