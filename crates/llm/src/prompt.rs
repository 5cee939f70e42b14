//! Extraction prompt construction.

use std::collections::BTreeMap;
use std::fmt::Write;

use falcon_core::{ExtractionSpec, PageContent, SocialLink};

/// Page text beyond this many characters is cut before prompting.
pub const MAX_CONTENT_CHARS: usize = 18_000;

pub const SYSTEM_PROMPT: &str = "You are a professional data extraction specialist. \
You read web page content and return structured records as a JSON array of objects. \
You never add explanations or markdown around the JSON.";

const INSTRUCTIONS: &str = "\
1. Identify every record of the requested type in the content.
2. Look for contact details in all forms: mailto links, plain addresses, obfuscated \"name [at] domain [dot] com\" text, and social profile URLs or handles.
3. Return ONLY a valid JSON array of objects.
4. Use the same field names, in the same order, in every object.
5. Prefer these exact field names when they apply: \"name\", \"title\", \"company\", \"email\", \"phone\", \"linkedin\", \"twitter\".
6. Use short descriptive snake_case names for other fields.
7. Use null for a missing value instead of omitting the field.
8. Only include data that appears in the content.";

/// Truncate to at most `max_chars` characters, marking the cut with `...`.
pub fn truncate_chars(text: &str, max_chars: usize) -> (String, bool) {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => (format!("{}...", &text[..byte_idx]), true),
        None => (text.to_string(), false),
    }
}

/// Build the user prompt for one extraction.
pub fn build(content: &PageContent, spec: &ExtractionSpec) -> String {
    let (text, _) = truncate_chars(&content.text, MAX_CONTENT_CHARS);
    let mut out = String::with_capacity(text.len() + 2_048);

    let _ = writeln!(out, "PAGE INFORMATION:");
    let _ = writeln!(out, "URL: {}", content.url);
    let _ = writeln!(out, "Title: {}", content.title);
    if !content.meta_description.is_empty() {
        let _ = writeln!(out, "Description: {}", content.meta_description);
    }
    let _ = writeln!(out, "Content: {text}\n");

    let _ = writeln!(out, "PRE-EXTRACTED CONTACT DATA:");
    let _ = writeln!(out, "Social links: {}", social_summary(&content.social_links));
    let _ = writeln!(
        out,
        "E-mail addresses ({}): {}\n",
        content.emails.len(),
        if content.emails.is_empty() { "none".to_string() } else { content.emails.join(", ") }
    );

    let _ = writeln!(out, "EXTRACTION TASK:\nExtract: {}\n", spec.data_type);
    let _ = writeln!(out, "INSTRUCTIONS:\n{INSTRUCTIONS}\n");

    if let Some(extra) = &spec.instructions {
        let _ = writeln!(out, "ADDITIONAL INSTRUCTIONS:\n{extra}\n");
    }

    let _ = writeln!(out, "EXPECTED OUTPUT FORMAT EXAMPLE:\n{}\n", example_for(&spec.data_type));
    out.push_str("Return ONLY the JSON array.");
    out
}

fn social_summary(links: &BTreeMap<String, Vec<SocialLink>>) -> String {
    if links.is_empty() {
        return "none".into();
    }
    links
        .iter()
        .map(|(platform, links)| {
            let urls: Vec<&str> = links.iter().map(|l| l.url.as_str()).collect();
            format!("{platform}: {}", urls.join(" "))
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// Output shape hint keyed on words in the data-type label.
pub fn example_for(data_type: &str) -> &'static str {
    let dt = data_type.to_lowercase();
    let has = |words: &[&str]| words.iter().any(|w| dt.contains(w));

    if has(&["product", "item", "catalog"]) {
        r#"[{"name": "Product Name", "price": "29.99", "description": "Product description", "availability": "In Stock", "brand": "Brand Name"}]"#
    } else if has(&["contact", "people", "staff", "team"]) {
        r#"[{"name": "Jane Smith", "title": "CEO", "company": "Tech Corp", "email": "jane@techcorp.io", "phone": "+1-555-0123", "linkedin": "https://linkedin.com/in/janesmith", "twitter": "@janesmith", "website": "https://janesmith.dev"}]"#
    } else if has(&["event", "meeting", "schedule"]) {
        r#"[{"title": "Event Title", "date": "2024-03-15", "time": "2:00 PM", "location": "Conference Room A", "description": "Event description"}]"#
    } else if has(&["news", "article", "blog", "post"]) {
        r#"[{"title": "Article Title", "author": "Author Name", "date": "2024-03-15", "category": "Technology", "summary": "Article summary", "url": "https://news.site/article"}]"#
    } else if has(&["job", "position", "career"]) {
        r#"[{"title": "Software Engineer", "company": "Tech Corp", "location": "New York, NY", "type": "Full-time", "salary": "$80,000 - $120,000", "requirements": "5+ years experience"}]"#
    } else if has(&["social", "link", "media", "profile"]) {
        r#"[{"platform": "LinkedIn", "url": "https://linkedin.com/company/techcorp", "username": "techcorp", "followers": "10K", "verified": true}]"#
    } else {
        r#"[{"field1": "value1", "field2": "value2", "field3": "value3"}]"#
    }
}

#[cfg(test)]
mod tests {
    use falcon_core::FetchMethod;

    use super::*;

    fn content(text: &str) -> PageContent {
        PageContent {
            url: "https://example.org/team".into(),
            title: "Our Team".into(),
            meta_description: String::new(),
            html: String::new(),
            text: text.into(),
            social_links: BTreeMap::new(),
            emails: vec!["ceo@acme.io".into()],
            method: FetchMethod::Lightweight,
            exploration: None,
        }
    }

    #[test]
    fn truncation_is_char_safe() {
        let (t, cut) = truncate_chars("héllo wörld", 4);
        assert_eq!(t, "héll...");
        assert!(cut);
        let (t, cut) = truncate_chars("short", 10);
        assert_eq!(t, "short");
        assert!(!cut);
    }

    #[test]
    fn prompt_carries_all_inputs() {
        let spec = ExtractionSpec {
            data_type: "team members".into(),
            instructions: Some("Skip interns".into()),
        };
        let p = build(&content("Alice CEO"), &spec);
        assert!(p.contains("Title: Our Team"));
        assert!(p.contains("Content: Alice CEO"));
        assert!(p.contains("ceo@acme.io"));
        assert!(p.contains("Extract: team members"));
        assert!(p.contains("ADDITIONAL INSTRUCTIONS:\nSkip interns"));
        assert!(p.contains("\"linkedin\""));
    }

    #[test]
    fn long_content_is_truncated() {
        let long = "x".repeat(MAX_CONTENT_CHARS + 500);
        let p = build(&content(&long), &ExtractionSpec { data_type: "rows".into(), instructions: None });
        assert!(!p.contains(&"x".repeat(MAX_CONTENT_CHARS + 1)));
        assert!(p.contains(&format!("{}...", "x".repeat(100))));
        assert!(!p.contains("ADDITIONAL INSTRUCTIONS"));
    }

    #[test]
    fn examples_follow_data_type() {
        assert!(example_for("Products").contains("price"));
        assert!(example_for("upcoming events").contains("location"));
        assert!(example_for("whatever").contains("field1"));
    }
}
