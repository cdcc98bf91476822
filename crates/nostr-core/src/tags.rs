//! Tag lookup helpers.
//!
//! Tags are ordered string sequences; the first element is the tag name.

use nostr_sdk::Event;

/// All tags named `name` that carry at least one value.
pub fn tags_named<'a>(event: &'a Event, name: &'a str) -> impl Iterator<Item = &'a [String]> + 'a {
    event.tags.iter().map(|t| t.as_slice()).filter(move |s| {
        s.len() > 1 && s.first().map(|v| v.as_str()) == Some(name)
    })
}

/// First tag named `name`.
pub fn first_tag<'a>(event: &'a Event, name: &str) -> Option<&'a [String]> {
    event
        .tags
        .iter()
        .map(|t| t.as_slice())
        .find(|s| s.first().map(|v| v.as_str()) == Some(name))
}

/// Value of the first tag named `name`, or `None` if absent or empty.
pub fn tag_value<'a>(event: &'a Event, name: &str) -> Option<&'a str> {
    first_tag(event, name)
        .and_then(|s| s.get(1))
        .map(|v| v.as_str())
}

/// The `d` tag, empty when missing.
pub fn identifier(event: &Event) -> &str {
    tag_value(event, "d").unwrap_or("")
}

/// Values of all tags named `name`, deduplicated in first-seen order.
pub fn unique_values(event: &Event, name: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for tag in tags_named(event, name) {
        let value = &tag[1];
        if !out.contains(value) {
            out.push(value.clone());
        }
    }
    out
}
