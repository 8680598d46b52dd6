//! Connection link rendering.
//!
//! A stored template carries two placeholders, [`ID_PLACEHOLDER`] for the
//! client id and [`NAME_PLACEHOLDER`] for the percent-encoded username.
//! Anything else in the template (extra query parameters, other brace
//! groups) is copied through untouched.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use crate::panel::PanelClient;

pub const ID_PLACEHOLDER: &str = "{uuid}";
pub const NAME_PLACEHOLDER: &str = "{name}";

/// Characters left unescaped by JavaScript's `encodeURIComponent`.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

pub fn encode_component(value: &str) -> String {
    utf8_percent_encode(value, COMPONENT).to_string()
}

/// True if the template carries both placeholders.
pub fn is_valid_template(template: &str) -> bool {
    template.contains(ID_PLACEHOLDER) && template.contains(NAME_PLACEHOLDER)
}

/// Render a connection link, or `None` if the template lacks a placeholder
/// or the client lacks an id or username.
pub fn render(template: &str, client: &PanelClient) -> Option<String> {
    if !is_valid_template(template) {
        return None;
    }
    if client.id.trim().is_empty() || client.email.trim().is_empty() {
        return None;
    }
    Some(
        template
            .replace(ID_PLACEHOLDER, &client.id)
            .replace(NAME_PLACEHOLDER, &encode_component(&client.email)),
    )
}

/// The display-name text that precedes the username in rendered links:
/// everything between the last `#` before [`NAME_PLACEHOLDER`] and the
/// placeholder itself. `None` when there is no such fragment.
pub fn name_prefix(template: &str) -> Option<&str> {
    let at = template.find(NAME_PLACEHOLDER)?;
    let head = &template[..at];
    let hash = head.rfind('#')?;
    let prefix = &head[hash + 1..];
    (!prefix.is_empty()).then_some(prefix)
}
