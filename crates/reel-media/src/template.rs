//! `{{key}}` placeholder substitution for text overlays.

use std::collections::BTreeMap;

/// Substitute `{{key}}` placeholders from `vars`.
///
/// Whitespace inside the braces is ignored. Keys with no value render as the
/// empty string and are returned in first-seen order without duplicates. An
/// unterminated `{{` is kept literally.
pub fn render_template(template: &str, vars: &BTreeMap<String, String>) -> (String, Vec<String>) {
    let mut out = String::with_capacity(template.len());
    let mut unresolved: Vec<String> = Vec::new();
    let mut rest = template;

    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after_open = &rest[open + 2..];

        let Some(close) = after_open.find("}}") else {
            out.push_str(&rest[open..]);
            return (out, unresolved);
        };

        let key = after_open[..close].trim();
        match vars.get(key) {
            Some(value) => out.push_str(value),
            None => {
                if !unresolved.iter().any(|k| k == key) {
                    unresolved.push(key.to_string());
                }
            }
        }

        rest = &after_open[close + 2..];
    }

    out.push_str(rest);
    (out, unresolved)
}
