//! Minimal distinguished-name helpers.
//!
//! Only splits a DN into its leading RDN and parent; no normalization or
//! schema-aware comparison is done.

/// Byte index of the first RDN separator, honouring `\` escapes and quoted
/// values.
fn first_separator(dn: &str) -> Option<usize> {
    let mut escaped = false;
    let mut quoted = false;
    for (i, c) in dn.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '"' => quoted = !quoted,
            ',' | ';' if !quoted => return Some(i),
            _ => {}
        }
    }
    None
}

/// The leading RDN of `dn`.
pub fn rdn(dn: &str) -> &str {
    match first_separator(dn) {
        Some(i) => dn[..i].trim(),
        None => dn.trim(),
    }
}

/// The parent of `dn`, or `None` for a single-RDN name.
pub fn parent(dn: &str) -> Option<&str> {
    first_separator(dn)
        .map(|i| dn[i + 1..].trim())
        .filter(|p| !p.is_empty())
}

/// Join an RDN and an optional parent into a DN.
pub fn compose(rdn: &str, parent: Option<&str>) -> String {
    match parent {
        Some(p) if !p.is_empty() => format!("{rdn},{p}"),
        _ => rdn.to_string(),
    }
}
