use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

/// Canonical form used for case/accent-insensitive comparisons.
///
/// Trims, lowercases and collapses whitespace runs to a single space. When
/// `remove_diacritics` is set the text is decomposed (NFD) and combining marks
/// are dropped, so `"París"` and `"paris"` compare equal.
pub fn normalize_text(s: &str, remove_diacritics: bool) -> String {
    let lowered = if remove_diacritics {
        strip_diacritics(&s.to_lowercase())
    } else {
        s.to_lowercase()
    };

    lowered.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Stable identity key for subjects and topics.
///
/// Must stay byte-for-byte identical everywhere a slug is derived: it is the
/// join key between independently created databases and the static resource
/// directory layout.
pub fn slugify(s: &str) -> String {
    let folded = strip_diacritics(&s.to_lowercase());

    let kept: String = folded
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c.is_whitespace() || *c == '-')
        .collect();

    let hyphenated = kept.split_whitespace().collect::<Vec<_>>().join("-");

    let mut slug = String::with_capacity(hyphenated.len());
    for c in hyphenated.chars() {
        if c == '-' && slug.ends_with('-') {
            continue;
        }
        slug.push(c);
    }

    slug
}

fn strip_diacritics(s: &str) -> String {
    s.nfd().filter(|c| !is_combining_mark(*c)).collect()
}
