use regex::Regex;
use std::sync::OnceLock;

fn hyphen_break() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(\w+)-\s+(\w+)").expect("static regex is valid"))
}

fn non_ascii() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[^\x00-\x7F]+").expect("static regex is valid"))
}

/// Joins words split by a hyphen and a line wrap: `pok-\ner` -> `poker`.
///
/// Repeats until no break is left, since a match consumes the word that a
/// following break would need (`a- b- c`).
pub fn dehyphenate(text: &str) -> String {
    let pattern = hyphen_break();
    let mut current = text.to_string();
    while pattern.is_match(&current) {
        current = pattern.replace_all(&current, "${1}${2}").into_owned();
    }
    current
}

pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn strip_non_ascii(text: &str) -> String {
    non_ascii().replace_all(text, " ").into_owned()
}

/// Dehyphenate, collapse whitespace, strip non-ASCII.
///
/// Stripping can expose a new hyphen break or a double space, so the first
/// two steps run once more on the stripped text. The result is a fixed point.
pub fn normalize_text(text: &str) -> String {
    let collapsed = normalize_whitespace(&dehyphenate(text));
    let stripped = strip_non_ascii(&collapsed);
    if stripped == collapsed {
        return collapsed;
    }
    normalize_whitespace(&dehyphenate(&stripped))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_wrapped_hyphen_is_joined() {
        assert_eq!(normalize_text("pok-\ner"), "poker");
        assert_eq!(dehyphenate("semi- bluff"), "semibluff");
    }

    #[test]
    fn hyphen_without_whitespace_is_kept() {
        assert_eq!(normalize_text("three-bet pot"), "three-bet pot");
    }

    #[test]
    fn chained_breaks_are_all_joined() {
        assert_eq!(dehyphenate("a- b- c"), "abc");
    }

    #[test]
    fn whitespace_runs_collapse_to_single_spaces() {
        assert_eq!(normalize_text("  A  \t lot\n\nof   spacing "), "A lot of spacing");
    }

    #[test]
    fn non_ascii_is_replaced_by_a_space() {
        assert_eq!(normalize_text("A\u{2660} K\u{2665}"), "A K");
        assert_eq!(normalize_text("pot\u{a0}odds"), "pot odds");
    }

    #[test]
    fn normalization_is_idempotent() {
        let samples = [
            "pok-\ner is a game",
            "ab-\u{20ac} cd",
            "x-\u{e9} y",
            "  Expected\u{2014}value   calc-\n  ulation ",
            "",
        ];
        for sample in samples {
            let once = normalize_text(sample);
            assert_eq!(normalize_text(&once), once, "sample {sample:?}");
        }
    }
}
