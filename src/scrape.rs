//! Text transforms and regex extraction for semi-structured upstream payloads.
//!
//! The AllAnime `sourceUrls` blob is scanned textually rather than
//! deserialized record by record; [`normalize_source_blob`] is the small
//! pipeline that makes every source record land on its own line.

use regex::Regex;
use std::sync::OnceLock;

static SOURCE_PAIR: OnceLock<Regex> = OnceLock::new();

fn source_pair_pattern() -> &'static Regex {
    SOURCE_PAIR.get_or_init(|| {
        Regex::new(r#"sourceUrl":"--([^"]*)".*sourceName":"([^"]*)""#).unwrap()
    })
}

/// One `(sourceName, encoded id)` pair found in the source blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePair {
    pub name: String,
    pub encoded_id: String,
}

pub fn braces_to_newlines(text: &str) -> String {
    text.replace(['{', '}'], "\n")
}

pub fn unescape_unicode_slash(text: &str) -> String {
    text.replace("\\u002F", "/").replace("\\u002f", "/")
}

pub fn strip_backslashes(text: &str) -> String {
    text.replace('\\', "")
}

/// Runs the three transforms in order: braces, `\u002F`, backslashes.
pub fn normalize_source_blob(raw: &str) -> String {
    strip_backslashes(&unescape_unicode_slash(&braces_to_newlines(raw)))
}

/// Pulls the encoded mirror pairs out of a normalized blob, one per line.
pub fn extract_source_pairs(normalized: &str) -> Vec<SourcePair> {
    normalized
        .lines()
        .filter_map(|line| source_pair_pattern().captures(line))
        .map(|caps| SourcePair {
            name: caps[2].to_string(),
            encoded_id: caps[1].to_string(),
        })
        .collect()
}

/// Renders pairs as `name :id` lines, the form [`find_labelled`] scans.
pub fn render_source_lines(pairs: &[SourcePair]) -> String {
    pairs
        .iter()
        .map(|pair| format!("{} :{}\n", pair.name, pair.encoded_id))
        .collect()
}

/// Value of the first `label :value` line; the label must match exactly.
pub fn find_labelled(lines: &str, label: &str) -> Option<String> {
    lines.lines().find_map(|line| {
        let rest = line.strip_prefix(label)?.trim_start();
        let value = rest.strip_prefix(':')?.trim();
        (!value.is_empty()).then(|| value.to_string())
    })
}

/// `https:\/\/host\/path` → `https://host/path`.
pub fn unescape_json_slashes(text: &str) -> String {
    text.replace("\\/", "/")
}

pub fn first_capture(pattern: &Regex, text: &str, group: usize) -> Option<String> {
    pattern
        .captures(text)
        .and_then(|caps| caps.get(group))
        .map(|m| m.as_str().to_string())
}

pub fn all_captures(pattern: &Regex, text: &str, group: usize) -> Vec<String> {
    pattern
        .captures_iter(text)
        .filter_map(|caps| caps.get(group))
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Leading decimal digits of `text`, if any.
/// Digits at the start of `text`; saturates at `u64::MAX` instead of failing.
pub fn leading_number(text: &str) -> Option<u64> {
    let text = text.trim();
    let len = text.bytes().take_while(u8::is_ascii_digit).count();
    if len == 0 {
        return None;
    }
    Some(text[..len].parse().unwrap_or(u64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLOB: &str = r#"[{"sourceUrl":"--175948514e4c4f57","priority":7.7,"sourceName":"Luf-mp4","type":"iframe"},{"sourceUrl":"https:\u002F\u002Fembtaku.pro\u002Fstreaming.php?id=MjI","priority":4,"sourceName":"Vid-mp4","type":"iframe"},{"sourceUrl":"--504c4c484b","priority":8,"sourceName":"Default","type":"iframe","downloads":{"sourceName":"Gl","downloadUrl":"x"}}]"#;

    #[test]
    fn braces_become_newlines() {
        assert_eq!(braces_to_newlines("[{a},{b}]"), "[\na\n,\nb\n]");
    }

    #[test]
    fn unicode_slash_escape_is_replaced() {
        assert_eq!(
            unescape_unicode_slash(r"https:\u002F\u002Fhost\u002F"),
            "https://host/"
        );
    }

    #[test]
    fn backslashes_are_removed() {
        assert_eq!(strip_backslashes(r#"a\"b\\c"#), r#"a"bc"#);
    }

    #[test]
    fn normalized_blob_puts_records_on_separate_lines() {
        let normalized = normalize_source_blob(BLOB);
        assert!(normalized.contains("https://embtaku.pro/streaming.php"));
        assert!(!normalized.contains('{'));
        assert!(!normalized.contains('\\'));
    }

    #[test]
    fn only_encoded_sources_are_extracted() {
        let pairs = extract_source_pairs(&normalize_source_blob(BLOB));
        assert_eq!(
            pairs,
            vec![
                SourcePair {
                    name: "Luf-mp4".into(),
                    encoded_id: "175948514e4c4f57".into()
                },
                SourcePair {
                    name: "Default".into(),
                    encoded_id: "504c4c484b".into()
                },
            ]
        );
    }

    #[test]
    fn labelled_lookup_requires_exact_label() {
        let lines = "Luf-mp4 :abc\nDefault-backup :nope\nDefault :def\nS-mp4 :ghi\n";
        assert_eq!(find_labelled(lines, "Luf-mp4").as_deref(), Some("abc"));
        assert_eq!(find_labelled(lines, "Default").as_deref(), Some("def"));
        assert_eq!(find_labelled(lines, "S-mp4").as_deref(), Some("ghi"));
        assert_eq!(find_labelled(lines, "Sak"), None);
    }

    #[test]
    fn rendered_lines_round_trip_through_lookup() {
        let pairs = vec![SourcePair {
            name: "Kir".into(),
            encoded_id: "0102".into(),
        }];
        let lines = render_source_lines(&pairs);
        assert_eq!(lines, "Kir :0102\n");
        assert_eq!(find_labelled(&lines, "Kir").as_deref(), Some("0102"));
    }

    #[test]
    fn leading_number_reads_digits_only() {
        assert_eq!(leading_number("1080p"), Some(1080));
        assert_eq!(leading_number(" 720 "), Some(720));
        assert_eq!(leading_number("auto"), None);
        assert_eq!(leading_number("99999999999p"), Some(99_999_999_999));
        assert_eq!(leading_number("123456789012345678901234567890"), Some(u64::MAX));
    }

    #[test]
    fn json_slashes_are_unescaped() {
        assert_eq!(unescape_json_slashes(r"https:\/\/a\/b"), "https://a/b");
    }
}
