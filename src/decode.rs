//! Pure decoding helpers shared by the site scrapers.
//!
//! AllAnime hides its mirror paths behind a fixed substitution of two-hex-digit
//! tokens to characters. The table lives in [`SUBSTITUTION_TABLE`] and every
//! lookup goes through [`decode_pair`] / [`encode_char`], so an upstream
//! rotation only touches this file.

use base64::{
    Engine,
    engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE},
};

/// Two-character token to output character.
pub const SUBSTITUTION_TABLE: &[(&str, char)] = &[
    ("79", 'A'),
    ("7a", 'B'),
    ("7b", 'C'),
    ("7c", 'D'),
    ("7d", 'E'),
    ("7e", 'F'),
    ("7f", 'G'),
    ("70", 'H'),
    ("71", 'I'),
    ("72", 'J'),
    ("73", 'K'),
    ("74", 'L'),
    ("75", 'M'),
    ("76", 'N'),
    ("77", 'O'),
    ("68", 'P'),
    ("69", 'Q'),
    ("6a", 'R'),
    ("6b", 'S'),
    ("6c", 'T'),
    ("6d", 'U'),
    ("6e", 'V'),
    ("6f", 'W'),
    ("60", 'X'),
    ("61", 'Y'),
    ("62", 'Z'),
    ("59", 'a'),
    ("5a", 'b'),
    ("5b", 'c'),
    ("5c", 'd'),
    ("5d", 'e'),
    ("5e", 'f'),
    ("5f", 'g'),
    ("50", 'h'),
    ("51", 'i'),
    ("52", 'j'),
    ("53", 'k'),
    ("54", 'l'),
    ("55", 'm'),
    ("56", 'n'),
    ("57", 'o'),
    ("48", 'p'),
    ("49", 'q'),
    ("4a", 'r'),
    ("4b", 's'),
    ("4c", 't'),
    ("4d", 'u'),
    ("4e", 'v'),
    ("4f", 'w'),
    ("40", 'x'),
    ("41", 'y'),
    ("42", 'z'),
    ("08", '0'),
    ("09", '1'),
    ("0a", '2'),
    ("0b", '3'),
    ("0c", '4'),
    ("0d", '5'),
    ("0e", '6'),
    ("0f", '7'),
    ("00", '8'),
    ("01", '9'),
    ("15", '-'),
    ("16", '.'),
    ("67", '_'),
    ("46", '~'),
    ("02", ':'),
    ("17", '/'),
    ("07", '?'),
    ("1b", '#'),
    ("63", '['),
    ("65", ']'),
    ("78", '@'),
    ("19", '!'),
    ("1c", '$'),
    ("1e", '&'),
    ("10", '('),
    ("11", ')'),
    ("12", '*'),
    ("13", '+'),
    ("14", ','),
    ("03", ';'),
    ("05", '='),
    ("1d", '%'),
];

pub fn decode_pair(pair: &str) -> Option<char> {
    SUBSTITUTION_TABLE
        .iter()
        .find(|(token, _)| token.eq_ignore_ascii_case(pair))
        .map(|&(_, ch)| ch)
}

pub fn encode_char(ch: char) -> Option<&'static str> {
    SUBSTITUTION_TABLE
        .iter()
        .find(|&&(_, c)| c == ch)
        .map(|&(token, _)| token)
}

/// Decodes a `--`-prefixed (or bare) token string into a URL path.
///
/// Tokens missing from the table are copied through unchanged. A trailing
/// odd character cannot form a token and is dropped.
pub fn decode_path(encoded: &str) -> String {
    let bytes = encoded.strip_prefix("--").unwrap_or(encoded);
    let mut decoded = String::with_capacity(bytes.len() / 2);
    for chunk in bytes.as_bytes().chunks_exact(2) {
        let pair = String::from_utf8_lossy(chunk);
        match decode_pair(&pair) {
            Some(ch) => decoded.push(ch),
            None => decoded.push_str(&pair),
        }
    }
    decoded
}

/// Inverse of [`decode_path`]; `None` when `path` has a character outside the table.
pub fn encode_path(path: &str) -> Option<String> {
    path.chars().map(encode_char).collect()
}

/// `/apivtwo/clock?id=..` is served as JSON from `/apivtwo/clock.json?id=..`.
pub fn with_clock_json(path: &str) -> String {
    if path.contains("/clock") && !path.contains("/clock.json") {
        path.replacen("/clock", "/clock.json", 1)
    } else {
        path.to_string()
    }
}

/// Lenient base64: standard alphabet with or without padding, then url-safe.
pub fn decode_base64(input: &str) -> Option<Vec<u8>> {
    let input = input.trim();
    STANDARD
        .decode(input)
        .or_else(|_| STANDARD_NO_PAD.decode(input))
        .or_else(|_| URL_SAFE.decode(input))
        .ok()
}

pub fn decode_base64_str(input: &str) -> Option<String> {
    decode_base64(input).and_then(|bytes| String::from_utf8(bytes).ok())
}

pub fn encode_base64(input: &[u8]) -> String {
    STANDARD.encode(input)
}
