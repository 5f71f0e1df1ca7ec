//! RFC 2047 encoded-word decoding for display-only header values such as
//! `Subject`. Hop reconstruction never needs it.

use base64::{engine::general_purpose, Engine as _};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref ENCODED_WORD: Regex = Regex::new(r"=\?([^?\s]+)\?([bBqQ])\?([^?\s]*)\?=").unwrap();
    static ref BETWEEN_WORDS: Regex = Regex::new(r"\?=\s+=\?").unwrap();
}

/// Expand every encoded word in `value`. Words that fail to decode are kept
/// verbatim.
pub fn decode_header_value(value: &str) -> String {
    // Whitespace between two adjacent encoded words is not displayed
    let joined = BETWEEN_WORDS.replace_all(value, "?==?");

    ENCODED_WORD
        .replace_all(&joined, |caps: &regex::Captures| {
            let charset = &caps[1];
            let payload = &caps[3];
            let bytes = match caps[2].to_ascii_lowercase().as_str() {
                "b" => general_purpose::STANDARD.decode(payload).ok(),
                _ => Some(decode_q(payload)),
            };
            match bytes {
                Some(bytes) => bytes_to_string(&bytes, charset),
                None => {
                    log::debug!("Could not decode encoded word {}", &caps[0]);
                    caps[0].to_string()
                }
            }
        })
        .to_string()
}

/// The `Q` encoding: quoted-printable with `_` for space.
fn decode_q(payload: &str) -> Vec<u8> {
    let bytes = payload.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'_' => out.push(b' '),
            b'=' if i + 2 < bytes.len() => {
                match (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                    (Some(high), Some(low)) => {
                        out.push(high << 4 | low);
                        i += 2;
                    }
                    _ => out.push(b'='),
                }
            }
            other => out.push(other),
        }
        i += 1;
    }
    out
}

fn hex_value(digit: u8) -> Option<u8> {
    (digit as char).to_digit(16).map(|v| v as u8)
}

fn bytes_to_string(bytes: &[u8], charset: &str) -> String {
    // Language suffix per RFC 2231, e.g. `utf-8*en`
    let charset = charset.split('*').next().unwrap_or(charset).to_ascii_lowercase();
    match charset.as_str() {
        "iso-8859-1" | "latin1" | "windows-1252" | "cp1252" => {
            bytes.iter().map(|&b| b as char).collect()
        }
        _ => String::from_utf8_lossy(bytes).into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base64_word() {
        assert_eq!(
            decode_header_value("=?UTF-8?B?SGVsbG8gV29ybGQ=?="),
            "Hello World"
        );
    }

    #[test]
    fn test_q_word_with_latin1() {
        assert_eq!(
            decode_header_value("=?ISO-8859-1?Q?Caf=E9_au_lait?="),
            "Café au lait"
        );
    }

    #[test]
    fn test_adjacent_words_and_plain_text() {
        assert_eq!(
            decode_header_value("Re: =?utf-8?q?caf=C3=A9?= =?utf-8?q?_cr=C3=A8me?= order"),
            "Re: café crème order"
        );
    }

    #[test]
    fn test_invalid_word_is_kept() {
        let value = "=?utf-8?b?!!!?=";
        assert_eq!(decode_header_value(value), value);
    }
}
