//! Hex and string helpers used across the parsers and the patch/pattern
//! modules — domain utilities, not a general-purpose text library.

use anyhow::{Result, bail};

const HEX_DIGITS: &[u8; 16] = b"0123456789ABCDEF";

/// Encodes `data` as uppercase hex with no separators.
pub fn to_hex(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 2);
    for &byte in data {
        out.push(HEX_DIGITS[(byte >> 4) as usize] as char);
        out.push(HEX_DIGITS[(byte & 0x0f) as usize] as char);
    }
    out
}

/// Parses a strict hex string (no wildcards) into bytes. Whitespace between
/// pairs is tolerated; an odd digit count or a non-hex character is an
/// error. Indexes into the whitespace-stripped string, not the original —
/// the original C++ utility this is modeled on indexed into the unstripped
/// string by pair position, which only worked because it never stripped
/// internal whitespace either; that coupling doesn't exist here.
pub fn from_hex(text: &str) -> Result<Vec<u8>> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() || compact.len() % 2 != 0 {
        bail!("hex string must have a non-zero, even number of digits");
    }
    let chars: Vec<char> = compact.chars().collect();
    chars
        .chunks(2)
        .map(|pair| {
            let s: String = pair.iter().collect();
            u8::from_str_radix(&s, 16).map_err(|_| anyhow::anyhow!("invalid hex byte {s:?}"))
        })
        .collect()
}

/// Uppercases `text` and inserts a space between each pair of hex digits,
/// e.g. `"deadbeef"` -> `"DE AD BE EF"`.
pub fn prettify(text: &str) -> String {
    let upper = to_upper(text);
    let mut out = String::with_capacity(upper.len() + upper.len() / 2);
    for (i, ch) in upper.chars().enumerate() {
        if i > 0 && i % 2 == 0 {
            out.push(' ');
        }
        out.push(ch);
    }
    out
}

/// Folds each byte to its printable ASCII form, `.` for anything else.
pub fn to_ascii(data: &[u8]) -> String {
    data.iter()
        .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
        .collect()
}

/// Formats `data` as aligned `offset: hex  ascii` rows, `row_size` bytes
/// per row, the hex column padded out even on a short final row.
pub fn dump(data: &[u8], row_size: usize, show_ascii: bool) -> String {
    let row_size = row_size.max(1);
    let mut out = String::new();
    for (row_index, row) in data.chunks(row_size).enumerate() {
        let offset = row_index * row_size;
        out.push_str(&format!("{offset:#08x}: "));
        for (i, byte) in row.iter().enumerate() {
            if i > 0 {
                out.push(' ');
            }
            out.push_str(&format!("{byte:02X}"));
        }
        if show_ascii {
            let padding = row_size.saturating_sub(row.len());
            for _ in 0..padding {
                out.push_str("   ");
            }
            out.push_str("  ");
            out.push_str(&to_ascii(row));
        }
        out.push('\n');
    }
    out
}

pub fn to_upper(text: &str) -> String {
    text.to_ascii_uppercase()
}

pub fn to_lower(text: &str) -> String {
    text.to_ascii_lowercase()
}

/// Trims leading/trailing whitespace.
pub fn trim(text: &str) -> String {
    text.trim().to_string()
}

/// Trims, then removes every remaining internal whitespace character.
pub fn compact(text: &str) -> String {
    text.chars().filter(|c| !c.is_whitespace()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trips() {
        let bytes = vec![0xDE, 0xAD, 0xBE, 0xEF];
        let text = to_hex(&bytes);
        assert_eq!(text, "DEADBEEF");
        assert_eq!(from_hex(&text).unwrap(), bytes);
    }

    #[test]
    fn from_hex_tolerates_whitespace() {
        assert_eq!(from_hex("DE AD be ef").unwrap(), vec![0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn from_hex_rejects_odd_length() {
        assert!(from_hex("ABC").is_err());
    }

    #[test]
    fn from_hex_rejects_non_hex() {
        assert!(from_hex("ZZ").is_err());
    }

    #[test]
    fn prettify_inserts_pair_spacing() {
        assert_eq!(prettify("deadbeef"), "DE AD BE EF");
    }

    #[test]
    fn ascii_fold_replaces_non_printable() {
        assert_eq!(to_ascii(&[0x41, 0x00, 0x20, 0xff]), "A. .");
    }

    #[test]
    fn dump_pads_short_final_row() {
        let text = dump(&[0x41, 0x42, 0x43], 8, true);
        let expected = format!("0x000000: 41 42 43{}  ABC\n", " ".repeat(5 * 3));
        assert_eq!(text, expected);
    }

    #[test]
    fn compact_strips_all_whitespace() {
        assert_eq!(compact("  de ad\tbe ef  "), "deadbeef");
    }
}
