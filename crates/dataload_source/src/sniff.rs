//! Delimiter detection over a configured candidate set.

use dataload_protocol::defaults::FALLBACK_DELIMITER;

/// Lines inspected when sniffing, header included.
pub const SNIFF_SAMPLE_LINES: usize = 5;

/// Decode a configured delimiter. Accepts a literal single byte (`","`), an
/// escape (`"\t"`), or a percent-encoded byte (`"%09"`).
pub fn decode_delimiter(raw: &str) -> Option<u8> {
    if let Some(hex) = raw.strip_prefix('%') {
        return u8::from_str_radix(hex, 16).ok();
    }
    match raw {
        "\\t" => Some(b'\t'),
        _ if raw.len() == 1 => raw.bytes().next(),
        _ => None,
    }
}

/// Pick the first candidate that splits the header into more than one field
/// and every sampled line into the same number of fields. Falls back to tab.
pub fn detect_delimiter(text: &str, candidates: &[u8]) -> u8 {
    let sample: Vec<&str> = text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .take(SNIFF_SAMPLE_LINES)
        .collect();
    if sample.is_empty() {
        return FALLBACK_DELIMITER as u8;
    }
    let sample_text = sample.join("\n");

    candidates
        .iter()
        .copied()
        .find(|&delim| consistent_field_count(&sample_text, delim).map_or(false, |n| n > 1))
        .unwrap_or(FALLBACK_DELIMITER as u8)
}

/// Field count shared by every record, or `None` if records disagree.
fn consistent_field_count(sample: &str, delimiter: u8) -> Option<usize> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(sample.as_bytes());

    let mut expected = None;
    for record in reader.records() {
        let len = record.ok()?.len();
        match expected {
            None => expected = Some(len),
            Some(n) if n != len => return None,
            Some(_) => {}
        }
    }
    expected
}

#[cfg(test)]
mod tests {
    use super::*;

    const CANDIDATES: &[u8] = &[b',', b'\t', b'|', b';'];

    #[test]
    fn decodes_configured_forms() {
        assert_eq!(decode_delimiter(","), Some(b','));
        assert_eq!(decode_delimiter("%09"), Some(b'\t'));
        assert_eq!(decode_delimiter("\\t"), Some(b'\t'));
        assert_eq!(decode_delimiter("%7C"), Some(b'|'));
        assert_eq!(decode_delimiter("ab"), None);
        assert_eq!(decode_delimiter("%zz"), None);
    }

    #[test]
    fn detects_comma_and_pipe() {
        assert_eq!(detect_delimiter("id,name\n1,Alice\n2,Bob\n", CANDIDATES), b',');
        assert_eq!(detect_delimiter("id|name\n1|Alice\n", CANDIDATES), b'|');
    }

    #[test]
    fn skips_candidates_with_inconsistent_counts() {
        // Commas inside the data but pipes split every line evenly.
        let text = "id|note\n1|a,b\n2|c\n";
        assert_eq!(detect_delimiter(text, CANDIDATES), b'|');
    }

    #[test]
    fn respects_quoted_fields() {
        let text = "id,name\n1,\"Smith, Jane\"\n";
        assert_eq!(detect_delimiter(text, CANDIDATES), b',');
    }

    #[test]
    fn falls_back_to_tab() {
        assert_eq!(detect_delimiter("single\nvalue\n", CANDIDATES), b'\t');
        assert_eq!(detect_delimiter("", CANDIDATES), b'\t');
    }
}
