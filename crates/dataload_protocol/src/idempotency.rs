use blake3::Hasher;
use chrono::NaiveDateTime;

const SEP: u8 = 0x1f;
const KEY_LEN: usize = 32;

fn hash_parts(parts: &[&str]) -> String {
    let mut hasher = Hasher::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update(&[SEP]);
    }
    hasher.finalize().to_hex().to_string()
}

/// Identity of one processing attempt of one file.
///
/// Derived from the file name and the processing timestamp, so re-processing
/// the same file later yields a new key.
pub fn profile_key(file_name: &str, processed_at: NaiveDateTime) -> String {
    let stamp = processed_at.format("%Y-%m-%d %H:%M:%S%.6f").to_string();
    let mut key = hash_parts(&[file_name, stamp.as_str()]);
    key.truncate(KEY_LEN);
    key
}
