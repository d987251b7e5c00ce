//! Naming rules for target and staging tables.

/// Returns true if the name is already a safe, case-normalized identifier.
pub fn is_safe_identifier(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Canonicalize a folder or file name into a store identifier.
///
/// Names that are safe once lowercased are only case-normalized. Anything else
/// is slugged and suffixed with a short hash so distinct inputs stay distinct.
pub fn safe_identifier(name: &str) -> String {
    let lowered = name.to_ascii_lowercase();
    if is_safe_identifier(&lowered) {
        return lowered;
    }

    let mut slug = String::with_capacity(name.len());
    let mut last_was_underscore = false;
    for ch in lowered.chars() {
        let mapped = if ch.is_ascii_alphanumeric() { ch } else { '_' };

        if mapped == '_' {
            if last_was_underscore {
                continue;
            }
            last_was_underscore = true;
            slug.push('_');
        } else {
            last_was_underscore = false;
            slug.push(mapped);
        }
    }

    let slug = slug.trim_matches('_');
    let slug = if slug.is_empty() { "t" } else { slug };
    let hash = blake3::hash(name.as_bytes()).to_hex();
    format!("{}_{}", slug, &hash[..8])
}

/// Target table name for a watched table folder.
pub fn target_table_name(folder_name: &str) -> String {
    safe_identifier(folder_name)
}

/// Per-file suffix distinguishing a file's staging table from others that
/// target the same table.
pub fn file_discriminator(file_name: &str) -> String {
    safe_identifier(file_name)
}

/// Staging table for a file.
///
/// When the target does not exist yet the file loads straight into the name
/// that becomes the target; otherwise it gets a per-file staging table.
pub fn staging_table_name(target: &str, file_name: &str, target_exists: bool) -> String {
    if target_exists {
        format!("{}_{}", target, file_discriminator(file_name))
    } else {
        target.to_string()
    }
}

/// Double-quote an identifier for SQL.
pub fn quote_ident(name: &str) -> String {
    let mut escaped = String::with_capacity(name.len() + 2);
    escaped.push('"');
    for ch in name.chars() {
        if ch == '"' {
            escaped.push('"');
        }
        escaped.push(ch);
    }
    escaped.push('"');
    escaped
}

/// `"schema"."table"`
pub fn quote_qualified(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table))
}
