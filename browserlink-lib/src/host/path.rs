/// Canonical form used to compare application and project roots:
/// forward slashes become backslashes, a trailing backslash is ensured and
/// the result is lowercased.
pub fn normalize_directory_path(path: &str) -> String {
    let mut normalized = path.replace('/', "\\");
    if !normalized.ends_with('\\') {
        normalized.push('\\');
    }
    normalized.to_lowercase()
}

/// Ordinal comparison of two already-normalized paths.
pub fn same_normalized_path(a: &str, b: &str) -> bool {
    a == b
}
