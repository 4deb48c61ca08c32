//! Object key helpers.

/// Join a namespace path and a filename into an object key.
pub fn object_key(path: &str, filename: &str) -> String {
    let path = path.trim_matches('/');
    let filename = filename.trim_start_matches('/');
    if path.is_empty() {
        filename.to_string()
    } else {
        format!("{}/{}", path, filename)
    }
}

/// Listing prefix addressing the objects directly inside `path`.
pub fn flush_prefix(path: &str) -> String {
    let path = path.trim_matches('/');
    if path.is_empty() {
        String::new()
    } else {
        format!("{}/", path)
    }
}

/// Last segment of a key.
pub fn file_name(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

/// Default namespace for a repository.
pub fn repository_namespace(owner: &str, name: &str) -> String {
    format!("{}/{}", owner.trim_matches('/'), name.trim_matches('/'))
}
