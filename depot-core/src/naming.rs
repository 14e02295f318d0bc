//! Artifact name generation.
//!
//! Names look like `<epoch-ms>-<hash12><ext>`, where `hash12` is the first
//! 12 hex characters of `md5(original_name + epoch_ms)`. The client-supplied
//! name only contributes its extension and hash input; it is never used as a
//! path.

/// Length of the hex hash segment.
const HASH_LEN: usize = 12;

/// Longest extension (without the dot) carried over from a client filename.
const MAX_EXTENSION_LEN: usize = 16;

/// Generate a storage name for an upload received at `now_ms`.
pub fn generate_name(original_name: &str, now_ms: i64) -> String {
    generate_salted_name(original_name, now_ms, 0)
}

/// Like [`generate_name`], with a retry counter mixed into the hash.
///
/// Salt 0 yields exactly the unsalted name.
pub fn generate_salted_name(original_name: &str, now_ms: i64, salt: u32) -> String {
    let input = if salt == 0 {
        format!("{original_name}{now_ms}")
    } else {
        format!("{original_name}{now_ms}#{salt}")
    };
    let hash = md5_hex(&input);
    format!(
        "{now_ms}-{}{}",
        &hash[..HASH_LEN],
        extension_of(original_name)
    )
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Extension of the last path segment, dot included, original case kept.
///
/// Returns an empty string when there is no extension, when the only dot is
/// leading (`.bashrc`), or when the extension is not plain ASCII alphanumerics.
pub fn extension_of(original_name: &str) -> &str {
    let base = original_name
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or(original_name);

    let Some(dot) = base.rfind('.') else {
        return "";
    };
    if dot == 0 {
        return "";
    }

    let ext = &base[dot..];
    let body = &ext[1..];
    if body.is_empty()
        || body.len() > MAX_EXTENSION_LEN
        || !body.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return "";
    }
    ext
}

/// Replace (or append) the extension of a generated name.
pub fn with_extension(name: &str, ext: &str) -> String {
    let stem = match name.rfind('.') {
        Some(dot) if dot > 0 => &name[..dot],
        _ => name,
    };
    format!("{stem}.{ext}")
}

fn md5_hex(input: &str) -> String {
    use md5::Digest;
    let hash = md5::Md5::digest(input.as_bytes());
    hex::encode(hash)
}
