//! Filename randomization
//!
//! A purged and re-uploaded file must never come back under a URL the edge
//! network may still have cached, so every new upload gets a random suffix.

use uuid::Uuid;

/// Hex characters of randomness in a suffix (32 bits)
const SUFFIX_LEN: usize = 8;

/// Split a filename into basename and extension (without the dot).
///
/// Only the last extension counts and a leading dot does not start one:
/// `archive.tar.gz` -> (`archive.tar`, `gz`), `.htaccess` -> (`.htaccess`, ``).
pub fn split_extension(file_name: &str) -> (&str, &str) {
    match file_name.rfind('.') {
        Some(0) | None => (file_name, ""),
        Some(pos) => (&file_name[..pos], &file_name[pos + 1..]),
    }
}

/// Insert `_<8 hex chars>` before the extension: `photo.jpg` -> `photo_a1b2c3d4.jpg`
pub fn randomize_file_name(file_name: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    let suffix = &suffix[..SUFFIX_LEN];

    match split_extension(file_name) {
        (basename, "") => format!("{}_{}", basename, suffix),
        (basename, extension) => format!("{}_{}.{}", basename, suffix, extension),
    }
}
