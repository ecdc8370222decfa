//! File-name normalization and MIME lookup.
//!
//! `slugify` is applied in two places with the same function: once when a file
//! is stored, and once when the download handler builds the
//! `Content-Disposition` name. Keeping both on one code path guarantees the
//! name a client uploaded and the name it downloads under agree after
//! normalization.

use std::path::Path;

/// Maximum length of a trailing extension that survives normalization.
const MAX_EXTENSION_LEN: usize = 10;

/// Normalize an arbitrary human-supplied name into a filesystem- and URL-safe
/// token.
///
/// Lowercases, transliterates common Latin diacritics, collapses every other
/// run of non-alphanumeric characters into a single `-`, and preserves the
/// final `.extension` so content-type detection keeps working. Deterministic:
/// the same input always yields the same output. Never returns an empty
/// string.
pub fn slugify(name: &str) -> String {
    let (stem, ext) = split_extension(name);

    let mut slug = slugify_part(stem);
    if slug.is_empty() {
        slug.push_str("file");
    }

    if let Some(ext) = ext {
        let ext = slugify_part(ext);
        if !ext.is_empty() {
            slug.push('.');
            slug.push_str(&ext);
        }
    }

    slug
}

/// Guess the MIME type of a file from its extension.
///
/// Unrecognized extensions fall back to `application/octet-stream`.
pub fn mime_type(path: &Path) -> String {
    mime_guess::from_path(path)
        .first_raw()
        .map(str::to_string)
        .unwrap_or_else(|| "application/octet-stream".to_string())
}

/// Split `name` into `(stem, Some(extension))` when it carries a short
/// alphanumeric extension, `(name, None)` otherwise.
fn split_extension(name: &str) -> (&str, Option<&str>) {
    match name.rsplit_once('.') {
        Some((stem, ext))
            if !stem.is_empty()
                && !ext.is_empty()
                && ext.len() <= MAX_EXTENSION_LEN
                && ext.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            (stem, Some(ext))
        }
        _ => (name, None),
    }
}

fn slugify_part(part: &str) -> String {
    let mut out = String::with_capacity(part.len());
    let mut pending_separator = false;

    for c in part.chars() {
        let folded = if c.is_ascii_alphanumeric() {
            Folded::Char(c.to_ascii_lowercase())
        } else if let Some(t) = transliterate(c) {
            Folded::Str(t)
        } else {
            // Runs of punctuation/whitespace collapse into one separator.
            pending_separator = !out.is_empty();
            continue;
        };
        if pending_separator {
            out.push('-');
            pending_separator = false;
        }
        match folded {
            Folded::Char(c) => out.push(c),
            Folded::Str(s) => out.push_str(s),
        }
    }

    out
}

enum Folded {
    Char(char),
    Str(&'static str),
}

/// Transliterate a non-ASCII character into its slug form, or `None` when it
/// should act as a separator.
fn transliterate(c: char) -> Option<&'static str> {
    let folded = match c {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' | 'À' | 'Á' | 'Â' | 'Ã' | 'Ä' | 'Å' => "a",
        'è' | 'é' | 'ê' | 'ë' | 'È' | 'É' | 'Ê' | 'Ë' => "e",
        'ì' | 'í' | 'î' | 'ï' | 'Ì' | 'Í' | 'Î' | 'Ï' => "i",
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'Ò' | 'Ó' | 'Ô' | 'Õ' | 'Ö' | 'ø' | 'Ø' => "o",
        'ù' | 'ú' | 'û' | 'ü' | 'Ù' | 'Ú' | 'Û' | 'Ü' => "u",
        'ý' | 'ÿ' | 'Ý' => "y",
        'ñ' | 'Ñ' => "n",
        'ç' | 'Ç' => "c",
        'ß' => "ss",
        'æ' | 'Æ' => "ae",
        'đ' | 'Đ' => "d",
        _ => return None,
    };
    Some(folded)
}
