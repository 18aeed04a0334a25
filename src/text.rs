//! Text shaping for record bodies and the file-extension category taxonomy.

use std::collections::{BTreeMap, HashSet};

use scraper::Html;

/// Join non-empty fragments with `\n`, keeping only the first occurrence of
/// each exact string.
pub fn dedup_concat<I, S>(fragments: I) -> String
where
    I: IntoIterator<Item = Option<S>>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    let mut kept: Vec<String> = Vec::new();
    for fragment in fragments.into_iter().flatten() {
        let fragment = fragment.as_ref();
        if fragment.is_empty() {
            continue;
        }
        if seen.insert(fragment.to_string()) {
            kept.push(fragment.to_string());
        }
    }
    kept.join("\n")
}

/// Strip markup, returning the concatenated text nodes with entities decoded.
pub fn strip_html(input: &str) -> String {
    if !input.contains('<') && !input.contains('&') {
        return input.to_string();
    }
    let fragment = Html::parse_fragment(input);
    fragment.root_element().text().collect::<String>()
}

/// Lower-cased extension of the last path segment of a URL or path, without
/// query string or fragment.
pub fn extension_of(url: &str) -> Option<String> {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    let last_segment = without_query.rsplit(['/', '\\']).next().unwrap_or(without_query);
    let (stem, ext) = last_segment.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

pub const FALLBACK_CATEGORY: &str = "other";

/// Category hierarchy for a URL. Configured buckets (`name → extensions`)
/// are checked before the built-in table.
pub fn category_for(url: &str, custom: &BTreeMap<String, Vec<String>>) -> Vec<String> {
    let Some(ext) = extension_of(url) else {
        return vec![FALLBACK_CATEGORY.to_string()];
    };

    for (name, extensions) in custom {
        if extensions
            .iter()
            .any(|e| e.trim_start_matches('.').eq_ignore_ascii_case(&ext))
        {
            return vec![name.clone(), ext];
        }
    }

    match ext.as_str() {
        "jpg" | "jpeg" | "png" | "bmp" | "gif" => vec!["image".to_string(), ext],
        "mp4" | "avi" | "mov" | "wmv" => vec!["video".to_string(), ext],
        "xls" | "xlsx" | "xlsm" | "xlsb" => vec!["xlsx".to_string()],
        "doc" | "docx" | "docm" => vec!["docx".to_string()],
        "ppt" | "pptx" | "pptm" => vec!["pptx".to_string()],
        "pdf" | "txt" | "rtf" | "csv" => vec![ext],
        _ => vec![FALLBACK_CATEGORY.to_string()],
    }
}
