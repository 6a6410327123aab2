use std::path::Path;

/// Two-line element set for one platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TwoLineElements {
    pub name: String,
    pub line1: String,
    pub line2: String,
}

/// Look up `platform`'s element set in a TLE file.
///
/// The file holds three-line records (name, line 1, line 2). Names compare
/// case-insensitively, ignoring punctuation, so "Metop-B" finds "METOP-B"
/// and "METOP B". `Ok(None)` means the platform is not in the file.
pub fn read_elements(path: &Path, platform: &str) -> std::io::Result<Option<TwoLineElements>> {
    let content = std::fs::read_to_string(path)?;
    Ok(find_elements(&content, platform))
}

pub fn find_elements(content: &str, platform: &str) -> Option<TwoLineElements> {
    let wanted = normalize_name(platform);
    let lines: Vec<&str> = content
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .collect();

    lines.windows(3).find_map(|window| {
        let name = window[0].trim();
        let name = name.strip_prefix("0 ").unwrap_or(name);
        let is_record = window[1].starts_with("1 ") && window[2].starts_with("2 ");

        (is_record && normalize_name(name) == wanted).then(|| TwoLineElements {
            name: name.to_string(),
            line1: window[1].to_string(),
            line2: window[2].to_string(),
        })
    })
}

fn normalize_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}
