use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::Path;

use crate::error::ZabError;

/// A parsed map file: key to list of values, keys ordered for stable output.
pub type MapFile = BTreeMap<String, Vec<String>>;

pub fn is_valid_regexp(pattern: &str) -> bool {
    regex::Regex::new(pattern).is_ok()
}

pub fn is_valid_ip(ip: &str) -> bool {
    ip.parse::<IpAddr>().is_ok()
}

/// Parses map file content: one `key:value[,value,...]` per line.
///
/// Blank lines and `#` comments are ignored. Lines without a colon, with an
/// empty key, or with no non-empty values are logged and skipped. Duplicate
/// keys extend the existing value list; duplicate values are dropped while
/// preserving first-seen order. Colons after the first are part of the value.
pub fn parse_map(content: &str, origin: &str) -> MapFile {
    let mut map = MapFile::new();

    for (lineno, raw) in content.lines().enumerate() {
        let lineno = lineno + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((key, value)) = line.split_once(':') else {
            log::warn!(
                "Invalid format at line {} in map file '{}'. Expected 'key:value', got '{}'.",
                lineno,
                origin,
                line
            );
            continue;
        };
        let key = key.trim();
        let values: Vec<String> = value
            .split(',')
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .collect();
        if key.is_empty() || values.is_empty() {
            log::warn!(
                "Invalid format at line {} in map file '{}'. Expected 'key:value', got '{}'.",
                lineno,
                origin,
                line
            );
            continue;
        }

        if let Some(existing) = map.get_mut(key) {
            log::warn!(
                "Duplicate key {} at line {} in map file '{}'.",
                key,
                lineno,
                origin
            );
            existing.extend(values);
        } else {
            map.insert(key.to_string(), values);
        }
    }

    // Final pass to drop duplicate values, preserving first-seen order.
    for (key, values) in map.iter_mut() {
        let before = values.len();
        let mut deduped: Vec<String> = Vec::with_capacity(before);
        for value in values.drain(..) {
            if !deduped.contains(&value) {
                deduped.push(value);
            }
        }
        if deduped.len() != before {
            log::warn!("Ignoring duplicate values for key '{}' in map file '{}'.", key, origin);
        }
        *values = deduped;
    }
    map
}

pub fn read_map_file(path: &Path) -> Result<MapFile, ZabError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        ZabError::Config(format!("unable to read map file {}: {}", path.display(), e))
    })?;
    Ok(parse_map(&content, &path.display().to_string()))
}

/// Renders a map back to the file format `parse_map` accepts. Parsing the
/// result yields the original mapping.
pub fn serialize_map(map: &MapFile) -> String {
    let mut out = String::new();
    for (key, values) in map {
        out.push_str(key);
        out.push(':');
        out.push_str(&values.join(","));
        out.push('\n');
    }
    out
}

/// Replaces everything up to and including the first `separator` in `text`
/// with `prefix`. Returns `None` when there is nothing after the separator.
pub fn with_prefix(text: &str, prefix: &str, separator: &str) -> Option<String> {
    if text.is_empty() || prefix.is_empty() || separator.is_empty() {
        return None;
    }
    let (_, suffix) = text.split_once(separator)?;
    if suffix.is_empty() {
        return None;
    }
    Some(format!("{}{}", prefix, suffix))
}

/// Applies `with_prefix` to every value in the mapping, returning a new
/// mapping. Values that cannot be rewritten are dropped with a warning.
pub fn mapping_values_with_prefix(map: &MapFile, prefix: &str) -> MapFile {
    let mut out = MapFile::new();
    for (key, values) in map {
        let mut new_values = Vec::with_capacity(values.len());
        for value in values {
            match with_prefix(value, prefix, "-") {
                Some(new_value) => new_values.push(new_value),
                None => {
                    log::warn!("Unable to replace prefix in '{}' with '{}'", value, prefix);
                }
            }
        }
        out.insert(key.clone(), new_values);
    }
    out
}
