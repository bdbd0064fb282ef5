//! Front matter extraction.
//!
//! A document may open with a YAML block fenced by `---` lines. Missing
//! front matter is not an error; a fenced block that cannot be read is.

use crate::node::{MetaValue, Metadata};
use crate::IndexerError;
use std::collections::BTreeMap;

const OPEN_MARKER: &str = "---";
const CLOSE_MARKERS: [&str; 2] = ["---", "..."];

/// Result of splitting a document.
#[derive(Debug, Clone, PartialEq)]
pub struct FrontMatter {
    pub metadata: Metadata,
    pub body: String,
}

/// Split `input` into metadata and body text.
///
/// `path` is only used for error reporting.
pub fn split(path: &str, input: &str) -> Result<FrontMatter, IndexerError> {
    let input = input.strip_prefix('\u{feff}').unwrap_or(input);

    let Some((yaml, body)) = fenced_block(input) else {
        return Ok(FrontMatter {
            metadata: Metadata::new(),
            body: input.to_string(),
        });
    };

    let yaml = yaml.ok_or_else(|| IndexerError::MalformedFrontMatter {
        path: path.to_string(),
        message: "missing closing marker".to_string(),
    })?;

    let metadata = parse_metadata(yaml).map_err(|message| IndexerError::MalformedFrontMatter {
        path: path.to_string(),
        message,
    })?;

    Ok(FrontMatter {
        metadata,
        body: body.to_string(),
    })
}

/// Locate the fenced block.
///
/// Returns `None` when the input does not open with a marker, and
/// `Some((None, _))` when the block never closes.
fn fenced_block(input: &str) -> Option<(Option<&str>, &str)> {
    let first_end = input.find('\n').unwrap_or(input.len());
    if input[..first_end].trim_end() != OPEN_MARKER {
        return None;
    }

    let block_start = (first_end + 1).min(input.len());
    let mut offset = block_start;
    for line in input[block_start..].split_inclusive('\n') {
        if CLOSE_MARKERS.contains(&line.trim_end()) {
            let yaml = &input[block_start..offset];
            let body = &input[offset + line.len()..];
            return Some((Some(yaml), body));
        }
        offset += line.len();
    }

    Some((None, input))
}

fn parse_metadata(yaml: &str) -> Result<Metadata, String> {
    if yaml.trim().is_empty() {
        return Ok(Metadata::new());
    }

    let value: serde_yaml::Value = serde_yaml::from_str(yaml).map_err(|e| e.to_string())?;
    match value {
        serde_yaml::Value::Null => Ok(Metadata::new()),
        serde_yaml::Value::Mapping(map) => Ok(map
            .into_iter()
            .filter_map(|(k, v)| key_string(k).map(|k| (k, coerce(v))))
            .collect()),
        other => Err(format!("expected a mapping, found {}", kind_of(&other))),
    }
}

/// Best-effort conversion of a YAML value.
fn coerce(value: serde_yaml::Value) -> MetaValue {
    match value {
        serde_yaml::Value::Null => MetaValue::Null,
        serde_yaml::Value::Bool(b) => MetaValue::Bool(b),
        serde_yaml::Value::Number(n) => n
            .as_f64()
            .map(MetaValue::Number)
            .unwrap_or_else(|| MetaValue::String(n.to_string())),
        serde_yaml::Value::String(s) => MetaValue::String(s),
        serde_yaml::Value::Sequence(items) => {
            MetaValue::Array(items.into_iter().map(coerce).collect())
        }
        serde_yaml::Value::Mapping(map) => MetaValue::Map(
            map.into_iter()
                .filter_map(|(k, v)| key_string(k).map(|k| (k, coerce(v))))
                .collect::<BTreeMap<_, _>>(),
        ),
        serde_yaml::Value::Tagged(tagged) => coerce(tagged.value),
    }
}

fn key_string(key: serde_yaml::Value) -> Option<String> {
    match key {
        serde_yaml::Value::String(s) => Some(s),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn kind_of(value: &serde_yaml::Value) -> &'static str {
    match value {
        serde_yaml::Value::Null => "null",
        serde_yaml::Value::Bool(_) => "a boolean",
        serde_yaml::Value::Number(_) => "a number",
        serde_yaml::Value::String(_) => "a string",
        serde_yaml::Value::Sequence(_) => "a sequence",
        serde_yaml::Value::Mapping(_) => "a mapping",
        serde_yaml::Value::Tagged(_) => "a tagged value",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_front_matter() {
        let fm = split("a.md", "# Hello\n\nworld").unwrap();
        assert!(fm.metadata.is_empty());
        assert_eq!(fm.body, "# Hello\n\nworld");
    }

    #[test]
    fn test_basic_front_matter() {
        let input = "---\ntitle: Intro\norder: 2\ndraft: false\ntags: [a, b]\n---\n# Body\n";
        let fm = split("a.md", input).unwrap();

        assert_eq!(fm.metadata.get("title"), Some(&MetaValue::from("Intro")));
        assert_eq!(fm.metadata.get("order"), Some(&MetaValue::Number(2.0)));
        assert_eq!(fm.metadata.get("draft"), Some(&MetaValue::Bool(false)));
        assert_eq!(
            fm.metadata.get("tags"),
            Some(&MetaValue::Array(vec!["a".into(), "b".into()]))
        );
        assert_eq!(fm.body, "# Body\n");
    }

    #[test]
    fn test_empty_block() {
        let fm = split("a.md", "---\n---\nbody").unwrap();
        assert!(fm.metadata.is_empty());
        assert_eq!(fm.body, "body");
    }

    #[test]
    fn test_crlf_and_bom() {
        let input = "\u{feff}---\r\ntitle: X\r\n---\r\nbody";
        let fm = split("a.md", input).unwrap();
        assert_eq!(fm.metadata.get("title"), Some(&MetaValue::from("X")));
        assert_eq!(fm.body, "body");
    }

    #[test]
    fn test_nested_mapping_is_kept() {
        let input = "---\nnavigation:\n  title: Short\n---\n";
        let fm = split("a.md", input).unwrap();
        let nav = fm.metadata.get("navigation").unwrap();
        match nav {
            MetaValue::Map(map) => assert_eq!(map.get("title"), Some(&MetaValue::from("Short"))),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unparseable_block_is_malformed() {
        let input = "---\ntitle: [unclosed\n---\nbody";
        let err = split("bad.md", input).unwrap_err();
        assert!(matches!(err, IndexerError::MalformedFrontMatter { ref path, .. } if path == "bad.md"));
    }

    #[test]
    fn test_non_mapping_is_malformed() {
        let err = split("a.md", "---\n- a\n- b\n---\n").unwrap_err();
        assert!(matches!(err, IndexerError::MalformedFrontMatter { .. }));
    }

    #[test]
    fn test_unclosed_block_is_malformed() {
        let err = split("a.md", "---\ntitle: X\nno end").unwrap_err();
        assert!(matches!(err, IndexerError::MalformedFrontMatter { .. }));
    }

    #[test]
    fn test_marker_must_be_first_line() {
        let fm = split("a.md", "intro\n---\ntitle: X\n---\n").unwrap();
        assert!(fm.metadata.is_empty());
    }
}
