use anyhow::{Context, Result, bail};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Which sourceMappingURL comment shape a value belongs to.
///
/// Both shapes share the same leading syntax; the payload decides:
/// a `data:` URI means the map travels inside the comment, anything else
/// is a reference to a map living elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentKind {
    Inline,
    External,
}

/// Line form: `//# sourceMappingURL=<value>`, legacy `//@` accepted.
/// The value must be non-empty; a bare `sourceMappingURL=` never matches.
static LINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^//[#@][ \t]*sourceMappingURL=(\S+)[ \t]*\r?$").unwrap());

/// Block form: `/*# sourceMappingURL=<value> */`, as emitted for CSS.
static BLOCK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/\*[#@][ \t]*sourceMappingURL=([^\s*]+)[ \t]*\*/").unwrap());

struct Found<'a> {
    start: usize,
    end: usize,
    value: &'a str,
    block: bool,
}

fn kind_of(value: &str) -> CommentKind {
    if value.starts_with("data:") {
        CommentKind::Inline
    } else {
        CommentKind::External
    }
}

/// All sourceMappingURL comments in `contents`, in document order.
fn scan(contents: &str) -> Vec<Found<'_>> {
    let line = LINE_RE.captures_iter(contents).filter_map(|caps| {
        let whole = caps.get(0)?;
        let value = caps.get(1)?;
        Some(Found {
            start: whole.start(),
            end: whole.end(),
            value: value.as_str(),
            block: false,
        })
    });

    let block = BLOCK_RE.captures_iter(contents).filter_map(|caps| {
        let whole = caps.get(0)?;
        let value = caps.get(1)?;
        Some(Found {
            start: whole.start(),
            end: whole.end(),
            value: value.as_str(),
            block: true,
        })
    });

    let mut found: Vec<Found<'_>> = line.chain(block).collect();
    found.sort_by_key(|f| f.start);
    found
}

fn first_of(contents: &str, kind: CommentKind) -> Option<Found<'_>> {
    scan(contents).into_iter().find(|f| kind_of(f.value) == kind)
}

/// Test whether `contents` carries a sourceMappingURL comment of `kind`.
pub fn has_comment(contents: &str, kind: CommentKind) -> bool {
    first_of(contents, kind).is_some()
}

/// Value of the first comment of `kind`, if any.
///
/// `Some` always holds a non-empty string; an empty value is treated as
/// no comment at all.
pub fn comment_value(contents: &str, kind: CommentKind) -> Option<String> {
    first_of(contents, kind).map(|f| f.value.to_string())
}

/// Remove every comment of `kind` from `contents`.
pub fn strip_comment(contents: &str, kind: CommentKind) -> String {
    let mut out = String::with_capacity(contents.len());
    let mut pos = 0;

    for f in scan(contents) {
        if kind_of(f.value) == kind {
            out.push_str(&contents[pos..f.start]);
            pos = f.end;
        }
    }

    out.push_str(&contents[pos..]);
    out
}

/// Replace the first comment of `kind` with a freshly generated comment
/// carrying `value`, keeping the line/block style of the original.
pub fn set_comment_value(contents: &str, kind: CommentKind, value: &str) -> String {
    match first_of(contents, kind) {
        Some(f) => {
            let mut out = String::with_capacity(contents.len() + value.len());
            out.push_str(&contents[..f.start]);
            out.push_str(&generate_comment(value, f.block));
            out.push_str(&contents[f.end..]);
            out
        }
        None => contents.to_string(),
    }
}

/// Build a sourceMappingURL comment for `value`.
///
/// Always uses the modern `#` marker, regardless of what was matched.
pub fn generate_comment(value: &str, block: bool) -> String {
    if block {
        format!("/*# sourceMappingURL={value} */")
    } else {
        format!("//# sourceMappingURL={value}")
    }
}

/// The source map JSON object carried by an inline comment.
///
/// The `mappings` VLQ data is opaque to this crate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceMap {
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default)]
    pub names: Vec<String>,
    #[serde(default)]
    pub mappings: String,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(rename = "sourceRoot", default, skip_serializing_if = "Option::is_none")]
    pub source_root: Option<String>,
    #[serde(rename = "sourcesContent", default, skip_serializing_if = "Option::is_none")]
    pub sources_content: Option<Vec<String>>,
}

const DATA_URI_PREFIX: &str = "data:application/json;charset=utf-8;base64,";

/// Serialize `map` into a complete inline comment line.
pub fn to_inline_comment(map: &SourceMap) -> Result<String> {
    let json = serde_json::to_string(map).context("Failed to serialize source map")?;
    let value = format!("{DATA_URI_PREFIX}{}", BASE64.encode(json));

    Ok(generate_comment(&value, false))
}

/// Parse an inline comment value (a `data:` URI) back into a source map.
pub fn from_data_uri(value: &str) -> Result<SourceMap> {
    let Some(rest) = value.strip_prefix("data:") else {
        bail!("Not a data URI: {value}");
    };

    let Some((params, payload)) = rest.split_once(',') else {
        bail!("Data URI has no payload: {value}");
    };

    if !params.split(';').any(|p| p == "base64") {
        bail!("Unsupported data URI encoding: {params}");
    }

    let bytes = BASE64
        .decode(payload)
        .context("Failed to decode base64 source map payload")?;

    serde_json::from_slice(&bytes).context("Failed to parse source map JSON")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_comment_is_detected_and_classified() {
        let src = "run();\n//# sourceMappingURL=app.js.map\n";

        assert!(has_comment(src, CommentKind::External));
        assert!(!has_comment(src, CommentKind::Inline));
        assert_eq!(
            comment_value(src, CommentKind::External).as_deref(),
            Some("app.js.map")
        );
    }

    #[test]
    fn data_uri_payload_classifies_as_inline() {
        let src = "run();\n//# sourceMappingURL=data:application/json;base64,e30=\n";

        assert!(has_comment(src, CommentKind::Inline));
        assert!(!has_comment(src, CommentKind::External));
    }

    #[test]
    fn legacy_at_marker_is_recognized() {
        let src = "//@ sourceMappingURL=app.js.map\n";

        assert_eq!(
            comment_value(src, CommentKind::External).as_deref(),
            Some("app.js.map")
        );
    }

    #[test]
    fn empty_value_matches_nothing() {
        let src = "run();\n//# sourceMappingURL=\n";

        assert!(!has_comment(src, CommentKind::Inline));
        assert!(!has_comment(src, CommentKind::External));
    }

    #[test]
    fn strip_removes_only_the_requested_kind() {
        let src = "//# sourceMappingURL=data:application/json;base64,e30=\n\
                   //# sourceMappingURL=app.js.map\n";

        let out = strip_comment(src, CommentKind::External);

        assert!(has_comment(&out, CommentKind::Inline));
        assert!(!has_comment(&out, CommentKind::External));
    }

    #[test]
    fn rewrite_keeps_block_style() {
        let src = "body{}\n/*# sourceMappingURL=app.css.map */\n";
        let out = set_comment_value(src, CommentKind::External, "maps/app.css.map");

        assert_eq!(out, "body{}\n/*# sourceMappingURL=maps/app.css.map */\n");
    }

    #[test]
    fn rewrite_upgrades_legacy_marker() {
        let src = "//@ sourceMappingURL=app.js.map\n";
        let out = set_comment_value(src, CommentKind::External, "app.js.map");

        assert_eq!(out, "//# sourceMappingURL=app.js.map\n");
    }

    #[test]
    fn inline_comment_survives_a_decode() {
        let map = SourceMap {
            version: 3,
            file: Some("helloworld.js".to_string()),
            sources: vec!["helloworld.js".to_string()],
            ..Default::default()
        };

        let comment = to_inline_comment(&map).unwrap();
        let value = comment_value(&comment, CommentKind::Inline).unwrap();
        let decoded = from_data_uri(&value).unwrap();

        assert_eq!(decoded.version, 3);
        assert_eq!(decoded.file.as_deref(), Some("helloworld.js"));
        assert_eq!(decoded.sources, vec!["helloworld.js".to_string()]);
    }

    #[test]
    fn from_data_uri_rejects_plain_paths() {
        assert!(from_data_uri("app.js.map").is_err());
        assert!(from_data_uri("data:application/json;charset=utf-8,notbase64").is_err());
    }
}
