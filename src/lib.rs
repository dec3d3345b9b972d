use std::fmt;
use std::path::PathBuf;

use tracing::debug;

pub mod comments;

use crate::comments::CommentKind;

/// An in-memory file travelling through a transform pipeline.
///
/// The rewrite stage only ever touches `contents`. `base` and `path` are
/// read so a mapping callback can branch on them, and `source_map` is
/// side-channel metadata that rides along untouched.
#[derive(Debug, Clone, Default)]
pub struct FileRecord {
    pub base: PathBuf,
    pub path: PathBuf,
    /// UTF-8 text buffer. `None` models a file whose contents are not
    /// buffered in memory; such files pass through unchanged.
    pub contents: Option<Vec<u8>>,
    pub source_map: Option<comments::SourceMap>,
}

/// Mapping callback: receives the current comment value and the file it
/// came from, and returns the replacement value. `None` or an empty string
/// means "drop the comment".
pub type MapFn = Box<dyn FnMut(&str, &FileRecord) -> Option<String>>;

/// Pipeline stage that rewrites or strips the sourceMappingURL comment of
/// each file handed to [`Rewriter::transform`].
pub struct Rewriter {
    map_fn: Option<MapFn>,
}

impl Rewriter {
    /// Stage with no mapping callback. Comment values pass through as-is,
    /// except that external values still get their separators canonicalized.
    pub fn new() -> Self {
        Self { map_fn: None }
    }

    /// Stage that passes each comment value through `map_fn`.
    pub fn with_map_fn(map_fn: impl FnMut(&str, &FileRecord) -> Option<String> + 'static) -> Self {
        Self {
            map_fn: Some(Box::new(map_fn)),
        }
    }

    /// Process one file in place.
    ///
    /// Files without buffered contents or without a recognizable comment
    /// pass through untouched, and a mapping result equal to the current
    /// value leaves the original buffer allocation alone. The callback runs
    /// at most once per file.
    pub fn transform(&mut self, file: &mut FileRecord) {
        let Some(bytes) = file.contents.as_deref() else {
            return;
        };
        let contents = String::from_utf8_lossy(bytes).into_owned();

        let has_inline = comments::has_comment(&contents, CommentKind::Inline);
        let has_external = comments::has_comment(&contents, CommentKind::External);

        if !has_inline && !has_external {
            return;
        }

        // An inline payload can itself contain path-like text, so it wins
        // whenever both forms appear present.
        let kind = if has_inline {
            CommentKind::Inline
        } else {
            CommentKind::External
        };

        let Some(current) = comments::comment_value(&contents, kind) else {
            return;
        };

        let mapped = match self.map_fn.as_mut() {
            Some(f) => f(&current, file),
            None => Some(current.clone()),
        };

        let candidate = match mapped {
            Some(v) if !v.is_empty() => v,
            _ => {
                debug!(path = %file.path.display(), "stripping sourceMappingURL comment");
                file.contents = Some(comments::strip_comment(&contents, kind).into_bytes());
                return;
            }
        };

        // Separator canonicalization only makes sense for path references;
        // inline payloads are opaque data and must round-trip exactly.
        let candidate = match kind {
            CommentKind::External => normalize_slashes(&candidate),
            CommentKind::Inline => candidate,
        };

        if candidate == current {
            return;
        }

        debug!(
            path = %file.path.display(),
            from = %current,
            to = %candidate,
            "rewriting sourceMappingURL comment"
        );
        file.contents = Some(comments::set_comment_value(&contents, kind, &candidate).into_bytes());
    }
}

impl Default for Rewriter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Rewriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rewriter")
            .field("has_map_fn", &self.map_fn.is_some())
            .finish()
    }
}

/// Rewriter that prepends `prefix` to every comment value, anchoring the
/// existing value under a single `/`.
///
/// Meant for external path references; applying it to a file with an inline
/// comment produces an overlong, malformed "path".
pub fn prefix(prefix: &str) -> Rewriter {
    let prefix = prefix.to_string();

    Rewriter::with_map_fn(move |url, _| Some(format!("{prefix}/{}", url.trim_start_matches('/'))))
}

/// Rewriter that drops whichever comment form is present.
pub fn remove() -> Rewriter {
    Rewriter::with_map_fn(|_, _| None)
}

/// Canonicalize path separators to forward slashes.
pub fn normalize_slashes(value: &str) -> String {
    value.replace('\\', "/")
}
