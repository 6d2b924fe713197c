//! Image-reference rewriting for extracted markdown.
//!
//! OCR engines emit image assets next to the markdown and reference them by
//! bare name (`![](_page_12_fig_1.jpeg)`), while the pipeline keeps all
//! assets under a fixed `images/` subdirectory so chapters in sibling
//! directories (translations) can share one asset tree. This pass rewrites
//! the references to match. It is idempotent: a reference already prefixed
//! with the images directory starts with `images/`, not `_page_`, and so
//! never matches the pattern a second time.

use crate::error::BookmillError;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::path::Path;
use tracing::info;

/// Matches `![alt](_page_NN...)` references that still point at the bare
/// engine-emitted asset name.
static RE_BARE_IMAGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"!\[([^\]]*)\]\((_page_\d+[^)]+)\)").unwrap());

/// Rewrite bare image references in `content` to point into `images_dir`.
///
/// Returns the rewritten content and the number of references fixed.
pub fn rewrite_image_refs(content: &str, images_dir: &str) -> (String, usize) {
    let count = RE_BARE_IMAGE.find_iter(content).count();
    if count == 0 {
        return (content.to_string(), 0);
    }

    let fixed = RE_BARE_IMAGE
        .replace_all(content, |caps: &Captures<'_>| {
            format!("![{}]({}/{})", &caps[1], images_dir, &caps[2])
        })
        .to_string();

    (fixed, count)
}

/// Rewrite bare image references in the markdown file at `md_path` in place.
///
/// Returns the number of references fixed; a file with nothing to fix is
/// left untouched (no rewrite, no mtime churn).
pub fn rewrite_image_paths(md_path: &Path, images_dir: &str) -> Result<usize, BookmillError> {
    let content = std::fs::read_to_string(md_path).map_err(|e| BookmillError::ReadFailed {
        path: md_path.to_path_buf(),
        source: e,
    })?;

    let (fixed, count) = rewrite_image_refs(&content, images_dir);
    if count == 0 {
        return Ok(0);
    }

    std::fs::write(md_path, fixed).map_err(|e| BookmillError::OutputWriteFailed {
        path: md_path.to_path_buf(),
        source: e,
    })?;

    info!("Fixed {count} image paths in {}", md_path.display());
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_bare_references() {
        let content = "text\n![](_page_3_fig_1.jpeg)\n![Figure 2](_page_4_pic_0.png)\n";
        let (fixed, count) = rewrite_image_refs(content, "images");
        assert_eq!(count, 2);
        assert!(fixed.contains("![](images/_page_3_fig_1.jpeg)"));
        assert!(fixed.contains("![Figure 2](images/_page_4_pic_0.png)"));
    }

    #[test]
    fn already_prefixed_references_untouched() {
        let content = "![](images/_page_3_fig_1.jpeg)";
        let (fixed, count) = rewrite_image_refs(content, "images");
        assert_eq!(count, 0);
        assert_eq!(fixed, content);
    }

    #[test]
    fn rewrite_is_idempotent() {
        let content = "![x](_page_1_f.png)";
        let (once, _) = rewrite_image_refs(content, "images");
        let (twice, count) = rewrite_image_refs(&once, "images");
        assert_eq!(count, 0);
        assert_eq!(once, twice);
    }

    #[test]
    fn unrelated_links_untouched() {
        let content = "[a link](https://example.org)\n![external](https://example.org/x.png)";
        let (fixed, count) = rewrite_image_refs(content, "images");
        assert_eq!(count, 0);
        assert_eq!(fixed, content);
    }

    #[test]
    fn file_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let md = dir.path().join("book.md");
        std::fs::write(&md, "![](_page_1_a.jpeg) and ![](_page_2_b.jpeg)").unwrap();

        let count = rewrite_image_paths(&md, "images").unwrap();
        assert_eq!(count, 2);
        let content = std::fs::read_to_string(&md).unwrap();
        assert_eq!(content, "![](images/_page_1_a.jpeg) and ![](images/_page_2_b.jpeg)");

        // Second pass finds nothing.
        assert_eq!(rewrite_image_paths(&md, "images").unwrap(), 0);
    }
}
