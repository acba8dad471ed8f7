//! Entry page rewriting
//!
//! Bundlers emit root-relative asset URLs. Pages are served from a per-slug
//! prefix in the store, so those URLs are made absolute.

use std::path::Path;

use tracing::debug;

use crate::errors::PlatformError;

/// Attribute prefixes that are rewritten, with the path kept after the base
const PATTERNS: [(&str, &str); 3] = [
    ("src=\"/assets/", "src=\""),
    ("href=\"/assets/", "href=\""),
    ("href=\"/vite.svg\"", "href=\""),
];

/// Rewrite root-relative asset references to absolute URLs under `base_url`
pub fn rewrite_asset_urls(html: &str, base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let mut out = html.to_string();
    for (pattern, attribute) in PATTERNS {
        // keep everything after the attribute's opening quote, minus the leading slash
        let path = &pattern[attribute.len() + 1..];
        let replacement = format!("{}{}/{}", attribute, base, path);
        out = out.replace(pattern, &replacement);
    }
    out
}

/// Rewrite `<output_dir>/index.html` in place. Returns whether the file exists.
pub async fn rewrite_index(output_dir: &Path, base_url: &str) -> Result<bool, PlatformError> {
    let index = output_dir.join("index.html");
    let html = match tokio::fs::read_to_string(&index).await {
        Ok(html) => html,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    };

    let rewritten = rewrite_asset_urls(&html, base_url);
    if rewritten != html {
        debug!("Rewriting asset URLs in {}", index.display());
        tokio::fs::write(&index, rewritten).await?;
    }
    Ok(true)
}
