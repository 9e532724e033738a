//! Candidate file resolution under a document root.
//!
//! # Responsibilities
//! - Expand `/` into the vhost's index files, in order
//! - Map a URL path onto the document root without escaping it
//! - Pick the first candidate that exists and is not a directory

use std::path::{Component, Path, PathBuf};

use crate::routing::registry::VirtualHost;

/// A candidate that exists on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    /// URL-side name, e.g. `/index.php` or `index.html`.
    pub name: String,
    /// Filesystem path under the document root.
    pub file: PathBuf,
}

/// URL-side names to try for `path`, in order.
pub fn candidates(path: &str, vhost: &VirtualHost) -> Vec<String> {
    if path == "/" {
        vhost.index.clone()
    } else {
        vec![path.to_string()]
    }
}

/// Join `url_path` onto `root`, refusing `..`, prefixes, and absolute components.
pub fn map_path(root: &Path, url_path: &str) -> Option<PathBuf> {
    let mut pb = root.to_path_buf();
    for comp in Path::new(url_path.trim_start_matches('/')).components() {
        match comp {
            Component::Normal(s) => pb.push(s),
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(pb)
}

/// True when `path` exists and is not a directory.
pub async fn is_servable(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| !m.is_dir())
        .unwrap_or(false)
}

/// First candidate for `path` that exists under the vhost's root.
pub async fn first_existing(path: &str, vhost: &VirtualHost) -> Option<Resolved> {
    for name in candidates(path, vhost) {
        let Some(file) = map_path(&vhost.root, &name) else {
            tracing::debug!(candidate = %name, "Candidate escapes document root");
            continue;
        };
        if is_servable(&file).await {
            return Some(Resolved { name, file });
        }
    }
    None
}
