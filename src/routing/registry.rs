//! Virtual host lookup.
//!
//! # Responsibilities
//! - Store virtual hosts built from config
//! - Look up a host by exact name
//! - Fall back to the default host, reporting that no alias matched
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - O(1) host lookup via HashMap
//! - Lookup never fails: the fallback is a distinct variant, not an error

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{FastcgiConfig, GatewayConfig, VhostConfig};
use crate::fastcgi::Transport;

/// Responder endpoint for dynamic files of one vhost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upstream {
    pub transport: Transport,
    pub address: String,
    /// Extensions without the leading dot.
    pub extensions: Vec<String>,
}

impl From<&FastcgiConfig> for Upstream {
    fn from(cfg: &FastcgiConfig) -> Self {
        Self {
            transport: cfg.network,
            address: cfg.address.clone(),
            extensions: cfg
                .extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_string())
                .collect(),
        }
    }
}

/// A routing target: document root, index preferences, optional responder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualHost {
    pub names: Vec<String>,
    pub root: PathBuf,
    pub index: Vec<String>,
    pub upstream: Option<Upstream>,
}

impl VirtualHost {
    pub fn from_config(cfg: &VhostConfig) -> Self {
        Self {
            names: cfg.names.clone(),
            root: cfg.root.clone(),
            index: cfg.index.clone(),
            upstream: cfg.fastcgi.as_ref().map(Upstream::from),
        }
    }

    /// Name used in logs and metrics.
    pub fn label(&self) -> &str {
        self.names.first().map(String::as_str).unwrap_or("default")
    }

    /// The responder for `file` if its extension is proxied.
    pub fn upstream_for(&self, file: &str) -> Option<&Upstream> {
        let upstream = self.upstream.as_ref()?;
        let ext = Path::new(file).extension()?.to_str()?;
        upstream
            .extensions
            .iter()
            .any(|e| e.eq_ignore_ascii_case(ext))
            .then_some(upstream)
    }
}

/// Result of a host lookup.
#[derive(Debug, Clone)]
pub enum VhostLookup {
    /// A configured alias matched exactly.
    Matched(Arc<VirtualHost>),
    /// No alias matched; the default host applies.
    Fallback(Arc<VirtualHost>),
}

impl VhostLookup {
    pub fn host(&self) -> &Arc<VirtualHost> {
        match self {
            VhostLookup::Matched(h) | VhostLookup::Fallback(h) => h,
        }
    }

    pub fn into_host(self) -> Arc<VirtualHost> {
        match self {
            VhostLookup::Matched(h) | VhostLookup::Fallback(h) => h,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, VhostLookup::Fallback(_))
    }
}

/// Read-only registry of virtual hosts.
#[derive(Debug)]
pub struct VhostRegistry {
    by_name: HashMap<String, Arc<VirtualHost>>,
    default: Arc<VirtualHost>,
}

impl VhostRegistry {
    /// Build the registry. Later duplicates of a name lose to earlier ones.
    pub fn new(vhosts: &[VhostConfig], default: &VhostConfig) -> Self {
        let mut by_name = HashMap::new();
        for cfg in vhosts {
            let host = Arc::new(VirtualHost::from_config(cfg));
            for name in &cfg.names {
                by_name
                    .entry(name.clone())
                    .or_insert_with(|| Arc::clone(&host));
            }
        }
        Self {
            by_name,
            default: Arc::new(VirtualHost::from_config(default)),
        }
    }

    pub fn from_config(config: &GatewayConfig) -> Self {
        Self::new(&config.vhosts, &config.default_vhost)
    }

    /// Find the host serving `name`, falling back to the default host.
    pub fn lookup(&self, name: &str) -> VhostLookup {
        match self.by_name.get(name) {
            Some(host) => VhostLookup::Matched(Arc::clone(host)),
            None => VhostLookup::Fallback(Arc::clone(&self.default)),
        }
    }

    /// Number of distinct names registered.
    pub fn name_count(&self) -> usize {
        self.by_name.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> VhostRegistry {
        let site = VhostConfig {
            names: vec!["example.test".into(), "www.example.test".into()],
            root: PathBuf::from("/srv/example"),
            fastcgi: Some(FastcgiConfig {
                network: Transport::Tcp,
                address: "127.0.0.1:9000".into(),
                extensions: vec![".php".into()],
            }),
            ..VhostConfig::default()
        };
        let default = VhostConfig {
            root: PathBuf::from("/srv/default"),
            ..VhostConfig::default()
        };
        VhostRegistry::new(&[site], &default)
    }

    #[test]
    fn alias_matches_exactly() {
        let reg = registry();
        for name in ["example.test", "www.example.test"] {
            let found = reg.lookup(name);
            assert!(!found.is_fallback());
            assert_eq!(found.host().root, PathBuf::from("/srv/example"));
        }
        assert_eq!(reg.name_count(), 2);
    }

    #[test]
    fn unknown_name_falls_back() {
        let reg = registry();
        let found = reg.lookup("other.test");
        assert!(found.is_fallback());
        assert_eq!(found.into_host().root, PathBuf::from("/srv/default"));
        assert!(reg.lookup("EXAMPLE.TEST").is_fallback());
    }

    #[test]
    fn proxied_extension_detection() {
        let reg = registry();
        let host = reg.lookup("example.test").into_host();
        assert!(host.upstream_for("/index.php").is_some());
        assert!(host.upstream_for("/INDEX.PHP").is_some());
        assert!(host.upstream_for("/index.html").is_none());
        assert!(host.upstream_for("/php").is_none());

        let default = reg.lookup("nope").into_host();
        assert!(default.upstream_for("/index.php").is_none());
        assert_eq!(default.label(), "default");
    }
}
