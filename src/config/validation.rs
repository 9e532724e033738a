//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Detect aliases claimed by more than one vhost
//! - Validate value ranges (limits > 0, addresses parse)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashMap;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::{GatewayConfig, VhostConfig};

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("listener.bind_address {0:?} is not a socket address")]
    BindAddress(String),

    #[error("listener.max_connections must be greater than zero")]
    MaxConnections,

    #[error("vhosts[{0}] has no names")]
    NoNames(usize),

    #[error("host name {name:?} is claimed by vhosts[{first}] and vhosts[{second}]")]
    DuplicateName {
        name: String,
        first: usize,
        second: usize,
    },

    #[error("{0}: fastcgi.address is empty")]
    EmptyUpstreamAddress(String),

    #[error("{0}: fastcgi.extensions is empty")]
    NoExtensions(String),

    #[error("limits.{0} must be greater than zero")]
    ZeroLimit(&'static str),
}

/// Check a parsed configuration, collecting every problem found.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress(
            config.listener.bind_address.clone(),
        ));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::MaxConnections);
    }

    let mut claimed: HashMap<&str, usize> = HashMap::new();
    for (i, vhost) in config.vhosts.iter().enumerate() {
        if vhost.names.is_empty() {
            errors.push(ValidationError::NoNames(i));
        }
        for name in &vhost.names {
            if let Some(&first) = claimed.get(name.as_str()) {
                if first != i {
                    errors.push(ValidationError::DuplicateName {
                        name: name.clone(),
                        first,
                        second: i,
                    });
                }
            } else {
                claimed.insert(name.as_str(), i);
            }
        }
        check_upstream(&format!("vhosts[{i}]"), vhost, &mut errors);
    }
    check_upstream("default_vhost", &config.default_vhost, &mut errors);

    if config.limits.max_header_bytes == 0 {
        errors.push(ValidationError::ZeroLimit("max_header_bytes"));
    }
    if config.limits.max_body_size == 0 {
        errors.push(ValidationError::ZeroLimit("max_body_size"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_upstream(label: &str, vhost: &VhostConfig, errors: &mut Vec<ValidationError>) {
    if let Some(fcgi) = &vhost.fastcgi {
        if fcgi.address.trim().is_empty() {
            errors.push(ValidationError::EmptyUpstreamAddress(label.to_string()));
        }
        if fcgi.extensions.is_empty() {
            errors.push(ValidationError::NoExtensions(label.to_string()));
        }
    }
}
