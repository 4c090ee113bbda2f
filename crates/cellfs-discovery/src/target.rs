//! Logical target names: `cellfs://[host@]service[/path]`.

use std::fmt;
use std::str::FromStr;

use crate::constants::TARGET_SCHEME;
use crate::error::DiscoveryError;

/// A parsed discovery target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    /// Only addresses announced by this hostname match, if set.
    pub host: Option<String>,
    /// Service name as announced.
    pub service: String,
    /// Path selector, always starting with `/`. `/` when absent.
    pub path: String,
}

impl Target {
    /// Target for `service` on any host.
    pub fn service(service: impl Into<String>) -> Self {
        Self {
            host: None,
            service: service.into(),
            path: "/".to_string(),
        }
    }

    /// Restrict to one host.
    pub fn on_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }
}

impl FromStr for Target {
    type Err = DiscoveryError;

    /// Accepts `cellfs://svc`, `cellfs://host@svc/path` and the
    /// triple-slash form `cellfs:///svc`. The scheme may be omitted.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = match s.split_once("://") {
            Some((scheme, rest)) if scheme == TARGET_SCHEME => rest,
            Some((scheme, _)) => {
                return Err(DiscoveryError::invalid_target(
                    s,
                    format!("unsupported scheme {scheme:?}"),
                ));
            }
            None => s,
        };
        let rest = rest.trim_start_matches('/');

        let (endpoint, path) = match rest.find('/') {
            Some(i) => (&rest[..i], &rest[i..]),
            None => (rest, "/"),
        };

        let (host, service) = match endpoint.split_once('@') {
            Some((host, service)) => {
                if host.is_empty() {
                    return Err(DiscoveryError::invalid_target(s, "empty host"));
                }
                (Some(host.to_string()), service)
            }
            None => (None, endpoint),
        };
        if service.is_empty() {
            return Err(DiscoveryError::invalid_target(s, "empty service name"));
        }
        if service.contains('@') {
            return Err(DiscoveryError::invalid_target(s, "more than one '@'"));
        }

        Ok(Target {
            host,
            service: service.to_string(),
            path: path.to_string(),
        })
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{TARGET_SCHEME}://")?;
        if let Some(host) = &self.host {
            write!(f, "{host}@")?;
        }
        write!(f, "{}", self.service)?;
        if self.path != "/" {
            write!(f, "{}", self.path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_forms() {
        let t: Target = "cellfs://cellfs.FS".parse().unwrap();
        assert_eq!(t, Target::service("cellfs.FS"));

        let t: Target = "cellfs://alpha@cellfs.FS/projects/a".parse().unwrap();
        assert_eq!(t.host.as_deref(), Some("alpha"));
        assert_eq!(t.service, "cellfs.FS");
        assert_eq!(t.path, "/projects/a");

        let t: Target = "cellfs:///cellfs.FS".parse().unwrap();
        assert_eq!(t.service, "cellfs.FS");

        let t: Target = "cellfs.FS".parse().unwrap();
        assert_eq!(t.service, "cellfs.FS");
    }

    #[test]
    fn test_parse_errors() {
        assert!("http://x".parse::<Target>().is_err());
        assert!("cellfs://".parse::<Target>().is_err());
        assert!("cellfs://@svc".parse::<Target>().is_err());
        assert!("cellfs://a@b@c".parse::<Target>().is_err());
    }

    #[test]
    fn test_display() {
        let t = Target::service("svc").on_host("alpha");
        assert_eq!(t.to_string(), "cellfs://alpha@svc");
    }
}
