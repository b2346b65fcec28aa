//! Compose URL guard.
//!
//! Compose URLs are operator-supplied and fetched from inside the cluster,
//! so they must never be allowed to reach cloud metadata endpoints or the
//! link-local range, whether named directly or via DNS.

use std::net::{IpAddr, Ipv4Addr, ToSocketAddrs};

use super::ConfigError;

/// Hostnames that always resolve to cloud metadata services.
const BLOCKED_HOSTS: &[&str] = &[
    "169.254.169.254",
    "169.254.170.2",
    "metadata.google.internal",
    "metadata.goog",
    "metadata.azure.com",
];

/// Validates a compose URL: http(s) scheme, a host, and no metadata or
/// link-local destination (literal or resolved).
///
/// # Errors
///
/// Returns [`ConfigError::InvalidUrl`] for malformed or non-http(s) URLs
/// and [`ConfigError::BlockedUrl`] for blocked destinations.
pub fn validate_compose_url(value: &str, name: &str) -> Result<(), ConfigError> {
    let parsed = url::Url::parse(value).map_err(|err| ConfigError::InvalidUrl {
        name: name.to_string(),
        reason: err.to_string(),
    })?;

    match parsed.scheme() {
        "http" | "https" => {}
        other => {
            return Err(ConfigError::InvalidUrl {
                name: name.to_string(),
                reason: format!("must be http or https URL, got {other:?}"),
            });
        }
    }

    let Some(host) = parsed.host_str() else {
        return Err(ConfigError::InvalidUrl {
            name: name.to_string(),
            reason: "must include scheme and host".to_string(),
        });
    };
    let host = host.trim_matches(['[', ']']).to_ascii_lowercase();

    if BLOCKED_HOSTS.contains(&host.as_str()) {
        return Err(ConfigError::BlockedUrl {
            name: name.to_string(),
            reason: format!("host {host:?} is a metadata endpoint"),
        });
    }

    if let Ok(addr) = host.parse::<IpAddr>() {
        if is_blocked_addr(addr) {
            return Err(ConfigError::BlockedUrl {
                name: name.to_string(),
                reason: format!("address {addr} is link-local"),
            });
        }
        return Ok(());
    }

    // Resolution failure is left for the fetcher to report; the guard only
    // rejects names it can positively tie to a blocked address.
    let port = parsed.port_or_known_default().unwrap_or(80);
    if let Ok(addrs) = (host.as_str(), port).to_socket_addrs() {
        for addr in addrs {
            if is_blocked_addr(addr.ip()) {
                return Err(ConfigError::BlockedUrl {
                    name: name.to_string(),
                    reason: format!("host {host:?} resolves to link-local {}", addr.ip()),
                });
            }
        }
    }

    Ok(())
}

fn is_blocked_addr(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => in_link_local(v4),
        IpAddr::V6(v6) => v6.to_ipv4_mapped().is_some_and(in_link_local),
    }
}

fn in_link_local(addr: Ipv4Addr) -> bool {
    addr.octets()[0] == 169 && addr.octets()[1] == 254
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_http_and_https() {
        assert!(validate_compose_url("https://config.example.com/stack.yml", "COMPOSE_URL").is_ok());
        assert!(validate_compose_url("http://10.0.0.5:8000/stack.yml", "COMPOSE_URL").is_ok());
    }

    #[test]
    fn rejects_non_http_schemes() {
        for url in ["ftp://example.com/x", "file:///etc/passwd", "unix:///var/run/x"] {
            assert!(matches!(
                validate_compose_url(url, "COMPOSE_URL"),
                Err(ConfigError::InvalidUrl { .. })
            ));
        }
    }

    #[test]
    fn rejects_metadata_hosts() {
        for url in [
            "http://169.254.169.254/latest/meta-data",
            "http://169.254.170.2/v2/credentials",
            "https://metadata.google.internal/computeMetadata/v1",
            "https://metadata.goog/computeMetadata/v1",
            "https://metadata.azure.com/metadata/instance",
        ] {
            assert!(matches!(
                validate_compose_url(url, "COMPOSE_URL"),
                Err(ConfigError::BlockedUrl { .. })
            ));
        }
    }

    #[test]
    fn rejects_link_local_range() {
        assert!(matches!(
            validate_compose_url("http://169.254.1.99/stack.yml", "COMPOSE_URL"),
            Err(ConfigError::BlockedUrl { .. })
        ));
        // Mapped v6 form of a link-local v4 address.
        assert!(matches!(
            validate_compose_url("http://[::ffff:169.254.1.99]/stack.yml", "COMPOSE_URL"),
            Err(ConfigError::BlockedUrl { .. })
        ));
    }

    #[test]
    fn rejects_malformed_urls() {
        assert!(validate_compose_url("not a url", "COMPOSE_URL").is_err());
        assert!(validate_compose_url("http://", "COMPOSE_URL").is_err());
    }
}
