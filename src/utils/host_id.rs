use crate::constants::limits::{MAX_PORT, MIN_PORT};
use crate::errors::KenshoError;

pub fn parse_port(raw: &str) -> Result<u16, KenshoError> {
    let trimmed = raw.trim();
    let port = trimmed
        .parse::<u32>()
        .map_err(|_| KenshoError::invalid_params(format!("<{}> is not a valid port", trimmed)))?;
    if port < u32::from(MIN_PORT) || port > u32::from(MAX_PORT) {
        return Err(KenshoError::invalid_params(format!(
            "Port {} is outside {}..={}",
            port, MIN_PORT, MAX_PORT
        )));
    }
    Ok(port as u16)
}

/// Trims a HostID and rejects blank or multi-line values. Every store keys on the result.
pub fn normalize_host_id(host_id: &str) -> Result<String, KenshoError> {
    let trimmed = host_id.trim();
    if trimmed.is_empty() {
        return Err(KenshoError::invalid_params("Host id must be non-empty"));
    }
    if trimmed.contains(['\n', '\r']) {
        return Err(KenshoError::invalid_params("Host id must be a single line"));
    }
    Ok(trimmed.to_string())
}

/// Canonical `host:port` identifier; IPv6 literals are bracketed.
pub fn join_host_port(host: &str, port: u16) -> Result<String, KenshoError> {
    let host = host.trim().trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() || host.chars().any(|c| c.is_whitespace()) {
        return Err(KenshoError::invalid_params("Host must be a non-empty name or IP"));
    }
    if port < MIN_PORT {
        return Err(KenshoError::invalid_params("Port must be at least 1"));
    }
    if host.contains(':') {
        return Ok(format!("[{}]:{}", host, port));
    }
    Ok(format!("{}:{}", host, port))
}

/// Splits a HostID back into host and port.
pub fn split_host_port(host_id: &str) -> Result<(String, u16), KenshoError> {
    let trimmed = host_id.trim();
    let (host, port) = if let Some(rest) = trimmed.strip_prefix('[') {
        let (host, tail) = rest.split_once(']').ok_or_else(|| {
            KenshoError::invalid_params(format!("Malformed host id <{}>", host_id))
        })?;
        let port = tail.strip_prefix(':').ok_or_else(|| {
            KenshoError::invalid_params(format!("Host id <{}> is missing a port", host_id))
        })?;
        (host, port)
    } else {
        trimmed.rsplit_once(':').ok_or_else(|| {
            KenshoError::invalid_params(format!("Host id <{}> is missing a port", host_id))
        })?
    };
    if host.is_empty() {
        return Err(KenshoError::invalid_params(format!(
            "Host id <{}> is missing a host",
            host_id
        )));
    }
    Ok((host.to_string(), parse_port(port)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_ipv4_and_ipv6() {
        assert_eq!(join_host_port("10.0.0.5", 22).unwrap(), "10.0.0.5:22");
        assert_eq!(join_host_port("::1", 2222).unwrap(), "[::1]:2222");
        assert_eq!(join_host_port("[fe80::1]", 22).unwrap(), "[fe80::1]:22");
    }

    #[test]
    fn split_inverts_join() {
        assert_eq!(
            split_host_port("10.0.0.5:22").unwrap(),
            ("10.0.0.5".to_string(), 22)
        );
        assert_eq!(split_host_port("[::1]:2222").unwrap(), ("::1".to_string(), 2222));
        assert!(split_host_port("10.0.0.5").is_err());
        assert!(split_host_port(":22").is_err());
    }

    #[test]
    fn normalizes_host_ids() {
        assert_eq!(normalize_host_id(" 10.0.0.5:22 ").unwrap(), "10.0.0.5:22");
        assert!(normalize_host_id("   ").is_err());
        assert!(normalize_host_id("a:22\nb:22").is_err());
    }

    #[test]
    fn rejects_bad_ports() {
        assert!(parse_port("0").is_err());
        assert!(parse_port("65536").is_err());
        assert!(parse_port("ssh").is_err());
        assert_eq!(parse_port(" 8282 ").unwrap(), 8282);
    }
}
