//! Public URL construction for stored assets.

use axum::http::{header, HeaderMap};

use crate::config::MEDIA_PREFIX;

/// Bind addresses that are valid for listening but unreachable for clients
const WILDCARD_HOSTS: &[&str] = &["0.0.0.0", "::", "[::]"];

/// Where a request came from, as far as URL building is concerned
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestOrigin {
    /// Effective host including any port, e.g. `192.168.1.20:8000`
    pub host: Option<String>,
    pub scheme: Option<String>,
}

impl RequestOrigin {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: Some(host.into()),
            scheme: None,
        }
    }

    /// Read `X-Forwarded-Host`/`Host` and `X-Forwarded-Proto`
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let header_str = |name: &str| {
            headers
                .get(name)
                .and_then(|h| h.to_str().ok())
                .map(|s| s.split(',').next().unwrap_or(s).trim().to_string())
                .filter(|s| !s.is_empty())
        };

        let host = header_str("x-forwarded-host").or_else(|| header_str(header::HOST.as_str()));
        let scheme = header_str("x-forwarded-proto");
        Self { host, scheme }
    }
}

/// The configured public base address, split into parts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicBase {
    scheme: String,
    host: String,
    port: Option<u16>,
    path: String,
}

impl PublicBase {
    /// Parse `scheme://host[:port][/path]`. A missing scheme means http.
    pub fn parse(base: &str) -> Result<Self, String> {
        let base = base.trim().trim_end_matches('/');
        let (scheme, rest) = match base.split_once("://") {
            Some((scheme, rest)) => (scheme.to_ascii_lowercase(), rest),
            None => ("http".to_string(), base),
        };

        let (authority, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], rest[idx..].to_string()),
            None => (rest, String::new()),
        };
        if authority.is_empty() {
            return Err(format!("missing host in base url '{}'", base));
        }

        let (host, port) = split_host_port(authority)?;
        Ok(Self {
            scheme,
            host,
            port,
            path,
        })
    }

    pub fn is_wildcard(&self) -> bool {
        WILDCARD_HOSTS.contains(&self.host.as_str())
    }

    /// Base address as seen by the client that sent `origin`
    pub fn base_for(&self, origin: &RequestOrigin) -> String {
        if !self.is_wildcard() {
            return format!("{}://{}{}", self.scheme, self.authority(&self.host), self.path);
        }

        let scheme = origin.scheme.as_deref().unwrap_or(&self.scheme);
        match origin.host.as_deref().map(reachable_host) {
            // The Host header already carries the port the client dialled
            Some(host) => format!("{}://{}{}", scheme, host, self.path),
            None => format!("{}://{}{}", scheme, self.authority("localhost"), self.path),
        }
    }

    /// Absolute URL for a relative storage path
    pub fn media_url(&self, origin: &RequestOrigin, relative_path: &str) -> String {
        format!(
            "{}{}/{}",
            self.base_for(origin),
            MEDIA_PREFIX,
            encode_path(relative_path)
        )
    }

    fn authority(&self, host: &str) -> String {
        match self.port {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        }
    }
}

fn split_host_port(authority: &str) -> Result<(String, Option<u16>), String> {
    // Bracketed IPv6 literal
    if authority.starts_with('[') {
        let end = authority
            .find(']')
            .ok_or_else(|| format!("unterminated IPv6 literal '{}'", authority))?;
        let host = authority[..=end].to_string();
        let port = match authority[end + 1..].strip_prefix(':') {
            Some(p) => Some(p.parse().map_err(|_| format!("invalid port '{}'", p))?),
            None => None,
        };
        return Ok((host, port));
    }

    match authority.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => {
            let port = port.parse().map_err(|_| format!("invalid port '{}'", port))?;
            Ok((host.to_string(), Some(port)))
        }
        // Bare IPv6 without brackets, e.g. "::"
        Some(_) => Ok((authority.to_string(), None)),
        None => Ok((authority.to_string(), None)),
    }
}

/// Request host with a wildcard address swapped for `localhost`
fn reachable_host(host: &str) -> String {
    match split_host_port(host) {
        Ok((name, port)) if WILDCARD_HOSTS.contains(&name.as_str()) => match port {
            Some(port) => format!("localhost:{}", port),
            None => "localhost".to_string(),
        },
        _ => host.to_string(),
    }
}

/// Percent-encode each path segment, keeping `/` separators
pub fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
