//! Data model for `spec.md` §3/§4.E: `IngressRule`, `ServiceDescriptor` and
//! `RuleSet`. These are plain, immutable value types; matching lives in
//! [`crate::ingress_router`] and atomic install lives in
//! [`crate::orchestrator`].

use std::path::PathBuf;
use std::time::Duration;

use ferrule_core::error::{codes, CoreError, ErrorKind};
use regex::Regex;

/// Hostname matcher for an [`IngressRule`] (`spec.md` §4.E).
///
/// Patterns allow at most one `*`, and only as the leftmost label:
/// `*.example.com` is valid, `foo.*.com` and `*foo.com` are not.
#[derive(Clone, Debug)]
pub enum HostnamePattern {
    Exact(String),
    /// Empty hostname or bare `*`; matches anything.
    CatchAll,
    /// `*.suffix`; matches `suffix` itself or any label prefix of it.
    Suffix(String),
}

impl HostnamePattern {
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        if raw.is_empty() || raw == "*" {
            return Ok(HostnamePattern::CatchAll);
        }
        if let Some(suffix) = raw.strip_prefix("*.") {
            if suffix.contains('*') {
                return Err(invalid(format!("hostname pattern `{raw}` has more than one `*`")));
            }
            return Ok(HostnamePattern::Suffix(suffix.to_string()));
        }
        if raw.contains('*') {
            return Err(invalid(format!(
                "hostname pattern `{raw}` may only use `*` as the leftmost label, as `*.suffix`"
            )));
        }
        Ok(HostnamePattern::Exact(raw.to_string()))
    }

    pub fn matches(&self, hostname: &str) -> bool {
        match self {
            HostnamePattern::CatchAll => true,
            HostnamePattern::Exact(pattern) => pattern == hostname,
            HostnamePattern::Suffix(suffix) => {
                hostname == suffix || hostname.ends_with(&format!(".{suffix}"))
            }
        }
    }

    pub fn is_catch_all(&self) -> bool {
        matches!(self, HostnamePattern::CatchAll)
    }
}

impl PartialEq for HostnamePattern {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (HostnamePattern::CatchAll, HostnamePattern::CatchAll) => true,
            (HostnamePattern::Exact(a), HostnamePattern::Exact(b)) => a == b,
            (HostnamePattern::Suffix(a), HostnamePattern::Suffix(b)) => a == b,
            _ => false,
        }
    }
}

/// Where a matched request is forwarded (`spec.md` §3 `ServiceDescriptor`).
#[derive(Clone, Debug, PartialEq)]
pub enum ServiceDescriptor {
    HttpUrl(String),
    HttpsUrl(String),
    UnixSocket(PathBuf),
    HelloWorld,
    /// Destination supplied per-request by the edge via a `jump-destination`
    /// preamble header.
    TcpAny,
    Socks5,
    Bastion(BastionTarget),
    Management,
    ReservedDns,
}

/// A bastion URI (`ssh://`, `rdp://`, `smb://`, `tcp://`) resolved to a host
/// and default port (`spec.md` §6).
#[derive(Clone, Debug, PartialEq)]
pub struct BastionTarget {
    pub host: String,
    pub port: u16,
}

impl BastionTarget {
    /// Parses one of the bastion URI schemes, applying the scheme's default
    /// port when the authority omits one.
    pub fn parse(uri: &str) -> Result<Self, CoreError> {
        let (scheme, default_port) = if let Some(rest) = uri.strip_prefix("ssh://") {
            (rest, 22)
        } else if let Some(rest) = uri.strip_prefix("rdp://") {
            (rest, 3389)
        } else if let Some(rest) = uri.strip_prefix("smb://") {
            (rest, 445)
        } else if let Some(rest) = uri.strip_prefix("tcp://") {
            (rest, 7864)
        } else {
            return Err(invalid(format!("`{uri}` is not a recognized bastion URI")));
        };

        match scheme.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() => {
                let port: u16 = port
                    .parse()
                    .map_err(|_| invalid(format!("`{uri}` has an invalid port")))?;
                Ok(BastionTarget { host: host.to_string(), port })
            }
            _ => Ok(BastionTarget { host: scheme.to_string(), port: default_port }),
        }
    }
}

/// Per-rule or tunnel-wide origin request overrides (`spec.md` §4.D).
#[derive(Clone, Debug, PartialEq)]
pub struct OriginRequestDefaults {
    pub host_header: Option<String>,
    pub tls_server_name: Option<String>,
    pub no_tls_verify: bool,
    pub ca_pool_path: Option<PathBuf>,
    pub disable_chunked_encoding: bool,
    pub connect_timeout: Duration,
    pub keepalive_connections: usize,
    pub keepalive_timeout: Duration,
}

impl Default for OriginRequestDefaults {
    fn default() -> Self {
        Self {
            host_header: None,
            tls_server_name: None,
            no_tls_verify: false,
            ca_pool_path: None,
            disable_chunked_encoding: false,
            connect_timeout: Duration::from_secs(30),
            keepalive_connections: 100,
            keepalive_timeout: Duration::from_secs(90),
        }
    }
}

/// Warp-routing (L4) configuration carried alongside the ingress list
/// (`spec.md` §3 `RuleSet`).
#[derive(Clone, Debug, PartialEq)]
pub struct WarpRoutingConfig {
    pub enabled: bool,
    pub write_timeout: Duration,
    pub tcp_keepalive: Duration,
}

impl Default for WarpRoutingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            write_timeout: Duration::from_secs(5),
            tcp_keepalive: Duration::from_secs(30),
        }
    }
}

/// One entry in an ingress list (`spec.md` §3/§4.E).
#[derive(Clone, Debug)]
pub struct IngressRule {
    pub hostname: HostnamePattern,
    path: Option<Regex>,
    pub service: ServiceDescriptor,
    pub settings: OriginRequestDefaults,
}

impl IngressRule {
    pub fn new(
        hostname: HostnamePattern,
        path: Option<&str>,
        service: ServiceDescriptor,
        settings: OriginRequestDefaults,
    ) -> Result<Self, CoreError> {
        let path = path
            .filter(|p| !p.is_empty())
            .map(|p| Regex::new(p).map_err(|e| invalid(format!("invalid path regex `{p}`: {e}"))))
            .transpose()?;
        Ok(Self { hostname, path, service, settings })
    }

    pub fn path_pattern(&self) -> Option<&str> {
        self.path.as_ref().map(|r| r.as_str())
    }

    /// A catch-all rule has an unconstrained hostname and no path regex.
    pub fn is_catch_all(&self) -> bool {
        self.hostname.is_catch_all() && self.path.is_none()
    }

    pub fn matches(&self, hostname: &str, path: &str) -> bool {
        self.hostname.matches(hostname) && self.path.as_ref().map(|re| re.is_match(path)).unwrap_or(true)
    }
}

impl PartialEq for IngressRule {
    fn eq(&self, other: &Self) -> bool {
        self.hostname == other.hostname
            && self.path_pattern() == other.path_pattern()
            && self.service == other.service
            && self.settings == other.settings
    }
}

/// The full routing configuration the Orchestrator installs atomically
/// (`spec.md` §3, §4.F). Immutable once constructed.
#[derive(Clone, Debug, PartialEq)]
pub struct RuleSet {
    pub ingress: Vec<IngressRule>,
    pub warp_routing: WarpRoutingConfig,
    pub defaults: OriginRequestDefaults,
}

impl RuleSet {
    pub fn new(ingress: Vec<IngressRule>, warp_routing: WarpRoutingConfig, defaults: OriginRequestDefaults) -> Self {
        Self { ingress, warp_routing, defaults }
    }

    /// Validates the catch-all-last invariant (`spec.md` §4.E). Hostname
    /// and path syntax are already enforced at construction time by
    /// [`HostnamePattern::parse`] and [`IngressRule::new`].
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.ingress.is_empty() {
            return Ok(());
        }
        let last = self.ingress.len() - 1;
        for (idx, rule) in self.ingress.iter().enumerate() {
            if rule.is_catch_all() && idx != last {
                return Err(invalid(format!(
                    "rule {idx} is catch-all but is not the last rule ({} rules total)",
                    self.ingress.len()
                )));
            }
        }
        if !self.ingress[last].is_catch_all() {
            return Err(invalid("the last ingress rule must be catch-all"));
        }
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> CoreError {
    CoreError::new(codes::INVALID_RULESET, ErrorKind::Validation, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hostname_suffix_matches_exact_and_subdomains_but_not_mashed_together() {
        let pattern = HostnamePattern::parse("*.example.com").unwrap();
        assert!(pattern.matches("example.com"));
        assert!(pattern.matches("a.example.com"));
        assert!(!pattern.matches("aexample.com"));
    }

    #[test]
    fn hostname_pattern_rejects_non_leftmost_wildcard() {
        assert!(HostnamePattern::parse("foo.*.com").is_err());
        assert!(HostnamePattern::parse("*foo.com").is_err());
    }

    #[test]
    fn catch_all_last_ruleset_validates() {
        let catch_all = IngressRule::new(
            HostnamePattern::CatchAll,
            None,
            ServiceDescriptor::HttpUrl("http://localhost:8080".into()),
            OriginRequestDefaults::default(),
        )
        .unwrap();
        let set = RuleSet::new(vec![catch_all], WarpRoutingConfig::default(), OriginRequestDefaults::default());
        assert!(set.validate().is_ok());
    }

    #[test]
    fn earlier_catch_all_rule_is_rejected() {
        let catch_all = IngressRule::new(
            HostnamePattern::CatchAll,
            None,
            ServiceDescriptor::HttpUrl("http://localhost:8080".into()),
            OriginRequestDefaults::default(),
        )
        .unwrap();
        let specific = IngressRule::new(
            HostnamePattern::parse("api.example.com").unwrap(),
            None,
            ServiceDescriptor::HttpUrl("http://localhost:9090".into()),
            OriginRequestDefaults::default(),
        )
        .unwrap();
        let set =
            RuleSet::new(vec![catch_all, specific], WarpRoutingConfig::default(), OriginRequestDefaults::default());
        assert_eq!(set.validate().unwrap_err().code(), codes::INVALID_RULESET);
    }

    #[test]
    fn ruleset_missing_trailing_catch_all_is_rejected() {
        let specific = IngressRule::new(
            HostnamePattern::parse("api.example.com").unwrap(),
            None,
            ServiceDescriptor::HttpUrl("http://localhost:9090".into()),
            OriginRequestDefaults::default(),
        )
        .unwrap();
        let set = RuleSet::new(vec![specific], WarpRoutingConfig::default(), OriginRequestDefaults::default());
        assert!(set.validate().is_err());
    }

    #[test]
    fn bastion_uri_applies_default_port() {
        let target = BastionTarget::parse("ssh://10.0.0.5").unwrap();
        assert_eq!(target.host, "10.0.0.5");
        assert_eq!(target.port, 22);

        let explicit = BastionTarget::parse("rdp://10.0.0.5:3390").unwrap();
        assert_eq!(explicit.port, 3390);
    }
}
