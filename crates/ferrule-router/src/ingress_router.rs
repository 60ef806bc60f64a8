//! Ingress Router (`spec.md` §4.E): matches an incoming request's hostname
//! and path against an ordered rule list. A small fixed prefix of internal
//! rules (management endpoint, reserved virtual DNS) is always checked
//! first, ahead of whatever ruleset the Orchestrator currently holds.

use ferrule_core::error::{codes, CoreError, ErrorKind};

use crate::rules::{HostnamePattern, IngressRule, RuleSet, ServiceDescriptor};

/// The hostname and path a request arrived with (`spec.md` §4.E
/// `request-identity`).
#[derive(Clone, Debug)]
pub struct RequestIdentity {
    pub hostname: String,
    pub path: String,
}

impl RequestIdentity {
    pub fn new(hostname: impl Into<String>, path: impl Into<String>) -> Self {
        Self { hostname: hostname.into(), path: path.into() }
    }
}

/// Holds the small, fixed set of internal rules that exist outside of any
/// pushed [`RuleSet`] and matches requests against them first.
pub struct IngressRouter {
    internal: Vec<IngressRule>,
}

impl IngressRouter {
    /// `management_hostname` is the hostname the built-in management
    /// endpoint answers on; `None` disables it. Reserved virtual DNS always
    /// answers on `ferrule.reserved-dns`.
    pub fn new(management_hostname: Option<&str>) -> Result<Self, CoreError> {
        let mut internal = Vec::new();
        if let Some(hostname) = management_hostname {
            internal.push(IngressRule::new(
                HostnamePattern::parse(hostname)?,
                None,
                ServiceDescriptor::Management,
                Default::default(),
            )?);
        }
        internal.push(IngressRule::new(
            HostnamePattern::parse("ferrule.reserved-dns")?,
            None,
            ServiceDescriptor::ReservedDns,
            Default::default(),
        )?);
        Ok(Self { internal })
    }

    /// Matches `identity` against the internal rules, then `ruleset.ingress`
    /// in order. Returns the index within whichever list matched and the
    /// matched rule's service descriptor (`spec.md` §4.E `route`).
    pub fn route(&self, ruleset: &RuleSet, identity: &RequestIdentity) -> Result<(usize, ServiceDescriptor), CoreError> {
        for (idx, rule) in self.internal.iter().enumerate() {
            if rule.matches(&identity.hostname, &identity.path) {
                return Ok((idx, rule.service.clone()));
            }
        }
        for (idx, rule) in ruleset.ingress.iter().enumerate() {
            if rule.matches(&identity.hostname, &identity.path) {
                return Ok((idx, rule.service.clone()));
            }
        }
        tracing::debug!(host = %identity.hostname, path = %identity.path, "no ingress rule matched");
        Err(CoreError::new(
            codes::NO_RULE,
            ErrorKind::Validation,
            format!("no ingress rule matches host `{}` path `{}`", identity.hostname, identity.path),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{OriginRequestDefaults, WarpRoutingConfig};

    fn catch_all_ruleset(service: ServiceDescriptor) -> RuleSet {
        let rule = IngressRule::new(HostnamePattern::CatchAll, None, service, OriginRequestDefaults::default())
            .unwrap();
        RuleSet::new(vec![rule], WarpRoutingConfig::default(), OriginRequestDefaults::default())
    }

    #[test]
    fn single_catch_all_rule_routes_everything() {
        let router = IngressRouter::new(None).unwrap();
        let set = catch_all_ruleset(ServiceDescriptor::HttpUrl("http://localhost:8080".into()));
        let (idx, service) = router.route(&set, &RequestIdentity::new("anything.example.com", "/foo")).unwrap();
        assert_eq!(idx, 0);
        assert_eq!(service, ServiceDescriptor::HttpUrl("http://localhost:8080".into()));
    }

    #[test]
    fn first_matching_rule_wins() {
        let router = IngressRouter::new(None).unwrap();
        let specific = IngressRule::new(
            HostnamePattern::parse("api.example.com").unwrap(),
            None,
            ServiceDescriptor::HttpUrl("http://localhost:9090".into()),
            OriginRequestDefaults::default(),
        )
        .unwrap();
        let catch_all = IngressRule::new(
            HostnamePattern::CatchAll,
            None,
            ServiceDescriptor::HttpUrl("http://localhost:8080".into()),
            OriginRequestDefaults::default(),
        )
        .unwrap();
        let set =
            RuleSet::new(vec![specific, catch_all], WarpRoutingConfig::default(), OriginRequestDefaults::default());

        let (idx, service) = router.route(&set, &RequestIdentity::new("api.example.com", "/")).unwrap();
        assert_eq!(idx, 0);
        assert_eq!(service, ServiceDescriptor::HttpUrl("http://localhost:9090".into()));
    }

    #[test]
    fn management_hostname_is_matched_before_any_pushed_ruleset() {
        let router = IngressRouter::new(Some("management.internal")).unwrap();
        let set = catch_all_ruleset(ServiceDescriptor::HttpUrl("http://localhost:8080".into()));
        let (_idx, service) = router.route(&set, &RequestIdentity::new("management.internal", "/status")).unwrap();
        assert_eq!(service, ServiceDescriptor::Management);
    }

    #[test]
    fn no_match_is_no_rule() {
        let router = IngressRouter::new(None).unwrap();
        let empty = RuleSet::new(Vec::new(), WarpRoutingConfig::default(), OriginRequestDefaults::default());
        let err = router.route(&empty, &RequestIdentity::new("nope.example.com", "/")).unwrap_err();
        assert_eq!(err.code(), codes::NO_RULE);
    }
}
