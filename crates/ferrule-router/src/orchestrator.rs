//! Orchestrator (`spec.md` §4.F): holds the currently active [`RuleSet`]
//! behind an [`ArcSwap`], so readers (the Ingress Router, datagram
//! dispatch) never block and never observe a torn update.

use std::sync::Arc;

use arc_swap::ArcSwap;
use ferrule_core::error::{codes, CoreError, ErrorKind};

use crate::rules::RuleSet;

/// Default cap on the number of ingress rules accepted from the edge
/// (`spec.md` §9 open question: "the maximum RuleSet size accepted from
/// the edge is implicit; an implementation should enforce a configurable
/// limit"). Chosen generously above any realistic per-tunnel rule count;
/// override with [`Orchestrator::with_max_rules`].
pub const DEFAULT_MAX_INGRESS_RULES: usize = 4096;

/// Notified when a pushed `RuleSet` fails validation and is rejected
/// (`spec.md` §4.F). Kept as a trait here, rather than a dependency on the
/// Observer crate directly, so `ferrule-router` has no upward dependency —
/// `ferrule-observer` implements this trait instead.
pub trait RejectionSink: Send + Sync {
    fn ruleset_rejected(&self, reason: &CoreError);
}

/// Holds the installed `RuleSet` and applies atomic swaps from the control
/// plane (`spec.md` §4.F, §8 property 2).
pub struct Orchestrator {
    current: ArcSwap<RuleSet>,
    rejection_sink: Option<Arc<dyn RejectionSink>>,
    max_rules: usize,
}

impl Orchestrator {
    pub fn new(initial: RuleSet) -> Self {
        Self { current: ArcSwap::from_pointee(initial), rejection_sink: None, max_rules: DEFAULT_MAX_INGRESS_RULES }
    }

    pub fn with_rejection_sink(mut self, sink: Arc<dyn RejectionSink>) -> Self {
        self.rejection_sink = Some(sink);
        self
    }

    pub fn with_max_rules(mut self, max_rules: usize) -> Self {
        self.max_rules = max_rules;
        self
    }

    /// Returns the currently installed ruleset without copying. Callers that
    /// hold the returned `Arc` for the lifetime of one request see a
    /// consistent snapshot even if `install` races concurrently.
    pub fn current(&self) -> Arc<RuleSet> {
        self.current.load_full()
    }

    /// Validates `candidate` and swaps it in atomically on success. A
    /// candidate that fails validation is rejected and the previous
    /// ruleset is retained; the rejection is reported to the configured
    /// [`RejectionSink`] (`spec.md` §4.F).
    ///
    /// Installing a ruleset equal in content to the one already installed
    /// is a no-op: the swap still happens (so `Arc` identity always
    /// reflects the most recent install) but no rejection is reported,
    /// since there was nothing wrong with the candidate.
    pub fn install(&self, candidate: RuleSet) -> Result<(), CoreError> {
        if let Err(reason) = self.check(&candidate) {
            tracing::warn!(code = reason.code(), "ruleset rejected");
            if let Some(sink) = &self.rejection_sink {
                sink.ruleset_rejected(&reason);
            }
            return Err(reason);
        }
        tracing::debug!(rules = candidate.ingress.len(), "installing new ruleset");
        self.current.store(Arc::new(candidate));
        Ok(())
    }

    fn check(&self, candidate: &RuleSet) -> Result<(), CoreError> {
        if candidate.ingress.len() > self.max_rules {
            return Err(CoreError::new(
                codes::RULESET_TOO_LARGE,
                ErrorKind::Validation,
                format!("ruleset has {} rules, exceeding the limit of {}", candidate.ingress.len(), self.max_rules),
            ));
        }
        candidate.validate()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::rules::{HostnamePattern, IngressRule, OriginRequestDefaults, ServiceDescriptor, WarpRoutingConfig};

    fn catch_all(service: ServiceDescriptor) -> RuleSet {
        let rule = IngressRule::new(HostnamePattern::CatchAll, None, service, OriginRequestDefaults::default())
            .unwrap();
        RuleSet::new(vec![rule], WarpRoutingConfig::default(), OriginRequestDefaults::default())
    }

    fn invalid_ruleset() -> RuleSet {
        let specific = IngressRule::new(
            HostnamePattern::parse("api.example.com").unwrap(),
            None,
            ServiceDescriptor::HttpUrl("http://localhost:9090".into()),
            OriginRequestDefaults::default(),
        )
        .unwrap();
        RuleSet::new(vec![specific], WarpRoutingConfig::default(), OriginRequestDefaults::default())
    }

    #[derive(Default)]
    struct RecordingSink {
        rejections: Mutex<Vec<String>>,
    }

    impl RejectionSink for RecordingSink {
        fn ruleset_rejected(&self, reason: &CoreError) {
            self.rejections.lock().unwrap().push(reason.code().to_string());
        }
    }

    #[test]
    fn install_replaces_current_ruleset() {
        let orchestrator = Orchestrator::new(catch_all(ServiceDescriptor::HttpUrl("http://a".into())));
        orchestrator.install(catch_all(ServiceDescriptor::HttpUrl("http://b".into()))).unwrap();
        assert_eq!(
            orchestrator.current().ingress[0].service,
            ServiceDescriptor::HttpUrl("http://b".into())
        );
    }

    #[test]
    fn invalid_candidate_is_rejected_and_previous_is_retained() {
        let orchestrator = Orchestrator::new(catch_all(ServiceDescriptor::HttpUrl("http://a".into())));
        let err = orchestrator.install(invalid_ruleset()).unwrap_err();
        assert!(!err.code().is_empty());
        assert_eq!(
            orchestrator.current().ingress[0].service,
            ServiceDescriptor::HttpUrl("http://a".into())
        );
    }

    #[test]
    fn rejection_is_surfaced_to_the_sink() {
        let sink = Arc::new(RecordingSink::default());
        let orchestrator =
            Orchestrator::new(catch_all(ServiceDescriptor::HttpUrl("http://a".into()))).with_rejection_sink(sink.clone());
        orchestrator.install(invalid_ruleset()).unwrap_err();
        assert_eq!(sink.rejections.lock().unwrap().len(), 1);
    }

    #[test]
    fn readers_holding_a_snapshot_are_unaffected_by_a_later_install() {
        let orchestrator = Orchestrator::new(catch_all(ServiceDescriptor::HttpUrl("http://a".into())));
        let snapshot = orchestrator.current();
        orchestrator.install(catch_all(ServiceDescriptor::HttpUrl("http://b".into()))).unwrap();
        assert_eq!(snapshot.ingress[0].service, ServiceDescriptor::HttpUrl("http://a".into()));
        assert_eq!(
            orchestrator.current().ingress[0].service,
            ServiceDescriptor::HttpUrl("http://b".into())
        );
    }

    #[test]
    fn candidate_over_the_configured_rule_limit_is_rejected() {
        let sink = Arc::new(RecordingSink::default());
        let orchestrator = Orchestrator::new(catch_all(ServiceDescriptor::HttpUrl("http://a".into())))
            .with_rejection_sink(sink.clone())
            .with_max_rules(1);

        let mut rules = Vec::new();
        for n in 0..3 {
            rules.push(
                IngressRule::new(
                    HostnamePattern::parse(&format!("svc{n}.example.com")).unwrap(),
                    None,
                    ServiceDescriptor::HttpUrl(format!("http://svc{n}")),
                    OriginRequestDefaults::default(),
                )
                .unwrap(),
            );
        }
        rules.push(
            IngressRule::new(
                HostnamePattern::CatchAll,
                None,
                ServiceDescriptor::HttpUrl("http://fallback".into()),
                OriginRequestDefaults::default(),
            )
            .unwrap(),
        );
        let oversized = RuleSet::new(rules, WarpRoutingConfig::default(), OriginRequestDefaults::default());

        let err = orchestrator.install(oversized).unwrap_err();
        assert_eq!(err.code(), codes::RULESET_TOO_LARGE);
        assert_eq!(sink.rejections.lock().unwrap().len(), 1);
        assert_eq!(
            orchestrator.current().ingress[0].service,
            ServiceDescriptor::HttpUrl("http://a".into())
        );
    }
}
