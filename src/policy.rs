use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use http::{Method, StatusCode, Uri};

/// Type alias for the method predicate function
type MethodPredicateFn = Arc<dyn Fn(&Method) -> bool + Send + Sync>;

/// Type alias for the cacheability veto predicate
type ShouldCacheFn = Arc<dyn Fn(&Method, &Uri, StatusCode) -> bool + Send + Sync>;

/// TTL applied when neither an explicit `ttl` nor a tier is configured.
pub const DEFAULT_ROUTE_TTL: Duration = Duration::from_secs(300);

/// Symbolic freshness class mapped to a concrete TTL.
///
/// Lets route authors express intent (`High` churn data expires fast)
/// instead of picking raw seconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FreshnessTier {
    High,
    Medium,
    Low,
}

impl FreshnessTier {
    pub fn ttl(self) -> Duration {
        match self {
            FreshnessTier::High => Duration::from_secs(60),
            FreshnessTier::Medium => Duration::from_secs(300),
            FreshnessTier::Low => Duration::from_secs(1800),
        }
    }
}

/// Role-conditional caching rules.
///
/// A request's role comes from the [`ClientIdentity`](crate::ClientIdentity)
/// extension. Roles in `skip` never see cached responses; when `allow` is
/// configured, only the listed roles do (a missing role counts as absent).
#[derive(Clone, Debug, Default)]
pub struct RolePolicy {
    skip: HashSet<String>,
    allow: Option<HashSet<String>>,
}

impl RolePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn skip<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skip = roles.into_iter().map(Into::into).collect();
        self
    }

    pub fn allow<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allow = Some(roles.into_iter().map(Into::into).collect());
        self
    }

    /// Whether caching applies for a request carrying `role`.
    pub fn allows(&self, role: Option<&str>) -> bool {
        if let Some(role) = role {
            if self.skip.contains(role) {
                return false;
            }
        }
        match &self.allow {
            Some(allowed) => role.is_some_and(|r| allowed.contains(r)),
            None => true,
        }
    }
}

/// Runtime cache policy shared by the layer and its service.
///
/// Policies are cheap to clone and immutable — the `with_*` helpers return
/// updated copies. TTL precedence: an explicit `ttl` beats a tier, which
/// beats [`DEFAULT_ROUTE_TTL`].
#[derive(Clone)]
pub struct CachePolicy {
    ttl: Option<Duration>,
    tier: Option<FreshnessTier>,
    vary_by: Vec<String>,
    invalidate_on: Vec<String>,
    roles: RolePolicy,
    compress: bool,
    method_predicate: Option<MethodPredicateFn>,
    should_cache: Option<ShouldCacheFn>,
}

impl fmt::Debug for CachePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachePolicy")
            .field("ttl", &self.ttl)
            .field("tier", &self.tier)
            .field("vary_by", &self.vary_by)
            .field("invalidate_on", &self.invalidate_on)
            .field("roles", &self.roles)
            .field("compress", &self.compress)
            .finish()
    }
}

impl CachePolicy {
    /// TTL applied when storing an entry for this route.
    pub fn effective_ttl(&self) -> Duration {
        self.ttl
            .or_else(|| self.tier.map(FreshnessTier::ttl))
            .unwrap_or(DEFAULT_ROUTE_TTL)
    }

    /// Determines whether the request method is eligible for caching.
    ///
    /// Only GET qualifies by default; a method predicate replaces the rule.
    pub fn should_cache_method(&self, method: &Method) -> bool {
        if let Some(predicate) = &self.method_predicate {
            predicate(method)
        } else {
            method == Method::GET
        }
    }

    /// Decides cacheability of a captured response: eligible method, status
    /// below 400, and no veto from the `should_cache` predicate.
    pub fn response_cacheable(&self, method: &Method, uri: &Uri, status: StatusCode) -> bool {
        if !self.should_cache_method(method) {
            return false;
        }
        if status.as_u16() >= 400 {
            return false;
        }
        match &self.should_cache {
            Some(predicate) => predicate(method, uri, status),
            None => true,
        }
    }

    pub fn role_allows(&self, role: Option<&str>) -> bool {
        self.roles.allows(role)
    }

    pub fn vary_by(&self) -> &[String] {
        &self.vary_by
    }

    pub fn invalidate_on(&self) -> &[String] {
        &self.invalidate_on
    }

    pub fn compress(&self) -> bool {
        self.compress
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_tier(mut self, tier: FreshnessTier) -> Self {
        self.tier = Some(tier);
        self
    }

    pub fn with_vary_by<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.vary_by = headers
            .into_iter()
            .map(|h| h.into().to_ascii_lowercase())
            .collect();
        self
    }

    pub fn with_invalidate_on<I, S>(mut self, events: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.invalidate_on = events.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_roles(mut self, roles: RolePolicy) -> Self {
        self.roles = roles;
        self
    }

    pub fn with_compress(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    pub fn with_method_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Method) -> bool + Send + Sync + 'static,
    {
        self.method_predicate = Some(Arc::new(predicate));
        self
    }

    pub fn with_should_cache<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Method, &Uri, StatusCode) -> bool + Send + Sync + 'static,
    {
        self.should_cache = Some(Arc::new(predicate));
        self
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            ttl: None,
            tier: None,
            vary_by: Vec::new(),
            invalidate_on: Vec::new(),
            roles: RolePolicy::default(),
            compress: false,
            method_predicate: None,
            should_cache: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiers_map_to_their_ttls() {
        assert_eq!(FreshnessTier::High.ttl(), Duration::from_secs(60));
        assert_eq!(FreshnessTier::Medium.ttl(), Duration::from_secs(300));
        assert_eq!(FreshnessTier::Low.ttl(), Duration::from_secs(1800));
    }

    #[test]
    fn explicit_ttl_beats_tier_beats_default() {
        let default = CachePolicy::default();
        assert_eq!(default.effective_ttl(), DEFAULT_ROUTE_TTL);

        let tiered = CachePolicy::default().with_tier(FreshnessTier::Low);
        assert_eq!(tiered.effective_ttl(), Duration::from_secs(1800));

        let explicit = CachePolicy::default()
            .with_tier(FreshnessTier::Low)
            .with_ttl(Duration::from_secs(42));
        assert_eq!(explicit.effective_ttl(), Duration::from_secs(42));
    }

    #[test]
    fn only_get_is_cacheable_by_default() {
        let policy = CachePolicy::default();
        assert!(policy.should_cache_method(&Method::GET));
        assert!(!policy.should_cache_method(&Method::HEAD));
        assert!(!policy.should_cache_method(&Method::POST));
    }

    #[test]
    fn method_predicate_overrides_the_default() {
        let policy = CachePolicy::default().with_method_predicate(|m| m == Method::HEAD);
        assert!(policy.should_cache_method(&Method::HEAD));
        assert!(!policy.should_cache_method(&Method::GET));
    }

    #[test]
    fn error_statuses_are_never_cacheable() {
        let policy = CachePolicy::default();
        let uri: Uri = "/fees".parse().expect("valid uri");
        assert!(policy.response_cacheable(&Method::GET, &uri, StatusCode::OK));
        assert!(!policy.response_cacheable(&Method::GET, &uri, StatusCode::BAD_REQUEST));
        assert!(!policy.response_cacheable(&Method::GET, &uri, StatusCode::INTERNAL_SERVER_ERROR));
    }

    #[test]
    fn should_cache_predicate_can_veto() {
        let policy = CachePolicy::default()
            .with_should_cache(|_method, uri, _status| !uri.path().starts_with("/drafts"));
        let drafts: Uri = "/drafts/1".parse().expect("valid uri");
        let courses: Uri = "/courses".parse().expect("valid uri");
        assert!(!policy.response_cacheable(&Method::GET, &drafts, StatusCode::OK));
        assert!(policy.response_cacheable(&Method::GET, &courses, StatusCode::OK));
    }

    #[test]
    fn skip_listed_roles_bypass_caching() {
        let policy = RolePolicy::new().skip(["admin"]);
        assert!(!policy.allows(Some("admin")));
        assert!(policy.allows(Some("student")));
        assert!(policy.allows(None));
    }

    #[test]
    fn allow_list_excludes_absent_roles() {
        let policy = RolePolicy::new().allow(["student", "teacher"]);
        assert!(policy.allows(Some("student")));
        assert!(!policy.allows(Some("admin")));
        assert!(!policy.allows(None));
    }

    #[test]
    fn skip_wins_over_allow() {
        let policy = RolePolicy::new().allow(["teacher"]).skip(["teacher"]);
        assert!(!policy.allows(Some("teacher")));
    }
}
