//! SSRF protection for user-supplied feed URLs
//!
//! A URL passes only when its scheme is http/https and every address its
//! host resolves to is public. Checking all resolved addresses (not just the
//! first) is what stops DNS-rebinding names that mix public and private
//! answers.

use super::blocklist::{self, BlockedRange};
use feedgate_common::SafetyVerdict;
use futures_util::future::BoxFuture;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::{Host, ParseError, Url};

/// Schemes refused with an explicit reason, before the http/https allow-list
const BLOCKED_SCHEMES: &[&str] = &[
    "file", "ftp", "gopher", "dict", "ldap", "ldaps", "sftp", "tftp", "jar",
];

/// Why a URL was refused
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UrlRejection {
    #[error("URL must be a non-empty string.")]
    Empty,

    #[error("URL could not be parsed.")]
    Unparseable,

    #[error("Scheme '{0}' is not permitted.")]
    SchemeBlocked(String),

    #[error("Only http and https URLs are accepted.")]
    SchemeNotAllowed(String),

    #[error("URL has no hostname.")]
    MissingHost,

    #[error("Requests to private/internal IP addresses are not allowed ({range}).")]
    PrivateAddress { range: String },

    #[error("Hostname '{host}' could not be resolved.")]
    Unresolvable { host: String },

    #[error("Hostname '{host}' could not be resolved (DNS lookup timed out).")]
    ResolveTimeout { host: String },

    #[error("Hostname '{host}' resolves to a private/internal address ({range}).")]
    ResolvesToPrivate { host: String, range: String },
}

impl UrlRejection {
    /// Whether the rejection came from address classification
    pub fn is_private_address(&self) -> bool {
        matches!(self, Self::PrivateAddress { .. } | Self::ResolvesToPrivate { .. })
    }

    /// Whether the host could not be resolved
    pub fn is_unresolvable(&self) -> bool {
        matches!(self, Self::Unresolvable { .. } | Self::ResolveTimeout { .. })
    }
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("DNS lookup timed out after {0:?}")]
    Timeout(Duration),

    #[error("DNS lookup failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Hostname to address resolution
pub trait Resolve: Send + Sync {
    /// Return every address the host resolves to, both families
    fn lookup<'a>(&'a self, host: &'a str) -> BoxFuture<'a, Result<Vec<IpAddr>, ResolveError>>;
}

/// System resolver (getaddrinfo) with a bounded per-lookup timeout
#[derive(Debug, Clone)]
pub struct SystemResolver {
    timeout: Duration,
}

impl SystemResolver {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Resolve for SystemResolver {
    fn lookup<'a>(&'a self, host: &'a str) -> BoxFuture<'a, Result<Vec<IpAddr>, ResolveError>> {
        Box::pin(async move {
            let addrs = tokio::time::timeout(self.timeout, tokio::net::lookup_host((host, 0)))
                .await
                .map_err(|_| ResolveError::Timeout(self.timeout))??;

            let mut ips: Vec<IpAddr> = Vec::new();
            for addr in addrs {
                if !ips.contains(&addr.ip()) {
                    ips.push(addr.ip());
                }
            }
            Ok(ips)
        })
    }
}

/// Validates that a URL is safe to fetch externally
#[derive(Clone)]
pub struct UrlValidator {
    resolver: Arc<dyn Resolve>,
}

impl UrlValidator {
    pub fn new(resolver: Arc<dyn Resolve>) -> Self {
        Self { resolver }
    }

    /// Check a URL and return the verdict
    pub async fn check_safe(&self, url: &str) -> SafetyVerdict {
        match self.check(url).await {
            Ok(()) => SafetyVerdict::allowed(),
            Err(rejection) => SafetyVerdict::blocked(rejection.to_string()),
        }
    }

    /// Check a URL, returning the typed rejection on failure
    pub async fn check(&self, url: &str) -> Result<(), UrlRejection> {
        let url = url.trim();
        if url.is_empty() {
            return Err(UrlRejection::Empty);
        }

        let parsed = Url::parse(url).map_err(|e| match e {
            ParseError::EmptyHost => UrlRejection::MissingHost,
            _ => UrlRejection::Unparseable,
        })?;

        let scheme = parsed.scheme().to_ascii_lowercase();
        if BLOCKED_SCHEMES.contains(&scheme.as_str()) {
            tracing::debug!("Rejected {}: blocked scheme {}", url, scheme);
            return Err(UrlRejection::SchemeBlocked(scheme));
        }
        if scheme != "http" && scheme != "https" {
            tracing::debug!("Rejected {}: scheme {} not allow-listed", url, scheme);
            return Err(UrlRejection::SchemeNotAllowed(scheme));
        }

        let hostname = match parsed.host() {
            Some(Host::Ipv4(ip)) => return check_literal(IpAddr::V4(ip)),
            Some(Host::Ipv6(ip)) => return check_literal(IpAddr::V6(ip)),
            Some(Host::Domain(domain)) if !domain.is_empty() => domain,
            _ => return Err(UrlRejection::MissingHost),
        };

        let resolved = match self.resolver.lookup(hostname).await {
            Ok(ips) => ips,
            Err(ResolveError::Timeout(after)) => {
                tracing::warn!("DNS lookup for {} timed out after {:?}", hostname, after);
                return Err(UrlRejection::ResolveTimeout {
                    host: hostname.to_string(),
                });
            }
            Err(e) => {
                tracing::debug!("DNS lookup for {} failed: {}", hostname, e);
                Vec::new()
            }
        };

        if resolved.is_empty() {
            return Err(UrlRejection::Unresolvable {
                host: hostname.to_string(),
            });
        }

        for ip in resolved {
            if let Some(range) = blocklist::classify(ip) {
                tracing::info!("Rejected {}: {} resolves to {} in {}", url, hostname, ip, range);
                return Err(UrlRejection::ResolvesToPrivate {
                    host: hostname.to_string(),
                    range: range.to_string(),
                });
            }
        }

        Ok(())
    }
}

/// Literal addresses are classified directly, without DNS
fn check_literal(ip: IpAddr) -> Result<(), UrlRejection> {
    match blocklist::classify(ip) {
        Some(range) => {
            tracing::info!("Rejected literal address {} in {}", ip, range);
            Err(private_address(range))
        }
        None => Ok(()),
    }
}

fn private_address(range: &BlockedRange) -> UrlRejection {
    UrlRejection::PrivateAddress {
        range: range.to_string(),
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::StaticResolver;
    use super::*;

    fn validator(resolver: StaticResolver) -> (UrlValidator, Arc<StaticResolver>) {
        let resolver = Arc::new(resolver);
        (UrlValidator::new(resolver.clone()), resolver)
    }

    #[tokio::test]
    async fn test_public_hostname_allowed() {
        let (v, _) = validator(
            StaticResolver::new().with("example.com", &["93.184.216.34", "2606:2800:220:1::248"]),
        );
        let verdict = v.check_safe("https://example.com/feed.xml").await;
        assert!(verdict.is_allowed());
        assert!(verdict.reason().is_empty());
    }

    #[tokio::test]
    async fn test_metadata_literal_rejected_without_dns() {
        let (v, resolver) = validator(StaticResolver::new());
        let verdict = v.check_safe("http://169.254.169.254/latest/meta-data/").await;
        assert!(!verdict.is_allowed());
        assert!(verdict.reason().contains("169.254.0.0/16"));
        assert!(verdict.reason().contains("link-local"));
        assert_eq!(resolver.lookups(), 0);
    }

    #[tokio::test]
    async fn test_every_blocked_range_rejected_as_literal() {
        let (v, resolver) = validator(StaticResolver::new());
        for range in blocklist::blocked_ranges() {
            for ip in [range.net.network(), range.net.broadcast()] {
                let url = match ip {
                    IpAddr::V4(ip) => format!("http://{}/", ip),
                    IpAddr::V6(ip) => format!("http://[{}]/", ip),
                };
                let result = v.check(&url).await;
                assert!(
                    matches!(result, Err(UrlRejection::PrivateAddress { .. })),
                    "{} should be rejected, got {:?}",
                    url,
                    result
                );
            }
        }
        assert_eq!(resolver.lookups(), 0);
    }

    #[tokio::test]
    async fn test_public_literals_allowed() {
        let (v, resolver) = validator(StaticResolver::new());
        for url in [
            "http://8.8.8.8/",
            "https://1.1.1.1/feed",
            "http://[2606:4700:4700::1111]/rss",
            "http://100.128.0.1/",
        ] {
            assert!(v.check_safe(url).await.is_allowed(), "{} should pass", url);
        }
        assert_eq!(resolver.lookups(), 0);
    }

    #[tokio::test]
    async fn test_scheme_rejected_before_resolution() {
        let (v, resolver) = validator(StaticResolver::new().with("example.com", &["93.184.216.34"]));

        let result = v.check("ftp://example.com/file").await;
        assert_eq!(result, Err(UrlRejection::SchemeBlocked("ftp".to_string())));
        assert_eq!(
            result.unwrap_err().to_string(),
            "Scheme 'ftp' is not permitted."
        );

        for url in ["file:///etc/passwd", "gopher://example.com/", "JAR:http://x/y!/z"] {
            let result = v.check(url).await;
            assert!(matches!(result, Err(UrlRejection::SchemeBlocked(_))), "{}", url);
        }

        let result = v.check("javascript:alert(1)").await;
        assert_eq!(
            result,
            Err(UrlRejection::SchemeNotAllowed("javascript".to_string()))
        );
        assert_eq!(resolver.lookups(), 0);
    }

    #[tokio::test]
    async fn test_unparseable_and_empty() {
        let (v, _) = validator(StaticResolver::new());
        assert_eq!(v.check("").await, Err(UrlRejection::Empty));
        assert_eq!(v.check("   ").await, Err(UrlRejection::Empty));
        assert_eq!(v.check("not a url").await, Err(UrlRejection::Unparseable));
    }

    #[tokio::test]
    async fn test_missing_hostname() {
        let (v, resolver) = validator(StaticResolver::new());
        for url in ["https://", "https://:443/", "http://?q=1"] {
            let result = v.check(url).await;
            assert_eq!(result, Err(UrlRejection::MissingHost), "{}", url);
        }
        assert_eq!(
            v.check_safe("https://").await.reason(),
            "URL has no hostname."
        );
        assert_eq!(resolver.lookups(), 0);
    }

    #[tokio::test]
    async fn test_rebinding_mixed_answers_rejected() {
        let (v, _) = validator(
            StaticResolver::new().with("rebind.example", &["93.184.216.34", "10.0.0.5", "8.8.8.8"]),
        );
        let result = v.check("https://rebind.example/feed").await;
        match result {
            Err(UrlRejection::ResolvesToPrivate { host, range }) => {
                assert_eq!(host, "rebind.example");
                assert!(range.contains("10.0.0.0/8"));
            }
            other => panic!("expected private rejection, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_localhost_name_rejected() {
        let (v, _) = validator(StaticResolver::new().with("localhost", &["127.0.0.1", "::1"]));
        let verdict = v.check_safe("http://localhost:8080/admin").await;
        assert!(!verdict.is_allowed());
        assert!(verdict.reason().contains("'localhost'"));
    }

    #[tokio::test]
    async fn test_unresolvable_fails_closed() {
        let (v, _) = validator(StaticResolver::new().with("empty.example", &[]));
        assert_eq!(
            v.check("https://nowhere.invalid/").await,
            Err(UrlRejection::Unresolvable {
                host: "nowhere.invalid".to_string()
            })
        );
        let verdict = v.check_safe("https://empty.example/").await;
        assert_eq!(verdict.reason(), "Hostname 'empty.example' could not be resolved.");
    }

    #[tokio::test]
    async fn test_dns_timeout_fails_closed() {
        let (v, _) = validator(StaticResolver::new().with_timeout("slow.example"));
        let result = v.check("https://slow.example/").await;
        assert!(matches!(result, Err(UrlRejection::ResolveTimeout { .. })));
        assert!(result.unwrap_err().is_unresolvable());
    }

    #[tokio::test]
    async fn test_octal_host_normalized_and_blocked() {
        let (v, resolver) = validator(StaticResolver::new());
        let result = v.check("http://0177.0.0.1/").await;
        assert!(matches!(result, Err(UrlRejection::PrivateAddress { .. })));
        assert_eq!(resolver.lookups(), 0);
    }

    #[tokio::test]
    async fn test_mapped_ipv6_literal_blocked() {
        let (v, _) = validator(StaticResolver::new());
        let result = v.check("http://[::ffff:127.0.0.1]/").await;
        assert!(matches!(result, Err(UrlRejection::PrivateAddress { .. })));
    }

    #[tokio::test]
    async fn test_embedded_ipv4_literals_blocked() {
        let (v, resolver) = validator(StaticResolver::new());
        for url in [
            "http://[::127.0.0.1]/",
            "http://[::169.254.169.254]/latest/meta-data/",
            "http://[::10.0.0.1]/",
            "http://[64:ff9b::a9fe:a9fe]/",
        ] {
            let result = v.check(url).await;
            assert!(
                matches!(result, Err(UrlRejection::PrivateAddress { .. })),
                "{} should be rejected, got {:?}",
                url,
                result
            );
        }
        assert!(v.check_safe("http://[64:ff9b::808:808]/").await.is_allowed());
        assert_eq!(resolver.lookups(), 0);
    }

    #[tokio::test]
    async fn test_resolved_compatible_address_rejected() {
        let (v, _) = validator(StaticResolver::new().with("sneaky.example", &["::169.254.169.254"]));
        let result = v.check("https://sneaky.example/").await;
        assert!(matches!(result, Err(UrlRejection::ResolvesToPrivate { .. })));
    }
}
