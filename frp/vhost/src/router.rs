/// One registered route: a domain pattern (`example.com` or a wildcard like
/// `*.example.com` for a subdomain assignment) plus an optional path
/// prefix for HTTP location-based routing.
#[derive(Debug, Clone)]
struct Route<T> {
    domain: String,
    is_wildcard: bool,
    path_prefix: String,
    value: T,
}

/// Routes a `(host, path)` pair to the most specific registered value.
/// Specificity order, most to least specific:
///   1. exact domain match, longest path prefix
///   2. wildcard (subdomain) match, longest path prefix
#[derive(Default)]
pub struct Router<T> {
    routes: Vec<Route<T>>,
}

impl<T: Clone> Router<T> {
    pub fn new() -> Self {
        Self { routes: Vec::new() }
    }

    /// `domain` may be a bare hostname or `*.suffix` for a wildcard
    /// subdomain route (used for frp's `subdomain` proxies sharing one
    /// base domain). `path_prefix` is `""` for a domain-only route.
    pub fn register(&mut self, domain: &str, path_prefix: &str, value: T) {
        let (domain, is_wildcard) = match domain.strip_prefix("*.") {
            Some(suffix) => (suffix.to_string(), true),
            None => (domain.to_string(), false),
        };
        self.routes.push(Route {
            domain,
            is_wildcard,
            path_prefix: path_prefix.trim_end_matches('/').to_string(),
            value,
        });
    }

    pub fn unregister_all_for(&mut self, predicate: impl Fn(&T) -> bool) {
        self.routes.retain(|r| !predicate(&r.value));
    }

    pub fn resolve(&self, host: &str, path: &str) -> Option<&T> {
        let host = host.split(':').next().unwrap_or(host);
        self.routes
            .iter()
            .filter(|r| route_matches_host(r, host))
            .filter(|r| path.starts_with(&r.path_prefix))
            .max_by_key(|r| (!r.is_wildcard, r.path_prefix.len()))
            .map(|r| &r.value)
    }
}

fn route_matches_host<T>(route: &Route<T>, host: &str) -> bool {
    if route.is_wildcard {
        host.ends_with(&route.domain) && host.len() > route.domain.len()
    } else {
        host == route.domain
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_domain_beats_wildcard() {
        let mut router: Router<&str> = Router::new();
        router.register("*.example.com", "", "wildcard");
        router.register("api.example.com", "", "exact");
        assert_eq!(router.resolve("api.example.com", "/"), Some(&"exact"));
        assert_eq!(router.resolve("foo.example.com", "/"), Some(&"wildcard"));
    }

    #[test]
    fn longest_path_prefix_wins_within_same_domain() {
        let mut router: Router<&str> = Router::new();
        router.register("example.com", "/", "root");
        router.register("example.com", "/api", "api");
        router.register("example.com", "/api/v2", "api-v2");
        assert_eq!(router.resolve("example.com", "/api/v2/users"), Some(&"api-v2"));
        assert_eq!(router.resolve("example.com", "/api/v1/users"), Some(&"api"));
        assert_eq!(router.resolve("example.com", "/home"), Some(&"root"));
    }

    #[test]
    fn no_match_returns_none() {
        let router: Router<&str> = Router::new();
        assert_eq!(router.resolve("example.com", "/"), None);
    }

    #[test]
    fn host_port_suffix_is_ignored() {
        let mut router: Router<&str> = Router::new();
        router.register("example.com", "", "root");
        assert_eq!(router.resolve("example.com:8080", "/"), Some(&"root"));
    }
}
