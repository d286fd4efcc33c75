//! Route matcher: resolves an incoming request path to an upstream base
//! URL via ordered, first-match path-prefix predicates (spec §4.4).

use serde::Deserialize;

/// A single routed predicate, flattened out of a [`Route`]'s predicate
/// list so matching can walk one flat ordered vector.
#[derive(Debug, Clone)]
struct PredicateEntry {
    prefix: String,
    upstream: String,
}

/// Process-wide, immutable after construction (spec §3: "readers never
/// see a partially mutated table"). A reload builds a fresh `RouteTable`
/// and swaps it in behind an `ArcSwap`/`Arc<RwLock<_>>` at the call site;
/// this type itself carries no interior mutability.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    entries: Vec<PredicateEntry>,
}

/// Raw route record as it appears in `routes.yml` (spec §6).
#[derive(Debug, Clone, Deserialize)]
pub struct RawRoute {
    pub id: String,
    pub uri: String,
    #[serde(default)]
    pub predicates: Vec<String>,
}

impl RouteTable {
    /// Build a table from the raw YAML records: trim each `Path=`
    /// predicate, force a scheme onto upstream URIs missing one, and
    /// flatten in declaration order so `match` can do a single linear
    /// first-match scan across routes *and* predicates (spec §4.4).
    pub fn from_raw(routes: Vec<RawRoute>) -> Self {
        let mut entries = Vec::new();
        for route in routes {
            if route.uri.is_empty() {
                tracing::warn!(route = %route.id, "skipping route with empty URI");
                continue;
            }
            let upstream = normalize_upstream(&route.uri);
            for predicate in &route.predicates {
                let prefix = normalize_predicate(predicate);
                entries.push(PredicateEntry {
                    prefix,
                    upstream: upstream.clone(),
                });
            }
        }
        Self { entries }
    }

    /// First predicate (in declaration order) whose prefix matches `path`
    /// wins, across both routes and predicates within a route (spec §4.4,
    /// invariant 2).
    pub fn match_path(&self, path: &str) -> Option<&str> {
        let trimmed = path.strip_prefix('/').unwrap_or(path);
        self.entries
            .iter()
            .find(|entry| trimmed.starts_with(entry.prefix.as_str()))
            .map(|entry| entry.upstream.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Distinct upstream base URLs across all routes, for the health
    /// probe sweep (spec §4.11).
    pub fn upstreams(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for entry in &self.entries {
            if seen.insert(entry.upstream.clone()) {
                out.push(entry.upstream.clone());
            }
        }
        out
    }
}

/// Strip a leading `Path=` marker (Spring-Cloud-Gateway-flavored config
/// syntax, spec §4.4) and trim surrounding slashes/whitespace. No
/// glob/regex support — literal prefixes only (spec §9 open question).
fn normalize_predicate(predicate: &str) -> String {
    let stripped = predicate
        .trim()
        .strip_prefix("Path=")
        .unwrap_or(predicate.trim())
        .trim();
    stripped.trim_matches('/').to_string()
}

/// Force `http://` onto a bare `host:port` upstream URI.
fn normalize_upstream(uri: &str) -> String {
    if uri.starts_with("http://") || uri.starts_with("https://") {
        uri.to_string()
    } else {
        format!("http://{uri}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(id: &str, uri: &str, predicates: &[&str]) -> RawRoute {
        RawRoute {
            id: id.to_string(),
            uri: uri.to_string(),
            predicates: predicates.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn matches_literal_prefix() {
        let table = RouteTable::from_raw(vec![route(
            "users",
            "http://u:8080",
            &["Path=/api/users/"],
        )]);
        assert_eq!(table.match_path("/api/users/42"), Some("http://u:8080"));
    }

    #[test]
    fn first_match_wins_across_routes() {
        // Invariant 2: routes [A with prefix /x, B with prefix /x/y] ->
        // match("/x/y/z") returns A's upstream.
        let table = RouteTable::from_raw(vec![
            route("a", "http://a", &["Path=/x"]),
            route("b", "http://b", &["Path=/x/y"]),
        ]);
        assert_eq!(table.match_path("/x/y/z"), Some("http://a"));
    }

    #[test]
    fn no_match_returns_none() {
        let table = RouteTable::from_raw(vec![route("a", "http://a", &["Path=/api/things/"])]);
        assert_eq!(table.match_path("/nope/x"), None);
    }

    #[test]
    fn missing_scheme_gets_http_prefix() {
        let table = RouteTable::from_raw(vec![route("a", "svc.internal:9000", &["Path=/a"])]);
        assert_eq!(table.match_path("/a/1"), Some("http://svc.internal:9000"));
    }

    #[test]
    fn explicit_https_scheme_preserved() {
        let table = RouteTable::from_raw(vec![route("a", "https://svc.internal", &["Path=/a"])]);
        assert_eq!(table.match_path("/a/1"), Some("https://svc.internal"));
    }

    #[test]
    fn determinism_across_repeated_calls() {
        let table = RouteTable::from_raw(vec![route("a", "http://a", &["Path=/x"])]);
        let first = table.match_path("/x/y");
        let second = table.match_path("/x/y");
        assert_eq!(first, second);
    }

    #[test]
    fn skips_route_with_empty_uri() {
        let table = RouteTable::from_raw(vec![route("a", "", &["Path=/x"])]);
        assert!(table.is_empty());
    }

    #[test]
    fn predicate_whitespace_is_trimmed() {
        let table = RouteTable::from_raw(vec![route("a", "http://a", &["Path= /api/widgets/ "])]);
        assert_eq!(table.match_path("/api/widgets/7"), Some("http://a"));
    }
}
