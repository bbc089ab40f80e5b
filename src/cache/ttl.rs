//! Namespace TTL policy.

use std::time::Duration;

/// Map a cache namespace to its TTL.
///
/// Encodes how volatile each kind of data is: search listings go stale
/// within the hour, item details change rarely and can be held for a day.
/// Unknown namespaces get the supplied default.
pub fn ttl_for(namespace: &str, default_ttl: Duration) -> Duration {
    let secs = match namespace {
        // Search results change less frequently than they are requested.
        "imdb_search" => 1800,
        // Movie details rarely change.
        "imdb_details" => 86_400,
        "mdl_search" => 3600,
        "mdl_details" => 43_200,
        // User preferences.
        "user_templates" => 7200,
        _ => return default_ttl,
    };
    Duration::from_secs(secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_namespaces() {
        let default = Duration::from_secs(60);
        assert_eq!(ttl_for("imdb_search", default), Duration::from_secs(1800));
        assert_eq!(ttl_for("imdb_details", default), Duration::from_secs(86_400));
        assert_eq!(ttl_for("mdl_search", default), Duration::from_secs(3600));
        assert_eq!(ttl_for("mdl_details", default), Duration::from_secs(43_200));
        assert_eq!(ttl_for("user_templates", default), Duration::from_secs(7200));
    }

    #[test]
    fn test_unknown_namespace_uses_default() {
        let default = Duration::from_secs(123);
        assert_eq!(ttl_for("something_else", default), default);
    }
}
