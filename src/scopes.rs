//! # Capability Checks
//!
//! Authorization is handled by an external engine; the queue core only needs
//! a boolean capability check for the few operations that gate on one, such
//! as downloading a non-public artifact. [`StaticScopeChecker`] provides the
//! standard satisfaction rule over a fixed scope set, which is enough for
//! tests and embedded use.

/// Boolean capability check supplied by the caller's auth context.
pub trait ScopeChecker: Send + Sync {
    /// Whether the caller satisfies `requirement`.
    fn satisfies(&self, requirement: &str) -> bool;
}

/// Grants everything. Useful for trusted internal callers and tests.
#[derive(Debug, Clone, Default)]
pub struct AllowAll;

impl ScopeChecker for AllowAll {
    fn satisfies(&self, _requirement: &str) -> bool {
        true
    }
}

/// Checks requirements against a fixed set of scopes. A scope satisfies a
/// requirement when it is equal, or when it ends in `*` and the requirement
/// starts with the prefix before the `*`.
#[derive(Debug, Clone)]
pub struct StaticScopeChecker {
    scopes: Vec<String>,
}

impl StaticScopeChecker {
    pub fn new(scopes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            scopes: scopes.into_iter().map(Into::into).collect(),
        }
    }
}

impl ScopeChecker for StaticScopeChecker {
    fn satisfies(&self, requirement: &str) -> bool {
        self.scopes.iter().any(|scope| {
            scope == requirement
                || scope
                    .strip_suffix('*')
                    .map(|prefix| requirement.starts_with(prefix))
                    .unwrap_or(false)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allow_all() {
        assert!(AllowAll.satisfies("queue:get-artifact:private/secrets.txt"));
    }

    #[test]
    fn test_exact_match() {
        let checker = StaticScopeChecker::new(["queue:get-artifact:private/log.txt"]);
        assert!(checker.satisfies("queue:get-artifact:private/log.txt"));
        assert!(!checker.satisfies("queue:get-artifact:private/other.txt"));
    }

    #[test]
    fn test_star_prefix() {
        let checker = StaticScopeChecker::new(["queue:get-artifact:private/*"]);
        assert!(checker.satisfies("queue:get-artifact:private/log.txt"));
        assert!(!checker.satisfies("queue:create-artifact:private/log.txt"));
    }
}
