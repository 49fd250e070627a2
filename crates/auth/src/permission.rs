use serde::{Deserialize, Serialize};

/// Permission identifier of the form `resource:action`.
///
/// A literal `*` in either position matches anything, so `agreement:*`
/// grants every agreement action and `*:*` grants everything.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(String);

impl Permission {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn of(resource: &str, action: &str) -> Self {
        Self(format!("{resource}:{action}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn resource(&self) -> &str {
        self.0.split_once(':').map(|(r, _)| r).unwrap_or(&self.0)
    }

    pub fn action(&self) -> &str {
        self.0.split_once(':').map(|(_, a)| a).unwrap_or("")
    }

    /// Does this permission, treated as a grant pattern, cover `requested`?
    pub fn grants(&self, requested: &Permission) -> bool {
        let resource_ok = self.resource() == "*" || self.resource() == requested.resource();
        let action_ok = self.action() == "*" || self.action() == requested.action();
        resource_ok && action_ok
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Permission {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_grants() {
        let grant = Permission::new("agreement:propose");
        assert!(grant.grants(&Permission::new("agreement:propose")));
        assert!(!grant.grants(&Permission::new("agreement:terminate")));
        assert!(!grant.grants(&Permission::new("asset:propose")));
    }

    #[test]
    fn wildcards_match_either_position() {
        assert!(Permission::new("agreement:*").grants(&Permission::new("agreement:propose")));
        assert!(Permission::new("*:propose").grants(&Permission::new("agreement:propose")));
        assert!(Permission::new("*:*").grants(&Permission::new("container:deposit")));
        assert!(!Permission::new("agreement:*").grants(&Permission::new("asset:register")));
    }

    #[test]
    fn resource_and_action_split() {
        let p = Permission::of("container", "deposit");
        assert_eq!(p.resource(), "container");
        assert_eq!(p.action(), "deposit");
        assert_eq!(p.as_str(), "container:deposit");
    }
}
