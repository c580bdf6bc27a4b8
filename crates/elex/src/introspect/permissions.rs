//! The permission filter gating class and member exposure.
//!
//! Rules are applied when a class's introspection record is populated, so a
//! disallowed member can never come out of a resolver. Rule syntax:
//!
//! - `"acme.*"` allows every class under the `acme` package
//! - `"acme.geo.Point"` allows one class
//! - `"!acme.secret.*"` denies a package outright
//! - `"!acme.geo.Point"` denies one class
//! - `"acme.geo.Point#hidden"` denies one member of an allowed class
//!
//! With no allow rules, every class not explicitly denied is allowed.

/// A class/member visibility predicate.
#[derive(Debug, Clone, Default)]
pub struct Permissions {
    allowed: Vec<String>,
    denied: Vec<String>,
    denied_members: Vec<(String, String)>,
}

impl Permissions {
    /// Allows everything.
    pub fn unrestricted() -> Self {
        Self::default()
    }

    /// Parses a rule list.
    pub fn parse<S: AsRef<str>>(rules: impl IntoIterator<Item = S>) -> Self {
        let mut permissions = Self::default();
        for rule in rules {
            let rule = rule.as_ref().trim();
            if rule.is_empty() {
                continue;
            }
            if let Some(denied) = rule.strip_prefix('!') {
                permissions.denied.push(denied.to_owned());
            } else if let Some((class, member)) = rule.split_once('#') {
                permissions.denied_members.push((class.to_owned(), member.to_owned()));
            } else {
                permissions.allowed.push(rule.to_owned());
            }
        }
        permissions
    }

    pub fn allow_class(&self, class: &str) -> bool {
        if self.denied.iter().any(|pattern| pattern_matches(pattern, class)) {
            return false;
        }
        self.allowed.is_empty() || self.allowed.iter().any(|pattern| pattern_matches(pattern, class))
    }

    pub fn allow_member(&self, class: &str, member: &str) -> bool {
        self.allow_class(class)
            && !self
                .denied_members
                .iter()
                .any(|(c, m)| pattern_matches(c, class) && m == member)
    }
}

/// `"a.*"` matches any class under package `a`; anything else is exact.
fn pattern_matches(pattern: &str, class: &str) -> bool {
    match pattern.strip_suffix(".*") {
        Some(package) => class.strip_prefix(package).is_some_and(|rest| rest.starts_with('.')),
        None => pattern == class,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unrestricted_allows_all() {
        let p = Permissions::unrestricted();
        assert!(p.allow_class("acme.geo.Point"));
        assert!(p.allow_member("acme.geo.Point", "x"));
    }

    #[test]
    fn package_wildcards() {
        let p = Permissions::parse(["acme.*"]);
        assert!(p.allow_class("acme.geo.Point"));
        assert!(!p.allow_class("other.Thing"));
        // the wildcard does not match the bare package name itself
        assert!(!p.allow_class("acme"));
    }

    #[test]
    fn class_and_member_denials() {
        let p = Permissions::parse(["acme.*", "!acme.secret.*", "acme.geo.Point#hidden"]);
        assert!(!p.allow_class("acme.secret.Vault"));
        assert!(p.allow_class("acme.geo.Point"));
        assert!(!p.allow_member("acme.geo.Point", "hidden"));
        assert!(p.allow_member("acme.geo.Point", "x"));
    }
}
