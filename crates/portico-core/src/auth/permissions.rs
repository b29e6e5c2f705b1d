//! Wildcard permission matching.
//!
//! Permissions are strings of the forms `resource.action` or
//! `resource:action:scope`, with `*` standing in for any segment. A bare
//! `*` grants everything. Matching is exact per segment otherwise.

/// A caller's granted permission set with wildcard membership tests.
#[derive(Debug, Clone, Default)]
pub struct PermissionSet {
    granted: Vec<Vec<String>>,
}

fn segments(permission: &str) -> Vec<String> {
    permission
        .split(['.', ':'])
        .map(str::to_string)
        .collect()
}

fn matches(granted: &[String], required: &[String]) -> bool {
    if granted.len() == 1 && granted[0] == "*" {
        return true;
    }
    granted.len() == required.len()
        && granted
            .iter()
            .zip(required)
            .all(|(g, r)| g == "*" || g == r)
}

impl PermissionSet {
    /// Builds a set from granted permission strings. Empty strings are
    /// ignored.
    #[must_use]
    pub fn new<I, S>(granted: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            granted: granted
                .into_iter()
                .filter(|p| !p.as_ref().is_empty())
                .map(|p| segments(p.as_ref()))
                .collect(),
        }
    }

    /// True iff some granted permission matches `required`.
    #[must_use]
    pub fn has(&self, required: &str) -> bool {
        let required = segments(required);
        self.granted.iter().any(|g| matches(g, &required))
    }

    /// True iff every permission in `required` is granted.
    #[must_use]
    pub fn has_all<'a, I>(&self, required: I) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        required.into_iter().all(|p| self.has(p))
    }

    /// True iff at least one permission in `required` is granted.
    #[must_use]
    pub fn has_any<'a, I>(&self, required: I) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        required.into_iter().any(|p| self.has(p))
    }

    /// The subset of `required` that is not granted, for 403 bodies.
    /// The granted set itself is never exposed.
    #[must_use]
    pub fn missing<'a, I>(&self, required: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        required
            .into_iter()
            .filter(|p| !self.has(p))
            .map(str::to_string)
            .collect()
    }

    /// Number of granted permissions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.granted.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.granted.is_empty()
    }
}
