//! Method-name helpers.
//!
//! Names follow the `root.namespace.action` dotted convention, with the
//! leading segment being a fixed root token.  Validation is deliberately
//! permissive: any non-empty string is a legal name.  The dotted structure
//! only matters for discovery grouping.

/// The leading dotted segment (the root token).
pub fn root_of(name: &str) -> &str {
    name.split('.').next().unwrap_or(name)
}

/// The second dotted segment, used for grouping in discovery.
pub fn namespace_of(name: &str) -> Option<&str> {
    let mut segments = name.split('.');
    segments.next()?;
    segments.next().filter(|s| !s.is_empty())
}

/// Everything after the namespace, joined with dots.
pub fn action_of(name: &str) -> Option<String> {
    let mut segments = name.split('.');
    segments.next()?;
    segments.next()?;
    let rest: Vec<&str> = segments.collect();
    if rest.is_empty() {
        None
    } else {
        Some(rest.join("."))
    }
}

/// Any non-empty string is a legal method name.
pub fn is_valid_method_name(name: &str) -> bool {
    !name.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dotted_names_split_into_root_namespace_action() {
        assert_eq!(root_of("api.users.list"), "api");
        assert_eq!(namespace_of("api.users.list"), Some("users"));
        assert_eq!(action_of("api.users.list"), Some("list".to_owned()));
    }

    #[test]
    fn deep_actions_keep_their_remaining_segments() {
        assert_eq!(namespace_of("api.users.admin.create"), Some("users"));
        assert_eq!(
            action_of("api.users.admin.create"),
            Some("admin.create".to_owned())
        );
    }

    #[test]
    fn short_names_have_no_namespace_or_action() {
        assert_eq!(namespace_of("ping"), None);
        assert_eq!(action_of("ping"), None);
        assert_eq!(namespace_of("api.users"), Some("users"));
        assert_eq!(action_of("api.users"), None);
    }

    #[test]
    fn validation_is_permissive() {
        assert!(is_valid_method_name("anything goes here"));
        assert!(is_valid_method_name("a"));
        assert!(!is_valid_method_name(""));
    }
}
