//! Topic selection: turns the configured topic list into a filter policy.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Selector that records every available topic.
pub const WILDCARD: &str = "*";

/// Which topics a capture session records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "names", rename_all = "snake_case")]
pub enum FilterPolicy {
    /// Record exactly these topics, in configured order.
    AllowList(Vec<String>),
    /// Record every topic the recorder discovers.
    Everything,
}

impl FilterPolicy {
    /// Explicit topic names; empty for [`FilterPolicy::Everything`].
    pub fn topics(&self) -> &[String] {
        match self {
            Self::AllowList(names) => names,
            Self::Everything => &[],
        }
    }

    pub fn is_everything(&self) -> bool {
        matches!(self, Self::Everything)
    }
}

impl std::fmt::Display for FilterPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AllowList(names) => write!(f, "[{}]", names.join(", ")),
            Self::Everything => write!(f, "all topics"),
        }
    }
}

/// Resolve selectors into a policy.
///
/// A leading `"*"` selects everything and any further entries are ignored.
pub fn resolve<S: AsRef<str>>(selectors: &[S]) -> FilterPolicy {
    match selectors.first() {
        Some(first) if first.as_ref() == WILDCARD => {
            if selectors.len() > 1 {
                warn!(
                    "Wildcard selector given with {} extra topic(s); recording everything",
                    selectors.len() - 1
                );
            }
            FilterPolicy::Everything
        }
        _ => FilterPolicy::AllowList(
            selectors.iter().map(|s| s.as_ref().to_string()).collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcard_alone() {
        assert_eq!(resolve(&["*"]), FilterPolicy::Everything);
    }

    #[test]
    fn test_wildcard_dominates() {
        assert_eq!(resolve(&["*", "/foo"]), FilterPolicy::Everything);
    }

    #[test]
    fn test_allow_list_preserves_order() {
        let policy = resolve(&["/b", "/a"]);
        assert_eq!(policy, FilterPolicy::AllowList(vec!["/b".into(), "/a".into()]));
        assert_eq!(policy.topics(), ["/b", "/a"]);
    }

    #[test]
    fn test_wildcard_only_counts_in_first_position() {
        let policy = resolve(&["/a", "*"]);
        assert!(!policy.is_everything());
        assert_eq!(policy.topics().len(), 2);
    }

    #[test]
    fn test_display() {
        assert_eq!(FilterPolicy::Everything.to_string(), "all topics");
        assert_eq!(resolve(&["/a", "/b"]).to_string(), "[/a, /b]");
    }

    #[test]
    fn test_serialized_shape() {
        let json = serde_json::to_value(resolve(&["/a"])).unwrap();
        assert_eq!(json, serde_json::json!({"mode": "allow_list", "names": ["/a"]}));
        let json = serde_json::to_value(FilterPolicy::Everything).unwrap();
        assert_eq!(json, serde_json::json!({"mode": "everything"}));
    }
}
