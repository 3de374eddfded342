//! Routing decisions made once per query by the historical router.

use serde::{Deserialize, Serialize};

/// How the agent should handle a query given its conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "path", rename_all = "snake_case")]
pub enum RoutingDecision {
    /// History already answers the query completely.
    DirectAnswer { answer: String },
    /// History is relevant but incomplete; it is injected into the loop.
    ContextAware { context_text: String },
    /// No usable history; run the full loop from scratch.
    FreshApproach,
}

impl RoutingDecision {
    pub fn kind(&self) -> RouteKind {
        match self {
            Self::DirectAnswer { .. } => RouteKind::DirectAnswer,
            Self::ContextAware { .. } => RouteKind::ContextAware,
            Self::FreshApproach => RouteKind::FreshApproach,
        }
    }
}

/// The payload-free discriminant of a [`RoutingDecision`], stored on records
/// and carried by events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteKind {
    DirectAnswer,
    ContextAware,
    #[default]
    FreshApproach,
}

impl std::fmt::Display for RouteKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::DirectAnswer => "DIRECT_ANSWER",
            Self::ContextAware => "CONTEXT_AWARE",
            Self::FreshApproach => "FRESH_APPROACH",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_kind() {
        let d = RoutingDecision::ContextAware { context_text: "Previous Q: x".into() };
        assert_eq!(d.kind(), RouteKind::ContextAware);
        assert_eq!(RoutingDecision::FreshApproach.kind().to_string(), "FRESH_APPROACH");
    }

    #[test]
    fn decision_serializes_with_path_tag() {
        let d = RoutingDecision::DirectAnswer { answer: "42".into() };
        let json = serde_json::to_string(&d).unwrap();
        assert!(json.contains(r#""path":"direct_answer""#));
    }
}
