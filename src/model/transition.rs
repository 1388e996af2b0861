//! Transition edges of the model arena.

use super::executable::ExecutableContent;
use super::state::StateId;

/// Index of a transition in the model arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransitionId(pub(crate) usize);

/// An immutable transition. The source is absent only for the top-level
/// initial transition; an empty target list makes the transition internal
/// effect-only (it exits nothing); an empty event list makes it eventless.
#[derive(Debug)]
pub struct Transition {
    pub(crate) source: Option<StateId>,
    pub(crate) targets: Vec<StateId>,
    pub(crate) events: Vec<String>,
    pub(crate) cond: Option<String>,
    pub(crate) internal: bool,
    pub(crate) executable: Option<ExecutableContent>,
}

impl Transition {
    pub fn source(&self) -> Option<StateId> {
        self.source
    }

    pub fn targets(&self) -> &[StateId] {
        &self.targets
    }

    pub fn events(&self) -> &[String] {
        &self.events
    }

    pub fn condition(&self) -> Option<&str> {
        self.cond.as_deref()
    }

    pub fn is_internal(&self) -> bool {
        self.internal
    }

    pub fn executable(&self) -> Option<&ExecutableContent> {
        self.executable.as_ref()
    }
}

/// Event descriptor matching: a fired event name matches a descriptor iff
/// the descriptor is `*`, the names are equal, or the descriptor is a
/// dot-delimited prefix of the name.
pub fn event_matches(event_name: &str, descriptors: &[String]) -> bool {
    for descriptor in descriptors {
        if descriptor == "*" {
            return true;
        }
        if let Some(rest) = event_name.strip_prefix(descriptor.as_str()) {
            if rest.is_empty() || rest.starts_with('.') {
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptors(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn wildcard_matches_everything() {
        assert!(event_matches("anything.at.all", &descriptors(&["*"])));
    }

    #[test]
    fn exact_and_hierarchical_prefix_match() {
        let events = descriptors(&["event_A"]);
        assert!(event_matches("event_A", &events));
        assert!(event_matches("event_A.sub", &events));
        assert!(event_matches("event_A.sub.deeper", &events));
        assert!(!event_matches("event_AB", &events));
        assert!(!event_matches("event", &events));
    }

    #[test]
    fn any_descriptor_in_the_list_may_match() {
        let events = descriptors(&["a.b", "c"]);
        assert!(event_matches("c.d", &events));
        assert!(event_matches("a.b.c", &events));
        assert!(!event_matches("a", &events));
    }

    #[test]
    fn empty_descriptor_list_matches_nothing() {
        assert!(!event_matches("x", &[]));
    }
}
