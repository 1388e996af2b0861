//! The immutable chart model and the structural queries the executor needs.
//!
//! A `Model` owns every state and transition in an arena; states refer to
//! each other by index, so the parent back-edge is weak and the tree has a
//! single owner. On top of the arena sit the SCXML structural algorithms:
//! document-order comparison, proper ancestors, transition domains, entry
//! and exit sets, transition selection with conflict removal, the final-
//! configuration test, and snapshot restoration.
//!
//! No model operation ever panics or aborts the session; operations that
//! evaluate conditions may enqueue `error.execution` on the runtime.

pub mod executable;
pub mod state;
pub mod transition;

pub use executable::{ExecutableContent, SendElement, StrOrExpr};
pub use state::{State, StateId, StateKind};
pub use transition::{event_matches, Transition, TransitionId};

use std::collections::VecDeque;

use rustc_hash::FxHashSet;

use crate::runtime::{ActiveStateElement, Runtime};

/// The immutable chart: an arena of states and transitions plus the
/// top-level structure.
#[derive(Debug)]
pub struct Model {
    pub(crate) name: String,
    pub(crate) states: Vec<State>,
    pub(crate) transitions: Vec<Transition>,
    pub(crate) top_level: Vec<StateId>,
    pub(crate) initial_transition: TransitionId,
    pub(crate) datamodel: Option<ExecutableContent>,
}

impl Model {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self, sid: StateId) -> &State {
        &self.states[sid.0]
    }

    pub fn transition(&self, tid: TransitionId) -> &Transition {
        &self.transitions[tid.0]
    }

    /// Top-level states in document order.
    pub fn top_level_states(&self) -> &[StateId] {
        &self.top_level
    }

    /// The transition entered when the session starts.
    pub fn initial_transition(&self) -> TransitionId {
        self.initial_transition
    }

    pub fn datamodel_block(&self) -> Option<&ExecutableContent> {
        self.datamodel.as_ref()
    }

    /// Looks a state up by its chart id.
    pub fn find_state(&self, id: &str) -> Option<StateId> {
        self.states
            .iter()
            .position(|s| s.id() == id)
            .map(StateId)
    }

    /// The chain from a state's parent up to, but not including, `limit`
    /// (the root when `limit` is None), youngest first.
    pub fn proper_ancestors(&self, sid: StateId, limit: Option<StateId>) -> Vec<StateId> {
        let mut ancestors = Vec::new();
        let mut parent = self.state(sid).parent();
        while parent != limit {
            let current = match parent {
                Some(p) => p,
                // The limit was not an ancestor; the chain ends at the root.
                None => break,
            };
            ancestors.push(current);
            parent = self.state(current).parent();
        }
        ancestors
    }

    /// Is `a` a strict descendant of `b`? The root (None) is a descendant
    /// of nothing and an ancestor of everything; a state is not its own
    /// descendant.
    pub fn is_descendant(&self, a: Option<StateId>, b: Option<StateId>) -> bool {
        let Some(a) = a else { return false };
        let Some(b) = b else { return true };
        if a == b {
            return false;
        }
        let mut parent = self.state(a).parent();
        while let Some(current) = parent {
            if current == b {
                return true;
            }
            parent = self.state(current).parent();
        }
        false
    }

    /// Strict document-order comparison: true iff `a` precedes `b` in the
    /// pre-order walk of the tree. An ancestor precedes its descendants;
    /// otherwise the divergent children of the lowest common ancestor are
    /// compared by child index.
    pub fn document_order_less(&self, a: StateId, b: StateId) -> bool {
        if a == b {
            return false;
        }
        let mut path_a = self.proper_ancestors(a, None);
        if path_a.contains(&b) {
            // b is an ancestor of a, so b comes first.
            return false;
        }
        let mut path_b = self.proper_ancestors(b, None);
        if path_b.contains(&a) {
            return true;
        }

        // Root-to-state paths; the first divergence is just below the
        // lowest common ancestor.
        path_a.reverse();
        path_a.push(a);
        path_b.reverse();
        path_b.push(b);
        let mut i = 0;
        while i < path_a.len() && i < path_b.len() && path_a[i] == path_b[i] {
            i += 1;
        }
        if i >= path_a.len() || i >= path_b.len() {
            return false;
        }
        self.state(path_a[i]).child_index < self.state(path_b[i]).child_index
    }

    /// Stable sort of `states` in (reverse) document order.
    pub fn sort_states_by_document_order(&self, reverse: bool, states: &mut [StateId]) {
        states.sort_by(|&x, &y| {
            let (a, b) = if reverse { (y, x) } else { (x, y) };
            if a == b {
                std::cmp::Ordering::Equal
            } else if self.document_order_less(a, b) {
                std::cmp::Ordering::Less
            } else {
                std::cmp::Ordering::Greater
            }
        });
    }

    /// The least common compound ancestor of `states`, or None for the root.
    fn find_least_common_compound_ancestor(&self, states: &[StateId]) -> Option<StateId> {
        let (&first, rest) = states.split_first()?;
        self.proper_ancestors(first, None)
            .into_iter()
            .filter(|&anc| self.state(anc).is_compound())
            .find(|&anc| {
                rest.iter()
                    .all(|&s| self.is_descendant(Some(s), Some(anc)))
            })
    }

    /// The subtree within which a transition's exits and entries operate.
    /// None represents the root. A transition with no targets has its source
    /// as domain, so implicit self-loops never exit their source.
    pub(crate) fn transition_domain(&self, tid: TransitionId) -> Option<StateId> {
        let transition = self.transition(tid);
        let targets = transition.targets();
        let Some(source) = transition.source() else {
            // The top-level initial transition operates on the whole chart.
            return None;
        };
        if targets.is_empty() {
            return Some(source);
        }
        if transition.is_internal()
            && self.state(source).is_compound()
            && targets
                .iter()
                .all(|&t| self.is_descendant(Some(t), Some(source)))
        {
            return Some(source);
        }
        let mut state_list = vec![source];
        state_list.extend_from_slice(targets);
        self.find_least_common_compound_ancestor(&state_list)
    }

    // Entry-set helpers, ported from the SCXML pseudo-code
    // addDescendantStatesToEnter / addAncestorStatesToEnter (history
    // pseudo-states are not modelled).

    fn add_descendant_states_to_enter(
        &self,
        sid: StateId,
        to_enter: &mut FxHashSet<StateId>,
        default_entry: &mut FxHashSet<StateId>,
    ) -> bool {
        to_enter.insert(sid);
        let state = self.state(sid);
        if state.is_compound() {
            default_entry.insert(sid);
            let Some(initial) = state.initial_transition() else {
                tracing::error!(state = state.id(), "compound state has no initial transition");
                return false;
            };
            for &target in self.transition(initial).targets() {
                if !self.add_descendant_states_to_enter(target, to_enter, default_entry) {
                    return false;
                }
                if !self.add_ancestor_states_to_enter(target, Some(sid), to_enter, default_entry) {
                    return false;
                }
            }
        } else if state.is_parallel() {
            for &child in state.children() {
                if !to_enter
                    .iter()
                    .any(|&s| self.is_descendant(Some(s), Some(child)))
                    && !self.add_descendant_states_to_enter(child, to_enter, default_entry)
                {
                    return false;
                }
            }
        }
        true
    }

    fn add_ancestor_states_to_enter(
        &self,
        sid: StateId,
        ancestor: Option<StateId>,
        to_enter: &mut FxHashSet<StateId>,
        default_entry: &mut FxHashSet<StateId>,
    ) -> bool {
        for anc in self.proper_ancestors(sid, ancestor) {
            to_enter.insert(anc);
            if self.state(anc).is_parallel() {
                for &child in self.state(anc).children() {
                    if !to_enter
                        .iter()
                        .any(|&s| self.is_descendant(Some(s), Some(child)))
                        && !self.add_descendant_states_to_enter(child, to_enter, default_entry)
                    {
                        return false;
                    }
                }
            }
        }
        true
    }

    /// The states entered by taking `transitions`: every target, its
    /// required descendants (default-entry children of compounds, all
    /// children of parallels), and the ancestors up to each transition's
    /// domain. Returns the set in entry (document) order plus the states
    /// entered by default, or None when computation fails.
    pub fn compute_entry_set(
        &self,
        _runtime: &Runtime,
        transitions: &[TransitionId],
    ) -> Option<(Vec<StateId>, FxHashSet<StateId>)> {
        let mut to_enter: FxHashSet<StateId> = FxHashSet::default();
        let mut default_entry: FxHashSet<StateId> = FxHashSet::default();

        for &tid in transitions {
            to_enter.extend(self.transition(tid).targets().iter().copied());
        }
        let seeds: Vec<StateId> = to_enter.iter().copied().collect();
        for sid in seeds {
            if !self.add_descendant_states_to_enter(sid, &mut to_enter, &mut default_entry) {
                return None;
            }
        }
        for &tid in transitions {
            let domain = self.transition_domain(tid);
            for &target in self.transition(tid).targets() {
                if !self.add_ancestor_states_to_enter(
                    target,
                    domain,
                    &mut to_enter,
                    &mut default_entry,
                ) {
                    return None;
                }
            }
        }

        let mut ordered: Vec<StateId> = to_enter.into_iter().collect();
        self.sort_states_by_document_order(false, &mut ordered);
        Some((ordered, default_entry))
    }

    /// The active states exited by taking `transitions`: every active
    /// descendant of each transition's domain, in reverse document order.
    pub fn compute_exit_set(
        &self,
        runtime: &Runtime,
        transitions: &[TransitionId],
    ) -> Vec<StateId> {
        let mut to_exit: FxHashSet<StateId> = FxHashSet::default();
        for &tid in transitions {
            let domain = self.transition_domain(tid);
            for &active in runtime.active_states() {
                if self.is_descendant(Some(active), domain) {
                    to_exit.insert(active);
                }
            }
        }
        let mut ordered: Vec<StateId> = to_exit.into_iter().collect();
        self.sort_states_by_document_order(true, &mut ordered);
        ordered
    }

    /// Enabled eventless transitions for the current configuration.
    pub fn eventless_transitions(&self, runtime: &mut Runtime) -> Vec<TransitionId> {
        self.select_transitions(runtime, None)
    }

    /// Enabled transitions for a named event.
    pub fn transitions_for_event(&self, runtime: &mut Runtime, event: &str) -> Vec<TransitionId> {
        self.select_transitions(runtime, Some(event))
    }

    fn evaluate_condition(&self, runtime: &mut Runtime, tid: TransitionId) -> bool {
        let Some(cond) = self.transition(tid).condition() else {
            return true;
        };
        match runtime.datamodel().evaluate_bool(cond) {
            Ok(result) => result,
            Err(_) => {
                // A failing condition disables the transition and reports.
                runtime.enqueue_execution_error(&format!(
                    "transition condition failed to evaluate: {cond}"
                ));
                false
            }
        }
    }

    /// For each active atomic state in document order, walks the state and
    /// its ancestors looking for the first transition whose descriptors
    /// match and whose condition holds, then removes conflicts.
    fn select_transitions(
        &self,
        runtime: &mut Runtime,
        event: Option<&str>,
    ) -> Vec<TransitionId> {
        let mut atomic: Vec<StateId> = runtime
            .active_states()
            .iter()
            .copied()
            .filter(|&sid| self.state(sid).is_atomic())
            .collect();
        self.sort_states_by_document_order(false, &mut atomic);

        let mut enabled: Vec<TransitionId> = Vec::new();
        for sid in atomic {
            let mut path = vec![sid];
            path.extend(self.proper_ancestors(sid, None));
            'state: for walk in path {
                for &tid in self.state(walk).transitions() {
                    let matches = match event {
                        None => self.transition(tid).events().is_empty(),
                        Some(name) => {
                            !self.transition(tid).events().is_empty()
                                && event_matches(name, self.transition(tid).events())
                        }
                    };
                    if matches && self.evaluate_condition(runtime, tid) {
                        enabled.push(tid);
                        break 'state;
                    }
                }
            }
        }
        self.remove_conflicting_transitions(runtime, enabled)
    }

    /// Two transitions conflict iff their exit sets intersect. Candidates
    /// are kept in selection order; an inner (descendant-source) candidate
    /// evicts the outer transitions it conflicts with, anything else is
    /// preempted by the earlier winner.
    fn remove_conflicting_transitions(
        &self,
        runtime: &Runtime,
        transitions: Vec<TransitionId>,
    ) -> Vec<TransitionId> {
        let mut filtered: Vec<TransitionId> = Vec::new();
        for t1 in transitions {
            let exit1 = self.compute_exit_set(runtime, &[t1]);
            let mut preempted = false;
            let mut to_remove: FxHashSet<TransitionId> = FxHashSet::default();
            for &t2 in &filtered {
                let exit2 = self.compute_exit_set(runtime, &[t2]);
                if exit1.iter().any(|s| exit2.contains(s)) {
                    if self.is_descendant(self.transition(t1).source(), self.transition(t2).source())
                    {
                        to_remove.insert(t2);
                    } else {
                        preempted = true;
                        break;
                    }
                }
            }
            if !preempted {
                filtered.retain(|t| !to_remove.contains(t));
                filtered.push(t1);
            }
        }
        filtered
    }

    /// A compound state is in a final configuration iff some final child is
    /// active; a parallel state iff every child is, recursively.
    pub fn is_in_final_state(&self, runtime: &Runtime, sid: StateId) -> bool {
        let state = self.state(sid);
        if state.is_compound() {
            state
                .children()
                .iter()
                .any(|&c| self.state(c).is_final() && runtime.active_states().contains(&c))
        } else if state.is_parallel() {
            state
                .children()
                .iter()
                .all(|&c| self.is_in_final_state(runtime, c))
        } else {
            false
        }
    }

    /// Translates a serialized active tree back into state references,
    /// top-down breadth-first. Unknown ids are skipped with a warning so a
    /// snapshot from a slightly newer chart still restores.
    pub fn resolve_active_tree(
        &self,
        elements: &[ActiveStateElement],
    ) -> Vec<(StateId, String)> {
        let mut resolved = Vec::new();
        let mut queue: VecDeque<(&ActiveStateElement, StateId)> = VecDeque::new();

        for element in elements {
            match self
                .top_level
                .iter()
                .find(|&&sid| self.state(sid).id() == element.id)
            {
                Some(&sid) => queue.push_back((element, sid)),
                None => tracing::warn!(id = %element.id, "state was not found"),
            }
        }
        while let Some((element, sid)) = queue.pop_front() {
            resolved.push((sid, self.state(sid).id().to_string()));
            for child in &element.active_child {
                match self
                    .state(sid)
                    .children()
                    .iter()
                    .find(|&&c| self.state(c).id() == child.id)
                {
                    Some(&child_sid) => queue.push_back((child, child_sid)),
                    None => tracing::warn!(id = %child.id, "state was not found"),
                }
            }
        }
        resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::charts::ChartDoc;
    use crate::functions::FunctionDispatcher;
    use serde_json::json;
    use std::sync::Arc;

    // A: compound {a1, a2}; P: parallel {R1{r1a, r1b}, R2{r2a}}; Z: atomic.
    // Transitions: a1 -go-> a2; a1 -jump-> P; r1a -hop-> r1b; P -done-> Z.
    fn fixture() -> Model {
        let doc: ChartDoc = serde_json::from_value(json!({
            "name": "fixture",
            "states": [
                {"state": {
                    "id": "A",
                    "states": [
                        {"state": {
                            "id": "a1",
                            "transitions": [
                                {"event": ["go"], "target": ["a2"]},
                                {"event": ["jump"], "target": ["P"]}
                            ]
                        }},
                        {"state": {"id": "a2"}}
                    ]
                }},
                {"parallel": {
                    "id": "P",
                    "transitions": [{"event": ["done"], "target": ["Z"]}],
                    "states": [
                        {"state": {
                            "id": "R1",
                            "states": [
                                {"state": {
                                    "id": "r1a",
                                    "transitions": [{"event": ["hop"], "target": ["r1b"]}]
                                }},
                                {"state": {"id": "r1b"}}
                            ]
                        }},
                        {"state": {
                            "id": "R2",
                            "states": [{"state": {"id": "r2a"}}]
                        }}
                    ]
                }},
                {"state": {"id": "Z"}}
            ]
        }))
        .unwrap();
        doc.compile().unwrap()
    }

    fn sid(model: &Model, id: &str) -> StateId {
        model.find_state(id).unwrap()
    }

    fn ids(model: &Model, states: &[StateId]) -> Vec<String> {
        states
            .iter()
            .map(|&s| model.state(s).id().to_string())
            .collect()
    }

    fn runtime_with_active(model: &Model, active: &[&str]) -> Runtime {
        let mut runtime = Runtime::new(Arc::new(FunctionDispatcher::new()));
        runtime.set_running(true);
        for id in active {
            runtime.add_active_state(sid(model, id), id);
        }
        runtime
    }

    fn transition_on(model: &Model, state: &str, index: usize) -> TransitionId {
        model.state(sid(model, state)).transitions()[index]
    }

    #[test]
    fn proper_ancestors_walk_to_the_limit() {
        let model = fixture();
        let r1a = sid(&model, "r1a");
        assert_eq!(
            ids(&model, &model.proper_ancestors(r1a, None)),
            ["R1", "P"]
        );
        assert_eq!(
            ids(&model, &model.proper_ancestors(r1a, Some(sid(&model, "P")))),
            ["R1"]
        );
        assert!(model
            .proper_ancestors(sid(&model, "A"), None)
            .is_empty());
    }

    #[test]
    fn descendant_relation() {
        let model = fixture();
        let r1a = Some(sid(&model, "r1a"));
        let p = Some(sid(&model, "P"));
        assert!(model.is_descendant(r1a, p));
        assert!(!model.is_descendant(p, r1a));
        assert!(!model.is_descendant(p, p));
        // Everything descends from the root; the root descends from nothing.
        assert!(model.is_descendant(p, None));
        assert!(!model.is_descendant(None, p));
    }

    #[test]
    fn document_order_follows_the_chart_text() {
        let model = fixture();
        let order = ["A", "a1", "a2", "P", "R1", "r1a", "r1b", "R2", "r2a", "Z"];
        for (i, a) in order.iter().enumerate() {
            for b in order.iter().skip(i + 1) {
                assert!(
                    model.document_order_less(sid(&model, a), sid(&model, b)),
                    "{a} should precede {b}"
                );
                assert!(!model.document_order_less(sid(&model, b), sid(&model, a)));
            }
        }
    }

    #[test]
    fn domain_of_a_targetless_transition_is_its_source() {
        let doc: ChartDoc = serde_json::from_value(json!({
            "name": "t",
            "states": [{"state": {
                "id": "s",
                "transitions": [{"event": ["e"]}]
            }}]
        }))
        .unwrap();
        let model = doc.compile().unwrap();
        let tid = transition_on(&model, "s", 0);
        assert_eq!(model.transition_domain(tid), Some(sid(&model, "s")));
        // And therefore an implicit self-loop exits nothing.
        let runtime = runtime_with_active(&model, &["s"]);
        assert!(model.compute_exit_set(&runtime, &[tid]).is_empty());
    }

    #[test]
    fn entry_set_expands_parallel_regions_and_default_children() {
        let model = fixture();
        let runtime = runtime_with_active(&model, &["A", "a1"]);
        let jump = transition_on(&model, "a1", 1);

        let (ordered, default_entry) = model.compute_entry_set(&runtime, &[jump]).unwrap();
        assert_eq!(ids(&model, &ordered), ["P", "R1", "r1a", "R2", "r2a"]);
        // The region compounds entered via their initial transitions.
        assert!(default_entry.contains(&sid(&model, "R1")));
        assert!(default_entry.contains(&sid(&model, "R2")));
        assert!(!default_entry.contains(&sid(&model, "P")));
    }

    #[test]
    fn exit_set_is_active_descendants_of_the_domain_in_reverse_order() {
        let model = fixture();
        let runtime = runtime_with_active(&model, &["P", "R1", "r1a", "R2", "r2a"]);
        let done = transition_on(&model, "P", 0);

        let exits = model.compute_exit_set(&runtime, &[done]);
        assert_eq!(ids(&model, &exits), ["r2a", "R2", "r1a", "R1", "P"]);
    }

    #[test]
    fn selection_prefers_the_innermost_state_and_document_order() {
        let model = fixture();
        let mut runtime = runtime_with_active(&model, &["A", "a1"]);
        let picked = model.transitions_for_event(&mut runtime, "go");
        assert_eq!(picked, vec![transition_on(&model, "a1", 0)]);
        // No eventless transitions anywhere.
        assert!(model.eventless_transitions(&mut runtime).is_empty());
        // Unknown events select nothing.
        assert!(model.transitions_for_event(&mut runtime, "nothing").is_empty());
    }

    #[test]
    fn failing_conditions_disable_and_report() {
        let doc: ChartDoc = serde_json::from_value(json!({
            "name": "c",
            "states": [
                {"state": {
                    "id": "s",
                    "transitions": [{"event": ["e"], "cond": "broken +", "target": ["t"]}]
                }},
                {"state": {"id": "t"}}
            ]
        }))
        .unwrap();
        let model = doc.compile().unwrap();
        let mut runtime = runtime_with_active(&model, &["s"]);
        assert!(model.transitions_for_event(&mut runtime, "e").is_empty());
        assert!(runtime.has_internal_event());
        let event = runtime.dequeue_internal_event().unwrap();
        assert_eq!(event.name, "error.execution");
    }

    #[test]
    fn final_configuration_detection() {
        let doc: ChartDoc = serde_json::from_value(json!({
            "name": "f",
            "states": [
                {"parallel": {
                    "id": "p",
                    "states": [
                        {"state": {
                            "id": "left",
                            "states": [
                                {"state": {"id": "l_run"}},
                                {"final": {"id": "l_done"}}
                            ]
                        }},
                        {"state": {
                            "id": "right",
                            "states": [
                                {"state": {"id": "r_run"}},
                                {"final": {"id": "r_done"}}
                            ]
                        }}
                    ]
                }}
            ]
        }))
        .unwrap();
        let model = doc.compile().unwrap();

        let runtime = runtime_with_active(&model, &["p", "left", "l_done", "right", "r_run"]);
        assert!(model.is_in_final_state(&runtime, sid(&model, "left")));
        assert!(!model.is_in_final_state(&runtime, sid(&model, "right")));
        assert!(!model.is_in_final_state(&runtime, sid(&model, "p")));

        let runtime = runtime_with_active(&model, &["p", "left", "l_done", "right", "r_done"]);
        assert!(model.is_in_final_state(&runtime, sid(&model, "p")));
    }

    #[test]
    fn resolve_active_tree_skips_unknown_ids() {
        let model = fixture();
        let tree = vec![ActiveStateElement {
            id: "P".to_string(),
            active_child: vec![
                ActiveStateElement {
                    id: "R1".to_string(),
                    active_child: vec![ActiveStateElement {
                        id: "mystery".to_string(),
                        active_child: vec![],
                    }],
                },
                ActiveStateElement {
                    id: "also_mystery".to_string(),
                    active_child: vec![],
                },
            ],
        }];
        let resolved = model.resolve_active_tree(&tree);
        let resolved_ids: Vec<&str> = resolved.iter().map(|(_, id)| id.as_str()).collect();
        assert_eq!(resolved_ids, ["P", "R1"]);
    }
}
