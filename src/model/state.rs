//! State nodes of the model arena.

use super::executable::ExecutableContent;
use super::transition::TransitionId;

/// Index of a state in the model arena. The model is a tree with weak parent
/// back-references; the arena owns every node and ids never dangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateId(pub(crate) usize);

/// The structural kind of a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateKind {
    /// A leaf state.
    Atomic,
    /// A state with children of which exactly one is active at a time.
    Compound,
    /// A state whose children are all active while it is.
    Parallel,
    /// A leaf whose entry signals completion of its parent.
    Final,
}

/// An immutable state node. Child order is document order and is the
/// tie-breaker everywhere.
#[derive(Debug)]
pub struct State {
    pub(crate) id: String,
    pub(crate) kind: StateKind,
    pub(crate) parent: Option<StateId>,
    pub(crate) children: Vec<StateId>,
    /// Position within the parent's child list (or the top-level list).
    pub(crate) child_index: usize,
    pub(crate) datamodel: Option<ExecutableContent>,
    pub(crate) on_entry: Option<ExecutableContent>,
    pub(crate) on_exit: Option<ExecutableContent>,
    pub(crate) transitions: Vec<TransitionId>,
    pub(crate) initial: Option<TransitionId>,
}

impl State {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> StateKind {
        self.kind
    }

    pub fn parent(&self) -> Option<StateId> {
        self.parent
    }

    pub fn children(&self) -> &[StateId] {
        &self.children
    }

    pub fn transitions(&self) -> &[TransitionId] {
        &self.transitions
    }

    /// The initial transition of a compound state; None for other kinds.
    pub fn initial_transition(&self) -> Option<TransitionId> {
        self.initial
    }

    pub fn datamodel_block(&self) -> Option<&ExecutableContent> {
        self.datamodel.as_ref()
    }

    pub fn on_entry(&self) -> Option<&ExecutableContent> {
        self.on_entry.as_ref()
    }

    pub fn on_exit(&self) -> Option<&ExecutableContent> {
        self.on_exit.as_ref()
    }

    /// Leaf states: atomic and final.
    pub fn is_atomic(&self) -> bool {
        matches!(self.kind, StateKind::Atomic | StateKind::Final)
    }

    pub fn is_compound(&self) -> bool {
        self.kind == StateKind::Compound
    }

    pub fn is_parallel(&self) -> bool {
        self.kind == StateKind::Parallel
    }

    pub fn is_final(&self) -> bool {
        self.kind == StateKind::Final
    }
}
