//! Compilation of chart documents into the model arena.
//!
//! The builder walks the document twice: the first pass instantiates every
//! state in document order (which fixes the pre-order used for
//! tie-breaking); the second pass resolves transition targets, synthesizes
//! default initial transitions, and converts executable content. Every
//! configuration error is reported here — a compiled model never fails
//! structurally at runtime.

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use thiserror::Error;

use super::{
    ActionDoc, Binding, ChartDoc, DataEntry, ForeachDoc, IfDoc, SendDoc, StateDoc, StateNodeDoc,
    TransitionDoc, TransitionKind,
};
use crate::model::{
    ExecutableContent, Model, SendElement, State, StateId, StateKind, StrOrExpr, Transition,
    TransitionId,
};

/// Configuration errors: a bad chart is rejected at build time.
#[derive(Debug, Error, Diagnostic)]
pub enum BuilderError {
    #[error("chart has no name")]
    #[diagnostic(code(statechart::builder::empty_chart_name))]
    EmptyChartName,

    #[error("late datamodel binding is not supported")]
    #[diagnostic(
        code(statechart::builder::unsupported_binding),
        help("Use early binding; late binding is declared but not implemented.")
    )]
    UnsupportedBinding,

    #[error("chart '{chart}' has no states")]
    #[diagnostic(code(statechart::builder::no_states))]
    NoStates { chart: String },

    #[error("state with empty id")]
    #[diagnostic(code(statechart::builder::empty_state_id))]
    EmptyStateId,

    #[error("duplicate state id: {id}")]
    #[diagnostic(code(statechart::builder::duplicate_state_id))]
    DuplicateStateId { id: String },

    #[error("parallel state '{parallel}' has final child '{child}'")]
    #[diagnostic(
        code(statechart::builder::final_child_of_parallel),
        help("Wrap the final state in a compound child of the parallel region.")
    )]
    FinalChildOfParallel { parallel: String, child: String },

    #[error("transition from '{from_state}' targets unknown state '{target}'")]
    #[diagnostic(code(statechart::builder::unknown_target_state))]
    UnknownTargetState { from_state: String, target: String },

    #[error("chart initial list names unknown state '{id}'")]
    #[diagnostic(code(statechart::builder::unknown_initial_state))]
    UnknownInitialState { id: String },

    #[error("initial declaration on non-compound state '{state}'")]
    #[diagnostic(code(statechart::builder::initial_on_non_compound))]
    InitialOnNonCompound { state: String },

    #[error("initial transition of '{state}' targets non-descendant '{target}'")]
    #[diagnostic(code(statechart::builder::initial_target_not_descendant))]
    InitialTargetNotDescendant { state: String, target: String },

    #[error("initial transition of '{state}' has no targets")]
    #[diagnostic(code(statechart::builder::empty_initial_transition))]
    EmptyInitialTransition { state: String },

    #[error("initial transition of '{state}' may not carry events or a condition")]
    #[diagnostic(code(statechart::builder::initial_transition_with_triggers))]
    InitialTransitionWithTriggers { state: String },

    #[error("transition from '{from_state}' has an empty event descriptor")]
    #[diagnostic(code(statechart::builder::empty_event_descriptor))]
    EmptyEventDescriptor { from_state: String },

    #[error("'if' has a non-final else branch")]
    #[diagnostic(
        code(statechart::builder::misplaced_else_branch),
        help("Only the last branch of an 'if' may have an empty condition.")
    )]
    MisplacedElseBranch,

    #[error("data entry '{id}' uses 'src', which is not supported")]
    #[diagnostic(code(statechart::builder::unsupported_data_src))]
    UnsupportedDataSrc { id: String },

    #[error("'foreach' is missing an item location")]
    #[diagnostic(code(statechart::builder::missing_foreach_item))]
    MissingForeachItem,

    #[error("'send' supplies both '{attribute}' and '{attribute}_expr'")]
    #[diagnostic(code(statechart::builder::conflicting_send_attribute))]
    ConflictingSendAttribute { attribute: String },
}

pub(super) struct ModelBuilder<'d> {
    doc: &'d ChartDoc,
    states: Vec<State>,
    transitions: Vec<Transition>,
    ids: FxHashMap<String, StateId>,
    /// Arena id → document node, for the resolution pass.
    docs: Vec<(StateId, &'d StateDoc)>,
}

impl<'d> ModelBuilder<'d> {
    pub(super) fn new(doc: &'d ChartDoc) -> Self {
        Self {
            doc,
            states: Vec::new(),
            transitions: Vec::new(),
            ids: FxHashMap::default(),
            docs: Vec::new(),
        }
    }

    pub(super) fn build(mut self) -> Result<Model, BuilderError> {
        if self.doc.name.is_empty() {
            return Err(BuilderError::EmptyChartName);
        }
        if self.doc.binding == Binding::Late {
            return Err(BuilderError::UnsupportedBinding);
        }
        if self.doc.states.is_empty() {
            return Err(BuilderError::NoStates {
                chart: self.doc.name.clone(),
            });
        }

        // Pass 1: instantiate states in document (pre-)order.
        let doc = self.doc;
        let mut top_level = Vec::new();
        for (index, state_doc) in doc.states.iter().enumerate() {
            top_level.push(self.instantiate(state_doc, None, index)?);
        }

        // Pass 2: resolve transitions and executable content.
        for (sid, state_doc) in std::mem::take(&mut self.docs) {
            self.resolve(sid, state_doc)?;
        }

        // The top-level initial transition; defaults to the first state.
        let initial_targets = if self.doc.initial.is_empty() {
            vec![top_level[0]]
        } else {
            self.doc
                .initial
                .iter()
                .map(|id| {
                    self.ids
                        .get(id)
                        .copied()
                        .ok_or_else(|| BuilderError::UnknownInitialState { id: id.clone() })
                })
                .collect::<Result<Vec<_>, _>>()?
        };
        let initial_transition = self.push_transition(Transition {
            source: None,
            targets: initial_targets,
            events: Vec::new(),
            cond: None,
            internal: false,
            executable: None,
        });

        let datamodel = self.convert_datamodel(&self.doc.datamodel)?;

        Ok(Model {
            name: self.doc.name.clone(),
            states: self.states,
            transitions: self.transitions,
            top_level,
            initial_transition,
            datamodel,
        })
    }

    fn instantiate(
        &mut self,
        doc: &'d StateDoc,
        parent: Option<StateId>,
        child_index: usize,
    ) -> Result<StateId, BuilderError> {
        let id = doc.id();
        if id.is_empty() {
            return Err(BuilderError::EmptyStateId);
        }
        if self.ids.contains_key(id) {
            return Err(BuilderError::DuplicateStateId { id: id.to_string() });
        }

        let (kind, children_docs): (StateKind, &[StateDoc]) = match doc {
            StateDoc::Final(_) => (StateKind::Final, &[]),
            StateDoc::Parallel(node) => {
                for child in &node.states {
                    if matches!(child, StateDoc::Final(_)) {
                        return Err(BuilderError::FinalChildOfParallel {
                            parallel: id.to_string(),
                            child: child.id().to_string(),
                        });
                    }
                }
                (StateKind::Parallel, &node.states)
            }
            StateDoc::State(node) => {
                if node.states.is_empty() {
                    (StateKind::Atomic, &[])
                } else {
                    (StateKind::Compound, &node.states)
                }
            }
        };

        let sid = StateId(self.states.len());
        self.states.push(State {
            id: id.to_string(),
            kind,
            parent,
            children: Vec::new(),
            child_index,
            datamodel: None,
            on_entry: None,
            on_exit: None,
            transitions: Vec::new(),
            initial: None,
        });
        self.ids.insert(id.to_string(), sid);
        self.docs.push((sid, doc));

        let mut children = Vec::with_capacity(children_docs.len());
        for (index, child_doc) in children_docs.iter().enumerate() {
            children.push(self.instantiate(child_doc, Some(sid), index)?);
        }
        self.states[sid.0].children = children;
        Ok(sid)
    }

    fn resolve(&mut self, sid: StateId, doc: &'d StateDoc) -> Result<(), BuilderError> {
        let (onentry, onexit) = match doc {
            StateDoc::State(node) | StateDoc::Parallel(node) => (&node.onentry, &node.onexit),
            StateDoc::Final(node) => (&node.onentry, &node.onexit),
        };
        self.states[sid.0].on_entry = self.convert_block(onentry)?;
        self.states[sid.0].on_exit = self.convert_block(onexit)?;

        let (StateDoc::State(node) | StateDoc::Parallel(node)) = doc else {
            return Ok(());
        };

        self.states[sid.0].datamodel = self.convert_datamodel(&node.datamodel)?;

        for transition_doc in &node.transitions {
            let tid = self.convert_transition(sid, transition_doc)?;
            self.states[sid.0].transitions.push(tid);
        }

        self.resolve_initial(sid, node)
    }

    /// Attaches the initial transition of a compound state: explicit
    /// `initial` transition, `initial_id` list, or the first child.
    fn resolve_initial(&mut self, sid: StateId, node: &StateNodeDoc) -> Result<(), BuilderError> {
        let declares_initial = node.initial.is_some() || !node.initial_id.is_empty();
        if !self.states[sid.0].is_compound() {
            if declares_initial {
                return Err(BuilderError::InitialOnNonCompound {
                    state: node.id.clone(),
                });
            }
            return Ok(());
        }

        let (targets, executable) = if let Some(initial_doc) = &node.initial {
            if !initial_doc.event.is_empty() || initial_doc.cond.as_deref().is_some_and(|c| !c.is_empty())
            {
                return Err(BuilderError::InitialTransitionWithTriggers {
                    state: node.id.clone(),
                });
            }
            let targets = self.resolve_targets(&node.id, &initial_doc.target)?;
            (targets, self.convert_block(&initial_doc.executable)?)
        } else if !node.initial_id.is_empty() {
            (self.resolve_targets(&node.id, &node.initial_id)?, None)
        } else {
            // Default entry: the first child in document order.
            (vec![self.states[sid.0].children[0]], None)
        };

        if targets.is_empty() {
            return Err(BuilderError::EmptyInitialTransition {
                state: node.id.clone(),
            });
        }
        for &target in &targets {
            if !self.is_descendant(target, sid) {
                return Err(BuilderError::InitialTargetNotDescendant {
                    state: node.id.clone(),
                    target: self.states[target.0].id().to_string(),
                });
            }
        }

        let tid = self.push_transition(Transition {
            source: Some(sid),
            targets,
            events: Vec::new(),
            cond: None,
            internal: false,
            executable,
        });
        self.states[sid.0].initial = Some(tid);
        Ok(())
    }

    fn convert_transition(
        &mut self,
        source: StateId,
        doc: &TransitionDoc,
    ) -> Result<TransitionId, BuilderError> {
        let source_id = self.states[source.0].id().to_string();
        let mut events = Vec::with_capacity(doc.event.len());
        for descriptor in &doc.event {
            // `.*` and trailing `.` suffixes are equivalent to the bare
            // descriptor.
            let stripped = descriptor
                .strip_suffix(".*")
                .or_else(|| descriptor.strip_suffix('.'))
                .unwrap_or(descriptor);
            if stripped.is_empty() {
                return Err(BuilderError::EmptyEventDescriptor { from_state: source_id });
            }
            events.push(stripped.to_string());
        }

        let targets = self.resolve_targets(&source_id, &doc.target)?;
        let cond = doc.cond.clone().filter(|c| !c.is_empty());
        let executable = self.convert_block(&doc.executable)?;
        Ok(self.push_transition(Transition {
            source: Some(source),
            targets,
            events,
            cond,
            internal: doc.kind == TransitionKind::Internal,
            executable,
        }))
    }

    fn resolve_targets(
        &self,
        source_id: &str,
        targets: &[String],
    ) -> Result<Vec<StateId>, BuilderError> {
        targets
            .iter()
            .map(|target| {
                self.ids
                    .get(target)
                    .copied()
                    .ok_or_else(|| BuilderError::UnknownTargetState {
                        from_state: source_id.to_string(),
                        target: target.clone(),
                    })
            })
            .collect()
    }

    fn push_transition(&mut self, transition: Transition) -> TransitionId {
        let tid = TransitionId(self.transitions.len());
        self.transitions.push(transition);
        tid
    }

    fn is_descendant(&self, a: StateId, b: StateId) -> bool {
        if a == b {
            return false;
        }
        let mut parent = self.states[a.0].parent();
        while let Some(current) = parent {
            if current == b {
                return true;
            }
            parent = self.states[current.0].parent();
        }
        false
    }

    fn convert_datamodel(
        &self,
        entries: &[DataEntry],
    ) -> Result<Option<ExecutableContent>, BuilderError> {
        if entries.is_empty() {
            return Ok(None);
        }
        let mut block = Vec::with_capacity(entries.len());
        for entry in entries {
            if !entry.src.is_empty() {
                return Err(BuilderError::UnsupportedDataSrc {
                    id: entry.id.clone(),
                });
            }
            block.push(ExecutableContent::Data {
                location: entry.id.clone(),
                expr: entry.expr.clone(),
            });
        }
        Ok(Some(ExecutableContent::Block(block)))
    }

    fn convert_block(&self, actions: &[ActionDoc]) -> Result<Option<ExecutableContent>, BuilderError> {
        if actions.is_empty() {
            return Ok(None);
        }
        let converted = actions
            .iter()
            .map(|a| self.convert_action(a))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Some(ExecutableContent::Block(converted)))
    }

    fn convert_action(&self, action: &ActionDoc) -> Result<ExecutableContent, BuilderError> {
        Ok(match action {
            ActionDoc::Assign { location, expr } => ExecutableContent::Assign {
                location: location.clone(),
                expr: expr.clone(),
            },
            ActionDoc::Raise { event } => ExecutableContent::Raise {
                event: event.clone(),
            },
            ActionDoc::Log { label, expr } => ExecutableContent::Log {
                label: label.clone(),
                expr: expr.clone(),
            },
            ActionDoc::Send(send) => ExecutableContent::Send(self.convert_send(send)?),
            ActionDoc::If(doc) => self.convert_if(doc)?,
            ActionDoc::Foreach(doc) => self.convert_foreach(doc)?,
        })
    }

    fn convert_if(&self, doc: &IfDoc) -> Result<ExecutableContent, BuilderError> {
        let mut branches = Vec::with_capacity(doc.branches.len());
        for (index, branch) in doc.branches.iter().enumerate() {
            // Only the last branch may be an else.
            if branch.cond.is_empty() && index + 1 != doc.branches.len() {
                return Err(BuilderError::MisplacedElseBranch);
            }
            branches.push((branch.cond.clone(), self.convert_block(&branch.executable)?));
        }
        Ok(ExecutableContent::If { branches })
    }

    fn convert_foreach(&self, doc: &ForeachDoc) -> Result<ExecutableContent, BuilderError> {
        if doc.item.is_empty() {
            return Err(BuilderError::MissingForeachItem);
        }
        Ok(ExecutableContent::ForEach {
            array: doc.array.clone(),
            item: doc.item.clone(),
            index: doc.index.clone(),
            body: self
                .convert_block(&doc.executable)?
                .map(Box::new),
        })
    }

    fn convert_send(&self, doc: &SendDoc) -> Result<SendElement, BuilderError> {
        fn attribute(
            name: &str,
            literal: &Option<String>,
            expr: &Option<String>,
        ) -> Result<Option<StrOrExpr>, BuilderError> {
            match (literal, expr) {
                (Some(_), Some(_)) => Err(BuilderError::ConflictingSendAttribute {
                    attribute: name.to_string(),
                }),
                (Some(literal), None) => Ok(Some(StrOrExpr::Literal(literal.clone()))),
                (None, Some(expr)) => Ok(Some(StrOrExpr::Expr(expr.clone()))),
                (None, None) => Ok(None),
            }
        }
        // A namelist entry sends a location under its own name and shadows
        // any param with that name; for duplicates the first entry wins.
        let mut params = std::collections::BTreeMap::new();
        for id in &doc.namelist {
            params.entry(id.clone()).or_insert_with(|| id.clone());
        }
        for (name, expr) in &doc.params {
            params
                .entry(name.clone())
                .or_insert_with(|| expr.clone());
        }
        Ok(SendElement {
            event: attribute("event", &doc.event, &doc.event_expr)?,
            target: attribute("target", &doc.target, &doc.target_expr)?,
            id: attribute("id", &doc.id, &doc.id_expr)?,
            event_type: attribute("type", &doc.event_type, &doc.type_expr)?,
            params,
        })
    }
}
