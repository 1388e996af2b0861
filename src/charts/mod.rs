//! Declarative chart documents.
//!
//! A chart enters the system as a structured document — typically JSON —
//! deserialized into [`ChartDoc`] and compiled into an immutable
//! [`Model`](crate::model::Model). Unknown fields are rejected during
//! deserialization; structural problems are rejected by the builder with a
//! [`BuilderError`](builder::BuilderError).
//!
//! ```
//! use statechart::charts::ChartDoc;
//! use serde_json::json;
//!
//! let doc: ChartDoc = serde_json::from_value(json!({
//!     "name": "toggle",
//!     "states": [
//!         {"state": {
//!             "id": "off",
//!             "transitions": [{"event": ["flip"], "target": ["on"]}]
//!         }},
//!         {"state": {
//!             "id": "on",
//!             "transitions": [{"event": ["flip"], "target": ["off"]}]
//!         }}
//!     ]
//! }))
//! .unwrap();
//!
//! let model = doc.compile().unwrap();
//! assert_eq!(model.name(), "toggle");
//! ```

pub mod builder;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::Model;
use builder::{BuilderError, ModelBuilder};

/// Datamodel binding mode. Only early binding is supported; charts that
/// request late binding are rejected at build time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Binding {
    #[default]
    Early,
    Late,
}

/// Datamodel language selector. The ECMAScript-like datamodel is the only
/// one implemented.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatamodelType {
    #[default]
    Ecma,
}

/// One `data` entry of a datamodel block.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DataEntry {
    pub id: String,
    #[serde(default)]
    pub expr: String,
    /// External sources are not supported; a non-empty value is rejected.
    #[serde(default)]
    pub src: String,
}

/// A top-level or nested state node: `state`, `parallel`, or `final`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum StateDoc {
    State(StateNodeDoc),
    Parallel(StateNodeDoc),
    Final(FinalDoc),
}

impl StateDoc {
    pub fn id(&self) -> &str {
        match self {
            StateDoc::State(node) | StateDoc::Parallel(node) => &node.id,
            StateDoc::Final(node) => &node.id,
        }
    }
}

/// The body shared by `state` and `parallel` nodes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StateNodeDoc {
    pub id: String,
    /// Ids of the default-entry children; mutually exclusive with `initial`.
    #[serde(default)]
    pub initial_id: Vec<String>,
    /// A full initial transition, for default entries with executable
    /// content.
    #[serde(default)]
    pub initial: Option<Box<TransitionDoc>>,
    #[serde(default)]
    pub datamodel: Vec<DataEntry>,
    #[serde(default)]
    pub onentry: Vec<ActionDoc>,
    #[serde(default)]
    pub onexit: Vec<ActionDoc>,
    #[serde(default)]
    pub states: Vec<StateDoc>,
    #[serde(default)]
    pub transitions: Vec<TransitionDoc>,
}

/// A `final` node: no children, no outgoing transitions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FinalDoc {
    pub id: String,
    #[serde(default)]
    pub onentry: Vec<ActionDoc>,
    #[serde(default)]
    pub onexit: Vec<ActionDoc>,
}

/// External vs internal transition semantics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    #[default]
    External,
    Internal,
}

/// A transition edge. An empty `event` list means eventless; an empty
/// `target` list means an internal effect-only transition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransitionDoc {
    #[serde(default)]
    pub event: Vec<String>,
    #[serde(default)]
    pub target: Vec<String>,
    #[serde(default)]
    pub cond: Option<String>,
    #[serde(default)]
    pub kind: TransitionKind,
    #[serde(default)]
    pub executable: Vec<ActionDoc>,
}

/// Executable content in document form.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum ActionDoc {
    Assign {
        location: String,
        expr: String,
    },
    Raise {
        event: String,
    },
    Log {
        #[serde(default)]
        label: String,
        expr: String,
    },
    Send(SendDoc),
    If(IfDoc),
    Foreach(ForeachDoc),
}

/// A `send` element. Each attribute comes as a literal or an expression;
/// supplying both forms of one attribute is rejected.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendDoc {
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default)]
    pub event_expr: Option<String>,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub target_expr: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub id_expr: Option<String>,
    #[serde(default, rename = "type")]
    pub event_type: Option<String>,
    #[serde(default)]
    pub type_expr: Option<String>,
    /// Datamodel locations sent under their own names; these take
    /// precedence over `params` entries with the same name.
    #[serde(default)]
    pub namelist: Vec<String>,
    /// Parameter name → value expression.
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

/// An `if` element: condition/block branches. The last branch may have an
/// empty condition, meaning `else`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IfDoc {
    pub branches: Vec<IfBranchDoc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IfBranchDoc {
    #[serde(default)]
    pub cond: String,
    #[serde(default)]
    pub executable: Vec<ActionDoc>,
}

/// A `foreach` element over an array-valued location.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ForeachDoc {
    pub array: String,
    pub item: String,
    #[serde(default)]
    pub index: String,
    #[serde(default)]
    pub executable: Vec<ActionDoc>,
}

/// The root chart document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChartDoc {
    pub name: String,
    /// Target ids of the top-level initial transition; defaults to the
    /// first top-level state.
    #[serde(default)]
    pub initial: Vec<String>,
    #[serde(default)]
    pub datamodel_type: DatamodelType,
    #[serde(default)]
    pub binding: Binding,
    #[serde(default)]
    pub datamodel: Vec<DataEntry>,
    #[serde(default)]
    pub states: Vec<StateDoc>,
}

impl ChartDoc {
    /// Parses a chart document from JSON text.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Validates the document and builds the immutable model.
    pub fn compile(&self) -> Result<Model, BuilderError> {
        ModelBuilder::new(self).build()
    }
}
