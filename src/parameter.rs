//! Parameter Subsystem (module E): named typed values per component with
//! lazy, referential evaluation. Grounded on
//! `original_source/HopsanCore/src/Parameters.cpp`; the cyclic-reference
//! guard uses an explicit stack of in-flight names rather than a depth
//! counter, per spec §9's Design Notes.

use indexmap::{IndexMap, IndexSet};

use crate::error::{HopsanError, HopsanResult};

/// Recursion guard while resolving parameter references. Unlike the
/// original's depth counter, an explicit stack of names currently being
/// resolved gives an exact cycle report instead of an arbitrary depth
/// cutoff; a generous depth ceiling remains as a backstop against
/// pathological non-cyclic reference chains.
#[derive(Debug, Default)]
pub struct EvalStack {
    in_flight: Vec<String>,
}

pub const MAX_EVAL_DEPTH: usize = 500;

impl EvalStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes `name` onto the stack, failing if it is already being
    /// resolved (a reference cycle) or the stack has grown implausibly
    /// deep.
    pub fn enter(&mut self, name: &str) -> HopsanResult<()> {
        if self.in_flight.iter().any(|n| n == name) {
            return Err(HopsanError::evaluation(format!(
                "cyclic parameter reference detected while resolving '{name}' (chain: {})",
                self.in_flight.join(" -> ")
            )));
        }
        if self.in_flight.len() >= MAX_EVAL_DEPTH {
            return Err(HopsanError::evaluation(
                "parameter reference chain exceeded maximum evaluation depth",
            ));
        }
        self.in_flight.push(name.to_string());
        Ok(())
    }

    pub fn exit(&mut self) {
        self.in_flight.pop();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterType {
    Double,
    Int,
    Bool,
    String,
    TextBlock,
    Conditional,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParameterValue {
    Double(f64),
    Int(i64),
    Bool(bool),
    Str(String),
    TextBlock(String),
    Conditional(usize),
}

impl ParameterValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParameterValue::Double(v) => Some(*v),
            ParameterValue::Int(v) => Some(*v as f64),
            ParameterValue::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            ParameterValue::Conditional(idx) => Some(*idx as f64),
            ParameterValue::Str(_) | ParameterValue::TextBlock(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Parameter {
    pub name: String,
    pub raw_value: String,
    pub ty: ParameterType,
    pub description: String,
    pub quantity: String,
    pub unit: String,
    /// Valid condition labels for a `Conditional` parameter; the resolved
    /// value is the index of the selected condition.
    pub conditions: Vec<String>,
    resolved: Option<ParameterValue>,
}

impl Parameter {
    pub fn new(name: impl Into<String>, ty: ParameterType) -> Self {
        Parameter {
            name: name.into(),
            raw_value: String::new(),
            ty,
            description: String::new(),
            quantity: String::new(),
            unit: String::new(),
            conditions: Vec::new(),
            resolved: None,
        }
    }

    pub fn value(&self) -> Option<&ParameterValue> {
        self.resolved.as_ref()
    }

    fn try_parse_literal(&self) -> Option<ParameterValue> {
        parse_literal(self.ty, &self.raw_value, &self.conditions)
    }
}

/// Attempts to parse `raw` as a literal of type `ty`. Returns `None` if
/// `raw` is not a literal (and must instead be resolved as a reference).
pub fn parse_literal(ty: ParameterType, raw: &str, conditions: &[String]) -> Option<ParameterValue> {
    match ty {
        ParameterType::Double => raw.trim().parse::<f64>().ok().map(ParameterValue::Double),
        ParameterType::Int => raw.trim().parse::<i64>().ok().map(ParameterValue::Int),
        ParameterType::Bool => match raw.trim() {
            "true" | "1" => Some(ParameterValue::Bool(true)),
            "false" | "0" => Some(ParameterValue::Bool(false)),
            _ => None,
        },
        ParameterType::String => Some(ParameterValue::Str(raw.to_string())),
        ParameterType::TextBlock => Some(ParameterValue::TextBlock(raw.to_string())),
        ParameterType::Conditional => {
            if let Some(pos) = conditions.iter().position(|c| c == raw.trim()) {
                Some(ParameterValue::Conditional(pos))
            } else if let Ok(idx) = raw.trim().parse::<usize>() {
                if idx < conditions.len() {
                    Some(ParameterValue::Conditional(idx))
                } else {
                    None
                }
            } else {
                None
            }
        }
    }
}

/// Owns every [`Parameter`] belonging to one component, plus the set of
/// parameters whose value is still an unresolved reference (spec 4.5
/// invariant).
#[derive(Debug, Default, Clone)]
pub struct ParameterHandler {
    parameters: IndexMap<String, Parameter>,
    needs_evaluation: IndexSet<String>,
}

impl ParameterHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(&mut self, parameter: Parameter) {
        let name = parameter.name.clone();
        self.parameters.insert(name, parameter);
    }

    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.parameters.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.parameters.keys()
    }

    /// Sets a parameter's value string. Parses greedily: a literal of the
    /// target type resolves and writes through immediately; otherwise the
    /// parameter is queued for later reference resolution (spec 4.5).
    pub fn set_value(&mut self, name: &str, value_string: &str) -> HopsanResult<()> {
        let param = self
            .parameters
            .get_mut(name)
            .ok_or_else(|| HopsanError::validation(format!("unknown parameter '{name}'")))?;
        param.raw_value = value_string.to_string();
        match param.try_parse_literal() {
            Some(v) => {
                param.resolved = Some(v);
                self.needs_evaluation.shift_remove(name);
            }
            None => {
                param.resolved = None;
                self.needs_evaluation.insert(name.to_string());
            }
        }
        Ok(())
    }

    pub fn needs_evaluation(&self) -> impl Iterator<Item = &String> {
        self.needs_evaluation.iter()
    }

    pub fn has_pending_evaluation(&self) -> bool {
        !self.needs_evaluation.is_empty()
    }

    /// Records a resolved value for `name`, clearing it from the
    /// needs-evaluation set. Used by the owning system once an external
    /// reference has been followed to a concrete value.
    pub fn set_resolved(&mut self, name: &str, value: ParameterValue) {
        if let Some(p) = self.parameters.get_mut(name) {
            p.resolved = Some(value);
        }
        self.needs_evaluation.shift_remove(name);
    }

    pub fn mark_unresolved(&mut self, name: &str) {
        self.needs_evaluation.insert(name.to_string());
    }

    /// A same-component reference lookup: step 1 of the resolution order
    /// in spec 4.5.
    pub fn local_value(&self, name: &str) -> Option<&ParameterValue> {
        self.parameters.get(name).and_then(|p| p.resolved.as_ref())
    }
}
