//! External inline-script evaluator contract (spec §6). The simulator
//! core never embeds a script interpreter itself; it calls out through
//! this trait when a parameter reference can't be resolved any other
//! way, the same external-collaborator role the original's NumHop
//! integration plays for `ComponentSystem::runNumHopScript`.

use crate::error::HopsanResult;

/// Evaluates a parameter expression string to a concrete double. An
/// implementation is expected to have its own variable scope (e.g. a
/// NumHop-like interpreter seeded with the owning system's parameters).
pub trait InlineScriptEvaluator: Send + Sync {
    fn evaluate(&self, expression: &str) -> HopsanResult<f64>;
}

/// An evaluator with no variables that only accepts numeric literals.
/// Useful as a default when no script engine is wired in; any symbolic
/// reference still fails with an evaluation error rather than panicking.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullScriptEvaluator;

impl InlineScriptEvaluator for NullScriptEvaluator {
    fn evaluate(&self, expression: &str) -> HopsanResult<f64> {
        expression
            .trim()
            .parse::<f64>()
            .map_err(|_| crate::error::HopsanError::evaluation(format!("no script engine configured to evaluate '{expression}'")))
    }
}
