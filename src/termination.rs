//! Early-termination policies evaluated once per ensemble iteration.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::result::EnsemblePartialResult;

/// What the ensemble should do after a policy looked at a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EarlyTerminationAction {
    /// Nothing happened.
    None,
    /// Flag the result, keep iterating.
    Notify,
    /// Flag the result and stop the ensemble.
    Kill,
}

impl fmt::Display for EarlyTerminationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EarlyTerminationAction::None => "none",
            EarlyTerminationAction::Notify => "notify",
            EarlyTerminationAction::Kill => "kill",
        })
    }
}

/// A stateful predicate over the sequence of ensemble results.
pub trait EarlyTerminator: Send {
    /// Key of this policy in [`EnsemblePartialResult::early_termination`].
    fn name(&self) -> &str;

    /// Inspect the result of the current iteration.
    fn evaluate(&mut self, result: &EnsemblePartialResult) -> EarlyTerminationAction;

    /// A new policy with the same parameters and no accumulated state.
    fn fresh(&self) -> Box<dyn EarlyTerminator>;
}

impl fmt::Debug for dyn EarlyTerminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EarlyTerminator").field("name", &self.name()).finish()
    }
}

/// Threshold of the `fast-*` presets.
pub const FAST_THRESHOLD: f64 = 1e-2;
/// Threshold of the `slow-*` presets.
pub const SLOW_THRESHOLD: f64 = 1e-4;
pub const DEFAULT_MIN_ITERATION: usize = 4;

/// Fires when the best inertia stops moving.
///
/// Once `iteration >= min_iteration`, a result whose inertia is within `threshold` (relative)
/// of the baseline fires `action`. The baseline is the inertia of the last result that did not
/// fire, so a plateau keeps firing until one result moves away from it.
#[derive(Debug, Clone)]
pub struct RatioInertiaTerminator {
    name: String,
    threshold: f64,
    min_iteration: usize,
    action: EarlyTerminationAction,
    last_inertia: Option<f64>,
}

impl RatioInertiaTerminator {
    pub fn new(name: impl Into<String>, threshold: f64, action: EarlyTerminationAction) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::invalid("name", "early-termination policy name must not be empty"));
        }
        if !(threshold.is_finite() && threshold >= 0.0) {
            return Err(Error::invalid(
                "threshold",
                format!("must be finite and >= 0, got {threshold}"),
            ));
        }
        Ok(Self {
            name,
            threshold,
            min_iteration: DEFAULT_MIN_ITERATION,
            action,
            last_inertia: None,
        })
    }

    /// Policy that only flags results.
    pub fn notifier(name: impl Into<String>, threshold: f64) -> Result<Self> {
        Self::new(name, threshold, EarlyTerminationAction::Notify)
    }

    /// Policy that stops the ensemble.
    pub fn killer(name: impl Into<String>, threshold: f64) -> Result<Self> {
        Self::new(name, threshold, EarlyTerminationAction::Kill)
    }

    /// Build one of the named presets: `fast-notify`, `slow-notify`, `fast-kill`, `slow-kill`.
    /// The preset name doubles as the policy name.
    pub fn preset(name: &str) -> Result<Self> {
        let (speed, action) = name
            .split_once('-')
            .ok_or_else(|| Error::UnknownTerminator(name.to_string()))?;
        let threshold = match speed {
            "fast" => FAST_THRESHOLD,
            "slow" => SLOW_THRESHOLD,
            _ => return Err(Error::UnknownTerminator(name.to_string())),
        };
        match action {
            "notify" => Self::notifier(name, threshold),
            "kill" => Self::killer(name, threshold),
            _ => Err(Error::UnknownTerminator(name.to_string())),
        }
    }

    pub fn with_min_iteration(mut self, min_iteration: usize) -> Self {
        self.min_iteration = min_iteration;
        self
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn min_iteration(&self) -> usize {
        self.min_iteration
    }

    pub fn action(&self) -> EarlyTerminationAction {
        self.action
    }

    fn is_plateau(&self, last: f64, current: f64) -> bool {
        if last == 0.0 {
            return current == 0.0;
        }
        (1.0 - current / last).abs() <= self.threshold
    }
}

impl EarlyTerminator for RatioInertiaTerminator {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&mut self, result: &EnsemblePartialResult) -> EarlyTerminationAction {
        let current = result.inertia;
        if let Some(last) = self.last_inertia {
            if result.iteration >= self.min_iteration && self.is_plateau(last, current) {
                return self.action;
            }
        }
        self.last_inertia = Some(current);
        EarlyTerminationAction::None
    }

    fn fresh(&self) -> Box<dyn EarlyTerminator> {
        Box::new(Self {
            last_inertia: None,
            ..self.clone()
        })
    }
}

/// Build preset policies from their names, rejecting unknown and repeated names.
pub fn presets<S: AsRef<str>>(names: &[S]) -> Result<Vec<Box<dyn EarlyTerminator>>> {
    let mut out: Vec<Box<dyn EarlyTerminator>> = Vec::with_capacity(names.len());
    for name in names {
        let name = name.as_ref();
        if out.iter().any(|t| t.name() == name) {
            return Err(Error::DuplicateName(name.to_string()));
        }
        out.push(Box::new(RatioInertiaTerminator::preset(name)?));
    }
    Ok(out)
}
