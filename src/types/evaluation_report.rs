use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use super::Packet;

/// Detailed classifier lookup returned by
/// [`Classifier::eval_detailed()`](super::Classifier::eval_detailed).
///
/// Contains the output packets, the position of the rule that fired, and the
/// wall-clock duration of the lookup.
#[derive(Debug, Clone)]
#[must_use]
pub struct EvaluationReport {
    outputs: HashSet<Packet>,
    rule_index: usize,
    duration: Duration,
}

impl EvaluationReport {
    pub(crate) fn new(outputs: HashSet<Packet>, rule_index: usize, duration: Duration) -> Self {
        Self {
            outputs,
            rule_index,
            duration,
        }
    }

    /// The output packets, same as [`Classifier::eval()`](super::Classifier::eval).
    #[must_use]
    pub fn outputs(&self) -> &HashSet<Packet> {
        &self.outputs
    }

    /// Index of the highest-priority rule that accepted the packet.
    #[must_use]
    pub fn rule_index(&self) -> usize {
        self.rule_index
    }

    /// Wall-clock duration of the evaluation.
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.duration
    }
}

impl fmt::Display for EvaluationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rule: {}", self.rule_index)?;
        let mut outputs: Vec<String> = self.outputs.iter().map(ToString::to_string).collect();
        outputs.sort();
        write!(f, ", outputs: [{}]", outputs.join(", "))?;
        write!(f, ", duration: {:?}", self.duration)?;
        Ok(())
    }
}
