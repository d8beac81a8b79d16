//! Scratchpad rendering of the current episode's steps.

use stockwise_core::state::AgentStep;

/// Each step's raw model text followed by its observation, in order.
pub fn format_steps(steps: &[AgentStep]) -> String {
    let mut out = String::new();
    for step in steps {
        out.push_str(&step.action.log);
        out.push_str("\nObservation: ");
        out.push_str(&step.observation);
        out.push('\n');
    }
    out
}
