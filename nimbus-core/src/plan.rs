//! Plan - Collection of Effects
//!
//! A Plan is an ordered list of Effects to be executed.
//! No side effects occur until the Plan is applied.

use std::fmt;

use crate::effect::Effect;

/// Plan containing Effects to be executed
#[derive(Debug, Clone, Default)]
pub struct Plan {
    effects: Vec<Effect>,
}

impl Plan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, effect: Effect) {
        self.effects.push(effect);
    }

    pub fn effects(&self) -> &[Effect] {
        &self.effects
    }

    /// True when nothing would change (data source reads do not count)
    pub fn is_empty(&self) -> bool {
        self.mutation_count() == 0
    }

    /// Number of mutating Effects
    pub fn mutation_count(&self) -> usize {
        self.effects.iter().filter(|e| e.is_mutating()).count()
    }

    /// Generate a summary of the Plan for display
    ///
    /// A replacement counts as one create and one delete.
    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary::default();
        for effect in &self.effects {
            match effect {
                Effect::Read(_) => summary.read += 1,
                Effect::Create(_) => summary.create += 1,
                Effect::Update { .. } => summary.update += 1,
                Effect::Replace { .. } => {
                    summary.create += 1;
                    summary.delete += 1;
                }
                Effect::Delete(_) => summary.delete += 1,
            }
        }
        summary
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for effect in &self.effects {
            writeln!(f, "{}", format_effect_brief(effect))?;
        }
        write!(f, "{}", self.summary())
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct PlanSummary {
    pub read: usize,
    pub create: usize,
    pub update: usize,
    pub delete: usize,
}

impl fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Plan: {} to add, {} to change, {} to destroy",
            self.create, self.update, self.delete
        )
    }
}

/// Format an effect briefly for display
pub fn format_effect_brief(effect: &Effect) -> String {
    match effect {
        Effect::Create(r) => format!("+ {}", r.id),
        Effect::Update { id, changed, .. } => format!("~ {} ({})", id, changed.join(", ")),
        Effect::Replace { id, changed, .. } => {
            if changed.is_empty() {
                format!("-/+ {} (tainted)", id)
            } else {
                format!("-/+ {} (forces replacement: {})", id, changed.join(", "))
            }
        }
        Effect::Delete(state) => format!("- {}", state.id),
        Effect::Read(r) => format!("<= {}", r.id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{Resource, ResourceId, State};

    #[test]
    fn empty_plan() {
        let plan = Plan::new();
        assert!(plan.is_empty());
        assert_eq!(plan.mutation_count(), 0);
    }

    #[test]
    fn reads_do_not_make_a_plan_non_empty() {
        let mut plan = Plan::new();
        plan.add(Effect::Read(Resource::new("ds", "a").with_read_only(true)));
        assert!(plan.is_empty());
    }

    #[test]
    fn plan_summary_counts_replace_twice() {
        let mut plan = Plan::new();
        plan.add(Effect::Create(Resource::new("vpc", "a")));
        let from = State::existing(ResourceId::new("vpc", "b"), Default::default());
        plan.add(Effect::Replace {
            id: ResourceId::new("vpc", "b"),
            from: from.clone(),
            to: Resource::new("vpc", "b"),
            changed: vec!["cidr".to_string()],
        });
        plan.add(Effect::Delete(from));

        let summary = plan.summary();
        assert_eq!(summary.create, 2);
        assert_eq!(summary.delete, 2);
        assert_eq!(
            summary.to_string(),
            "Plan: 2 to add, 0 to change, 2 to destroy"
        );
    }
}
