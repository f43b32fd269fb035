//! Network roles inside a level and the sets of roles frozen for an update

use std::collections::BTreeSet;
use std::fmt;

use serde::{Serialize, Deserialize};

use super::config::ConditioningRule;

/// Function of a network within one level
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Geometry from context and noise
    Geometry,
    /// Geometry from context, noise and a topology
    ConditionalGeometry,
    /// Topology from context and noise
    Morphology,
    /// Topology from context, noise and a geometry
    ConditionalMorphology,
    /// Critic over geometry and topology
    Discriminator,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Geometry => "geometry",
            Role::ConditionalGeometry => "conditional_geometry",
            Role::Morphology => "morphology",
            Role::ConditionalMorphology => "conditional_morphology",
            Role::Discriminator => "discriminator",
        };
        f.write_str(name)
    }
}

impl ConditioningRule {
    /// `(upstream, conditional)` generator roles used by this rule
    pub fn implicated_roles(self) -> (Role, Role) {
        match self {
            ConditioningRule::Mgd => (Role::Morphology, Role::ConditionalGeometry),
            ConditioningRule::Gmd => (Role::Geometry, Role::ConditionalMorphology),
        }
    }
}

/// Roles that must not change during one stacked update
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FreezeSet(BTreeSet<Role>);

impl FreezeSet {
    /// Nothing frozen
    pub fn empty() -> Self {
        Self::default()
    }

    /// Freeze a role
    pub fn with(mut self, role: Role) -> Self {
        self.0.insert(role);
        self
    }

    /// Whether `role` is frozen
    pub fn contains(&self, role: Role) -> bool {
        self.0.contains(&role)
    }

    /// Frozen roles in order
    pub fn iter(&self) -> impl Iterator<Item = Role> + '_ {
        self.0.iter().copied()
    }

    /// Freeze set of one generator update
    ///
    /// The critic is always frozen. With alternation enabled the first half
    /// of each cycle freezes the upstream role and the second half freezes
    /// the conditional role, so only one generator learns at a time.
    pub fn generator_phase(
        rule: ConditioningRule,
        schedule: Option<AlternationSchedule>,
        batch: usize,
    ) -> Self {
        let frozen = FreezeSet::empty().with(Role::Discriminator);
        match schedule {
            Some(schedule) => frozen.with(schedule.frozen_role(rule, batch)),
            None => frozen,
        }
    }
}

/// Alternation between the two generator roles of a rule
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AlternationSchedule {
    cycle: usize,
}

impl AlternationSchedule {
    /// Schedule with the given period, at least 2
    pub fn new(cycle: usize) -> Self {
        AlternationSchedule { cycle: cycle.max(2) }
    }

    /// Period in outer iterations
    pub fn cycle(&self) -> usize {
        self.cycle
    }

    /// Generator role frozen at outer iteration `batch`
    pub fn frozen_role(&self, rule: ConditioningRule, batch: usize) -> Role {
        let (upstream, conditional) = rule.implicated_roles();
        if batch % self.cycle < self.cycle / 2 {
            upstream
        } else {
            conditional
        }
    }
}
