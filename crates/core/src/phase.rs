//! Preprocessing phases and the progress maths built on their weights.
//!
//! Each phase contributes a fixed weight to the overall percentage. A
//! recipe that skips phases has its weights renormalized over the
//! phases it does run, so every recipe reaches 100 on success.

use serde::Serialize;

/// One step of the preprocessing pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    PersistDraft,
    ResolvePrerequisites,
    AcquireAssets,
    Composite,
    Upload,
    /// Submit, trigger and poll.
    Submit,
}

impl Phase {
    pub const ALL: [Phase; 6] = [
        Phase::PersistDraft,
        Phase::ResolvePrerequisites,
        Phase::AcquireAssets,
        Phase::Composite,
        Phase::Upload,
        Phase::Submit,
    ];

    /// Relative weight of this phase in the progress bar.
    pub fn weight(self) -> u32 {
        match self {
            Self::PersistDraft => 10,
            Self::ResolvePrerequisites => 15,
            Self::AcquireAssets => 15,
            Self::Composite => 10,
            Self::Upload => 10,
            Self::Submit => 40,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::PersistDraft => "persist_draft",
            Self::ResolvePrerequisites => "resolve_prerequisites",
            Self::AcquireAssets => "acquire_assets",
            Self::Composite => "composite",
            Self::Upload => "upload",
            Self::Submit => "submit",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-mille of the submit block reached once the job has been created.
const SUBMITTED_PERMILLE: u64 = 100;

/// Per-mille of the submit block that polling can fill before a terminal status.
const POLLING_PERMILLE: u64 = 850;

/// Maps phase completion and poll attempts onto a 0-100 percentage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressPlan {
    phases: Vec<Phase>,
    total_weight: u32,
}

impl ProgressPlan {
    /// Build a plan from the phases a recipe runs. Order and duplicates
    /// are normalized.
    pub fn new(phases: &[Phase]) -> Self {
        let mut phases = phases.to_vec();
        phases.sort();
        phases.dedup();
        let total_weight = phases.iter().map(|p| p.weight()).sum();
        Self {
            phases,
            total_weight,
        }
    }

    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    pub fn contains(&self, phase: Phase) -> bool {
        self.phases.contains(&phase)
    }

    fn weight_before(&self, phase: Phase) -> u64 {
        self.phases
            .iter()
            .take_while(|p| **p < phase)
            .map(|p| u64::from(p.weight()))
            .sum()
    }

    /// Convert a weight expressed in thousandths into a floored percentage.
    fn to_percent(&self, milli_weight: u64) -> u8 {
        if self.total_weight == 0 {
            return 0;
        }
        let total = u64::from(self.total_weight) * 1000;
        (milli_weight * 100 / total).min(100) as u8
    }

    /// Percentage when `phase` starts.
    pub fn percent_at_start(&self, phase: Phase) -> u8 {
        self.to_percent(self.weight_before(phase) * 1000)
    }

    /// Percentage when `phase` has finished.
    pub fn percent_at_end(&self, phase: Phase) -> u8 {
        let weight = self.weight_before(phase) + u64::from(phase.weight());
        self.to_percent(weight * 1000)
    }

    /// Percentage once the job has been created remotely.
    pub fn percent_submitted(&self) -> u8 {
        self.percent_polling(0, 1)
    }

    /// Percentage after `attempt` of `max_attempts` polls, capped below 100.
    pub fn percent_polling(&self, attempt: u32, max_attempts: u32) -> u8 {
        let block = u64::from(Phase::Submit.weight());
        let polled = if max_attempts == 0 {
            POLLING_PERMILLE
        } else {
            POLLING_PERMILLE * u64::from(attempt.min(max_attempts)) / u64::from(max_attempts)
        };
        let milli =
            self.weight_before(Phase::Submit) * 1000 + block * (SUBMITTED_PERMILLE + polled);
        self.to_percent(milli).min(99)
    }
}
