use serde::{Deserialize, Serialize};

use crate::round4;

// ---------------------------------------------------------------------------
// PromptVariant / SqlCandidate
// ---------------------------------------------------------------------------

/// Generation strategy that produced a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptVariant {
    Conservative,
    Creative,
    Rephrased,
}

impl PromptVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromptVariant::Conservative => "conservative",
            PromptVariant::Creative => "creative",
            PromptVariant::Rephrased => "rephrased",
        }
    }
}

impl std::fmt::Display for PromptVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlCandidate {
    pub sql: String,
    pub temperature: f32,
    pub variant: PromptVariant,
}

// ---------------------------------------------------------------------------
// CheckKind / CheckClass / CheckResult
// ---------------------------------------------------------------------------

/// Whether a failed check disqualifies its candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckClass {
    HardFail,
    SoftFail,
}

/// The fixed set of validation checks run against every candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    AccessSafety,
    Syntax,
    Logic,
    Performance,
}

impl CheckKind {
    /// Report order; also the order checks appear in a `CandidateValidation`.
    pub const ALL: [CheckKind; 4] = [
        CheckKind::AccessSafety,
        CheckKind::Syntax,
        CheckKind::Logic,
        CheckKind::Performance,
    ];

    pub const fn class(&self) -> CheckClass {
        match self {
            CheckKind::AccessSafety | CheckKind::Syntax => CheckClass::HardFail,
            CheckKind::Logic | CheckKind::Performance => CheckClass::SoftFail,
        }
    }

    pub const fn is_hard_fail(&self) -> bool {
        matches!(self.class(), CheckClass::HardFail)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CheckKind::AccessSafety => "access_safety",
            CheckKind::Syntax => "syntax",
            CheckKind::Logic => "logic",
            CheckKind::Performance => "performance",
        }
    }
}

impl std::fmt::Display for CheckKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub kind: CheckKind,
    pub passed: bool,
    /// In `[0, 1]`.
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl CheckResult {
    pub fn pass(kind: CheckKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            passed: true,
            score: 1.0,
            detail: Some(detail.into()),
        }
    }

    /// A passing result with reduced credit (performance warnings).
    pub fn warn(kind: CheckKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            passed: true,
            score: 0.5,
            detail: Some(detail.into()),
        }
    }

    pub fn fail(kind: CheckKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            passed: false,
            score: 0.0,
            detail: Some(detail.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// CandidateValidation / ValidationOutcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateValidation {
    pub candidate: SqlCandidate,
    pub checks: Vec<CheckResult>,
    pub total_score: f64,
    pub disqualified: bool,
}

impl CandidateValidation {
    /// Aggregate check results. A failed hard-fail check disqualifies the
    /// candidate and forces its total to zero; soft-fail credit never leaks
    /// through a disqualified candidate.
    pub fn from_checks(candidate: SqlCandidate, checks: Vec<CheckResult>) -> Self {
        let disqualified = checks
            .iter()
            .any(|c| c.kind.is_hard_fail() && !c.passed);
        let total_score = if disqualified {
            0.0
        } else {
            round4(checks.iter().map(|c| c.score).sum())
        };
        Self {
            candidate,
            checks,
            total_score,
            disqualified,
        }
    }

    pub fn check(&self, kind: CheckKind) -> Option<&CheckResult> {
        self.checks.iter().find(|c| c.kind == kind)
    }

    pub fn failed_checks(&self) -> impl Iterator<Item = &CheckResult> {
        self.checks.iter().filter(|c| !c.passed)
    }
}

/// Result of validating one attempt's candidate set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub passed: bool,
    /// Index into `results` of the winning candidate.
    pub winner: Option<usize>,
    pub results: Vec<CandidateValidation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_guidance: Option<String>,
}

impl ValidationOutcome {
    pub fn best(&self) -> Option<&CandidateValidation> {
        self.winner.and_then(|i| self.results.get(i))
    }
}
