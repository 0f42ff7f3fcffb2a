//! Core routing enumerations shared across the pipeline.
//!
//! These are the closed, tagged-variant sum types the spec calls for: task
//! type, complexity, model tier, department, and classification provenance.
//! They're kept in one module because `analyzer`, `risk`, `classifier`,
//! `policy`, `engine`, and `audit` all need at least one of them, and putting
//! them under any single one of those modules would invert the dependency.

use serde::{Deserialize, Serialize};

/// The 11 task categories the classifier (meta or heuristic) assigns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    CodeGeneration,
    CodeReview,
    TestGeneration,
    Debugging,
    ArchitectureDesign,
    Documentation,
    RequirementAnalysis,
    QuestionAnswer,
    DataAnalysis,
    MathReasoning,
    General,
}

impl TaskType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CodeGeneration => "code_generation",
            Self::CodeReview => "code_review",
            Self::TestGeneration => "test_generation",
            Self::Debugging => "debugging",
            Self::ArchitectureDesign => "architecture_design",
            Self::Documentation => "documentation",
            Self::RequirementAnalysis => "requirement_analysis",
            Self::QuestionAnswer => "question_answer",
            Self::DataAnalysis => "data_analysis",
            Self::MathReasoning => "math_reasoning",
            Self::General => "general",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "code_generation" => Self::CodeGeneration,
            "code_review" => Self::CodeReview,
            "test_generation" => Self::TestGeneration,
            "debugging" => Self::Debugging,
            "architecture_design" => Self::ArchitectureDesign,
            "documentation" => Self::Documentation,
            "requirement_analysis" => Self::RequirementAnalysis,
            "question_answer" => Self::QuestionAnswer,
            "data_analysis" => Self::DataAnalysis,
            "math_reasoning" => Self::MathReasoning,
            "general" => Self::General,
            _ => return None,
        })
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse task-complexity bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Simple,
    Medium,
    Complex,
}

impl Complexity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Medium => "medium",
            Self::Complex => "complex",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "simple" => Self::Simple,
            "medium" => Self::Medium,
            "complex" => Self::Complex,
            _ => return None,
        })
    }
}

impl std::fmt::Display for Complexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse quality/cost bucket, strictly ordered `local < fast_cheap < balanced < powerful`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    Local,
    FastCheap,
    Balanced,
    Powerful,
}

impl ModelTier {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::FastCheap => "fast_cheap",
            Self::Balanced => "balanced",
            Self::Powerful => "powerful",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "local" => Self::Local,
            "fast_cheap" => Self::FastCheap,
            "balanced" => Self::Balanced,
            "powerful" => Self::Powerful,
            _ => return None,
        })
    }

    /// Strict total order: `local(0) < fast_cheap(1) < balanced(2) < powerful(3)`.
    pub fn rank(self) -> u8 {
        match self {
            Self::Local => 0,
            Self::FastCheap => 1,
            Self::Balanced => 2,
            Self::Powerful => 3,
        }
    }

    /// The next tier down, saturating at `local`.
    pub fn downgrade_one(self) -> Self {
        match self {
            Self::Powerful => Self::Balanced,
            Self::Balanced => Self::FastCheap,
            Self::FastCheap | Self::Local => Self::Local,
        }
    }
}

impl std::fmt::Display for ModelTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Organizational department a request is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Department {
    Rd,
    Sales,
    Marketing,
    Hr,
    Finance,
    General,
}

impl Department {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rd => "rd",
            Self::Sales => "sales",
            Self::Marketing => "marketing",
            Self::Hr => "hr",
            Self::Finance => "finance",
            Self::General => "general",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "rd" => Self::Rd,
            "sales" => Self::Sales,
            "marketing" => Self::Marketing,
            "hr" => Self::Hr,
            "finance" => Self::Finance,
            "general" => Self::General,
            _ => return None,
        })
    }
}

impl std::fmt::Display for Department {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Default for Department {
    fn default() -> Self {
        Self::General
    }
}

/// Provenance of a [`crate::classifier::ClassificationResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifiedBy {
    MetaLlm,
    HeuristicFallback,
}

impl ClassifiedBy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MetaLlm => "meta_llm",
            Self::HeuristicFallback => "heuristic_fallback",
        }
    }
}

impl std::fmt::Display for ClassifiedBy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputLength {
    Short,
    Medium,
    Long,
}

impl OutputLength {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Short => "short",
            Self::Medium => "medium",
            Self::Long => "long",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "short" => Self::Short,
            "medium" => Self::Medium,
            "long" => Self::Long,
            _ => return None,
        })
    }
}

impl Default for OutputLength {
    fn default() -> Self {
        Self::Medium
    }
}

impl std::fmt::Display for OutputLength {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_rank_is_strict_total_order() {
        assert!(ModelTier::Local.rank() < ModelTier::FastCheap.rank());
        assert!(ModelTier::FastCheap.rank() < ModelTier::Balanced.rank());
        assert!(ModelTier::Balanced.rank() < ModelTier::Powerful.rank());
    }

    #[test]
    fn downgrade_one_steps_down_and_saturates_at_local() {
        assert_eq!(ModelTier::Powerful.downgrade_one(), ModelTier::Balanced);
        assert_eq!(ModelTier::Balanced.downgrade_one(), ModelTier::FastCheap);
        assert_eq!(ModelTier::FastCheap.downgrade_one(), ModelTier::Local);
        assert_eq!(ModelTier::Local.downgrade_one(), ModelTier::Local);
    }

    #[test]
    fn round_trips_through_as_str_and_parse() {
        for t in [TaskType::CodeGeneration, TaskType::General, TaskType::MathReasoning] {
            assert_eq!(TaskType::parse(t.as_str()), Some(t));
        }
        for d in [Department::Rd, Department::Finance, Department::General] {
            assert_eq!(Department::parse(d.as_str()), Some(d));
        }
        for tier in [ModelTier::Local, ModelTier::Powerful] {
            assert_eq!(ModelTier::parse(tier.as_str()), Some(tier));
        }
    }
}
