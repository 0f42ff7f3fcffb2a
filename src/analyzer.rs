//! Pre-analysis: a pure, fast heuristic pass over the incoming messages.
//!
//! Runs before the (optional, LLM-backed) meta-classifier and never fails or
//! blocks — it's the fallback classification whenever the meta-classifier is
//! unavailable, over budget, or under-confident, and it's also the token
//! estimate the budget guardrail uses before a real usage figure exists.

use std::sync::LazyLock;

use tiktoken_rs::CoreBPE;

use crate::types::{Complexity, Department, TaskType};

static TOKENIZER: LazyLock<Option<CoreBPE>> =
    LazyLock::new(|| tiktoken_rs::cl100k_base().ok());

/// Estimate token count for `text`. Falls back to `len / 4` (a rough
/// characters-per-token ratio for English prose) when the `cl100k_base`
/// tokenizer's data file can't be loaded — keeps pre-analysis infallible.
pub fn estimate_tokens(text: &str) -> usize {
    match TOKENIZER.as_ref() {
        Some(bpe) => bpe.encode_ordinary(text).len(),
        None => text.len() / 4,
    }
}

/// Heuristic output from a single pass over the request's message content.
#[derive(Debug, Clone, PartialEq)]
pub struct PreAnalysis {
    pub task_type: TaskType,
    pub complexity: Complexity,
    pub department: Department,
    pub estimated_input_tokens: usize,
}

struct Keywords {
    task_type: TaskType,
    terms: &'static [&'static str],
}

// Ordered by specificity — first category whose terms appear wins. A prompt
// that says "write a test for this function" should land in test_generation
// before the more generic code_generation bucket.
static TASK_KEYWORDS: &[Keywords] = &[
    Keywords { task_type: TaskType::TestGeneration, terms: &["unit test", "write a test", "test case", "test coverage", "pytest", "jest", "assert"] },
    Keywords { task_type: TaskType::CodeReview, terms: &["review this code", "code review", "pr review", "pull request", "review my", "lgtm"] },
    Keywords { task_type: TaskType::Debugging, terms: &["stack trace", "traceback", "debug", "fix this bug", "why is this failing", "exception", "segfault", "panic"] },
    Keywords { task_type: TaskType::ArchitectureDesign, terms: &["system design", "architecture", "design doc", "scalability", "microservice", "high-level design"] },
    Keywords { task_type: TaskType::CodeGeneration, terms: &["write a function", "implement", "write code", "generate code", "refactor", "write a class"] },
    Keywords { task_type: TaskType::Documentation, terms: &["write documentation", "readme", "docstring", "api docs", "changelog", "release notes"] },
    Keywords { task_type: TaskType::RequirementAnalysis, terms: &["requirements", "user story", "acceptance criteria", "spec out", "scope this"] },
    Keywords { task_type: TaskType::DataAnalysis, terms: &["analyze this data", "dataset", "csv", "dataframe", "statistics", "correlation", "pivot table"] },
    Keywords { task_type: TaskType::MathReasoning, terms: &["prove", "theorem", "calculate", "solve for", "derivative", "integral", "equation"] },
    Keywords { task_type: TaskType::QuestionAnswer, terms: &["what is", "who is", "explain", "how does", "define"] },
];

static DEPARTMENT_KEYWORDS: &[(Department, &[&str])] = &[
    (Department::Rd, &["codebase", "repository", "deploy", "pipeline", "api endpoint", "database schema"]),
    (Department::Sales, &["quota", "pipeline forecast", "prospect", "deal", "crm", "proposal"]),
    (Department::Marketing, &["campaign", "brand", "social media post", "landing page", "seo"]),
    (Department::Hr, &["employee", "onboarding", "performance review", "payroll", "benefits", "candidate"]),
    (Department::Finance, &["invoice", "budget forecast", "revenue", "expense report", "balance sheet", "ledger"]),
];

pub struct PreAnalyzer;

impl PreAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Classify `text` (the concatenation of the request's message content)
    /// heuristically. Never fails.
    pub fn analyze(&self, text: &str) -> PreAnalysis {
        let lower = text.to_lowercase();
        let estimated_input_tokens = estimate_tokens(text);

        let task_type = TASK_KEYWORDS
            .iter()
            .find(|k| k.terms.iter().any(|t| lower.contains(t)))
            .map(|k| k.task_type)
            .unwrap_or(TaskType::General);

        let department = DEPARTMENT_KEYWORDS
            .iter()
            .find(|(_, terms)| terms.iter().any(|t| lower.contains(t)))
            .map(|(d, _)| *d)
            .unwrap_or(Department::General);

        let complexity = complexity_from(&lower, estimated_input_tokens, task_type);

        PreAnalysis { task_type, complexity, department, estimated_input_tokens }
    }
}

impl Default for PreAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

/// Four-branch complexity heuristic: very long prompts are complex, very
/// short ones are simple, a middle length band defaults to medium, and a
/// small set of complexity-signalling task types (architecture design, math
/// reasoning) are bumped up a notch regardless of length.
fn complexity_from(lower: &str, estimated_tokens: usize, task_type: TaskType) -> Complexity {
    const COMPLEX_MARKERS: &[&str] =
        &["multi-step", "end-to-end", "trade-off", "edge case", "concurrency", "distributed", "step by step"];

    if estimated_tokens > 3000 {
        return Complexity::Complex;
    }
    if estimated_tokens < 200 {
        return Complexity::Simple;
    }
    if estimated_tokens > 800 {
        return Complexity::Medium;
    }
    if matches!(task_type, TaskType::ArchitectureDesign | TaskType::MathReasoning)
        || COMPLEX_MARKERS.iter().any(|m| lower.contains(m))
    {
        return Complexity::Medium;
    }
    Complexity::Simple
}
