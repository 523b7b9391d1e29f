use regex::{Regex, RegexBuilder};
use tracing::warn;

use troupe_core::RoutingTier;

use crate::models::{
    ActionType, ClassificationScores, Layer, QuestionType, RoutingDecision, RoutingPattern,
};

/// The recognised simple-intent markers. This list is closed and
/// authoritative; the sticky downgrade rule counts hits against it.
pub const SIMPLE_MARKERS: [&str; 6] = [
    "quick question",
    "just wondering",
    "simple question",
    "one more thing",
    "by the way",
    "unrelated",
];

/// The recognised urgency markers, likewise closed.
pub const URGENCY_MARKERS: [&str; 6] = [
    "urgent",
    "asap",
    "immediately",
    "right now",
    "emergency",
    "time-sensitive",
];

const SOCIAL_CUES: [&str; 12] = [
    "hi",
    "hello",
    "hey",
    "thanks",
    "thank you",
    "good morning",
    "good night",
    "bye",
    "goodbye",
    "how are you",
    "great job",
    "see you",
];

const SIMPLE_CUES: [&str; 10] = [
    "thanks",
    "thank you",
    "what time",
    "what day",
    "by the way",
    "quick question",
    "just wondering",
    "good morning",
    "good night",
    "hello",
];

const TECH_TERMS: [&str; 22] = [
    "api",
    "database",
    "function",
    "algorithm",
    "server",
    "deploy",
    "compile",
    "regex",
    "async",
    "thread",
    "kernel",
    "sql",
    "docker",
    "kubernetes",
    "refactor",
    "architecture",
    "latency",
    "cache",
    "endpoint",
    "schema",
    "backend",
    "runtime",
];

const CODE_KEYWORDS: [&str; 12] = [
    "def ",
    "fn ",
    "class ",
    "import ",
    "function ",
    "return ",
    "const ",
    "let ",
    "#include",
    "println!",
    "console.log",
    "=> ",
];

/// Deterministic Layer-1 classifier: score extraction plus an ordered
/// pattern list. The highest-confidence matching pattern wins; ties go to
/// the earlier pattern.
pub struct ClientClassifier {
    compiled: Vec<(Regex, usize)>,
    patterns: Vec<RoutingPattern>,
    negation_re: Regex,
}

impl Default for ClientClassifier {
    fn default() -> Self {
        Self::new(builtin_patterns())
    }
}

impl ClientClassifier {
    pub fn new(patterns: Vec<RoutingPattern>) -> Self {
        let mut classifier = Self {
            compiled: Vec::new(),
            patterns: Vec::new(),
            negation_re: Regex::new(r"(?i)\b(don't|do not|never|without|not)\s+\w+(\s+\w+)?")
                .expect("negation regex is valid"),
        };
        classifier.replace_patterns(patterns);
        classifier
    }

    /// Swap in a freshly calibrated pattern set. Invalid regexes are
    /// dropped with a warning rather than poisoning the classifier.
    pub fn replace_patterns(&mut self, patterns: Vec<RoutingPattern>) {
        self.compiled.clear();
        self.patterns.clear();
        for pattern in patterns {
            match RegexBuilder::new(&pattern.regex)
                .case_insensitive(true)
                .build()
            {
                Ok(re) => {
                    self.compiled.push((re, self.patterns.len()));
                    self.patterns.push(pattern);
                }
                Err(e) => {
                    warn!(regex = %pattern.regex, error = %e, "dropping unparseable routing pattern");
                }
            }
        }
    }

    pub fn patterns(&self) -> &[RoutingPattern] {
        &self.patterns
    }

    /// Classify content. Returns the decision plus the full score bundle
    /// so Layer 2 and the sticky logic can reuse the extraction.
    pub fn classify(&self, content: &str) -> (RoutingDecision, ClassificationScores) {
        let scores = self.extract_scores(content);

        let mut best: Option<(&RoutingPattern, f64)> = None;
        for (re, idx) in &self.compiled {
            if re.is_match(content) {
                let pattern = &self.patterns[*idx];
                if best.map_or(true, |(_, conf)| pattern.confidence > conf) {
                    best = Some((pattern, pattern.confidence));
                }
            }
        }

        let decision = match best {
            Some((pattern, confidence)) => {
                let mut d = RoutingDecision::new(
                    pattern.tier,
                    confidence,
                    Layer::Client,
                    &format!("matched pattern '{}'", pattern.regex),
                );
                d.tag("pattern", serde_json::json!(pattern.regex));
                d
            }
            None => self.heuristic_decision(&scores),
        };

        (decision, scores)
    }

    /// Extract the full score bundle from raw content.
    pub fn extract_scores(&self, content: &str) -> ClassificationScores {
        let lower = content.to_lowercase();
        let word_count = content.split_whitespace().count();

        let code_presence = score_code(content, &lower);
        let technical_hits = TECH_TERMS.iter().filter(|t| lower.contains(*t)).count();
        let social_hits = SOCIAL_CUES.iter().filter(|c| lower.contains(*c)).count();
        let simple_hits = SIMPLE_CUES.iter().filter(|c| lower.contains(*c)).count();

        let mut simple_indicators = (simple_hits as f64 * 0.4).min(1.0);
        if word_count < 10 {
            simple_indicators = (simple_indicators + 0.2).min(1.0);
        }

        let negations = self
            .negation_re
            .find_iter(content)
            .map(|m| m.as_str().to_string())
            .collect();

        ClassificationScores {
            code_presence,
            simple_indicators,
            technical_terms: (technical_hits as f64 * 0.25).min(1.0),
            social_interaction: (social_hits as f64 * 0.5).min(1.0),
            negations,
            action_type: detect_action(&lower),
            question_type: detect_question(content, &lower),
            urgency: URGENCY_MARKERS
                .iter()
                .filter(|m| lower.contains(*m))
                .map(|m| m.to_string())
                .collect(),
            word_count,
        }
    }

    /// No pattern matched: derive a tier from the raw scores.
    fn heuristic_decision(&self, scores: &ClassificationScores) -> RoutingDecision {
        if scores.social_interaction > 0.7 || scores.simple_indicators > 0.7 {
            let conf = 0.6 + 0.25 * scores.simple_indicators.max(scores.social_interaction);
            return RoutingDecision::new(
                RoutingTier::Simple,
                conf.min(0.85),
                Layer::Client,
                "heuristic: social/simple signals dominate",
            );
        }
        if scores.code_presence > 0.6 {
            return RoutingDecision::new(
                RoutingTier::Coding,
                0.6,
                Layer::Client,
                "heuristic: code present without a matching pattern",
            );
        }
        if scores.technical_terms > 0.5 && scores.word_count > 50 {
            return RoutingDecision::new(
                RoutingTier::Complex,
                0.55,
                Layer::Client,
                "heuristic: long technical content",
            );
        }
        RoutingDecision::new(
            RoutingTier::Medium,
            0.5,
            Layer::Client,
            "heuristic: no strong signal, defaulting to medium",
        )
    }
}

fn score_code(content: &str, lower: &str) -> f64 {
    if content.contains("```") {
        return 1.0;
    }
    let keyword_hits = CODE_KEYWORDS.iter().filter(|k| lower.contains(*k)).count();
    let backticks = content.matches('`').count() / 2;
    (keyword_hits as f64 * 0.3 + backticks as f64 * 0.4).min(1.0)
}

fn detect_action(lower: &str) -> ActionType {
    const EXPLAIN: [&str; 6] = [
        "explain",
        "describe",
        "what is",
        "what are",
        "tell me about",
        "understand",
    ];
    const WRITE: [&str; 6] = ["write", "implement", "create", "build", "make a", "add a"];
    const FIX: [&str; 4] = ["fix", "repair", "resolve", "patch"];
    const ANALYZE: [&str; 6] = [
        "analyze",
        "analyse",
        "debug",
        "investigate",
        "review",
        "audit",
    ];

    // Explanation intent wins over implementation verbs so that
    // "don't write code, just explain" routes as an explanation.
    if EXPLAIN.iter().any(|c| lower.contains(c)) {
        return ActionType::Explain;
    }
    if FIX.iter().any(|c| lower.contains(c)) {
        return ActionType::Fix;
    }
    if WRITE.iter().any(|c| lower.contains(c)) {
        return ActionType::Write;
    }
    if ANALYZE.iter().any(|c| lower.contains(c)) {
        return ActionType::Analyze;
    }
    ActionType::General
}

fn detect_question(content: &str, lower: &str) -> Option<QuestionType> {
    const YES_NO: [&str; 14] = [
        "is ", "are ", "am ", "do ", "does ", "did ", "can ", "could ", "will ", "would ",
        "should ", "has ", "have ", "may ",
    ];
    const WH: [&str; 7] = ["what", "who", "where", "when", "why", "how", "which"];

    let trimmed = lower.trim_start();
    if YES_NO.iter().any(|p| trimmed.starts_with(p)) {
        return Some(QuestionType::YesNo);
    }
    if WH.iter().any(|p| trimmed.starts_with(p)) {
        return Some(QuestionType::WhQuestion);
    }
    if content.contains('?') {
        return Some(QuestionType::Open);
    }
    None
}

/// The shipped pattern set. Auto-calibration grows this over time.
pub fn builtin_patterns() -> Vec<RoutingPattern> {
    vec![
        // simple: social pleasantries and trivial facts
        RoutingPattern::manual(
            r"^(hi|hello|hey|yo|good (morning|afternoon|evening|night))\b",
            RoutingTier::Simple,
            0.95,
        ),
        RoutingPattern::manual(r"\bwhat time\b", RoutingTier::Simple, 0.95),
        RoutingPattern::manual(r"\btest message\b", RoutingTier::Simple, 0.95),
        RoutingPattern::manual(r"\b(thanks|thank you|thx|cheers)\b", RoutingTier::Simple, 0.90),
        RoutingPattern::manual(r"\b(bye|goodbye|see you)\b", RoutingTier::Simple, 0.92),
        RoutingPattern::manual(r"^(ok|okay|cool|great|nice|awesome)[.!]?$", RoutingTier::Simple, 0.9),
        // medium: explanations, light tool use
        RoutingPattern::manual(
            r"\b(explain|describe|compare|difference between)\b",
            RoutingTier::Medium,
            0.7,
        ),
        RoutingPattern::manual(r"\b(search|look up|find out)\b", RoutingTier::Medium, 0.65),
        RoutingPattern::manual(r"^git (status|log|diff)\b", RoutingTier::Medium, 0.75),
        RoutingPattern::manual(r"\bnpm install\b", RoutingTier::Medium, 0.75),
        // coding: implementation and debugging
        RoutingPattern::manual(
            r"\b(write|implement|create) (a |an |the )?(function|class|script|endpoint|query|test)\b",
            RoutingTier::Coding,
            0.85,
        ),
        RoutingPattern::manual(
            r"\b(fix|debug) (this|the|a) (bug|error|code|test)\b",
            RoutingTier::Coding,
            0.8,
        ),
        RoutingPattern::manual(r"\bstack trace\b", RoutingTier::Coding, 0.75),
        // complex: architecture and multi-step analysis
        RoutingPattern::manual(
            r"\b(design|architect|architecture|refactor)\b",
            RoutingTier::Complex,
            0.75,
        ),
        RoutingPattern::manual(r"\bdistributed system\b", RoutingTier::Complex, 0.8),
        RoutingPattern::manual(r"\b(optimi[sz]e|performance tuning)\b", RoutingTier::Complex, 0.7),
        // reasoning: proofs and formal derivations
        RoutingPattern::manual(r"\b(prove|theorem|derivation|lemma)\b", RoutingTier::Reasoning, 0.85),
        RoutingPattern::manual(r"\btime complexity\b", RoutingTier::Reasoning, 0.8),
    ]
}
