//! Rule sets per validation mode
//!
//! Deterministic checks run before the generator is asked to judge. The
//! table is keyed by mode; `Unknown` borrows the investment rules.

use crate::models::{
    AgentResponse, IntentResult, RetrievalRecord, ValidationMode, MAX_FOLLOW_UPS, MAX_VOICE_WORDS,
};
use crate::retrieval::grounding_text;
use crate::text::{
    content_terms, declines, fact_tokens, has_markup, is_question, states_no_information,
    terms_beyond_no_information,
};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grounding {
    /// Greeting: no investment facts at all.
    NoFacts,
    /// Self-description exempt; any figure must be sourced.
    FactsIfPresent,
    /// Every figure sourced; retrieval mandatory.
    Strict,
    /// Must decline, no figures.
    Decline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolPolicy {
    Forbidden,
    Optional,
    Required,
}

#[derive(Debug, Clone, Copy)]
pub struct RuleSet {
    pub mode: ValidationMode,
    pub grounding: Grounding,
    pub tool_policy: ToolPolicy,
    /// Whether `show_in_ui = true` is acceptable at all.
    pub ui_allowed: bool,
    /// Prompt text handed to the judge.
    pub summary: &'static str,
}

static RULE_SETS: [RuleSet; 4] = [
    RuleSet {
        mode: ValidationMode::Greet,
        grounding: Grounding::NoFacts,
        tool_policy: ToolPolicy::Forbidden,
        ui_allowed: false,
        summary: "Greeting. No investment facts allowed; identity and greeting language need no sources. The retriever must not have been called. show_in_ui must be false.",
    },
    RuleSet {
        mode: ValidationMode::General,
        grounding: Grounding::FactsIfPresent,
        tool_policy: ToolPolicy::Optional,
        ui_allowed: true,
        summary: "General question about the assistant. Self-description needs no sources; any investment fact must appear in SOURCES.",
    },
    RuleSet {
        mode: ValidationMode::Investment,
        grounding: Grounding::Strict,
        tool_policy: ToolPolicy::Required,
        ui_allowed: true,
        summary: "Investment question. The retriever must have been called. Every factual claim in voice_text and display_text must appear in SOURCES. With no sources the answer must state that the information is unavailable. Follow-ups must concern material in SOURCES. When in doubt, reject.",
    },
    RuleSet {
        mode: ValidationMode::OutOfScope,
        grounding: Grounding::Decline,
        tool_policy: ToolPolicy::Forbidden,
        ui_allowed: true,
        summary: "Out of scope. The answer must politely decline and contain no investment facts. The retriever must not have been called.",
    },
];

/// Lookup; `Unknown` gets the strictest (investment) rules.
pub fn rule_set(mode: ValidationMode) -> &'static RuleSet {
    let wanted = match mode {
        ValidationMode::Unknown => ValidationMode::Investment,
        other => other,
    };
    RULE_SETS
        .iter()
        .find(|r| r.mode == wanted)
        .unwrap_or(&RULE_SETS[2])
}

/// Outcome of the deterministic pass.
#[derive(Debug, Clone, Default)]
pub struct RuleFindings {
    pub traceability_issues: Vec<String>,
    pub consistency_issues: Vec<String>,
    pub tool_usage_ok: Option<bool>,
    pub tool_issue: Option<String>,
}

impl RuleFindings {
    pub fn is_clean(&self) -> bool {
        self.traceability_issues.is_empty()
            && self.consistency_issues.is_empty()
            && self.tool_usage_ok != Some(false)
    }

    pub fn issues(&self) -> Vec<String> {
        self.tool_issue
            .iter()
            .cloned()
            .chain(self.traceability_issues.iter().cloned())
            .chain(self.consistency_issues.iter().cloned())
            .collect()
    }
}

fn quote_list(items: &BTreeSet<String>) -> String {
    items
        .iter()
        .map(|i| format!("'{}'", i))
        .collect::<Vec<_>>()
        .join(", ")
}

impl RuleSet {
    /// Grounding is checked against the snippets that fit
    /// `context_max_tokens`, the same subset the generator was shown.
    pub fn evaluate(
        &self,
        intent: &IntentResult,
        response: &AgentResponse,
        retrieval: &RetrievalRecord,
        context_max_tokens: usize,
    ) -> RuleFindings {
        let mut findings = RuleFindings::default();
        let sources = grounding_text(retrieval.snippets(), context_max_tokens);
        self.check_tool_usage(retrieval, &mut findings);
        self.check_traceability(intent, response, retrieval, &sources, &mut findings);
        self.check_consistency(response, &mut findings);
        findings
    }

    fn check_tool_usage(&self, retrieval: &RetrievalRecord, findings: &mut RuleFindings) {
        let invoked = retrieval.was_invoked();
        let (ok, issue) = match (self.tool_policy, invoked) {
            (ToolPolicy::Forbidden, true) => (
                Some(false),
                Some(format!(
                    "The retriever was called for a {} turn; it must not be called for this intent.",
                    self.mode
                )),
            ),
            (ToolPolicy::Forbidden, false) => (Some(true), None),
            (ToolPolicy::Optional, true) => (Some(true), None),
            (ToolPolicy::Optional, false) => (None, None),
            (ToolPolicy::Required, true) => (Some(true), None),
            (ToolPolicy::Required, false) => (
                Some(false),
                Some(
                    "Investment question answered without consulting the knowledge base: the retriever was not invoked."
                        .to_string(),
                ),
            ),
        };
        findings.tool_usage_ok = ok;
        findings.tool_issue = issue;
    }

    fn check_traceability(
        &self,
        intent: &IntentResult,
        response: &AgentResponse,
        retrieval: &RetrievalRecord,
        sources: &str,
        findings: &mut RuleFindings,
    ) {
        let issues = &mut findings.traceability_issues;

        let stated: BTreeSet<String> = fact_tokens(&response.voice_text)
            .into_iter()
            .chain(fact_tokens(&response.display_text))
            .collect();
        // Figures echoed from the user's own question are not new claims,
        // unless investment sources exist to check them against.
        let echoed = fact_tokens(&intent.query);
        let claimed: BTreeSet<String> = stated.difference(&echoed).cloned().collect();
        let sourced = fact_tokens(sources);
        let unsupported: BTreeSet<String> = claimed.difference(&sourced).cloned().collect();

        match self.grounding {
            Grounding::NoFacts => {
                if !claimed.is_empty() {
                    issues.push(format!(
                        "A greeting must not carry investment facts, but the response states {}.",
                        quote_list(&claimed)
                    ));
                }
            }
            Grounding::Decline => {
                if !declines(&response.voice_text) {
                    issues.push(format!(
                        "Out-of-scope request must be declined, but voice_text '{}' does not decline.",
                        response.voice_text
                    ));
                }
                if !claimed.is_empty() {
                    issues.push(format!(
                        "A decline must not carry investment facts, but the response states {}.",
                        quote_list(&claimed)
                    ));
                }
            }
            Grounding::FactsIfPresent => {
                if !unsupported.is_empty() {
                    issues.push(format!(
                        "Figures {} do not appear in the retrieved sources{}.",
                        quote_list(&unsupported),
                        if retrieval.was_invoked() {
                            ""
                        } else {
                            " (the retriever was not consulted)"
                        }
                    ));
                }
            }
            Grounding::Strict => {
                if !retrieval.was_invoked() {
                    issues.push(
                        "No retrieval result exists for this investment answer, so none of its claims can be traced to sources."
                            .to_string(),
                    );
                    return;
                }

                if retrieval.is_empty() {
                    // Only "I don't have that" may be said, restating the
                    // question at most.
                    if !states_no_information(&response.voice_text) {
                        issues.push(format!(
                            "The knowledge base returned nothing, but voice_text '{}' does not say the information is unavailable.",
                            response.voice_text
                        ));
                    }
                    if !response.display_text.trim().is_empty()
                        && !states_no_information(&response.display_text)
                    {
                        issues.push(
                            "The knowledge base returned nothing, but display_text presents content instead of stating that the information is unavailable."
                                .to_string(),
                        );
                    }
                    let extra: BTreeSet<String> =
                        terms_beyond_no_information(&response.voice_text, &intent.query)
                            .into_iter()
                            .chain(terms_beyond_no_information(&response.display_text, &intent.query))
                            .collect();
                    if !extra.is_empty() {
                        issues.push(format!(
                            "The knowledge base returned nothing, yet the response adds {} beyond the question; say only that the information is unavailable.",
                            quote_list(&extra)
                        ));
                    }
                    if !unsupported.is_empty() {
                        issues.push(format!(
                            "Figures {} do not appear in the retrieved sources.",
                            quote_list(&unsupported)
                        ));
                    }
                    if !response.follow_ups.is_empty() {
                        issues.push(format!(
                            "Follow-ups {} are offered although no sources were found.",
                            quote_list(&response.follow_ups.iter().cloned().collect())
                        ));
                    }
                    return;
                }

                // With sources present every figure must be in them, even
                // one the user typed.
                let unsourced: BTreeSet<String> = stated.difference(&sourced).cloned().collect();
                if !unsourced.is_empty() {
                    issues.push(format!(
                        "Figures {} do not appear in the retrieved sources.",
                        quote_list(&unsourced)
                    ));
                }

                let source_terms = content_terms(sources);
                for follow_up in &response.follow_ups {
                    let terms = content_terms(follow_up);
                    if terms.is_disjoint(&source_terms) {
                        issues.push(format!(
                            "Follow-up '{}' is not about material in the retrieved sources.",
                            follow_up
                        ));
                    }
                }
            }
        }
    }

    fn check_consistency(&self, response: &AgentResponse, findings: &mut RuleFindings) {
        let issues = &mut findings.consistency_issues;
        let voice = response.voice_text.trim();
        let display = response.display_text.trim();

        if voice.is_empty() {
            issues.push("voice_text is empty.".to_string());
        }

        let words = response.voice_word_count();
        if words > MAX_VOICE_WORDS {
            issues.push(format!(
                "voice_text has {} words; the spoken limit is {}.",
                words, MAX_VOICE_WORDS
            ));
        }

        if has_markup(voice) {
            issues.push(format!(
                "voice_text '{}' contains markup; it must be plain speakable text.",
                voice
            ));
        }

        if !display.is_empty() {
            let voice_facts = fact_tokens(voice);
            let display_facts = fact_tokens(display);
            let missing: BTreeSet<String> =
                voice_facts.difference(&display_facts).cloned().collect();
            if !missing.is_empty() {
                issues.push(format!(
                    "voice_text states {} but display_text does not; display_text must elaborate the same facts.",
                    quote_list(&missing)
                ));
            }

            let voice_terms = content_terms(voice);
            let display_terms = content_terms(display);
            if !voice_terms.is_empty()
                && !display_terms.is_empty()
                && voice_terms.is_disjoint(&display_terms)
            {
                issues.push(format!(
                    "voice_text and display_text discuss different topics (voice: {}; display: {}).",
                    quote_list(&voice_terms.iter().take(3).cloned().collect()),
                    quote_list(&display_terms.iter().take(3).cloned().collect())
                ));
            }
        }

        if response.show_in_ui && !self.ui_allowed {
            issues.push(format!(
                "show_in_ui is true for a {} response; it must be false when there is no document content.",
                self.mode
            ));
        }
        if response.show_in_ui && display.is_empty() {
            issues.push("show_in_ui is true but display_text is empty.".to_string());
        }

        if response.follow_ups.len() > MAX_FOLLOW_UPS {
            issues.push(format!(
                "{} follow-ups were offered; at most {} are allowed.",
                response.follow_ups.len(),
                MAX_FOLLOW_UPS
            ));
        }
        for follow_up in &response.follow_ups {
            if is_question(follow_up) {
                issues.push(format!(
                    "Follow-up '{}' is phrased as a question; write it as a statement the user would say.",
                    follow_up
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{IntentCategory, Snippet};

    const BUDGET: usize = 2000;

    fn response(voice: &str, display: &str, show: bool, follow_ups: &[&str]) -> AgentResponse {
        AgentResponse {
            voice_text: voice.to_string(),
            display_text: display.to_string(),
            show_in_ui: show,
            follow_ups: follow_ups.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn intent(query: &str, category: IntentCategory) -> IntentResult {
        IntentResult::new(query, category, "", 0.9)
    }

    #[test]
    fn test_unknown_uses_investment_rules() {
        let rules = rule_set(ValidationMode::Unknown);
        assert_eq!(rules.grounding, Grounding::Strict);
        assert_eq!(rules.tool_policy, ToolPolicy::Required);
    }

    #[test]
    fn test_greeting_with_ui_flag_fails() {
        let findings = rule_set(ValidationMode::Greet).evaluate(
            &intent("Hello", IntentCategory::Greet),
            &response("Hello, I'm Avery.", "Hi, I'm Avery.", true, &[]),
            &RetrievalRecord::not_invoked("Hello"),
            BUDGET,
        );
        assert!(!findings.is_clean());
        assert!(findings.consistency_issues[0].contains("show_in_ui"));
        assert_eq!(findings.tool_usage_ok, Some(true));
    }

    #[test]
    fn test_greeting_with_market_fact_fails() {
        let findings = rule_set(ValidationMode::Greet).evaluate(
            &intent("Hi", IntentCategory::Greet),
            &response("Hello! The market returned 3% last year.", "Hello! The market returned 3% last year.", false, &[]),
            &RetrievalRecord::not_invoked("Hi"),
            BUDGET,
        );
        assert!(findings.traceability_issues[0].contains("'3%'"));
    }

    #[test]
    fn test_investment_not_invoked_fails_traceability_and_tool() {
        let findings = rule_set(ValidationMode::Investment).evaluate(
            &intent("GIS view?", IntentCategory::InvestmentRelated),
            &response("Rates fall.", "Rates fall.", true, &[]),
            &RetrievalRecord::not_invoked("GIS view?"),
            BUDGET,
        );
        assert!(!findings.traceability_issues.is_empty());
        assert_eq!(findings.tool_usage_ok, Some(false));
    }

    #[test]
    fn test_general_without_retrieval_is_not_applicable() {
        let findings = rule_set(ValidationMode::General).evaluate(
            &intent("Who are you?", IntentCategory::General),
            &response("I'm Avery, your research assistant.", "I'm Avery, and I help you explore our research library.", false, &[]),
            &RetrievalRecord::not_invoked("Who are you?"),
            BUDGET,
        );
        assert!(findings.is_clean());
        assert_eq!(findings.tool_usage_ok, None);
    }

    #[test]
    fn test_unsupported_figure_named() {
        let retrieval = RetrievalRecord::invoked("q", vec![Snippet::new("Diversification reduces portfolio risk.")]);
        let findings = rule_set(ValidationMode::Investment).evaluate(
            &intent("Does diversification help?", IntentCategory::InvestmentRelated),
            &response(
                "Diversification reduces risk by 30% according to our research.",
                "## Diversification\n\nDiversification reduces portfolio risk by **30%**.",
                true,
                &[],
            ),
            &retrieval,
            BUDGET,
        );
        assert_eq!(findings.traceability_issues.len(), 1);
        assert!(findings.traceability_issues[0].contains("'30%'"));
    }

    #[test]
    fn test_voice_display_contradiction() {
        let retrieval = RetrievalRecord::invoked("q", vec![Snippet::new("Returns of 3% and 5% are cited.")]);
        let findings = rule_set(ValidationMode::Investment).evaluate(
            &intent("Expected returns?", IntentCategory::InvestmentRelated),
            &response("Our outlook cites 3% returns.", "## Returns outlook\n\nReturns of **5%** annually.", true, &[]),
            &retrieval,
            BUDGET,
        );
        assert!(findings
            .consistency_issues
            .iter()
            .any(|i| i.contains("'3%'") && i.contains("display_text does not")));
    }

    #[test]
    fn test_long_voice_and_question_follow_up() {
        let voice = "word ".repeat(31);
        let retrieval = RetrievalRecord::invoked("q", vec![Snippet::new("word outlook")]);
        let findings = rule_set(ValidationMode::Investment).evaluate(
            &intent("outlook", IntentCategory::InvestmentRelated),
            &response(&voice, "word outlook", true, &["Would you like the outlook?"]),
            &retrieval,
            BUDGET,
        );
        assert!(findings.consistency_issues.iter().any(|i| i.contains("31 words")));
        assert!(findings.consistency_issues.iter().any(|i| i.contains("phrased as a question")));
    }

    #[test]
    fn test_out_of_scope_must_decline() {
        let rules = rule_set(ValidationMode::OutOfScope);
        let ok = rules.evaluate(
            &intent("How do I pick locks?", IntentCategory::OutOfScope),
            &response(
                "I'm sorry, I can only help with banking and investment research.",
                "I'm sorry, I can only help with banking and investment research questions.",
                false,
                &[],
            ),
            &RetrievalRecord::not_invoked("How do I pick locks?"),
            BUDGET,
        );
        assert!(ok.is_clean());

        let bad = rules.evaluate(
            &intent("How do I pick locks?", IntentCategory::OutOfScope),
            &response("Use a tension wrench.", "Use a tension wrench.", false, &[]),
            &RetrievalRecord::not_invoked("How do I pick locks?"),
            BUDGET,
        );
        assert!(bad.traceability_issues[0].contains("does not decline"));
    }

    #[test]
    fn test_figure_echoed_from_query_must_match_sources() {
        let retrieval = RetrievalRecord::invoked(
            "european equity growth",
            vec![Snippet::new("European equity earnings growth of 4% expected in 2025.")],
        );
        let findings = rule_set(ValidationMode::Investment).evaluate(
            &intent("Is European equity growth 9% in 2025?", IntentCategory::InvestmentRelated),
            &response(
                "Yes, European equity growth is 9% in 2025.",
                "## European equities\n\nEuropean equity growth is **9%** in 2025.",
                true,
                &[],
            ),
            &retrieval,
            BUDGET,
        );

        assert!(!findings.is_clean());
        assert!(findings.traceability_issues.iter().any(|i| i.contains("'9%'")));
        assert!(!findings.traceability_issues.iter().any(|i| i.contains("'2025'")));
    }

    #[test]
    fn test_ranking_beside_no_info_wording_fails() {
        let findings = rule_set(ValidationMode::Investment).evaluate(
            &intent(
                "What is the 2023 ranking leader in the innovation index?",
                IntentCategory::InvestmentRelated,
            ),
            &response(
                "Switzerland leads the 2023 innovation index ranking, though I don't have more detail.",
                "",
                false,
                &[],
            ),
            &RetrievalRecord::invoked("innovation index", vec![]),
            BUDGET,
        );

        assert!(!findings.is_clean());
        assert!(findings
            .traceability_issues
            .iter()
            .any(|i| i.contains("'switzerland'") && i.contains("beyond the question")));
    }

    #[test]
    fn test_plain_no_info_restating_question_passes() {
        let findings = rule_set(ValidationMode::Investment).evaluate(
            &intent(
                "What is the 2023 ranking leader in the innovation index?",
                IntentCategory::InvestmentRelated,
            ),
            &response(
                "I don't have information on the 2023 innovation index ranking.",
                "",
                false,
                &[],
            ),
            &RetrievalRecord::invoked("innovation index", vec![]),
            BUDGET,
        );
        assert!(findings.is_clean(), "{:?}", findings.issues());
    }

    #[test]
    fn test_grounding_ignores_snippets_outside_budget() {
        // The first snippet does not fit the context, so the generator never
        // saw its 12% figure.
        let retrieval = RetrievalRecord::invoked(
            "q",
            vec![
                Snippet::new(format!("Returns of 12% are cited. {}", "filler ".repeat(2000))),
                Snippet::new("Returns of 4% are cited."),
            ],
        );
        let findings = rule_set(ValidationMode::Investment).evaluate(
            &intent("Expected returns?", IntentCategory::InvestmentRelated),
            &response("Returns of 12% are cited.", "Returns of 12% are cited.", false, &[]),
            &retrieval,
            BUDGET,
        );
        assert!(findings.traceability_issues.iter().any(|i| i.contains("'12%'")));
    }
}
