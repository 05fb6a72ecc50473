//! Lexical helpers shared by retrieval, generation and validation
//!
//! Static word lists, zero allocation on lookup.

use std::collections::BTreeSet;

const STOPWORDS: &[&str] = &[
    "about", "above", "after", "again", "also", "because", "been", "before", "being", "below",
    "between", "both", "could", "does", "doing", "down", "during", "each", "from", "further",
    "have", "having", "here", "hers", "herself", "himself", "into", "itself", "just", "like",
    "more", "most", "much", "myself", "once", "only", "other", "ours", "over", "same", "should",
    "some", "such", "than", "that", "their", "theirs", "them", "themselves", "then", "there",
    "these", "they", "this", "those", "through", "under", "until", "very", "what", "when",
    "where", "which", "while", "whom", "will", "with", "would", "your", "yours", "yourself",
    "tell", "show", "please", "know", "want", "today", "there's", "here's", "information",
];

const NO_INFORMATION_PHRASES: &[&str] = &[
    "don't have",
    "do not have",
    "no information",
    "no relevant information",
    "not available",
    "unavailable",
    "couldn't find",
    "could not find",
    "not covered",
    "isn't covered",
    "not in our",
    "not in my",
];

/// Words a "no information" answer may use on top of the question's own.
const NO_INFORMATION_VOCABULARY: &[&str] = &[
    "have", "available", "unavailable", "find", "found", "covered", "cover", "knowledge", "base",
    "research", "library", "document", "documents", "source", "sources", "sorry", "afraid",
    "currently", "right", "specific", "detail", "details", "data", "able", "anything", "topic",
    "question", "something", "another", "else", "help", "happy", "asking", "access", "regarding",
    "related", "material", "content", "publications",
];

const DECLINE_PHRASES: &[&str] = &[
    "can't help",
    "cannot help",
    "can't assist",
    "cannot assist",
    "unable to",
    "not able to",
    "can only help",
    "only able to help",
    "outside",
    "not something i can",
    "i'm sorry",
    "unfortunately",
];

const QUESTION_OPENERS: &[&str] = &[
    "would you", "do you", "did you", "can you", "could you", "shall ", "should i", "is there",
    "are there", "what ", "how ", "why ", "when ", "where ", "which ", "who ",
];

fn normalize_apostrophes(text: &str) -> String {
    text.to_lowercase().replace(['\u{2019}', '\u{2018}'], "'")
}

/// Lowercased alphabetic words of four letters or more, stopwords removed.
pub fn content_terms(text: &str) -> BTreeSet<String> {
    normalize_apostrophes(text)
        .split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .map(|w| w.trim_matches('\''))
        .filter(|w| w.len() >= 4 && w.chars().all(char::is_alphabetic))
        .filter(|w| !STOPWORDS.contains(w))
        .map(str::to_string)
        .collect()
}

/// Normalised tokens that carry a figure: numbers, percentages, years,
/// currency amounts, rankings such as `#1`.
pub fn fact_tokens(text: &str) -> BTreeSet<String> {
    text.split_whitespace()
        .filter(|w| w.chars().any(|c| c.is_ascii_digit()))
        .map(normalize_fact)
        .filter(|w| w.chars().any(|c| c.is_ascii_digit()))
        .collect()
}

fn normalize_fact(word: &str) -> String {
    let kept: String = word
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '.' || *c == '%')
        .collect::<String>()
        .to_lowercase();
    kept.trim_matches('.').to_string()
}

/// Heading, emphasis, list, table or link syntax.
pub fn has_markup(text: &str) -> bool {
    if text.contains(['#', '*', '`', '|']) || text.contains("](") || text.contains("__") {
        return true;
    }
    text.lines().any(|line| {
        let line = line.trim_start();
        line.starts_with("- ") || line.starts_with("+ ")
    })
}

pub fn is_question(text: &str) -> bool {
    let lowered = normalize_apostrophes(text.trim());
    lowered.ends_with('?') || QUESTION_OPENERS.iter().any(|q| lowered.starts_with(q))
}

pub fn states_no_information(text: &str) -> bool {
    let lowered = normalize_apostrophes(text);
    NO_INFORMATION_PHRASES.iter().any(|p| lowered.contains(p))
}

fn singular(term: &str) -> &str {
    term.strip_suffix('s').unwrap_or(term)
}

/// Content terms of `answer` that come neither from `query` nor from the
/// usual wording of a "no information" answer. Non-empty means the answer
/// says something beyond "I don't have that".
pub fn terms_beyond_no_information(answer: &str, query: &str) -> BTreeSet<String> {
    let allowed: BTreeSet<String> = content_terms(query)
        .iter()
        .map(|t| singular(t).to_string())
        .chain(NO_INFORMATION_VOCABULARY.iter().map(|t| singular(t).to_string()))
        .collect();

    content_terms(answer)
        .into_iter()
        .filter(|t| !allowed.contains(singular(t)))
        .collect()
}

pub fn declines(text: &str) -> bool {
    let lowered = normalize_apostrophes(text);
    DECLINE_PHRASES.iter().any(|p| lowered.contains(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fact_tokens_normalise() {
        let facts = fact_tokens("Markets expect **+35%** gains by 2026. Switzerland ranked #1, $8,950.50");
        assert!(facts.contains("35%"));
        assert!(facts.contains("2026"));
        assert!(facts.contains("1"));
        assert!(facts.contains("8950.50"));
        assert!(!facts.iter().any(|f| f.contains("markets")));
    }

    #[test]
    fn test_content_terms_skip_stopwords() {
        let terms = content_terms("What is the latest Global Investment Strategy view for EMEA?");
        assert!(terms.contains("global"));
        assert!(terms.contains("strategy"));
        assert!(terms.contains("emea"));
        assert!(!terms.contains("what"));
        assert!(!terms.contains("the"));
    }

    #[test]
    fn test_markup_detection() {
        assert!(has_markup("## Title"));
        assert!(has_markup("Growth is **strong**"));
        assert!(has_markup("Points:\n- one\n- two"));
        assert!(!has_markup("Growth looks steady this quarter, according to our outlook."));
    }

    #[test]
    fn test_terms_beyond_no_information() {
        let query = "What is the 2023 ranking leader in the innovation index?";
        assert!(terms_beyond_no_information(
            "I don't have information on the 2023 innovation index rankings in our library.",
            query
        )
        .is_empty());

        let extra = terms_beyond_no_information(
            "Switzerland leads the 2023 innovation index ranking, though I don't have more detail.",
            query,
        );
        assert!(extra.contains("switzerland"));
        assert!(extra.contains("leads"));
    }

    #[test]
    fn test_question_phrasing() {
        assert!(is_question("Would you like to hear about bonds?"));
        assert!(is_question("What does the outlook say"));
        assert!(!is_question("Tell me more about the EMEA outlook"));
        assert!(!is_question("Summarise the fixed income view"));
    }

    #[test]
    fn test_no_information_and_decline_phrases() {
        assert!(states_no_information("I don\u{2019}t have that information in our library."));
        assert!(!states_no_information("Switzerland ranked first in 2023."));
        assert!(declines("I'm sorry, I can only help with banking and investment research."));
        assert!(!declines("Here is the outlook for EMEA."));
    }
}
