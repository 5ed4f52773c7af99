//! Keyword classifier for inbound questions. Pure and deterministic:
//! explanatory phrases win over content phrases, content over structural,
//! and anything unmatched falls through to semantic retrieval.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Structural,
    Content,
    Semantic,
}

const STRUCTURAL_PHRASES: &[&str] = &[
    "list files",
    "directory structure",
    "repo structure",
    "how many files",
    "how many functions",
    "functions in",
    "classes in",
];

const CONTENT_PHRASES: &[&str] = &["show code", "give code", "print code", "full code"];

const EXPLANATORY_PHRASES: &[&str] = &["what does", "what is the purpose", "explain", "how does"];

pub fn classify(question: &str) -> QueryKind {
    let q = question.to_lowercase();
    let q = q.trim();

    if EXPLANATORY_PHRASES.iter().any(|p| q.contains(p)) {
        return QueryKind::Semantic;
    }
    if CONTENT_PHRASES.iter().any(|p| q.contains(p)) {
        return QueryKind::Content;
    }
    if STRUCTURAL_PHRASES.iter().any(|p| q.contains(p)) {
        return QueryKind::Structural;
    }

    QueryKind::Semantic
}
