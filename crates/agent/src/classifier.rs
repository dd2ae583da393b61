/// Phrases that signal a question needs verified legal research. Matched as
/// case-insensitive substrings.
pub const RESEARCH_KEYWORDS: &[&str] = &[
    "statute",
    "case law",
    "precedent",
    "leading case",
    "legislation",
    "act of parliament",
    "judgment",
    "ruling",
    "court held",
    "ratio decidendi",
    "constitution",
    "what does the law say",
    "the law on",
    "legal position",
    "legal authority",
    "citation",
];

/// Research is needed when the caller asks for a deep search or the query
/// reads like a legal-research question.
pub fn needs_research(query: &str, deep_search: bool) -> bool {
    deep_search || matched_keyword(query).is_some()
}

pub fn matched_keyword(query: &str) -> Option<&'static str> {
    let lowered = query.to_lowercase();
    RESEARCH_KEYWORDS.iter().copied().find(|keyword| lowered.contains(keyword))
}
