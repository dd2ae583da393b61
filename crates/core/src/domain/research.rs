use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

const SLUG_MAX_CHARS: usize = 50;

/// Structured form of a research query, produced by the topic extractor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchTopic {
    pub topic: String,
    pub jurisdiction: String,
}

impl ResearchTopic {
    pub fn cache_key(&self) -> String {
        cache_key(&self.topic, &self.jurisdiction)
    }
}

/// A synthesized research brief shared by every user asking about the same
/// topic in the same jurisdiction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchCacheEntry {
    pub cache_key: String,
    pub topic: String,
    pub jurisdiction: String,
    pub research_output: String,
    pub sources: String,
    pub last_verified_at: DateTime<Utc>,
    pub access_count: i64,
}

impl ResearchCacheEntry {
    pub fn new(
        topic: &ResearchTopic,
        research_output: impl Into<String>,
        sources: impl Into<String>,
        verified_at: DateTime<Utc>,
    ) -> Self {
        Self {
            cache_key: topic.cache_key(),
            topic: topic.topic.clone(),
            jurisdiction: topic.jurisdiction.clone(),
            research_output: research_output.into(),
            sources: sources.into(),
            last_verified_at: verified_at,
            access_count: 0,
        }
    }

    /// `ttl_days == 0` means entries never go stale.
    pub fn is_stale(&self, now: DateTime<Utc>, ttl_days: u32) -> bool {
        ttl_days > 0 && now - self.last_verified_at > Duration::days(i64::from(ttl_days))
    }
}

/// Lowercase, strip non-word characters, collapse separators into single
/// underscores and cap the result at 50 characters.
pub fn slugify(value: &str) -> String {
    let lowered = value.to_lowercase();
    let mut slug = String::with_capacity(lowered.len());
    let mut pending_separator = false;

    for ch in lowered.trim().chars() {
        if ch.is_alphanumeric() {
            if pending_separator && !slug.is_empty() {
                slug.push('_');
            }
            pending_separator = false;
            slug.push(ch);
        } else if ch.is_whitespace() || ch == '_' || ch == '-' {
            pending_separator = true;
        }
    }

    let truncated: String = slug.chars().take(SLUG_MAX_CHARS).collect();
    truncated.trim_end_matches('_').to_string()
}

pub fn cache_key(topic: &str, jurisdiction: &str) -> String {
    format!("{}_{}", slugify(topic), slugify(jurisdiction))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchOrigin {
    Cache,
    Fresh,
    Stale,
}

/// What the research stage produced for a request. Always renders to some
/// prompt context, even when no research could be done.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResearchOutcome {
    NotRequested,
    Grounded {
        topic: ResearchTopic,
        brief: String,
        sources: String,
        origin: ResearchOrigin,
        verified_at: DateTime<Utc>,
    },
    QuotaExhausted {
        topic: ResearchTopic,
        daily_limit: u32,
    },
    Unavailable {
        reason: String,
    },
}

impl ResearchOutcome {
    pub fn from_entry(entry: ResearchCacheEntry, origin: ResearchOrigin) -> Self {
        Self::Grounded {
            topic: ResearchTopic { topic: entry.topic, jurisdiction: entry.jurisdiction },
            brief: entry.research_output,
            sources: entry.sources,
            origin,
            verified_at: entry.last_verified_at,
        }
    }

    pub fn is_grounded(&self) -> bool {
        matches!(self, Self::Grounded { .. })
    }

    pub fn brief(&self) -> &str {
        match self {
            Self::Grounded { brief, .. } => brief,
            _ => "",
        }
    }

    pub fn sources(&self) -> &str {
        match self {
            Self::Grounded { sources, .. } => sources,
            _ => "",
        }
    }

    pub fn origin(&self) -> Option<ResearchOrigin> {
        match self {
            Self::Grounded { origin, .. } => Some(*origin),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::{cache_key, slugify, ResearchCacheEntry, ResearchTopic};

    #[test]
    fn slugify_normalizes_case_whitespace_and_punctuation() {
        assert_eq!(slugify("  Breach of   Contract "), "breach_of_contract");
        assert_eq!(slugify("breach-of-contract!"), "breach_of_contract");
        assert_eq!(slugify("Breach, of Contract?"), "breach_of_contract");
        assert_eq!(slugify("__leading and trailing__"), "leading_and_trailing");
    }

    #[test]
    fn slugify_is_idempotent() {
        let inputs = [
            "What does the law say about damages?",
            "  Section 12(3) of the Employment Code Act ",
            "Côte d'Ivoire",
            "a_b__c---d",
            "",
            "x".repeat(80).as_str(),
            "word ".repeat(20).as_str(),
        ]
        .map(str::to_string);

        for input in inputs {
            let once = slugify(&input);
            assert_eq!(slugify(&once), once, "slugify should be idempotent for {input:?}");
        }
    }

    #[test]
    fn slugify_truncates_to_fifty_characters() {
        let slug = slugify(&"negligence ".repeat(10));
        assert!(slug.chars().count() <= 50);
        assert!(!slug.ends_with('_'));
    }

    #[test]
    fn cache_key_ignores_presentation_differences() {
        assert_eq!(
            cache_key("Breach of Contract Damages", "ZAMBIA"),
            cache_key("breach-of-contract damages!", "  zambia ")
        );
        assert_eq!(cache_key("Judicial Review", "Zambia"), "judicial_review_zambia");
    }

    #[test]
    fn staleness_respects_ttl_and_zero_disables_it() {
        let topic = ResearchTopic { topic: "estoppel".into(), jurisdiction: "Zambia".into() };
        let now = Utc::now();
        let entry = ResearchCacheEntry::new(&topic, "brief", "https://a", now - Duration::days(40));

        assert!(entry.is_stale(now, 30));
        assert!(!entry.is_stale(now, 90));
        assert!(!entry.is_stale(now, 0));
    }
}
