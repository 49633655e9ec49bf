use std::cmp::Ordering;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::GeneticsError;
use crate::ValidationError;

/// Pattern that produced a lineage match, in matching priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    /// "a cross of X and Y", "cross between X and Y"
    CrossOf,
    /// "(X x Y)"
    Parenthetical,
    /// "X x Y", "X × Y"
    TimesNotation,
    /// "hybrid of X and Y"
    HybridOf,
    /// "blend of X and Y"
    BlendOf,
    /// "descended from X and Y"
    DescendedFrom,
    /// "bred from X and Y"
    BredFrom,
}

impl ExtractionMethod {
    pub const ALL: [Self; 7] = [
        Self::CrossOf,
        Self::Parenthetical,
        Self::TimesNotation,
        Self::HybridOf,
        Self::BlendOf,
        Self::DescendedFrom,
        Self::BredFrom,
    ];

    fn pattern(self) -> &'static str {
        match self {
            Self::CrossOf => r"(?i)cross\s+(?:of|between)\s+([^,\n]+?)\s+(?:and|&|x)\s+([^,.\n]+)",
            Self::Parenthetical => r"\(([^()]+?)\s+[xX×]\s+([^()]+?)\)",
            Self::TimesNotation => {
                r"([A-Z][\w'#]*(?:\s+[A-Z0-9][\w'#]*)*)\s+[xX×]\s+([A-Z][\w'#]*(?:\s+[A-Z0-9][\w'#]*)*)"
            }
            Self::HybridOf => r"(?i)hybrid\s+of\s+([^,\n]+?)\s+(?:and|&)\s+([^,.\n]+)",
            Self::BlendOf => r"(?i)blend\s+of\s+([^,\n]+?)\s+(?:and|&)\s+([^,.\n]+)",
            Self::DescendedFrom => r"(?i)descended\s+from\s+([^,\n]+?)\s+(?:and|&)\s+([^,.\n]+)",
            Self::BredFrom => r"(?i)bred\s+from\s+([^,\n]+?)\s+(?:and|&)\s+([^,.\n]+)",
        }
    }
}

impl Display for ExtractionMethod {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::CrossOf => "cross_of",
            Self::Parenthetical => "parenthetical",
            Self::TimesNotation => "times_notation",
            Self::HybridOf => "hybrid_of",
            Self::BlendOf => "blend_of",
            Self::DescendedFrom => "descended_from",
            Self::BredFrom => "bred_from",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Medium,
    High,
}

impl Confidence {
    const fn rank(self) -> u8 {
        match self {
            Self::Medium => 1,
            Self::High => 2,
        }
    }
}

impl PartialOrd for Confidence {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Confidence {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl FromStr for Confidence {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            _ => Err(ValidationError::InvalidConfidence {
                value: value.to_owned(),
            }),
        }
    }
}

impl Display for Confidence {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::High => f.write_str("high"),
            Self::Medium => f.write_str("medium"),
        }
    }
}

/// Confidence assigned to each extraction method.
///
/// Loaded from the `[genetics.confidence]` table; unspecified methods keep
/// their default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidencePolicy {
    pub cross_of: Confidence,
    pub parenthetical: Confidence,
    pub times_notation: Confidence,
    pub hybrid_of: Confidence,
    pub blend_of: Confidence,
    pub descended_from: Confidence,
    pub bred_from: Confidence,
}

impl Default for ConfidencePolicy {
    fn default() -> Self {
        Self {
            cross_of: Confidence::High,
            parenthetical: Confidence::High,
            times_notation: Confidence::High,
            hybrid_of: Confidence::Medium,
            blend_of: Confidence::Medium,
            descended_from: Confidence::Medium,
            bred_from: Confidence::Medium,
        }
    }
}

impl ConfidencePolicy {
    pub fn confidence_for(&self, method: ExtractionMethod) -> Confidence {
        match method {
            ExtractionMethod::CrossOf => self.cross_of,
            ExtractionMethod::Parenthetical => self.parenthetical,
            ExtractionMethod::TimesNotation => self.times_notation,
            ExtractionMethod::HybridOf => self.hybrid_of,
            ExtractionMethod::BlendOf => self.blend_of,
            ExtractionMethod::DescendedFrom => self.descended_from,
            ExtractionMethod::BredFrom => self.bred_from,
        }
    }
}

/// Two parents and the pattern that found them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lineage {
    pub parent1: String,
    pub parent2: String,
    pub method: ExtractionMethod,
}

/// Compiled lineage patterns, tried in [`ExtractionMethod::ALL`] order.
#[derive(Debug, Clone)]
pub struct LineageExtractor {
    patterns: Vec<(ExtractionMethod, Regex)>,
}

impl LineageExtractor {
    pub fn new() -> Result<Self, GeneticsError> {
        let patterns = ExtractionMethod::ALL
            .into_iter()
            .map(|method| {
                Regex::new(method.pattern())
                    .map(|regex| (method, regex))
                    .map_err(|source| GeneticsError::Pattern {
                        method: method.to_string(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    pub fn extract(&self, text: &str) -> Option<Lineage> {
        self.patterns.iter().find_map(|(method, regex)| {
            let captures = regex.captures(text)?;
            let parent1 = clean_parent(captures.get(1)?.as_str());
            let parent2 = clean_parent(captures.get(2)?.as_str());
            if parent1.is_empty() || parent2.is_empty() || parent1.eq_ignore_ascii_case(&parent2) {
                return None;
            }
            Some(Lineage {
                parent1,
                parent2,
                method: *method,
            })
        })
    }
}

const NOISE_SUFFIXES: [&str; 3] = ["strain", "cannabis", "marijuana"];

/// Title-cases a captured parent and strips trailing filler words.
fn clean_parent(raw: &str) -> String {
    let mut words: Vec<&str> = raw
        .split_whitespace()
        .map(|word| word.trim_matches(|c: char| matches!(c, '"' | '\'' | '.' | ';' | ':')))
        .filter(|word| !word.is_empty())
        .collect();
    while words
        .last()
        .is_some_and(|word| NOISE_SUFFIXES.iter().any(|noise| word.eq_ignore_ascii_case(noise)))
    {
        words.pop();
    }

    words
        .iter()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> LineageExtractor {
        LineageExtractor::new().expect("patterns compile")
    }

    #[test]
    fn extracts_cross_of_phrasing() {
        let lineage = extractor()
            .extract("Blue Dream is a cross of Blueberry and Haze strain.")
            .expect("lineage found");

        assert_eq!(lineage.parent1, "Blueberry");
        assert_eq!(lineage.parent2, "Haze");
        assert_eq!(lineage.method, ExtractionMethod::CrossOf);
    }

    #[test]
    fn extracts_parenthetical_and_times_notation() {
        let lineage = extractor()
            .extract("Gelato (sunset sherbet x thin mint gsc) hits hard")
            .expect("lineage found");
        assert_eq!(lineage.method, ExtractionMethod::Parenthetical);
        assert_eq!(lineage.parent1, "Sunset Sherbet");
        assert_eq!(lineage.parent2, "Thin Mint Gsc");

        let times = extractor()
            .extract("Our take on Wedding Cake × Gelato 33 genetics")
            .expect("lineage found");
        assert_eq!(times.method, ExtractionMethod::TimesNotation);
        assert_eq!(times.parent2, "Gelato 33");
    }

    #[test]
    fn medium_phrasings_map_to_medium_confidence_by_default() {
        let lineage = extractor()
            .extract("A balanced hybrid of OG Kush & Durban Poison")
            .expect("lineage found");
        let policy = ConfidencePolicy::default();

        assert_eq!(lineage.method, ExtractionMethod::HybridOf);
        assert_eq!(policy.confidence_for(lineage.method), Confidence::Medium);
        assert_eq!(policy.confidence_for(ExtractionMethod::CrossOf), Confidence::High);
    }

    #[test]
    fn plain_descriptions_and_package_sizes_do_not_match() {
        assert_eq!(extractor().extract("Sweet citrus aroma, 3.5g x 2 pack"), None);
        assert_eq!(extractor().extract(""), None);
    }

    #[test]
    fn confidence_orders_high_above_medium() {
        assert!(Confidence::High > Confidence::Medium);
        assert_eq!("HIGH".parse::<Confidence>(), Ok(Confidence::High));
        assert!("certain".parse::<Confidence>().is_err());
    }
}
