use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use arbor_types::path;

use crate::error::{SearchError, SearchResult};
use crate::pattern::PathPattern;

/// How multiple keywords combine in a keyword search.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum KeywordCriteria {
    /// The value contains at least one keyword.
    #[default]
    Any,
    /// The value contains every keyword.
    All,
    /// The value contains none of the keywords.
    None,
}

impl KeywordCriteria {
    /// Evaluate `keywords` as case-sensitive substrings of `text`.
    pub fn matches<S: AsRef<str>>(&self, text: &str, keywords: &[S]) -> bool {
        let mut hits = keywords.iter().map(|k| text.contains(k.as_ref()));
        match self {
            Self::Any => hits.any(|hit| hit),
            Self::All => hits.all(|hit| hit),
            Self::None => !hits.any(|hit| hit),
        }
    }
}

impl fmt::Display for KeywordCriteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Any => "ANY",
            Self::All => "ALL",
            Self::None => "NONE",
        })
    }
}

impl FromStr for KeywordCriteria {
    type Err = SearchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ANY" => Ok(Self::Any),
            "ALL" => Ok(Self::All),
            "NONE" => Ok(Self::None),
            other => Err(SearchError::InvalidCriteria(format!(
                "unknown keyword criteria '{other}' (expected ANY, ALL or NONE)"
            ))),
        }
    }
}

/// A search query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SearchCriteria {
    /// Nodes whose primary type is one of the given types.
    Type(Vec<String>),
    /// The node at exactly this normalized path.
    Path(String),
    /// Nodes whose path matches a wildcard pattern.
    PathPattern(PathPattern),
    /// Nodes of `type_name` whose `property` text satisfies `criteria`.
    Keyword {
        type_name: String,
        property: String,
        criteria: KeywordCriteria,
        keywords: Vec<String>,
    },
}

impl SearchCriteria {
    pub fn by_type<I, S>(types: I) -> SearchResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let types: Vec<String> = types.into_iter().map(Into::into).collect();
        if types.is_empty() || types.iter().any(|t| t.trim().is_empty()) {
            return Err(SearchError::InvalidCriteria(
                "search by type requires at least one non-empty type name".into(),
            ));
        }
        Ok(Self::Type(types))
    }

    /// Exact path, or a pattern when the path contains `*`.
    pub fn by_path(p: &str) -> SearchResult<Self> {
        if p.trim().is_empty() {
            return Err(SearchError::InvalidCriteria("search by path requires a path".into()));
        }
        if p.contains('*') {
            return PathPattern::parse(p).map(Self::PathPattern);
        }
        Ok(Self::Path(path::normalize(p)?))
    }

    pub fn by_keyword<S: Into<String>>(
        type_name: &str,
        property: &str,
        criteria: KeywordCriteria,
        keywords: impl IntoIterator<Item = S>,
    ) -> SearchResult<Self> {
        let keywords: Vec<String> = keywords.into_iter().map(Into::into).collect();
        if keywords.is_empty() {
            return Err(SearchError::InvalidCriteria(
                "search by keyword requires keywords".into(),
            ));
        }
        if type_name.trim().is_empty() || property.trim().is_empty() {
            return Err(SearchError::InvalidCriteria(
                "search by keyword requires a type and a property".into(),
            ));
        }
        Ok(Self::Keyword {
            type_name: type_name.to_string(),
            property: property.to_string(),
            criteria,
            keywords,
        })
    }
}

impl fmt::Display for SearchCriteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Type(types) => write!(f, "type in [{}]", types.join(", ")),
            Self::Path(p) => write!(f, "path = {p}"),
            Self::PathPattern(p) => write!(f, "path like {p}"),
            Self::Keyword {
                type_name,
                property,
                criteria,
                keywords,
            } => write!(
                f,
                "{type_name}.{property} contains {criteria} of [{}]",
                keywords.join(", ")
            ),
        }
    }
}
