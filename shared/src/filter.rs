//! Query-string parameters to document predicates.

use crate::types::Document;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    /// Exact string equality
    Equals { field: &'static str, value: String },
    /// Case-insensitive literal substring of a string field
    Contains { field: &'static str, needle: String },
    /// Array field sharing an element with `tags`, or any text in the field
    /// containing one of `tags` case-insensitively
    AnyTag { field: &'static str, tags: Vec<String> },
    /// Inclusive numeric bounds; at least one side is set
    Range {
        field: &'static str,
        min: Option<f64>,
        max: Option<f64>,
    },
}

impl Clause {
    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Clause::Equals { field, value } => {
                doc.get(*field).and_then(Value::as_str) == Some(value.as_str())
            }
            Clause::Contains { field, needle } => doc
                .get(*field)
                .and_then(Value::as_str)
                .is_some_and(|text| text.to_lowercase().contains(&needle.to_lowercase())),
            Clause::AnyTag { field, tags } => match doc.get(*field) {
                Some(Value::Array(items)) => {
                    let intersects = items
                        .iter()
                        .filter_map(Value::as_str)
                        .any(|item| tags.iter().any(|tag| tag == item));
                    intersects
                        || items
                            .iter()
                            .filter_map(Value::as_str)
                            .any(|item| contains_any_tag(item, tags))
                }
                Some(Value::String(text)) => contains_any_tag(text, tags),
                _ => false,
            },
            Clause::Range { field, min, max } => {
                let Some(n) = doc.get(*field).and_then(Value::as_f64) else {
                    return false;
                };
                min.map_or(true, |min| n >= min) && max.map_or(true, |max| n <= max)
            }
        }
    }
}

fn contains_any_tag(text: &str, tags: &[String]) -> bool {
    let text = text.to_lowercase();
    tags.iter().any(|tag| text.contains(&tag.to_lowercase()))
}

/// Conjunction of clauses; no clauses matches every document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    clauses: Vec<Clause>,
}

impl Filter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with(mut self, clause: Clause) -> Self {
        self.clauses.push(clause);
        self
    }

    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn matches(&self, doc: &Document) -> bool {
        self.clauses.iter().all(|clause| clause.matches(doc))
    }
}

/// Filter parameters accepted by `GET /movies`
#[derive(Debug, Default, Clone)]
pub struct MovieQuery {
    pub email: Option<String>,
    pub search: Option<String>,
    pub genre: Option<String>,
    pub min_rating: Option<String>,
    pub max_rating: Option<String>,
}

impl MovieQuery {
    pub fn from_params<F>(param: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            email: non_empty(param("email")),
            search: non_empty(param("search")),
            genre: non_empty(param("genre")),
            min_rating: non_empty(param("minRating")),
            max_rating: non_empty(param("maxRating")),
        }
    }

    pub fn into_filter(self) -> Filter {
        let mut filter = Filter::all();

        if let Some(email) = self.email {
            filter = filter.with(Clause::Equals {
                field: "email",
                value: email,
            });
        }

        if let Some(search) = self.search {
            filter = filter.with(Clause::Contains {
                field: "title",
                needle: search,
            });
        }

        if let Some(genre) = self.genre {
            let tags: Vec<String> = genre
                .split(',')
                .map(str::trim)
                .filter(|tag| !tag.is_empty())
                .map(str::to_string)
                .collect();
            if !tags.is_empty() {
                filter = filter.with(Clause::AnyTag {
                    field: "genre",
                    tags,
                });
            }
        }

        // Unparseable bounds are dropped rather than rejected
        let min = self.min_rating.as_deref().and_then(parse_bound);
        let max = self.max_rating.as_deref().and_then(parse_bound);
        if min.is_some() || max.is_some() {
            filter = filter.with(Clause::Range {
                field: "rating",
                min,
                max,
            });
        }

        filter
    }
}

/// Filter parameters accepted by `GET /users`
#[derive(Debug, Default, Clone)]
pub struct UserQuery {
    pub email: Option<String>,
}

impl UserQuery {
    pub fn from_params<F>(param: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            email: non_empty(param("email")),
        }
    }

    pub fn into_filter(self) -> Filter {
        match self.email {
            Some(email) => Filter::all().with(Clause::Equals {
                field: "email",
                value: email,
            }),
            None => Filter::all(),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_bound(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|n| n.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn movie_query(params: &[(&str, &str)]) -> Filter {
        let map: HashMap<&str, &str> = params.iter().copied().collect();
        MovieQuery::from_params(|key| map.get(key).map(|v| v.to_string())).into_filter()
    }

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("test document must be an object"),
        }
    }

    #[test]
    fn test_empty_query_matches_everything() {
        let filter = movie_query(&[]);
        assert!(filter.is_empty());
        assert!(filter.matches(&doc(json!({}))));
        assert!(filter.matches(&doc(json!({"title": "Heat"}))));
    }

    #[test]
    fn test_blank_parameters_add_no_clause() {
        let filter = movie_query(&[("email", ""), ("genre", " , "), ("search", "  ")]);
        assert!(filter.is_empty());
    }

    #[test]
    fn test_email_equality() {
        let filter = movie_query(&[("email", "ada@example.com")]);
        assert!(filter.matches(&doc(json!({"email": "ada@example.com"}))));
        assert!(!filter.matches(&doc(json!({"email": "ADA@example.com"}))));
        assert!(!filter.matches(&doc(json!({"title": "Heat"}))));
    }

    #[test]
    fn test_search_is_case_insensitive_literal() {
        let filter = movie_query(&[("search", "DARK")]);
        assert!(filter.matches(&doc(json!({"title": "The Dark Knight"}))));
        assert!(!filter.matches(&doc(json!({"title": "Heat"}))));

        // Pattern characters are taken literally
        let filter = movie_query(&[("search", "a.c")]);
        assert!(!filter.matches(&doc(json!({"title": "abc"}))));
        assert!(filter.matches(&doc(json!({"title": "Sequel a.c."}))));
    }

    #[test]
    fn test_genre_matches_arrays_and_strings() {
        let filter = movie_query(&[("genre", "Drama, sci-fi")]);
        assert_eq!(
            filter.clauses(),
            &[Clause::AnyTag {
                field: "genre",
                tags: vec!["Drama".to_string(), "sci-fi".to_string()]
            }]
        );

        assert!(filter.matches(&doc(json!({"genre": ["Crime", "Drama"]}))));
        assert!(filter.matches(&doc(json!({"genre": ["SCI-FI"]}))));
        assert!(filter.matches(&doc(json!({"genre": "drama"}))));
        assert!(filter.matches(&doc(json!({"genre": "Sci-Fi Thriller"}))));
        assert!(!filter.matches(&doc(json!({"genre": ["Comedy"]}))));
        assert!(!filter.matches(&doc(json!({"genre": "Comedy"}))));
        assert!(!filter.matches(&doc(json!({"title": "No genre"}))));
    }

    #[test]
    fn test_rating_range_is_inclusive() {
        let filter = movie_query(&[("minRating", "7"), ("maxRating", "9")]);
        assert!(filter.matches(&doc(json!({"rating": 7}))));
        assert!(filter.matches(&doc(json!({"rating": 8.4}))));
        assert!(filter.matches(&doc(json!({"rating": 9.0}))));
        assert!(!filter.matches(&doc(json!({"rating": 6.9}))));
        assert!(!filter.matches(&doc(json!({"rating": 9.1}))));
        assert!(!filter.matches(&doc(json!({"rating": "8"}))));
        assert!(!filter.matches(&doc(json!({"title": "Unrated"}))));
    }

    #[test]
    fn test_non_numeric_bound_is_ignored() {
        let filter = movie_query(&[("minRating", "high")]);
        assert!(filter.is_empty());
        assert!(filter.matches(&doc(json!({"rating": 2}))));

        // The valid side still applies
        let filter = movie_query(&[("minRating", "abc"), ("maxRating", "5")]);
        assert_eq!(
            filter.clauses(),
            &[Clause::Range {
                field: "rating",
                min: None,
                max: Some(5.0)
            }]
        );
        assert!(filter.matches(&doc(json!({"rating": 4}))));
        assert!(!filter.matches(&doc(json!({"rating": 6}))));
    }

    #[test]
    fn test_clauses_combine_with_and() {
        let filter = movie_query(&[("email", "ada@example.com"), ("minRating", "8")]);
        assert!(filter.matches(&doc(json!({"email": "ada@example.com", "rating": 8.5}))));
        assert!(!filter.matches(&doc(json!({"email": "ada@example.com", "rating": 7}))));
        assert!(!filter.matches(&doc(json!({"email": "bob@example.com", "rating": 9}))));
    }

    #[test]
    fn test_user_query() {
        let filter = UserQuery::from_params(|key| (key == "email").then(|| "ada@example.com".to_string()))
            .into_filter();
        assert!(filter.matches(&doc(json!({"email": "ada@example.com"}))));
        assert!(!filter.matches(&doc(json!({"email": "bob@example.com"}))));

        assert!(UserQuery::from_params(|_| None).into_filter().is_empty());
    }
}
