//! Web search over the DuckDuckGo Instant Answer API.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::tools::ToolError;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchHit {
    pub title: String,
    pub body: String,
    pub url: String,
}

impl SearchHit {
    pub fn render(&self) -> String {
        format!("{}\n{}\n{}", self.title, self.body, self.url)
    }
}

#[derive(Debug, Clone)]
pub struct WebSearch {
    client: reqwest::Client,
    base_url: String,
}

impl WebSearch {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .user_agent(concat!("kvclaw/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, ToolError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ToolError::InvalidParameters("empty search query".to_string()));
        }

        let url = format!(
            "{}/?q={}&format=json&no_html=1&skip_disambig=1",
            self.base_url,
            urlencoding::encode(query)
        );
        tracing::debug!("Searching: {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ToolError::ExternalService(format!("search request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ToolError::ExternalService(format!("search returned HTTP {}", status)));
        }

        let answer: InstantAnswer = response
            .json()
            .await
            .map_err(|e| ToolError::ExternalService(format!("bad search response: {}", e)))?;

        Ok(answer.into_hits(query, max_results))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InstantAnswer {
    #[serde(default)]
    heading: String,
    #[serde(default)]
    answer: String,
    #[serde(default)]
    abstract_text: String,
    #[serde(rename = "AbstractURL", default)]
    abstract_url: String,
    #[serde(default)]
    definition: String,
    #[serde(rename = "DefinitionURL", default)]
    definition_url: String,
    #[serde(default)]
    related_topics: Vec<RelatedTopic>,
}

/// Either a single topic or a named group of topics.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RelatedTopic {
    Topic {
        #[serde(rename = "Text")]
        text: String,
        #[serde(rename = "FirstURL", default)]
        first_url: String,
    },
    Group {
        #[serde(rename = "Topics")]
        topics: Vec<RelatedTopic>,
    },
}

impl RelatedTopic {
    fn flatten(self, out: &mut Vec<(String, String)>) {
        match self {
            Self::Topic { text, first_url } => out.push((text, first_url)),
            Self::Group { topics } => topics.into_iter().for_each(|t| t.flatten(out)),
        }
    }
}

impl InstantAnswer {
    fn into_hits(self, query: &str, max: usize) -> Vec<SearchHit> {
        let title = if self.heading.is_empty() {
            query.to_string()
        } else {
            self.heading.clone()
        };

        let mut hits = Vec::new();
        if !self.answer.is_empty() {
            hits.push(SearchHit {
                title: title.clone(),
                body: self.answer,
                url: String::new(),
            });
        }
        if !self.abstract_text.is_empty() {
            hits.push(SearchHit {
                title: title.clone(),
                body: self.abstract_text,
                url: self.abstract_url,
            });
        }
        if !self.definition.is_empty() {
            hits.push(SearchHit {
                title: title.clone(),
                body: self.definition,
                url: self.definition_url,
            });
        }

        let mut related = Vec::new();
        self.related_topics
            .into_iter()
            .for_each(|t| t.flatten(&mut related));
        for (text, url) in related {
            // Topic text is "Title - description".
            let (t, body) = match text.split_once(" - ") {
                Some((t, b)) => (t.to_string(), b.to_string()),
                None => (text.clone(), text),
            };
            hits.push(SearchHit { title: t, body, url });
        }

        hits.truncate(max);
        hits
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const FIXTURE: &str = r#"{
        "Heading": "Rust (programming language)",
        "Answer": "",
        "AbstractText": "Rust is a general-purpose programming language.",
        "AbstractURL": "https://en.wikipedia.org/wiki/Rust_(programming_language)",
        "Definition": "",
        "RelatedTopics": [
            {"Text": "Cargo - The Rust package manager", "FirstURL": "https://duckduckgo.com/Cargo"},
            {"Name": "See also", "Topics": [
                {"Text": "Ferris the crab", "FirstURL": "https://duckduckgo.com/Ferris"}
            ]}
        ]
    }"#;

    #[test]
    fn test_parse_instant_answer() {
        let answer: InstantAnswer = serde_json::from_str(FIXTURE).unwrap();
        let hits = answer.into_hits("rust", 6);

        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].title, "Rust (programming language)");
        assert_eq!(hits[1].title, "Cargo");
        assert_eq!(hits[1].body, "The Rust package manager");
        assert_eq!(hits[2].body, "Ferris the crab");
    }

    #[test]
    fn test_hits_truncated() {
        let answer: InstantAnswer = serde_json::from_str(FIXTURE).unwrap();
        assert_eq!(answer.into_hits("rust", 1).len(), 1);
    }

    #[test]
    fn test_empty_answer() {
        let answer: InstantAnswer = serde_json::from_str("{}").unwrap();
        assert!(answer.into_hits("nothing", 5).is_empty());
    }

    #[tokio::test]
    async fn test_empty_query_rejected() {
        let search = WebSearch::new("http://127.0.0.1:9");
        let err = search.search("   ", 5).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidParameters(_)));
    }
}
