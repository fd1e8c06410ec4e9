// SPDX-License-Identifier: MIT

//! Structured citations
//!
//! Agents and tools hand back references either as free text
//! (`"Smith et al. 2020, PMID: 123"`) or as objects. Everything passes
//! through [`Reference::normalize`] before it reaches the blackboard, so
//! the `references` channel only ever holds one shape.

use once_cell::sync::Lazy;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

static PMID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bpmid\s*:?\s*(\d+)").expect("valid PMID regex"));
static DOI_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)\b(10\.\d{4,9}/[^\s"<>]+)"#).expect("valid DOI regex"));
static YEAR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(19|20)\d{2}\b").expect("valid year regex"));

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Reference {
    /// Normalized citation key used for deduplication
    pub key: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl Reference {
    /// Build a reference from a free-text citation
    pub fn from_text(text: &str) -> Option<Self> {
        let text = text.trim();
        let key = citation_key(text)?;
        let year = YEAR_RE
            .find(text)
            .and_then(|m| m.as_str().parse::<u32>().ok());
        Some(Self {
            url: url_for_key(&key),
            key,
            title: text.to_string(),
            authors: Vec::new(),
            year,
        })
    }

    /// Accept a string or an object and produce the canonical shape
    pub fn normalize(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Self::from_text(s),
            Value::Object(obj) => {
                let text_field = |name: &str| {
                    obj.get(name).and_then(|v| match v {
                        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
                        Value::Number(n) => Some(n.to_string()),
                        _ => None,
                    })
                };

                let title = text_field("title")
                    .or_else(|| text_field("citation"))
                    .or_else(|| text_field("text"))
                    .unwrap_or_default();

                let key = text_field("key")
                    .and_then(|k| citation_key(&k))
                    .or_else(|| text_field("pmid").map(|p| format!("pmid:{}", p)))
                    .or_else(|| text_field("doi").and_then(|d| citation_key(&d)))
                    .or_else(|| citation_key(&title))?;

                let authors = match obj.get("authors") {
                    Some(Value::Array(items)) => items
                        .iter()
                        .filter_map(|a| a.as_str())
                        .map(|a| a.trim().to_string())
                        .filter(|a| !a.is_empty())
                        .collect(),
                    Some(Value::String(s)) => s
                        .split(',')
                        .map(|a| a.trim().to_string())
                        .filter(|a| !a.is_empty())
                        .collect(),
                    _ => Vec::new(),
                };

                let year = match obj.get("year") {
                    Some(Value::Number(n)) => n.as_u64().and_then(|y| u32::try_from(y).ok()),
                    Some(Value::String(s)) => YEAR_RE
                        .find(s)
                        .and_then(|m| m.as_str().parse::<u32>().ok()),
                    _ => None,
                };

                let url = text_field("url")
                    .or_else(|| text_field("link"))
                    .or_else(|| url_for_key(&key));

                Some(Self {
                    key,
                    title,
                    authors,
                    year,
                    url,
                })
            }
            _ => None,
        }
    }

    /// One-line rendering for Markdown output
    pub fn display_line(&self) -> String {
        let mut line = String::new();
        if !self.authors.is_empty() {
            line.push_str(&self.authors.join(", "));
            line.push_str(". ");
        }
        line.push_str(if self.title.is_empty() {
            &self.key
        } else {
            &self.title
        });
        if let Some(year) = self.year {
            if !self.title.contains(&year.to_string()) {
                line.push_str(&format!(" ({})", year));
            }
        }
        if let Some(url) = &self.url {
            line.push_str(&format!(" <{}>", url));
        }
        line
    }
}

/// Normalized dedup key: `pmid:N`, `doi:...`, or lowercased words
pub fn citation_key(text: &str) -> Option<String> {
    if let Some(caps) = PMID_RE.captures(text) {
        return Some(format!("pmid:{}", &caps[1]));
    }
    if let Some(caps) = DOI_RE.captures(text) {
        let doi = caps[1].trim_end_matches(['.', ',', ';', ')']);
        return Some(format!("doi:{}", doi.to_lowercase()));
    }
    if let Some(rest) = text.trim().strip_prefix("doi:") {
        return citation_key(rest);
    }

    let words: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect();
    if words.is_empty() {
        None
    } else {
        Some(words.join(" "))
    }
}

fn url_for_key(key: &str) -> Option<String> {
    if let Some(pmid) = key.strip_prefix("pmid:") {
        Some(format!("https://pubmed.ncbi.nlm.nih.gov/{}/", pmid))
    } else {
        key.strip_prefix("doi:")
            .map(|doi| format!("https://doi.org/{}", doi))
    }
}
