// SPDX-License-Identifier: MIT

//! PubMed literature search over the NCBI E-utilities

use crate::adk::error::ToolError;
use crate::adk::tool::Tool;
use crate::hypogen::state::Reference;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::env;
use url::Url;

const TOOL_NAME: &str = "pubmed_search";
const EUTILS_BASE: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils/";
const MAX_RESULTS: u32 = 20;

// --- Static schema ---

static PUBMED_SEARCH_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "properties": {
            "query": {
                "type": "string",
                "description": "PubMed query, e.g. \"TP53 AND apoptosis\""
            },
            "max_results": {
                "type": "integer",
                "description": "Number of citations to return (default 5, max 20)"
            }
        },
        "required": ["query"]
    })
});

#[derive(Debug, Serialize, Deserialize)]
pub struct PubMedSearchArgs {
    pub query: String,
    #[serde(default)]
    pub max_results: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PubMedSearchResult {
    pub query: String,
    pub references: Vec<Reference>,
}

pub struct PubMedSearchTool {
    client: Client,
    base: Url,
    api_key: Option<String>,
}

impl PubMedSearchTool {
    /// `NCBI_API_KEY` is optional and only raises the rate limit
    pub fn new() -> Result<Self, ToolError> {
        Self::with_base_url(EUTILS_BASE)
    }

    pub fn with_base_url(base: &str) -> Result<Self, ToolError> {
        Ok(Self {
            client: Client::new(),
            base: Url::parse(base)?,
            api_key: env::var("NCBI_API_KEY").ok().filter(|k| !k.is_empty()),
        })
    }

    fn endpoint(&self, name: &str, params: &[(&str, &str)]) -> Result<Url, ToolError> {
        let mut url = self.base.join(name)?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("db", "pubmed").append_pair("retmode", "json");
            for (k, v) in params {
                query.append_pair(k, v);
            }
            if let Some(key) = &self.api_key {
                query.append_pair("api_key", key);
            }
        }
        Ok(url)
    }

    async fn get_json(&self, url: Url) -> Result<Value, ToolError> {
        let resp = self.client.get(url).send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(ToolError::failed(
                TOOL_NAME,
                format!("E-utilities returned {}: {}", status, text),
            ));
        }
        Ok(resp.json().await?)
    }
}

#[async_trait]
impl Tool for PubMedSearchTool {
    fn name(&self) -> &str {
        TOOL_NAME
    }

    fn description(&self) -> &str {
        "Searches PubMed and returns citations with title, authors, year and URL."
    }

    fn schema(&self) -> &Value {
        &PUBMED_SEARCH_SCHEMA
    }

    async fn execute(&self, input: Value) -> Result<Value, ToolError> {
        let args: PubMedSearchArgs =
            serde_json::from_value(input).map_err(|e| ToolError::InvalidInput {
                tool: TOOL_NAME.to_string(),
                message: e.to_string(),
            })?;
        if args.query.trim().is_empty() {
            return Err(ToolError::InvalidInput {
                tool: TOOL_NAME.to_string(),
                message: "query must not be empty".to_string(),
            });
        }
        let retmax = args.max_results.unwrap_or(5).clamp(1, MAX_RESULTS).to_string();

        log::debug!("PubMed search: {}", args.query);
        let search = self
            .get_json(self.endpoint(
                "esearch.fcgi",
                &[("term", args.query.as_str()), ("retmax", retmax.as_str())],
            )?)
            .await?;
        let ids = parse_id_list(&search);

        let references = if ids.is_empty() {
            Vec::new()
        } else {
            let joined = ids.join(",");
            let summary = self
                .get_json(self.endpoint("esummary.fcgi", &[("id", joined.as_str())])?)
                .await?;
            parse_summaries(&summary)
        };
        log::info!(
            "PubMed search '{}' returned {} citations",
            args.query,
            references.len()
        );

        serde_json::to_value(PubMedSearchResult {
            query: args.query,
            references,
        })
        .map_err(|e| ToolError::failed(TOOL_NAME, e.to_string()))
    }
}

/// PMIDs from an esearch reply
fn parse_id_list(body: &Value) -> Vec<String> {
    body.pointer("/esearchresult/idlist")
        .and_then(Value::as_array)
        .map(|ids| {
            ids.iter()
                .filter_map(|id| id.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// Citations from an esummary reply, in the order of `uids`
fn parse_summaries(body: &Value) -> Vec<Reference> {
    let Some(result) = body.get("result") else {
        return Vec::new();
    };
    let uids = result
        .get("uids")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    uids.iter()
        .filter_map(Value::as_str)
        .filter_map(|uid| {
            let doc = result.get(uid)?;
            let authors: Vec<String> = doc
                .get("authors")
                .and_then(Value::as_array)
                .map(|list| {
                    list.iter()
                        .filter_map(|a| a.get("name").and_then(Value::as_str))
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            let year = doc
                .get("pubdate")
                .and_then(Value::as_str)
                .and_then(|d| d.get(..4))
                .and_then(|y| y.parse::<u32>().ok());

            Reference::normalize(&json!({
                "pmid": uid,
                "title": doc.get("title").and_then(Value::as_str).unwrap_or_default(),
                "authors": authors,
                "year": year,
            }))
        })
        .collect()
}
