use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::{RecordSearch, RelatedRecord, SearchError, SortOrder};

const PROVIDER: &str = "openalex";

/// Secondary record-search provider backed by the OpenAlex works API.
pub struct OpenAlexClient {
    http: Client,
    base_url: String,
    mailto: Option<String>,
}

impl OpenAlexClient {
    /// Create a client with a per-request timeout.
    pub fn new(
        base_url: impl Into<String>,
        mailto: Option<String>,
        timeout: Duration,
    ) -> Result<Self, SearchError> {
        let http = Client::builder()
            .user_agent("rusty-review/search")
            .timeout(timeout)
            .build()
            .map_err(|error| SearchError::from_reqwest(PROVIDER, error))?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            mailto,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/works", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Deserialize)]
struct WorksPage {
    #[serde(default)]
    results: Vec<Work>,
}

#[derive(Debug, Deserialize)]
struct Work {
    id: Option<String>,
    title: Option<String>,
    display_name: Option<String>,
    abstract_inverted_index: Option<BTreeMap<String, Vec<usize>>>,
}

/// OpenAlex spells boolean alternatives as `OR`.
fn search_expression(query: &str) -> String {
    query.replace(" | ", " OR ")
}

/// Rebuild an abstract from its word-to-positions index.
fn rebuild_abstract(index: &BTreeMap<String, Vec<usize>>) -> Option<String> {
    let mut positioned: Vec<(usize, &str)> = index
        .iter()
        .flat_map(|(word, positions)| positions.iter().map(move |position| (*position, word.as_str())))
        .collect();
    if positioned.is_empty() {
        return None;
    }
    positioned.sort_unstable_by_key(|(position, _)| *position);
    Some(
        positioned
            .into_iter()
            .map(|(_, word)| word)
            .collect::<Vec<_>>()
            .join(" "),
    )
}

#[async_trait]
impl RecordSearch for OpenAlexClient {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn search(
        &self,
        query: &str,
        order: SortOrder,
        page_size: usize,
    ) -> Result<Vec<RelatedRecord>, SearchError> {
        let expression = search_expression(query);
        let per_page = page_size.to_string();
        let sort = match order {
            SortOrder::Recency => "publication_date:desc",
            SortOrder::Citations => "cited_by_count:desc",
            SortOrder::Relevance => "relevance_score:desc",
        };

        let mut params = vec![
            ("search", expression.as_str()),
            ("sort", sort),
            ("per-page", per_page.as_str()),
        ];
        if let Some(mailto) = &self.mailto {
            params.push(("mailto", mailto.as_str()));
        }

        tracing::debug!(order = order.as_str(), page_size, "Querying OpenAlex");
        let response = self
            .http
            .get(self.endpoint())
            .query(&params)
            .send()
            .await
            .map_err(|error| SearchError::from_reqwest(PROVIDER, error))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SearchError::from_status(PROVIDER, status, &body));
        }

        let page: WorksPage = response.json().await.map_err(|error| {
            SearchError::MalformedResponse(format!("{PROVIDER}: {error}"))
        })?;

        Ok(page
            .results
            .into_iter()
            .filter_map(|work| {
                let title = work
                    .title
                    .or(work.display_name)
                    .filter(|title| !title.trim().is_empty())?;
                let abstract_text = work.abstract_inverted_index.as_ref().and_then(rebuild_abstract);
                Some(RelatedRecord::new(work.id, title, abstract_text))
            })
            .take(page_size)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::GET, MockServer};
    use serde_json::json;

    #[test]
    fn abstract_is_rebuilt_in_position_order() {
        let index = BTreeMap::from([
            ("graphs".to_string(), vec![2]),
            ("We".to_string(), vec![0]),
            ("search".to_string(), vec![1, 3]),
        ]);
        assert_eq!(rebuild_abstract(&index).as_deref(), Some("We search graphs search"));
        assert_eq!(rebuild_abstract(&BTreeMap::new()), None);
    }

    #[tokio::test]
    async fn citation_search_maps_sort_and_alternatives() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/works")
                    .query_param("search", "\"graph search\" OR \"pruning\"")
                    .query_param("sort", "cited_by_count:desc")
                    .query_param("per-page", "5")
                    .query_param("mailto", "ops@example.org");
                then.status(200).json_body(json!({
                    "results": [
                        {
                            "id": "https://openalex.org/W1",
                            "title": "Graph Search Revisited",
                            "abstract_inverted_index": { "Graphs": [0], "again": [1] }
                        },
                        { "id": "https://openalex.org/W2", "display_name": "Pruning Trees" },
                        { "id": "https://openalex.org/W3", "title": null }
                    ]
                }));
            })
            .await;

        let client = OpenAlexClient::new(
            server.base_url(),
            Some("ops@example.org".into()),
            Duration::from_secs(5),
        )
        .expect("client");
        let records = client
            .search("\"graph search\" | \"pruning\"", SortOrder::Citations, 5)
            .await
            .expect("records");

        mock.assert();
        assert_eq!(
            records,
            vec![
                RelatedRecord::new(
                    Some("https://openalex.org/W1".into()),
                    "Graph Search Revisited",
                    Some("Graphs again".into())
                ),
                RelatedRecord::new(Some("https://openalex.org/W2".into()), "Pruning Trees", None),
            ]
        );
    }

    #[tokio::test]
    async fn too_many_requests_is_rate_limited() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/works");
                then.status(429);
            })
            .await;

        let client = OpenAlexClient::new(server.base_url(), None, Duration::from_secs(5))
            .expect("client");
        let error = client
            .search("graphs", SortOrder::Recency, 5)
            .await
            .expect_err("rate limited");

        assert!(matches!(error, SearchError::RateLimited(_)));
    }
}
