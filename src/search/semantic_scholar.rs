use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::{RecordSearch, RelatedRecord, SearchError, SortOrder};

const PROVIDER: &str = "semantic_scholar";
const FIELDS: &str = "title,abstract,paperId";

/// Primary record-search provider backed by the Semantic Scholar Graph API.
pub struct SemanticScholarClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
}

impl SemanticScholarClient {
    /// Create a client with a per-request timeout.
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
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
            api_key,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[derive(Debug, Deserialize)]
struct SearchPage {
    #[serde(default)]
    data: Vec<PaperHit>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PaperHit {
    paper_id: Option<String>,
    title: Option<String>,
    #[serde(rename = "abstract")]
    abstract_text: Option<String>,
}

#[async_trait]
impl RecordSearch for SemanticScholarClient {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn search(
        &self,
        query: &str,
        order: SortOrder,
        page_size: usize,
    ) -> Result<Vec<RelatedRecord>, SearchError> {
        let limit = page_size.to_string();
        let mut params = vec![("query", query), ("fields", FIELDS)];
        let path = match order {
            SortOrder::Recency => {
                params.push(("sort", "publicationDate:desc"));
                "paper/search/bulk"
            }
            SortOrder::Citations => {
                params.push(("sort", "citationCount:desc"));
                "paper/search/bulk"
            }
            SortOrder::Relevance => {
                params.push(("limit", limit.as_str()));
                "paper/search"
            }
        };

        let mut request = self.http.get(self.endpoint(path)).query(&params);
        if let Some(api_key) = &self.api_key {
            request = request.header("x-api-key", api_key);
        }

        tracing::debug!(order = order.as_str(), page_size, "Querying Semantic Scholar");
        let response = request
            .send()
            .await
            .map_err(|error| SearchError::from_reqwest(PROVIDER, error))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SearchError::from_status(PROVIDER, status, &body));
        }

        let page: SearchPage = response.json().await.map_err(|error| {
            SearchError::MalformedResponse(format!("{PROVIDER}: {error}"))
        })?;

        Ok(page
            .data
            .into_iter()
            .filter_map(|hit| {
                let title = hit.title.filter(|title| !title.trim().is_empty())?;
                Some(RelatedRecord::new(hit.paper_id, title, hit.abstract_text))
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

    fn client(server: &MockServer) -> SemanticScholarClient {
        SemanticScholarClient::new(server.base_url(), Some("key".into()), Duration::from_secs(5))
            .expect("client")
    }

    #[tokio::test]
    async fn recency_uses_bulk_search_sorted_by_date() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/paper/search/bulk")
                    .query_param("query", "graph search")
                    .query_param("sort", "publicationDate:desc")
                    .query_param("fields", "title,abstract,paperId")
                    .header("x-api-key", "key");
                then.status(200).json_body(json!({
                    "total": 3,
                    "data": [
                        { "paperId": "p1", "title": "Newest", "abstract": "Fresh." },
                        { "paperId": "p2", "title": null, "abstract": null },
                        { "paperId": "p3", "title": "Older", "abstract": null },
                        { "paperId": "p4", "title": "Oldest", "abstract": null }
                    ]
                }));
            })
            .await;

        let records = client(&server)
            .search("graph search", SortOrder::Recency, 2)
            .await
            .expect("records");

        mock.assert();
        assert_eq!(
            records,
            vec![
                RelatedRecord::new(Some("p1".into()), "Newest", Some("Fresh.".into())),
                RelatedRecord::new(Some("p3".into()), "Older", None),
            ]
        );
    }

    #[tokio::test]
    async fn relevance_uses_plain_search_with_limit() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/paper/search")
                    .query_param("limit", "5");
                then.status(200).json_body(json!({ "data": [] }));
            })
            .await;

        let records = client(&server)
            .search("graphs", SortOrder::Relevance, 5)
            .await
            .expect("records");

        mock.assert();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn too_many_requests_is_rate_limited() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/paper/search/bulk");
                then.status(429).body("slow down");
            })
            .await;

        let error = client(&server)
            .search("graphs", SortOrder::Citations, 5)
            .await
            .expect_err("rate limited");

        assert!(matches!(error, SearchError::RateLimited(_)));
    }

    #[tokio::test]
    async fn unreadable_payload_is_malformed() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/paper/search");
                then.status(200).body("<html>");
            })
            .await;

        let error = client(&server)
            .search("graphs", SortOrder::Relevance, 5)
            .await
            .expect_err("malformed");

        assert!(matches!(error, SearchError::MalformedResponse(_)));
    }
}
