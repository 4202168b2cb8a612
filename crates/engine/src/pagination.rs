//! Pagination cursor controller.
//!
//! A [`Paginator`] drives repeated page fetches for one (stream, partition)
//! as a lazy, finite sequence: nothing is requested until
//! [`Paginator::next_page`] is awaited, and the sequence ends on the first of
//!
//! 1. a page with no records,
//! 2. the stream's hard result cap being reached,
//! 3. a response without a next-page token,
//! 4. a tolerated HTTP status (zero pages).

use serde_json::Value;

use tap::{Context, ExtractError, HttpTransport, PageRequest, Payload, ReplicationValue, StreamDefinition};

use crate::cancel::CancelSignal;

/// One page of raw provider objects.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    /// 1-based page number within this sequence.
    pub number: u64,
    /// Raw objects in provider order.
    pub records: Vec<Payload>,
}

/// Lazy page sequence for one (stream, partition).
pub struct Paginator<'a> {
    transport: &'a dyn HttpTransport,
    stream: &'a StreamDefinition,
    cancel: &'a CancelSignal,
    request: PageRequest,
    fetched: u64,
    pages: u64,
    requests: u64,
    tolerated: Option<u16>,
    truncated: bool,
    finished: bool,
}

impl<'a> Paginator<'a> {
    /// Prepares the first request of `stream` under `context`.
    ///
    /// Query parameters are the page size and the stream's static parameters.
    /// The since-bound is added when the stream has a replication key and
    /// `since` is set.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::UnresolvedPlaceholder`] if the path cannot be
    /// bound from `context`.
    pub fn new(
        transport: &'a dyn HttpTransport,
        stream: &'a StreamDefinition,
        context: &Context,
        since: Option<&ReplicationValue>,
        cancel: &'a CancelSignal,
    ) -> Result<Self, ExtractError> {
        let path = stream.path.bind(&stream.name, context)?;

        let mut query = vec![(
            stream.pagination.page_size_param.clone(),
            stream.pagination.page_size.to_string(),
        )];
        query.extend(stream.params.iter().map(|(k, v)| (k.clone(), v.clone())));
        if let (Some(_), Some(since)) = (&stream.replication_key, since) {
            query.push((stream.since_param.clone(), since.to_query_param()));
        }

        Ok(Self {
            transport,
            stream,
            cancel,
            request: PageRequest {
                path,
                query,
                headers: stream.headers.clone(),
                page_token: None,
            },
            fetched: 0,
            pages: 0,
            requests: 0,
            tolerated: None,
            truncated: false,
            finished: false,
        })
    }

    /// The first request of the sequence (for logging and tests).
    pub fn first_request(&self) -> &PageRequest {
        &self.request
    }

    /// Number of requests issued so far.
    pub fn requests(&self) -> u64 {
        self.requests
    }

    /// Status that ended the sequence as "no data", if any.
    pub fn tolerated_status(&self) -> Option<u16> {
        self.tolerated
    }

    /// Whether the hard result cap cut the sequence short.
    pub fn truncated(&self) -> bool {
        self.truncated
    }

    /// Fetches the next page, or `None` once the sequence is exhausted.
    ///
    /// # Errors
    ///
    /// - [`ExtractError::Cancelled`] if cancellation fires before or during
    ///   the request.
    /// - [`ExtractError::Transport`] if the transport gave up.
    /// - [`ExtractError::UnexpectedStatus`] for non-2xx, non-tolerated statuses.
    /// - [`ExtractError::Decode`] for bodies that are not records.
    pub async fn next_page(&mut self) -> Result<Option<Page>, ExtractError> {
        if self.finished {
            return Ok(None);
        }
        self.cancel.check()?;

        self.requests += 1;
        let response = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Err(ExtractError::Cancelled),
            response = self.transport.get(&self.request) => response,
        }
        .map_err(|source| ExtractError::Transport {
            stream: self.stream.name.clone(),
            path: self.request.path.clone(),
            source,
        })?;

        if self.stream.tolerated_http_errors.contains(&response.status) {
            tracing::debug!(
                stream = %self.stream.name,
                path = %self.request.path,
                status = response.status,
                "Tolerated HTTP status, treating as no data"
            );
            self.tolerated = Some(response.status);
            self.finished = true;
            return Ok(None);
        }
        if !response.is_success() {
            return Err(ExtractError::UnexpectedStatus {
                stream: self.stream.name.clone(),
                path: self.request.path.clone(),
                status: response.status,
            });
        }

        let mut records = self.decode(response.body)?;
        if records.is_empty() {
            self.finished = true;
            return Ok(None);
        }

        if let Some(cap) = self.stream.pagination.max_results {
            let remaining = cap.saturating_sub(self.fetched);
            if records.len() as u64 >= remaining {
                let dropped = records.len() as u64 - remaining;
                records.truncate(usize::try_from(remaining).unwrap_or(usize::MAX));
                self.finished = true;
                if dropped > 0 || response.next_page.is_some() {
                    self.truncated = true;
                    tracing::info!(
                        stream = %self.stream.name,
                        cap,
                        "Reached provider result cap, stopping pagination"
                    );
                }
            }
        }

        self.fetched += records.len() as u64;
        self.pages += 1;
        match response.next_page {
            Some(token) if !self.finished => self.request.page_token = Some(token),
            _ => self.finished = true,
        }

        Ok(Some(Page {
            number: self.pages,
            records,
        }))
    }

    fn decode(&self, body: Value) -> Result<Vec<Payload>, ExtractError> {
        let items = match (body, &self.stream.records_path) {
            (Value::Null, _) => return Ok(Vec::new()),
            (Value::Array(items), _) => items,
            (Value::Object(mut obj), Some(path)) => match obj.remove(path) {
                Some(Value::Array(items)) => items,
                Some(Value::Null) | None => Vec::new(),
                Some(other) => {
                    return Err(self.decode_error(format!("'{path}' is not an array: {other}")));
                }
            },
            (Value::Object(obj), None) => return Ok(vec![obj]),
            (other, _) => return Err(self.decode_error(format!("unexpected response body: {other}"))),
        };

        items
            .into_iter()
            .map(|item| match item {
                Value::Object(obj) => Ok(obj),
                other => Err(self.decode_error(format!("record is not an object: {other}"))),
            })
            .collect()
    }

    fn decode_error(&self, message: String) -> ExtractError {
        ExtractError::Decode {
            stream: self.stream.name.clone(),
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;
    use tap::{HttpResponse, PaginationPolicy, ReplicationKind, Timestamp, TransportError};

    use super::*;

    /// Replays canned responses and records every request.
    #[derive(Default)]
    struct Scripted {
        responses: Mutex<VecDeque<HttpResponse>>,
        seen: Mutex<Vec<PageRequest>>,
    }

    impl Scripted {
        fn new(responses: Vec<HttpResponse>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                seen: Mutex::default(),
            }
        }
    }

    #[async_trait]
    impl HttpTransport for Scripted {
        async fn get(&self, request: &PageRequest) -> Result<HttpResponse, TransportError> {
            self.seen.lock().unwrap().push(request.clone());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| TransportError::fatal("script exhausted", None))
        }
    }

    fn ok(body: Value, next: Option<&str>) -> HttpResponse {
        HttpResponse {
            status: 200,
            body,
            next_page: next.map(str::to_owned),
        }
    }

    fn items(n: usize) -> Value {
        Value::Array((0..n).map(|i| json!({"id": i})).collect())
    }

    fn issues() -> StreamDefinition {
        StreamDefinition::new("issues", "/repos/{org}/{repo}/issues")
            .unwrap()
            .with_parent("repositories", true)
            .unwrap()
            .with_replication_key("updated_at", ReplicationKind::DateTime)
            .unwrap()
            .with_param("state", "all")
    }

    fn ctx() -> Context {
        Context::from_keys([("org", "acme"), ("repo", "widget")])
    }

    async fn drain(p: &mut Paginator<'_>) -> Result<Vec<Page>, ExtractError> {
        let mut pages = Vec::new();
        while let Some(page) = p.next_page().await? {
            pages.push(page);
        }
        Ok(pages)
    }

    #[tokio::test]
    async fn first_request_carries_page_size_params_and_since() {
        let transport = Scripted::new(vec![ok(items(0), None)]);
        let def = issues();
        let since = ReplicationValue::Timestamp {
            value: Timestamp::parse_rfc3339("2023-01-05T00:00:00Z").unwrap(),
        };
        let cancel = CancelSignal::never();
        let p = Paginator::new(&transport, &def, &ctx(), Some(&since), &cancel).unwrap();

        let req = p.first_request();
        assert_eq!(req.path, "/repos/acme/widget/issues");
        assert_eq!(req.param("per_page"), Some("100"));
        assert_eq!(req.param("state"), Some("all"));
        assert_eq!(req.param("since"), Some("2023-01-05T00:00:00Z"));
    }

    #[tokio::test]
    async fn since_is_omitted_without_replication_key() {
        let transport = Scripted::new(vec![]);
        let def = StreamDefinition::new("readme", "/repos/{org}/{repo}/readme").unwrap();
        let since = ReplicationValue::Integer { value: 3 };
        let cancel = CancelSignal::never();
        let p = Paginator::new(&transport, &def, &ctx(), Some(&since), &cancel).unwrap();
        assert_eq!(p.first_request().param("since"), None);
    }

    #[tokio::test]
    async fn follows_tokens_until_none() {
        let transport = Scripted::new(vec![ok(items(2), Some("p2")), ok(items(1), None)]);
        let def = issues();
        let cancel = CancelSignal::never();
        let mut p = Paginator::new(&transport, &def, &ctx(), None, &cancel).unwrap();

        let pages = drain(&mut p).await.unwrap();

        assert_eq!(pages.iter().map(|p| p.records.len()).collect::<Vec<_>>(), [2, 1]);
        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen[0].page_token, None);
        assert_eq!(seen[1].page_token.as_deref(), Some("p2"));
    }

    #[tokio::test]
    async fn empty_page_ends_the_sequence_even_with_a_token() {
        let transport = Scripted::new(vec![ok(items(0), Some("p2")), ok(items(5), None)]);
        let def = issues();
        let cancel = CancelSignal::never();
        let mut p = Paginator::new(&transport, &def, &ctx(), None, &cancel).unwrap();

        assert!(drain(&mut p).await.unwrap().is_empty());
        assert_eq!(p.requests(), 1);
    }

    #[tokio::test]
    async fn hard_cap_truncates_the_crossing_page() {
        let transport = Scripted::new(vec![ok(items(3), Some("p2")), ok(items(3), Some("p3"))]);
        let def = issues().with_pagination(PaginationPolicy {
            max_results: Some(5),
            ..PaginationPolicy::default()
        });
        let cancel = CancelSignal::never();
        let mut p = Paginator::new(&transport, &def, &ctx(), None, &cancel).unwrap();

        let pages = drain(&mut p).await.unwrap();

        assert_eq!(pages.iter().map(|p| p.records.len()).collect::<Vec<_>>(), [3, 2]);
        assert!(p.truncated());
        assert_eq!(p.requests(), 2);
    }

    #[tokio::test]
    async fn tolerated_status_yields_zero_pages() {
        let transport = Scripted::new(vec![HttpResponse {
            status: 404,
            body: json!({"message": "Not Found"}),
            next_page: None,
        }]);
        let def = issues().with_tolerated_http_errors([404]);
        let cancel = CancelSignal::never();
        let mut p = Paginator::new(&transport, &def, &ctx(), None, &cancel).unwrap();

        assert!(drain(&mut p).await.unwrap().is_empty());
        assert_eq!(p.tolerated_status(), Some(404));
    }

    #[tokio::test]
    async fn other_error_statuses_are_fatal() {
        let transport = Scripted::new(vec![HttpResponse {
            status: 404,
            body: Value::Null,
            next_page: None,
        }]);
        let def = issues();
        let cancel = CancelSignal::never();
        let mut p = Paginator::new(&transport, &def, &ctx(), None, &cancel).unwrap();

        let err = p.next_page().await.unwrap_err();
        assert!(matches!(err, ExtractError::UnexpectedStatus { status: 404, .. }));
    }

    #[tokio::test]
    async fn object_bodies_unwrap_records_path_or_become_one_record() {
        let search = StreamDefinition::new("repositories", "/search/repositories")
            .unwrap()
            .with_records_path("items");
        let transport = Scripted::new(vec![ok(json!({"total_count": 2, "items": [{"id": 1}, {"id": 2}]}), None)]);
        let cancel = CancelSignal::never();
        let mut p = Paginator::new(&transport, &search, &Context::new(), None, &cancel).unwrap();
        assert_eq!(drain(&mut p).await.unwrap()[0].records.len(), 2);

        let readme = StreamDefinition::new("readme", "/readme").unwrap();
        let transport = Scripted::new(vec![ok(json!({"name": "README.md"}), None)]);
        let mut p = Paginator::new(&transport, &readme, &Context::new(), None, &cancel).unwrap();
        let pages = drain(&mut p).await.unwrap();
        assert_eq!(pages[0].records[0].get("name"), Some(&json!("README.md")));
    }

    #[tokio::test]
    async fn non_object_records_are_decode_errors() {
        let transport = Scripted::new(vec![ok(json!([1, 2]), None)]);
        let def = issues();
        let cancel = CancelSignal::never();
        let mut p = Paginator::new(&transport, &def, &ctx(), None, &cancel).unwrap();
        assert!(matches!(p.next_page().await, Err(ExtractError::Decode { .. })));
    }

    #[tokio::test]
    async fn cancellation_stops_before_the_request() {
        let transport = Scripted::new(vec![ok(items(1), None)]);
        let def = issues();
        let (handle, cancel) = crate::cancel::cancel_pair();
        let mut p = Paginator::new(&transport, &def, &ctx(), None, &cancel).unwrap();
        handle.cancel();

        assert!(matches!(p.next_page().await, Err(ExtractError::Cancelled)));
        assert!(transport.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn unbound_path_fails_construction() {
        let transport = Scripted::new(vec![]);
        let def = issues();
        let cancel = CancelSignal::never();
        let err = Paginator::new(&transport, &def, &Context::new(), None, &cancel).err().unwrap();
        assert!(err.is_contract_violation());
    }
}
