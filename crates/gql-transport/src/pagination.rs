//! Offset pagination over list queries.

use crate::{GraphQlTransport, ServiceFailure};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Position of the next page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCursor {
    pub offset: u64,
    pub page_size: u32,
}

impl PageCursor {
    /// First page. A zero page size is raised to 1.
    pub fn new(page_size: u32) -> Self {
        Self {
            offset: 0,
            page_size: page_size.max(1),
        }
    }

    pub fn advance(&mut self) {
        self.offset += u64::from(self.page_size);
    }
}

/// Fetch pages until one comes back short or `cancel` fires.
///
/// Cancellation is not an error: the rows gathered so far are returned and
/// no further page is requested.
pub async fn paginate_offset<T, F, Fut>(
    page_size: u32,
    cancel: &CancellationToken,
    mut fetch_page: F,
) -> Result<Vec<T>, ServiceFailure>
where
    F: FnMut(PageCursor) -> Fut,
    Fut: Future<Output = Result<Vec<T>, ServiceFailure>>,
{
    let mut cursor = PageCursor::new(page_size);
    let mut out = Vec::new();

    loop {
        if cancel.is_cancelled() {
            debug!(rows = out.len(), "pagination cancelled");
            break;
        }

        let page = match fetch_page(cursor).await {
            Ok(page) => page,
            Err(failure) if failure.is_cancelled() => {
                debug!(rows = out.len(), "pagination cancelled mid-page");
                break;
            }
            Err(failure) => return Err(failure),
        };

        let received = page.len();
        out.extend(page);
        if received < cursor.page_size as usize {
            break;
        }
        cursor.advance();
    }

    Ok(out)
}

/// A list query and where its rows live in the response `data`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagedQuery {
    /// GraphQL document taking `$limit` and `$offset`.
    pub query: String,
    /// JSON pointer to the row array inside `data`, e.g. `/members`.
    pub list_pointer: String,
}

impl PagedQuery {
    pub fn new(query: impl Into<String>, list_pointer: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            list_pointer: list_pointer.into(),
        }
    }
}

/// Drives [`paginate_offset`] over a transport.
#[derive(Debug, Clone)]
pub struct PagedFetcher {
    transport: Arc<GraphQlTransport>,
}

impl PagedFetcher {
    pub fn new(transport: Arc<GraphQlTransport>) -> Self {
        Self { transport }
    }

    /// Fetch every row of `query`, `page_size` rows per call.
    ///
    /// `limit` and `offset` are merged into `base_variables` for each page.
    pub async fn fetch_all<T: DeserializeOwned>(
        &self,
        query: &PagedQuery,
        base_variables: &Map<String, Value>,
        page_size: u32,
        cancel: &CancellationToken,
    ) -> Result<Vec<T>, ServiceFailure> {
        paginate_offset(page_size, cancel, |cursor| async move {
            let mut variables = base_variables.clone();
            variables.insert("limit".into(), Value::from(cursor.page_size));
            variables.insert("offset".into(), Value::from(cursor.offset));

            let data: Value = self
                .transport
                .execute(&query.query, &variables, cancel)
                .await?;
            rows_at(data, &query.list_pointer)
        })
        .await
    }
}

fn rows_at<T: DeserializeOwned>(mut data: Value, pointer: &str) -> Result<Vec<T>, ServiceFailure> {
    let rows = data
        .pointer_mut(pointer)
        .map(Value::take)
        .ok_or_else(|| ServiceFailure::Decode {
            message: format!("no list at {pointer} in response data"),
            source: None,
        })?;

    serde_json::from_value(rows)
        .map_err(|e| ServiceFailure::decode(format!("rows at {pointer} are not a list"), e))
}
