//! Paginated, parallel, and history-based fetch paths.
//!
//! - [`fetch_query`] walks one provider query page by page, guarding against
//!   stalled tokens and runaway pagination.
//! - [`fetch_full`] runs every full-sync query on a bounded pool, with one
//!   client per task, and fuses results by message id.
//! - [`fetch_delta`] walks the history endpoint, accumulating added message
//!   ids and dropping deleted ones, and signals when the cursor is too old.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::mailbox::client::{ClientFactory, GmailClient, RawMessage};
use crate::mailbox::MailboxError;

#[derive(Debug, Clone, Copy)]
pub struct FetchLimits {
    pub page_size: u32,
    pub max_results: usize,
    pub max_pages: u32,
}

/// Fetch all full messages matching one query, paginating until the token is
/// exhausted, repeats (stall), the page guard fires, or enough messages have
/// accumulated.
pub async fn fetch_query(
    client: &GmailClient,
    query: &str,
    limits: FetchLimits,
) -> Result<Vec<RawMessage>, MailboxError> {
    let mut all = Vec::new();
    let mut page_token: Option<String> = None;
    let mut page_num: u32 = 0;
    let page_size = limits.page_size.min(limits.max_results as u32).max(1);

    loop {
        page_num += 1;
        let page = client
            .list_messages(query, page_size, page_token.as_deref())
            .await?;

        log::debug!(
            "query page {}: {} message ids",
            page_num,
            page.messages.len()
        );

        for msg_ref in &page.messages {
            let message = client.get_message(&msg_ref.id).await?;
            all.push(message);
        }

        let next = page.next_page_token;
        if next.is_some() && next == page_token {
            log::warn!("pagination stalled (repeated page token); stopping fetch");
            break;
        }
        page_token = next;

        if page_num >= limits.max_pages {
            log::warn!("pagination hit max page limit ({}); stopping fetch", limits.max_pages);
            break;
        }
        if page_token.is_none() || all.len() >= limits.max_results {
            break;
        }
    }

    Ok(all)
}

/// Run every query in parallel on a bounded pool and fuse results by id.
///
/// The provider client is constructed fresh inside each task from `factory`;
/// parallel queries never share one. A single failing query is logged and the
/// fetch succeeds if any query returned results; total failure raises.
pub async fn fetch_full(
    factory: &ClientFactory,
    queries: &[String],
    limits: FetchLimits,
    workers: usize,
) -> Result<Vec<RawMessage>, MailboxError> {
    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let mut handles = Vec::with_capacity(queries.len());

    log::info!(
        "starting parallel fetch of {} queries with {} workers",
        queries.len(),
        workers
    );

    for (idx, query) in queries.iter().enumerate() {
        let permit_source = semaphore.clone();
        let factory = factory.clone();
        let query = query.clone();
        handles.push(tokio::spawn(async move {
            let _permit = permit_source
                .acquire_owned()
                .await
                .expect("fetch semaphore never closes");
            let client = factory.client();
            let result = fetch_query(&client, &query, limits).await;
            (idx, result)
        }));
    }

    let mut all: Vec<RawMessage> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut first_error: Option<MailboxError> = None;
    let mut any_succeeded = false;

    for handle in handles {
        let (idx, result) = handle
            .await
            .map_err(|e| MailboxError::Config(format!("fetch task panicked: {}", e)))?;
        match result {
            Ok(messages) => {
                any_succeeded = true;
                let mut fresh = 0;
                for message in messages {
                    if seen.insert(message.id.clone()) {
                        all.push(message);
                        fresh += 1;
                    }
                }
                log::info!(
                    "query {}: complete, {} unique messages added (total {})",
                    idx + 1,
                    fresh,
                    all.len()
                );
            }
            Err(err) => {
                log::error!("query {} failed: {}", idx + 1, err);
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
    }

    if !any_succeeded {
        let detail = first_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no queries ran".to_string());
        return Err(MailboxError::AllQueriesFailed(detail));
    }

    log::info!("parallel fetch complete: {} unique messages", all.len());
    Ok(all)
}

/// Result of a history-based delta fetch.
#[derive(Debug)]
pub struct DeltaFetch {
    pub messages: Vec<RawMessage>,
    pub new_cursor: Option<String>,
    /// The provider no longer recognizes the cursor; caller must fall back to
    /// a full sync.
    pub cursor_too_old: bool,
}

/// Incremental fetch via the history endpoint.
pub async fn fetch_delta(
    client: &GmailClient,
    start_cursor: &str,
    page_size: u32,
) -> Result<DeltaFetch, MailboxError> {
    let mut added: Vec<String> = Vec::new();
    let mut added_set: HashSet<String> = HashSet::new();
    let mut removed: HashSet<String> = HashSet::new();
    let mut new_cursor = Some(start_cursor.to_string());
    let mut page_token: Option<String> = None;

    loop {
        let page = match client
            .list_history(start_cursor, page_size, page_token.as_deref())
            .await
        {
            Ok(page) => page,
            Err(MailboxError::Status { status: 404, .. }) => {
                log::info!("history cursor too old; signaling full-sync fallback");
                return Ok(DeltaFetch {
                    messages: Vec::new(),
                    new_cursor: None,
                    cursor_too_old: true,
                });
            }
            Err(err) => return Err(err),
        };

        for record in &page.history {
            for msg in &record.messages_added {
                if added_set.insert(msg.message.id.clone()) {
                    added.push(msg.message.id.clone());
                }
            }
            for msg in &record.messages_deleted {
                removed.insert(msg.message.id.clone());
            }
        }

        if let Some(history_id) = page.history_id {
            new_cursor = Some(history_id);
        }

        page_token = page.next_page_token;
        if page_token.is_none() {
            break;
        }
    }

    let mut messages = Vec::new();
    for id in added {
        if removed.contains(&id) {
            continue;
        }
        match client.get_message(&id).await {
            Ok(message) => messages.push(message),
            Err(err @ MailboxError::AuthRequired(_)) => return Err(err),
            Err(err) => {
                // A message can vanish between the history listing and the
                // get; skip it rather than failing the delta.
                log::warn!("skipping message {} from history: {}", id, err);
            }
        }
    }

    log::info!(
        "delta fetch complete: {} messages, cursor {:?}",
        messages.len(),
        new_cursor
    );

    Ok(DeltaFetch {
        messages,
        new_cursor,
        cursor_too_old: false,
    })
}
