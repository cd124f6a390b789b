//! Background channel-feed synchronization.
//!
//! A single task polls every listing's import URLs on a fixed interval and
//! routes new reservations through the ingestion funnel. Failures are
//! contained at the smallest scope: a bad entry skips the entry, a bad link
//! skips the link, a bad listing skips the listing. The worker never has a
//! caller to report to, so nothing propagates.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{StaySyncError, StaySyncResult};
use crate::feed::parse::{derive_span, parse_feed};
use crate::model::{ChannelLink, EventType, Listing};
use crate::store::{CalendarStore, NewEvent};

/// How long `stop` waits for the loop to wind down before abandoning it.
const JOIN_TIMEOUT: Duration = Duration::from_secs(2);

pub struct FetchResponse {
    pub status: u16,
    pub body: String,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Transport abstraction for pulling remote feeds, so the worker is testable
/// without sockets.
#[async_trait]
pub trait FeedFetch: Send + Sync {
    async fn fetch(&self, url: &str) -> StaySyncResult<FetchResponse>;
}

/// Production fetcher: one GET per import URL with a bounded timeout.
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }
}

#[async_trait]
impl FeedFetch for HttpFetcher {
    async fn fetch(&self, url: &str) -> StaySyncResult<FetchResponse> {
        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|err| StaySyncError::FeedFetch(err.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|err| StaySyncError::FeedFetch(err.to_string()))?;
        Ok(FetchResponse { status, body })
    }
}

struct WorkerHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

pub struct FeedWorker {
    store: Arc<dyn CalendarStore>,
    fetcher: Arc<dyn FeedFetch>,
    interval: Duration,
    running: Mutex<Option<WorkerHandle>>,
}

impl FeedWorker {
    pub fn new(
        store: Arc<dyn CalendarStore>,
        fetcher: Arc<dyn FeedFetch>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            fetcher,
            interval,
            running: Mutex::new(None),
        }
    }

    /// Spawn the periodic loop. Starting an already-running worker is a no-op.
    pub fn start(&self) {
        let mut running = self
            .running
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        if let Some(handle) = running.as_ref() {
            if !handle.task.is_finished() {
                return;
            }
        }
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let store = Arc::clone(&self.store);
        let fetcher = Arc::clone(&self.fetcher);
        let interval = self.interval;
        let task = tokio::spawn(async move {
            loop {
                sync_cycle(store.as_ref(), fetcher.as_ref()).await;
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = stop_rx.changed() => break,
                }
            }
            debug!("feed worker stopped");
        });
        *running = Some(WorkerHandle { stop_tx, task });
    }

    /// Signal the loop to stop and join it, bounded by [`JOIN_TIMEOUT`].
    /// An in-flight fetch is waited for, not aborted; past the timeout the
    /// task is abandoned. Stopping a stopped worker is a no-op.
    pub async fn stop(&self) {
        let handle = self
            .running
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .take();
        let Some(WorkerHandle { stop_tx, task }) = handle else {
            return;
        };
        let _ = stop_tx.send(true);
        if tokio::time::timeout(JOIN_TIMEOUT, task).await.is_err() {
            warn!("feed worker did not stop within {:?}, abandoning it", JOIN_TIMEOUT);
        }
    }

    /// One full sweep over every listing and import link, usable without the
    /// periodic loop running.
    pub async fn sync_once(&self) {
        sync_cycle(self.store.as_ref(), self.fetcher.as_ref()).await;
    }
}

async fn sync_cycle(store: &dyn CalendarStore, fetcher: &dyn FeedFetch) {
    let listings = match store.list_listings() {
        Ok(listings) => listings,
        Err(err) => {
            warn!(error = %err, "could not enumerate listings, skipping cycle");
            return;
        }
    };
    let mut imported = 0usize;
    for listing in &listings {
        imported += sync_listing(store, fetcher, listing).await;
    }
    if imported > 0 {
        info!(imported, "feed sync cycle complete");
    } else {
        debug!("feed sync cycle complete, nothing new");
    }
}

async fn sync_listing(
    store: &dyn CalendarStore,
    fetcher: &dyn FeedFetch,
    listing: &Listing,
) -> usize {
    let links = match store.list_channel_links(listing.id) {
        Ok(links) => links,
        Err(err) => {
            warn!(listing = listing.id, error = %err, "could not load channel links");
            return 0;
        }
    };
    let mut imported = 0;
    for link in &links {
        let Some(url) = link.import_url.as_deref().filter(|url| !url.is_empty()) else {
            continue;
        };
        match fetcher.fetch(url).await {
            Ok(response) if response.is_success() => {
                imported += ingest_feed(store, listing, link, &response.body);
            }
            Ok(response) => {
                warn!(url, status = response.status, "feed fetch returned non-success");
            }
            Err(err) => {
                warn!(url, error = %err, "feed fetch failed");
            }
        }
    }
    imported
}

/// Parse one fetched feed body and store its not-yet-seen reservations.
/// Returns how many events were created.
fn ingest_feed(
    store: &dyn CalendarStore,
    listing: &Listing,
    link: &ChannelLink,
    body: &str,
) -> usize {
    let source = link.channel.source();
    let mut imported = 0;
    for entry in parse_feed(body) {
        let (start_utc, end_utc) = match derive_span(&entry) {
            Ok(span) => span,
            Err(err) => {
                debug!(listing = listing.id, error = %err, "skipping feed entry");
                continue;
            }
        };
        // Without a stable external id there is no safe way to dedup
        let Some(uid) = entry.get("UID") else {
            debug!(listing = listing.id, "skipping feed entry without UID");
            continue;
        };
        match store.find_event_by_external_id(listing.id, source, uid) {
            Ok(Some(_)) => continue,
            Ok(None) => {}
            Err(err) => {
                warn!(listing = listing.id, error = %err, "dedup lookup failed");
                continue;
            }
        }
        let new_event = NewEvent {
            kind: EventType::Reservation,
            source,
            start_utc,
            end_utc,
            summary: entry.get("SUMMARY").cloned(),
            guest_name: None,
            external_res_id: Some(uid.clone()),
        };
        match store.create_event(listing.id, new_event) {
            Ok((event, conflicts)) => {
                imported += 1;
                if !conflicts.is_empty() {
                    info!(
                        listing = listing.id,
                        event = event.id,
                        conflicts = conflicts.len(),
                        "imported reservation overlaps existing events"
                    );
                }
            }
            Err(err) => {
                warn!(listing = listing.id, error = %err, "could not store imported reservation");
            }
        }
    }
    imported
}
