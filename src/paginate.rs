use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, info};

use crate::domain::{Doi, Row};
use crate::error::SppError;
use crate::spp::PageRequest;

/// Row field used as the pagination cursor.
pub const ID_FIELD: &str = "id";

/// Shared stop flag. Waking is immediate: `stop` notifies every paused fetch.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.escalate();
    }

    /// Raises the signal. Returns `true` when it had already been raised.
    pub fn escalate(&self) -> bool {
        let (lock, cond) = &*self.inner;
        let mut stopped = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let already = *stopped;
        *stopped = true;
        cond.notify_all();
        already
    }

    pub fn is_stopped(&self) -> bool {
        let (lock, _) = &*self.inner;
        *lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleeps for `duration`. Returns `false` if the signal was raised before or during the wait.
    pub fn pause(&self, duration: Duration) -> bool {
        let (lock, cond) = &*self.inner;
        let guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = cond
            .wait_timeout_while(guard, duration, |stopped| !*stopped)
            .unwrap_or_else(PoisonError::into_inner);
        !*guard
    }
}

/// Drives an inclusive `startId` cursor until the upstream returns a short page.
///
/// Pages may arrive in any internal order; each page is sorted by [`ID_FIELD`]
/// and its last row is held back, since the next page starts with it again.
#[derive(Debug, Clone)]
pub struct Paginator {
    page_size: usize,
    delay: Duration,
    stop: StopSignal,
}

impl Paginator {
    pub fn new(page_size: usize, delay: Duration, stop: StopSignal) -> Result<Self, SppError> {
        // A single-row page can never move an inclusive cursor forward.
        if page_size < 2 {
            return Err(SppError::InvalidPageSize(page_size));
        }
        Ok(Self {
            page_size,
            delay,
            stop,
        })
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn stop_signal(&self) -> &StopSignal {
        &self.stop
    }

    pub fn collect<F>(&self, doi: &Doi, mut fetch: F) -> Result<Vec<Row>, SppError>
    where
        F: FnMut(PageRequest) -> Result<Vec<Row>, SppError>,
    {
        let started = Instant::now();
        let mut start_id = 0i64;
        let mut accumulated = Vec::new();
        let mut pages = 0usize;

        loop {
            let fetched = fetch(PageRequest {
                start_id,
                page_size: self.page_size,
            })?;
            pages += 1;
            debug!(%doi, start_id, rows = fetched.len(), "spp.page");
            if fetched.is_empty() {
                return Err(SppError::EmptyPage {
                    doi: doi.to_string(),
                });
            }

            let mut keyed = fetched
                .into_iter()
                .map(|row| row_id(&row).map(|id| (id, row)))
                .collect::<Result<Vec<_>, SppError>>()?;
            keyed.sort_by_key(|(id, _)| *id);

            if keyed.len() < self.page_size {
                accumulated.extend(keyed.into_iter().map(|(_, row)| row));
                break;
            }

            // Full page: the last row comes back first on the next call.
            let Some((last_id, _)) = keyed.pop() else {
                return Err(SppError::EmptyPage {
                    doi: doi.to_string(),
                });
            };
            if last_id <= start_id {
                return Err(SppError::StalledCursor {
                    doi: doi.to_string(),
                    start_id,
                });
            }
            accumulated.extend(keyed.into_iter().map(|(_, row)| row));
            start_id = last_id;

            if !self.stop.pause(self.delay) {
                return Err(SppError::FetchHalted {
                    doi: doi.to_string(),
                });
            }
        }

        info!(
            %doi,
            pages,
            rows = accumulated.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "spp.paginate.done"
        );
        Ok(accumulated)
    }
}

pub fn row_id(row: &Row) -> Result<i64, SppError> {
    let value = row.get(ID_FIELD);
    value
        .and_then(Value::as_i64)
        .or_else(|| {
            value
                .and_then(Value::as_f64)
                .filter(|id| id.fract() == 0.0)
                .map(|id| id as i64)
        })
        .ok_or_else(|| SppError::MalformedRow {
            context: "data point".to_string(),
            message: format!("missing integer `{ID_FIELD}` field"),
        })
}
