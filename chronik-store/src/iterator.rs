use std::collections::VecDeque;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::event::{Event, POSITION_KEY};

/// Fetches one page of `(no, event)` rows for a stream, with the same WHERE
/// clause re-bound to a new `from` position and residual limit each call.
#[async_trait]
pub(crate) trait BatchFetcher: Send + Sync {
    async fn fetch(&self, from_number: i64, limit: i64) -> Result<Vec<(i64, Event)>>;

    async fn count(&self) -> Result<i64>;
}

struct EmptyFetcher;

#[async_trait]
impl BatchFetcher for EmptyFetcher {
    async fn fetch(&self, _from_number: i64, _limit: i64) -> Result<Vec<(i64, Event)>> {
        Ok(Vec::new())
    }

    async fn count(&self) -> Result<i64> {
        Ok(0)
    }
}

/// Lazy, restartable, batched iteration over a stream table.
///
/// Rows are pulled in pages of `batch_size`; when a page is exhausted the
/// fetcher is re-invoked from the last seen position ±1. Events are handed
/// out with `_position` injected into their metadata unless already present.
pub struct StreamIterator {
    fetcher: Box<dyn BatchFetcher>,
    batch_size: i64,
    from_number: i64,
    next_from: i64,
    count: Option<i64>,
    forward: bool,
    buffer: VecDeque<(i64, Event)>,
    consumed: i64,
    exhausted: bool,
}

impl std::fmt::Debug for StreamIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamIterator")
            .field("batch_size", &self.batch_size)
            .field("from_number", &self.from_number)
            .field("next_from", &self.next_from)
            .field("count", &self.count)
            .field("forward", &self.forward)
            .field("consumed", &self.consumed)
            .field("exhausted", &self.exhausted)
            .finish()
    }
}

impl StreamIterator {
    pub(crate) fn new(
        fetcher: Box<dyn BatchFetcher>,
        batch_size: i64,
        from_number: i64,
        count: Option<i64>,
        forward: bool,
    ) -> Self {
        Self {
            fetcher,
            batch_size: batch_size.max(1),
            from_number,
            next_from: from_number,
            count,
            forward,
            buffer: VecDeque::new(),
            consumed: 0,
            exhausted: false,
        }
    }

    pub fn empty() -> Self {
        Self::new(Box::new(EmptyFetcher), 1, 0, Some(0), true)
    }

    fn residual(&self) -> i64 {
        match self.count {
            Some(count) => (count - self.consumed).min(self.batch_size),
            None => self.batch_size,
        }
    }

    /// Executes the first fetch so that query errors surface at load time.
    pub(crate) async fn prime(&mut self) -> Result<()> {
        if self.buffer.is_empty() && !self.exhausted {
            self.fill().await?;
        }

        Ok(())
    }

    async fn fill(&mut self) -> Result<()> {
        let limit = self.residual();

        if limit <= 0 {
            self.exhausted = true;
            return Ok(());
        }

        let rows = self.fetcher.fetch(self.next_from, limit).await?;

        if (rows.len() as i64) < limit {
            self.exhausted = true;
        }

        if let Some((no, _)) = rows.last() {
            self.next_from = if self.forward { no + 1 } else { no - 1 };
        }

        self.buffer = rows.into();

        Ok(())
    }

    pub async fn next(&mut self) -> Result<Option<Event>> {
        if self.count.is_some_and(|count| self.consumed >= count) {
            return Ok(None);
        }

        if self.buffer.is_empty() {
            if self.exhausted {
                return Ok(None);
            }

            self.fill().await?;
        }

        let Some((no, mut event)) = self.buffer.pop_front() else {
            return Ok(None);
        };

        self.consumed += 1;

        if !event.metadata.contains_key(POSITION_KEY) {
            event.metadata.insert(POSITION_KEY.to_owned(), Value::from(no));
        }

        Ok(Some(event))
    }

    /// Restarts iteration from the original position.
    pub fn rewind(&mut self) {
        self.buffer.clear();
        self.next_from = self.from_number;
        self.consumed = 0;
        self.exhausted = false;
    }

    /// Total matching rows, capped by the user-supplied count if one is set.
    pub async fn count(&self) -> Result<i64> {
        let db_count = self.fetcher.count().await?;

        Ok(match self.count {
            Some(count) => db_count.min(count),
            None => db_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::{Arc, Mutex};

    struct FakeFetcher {
        rows: Vec<i64>,
        calls: Arc<Mutex<Vec<(i64, i64)>>>,
    }

    #[async_trait]
    impl BatchFetcher for FakeFetcher {
        async fn fetch(&self, from_number: i64, limit: i64) -> Result<Vec<(i64, Event)>> {
            self.calls.lock().unwrap().push((from_number, limit));

            Ok(self
                .rows
                .iter()
                .filter(|no| **no >= from_number)
                .take(limit as usize)
                .map(|no| {
                    (
                        *no,
                        Event {
                            event_name: format!("event-{no}"),
                            created_at: Utc::now(),
                            ..Event::default()
                        },
                    )
                })
                .collect())
        }

        async fn count(&self) -> Result<i64> {
            Ok(self.rows.len() as i64)
        }
    }

    fn iterator(rows: Vec<i64>, batch_size: i64, count: Option<i64>) -> (StreamIterator, Arc<Mutex<Vec<(i64, i64)>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let fetcher = FakeFetcher {
            rows,
            calls: calls.clone(),
        };

        (
            StreamIterator::new(Box::new(fetcher), batch_size, 1, count, true),
            calls,
        )
    }

    #[tokio::test]
    async fn pages_forward_rebinding_from_number() {
        let (mut it, calls) = iterator(vec![1, 2, 3, 4, 5], 2, None);

        let mut seen = Vec::new();
        while let Some(event) = it.next().await.unwrap() {
            seen.push(event.position().unwrap());
        }

        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
        assert_eq!(calls.lock().unwrap().as_slice(), &[(1, 2), (3, 2), (5, 2)]);
    }

    #[tokio::test]
    async fn respects_user_count_cap() {
        let (mut it, _) = iterator(vec![1, 2, 3, 4, 5], 10, Some(3));

        let mut seen = Vec::new();
        while let Some(event) = it.next().await.unwrap() {
            seen.push(event.position().unwrap());
        }

        assert_eq!(seen, vec![1, 2, 3]);
        assert_eq!(it.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn rewind_restarts_from_origin() {
        let (mut it, _) = iterator(vec![1, 2, 3], 2, None);

        assert_eq!(it.next().await.unwrap().unwrap().position(), Some(1));
        it.rewind();

        let mut seen = Vec::new();
        while let Some(event) = it.next().await.unwrap() {
            seen.push(event.position().unwrap());
        }

        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn preexisting_position_metadata_is_preserved() {
        struct PresetFetcher;

        #[async_trait]
        impl BatchFetcher for PresetFetcher {
            async fn fetch(&self, _from: i64, _limit: i64) -> Result<Vec<(i64, Event)>> {
                Ok(vec![(
                    7,
                    Event::new("preset").with_added_metadata(POSITION_KEY, 99),
                )])
            }

            async fn count(&self) -> Result<i64> {
                Ok(1)
            }
        }

        let mut it = StreamIterator::new(Box::new(PresetFetcher), 10, 1, Some(1), true);
        let event = it.next().await.unwrap().unwrap();

        assert_eq!(event.position(), Some(99));
    }

    #[tokio::test]
    async fn empty_iterator_yields_nothing() {
        let mut it = StreamIterator::empty();

        assert!(it.next().await.unwrap().is_none());
        assert_eq!(it.count().await.unwrap(), 0);
    }
}
