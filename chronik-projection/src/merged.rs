use chronik_store::{Event, StoreError, StreamIterator, StreamName};

struct Entry {
    stream: StreamName,
    iterator: StreamIterator,
    head: Option<Event>,
    done: bool,
}

/// N-way merge over per-stream iterators, yielding events in ascending
/// `(created_at, no)` order together with their source stream.
pub struct MergedStreamIterator {
    entries: Vec<Entry>,
}

impl MergedStreamIterator {
    pub fn new(iterators: Vec<(StreamName, StreamIterator)>) -> Self {
        Self {
            entries: iterators
                .into_iter()
                .map(|(stream, iterator)| Entry {
                    stream,
                    iterator,
                    head: None,
                    done: false,
                })
                .collect(),
        }
    }

    pub async fn next(&mut self) -> Result<Option<(StreamName, Event)>, StoreError> {
        for entry in &mut self.entries {
            if entry.head.is_none() && !entry.done {
                match entry.iterator.next().await? {
                    Some(event) => entry.head = Some(event),
                    None => entry.done = true,
                }
            }
        }

        let mut best: Option<usize> = None;

        for (index, entry) in self.entries.iter().enumerate() {
            let Some(head) = &entry.head else { continue };

            let earlier = match best.and_then(|current| self.entries[current].head.as_ref()) {
                None => true,
                Some(other) => {
                    (head.created_at, head.position().unwrap_or(0))
                        < (other.created_at, other.position().unwrap_or(0))
                }
            };

            if earlier {
                best = Some(index);
            }
        }

        Ok(best.map(|index| {
            let entry = &mut self.entries[index];

            (
                entry.stream.clone(),
                entry.head.take().unwrap_or_default(),
            )
        }))
    }
}
