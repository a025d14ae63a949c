//! Volatile store used by `--dry-run` and by tests.
//!
//! Writes for a batch are staged and only applied once the whole batch,
//! including the token, has been accepted, which gives the same
//! all-or-nothing behaviour as the Postgres transaction.

use super::{EventStore, LivestreamStore, PersistOutcome, StoreError, sort_batch};
use async_trait::async_trait;
use chatmate_sdk::objects::{ChatAuthor, ChatEvent, MessagePart, StreamMetadata};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use time::OffsetDateTime;

#[derive(Debug, Clone)]
struct StoredMessage {
    seq: u64,
    video_id: String,
    timestamp: OffsetDateTime,
    author: ChatAuthor,
    parts: BTreeMap<usize, MessagePart>,
}

#[derive(Debug, Default)]
struct MemoryState {
    next_seq: u64,
    messages: HashMap<String, StoredMessage>,
    tokens: HashMap<String, String>,
    metadata: HashMap<String, StreamMetadata>,
    /// Remaining writes before an injected failure.
    fail_after: Option<usize>,
}

#[derive(Debug, Default)]
pub struct MemoryEventStore {
    state: Mutex<MemoryState>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of stored messages across all streams.
    pub fn message_count(&self) -> usize {
        self.state().messages.len()
    }

    /// Number of stored parts of one message.
    pub fn part_count(&self, external_id: &str) -> usize {
        self.state()
            .messages
            .get(external_id)
            .map_or(0, |m| m.parts.len())
    }

    pub fn metadata(&self, video_id: &str) -> Option<StreamMetadata> {
        self.state().metadata.get(video_id).cloned()
    }

    /// Make the write after the next `writes` successful ones fail.
    #[cfg(test)]
    pub fn fail_after(&self, writes: usize) {
        self.state().fail_after = Some(writes);
    }

    #[cfg(test)]
    pub fn clear_failure(&self) {
        self.state().fail_after = None;
    }
}

fn record_write(fail_after: &mut Option<usize>) -> Result<(), StoreError> {
    match fail_after {
        Some(0) => Err(StoreError::Backend("injected write failure".to_owned())),
        Some(remaining) => {
            *remaining -= 1;
            Ok(())
        }
        None => Ok(()),
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn persist(
        &self,
        video_id: &str,
        token: &str,
        mut events: Vec<ChatEvent>,
    ) -> Result<PersistOutcome, StoreError> {
        sort_batch(&mut events);
        let mut state = self.state();
        let MemoryState {
            next_seq,
            messages,
            tokens,
            fail_after,
            ..
        } = &mut *state;

        let mut staged: HashMap<String, StoredMessage> = HashMap::new();
        let mut seq = *next_seq;
        let mut outcome = PersistOutcome::default();

        for event in events {
            let ChatEvent {
                external_id,
                timestamp,
                author,
                parts,
            } = event;

            let known = staged.contains_key(&external_id) || messages.contains_key(&external_id);
            if known {
                outcome.duplicates += 1;
            } else {
                record_write(fail_after)?;
                staged.insert(
                    external_id.clone(),
                    StoredMessage {
                        seq,
                        video_id: video_id.to_owned(),
                        timestamp,
                        author,
                        parts: BTreeMap::new(),
                    },
                );
                seq += 1;
                outcome.inserted += 1;
            }

            for (index, part) in parts.into_iter().enumerate() {
                let present = match staged.get(&external_id) {
                    Some(m) => m.parts.contains_key(&index),
                    None => messages
                        .get(&external_id)
                        .is_some_and(|m| m.parts.contains_key(&index)),
                };
                if present {
                    continue;
                }
                record_write(fail_after)?;
                if !staged.contains_key(&external_id) {
                    let Some(existing) = messages.get(&external_id) else {
                        continue;
                    };
                    staged.insert(external_id.clone(), existing.clone());
                }
                if let Some(entry) = staged.get_mut(&external_id) {
                    entry.parts.insert(index, part);
                }
            }
        }

        record_write(fail_after)?;

        messages.extend(staged);
        tokens.insert(video_id.to_owned(), token.to_owned());
        *next_seq = seq;
        Ok(outcome)
    }

    async fn load_token(&self, video_id: &str) -> Result<Option<String>, StoreError> {
        Ok(self.state().tokens.get(video_id).cloned())
    }

    async fn query_events_since(
        &self,
        video_id: &str,
        since: OffsetDateTime,
        limit: Option<i64>,
    ) -> Result<Vec<ChatEvent>, StoreError> {
        let state = self.state();
        let mut matching: Vec<(&String, &StoredMessage)> = state
            .messages
            .iter()
            .filter(|(_, m)| m.video_id == video_id && m.timestamp >= since)
            .collect();
        matching.sort_by_key(|(_, m)| (m.timestamp, m.seq));

        let limit = limit.map_or(usize::MAX, |l| usize::try_from(l).unwrap_or(0));
        Ok(matching
            .into_iter()
            .take(limit)
            .map(|(external_id, m)| ChatEvent {
                external_id: external_id.clone(),
                timestamp: m.timestamp,
                author: m.author.clone(),
                parts: m.parts.values().cloned().collect(),
            })
            .collect())
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}

#[async_trait]
impl LivestreamStore for MemoryEventStore {
    async fn record_metadata(
        &self,
        video_id: &str,
        metadata: &StreamMetadata,
    ) -> Result<(), StoreError> {
        self.state()
            .metadata
            .insert(video_id.to_owned(), metadata.clone());
        Ok(())
    }
}
