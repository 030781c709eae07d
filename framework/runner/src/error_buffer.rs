use std::collections::{HashMap, VecDeque};

pub(crate) const ERROR_BUFFER_CAPACITY: usize = 10_000;

/// A distinct error message and how many times it was seen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupedError {
    pub message: String,
    pub count: usize,
}

#[derive(Debug)]
struct BufferedError {
    message: String,
    received_at: u64,
}

/// Holds repeating worker errors for a while so they can be shown once per message.
///
/// Errors arrive roughly in time order, so the oldest are always at the front.
#[derive(Debug)]
pub(crate) struct ErrorBuffer {
    entries: VecDeque<BufferedError>,
    capacity: usize,
    dropped: usize,
}

impl Default for ErrorBuffer {
    fn default() -> Self {
        Self::with_capacity(ERROR_BUFFER_CAPACITY)
    }
}

impl ErrorBuffer {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity,
            dropped: 0,
        }
    }

    pub(crate) fn push(&mut self, message: String, received_at: u64) {
        if self.entries.len() >= self.capacity {
            self.dropped += 1;
            return;
        }

        self.entries.push_back(BufferedError {
            message,
            received_at,
        });
    }

    /// Remove every error that has been held for more than `age_ms` and group them by message,
    /// in order of first appearance.
    pub(crate) fn take_older_than(&mut self, now: u64, age_ms: u64) -> Vec<GroupedError> {
        let mut expired = Vec::new();
        while let Some(front) = self.entries.front() {
            if now.saturating_sub(front.received_at) <= age_ms {
                break;
            }
            if let Some(entry) = self.entries.pop_front() {
                expired.push(entry);
            }
        }

        group(expired)
    }

    pub(crate) fn take_all(&mut self) -> Vec<GroupedError> {
        group(self.entries.drain(..).collect())
    }

    /// How many errors were discarded because the buffer was full, resetting the count.
    pub(crate) fn take_dropped(&mut self) -> usize {
        std::mem::take(&mut self.dropped)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

fn group(entries: Vec<BufferedError>) -> Vec<GroupedError> {
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut grouped: Vec<GroupedError> = Vec::new();

    for entry in entries {
        match positions.get(&entry.message) {
            Some(&position) => grouped[position].count += 1,
            None => {
                positions.insert(entry.message.clone(), grouped.len());
                grouped.push(GroupedError {
                    message: entry.message,
                    count: 1,
                });
            }
        }
    }

    grouped
}
