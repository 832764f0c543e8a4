//! Bounded output queue.
//!
//! Single producer (the PTY reader thread), many consumers (the relay loop
//! and synchronous request handlers). Each fragment is handed to exactly one
//! consumer. When full, the oldest fragment is dropped to make room.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use tracing::warn;

/// Bounded FIFO of cleaned output fragments
#[derive(Debug)]
pub struct OutputQueue {
    fragments: Mutex<VecDeque<String>>,
    capacity: usize,
}

impl OutputQueue {
    /// Create a new queue holding at most `capacity` fragments
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            fragments: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<String>> {
        // A panicking consumer must not wedge the reader thread
        self.fragments.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append a fragment, dropping the oldest one when at capacity.
    ///
    /// Returns `true` if a fragment was dropped.
    pub fn push(&self, fragment: String) -> bool {
        let mut fragments = self.lock();
        let dropped = if fragments.len() >= self.capacity {
            fragments.pop_front();
            warn!(
                "Output queue at capacity ({}), dropped oldest fragment",
                self.capacity
            );
            true
        } else {
            false
        };
        fragments.push_back(fragment);
        dropped
    }

    /// Remove fragments from the front while the combined text stays within
    /// `max_chars` characters.
    ///
    /// A fragment that would overflow the cap stays queued for the next call.
    /// The exception is a single fragment larger than the cap on its own: it
    /// is split at the cap so the queue always drains.
    pub fn drain_up_to(&self, max_chars: usize) -> String {
        let max_chars = max_chars.max(1);
        let mut fragments = self.lock();
        let mut combined = String::new();
        let mut combined_chars = 0;

        while let Some(fragment) = fragments.pop_front() {
            let fragment_chars = fragment.chars().count();

            if combined_chars + fragment_chars <= max_chars {
                combined.push_str(&fragment);
                combined_chars += fragment_chars;
                if combined_chars == max_chars {
                    break;
                }
                continue;
            }

            if combined.is_empty() {
                let split_at = fragment
                    .char_indices()
                    .nth(max_chars)
                    .map(|(i, _)| i)
                    .unwrap_or(fragment.len());
                combined.push_str(&fragment[..split_at]);
                fragments.push_front(fragment[split_at..].to_string());
            } else {
                fragments.push_front(fragment);
            }
            break;
        }

        combined
    }

    /// Number of queued fragments
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Discard everything queued
    pub fn clear(&self) {
        self.lock().clear();
    }
}
