use std::collections::{HashMap, VecDeque};

use crate::storage::page::page::FrameId;

// Advisory hint describing why a frame is being touched. The policy
// currently treats every access type alike.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessType {
    Unknown,
    Lookup,
    Scan,
    Index,
}

pub trait Replacer {
    fn evict(&mut self) -> Option<FrameId>;
    fn record_access(&mut self, frame_id: FrameId, access_type: AccessType);
    fn set_evictable(&mut self, frame_id: FrameId, evictability: bool);
    fn remove(&mut self, frame_id: FrameId);
    fn size(&self) -> usize;
}

pub struct LRUKNode {
    // Oldest retained access first. Never grows past k entries, so the
    // front is the k-th most recent access once the history is full.
    history: VecDeque<usize>,
    is_evictable: bool,
    k: usize,
}

impl LRUKNode {
    fn new(k: usize) -> Self {
        LRUKNode {
            history: VecDeque::with_capacity(k),
            is_evictable: false,
            k,
        }
    }

    fn record(&mut self, timestamp: usize) {
        self.history.push_back(timestamp);
        if self.history.len() > self.k {
            self.history.pop_front();
        }
    }

    // Timestamp of the k-th most recent access, if the frame has k of them.
    fn kth_recent(&self) -> Option<usize> {
        if self.history.len() < self.k {
            return None;
        }
        self.history.front().copied()
    }

    fn least_recent(&self) -> usize {
        self.history.front().copied().unwrap_or(0)
    }

    // Reports whether the flag actually changed.
    fn set_evictable(&mut self, evictability: bool) -> bool {
        if self.is_evictable != evictability {
            self.is_evictable = evictability;
            return true;
        }
        false
    }
}

// LRU-K eviction policy: the victim is the evictable frame with the largest
// backward k-distance. Frames with fewer than k recorded accesses count as
// infinitely distant and are preferred; ties among those fall to the oldest
// overall access.
pub struct LRUKReplacer {
    node_store: HashMap<FrameId, LRUKNode>,
    current_timestamp: usize,
    curr_size: usize,
    replacer_size: usize,
    k: usize,
}

impl LRUKReplacer {
    pub fn new(num_frames: usize, k: usize) -> Self {
        assert!(k > 0, "k must be positive");

        LRUKReplacer {
            node_store: HashMap::with_capacity(num_frames),
            current_timestamp: 0,
            curr_size: 0,
            replacer_size: num_frames,
            k,
        }
    }
}

impl Replacer for LRUKReplacer {
    fn evict(&mut self) -> Option<FrameId> {
        // (frame id, has infinite k-distance, ordering key). Among infinite
        // candidates the key is the least-recent timestamp, otherwise the
        // k-th most recent; the smallest key wins within each class.
        let mut victim: Option<(FrameId, bool, usize)> = None;

        for (&frame_id, node) in &self.node_store {
            if !node.is_evictable {
                continue;
            }

            let (is_inf, key) = match node.kth_recent() {
                Some(timestamp) => (false, timestamp),
                None => (true, node.least_recent()),
            };

            let better = match victim {
                None => true,
                Some((_, best_inf, best_key)) => {
                    if is_inf != best_inf {
                        is_inf
                    } else {
                        key < best_key
                    }
                }
            };

            if better {
                victim = Some((frame_id, is_inf, key));
            }
        }

        let (frame_id, _, _) = victim?;
        self.node_store.remove(&frame_id);
        self.curr_size -= 1;

        Some(frame_id)
    }

    fn record_access(&mut self, frame_id: FrameId, _access_type: AccessType) {
        debug_assert!(
            (frame_id as usize) < self.replacer_size,
            "frame id {frame_id} out of range"
        );

        self.current_timestamp += 1;
        let timestamp = self.current_timestamp;

        let k = self.k;
        self.node_store
            .entry(frame_id)
            .or_insert_with(|| LRUKNode::new(k))
            .record(timestamp);
    }

    fn set_evictable(&mut self, frame_id: FrameId, evictability: bool) {
        if let Some(node) = self.node_store.get_mut(&frame_id) {
            if node.set_evictable(evictability) {
                if evictability {
                    self.curr_size += 1;
                } else {
                    self.curr_size -= 1;
                }
            }
        }
    }

    fn remove(&mut self, frame_id: FrameId) {
        if let Some(node) = self.node_store.remove(&frame_id) {
            if node.is_evictable {
                self.curr_size -= 1;
            }
        }
    }

    fn size(&self) -> usize {
        self.curr_size
    }
}
