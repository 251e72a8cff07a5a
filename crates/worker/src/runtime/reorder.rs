//! Seq-order repair for transcript arrival.
//!
//! Chunks ahead of the expected seq are buffered (bounded by count and
//! hold time) and released in order once the gap fills; when the buffer
//! overflows or the hold expires, buffered chunks are released in order
//! anyway and the gap is skipped. Chunks at or below the last processed
//! seq are reported as late — the caller logs and drops them.

use std::collections::BTreeMap;

use sh_domain::TranscriptChunk;

#[derive(Debug, Default)]
pub struct OfferOutcome {
    /// Chunks now ready to process, ascending seq.
    pub released: Vec<TranscriptChunk>,
    /// The offered chunk was older than the last processed seq.
    pub late: bool,
}

pub struct ReorderBuffer {
    window: usize,
    hold_ms: u64,
    /// seq -> (chunk, arrival time in unix ms).
    pending: BTreeMap<u64, (TranscriptChunk, i64)>,
}

impl ReorderBuffer {
    pub fn new(window: usize, hold_ms: u64) -> Self {
        Self {
            window: window.max(1),
            hold_ms,
            pending: BTreeMap::new(),
        }
    }

    /// Offer one chunk. `next_expected` is `transcript_last_seq + 1`.
    pub fn offer(&mut self, chunk: TranscriptChunk, next_expected: u64, now_ms: i64) -> OfferOutcome {
        if chunk.seq < next_expected {
            return OfferOutcome {
                released: Vec::new(),
                late: true,
            };
        }

        if chunk.seq == next_expected {
            let mut released = vec![chunk];
            let mut cursor = next_expected + 1;
            while let Some((c, _)) = self.pending.remove(&cursor) {
                released.push(c);
                cursor += 1;
            }
            return OfferOutcome {
                released,
                late: false,
            };
        }

        // Ahead of the gap: buffer, overwriting a duplicate seq.
        self.pending.insert(chunk.seq, (chunk, now_ms));
        if self.pending.len() > self.window {
            return OfferOutcome {
                released: self.release_all(),
                late: false,
            };
        }
        OfferOutcome::default()
    }

    /// Release everything whose hold expired (all-or-nothing: once the
    /// oldest entry is overdue the gap is considered lost).
    pub fn flush_due(&mut self, now_ms: i64) -> Vec<TranscriptChunk> {
        let overdue = self
            .pending
            .values()
            .next()
            .map(|(_, arrived)| now_ms - arrived >= self.hold_ms as i64)
            .unwrap_or(false);
        if overdue {
            self.release_all()
        } else {
            Vec::new()
        }
    }

    /// Drain the buffer in order (used on close so nothing is stranded).
    pub fn flush_all(&mut self) -> Vec<TranscriptChunk> {
        self.release_all()
    }

    fn release_all(&mut self) -> Vec<TranscriptChunk> {
        let pending = std::mem::take(&mut self.pending);
        pending.into_values().map(|(c, _)| c).collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(seq: u64) -> TranscriptChunk {
        TranscriptChunk {
            seq,
            at_ms: seq as i64,
            speaker: None,
            text: format!("t{seq}"),
            is_final: true,
            transcript_id: None,
        }
    }

    #[test]
    fn in_order_chunks_pass_straight_through() {
        let mut buf = ReorderBuffer::new(32, 250);
        let out = buf.offer(chunk(1), 1, 0);
        assert_eq!(out.released.len(), 1);
        assert!(!out.late);
        assert!(buf.is_empty());
    }

    #[test]
    fn gap_fill_releases_the_run() {
        let mut buf = ReorderBuffer::new(32, 250);
        assert!(buf.offer(chunk(3), 2, 0).released.is_empty());
        assert!(buf.offer(chunk(4), 2, 0).released.is_empty());
        let out = buf.offer(chunk(2), 2, 0);
        let seqs: Vec<u64> = out.released.iter().map(|c| c.seq).collect();
        assert_eq!(seqs, vec![2, 3, 4]);
        assert!(buf.is_empty());
    }

    #[test]
    fn late_chunks_are_flagged() {
        let mut buf = ReorderBuffer::new(32, 250);
        let out = buf.offer(chunk(1), 5, 0);
        assert!(out.late);
        assert!(out.released.is_empty());
    }

    #[test]
    fn window_overflow_forces_release() {
        let mut buf = ReorderBuffer::new(2, 250);
        assert!(buf.offer(chunk(5), 2, 0).released.is_empty());
        assert!(buf.offer(chunk(4), 2, 0).released.is_empty());
        let out = buf.offer(chunk(7), 2, 0);
        let seqs: Vec<u64> = out.released.iter().map(|c| c.seq).collect();
        assert_eq!(seqs, vec![4, 5, 7], "overflow releases in order, gap skipped");
    }

    #[test]
    fn hold_expiry_flushes_in_order() {
        let mut buf = ReorderBuffer::new(32, 250);
        buf.offer(chunk(4), 2, 1_000);
        buf.offer(chunk(3), 2, 1_100);
        assert!(buf.flush_due(1_100).is_empty(), "not overdue yet");
        let out = buf.flush_due(1_260);
        let seqs: Vec<u64> = out.iter().map(|c| c.seq).collect();
        assert_eq!(seqs, vec![3, 4]);
    }
}
