//! Bounded, time-and-count-windowed window over the transcript stream.

use std::collections::VecDeque;

use sh_domain::TranscriptChunk;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct RingStats {
    pub finalized: usize,
    pub total: usize,
}

/// FIFO of transcript chunks with two simultaneous caps: `max_items`
/// count and `max_age_ms` relative to the newest timestamp seen (stream
/// time, so replay behaves the same as live ingestion).
///
/// Insertion keeps total order by `seq` even for out-of-order arrivals;
/// interim chunks are stored but excluded from the summary views.
pub struct RingBuffer {
    items: VecDeque<TranscriptChunk>,
    max_items: usize,
    max_age_ms: i64,
    newest_at_ms: i64,
}

impl RingBuffer {
    pub fn new(max_items: usize, max_age_ms: i64) -> Self {
        Self {
            items: VecDeque::with_capacity(max_items.min(64)),
            max_items: max_items.max(1),
            max_age_ms,
            newest_at_ms: i64::MIN,
        }
    }

    /// O(1) amortized append; out-of-order seqs are placed back into
    /// order (rare, so the scan from the tail is cheap in practice).
    pub fn add(&mut self, chunk: TranscriptChunk) {
        self.newest_at_ms = self.newest_at_ms.max(chunk.at_ms);

        if self
            .items
            .back()
            .map(|last| last.seq <= chunk.seq)
            .unwrap_or(true)
        {
            // Replace an interim chunk finalizing under the same seq.
            if self.items.back().map(|last| last.seq == chunk.seq) == Some(true) {
                self.items.pop_back();
            }
            self.items.push_back(chunk);
        } else {
            let pos = self.items.partition_point(|c| c.seq < chunk.seq);
            if self.items.get(pos).map(|c| c.seq == chunk.seq) == Some(true) {
                self.items[pos] = chunk;
            } else {
                self.items.insert(pos, chunk);
            }
        }

        self.evict();
    }

    fn evict(&mut self) {
        while self.items.len() > self.max_items {
            self.items.pop_front();
        }
        let cutoff = self.newest_at_ms.saturating_sub(self.max_age_ms);
        while self
            .items
            .front()
            .map(|c| c.at_ms < cutoff)
            .unwrap_or(false)
        {
            self.items.pop_front();
        }
    }

    /// Most recent `n` finalized chunks, oldest first.
    pub fn get_last_n(&self, n: usize) -> Vec<&TranscriptChunk> {
        let mut out: Vec<&TranscriptChunk> = self
            .items
            .iter()
            .rev()
            .filter(|c| c.is_final)
            .take(n)
            .collect();
        out.reverse();
        out
    }

    /// Concatenated text of the last `n` finalized chunks, truncated
    /// from the left to `max_chars`.
    pub fn get_recent_text(&self, n: usize, max_chars: usize) -> String {
        let text = self
            .get_last_n(n)
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        truncate_left(&text, max_chars)
    }

    /// Last `n` finalized chunks as `[speaker] text` lines under an
    /// overall char cap; oldest lines are dropped first.
    pub fn get_context_bullets(&self, n: usize, max_chars: usize) -> Vec<String> {
        let mut lines: Vec<String> = self
            .get_last_n(n)
            .iter()
            .map(|c| c.bullet())
            .collect();
        let mut total: usize = lines.iter().map(|l| l.chars().count()).sum();
        while total > max_chars && lines.len() > 1 {
            let dropped = lines.remove(0);
            total -= dropped.chars().count();
        }
        lines
    }

    pub fn get_stats(&self) -> RingStats {
        RingStats {
            finalized: self.items.iter().filter(|c| c.is_final).count(),
            total: self.items.len(),
        }
    }
}

fn truncate_left(s: &str, max_chars: usize) -> String {
    let count = s.chars().count();
    if count <= max_chars {
        return s.to_owned();
    }
    s.chars().skip(count - max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(seq: u64, at_ms: i64, text: &str) -> TranscriptChunk {
        TranscriptChunk {
            seq,
            at_ms,
            speaker: None,
            text: text.into(),
            is_final: true,
            transcript_id: None,
        }
    }

    #[test]
    fn last_n_returns_newest_oldest_first() {
        let mut ring = RingBuffer::new(10, 60_000);
        for seq in 1..=5 {
            ring.add(chunk(seq, seq as i64 * 100, &format!("t{seq}")));
        }
        let last = ring.get_last_n(2);
        assert_eq!(last.iter().map(|c| c.seq).collect::<Vec<_>>(), vec![4, 5]);
    }

    #[test]
    fn out_of_order_add_restores_seq_order() {
        let mut ring = RingBuffer::new(10, 60_000);
        ring.add(chunk(1, 100, "a"));
        ring.add(chunk(3, 300, "c"));
        ring.add(chunk(2, 200, "b"));
        let seqs: Vec<u64> = ring.get_last_n(10).iter().map(|c| c.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        // Invariant: last item always carries the largest seen seq.
        assert_eq!(ring.get_last_n(1)[0].seq, 3);
    }

    #[test]
    fn count_cap_evicts_from_head() {
        let mut ring = RingBuffer::new(3, i64::MAX);
        for seq in 1..=5 {
            ring.add(chunk(seq, seq as i64, "x"));
        }
        let seqs: Vec<u64> = ring.get_last_n(10).iter().map(|c| c.seq).collect();
        assert_eq!(seqs, vec![3, 4, 5]);
    }

    #[test]
    fn age_cap_evicts_relative_to_newest() {
        let mut ring = RingBuffer::new(100, 1_000);
        ring.add(chunk(1, 0, "old"));
        ring.add(chunk(2, 500, "mid"));
        ring.add(chunk(3, 1_600, "new"));
        let seqs: Vec<u64> = ring.get_last_n(100).iter().map(|c| c.seq).collect();
        assert_eq!(seqs, vec![3], "entries older than max_age_ms must go");
        assert_eq!(ring.get_stats().total, 1);
    }

    #[test]
    fn interim_chunks_excluded_from_views_but_counted() {
        let mut ring = RingBuffer::new(10, 60_000);
        ring.add(chunk(1, 100, "final"));
        let mut interim = chunk(2, 200, "interim");
        interim.is_final = false;
        ring.add(interim);
        assert_eq!(ring.get_last_n(10).len(), 1);
        assert_eq!(ring.get_stats(), RingStats { finalized: 1, total: 2 });
    }

    #[test]
    fn finalizing_chunk_replaces_interim_with_same_seq() {
        let mut ring = RingBuffer::new(10, 60_000);
        let mut interim = chunk(1, 100, "part");
        interim.is_final = false;
        ring.add(interim);
        ring.add(chunk(1, 150, "partial became whole"));
        assert_eq!(ring.get_stats(), RingStats { finalized: 1, total: 1 });
        assert_eq!(ring.get_last_n(1)[0].text, "partial became whole");
    }

    #[test]
    fn recent_text_truncates_from_the_left() {
        let mut ring = RingBuffer::new(10, 60_000);
        ring.add(chunk(1, 100, "aaaa"));
        ring.add(chunk(2, 200, "bbbb"));
        assert_eq!(ring.get_recent_text(2, 6), "a bbbb");
    }

    #[test]
    fn context_bullets_honor_char_cap() {
        let mut ring = RingBuffer::new(10, 60_000);
        let mut with_speaker = chunk(1, 100, "first line");
        with_speaker.speaker = Some("Ana".into());
        ring.add(with_speaker);
        ring.add(chunk(2, 200, "second line"));
        let bullets = ring.get_context_bullets(5, 12);
        assert_eq!(bullets, vec!["second line".to_owned()]);
    }
}
