//! Range layout for one segment
//!
//! An ordered interval list that hands out non-overlapping chunks to
//! concurrent workers. The list is framed by two empty sentinel intervals
//! (`[start, start)` and `[end, end)`); the gap between two consecutive
//! entries is the next unclaimed run of bytes. Claimed intervals are never
//! merged, completed intervals are.

use parget_types::ByteSpan;

#[derive(Debug)]
pub struct RangeLayout {
    span: ByteSpan,
    /// Claimed intervals, sorted by start, with framing sentinels.
    requested: Vec<ByteSpan>,
    /// Fully-written intervals, sorted and coalesced.
    completed: Vec<ByteSpan>,
}

impl RangeLayout {
    pub fn new(span: ByteSpan) -> Self {
        Self {
            requested: vec![
                ByteSpan::new(span.start, span.start),
                ByteSpan::new(span.end, span.end),
            ],
            completed: Vec::new(),
            span,
        }
    }

    pub fn span(&self) -> ByteSpan {
        self.span
    }

    /// Index of the first entry preceded by a non-empty gap, if any.
    fn first_gap(&self) -> Option<usize> {
        (1..self.requested.len()).find(|&i| !self.requested[i - 1].adjoins(&self.requested[i]))
    }

    /// Claim the next unclaimed run, bounded by `max_chunk_size`. Returns
    /// `None` once every byte of the segment has been claimed.
    pub fn request_chunk(&mut self, max_chunk_size: u64) -> Option<ByteSpan> {
        let i = self.first_gap()?;
        let start = self.requested[i - 1].end;
        let end = (start + max_chunk_size).min(self.requested[i].start);
        let chunk = ByteSpan::new(start, end);
        self.requested.insert(i, chunk);
        Some(chunk)
    }

    /// Shorten the claim starting at `start` to end at `new_end`, re-exposing
    /// the unfinished tail as a gap. A claim shrunk to nothing is dropped.
    pub fn update_chunk(&mut self, start: u64, new_end: u64) {
        if let Some(i) = self.requested.iter().position(|c| c.start == start) {
            if new_end == start {
                self.requested.remove(i);
            } else {
                self.requested[i].end = new_end;
            }
        }
    }

    /// Record a fully-written interval, coalescing with adjacent entries.
    pub fn record_completed(&mut self, span: ByteSpan) {
        if span.is_empty() {
            return;
        }
        let mut i = self.completed.partition_point(|c| c.start < span.start);
        self.completed.insert(i, span);
        if i > 0 && self.completed[i - 1].adjoins(&self.completed[i]) {
            self.completed[i - 1].end = self.completed[i].end;
            self.completed.remove(i);
            i -= 1;
        }
        if i + 1 < self.completed.len() && self.completed[i].adjoins(&self.completed[i + 1]) {
            self.completed[i].end = self.completed[i + 1].end;
            self.completed.remove(i + 1);
        }
    }

    /// Mark already-downloaded intervals as both claimed and completed.
    /// Used to seed the layout from resume metadata.
    pub fn seed_completed(&mut self, spans: &[ByteSpan]) {
        for &span in spans {
            if span.is_empty() {
                continue;
            }
            // `<=` keeps the left sentinel (and any empty entry sharing the
            // start offset) ahead of the seeded span.
            let i = self.requested.partition_point(|c| c.start <= span.start);
            self.requested.insert(i, span);
            self.record_completed(span);
        }
    }

    pub fn completed_spans(&self) -> &[ByteSpan] {
        &self.completed
    }

    /// Whether the completed intervals coalesce to exactly the segment span.
    pub fn is_complete(&self) -> bool {
        self.completed.len() == 1 && self.completed[0] == self.span
    }
}

/// Whether `spans`, coalesced, cover exactly `span`.
pub fn spans_cover(spans: &[ByteSpan], span: ByteSpan) -> bool {
    if span.is_empty() {
        return true;
    }
    let mut sorted: Vec<ByteSpan> = spans.iter().copied().filter(|s| !s.is_empty()).collect();
    sorted.sort();
    let mut cursor = span.start;
    for s in sorted {
        if s.start > cursor {
            return false;
        }
        cursor = cursor.max(s.end);
    }
    cursor >= span.end
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claim_all(layout: &mut RangeLayout, max: u64) -> Vec<ByteSpan> {
        let mut chunks = Vec::new();
        while let Some(c) = layout.request_chunk(max) {
            chunks.push(c);
        }
        chunks
    }

    #[test]
    fn claims_are_disjoint_and_cover_the_span() {
        let span = ByteSpan::new(0, 10_000);
        let mut layout = RangeLayout::new(span);
        let chunks = claim_all(&mut layout, 1024);

        for pair in chunks.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
        assert_eq!(chunks.first().unwrap().start, 0);
        assert_eq!(chunks.last().unwrap().end, 10_000);
        assert!(layout.request_chunk(1024).is_none());
    }

    #[test]
    fn chunk_size_is_bounded() {
        let mut layout = RangeLayout::new(ByteSpan::new(100, 400));
        let c = layout.request_chunk(128).unwrap();
        assert_eq!(c, ByteSpan::new(100, 228));
        let c = layout.request_chunk(1024).unwrap();
        assert_eq!(c, ByteSpan::new(228, 400));
    }

    #[test]
    fn aborted_tail_is_reclaimed() {
        let mut layout = RangeLayout::new(ByteSpan::new(0, 1000));
        let first = layout.request_chunk(1000).unwrap();
        assert_eq!(first, ByteSpan::new(0, 1000));
        assert!(layout.request_chunk(1000).is_none());

        // the worker got 400 bytes and died
        layout.update_chunk(first.start, 400);
        let retry = layout.request_chunk(1000).unwrap();
        assert_eq!(retry, ByteSpan::new(400, 1000));
    }

    #[test]
    fn abort_with_no_progress_reexposes_whole_chunk() {
        let mut layout = RangeLayout::new(ByteSpan::new(0, 1000));
        let a = layout.request_chunk(300).unwrap();
        let b = layout.request_chunk(300).unwrap();
        assert_eq!(b, ByteSpan::new(300, 600));

        layout.update_chunk(a.start, a.start);
        let retry = layout.request_chunk(300).unwrap();
        assert_eq!(retry, a);
    }

    #[test]
    fn completed_spans_coalesce() {
        let mut layout = RangeLayout::new(ByteSpan::new(0, 30));
        layout.record_completed(ByteSpan::new(20, 30));
        layout.record_completed(ByteSpan::new(0, 10));
        assert_eq!(layout.completed_spans().len(), 2);
        layout.record_completed(ByteSpan::new(10, 20));
        assert_eq!(layout.completed_spans(), &[ByteSpan::new(0, 30)]);
        assert!(layout.is_complete());
    }

    #[test]
    fn seeding_skips_resumed_intervals() {
        let mut layout = RangeLayout::new(ByteSpan::new(0, 100));
        layout.seed_completed(&[ByteSpan::new(0, 40), ByteSpan::new(60, 100)]);

        let chunks = claim_all(&mut layout, 1024);
        assert_eq!(chunks, vec![ByteSpan::new(40, 60)]);

        layout.record_completed(ByteSpan::new(40, 60));
        assert!(layout.is_complete());
    }

    #[test]
    fn spans_cover_detects_gaps_and_full_cover() {
        let span = ByteSpan::new(0, 100);
        assert!(spans_cover(
            &[ByteSpan::new(50, 100), ByteSpan::new(0, 50)],
            span
        ));
        assert!(!spans_cover(
            &[ByteSpan::new(0, 49), ByteSpan::new(50, 100)],
            span
        ));
        assert!(!spans_cover(&[ByteSpan::new(0, 99)], span));
        assert!(spans_cover(&[], ByteSpan::new(5, 5)));
    }
}
