// channel.rs — Bounded broadcast FIFO with per-consumer cursors
//
// One producer, N consumers, one physical buffer. Every committed token is
// seen by every consumer; a consumer's `consume` moves only its own cursor.
// Storage behind the slowest cursor is reclaimed.
//
// Positions are absolute token counts since construction:
//
//   base <= min(cursor) <= committed <= written,  written - low <= capacity
//
// where `low` is the slowest cursor (or `committed` with no consumers).
//
// Preconditions: callers respect `room_for_write` and `available`.
// Postconditions: a consumer never observes more tokens than were committed.
// Failure modes: contract violations (writing with no room, committing more
//   than was staged, reading or consuming past `available`) panic.
// Side effects: none beyond the shared buffer.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};

use super::vtime::VirtualTime;

// ── Shared state ────────────────────────────────────────────────────────────

#[derive(Debug)]
struct Fifo<T> {
    capacity: usize,
    tokens: VecDeque<T>,
    stamps: VecDeque<VirtualTime>,
    /// Absolute position of `tokens[0]`.
    base: u64,
    committed: u64,
    written: u64,
    cursors: Vec<u64>,
}

impl<T> Fifo<T> {
    fn low_water(&self) -> u64 {
        self.cursors.iter().copied().min().unwrap_or(self.committed)
    }

    fn room(&self) -> usize {
        self.capacity - (self.written - self.low_water()) as usize
    }

    fn available(&self, consumer: usize) -> usize {
        (self.committed - self.cursors[consumer]) as usize
    }

    fn reclaim(&mut self) {
        let low = self.low_water();
        while self.base < low {
            self.tokens.pop_front();
            self.stamps.pop_front();
            self.base += 1;
        }
    }

    fn offset_of(&self, consumer: usize, offset: usize) -> usize {
        (self.cursors[consumer] - self.base) as usize + offset
    }
}

// ── Construction ────────────────────────────────────────────────────────────

/// Create a channel holding at most `capacity` unconsumed tokens, read by
/// `consumers` independent readers.
pub fn channel<T>(capacity: usize, consumers: usize) -> (Writer<T>, Vec<Reader<T>>) {
    assert!(capacity > 0, "channel capacity must be at least 1");
    let fifo = Arc::new(Mutex::new(Fifo {
        capacity,
        tokens: VecDeque::with_capacity(capacity),
        stamps: VecDeque::with_capacity(capacity),
        base: 0,
        committed: 0,
        written: 0,
        cursors: vec![0; consumers],
    }));
    let readers = (0..consumers)
        .map(|id| Reader {
            fifo: Arc::clone(&fifo),
            id,
        })
        .collect();
    (Writer { fifo }, readers)
}

/// Point-in-time counters, for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelStats {
    pub capacity: usize,
    pub written: u64,
    pub committed: u64,
    /// Slowest consumer position.
    pub low_water: u64,
    /// Tokens still held in storage.
    pub retained: usize,
}

// ── Producer side ───────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct Writer<T> {
    fifo: Arc<Mutex<Fifo<T>>>,
}

impl<T> Writer<T> {
    /// Stage one token stamped with virtual time 0.
    pub fn write(&self, token: T) {
        self.write_at(token, 0);
    }

    /// Stage one token carrying a virtual-time stamp.
    pub fn write_at(&self, token: T, time: VirtualTime) {
        let mut f = self.fifo.lock();
        assert!(
            f.room() > 0,
            "channel write with no room (capacity {})",
            f.capacity
        );
        f.tokens.push_back(token);
        f.stamps.push_back(time);
        f.written += 1;
    }

    /// Make the oldest `n` staged tokens visible to every consumer.
    pub fn write_advance(&self, n: usize) {
        let mut f = self.fifo.lock();
        let staged = (f.written - f.committed) as usize;
        assert!(
            n <= staged,
            "channel commit of {n} tokens with only {staged} staged"
        );
        f.committed += n as u64;
        if f.cursors.is_empty() {
            f.reclaim();
        }
    }

    pub fn room_for_write(&self) -> usize {
        self.fifo.lock().room()
    }

    pub fn staged(&self) -> usize {
        let f = self.fifo.lock();
        (f.written - f.committed) as usize
    }

    pub fn capacity(&self) -> usize {
        self.fifo.lock().capacity
    }

    pub fn stats(&self) -> ChannelStats {
        stats(&self.fifo.lock())
    }
}

// ── Consumer side ───────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct Reader<T> {
    fifo: Arc<Mutex<Fifo<T>>>,
    id: usize,
}

impl<T> Reader<T> {
    pub fn consumer_id(&self) -> usize {
        self.id
    }

    /// Committed tokens this consumer has not yet consumed.
    pub fn available(&self) -> usize {
        self.fifo.lock().available(self.id)
    }

    /// Borrow `count` tokens starting `offset` past this consumer's cursor.
    ///
    /// The guard holds the channel lock; drop it before touching the same
    /// channel again.
    pub fn peek(&self, offset: usize, count: usize) -> MappedMutexGuard<'_, [T]> {
        let f = self.fifo.lock();
        let available = f.available(self.id);
        assert!(
            offset + count <= available,
            "channel peek of {count} tokens at offset {offset} with only {available} available"
        );
        let start = f.offset_of(self.id, offset);
        MutexGuard::map(f, |f| &mut f.tokens.make_contiguous()[start..start + count])
    }

    /// Virtual-time stamp of the token `offset` past this consumer's cursor.
    pub fn stamp(&self, offset: usize) -> VirtualTime {
        let f = self.fifo.lock();
        let available = f.available(self.id);
        assert!(
            offset < available,
            "channel stamp at offset {offset} with only {available} available"
        );
        f.stamps[f.offset_of(self.id, offset)]
    }

    /// Retire `n` tokens for this consumer only.
    pub fn consume(&self, n: usize) {
        let mut f = self.fifo.lock();
        let available = f.available(self.id);
        assert!(
            n <= available,
            "channel consume of {n} tokens with only {available} available"
        );
        f.cursors[self.id] += n as u64;
        f.reclaim();
    }

    pub fn stats(&self) -> ChannelStats {
        stats(&self.fifo.lock())
    }
}

impl<T: Clone> Reader<T> {
    /// Copy out and consume the next `n` tokens.
    pub fn take(&self, n: usize) -> Vec<T> {
        let tokens = self.peek(0, n).to_vec();
        self.consume(n);
        tokens
    }
}

fn stats<T>(f: &Fifo<T>) -> ChannelStats {
    ChannelStats {
        capacity: f.capacity,
        written: f.written,
        committed: f.committed,
        low_water: f.low_water(),
        retained: f.tokens.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staged_tokens_are_invisible_until_committed() {
        let (w, r) = channel::<u32>(4, 1);
        w.write(1);
        w.write(2);
        assert_eq!(r[0].available(), 0);
        assert_eq!(w.room_for_write(), 2);
        w.write_advance(1);
        assert_eq!(r[0].available(), 1);
        assert_eq!(&*r[0].peek(0, 1), &[1]);
        w.write_advance(1);
        assert_eq!(r[0].take(2), vec![1, 2]);
        assert_eq!(w.room_for_write(), 4);
    }

    #[test]
    fn broadcast_to_every_consumer() {
        let (w, r) = channel::<&str>(2, 3);
        w.write("a");
        w.write_advance(1);
        for reader in &r {
            assert_eq!(reader.available(), 1);
            assert_eq!(&*reader.peek(0, 1), &["a"]);
        }
    }

    #[test]
    fn peek_reads_ahead_without_consuming() {
        let (w, r) = channel::<u32>(4, 1);
        for i in 0..3 {
            w.write(i);
        }
        w.write_advance(3);
        assert_eq!(&*r[0].peek(1, 2), &[1, 2]);
        assert_eq!(r[0].available(), 3);
        r[0].consume(1);
        assert_eq!(&*r[0].peek(0, 2), &[1, 2]);
    }

    #[test]
    fn room_follows_slowest_consumer() {
        let (w, r) = channel::<u32>(3, 2);
        for i in 0..3 {
            w.write(i);
        }
        w.write_advance(3);
        assert_eq!(w.room_for_write(), 0);
        r[0].consume(3);
        assert_eq!(w.room_for_write(), 0);
        assert_eq!(w.stats().retained, 3);
        r[1].consume(2);
        assert_eq!(w.room_for_write(), 2);
        assert_eq!(w.stats().retained, 1);
    }

    #[test]
    fn no_consumers_discards_on_commit() {
        let (w, r) = channel::<u32>(1, 0);
        assert!(r.is_empty());
        for i in 0..5 {
            w.write(i);
            w.write_advance(1);
        }
        assert_eq!(w.stats().retained, 0);
        assert_eq!(w.room_for_write(), 1);
    }

    #[test]
    fn stamps_follow_tokens() {
        let (w, r) = channel::<u32>(4, 1);
        w.write_at(10, 7);
        w.write_at(11, 9);
        w.write_advance(2);
        assert_eq!(r[0].stamp(0), 7);
        assert_eq!(r[0].stamp(1), 9);
        r[0].consume(1);
        assert_eq!(r[0].stamp(0), 9);
    }

    #[test]
    #[should_panic(expected = "no room")]
    fn write_past_capacity_panics() {
        let (w, _r) = channel::<u32>(1, 1);
        w.write(1);
        w.write(2);
    }

    #[test]
    #[should_panic(expected = "only 0 available")]
    fn consume_past_available_panics() {
        let (w, r) = channel::<u32>(1, 1);
        w.write(1);
        r[0].consume(1);
    }

    #[test]
    #[should_panic(expected = "staged")]
    fn commit_more_than_staged_panics() {
        let (w, _r) = channel::<u32>(2, 1);
        w.write(1);
        w.write_advance(2);
    }
}
