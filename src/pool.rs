// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Stream buffer pool.
//!
//! Each stream owns one [`BufferPool`]. A buffer released by the consumer is
//! parked in the slot of its group and its device-facing descriptor walks
//! through three queues:
//!
//! ```text
//! release ──► pending ──► (scheduler) ──► inflight ──► (dispatcher) ──► processed ──► acquire
//! ```
//!
//! The pool lock only guards the slot table and state transitions. Pending
//! is a bounded channel the scheduler polls; inflight and processed are
//! short-locked FIFOs so a request can be recorded before the device sees it
//! and a blocked consumer can be woken when streaming stops.

use crate::{
    allocator::BufferAllocator,
    buffer::{boottime, Buffer},
    memory::NativeHandle,
    stream::{StreamBuffer, StreamDescriptor, StreamId},
    Error, Result, MAX_FRAME,
};
use parking_lot::{Condvar, Mutex};
use std::{
    collections::VecDeque,
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use tracing::{debug, error, info, trace, warn};

/// Consumer side of a pool.
pub trait BufferSource: Send + Sync {
    /// Blocks until the device has completed a buffer.
    fn acquire(&self) -> Result<Buffer>;

    /// Gives a buffer back so it can be captured into again.
    fn release(&self, buffer: Buffer) -> Result<()>;
}

/// Lifecycle of a pool.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PoolState {
    Stopped,
    Started,
    Streaming,
    Flushing,
}

/// A pending buffer that has been submitted in request `frame_number`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct InflightEntry {
    pub buffer: StreamBuffer,
    pub frame_number: u32,
}

/// Snapshot of where the pool's buffers currently are.
///
/// `free + pending + inflight + processed + held` equals the allocator
/// count whenever the pool is quiescent.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub count: usize,
    pub free: usize,
    pub pending: usize,
    pub inflight: usize,
    pub processed: usize,
    pub held: usize,
    pub occupancy: usize,
    pub device_frame: u32,
    pub sent: u64,
}

impl PoolStats {
    pub fn total(&self) -> usize {
        self.free + self.pending + self.inflight + self.processed + self.held
    }
}

impl fmt::Display for PoolStats {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "free {} pending {} inflight {} processed {} held {} (occupancy {}, frame {}, sent {})",
            self.free,
            self.pending,
            self.inflight,
            self.processed,
            self.held,
            self.occupancy,
            self.device_frame,
            self.sent
        )
    }
}

struct Queue<T> {
    tx: kanal::Sender<T>,
    rx: kanal::Receiver<T>,
}

impl<T> Queue<T> {
    fn new() -> Self {
        let (tx, rx) = kanal::bounded(MAX_FRAME);
        Self { tx, rx }
    }

    fn push(&self, item: T) {
        // Groups are unique and capacity is MAX_FRAME, so this never waits.
        if let Err(e) = self.tx.send(item) {
            error!("queue closed: {e}");
        }
    }

    fn try_pop(&self) -> Option<T> {
        self.rx.try_recv().ok().flatten()
    }

    fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        self.rx.recv_timeout(timeout).ok()
    }

    fn drain(&self) -> usize {
        let mut n = 0;
        while self.try_pop().is_some() {
            n += 1;
        }
        n
    }

    fn len(&self) -> usize {
        self.rx.len()
    }
}

enum Popped<T> {
    Item(T),
    Cancelled,
    TimedOut,
}

struct Fifo<T> {
    items: Mutex<VecDeque<T>>,
    ready: Condvar,
}

impl<T> Fifo<T> {
    fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(MAX_FRAME)),
            ready: Condvar::new(),
        }
    }

    fn push(&self, item: T) {
        self.items.lock().push_back(item);
        self.ready.notify_one();
    }

    fn try_pop(&self) -> Option<T> {
        self.items.lock().pop_front()
    }

    /// Removes the newest item if `f` accepts it.
    fn pop_back_if(&self, f: impl FnOnce(&T) -> bool) -> Option<T> {
        let mut items = self.items.lock();
        match items.back() {
            Some(item) if f(item) => items.pop_back(),
            _ => None,
        }
    }

    /// Blocks until an item arrives, `cancelled` holds or `deadline` passes.
    ///
    /// `cancelled` is evaluated under the queue lock, so a flag flipped
    /// before [`wake_all`](Self::wake_all) is never missed.
    fn wait_pop(&self, deadline: Option<Instant>, cancelled: impl Fn() -> bool) -> Popped<T> {
        let mut items = self.items.lock();
        loop {
            if cancelled() {
                return Popped::Cancelled;
            }
            if let Some(item) = items.pop_front() {
                return Popped::Item(item);
            }
            match deadline {
                Some(deadline) => {
                    if Instant::now() >= deadline {
                        return Popped::TimedOut;
                    }
                    self.ready.wait_until(&mut items, deadline);
                }
                None => self.ready.wait(&mut items),
            }
        }
    }

    fn wake_all(&self) {
        let _items = self.items.lock();
        self.ready.notify_all();
    }

    fn drain(&self) -> usize {
        let mut items = self.items.lock();
        let n = items.len();
        items.clear();
        n
    }

    fn len(&self) -> usize {
        self.items.lock().len()
    }
}

#[derive(Debug, Default)]
struct Latency {
    min_buffers: usize,
    max_buffers: usize,
    max_latency: usize,
}

/// Buffer pool of one output stream.
pub struct BufferPool {
    stream: StreamDescriptor,
    allocator: BufferAllocator,
    capacity: usize,
    pending: Queue<StreamBuffer>,
    inflight: Fifo<InflightEntry>,
    processed: Fifo<StreamBuffer>,
    slots: Mutex<Vec<Option<Buffer>>>,
    state: Mutex<PoolState>,
    streaming: AtomicBool,
    flushing: AtomicBool,
    empty: AtomicBool,
    occupancy: AtomicUsize,
    held: Arc<AtomicUsize>,
    device_frame: AtomicU32,
    sent: AtomicU64,
    latency: Mutex<Latency>,
}

impl BufferPool {
    /// Creates a stopped pool able to circulate up to `capacity` buffers.
    pub fn new(
        stream: StreamDescriptor,
        allocator: BufferAllocator,
        capacity: usize,
    ) -> Result<Self> {
        if capacity == 0 || capacity > MAX_FRAME {
            return Err(Error::InvalidConfiguration(format!(
                "pool capacity {capacity} outside 1..={MAX_FRAME}"
            )));
        }
        if allocator.format().stream != stream.id {
            return Err(Error::InvalidConfiguration(format!(
                "allocator for {} used by {}",
                allocator.format().stream,
                stream.id
            )));
        }

        Ok(Self {
            stream,
            allocator,
            capacity,
            pending: Queue::new(),
            inflight: Fifo::new(),
            processed: Fifo::new(),
            slots: Mutex::new((0..MAX_FRAME).map(|_| None).collect()),
            state: Mutex::new(PoolState::Stopped),
            streaming: AtomicBool::new(false),
            flushing: AtomicBool::new(false),
            empty: AtomicBool::new(true),
            occupancy: AtomicUsize::new(0),
            held: Arc::new(AtomicUsize::new(0)),
            device_frame: AtomicU32::new(0),
            sent: AtomicU64::new(0),
            latency: Mutex::new(Latency::default()),
        })
    }

    pub fn stream(&self) -> &StreamDescriptor {
        &self.stream
    }

    pub fn id(&self) -> StreamId {
        self.stream.id
    }

    pub fn allocator(&self) -> &BufferAllocator {
        &self.allocator
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn state(&self) -> PoolState {
        *self.state.lock()
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::Acquire)
    }

    pub fn is_flushing(&self) -> bool {
        self.flushing.load(Ordering::Acquire)
    }

    /// True when no buffer is queued in the pool.
    pub fn is_empty(&self) -> bool {
        self.empty.load(Ordering::Acquire)
    }

    /// Buffers queued in the pool: released and not yet acquired again.
    pub fn occupancy(&self) -> usize {
        self.occupancy.load(Ordering::Acquire)
    }

    /// Frames acknowledged by the device.
    pub fn device_frame(&self) -> u32 {
        self.device_frame.load(Ordering::Acquire)
    }

    /// Buffers handed to the consumer.
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Acquire)
    }

    /// Negotiated (min, max) buffers and the resulting latency in buffers.
    pub fn latency(&self) -> (usize, usize, usize) {
        let l = self.latency.lock();
        (l.min_buffers, l.max_buffers, l.max_latency)
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            count: self.allocator.count(),
            free: self.allocator.free_len(),
            pending: self.pending.len(),
            inflight: self.inflight.len(),
            processed: self.processed.len(),
            held: self.held.load(Ordering::Acquire),
            occupancy: self.occupancy(),
            device_frame: self.device_frame(),
            sent: self.sent(),
        }
    }

    /// Starts the allocator with the negotiated buffer count.
    ///
    /// `max_buffers` of zero means "as many as the pool holds"; larger values
    /// are clamped to the pool capacity.
    pub fn start(&self, min_buffers: usize, max_buffers: usize) -> Result<()> {
        let mut state = self.state.lock();
        if *state != PoolState::Stopped {
            return Err(Error::InvalidState("pool already started"));
        }

        let max = if max_buffers == 0 {
            self.capacity
        } else {
            max_buffers.min(self.capacity)
        };
        let mut min = min_buffers;
        if min > max {
            warn!(
                stream = %self.stream.id,
                "minimum buffers {min} above maximum {max}, clamping"
            );
            min = max;
        }

        if self.allocator.is_active() {
            // A stop that found buffers outstanding left the allocator
            // running; finish it now that they may have come back.
            debug!(stream = %self.stream.id, "completing deferred allocator stop");
            self.allocator.stop()?;
        }
        self.allocator.start(max)?;

        if max != min {
            debug!(
                stream = %self.stream.id,
                "uncertain buffer count, minimum is now {max} (was {min})"
            );
        }
        *self.latency.lock() = Latency {
            min_buffers: max,
            max_buffers: max,
            max_latency: max,
        };
        self.occupancy.store(0, Ordering::Release);
        self.empty.store(true, Ordering::Release);
        self.device_frame.store(0, Ordering::Release);
        self.sent.store(0, Ordering::Release);
        *state = PoolState::Started;

        info!(stream = %self.stream.id, count = max, "buffer pool started");
        Ok(())
    }

    /// Stops streaming and hands every buffer back to the allocator.
    ///
    /// Buffers still held by consumers make the allocator report `Busy`;
    /// that is logged and the pool stops anyway.
    pub fn stop(&self) -> Result<()> {
        let parked = {
            let mut state = self.state.lock();
            if *state == PoolState::Stopped {
                return Ok(());
            }
            debug!(stream = %self.stream.id, "stopping buffer pool");
            self.streaming.store(false, Ordering::Release);
            self.flushing.store(false, Ordering::Release);
            self.processed.wake_all();
            self.allocator.flush();
            *state = PoolState::Stopped;
            self.take_slots()
        };

        let n = parked.len();
        drop(parked);
        self.drain_queues();
        for _ in 0..n {
            self.dec_occupancy();
        }

        match self.allocator.stop() {
            Ok(()) => {}
            Err(Error::Busy { outstanding }) => {
                warn!(
                    stream = %self.stream.id,
                    outstanding, "some buffers are still outstanding, stop completes at next start"
                );
            }
            Err(e) => return Err(e),
        }

        self.empty.store(true, Ordering::Release);
        info!(stream = %self.stream.id, "buffer pool stopped");
        Ok(())
    }

    /// Marks the start of a flush. No buffers move until `flush_stop`.
    pub fn flush_start(&self) {
        let mut state = self.state.lock();
        debug!(stream = %self.stream.id, "start flushing");
        self.empty.store(false, Ordering::Release);
        if *state == PoolState::Streaming {
            self.flushing.store(true, Ordering::Release);
            *state = PoolState::Flushing;
        }
    }

    /// Ends a flush by dropping every queued buffer.
    ///
    /// The first call after `start` only switches the pool to streaming.
    pub fn flush_stop(&self) -> Result<()> {
        let parked = {
            let mut state = self.state.lock();
            match *state {
                PoolState::Stopped => return Err(Error::InvalidState("pool is stopped")),
                PoolState::Started => {
                    debug!(stream = %self.stream.id, "starting streaming");
                    self.streaming.store(true, Ordering::Release);
                    *state = PoolState::Streaming;
                    return Ok(());
                }
                PoolState::Streaming | PoolState::Flushing => {}
            }

            debug!(stream = %self.stream.id, "stop flushing");
            self.allocator.flush();
            let parked = self.take_slots();
            self.flushing.store(false, Ordering::Release);
            *state = PoolState::Streaming;
            parked
        };

        let n = parked.len();
        // Dropped outside the pool lock; each drop re-enters the allocator.
        drop(parked);
        self.drain_queues();
        for _ in 0..n {
            self.dec_occupancy();
        }
        debug!(stream = %self.stream.id, dropped = n, "flush complete");
        Ok(())
    }

    /// Hands out a free group as a new buffer, backing it with native
    /// memory on first use.
    pub fn alloc_buffer(&self) -> Result<Buffer> {
        let group = self
            .allocator
            .get_free_group()
            .ok_or(Error::Exhausted)?;
        if !group.is_backed() {
            let slot = group.index();
            self.allocator.allocate_buffer(group.clone(), slot)?;
        }
        trace!(stream = %self.stream.id, slot = group.slot(), "buffer allocated");
        Ok(Buffer::new(group, self.allocator.clone(), self.held.clone()))
    }

    /// Releases every free group into the pending queue.
    ///
    /// Returns the number of buffers primed.
    pub fn prime(&self) -> Result<usize> {
        if !self.is_streaming() {
            return Err(Error::NotStreaming);
        }
        let mut n = 0;
        while self.allocator.free_len() > 0 {
            let buffer = self.alloc_buffer()?;
            self.release(buffer)?;
            n += 1;
        }
        debug!(stream = %self.stream.id, count = n, "pool primed");
        Ok(n)
    }

    /// Blocks until a processed buffer is available.
    ///
    /// Returns [`Error::NotStreaming`] as soon as the pool stops.
    pub fn acquire(&self) -> Result<Buffer> {
        match self.processed.wait_pop(None, || !self.is_streaming()) {
            Popped::Item(sb) => self.hand_out(sb),
            Popped::Cancelled | Popped::TimedOut => Err(Error::NotStreaming),
        }
    }

    /// Like [`acquire`](Self::acquire) but gives up after `timeout`.
    pub fn acquire_timeout(&self, timeout: Duration) -> Result<Option<Buffer>> {
        let deadline = Instant::now() + timeout;
        match self.processed.wait_pop(Some(deadline), || !self.is_streaming()) {
            Popped::Item(sb) => self.hand_out(sb).map(Some),
            Popped::TimedOut => Ok(None),
            Popped::Cancelled => Err(Error::NotStreaming),
        }
    }

    fn hand_out(&self, sb: StreamBuffer) -> Result<Buffer> {
        let Some(mut buffer) = self.take_parked(sb.handle) else {
            error!(stream = %self.stream.id, "no parked buffer for {sb}");
            if let Ok(group) = self.allocator.get_memory_group(sb.handle) {
                self.allocator.disarm(&group);
            }
            return Err(Error::NoBufferAvailable { handle: sb.handle });
        };
        self.dec_occupancy();
        self.allocator.disarm(buffer.group());

        let timestamp = boottime().unwrap_or_else(|e| {
            warn!(stream = %self.stream.id, "no boot time: {e}");
            Duration::ZERO
        });
        let sequence = self.sent.fetch_add(1, Ordering::AcqRel) + 1;
        buffer.unpark(sequence, self.device_frame(), timestamp);
        trace!(stream = %self.stream.id, slot = buffer.slot(), sequence, "buffer acquired");
        Ok(buffer)
    }

    /// Requeues a buffer for capture.
    pub fn release(&self, mut buffer: Buffer) -> Result<()> {
        if !self.is_streaming() {
            return Err(Error::NotStreaming);
        }

        let invalid = if !buffer.allocator().same_as(&self.allocator) {
            Some("buffer does not belong to this pool")
        } else if buffer.is_tagged() {
            Some("buffer is tagged")
        } else if !buffer.is_writable() {
            Some("buffer is shared")
        } else {
            None
        };
        if let Some(reason) = invalid {
            trace!(stream = %self.stream.id, "dropping invalid buffer: {reason}");
            buffer.tag();
            drop(buffer);
            return Err(Error::InvalidBuffer(reason));
        }

        let Some(sb) = buffer.stream_buffer() else {
            return Err(Error::InvalidBuffer("buffer has no memory"));
        };
        let slot = buffer.slot();

        {
            let mut slots = self.slots.lock();
            let Some(entry) = slots.get_mut(slot) else {
                return Err(Error::InvalidBuffer("slot out of range"));
            };
            if entry.is_some() {
                error!(stream = %self.stream.id, slot, "buffer is already queued");
                return Err(Error::AlreadyQueued { slot });
            }
            self.occupancy.fetch_add(1, Ordering::AcqRel);
            self.allocator.prepare_buf(buffer.group());
            buffer.park();
            *entry = Some(buffer);
            self.empty.store(false, Ordering::Release);
        }

        self.pending.push(sb);
        trace!(stream = %self.stream.id, slot, "buffer queued");
        Ok(())
    }

    pub(crate) fn pop_pending_timeout(&self, timeout: Duration) -> Option<StreamBuffer> {
        self.pending.pop_timeout(timeout)
    }

    pub(crate) fn push_pending(&self, buffer: StreamBuffer) {
        self.pending.push(buffer);
    }

    /// Records `buffer` as part of request `frame_number`. Done before the
    /// request reaches the device so a completion always finds its entry.
    pub(crate) fn push_inflight(&self, buffer: StreamBuffer, frame_number: u32) {
        self.inflight.push(InflightEntry {
            buffer,
            frame_number,
        });
    }

    /// Takes back the entry recorded for a request the device refused.
    pub(crate) fn retract_inflight(&self, frame_number: u32) -> Option<StreamBuffer> {
        let entry = self
            .inflight
            .pop_back_if(|e| e.frame_number == frame_number);
        if entry.is_none() {
            error!(
                stream = %self.stream.id,
                frame = frame_number,
                "rejected request missing from inflight queue"
            );
        }
        entry.map(|e| e.buffer)
    }

    pub(crate) fn pop_inflight(&self) -> Option<InflightEntry> {
        self.inflight.try_pop()
    }

    /// Moves a completed buffer to the processed queue.
    pub(crate) fn complete(&self, buffer: StreamBuffer) {
        self.device_frame.fetch_add(1, Ordering::AcqRel);
        self.processed.push(buffer);
    }

    /// Drops a buffer the device returned out of order.
    ///
    /// The buffer leaves circulation: it is not processed and not pending.
    /// Its group goes back to the allocator free-list.
    pub(crate) fn discard(&self, buffer: StreamBuffer) {
        match self.take_parked(buffer.handle) {
            Some(parked) => {
                self.allocator.disarm(parked.group());
                let slot = parked.slot();
                drop(parked);
                self.dec_occupancy();
                debug!(stream = %self.stream.id, slot, "buffer discarded");
            }
            None => {
                warn!(stream = %self.stream.id, "cannot discard {buffer}: not parked");
                if let Ok(group) = self.allocator.get_memory_group(buffer.handle) {
                    self.allocator.disarm(&group);
                }
            }
        }
    }

    /// Removes the parked buffer backed by `handle` from its slot.
    fn take_parked(&self, handle: NativeHandle) -> Option<Buffer> {
        self.slots
            .lock()
            .iter_mut()
            .find(|slot| slot.as_ref().and_then(Buffer::handle) == Some(handle))
            .and_then(Option::take)
    }

    fn take_slots(&self) -> Vec<Buffer> {
        self.slots
            .lock()
            .iter_mut()
            .filter_map(Option::take)
            .collect()
    }

    fn drain_queues(&self) {
        let p = self.pending.drain();
        let i = self.inflight.drain();
        let d = self.processed.drain();
        if p + i + d > 0 {
            trace!(
                stream = %self.stream.id,
                pending = p,
                inflight = i,
                processed = d,
                "queues drained"
            );
        }
    }

    fn dec_occupancy(&self) {
        let prev = self
            .occupancy
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if prev == Ok(1) {
            self.empty.store(true, Ordering::Release);
        }
    }
}

impl BufferSource for BufferPool {
    fn acquire(&self) -> Result<Buffer> {
        BufferPool::acquire(self)
    }

    fn release(&self, buffer: Buffer) -> Result<()> {
        BufferPool::release(self, buffer)
    }
}

impl Drop for BufferPool {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!(stream = %self.stream.id, "failed to stop pool: {e}");
        }
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("stream", &self.stream.id)
            .field("state", &self.state())
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        allocator::AllocatorFormat,
        format::{ConsumerUsage, HalPixelFormat, ProducerUsage},
        memory::{NativeAllocator, NativeBuffer},
    };

    struct Handles(AtomicU64);

    impl NativeAllocator for Handles {
        fn alloc(
            &self,
            width: u32,
            _height: u32,
            _format: HalPixelFormat,
            _producer: ProducerUsage,
            _consumer: ConsumerUsage,
        ) -> Result<NativeBuffer> {
            Ok(NativeBuffer {
                handle: self.0.fetch_add(1, Ordering::SeqCst),
                stride: width,
                size: 0,
                fd: None,
            })
        }

        fn free(&self, _buffer: NativeBuffer) {}
    }

    fn pool() -> BufferPool {
        let stream = StreamDescriptor::new(
            StreamId(0),
            64,
            64,
            HalPixelFormat::Ycbcr420888,
            ConsumerUsage::NONE,
        );
        let allocator = BufferAllocator::new(
            Arc::new(Handles(AtomicU64::new(0x100))),
            AllocatorFormat {
                stream: StreamId(0),
                width: 64,
                height: 64,
                pixel_format: HalPixelFormat::Ycbcr420888,
                producer: ProducerUsage::CAMERA,
                consumer: ConsumerUsage::NONE,
            },
        );
        let pool = BufferPool::new(stream, allocator, 2).unwrap();
        pool.start(2, 2).unwrap();
        pool.flush_stop().unwrap();
        pool
    }

    #[test]
    fn hand_out_finds_parked_buffer_by_handle() {
        let pool = pool();
        let buffer = pool.alloc_buffer().unwrap();
        let handle = buffer.handle().unwrap();
        pool.release(buffer).unwrap();

        let sb = pool.pop_pending_timeout(Duration::from_millis(100)).unwrap();
        pool.push_inflight(sb, 0);
        let entry = pool.pop_inflight().unwrap();
        pool.complete(entry.buffer);

        // The allocator can no longer resolve handles; the parked buffer is
        // still handed out and the pool accounting stays balanced.
        pool.allocator.deactivate();
        let buffer = pool.acquire().unwrap();
        assert_eq!(buffer.handle(), Some(handle));
        assert_eq!(pool.occupancy(), 0);
        assert!(pool.is_empty());
    }

    #[test]
    fn hand_out_of_unknown_handle_keeps_accounting() {
        let pool = pool();
        pool.release(pool.alloc_buffer().unwrap()).unwrap();
        assert_eq!(pool.occupancy(), 1);

        pool.complete(StreamBuffer {
            stream: StreamId(0),
            handle: 0xdead,
        });
        assert!(matches!(
            pool.acquire(),
            Err(Error::NoBufferAvailable { handle: 0xdead })
        ));
        assert_eq!(pool.occupancy(), 1);
        assert_eq!(pool.stats().processed, 0);
    }

    #[test]
    fn retract_takes_back_only_matching_request() {
        let pool = pool();
        let sb = StreamBuffer {
            stream: StreamId(0),
            handle: 0x100,
        };
        pool.push_inflight(sb, 3);
        assert_eq!(pool.retract_inflight(4), None);
        assert_eq!(pool.retract_inflight(3), Some(sb));
        assert_eq!(pool.stats().inflight, 0);
    }
}
