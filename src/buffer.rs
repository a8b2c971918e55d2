// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::{
    allocator::{BufferAllocator, BufferGroup},
    format::PlaneLayout,
    memory::NativeHandle,
    stream::{StreamBuffer, StreamId},
    Result,
};
use dma_buf::DmaBuf;
use nix::time::{clock_gettime, ClockId};
use std::{
    fmt, io,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

/// Consumer-visible buffer handed out by a
/// [`BufferPool`](crate::pool::BufferPool).
///
/// The buffer holds one reference on its group. Dropping it without
/// releasing it back into the pool returns the group to the allocator
/// free-list once nothing else references it.
pub struct Buffer {
    group: Arc<BufferGroup>,
    allocator: BufferAllocator,
    held: Arc<AtomicUsize>,
    parked: bool,
    tagged: bool,
    sequence: u64,
    device_frame: u32,
    timestamp: Duration,
}

impl Buffer {
    pub(crate) fn new(
        group: Arc<BufferGroup>,
        allocator: BufferAllocator,
        held: Arc<AtomicUsize>,
    ) -> Self {
        allocator.retain(&group);
        held.fetch_add(1, Ordering::AcqRel);
        Self {
            group,
            allocator,
            held,
            parked: false,
            tagged: false,
            sequence: 0,
            device_frame: 0,
            timestamp: Duration::ZERO,
        }
    }

    /// Number of buffers the pool had handed out when this one was acquired,
    /// this one included.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Device frame counter of the pool at acquire time.
    pub fn device_frame(&self) -> u32 {
        self.device_frame
    }

    /// CLOCK_BOOTTIME at acquire time.
    pub fn timestamp(&self) -> Duration {
        self.timestamp
    }

    pub fn slot(&self) -> usize {
        self.group.slot()
    }

    pub fn stream(&self) -> StreamId {
        self.group.stream()
    }

    pub fn handle(&self) -> Option<NativeHandle> {
        self.group.handle()
    }

    pub fn stride(&self) -> Option<u32> {
        self.group.stride()
    }

    pub fn planes(&self) -> Vec<PlaneLayout> {
        self.group.planes()
    }

    /// Marks the buffer so the pool refuses to requeue it.
    pub fn tag(&mut self) {
        self.tagged = true;
    }

    pub fn is_tagged(&self) -> bool {
        self.tagged
    }

    /// Whether this buffer is the only holder of its group.
    pub fn is_writable(&self) -> bool {
        self.group.refs() == 1 && !self.group.is_armed()
    }

    /// dma-buf sharing the buffer memory, when the allocator exports one.
    pub fn dmabuf(&self) -> Result<Option<DmaBuf>> {
        self.group.dmabuf()
    }

    /// Runs `f` over the buffer memory.
    pub fn map<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
        self.group.map(f)
    }

    pub(crate) fn group(&self) -> &Arc<BufferGroup> {
        &self.group
    }

    pub(crate) fn allocator(&self) -> &BufferAllocator {
        &self.allocator
    }

    pub(crate) fn stream_buffer(&self) -> Option<StreamBuffer> {
        self.group.stream_buffer()
    }

    /// Moves the buffer from the consumer into a pool slot.
    pub(crate) fn park(&mut self) {
        if !self.parked {
            self.parked = true;
            self.held.fetch_sub(1, Ordering::AcqRel);
        }
    }

    /// Hands a parked buffer back to the consumer.
    pub(crate) fn unpark(&mut self, sequence: u64, device_frame: u32, timestamp: Duration) {
        if self.parked {
            self.parked = false;
            self.held.fetch_add(1, Ordering::AcqRel);
        }
        self.sequence = sequence;
        self.device_frame = device_frame;
        self.timestamp = timestamp;
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if !self.parked {
            self.held.fetch_sub(1, Ordering::AcqRel);
        }
        self.allocator.release(&self.group);
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("stream", &self.group.stream())
            .field("slot", &self.group.slot())
            .field("handle", &self.group.handle())
            .field("sequence", &self.sequence)
            .field("device_frame", &self.device_frame)
            .field("tagged", &self.tagged)
            .finish()
    }
}

/// Reads CLOCK_BOOTTIME, the clock camera timestamps are reported in.
pub fn boottime() -> Result<Duration> {
    let ts = clock_gettime(ClockId::CLOCK_BOOTTIME).map_err(io::Error::from)?;
    Ok(Duration::new(ts.tv_sec() as u64, ts.tv_nsec() as u32))
}
