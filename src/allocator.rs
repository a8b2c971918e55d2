// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Hardware buffer groups and their allocator.
//!
//! A [`BufferGroup`] is one hardware buffer (possibly multi-plane) with a
//! reference count and a stable slot index. The [`BufferAllocator`] owns a
//! bounded table of groups, backs them with native memory on demand and
//! keeps a free-list of groups nobody references.
//!
//! Reference counting works on two kinds of holders:
//!
//! - the consumer-visible buffer object, taken when the group is handed out
//!   by the pool and dropped when that object goes away;
//! - the device-side ("armed") reference, taken by [`BufferAllocator::prepare_buf`]
//!   when the group is queued for capture and dropped when the pool hands the
//!   processed buffer back to the consumer or when the allocator is flushed.
//!
//! A group goes back to the free-list only once the last reference is gone.

use crate::{
    format::{ConsumerUsage, HalFormat, HalPixelFormat, PlaneLayout, ProducerUsage},
    memory::{MappedMemory, NativeAllocator, NativeBuffer, NativeHandle},
    stream::{StreamBuffer, StreamId},
    Error, Result, MAX_FRAME,
};
use dma_buf::DmaBuf;
use parking_lot::{Mutex, RwLock};
use std::{
    os::fd::AsFd,
    sync::{
        atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
};
use tracing::{debug, error, info, trace, warn};

/// Format and usage every buffer of an allocator is created with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AllocatorFormat {
    pub stream: StreamId,
    pub width: u32,
    pub height: u32,
    pub pixel_format: HalPixelFormat,
    pub producer: ProducerUsage,
    pub consumer: ConsumerUsage,
}

#[derive(Debug)]
struct GroupMemory {
    native: NativeBuffer,
    mapping: Option<MappedMemory>,
    layout: HalFormat,
}

/// One hardware-backed buffer and its bookkeeping.
#[derive(Debug)]
pub struct BufferGroup {
    index: usize,
    stream: StreamId,
    slot: AtomicUsize,
    refs: AtomicU32,
    armed: AtomicBool,
    handle: AtomicU64,
    memory: Mutex<Option<GroupMemory>>,
}

const UNBACKED: u64 = 0;

impl BufferGroup {
    fn new(index: usize, stream: StreamId) -> Self {
        Self {
            index,
            stream,
            slot: AtomicUsize::new(index),
            refs: AtomicU32::new(0),
            armed: AtomicBool::new(false),
            handle: AtomicU64::new(UNBACKED),
            memory: Mutex::new(None),
        }
    }

    /// Position of the group in the allocator table.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Pool slot holding this group's consumer buffer.
    pub fn slot(&self) -> usize {
        self.slot.load(Ordering::Acquire)
    }

    pub fn stream(&self) -> StreamId {
        self.stream
    }

    pub fn refs(&self) -> u32 {
        self.refs.load(Ordering::Acquire)
    }

    /// Whether the device-side reference is currently held.
    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }

    pub fn is_backed(&self) -> bool {
        self.handle.load(Ordering::Acquire) != UNBACKED
    }

    pub fn handle(&self) -> Option<NativeHandle> {
        match self.handle.load(Ordering::Acquire) {
            UNBACKED => None,
            h => Some(h),
        }
    }

    /// Descriptor handed to the device when this group is submitted.
    pub fn stream_buffer(&self) -> Option<StreamBuffer> {
        self.handle().map(|handle| StreamBuffer {
            stream: self.stream,
            handle,
        })
    }

    pub fn stride(&self) -> Option<u32> {
        self.memory.lock().as_ref().map(|m| m.native.stride)
    }

    pub fn size(&self) -> Option<usize> {
        self.memory.lock().as_ref().map(|m| m.native.size)
    }

    pub fn planes(&self) -> Vec<PlaneLayout> {
        self.memory
            .lock()
            .as_ref()
            .map(|m| m.layout.planes().to_vec())
            .unwrap_or_default()
    }

    /// Shares the buffer memory as a dma-buf. `None` when unbacked or when
    /// the native allocator exports no fd.
    pub fn dmabuf(&self) -> Result<Option<DmaBuf>> {
        match self.memory.lock().as_ref() {
            Some(memory) => memory.native.dmabuf(),
            None => Ok(None),
        }
    }

    /// Runs `f` over the CPU mapping of the buffer.
    pub fn map<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
        let memory = self.memory.lock();
        match memory.as_ref().and_then(|m| m.mapping.as_ref()) {
            Some(mapping) => Ok(f(mapping.as_slice())),
            None => Err(Error::NotMapped),
        }
    }
}

struct AllocatorInner {
    native: Arc<dyn NativeAllocator>,
    format: AllocatorFormat,
    active: AtomicBool,
    groups: RwLock<Vec<Arc<BufferGroup>>>,
    free_tx: kanal::Sender<Arc<BufferGroup>>,
    free_rx: kanal::Receiver<Arc<BufferGroup>>,
    lock: Mutex<()>,
}

impl Drop for AllocatorInner {
    fn drop(&mut self) {
        for group in self.groups.get_mut().drain(..) {
            if let Some(memory) = group.memory.lock().take() {
                drop(memory.mapping);
                self.native.free(memory.native);
            }
        }
    }
}

/// Allocator of hardware buffer groups.
///
/// Cloning is cheap and every clone refers to the same table and free-list.
/// The allocator is the only place native buffers are released.
#[derive(Clone)]
pub struct BufferAllocator {
    inner: Arc<AllocatorInner>,
}

impl BufferAllocator {
    pub fn new(native: Arc<dyn NativeAllocator>, format: AllocatorFormat) -> Self {
        let (free_tx, free_rx) = kanal::bounded(MAX_FRAME);
        Self {
            inner: Arc::new(AllocatorInner {
                native,
                format,
                active: AtomicBool::new(false),
                groups: RwLock::new(Vec::new()),
                free_tx,
                free_rx,
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn format(&self) -> &AllocatorFormat {
        &self.inner.format
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::Acquire)
    }

    /// Number of groups created by the last `start`.
    pub fn count(&self) -> usize {
        self.inner.groups.read().len()
    }

    /// Number of groups currently on the free-list.
    pub fn free_len(&self) -> usize {
        self.inner.free_rx.len()
    }

    pub(crate) fn same_as(&self, other: &BufferAllocator) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Creates `count` unbacked groups and puts them all on the free-list.
    pub fn start(&self, count: usize) -> Result<()> {
        let _guard = self.inner.lock.lock();

        if self.is_active() {
            error!("allocator already active");
            return Err(Error::AlreadyActive);
        }
        if count == 0 || count > MAX_FRAME {
            return Err(Error::InvalidConfiguration(format!(
                "buffer count {count} outside 1..={MAX_FRAME}"
            )));
        }

        while let Ok(Some(_)) = self.inner.free_rx.try_recv() {}

        let mut groups = self.inner.groups.write();
        groups.clear();
        for i in 0..count {
            let group = Arc::new(BufferGroup::new(i, self.inner.format.stream));
            groups.push(group.clone());
            self.push_free(group);
        }

        self.inner.active.store(true, Ordering::Release);
        debug!(count, stream = %self.inner.format.stream, "allocator started");
        Ok(())
    }

    /// Backs `group` with a native buffer and records it under `slot`.
    ///
    /// On failure the group goes back to the free-list unbacked.
    pub fn allocate_buffer(&self, group: Arc<BufferGroup>, slot: usize) -> Result<()> {
        let format = &self.inner.format;
        let native = match self.inner.native.alloc(
            format.width,
            format.height,
            format.pixel_format,
            format.producer,
            format.consumer,
        ) {
            Ok(n) => n,
            Err(e) => {
                error!(slot, "native allocation failed: {e}");
                self.push_free(group);
                return Err(Error::AllocationFailed {
                    slot,
                    reason: e.to_string(),
                });
            }
        };

        if native.stride == 0 {
            error!(slot, "invalid stride length");
            self.inner.native.free(native);
            self.push_free(group);
            return Err(Error::AllocationFailed {
                slot,
                reason: "allocator returned zero stride".to_string(),
            });
        }

        let mapping = match native
            .fd
            .as_ref()
            .map(|fd| MappedMemory::new(fd.as_fd(), native.size))
            .transpose()
        {
            Ok(m) => m,
            Err(e) => {
                error!(slot, "failed to mmap buffer: {e}");
                self.inner.native.free(native);
                self.push_free(group);
                return Err(Error::AllocationFailed {
                    slot,
                    reason: e.to_string(),
                });
            }
        };

        let layout = match HalFormat::with_stride(
            format.width,
            format.height,
            format.pixel_format,
            native.stride,
        ) {
            Ok(l) => l,
            Err(e) => {
                error!(slot, "invalid buffer layout: {e}");
                drop(mapping);
                self.inner.native.free(native);
                self.push_free(group);
                return Err(Error::AllocationFailed {
                    slot,
                    reason: e.to_string(),
                });
            }
        };
        info!(
            slot,
            handle = native.handle,
            stride = native.stride,
            size = native.size,
            "buffer allocated {}x{} {}",
            format.width,
            format.height,
            format.pixel_format
        );

        group.slot.store(slot, Ordering::Release);
        group.handle.store(native.handle, Ordering::Release);
        *group.memory.lock() = Some(GroupMemory {
            native,
            mapping,
            layout,
        });
        Ok(())
    }

    /// Pops a free group without waiting.
    pub fn get_free_group(&self) -> Option<Arc<BufferGroup>> {
        if !self.is_active() {
            return None;
        }
        self.inner.free_rx.try_recv().ok().flatten()
    }

    /// Translates a native handle reported by the device back to its group.
    pub fn get_memory_group(&self, handle: NativeHandle) -> Result<Arc<BufferGroup>> {
        if !self.is_active() {
            return Err(Error::Inactive);
        }
        self.inner
            .groups
            .read()
            .iter()
            .find(|g| g.handle() == Some(handle))
            .cloned()
            .ok_or(Error::UnknownHandle(handle))
    }

    /// Takes the device-side reference of a group being queued for capture.
    pub fn prepare_buf(&self, group: &BufferGroup) {
        if !self.is_active() {
            return;
        }
        if group.armed.swap(true, Ordering::AcqRel) {
            warn!(slot = group.slot(), "buffer already armed");
            return;
        }
        group.refs.fetch_add(1, Ordering::AcqRel);
    }

    /// Drops the device-side reference, if held.
    pub fn disarm(&self, group: &Arc<BufferGroup>) {
        if group.armed.swap(false, Ordering::AcqRel) {
            self.release(group);
        }
    }

    /// Takes a consumer reference.
    pub(crate) fn retain(&self, group: &BufferGroup) {
        group.refs.fetch_add(1, Ordering::AcqRel);
    }

    /// Drops one reference. The last release returns the group to the
    /// free-list.
    pub fn release(&self, group: &Arc<BufferGroup>) {
        let prev = group
            .refs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |r| r.checked_sub(1));
        match prev {
            Ok(1) if self.is_active() => {
                trace!(slot = group.slot(), "buffer released");
                self.push_free(group.clone());
            }
            Ok(1) => trace!(slot = group.slot(), "buffer released after stop"),
            Ok(_) => {}
            Err(_) => warn!(slot = group.slot(), "release of unreferenced buffer"),
        }
    }

    /// Drops the device-side reference of every group so nothing stays
    /// pinned by a device that will not complete it.
    pub fn flush(&self) {
        let _guard = self.inner.lock.lock();

        if !self.is_active() {
            return;
        }

        let groups = self.inner.groups.read().clone();
        for group in &groups {
            self.disarm(group);
        }
        debug!(stream = %self.inner.format.stream, "allocator flushed");
    }

    /// Frees every native buffer once all groups are back on the free-list.
    ///
    /// Returns [`Error::Busy`] without touching anything while groups are
    /// still referenced. Stopping an inactive allocator is a no-op.
    pub fn stop(&self) -> Result<()> {
        let _guard = self.inner.lock.lock();

        if !self.is_active() {
            return Ok(());
        }

        let count = self.count();
        let free = self.free_len();
        if free != count {
            debug!(free, count, "allocator is still in use");
            return Err(Error::Busy {
                outstanding: count - free,
            });
        }

        while let Ok(Some(_)) = self.inner.free_rx.try_recv() {}

        let mut groups = self.inner.groups.write();
        for group in groups.drain(..) {
            if let Some(memory) = group.memory.lock().take() {
                drop(memory.mapping);
                self.inner.native.free(memory.native);
            }
            group.handle.store(UNBACKED, Ordering::Release);
        }

        self.inner.active.store(false, Ordering::Release);
        debug!(stream = %self.inner.format.stream, "allocator stopped");
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn deactivate(&self) {
        self.inner.active.store(false, Ordering::Release);
    }

    fn push_free(&self, group: Arc<BufferGroup>) {
        // Capacity is MAX_FRAME and groups are unique, so this cannot block.
        if let Err(e) = self.inner.free_tx.send(group) {
            error!("free-list closed: {e}");
        }
    }
}
