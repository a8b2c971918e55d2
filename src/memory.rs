// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Native buffer allocation.
//!
//! The [`NativeAllocator`] trait is the contract with whatever library hands
//! out hardware buffers. [`DmaHeapAllocator`] implements it on top of the
//! Linux DMA heap interface so buffers can be shared with the ISP, the GPU
//! and other processes without copies.

use crate::{
    format::{native_usage, ConsumerUsage, HalFormat, HalPixelFormat, ProducerUsage},
    Error, Result,
};
use dma_buf::DmaBuf;
use dma_heap::{Heap, HeapKind};
use std::{
    ffi::c_void,
    fmt, io,
    os::fd::{AsRawFd, BorrowedFd, OwnedFd},
    ptr::null_mut,
    slice::from_raw_parts,
    sync::atomic::{AtomicU64, Ordering},
};
use tracing::{debug, warn};

/// Opaque identity of a native buffer. The device reports completions
/// with this token, never with a pointer.
pub type NativeHandle = u64;

/// A buffer object returned by a [`NativeAllocator`].
#[derive(Debug)]
pub struct NativeBuffer {
    pub handle: NativeHandle,
    pub stride: u32,
    pub size: usize,
    /// dma-buf file descriptor, when the backend exports one.
    pub fd: Option<OwnedFd>,
}

impl NativeBuffer {
    /// Duplicates the exported fd as a dma-buf, for sharing with other
    /// devices. `None` when the backend exports no fd.
    pub fn dmabuf(&self) -> Result<Option<DmaBuf>> {
        let fd = match &self.fd {
            Some(fd) => fd.try_clone()?,
            None => return Ok(None),
        };
        Ok(Some(DmaBuf::from(fd)))
    }
}

/// Native buffer allocation library.
///
/// Implementations must be thread-safe; the allocator may be called from
/// the consumer and the scheduler concurrently.
pub trait NativeAllocator: Send + Sync {
    /// Allocates one buffer object matching the format and usage.
    fn alloc(
        &self,
        width: u32,
        height: u32,
        format: HalPixelFormat,
        producer: ProducerUsage,
        consumer: ConsumerUsage,
    ) -> Result<NativeBuffer>;

    /// Releases a buffer object previously returned by `alloc`.
    fn free(&self, buffer: NativeBuffer);
}

/// CPU mapping of a native buffer.
///
/// The mapping is shared (`MAP_SHARED`) and removed when dropped. Hardware
/// may write the memory at any time while the buffer is queued, so readers
/// should only look at it while they hold the buffer.
#[derive(Debug)]
pub struct MappedMemory {
    mmap: *mut u8,
    len: usize,
}

// The mapping is plain shared memory; access is serialized by buffer
// ownership.
unsafe impl Send for MappedMemory {}
unsafe impl Sync for MappedMemory {}

impl MappedMemory {
    pub fn new(fd: BorrowedFd<'_>, len: usize) -> io::Result<Self> {
        if len == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "cannot map an empty buffer",
            ));
        }

        let mmap = unsafe {
            libc::mmap(
                null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd.as_raw_fd(),
                0,
            )
        };
        if mmap == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        Ok(Self {
            mmap: mmap as *mut u8,
            len,
        })
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { from_raw_parts(self.mmap, self.len) }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for MappedMemory {
    fn drop(&mut self) {
        if unsafe { libc::munmap(self.mmap.cast::<c_void>(), self.len) } != 0 {
            warn!("unmap failed: {}", io::Error::last_os_error());
        }
    }
}

/// Allocates camera buffers from a Linux DMA heap.
///
/// # Example
///
/// ```no_run
/// use edgefirst_hal3::{
///     format::{ConsumerUsage, HalPixelFormat, ProducerUsage},
///     memory::{DmaHeapAllocator, NativeAllocator},
/// };
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let heap = DmaHeapAllocator::new()?;
/// let buf = heap.alloc(
///     1920,
///     1080,
///     HalPixelFormat::Ycbcr420888,
///     ProducerUsage::CAMERA,
///     ConsumerUsage::NONE,
/// )?;
/// println!("allocated {} bytes stride {}", buf.size, buf.stride);
/// heap.free(buf);
/// # Ok(())
/// # }
/// ```
pub struct DmaHeapAllocator {
    heap: Heap,
    next_handle: AtomicU64,
}

impl DmaHeapAllocator {
    /// Opens the CMA heap.
    pub fn new() -> Result<Self> {
        Self::with_kind(HeapKind::Cma)
    }

    /// Opens the system heap. Buffers are not physically contiguous.
    pub fn system() -> Result<Self> {
        Self::with_kind(HeapKind::System)
    }

    fn with_kind(kind: HeapKind) -> Result<Self> {
        let heap = Heap::new(kind).map_err(|e| Error::DmaHeap(e.to_string()))?;
        Ok(Self {
            heap,
            next_handle: AtomicU64::new(1),
        })
    }
}

impl fmt::Debug for DmaHeapAllocator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("DmaHeapAllocator")
            .field("next_handle", &self.next_handle)
            .finish_non_exhaustive()
    }
}

impl NativeAllocator for DmaHeapAllocator {
    fn alloc(
        &self,
        width: u32,
        height: u32,
        format: HalPixelFormat,
        producer: ProducerUsage,
        consumer: ConsumerUsage,
    ) -> Result<NativeBuffer> {
        let usage = native_usage(format, producer, consumer)?;
        let layout = HalFormat::new(width, height, format)?;
        let size = layout.total_size() as usize;
        if size == 0 {
            return Err(Error::InvalidConfiguration(format!(
                "{width}x{height} {format} has no size"
            )));
        }

        let fd = self
            .heap
            .allocate(size)
            .map_err(|e| Error::DmaHeap(e.to_string()))?;

        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        let stride = layout.planes().first().map(|p| p.stride).unwrap_or(width);
        debug!(
            handle,
            size,
            stride,
            usage = usage.0,
            "DMA buffer alloc'd {}x{} {}",
            width,
            height,
            format
        );

        Ok(NativeBuffer {
            handle,
            stride,
            size,
            fd: Some(fd),
        })
    }

    fn free(&self, buffer: NativeBuffer) {
        debug!(handle = buffer.handle, "DMA buffer freed");
        drop(buffer);
    }
}
