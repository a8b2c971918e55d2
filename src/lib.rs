// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! # EdgeFirst HAL3 Camera Library
//!
//! Buffer lifecycle and capture request scheduling for HAL3-style camera
//! devices. A small fixed set of hardware buffers is shared between the
//! device, the allocator and the consumer without copies.
//!
//! ## Components
//!
//! - **[`BufferAllocator`]**: owns the hardware buffer groups of a stream,
//!   backs them with native memory and recycles them through a free-list.
//! - **[`BufferPool`]**: consumer-facing acquire/release on top of the
//!   allocator, with the pending, inflight and processed hand-off queues.
//! - **[`CaptureScheduler`]**: thread that round-robins the pending queues
//!   of every stream into multiplexed capture requests.
//! - **[`ResultDispatcher`]**: device completion callback moving buffers
//!   from inflight to processed.
//! - **[`CaptureSession`]**: wires a device, its streams and the two threads
//!   together.
//!
//! ## Example
//!
//! ```no_run
//! use edgefirst_hal3::{
//!     config::{SchedulerConfig, StreamConfig},
//!     device::Device,
//!     memory::DmaHeapAllocator,
//!     CaptureSession,
//! };
//! use std::sync::Arc;
//!
//! # fn run(device: Box<dyn Device>) -> Result<(), Box<dyn std::error::Error>> {
//! let heap = Arc::new(DmaHeapAllocator::new()?);
//! let mut session = CaptureSession::open(device, SchedulerConfig::default())?;
//! let pool = session.add_stream(&StreamConfig::default(), heap)?;
//! session.start()?;
//!
//! let buffer = pool.acquire()?;
//! println!("sequence {} frame {}", buffer.sequence(), buffer.device_frame());
//! pool.release(buffer)?;
//!
//! session.stop()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Platform Requirements
//!
//! - **Linux**: DMA heap support (`/dev/dma_heap`) for [`DmaHeapAllocator`]
//!
//! ## Safety
//!
//! `unsafe` is limited to the CPU mapping of DMA buffers, wrapped by
//! [`MappedMemory`](memory::MappedMemory).
//!
//! [`DmaHeapAllocator`]: memory::DmaHeapAllocator

pub mod allocator;
pub mod buffer;
pub mod config;
pub mod device;
pub mod dispatcher;
pub mod error;
pub mod format;
pub mod memory;
pub mod pool;
pub mod scheduler;
pub mod session;
pub mod stream;

pub use allocator::BufferAllocator;
pub use buffer::Buffer;
pub use dispatcher::ResultDispatcher;
pub use error::{Error, Result};
pub use pool::{BufferPool, BufferSource, PoolStats};
pub use scheduler::CaptureScheduler;
pub use session::CaptureSession;

/// Maximum number of buffers a pool can circulate.
pub const MAX_FRAME: usize = 32;

/// Maximum number of planes of one buffer.
pub const MAX_PLANES: usize = 8;
