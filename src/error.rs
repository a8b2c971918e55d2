// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Error types shared by the allocator, buffer pool, scheduler and session.

use crate::{device::DeviceStatus, stream::StreamId};

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors raised by the buffer lifecycle and request scheduling code.
///
/// None of these are fatal to the process. Callers decide whether to retry
/// (`Busy`, `SubmissionRejected`) or tear the stream down.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// `start()` was called on an allocator that is already running.
    #[error("allocator already active")]
    AlreadyActive,

    /// The allocator has not been started or was stopped.
    #[error("allocator is not active")]
    Inactive,

    /// The native allocator rejected the request. The group was returned to
    /// the free-list.
    #[error("failed to allocate buffer for slot {slot}: {reason}")]
    AllocationFailed { slot: usize, reason: String },

    /// The device refused a capture request. Its buffers went back to
    /// their pending queues.
    #[error("capture request {frame_number} rejected by device (status {status})")]
    SubmissionRejected { frame_number: u32, status: i32 },

    /// A completion did not match the head of the stream's inflight queue.
    #[error("frame counter mismatch on stream {stream}: expected {expected}, got {actual}")]
    FrameMismatch {
        stream: StreamId,
        expected: u32,
        actual: u32,
    },

    /// Buffers are still outstanding downstream.
    #[error("{outstanding} buffers are still outstanding")]
    Busy { outstanding: usize },

    /// The pool slot for this buffer already holds a queued buffer.
    #[error("buffer {slot} is already queued")]
    AlreadyQueued { slot: usize },

    /// The buffer cannot be requeued (foreign, tagged or shared).
    #[error("invalid buffer: {0}")]
    InvalidBuffer(&'static str),

    /// A processed buffer had no consumer-visible object parked in the pool.
    #[error("no buffer available for handle {handle:#x}")]
    NoBufferAvailable { handle: u64 },

    /// Every group is in circulation.
    #[error("no free buffer group")]
    Exhausted,

    /// No group is backed by the given native handle.
    #[error("unknown native handle {0:#x}")]
    UnknownHandle(u64),

    /// A completion referenced a stream with no registered pool.
    #[error("unknown stream {0}")]
    UnknownStream(StreamId),

    /// The device delivered a buffer that was never submitted.
    #[error("completion for frame {frame_number} on stream {stream} with empty inflight queue")]
    UnexpectedCompletion { stream: StreamId, frame_number: u32 },

    /// acquire/release outside of the streaming state.
    #[error("buffer pool is not streaming")]
    NotStreaming,

    /// A lifecycle operation was called in the wrong state.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    #[error("unsupported pixel format {0:#x}")]
    UnsupportedFormat(i32),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The session was started without any stream.
    #[error("no output streams configured")]
    NoStreams,

    #[error("configure_streams failed: {0}")]
    ConfigureFailed(DeviceStatus),

    /// The device could not build default settings for the template.
    #[error("device returned no request settings")]
    NoRequestSettings,

    #[error(transparent)]
    Device(#[from] DeviceStatus),

    /// The DMA heap could not be opened or refused an allocation.
    #[error("DMA heap: {0}")]
    DmaHeap(String),

    /// The buffer has no CPU mapping.
    #[error("buffer memory is not mapped")]
    NotMapped,

    #[error("scheduler thread panicked")]
    ThreadPanicked,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
