// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Completion routing from the device callback thread.

use crate::{
    device::{CaptureResult, CompletionSink},
    pool::BufferPool,
    stream::StreamId,
    Error, Result,
};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Matches device completions to the inflight queue of their stream.
///
/// Completions within a stream must arrive in submission order: each output
/// buffer is paired with the head of its pool's inflight queue, never looked
/// up by identity. A buffer whose frame number disagrees with that head is
/// dropped from circulation.
///
/// The scheduler records inflight entries before submitting, so an empty
/// inflight queue means the device completed something it was never given.
#[derive(Default)]
pub struct ResultDispatcher {
    pools: RwLock<Vec<Arc<BufferPool>>>,
}

impl ResultDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, pool: Arc<BufferPool>) {
        debug!(stream = %pool.id(), "pool registered for completions");
        self.pools.write().push(pool);
    }

    pub fn clear(&self) {
        self.pools.write().clear();
    }

    fn pool(&self, stream: StreamId) -> Option<Arc<BufferPool>> {
        self.pools.read().iter().find(|p| p.id() == stream).cloned()
    }
}

impl CompletionSink for ResultDispatcher {
    fn process_capture_result(&self, result: &CaptureResult) -> Result<()> {
        if result.output_buffers.is_empty() {
            trace!(frame = result.frame_number, "metadata-only result ignored");
            return Ok(());
        }

        let mut first_error = None;
        for buffer in &result.output_buffers {
            let Some(pool) = self.pool(buffer.stream) else {
                warn!("completion for unregistered {}", buffer.stream);
                first_error.get_or_insert(Error::UnknownStream(buffer.stream));
                continue;
            };

            let Some(entry) = pool.pop_inflight() else {
                warn!(
                    stream = %buffer.stream,
                    frame = result.frame_number,
                    "completion with nothing inflight"
                );
                first_error.get_or_insert(Error::UnexpectedCompletion {
                    stream: buffer.stream,
                    frame_number: result.frame_number,
                });
                continue;
            };

            if entry.frame_number == result.frame_number {
                trace!(
                    stream = %buffer.stream,
                    frame = result.frame_number,
                    "processed {}",
                    entry.buffer
                );
                pool.complete(entry.buffer);
            } else {
                warn!(
                    stream = %buffer.stream,
                    "frame counter mismatch! {} != {}",
                    entry.frame_number,
                    result.frame_number
                );
                pool.discard(entry.buffer);
                first_error.get_or_insert(Error::FrameMismatch {
                    stream: buffer.stream,
                    expected: entry.frame_number,
                    actual: result.frame_number,
                });
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
