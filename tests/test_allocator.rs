// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

mod common;

use common::{allocator_format, init_tracing, FakeAllocator};
use edgefirst_hal3::{BufferAllocator, Error, MAX_FRAME};
use std::error::Error as StdError;

#[test]
fn test_start_fills_free_list() -> Result<(), Box<dyn StdError>> {
    init_tracing();
    let native = FakeAllocator::new();
    let alloc = BufferAllocator::new(native.clone(), allocator_format(0));

    alloc.start(4)?;
    assert!(alloc.is_active());
    assert_eq!(alloc.count(), 4);
    assert_eq!(alloc.free_len(), 4);
    // Groups are not backed until allocate_buffer.
    assert_eq!(native.live(), 0);

    assert!(matches!(alloc.start(4), Err(Error::AlreadyActive)));
    Ok(())
}

#[test]
fn test_start_rejects_bad_count() {
    let alloc = BufferAllocator::new(FakeAllocator::new(), allocator_format(0));
    assert!(alloc.start(0).is_err());
    assert!(alloc.start(MAX_FRAME + 1).is_err());
    assert!(!alloc.is_active());
}

#[test]
fn test_get_free_group_is_non_blocking() -> Result<(), Box<dyn StdError>> {
    let alloc = BufferAllocator::new(FakeAllocator::new(), allocator_format(0));
    assert!(alloc.get_free_group().is_none(), "inactive allocator");

    alloc.start(2)?;
    let a = alloc.get_free_group().ok_or("no group")?;
    let b = alloc.get_free_group().ok_or("no group")?;
    assert_ne!(a.index(), b.index());
    assert!(alloc.get_free_group().is_none());
    Ok(())
}

#[test]
fn test_allocation_failure_returns_group() -> Result<(), Box<dyn StdError>> {
    init_tracing();
    let native = FakeAllocator::new();
    let alloc = BufferAllocator::new(native.clone(), allocator_format(0));
    alloc.start(2)?;

    native.fail_next(1);
    let group = alloc.get_free_group().ok_or("no group")?;
    assert_eq!(alloc.free_len(), 1);
    let err = alloc.allocate_buffer(group.clone(), 0).unwrap_err();
    assert!(matches!(err, Error::AllocationFailed { slot: 0, .. }));
    assert_eq!(alloc.free_len(), 2, "group must not leak");
    assert!(!group.is_backed());

    let group = alloc.get_free_group().ok_or("no group")?;
    alloc.allocate_buffer(group.clone(), group.index())?;
    assert!(group.is_backed());
    assert_eq!(group.stride(), Some(640));
    assert_eq!(group.planes().len(), 2);
    assert_eq!(native.live(), 1);
    Ok(())
}

#[test]
fn test_memory_group_lookup() -> Result<(), Box<dyn StdError>> {
    let alloc = BufferAllocator::new(FakeAllocator::new(), allocator_format(0));
    alloc.start(3)?;

    let group = alloc.get_free_group().ok_or("no group")?;
    alloc.allocate_buffer(group.clone(), group.index())?;
    let handle = group.handle().ok_or("unbacked")?;

    let found = alloc.get_memory_group(handle)?;
    assert_eq!(found.index(), group.index());
    assert!(matches!(
        alloc.get_memory_group(0xdead),
        Err(Error::UnknownHandle(0xdead))
    ));
    Ok(())
}

#[test]
fn test_refcount_returns_on_last_release() -> Result<(), Box<dyn StdError>> {
    let alloc = BufferAllocator::new(FakeAllocator::new(), allocator_format(0));
    alloc.start(1)?;

    let group = alloc.get_free_group().ok_or("no group")?;
    alloc.allocate_buffer(group.clone(), 0)?;

    alloc.prepare_buf(&group);
    assert!(group.is_armed());
    assert_eq!(group.refs(), 1);
    // Arming twice does not take a second reference.
    alloc.prepare_buf(&group);
    assert_eq!(group.refs(), 1);

    assert_eq!(alloc.free_len(), 0);
    alloc.disarm(&group);
    assert_eq!(group.refs(), 0);
    assert_eq!(alloc.free_len(), 1);
    Ok(())
}

#[test]
fn test_stop_busy_then_ok() -> Result<(), Box<dyn StdError>> {
    init_tracing();
    let native = FakeAllocator::new();
    let alloc = BufferAllocator::new(native.clone(), allocator_format(0));
    alloc.start(2)?;

    let group = alloc.get_free_group().ok_or("no group")?;
    alloc.allocate_buffer(group.clone(), 0)?;
    alloc.prepare_buf(&group);

    assert!(matches!(alloc.stop(), Err(Error::Busy { outstanding: 1 })));
    assert!(alloc.is_active(), "busy stop is non-destructive");
    assert_eq!(native.live(), 1);

    alloc.flush();
    assert!(!group.is_armed());
    alloc.stop()?;
    assert!(!alloc.is_active());
    assert_eq!(native.live(), 0);

    // Stopping twice is a no-op.
    alloc.stop()?;
    Ok(())
}
