// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use edgefirst_hal3::{
    allocator::AllocatorFormat,
    format::{ConsumerUsage, HalPixelFormat, ProducerUsage},
    memory::{DmaHeapAllocator, NativeAllocator},
    stream::StreamId,
    BufferAllocator,
};
use serial_test::serial;
use std::{error::Error, sync::Arc};

#[test]
#[serial]
#[ignore = "DMA heap test is disabled by default (run with --include-ignored to enable)"]
fn test_dma_heap_alloc() -> Result<(), Box<dyn Error>> {
    let heap = DmaHeapAllocator::new()?;
    let buf = heap.alloc(
        1920,
        1080,
        HalPixelFormat::Ycbcr420888,
        ProducerUsage::CAMERA,
        ConsumerUsage::NONE,
    )?;
    assert_eq!(buf.stride, 1920);
    assert_eq!(buf.size, 1920 * 1088 + 1920 * 576);
    assert!(buf.fd.is_some());
    assert!(buf.dmabuf()?.is_some());
    heap.free(buf);
    Ok(())
}

#[test]
#[serial]
#[ignore = "DMA heap test is disabled by default (run with --include-ignored to enable)"]
fn test_dma_heap_oversized_alloc() -> Result<(), Box<dyn Error>> {
    let heap = DmaHeapAllocator::new()?;
    let res = heap.alloc(
        100_000,
        100_000,
        HalPixelFormat::Ycbcr420888,
        ProducerUsage::CAMERA,
        ConsumerUsage::NONE,
    );
    assert!(res.is_err());
    Ok(())
}

#[test]
#[serial]
#[ignore = "DMA heap test is disabled by default (run with --include-ignored to enable)"]
fn test_dma_heap_groups_are_mapped() -> Result<(), Box<dyn Error>> {
    let heap = Arc::new(DmaHeapAllocator::new()?);
    let alloc = BufferAllocator::new(
        heap,
        AllocatorFormat {
            stream: StreamId(0),
            width: 1280,
            height: 720,
            pixel_format: HalPixelFormat::Ycbcr420888,
            producer: ProducerUsage::CAMERA,
            consumer: ConsumerUsage::NONE,
        },
    );
    alloc.start(4)?;

    let mut groups = Vec::new();
    while let Some(group) = alloc.get_free_group() {
        alloc.allocate_buffer(group.clone(), group.index())?;
        let len = group.map(|mem| mem.len())?;
        assert_eq!(Some(len), group.size());
        assert!(group.dmabuf()?.is_some());
        groups.push(group);
    }
    assert_eq!(groups.len(), 4);

    for group in &groups {
        alloc.prepare_buf(group);
        alloc.disarm(group);
    }
    alloc.stop()?;
    Ok(())
}
