//! Façade tests: find-or-create flow, window validation and the retry
//! loop.

use std::sync::Arc;

use crate::{
    error::BufferError,
    header::BUFFER_OVERHEAD,
    helper::BufferHelper,
    memory::MemorySource,
    tests::fake::{FakeProcess, FAKE_GRANULARITY, FAKE_PAGE_SIZE},
};

const SPACE_END: u64 = 0x1_0000_0000;

fn helper() -> (Arc<FakeProcess>, BufferHelper<FakeProcess>) {
    let process = Arc::new(FakeProcess::new(SPACE_END));
    let helper = BufferHelper::from_arc(Arc::clone(&process));
    (process, helper)
}

#[test]
fn create_append_and_read_back() {
    let (process, helper) = helper();

    let buffer = helper.create_buffer(256, 0, u64::MAX).unwrap();
    let addr = buffer.append(&[0xAA, 0xBB, 0xCC]).unwrap();

    let mut read = [0u8; 3];
    process.read(addr, &mut read).unwrap();
    assert_eq!(read, [0xAA, 0xBB, 0xCC]);
    assert_eq!(buffer.header().unwrap().offset, 4);
}

#[test]
fn windowed_create_satisfies_constraints() {
    let (_, helper) = helper();
    let (min, max) = (0x1000_0000, 0x2000_0000);

    let buffer = helper.create_buffer(512, min, max).unwrap();
    let header = buffer.header().unwrap();
    let base = buffer.base_address();
    let total = header.size + BUFFER_OVERHEAD;

    assert!(base >= min);
    assert!(base + total <= max);
    assert_eq!(base % FAKE_GRANULARITY, 0);
    assert_eq!(total % FAKE_PAGE_SIZE, 0);
}

#[test]
fn degenerate_window_fails_with_no_suitable_region() {
    let (process, helper) = helper();

    let err = helper.create_buffer(0, 0x1234, 0x1234).unwrap_err();
    assert!(matches!(err, BufferError::NoSuitableRegion));
    // Placement never reached a commit attempt.
    assert_eq!(process.commit_attempts(), 0);
}

#[test]
fn inverted_window_is_rejected_up_front() {
    let (_, helper) = helper();

    let err = helper.create_buffer(256, 0x2000, 0x1000).unwrap_err();
    assert!(matches!(
        err,
        BufferError::InvalidWindow {
            min: 0x2000,
            max: 0x1000
        }
    ));
}

#[test]
fn creation_retries_after_losing_the_region() {
    let (process, helper) = helper();
    process.fail_next_commits(2);

    let buffer = helper.create_buffer(256, 0, u64::MAX).unwrap();
    assert_eq!(process.commit_attempts(), 3);
    assert!(buffer.can_fit(256));
}

#[test]
fn last_error_surfaces_when_retries_run_out() {
    let (process, helper) = helper();
    process.fail_next_commits(3);

    let err = helper.create_buffer(256, 0, u64::MAX).unwrap_err();
    assert!(matches!(err, BufferError::CommitFailed(1455)));
    assert_eq!(process.commit_attempts(), 3);
}

#[test]
fn retry_count_is_configurable() {
    let (process, helper) = helper();
    process.fail_next_commits(4);

    let buffer = helper
        .create_buffer_with_retries(256, 0, u64::MAX, 5)
        .unwrap();
    assert_eq!(process.commit_attempts(), 5);
    assert!(buffer.can_fit(1));
}

#[test]
fn get_or_create_reuses_before_creating() {
    let (process, helper) = helper();
    let window = (0x1000_0000, 0x2000_0000);

    let created = helper
        .get_or_create_buffer(256, window.0, window.1)
        .unwrap();
    assert_eq!(process.commit_attempts(), 1);

    let reused = helper.get_or_create_buffer(64, window.0, window.1).unwrap();
    assert_eq!(reused.base_address(), created.base_address());
    assert_eq!(process.commit_attempts(), 1, "no second commit for a fit");

    // A request the existing buffer cannot satisfy commits a fresh one.
    let payload = created.header().unwrap().size;
    let bigger = helper
        .get_or_create_buffer(payload + 1, window.0, window.1)
        .unwrap();
    assert_ne!(bigger.base_address(), created.base_address());
    assert_eq!(process.commit_attempts(), 2);
}

#[test]
fn find_buffer_location_commits_nothing() {
    let (process, helper) = helper();

    let placement = helper.find_buffer_location(256, 0, u64::MAX).unwrap();
    assert_eq!(placement.address % FAKE_GRANULARITY, 0);
    assert_eq!(placement.total_size, FAKE_PAGE_SIZE);
    assert_eq!(process.commit_attempts(), 0);

    // The location is genuinely committable.
    let buffer = helper.create_buffer(256, 0, u64::MAX).unwrap();
    assert_eq!(buffer.base_address(), placement.address);
}
