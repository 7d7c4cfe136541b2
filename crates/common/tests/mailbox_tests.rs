//! Mailbox Integration Tests
//!
//! Cross-thread behaviour of the single-slot mailbox.
//!
//! # Test Scenarios
//! - Bursts of posts never block the writer
//! - A burst always leaves at least one token for the reader
//! - Reader wakes for posts and for writer shutdown
//!
//! Run with: `cargo test -p common --test mailbox_tests`

use common::test_utils::{DEFAULT_TEST_TIMEOUT, with_timeout};
use common::{DeviceChange, Error, mailbox};
use std::thread;
use std::time::{Duration, Instant};

// ============================================================================
// Burst Tests
// ============================================================================

#[test]
fn test_burst_never_blocks_writer() {
    let (writer, reader) = mailbox();

    let handle = thread::spawn(move || {
        let started = Instant::now();
        let mut accepted = 0;
        let mut dropped = 0;
        for i in 0..10_000 {
            let change = if i % 2 == 0 {
                DeviceChange::Arrival
            } else {
                DeviceChange::Removal
            };
            match writer.try_post(change) {
                Ok(()) => accepted += 1,
                Err(Error::MailboxFull) => dropped += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        (started.elapsed(), accepted, dropped, writer)
    });

    let (elapsed, accepted, dropped, _writer) = handle.join().unwrap();

    // Nobody reads, so only the single slot is ever filled
    assert_eq!(accepted, 1);
    assert_eq!(dropped, 9_999);
    assert!(elapsed < Duration::from_secs(5));
    assert_eq!(reader.pending(), 1);
}

#[test]
fn test_burst_leaves_one_token_regardless_of_size() {
    for burst in [1usize, 2, 17, 500] {
        let (writer, reader) = mailbox();
        for _ in 0..burst {
            let _ = writer.try_post(DeviceChange::Arrival);
        }

        assert_eq!(reader.try_take().unwrap(), Some(DeviceChange::Arrival));
        assert_eq!(reader.try_take().unwrap(), None);
    }
}

#[test]
fn test_slot_rearms_after_take() {
    let (writer, reader) = mailbox();

    writer.try_post(DeviceChange::Arrival).unwrap();
    assert!(writer.try_post(DeviceChange::Removal).is_err());

    assert_eq!(reader.try_take().unwrap(), Some(DeviceChange::Arrival));
    writer.try_post(DeviceChange::Removal).unwrap();
    assert_eq!(reader.try_take().unwrap(), Some(DeviceChange::Removal));
}

// ============================================================================
// Wake-up Tests
// ============================================================================

#[tokio::test]
async fn test_reader_wakes_for_each_rearm() {
    let (writer, reader) = mailbox();

    let handle = thread::spawn(move || {
        for _ in 0..3 {
            // Wait for the slot to drain before posting again
            while writer.try_post(DeviceChange::Arrival).is_err() {
                thread::sleep(Duration::from_millis(1));
            }
        }
        writer
    });

    let mut taken = 0;
    while taken < 3 {
        with_timeout(DEFAULT_TEST_TIMEOUT, reader.readable())
            .await
            .expect("reader starved");
        if reader.try_take().unwrap().is_some() {
            taken += 1;
        }
    }

    drop(handle.join().unwrap());
    assert_eq!(taken, 3);
}

#[tokio::test]
async fn test_reader_observes_closure() {
    let (writer, reader) = mailbox();
    thread::spawn(move || drop(writer)).join().unwrap();

    with_timeout(DEFAULT_TEST_TIMEOUT, reader.readable())
        .await
        .expect("closure not observed");
    assert!(matches!(reader.try_take(), Err(Error::MailboxClosed)));
}
