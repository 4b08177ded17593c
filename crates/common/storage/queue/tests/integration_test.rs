// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{
    fs,
    path::Path,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use spillway_queue::{
    Buffer, MIN_QUEUE_SIZE, QueueBuilder, QueueError, RawQueue, RingStorage, StringSerializer,
};
use tempfile::TempDir;

fn open_storage(dir: &Path, max_size: u64, evict: bool) -> RingStorage {
    spillway_telemetry::init_default_ut_logging();
    QueueBuilder::new()
        .directory(dir)
        .max_size(max_size)
        .delete_oldest_on_overflow(evict)
        .build_storage()
        .unwrap()
}

fn pop_bytes(queue: &impl RawQueue) -> Option<Vec<u8>> {
    let mut out = Buffer::new();
    queue.pop(&mut out).unwrap().then(|| out.as_slice().to_vec())
}

fn list_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

fn corrupt_first_frame(path: &Path) {
    let mut data = fs::read(path).unwrap();
    data[..4].copy_from_slice(&[0xFF, 0xFF, 0xFF, 0x7F]);
    fs::write(path, data).unwrap();
}

#[test]
fn test_fifo_order() {
    let temp_dir = TempDir::new().unwrap();
    let storage = open_storage(temp_dir.path(), 1 << 20, false);

    for i in 0..1000 {
        assert!(storage.push(format!("message-{i:04}").as_bytes()).unwrap());
    }
    assert_eq!(storage.count().unwrap(), 1000);

    for i in 0..1000 {
        assert_eq!(
            pop_bytes(&storage).unwrap(),
            format!("message-{i:04}").as_bytes()
        );
    }
    assert!(pop_bytes(&storage).is_none());
    assert_eq!(storage.count().unwrap(), 0);
}

#[test]
fn test_spanning_multiple_files() {
    let temp_dir = TempDir::new().unwrap();
    let storage = open_storage(temp_dir.path(), 512, false);
    let record = vec![b'a'; 512];

    for _ in 0..5 {
        assert!(storage.push(&record).unwrap());
    }
    assert_eq!(
        list_files(temp_dir.path()),
        ["data00", "data01", "data02", "data03", "data04", "state"]
    );
    for i in 0..5 {
        let len = fs::metadata(temp_dir.path().join(format!("data0{i}")))
            .unwrap()
            .len();
        assert_eq!(len, 516);
    }
    assert_eq!(storage.bytes().unwrap(), 5 * 516);

    for _ in 0..5 {
        assert_eq!(pop_bytes(&storage).unwrap(), record);
    }
    assert_eq!(list_files(temp_dir.path()), ["state"]);
    assert_eq!(storage.bytes().unwrap(), 0);
    assert_eq!(storage.count().unwrap(), 0);
}

#[test]
fn test_reopen_preserves_records() {
    let temp_dir = TempDir::new().unwrap();
    {
        let storage = open_storage(temp_dir.path(), 512, false);
        for i in 0..10u8 {
            storage.push(&[i; 300]).unwrap();
        }
        storage.close().unwrap();
    }

    let storage = open_storage(temp_dir.path(), 512, false);
    assert_eq!(storage.count().unwrap(), 10);
    assert_eq!(storage.bytes().unwrap(), 10 * 304);
    for i in 0..10u8 {
        assert_eq!(pop_bytes(&storage).unwrap(), vec![i; 300]);
    }
}

#[test]
fn test_recover_after_data_files_deleted() {
    let temp_dir = TempDir::new().unwrap();
    let storage = open_storage(temp_dir.path(), 512, false);
    let record = vec![b'a'; 512];

    for _ in 0..5 {
        storage.push(&record).unwrap();
    }
    storage.push(b"aaa").unwrap();

    for name in list_files(temp_dir.path()) {
        if name.starts_with("data") {
            fs::remove_file(temp_dir.path().join(name)).unwrap();
        }
    }

    storage.push(&record).unwrap();
    assert!(pop_bytes(&storage).is_none());
    assert_eq!(storage.count().unwrap(), 0);

    storage.push(b"abc").unwrap();
    assert_eq!(pop_bytes(&storage).unwrap(), b"abc");
    assert_eq!(storage.bytes().unwrap(), 7);
    assert_eq!(storage.count().unwrap(), 0);
    assert_eq!(list_files(temp_dir.path()), ["data06", "state"]);
}

#[test]
fn test_recover_after_directory_deleted() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path().join("queue");
    let storage = open_storage(&dir, 512, false);
    let record = vec![b'a'; 512];

    for _ in 0..5 {
        storage.push(&record).unwrap();
    }
    fs::remove_dir_all(&dir).unwrap();

    assert!(storage.push(&record).unwrap());
    assert_eq!(storage.count().unwrap(), 1);
    assert_eq!(pop_bytes(&storage).unwrap(), record);
    assert_eq!(storage.count().unwrap(), 0);
    assert_eq!(list_files(&dir), ["state"]);
}

#[test]
fn test_stale_state_is_reconciled() {
    let temp_dir = TempDir::new().unwrap();
    let state_path = temp_dir.path().join("state");
    {
        let storage = open_storage(temp_dir.path(), 1 << 20, false);
        for i in 0..3u8 {
            storage.push(&[i; 10]).unwrap();
        }
        let snapshot = fs::read(&state_path).unwrap();
        for i in 3..6u8 {
            storage.push(&[i; 10]).unwrap();
        }
        storage.close().unwrap();
        // Lose the last state flushes, as if the process died before them.
        fs::write(&state_path, snapshot).unwrap();
    }

    let storage = open_storage(temp_dir.path(), 1 << 20, false);
    assert_eq!(storage.count().unwrap(), 3);
    assert_eq!(storage.bytes().unwrap(), 3 * 14);

    storage.push(&[9; 10]).unwrap();
    for expected in [0u8, 1, 2, 9] {
        assert_eq!(pop_bytes(&storage).unwrap(), vec![expected; 10]);
    }
    assert!(pop_bytes(&storage).is_none());
}

#[test]
fn test_torn_state_file_starts_empty() {
    let temp_dir = TempDir::new().unwrap();
    {
        let storage = open_storage(temp_dir.path(), 512, false);
        storage.push(&[1u8; 600]).unwrap();
        storage.close().unwrap();
    }
    fs::write(temp_dir.path().join("state"), b"torn").unwrap();

    let storage = open_storage(temp_dir.path(), 512, false);
    assert_eq!(storage.count().unwrap(), 0);
    assert!(pop_bytes(&storage).is_none());
    assert!(storage.push(b"fresh").unwrap());
    assert_eq!(pop_bytes(&storage).unwrap(), b"fresh");
}

#[test]
fn test_clear_deletes_all_files() {
    let temp_dir = TempDir::new().unwrap();
    let storage = open_storage(temp_dir.path(), 512, false);
    let record = vec![b'a'; 512];

    for _ in 0..5 {
        storage.push(&record).unwrap();
    }
    storage.clear().unwrap();

    assert_eq!(storage.bytes().unwrap(), 0);
    assert_eq!(storage.count().unwrap(), 0);
    assert_eq!(list_files(temp_dir.path()), ["state"]);

    for _ in 0..5 {
        storage.push(&record).unwrap();
    }
    assert_eq!(storage.bytes().unwrap(), 5 * 516);
    assert_eq!(storage.count().unwrap(), 5);
}

#[test]
fn test_full_queue_rejects() {
    let temp_dir = TempDir::new().unwrap();
    let storage = open_storage(temp_dir.path(), MIN_QUEUE_SIZE, false);

    for i in 0..121u32 {
        assert!(storage.push(&[(i % 256) as u8; 508]).unwrap(), "push {i}");
    }
    assert_eq!(storage.count().unwrap(), 121);
    assert_eq!(storage.bytes().unwrap(), MIN_QUEUE_SIZE);
    assert_eq!(storage.files().unwrap(), 121);

    assert!(!storage.push(b"x").unwrap());
    assert_eq!(storage.count().unwrap(), 121);
    assert_eq!(storage.bytes().unwrap(), MIN_QUEUE_SIZE);

    assert_eq!(pop_bytes(&storage).unwrap(), vec![0u8; 508]);
    assert!(storage.push(&[200u8; 508]).unwrap());
}

#[test]
fn test_full_queue_evicts_oldest() {
    let temp_dir = TempDir::new().unwrap();
    let storage = open_storage(temp_dir.path(), MIN_QUEUE_SIZE, true);

    for i in 0..122u32 {
        assert!(storage.push(&[(i % 256) as u8; 508]).unwrap());
    }
    assert_eq!(storage.count().unwrap(), 121);
    assert_eq!(storage.bytes().unwrap(), MIN_QUEUE_SIZE);
    assert_eq!(pop_bytes(&storage).unwrap(), vec![1u8; 508]);
}

#[test]
fn test_eviction_never_exceeds_budget() {
    let temp_dir = TempDir::new().unwrap();
    let storage = open_storage(temp_dir.path(), MIN_QUEUE_SIZE, true);

    for i in 0..2000usize {
        let len = 1 + (i * 37) % 900;
        assert!(storage.push(&vec![7u8; len]).unwrap());
        assert!(storage.bytes().unwrap() <= MIN_QUEUE_SIZE);
        assert!(storage.files().unwrap() <= 121);
    }

    let mut popped = 0;
    while pop_bytes(&storage).is_some() {
        popped += 1;
    }
    assert!(popped > 0);
    assert_eq!(storage.count().unwrap(), 0);
}

#[test]
fn test_budget_sized_record_evicts_current_file() {
    let temp_dir = TempDir::new().unwrap();
    let storage = open_storage(temp_dir.path(), MIN_QUEUE_SIZE, true);
    let big = vec![3u8; (MIN_QUEUE_SIZE - 4) as usize];

    storage.push(b"small").unwrap();
    assert!(storage.push(&big).unwrap());
    assert_eq!(storage.count().unwrap(), 1);
    assert_eq!(storage.bytes().unwrap(), MIN_QUEUE_SIZE);
    assert_eq!(pop_bytes(&storage).unwrap(), big);
    assert_eq!(storage.bytes().unwrap(), 0);
}

#[test]
fn test_corrupted_file_is_quarantined() {
    let temp_dir = TempDir::new().unwrap();
    let storage = open_storage(temp_dir.path(), 512, false);
    let record = vec![b'a'; 512];

    for _ in 0..5 {
        storage.push(&record).unwrap();
    }
    corrupt_first_frame(&temp_dir.path().join("data00"));

    // Each pop fails twice (first attempt and retry) before reporting.
    for _ in 0..31 {
        let mut out = Buffer::new();
        assert!(matches!(
            storage.pop(&mut out).unwrap_err(),
            QueueError::CorruptedRecord { .. }
        ));
    }
    assert!(storage.corrupted_files().unwrap().is_empty());

    let mut out = Buffer::new();
    assert!(storage.pop(&mut out).is_err());

    let corrupted = list_files(temp_dir.path())
        .into_iter()
        .filter(|name| name.ends_with(".corrupted"))
        .collect::<Vec<_>>();
    assert_eq!(corrupted.len(), 1);
    assert!(corrupted[0].starts_with("data00."));

    assert_eq!(storage.count().unwrap(), 4);
    for _ in 0..4 {
        assert_eq!(pop_bytes(&storage).unwrap(), record);
    }
    assert!(pop_bytes(&storage).is_none());
}

#[test]
fn test_corrupted_write_file_resets_queue() {
    let temp_dir = TempDir::new().unwrap();
    let storage = QueueBuilder::new()
        .directory(temp_dir.path())
        .corruption_threshold(4)
        .build_storage()
        .unwrap();

    for i in 0..3u8 {
        storage.push(&[i; 20]).unwrap();
    }
    corrupt_first_frame(&temp_dir.path().join("data00"));

    for _ in 0..2 {
        let mut out = Buffer::new();
        assert!(storage.pop(&mut out).is_err());
    }

    assert_eq!(storage.count().unwrap(), 0);
    assert_eq!(storage.corrupted_files().unwrap().len(), 1);
    assert!(!temp_dir.path().join("data00").exists());

    storage.push(b"again").unwrap();
    assert_eq!(pop_bytes(&storage).unwrap(), b"again");
}

#[test]
fn test_disk_failure_spills_to_memory() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path().join("queue");
    let queue = QueueBuilder::new()
        .directory(&dir)
        .fallback_capacity(1024)
        .build_blocking()
        .unwrap();

    fs::remove_dir_all(&dir).unwrap();
    fs::write(&dir, b"not a directory").unwrap();

    assert!(queue.push(b"spilled").unwrap());
    assert_eq!(queue.fallback().unwrap().count().unwrap(), 1);

    let mut out = Buffer::new();
    assert!(queue.pop(&mut out).unwrap());
    assert_eq!(out.as_slice(), b"spilled");

    fs::remove_file(&dir).unwrap();
    queue.reopen().unwrap();
    assert!(queue.push(b"durable").unwrap());
    assert_eq!(queue.queue().count().unwrap(), 1);
    assert_eq!(queue.fallback().unwrap().count().unwrap(), 0);
}

#[test]
fn test_paused_blocking_pop_times_out() {
    let temp_dir = TempDir::new().unwrap();
    let queue = QueueBuilder::new()
        .directory(temp_dir.path())
        .build_blocking()
        .unwrap();
    queue.push(b"waiting").unwrap();
    queue.set_pop_paused(true);

    let mut out = Buffer::new();
    let start = Instant::now();
    assert!(
        !queue
            .blocking_pop(&mut out, Some(Duration::from_millis(10)))
            .unwrap()
    );
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(10));
    assert!(elapsed < Duration::from_secs(5));
    assert_eq!(queue.count().unwrap(), 1);

    queue.set_pop_paused(false);
    assert!(
        queue
            .blocking_pop(&mut out, Some(Duration::from_millis(10)))
            .unwrap()
    );
    assert_eq!(out.as_slice(), b"waiting");
}

#[test]
fn test_producer_consumer_threads() {
    let temp_dir = TempDir::new().unwrap();
    let queue = Arc::new(
        QueueBuilder::new()
            .directory(temp_dir.path())
            .max_size(1 << 20)
            .build(|| StringSerializer)
            .unwrap(),
    );

    let producer = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || {
            for i in 0..500 {
                assert!(queue.push(&format!("item-{i}")).unwrap());
            }
        })
    };

    for i in 0..500 {
        let item = queue
            .blocking_pop(Some(Duration::from_secs(10)))
            .unwrap()
            .unwrap();
        assert_eq!(item, format!("item-{i}"));
    }
    producer.join().unwrap();
    assert_eq!(queue.count().unwrap(), 0);
}

#[test]
fn test_ephemeral_queue_removed_on_close() {
    let queue = QueueBuilder::new().build(|| StringSerializer).unwrap();
    let dir = queue.raw().queue().path();
    queue.push(&"transient".to_string()).unwrap();
    assert!(dir.join("state").exists());

    queue.close().unwrap();
    assert!(!dir.exists());
    assert!(matches!(queue.pop().unwrap_err(), QueueError::Closed));
}
