use mpacklog::{read_log, record, AsyncLogger, Error, LoggerState, SyncLogger, Value};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;

fn read_all(path: &Path) -> Vec<Value> {
    read_log(path)
        .unwrap()
        .collect::<Result<_, _>>()
        .expect("log decodes")
}

fn foo_records(n: i64) -> Vec<Value> {
    (0..n).map(|foo| record! { "foo" => foo, "something" => "else" }).collect()
}

#[test]
fn test_sync_put_then_write() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("log.mpack");

    let mut logger = SyncLogger::create(&path).unwrap();
    logger.put(record! { "foo" => 0, "something" => "else" }).unwrap();
    logger.put(record! { "foo" => 1, "something" => "else" }).unwrap();
    assert_eq!(logger.pending(), 2);
    assert_eq!(fs::metadata(&path).unwrap().len(), 0, "put must not write");

    logger.write().unwrap();
    assert_eq!(logger.pending(), 0);
    assert_eq!(
        read_all(&path),
        vec![
            record! { "foo" => 0, "something" => "else" },
            record! { "foo" => 1, "something" => "else" },
        ]
    );
}

#[test]
fn test_sync_create_makes_empty_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("log.mpack");
    assert!(!path.exists());

    let mut logger = SyncLogger::create(&path).unwrap();
    logger.write().unwrap();
    assert!(path.exists());
    assert!(read_all(&path).is_empty());
}

#[test]
fn test_sync_refuses_existing_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("log.mpack");
    fs::write(&path, b"keep me").unwrap();

    let err = SyncLogger::create(&path).unwrap_err();
    assert!(matches!(err, Error::Config(_)), "got {:?}", err);
    assert_eq!(fs::read(&path).unwrap(), b"keep me");
}

#[test]
fn test_sync_write_with_empty_queue_leaves_file_unchanged() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("log.mpack");
    let mut logger = SyncLogger::create(&path).unwrap();
    logger.put(record! { "x" => 1 }).unwrap();
    logger.write().unwrap();
    let before = fs::read(&path).unwrap();

    logger.write().unwrap();
    logger.write().unwrap();
    assert_eq!(fs::read(&path).unwrap(), before);
}

#[test]
fn test_sync_rejects_non_records() {
    let dir = tempdir().unwrap();
    let mut logger = SyncLogger::create(dir.path().join("log.mpack")).unwrap();

    let err = logger.put(Value::from(42)).unwrap_err();
    assert!(matches!(err, Error::InvalidRecord(_)));
    let err = logger.put(Value::Array(vec![record! {}])).unwrap_err();
    assert!(matches!(err, Error::InvalidRecord(_)));
    assert_eq!(logger.pending(), 0, "rejected values must not be queued");
}

#[test]
fn test_sync_put_and_write() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("log.mpack");
    let mut logger = SyncLogger::create(&path).unwrap();

    logger.put(record! { "a" => 1 }).unwrap();
    logger.put_and_write(record! { "b" => 2 }).unwrap();
    assert_eq!(logger.pending(), 0);
    assert_eq!(read_all(&path), vec![record! { "a" => 1 }, record! { "b" => 2 }]);
}

#[tokio::test]
async fn test_async_put_queues_without_writing() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("log.mpack");
    let logger = AsyncLogger::create(&path).await.unwrap();
    assert_eq!(logger.state(), LoggerState::Open);

    logger.put(record! { "foo" => 42, "something" => "else" }).unwrap();
    // The current-thread runtime has not run the write loop yet.
    assert_eq!(logger.pending(), 1);

    logger.stop().await.unwrap();
    assert_eq!(read_all(&path), vec![record! { "foo" => 42, "something" => "else" }]);
}

#[tokio::test]
async fn test_async_stop_without_records_creates_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("log.mpack");
    let logger = AsyncLogger::create(&path).await.unwrap();
    logger.stop().await.unwrap();
    assert!(path.exists());
    assert_eq!(fs::metadata(&path).unwrap().len(), 0);
}

#[tokio::test]
async fn test_async_no_loss_before_stop() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("log.mpack");
    let logger = AsyncLogger::create(&path).await.unwrap();

    let records = foo_records(1000);
    for (i, r) in records.iter().enumerate() {
        logger.put(r.clone()).unwrap();
        if i % 100 == 0 {
            tokio::task::yield_now().await;
        }
    }
    logger.stop().await.unwrap();

    assert_eq!(logger.state(), LoggerState::Closed);
    assert_eq!(read_all(&path), records);
}

#[tokio::test]
async fn test_async_flush_writes_pending_records() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("log.mpack");
    let logger = AsyncLogger::create(&path).await.unwrap();

    for r in foo_records(3) {
        logger.put(r).unwrap();
    }
    logger.flush().await.unwrap();
    assert_eq!(logger.pending(), 0);
    assert_eq!(read_all(&path), foo_records(3));
    assert_eq!(logger.state(), LoggerState::Open, "flush does not stop the loop");

    logger.put(record! { "foo" => 3, "something" => "else" }).unwrap();
    logger.stop().await.unwrap();
    assert_eq!(read_all(&path), foo_records(4));
}

#[tokio::test]
async fn test_async_flush_with_empty_queue_leaves_file_unchanged() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("log.mpack");
    let logger = AsyncLogger::create(&path).await.unwrap();
    logger.put(record! { "x" => 1 }).unwrap();
    logger.flush().await.unwrap();
    let before = fs::read(&path).unwrap();

    logger.flush().await.unwrap();
    assert_eq!(fs::read(&path).unwrap(), before);
    logger.stop().await.unwrap();
    assert_eq!(fs::read(&path).unwrap(), before);
}

#[tokio::test]
async fn test_async_put_after_stop_fails() {
    let dir = tempdir().unwrap();
    let logger = AsyncLogger::create(dir.path().join("log.mpack")).await.unwrap();
    logger.stop().await.unwrap();

    assert!(matches!(logger.put(record! { "x" => 1 }), Err(Error::LoggerClosed)));
    assert!(matches!(logger.flush().await, Err(Error::LoggerClosed)));
    // A second stop is a no-op.
    logger.stop().await.unwrap();
}

#[tokio::test]
async fn test_async_rejects_non_records() {
    let dir = tempdir().unwrap();
    let logger = AsyncLogger::create(dir.path().join("log.mpack")).await.unwrap();
    assert!(matches!(logger.put(Value::from("text")), Err(Error::InvalidRecord(_))));
    assert_eq!(logger.pending(), 0);
    assert_eq!(logger.state(), LoggerState::Open);
    logger.stop().await.unwrap();
}

#[tokio::test]
async fn test_async_create_truncates() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("log.mpack");
    fs::write(&path, b"stale bytes").unwrap();

    let logger = AsyncLogger::create(&path).await.unwrap();
    logger.put(record! { "fresh" => true }).unwrap();
    logger.stop().await.unwrap();
    assert_eq!(read_all(&path), vec![record! { "fresh" => true }]);
}

#[tokio::test]
async fn test_sync_and_async_outputs_are_identical() {
    let dir = tempdir().unwrap();
    let sync_path = dir.path().join("sync.mpack");
    let async_path = dir.path().join("async.mpack");
    let records: Vec<Value> = (0..50)
        .map(|i| {
            record! {
                "i" => i,
                "position" => vec![Value::from(0.1 * i as f64), Value::from(-2.5f32)],
                "state" => record! { "ok" => i % 3 == 0, "label" => format!("step {}", i) },
            }
        })
        .collect();

    let mut sync_logger = SyncLogger::create(&sync_path).unwrap();
    let async_logger = AsyncLogger::create(&async_path).await.unwrap();
    for (i, r) in records.iter().enumerate() {
        sync_logger.put(r.clone()).unwrap();
        async_logger.put(r.clone()).unwrap();
        if i % 7 == 0 {
            sync_logger.write().unwrap();
            async_logger.flush().await.unwrap();
        }
    }
    sync_logger.write().unwrap();
    async_logger.stop().await.unwrap();

    assert_eq!(fs::read(&sync_path).unwrap(), fs::read(&async_path).unwrap());
    assert_eq!(read_all(&sync_path), records);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_async_concurrent_producers_keep_their_order() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("log.mpack");
    let logger = Arc::new(AsyncLogger::create(&path).await.unwrap());

    let producers: Vec<_> = (0..4)
        .map(|producer| {
            let logger = logger.clone();
            tokio::spawn(async move {
                for seq in 0..250 {
                    logger.put(record! { "producer" => producer, "seq" => seq }).unwrap();
                    if seq % 10 == 0 {
                        tokio::task::yield_now().await;
                    }
                }
            })
        })
        .collect();
    for producer in producers {
        producer.await.unwrap();
    }
    logger.stop().await.unwrap();

    let written = read_all(&path);
    assert_eq!(written.len(), 1000);
    for producer in 0..4i64 {
        let seqs: Vec<i64> = written
            .iter()
            .filter(|r| r.get("producer").and_then(Value::as_i64) == Some(producer))
            .map(|r| r.get("seq").and_then(Value::as_i64).unwrap())
            .collect();
        assert_eq!(seqs, (0..250).collect::<Vec<_>>());
    }
}

#[tokio::test]
async fn test_async_drop_still_writes_queue() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("log.mpack");
    {
        let logger = AsyncLogger::create(&path).await.unwrap();
        logger.put(record! { "last" => "words" }).unwrap();
    }
    // Give the detached write loop a chance to run its final drain.
    for _ in 0..100 {
        if !read_all(&path).is_empty() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(read_all(&path), vec![record! { "last" => "words" }]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_stops_both_wait_for_final_drain() {
    let payload = "x".repeat(4096);
    for round in 0..20 {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.mpack");
        let logger = Arc::new(AsyncLogger::create(&path).await.unwrap());
        for i in 0..200 {
            logger.put(record! { "i" => i, "payload" => payload.as_str() }).unwrap();
        }

        let stoppers: Vec<_> = (0..2)
            .map(|_| {
                let logger = logger.clone();
                let path = path.clone();
                tokio::spawn(async move {
                    logger.stop().await.unwrap();
                    read_all(&path).len()
                })
            })
            .collect();
        for stopper in stoppers {
            let on_disk = stopper.await.unwrap();
            assert_eq!(on_disk, 200, "round {}: stop returned before the final drain", round);
        }
        assert_eq!(logger.state(), LoggerState::Closed);
    }
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_async_write_failure_closes_logger() {
    let logger = AsyncLogger::create("/dev/full").await.unwrap();
    logger.put(record! { "x" => 1 }).unwrap();

    let flushed = logger.flush().await;
    assert!(matches!(flushed, Err(Error::Io(_))), "got {:?}", flushed);
    assert_eq!(logger.state(), LoggerState::Closed);
    assert!(matches!(logger.put(record! { "x" => 2 }), Err(Error::LoggerClosed)));

    let stopped = logger.stop().await;
    assert!(matches!(stopped, Err(Error::Io(_))), "got {:?}", stopped);
}
