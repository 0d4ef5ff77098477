//! Process-level tests for the streaming sink bridge, using POSIX shell
//! utilities as the external consumer.
#![cfg(unix)]

use std::path::Path;
use std::time::{Duration, Instant};

use bulkbyte_engine::dialect::LoaderCommand;
use bulkbyte_engine::sink::{ChannelProvisioner, SinkSession, SinkSettings, SinkState, STDIN_PATH};
use bulkbyte_engine::Context;
use bulkbyte_types::ErrorCategory;

const RECORDS: [&[u8]; 3] = [b"1\t\"a\"\n", b"2\t\"b\"\n", b"3\t\"c\"\n"];

fn settings(dir: &Path) -> SinkSettings {
    SinkSettings {
        provisioner: ChannelProvisioner::Fifo {
            dir: dir.to_path_buf(),
        },
        open_timeout: Duration::from_secs(5),
        finish_timeout: Duration::from_secs(10),
        ..SinkSettings::default()
    }
}

fn shell(script: &str, pipe: &Path) -> LoaderCommand {
    LoaderCommand {
        program: "sh".into(),
        args: vec![
            "-c".into(),
            script.into(),
            pipe.to_string_lossy().into_owned(),
        ],
        env: vec![],
    }
}

fn fifo_count(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().ends_with(".fifo"))
        .count()
}

#[tokio::test]
async fn open_without_consumer_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = SinkSession::new(
        Context::new("test", "no_consumer"),
        SinkSettings {
            open_timeout: Duration::from_millis(200),
            ..settings(dir.path())
        },
    );
    session.provision_channel().unwrap();
    assert_eq!(session.state(), SinkState::PipeReady);
    assert_eq!(fifo_count(dir.path()), 1);

    let started = Instant::now();
    let err = session.open_writer().await.unwrap_err();
    assert_eq!(err.category, ErrorCategory::Timeout);
    assert_eq!(err.code, "PIPE_OPEN_TIMEOUT");
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(session.state(), SinkState::Failed);
    assert_eq!(fifo_count(dir.path()), 0);
}

#[tokio::test]
async fn three_records_arrive_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = SinkSession::new(Context::new("test", "echo"), settings(dir.path()));
    session.provision_channel().unwrap();
    let pipe = session.pipe_path().unwrap().to_path_buf();

    session.start_consumer(&shell("cat \"$0\"", &pipe)).await.unwrap();
    assert_eq!(session.state(), SinkState::ConsumerRunning);
    session.open_writer().await.unwrap();
    assert_eq!(session.state(), SinkState::Draining);
    for record in RECORDS {
        session.write_record(record).await.unwrap();
    }

    let outcome = session.finish().await.unwrap();
    assert_eq!(session.state(), SinkState::Closed);
    assert_eq!(outcome.exit_code, 0);
    assert_eq!(outcome.records_written, 3);
    assert_eq!(outcome.bytes_written, 18);
    assert_eq!(outcome.stdout, "1\t\"a\"\n2\t\"b\"\n3\t\"c\"");
    assert!(!pipe.exists());
}

#[tokio::test]
async fn consumer_counts_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = SinkSession::new(Context::new("test", "count"), settings(dir.path()));
    session.provision_channel().unwrap();
    let pipe = session.pipe_path().unwrap().to_path_buf();
    session
        .start_consumer(&shell("wc -c < \"$0\"", &pipe))
        .await
        .unwrap();
    session.open_writer().await.unwrap();
    for record in RECORDS {
        session.write_record(record).await.unwrap();
    }
    let outcome = session.finish().await.unwrap();
    assert_eq!(outcome.stdout.trim(), "18");
}

#[tokio::test]
async fn finish_without_records_signals_end_of_input() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = SinkSession::new(Context::new("test", "empty"), settings(dir.path()));
    session.provision_channel().unwrap();
    let pipe = session.pipe_path().unwrap().to_path_buf();
    session
        .start_consumer(&shell("wc -c < \"$0\"", &pipe))
        .await
        .unwrap();
    let outcome = session.finish().await.unwrap();
    assert_eq!(outcome.stdout.trim(), "0");
    assert_eq!(session.state(), SinkState::Closed);
}

#[tokio::test]
async fn abort_after_first_record_cleans_up() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = SinkSession::new(Context::new("test", "cancel"), settings(dir.path()));
    session.provision_channel().unwrap();
    let pipe = session.pipe_path().unwrap().to_path_buf();
    session
        .start_consumer(&shell("cat \"$0\" > /dev/null; sleep 30", &pipe))
        .await
        .unwrap();
    session.open_writer().await.unwrap();
    session.write_record(RECORDS[0]).await.unwrap();

    let started = Instant::now();
    session.abort().await;
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(session.state(), SinkState::Failed);
    assert!(!pipe.exists());
    assert_eq!(fifo_count(dir.path()), 0);
}

#[tokio::test]
async fn non_zero_exit_surfaces_stderr() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = SinkSession::new(Context::new("test", "reject"), settings(dir.path()));
    session.provision_channel().unwrap();
    let pipe = session.pipe_path().unwrap().to_path_buf();
    session
        .start_consumer(&shell(
            "cat \"$0\" > /dev/null; echo 'load failed: bad row' >&2; exit 2",
            &pipe,
        ))
        .await
        .unwrap();
    session.open_writer().await.unwrap();
    session.write_record(RECORDS[0]).await.unwrap();

    let err = session.finish().await.unwrap_err();
    assert_eq!(err.category, ErrorCategory::SinkProcess);
    assert_eq!(err.code, "CONSUMER_EXIT");
    assert!(err.message.contains("load failed: bad row"));
    let details = err.details.unwrap();
    assert_eq!(details["exit_code"], 2);
    assert_eq!(details["stderr"], "load failed: bad row");
    assert_eq!(session.state(), SinkState::Failed);
    assert!(!pipe.exists());
}

#[tokio::test]
async fn consumer_exiting_before_open_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = SinkSession::new(Context::new("test", "early_exit"), settings(dir.path()));
    session.provision_channel().unwrap();
    let pipe = session.pipe_path().unwrap().to_path_buf();
    session
        .start_consumer(&shell("echo 'cannot connect' >&2; exit 4", &pipe))
        .await
        .unwrap();

    let err = session.open_writer().await.unwrap_err();
    assert_eq!(err.code, "CONSUMER_EXITED");
    assert_eq!(err.details.unwrap()["stderr"], "cannot connect");
    assert_eq!(fifo_count(dir.path()), 0);
}

#[tokio::test]
async fn consumer_that_stops_reading_fails_the_write() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = SinkSession::new(Context::new("test", "short_read"), settings(dir.path()));
    session.provision_channel().unwrap();
    let pipe = session.pipe_path().unwrap().to_path_buf();
    session
        .start_consumer(&shell("head -c 1 \"$0\" > /dev/null", &pipe))
        .await
        .unwrap();
    session.open_writer().await.unwrap();

    let record = vec![b'x'; 1024];
    let mut failure = None;
    for _ in 0..100_000 {
        if let Err(e) = session.write_record(&record).await {
            failure = Some(e);
            break;
        }
    }
    let err = failure.expect("write should fail once the consumer is gone");
    assert_eq!(err.code, "PIPE_WRITE");
    assert_eq!(session.state(), SinkState::Failed);
    assert!(!pipe.exists());
}

#[tokio::test]
async fn stdin_channel_feeds_consumer() {
    let mut session = SinkSession::new(
        Context::new("test", "stdin"),
        SinkSettings {
            provisioner: ChannelProvisioner::Stdin { capacity: 2 },
            ..SinkSettings::default()
        },
    );
    session.provision_channel().unwrap();
    assert!(session.pipe_path().is_none());
    assert_eq!(session.input_path(), Path::new(STDIN_PATH));

    session
        .start_consumer(&LoaderCommand {
            program: "wc".into(),
            args: vec!["-c".into()],
            env: vec![],
        })
        .await
        .unwrap();
    session.open_writer().await.unwrap();
    for record in RECORDS {
        session.write_record(record).await.unwrap();
    }
    let outcome = session.finish().await.unwrap();
    assert_eq!(outcome.stdout.trim(), "18");
    assert_eq!(outcome.records_written, 3);
}
