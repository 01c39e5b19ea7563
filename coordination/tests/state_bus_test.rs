//! Integration tests for the state bus over file-backed topic logs

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;

use hydra_coordination::bus::{
    BusEvent, FileEventLog, StateBus, StateBusError, TOPIC_CHECKPOINTS, TOPIC_STATUS,
};
use hydra_coordination::config::StateBusConfig;
use hydra_coordination::task::{FailureReason, TaskStatus};

fn file_bus(dir: &std::path::Path, capacity: usize) -> StateBus {
    StateBus::from_config(&StateBusConfig {
        dir: Some(dir.to_path_buf()),
        channel_capacity: capacity,
    })
}

fn moved(task_id: &str, to: TaskStatus) -> BusEvent {
    BusEvent::StatusChanged {
        task_id: task_id.to_string(),
        from: TaskStatus::Pending,
        to,
        agent: None,
    }
}

fn task_of(event: &BusEvent) -> String {
    event.task_id().unwrap_or_default().to_string()
}

#[tokio::test]
async fn test_concurrent_publishers_get_contiguous_sequences() {
    let dir = tempfile::tempdir().unwrap();
    let bus = file_bus(dir.path(), 64).shared();

    let publishers = (0..4).map(|p| {
        let bus = Arc::clone(&bus);
        tokio::spawn(async move {
            let mut seqs = Vec::new();
            for n in 0..10 {
                let event = moved(&format!("p{p}-{n}"), TaskStatus::Routed);
                seqs.push(bus.publish(TOPIC_STATUS, event).await.unwrap());
            }
            seqs
        })
    });

    for handle in publishers {
        let seqs = handle.await.unwrap();
        assert!(seqs.windows(2).all(|w| w[0] < w[1]));
    }
    assert_eq!(bus.head(TOPIC_STATUS).await.unwrap(), 40);

    let entries = bus.read(TOPIC_STATUS, 0, 100).await.unwrap();
    let seqs: Vec<u64> = entries.iter().map(|e| e.seq).collect();
    assert_eq!(seqs, (0..40).collect::<Vec<_>>());

    // Each publisher's own events keep their publication order
    let mut last_index: HashMap<String, usize> = HashMap::new();
    for entry in &entries {
        let id = task_of(&entry.event);
        let (publisher, index) = id.split_once('-').unwrap();
        let index: usize = index.parse().unwrap();
        if let Some(prev) = last_index.insert(publisher.to_string(), index) {
            assert!(prev < index);
        }
    }
}

#[tokio::test]
async fn test_topics_are_ordered_independently() {
    let dir = tempfile::tempdir().unwrap();
    let bus = file_bus(dir.path(), 64);
    bus.publish(TOPIC_STATUS, moved("t1", TaskStatus::Routed)).await.unwrap();
    let seq = bus
        .publish(
            TOPIC_CHECKPOINTS,
            BusEvent::CheckpointWritten {
                checkpoint_id: 1,
                tasks: 1,
            },
        )
        .await
        .unwrap();
    assert_eq!(seq, 0);
    assert!(dir.path().join("status.jsonl").exists());
    assert!(dir.path().join("checkpoints.jsonl").exists());
}

/// Resuming from a stored offset redelivers from that entry onward
#[tokio::test]
async fn test_resume_after_restart_from_offset() {
    let dir = tempfile::tempdir().unwrap();
    let stored_offset = {
        let bus = file_bus(dir.path(), 64);
        for n in 0..5 {
            bus.publish(TOPIC_STATUS, moved(&format!("t{n}"), TaskStatus::Routed))
                .await
                .unwrap();
        }

        let mut sub = bus.subscribe(TOPIC_STATUS, 0).unwrap();
        for _ in 0..3 {
            sub.try_next().await.unwrap().unwrap();
        }
        sub.offset()
    };
    assert_eq!(stored_offset, 3);

    // New process: sequences continue, the subscriber resumes where it left off
    let bus = file_bus(dir.path(), 64);
    let seq = bus
        .publish(TOPIC_STATUS, moved("t5", TaskStatus::Routed))
        .await
        .unwrap();
    assert_eq!(seq, 5);

    let mut sub = bus.subscribe(TOPIC_STATUS, stored_offset).unwrap();
    let mut seen = Vec::new();
    while let Some(entry) = sub.try_next().await.unwrap() {
        seen.push((entry.seq, task_of(&entry.event)));
    }
    assert_eq!(
        seen,
        vec![(3, "t3".into()), (4, "t4".into()), (5, "t5".into())]
    );
}

#[tokio::test]
async fn test_live_subscriber_follows_publications() {
    let dir = tempfile::tempdir().unwrap();
    let bus = file_bus(dir.path(), 64).shared();
    let sub = bus.subscribe(TOPIC_STATUS, 0).unwrap();

    let reader = tokio::spawn(async move {
        sub.into_stream()
            .take(20)
            .map(|entry| entry.unwrap().seq)
            .collect::<Vec<_>>()
            .await
    });

    for n in 0..20 {
        bus.publish(TOPIC_STATUS, moved(&format!("t{n}"), TaskStatus::Generating))
            .await
            .unwrap();
    }

    let seqs = tokio::time::timeout(Duration::from_secs(5), reader)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(seqs, (0..20).collect::<Vec<_>>());
}

/// A one-slot wake-up channel lags; the log still delivers everything
#[tokio::test]
async fn test_lagging_subscriber_loses_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let bus = file_bus(dir.path(), 1).shared();
    let mut sub = bus.subscribe(TOPIC_STATUS, 0).unwrap();

    for n in 0..100 {
        bus.publish(TOPIC_STATUS, moved(&format!("t{n}"), TaskStatus::Verifying))
            .await
            .unwrap();
    }

    let mut count = 0;
    while count < 100 {
        let entry = tokio::time::timeout(Duration::from_secs(5), sub.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(entry.seq, count);
        count += 1;
    }
}

#[tokio::test]
async fn test_stream_ends_when_bus_dropped() {
    let bus = StateBus::in_memory();
    bus.publish(
        TOPIC_STATUS,
        moved("t1", TaskStatus::Failed(FailureReason::Cancelled)),
    )
    .await
    .unwrap();
    let sub = bus.subscribe(TOPIC_STATUS, 0).unwrap();
    drop(bus);

    let entries: Vec<_> = sub.into_stream().collect().await;
    assert_eq!(entries.len(), 1);
}

/// A second process tails a log it does not write
#[tokio::test]
async fn test_polling_tail_sees_other_writer() {
    let dir = tempfile::tempdir().unwrap();
    let writer = file_bus(dir.path(), 64);
    let reader = file_bus(dir.path(), 64);
    let mut sub = reader
        .subscribe(TOPIC_STATUS, 0)
        .unwrap()
        .poll_every(Duration::from_millis(20));

    let tail = tokio::spawn(async move {
        let mut ids = Vec::new();
        while ids.len() < 3 {
            if let Some(entry) = sub.next().await.unwrap() {
                ids.push(task_of(&entry.event));
            }
        }
        ids
    });

    for id in ["t1", "t2", "t3"] {
        writer
            .publish(TOPIC_STATUS, moved(id, TaskStatus::Completed))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let ids = tokio::time::timeout(Duration::from_secs(5), tail)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ids, vec!["t1", "t2", "t3"]);
}

#[tokio::test]
async fn test_torn_tail_is_repaired_on_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let bus = file_bus(dir.path(), 64);
        bus.publish(TOPIC_STATUS, moved("t1", TaskStatus::Routed)).await.unwrap();
    }

    // Crash mid-append
    let path = dir.path().join("status.jsonl");
    let mut raw = tokio::fs::read(&path).await.unwrap();
    raw.extend_from_slice(b"{\"topic\":\"status\",\"seq\":1,");
    tokio::fs::write(&path, raw).await.unwrap();

    let log = FileEventLog::new(dir.path());
    let bus = StateBus::new(Arc::new(log), 64);
    assert_eq!(bus.read(TOPIC_STATUS, 0, 10).await.unwrap().len(), 1);
    let seq = bus
        .publish(TOPIC_STATUS, moved("t2", TaskStatus::Routed))
        .await
        .unwrap();
    assert_eq!(seq, 1);

    let ids: Vec<String> = bus
        .read(TOPIC_STATUS, 0, 10)
        .await
        .unwrap()
        .iter()
        .map(|e| task_of(&e.event))
        .collect();
    assert_eq!(ids, vec!["t1", "t2"]);
}

#[tokio::test]
async fn test_invalid_topics_rejected() {
    let bus = StateBus::in_memory();
    for topic in ["", "../escape", "has space", ".hidden"] {
        assert!(matches!(
            bus.subscribe(topic, 0),
            Err(StateBusError::InvalidTopic(_))
        ));
        assert!(matches!(
            bus.publish(topic, moved("t1", TaskStatus::Routed)).await,
            Err(StateBusError::InvalidTopic(_))
        ));
    }
}
