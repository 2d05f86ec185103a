mod common;

use common::{suspect, Harness};

#[tokio::test]
async fn test_sweep_retries_newest_first_and_clears_on_success() {
    let h = Harness::new(false).await;
    h.ledger
        .insert_alarms(vec![suspect("OLDER", 5), suspect("NEWEST", 1), suspect("MIDDLE", 3)])
        .await
        .unwrap();

    let summary = h.state.sweeper.sweep().await.unwrap().unwrap();

    assert_eq!(summary.pending, 3);
    assert_eq!(summary.dispatched, 3);
    assert_eq!(summary.succeeded, 3);
    assert_eq!(h.located(), vec!["NEWEST", "MIDDLE", "OLDER"]);
    for guid in ["NEWEST", "MIDDLE", "OLDER"] {
        assert_eq!(
            h.ledger.get(guid).await.unwrap().unwrap().video.as_deref(),
            Some(format!("https://cdn.example/videos/{guid}.mp4").as_str())
        );
    }
    assert_eq!(h.state.sweeper.tracker().stats().await.total_tracked, 0);
    assert_eq!(h.state.service.metrics().runs("success"), 3);
}

#[tokio::test]
async fn test_failed_retries_are_counted_until_the_cap() {
    let h = Harness::with_config(true, |c| c.retry.max_retries = 2).await;
    h.ledger.insert_alarms(vec![suspect("G1", 1)]).await.unwrap();

    let first = h.state.sweeper.sweep().await.unwrap().unwrap();
    assert_eq!((first.dispatched, first.failed), (1, 1));
    assert_eq!(h.state.sweeper.tracker().count("G1").await, 1);

    let second = h.state.sweeper.sweep().await.unwrap().unwrap();
    assert_eq!(second.dispatched, 1);
    assert_eq!(h.state.sweeper.tracker().count("G1").await, 2);

    let third = h.state.sweeper.sweep().await.unwrap().unwrap();
    assert_eq!(third.pending, 1);
    assert_eq!(third.exhausted, 1);
    assert_eq!(third.dispatched, 0);
    assert_eq!(h.located().len(), 2);
    assert_eq!(h.state.service.metrics().runs("no_video_found"), 2);
}

#[tokio::test]
async fn test_sweep_ignores_alarms_outside_lookback_or_with_video() {
    let h = Harness::new(false).await;
    let mut done = suspect("DONE", 1);
    done.video = Some("https://cdn.example/old.mp4".to_string());
    let mut confirmed = suspect("CONFIRMED", 1);
    confirmed.state = "Confirmada".to_string();
    h.ledger
        .insert_alarms(vec![suspect("STALE", 72), done, confirmed, suspect("FRESH", 2)])
        .await
        .unwrap();

    let summary = h.state.sweeper.sweep().await.unwrap().unwrap();

    assert_eq!(summary.pending, 1);
    assert_eq!(h.located(), vec!["FRESH"]);
}

#[tokio::test]
async fn test_retry_counts_survive_a_restart() {
    let h = Harness::with_config(true, |c| c.retry.max_retries = 1).await;
    h.ledger.insert_alarms(vec![suspect("G1", 1)]).await.unwrap();
    h.state.sweeper.sweep().await.unwrap().unwrap();

    let reloaded = evidence_api::retry::RetryTracker::load(&h.config.retry.tracker_path).await;
    assert_eq!(reloaded.count("G1").await, 1);
}

#[tokio::test]
async fn test_empty_ledger_sweeps_cleanly() {
    let h = Harness::new(false).await;
    let summary = h.state.sweeper.sweep().await.unwrap().unwrap();
    assert_eq!(summary, evidence_api::retry::SweepSummary::default());
    assert!(!h.state.sweeper.is_running());
}
