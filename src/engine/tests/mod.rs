use super::test_helpers::*;
use crate::config::Config;
use crate::db::Database;
use crate::error::{DownloadError, Error, TransferError};
use crate::notifications::{NotificationAction, NotificationId};
use crate::policy::NetworkFacts;
use crate::test_support::{FacadeCall, FakeFacade};
use crate::types::{BroadcastKind, NetworkType, PauseReason, Status, Visibility};
use std::time::Duration;

fn active_id(owner: &str) -> NotificationId {
    NotificationId::Active {
        owner: owner.to_string(),
    }
}

/// Poll until the facade has seen `passes` scheduling passes
async fn wait_for_passes(facade: &FakeFacade, passes: usize) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while facade.passes() < passes {
        assert!(
            tokio::time::Instant::now() < deadline,
            "only {} passes ran, expected {passes}",
            facade.passes()
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_single_slot_admits_oldest_pending() {
    let (engine, facade, transport, _dir) = create_test_engine().await;
    facade.set_max_concurrent(1);

    let mut ids = Vec::new();
    for name in ["t1", "t2", "t3"] {
        ids.push(engine.enqueue(request(name, 1_000)).await.unwrap());
    }

    let report = engine.run_pass().await.unwrap();

    assert_eq!(report.admitted, vec![ids[0]]);
    assert_eq!(report.running, 1);
    assert_eq!(engine.get(ids[0]).await.unwrap().status, Status::Running);
    assert_eq!(engine.get(ids[1]).await.unwrap().status, Status::Pending);
    assert_eq!(engine.get(ids[2]).await.unwrap().status, Status::Pending);

    wait_for_handle(&transport, ids[0]).await;
    assert_eq!(transport.started(), vec![ids[0]]);
    assert_eq!(engine.active_worker_count().await, 1);
}

#[tokio::test]
async fn test_oversized_download_on_mobile_waits() {
    let (engine, facade, transport, _dir) = create_test_engine().await;
    facade.set_facts(NetworkFacts {
        active: Some(NetworkType::Mobile),
        max_bytes_over_mobile: Some(1_000_000),
        ..Default::default()
    });

    let id = engine.enqueue(request("big", 2_000_000)).await.unwrap();
    engine.run_pass().await.unwrap();

    let task = engine.get(id).await.unwrap();
    assert_eq!(task.status, Status::PausedNetwork);
    assert_eq!(task.pause_reason, Some(PauseReason::ExceedsMobileLimit));
    assert!(transport.started().is_empty());

    let (_, content) = facade
        .posts()
        .into_iter()
        .rfind(|(nid, _)| *nid == active_id("app1"))
        .unwrap();
    assert_eq!(
        content.text,
        engine.config().notifications.paused_exceeds_mobile_limit
    );
    assert_eq!(content.progress, None);

    // Wifi comes back: released and admitted in the same pass
    facade.set_facts(NetworkFacts {
        active: Some(NetworkType::Wifi),
        ..Default::default()
    });
    let report = engine.run_pass().await.unwrap();
    assert_eq!(report.admitted, vec![id]);
    let task = engine.get(id).await.unwrap();
    assert_eq!(task.status, Status::Running);
    assert_eq!(task.pause_reason, None);
}

#[tokio::test]
async fn test_running_downloads_of_one_owner_share_a_notification() {
    let (engine, facade, _transport, _dir) = create_test_engine().await;

    engine.enqueue(request("fileA", 1_000)).await.unwrap();
    engine.enqueue(request("fileB", 3_000)).await.unwrap();
    let report = engine.run_pass().await.unwrap();
    assert_eq!(report.running, 2);

    let posts: Vec<_> = facade
        .posts()
        .into_iter()
        .filter(|(nid, _)| *nid == active_id("app1"))
        .collect();
    assert_eq!(posts.len(), 1);
    let content = &posts[0].1;
    assert_eq!(content.title, "2 files downloading");
    assert_eq!(content.text, "fileA and more");
    assert_eq!(content.progress.unwrap().total, 4_000);

    // Nothing changed: the next pass posts nothing
    facade.take_calls();
    let report = engine.run_pass().await.unwrap();
    assert_eq!(report.notifications.posted, 0);
    assert!(facade.posts().is_empty());
}

#[tokio::test]
async fn test_retries_exhausted_becomes_fatal() {
    let mut config = Config::default();
    config.retry.jitter = false;
    config.retry.max_attempts = 1;
    let (engine, facade, transport, _dir) = create_test_engine_with(config).await;

    let req = request("flaky", 1_000);
    transport.script(
        &req.source_uri,
        Script::Fail(TransferError::Transient("503".to_string())),
    );
    let id = engine.enqueue(req).await.unwrap();

    engine.run_pass().await.unwrap();
    wait_for_status(&engine, id, Status::PausedRetry).await;
    let task = engine.get(id).await.unwrap();
    assert_eq!(task.retry_count, 1);
    assert_eq!(task.backoff_ms, 30_000);

    // Backoff not yet elapsed
    engine.run_pass().await.unwrap();
    assert_eq!(engine.get(id).await.unwrap().status, Status::PausedRetry);

    facade.advance(31_000);
    engine.run_pass().await.unwrap();
    wait_for_status(&engine, id, Status::ErrorFatal).await;

    let task = engine.get(id).await.unwrap();
    assert_eq!(task.retry_count, 2);
    assert!(
        task.error_message
            .as_deref()
            .unwrap()
            .starts_with("retries exhausted")
    );
    assert!(
        facade
            .broadcasts()
            .contains(&(BroadcastKind::DownloadComplete, id))
    );
}

#[tokio::test]
async fn test_cancel_running_rejects_later_progress() {
    let (engine, facade, transport, _dir) = create_test_engine().await;

    let id = engine.enqueue(request("movie", 1_000)).await.unwrap();
    engine.run_pass().await.unwrap();
    let handle = wait_for_handle(&transport, id).await;

    assert!(handle.report_progress(100, None).await.unwrap());

    engine.cancel(id).await.unwrap();
    assert_eq!(engine.get(id).await.unwrap().status, Status::Cancelled);

    assert!(!handle.report_progress(200, None).await.unwrap());
    let task = engine.get(id).await.unwrap();
    assert_eq!(task.current_bytes, 100);
    assert_eq!(task.status, Status::Cancelled);

    wait_for_idle(&engine).await;
    assert!(
        facade
            .broadcasts()
            .contains(&(BroadcastKind::DownloadComplete, id))
    );
}

#[tokio::test]
async fn test_cancelling_finished_download_is_rejected() {
    let (engine, _facade, _transport, _dir) = create_test_engine().await;
    let id = engine.enqueue(request("a", 1_000)).await.unwrap();
    engine.cancel(id).await.unwrap();

    let err = engine.cancel(id).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Download(DownloadError::InvalidTransition {
            from: Status::Cancelled,
            ..
        })
    ));
}

#[tokio::test]
async fn test_successful_transfer_posts_completion_notice() {
    let (engine, facade, transport, _dir) = create_test_engine().await;

    let mut req = request("report.pdf", 1_000);
    req.visibility = Visibility::VisibleNotifyCompleted;
    transport.script(&req.source_uri, Script::Complete(1_000));
    let id = engine.enqueue(req).await.unwrap();

    engine.run_pass().await.unwrap();
    wait_for_status(&engine, id, Status::Success).await;
    wait_for_idle(&engine).await;

    let task = engine.get(id).await.unwrap();
    assert_eq!(task.current_bytes, 1_000);
    assert_eq!(task.total_bytes, 1_000);
    assert!(
        facade
            .broadcasts()
            .contains(&(BroadcastKind::DownloadComplete, id))
    );

    facade.take_calls();
    engine.run_pass().await.unwrap();

    let calls = facade.calls();
    assert!(calls.contains(&FacadeCall::Cancel(active_id("app1"))));
    let notice = facade
        .posts()
        .into_iter()
        .find(|(nid, _)| *nid == NotificationId::Completed { id })
        .map(|(_, content)| content)
        .unwrap();
    assert_eq!(notice.title, "report.pdf");
    assert_eq!(notice.text, "Download complete");
    assert_eq!(notice.content_action.kind, BroadcastKind::ShowList);

    // Dismiss acknowledges and withdraws the notice for good
    facade.take_calls();
    engine
        .handle_action(NotificationAction {
            kind: BroadcastKind::Dismiss,
            id,
        })
        .await
        .unwrap();
    assert!(engine.get(id).await.unwrap().acknowledged);
    assert_eq!(
        facade.calls(),
        vec![FacadeCall::Cancel(NotificationId::Completed { id })]
    );

    engine.run_pass().await.unwrap();
    assert!(facade.posts().is_empty());
}

#[tokio::test]
async fn test_fatal_failure_is_not_retried() {
    let (engine, _facade, transport, _dir) = create_test_engine().await;

    let req = request("nowhere", 1_000);
    transport.script(
        &req.source_uri,
        Script::Fail(TransferError::Fatal("disk full".to_string())),
    );
    let id = engine.enqueue(req).await.unwrap();

    engine.run_pass().await.unwrap();
    wait_for_status(&engine, id, Status::ErrorFatal).await;

    let task = engine.get(id).await.unwrap();
    assert_eq!(task.retry_count, 0);
    assert_eq!(task.error_message.as_deref(), Some("disk full"));
}

#[tokio::test]
async fn test_lowering_the_cap_demotes_and_stops_worker() {
    let (engine, facade, transport, _dir) = create_test_engine().await;

    let first = engine.enqueue(request("a", 1_000)).await.unwrap();
    let second = engine.enqueue(request("b", 1_000)).await.unwrap();
    engine.run_pass().await.unwrap();
    wait_for_handle(&transport, first).await;
    wait_for_handle(&transport, second).await;

    facade.set_max_concurrent(1);
    let report = engine.run_pass().await.unwrap();

    assert_eq!(report.running, 1);
    assert_eq!(engine.get(first).await.unwrap().status, Status::Running);
    let demoted = engine.get(second).await.unwrap();
    assert_eq!(demoted.status, Status::Pending);
    assert_eq!(demoted.started_at, None);
    assert_eq!(engine.active_worker_count().await, 1);
}

#[tokio::test]
async fn test_stopped_worker_cannot_report_after_readmission() {
    let (engine, facade, transport, _dir) = create_test_engine().await;
    facade.set_max_concurrent(2);

    let first = engine.enqueue(request("a", 1_000)).await.unwrap();
    let second = engine.enqueue(request("b", 1_000)).await.unwrap();
    engine.run_pass().await.unwrap();
    wait_for_handle(&transport, first).await;
    let stale = wait_for_handle(&transport, second).await;

    facade.set_max_concurrent(1);
    engine.run_pass().await.unwrap();
    assert_eq!(engine.get(second).await.unwrap().status, Status::Pending);

    facade.set_max_concurrent(2);
    let report = engine.run_pass().await.unwrap();
    assert_eq!(report.admitted, vec![second]);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while transport.started().iter().filter(|id| **id == second).count() < 2 {
        assert!(
            tokio::time::Instant::now() < deadline,
            "second transfer never started"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let fresh = transport.handle(second).unwrap();

    assert!(!stale.report_progress(900, None).await.unwrap());
    assert!(fresh.report_progress(400, None).await.unwrap());

    let task = engine.get(second).await.unwrap();
    assert_eq!(task.status, Status::Running);
    assert_eq!(task.current_bytes, 400);
}

#[tokio::test]
async fn test_losing_connectivity_pauses_running_download() {
    let (engine, facade, transport, _dir) = create_test_engine().await;

    let id = engine.enqueue(request("a", 1_000)).await.unwrap();
    engine.run_pass().await.unwrap();
    let handle = wait_for_handle(&transport, id).await;

    facade.set_facts(NetworkFacts::default());
    engine.run_pass().await.unwrap();

    let task = engine.get(id).await.unwrap();
    assert_eq!(task.status, Status::PausedNetwork);
    assert_eq!(task.pause_reason, Some(PauseReason::NoConnectivity));
    assert_eq!(engine.active_worker_count().await, 0);
    assert!(!handle.report_progress(10, None).await.unwrap());
}

#[tokio::test]
async fn test_network_flags_allow_roaming() {
    let (engine, facade, _transport, _dir) = create_test_engine().await;
    facade.set_facts(NetworkFacts {
        active: Some(NetworkType::Mobile),
        roaming: true,
        ..Default::default()
    });

    let id = engine.enqueue(request("a", 1_000)).await.unwrap();
    engine.run_pass().await.unwrap();
    assert_eq!(
        engine.get(id).await.unwrap().pause_reason,
        Some(PauseReason::RoamingRestricted)
    );

    engine.set_network_flags(id, false, true).await.unwrap();
    engine.run_pass().await.unwrap();
    assert_eq!(engine.get(id).await.unwrap().status, Status::Running);
}

#[tokio::test]
async fn test_flag_change_keeps_retry_schedule() {
    let (engine, facade, transport, _dir) = create_test_engine().await;

    let req = request("flaky", 1_000);
    transport.script(
        &req.source_uri,
        Script::Fail(TransferError::Transient("503".to_string())),
    );
    let id = engine.enqueue(req).await.unwrap();
    engine.run_pass().await.unwrap();
    wait_for_status(&engine, id, Status::PausedRetry).await;
    assert_eq!(engine.get(id).await.unwrap().backoff_ms, 30_000);

    facade.advance(20_000);
    engine.set_network_flags(id, true, true).await.unwrap();
    let task = engine.get(id).await.unwrap();
    assert_eq!(task.status, Status::PausedRetry);
    assert!(task.allow_metered);

    // 31s after the failure the original 30s backoff is over
    facade.advance(11_000);
    let report = engine.run_pass().await.unwrap();
    assert_eq!(report.admitted, vec![id]);
}

#[tokio::test]
async fn test_delete_removes_record_and_worker() {
    let (engine, _facade, transport, _dir) = create_test_engine().await;

    let id = engine.enqueue(request("a", 1_000)).await.unwrap();
    engine.run_pass().await.unwrap();
    wait_for_handle(&transport, id).await;

    engine.delete(id).await.unwrap();

    assert_eq!(engine.active_worker_count().await, 0);
    assert!(matches!(
        engine.get(id).await,
        Err(Error::Download(DownloadError::NotFound { .. }))
    ));
    assert!(engine.delete(id).await.is_err());
}

#[tokio::test]
async fn test_enqueue_rejects_empty_source() {
    let (engine, _facade, _transport, _dir) = create_test_engine().await;
    let mut req = request("a", 1_000);
    req.source_uri = "  ".to_string();
    assert!(engine.enqueue(req).await.is_err());
    assert!(engine.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_show_list_action_is_forwarded() {
    let (engine, facade, _transport, _dir) = create_test_engine().await;
    let id = engine.enqueue(request("a", 1_000)).await.unwrap();

    engine
        .handle_action(NotificationAction {
            kind: BroadcastKind::ShowList,
            id,
        })
        .await
        .unwrap();

    assert_eq!(facade.broadcasts(), vec![(BroadcastKind::ShowList, id)]);
    assert!(
        engine
            .handle_action(NotificationAction {
                kind: BroadcastKind::DownloadComplete,
                id,
            })
            .await
            .is_err()
    );
}

#[tokio::test]
async fn test_interrupted_downloads_are_requeued_on_startup() {
    let (engine, _facade, transport, dir) = create_test_engine().await;

    let id = engine.enqueue(request("a", 1_000)).await.unwrap();
    engine.run_pass().await.unwrap();
    wait_for_handle(&transport, id).await;
    assert_eq!(engine.get(id).await.unwrap().status, Status::Running);

    // A second process opening the same store finds no worker for it
    let mut config = Config::default();
    config.persistence.database_path = dir.path().join("test.db");
    let restarted = super::DownloadEngine::new(
        config,
        std::sync::Arc::new(crate::test_support::FakeFacade::new()),
        std::sync::Arc::new(ScriptedTransport::new()),
    )
    .await
    .unwrap();

    let task = restarted.get(id).await.unwrap();
    assert_eq!(task.status, Status::Pending);
    assert_eq!(task.started_at, None);
}

#[tokio::test]
async fn test_pass_loop_drives_downloads_to_completion() {
    let (engine, _facade, transport, _dir) = create_test_engine().await;
    engine.start().await;

    let req = request("a", 1_000);
    transport.script(&req.source_uri, Script::Complete(1_000));
    let id = engine.enqueue(req).await.unwrap();

    wait_for_status(&engine, id, Status::Success).await;
    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_pass_requests_during_a_pass_coalesce() {
    let mut config = Config::default();
    config.retry.jitter = false;
    config.engine.pass_interval = Duration::from_secs(3600);
    let (engine, facade, _transport, _dir) = create_test_engine_with(config).await;

    engine.start().await;
    // The interval's first tick is immediate
    wait_for_passes(&facade, 1).await;

    let guard = engine.workers.pass_lock.lock().await;
    engine.request_pass();
    // Let the loop wake and block on the held pass lock
    tokio::time::sleep(Duration::from_millis(50)).await;
    for _ in 0..5 {
        engine.request_pass();
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(facade.passes(), 1);

    drop(guard);
    wait_for_passes(&facade, 3).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(facade.passes(), 3);

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_requeues_and_refuses_new_work() {
    let (engine, facade, transport, dir) = create_test_engine().await;

    let id = engine.enqueue(request("a", 1_000)).await.unwrap();
    engine.run_pass().await.unwrap();
    wait_for_handle(&transport, id).await;

    engine.shutdown().await.unwrap();

    assert!(engine.is_shutting_down());
    assert!(matches!(
        engine.enqueue(request("b", 1_000)).await,
        Err(Error::ShuttingDown)
    ));
    assert_eq!(engine.active_worker_count().await, 0);
    assert_eq!(facade.calls().last(), Some(&FacadeCall::CancelAll));

    let db = Database::new(&dir.path().join("test.db")).await.unwrap();
    let task = db.get_download(id).await.unwrap().unwrap();
    assert_eq!(task.status, Status::Pending);
    db.close().await;
}
