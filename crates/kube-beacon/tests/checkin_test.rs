mod common;

use std::sync::Arc;

use common::*;
use k8s_openapi::api::batch::v1::JobStatus;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube_beacon::monitor::{
    CheckinStateMachine, JobNotification, MonitorIndex, MonitorKey, MonitorSettings, Transition,
};
use kube_beacon_protocol::{CheckInId, CheckInStatus, MonitorSchedule};
use uuid::Uuid;

fn setup(backend: Arc<RecordingBackend>) -> CheckinStateMachine {
    let index = MonitorIndex::new(MonitorSettings::default());
    index.on_cronjob_added(&cronjob("nightly-backup", "0 2 * * *"));
    CheckinStateMachine::new(index, backend)
}

fn nightly_job() -> k8s_openapi::api::batch::v1::Job {
    job("nightly-backup-28512345", "nightly-backup")
}

// ============================================================================
// Full runs
// ============================================================================

#[tokio::test]
async fn test_nightly_backup_success() {
    let backend = Arc::new(RecordingBackend::new());
    let machine = setup(backend.clone());

    let started = machine.handle(&nightly_job(), JobNotification::Start).await;
    let Transition::Started(id) = started else {
        panic!("expected a start, got {started:?}");
    };

    let running = with_status(nightly_job(), 1, 0, 0);
    assert_eq!(
        machine.handle(&running, JobNotification::TerminalCheck).await,
        Transition::Unchanged
    );

    let done = with_status(nightly_job(), 0, 1, 0);
    assert_eq!(
        machine.handle(&done, JobNotification::TerminalCheck).await,
        Transition::Finished(CheckInStatus::Ok)
    );

    // Deletion after completion sends nothing more.
    assert_eq!(
        machine.handle(&done, JobNotification::TerminalRemove).await,
        Transition::Unchanged
    );

    let checkins = backend.checkins();
    assert_eq!(checkins.len(), 2);

    let start = &checkins[0];
    assert_eq!(start.check_in_id, id);
    assert_eq!(start.monitor_slug, "nightly-backup");
    assert_eq!(start.status, CheckInStatus::InProgress);
    assert_eq!(start.duration, None);
    assert_eq!(
        start.monitor_config.schedule,
        MonitorSchedule::Crontab {
            value: "0 2 * * *".to_string()
        }
    );
    assert_eq!(start.monitor_config.max_runtime, 5);
    assert_eq!(start.monitor_config.checkin_margin, 3);

    let end = &checkins[1];
    assert_eq!(end.check_in_id, id);
    assert_eq!(end.status, CheckInStatus::Ok);
    assert!(end.duration.is_some_and(|d| d >= 0.0));
}

#[tokio::test]
async fn test_failed_job_reports_error() {
    let backend = Arc::new(RecordingBackend::new());
    let machine = setup(backend.clone());

    machine.handle(&nightly_job(), JobNotification::Start).await;
    let failed = with_status(nightly_job(), 0, 0, 6);
    let transition = machine.handle(&failed, JobNotification::TerminalCheck).await;

    assert_eq!(transition, Transition::Finished(CheckInStatus::Error));
    assert_eq!(backend.checkins()[1].status, CheckInStatus::Error);
}

#[tokio::test]
async fn test_deleted_job_closes_run() {
    let backend = Arc::new(RecordingBackend::new());
    let machine = setup(backend.clone());

    machine.handle(&nightly_job(), JobNotification::Start).await;
    let transition = machine
        .handle(&with_status(nightly_job(), 0, 1, 0), JobNotification::TerminalRemove)
        .await;

    assert_eq!(transition, Transition::Finished(CheckInStatus::Ok));
    assert_eq!(backend.checkins().len(), 2);
}

#[tokio::test]
async fn test_job_deleted_while_running_drops_run() {
    let backend = Arc::new(RecordingBackend::new());
    let machine = setup(backend.clone());

    machine.handle(&nightly_job(), JobNotification::Start).await;
    let transition = machine
        .handle(&with_status(nightly_job(), 1, 0, 0), JobNotification::TerminalRemove)
        .await;

    assert_eq!(transition, Transition::Abandoned);
    // No terminal check-in is made up for a run whose outcome is unknown.
    assert_eq!(backend.checkins().len(), 1);

    let record = machine
        .index()
        .get(&MonitorKey::new(NAMESPACE, "nightly-backup"))
        .unwrap();
    assert_eq!(record.lock().await.run_count(), 0);

    // A replacement Job with the same name starts a fresh run.
    let restarted = machine.handle(&nightly_job(), JobNotification::Start).await;
    assert!(matches!(restarted, Transition::Started(_)));
}

#[tokio::test]
async fn test_running_job_deleted_without_start_is_ignored() {
    let backend = Arc::new(RecordingBackend::new());
    let machine = setup(backend.clone());

    let transition = machine
        .handle(&with_status(nightly_job(), 1, 0, 0), JobNotification::TerminalRemove)
        .await;

    assert_eq!(transition, Transition::Unchanged);
    assert!(backend.checkins().is_empty());
}

#[tokio::test]
async fn test_job_waiting_for_pods_stays_in_progress() {
    let backend = Arc::new(RecordingBackend::new());
    let machine = setup(backend.clone());

    machine.handle(&nightly_job(), JobNotification::Start).await;
    let blocked = with_status(nightly_job(), 0, 0, 0);
    assert_eq!(
        machine.handle(&blocked, JobNotification::TerminalCheck).await,
        Transition::Unchanged
    );
    assert_eq!(backend.checkins().len(), 1);

    let done = with_status(nightly_job(), 0, 1, 0);
    assert_eq!(
        machine.handle(&done, JobNotification::TerminalCheck).await,
        Transition::Finished(CheckInStatus::Ok)
    );
}

#[tokio::test]
async fn test_required_completions_from_job_template() {
    let backend = Arc::new(RecordingBackend::new());
    let index = MonitorIndex::new(MonitorSettings::default());
    index.on_cronjob_added(&with_completions(cronjob("reindex", "@hourly"), 3));
    let machine = CheckinStateMachine::new(index, backend.clone());

    let partial = job("reindex-1", "reindex");
    machine.handle(&partial, JobNotification::Start).await;
    let transition = machine
        .handle(&with_status(partial, 0, 2, 1), JobNotification::TerminalCheck)
        .await;
    assert_eq!(transition, Transition::Finished(CheckInStatus::Error));

    let complete = job("reindex-2", "reindex");
    machine.handle(&complete, JobNotification::Start).await;
    let transition = machine
        .handle(&with_status(complete, 0, 3, 0), JobNotification::TerminalCheck)
        .await;
    assert_eq!(transition, Transition::Finished(CheckInStatus::Ok));
}

// ============================================================================
// Guards
// ============================================================================

#[tokio::test]
async fn test_duplicate_start_is_ignored() {
    let backend = Arc::new(RecordingBackend::new());
    let machine = setup(backend.clone());

    machine.handle(&nightly_job(), JobNotification::Start).await;
    let again = machine.handle(&nightly_job(), JobNotification::Start).await;

    assert_eq!(again, Transition::Unchanged);
    assert_eq!(backend.checkins().len(), 1);
}

#[tokio::test]
async fn test_concurrent_starts_send_one_checkin() {
    let backend = Arc::new(RecordingBackend::new());
    let machine = setup(backend.clone());
    let job = nightly_job();

    let (a, b) = tokio::join!(
        machine.handle(&job, JobNotification::Start),
        machine.handle(&job, JobNotification::Start),
    );

    let started = [a, b]
        .iter()
        .filter(|t| matches!(t, Transition::Started(_)))
        .count();
    assert_eq!(started, 1);
    assert_eq!(backend.checkins().len(), 1);
}

#[tokio::test]
async fn test_terminal_without_start_is_ignored() {
    let backend = Arc::new(RecordingBackend::new());
    let machine = setup(backend.clone());

    let transition = machine
        .handle(&with_status(nightly_job(), 0, 1, 0), JobNotification::TerminalCheck)
        .await;

    assert_eq!(transition, Transition::Unchanged);
    assert!(backend.checkins().is_empty());
}

#[tokio::test]
async fn test_job_of_unknown_cronjob_is_ignored() {
    let backend = Arc::new(RecordingBackend::new());
    let machine = setup(backend.clone());

    let transition = machine
        .handle(&job("hourly-1", "hourly"), JobNotification::Start)
        .await;

    assert_eq!(transition, Transition::Unchanged);
    assert!(backend.checkins().is_empty());
}

#[tokio::test]
async fn test_job_without_cronjob_owner_is_ignored() {
    let backend = Arc::new(RecordingBackend::new());
    let machine = setup(backend.clone());
    let manual = k8s_openapi::api::batch::v1::Job {
        metadata: meta("manual-run", vec![owner("CronJob", "nightly-backup", false)]),
        ..Default::default()
    };

    let transition = machine.handle(&manual, JobNotification::Start).await;

    assert_eq!(transition, Transition::Unchanged);
    assert!(backend.checkins().is_empty());
}

#[tokio::test]
async fn test_already_finished_job_is_not_started() {
    let backend = Arc::new(RecordingBackend::new());
    let machine = setup(backend.clone());
    let mut finished = nightly_job();
    finished.status = Some(JobStatus {
        succeeded: Some(1),
        completion_time: Some(Time(at(2, 5))),
        ..Default::default()
    });

    let transition = machine.handle(&finished, JobNotification::Start).await;

    assert_eq!(transition, Transition::Unchanged);
    assert!(backend.checkins().is_empty());
}

// ============================================================================
// Index changes during a run
// ============================================================================

#[tokio::test]
async fn test_cronjob_deleted_mid_run_drops_terminal() {
    let backend = Arc::new(RecordingBackend::new());
    let machine = setup(backend.clone());

    machine.handle(&nightly_job(), JobNotification::Start).await;
    assert!(
        machine
            .index()
            .on_cronjob_deleted(&cronjob("nightly-backup", "0 2 * * *"))
    );

    let transition = machine
        .handle(&with_status(nightly_job(), 0, 1, 0), JobNotification::TerminalCheck)
        .await;

    assert_eq!(transition, Transition::Unchanged);
    assert_eq!(backend.checkins().len(), 1);
}

#[tokio::test]
async fn test_cronjob_update_keeps_running_jobs() {
    let backend = Arc::new(RecordingBackend::new());
    let machine = setup(backend.clone());

    machine.handle(&nightly_job(), JobNotification::Start).await;
    machine
        .index()
        .on_cronjob_updated(&cronjob("nightly-backup", "30 3 * * *"))
        .await;

    let transition = machine
        .handle(&with_status(nightly_job(), 0, 1, 0), JobNotification::TerminalCheck)
        .await;

    assert_eq!(transition, Transition::Finished(CheckInStatus::Ok));
    let end = &backend.checkins()[1];
    assert_eq!(
        end.monitor_config.schedule,
        MonitorSchedule::Crontab {
            value: "30 3 * * *".to_string()
        }
    );

    let record = machine
        .index()
        .get(&MonitorKey::new(NAMESPACE, "nightly-backup"))
        .unwrap();
    assert_eq!(record.lock().await.run_count(), 0);
}

// ============================================================================
// Backend interaction
// ============================================================================

#[tokio::test]
async fn test_backend_issued_id_is_reused() {
    let backend = Arc::new(RecordingBackend::issuing_ids());
    let machine = setup(backend.clone());

    let started = machine.handle(&nightly_job(), JobNotification::Start).await;
    machine
        .handle(&with_status(nightly_job(), 0, 1, 0), JobNotification::TerminalCheck)
        .await;

    let issued = CheckInId::from_uuid(Uuid::from_u128(1));
    assert_eq!(started, Transition::Started(issued));
    assert_eq!(backend.checkins()[1].check_in_id, issued);
}

#[tokio::test]
async fn test_failed_start_submission_still_tracks_run() {
    let backend = Arc::new(RecordingBackend::new());
    let machine = setup(backend.clone());

    backend.set_failing(true);
    let started = machine.handle(&nightly_job(), JobNotification::Start).await;
    backend.set_failing(false);

    assert!(matches!(started, Transition::Started(_)));
    let transition = machine
        .handle(&with_status(nightly_job(), 0, 1, 0), JobNotification::TerminalCheck)
        .await;

    assert_eq!(transition, Transition::Finished(CheckInStatus::Ok));
    let checkins = backend.checkins();
    assert_eq!(checkins.len(), 2);
    assert_eq!(checkins[0].check_in_id, checkins[1].check_in_id);
}
