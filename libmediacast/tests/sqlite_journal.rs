//! SQLite-backed store and journal, exercised through the workflow and service

use std::sync::Arc;

use chrono::{Duration, Utc};
use libmediacast::clock::{Clock, ManualClock};
use libmediacast::credentials::{TokenManager, TokenPolicy};
use libmediacast::db::Database;
use libmediacast::error::MediacastError;
use libmediacast::platforms::mock::MockPlatform;
use libmediacast::platforms::PlatformRegistry;
use libmediacast::service::MediacastService;
use libmediacast::store::{AccountStore, JobJournal};
use libmediacast::types::{
    ContainerRef, ContainerStatus, Credential, FormatOptions, MediaSpec, PlatformAccount, PlatformKind,
    PublishFormat, PublishRequest, TokenKind,
};
use libmediacast::workflow::{JobState, PublishWorkflow};
use libmediacast::Config;
use serial_test::serial;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn db_path(dir: &TempDir) -> String {
    dir.path().join("mediacast.db").to_string_lossy().to_string()
}

async fn seeded(path: &str, clock: &ManualClock) -> (Database, PlatformAccount) {
    let db = Database::new(path).await.unwrap();
    let account = PlatformAccount::new(PlatformKind::Meta, "17841400", "Studio");
    let now = clock.now();
    db.put_account(&account).await.unwrap();
    db.put_credential(
        &account.credential_ref,
        &Credential::new("stored-token", TokenKind::LongLived, now, now + Duration::days(40)),
    )
    .await
    .unwrap();
    (db, account)
}

fn workflow(db: Arc<Database>, mock: Arc<MockPlatform>, clock: Arc<ManualClock>) -> PublishWorkflow {
    let tokens = Arc::new(
        TokenManager::new(db.clone(), clock.clone(), TokenPolicy::default())
            .with_authority(PlatformKind::Meta, mock.clone()),
    );
    let registry = Arc::new(PlatformRegistry::new().with(mock));
    PublishWorkflow::new(tokens, db.clone(), registry, clock).with_journal(db)
}

fn request(account: &PlatformAccount) -> PublishRequest {
    PublishRequest {
        account_id: account.id.clone(),
        media: MediaSpec::video("https://cdn.example.com/reel.mp4"),
        caption: "Launch day".to_string(),
        format: PublishFormat::Reel,
        options: FormatOptions::default(),
    }
}

#[tokio::test]
async fn test_published_job_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = db_path(&dir);
    let clock = Arc::new(ManualClock::default());
    let (db, account) = seeded(&path, &clock).await;
    let db = Arc::new(db);

    let mock = Arc::new(
        MockPlatform::new(PlatformKind::Meta)
            .with_statuses([ContainerStatus::Processing, ContainerStatus::Finished])
            .with_post_id("18000000001"),
    );
    let flow = workflow(db.clone(), mock, clock);
    let job = flow
        .run(flow.create_job(request(&account)), &CancellationToken::new())
        .await;
    assert_eq!(job.state, JobState::Published);
    db.close().await;

    let reopened = Database::new(&path).await.unwrap();
    let stored = reopened.load(&job.id).await.unwrap().unwrap();
    assert_eq!(stored.state, JobState::Published);
    assert_eq!(stored.attempts.polls, 2);
    assert_eq!(
        stored.result.unwrap().post_id.as_deref(),
        Some("18000000001")
    );
    assert_eq!(stored.history.len(), job.history.len());
    assert!(reopened.unfinished().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_interrupted_job_resumes_from_database() {
    let dir = TempDir::new().unwrap();
    let path = db_path(&dir);
    let clock = Arc::new(ManualClock::default());
    let (db, account) = seeded(&path, &clock).await;
    let db = Arc::new(db);

    // First process stopped while the container was processing
    let flow = workflow(
        db.clone(),
        Arc::new(MockPlatform::new(PlatformKind::Meta)),
        clock.clone(),
    );
    let mut job = flow.create_job(request(&account));
    let now = clock.now();
    job.transition(JobState::ContainerCreating, now).unwrap();
    job.container = Some(ContainerRef {
        container_id: "container-1".to_string(),
        platform: PlatformKind::Meta,
        account_id: account.id.clone(),
        owner_id: account.platform_account_id.clone(),
        created_at: now,
    });
    job.transition(JobState::ContainerProcessing, now).unwrap();
    db.record(&job).await.unwrap();
    db.close().await;

    // Second process picks it up from disk
    let db = Arc::new(Database::new(&path).await.unwrap());
    let second = Arc::new(MockPlatform::new(PlatformKind::Meta).with_statuses([
        ContainerStatus::Finished,
    ]));
    let resumed = workflow(db.clone(), second.clone(), clock)
        .resume_unfinished(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(resumed.len(), 1);
    assert_eq!(resumed[0].id, job.id);
    assert_eq!(resumed[0].state, JobState::Published);
    assert_eq!(second.calls().create, 0);
    assert_eq!(second.calls().finalize, 1);
    assert!(db.unfinished().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_timed_out_job_is_not_resumed() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::default());
    let (db, account) = seeded(&db_path(&dir), &clock).await;
    let db = Arc::new(db);

    let mock = Arc::new(
        MockPlatform::new(PlatformKind::Meta)
            .with_statuses(std::iter::repeat(ContainerStatus::Processing).take(40)),
    );
    let flow = workflow(db.clone(), mock, clock);
    let job = flow
        .run(flow.create_job(request(&account)), &CancellationToken::new())
        .await;

    assert_eq!(job.state, JobState::TimedOut);
    assert!(db.unfinished().await.unwrap().is_empty());
    assert_eq!(db.recent(5).await.unwrap()[0].state, JobState::TimedOut);
}

fn offline_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.database.path = db_path(dir);
    config
}

#[tokio::test]
#[serial]
async fn test_service_account_management() {
    std::env::remove_var("MEDIACAST_DB_PATH");
    let dir = TempDir::new().unwrap();
    let service = MediacastService::from_config(offline_config(&dir))
        .await
        .unwrap();
    assert!(service.registry().kinds().is_empty());

    let account = PlatformAccount::new(PlatformKind::YouTube, "UCchannel", "Channel");
    service.database().put_account(&account).await.unwrap();
    let now = Utc::now();
    service
        .database()
        .put_credential(
            &account.credential_ref,
            &Credential::new("ya29.token", TokenKind::LongLived, now, now + Duration::hours(1)),
        )
        .await
        .unwrap();

    assert_eq!(service.account(&account.id).await.unwrap(), account);

    // No adapter is configured, so nothing can reach the platform
    let error = service.delete_post(&account.id, "vid1").await.unwrap_err();
    assert!(matches!(error, MediacastError::Platform(_)));

    assert!(service.remove_account(&account.id).await.unwrap());
    assert!(!service.remove_account(&account.id).await.unwrap());
    assert!(matches!(
        service.account(&account.id).await,
        Err(MediacastError::NotFound(_))
    ));
    assert!(matches!(
        service.job("no-such-job").await,
        Err(MediacastError::NotFound(_))
    ));
}

#[tokio::test]
#[serial]
async fn test_database_path_from_environment() {
    let dir = TempDir::new().unwrap();
    let override_path = dir.path().join("override").join("jobs.db");
    std::env::set_var("MEDIACAST_DB_PATH", &override_path);

    let service = MediacastService::from_config(Config::default()).await;
    std::env::remove_var("MEDIACAST_DB_PATH");

    assert!(service.is_ok());
    assert!(override_path.exists());
}
