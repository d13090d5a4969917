use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use stage_client::{
    ClientMode, Codec, ConnectionHandle, Credentials, LocalTrack, MediaKind, Phase, TokenRole,
    TransportClient, TransportEvent,
};
use stage_db::unix_now;
use stage_lease::{ReaperPolicy, Release, reap_stale_leases};
use stage_presence::IdentityKey;
use tokio::sync::mpsc;

use super::*;
use crate::config::AppConfig;

#[derive(Default)]
struct Recorder {
    joins: Vec<(String, String)>,
    published: usize,
    leaves: usize,
    // Kept so each client's event stream stays open.
    senders: Vec<mpsc::Sender<TransportEvent>>,
}

struct FakeIssuer;

#[async_trait]
impl TokenIssuer for FakeIssuer {
    async fn generate_token(
        &self,
        channel: &str,
        uid: &str,
        _role: TokenRole,
        _ttl_seconds: u64,
    ) -> Result<Credentials, ClientError> {
        Ok(Credentials {
            token: format!("{channel}/{uid}"),
            app_id: "app".into(),
        })
    }
}

struct FakeFactory {
    recorder: Arc<Mutex<Recorder>>,
}

impl TransportFactory for FakeFactory {
    fn create_client(
        &self,
        _mode: ClientMode,
        _codec: Codec,
    ) -> Result<Box<dyn TransportClient>, ClientError> {
        let (tx, rx) = mpsc::channel(8);
        self.recorder.lock().unwrap().senders.push(tx);
        Ok(Box::new(FakeClient {
            recorder: self.recorder.clone(),
            events: Some(rx),
        }))
    }
}

struct FakeClient {
    recorder: Arc<Mutex<Recorder>>,
    events: Option<mpsc::Receiver<TransportEvent>>,
}

#[async_trait]
impl TransportClient for FakeClient {
    async fn join(
        &mut self,
        _app_id: &str,
        channel: &str,
        _token: &str,
        uid: &str,
    ) -> Result<(), ClientError> {
        self.recorder
            .lock()
            .unwrap()
            .joins
            .push((channel.to_string(), uid.to_string()));
        Ok(())
    }

    async fn leave(&mut self) -> Result<(), ClientError> {
        self.recorder.lock().unwrap().leaves += 1;
        Ok(())
    }

    async fn publish(&mut self, _tracks: &[LocalTrack]) -> Result<(), ClientError> {
        self.recorder.lock().unwrap().published += 1;
        Ok(())
    }

    async fn unpublish(&mut self) -> Result<(), ClientError> {
        Ok(())
    }

    async fn subscribe(&mut self, _uid: &str, _kind: MediaKind) -> Result<(), ClientError> {
        Ok(())
    }

    async fn unsubscribe(&mut self, _uid: &str, _kind: MediaKind) -> Result<(), ClientError> {
        Ok(())
    }

    async fn set_remote_volume(&mut self, _volume: u8) -> Result<(), ClientError> {
        Ok(())
    }

    fn release_local_tracks(&mut self) {}

    fn take_events(&mut self) -> Option<mpsc::Receiver<TransportEvent>> {
        self.events.take()
    }
}


fn context(db: Database) -> (SessionContext, Arc<Mutex<Recorder>>) {
    let recorder = Arc::new(Mutex::new(Recorder::default()));
    let ctx = SessionContext {
        db,
        factory: Arc::new(FakeFactory {
            recorder: recorder.clone(),
        }),
        issuer: Arc::new(FakeIssuer),
        config: AppConfig::default(),
        shutdown: CancellationToken::new(),
    };
    (ctx, recorder)
}

fn db_with_event(live: bool) -> Database {
    let db = Database::open_in_memory().unwrap();
    let now = unix_now();
    db.create_event("ev-1", now, now).unwrap();
    if live {
        db.mark_event_live("ev-1", now).unwrap();
    }
    db
}

async fn wait_until(handle: &ConnectionHandle, f: impl Fn(&ConnectionState) -> bool) {
    let mut rx = handle.subscribe();
    tokio::time::timeout(Duration::from_secs(60), rx.wait_for(|s| f(s)))
        .await
        .expect("state not reached")
        .unwrap();
}

fn viewer_count(db: &Database) -> i64 {
    db.get_event("ev-1").unwrap().unwrap().viewer_count
}

fn alice() -> IdentityKey {
    IdentityKey::resolve(Some("alice"), Some("laptop")).unwrap()
}

fn camera() -> Vec<LocalTrack> {
    vec![
        LocalTrack::new("mic", MediaKind::Audio),
        LocalTrack::new("cam", MediaKind::Video),
    ]
}

#[tokio::test(start_paused = true)]
async fn viewer_joins_presence_and_channel() {
    let db = db_with_event(true);
    let (ctx, recorder) = context(db.clone());

    let session = ViewerSession::start(&ctx, "ev-1", alice()).unwrap();
    wait_until(session.connection(), |s| s.phase == Phase::Connected).await;

    assert_eq!(viewer_count(&db), 1);
    assert_eq!(
        recorder.lock().unwrap().joins,
        vec![("ev-1".to_string(), "user:alice".to_string())]
    );

    assert!(session.leave().await.unwrap());
    assert_eq!(viewer_count(&db), 0);
    assert_eq!(recorder.lock().unwrap().leaves, 1);
}

#[tokio::test(start_paused = true)]
async fn viewer_session_rejects_ended_event() {
    let db = db_with_event(true);
    db.mark_event_ended("ev-1", unix_now()).unwrap();
    let (ctx, _) = context(db);

    assert!(matches!(
        ViewerSession::start(&ctx, "ev-1", alice()),
        Err(SessionError::EventEnded(_))
    ));
    assert!(matches!(
        ViewerSession::start(&ctx, "missing", alice()),
        Err(SessionError::EventNotFound(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn viewer_session_closes_when_event_ends() {
    let db = db_with_event(true);
    let (ctx, recorder) = context(db.clone());
    let session = ViewerSession::start(&ctx, "ev-1", alice()).unwrap();
    wait_until(session.connection(), |s| s.phase == Phase::Connected).await;

    db.mark_event_ended("ev-1", unix_now()).unwrap();
    wait_until(session.connection(), |s| s.session_ended).await;

    assert!(session.is_ended());
    assert_eq!(session.connection().state().phase, Phase::Idle);
    assert!(!db.get_presence("ev-1", "user:alice").unwrap().unwrap().is_active);
    assert_eq!(recorder.lock().unwrap().leaves, 1);

    // No retries after the session was ended.
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(recorder.lock().unwrap().joins.len(), 1);
    assert!(!session.leave().await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn viewer_ping_rejoins_after_prune() {
    let db = db_with_event(true);
    let (ctx, _) = context(db.clone());
    let session = ViewerSession::start(&ctx, "ev-1", alice()).unwrap();
    wait_until(session.connection(), |s| s.phase == Phase::Connected).await;

    db.prune_presence("ev-1", i64::MAX).unwrap();
    assert!(db.get_presence("ev-1", "user:alice").unwrap().is_none());

    tokio::time::sleep(ctx.config.presence_ping_interval() + Duration::from_secs(1)).await;
    assert!(db.get_presence("ev-1", "user:alice").unwrap().unwrap().is_active);
    session.leave().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn broadcaster_goes_live_on_join() {
    let db = db_with_event(false);
    let (ctx, recorder) = context(db.clone());

    let session = BroadcasterSession::start(&ctx, "ev-1", "artist", camera()).unwrap();
    wait_until(session.connection(), |s| s.phase == Phase::Connected).await;

    assert!(session.is_live());
    assert_eq!(recorder.lock().unwrap().published, 1);
    let event = db.get_event("ev-1").unwrap().unwrap();
    assert_eq!(event.status, EventStatus::Live);
    assert_eq!(db.get_lease("ev-1").unwrap().unwrap().broadcaster_id, "artist");

    tokio::time::sleep(ctx.config.heartbeat_interval() * 2 + Duration::from_secs(1)).await;
    assert_eq!(session.heartbeats(), 2);

    let release = session.end().await.unwrap();
    assert!(release.lease_deleted && release.event_ended);
    assert!(db.get_lease("ev-1").unwrap().is_none());
    assert_eq!(
        db.get_event("ev-1").unwrap().unwrap().status,
        EventStatus::Ended
    );
}

#[tokio::test(start_paused = true)]
async fn broadcaster_session_closes_when_reaped() {
    let db = db_with_event(false);
    let (ctx, recorder) = context(db.clone());
    let session = BroadcasterSession::start(&ctx, "ev-1", "artist", camera()).unwrap();
    wait_until(session.connection(), |s| s.phase == Phase::Connected).await;

    let viewer = ViewerSession::start(&ctx, "ev-1", alice()).unwrap();
    wait_until(viewer.connection(), |s| s.phase == Phase::Connected).await;

    // Heartbeats have stopped arriving for longer than the timeout.
    let report = reap_stale_leases(&db, ReaperPolicy::default(), unix_now() + 3600).unwrap();
    assert_eq!(report.reaped.len(), 1);

    wait_until(session.connection(), |s| s.session_ended).await;
    wait_until(viewer.connection(), |s| s.session_ended).await;
    assert!(session.is_ended());
    assert!(!session.is_live());
    assert!(viewer.is_ended());
    assert_eq!(recorder.lock().unwrap().leaves, 2);

    // Nothing left to release.
    assert_eq!(session.end().await.unwrap(), Release::default());
}

async fn emit(recorder: &Arc<Mutex<Recorder>>, event: TransportEvent) {
    let tx = recorder.lock().unwrap().senders.last().unwrap().clone();
    tx.send(event).await.unwrap();
}

fn invalid_token() -> TransportEvent {
    TransportEvent::Exception {
        code: "INVALID_TOKEN".into(),
        message: "dynamic key rejected".into(),
    }
}

#[tokio::test(start_paused = true)]
async fn failed_broadcaster_stops_renewing_lease() {
    let db = db_with_event(false);
    let (ctx, recorder) = context(db.clone());
    let session = BroadcasterSession::start(&ctx, "ev-1", "artist", camera()).unwrap();
    wait_until(session.connection(), |s| s.phase == Phase::Connected).await;
    tokio::time::sleep(ctx.config.heartbeat_interval() + Duration::from_secs(1)).await;
    assert_eq!(session.heartbeats(), 1);

    emit(&recorder, invalid_token()).await;
    wait_until(session.connection(), |s| s.phase == Phase::Failed).await;
    assert!(!session.is_renewing());

    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(session.heartbeats(), 1);

    // With renewals stopped the reaper reclaims the event.
    let report = reap_stale_leases(&db, ReaperPolicy::default(), unix_now() + 600).unwrap();
    assert_eq!(report.reaped.len(), 1);
    wait_until(session.connection(), |s| s.session_ended).await;
    assert!(session.is_ended());
    assert_eq!(
        db.get_event("ev-1").unwrap().unwrap().status,
        EventStatus::Ended
    );
}

#[tokio::test(start_paused = true)]
async fn manual_retry_resumes_lease_renewal() {
    let db = db_with_event(false);
    let (ctx, recorder) = context(db.clone());
    let session = BroadcasterSession::start(&ctx, "ev-1", "artist", camera()).unwrap();
    wait_until(session.connection(), |s| s.phase == Phase::Connected).await;

    emit(&recorder, invalid_token()).await;
    wait_until(session.connection(), |s| s.phase == Phase::Failed).await;
    assert!(!session.is_renewing());

    session.connection().retry().unwrap();
    wait_until(session.connection(), |s| s.phase == Phase::Connected).await;
    assert!(session.is_renewing());
    assert!(session.is_live());

    tokio::time::sleep(ctx.config.heartbeat_interval() + Duration::from_secs(1)).await;
    assert_eq!(session.heartbeats(), 1);
    assert_eq!(db.get_lease("ev-1").unwrap().unwrap().broadcaster_id, "artist");

    let release = session.end().await.unwrap();
    assert!(release.lease_deleted && release.event_ended);
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_sessions() {
    let db = db_with_event(true);
    let (ctx, _) = context(db.clone());
    let session = ViewerSession::start(&ctx, "ev-1", alice()).unwrap();
    wait_until(session.connection(), |s| s.phase == Phase::Connected).await;

    ctx.shutdown.cancel();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(session.connection().retry().is_err());
}
