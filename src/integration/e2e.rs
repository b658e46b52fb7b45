//! End-to-end job scenarios

use std::sync::Arc;
use std::time::Duration;
use tempfile::{tempdir, TempDir};
use url::Url;

use crate::clock::ManualClock;
use crate::config::{AudioConfig, ServerConfig};
use crate::error::{FetchError, JobError, ResolutionError};
use crate::integration::fixtures::{media_playlist, FakeEngine, FakeHttp, FakeSpeech};
use crate::job::{ArtifactKind, JobState, Workspace};
use crate::lookup::StaticLookup;
use crate::state::AppState;
use crate::transcribe::SpeechProvider;

struct Env {
    root: TempDir,
    http: Arc<FakeHttp>,
    clock: Arc<ManualClock>,
    state: AppState,
}

fn env(lookup: StaticLookup, speech: Option<Arc<FakeSpeech>>) -> Env {
    env_in(tempdir().unwrap(), lookup, speech)
}

fn env_in(root: TempDir, lookup: StaticLookup, speech: Option<Arc<FakeSpeech>>) -> Env {
    let http = Arc::new(FakeHttp::new());
    let clock = Arc::new(ManualClock::new());
    let config = ServerConfig {
        workspace_root: root.path().join("jobs"),
        audio: AudioConfig {
            channels: 1,
            sample_rate: 16_000,
            bitrate_kbps: Some(64),
            ..Default::default()
        },
        ..Default::default()
    };
    let state = AppState::with_parts(
        config,
        http.clone(),
        Arc::new(FakeEngine::new()),
        speech.map(|s| s as Arc<dyn SpeechProvider>),
        Arc::new(lookup),
        clock.clone(),
    );
    Env {
        root,
        http,
        clock,
        state,
    }
}

fn recording(reference: &str, manifest: &str) -> StaticLookup {
    StaticLookup::new().with(reference, vec![Url::parse(manifest).unwrap()])
}

fn workspace_count(env: &Env) -> usize {
    match std::fs::read_dir(env.root.path().join("jobs")) {
        Ok(entries) => entries.count(),
        Err(_) => 0,
    }
}

#[tokio::test]
async fn test_job_lifecycle_through_expiry() {
    let env = env(recording("1234", "http://cdn.example/1234/index.m3u8"), None);
    env.http.serve(
        "http://cdn.example/1234/index.m3u8",
        media_playlist(&["s0.ts", "s1.ts", "s2.ts"]),
    );
    env.http.serve("http://cdn.example/1234/s0.ts", "zero-");
    env.http.serve("http://cdn.example/1234/s1.ts", "one-");
    env.http.serve("http://cdn.example/1234/s2.ts", "two");

    let job = env.state.pipeline.process("1234", false).await.unwrap();
    assert_eq!(job.state, JobState::Ready);
    assert_eq!(job.reference, "1234");
    assert!(job.expires_at.unwrap() > job.completed_at.unwrap());

    let store = &env.state.store;
    let (video, video_bytes) = store.read_artifact(&job.id, ArtifactKind::AssembledVideo).await.unwrap();
    assert_eq!(&video_bytes[..], b"zero-one-two");
    assert_eq!(video.size_bytes, video_bytes.len() as u64);

    let (_, first) = store.read_artifact(&job.id, ArtifactKind::EncodedAudio).await.unwrap();
    let (_, second) = store.read_artifact(&job.id, ArtifactKind::EncodedAudio).await.unwrap();
    assert_eq!(first, second);
    assert!(first.starts_with(b"libmp3lame/1ch/16000Hz/Some(64)|"));

    // Still served just before the deadline
    env.clock.advance(Duration::from_secs(1799));
    assert!(store.get(&job.id).is_ok());
    assert_eq!(store.sweep().await, 0);

    env.clock.advance(Duration::from_secs(2));
    assert!(matches!(
        store.read_artifact(&job.id, ArtifactKind::EncodedAudio).await,
        Err(JobError::WorkspaceExpired(_))
    ));
    assert!(job.workspace.exists());

    assert_eq!(store.sweep().await, 1);
    assert!(!job.workspace.exists());
    assert!(matches!(store.get(&job.id), Err(JobError::WorkspaceExpired(_))));
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_concurrent_jobs_are_isolated() {
    let lookup = StaticLookup::new()
        .with("1", vec![Url::parse("http://cdn.example/1/index.m3u8").unwrap()])
        .with("2", vec![Url::parse("http://cdn.example/2/index.m3u8").unwrap()]);
    let env = env(lookup, None);
    for n in ["1", "2"] {
        env.http.serve(
            &format!("http://cdn.example/{}/index.m3u8", n),
            media_playlist(&["a.ts", "b.ts"]),
        );
        env.http.serve_delayed(
            &format!("http://cdn.example/{}/a.ts", n),
            format!("{}a", n),
            Duration::from_millis(20),
        );
        env.http.serve(&format!("http://cdn.example/{}/b.ts", n), format!("{}b", n));
    }

    let pipeline = &env.state.pipeline;
    let (one, two) = tokio::join!(pipeline.process("1", false), pipeline.process("2", false));
    let (one, two) = (one.unwrap(), two.unwrap());

    assert_ne!(one.id, two.id);
    assert_ne!(one.workspace, two.workspace);
    let (_, a) = env.state.store.read_artifact(&one.id, ArtifactKind::AssembledVideo).await.unwrap();
    let (_, b) = env.state.store.read_artifact(&two.id, ArtifactKind::AssembledVideo).await.unwrap();
    assert_eq!(&a[..], b"1a1b");
    assert_eq!(&b[..], b"2a2b");
    assert_eq!(workspace_count(&env), 2);
}

#[tokio::test]
async fn test_concurrent_jobs_for_same_reference_are_independent() {
    let env = env(recording("1234", "http://cdn.example/1234/index.m3u8"), None);
    env.http.serve(
        "http://cdn.example/1234/index.m3u8",
        media_playlist(&["a.ts", "b.ts"]),
    );
    env.http.serve_delayed("http://cdn.example/1234/a.ts", "A", Duration::from_millis(20));
    env.http.serve("http://cdn.example/1234/b.ts", "B");

    let pipeline = &env.state.pipeline;
    let (one, two) = tokio::join!(pipeline.process("1234", false), pipeline.process("1234", false));
    let (one, two) = (one.unwrap(), two.unwrap());

    assert_eq!(one.reference, two.reference);
    assert_ne!(one.id, two.id);
    assert_ne!(one.workspace, two.workspace);
    assert_eq!(workspace_count(&env), 2);
    assert_eq!(env.http.request_count("http://cdn.example/1234/a.ts"), 2);

    let store = &env.state.store;
    let (_, a) = store.read_artifact(&one.id, ArtifactKind::AssembledVideo).await.unwrap();
    let (_, b) = store.read_artifact(&two.id, ArtifactKind::AssembledVideo).await.unwrap();
    assert_eq!(&a[..], b"AB");
    assert_eq!(a, b);

    // Expiring one job leaves the other's files alone
    assert_eq!(store.cancel(&one.id).await.unwrap(), JobState::Expired);
    assert!(!one.workspace.exists());
    assert!(two.workspace.exists());
    let (_, still) = store.read_artifact(&two.id, ArtifactKind::AssembledVideo).await.unwrap();
    assert_eq!(&still[..], b"AB");
    assert_eq!(workspace_count(&env), 1);
}

#[tokio::test]
async fn test_restart_purges_previous_workspaces() {
    let lookup = || recording("9", "http://cdn.example/9/index.m3u8");
    let first = env(lookup(), None);
    first.http.serve("http://cdn.example/9/index.m3u8", media_playlist(&["a.ts"]));
    first.http.serve("http://cdn.example/9/a.ts", "a");
    let job = first.state.pipeline.process("9", false).await.unwrap();
    assert!(job.workspace.exists());

    // A new process over the same root knows nothing about the old job
    let Env { root, state, .. } = first;
    drop(state);
    let second = env_in(root, lookup(), None);
    assert!(matches!(second.state.store.get(&job.id), Err(JobError::NotFound(_))));

    assert_eq!(second.state.store.purge_orphans().await, 1);
    assert!(!job.workspace.exists());
    assert_eq!(workspace_count(&second), 0);
}

#[tokio::test]
async fn test_zero_segments_leaves_nothing_behind() {
    let env = env(recording("5", "http://cdn.example/5/index.m3u8"), None);
    env.http.serve("http://cdn.example/5/index.m3u8", media_playlist(&[]));

    let err = env.state.pipeline.process("5", false).await.unwrap_err();

    assert!(matches!(
        err,
        JobError::Resolution(ResolutionError::NoSegments { manifests: 1 })
    ));
    assert_eq!(workspace_count(&env), 0);
    assert!(env.state.store.is_empty());
}

#[tokio::test]
async fn test_segment_failure_removes_workspace() {
    let env = env(recording("6", "http://cdn.example/6/index.m3u8"), None);
    env.http.serve(
        "http://cdn.example/6/index.m3u8",
        media_playlist(&["a.ts", "b.ts", "c.ts"]),
    );
    env.http.serve("http://cdn.example/6/a.ts", "a");
    env.http.fail("http://cdn.example/6/b.ts", 404);
    env.http.serve("http://cdn.example/6/c.ts", "c");

    let err = env.state.pipeline.process("6", false).await.unwrap_err();

    match err {
        JobError::Fetch(FetchError::Download { manifest, segment, .. }) => {
            assert_eq!((manifest, segment), (0, 1));
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(workspace_count(&env), 0);
}

#[tokio::test]
async fn test_cancel_running_job() {
    let env = env(recording("7", "http://cdn.example/7/index.m3u8"), None);
    env.http.serve("http://cdn.example/7/index.m3u8", media_playlist(&["slow.ts"]));
    env.http.serve_delayed("http://cdn.example/7/slow.ts", "x", Duration::from_secs(30));

    let handle = env.state.pipeline.submit("7", false).unwrap();
    let id = handle.id;
    let dir = Workspace::dir_for(env.state.store.workspace_root(), &id);
    let pipeline = env.state.pipeline.clone();
    let task = tokio::spawn(async move { pipeline.run(handle).await });

    // Wait for the download to start
    for _ in 0..200 {
        if env.http.in_flight() > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(env.state.store.get(&id).unwrap().state, JobState::Fetching);

    let state = env.state.store.cancel(&id).await.unwrap();
    assert_eq!(state, JobState::Fetching);

    let result = tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
    assert!(matches!(result, Err(JobError::Cancelled(_))));
    assert!(!dir.exists());
    assert!(matches!(env.state.store.get(&id), Err(JobError::NotFound(_))));
}

#[tokio::test]
async fn test_transcript_is_served_as_text() {
    let speech = Arc::new(FakeSpeech::replying("Welcome to the session."));
    let env = env(recording("8", "http://cdn.example/8/index.m3u8"), Some(speech));
    env.http.serve("http://cdn.example/8/index.m3u8", media_playlist(&["a.ts"]));
    env.http.serve("http://cdn.example/8/a.ts", "a");

    let job = env.state.pipeline.process("8", true).await.unwrap();

    assert_eq!(job.transcript(), Some("Welcome to the session."));
    let (artifact, body) = env
        .state
        .store
        .read_artifact(&job.id, ArtifactKind::TranscriptText)
        .await
        .unwrap();
    assert_eq!(&body[..], b"Welcome to the session.");
    assert_eq!(artifact.content_type(), "text/plain; charset=utf-8");
    // Transient provider input is gone, the artifacts stay
    assert!(!job.workspace.join("transcribe.wav").exists());
    assert!(job.workspace.join("audio.mp3").exists());
}
