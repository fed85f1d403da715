//! Typed task pipelines.
//!
//! Tests that chain fetch, decode, download and write tasks across
//! executors the way an application would.

use crate::common::{RecordingHandler, wait_idle};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tessera::testing::{MockDownloader, MockTransport};
use tessera::{
    BatchTask, DecodeTask, DownloadTask, Event, EventBus, Executor, ExecutorConfig, FetchTask,
    Node, Operation, Request, TaskError, TaskState, WriteContent, WriteTask,
};

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct Pokemon {
    id: u32,
    name: String,
    height: u32,
    weight: u32,
}

const URL: &str = "https://pokeapi.test/api/v2/pokemon/1";
const BULBASAUR: &[u8] = br#"{"id":1,"name":"bulbasaur","height":7,"weight":69}"#;

#[tokio::test]
async fn test_fetch_decode_write_across_executors() {
    let dir = tempfile::tempdir().unwrap();
    let network = Executor::new(ExecutorConfig::named("network").with_max_concurrency(4));
    let disk = Executor::new(ExecutorConfig::named("disk").with_max_concurrency(1));

    let transport = Arc::new(MockTransport::new().respond(URL, BULBASAUR.to_vec()));
    let fetch = Operation::new(FetchTask::new(transport, Request::get(URL)));
    let decode = Operation::new(DecodeTask::<Pokemon>::new(fetch.upstream()));

    network.submit(fetch.clone());
    disk.submit(decode.clone());
    wait_idle(&disk, Duration::from_secs(2)).await;

    let pokemon = decode.value().unwrap().unwrap();
    assert_eq!(pokemon.name, "bulbasaur");
    assert_eq!((pokemon.id, pokemon.height, pokemon.weight), (1, 7, 69));

    let destination = dir.path().join("pokemon.json");
    let body = fetch.value().unwrap().unwrap();
    let write = Operation::new(WriteTask::new(WriteContent::Bytes(body), &destination));
    disk.submit(write.clone());

    assert_eq!(write.wait().await, Some(Ok(destination.clone())));
    assert_eq!(std::fs::read(&destination).unwrap(), BULBASAUR);
}

#[tokio::test]
async fn test_batch_collects_decoded_value() {
    let transport = Arc::new(MockTransport::new().respond(URL, BULBASAUR.to_vec()));
    let fetch = Operation::new(FetchTask::new(transport, Request::get(URL)));
    let decode = Operation::new(DecodeTask::<Pokemon>::new(fetch.upstream()));
    let decoded = decode.upstream();

    let batch = BatchTask::with_output(
        vec![fetch.clone() as Arc<dyn Node>, decode.clone()],
        |config| config.name = "pokemon".to_string(),
        move || decoded.value().and_then(Result::ok),
    )
    .unwrap();
    let batch = Operation::new(batch);

    let executor = Executor::default();
    executor.submit(batch.clone());

    let pokemon = batch.wait().await.flatten().unwrap();
    assert_eq!(pokemon.name, "bulbasaur");
    assert_eq!(fetch.state(), TaskState::Finished);
}

#[tokio::test]
async fn test_failed_fetch_surfaces_in_decode() {
    let transport = Arc::new(
        MockTransport::new().fail(URL, TaskError::Transport("HTTP 503".to_string())),
    );
    let fetch = Operation::new(FetchTask::new(transport, Request::get(URL)));
    let decode = Operation::new(DecodeTask::<Pokemon>::new(fetch.upstream()));

    let executor = Executor::default();
    executor.submit_all([fetch.clone() as Arc<dyn Node>, decode.clone()]);
    wait_idle(&executor, Duration::from_secs(2)).await;

    assert_eq!(
        fetch.value(),
        Some(Err(TaskError::Transport("HTTP 503".to_string())))
    );
    match decode.value() {
        Some(Err(TaskError::MissingPredecessor(message))) => assert!(message.contains("503")),
        other => panic!("expected missing predecessor, got {other:?}"),
    }
}

#[tokio::test]
async fn test_download_then_append_copy() {
    let dir = tempfile::tempdir().unwrap();
    let downloader = Arc::new(
        MockDownloader::new(dir.path()).respond("https://cdn.test/sprite.png", vec![7u8; 4096]),
    );
    let sprite = dir.path().join("sprite.png");
    let archive = dir.path().join("archive.bin");

    let download = Operation::new(DownloadTask::from_url(
        downloader,
        "https://cdn.test/sprite.png",
        &sprite,
    ));
    let executor = Executor::default();
    executor.submit(download.clone());
    assert_eq!(download.wait().await, Some(Ok(sprite.clone())));

    let copy = Operation::new(
        WriteTask::new(WriteContent::File(sprite.clone()), &archive).with_high_water_mark(1000),
    );
    executor.submit(copy.clone());
    assert_eq!(copy.wait().await, Some(Ok(archive.clone())));
    assert_eq!(std::fs::read(&archive).unwrap().len(), 4096);
}

#[tokio::test]
async fn test_events_follow_dependency_order() {
    let recorder = RecordingHandler::new();
    let bus = Arc::new(EventBus::new());
    bus.register(recorder.clone()).await;

    let transport = Arc::new(MockTransport::new().respond(URL, BULBASAUR.to_vec()));
    let fetch = Operation::new(FetchTask::new(transport, Request::get(URL)).with_name("fetch"));
    let decode =
        Operation::new(DecodeTask::<Pokemon>::new(fetch.upstream()).with_name("decode"));

    let executor = Executor::builder(ExecutorConfig::named("observed"))
        .event_bus(bus)
        .build();
    executor.submit_all([decode.clone() as Arc<dyn Node>, fetch.clone()]);
    wait_idle(&executor, Duration::from_secs(2)).await;

    assert_eq!(recorder.started_names().await, vec!["fetch", "decode"]);
    let finished = recorder
        .events()
        .await
        .iter()
        .filter(|e| matches!(e, Event::TaskFinished { cancelled: false, .. }))
        .count();
    assert_eq!(finished, 2);
}
