// tests/integration/scripts_test.rs

use super::fixtures::MockClient;
use super::test_helpers::{FakeServer, fast_options, init_tracing, within};
use async_trait::async_trait;
use bytes::Bytes;
use spinelq::SpinelQError;
use spinelq::core::client::{ClientEvent, ClientStatus, NodeClient, StoreClient};
use spinelq::core::protocol::RespFrame;
use spinelq::core::readiness::wait_until_ready;
use spinelq::core::scripts::{ScriptBundle, ScriptLoader, script_sha1};
use std::sync::Arc;
use tokio::sync::broadcast;

const ADD_JOB: &str = "return redis.call('LPUSH', KEYS[1], ARGV[1])";
const REMOVE_JOB: &str = "return redis.call('LREM', KEYS[1], 0, ARGV[1])";

#[tokio::test]
async fn test_bundle_loads_every_script() {
    let mock = MockClient::ready();
    let bundle = ScriptBundle::new()
        .with_script("addJob", ADD_JOB)
        .with_script("removeJob", REMOVE_JOB);

    bundle.load_scripts(&mock.store()).await.unwrap();
    assert_eq!(mock.count_command("SCRIPT"), 2);
}

#[tokio::test]
async fn test_empty_bundle_sends_nothing() {
    let mock = MockClient::ready();
    ScriptBundle::new().load_scripts(&mock.store()).await.unwrap();
    assert!(mock.command_names().is_empty());
}

#[tokio::test]
async fn test_bundle_loads_over_real_connection() {
    init_tracing();
    let server = FakeServer::start().await;
    let client: Arc<dyn StoreClient> = NodeClient::open(fast_options(server.addr));
    within(wait_until_ready(client.as_ref())).await.unwrap();

    let bundle = ScriptBundle::new().with_script("addJob", ADD_JOB);
    bundle.load_scripts(&client).await.unwrap();

    let load = server.find("SCRIPT").unwrap();
    assert_eq!(load, vec!["SCRIPT", "LOAD", ADD_JOB]);
    assert_eq!(bundle.sha("addJob"), Some(script_sha1(ADD_JOB.as_bytes()).as_str()));
    client.quit().await.unwrap();
}

/// A store that answers `SCRIPT LOAD` with a fixed reply.
#[derive(Debug)]
struct FixedReplyStore {
    reply: Result<RespFrame, SpinelQError>,
    events: broadcast::Sender<ClientEvent>,
}

impl FixedReplyStore {
    fn new(reply: Result<RespFrame, SpinelQError>) -> Arc<dyn StoreClient> {
        let (events, _) = broadcast::channel(4);
        Arc::new(Self { reply, events })
    }
}

#[async_trait]
impl StoreClient for FixedReplyStore {
    fn status(&self) -> ClientStatus {
        ClientStatus::Ready
    }

    fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    async fn connect(&self) -> Result<(), SpinelQError> {
        Ok(())
    }

    fn disconnect(&self) {}

    async fn quit(&self) -> Result<(), SpinelQError> {
        Ok(())
    }

    async fn command(&self, _args: Vec<Bytes>) -> Result<RespFrame, SpinelQError> {
        self.reply.clone()
    }
}

#[tokio::test]
async fn test_digest_mismatch_is_rejected() {
    let store = FixedReplyStore::new(Ok(RespFrame::BulkString(Bytes::from_static(
        b"0000000000000000000000000000000000000000",
    ))));
    let bundle = ScriptBundle::new().with_script("addJob", ADD_JOB);

    let err = bundle.load_scripts(&store).await.unwrap_err();
    match err {
        SpinelQError::Script(msg) => {
            assert!(msg.contains("digest mismatch"), "{msg}");
            assert!(msg.contains("addJob"), "{msg}");
        }
        other => panic!("expected a script error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_server_error_names_the_script() {
    let store = FixedReplyStore::new(Err(SpinelQError::Server(
        "ERR Error compiling script".into(),
    )));
    let bundle = ScriptBundle::new().with_script("removeJob", "not lua");

    let err = bundle.load_scripts(&store).await.unwrap_err();
    assert_eq!(
        err,
        SpinelQError::Script("loading 'removeJob': ERR Error compiling script".into())
    );
}

#[tokio::test]
async fn test_non_string_reply_is_rejected() {
    let store = FixedReplyStore::new(Ok(RespFrame::Integer(1)));
    let bundle = ScriptBundle::new().with_script("addJob", ADD_JOB);

    let err = bundle.load_scripts(&store).await.unwrap_err();
    assert!(matches!(err, SpinelQError::Script(ref msg) if msg.contains("unexpected reply")));
}
