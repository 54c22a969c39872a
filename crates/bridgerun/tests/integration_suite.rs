//! Integration tests for bridgerun, driving a bridge from a raw peer that
//! speaks frames by hand.

use std::time::Duration;

use bridgerun::Args;
use bridgerun::Bridge;
use bridgerun::ChannelTransport;
use bridgerun::Handle;
use bridgerun::RemoteObject;
use bridgerun::Transport;
use bridgerun::tracker;
use bridgewire::CallId;
use bridgewire::ErrorDescriptor;
use bridgewire::Frame;
use bridgewire::Outcome;
use serde_json::json;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn args(value: serde_json::Value) -> Args {
    value.as_object().cloned().unwrap_or_default()
}

async fn send(raw: &ChannelTransport, frame: Frame) -> anyhow::Result<()> {
    raw.send(&frame.encode()?).await?;
    Ok(())
}

async fn next_frame(raw: &ChannelTransport) -> anyhow::Result<Frame> {
    let bytes = tokio::time::timeout(Duration::from_secs(5), raw.recv())
        .await??
        .ok_or_else(|| anyhow::anyhow!("bridge hung up"))?;
    Ok(Frame::decode(&bytes)?)
}

async fn expect_reply(raw: &ChannelTransport, call_id: &CallId) -> anyhow::Result<Outcome> {
    match next_frame(raw).await? {
        Frame::Reply(reply) if &reply.call_id == call_id => Ok(reply.outcome),
        other => anyhow::bail!("expected the reply to {}, got {:?}", call_id, other),
    }
}

// --- Test 1: Outbound calls have the documented wire shape ---

#[tokio::test]
async fn test_issued_call_wire_shape() -> anyhow::Result<()> {
    init_tracing();
    let (raw, b) = ChannelTransport::pair();
    let bridge = Bridge::builder().name("client").build(b)?;
    let tracker = bridge.tracker().clone();

    let issuing = tokio::spawn(async move { tracker.issue("get_attr", args(json!({"handle": "h", "name": "x"}))).await });

    let bytes = raw.recv().await?.expect("a frame");
    let wire: serde_json::Value = serde_json::from_slice(&bytes)?;
    let call = &wire["Call"];
    assert_eq!(call["op"], json!("get_attr"));
    assert_eq!(call["args"], json!({"handle": "h", "name": "x"}));

    let call_id = CallId::from(call["call_id"].as_str().expect("call id"));
    send(&raw, Frame::reply(call_id, Outcome::ok(json!("done")))).await?;
    assert_eq!(issuing.await??, json!("done"));
    Ok(())
}

// --- Test 2: Stray and duplicate replies are refused, not delivered ---

#[tokio::test]
async fn test_stray_replies_are_ignored() -> anyhow::Result<()> {
    init_tracing();
    let (raw, b) = ChannelTransport::pair();
    let bridge = Bridge::builder().build(b)?;
    let tracker = bridge.tracker().clone();

    let issuing = tokio::spawn(async move { tracker.issue("anything", Args::new()).await });
    let Frame::Call(call) = next_frame(&raw).await? else {
        anyhow::bail!("expected a call");
    };

    send(&raw, Frame::reply(CallId::from("forged"), Outcome::ok(json!("wrong")))).await?;
    send(&raw, Frame::reply(call.call_id.clone(), Outcome::ok(json!("right")))).await?;
    send(&raw, Frame::reply(call.call_id, Outcome::ok(json!("again")))).await?;

    assert_eq!(issuing.await??, json!("right"));
    assert_eq!(bridge.tracker().pending_count(), 0);
    Ok(())
}

// --- Test 3: Remote errors surface with name, message and trace ---

#[tokio::test]
async fn test_remote_error_is_rebuilt() -> anyhow::Result<()> {
    init_tracing();
    let (raw, b) = ChannelTransport::pair();
    let bridge = Bridge::builder().build(b)?;
    let tracker = bridge.tracker().clone();

    let issuing = tokio::spawn(async move { tracker.issue("exec", Args::new()).await });
    let Frame::Call(call) = next_frame(&raw).await? else {
        anyhow::bail!("expected a call");
    };
    let error = ErrorDescriptor::new("KeyError", "'n-py7'").with_trace("Traceback ...");
    send(&raw, Frame::reply(call.call_id, Outcome::err(error))).await?;

    match issuing.await? {
        Err(tracker::Error::Remote(e)) => {
            assert_eq!(e.name, "KeyError");
            assert_eq!(e.message, "'n-py7'");
            assert_eq!(e.trace, "Traceback ...");
        }
        other => anyhow::bail!("expected a remote error, got {:?}", other),
    }
    Ok(())
}

// --- Test 4: A raw peer can drive the registry ---

#[tokio::test]
async fn test_raw_peer_drives_registry() -> anyhow::Result<()> {
    init_tracing();
    let (raw, b) = ChannelTransport::pair();
    let bridge = Bridge::builder().name("server").build(b)?;

    let add = CallId::generate();
    send(&raw, Frame::call(add.clone(), "add", args(json!({"value": {"a": [1, 2]}})))).await?;
    let handle = expect_reply(&raw, &add).await?.into_result().map_err(anyhow::Error::msg)?;
    let handle = Handle::parse(handle.as_str().expect("a handle string"))?;
    assert!(bridge.registry().contains(&handle));

    let access = CallId::generate();
    let request = json!({"handle": handle, "code": "return o.a.length + k", "args": {"k": 10}, "receiver": "o"});
    send(&raw, Frame::call(access.clone(), "access", args(request))).await?;
    let result = expect_reply(&raw, &access).await?.into_result().map_err(anyhow::Error::msg)?;

    let value = CallId::generate();
    send(&raw, Frame::call(value.clone(), "value", args(json!({"handle": result})))).await?;
    assert_eq!(expect_reply(&raw, &value).await?, Outcome::ok(json!(12)));
    Ok(())
}

// --- Test 5: Undecodable frames do not stop the pump ---

#[tokio::test]
async fn test_garbage_is_dropped() -> anyhow::Result<()> {
    init_tracing();
    let (raw, b) = ChannelTransport::pair();
    let _bridge = Bridge::builder().build(b)?;

    raw.send(b"not json at all").await?;
    raw.send(br#"{"Call": {"call_id": "c", "op": "", "args": {}}}"#).await?;

    let add = CallId::generate();
    send(&raw, Frame::call(add.clone(), "add", args(json!({"value": 1})))).await?;
    assert!(!expect_reply(&raw, &add).await?.is_err());
    Ok(())
}

// --- Test 6: Custom operations sit next to the registry ones ---

#[tokio::test]
async fn test_custom_operation() -> anyhow::Result<()> {
    init_tracing();
    let (a, b) = ChannelTransport::pair();
    let _server = Bridge::builder()
        .operation("echo", |args, done| done.complete(Outcome::ok(serde_json::Value::Object(args))))
        .build(a)?;
    let client = Bridge::builder().build(b)?;

    let echoed = client.issue("echo", args(json!({"k": [true]}))).await?;
    assert_eq!(echoed, json!({"k": [true]}));

    let remote = RemoteObject::create(client.tracker(), json!("still serving")).await?;
    assert_eq!(remote.value().await?, json!("still serving"));
    Ok(())
}

// --- Test 7: A malformed reply fails its caller instead of leaving it pending ---

#[tokio::test]
async fn test_malformed_reply_fails_the_call() -> anyhow::Result<()> {
    init_tracing();
    let (raw, b) = ChannelTransport::pair();
    let bridge = Bridge::builder().build(b)?;
    let tracker = bridge.tracker().clone();

    let issuing = tokio::spawn(async move { tracker.issue("exec", Args::new()).await });
    let Frame::Call(call) = next_frame(&raw).await? else {
        anyhow::bail!("expected a call");
    };

    let malformed = json!({"Reply": {"call_id": call.call_id, "outcome": {"error": {"name": "X", "message": "m"}}}});
    raw.send(&serde_json::to_vec(&malformed)?).await?;

    let settled = tokio::time::timeout(Duration::from_millis(500), issuing).await??;
    assert!(matches!(settled, Err(tracker::Error::ProtocolViolation(_))), "got {:?}", settled);
    assert_eq!(bridge.tracker().pending_count(), 0);
    Ok(())
}
