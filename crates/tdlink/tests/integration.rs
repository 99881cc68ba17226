use anyhow::{Context, Result, bail};
use futures_util::future::join_all;
use rand::seq::SliceRandom;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tdlink::transport::{EngineHandle, memory};
use tdlink::{Client, ClientConfig, ClientError, DeliveryPolicy, Request, TransportError, TypedUpdate};
use tdlink_protocol::update::UpdateNewMessage;

#[derive(Deserialize, Debug, PartialEq)]
struct UpdateFoo {
    id: i64,
}

impl TypedUpdate for UpdateFoo {
    const KIND: &'static str = "updateFoo";
}

fn config(call_timeout_ms: u64) -> ClientConfig {
    ClientConfig {
        call_timeout_ms,
        receive_timeout_ms: 10,
        ..ClientConfig::default()
    }
}

fn client_pair(call_timeout_ms: u64) -> (Client, EngineHandle) {
    let (transport, engine) = memory();
    (Client::new(transport, config(call_timeout_ms)), engine)
}

async fn wait_until(mut cond: impl FnMut() -> bool) -> Result<()> {
    for _ in 0..400 {
        if cond() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    bail!("condition not reached in time")
}

#[tokio::test]
async fn send_and_catch_returns_matching_reply() -> Result<()> {
    let (client, mut engine) = client_pair(5_000);
    let handle = client.start()?;

    let engine_task = tokio::spawn(async move {
        let req = engine.next_request().await.context("request")?;
        if req.kind() != Some("getMe") {
            bail!("unexpected request kind: {:?}", req.kind());
        }
        if req.correlation_token().map(str::len) != Some(32) {
            bail!("request missing correlation token");
        }
        engine.reply(&req, json!({"@type": "user", "id": 77}))?;
        Ok::<_, anyhow::Error>(engine)
    });

    let reply = client.send_and_catch(Request::new("getMe")).await?;
    assert_eq!(reply.kind(), Some("user"));
    assert_eq!(reply.get("id").and_then(|v| v.as_i64()), Some(77));
    assert_eq!(client.pending_calls(), 0);

    let engine = engine_task.await??;
    drop(engine);
    handle.join().await;
    Ok(())
}

#[tokio::test]
async fn replies_in_reverse_order_reach_their_own_callers() -> Result<()> {
    let (client, mut engine) = client_pair(5_000);
    let handle = client.start()?;

    let engine_task = async move {
        let first = engine.next_request().await.context("first request")?;
        let second = engine.next_request().await.context("second request")?;
        for req in [&second, &first] {
            let n = req.get("n").cloned().unwrap_or_default();
            engine.reply(req, json!({"@type": "echo", "n": n}))?;
        }
        Ok::<_, anyhow::Error>(engine)
    };

    let (one, two, engine) = tokio::join!(
        client.send_and_catch(Request::new("echo").with("n", 1)),
        client.send_and_catch(Request::new("echo").with("n", 2)),
        engine_task,
    );

    assert_eq!(one?.get("n").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(two?.get("n").and_then(|v| v.as_i64()), Some(2));
    assert_eq!(client.stats().replies_resolved, 2);

    drop(engine?);
    handle.join().await;
    Ok(())
}

#[tokio::test]
async fn timeout_leaves_no_entry_and_late_reply_is_dropped() -> Result<()> {
    let (client, mut engine) = client_pair(50);
    let handle = client.start()?;
    let mut raw = client.raw_updates(8).await;

    let err = client
        .send_and_catch(Request::new("getMe"))
        .await
        .expect_err("no reply was sent");
    assert!(err.is_timeout(), "expected timeout, got {err:?}");
    assert_eq!(client.pending_calls(), 0);

    let req = engine.next_request().await.context("request")?;
    let token = req.correlation_token().context("token")?.to_string();
    assert!(!client.is_pending(&token));

    engine.reply(&req, json!({"@type": "user", "id": 1}))?;
    wait_until(|| client.stats().replies_orphaned == 1).await?;
    assert!(raw.try_recv().is_err());

    drop(engine);
    handle.join().await;
    Ok(())
}

#[tokio::test]
async fn engine_error_reply_becomes_application_error() -> Result<()> {
    let (client, mut engine) = client_pair(5_000);
    let handle = client.start()?;

    let engine_task = tokio::spawn(async move {
        let req = engine.next_request().await.context("request")?;
        engine.reply(&req, json!({"@type": "error", "code": 400, "message": "BAD"}))?;
        Ok::<_, anyhow::Error>(engine)
    });

    let err = client
        .send_and_catch(Request::new("getChat").with("chat_id", 0))
        .await
        .expect_err("engine rejected the call");
    match &err {
        ClientError::Engine { code, message } => {
            assert_eq!(*code, 400);
            assert_eq!(message, "BAD");
        }
        other => bail!("expected engine error, got {other:?}"),
    }
    assert!(!err.is_timeout());

    drop(engine_task.await??);
    handle.join().await;
    Ok(())
}

#[tokio::test]
async fn typed_subscription_receives_only_accepted_updates() -> Result<()> {
    let (client, engine) = client_pair(5_000);
    let mut foos = client.subscribe(|u: &UpdateFoo| u.id == 7, 8).await;
    let mut all_foos = client.subscribe(|_: &UpdateFoo| true, 8).await;
    let mut messages = client.subscribe(|_: &UpdateNewMessage| true, 8).await;
    let handle = client.start()?;

    for id in [5, 7, 9] {
        engine.push_json(&json!({"@type": "updateFoo", "id": id}))?;
    }

    assert_eq!(foos.recv().await, Some(UpdateFoo { id: 7 }));
    for id in [5, 7, 9] {
        assert_eq!(all_foos.recv().await, Some(UpdateFoo { id }));
    }
    assert!(foos.try_recv().is_err());
    assert!(messages.try_recv().is_err());

    drop(engine);
    handle.join().await;
    Ok(())
}

#[tokio::test]
async fn correlated_reply_never_reaches_raw_queue() -> Result<()> {
    let (client, mut engine) = client_pair(5_000);
    let mut raw = client.raw_updates(8).await;
    let mut oks = client.subscribe_kind("ok", |_| true, 8).await;
    let handle = client.start()?;

    let engine_task = tokio::spawn(async move {
        let req = engine.next_request().await.context("request")?;
        engine.reply(&req, json!({"@type": "ok"}))?;
        engine.push_json(&json!({"@type": "updateOption", "name": "version"}))?;
        Ok::<_, anyhow::Error>(engine)
    });

    client.send_and_catch(Request::new("close")).await?;

    let update = raw.recv().await.context("raw update")?;
    assert_eq!(update.kind(), Some("updateOption"));
    assert!(oks.try_recv().is_err());

    drop(engine_task.await??);
    handle.join().await;
    Ok(())
}

#[tokio::test]
async fn malformed_message_does_not_stop_the_loop() -> Result<()> {
    let (client, engine) = client_pair(5_000);
    let mut raw = client.raw_updates(8).await;
    let handle = client.start()?;

    engine.push(b"{not json".to_vec())?;
    engine.push(b"[]".to_vec())?;
    engine.push_json(&json!({"@type": "updateOption", "name": "a"}))?;

    let update = raw.recv().await.context("update after garbage")?;
    assert_eq!(update.get("name").and_then(|v| v.as_str()), Some("a"));
    assert_eq!(client.stats().decode_errors, 2);
    assert!(!handle.is_finished());

    drop(engine);
    handle.join().await;
    Ok(())
}

#[tokio::test]
async fn abandoned_call_future_removes_its_token() -> Result<()> {
    let (client, mut engine) = client_pair(5_000);
    let handle = client.start()?;

    let outcome = tokio::time::timeout(
        Duration::from_millis(30),
        client.send_and_catch(Request::new("getMe")),
    )
    .await;
    assert!(outcome.is_err(), "the outer timeout should fire first");
    assert_eq!(client.pending_calls(), 0);

    let req = engine.next_request().await.context("request")?;
    engine.reply(&req, json!({"@type": "user"}))?;
    wait_until(|| client.stats().replies_orphaned == 1).await?;

    drop(engine);
    handle.join().await;
    Ok(())
}

#[tokio::test]
async fn submit_failure_is_a_transport_error() -> Result<()> {
    let (client, engine) = client_pair(5_000);
    drop(engine);

    let err = client
        .send_and_catch(Request::new("getMe"))
        .await
        .expect_err("engine is gone");
    assert!(matches!(err, ClientError::Transport(TransportError::Closed)));
    assert_eq!(client.pending_calls(), 0);
    Ok(())
}

#[tokio::test]
async fn start_twice_is_rejected() -> Result<()> {
    let (client, engine) = client_pair(5_000);
    let handle = client.start()?;
    assert!(matches!(client.start(), Err(ClientError::AlreadyStarted)));
    drop(engine);
    handle.join().await;
    Ok(())
}

#[tokio::test]
async fn clients_do_not_share_state() -> Result<()> {
    let (a, engine_a) = client_pair(5_000);
    let (b, engine_b) = client_pair(5_000);
    let mut raw_a = a.raw_updates(4).await;
    let mut raw_b = b.raw_updates(4).await;
    let handle_a = a.start()?;
    let handle_b = b.start()?;

    engine_a.push_json(&json!({"@type": "updateOption", "name": "only-a"}))?;
    let got = raw_a.recv().await.context("update for a")?;
    assert_eq!(got.get("name").and_then(|v| v.as_str()), Some("only-a"));
    assert!(raw_b.try_recv().is_err());
    assert_eq!(b.stats().received, 0);

    drop(engine_a);
    drop(engine_b);
    handle_a.join().await;
    handle_b.join().await;
    Ok(())
}

#[tokio::test]
async fn execute_translates_replies() -> Result<()> {
    let (client, engine) = client_pair(5_000);

    assert!(matches!(
        client.get_log_verbosity_level(),
        Err(ClientError::Transport(TransportError::Unsupported(_)))
    ));

    engine.on_execute(|payload| {
        let req: serde_json::Value = serde_json::from_slice(payload).ok()?;
        match req["@type"].as_str()? {
            "getLogVerbosityLevel" => Some(
                json!({"@type": "logVerbosityLevel", "verbosity_level": 2})
                    .to_string()
                    .into_bytes(),
            ),
            "setLogVerbosityLevel" => Some(json!({"@type": "ok"}).to_string().into_bytes()),
            "getTextEntities" => Some(
                json!({"@type": "error", "code": 400, "message": "text must be non-empty"})
                    .to_string()
                    .into_bytes(),
            ),
            _ => None,
        }
    });

    assert_eq!(client.get_log_verbosity_level()?, 2);
    client.set_log_verbosity_level(1)?;

    let err = client
        .execute(&tdlink_protocol::request::sync::get_text_entities(""))
        .expect_err("engine error");
    assert_eq!(err.engine_code(), Some(400));

    let err = client
        .execute(&Request::new("getMe"))
        .expect_err("not executable");
    assert!(matches!(err, ClientError::EmptyResponse));
    Ok(())
}

#[tokio::test]
async fn drop_newest_keeps_replies_flowing_past_a_stuck_subscriber() -> Result<()> {
    let (transport, mut engine) = memory();
    let client = Client::new(
        transport,
        ClientConfig {
            delivery_policy: DeliveryPolicy::DropNewest,
            ..config(2_000)
        },
    );
    let _stuck = client.subscribe(|_: &UpdateFoo| true, 1).await;
    let handle = client.start()?;

    for id in 0..5 {
        engine.push_json(&json!({"@type": "updateFoo", "id": id}))?;
    }

    let engine_task = tokio::spawn(async move {
        let req = engine.next_request().await.context("request")?;
        engine.reply(&req, json!({"@type": "ok"}))?;
        Ok::<_, anyhow::Error>(engine)
    });

    client.send_and_catch(Request::new("getMe")).await?;
    let stats = client.stats();
    assert_eq!(stats.deliveries, 1);
    assert_eq!(stats.dropped_deliveries, 4);

    drop(engine_task.await??);
    handle.join().await;
    Ok(())
}

#[tokio::test]
async fn full_queue_stalls_dispatch_under_block_policy() -> Result<()> {
    let (client, mut engine) = client_pair(200);
    let stuck = client.subscribe(|_: &UpdateFoo| true, 1).await;
    let handle = client.start()?;

    engine.push_json(&json!({"@type": "updateFoo", "id": 1}))?;
    engine.push_json(&json!({"@type": "updateFoo", "id": 2}))?;

    let engine_task = tokio::spawn(async move {
        let req = engine.next_request().await.context("request")?;
        engine.reply(&req, json!({"@type": "ok"}))?;
        Ok::<_, anyhow::Error>(engine)
    });

    // The loop is parked on the second update, so the reply is never routed.
    let err = client
        .send_and_catch(Request::new("getMe"))
        .await
        .expect_err("dispatch is stalled");
    assert!(err.is_timeout());

    // Dropping the receiver releases the loop.
    drop(stuck);
    drop(engine_task.await??);
    tokio::time::timeout(Duration::from_secs(5), handle.join())
        .await
        .context("loop should exit once unblocked")?;
    Ok(())
}

#[tokio::test]
async fn send_does_not_tag_or_wait() -> Result<()> {
    let (client, mut engine) = client_pair(5_000);

    client.send(&Request::new("setOption").with("name", "online"))?;
    let req = engine.next_request().await.context("request")?;
    assert_eq!(req.kind(), Some("setOption"));
    assert_eq!(req.correlation_token(), None);
    assert_eq!(client.pending_calls(), 0);
    Ok(())
}

#[tokio::test]
async fn subscriptions_end_when_engine_goes_away() -> Result<()> {
    let (client, engine) = client_pair(5_000);
    let mut foos = client.subscribe(|_: &UpdateFoo| true, 4).await;
    let handle = client.start()?;

    engine.push_json(&json!({"@type": "updateFoo", "id": 1}))?;
    drop(engine);

    assert_eq!(foos.recv().await, Some(UpdateFoo { id: 1 }));
    assert_eq!(foos.recv().await, None);
    handle.join().await;
    Ok(())
}

#[tokio::test]
async fn subscriptions_made_after_loop_exit_end_at_once() -> Result<()> {
    let (client, engine) = client_pair(5_000);
    let handle = client.start()?;
    drop(engine);
    handle.join().await;

    let mut foos = client.subscribe(|_: &UpdateFoo| true, 4).await;
    let mut kinded = client.subscribe_kind("updateOption", |_| true, 4).await;
    let mut raw = client.raw_updates(4).await;

    let ended = tokio::time::timeout(Duration::from_secs(1), async {
        (foos.recv().await, kinded.recv().await, raw.recv().await)
    })
    .await
    .context("late subscriptions should see end of stream")?;
    assert_eq!(ended.0, None);
    assert!(ended.1.is_none());
    assert!(ended.2.is_none());
    Ok(())
}

#[tokio::test]
async fn many_concurrent_calls_answered_in_shuffled_order() -> Result<()> {
    const CALLS: i64 = 48;
    let (client, mut engine) = client_pair(5_000);
    let handle = client.start()?;

    let engine_task = async move {
        let mut requests = Vec::new();
        for _ in 0..CALLS {
            requests.push(engine.next_request().await.context("request")?);
        }
        requests.shuffle(&mut rand::thread_rng());
        for req in &requests {
            let n = req.get("n").cloned().unwrap_or_default();
            engine.reply(req, json!({"@type": "echo", "n": n}))?;
        }
        Ok::<_, anyhow::Error>(engine)
    };

    let calls = join_all(
        (0..CALLS).map(|n| client.send_and_catch(Request::new("echo").with("n", n))),
    );
    let (replies, engine) = tokio::join!(calls, engine_task);

    for (n, reply) in (0..CALLS).zip(replies) {
        assert_eq!(reply?.get("n").and_then(|v| v.as_i64()), Some(n));
    }
    assert_eq!(client.pending_calls(), 0);
    assert_eq!(client.stats().replies_resolved, CALLS as u64);
    assert_eq!(client.stats().replies_orphaned, 0);

    drop(engine?);
    handle.join().await;
    Ok(())
}

#[tokio::test]
async fn send_and_catch_value_rejects_non_objects() -> Result<()> {
    let (client, _engine) = client_pair(5_000);
    let err = client
        .send_and_catch_value(json!(["getMe"]))
        .await
        .expect_err("arrays are not requests");
    assert!(matches!(err, ClientError::InvalidRequest(_)));
    assert_eq!(client.pending_calls(), 0);
    Ok(())
}

#[test]
fn start_outside_runtime_fails_without_consuming_start() -> Result<()> {
    let (client, engine) = client_pair(5_000);
    assert!(matches!(client.start(), Err(ClientError::NoRuntime)));

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let handle = client.start()?;
        drop(engine);
        handle.join().await;
        Ok::<_, anyhow::Error>(())
    })
}
