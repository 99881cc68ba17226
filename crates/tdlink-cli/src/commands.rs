use std::io::ErrorKind;

use anyhow::{Context, anyhow};
use serde_json::Value;
use tdlink::{Client, Request, TransportError};
use tdlink_protocol::EXTRA_KEY;
use tdlink_protocol::update::UpdateNewMessage;
use tokio::sync::mpsc;
use tracing::debug;

use crate::config::CliConfig;

async fn connect(config: &CliConfig) -> anyhow::Result<Client> {
    let socket_path = config.socket_path();
    let transport = tdlink::transport::connect(&socket_path)
        .await
        .map_err(|e| match e {
            TransportError::Io(err)
                if matches!(err.kind(), ErrorKind::NotFound | ErrorKind::ConnectionRefused) =>
            {
                anyhow!(
                    "engine bridge is not running at {}",
                    socket_path.display()
                )
            }
            other => anyhow!(
                "failed to connect to engine bridge at {}: {other}",
                socket_path.display()
            ),
        })?;
    Ok(Client::new(transport, config.client.clone()))
}

fn parse_request(raw: &str) -> anyhow::Result<Request> {
    let value: Value = serde_json::from_str(raw).context("request is not valid JSON")?;
    let request = Request::from_value(value).context("request must be a JSON object")?;
    if request.kind().is_none() {
        anyhow::bail!("request has no \"@type\"");
    }
    Ok(request)
}

/// Print each item as one JSON line until `count` items, end of stream or Ctrl-C.
async fn print_lines<T>(
    mut rx: mpsc::Receiver<T>,
    count: Option<usize>,
    render: impl Fn(T) -> serde_json::Result<String>,
) -> anyhow::Result<usize> {
    let mut printed = 0;
    while count.is_none_or(|max| printed < max) {
        let item = tokio::select! {
            item = rx.recv() => item,
            _ = tokio::signal::ctrl_c() => break,
        };
        let Some(item) = item else {
            break;
        };
        println!("{}", render(item)?);
        printed += 1;
    }
    Ok(printed)
}

/// Send one request and print its reply without the correlation token.
pub async fn call(config: &CliConfig, raw: &str) -> anyhow::Result<()> {
    let request = parse_request(raw)?;
    let client = connect(config).await?;
    let handle = client.start()?;

    let result = client.send_and_catch(request).await;
    handle.stop().await;

    let (_, mut fields) = result?.into_parts();
    fields.remove(EXTRA_KEY);
    println!("{}", serde_json::to_string(&fields)?);
    Ok(())
}

/// Stream updates, optionally only one kind.
pub async fn listen(
    config: &CliConfig,
    kind: Option<String>,
    count: Option<usize>,
) -> anyhow::Result<()> {
    let client = connect(config).await?;
    let updates = match &kind {
        Some(kind) => {
            let capacity = client.config().raw_updates_capacity;
            client.subscribe_kind(kind, |_| true, capacity).await
        }
        None => client.default_raw_updates().await,
    };
    let handle = client.start()?;

    let printed = print_lines(updates, count, |update| {
        serde_json::to_string(update.fields())
    })
    .await?;
    debug!(printed, kind = kind.as_deref().unwrap_or("*"), "listen finished");

    handle.stop().await;
    Ok(())
}

/// Stream new messages of `chat_id`.
pub async fn messages(config: &CliConfig, chat_id: i64, count: Option<usize>) -> anyhow::Result<()> {
    let client = connect(config).await?;
    let messages = client
        .subscribe(
            move |update: &UpdateNewMessage| update.message.chat_id == chat_id,
            client.config().raw_updates_capacity,
        )
        .await;
    let handle = client.start()?;

    let printed = print_lines(messages, count, |update| {
        serde_json::to_string(&update.message)
    })
    .await?;
    debug!(printed, chat_id, "messages finished");

    handle.stop().await;
    Ok(())
}
