//! Integration test helpers: a scripted engine bridge on a Unix socket.

use anyhow::{Context, Result, bail};
use serde_json::Value;
use std::fs;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

pub type BridgeReader = BufReader<UnixStream>;
pub type BridgeWriter = BufWriter<UnixStream>;

/// Accept one client on `socket_path` and hand both directions to `handler`
/// on a plain thread.
pub fn spawn_mock_bridge<F>(socket_path: PathBuf, handler: F) -> thread::JoinHandle<Result<()>>
where
    F: FnOnce(&mut BridgeReader, &mut BridgeWriter) -> Result<()> + Send + 'static,
{
    thread::spawn(move || {
        if socket_path.exists() {
            let _ = fs::remove_file(&socket_path);
        }

        let listener =
            UnixListener::bind(&socket_path).with_context(|| "failed to bind mock socket")?;
        let (stream, _) = listener.accept().context("failed to accept client")?;
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .context("failed to set read timeout")?;

        let read_half = stream.try_clone().context("failed to clone stream")?;
        let mut reader = BufReader::new(read_half);
        let mut writer = BufWriter::new(stream);
        handler(&mut reader, &mut writer)
    })
}

/// Next request line, parsed as JSON.
pub fn read_request(reader: &mut BridgeReader) -> Result<Value> {
    let mut line = String::new();
    let n = reader.read_line(&mut line)?;
    if n == 0 {
        bail!("client disconnected before request");
    }
    Ok(serde_json::from_str(line.trim_end())?)
}

pub fn write_line(writer: &mut BridgeWriter, line: &str) -> Result<()> {
    writeln!(writer, "{line}")?;
    writer.flush()?;
    Ok(())
}

pub fn write_json(writer: &mut BridgeWriter, value: &Value) -> Result<()> {
    write_line(writer, &value.to_string())
}

/// Answer `request` with `reply`, echoing its `"@extra"`.
pub fn reply_to(writer: &mut BridgeWriter, request: &Value, mut reply: Value) -> Result<()> {
    let token = request
        .get("@extra")
        .cloned()
        .context("request has no @extra")?;
    if let Some(fields) = reply.as_object_mut() {
        fields.insert("@extra".to_string(), token);
    }
    write_json(writer, &reply)
}

/// Block until the client hangs up.
pub fn wait_for_hangup(reader: &mut BridgeReader) -> Result<()> {
    let mut line = String::new();
    while reader.read_line(&mut line)? > 0 {
        line.clear();
    }
    Ok(())
}

pub fn wait_for_socket(path: &Path) -> Result<()> {
    for _ in 0..100 {
        if path.exists() {
            return Ok(());
        }
        thread::sleep(Duration::from_millis(10));
    }
    bail!("socket did not appear: {}", path.display())
}
