//! In-process RESP server for exercising the Redis backend without Docker

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// What the server answers to one command
pub(crate) enum Reply {
    Ok,
    Status(&'static str),
    Nil,
    Bulk(String),
    Error(String),
    /// Close the connection without answering
    Hangup,
    /// Answer after a delay
    After(Duration, Box<Reply>),
}

type Handler = dyn Fn(&str, usize) -> Option<Reply> + Send + Sync;
type Calls = Arc<Mutex<HashMap<String, usize>>>;

/// Answers every command through `handler(name, nth_call)`, falling back to
/// `PING`/`+OK` defaults when the handler returns `None`. Call counts are
/// kept per command name across all connections.
pub(crate) struct FakeRedis {
    addr: SocketAddr,
    calls: Calls,
    accept_loop: JoinHandle<()>,
}

impl FakeRedis {
    pub(crate) async fn start<F>(handler: F) -> Self
    where
        F: Fn(&str, usize) -> Option<Reply> + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let calls: Calls = Arc::default();
        let handler: Arc<Handler> = Arc::new(handler);

        let accept_calls = calls.clone();
        let accept_loop = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(stream, handler.clone(), accept_calls.clone()));
            }
        });

        Self {
            addr,
            calls,
            accept_loop,
        }
    }

    pub(crate) fn addr(&self) -> String {
        self.addr.to_string()
    }

    pub(crate) fn calls(&self, command: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(command)
            .copied()
            .unwrap_or(0)
    }
}

impl Drop for FakeRedis {
    fn drop(&mut self) {
        self.accept_loop.abort();
    }
}

async fn serve(stream: TcpStream, handler: Arc<Handler>, calls: Calls) {
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);

    while let Ok(Some(args)) = read_command(&mut reader).await {
        let name = args
            .first()
            .map(|arg| arg.to_ascii_uppercase())
            .unwrap_or_default();

        let nth = {
            let mut calls = calls.lock().unwrap();
            let count = calls.entry(name.clone()).or_insert(0);
            *count += 1;
            *count
        };

        let reply = handler(&name, nth).unwrap_or_else(|| default_reply(&name, &args));
        let reply = match reply {
            Reply::After(delay, reply) => {
                tokio::time::sleep(delay).await;
                *reply
            }
            reply => reply,
        };

        let encoded = match reply {
            Reply::Ok => "+OK\r\n".to_string(),
            Reply::Status(status) => format!("+{}\r\n", status),
            Reply::Nil => "$-1\r\n".to_string(),
            Reply::Bulk(value) => format!("${}\r\n{}\r\n", value.len(), value),
            Reply::Error(message) => format!("-{}\r\n", message),
            Reply::Hangup | Reply::After(..) => return,
        };

        if write.write_all(encoded.as_bytes()).await.is_err() {
            return;
        }
    }
}

fn default_reply(name: &str, args: &[String]) -> Reply {
    match (name, args.get(1)) {
        ("PING", Some(echo)) => Reply::Bulk(echo.clone()),
        ("PING", None) => Reply::Status("PONG"),
        _ => Reply::Ok,
    }
}

/// Read one RESP array of bulk strings. `Ok(None)` on a clean disconnect.
async fn read_command<R>(reader: &mut R) -> io::Result<Option<Vec<String>>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Ok(None);
    }

    let count = parse_header(&line, '*')?;
    let mut args = Vec::with_capacity(count);

    for _ in 0..count {
        line.clear();
        reader.read_line(&mut line).await?;
        let len = parse_header(&line, '$')?;

        let mut buf = vec![0; len + 2];
        reader.read_exact(&mut buf).await?;
        buf.truncate(len);
        args.push(String::from_utf8_lossy(&buf).into_owned());
    }

    Ok(Some(args))
}

fn parse_header(line: &str, prefix: char) -> io::Result<usize> {
    line.trim_end()
        .strip_prefix(prefix)
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, line.to_string()))
}
