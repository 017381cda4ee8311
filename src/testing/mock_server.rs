//! In-process scripted Prodigy server for tests.
//!
//! Mirrors the teacher's `ScpiActor::mock` idiom (a canned-response stand-in for real
//! hardware) but at the transport level: a real `TcpListener` is bound on an ephemeral
//! port and a background task replies to each incoming request according to a script,
//! so broker/acquisition tests exercise the real line-framing and ID-correlation code.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// One scripted exchange: a command name to match against the next incoming
/// request, and the reply body to send back (everything after `!<id> `, e.g.
/// `"OK: Samples:21"` or `"Error: 201 \"spectrum not validated\""`).
pub type ScriptEntry = (String, String);

pub struct MockProdigyServer {
    port: u16,
    handle: JoinHandle<()>,
    received: Arc<Mutex<Vec<String>>>,
}

impl MockProdigyServer {
    /// Start a server that replies to requests in the order given by `script`,
    /// ignoring the command name for matching (acquisition tests issue commands in
    /// a known fixed order, matching the teacher's sequential-mock-response style).
    pub async fn start(script: Vec<ScriptEntry>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let received = Arc::new(Mutex::new(Vec::new()));
        let received_clone = received.clone();

        let handle = tokio::spawn(async move {
            let mut script: VecDeque<ScriptEntry> = script.into_iter().collect();
            if let Ok((stream, _)) = listener.accept().await {
                let (read_half, mut write_half) = stream.into_split();
                let mut reader = BufReader::new(read_half);
                loop {
                    let mut line = String::new();
                    match reader.read_line(&mut line).await {
                        Ok(0) | Err(_) => break,
                        Ok(_) => {}
                    }
                    let line = line.trim_end_matches(['\r', '\n']);
                    if line.is_empty() {
                        continue;
                    }
                    received_clone.lock().unwrap().push(line.to_string());

                    let id = &line[1..5];
                    let Some((_, body)) = script.pop_front() else {
                        break;
                    };
                    let reply = format!("!{id} {body}\n");
                    if write_half.write_all(reply.as_bytes()).await.is_err() {
                        break;
                    }
                }
            }
        });

        Self {
            port,
            handle,
            received,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn received_requests(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }
}

impl Drop for MockProdigyServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
