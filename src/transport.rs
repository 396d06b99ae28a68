//! Request/reply seam between the review session and the annotation store.
//!
//! Requests are fire-and-forget: each call returns a [`RequestId`] right away
//! and the outcome arrives later through [`Transport::try_recv`], on whatever
//! thread polls it. [`HttpTransport`] runs the requests on a background thread
//! so the UI never blocks on the network.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde_json::Value;
use thiserror::Error;

pub type RequestId = u64;

/// How long dropping the transport waits for a request already on the wire.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(250);

/// Called from the worker thread after each reply is queued.
pub type Waker = Box<dyn Fn() + Send>;

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(Value),
    Binary(Vec<u8>),
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("store returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("response body is not JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to start transport worker: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("transport worker has shut down")]
    Disconnected,
}

#[derive(Debug)]
pub struct Reply {
    pub id: RequestId,
    pub outcome: Result<Payload, TransportError>,
}

pub trait Transport {
    fn get_json(&mut self, path: &str) -> RequestId;
    fn get_binary(&mut self, path: &str) -> RequestId;
    fn put(&mut self, path: &str, body: Value) -> RequestId;

    /// Take one finished reply, oldest first. Never blocks.
    fn try_recv(&mut self) -> Option<Reply>;
}

enum Method {
    GetJson,
    GetBinary,
    Put(Value),
}

struct Job {
    id: RequestId,
    url: String,
    method: Method,
}

enum WorkerMessage {
    Send(Job),
    Shutdown,
}

/// Blocking `reqwest` client driven from a dedicated worker thread.
pub struct HttpTransport {
    base_url: String,
    request_tx: Sender<WorkerMessage>,
    reply_rx: Receiver<Reply>,
    /// Replies for requests that never reached the worker.
    undelivered: VecDeque<Reply>,
    worker: Option<JoinHandle<()>>,
    /// Set on drop; the worker skips any job still queued behind it.
    shutdown: Arc<AtomicBool>,
    next_id: RequestId,
}

impl HttpTransport {
    pub fn spawn(
        base_url: impl Into<String>,
        timeout: Duration,
        waker: Option<Waker>,
    ) -> Result<Self, TransportError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        let (request_tx, request_rx) = mpsc::channel::<WorkerMessage>();
        let (reply_tx, reply_rx) = mpsc::channel::<Reply>();
        let shutdown = Arc::new(AtomicBool::new(false));

        let worker_shutdown = Arc::clone(&shutdown);
        let worker = thread::Builder::new()
            .name("store-transport".to_string())
            .spawn(move || {
                log::debug!("Transport worker started");
                Self::worker_loop(client, request_rx, reply_tx, waker, &worker_shutdown);
                log::debug!("Transport worker exiting");
            })?;

        let base_url = base_url.into();
        log::info!("Talking to annotation store at {base_url}");

        Ok(Self {
            base_url,
            request_tx,
            reply_rx,
            undelivered: VecDeque::new(),
            worker: Some(worker),
            shutdown,
            next_id: 0,
        })
    }

    fn worker_loop(
        client: reqwest::blocking::Client,
        request_rx: Receiver<WorkerMessage>,
        reply_tx: Sender<Reply>,
        waker: Option<Waker>,
        shutdown: &AtomicBool,
    ) {
        loop {
            match request_rx.recv() {
                Ok(WorkerMessage::Send(_)) if shutdown.load(Ordering::Acquire) => break,
                Ok(WorkerMessage::Send(job)) => {
                    let outcome = Self::execute(&client, &job);
                    if reply_tx.send(Reply { id: job.id, outcome }).is_err() {
                        log::warn!("Reply channel closed, transport worker exiting");
                        break;
                    }
                    if let Some(wake) = &waker {
                        wake();
                    }
                }
                Ok(WorkerMessage::Shutdown) | Err(_) => break,
            }
        }
    }

    fn execute(client: &reqwest::blocking::Client, job: &Job) -> Result<Payload, TransportError> {
        let request = match &job.method {
            Method::GetJson | Method::GetBinary => client.get(&job.url),
            Method::Put(body) => client.put(&job.url).json(body),
        };
        log::debug!("Request {} -> {}", job.id, job.url);
        let response = Self::ensure_success(request.send()?)?;

        match job.method {
            Method::GetBinary => Ok(Payload::Binary(response.bytes()?.to_vec())),
            Method::GetJson | Method::Put(_) => {
                let text = response.text()?;
                if text.trim().is_empty() {
                    Ok(Payload::Json(Value::Null))
                } else {
                    Ok(Payload::Json(serde_json::from_str(&text)?))
                }
            }
        }
    }

    fn ensure_success(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, TransportError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    fn endpoint(&self, path: &str) -> String {
        join_url(&self.base_url, path)
    }

    fn enqueue(&mut self, path: &str, method: Method) -> RequestId {
        let id = self.next_id;
        self.next_id += 1;

        let job = Job {
            id,
            url: self.endpoint(path),
            method,
        };
        if self.request_tx.send(WorkerMessage::Send(job)).is_err() {
            log::error!("Transport worker is gone; request {id} not sent");
            self.undelivered.push_back(Reply {
                id,
                outcome: Err(TransportError::Disconnected),
            });
        }
        id
    }
}

impl Transport for HttpTransport {
    fn get_json(&mut self, path: &str) -> RequestId {
        self.enqueue(path, Method::GetJson)
    }

    fn get_binary(&mut self, path: &str) -> RequestId {
        self.enqueue(path, Method::GetBinary)
    }

    fn put(&mut self, path: &str, body: Value) -> RequestId {
        self.enqueue(path, Method::Put(body))
    }

    fn try_recv(&mut self) -> Option<Reply> {
        if let Some(reply) = self.undelivered.pop_front() {
            return Some(reply);
        }
        match self.reply_rx.try_recv() {
            Ok(reply) => Some(reply),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                log::warn!("Transport worker disconnected");
                None
            }
        }
    }
}

impl Drop for HttpTransport {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        let _ = self.request_tx.send(WorkerMessage::Shutdown);
        let Some(handle) = self.worker.take() else {
            return;
        };

        // A request in progress cannot be cancelled, so wait only briefly
        // and let the thread finish it on its own.
        let deadline = Instant::now() + SHUTDOWN_GRACE;
        while !handle.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        if !handle.is_finished() {
            log::debug!("Transport worker still busy with a request; detaching it");
            return;
        }
        if let Err(e) = handle.join() {
            log::warn!("Transport worker panicked: {e:?}");
        }
    }
}

/// Join a base URL and a store path with exactly one slash between them.
pub fn join_url(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// In-memory transport for driving a session from tests.
#[cfg(test)]
pub(crate) mod scripted {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    pub enum Sent {
        GetJson(String),
        GetBinary(String),
        Put(String, Value),
    }

    /// Records every request and hands back only the replies a test queues.
    #[derive(Default)]
    pub struct ScriptedTransport {
        pub sent: Vec<(RequestId, Sent)>,
        replies: VecDeque<Reply>,
        next_id: RequestId,
    }

    impl ScriptedTransport {
        pub fn last(&self) -> &(RequestId, Sent) {
            self.sent.last().expect("no request was sent")
        }

        pub fn respond_json(&mut self, id: RequestId, body: Value) {
            self.replies.push_back(Reply {
                id,
                outcome: Ok(Payload::Json(body)),
            });
        }

        pub fn respond_binary(&mut self, id: RequestId, bytes: Vec<u8>) {
            self.replies.push_back(Reply {
                id,
                outcome: Ok(Payload::Binary(bytes)),
            });
        }

        pub fn fail(&mut self, id: RequestId) {
            self.replies.push_back(Reply {
                id,
                outcome: Err(TransportError::Status {
                    status: 500,
                    body: "internal error".to_string(),
                }),
            });
        }

        fn record(&mut self, sent: Sent) -> RequestId {
            let id = self.next_id;
            self.next_id += 1;
            self.sent.push((id, sent));
            id
        }
    }

    impl Transport for ScriptedTransport {
        fn get_json(&mut self, path: &str) -> RequestId {
            self.record(Sent::GetJson(path.to_string()))
        }

        fn get_binary(&mut self, path: &str) -> RequestId {
            self.record(Sent::GetBinary(path.to_string()))
        }

        fn put(&mut self, path: &str, body: Value) -> RequestId {
            self.record(Sent::Put(path.to_string(), body))
        }

        fn try_recv(&mut self) -> Option<Reply> {
            self.replies.pop_front()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_url_uses_a_single_slash() {
        assert_eq!(
            join_url("http://store:5000", "/annotation?verified=False&LIMIT=1"),
            "http://store:5000/annotation?verified=False&LIMIT=1"
        );
        assert_eq!(
            join_url("http://store:5000/api/", "annotation/5/image"),
            "http://store:5000/api/annotation/5/image"
        );
    }

    #[test]
    fn unreachable_store_reports_a_failure() {
        // Port 9 (discard) on loopback is expected to refuse connections.
        let mut transport =
            HttpTransport::spawn("http://127.0.0.1:9", Duration::from_secs(2), None).unwrap();
        let id = transport.get_json("annotation");

        let reply = loop {
            if let Some(reply) = transport.try_recv() {
                break reply;
            }
            thread::sleep(Duration::from_millis(10));
        };

        assert_eq!(reply.id, id);
        assert!(reply.outcome.is_err());
    }

    #[test]
    fn dropping_does_not_wait_for_a_stalled_store() {
        // Accepts connections into the backlog but never answers.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());

        let mut transport =
            HttpTransport::spawn(base_url, Duration::from_secs(30), None).unwrap();
        for _ in 0..3 {
            transport.get_json("annotation");
        }
        // Let the worker pick up the first request.
        thread::sleep(Duration::from_millis(50));

        let started = Instant::now();
        drop(transport);
        assert!(
            started.elapsed() < Duration::from_secs(5),
            "drop took {:?}",
            started.elapsed()
        );
        drop(listener);
    }
}
