//! Owns the TCP listener, the worker pool, and the bounded request queue
//! (spec.md §4.9).
//!
//! Grounded in the raw-`TcpListener` accept-loop style of
//! `pantsbuild-pants`'s `nailgun/src/server.rs` rather than the teacher's
//! own `actix-web`-based `http::start_server`, since spec.md's protocol is
//! a custom binary framing, not HTTP — `tokio`, already a teacher
//! dependency, supplies the runtime either way.

use crate::connection_fsm::{AuthOutcome, ConnectionFsm};
use crate::dispatch::dispatch;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch, Mutex as AsyncMutex};
use whip_lru_core::notification::{notification, Receiver as StopReceiver, Sender as StopSender};
use whip_lru_proto::{uuid_zero, ClientRequest, FrameDecoder, ResponseCode, ServerResponse};
use whip_lru_store::{RemoteProvider, StorageManager};

pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_millis(100);

struct WorkItem {
    request: ClientRequest,
    respond_to: oneshot::Sender<ServerResponse>,
    active_connections: usize,
}

pub struct Server<R: RemoteProvider> {
    storage: Arc<StorageManager<R>>,
    password: String,
    bind_addr: SocketAddr,
    workers: usize,
    grace_period: Duration,
    active_connections: Arc<AtomicUsize>,
    stop_tx: StopSender,
    stop_rx: StopReceiver,
    connections: Arc<AsyncMutex<Vec<tokio::task::JoinHandle<()>>>>,
}

impl<R: RemoteProvider + 'static> Server<R> {
    pub fn new(
        storage: Arc<StorageManager<R>>,
        password: String,
        bind_addr: SocketAddr,
        workers: usize,
        grace_period: Duration,
    ) -> Self {
        let (stop_tx, stop_rx) = notification();
        Server {
            storage,
            password,
            bind_addr,
            workers,
            grace_period,
            active_connections: Arc::new(AtomicUsize::new(0)),
            stop_tx,
            stop_rx,
            connections: Arc::new(AsyncMutex::new(Vec::new())),
        }
    }

    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::SeqCst)
    }

    /// Binds the listener and runs the accept loop plus worker pool until
    /// `stop()` is called. Bridges the blocking `notification::Receiver`
    /// onto a `tokio::sync::watch` channel so async tasks can `select!`
    /// on it without parking a runtime thread.
    pub async fn run(self: Arc<Self>) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        log::info!("listening on {}", self.bind_addr);

        let (watch_tx, watch_rx) = watch::channel(false);
        let stop_rx = self.stop_rx.clone();
        tokio::task::spawn_blocking(move || {
            stop_rx.wait();
            let _ = watch_tx.send(true);
        });

        let queue_depth = self.workers * 4;
        let (work_tx, work_rx) = mpsc::channel::<WorkItem>(queue_depth);
        let work_rx = Arc::new(AsyncMutex::new(work_rx));

        for _ in 0..self.workers {
            let work_rx = Arc::clone(&work_rx);
            let storage = Arc::clone(&self.storage);
            tokio::spawn(async move {
                loop {
                    let item = {
                        let mut rx = work_rx.lock().await;
                        rx.recv().await
                    };
                    match item {
                        Some(item) => {
                            let response =
                                dispatch(item.request, &storage, item.active_connections).await;
                            let _ = item.respond_to.send(response);
                        }
                        None => break,
                    }
                }
            });
        }

        let mut stop_watch = watch_rx.clone();
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            log::warn!("accept failed: {}", e);
                            continue;
                        }
                    };
                    log::debug!("accepted connection from {}", peer);
                    self.spawn_connection(stream, work_tx.clone(), watch_rx.clone()).await;
                }
                _ = stop_watch.changed() => {
                    log::info!("stop requested, closing listener");
                    break;
                }
            }
        }

        drop(work_tx);
        let handles = {
            let mut connections = self.connections.lock().await;
            std::mem::take(&mut *connections)
        };
        let _ = tokio::time::timeout(self.grace_period, futures_join_all(handles)).await;

        Ok(())
    }

    /// Signals every accept loop and connection task to wind down.
    pub fn stop(&self) {
        self.stop_tx.signal();
    }

    async fn spawn_connection(
        &self,
        stream: TcpStream,
        work_tx: mpsc::Sender<WorkItem>,
        stop_watch: watch::Receiver<bool>,
    ) {
        self.active_connections.fetch_add(1, Ordering::SeqCst);
        let active_connections = Arc::clone(&self.active_connections);
        let password = self.password.clone();

        let handle = tokio::spawn(async move {
            let result = handle_connection(
                stream,
                password,
                work_tx,
                stop_watch,
                Arc::clone(&active_connections),
            )
            .await;
            if let Err(e) = result {
                log::debug!("connection closed: {}", e);
            }
            active_connections.fetch_sub(1, Ordering::SeqCst);
        });

        self.connections.lock().await.push(handle);
    }
}

async fn futures_join_all(handles: Vec<tokio::task::JoinHandle<()>>) {
    for handle in handles {
        let _ = handle.await;
    }
}

/// Drives one accepted socket through the auth handshake and then the
/// request/response loop (spec.md §4.8). Requests are processed strictly
/// one at a time per connection: the next frame isn't read until the
/// previous request's response has been written, which is what gives the
/// per-connection FIFO guarantee for free.
async fn handle_connection(
    mut stream: TcpStream,
    password: String,
    work_tx: mpsc::Sender<WorkItem>,
    mut stop_watch: watch::Receiver<bool>,
    active_connections: Arc<AtomicUsize>,
) -> std::io::Result<()> {
    let mut fsm = ConnectionFsm::new(password);
    let challenge = fsm.begin_challenge();
    stream.write_all(&challenge).await?;

    let mut decoder = FrameDecoder::new();
    let mut buf = [0u8; 4096];

    loop {
        let response_digest = loop {
            if let Some(digest) = decoder.try_parse_auth_response() {
                break digest;
            }
            let n = tokio::select! {
                n = stream.read(&mut buf) => n?,
                _ = stop_watch.changed() => return Ok(()),
            };
            if n == 0 {
                return Ok(());
            }
            decoder.feed(&buf[..n]);
        };

        match fsm.verify_response(&response_digest) {
            AuthOutcome::Success => {
                stream.write_all(&[0x00]).await?;
                break;
            }
            AuthOutcome::Failure => {
                stream.write_all(&[0x01]).await?;
                return Ok(());
            }
        }
    }

    loop {
        let request = loop {
            match decoder.try_parse_request() {
                Ok(Some(request)) => break request,
                Ok(None) => {
                    let n = tokio::select! {
                        n = stream.read(&mut buf) => n?,
                        _ = stop_watch.changed() => return Ok(()),
                    };
                    if n == 0 {
                        return Ok(());
                    }
                    decoder.feed(&buf[..n]);
                }
                Err(e) => {
                    // Past the auth phase, a malformed frame is reported
                    // back to the client but doesn't end the connection
                    // (spec.md §7); the decoder has already discarded the
                    // offending bytes so the next frame parses cleanly.
                    log::debug!("frame error, replying with RC_ERROR: {}", e);
                    let response = ServerResponse {
                        code: ResponseCode::Error,
                        id: uuid_zero(),
                        body: e.to_string().into_bytes(),
                    };
                    stream.write_all(&response.encode()).await?;
                }
            }
        };

        let (respond_to, response_rx) = oneshot::channel();
        let item = WorkItem {
            request,
            respond_to,
            active_connections: active_connections.load(Ordering::SeqCst),
        };
        if work_tx.send(item).await.is_err() {
            return Ok(());
        }

        let response = match response_rx.await {
            Ok(response) => response,
            Err(_) => return Ok(()),
        };
        stream.write_all(&response.encode()).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha1::Sha1;
    use whip_lru_proto::{Asset, RequestType, ResponseCode, WireCodec};
    use whip_lru_store::MockRemoteProvider;

    async fn start_server(password: &str) -> (Arc<Server<MockRemoteProvider>>, SocketAddr) {
        let dir = tempfile::tempdir().unwrap();
        let remote = Arc::new(MockRemoteProvider::new());
        let storage = StorageManager::open(dir.path(), 1024 * 1024, 16, remote)
            .await
            .unwrap();

        // Pick a free ephemeral port up front so the test knows the
        // address before `run()`'s own bind happens.
        let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = probe.local_addr().unwrap();
        drop(probe);

        let server = Arc::new(Server::new(
            storage,
            password.to_string(),
            addr,
            2,
            Duration::from_millis(100),
        ));
        let running = Arc::clone(&server);
        tokio::spawn(async move { running.run().await.unwrap() });
        // give the accept loop a moment to bind before the test connects.
        tokio::time::sleep(Duration::from_millis(20)).await;
        (server, addr)
    }

    async fn authenticate(stream: &mut TcpStream, password: &str) {
        let mut challenge = [0u8; 8];
        stream.read_exact(&mut challenge).await.unwrap();

        let mut hasher = Sha1::new();
        hasher.update(&challenge[1..]);
        hasher.update(password.as_bytes());
        let hex = hasher.digest().to_string();

        let mut response = vec![0x00u8];
        response.extend_from_slice(hex.as_bytes());
        stream.write_all(&response).await.unwrap();

        let mut status = [0u8; 1];
        stream.read_exact(&mut status).await.unwrap();
        assert_eq!(status[0], 0x00);
    }

    #[tokio::test]
    async fn put_then_get_over_the_wire() {
        let (_server, addr) = start_server("unittest").await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        authenticate(&mut stream, "unittest").await;

        let id = uuid::Uuid::new_v4();
        let asset = Asset::new(id, 1, false, false, 0, "n".into(), "d".into(), vec![1, 2, 3]);
        let put = ClientRequest {
            kind: RequestType::Put,
            id,
            body: WireCodec::encode(&asset).unwrap(),
        };
        stream.write_all(&put.encode()).await.unwrap();

        let mut decoder = FrameDecoder::new();
        let response = read_response(&mut stream, &mut decoder).await;
        assert_eq!(response.code, ResponseCode::Ok);

        let get = ClientRequest { kind: RequestType::Get, id, body: Vec::new() };
        stream.write_all(&get.encode()).await.unwrap();
        let response = read_response(&mut stream, &mut decoder).await;
        assert_eq!(response.code, ResponseCode::Found);
        assert_eq!(WireCodec::decode(&response.body).unwrap(), asset);
    }

    #[tokio::test]
    async fn wrong_password_closes_connection() {
        let (_server, addr) = start_server("unittest").await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        let mut challenge = [0u8; 8];
        stream.read_exact(&mut challenge).await.unwrap();

        let mut response = vec![0x00u8];
        response.extend_from_slice(&[b'0'; 40]);
        stream.write_all(&response).await.unwrap();

        let mut status = [0u8; 1];
        stream.read_exact(&mut status).await.unwrap();
        assert_eq!(status[0], 0x01);

        let mut buf = [0u8; 1];
        assert_eq!(stream.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn oversized_body_gets_rc_error_and_connection_stays_open() {
        let (_server, addr) = start_server("unittest").await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        authenticate(&mut stream, "unittest").await;

        let mut bad_frame = vec![RequestType::Get as u8];
        bad_frame.extend_from_slice(b"00000000000000000000000000000000");
        bad_frame.extend_from_slice(&(128 * 1024 * 1024u32).to_be_bytes());
        stream.write_all(&bad_frame).await.unwrap();

        let mut decoder = FrameDecoder::new();
        let response = read_response(&mut stream, &mut decoder).await;
        assert_eq!(response.code, ResponseCode::Error);

        // Connection wasn't torn down by the error: the server isn't
        // sitting on a pending close, so a read against it just times out
        // waiting for more data instead of seeing EOF.
        let mut buf = [0u8; 1];
        let read = tokio::time::timeout(Duration::from_millis(50), stream.read(&mut buf)).await;
        assert!(read.is_err(), "connection was closed after a recoverable frame error");
    }

    async fn read_response(stream: &mut TcpStream, decoder: &mut FrameDecoder) -> whip_lru_proto::ServerResponse {
        loop {
            if let Some(response) = decoder.try_parse_response().unwrap() {
                return response;
            }
            let mut buf = [0u8; 4096];
            let n = stream.read(&mut buf).await.unwrap();
            decoder.feed(&buf[..n]);
        }
    }
}
