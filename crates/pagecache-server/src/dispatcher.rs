//! Connection handling and request dispatch.
//!
//! The dispatcher owns a local stream socket bound to a filesystem path.
//! Every accepted connection gets its own worker task and a stable,
//! monotonically increasing worker index. A worker loops reading frames,
//! calling the cache, and writing responses; requests on one connection
//! are answered strictly in arrival order.
//!
//! Cache calls are synchronous (they latch pages and touch disk), so
//! workers run them on the blocking pool, moving the scratch buffer into
//! the closure and back out.
//!
//! On shutdown the accept loop exits, each worker's pending read is
//! cancelled and its socket shut down, all workers are joined, and the
//! socket file is unlinked. In-flight cache operations are never
//! interrupted; a worker notices shutdown between requests.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use tokio::task::{self, JoinHandle};
use tracing::{debug, error, info, warn};

use pagecache_common::constants::MAX_PAGE_SIZE;
use pagecache_storage::engine::PageCache;

use crate::protocol::{MsgType, ProtocolError, RequestHeader, HEADER_LEN};

/// The connection-per-client server in front of the cache.
pub struct Dispatcher {
    cache: Arc<dyn PageCache>,
    socket_path: PathBuf,
}

impl Dispatcher {
    /// Creates a dispatcher serving `cache` on `socket_path`.
    pub fn new(cache: Arc<dyn PageCache>, socket_path: impl Into<PathBuf>) -> Self {
        Self {
            cache,
            socket_path: socket_path.into(),
        }
    }

    /// Returns the socket path.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Binds the socket and serves clients until `shutdown` flips.
    ///
    /// The socket path is unlinked before bind (a stale file from an
    /// earlier run would fail the bind) and again after the drain. The
    /// listener backlog tokio configures (1024) comfortably covers the
    /// expected connection burst.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> io::Result<()> {
        match std::fs::remove_file(&self.socket_path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        let listener = UnixListener::bind(&self.socket_path)?;
        info!(socket = %self.socket_path.display(), "listening for clients");

        let (drain_tx, drain_rx) = watch::channel(false);
        let mut workers: Vec<JoinHandle<()>> = Vec::new();
        let mut next_worker_id = 0usize;

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, _addr)) => {
                        let worker_id = next_worker_id;
                        next_worker_id += 1;
                        debug!(worker_id, "client connected");
                        workers.push(task::spawn(worker_loop(
                            Arc::clone(&self.cache),
                            stream,
                            worker_id,
                            drain_rx.clone(),
                        )));
                    }
                    Err(e) => {
                        if *shutdown.borrow() {
                            info!("accept aborted by shutdown");
                        } else {
                            error!(error = %e, "accept failed");
                        }
                        break;
                    }
                },
                _ = shutdown.changed() => {
                    info!("shutdown requested, draining workers");
                    break;
                }
            }
        }

        // Stop accepting before the workers drain.
        drop(listener);

        let _ = drain_tx.send(true);
        for worker in workers {
            if let Err(e) = worker.await {
                error!(error = %e, "worker task failed");
            }
        }

        if let Err(e) = std::fs::remove_file(&self.socket_path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(error = %e, "failed to unlink socket file");
            }
        }
        info!("server closed");
        Ok(())
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("socket_path", &self.socket_path)
            .finish()
    }
}

/// Serves one client connection until the peer closes, a hard error
/// occurs, or shutdown is requested.
async fn worker_loop(
    cache: Arc<dyn PageCache>,
    mut stream: UnixStream,
    worker_id: usize,
    mut shutdown: watch::Receiver<bool>,
) {
    // One scratch buffer per connection, sized for the largest page class.
    let mut scratch = vec![0u8; MAX_PAGE_SIZE];
    let mut header_buf = [0u8; HEADER_LEN];

    loop {
        let read = tokio::select! {
            read = read_full(&mut stream, &mut header_buf) => read,
            _ = shutdown.changed() => {
                debug!(worker_id, "read cancelled by shutdown");
                break;
            }
        };
        match read {
            Ok(0) => {
                debug!(worker_id, "peer closed connection");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                error!(worker_id, error = %e, "request read failed");
                break;
            }
        }

        let header = match RequestHeader::decode(&header_buf) {
            Ok(header) => header,
            Err(err @ ProtocolError::InvalidMsgType(_)) => {
                // The frame carried no payload we could misinterpret, so
                // the connection stays usable.
                warn!(worker_id, %err, "skipping request");
                continue;
            }
            Err(err) => {
                warn!(worker_id, %err, "closing connection");
                break;
            }
        };
        let size = header.page_size as usize;

        match header.msg_type {
            MsgType::Set => {
                let read = tokio::select! {
                    read = read_full(&mut stream, &mut scratch[..size]) => read,
                    _ = shutdown.changed() => {
                        debug!(worker_id, "read cancelled by shutdown");
                        break;
                    }
                };
                match read {
                    Ok(0) => {
                        debug!(worker_id, "peer closed mid-payload");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(worker_id, error = %e, "payload read failed");
                        break;
                    }
                }

                let result = {
                    let cache = Arc::clone(&cache);
                    let buf = std::mem::take(&mut scratch);
                    match task::spawn_blocking(move || {
                        let result =
                            cache.write_page(header.page_no, header.page_size, &buf[..size], worker_id);
                        (buf, result)
                    })
                    .await
                    {
                        Ok((buf, result)) => {
                            scratch = buf;
                            result
                        }
                        Err(e) => {
                            error!(worker_id, error = %e, "cache task failed");
                            break;
                        }
                    }
                };
                if let Err(err) = result {
                    warn!(worker_id, %err, "write rejected");
                    continue;
                }

                if let Err(e) = stream.write_all(&header.page_size.to_ne_bytes()).await {
                    error!(worker_id, error = %e, "response write failed");
                    break;
                }
            }
            MsgType::Get => {
                let result = {
                    let cache = Arc::clone(&cache);
                    let mut buf = std::mem::take(&mut scratch);
                    match task::spawn_blocking(move || {
                        let result =
                            cache.read_page(header.page_no, header.page_size, &mut buf[..size], worker_id);
                        (buf, result)
                    })
                    .await
                    {
                        Ok((buf, result)) => {
                            scratch = buf;
                            result
                        }
                        Err(e) => {
                            error!(worker_id, error = %e, "cache task failed");
                            break;
                        }
                    }
                };
                if let Err(err) = result {
                    warn!(worker_id, %err, "read rejected");
                    continue;
                }

                if let Err(e) = stream.write_all(&header.page_size.to_ne_bytes()).await {
                    error!(worker_id, error = %e, "response write failed");
                    break;
                }
                if let Err(e) = stream.write_all(&scratch[..size]).await {
                    error!(worker_id, error = %e, "response write failed");
                    break;
                }
            }
        }
    }

    let _ = stream.shutdown().await;
    cache.log_hit_rate();
    debug!(worker_id, "worker exit");
}

/// Reads exactly `buf.len()` bytes, retrying short reads.
///
/// Returns `Ok(0)` if the peer closed the connection, even mid-frame;
/// `Ok(buf.len())` on a complete read. Interrupted reads are retried by
/// the runtime.
async fn read_full(stream: &mut UnixStream, buf: &mut [u8]) -> io::Result<usize> {
    let want = buf.len();
    let mut filled = 0;
    while filled < want {
        let n = stream.read(&mut buf[filled..]).await?;
        if n == 0 {
            return Ok(0);
        }
        filled += n;
    }
    Ok(want)
}
