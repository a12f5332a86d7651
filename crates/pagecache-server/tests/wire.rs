//! End-to-end tests over the wire protocol.
//!
//! Each test starts a dispatcher on a socket in a fresh temp directory,
//! talks to it with raw client streams, and drains it through the
//! shutdown channel.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::tempdir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use pagecache_common::types::PageNo;
use pagecache_server::dispatcher::Dispatcher;
use pagecache_server::protocol::{MsgType, RequestHeader, ACK_LEN};
use pagecache_storage::engine::{CacheConfig, LruCacheEngine, PageCache};
use pagecache_storage::layout::PageSizeLayout;

struct TestServer {
    engine: Arc<LruCacheEngine>,
    socket_path: PathBuf,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<std::io::Result<()>>,
}

impl TestServer {
    async fn start(dir: &Path, entries: Vec<(u32, u64)>, capacity: usize) -> Self {
        let layout = PageSizeLayout::from_entries(entries).unwrap();
        let engine = Arc::new(
            LruCacheEngine::open(
                dir.join("data.bin"),
                layout,
                CacheConfig::new().with_capacity(capacity),
            )
            .unwrap(),
        );

        let socket_path = dir.join("cache.sock");
        let cache: Arc<dyn PageCache> = engine.clone();
        let dispatcher = Dispatcher::new(cache, &socket_path);

        let (shutdown, rx) = watch::channel(false);
        let handle = tokio::spawn(async move { dispatcher.run(rx).await });

        for _ in 0..200 {
            if socket_path.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(socket_path.exists(), "server did not bind its socket");

        Self {
            engine,
            socket_path,
            shutdown,
            handle,
        }
    }

    async fn connect(&self) -> UnixStream {
        UnixStream::connect(&self.socket_path).await.unwrap()
    }

    /// Drains the server and returns the engine for post-mortem checks.
    async fn stop(self) -> Arc<LruCacheEngine> {
        self.shutdown.send(true).unwrap();
        self.handle.await.unwrap().unwrap();
        assert!(!self.socket_path.exists(), "socket file survived the drain");
        self.engine
    }
}

async fn set_page(stream: &mut UnixStream, no: u32, size: u32, fill: u8) {
    let header = RequestHeader::new(MsgType::Set, PageNo::new(no), size).encode();
    stream.write_all(&header).await.unwrap();
    stream.write_all(&vec![fill; size as usize]).await.unwrap();

    let mut ack = [0u8; ACK_LEN];
    stream.read_exact(&mut ack).await.unwrap();
    assert_eq!(u32::from_ne_bytes(ack), size);
}

async fn get_page(stream: &mut UnixStream, no: u32, size: u32) -> Vec<u8> {
    let header = RequestHeader::new(MsgType::Get, PageNo::new(no), size).encode();
    stream.write_all(&header).await.unwrap();

    let mut ack = [0u8; ACK_LEN];
    stream.read_exact(&mut ack).await.unwrap();
    assert_eq!(u32::from_ne_bytes(ack), size);

    let mut payload = vec![0u8; size as usize];
    stream.read_exact(&mut payload).await.unwrap();
    payload
}

#[tokio::test]
async fn set_get_roundtrip() {
    let dir = tempdir().unwrap();
    let server = TestServer::start(dir.path(), vec![(8192, 4)], 4).await;

    let mut client = server.connect().await;
    set_page(&mut client, 2, 8192, 0xAB).await;
    let payload = get_page(&mut client, 2, 8192).await;
    assert!(payload.iter().all(|&b| b == 0xAB));

    drop(client);
    server.stop().await;
}

#[tokio::test]
async fn fresh_file_reads_zero() {
    let dir = tempdir().unwrap();
    let server = TestServer::start(dir.path(), vec![(8192, 4)], 4).await;

    let mut client = server.connect().await;
    for no in 0..4 {
        let payload = get_page(&mut client, no, 8192).await;
        assert!(payload.iter().all(|&b| b == 0));
    }

    drop(client);
    server.stop().await;
}

#[tokio::test]
async fn size_mismatch_is_skipped_and_connection_survives() {
    let dir = tempdir().unwrap();
    let server = TestServer::start(dir.path(), vec![(8192, 3), (16384, 2)], 4).await;

    let mut client = server.connect().await;

    // Page 3 belongs to the 16 KiB class, so this request produces no
    // response at all.
    let bad = RequestHeader::new(MsgType::Get, PageNo::new(3), 8192).encode();
    client.write_all(&bad).await.unwrap();

    // The same connection still serves the corrected request; the next
    // bytes on the stream belong to it.
    let payload = get_page(&mut client, 3, 16384).await;
    assert!(payload.iter().all(|&b| b == 0));

    drop(client);
    let engine = server.stop().await;
    // The rejected request never touched the cache.
    assert_eq!(engine.stats().accesses(), 1);
}

#[tokio::test]
async fn invalid_msg_type_is_skipped() {
    let dir = tempdir().unwrap();
    let server = TestServer::start(dir.path(), vec![(8192, 4)], 4).await;

    let mut client = server.connect().await;

    let mut bogus = RequestHeader::new(MsgType::Get, PageNo::new(0), 8192).encode();
    bogus[0] = 9;
    client.write_all(&bogus).await.unwrap();

    let payload = get_page(&mut client, 0, 8192).await;
    assert_eq!(payload.len(), 8192);

    drop(client);
    server.stop().await;
}

#[tokio::test]
async fn write_back_survives_restart() {
    let dir = tempdir().unwrap();

    {
        let server = TestServer::start(dir.path(), vec![(8192, 8)], 1).await;
        let mut client = server.connect().await;
        set_page(&mut client, 0, 8192, 0xAA).await;
        // Evicts page 0, which must be written back first.
        set_page(&mut client, 1, 8192, 0xBB).await;
        drop(client);

        let engine = server.stop().await;
        engine.flush_all();
    }

    let server = TestServer::start(dir.path(), vec![(8192, 8)], 1).await;
    let mut client = server.connect().await;
    let payload = get_page(&mut client, 0, 8192).await;
    assert!(payload.iter().all(|&b| b == 0xAA));
    let payload = get_page(&mut client, 1, 8192).await;
    assert!(payload.iter().all(|&b| b == 0xBB));

    drop(client);
    server.stop().await;
}

#[tokio::test]
async fn hit_rate_accounting_over_the_wire() {
    let dir = tempdir().unwrap();
    let server = TestServer::start(dir.path(), vec![(8192, 4)], 4).await;

    let mut client = server.connect().await;
    for _ in 0..3 {
        get_page(&mut client, 0, 8192).await;
    }

    drop(client);
    let engine = server.stop().await;
    assert_eq!(engine.stats().misses(), 1);
    assert_eq!(engine.stats().hits(), 2);
}

#[tokio::test]
async fn concurrent_clients_roundtrip() {
    let dir = tempdir().unwrap();
    let server = TestServer::start(dir.path(), vec![(8192, 8)], 8).await;

    let mut tasks = Vec::new();
    for no in 0..4u32 {
        let mut stream = server.connect().await;
        tasks.push(tokio::spawn(async move {
            let fill = 0x10 + no as u8;
            set_page(&mut stream, no, 8192, fill).await;
            let payload = get_page(&mut stream, no, 8192).await;
            assert!(payload.iter().all(|&b| b == fill));
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    server.stop().await;
}

#[tokio::test]
async fn graceful_shutdown_with_half_sent_payload() {
    let dir = tempdir().unwrap();
    let server = TestServer::start(dir.path(), vec![(8192, 8)], 8).await;

    // A finished write leaves a dirty page behind for the final flush.
    let mut settled = server.connect().await;
    set_page(&mut settled, 0, 8192, 0xAA).await;

    // A stalled client promises a payload and only delivers half of it.
    let mut stalled = server.connect().await;
    let header = RequestHeader::new(MsgType::Set, PageNo::new(1), 8192).encode();
    stalled.write_all(&header).await.unwrap();
    stalled.write_all(&[0xBB; 4096]).await.unwrap();

    // The drain must not wait for the missing 4 KiB.
    let engine = server.stop().await;
    assert_eq!(engine.flush_all(), 1);

    drop(settled);
    drop(stalled);
}
