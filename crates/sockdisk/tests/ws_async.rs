//! Async drive against an in-process WebSocket drive service.

use futures_util::{SinkExt, StreamExt};
use sockdisk::{AsyncDrive, AsyncStreamTransport, DriveConfig};
use sockdisk_protocol::Request;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

const SECTOR_SIZE: usize = 8;
const AHEAD: u8 = 4;
const BLOCK: usize = SECTOR_SIZE * AHEAD as usize;

fn config() -> DriveConfig {
    DriveConfig {
        sector_size: SECTOR_SIZE,
        ahead_range: AHEAD,
        memory_limit: 4 * BLOCK,
        read_only: false,
    }
}

/// One-connection WebSocket drive service: text handshake, a preload frame,
/// then binary requests. READ replies are deliberately split across messages
/// so the client has to reassemble the byte stream. Panics on a WRITE when
/// the grant was read-only.
async fn serve_ws(listener: TcpListener, mode: &'static str, mut disk: Vec<u8>) -> Vec<u8> {
    let (stream, _) = listener.accept().await.unwrap();
    let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

    match ws.next().await.unwrap().unwrap() {
        Message::Text(credentials) => assert_eq!(credentials, "owner&disk0&token"),
        other => panic!("expected handshake text, got {other:?}"),
    }
    ws.send(Message::Text(format!("{mode},{AHEAD},1024")))
        .await
        .unwrap();
    // The production service pushes one preload frame after the grant line;
    // clients must discard it before the first request.
    ws.send(Message::Binary(b"preload".to_vec())).await.unwrap();

    while let Some(msg) = ws.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(_) => break,
        };
        match msg {
            Message::Binary(bytes) => {
                match sockdisk_protocol::decode_request(&bytes, SECTOR_SIZE).unwrap() {
                    Request::Read(read) => {
                        let start = read.origin as usize * SECTOR_SIZE;
                        let raw = &disk[start..start + read.ahead_range as usize * SECTOR_SIZE];
                        let compressed = lz4_flex::block::compress(raw);
                        let payload = if compressed.len() < raw.len() {
                            compressed
                        } else {
                            raw.to_vec()
                        };
                        ws.send(Message::Binary(
                            (payload.len() as u32).to_le_bytes().to_vec(),
                        ))
                        .await
                        .unwrap();
                        let mid = payload.len() / 2;
                        ws.send(Message::Binary(payload[..mid].to_vec()))
                            .await
                            .unwrap();
                        ws.send(Message::Binary(payload[mid..].to_vec()))
                            .await
                            .unwrap();
                    }
                    Request::Write(write) => {
                        assert_eq!(mode, "write", "write received on a read-only grant");
                        let start = write.sector as usize * SECTOR_SIZE;
                        disk[start..start + SECTOR_SIZE].copy_from_slice(write.payload);
                    }
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
    disk
}

fn pattern_disk() -> Vec<u8> {
    (0..16u8).flat_map(|i| vec![b'a' + i; SECTOR_SIZE]).collect()
}

#[tokio::test]
async fn ws_drive_handshakes_reads_and_writes() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = tokio::spawn(serve_ws(listener, "write", pattern_disk()));

    let mut drive = AsyncDrive::open(
        &format!("ws://127.0.0.1:{port}"),
        "owner",
        "disk0",
        "token",
        config(),
    )
    .await
    .unwrap();

    let info = drive.handshake_info().copied().unwrap();
    assert!(info.write_allowed);
    assert_eq!(info.ahead_range, AHEAD);
    assert_eq!(info.size_bytes, 1024 * 1024);
    assert!(!drive.read_only());

    let mut out = [0u8; SECTOR_SIZE];
    drive.read(2, &mut out).await.unwrap();
    assert_eq!(out, [b'c'; SECTOR_SIZE]);

    // Neighbor within the prefetched block: no extra round-trip.
    drive.read(3, &mut out).await.unwrap();
    assert_eq!(out, [b'd'; SECTOR_SIZE]);
    assert_eq!(drive.stats().round_trips, 1);

    drive.write(2, &[b'Z'; SECTOR_SIZE]).await.unwrap();
    drive.read(2, &mut out).await.unwrap();
    assert_eq!(out, [b'Z'; SECTOR_SIZE]);
    assert_eq!(drive.stats().round_trips, 1);

    drop(drive);
    let disk = server.await.unwrap();
    assert_eq!(
        disk[2 * SECTOR_SIZE..3 * SECTOR_SIZE],
        [b'Z'; SECTOR_SIZE][..]
    );
}

#[tokio::test]
async fn read_only_grant_keeps_writes_local() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = tokio::spawn(serve_ws(listener, "read", pattern_disk()));

    let mut drive = AsyncDrive::open(
        &format!("ws://127.0.0.1:{port}"),
        "owner",
        "disk0",
        "token",
        config(),
    )
    .await
    .unwrap();
    assert!(drive.read_only());

    let mut out = [0u8; SECTOR_SIZE];
    drive.read(0, &mut out).await.unwrap();
    assert_eq!(out, [b'a'; SECTOR_SIZE]);

    // Acknowledged locally, patched in the cache, never sent.
    drive.write(0, &[b'Q'; SECTOR_SIZE]).await.unwrap();
    drive.read(0, &mut out).await.unwrap();
    assert_eq!(out, [b'Q'; SECTOR_SIZE]);

    drop(drive);
    // The server saw no write; otherwise its assertion had failed the task.
    let disk = server.await.unwrap();
    assert_eq!(disk, pattern_disk());
}

#[tokio::test]
async fn async_tcp_drive_round_trips() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut disk = pattern_disk();
        loop {
            let mut cmd = [0u8; 1];
            if stream.read_exact(&mut cmd).await.is_err() {
                return disk;
            }
            let mut index = [0u8; 4];
            stream.read_exact(&mut index).await.unwrap();
            let index = u32::from_le_bytes(index) as usize;
            match cmd[0] {
                1 => {
                    let mut ahead = [0u8; 1];
                    stream.read_exact(&mut ahead).await.unwrap();
                    let raw = disk
                        [index * SECTOR_SIZE..(index + ahead[0] as usize) * SECTOR_SIZE]
                        .to_vec();
                    stream
                        .write_all(&(raw.len() as u32).to_le_bytes())
                        .await
                        .unwrap();
                    stream.write_all(&raw).await.unwrap();
                }
                2 => {
                    let mut payload = vec![0u8; SECTOR_SIZE];
                    stream.read_exact(&mut payload).await.unwrap();
                    disk[index * SECTOR_SIZE..(index + 1) * SECTOR_SIZE]
                        .copy_from_slice(&payload);
                }
                _ => return disk,
            }
        }
    });

    let stream = tokio::net::TcpStream::connect(("127.0.0.1", port))
        .await
        .unwrap();
    let mut drive = AsyncDrive::new(AsyncStreamTransport::new(stream), config()).unwrap();

    let mut out = [0u8; SECTOR_SIZE];
    drive.read(5, &mut out).await.unwrap();
    assert_eq!(out, [b'f'; SECTOR_SIZE]);

    drive.write(5, &[b'W'; SECTOR_SIZE]).await.unwrap();
    drive.read(5, &mut out).await.unwrap();
    assert_eq!(out, [b'W'; SECTOR_SIZE]);

    drop(drive);
    let disk = server.await.unwrap();
    assert_eq!(
        disk[5 * SECTOR_SIZE..6 * SECTOR_SIZE],
        [b'W'; SECTOR_SIZE][..]
    );
}
