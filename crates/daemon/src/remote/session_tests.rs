// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::config::{Config, LogDest};
use crate::remote::registry::SessionRegistry;
use std::os::unix::fs::PermissionsExt;
use std::time::Instant;
use super::test_fixtures::{idle_session, session_with_sleep_child};
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

const TEST_DEADLINE: Duration = Duration::from_secs(60);

mod resize_frames {
    use super::*;

    fn frame(payload: &str) -> Vec<u8> {
        let mut bytes = RESIZE_PREFIX.to_vec();
        bytes.extend_from_slice(payload.as_bytes());
        bytes
    }

    #[test]
    fn valid_frame_parses_rows_then_cols() {
        assert_eq!(parse_resize(&frame("80;24t")), Some((80, 24)));
        assert_eq!(parse_resize(&frame("0;0t")), Some((0, 0)));
        assert_eq!(parse_resize(&frame("65535;65535t")), Some((65535, 65535)));
    }

    #[yare::parameterized(
        no_trailing_t    = { "80;24x" },
        missing_cols     = { "80t" },
        empty_payload    = { "t" },
        rows_overflow    = { "65536;24t" },
        cols_overflow    = { "24;65536t" },
        negative_rows    = { "-1;24t" },
        extra_semicolons = { "80;24;10t" },
    )]
    fn malformed_frames_are_rejected(payload: &str) {
        assert_eq!(parse_resize(&frame(payload)), None);
    }

    #[test]
    fn non_prefixed_data_is_not_a_resize() {
        assert_eq!(parse_resize(b"80;24t"), None);
    }
}

mod attach_claims {
    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn one_claim_at_a_time_with_fresh_epochs() {
        let session = idle_session("c1a100");

        let first = session.claim().unwrap();
        assert!(session.claim().is_none());
        session.release(first);

        let second = session.claim().unwrap();
        assert!(second > first);
        session.release(second);

        let _ = session.kill_child();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stale_epoch_cannot_detach_or_release_the_current_claim() {
        let session = idle_session("c1a200");

        let old = session.claim().unwrap();
        session.release(old);
        let current = session.claim().unwrap();

        session.request_detach(old);
        assert!(!session.detach_requested(current));

        session.release(old);
        assert!(session.is_attached());

        session.release(current);
        assert!(!session.is_attached());

        let _ = session.kill_child();
    }
}

/// A stand-in for the WP-CLI binary: drops the `--path=` argument and runs
/// the rest of the sanitized command.
fn write_fake_wp(dir: &Path) -> PathBuf {
    let path = dir.join("wp");
    std::fs::write(&path, "#!/bin/sh\nshift\nexec \"$@\"\n").unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn test_ctx(dir: &Path) -> Arc<RemoteCtx> {
    let config = Config {
        cli_path: write_fake_wp(dir),
        wp_path: dir.to_path_buf(),
        workers_get: 3,
        workers_run: 5,
        log_dest: LogDest::File(dir.join("runner.log")),
        network: None,
        token: Some("tok".to_string()),
    };
    Arc::new(RemoteCtx {
        config: Arc::new(config),
        registry: SessionRegistry::new(),
        token: "tok".to_string(),
    })
}

fn handshake(id: &str, command: &str) -> Handshake {
    Handshake {
        session_id: SessionId::parse(id).unwrap(),
        rows: 24,
        cols: 80,
        command: command.to_string(),
    }
}

async fn live_session(ctx: &Arc<RemoteCtx>, id: &str) -> Arc<Session> {
    let deadline = Instant::now() + TEST_DEADLINE;
    loop {
        if let Some(session) = ctx.registry.lookup(id) {
            return session;
        }
        assert!(Instant::now() < deadline, "session {id} never registered");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Read from `reader` until `collected` contains `needle`.
async fn read_until_contains<R: AsyncRead + Unpin>(
    reader: &mut R,
    collected: &mut Vec<u8>,
    needle: &[u8],
) {
    let deadline = Instant::now() + TEST_DEADLINE;
    let mut buf = [0u8; 4096];
    while !collected
        .windows(needle.len().max(1))
        .any(|w| w == needle)
    {
        assert!(Instant::now() < deadline, "never saw {needle:?}");
        let n = tokio::time::timeout(TEST_DEADLINE, reader.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert!(n > 0, "connection closed before {needle:?}");
        collected.extend_from_slice(&buf[..n]);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn launch_streams_output_logs_it_and_cleans_up() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_ctx(dir.path());
    let hs = handshake("abc123", "echo hello");

    let (client, server) = duplex(64 * 1024);
    let (server_read, server_write) = tokio::io::split(server);
    let task = tokio::spawn(launch(
        Arc::clone(&ctx),
        hs,
        "echo hello".to_string(),
        server_read,
        server_write,
    ));

    let (mut client_read, _client_write) = tokio::io::split(client);
    let mut received = Vec::new();
    tokio::time::timeout(TEST_DEADLINE, client_read.read_to_end(&mut received))
        .await
        .unwrap()
        .unwrap();
    tokio::time::timeout(TEST_DEADLINE, task).await.unwrap().unwrap();

    let received_text = String::from_utf8_lossy(&received);
    assert!(received_text.contains("hello"), "got: {received_text:?}");

    // Everything streamed is exactly what was logged, and the session is gone.
    let logged = std::fs::read(dir.path().join("wp-cli-abc123")).unwrap();
    assert_eq!(logged, received);
    assert!(ctx.registry.lookup("abc123").is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn launch_replaces_a_stale_session_logfile() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("wp-cli-abc123"), b"stale leftovers").unwrap();

    let ctx = test_ctx(dir.path());
    let hs = handshake("abc123", "echo fresh");

    let (client, server) = duplex(64 * 1024);
    let (server_read, server_write) = tokio::io::split(server);
    let task = tokio::spawn(launch(
        Arc::clone(&ctx),
        hs,
        "echo fresh".to_string(),
        server_read,
        server_write,
    ));

    let (mut client_read, _client_write) = tokio::io::split(client);
    let mut received = Vec::new();
    tokio::time::timeout(TEST_DEADLINE, client_read.read_to_end(&mut received))
        .await
        .unwrap()
        .unwrap();
    tokio::time::timeout(TEST_DEADLINE, task).await.unwrap().unwrap();

    let logged = std::fs::read(dir.path().join("wp-cli-abc123")).unwrap();
    assert!(!logged.windows(5).any(|w| w == b"stale"));
}

#[tokio::test(flavor = "multi_thread")]
async fn unbalanced_quotes_refuse_the_launch() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_ctx(dir.path());
    let hs = handshake("abc123", r#"echo "half open"#);

    let (client, server) = duplex(4096);
    let (server_read, server_write) = tokio::io::split(server);
    launch(
        Arc::clone(&ctx),
        hs,
        r#"echo "half open"#.to_string(),
        server_read,
        server_write,
    )
    .await;

    let (mut client_read, _client_write) = tokio::io::split(client);
    let mut reply = Vec::new();
    tokio::time::timeout(TEST_DEADLINE, client_read.read_to_end(&mut reply))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reply, b"WP CLI command is invalid");
    assert!(ctx.registry.lookup("abc123").is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn interactive_session_forwards_input_resizes_and_dies_on_interrupt() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_ctx(dir.path());
    let hs = handshake("cafe02", "cat");

    let (client, server) = duplex(64 * 1024);
    let (server_read, server_write) = tokio::io::split(server);
    let task = tokio::spawn(launch(
        Arc::clone(&ctx),
        hs,
        "cat".to_string(),
        server_read,
        server_write,
    ));

    let session = live_session(&ctx, "cafe02").await;
    let (mut client_read, mut client_write) = tokio::io::split(client);
    let mut received = Vec::new();

    // Plain bytes reach the child and come back out.
    client_write.write_all(b"hi\n").await.unwrap();
    read_until_contains(&mut client_read, &mut received, b"hi").await;

    // A malformed resize frame is skipped and the session survives it.
    let mut malformed = RESIZE_PREFIX.to_vec();
    malformed.extend_from_slice(b"80;24x");
    client_write.write_all(&malformed).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    client_write.write_all(b"ok\n").await.unwrap();
    read_until_contains(&mut client_read, &mut received, b"ok").await;

    // A valid resize frame reaches the PTY without being forwarded.
    let mut resize = RESIZE_PREFIX.to_vec();
    resize.extend_from_slice(b"31;101t");
    client_write.write_all(&resize).await.unwrap();
    let deadline = Instant::now() + TEST_DEADLINE;
    loop {
        let size = session.master.lock().get_size().unwrap();
        if (size.rows, size.cols) == (31, 101) {
            break;
        }
        assert!(Instant::now() < deadline, "resize never applied");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // Interrupt: child killed, output drained, session deregistered.
    client_write.write_all(&[0x03]).await.unwrap();
    tokio::time::timeout(TEST_DEADLINE, client_read.read_to_end(&mut received))
        .await
        .unwrap()
        .unwrap();
    tokio::time::timeout(TEST_DEADLINE, task).await.unwrap().unwrap();

    assert!(ctx.registry.lookup("cafe02").is_none());

    let logged = std::fs::read(dir.path().join("wp-cli-cafe02")).unwrap();
    assert_eq!(logged, received);
    let (logged_count, streamed_count) = session.counters();
    assert_eq!(logged_count, streamed_count);
    // Resize escapes never reach the child, so they cannot be echoed.
    assert!(!logged
        .windows(RESIZE_PREFIX.len())
        .any(|w| w == RESIZE_PREFIX.as_slice()));
}

#[tokio::test(flavor = "multi_thread")]
async fn reattach_catches_up_from_the_last_streamed_byte() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("wp-cli-feedbee");
    let session = session_with_sleep_child("feedbee", log_path.clone());

    // A previous connection consumed 1000 of 4096 logged bytes, then died.
    let payload: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
    std::fs::write(&log_path, &payload).unwrap();
    session.bytes_logged.store(4096, Ordering::Release);
    session.bytes_streamed.store(1000, Ordering::Release);

    let hs = handshake("feedbee", "");
    let (client, server) = duplex(64 * 1024);
    let (server_read, server_write) = tokio::io::split(server);
    let (mut client_read, client_write) = tokio::io::split(client);

    let reattach_fut = reattach(Arc::clone(&session), &hs, server_read, server_write);
    let client_session = Arc::clone(&session);
    let client_payload = payload.clone();
    let client_log_path = log_path.clone();
    let client_fut = async move {
        // Catch-up: bytes 1000..4096, in order, no gaps, no duplicates.
        let mut caught_up = vec![0u8; 3096];
        tokio::time::timeout(TEST_DEADLINE, client_read.read_exact(&mut caught_up))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&caught_up[..], &client_payload[1000..]);

        // Then live bytes follow.
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(&client_log_path)
            .unwrap();
        file.write_all(b"LIVE").unwrap();
        drop(file);
        client_session.add_logged(4);

        let mut live = [0u8; 4];
        tokio::time::timeout(TEST_DEADLINE, client_read.read_exact(&mut live))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&live, b"LIVE");

        // Disconnect; the streamer must notice and release the claim.
        drop(client_read);
        drop(client_write);
    };

    tokio::time::timeout(TEST_DEADLINE, async {
        tokio::join!(reattach_fut, client_fut);
    })
    .await
    .unwrap();

    assert_eq!(session.bytes_streamed.load(Ordering::Acquire), 4100);
    assert_eq!(session.bytes_logged.load(Ordering::Acquire), 4100);
    assert!(!session.is_attached());
    let _ = session.kill_child();
}

#[tokio::test(flavor = "multi_thread")]
async fn second_client_is_rejected_while_one_is_attached() {
    let session = idle_session("cafe03");
    let epoch = session.claim().unwrap();

    let hs = handshake("cafe03", "");
    let (client, server) = duplex(4096);
    let (server_read, server_write) = tokio::io::split(server);
    reattach(Arc::clone(&session), &hs, server_read, server_write).await;

    let (mut client_read, _client_write) = tokio::io::split(client);
    let mut reply = Vec::new();
    tokio::time::timeout(TEST_DEADLINE, client_read.read_to_end(&mut reply))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reply, b"session already attached");

    // The original claim is untouched.
    assert!(session.is_attached());
    session.release(epoch);
    let _ = session.kill_child();
}
