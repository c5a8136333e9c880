// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::config::LogDest;
use std::path::PathBuf;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const TOKEN: &str = "integration-token";

fn test_ctx(dir: &std::path::Path) -> Arc<RemoteCtx> {
    let config = Config {
        cli_path: PathBuf::from("/bin/false"),
        wp_path: dir.to_path_buf(),
        workers_get: 3,
        workers_run: 5,
        log_dest: LogDest::File(dir.join("runner.log")),
        network: None,
        token: Some(TOKEN.to_string()),
    };
    Arc::new(RemoteCtx {
        config: Arc::new(config),
        registry: SessionRegistry::new(),
        token: TOKEN.to_string(),
    })
}

/// Accept one connection on an ephemeral port and run the real handler.
async fn serve_one(ctx: Arc<RemoteCtx>) -> std::net::SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        handle_connection(stream, ctx).await;
    });
    addr
}

#[tokio::test(flavor = "multi_thread")]
async fn forbidden_command_is_refused_over_tcp() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_ctx(dir.path());
    let addr = serve_one(Arc::clone(&ctx)).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    client
        .write_all(format!("{TOKEN};abc123;24;80;db query drop\n").as_bytes())
        .await
        .unwrap();

    let mut reply = Vec::new();
    client.read_to_end(&mut reply).await.unwrap();
    assert_eq!(reply, b"WP CLI command 'db' is not permitted");

    // No child was spawned and the registry is untouched.
    assert!(ctx.registry.lookup("abc123").is_none());
    assert!(!dir.path().join("wp-cli-abc123").exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn wrong_token_closes_without_a_reply() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_ctx(dir.path());
    let addr = serve_one(Arc::clone(&ctx)).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    client
        .write_all(b"wrong-token-value!;abc123;24;80;post list\n")
        .await
        .unwrap();

    let mut reply = Vec::new();
    client.read_to_end(&mut reply).await.unwrap();
    assert!(reply.is_empty());
    assert!(ctx.registry.lookup("abc123").is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn bad_session_id_gets_the_guid_diagnostic_over_tcp() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_ctx(dir.path());
    let addr = serve_one(Arc::clone(&ctx)).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    client
        .write_all(format!("{TOKEN};no hex here;24;80;post list\n").as_bytes())
        .await
        .unwrap();

    let mut reply = Vec::new();
    client.read_to_end(&mut reply).await.unwrap();
    assert_eq!(reply, b"error incorrect GUID format");
}
