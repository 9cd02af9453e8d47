//! End-to-end tests against a real LXD installation.
//!
//! These tests require:
//! - Linux with LXD installed (or snapd, to install it)
//! - Network access to the buildd image remote
//!
//! Run with: `cargo test -p kiln-core --test lxd -- --ignored`

use kiln_core::{ExecOptions, Executor, LxdConfig, Provider};
use kiln_lxd::Lxc;
use std::sync::Arc;

/// Setup, run a command, tear down.
#[tokio::test]
#[ignore = "requires Linux + LXD"]
async fn test_echo_in_fresh_instance() {
    let config = LxdConfig::builder()
        .instance_name("kiln-test-echo")
        .build()
        .expect("valid config");
    let mut provider = Provider::lxd(Arc::new(Lxc::new()), config);

    let env = provider.setup().await.expect("setup failed");
    let output = env
        .execute_run(
            &["echo".to_string(), "hi".to_string()],
            &ExecOptions::checked(),
        )
        .await
        .expect("exec failed");
    assert_eq!(output.stdout, b"hi\n");

    provider.teardown(false).await.expect("teardown failed");
    let env = provider.environment().expect("environment kept");
    assert!(!env.exists().await.expect("exists failed"));
}

/// Round-trip a directory through a persistent instance.
#[tokio::test]
#[ignore = "requires Linux + LXD"]
async fn test_sync_round_trip() {
    let config = LxdConfig::builder()
        .instance_name("kiln-test-sync")
        .ephemeral(false)
        .build()
        .expect("valid config");
    let mut provider = Provider::lxd(Arc::new(Lxc::new()), config);
    let env = provider.setup().await.expect("setup failed");

    let src = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(src.path().join("a/b")).unwrap();
    std::fs::write(src.path().join("a/b/file.txt"), "payload").unwrap();

    let remote = std::path::Path::new("/root/kiln-sync");
    env.sync_to(src.path(), remote).await.expect("sync_to failed");

    let dst = tempfile::tempdir().unwrap();
    env.sync_from(remote, dst.path()).await.expect("sync_from failed");
    assert_eq!(
        std::fs::read_to_string(dst.path().join("a/b/file.txt")).unwrap(),
        "payload"
    );

    provider.teardown(true).await.expect("teardown failed");
}
