//! Integration tests for kiln-lxd.
//!
//! These tests require:
//! - Linux with LXD installed and initialised
//! - Network access to the `ubuntu:` image remote
//!
//! Run with: `cargo test -p kiln-lxd -- --ignored`

use kiln_lxd::{InstanceId, LaunchRequest, Lxc, LxdError, RunEnvironment, RuntimeClient};
use std::collections::BTreeMap;

fn image() -> String {
    std::env::var("KILN_TEST_IMAGE").unwrap_or_else(|_| "20.04".to_string())
}

fn launch_request(name: &str, ephemeral: bool) -> LaunchRequest {
    LaunchRequest {
        instance: InstanceId::new(name),
        image_remote: "ubuntu".into(),
        image: image(),
        config: BTreeMap::new(),
        ephemeral,
    }
}

/// Launch -> exec -> list -> force delete
#[tokio::test]
#[ignore = "requires Linux + LXD"]
async fn test_exec_and_force_delete() {
    let lxc = Lxc::new();
    let request = launch_request("kiln-it-exec", true);
    lxc.launch(&request).await.expect("Failed to launch");

    let output = lxc
        .exec(
            &request.instance,
            &["echo".to_string(), "this is a test".to_string()],
            &RunEnvironment::new(),
            None,
        )
        .output()
        .await
        .expect("Failed to exec");
    assert_eq!(output.stdout, b"this is a test\n");

    let instances = lxc.list(&request.instance).await.expect("Failed to list");
    assert!(instances.iter().any(|i| i.name == "kiln-it-exec"));

    lxc.delete(&request.instance, true)
        .await
        .expect("Failed to delete");
    let instances = lxc.list(&request.instance).await.expect("Failed to list");
    assert!(!instances.iter().any(|i| i.name == "kiln-it-exec"));
}

/// Deleting a running instance without force fails until it is stopped
#[tokio::test]
#[ignore = "requires Linux + LXD"]
async fn test_delete_without_force() {
    let lxc = Lxc::new();
    let request = launch_request("kiln-it-noforce", false);
    lxc.launch(&request).await.expect("Failed to launch");

    let err = lxc.delete(&request.instance, false).await.unwrap_err();
    assert!(matches!(err, LxdError::CommandFailed { .. }));

    lxc.stop(&request.instance).await.expect("Failed to stop");
    lxc.delete(&request.instance, false)
        .await
        .expect("Failed to delete stopped instance");
}

/// Profiles round-trip through show/edit
#[tokio::test]
#[ignore = "requires Linux + LXD"]
async fn test_profile_show_edit() {
    let lxc = Lxc::new();
    let scope = kiln_lxd::Scope::default();
    let profile = lxc
        .profile_show(&scope, "default")
        .await
        .expect("Failed to show profile");
    lxc.profile_edit(&scope, "default", &profile)
        .await
        .expect("Failed to edit profile");
    let again = lxc
        .profile_show(&scope, "default")
        .await
        .expect("Failed to show profile");
    assert_eq!(profile.get("config"), again.get("config"));
}

/// Publish -> image list -> image delete
#[tokio::test]
#[ignore = "requires Linux + LXD"]
async fn test_publish_and_image_delete() {
    let lxc = Lxc::new();
    let request = launch_request("kiln-it-publish", false);
    let alias = "kiln-it-publish-image";
    let scope = request.instance.scope();
    lxc.launch(&request).await.expect("Failed to launch");

    lxc.publish(&request.instance, alias)
        .await
        .expect("Failed to publish");
    let images = lxc.image_list(&scope).await.expect("Failed to list images");
    assert!(images.iter().any(|i| i.has_alias(alias)));

    lxc.image_delete(&scope, alias)
        .await
        .expect("Failed to delete image");
    let images = lxc.image_list(&scope).await.expect("Failed to list images");
    assert!(!images.iter().any(|i| i.has_alias(alias)));

    lxc.delete(&request.instance, true)
        .await
        .expect("Failed to delete");
}
