//! Image bootstrap sequence and readiness policy.

use kiln_core::testing::{Call, FakeRuntime};
use kiln_core::{
    BootstrapConfig, Bootstrapper, BuilddImage, CoreError, Instance, ReadinessFailure,
    RetryPolicy,
};
use kiln_lxd::{InstanceId, RunEnvironment};
use std::sync::Arc;
use std::time::Duration;

fn fast_config() -> BootstrapConfig {
    let poll = RetryPolicy::new(Duration::from_millis(1), Duration::from_millis(3));
    BootstrapConfig {
        systemd_poll: poll,
        network_poll: poll,
        legacy_seed_grace: Duration::from_millis(10),
        ..Default::default()
    }
}

async fn launched(fake: &Arc<FakeRuntime>) -> Instance {
    let instance = Instance::new(InstanceId::new("builder"), fake.clone(), RunEnvironment::new());
    instance.launch("20.04", "ubuntu-buildd", false).await.unwrap();
    fake.clear_calls();
    instance
}

fn strs(cmd: &[String]) -> Vec<&str> {
    cmd.iter().map(String::as_str).collect()
}

#[tokio::test]
async fn test_sequence_order() {
    let fake = Arc::new(FakeRuntime::new().with_bootstrap_scripts());
    let instance = launched(&fake).await;

    Bootstrapper::new(BuilddImage::Focal, fast_config())
        .run(&instance)
        .await
        .unwrap();

    let pushes: Vec<_> = fake
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            Call::FilePush {
                destination,
                content,
                mode,
                ..
            } => Some((destination, content, mode)),
            _ => None,
        })
        .collect();
    assert_eq!(pushes.len(), 2);
    assert_eq!(pushes[0].0.to_str(), Some("/etc/systemd/network/10-eth0.network"));
    assert!(String::from_utf8_lossy(&pushes[0].1).contains("DHCP=ipv4"));
    assert_eq!(pushes[1].0.to_str(), Some("/etc/hostname"));
    assert_eq!(pushes[1].1, b"kiln-builder");
    assert!(pushes.iter().all(|p| p.2 == 0o644));

    let log = fake.exec_log();
    let log: Vec<Vec<&str>> = log.iter().map(|c| strs(c)).collect();
    let expected: Vec<Vec<&str>> = vec![
        vec!["systemctl", "is-system-running"],
        vec!["systemctl", "enable", "systemd-networkd"],
        vec!["systemctl", "restart", "systemd-networkd"],
        vec!["ln", "-sf", "/run/systemd/resolve/resolv.conf", "/etc/resolv.conf"],
        vec!["systemctl", "enable", "systemd-resolved"],
        vec!["systemctl", "restart", "systemd-resolved"],
        vec!["systemctl", "restart", "systemd-networkd"],
        vec!["getent", "hosts", "snapcraft.io"],
        vec!["apt-get", "update"],
        vec!["apt-get", "install", "dirmngr", "fuse", "udev", "--yes"],
        vec!["systemctl", "enable", "systemd-udevd"],
        vec!["systemctl", "start", "systemd-udevd"],
        vec!["apt-get", "install", "snapd", "sudo", "--yes"],
        vec!["systemctl", "start", "snapd"],
        vec!["snap", "wait", "system", "seed.loaded"],
    ];
    assert_eq!(log, expected);
}

#[tokio::test]
async fn test_xenial_skips_seed_wait() {
    let fake = Arc::new(FakeRuntime::new().with_bootstrap_scripts());
    let instance = launched(&fake).await;

    Bootstrapper::new(BuilddImage::Xenial, fast_config())
        .run(&instance)
        .await
        .unwrap();

    let log = fake.exec_log();
    assert!(!log.iter().any(|c| c[0] == "snap"));
    assert_eq!(strs(log.last().unwrap()), ["systemctl", "start", "snapd"]);
}

#[tokio::test]
async fn test_degraded_systemd_counts_as_ready() {
    let fake = Arc::new(FakeRuntime::new().with_bootstrap_scripts());
    fake.script(&["systemctl", "is-system-running"], "echo degraded; exit 1");
    let instance = launched(&fake).await;

    Bootstrapper::new(BuilddImage::Focal, fast_config())
        .run(&instance)
        .await
        .unwrap();

    let polls = fake.count(|c| matches!(c, Call::Exec(cmd) if cmd[..] == ["systemctl", "is-system-running"]));
    assert_eq!(polls, 1);
}

#[tokio::test]
async fn test_readiness_timeout_warns_and_continues() {
    let fake = Arc::new(FakeRuntime::new().with_bootstrap_scripts());
    fake.script(&["systemctl", "is-system-running"], "echo starting");
    fake.script(&["getent"], "exit 2");
    let instance = launched(&fake).await;

    Bootstrapper::new(BuilddImage::Focal, fast_config())
        .run(&instance)
        .await
        .unwrap();

    let polls = fake.count(|c| matches!(c, Call::Exec(cmd) if cmd[..] == ["systemctl", "is-system-running"]));
    assert_eq!(polls, 3);
    let lookups = fake.count(|c| matches!(c, Call::Exec(cmd) if cmd[0] == "getent"));
    assert_eq!(lookups, 3);
    assert_eq!(
        strs(fake.exec_log().last().unwrap()),
        ["snap", "wait", "system", "seed.loaded"]
    );
}

#[tokio::test]
async fn test_readiness_timeout_aborts_when_configured() {
    let fake = Arc::new(FakeRuntime::new().with_bootstrap_scripts());
    fake.script(&["systemctl", "is-system-running"], "echo starting");
    let instance = launched(&fake).await;

    let config = BootstrapConfig {
        on_timeout: ReadinessFailure::Abort,
        ..fast_config()
    };
    let err = Bootstrapper::new(BuilddImage::Focal, config)
        .run(&instance)
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::ReadinessTimeout { ref check, .. } if check == "systemd"));
    assert!(!fake.exec_log().iter().any(|c| c[0] == "apt-get"));
}

#[tokio::test]
async fn test_install_failure_is_fatal() {
    let fake = Arc::new(FakeRuntime::new().with_bootstrap_scripts());
    fake.script(
        &["apt-get", "install", "snapd"],
        "echo 'E: Unable to locate package snapd' >&2; exit 100",
    );
    let instance = launched(&fake).await;

    let err = Bootstrapper::new(BuilddImage::Focal, fast_config())
        .run(&instance)
        .await
        .unwrap_err();

    match err {
        CoreError::CommandFailed {
            command,
            exit_code,
            stderr,
        } => {
            assert_eq!(command, "apt-get install snapd sudo --yes");
            assert_eq!(exit_code, 100);
            assert_eq!(stderr, "E: Unable to locate package snapd");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!fake
        .exec_log()
        .iter()
        .any(|c| c[..] == ["systemctl", "start", "snapd"]));
}

#[tokio::test]
async fn test_custom_hostname() {
    let fake = Arc::new(FakeRuntime::new().with_bootstrap_scripts());
    let instance = launched(&fake).await;

    let config = BootstrapConfig {
        hostname: "snapcraft-hello".to_string(),
        ..fast_config()
    };
    Bootstrapper::new(BuilddImage::Focal, config)
        .run(&instance)
        .await
        .unwrap();

    assert!(fake.calls().iter().any(|c| matches!(
        c,
        Call::FilePush { destination, content, .. }
            if destination.ends_with("hostname") && content == b"snapcraft-hello"
    )));
}
