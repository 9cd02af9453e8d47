//! Intermediate image cache.
//!
//! Bootstrapping a base image is slow, so the first provider to need a
//! given `(remote, version, revision)` bootstraps a helper instance once and
//! publishes it as a local image. Later providers launch from that image.
//! Entries are never invalidated automatically; bump the revision instead.

use crate::bootstrap::{BootstrapConfig, Bootstrapper};
use crate::error::Result;
use crate::executor::Executor;
use crate::image::ImageRef;
use crate::instance::Instance;
use kiln_lxd::{InstanceId, RunEnvironment, RuntimeClient, Scope};
use std::sync::Arc;
use std::time::Instant;

/// Result of [`ImageCache::ensure`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheOutcome {
    /// Alias of the cached image.
    pub alias: String,
    /// True if the image already existed.
    pub hit: bool,
}

/// Builds and looks up intermediate images in one project and remote.
pub struct ImageCache {
    runtime: Arc<dyn RuntimeClient>,
    scope: Scope,
    run_environment: RunEnvironment,
    bootstrap: BootstrapConfig,
}

impl ImageCache {
    /// Cache storing images in `scope`.
    pub fn new(
        runtime: Arc<dyn RuntimeClient>,
        scope: Scope,
        run_environment: RunEnvironment,
        bootstrap: BootstrapConfig,
    ) -> Self {
        Self {
            runtime,
            scope,
            run_environment,
            bootstrap,
        }
    }

    /// True if an image holds `alias`.
    pub async fn contains(&self, alias: &str) -> Result<bool> {
        let images = self.runtime.image_list(&self.scope).await?;
        Ok(images.iter().any(|image| image.has_alias(alias)))
    }

    /// Return the alias of the bootstrapped `image`, building it first if
    /// it is not cached yet.
    pub async fn ensure(&self, image_remote: &str, image: &ImageRef) -> Result<CacheOutcome> {
        let alias = image.cache_alias(image_remote);
        if self.contains(&alias).await? {
            tracing::debug!(alias = %alias, "Intermediate image cached");
            return Ok(CacheOutcome { alias, hit: true });
        }

        let start = Instant::now();
        tracing::info!(alias = %alias, "Building intermediate image");

        let helper = Instance::new(
            InstanceId::new(alias.clone())
                .with_project(self.scope.project.clone())
                .with_remote(self.scope.remote.clone()),
            self.runtime.clone(),
            self.run_environment.clone(),
        );

        // A helper left behind by an interrupted build is resumed.
        if helper.exists().await? {
            if !helper.is_running().await? {
                helper.start().await?;
            }
        } else {
            helper.launch(&image.version, image_remote, false).await?;
        }

        if let Err(e) = self.bootstrap_and_publish(&helper, image, &alias).await {
            if let Err(cleanup) = helper.delete(true).await {
                tracing::warn!(alias = %alias, error = %cleanup, "Failed to delete helper instance");
            }
            return Err(e);
        }
        helper.delete(true).await?;

        tracing::info!(
            alias = %alias,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Intermediate image published"
        );
        Ok(CacheOutcome { alias, hit: false })
    }

    async fn bootstrap_and_publish(
        &self,
        helper: &Instance,
        image: &ImageRef,
        alias: &str,
    ) -> Result<()> {
        Bootstrapper::for_image_ref(image.clone(), self.bootstrap.clone())
            .run(helper)
            .await?;
        self.runtime.publish(helper.id(), alias).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use crate::testing::{Call, FakeRuntime};

    fn cache(fake: &Arc<FakeRuntime>) -> ImageCache {
        ImageCache::new(
            fake.clone(),
            Scope::default(),
            RunEnvironment::new(),
            BootstrapConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_hit_skips_bootstrap() {
        let fake = Arc::new(FakeRuntime::new());
        fake.add_image("ubuntu-buildd-20-04-r0");

        let outcome = cache(&fake)
            .ensure("ubuntu-buildd", &ImageRef::new("20.04", 0))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            CacheOutcome {
                alias: "ubuntu-buildd-20-04-r0".into(),
                hit: true
            }
        );
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn test_miss_builds_publishes_and_removes_helper() {
        let fake = Arc::new(FakeRuntime::new().with_bootstrap_scripts());

        let outcome = cache(&fake)
            .ensure("ubuntu-buildd", &ImageRef::new("20.04", 0))
            .await
            .unwrap();

        assert!(!outcome.hit);
        assert!(fake.has_image("ubuntu-buildd-20-04-r0"));
        assert!(!fake.has_instance("ubuntu-buildd-20-04-r0"));
        let calls = fake.calls();
        assert!(calls.contains(&Call::Launch {
            name: "ubuntu-buildd-20-04-r0".into(),
            image: "20.04".into(),
            image_remote: "ubuntu-buildd".into(),
            ephemeral: false,
        }));
        assert!(calls.contains(&Call::Publish {
            name: "ubuntu-buildd-20-04-r0".into(),
            alias: "ubuntu-buildd-20-04-r0".into(),
        }));
    }

    #[tokio::test]
    async fn test_stale_helper_is_resumed() {
        let fake = Arc::new(FakeRuntime::new().with_bootstrap_scripts());
        fake.add_instance("ubuntu-buildd-18-04-r0", false, false);

        cache(&fake)
            .ensure("ubuntu-buildd", &ImageRef::new("18.04", 0))
            .await
            .unwrap();

        assert_eq!(fake.count(|c| matches!(c, Call::Launch { .. })), 0);
        assert_eq!(
            fake.count(|c| matches!(c, Call::Start(n) if n == "ubuntu-buildd-18-04-r0")),
            1
        );
    }

    #[tokio::test]
    async fn test_failed_bootstrap_removes_helper() {
        let fake = Arc::new(FakeRuntime::new().with_bootstrap_scripts());
        fake.script(&["apt-get", "update"], "echo mirror down >&2; exit 100");

        let err = cache(&fake)
            .ensure("ubuntu-buildd", &ImageRef::new("20.04", 0))
            .await
            .unwrap_err();

        assert!(matches!(err, CoreError::CommandFailed { exit_code: 100, .. }));
        assert!(!fake.has_instance("ubuntu-buildd-20-04-r0"));
        assert!(!fake.has_image("ubuntu-buildd-20-04-r0"));
        assert_eq!(fake.count(|c| matches!(c, Call::Publish { .. })), 0);
    }
}
