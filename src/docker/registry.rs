//! Private image registry joined to the kind container network.
//!
//! A registry *has a* container: registry-specific behavior (build + push
//! of local sources) layers over the generic façade, and tear-down defers
//! to the container's stop-then-remove.

use std::path::Path;
use std::time::Duration;

use bollard::auth::DockerCredentials;
use bollard::image::{BuildImageOptions, PushImageOptions};
use bollard::Docker;
use futures::StreamExt;
use tracing::{info, instrument, warn};

use crate::docker::container::Container;
use crate::error::{Error, Result};

/// Image and network conventions for the kind-local registry.
const REGISTRY_IMAGE: &str = "registry";
const REGISTRY_TAG: &str = "2";
const KIND_NETWORK: &str = "kind";

/// Push attempts against a freshly started registry. The first connection
/// is sometimes reset before the registry is ready to serve.
const PUSH_ATTEMPTS: u32 = 3;
const PUSH_RETRY_DELAY: Duration = Duration::from_millis(500);

/// A `registry:2` container on the `kind` network, publishing the same
/// port on the host so in-cluster mirror lookups of `localhost:<port>`
/// and host-side pushes to `127.0.0.1:<port>` hit the same store.
pub struct ClusterRegistry {
    container: Container,
    port: u16,
    url: String,
}

impl ClusterRegistry {
    /// Assemble a registry descriptor without touching the engine.
    pub fn new(name: &str, port: u16) -> Result<Self> {
        let container = Container::builder()
            .name(name)
            .image(REGISTRY_IMAGE)
            .tag(REGISTRY_TAG)
            .network(KIND_NETWORK)
            .port(port, port)
            .build()?;

        Ok(Self {
            container,
            port,
            url: format!("127.0.0.1:{port}"),
        })
    }

    /// Assemble and start a registry in one step.
    pub async fn launch(name: &str, port: u16) -> Result<Self> {
        let mut registry = Self::new(name, port)?;
        registry.start().await?;
        Ok(registry)
    }

    /// Host-facing address of the registry.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The single port the registry serves on, host and container side.
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn name(&self) -> &str {
        self.container.name()
    }

    pub async fn start(&mut self) -> Result<()> {
        self.container.start().await
    }

    /// Remove the registry container.
    pub async fn delete(&self) -> Result<()> {
        self.container.delete().await
    }

    /// Build an image from `build_path` (a directory with a `Dockerfile`
    /// at its root), tag it `<url>/<name>`, and push it to the registry.
    ///
    /// The push is retried to ride out connection resets from a registry
    /// that only just came up; the build is not.
    #[instrument(skip(self, build_path), fields(registry = %self.url))]
    pub async fn push_image(&self, build_path: &Path, name: &str) -> Result<()> {
        let image = format!("{}/{}", self.url, name);

        info!(%image, "building image");
        self.build_image(build_path, &image).await?;

        info!(%image, "pushing image");
        let mut attempt = 1;
        loop {
            match self.push_tag(&image).await {
                Ok(()) => return Ok(()),
                Err(err) if attempt < PUSH_ATTEMPTS => {
                    warn!(attempt, %err, "push failed, retrying");
                    tokio::time::sleep(PUSH_RETRY_DELAY).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn build_image(&self, build_path: &Path, image: &str) -> Result<()> {
        let context = tar_directory(build_path)?;

        let options = BuildImageOptions {
            dockerfile: "Dockerfile".to_string(),
            t: image.to_string(),
            rm: true,
            ..Default::default()
        };

        let mut stream = self
            .container
            .client()
            .build_image(options, None, Some(context.into()));

        let mut last_error = None;
        while let Some(message) = stream.next().await {
            let info = message?;
            if let Some(error) = info.error {
                if !error.is_empty() {
                    last_error = Some(error);
                }
            }
        }

        match last_error {
            Some(error) => Err(Error::BadImageBuild(error)),
            None => Ok(()),
        }
    }

    async fn push_tag(&self, image: &str) -> Result<()> {
        // The registry has no auth; the engine still wants a credential blob.
        let credentials = DockerCredentials {
            username: Some("holder".to_string()),
            ..Default::default()
        };

        let mut stream = self.container.client().push_image(
            image,
            None::<PushImageOptions<String>>,
            Some(credentials),
        );

        let mut last_error = None;
        while let Some(message) = stream.next().await {
            let info = message?;
            if let Some(error) = info.error {
                if !error.is_empty() {
                    last_error = Some(error);
                }
            }
        }

        match last_error {
            Some(error) => Err(Error::BadImageBuild(error)),
            None => Ok(()),
        }
    }
}

/// Tar up a build context directory for the engine's build endpoint.
fn tar_directory(path: &Path) -> Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    builder.append_dir_all(".", path)?;
    Ok(builder.into_inner()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_engine() -> Option<Docker> {
        Docker::connect_with_local_defaults().ok()
    }

    #[test]
    fn url_reflects_host_port() {
        if local_engine().is_none() {
            return;
        }
        let registry = ClusterRegistry::new("kind-registry", 5000).unwrap();
        assert_eq!(registry.url(), "127.0.0.1:5000");
        assert_eq!(registry.name(), "kind-registry");
        assert_eq!(registry.port(), 5000);
    }

    #[test]
    fn tar_context_includes_dockerfile() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Dockerfile"), "FROM scratch\n").unwrap();

        let bytes = tar_directory(dir.path()).unwrap();
        let mut archive = tar::Archive::new(bytes.as_slice());
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().display().to_string())
            .collect();
        assert!(names.iter().any(|n| n.ends_with("Dockerfile")));
    }
}
