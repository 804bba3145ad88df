//! Generic container façade over the Docker Engine API.
//!
//! Owns one named container on a set of networks with tcp port bindings.
//! The owner is responsible for tear-down: `delete` stops then removes.

use std::collections::{BTreeMap, HashMap};

use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{EndpointSettings, HostConfig, PortBinding};
use bollard::Docker;
use futures::StreamExt;
use tracing::{debug, info, instrument};

use crate::error::{Error, Result};

/// Grace period handed to the engine when stopping a container.
const STOP_GRACE_SECS: i64 = 5;

/// A named container and its runtime identity.
///
/// `id` is `None` until `start` succeeds.
#[derive(Debug)]
pub struct Container {
    docker: Docker,
    id: Option<String>,
    name: String,
    image: String,
    tag: String,
    networks: Vec<String>,
    /// Container port -> host port, all tcp.
    ports: BTreeMap<u16, u16>,
}

/// Builder for [`Container`]. `name` and `image` are required; the tag
/// defaults to `latest` and an engine handle is created when none is given.
#[derive(Default)]
pub struct ContainerBuilder {
    docker: Option<Docker>,
    name: Option<String>,
    image: Option<String>,
    tag: Option<String>,
    networks: Vec<String>,
    ports: BTreeMap<u16, u16>,
}

impl ContainerBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn network(mut self, network: impl Into<String>) -> Self {
        self.networks.push(network.into());
        self
    }

    /// Bind `container_port` inside the container to `host_port` on 0.0.0.0.
    pub fn port(mut self, container_port: u16, host_port: u16) -> Self {
        self.ports.insert(container_port, host_port);
        self
    }

    pub fn client(mut self, docker: Docker) -> Self {
        self.docker = Some(docker);
        self
    }

    pub fn build(self) -> Result<Container> {
        let name = match self.name {
            Some(name) if !name.is_empty() => name,
            _ => return Err(Error::MissingField("name")),
        };
        let image = match self.image {
            Some(image) if !image.is_empty() => image,
            _ => return Err(Error::MissingField("image")),
        };
        let docker = match self.docker {
            Some(docker) => docker,
            None => Docker::connect_with_local_defaults()?,
        };

        Ok(Container {
            docker,
            id: None,
            name,
            image,
            tag: self.tag.unwrap_or_else(|| "latest".to_string()),
            networks: self.networks,
            ports: self.ports,
        })
    }
}

impl Container {
    pub fn builder() -> ContainerBuilder {
        ContainerBuilder::default()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runtime id assigned by the engine; `None` before a successful start.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub(crate) fn client(&self) -> &Docker {
        &self.docker
    }

    /// Pull the image, create the container on its networks with port
    /// bindings, start it, and record the runtime id.
    #[instrument(skip(self), fields(container = %self.name))]
    pub async fn start(&mut self) -> Result<()> {
        let full_image = format!("{}:{}", self.image, self.tag);
        pull_image(&self.docker, &full_image).await?;

        let config = Config {
            image: Some(full_image),
            exposed_ports: Some(exposed_ports(&self.ports)),
            host_config: Some(HostConfig {
                port_bindings: Some(port_bindings(&self.ports)),
                ..Default::default()
            }),
            networking_config: Some(bollard::container::NetworkingConfig {
                endpoints_config: endpoints_config(&self.networks, &self.name),
            }),
            ..Default::default()
        };

        let created = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: self.name.clone(),
                    platform: None,
                }),
                config,
            )
            .await?;

        self.docker
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await?;

        info!(id = %created.id, "container started");
        self.id = Some(created.id);
        Ok(())
    }

    /// Ask the engine to stop the container with a short grace period.
    /// A container that is already stopped is not an error.
    #[instrument(skip(self), fields(container = %self.name))]
    pub async fn stop(&self) -> Result<()> {
        let Some(id) = self.id.as_deref() else {
            return Ok(());
        };

        match self
            .docker
            .stop_container(id, Some(StopContainerOptions { t: STOP_GRACE_SECS }))
            .await
        {
            Ok(()) => Ok(()),
            // 304: the container was not running.
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Stop then remove the container.
    #[instrument(skip(self), fields(container = %self.name))]
    pub async fn delete(&self) -> Result<()> {
        self.stop().await?;

        let Some(id) = self.id.as_deref() else {
            return Ok(());
        };

        self.docker
            .remove_container(id, None::<RemoveContainerOptions>)
            .await?;

        info!("container removed");
        Ok(())
    }
}

/// Resolve the runtime id of the first container whose listed name,
/// after trimming one leading `/`, equals `name`.
pub async fn lookup_by_name(docker: &Docker, name: &str) -> Result<String> {
    let containers = docker
        .list_containers(None::<ListContainersOptions<String>>)
        .await?;

    for container in containers {
        let names = container.names.unwrap_or_default();
        if names
            .iter()
            .any(|n| n.strip_prefix('/').unwrap_or(n) == name)
        {
            if let Some(id) = container.id {
                return Ok(id);
            }
        }
    }

    Err(Error::BadContainerName(name.to_string()))
}

async fn pull_image(docker: &Docker, image: &str) -> Result<()> {
    debug!(%image, "pulling image");
    let mut stream = docker.create_image(
        Some(CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        }),
        None,
        None,
    );

    while let Some(progress) = stream.next().await {
        progress?;
    }

    Ok(())
}

fn exposed_ports(ports: &BTreeMap<u16, u16>) -> HashMap<String, HashMap<(), ()>> {
    ports
        .keys()
        .map(|container_port| (format!("{container_port}/tcp"), HashMap::new()))
        .collect()
}

fn port_bindings(ports: &BTreeMap<u16, u16>) -> HashMap<String, Option<Vec<PortBinding>>> {
    ports
        .iter()
        .map(|(container_port, host_port)| {
            (
                format!("{container_port}/tcp"),
                Some(vec![PortBinding {
                    host_ip: Some("0.0.0.0".to_string()),
                    host_port: Some(host_port.to_string()),
                }]),
            )
        })
        .collect()
}

fn endpoints_config(
    networks: &[String],
    container_name: &str,
) -> HashMap<String, EndpointSettings> {
    networks
        .iter()
        .map(|network| {
            (
                network.clone(),
                EndpointSettings {
                    aliases: Some(vec![container_name.to_string()]),
                    ..Default::default()
                },
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_requires_name() {
        let err = Container::builder().image("registry").build().unwrap_err();
        assert!(matches!(err, Error::MissingField("name")));
    }

    #[test]
    fn build_requires_image() {
        let err = Container::builder().name("reg").build().unwrap_err();
        assert!(matches!(err, Error::MissingField("image")));
    }

    #[test]
    fn tag_defaults_to_latest() {
        let container = Container::builder()
            .name("reg")
            .image("registry")
            .build()
            .unwrap();
        assert_eq!(container.tag, "latest");
        assert!(container.id().is_none());
    }

    #[test]
    fn port_bindings_use_any_host_ip() {
        let mut ports = BTreeMap::new();
        ports.insert(5000, 5001);

        let bindings = port_bindings(&ports);
        let binding = bindings["5000/tcp"].as_ref().unwrap();
        assert_eq!(binding[0].host_ip.as_deref(), Some("0.0.0.0"));
        assert_eq!(binding[0].host_port.as_deref(), Some("5001"));
    }

    #[test]
    fn endpoint_alias_is_container_name() {
        let endpoints = endpoints_config(&["kind".to_string()], "kind-registry");
        let aliases = endpoints["kind"].aliases.as_ref().unwrap();
        assert_eq!(aliases, &["kind-registry".to_string()]);
    }
}
