//! Renders the kind cluster configuration document.
//!
//! The rendered document wires a containerd registry mirror so in-cluster
//! pulls of `localhost:<port>` resolve to the local registry container, and
//! lays out the requested control-plane and worker nodes. Rendering is a
//! pure function of the inputs: no I/O, no failure modes.

use std::fmt;

/// A host-port to container-port mapping exposed on the first
/// control-plane node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodePort {
    pub host: u16,
    pub container: u16,
}

impl NodePort {
    pub fn new(host: u16, container: u16) -> Self {
        Self { host, container }
    }
}

/// Inputs for one rendered kind configuration.
///
/// Constructed once per bring-up and not mutated afterwards.
#[derive(Debug, Clone)]
pub struct KindConfig {
    pub name: String,
    pub control_plane_nodes: u32,
    pub worker_nodes: u32,
    pub node_ports: Vec<NodePort>,
    pub registry_address: String,
    pub registry_port: u16,
}

impl KindConfig {
    pub fn new(
        name: impl Into<String>,
        control_plane_nodes: u32,
        worker_nodes: u32,
        node_ports: Vec<NodePort>,
        registry_address: impl Into<String>,
        registry_port: u16,
    ) -> Self {
        Self {
            name: name.into(),
            control_plane_nodes,
            worker_nodes,
            node_ports,
            registry_address: registry_address.into(),
            registry_port,
        }
    }
}

impl fmt::Display for KindConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "kind: Cluster")?;
        writeln!(f, "apiVersion: kind.x-k8s.io/v1alpha4")?;
        writeln!(f, "name: {}", self.name)?;
        writeln!(f, "containerdConfigPatches:")?;
        writeln!(f, "- |-")?;
        writeln!(
            f,
            "  [plugins.\"io.containerd.grpc.v1.cri\".registry.mirrors.\"localhost:{}\"]",
            self.registry_port
        )?;
        writeln!(
            f,
            "    endpoint = [\"http://{}:{}\"]",
            self.registry_address, self.registry_port
        )?;
        writeln!(f, "nodes:")?;

        // Only the first control-plane node carries the extra port mappings.
        writeln!(f, "- role: control-plane")?;
        if !self.node_ports.is_empty() {
            writeln!(f, "  extraPortMappings:")?;
            for port in &self.node_ports {
                writeln!(f, "  - containerPort: {}", port.container)?;
                writeln!(f, "    hostPort: {}", port.host)?;
            }
        }

        for _ in 1..self.control_plane_nodes {
            writeln!(f, "- role: control-plane")?;
        }

        for _ in 0..self.worker_nodes {
            writeln!(f, "- role: worker")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_node_config_renders() {
        let config = KindConfig::new("solo", 1, 0, vec![], "kind-registry", 5000);
        let rendered = config.to_string();

        assert!(rendered.starts_with("kind: Cluster\n"));
        assert!(rendered.contains("name: solo"));
        assert_eq!(rendered.matches("- role: control-plane").count(), 1);
        assert!(!rendered.contains("- role: worker"));
        assert!(!rendered.contains("extraPortMappings"));
    }

    #[test]
    fn mirror_patch_targets_registry() {
        let config = KindConfig::new("mirror", 1, 0, vec![], "kind-registry", 5001);
        let rendered = config.to_string();

        assert!(rendered.contains(
            "[plugins.\"io.containerd.grpc.v1.cri\".registry.mirrors.\"localhost:5001\"]"
        ));
        assert!(rendered.contains("endpoint = [\"http://kind-registry:5001\"]"));
    }

    #[test]
    fn port_mappings_attach_to_first_control_plane_only() {
        let config = KindConfig::new(
            "ports",
            2,
            1,
            vec![NodePort::new(8080, 80)],
            "kind-registry",
            5000,
        );
        let rendered = config.to_string();

        let first = rendered.find("- role: control-plane").unwrap();
        let mappings = rendered.find("extraPortMappings:").unwrap();
        let second = rendered[first + 1..].find("- role: control-plane").unwrap() + first + 1;
        assert!(first < mappings && mappings < second);
        assert_eq!(rendered.matches("extraPortMappings").count(), 1);
        assert!(rendered.contains("  - containerPort: 80\n    hostPort: 8080\n"));
    }

    #[test]
    fn rendering_is_deterministic() {
        let config = KindConfig::new(
            "stable",
            3,
            2,
            vec![NodePort::new(8080, 80), NodePort::new(8443, 443)],
            "kind-registry",
            5000,
        );
        assert_eq!(config.to_string(), config.to_string());
    }
}
