//! Container engine integration: a generic container façade and the
//! registry specialization built on top of it.

pub mod container;
pub mod registry;

pub use container::{lookup_by_name, Container, ContainerBuilder};
pub use registry::ClusterRegistry;
