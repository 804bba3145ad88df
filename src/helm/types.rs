use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// One packaged application to install: release name, target namespace,
/// and the local chart path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelmChart {
    pub name: String,
    pub namespace: String,
    pub path: PathBuf,
}

impl HelmChart {
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            path: path.into(),
        }
    }
}

/// Installed releases keyed by release name.
pub type ChartMap = HashMap<String, HelmChart>;
