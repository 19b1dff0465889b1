// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::path::Path;
use std::path::PathBuf;

use crate::gbm_mesa::drm_node::DriDiscovery;
use crate::gbm_mesa::drm_node::SEPARATE_DC_GPUS;
use crate::gbm_mesa::wrapper::WrapperLoader;

pub const GBM_WRAPPER_NAME: &str = "libgbm_mesa_wrapper.so";
pub const GBM_GET_OPS_SYMBOL: &str = "get_gbm_ops";
pub const DEFAULT_DRI_DIR: &str = "/dev/dri";

/// Where a driver context looks for DRM nodes and the backend library.
#[derive(Clone, Debug)]
pub struct DriverConfig {
    dri_dir: PathBuf,
    wrapper_library: String,
    ops_symbol: String,
    separate_dc_gpus: Vec<String>,
}

impl Default for DriverConfig {
    fn default() -> DriverConfig {
        DriverConfig::new()
    }
}

impl DriverConfig {
    /// Create a new DriverConfig with the names the gbm_mesa driver uses in production.
    pub fn new() -> DriverConfig {
        DriverConfig {
            dri_dir: PathBuf::from(DEFAULT_DRI_DIR),
            wrapper_library: GBM_WRAPPER_NAME.to_string(),
            ops_symbol: GBM_GET_OPS_SYMBOL.to_string(),
            separate_dc_gpus: SEPARATE_DC_GPUS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Set the directory scanned for card and render nodes.
    pub fn set_dri_dir<P: AsRef<Path>>(mut self, dri_dir: P) -> DriverConfig {
        self.dri_dir = dri_dir.as_ref().to_path_buf();
        self
    }

    /// Set the name of the backend library to load.
    pub fn set_wrapper_library(mut self, wrapper_library: &str) -> DriverConfig {
        self.wrapper_library = wrapper_library.to_string();
        self
    }

    /// Set the symbol returning the backend capability table.
    pub fn set_ops_symbol(mut self, ops_symbol: &str) -> DriverConfig {
        self.ops_symbol = ops_symbol.to_string();
        self
    }

    /// Set the driver names of GPUs without their own display controller.
    pub fn set_separate_dc_gpus(mut self, gpus: &[&str]) -> DriverConfig {
        self.separate_dc_gpus = gpus.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn dri_dir(&self) -> &Path {
        &self.dri_dir
    }

    pub fn wrapper_library(&self) -> &str {
        &self.wrapper_library
    }

    pub fn ops_symbol(&self) -> &str {
        &self.ops_symbol
    }

    pub fn separate_dc_gpus(&self) -> &[String] {
        &self.separate_dc_gpus
    }

    pub(crate) fn discovery(&self) -> DriDiscovery {
        DriDiscovery::new(self.dri_dir.clone(), self.separate_dc_gpus.clone())
    }

    pub(crate) fn loader(&self) -> WrapperLoader {
        WrapperLoader::new(self.wrapper_library.clone(), self.ops_symbol.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = DriverConfig::new();
        assert_eq!(config.dri_dir(), Path::new("/dev/dri"));
        assert_eq!(config.wrapper_library(), "libgbm_mesa_wrapper.so");
        assert_eq!(config.ops_symbol(), "get_gbm_ops");
        assert_eq!(config.separate_dc_gpus().len(), 6);
        assert!(config.separate_dc_gpus().iter().any(|g| g == "etnaviv"));
    }

    #[test]
    fn builder_overrides() {
        let config = DriverConfig::new()
            .set_dri_dir("/tmp/dri")
            .set_wrapper_library("libgbm_test.so")
            .set_ops_symbol("get_test_ops")
            .set_separate_dc_gpus(&["vc4"]);

        assert_eq!(config.dri_dir(), Path::new("/tmp/dri"));
        assert_eq!(config.wrapper_library(), "libgbm_test.so");
        assert_eq!(config.ops_symbol(), "get_test_ops");
        assert_eq!(config.separate_dc_gpus(), ["vc4".to_string()]);
    }
}
