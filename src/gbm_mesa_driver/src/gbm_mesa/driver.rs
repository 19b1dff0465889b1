// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! driver: the gbm_mesa driver session and the driver context caching it.

use std::sync::Arc;

use log::error;
use log::info;

use crate::gbm_mesa::combinations::gbm_mesa_combinations;
use crate::gbm_mesa::combinations::Combinations;
use crate::gbm_mesa::config::DriverConfig;
use crate::gbm_mesa::drm_node::DrmDiscovery;
use crate::gbm_mesa::wrapper::GbmDeviceHandle;
use crate::gbm_mesa::wrapper::GbmOps;
use crate::gbm_mesa::wrapper::OpsLoader;
use crate::gbm_os::SafeDescriptor;
use crate::gbm_utils::*;

/// A live binding to the GBM backend: the selected DRM nodes, the loaded capability table
/// and the backend device created on the KMS (or GPU) node.
///
/// Buffer objects hold an `Arc` to the session that produced them, so the session outlives
/// every buffer object even after its driver context is closed.
pub struct GbmMesaDriver {
    gbm_dev: GbmDeviceHandle,
    ops: Box<dyn GbmOps>,
    gbm_node: SafeDescriptor,
    gpu_node: SafeDescriptor,
}

impl GbmMesaDriver {
    /// Selects the DRM nodes, loads the backend and creates the backend device.
    ///
    /// In `mapper_only` mode no KMS node is searched for: mapping only needs a device on the
    /// GPU node. Every resource acquired before a failure is released on return.
    pub fn new(
        discovery: &dyn DrmDiscovery,
        loader: &dyn OpsLoader,
        mapper_only: bool,
    ) -> GbmMesaResult<GbmMesaDriver> {
        let probe = discovery.probe_gpu()?;

        let gbm_node = if probe.separate_dc && !mapper_only {
            info!("GPU require KMSRO entry, searching for separate KMS driver...");
            discovery.find_kms_node()
        } else {
            match &probe.gpu_node {
                Some(fd) => Some(fd.try_clone()?),
                None => None,
            }
        };

        let (gpu_node, gbm_node) = match (probe.gpu_node, gbm_node) {
            (Some(gpu_node), Some(gbm_node)) => (gpu_node, gbm_node),
            _ => {
                error!("Unable to find or open DRM node");
                return Err(GbmMesaError::DrmNodeUnavailable);
            }
        };

        let ops = loader.load()?;
        let gbm_dev = match ops.dev_create(&gbm_node) {
            Some(dev) => dev,
            None => {
                error!("Unable to create gbm_mesa driver");
                return Err(GbmMesaError::GbmDeviceCreation);
            }
        };

        info!("gbm_mesa session created");
        Ok(GbmMesaDriver {
            gbm_dev,
            ops,
            gbm_node,
            gpu_node,
        })
    }

    pub fn ops(&self) -> &dyn GbmOps {
        self.ops.as_ref()
    }

    pub fn gbm_dev(&self) -> GbmDeviceHandle {
        self.gbm_dev
    }

    /// The node the backend device was created on.
    pub fn gbm_node(&self) -> &SafeDescriptor {
        &self.gbm_node
    }

    /// The render node of the GPU.
    pub fn gpu_node(&self) -> &SafeDescriptor {
        &self.gpu_node
    }
}

impl Drop for GbmMesaDriver {
    fn drop(&mut self) {
        // The device has to go before `ops` unloads the library that implements it.
        self.ops.dev_destroy(self.gbm_dev);
        info!("gbm_mesa session destroyed");
    }
}

/// Per host-driver state: the advertised format combinations and the lazily created session.
///
/// Methods creating the session take `&mut self`, so calls that may construct it are
/// serialized per context.
pub struct DriverContext {
    combinations: Combinations,
    session: Option<Arc<GbmMesaDriver>>,
    discovery: Box<dyn DrmDiscovery>,
    loader: Box<dyn OpsLoader>,
}

impl DriverContext {
    /// Returns a context that discovers nodes and loads the backend as `config` describes.
    pub fn new(config: &DriverConfig) -> DriverContext {
        DriverContext::with_backend(Box::new(config.discovery()), Box::new(config.loader()))
    }

    /// Returns a context using the given node discovery and backend loader.
    pub fn with_backend(
        discovery: Box<dyn DrmDiscovery>,
        loader: Box<dyn OpsLoader>,
    ) -> DriverContext {
        let mut ctx = DriverContext {
            combinations: Combinations::new(),
            session: None,
            discovery,
            loader,
        };
        ctx.init();
        ctx
    }

    /// Registers the format combinations the driver advertises.
    pub fn init(&mut self) {
        self.combinations = gbm_mesa_combinations();
    }

    pub fn combinations(&self) -> &Combinations {
        &self.combinations
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    /// Returns the cached session, creating it first if this context has none. A failed
    /// construction caches nothing.
    pub fn get_or_init_driver(&mut self, mapper_only: bool) -> GbmMesaResult<Arc<GbmMesaDriver>> {
        if let Some(session) = &self.session {
            return Ok(session.clone());
        }

        let session = Arc::new(GbmMesaDriver::new(
            self.discovery.as_ref(),
            self.loader.as_ref(),
            mapper_only,
        )?);
        self.session = Some(session.clone());
        Ok(session)
    }

    /// Drops the context's reference to the session. The session itself is destroyed once
    /// the last buffer object using it is gone.
    pub fn close(&mut self) {
        self.session = None;
    }
}
