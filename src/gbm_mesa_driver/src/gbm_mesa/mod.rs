// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! This module implements gralloc buffer allocation on top of Mesa's GBM, reached through
//! the `libgbm_mesa_wrapper.so` shim.  GPUs without their own display controller (vc4,
//! panfrost, ...) allocate through the KMS capable card node of the display driver.

mod backend;
mod bo;
mod combinations;
mod config;
mod driver;
mod drm_node;
#[cfg(test)]
mod fake;
mod formats;
mod wrapper;
mod wrapper_bindings;

pub use backend::Backend;
pub use backend::GBM_MESA_BACKEND_NAME;
pub use bo::bo_create;
pub use bo::bo_destroy;
pub use bo::bo_get_map_stride;
pub use bo::bo_get_plane_fd;
pub use bo::bo_import;
pub use bo::bo_map;
pub use bo::bo_unmap;
pub use bo::inode_to_handle;
pub use bo::Bo;
pub use bo::BoMetadata;
pub use bo::GbmMesaBo;
pub use bo::ImportFdData;
pub use bo::Vma;
pub use combinations::gbm_mesa_combinations;
pub use combinations::Combination;
pub use combinations::Combinations;
pub use combinations::FormatMetadata;
pub use combinations::LINEAR_METADATA;
pub use config::DriverConfig;
pub use driver::DriverContext;
pub use driver::GbmMesaDriver;
pub use drm_node::drop_master;
pub use drm_node::is_kms_dev;
pub use drm_node::open_drm_dev;
pub use drm_node::DriDiscovery;
pub use drm_node::DrmDiscovery;
pub use drm_node::DrmNodeKind;
pub use drm_node::GpuProbe;
pub use drm_node::SEPARATE_DC_GPUS;
pub use formats::*;
pub use wrapper::AllocOutput;
pub use wrapper::AllocRequest;
pub use wrapper::GbmBoHandle;
pub use wrapper::GbmDeviceHandle;
pub use wrapper::GbmOps;
pub use wrapper::MapContext;
pub use wrapper::MappedRegion;
pub use wrapper::OpsLoader;
pub use wrapper::WrapperLoader;
