// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! backend: the entry points a host allocator calls into.

use std::os::raw::c_void;
use std::ptr::NonNull;

use crate::gbm_mesa::bo;
use crate::gbm_mesa::bo::Bo;
use crate::gbm_mesa::bo::ImportFdData;
use crate::gbm_mesa::bo::Vma;
use crate::gbm_mesa::combinations::Combinations;
use crate::gbm_mesa::driver::DriverContext;
use crate::gbm_mesa::formats;
use crate::gbm_mesa::formats::DrmFormat;
use crate::gbm_os::SafeDescriptor;
use crate::gbm_utils::GbmMesaResult;

pub const GBM_MESA_BACKEND_NAME: &str = "gbm_mesa";

/// Trait implemented by allocation backends of a minigbm style host allocator.
///
/// Errors convert to the host's negative errno convention with
/// [`GbmMesaError::to_errno`](crate::GbmMesaError::to_errno).
pub trait Backend: Send {
    fn name(&self) -> &'static str;

    /// Registers the supported format combinations.
    fn init(&mut self) -> GbmMesaResult<()>;

    /// Releases the driver session, if any.
    fn close(&mut self);

    fn combinations(&self) -> &Combinations;

    /// Returns the concrete format and use flags to allocate a request with.
    fn resolve_format_and_use_flags(&self, format: DrmFormat, use_flags: u64) -> (DrmFormat, u64);

    fn bo_create(
        &mut self,
        bo: &mut Bo,
        width: u32,
        height: u32,
        format: DrmFormat,
        use_flags: u64,
    ) -> GbmMesaResult<()>;

    fn bo_import(&mut self, bo: &mut Bo, data: &ImportFdData) -> GbmMesaResult<()>;

    fn bo_destroy(&mut self, bo: &mut Bo) -> GbmMesaResult<()>;

    fn bo_get_plane_fd(&self, bo: &Bo, plane: usize) -> GbmMesaResult<SafeDescriptor>;

    fn bo_map(&mut self, bo: &Bo, vma: &mut Vma, map_flags: u32) -> GbmMesaResult<NonNull<c_void>>;

    fn bo_unmap(&mut self, bo: &Bo, vma: &mut Vma) -> GbmMesaResult<()>;

    /// Returns the stride to use when walking mapped memory.
    fn bo_get_map_stride(&self, bo: &Bo) -> GbmMesaResult<u32>;
}

impl Backend for DriverContext {
    fn name(&self) -> &'static str {
        GBM_MESA_BACKEND_NAME
    }

    fn init(&mut self) -> GbmMesaResult<()> {
        DriverContext::init(self);
        Ok(())
    }

    fn close(&mut self) {
        DriverContext::close(self)
    }

    fn combinations(&self) -> &Combinations {
        DriverContext::combinations(self)
    }

    fn resolve_format_and_use_flags(&self, format: DrmFormat, use_flags: u64) -> (DrmFormat, u64) {
        formats::resolve_format_and_use_flags(format, use_flags)
    }

    fn bo_create(
        &mut self,
        bo: &mut Bo,
        width: u32,
        height: u32,
        format: DrmFormat,
        use_flags: u64,
    ) -> GbmMesaResult<()> {
        bo::bo_create(self, bo, width, height, format, use_flags)
    }

    fn bo_import(&mut self, bo: &mut Bo, data: &ImportFdData) -> GbmMesaResult<()> {
        bo::bo_import(self, bo, data)
    }

    fn bo_destroy(&mut self, bo: &mut Bo) -> GbmMesaResult<()> {
        bo::bo_destroy(bo)
    }

    fn bo_get_plane_fd(&self, bo: &Bo, plane: usize) -> GbmMesaResult<SafeDescriptor> {
        bo::bo_get_plane_fd(bo, plane)
    }

    fn bo_map(&mut self, bo: &Bo, vma: &mut Vma, map_flags: u32) -> GbmMesaResult<NonNull<c_void>> {
        bo::bo_map(self, bo, vma, map_flags)
    }

    fn bo_unmap(&mut self, bo: &Bo, vma: &mut Vma) -> GbmMesaResult<()> {
        bo::bo_unmap(self, bo, vma)
    }

    fn bo_get_map_stride(&self, bo: &Bo) -> GbmMesaResult<u32> {
        bo::bo_get_map_stride(bo)
    }
}
