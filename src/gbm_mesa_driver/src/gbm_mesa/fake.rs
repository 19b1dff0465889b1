// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! In-process stand-ins for DRM node discovery and the wrapper library. Every backend call
//! is recorded so tests can observe session and allocation decisions.

use std::os::raw::c_void;
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::Mutex;

use vmm_sys_util::tempfile::TempFile;

use crate::gbm_mesa::driver::DriverContext;
use crate::gbm_mesa::drm_node::DrmDiscovery;
use crate::gbm_mesa::drm_node::GpuProbe;
use crate::gbm_mesa::formats::*;
use crate::gbm_mesa::wrapper::*;
use crate::gbm_os::SafeDescriptor;
use crate::gbm_utils::*;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FakeEvent {
    Load,
    Unload,
    DevCreate,
    DevDestroy,
    Alloc,
    Import,
    Free,
    Map,
    Unmap,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FakeTopology {
    /// A GPU with its own display controller, e.g. amdgpu.
    RenderOnly,
    /// vc4 style GPU with a KMS capable card node next to it.
    SeparateDc,
    /// vc4 style GPU but no card node exposes KMS.
    SeparateDcWithoutKms,
    /// No render node can be opened.
    NoGpu,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FakeImport {
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub modifier: u64,
    pub format: DrmFormat,
}

#[derive(Default)]
struct FakeState {
    events: Vec<FakeEvent>,
    allocs: Vec<AllocRequest>,
    imports: Vec<FakeImport>,
    kms_searches: usize,
    supported: Vec<DrmFormat>,
    next_handle: usize,
    fail_load: bool,
    fail_dev_create: bool,
    fail_scanout: bool,
    fail_alloc: bool,
    fail_import: bool,
}

impl FakeState {
    fn handle(&mut self) -> *mut c_void {
        self.next_handle += 1;
        (self.next_handle * 0x1000) as *mut c_void
    }
}

pub fn temp_descriptor() -> SafeDescriptor {
    SafeDescriptor::from(TempFile::new().unwrap().into_file())
}

/// Shared handle on the fake backend's recorded state.
#[derive(Clone)]
pub struct FakeBackend {
    state: Arc<Mutex<FakeState>>,
}

impl FakeBackend {
    /// A backend that allocates the common RGB formats, NV12 and R8.
    pub fn new() -> FakeBackend {
        let backend = FakeBackend {
            state: Arc::new(Mutex::new(FakeState::default())),
        };
        backend.set_supported(&[
            DRM_FORMAT_ARGB8888,
            DRM_FORMAT_XRGB8888,
            DRM_FORMAT_ABGR8888,
            DRM_FORMAT_XBGR8888,
            DRM_FORMAT_RGB565,
            DRM_FORMAT_NV12,
            DRM_FORMAT_R8,
        ]);
        backend
    }

    pub fn context(&self, topology: FakeTopology) -> DriverContext {
        let _ = env_logger::builder().is_test(true).try_init();
        DriverContext::with_backend(
            Box::new(FakeDiscovery {
                state: self.state.clone(),
                topology,
            }),
            Box::new(FakeLoader {
                state: self.state.clone(),
            }),
        )
    }

    pub fn set_supported(&self, formats: &[[u8; 4]]) {
        let supported = formats.iter().map(|f| DrmFormat::from(*f)).collect();
        self.state.lock().unwrap().supported = supported;
    }

    pub fn fail_load(&self) {
        self.state.lock().unwrap().fail_load = true;
    }

    pub fn fail_dev_create(&self) {
        self.state.lock().unwrap().fail_dev_create = true;
    }

    /// Rejects every allocation asking for scanout memory.
    pub fn fail_scanout(&self) {
        self.state.lock().unwrap().fail_scanout = true;
    }

    pub fn fail_alloc(&self) {
        self.state.lock().unwrap().fail_alloc = true;
    }

    pub fn fail_import(&self) {
        self.state.lock().unwrap().fail_import = true;
    }

    pub fn events(&self) -> Vec<FakeEvent> {
        self.state.lock().unwrap().events.clone()
    }

    pub fn count(&self, event: FakeEvent) -> usize {
        self.events().iter().filter(|e| **e == event).count()
    }

    pub fn allocs(&self) -> Vec<AllocRequest> {
        self.state.lock().unwrap().allocs.clone()
    }

    pub fn imports(&self) -> Vec<FakeImport> {
        self.state.lock().unwrap().imports.clone()
    }

    pub fn kms_searches(&self) -> usize {
        self.state.lock().unwrap().kms_searches
    }
}

struct FakeDiscovery {
    state: Arc<Mutex<FakeState>>,
    topology: FakeTopology,
}

impl DrmDiscovery for FakeDiscovery {
    fn probe_gpu(&self) -> GbmMesaResult<GpuProbe> {
        let probe = match self.topology {
            FakeTopology::NoGpu => GpuProbe::default(),
            FakeTopology::RenderOnly => GpuProbe {
                gpu_node: Some(temp_descriptor()),
                separate_dc: false,
            },
            FakeTopology::SeparateDc | FakeTopology::SeparateDcWithoutKms => GpuProbe {
                gpu_node: Some(temp_descriptor()),
                separate_dc: true,
            },
        };
        Ok(probe)
    }

    fn find_kms_node(&self) -> Option<SafeDescriptor> {
        self.state.lock().unwrap().kms_searches += 1;
        match self.topology {
            FakeTopology::SeparateDc => Some(temp_descriptor()),
            _ => None,
        }
    }
}

struct FakeLoader {
    state: Arc<Mutex<FakeState>>,
}

impl OpsLoader for FakeLoader {
    fn load(&self) -> GbmMesaResult<Box<dyn GbmOps>> {
        let mut state = self.state.lock().unwrap();
        if state.fail_load {
            return Err(GbmMesaError::WrapperOpsMissing);
        }
        state.events.push(FakeEvent::Load);
        Ok(Box::new(FakeOps {
            state: self.state.clone(),
        }))
    }
}

struct FakeOps {
    state: Arc<Mutex<FakeState>>,
}

impl Drop for FakeOps {
    fn drop(&mut self) {
        self.state.lock().unwrap().events.push(FakeEvent::Unload);
    }
}

impl GbmOps for FakeOps {
    fn dev_create(&self, _fd: &SafeDescriptor) -> Option<GbmDeviceHandle> {
        let mut state = self.state.lock().unwrap();
        state.events.push(FakeEvent::DevCreate);
        if state.fail_dev_create {
            return None;
        }
        GbmDeviceHandle::from_raw(state.handle())
    }

    fn dev_destroy(&self, _dev: GbmDeviceHandle) {
        self.state.lock().unwrap().events.push(FakeEvent::DevDestroy);
    }

    fn get_gbm_format(&self, format: DrmFormat) -> u32 {
        let state = self.state.lock().unwrap();
        if state.supported.contains(&format) {
            format.into()
        } else {
            0
        }
    }

    fn alloc(&self, _dev: GbmDeviceHandle, request: &AllocRequest) -> GbmMesaResult<AllocOutput> {
        let mut state = self.state.lock().unwrap();
        state.events.push(FakeEvent::Alloc);
        state.allocs.push(*request);

        if state.fail_alloc || (state.fail_scanout && request.use_scanout) {
            return Err(GbmMesaError::AllocationFailed(-libc::ENOMEM));
        }

        let stride = request.format.plane_stride(request.width, 0)?;
        let file = TempFile::new().unwrap().into_file();
        file.set_len(stride as u64 * request.height as u64)?;

        Ok(AllocOutput {
            fd: SafeDescriptor::from(file),
            stride,
            map_stride: stride,
            modifier: DRM_FORMAT_MOD_LINEAR,
        })
    }

    fn import(
        &self,
        _dev: GbmDeviceHandle,
        _fd: &SafeDescriptor,
        width: u32,
        height: u32,
        stride: u32,
        modifier: u64,
        format: DrmFormat,
    ) -> Option<GbmBoHandle> {
        let mut state = self.state.lock().unwrap();
        state.events.push(FakeEvent::Import);
        state.imports.push(FakeImport {
            width,
            height,
            stride,
            modifier,
            format,
        });
        if state.fail_import {
            return None;
        }
        GbmBoHandle::from_raw(state.handle())
    }

    fn free(&self, _bo: GbmBoHandle) {
        self.state.lock().unwrap().events.push(FakeEvent::Free);
    }

    fn map(&self, _bo: GbmBoHandle, _width: u32, _height: u32) -> GbmMesaResult<MappedRegion> {
        let mut state = self.state.lock().unwrap();
        state.events.push(FakeEvent::Map);
        let addr = NonNull::new(state.handle()).ok_or(GbmMesaError::MappingFailed)?;
        let context = MapContext::from_raw(state.handle()).ok_or(GbmMesaError::MappingFailed)?;
        Ok(MappedRegion { addr, context })
    }

    fn unmap(&self, _bo: GbmBoHandle, _context: MapContext) {
        self.state.lock().unwrap().events.push(FakeEvent::Unmap);
    }
}
