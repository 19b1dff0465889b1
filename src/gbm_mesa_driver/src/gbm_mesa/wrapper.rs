// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! wrapper: the capability table of the GBM backend and its binding to
//! `libgbm_mesa_wrapper.so`.
//!
//! The wrapper library links against Mesa's libgbm and exposes a small table of function
//! pointers. Everything in this crate talks to the backend through the [`GbmOps`] trait so
//! the loaded table can be replaced by another implementation.

use std::os::raw::c_int;
use std::os::raw::c_void;
use std::ptr::null_mut;
use std::ptr::NonNull;

use log::debug;
use log::error;

use crate::gbm_mesa::formats::DrmFormat;
use crate::gbm_mesa::wrapper_bindings::*;
use crate::gbm_os::AsRawDescriptor;
use crate::gbm_os::FromRawDescriptor;
use crate::gbm_os::SafeDescriptor;
use crate::gbm_utils::*;

macro_rules! opaque_handle {
    ($(#[$attr:meta])* $name:ident) => {
        $(#[$attr])*
        #[derive(Copy, Clone, Debug, PartialEq, Eq)]
        pub struct $name(NonNull<c_void>);

        // Safe because the handle is only dereferenced by the backend, which synchronizes
        // access to its objects internally.
        unsafe impl Send for $name {}
        unsafe impl Sync for $name {}

        impl $name {
            /// Wraps a backend pointer, returning `None` for null.
            pub fn from_raw(ptr: *mut c_void) -> Option<$name> {
                NonNull::new(ptr).map($name)
            }

            pub fn as_ptr(&self) -> *mut c_void {
                self.0.as_ptr()
            }
        }
    };
}

opaque_handle!(
    /// A `struct gbm_device` owned by a driver session.
    GbmDeviceHandle
);
opaque_handle!(
    /// A `struct gbm_bo` owned by one buffer object.
    GbmBoHandle
);
opaque_handle!(
    /// The per-mapping context returned by the backend's map primitive.
    MapContext
);

/// One allocation attempt.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct AllocRequest {
    pub width: u32,
    pub height: u32,
    pub format: DrmFormat,
    pub force_linear: bool,
    pub needs_map_stride: bool,
    pub use_scanout: bool,
}

/// What the backend reports for a successful allocation.
#[derive(Debug)]
pub struct AllocOutput {
    pub fd: SafeDescriptor,
    pub stride: u32,
    pub map_stride: u32,
    pub modifier: u64,
}

/// A CPU mapping produced by the backend.
#[derive(Copy, Clone, Debug)]
pub struct MappedRegion {
    pub addr: NonNull<c_void>,
    pub context: MapContext,
}

/// The backend capability table.
pub trait GbmOps: Send + Sync {
    /// Creates a backend device on `fd`.
    fn dev_create(&self, fd: &SafeDescriptor) -> Option<GbmDeviceHandle>;

    fn dev_destroy(&self, dev: GbmDeviceHandle);

    /// Returns the backend format used for `format`, or 0 if the backend cannot allocate it.
    fn get_gbm_format(&self, format: DrmFormat) -> u32;

    fn alloc(&self, dev: GbmDeviceHandle, request: &AllocRequest) -> GbmMesaResult<AllocOutput>;

    /// Imports `fd` as a backend buffer object suitable for mapping.
    #[allow(clippy::too_many_arguments)]
    fn import(
        &self,
        dev: GbmDeviceHandle,
        fd: &SafeDescriptor,
        width: u32,
        height: u32,
        stride: u32,
        modifier: u64,
        format: DrmFormat,
    ) -> Option<GbmBoHandle>;

    fn free(&self, bo: GbmBoHandle);

    fn map(&self, bo: GbmBoHandle, width: u32, height: u32) -> GbmMesaResult<MappedRegion>;

    fn unmap(&self, bo: GbmBoHandle, context: MapContext);
}

/// Produces the capability table for a new driver session.
pub trait OpsLoader: Send {
    fn load(&self) -> GbmMesaResult<Box<dyn GbmOps>>;
}

struct WrapperFns {
    dev_create: unsafe extern "C" fn(c_int) -> *mut c_void,
    dev_destroy: unsafe extern "C" fn(*mut c_void),
    get_gbm_format: unsafe extern "C" fn(u32) -> u32,
    alloc: unsafe extern "C" fn(*mut alloc_args) -> c_int,
    import: unsafe extern "C" fn(*mut c_void, c_int, u32, u32, u32, u64, u32) -> *mut c_void,
    free: unsafe extern "C" fn(*mut c_void),
    map: unsafe extern "C" fn(*mut c_void, c_int, c_int, *mut *mut c_void, *mut *mut c_void),
    unmap: unsafe extern "C" fn(*mut c_void, *mut c_void),
}

impl WrapperFns {
    fn from_table(ops: &gbm_ops) -> GbmMesaResult<WrapperFns> {
        let missing = || GbmMesaError::WrapperOpsMissing;
        Ok(WrapperFns {
            dev_create: ops.dev_create.ok_or_else(missing)?,
            dev_destroy: ops.dev_destroy.ok_or_else(missing)?,
            get_gbm_format: ops.get_gbm_format.ok_or_else(missing)?,
            alloc: ops.alloc.ok_or_else(missing)?,
            import: ops.import.ok_or_else(missing)?,
            free: ops.free.ok_or_else(missing)?,
            map: ops.map.ok_or_else(missing)?,
            unmap: ops.unmap.ok_or_else(missing)?,
        })
    }
}

/// The capability table exported by the wrapper library. Unloads the library on drop.
pub struct WrapperOps {
    fns: WrapperFns,
    _library: libloading::Library,
}

impl GbmOps for WrapperOps {
    fn dev_create(&self, fd: &SafeDescriptor) -> Option<GbmDeviceHandle> {
        // Safe because the wrapper only borrows the descriptor and rejects non DRM nodes.
        GbmDeviceHandle::from_raw(unsafe { (self.fns.dev_create)(fd.as_raw_descriptor()) })
    }

    fn dev_destroy(&self, dev: GbmDeviceHandle) {
        // Safe because `dev` came from dev_create and is destroyed exactly once by its session.
        unsafe { (self.fns.dev_destroy)(dev.as_ptr()) }
    }

    fn get_gbm_format(&self, format: DrmFormat) -> u32 {
        // Safe because the call has no pointer arguments.
        unsafe { (self.fns.get_gbm_format)(format.into()) }
    }

    fn alloc(&self, dev: GbmDeviceHandle, request: &AllocRequest) -> GbmMesaResult<AllocOutput> {
        let mut args = alloc_args {
            gbm: dev.as_ptr(),
            width: request.width,
            height: request.height,
            drm_format: request.format.into(),
            force_linear: request.force_linear,
            needs_map_stride: request.needs_map_stride,
            use_scanout: request.use_scanout,
            out_fd: -1,
            out_stride: 0,
            out_map_stride: 0,
            out_modifier: 0,
        };

        // Safe because `args` is a valid, exclusively borrowed alloc_args for the whole call.
        let ret = unsafe { (self.fns.alloc)(&mut args) };
        if ret != 0 {
            return Err(GbmMesaError::AllocationFailed(ret));
        }
        if args.out_fd < 0 {
            error!("gbm_mesa allocation returned no descriptor");
            return Err(GbmMesaError::AllocationFailed(-libc::EINVAL));
        }

        Ok(AllocOutput {
            // Safe because a successful allocation hands over ownership of out_fd.
            fd: unsafe { SafeDescriptor::from_raw_descriptor(args.out_fd) },
            stride: args.out_stride,
            map_stride: args.out_map_stride,
            modifier: args.out_modifier,
        })
    }

    fn import(
        &self,
        dev: GbmDeviceHandle,
        fd: &SafeDescriptor,
        width: u32,
        height: u32,
        stride: u32,
        modifier: u64,
        format: DrmFormat,
    ) -> Option<GbmBoHandle> {
        // Safe because the wrapper duplicates the descriptor it imports.
        let bo = unsafe {
            (self.fns.import)(
                dev.as_ptr(),
                fd.as_raw_descriptor(),
                width,
                height,
                stride,
                modifier,
                format.into(),
            )
        };
        GbmBoHandle::from_raw(bo)
    }

    fn free(&self, bo: GbmBoHandle) {
        // Safe because `bo` is freed exactly once by the buffer object owning it.
        unsafe { (self.fns.free)(bo.as_ptr()) }
    }

    fn map(&self, bo: GbmBoHandle, width: u32, height: u32) -> GbmMesaResult<MappedRegion> {
        let w = c_int::try_from(width)?;
        let h = c_int::try_from(height)?;
        let mut addr: *mut c_void = null_mut();
        let mut map_data: *mut c_void = null_mut();

        // Safe because both out pointers refer to live locals.
        unsafe { (self.fns.map)(bo.as_ptr(), w, h, &mut addr, &mut map_data) };

        if addr == libc::MAP_FAILED {
            return Err(GbmMesaError::MappingFailed);
        }

        let addr = NonNull::new(addr).ok_or(GbmMesaError::MappingFailed)?;
        let context = MapContext::from_raw(map_data).ok_or(GbmMesaError::MappingFailed)?;
        Ok(MappedRegion { addr, context })
    }

    fn unmap(&self, bo: GbmBoHandle, context: MapContext) {
        // Safe because `context` was produced by map on the same `bo`.
        unsafe { (self.fns.unmap)(bo.as_ptr(), context.as_ptr()) }
    }
}

/// Loads the wrapper library and resolves its capability table.
pub struct WrapperLoader {
    library: String,
    symbol: String,
}

impl WrapperLoader {
    pub fn new(library: String, symbol: String) -> WrapperLoader {
        WrapperLoader { library, symbol }
    }
}

impl OpsLoader for WrapperLoader {
    fn load(&self) -> GbmMesaResult<Box<dyn GbmOps>> {
        // Safe because the wrapper library has no initialization routines with preconditions.
        let library = unsafe { libloading::Library::new(&self.library) }.map_err(|source| {
            error!("Unable to open '{}' shared library", self.library);
            GbmMesaError::WrapperLoad {
                name: self.library.clone(),
                source,
            }
        })?;

        let table = {
            // Safe because get_gbm_ops_t is the declared type of the entry symbol.
            let get_gbm_ops = unsafe { library.get::<get_gbm_ops_t>(self.symbol.as_bytes()) }
                .map_err(|source| {
                    error!("Unable to find '{}' symbol", self.symbol);
                    GbmMesaError::WrapperSymbol {
                        name: self.symbol.clone(),
                        source,
                    }
                })?;

            // Safe because the entry point takes no arguments and returns a static table.
            let table = unsafe { get_gbm_ops() };
            if table.is_null() {
                error!("Unable to get wrapper ops");
                return Err(GbmMesaError::WrapperOpsMissing);
            }

            // Safe because the table is non-null and lives as long as the library.
            unsafe { *table }
        };

        let fns = WrapperFns::from_table(&table)?;
        debug!("Loaded gbm_mesa ops from {}", self.library);

        Ok(Box::new(WrapperOps {
            fns,
            _library: library,
        }))
    }
}
