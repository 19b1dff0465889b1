// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! gbm_utils: Error types, use flags and limits shared by the rest of the crate.

use std::ffi::NulError;
use std::io::Error as IoError;
use std::num::TryFromIntError;

use nix::Error as NixError;
use remain::sorted;
use thiserror::Error;

/// Maximum number of planes a buffer object can carry.
pub const DRV_MAX_PLANES: usize = 4;

/*
 * Buffer use flags, bit compatible with the minigbm host allocator.
 */
pub const BO_USE_NONE: u64 = 0;
pub const BO_USE_SCANOUT: u64 = 1 << 0;
pub const BO_USE_CURSOR: u64 = 1 << 1;
pub const BO_USE_CURSOR_64X64: u64 = BO_USE_CURSOR;
pub const BO_USE_RENDERING: u64 = 1 << 2;
pub const BO_USE_LINEAR: u64 = 1 << 4;
pub const BO_USE_TEXTURE: u64 = 1 << 5;
pub const BO_USE_CAMERA_WRITE: u64 = 1 << 6;
pub const BO_USE_CAMERA_READ: u64 = 1 << 7;
pub const BO_USE_PROTECTED: u64 = 1 << 8;
pub const BO_USE_SW_READ_OFTEN: u64 = 1 << 9;
pub const BO_USE_SW_READ_RARELY: u64 = 1 << 10;
pub const BO_USE_SW_WRITE_OFTEN: u64 = 1 << 11;
pub const BO_USE_SW_WRITE_RARELY: u64 = 1 << 12;
pub const BO_USE_HW_VIDEO_DECODER: u64 = 1 << 13;
pub const BO_USE_HW_VIDEO_ENCODER: u64 = 1 << 14;
pub const BO_USE_RENDERSCRIPT: u64 = 1 << 16;
pub const BO_USE_GPU_DATA_BUFFER: u64 = 1 << 19;

pub const BO_USE_RENDER_MASK: u64 = BO_USE_LINEAR
    | BO_USE_RENDERING
    | BO_USE_RENDERSCRIPT
    | BO_USE_SW_READ_OFTEN
    | BO_USE_SW_WRITE_OFTEN
    | BO_USE_SW_READ_RARELY
    | BO_USE_SW_WRITE_RARELY
    | BO_USE_TEXTURE;

pub const BO_USE_TEXTURE_MASK: u64 = BO_USE_LINEAR
    | BO_USE_RENDERSCRIPT
    | BO_USE_SW_READ_OFTEN
    | BO_USE_SW_WRITE_OFTEN
    | BO_USE_SW_READ_RARELY
    | BO_USE_SW_WRITE_RARELY
    | BO_USE_TEXTURE;

pub const BO_USE_SW_MASK: u64 = BO_USE_SW_READ_OFTEN
    | BO_USE_SW_WRITE_OFTEN
    | BO_USE_SW_READ_RARELY
    | BO_USE_SW_WRITE_RARELY;

pub const BO_USE_CAMERA_MASK: u64 = BO_USE_CAMERA_READ | BO_USE_CAMERA_WRITE;

/// Map transfer flags recorded on a mapping.
pub const BO_MAP_READ: u32 = 1 << 0;
pub const BO_MAP_WRITE: u32 = 1 << 1;
pub const BO_MAP_READ_WRITE: u32 = BO_MAP_READ | BO_MAP_WRITE;

/// Modifier describing a plain linear layout.
pub const DRM_FORMAT_MOD_LINEAR: u64 = 0;

/// Value returned by the host entry points on success. Negative libc errors are returned
/// otherwise.
pub const GBM_MESA_SUCCESS: i32 = 0;

/// An error generated while using this crate.
#[sorted]
#[derive(Error, Debug)]
pub enum GbmMesaError {
    /// The backend rejected every allocation attempt.
    #[error("gbm_mesa allocation failed with error {0}")]
    AllocationFailed(i32),
    /// Import was called on a buffer object that already holds private state.
    #[error("buffer object already holds private state")]
    BoAlreadyPopulated,
    /// The buffer object has no private state.
    #[error("buffer object holds no private state")]
    BoNotPopulated,
    /// Checked Arithmetic error
    #[error("arithmetic failed: {}({}) {op} {}({})", .field1.0, .field1.1, .field2.0, .field2.1)]
    CheckedArithmetic {
        field1: (&'static str, usize),
        field2: (&'static str, usize),
        op: &'static str,
    },
    /// A DRM node was found but no usable GPU or KMS descriptor could be kept.
    #[error("unable to find or open DRM node")]
    DrmNodeUnavailable,
    /// The backend refused to create a device for the selected node.
    #[error("unable to create gbm_mesa device")]
    GbmDeviceCreation,
    /// The backend failed to import a descriptor for mapping.
    #[error("gbm_mesa import failed")]
    ImportFailed,
    /// Dimensions are zero or would overflow the layout.
    #[error("invalid buffer dimensions {0}x{1}")]
    InvalidDimensions(u32, u32),
    /// The format has no known planar layout.
    #[error("invalid DRM format 0x{0:08x}")]
    InvalidDrmFormat(u32),
    /// The plane index is not valid for the buffer object.
    #[error("invalid plane {0}")]
    InvalidPlane(usize),
    /// An input/output error occured.
    #[error("an input/output error occur: {0}")]
    IoError(IoError),
    /// The backend could not map the buffer object.
    #[error("gbm_mesa mapping failed")]
    MappingFailed,
    /// Nix crate error.
    #[error("The errno is {0}")]
    NixError(NixError),
    /// No DRM node matches the searched pattern.
    #[error("no DRM device matching {0}")]
    NoDrmDevice(String),
    #[error("Nul Error occured {0}")]
    NulError(NulError),
    /// An attempted integer conversion failed.
    #[error("int conversion failed: {0}")]
    TryFromIntError(TryFromIntError),
    /// The wrapper library could not be loaded.
    #[error("unable to open '{name}' shared library: {source}")]
    WrapperLoad {
        name: String,
        source: libloading::Error,
    },
    /// The wrapper library returned no capability table.
    #[error("unable to get wrapper ops")]
    WrapperOpsMissing,
    /// The entry symbol is missing from the wrapper library.
    #[error("unable to find '{name}' symbol: {source}")]
    WrapperSymbol {
        name: String,
        source: libloading::Error,
    },
}

impl GbmMesaError {
    /// Returns the negative errno reported to the host allocator for this error.
    pub fn to_errno(&self) -> i32 {
        match self {
            GbmMesaError::AllocationFailed(err) if *err < 0 => *err,
            GbmMesaError::AllocationFailed(_) => -libc::ENOMEM,
            GbmMesaError::IoError(e) => -e.raw_os_error().unwrap_or(libc::EIO),
            GbmMesaError::NixError(e) => -(*e as i32),
            GbmMesaError::NoDrmDevice(_) | GbmMesaError::DrmNodeUnavailable => -libc::ENODEV,
            _ => -libc::EINVAL,
        }
    }
}

impl From<NixError> for GbmMesaError {
    fn from(e: NixError) -> GbmMesaError {
        GbmMesaError::NixError(e)
    }
}

impl From<NulError> for GbmMesaError {
    fn from(e: NulError) -> GbmMesaError {
        GbmMesaError::NulError(e)
    }
}

impl From<IoError> for GbmMesaError {
    fn from(e: IoError) -> GbmMesaError {
        GbmMesaError::IoError(e)
    }
}

impl From<TryFromIntError> for GbmMesaError {
    fn from(e: TryFromIntError) -> GbmMesaError {
        GbmMesaError::TryFromIntError(e)
    }
}

/// The result of an operation in this crate.
pub type GbmMesaResult<T> = std::result::Result<T, GbmMesaError>;

/// Converts a result into the `0` / negative errno convention of the host allocator.
pub fn errno_result(result: GbmMesaResult<()>) -> i32 {
    match result {
        Ok(()) => GBM_MESA_SUCCESS,
        Err(e) => e.to_errno(),
    }
}
