// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! bo: buffer objects allocated or imported through the gbm_mesa backend.

use std::io;
use std::os::raw::c_void;
use std::ptr::NonNull;
use std::sync::Arc;

use log::debug;
use log::error;
use nix::unistd::lseek;
use nix::unistd::Whence;

use crate::gbm_mesa::driver::DriverContext;
use crate::gbm_mesa::driver::GbmMesaDriver;
use crate::gbm_mesa::formats::*;
use crate::gbm_mesa::wrapper::AllocRequest;
use crate::gbm_mesa::wrapper::GbmBoHandle;
use crate::gbm_mesa::wrapper::MapContext;
use crate::gbm_os::AsRawDescriptor;
use crate::gbm_os::SafeDescriptor;
use crate::gbm_utils::*;

/// Some Mesa drivers cannot allocate 1D textures. R8 buffers one row high are allocated as
/// 2D textures of this width instead.
pub const GBM_MESA_1D_WIDTH: u32 = 4096;

/// Row alignment in pixels required by camera and codec hardware.
pub const CAMERA_WIDTH_ALIGN: u32 = 32;
/// Size alignment in bytes required by camera and codec hardware.
pub const CAMERA_SIZE_ALIGN: u64 = 4096;

/// Layout and usage of a buffer object, as seen by the host allocator.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct BoMetadata {
    pub width: u32,
    pub height: u32,
    pub format: DrmFormat,
    pub tiling: u32,
    pub use_flags: u64,
    pub num_planes: usize,
    pub strides: [u32; DRV_MAX_PLANES],
    pub offsets: [u32; DRV_MAX_PLANES],
    pub sizes: [u32; DRV_MAX_PLANES],
    pub total_size: u64,
    pub format_modifier: u64,
}

impl BoMetadata {
    fn apply_layout(&mut self, layout: &BoLayout) {
        self.num_planes = layout.num_planes;
        self.strides = layout.strides;
        self.offsets = layout.offsets;
        self.sizes = layout.sizes;
        self.total_size = layout.total_size;
    }
}

/// Private state of a populated buffer object.
pub struct GbmMesaBo {
    session: Option<Arc<GbmMesaDriver>>,
    map_stride: u32,
    gbm_bo: Option<GbmBoHandle>,
    fds: Vec<SafeDescriptor>,
}

impl GbmMesaBo {
    pub fn map_stride(&self) -> u32 {
        self.map_stride
    }

    /// Returns true if the backend holds a buffer object that can be mapped.
    pub fn is_mappable(&self) -> bool {
        self.gbm_bo.is_some()
    }

    pub fn num_fds(&self) -> usize {
        self.fds.len()
    }
}

impl Drop for GbmMesaBo {
    fn drop(&mut self) {
        // Free the backend object while the plane descriptors are still open.
        if let (Some(gbm_bo), Some(session)) = (self.gbm_bo.take(), &self.session) {
            session.ops().free(gbm_bo);
        }
    }
}

/// A buffer object record owned by the host allocator.
pub struct Bo {
    pub meta: BoMetadata,
    /// Per plane unique keys. gbm_mesa does not use DRM handles, the inode of each plane
    /// descriptor is used instead.
    pub handles: [u64; DRV_MAX_PLANES],
    state: Option<GbmMesaBo>,
}

impl Bo {
    /// Returns an empty record for a `width` x `height` buffer of `format`.
    pub fn new(width: u32, height: u32, format: DrmFormat, use_flags: u64) -> GbmMesaResult<Bo> {
        Ok(Bo::with_planes(
            width,
            height,
            format,
            use_flags,
            format.num_planes()?,
        ))
    }

    /// Returns an empty record for a format the plane count of which is known only to the
    /// caller.
    pub fn with_planes(
        width: u32,
        height: u32,
        format: DrmFormat,
        use_flags: u64,
        num_planes: usize,
    ) -> Bo {
        Bo {
            meta: BoMetadata {
                width,
                height,
                format,
                use_flags,
                num_planes,
                ..Default::default()
            },
            handles: [0; DRV_MAX_PLANES],
            state: None,
        }
    }

    pub fn state(&self) -> Option<&GbmMesaBo> {
        self.state.as_ref()
    }

    pub fn is_populated(&self) -> bool {
        self.state.is_some()
    }

    fn populated(&self) -> GbmMesaResult<&GbmMesaBo> {
        self.state.as_ref().ok_or(GbmMesaError::BoNotPopulated)
    }

    fn mapping_handle(&self) -> GbmBoHandle {
        match self.state.as_ref().and_then(|s| s.gbm_bo) {
            Some(gbm_bo) => gbm_bo,
            None => panic!("buffer object was not allocated or imported for CPU access"),
        }
    }
}

/// Descriptors and layout of a buffer allocated elsewhere. The descriptors stay owned by
/// the caller.
pub struct ImportFdData<'a> {
    pub fds: &'a [SafeDescriptor],
    pub strides: [u32; DRV_MAX_PLANES],
    pub offsets: [u32; DRV_MAX_PLANES],
    pub format_modifier: u64,
    pub width: u32,
    pub height: u32,
    pub format: DrmFormat,
    pub tiling: u32,
    pub use_flags: u64,
}

/// A CPU mapping of a buffer object.
#[derive(Debug, Default)]
pub struct Vma {
    pub addr: Option<NonNull<c_void>>,
    pub length: u64,
    pub map_flags: u32,
    pub context: Option<MapContext>,
}

fn duplicate_planes(fd: &SafeDescriptor, num_planes: usize) -> io::Result<Vec<SafeDescriptor>> {
    (0..num_planes).map(|_| fd.try_clone()).collect()
}

/// Returns the inode of every plane descriptor. Descriptors duplicated from the same
/// allocation share an inode, so records referencing the same memory get the same keys.
pub fn inode_to_handle(fds: &[SafeDescriptor]) -> GbmMesaResult<[u64; DRV_MAX_PLANES]> {
    let mut handles = [0; DRV_MAX_PLANES];
    for (handle, fd) in handles.iter_mut().zip(fds) {
        *handle = fd.inode()?;
    }
    Ok(handles)
}

/// Returns the format, dimensions and row pitch the backend can import or map `meta` as:
/// the buffer itself if the backend knows its format, otherwise a single row of R8 spanning
/// the whole buffer. R8 buffers one row high are always described as a single row since
/// they were allocated as 2D textures.
fn backend_shape(
    session: &GbmMesaDriver,
    meta: &BoMetadata,
) -> GbmMesaResult<(DrmFormat, u32, u32, u32)> {
    let one_row_r8 = meta.format == DrmFormat::from(DRM_FORMAT_R8) && meta.height == 1;
    if session.ops().get_gbm_format(meta.format) != 0 && !one_row_r8 {
        Ok((meta.format, meta.width, meta.height, meta.strides[0]))
    } else {
        let total_size = u32::try_from(meta.total_size)?;
        Ok((DrmFormat::from(DRM_FORMAT_R8), total_size, 1, total_size))
    }
}

fn import_for_mapping(
    session: &GbmMesaDriver,
    meta: &BoMetadata,
    fd: &SafeDescriptor,
) -> GbmMesaResult<GbmBoHandle> {
    let (format, width, height, stride) = backend_shape(session, meta)?;
    session
        .ops()
        .import(
            session.gbm_dev(),
            fd,
            width,
            height,
            stride,
            meta.format_modifier,
            format,
        )
        .ok_or_else(|| {
            error!("Unable to import {:?} {}x{} for mapping", format, width, height);
            GbmMesaError::ImportFailed
        })
}

/// Allocates `bo` through the context's session.
///
/// Formats the backend cannot allocate are spoofed as a linear R8 buffer large enough for
/// the requested format. Camera buffers must be scanout capable; other buffers fall back to
/// non-scanout memory when scanout memory is exhausted.
pub fn bo_create(
    ctx: &mut DriverContext,
    bo: &mut Bo,
    width: u32,
    height: u32,
    format: DrmFormat,
    use_flags: u64,
) -> GbmMesaResult<()> {
    if width == 0 || height == 0 {
        return Err(GbmMesaError::InvalidDimensions(width, height));
    }
    if bo.is_populated() {
        return Err(GbmMesaError::BoAlreadyPopulated);
    }

    let session = ctx.get_or_init_driver(false).map_err(|e| {
        error!("Failed to init gbm driver: {}", e);
        e
    })?;
    let ops = session.ops();

    let sw_access = use_flags & BO_USE_SW_MASK != 0;
    let mut scanout_strong = false;
    let mut size_align: u64 = 1;
    let mut spoofed_layout = None;

    let mut request = AllocRequest {
        width,
        height,
        format: if ops.get_gbm_format(format) != 0 {
            format
        } else {
            DrmFormat(0)
        },
        force_linear: sw_access,
        needs_map_stride: sw_access,
        use_scanout: use_flags & BO_USE_SCANOUT != 0,
    };

    if use_flags & BO_USE_CAMERA_MASK != 0 {
        scanout_strong = true;
        request.use_scanout = true;
        let mask = CAMERA_WIDTH_ALIGN - 1;
        request.width = checked_arithmetic!(width + mask)? & !mask;
        size_align = CAMERA_SIZE_ALIGN;
    }

    if request.format == DrmFormat(0) {
        // Spoofed formats are always linear.
        let layout = BoLayout::from_format(request.width, 1, request.height, format)?
            .aligned_to(size_align)?;
        request.format = DrmFormat::from(DRM_FORMAT_R8);
        request.width = u32::try_from(layout.total_size)?;
        request.height = 1;
        request.force_linear = true;
        spoofed_layout = Some(layout);

        debug!("Unable to allocate {:?} format, allocate as 1D buffer", format);
    }

    if request.format == DrmFormat::from(DRM_FORMAT_R8) && request.height == 1 {
        request.needs_map_stride = false;
        request.height = request.width.div_ceil(GBM_MESA_1D_WIDTH);
        request.width = GBM_MESA_1D_WIDTH;

        debug!(
            "Allocate 1D buffer as {}x{} R8 2D texture",
            request.width, request.height
        );
    }

    let output = match ops.alloc(session.gbm_dev(), &request) {
        Err(e) if !scanout_strong => {
            error!("Failed to allocate for scanout ({}), trying non-scanout", e);
            request.use_scanout = false;
            ops.alloc(session.gbm_dev(), &request)
        }
        ret => ret,
    }
    .map_err(|e| {
        error!("Failed to allocate buffer: {}", e);
        e
    })?;

    let layout = match spoofed_layout {
        Some(layout) => layout,
        // The backend may have been asked for more rows than requested.
        None => BoLayout::from_format(output.stride, 1, request.height, format)?,
    };

    debug!(
        "Allocated: {}x{}, stride: {}, map_stride: {}",
        width, height, output.stride, output.map_stride
    );

    let mut meta = bo.meta;
    meta.width = width;
    meta.height = height;
    meta.format = format;
    meta.use_flags = use_flags;
    meta.apply_layout(&layout);
    meta.format_modifier = output.modifier;

    let fds = duplicate_planes(&output.fd, layout.num_planes)?;
    let handles = inode_to_handle(&fds)?;
    let gbm_bo = if sw_access {
        Some(import_for_mapping(&session, &meta, &fds[0])?)
    } else {
        None
    };

    bo.meta = meta;
    bo.handles = handles;
    bo.state = Some(GbmMesaBo {
        session: Some(session),
        map_stride: output.map_stride,
        gbm_bo,
        fds,
    });

    Ok(())
}

/// Returns the byte size of every plane, measured from the end of its descriptor.
fn import_plane_sizes(
    fds: &[SafeDescriptor],
    offsets: &[u32; DRV_MAX_PLANES],
) -> GbmMesaResult<[u32; DRV_MAX_PLANES]> {
    let mut sizes = [0; DRV_MAX_PLANES];
    let num_planes = fds.len();

    for plane in 0..num_planes {
        let offset = offsets[plane];
        sizes[plane] = if plane + 1 == num_planes || offsets[plane + 1] == 0 {
            let seek_end = lseek(fds[plane].as_raw_descriptor(), 0, Whence::SeekEnd)?;
            let seek_end = u32::try_from(seek_end)?;
            checked_arithmetic!(seek_end - offset)?
        } else {
            let next = offsets[plane + 1];
            checked_arithmetic!(next - offset)?
        };
    }

    Ok(sizes)
}

/// Populates `bo` with duplicates of externally allocated descriptors.
///
/// Buffers imported for CPU access are also imported into the backend so they can be
/// mapped. Fails without touching `bo` if it is already populated.
pub fn bo_import(ctx: &mut DriverContext, bo: &mut Bo, data: &ImportFdData) -> GbmMesaResult<()> {
    if bo.is_populated() {
        error!("bo_import: bo isn't empty");
        return Err(GbmMesaError::BoAlreadyPopulated);
    }

    // Formats outside the fourcc table keep the plane count of the host record.
    let num_planes = data.format.num_planes().unwrap_or(bo.meta.num_planes);
    if num_planes == 0 || data.fds.len() < num_planes {
        return Err(GbmMesaError::InvalidPlane(data.fds.len()));
    }

    let fds = data.fds[..num_planes]
        .iter()
        .map(|fd| fd.try_clone())
        .collect::<io::Result<Vec<SafeDescriptor>>>()?;

    let sizes = import_plane_sizes(&fds, &data.offsets)?;
    let meta = BoMetadata {
        width: data.width,
        height: data.height,
        format: data.format,
        tiling: data.tiling,
        use_flags: data.use_flags,
        num_planes,
        strides: data.strides,
        offsets: data.offsets,
        sizes,
        total_size: sizes.iter().map(|s| *s as u64).sum(),
        format_modifier: data.format_modifier,
    };

    let (session, gbm_bo) = if data.use_flags & BO_USE_SW_MASK != 0 {
        // Mapping requires the buffer to be imported by the backend.
        let session = ctx.get_or_init_driver(true)?;
        let gbm_bo = import_for_mapping(&session, &meta, &fds[0])?;
        (Some(session), Some(gbm_bo))
    } else {
        (None, None)
    };

    let state = GbmMesaBo {
        session,
        map_stride: data.strides[0],
        gbm_bo,
        fds,
    };
    let handles = inode_to_handle(&state.fds)?;

    bo.meta = meta;
    bo.handles = handles;
    bo.state = Some(state);
    Ok(())
}

/// Releases the private state of `bo`: the backend object first, then the plane
/// descriptors.
pub fn bo_destroy(bo: &mut Bo) -> GbmMesaResult<()> {
    bo.state = None;
    Ok(())
}

/// Returns a duplicate of the descriptor of `plane`.
pub fn bo_get_plane_fd(bo: &Bo, plane: usize) -> GbmMesaResult<SafeDescriptor> {
    let fd = bo
        .populated()?
        .fds
        .get(plane)
        .ok_or(GbmMesaError::InvalidPlane(plane))?;
    Ok(fd.try_clone()?)
}

/// Maps `bo` for CPU access and records the mapping in `vma`.
///
/// # Panics
///
/// Panics if `bo` was neither created nor imported with software access use flags.
pub fn bo_map(
    ctx: &mut DriverContext,
    bo: &Bo,
    vma: &mut Vma,
    map_flags: u32,
) -> GbmMesaResult<NonNull<c_void>> {
    let session = ctx.get_or_init_driver(true)?;

    vma.length = bo.meta.total_size;
    vma.map_flags = map_flags;

    let gbm_bo = bo.mapping_handle();
    let (_, width, height, _) = backend_shape(&session, &bo.meta)?;

    let region = session.ops().map(gbm_bo, width, height)?;
    vma.addr = Some(region.addr);
    vma.context = Some(region.context);
    Ok(region.addr)
}

/// Undoes `bo_map`.
///
/// # Panics
///
/// Panics if `bo` cannot be mapped or `vma` holds no mapping.
pub fn bo_unmap(ctx: &mut DriverContext, bo: &Bo, vma: &mut Vma) -> GbmMesaResult<()> {
    let session = ctx.get_or_init_driver(true)?;

    let gbm_bo = bo.mapping_handle();
    assert!(vma.context.is_some(), "vma holds no mapping context");

    if let Some(context) = vma.context.take() {
        session.ops().unmap(gbm_bo, context);
    }
    vma.addr = None;
    Ok(())
}

/// Returns the stride to walk mapped memory with.
pub fn bo_get_map_stride(bo: &Bo) -> GbmMesaResult<u32> {
    Ok(bo.populated()?.map_stride)
}
