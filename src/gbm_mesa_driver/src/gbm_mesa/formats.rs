// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! formats: Utility file for dealing with DRM formats, format resolution and byte layout
//! calculations.

use std::fmt;

use vmm_sys_util::align_upwards;

use crate::gbm_utils::*;

/*
 * This list is based on the formats requested by Android's gralloc clients.  Formats that
 * are never requested (i.e, DRM_FORMAT_RGB332) are left out for simplicity.
 */

pub const DRM_FORMAT_R8: [u8; 4] = [b'R', b'8', b' ', b' '];

pub const DRM_FORMAT_RGB565: [u8; 4] = [b'R', b'G', b'1', b'6'];
pub const DRM_FORMAT_BGR565: [u8; 4] = [b'B', b'G', b'1', b'6'];
pub const DRM_FORMAT_RGB888: [u8; 4] = [b'R', b'G', b'2', b'4'];
pub const DRM_FORMAT_BGR888: [u8; 4] = [b'B', b'G', b'2', b'4'];

pub const DRM_FORMAT_XRGB8888: [u8; 4] = [b'X', b'R', b'2', b'4'];
pub const DRM_FORMAT_XBGR8888: [u8; 4] = [b'X', b'B', b'2', b'4'];

pub const DRM_FORMAT_ARGB8888: [u8; 4] = [b'A', b'R', b'2', b'4'];
pub const DRM_FORMAT_ABGR8888: [u8; 4] = [b'A', b'B', b'2', b'4'];

pub const DRM_FORMAT_XRGB2101010: [u8; 4] = [b'X', b'R', b'3', b'0'];
pub const DRM_FORMAT_XBGR2101010: [u8; 4] = [b'X', b'B', b'3', b'0'];
pub const DRM_FORMAT_ARGB2101010: [u8; 4] = [b'A', b'R', b'3', b'0'];
pub const DRM_FORMAT_ABGR2101010: [u8; 4] = [b'A', b'B', b'3', b'0'];

pub const DRM_FORMAT_ABGR16161616F: [u8; 4] = [b'A', b'B', b'4', b'H'];

pub const DRM_FORMAT_NV12: [u8; 4] = [b'N', b'V', b'1', b'2'];
pub const DRM_FORMAT_NV21: [u8; 4] = [b'N', b'V', b'2', b'1'];
pub const DRM_FORMAT_P010: [u8; 4] = [b'P', b'0', b'1', b'0'];
pub const DRM_FORMAT_YUV420: [u8; 4] = [b'Y', b'U', b'1', b'2'];
pub const DRM_FORMAT_YVU420: [u8; 4] = [b'Y', b'V', b'1', b'2'];

/*
 * Private formats used by the Android gralloc frontend.  YVU420_ANDROID is YV12 with the
 * chroma stride aligned to 16 bytes.  The two FLEX formats never reach the backend, they are
 * resolved into concrete formats first.
 */
pub const DRM_FORMAT_YVU420_ANDROID: [u8; 4] = [b'9', b'9', b'9', b'7'];
pub const DRM_FORMAT_FLEX_IMPLEMENTATION_DEFINED: [u8; 4] = [b'9', b'9', b'9', b'8'];
pub const DRM_FORMAT_FLEX_YCBCR_420_888: [u8; 4] = [b'9', b'9', b'9', b'9'];

/// A [fourcc](https://en.wikipedia.org/wiki/FourCC) format identifier.
#[derive(Copy, Clone, Eq, PartialEq, Default, Hash)]
pub struct DrmFormat(pub u32);

/// Planar properties associated with each `DrmFormat`.
#[derive(Copy, Clone)]
pub struct PlanarLayout {
    pub num_planes: usize,
    horizontal_subsampling: [u32; 3],
    vertical_subsampling: [u32; 3],
    bytes_per_pixel: [u32; 3],
}

static PACKED_1BPP: PlanarLayout = PlanarLayout {
    num_planes: 1,
    horizontal_subsampling: [1, 0, 0],
    vertical_subsampling: [1, 0, 0],
    bytes_per_pixel: [1, 0, 0],
};

static PACKED_2BPP: PlanarLayout = PlanarLayout {
    num_planes: 1,
    horizontal_subsampling: [1, 0, 0],
    vertical_subsampling: [1, 0, 0],
    bytes_per_pixel: [2, 0, 0],
};

static PACKED_3BPP: PlanarLayout = PlanarLayout {
    num_planes: 1,
    horizontal_subsampling: [1, 0, 0],
    vertical_subsampling: [1, 0, 0],
    bytes_per_pixel: [3, 0, 0],
};

static PACKED_4BPP: PlanarLayout = PlanarLayout {
    num_planes: 1,
    horizontal_subsampling: [1, 0, 0],
    vertical_subsampling: [1, 0, 0],
    bytes_per_pixel: [4, 0, 0],
};

static PACKED_8BPP: PlanarLayout = PlanarLayout {
    num_planes: 1,
    horizontal_subsampling: [1, 0, 0],
    vertical_subsampling: [1, 0, 0],
    bytes_per_pixel: [8, 0, 0],
};

static BIPLANAR_YUV420: PlanarLayout = PlanarLayout {
    num_planes: 2,
    horizontal_subsampling: [1, 2, 0],
    vertical_subsampling: [1, 2, 0],
    bytes_per_pixel: [1, 2, 0],
};

static BIPLANAR_YUV420_2BPP: PlanarLayout = PlanarLayout {
    num_planes: 2,
    horizontal_subsampling: [1, 2, 0],
    vertical_subsampling: [1, 2, 0],
    bytes_per_pixel: [2, 4, 0],
};

static TRIPLANAR_YUV420: PlanarLayout = PlanarLayout {
    num_planes: 3,
    horizontal_subsampling: [1, 2, 2],
    vertical_subsampling: [1, 2, 2],
    bytes_per_pixel: [1, 1, 1],
};

impl DrmFormat {
    /// Constructs a format identifer using a fourcc byte sequence.
    #[inline(always)]
    pub fn new(a: u8, b: u8, c: u8, d: u8) -> DrmFormat {
        DrmFormat(a as u32 | (b as u32) << 8 | (c as u32) << 16 | (d as u32) << 24)
    }

    /// Returns the fourcc code as a sequence of bytes.
    #[inline(always)]
    pub fn to_bytes(&self) -> [u8; 4] {
        let f = self.0;
        [f as u8, (f >> 8) as u8, (f >> 16) as u8, (f >> 24) as u8]
    }

    /// Returns the planar layout of the format.
    pub fn planar_layout(&self) -> GbmMesaResult<PlanarLayout> {
        match self.to_bytes() {
            DRM_FORMAT_R8 => Ok(PACKED_1BPP),
            DRM_FORMAT_RGB565 | DRM_FORMAT_BGR565 => Ok(PACKED_2BPP),
            DRM_FORMAT_RGB888 | DRM_FORMAT_BGR888 => Ok(PACKED_3BPP),
            DRM_FORMAT_ABGR2101010
            | DRM_FORMAT_ABGR8888
            | DRM_FORMAT_XBGR2101010
            | DRM_FORMAT_XBGR8888
            | DRM_FORMAT_ARGB2101010
            | DRM_FORMAT_ARGB8888
            | DRM_FORMAT_XRGB2101010
            | DRM_FORMAT_XRGB8888 => Ok(PACKED_4BPP),
            DRM_FORMAT_ABGR16161616F => Ok(PACKED_8BPP),
            DRM_FORMAT_NV12 | DRM_FORMAT_NV21 => Ok(BIPLANAR_YUV420),
            DRM_FORMAT_P010 => Ok(BIPLANAR_YUV420_2BPP),
            DRM_FORMAT_YUV420 | DRM_FORMAT_YVU420 | DRM_FORMAT_YVU420_ANDROID => {
                Ok(TRIPLANAR_YUV420)
            }
            _ => Err(GbmMesaError::InvalidDrmFormat(self.0)),
        }
    }

    /// Returns the number of planes of the format.
    pub fn num_planes(&self) -> GbmMesaResult<usize> {
        Ok(self.planar_layout()?.num_planes)
    }

    /// Returns the row pitch in bytes of `plane` for an image `width` pixels wide.
    pub fn plane_stride(&self, width: u32, plane: usize) -> GbmMesaResult<u32> {
        let layout = self.planar_layout()?;
        if plane >= layout.num_planes {
            return Err(GbmMesaError::InvalidPlane(plane));
        }

        let bytes_per_pixel = layout.bytes_per_pixel[plane];
        let horizontal_subsampling = layout.horizontal_subsampling[plane];
        let subsampled_width = width.div_ceil(horizontal_subsampling);
        checked_arithmetic!(bytes_per_pixel * subsampled_width)
    }
}

impl From<u32> for DrmFormat {
    fn from(u: u32) -> DrmFormat {
        DrmFormat(u)
    }
}

impl From<[u8; 4]> for DrmFormat {
    fn from(b: [u8; 4]) -> DrmFormat {
        DrmFormat::new(b[0], b[1], b[2], b[3])
    }
}

impl From<DrmFormat> for u32 {
    fn from(f: DrmFormat) -> u32 {
        f.0
    }
}

impl fmt::Debug for DrmFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let b = self.to_bytes();
        if b.iter().all(u8::is_ascii_graphic) {
            write!(
                f,
                "fourcc({}{}{}{})",
                b[0] as char, b[1] as char, b[2] as char, b[3] as char
            )
        } else {
            write!(
                f,
                "fourcc(0x{:02x}{:02x}{:02x}{:02x})",
                b[0], b[1], b[2], b[3]
            )
        }
    }
}

/// Maps a logical format and use flags onto the format the GBM backend is asked for.
///
/// The resolution does not consult the backend; whether the backend can allocate the
/// resulting format is a separate query.
pub fn resolve_format_and_use_flags(format: DrmFormat, use_flags: u64) -> (DrmFormat, u64) {
    let resolved = match format.to_bytes() {
        DRM_FORMAT_FLEX_IMPLEMENTATION_DEFINED => {
            // Camera subsystem requires NV12.
            if use_flags & BO_USE_CAMERA_MASK != 0 {
                DrmFormat::from(DRM_FORMAT_NV12)
            } else {
                // Platform compatibility: b/28671744.
                DrmFormat::from(DRM_FORMAT_XBGR8888)
            }
        }
        DRM_FORMAT_FLEX_YCBCR_420_888 => DrmFormat::from(DRM_FORMAT_NV12),
        // Mesa has no BGR565.
        DRM_FORMAT_BGR565 => DrmFormat::from(DRM_FORMAT_RGB565),
        _ => format,
    };

    (resolved, use_flags)
}

/// Byte layout of a buffer object: per-plane strides, offsets and sizes.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct BoLayout {
    pub num_planes: usize,
    pub strides: [u32; DRV_MAX_PLANES],
    pub offsets: [u32; DRV_MAX_PLANES],
    pub sizes: [u32; DRV_MAX_PLANES],
    pub total_size: u64,
}

fn subsample_stride(stride: u32, format: DrmFormat, plane: usize) -> u32 {
    if plane == 0 {
        return stride;
    }

    match format.to_bytes() {
        DRM_FORMAT_YVU420 | DRM_FORMAT_YUV420 => stride.div_ceil(2),
        DRM_FORMAT_YVU420_ANDROID => align_upwards!(stride.div_ceil(2), 16u32),
        _ => stride,
    }
}

impl BoLayout {
    /// Computes the layout of `format` given the byte stride of the first plane and the
    /// number of rows. `stride` is first rounded up to `stride_align`.
    ///
    /// Chroma planes are derived from the first plane's stride: semi-planar formats reuse it
    /// and fully planar formats halve it.
    pub fn from_format(
        stride: u32,
        stride_align: u32,
        aligned_height: u32,
        format: DrmFormat,
    ) -> GbmMesaResult<BoLayout> {
        let planar = format.planar_layout()?;
        if stride_align == 0 || !stride_align.is_power_of_two() {
            return Err(GbmMesaError::InvalidDimensions(stride, aligned_height));
        }

        let mask = stride_align - 1;
        let stride = checked_arithmetic!(stride + mask)? & !mask;

        let mut layout = BoLayout {
            num_planes: planar.num_planes,
            ..Default::default()
        };

        let mut offset: u32 = 0;
        for plane in 0..planar.num_planes {
            let plane_stride = subsample_stride(stride, format, plane);
            let rows = aligned_height.div_ceil(planar.vertical_subsampling[plane]);
            let plane_size = checked_arithmetic!(plane_stride * rows)?;

            layout.strides[plane] = plane_stride;
            layout.sizes[plane] = plane_size;
            layout.offsets[plane] = offset;
            offset = checked_arithmetic!(offset + plane_size)?;
        }

        layout.total_size = offset as u64;
        Ok(layout)
    }

    /// Returns the layout with the total size rounded up to `align` bytes. The padding is
    /// accounted to the last plane.
    pub fn aligned_to(mut self, align: u64) -> GbmMesaResult<BoLayout> {
        if align == 0 || !align.is_power_of_two() {
            return Err(GbmMesaError::InvalidDimensions(align as u32, 1));
        }

        let total_size = self.total_size;
        let mask = align - 1;
        let aligned = checked_arithmetic!(total_size + mask)? & !mask;
        if self.num_planes > 0 {
            let padding = u32::try_from(aligned - total_size)?;
            let last = self.num_planes - 1;
            let size = self.sizes[last];
            self.sizes[last] = checked_arithmetic!(size + padding)?;
        }

        self.total_size = aligned;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use std::fmt::Write;

    use super::*;

    #[test]
    fn format_debug() {
        let f = DrmFormat::new(b'X', b'R', b'2', b'4');
        let mut buf = String::new();
        write!(&mut buf, "{:?}", f).unwrap();
        assert_eq!(buf, "fourcc(XR24)");

        let f = DrmFormat::new(0, 1, 2, 16);
        let mut buf = String::new();
        write!(&mut buf, "{:?}", f).unwrap();
        assert_eq!(buf, "fourcc(0x00010210)");
    }

    #[test]
    fn resolve_flexible_formats() {
        let flex = DrmFormat::from(DRM_FORMAT_FLEX_IMPLEMENTATION_DEFINED);

        let (camera, _) = resolve_format_and_use_flags(flex, BO_USE_CAMERA_WRITE);
        assert_eq!(camera, DrmFormat::from(DRM_FORMAT_NV12));

        let (camera, _) = resolve_format_and_use_flags(flex, BO_USE_CAMERA_READ);
        assert_eq!(camera, DrmFormat::from(DRM_FORMAT_NV12));

        let (display, flags) =
            resolve_format_and_use_flags(flex, BO_USE_SCANOUT | BO_USE_TEXTURE);
        assert_eq!(display, DrmFormat::from(DRM_FORMAT_XBGR8888));
        assert_eq!(flags, BO_USE_SCANOUT | BO_USE_TEXTURE);

        let (yuv, _) = resolve_format_and_use_flags(
            DrmFormat::from(DRM_FORMAT_FLEX_YCBCR_420_888),
            BO_USE_NONE,
        );
        assert_eq!(yuv, DrmFormat::from(DRM_FORMAT_NV12));
    }

    #[test]
    fn resolve_bgr565_and_passthrough() {
        let (rgb, _) =
            resolve_format_and_use_flags(DrmFormat::from(DRM_FORMAT_BGR565), BO_USE_RENDERING);
        assert_eq!(rgb, DrmFormat::from(DRM_FORMAT_RGB565));

        for f in [DRM_FORMAT_ARGB8888, DRM_FORMAT_R8, DRM_FORMAT_P010, DRM_FORMAT_NV21] {
            let (same, _) = resolve_format_and_use_flags(DrmFormat::from(f), BO_USE_SW_MASK);
            assert_eq!(same, DrmFormat::from(f));
        }
    }

    #[test]
    fn resolve_is_idempotent() {
        let formats = [
            DRM_FORMAT_FLEX_IMPLEMENTATION_DEFINED,
            DRM_FORMAT_FLEX_YCBCR_420_888,
            DRM_FORMAT_BGR565,
            DRM_FORMAT_XRGB8888,
        ];

        for flags in [BO_USE_NONE, BO_USE_CAMERA_READ, BO_USE_SCANOUT] {
            for f in formats {
                let (once, once_flags) = resolve_format_and_use_flags(DrmFormat::from(f), flags);
                let (twice, twice_flags) = resolve_format_and_use_flags(once, once_flags);
                assert_eq!(once, twice);
                assert_eq!(once_flags, twice_flags);
            }
        }
    }

    #[test]
    fn packed_layouts() {
        let r8 = BoLayout::from_format(10, 1, 10, DrmFormat::from(DRM_FORMAT_R8)).unwrap();
        assert_eq!(r8.num_planes, 1);
        assert_eq!(r8.strides[0], 10);
        assert_eq!(r8.sizes[0], 100);
        assert_eq!(r8.total_size, 100);

        let xr24 =
            BoLayout::from_format(40, 64, 10, DrmFormat::from(DRM_FORMAT_XRGB8888)).unwrap();
        assert_eq!(xr24.strides[0], 64);
        assert_eq!(xr24.total_size, 640);
    }

    #[test]
    fn planar_layouts() {
        let nv12 = BoLayout::from_format(10, 1, 10, DrmFormat::from(DRM_FORMAT_NV12)).unwrap();
        assert_eq!(nv12.num_planes, 2);
        assert_eq!(nv12.strides[..2], [10, 10]);
        assert_eq!(nv12.offsets[..2], [0, 100]);
        assert_eq!(nv12.sizes[..2], [100, 50]);
        assert_eq!(nv12.total_size, 150);

        let yv12 = BoLayout::from_format(10, 1, 10, DrmFormat::from(DRM_FORMAT_YVU420)).unwrap();
        assert_eq!(yv12.num_planes, 3);
        assert_eq!(yv12.strides[..3], [10, 5, 5]);
        assert_eq!(yv12.offsets[..3], [0, 100, 125]);
        assert_eq!(yv12.total_size, 150);

        let android =
            BoLayout::from_format(64, 1, 4, DrmFormat::from(DRM_FORMAT_YVU420_ANDROID)).unwrap();
        assert_eq!(android.strides[..3], [64, 32, 32]);

        let android =
            BoLayout::from_format(40, 1, 4, DrmFormat::from(DRM_FORMAT_YVU420_ANDROID)).unwrap();
        assert_eq!(android.strides[..3], [40, 32, 32]);
    }

    #[test]
    fn aligned_total_size() {
        let layout = BoLayout::from_format(100, 1, 3, DrmFormat::from(DRM_FORMAT_R8))
            .unwrap()
            .aligned_to(4096)
            .unwrap();
        assert_eq!(layout.total_size, 4096);
        assert_eq!(layout.sizes[0], 4096);

        let unchanged = BoLayout::from_format(100, 1, 3, DrmFormat::from(DRM_FORMAT_R8))
            .unwrap()
            .aligned_to(1)
            .unwrap();
        assert_eq!(unchanged.total_size, 300);
    }

    #[test]
    fn unknown_format_has_no_layout() {
        let flex = DrmFormat::from(DRM_FORMAT_FLEX_IMPLEMENTATION_DEFINED);
        assert!(matches!(
            BoLayout::from_format(16, 1, 16, flex),
            Err(GbmMesaError::InvalidDrmFormat(_))
        ));
        assert!(DrmFormat::from(DRM_FORMAT_NV12).plane_stride(16, 2).is_err());
        assert_eq!(
            DrmFormat::from(DRM_FORMAT_ABGR8888).plane_stride(16, 0).unwrap(),
            64
        );
    }

    #[test]
    fn layout_overflow_is_reported() {
        assert!(matches!(
            BoLayout::from_format(u32::MAX / 2, 1, 4, DrmFormat::from(DRM_FORMAT_R8)),
            Err(GbmMesaError::CheckedArithmetic { .. })
        ));
    }
}
