// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! combinations: the format × use flag pairs advertised to the host allocator.

use crate::gbm_mesa::formats::*;
use crate::gbm_utils::*;

/// Layout metadata attached to an advertised combination.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FormatMetadata {
    pub tiling: u32,
    pub priority: u32,
    pub modifier: u64,
}

pub const LINEAR_METADATA: FormatMetadata = FormatMetadata {
    tiling: 1,
    priority: 0,
    modifier: DRM_FORMAT_MOD_LINEAR,
};

/// One advertised format and the use flags it can satisfy.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Combination {
    pub format: DrmFormat,
    pub metadata: FormatMetadata,
    pub use_flags: u64,
}

/// The table of combinations a driver context supports.
#[derive(Clone, Debug, Default)]
pub struct Combinations {
    entries: Vec<Combination>,
}

impl Combinations {
    pub fn new() -> Combinations {
        Default::default()
    }

    pub fn add_combination(
        &mut self,
        format: DrmFormat,
        metadata: FormatMetadata,
        use_flags: u64,
    ) {
        self.entries.push(Combination {
            format,
            metadata,
            use_flags,
        });
    }

    pub fn add_combinations(
        &mut self,
        formats: &[[u8; 4]],
        metadata: FormatMetadata,
        use_flags: u64,
    ) {
        for format in formats {
            self.add_combination(DrmFormat::from(*format), metadata, use_flags);
        }
    }

    /// Adds `use_flags` to every entry with the given format and metadata.
    pub fn modify_combination(
        &mut self,
        format: DrmFormat,
        metadata: FormatMetadata,
        use_flags: u64,
    ) {
        for entry in self
            .entries
            .iter_mut()
            .filter(|e| e.format == format && e.metadata == metadata)
        {
            entry.use_flags |= use_flags;
        }
    }

    /// All current GBM drivers can scanout linear XRGB8888/ARGB8888 as a primary plane and as
    /// a cursor.
    pub fn modify_linear_combinations(&mut self) {
        for format in [DRM_FORMAT_XRGB8888, DRM_FORMAT_ARGB8888] {
            self.modify_combination(
                DrmFormat::from(format),
                LINEAR_METADATA,
                BO_USE_CURSOR | BO_USE_SCANOUT,
            );
        }
    }

    /// Returns the first combination of `format` that satisfies all of `use_flags`.
    pub fn get(&self, format: DrmFormat, use_flags: u64) -> Option<&Combination> {
        self.entries
            .iter()
            .find(|e| e.format == format && e.use_flags & use_flags == use_flags)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Combination> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

const SCANOUT_RENDER_FORMATS: [[u8; 4]; 5] = [
    DRM_FORMAT_ARGB8888,
    DRM_FORMAT_XRGB8888,
    DRM_FORMAT_ABGR8888,
    DRM_FORMAT_XBGR8888,
    DRM_FORMAT_RGB565,
];

const TEXTURE_ONLY_FORMATS: [[u8; 4]; 4] = [
    DRM_FORMAT_NV12,
    DRM_FORMAT_NV21,
    DRM_FORMAT_YVU420,
    DRM_FORMAT_YVU420_ANDROID,
];

/// Builds the table the gbm_mesa driver advertises.
pub fn gbm_mesa_combinations() -> Combinations {
    let mut c = Combinations::new();

    c.add_combinations(
        &SCANOUT_RENDER_FORMATS,
        LINEAR_METADATA,
        BO_USE_RENDER_MASK | BO_USE_SCANOUT,
    );
    c.add_combinations(
        &TEXTURE_ONLY_FORMATS,
        LINEAR_METADATA,
        BO_USE_TEXTURE_MASK | BO_USE_SCANOUT,
    );

    c.add_combination(
        DrmFormat::from(DRM_FORMAT_R8),
        LINEAR_METADATA,
        BO_USE_SW_MASK | BO_USE_LINEAR,
    );
    // android.hardware.cts.HardwareBufferTest#testCreate
    c.add_combination(
        DrmFormat::from(DRM_FORMAT_BGR888),
        LINEAR_METADATA,
        BO_USE_SW_MASK,
    );

    c.modify_combination(
        DrmFormat::from(DRM_FORMAT_NV12),
        LINEAR_METADATA,
        BO_USE_HW_VIDEO_ENCODER | BO_USE_HW_VIDEO_DECODER | BO_USE_CAMERA_MASK,
    );
    c.modify_combination(
        DrmFormat::from(DRM_FORMAT_NV21),
        LINEAR_METADATA,
        BO_USE_HW_VIDEO_ENCODER,
    );

    // R8 backs HAL_PIXEL_FORMAT_BLOB: JPEG snapshots and codec input/output.
    c.modify_combination(
        DrmFormat::from(DRM_FORMAT_R8),
        LINEAR_METADATA,
        BO_USE_CAMERA_MASK | BO_USE_HW_VIDEO_DECODER | BO_USE_HW_VIDEO_ENCODER,
    );

    // Some camera implementations, the external provider included, ask for YV12.
    c.modify_combination(
        DrmFormat::from(DRM_FORMAT_YVU420_ANDROID),
        LINEAR_METADATA,
        BO_USE_CAMERA_MASK,
    );

    c.modify_linear_combinations();
    c
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scanout_formats_are_advertised() {
        let c = gbm_mesa_combinations();
        for format in SCANOUT_RENDER_FORMATS {
            assert!(c
                .get(DrmFormat::from(format), BO_USE_SCANOUT | BO_USE_RENDERING)
                .is_some());
        }

        assert!(c
            .get(DrmFormat::from(DRM_FORMAT_XRGB8888), BO_USE_CURSOR)
            .is_some());
        assert!(c
            .get(DrmFormat::from(DRM_FORMAT_ABGR8888), BO_USE_CURSOR)
            .is_none());
    }

    #[test]
    fn camera_and_codec_modifications() {
        let c = gbm_mesa_combinations();
        let nv12 = DrmFormat::from(DRM_FORMAT_NV12);
        assert!(c.get(nv12, BO_USE_CAMERA_MASK | BO_USE_TEXTURE).is_some());
        assert!(c.get(nv12, BO_USE_HW_VIDEO_DECODER).is_some());
        assert!(c.get(nv12, BO_USE_RENDERING).is_none());

        let nv21 = DrmFormat::from(DRM_FORMAT_NV21);
        assert!(c.get(nv21, BO_USE_HW_VIDEO_ENCODER).is_some());
        assert!(c.get(nv21, BO_USE_CAMERA_READ).is_none());

        let r8 = DrmFormat::from(DRM_FORMAT_R8);
        assert!(c.get(r8, BO_USE_SW_MASK | BO_USE_CAMERA_WRITE).is_some());
        assert!(c.get(r8, BO_USE_SCANOUT).is_none());

        let bgr888 = DrmFormat::from(DRM_FORMAT_BGR888);
        assert!(c.get(bgr888, BO_USE_SW_READ_OFTEN).is_some());
        assert!(c.get(bgr888, BO_USE_CAMERA_READ).is_none());
    }

    #[test]
    fn modify_only_touches_matching_metadata() {
        let tiled = FormatMetadata {
            tiling: 2,
            priority: 1,
            modifier: 0x0100_0000_0000_0001,
        };
        let xr24 = DrmFormat::from(DRM_FORMAT_XRGB8888);

        let mut c = Combinations::new();
        c.add_combination(xr24, LINEAR_METADATA, BO_USE_RENDERING);
        c.add_combination(xr24, tiled, BO_USE_RENDERING);
        c.modify_combination(xr24, tiled, BO_USE_SCANOUT);

        let flags: Vec<u64> = c.iter().map(|e| e.use_flags).collect();
        assert_eq!(flags, vec![BO_USE_RENDERING, BO_USE_RENDERING | BO_USE_SCANOUT]);
        assert_eq!(c.len(), 2);
    }
}
