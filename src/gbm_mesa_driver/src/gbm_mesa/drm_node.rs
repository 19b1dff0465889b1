// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! drm_node: discovery of the DRM primary (`card*`) and render (`renderD*`) nodes used by the
//! gbm_mesa driver.

use std::ffi::CString;
use std::fs;
use std::fs::OpenOptions;
use std::os::raw::c_char;
use std::os::raw::c_int;
use std::os::raw::c_uint;
#[cfg(target_pointer_width = "64")]
use std::os::raw::c_ulong;
use std::path::Path;
use std::path::PathBuf;
use std::ptr::null_mut;

use log::debug;
use log::error;
use log::info;
use log::warn;
use nix::ioctl_none;
use nix::ioctl_readwrite;

use crate::gbm_os::AsRawDescriptor;
use crate::gbm_os::SafeDescriptor;
use crate::gbm_utils::GbmMesaError;
use crate::gbm_utils::GbmMesaResult;

// Consistent with __kernel_size_t in include/uapi/asm-generic/posix_types.h.
#[cfg(not(target_pointer_width = "64"))]
#[allow(non_camel_case_types)]
type __kernel_size_t = c_uint;
#[cfg(target_pointer_width = "64")]
#[allow(non_camel_case_types)]
type __kernel_size_t = c_ulong;

const DRM_IOCTL_BASE: c_uint = 0x64;
const DRM_IOCTL_VERSION: c_uint = 0x00;
const DRM_IOCTL_DROP_MASTER: c_uint = 0x1f;
const DRM_IOCTL_MODE_GETRESOURCES: c_uint = 0xa0;

#[repr(C)]
#[derive(Copy, Clone)]
pub struct drm_version {
    version_major: c_int,
    version_minor: c_int,
    version_patchlevel: c_int,
    name_len: __kernel_size_t,
    name: *mut c_char,
    date_len: __kernel_size_t,
    date: *mut c_char,
    desc_len: __kernel_size_t,
    desc: *mut c_char,
}

#[repr(C)]
#[derive(Copy, Clone, Default)]
pub struct drm_mode_card_res {
    fb_id_ptr: u64,
    crtc_id_ptr: u64,
    connector_id_ptr: u64,
    encoder_id_ptr: u64,
    count_fbs: u32,
    count_crtcs: u32,
    count_connectors: u32,
    count_encoders: u32,
    min_width: u32,
    max_width: u32,
    min_height: u32,
    max_height: u32,
}

ioctl_readwrite!(
    drm_get_version,
    DRM_IOCTL_BASE,
    DRM_IOCTL_VERSION,
    drm_version
);

ioctl_readwrite!(
    drm_mode_get_resources,
    DRM_IOCTL_BASE,
    DRM_IOCTL_MODE_GETRESOURCES,
    drm_mode_card_res
);

ioctl_none!(drm_drop_master, DRM_IOCTL_BASE, DRM_IOCTL_DROP_MASTER);

/// Driver names of GPUs that rely on a separate display controller driver. For these GPUs the
/// KMS capable `card` node has to be found and opened; other GPUs are reached through their
/// render node.
pub const SEPARATE_DC_GPUS: [&str; 6] = ["v3d", "vc4", "etnaviv", "panfrost", "lima", "freedreno"];

/// The two families of DRM device nodes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DrmNodeKind {
    /// `/dev/dri/card*`, may expose KMS.
    Primary,
    /// `/dev/dri/renderD*`, rendering and allocation only.
    Render,
}

impl DrmNodeKind {
    fn prefix(self) -> &'static str {
        match self {
            DrmNodeKind::Primary => "card",
            DrmNodeKind::Render => "renderD",
        }
    }
}

fn get_drm_device_name(fd: &SafeDescriptor) -> GbmMesaResult<String> {
    let mut version = drm_version {
        version_major: 0,
        version_minor: 0,
        version_patchlevel: 0,
        name_len: 0,
        name: null_mut(),
        date_len: 0,
        date: null_mut(),
        desc_len: 0,
        desc: null_mut(),
    };

    // Get the length of the device name.
    unsafe {
        drm_get_version(fd.as_raw_descriptor(), &mut version)?;
    }

    // Enough bytes to hold the device name and terminating null character.
    let mut name_bytes: Vec<u8> = vec![0; (version.name_len + 1) as usize];
    let mut version = drm_version {
        version_major: 0,
        version_minor: 0,
        version_patchlevel: 0,
        name_len: name_bytes.len() as __kernel_size_t,
        name: name_bytes.as_mut_ptr() as *mut c_char,
        date_len: 0,
        date: null_mut(),
        desc_len: 0,
        desc: null_mut(),
    };

    // Safe as no more than name_len + 1 bytes will be written to name.
    unsafe {
        drm_get_version(fd.as_raw_descriptor(), &mut version)?;
    }

    let name_len = (version.name_len as usize).min(name_bytes.len() - 1);
    CString::new(&name_bytes[..name_len])?
        .into_string()
        .map_err(|_| GbmMesaError::DrmNodeUnavailable)
}

/// Returns true if the device behind `fd` exposes CRTCs, connectors and encoders.
pub fn is_kms_dev(fd: &SafeDescriptor) -> bool {
    let mut res: drm_mode_card_res = Default::default();

    // Safe because all id pointers are null, so the kernel only fills in the counts.
    match unsafe { drm_mode_get_resources(fd.as_raw_descriptor(), &mut res) } {
        Ok(_) => res.count_crtcs > 0 && res.count_connectors > 0 && res.count_encoders > 0,
        Err(_) => false,
    }
}

/// Gives up DRM master on `fd` so that the compositor can configure KMS state.
pub fn drop_master(fd: &SafeDescriptor) -> GbmMesaResult<()> {
    // Safe because the ioctl takes no argument.
    unsafe {
        drm_drop_master(fd.as_raw_descriptor())?;
    }
    Ok(())
}

fn matching_nodes(dri_dir: &Path, kind: DrmNodeKind) -> GbmMesaResult<Vec<PathBuf>> {
    let pattern = || format!("{}/{}*", dri_dir.display(), kind.prefix());
    let entries = fs::read_dir(dri_dir).map_err(|_| GbmMesaError::NoDrmDevice(pattern()))?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().starts_with(kind.prefix()))
        .map(|entry| entry.path())
        .collect();

    if paths.is_empty() {
        return Err(GbmMesaError::NoDrmDevice(pattern()));
    }

    paths.sort();
    Ok(paths)
}

/// Opens every node of `kind` in `dri_dir` in turn and calls `found` with the descriptor, its
/// KMS capability and its driver name. The first descriptor `found` accepts is returned and
/// enumeration stops; rejected descriptors are closed.
///
/// Returns `NoDrmDevice` if no node matches, and `Ok(None)` if nodes exist but none was
/// accepted.
pub fn open_drm_dev<F>(
    dri_dir: &Path,
    kind: DrmNodeKind,
    mut found: F,
) -> GbmMesaResult<Option<SafeDescriptor>>
where
    F: FnMut(&SafeDescriptor, bool, &str) -> bool,
{
    for path in matching_nodes(dri_dir, kind)? {
        let fd = match OpenOptions::new().read(true).write(true).open(&path) {
            Ok(file) => SafeDescriptor::from(file),
            Err(e) => {
                error!("Unable to open {} with error {}", path.display(), e);
                continue;
            }
        };

        let name = match get_drm_device_name(&fd) {
            Ok(name) => name,
            Err(e) => {
                warn!("Unable to query DRM version of {}: {}", path.display(), e);
                continue;
            }
        };

        if found(&fd, is_kms_dev(&fd), &name) {
            debug!("Selected {} ({})", path.display(), name);
            return Ok(Some(fd));
        }
    }

    Ok(None)
}

/// Outcome of the GPU render node probe.
#[derive(Debug, Default)]
pub struct GpuProbe {
    /// The render node used for allocation, if one could be opened.
    pub gpu_node: Option<SafeDescriptor>,
    /// True if the GPU has no display controller of its own.
    pub separate_dc: bool,
}

/// Selects DRM nodes for a driver session.
pub trait DrmDiscovery: Send {
    /// Opens the first usable render node and reports whether its GPU needs a companion
    /// display controller device.
    fn probe_gpu(&self) -> GbmMesaResult<GpuProbe>;

    /// Opens the first KMS capable primary node and drops DRM master on it. Returns `None`
    /// when no such node exists.
    fn find_kms_node(&self) -> Option<SafeDescriptor>;
}

/// Discovery over the device nodes of a DRI directory.
pub struct DriDiscovery {
    dri_dir: PathBuf,
    separate_dc_gpus: Vec<String>,
}

impl DriDiscovery {
    pub fn new(dri_dir: PathBuf, separate_dc_gpus: Vec<String>) -> DriDiscovery {
        DriDiscovery {
            dri_dir,
            separate_dc_gpus,
        }
    }

    fn is_separate_dc_gpu(&self, name: &str) -> bool {
        self.separate_dc_gpus.iter().any(|gpu| gpu == name)
    }
}

impl DrmDiscovery for DriDiscovery {
    fn probe_gpu(&self) -> GbmMesaResult<GpuProbe> {
        let mut gpu_name = String::new();
        let gpu_node = open_drm_dev(&self.dri_dir, DrmNodeKind::Render, |_, _, name| {
            gpu_name = name.to_string();
            true
        })?;

        let separate_dc = gpu_node.is_some() && self.is_separate_dc_gpu(&gpu_name);
        if gpu_node.is_some() {
            info!("Found GPU {}", gpu_name);
        }

        Ok(GpuProbe {
            gpu_node,
            separate_dc,
        })
    }

    fn find_kms_node(&self) -> Option<SafeDescriptor> {
        let kms_node = open_drm_dev(&self.dri_dir, DrmNodeKind::Primary, |_, is_kms, name| {
            if is_kms {
                info!("Found KMS dev {}", name);
            }
            is_kms
        });

        match kms_node {
            Ok(Some(fd)) => {
                // The card node is only opened so that the display stack can configure it
                // later; the composer needs DRM master, not this process.
                if let Err(e) = drop_master(&fd) {
                    warn!("Unable to drop DRM master: {}", e);
                }
                Some(fd)
            }
            Ok(None) => {
                error!("Unable to find/open /dev/card node with KMS capabilities");
                None
            }
            Err(e) => {
                error!("Unable to find/open /dev/card node with KMS capabilities: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs::File;

    use vmm_sys_util::tempdir::TempDir;

    use super::*;

    fn fake_dri_dir(nodes: &[&str]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for node in nodes {
            File::create(dir.as_path().join(node)).unwrap();
        }
        dir
    }

    #[test]
    fn empty_directory_has_no_device() {
        let dir = fake_dri_dir(&[]);
        let ret = open_drm_dev(dir.as_path(), DrmNodeKind::Render, |_, _, _| true);
        assert!(matches!(ret, Err(GbmMesaError::NoDrmDevice(_))));
    }

    #[test]
    fn missing_directory_has_no_device() {
        let ret = open_drm_dev(
            Path::new("/nonexistent/dri"),
            DrmNodeKind::Primary,
            |_, _, _| true,
        );
        assert!(matches!(ret, Err(GbmMesaError::NoDrmDevice(_))));
    }

    #[test]
    fn pattern_only_matches_node_kind() {
        let dir = fake_dri_dir(&["card0", "by-path"]);
        let ret = open_drm_dev(dir.as_path(), DrmNodeKind::Render, |_, _, _| true);
        assert!(matches!(ret, Err(GbmMesaError::NoDrmDevice(_))));
    }

    #[test]
    fn non_drm_nodes_are_skipped() {
        let dir = fake_dri_dir(&["renderD128", "renderD129"]);
        let mut calls = 0;
        let ret = open_drm_dev(dir.as_path(), DrmNodeKind::Render, |_, _, _| {
            calls += 1;
            true
        })
        .unwrap();

        assert!(ret.is_none());
        assert_eq!(calls, 0);
    }

    #[test]
    fn regular_file_is_not_kms() {
        let dir = fake_dri_dir(&["card0"]);
        let file = File::open(dir.as_path().join("card0")).unwrap();
        assert!(!is_kms_dev(&SafeDescriptor::from(file)));
    }

    #[test]
    fn discovery_without_gpu() {
        let dir = fake_dri_dir(&["card0", "renderD128"]);
        let discovery = DriDiscovery::new(
            dir.as_path().to_path_buf(),
            SEPARATE_DC_GPUS.iter().map(|s| s.to_string()).collect(),
        );

        let probe = discovery.probe_gpu().unwrap();
        assert!(probe.gpu_node.is_none());
        assert!(!probe.separate_dc);
        assert!(discovery.find_kms_node().is_none());
    }

    #[test]
    fn separate_dc_list() {
        let discovery = DriDiscovery::new(
            PathBuf::from("/dev/dri"),
            SEPARATE_DC_GPUS.iter().map(|s| s.to_string()).collect(),
        );
        assert!(discovery.is_separate_dc_gpu("vc4"));
        assert!(discovery.is_separate_dc_gpu("panfrost"));
        assert!(!discovery.is_separate_dc_gpu("amdgpu"));
        assert!(!discovery.is_separate_dc_gpu("i915"));
    }
}
