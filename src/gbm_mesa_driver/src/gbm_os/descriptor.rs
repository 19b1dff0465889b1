// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::fs::File;
use std::io;
use std::mem;
use std::mem::ManuallyDrop;
use std::os::unix::io::AsRawFd;
use std::os::unix::io::FromRawFd;
use std::os::unix::io::IntoRawFd;
use std::os::unix::io::RawFd;

pub type RawDescriptor = RawFd;

/// Wraps a RawDescriptor and safely closes it when self falls out of scope.
#[derive(Debug)]
pub struct SafeDescriptor {
    pub(crate) descriptor: RawDescriptor,
}

/// Trait for forfeiting ownership of the current raw descriptor, and returning the raw descriptor
pub trait IntoRawDescriptor {
    fn into_raw_descriptor(self) -> RawDescriptor;
}

/// Trait for returning the underlying raw descriptor, without giving up ownership of the
/// descriptor.
pub trait AsRawDescriptor {
    /// Returns the underlying raw descriptor.
    ///
    /// Since the descriptor is still owned by the provider, callers should not assume that it will
    /// remain open for longer than the immediate call of this method. If you need to use the
    /// descriptor for a longer time, duplicate it into a [`SafeDescriptor`].
    fn as_raw_descriptor(&self) -> RawDescriptor;
}

pub trait FromRawDescriptor {
    /// # Safety
    /// Safe only if the caller ensures nothing has access to the descriptor after passing it to
    /// `from_raw_descriptor`
    unsafe fn from_raw_descriptor(descriptor: RawDescriptor) -> Self;
}

impl SafeDescriptor {
    /// Clones this descriptor, internally creating a new descriptor. The new SafeDescriptor will
    /// share the same underlying count within the kernel.
    pub fn try_clone(&self) -> io::Result<SafeDescriptor> {
        // Safe because this doesn't modify any memory and we check the return value.
        let descriptor = unsafe { libc::fcntl(self.descriptor, libc::F_DUPFD_CLOEXEC, 0) };
        if descriptor < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(SafeDescriptor { descriptor })
        }
    }

    /// Returns the inode number of the file behind this descriptor. Descriptors duplicated from
    /// one another always report the same inode.
    pub fn inode(&self) -> io::Result<u64> {
        // Safe because `st` is only read after fstat reports success, and fstat writes no more
        // than size_of::<libc::stat>() bytes.
        let mut st = mem::MaybeUninit::<libc::stat>::uninit();
        let ret = unsafe { libc::fstat(self.descriptor, st.as_mut_ptr()) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }

        let st = unsafe { st.assume_init() };
        Ok(st.st_ino as u64)
    }
}

impl Drop for SafeDescriptor {
    fn drop(&mut self) {
        // Safe because we own the descriptor and nothing else can close it.
        let _ = unsafe { libc::close(self.descriptor) };
    }
}

impl AsRawDescriptor for SafeDescriptor {
    fn as_raw_descriptor(&self) -> RawDescriptor {
        self.descriptor
    }
}

impl IntoRawDescriptor for SafeDescriptor {
    fn into_raw_descriptor(self) -> RawDescriptor {
        let descriptor = self.descriptor;
        mem::forget(self);
        descriptor
    }
}

impl FromRawDescriptor for SafeDescriptor {
    unsafe fn from_raw_descriptor(descriptor: RawDescriptor) -> Self {
        SafeDescriptor { descriptor }
    }
}

impl TryFrom<&dyn AsRawDescriptor> for SafeDescriptor {
    type Error = std::io::Error;

    /// Clones the underlying descriptor, internally creating a new descriptor. The caller keeps
    /// ownership of `rd`.
    fn try_from(rd: &dyn AsRawDescriptor) -> std::result::Result<Self, Self::Error> {
        // Safe because the underlying raw descriptor is guaranteed valid by rd's existence.
        //
        // Note that we are cloning the underlying raw descriptor since we have no guarantee of
        // its existence after this function returns.
        let rd_as_safe_desc = ManuallyDrop::new(unsafe {
            SafeDescriptor::from_raw_descriptor(rd.as_raw_descriptor())
        });

        // We have to clone rd because we have no guarantee ownership was transferred (rd is
        // borrowed).
        rd_as_safe_desc.try_clone()
    }
}

impl From<File> for SafeDescriptor {
    fn from(f: File) -> SafeDescriptor {
        // Safe because we own the File at this point.
        unsafe { SafeDescriptor::from_raw_descriptor(f.into_raw_descriptor()) }
    }
}

impl From<SafeDescriptor> for File {
    fn from(s: SafeDescriptor) -> File {
        // Safe because we own the SafeDescriptor at this point.
        unsafe { File::from_raw_fd(s.into_raw_descriptor()) }
    }
}

impl AsRawDescriptor for File {
    fn as_raw_descriptor(&self) -> RawDescriptor {
        self.as_raw_fd()
    }
}

impl IntoRawDescriptor for File {
    fn into_raw_descriptor(self) -> RawDescriptor {
        self.into_raw_fd()
    }
}

/// For use cases where a simple wrapper around a [`RawDescriptor`] is needed, in order to e.g.
/// implement [`trait@AsRawDescriptor`].
///
/// This is a simply a wrapper and does not manage the lifetime of the descriptor. As such it is the
/// responsibility of the user to ensure that the wrapped descriptor will not be closed for as long
/// as the `Descriptor` is alive.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Descriptor(pub RawDescriptor);
impl AsRawDescriptor for Descriptor {
    fn as_raw_descriptor(&self) -> RawDescriptor {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use vmm_sys_util::tempfile::TempFile;

    use super::*;

    #[test]
    fn dup_keeps_inode() {
        let file = TempFile::new().unwrap().into_file();
        let source = SafeDescriptor::from(file);
        let duplicate = source.try_clone().unwrap();

        assert_ne!(
            source.as_raw_descriptor(),
            duplicate.as_raw_descriptor()
        );
        assert_eq!(source.inode().unwrap(), duplicate.inode().unwrap());
    }

    #[test]
    fn distinct_files_have_distinct_inodes() {
        let a = SafeDescriptor::from(TempFile::new().unwrap().into_file());
        let b = SafeDescriptor::from(TempFile::new().unwrap().into_file());

        assert_ne!(a.inode().unwrap(), b.inode().unwrap());
    }

    #[test]
    fn borrowed_clone_leaves_source_open() {
        let file = TempFile::new().unwrap().into_file();
        let raw = Descriptor(file.as_raw_descriptor());
        let cloned = SafeDescriptor::try_from(&raw as &dyn AsRawDescriptor).unwrap();
        drop(cloned);

        // The caller's descriptor is still valid after the clone was closed.
        assert!(file.metadata().is_ok());
    }
}
