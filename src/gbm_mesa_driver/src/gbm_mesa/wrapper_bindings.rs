// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

// Hand written from gbm_mesa_wrapper.h, the interface exported by libgbm_mesa_wrapper.so.

#![allow(dead_code, non_camel_case_types)]

use std::os::raw::c_int;
use std::os::raw::c_void;

#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct alloc_args {
    pub gbm: *mut c_void,
    pub width: u32,
    pub height: u32,
    pub drm_format: u32,
    pub force_linear: bool,
    pub needs_map_stride: bool,
    pub use_scanout: bool,
    pub out_fd: c_int,
    pub out_stride: u32,
    pub out_map_stride: u32,
    pub out_modifier: u64,
}

#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct gbm_ops {
    pub dev_create: Option<unsafe extern "C" fn(fd: c_int) -> *mut c_void>,
    pub dev_destroy: Option<unsafe extern "C" fn(gbm_ptr: *mut c_void)>,
    pub get_gbm_format: Option<unsafe extern "C" fn(format: u32) -> u32>,
    pub alloc: Option<unsafe extern "C" fn(args: *mut alloc_args) -> c_int>,
    pub import: Option<
        unsafe extern "C" fn(
            gbm_ptr: *mut c_void,
            buf_fd: c_int,
            width: u32,
            height: u32,
            stride: u32,
            modifier: u64,
            format: u32,
        ) -> *mut c_void,
    >,
    pub free: Option<unsafe extern "C" fn(gbm_bo_ptr: *mut c_void)>,
    pub map: Option<
        unsafe extern "C" fn(
            gbm_bo_ptr: *mut c_void,
            w: c_int,
            h: c_int,
            addr: *mut *mut c_void,
            map_data: *mut *mut c_void,
        ),
    >,
    pub unmap: Option<unsafe extern "C" fn(gbm_bo_ptr: *mut c_void, map_data: *mut c_void)>,
}

pub type get_gbm_ops_t = unsafe extern "C" fn() -> *mut gbm_ops;
