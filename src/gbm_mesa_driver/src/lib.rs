// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! A gralloc buffer allocation driver backed by Mesa's GBM.

#[macro_use]
mod macros;
mod gbm_mesa;
mod gbm_os;
mod gbm_utils;

pub use crate::gbm_mesa::*;
pub use crate::gbm_os::AsRawDescriptor;
pub use crate::gbm_os::Descriptor;
pub use crate::gbm_os::FromRawDescriptor;
pub use crate::gbm_os::IntoRawDescriptor;
pub use crate::gbm_os::RawDescriptor;
pub use crate::gbm_os::SafeDescriptor;
pub use crate::gbm_utils::*;
