// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

pub mod conformance;
pub mod dpb;
#[cfg(test)]
pub(crate) mod dummy;
pub mod marking;
pub mod parser;
pub mod picture;
pub mod ps_manager;
pub mod ref_lists;
pub mod rpl;
pub mod slice;
