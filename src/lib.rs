// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Reference picture management and parameter set activation for H.266.
//!
//! [`codec::h266`] holds the building blocks: syntax structures, the DPB,
//! reference picture list construction, marking and conformance checks.
//! [`decoder::h266::RefPicSession`] runs them for each picture of a
//! bitstream.

pub mod codec;
pub mod decoder;
