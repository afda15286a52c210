// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Test helpers: a picture buffer that only counts the calls made on it, and
//! shortcuts to build pictures, lists and parameter sets.

use std::rc::Rc;

use crate::codec::h266::dpb::PictureBuffer;
use crate::codec::h266::parser::NaluType;
use crate::codec::h266::parser::Sps;
use crate::codec::h266::picture::PictureData;
use crate::codec::h266::rpl::ReferencePictureList;
use crate::codec::h266::rpl::RplEntry;
use crate::codec::h266::slice::Slice;
use crate::codec::h266::slice::SliceType;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DummyBuffer {
    pub borders_extended: u32,
    pub hash_map_cleared: u32,
}

impl PictureBuffer for DummyBuffer {
    fn extend_border(&mut self) {
        self.borders_extended += 1;
    }

    fn clear_hash_map(&mut self) {
        self.hash_map_cleared += 1;
    }
}

/// A reconstructed, referenced trailing picture of layer 0.
pub fn pic(poc: i32) -> PictureData {
    let mut pic = PictureData::default();
    pic.poc = poc;
    pic.reconstructed = true;
    pic.set_referenced(true);
    pic
}

pub fn rpl(entries: Vec<RplEntry>) -> Rc<ReferencePictureList> {
    Rc::new(ReferencePictureList::new(entries).unwrap())
}

/// Short-term list with one entry per delta POC.
pub fn st_rpl(deltas: &[i32]) -> Rc<ReferencePictureList> {
    rpl(deltas.iter().map(|&d| RplEntry::short_term(d)).collect())
}

/// A slice of layer 0 using `rpl0`/`rpl1` with every entry active.
pub fn slice(
    poc: i32,
    nalu_type: NaluType,
    rpl0: Rc<ReferencePictureList>,
    rpl1: Rc<ReferencePictureList>,
) -> Slice {
    let slice_type = if rpl1.num_entries() > 0 {
        SliceType::B
    } else if rpl0.num_entries() > 0 {
        SliceType::P
    } else {
        SliceType::I
    };

    Slice {
        poc,
        nalu_type,
        slice_type,
        num_ref_idx: [rpl0.num_active(), rpl1.num_active()],
        rpl: [rpl0, rpl1],
        ..Default::default()
    }
}

pub fn sps(bits_for_poc: u32) -> Sps {
    Sps {
        log2_max_pic_order_cnt_lsb_minus4: (bits_for_poc - 4) as u8,
        ..Default::default()
    }
}
