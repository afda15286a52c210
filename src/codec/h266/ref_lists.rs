// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Construction of RefPicList[0] and RefPicList[1]. See 8.3.2.

use std::rc::Rc;

use thiserror::Error;

use crate::codec::h266::dpb::Dpb;
use crate::codec::h266::dpb::PictureBuffer;
use crate::codec::h266::parser::Sps;
use crate::codec::h266::parser::Vps;
use crate::codec::h266::picture::poc_mask;
use crate::codec::h266::rpl::RplEntry;
use crate::codec::h266::rpl::RplEntryKind;
use crate::codec::h266::slice::Slice;
use crate::codec::h266::slice::SliceType;
use crate::codec::h266::slice::MAX_NUM_REF;

#[derive(Debug, Error)]
pub enum RefPicListError {
    #[error("reference picture POC {poc} (layer {layer_id}) is not in the DPB")]
    MissingReference { poc: i32, layer_id: u8 },
    #[error("long-term entry {idx} of list {dir} designates a POC out of range")]
    LongTermPocOutOfRange { dir: usize, idx: usize },
    #[error("inter-layer entry {ilrp_idx} of layer {layer_id} has no reference layer in the VPS")]
    InvalidInterLayerRef { ilrp_idx: usize, layer_id: u8 },
    #[error("{num_ref_idx} active references in list {dir}, the list has {num_entries} entries")]
    TooManyActiveRefs {
        dir: usize,
        num_ref_idx: usize,
        num_entries: usize,
    },
}

/// The POC designated by the long-term entry `entry`, with the MSBs
/// included when the entry carries them. `None` if that POC does not fit in
/// an `i32`.
pub(crate) fn long_term_ref_poc(entry: &RplEntry, bits_for_poc: u32) -> Option<i32> {
    let mask = poc_mask(bits_for_poc);
    let lsb = entry.ref_pic_identifier() & mask;

    if entry.delta_poc_msb_present_flag {
        mask.checked_add(1)?
            .checked_mul(entry.delta_poc_msb_cycle_lt)?
            .checked_add(lsb)
    } else {
        Some(lsb)
    }
}

impl Slice {
    /// Resolves the entries of both reference picture lists against the DPB.
    ///
    /// Resolved pictures get their borders extended and their long-term flag
    /// updated. Fails if an entry designates a picture missing from the DPB.
    pub fn construct_ref_pic_list<T: PictureBuffer>(
        &mut self,
        dpb: &mut Dpb<T>,
        sps: &Sps,
        vps: &Vps,
    ) -> Result<(), RefPicListError> {
        self.clear_ref_pic_lists();

        if self.slice_type == SliceType::I {
            self.num_ref_idx = [0; 2];
            return Ok(());
        }

        let bits_for_poc = sps.bits_for_poc();

        for dir in 0..2 {
            let rpl = Rc::clone(&self.rpl[dir]);
            let num_ref_idx = self.num_ref_idx[dir];
            if num_ref_idx > rpl.num_entries() || num_ref_idx > MAX_NUM_REF {
                return Err(RefPicListError::TooManyActiveRefs {
                    dir,
                    num_ref_idx,
                    num_entries: rpl.num_entries(),
                });
            }

            for (idx, entry) in rpl.entries()[..num_ref_idx].iter().enumerate() {
                let (poc, layer_id, long_term, handle) = match entry.kind {
                    RplEntryKind::InterLayer { ilrp_idx } => {
                        let layer_id = vps
                            .inter_layer_ref_layer_id(self.layer_id, ilrp_idx)
                            .ok_or(RefPicListError::InvalidInterLayerRef {
                                ilrp_idx,
                                layer_id: self.layer_id,
                            })?;
                        let handle = dpb.find_ref_pic(self.poc, layer_id);
                        (self.poc, layer_id, true, handle)
                    }
                    RplEntryKind::ShortTerm => {
                        let poc = self.poc - entry.ref_pic_identifier();
                        let handle = dpb.find_ref_pic(poc, self.layer_id);
                        (poc, self.layer_id, false, handle)
                    }
                    RplEntryKind::LongTerm => {
                        let poc = long_term_ref_poc(entry, bits_for_poc)
                            .ok_or(RefPicListError::LongTermPocOutOfRange { dir, idx })?;
                        let handle = dpb.find_long_term_ref_pic(
                            poc,
                            entry.delta_poc_msb_present_flag,
                            self.layer_id,
                            self.poc,
                            bits_for_poc,
                        );
                        (poc, self.layer_id, true, handle)
                    }
                };

                let missing = RefPicListError::MissingReference { poc, layer_id };
                let Some(handle) = handle else {
                    return Err(missing);
                };
                let ref_entry = dpb.get_mut(handle).ok_or(missing)?;

                ref_entry.buffer.extend_border();
                ref_entry.pic.set_long_term(long_term);

                self.ref_pic_list[dir][idx] = Some(handle);
                self.is_used_as_long_term[dir][idx] = long_term;
            }
        }

        self.set_ref_poc_list(dpb);
        self.set_list1_idx_to_list0_idx();

        log::debug!(
            "Slice POC {}: RefPicList0 {:?} RefPicList1 {:?}",
            self.poc,
            &self.ref_poc_list[0][..self.num_ref_idx[0]],
            &self.ref_poc_list[1][..self.num_ref_idx[1]],
        );

        Ok(())
    }

    /// Mirrors the POC of every resolved reference.
    pub fn set_ref_poc_list<T>(&mut self, dpb: &Dpb<T>) {
        for dir in 0..2 {
            for idx in 0..self.num_ref_idx[dir].min(MAX_NUM_REF) {
                self.ref_poc_list[dir][idx] = self.ref_pic_list[dir][idx]
                    .and_then(|h| dpb.picture(h))
                    .map_or(0, |pic| pic.poc);
            }
        }
    }

    /// For each list 1 entry, finds the list 0 entry with the same POC.
    pub fn set_list1_idx_to_list0_idx(&mut self) {
        let num_l0 = self.num_ref_idx[0].min(MAX_NUM_REF);
        let num_l1 = self.num_ref_idx[1].min(MAX_NUM_REF);

        self.list1_idx_to_list0_idx = Default::default();
        for idx1 in 0..num_l1 {
            let poc = self.ref_poc_list[1][idx1];
            self.list1_idx_to_list0_idx[idx1] =
                self.ref_poc_list[0][..num_l0].iter().position(|&p| p == poc);
        }
    }

    /// POC of the collocated picture, if the slice has one.
    pub fn col_ref_poc(&self) -> Option<i32> {
        if self.is_intra() {
            return None;
        }

        let dir = if self.col_from_l0_flag { 0 } else { 1 };
        if self.col_ref_idx >= self.num_ref_idx[dir].min(MAX_NUM_REF) {
            return None;
        }

        Some(self.ref_poc_list[dir][self.col_ref_idx])
    }

    /// Checks that the collocated picture matches the one of the first inter
    /// slice among `earlier`, the previous slices of the same picture.
    ///
    /// A mismatch is a bitstream error that is only reported.
    pub fn check_col_ref_idx<'a, I>(&self, earlier: I) -> bool
    where
        I: IntoIterator<Item = &'a Slice>,
    {
        let Some(cur_poc) = self.col_ref_poc() else {
            return true;
        };

        match earlier.into_iter().find_map(|s| s.col_ref_poc()) {
            Some(prev_poc) if prev_poc != cur_poc => {
                log::warn!(
                    "Picture POC {}: collocated picture POC {} differs from POC {} used by an earlier slice",
                    self.poc,
                    cur_poc,
                    prev_poc
                );
                false
            }
            _ => true,
        }
    }

    /// Smallest POC distance between the slice and its active references.
    pub fn min_picture_distance(&self, sps: &Sps) -> u32 {
        if sps.ibc_enabled_flag {
            return 0;
        }

        if self.is_intra() {
            return u32::MAX;
        }

        let num_dirs = if self.slice_type == SliceType::B { 2 } else { 1 };
        (0..num_dirs)
            .flat_map(|dir| &self.ref_poc_list[dir][..self.num_ref_idx[dir].min(MAX_NUM_REF)])
            .map(|&poc| self.poc.abs_diff(poc))
            .min()
            .unwrap_or(u32::MAX)
    }
}
