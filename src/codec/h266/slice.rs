// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::rc::Rc;

use anyhow::anyhow;
use enumn::N;

use crate::codec::h266::dpb::PicHandle;
use crate::codec::h266::parser::NaluType;
use crate::codec::h266::parser::PicHeader;
use crate::codec::h266::parser::PictureCategory;
use crate::codec::h266::parser::Sps;
use crate::codec::h266::parser::MAX_NUM_ALF_APS_IDS;
use crate::codec::h266::rpl::ReferencePictureList;
use crate::codec::h266::rpl::RplEntryKind;

/// Maximum number of active references per direction.
pub const MAX_NUM_REF: usize = 16;

#[derive(N, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum SliceType {
    B = 0,
    P = 1,
    #[default]
    I = 2,
}

/// In-loop filter and scaling state of a slice, copied from its picture
/// header. Disabled when a required APS is not available.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SliceTools {
    pub deblocking_filter_disabled_flag: bool,
    /// Luma, Cb and Cr.
    pub beta_offset_div2: [i8; 3],
    pub tc_offset_div2: [i8; 3],
    pub sao_luma_enabled_flag: bool,
    pub sao_chroma_enabled_flag: bool,
    /// Luma, Cb and Cr.
    pub alf_enabled_flag: [bool; 3],
    pub alf_aps_ids_luma: Vec<u8>,
    pub alf_aps_id_chroma: u8,
    /// Cb and Cr.
    pub ccalf_enabled_flag: [bool; 2],
    pub ccalf_aps_id: [u8; 2],
    pub lmcs_enabled_flag: bool,
    pub lmcs_aps_id: u8,
    pub explicit_scaling_list_enabled_flag: bool,
    pub scaling_list_aps_id: u8,
}

/// A slice, as handed over by the parser, plus the reference state resolved
/// for it.
#[derive(Clone, Debug, Default)]
pub struct Slice {
    // Fields filled by the parser.
    pub poc: i32,
    pub nalu_type: NaluType,
    pub slice_type: SliceType,
    pub temporal_id: u8,
    pub layer_id: u8,
    pub pic_parameter_set_id: u8,
    pub associated_irap_poc: i32,
    pub associated_irap_type: Option<NaluType>,
    /// POC of the last IDR picture.
    pub last_idr: i32,
    pub rpl: [Rc<ReferencePictureList>; 2],
    /// Index of the SPS list in use, `None` for a slice-local list.
    pub rpl_idx: [Option<usize>; 2],
    pub num_ref_idx: [usize; 2],
    pub col_from_l0_flag: bool,
    pub col_ref_idx: usize,
    pub pic_output_flag: bool,
    pub no_output_of_prior_pics_flag: bool,
    pub tools: SliceTools,

    // DRAP state.
    pub enable_drap_sei: bool,
    pub is_drap: bool,
    pub use_lt_for_drap: bool,
    pub cvs_has_previous_drap: bool,
    pub latest_drap_poc: Option<i32>,

    // Reference state, filled by `construct_ref_pic_list`.
    pub(crate) ref_pic_list: [[Option<PicHandle>; MAX_NUM_REF]; 2],
    pub(crate) is_used_as_long_term: [[bool; MAX_NUM_REF]; 2],
    pub(crate) ref_poc_list: [[i32; MAX_NUM_REF]; 2],
    pub(crate) list1_idx_to_list0_idx: [Option<usize>; MAX_NUM_REF],
}

impl Slice {
    /// Resets the per-slice reference and DRAP state.
    pub fn init_slice(&mut self) {
        self.clear_ref_pic_lists();
        self.num_ref_idx = [0; 2];
        self.col_from_l0_flag = true;
        self.col_ref_idx = 0;
        self.is_drap = false;
        self.use_lt_for_drap = false;
        self.cvs_has_previous_drap = false;
        self.latest_drap_poc = None;
    }

    pub(crate) fn clear_ref_pic_lists(&mut self) {
        self.ref_pic_list = Default::default();
        self.is_used_as_long_term = Default::default();
        self.ref_poc_list = Default::default();
        self.list1_idx_to_list0_idx = Default::default();
    }

    /// Copies the picture level parameters of `ph` into the slice.
    ///
    /// The reference picture lists are only taken from `ph` when it carries
    /// them, otherwise the lists of the slice header are kept. Lists
    /// selected from the SPS keep the long-term MSB information found in the
    /// picture header.
    pub fn inherit_from_pic_header(&mut self, ph: &PicHeader, sps: &Sps) -> anyhow::Result<()> {
        if ph.pic_rpl_present_flag {
            for dir in 0..2 {
                self.rpl_idx[dir] = ph.rpl_idx[dir];
                self.rpl[dir] = match ph.rpl_idx[dir] {
                    Some(idx) => {
                        let sps_rpl = sps.ref_pic_lists[dir].get(idx).ok_or(anyhow!(
                            "picture header selects list {} of direction {}, the SPS has {}",
                            idx,
                            dir,
                            sps.ref_pic_lists[dir].len()
                        ))?;
                        Rc::new(sps_rpl.with_lt_msb_from(&ph.local_rpl[dir]))
                    }
                    None => Rc::clone(&ph.local_rpl[dir]),
                };
            }
        }

        if ph.alf_aps_id_luma.len() > MAX_NUM_ALF_APS_IDS {
            return Err(anyhow!(
                "{} luma ALF APSs referenced, at most {} allowed",
                ph.alf_aps_id_luma.len(),
                MAX_NUM_ALF_APS_IDS
            ));
        }

        self.pic_parameter_set_id = ph.pic_parameter_set_id;
        self.pic_output_flag = ph.pic_output_flag;
        self.no_output_of_prior_pics_flag = ph.no_output_of_prior_pics_flag;

        self.tools = SliceTools {
            deblocking_filter_disabled_flag: ph.deblocking_filter_disabled_flag,
            beta_offset_div2: [
                ph.luma_beta_offset_div2,
                ph.cb_beta_offset_div2,
                ph.cr_beta_offset_div2,
            ],
            tc_offset_div2: [
                ph.luma_tc_offset_div2,
                ph.cb_tc_offset_div2,
                ph.cr_tc_offset_div2,
            ],
            sao_luma_enabled_flag: ph.sao_luma_enabled_flag,
            sao_chroma_enabled_flag: ph.sao_chroma_enabled_flag,
            alf_enabled_flag: [
                ph.alf_enabled_flag,
                ph.alf_enabled_flag && ph.alf_cb_enabled_flag,
                ph.alf_enabled_flag && ph.alf_cr_enabled_flag,
            ],
            alf_aps_ids_luma: ph.alf_aps_id_luma.clone(),
            alf_aps_id_chroma: ph.alf_aps_id_chroma,
            ccalf_enabled_flag: [
                ph.alf_enabled_flag && ph.alf_cc_cb_enabled_flag,
                ph.alf_enabled_flag && ph.alf_cc_cr_enabled_flag,
            ],
            ccalf_aps_id: [ph.alf_cc_cb_aps_id, ph.alf_cc_cr_aps_id],
            lmcs_enabled_flag: ph.lmcs_enabled_flag,
            lmcs_aps_id: ph.lmcs_aps_id,
            explicit_scaling_list_enabled_flag: ph.explicit_scaling_list_enabled_flag,
            scaling_list_aps_id: ph.scaling_list_aps_id,
        };

        log::debug!(
            "Slice POC {}: L0 {} L1 {}",
            self.poc,
            self.rpl[0],
            self.rpl[1]
        );

        Ok(())
    }

    pub fn category(&self) -> PictureCategory {
        self.nalu_type.category()
    }

    pub fn is_intra(&self) -> bool {
        self.slice_type == SliceType::I
    }

    pub fn is_irap(&self) -> bool {
        self.nalu_type.is_irap()
    }

    pub fn is_idr(&self) -> bool {
        self.nalu_type.is_idr()
    }

    /// The resolved reference `idx` of list `dir`.
    pub fn ref_pic(&self, dir: usize, idx: usize) -> Option<PicHandle> {
        *self.ref_pic_list.get(dir)?.get(idx)?
    }

    /// The active part of list `dir`. Empty for an invalid direction.
    pub fn ref_pic_list(&self, dir: usize) -> &[Option<PicHandle>] {
        match (self.ref_pic_list.get(dir), self.num_ref_idx.get(dir)) {
            (Some(list), Some(&num_ref_idx)) => &list[..num_ref_idx.min(MAX_NUM_REF)],
            _ => &[],
        }
    }

    pub fn is_used_as_long_term(&self, dir: usize, idx: usize) -> Option<bool> {
        self.is_used_as_long_term.get(dir)?.get(idx).copied()
    }

    pub fn ref_poc(&self, dir: usize, idx: usize) -> Option<i32> {
        self.ref_poc_list.get(dir)?.get(idx).copied()
    }

    /// The list 0 index holding the same picture as list 1 entry `idx`.
    pub fn list1_idx_to_list0_idx(&self, idx: usize) -> Option<usize> {
        *self.list1_idx_to_list0_idx.get(idx)?
    }

    /// Whether some entry of `rpl` designates POC `poc`.
    pub fn is_poc_in_ref_pic_list(&self, rpl: &ReferencePictureList, poc: i32) -> bool {
        rpl.entries().iter().any(|entry| match entry.kind {
            RplEntryKind::InterLayer { .. } => poc == self.poc,
            RplEntryKind::LongTerm => poc == entry.ref_pic_identifier(),
            RplEntryKind::ShortTerm => poc == self.poc - entry.ref_pic_identifier(),
        })
    }
}
