// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Per-bitstream driver of the H.266 reference picture machinery.
//!
//! A [`RefPicSession`] owns the parameter sets, the DPB and the refresh
//! state of one bitstream, and runs the activation, marking, list
//! construction and conformance steps for every picture and slice in
//! decoding order.

use std::rc::Rc;

use anyhow::Context;
use thiserror::Error;

use crate::codec::h266::conformance::ConformanceError;
use crate::codec::h266::conformance::MissingRefPic;
use crate::codec::h266::dpb::Dpb;
use crate::codec::h266::dpb::DpbError;
use crate::codec::h266::dpb::PicHandle;
use crate::codec::h266::dpb::PictureBuffer;
use crate::codec::h266::dpb::MAX_DPB_SIZE;
use crate::codec::h266::marking::RefreshState;
use crate::codec::h266::parser::ApsType;
use crate::codec::h266::parser::NaluType;
use crate::codec::h266::parser::PicHeader;
use crate::codec::h266::parser::Sps;
use crate::codec::h266::picture::PictureData;
use crate::codec::h266::ps_manager::ParameterSetError;
use crate::codec::h266::ps_manager::ParameterSetManager;
use crate::codec::h266::ref_lists::RefPicListError;
use crate::codec::h266::slice::Slice;
use crate::codec::h266::slice::SliceTools;

/// Options of a [`RefPicSession`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    /// Defer the refresh of IDR pictures to the first picture following them
    /// in output order, so that the second field of an IDR can still use the
    /// pictures preceding it.
    pub efficient_field_irap_enabled: bool,
    /// Enforce the DRAP restrictions signalled through SEI.
    pub enable_drap_sei: bool,
    /// Number of pictures the DPB can hold.
    pub max_num_pics: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            efficient_field_irap_enabled: false,
            enable_drap_sei: false,
            max_num_pics: MAX_DPB_SIZE,
        }
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("no picture is being decoded")]
    NoCurrentPicture,
    #[error(transparent)]
    Dpb(#[from] DpbError),
    #[error(transparent)]
    ParameterSet(#[from] ParameterSetError),
    #[error(transparent)]
    RefPicList(#[from] RefPicListError),
    #[error(transparent)]
    Conformance(#[from] ConformanceError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Outcome of [`RefPicSession::handle_slice`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SliceStatus {
    /// The reference picture lists of the slice are resolved.
    Ready,
    /// A reference picture is missing. The slice cannot be decoded as is and
    /// the caller is expected to conceal the loss.
    MissingReference(MissingRefPic),
}

#[derive(Clone, Copy, Debug, Default)]
struct DrapState {
    cvs_has_previous_drap: bool,
    latest_drap_poc: Option<i32>,
}

struct CurrentPicState {
    handle: PicHandle,
    header: Rc<PicHeader>,
    sps: Rc<Sps>,
    is_drap: bool,
    /// Inter slices handled so far, for the collocated picture check.
    slices: Vec<Slice>,
}

pub struct RefPicSession<T: PictureBuffer> {
    config: SessionConfig,
    parameter_sets: ParameterSetManager,
    dpb: Dpb<T>,
    refresh_state: RefreshState,

    /// POC and type of the last IRAP picture in decoding order.
    associated_irap: Option<(i32, NaluType)>,
    /// POC of the last IDR picture.
    last_idr: i32,
    drap: DrapState,

    /// The picture currently being decoded, between `begin_picture` and
    /// `finish_picture`.
    current_pic: Option<CurrentPicState>,
}

impl<T: PictureBuffer> RefPicSession<T> {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            parameter_sets: Default::default(),
            dpb: Dpb::new(config.max_num_pics),
            refresh_state: Default::default(),
            associated_irap: None,
            last_idr: 0,
            drap: Default::default(),
            current_pic: None,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn parameter_sets(&self) -> &ParameterSetManager {
        &self.parameter_sets
    }

    /// Gives access to the parameter sets, so the parser can store the ones
    /// it receives.
    pub fn parameter_sets_mut(&mut self) -> &mut ParameterSetManager {
        &mut self.parameter_sets
    }

    pub fn dpb(&self) -> &Dpb<T> {
        &self.dpb
    }

    /// Gives access to the DPB, so the output process can remove pictures.
    pub fn dpb_mut(&mut self) -> &mut Dpb<T> {
        &mut self.dpb
    }

    pub fn refresh_state(&self) -> &RefreshState {
        &self.refresh_state
    }

    /// Handle of the picture being decoded.
    pub fn current_picture(&self) -> Option<PicHandle> {
        self.current_pic.as_ref().map(|cur| cur.handle)
    }

    /// Starts decoding the picture `slice` is the first slice of.
    ///
    /// Activates the parameter sets the picture refers to and adds the
    /// picture to the DPB, backed by `buffer`. A picture still in progress
    /// is finished first.
    pub fn begin_picture(
        &mut self,
        slice: &mut Slice,
        pic_header: &PicHeader,
        buffer: T,
    ) -> Result<PicHandle, DecodeError> {
        if let Some(cur) = &self.current_pic {
            log::debug!(
                "Picture POC {} begins while {:?} was not finished",
                slice.poc,
                cur.handle
            );
            self.finish_picture()?;
        }

        self.parameter_sets
            .activate_pps(pic_header.pic_parameter_set_id, slice.is_irap())?;
        let sps = Rc::clone(
            self.parameter_sets
                .active_sps()
                .context("no active SPS after PPS activation")?,
        );
        self.parameter_sets.clear_active_aps();

        if slice.is_irap() {
            self.associated_irap = Some((slice.poc, slice.nalu_type));
            self.drap = Default::default();
        }
        if slice.is_idr() {
            self.last_idr = slice.poc;
        }

        let header = Rc::new(pic_header.clone());
        self.prepare_slice(slice, &header, &sps)?;

        log::debug!(
            "Begin picture POC {} layer {} ({:?})",
            slice.poc,
            slice.layer_id,
            slice.nalu_type
        );

        let pic = PictureData::new_from_slice(slice, sps.bits_for_poc(), sps.field_seq_flag);
        let handle = self.dpb.store_picture(pic, buffer)?;

        self.current_pic = Some(CurrentPicState {
            handle,
            header,
            sps,
            is_drap: slice.is_drap,
            slices: vec![],
        });

        Ok(handle)
    }

    /// Processes a slice of the current picture: checks the references it
    /// declares, updates the marking of the DPB and resolves its reference
    /// picture lists.
    ///
    /// On error the current picture is removed from the DPB, so that it is
    /// neither used as a reference nor output.
    pub fn handle_slice(&mut self, slice: &mut Slice) -> Result<SliceStatus, DecodeError> {
        let (header, sps) = match &self.current_pic {
            Some(cur) => (Rc::clone(&cur.header), Rc::clone(&cur.sps)),
            None => return Err(DecodeError::NoCurrentPicture),
        };

        let res = self.process_slice(slice, &header, &sps);
        if let Err(e) = &res {
            log::error!("Picture POC {}: {}, dropping it", slice.poc, e);
            self.drop_current_picture();
        }

        res
    }

    fn process_slice(
        &mut self,
        slice: &mut Slice,
        header: &PicHeader,
        sps: &Sps,
    ) -> Result<SliceStatus, DecodeError> {
        self.prepare_slice(slice, header, sps)?;

        let vps = self
            .parameter_sets
            .active_vps()
            .cloned()
            .unwrap_or_default();
        let bits_for_poc = sps.bits_for_poc();
        let rpl0 = Rc::clone(&slice.rpl[0]);
        let rpl1 = Rc::clone(&slice.rpl[1]);

        slice.check_cra(
            &rpl0,
            &rpl1,
            &mut self.refresh_state,
            &self.dpb,
            bits_for_poc,
        )?;
        slice.decoding_refresh_marking(
            &mut self.refresh_state,
            &mut self.dpb,
            self.config.efficient_field_irap_enabled,
        );

        for rpl in [&rpl0, &rpl1] {
            if let Some(missing) = slice.check_that_all_ref_pics_are_available(&mut self.dpb, rpl) {
                return Ok(SliceStatus::MissingReference(missing));
            }
        }

        slice.check_leading_picture_restrictions(&self.dpb)?;
        slice.apply_reference_picture_list_based_marking(&mut self.dpb, &rpl0, &rpl1, &vps)?;
        slice.construct_ref_pic_list(&mut self.dpb, sps, &vps)?;
        slice.check_stsa(&mut self.dpb)?;
        slice.check_conformance_for_drap();

        if sps.temporal_mvp_enabled_flag && !slice.is_intra() {
            if let Some(cur) = self.current_pic.as_mut() {
                slice.check_col_ref_idx(&cur.slices);
                cur.slices.push(slice.clone());
            }
        }

        Ok(SliceStatus::Ready)
    }

    /// Fills the picture level state of `slice`: picture header fields,
    /// associated IRAP and DRAP tracking. Tools whose APS is missing are
    /// turned off.
    fn prepare_slice(
        &mut self,
        slice: &mut Slice,
        header: &PicHeader,
        sps: &Sps,
    ) -> Result<(), DecodeError> {
        slice.inherit_from_pic_header(header, sps)?;

        if let Some((poc, nalu_type)) = self.associated_irap {
            slice.associated_irap_poc = poc;
            slice.associated_irap_type = Some(nalu_type);
        }
        slice.last_idr = self.last_idr;

        slice.enable_drap_sei = self.config.enable_drap_sei;
        slice.cvs_has_previous_drap =
            self.config.enable_drap_sei && self.drap.cvs_has_previous_drap;
        slice.latest_drap_poc = self.drap.latest_drap_poc;

        restrict_tools(&mut self.parameter_sets, sps, &mut slice.tools);

        Ok(())
    }

    /// Marks the current picture as reconstructed and returns its handle.
    pub fn finish_picture(&mut self) -> Result<PicHandle, DecodeError> {
        let cur = self
            .current_pic
            .take()
            .ok_or(DecodeError::NoCurrentPicture)?;
        let pic = self
            .dpb
            .picture_mut(cur.handle)
            .ok_or(DpbError::StaleHandle(cur.handle))?;

        pic.reconstructed = true;

        if self.config.enable_drap_sei && cur.is_drap {
            self.drap = DrapState {
                cvs_has_previous_drap: true,
                latest_drap_poc: Some(pic.poc),
            };
        }

        log::debug!("Finished picture POC {}", pic.poc);

        Ok(cur.handle)
    }

    /// Resets the state carried between the pictures of a coded video
    /// sequence.
    pub fn end_of_sequence(&mut self) {
        log::debug!("End of sequence");

        self.refresh_state.reset();
        self.associated_irap = None;
        self.last_idr = 0;
        self.drap = Default::default();
    }

    fn drop_current_picture(&mut self) {
        if let Some(cur) = self.current_pic.take() {
            if let Err(e) = self.dpb.remove(cur.handle) {
                log::warn!("Could not drop the current picture: {}", e);
            }
        }
    }
}

/// Turns off the tools of `tools` that the SPS disables or whose APS has not
/// been received, activating the APSs of the others.
fn restrict_tools(psm: &mut ParameterSetManager, sps: &Sps, tools: &mut SliceTools) {
    if !sps.sao_enabled_flag {
        tools.sao_luma_enabled_flag = false;
        tools.sao_chroma_enabled_flag = false;
    }

    if tools.alf_enabled_flag[0]
        && !(sps.alf_enabled_flag
            && tools
                .alf_aps_ids_luma
                .iter()
                .all(|&id| psm.activate_aps(id, ApsType::Alf)))
    {
        tools.alf_enabled_flag = [false; 3];
    }

    if (tools.alf_enabled_flag[1] || tools.alf_enabled_flag[2])
        && !psm.activate_aps(tools.alf_aps_id_chroma, ApsType::Alf)
    {
        tools.alf_enabled_flag[1] = false;
        tools.alf_enabled_flag[2] = false;
    }

    for (enabled, &aps_id) in tools.ccalf_enabled_flag.iter_mut().zip(&tools.ccalf_aps_id) {
        *enabled &= tools.alf_enabled_flag[0]
            && sps.ccalf_enabled_flag
            && psm.activate_aps(aps_id, ApsType::Alf);
    }

    if tools.lmcs_enabled_flag
        && !(sps.lmcs_enabled_flag && psm.activate_aps(tools.lmcs_aps_id, ApsType::Lmcs))
    {
        tools.lmcs_enabled_flag = false;
    }

    if tools.explicit_scaling_list_enabled_flag
        && !(sps.scaling_list_enabled_flag
            && psm.activate_aps(tools.scaling_list_aps_id, ApsType::ScalingList))
    {
        tools.explicit_scaling_list_enabled_flag = false;
    }
}
