// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! H.266 syntax structures consumed by the reference picture machinery.
//!
//! Parameter sets, picture headers and reference picture lists are filled by
//! the bitstream parser and handed over as-is. Only the two-byte NAL unit
//! header is read here.

use std::rc::Rc;

use anyhow::anyhow;
use bitreader::BitReader;
use enumn::N;

use crate::codec::h266::rpl::ReferencePictureList;

// Given the max VPS id.
pub const MAX_VPS_COUNT: usize = 16;
// Given the max DPS id.
pub const MAX_DPS_COUNT: usize = 16;
// Given the max SPS id.
pub const MAX_SPS_COUNT: usize = 16;
// Given the max PPS id.
pub const MAX_PPS_COUNT: usize = 64;
// Number of APS ids available for each APS type.
pub const MAX_NUM_APS: usize = 32;
// Size of the APS type space. Only three types are defined so far.
pub const MAX_NUM_APS_TYPE: usize = 8;
// 7.4.3.3
pub const MAX_VPS_LAYERS: usize = 64;
// Maximum number of ALF APSs a picture can refer to for luma.
pub const MAX_NUM_ALF_APS_IDS: usize = 8;
// 7.4.3.4, sps_log2_max_pic_order_cnt_lsb_minus4 is in 0..=12.
pub const MAX_LOG2_MAX_PIC_ORDER_CNT_LSB_MINUS4: u8 = 12;

/// Table 5 – NAL unit type codes and NAL unit type classes
#[derive(N, Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum NaluType {
    #[default]
    TrailNut = 0,
    StsaNut = 1,
    RadlNut = 2,
    RaslNut = 3,
    RsvVcl4 = 4,
    RsvVcl5 = 5,
    RsvVcl6 = 6,
    IdrWRadl = 7,
    IdrNLp = 8,
    CraNut = 9,
    GdrNut = 10,
    RsvIrap11 = 11,
    RsvVcl12 = 12,
    DpsNut = 13,
    VpsNut = 14,
    SpsNut = 15,
    PpsNut = 16,
    PrefixApsNut = 17,
    SuffixApsNut = 18,
    PhNut = 19,
    AudNut = 20,
    EosNut = 21,
    EobNut = 22,
    PrefixSeiNut = 23,
    SuffixSeiNut = 24,
    FdNut = 25,
    RsvNvcl26 = 26,
    RsvNvcl27 = 27,
    Unspec28 = 28,
    Unspec29 = 29,
    Unspec30 = 30,
    Unspec31 = 31,
}

/// The IRAP flavours a picture can be.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IrapType {
    IdrWRadl,
    IdrNLp,
    Cra,
    Reserved,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LeadingType {
    Rasl,
    Radl,
}

/// Coarse classification of a NAL unit, used by the marking and conformance
/// code instead of comparing raw type ranges.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PictureCategory {
    Irap(IrapType),
    Leading(LeadingType),
    Trailing,
    Stsa,
    /// GDR pictures, reserved VCL types and every non-VCL unit.
    Other,
}

impl NaluType {
    pub fn category(&self) -> PictureCategory {
        match self {
            Self::IdrWRadl => PictureCategory::Irap(IrapType::IdrWRadl),
            Self::IdrNLp => PictureCategory::Irap(IrapType::IdrNLp),
            Self::CraNut => PictureCategory::Irap(IrapType::Cra),
            Self::RsvIrap11 => PictureCategory::Irap(IrapType::Reserved),
            Self::RaslNut => PictureCategory::Leading(LeadingType::Rasl),
            Self::RadlNut => PictureCategory::Leading(LeadingType::Radl),
            Self::TrailNut => PictureCategory::Trailing,
            Self::StsaNut => PictureCategory::Stsa,
            _ => PictureCategory::Other,
        }
    }

    /// Whether this is an IDR NALU.
    pub fn is_idr(&self) -> bool {
        matches!(self, Self::IdrWRadl | Self::IdrNLp)
    }

    /// Whether this is an IRAP NALU.
    pub fn is_irap(&self) -> bool {
        matches!(self.category(), PictureCategory::Irap(_))
    }

    /// Whether this is a CRA NALU.
    pub fn is_cra(&self) -> bool {
        matches!(self, Self::CraNut)
    }

    /// Whether this is a RADL NALU.
    pub fn is_radl(&self) -> bool {
        matches!(self, Self::RadlNut)
    }

    /// Whether this is a RASL NALU.
    pub fn is_rasl(&self) -> bool {
        matches!(self, Self::RaslNut)
    }

    /// Whether this is a RASL or RADL NALU.
    pub fn is_leading(&self) -> bool {
        matches!(self.category(), PictureCategory::Leading(_))
    }

    pub fn is_stsa(&self) -> bool {
        matches!(self, Self::StsaNut)
    }

    pub fn is_gdr(&self) -> bool {
        matches!(self, Self::GdrNut)
    }

    /// Whether this NALU carries coded slice data.
    pub fn is_vcl(&self) -> bool {
        *self <= Self::RsvVcl12
    }
}

/// The two-byte NAL unit header. See 7.3.1.2.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NaluHeader {
    type_: NaluType,
    /// Identifier of the layer the NAL unit belongs to.
    nuh_layer_id: u8,
    /// Minus 1 gives the temporal identifier. Never 0.
    nuh_temporal_id_plus1: u8,
}

impl NaluHeader {
    pub fn parse(data: &[u8]) -> anyhow::Result<Self> {
        let data = data
            .get(0..2)
            .ok_or(anyhow!("NAL unit header needs 2 bytes, got {}", data.len()))?;
        let mut r = BitReader::new(data);

        if r.read_bool()? {
            return Err(anyhow!("forbidden_zero_bit is set"));
        }

        // nuh_reserved_zero_bit
        r.skip(1)?;

        let nuh_layer_id = r.read_u8(6)?;
        let type_ = NaluType::n(r.read_u8(5)?).ok_or(anyhow!("Invalid NALU type"))?;
        let nuh_temporal_id_plus1 = r.read_u8(3)?;

        if nuh_temporal_id_plus1 == 0 {
            return Err(anyhow!("nuh_temporal_id_plus1 shall not be 0"));
        }

        Ok(Self {
            type_,
            nuh_layer_id,
            nuh_temporal_id_plus1,
        })
    }

    pub fn type_(&self) -> NaluType {
        self.type_
    }

    pub fn layer_id(&self) -> u8 {
        self.nuh_layer_id
    }

    pub fn temporal_id(&self) -> u8 {
        self.nuh_temporal_id_plus1 - 1
    }

    /// Whether this header terminates a coded video sequence or bitstream.
    pub fn is_end(&self) -> bool {
        matches!(self.type_, NaluType::EosNut | NaluType::EobNut)
    }
}

/// Video parameter set. Only the layer topology is of interest here.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Vps {
    pub video_parameter_set_id: u8,
    pub max_layers_minus1: u8,
    pub max_sub_layers_minus1: u8,
    /// nuh_layer_id of each layer, indexed by general layer index.
    pub layer_id: Vec<u8>,
    pub independent_layer_flag: Vec<bool>,
    /// `direct_ref_layer_flag[i][j]`: layer `j` is a direct reference of
    /// layer `i`.
    pub direct_ref_layer_flag: Vec<Vec<bool>>,
}

impl Default for Vps {
    /// A single-layer VPS, standing in for bitstreams that signal VPS id 0.
    fn default() -> Self {
        Self {
            video_parameter_set_id: 0,
            max_layers_minus1: 0,
            max_sub_layers_minus1: 6,
            layer_id: vec![0],
            independent_layer_flag: vec![true],
            direct_ref_layer_flag: vec![vec![false]],
        }
    }
}

impl Vps {
    /// GeneralLayerIdx[] for `layer_id`.
    pub fn general_layer_idx(&self, layer_id: u8) -> Option<usize> {
        self.layer_id.iter().position(|&id| id == layer_id)
    }

    /// Index of the `ref_idx`-th direct reference layer of layer
    /// `layer_idx`. See equation (35).
    pub fn direct_ref_layer_idx(&self, layer_idx: usize, ref_idx: usize) -> Option<usize> {
        self.direct_ref_layer_flag
            .get(layer_idx)?
            .iter()
            .enumerate()
            .filter(|&(_, &is_ref)| is_ref)
            .map(|(j, _)| j)
            .nth(ref_idx)
    }

    /// The nuh_layer_id of the layer referenced by the inter-layer entry
    /// `ilrp_idx` of a picture in layer `layer_id`.
    pub fn inter_layer_ref_layer_id(&self, layer_id: u8, ilrp_idx: usize) -> Option<u8> {
        let layer_idx = self.general_layer_idx(layer_id)?;
        let ref_layer_idx = self.direct_ref_layer_idx(layer_idx, ilrp_idx)?;
        self.layer_id.get(ref_layer_idx).copied()
    }
}

/// Decoding parameter set.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Dps {
    pub decoding_parameter_set_id: u8,
    pub max_sub_layers_minus1: u8,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Sps {
    pub seq_parameter_set_id: u8,
    pub video_parameter_set_id: u8,
    /// 0 means no DPS is referenced.
    pub decoding_parameter_set_id: u8,
    pub max_sub_layers_minus1: u8,
    pub log2_max_pic_order_cnt_lsb_minus4: u8,
    pub bit_depth_luma_minus8: u8,
    pub bit_depth_chroma_minus8: u8,
    pub field_seq_flag: bool,
    pub long_term_ref_pics_flag: bool,
    pub inter_layer_ref_pics_present_flag: bool,
    pub idr_rpl_present_flag: bool,
    pub rpl1_same_as_rpl0_flag: bool,
    /// The ref_pic_list_struct()s carried by the SPS, for lists 0 and 1.
    pub ref_pic_lists: [Vec<Rc<ReferencePictureList>>; 2],
    pub temporal_mvp_enabled_flag: bool,
    pub ibc_enabled_flag: bool,
    pub sao_enabled_flag: bool,
    pub alf_enabled_flag: bool,
    pub ccalf_enabled_flag: bool,
    pub lmcs_enabled_flag: bool,
    pub scaling_list_enabled_flag: bool,
}

impl Sps {
    /// Number of bits of the POC LSB, i.e. the POC wraparound width.
    pub fn bits_for_poc(&self) -> u32 {
        u32::from(self.log2_max_pic_order_cnt_lsb_minus4) + 4
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Pps {
    pub pic_parameter_set_id: u8,
    pub seq_parameter_set_id: u8,
    pub pic_width_in_luma_samples: u32,
    pub pic_height_in_luma_samples: u32,
    pub num_ref_idx_default_active_minus1: [u8; 2],
    pub rpl1_idx_present_flag: bool,
}

/// The APS flavours. See Table 6.
#[derive(N, Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ApsType {
    #[default]
    Alf = 0,
    Lmcs = 1,
    ScalingList = 2,
}

/// Adaptation parameter set. Its payload is used by the filtering and
/// scaling stages and is not looked at here.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Aps {
    pub adaptation_parameter_set_id: u8,
    pub aps_params_type: ApsType,
    pub chroma_present_flag: bool,
    pub payload: Vec<u8>,
}

impl Aps {
    /// Key of this APS in the (id, type) space.
    pub fn key(&self) -> u32 {
        aps_key(self.adaptation_parameter_set_id, self.aps_params_type)
    }
}

pub(crate) fn aps_key(aps_id: u8, aps_type: ApsType) -> u32 {
    u32::from(aps_id) + MAX_NUM_APS as u32 * aps_type as u32
}

/// Picture header fields that slices inherit. See 7.3.2.7.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PicHeader {
    pub pic_parameter_set_id: u8,
    pub gdr_or_irap_pic_flag: bool,
    pub non_reference_picture_flag: bool,
    pub pic_output_flag: bool,
    pub no_output_of_prior_pics_flag: bool,
    /// The reference picture lists are signalled in the picture header and
    /// shared by all its slices. Otherwise every slice header carries its
    /// own and `rpl_idx` and `local_rpl` are not used.
    pub pic_rpl_present_flag: bool,
    /// SPS list used by each direction, or `None` when the list is
    /// signalled in the header itself.
    pub rpl_idx: [Option<usize>; 2],
    /// Header-local lists. When `rpl_idx` points into the SPS these still
    /// carry the long-term MSB information of the picture.
    pub local_rpl: [Rc<ReferencePictureList>; 2],

    pub deblocking_filter_disabled_flag: bool,
    pub luma_beta_offset_div2: i8,
    pub luma_tc_offset_div2: i8,
    pub cb_beta_offset_div2: i8,
    pub cb_tc_offset_div2: i8,
    pub cr_beta_offset_div2: i8,
    pub cr_tc_offset_div2: i8,

    pub sao_luma_enabled_flag: bool,
    pub sao_chroma_enabled_flag: bool,

    pub alf_enabled_flag: bool,
    pub alf_cb_enabled_flag: bool,
    pub alf_cr_enabled_flag: bool,
    pub alf_aps_id_luma: Vec<u8>,
    pub alf_aps_id_chroma: u8,
    pub alf_cc_cb_enabled_flag: bool,
    pub alf_cc_cb_aps_id: u8,
    pub alf_cc_cr_enabled_flag: bool,
    pub alf_cc_cr_aps_id: u8,

    pub lmcs_enabled_flag: bool,
    pub lmcs_aps_id: u8,
    pub explicit_scaling_list_enabled_flag: bool,
    pub scaling_list_aps_id: u8,
}
