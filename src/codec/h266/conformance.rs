// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Bitstream conformance checks on the reference structure of a slice.
//!
//! Violations of the leading picture, CRA and STSA rules make the picture
//! undecodable and are reported as [`ConformanceError`]s. Missing reference
//! pictures are reported as [`MissingRefPic`] so that the caller can conceal
//! them. DRAP rule violations are only logged.

use thiserror::Error;

use crate::codec::h266::dpb::Dpb;
use crate::codec::h266::marking::RefreshState;
use crate::codec::h266::parser::IrapType;
use crate::codec::h266::parser::LeadingType;
use crate::codec::h266::parser::NaluType;
use crate::codec::h266::parser::PictureCategory;
use crate::codec::h266::picture::poc_mask;
use crate::codec::h266::picture::PictureData;
use crate::codec::h266::ref_lists::long_term_ref_poc;
use crate::codec::h266::rpl::ReferencePictureList;
use crate::codec::h266::rpl::RplEntryKind;
use crate::codec::h266::slice::Slice;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConformanceError {
    #[error("POC {poc} precedes its IRAP POC {irap_poc} in output order but is not RASL or RADL")]
    LeadingPictureNotLeadingType { poc: i32, irap_poc: i32 },
    #[error("POC {poc} follows its IRAP POC {irap_poc} in output order but is RASL or RADL")]
    TrailingPictureIsLeadingType { poc: i32, irap_poc: i32 },
    #[error("RASL POC {poc} is associated with an IDR picture")]
    RaslAssociatedWithIdr { poc: i32 },
    #[error("RADL POC {poc} is associated with an IDR_N_LP picture")]
    RadlAssociatedWithIdrNLp { poc: i32 },
    #[error("POC {prev_poc} precedes IRAP POC {poc} in decoding order but not in output order")]
    IrapOutputOrder { poc: i32, prev_poc: i32 },
    #[error("POC {prev_poc} precedes the IRAP of RADL POC {poc} in decoding order but not in output order")]
    RadlOutputOrder { poc: i32, prev_poc: i32 },
    #[error("leading POC {poc} follows trailing POC {prev_poc} of the same IRAP in decoding order")]
    LeadingAfterTrailing { poc: i32, prev_poc: i32 },
    #[error("RASL POC {poc} follows RADL POC {prev_poc} of the same CRA in output order")]
    RaslAfterRadl { poc: i32, prev_poc: i32 },
    #[error("RASL POC {poc} precedes IRAP POC {prev_poc} in output order, which precedes its CRA in decoding order")]
    RaslBeforePrecedingIrap { poc: i32, prev_poc: i32 },
    #[error("POC {poc} references POC {ref_poc}, which precedes CRA POC {cra_poc}")]
    ReferenceBeforeCra { poc: i32, ref_poc: i32, cra_poc: i32 },
    #[error("STSA POC {poc} references POC {ref_poc} of its own temporal sublayer {temporal_id}")]
    StsaSameSublayerReference {
        poc: i32,
        ref_poc: i32,
        temporal_id: u8,
    },
    #[error("POC {poc} references POC {ref_poc}, which precedes an STSA picture of its sublayer")]
    StsaRestrictedReference { poc: i32, ref_poc: i32 },
    #[error("POC {poc} (temporal id {temporal_id}) uses POC {ref_poc} (temporal id {ref_temporal_id})")]
    HigherTemporalLayerReference {
        poc: i32,
        ref_poc: i32,
        temporal_id: u8,
        ref_temporal_id: u8,
    },
}

/// A reference picture that could not be found in the DPB.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MissingRefPic {
    /// POC of the missing picture. Only the LSBs are known for long-term
    /// entries.
    pub poc: i32,
    /// Index of the offending entry in its list.
    pub index: usize,
}

/// A DRAP rule broken by the current picture.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrapViolation {
    /// DRAP pictures are TRAIL or STSA pictures.
    NotTrailing,
    /// DRAP pictures belong to temporal sublayer 0.
    NonZeroTemporalId,
    /// A DRAP picture only references its IRAP.
    DrapReferencesNonIrap { ref_poc: i32 },
    /// Pictures following a DRAP don't reference anything before it, except
    /// its IRAP.
    ReferencesBeforeDrap { ref_poc: i32 },
}

fn is_idr_or_cra(category: PictureCategory) -> bool {
    matches!(
        category,
        PictureCategory::Irap(IrapType::IdrWRadl | IrapType::IdrNLp | IrapType::Cra)
    )
}

impl Slice {
    /// Checks the ordering rules between leading, trailing and IRAP
    /// pictures, against every reconstructed picture of the DPB.
    pub fn check_leading_picture_restrictions<T>(
        &self,
        dpb: &Dpb<T>,
    ) -> Result<(), ConformanceError> {
        let poc = self.poc;
        let irap_poc = self.associated_irap_poc;
        let category = self.category();
        let is_leading = matches!(category, PictureCategory::Leading(_));
        let is_rasl = category == PictureCategory::Leading(LeadingType::Rasl);
        let is_radl = category == PictureCategory::Leading(LeadingType::Radl);
        let after_cra = self.associated_irap_type == Some(NaluType::CraNut);

        // IRAPs may have a POC lower than the one they are associated with.
        if irap_poc > poc && !is_leading && !is_idr_or_cra(category) {
            return Err(ConformanceError::LeadingPictureNotLeadingType { poc, irap_poc });
        }

        if irap_poc < poc && is_leading {
            return Err(ConformanceError::TrailingPictureIsLeadingType { poc, irap_poc });
        }

        if is_rasl && self.associated_irap_type.map_or(false, |t| t.is_idr()) {
            return Err(ConformanceError::RaslAssociatedWithIdr { poc });
        }

        if is_radl && self.associated_irap_type == Some(NaluType::IdrNLp) {
            return Err(ConformanceError::RadlAssociatedWithIdrNLp { poc });
        }

        let mut num_leading_pics_found = 0;
        for pic in dpb.pictures() {
            if !pic.reconstructed || pic.poc == poc {
                continue;
            }

            let prev_poc = pic.poc;

            if pic.pic_output_flag
                && !self.no_output_of_prior_pics_flag
                && is_idr_or_cra(category)
                && prev_poc >= poc
            {
                return Err(ConformanceError::IrapOutputOrder { poc, prev_poc });
            }

            // `pic` precedes the IRAP of the current picture in decoding order
            // and is not that IRAP.
            if pic.pic_output_flag
                && is_radl
                && irap_poc > pic.associated_irap_poc
                && irap_poc != prev_poc
                && prev_poc >= poc
            {
                return Err(ConformanceError::RadlOutputOrder { poc, prev_poc });
            }

            if is_leading && !pic.nalu_type.is_leading() && pic.associated_irap_poc == irap_poc {
                num_leading_pics_found += 1;
                // The first field of a pair may be followed by a leading
                // second field.
                let limit_non_lp = if pic.field_seq_flag { 1 } else { 0 };
                if prev_poc > irap_poc && num_leading_pics_found > limit_non_lp {
                    return Err(ConformanceError::LeadingAfterTrailing { poc, prev_poc });
                }
            }

            if is_rasl && after_cra {
                if irap_poc == pic.associated_irap_poc && pic.nalu_type.is_radl() && prev_poc <= poc
                {
                    return Err(ConformanceError::RaslAfterRadl { poc, prev_poc });
                }

                if prev_poc < irap_poc && is_idr_or_cra(pic.nalu_type.category()) && poc <= prev_poc
                {
                    return Err(ConformanceError::RaslBeforePrecedingIrap { poc, prev_poc });
                }
            }
        }

        Ok(())
    }

    /// Checks that pictures following the last CRA in output order don't
    /// reference pictures preceding it, then records the current picture as
    /// the new anchor if it is an IDR or a CRA.
    pub fn check_cra<T>(
        &self,
        rpl0: &ReferencePictureList,
        rpl1: &ReferencePictureList,
        state: &mut RefreshState,
        dpb: &Dpb<T>,
        bits_for_poc: u32,
    ) -> Result<(), ConformanceError> {
        let poc = self.poc;

        if let Some(cra_poc) = state.poc_cra.filter(|&cra_poc| poc > cra_poc) {
            for entry in rpl0.entries().iter().chain(rpl1.entries()) {
                let ref_poc = match entry.kind {
                    RplEntryKind::InterLayer { .. } => continue,
                    RplEntryKind::ShortTerm => poc - entry.ref_pic_identifier(),
                    // Unresolved long-term entries are reported by the
                    // availability check and the list construction.
                    RplEntryKind::LongTerm => {
                        let ref_pic = long_term_ref_poc(entry, bits_for_poc)
                            .and_then(|lt_poc| {
                                dpb.find_long_term_ref_pic(
                                    lt_poc,
                                    entry.delta_poc_msb_present_flag,
                                    self.layer_id,
                                    poc,
                                    bits_for_poc,
                                )
                            })
                            .and_then(|handle| dpb.picture(handle));
                        match ref_pic {
                            Some(pic) => pic.poc,
                            None => continue,
                        }
                    }
                };

                if ref_poc < cra_poc {
                    return Err(ConformanceError::ReferenceBeforeCra {
                        poc,
                        ref_poc,
                        cra_poc,
                    });
                }
            }
        }

        if is_idr_or_cra(self.category()) {
            state.poc_cra = Some(poc);
            state.associated_irap_type = Some(self.nalu_type);
        }

        Ok(())
    }

    /// Checks the STSA rules on the resolved reference lists. When the
    /// current picture is an STSA picture, the pictures of its layer and
    /// sublayer become unusable as references for the pictures following
    /// it.
    pub fn check_stsa<T>(&self, dpb: &mut Dpb<T>) -> Result<(), ConformanceError> {
        let is_stsa = self.nalu_type.is_stsa();

        for dir in 0..2 {
            for handle in self.ref_pic_list(dir).iter().flatten() {
                let Some(ref_pic) = dpb.picture(*handle) else {
                    continue;
                };

                if is_stsa
                    && ref_pic.layer_id == self.layer_id
                    && ref_pic.temporal_id == self.temporal_id
                {
                    return Err(ConformanceError::StsaSameSublayerReference {
                        poc: self.poc,
                        ref_poc: ref_pic.poc,
                        temporal_id: self.temporal_id,
                    });
                }

                if ref_pic.sub_layer_non_reference_picture_due_to_stsa {
                    return Err(ConformanceError::StsaRestrictedReference {
                        poc: self.poc,
                        ref_poc: ref_pic.poc,
                    });
                }
            }
        }

        if is_stsa {
            for pic in dpb.pictures_mut() {
                if pic.poc != self.poc
                    && pic.layer_id == self.layer_id
                    && pic.temporal_id == self.temporal_id
                {
                    pic.sub_layer_non_reference_picture_due_to_stsa = true;
                }
            }
        }

        Ok(())
    }

    /// Looks for the first entry of `rpl` with no matching picture in the
    /// DPB. Long-term entries are checked first.
    ///
    /// A long-term entry matching only a short-term picture turns that
    /// picture into a long-term one. IDR pictures need no references.
    pub fn check_that_all_ref_pics_are_available<T>(
        &self,
        dpb: &mut Dpb<T>,
        rpl: &ReferencePictureList,
    ) -> Option<MissingRefPic> {
        if self.is_idr() {
            return None;
        }

        let same_layer_ref =
            |pic: &PictureData| pic.is_ref() && pic.layer_id == self.layer_id;

        for (index, entry) in rpl.entries().iter().enumerate() {
            if !entry.is_long_term() {
                continue;
            }

            let id = entry.ref_pic_identifier();
            let lsb_match = |pic: &PictureData| {
                same_layer_ref(pic) && pic.poc_lsb() == id & poc_mask(pic.bits_for_poc)
            };

            if dpb.pictures().any(|pic| pic.is_long_term() && lsb_match(pic)) {
                continue;
            }

            match dpb
                .pictures_mut()
                .find(|pic| !pic.is_long_term() && lsb_match(&**pic))
            {
                Some(pic) => pic.set_long_term(true),
                None => {
                    log::error!(
                        "Picture POC {}: long-term reference picture with POC LSB {} seems to have been removed or not correctly decoded",
                        self.poc,
                        id
                    );
                    return Some(MissingRefPic { poc: id, index });
                }
            }
        }

        for (index, entry) in rpl.entries().iter().enumerate() {
            if !entry.is_short_term() {
                continue;
            }

            let ref_poc = self.poc - entry.ref_pic_identifier();
            let available = dpb
                .pictures()
                .any(|pic| !pic.is_long_term() && pic.poc == ref_poc && same_layer_ref(pic));

            if !available {
                log::error!(
                    "Picture POC {}: short-term reference picture with POC {} seems to have been removed or not correctly decoded",
                    self.poc,
                    ref_poc
                );
                return Some(MissingRefPic {
                    poc: ref_poc,
                    index,
                });
            }
        }

        None
    }

    /// Whether a picture at `poc` is off limits as a reference because of a
    /// DRAP picture.
    pub fn is_poc_restricted_by_drap(
        &self,
        poc: i32,
        preceding_drap_in_decoding_order: bool,
    ) -> bool {
        if !self.enable_drap_sei {
            return false;
        }

        let restricted_by_own_drap = self.is_drap && poc != self.associated_irap_poc;
        let restricted_by_previous_drap = self.cvs_has_previous_drap
            && self.latest_drap_poc.map_or(false, |drap_poc| {
                self.poc > drap_poc && (preceding_drap_in_decoding_order || poc < drap_poc)
            });

        restricted_by_own_drap || restricted_by_previous_drap
    }

    /// Checks the DRAP rules on the resolved reference lists. Violations are
    /// logged and returned, decoding goes on regardless.
    pub fn check_conformance_for_drap(&self) -> Vec<DrapViolation> {
        let mut violations = vec![];

        if !(self.is_drap || self.cvs_has_previous_drap) {
            return violations;
        }

        let active_ref_pocs = (0..2)
            .flat_map(|dir| &self.ref_poc_list[dir][..self.ref_pic_list(dir).len()])
            .copied()
            .collect::<Vec<_>>();

        if self.is_drap {
            if !matches!(
                self.category(),
                PictureCategory::Trailing | PictureCategory::Stsa
            ) {
                violations.push(DrapViolation::NotTrailing);
            }

            if self.temporal_id != 0 {
                violations.push(DrapViolation::NonZeroTemporalId);
            }

            violations.extend(
                active_ref_pocs
                    .iter()
                    .filter(|&&ref_poc| ref_poc != self.associated_irap_poc)
                    .map(|&ref_poc| DrapViolation::DrapReferencesNonIrap { ref_poc }),
            );
        }

        if let Some(drap_poc) = self.latest_drap_poc {
            if self.cvs_has_previous_drap && self.poc > drap_poc {
                violations.extend(
                    active_ref_pocs
                        .iter()
                        .filter(|&&ref_poc| {
                            ref_poc < drap_poc && ref_poc != self.associated_irap_poc
                        })
                        .map(|&ref_poc| DrapViolation::ReferencesBeforeDrap { ref_poc }),
                );
            }
        }

        for violation in &violations {
            log::warn!(
                "Non-conforming bitstream, picture POC {}: DRAP rule violated: {:?}",
                self.poc,
                violation
            );
        }

        violations
    }

    /// Whether no picture of the temporal sublayer of the slice or above is
    /// still referenced, in any layer.
    pub fn is_temporal_layer_switching_point<T>(&self, dpb: &Dpb<T>) -> bool {
        !dpb.pictures()
            .any(|pic| pic.is_ref() && pic.poc != self.poc && pic.temporal_id >= self.temporal_id)
    }

    /// Whether the picture could be coded as an STSA picture: no picture of
    /// its layer at its temporal sublayer or above is still referenced.
    pub fn is_stepwise_temporal_layer_switching_point_candidate<T>(&self, dpb: &Dpb<T>) -> bool {
        !dpb.pictures().any(|pic| {
            pic.is_ref()
                && pic.poc != self.poc
                && pic.layer_id == self.layer_id
                && pic.temporal_id >= self.temporal_id
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::h266::dpb::PicHandle;
    use crate::codec::h266::dummy::pic;
    use crate::codec::h266::dummy::rpl;
    use crate::codec::h266::dummy::slice;
    use crate::codec::h266::dummy::sps;
    use crate::codec::h266::dummy::st_rpl;
    use crate::codec::h266::dummy::DummyBuffer;
    use crate::codec::h266::parser::Vps;
    use crate::codec::h266::rpl::RplEntry;

    fn irap_pic(poc: i32, nalu_type: NaluType) -> PictureData {
        assoc_pic(poc, nalu_type, poc, nalu_type)
    }

    fn assoc_pic(poc: i32, nalu_type: NaluType, irap_poc: i32, irap_type: NaluType) -> PictureData {
        let mut pic = pic(poc);
        pic.nalu_type = nalu_type;
        pic.associated_irap_poc = irap_poc;
        pic.associated_irap_type = Some(irap_type);
        pic
    }

    fn assoc_slice(poc: i32, nalu_type: NaluType, irap_poc: i32, irap_type: NaluType) -> Slice {
        Slice {
            associated_irap_poc: irap_poc,
            associated_irap_type: Some(irap_type),
            ..slice(poc, nalu_type, st_rpl(&[]), st_rpl(&[]))
        }
    }

    fn store(dpb: &mut Dpb<DummyBuffer>, pic: PictureData) -> PicHandle {
        dpb.store_picture(pic, Default::default()).unwrap()
    }

    #[test]
    fn leading_picture_types() {
        let dpb = Dpb::<DummyBuffer>::default();

        let trail = assoc_slice(28, NaluType::TrailNut, 32, NaluType::CraNut);
        assert_eq!(
            trail.check_leading_picture_restrictions(&dpb),
            Err(ConformanceError::LeadingPictureNotLeadingType {
                poc: 28,
                irap_poc: 32
            })
        );

        let radl = assoc_slice(36, NaluType::RadlNut, 32, NaluType::CraNut);
        assert_eq!(
            radl.check_leading_picture_restrictions(&dpb),
            Err(ConformanceError::TrailingPictureIsLeadingType {
                poc: 36,
                irap_poc: 32
            })
        );

        let rasl = assoc_slice(28, NaluType::RaslNut, 32, NaluType::IdrWRadl);
        assert_eq!(
            rasl.check_leading_picture_restrictions(&dpb),
            Err(ConformanceError::RaslAssociatedWithIdr { poc: 28 })
        );

        let radl = assoc_slice(28, NaluType::RadlNut, 32, NaluType::IdrNLp);
        assert_eq!(
            radl.check_leading_picture_restrictions(&dpb),
            Err(ConformanceError::RadlAssociatedWithIdrNLp { poc: 28 })
        );

        let radl = assoc_slice(28, NaluType::RadlNut, 32, NaluType::IdrWRadl);
        assert_eq!(radl.check_leading_picture_restrictions(&dpb), Ok(()));
    }

    #[test]
    fn leading_picture_ordering() {
        let mut dpb = Dpb::<DummyBuffer>::default();
        store(&mut dpb, irap_pic(16, NaluType::CraNut));
        store(&mut dpb, assoc_pic(20, NaluType::TrailNut, 16, NaluType::CraNut));
        store(&mut dpb, irap_pic(32, NaluType::CraNut));

        // A CRA with a prior picture following it in output order.
        let cra = assoc_slice(18, NaluType::CraNut, 18, NaluType::CraNut);
        assert_eq!(
            cra.check_leading_picture_restrictions(&dpb),
            Err(ConformanceError::IrapOutputOrder {
                poc: 18,
                prev_poc: 20
            })
        );

        let mut cra = assoc_slice(40, NaluType::CraNut, 40, NaluType::CraNut);
        assert_eq!(cra.check_leading_picture_restrictions(&dpb), Ok(()));
        // Unless the prior pictures are not output.
        cra.poc = 18;
        cra.associated_irap_poc = 18;
        cra.no_output_of_prior_pics_flag = true;
        assert_eq!(cra.check_leading_picture_restrictions(&dpb), Ok(()));

        // RASL of CRA 32 preceding CRA 16 in output order.
        let rasl = assoc_slice(14, NaluType::RaslNut, 32, NaluType::CraNut);
        assert_eq!(
            rasl.check_leading_picture_restrictions(&dpb),
            Err(ConformanceError::RaslBeforePrecedingIrap {
                poc: 14,
                prev_poc: 16
            })
        );

        // Trailing picture of CRA 32 decoded before one of its leading pictures.
        store(&mut dpb, assoc_pic(33, NaluType::TrailNut, 32, NaluType::CraNut));
        let rasl = assoc_slice(30, NaluType::RaslNut, 32, NaluType::CraNut);
        assert_eq!(
            rasl.check_leading_picture_restrictions(&dpb),
            Err(ConformanceError::LeadingAfterTrailing {
                poc: 30,
                prev_poc: 33
            })
        );
    }

    #[test]
    fn rasl_after_radl() {
        let mut dpb = Dpb::<DummyBuffer>::default();
        store(&mut dpb, irap_pic(32, NaluType::CraNut));
        store(&mut dpb, assoc_pic(30, NaluType::RadlNut, 32, NaluType::CraNut));

        let rasl = assoc_slice(31, NaluType::RaslNut, 32, NaluType::CraNut);
        assert_eq!(
            rasl.check_leading_picture_restrictions(&dpb),
            Err(ConformanceError::RaslAfterRadl {
                poc: 31,
                prev_poc: 30
            })
        );

        let rasl = assoc_slice(29, NaluType::RaslNut, 32, NaluType::CraNut);
        assert_eq!(rasl.check_leading_picture_restrictions(&dpb), Ok(()));
    }

    #[test]
    fn radl_output_order() {
        let mut dpb = Dpb::<DummyBuffer>::default();
        store(&mut dpb, irap_pic(0, NaluType::IdrWRadl));
        store(&mut dpb, assoc_pic(40, NaluType::TrailNut, 0, NaluType::IdrWRadl));
        store(&mut dpb, irap_pic(32, NaluType::IdrWRadl));

        let radl = assoc_slice(30, NaluType::RadlNut, 32, NaluType::IdrWRadl);
        assert_eq!(
            radl.check_leading_picture_restrictions(&dpb),
            Err(ConformanceError::RadlOutputOrder {
                poc: 30,
                prev_poc: 40
            })
        );
    }

    #[test]
    fn cra_restrictions() {
        let _ = env_logger::try_init();

        let mut dpb = Dpb::<DummyBuffer>::default();
        store(&mut dpb, pic(90));
        store(&mut dpb, pic(100));
        let mut state = RefreshState::default();

        let cra = slice(100, NaluType::CraNut, st_rpl(&[]), st_rpl(&[]));
        cra.check_cra(&cra.rpl[0], &cra.rpl[1], &mut state, &dpb, 8)
            .unwrap();
        assert_eq!(state.poc_cra, Some(100));
        assert_eq!(state.associated_irap_type, Some(NaluType::CraNut));

        // Leading pictures may reference pictures before the CRA.
        let rasl = slice(98, NaluType::RaslNut, st_rpl(&[8]), st_rpl(&[]));
        assert!(rasl
            .check_cra(&rasl.rpl[0], &rasl.rpl[1], &mut state, &dpb, 8)
            .is_ok());

        let trail = slice(104, NaluType::TrailNut, st_rpl(&[4]), st_rpl(&[14]));
        assert_eq!(
            trail.check_cra(&trail.rpl[0], &trail.rpl[1], &mut state, &dpb, 8),
            Err(ConformanceError::ReferenceBeforeCra {
                poc: 104,
                ref_poc: 90,
                cra_poc: 100
            })
        );

        let trail = slice(
            104,
            NaluType::TrailNut,
            rpl(vec![RplEntry::long_term(90)]),
            st_rpl(&[]),
        );
        assert!(matches!(
            trail.check_cra(&trail.rpl[0], &trail.rpl[1], &mut state, &dpb, 8),
            Err(ConformanceError::ReferenceBeforeCra { ref_poc: 90, .. })
        ));

        // Unresolvable long-term entries are left to the availability check.
        let trail = slice(
            104,
            NaluType::TrailNut,
            rpl(vec![RplEntry::long_term(50), RplEntry::inter_layer(0)]),
            st_rpl(&[]),
        );
        assert!(trail
            .check_cra(&trail.rpl[0], &trail.rpl[1], &mut state, &dpb, 8)
            .is_ok());
    }

    #[test]
    fn stsa_marking() {
        let mut dpb = Dpb::<DummyBuffer>::default();
        let h0 = store(&mut dpb, pic(0));
        let mut t1 = pic(2);
        t1.temporal_id = 1;
        let h1 = store(&mut dpb, t1);
        let mut t2 = pic(3);
        t2.temporal_id = 2;
        let h2 = store(&mut dpb, t2);
        let mut t2_other_layer = pic(3);
        t2_other_layer.temporal_id = 2;
        t2_other_layer.layer_id = 1;
        let h3 = store(&mut dpb, t2_other_layer);

        let mut stsa = slice(5, NaluType::StsaNut, st_rpl(&[3, 5]), st_rpl(&[]));
        stsa.temporal_id = 2;
        stsa.construct_ref_pic_list(&mut dpb, &sps(8), &Vps::default())
            .unwrap();
        stsa.check_stsa(&mut dpb).unwrap();

        assert!(dpb
            .picture(h2)
            .unwrap()
            .sub_layer_non_reference_picture_due_to_stsa);
        assert!(!dpb
            .picture(h3)
            .unwrap()
            .sub_layer_non_reference_picture_due_to_stsa);
        assert!(!dpb
            .picture(h0)
            .unwrap()
            .sub_layer_non_reference_picture_due_to_stsa);
        assert!(!dpb
            .picture(h1)
            .unwrap()
            .sub_layer_non_reference_picture_due_to_stsa);

        // A later picture may not reference the flagged picture.
        let mut later = slice(6, NaluType::TrailNut, st_rpl(&[3]), st_rpl(&[]));
        later.temporal_id = 2;
        later
            .construct_ref_pic_list(&mut dpb, &sps(8), &Vps::default())
            .unwrap();
        assert_eq!(
            later.check_stsa(&mut dpb),
            Err(ConformanceError::StsaRestrictedReference { poc: 6, ref_poc: 3 })
        );
    }

    #[test]
    fn stsa_same_sublayer_reference() {
        let mut dpb = Dpb::<DummyBuffer>::default();
        let mut t2 = pic(3);
        t2.temporal_id = 2;
        store(&mut dpb, t2);

        let mut stsa = slice(5, NaluType::StsaNut, st_rpl(&[2]), st_rpl(&[]));
        stsa.temporal_id = 2;
        stsa.construct_ref_pic_list(&mut dpb, &sps(8), &Vps::default())
            .unwrap();
        assert_eq!(
            stsa.check_stsa(&mut dpb),
            Err(ConformanceError::StsaSameSublayerReference {
                poc: 5,
                ref_poc: 3,
                temporal_id: 2
            })
        );
    }

    #[test]
    fn availability() {
        let _ = env_logger::try_init();

        let mut dpb = Dpb::<DummyBuffer>::default();
        store(&mut dpb, pic(8));
        let st_lt = store(&mut dpb, pic(266));

        let list = rpl(vec![
            RplEntry::short_term(4),
            RplEntry::long_term(10),
            RplEntry::short_term(6),
        ]);
        let cur = slice(12, NaluType::TrailNut, list.clone(), st_rpl(&[]));

        let missing = cur.check_that_all_ref_pics_are_available(&mut dpb, &list);
        assert_eq!(missing, Some(MissingRefPic { poc: 6, index: 2 }));
        // The long-term entry matched the short-term picture 266.
        assert!(dpb.picture(st_lt).unwrap().is_long_term());

        // No DPB change, same result.
        assert_eq!(
            cur.check_that_all_ref_pics_are_available(&mut dpb, &list),
            missing
        );

        let list = rpl(vec![RplEntry::long_term(11), RplEntry::short_term(40)]);
        assert_eq!(
            cur.check_that_all_ref_pics_are_available(&mut dpb, &list),
            Some(MissingRefPic { poc: 11, index: 0 })
        );

        let list = st_rpl(&[4]);
        assert_eq!(cur.check_that_all_ref_pics_are_available(&mut dpb, &list), None);

        let idr = slice(12, NaluType::IdrNLp, st_rpl(&[]), st_rpl(&[]));
        assert_eq!(
            idr.check_that_all_ref_pics_are_available(&mut dpb, &st_rpl(&[1])),
            None
        );
    }

    #[test]
    fn drap() {
        let mut dpb = Dpb::<DummyBuffer>::default();
        store(&mut dpb, irap_pic(0, NaluType::IdrWRadl));
        store(&mut dpb, pic(4));
        store(&mut dpb, pic(8));

        let mut drap = slice(8, NaluType::TrailNut, st_rpl(&[8, 4]), st_rpl(&[]));
        drap.associated_irap_poc = 0;
        drap.enable_drap_sei = true;
        drap.is_drap = true;
        drap.temporal_id = 1;
        drap.construct_ref_pic_list(&mut dpb, &sps(8), &Vps::default())
            .unwrap();

        assert_eq!(
            drap.check_conformance_for_drap(),
            vec![
                DrapViolation::NonZeroTemporalId,
                DrapViolation::DrapReferencesNonIrap { ref_poc: 4 }
            ]
        );
        assert!(drap.is_poc_restricted_by_drap(4, false));
        assert!(!drap.is_poc_restricted_by_drap(0, false));

        let mut after = slice(12, NaluType::TrailNut, st_rpl(&[4, 8, 12]), st_rpl(&[]));
        after.associated_irap_poc = 0;
        after.enable_drap_sei = true;
        after.cvs_has_previous_drap = true;
        after.latest_drap_poc = Some(8);
        after
            .construct_ref_pic_list(&mut dpb, &sps(8), &Vps::default())
            .unwrap();

        assert_eq!(
            after.check_conformance_for_drap(),
            vec![DrapViolation::ReferencesBeforeDrap { ref_poc: 4 }]
        );
        assert!(after.is_poc_restricted_by_drap(4, false));
        assert!(!after.is_poc_restricted_by_drap(8, false));
        assert!(after.is_poc_restricted_by_drap(10, true));

        after.enable_drap_sei = false;
        assert!(!after.is_poc_restricted_by_drap(4, false));
    }

    #[test]
    fn temporal_switching_points() {
        let mut dpb = Dpb::<DummyBuffer>::default();
        store(&mut dpb, pic(0));
        let mut t1 = pic(2);
        t1.temporal_id = 1;
        t1.layer_id = 1;
        let h1 = store(&mut dpb, t1);

        let mut cur = slice(4, NaluType::TrailNut, st_rpl(&[]), st_rpl(&[]));
        cur.temporal_id = 1;
        assert!(!cur.is_temporal_layer_switching_point(&dpb));
        assert!(cur.is_stepwise_temporal_layer_switching_point_candidate(&dpb));

        dpb.picture_mut(h1).unwrap().set_referenced(false);
        assert!(cur.is_temporal_layer_switching_point(&dpb));

        cur.temporal_id = 0;
        assert!(!cur.is_temporal_layer_switching_point(&dpb));
        assert!(!cur.is_stepwise_temporal_layer_switching_point_candidate(&dpb));
    }
}
