// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Reference picture marking. See 8.3.3.

use crate::codec::h266::conformance::ConformanceError;
use crate::codec::h266::dpb::Dpb;
use crate::codec::h266::dpb::PictureBuffer;
use crate::codec::h266::parser::NaluType;
use crate::codec::h266::parser::Vps;
use crate::codec::h266::picture::poc_mask;
use crate::codec::h266::picture::PictureData;
use crate::codec::h266::rpl::ReferencePictureList;
use crate::codec::h266::rpl::RplEntry;
use crate::codec::h266::rpl::RplEntryKind;
use crate::codec::h266::slice::Slice;

/// Decoding refresh state of a coded video sequence.
///
/// A CRA invalidates the pictures decoded before it only once a picture
/// following it in output order shows up, so its leading pictures can still
/// use them.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RefreshState {
    pub refresh_pending: bool,
    /// POC of the last CRA or IDR picture.
    pub poc_cra: Option<i32>,
    /// Type of the last CRA or IDR picture.
    pub associated_irap_type: Option<NaluType>,
}

impl RefreshState {
    pub fn reset(&mut self) {
        *self = Default::default();
    }
}

/// Marks every picture rejected by `keep` as unused for reference.
fn flush<T: PictureBuffer>(dpb: &mut Dpb<T>, keep: impl Fn(&PictureData) -> bool) {
    for (_, entry) in dpb.entries_mut() {
        if !keep(&entry.pic) {
            entry.pic.set_referenced(false);
            entry.buffer.clear_hash_map();
        }
    }
}

impl Slice {
    /// Applies the IDR and CRA refresh rules to the DPB.
    ///
    /// With `efficient_field_irap_enabled`, the flush of an IDR is deferred
    /// to the first picture following it in output order, as is always done
    /// for CRAs.
    pub fn decoding_refresh_marking<T: PictureBuffer>(
        &self,
        state: &mut RefreshState,
        dpb: &mut Dpb<T>,
        efficient_field_irap_enabled: bool,
    ) {
        let poc = self.poc;

        if self.is_idr() {
            if efficient_field_irap_enabled {
                log::debug!("IDR POC {}: refresh pending", poc);
                state.refresh_pending = true;
            } else {
                log::debug!("IDR POC {}: marking all other pictures as unused", poc);
                flush(dpb, |pic| pic.poc == poc);
            }
            return;
        }

        let after_idr = self.associated_irap_type.map_or(false, |t| t.is_idr());
        if efficient_field_irap_enabled && after_idr {
            let last_idr = self.last_idr;
            if state.refresh_pending && poc > last_idr {
                log::debug!("POC {}: applying refresh of IDR POC {}", poc, last_idr);
                flush(dpb, |pic| pic.poc == poc || pic.poc == last_idr);
                state.refresh_pending = false;
            }
        } else if let Some(poc_cra) = state.poc_cra {
            if state.refresh_pending && poc > poc_cra {
                log::debug!("POC {}: applying refresh of CRA POC {}", poc, poc_cra);
                flush(dpb, |pic| pic.poc == poc || pic.poc == poc_cra);
                state.refresh_pending = false;
            }
        }

        if self.nalu_type.is_cra() {
            state.refresh_pending = true;
            state.poc_cra = Some(poc);
        }
    }

    /// Keeps as references the pictures designated by `rpl0` or `rpl1` and
    /// marks the other pictures of the current layer as unused.
    ///
    /// Every entry takes part in the marking. Pictures designated by an
    /// active entry are flagged as used by the current picture, which is an
    /// error for pictures of a higher temporal sublayer.
    pub fn apply_reference_picture_list_based_marking<T>(
        &self,
        dpb: &mut Dpb<T>,
        rpl0: &ReferencePictureList,
        rpl1: &ReferencePictureList,
        vps: &Vps,
    ) -> Result<(), ConformanceError> {
        let lists = [rpl0, rpl1];
        // Nothing survives an IDR in its own layer.
        let lists = if self.is_idr() { &lists[..0] } else { &lists[..] };

        for pic in dpb.pictures_mut() {
            if !pic.is_ref() {
                continue;
            }

            let mut found = None;
            let mut used_by_curr = false;
            for rpl in lists {
                for (idx, entry) in rpl.entries().iter().enumerate() {
                    if let Some(long_term) = self.designates(pic, entry, vps) {
                        found.get_or_insert(long_term);
                        used_by_curr |= idx < rpl.num_active();
                    }
                }
            }

            match found {
                Some(long_term) => pic.set_long_term(long_term),
                None if pic.layer_id == self.layer_id && pic.poc != self.poc => {
                    pic.set_referenced(false);
                    pic.set_long_term(false);
                }
                None => (),
            }

            pic.used_by_curr = used_by_curr;
            if pic.is_ref() && pic.used_by_curr && pic.temporal_id > self.temporal_id {
                return Err(ConformanceError::HigherTemporalLayerReference {
                    poc: self.poc,
                    ref_poc: pic.poc,
                    temporal_id: self.temporal_id,
                    ref_temporal_id: pic.temporal_id,
                });
            }
        }

        log::trace!("DPB after marking POC {}: {:#?}", self.poc, dpb);

        Ok(())
    }

    /// Whether `entry` designates `pic`, and if so whether as a long-term
    /// reference.
    fn designates(&self, pic: &PictureData, entry: &RplEntry, vps: &Vps) -> Option<bool> {
        let hit = match entry.kind {
            RplEntryKind::InterLayer { ilrp_idx } => {
                pic.poc == self.poc
                    && vps.inter_layer_ref_layer_id(self.layer_id, ilrp_idx) == Some(pic.layer_id)
            }
            _ if pic.layer_id != self.layer_id => false,
            RplEntryKind::ShortTerm => pic.poc == self.poc - entry.ref_pic_identifier(),
            RplEntryKind::LongTerm => {
                pic.is_long_term()
                    && pic.poc_lsb() == entry.ref_pic_identifier() & poc_mask(pic.bits_for_poc)
            }
        };

        hit.then_some(!entry.is_short_term())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::h266::dpb::PicHandle;
    use crate::codec::h266::dummy::pic;
    use crate::codec::h266::dummy::rpl;
    use crate::codec::h266::dummy::slice;
    use crate::codec::h266::dummy::st_rpl;
    use crate::codec::h266::dummy::DummyBuffer;

    fn dpb_with(pocs: &[i32]) -> (Dpb<DummyBuffer>, Vec<PicHandle>) {
        let mut dpb = Dpb::default();
        let handles = pocs
            .iter()
            .map(|&poc| dpb.store_picture(pic(poc), Default::default()).unwrap())
            .collect();
        (dpb, handles)
    }

    fn referenced_pocs(dpb: &Dpb<DummyBuffer>) -> Vec<i32> {
        let mut pocs = dpb
            .pictures()
            .filter(|p| p.is_ref())
            .map(|p| p.poc)
            .collect::<Vec<_>>();
        pocs.sort();
        pocs
    }

    #[test]
    fn idr_flush() {
        let _ = env_logger::try_init();

        let (mut dpb, handles) = dpb_with(&[0, 4, 8, 16]);
        let idr = slice(16, NaluType::IdrWRadl, st_rpl(&[]), st_rpl(&[]));
        let mut state = RefreshState::default();

        idr.decoding_refresh_marking(&mut state, &mut dpb, false);

        assert_eq!(referenced_pocs(&dpb), vec![16]);
        assert!(!state.refresh_pending);
        assert_eq!(dpb.get(handles[0]).unwrap().buffer.hash_map_cleared, 1);
        assert_eq!(dpb.get(handles[3]).unwrap().buffer.hash_map_cleared, 0);
    }

    #[test]
    fn idr_deferred_refresh() {
        let (mut dpb, _) = dpb_with(&[0, 4, 8, 16, 17]);
        let mut state = RefreshState::default();

        let idr = slice(16, NaluType::IdrNLp, st_rpl(&[]), st_rpl(&[]));
        idr.decoding_refresh_marking(&mut state, &mut dpb, true);
        assert!(state.refresh_pending);
        assert_eq!(referenced_pocs(&dpb), vec![0, 4, 8, 16, 17]);

        let mut trail = slice(17, NaluType::TrailNut, st_rpl(&[1]), st_rpl(&[]));
        trail.associated_irap_type = Some(NaluType::IdrNLp);
        trail.last_idr = 16;
        trail.decoding_refresh_marking(&mut state, &mut dpb, true);

        assert!(!state.refresh_pending);
        assert_eq!(referenced_pocs(&dpb), vec![16, 17]);
    }

    #[test]
    fn cra_refresh_deferral() {
        let (mut dpb, _) = dpb_with(&[90, 95, 98, 100, 99, 105]);
        let mut state = RefreshState::default();

        let cra = slice(100, NaluType::CraNut, st_rpl(&[]), st_rpl(&[]));
        cra.decoding_refresh_marking(&mut state, &mut dpb, false);
        assert!(state.refresh_pending);
        assert_eq!(state.poc_cra, Some(100));

        // Leading pictures do not trigger the refresh.
        let rasl = slice(99, NaluType::RaslNut, st_rpl(&[1]), st_rpl(&[]));
        rasl.decoding_refresh_marking(&mut state, &mut dpb, false);
        assert!(state.refresh_pending);
        assert_eq!(referenced_pocs(&dpb).len(), 6);

        let trail = slice(105, NaluType::TrailNut, st_rpl(&[5]), st_rpl(&[]));
        trail.decoding_refresh_marking(&mut state, &mut dpb, false);
        assert!(!state.refresh_pending);
        assert_eq!(referenced_pocs(&dpb), vec![100, 105]);
    }

    #[test]
    fn rpl_based_marking() {
        let (mut dpb, handles) = dpb_with(&[0, 4, 8, 12, 16]);
        dpb.picture_mut(handles[0]).unwrap().set_long_term(true);
        let mut other_layer = pic(8);
        other_layer.layer_id = 1;
        let other = dpb.store_picture(other_layer, Default::default()).unwrap();

        let cur = slice(
            16,
            NaluType::TrailNut,
            rpl(vec![RplEntry::short_term(4), RplEntry::long_term(0)]),
            st_rpl(&[8]),
        );
        let rpl0 = cur.rpl[0].clone();
        let rpl1 = cur.rpl[1].clone();
        cur.apply_reference_picture_list_based_marking(&mut dpb, &rpl0, &rpl1, &Vps::default())
            .unwrap();

        assert_eq!(referenced_pocs(&dpb), vec![0, 8, 8, 12, 16]);
        assert!(dpb.picture(handles[0]).unwrap().is_long_term());
        assert!(!dpb.picture(handles[1]).unwrap().is_ref());
        assert!(dpb.picture(handles[2]).unwrap().used_by_curr);
        // Pictures of other layers are left alone.
        assert!(dpb.picture(other).unwrap().is_ref());
    }

    #[test]
    fn rpl_based_marking_idr_keeps_nothing() {
        let (mut dpb, _) = dpb_with(&[0, 4, 8]);
        let idr = slice(8, NaluType::IdrWRadl, st_rpl(&[4]), st_rpl(&[]));
        let rpl0 = idr.rpl[0].clone();
        let rpl1 = idr.rpl[1].clone();

        idr.apply_reference_picture_list_based_marking(&mut dpb, &rpl0, &rpl1, &Vps::default())
            .unwrap();
        assert_eq!(referenced_pocs(&dpb), vec![8]);
    }

    #[test]
    fn rpl_based_marking_inactive_entries_are_kept() {
        let (mut dpb, handles) = dpb_with(&[4, 8, 12]);
        let rpl0 = std::rc::Rc::new(
            ReferencePictureList::new(vec![RplEntry::short_term(4), RplEntry::short_term(8)])
                .unwrap()
                .with_num_active(1)
                .unwrap(),
        );
        let cur = slice(12, NaluType::TrailNut, rpl0.clone(), st_rpl(&[]));

        cur.apply_reference_picture_list_based_marking(
            &mut dpb,
            &rpl0,
            &st_rpl(&[]),
            &Vps::default(),
        )
        .unwrap();
        assert_eq!(referenced_pocs(&dpb), vec![4, 8, 12]);
        assert!(dpb.picture(handles[1]).unwrap().used_by_curr);
        assert!(!dpb.picture(handles[0]).unwrap().used_by_curr);
    }

    #[test]
    fn higher_temporal_layer_reference() {
        let (mut dpb, handles) = dpb_with(&[4, 8]);
        dpb.picture_mut(handles[0]).unwrap().temporal_id = 2;
        let mut cur = slice(8, NaluType::TrailNut, st_rpl(&[4]), st_rpl(&[]));
        cur.temporal_id = 1;
        let rpl0 = cur.rpl[0].clone();
        let rpl1 = cur.rpl[1].clone();

        assert!(matches!(
            cur.apply_reference_picture_list_based_marking(&mut dpb, &rpl0, &rpl1, &Vps::default()),
            Err(ConformanceError::HigherTemporalLayerReference {
                poc: 8,
                ref_poc: 4,
                ..
            })
        ));
    }
}
