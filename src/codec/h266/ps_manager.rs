// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Storage and activation of the H.266 parameter sets.
//!
//! Parameter sets are stored as they arrive and activated when a picture
//! refers to them. VPS, DPS, SPS and PPS have at most one active instance
//! each, while every APS used by a picture is active at the same time.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::rc::Rc;

use thiserror::Error;

use crate::codec::h266::parser::aps_key;
use crate::codec::h266::parser::Aps;
use crate::codec::h266::parser::ApsType;
use crate::codec::h266::parser::Dps;
use crate::codec::h266::parser::Pps;
use crate::codec::h266::parser::Sps;
use crate::codec::h266::parser::Vps;
use crate::codec::h266::parser::MAX_DPS_COUNT;
use crate::codec::h266::parser::MAX_LOG2_MAX_PIC_ORDER_CNT_LSB_MINUS4;
use crate::codec::h266::parser::MAX_NUM_APS;
use crate::codec::h266::parser::MAX_NUM_APS_TYPE;
use crate::codec::h266::parser::MAX_PPS_COUNT;
use crate::codec::h266::parser::MAX_SPS_COUNT;
use crate::codec::h266::parser::MAX_VPS_COUNT;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParameterSetError {
    #[error("PPS {0} has not been received")]
    UnknownPps(u8),
    #[error("SPS {0} has not been received")]
    UnknownSps(u8),
    #[error("{kind} id {id} is out of range")]
    IdOutOfRange { kind: &'static str, id: u32 },
    #[error("SPS {sps_id}: log2_max_pic_order_cnt_lsb_minus4 {value} is out of range")]
    PocLsbBitsOutOfRange { sps_id: u8, value: u8 },
}

/// Parameter sets of one kind, by id.
#[derive(Debug)]
pub struct ParameterSetMap<T> {
    kind: &'static str,
    max_count: u32,
    sets: BTreeMap<u32, Rc<T>>,
    active: Vec<u32>,
}

impl<T> ParameterSetMap<T> {
    pub fn new(kind: &'static str, max_count: usize) -> Self {
        Self {
            kind,
            max_count: max_count as u32,
            sets: Default::default(),
            active: Default::default(),
        }
    }

    /// Stores `ps` under `id`, replacing the previous parameter set with that
    /// id. A replaced active parameter set stays active.
    pub fn store(&mut self, id: u32, ps: T) -> Result<&Rc<T>, ParameterSetError> {
        if id >= self.max_count {
            return Err(ParameterSetError::IdOutOfRange {
                kind: self.kind,
                id,
            });
        }

        log::debug!("Storing {} {}", self.kind, id);

        let ps = Rc::new(ps);
        Ok(match self.sets.entry(id) {
            Entry::Occupied(mut entry) => {
                entry.insert(ps);
                entry.into_mut()
            }
            Entry::Vacant(entry) => entry.insert(ps),
        })
    }

    pub fn get(&self, id: u32) -> Option<&Rc<T>> {
        self.sets.get(&id)
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// Makes `id` the only active id.
    pub fn set_active(&mut self, id: u32) {
        self.active.clear();
        self.active.push(id);
    }

    /// Adds `id` to the active ids.
    pub fn add_active(&mut self, id: u32) {
        if !self.active.contains(&id) {
            self.active.push(id);
        }
    }

    pub fn clear_active(&mut self) {
        self.active.clear();
    }

    pub fn is_active(&self, id: u32) -> bool {
        self.active.contains(&id)
    }

    pub fn active_ids(&self) -> &[u32] {
        &self.active
    }

    /// The first active id, for kinds with a single active parameter set.
    pub fn active_id(&self) -> Option<u32> {
        self.active.first().copied()
    }

    /// The active parameter sets that have been received.
    pub fn active(&self) -> impl Iterator<Item = &Rc<T>> {
        self.active.iter().filter_map(|id| self.sets.get(id))
    }
}

/// Keeps every parameter set received so far and tracks which ones are in use
/// by the current picture.
#[derive(Debug)]
pub struct ParameterSetManager {
    vps_map: ParameterSetMap<Vps>,
    dps_map: ParameterSetMap<Dps>,
    sps_map: ParameterSetMap<Sps>,
    pps_map: ParameterSetMap<Pps>,
    aps_map: ParameterSetMap<Aps>,
}

impl Default for ParameterSetManager {
    fn default() -> Self {
        Self {
            vps_map: ParameterSetMap::new("VPS", MAX_VPS_COUNT),
            dps_map: ParameterSetMap::new("DPS", MAX_DPS_COUNT),
            sps_map: ParameterSetMap::new("SPS", MAX_SPS_COUNT),
            pps_map: ParameterSetMap::new("PPS", MAX_PPS_COUNT),
            aps_map: ParameterSetMap::new("APS", MAX_NUM_APS * MAX_NUM_APS_TYPE),
        }
    }
}

impl ParameterSetManager {
    pub fn store_vps(&mut self, vps: Vps) -> Result<&Rc<Vps>, ParameterSetError> {
        self.vps_map.store(vps.video_parameter_set_id.into(), vps)
    }

    pub fn store_dps(&mut self, dps: Dps) -> Result<&Rc<Dps>, ParameterSetError> {
        self.dps_map.store(dps.decoding_parameter_set_id.into(), dps)
    }

    pub fn store_sps(&mut self, sps: Sps) -> Result<&Rc<Sps>, ParameterSetError> {
        if sps.log2_max_pic_order_cnt_lsb_minus4 > MAX_LOG2_MAX_PIC_ORDER_CNT_LSB_MINUS4 {
            return Err(ParameterSetError::PocLsbBitsOutOfRange {
                sps_id: sps.seq_parameter_set_id,
                value: sps.log2_max_pic_order_cnt_lsb_minus4,
            });
        }

        self.sps_map.store(sps.seq_parameter_set_id.into(), sps)
    }

    pub fn store_pps(&mut self, pps: Pps) -> Result<&Rc<Pps>, ParameterSetError> {
        self.pps_map.store(pps.pic_parameter_set_id.into(), pps)
    }

    pub fn store_aps(&mut self, aps: Aps) -> Result<&Rc<Aps>, ParameterSetError> {
        if usize::from(aps.adaptation_parameter_set_id) >= MAX_NUM_APS {
            return Err(ParameterSetError::IdOutOfRange {
                kind: "APS",
                id: aps.adaptation_parameter_set_id.into(),
            });
        }

        self.aps_map.store(aps.key(), aps)
    }

    pub fn vps(&self, vps_id: u8) -> Option<&Rc<Vps>> {
        self.vps_map.get(vps_id.into())
    }

    pub fn dps(&self, dps_id: u8) -> Option<&Rc<Dps>> {
        self.dps_map.get(dps_id.into())
    }

    pub fn sps(&self, sps_id: u8) -> Option<&Rc<Sps>> {
        self.sps_map.get(sps_id.into())
    }

    pub fn pps(&self, pps_id: u8) -> Option<&Rc<Pps>> {
        self.pps_map.get(pps_id.into())
    }

    pub fn aps(&self, aps_id: u8, aps_type: ApsType) -> Option<&Rc<Aps>> {
        self.aps_map.get(aps_key(aps_id, aps_type))
    }

    pub fn active_vps(&self) -> Option<&Rc<Vps>> {
        self.vps_map.active().next()
    }

    /// The active DPS. `None` also when the active SPS refers to no DPS.
    pub fn active_dps(&self) -> Option<&Rc<Dps>> {
        self.dps_map.active().next()
    }

    pub fn active_sps(&self) -> Option<&Rc<Sps>> {
        self.sps_map.active().next()
    }

    pub fn active_pps(&self) -> Option<&Rc<Pps>> {
        self.pps_map.active().next()
    }

    pub fn active_sps_id(&self) -> Option<u8> {
        self.sps_map.active_id().map(|id| id as u8)
    }

    pub fn active_dps_id(&self) -> Option<u8> {
        self.dps_map.active_id().map(|id| id as u8)
    }

    pub fn active_aps(&self) -> impl Iterator<Item = &Rc<Aps>> {
        self.aps_map.active()
    }

    /// Forgets the APSs used by the previous picture.
    pub fn clear_active_aps(&mut self) {
        self.aps_map.clear_active();
    }

    pub fn is_aps_active(&self, aps_id: u8, aps_type: ApsType) -> bool {
        self.aps_map.is_active(aps_key(aps_id, aps_type))
    }

    /// Activates PPS `pps_id` along with the SPS, DPS and VPS it depends on.
    ///
    /// Only a missing PPS or SPS makes the activation fail, in which case no
    /// SPS and no DPS are active anymore. Everything else is logged and
    /// tolerated.
    pub fn activate_pps(&mut self, pps_id: u8, is_irap: bool) -> Result<(), ParameterSetError> {
        let Some(sps_id) = self.pps(pps_id).map(|pps| pps.seq_parameter_set_id) else {
            return Err(self.fail_activation(ParameterSetError::UnknownPps(pps_id)));
        };

        let Some((dps_id, vps_id)) = self
            .sps(sps_id)
            .map(|sps| (sps.decoding_parameter_set_id, sps.video_parameter_set_id))
        else {
            return Err(self.fail_activation(ParameterSetError::UnknownSps(sps_id)));
        };

        if !is_irap && self.active_sps_id() != Some(sps_id) {
            log::warn!(
                "PPS {} activated by a non-IRAP picture refers to inactive SPS {}",
                pps_id,
                sps_id
            );
        }

        match self.active_dps_id() {
            Some(active_dps_id) if active_dps_id != dps_id => log::warn!(
                "SPS {} refers to DPS {} while DPS {} is active, keeping the latter",
                sps_id,
                dps_id,
                active_dps_id
            ),
            _ => {
                // DPS id 0 stands for no DPS at all.
                if dps_id != 0 && self.dps(dps_id).is_none() {
                    log::warn!("SPS {} refers to missing DPS {}", sps_id, dps_id);
                } else {
                    self.dps_map.set_active(dps_id.into());
                }
            }
        }

        if vps_id == 0 {
            log::debug!("SPS {} has no VPS, using a single-layer one", sps_id);
            self.vps_map.store(0, Vps::default())?;
            self.vps_map.set_active(0);
        } else if self.vps(vps_id).is_some() {
            self.vps_map.set_active(vps_id.into());
        } else {
            log::warn!("SPS {} refers to missing VPS {}", sps_id, vps_id);
        }

        self.sps_map.set_active(sps_id.into());
        self.pps_map.set_active(pps_id.into());

        log::debug!("Activated PPS {} (SPS {})", pps_id, sps_id);

        Ok(())
    }

    fn fail_activation(&mut self, err: ParameterSetError) -> ParameterSetError {
        log::debug!("PPS activation failed: {}", err);
        self.sps_map.clear_active();
        self.dps_map.clear_active();
        err
    }

    /// Marks APS `aps_id` of type `aps_type` as in use. Returns false if it
    /// has not been received, in which case the tool using it must be turned
    /// off for the picture.
    pub fn activate_aps(&mut self, aps_id: u8, aps_type: ApsType) -> bool {
        let key = aps_key(aps_id, aps_type);
        if self.aps_map.get(key).is_none() {
            log::warn!("{:?} APS {} has not been received", aps_type, aps_id);
            return false;
        }

        self.aps_map.add_active(key);
        true
    }
}
