// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Reference picture lists as signalled by ref_pic_list_struct(). See 7.3.10.

use std::fmt;

use anyhow::anyhow;

/// Maximum number of entries in a ref_pic_list_struct(). See 7.4.10.
pub const MAX_NUM_REF_PICS: usize = 29;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RplEntryKind {
    #[default]
    ShortTerm,
    LongTerm,
    /// Picture of the same access unit in the `ilrp_idx`-th direct reference
    /// layer.
    InterLayer { ilrp_idx: usize },
}

/// A single entry of a reference picture list.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RplEntry {
    pub kind: RplEntryKind,
    /// Delta POC for short-term entries, POC LSBs for long-term entries and
    /// always 0 for inter-layer entries.
    ref_pic_identifier: i32,
    pub delta_poc_msb_present_flag: bool,
    pub delta_poc_msb_cycle_lt: i32,
}

impl RplEntry {
    pub fn short_term(delta_poc: i32) -> Self {
        Self {
            kind: RplEntryKind::ShortTerm,
            ref_pic_identifier: delta_poc,
            ..Default::default()
        }
    }

    pub fn long_term(poc_lsb: i32) -> Self {
        Self {
            kind: RplEntryKind::LongTerm,
            ref_pic_identifier: poc_lsb,
            ..Default::default()
        }
    }

    pub fn inter_layer(ilrp_idx: usize) -> Self {
        Self {
            kind: RplEntryKind::InterLayer { ilrp_idx },
            ..Default::default()
        }
    }

    /// Attaches a delta_poc_msb_cycle_lt to a long-term entry.
    pub fn with_msb_cycle(mut self, delta_poc_msb_cycle_lt: i32) -> Self {
        self.delta_poc_msb_present_flag = true;
        self.delta_poc_msb_cycle_lt = delta_poc_msb_cycle_lt;
        self
    }

    pub fn ref_pic_identifier(&self) -> i32 {
        self.ref_pic_identifier
    }

    pub fn is_short_term(&self) -> bool {
        matches!(self.kind, RplEntryKind::ShortTerm)
    }

    pub fn is_long_term(&self) -> bool {
        matches!(self.kind, RplEntryKind::LongTerm)
    }

    pub fn is_inter_layer(&self) -> bool {
        matches!(self.kind, RplEntryKind::InterLayer { .. })
    }
}

/// An immutable reference picture list. Built once by the parser, then
/// shared between the SPS and every slice using it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReferencePictureList {
    entries: Vec<RplEntry>,
    num_short_term: usize,
    num_long_term: usize,
    num_inter_layer: usize,
    /// Entries usable by the inter prediction of a slice. Every entry takes
    /// part in marking regardless.
    num_active: usize,
    ltrp_in_header_flag: bool,
}

impl ReferencePictureList {
    pub fn new(entries: Vec<RplEntry>) -> anyhow::Result<Self> {
        if entries.len() > MAX_NUM_REF_PICS {
            return Err(anyhow!(
                "{} reference picture list entries, at most {} allowed",
                entries.len(),
                MAX_NUM_REF_PICS
            ));
        }

        if let Some(entry) = entries
            .iter()
            .find(|e| e.is_long_term() && e.ref_pic_identifier < 0)
        {
            return Err(anyhow!(
                "negative long-term POC LSB {}",
                entry.ref_pic_identifier
            ));
        }

        let count = |f: fn(&RplEntry) -> bool| entries.iter().filter(|e| f(e)).count();

        Ok(Self {
            num_short_term: count(RplEntry::is_short_term),
            num_long_term: count(RplEntry::is_long_term),
            num_inter_layer: count(RplEntry::is_inter_layer),
            num_active: entries.len(),
            ltrp_in_header_flag: false,
            entries,
        })
    }

    /// Restricts the entries usable for prediction to the first
    /// `num_active`.
    pub fn with_num_active(mut self, num_active: usize) -> anyhow::Result<Self> {
        if num_active > self.entries.len() {
            return Err(anyhow!(
                "{} active entries requested, list has {}",
                num_active,
                self.entries.len()
            ));
        }

        self.num_active = num_active;
        Ok(self)
    }

    pub fn with_ltrp_in_header_flag(mut self, ltrp_in_header_flag: bool) -> Self {
        self.ltrp_in_header_flag = ltrp_in_header_flag;
        self
    }

    /// Returns a copy of `self` carrying the long-term MSB information of
    /// `local`. Slices using an SPS list still signal the MSB cycles in
    /// their own headers.
    pub fn with_lt_msb_from(&self, local: &ReferencePictureList) -> Self {
        let mut rpl = self.clone();

        for (entry, local) in rpl.entries.iter_mut().zip(local.entries.iter()) {
            if entry.is_long_term() && local.is_long_term() {
                entry.delta_poc_msb_present_flag = local.delta_poc_msb_present_flag;
                entry.delta_poc_msb_cycle_lt = local.delta_poc_msb_cycle_lt;
            }
        }

        rpl
    }

    pub fn entries(&self) -> &[RplEntry] {
        &self.entries
    }

    pub fn entry(&self, idx: usize) -> Option<&RplEntry> {
        self.entries.get(idx)
    }

    /// The entries usable for prediction.
    pub fn active_entries(&self) -> &[RplEntry] {
        &self.entries[..self.num_active]
    }

    pub fn num_entries(&self) -> usize {
        self.entries.len()
    }

    pub fn num_short_term(&self) -> usize {
        self.num_short_term
    }

    pub fn num_long_term(&self) -> usize {
        self.num_long_term
    }

    pub fn num_inter_layer(&self) -> usize {
        self.num_inter_layer
    }

    pub fn num_active(&self) -> usize {
        self.num_active
    }

    pub fn ltrp_in_header_flag(&self) -> bool {
        self.ltrp_in_header_flag
    }
}

impl fmt::Display for ReferencePictureList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RefPics = {{")?;
        for entry in &self.entries {
            let tag = match entry.kind {
                RplEntryKind::ShortTerm => "ST",
                RplEntryKind::LongTerm => "LT",
                RplEntryKind::InterLayer { .. } => "IL",
            };
            write!(f, " {}[{}]", entry.ref_pic_identifier, tag)?;
        }
        write!(f, " }}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_and_active_prefix() {
        let rpl = ReferencePictureList::new(vec![
            RplEntry::short_term(1),
            RplEntry::long_term(16),
            RplEntry::short_term(-2),
            RplEntry::inter_layer(0),
        ])
        .unwrap()
        .with_num_active(2)
        .unwrap();

        assert_eq!(rpl.num_entries(), 4);
        assert_eq!(rpl.num_short_term(), 2);
        assert_eq!(rpl.num_long_term(), 1);
        assert_eq!(rpl.num_inter_layer(), 1);
        assert_eq!(rpl.active_entries().len(), 2);
        assert_eq!(rpl.entry(3).unwrap().ref_pic_identifier(), 0);
        assert!(rpl.entry(4).is_none());
        assert_eq!(rpl.to_string(), "RefPics = { 1[ST] 16[LT] -2[ST] 0[IL] }");
    }

    #[test]
    fn invalid_lists() {
        assert!(ReferencePictureList::new(vec![RplEntry::short_term(1); 30]).is_err());
        assert!(ReferencePictureList::new(vec![RplEntry::long_term(-1)]).is_err());
        assert!(ReferencePictureList::new(vec![RplEntry::short_term(1)])
            .unwrap()
            .with_num_active(2)
            .is_err());
    }

    #[test]
    fn msb_overlay() {
        let sps_rpl =
            ReferencePictureList::new(vec![RplEntry::short_term(1), RplEntry::long_term(10)])
                .unwrap();
        let local = ReferencePictureList::new(vec![
            RplEntry::short_term(1),
            RplEntry::long_term(10).with_msb_cycle(1),
        ])
        .unwrap();

        let rpl = sps_rpl.with_lt_msb_from(&local);
        let lt = rpl.entry(1).unwrap();
        assert!(lt.delta_poc_msb_present_flag);
        assert_eq!(lt.delta_poc_msb_cycle_lt, 1);
        assert!(!sps_rpl.entry(1).unwrap().delta_poc_msb_present_flag);
    }
}
