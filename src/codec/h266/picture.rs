// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use crate::codec::h266::parser::NaluType;
use crate::codec::h266::slice::Slice;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Reference {
    #[default]
    None,
    ShortTerm,
    LongTerm,
}

/// Data associated with an h.266 picture, as tracked by the DPB. Most fields
/// are extracted from the first slice of the picture and kept for the
/// checks run while decoding later pictures.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PictureData {
    pub poc: i32,
    pub layer_id: u8,
    pub temporal_id: u8,
    pub nalu_type: NaluType,
    pub associated_irap_poc: i32,
    pub associated_irap_type: Option<NaluType>,
    pub pic_output_flag: bool,
    pub field_seq_flag: bool,
    /// POC LSB width of the SPS the picture was coded with.
    pub bits_for_poc: u32,

    // Internal state.
    referenced: bool,
    long_term: bool,
    pub reconstructed: bool,
    /// Whether the picture is used by the active entries of the slice being
    /// decoded.
    pub used_by_curr: bool,
    pub sub_layer_non_reference_picture_due_to_stsa: bool,
}

impl Default for PictureData {
    fn default() -> Self {
        Self {
            poc: 0,
            layer_id: 0,
            temporal_id: 0,
            nalu_type: NaluType::default(),
            associated_irap_poc: 0,
            associated_irap_type: None,
            pic_output_flag: true,
            field_seq_flag: false,
            bits_for_poc: 8,
            referenced: false,
            long_term: false,
            reconstructed: false,
            used_by_curr: false,
            sub_layer_non_reference_picture_due_to_stsa: false,
        }
    }
}

impl PictureData {
    /// Instantiates the `PictureData` of the picture `slice` belongs to. New
    /// pictures start out as short-term references.
    pub fn new_from_slice(slice: &Slice, bits_for_poc: u32, field_seq_flag: bool) -> Self {
        Self {
            poc: slice.poc,
            layer_id: slice.layer_id,
            temporal_id: slice.temporal_id,
            nalu_type: slice.nalu_type,
            associated_irap_poc: slice.associated_irap_poc,
            associated_irap_type: slice.associated_irap_type,
            pic_output_flag: slice.pic_output_flag,
            field_seq_flag,
            bits_for_poc,
            referenced: true,
            ..Default::default()
        }
    }

    /// Whether the current picture is a reference, either ShortTerm or LongTerm.
    pub fn is_ref(&self) -> bool {
        self.referenced
    }

    /// Whether the picture is flagged as long-term. The flag survives the
    /// picture being unmarked by a refresh.
    pub fn is_long_term(&self) -> bool {
        self.long_term
    }

    pub fn set_referenced(&mut self, referenced: bool) {
        if self.referenced != referenced {
            log::debug!(
                "Set referenced of POC {} (layer {}) to {}",
                self.poc,
                self.layer_id,
                referenced
            );
        }

        self.referenced = referenced;
    }

    pub fn set_long_term(&mut self, long_term: bool) {
        if self.long_term != long_term {
            log::debug!(
                "Set long_term of POC {} (layer {}) to {}",
                self.poc,
                self.layer_id,
                long_term
            );
        }

        self.long_term = long_term;
    }

    pub fn set_reference(&mut self, reference: Reference) {
        self.set_referenced(!matches!(reference, Reference::None));
        self.set_long_term(matches!(reference, Reference::LongTerm));
    }

    pub fn reference(&self) -> Reference {
        match (self.referenced, self.long_term) {
            (false, _) => Reference::None,
            (true, false) => Reference::ShortTerm,
            (true, true) => Reference::LongTerm,
        }
    }

    /// POC with only the LSBs of the SPS the picture was coded with.
    pub fn poc_lsb(&self) -> i32 {
        self.poc & poc_mask(self.bits_for_poc)
    }
}

/// Mask selecting the POC bits available without MSB information.
pub fn poc_mask(bits_for_poc: u32) -> i32 {
    // bits_for_poc never exceeds 16 in a conforming SPS.
    ((1i64 << bits_for_poc.min(31)) - 1) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_view() {
        let mut pic = PictureData {
            poc: 300,
            ..Default::default()
        };
        assert_eq!(pic.reference(), Reference::None);

        pic.set_reference(Reference::LongTerm);
        assert!(pic.is_ref());
        assert!(pic.is_long_term());
        assert_eq!(pic.reference(), Reference::LongTerm);

        // Unmarking leaves the long-term flag alone.
        pic.set_referenced(false);
        assert!(pic.is_long_term());
        assert_eq!(pic.reference(), Reference::None);

        assert_eq!(pic.poc_lsb(), 300 & 0xff);
        assert_eq!(poc_mask(4), 0xf);
    }
}
