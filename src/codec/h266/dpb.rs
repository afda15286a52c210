// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use thiserror::Error;

use crate::codec::h266::picture::poc_mask;
use crate::codec::h266::picture::PictureData;
use crate::codec::h266::picture::Reference;

/// Default capacity of the DPB.
pub const MAX_DPB_SIZE: usize = 16;

/// Operations the DPB delegates to the backend object of a picture.
pub trait PictureBuffer {
    /// Pads the samples beyond the picture edges so that the picture can be
    /// used as a motion compensation source.
    fn extend_border(&mut self);
    /// Drops the hash based duplicate detection state of the picture.
    fn clear_hash_map(&mut self);
}

/// Handle to a DPB slot. Becomes stale once the picture is removed, even if
/// the slot is later reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PicHandle {
    index: u32,
    generation: u32,
}

#[derive(Debug, Error)]
pub enum DpbError {
    #[error("can't add a picture to the DPB: DPB is full ({0} pictures)")]
    Full(usize),
    #[error("stale or unknown picture handle {0:?}")]
    StaleHandle(PicHandle),
}

/// A picture stored in the DPB.
///
/// `pic` holds the reference tracking state, `buffer` is the backend object
/// of the frame.
#[derive(Clone, Debug)]
pub struct DpbEntry<T> {
    pub pic: PictureData,
    pub buffer: T,
}

struct Slot<T> {
    generation: u32,
    entry: Option<DpbEntry<T>>,
}

pub struct Dpb<T> {
    /// Slot table. Pictures never move between slots while stored.
    slots: Vec<Slot<T>>,
    /// The maximum number of pictures that can be stored.
    max_num_pics: usize,
}

impl<T> Dpb<T> {
    pub fn new(max_num_pics: usize) -> Self {
        Self {
            slots: Default::default(),
            max_num_pics,
        }
    }

    /// Returns an iterator over the stored entries and their handles.
    pub fn entries(&self) -> impl Iterator<Item = (PicHandle, &DpbEntry<T>)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.entry.as_ref().map(|entry| {
                (
                    PicHandle {
                        index: index as u32,
                        generation: slot.generation,
                    },
                    entry,
                )
            })
        })
    }

    pub fn entries_mut(&mut self) -> impl Iterator<Item = (PicHandle, &mut DpbEntry<T>)> {
        self.slots.iter_mut().enumerate().filter_map(|(index, slot)| {
            let generation = slot.generation;
            slot.entry.as_mut().map(|entry| {
                (
                    PicHandle {
                        index: index as u32,
                        generation,
                    },
                    entry,
                )
            })
        })
    }

    /// Returns an iterator over the underlying H266 pictures stored in the
    /// DPB.
    pub fn pictures(&self) -> impl Iterator<Item = &PictureData> {
        self.entries().map(|(_, e)| &e.pic)
    }

    /// Returns a mutable iterator over the underlying H266 pictures stored in
    /// the DPB.
    pub fn pictures_mut(&mut self) -> impl Iterator<Item = &mut PictureData> {
        self.entries_mut().map(|(_, e)| &mut e.pic)
    }

    pub fn get(&self, handle: PicHandle) -> Option<&DpbEntry<T>> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)?
            .entry
            .as_ref()
    }

    pub fn get_mut(&mut self, handle: PicHandle) -> Option<&mut DpbEntry<T>> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)?
            .entry
            .as_mut()
    }

    pub fn picture(&self, handle: PicHandle) -> Option<&PictureData> {
        self.get(handle).map(|e| &e.pic)
    }

    pub fn picture_mut(&mut self, handle: PicHandle) -> Option<&mut PictureData> {
        self.get_mut(handle).map(|e| &mut e.pic)
    }

    /// Returns the number of pictures in the DPB.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.entry.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Set the dpb's max num pics.
    pub fn set_max_num_pics(&mut self, max_num_pics: usize) {
        self.max_num_pics = max_num_pics;
    }

    /// Get a reference to the dpb's max num pics.
    pub fn max_num_pics(&self) -> usize {
        self.max_num_pics
    }

    /// Store a picture and its backend object in the DPB.
    pub fn store_picture(&mut self, pic: PictureData, buffer: T) -> Result<PicHandle, DpbError> {
        if self.len() >= self.max_num_pics {
            return Err(DpbError::Full(self.max_num_pics));
        }

        log::debug!(
            "Stored picture POC {} (layer {}), the DPB length is {}",
            pic.poc,
            pic.layer_id,
            self.len()
        );

        let entry = Some(DpbEntry { pic, buffer });
        let index = match self.slots.iter().position(|s| s.entry.is_none()) {
            Some(index) => {
                self.slots[index].entry = entry;
                index
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    entry,
                });
                self.slots.len() - 1
            }
        };

        Ok(PicHandle {
            index: index as u32,
            generation: self.slots[index].generation,
        })
    }

    /// Removes a picture from the DPB. Used by the output process once a
    /// picture is neither referenced nor waiting for output.
    pub fn remove(&mut self, handle: PicHandle) -> Result<DpbEntry<T>, DpbError> {
        let slot = self
            .slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .ok_or(DpbError::StaleHandle(handle))?;
        let entry = slot.entry.take().ok_or(DpbError::StaleHandle(handle))?;
        slot.generation = slot.generation.wrapping_add(1);

        log::debug!("Removed picture POC {} from the DPB", entry.pic.poc);
        Ok(entry)
    }

    /// Clears the DPB, dropping all the pictures. Outstanding handles become
    /// stale.
    pub fn clear(&mut self) {
        log::debug!("Clearing the DPB");

        for slot in self.slots.iter_mut() {
            if slot.entry.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1);
            }
        }
    }

    /// Mark all pictures in the DPB as unused for reference.
    pub fn mark_all_as_unused_for_ref(&mut self) {
        for pic in self.pictures_mut() {
            pic.set_reference(Reference::None);
        }
    }

    /// Finds the picture of `layer_id` with POC `poc`.
    ///
    /// Pictures of an earlier CVS waiting for output can share the POC of a
    /// new one, so a picture marked as used for reference wins over other
    /// matches. An unreferenced match is only returned when there is no
    /// referenced one.
    pub fn find_ref_pic(&self, poc: i32, layer_id: u8) -> Option<PicHandle> {
        let mut candidates = self
            .entries()
            .filter(|(_, e)| e.pic.poc == poc && e.pic.layer_id == layer_id);

        let first = candidates.next();
        let handle = match first {
            Some((_, e)) if e.pic.is_ref() => first,
            _ => candidates.find(|(_, e)| e.pic.is_ref()).or(first),
        }
        .map(|(h, _)| h);

        log::debug!(
            "find_ref_pic: POC {} layer {}, found {:?}",
            poc,
            layer_id,
            handle
        );
        handle
    }

    /// Finds a long-term reference candidate for `poc`.
    ///
    /// Without MSB information only the POC LSBs are compared. The current
    /// picture and unreferenced pictures are never returned. A picture
    /// already marked as long-term wins over other matches, otherwise the
    /// first match is returned.
    pub fn find_long_term_ref_pic(
        &self,
        poc: i32,
        poc_has_msb: bool,
        layer_id: u8,
        cur_poc: i32,
        bits_for_poc: u32,
    ) -> Option<PicHandle> {
        let mask = poc_mask(bits_for_poc);
        let masked = |poc: i32| if poc_has_msb { poc } else { poc & mask };
        let target = masked(poc);

        let mut candidates = self.entries().filter(|(_, e)| {
            let pic = &e.pic;
            pic.poc != cur_poc
                && pic.is_ref()
                && pic.layer_id == layer_id
                && masked(pic.poc) == target
        });

        let first = candidates.next();
        let handle = match first {
            Some((_, e)) if e.pic.is_long_term() => first,
            _ => candidates
                .find(|(_, e)| e.pic.is_long_term())
                .or(first),
        }
        .map(|(h, _)| h);

        log::debug!(
            "find_long_term_ref_pic: POC {} (msb: {}) layer {}, found {:?}",
            poc,
            poc_has_msb,
            layer_id,
            handle
        );
        handle
    }

    /// Handles of all stored pictures in increasing POC order.
    pub fn sorted_by_poc(&self) -> Vec<PicHandle> {
        let mut handles = self
            .entries()
            .map(|(h, e)| (e.pic.poc, h))
            .collect::<Vec<_>>();
        handles.sort_by_key(|&(poc, _)| poc);
        handles.into_iter().map(|(_, h)| h).collect()
    }
}

impl<T> Default for Dpb<T> {
    fn default() -> Self {
        Self::new(MAX_DPB_SIZE)
    }
}

impl<T> std::fmt::Debug for Dpb<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pics = self.entries().map(|(h, e)| (h, &e.pic)).collect::<Vec<_>>();
        f.debug_struct("Dpb")
            .field("pictures", &pics)
            .field("max_num_pics", &self.max_num_pics)
            .finish()
    }
}
