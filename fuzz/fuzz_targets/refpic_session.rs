#![no_main]

use std::rc::Rc;

use cros_h266::codec::h266::dpb::PictureBuffer;
use cros_h266::codec::h266::parser::NaluType;
use cros_h266::codec::h266::parser::PicHeader;
use cros_h266::codec::h266::parser::Pps;
use cros_h266::codec::h266::parser::Sps;
use cros_h266::codec::h266::rpl::ReferencePictureList;
use cros_h266::codec::h266::rpl::RplEntry;
use cros_h266::codec::h266::slice::Slice;
use cros_h266::codec::h266::slice::SliceType;
use cros_h266::decoder::h266::RefPicSession;
use libfuzzer_sys::fuzz_target;

const MAX_PICS_IN_DPB: usize = 8;

struct NullBuffer;

impl PictureBuffer for NullBuffer {
    fn extend_border(&mut self) {}

    fn clear_hash_map(&mut self) {}
}

/// One byte per entry: the two MSBs select the entry kind.
fn rpl(entries: &[u8], num_active: u8) -> anyhow::Result<ReferencePictureList> {
    let entries = entries
        .iter()
        .map(|&b| match b >> 6 {
            0 | 1 => RplEntry::short_term(i32::from(b & 0x3f) - 16),
            2 => RplEntry::long_term(i32::from(b & 0x3f)),
            _ => RplEntry::inter_layer(usize::from(b & 0x3)),
        })
        .collect::<Vec<_>>();
    let num_active = usize::from(num_active) % (entries.len() + 1);

    ReferencePictureList::new(entries)?.with_num_active(num_active)
}

fuzz_target!(|data: &[u8]| {
    let mut session = RefPicSession::new(Default::default());
    let psm = session.parameter_sets_mut();
    let _ = psm.store_sps(Sps {
        log2_max_pic_order_cnt_lsb_minus4: 4,
        ..Default::default()
    });
    let _ = psm.store_pps(Pps::default());

    let mut poc = 0i32;
    let mut data = data;

    // Each picture: NAL type, POC delta, temporal id, number of entries,
    // number of active entries, then the entries of list 0.
    while data.len() >= 5 {
        let (header, rest) = data.split_at(5);
        let (entries, rest) = rest.split_at(usize::from(header[3] % 8).min(rest.len()));
        data = rest;

        let Some(nalu_type) = NaluType::n(header[0] % 13) else {
            continue;
        };
        poc = poc.wrapping_add(i32::from(header[1] as i8));

        let Ok(list) = rpl(entries, header[4]) else {
            continue;
        };
        let list = Rc::new(list);

        let mut slice = Slice::default();
        slice.poc = poc;
        slice.nalu_type = nalu_type;
        slice.temporal_id = header[2] % 3;
        slice.slice_type = if list.num_active() > 0 {
            SliceType::P
        } else {
            SliceType::I
        };
        slice.num_ref_idx = [list.num_active(), 0];

        // With the top bit of the NAL type byte set, the lists are carried by
        // the slice header instead.
        let pic_rpl_present_flag = header[0] & 0x80 == 0;
        if !pic_rpl_present_flag {
            slice.rpl = [Rc::clone(&list), Default::default()];
        }
        let pic_header = PicHeader {
            pic_output_flag: true,
            pic_rpl_present_flag,
            local_rpl: [list, Default::default()],
            ..Default::default()
        };

        if session
            .begin_picture(&mut slice, &pic_header, NullBuffer)
            .is_err()
        {
            continue;
        }
        if session.handle_slice(&mut slice).is_ok() {
            let _ = session.finish_picture();
        }

        while session.dpb().len() >= MAX_PICS_IN_DPB {
            let Some(handle) = session.dpb().sorted_by_poc().first().copied() else {
                break;
            };
            let _ = session.dpb_mut().remove(handle);
        }
    }
});
