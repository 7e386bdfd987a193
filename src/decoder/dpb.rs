//! DPB slot management for H.264 decoding.
//!
//! Reference pictures live in a most-recent-first deque holding at most
//! `num_dpb_slots - 1` entries. Each decode works on a copy of that deque;
//! [`DpbSlotManager::commit`] swaps the copy into live state once the decode
//! has been recorded, and only when the decoded picture is a reference.

use std::collections::VecDeque;

use tracing::debug;

use super::FrameInfo;
use crate::error::{PixelReelError, Result};

/// `slotIndex` value meaning "no picture associated with this slot".
pub const NO_REFERENCE_SLOT: i32 = -1;

/// Per-picture data the engine needs to use a picture as a reference
/// (`StdVideoDecodeH264ReferenceInfo`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReferenceInfo {
    pub frame_num: u32,
    /// Top and bottom field order counts. Both carry the picture's POC.
    pub pic_order_cnt: [i32; 2],
    pub top_field_flag: bool,
    pub bottom_field_flag: bool,
}

impl ReferenceInfo {
    pub fn from_frame(info: &FrameInfo) -> Self {
        let slice = &info.slice_header;
        Self {
            frame_num: slice.frame_num,
            pic_order_cnt: [info.poc, info.poc],
            top_field_flag: slice.field_pic_flag && !slice.bottom_field_flag,
            bottom_field_flag: slice.field_pic_flag && slice.bottom_field_flag,
        }
    }
}

/// One live reference picture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DpbEntry {
    /// DPB image slot holding the picture.
    pub slot_index: u32,
    pub frame_num: u32,
    pub reference_info: ReferenceInfo,
}

/// Association between a DPB image slot and a reference picture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotBinding {
    /// DPB image bound by this entry.
    pub slot: u32,
    /// Active slot index, or [`NO_REFERENCE_SLOT`].
    pub slot_index: i32,
    pub reference_info: Option<ReferenceInfo>,
}

impl SlotBinding {
    pub fn is_active(&self) -> bool {
        self.slot_index != NO_REFERENCE_SLOT
    }
}

/// Everything the engine needs to decode one picture against the DPB.
#[derive(Debug, Clone)]
pub struct DecodeSetup {
    /// Slot receiving the reconstructed picture.
    pub target_slot: u32,
    /// One binding per DPB slot for the coding session scope.
    pub session_bindings: Vec<SlotBinding>,
    /// Binding of the reconstructed picture.
    pub setup_slot: SlotBinding,
    /// Active references, most recent first.
    pub references: Vec<SlotBinding>,
    pub is_reference: bool,
    pending: VecDeque<DpbEntry>,
}

impl DecodeSetup {
    /// Deque that becomes live if this setup is committed.
    pub fn pending_entries(&self) -> &VecDeque<DpbEntry> {
        &self.pending
    }
}

/// Sliding window of reference pictures and the next target slot.
#[derive(Debug, Clone)]
pub struct DpbSlotManager {
    num_dpb_slots: u32,
    entries: VecDeque<DpbEntry>,
    target_slot: u32,
}

impl DpbSlotManager {
    pub fn new(num_dpb_slots: u32) -> Result<Self> {
        if num_dpb_slots == 0 {
            return Err(PixelReelError::InvalidConfig(
                "DPB needs at least one slot".to_string(),
            ));
        }
        Ok(Self {
            num_dpb_slots,
            entries: VecDeque::with_capacity(num_dpb_slots as usize),
            target_slot: 0,
        })
    }

    pub fn num_dpb_slots(&self) -> u32 {
        self.num_dpb_slots
    }

    /// Live reference pictures, most recent first.
    pub fn entries(&self) -> &VecDeque<DpbEntry> {
        &self.entries
    }

    pub fn target_slot(&self) -> u32 {
        self.target_slot
    }

    /// Maximum number of live references.
    pub fn capacity(&self) -> usize {
        self.num_dpb_slots as usize - 1
    }

    /// Plan the decode of `info` without touching live state.
    ///
    /// An IDR picture starts from an empty deque and slot 0.
    pub fn prepare(&self, info: &FrameInfo) -> DecodeSetup {
        let (mut pending, target_slot) = if info.is_idr() {
            (VecDeque::new(), 0)
        } else {
            (self.entries.clone(), self.target_slot)
        };

        let n = self.num_dpb_slots;
        let mut session_bindings = vec![
            SlotBinding {
                slot: 0,
                slot_index: NO_REFERENCE_SLOT,
                reference_info: None,
            };
            n as usize
        ];
        session_bindings[target_slot as usize].slot = target_slot;
        for i in 1..n {
            let slot = (i + target_slot) % n;
            session_bindings[slot as usize] = SlotBinding {
                slot,
                slot_index: if (slot as usize) <= pending.len() {
                    slot as i32
                } else {
                    NO_REFERENCE_SLOT
                },
                reference_info: None,
            };
        }

        let references = pending
            .iter()
            .map(|entry| SlotBinding {
                slot: entry.slot_index,
                slot_index: entry.slot_index as i32,
                reference_info: Some(entry.reference_info),
            })
            .collect();

        let reference_info = ReferenceInfo::from_frame(info);
        let setup_slot = SlotBinding {
            slot: target_slot,
            slot_index: target_slot as i32,
            reference_info: Some(reference_info),
        };

        let is_reference = info.is_reference();
        if is_reference {
            pending.push_front(DpbEntry {
                slot_index: target_slot,
                frame_num: info.slice_header.frame_num,
                reference_info,
            });
            pending.truncate(self.capacity());
        }

        DecodeSetup {
            target_slot,
            session_bindings,
            setup_slot,
            references,
            is_reference,
            pending,
        }
    }

    /// Make a recorded decode's reference update live.
    ///
    /// Non-reference pictures leave the deque and the target slot untouched,
    /// so the next decode reuses the same slot.
    pub fn commit(&mut self, setup: DecodeSetup) {
        if !setup.is_reference {
            return;
        }
        self.entries = setup.pending;
        self.target_slot = (setup.target_slot + 1) % self.num_dpb_slots;
        debug!(
            "DPB: {} live references, next target slot {}",
            self.entries.len(),
            self.target_slot
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::slice::SliceHeader;
    use crate::decoder::FrameType;

    fn frame(idr: bool, nal_ref_idc: u8, frame_num: u32, poc: i32) -> FrameInfo {
        FrameInfo {
            frame_type: if idr {
                FrameType::Intra
            } else {
                FrameType::Predictive
            },
            nal_unit_type: if idr { 5 } else { 1 },
            nal_ref_idc,
            poc,
            slice_header: SliceHeader {
                frame_num,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn decode(dpb: &mut DpbSlotManager, info: &FrameInfo) -> DecodeSetup {
        let setup = dpb.prepare(info);
        dpb.commit(setup.clone());
        setup
    }

    #[test]
    fn test_zero_slots_rejected() {
        assert!(matches!(
            DpbSlotManager::new(0),
            Err(PixelReelError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_prepare_does_not_touch_live_state() {
        let mut dpb = DpbSlotManager::new(5).unwrap();
        decode(&mut dpb, &frame(true, 3, 0, 0));

        let before = dpb.entries().clone();
        let setup = dpb.prepare(&frame(false, 2, 1, 2));
        assert_eq!(setup.pending_entries().len(), 2);
        assert_eq!(dpb.entries(), &before);
        assert_eq!(dpb.target_slot(), 1);
    }

    #[test]
    fn test_reference_sequence_and_non_reference_skip() {
        let mut dpb = DpbSlotManager::new(21).unwrap();

        let idr = decode(&mut dpb, &frame(true, 1, 0, 0));
        assert_eq!(idr.target_slot, 0);
        assert!(idr.references.is_empty());

        let p1 = decode(&mut dpb, &frame(false, 1, 1, 2));
        assert_eq!(p1.target_slot, 1);
        assert_eq!(p1.references.len(), 1);
        assert_eq!(p1.references[0].slot_index, 0);

        let non_ref = decode(&mut dpb, &frame(false, 0, 2, 4));
        assert_eq!(non_ref.target_slot, 2);
        assert_eq!(dpb.entries().len(), 2);
        assert_eq!(dpb.target_slot(), 2);

        let p3 = decode(&mut dpb, &frame(false, 1, 2, 6));
        assert_eq!(p3.target_slot, 2);
        let slots: Vec<u32> = dpb.entries().iter().map(|e| e.slot_index).collect();
        assert_eq!(slots, vec![2, 1, 0]);

        let second_idr = decode(&mut dpb, &frame(true, 1, 0, 0));
        assert_eq!(second_idr.target_slot, 0);
        assert!(second_idr.references.is_empty());
        assert_eq!(dpb.entries().len(), 1);
        assert_eq!(dpb.target_slot(), 1);
    }

    #[test]
    fn test_deque_truncates_oldest() {
        let mut dpb = DpbSlotManager::new(3).unwrap();
        decode(&mut dpb, &frame(true, 3, 0, 0));
        for n in 1..6 {
            decode(&mut dpb, &frame(false, 2, n, 2 * n as i32));
            assert!(dpb.entries().len() <= dpb.capacity());
        }
        let frame_nums: Vec<u32> = dpb.entries().iter().map(|e| e.frame_num).collect();
        assert_eq!(frame_nums, vec![5, 4]);
        // Targets cycle 0, 1, 2, 0, 1, 2.
        assert_eq!(dpb.target_slot(), 0);
    }

    #[test]
    fn test_session_bindings_follow_target() {
        let mut dpb = DpbSlotManager::new(4).unwrap();
        decode(&mut dpb, &frame(true, 3, 0, 0));
        decode(&mut dpb, &frame(false, 2, 1, 2));

        let setup = dpb.prepare(&frame(false, 2, 2, 4));
        assert_eq!(setup.target_slot, 2);
        let indices: Vec<i32> = setup.session_bindings.iter().map(|b| b.slot_index).collect();
        // Target slot 2 unbound, slots 0 and 1 active, slot 3 beyond the deque.
        assert_eq!(indices, vec![0, 1, NO_REFERENCE_SLOT, NO_REFERENCE_SLOT]);
        for (slot, binding) in setup.session_bindings.iter().enumerate() {
            assert_eq!(binding.slot as usize, slot);
        }
        assert_eq!(setup.setup_slot.slot_index, 2);
        assert!(setup.setup_slot.is_active());
    }

    #[test]
    fn test_idr_resets_target_and_bindings() {
        let mut dpb = DpbSlotManager::new(4).unwrap();
        decode(&mut dpb, &frame(true, 3, 0, 0));
        decode(&mut dpb, &frame(false, 2, 1, 2));
        decode(&mut dpb, &frame(false, 2, 2, 4));

        let setup = dpb.prepare(&frame(true, 3, 0, 0));
        assert_eq!(setup.target_slot, 0);
        assert!(setup.references.is_empty());
        let indices: Vec<i32> = setup.session_bindings.iter().map(|b| b.slot_index).collect();
        assert_eq!(indices, vec![NO_REFERENCE_SLOT; 4]);
    }

    #[test]
    fn test_field_reference_flags() {
        let mut info = frame(false, 2, 3, 7);
        info.slice_header.field_pic_flag = true;
        info.slice_header.bottom_field_flag = true;
        let reference = ReferenceInfo::from_frame(&info);
        assert!(reference.bottom_field_flag);
        assert!(!reference.top_field_flag);
        assert_eq!(reference.pic_order_cnt, [7, 7]);
        assert_eq!(reference.frame_num, 3);
    }

    #[test]
    fn test_commit_applies_at_record_time() {
        // The live deque takes the new reference as soon as the setup is
        // committed, before any decode outcome is known.
        let mut dpb = DpbSlotManager::new(5).unwrap();
        let setup = dpb.prepare(&frame(true, 3, 0, 0));
        dpb.commit(setup);
        assert_eq!(dpb.entries().len(), 1);
        assert_eq!(dpb.entries()[0].slot_index, 0);
    }
}
