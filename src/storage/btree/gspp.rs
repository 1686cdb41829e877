//! Generation-safe pointer pairs.
//!
//! A pointer field is two 12-byte slots, each `generation:u32 | pointer:u48 |
//! checksum:u16`, all big-endian. Writers only ever overwrite the slot that
//! is not the current truth, so a torn write leaves the other slot intact.
//! The stored pointer is the page id plus one; zero means "no node".

use std::fmt;

use crate::primitives::pager::{PageCursor, PageWrite};
use crate::types::{pointer_checksum, Generation, PageId, Result, TreeError};

/// Bytes in one slot.
pub const SLOT_SIZE: usize = 12;
/// Bytes in a full pointer pair.
pub const GSPP_SIZE: usize = 2 * SLOT_SIZE;

const GENERATION_LEN: usize = 4;
const POINTER_LEN: usize = 6;
const MAX_POINTER: u64 = (1 << 48) - 1;

/// Classification of one slot against the stable/unstable boundary.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SlotState {
    /// Never written.
    Empty,
    /// Checksum mismatch or a generation below [`Generation::MIN`].
    Broken,
    /// Written by a completed generation.
    Stable,
    /// Written by the in-flight generation.
    Unstable,
    /// Checksum holds but the generation is newer than anything in flight.
    Crash,
}

impl SlotState {
    /// Empty, stable and unstable slots can be trusted.
    pub fn is_ok(self) -> bool {
        matches!(self, SlotState::Empty | SlotState::Stable | SlotState::Unstable)
    }

    /// Upper-case name used in defect messages.
    pub fn name(self) -> &'static str {
        match self {
            SlotState::Empty => "EMPTY",
            SlotState::Broken => "BROKEN",
            SlotState::Stable => "STABLE",
            SlotState::Unstable => "UNSTABLE",
            SlotState::Crash => "CRASH",
        }
    }
}

impl fmt::Display for SlotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One decoded slot, checksum verified lazily.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Slot {
    /// Generation the slot was written at.
    pub generation: u64,
    /// Stored pointer: page id plus one, zero for no node.
    pub pointer: u64,
    /// Checksum as stored on the page.
    pub checksum: u16,
}

impl Slot {
    /// Builds a correctly checksummed slot pointing at `target`.
    pub fn new(generation: Generation, target: Option<PageId>) -> Result<Self> {
        if generation > Generation::MAX {
            return Err(TreeError::Invalid("pointer generation exceeds 32 bits"));
        }
        let pointer = encode_pointer(target)?;
        Ok(Self {
            generation: generation.0,
            pointer,
            checksum: pointer_checksum(generation.0, pointer),
        })
    }

    /// Decodes 12 raw bytes.
    pub fn decode(raw: &[u8; SLOT_SIZE]) -> Self {
        let mut gen = [0u8; 4];
        gen.copy_from_slice(&raw[..GENERATION_LEN]);
        let mut ptr = [0u8; 8];
        ptr[2..].copy_from_slice(&raw[GENERATION_LEN..GENERATION_LEN + POINTER_LEN]);
        Self {
            generation: u32::from_be_bytes(gen) as u64,
            pointer: u64::from_be_bytes(ptr),
            checksum: u16::from_be_bytes([raw[10], raw[11]]),
        }
    }

    /// Encodes to 12 raw bytes; fields are truncated to their on-page widths.
    pub fn encode(&self) -> [u8; SLOT_SIZE] {
        let mut raw = [0u8; SLOT_SIZE];
        raw[..GENERATION_LEN].copy_from_slice(&(self.generation as u32).to_be_bytes());
        raw[GENERATION_LEN..GENERATION_LEN + POINTER_LEN]
            .copy_from_slice(&self.pointer.to_be_bytes()[2..]);
        raw[10..].copy_from_slice(&self.checksum.to_be_bytes());
        raw
    }

    /// Page this slot names, if any.
    pub fn page(&self) -> Option<PageId> {
        self.pointer.checked_sub(1).map(PageId)
    }

    /// Classifies the slot.
    pub fn state(&self, stable: Generation, unstable: Generation) -> SlotState {
        if self.generation == 0 && self.pointer == 0 {
            return SlotState::Empty;
        }
        if pointer_checksum(self.generation, self.pointer) != self.checksum {
            return SlotState::Broken;
        }
        if self.generation < Generation::MIN.0 {
            return SlotState::Broken;
        }
        if self.generation <= stable.0 {
            SlotState::Stable
        } else if self.generation == unstable.0 {
            SlotState::Unstable
        } else {
            SlotState::Crash
        }
    }

    fn describe(&self, state: SlotState) -> String {
        format!(
            "generation={}, pointer={}, state={}",
            self.generation, self.pointer, state
        )
    }
}

/// Stored pointer value for `target`.
pub fn encode_pointer(target: Option<PageId>) -> Result<u64> {
    match target {
        None => Ok(0),
        Some(page) if page.0 < MAX_POINTER => Ok(page.0 + 1),
        Some(_) => Err(TreeError::Invalid("page id does not fit a 48-bit pointer")),
    }
}

/// Which of the two slots.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SlotId {
    /// First slot, at the field offset.
    A,
    /// Second slot, right after A.
    B,
}

impl SlotId {
    fn offset(self, field: usize) -> usize {
        match self {
            SlotId::A => field,
            SlotId::B => field + SLOT_SIZE,
        }
    }
}

/// Why a pair with at least one trustworthy slot still has no single answer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PairFault {
    /// Neither slot is empty, stable or unstable.
    NoValidSlot,
    /// Both slots claim the in-flight generation.
    BothUnstable,
    /// Two stable slots share a generation but disagree on the pointer.
    StableConflict,
}

/// The pointer a pair resolves to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Pointer {
    /// The field names no page.
    NoNode,
    /// The field names `page`, promising it is no newer than `generation`.
    Node {
        /// Target page.
        page: PageId,
        /// Generation of the winning slot.
        generation: Generation,
    },
    /// The field cannot be trusted.
    Corrupt(PairFault),
}

impl Pointer {
    /// Target page, if the pointer names one.
    pub fn page(&self) -> Option<PageId> {
        match self {
            Pointer::Node { page, .. } => Some(*page),
            _ => None,
        }
    }
}

/// Both slots of a field as read from the page.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PointerPair {
    /// Slot A.
    pub a: Slot,
    /// Slot B.
    pub b: Slot,
}

impl PointerPair {
    /// Reads the pair at `offset`; bounds are latched on the cursor.
    pub fn read(cursor: &mut PageCursor<'_>, offset: usize) -> Self {
        let mut raw = [0u8; SLOT_SIZE];
        cursor.get_bytes(offset, &mut raw);
        let a = Slot::decode(&raw);
        cursor.get_bytes(offset + SLOT_SIZE, &mut raw);
        let b = Slot::decode(&raw);
        Self { a, b }
    }

    /// Classifies both slots.
    pub fn states(&self, stable: Generation, unstable: Generation) -> (SlotState, SlotState) {
        (self.a.state(stable, unstable), self.b.state(stable, unstable))
    }

    /// True when at least one slot can be trusted.
    pub fn has_ok_slot(&self, stable: Generation, unstable: Generation) -> bool {
        let (a, b) = self.states(stable, unstable);
        a.is_ok() || b.is_ok()
    }

    /// Picks the slot readers should follow.
    pub fn resolve(&self, stable: Generation, unstable: Generation) -> Pointer {
        let (state_a, state_b) = self.states(stable, unstable);
        let winner = match (state_a, state_b) {
            (SlotState::Unstable, SlotState::Unstable) => {
                return Pointer::Corrupt(PairFault::BothUnstable)
            }
            (SlotState::Unstable, _) => &self.a,
            (_, SlotState::Unstable) => &self.b,
            (SlotState::Stable, SlotState::Stable) => {
                if self.a.generation == self.b.generation {
                    if self.a.pointer != self.b.pointer {
                        return Pointer::Corrupt(PairFault::StableConflict);
                    }
                    &self.a
                } else if self.a.generation > self.b.generation {
                    &self.a
                } else {
                    &self.b
                }
            }
            (SlotState::Stable, _) => &self.a,
            (_, SlotState::Stable) => &self.b,
            (a, b) if a.is_ok() || b.is_ok() => return Pointer::NoNode,
            _ => return Pointer::Corrupt(PairFault::NoValidSlot),
        };
        match winner.page() {
            Some(page) => Pointer::Node {
                page,
                generation: Generation(winner.generation),
            },
            None => Pointer::NoNode,
        }
    }

    /// Renders both slots for a defect message.
    pub fn describe(&self, stable: Generation, unstable: Generation) -> String {
        let (state_a, state_b) = self.states(stable, unstable);
        format!(
            "slotA[{}] slotB[{}]",
            self.a.describe(state_a),
            self.b.describe(state_b)
        )
    }

    fn slot_to_overwrite(&self, stable: Generation, unstable: Generation) -> SlotId {
        let (state_a, state_b) = self.states(stable, unstable);
        match (state_a, state_b) {
            (SlotState::Unstable, _) => SlotId::A,
            (_, SlotState::Unstable) => SlotId::B,
            (SlotState::Stable, SlotState::Stable) => {
                if self.a.generation > self.b.generation {
                    SlotId::B
                } else {
                    SlotId::A
                }
            }
            (SlotState::Stable, _) => SlotId::B,
            _ => SlotId::A,
        }
    }
}

/// Points the field at `offset` to `target` as a writer in `unstable`.
///
/// The current truth is left untouched: an unstable slot is rewritten in
/// place, otherwise the older of the two slots is replaced.
pub fn write_pointer(
    page: &mut PageWrite,
    offset: usize,
    target: Option<PageId>,
    stable: Generation,
    unstable: Generation,
) -> Result<()> {
    let mut raw = [0u8; SLOT_SIZE];
    page.get_bytes(offset, &mut raw)?;
    let a = Slot::decode(&raw);
    page.get_bytes(offset + SLOT_SIZE, &mut raw)?;
    let b = Slot::decode(&raw);
    let which = PointerPair { a, b }.slot_to_overwrite(stable, unstable);
    write_slot(page, offset, which, &Slot::new(unstable, target)?)
}

/// Overwrites one slot verbatim, checksum included.
pub fn write_slot(page: &mut PageWrite, offset: usize, which: SlotId, slot: &Slot) -> Result<()> {
    page.put_bytes(which.offset(offset), &slot.encode())
}

#[cfg(test)]
mod tests {
    use super::*;

    const STABLE: Generation = Generation(5);
    const UNSTABLE: Generation = Generation(6);

    fn slot(generation: u64, page: Option<u64>) -> Slot {
        Slot::new(Generation(generation), page.map(PageId)).expect("slot")
    }

    fn pair(a: Slot, b: Slot) -> PointerPair {
        PointerPair { a, b }
    }

    #[test]
    fn slot_bytes_round_trip() {
        let original = slot(0xABCD_0123, Some(0x0000_1234_5678));
        let decoded = Slot::decode(&original.encode());
        assert_eq!(decoded, original);
        assert_eq!(decoded.page(), Some(PageId(0x1234_5678)));
    }

    #[test]
    fn slot_states() {
        assert_eq!(Slot::decode(&[0; SLOT_SIZE]).state(STABLE, UNSTABLE), SlotState::Empty);
        assert_eq!(slot(3, Some(1)).state(STABLE, UNSTABLE), SlotState::Stable);
        assert_eq!(slot(5, None).state(STABLE, UNSTABLE), SlotState::Stable);
        assert_eq!(slot(6, Some(1)).state(STABLE, UNSTABLE), SlotState::Unstable);
        assert_eq!(slot(9, Some(1)).state(STABLE, UNSTABLE), SlotState::Crash);

        let mut torn = slot(3, Some(1));
        torn.checksum ^= 0x0101;
        assert_eq!(torn.state(STABLE, UNSTABLE), SlotState::Broken);

        let zero_gen = Slot {
            generation: 0,
            pointer: 4,
            checksum: pointer_checksum(0, 4),
        };
        assert_eq!(zero_gen.state(STABLE, UNSTABLE), SlotState::Broken);
    }

    #[test]
    fn unstable_slot_wins() {
        let p = pair(slot(4, Some(1)), slot(6, Some(2)));
        assert_eq!(
            p.resolve(STABLE, UNSTABLE),
            Pointer::Node {
                page: PageId(2),
                generation: UNSTABLE
            }
        );
        let both = pair(slot(6, Some(1)), slot(6, Some(2)));
        assert_eq!(
            both.resolve(STABLE, UNSTABLE),
            Pointer::Corrupt(PairFault::BothUnstable)
        );
    }

    #[test]
    fn newest_stable_slot_wins() {
        let p = pair(slot(5, Some(7)), slot(2, Some(3)));
        assert_eq!(p.resolve(STABLE, UNSTABLE).page(), Some(PageId(7)));
        let same = pair(slot(4, Some(7)), slot(4, Some(7)));
        assert_eq!(same.resolve(STABLE, UNSTABLE).page(), Some(PageId(7)));
        let clash = pair(slot(4, Some(7)), slot(4, Some(8)));
        assert_eq!(
            clash.resolve(STABLE, UNSTABLE),
            Pointer::Corrupt(PairFault::StableConflict)
        );
    }

    #[test]
    fn broken_slot_is_tolerated_when_partner_is_ok() {
        let mut broken = slot(5, Some(7));
        broken.checksum ^= 1;
        let good = slot(4, Some(9));
        let p = pair(broken, good);
        assert!(p.has_ok_slot(STABLE, UNSTABLE));
        assert_eq!(p.resolve(STABLE, UNSTABLE).page(), Some(PageId(9)));

        let empty_and_crash = pair(Slot::decode(&[0; SLOT_SIZE]), slot(9, Some(1)));
        assert_eq!(empty_and_crash.resolve(STABLE, UNSTABLE), Pointer::NoNode);

        let hopeless = pair(broken, slot(9, Some(1)));
        assert!(!hopeless.has_ok_slot(STABLE, UNSTABLE));
        assert_eq!(
            hopeless.resolve(STABLE, UNSTABLE),
            Pointer::Corrupt(PairFault::NoValidSlot)
        );
        let text = hopeless.describe(STABLE, UNSTABLE);
        assert!(text.contains("state=BROKEN"));
        assert!(text.contains("generation=9, pointer=2, state=CRASH"));
    }

    #[test]
    fn pointer_encoding_limits() {
        assert_eq!(encode_pointer(None).unwrap(), 0);
        assert_eq!(encode_pointer(Some(PageId(0))).unwrap(), 1);
        assert!(encode_pointer(Some(PageId(MAX_POINTER))).is_err());
        assert!(Slot::new(Generation(u32::MAX as u64 + 1), None).is_err());
    }
}
