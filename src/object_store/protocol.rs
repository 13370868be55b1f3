// Copyright 2019 Dmitry Tantsur <divius.inside@gmail.com>
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Wire structures for the grace object: the 16-byte data payload and the
//! one-byte node-map flags blob.

use std::fmt;

/// The data payload of the grace object: the current epoch `C` and the
/// reclaim epoch `R`, each a little-endian u64.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraceData {
    /// Current epoch. Always >= 1.
    pub current_epoch: u64,
    /// Reclaim epoch. `0` means no grace period is in force.
    pub reclaim_epoch: u64,
}

impl GraceData {
    /// The initial state of a freshly created grace object.
    pub const INITIAL: GraceData = GraceData {
        current_epoch: 1,
        reclaim_epoch: 0,
    };

    /// Encode as the 16-byte wire payload.
    pub fn encode(&self) -> [u8; 16] {
        let mut buf = [0u8; 16];
        buf[0..8].copy_from_slice(&self.current_epoch.to_le_bytes());
        buf[8..16].copy_from_slice(&self.reclaim_epoch.to_le_bytes());
        buf
    }

    /// Decode from the wire payload. Fails if `bytes` is not exactly 16
    /// bytes long.
    pub fn decode(bytes: &[u8]) -> Result<GraceData, ProtocolError> {
        if bytes.len() != 16 {
            return Err(ProtocolError::BadPayloadSize(bytes.len()));
        }
        let mut c = [0u8; 8];
        let mut r = [0u8; 8];
        c.copy_from_slice(&bytes[0..8]);
        r.copy_from_slice(&bytes[8..16]);
        Ok(GraceData {
            current_epoch: u64::from_le_bytes(c),
            reclaim_epoch: u64::from_le_bytes(r),
        })
    }

    /// Whether a grace period is currently in force.
    pub fn grace_in_force(&self) -> bool {
        self.reclaim_epoch > 0
    }
}

/// Failure decoding the grace object's wire state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Data payload was not exactly 16 bytes.
    BadPayloadSize(usize),
    /// The node map held more entries than the configured cap.
    NodeMapOverflow(usize),
    /// `R == 0` but the node map was non-empty.
    NonEmptyMapWithoutGrace,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ProtocolError::BadPayloadSize(n) => {
                write!(f, "data payload is {} bytes, expected 16", n)
            }
            ProtocolError::NodeMapOverflow(n) => {
                write!(f, "node map scan found more than {} entries", n)
            }
            ProtocolError::NonEmptyMapWithoutGrace => {
                write!(f, "R == 0 but the node map is not empty")
            }
        }
    }
}

/// Per-node flags stored in the node-map value blob.
///
/// `M`: member of the cluster. `E`: currently enforcing grace locally.
/// `N`: needs a grace period / still recovering. Hand-rolled rather than
/// pulled from a crate: it is a single byte with three bits used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NodeFlags {
    bits: u8,
}

impl NodeFlags {
    const MEMBER: u8 = 0b0000_0001;
    const ENFORCING: u8 = 0b0000_0010;
    const NEEDS_GRACE: u8 = 0b0000_0100;

    /// The empty flag set (absent key).
    pub const NONE: NodeFlags = NodeFlags { bits: 0 };

    /// Encode as the one-byte value blob.
    pub fn encode(self) -> [u8; 1] {
        [self.bits]
    }

    /// Decode from a value blob. Unknown bits are preserved so a newer
    /// writer's flags are not clobbered by an older reader
    /// (forward-compatible per spec.md Design Notes).
    pub fn decode(bytes: &[u8]) -> NodeFlags {
        NodeFlags {
            bits: bytes.first().copied().unwrap_or(0),
        }
    }

    /// Whether the `M` (member) flag is set.
    pub fn member(self) -> bool {
        self.bits & Self::MEMBER != 0
    }

    /// Whether the `E` (enforcing) flag is set.
    pub fn enforcing(self) -> bool {
        self.bits & Self::ENFORCING != 0
    }

    /// Whether the `N` (needs grace) flag is set.
    pub fn needs_grace(self) -> bool {
        self.bits & Self::NEEDS_GRACE != 0
    }

    /// Set or clear the `M` flag.
    pub fn set_member(&mut self, value: bool) {
        self.set_bit(Self::MEMBER, value);
    }

    /// Set or clear the `E` flag.
    pub fn set_enforcing(&mut self, value: bool) {
        self.set_bit(Self::ENFORCING, value);
    }

    /// Set or clear the `N` flag.
    pub fn set_needs_grace(&mut self, value: bool) {
        self.set_bit(Self::NEEDS_GRACE, value);
    }

    fn set_bit(&mut self, bit: u8, value: bool) {
        if value {
            self.bits |= bit;
        } else {
            self.bits &= !bit;
        }
    }

    /// True iff no flag is set (equivalent to key absence).
    pub fn is_empty(self) -> bool {
        self.bits == 0
    }
}

#[cfg(test)]
mod test {
    use super::{GraceData, NodeFlags, ProtocolError};

    #[test]
    fn test_payload_round_trip() {
        for (c, r) in [(1u64, 0u64), (2, 1), (u64::MAX, u64::MAX - 1)] {
            let data = GraceData {
                current_epoch: c,
                reclaim_epoch: r,
            };
            let decoded = GraceData::decode(&data.encode()).unwrap();
            assert_eq!(decoded.current_epoch, c);
            assert_eq!(decoded.reclaim_epoch, r);
        }
    }

    #[test]
    fn test_payload_bad_size() {
        let err = GraceData::decode(&[0u8; 8]).unwrap_err();
        assert_eq!(err, ProtocolError::BadPayloadSize(8));
    }

    #[test]
    fn test_initial_state() {
        assert_eq!(GraceData::INITIAL.current_epoch, 1);
        assert_eq!(GraceData::INITIAL.reclaim_epoch, 0);
        assert!(!GraceData::INITIAL.grace_in_force());
    }

    #[test]
    fn test_node_flags_round_trip() {
        let mut flags = NodeFlags::NONE;
        assert!(flags.is_empty());
        flags.set_member(true);
        flags.set_needs_grace(true);
        let decoded = NodeFlags::decode(&flags.encode());
        assert!(decoded.member());
        assert!(!decoded.enforcing());
        assert!(decoded.needs_grace());
    }

    #[test]
    fn test_node_flags_decode_empty() {
        let flags = NodeFlags::decode(&[]);
        assert!(flags.is_empty());
    }
}
