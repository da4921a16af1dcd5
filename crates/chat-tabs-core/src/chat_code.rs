//! Chat channel codes as delivered by the game client.
//!
//! A raw code is a `u16`:
//! - bits 0..7: chat type ([`ChatType`])
//! - bits 7..11: index of the target actor kind
//! - bits 11..15: index of the source actor kind
//!
//! Source and target are single bits of [`ChatSource`] once decoded.

use serde::{Deserialize, Serialize};

macro_rules! chat_types {
    ($($(#[$meta:meta])* $name:ident = $value:literal,)+) => {
        /// Enumerated chat channel.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[repr(u16)]
        pub enum ChatType {
            $($(#[$meta])* $name = $value,)+
        }

        impl ChatType {
            /// Every known chat type, in numeric order.
            pub const ALL: &'static [Self] = &[$(Self::$name,)+];

            /// Decode a chat type number. Unknown numbers yield `None`.
            #[must_use]
            pub const fn from_u16(value: u16) -> Option<Self> {
                match value {
                    $($value => Some(Self::$name),)+
                    _ => None,
                }
            }
        }
    };
}

chat_types! {
    Debug = 1,
    Urgent = 2,
    Notice = 3,
    Say = 10,
    Shout = 11,
    TellOutgoing = 12,
    TellIncoming = 13,
    Party = 14,
    Alliance = 15,
    Linkshell1 = 16,
    Linkshell2 = 17,
    Linkshell3 = 18,
    Linkshell4 = 19,
    Linkshell5 = 20,
    Linkshell6 = 21,
    Linkshell7 = 22,
    Linkshell8 = 23,
    FreeCompany = 24,
    NoviceNetwork = 27,
    CustomEmote = 28,
    StandardEmote = 29,
    Yell = 30,
    CrossParty = 32,
    PvpTeam = 36,
    CrossLinkshell1 = 37,
    Damage = 41,
    Miss = 42,
    Action = 43,
    Item = 44,
    Healing = 45,
    GainBuff = 46,
    GainDebuff = 47,
    LoseBuff = 48,
    LoseDebuff = 49,
    Alarm = 55,
    Echo = 56,
    System = 57,
    BattleSystem = 58,
    GatheringSystem = 59,
    Error = 60,
    NpcDialogue = 61,
    LootNotice = 62,
    Progress = 64,
    LootRoll = 65,
    Crafting = 66,
    Gathering = 67,
    NpcAnnouncement = 68,
    FreeCompanyAnnouncement = 69,
    FreeCompanyLoginLogout = 70,
    RetainerSale = 71,
    PeriodicRecruitmentNotification = 72,
    Sign = 73,
    RandomNumber = 74,
    NoviceNetworkSystem = 75,
    Orchestrion = 76,
    PvpTeamAnnouncement = 77,
    PvpTeamLoginLogout = 78,
    MessageBook = 79,
    CrossLinkshell2 = 101,
    CrossLinkshell3 = 102,
    CrossLinkshell4 = 103,
    CrossLinkshell5 = 104,
    CrossLinkshell6 = 105,
    CrossLinkshell7 = 106,
    CrossLinkshell8 = 107,
}

impl ChatType {
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Incoming or outgoing tell.
    #[must_use]
    pub const fn is_tell(self) -> bool {
        matches!(self, Self::TellIncoming | Self::TellOutgoing)
    }

    /// Types a fresh "General" tab shows: player chat plus the system lines
    /// most players keep visible.
    #[must_use]
    pub const fn is_general_default(self) -> bool {
        matches!(
            self,
            Self::Say
                | Self::Shout
                | Self::TellOutgoing
                | Self::TellIncoming
                | Self::Party
                | Self::Alliance
                | Self::Linkshell1
                | Self::Linkshell2
                | Self::Linkshell3
                | Self::Linkshell4
                | Self::Linkshell5
                | Self::Linkshell6
                | Self::Linkshell7
                | Self::Linkshell8
                | Self::FreeCompany
                | Self::NoviceNetwork
                | Self::CustomEmote
                | Self::StandardEmote
                | Self::Yell
                | Self::CrossParty
                | Self::PvpTeam
                | Self::CrossLinkshell1
                | Self::CrossLinkshell2
                | Self::CrossLinkshell3
                | Self::CrossLinkshell4
                | Self::CrossLinkshell5
                | Self::CrossLinkshell6
                | Self::CrossLinkshell7
                | Self::CrossLinkshell8
                | Self::Echo
                | Self::System
                | Self::Urgent
                | Self::Notice
        )
    }
}

bitflags::bitflags! {
    /// Actor kinds a chat line can originate from (or be aimed at).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct ChatSource: u16 {
        const SELF = 1 << 0;
        const PARTY_MEMBER = 1 << 1;
        const ALLIANCE_MEMBER = 1 << 2;
        const OTHER = 1 << 3;
        const ENGAGED_ENEMY = 1 << 4;
        const UNENGAGED_ENEMY = 1 << 5;
        const FRIENDLY_NPC = 1 << 6;
        const SELF_PET = 1 << 7;
        const PARTY_PET = 1 << 8;
        const ALLIANCE_PET = 1 << 9;
        const OTHER_PET = 1 << 10;
    }
}

impl ChatSource {
    /// Bit index of a single-bit source, as encoded in a raw code.
    #[must_use]
    pub const fn index(self) -> Option<u16> {
        if self.bits().count_ones() == 1 {
            #[allow(clippy::cast_possible_truncation)]
            let index = self.bits().trailing_zeros() as u16;
            Some(index)
        } else {
            None
        }
    }

    #[must_use]
    pub const fn from_index(index: u16) -> Self {
        Self::from_bits_truncate(1 << (index & 0xF))
    }
}

const TYPE_MASK: u16 = 0x7F;
const TARGET_SHIFT: u16 = 7;
const SOURCE_SHIFT: u16 = 11;

/// Raw chat code plus decoders for its parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatCode {
    raw: u16,
}

impl ChatCode {
    #[must_use]
    pub const fn from_raw(raw: u16) -> Self {
        Self { raw }
    }

    /// Compose a code from a type and a single-bit source. Multi-bit or empty
    /// sources fall back to index 0 (`SELF`).
    #[must_use]
    pub const fn new(chat_type: ChatType, source: ChatSource) -> Self {
        let index = match source.index() {
            Some(index) => index,
            None => 0,
        };
        Self {
            raw: (chat_type.as_u16() & TYPE_MASK) | (index << SOURCE_SHIFT),
        }
    }

    #[must_use]
    pub const fn raw(self) -> u16 {
        self.raw
    }

    /// Decoded chat type, `None` for types this crate does not know.
    #[must_use]
    pub const fn chat_type(self) -> Option<ChatType> {
        ChatType::from_u16(self.raw & TYPE_MASK)
    }

    #[must_use]
    pub const fn source(self) -> ChatSource {
        ChatSource::from_index(self.raw >> SOURCE_SHIFT)
    }

    #[must_use]
    pub const fn target(self) -> ChatSource {
        ChatSource::from_index(self.raw >> TARGET_SHIFT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_type_roundtrips_through_u16() {
        for ty in ChatType::ALL {
            assert_eq!(ChatType::from_u16(ty.as_u16()), Some(*ty));
        }
    }

    #[test]
    fn unknown_type_decodes_to_none() {
        assert_eq!(ChatType::from_u16(0), None);
        assert_eq!(ChatType::from_u16(0x7E), None);
        assert_eq!(ChatCode::from_raw(0x7E).chat_type(), None);
    }

    #[test]
    fn code_decodes_type_and_source() {
        let code = ChatCode::new(ChatType::Party, ChatSource::PARTY_MEMBER);
        assert_eq!(code.chat_type(), Some(ChatType::Party));
        assert_eq!(code.source(), ChatSource::PARTY_MEMBER);
    }

    #[test]
    fn raw_layout_matches_game_encoding() {
        // Say (10) from OTHER (index 3), aimed at SELF (index 0)
        let raw = 10 | (3 << 11);
        let code = ChatCode::from_raw(raw);
        assert_eq!(code.chat_type(), Some(ChatType::Say));
        assert_eq!(code.source(), ChatSource::OTHER);
        assert_eq!(code.target(), ChatSource::SELF);
    }

    #[test]
    fn source_always_decodes_to_single_bit() {
        for raw in [0_u16, 0x0800, 0x5000, 0xF800, 0xFFFF] {
            let bits = ChatCode::from_raw(raw).source().bits();
            assert!(bits.count_ones() <= 1, "raw {raw:#x} decoded {bits:#b}");
        }
    }

    #[test]
    fn multi_bit_source_has_no_index() {
        assert_eq!((ChatSource::SELF | ChatSource::OTHER).index(), None);
        assert_eq!(ChatSource::empty().index(), None);
        assert_eq!(ChatSource::OTHER_PET.index(), Some(10));
    }

    #[test]
    fn tells_are_identified() {
        assert!(ChatType::TellIncoming.is_tell());
        assert!(ChatType::TellOutgoing.is_tell());
        assert!(!ChatType::Say.is_tell());
    }

    #[test]
    fn chat_type_serializes_by_name() {
        let json = serde_json::to_string(&ChatType::FreeCompany).unwrap();
        assert_eq!(json, "\"FreeCompany\"");
    }
}
