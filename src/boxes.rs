// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::fmt;

macro_rules! box_database {
    ($($(#[$attr:meta])* $boxenum:ident $boxtype:literal),*,) => {
        #[derive(Clone, Copy, PartialEq, Eq)]
        pub enum BoxType {
            $($(#[$attr])* $boxenum),*,
            UnknownBox(u32),
        }

        impl From<u32> for BoxType {
            fn from(t: u32) -> Self {
                use self::BoxType::*;
                match t {
                    $($boxtype => $boxenum),*,
                    _ => UnknownBox(t),
                }
            }
        }

        impl From<BoxType> for u32 {
            fn from(b: BoxType) -> u32 {
                use self::BoxType::*;
                match b {
                    $($boxenum => $boxtype),*,
                    UnknownBox(t) => t,
                }
            }
        }

        impl fmt::Debug for BoxType {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let fourcc: FourCC = From::from(*self);
                fmt::Debug::fmt(&fourcc, f)
            }
        }
    }
}

/// A four-character box or item type code, compared as raw bytes.
#[derive(Default, PartialEq, Eq, Clone, Copy, Hash)]
pub struct FourCC {
    pub value: [u8; 4],
}

impl FourCC {
    pub const fn new(value: [u8; 4]) -> Self {
        Self { value }
    }
}

impl From<u32> for FourCC {
    fn from(number: u32) -> Self {
        Self {
            value: number.to_be_bytes(),
        }
    }
}

impl From<FourCC> for u32 {
    fn from(fourcc: FourCC) -> Self {
        Self::from_be_bytes(fourcc.value)
    }
}

impl From<BoxType> for FourCC {
    fn from(t: BoxType) -> Self {
        let box_num: u32 = Into::into(t);
        From::from(box_num)
    }
}

impl From<[u8; 4]> for FourCC {
    fn from(value: [u8; 4]) -> Self {
        Self { value }
    }
}

impl From<FourCC> for BoxType {
    fn from(fourcc: FourCC) -> Self {
        let box_num: u32 = fourcc.into();
        From::from(box_num)
    }
}

impl PartialEq<&[u8; 4]> for FourCC {
    fn eq(&self, other: &&[u8; 4]) -> bool {
        self.value.eq(*other)
    }
}

impl fmt::Debug for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.value) {
            Ok(s) => f.write_str(s),
            Err(_) => fmt::Debug::fmt(&self.value, f),
        }
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

box_database!(
    FileTypeBox                       0x6674_7970, // "ftyp"
    MetadataBox                       0x6d65_7461, // "meta"
    PrimaryItemBox                    0x7069_746d, // "pitm"
    ImagePropertiesBox                0x6970_7270, // "iprp"
    ItemPropertyContainerBox          0x6970_636f, // "ipco"
    ItemPropertyAssociationBox        0x6970_6d61, // "ipma"
    ImageSpatialExtentsBox            0x6973_7065, // "ispe"
    ModelCrsProperty                  0x6d63_7273, // "mcrs"
    ModelTransformationProperty       0x6d74_7866, // "mtxf"
    TaiClockInfoProperty              0x7461_6963, // "taic"
    TaiTimestampProperty              0x6974_6169, // "itai"
    UserDescriptionProperty           0x7564_6573, // "udes"
    TiePointProperty                  0x7469_6570, // "tiep"
    UuidBox                           0x7575_6964, // "uuid"
);

#[test]
fn box_type_roundtrips_known_codes() {
    let t = BoxType::from(u32::from_be_bytes(*b"tiep"));
    assert_eq!(t, BoxType::TiePointProperty);
    assert_eq!(FourCC::from(t), b"tiep");

    let unknown = BoxType::from(u32::from_be_bytes(*b"zzzz"));
    assert_eq!(unknown, BoxType::UnknownBox(0x7a7a_7a7a));
    assert_eq!(format!("{:?}", FourCC::from(unknown)), "zzzz");
}
