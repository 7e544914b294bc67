// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! MISB ST0601 (UAS Datalink Local Set) decoding.
//!
//! A set is a run of (tag, length, value) triples, each tag and length one
//! byte. A set prefixed with the 16-byte UAS Datalink universal key and its
//! BER length uses BER-OID tags and BER lengths instead. Every triple is
//! reported with a human-readable tag name and decoded value text; tags
//! without a registered decoder are reported as [`UNHANDLED`]. When all eight
//! corner coordinate tags are present, four ground control points are derived
//! at the raster corners.

use arrayvec::ArrayVec;
use log::{debug, warn};

use crate::properties::GroundControlPoint;
use crate::{DecodeConfig, ResourceTracker, Result, TryVec};

/// Name and value reported for tags without a decoder.
pub const UNHANDLED: &str = "Unhandled";

/// Universal key of the UAS Datalink Local Set (SMPTE 336 16-byte key).
pub const UAS_DATALINK_LS_KEY: [u8; 16] = [
    0x06, 0x0e, 0x2b, 0x34, 0x02, 0x0b, 0x01, 0x01, 0x0e, 0x01, 0x03, 0x01, 0x01, 0x00, 0x00, 0x00,
];

const CHECKSUM_TAG: u32 = 1;

/// Scaled-integer range denominator shared by the full-precision lat/lon tags.
const LAT_LON_SCALE: f64 = 4_294_967_294.0;

const CORNER_LATITUDE_NAMES: [&str; 4] = [
    "Corner Latitude Point 1 (Full)",
    "Corner Latitude Point 2 (Full)",
    "Corner Latitude Point 3 (Full)",
    "Corner Latitude Point 4 (Full)",
];

const CORNER_LONGITUDE_NAMES: [&str; 4] = [
    "Corner Longitude Point 1 (Full)",
    "Corner Longitude Point 2 (Full)",
    "Corner Longitude Point 3 (Full)",
    "Corner Longitude Point 4 (Full)",
];

/// Decoders for the tags we understand. Corner variants carry the 0-based
/// point number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TagDecoder {
    Version,
    CornerLatitude(usize),
    CornerLongitude(usize),
}

/// Sorted by tag.
const REGISTRY: &[(u32, TagDecoder)] = &[
    (65, TagDecoder::Version),
    (82, TagDecoder::CornerLatitude(0)),
    (83, TagDecoder::CornerLongitude(0)),
    (84, TagDecoder::CornerLatitude(1)),
    (85, TagDecoder::CornerLongitude(1)),
    (86, TagDecoder::CornerLatitude(2)),
    (87, TagDecoder::CornerLongitude(2)),
    (88, TagDecoder::CornerLatitude(3)),
    (89, TagDecoder::CornerLongitude(3)),
];

impl TagDecoder {
    fn lookup(tag: u32) -> Option<Self> {
        REGISTRY
            .binary_search_by_key(&tag, |&(t, _)| t)
            .ok()
            .map(|index| REGISTRY[index].1)
    }

    fn name(self) -> &'static str {
        match self {
            Self::Version => "ST 0601 Version",
            Self::CornerLatitude(point) => CORNER_LATITUDE_NAMES[point],
            Self::CornerLongitude(point) => CORNER_LONGITUDE_NAMES[point],
        }
    }

    /// Value text, or `None` if `value` doesn't have the size the tag needs.
    fn decode(self, value: &[u8]) -> Option<String> {
        match self {
            Self::CornerLatitude(_) => Some(format!("{:.6}", latitude(value)?)),
            Self::CornerLongitude(_) => Some(format!("{:.6}", longitude(value)?)),
            Self::Version => {
                let &[version] = value else {
                    return None;
                };
                Some(format!("ST 0601.{version}"))
            },
        }
    }

    /// Slot in the corner table, latitudes at even and longitudes at odd
    /// positions.
    fn corner_slot(self) -> Option<usize> {
        match self {
            Self::CornerLatitude(point) => Some(point * 2),
            Self::CornerLongitude(point) => Some(point * 2 + 1),
            _ => None,
        }
    }

    fn corner_value(self, value: &[u8]) -> Option<f64> {
        match self {
            Self::CornerLatitude(_) => latitude(value),
            Self::CornerLongitude(_) => longitude(value),
            _ => None,
        }
    }
}

/// Signed 32-bit scaled to ±90 degrees.
fn latitude(value: &[u8]) -> Option<f64> {
    let klv = i32::from_be_bytes(value.try_into().ok()?);
    Some(f64::from(klv) * 180.0 / LAT_LON_SCALE)
}

/// Signed 32-bit scaled to ±180 degrees.
fn longitude(value: &[u8]) -> Option<f64> {
    let klv = i32::from_be_bytes(value.try_into().ok()?);
    Some(f64::from(klv) * 360.0 / LAT_LON_SCALE)
}

/// One decoded triple.
#[derive(Debug)]
pub struct KlvTagValue {
    pub tag: u32,
    pub name: &'static str,
    pub value: String,
    raw: TryVec<u8>,
}

impl KlvTagValue {
    /// The undecoded value bytes.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }
}

/// A decoded ST0601 set.
#[derive(Debug)]
pub struct St0601Set {
    entries: TryVec<KlvTagValue>,
    corners: ArrayVec<GroundControlPoint, 4>,
}

impl St0601Set {
    /// All triples in stream order.
    pub fn entries(&self) -> &[KlvTagValue] {
        &self.entries
    }

    /// First entry with `tag`.
    pub fn get(&self, tag: u32) -> Option<&KlvTagValue> {
        self.entries.iter().find(|entry| entry.tag == tag)
    }

    /// Corner GCPs in upper-left, upper-right, lower-right, lower-left order.
    /// Empty unless all eight corner tags decoded.
    pub fn corner_gcps(&self) -> &[GroundControlPoint] {
        &self.corners
    }

    pub fn has_all_corners(&self) -> bool {
        self.corners.is_full()
    }
}

/// Decode an ST0601 set for a `width` x `height` raster without limits.
pub fn read_st0601(payload: &[u8], width: u32, height: u32) -> Result<St0601Set> {
    read_st0601_with_config(payload, width, height, &DecodeConfig::unlimited())
}

/// Decode an ST0601 set, stopping after `config.max_klv_entries` entries.
///
/// Fails only on allocation failure. A triple running past the end of the
/// payload ends the scan; everything before it is kept.
pub fn read_st0601_with_config(payload: &[u8], width: u32, height: u32, config: &DecodeConfig) -> Result<St0601Set> {
    let tracker = ResourceTracker::new(config);
    let (mut src, framing) = split_local_set(payload);
    let mut entries = TryVec::new();
    let mut corner_values = [None; 8];

    while !src.is_empty() {
        let Some((tag, value)) = next_triple(&mut src, framing) else {
            debug!("truncated ST0601 triple, {} bytes left", src.len());
            break;
        };
        if let Err(e) = tracker.validate_klv_entries(entries.len() + 1) {
            warn!("{e}, ignoring the rest of the set");
            break;
        }

        let (name, text) = match TagDecoder::lookup(tag) {
            Some(decoder) => {
                let text = decoder.decode(value);
                if let (Some(slot), Some(v)) = (decoder.corner_slot(), decoder.corner_value(value)) {
                    corner_values[slot] = Some(v);
                }
                (decoder.name(), text.unwrap_or_else(|| UNHANDLED.into()))
            },
            None if tag == CHECKSUM_TAG => ("Checksum", UNHANDLED.into()),
            None => (UNHANDLED, UNHANDLED.into()),
        };

        let mut raw = TryVec::new();
        raw.extend_from_slice(value)?;
        entries.push(KlvTagValue {
            tag,
            name,
            value: text,
            raw,
        })?;
    }

    Ok(St0601Set {
        entries,
        corners: corner_gcps(&corner_values, width, height).unwrap_or_default(),
    })
}

fn corner_gcps(values: &[Option<f64>; 8], width: u32, height: u32) -> Option<ArrayVec<GroundControlPoint, 4>> {
    let mut coords = [0.0; 8];
    for (coord, value) in coords.iter_mut().zip(values) {
        *coord = (*value)?;
    }
    let [lat1, lon1, lat2, lon2, lat3, lon3, lat4, lon4] = coords;
    let (w, h) = (f64::from(width), f64::from(height));

    let gcp = |id: &str, pixel: f64, line: f64, x: f64, y: f64| GroundControlPoint {
        id: id.into(),
        info: String::new(),
        pixel,
        line,
        x,
        y,
        z: 0.0,
    };
    Some(ArrayVec::from([
        gcp("UpperLeft", 0.0, 0.0, lon1, lat1),
        gcp("UpperRight", w, 0.0, lon2, lat2),
        gcp("LowerRight", w, h, lon3, lat3),
        gcp("LowerLeft", 0.0, h, lon4, lat4),
    ]))
}

/// How tags and lengths are encoded in a set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    /// One tag byte and one length byte per triple.
    Short,
    /// BER-OID tags and BER lengths, as inside a keyed UAS Datalink set.
    Ber,
}

/// Triples of `payload` and how they are framed.
///
/// A leading universal key and its BER length are removed, and the triples
/// after it use BER framing. Bare sets use short framing.
fn split_local_set(payload: &[u8]) -> (&[u8], Framing) {
    let Some(mut rest) = payload.strip_prefix(&UAS_DATALINK_LS_KEY[..]) else {
        return (payload, Framing::Short);
    };
    let body = match read_ber_length(&mut rest) {
        Some(len) => rest.get(..len).unwrap_or(rest),
        None => rest,
    };
    (body, Framing::Ber)
}

/// Split the next (tag, value) off `src`. Leaves `src` untouched on failure.
fn next_triple<'a>(src: &mut &'a [u8], framing: Framing) -> Option<(u32, &'a [u8])> {
    let mut rest = *src;
    let (tag, len) = match framing {
        Framing::Short => {
            let (&[tag, len], tail) = rest.split_first_chunk::<2>()?;
            rest = tail;
            (u32::from(tag), usize::from(len))
        },
        Framing::Ber => (read_ber_oid(&mut rest)?, read_ber_length(&mut rest)?),
    };
    let (value, rest) = rest.split_at_checked(len)?;
    *src = rest;
    Some((tag, value))
}

/// BER-OID tag: 7 bits per byte, high bit set on all but the last byte.
fn read_ber_oid(src: &mut &[u8]) -> Option<u32> {
    let mut tag = 0u32;
    for _ in 0..4 {
        let (&byte, rest) = src.split_first()?;
        *src = rest;
        tag = (tag << 7) | u32::from(byte & 0x7f);
        if byte & 0x80 == 0 {
            return Some(tag);
        }
    }
    None
}

/// BER length: short form below 0x80, else `0x80 | n` followed by `n`
/// big-endian bytes. The indefinite form (0x80) isn't valid in KLV.
fn read_ber_length(src: &mut &[u8]) -> Option<usize> {
    let (&first, rest) = src.split_first()?;
    *src = rest;
    if first < 0x80 {
        return Some(usize::from(first));
    }
    let count = usize::from(first & 0x7f);
    if count == 0 || count > std::mem::size_of::<usize>() {
        return None;
    }
    let (bytes, rest) = src.split_at_checked(count)?;
    *src = rest;
    Some(bytes.iter().fold(0usize, |len, &b| (len << 8) | usize::from(b)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_is_sorted() {
        assert!(REGISTRY.windows(2).all(|w| w[0].0 < w[1].0));
        assert_eq!(TagDecoder::lookup(65), Some(TagDecoder::Version));
        assert_eq!(TagDecoder::lookup(1), None);
        assert_eq!(TagDecoder::lookup(90), None);
    }

    #[test]
    fn ber_lengths() {
        let mut src: &[u8] = &[0x05, 0xaa];
        assert_eq!(read_ber_length(&mut src), Some(5));
        assert_eq!(src, [0xaa]);

        let mut src: &[u8] = &[0x82, 0x01, 0x00, 0xbb];
        assert_eq!(read_ber_length(&mut src), Some(256));
        assert_eq!(src, [0xbb]);

        assert_eq!(read_ber_length(&mut &[0x80][..]), None);
        assert_eq!(read_ber_length(&mut &[0x83, 0x01][..]), None);
    }

    #[test]
    fn ber_oid_tags() {
        let mut src: &[u8] = &[0x81, 0x01, 0x00];
        assert_eq!(read_ber_oid(&mut src), Some(129));
        assert_eq!(src, [0x00]);
        assert_eq!(read_ber_oid(&mut &[0xff, 0xff, 0xff, 0xff, 0x01][..]), None);
    }

    #[test]
    fn next_triple_keeps_input_when_truncated() {
        let mut src: &[u8] = &[65, 3, 17];
        assert_eq!(next_triple(&mut src, Framing::Short), None);
        assert_eq!(src.len(), 3);
        assert_eq!(next_triple(&mut src, Framing::Ber), None);
        assert_eq!(src.len(), 3);
    }

    #[test]
    fn short_framing_takes_high_bytes_literally() {
        let mut src: &[u8] = &[0x90, 0x81, 1, 2];
        assert_eq!(next_triple(&mut src, Framing::Short), None);

        let mut value = vec![0x90, 0x81];
        value.extend_from_slice(&[0xaa; 0x81]);
        value.extend_from_slice(&[65, 1, 17]);
        let mut src = &value[..];
        let (tag, v) = next_triple(&mut src, Framing::Short).unwrap();
        assert_eq!((tag, v.len()), (144, 129));
        assert_eq!(next_triple(&mut src, Framing::Short), Some((65, &[17][..])));
        assert!(src.is_empty());
    }

    #[test]
    fn ber_framing_reads_long_forms() {
        let mut src: &[u8] = &[0x81, 0x01, 0x81, 0x02, 7, 8, 9];
        assert_eq!(next_triple(&mut src, Framing::Ber), Some((129, &[7, 8][..])));
        assert_eq!(src, [9]);
    }

    #[test]
    fn scaled_coordinates() {
        assert_eq!(latitude(&0x7fff_ffffi32.to_be_bytes()), Some(90.0));
        assert_eq!(longitude(&(-0x7fff_ffffi32).to_be_bytes()), Some(-180.0));
        assert_eq!(latitude(&[0, 0, 0]), None);
        assert_eq!(
            TagDecoder::CornerLatitude(0).decode(&0x5d3a_2b10u32.to_be_bytes()).as_deref(),
            Some("65.550389")
        );
    }

    #[test]
    fn version_tag() {
        assert_eq!(TagDecoder::Version.decode(&[17]).as_deref(), Some("ST 0601.17"));
        assert_eq!(TagDecoder::Version.decode(&[17, 0]), None);
        assert_eq!(TagDecoder::Version.decode(&[]), None);
    }

    #[test]
    fn only_version_and_corners_are_registered() {
        let tags: Vec<u32> = REGISTRY.iter().map(|&(tag, _)| tag).collect();
        assert_eq!(tags, [65, 82, 83, 84, 85, 86, 87, 88, 89]);
        for tag in [2, 3, 13, 14, 15] {
            assert_eq!(TagDecoder::lookup(tag), None);
        }
    }

    #[test]
    fn universal_key_selects_ber_framing() {
        let mut payload = UAS_DATALINK_LS_KEY.to_vec();
        payload.extend_from_slice(&[3, 65, 1, 17, 0xff]);
        assert_eq!(split_local_set(&payload), (&[65, 1, 17][..], Framing::Ber));
        assert_eq!(split_local_set(&[65, 1, 17]), (&[65, 1, 17][..], Framing::Short));
    }
}
