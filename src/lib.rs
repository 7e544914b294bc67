#![deny(unsafe_code)]
//! Module for extracting geospatial metadata from HEIF and AVIF still images.
//!
//! Images following the GIMI profile carry their georeferencing as item
//! properties: a coordinate reference system (`mcrs`), a model transformation
//! (`mtxf`), tie points (`tiep`), TAI timing (`taic`, `itai`), user
//! descriptions (`udes`) and a content identifier (`uuid`). This crate walks the
//! item property boxes and decodes those it understands into a [`GeoMetadata`];
//! anything truncated, malformed or unknown is skipped without failing the rest
//! of the pass.
//!
//! MISB ST0601 KLV sets are decoded by [`read_st0601`], and the four corner
//! coordinates of a set can be turned into a geotransform through
//! [`GeoMetadata::apply_st0601`].
//!
//! This crate is written entirely in safe Rust code.

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use log::debug;

use bitreader::BitReader;
use byteorder::ReadBytesExt;
use fallible_collections::TryReserveError;

use std::io::{Read, Take};

mod boxes;
use crate::boxes::BoxType;
pub use crate::boxes::FourCC;

pub mod metadata;
pub use crate::metadata::{MetadataDomain, MetadataItem, MetadataStore};

mod properties;
pub use crate::properties::{
    AffineFit, CONTENT_ID_USER_TYPE, GeoMetadata, GeoTransform, GroundControlPoint, ImageSpatialExtents, PropertyBox,
};

mod st0601;
pub use crate::st0601::{KlvTagValue, St0601Set, UAS_DATALINK_LS_KEY, UNHANDLED, read_st0601, read_st0601_with_config};

/// A trait to indicate a type can be infallibly converted to `u64`.
/// This should only be implemented for infallible conversions, so only unsigned types are valid.
trait ToU64 {
    fn to_u64(self) -> u64;
}

/// Statically verify that the platform `usize` can fit within a `u64`.
/// If the size won't fit on the given platform, this will fail at compile time, but if a type
/// which can fail `TryInto<usize>` is used, it may panic.
impl ToU64 for usize {
    fn to_u64(self) -> u64 {
        const _: () = assert!(std::mem::size_of::<usize>() <= std::mem::size_of::<u64>());
        self.try_into().ok().unwrap()
    }
}

/// A trait to indicate a type can be infallibly converted to `usize`.
/// This should only be implemented for infallible conversions, so only unsigned types are valid.
pub(crate) trait ToUsize {
    fn to_usize(self) -> usize;
}

/// Statically verify that the given type can fit within a `usize`.
/// If the size won't fit on the given platform, this will fail at compile time, but if a type
/// which can fail `TryInto<usize>` is used, it may panic.
macro_rules! impl_to_usize_from {
    ( $from_type:ty ) => {
        impl ToUsize for $from_type {
            fn to_usize(self) -> usize {
                const _: () = assert!(std::mem::size_of::<$from_type>() <= std::mem::size_of::<usize>());
                self.try_into().ok().unwrap()
            }
        }
    };
}

impl_to_usize_from!(u8);
impl_to_usize_from!(u16);
impl_to_usize_from!(u32);

#[doc(hidden)]
pub type TryVec<T> = fallible_collections::TryVec<T>;

// To ensure we don't use stdlib allocating types by accident
#[allow(dead_code)]
struct Vec;
#[allow(dead_code)]
struct Box;
#[allow(dead_code)]
struct HashMap;
#[allow(dead_code)]
struct String;

/// Describes parser failures.
///
/// This enum wraps the standard `io::Error` type, unified with
/// our own parser error states and those of crates we use.
///
/// Property decoders report these to the dispatcher, which logs them and moves
/// on to the next box; only container walking and publication surface them to
/// the caller.
#[derive(Debug)]
pub enum Error {
    /// Parse error caused by corrupt or malformed data.
    InvalidData(&'static str),
    /// Parse error caused by limited parser support rather than invalid data.
    Unsupported(&'static str),
    /// Reflect `std::io::ErrorKind::UnexpectedEof` for short data.
    UnexpectedEOF,
    /// Propagate underlying errors from `std::io`.
    Io(std::io::Error),
    /// Out of memory
    OutOfMemory,
    /// Resource limit exceeded during parsing
    ResourceLimitExceeded(&'static str),
    /// The [`AffineFit`] collaborator could not fit a transform to the corner points.
    AffineFitFailed,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            Self::InvalidData(s) | Self::Unsupported(s) | Self::ResourceLimitExceeded(s) => *s,
            Self::UnexpectedEOF => "EOF",
            Self::Io(err) => return std::fmt::Display::fmt(err, f),
            Self::OutOfMemory => "OOM",
            Self::AffineFitFailed => "could not fit an affine transform to the corner points",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for Error {}

impl From<bitreader::BitReaderError> for Error {
    #[cold]
    #[cfg_attr(debug_assertions, track_caller)]
    fn from(err: bitreader::BitReaderError) -> Self {
        log::warn!("bitreader: {err}");
        debug_assert!(!matches!(err, bitreader::BitReaderError::TooManyBitsForType { .. })); // bug
        Self::InvalidData("truncated bits")
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof => Self::UnexpectedEOF,
            _ => Self::Io(err),
        }
    }
}

impl From<std::num::TryFromIntError> for Error {
    fn from(_: std::num::TryFromIntError) -> Self {
        Self::Unsupported("integer conversion failed")
    }
}

impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        let kind = match err {
            Error::InvalidData(_) => std::io::ErrorKind::InvalidData,
            Error::UnexpectedEOF => std::io::ErrorKind::UnexpectedEof,
            Error::Io(io_err) => return io_err,
            _ => std::io::ErrorKind::Other,
        };
        Self::new(kind, err)
    }
}

impl From<TryReserveError> for Error {
    fn from(_: TryReserveError) -> Self {
        Self::OutOfMemory
    }
}

/// Result shorthand using our Error enum.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Basic ISO box structure.
///
/// HEIF files are a sequence of possibly-nested 'box' structures.  Each box
/// begins with a header describing the length of the box's data and a
/// four-byte box type which identifies the type of the box. Together these
/// are enough to interpret the contents of that section of the file.
///
/// See ISO 14496-12:2015 § 4.2
#[derive(Debug, Clone, Copy)]
struct BoxHeader {
    /// Box type.
    name: BoxType,
    /// Size of the box in bytes.
    size: u64,
    /// Offset to the start of the contained data (or header size).
    offset: u64,
    /// Uuid for extended type.
    uuid: Option<[u8; 16]>,
}

impl BoxHeader {
    /// 4-byte size + 4-byte type
    const MIN_SIZE: u64 = 8;
    /// 4-byte size + 4-byte type + 16-byte size
    const MIN_LARGE_SIZE: u64 = 16;
}

/// Configuration for metadata extraction with resource limits and validation options
///
/// Limits are checked **before** decoded values are stored, so a hostile file
/// claiming huge tie point or property counts can't make the parser allocate
/// without bound.
///
/// # Examples
///
/// ```rust
/// use gimi_parse::DecodeConfig;
///
/// // Default limits (suitable for most apps)
/// let config = DecodeConfig::default();
///
/// // Strict limits for untrusted input
/// let config = DecodeConfig::default()
///     .with_max_gcps(1_000)
///     .with_max_klv_entries(500);
///
/// // No limits
/// let config = DecodeConfig::unlimited();
/// ```
#[derive(Debug, Clone)]
pub struct DecodeConfig {
    /// Maximum number of boxes in the item property container (`ipco`).
    /// Default: 10,000
    pub max_properties: Option<u32>,

    /// Maximum number of ground control points accumulated over all `tiep` boxes.
    /// Default: 100,000
    pub max_gcps: Option<u32>,

    /// Maximum number of tag/value entries decoded from one ST0601 set.
    /// Default: 10,000
    pub max_klv_entries: Option<u32>,

    /// Enable lenient parsing mode.
    ///
    /// When true, non-zero flags in container boxes that expect zero flags
    /// are ignored instead of rejecting the file.
    /// Default: false (strict validation)
    pub lenient: bool,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            max_properties: Some(10_000),
            max_gcps: Some(100_000),
            max_klv_entries: Some(10_000),
            lenient: false,
        }
    }
}

impl DecodeConfig {
    /// Create a configuration with no resource limits.
    pub fn unlimited() -> Self {
        Self {
            max_properties: None,
            max_gcps: None,
            max_klv_entries: None,
            lenient: false,
        }
    }

    /// Set the maximum number of item properties
    pub fn with_max_properties(mut self, properties: u32) -> Self {
        self.max_properties = Some(properties);
        self
    }

    /// Set the maximum number of ground control points
    pub fn with_max_gcps(mut self, gcps: u32) -> Self {
        self.max_gcps = Some(gcps);
        self
    }

    /// Set the maximum number of ST0601 entries
    pub fn with_max_klv_entries(mut self, entries: u32) -> Self {
        self.max_klv_entries = Some(entries);
        self
    }

    /// Enable lenient parsing mode
    pub fn lenient(mut self, lenient: bool) -> Self {
        self.lenient = lenient;
        self
    }
}

/// Checks running counts against the limits of a [`DecodeConfig`].
pub(crate) struct ResourceTracker<'a> {
    config: &'a DecodeConfig,
}

impl<'a> ResourceTracker<'a> {
    pub(crate) fn new(config: &'a DecodeConfig) -> Self {
        Self { config }
    }

    fn check(limit: Option<u32>, count: usize, msg: &'static str) -> Result<()> {
        if let Some(limit) = limit {
            if count > limit.to_usize() {
                return Err(Error::ResourceLimitExceeded(msg));
            }
        }
        Ok(())
    }

    pub(crate) fn validate_properties(&self, count: usize) -> Result<()> {
        Self::check(self.config.max_properties, count, "item property count limit exceeded")
    }

    pub(crate) fn validate_gcps(&self, count: usize) -> Result<()> {
        Self::check(self.config.max_gcps, count, "ground control point limit exceeded")
    }

    pub(crate) fn validate_klv_entries(&self, count: usize) -> Result<()> {
        Self::check(self.config.max_klv_entries, count, "ST0601 entry limit exceeded")
    }
}

/// Item properties as stored in the container, in `ipco` order.
#[derive(Debug)]
struct StoredProperty {
    box_type: FourCC,
    user_type: Option<[u8; 16]>,
    payload: TryVec<u8>,
}

/// The property boxes associated with one image item.
///
/// Owns the payload bytes read from the file; [`ItemProperties::boxes`] hands
/// out borrowed [`PropertyBox`] views in association order.
#[derive(Debug)]
pub struct ItemProperties {
    item_id: u32,
    properties: TryVec<StoredProperty>,
    /// 1-based `ipco` indices associated with `item_id`, in `ipma` order.
    associated: TryVec<u16>,
    primary: bool,
}

impl ItemProperties {
    /// Id of the item these properties belong to.
    pub fn item_id(&self) -> u32 {
        self.item_id
    }

    /// Whether [`item_id`](Self::item_id) is the file's primary item.
    pub fn is_primary(&self) -> bool {
        self.primary
    }

    /// Number of properties associated with the item.
    pub fn len(&self) -> usize {
        self.boxes().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The item's property boxes in association order.
    pub fn boxes(&self) -> impl Iterator<Item = PropertyBox<'_>> + '_ {
        self.associated.iter().filter_map(move |&index| {
            let prop = self.properties.get(usize::from(index).checked_sub(1)?)?;
            Some(PropertyBox {
                box_type: prop.box_type,
                user_type: prop.user_type,
                payload: &prop.payload,
            })
        })
    }
}

/// Read the geospatial metadata of the primary item of a HEIF/AVIF file.
///
/// Uses the default [`DecodeConfig`].
pub fn read_geo_metadata(data: &[u8]) -> Result<GeoMetadata> {
    read_geo_metadata_with_config(data, &DecodeConfig::default())
}

/// Read the geospatial metadata of the primary item with explicit limits.
///
/// Fails only if the container structure can't be walked; individual property
/// boxes that fail to decode are skipped.
pub fn read_geo_metadata_with_config(data: &[u8], config: &DecodeConfig) -> Result<GeoMetadata> {
    let properties = read_item_properties(data, None, config)?;
    let mut geo = GeoMetadata::new();
    geo.read_properties(properties.boxes(), config);
    Ok(geo)
}

/// Collect the property boxes associated with `item_id`, or with the primary
/// item if `item_id` is `None`.
pub fn read_item_properties(data: &[u8], item_id: Option<u32>, config: &DecodeConfig) -> Result<ItemProperties> {
    let mut cursor = std::io::Cursor::new(data);
    let mut iter = BoxIter::new(&mut cursor);

    // 'ftyp' box must occur first; see ISO 14496-12:2015 § 4.3.1
    match iter.next_box()? {
        Some(mut b) if b.head.name == BoxType::FileTypeBox => skip_box_content(&mut b)?,
        _ => return Err(Error::InvalidData("'ftyp' box must occur first")),
    }

    let mut meta = None;
    while let Some(mut b) = iter.next_box()? {
        match b.head.name {
            BoxType::MetadataBox => {
                if meta.is_some() {
                    return Err(Error::InvalidData(
                        "There should be zero or one meta boxes per ISO 14496-12:2015 § 8.11.1.1",
                    ));
                }
                meta = Some(read_meta(&mut b, config)?);
            },
            _ => skip_box_content(&mut b)?,
        }
        check_parser_state(&b.head, &b.content)?;
    }

    let meta = meta.ok_or(Error::InvalidData("missing meta"))?;
    let item_id = match (item_id, meta.primary_item_id) {
        (Some(id), _) => id,
        (None, Some(id)) => id,
        (None, None) => return Err(Error::InvalidData("Required pitm box not present in meta box")),
    };

    let mut associated = TryVec::new();
    for a in meta.associations.iter().filter(|a| a.item_id == item_id) {
        associated.push(a.property_index)?;
    }

    Ok(ItemProperties {
        item_id,
        properties: meta.properties,
        associated,
        primary: meta.primary_item_id == Some(item_id),
    })
}

struct ItemMeta {
    primary_item_id: Option<u32>,
    properties: TryVec<StoredProperty>,
    associations: TryVec<Association>,
}

fn read_meta<T: Read>(src: &mut BMFFBox<'_, T>, config: &DecodeConfig) -> Result<ItemMeta> {
    let version = read_fullbox_version_no_flags(src, config)?;

    if version != 0 {
        return Err(Error::Unsupported("unsupported meta version"));
    }

    let mut primary_item_id = None;
    let mut properties = TryVec::new();
    let mut associations = TryVec::new();

    let mut iter = src.box_iter();
    while let Some(mut b) = iter.next_box()? {
        match b.head.name {
            BoxType::PrimaryItemBox => {
                if primary_item_id.is_some() {
                    return Err(Error::InvalidData("There should be zero or one pitm boxes per ISO 14496-12:2015 § 8.11.4.1"));
                }
                primary_item_id = Some(read_pitm(&mut b, config)?);
            },
            BoxType::ImagePropertiesBox => {
                (properties, associations) = read_iprp(&mut b, config)?;
            },
            _ => skip_box_content(&mut b)?,
        }

        check_parser_state(&b.head, &b.content)?;
    }

    Ok(ItemMeta {
        primary_item_id,
        properties,
        associations,
    })
}

/// Parse a Primary Item Box
/// See ISO 14496-12:2015 § 8.11.4
fn read_pitm<T: Read>(src: &mut BMFFBox<'_, T>, config: &DecodeConfig) -> Result<u32> {
    let version = read_fullbox_version_no_flags(src, config)?;

    let item_id = match version {
        0 => be_u16(src)?.into(),
        1 => be_u32(src)?,
        _ => return Err(Error::Unsupported("unsupported pitm version")),
    };

    Ok(item_id)
}

fn read_iprp<T: Read>(
    src: &mut BMFFBox<'_, T>,
    config: &DecodeConfig,
) -> Result<(TryVec<StoredProperty>, TryVec<Association>)> {
    let mut iter = src.box_iter();
    let mut properties = TryVec::new();
    let mut associations = TryVec::new();

    while let Some(mut b) = iter.next_box()? {
        match b.head.name {
            BoxType::ItemPropertyContainerBox => {
                properties = read_ipco(&mut b, config)?;
            },
            BoxType::ItemPropertyAssociationBox => {
                associations.append(&mut read_ipma(&mut b)?)?;
            },
            _ => return Err(Error::InvalidData("unexpected iprp child")),
        }
        check_parser_state(&b.head, &b.content)?;
    }

    Ok((properties, associations))
}

struct Association {
    item_id: u32,
    #[allow(unused)]
    essential: bool,
    property_index: u16,
}

fn read_ipma<T: Read>(src: &mut BMFFBox<'_, T>) -> Result<TryVec<Association>> {
    let (version, flags) = read_fullbox_extra(src)?;

    let mut associations = TryVec::new();

    let entry_count = be_u32(src)?;
    for _ in 0..entry_count {
        let item_id = if version == 0 {
            be_u16(src)?.into()
        } else {
            be_u32(src)?
        };
        let association_count = src.read_u8()?;
        for _ in 0..association_count {
            let num_association_bytes = if flags & 1 == 1 { 2 } else { 1 };
            let association = &mut [0; 2][..num_association_bytes];
            src.read_exact(association)?;
            let mut association = BitReader::new(association);
            let essential = association.read_bool()?;
            let property_index = association.read_u16(association.remaining().try_into()?)?;
            associations.push(Association {
                item_id,
                essential,
                property_index,
            })?;
        }
    }
    Ok(associations)
}

/// Read every child of the item property container, keeping raw payloads.
///
/// Every box is stored, known or not, so that `ipma` indices stay valid.
fn read_ipco<T: Read>(src: &mut BMFFBox<'_, T>, config: &DecodeConfig) -> Result<TryVec<StoredProperty>> {
    let tracker = ResourceTracker::new(config);
    let mut properties = TryVec::new();

    let mut iter = src.box_iter();
    while let Some(mut b) = iter.next_box()? {
        tracker.validate_properties(properties.len() + 1)?;
        // size 0 is only valid for the last top-level box
        if b.head.size == u64::MAX {
            return Err(Error::InvalidData("unsized box in ipco"));
        }
        let payload = b.read_into_try_vec()?;
        properties.push(StoredProperty {
            box_type: b.head.name.into(),
            user_type: b.head.uuid,
            payload,
        })?;
        check_parser_state(&b.head, &b.content)?;
    }
    Ok(properties)
}

/// See ISO 14496-12:2015 § 4.2
struct BMFFBox<'a, T> {
    head: BoxHeader,
    content: Take<&'a mut T>,
}

impl<T: Read> BMFFBox<'_, T> {
    fn read_into_try_vec(&mut self) -> std::io::Result<TryVec<u8>> {
        let limit = usize::try_from(self.content.limit()).map_err(|_| std::io::ErrorKind::OutOfMemory)?;
        let mut vec = std::vec::Vec::new();
        vec.try_reserve_exact(limit).map_err(|_| std::io::ErrorKind::OutOfMemory)?;
        self.content.read_to_end(&mut vec)?;
        Ok(vec.into())
    }
}

#[test]
fn box_read_to_end() {
    let tmp = &mut b"1234567890".as_slice();
    let mut src = BMFFBox {
        head: BoxHeader { name: BoxType::ModelCrsProperty, size: 5, offset: 0, uuid: None },
        content: <_ as Read>::take(tmp, 5),
    };
    let buf = src.read_into_try_vec().unwrap();
    assert_eq!(buf.len(), 5);
    assert_eq!(buf, b"12345".as_ref());
}

#[test]
fn box_read_to_end_oom() {
    let tmp = &mut b"1234567890".as_slice();
    let mut src = BMFFBox {
        head: BoxHeader { name: BoxType::ModelCrsProperty, size: 5, offset: 0, uuid: None },
        content: <_ as Read>::take(tmp, u64::MAX / 2),
    };
    assert!(src.read_into_try_vec().is_err());
}

struct BoxIter<'a, T> {
    src: &'a mut T,
}

impl<T: Read> BoxIter<'_, T> {
    fn new(src: &mut T) -> BoxIter<'_, T> {
        BoxIter { src }
    }

    fn next_box(&mut self) -> Result<Option<BMFFBox<'_, T>>> {
        let r = read_box_header(self.src);
        match r {
            Ok(h) => Ok(Some(BMFFBox {
                head: h,
                content: self.src.take(h.size - h.offset),
            })),
            Err(Error::UnexpectedEOF) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl<T: Read> Read for BMFFBox<'_, T> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.content.read(buf)
    }
}

impl<T: Read> BMFFBox<'_, T> {
    const fn get_header(&self) -> &BoxHeader {
        &self.head
    }

    fn box_iter(&mut self) -> BoxIter<'_, Self> {
        BoxIter::new(self)
    }
}

impl<T> Drop for BMFFBox<'_, T> {
    fn drop(&mut self) {
        if self.content.limit() > 0 {
            let name: FourCC = From::from(self.head.name);
            debug!("Dropping {} bytes in '{}'", self.content.limit(), name);
        }
    }
}

/// Read and parse a box header.
///
/// Call this first to determine the type of a particular box
/// and its length. Used internally for dispatching to specific
/// parsers for the internal content, or to get the length to
/// skip unknown or uninteresting boxes.
///
/// See ISO 14496-12:2015 § 4.2
fn read_box_header<T: ReadBytesExt>(src: &mut T) -> Result<BoxHeader> {
    let size32 = be_u32(src)?;
    let name = BoxType::from(be_u32(src)?);
    let size = match size32 {
        // valid only for top-level box and indicates it's the last box in the file.
        0 => u64::MAX,
        1 => {
            let size64 = be_u64(src)?;
            if size64 < BoxHeader::MIN_LARGE_SIZE {
                return Err(Error::InvalidData("malformed wide size"));
            }
            size64
        },
        _ => {
            if u64::from(size32) < BoxHeader::MIN_SIZE {
                return Err(Error::InvalidData("malformed size"));
            }
            u64::from(size32)
        },
    };
    let mut offset = match size32 {
        1 => BoxHeader::MIN_LARGE_SIZE,
        _ => BoxHeader::MIN_SIZE,
    };
    let uuid = if name == BoxType::UuidBox {
        if size >= offset + 16 {
            let mut buffer = [0u8; 16];
            let count = src.read(&mut buffer)?;
            offset += count.to_u64();
            if count == 16 {
                Some(buffer)
            } else {
                debug!("malformed uuid (short read), skipping");
                None
            }
        } else {
            debug!("malformed uuid, skipping");
            None
        }
    } else {
        None
    };
    if offset > size {
        return Err(Error::InvalidData("box header larger than box"));
    }
    Ok(BoxHeader { name, size, offset, uuid })
}

/// Parse the extra header fields for a full box.
///
/// Also used on property payloads, whose first four bytes are the same
/// version and flags fields.
pub(crate) fn read_fullbox_extra<T: ReadBytesExt>(src: &mut T) -> Result<(u8, u32)> {
    let version = src.read_u8()?;
    let flags_a = src.read_u8()?;
    let flags_b = src.read_u8()?;
    let flags_c = src.read_u8()?;
    Ok((
        version,
        u32::from(flags_a) << 16 | u32::from(flags_b) << 8 | u32::from(flags_c),
    ))
}

// Parse the extra fields for a full box whose flag fields must be zero.
fn read_fullbox_version_no_flags<T: ReadBytesExt>(src: &mut T, config: &DecodeConfig) -> Result<u8> {
    let (version, flags) = read_fullbox_extra(src)?;

    if flags != 0 && !config.lenient {
        return Err(Error::Unsupported("expected flags to be 0"));
    }

    Ok(version)
}

/// Skip over the entire contents of a box.
fn skip_box_content<T: Read>(src: &mut BMFFBox<'_, T>) -> Result<()> {
    // Skip the contents of unknown chunks.
    let to_skip = {
        let header = src.get_header();
        debug!("{header:?} (skipped)");
        header
            .size
            .checked_sub(header.offset)
            .ok_or(Error::InvalidData("header offset > size"))?
    };
    skip(src, to_skip)
}

#[cfg_attr(debug_assertions, track_caller)]
fn check_parser_state<T>(header: &BoxHeader, left: &Take<T>) -> Result<(), Error> {
    let limit = left.limit();
    // Allow fully consumed boxes, or size=0 boxes (where original size was u64::MAX)
    if limit == 0 || header.size == u64::MAX {
        Ok(())
    } else {
        Err(Error::InvalidData("unread box content or bad parser sync"))
    }
}

/// Skip a number of bytes that we don't care to parse.
fn skip<T: Read>(src: &mut T, bytes: u64) -> Result<()> {
    std::io::copy(&mut src.take(bytes), &mut std::io::sink())?;
    Ok(())
}

// Big-endian primitives. Property decoders check the payload length before
// reading, so a short read here means a decoder bug, reported as EOF.

pub(crate) fn be_u16<T: ReadBytesExt>(src: &mut T) -> Result<u16> {
    src.read_u16::<byteorder::BigEndian>().map_err(From::from)
}

pub(crate) fn be_u32<T: ReadBytesExt>(src: &mut T) -> Result<u32> {
    src.read_u32::<byteorder::BigEndian>().map_err(From::from)
}

pub(crate) fn be_i32<T: ReadBytesExt>(src: &mut T) -> Result<i32> {
    src.read_i32::<byteorder::BigEndian>().map_err(From::from)
}

pub(crate) fn be_u64<T: ReadBytesExt>(src: &mut T) -> Result<u64> {
    src.read_u64::<byteorder::BigEndian>().map_err(From::from)
}

/// Bit-exact: the eight bytes are reinterpreted, never converted.
pub(crate) fn be_f64<T: ReadBytesExt>(src: &mut T) -> Result<f64> {
    src.read_f64::<byteorder::BigEndian>().map_err(From::from)
}

#[test]
fn be_f64_is_bit_exact() {
    let bits = 0x7ff8_0000_dead_beef_u64; // NaN payload must survive
    let bytes = bits.to_be_bytes();
    let value = be_f64(&mut &bytes[..]).unwrap();
    assert_eq!(value.to_bits(), bits);
}

#[test]
fn be_primitives_report_eof() {
    let short = [0u8; 3];
    assert!(matches!(be_u32(&mut &short[..]), Err(Error::UnexpectedEOF)));
    assert_eq!(be_i32(&mut &[0xff, 0xff, 0xff, 0xfe][..]).unwrap(), -2);
}
