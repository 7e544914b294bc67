// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::fmt::Write as _;

use bitreader::BitReader;
use log::{debug, warn};

use crate::boxes::{BoxType, FourCC};
use crate::metadata::{GIMI_DOMAIN, MetadataStore, ST0601_DOMAIN, TIMING_DOMAIN, description_domain};
use crate::st0601::St0601Set;
use crate::{
    DecodeConfig, Error, ResourceTracker, Result, ToUsize, TryVec, be_f64, be_i32, be_u16, be_u32, be_u64,
    read_fullbox_extra,
};

/// User type of the `uuid` property carrying the item content identifier.
pub const CONTENT_ID_USER_TYPE: [u8; 16] = [
    0x4a, 0x66, 0xef, 0xa7, 0xe5, 0x41, 0x52, 0x6c, 0x94, 0x27, 0x9e, 0x77, 0x61, 0x7f, 0xeb, 0x7d,
];

const MCRS_MIN_SIZE: usize = 6;
/// version/flags + six doubles; 3D transforms (twelve doubles) are not handled
const MTXF_2D_SIZE: usize = 52;
const TAIC_SIZE: usize = 21;
const ITAI_SIZE: usize = 13;
const UDES_MIN_SIZE: usize = 4;
/// version/flags + count + one 2D point
const TIEP_MIN_SIZE: usize = 30;
const TIEP_HEADER_SIZE: usize = 6;
const CONTENT_ID_SIZE: usize = 16;

const UNKNOWN: &str = "(Unknown)";

/// A property box attached to an image item.
///
/// A borrowed view; the payload starts right after the box header (and the
/// 16-byte user type for `uuid` boxes), so full-box properties begin with
/// their version byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyBox<'a> {
    pub box_type: FourCC,
    /// Extended type, only present for `uuid` boxes.
    pub user_type: Option<[u8; 16]>,
    pub payload: &'a [u8],
}

impl<'a> PropertyBox<'a> {
    pub fn new(box_type: impl Into<FourCC>, payload: &'a [u8]) -> Self {
        Self {
            box_type: box_type.into(),
            user_type: None,
            payload,
        }
    }

    /// A `uuid` box with the given extended type.
    pub fn uuid(user_type: [u8; 16], payload: &'a [u8]) -> Self {
        Self {
            box_type: FourCC::new(*b"uuid"),
            user_type: Some(user_type),
            payload,
        }
    }
}

/// Affine pixel/line to map transform, in `[c, a, b, f, d, e]` order:
///
/// ```text
/// X = c + a * pixel + b * line
/// Y = f + d * pixel + e * line
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform(pub [f64; 6]);

impl GeoTransform {
    /// Map a pixel/line position to map coordinates.
    #[must_use]
    pub fn apply(&self, pixel: f64, line: f64) -> (f64, f64) {
        let [c, a, b, f, d, e] = self.0;
        (c + a * pixel + b * line, f + d * pixel + e * line)
    }
}

/// A correspondence between a raster position and a map position.
#[derive(Debug, Clone, PartialEq)]
pub struct GroundControlPoint {
    pub id: String,
    pub info: String,
    pub pixel: f64,
    pub line: f64,
    pub x: f64,
    pub y: f64,
    /// 0.0 unless the source carried an elevation.
    pub z: f64,
}

/// Image spatial extents (dimensions)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageSpatialExtents {
    pub width: u32,
    pub height: u32,
}

/// Fits an affine transform to a set of ground control points.
///
/// The solver itself lives outside this crate. Implemented for closures, so
/// `|gcps: &[GroundControlPoint]| solver(gcps)` can be passed directly.
pub trait AffineFit {
    /// `None` if no transform could be fitted.
    fn fit(&self, gcps: &[GroundControlPoint]) -> Option<GeoTransform>;
}

impl<F> AffineFit for F
where
    F: Fn(&[GroundControlPoint]) -> Option<GeoTransform>,
{
    fn fit(&self, gcps: &[GroundControlPoint]) -> Option<GeoTransform> {
        self(gcps)
    }
}

/// Georeferencing and descriptive metadata of one image item.
///
/// Filled by [`read_properties`](Self::read_properties) and
/// [`apply_st0601`](Self::apply_st0601). Fields aggregate differently:
/// the first usable `mcrs` box sets the spatial reference and later ones are
/// ignored, `tiep` boxes append ground control points, and every other value
/// is overwritten by later boxes.
#[derive(Debug)]
pub struct GeoMetadata {
    spatial_ref: Option<String>,
    geo_transform: Option<GeoTransform>,
    gcps: TryVec<GroundControlPoint>,
    extents: Option<ImageSpatialExtents>,
    metadata: MetadataStore,
}

impl Default for GeoMetadata {
    fn default() -> Self {
        Self::new()
    }
}

impl GeoMetadata {
    pub fn new() -> Self {
        Self {
            spatial_ref: None,
            geo_transform: None,
            gcps: TryVec::new(),
            extents: None,
            metadata: MetadataStore::new(),
        }
    }

    /// Decode every box in `boxes`.
    ///
    /// Boxes that are unknown, truncated or otherwise malformed are skipped;
    /// nothing here fails the whole pass.
    pub fn read_properties<'a, I>(&mut self, boxes: I, config: &DecodeConfig)
    where
        I: IntoIterator<Item = PropertyBox<'a>>,
    {
        for prop in boxes {
            self.read_property(&prop, config);
        }
    }

    /// Decode a single box, see [`read_properties`](Self::read_properties).
    pub fn read_property(&mut self, prop: &PropertyBox<'_>, config: &DecodeConfig) {
        if let Err(e) = self.try_read_property(prop, config) {
            match e {
                Error::OutOfMemory | Error::ResourceLimitExceeded(_) => {
                    warn!("skipping '{}' property: {e}", prop.box_type);
                },
                _ => debug!("skipping '{}' property: {e}", prop.box_type),
            }
        }
    }

    fn try_read_property(&mut self, prop: &PropertyBox<'_>, config: &DecodeConfig) -> Result<()> {
        let payload = prop.payload;
        match BoxType::from(prop.box_type) {
            BoxType::ModelCrsProperty => {
                if self.spatial_ref.is_some() {
                    debug!("ignoring additional mcrs property");
                } else if let Some(wkt) = read_mcrs(payload)? {
                    self.spatial_ref = Some(wkt);
                }
            },
            BoxType::ModelTransformationProperty => {
                self.geo_transform = Some(read_mtxf(payload)?);
            },
            BoxType::TaiClockInfoProperty => {
                read_taic(payload)?.publish(&mut self.metadata)?;
            },
            BoxType::TaiTimestampProperty => {
                read_itai(payload)?.publish(&mut self.metadata)?;
            },
            BoxType::UserDescriptionProperty => {
                read_udes(payload)?.publish(&mut self.metadata)?;
            },
            BoxType::TiePointProperty => {
                let mut points = read_tiep(payload)?;
                ResourceTracker::new(config).validate_gcps(self.gcps.len() + points.len())?;
                self.gcps.append(&mut points)?;
            },
            BoxType::UuidBox => match prop.user_type {
                Some(CONTENT_ID_USER_TYPE) => {
                    let content_id = read_content_id(payload)?;
                    self.metadata.set_item(GIMI_DOMAIN, "ITEM_CONTENT_ID", content_id)?;
                },
                Some(_) => debug!("ignoring uuid property with unknown user type"),
                None => return Err(Error::InvalidData("uuid property without user type")),
            },
            BoxType::ImageSpatialExtentsBox => {
                self.extents = Some(read_ispe(payload)?);
            },
            _ => debug!("ignoring '{}' property", prop.box_type),
        }
        Ok(())
    }

    /// Publish a decoded ST0601 set and derive a transform from its corners.
    ///
    /// Every entry is appended to the `GIMI ST0601` domain. If the set has all
    /// four corner points they are passed to `fit`; on success the result
    /// becomes the geotransform. On failure the geotransform is left as it was
    /// and [`Error::AffineFitFailed`] is returned, with the entries already
    /// published.
    pub fn apply_st0601<F>(&mut self, set: &St0601Set, fit: &F) -> Result<()>
    where
        F: AffineFit + ?Sized,
    {
        for entry in set.entries() {
            self.metadata.push_item(ST0601_DOMAIN, entry.name, entry.value.clone())?;
        }

        let corners = set.corner_gcps();
        if corners.is_empty() {
            return Ok(());
        }
        match fit.fit(corners) {
            Some(transform) => {
                self.geo_transform = Some(transform);
                Ok(())
            },
            None => {
                warn!("no affine transform fits the ST0601 corner points");
                Err(Error::AffineFitFailed)
            },
        }
    }

    /// Well-known text of the coordinate reference system.
    pub fn spatial_ref(&self) -> Option<&str> {
        self.spatial_ref.as_deref()
    }

    /// `None` until a transform has been decoded.
    pub fn geo_transform(&self) -> Option<&GeoTransform> {
        self.geo_transform.as_ref()
    }

    pub fn gcp_count(&self) -> usize {
        self.gcps.len()
    }

    /// Ground control points in the order they were decoded.
    pub fn gcps(&self) -> &[GroundControlPoint] {
        &self.gcps
    }

    /// Raster size from the `ispe` property, if one was seen.
    pub fn extents(&self) -> Option<ImageSpatialExtents> {
        self.extents
    }

    pub fn metadata(&self) -> &MetadataStore {
        &self.metadata
    }
}

/// Model CRS property. `Ok(None)` for encodings other than WKT2, which are
/// reserved.
fn read_mcrs(payload: &[u8]) -> Result<Option<String>> {
    if payload.len() < MCRS_MIN_SIZE {
        return Err(Error::InvalidData("mcrs too short"));
    }
    let (version, _flags) = read_fullbox_extra(&mut &payload[..])?;
    if version != 0 {
        return Err(Error::Unsupported("mcrs version"));
    }

    match payload.get(4..8) {
        Some(b"wkt2") => {},
        Some(_) => return Ok(None),
        None => return Err(Error::InvalidData("mcrs too short for crs encoding")),
    }

    // NUL-terminated, but don't trust the terminator to be there
    let text = &payload[8..];
    let text = match text.iter().position(|&b| b == b'\0') {
        Some(end) => &text[..end],
        None => text,
    };
    if text.is_empty() {
        return Err(Error::InvalidData("mcrs has empty wkt2"));
    }
    let wkt = std::str::from_utf8(text).map_err(|_| Error::InvalidData("mcrs wkt2 is not utf8"))?;
    Ok(Some(wkt.into()))
}

/// Model transformation property, 2D form only.
fn read_mtxf(payload: &[u8]) -> Result<GeoTransform> {
    if payload.len() != MTXF_2D_SIZE {
        return Err(Error::Unsupported("mtxf is not a 2D transform"));
    }
    let src = &mut &payload[..];
    let (version, flags) = read_fullbox_extra(src)?;
    if version != 0 {
        return Err(Error::Unsupported("mtxf version"));
    }
    if flags & 0xff != 1 {
        return Err(Error::Unsupported("mtxf transform flags"));
    }

    // Stored row-major as a b c / d e f
    let a = be_f64(src)?;
    let b = be_f64(src)?;
    let c = be_f64(src)?;
    let d = be_f64(src)?;
    let e = be_f64(src)?;
    let f = be_f64(src)?;
    Ok(GeoTransform([c, a, b, f, d, e]))
}

struct TaiClockInfo {
    time_uncertainty: u64,
    clock_resolution: u32,
    clock_drift_rate: i32,
    clock_type: u8,
}

impl TaiClockInfo {
    fn publish(&self, metadata: &mut MetadataStore) -> Result<()> {
        let uncertainty = match self.time_uncertainty {
            u64::MAX => UNKNOWN.into(),
            ns => format!("{ns} ns"),
        };
        metadata.set_item(TIMING_DOMAIN, "TIME_UNCERTAINTY", uncertainty)?;
        metadata.set_item(TIMING_DOMAIN, "CLOCK_RESOLUTION", format!("{} ns", self.clock_resolution))?;
        let drift = match self.clock_drift_rate {
            i32::MAX => UNKNOWN.into(),
            rate => format!("{rate} ps/s"),
        };
        metadata.set_item(TIMING_DOMAIN, "CLOCK_DRIFT_RATE", drift)?;

        let clock_type = match self.clock_type {
            0 => "0 (Unknown)",
            1 => "1 (Does not synchronize to absolute TAI time)",
            2 => "2 (Can synchronize to absolute TAI time)",
            _ => return Ok(()),
        };
        metadata.set_item(TIMING_DOMAIN, "CLOCK_TYPE", clock_type.into())
    }
}

/// TAI clock information property.
fn read_taic(payload: &[u8]) -> Result<TaiClockInfo> {
    if payload.len() != TAIC_SIZE {
        return Err(Error::InvalidData("taic size"));
    }
    let src = &mut &payload[..];
    let (version, _flags) = read_fullbox_extra(src)?;
    if version != 0 {
        return Err(Error::Unsupported("taic version"));
    }

    let time_uncertainty = be_u64(src)?;
    let clock_resolution = be_u32(src)?;
    let clock_drift_rate = be_i32(src)?;
    let mut bits = BitReader::new(*src);
    let clock_type = bits.read_u8(2)?;

    Ok(TaiClockInfo {
        time_uncertainty,
        clock_resolution,
        clock_drift_rate,
        clock_type,
    })
}

struct TaiTimestamp {
    timestamp: u64,
    synchronized: bool,
    generation_failure: bool,
    modified: bool,
}

impl TaiTimestamp {
    fn publish(&self, metadata: &mut MetadataStore) -> Result<()> {
        fn yes_no(flag: bool) -> String {
            String::from(if flag { "YES" } else { "NO" })
        }

        metadata.set_item(TIMING_DOMAIN, "TAI_TIMESTAMP", format!("{} ns", self.timestamp))?;
        let sync = if self.synchronized { "SYNCHRONIZED" } else { "NOT SYNCHRONIZED" };
        metadata.set_item(TIMING_DOMAIN, "SYNCHRONIZATION_STATE", sync.into())?;
        metadata.set_item(TIMING_DOMAIN, "TIMESTAMP_GENERATION_FAILURE", yes_no(self.generation_failure))?;
        metadata.set_item(TIMING_DOMAIN, "TIMESTAMP_IS_MODIFIED", yes_no(self.modified))
    }
}

/// TAI timestamp property.
fn read_itai(payload: &[u8]) -> Result<TaiTimestamp> {
    if payload.len() != ITAI_SIZE {
        return Err(Error::InvalidData("itai size"));
    }
    let src = &mut &payload[..];
    let (version, _flags) = read_fullbox_extra(src)?;
    if version != 0 {
        return Err(Error::Unsupported("itai version"));
    }

    let timestamp = be_u64(src)?;
    let mut bits = BitReader::new(*src);
    Ok(TaiTimestamp {
        timestamp,
        synchronized: bits.read_bool()?,
        generation_failure: bits.read_bool()?,
        modified: bits.read_bool()?,
    })
}

struct UserDescription {
    lang: String,
    name: String,
    description: String,
    tags: String,
}

impl UserDescription {
    fn publish(&self, metadata: &mut MetadataStore) -> Result<()> {
        let domain = description_domain(&self.lang);
        metadata.set_item(&domain, "NAME", self.name.clone())?;
        metadata.set_item(&domain, "DESCRIPTION", self.description.clone())?;
        if !self.tags.is_empty() {
            metadata.set_item(&domain, "TAGS", self.tags.clone())?;
        }
        Ok(())
    }
}

/// User description property: four NUL-terminated strings.
fn read_udes(payload: &[u8]) -> Result<UserDescription> {
    if payload.len() < UDES_MIN_SIZE {
        return Err(Error::InvalidData("udes too short"));
    }
    let (version, _flags) = read_fullbox_extra(&mut &payload[..])?;
    if version != 0 {
        return Err(Error::Unsupported("udes version"));
    }

    let mut fields = payload[4..]
        .split(|&b| b == b'\0')
        .map(|field| String::from_utf8_lossy(field).into_owned());
    let mut next = || fields.next().unwrap_or_default();
    Ok(UserDescription {
        lang: next(),
        name: next(),
        description: next(),
        tags: next(),
    })
}

/// Tie point property.
///
/// All points are read before any is returned, so a box whose count overruns
/// the payload yields nothing.
fn read_tiep(payload: &[u8]) -> Result<TryVec<GroundControlPoint>> {
    if payload.len() < TIEP_MIN_SIZE {
        return Err(Error::InvalidData("tiep too short"));
    }
    let src = &mut &payload[..];
    let (version, flags) = read_fullbox_extra(src)?;
    if version != 0 {
        return Err(Error::Unsupported("tiep version"));
    }
    let is_3d = flags & 0xff == 0;
    let count = be_u16(src)?.to_usize();

    let entry_size = if is_3d { 4 + 4 + 8 * 3 } else { 4 + 4 + 8 * 2 };
    let needed = count
        .checked_mul(entry_size)
        .and_then(|n| n.checked_add(TIEP_HEADER_SIZE))
        .ok_or(Error::InvalidData("tiep count overflow"))?;
    if needed > payload.len() {
        return Err(Error::InvalidData("tiep count exceeds payload"));
    }

    let mut points = TryVec::with_capacity(count)?;
    for index in 0..count {
        let pixel = f64::from(be_i32(src)?);
        let line = f64::from(be_i32(src)?);
        let x = be_f64(src)?;
        let y = be_f64(src)?;
        let z = if is_3d { be_f64(src)? } else { 0.0 };
        points.push(GroundControlPoint {
            id: index.to_string(),
            info: String::new(),
            pixel,
            line,
            x,
            y,
            z,
        })?;
    }
    Ok(points)
}

/// Content identifier payload of a `uuid` property, as canonical UUID text.
fn read_content_id(payload: &[u8]) -> Result<String> {
    let bytes: &[u8; CONTENT_ID_SIZE] = payload
        .try_into()
        .map_err(|_| Error::InvalidData("content id size"))?;
    Ok(format_uuid(bytes))
}

/// Lower-case hyphenated `8-4-4-4-12` form.
fn format_uuid(bytes: &[u8; 16]) -> String {
    let mut text = String::with_capacity(36);
    for (i, byte) in bytes.iter().enumerate() {
        if matches!(i, 4 | 6 | 8 | 10) {
            text.push('-');
        }
        let _ = write!(text, "{byte:02x}");
    }
    text
}

/// Parse an Image Spatial Extents property box
/// See ISO/IEC 23008-12:2017 § 6.5.3
fn read_ispe(payload: &[u8]) -> Result<ImageSpatialExtents> {
    let src = &mut &payload[..];
    let (version, _flags) = read_fullbox_extra(src)?;
    if version != 0 {
        return Err(Error::Unsupported("ispe version"));
    }

    let width = be_u32(src)?;
    let height = be_u32(src)?;

    // Validate dimensions are non-zero (0×0 images are invalid)
    if width == 0 || height == 0 {
        return Err(Error::InvalidData("ispe dimensions cannot be zero"));
    }

    Ok(ImageSpatialExtents { width, height })
}
