#![no_main]

use libfuzzer_sys::fuzz_target;

use gimi_parse::{GeoMetadata, GeoTransform, GroundControlPoint};

// Header layout (4 bytes):
// [0..2]  width (u16 BE)
// [2..4]  height (u16 BE)
// [4..]   KLV local set
const HEADER_SIZE: usize = 4;

fuzz_target!(|data: &[u8]| {
    if data.len() < HEADER_SIZE {
        return;
    }
    let width = u32::from(u16::from_be_bytes([data[0], data[1]]));
    let height = u32::from(u16::from_be_bytes([data[2], data[3]]));

    let Ok(set) = gimi_parse::read_st0601(&data[HEADER_SIZE..], width, height) else {
        return;
    };
    assert!(set.corner_gcps().is_empty() || set.corner_gcps().len() == 4);

    let fit = |gcps: &[GroundControlPoint]| -> Option<GeoTransform> {
        let first = gcps.first()?;
        Some(GeoTransform([first.x, 1.0, 0.0, first.y, 0.0, -1.0]))
    };
    let mut geo = GeoMetadata::new();
    let _ = geo.apply_st0601(&set, &fit);
});
