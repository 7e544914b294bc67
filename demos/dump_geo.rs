//! Dump the geospatial metadata of a HEIF/AVIF file
use std::env;
use std::process;

use gimi_parse::{DecodeConfig, read_geo_metadata_with_config, read_item_properties};

fn main() {
    env_logger::init();
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <heif-file> [item-id]", args[0]);
        process::exit(1);
    }

    let path = &args[1];
    let data = std::fs::read(path).expect("Failed to read file");
    let config = DecodeConfig::default();

    if let Some(item) = args.get(2) {
        let item_id: u32 = item.parse().expect("item id must be a number");
        let properties = match read_item_properties(&data, Some(item_id), &config) {
            Ok(p) => p,
            Err(e) => {
                eprintln!("Parse error: {e}");
                process::exit(1);
            },
        };
        for (i, prop) in properties.boxes().enumerate() {
            println!("  [{i}] {} ({} bytes)", prop.box_type, prop.payload.len());
        }
        return;
    }

    let geo = match read_geo_metadata_with_config(&data, &config) {
        Ok(geo) => geo,
        Err(e) => {
            eprintln!("Parse error: {e}");
            process::exit(1);
        },
    };

    println!("File: {path}");
    if let Some(extents) = geo.extents() {
        println!("Size: {}x{}", extents.width, extents.height);
    }
    if let Some(srs) = geo.spatial_ref() {
        println!("CRS: {srs}");
    }
    if let Some(t) = geo.geo_transform() {
        println!("GeoTransform: {:?}", t.0);
    }
    if geo.gcp_count() > 0 {
        println!("GCPs: {}", geo.gcp_count());
        for gcp in geo.gcps() {
            println!(
                "  {}: ({}, {}) -> ({}, {}, {})",
                gcp.id, gcp.pixel, gcp.line, gcp.x, gcp.y, gcp.z
            );
        }
    }
    for domain in geo.metadata().domains() {
        println!("[{}]", domain.name());
        for item in domain.items() {
            println!("  {}={}", item.key, item.value);
        }
    }
}
