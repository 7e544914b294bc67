#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let config = gimi_parse::DecodeConfig::default()
        .with_max_properties(256)
        .with_max_gcps(4096);
    let _ = gimi_parse::read_geo_metadata_with_config(data, &config);
});
