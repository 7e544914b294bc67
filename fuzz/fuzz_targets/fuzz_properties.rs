#![no_main]

use libfuzzer_sys::fuzz_target;

use gimi_parse::{DecodeConfig, GeoMetadata, PropertyBox};

const TYPES: [[u8; 4]; 7] = [*b"mcrs", *b"mtxf", *b"taic", *b"itai", *b"udes", *b"tiep", *b"ispe"];

// Input layout: repeated [selector, len, payload...]. Selector picks a box
// type, or a content id `uuid` box when out of range.
fuzz_target!(|data: &[u8]| {
    let mut boxes = Vec::new();
    let mut rest = data;
    while let [selector, len, tail @ ..] = rest {
        let len = usize::from(*len).min(tail.len());
        let (payload, next) = tail.split_at(len);
        boxes.push(match TYPES.get(usize::from(*selector)) {
            Some(t) => PropertyBox::new(*t, payload),
            None => PropertyBox::uuid(gimi_parse::CONTENT_ID_USER_TYPE, payload),
        });
        rest = next;
    }

    let mut geo = GeoMetadata::new();
    geo.read_properties(boxes, &DecodeConfig::default().with_max_gcps(4096));
});
