//! Property-based tests using proptest
//!
//! Random containers (any subset of formats, arbitrary payloads, optional
//! extra data, finite transforms) must survive a write/read cycle and
//! re-serialize to identical bytes.

use proptest::prelude::*;
use std::sync::Arc;

use multipic::{CodecRegistry, DrawingSettings, Endian, PictureContainer, Transform, WriteOptions};

/// Identifiers a generated container may use; ".xyz" has no codec.
const IDS: &[&str] = &[".png", ".jpg", ".gif", ".pict", ".svg", ".xyz"];

/// One optional payload per entry of `IDS`.
fn payloads_strategy() -> impl Strategy<Value = Vec<Option<Vec<u8>>>> {
    prop::collection::vec(prop::option::of(prop::collection::vec(any::<u8>(), 0..256)), IDS.len())
}

fn transform_strategy() -> impl Strategy<Value = Transform> {
    let component = -1.0e6f64..1.0e6f64;
    prop_oneof![
        Just(Transform::IDENTITY),
        (component.clone(), component.clone(), component.clone(),
         component.clone(), component.clone(), component)
            .prop_map(|(a, b, c, d, tx, ty)| Transform { a, b, c, d, tx, ty }),
    ]
}

fn options_strategy() -> impl Strategy<Value = WriteOptions> {
    (6u32..=8, any::<bool>(), any::<bool>()).prop_map(|(version, big, shortcut)| WriteOptions {
        version,
        endian:             if big { Endian::Big } else { Endian::Little },
        allow_raw_shortcut: shortcut,
    })
}

fn build(
    payloads:  &[Option<Vec<u8>>],
    transform: Transform,
    extra:     Option<Vec<u8>>,
) -> PictureContainer {
    let mut pic = PictureContainer::with_registry(Arc::new(CodecRegistry::new()));
    for (id, bytes) in IDS.iter().zip(payloads) {
        if let Some(bytes) = bytes {
            pic.add_data(Some(*id), bytes.clone(), true).unwrap();
        }
    }
    pic.set_settings(DrawingSettings { transform, ..Default::default() });
    pic.set_extra_data(extra);
    pic
}

/// Extra data needs version 7 or later.
fn fit(opts: WriteOptions, pic: &PictureContainer) -> WriteOptions {
    let min = if pic.extra_data().is_some() { 7 } else { 6 };
    WriteOptions { version: opts.version.max(min), ..opts }
}

fn pairs(pic: &PictureContainer) -> Vec<(String, Vec<u8>)> {
    pic.representation_map()
        .iter()
        .map(|(k, r)| (k.clone(), r.payload().to_vec()))
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn roundtrip_preserves_everything(
        payloads  in payloads_strategy(),
        transform in transform_strategy(),
        extra     in prop::option::of(prop::collection::vec(any::<u8>(), 0..64)),
        opts      in options_strategy(),
    ) {
        let pic = build(&payloads, transform, extra);
        let bytes = pic.to_bytes_with(&fit(opts, &pic)).unwrap();

        let mut back = PictureContainer::with_registry(Arc::clone(pic.registry()));
        back.load(bytes).unwrap();
        prop_assert_eq!(pairs(&back), pairs(&pic));
        prop_assert_eq!(back.extra_data(), pic.extra_data());
        prop_assert_eq!(back.settings(), pic.settings());
        prop_assert_eq!(back.is_empty(), pic.is_empty());
    }

    #[test]
    fn rewrite_is_byte_identical(
        payloads  in payloads_strategy(),
        transform in transform_strategy(),
        extra     in prop::option::of(prop::collection::vec(any::<u8>(), 1..64)),
        opts      in options_strategy(),
    ) {
        let pic = build(&payloads, transform, extra);
        let opts = fit(opts, &pic);
        let first = pic.to_bytes_with(&opts).unwrap();

        let mut back = PictureContainer::with_registry(Arc::clone(pic.registry()));
        back.load(first.clone()).unwrap();
        prop_assert_eq!(back.to_bytes_with(&opts).unwrap(), first);
    }
}
