use multipic::codec::builtin::{ids, ReferenceCodec};
use multipic::format::header::ContainerHeader;
use multipic::{
    inspect, CodecRegistry, DedupAccumulator, DrawingSettings, Endian, Error, Layout,
    MemoryProvider, PictureContainer, ReadOptions, Representation, RepresentationKind,
    TransferMode, Transform, WriteOptions,
};
use std::fs::File;
use std::io::{Cursor, Seek, SeekFrom, Write};
use std::sync::Arc;
use tempfile::{NamedTempFile, TempDir};

const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR\0\0\x01\0\0\0\0\x80\x08\x06\0\0\0rest-of-png";
const GIF: &[u8] = b"GIF89a\x02\0\x02\0\0\0\0\x2C\0\0\0\0\x02\0\x02\0\0\x02\x02\x44\x01\0\x3B";
const PICT: &[u8] = b"\0\x0a\0\0\0\0\0\x40\0\x40legacy-quickdraw-ops";

fn fresh() -> PictureContainer {
    PictureContainer::with_registry(Arc::new(CodecRegistry::new()))
}

fn reload(pic: &PictureContainer, opts: &WriteOptions) -> PictureContainer {
    let bytes = pic.to_bytes_with(opts).unwrap();
    let mut back = PictureContainer::with_registry(Arc::clone(pic.registry()));
    back.load(bytes).unwrap();
    back
}

fn pairs(pic: &PictureContainer) -> Vec<(String, Vec<u8>)> {
    pic.representation_map()
        .iter()
        .map(|(k, r)| (k.clone(), r.payload().to_vec()))
        .collect()
}

#[test]
fn test_scenario_arbitrary_png_payload_v8() {
    let payload = b"these bytes are not a PNG at all".to_vec();
    let mut pic = fresh();
    pic.add_data(Some(".png"), payload.clone(), false).unwrap();

    let back = reload(&pic, &WriteOptions { version: 8, ..Default::default() });
    assert_eq!(back.count_representations(), 1);
    assert!(!back.is_empty());
    assert_eq!(back.representation(".png").unwrap().payload().as_slice(), &payload[..]);
}

#[test]
fn test_scenario_empty_container_is_zero_bytes() {
    let pic = fresh();
    assert!(pic.is_empty());
    let bytes = pic.to_bytes().unwrap();
    assert!(bytes.is_empty());

    let back = PictureContainer::from_bytes(Vec::new()).unwrap();
    assert!(back.is_empty());
    assert_eq!(back.count_representations(), 0);
}

#[test]
fn test_multi_representation_roundtrip_all_versions() {
    let mut pic = fresh();
    pic.add_data(None, PNG.to_vec(), false).unwrap();
    pic.add_data(Some("PICT"), PICT.to_vec(), false).unwrap();
    pic.add_data(Some(ids::REFERENCE), ReferenceCodec::payload_for("/art/logo.png"), false).unwrap();

    for version in 6..=8 {
        let back = reload(&pic, &WriteOptions { version, ..Default::default() });
        assert_eq!(pairs(&back), pairs(&pic), "version {version}");
    }

    // Version 5 has no names; PICT has no signature to be found by.
    let v5 = WriteOptions { version: 5, ..Default::default() };
    assert!(matches!(pic.to_bytes_with(&v5), Err(Error::Unsupported(_))));

    pic.remove_representation(".pict");
    pic.add_data(None, GIF.to_vec(), false).unwrap();
    let back = reload(&pic, &v5);
    assert_eq!(back.count_representations(), 3);
    assert_eq!(pairs(&back), pairs(&pic));
}

#[test]
fn test_version_5_refuses_unrecognizable_entries() {
    let mut pic = fresh();
    pic.add_data(Some(".png"), b"not a png".to_vec(), false).unwrap();
    pic.add_data(Some(".pict"), b"vector ops".to_vec(), false).unwrap();

    let v5 = WriteOptions { version: 5, ..Default::default() };
    assert!(matches!(pic.to_bytes_with(&v5), Err(Error::Unsupported(_))));
    assert_eq!(pic.count_representations(), 2);

    let back = reload(&pic, &WriteOptions::default());
    assert_eq!(pairs(&back), pairs(&pic));
}

#[test]
fn test_settings_and_extra_data_roundtrip() {
    let mut pic = fresh();
    pic.add_data(None, PNG.to_vec(), false).unwrap();
    pic.set_settings(DrawingSettings {
        transform:     Transform::translate(10.0, 20.5).then(&Transform::scale(0.25, 4.0)),
        origin:        (-3, 9),
        transfer_mode: TransferMode::Blend,
        source_file:   Some("logo.png".into()),
        ..Default::default()
    });
    pic.set_extra_data(Some(b"\x00opaque\xFFtrailer".to_vec()));

    for endian in [Endian::Little, Endian::Big] {
        let back = reload(&pic, &WriteOptions { endian, ..Default::default() });
        assert_eq!(back.settings(), pic.settings());
        assert_eq!(back.extra_data(), pic.extra_data());
        assert_eq!(pairs(&back), pairs(&pic));
    }
}

#[test]
fn test_single_representation_shortcut() {
    let mut pic = fresh();
    pic.add_data(None, PNG.to_vec(), false).unwrap();
    let bytes = pic.to_bytes().unwrap();
    assert_eq!(bytes, PNG, "a lone PNG is stored as plain PNG bytes");
    assert_eq!(inspect(&MemoryProvider::from_vec(bytes.clone())).unwrap(), Layout::Raw);

    let back = PictureContainer::from_bytes(bytes).unwrap();
    assert_eq!(pairs(&back), pairs(&pic));
    assert_eq!(back.dimensions(), Some((256, 128)));

    // Non-identity transform forces a full container.
    pic.set_transform(Transform::scale(2.0, 2.0)).unwrap();
    let bytes = pic.to_bytes().unwrap();
    assert_eq!(&bytes[..4], b"MPIC");
}

#[test]
fn test_byteswapped_header_reads_like_native() {
    let mut pic = fresh();
    pic.add_data(None, PNG.to_vec(), false).unwrap();
    pic.add_data(Some(".pict"), PICT.to_vec(), false).unwrap();
    pic.set_extra_data(Some(b"extra".to_vec()));

    let le = pic.to_bytes_with(&WriteOptions::default()).unwrap();
    let be = pic.to_bytes_with(&WriteOptions { endian: Endian::Big, ..Default::default() }).unwrap();
    assert_eq!(&be[..4], b"CIPM");

    let hl = ContainerHeader::read(Cursor::new(&le)).unwrap().unwrap();
    let hb = ContainerHeader::read(Cursor::new(&be)).unwrap().unwrap();
    assert_eq!(ContainerHeader { endian: Endian::Little, ..hb }, hl);

    let back = PictureContainer::from_bytes(be).unwrap();
    assert_eq!(pairs(&back), pairs(&pic));
    assert_eq!(back.extra_data(), Some(&b"extra"[..]));
}

#[test]
fn test_unknown_format_is_preserved() {
    let original = b"\x13\x37 proprietary raster \x00\x01\x02".to_vec();
    let mut pic = fresh();
    assert!(pic.add_data(Some(".prop"), original.clone(), false).is_err());
    let rep = pic.add_data(Some(".prop"), original.clone(), true).unwrap();
    assert!(rep.codec().is_private());

    let file = NamedTempFile::new().unwrap();
    pic.save(file.path()).unwrap();
    let back = PictureContainer::open(file.path()).unwrap();
    assert_eq!(back.representation(".prop").unwrap().payload().as_slice(), &original[..]);
}

#[test]
fn test_dedup_shares_payload_across_containers() {
    let registry = Arc::new(CodecRegistry::new());
    let mut first = PictureContainer::with_registry(Arc::clone(&registry));
    let shared = first.add_data(Some(".pict"), PICT.to_vec(), false).unwrap();
    first.add_data(None, PNG.to_vec(), false).unwrap();

    let mut second = PictureContainer::with_registry(Arc::clone(&registry));
    second.share_representations_from(&first);
    second.remove_representation(".png");

    let mut dedup = DedupAccumulator::new();
    let opts = WriteOptions { allow_raw_shortcut: false, ..Default::default() };
    let a = first.write_with(&mut dedup, &opts).unwrap();
    let b = second.write_with(&mut dedup, &opts).unwrap();

    let again = dedup.add(&shared);
    assert!(!again.is_new());
    let record = [a.clone(), b.clone()].concat();
    assert_eq!(record.windows(PICT.len()).filter(|w| *w == PICT).count(), 1);

    // Read both back through one accumulator.
    let mut dedup = DedupAccumulator::new();
    let mut ra = PictureContainer::with_registry(Arc::clone(&registry));
    let mut rb = PictureContainer::with_registry(registry);
    ra.load_with(&MemoryProvider::from_vec(a), &mut dedup, &ReadOptions::default()).unwrap();
    rb.load_with(&MemoryProvider::from_vec(b), &mut dedup, &ReadOptions::default()).unwrap();
    assert!(Representation::ptr_eq(
        ra.representation(".pict").unwrap(),
        rb.representation(".pict").unwrap(),
    ));
    assert!(!rb.has_backing_store());
}

#[test]
fn test_corrupt_input_yields_empty_container() {
    let mut pic = fresh();
    pic.add_data(Some(".pict"), PICT.to_vec(), false).unwrap();
    pic.add_data(None, PNG.to_vec(), false).unwrap();
    let good = pic.to_bytes().unwrap();

    let mut target = fresh();
    target.add_data(Some(".pict"), b"stale".to_vec(), false).unwrap();

    let truncated = good[..good.len() - 5].to_vec();
    assert!(matches!(target.load(truncated), Err(Error::Truncated { .. })));
    assert!(target.is_empty());

    let mut bad_version = good.clone();
    bad_version[4..8].copy_from_slice(&3u32.to_le_bytes());
    assert!(matches!(target.load(bad_version), Err(Error::UnsupportedVersion(3))));
    assert!(target.is_empty());

    // Inflate the payload size beyond the blob.
    let mut oversized = good;
    oversized[12..16].copy_from_slice(&u32::MAX.to_le_bytes());
    assert!(target.load(oversized).is_err());
    assert!(target.is_empty());
}

#[test]
fn test_stream_and_file_sources() {
    let mut pic = fresh();
    pic.add_data(Some(".pict"), PICT.to_vec(), false).unwrap();
    pic.set_extra_data(Some(b"x".to_vec()));
    let bytes = pic.to_bytes().unwrap();

    // A container stored after a prefix in a larger stream.
    let mut stream = Cursor::new(Vec::new());
    stream.write_all(b"PREFIX").unwrap();
    stream.write_all(&bytes).unwrap();
    stream.seek(SeekFrom::Start(6)).unwrap();
    let from_stream = PictureContainer::read_from(stream).unwrap();
    assert_eq!(pairs(&from_stream), pairs(&pic));

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("pic.mpic");
    {
        let mut out = fresh();
        out.share_representations_from(&pic);
        out.write_to(File::create(&path).unwrap()).unwrap();
        assert!(!out.is_dirty());
    }
    let from_file = PictureContainer::open(&path).unwrap();
    assert_eq!(pairs(&from_file), pairs(&pic));

    assert!(matches!(
        PictureContainer::open(dir.path().join("missing.mpic")),
        Err(Error::NotFound(_))
    ));
}

#[test]
fn test_add_file_types_by_extension_then_sniffing() {
    let dir = TempDir::new().unwrap();
    let pict = dir.path().join("legacy.PICT");
    let mislabeled = dir.path().join("photo.dat");
    std::fs::write(&pict, PICT).unwrap();
    std::fs::write(&mislabeled, PNG).unwrap();

    let mut pic = fresh();
    assert_eq!(pic.add_file(&pict, false).unwrap().id(), ids::PICT);
    assert_eq!(pic.add_file(&mislabeled, false).unwrap().id(), ids::PNG);
    assert_eq!(pic.best_for_display().unwrap().id(), ids::PNG);
    assert_eq!(pic.best_for_printing().unwrap().id(), ids::PICT);
}

#[test]
fn test_synthetic_representation_is_not_persisted() {
    let mut pic = fresh();
    pic.add_data(Some(ids::MEMORY), b"scratch".to_vec(), false).unwrap();
    assert_eq!(pic.representation(ids::MEMORY).unwrap().kind(), RepresentationKind::Synthetic);
    assert!(pic.to_bytes().unwrap().is_empty());

    pic.add_data(Some(".pict"), PICT.to_vec(), false).unwrap();
    let back = reload(&pic, &WriteOptions::default());
    assert_eq!(back.count_representations(), 1);
    assert!(back.contains(".pict"));
}

#[test]
fn test_idempotent_rewrite() {
    let mut pic = fresh();
    pic.add_data(Some(".pict"), PICT.to_vec(), false).unwrap();
    pic.add_data(None, PNG.to_vec(), false).unwrap();
    pic.set_transform(Transform::scale(1.5, 1.5)).unwrap();
    for version in 6..=8 {
        let opts = WriteOptions { version, ..Default::default() };
        let first = pic.to_bytes_with(&opts).unwrap();
        let mut back = fresh();
        back.load(first.clone()).unwrap();
        assert_eq!(back.to_bytes_with(&opts).unwrap(), first, "version {version}");
    }
}
