//! End-to-end container round-trip and determinism properties.

use similar_asserts::assert_eq;
use uuid::Uuid;

use sif::{
    AddOpts, Arch, Buffer, CreateOpts, DataType, DeleteOpts, DescriptorInput, FsType, Image,
    LoadOpts, PartType, Selector, SetOpts, DESCRIPTOR_SIZE, HEADER_SIZE,
};

const FIXED_ID: &str = "de170c43-36ab-44a8-bca9-1ea1a070a274";
const FIXED_TIME: i64 = 946702800;

fn generic(data: &'static [u8]) -> DescriptorInput<'static> {
    DescriptorInput::new(DataType::Generic, data)
}

fn create_bytes(opts: CreateOpts) -> Vec<u8> {
    Image::create(Buffer::new(), opts)
        .unwrap()
        .into_store()
        .unwrap()
        .into_vec()
}

#[test]
fn empty_deterministic_container_layout() {
    let opts = CreateOpts::new()
        .with_id(Uuid::parse_str(FIXED_ID).unwrap())
        .with_time(FIXED_TIME);
    let bytes = create_bytes(opts);

    // Fixed geometry: header, 48 table slots, empty data area.
    assert_eq!(bytes.len(), HEADER_SIZE + 48 * DESCRIPTOR_SIZE);
    assert_eq!(&bytes[..2], b"#!");
    assert_eq!(&bytes[32..42], b"SIF_MAGIC\0");
    assert_eq!(&bytes[42..45], b"02\0");
    assert_eq!(&bytes[45..48], b"00\0");
    assert_eq!(
        Uuid::from_slice(&bytes[48..64]).unwrap(),
        Uuid::parse_str(FIXED_ID).unwrap()
    );
    assert_eq!(
        i64::from_le_bytes(bytes[64..72].try_into().unwrap()),
        FIXED_TIME
    );
    assert_eq!(
        i64::from_le_bytes(bytes[72..80].try_into().unwrap()),
        FIXED_TIME
    );

    // Loading it back yields zero descriptors.
    let img = Image::load(Buffer::from_vec(bytes), LoadOpts::new()).unwrap();
    assert_eq!(img.descriptor_count(), 0);
    assert_eq!(img.id(), Uuid::parse_str(FIXED_ID).unwrap());
    assert_eq!(img.created_at(), FIXED_TIME);
}

#[test]
fn create_is_deterministic() {
    let make = || {
        create_bytes(
            CreateOpts::new()
                .deterministic()
                .with_descriptors(vec![generic(b"abc"), generic(b"defg")]),
        )
    };
    assert_eq!(make(), make());
}

#[test]
fn roundtrip_preserves_descriptors_and_payloads() {
    let part = DescriptorInput::new(DataType::Partition, &b"\xfa\xce"[..])
        .with_name("rootfs")
        .with_partition_metadata(FsType::Squash, PartType::System, Arch::Amd64)
        .unwrap();
    let bytes = create_bytes(
        CreateOpts::new()
            .deterministic()
            .with_descriptors(vec![generic(b"abc").with_group_id(1), part, generic(b"defg")]),
    );

    let img = Image::load(Buffer::from_vec(bytes), LoadOpts::new()).unwrap();
    assert_eq!(img.descriptor_count(), 3);

    let ds: Vec<_> = img.descriptors_iter().cloned().collect();
    assert_eq!(
        ds.iter().map(|d| d.id()).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert_eq!(img.data(&ds[0]).unwrap(), b"abc");
    assert_eq!(img.data(&ds[1]).unwrap(), b"\xfa\xce");
    assert_eq!(img.data(&ds[2]).unwrap(), b"defg");

    assert_eq!(ds[0].group_id(), 1);
    assert_eq!(ds[2].group_id(), 0);
    assert_eq!(ds[1].name(), "rootfs");
    assert_eq!(
        ds[1].partition_metadata().unwrap(),
        (FsType::Squash, PartType::System, Arch::Amd64)
    );

    // Data area accounting.
    assert_eq!(img.data_size(), 3 + 2 + 4);
}

#[test]
fn delete_compact_restores_previous_bytes() {
    let base = CreateOpts::new()
        .deterministic()
        .with_descriptors(vec![generic(b"abc")]);
    let before = create_bytes(base);

    let mut img = Image::load(Buffer::from_vec(before.clone()), LoadOpts::new().writable()).unwrap();
    img.add_object(generic(b"xyzzy"), AddOpts::new().deterministic())
        .unwrap();
    img.delete_object(
        2,
        DeleteOpts::new().compact(true).zero(true).deterministic(),
    )
    .unwrap();
    let after = img.into_store().unwrap().into_vec();

    assert_eq!(before, after);
}

#[test]
fn set_prim_part_scenario() {
    let part = |payload, arch| {
        DescriptorInput::new(DataType::Partition, payload)
            .with_partition_metadata(FsType::Raw, PartType::System, arch)
            .unwrap()
    };
    let bytes = create_bytes(
        CreateOpts::new()
            .with_id(Uuid::parse_str(FIXED_ID).unwrap())
            .with_time(FIXED_TIME)
            .with_descriptors(vec![
                part(&b"\xfa\xce"[..], Arch::I386),
                part(&b"\xfe\xed"[..], Arch::Amd64),
            ]),
    );

    let mut img = Image::load(Buffer::from_vec(bytes), LoadOpts::new().writable()).unwrap();
    img.set_prim_part(2, SetOpts::new().with_time(FIXED_TIME))
        .unwrap();

    let first = img.descriptor(&Selector::new().with_id(1)).unwrap();
    let second = img.descriptor(&Selector::new().with_id(2)).unwrap();
    assert_eq!(first.partition_metadata().unwrap().1, PartType::System);
    assert_eq!(second.partition_metadata().unwrap().1, PartType::PrimSys);
    assert_eq!(img.arch(), Arch::Amd64);

    // The change survives a reload.
    let bytes = img.into_store().unwrap().into_vec();
    let img = Image::load(Buffer::from_vec(bytes), LoadOpts::new()).unwrap();
    assert_eq!(img.arch(), Arch::Amd64);
    assert_eq!(img.primary_partition().unwrap().id(), 2);
}

#[test]
fn delete_then_add_scenario() {
    let mut img = Image::create(
        Buffer::new(),
        CreateOpts::new()
            .deterministic()
            .with_descriptors(vec![generic(b"abc"), generic(b"def")]),
    )
    .unwrap();

    img.delete_object(2, DeleteOpts::new().compact(true).deterministic())
        .unwrap();
    img.add_object(generic(b"ghi"), AddOpts::new().deterministic())
        .unwrap();

    let bytes = img.into_store().unwrap().into_vec();
    let img = Image::load(Buffer::from_vec(bytes), LoadOpts::new()).unwrap();

    let ids: Vec<u32> = img.descriptors_iter().map(|d| d.id()).collect();
    assert_eq!(ids, vec![1, 3]);
    let payloads: Vec<Vec<u8>> = img
        .descriptors_iter()
        .map(|d| img.data(d).unwrap())
        .collect();
    assert_eq!(payloads, vec![b"abc".to_vec(), b"ghi".to_vec()]);
    assert_eq!(img.data_size() as usize, "abc".len() + "ghi".len());
}

#[test]
fn file_backing_matches_buffer_backing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("test.sif");

    let opts = || {
        CreateOpts::new()
            .deterministic()
            .with_descriptors(vec![generic(b"abc"), generic(b"def")])
    };

    let mut img = Image::create_at_path(&path, opts()).unwrap();
    img.unload().unwrap();

    let from_file = std::fs::read(&path).unwrap();
    let from_buffer = create_bytes(opts());
    assert_eq!(from_file, from_buffer);

    // Read back through the file handle.
    let img = Image::load_from_path(&path, LoadOpts::new()).unwrap();
    let d = img.descriptor(&Selector::new().with_id(2)).unwrap();
    assert_eq!(img.data(&d).unwrap(), b"def");

    // Read-only handles refuse mutation.
    let mut img = Image::load_from_path(&path, LoadOpts::new()).unwrap();
    assert!(img.delete_object(1, DeleteOpts::new()).is_err());
}

#[test]
fn readers_are_restartable_and_concurrent() {
    use std::io::{Read, Seek, SeekFrom};

    let img = Image::create(
        Buffer::new(),
        CreateOpts::new()
            .deterministic()
            .with_descriptors(vec![generic(b"first-payload"), generic(b"second-payload")]),
    )
    .unwrap();

    let d1 = img.descriptor(&Selector::new().with_id(1)).unwrap();
    let d2 = img.descriptor(&Selector::new().with_id(2)).unwrap();

    let mut r1 = img.reader(&d1).unwrap();
    let mut r2 = img.reader(&d2).unwrap();

    let mut a = [0u8; 5];
    let mut b = [0u8; 6];
    r1.read_exact(&mut a).unwrap();
    r2.read_exact(&mut b).unwrap();
    assert_eq!(&a, b"first");
    assert_eq!(&b, b"second");

    r1.seek(SeekFrom::Start(6)).unwrap();
    let mut rest = String::new();
    r1.read_to_string(&mut rest).unwrap();
    assert_eq!(rest, "payload");
}

#[test]
fn selectors_compose_conjunctively() {
    let img = Image::create(
        Buffer::new(),
        CreateOpts::new().deterministic().with_descriptors(vec![
            generic(b"a").with_group_id(1),
            generic(b"b").with_group_id(2),
            DescriptorInput::new(DataType::Deffile, &b"bootstrap"[..]).with_group_id(1),
        ]),
    )
    .unwrap();

    assert_eq!(img.descriptors(&Selector::new()).unwrap().len(), 3);
    assert_eq!(
        img.descriptors(&Selector::new().with_group_id(1))
            .unwrap()
            .len(),
        2
    );
    assert_eq!(
        img.descriptors(
            &Selector::new()
                .with_group_id(1)
                .with_data_type(DataType::Generic)
        )
        .unwrap()
        .len(),
        1
    );

    assert!(matches!(
        img.descriptor(&Selector::new().with_data_type(DataType::Generic)),
        Err(sif::Error::MultipleObjectsFound)
    ));
    assert!(matches!(
        img.descriptor(&Selector::new().with_id(9)),
        Err(sif::Error::ObjectNotFound)
    ));
    assert!(matches!(
        img.descriptor(&Selector::new().with_id(0)),
        Err(sif::Error::InvalidObjectId)
    ));
    assert!(matches!(
        img.descriptors(&Selector::new().with_group_id(0)),
        Err(sif::Error::InvalidGroupId)
    ));

    // Arbitrary predicates compose with the stock constraints.
    let small = img
        .descriptors(&Selector::new().matching(|d| d.size() == 1))
        .unwrap();
    assert_eq!(small.len(), 2);

    assert_eq!(img.group_ids(), vec![1, 2]);
}

#[test]
fn modified_time_is_pinned_or_current() {
    let mut img = Image::create(
        Buffer::new(),
        CreateOpts::new().deterministic().with_descriptors(vec![generic(b"a")]),
    )
    .unwrap();
    assert_eq!(img.modified_at(), 0);

    img.add_object(generic(b"b"), AddOpts::new().with_time(FIXED_TIME))
        .unwrap();
    assert_eq!(img.modified_at(), FIXED_TIME);

    let d = img.descriptor(&Selector::new().with_id(2)).unwrap();
    assert_eq!(d.created_at(), FIXED_TIME);
    assert_eq!(d.modified_at(), FIXED_TIME);
}
