//! Persistence Integration Tests
//!
//! Tests for:
//! - Writing states with a shared attribute object table
//! - Reading them back into the same or a fresh cache
//! - Finalization of states that became canonical while loading
//! - Malformed input

use anyhow::Result;
use glam::Vec4;
use myth_state::{
    BamReader, BamWriter, ColorAttrib, CullBinAttrib, Datagram, DatagramIterator,
    DepthWriteAttrib, StateCache, StateError, TransparencyAttrib, TransparencyMode,
};

// ============================================================================
// Writing
// ============================================================================

#[test]
fn shared_attributes_get_one_id() -> Result<()> {
    let cache = StateCache::default();
    let reg = cache.registry();
    let depth = reg.make(DepthWriteAttrib::new(false));
    let a = cache.make(&[depth.clone(), reg.make(ColorAttrib::vertex())], 1);
    let b = cache.make(&[depth], 2);

    let mut writer = BamWriter::new();
    let mut dg = Datagram::new();
    a.write_datagram(&mut writer, &mut dg)?;
    b.write_datagram(&mut writer, &mut dg)?;

    assert_eq!(writer.objects().len(), 2);
    // u16 count + (u32 id, i32 priority) per attribute.
    assert_eq!(dg.len(), (2 + 2 * 8) + (2 + 8));
    Ok(())
}

#[test]
fn empty_state_writes_a_zero_count() -> Result<()> {
    let cache = StateCache::default();
    let mut writer = BamWriter::new();
    let mut dg = Datagram::new();
    cache.empty_state().write_datagram(&mut writer, &mut dg)?;
    assert_eq!(dg.as_bytes(), &[0, 0]);
    Ok(())
}

// ============================================================================
// Reading
// ============================================================================

#[test]
fn round_trip_into_the_same_cache() -> Result<()> {
    let cache = StateCache::default();
    let reg = cache.registry();
    let states = [
        cache.make(&[reg.make(TransparencyAttrib::new(TransparencyMode::Alpha))], 0),
        cache.make(
            &[
                reg.make(ColorAttrib::flat(Vec4::new(0.2, 0.4, 0.6, 1.0))),
                reg.make(CullBinAttrib::new("fixed", 3)),
            ],
            7,
        ),
        cache.empty_state(),
    ];

    let mut writer = BamWriter::new();
    let mut dg = Datagram::new();
    for state in &states {
        state.write_datagram(&mut writer, &mut dg)?;
    }
    let objects = writer.into_objects();

    let mut reader = BamReader::new(cache.clone());
    let mut scan = DatagramIterator::new(&dg);
    for state in &states {
        let loaded = reader.read_state(&mut scan, &objects)?;
        assert_eq!(&loaded, state);
    }
    assert_eq!(scan.remaining_size(), 0);
    // Everything already existed, so nothing became canonical while loading.
    assert_eq!(reader.finalize(), 0);
    Ok(())
}

#[test]
fn round_trip_into_a_fresh_cache() -> Result<()> {
    let source = StateCache::default();
    let reg = source.registry();
    let original = source.make(
        &[
            reg.make(DepthWriteAttrib::new(true)),
            reg.make(TransparencyAttrib::new(TransparencyMode::Binary)),
        ],
        4,
    );

    let mut writer = BamWriter::new();
    let mut dg = Datagram::new();
    original.write_datagram(&mut writer, &mut dg)?;
    original.write_datagram(&mut writer, &mut dg)?;

    let target = StateCache::default();
    let mut reader = BamReader::new(target.clone());
    let mut scan = DatagramIterator::new(&dg);

    let pending = reader.fillin(&mut scan)?;
    assert_eq!(pending.num_pointers(), 2);
    let first = reader.complete_pointers(pending, writer.objects())?;
    let second = reader.read_state(&mut scan, writer.objects())?;

    assert_eq!(first, second);
    assert_eq!(first.to_string(), original.to_string());
    assert_eq!(first.priority(DepthWriteAttrib::SLOT), 4);
    assert!(target.is_interned(&first));

    assert_eq!(reader.num_pending_finalize(), 1);
    assert_eq!(reader.finalize(), 1);
    assert_eq!(first.ref_count(), 2);
    Ok(())
}

#[test]
fn null_pointers_are_skipped() -> Result<()> {
    let cache = StateCache::default();
    let depth = cache.registry().make(DepthWriteAttrib::new(false));

    let mut writer = BamWriter::new();
    let mut dg = Datagram::new();
    dg.add_u16(2);
    writer.write_pointer(&mut dg, None);
    dg.add_i32(9);
    writer.write_pointer(&mut dg, Some(&depth));
    dg.add_i32(1);

    let mut reader = BamReader::new(cache.clone());
    let state = reader.read_state(&mut DatagramIterator::new(&dg), writer.objects())?;
    assert_eq!(state.num_attribs(), 1);
    assert_eq!(state, cache.make(&[depth], 1));
    Ok(())
}

// ============================================================================
// Malformed Input
// ============================================================================

#[test]
fn unknown_object_id_is_an_error() {
    let cache = StateCache::default();
    let mut dg = Datagram::new();
    dg.add_u16(1);
    dg.add_u32(5);
    dg.add_i32(0);

    let mut reader = BamReader::new(cache);
    let err = reader
        .read_state(&mut DatagramIterator::new(&dg), &[])
        .unwrap_err();
    assert!(matches!(err, StateError::UnresolvedPointer(5)));
}

#[test]
fn truncated_datagram_is_an_error() {
    let cache = StateCache::default();
    let mut dg = Datagram::new();
    dg.add_u16(3);
    dg.add_u32(1);

    let mut reader = BamReader::new(cache);
    let err = reader.fillin(&mut DatagramIterator::new(&dg)).unwrap_err();
    assert!(matches!(err, StateError::Truncated { needed: 4, remaining: 0, .. }));
}
