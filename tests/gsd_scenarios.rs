// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end scenarios against a real file on disk, one function per
//! scenario named in spec.md §8 (S1-S6).

use gsd::{Error, GsdHandle, GsdType, OpenFlag};
use tempfile::NamedTempFile;

fn scratch_path() -> (NamedTempFile, std::path::PathBuf) {
    let file = NamedTempFile::new().unwrap();
    let path = file.path().to_path_buf();
    (file, path)
}

/// S1: single chunk round trip.
#[test]
fn single_chunk_round_trip() {
    let (_guard, path) = scratch_path();
    let mut handle =
        GsdHandle::create_and_open(&path, "app", "s", 0, OpenFlag::ReadWrite, false).unwrap();
    let payload: [f32; 6] = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
    let bytes: Vec<u8> = payload.iter().flat_map(|v| v.to_le_bytes()).collect();
    handle
        .write_chunk("data", GsdType::F32, 3, 2, 0, &bytes)
        .unwrap();
    handle.end_frame().unwrap();
    drop(handle);

    let handle = GsdHandle::open(&path, OpenFlag::ReadOnly).unwrap();
    let entry = handle.find_chunk(0, "data").unwrap().unwrap();
    assert_eq!(entry.n, 3);
    assert_eq!(entry.m, 2);
    let mut dst = vec![0u8; entry.size() as usize];
    handle.read_chunk(&entry, &mut dst).unwrap();
    assert_eq!(dst, bytes);
}

/// S2: multi-frame writes of the same name see the frame they were written in.
#[test]
fn multi_frame_same_name() {
    let (_guard, path) = scratch_path();
    let mut handle =
        GsdHandle::create_and_open(&path, "app", "s", 0, OpenFlag::ReadWrite, false).unwrap();
    handle
        .write_chunk("x", GsdType::U32, 1, 1, 0, &10u32.to_le_bytes())
        .unwrap();
    handle.end_frame().unwrap();
    handle
        .write_chunk("x", GsdType::U32, 1, 1, 0, &20u32.to_le_bytes())
        .unwrap();
    handle.end_frame().unwrap();
    drop(handle);

    let handle = GsdHandle::open(&path, OpenFlag::ReadOnly).unwrap();
    assert_eq!(handle.nframes(), 2);

    let e0 = handle.find_chunk(0, "x").unwrap().unwrap();
    let mut d0 = vec![0u8; e0.size() as usize];
    handle.read_chunk(&e0, &mut d0).unwrap();
    assert_eq!(u32::from_le_bytes(d0.try_into().unwrap()), 10);

    let e1 = handle.find_chunk(1, "x").unwrap().unwrap();
    let mut d1 = vec![0u8; e1.size() as usize];
    handle.read_chunk(&e1, &mut d1).unwrap();
    assert_eq!(u32::from_le_bytes(d1.try_into().unwrap()), 20);
}

/// S3: writing past the initial 128-entry index allocation forces growth,
/// and every chunk written before and after the expansion still reads back.
#[test]
fn index_growth_preserves_all_entries() {
    let (_guard, path) = scratch_path();
    let mut handle =
        GsdHandle::create_and_open(&path, "app", "s", 0, OpenFlag::ReadWrite, false).unwrap();
    const COUNT: u64 = 129;
    for i in 0..COUNT {
        let byte = (i % 256) as u8;
        handle.write_chunk("k", GsdType::U8, 1, 1, 0, &[byte]).unwrap();
        handle.end_frame().unwrap();
    }
    drop(handle);

    let handle = GsdHandle::open(&path, OpenFlag::ReadOnly).unwrap();
    assert_eq!(handle.nframes(), COUNT);
    for i in 0..COUNT {
        let entry = handle.find_chunk(i, "k").unwrap().unwrap();
        let mut dst = [0u8; 1];
        handle.read_chunk(&entry, &mut dst).unwrap();
        assert_eq!(dst[0], (i % 256) as u8, "frame {i}");
    }
}

/// S4: truncate wipes frames and chunks but preserves the header identity.
#[test]
fn truncate_wipes_frames_keeps_header() {
    let (_guard, path) = scratch_path();
    let mut handle =
        GsdHandle::create_and_open(&path, "app", "s", 3, OpenFlag::ReadWrite, false).unwrap();
    handle
        .write_chunk("data", GsdType::U8, 1, 1, 0, &[7])
        .unwrap();
    handle.end_frame().unwrap();

    handle.truncate().unwrap();

    assert_eq!(handle.application(), "app");
    assert_eq!(handle.schema(), "s");
    assert_eq!(handle.schema_version(), 3);
    assert_eq!(handle.nframes(), 0);
    assert!(handle.find_chunk(0, "data").unwrap().is_none());
}

/// S5: a corrupted magic number and an out-of-bounds index entry are both
/// detected at open time.
#[test]
fn corruption_is_detected_on_open() {
    use std::io::{Read, Seek, SeekFrom, Write};

    let (_guard, path) = scratch_path();
    {
        let mut handle =
            GsdHandle::create_and_open(&path, "app", "s", 0, OpenFlag::ReadWrite, false).unwrap();
        handle
            .write_chunk("data", GsdType::U8, 1, 1, 0, &[1])
            .unwrap();
        handle.end_frame().unwrap();
    }

    // Flip a byte of the magic number.
    let mut file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(&path)
        .unwrap();
    let mut byte0 = [0u8; 1];
    file.read_exact(&mut byte0).unwrap();
    file.seek(SeekFrom::Start(0)).unwrap();
    file.write_all(&[byte0[0] ^ 0xFF]).unwrap();
    drop(file);

    assert!(matches!(
        GsdHandle::open(&path, OpenFlag::ReadOnly),
        Err(Error::NotAGsdFile)
    ));

    // Restore the magic, then push index entry 0's location past EOF.
    let mut file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(&path)
        .unwrap();
    file.seek(SeekFrom::Start(0)).unwrap();
    file.write_all(&[byte0[0]]).unwrap();

    let file_size = file.seek(SeekFrom::End(0)).unwrap();
    // header layout: index_location at offset 8, entry 0's `location` field
    // is at byte offset 16 within the entry (frame(8) + n(8)).
    let index_location_off = 8u64;
    let mut buf = [0u8; 8];
    file.seek(SeekFrom::Start(index_location_off)).unwrap();
    file.read_exact(&mut buf).unwrap();
    let index_location = u64::from_le_bytes(buf);
    let entry0_location_off = index_location + 16;
    file.seek(SeekFrom::Start(entry0_location_off)).unwrap();
    file.write_all(&(file_size + 1_000_000).to_le_bytes())
        .unwrap();
    drop(file);

    assert!(matches!(
        GsdHandle::open(&path, OpenFlag::ReadOnly),
        Err(Error::FileCorrupt(_))
    ));
}

/// S6: append mode writes new frames without loading the index, and prior
/// frames stay intact and visible afterward.
#[test]
fn append_mode_adds_frames_without_disturbing_prior_ones() {
    let (_guard, path) = scratch_path();
    let mut handle =
        GsdHandle::create_and_open(&path, "app", "s", 0, OpenFlag::ReadWrite, false).unwrap();
    handle
        .write_chunk("a", GsdType::U32, 1, 1, 0, &1u32.to_le_bytes())
        .unwrap();
    handle.end_frame().unwrap();
    handle
        .write_chunk("b", GsdType::U32, 1, 1, 0, &2u32.to_le_bytes())
        .unwrap();
    handle.end_frame().unwrap();
    drop(handle);

    let mut handle = GsdHandle::open(&path, OpenFlag::Append).unwrap();
    assert_eq!(handle.nframes(), 2);
    handle
        .write_chunk("new", GsdType::U32, 1, 1, 0, &3u32.to_le_bytes())
        .unwrap();
    handle.end_frame().unwrap();
    drop(handle);

    let handle = GsdHandle::open(&path, OpenFlag::ReadOnly).unwrap();
    assert_eq!(handle.nframes(), 3);
    let e = handle.find_chunk(2, "new").unwrap().unwrap();
    let mut dst = [0u8; 4];
    handle.read_chunk(&e, &mut dst).unwrap();
    assert_eq!(u32::from_le_bytes(dst), 3);

    let e0 = handle.find_chunk(0, "a").unwrap().unwrap();
    let mut d0 = [0u8; 4];
    handle.read_chunk(&e0, &mut d0).unwrap();
    assert_eq!(u32::from_le_bytes(d0), 1);
}

/// find_matching_chunk_name enumerates every committed name with a given
/// prefix exactly once.
#[test]
fn find_matching_chunk_name_enumerates_prefix_matches() {
    let (_guard, path) = scratch_path();
    let mut handle =
        GsdHandle::create_and_open(&path, "app", "s", 0, OpenFlag::ReadWrite, false).unwrap();
    for name in ["particles/position", "particles/velocity", "log/time"] {
        handle.write_chunk(name, GsdType::U8, 1, 1, 0, &[0]).unwrap();
    }
    handle.end_frame().unwrap();

    let mut found = Vec::new();
    let mut prev: Option<String> = None;
    loop {
        let next = handle.find_matching_chunk_name("particles/", prev.as_deref());
        match next {
            Some(name) => {
                found.push(name.to_string());
                prev = Some(name.to_string());
            }
            None => break,
        }
    }
    found.sort();
    assert_eq!(found, vec!["particles/position", "particles/velocity"]);
}

/// find_chunk on an append-mode handle always answers `None`, never an
/// error: it simply cannot see committed frames, even its own
/// (spec.md §4.6/§4.7).
#[test]
fn append_mode_find_chunk_always_none() {
    let (_guard, path) = scratch_path();
    let mut handle =
        GsdHandle::create_and_open(&path, "app", "s", 0, OpenFlag::Append, false).unwrap();
    handle
        .write_chunk("a", GsdType::U8, 1, 1, 0, &[9])
        .unwrap();
    handle.end_frame().unwrap();
    assert!(matches!(handle.find_chunk(0, "a"), Ok(None)));
}

/// Reopening a freshly created file yields zero frames and the requested
/// application/schema/schema_version (Invariant 1).
#[test]
fn create_then_reopen_is_empty() {
    let (_guard, path) = scratch_path();
    GsdHandle::create(&path, "myapp", "myschema", 42).unwrap();
    let handle = GsdHandle::open(&path, OpenFlag::ReadOnly).unwrap();
    assert_eq!(handle.nframes(), 0);
    assert_eq!(handle.application(), "myapp");
    assert_eq!(handle.schema(), "myschema");
    assert_eq!(handle.schema_version(), 42);
}

/// write_chunk rejects zero shape dimensions and wrong-sized payloads
/// before touching the file.
#[test]
fn write_chunk_validates_arguments() {
    let (_guard, path) = scratch_path();
    let mut handle =
        GsdHandle::create_and_open(&path, "app", "s", 0, OpenFlag::ReadWrite, false).unwrap();
    assert!(matches!(
        handle.write_chunk("a", GsdType::U8, 0, 1, 0, &[]),
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        handle.write_chunk("a", GsdType::U8, 1, 0, 0, &[]),
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        handle.write_chunk("a", GsdType::U8, 1, 1, 0, &[1, 2]),
        Err(Error::InvalidArgument(_))
    ));
}

/// A read-only handle refuses writes.
#[test]
fn read_only_handle_refuses_writes() {
    let (_guard, path) = scratch_path();
    GsdHandle::create(&path, "app", "s", 0).unwrap();
    let mut handle = GsdHandle::open(&path, OpenFlag::ReadOnly).unwrap();
    assert!(matches!(
        handle.write_chunk("a", GsdType::U8, 1, 1, 0, &[1]),
        Err(Error::FileMustBeWritable)
    ));
}
