//! Tests for RegionFile
//!
//! These tests verify:
//! - Round-trips for empty, small and near-limit blocks
//! - In-place rewrites vs reallocation, and reuse of freed sectors
//! - Free-list conservation across writes and deletes
//! - Oversize and corrupt block handling
//! - Bit-exact on-disk layout
//! - Concurrent writers and read snapshots
//! - Idle timeout and close rules

use std::fs::{self, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use regionstore::region::{RegionStats, SectorRun};
use regionstore::{
    block_index, BlockStore, CompressionScheme, RegionError, RegionFile, StoreConfig,
};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_region() -> (TempDir, PathBuf, RegionFile) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("r.0.0.mcr");
    let region = RegionFile::open(&path, &StoreConfig::default()).unwrap();
    (temp_dir, path, region)
}

fn put(region: &RegionFile, index: usize, data: &[u8]) -> regionstore::Result<()> {
    let mut writer = region.write(index)?;
    writer.write_all(data)?;
    writer.finish()
}

fn get(region: &RegionFile, index: usize) -> Vec<u8> {
    region.read(index).unwrap().read_to_vec().unwrap()
}

/// Incompressible bytes (xorshift), so sector counts are predictable
fn noise(len: usize, seed: u64) -> Vec<u8> {
    let mut state = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state >> 24) as u8
        })
        .collect()
}

fn assert_conserved(stats: RegionStats) {
    assert_eq!(
        stats.block_sectors + 2,
        stats.used_sectors,
        "used sectors must equal header + referenced runs: {:?}",
        stats
    );
    assert_eq!(stats.used_sectors + stats.free_sectors, stats.total_sectors);
}

fn run_of(region: &RegionFile, index: usize) -> SectorRun {
    region.block_info(index).unwrap().unwrap().run
}

// =============================================================================
// Round-Trip Tests
// =============================================================================

#[test]
fn test_round_trip_small_block() {
    let (_temp, _path, region) = setup_temp_region();

    put(&region, 0, b"hello region").unwrap();

    assert_eq!(get(&region, 0), b"hello region");
    assert!(region.exists(0).unwrap());
}

#[test]
fn test_round_trip_empty_block() {
    let (_temp, _path, region) = setup_temp_region();

    put(&region, 42, b"").unwrap();

    assert!(region.exists(42).unwrap());
    assert_eq!(get(&region, 42), Vec::<u8>::new());
}

#[test]
fn test_round_trip_every_index() {
    let (_temp, _path, region) = setup_temp_region();

    for index in 0..1024 {
        put(&region, index, format!("block-{}", index).as_bytes()).unwrap();
    }
    for index in 0..1024 {
        assert_eq!(get(&region, index), format!("block-{}", index).as_bytes());
    }
    assert_conserved(region.stats().unwrap());
}

#[test]
fn test_round_trip_near_sector_limit() {
    let (_temp, _path, region) = setup_temp_region();
    let data = noise(1_000_000, 1);

    put(&region, 7, &data).unwrap();

    let run = run_of(&region, 7);
    assert!(run.count() > 240 && run.count() <= 255);
    assert_eq!(get(&region, 7), data);
}

#[test]
fn test_read_absent_block() {
    let (_temp, _path, region) = setup_temp_region();

    let result = region.read(3);

    assert!(matches!(result, Err(RegionError::NotFound { index: 3 })));
    assert!(!region.exists(3).unwrap());
}

#[test]
fn test_out_of_bounds_index() {
    let (_temp, _path, region) = setup_temp_region();

    assert!(matches!(region.read(1024), Err(RegionError::OutOfBounds(_))));
    assert!(matches!(region.write(1024), Err(RegionError::OutOfBounds(_))));
    assert!(matches!(region.exists(5000), Err(RegionError::OutOfBounds(_))));
    assert!(matches!(block_index(32, 0), Err(RegionError::OutOfBounds(_))));
}

// =============================================================================
// Allocation Tests
// =============================================================================

#[test]
fn test_same_sector_count_rewrites_in_place() {
    let (_temp, path, region) = setup_temp_region();

    put(&region, 10, &noise(5_000, 2)).unwrap();
    let first = run_of(&region, 10);
    let len_before = fs::metadata(&path).unwrap().len();

    put(&region, 10, &noise(6_000, 3)).unwrap();

    assert_eq!(first.count(), 2);
    assert_eq!(run_of(&region, 10), first);
    assert_eq!(fs::metadata(&path).unwrap().len(), len_before);
    assert_eq!(get(&region, 10), noise(6_000, 3));
}

#[test]
fn test_growing_block_moves_and_frees_old_run() {
    let (_temp, _path, region) = setup_temp_region();

    put(&region, 1, &noise(3_000, 4)).unwrap();
    put(&region, 2, &noise(3_000, 5)).unwrap();
    let old = run_of(&region, 1);

    // 1 sector → 3 sectors, block 2 sits right behind it
    put(&region, 1, &noise(10_000, 6)).unwrap();
    let new = run_of(&region, 1);

    assert_ne!(new.start(), old.start());
    assert_eq!(new.count(), 3);
    let stats = region.stats().unwrap();
    assert_eq!(stats.free_sectors, 1);
    assert_conserved(stats);

    // the freed single sector is reused first-fit
    put(&region, 3, b"small").unwrap();
    assert_eq!(run_of(&region, 3), old);
    assert_eq!(region.stats().unwrap().free_sectors, 0);
}

#[test]
fn test_shrink_then_reuse_scenario() {
    let (_temp, path, region) = setup_temp_region();
    let a = block_index(5, 7).unwrap();
    let b = block_index(0, 0).unwrap();

    let big = noise(10_000, 7);
    put(&region, a, &big).unwrap();
    assert_eq!(get(&region, a), big);
    let big_run = run_of(&region, a);
    assert_eq!(big_run.count(), 3);

    let small = noise(50, 8);
    put(&region, a, &small).unwrap();
    assert_eq!(get(&region, a), small);
    assert_ne!(run_of(&region, a), big_run);

    let len_before = fs::metadata(&path).unwrap().len();
    put(&region, b, &noise(10_000, 9)).unwrap();

    assert_eq!(run_of(&region, b), big_run);
    assert_eq!(fs::metadata(&path).unwrap().len(), len_before);
    assert_conserved(region.stats().unwrap());
}

#[test]
fn test_zero_payload_scenario_round_trips() {
    let (_temp, _path, region) = setup_temp_region();
    let index = block_index(5, 7).unwrap();

    put(&region, index, &vec![0u8; 10_000]).unwrap();
    assert_eq!(get(&region, index), vec![0u8; 10_000]);

    put(&region, index, &[0xAB; 50]).unwrap();
    assert_eq!(get(&region, index), vec![0xAB; 50]);
}

#[test]
fn test_delete_frees_sectors() {
    let (_temp, _path, region) = setup_temp_region();

    put(&region, 9, &noise(9_000, 10)).unwrap();
    let run = run_of(&region, 9);

    region.delete(9).unwrap();

    assert!(!region.exists(9).unwrap());
    assert!(matches!(region.read(9), Err(RegionError::NotFound { .. })));
    let stats = region.stats().unwrap();
    assert_eq!(stats.free_sectors, run.count());
    assert_conserved(stats);

    // deleting an absent block is a no-op
    region.delete(9).unwrap();
}

#[test]
fn test_free_list_conservation_under_churn() {
    let (_temp, _path, region) = setup_temp_region();
    let mut state = 0x2545_F491_4F6C_DD1Du64;

    for step in 0..400 {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        let index = (state % 48) as usize;
        if state % 5 == 0 {
            region.delete(index).unwrap();
        } else {
            let len = (state >> 20) as usize % 20_000;
            put(&region, index, &noise(len, step)).unwrap();
        }
        assert_conserved(region.stats().unwrap());
    }
}

#[test]
fn test_oversize_block_rejected() {
    let (_temp, path, region) = setup_temp_region();

    put(&region, 4, b"previous").unwrap();
    let len_before = fs::metadata(&path).unwrap().len();

    let result = put(&region, 4, &noise(1_100_000, 11));

    assert!(matches!(result, Err(RegionError::TooLarge { sectors }) if sectors > 255));
    assert_eq!(get(&region, 4), b"previous");
    assert_eq!(fs::metadata(&path).unwrap().len(), len_before);
    assert_conserved(region.stats().unwrap());
}

// =============================================================================
// Persistence & Layout Tests
// =============================================================================

#[test]
fn test_persistence_across_reopen() {
    let (_temp, path, region) = setup_temp_region();

    put(&region, 100, b"survives").unwrap();
    put(&region, 200, &noise(20_000, 12)).unwrap();
    assert!(region.attempt_close().unwrap());

    let reopened = RegionFile::open(&path, &StoreConfig::default()).unwrap();

    assert_eq!(get(&reopened, 100), b"survives");
    assert_eq!(get(&reopened, 200), noise(20_000, 12));
    assert_conserved(reopened.stats().unwrap());
}

#[test]
fn test_on_disk_layout() {
    let (_temp, path, region) = setup_temp_region();
    let index = block_index(5, 0).unwrap();

    put(&region, index, b"layout").unwrap();
    assert!(region.attempt_close().unwrap());

    let raw = fs::read(&path).unwrap();
    assert_eq!(raw.len() % 4096, 0);
    assert_eq!(raw.len(), 3 * 4096);

    // offset entry: sector 2, one sector
    let entry = u32::from_be_bytes(raw[20..24].try_into().unwrap());
    assert_eq!(entry, (2 << 8) | 1);

    // timestamp entry is set
    let timestamp = u32::from_be_bytes(raw[4096 + 20..4096 + 24].try_into().unwrap());
    assert!(timestamp > 0);

    // block header: length covers version + payload, version 2 = zlib
    let length = u32::from_be_bytes(raw[8192..8196].try_into().unwrap()) as usize;
    assert_eq!(raw[8196], 2);
    assert!(length > 1 && length < 4096);
}

#[test]
fn test_gzip_blocks_readable_by_any_config() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("r.1.1.mcr");
    let gzip = StoreConfig::builder()
        .compression(CompressionScheme::Gzip)
        .build();

    let region = RegionFile::open(&path, &gzip).unwrap();
    put(&region, 0, b"gzipped").unwrap();
    assert_eq!(region.read(0).unwrap().scheme(), CompressionScheme::Gzip);
    assert!(region.attempt_close().unwrap());

    let raw = fs::read(&path).unwrap();
    assert_eq!(raw[8196], 1);

    let region = RegionFile::open(&path, &StoreConfig::default()).unwrap();
    assert_eq!(get(&region, 0), b"gzipped");
}

#[test]
fn test_corrupt_length_detected() {
    let (_temp, path, region) = setup_temp_region();
    put(&region, 0, b"data").unwrap();
    assert!(region.attempt_close().unwrap());

    let mut file = OpenOptions::new().write(true).open(&path).unwrap();
    file.seek(SeekFrom::Start(8192)).unwrap();
    file.write_all(&100_000u32.to_be_bytes()).unwrap();
    drop(file);

    let region = RegionFile::open(&path, &StoreConfig::default()).unwrap();
    assert!(matches!(region.read(0), Err(RegionError::Corrupt(_))));
}

#[test]
fn test_unknown_version_detected() {
    let (_temp, path, region) = setup_temp_region();
    put(&region, 0, b"data").unwrap();
    assert!(region.attempt_close().unwrap());

    let mut file = OpenOptions::new().write(true).open(&path).unwrap();
    file.seek(SeekFrom::Start(8196)).unwrap();
    file.write_all(&[7]).unwrap();
    drop(file);

    let region = RegionFile::open(&path, &StoreConfig::default()).unwrap();
    let err = region.read(0).err().unwrap();
    assert!(matches!(err, RegionError::Corrupt(_)));
    assert!(err.is_block_local());
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_concurrent_writers_on_different_blocks() {
    let (_temp, _path, region) = setup_temp_region();
    let region = Arc::new(region);

    let mut handles = vec![];
    for t in 0..8usize {
        let region_clone = Arc::clone(&region);
        handles.push(thread::spawn(move || {
            for i in 0..16usize {
                let index = t * 16 + i;
                put(&region_clone, index, &noise(1_000 + index * 37, index as u64)).unwrap();
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }

    for index in 0..128usize {
        assert_eq!(get(&region, index), noise(1_000 + index * 37, index as u64));
    }
    assert_conserved(region.stats().unwrap());
}

#[test]
fn test_same_block_writers_are_serialized() {
    let (_temp, _path, region) = setup_temp_region();
    let region = Arc::new(region);
    let second_acquired = Arc::new(AtomicBool::new(false));

    let mut first = region.write(0).unwrap();
    first.write_all(b"first").unwrap();

    let region_clone = Arc::clone(&region);
    let flag = Arc::clone(&second_acquired);
    let second = thread::spawn(move || {
        let mut writer = region_clone.write(0).unwrap();
        flag.store(true, Ordering::SeqCst);
        writer.write_all(b"second").unwrap();
        writer.finish().unwrap();
    });

    thread::sleep(Duration::from_millis(50));
    assert!(!second_acquired.load(Ordering::SeqCst));

    first.finish().unwrap();
    second.join().unwrap();

    assert!(second_acquired.load(Ordering::SeqCst));
    assert_eq!(get(&region, 0), b"second");
}

#[test]
fn test_read_returns_snapshot() {
    let (_temp, _path, region) = setup_temp_region();
    put(&region, 5, b"before").unwrap();

    let reader = region.read(5).unwrap();
    put(&region, 5, &noise(12_000, 13)).unwrap();

    assert_eq!(reader.read_to_vec().unwrap(), b"before");
    assert_eq!(get(&region, 5), noise(12_000, 13));
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[test]
fn test_idle_timeout_closes() {
    let temp_dir = TempDir::new().unwrap();
    let config = StoreConfig::builder().idle_timeout_ms(10).build();
    let region = RegionFile::open(temp_dir.path().join("r.0.0.mcr"), &config).unwrap();

    put(&region, 0, b"x").unwrap();
    thread::sleep(Duration::from_millis(40));

    assert!(region.is_timed_out());
    assert!(region.close_if_timed_out().unwrap());
    assert!(region.is_closed());
    assert!(matches!(region.exists(0), Err(RegionError::Closed)));
}

#[test]
fn test_idle_timeout_not_reached() {
    let temp_dir = TempDir::new().unwrap();
    let config = StoreConfig::builder().idle_timeout_ms(60_000).build();
    let region = RegionFile::open(temp_dir.path().join("r.0.0.mcr"), &config).unwrap();

    put(&region, 0, b"x").unwrap();

    assert!(!region.is_timed_out());
    assert!(!region.close_if_timed_out().unwrap());
    assert!(!region.is_closed());
}

#[test]
fn test_open_writer_prevents_timeout_close() {
    let temp_dir = TempDir::new().unwrap();
    let config = StoreConfig::builder().idle_timeout_ms(10).build();
    let region = RegionFile::open(temp_dir.path().join("r.0.0.mcr"), &config).unwrap();

    let mut writer = region.write(1).unwrap();
    writer.write_all(b"held open").unwrap();
    thread::sleep(Duration::from_millis(40));

    assert!(region.is_timed_out());
    assert!(!region.close_if_timed_out().unwrap());
    assert!(!region.is_closed());

    writer.finish().unwrap();
    assert_eq!(get(&region, 1), b"held open");
}

#[test]
fn test_attempt_close_twice() {
    let (_temp, _path, region) = setup_temp_region();

    assert!(region.attempt_close().unwrap());
    assert!(!region.attempt_close().unwrap());
    assert!(region.is_closed());
}
