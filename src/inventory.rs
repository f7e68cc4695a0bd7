//! Per-channel access-point inventory.
//!
//! An insertion-ordered collection of access-point records, one inventory
//! per allowed channel. Duplicate suppression is expressed through the
//! summing [`AccessPointInventory::for_each`] rather than a keyed map: the
//! probe engine scans with a counting predicate that increments the beacon
//! counter of a matching record, and appends only when the sum comes back
//! zero. O(n) per beacon, but no per-record allocation on duplicates and
//! the observation order is preserved.

use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{bail, Context, Result};

use crate::frame;

/// One observed access point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPointRecord {
    /// 6-octet BSSID; record identity within an inventory.
    pub bssid: [u8; 6],
    /// Channel the AP was first observed on.
    pub channel: u8,
    /// Advertised SSID (≤ 32 octets, may be empty or non-UTF8).
    pub ssid: Vec<u8>,
    /// Cisco Aironet system name, when advertised.
    pub location: Vec<u8>,
    /// Beacons captured for this BSSID; starts at 1 on creation.
    pub beacons_seen: u32,
}

impl fmt::Display for AccessPointRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ch {} ssid \"{}\" beacons {}",
            frame::format_mac(&self.bssid),
            self.channel,
            String::from_utf8_lossy(&self.ssid),
            self.beacons_seen,
        )?;
        if !self.location.is_empty() {
            write!(f, " location \"{}\"", String::from_utf8_lossy(&self.location))?;
        }
        Ok(())
    }
}

/// Insertion-ordered collection of access-point records for one channel.
///
/// Invariant: no two records share a `bssid`. `append` trusts the caller
/// on that; use [`contains_bssid`](Self::contains_bssid) or a counting
/// `for_each` first.
#[derive(Debug, Default)]
pub struct AccessPointInventory {
    records: Vec<AccessPointRecord>,
}

impl AccessPointInventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `pred` to every record in insertion order and return the sum
    /// of its results. Records may be mutated inside the predicate; the
    /// collection itself cannot be (the exclusive borrow is held here).
    pub fn for_each<F>(&mut self, mut pred: F) -> u32
    where
        F: FnMut(&mut AccessPointRecord) -> u32,
    {
        let mut sum = 0;
        for record in &mut self.records {
            sum += pred(record);
        }
        sum
    }

    /// Append at the tail. The caller guarantees `record.bssid` is not
    /// already present.
    pub fn append(&mut self, record: AccessPointRecord) {
        self.records.push(record);
    }

    pub fn contains_bssid(&self, bssid: &[u8; 6]) -> bool {
        self.records.iter().any(|r| &r.bssid == bssid)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn iter(&self) -> std::slice::Iter<'_, AccessPointRecord> {
        self.records.iter()
    }
}

/// Load pre-seeded access-point records from a file.
///
/// One record per line, pipe-separated:
/// `MAC|SSID|location|channel|beacons`, e.g.
/// `06:32:d0:7f:0f:e4|Wireless|_|11|46`. An underscore stands for an
/// unknown SSID or location (recorded empty) or beacon count (recorded as
/// 1). The channel is required: a record without one cannot be placed in a
/// per-channel inventory. Blank lines and `#` comments are skipped.
pub fn load_seed_records(path: &Path) -> Result<Vec<AccessPointRecord>> {
    let file = File::open(path).with_context(|| format!("open seed file {}", path.display()))?;

    let mut records = Vec::new();
    for (lineno, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("read seed file {}", path.display()))?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let record = parse_seed_line(trimmed)
            .with_context(|| format!("{}:{}", path.display(), lineno + 1))?;
        records.push(record);
    }
    Ok(records)
}

fn parse_seed_line(line: &str) -> Result<AccessPointRecord> {
    let fields: Vec<&str> = line.split('|').collect();
    if fields.len() != 5 {
        bail!("expected 5 pipe-separated fields, found {}", fields.len());
    }

    let bssid = frame::parse_mac(fields[0]).map_err(|e| anyhow::anyhow!(e))?;

    let ssid = match fields[1] {
        "_" => Vec::new(),
        s => s.as_bytes().to_vec(),
    };
    let location = match fields[2] {
        "_" => Vec::new(),
        s => s.as_bytes().to_vec(),
    };

    let channel: u8 = fields[3]
        .parse()
        .with_context(|| format!("invalid channel {:?}", fields[3]))?;
    if !(1..=14).contains(&channel) {
        bail!("channel {channel} outside 1..=14");
    }

    let beacons_seen: u32 = match fields[4] {
        "_" => 1,
        s => s
            .parse()
            .with_context(|| format!("invalid beacon count {:?}", s))?,
    };

    Ok(AccessPointRecord {
        bssid,
        channel,
        ssid,
        location,
        beacons_seen,
    })
}
