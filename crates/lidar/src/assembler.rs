//! Component B: Scan Assembler.
//!
//! Parses the wire format of §6.1: a stream of 5-byte records, preceded at
//! the start of each revolution by the two-byte marker `0xA5 0x5A`.

use types::{Point, Scan, MAX_SCAN_POINTS, MIN_SCAN_POINTS};

const SYNC_MARKER: [u8; 2] = [0xA5, 0x5A];
const RECORD_SIZE: usize = 5;

/// Reconstructs angular scans from a raw byte stream. Bytes arrive in
/// arbitrary chunks via `feed`; the assembler buffers partial
/// records/markers across calls.
pub struct ScanAssembler {
    pending: Vec<u8>,
    scratch: Scan,
    just_completed: bool,
    dropped: u32,
}

impl Default for ScanAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl ScanAssembler {
    pub fn new() -> Self {
        Self {
            pending: Vec::new(),
            scratch: Scan::default(),
            just_completed: false,
            dropped: 0,
        }
    }

    /// Feed newly read bytes. Returns `Some(scan)` exactly once per
    /// revolution, the instant the scratch buffer's valid point count
    /// crosses `MIN_SCAN_POINTS`. `now_us` stamps both the points and,
    /// on completion, `scan_timestamp_us`.
    pub fn feed(&mut self, data: &[u8], now_us: u64) -> Option<Scan> {
        self.pending.extend_from_slice(data);
        let mut completed = None;

        loop {
            if self.pending.len() >= 2 && self.pending[0..2] == SYNC_MARKER {
                self.pending.drain(0..2);
                self.rotate();
                continue;
            }
            if self.pending.len() < RECORD_SIZE {
                break;
            }
            let record: [u8; RECORD_SIZE] = self.pending[0..RECORD_SIZE].try_into().unwrap();
            self.pending.drain(0..RECORD_SIZE);
            if let Some(point) = parse_record(&record, now_us) {
                self.ingest(point);
                if self.scratch.point_count() >= MIN_SCAN_POINTS && !self.just_completed {
                    self.scratch.scan_complete = true;
                    self.scratch.scan_timestamp_us = now_us;
                    self.just_completed = true;
                    completed = Some(self.scratch.clone());
                }
            }
        }

        completed
    }

    fn rotate(&mut self) {
        if !self.scratch.points.is_empty() && !self.just_completed {
            self.dropped += 1;
        }
        self.scratch = Scan::default();
        self.just_completed = false;
    }

    fn ingest(&mut self, point: Point) {
        if self.scratch.points.len() < MAX_SCAN_POINTS {
            self.scratch.points.push(point);
        }
    }

    /// Drains the count of revolutions that never reached `MIN_SCAN_POINTS`
    /// before the next sync marker rotated the scratch buffer out from
    /// under them.
    pub fn take_dropped(&mut self) -> u32 {
        std::mem::take(&mut self.dropped)
    }
}

fn parse_record(record: &[u8; RECORD_SIZE], now_us: u64) -> Option<Point> {
    let distance_raw = u16::from_le_bytes([record[0], record[1]]);
    let angle_raw = u16::from_le_bytes([record[2], record[3]]);
    let quality = record[4];

    let distance_mm = ((distance_raw as u32) * 4).min(u16::MAX as u32) as u16;
    let angle_deg = ((angle_raw / 64) % 360) as u16;

    if distance_mm == 0 || quality == 0 {
        return None;
    }

    Some(Point {
        distance_mm,
        angle_deg,
        quality,
        timestamp_us: now_us,
    })
}
