use anyhow::Context;
use chrono::{DateTime, Local, SecondsFormat, Utc};
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Discriminator every scannable payload must carry.
pub const PAYLOAD_JENIS: &str = "absensi-siswa";
/// Highest payload version this build understands. Anything newer is
/// rejected before it can touch the duplicate memory or the store.
pub const PAYLOAD_VERSION: i64 = 1;
/// Window within which repeated decodes of the same code are swallowed.
pub const DUPLICATE_WINDOW_MS: i64 = 30_000;

pub const STATUS_HADIR: &str = "Hadir";

fn default_version() -> i64 {
    PAYLOAD_VERSION
}

/// Wire format embedded in the QR symbol:
/// `{"v":1,"jenis":"absensi-siswa","kelas":..,"nomor":..,"nama":..,"uid":"kelas|nomor"}`
///
/// Decoded text is untrusted input; everything is re-validated at scan time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScanPayload {
    #[serde(default = "default_version")]
    pub v: i64,
    pub jenis: String,
    pub kelas: String,
    pub nomor: String,
    pub nama: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

impl ScanPayload {
    pub fn for_siswa(kelas: &str, nomor: &str, nama: &str) -> Self {
        ScanPayload {
            v: PAYLOAD_VERSION,
            jenis: PAYLOAD_JENIS.to_string(),
            kelas: kelas.to_string(),
            nomor: nomor.to_string(),
            nama: nama.to_string(),
            uid: Some(format!("{}|{}", kelas, nomor)),
        }
    }

    /// Older generators may omit `uid`; fall back to its defined value.
    pub fn unique_id(&self) -> String {
        self.uid
            .clone()
            .unwrap_or_else(|| format!("{}|{}", self.kelas, self.nomor))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttendanceKey {
    pub kelas: String,
    pub tanggal: String,
    pub mapel: String,
    pub nomor: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttendanceRecord {
    pub nama: String,
    pub timestamp: String,
    pub status: String,
}

/// Point reads and point writes at one attendance path. The session never
/// assumes anything about ordering between paths.
pub trait AttendanceStore {
    fn read_record(&mut self, key: &AttendanceKey) -> anyhow::Result<Option<AttendanceRecord>>;
    fn write_record(&mut self, key: &AttendanceKey, record: &AttendanceRecord)
        -> anyhow::Result<()>;
}

impl AttendanceStore for rusqlite::Connection {
    fn read_record(&mut self, key: &AttendanceKey) -> anyhow::Result<Option<AttendanceRecord>> {
        self.query_row(
            "SELECT nama, timestamp, status FROM absensi
             WHERE kelas = ? AND tanggal = ? AND mapel = ? AND nomor = ?",
            (&key.kelas, &key.tanggal, &key.mapel, &key.nomor),
            |r| {
                Ok(AttendanceRecord {
                    nama: r.get(0)?,
                    timestamp: r.get(1)?,
                    status: r.get(2)?,
                })
            },
        )
        .optional()
        .context("failed to read attendance record")
    }

    fn write_record(
        &mut self,
        key: &AttendanceKey,
        record: &AttendanceRecord,
    ) -> anyhow::Result<()> {
        self.execute(
            "INSERT INTO absensi(kelas, tanggal, mapel, nomor, nama, timestamp, status)
             VALUES(?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(kelas, tanggal, mapel, nomor) DO UPDATE SET
               nama = excluded.nama,
               timestamp = excluded.timestamp,
               status = excluded.status",
            (
                &key.kelas,
                &key.tanggal,
                &key.mapel,
                &key.nomor,
                &record.nama,
                &record.timestamp,
                &record.status,
            ),
        )
        .context("failed to write attendance record")?;
        Ok(())
    }
}

/// Ephemeral map uid -> last accepted wall-clock ms. Lifetime is one scanning
/// session; never persisted.
#[derive(Debug, Default)]
pub struct RecentScanMemory {
    entries: HashMap<String, i64>,
}

impl RecentScanMemory {
    /// Purge entries older than the window, then check-and-insert in one
    /// step. The insert happens here, before any store access, so a slow
    /// store round-trip cannot let a second decode of the same code through.
    pub fn is_duplicate_recent_scan(&mut self, unique_id: &str, now_ms: i64) -> bool {
        self.entries.retain(|_, t| now_ms - *t <= DUPLICATE_WINDOW_MS);
        if self.entries.contains_key(unique_id) {
            return true;
        }
        self.entries.insert(unique_id.to_string(), now_ms);
        false
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StartError {
    pub code: &'static str,
    pub message: String,
}

fn start_error(message: impl Into<String>) -> StartError {
    StartError {
        code: "bad_params",
        message: message.into(),
    }
}

/// Per-decode decision. Only `Recorded` mutates the store; only `Recorded`
/// and `DuplicateScan` leave a mark in the recent-scan memory.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanOutcome {
    Recorded {
        nomor: String,
        nama: String,
        mapel: String,
    },
    AlreadyRecorded {
        nomor: String,
        nama: String,
    },
    DuplicateScan {
        nomor: String,
        nama: String,
    },
    WrongKelas {
        payload_kelas: String,
        session_kelas: String,
    },
    UnsupportedVersion {
        v: i64,
    },
    InvalidPayload,
}

impl ScanOutcome {
    pub fn kind(&self) -> &'static str {
        match self {
            ScanOutcome::Recorded { .. } => "recorded",
            ScanOutcome::AlreadyRecorded { .. } => "alreadyRecorded",
            ScanOutcome::DuplicateScan { .. } => "duplicate",
            ScanOutcome::WrongKelas { .. } => "wrongKelas",
            ScanOutcome::UnsupportedVersion { .. } => "unsupportedVersion",
            ScanOutcome::InvalidPayload => "invalid",
        }
    }

    /// User-facing notice for the scan log.
    pub fn message(&self) -> String {
        match self {
            ScanOutcome::Recorded { nomor, nama, mapel } => {
                format!("Hadir: {} ({}) • {}", nama, nomor, mapel)
            }
            ScanOutcome::AlreadyRecorded { nomor, nama } => {
                format!("Sudah tercatat: {} ({})", nama, nomor)
            }
            ScanOutcome::DuplicateScan { nomor, nama } => {
                format!("Duplikat scan untuk {} ({})", nama, nomor)
            }
            ScanOutcome::WrongKelas {
                payload_kelas,
                session_kelas,
            } => format!("QR milik kelas {}, bukan {}", payload_kelas, session_kelas),
            ScanOutcome::UnsupportedVersion { v } => {
                format!("Versi QR tidak didukung: {}", v)
            }
            ScanOutcome::InvalidPayload => "QR tidak valid".to_string(),
        }
    }
}

pub fn today_local() -> String {
    Local::now().format("%Y-%m-%d").to_string()
}

/// One scanning session for a fixed (kelas, mapel, tanggal). Its existence is
/// the Scanning state; dropping it is the transition back to Idle. The
/// camera itself lives with the frontend collaborator that feeds
/// [`ScanSession::handle_decoded_text`].
#[derive(Debug)]
pub struct ScanSession {
    pub session_id: String,
    pub kelas: String,
    pub mapel: String,
    pub tanggal: String,
    memory: RecentScanMemory,
}

impl ScanSession {
    /// Validation gate for the Idle -> Scanning transition. Fails without
    /// side effects when kelas or mapel is empty.
    pub fn start(kelas: &str, mapel: &str, tanggal: Option<&str>) -> Result<ScanSession, StartError> {
        let kelas = kelas.trim();
        let mapel = mapel.trim();
        if kelas.is_empty() {
            return Err(start_error("pilih kelas terlebih dahulu"));
        }
        if mapel.is_empty() {
            return Err(start_error("isi mata pelajaran"));
        }
        let tanggal = match tanggal.map(str::trim) {
            Some(t) if !t.is_empty() => t.to_string(),
            _ => today_local(),
        };
        Ok(ScanSession {
            session_id: Uuid::new_v4().to_string(),
            kelas: kelas.to_string(),
            mapel: mapel.to_string(),
            tanggal,
            memory: RecentScanMemory::default(),
        })
    }

    pub fn memory(&self) -> &RecentScanMemory {
        &self.memory
    }

    /// Decide one decoded text value.
    ///
    /// Order matters: parse and validation rejections must not touch the
    /// memory or the store, and the memory insert must precede the store
    /// read so the same physical code cannot produce two store round-trips
    /// within the window. A store failure is an `Err`; the uid stays in the
    /// memory (not rolled back) and the session remains usable.
    pub fn handle_decoded_text(
        &mut self,
        text: &str,
        now: DateTime<Utc>,
        store: &mut dyn AttendanceStore,
    ) -> anyhow::Result<ScanOutcome> {
        let payload: ScanPayload = match serde_json::from_str(text) {
            Ok(p) => p,
            Err(_) => return Ok(ScanOutcome::InvalidPayload),
        };
        if payload.jenis != PAYLOAD_JENIS {
            return Ok(ScanOutcome::InvalidPayload);
        }
        if payload.v > PAYLOAD_VERSION {
            return Ok(ScanOutcome::UnsupportedVersion { v: payload.v });
        }

        let unique_id = payload.unique_id();

        if payload.kelas != self.kelas {
            return Ok(ScanOutcome::WrongKelas {
                payload_kelas: payload.kelas,
                session_kelas: self.kelas.clone(),
            });
        }

        if self
            .memory
            .is_duplicate_recent_scan(&unique_id, now.timestamp_millis())
        {
            return Ok(ScanOutcome::DuplicateScan {
                nomor: payload.nomor,
                nama: payload.nama,
            });
        }

        let key = AttendanceKey {
            kelas: self.kelas.clone(),
            tanggal: self.tanggal.clone(),
            mapel: self.mapel.clone(),
            nomor: payload.nomor.clone(),
        };

        if let Some(existing) = store.read_record(&key)? {
            if existing.status == STATUS_HADIR {
                return Ok(ScanOutcome::AlreadyRecorded {
                    nomor: payload.nomor,
                    nama: payload.nama,
                });
            }
        }

        let record = AttendanceRecord {
            nama: payload.nama.clone(),
            timestamp: now.to_rfc3339_opts(SecondsFormat::Millis, true),
            status: STATUS_HADIR.to_string(),
        };
        store.write_record(&key, &record)?;

        Ok(ScanOutcome::Recorded {
            nomor: payload.nomor,
            nama: payload.nama,
            mapel: self.mapel.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recent_scan_memory_purges_only_entries_older_than_window() {
        let mut mem = RecentScanMemory::default();
        assert!(!mem.is_duplicate_recent_scan("X-A|01", 1_000));
        assert!(!mem.is_duplicate_recent_scan("X-A|02", 10_000));

        // 01 is exactly at the window edge at t=31_000: age == 30_000 stays.
        assert!(mem.is_duplicate_recent_scan("X-A|01", 31_000));

        // At t=31_001 the first entry has aged out; the second has not.
        assert!(!mem.is_duplicate_recent_scan("X-A|01", 31_001));
        assert!(mem.is_duplicate_recent_scan("X-A|02", 31_001));
    }

    #[test]
    fn unique_id_falls_back_when_uid_is_missing() {
        let mut p = ScanPayload::for_siswa("X-A", "05", "Rini");
        assert_eq!(p.unique_id(), "X-A|05");
        p.uid = None;
        assert_eq!(p.unique_id(), "X-A|05");
    }

    #[test]
    fn start_requires_kelas_and_mapel() {
        assert!(ScanSession::start("", "Matematika", None).is_err());
        assert!(ScanSession::start("X-A", "  ", None).is_err());

        let s = ScanSession::start(" X-A ", "Matematika", Some("2024-05-01")).expect("start");
        assert_eq!(s.kelas, "X-A");
        assert_eq!(s.tanggal, "2024-05-01");
    }

    #[test]
    fn start_defaults_tanggal_to_today() {
        let s = ScanSession::start("X-A", "Matematika", None).expect("start");
        assert_eq!(s.tanggal, today_local());
    }
}
