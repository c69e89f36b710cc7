use anyhow::Context;
use rusqlite::Connection;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};

pub const STATUS_HADIR: &str = "Hadir";
pub const STATUS_TIDAK_HADIR: &str = "Tidak Hadir";

pub const CSV_HEADERS: [&str; 6] = [
    "Tanggal",
    "Mata Pelajaran",
    "Nomor Siswa",
    "Nama Siswa",
    "Status Kehadiran",
    "Timestamp",
];

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RekapRow {
    pub tanggal: String,
    pub mapel: String,
    pub nomor: String,
    pub nama: String,
    pub status: String,
    pub timestamp: String,
}

#[derive(Debug, Clone)]
struct SiswaRow {
    nomor: String,
    nama: String,
}

fn list_siswa(conn: &Connection, kelas: &str) -> anyhow::Result<Vec<SiswaRow>> {
    let mut stmt = conn
        .prepare("SELECT nomor, nama FROM siswa WHERE kelas = ? ORDER BY nomor")
        .context("failed to prepare roster query")?;
    let rows = stmt
        .query_map([kelas], |r| {
            Ok(SiswaRow {
                nomor: r.get(0)?,
                nama: r.get(1)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .context("failed to read roster")?;
    Ok(rows)
}

#[derive(Debug, Clone)]
struct AbsensiRow {
    mapel: String,
    nomor: String,
    nama: String,
    timestamp: String,
}

fn list_absensi_for_day(
    conn: &Connection,
    kelas: &str,
    tanggal: &str,
    mapel: Option<&str>,
) -> anyhow::Result<Vec<AbsensiRow>> {
    let sql_all = "SELECT mapel, nomor, nama, timestamp FROM absensi
         WHERE kelas = ? AND tanggal = ?
         ORDER BY mapel, nomor";
    let sql_one = "SELECT mapel, nomor, nama, timestamp FROM absensi
         WHERE kelas = ? AND tanggal = ? AND mapel = ?
         ORDER BY nomor";
    let mut stmt = conn
        .prepare(if mapel.is_some() { sql_one } else { sql_all })
        .context("failed to prepare attendance query")?;
    let map_row = |r: &rusqlite::Row<'_>| {
        Ok(AbsensiRow {
            mapel: r.get(0)?,
            nomor: r.get(1)?,
            nama: r.get(2)?,
            timestamp: r.get(3)?,
        })
    };
    let rows = match mapel {
        Some(m) => stmt.query_map((kelas, tanggal, m), map_row),
        None => stmt.query_map((kelas, tanggal), map_row),
    }
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .context("failed to read attendance records")?;
    Ok(rows)
}

/// Build report rows for one class and date.
///
/// With a subject: one row per roster student, present or not. Without a
/// subject: one "Hadir" row per record in every subject recorded that day,
/// then one blank-subject "Tidak Hadir" row for each roster student present
/// in no subject at all. Absence is always derived from the roster here; it
/// is never stored.
pub fn build_rekap(
    conn: &Connection,
    kelas: &str,
    tanggal: &str,
    mapel: Option<&str>,
) -> anyhow::Result<Vec<RekapRow>> {
    let mapel = mapel.map(str::trim).filter(|m| !m.is_empty());
    let siswa = list_siswa(conn, kelas)?;
    let absensi = list_absensi_for_day(conn, kelas, tanggal, mapel)?;

    let roster_names: HashMap<String, String> = siswa
        .iter()
        .map(|s| (s.nomor.clone(), s.nama.clone()))
        .collect();

    let mut rows: Vec<RekapRow> = Vec::new();

    if let Some(mapel) = mapel {
        let present: HashMap<String, &AbsensiRow> =
            absensi.iter().map(|a| (a.nomor.clone(), a)).collect();
        for s in &siswa {
            match present.get(&s.nomor) {
                Some(rec) => rows.push(RekapRow {
                    tanggal: tanggal.to_string(),
                    mapel: mapel.to_string(),
                    nomor: s.nomor.clone(),
                    nama: s.nama.clone(),
                    status: STATUS_HADIR.to_string(),
                    timestamp: rec.timestamp.clone(),
                }),
                None => rows.push(RekapRow {
                    tanggal: tanggal.to_string(),
                    mapel: mapel.to_string(),
                    nomor: s.nomor.clone(),
                    nama: s.nama.clone(),
                    status: STATUS_TIDAK_HADIR.to_string(),
                    timestamp: String::new(),
                }),
            }
        }
        return Ok(rows);
    }

    // Whole-day mode: group records per subject, subjects in sorted order.
    let mut per_mapel: BTreeMap<String, Vec<&AbsensiRow>> = BTreeMap::new();
    for a in &absensi {
        per_mapel.entry(a.mapel.clone()).or_default().push(a);
    }

    let mut hadir_nomor: HashSet<String> = HashSet::new();
    for (m, recs) in &per_mapel {
        for rec in recs {
            let nama = roster_names
                .get(&rec.nomor)
                .cloned()
                .unwrap_or_else(|| rec.nama.clone());
            hadir_nomor.insert(rec.nomor.clone());
            rows.push(RekapRow {
                tanggal: tanggal.to_string(),
                mapel: m.clone(),
                nomor: rec.nomor.clone(),
                nama,
                status: STATUS_HADIR.to_string(),
                timestamp: rec.timestamp.clone(),
            });
        }
    }
    for s in &siswa {
        if !hadir_nomor.contains(&s.nomor) {
            rows.push(RekapRow {
                tanggal: tanggal.to_string(),
                mapel: String::new(),
                nomor: s.nomor.clone(),
                nama: s.nama.clone(),
                status: STATUS_TIDAK_HADIR.to_string(),
                timestamp: String::new(),
            });
        }
    }

    Ok(rows)
}

fn csv_quote(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

pub fn rekap_to_csv(rows: &[RekapRow]) -> String {
    let mut csv = CSV_HEADERS.join(",");
    csv.push('\n');
    for r in rows {
        csv.push_str(&format!(
            "{},{},{},{},{},{}\n",
            csv_quote(&r.tanggal),
            csv_quote(&r.mapel),
            csv_quote(&r.nomor),
            csv_quote(&r.nama),
            csv_quote(&r.status),
            csv_quote(&r.timestamp),
        ));
    }
    csv
}

/// Suggested download name: `rekap-{kelas}-{tanggal}-{mapel|all}.csv`.
pub fn export_file_name(kelas: &str, tanggal: &str, mapel: Option<&str>) -> String {
    let mapel = mapel
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .unwrap_or("all");
    format!("rekap-{}-{}-{}.csv", kelas, tanggal, mapel)
}
