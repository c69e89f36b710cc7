use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE_NAME: &str = "absensi.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    init_schema(&conn)?;
    Ok(conn)
}

/// Tables mirror the store paths the app is addressed by:
/// `kelas/{kelas}`, `kelas/{kelas}/siswa/{nomor}`,
/// `absensi/{kelas}/{tanggal}/{mapel}/{nomor}`.
/// Natural composite keys carry the uniqueness invariants; there is no
/// surrogate id column anywhere in the data model.
pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS kelas(
            nama TEXT PRIMARY KEY,
            created_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS siswa(
            kelas TEXT NOT NULL,
            nomor TEXT NOT NULL,
            nama TEXT NOT NULL,
            updated_at TEXT,
            PRIMARY KEY(kelas, nomor),
            FOREIGN KEY(kelas) REFERENCES kelas(nama)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_siswa_kelas ON siswa(kelas)",
        [],
    )?;

    // A row here means "Hadir"; absence of a row is the only representation
    // of an absent student. Reporting derives "Tidak Hadir" by diffing the
    // roster against these rows.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS absensi(
            kelas TEXT NOT NULL,
            tanggal TEXT NOT NULL,
            mapel TEXT NOT NULL,
            nomor TEXT NOT NULL,
            nama TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            status TEXT NOT NULL,
            PRIMARY KEY(kelas, tanggal, mapel, nomor),
            FOREIGN KEY(kelas) REFERENCES kelas(nama)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_absensi_kelas_tanggal ON absensi(kelas, tanggal)",
        [],
    )?;

    Ok(())
}
