use std::path::Path;

use rusqlite::Connection;

/// Opens (creating if needed) a SQLite file under WAL mode with a short
/// busy timeout, the pragma set every store crate in this workspace expects
/// its connection to already carry.
pub fn open(data_dir: &str, file_name: &str) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(data_dir)?;
    let path = Path::new(data_dir).join(file_name);
    let conn = Connection::open(&path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON; PRAGMA busy_timeout=3000;")?;
    Ok(conn)
}
