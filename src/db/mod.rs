//! C5 — persistence: append-only batched writes to a WAL-backed SQLite
//! database, with filterable historical queries that never block the
//! batch-writer (§4.5).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Notify;

use crate::config;
use crate::core::ip_cache::IpInfoCache;
use crate::error::AppError;
use crate::model::{DatabaseInfo, IpByteSummary, Packet, ProtocolCountSummary};

/// Append-only SQLite-backed packet store. When opened with an empty path
/// every operation becomes a no-op and `enabled()` reports false (§4.5
/// "the operator may disable persistence entirely").
pub struct Database {
    conn: Option<Arc<Mutex<Connection>>>,
    path: String,
    pending: Arc<Mutex<Vec<Packet>>>,
    notify: Arc<Notify>,
    stop: Arc<AtomicBool>,
}

impl Database {
    /// Open (or create) the database at `path`. An empty path disables
    /// persistence entirely. Creation failures are startup-fatal (§6).
    pub fn open(path: &str) -> Result<Self, AppError> {
        if path.is_empty() {
            return Ok(Self {
                conn: None,
                path: String::new(),
                pending: Arc::new(Mutex::new(Vec::new())),
                notify: Arc::new(Notify::new()),
                stop: Arc::new(AtomicBool::new(false)),
            });
        }

        let conn = Connection::open(path)
            .map_err(|e| AppError::Startup(format!("failed to open database {path}: {e}")))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(Duration::from_secs(config::DB_BUSY_TIMEOUT_SECS))?;
        create_schema(&conn)?;

        Ok(Self {
            conn: Some(Arc::new(Mutex::new(conn))),
            path: path.to_string(),
            pending: Arc::new(Mutex::new(Vec::new())),
            notify: Arc::new(Notify::new()),
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn enabled(&self) -> bool {
        self.conn.is_some()
    }

    /// Non-blocking. Appends to the in-memory batch; signals the writer once
    /// the flush threshold is reached. Redundant signals coalesce (`Notify`
    /// holds at most one outstanding permit).
    pub fn enqueue(&self, packet: Packet) {
        if self.conn.is_none() {
            return;
        }
        let mut pending = self.pending.lock().expect("pending batch lock poisoned");
        pending.push(packet);
        if pending.len() >= config::BATCH_FLUSH_THRESHOLD {
            self.notify.notify_one();
        }
    }

    /// Drains the batch under the batch lock and writes it in one
    /// transaction. On commit failure the transaction is rolled back and the
    /// loss is logged (never fatal).
    pub fn flush(&self) {
        let Some(conn) = &self.conn else { return };

        let batch = {
            let mut pending = self.pending.lock().expect("pending batch lock poisoned");
            std::mem::take(&mut *pending)
        };
        if batch.is_empty() {
            return;
        }

        let mut conn = conn.lock().expect("db connection lock poisoned");
        let tx = match conn.unchecked_transaction() {
            Ok(tx) => tx,
            Err(e) => {
                tracing::warn!("failed to open transaction, dropping batch of {}: {e}", batch.len());
                return;
            }
        };

        let result: rusqlite::Result<()> = (|| {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO packets (
                    packet_id, timestamp, src_ip, dst_ip, src_port, dst_port, protocol,
                    length, info, src_mac, dst_mac, application,
                    src_hostname, dst_hostname, src_country, dst_country, process_name
                ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17)",
            )?;
            for p in &batch {
                if let Err(e) = stmt.execute(params![
                    p.id as i64,
                    p.timestamp,
                    p.src_ip,
                    p.dst_ip,
                    p.src_port,
                    p.dst_port,
                    p.protocol,
                    p.length,
                    p.info,
                    p.src_mac,
                    p.dst_mac,
                    p.application,
                    p.src_hostname,
                    p.dst_hostname,
                    p.src_country,
                    p.dst_country,
                    p.process_name,
                ]) {
                    tracing::warn!("dropping packet {}: insert failed: {e}", p.id);
                }
            }
            Ok(())
        })();

        if let Err(e) = result {
            tracing::warn!("batch insert failed, rolling back {} packets: {e}", batch.len());
            let _ = tx.rollback();
            return;
        }

        if let Err(e) = tx.commit() {
            tracing::warn!("commit failed, {} packets lost: {e}", batch.len());
        }
    }

    /// Runs the batch-writer loop: wakes on (ticker ∨ signal ∨ stop),
    /// performing a final flush before returning once `stop` fires.
    pub async fn run_writer(&self) {
        if self.conn.is_none() {
            return;
        }
        let mut ticker = tokio::time::interval(Duration::from_secs(config::BATCH_FLUSH_TICKER_SECS));
        loop {
            tokio::select! {
                _ = self.notify.notified() => self.flush(),
                _ = ticker.tick() => self.flush(),
            }
            if self.stop.load(Ordering::Relaxed) {
                self.flush();
                break;
            }
        }
    }

    /// Signal the writer to stop after its next wake. Callers should await
    /// `run_writer`'s task completion for a clean shutdown.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
        self.notify.notify_one();
    }

    /// Filtered historical query (§4.5). `limit` is clamped to
    /// `MAX_HISTORY_LIMIT`; `total` reflects the same WHERE clause without
    /// limit/offset.
    #[allow(clippy::too_many_arguments)]
    pub fn query_packets(
        &self,
        limit: i64,
        offset: i64,
        text: Option<&str>,
        country: Option<&str>,
        exclude_ips: &[String],
        start_ts: Option<&str>,
        end_ts: Option<&str>,
    ) -> Result<(Vec<Packet>, u64), AppError> {
        let Some(conn) = &self.conn else {
            return Ok((Vec::new(), 0));
        };
        let conn = conn.lock().expect("db connection lock poisoned");

        let limit = limit.clamp(0, config::MAX_HISTORY_LIMIT);
        let (where_clause, args) = build_where(text, country, exclude_ips, start_ts, end_ts);

        let total: u64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM packets {where_clause}"),
            rusqlite::params_from_iter(args.iter()),
            |row| row.get(0),
        )?;

        let mut query_args = args.clone();
        query_args.push(limit.to_string());
        query_args.push(offset.to_string());

        let sql = format!(
            "SELECT packet_id, timestamp, src_ip, dst_ip, src_port, dst_port, protocol, length,
                    info, src_mac, dst_mac, application, src_hostname, dst_hostname,
                    src_country, dst_country, process_name
             FROM packets {where_clause}
             ORDER BY timestamp DESC
             LIMIT ?{} OFFSET ?{}",
            args.len() + 1,
            args.len() + 2
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(query_args.iter()), row_to_packet)?;
        let packets = rows.collect::<rusqlite::Result<Vec<_>>>()?;

        Ok((packets, total))
    }

    /// Totals and top-10 summaries within an optional time range.
    pub fn stats(
        &self,
        start_ts: Option<&str>,
        end_ts: Option<&str>,
        cache: &IpInfoCache,
    ) -> Result<(u64, u64, Vec<ProtocolCountSummary>, Vec<IpByteSummary>), AppError> {
        let Some(conn) = &self.conn else {
            return Ok((0, 0, Vec::new(), Vec::new()));
        };
        let conn = conn.lock().expect("db connection lock poisoned");

        let (where_clause, args) = build_where(None, None, &[], start_ts, end_ts);

        let (total_packets, total_bytes): (u64, u64) = conn.query_row(
            &format!("SELECT COUNT(*), COALESCE(SUM(length), 0) FROM packets {where_clause}"),
            rusqlite::params_from_iter(args.iter()),
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let mut stmt = conn.prepare(&format!(
            "SELECT protocol, COUNT(*) as cnt FROM packets {where_clause}
             GROUP BY protocol ORDER BY cnt DESC LIMIT 10"
        ))?;
        let protocols = stmt
            .query_map(rusqlite::params_from_iter(args.iter()), |row| {
                Ok(ProtocolCountSummary {
                    protocol: row.get(0)?,
                    count: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT src_ip, SUM(length) as total FROM packets {where_clause}
             GROUP BY src_ip ORDER BY total DESC LIMIT 10"
        ))?;
        let top_ips = stmt
            .query_map(rusqlite::params_from_iter(args.iter()), |row| {
                let ip: String = row.get(0)?;
                let bytes: u64 = row.get(1)?;
                Ok((ip, bytes))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?
            .into_iter()
            .map(|(ip, bytes)| {
                let info = cache.lookup(ip.parse().unwrap_or_else(|_| "0.0.0.0".parse().unwrap()));
                IpByteSummary {
                    ip,
                    bytes,
                    hostname: info.hostname,
                    country: info.country,
                }
            })
            .collect();

        Ok((total_packets, total_bytes, protocols, top_ips))
    }

    /// `/api/database`: rowcount, earliest/latest timestamp, size on disk.
    pub fn info(&self) -> Result<DatabaseInfo, AppError> {
        let Some(conn) = &self.conn else {
            return Ok(DatabaseInfo::Disabled { enabled: false });
        };
        let conn = conn.lock().expect("db connection lock poisoned");

        let total_packets: u64 = conn.query_row("SELECT COUNT(*) FROM packets", [], |r| r.get(0))?;
        let earliest: Option<String> = conn
            .query_row("SELECT MIN(timestamp) FROM packets", [], |r| r.get(0))
            .optional()?
            .flatten();
        let latest: Option<String> = conn
            .query_row("SELECT MAX(timestamp) FROM packets", [], |r| r.get(0))
            .optional()?
            .flatten();
        let page_count: u64 = conn.query_row("PRAGMA page_count", [], |r| r.get(0))?;
        let page_size: u64 = conn.query_row("PRAGMA page_size", [], |r| r.get(0))?;

        Ok(DatabaseInfo::Enabled {
            enabled: true,
            path: self.path.clone(),
            total_packets,
            earliest_packet: earliest,
            latest_packet: latest,
            database_size: page_count * page_size,
        })
    }

    /// Sorted union of non-empty src/dst country codes seen in persistence.
    pub fn distinct_countries(&self) -> Result<Vec<String>, AppError> {
        let Some(conn) = &self.conn else {
            return Ok(Vec::new());
        };
        let conn = conn.lock().expect("db connection lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT DISTINCT country FROM (
                SELECT src_country as country FROM packets WHERE src_country != ''
                UNION
                SELECT dst_country as country FROM packets WHERE dst_country != ''
             ) ORDER BY country ASC",
        )?;
        let countries = stmt
            .query_map([], |r| r.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(countries)
    }

    /// Signal stop, perform a final flush, drop the connection handle.
    pub fn close(&self) {
        self.request_stop();
        self.flush();
    }
}

fn row_to_packet(row: &rusqlite::Row) -> rusqlite::Result<Packet> {
    Ok(Packet {
        id: row.get::<_, i64>(0)? as u64,
        timestamp: row.get(1)?,
        src_ip: row.get(2)?,
        dst_ip: row.get(3)?,
        src_port: row.get(4)?,
        dst_port: row.get(5)?,
        protocol: row.get(6)?,
        length: row.get(7)?,
        info: row.get(8)?,
        src_mac: row.get(9)?,
        dst_mac: row.get(10)?,
        application: row.get(11)?,
        src_hostname: row.get(12)?,
        dst_hostname: row.get(13)?,
        src_country: row.get(14)?,
        dst_country: row.get(15)?,
        process_name: row.get(16)?,
    })
}

/// Builds a `WHERE ...` clause (or empty string) plus its bound arguments,
/// per §4.5's filter semantics: `text` ORs across several columns,
/// `country` matches either endpoint, each excluded IP ANDs a negation.
fn build_where(
    text: Option<&str>,
    country: Option<&str>,
    exclude_ips: &[String],
    start_ts: Option<&str>,
    end_ts: Option<&str>,
) -> (String, Vec<String>) {
    let mut clauses = Vec::new();
    let mut args = Vec::new();

    if let Some(t) = text.filter(|t| !t.is_empty()) {
        let pattern = format!("%{}%", t.to_lowercase());
        clauses.push(
            "(LOWER(src_ip) LIKE ? OR LOWER(dst_ip) LIKE ? OR LOWER(protocol) LIKE ?
              OR LOWER(application) LIKE ? OR LOWER(src_hostname) LIKE ?
              OR LOWER(dst_hostname) LIKE ? OR LOWER(info) LIKE ?)"
                .to_string(),
        );
        for _ in 0..7 {
            args.push(pattern.clone());
        }
    }

    if let Some(c) = country.filter(|c| !c.is_empty()) {
        clauses.push("(src_country = ? OR dst_country = ?)".to_string());
        args.push(c.to_string());
        args.push(c.to_string());
    }

    for ip in exclude_ips {
        if ip.is_empty() {
            continue;
        }
        clauses.push("NOT (src_ip = ? OR dst_ip = ?)".to_string());
        args.push(ip.clone());
        args.push(ip.clone());
    }

    if let Some(s) = start_ts.filter(|s| !s.is_empty()) {
        clauses.push("timestamp >= ?".to_string());
        args.push(s.to_string());
    }
    if let Some(e) = end_ts.filter(|e| !e.is_empty()) {
        clauses.push("timestamp <= ?".to_string());
        args.push(e.to_string());
    }

    if clauses.is_empty() {
        (String::new(), args)
    } else {
        (format!("WHERE {}", clauses.join(" AND ")), args)
    }
}

fn create_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS packets (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            packet_id INTEGER NOT NULL,
            timestamp TEXT NOT NULL,
            src_ip TEXT NOT NULL,
            dst_ip TEXT NOT NULL,
            src_port INTEGER NOT NULL,
            dst_port INTEGER NOT NULL,
            protocol TEXT NOT NULL,
            length INTEGER NOT NULL,
            info TEXT NOT NULL,
            src_mac TEXT NOT NULL,
            dst_mac TEXT NOT NULL,
            application TEXT NOT NULL,
            src_hostname TEXT NOT NULL,
            dst_hostname TEXT NOT NULL,
            src_country TEXT NOT NULL,
            dst_country TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS sessions (
            id INTEGER PRIMARY KEY AUTOINCREMENT
        );
        CREATE TABLE IF NOT EXISTS ip_stats (
            ip TEXT PRIMARY KEY
        );
        CREATE INDEX IF NOT EXISTS idx_packets_timestamp ON packets(timestamp);
        CREATE INDEX IF NOT EXISTS idx_packets_src_ip ON packets(src_ip);
        CREATE INDEX IF NOT EXISTS idx_packets_dst_ip ON packets(dst_ip);
        CREATE INDEX IF NOT EXISTS idx_packets_protocol ON packets(protocol);
        CREATE INDEX IF NOT EXISTS idx_packets_application ON packets(application);",
    )?;

    // Forward migration: add process_name if it's missing from a prior schema.
    let has_process_name: bool = conn
        .prepare("SELECT process_name FROM packets LIMIT 1")
        .is_ok();
    if !has_process_name {
        conn.execute("ALTER TABLE packets ADD COLUMN process_name TEXT NOT NULL DEFAULT ''", [])?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_packet(id: u64, src_ip: &str, length: u32) -> Packet {
        Packet {
            id,
            timestamp: chrono::Utc::now().to_rfc3339(),
            src_ip: src_ip.into(),
            dst_ip: "2.2.2.2".into(),
            src_port: 1234,
            dst_port: 80,
            protocol: "TCP".into(),
            length,
            info: "info".into(),
            src_mac: String::new(),
            dst_mac: String::new(),
            application: "HTTP".into(),
            src_hostname: String::new(),
            dst_hostname: String::new(),
            src_country: "US".into(),
            dst_country: "DE".into(),
            process_name: String::new(),
        }
    }

    #[test]
    fn test_empty_path_disables_persistence() {
        let db = Database::open("").unwrap();
        assert!(!db.enabled());
        db.enqueue(make_packet(1, "1.1.1.1", 10));
        db.flush();
        let (packets, total) = db.query_packets(10, 0, None, None, &[], None, None).unwrap();
        assert!(packets.is_empty());
        assert_eq!(total, 0);
    }

    #[test]
    fn test_round_trip_insert_and_query() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let db = Database::open(path.to_str().unwrap()).unwrap();

        let pkt = make_packet(42, "9.9.9.9", 1500);
        db.enqueue(pkt.clone());
        db.flush();

        let (packets, total) = db.query_packets(10, 0, None, None, &[], None, None).unwrap();
        assert_eq!(total, 1);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].id, 42);
        assert_eq!(packets[0].src_ip, "9.9.9.9");
        assert_eq!(packets[0].length, 1500);
        assert_eq!(packets[0].info, "info");
    }

    #[test]
    fn test_query_filter_by_country_and_total_independent_of_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let db = Database::open(path.to_str().unwrap()).unwrap();

        for i in 0..10u64 {
            db.enqueue(make_packet(i, &format!("1.1.1.{i}"), 10));
        }
        db.flush();

        let (packets, total) = db
            .query_packets(2, 0, None, Some("US"), &[], None, None)
            .unwrap();
        assert_eq!(total, 10);
        assert_eq!(packets.len(), 2);
    }

    #[test]
    fn test_exclude_ips_removes_matching_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let db = Database::open(path.to_str().unwrap()).unwrap();

        db.enqueue(make_packet(1, "1.1.1.1", 10));
        db.enqueue(make_packet(2, "2.2.2.2", 10));
        db.flush();

        let (packets, total) = db
            .query_packets(10, 0, None, None, &["1.1.1.1".to_string()], None, None)
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(packets[0].src_ip, "2.2.2.2");
    }

    #[test]
    fn test_limit_clamped_to_max() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let db = Database::open(path.to_str().unwrap()).unwrap();
        db.enqueue(make_packet(1, "1.1.1.1", 10));
        db.flush();
        let (packets, _) = db
            .query_packets(100_000, 0, None, None, &[], None, None)
            .unwrap();
        assert!(packets.len() <= config::MAX_HISTORY_LIMIT as usize);
    }

    #[test]
    fn test_info_reports_rowcount_and_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let db = Database::open(path.to_str().unwrap()).unwrap();
        db.enqueue(make_packet(1, "1.1.1.1", 10));
        db.flush();

        match db.info().unwrap() {
            DatabaseInfo::Enabled { total_packets, database_size, .. } => {
                assert_eq!(total_packets, 1);
                assert!(database_size > 0);
            }
            DatabaseInfo::Disabled { .. } => panic!("expected enabled"),
        }
    }

    #[test]
    fn test_distinct_countries_sorted_and_non_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let db = Database::open(path.to_str().unwrap()).unwrap();
        db.enqueue(make_packet(1, "1.1.1.1", 10));
        db.flush();

        let countries = db.distinct_countries().unwrap();
        assert_eq!(countries, vec!["DE".to_string(), "US".to_string()]);
    }
}
