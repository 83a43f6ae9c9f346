use std::net::Ipv4Addr;
use std::path::Path;
use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, params, OptionalExtension};
use shared::types::{DeviceRecord, MacAddress};

/// What an upsert did to the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// First sighting of this hardware address
    Inserted,
    /// Existing row refreshed; `changed` is false when only the timestamp moved
    Updated { changed: bool },
}

impl UpsertOutcome {
    pub fn changed(&self) -> bool {
        match self {
            UpsertOutcome::Inserted => true,
            UpsertOutcome::Updated { changed } => *changed,
        }
    }
}

pub struct RegistryDb {
    conn: Connection,
}

impl RegistryDb {
    /// Open or create the SQLite database with WAL mode enabled.
    /// Schema creation is idempotent; existing history survives restarts.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;

        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .context("Failed to enable WAL mode")?;

        // The UNIQUE constraint is what keeps one row per hardware address
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS devices (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                hostname        TEXT NOT NULL,
                ip_address      TEXT NOT NULL,
                mac_address     TEXT NOT NULL UNIQUE,
                scan_time       TEXT NOT NULL,
                network_segment TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_devices_scan_time ON devices(scan_time);
            "#,
        )
        .context("Failed to create database schema")?;

        Ok(Self { conn })
    }

    /// Insert a new device or refresh the row with the same hardware address
    pub fn upsert(&self, record: &DeviceRecord) -> Result<UpsertOutcome> {
        let mac = record.mac_address.to_string();
        let ip = record.ip_address.to_string();

        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin upsert transaction")?;

        let existing: Option<(String, String, String)> = tx
            .query_row(
                "SELECT hostname, ip_address, network_segment FROM devices WHERE mac_address = ?1",
                params![&mac],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .context("Failed to query existing device")?;

        tx.execute(
            r#"
            INSERT INTO devices (hostname, ip_address, mac_address, scan_time, network_segment)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(mac_address) DO UPDATE SET
                hostname = excluded.hostname,
                ip_address = excluded.ip_address,
                scan_time = excluded.scan_time,
                network_segment = excluded.network_segment
            "#,
            params![
                &record.hostname,
                &ip,
                &mac,
                format_time(&record.scan_time),
                &record.network_segment,
            ],
        )
        .context("Failed to upsert device")?;

        tx.commit().context("Failed to commit upsert")?;

        Ok(match existing {
            None => UpsertOutcome::Inserted,
            Some((hostname, old_ip, segment)) => UpsertOutcome::Updated {
                changed: hostname != record.hostname
                    || old_ip != ip
                    || segment != record.network_segment,
            },
        })
    }

    /// All devices, most recently seen first
    pub fn list_history(&self) -> Result<Vec<DeviceRecord>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT hostname, ip_address, mac_address, scan_time, network_segment
                 FROM devices
                 ORDER BY scan_time DESC, id DESC"
            )
            .context("Failed to prepare query")?;

        let devices = stmt
            .query_map([], |row| Self::row_to_record(row))
            .context("Failed to query devices")?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to collect devices")?;

        Ok(devices)
    }

    fn row_to_record(row: &rusqlite::Row) -> Result<DeviceRecord, rusqlite::Error> {
        let ip_str: String = row.get(1)?;
        let mac_str: String = row.get(2)?;
        let scan_time_str: String = row.get(3)?;

        let ip_address = ip_str.parse::<Ipv4Addr>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
        })?;

        let mac_address = mac_str.parse::<MacAddress>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
        })?;

        let scan_time = DateTime::parse_from_rfc3339(&scan_time_str)
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
            })?
            .with_timezone(&Utc);

        Ok(DeviceRecord {
            hostname: row.get(0)?,
            ip_address,
            mac_address,
            scan_time,
            network_segment: row.get(4)?,
        })
    }
}

/// Fixed-width UTC form, so text order is time order
fn format_time(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(mac_last: u8, ip_last: u8, at: DateTime<Utc>) -> DeviceRecord {
        DeviceRecord {
            hostname: "desktop.lan".to_string(),
            ip_address: Ipv4Addr::new(192, 168, 1, ip_last),
            mac_address: MacAddress::new([0xaa, 0xbb, 0xcc, 0xdd, 0xee, mac_last]),
            scan_time: at,
            network_segment: "192.168.1.0/24".to_string(),
        }
    }

    #[test]
    fn test_insert_then_identical_upsert() {
        let db = RegistryDb::open(":memory:").unwrap();
        let t0 = Utc::now();
        let first = record(1, 10, t0);

        assert_eq!(db.upsert(&first).unwrap(), UpsertOutcome::Inserted);

        let mut again = first.clone();
        again.scan_time = t0 + Duration::seconds(30);
        assert_eq!(db.upsert(&again).unwrap(), UpsertOutcome::Updated { changed: false });

        let history = db.list_history().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].scan_time, again.scan_time);
    }

    #[test]
    fn test_same_mac_new_ip_updates_in_place() {
        let db = RegistryDb::open(":memory:").unwrap();
        let t0 = Utc::now();
        db.upsert(&record(1, 10, t0)).unwrap();

        let mut moved = record(1, 77, t0 + Duration::seconds(5));
        moved.hostname = "desktop-wifi.lan".to_string();
        moved.network_segment = "192.168.1.64/26".to_string();
        assert_eq!(db.upsert(&moved).unwrap(), UpsertOutcome::Updated { changed: true });

        let history = db.list_history().unwrap();
        assert_eq!(history, vec![moved]);
    }

    #[test]
    fn test_uniqueness_enforced_by_storage() {
        let db = RegistryDb::open(":memory:").unwrap();
        db.upsert(&record(1, 10, Utc::now())).unwrap();

        let raw_insert = db.conn.execute(
            "INSERT INTO devices (hostname, ip_address, mac_address, scan_time, network_segment)
             VALUES ('x', '10.0.0.1', 'aa:bb:cc:dd:ee:01', '2024-01-01T00:00:00.000000000Z', '10.0.0.0/24')",
            [],
        );
        assert!(raw_insert.is_err());
    }

    #[test]
    fn test_history_newest_first() {
        let db = RegistryDb::open(":memory:").unwrap();
        let t0 = Utc::now();
        db.upsert(&record(1, 10, t0)).unwrap();
        db.upsert(&record(2, 11, t0 + Duration::seconds(10))).unwrap();
        db.upsert(&record(3, 12, t0 + Duration::seconds(5))).unwrap();

        let order: Vec<u8> = db
            .list_history()
            .unwrap()
            .iter()
            .map(|r| r.mac_address.octets()[5])
            .collect();
        assert_eq!(order, vec![2, 3, 1]);
    }

    #[test]
    fn test_reopen_keeps_history() {
        let dir = std::env::temp_dir().join(format!("lanwaked-db-{}", std::process::id()));
        let path = dir.join("devices.db");
        let _ = std::fs::remove_dir_all(&dir);

        {
            let db = RegistryDb::open(&path).unwrap();
            db.upsert(&record(1, 10, Utc::now())).unwrap();
        }
        let db = RegistryDb::open(&path).unwrap();
        assert_eq!(db.list_history().unwrap().len(), 1);

        drop(db);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
