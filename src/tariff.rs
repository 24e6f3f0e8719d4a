//! Local SQLite-backed cost schedule: `{start_hour -> cost}` by
//! `(country_code, city)`.

use std::collections::BTreeMap;
use std::path::Path;

use rusqlite::{params, Connection};

use crate::error::PersistenceError;
use crate::temperature::Temperature;

pub struct TariffTable {
    conn: Connection,
}

impl TariffTable {
    /// Open (creating if missing) the `app.db` file and its
    /// `cost_schedule` table.
    pub fn open(path: &Path) -> Result<Self, PersistenceError> {
        let conn = Connection::open(path)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS cost_schedule (
                country_code TEXT NOT NULL,
                city         TEXT NOT NULL,
                company      TEXT NOT NULL,
                start_time   INTEGER NOT NULL,
                cost         TEXT NOT NULL,
                PRIMARY KEY (country_code, city, company, start_time)
            )",
            [],
        )?;
        Ok(TariffTable { conn })
    }

    /// All `{start_hour -> cost}` entries on file for a location,
    /// across every company serving it.
    pub fn select(
        &self,
        country_code: &str,
        city: &str,
    ) -> Result<BTreeMap<u32, Temperature>, PersistenceError> {
        let mut stmt = self.conn.prepare(
            "SELECT start_time, cost FROM cost_schedule WHERE country_code = ?1 AND city = ?2",
        )?;
        let rows = stmt.query_map(params![country_code, city], |row| {
            let start_time: i64 = row.get(0)?;
            let cost: String = row.get(1)?;
            Ok((start_time, cost))
        })?;

        let mut out = BTreeMap::new();
        for row in rows {
            let (start_time, cost) = row?;
            let temperature = Temperature::parse(&cost).map_err(|_| PersistenceError::Corrupt {
                what: "cost_schedule row".to_string(),
                detail: format!("non-decimal cost value {cost:?}"),
            })?;
            out.insert(start_time as u32, temperature);
        }
        Ok(out)
    }

    pub fn insert(
        &self,
        country_code: &str,
        city: &str,
        company: &str,
        start_time: u32,
        cost: Temperature,
    ) -> Result<(), PersistenceError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO cost_schedule (country_code, city, company, start_time, cost)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![country_code, city, company, start_time, cost.to_string()],
        )?;
        Ok(())
    }

    /// Bulk-load rows from a CSV file shaped `country_code,city,company,start_time,cost`.
    pub fn insert_csv(&self, path: &Path) -> Result<usize, PersistenceError> {
        let mut reader = csv::Reader::from_path(path).map_err(|e| PersistenceError::Io {
            path: path.display().to_string(),
            source: std::io::Error::new(std::io::ErrorKind::Other, e),
        })?;
        let mut count = 0;
        for record in reader.records() {
            let record = record.map_err(|e| PersistenceError::Io {
                path: path.display().to_string(),
                source: std::io::Error::new(std::io::ErrorKind::Other, e),
            })?;
            let start_time: u32 = record
                .get(3)
                .and_then(|s| s.parse().ok())
                .unwrap_or_default();
            let cost = Temperature::parse(record.get(4).unwrap_or("0")).unwrap_or_else(|_| {
                Temperature::from_millicelsius(0)
            });
            self.insert(
                record.get(0).unwrap_or_default(),
                record.get(1).unwrap_or_default(),
                record.get(2).unwrap_or_default(),
                start_time,
                cost,
            )?;
            count += 1;
        }
        Ok(count)
    }

    /// Makes writes visible to other connections onto the same file. A
    /// no-op on this connection: every `insert` above already runs in
    /// SQLite's default autocommit mode, so there is no open transaction
    /// to flush — this exists to keep the operation named and callable
    /// at the same point a batched-transaction implementation would need
    /// it.
    pub fn commit(&self) -> Result<(), PersistenceError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn insert_and_select_round_trips() {
        let table = TariffTable::open(Path::new(":memory:")).unwrap();
        table
            .insert("CA", "Ottawa", "Hydro Ottawa", 19, Temperature::from_decimal(dec!(0.12)))
            .unwrap();
        let schedule = table.select("CA", "Ottawa").unwrap();
        assert_eq!(schedule.get(&19), Some(&Temperature::from_decimal(dec!(0.12))));
    }

    #[test]
    fn select_on_unknown_location_is_empty() {
        let table = TariffTable::open(Path::new(":memory:")).unwrap();
        assert!(table.select("US", "Nowhere").unwrap().is_empty());
    }
}
