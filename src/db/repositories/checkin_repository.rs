use std::collections::HashMap;
use std::convert::TryFrom;

use rusqlite::{named_params, Connection, OptionalExtension, Row};

use crate::error::{AppError, AppResult};
use crate::models::checkin::{CheckinPhase, DailyCheckinRecord};

const CHECKIN_COLUMNS: &str = r#"
    id,
    experiment_id,
    user_id,
    checkin_date,
    submitted_at,
    phase,
    day_number,
    ratings,
    notes,
    noise_flags,
    source
"#;

#[derive(Debug, Clone)]
pub struct DailyCheckinRow {
    pub id: String,
    pub experiment_id: String,
    pub user_id: String,
    pub checkin_date: String,
    pub submitted_at: String,
    pub phase: String,
    pub day_number: i64,
    pub ratings: String,
    pub notes: Option<String>,
    pub noise_flags: String,
    pub source: String,
}

impl DailyCheckinRow {
    pub fn into_record(self) -> AppResult<DailyCheckinRecord> {
        let phase = CheckinPhase::try_from(self.phase.as_str()).map_err(AppError::validation)?;
        let ratings: HashMap<String, f64> = serde_json::from_str(&self.ratings)?;
        let noise_flags: Vec<String> = serde_json::from_str(&self.noise_flags)?;

        Ok(DailyCheckinRecord {
            id: self.id,
            experiment_id: self.experiment_id,
            user_id: self.user_id,
            checkin_date: self.checkin_date,
            submitted_at: self.submitted_at,
            phase,
            day_number: self.day_number,
            ratings,
            notes: self.notes,
            noise_flags,
            source: self.source,
        })
    }
}

impl TryFrom<&Row<'_>> for DailyCheckinRow {
    type Error = rusqlite::Error;

    fn try_from(row: &Row<'_>) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.get("id")?,
            experiment_id: row.get("experiment_id")?,
            user_id: row.get("user_id")?,
            checkin_date: row.get("checkin_date")?,
            submitted_at: row.get("submitted_at")?,
            phase: row.get("phase")?,
            day_number: row.get("day_number")?,
            ratings: row.get("ratings")?,
            notes: row.get("notes")?,
            noise_flags: row.get("noise_flags")?,
            source: row.get("source")?,
        })
    }
}

pub struct CheckinRepository;

impl CheckinRepository {
    /// Upsert keyed on (experiment_id, checkin_date): a later submission for
    /// the same day overwrites the earlier one, which makes retries
    /// idempotent without a read-then-write transaction.
    pub fn upsert(conn: &Connection, record: &DailyCheckinRecord) -> AppResult<()> {
        let ratings = serde_json::to_string(&record.ratings)?;
        let noise_flags = serde_json::to_string(&record.noise_flags)?;

        conn.execute(
            r#"
                INSERT INTO daily_checkins (
                    id, experiment_id, user_id, checkin_date, submitted_at,
                    phase, day_number, ratings, notes, noise_flags, source
                ) VALUES (
                    :id, :experiment_id, :user_id, :checkin_date, :submitted_at,
                    :phase, :day_number, :ratings, :notes, :noise_flags, :source
                )
                ON CONFLICT(experiment_id, checkin_date) DO UPDATE SET
                    submitted_at = excluded.submitted_at,
                    phase = excluded.phase,
                    day_number = excluded.day_number,
                    ratings = excluded.ratings,
                    notes = excluded.notes,
                    noise_flags = excluded.noise_flags,
                    source = excluded.source
            "#,
            named_params! {
                ":id": &record.id,
                ":experiment_id": &record.experiment_id,
                ":user_id": &record.user_id,
                ":checkin_date": &record.checkin_date,
                ":submitted_at": &record.submitted_at,
                ":phase": record.phase.as_str(),
                ":day_number": &record.day_number,
                ":ratings": &ratings,
                ":notes": &record.notes,
                ":noise_flags": &noise_flags,
                ":source": &record.source,
            },
        )?;

        Ok(())
    }

    pub fn find_by_date(
        conn: &Connection,
        experiment_id: &str,
        checkin_date: &str,
    ) -> AppResult<Option<DailyCheckinRecord>> {
        let sql = format!(
            "SELECT {CHECKIN_COLUMNS} FROM daily_checkins
             WHERE experiment_id = :experiment_id AND checkin_date = :checkin_date"
        );
        let mut stmt = conn.prepare(&sql)?;

        let row = stmt
            .query_row(
                named_params! {":experiment_id": experiment_id, ":checkin_date": checkin_date},
                |row| DailyCheckinRow::try_from(row),
            )
            .optional()?;

        match row {
            Some(row) => Ok(Some(row.into_record()?)),
            None => Ok(None),
        }
    }

    pub fn list_for_experiment(
        conn: &Connection,
        experiment_id: &str,
    ) -> AppResult<Vec<DailyCheckinRecord>> {
        let sql = format!(
            "SELECT {CHECKIN_COLUMNS} FROM daily_checkins
             WHERE experiment_id = :experiment_id
             ORDER BY checkin_date ASC"
        );
        let mut stmt = conn.prepare(&sql)?;

        let records = stmt
            .query_map(named_params! {":experiment_id": experiment_id}, |row| {
                DailyCheckinRow::try_from(row)
            })?
            .map(|row| row.map_err(AppError::from).and_then(|row| row.into_record()))
            .collect::<AppResult<Vec<_>>>()?;

        Ok(records)
    }
}
