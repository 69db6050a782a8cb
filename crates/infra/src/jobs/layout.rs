//! Physical layouts for job records and the SQL each layout needs.
//!
//! - **Unified**: one table, one row per job.
//! - **Split**: read-mostly fields in a descriptor table, contended fields in a
//!   state table, joined by `id`. Claiming locks and updates the state table
//!   only; the descriptor is joined in for the claimed row afterwards.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use jobq_core::{DomainError, DomainResult, JobStatus};

/// How a job record is laid out in the backing store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableLayout {
    /// All fields in a single table
    Unified,
    /// Descriptor table + state table
    #[default]
    Split,
}

impl TableLayout {
    pub fn as_str(self) -> &'static str {
        match self {
            TableLayout::Unified => "unified",
            TableLayout::Split => "split",
        }
    }
}

impl core::fmt::Display for TableLayout {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TableLayout {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unified" | "full" | "single" => Ok(TableLayout::Unified),
            "split" => Ok(TableLayout::Split),
            other => Err(DomainError::validation(format!(
                "unknown table layout '{other}' (expected unified or split)"
            ))),
        }
    }
}

const MAX_PREFIX_LEN: usize = 40;

/// Table names, derived from a validated prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableNames {
    prefix: String,
}

impl TableNames {
    /// The prefix is spliced into SQL, so only `[a-z0-9_]` is accepted.
    pub fn with_prefix(prefix: impl Into<String>) -> DomainResult<Self> {
        let prefix = prefix.into();
        if prefix.len() > MAX_PREFIX_LEN {
            return Err(DomainError::validation(format!(
                "table prefix longer than {MAX_PREFIX_LEN} characters"
            )));
        }
        if let Some(bad) = prefix
            .chars()
            .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_'))
        {
            return Err(DomainError::validation(format!(
                "table prefix '{prefix}' contains '{bad}' (allowed: a-z, 0-9, _)"
            )));
        }
        if prefix.starts_with(|c: char| c.is_ascii_digit()) {
            return Err(DomainError::validation(format!(
                "table prefix '{prefix}' must not start with a digit"
            )));
        }
        Ok(Self { prefix })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Unified layout table.
    pub fn jobs(&self) -> String {
        format!("{}jobs", self.prefix)
    }

    /// Split layout, read-mostly half.
    pub fn descriptors(&self) -> String {
        format!("{}job_descriptors", self.prefix)
    }

    /// Split layout, write-hot half.
    pub fn states(&self) -> String {
        format!("{}job_states", self.prefix)
    }
}

/// Every SQL statement a Postgres job store issues, rendered once per
/// layout + table names.
///
/// All statements return or read columns in the order of [`JOB_COLUMNS`].
#[derive(Debug, Clone)]
pub struct Statements {
    pub layout: TableLayout,
    /// DDL, one statement per entry
    pub schema: Vec<String>,
    /// Unified: the full row. Split: the descriptor row.
    pub insert_primary: String,
    /// Split only: the state row.
    pub insert_state: Option<String>,
    pub claim: String,
    pub fetch: String,
    /// Processing -> Completed on the contended table.
    pub mark_completed: String,
    /// Processing -> Completed with `error = $2`.
    pub mark_failed: String,
    /// Removes the contended row, guarded by `status = Processing`.
    pub delete_guarded: String,
    /// Split only: removes the descriptor row.
    pub delete_descriptor: Option<String>,
}

/// Column order of every materialized job read.
pub const JOB_COLUMNS: [&str; 9] = [
    "id",
    "job_name",
    "job_param",
    "status",
    "error",
    "created_at",
    "scheduled_start_at",
    "started_count",
    "next_job_id",
];

impl Statements {
    pub fn new(layout: TableLayout, tables: &TableNames) -> Self {
        let scheduled = JobStatus::Scheduled.as_i16();
        let processing = JobStatus::Processing.as_i16();
        let completed = JobStatus::Completed.as_i16();

        match layout {
            TableLayout::Unified => {
                let jobs = tables.jobs();
                Self {
                    layout,
                    schema: vec![
                        format!(
                            r#"
                            CREATE TABLE IF NOT EXISTS {jobs} (
                                id UUID PRIMARY KEY,
                                job_name TEXT NOT NULL,
                                job_param TEXT NULL,
                                status SMALLINT NOT NULL,
                                error TEXT NULL,
                                created_at TIMESTAMPTZ NOT NULL,
                                scheduled_start_at TIMESTAMPTZ NOT NULL,
                                started_count INTEGER NOT NULL CHECK (started_count >= 0),
                                next_job_id UUID NULL
                            )
                            "#
                        ),
                        format!(
                            "CREATE INDEX IF NOT EXISTS {jobs}_ready_idx \
                             ON {jobs} (scheduled_start_at) WHERE status = {scheduled}"
                        ),
                    ],
                    insert_primary: format!(
                        r#"
                        INSERT INTO {jobs} (
                            id,
                            job_name,
                            job_param,
                            status,
                            error,
                            created_at,
                            scheduled_start_at,
                            started_count,
                            next_job_id
                        )
                        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                        "#
                    ),
                    insert_state: None,
                    claim: format!(
                        r#"
                        WITH ready AS (
                            SELECT id FROM {jobs}
                            WHERE status = {scheduled} AND scheduled_start_at <= NOW()
                            ORDER BY scheduled_start_at
                            LIMIT 1
                            FOR UPDATE SKIP LOCKED
                        )
                        UPDATE {jobs} j
                        SET status = {processing}, started_count = j.started_count + 1
                        FROM ready
                        WHERE j.id = ready.id
                        RETURNING
                            j.id, j.job_name, j.job_param, j.status, j.error,
                            j.created_at, j.scheduled_start_at, j.started_count, j.next_job_id
                        "#
                    ),
                    fetch: format!(
                        r#"
                        SELECT
                            id, job_name, job_param, status, error,
                            created_at, scheduled_start_at, started_count, next_job_id
                        FROM {jobs}
                        WHERE id = $1
                        "#
                    ),
                    mark_completed: format!(
                        "UPDATE {jobs} SET status = {completed} \
                         WHERE id = $1 AND status = {processing}"
                    ),
                    mark_failed: format!(
                        "UPDATE {jobs} SET status = {completed}, error = $2 \
                         WHERE id = $1 AND status = {processing}"
                    ),
                    delete_guarded: format!(
                        "DELETE FROM {jobs} WHERE id = $1 AND status = {processing}"
                    ),
                    delete_descriptor: None,
                }
            }
            TableLayout::Split => {
                let descriptors = tables.descriptors();
                let states = tables.states();
                Self {
                    layout,
                    schema: vec![
                        format!(
                            r#"
                            CREATE TABLE IF NOT EXISTS {descriptors} (
                                id UUID PRIMARY KEY,
                                job_name TEXT NOT NULL,
                                job_param TEXT NULL,
                                created_at TIMESTAMPTZ NOT NULL,
                                next_job_id UUID NULL
                            )
                            "#
                        ),
                        format!(
                            r#"
                            CREATE TABLE IF NOT EXISTS {states} (
                                id UUID PRIMARY KEY,
                                status SMALLINT NOT NULL,
                                error TEXT NULL,
                                scheduled_start_at TIMESTAMPTZ NOT NULL,
                                started_count INTEGER NOT NULL CHECK (started_count >= 0)
                            )
                            "#
                        ),
                        format!(
                            "CREATE INDEX IF NOT EXISTS {states}_ready_idx \
                             ON {states} (scheduled_start_at) WHERE status = {scheduled}"
                        ),
                    ],
                    insert_primary: format!(
                        r#"
                        INSERT INTO {descriptors} (
                            id,
                            job_name,
                            job_param,
                            created_at,
                            next_job_id
                        )
                        VALUES ($1, $2, $3, $4, $5)
                        "#
                    ),
                    insert_state: Some(format!(
                        r#"
                        INSERT INTO {states} (
                            id,
                            status,
                            error,
                            scheduled_start_at,
                            started_count
                        )
                        VALUES ($1, $2, $3, $4, $5)
                        "#
                    )),
                    claim: format!(
                        r#"
                        WITH ready AS (
                            SELECT id FROM {states}
                            WHERE status = {scheduled} AND scheduled_start_at <= NOW()
                            ORDER BY scheduled_start_at
                            LIMIT 1
                            FOR UPDATE SKIP LOCKED
                        ),
                        claimed AS (
                            UPDATE {states} s
                            SET status = {processing}, started_count = s.started_count + 1
                            FROM ready
                            WHERE s.id = ready.id
                            RETURNING s.id, s.status, s.error, s.scheduled_start_at, s.started_count
                        )
                        SELECT
                            d.id, d.job_name, d.job_param, c.status, c.error,
                            d.created_at, c.scheduled_start_at, c.started_count, d.next_job_id
                        FROM claimed c
                        INNER JOIN {descriptors} d ON d.id = c.id
                        "#
                    ),
                    fetch: format!(
                        r#"
                        SELECT
                            d.id, d.job_name, d.job_param, s.status, s.error,
                            d.created_at, s.scheduled_start_at, s.started_count, d.next_job_id
                        FROM {states} s
                        INNER JOIN {descriptors} d ON d.id = s.id
                        WHERE s.id = $1
                        "#
                    ),
                    mark_completed: format!(
                        "UPDATE {states} SET status = {completed} \
                         WHERE id = $1 AND status = {processing}"
                    ),
                    mark_failed: format!(
                        "UPDATE {states} SET status = {completed}, error = $2 \
                         WHERE id = $1 AND status = {processing}"
                    ),
                    delete_guarded: format!(
                        "DELETE FROM {states} WHERE id = $1 AND status = {processing}"
                    ),
                    delete_descriptor: Some(format!("DELETE FROM {descriptors} WHERE id = $1")),
                }
            }
        }
    }
}
