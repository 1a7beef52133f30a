// Conceptual tables from spec.md §4.3. `unified_config` is the sole source
// of truth for a job's configuration (spec.md §9's resolution of the
// blob-vs-flat-columns ambiguity); `jobs.full_config` is a derived cache of
// the serialized config a `command` was last compiled from, nulled whenever
// a compiler-consumed field changes.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    id              TEXT PRIMARY KEY,
    name            TEXT NOT NULL UNIQUE,
    status          TEXT NOT NULL,
    priority        INTEGER NOT NULL DEFAULT 5,
    created_at      TEXT NOT NULL,
    started_at      TEXT,
    stopped_at      TEXT,
    pid             INTEGER,
    error_message   TEXT,
    command         TEXT,
    command_override TEXT,
    full_config     TEXT,
    abr_enabled     INTEGER NOT NULL DEFAULT 0,
    tags            TEXT NOT NULL DEFAULT '[]',
    notes           TEXT
);
CREATE INDEX IF NOT EXISTS idx_jobs_status_created ON jobs(status, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_jobs_abr_enabled ON jobs(abr_enabled);

CREATE TABLE IF NOT EXISTS unified_config (
    job_id              TEXT PRIMARY KEY REFERENCES jobs(id) ON DELETE CASCADE,
    serialized_config   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS statistics (
    id                      INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id                  TEXT NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
    timestamp               TEXT NOT NULL,
    fps                     REAL NOT NULL,
    bitrate_bps             INTEGER NOT NULL,
    dropped_frames          INTEGER NOT NULL,
    speed                   REAL NOT NULL,
    cpu_percent             REAL NOT NULL,
    memory_mb               REAL NOT NULL,
    gpu_percent             REAL,
    total_frames            INTEGER NOT NULL,
    current_time_offset_us  INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_statistics_job_timestamp ON statistics(job_id, timestamp);
CREATE INDEX IF NOT EXISTS idx_statistics_timestamp ON statistics(timestamp);

CREATE TABLE IF NOT EXISTS archives (
    id                  TEXT PRIMARY KEY,
    name                TEXT NOT NULL,
    archived_at         TEXT NOT NULL,
    archived_reason     TEXT NOT NULL,
    serialized_config   TEXT NOT NULL
);
"#;
