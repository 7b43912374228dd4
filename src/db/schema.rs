/// Tables for cached source results and the settings store.
pub const SCHEMA: &str = r#"
-- One row per cached source fetch (serialized JSON payload)
CREATE TABLE IF NOT EXISTS cache_entries (
    cache_key TEXT PRIMARY KEY,
    description TEXT NOT NULL,
    data BLOB NOT NULL,
    cached_at TEXT NOT NULL
);

-- Key-value settings, split into 'local' and 'sync' areas
CREATE TABLE IF NOT EXISTS settings (
    area TEXT NOT NULL,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    PRIMARY KEY (area, key)
);
"#;
