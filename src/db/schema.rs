pub const SCHEMA: &str = r#"
-- settings table (cache mode and other global switches)
CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- daily_payloads table (merged articles plus user state, one row per date)
CREATE TABLE IF NOT EXISTS daily_payloads (
    namespace TEXT NOT NULL,
    date TEXT NOT NULL,
    payload TEXT NOT NULL,
    cached_at TEXT,
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (namespace, date)
);

CREATE INDEX IF NOT EXISTS idx_daily_payloads_date ON daily_payloads(namespace, date DESC);

-- documents table (pointer, snapshots, day caches, content and summaries)
CREATE TABLE IF NOT EXISTS documents (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;
