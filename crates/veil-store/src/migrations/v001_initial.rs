//! v001 -- Initial schema creation.
//!
//! Creates the core tables: `users`, `groups`, `group_members`,
//! `group_removed_users`, `messages`, and `blocked_users`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id              TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    name            TEXT NOT NULL,
    created_at      TEXT NOT NULL,               -- ISO-8601 / RFC-3339
    last_active_at  TEXT NOT NULL,
    online_sessions INTEGER NOT NULL DEFAULT 0   -- concurrently open sessions
);

-- ----------------------------------------------------------------
-- Groups
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS groups (
    id          TEXT PRIMARY KEY NOT NULL,       -- UUID v4
    name        TEXT NOT NULL,
    code        TEXT NOT NULL UNIQUE,            -- 6-char join token
    description TEXT NOT NULL DEFAULT '',
    created_by  TEXT NOT NULL,                   -- FK -> users(id)
    theme       TEXT NOT NULL DEFAULT 'default',
    created_at  TEXT NOT NULL,

    FOREIGN KEY (created_by) REFERENCES users(id)
);

-- Members joined to a group, one anonymous identity per (group, user).
-- The anonymous name is unique within its group; the index is the
-- last-resort guard against two concurrent joiners picking the same name.
CREATE TABLE IF NOT EXISTS group_members (
    group_id       TEXT NOT NULL,                -- FK -> groups(id)
    user_id        TEXT NOT NULL,                -- FK -> users(id)
    anonymous_name TEXT NOT NULL,
    joined_at      TEXT NOT NULL,

    PRIMARY KEY (group_id, user_id),
    UNIQUE (group_id, anonymous_name),
    FOREIGN KEY (group_id) REFERENCES groups(id) ON DELETE CASCADE,
    FOREIGN KEY (user_id) REFERENCES users(id)
);

CREATE INDEX IF NOT EXISTS idx_members_user ON group_members(user_id);

-- Users administratively removed from a group; a row here bars re-joining.
CREATE TABLE IF NOT EXISTS group_removed_users (
    group_id   TEXT NOT NULL,                    -- FK -> groups(id)
    user_id    TEXT NOT NULL,
    removed_at TEXT NOT NULL,
    removed_by TEXT NOT NULL,

    PRIMARY KEY (group_id, user_id),
    FOREIGN KEY (group_id) REFERENCES groups(id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id                      TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    group_id                TEXT NOT NULL,              -- FK -> groups(id)
    sender_id               TEXT NOT NULL,              -- FK -> users(id)
    sender_name             TEXT NOT NULL,
    content                 TEXT NOT NULL,
    edited                  INTEGER NOT NULL DEFAULT 0, -- boolean 0/1
    is_file                 INTEGER NOT NULL DEFAULT 0,
    file_name               TEXT,
    file_content            TEXT,                       -- base64 payload
    file_size               INTEGER,
    auto_delete_enabled     INTEGER NOT NULL DEFAULT 0,
    auto_delete_after_secs  INTEGER,
    auto_delete_expires_at  TEXT,
    auto_delete_is_deleted  INTEGER NOT NULL DEFAULT 0, -- soft tombstone
    auto_delete_deleted_at  TEXT,
    created_at              TEXT NOT NULL,

    FOREIGN KEY (group_id) REFERENCES groups(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_group_created
    ON messages(group_id, created_at);

-- Partial index for the expiration sweep's hot query.
CREATE INDEX IF NOT EXISTS idx_messages_expiry
    ON messages(auto_delete_expires_at)
    WHERE auto_delete_enabled = 1 AND auto_delete_is_deleted = 0;

-- ----------------------------------------------------------------
-- Block graph (directed edges; lookups are by the exact pair)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS blocked_users (
    blocked_by   TEXT NOT NULL,                  -- FK -> users(id)
    blocked_user TEXT NOT NULL,                  -- FK -> users(id)
    created_at   TEXT NOT NULL,

    PRIMARY KEY (blocked_by, blocked_user)
);

CREATE INDEX IF NOT EXISTS idx_blocked_reverse ON blocked_users(blocked_user);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
