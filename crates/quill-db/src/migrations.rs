use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id          TEXT PRIMARY KEY,
                email       TEXT NOT NULL UNIQUE,
                password    TEXT NOT NULL,
                created_at  TEXT NOT NULL
            );

            CREATE TABLE documents (
                id          TEXT PRIMARY KEY,
                owner_id    TEXT NOT NULL REFERENCES users(id),
                title       TEXT NOT NULL,
                content     TEXT NOT NULL DEFAULT '',
                is_public   INTEGER NOT NULL DEFAULT 0,
                version     INTEGER NOT NULL DEFAULT 1,
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            );

            CREATE INDEX idx_documents_owner
                ON documents(owner_id, updated_at);

            CREATE TABLE document_permissions (
                id              TEXT PRIMARY KEY,
                document_id     TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
                grantee_email   TEXT NOT NULL,
                role            TEXT NOT NULL CHECK (role IN ('viewer', 'commenter', 'editor')),
                created_at      TEXT NOT NULL,
                UNIQUE(document_id, grantee_email)
            );

            CREATE INDEX idx_permissions_grantee
                ON document_permissions(grantee_email);

            CREATE TABLE comments (
                id              TEXT PRIMARY KEY,
                document_id     TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
                author_id       TEXT NOT NULL REFERENCES users(id),
                author_email    TEXT NOT NULL,
                content         TEXT NOT NULL,
                selection_from  INTEGER,
                selection_to    INTEGER,
                created_at      TEXT NOT NULL,
                updated_at      TEXT NOT NULL
            );

            CREATE INDEX idx_comments_document
                ON comments(document_id, created_at);

            CREATE TABLE password_resets (
                token_hash  TEXT PRIMARY KEY,
                user_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                expires_at  TEXT NOT NULL
            );

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
