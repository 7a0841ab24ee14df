use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, Row, params};

use quill_types::models::{Role, SelectionRange};

use crate::Database;
use crate::models::{
    CommentRow, DocumentAccess, DocumentRow, PermissionRow, UpdateOutcome, UserRow, now_timestamp,
};

const DOCUMENT_COLUMNS: &str =
    "d.id, d.owner_id, d.title, d.content, d.is_public, d.version, d.created_at, d.updated_at";

impl Database {
    // -- Users --

    /// Returns `false` when the email is already registered.
    pub fn create_user(&self, id: &str, email: &str, password_hash: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT INTO users (id, email, password, created_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(email) DO NOTHING",
                (id, email, password_hash, now_timestamp()),
            )?;
            Ok(inserted == 1)
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email", email))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    pub fn update_password(&self, user_id: &str, password_hash: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET password = ?2 WHERE id = ?1",
                (user_id, password_hash),
            )?;
            Ok(changed > 0)
        })
    }

    // -- Password resets --

    pub fn insert_password_reset(&self, token_hash: &str, user_id: &str, expires_at: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO password_resets (token_hash, user_id, expires_at) VALUES (?1, ?2, ?3)",
                (token_hash, user_id, expires_at),
            )?;
            Ok(())
        })
    }

    /// Consumes a reset token. Returns the user id if the token existed and
    /// had not expired; the row is deleted either way.
    pub fn take_password_reset(&self, token_hash: &str) -> Result<Option<String>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let row: Option<(String, String)> = tx
                .query_row(
                    "SELECT user_id, expires_at FROM password_resets WHERE token_hash = ?1",
                    [token_hash],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            tx.execute("DELETE FROM password_resets WHERE token_hash = ?1", [token_hash])?;
            tx.commit()?;

            Ok(row.and_then(|(user_id, expires_at)| (expires_at > now_timestamp()).then_some(user_id)))
        })
    }

    // -- Documents --

    pub fn create_document(&self, id: &str, owner_id: &str, title: &str, content: &str) -> Result<DocumentRow> {
        let now = now_timestamp();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO documents (id, owner_id, title, content, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![id, owner_id, title, content, now],
            )?;
            Ok(DocumentRow {
                id: id.to_string(),
                owner_id: owner_id.to_string(),
                title: title.to_string(),
                content: content.to_string(),
                is_public: false,
                version: 1,
                created_at: now.clone(),
                updated_at: now,
            })
        })
    }

    pub fn get_document(&self, id: &str) -> Result<Option<DocumentRow>> {
        self.with_conn(|conn| query_document(conn, id))
    }

    /// Documents owned by `owner_id`, most recently updated first.
    pub fn list_owned_documents(&self, owner_id: &str) -> Result<Vec<DocumentRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {DOCUMENT_COLUMNS} FROM documents d
                 WHERE d.owner_id = ?1
                 ORDER BY d.updated_at DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([owner_id], document_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Documents with a permission row for `email`, most recently updated first.
    pub fn list_shared_documents(&self, email: &str) -> Result<Vec<DocumentRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {DOCUMENT_COLUMNS} FROM documents d
                 JOIN document_permissions p ON p.document_id = d.id
                 WHERE p.grantee_email = ?1
                 ORDER BY d.updated_at DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([email], document_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Resolves how `user_id` / `email` may reach a document. `Ok(None)` covers
    /// both "no such document" and "no access".
    pub fn document_access(&self, document_id: &str, user_id: &str, email: &str) -> Result<Option<DocumentAccess>> {
        self.with_conn(|conn| {
            let doc: Option<(String, bool)> = conn
                .query_row(
                    "SELECT owner_id, is_public FROM documents WHERE id = ?1",
                    [document_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            let Some((owner_id, is_public)) = doc else {
                return Ok(None);
            };

            if owner_id == user_id {
                return Ok(Some(DocumentAccess::Owner));
            }

            let role: Option<String> = conn
                .query_row(
                    "SELECT role FROM document_permissions WHERE document_id = ?1 AND grantee_email = ?2",
                    [document_id, email],
                    |row| row.get(0),
                )
                .optional()?;

            match role {
                Some(role) => Ok(Some(DocumentAccess::Shared(role.parse::<Role>()?))),
                None if is_public => Ok(Some(DocumentAccess::Public)),
                None => Ok(None),
            }
        })
    }

    /// Partial save. Bumps `version` and `updated_at` on success. When
    /// `expected_version` is given the write only happens if it matches.
    pub fn update_document(
        &self,
        id: &str,
        title: Option<&str>,
        content: Option<&str>,
        is_public: Option<bool>,
        expected_version: Option<i64>,
    ) -> Result<UpdateOutcome> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE documents SET
                    title = COALESCE(?2, title),
                    content = COALESCE(?3, content),
                    is_public = COALESCE(?4, is_public),
                    version = version + 1,
                    updated_at = ?5
                 WHERE id = ?1 AND (?6 IS NULL OR version = ?6)",
                params![id, title, content, is_public, now_timestamp(), expected_version],
            )?;

            match query_document(conn, id)? {
                Some(row) if changed > 0 => Ok(UpdateOutcome::Updated(row)),
                Some(row) => Ok(UpdateOutcome::VersionMismatch { current: row.version }),
                None => Ok(UpdateOutcome::NotFound),
            }
        })
    }

    /// Deletes a document owned by `owner_id`. Permissions and comments go
    /// with it through `ON DELETE CASCADE`.
    pub fn delete_document(&self, id: &str, owner_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "DELETE FROM documents WHERE id = ?1 AND owner_id = ?2",
                (id, owner_id),
            )?;
            Ok(changed > 0)
        })
    }

    /// Public read path: only rows flagged public are returned.
    pub fn get_public_document(&self, id: &str) -> Result<Option<DocumentRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {DOCUMENT_COLUMNS} FROM documents d WHERE d.id = ?1 AND d.is_public = 1");
            conn.query_row(&sql, [id], document_from_row)
                .optional()
                .map_err(Into::into)
        })
    }

    // -- Permissions --

    /// Upsert keyed on (document, grantee): updates the role when a row
    /// exists, inserts otherwise. Returns the row and whether it was created.
    pub fn upsert_permission(
        &self,
        id: &str,
        document_id: &str,
        grantee_email: &str,
        role: Role,
    ) -> Result<(PermissionRow, bool)> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let existing: Option<String> = tx
                .query_row(
                    "SELECT id FROM document_permissions WHERE document_id = ?1 AND grantee_email = ?2",
                    [document_id, grantee_email],
                    |row| row.get(0),
                )
                .optional()?;

            let created = if let Some(existing_id) = existing {
                tx.execute(
                    "UPDATE document_permissions SET role = ?2 WHERE id = ?1",
                    (&existing_id, role.as_str()),
                )?;
                false
            } else {
                tx.execute(
                    "INSERT INTO document_permissions (id, document_id, grantee_email, role, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![id, document_id, grantee_email, role.as_str(), now_timestamp()],
                )?;
                true
            };

            let row = tx.query_row(
                "SELECT id, document_id, grantee_email, role, created_at
                 FROM document_permissions WHERE document_id = ?1 AND grantee_email = ?2",
                [document_id, grantee_email],
                permission_from_row,
            )?;
            tx.commit()?;

            Ok((row, created))
        })
    }

    pub fn list_permissions(&self, document_id: &str) -> Result<Vec<PermissionRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, document_id, grantee_email, role, created_at
                 FROM document_permissions WHERE document_id = ?1
                 ORDER BY created_at ASC",
            )?;
            let rows = stmt
                .query_map([document_id], permission_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn delete_permission(&self, document_id: &str, grantee_email: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "DELETE FROM document_permissions WHERE document_id = ?1 AND grantee_email = ?2",
                (document_id, grantee_email),
            )?;
            Ok(changed > 0)
        })
    }

    // -- Comments --

    pub fn insert_comment(
        &self,
        id: &str,
        document_id: &str,
        author_id: &str,
        author_email: &str,
        content: &str,
        selection: Option<SelectionRange>,
    ) -> Result<CommentRow> {
        let now = now_timestamp();
        let (from, to) = selection.map_or((None, None), |s| (Some(s.from), Some(s.to)));
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO comments
                    (id, document_id, author_id, author_email, content, selection_from, selection_to, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
                params![id, document_id, author_id, author_email, content, from, to, now],
            )?;
            Ok(CommentRow {
                id: id.to_string(),
                document_id: document_id.to_string(),
                author_id: author_id.to_string(),
                author_email: author_email.to_string(),
                content: content.to_string(),
                selection_from: from,
                selection_to: to,
                created_at: now.clone(),
                updated_at: now,
            })
        })
    }

    pub fn list_comments(&self, document_id: &str) -> Result<Vec<CommentRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, document_id, author_id, author_email, content, selection_from, selection_to, created_at, updated_at
                 FROM comments WHERE document_id = ?1
                 ORDER BY created_at ASC",
            )?;
            let rows = stmt
                .query_map([document_id], comment_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_comment(&self, id: &str) -> Result<Option<CommentRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, document_id, author_id, author_email, content, selection_from, selection_to, created_at, updated_at
                 FROM comments WHERE id = ?1",
                [id],
                comment_from_row,
            )
            .optional()
            .map_err(Into::into)
        })
    }

    pub fn delete_comment(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM comments WHERE id = ?1", [id])?;
            Ok(changed > 0)
        })
    }
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let sql = format!("SELECT id, email, password, created_at FROM users WHERE {column} = ?1");
    let row = conn
        .query_row(&sql, [value], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                email: row.get(1)?,
                password: row.get(2)?,
                created_at: row.get(3)?,
            })
        })
        .optional()?;
    Ok(row)
}

fn query_document(conn: &Connection, id: &str) -> Result<Option<DocumentRow>> {
    let sql = format!("SELECT {DOCUMENT_COLUMNS} FROM documents d WHERE d.id = ?1");
    let row = conn.query_row(&sql, [id], document_from_row).optional()?;
    Ok(row)
}

fn document_from_row(row: &Row<'_>) -> rusqlite::Result<DocumentRow> {
    Ok(DocumentRow {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        title: row.get(2)?,
        content: row.get(3)?,
        is_public: row.get(4)?,
        version: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn permission_from_row(row: &Row<'_>) -> rusqlite::Result<PermissionRow> {
    Ok(PermissionRow {
        id: row.get(0)?,
        document_id: row.get(1)?,
        grantee_email: row.get(2)?,
        role: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn comment_from_row(row: &Row<'_>) -> rusqlite::Result<CommentRow> {
    Ok(CommentRow {
        id: row.get(0)?,
        document_id: row.get(1)?,
        author_id: row.get(2)?,
        author_email: row.get(3)?,
        content: row.get(4)?,
        selection_from: row.get(5)?,
        selection_to: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn db_with_user(email: &str) -> (Database, String) {
        let db = Database::open_in_memory().unwrap();
        let id = Uuid::new_v4().to_string();
        db.create_user(&id, email, "hash").unwrap();
        (db, id)
    }

    fn new_doc(db: &Database, owner: &str, title: &str) -> DocumentRow {
        db.create_document(&Uuid::new_v4().to_string(), owner, title, "").unwrap()
    }

    #[test]
    fn duplicate_email_is_not_inserted() {
        let (db, first) = db_with_user("dup@example.com");
        assert!(!db.create_user(&Uuid::new_v4().to_string(), "dup@example.com", "other").unwrap());
        let user = db.get_user_by_email("dup@example.com").unwrap().unwrap();
        assert_eq!(user.id, first);
        assert_eq!(user.password, "hash");
    }

    #[test]
    fn share_twice_updates_role_instead_of_duplicating() {
        let (db, owner) = db_with_user("owner@example.com");
        let doc = new_doc(&db, &owner, "Plan");

        let (first, created) = db
            .upsert_permission(&Uuid::new_v4().to_string(), &doc.id, "bob@example.com", Role::Viewer)
            .unwrap();
        assert!(created);

        let (second, created) = db
            .upsert_permission(&Uuid::new_v4().to_string(), &doc.id, "bob@example.com", Role::Editor)
            .unwrap();
        assert!(!created);
        assert_eq!(second.id, first.id);
        assert_eq!(second.role, "editor");

        let all = db.list_permissions(&doc.id).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].role, "editor");
    }

    #[test]
    fn role_column_rejects_unknown_values() {
        let (db, owner) = db_with_user("owner@example.com");
        let doc = new_doc(&db, &owner, "Plan");

        let result = db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO document_permissions (id, document_id, grantee_email, role, created_at)
                 VALUES ('p1', ?1, 'x@example.com', 'owner', 'now')",
                [&doc.id],
            )?;
            Ok(())
        });
        assert!(result.is_err());
    }

    #[test]
    fn access_resolution() {
        let (db, owner) = db_with_user("owner@example.com");
        let doc = new_doc(&db, &owner, "Plan");
        let stranger = Uuid::new_v4().to_string();

        assert_eq!(
            db.document_access(&doc.id, &owner, "owner@example.com").unwrap(),
            Some(DocumentAccess::Owner)
        );
        assert_eq!(db.document_access(&doc.id, &stranger, "s@example.com").unwrap(), None);

        db.upsert_permission("p", &doc.id, "s@example.com", Role::Commenter).unwrap();
        assert_eq!(
            db.document_access(&doc.id, &stranger, "s@example.com").unwrap(),
            Some(DocumentAccess::Shared(Role::Commenter))
        );

        db.update_document(&doc.id, None, None, Some(true), None).unwrap();
        assert_eq!(
            db.document_access(&doc.id, &stranger, "other@example.com").unwrap(),
            Some(DocumentAccess::Public)
        );
        assert_eq!(db.document_access("missing", &owner, "owner@example.com").unwrap(), None);
    }

    #[test]
    fn conditional_update_detects_stale_version() {
        let (db, owner) = db_with_user("owner@example.com");
        let doc = new_doc(&db, &owner, "Plan");

        let UpdateOutcome::Updated(saved) =
            db.update_document(&doc.id, None, Some("<p>one</p>"), None, Some(1)).unwrap()
        else {
            panic!("first save should apply");
        };
        assert_eq!(saved.version, 2);
        assert_eq!(saved.content, "<p>one</p>");
        assert!(saved.updated_at >= doc.updated_at);

        match db.update_document(&doc.id, None, Some("<p>stale</p>"), None, Some(1)).unwrap() {
            UpdateOutcome::VersionMismatch { current } => assert_eq!(current, 2),
            other => panic!("expected mismatch, got {:?}", other),
        }
        assert_eq!(db.get_document(&doc.id).unwrap().unwrap().content, "<p>one</p>");

        // Without a version the save is last-write-wins.
        assert!(matches!(
            db.update_document(&doc.id, Some("Renamed"), None, None, None).unwrap(),
            UpdateOutcome::Updated(_)
        ));
        assert!(matches!(
            db.update_document("missing", Some("x"), None, None, None).unwrap(),
            UpdateOutcome::NotFound
        ));
    }

    #[test]
    fn delete_is_owner_scoped_and_cascades() {
        let (db, owner) = db_with_user("owner@example.com");
        let doc = new_doc(&db, &owner, "Plan");
        db.upsert_permission("p", &doc.id, "bob@example.com", Role::Viewer).unwrap();
        db.insert_comment("c", &doc.id, &owner, "owner@example.com", "hi", None).unwrap();

        assert!(!db.delete_document(&doc.id, &Uuid::new_v4().to_string()).unwrap());
        assert!(db.delete_document(&doc.id, &owner).unwrap());
        assert!(db.list_permissions(&doc.id).unwrap().is_empty());
        assert!(db.get_comment("c").unwrap().is_none());
    }

    #[test]
    fn shared_listing_and_public_lookup() {
        let (db, owner) = db_with_user("owner@example.com");
        let a = new_doc(&db, &owner, "A");
        let b = new_doc(&db, &owner, "B");
        db.upsert_permission("p1", &a.id, "bob@example.com", Role::Viewer).unwrap();

        let shared = db.list_shared_documents("bob@example.com").unwrap();
        assert_eq!(shared.len(), 1);
        assert_eq!(shared[0].id, a.id);

        assert!(db.get_public_document(&b.id).unwrap().is_none());
        db.update_document(&b.id, None, None, Some(true), None).unwrap();
        assert!(db.get_public_document(&b.id).unwrap().is_some());
    }

    #[test]
    fn reset_tokens_are_single_use() {
        let (db, user) = db_with_user("owner@example.com");
        db.insert_password_reset("h1", &user, "9999-12-31T00:00:00.000000Z").unwrap();
        db.insert_password_reset("h2", &user, "2000-01-01T00:00:00.000000Z").unwrap();

        assert_eq!(db.take_password_reset("h1").unwrap(), Some(user.clone()));
        assert_eq!(db.take_password_reset("h1").unwrap(), None);
        assert_eq!(db.take_password_reset("h2").unwrap(), None);
    }

    #[test]
    fn comments_keep_selection() {
        let (db, owner) = db_with_user("owner@example.com");
        let doc = new_doc(&db, &owner, "Plan");
        db.insert_comment(
            &Uuid::new_v4().to_string(),
            &doc.id,
            &owner,
            "owner@example.com",
            "typo here",
            Some(SelectionRange { from: 3, to: 9 }),
        )
        .unwrap();

        let comment = db.list_comments(&doc.id).unwrap().remove(0).into_comment().unwrap();
        assert_eq!(comment.selection, Some(SelectionRange { from: 3, to: 9 }));
    }
}
