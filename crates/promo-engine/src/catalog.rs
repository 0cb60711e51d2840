//! SQLite product catalog keyed by `(owner, product name)`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use promo_contracts::{PromoError, PromoResult};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserRecord {
    pub id: i64,
    pub username: String,
    pub is_admin: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductRecord {
    pub id: i64,
    pub name: String,
    pub details: String,
    pub price: String,
    pub image_path: Option<String>,
    pub owner_user_id: i64,
    pub owner: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertStatus {
    Created,
    Updated,
}

impl UpsertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpsertStatus::Created => "created",
            UpsertStatus::Updated => "updated",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductUpsert<'a> {
    pub owner: &'a str,
    pub name: &'a str,
    pub details: &'a str,
    pub price: &'a str,
    /// Only overwrites the stored image when present.
    pub image_path: Option<&'a str>,
}

pub struct Catalog {
    conn: Connection,
}

const PRODUCT_COLUMNS: &str =
    "p.id, p.name, p.details, p.price, p.image_path, p.user_id, u.username";

impl Catalog {
    pub fn open(path: impl AsRef<Path>) -> PromoResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open catalog {}", path.display()))?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> PromoResult<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory catalog")?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> PromoResult<Self> {
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("catalog PRAGMA setup failed")?;
        let catalog = Self { conn };
        catalog.migrate()?;
        Ok(catalog)
    }

    fn migrate(&self) -> PromoResult<()> {
        self.conn
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS users (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                username      TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL DEFAULT '',
                is_admin      INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS products (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                name       TEXT NOT NULL,
                details    TEXT NOT NULL,
                price      TEXT NOT NULL,
                image_path TEXT,
                user_id    INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                UNIQUE (user_id, name)
            );
            ",
            )
            .context("catalog migration failed")?;
        Ok(())
    }

    /// Updates the `(owner, name)` product in place or inserts it, creating the
    /// owner as a non-admin user on first sight.
    pub fn upsert(&self, product: &ProductUpsert<'_>) -> PromoResult<(ProductRecord, UpsertStatus)> {
        let owner = product.owner.trim();
        let name = product.name.trim();
        if owner.is_empty() {
            return Err(PromoError::missing("user_name"));
        }
        if name.is_empty() {
            return Err(PromoError::missing("product_name"));
        }
        let details = product.details.trim();
        let price = product.price.trim();
        let image_path = product
            .image_path
            .map(str::trim)
            .filter(|path| !path.is_empty());

        let user_id = self.user_id_or_create(owner)?;
        let existing: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM products WHERE user_id = ?1 AND name = ?2",
                params![user_id, name],
                |row| row.get(0),
            )
            .optional()
            .context("product lookup failed")?;

        let (id, status) = match existing {
            Some(id) => {
                self.conn
                    .execute(
                        "UPDATE products
                         SET details = ?1, price = ?2, image_path = COALESCE(?3, image_path)
                         WHERE id = ?4",
                        params![details, price, image_path, id],
                    )
                    .context("product update failed")?;
                (id, UpsertStatus::Updated)
            }
            None => {
                self.conn
                    .execute(
                        "INSERT INTO products (name, details, price, image_path, user_id)
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                        params![name, details, price, image_path, user_id],
                    )
                    .context("product insert failed")?;
                (self.conn.last_insert_rowid(), UpsertStatus::Created)
            }
        };
        tracing::info!(product_id = id, owner, name, status = status.as_str(), "catalog upsert");
        let record = self
            .product(id)?
            .with_context(|| format!("product {id} vanished after upsert"))?;
        Ok((record, status))
    }

    fn user_id_or_create(&self, username: &str) -> PromoResult<i64> {
        if let Some(user) = self.user(username)? {
            return Ok(user.id);
        }
        self.conn
            .execute("INSERT INTO users (username) VALUES (?1)", params![username])
            .with_context(|| format!("failed to create user {username}"))?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn user(&self, username: &str) -> PromoResult<Option<UserRecord>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, username, is_admin FROM users WHERE username = ?1",
                params![username],
                user_from_row,
            )
            .optional()
            .context("user lookup failed")?)
    }

    pub fn product(&self, id: i64) -> PromoResult<Option<ProductRecord>> {
        let sql = format!(
            "SELECT {PRODUCT_COLUMNS} FROM products p JOIN users u ON u.id = p.user_id WHERE p.id = ?1"
        );
        Ok(self
            .conn
            .query_row(&sql, params![id], product_from_row)
            .optional()
            .context("product lookup failed")?)
    }

    /// Every product, newest first.
    pub fn list_products(&self) -> PromoResult<Vec<ProductRecord>> {
        self.query_products("", &[])
    }

    pub fn products_for_user(&self, username: &str) -> PromoResult<Vec<ProductRecord>> {
        self.query_products("WHERE u.username = ?1", &[&username])
    }

    /// Case-insensitive substring match over product name, details and owner.
    /// A blank query matches nothing.
    pub fn search_products(&self, query: &str) -> PromoResult<Vec<ProductRecord>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let like = like_pattern(query);
        self.query_products(
            "WHERE p.name LIKE ?1 ESCAPE '\\' OR p.details LIKE ?1 ESCAPE '\\' \
             OR u.username LIKE ?1 ESCAPE '\\'",
            &[&like],
        )
    }

    /// Usernames containing `query`, alphabetically. A blank query matches nothing.
    pub fn search_users(&self, query: &str) -> PromoResult<Vec<UserRecord>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, username, is_admin FROM users
                 WHERE username LIKE ?1 ESCAPE '\\' ORDER BY username ASC",
            )
            .context("user search prepare failed")?;
        let rows = stmt
            .query_map(params![like_pattern(query)], user_from_row)
            .context("user search failed")?;
        let mut users = Vec::new();
        for row in rows {
            users.push(row.context("user row decode failed")?);
        }
        Ok(users)
    }

    fn query_products(
        &self,
        filter: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> PromoResult<Vec<ProductRecord>> {
        let sql = format!(
            "SELECT {PRODUCT_COLUMNS} FROM products p JOIN users u ON u.id = p.user_id {filter} \
             ORDER BY p.id DESC"
        );
        let mut stmt = self.conn.prepare(&sql).context("product query prepare failed")?;
        let rows = stmt
            .query_map(args, product_from_row)
            .context("product query failed")?;
        let mut products = Vec::new();
        for row in rows {
            products.push(row.context("product row decode failed")?);
        }
        Ok(products)
    }

    /// Creates the admin account or resets its password and admin flag.
    pub fn ensure_admin(&self, username: &str, password: &str) -> PromoResult<UserRecord> {
        let username = username.trim();
        if username.is_empty() {
            return Err(PromoError::missing("admin username"));
        }
        if password.is_empty() {
            return Err(PromoError::missing("admin password"));
        }
        self.conn
            .execute(
                "INSERT INTO users (username, password_hash, is_admin) VALUES (?1, ?2, 1)
                 ON CONFLICT(username) DO UPDATE SET password_hash = excluded.password_hash, is_admin = 1",
                params![username, hash_password(password)],
            )
            .context("admin seed failed")?;
        self.user(username)?
            .with_context(|| format!("admin {username} missing after seed"))
            .map_err(PromoError::from)
    }

    /// Returns the user when `password` matches. Users created implicitly by an
    /// upsert have no password and never authenticate.
    pub fn authenticate(&self, username: &str, password: &str) -> PromoResult<Option<UserRecord>> {
        let stored: Option<String> = self
            .conn
            .query_row(
                "SELECT password_hash FROM users WHERE username = ?1",
                params![username],
                |row| row.get(0),
            )
            .optional()
            .context("credential lookup failed")?;
        match stored {
            Some(hash) if !hash.is_empty() && hash == hash_password(password) => self.user(username),
            _ => Ok(None),
        }
    }

    /// Admin-only. Removes the row and, best effort, the product's image file.
    /// `None` when no product has that id.
    pub fn delete_product(
        &self,
        actor: &UserRecord,
        product_id: i64,
    ) -> PromoResult<Option<ProductRecord>> {
        if !actor.is_admin {
            return Err(PromoError::Forbidden(format!(
                "{} is not an admin",
                actor.username
            )));
        }
        let Some(record) = self.product(product_id)? else {
            return Ok(None);
        };
        self.conn
            .execute("DELETE FROM products WHERE id = ?1", params![product_id])
            .context("product delete failed")?;
        if let Some(image) = record.image_path.as_deref().map(Path::new) {
            if image.is_file() {
                if let Err(err) = fs::remove_file(image) {
                    tracing::warn!(path = %image.display(), error = %err, "could not remove product image");
                }
            }
        }
        tracing::info!(product_id, admin = %actor.username, "product deleted");
        Ok(Some(record))
    }
}

/// Copies `source` into the public upload directory under a fresh
/// `<uuid>_<file name>` so uploads that share a name never share a file.
pub fn publish_image(source: &Path, public_dir: &Path) -> PromoResult<PathBuf> {
    if !source.is_file() {
        return Err(PromoError::NotFound(source.to_path_buf()));
    }
    let file_name = source
        .file_name()
        .ok_or_else(|| PromoError::NotFound(source.to_path_buf()))?;
    fs::create_dir_all(public_dir)
        .with_context(|| format!("failed to create {}", public_dir.display()))?;
    let dest = public_dir.join(format!(
        "{}_{}",
        uuid::Uuid::new_v4().simple(),
        file_name.to_string_lossy()
    ));
    fs::copy(source, &dest)
        .with_context(|| format!("failed to copy {} to {}", source.display(), dest.display()))?;
    Ok(dest)
}

pub fn hash_password(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

fn like_pattern(query: &str) -> String {
    let escaped = query
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRecord> {
    Ok(UserRecord {
        id: row.get(0)?,
        username: row.get(1)?,
        is_admin: row.get::<_, i64>(2)? != 0,
    })
}

fn product_from_row(row: &Row<'_>) -> rusqlite::Result<ProductRecord> {
    Ok(ProductRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        details: row.get(2)?,
        price: row.get(3)?,
        image_path: row.get(4)?,
        owner_user_id: row.get(5)?,
        owner: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upsert<'a>(owner: &'a str, name: &'a str, details: &'a str, price: &'a str) -> ProductUpsert<'a> {
        ProductUpsert {
            owner,
            name,
            details,
            price,
            image_path: None,
        }
    }

    #[test]
    fn second_upsert_updates_the_same_row() -> anyhow::Result<()> {
        let catalog = Catalog::open_in_memory()?;
        let (first, status) = catalog.upsert(&upsert("alice", "Mug", "v1", "10"))?;
        assert_eq!(status, UpsertStatus::Created);
        let (second, status) = catalog.upsert(&upsert("alice", "Mug", "v2", "12"))?;
        assert_eq!(status, UpsertStatus::Updated);
        assert_eq!(first.id, second.id);

        let products = catalog.list_products()?;
        assert_eq!(products.len(), 1);
        assert_eq!(products[0].details, "v2");
        assert_eq!(products[0].price, "12");
        Ok(())
    }

    #[test]
    fn owners_are_case_sensitive_and_created_lazily() -> anyhow::Result<()> {
        let catalog = Catalog::open_in_memory()?;
        catalog.upsert(&upsert("alice", "Mug", "a", "1"))?;
        catalog.upsert(&upsert("Alice", "Mug", "b", "2"))?;
        assert_eq!(catalog.list_products()?.len(), 2);
        let alice = catalog.user("alice")?.expect("alice exists");
        assert!(!alice.is_admin);
        assert!(catalog.authenticate("alice", "")?.is_none());
        Ok(())
    }

    #[test]
    fn image_only_replaced_when_supplied() -> anyhow::Result<()> {
        let catalog = Catalog::open_in_memory()?;
        let mut first = upsert("bob", "Scarf", "wool", "30");
        first.image_path = Some("/static/uploads/scarf.png");
        catalog.upsert(&first)?;
        let (record, _) = catalog.upsert(&upsert("bob", "Scarf", "merino", "35"))?;
        assert_eq!(record.image_path.as_deref(), Some("/static/uploads/scarf.png"));
        assert_eq!(record.owner, "bob");
        Ok(())
    }

    #[test]
    fn blank_owner_or_name_is_rejected() -> anyhow::Result<()> {
        let catalog = Catalog::open_in_memory()?;
        assert!(matches!(
            catalog.upsert(&upsert("  ", "Mug", "d", "1")),
            Err(PromoError::MissingField(_))
        ));
        assert!(matches!(
            catalog.upsert(&upsert("alice", "", "d", "1")),
            Err(PromoError::MissingField(_))
        ));
        Ok(())
    }

    #[test]
    fn browsing_orders_newest_first_and_searches_case_insensitively() -> anyhow::Result<()> {
        let catalog = Catalog::open_in_memory()?;
        catalog.upsert(&upsert("alice", "Blue Mug", "glazed", "10"))?;
        catalog.upsert(&upsert("bob", "Scarf", "hand-knit 100% wool", "30"))?;
        catalog.upsert(&upsert("carol", "Tea Set", "porcelain", "80"))?;

        let names: Vec<String> = catalog.list_products()?.into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["Tea Set", "Scarf", "Blue Mug"]);

        assert_eq!(catalog.products_for_user("bob")?.len(), 1);
        assert_eq!(catalog.search_products("MUG")?[0].owner, "alice");
        assert_eq!(catalog.search_products("CAROL")?[0].name, "Tea Set");
        assert_eq!(catalog.search_products("100%")?.len(), 1);
        assert!(catalog.search_products("   ")?.is_empty());

        let users: Vec<String> = catalog
            .search_users("o")?
            .into_iter()
            .map(|user| user.username)
            .collect();
        assert_eq!(users, vec!["bob", "carol"]);
        Ok(())
    }

    #[test]
    fn admin_seed_authenticates_with_hashed_password() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let catalog = Catalog::open(temp.path().join("db").join("shop.db"))?;
        let admin = catalog.ensure_admin("admin", "s3cret")?;
        assert!(admin.is_admin);
        assert!(catalog.authenticate("admin", "wrong")?.is_none());
        assert_eq!(catalog.authenticate("admin", "s3cret")?, Some(admin.clone()));

        let stored: String = catalog.conn.query_row(
            "SELECT password_hash FROM users WHERE username = 'admin'",
            [],
            |row| row.get(0),
        )?;
        assert_ne!(stored, "s3cret");
        assert_eq!(stored.len(), 64);

        // Re-seeding is idempotent and rotates the password.
        catalog.ensure_admin("admin", "rotated")?;
        assert!(catalog.authenticate("admin", "s3cret")?.is_none());
        assert!(catalog.authenticate("admin", "rotated")?.is_some());
        Ok(())
    }

    #[test]
    fn only_admins_delete_and_the_image_goes_too() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let image = temp.path().join("mug.png");
        fs::write(&image, b"png")?;
        let image_str = image.to_string_lossy().into_owned();

        let catalog = Catalog::open_in_memory()?;
        let mut product = upsert("alice", "Mug", "d", "1");
        product.image_path = Some(&image_str);
        let (record, _) = catalog.upsert(&product)?;

        let alice = catalog.user("alice")?.expect("alice exists");
        let err = catalog.delete_product(&alice, record.id).unwrap_err();
        assert!(matches!(err, PromoError::Forbidden(_)));
        assert!(image.exists());

        let admin = catalog.ensure_admin("admin", "pw")?;
        let removed = catalog.delete_product(&admin, record.id)?;
        assert_eq!(removed.map(|row| row.id), Some(record.id));
        assert!(catalog.list_products()?.is_empty());
        assert!(!image.exists());
        Ok(())
    }

    #[test]
    fn deleting_an_unknown_id_is_a_lookup_miss() -> anyhow::Result<()> {
        let catalog = Catalog::open_in_memory()?;
        catalog.upsert(&upsert("alice", "Mug", "d", "1"))?;
        let admin = catalog.ensure_admin("admin", "pw")?;

        assert_eq!(catalog.delete_product(&admin, 9_999)?, None);
        assert_eq!(catalog.list_products()?.len(), 1);
        Ok(())
    }

    #[test]
    fn publish_image_copies_into_public_dir() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let source = temp.path().join("gen").join("imagen_1.png");
        fs::create_dir_all(source.parent().expect("parent"))?;
        fs::write(&source, b"png")?;
        let public = temp.path().join("public");

        let dest = publish_image(&source, &public)?;
        assert_eq!(dest.parent(), Some(public.as_path()));
        let name = dest.file_name().and_then(|name| name.to_str()).unwrap_or_default();
        assert!(name.ends_with("_imagen_1.png"), "{name}");
        assert_eq!(fs::read(&dest)?, b"png");
        assert!(source.is_file());
        assert!(matches!(
            publish_image(&temp.path().join("nope.png"), &public),
            Err(PromoError::NotFound(_))
        ));
        Ok(())
    }

    #[test]
    fn same_file_name_from_two_sellers_gets_two_public_files() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let public = temp.path().join("public");
        let alice_src = temp.path().join("alice").join("photo.png");
        let bob_src = temp.path().join("bob").join("photo.png");
        for (path, body) in [(&alice_src, b"ALICE-MUG"), (&bob_src, b"BOB-SCARF")] {
            fs::create_dir_all(path.parent().expect("parent"))?;
            fs::write(path, body)?;
        }

        let alice = publish_image(&alice_src, &public)?;
        let bob = publish_image(&bob_src, &public)?;
        assert_ne!(alice, bob);
        assert_eq!(fs::read(&alice)?, b"ALICE-MUG");
        assert_eq!(fs::read(&bob)?, b"BOB-SCARF");
        Ok(())
    }
}
