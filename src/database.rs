use anyhow::{bail, Result};
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use sqlx::{sqlite::SqlitePool, Row};

use crate::models::{Comment, Follow, Group, Page, Post, User};

/// Group slugs are URL-safe identifiers.
static SLUG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[-a-zA-Z0-9_]+$").unwrap());

/// Fixed listing page size.
pub const PAGE_SIZE: i64 = 10;

const POST_COLUMNS: &str = "p.id, p.text, p.pub_date, p.author_id, u.username AS author_username, \
     p.group_id, g.title AS group_title, g.slug AS group_slug, p.image";

const POST_JOINS: &str = "FROM posts p \
     JOIN users u ON u.id = p.author_id \
     LEFT JOIN groups g ON g.id = p.group_id";

// Async database layer over a SQLx connection pool
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePool::connect(database_url).await?;
        Ok(Database { pool })
    }

    pub async fn init(&self) -> Result<()> {
        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY,
                username TEXT NOT NULL UNIQUE,
                email TEXT NOT NULL,
                password_hash TEXT NOT NULL,
                joined INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS groups (
                id INTEGER PRIMARY KEY,
                title TEXT NOT NULL,
                slug TEXT NOT NULL UNIQUE,
                description TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS posts (
                id INTEGER PRIMARY KEY,
                text TEXT NOT NULL,
                pub_date INTEGER NOT NULL,
                author_id INTEGER NOT NULL REFERENCES users(id),
                group_id INTEGER REFERENCES groups(id) ON DELETE SET NULL,
                image TEXT
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS comments (
                id INTEGER PRIMARY KEY,
                post_id INTEGER NOT NULL REFERENCES posts(id),
                author_id INTEGER NOT NULL REFERENCES users(id),
                text TEXT NOT NULL,
                created INTEGER NOT NULL,
                active INTEGER NOT NULL DEFAULT 1
            )",
        )
        .execute(&self.pool)
        .await?;

        // Uniqueness of (user_id, author_id) is a handler-level pre-check,
        // not a constraint here.
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS follows (
                id INTEGER PRIMARY KEY,
                user_id INTEGER NOT NULL REFERENCES users(id),
                author_id INTEGER NOT NULL REFERENCES users(id)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS sessions (
                token TEXT PRIMARY KEY,
                user_id INTEGER NOT NULL REFERENCES users(id),
                created INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_posts_pub_date ON posts(pub_date)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_posts_author ON posts(author_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_posts_group ON posts(group_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_comments_post ON comments(post_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_follows_user ON follows(user_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_follows_author ON follows(author_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // --- users ---

    pub async fn create_user(
        &self,
        username: &str,
        email: &str,
        password_hash: &str,
    ) -> Result<User> {
        let now = Utc::now().timestamp_millis();
        let result =
            sqlx::query("INSERT INTO users (username, email, password_hash, joined) VALUES (?, ?, ?, ?)")
                .bind(username)
                .bind(email)
                .bind(password_hash)
                .bind(now)
                .execute(&self.pool)
                .await?;

        Ok(User {
            id: result.last_insert_rowid(),
            username: username.to_string(),
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            joined: now,
        })
    }

    pub async fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let row = sqlx::query(
            "SELECT id, username, email, password_hash, joined FROM users WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| User {
            id: row.get("id"),
            username: row.get("username"),
            email: row.get("email"),
            password_hash: row.get("password_hash"),
            joined: row.get("joined"),
        }))
    }

    // --- sessions ---

    pub async fn create_session(&self, token: &str, user_id: i64) -> Result<()> {
        sqlx::query("INSERT INTO sessions (token, user_id, created) VALUES (?, ?, ?)")
            .bind(token)
            .bind(user_id)
            .bind(Utc::now().timestamp_millis())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_session_user(&self, token: &str) -> Result<Option<User>> {
        let row = sqlx::query(
            "SELECT u.id, u.username, u.email, u.password_hash, u.joined
             FROM sessions s JOIN users u ON u.id = s.user_id
             WHERE s.token = ?",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| User {
            id: row.get("id"),
            username: row.get("username"),
            email: row.get("email"),
            password_hash: row.get("password_hash"),
            joined: row.get("joined"),
        }))
    }

    pub async fn delete_session(&self, token: &str) -> Result<()> {
        sqlx::query("DELETE FROM sessions WHERE token = ?")
            .bind(token)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // --- groups ---

    pub async fn create_group(&self, title: &str, slug: &str, description: &str) -> Result<Group> {
        if !SLUG_RE.is_match(slug) {
            bail!("invalid group slug: {:?}", slug);
        }
        let result = sqlx::query("INSERT INTO groups (title, slug, description) VALUES (?, ?, ?)")
            .bind(title)
            .bind(slug)
            .bind(description)
            .execute(&self.pool)
            .await?;

        Ok(Group {
            id: result.last_insert_rowid(),
            title: title.to_string(),
            slug: slug.to_string(),
            description: description.to_string(),
        })
    }

    pub async fn get_group_by_slug(&self, slug: &str) -> Result<Option<Group>> {
        let row = sqlx::query("SELECT id, title, slug, description FROM groups WHERE slug = ?")
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(group_from_row))
    }

    pub async fn get_group(&self, id: i64) -> Result<Option<Group>> {
        let row = sqlx::query("SELECT id, title, slug, description FROM groups WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(group_from_row))
    }

    pub async fn all_groups(&self) -> Result<Vec<Group>> {
        let rows = sqlx::query("SELECT id, title, slug, description FROM groups ORDER BY title")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(group_from_row).collect())
    }

    // --- posts ---

    pub async fn create_post(
        &self,
        author_id: i64,
        text: &str,
        group_id: Option<i64>,
        image: Option<&str>,
    ) -> Result<i64> {
        let now = Utc::now().timestamp_millis();
        let result = sqlx::query(
            "INSERT INTO posts (text, pub_date, author_id, group_id, image) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(text)
        .bind(now)
        .bind(author_id)
        .bind(group_id)
        .bind(image)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Updates text and group in place; the image is replaced only when a new
    /// upload is provided. Identity and author never change.
    pub async fn update_post(
        &self,
        post_id: i64,
        text: &str,
        group_id: Option<i64>,
        image: Option<&str>,
    ) -> Result<()> {
        match image {
            Some(image) => {
                sqlx::query("UPDATE posts SET text = ?, group_id = ?, image = ? WHERE id = ?")
                    .bind(text)
                    .bind(group_id)
                    .bind(image)
                    .bind(post_id)
                    .execute(&self.pool)
                    .await?;
            }
            None => {
                sqlx::query("UPDATE posts SET text = ?, group_id = ? WHERE id = ?")
                    .bind(text)
                    .bind(group_id)
                    .bind(post_id)
                    .execute(&self.pool)
                    .await?;
            }
        }
        Ok(())
    }

    /// Looks a post up by id together with its author's username; a
    /// mismatched pairing yields None.
    pub async fn get_post(&self, author_username: &str, post_id: i64) -> Result<Option<Post>> {
        let sql = format!(
            "SELECT {POST_COLUMNS} {POST_JOINS} WHERE p.id = ? AND u.username = ?"
        );
        let row = sqlx::query(&sql)
            .bind(post_id)
            .bind(author_username)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(post_from_row))
    }

    pub async fn posts_page(&self, page: u32) -> Result<Page<Post>> {
        let total: i64 = sqlx::query("SELECT COUNT(*) AS n FROM posts")
            .fetch_one(&self.pool)
            .await?
            .get("n");
        let (number, offset, total_pages) = page_window(page, total);

        let sql = format!(
            "SELECT {POST_COLUMNS} {POST_JOINS} ORDER BY p.pub_date DESC, p.id DESC LIMIT ? OFFSET ?"
        );
        let rows = sqlx::query(&sql)
            .bind(PAGE_SIZE)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        Ok(Page {
            items: rows.into_iter().map(post_from_row).collect(),
            number,
            total_pages,
            total_count: total,
        })
    }

    pub async fn group_posts_page(&self, group_id: i64, page: u32) -> Result<Page<Post>> {
        let total: i64 = sqlx::query("SELECT COUNT(*) AS n FROM posts WHERE group_id = ?")
            .bind(group_id)
            .fetch_one(&self.pool)
            .await?
            .get("n");
        let (number, offset, total_pages) = page_window(page, total);

        let sql = format!(
            "SELECT {POST_COLUMNS} {POST_JOINS} WHERE p.group_id = ? \
             ORDER BY p.pub_date DESC, p.id DESC LIMIT ? OFFSET ?"
        );
        let rows = sqlx::query(&sql)
            .bind(group_id)
            .bind(PAGE_SIZE)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        Ok(Page {
            items: rows.into_iter().map(post_from_row).collect(),
            number,
            total_pages,
            total_count: total,
        })
    }

    pub async fn author_posts_page(&self, author_id: i64, page: u32) -> Result<Page<Post>> {
        let total: i64 = sqlx::query("SELECT COUNT(*) AS n FROM posts WHERE author_id = ?")
            .bind(author_id)
            .fetch_one(&self.pool)
            .await?
            .get("n");
        let (number, offset, total_pages) = page_window(page, total);

        let sql = format!(
            "SELECT {POST_COLUMNS} {POST_JOINS} WHERE p.author_id = ? \
             ORDER BY p.pub_date DESC, p.id DESC LIMIT ? OFFSET ?"
        );
        let rows = sqlx::query(&sql)
            .bind(author_id)
            .bind(PAGE_SIZE)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        Ok(Page {
            items: rows.into_iter().map(post_from_row).collect(),
            number,
            total_pages,
            total_count: total,
        })
    }

    /// Posts by authors the given user follows, newest first.
    pub async fn feed_page(&self, user_id: i64, page: u32) -> Result<Page<Post>> {
        let total: i64 = sqlx::query(
            "SELECT COUNT(*) AS n FROM posts \
             WHERE author_id IN (SELECT author_id FROM follows WHERE user_id = ?)",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?
        .get("n");
        let (number, offset, total_pages) = page_window(page, total);

        let sql = format!(
            "SELECT {POST_COLUMNS} {POST_JOINS} \
             WHERE p.author_id IN (SELECT author_id FROM follows WHERE user_id = ?) \
             ORDER BY p.pub_date DESC, p.id DESC LIMIT ? OFFSET ?"
        );
        let rows = sqlx::query(&sql)
            .bind(user_id)
            .bind(PAGE_SIZE)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        Ok(Page {
            items: rows.into_iter().map(post_from_row).collect(),
            number,
            total_pages,
            total_count: total,
        })
    }

    pub async fn author_post_count(&self, author_id: i64) -> Result<i64> {
        let n: i64 = sqlx::query("SELECT COUNT(*) AS n FROM posts WHERE author_id = ?")
            .bind(author_id)
            .fetch_one(&self.pool)
            .await?
            .get("n");
        Ok(n)
    }

    pub async fn post_count(&self) -> Result<i64> {
        let n: i64 = sqlx::query("SELECT COUNT(*) AS n FROM posts")
            .fetch_one(&self.pool)
            .await?
            .get("n");
        Ok(n)
    }

    // --- comments ---

    pub async fn create_comment(&self, post_id: i64, author_id: i64, text: &str) -> Result<i64> {
        let now = Utc::now().timestamp_millis();
        let result = sqlx::query(
            "INSERT INTO comments (post_id, author_id, text, created, active) VALUES (?, ?, ?, ?, 1)",
        )
        .bind(post_id)
        .bind(author_id)
        .bind(text)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Insertion order, nothing fancier.
    pub async fn comments_for_post(&self, post_id: i64) -> Result<Vec<Comment>> {
        let rows = sqlx::query(
            "SELECT c.id, c.post_id, c.author_id, u.username AS author_username,
                    c.text, c.created, c.active
             FROM comments c JOIN users u ON u.id = c.author_id
             WHERE c.post_id = ?
             ORDER BY c.id",
        )
        .bind(post_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(comment_from_row).collect())
    }

    pub async fn comment_count(&self, post_id: i64) -> Result<i64> {
        let n: i64 = sqlx::query("SELECT COUNT(*) AS n FROM comments WHERE post_id = ?")
            .bind(post_id)
            .fetch_one(&self.pool)
            .await?
            .get("n");
        Ok(n)
    }

    // --- follow edges ---

    pub async fn get_follow(&self, user_id: i64, author_id: i64) -> Result<Option<Follow>> {
        let row = sqlx::query("SELECT id, user_id, author_id FROM follows WHERE user_id = ? AND author_id = ?")
            .bind(user_id)
            .bind(author_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| Follow {
            id: row.get("id"),
            user_id: row.get("user_id"),
            author_id: row.get("author_id"),
        }))
    }

    pub async fn follow_exists(&self, user_id: i64, author_id: i64) -> Result<bool> {
        Ok(self.get_follow(user_id, author_id).await?.is_some())
    }

    pub async fn create_follow(&self, user_id: i64, author_id: i64) -> Result<()> {
        sqlx::query("INSERT INTO follows (user_id, author_id) VALUES (?, ?)")
            .bind(user_id)
            .bind(author_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete_follow(&self, user_id: i64, author_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM follows WHERE user_id = ? AND author_id = ?")
            .bind(user_id)
            .bind(author_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn followers_count(&self, author_id: i64) -> Result<i64> {
        let n: i64 = sqlx::query("SELECT COUNT(*) AS n FROM follows WHERE author_id = ?")
            .bind(author_id)
            .fetch_one(&self.pool)
            .await?
            .get("n");
        Ok(n)
    }

    pub async fn following_count(&self, user_id: i64) -> Result<i64> {
        let n: i64 = sqlx::query("SELECT COUNT(*) AS n FROM follows WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?
            .get("n");
        Ok(n)
    }

    // --- admin listings ---

    pub async fn search_posts(&self, needle: Option<&str>, limit: i64) -> Result<Vec<Post>> {
        let sql = format!(
            "SELECT {POST_COLUMNS} {POST_JOINS} WHERE (? IS NULL OR p.text LIKE ?) \
             ORDER BY p.id DESC LIMIT ?"
        );
        let pattern = needle.map(|n| format!("%{}%", n));
        let rows = sqlx::query(&sql)
            .bind(&pattern)
            .bind(&pattern)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(post_from_row).collect())
    }

    pub async fn search_comments(&self, needle: Option<&str>, limit: i64) -> Result<Vec<Comment>> {
        let pattern = needle.map(|n| format!("%{}%", n));
        let rows = sqlx::query(
            "SELECT c.id, c.post_id, c.author_id, u.username AS author_username,
                    c.text, c.created, c.active
             FROM comments c JOIN users u ON u.id = c.author_id
             WHERE (? IS NULL OR c.text LIKE ? OR u.username LIKE ?)
             ORDER BY c.id DESC LIMIT ?",
        )
        .bind(&pattern)
        .bind(&pattern)
        .bind(&pattern)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(comment_from_row).collect())
    }
}

/// Paginator window: clamps the requested page into range the way a
/// `get_page` style paginator does (bad or low input means page 1, past the
/// end means the last page) and returns (page number, offset, total pages).
fn page_window(page: u32, total: i64) -> (u32, i64, u32) {
    let total_pages = ((total + PAGE_SIZE - 1) / PAGE_SIZE).max(1) as u32;
    let number = page.clamp(1, total_pages);
    let offset = (number as i64 - 1) * PAGE_SIZE;
    (number, offset, total_pages)
}

fn group_from_row(row: sqlx::sqlite::SqliteRow) -> Group {
    Group {
        id: row.get("id"),
        title: row.get("title"),
        slug: row.get("slug"),
        description: row.get("description"),
    }
}

fn post_from_row(row: sqlx::sqlite::SqliteRow) -> Post {
    Post {
        id: row.get("id"),
        text: row.get("text"),
        pub_date: row.get("pub_date"),
        author_id: row.get("author_id"),
        author_username: row.get("author_username"),
        group_id: row.get("group_id"),
        group_title: row.get("group_title"),
        group_slug: row.get("group_slug"),
        image: row.get("image"),
    }
}

fn comment_from_row(row: sqlx::sqlite::SqliteRow) -> Comment {
    Comment {
        id: row.get("id"),
        post_id: row.get("post_id"),
        author_id: row.get("author_id"),
        author_username: row.get("author_username"),
        text: row.get("text"),
        created: row.get("created"),
        active: row.get::<i64, _>("active") != 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_window_clamps_into_range() {
        // 25 posts -> 3 pages
        assert_eq!(page_window(0, 25), (1, 0, 3));
        assert_eq!(page_window(1, 25), (1, 0, 3));
        assert_eq!(page_window(2, 25), (2, 10, 3));
        assert_eq!(page_window(99, 25), (3, 20, 3));
    }

    #[test]
    fn page_window_empty_listing_is_one_page() {
        assert_eq!(page_window(1, 0), (1, 0, 1));
        assert_eq!(page_window(7, 0), (1, 0, 1));
    }

    #[test]
    fn slug_shape() {
        assert!(SLUG_RE.is_match("test-group_1"));
        assert!(!SLUG_RE.is_match("not a slug"));
        assert!(!SLUG_RE.is_match("bad/slug"));
        assert!(!SLUG_RE.is_match(""));
    }
}
