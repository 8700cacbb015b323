//! Cloud SQL (MySQL) book storage.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sqlx::{
    Connection, MySqlConnection,
    mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions},
};

use crate::application::repos::{BackendKind, BookDatabase, RepoError};
use crate::config::MySqlSettings;
use crate::domain::books::{Book, BookId};

/// Directory App Engine mounts Cloud SQL unix sockets under.
pub const CLOUD_SQL_SOCKET_DIR: &str = "/cloudsql";

const BOOK_COLUMNS: &str =
    "id, title, author, published_date, image_url, description, created_by, created_by_id";

/// Where the MySQL server is reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MySqlTarget {
    UnixSocket(PathBuf),
    Tcp { host: String, port: u16 },
}

impl MySqlTarget {
    /// Production connects through the Cloud SQL socket; locally the instance name is ignored.
    pub fn resolve(settings: &MySqlSettings, production: bool) -> Self {
        if production {
            Self::UnixSocket(Path::new(CLOUD_SQL_SOCKET_DIR).join(&settings.instance))
        } else {
            Self::Tcp {
                host: settings.host.clone(),
                port: settings.port,
            }
        }
    }
}

pub fn connect_options(settings: &MySqlSettings, target: &MySqlTarget) -> MySqlConnectOptions {
    let options = MySqlConnectOptions::new()
        .username(&settings.username)
        .password(settings.password.expose());

    match target {
        MySqlTarget::UnixSocket(path) => options.socket(path),
        MySqlTarget::Tcp { host, port } => options.host(host).port(*port),
    }
}

#[derive(sqlx::FromRow)]
struct BookRow {
    id: i64,
    title: String,
    author: String,
    published_date: String,
    image_url: String,
    description: String,
    created_by: String,
    created_by_id: String,
}

impl From<BookRow> for Book {
    fn from(row: BookRow) -> Self {
        Self {
            id: row.id,
            title: row.title,
            author: row.author,
            published_date: row.published_date,
            image_url: row.image_url,
            description: row.description,
            created_by: row.created_by,
            created_by_id: row.created_by_id,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MySqlBookDatabase {
    pool: MySqlPool,
}

impl MySqlBookDatabase {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }

    /// Connect, create the schema if it is missing, and apply the table migrations.
    pub async fn connect(
        settings: &MySqlSettings,
        target: &MySqlTarget,
    ) -> Result<Self, sqlx::Error> {
        let server = connect_options(settings, target);

        let mut conn = MySqlConnection::connect_with(&server).await?;
        let create_schema = format!(
            "CREATE DATABASE IF NOT EXISTS `{}` DEFAULT CHARACTER SET = 'utf8mb4'",
            settings.database
        );
        sqlx::query(&create_schema).execute(&mut conn).await?;
        conn.close().await?;

        let pool = MySqlPoolOptions::new()
            .max_connections(settings.max_connections.get())
            .connect_with(server.database(&settings.database))
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self::new(pool))
    }

    async fn exists(&self, id: BookId) -> Result<bool, RepoError> {
        let found: Option<(i64,)> = sqlx::query_as("SELECT id FROM books WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(found.is_some())
    }
}

pub fn map_sqlx_error(err: sqlx::Error) -> RepoError {
    match err {
        sqlx::Error::PoolTimedOut => RepoError::Timeout,
        // SQLSTATE 22001: data too long for column.
        sqlx::Error::Database(db) if db.code().as_deref() == Some("22001") => {
            RepoError::InvalidInput {
                message: db.message().to_string(),
            }
        }
        other => RepoError::from_persistence(other),
    }
}

#[async_trait]
impl BookDatabase for MySqlBookDatabase {
    async fn list_books(&self) -> Result<Vec<Book>, RepoError> {
        let statement = format!("SELECT {BOOK_COLUMNS} FROM books ORDER BY title, id");
        let rows: Vec<BookRow> = sqlx::query_as(&statement)
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(Book::from).collect())
    }

    async fn list_books_created_by(&self, user_id: &str) -> Result<Vec<Book>, RepoError> {
        let statement = format!(
            "SELECT {BOOK_COLUMNS} FROM books WHERE created_by_id = ? ORDER BY title, id"
        );
        let rows: Vec<BookRow> = sqlx::query_as(&statement)
            .bind(user_id)
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(Book::from).collect())
    }

    async fn get_book(&self, id: BookId) -> Result<Book, RepoError> {
        let statement = format!("SELECT {BOOK_COLUMNS} FROM books WHERE id = ?");
        let row: Option<BookRow> = sqlx::query_as(&statement)
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        row.map(Book::from).ok_or_else(|| RepoError::not_found(id))
    }

    async fn add_book(&self, book: &Book) -> Result<BookId, RepoError> {
        book.validate()?;

        let result = sqlx::query(
            r#"
            INSERT INTO books
                (title, author, published_date, image_url, description, created_by, created_by_id)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&book.title)
        .bind(&book.author)
        .bind(&book.published_date)
        .bind(&book.image_url)
        .bind(&book.description)
        .bind(&book.created_by)
        .bind(&book.created_by_id)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        BookId::try_from(result.last_insert_id())
            .map_err(|_| RepoError::from_persistence("inserted id exceeds supported range"))
    }

    async fn update_book(&self, book: &Book) -> Result<(), RepoError> {
        book.validate()?;

        let result = sqlx::query(
            r#"
            UPDATE books
            SET title = ?, author = ?, published_date = ?, image_url = ?,
                description = ?, created_by = ?, created_by_id = ?
            WHERE id = ?
            "#,
        )
        .bind(&book.title)
        .bind(&book.author)
        .bind(&book.published_date)
        .bind(&book.image_url)
        .bind(&book.description)
        .bind(&book.created_by)
        .bind(&book.created_by_id)
        .bind(book.id)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        // MySQL reports zero affected rows for no-op updates as well as for missing ids.
        if result.rows_affected() == 0 && !self.exists(book.id).await? {
            return Err(RepoError::not_found(book.id));
        }
        Ok(())
    }

    async fn delete_book(&self, id: BookId) -> Result<(), RepoError> {
        let result = sqlx::query("DELETE FROM books WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(RepoError::not_found(id));
        }
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }

    fn backend(&self) -> BackendKind {
        BackendKind::MySql
    }
}
