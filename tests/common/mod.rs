//! Shared fixtures for the integration suite: a small blog schema (users
//! and posts) with hand-written schema bindings, seed helpers, and a
//! connection wrapper that counts statements so tests can assert how many
//! round trips an operation makes.

#![allow(dead_code)]

use std::cell::Cell;
use std::sync::Arc;

use gantry::{
    Connection, DriverError, ExecResult, FromRow, GantryError, Relation, Repository, Row, Schema,
    SchemaRegistry, Session, SqliteConnection, SqliteDialect, Value,
};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub age: i64,
    pub status: String,
    pub posts: Vec<Post>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Post {
    pub id: i64,
    pub user_id: Option<i64>,
    pub title: String,
}

pub struct UserSchema;

impl Schema<User> for UserSchema {
    fn table(&self) -> &str {
        "users"
    }

    fn columns(&self) -> &[&str] {
        &["id", "name", "email", "age", "status"]
    }

    fn insert_row(&self, user: &User) -> (Vec<&str>, Vec<Value>) {
        let mut columns = vec!["name", "email", "age", "status"];
        let mut values = vec![
            user.name.clone().into(),
            user.email.clone().into(),
            user.age.into(),
            user.status.clone().into(),
        ];
        if user.id != 0 {
            columns.insert(0, "id");
            values.insert(0, user.id.into());
        }
        (columns, values)
    }

    fn update_map(&self, user: &User) -> Vec<(&str, Value)> {
        vec![
            ("name", user.name.clone().into()),
            ("email", user.email.clone().into()),
            ("age", user.age.into()),
            ("status", user.status.clone().into()),
        ]
    }

    fn primary_key(&self, user: &User) -> (&str, Value) {
        ("id", user.id.into())
    }

    fn pk_column(&self) -> &str {
        "id"
    }

    fn set_primary_key(&self, user: &mut User, id: i64) {
        user.id = id;
    }

    fn auto_increment(&self) -> bool {
        true
    }
}

impl FromRow for User {
    fn from_row(row: &Row) -> Result<Self, GantryError> {
        Ok(User {
            id: row.try_get_by_name("id")?,
            name: row.try_get_by_name("name")?,
            email: row.try_get_by_name("email")?,
            age: row.try_get_by_name("age")?,
            status: row.try_get_by_name("status")?,
            posts: Vec::new(),
        })
    }
}

pub struct PostSchema;

impl Schema<Post> for PostSchema {
    fn table(&self) -> &str {
        "posts"
    }

    fn columns(&self) -> &[&str] {
        &["id", "user_id", "title"]
    }

    fn insert_row(&self, post: &Post) -> (Vec<&str>, Vec<Value>) {
        let mut columns = vec!["user_id", "title"];
        let mut values = vec![post.user_id.into(), post.title.clone().into()];
        if post.id != 0 {
            columns.insert(0, "id");
            values.insert(0, post.id.into());
        }
        (columns, values)
    }

    fn update_map(&self, post: &Post) -> Vec<(&str, Value)> {
        vec![
            ("user_id", post.user_id.into()),
            ("title", post.title.clone().into()),
        ]
    }

    fn primary_key(&self, post: &Post) -> (&str, Value) {
        ("id", post.id.into())
    }

    fn pk_column(&self) -> &str {
        "id"
    }

    fn set_primary_key(&self, post: &mut Post, id: i64) {
        post.id = id;
    }

    fn auto_increment(&self) -> bool {
        true
    }
}

impl FromRow for Post {
    fn from_row(row: &Row) -> Result<Self, GantryError> {
        Ok(Post {
            id: row.try_get_by_name("id")?,
            user_id: row.try_get_by_name("user_id")?,
            title: row.try_get_by_name("title")?,
        })
    }
}

/// The has-many relation from users to posts over posts.user_id.
pub fn user_posts() -> Relation<User, Post> {
    Relation::has_many(
        "user_id",
        "id",
        |user: &User| user.id.into(),
        |post: &Post| post.user_id.into(),
        |user, posts| user.posts = posts,
    )
}

pub const BLOG_DDL: &[&str] = &[
    "CREATE TABLE users (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL, \
     email TEXT NOT NULL, age INTEGER NOT NULL, status TEXT NOT NULL DEFAULT 'active')",
    "CREATE TABLE posts (id INTEGER PRIMARY KEY AUTOINCREMENT, user_id INTEGER, \
     title TEXT NOT NULL)",
];

/// In-memory session with the blog tables created.
pub fn blog_session() -> Session {
    let session = SqliteConnection::open_in_memory()
        .expect("Failed to open in-memory database")
        .into_session();
    for ddl in BLOG_DDL {
        session.execute(ddl, &[]).expect("Failed to create schema");
    }
    session
}

pub fn blog_registry() -> Arc<SchemaRegistry> {
    let mut registry = SchemaRegistry::new();
    registry.register(UserSchema);
    registry.register(PostSchema);
    Arc::new(registry)
}

pub fn user(name: &str, email: &str, age: i64) -> User {
    User {
        name: name.to_string(),
        email: email.to_string(),
        age,
        status: "active".to_string(),
        ..User::default()
    }
}

pub fn post(user_id: Option<i64>, title: &str) -> Post {
    Post {
        id: 0,
        user_id,
        title: title.to_string(),
    }
}

/// Seed the standard trio and return them with assigned ids.
pub fn seed_blog_users(users: &Repository<User>) -> Vec<User> {
    let mut rows = vec![
        user("alice", "alice@example.com", 34),
        user("bob", "bob@example.com", 17),
        user("charlie", "charlie@example.com", 28),
    ];
    for row in rows.iter_mut() {
        users.create(row).expect("Failed to seed user");
    }
    rows
}

/// Counts statements passing through an inner connection.
pub struct CountingConnection {
    inner: SqliteConnection,
    queries: Cell<u64>,
    executes: Cell<u64>,
}

impl CountingConnection {
    pub fn new(inner: SqliteConnection) -> Self {
        Self {
            inner,
            queries: Cell::new(0),
            executes: Cell::new(0),
        }
    }

    pub fn queries(&self) -> u64 {
        self.queries.get()
    }

    pub fn executes(&self) -> u64 {
        self.executes.get()
    }

    pub fn reset(&self) {
        self.queries.set(0);
        self.executes.set(0);
    }
}

impl Connection for CountingConnection {
    fn execute(&self, sql: &str, args: &[Value]) -> Result<ExecResult, DriverError> {
        self.executes.set(self.executes.get() + 1);
        self.inner.execute(sql, args)
    }

    fn query(&self, sql: &str, args: &[Value]) -> Result<Vec<Row>, DriverError> {
        self.queries.set(self.queries.get() + 1);
        self.inner.query(sql, args)
    }
}

/// A blog session whose statement counts are observable through the
/// returned handle.
pub fn counting_blog_session() -> (Session, Arc<CountingConnection>) {
    let inner = SqliteConnection::open_in_memory().expect("Failed to open in-memory database");
    let counting = Arc::new(CountingConnection::new(inner));
    let session = Session::new(
        Arc::clone(&counting) as Arc<dyn Connection>,
        Arc::new(SqliteDialect),
    );
    for ddl in BLOG_DDL {
        session.execute(ddl, &[]).expect("Failed to create schema");
    }
    counting.reset();
    (session, counting)
}
