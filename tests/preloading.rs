//! Batched relation preloading: grouping by key, query counts, and the
//! key shapes (integer and string) that grouping normalizes over.

mod common;

use std::collections::HashMap;
use std::sync::Arc;

use common::{
    blog_registry, blog_session, counting_blog_session, post, seed_blog_users, user_posts, Post,
    User,
};
use gantry::relation::load_related;
use gantry::{
    col, FromRow, GantryError, Query, Relation, Repository, Row, Schema, SchemaRegistry, Session,
    SqliteConnection, Value,
};
use rand::seq::SliceRandom;
use rand::Rng;

fn seed_posts(session: &Session, registry: &Arc<SchemaRegistry>, users: &[User]) {
    let posts = Repository::<Post>::new(session, registry).expect("Failed to build repository");
    let mut rows = vec![
        post(Some(users[0].id), "intro"),
        post(Some(users[0].id), "rust tips"),
        post(Some(users[2].id), "hello"),
        post(None, "orphan"),
    ];
    for row in rows.iter_mut() {
        posts.create(row).expect("Failed to seed post");
    }
}

#[test]
fn test_preload_groups_children_by_parent() {
    let session = blog_session();
    let registry = blog_registry();
    let users = Repository::<User>::new(&session, &registry).expect("Failed to build repository");
    let seeded = seed_blog_users(&users);
    seed_posts(&session, &registry, &seeded);

    let loaded = Query::<User>::new(&session, &registry)
        .expect("Failed to build query")
        .preload(user_posts())
        .asc("name")
        .all()
        .expect("Failed to preload");

    let titles: Vec<Vec<&str>> = loaded
        .iter()
        .map(|u| u.posts.iter().map(|p| p.title.as_str()).collect())
        .collect();
    assert_eq!(
        titles,
        vec![vec!["intro", "rust tips"], Vec::<&str>::new(), vec!["hello"]]
    );

    // The orphan post, with its null foreign key, landed nowhere
    let attached: usize = loaded.iter().map(|u| u.posts.len()).sum();
    assert_eq!(attached, 3);
}

#[test]
fn test_preload_issues_exactly_two_queries() {
    let (session, conn) = counting_blog_session();
    let registry = blog_registry();
    let users = Repository::<User>::new(&session, &registry).expect("Failed to build repository");
    let seeded = seed_blog_users(&users);
    seed_posts(&session, &registry, &seeded);
    conn.reset();

    let loaded = Query::<User>::new(&session, &registry)
        .expect("Failed to build query")
        .preload(user_posts())
        .all()
        .expect("Failed to preload");

    assert_eq!(loaded.len(), 3);
    assert_eq!(conn.queries(), 2);
}

#[test]
fn test_preload_skips_child_query_without_parents() {
    let (session, conn) = counting_blog_session();
    let registry = blog_registry();
    let users = Repository::<User>::new(&session, &registry).expect("Failed to build repository");
    let seeded = seed_blog_users(&users);
    seed_posts(&session, &registry, &seeded);
    conn.reset();

    let loaded = Query::<User>::new(&session, &registry)
        .expect("Failed to build query")
        .filter(col("age").gt(100))
        .preload(user_posts())
        .all()
        .expect("Failed to preload");

    assert!(loaded.is_empty());
    assert_eq!(conn.queries(), 1);
}

#[test]
fn test_load_related_on_already_fetched_parents() {
    let session = blog_session();
    let registry = blog_registry();
    let users = Repository::<User>::new(&session, &registry).expect("Failed to build repository");
    let seeded = seed_blog_users(&users);
    seed_posts(&session, &registry, &seeded);

    let mut parents = users.query().asc("id").all().expect("Failed to query");
    assert!(parents.iter().all(|u| u.posts.is_empty()));

    load_related(&session, &registry, &user_posts(), &mut parents)
        .expect("Failed to load relation");
    assert_eq!(parents[0].posts.len(), 2);
    assert_eq!(parents[1].posts.len(), 0);
    assert_eq!(parents[2].posts.len(), 1);
}

#[test]
fn test_preload_with_randomized_integer_keys() {
    let session = blog_session();
    let registry = blog_registry();
    let users = Repository::<User>::new(&session, &registry).expect("Failed to build repository");
    let posts = Repository::<Post>::new(&session, &registry).expect("Failed to build repository");
    let mut rng = rand::thread_rng();

    // Sparse, shuffled ids so grouping cannot lean on insertion order
    let mut ids: Vec<i64> = (1000..1020).collect();
    ids.shuffle(&mut rng);
    ids.truncate(5);

    for id in &ids {
        let mut record = User {
            id: *id,
            ..common::user(&format!("user-{id}"), &format!("{id}@example.com"), 30)
        };
        users.create(&mut record).expect("Failed to create user");
    }

    let mut pairs: Vec<(i64, String)> = Vec::new();
    for id in &ids {
        for k in 0..rng.gen_range(0..=3) {
            pairs.push((*id, format!("{id}-{k}")));
        }
    }
    pairs.shuffle(&mut rng);

    let mut expected: HashMap<i64, Vec<String>> = HashMap::new();
    for (user_id, title) in &pairs {
        let mut record = post(Some(*user_id), title);
        posts.create(&mut record).expect("Failed to create post");
        expected.entry(*user_id).or_default().push(title.clone());
    }

    let loaded = Query::<User>::new(&session, &registry)
        .expect("Failed to build query")
        .preload(user_posts())
        .all()
        .expect("Failed to preload");

    assert_eq!(loaded.len(), ids.len());
    for parent in &loaded {
        let titles: Vec<String> = parent.posts.iter().map(|p| p.title.clone()).collect();
        let want = expected.get(&parent.id).cloned().unwrap_or_default();
        assert_eq!(titles, want, "wrong posts for user {}", parent.id);
        assert!(parent.posts.iter().all(|p| p.user_id == Some(parent.id)));
    }
}

// A second parent/child pair keyed by TEXT, to cover string grouping.

#[derive(Debug, Clone, Default, PartialEq)]
struct Category {
    code: String,
    name: String,
    items: Vec<Item>,
}

#[derive(Debug, Clone, Default, PartialEq)]
struct Item {
    id: i64,
    category_code: Option<String>,
    label: String,
}

struct CategorySchema;

impl Schema<Category> for CategorySchema {
    fn table(&self) -> &str {
        "categories"
    }

    fn columns(&self) -> &[&str] {
        &["code", "name"]
    }

    fn insert_row(&self, category: &Category) -> (Vec<&str>, Vec<Value>) {
        (
            vec!["code", "name"],
            vec![category.code.clone().into(), category.name.clone().into()],
        )
    }

    fn update_map(&self, category: &Category) -> Vec<(&str, Value)> {
        vec![("name", category.name.clone().into())]
    }

    fn primary_key(&self, category: &Category) -> (&str, Value) {
        ("code", category.code.clone().into())
    }

    fn pk_column(&self) -> &str {
        "code"
    }

    fn set_primary_key(&self, _category: &mut Category, _id: i64) {}

    fn auto_increment(&self) -> bool {
        false
    }
}

impl FromRow for Category {
    fn from_row(row: &Row) -> Result<Self, GantryError> {
        Ok(Category {
            code: row.try_get_by_name("code")?,
            name: row.try_get_by_name("name")?,
            items: Vec::new(),
        })
    }
}

struct ItemSchema;

impl Schema<Item> for ItemSchema {
    fn table(&self) -> &str {
        "items"
    }

    fn columns(&self) -> &[&str] {
        &["id", "category_code", "label"]
    }

    fn insert_row(&self, item: &Item) -> (Vec<&str>, Vec<Value>) {
        (
            vec!["category_code", "label"],
            vec![item.category_code.clone().into(), item.label.clone().into()],
        )
    }

    fn update_map(&self, item: &Item) -> Vec<(&str, Value)> {
        vec![
            ("category_code", item.category_code.clone().into()),
            ("label", item.label.clone().into()),
        ]
    }

    fn primary_key(&self, item: &Item) -> (&str, Value) {
        ("id", item.id.into())
    }

    fn pk_column(&self) -> &str {
        "id"
    }

    fn set_primary_key(&self, item: &mut Item, id: i64) {
        item.id = id;
    }

    fn auto_increment(&self) -> bool {
        true
    }
}

impl FromRow for Item {
    fn from_row(row: &Row) -> Result<Self, GantryError> {
        Ok(Item {
            id: row.try_get_by_name("id")?,
            category_code: row.try_get_by_name("category_code")?,
            label: row.try_get_by_name("label")?,
        })
    }
}

fn category_items() -> Relation<Category, Item> {
    Relation::has_many(
        "category_code",
        "code",
        |category: &Category| category.code.clone().into(),
        |item: &Item| item.category_code.clone().into(),
        |category, items| category.items = items,
    )
}

#[test]
fn test_preload_groups_by_string_key() {
    let session = SqliteConnection::open_in_memory()
        .expect("Failed to open in-memory database")
        .into_session();
    session
        .execute(
            "CREATE TABLE categories (code TEXT PRIMARY KEY, name TEXT NOT NULL)",
            &[],
        )
        .expect("Failed to create categories");
    session
        .execute(
            "CREATE TABLE items (id INTEGER PRIMARY KEY AUTOINCREMENT, \
             category_code TEXT, label TEXT NOT NULL)",
            &[],
        )
        .expect("Failed to create items");

    let mut registry = SchemaRegistry::new();
    registry.register(CategorySchema);
    registry.register(ItemSchema);
    let registry = Arc::new(registry);

    let categories =
        Repository::<Category>::new(&session, &registry).expect("Failed to build repository");
    let items = Repository::<Item>::new(&session, &registry).expect("Failed to build repository");

    for (code, name) in [("fruit", "Fruit"), ("tools", "Tools"), ("empty", "Empty")] {
        let mut record = Category {
            code: code.to_string(),
            name: name.to_string(),
            items: Vec::new(),
        };
        categories.create(&mut record).expect("Failed to create category");
    }
    for (code, label) in [
        (Some("fruit"), "apple"),
        (Some("fruit"), "pear"),
        (Some("tools"), "hammer"),
        (None, "mystery"),
    ] {
        let mut record = Item {
            id: 0,
            category_code: code.map(str::to_string),
            label: label.to_string(),
        };
        items.create(&mut record).expect("Failed to create item");
    }

    let loaded = Query::<Category>::new(&session, &registry)
        .expect("Failed to build query")
        .asc("code")
        .preload(category_items())
        .all()
        .expect("Failed to preload");

    let labels: Vec<Vec<&str>> = loaded
        .iter()
        .map(|c| c.items.iter().map(|i| i.label.as_str()).collect())
        .collect();
    assert_eq!(
        labels,
        vec![Vec::<&str>::new(), vec!["apple", "pear"], vec!["hammer"]]
    );
}
