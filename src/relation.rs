//! Parent/child relations and batched eager loading.
//!
//! A [`Relation`] wires two record types together with plain function
//! pointers: read the parent's local key, read the child's foreign key, and
//! assign the grouped children back onto the parent. [`load_related`] then
//! fills an already-hydrated parent slice with at most one child query,
//! however many parents there are.
//!
//! Matching goes through [`Key`] rather than raw [`Value`] equality, so the
//! integer widening a driver applies on readback cannot split a group, and
//! null keys never match anything.

use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::dialect::format_placeholders;
use crate::error::{GantryError, Stage};
use crate::expr::{Column, SqlWriter};
use crate::schema::{FromRow, Schema, SchemaRegistry};
use crate::session::Session;
use crate::value::{Key, Value};

/// How loaded children attach to their parent.
pub enum Assign<P, C> {
    /// To-many: the parent receives every matching child, or an empty
    /// collection when none matched.
    Many(fn(&mut P, Vec<C>)),
    /// To-one: the parent receives the first matching child, if any.
    One(fn(&mut P, Option<C>)),
}

impl<P, C> Clone for Assign<P, C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<P, C> Copy for Assign<P, C> {}

/// A declared link from parent type `P` to child type `C`.
///
/// `foreign_key` names the child column holding the parent reference;
/// `local_key` names the parent column it refers to. The key getters read
/// from hydrated records, so loading related rows never re-reads parents.
pub struct Relation<P, C> {
    foreign_key: String,
    local_key: String,
    local: fn(&P) -> Value,
    foreign: fn(&C) -> Value,
    assign: Assign<P, C>,
}

impl<P, C> Clone for Relation<P, C> {
    fn clone(&self) -> Self {
        Self {
            foreign_key: self.foreign_key.clone(),
            local_key: self.local_key.clone(),
            local: self.local,
            foreign: self.foreign,
            assign: self.assign,
        }
    }
}

impl<P, C> fmt::Debug for Relation<P, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Relation")
            .field("foreign_key", &self.foreign_key)
            .field("local_key", &self.local_key)
            .finish_non_exhaustive()
    }
}

impl<P, C> Relation<P, C> {
    /// A one-to-many link: every matching child lands on the parent.
    pub fn has_many(
        foreign_key: impl Into<String>,
        local_key: impl Into<String>,
        local: fn(&P) -> Value,
        foreign: fn(&C) -> Value,
        assign: fn(&mut P, Vec<C>),
    ) -> Self {
        Self {
            foreign_key: foreign_key.into(),
            local_key: local_key.into(),
            local,
            foreign,
            assign: Assign::Many(assign),
        }
    }

    /// A one-to-one link: the first matching child lands on the parent.
    pub fn has_one(
        foreign_key: impl Into<String>,
        local_key: impl Into<String>,
        local: fn(&P) -> Value,
        foreign: fn(&C) -> Value,
        assign: fn(&mut P, Option<C>),
    ) -> Self {
        Self {
            foreign_key: foreign_key.into(),
            local_key: local_key.into(),
            local,
            foreign,
            assign: Assign::One(assign),
        }
    }

    /// Child-table column holding the parent reference.
    pub fn foreign_key(&self) -> &str {
        &self.foreign_key
    }

    /// Parent-side key column the relation joins on.
    pub fn local_key(&self) -> &str {
        &self.local_key
    }
}

/// Attach related children to an already-hydrated parent slice.
///
/// Issues at most one child query: none when `parents` is empty or every
/// parent key is null, one `IN` query otherwise. Children come back in
/// primary-key order, so to-many collections read in insertion order.
/// Every parent is assigned either way; a to-many parent with no matches
/// gets an empty collection, never a stale one.
///
/// # Errors
///
/// Returns [`GantryError::NotRegistered`] when `C` has no schema in
/// `registry`, a build error when a key value has no reliable equality
/// (floats, JSON), or a preload-stage execution error from the driver.
pub fn load_related<P, C>(
    session: &Session,
    registry: &SchemaRegistry,
    relation: &Relation<P, C>,
    parents: &mut [P],
) -> Result<(), GantryError>
where
    C: FromRow + Clone + 'static,
{
    if parents.is_empty() {
        return Ok(());
    }
    let schema = registry.get::<C>()?;

    // Keys per parent for matching, plus a deduplicated list for the IN
    // clause in first-seen order.
    let mut parent_keys: Vec<Option<Key>> = Vec::with_capacity(parents.len());
    let mut seen: HashSet<Key> = HashSet::new();
    let mut in_values: Vec<Value> = Vec::new();
    for parent in parents.iter() {
        let value = (relation.local)(parent);
        let key = Key::from_value(&value)?;
        if let Some(key) = &key {
            if seen.insert(key.clone()) {
                in_values.push(value);
            }
        }
        parent_keys.push(key);
    }

    log::debug!(
        "preload {} via {}: {} parents, {} distinct keys",
        schema.table(),
        relation.foreign_key,
        parents.len(),
        in_values.len()
    );

    let mut groups: HashMap<Key, Vec<C>> = HashMap::new();
    if !in_values.is_empty() {
        let children = fetch_children(session, schema.as_ref(), &relation.foreign_key, in_values)?;
        for child in children {
            let value = (relation.foreign)(&child);
            // A null foreign key matches no parent
            if let Some(key) = Key::from_value(&value)? {
                groups.entry(key).or_default().push(child);
            }
        }
    }

    for (parent, key) in parents.iter_mut().zip(&parent_keys) {
        let matched = key.as_ref().and_then(|key| groups.get(key));
        match relation.assign {
            Assign::Many(assign) => {
                assign(parent, matched.cloned().unwrap_or_default());
            }
            Assign::One(assign) => {
                assign(parent, matched.and_then(|children| children.first().cloned()));
            }
        }
    }
    Ok(())
}

fn fetch_children<C>(
    session: &Session,
    schema: &dyn Schema<C>,
    foreign_key: &str,
    keys: Vec<Value>,
) -> Result<Vec<C>, GantryError>
where
    C: FromRow,
{
    let mut w = SqlWriter::new();
    w.push("SELECT ");
    for (i, column) in schema.columns().iter().enumerate() {
        if i > 0 {
            w.push(", ");
        }
        w.push(column);
    }
    w.push(" FROM ");
    w.push(schema.table());
    w.push(" WHERE ");
    Column::bare(foreign_key).is_in(keys).write_sql(&mut w);
    // Key order keeps to-many collections deterministic
    w.push(" ORDER BY ");
    w.push(schema.pk_column());

    let (sql, args) = w.finish();
    let sql = format_placeholders(&sql, session.dialect().placeholder_format());
    let rows = session.query_tagged(&sql, &args, Stage::Preload)?;
    rows.iter().map(C::from_row).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Row;
    use crate::sqlite::SqliteConnection;

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Team {
        id: i64,
        name: String,
        members: Vec<Member>,
        lead: Option<Member>,
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Member {
        id: i64,
        team_id: Option<i64>,
        name: String,
    }

    struct MemberSchema;

    impl Schema<Member> for MemberSchema {
        fn table(&self) -> &str {
            "members"
        }

        fn columns(&self) -> &[&str] {
            &["id", "team_id", "name"]
        }

        fn insert_row(&self, member: &Member) -> (Vec<&str>, Vec<Value>) {
            (
                vec!["team_id", "name"],
                vec![member.team_id.into(), member.name.clone().into()],
            )
        }

        fn update_map(&self, member: &Member) -> Vec<(&str, Value)> {
            vec![
                ("team_id", member.team_id.into()),
                ("name", member.name.clone().into()),
            ]
        }

        fn primary_key(&self, member: &Member) -> (&str, Value) {
            ("id", member.id.into())
        }

        fn pk_column(&self) -> &str {
            "id"
        }

        fn set_primary_key(&self, member: &mut Member, id: i64) {
            member.id = id;
        }

        fn auto_increment(&self) -> bool {
            true
        }
    }

    impl FromRow for Member {
        fn from_row(row: &Row) -> Result<Self, GantryError> {
            Ok(Member {
                id: row.try_get_by_name("id")?,
                team_id: row.try_get_by_name("team_id")?,
                name: row.try_get_by_name("name")?,
            })
        }
    }

    fn team_members() -> Relation<Team, Member> {
        Relation::has_many(
            "team_id",
            "id",
            |team: &Team| team.id.into(),
            |member: &Member| member.team_id.into(),
            |team, members| team.members = members,
        )
    }

    fn team_lead() -> Relation<Team, Member> {
        Relation::has_one(
            "team_id",
            "id",
            |team: &Team| team.id.into(),
            |member: &Member| member.team_id.into(),
            |team, lead| team.lead = lead,
        )
    }

    fn member_session() -> (Session, SchemaRegistry) {
        let session = SqliteConnection::open_in_memory()
            .expect("open sqlite")
            .into_session();
        session
            .execute(
                "CREATE TABLE members (id INTEGER PRIMARY KEY AUTOINCREMENT, \
                 team_id INTEGER, name TEXT NOT NULL)",
                &[],
            )
            .expect("create table");
        let mut registry = SchemaRegistry::new();
        registry.register(MemberSchema);
        (session, registry)
    }

    fn add_member(session: &Session, team_id: Option<i64>, name: &str) {
        session
            .execute(
                "INSERT INTO members (team_id, name) VALUES (?, ?)",
                &[team_id.into(), name.into()],
            )
            .expect("insert member");
    }

    fn team(id: i64, name: &str) -> Team {
        Team {
            id,
            name: name.into(),
            ..Team::default()
        }
    }

    #[test]
    fn test_has_many_overwrites_unmatched_parents_with_empty() {
        let (session, registry) = member_session();
        add_member(&session, Some(1), "ana");
        add_member(&session, Some(1), "bo");

        let mut teams = vec![team(1, "red"), team(2, "blue")];
        // Stale state must not survive a load
        teams[1].members = vec![Member {
            id: 99,
            team_id: Some(2),
            name: "ghost".into(),
        }];

        load_related(&session, &registry, &team_members(), &mut teams).unwrap();

        let names: Vec<&str> = teams[0].members.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["ana", "bo"]);
        assert!(teams[1].members.is_empty());
    }

    #[test]
    fn test_has_one_takes_first_child_by_primary_key() {
        let (session, registry) = member_session();
        add_member(&session, Some(1), "ana");
        add_member(&session, Some(1), "bo");

        let mut teams = vec![team(1, "red"), team(2, "blue")];
        load_related(&session, &registry, &team_lead(), &mut teams).unwrap();

        assert_eq!(teams[0].lead.as_ref().map(|m| m.name.as_str()), Some("ana"));
        assert_eq!(teams[1].lead, None);
    }

    #[test]
    fn test_parents_sharing_a_key_each_get_the_children() {
        let (session, registry) = member_session();
        add_member(&session, Some(7), "solo");

        let mut teams = vec![team(7, "left"), team(7, "right")];
        load_related(&session, &registry, &team_members(), &mut teams).unwrap();

        assert_eq!(teams[0].members.len(), 1);
        assert_eq!(teams[1].members.len(), 1);
    }

    #[test]
    fn test_empty_parents_issue_no_query() {
        let session = SqliteConnection::open_in_memory()
            .expect("open sqlite")
            .into_session();
        // No members table exists; a query would fail loudly
        let registry = SchemaRegistry::new();
        let mut teams: Vec<Team> = Vec::new();
        load_related(&session, &registry, &team_members(), &mut teams).unwrap();
    }

    #[test]
    fn test_all_null_keys_skip_the_query_and_assign_empty() {
        let session = SqliteConnection::open_in_memory()
            .expect("open sqlite")
            .into_session();
        // No members table exists; a query would fail loudly
        let mut registry = SchemaRegistry::new();
        registry.register(MemberSchema);

        let null_keyed: Relation<Team, Member> = Relation::has_many(
            "team_id",
            "id",
            |_team: &Team| Value::BigInt(None),
            |member: &Member| member.team_id.into(),
            |team, members| team.members = members,
        );

        let mut teams = vec![team(1, "red")];
        teams[0].members = vec![Member {
            id: 99,
            team_id: None,
            name: "ghost".into(),
        }];
        load_related(&session, &registry, &null_keyed, &mut teams).unwrap();
        assert!(teams[0].members.is_empty());
    }

    #[test]
    fn test_float_local_keys_are_a_build_error() {
        let (session, registry) = member_session();
        let float_keyed: Relation<Team, Member> = Relation::has_many(
            "team_id",
            "id",
            |_team: &Team| Value::Double(Some(1.0)),
            |member: &Member| member.team_id.into(),
            |team, members| team.members = members,
        );

        let mut teams = vec![team(1, "red")];
        let err = load_related(&session, &registry, &float_keyed, &mut teams).unwrap_err();
        assert!(matches!(err, GantryError::Build(_)));
    }

    #[test]
    fn test_unregistered_child_type_is_reported() {
        let session = SqliteConnection::open_in_memory()
            .expect("open sqlite")
            .into_session();
        let registry = SchemaRegistry::new();
        let mut teams = vec![team(1, "red")];
        let err = load_related(&session, &registry, &team_members(), &mut teams).unwrap_err();
        assert!(matches!(err, GantryError::NotRegistered { .. }));
    }

    #[test]
    fn test_relation_reports_its_columns() {
        let relation = team_members();
        assert_eq!(relation.foreign_key(), "team_id");
        assert_eq!(relation.local_key(), "id");
        let debugged = format!("{relation:?}");
        assert!(debugged.contains("team_id"));
    }
}
