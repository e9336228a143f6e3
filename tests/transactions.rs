//! Transaction semantics over the shared-connection session: closure
//! commit/rollback, explicit begin/commit, flattened nesting, and panic
//! recovery.

mod common;

use common::{blog_registry, blog_session, user, User};
use gantry::{GantryError, Repository};

#[test]
fn test_transaction_commits_on_ok() {
    let session = blog_session();
    let registry = blog_registry();
    let users = Repository::<User>::new(&session, &registry).expect("Failed to build repository");

    let id = session
        .transaction(|tx| {
            let scoped = users.with_session(tx);
            let mut record = user("alice", "alice@example.com", 34);
            scoped.create(&mut record)?;
            // Uncommitted writes are visible inside the transaction
            assert_eq!(scoped.query().count()?, 1);
            Ok(record.id)
        })
        .expect("Transaction failed");

    assert_eq!(users.find_one(id).expect("Row not committed").name, "alice");
    assert!(!session.in_transaction());
}

#[test]
fn test_transaction_rolls_back_on_error() {
    let session = blog_session();
    let registry = blog_registry();
    let users = Repository::<User>::new(&session, &registry).expect("Failed to build repository");

    let result: Result<(), GantryError> = session.transaction(|tx| {
        let scoped = users.with_session(tx);
        let mut record = user("ghost", "ghost@example.com", 40);
        scoped.create(&mut record)?;
        Err(GantryError::build("abort"))
    });

    assert!(result.is_err());
    assert_eq!(users.query().count().unwrap(), 0);
}

#[test]
fn test_explicit_begin_commit_and_rollback() {
    let session = blog_session();
    let registry = blog_registry();
    let users = Repository::<User>::new(&session, &registry).expect("Failed to build repository");

    let tx = session.begin().expect("Failed to begin");
    assert!(tx.in_transaction());
    assert!(!session.in_transaction());

    let mut committed = user("alice", "alice@example.com", 34);
    users.with_session(&tx).create(&mut committed).unwrap();
    tx.commit().expect("Failed to commit");
    assert!(!tx.in_transaction());
    assert_eq!(users.query().count().unwrap(), 1);

    let tx = session.begin().expect("Failed to begin");
    let mut discarded = user("bob", "bob@example.com", 17);
    users.with_session(&tx).create(&mut discarded).unwrap();
    tx.rollback().expect("Failed to roll back");
    assert_eq!(users.query().count().unwrap(), 1);
}

#[test]
fn test_commit_without_transaction_is_an_error() {
    let session = blog_session();
    assert!(matches!(
        session.commit().unwrap_err(),
        GantryError::NoActiveTransaction
    ));
    assert!(matches!(
        session.rollback().unwrap_err(),
        GantryError::NoActiveTransaction
    ));
}

#[test]
fn test_closed_transaction_rejects_further_control() {
    let session = blog_session();
    let tx = session.begin().expect("Failed to begin");
    tx.commit().expect("Failed to commit");
    assert!(matches!(
        tx.commit().unwrap_err(),
        GantryError::NoActiveTransaction
    ));
    assert!(matches!(
        tx.rollback().unwrap_err(),
        GantryError::NoActiveTransaction
    ));
}

#[test]
fn test_nested_transaction_flattens_into_outer() {
    let session = blog_session();
    let registry = blog_registry();
    let users = Repository::<User>::new(&session, &registry).expect("Failed to build repository");

    // Success path: both levels commit as one unit
    session
        .transaction(|tx| {
            let scoped = users.with_session(tx);
            let mut outer = user("outer", "outer@example.com", 30);
            scoped.create(&mut outer)?;
            tx.transaction(|inner| {
                let mut nested = user("inner", "inner@example.com", 31);
                users.with_session(inner).create(&mut nested)
            })
        })
        .expect("Transaction failed");
    assert_eq!(users.query().count().unwrap(), 2);

    // Failure path: the inner error unwinds the whole unit of work
    let result: Result<(), GantryError> = session.transaction(|tx| {
        let scoped = users.with_session(tx);
        let mut outer = user("doomed", "doomed@example.com", 50);
        scoped.create(&mut outer)?;
        tx.transaction(|inner| {
            let mut nested = user("also-doomed", "also@example.com", 51);
            users.with_session(inner).create(&mut nested)?;
            Err(GantryError::build("inner abort"))
        })
    });
    assert!(result.is_err());
    assert_eq!(users.query().count().unwrap(), 2);
}

#[test]
fn test_transaction_rolls_back_on_panic_and_resumes_unwind() {
    let session = blog_session();
    let registry = blog_registry();
    let users = Repository::<User>::new(&session, &registry).expect("Failed to build repository");

    let unwound = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        let _ = session.transaction(|tx| -> Result<(), GantryError> {
            let scoped = users.with_session(tx);
            let mut record = user("doomed", "doomed@example.com", 40);
            scoped.create(&mut record)?;
            panic!("hook blew up");
        });
    }));

    assert!(unwound.is_err());
    assert_eq!(users.query().count().unwrap(), 0);

    // The connection is back to autocommit and fully usable
    let mut record = user("survivor", "survivor@example.com", 28);
    users.create(&mut record).expect("Session unusable after panic");
    assert_eq!(users.query().count().unwrap(), 1);
}
