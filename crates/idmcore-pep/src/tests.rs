//! Unit tests for idmcore-pep

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use idmcore_abac::{
    Flow, Lock, LockError, LockEvaluator, LockRegistry, MemoryPolicyStore, Pdp, PolicyDocument,
    PolicyResolver,
};
use idmcore_types::{AttributePath, Attributes, Entity, EntityType, GroupRef, Identity};
use proptest::prelude::*;
use serde_json::{Value, json};

use crate::{Declassifier, prune};

fn declassifier_with(document: PolicyDocument) -> Declassifier {
    let resolver = PolicyResolver::new(Arc::new(document), Arc::new(MemoryPolicyStore::new()));
    let pdp = Pdp::new(resolver, Arc::new(LockRegistry::with_builtin_locks())).without_audit();
    Declassifier::new(pdp).without_audit()
}

fn declassifier() -> Declassifier {
    declassifier_with(PolicyDocument::standard())
}

fn alice() -> Identity {
    Identity::new("alice!@!agile-local", "/user").with_attribute("role", "student")
}

fn carol() -> Identity {
    Identity::new("carol!@!agile-local", "/user").with_attribute("role", "student")
}

fn attrs(value: Value) -> Attributes {
    value.as_object().cloned().unwrap()
}

fn alice_record() -> Entity {
    let mut entity = Entity::new(
        "alice!@!agile-local",
        "/user",
        "alice!@!agile-local",
        attrs(json!({
            "user_name": "alice",
            "auth_type": "agile-local",
            "password": "secret",
            "role": "student",
            "credentials": {"dropbox": "dbx-token", "drive": "drv-token"},
            "tags": ["a", {"password": "not-a-path"}]
        })),
    );
    entity.add_group(GroupRef::new("friends", "bob!@!agile-local"));
    entity
}

fn path(raw: &str) -> AttributePath {
    AttributePath::parse(raw).unwrap()
}

/// Every attribute path of `entity`, objects included, parents before
/// children. Arrays are leaves.
fn attribute_paths(entity: &Entity) -> Vec<AttributePath> {
    fn walk(map: &Attributes, parent: Option<&AttributePath>, out: &mut Vec<AttributePath>) {
        for (key, value) in map {
            let path = match parent {
                Some(parent) => parent.child(key.clone()),
                None => AttributePath::root(key.clone()),
            };
            out.push(path.clone());
            if let Value::Object(children) = value {
                walk(children, Some(&path), out);
            }
        }
    }
    let mut paths = Vec::new();
    walk(&entity.attributes, None, &mut paths);
    paths
}

// ============================================================================
// Declassification
// ============================================================================

#[tokio::test]
async fn stranger_loses_password_and_dropbox_only() {
    let record = alice_record();
    let out = declassifier().declassify(&carol(), &record).await.unwrap();

    assert!(!out.attributes.contains_key("password"));
    assert_eq!(out.attributes["credentials"], json!({"drive": "drv-token"}));
    assert_eq!(out.attributes["user_name"], json!("alice"));
    assert_eq!(out.attributes["role"], json!("student"));
    assert_eq!(out.attributes["tags"], record.attributes["tags"]);
    assert_eq!(out.owner, record.owner);
    assert_eq!(out.groups, record.groups);
}

#[tokio::test]
async fn owner_sees_everything() {
    let record = alice_record();
    let out = declassifier().declassify(&alice(), &record).await.unwrap();
    assert_eq!(out, record);
}

#[tokio::test]
async fn input_is_not_modified() {
    let record = alice_record();
    let before = record.clone();
    let _ = declassifier().declassify(&carol(), &record).await.unwrap();
    assert_eq!(record, before);
}

#[tokio::test]
async fn denied_parent_prunes_whole_subtree() {
    let user = EntityType::new("/user");
    let document = PolicyDocument::standard()
        .with_attribute_policy(
            &user,
            "credentials",
            vec![Flow::read().with_lock(Lock::is_owner())],
        )
        .with_attribute_policy(&user, "credentials.drive", vec![Flow::read()]);

    let declassifier = declassifier_with(document);
    let record = alice_record();

    let denied = declassifier.denied_paths(&carol(), &record).await.unwrap();
    assert_eq!(
        denied,
        BTreeSet::from([path("credentials"), path("password")])
    );

    let out = declassifier.declassify(&carol(), &record).await.unwrap();
    assert!(!out.attributes.contains_key("credentials"));
}

#[tokio::test]
async fn instance_override_reveals_attribute() {
    let declassifier = declassifier();
    let record = alice_record();
    declassifier
        .pdp()
        .resolver()
        .set_attribute_policy(&record.id, &record.entity_type, &path("password"), vec![Flow::read()])
        .await
        .unwrap();

    let out = declassifier.declassify(&carol(), &record).await.unwrap();
    assert_eq!(out.attributes["password"], json!("secret"));
}

#[tokio::test]
async fn array_declassification_is_element_wise() {
    let sensor = Entity::new(
        "323",
        "/sensor",
        "bob!@!agile-local",
        attrs(json!({"name": "Barack Obam2a", "token": "DC 20500"})),
    );
    let entities = vec![alice_record(), sensor.clone()];

    let out = declassifier()
        .declassify_array(&carol(), &entities)
        .await
        .unwrap();

    assert_eq!(out.len(), 2);
    assert!(!out[0].attributes.contains_key("password"));
    assert_eq!(out[1], sensor);
}

// ============================================================================
// Pure pruning
// ============================================================================

#[test]
fn prune_keeps_siblings() {
    let record = alice_record();
    let out = prune(&record, &BTreeSet::from([path("credentials.dropbox")]));
    assert_eq!(out.attributes["credentials"], json!({"drive": "drv-token"}));
    assert_eq!(out.attributes["password"], json!("secret"));
}

#[test]
fn prune_with_nothing_denied_is_identity() {
    let record = alice_record();
    assert_eq!(prune(&record, &BTreeSet::new()), record);
}

/// Admits every lock and records the first argument of each, in call order.
#[derive(Default)]
struct Recording {
    seen: Mutex<Vec<String>>,
}

#[async_trait]
impl LockEvaluator for Recording {
    async fn evaluate(
        &self,
        _name: &str,
        _actor: &Identity,
        _subject: &Entity,
        args: &[String],
    ) -> Result<bool, LockError> {
        self.seen.lock().unwrap().extend(args.first().cloned());
        Ok(true)
    }
}

#[tokio::test]
async fn attributes_are_visited_depth_first() {
    let sensor = EntityType::new("/sensor");
    let document = ["a", "a.x", "a.x.deep", "a.y", "b"]
        .into_iter()
        .fold(PolicyDocument::standard(), |document, raw| {
            document.with_attribute_policy(
                &sensor,
                raw,
                vec![Flow::read().with_lock(Lock::new("visit").with_args([raw]))],
            )
        });
    let locks = Arc::new(Recording::default());
    let resolver = PolicyResolver::new(Arc::new(document), Arc::new(MemoryPolicyStore::new()));
    let pdp = Pdp::new(resolver, locks.clone()).without_audit();
    let declassifier = Declassifier::new(pdp).without_audit();

    let record = Entity::new(
        "323",
        "/sensor",
        "bob!@!agile-local",
        attrs(json!({"a": {"x": {"deep": 1}, "y": 2}, "b": 3})),
    );
    let denied = declassifier.denied_paths(&carol(), &record).await.unwrap();

    assert!(denied.is_empty());
    assert_eq!(
        *locks.seen.lock().unwrap(),
        vec!["a", "a.x", "a.x.deep", "a.y", "b"]
    );
}

// ============================================================================
// Property-based tests
// ============================================================================

fn key_strategy() -> impl Strategy<Value = String> {
    prop::sample::select(vec![
        "password", "credentials", "dropbox", "drive", "role", "name", "token",
    ])
    .prop_map(String::from)
}

fn value_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        "[a-z]{0,6}".prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        any::<bool>().prop_map(Value::from),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop::collection::btree_map(key_strategy(), inner, 0..4)
            .prop_map(|map| Value::Object(map.into_iter().collect()))
    })
}

fn entity_strategy() -> impl Strategy<Value = Entity> {
    (
        prop::collection::btree_map(key_strategy(), value_strategy(), 0..5),
        any::<bool>(),
    )
        .prop_map(|(map, owned_by_alice)| {
            let owner = if owned_by_alice {
                "alice!@!agile-local"
            } else {
                "bob!@!agile-local"
            };
            Entity::new("e1", "/user", owner, map.into_iter().collect())
        })
}

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap()
        .block_on(future)
}

proptest! {
    /// Property: declassifying twice equals declassifying once.
    #[test]
    fn prop_declassify_idempotent(entity in entity_strategy()) {
        let declassifier = declassifier();
        let (once, twice) = block_on(async {
            let once = declassifier.declassify(&carol(), &entity).await.unwrap();
            let twice = declassifier.declassify(&carol(), &once).await.unwrap();
            (once, twice)
        });
        prop_assert_eq!(once, twice);
    }

    /// Property: a path survives unless it or an ancestor was denied.
    #[test]
    fn prop_siblings_preserved(entity in entity_strategy()) {
        let declassifier = declassifier();
        let (denied, out) = block_on(async {
            let denied = declassifier.denied_paths(&carol(), &entity).await.unwrap();
            (denied.clone(), prune(&entity, &denied))
        });
        for p in attribute_paths(&entity) {
            let under_denied = denied.iter().any(|d| d.is_prefix_of(&p));
            prop_assert_eq!(out.attribute(&p).is_some(), !under_denied, "path {}", p);
        }
    }

    /// Property: the owner sees the entity unchanged under the standard policy.
    #[test]
    fn prop_owner_full_visibility(entity in entity_strategy()) {
        prop_assume!(entity.owner == "alice!@!agile-local");
        let declassifier = declassifier();
        let out = block_on(declassifier.declassify(&alice(), &entity)).unwrap();
        prop_assert_eq!(out, entity);
    }
}
