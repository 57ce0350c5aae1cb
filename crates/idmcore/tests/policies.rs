//! Policy administration and denial actions.

mod common;

use common::*;
use idmcore::{
    ActionKind, Attributes, Flow, IdmCore, IdmError, Lock, Op, PolicyDocument, TopLevelPolicy,
};
use serde_json::json;

#[tokio::test]
async fn entity_policies_are_nested_by_path() {
    let core = test_core();
    provision_alice(&core).await;

    let policies = core
        .get_entity_policies(&carol(), &alice().id, &user())
        .await
        .unwrap();
    let json = serde_json::to_value(&policies).unwrap();

    assert_eq!(
        json["self"],
        serde_json::to_value(PolicyDocument::standard().top_level_policy).unwrap()
    );
    assert!(json["password"]["self"].is_array());
    assert!(json["role"]["self"].is_array());
    assert!(json["credentials"]["self"].is_array());
    assert!(json["credentials"]["dropbox"]["self"].is_array());
}

#[tokio::test]
async fn policies_of_a_missing_entity_are_not_found() {
    let err = test_core()
        .get_entity_policies(&bob(), "999", &sensor())
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 404);
}

#[tokio::test]
async fn owner_can_hide_an_attribute_from_others() {
    let core = test_core();
    provision_alice(&core).await;

    let before = core.read_entity(&carol(), &alice().id, &user()).await.unwrap();
    assert_eq!(before.attributes["credentials"]["drive"], json!("drive-token"));

    let owner_read = vec![Flow::read().with_lock(Lock::is_owner())];
    let policies = core
        .set_entity_policy(&alice(), &alice().id, &user(), "credentials.drive", owner_read.clone())
        .await
        .unwrap();
    assert_eq!(
        policies
            .node(&"credentials.drive".parse().unwrap())
            .unwrap()
            .flows,
        Some(owner_read.clone())
    );

    let after = core.read_entity(&carol(), &alice().id, &user()).await.unwrap();
    assert_eq!(after.attributes["credentials"], json!({}));

    let own = core.read_entity(&alice(), &alice().id, &user()).await.unwrap();
    assert_eq!(own.attributes["credentials"]["drive"], json!("drive-token"));

    let effective = core
        .get_attribute_policy(&alice().id, &user(), "credentials.drive")
        .await
        .unwrap();
    assert_eq!(effective, owner_read);
}

#[tokio::test]
async fn strangers_cannot_set_policies() {
    let core = test_core();
    provision_alice(&core).await;

    let err = core
        .set_entity_policy(&carol(), &alice().id, &user(), "password", vec![Flow::read()])
        .await
        .unwrap_err();
    assert!(matches!(err, IdmError::Forbidden(_)));
}

#[tokio::test]
async fn reserved_paths_cannot_carry_policies() {
    let core = test_core();
    provision_alice(&core).await;

    let err = core
        .set_entity_policy(&alice(), &alice().id, &user(), "owner", vec![Flow::read()])
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 400);
}

#[tokio::test]
async fn unlisted_paths_inherit_their_parent() {
    let core = test_core();
    let parent = core
        .get_attribute_policy(&alice().id, &user(), "credentials")
        .await
        .unwrap();
    let child = core
        .get_attribute_policy(&alice().id, &user(), "credentials.drive")
        .await
        .unwrap();
    assert_eq!(child, parent);

    let unlisted = core
        .get_attribute_policy(&alice().id, &user(), "nickname")
        .await
        .unwrap();
    assert_eq!(unlisted, PolicyDocument::standard().top_level_policy.flows);
}

#[tokio::test]
async fn seeding_defaults_writes_type_paths() {
    let core = test_core();
    let written = core
        .set_default_entity_policies(&alice().id, &user())
        .await
        .unwrap();
    assert_eq!(written, 4);
}

// ============================================================================
// Denial actions
// ============================================================================

fn owner_only_document(actions: &[ActionKind]) -> PolicyDocument {
    let mut top = TopLevelPolicy::new(vec![Flow::any().with_lock(Lock::is_owner())]);
    for action in actions {
        top = top.with_action(Op::Read, *action);
    }
    PolicyDocument::default()
        .with_create_flow(Flow::any())
        .with_top_level(top)
}

#[tokio::test]
async fn withheld_entities_look_absent() {
    let core = IdmCore::builder(owner_only_document(&[ActionKind::Delete, ActionKind::Log]))
        .without_audit()
        .build();
    core.create_entity(&alice(), "323", &sensor(), Attributes::new())
        .await
        .unwrap();

    let err = core.read_entity(&carol(), "323", &sensor()).await.unwrap_err();
    assert!(matches!(err, IdmError::NotFound(_)));

    let policies = core
        .get_entity_policies(&carol(), "323", &sensor())
        .await
        .unwrap_err();
    assert_eq!(policies.status_code(), 404);
}

#[tokio::test]
async fn denials_without_withholding_are_forbidden() {
    let core = IdmCore::builder(owner_only_document(&[ActionKind::Log]))
        .without_audit()
        .build();
    core.create_entity(&alice(), "323", &sensor(), Attributes::new())
        .await
        .unwrap();

    let err = core.read_entity(&carol(), "323", &sensor()).await.unwrap_err();
    assert!(matches!(err, IdmError::Forbidden(_)));
    assert!(core.read_entity(&alice(), "323", &sensor()).await.is_ok());
}

#[tokio::test]
async fn empty_document_denies_everything() {
    let core = IdmCore::builder(PolicyDocument::default())
        .without_audit()
        .build();
    let err = core
        .create_entity(&bob(), "323", &sensor(), Attributes::new())
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 403);
}
