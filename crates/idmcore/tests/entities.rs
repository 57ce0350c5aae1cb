//! Entity service scenarios.

mod common;

use common::*;
use idmcore::{AttributeCriterion, IdmError};
use serde_json::json;

#[tokio::test]
async fn created_sensor_reads_back_identically() {
    let core = test_core();
    let admin = bob();

    let created = core
        .create_entity(
            &admin,
            "323",
            &sensor(),
            attrs(json!({"name": "Barack Obam2a", "token": "DC 20500"})),
        )
        .await
        .unwrap();

    assert_eq!(created.id, "323");
    assert_eq!(created.entity_type, sensor());
    assert_eq!(created.owner, admin.id);
    assert_eq!(
        created.attributes,
        attrs(json!({"name": "Barack Obam2a", "token": "DC 20500"}))
    );

    let read = core.read_entity(&admin, "323", &sensor()).await.unwrap();
    assert_eq!(read, created);
}

#[tokio::test]
async fn reading_a_missing_entity_is_not_found() {
    let err = test_core()
        .read_entity(&bob(), "999", &sensor())
        .await
        .unwrap_err();
    assert!(matches!(err, IdmError::NotFound(_)));
    assert_eq!(err.status_code(), 404);
}

#[tokio::test]
async fn password_is_withheld_from_non_owners() {
    let core = test_core();
    let stored = provision_alice(&core).await;
    assert_eq!(stored.owner, alice().id);
    assert!(stored.attributes.contains_key("password"));

    let seen_by_carol = core.read_entity(&carol(), &alice().id, &user()).await.unwrap();
    assert!(!seen_by_carol.attributes.contains_key("password"));
    assert_eq!(seen_by_carol.attributes["user_name"], json!("alice"));
    assert_eq!(
        seen_by_carol.attributes["credentials"],
        json!({"drive": "drive-token"})
    );

    let seen_by_admin = core.read_entity(&bob(), &alice().id, &user()).await.unwrap();
    assert!(!seen_by_admin.attributes.contains_key("password"));
}

#[tokio::test]
async fn owner_sees_every_attribute() {
    let core = test_core();
    let stored = provision_alice(&core).await;

    let seen_by_alice = core.read_entity(&alice(), &alice().id, &user()).await.unwrap();
    assert_eq!(seen_by_alice, stored);
    assert_eq!(seen_by_alice.attributes["password"], json!("secret"));
}

#[tokio::test]
async fn owner_may_change_own_password_but_not_role() {
    let core = test_core();
    provision_alice(&core).await;

    let updated = core
        .set_entity_attribute(&alice(), &alice().id, &user(), "password", json!("hunter2"))
        .await
        .unwrap();
    assert_eq!(updated.attributes["password"], json!("hunter2"));

    let err = core
        .set_entity_attribute(&alice(), &alice().id, &user(), "role", json!("admin"))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 403);

    let promoted = core
        .set_entity_attribute(&bob(), &alice().id, &user(), "role", json!("tutor"))
        .await
        .unwrap();
    assert_eq!(promoted.attributes["role"], json!("tutor"));
}

#[tokio::test]
async fn setting_an_attribute_on_a_missing_entity_is_not_found() {
    let err = test_core()
        .set_entity_attribute(&bob(), "999", &sensor(), "token", json!("x"))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 404);
}

#[tokio::test]
async fn malformed_attribute_path_is_a_validation_error() {
    let core = test_core();
    core.create_entity(&bob(), "323", &sensor(), attrs(json!({})))
        .await
        .unwrap();
    let err = core
        .set_entity_attribute(&bob(), "323", &sensor(), "a..b", json!(1))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 400);
}

#[tokio::test]
async fn deleted_entity_is_gone() {
    let core = test_core();
    core.create_entity(&bob(), "323", &sensor(), attrs(json!({"token": "t"})))
        .await
        .unwrap();
    core.delete_entity(&bob(), "323", &sensor()).await.unwrap();

    let err = core.read_entity(&bob(), "323", &sensor()).await.unwrap_err();
    assert_eq!(err.status_code(), 404);

    let again = core.delete_entity(&bob(), "323", &sensor()).await.unwrap_err();
    assert_eq!(again.status_code(), 404);
}

#[tokio::test]
async fn search_without_matches_is_empty() {
    let core = test_core();
    core.create_entity(&bob(), "323", &sensor(), attrs(json!({"token": "t"})))
        .await
        .unwrap();

    let found = core
        .list_entities_by_attribute_value_and_type(
            &bob(),
            &[AttributeCriterion::new("token", "nothing-like-this")],
            Some(&sensor()),
        )
        .await
        .unwrap();
    assert!(found.is_empty());
}

#[tokio::test]
async fn search_filters_by_type() {
    let core = test_core();
    core.create_entity(&bob(), "323", &sensor(), attrs(json!({"site": "lab"})))
        .await
        .unwrap();
    core.create_entity(&bob(), "324", &sensor(), attrs(json!({"site": "roof"})))
        .await
        .unwrap();
    provision_alice(&core).await;

    let criteria = [AttributeCriterion::new("site", "lab")];
    let sensors = core
        .list_entities_by_attribute_value_and_type(&carol(), &criteria, Some(&sensor()))
        .await
        .unwrap();
    assert_eq!(sensors.len(), 1);
    assert_eq!(sensors[0].id, "323");

    let users = core
        .list_entities_by_attribute_value_and_type(&carol(), &criteria, Some(&user()))
        .await
        .unwrap();
    assert!(users.is_empty());
}

#[tokio::test]
async fn search_never_reveals_values_the_caller_cannot_read() {
    let core = test_core();
    provision_alice(&core).await;
    let criteria = [AttributeCriterion::new("password", "secret")];

    let by_carol = core
        .list_entities_by_attribute_value_and_type(&carol(), &criteria, None)
        .await
        .unwrap();
    assert!(by_carol.is_empty());

    let by_alice = core
        .list_entities_by_attribute_value_and_type(&alice(), &criteria, None)
        .await
        .unwrap();
    assert_eq!(by_alice.len(), 1);
    assert_eq!(by_alice[0].attributes["password"], json!("secret"));
}

#[tokio::test]
async fn search_results_are_declassified() {
    let core = test_core();
    provision_alice(&core).await;

    let found = core
        .list_entities_by_attribute_value_and_type(
            &carol(),
            &[AttributeCriterion::new("user_name", "alice")],
            Some(&user()),
        )
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert!(!found[0].attributes.contains_key("password"));
}
