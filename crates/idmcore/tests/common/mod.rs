//! Fixtures shared by the integration suites.

#![allow(dead_code)]

use idmcore::{Attributes, Entity, EntityType, IdmCore, Identity, PolicyDocument};
use serde_json::{Value, json};

pub const AUTHORITY: &str = "agile-local";

pub fn user_id(name: &str) -> String {
    Identity::compose_id(name, AUTHORITY)
}

/// Admin actor.
pub fn bob() -> Identity {
    Identity::new(user_id("bob"), EntityType::USER).with_attribute("role", "admin")
}

pub fn alice() -> Identity {
    Identity::new(user_id("alice"), EntityType::USER).with_attribute("role", "student")
}

/// Neither owner nor admin of anything the fixtures create.
pub fn carol() -> Identity {
    Identity::new(user_id("carol"), EntityType::USER).with_attribute("role", "student")
}

pub fn user() -> EntityType {
    EntityType::new(EntityType::USER)
}

pub fn sensor() -> EntityType {
    EntityType::new("/sensor")
}

pub fn attrs(value: Value) -> Attributes {
    value.as_object().cloned().unwrap()
}

pub fn test_core() -> IdmCore {
    IdmCore::builder(PolicyDocument::standard())
        .with_entity_types(["/user", "/sensor", "/group"])
        .without_audit()
        .build()
}

/// Provisions alice as a `/user` she owns herself, created by admin bob.
pub async fn provision_alice(core: &IdmCore) -> Entity {
    let alice = alice();
    core.create_entity_and_set_owner(
        &bob(),
        &alice.id,
        &user(),
        attrs(json!({
            "user_name": "alice",
            "auth_type": AUTHORITY,
            "password": "secret",
            "role": "student",
            "credentials": {"dropbox": "dbx-token", "drive": "drive-token"}
        })),
        &alice.id,
    )
    .await
    .unwrap()
}
