#![allow(dead_code)]

use std::sync::Arc;

use nimbus_acctest::{AccEnv, Harness, Outcome, TestCase};
use nimbus_core::document::Document;
use nimbus_provider_flexibleengine::FakeCloud;
use serde_json::{Value, json};

pub fn document(value: Value) -> Document {
    Document::parse(&value.to_string()).unwrap()
}

pub fn harness() -> (Harness, Arc<FakeCloud>) {
    let cloud = Arc::new(FakeCloud::new());
    (Harness::on(cloud.clone()).unwrap(), cloud)
}

pub async fn passes(harness: &Harness, case: &TestCase) {
    match harness.run(case).await {
        Ok(outcome) => assert_eq!(outcome, Outcome::Passed),
        Err(e) => panic!("{}", e),
    }
}

/// Key pair plus one server on the given flavor
pub fn server(harness: &Harness, name: &str, flavor: &str) -> Value {
    json!({
        "type": "flexibleengine_compute_instance_v2",
        "name": name,
        "attributes": {
            "name": format!("acc-{}", name),
            "flavor_id": flavor,
            "image_id": harness.env(AccEnv::ImageId),
            "availability_zone": harness.env(AccEnv::AvailabilityZone),
            "key_pair": "${flexibleengine_compute_keypair_v2.deployer.name}",
            "network": [{"uuid": harness.env(AccEnv::NetworkId)}],
            "admin_pass": "Nimbus-acc-1"
        }
    })
}

pub fn keypair() -> Value {
    json!({
        "type": "flexibleengine_compute_keypair_v2",
        "name": "deployer",
        "attributes": {
            "name": "acc-deployer",
            "public_key": "ssh-rsa AAAAB3NzaC1yc2EAAAADAQABAAABAQC acc@nimbus"
        }
    })
}
