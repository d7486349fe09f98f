mod common;

use std::sync::{Arc, Mutex};

use common::{document, harness, keypair, passes, server};
use nimbus_acctest::{AccEnv, Check, ImportStep, TestCase, TestStep};
use nimbus_core::quota::{QuotaKind, QuotaRequest};
use serde_json::{Value as Json, json};

const WEB: &str = "flexibleengine_compute_instance_v2.web";
const FIP: &str = "flexibleengine_networking_floatingip_v2.fip";

#[tokio::test]
async fn compute_instance_basic() {
    let (harness, cloud) = harness();
    let instance = |name: &str, tags: Json| {
        let mut web = server(&harness, "web", &harness.env(AccEnv::FlavorId));
        web["attributes"]["name"] = json!(name);
        web["attributes"]["metadata"] = json!({"foo": "bar"});
        web["attributes"]["tags"] = tags;
        document(json!({"resources": [keypair(), web]}))
    };
    let created = Arc::new(Mutex::new(None::<String>));
    let remember = created.clone();

    let case = TestCase::new("compute_instance_basic")
        .requires(&[
            AccEnv::ImageId,
            AccEnv::FlavorId,
            AccEnv::NetworkId,
            AccEnv::AvailabilityZone,
        ])
        .step(
            TestStep::new(instance(
                "instance_1",
                json!({"muh": "value-create", "kuh": "value-create"}),
            ))
            .checks([
                Check::exists(WEB),
                Check::equals(WEB, "name", "instance_1"),
                Check::equals(WEB, "status", "ACTIVE"),
                Check::equals(WEB, "all_metadata.foo", "bar"),
                Check::equals(WEB, "tags.muh", "value-create"),
                Check::equals(WEB, "tags.kuh", "value-create"),
                Check::equals(WEB, "security_groups.#", 1),
                Check::set(WEB, "network.0.fixed_ip_v4"),
                Check::pair(WEB, "key_pair", "flexibleengine_compute_keypair_v2.deployer", "name"),
                Check::set("flexibleengine_compute_keypair_v2.deployer", "fingerprint"),
            ]),
        )
        .step(
            TestStep::new(instance("instance_2", json!({"muh": "value-update"})))
                .pre_config(move |states| {
                    let web = states.values().find(|s| s.id.address() == WEB);
                    *remember.lock().unwrap() = web.and_then(|s| s.identifier.clone());
                })
                .checks([
                    Check::equals(WEB, "name", "instance_2"),
                    Check::equals(WEB, "all_metadata.foo", "bar"),
                    Check::equals(WEB, "tags.muh", "value-update"),
                    Check::absent(WEB, "tags.kuh"),
                    Check::exists_where(WEB, move |s| {
                        let created = created.lock().unwrap();
                        created.is_some() && s.identifier == *created
                    }),
                ]),
        )
        .import(ImportStep::new(WEB))
        .import(ImportStep::new("flexibleengine_compute_keypair_v2.deployer"));

    passes(&harness, &case).await;
    assert_eq!(cloud.calls("create_server"), 1);
    assert_eq!(cloud.calls("rename_server"), 1);
    assert_eq!(cloud.calls("remove_server_tags"), 1);
    assert_eq!(cloud.calls("delete_server"), 1);
}

#[tokio::test]
async fn compute_volume_attach() {
    let (harness, cloud) = harness();
    let volume = json!({
        "type": "flexibleengine_blockstorage_volume_v2",
        "name": "data",
        "attributes": {"name": "acc-data", "size": 10}
    });
    let attach = json!({
        "type": "flexibleengine_compute_volume_attach_v2",
        "name": "data",
        "attributes": {
            "instance_id": "${flexibleengine_compute_instance_v2.db.id}",
            "volume_id": "${flexibleengine_blockstorage_volume_v2.data.id}"
        }
    });
    let attach_address = "flexibleengine_compute_volume_attach_v2.data";

    let case = TestCase::new("compute_volume_attach")
        .step(
            TestStep::new(document(json!({
                "resources": [keypair(), server(&harness, "db", "s3.small.1"), volume, attach]
            })))
            .checks([
                Check::pair(
                    attach_address,
                    "instance_id",
                    "flexibleengine_compute_instance_v2.db",
                    "id",
                ),
                Check::pair(
                    attach_address,
                    "volume_id",
                    "flexibleengine_blockstorage_volume_v2.data",
                    "id",
                ),
                Check::equals(attach_address, "device", "/dev/vdb"),
                Check::matches(attach_address, "id", "^[^/]+/[^/]+$"),
                Check::exists(attach_address),
            ]),
        )
        .import(ImportStep::new(attach_address));

    passes(&harness, &case).await;
    assert_eq!(cloud.calls("attach_volume"), 1);
    assert_eq!(cloud.calls("detach_volume"), 1);
}

#[tokio::test]
async fn floating_ip_associate_follows_the_instance() {
    let (harness, cloud) = harness();
    let fip = json!({
        "type": "flexibleengine_networking_floatingip_v2",
        "name": "fip",
        "attributes": {}
    });
    let associate = |instance: &str| {
        json!({
            "type": "flexibleengine_compute_floatingip_associate_v2",
            "name": "fip",
            "attributes": {
                "floating_ip": "${flexibleengine_networking_floatingip_v2.fip.address}",
                "instance_id": format!("${{flexibleengine_compute_instance_v2.{}.id}}", instance)
            }
        })
    };
    let association = "flexibleengine_compute_floatingip_associate_v2.fip";
    let resources = |instance: &str| {
        document(json!({
            "resources": [
                keypair(),
                server(&harness, "web", "s3.small.1"),
                server(&harness, "backup", "s3.small.1"),
                fip.clone(),
                associate(instance)
            ]
        }))
    };

    let case = TestCase::new("floating_ip_associate")
        .books(vec![
            QuotaRequest::new(QuotaKind::Instances, 2),
            QuotaRequest::new(QuotaKind::FloatingIps, 1),
        ])
        .step(TestStep::new(resources("web")).checks([
            Check::pair(association, "floating_ip", FIP, "address"),
            Check::pair(association, "fixed_ip", WEB, "network.0.fixed_ip_v4"),
            Check::pair(association, "instance_id", WEB, "id"),
            Check::pair(WEB, "floating_ip", FIP, "address"),
        ]))
        .step(TestStep::new(resources("backup")).checks([
            Check::pair("flexibleengine_compute_instance_v2.backup", "floating_ip", FIP, "address"),
            Check::absent(WEB, "floating_ip"),
            Check::pair(
                association,
                "instance_id",
                "flexibleengine_compute_instance_v2.backup",
                "id",
            ),
            Check::pair(
                association,
                "fixed_ip",
                "flexibleengine_compute_instance_v2.backup",
                "network.0.fixed_ip_v4",
            ),
        ]))
        .import(ImportStep::new(association));

    passes(&harness, &case).await;
    assert_eq!(cloud.calls("allocate_floating_ip"), 1);
    assert_eq!(cloud.calls("release_floating_ip"), 1);
    assert_eq!(harness.booker().reserved(QuotaKind::FloatingIps).await, 0);
}
