mod common;

use common::{document, harness, passes};
use nimbus_acctest::{AccEnv, Check, ImportStep, TestCase, TestStep};
use nimbus_core::quota::{QuotaKind, QuotaRequest};
use nimbus_core::resource::Value;
use serde_json::{Value as Json, json};

const POLICY: &str = "flexibleengine_waf_dedicated_policy.policy_1";
const RULE: &str = "flexibleengine_waf_dedicated_precise_protection_rule.rule_1";
const ALARM: &str = "flexibleengine_ces_alarmrule.alarm_1";
const ROUTE: &str = "flexibleengine_er_static_route.route_1";

fn waf(priority: i64, category: &str) -> Json {
    json!({
        "resources": [
            {
                "type": "flexibleengine_waf_dedicated_policy",
                "name": "policy_1",
                "attributes": {"name": "policy_pp", "protection_mode": "block"}
            },
            {
                "type": "flexibleengine_waf_dedicated_precise_protection_rule",
                "name": "rule_1",
                "attributes": {
                    "policy_id": "${flexibleengine_waf_dedicated_policy.policy_1.id}",
                    "name": "deny_login",
                    "priority": priority,
                    "conditions": [
                        {"category": "url", "logic_operation": "prefix", "contents": ["/login"]},
                        {
                            "category": "header",
                            "logic_operation": "contain",
                            "index": "User-Agent",
                            "contents": ["curl", "wget"]
                        }
                    ],
                    "action": [{"category": category}]
                }
            }
        ]
    })
}

#[tokio::test]
async fn waf_policy_and_precise_rule() {
    let (harness, cloud) = harness();
    let case = TestCase::new("waf_dedicated_precise_protection_rule")
        .requires(&[AccEnv::WafEnableFlag])
        .books(vec![QuotaRequest::new(QuotaKind::WafPolicies, 1)])
        .step(TestStep::new(document(waf(50, "block"))).checks([
            Check::equals(POLICY, "name", "policy_pp"),
            Check::equals(POLICY, "level", 2),
            Check::equals(POLICY, "protection_mode", "block"),
            Check::matches(RULE, "id", "^[^/]+/[^/]+$"),
            Check::pair(RULE, "policy_id", POLICY, "id"),
            Check::equals(RULE, "priority", 50),
            Check::equals(RULE, "conditions.#", 2),
            Check::equals(RULE, "conditions.0.category", "url"),
            Check::equals(RULE, "conditions.0.contents.0", "/login"),
            Check::equals(RULE, "conditions.1.index", "User-Agent"),
            Check::equals(RULE, "conditions.1.contents.#", 2),
            Check::equals(RULE, "action.0.category", "block"),
        ]))
        .step(TestStep::new(document(waf(60, "log"))).checks([
            Check::equals(RULE, "priority", 60),
            Check::equals(RULE, "conditions.0.logic_operation", "prefix"),
            Check::equals(RULE, "action.0.category", "log"),
        ]))
        .import(ImportStep::new(RULE))
        .import(ImportStep::new(POLICY));

    passes(&harness, &case).await;
    assert_eq!(cloud.calls("create_rule"), 1);
    assert_eq!(cloud.calls("update_rule"), 1);
}

fn alarm(enabled: bool) -> Json {
    json!({
        "resources": [{
            "type": "flexibleengine_ces_alarmrule",
            "name": "alarm_1",
            "attributes": {
                "alarm_name": "acc_alarm_1",
                "metric": [{
                    "namespace": "SYS.ECS",
                    "metric_name": "network_outgoing_bytes_rate_inband",
                    "dimensions": [{"name": "instance_id", "value": "0b5c3e2f"}]
                }],
                "condition": [{
                    "period": 300,
                    "filter": "average",
                    "comparison_operator": ">",
                    "value": 6,
                    "unit": "B/s",
                    "count": 1
                }],
                "alarm_actions": [{
                    "type": "notification",
                    "notification_list": ["urn:smn:eu-west-0:acc-topic"]
                }],
                "alarm_enabled": enabled
            }
        }]
    })
}

#[tokio::test]
async fn ces_alarm_rule_enable_disable() {
    let (harness, cloud) = harness();
    let case = TestCase::new("ces_alarmrule")
        .step(TestStep::new(document(alarm(true))).checks([
            Check::equals(ALARM, "alarm_enabled", true),
            Check::equals(ALARM, "alarm_level", 2),
            Check::equals(ALARM, "metric.0.dimensions.0.name", "instance_id"),
            Check::set(ALARM, "alarm_state"),
        ]))
        .step(TestStep::new(document(alarm(false))).checks([
            Check::equals(ALARM, "alarm_enabled", false),
            Check::exists_where(ALARM, |s| s.get("alarm_enabled") == Some(Value::Bool(false))),
        ]))
        .step(
            TestStep::new(document(alarm(true)))
                .check(Check::equals(ALARM, "alarm_enabled", true)),
        )
        .import(ImportStep::new(ALARM));

    passes(&harness, &case).await;
    assert_eq!(cloud.calls("set_alarm_enabled"), 2);
    assert_eq!(cloud.calls("update_alarm"), 0);
}

fn network(n: u8, cidr: &str, gateway: &str) -> [Json; 4] {
    [
        json!({
            "type": "flexibleengine_vpc_v1",
            "name": format!("vpc_{}", n),
            "attributes": {"name": format!("acc-vpc-{}", n), "cidr": cidr}
        }),
        json!({
            "type": "flexibleengine_vpc_subnet_v1",
            "name": format!("subnet_{}", n),
            "attributes": {
                "name": format!("acc-subnet-{}", n),
                "cidr": cidr.replace(".0.0/16", ".0.0/24"),
                "gateway_ip": gateway,
                "vpc_id": format!("${{flexibleengine_vpc_v1.vpc_{}.id}}", n)
            }
        }),
        json!({
            "type": "flexibleengine_er_vpc_attachment",
            "name": format!("attachment_{}", n),
            "attributes": {
                "name": format!("acc-attachment-{}", n),
                "instance_id": "${flexibleengine_er_instance.er_1.id}",
                "vpc_id": format!("${{flexibleengine_vpc_v1.vpc_{}.id}}", n),
                "subnet_id": format!("${{flexibleengine_vpc_subnet_v1.subnet_{}.id}}", n)
            }
        }),
        json!({
            "type": "flexibleengine_er_route_table",
            "name": format!("table_{}", n),
            "attributes": {
                "name": format!("acc-route-table-{}", n),
                "instance_id": "${flexibleengine_er_instance.er_1.id}"
            }
        }),
    ]
}

fn router(route: Json) -> Json {
    let mut resources = vec![json!({
        "type": "flexibleengine_er_instance",
        "name": "er_1",
        "attributes": {
            "name": "acc-er",
            "asn": 64512,
            "availability_zones": ["eu-west-0a"]
        }
    })];
    resources.extend(network(1, "192.168.0.0/16", "192.168.0.1"));
    resources.extend(network(2, "172.16.0.0/16", "172.16.0.1"));
    resources.push(json!({
        "type": "flexibleengine_er_static_route",
        "name": "route_1",
        "attributes": route
    }));
    json!({"resources": resources})
}

#[tokio::test]
async fn er_static_route_blackhole_toggle() {
    let (harness, cloud) = harness();
    let forwarding = json!({
        "route_table_id": "${flexibleengine_er_route_table.table_1.id}",
        "destination": "172.16.0.0/16",
        "next_hop": "${flexibleengine_er_vpc_attachment.attachment_2.id}"
    });
    let blackhole = json!({
        "route_table_id": "${flexibleengine_er_route_table.table_1.id}",
        "destination": "172.16.0.0/16",
        "is_blackhole": true
    });
    let attachment = "flexibleengine_er_vpc_attachment.attachment_2";

    let case = TestCase::new("er_static_route")
        .step(TestStep::new(document(router(forwarding.clone()))).checks([
            Check::pair(ROUTE, "next_hop", attachment, "id"),
            Check::pair(attachment, "vpc_id", "flexibleengine_vpc_v1.vpc_2", "id"),
            Check::equals(ROUTE, "is_blackhole", false),
            Check::equals(ROUTE, "type", "static"),
            Check::equals(ROUTE, "status", "available"),
            Check::set("flexibleengine_er_route_table.table_2", "id"),
        ]))
        .step(TestStep::new(document(router(blackhole))).checks([
            Check::absent(ROUTE, "next_hop"),
            Check::equals(ROUTE, "is_blackhole", true),
            Check::exists_where(ROUTE, |s| s.get("is_blackhole") == Some(Value::Bool(true))),
        ]))
        .step(TestStep::new(document(router(forwarding))).check(Check::pair(
            ROUTE,
            "next_hop",
            attachment,
            "id",
        )))
        .import(ImportStep::new(ROUTE))
        .import(
            ImportStep::new("flexibleengine_er_route_table.table_1").with_id(|state| {
                let instance = state.get("instance_id")?;
                Some(format!("{}/{}", instance.as_str()?, state.identifier.as_deref()?))
            }),
        );

    passes(&harness, &case).await;
    assert_eq!(cloud.calls("create_static_route"), 1);
    assert_eq!(cloud.calls("update_static_route"), 2);
    assert!(!harness.is_live());
}
