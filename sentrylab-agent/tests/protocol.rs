//! Wire contract: names, descriptors and their state payloads

use chrono::{TimeZone, Utc};
use sentrylab_agent::config::TopicSettings;
use sentrylab_agent::docker::parse_inspect;
use sentrylab_agent::entities::{metric, CONTAINER_ENTITIES, DEVICE_ENTITIES};
use sentrylab_agent::mqtt::Publish;
use sentrylab_agent::state::StatePublisher;
use sentrylab_agent::{Device, DiscoveryPublisher, GuestKind, TopicNamer, TopicRemover};
use sentrylab_devkit::{render, MockBroker};
use std::collections::HashSet;
use std::sync::Arc;

fn namer() -> TopicNamer {
    TopicNamer::new(&TopicSettings::default())
}

#[test]
fn test_namer_is_deterministic() {
    let device = Device::new("PVE1 ", 101, GuestKind::Vm, None);
    let twin = Device::new("pve1", 101, GuestKind::Vm, Some("other name"));

    for entity in DEVICE_ENTITIES.iter() {
        assert_eq!(namer().config_topic(&device, entity), namer().config_topic(&twin, entity));
        assert_eq!(namer().unique_id(&device, entity), namer().unique_id(&twin, entity));
        assert_eq!(
            namer().entity_state_topic(&device, entity),
            namer().entity_state_topic(&twin, entity)
        );
    }
}

#[test]
fn test_unique_ids_do_not_collide() {
    let namer = namer();
    let device = Device::new("pve1", 101, GuestKind::Ct, None);
    let mut ids = HashSet::new();

    for entity in DEVICE_ENTITIES.iter() {
        assert!(ids.insert(namer.unique_id(&device, entity)));
    }
    for container in ["nginx", "db.main"] {
        for entity in CONTAINER_ENTITIES.iter() {
            assert!(ids.insert(namer.container_unique_id(&device, container, entity)));
        }
    }
}

#[tokio::test]
async fn test_device_descriptor_identical_across_entities() {
    let broker = MockBroker::new();
    let discovery = DiscoveryPublisher::new(namer(), Arc::new(broker.clone()));
    let device = Device::new("pve1", 101, GuestKind::Ct, Some("web"));

    let report = discovery.publish_device(&device).await;
    assert_eq!(report.attempted, DEVICE_ENTITIES.len());

    let devices: HashSet<String> = broker
        .published()
        .iter()
        .map(|m| {
            assert!(m.retain);
            let config: serde_json::Value = serde_json::from_slice(&m.payload).unwrap();
            config["device"].to_string()
        })
        .collect();
    assert_eq!(devices.len(), 1);
}

#[tokio::test]
async fn test_state_payloads_satisfy_templates() {
    let broker = MockBroker::new();
    let mqtt: Arc<dyn Publish> = Arc::new(broker.clone());
    let states = StatePublisher::new(namer(), mqtt);
    let device = Device::new("pve1", 101, GuestKind::Ct, None);
    let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

    let containers = parse_inspect(
        r#"[{"Name":"/app","State":{"Status":"running","Running":true,"StartedAt":"2024-05-01T11:00:00Z"},"Config":{"Image":"app:2.1"}}]"#,
    )
    .unwrap();
    states.publish_summary(&device, &containers, now).await.unwrap();
    states.publish_container(&device, &containers[0], now).await.unwrap();

    let summary = broker.retained("sentrylab/pve1/101/summary").unwrap();
    let counts: Vec<String> = DEVICE_ENTITIES
        .iter()
        .filter(|e| e.state_metric == metric::SUMMARY)
        .map(|entity| render(entity.value_template, &summary).unwrap())
        .collect();
    assert_eq!(counts, vec!["1", "1", "0"]);

    let state = broker.retained("sentrylab/pve1/101/app/state").unwrap();
    let rendered: Vec<String> = CONTAINER_ENTITIES
        .iter()
        .map(|entity| render(entity.value_template, &state).unwrap())
        .collect();
    assert_eq!(rendered, vec!["True", "running", "1h 0m", "N/A", "app:2.1", "2.1"]);
}

#[test]
fn test_removal_plan_matches_discovery() {
    let namer = namer();
    let remover = TopicRemover::new(namer.clone(), Arc::new(MockBroker::new()), false);
    let device = Device::new("pve1", 101, GuestKind::Ct, None);
    let containers = vec!["nginx".to_string()];

    let plan: HashSet<String> = remover.topics_for(&device, &containers).into_iter().collect();
    for entity in DEVICE_ENTITIES.iter() {
        assert!(plan.contains(&namer.config_topic(&device, entity)));
    }
    for entity in CONTAINER_ENTITIES.iter() {
        assert!(plan.contains(&namer.container_config_topic(&device, "nginx", entity)));
    }
    assert!(plan.iter().all(|t| t.ends_with("/config")));
}

#[tokio::test]
async fn test_json_payloads_carry_every_templated_field() {
    let broker = MockBroker::new();
    let states = StatePublisher::new(namer(), Arc::new(broker.clone()));
    let device = Device::new("pve1", 101, GuestKind::Ct, None);
    let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

    let containers = parse_inspect(
        r#"[{"Name":"/app","State":{"Status":"running","Running":true,"StartedAt":"2024-05-01T11:00:00Z","Health":{"Status":"healthy"}},"Config":{"Image":"app:2.1"}}]"#,
    )
    .unwrap();
    states.publish_summary(&device, &containers, now).await.unwrap();
    states.publish_container(&device, &containers[0], now).await.unwrap();
    states
        .publish_docker(&device, &sentrylab_agent::docker::DockerInfo::unreachable())
        .await
        .unwrap();

    let payload = |topic: &str| -> serde_json::Value {
        serde_json::from_str(&broker.retained(topic).unwrap()).unwrap()
    };
    let summary = payload("sentrylab/pve1/101/summary");
    let docker = payload("sentrylab/pve1/101/docker_status");
    let state = payload("sentrylab/pve1/101/app/state");

    for entity in DEVICE_ENTITIES.iter() {
        let json = match entity.state_metric {
            metric::SUMMARY => &summary,
            metric::DOCKER_STATUS => &docker,
            _ => {
                assert!(entity.json_fields().is_empty(), "{} reads a plain payload", entity.metric);
                continue;
            }
        };
        for field in entity.json_fields() {
            assert!(json.get(field).is_some(), "{} needs {}", entity.metric, field);
        }
    }
    for entity in CONTAINER_ENTITIES.iter() {
        for field in entity.json_fields() {
            assert!(state.get(field).is_some(), "{} needs {}", entity.metric, field);
        }
    }
}
