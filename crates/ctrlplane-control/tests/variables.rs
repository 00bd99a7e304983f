//! Variable resolution through evaluation

mod common;

use common::{test_config, Fixture};
use ctrlplane_control::EngineConfig;
use ctrlplane_store::{ReleaseStore, ReleaseTargetStore, VariableStore};
use ctrlplane_types::{
    ControlEvent, DeploymentVariable, ResourceVariable, VariableSet, VariableValue,
};
use serde_json::{json, Value};

async fn revealed(f: &Fixture, resource: &ctrlplane_types::Resource) -> Vec<(String, Value)> {
    let target = f.store.list_targets_for_resource(&resource.id).await.unwrap()[0].clone();
    let release = f
        .store
        .get_release(&target.desired_release_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    let variables = f
        .store
        .get_variable_release(&release.variable_release_id)
        .await
        .unwrap()
        .unwrap();
    f.control_plane.releases().reveal(&variables).unwrap()
}

#[tokio::test]
async fn test_resource_override_beats_system_default() {
    let f = Fixture::with_config(EngineConfig {
        encryption_key: Some("0f".repeat(32)),
        ..test_config()
    })
    .await;
    let r1 = f.resource("r1", "prod").await;
    let r2 = f.resource("r2", "prod").await;
    f.environment("e1", "prod").await;
    let d1 = f.deployment("d1").await;
    f.version(&d1, "v1.0.0").await;

    f.store
        .upsert_deployment_variable(DeploymentVariable::new(d1.id, "replicas"))
        .await
        .unwrap();
    let mut token =
        DeploymentVariable::new(d1.id, "token").with_default(VariableValue::plain("s3cret"));
    token.sensitive = true;
    f.store.upsert_deployment_variable(token).await.unwrap();
    f.store
        .upsert_variable_set(
            VariableSet::new(f.system.id, "defaults", 0)
                .with_value("replicas", VariableValue::plain(1)),
        )
        .await
        .unwrap();
    f.store
        .upsert_resource_variable(ResourceVariable {
            resource_id: r1.id,
            key: "replicas".into(),
            value: VariableValue::plain(5),
            sensitive: false,
        })
        .await
        .unwrap();

    f.control_plane
        .ingest(ControlEvent::DeploymentChanged { deployment_id: d1.id })
        .await
        .unwrap();
    f.settle().await;

    assert_eq!(
        revealed(&f, &r1).await,
        vec![
            ("replicas".to_string(), json!(5)),
            ("token".to_string(), json!("s3cret")),
        ]
    );
    assert_eq!(revealed(&f, &r2).await[0], ("replicas".to_string(), json!(1)));

    let target = f.store.list_targets_for_resource(&r1.id).await.unwrap()[0].clone();
    let release = f
        .store
        .latest_variable_release(&target.id)
        .await
        .unwrap()
        .unwrap();
    let token = release.values.iter().find(|v| v.key == "token").unwrap();
    assert!(token.sensitive);
    assert!(token.value.is_encrypted());
}

#[tokio::test]
async fn test_variable_change_creates_new_release() {
    let f = Fixture::new().await;
    let r1 = f.resource("r1", "prod").await;
    f.environment("e1", "prod").await;
    let d1 = f.deployment("d1").await;
    f.version(&d1, "v1.0.0").await;
    f.store
        .upsert_deployment_variable(
            DeploymentVariable::new(d1.id, "log_level").with_default(VariableValue::plain("info")),
        )
        .await
        .unwrap();

    f.control_plane
        .ingest(ControlEvent::ResourceUpserted { resource_id: r1.id })
        .await
        .unwrap();
    f.settle().await;

    f.store
        .upsert_resource_variable(ResourceVariable {
            resource_id: r1.id,
            key: "log_level".into(),
            value: VariableValue::plain("debug"),
            sensitive: false,
        })
        .await
        .unwrap();
    f.control_plane
        .ingest(ControlEvent::ResourceUpserted { resource_id: r1.id })
        .await
        .unwrap();
    f.settle().await;

    let jobs = f.dispatcher.dispatched();
    assert_eq!(jobs.len(), 2);
    assert_ne!(jobs[0].release_id, jobs[1].release_id);
    assert_eq!(jobs[0].version_id, jobs[1].version_id);
    assert_eq!(
        revealed(&f, &r1).await,
        vec![("log_level".to_string(), json!("debug"))]
    );
}
