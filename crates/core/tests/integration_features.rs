//! Feature resolution and ordering over a real workspace layout.

use godev_core::config::parse_config;
use godev_core::oci::FeatureFetcher;
use godev_core::resolver::resolve_features;

mod common;
use common::WorkspaceFixture;

const FOO: &str = r#"{"id":"foo","version":"1.0.0","name":"Foo"}"#;
const BAR: &str =
    r#"{"id":"bar","version":"1.0.0","name":"Bar","dependsOn":{"./foo":{}}}"#;
const BAZ: &str =
    r#"{"id":"baz","version":"1.0.0","name":"Baz","installsAfter":["./foo"]}"#;

fn fixture_with_foo_bar_baz(config: &str) -> WorkspaceFixture {
    let fixture = WorkspaceFixture::new(config);
    fixture.add_feature("foo", FOO);
    fixture.add_feature("bar", BAR);
    fixture.add_feature("baz", BAZ);
    fixture
}

async fn resolved_ids(fixture: &WorkspaceFixture, config: &str) -> Vec<String> {
    let cfg = parse_config(config).unwrap();
    let fetcher = FeatureFetcher::new().unwrap();
    let plan = resolve_features(&fetcher, &fixture.config_path(), fixture.root(), &cfg)
        .await
        .unwrap()
        .unwrap();
    plan.order
        .iter()
        .map(|f| f.metadata.id.clone())
        .collect()
}

#[tokio::test]
async fn test_dependency_and_installs_after_ordering() {
    let config = r#"{"image":"alpine","features":{"./foo":{},"./bar":{},"./baz":{}}}"#;
    let fixture = fixture_with_foo_bar_baz(config);
    let ids = resolved_ids(&fixture, config).await;
    assert_eq!(ids, vec!["foo", "bar", "baz"]);
}

#[tokio::test]
async fn test_override_order_commits_override_first() {
    let config = r#"{
        "image": "alpine",
        "features": {"./foo":{},"./bar":{},"./baz":{}},
        "overrideFeatureInstallOrder": ["./baz"]
    }"#;
    let fixture = fixture_with_foo_bar_baz(config);
    let ids = resolved_ids(&fixture, config).await;
    // baz's priority lets it commit as soon as foo is installed; bar follows
    assert_eq!(ids, vec!["foo", "baz", "bar"]);
}

#[tokio::test]
async fn test_override_with_unknown_feature_errors() {
    let config = r#"{
        "image": "alpine",
        "features": {"./foo":{}},
        "overrideFeatureInstallOrder": ["./ghost"]
    }"#;
    let fixture = WorkspaceFixture::new(config);
    fixture.add_feature("foo", FOO);
    let cfg = parse_config(config).unwrap();
    let fetcher = FeatureFetcher::new().unwrap();
    let err = resolve_features(&fetcher, &fixture.config_path(), fixture.root(), &cfg)
        .await
        .unwrap_err();
    assert!(format!("{}", err).contains("unknown feature: ./ghost"));
}

#[tokio::test]
async fn test_plan_is_deterministic_for_any_request_order() {
    let config_a = r#"{"image":"alpine","features":{"./foo":{},"./bar":{},"./baz":{}}}"#;
    let config_b = r#"{"image":"alpine","features":{"./baz":{},"./foo":{},"./bar":{}}}"#;
    let fixture = fixture_with_foo_bar_baz(config_a);
    let first = resolved_ids(&fixture, config_a).await;
    let second = resolved_ids(&fixture, config_b).await;
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_aggregated_contributions() {
    let config = r#"{"image":"alpine","features":{"./priv":{},"./envy":{}}}"#;
    let fixture = WorkspaceFixture::new(config);
    fixture.add_feature(
        "priv",
        r#"{
            "id": "priv", "version": "1.0.0", "name": "Priv",
            "privileged": true,
            "capAdd": ["SYS_PTRACE"],
            "securityOpt": ["seccomp=unconfined"],
            "mounts": [{"type": "volume", "source": "cache", "target": "/cache"}]
        }"#,
    );
    fixture.add_feature(
        "envy",
        r#"{
            "id": "envy", "version": "1.0.0", "name": "Envy",
            "init": true,
            "capAdd": ["SYS_PTRACE", "NET_ADMIN"],
            "containerEnv": {"FEATURE_FLAG": "on"}
        }"#,
    );

    let cfg = parse_config(config).unwrap();
    let fetcher = FeatureFetcher::new().unwrap();
    let plan = resolve_features(&fetcher, &fixture.config_path(), fixture.root(), &cfg)
        .await
        .unwrap()
        .unwrap();

    assert!(plan.privileged);
    assert_eq!(plan.init, Some(true));
    assert_eq!(plan.cap_add, vec!["SYS_PTRACE", "NET_ADMIN"]);
    assert_eq!(plan.security_opt, vec!["seccomp=unconfined"]);
    assert_eq!(plan.mounts.len(), 1);
    assert_eq!(plan.container_env["FEATURE_FLAG"], "on");
}

#[tokio::test]
async fn test_dependency_keys_distinguish_options() {
    let config = r#"{
        "image": "alpine",
        "features": {
            "./opt": {"version": "18"}
        }
    }"#;
    let with_metadata = r#"{
        "id": "opt", "version": "1.0.0", "name": "Opt",
        "options": {"version": {"type": "string", "default": "lts"}}
    }"#;
    let fixture = WorkspaceFixture::new(config);
    fixture.add_feature("opt", with_metadata);
    let cfg = parse_config(config).unwrap();
    let fetcher = FeatureFetcher::new().unwrap();
    let plan = resolve_features(&fetcher, &fixture.config_path(), fixture.root(), &cfg)
        .await
        .unwrap()
        .unwrap();
    let first_key = plan.order[0].dependency_key.clone();

    let other_config = r#"{"image":"alpine","features":{"./opt": {"version": "20"}}}"#;
    let cfg = parse_config(other_config).unwrap();
    let plan = resolve_features(&fetcher, &fixture.config_path(), fixture.root(), &cfg)
        .await
        .unwrap()
        .unwrap();
    assert_ne!(plan.order[0].dependency_key, first_key);
}
