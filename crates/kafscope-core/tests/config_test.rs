//! Configuration documents on disk.

use kafscope_core::config::{
    AppConfig, ClusterProfile, ConfigIo, SaslConfig, SaslMechanism, SaslSecurityProtocol,
    SchemaRegistryConfig, SecurityProtocol, TlsConfig, YamlConfigStore,
};
use kafscope_core::ClientError;

fn sasl_profile(name: &str) -> ClusterProfile {
    let mut profile = ClusterProfile::new(name, vec!["broker-1:9093".into(), "broker-2:9093".into()]);
    profile.color = "#ff8800".into();
    profile.sasl = Some(SaslConfig {
        username: "svc".into(),
        password: "hunter2".into(),
        mechanism: SaslMechanism::ScramSha512,
        security_protocol: None,
    });
    profile.schema_registry = Some(SchemaRegistryConfig {
        url: "https://registry:8081".into(),
        username: Some("svc".into()),
        password: Some("hunter2".into()),
        tls: None,
        timeout_secs: Some(30),
    });
    profile
}

#[test]
fn test_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let store = YamlConfigStore::new(dir.path().join("kafscope").join("config.yaml"));

    let mut config = AppConfig {
        plain_fonts: true,
        ..AppConfig::default()
    };
    config.upsert_cluster(sasl_profile("prod")).unwrap();
    config
        .upsert_cluster(ClusterProfile::new("local", vec!["localhost:9092".into()]))
        .unwrap();
    store.save(&config).unwrap();

    let loaded = store.load().unwrap();
    assert_eq!(loaded, config);
    assert_eq!(loaded.active_cluster().unwrap().name, "prod");
    assert!(loaded.plain_fonts);
}

#[test]
fn test_kebab_case_document() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    std::fs::write(
        &path,
        r#"
plain-fonts: false
clusters:
  - name: staging
    bootstrap-servers: ["kafka:9092"]
    active: true
    operation-timeout-secs: 3
    sasl:
      username: app
      password: secret
      mechanism: PLAIN
      security-protocol: PLAINTEXT
    schema-registry:
      url: http://registry:8081
  - name: secure
    bootstrap-servers: ["kafka:9093"]
    tls:
      skip-verify: true
"#,
    )
    .unwrap();

    let config = YamlConfigStore::new(&path).load().unwrap();
    let staging = config.cluster("staging").unwrap();
    assert_eq!(staging.operation_timeout().as_secs(), 3);
    assert_eq!(
        staging.sasl.as_ref().unwrap().security_protocol,
        Some(SaslSecurityProtocol::Plaintext)
    );
    assert_eq!(staging.security_protocol(), SecurityProtocol::SaslPlaintext);
    assert!(staging.schema_registry.is_some());

    let secure = config.cluster("secure").unwrap();
    let tls = secure.tls.as_ref().unwrap();
    assert!(tls.enabled);
    assert!(tls.skip_verify);
    assert_eq!(secure.security_protocol(), SecurityProtocol::Ssl);
    assert!(!secure.active);
}

#[test]
fn test_load_rejects_two_active_clusters() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    std::fs::write(
        &path,
        "clusters:\n  - {name: a, bootstrap-servers: [\"a:9092\"], active: true}\n  - {name: b, bootstrap-servers: [\"b:9092\"], active: true}\n",
    )
    .unwrap();
    let err = YamlConfigStore::new(&path).load().unwrap_err();
    assert!(matches!(err, ClientError::Configuration(ref m) if m.contains("exactly one")));
}

#[test]
fn test_save_rejects_invalid_profile() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    let mut profile = ClusterProfile::new("mtls", vec!["kafka:9093".into()]);
    profile.tls = Some(TlsConfig {
        cert_path: Some("/etc/kafscope/client.pem".into()),
        ..TlsConfig::default()
    });
    profile.active = true;
    let config = AppConfig {
        clusters: vec![profile],
        plain_fonts: false,
    };

    let err = YamlConfigStore::new(&path).save(&config).unwrap_err();
    assert!(matches!(err, ClientError::Configuration(_)));
    assert!(!path.exists());
}

#[test]
fn test_switching_active_cluster_persists() {
    let dir = tempfile::tempdir().unwrap();
    let store = YamlConfigStore::new(dir.path().join("config.yaml"));
    let mut config = AppConfig::default();
    config.upsert_cluster(sasl_profile("a")).unwrap();
    config.upsert_cluster(sasl_profile("b")).unwrap();
    config.set_active("b").unwrap();
    store.save(&config).unwrap();

    let mut loaded = store.load().unwrap();
    assert_eq!(loaded.active_cluster().unwrap().name, "b");
    loaded.remove_cluster("b").unwrap();
    assert_eq!(loaded.active_cluster().unwrap().name, "a");
    store.save(&loaded).unwrap();
    assert_eq!(store.load().unwrap().clusters.len(), 1);
}
