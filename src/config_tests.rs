use std::collections::HashMap;

use super::*;

fn config(pairs: &[(&str, &str)]) -> anyhow::Result<ServerConfig> {
    let env: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
    ServerConfig::from_lookup(|key| env.get(key).cloned())
}

#[test]
fn defaults_when_nothing_is_set() {
    let cfg = config(&[]).unwrap();
    assert_eq!(cfg, ServerConfig::default());
    assert_eq!(cfg.http_addr.to_string(), DEFAULT_HTTP_ADDR);
    assert_eq!(cfg.store.max_versions, 10);
    assert_eq!(cfg.system_subjects, vec!["system"]);
}

#[test]
fn reads_every_variable() {
    let cfg = config(&[
        ("STATESMAN_HTTP_ADDR", "127.0.0.1:9999"),
        ("STATESMAN_BACKEND", "FS"),
        ("STATESMAN_DATA_DIR", "/var/lib/statesman"),
        ("STATESMAN_OBJECT_PREFIX", "tenants/acme"),
        ("STATESMAN_MAX_VERSIONS", "3"),
        ("STATESMAN_SYSTEM_SUBJECTS", "system, ci-bot ,,"),
        ("STATESMAN_DEFAULT_ORG", "acme"),
        ("STATESMAN_WORKERS", "8"),
        ("STATESMAN_QUEUE_CAPACITY", "16"),
        ("STATESMAN_INDEX_SNAPSHOT", "/tmp/index.json"),
        ("STATESMAN_MAX_BODY_BYTES", "1024"),
    ])
    .unwrap();
    assert_eq!(cfg.http_addr.port(), 9999);
    assert_eq!(cfg.backend, Backend::Fs);
    assert_eq!(cfg.data_dir, PathBuf::from("/var/lib/statesman"));
    assert_eq!(cfg.object_prefix, "tenants/acme");
    assert_eq!(cfg.store.max_versions, 3);
    assert_eq!(cfg.system_subjects, vec!["system", "ci-bot"]);
    assert_eq!(cfg.default_org, "acme");
    assert_eq!((cfg.workers, cfg.queue_capacity, cfg.max_body_bytes), (8, 16, 1024));
    assert_eq!(cfg.index_snapshot, Some(PathBuf::from("/tmp/index.json")));
}

#[test]
fn max_versions_alias_and_fallbacks() {
    assert_eq!(config(&[("OPENTACO_MAX_VERSIONS", "4")]).unwrap().store.max_versions, 4);
    assert_eq!(config(&[("STATESMAN_MAX_VERSIONS", "6"), ("OPENTACO_MAX_VERSIONS", "4")]).unwrap().store.max_versions, 6);
    assert_eq!(config(&[("STATESMAN_MAX_VERSIONS", "0")]).unwrap().store.max_versions, 10);
    assert_eq!(config(&[("STATESMAN_MAX_VERSIONS", "lots")]).unwrap().store.max_versions, 10);
    assert_eq!(config(&[("STATESMAN_WORKERS", "-2")]).unwrap().workers, DEFAULT_WORKERS);
}

#[test]
fn rejects_bad_addr_and_backend() {
    assert!(config(&[("STATESMAN_HTTP_ADDR", "not-an-addr")]).is_err());
    let err = config(&[("STATESMAN_BACKEND", "s3")]).unwrap_err();
    assert!(err.to_string().contains("s3"));
}
