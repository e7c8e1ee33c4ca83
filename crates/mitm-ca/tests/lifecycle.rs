use std::sync::Arc;

use mitm_ca::{
    ActiveCertificateService, AuthorityStatus, AuthorityStore, CertificateServiceBinding,
    LeafConfig, ManagerParts, MemoryAuthorityStore, RootCaConfig, RootCaManagerConfig,
    RootCertificateManager, TransportHook,
};
use mitm_tls::generate_root;
use x509_parser::parse_x509_certificate;

#[test]
fn file_backed_root_survives_manager_restart() {
    let dir = tempfile::tempdir().expect("temp dir");
    let config = RootCaManagerConfig {
        store_path: Some(dir.path().join("state").join("root-ca.json")),
        ..RootCaManagerConfig::default()
    };

    let first = RootCertificateManager::new(config.clone(), ManagerParts::from_config(&config))
        .expect("first manager");
    assert_eq!(
        first.ensure_active_authority(),
        AuthorityStatus::GeneratedAndBound
    );
    let first_fingerprint = first
        .active_service()
        .and_then(|service| service.current())
        .expect("bound")
        .fingerprint()
        .to_string();
    first.shutdown();
    assert!(!first.active_service().expect("service").is_bound());

    let second = RootCertificateManager::new(config.clone(), ManagerParts::from_config(&config))
        .expect("second manager");
    assert_eq!(second.ensure_active_authority(), AuthorityStatus::Bound);
    let second_fingerprint = second
        .active_service()
        .and_then(|service| service.current())
        .expect("bound")
        .fingerprint()
        .to_string();
    assert_eq!(first_fingerprint, second_fingerprint);
}

#[test]
fn corrupt_store_file_is_not_overwritten() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("root-ca.json");
    std::fs::write(&path, "{\"version\": 1").expect("seed corrupt store");
    let config = RootCaManagerConfig {
        store_path: Some(path.clone()),
        ..RootCaManagerConfig::default()
    };

    let manager =
        RootCertificateManager::new(config.clone(), ManagerParts::from_config(&config)).expect("manager");
    assert_eq!(
        manager.ensure_active_authority(),
        AuthorityStatus::Unavailable
    );
    assert_eq!(
        std::fs::read_to_string(&path).expect("read"),
        "{\"version\": 1"
    );
}

#[test]
fn exported_material_imports_into_another_manager() {
    let source_store = Arc::new(MemoryAuthorityStore::new(RootCaConfig::default()));
    let source = RootCertificateManager::new(
        RootCaManagerConfig::default(),
        ManagerParts::new(source_store.clone())
            .with_active_service(Arc::new(ActiveCertificateService::default())),
    )
    .expect("source manager");
    source.ensure_active_authority();
    let material = source.root_ca_material().expect("material");

    let dir = tempfile::tempdir().expect("temp dir");
    let bundle_path = dir.path().join("bundle.pem");
    std::fs::write(
        &bundle_path,
        format!("{}{}", material.private_key_pem, material.certificate_pem),
    )
    .expect("write bundle");

    let target_store = Arc::new(MemoryAuthorityStore::new(RootCaConfig::default()));
    let target_service = Arc::new(ActiveCertificateService::default());
    let target = RootCertificateManager::new(
        RootCaManagerConfig::default(),
        ManagerParts::new(target_store.clone()).with_active_service(Arc::clone(&target_service)),
    )
    .expect("target manager");
    target
        .import_root_certificate(&bundle_path)
        .expect("import");

    let imported = target_store.load().expect("load").expect("present");
    let original = source_store.load().expect("load").expect("present");
    assert_eq!(imported.certificate_der(), original.certificate_der());
    assert_eq!(imported.private_key_der(), original.private_key_der());
    assert_eq!(target.root_ca_material(), Some(material));

    let leaf = target_service.issue_leaf("imported.example").expect("leaf");
    let (_, root_cert) = parse_x509_certificate(original.certificate_der().as_ref()).expect("root");
    let (_, leaf_cert) =
        parse_x509_certificate(leaf.certificate.leaf_der().as_ref()).expect("leaf");
    leaf_cert
        .verify_signature(Some(root_cert.public_key()))
        .expect("leaf chains to imported root");
}

#[test]
fn binding_the_same_root_twice_is_observationally_idempotent() {
    let service = Arc::new(ActiveCertificateService::default());
    let binding = CertificateServiceBinding::new(
        Some(Arc::clone(&service) as Arc<dyn TransportHook>),
        LeafConfig::default(),
    );
    let root = Arc::new(generate_root(&RootCaConfig::default()).expect("root"));

    binding.bind(Arc::clone(&root)).expect("first bind");
    let once = service.current().expect("bound").fingerprint().to_string();
    binding.bind(Arc::clone(&root)).expect("second bind");
    let twice = service.current().expect("bound").fingerprint().to_string();

    assert_eq!(once, twice);
    assert_eq!(twice, root.fingerprint());
}

#[test]
fn explicit_generation_replaces_the_bound_root() {
    let store = Arc::new(MemoryAuthorityStore::new(RootCaConfig::default()));
    let service = Arc::new(ActiveCertificateService::default());
    let manager = RootCertificateManager::new(
        RootCaManagerConfig::default(),
        ManagerParts::new(store.clone()).with_active_service(Arc::clone(&service)),
    )
    .expect("manager");

    manager.ensure_active_authority();
    let old_leaf = service.issue_leaf("example.com").expect("old leaf");
    assert!(manager.generate_root_certificate());
    let new_leaf = service.issue_leaf("example.com").expect("new leaf");

    let current = store.load().expect("load").expect("present");
    assert_ne!(old_leaf.certificate.root_fingerprint, current.fingerprint());
    assert_eq!(new_leaf.certificate.root_fingerprint, current.fingerprint());
}
