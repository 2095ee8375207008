//! Reconcile pass behavior against the in-memory store.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Secret, Service};
use k8s_openapi::ByteString;
use kube::api::ObjectMeta;
use search_operator::constants::{
    BACKEND_ASSOCIATION_CONF_ANNOTATION, CA_FILENAME, CERT_FILENAME, CONFIG_FILENAME,
    CONFIG_HASH_LABEL, CONTROLLER_VERSION_ANNOTATION, HTTP_PORT, KEY_FILENAME, MANAGED_ANNOTATION,
};
use search_operator::controller::association::{Association, AssociationResolver};
use search_operator::controller::certificates::{
    parse_certificate, CertRotation, CertificateAuthority, RotationParams,
};
use search_operator::controller::events::{EventRecorder, FakeRecorder};
use search_operator::controller::reconciler::{
    Outcome, ReconcileError, Reconciler, ReconcilerParams, SpecValidator, ValidationError,
};
use search_operator::controller::store::{MemoryStore, Object, ObjectKey, Store};
use search_operator::controller::watches::{WatchRegistry, SECRET_KIND};
use search_operator::crd::{
    BackendRef, SearchService, SearchServiceSpec, SecretRef, SelfSignedCertificate,
    SubjectAlternativeName,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

const NAMESPACE: &str = "default";
const NAME: &str = "sample";

struct Harness {
    ctx: Reconciler<MemoryStore>,
    events: Arc<FakeRecorder>,
    key: ObjectKey,
}

impl Harness {
    fn new() -> Self {
        Self::with_params(ReconcilerParams::default())
    }

    fn with_params(params: ReconcilerParams) -> Self {
        let events = Arc::new(FakeRecorder::default());
        let recorder: Arc<dyn EventRecorder> = events.clone();
        let ctx = Reconciler::new(MemoryStore::new(), params, recorder);
        Self {
            ctx,
            events,
            key: ObjectKey::new(NAMESPACE, NAME),
        }
    }

    fn store(&self) -> &MemoryStore {
        &self.ctx.store
    }

    async fn create_owner(&self, spec: SearchServiceSpec) -> SearchService {
        self.create_owner_with(spec, BTreeMap::new()).await
    }

    async fn create_owner_with(
        &self,
        spec: SearchServiceSpec,
        annotations: BTreeMap<String, String>,
    ) -> SearchService {
        let owner = SearchService {
            metadata: ObjectMeta {
                name: Some(NAME.to_string()),
                namespace: Some(NAMESPACE.to_string()),
                annotations: Some(annotations),
                ..ObjectMeta::default()
            },
            spec,
            status: None,
        };
        self.store().create(&owner).await.expect("create owner")
    }

    async fn owner(&self) -> SearchService {
        self.store()
            .get(&self.key)
            .await
            .expect("get owner")
            .expect("owner exists")
    }

    async fn update_spec(&self, f: impl FnOnce(&mut SearchServiceSpec)) {
        let mut owner = self.owner().await;
        f(&mut owner.spec);
        self.store().update(&owner).await.expect("update owner");
    }

    async fn get<K: Object>(&self, name: &str) -> K {
        self.store()
            .get(&ObjectKey::new(NAMESPACE, name))
            .await
            .expect("get")
            .unwrap_or_else(|| panic!("{name} exists"))
    }

    async fn reconcile(&self) -> Outcome {
        self.ctx.reconcile(&self.key).await.expect("reconcile succeeds")
    }
}

fn spec(version: &str, count: i32) -> SearchServiceSpec {
    SearchServiceSpec {
        version: version.to_string(),
        count: Some(count),
        ..SearchServiceSpec::default()
    }
}

fn data(secret: &Secret, key: &str) -> String {
    secret
        .data
        .as_ref()
        .and_then(|d| d.get(key))
        .map(|v| String::from_utf8_lossy(&v.0).into_owned())
        .unwrap_or_default()
}

fn config_hash(deployment: &Deployment) -> String {
    deployment
        .spec
        .as_ref()
        .and_then(|s| s.template.metadata.as_ref())
        .and_then(|m| m.labels.as_ref())
        .and_then(|l| l.get(CONFIG_HASH_LABEL))
        .cloned()
        .unwrap_or_default()
}

fn user_secret(name: &str, entries: &[(&str, &str)]) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(NAMESPACE.to_string()),
            ..ObjectMeta::default()
        },
        data: Some(
            entries
                .iter()
                .map(|(k, v)| ((*k).to_string(), ByteString(v.as_bytes().to_vec())))
                .collect(),
        ),
        ..Secret::default()
    }
}

#[tokio::test]
async fn test_first_pass_creates_every_dependent() {
    let h = Harness::new();
    h.create_owner(spec("7.7.0", 3)).await;

    let outcome = h.reconcile().await;
    assert!(outcome.requeue_after.is_some_and(|d| !d.is_zero()));

    let service: Service = h.get("sample-search-http").await;
    let ports = service.spec.and_then(|s| s.ports).unwrap_or_default();
    assert_eq!(ports.first().map(|p| p.port), Some(HTTP_PORT));

    let ca: Secret = h.get("sample-search-http-ca-internal").await;
    assert!(!data(&ca, CERT_FILENAME).is_empty());
    assert!(!data(&ca, KEY_FILENAME).is_empty());

    let internal: Secret = h.get("sample-search-http-certs-internal").await;
    assert!(!data(&internal, CERT_FILENAME).is_empty());
    assert!(!data(&internal, KEY_FILENAME).is_empty());

    let public: Secret = h.get("sample-search-http-certs-public").await;
    assert_eq!(data(&public, CERT_FILENAME), data(&internal, CERT_FILENAME));
    assert!(!data(&public, CA_FILENAME).is_empty());
    assert!(data(&public, KEY_FILENAME).is_empty());

    let config: Secret = h.get("sample-search-config").await;
    assert!(data(&config, CONFIG_FILENAME).contains("external_url:"));

    let deployment: Deployment = h.get("sample-search").await;
    assert_eq!(deployment.spec.as_ref().and_then(|s| s.replicas), Some(3));
    assert!(!config_hash(&deployment).is_empty());

    let owner = h.owner().await;
    assert!(owner
        .metadata
        .annotations
        .as_ref()
        .is_some_and(|a| a.contains_key(CONTROLLER_VERSION_ANNOTATION)));
    assert_eq!(owner.status.and_then(|s| s.service).as_deref(), Some("sample-search-http"));
}

#[tokio::test]
async fn test_second_pass_writes_nothing() {
    let h = Harness::new();
    h.create_owner(spec("7.7.0", 3)).await;
    h.reconcile().await;

    let deployment_before: Deployment = h.get("sample-search").await;
    let config_before: Secret = h.get("sample-search-config").await;
    let writes = h.store().write_count();

    h.reconcile().await;

    assert_eq!(h.store().write_count(), writes);
    let deployment_after: Deployment = h.get("sample-search").await;
    let config_after: Secret = h.get("sample-search-config").await;
    assert_eq!(deployment_after, deployment_before);
    assert_eq!(config_after, config_before);
}

#[tokio::test]
async fn test_drift_is_repaired() {
    let h = Harness::new();
    h.create_owner(spec("7.7.0", 3)).await;
    h.reconcile().await;

    let mut deployment: Deployment = h.get("sample-search").await;
    if let Some(spec) = deployment.spec.as_mut() {
        spec.replicas = Some(2);
    }
    h.store().update(&deployment).await.expect("revert replicas");

    let mut config: Secret = h.get("sample-search-config").await;
    config.data = None;
    h.store().update(&config).await.expect("clear config");

    let mut internal: Secret = h.get("sample-search-http-certs-internal").await;
    internal.data = None;
    h.store().update(&internal).await.expect("clear certificates");

    h.reconcile().await;

    let deployment: Deployment = h.get("sample-search").await;
    assert_eq!(deployment.spec.as_ref().and_then(|s| s.replicas), Some(3));
    let config: Secret = h.get("sample-search-config").await;
    assert!(data(&config, CONFIG_FILENAME).contains("external_url:"));
    let internal: Secret = h.get("sample-search-http-certs-internal").await;
    assert!(!data(&internal, CERT_FILENAME).is_empty());
    assert!(!data(&internal, KEY_FILENAME).is_empty());
}

#[tokio::test]
async fn test_deleted_dependents_are_recreated() {
    let h = Harness::new();
    h.create_owner(spec("7.7.0", 1)).await;
    h.reconcile().await;

    h.store()
        .delete::<Service>(&ObjectKey::new(NAMESPACE, "sample-search-http"))
        .await
        .expect("delete service");
    h.store()
        .delete::<Secret>(&ObjectKey::new(NAMESPACE, "sample-search-http-certs-public"))
        .await
        .expect("delete public secret");

    h.reconcile().await;

    let _: Service = h.get("sample-search-http").await;
    let public: Secret = h.get("sample-search-http-certs-public").await;
    assert!(!data(&public, CERT_FILENAME).is_empty());
}

#[tokio::test]
async fn test_config_hash_follows_rendered_config() {
    let h = Harness::new();
    h.create_owner(spec("7.7.0", 1)).await;
    h.reconcile().await;
    let initial: Deployment = h.get("sample-search").await;

    // Replica changes leave the bundle untouched
    h.update_spec(|s| s.count = Some(2)).await;
    h.reconcile().await;
    let scaled: Deployment = h.get("sample-search").await;
    assert_eq!(config_hash(&scaled), config_hash(&initial));

    h.update_spec(|s| {
        s.config
            .insert("logging.level".to_string(), "debug".to_string());
    })
    .await;
    h.reconcile().await;
    let configured: Deployment = h.get("sample-search").await;
    assert_ne!(config_hash(&configured), config_hash(&scaled));
    let config: Secret = h.get("sample-search-config").await;
    assert!(data(&config, CONFIG_FILENAME).contains("logging.level: debug"));
}

#[tokio::test]
async fn test_config_ref_changes_roll_the_deployment() {
    let h = Harness::new();
    h.store()
        .create(&user_secret("user-config", &[(CONFIG_FILENAME, "feature:\n  enabled: true\n")]))
        .await
        .expect("create user config");
    let mut with_ref = spec("7.7.0", 1);
    with_ref.config_ref = Some(SecretRef {
        secret_name: "user-config".to_string(),
    });
    h.create_owner(with_ref).await;
    h.reconcile().await;

    let config: Secret = h.get("sample-search-config").await;
    assert!(data(&config, CONFIG_FILENAME).contains("feature.enabled: true"));
    let before: Deployment = h.get("sample-search").await;

    let mut user: Secret = h.get("user-config").await;
    user.data = user_secret("user-config", &[(CONFIG_FILENAME, "feature:\n  enabled: false\n")]).data;
    h.store().update(&user).await.expect("update user config");
    h.reconcile().await;

    let after: Deployment = h.get("sample-search").await;
    assert_ne!(config_hash(&after), config_hash(&before));
}

#[tokio::test]
async fn test_watches_match_referenced_secrets() {
    let h = Harness::new();
    h.store()
        .create(&user_secret("user-config", &[(CONFIG_FILENAME, "a: b\n")]))
        .await
        .expect("create user config");
    h.store()
        .create(&user_secret(
            "user-tls",
            &[(CERT_FILENAME, "CERT"), (KEY_FILENAME, "KEY")],
        ))
        .await
        .expect("create user certificate");

    let mut referencing = spec("7.7.0", 1);
    referencing.config_ref = Some(SecretRef {
        secret_name: "user-config".to_string(),
    });
    referencing.http.tls.certificate = Some(SecretRef {
        secret_name: "user-tls".to_string(),
    });
    h.create_owner(referencing).await;

    let outcome = h.reconcile().await;
    assert_eq!(
        h.ctx.watches.watched_secret_names(&h.key),
        BTreeSet::from(["user-config".to_string(), "user-tls".to_string()])
    );
    let internal: Secret = h.get("sample-search-http-certs-internal").await;
    assert_eq!(data(&internal, CERT_FILENAME), "CERT");
    // Only the CA drives rotation when the leaf is user-provided
    assert!(outcome.requeue_after.is_some());

    h.update_spec(|s| s.http.tls.certificate = None).await;
    h.reconcile().await;
    assert_eq!(
        h.ctx.watches.watched_secret_names(&h.key),
        BTreeSet::from(["user-config".to_string()])
    );

    h.update_spec(|s| s.config_ref = None).await;
    h.reconcile().await;
    assert!(h.ctx.watches.watched_secret_names(&h.key).is_empty());
}

#[tokio::test]
async fn test_absent_owner_clears_watches() {
    let h = Harness::new();
    h.store()
        .create(&user_secret("user-config", &[(CONFIG_FILENAME, "a: b\n")]))
        .await
        .expect("create user config");
    let mut referencing = spec("7.7.0", 1);
    referencing.config_ref = Some(SecretRef {
        secret_name: "user-config".to_string(),
    });
    h.create_owner(referencing).await;
    h.reconcile().await;
    assert!(!h.ctx.watches.registrations().is_empty());

    h.store()
        .delete::<SearchService>(&h.key)
        .await
        .expect("delete owner");
    let outcome = h.reconcile().await;

    assert_eq!(outcome, Outcome::done());
    assert!(h.ctx.watches.registrations().is_empty());
    assert!(h.ctx.watches.watched_secret_names(&h.key).is_empty());
}

#[tokio::test]
async fn test_unresolved_backend_waits_with_one_event() {
    let h = Harness::new();
    let mut with_backend = spec("7.7.0", 1);
    with_backend.backend_ref = Some(BackendRef {
        name: "backend".to_string(),
        namespace: None,
    });
    h.create_owner(with_backend).await;

    let outcome = h.reconcile().await;

    assert_eq!(outcome, Outcome::done());
    assert_eq!(
        h.events.events(),
        vec!["Warning AssociationError Search backend is not configured".to_string()]
    );
    assert_eq!(h.store().count::<Deployment>(), 0);
}

#[tokio::test]
async fn test_resolved_backend_is_rendered() {
    let h = Harness::new();
    h.store()
        .create(&user_secret("backend-user", &[("search-user", "s3cret")]))
        .await
        .expect("create credentials");
    let mut with_backend = spec("7.7.0", 1);
    with_backend.backend_ref = Some(BackendRef {
        name: "backend".to_string(),
        namespace: None,
    });
    h.create_owner_with(
        with_backend,
        BTreeMap::from([(
            BACKEND_ASSOCIATION_CONF_ANNOTATION.to_string(),
            r#"{"url":"https://backend-http.default.svc:9200","authSecretName":"backend-user","authSecretKey":"search-user"}"#
                .to_string(),
        )]),
    )
    .await;

    h.reconcile().await;

    let config: Secret = h.get("sample-search-config").await;
    let rendered = data(&config, CONFIG_FILENAME);
    assert!(rendered.contains("https://backend-http.default.svc:9200"));
    assert!(rendered.contains("backend.password: s3cret"));
    assert!(h.events.events().is_empty());
}

#[tokio::test]
async fn test_missing_version_is_rejected_with_event() {
    let h = Harness::new();
    h.create_owner(spec("", 1)).await;

    let error = h.ctx.reconcile(&h.key).await.expect_err("validation fails");

    assert!(matches!(error, ReconcileError::Validation(_)));
    let message = error.to_string();
    assert!(message.contains("spec.version"), "{message}");
    assert_eq!(
        h.events.events(),
        vec![format!("Warning Validation {message}")]
    );
    assert_eq!(h.store().count::<Service>(), 0);
}

#[tokio::test]
async fn test_missing_config_ref_is_an_error() {
    let h = Harness::new();
    let mut referencing = spec("7.7.0", 1);
    referencing.config_ref = Some(SecretRef {
        secret_name: "absent".to_string(),
    });
    h.create_owner(referencing).await;

    let error = h.ctx.reconcile(&h.key).await.expect_err("reference missing");

    assert!(matches!(error, ReconcileError::MissingReference { .. }));
    assert_eq!(h.events.events().len(), 1);
    let owner = h.owner().await;
    assert_eq!(
        owner
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(CONTROLLER_VERSION_ANNOTATION)),
        Some(&h.ctx.params.controller_version)
    );
}

#[tokio::test]
async fn test_missing_config_ref_is_watched_until_created() {
    let h = Harness::new();
    let mut referencing = spec("7.7.0", 1);
    referencing.config_ref = Some(SecretRef {
        secret_name: "later".to_string(),
    });
    h.create_owner(referencing).await;

    h.ctx.reconcile(&h.key).await.expect_err("reference missing");
    assert_eq!(
        h.ctx.watches.owners_of(SECRET_KIND, &ObjectKey::new(NAMESPACE, "later")),
        vec![h.key.clone()]
    );

    h.store()
        .create(&user_secret("later", &[(CONFIG_FILENAME, "a: b\n")]))
        .await
        .expect("create user config");
    h.reconcile().await;

    let config: Secret = h.get("sample-search-config").await;
    assert!(data(&config, CONFIG_FILENAME).contains("a: b"));
}

#[tokio::test]
async fn test_unmanaged_owner_is_left_alone() {
    let h = Harness::new();
    h.create_owner_with(
        spec("7.7.0", 1),
        BTreeMap::from([(MANAGED_ANNOTATION.to_string(), "false".to_string())]),
    )
    .await;
    let writes = h.store().write_count();

    assert_eq!(h.reconcile().await, Outcome::done());
    assert_eq!(h.store().write_count(), writes);
    assert_eq!(h.store().count::<Deployment>(), 0);
}

struct StaticResolver(Association);

impl AssociationResolver for StaticResolver {
    fn resolve(&self, _owner: &SearchService) -> Association {
        self.0.clone()
    }
}

struct RejectAll;

impl SpecValidator for RejectAll {
    fn validate(&self, _resource: &SearchService) -> Result<SearchServiceSpec, ValidationError> {
        Err(ValidationError::new("spec.count", "3", "rejected"))
    }
}

#[tokio::test]
async fn test_injected_collaborators_are_used() {
    let registry = Arc::new(WatchRegistry::new());
    let recorder: Arc<dyn EventRecorder> = Arc::new(FakeRecorder::default());
    let ctx = Reconciler::new(MemoryStore::new(), ReconcilerParams::default(), recorder)
        .with_watches(registry.clone())
        .with_association(Arc::new(StaticResolver(Association::Unresolved)));
    let key = ObjectKey::new(NAMESPACE, NAME);
    ctx.store
        .create(&SearchService::new(NAME, spec("7.7.0", 1)))
        .await
        .expect("create owner");

    // The resolver reports a pending backend even though the spec references none
    assert_eq!(ctx.reconcile(&key).await.expect("reconcile"), Outcome::done());
    assert_eq!(ctx.store.count::<Deployment>(), 0);
    assert!(Arc::ptr_eq(&ctx.watches, &registry));

    let rejecting = Reconciler::new(
        MemoryStore::new(),
        ReconcilerParams::default(),
        Arc::new(FakeRecorder::default()),
    )
    .with_validator(Arc::new(RejectAll));
    rejecting
        .store
        .create(&SearchService::new(NAME, spec("7.7.0", 1)))
        .await
        .expect("create owner");
    let error = rejecting.reconcile(&key).await.expect_err("rejected");
    assert!(error.to_string().contains("spec.count"));
}

const CA_SECRET: &str = "sample-search-http-ca-internal";
const INTERNAL_SECRET: &str = "sample-search-http-certs-internal";
const PUBLIC_SECRET: &str = "sample-search-http-certs-public";

fn days(n: u64) -> Duration {
    Duration::from_secs(n * 24 * 3600)
}

async fn overwrite_data(h: &Harness, name: &str, key: &str, value: &str) {
    let mut secret: Secret = h.get(name).await;
    secret
        .data
        .get_or_insert_with(BTreeMap::new)
        .insert(key.to_string(), ByteString(value.as_bytes().to_vec()));
    h.store().update(&secret).await.expect("overwrite secret data");
}

fn stored_ca(secret: &Secret) -> CertificateAuthority {
    CertificateAuthority::from_pem(&data(secret, CERT_FILENAME), &data(secret, KEY_FILENAME))
        .expect("stored CA loads")
}

#[tokio::test]
async fn test_ca_inside_rotation_margin_is_replaced() {
    let h = Harness::new();
    h.create_owner(spec("7.7.0", 1)).await;
    h.reconcile().await;
    let leaf_before = data(&h.get::<Secret>(INTERNAL_SECRET).await, CERT_FILENAME);

    let expiring = CertificateAuthority::generate(
        "expiring",
        &RotationParams {
            validity: Duration::from_secs(3600),
            rotate_before: Duration::ZERO,
        },
    )
    .expect("CA should generate");
    overwrite_data(&h, CA_SECRET, CERT_FILENAME, expiring.cert_pem()).await;
    overwrite_data(&h, CA_SECRET, KEY_FILENAME, expiring.key_pem()).await;

    h.reconcile().await;

    let ca_secret: Secret = h.get(CA_SECRET).await;
    assert_ne!(data(&ca_secret, CERT_FILENAME), expiring.cert_pem());
    let ca = stored_ca(&ca_secret);
    assert!(ca.not_after() > expiring.not_after());

    let internal: Secret = h.get(INTERNAL_SECRET).await;
    let leaf = data(&internal, CERT_FILENAME);
    assert_ne!(leaf, leaf_before);
    assert!(ca.signed(&leaf));
    assert_eq!(data(&internal, CA_FILENAME), ca.cert_pem());

    let public: Secret = h.get(PUBLIC_SECRET).await;
    assert_eq!(data(&public, CERT_FILENAME), leaf);
    assert_eq!(data(&public, CA_FILENAME), ca.cert_pem());

    let writes = h.store().write_count();
    h.reconcile().await;
    assert_eq!(h.store().write_count(), writes);
}

#[tokio::test]
async fn test_ca_with_drifted_key_is_regenerated_once() {
    let h = Harness::new();
    h.create_owner(spec("7.7.0", 1)).await;
    h.reconcile().await;
    let ca_before = data(&h.get::<Secret>(CA_SECRET).await, CERT_FILENAME);

    let foreign = CertificateAuthority::generate(
        "foreign",
        &ReconcilerParams::default().cert_rotation.ca,
    )
    .expect("CA should generate");
    overwrite_data(&h, CA_SECRET, KEY_FILENAME, foreign.key_pem()).await;
    h.update_spec(|s| {
        s.http.tls.self_signed_certificate = Some(SelfSignedCertificate {
            subject_alt_names: vec![SubjectAlternativeName {
                dns: Some("search.example.com".to_string()),
                ip: None,
            }],
        });
    })
    .await;

    h.reconcile().await;

    let ca_secret: Secret = h.get(CA_SECRET).await;
    assert_ne!(data(&ca_secret, CERT_FILENAME), ca_before);
    let ca = stored_ca(&ca_secret);
    assert!(ca.signed(&data(&h.get::<Secret>(INTERNAL_SECRET).await, CERT_FILENAME)));

    let writes = h.store().write_count();
    h.reconcile().await;
    assert_eq!(h.store().write_count(), writes);
}

#[tokio::test]
async fn test_san_changes_reissue_the_leaf() {
    let h = Harness::new();
    h.create_owner(spec("7.7.0", 1)).await;
    h.reconcile().await;
    let ca_before = data(&h.get::<Secret>(CA_SECRET).await, CERT_FILENAME);

    h.update_spec(|s| {
        s.http.tls.self_signed_certificate = Some(SelfSignedCertificate {
            subject_alt_names: vec![SubjectAlternativeName {
                dns: Some("search.example.com".to_string()),
                ip: None,
            }],
        });
    })
    .await;
    h.reconcile().await;

    let leaf = data(&h.get::<Secret>(INTERNAL_SECRET).await, CERT_FILENAME);
    let sans = parse_certificate(&leaf).expect("leaf parses").sans;
    assert!(sans.contains("search.example.com"));
    assert_eq!(data(&h.get::<Secret>(PUBLIC_SECRET).await, CERT_FILENAME), leaf);

    let mut service: Service = h.get("sample-search-http").await;
    if let Some(spec) = service.spec.as_mut() {
        spec.external_ips = Some(vec!["203.0.113.9".to_string()]);
    }
    h.store().update(&service).await.expect("add external ip");
    h.reconcile().await;

    let reissued = data(&h.get::<Secret>(INTERNAL_SECRET).await, CERT_FILENAME);
    assert_ne!(reissued, leaf);
    let sans = parse_certificate(&reissued).expect("leaf parses").sans;
    assert!(sans.contains("203.0.113.9"));
    assert!(sans.contains("search.example.com"));
    assert_eq!(data(&h.get::<Secret>(PUBLIC_SECRET).await, CERT_FILENAME), reissued);

    // The CA is untouched by leaf changes
    assert_eq!(data(&h.get::<Secret>(CA_SECRET).await, CERT_FILENAME), ca_before);
}

#[tokio::test]
async fn test_requeue_targets_the_leaf_rotation_deadline() {
    let rotation = CertRotation {
        ca: RotationParams {
            validity: days(365),
            rotate_before: days(1),
        },
        cert: RotationParams {
            validity: days(30),
            rotate_before: days(2),
        },
    };
    let h = Harness::with_params(ReconcilerParams {
        cert_rotation: rotation,
        ..ReconcilerParams::default()
    });
    h.create_owner(spec("7.7.0", 1)).await;

    let outcome = h.reconcile().await;

    let leaf = data(&h.get::<Secret>(INTERNAL_SECRET).await, CERT_FILENAME);
    let not_after = parse_certificate(&leaf).expect("leaf parses").not_after;
    let expected = (rotation.cert.deadline(not_after) - chrono::Utc::now())
        .to_std()
        .expect("deadline in the future");
    let requeue = outcome.requeue_after.expect("requeue scheduled");
    let skew = requeue.abs_diff(expected);
    assert!(skew <= Duration::from_secs(5), "requeue {requeue:?} vs {expected:?}");
}
