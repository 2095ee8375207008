//! # Constants
//!
//! Annotation keys, label keys, naming suffixes and runtime defaults shared
//! across the operator.

/// Field manager / reporter name used for writes and events
pub const CONTROLLER_NAME: &str = "search-operator";

/// Annotation carrying the version of the operator that last reconciled the resource
pub const CONTROLLER_VERSION_ANNOTATION: &str = "search.microscaler.io/controller-version";

/// Annotation that disables reconciliation when set to "false"
pub const MANAGED_ANNOTATION: &str = "search.microscaler.io/managed";

/// Annotation holding the sorted, comma-joined set of remote links created for the resource
pub const MANAGED_REMOTE_LINKS_ANNOTATION: &str = "search.microscaler.io/managed-remote-links";

/// Annotation written by the association controller once the backend is resolvable
pub const BACKEND_ASSOCIATION_CONF_ANNOTATION: &str =
    "association.search.microscaler.io/backend-conf";

/// Label identifying the owning SearchService on every dependent
pub const NAME_LABEL: &str = "search.microscaler.io/name";

/// Label identifying the kind of workload
pub const TYPE_LABEL: &str = "common.microscaler.io/type";

/// Value of [`TYPE_LABEL`] for search service dependents
pub const TYPE_LABEL_VALUE: &str = "search-service";

/// Pod template label carrying the configuration bundle content hash
pub const CONFIG_HASH_LABEL: &str = "search.microscaler.io/config-hash";

/// Deployment label carrying the hash of the desired deployment spec
pub const TEMPLATE_HASH_LABEL: &str = "search.microscaler.io/template-hash";

/// Labels on remote trust secrets pointing back at the owner
pub const REMOTE_OWNER_NAME_LABEL: &str = "search.microscaler.io/remote-owner-name";
pub const REMOTE_OWNER_NAMESPACE_LABEL: &str = "search.microscaler.io/remote-owner-namespace";

/// Prefix shared by every dependent name: `<owner>-search`
pub const NAME_SEGMENT: &str = "search";

/// HTTP port exposed by the search service
pub const HTTP_PORT: i32 = 3002;

/// Name of the HTTP port on the service and container
pub const HTTP_PORT_NAME: &str = "https";

/// Key of the configuration file in the configuration secret
pub const CONFIG_FILENAME: &str = "search.yml";

/// Container name in the pod template
pub const CONTAINER_NAME: &str = "search-service";

/// Mount paths inside the search service container
pub const CONFIG_MOUNT_PATH: &str = "/usr/share/search/config";
pub const HTTP_CERTS_MOUNT_PATH: &str = "/mnt/search/http-certs";

/// Secret data keys
pub const CERT_FILENAME: &str = "tls.crt";
pub const KEY_FILENAME: &str = "tls.key";
pub const CA_FILENAME: &str = "ca.crt";

/// Oldest search service version the operator can manage
pub const MIN_SUPPORTED_VERSION: (u64, u64, u64) = (7, 7, 0);

/// Default container image repository (tag is the spec version)
pub const DEFAULT_IMAGE_REPOSITORY: &str = "docker.io/microscaler/search-service";

/// Certificate lifetimes (Kubernetes duration format)
pub const DEFAULT_CA_CERT_VALIDITY: &str = "365d";
pub const DEFAULT_CA_CERT_ROTATE_BEFORE: &str = "24h";
pub const DEFAULT_CERT_VALIDITY: &str = "365d";
pub const DEFAULT_CERT_ROTATE_BEFORE: &str = "24h";

/// Events kept in the recorder buffer before the oldest are dropped
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 128;

/// HTTP server for metrics and probes
pub const DEFAULT_METRICS_PORT: u16 = 8080;
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;

/// Requeue after an optimistic-concurrency conflict
pub const DEFAULT_CONFLICT_REQUEUE_SECS: u64 = 1;

/// Fibonacci backoff bounds for reconciliation errors (minutes)
pub const BACKOFF_MIN_MINUTES: u64 = 1;
pub const BACKOFF_MAX_MINUTES: u64 = 10;

/// Delay before a failed watch stream is restarted
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 5;
