use thiserror::Error;

/// The core's error taxonomy: validation and compilation errors are hard
/// (abort before commit); external-resource errors are soft (logged,
/// apply proceeds with best-effort content); engine and rollback errors
/// surface the state the live ruleset was left in.
#[derive(Debug, Error)]
pub enum FirewallError {
    #[error("invalid identifier: '{0}'")]
    InvalidIdentifier(String),

    #[error("invalid CIDR or address: '{0}'")]
    InvalidCidr(String),

    #[error("country code must be exactly two letters, got '{0}'")]
    InvalidCountryCode(String),

    #[error("invalid connection-state token: '{0}'")]
    InvalidConnState(String),

    #[error("unknown managed IP list: '{0}'")]
    UnknownManagedList(String),

    #[error("ipset '{0}' sets more than one of entries/managed_list/url")]
    IpSetSourceConflict(String),

    #[error("total resolved IP-set elements ({found}) exceed the cap of {limit}")]
    IpSetCapExceeded { found: usize, limit: usize },

    #[error("policy references unknown zone '{0}'")]
    UnknownZone(String),

    #[error("scheduled rule '{0}' targets a policy that does not exist in the base config")]
    ScheduledRuleUnknownPolicy(String),

    #[error("unknown protocol: '{0}'")]
    InvalidProtocol(String),

    #[error("unknown timezone: '{0}'")]
    Timezone(String),

    #[error("invalid time string, expected HH:MM: '{0}'")]
    InvalidTime(String),

    #[error("IP list download failed for '{0}': {1}")]
    Download(String, String),

    #[error("cache corrupt at '{0}': {1}")]
    CacheCorrupt(String, String),

    #[error("derived chain name '{0}' is not a valid identifier")]
    InvalidChainName(String),

    #[error("dry-run validation failed:\n{0}")]
    ValidationEngine(String),

    #[error("commit failed:\n{0}")]
    CommitFailed(String),

    #[error("no rollback checkpoint is available")]
    NoCheckpoint,

    #[error("rollback restore failed after commit failure: commit error: {commit_err}; restore error: {restore_err}")]
    RollbackFailed {
        commit_err: String,
        restore_err: String,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, FirewallError>;
