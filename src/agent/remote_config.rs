use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};

/// A configuration file served by the agent's remote configuration endpoint.
///
/// # Example
///
/// ```no_run
/// use mock_agent::RemoteConfigFile;
///
/// let file = RemoteConfigFile::new(
///     "ASM_FEATURES",
///     "asm_features_activation",
///     serde_json::json!({ "asm": { "enabled": true } }),
/// );
/// ```
#[derive(Debug, Clone)]
pub struct RemoteConfigFile {
    org_id: u64,
    product: String,
    id: String,
    name: Option<String>,
    config: Value,
}

impl RemoteConfigFile {
    pub fn new(product: impl Into<String>, id: impl Into<String>, config: Value) -> Self {
        Self {
            org_id: 2,
            product: product.into(),
            id: id.into(),
            name: None,
            config,
        }
    }

    /// Overrides the organisation id. Defaults to 2.
    #[must_use]
    pub fn with_org_id(mut self, org_id: u64) -> Self {
        self.org_id = org_id;
        self
    }

    /// Overrides the file name. Defaults to the sha256 hex digest of the id.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// A stored file with its name resolved and its config serialized, ready to
/// be served.
#[derive(Debug, Clone)]
pub(crate) struct StoredConfigFile {
    org_id: u64,
    product: String,
    id: String,
    name: String,
    config: String,
}

impl From<RemoteConfigFile> for StoredConfigFile {
    fn from(file: RemoteConfigFile) -> Self {
        let name = file
            .name
            .unwrap_or_else(|| sha256_hex(file.id.as_bytes()));
        Self {
            org_id: file.org_id,
            product: file.product,
            id: file.id,
            name,
            config: file.config.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ConfigRequest {
    client: ConfigClient,
    #[serde(default)]
    cached_target_files: Vec<CachedTargetFile>,
}

#[derive(Debug, Deserialize)]
struct ConfigClient {
    #[serde(default)]
    products: Vec<String>,
    state: ClientState,
}

#[derive(Debug, Deserialize)]
struct ClientState {
    #[serde(default)]
    has_error: bool,
    #[serde(default)]
    error: String,
    #[serde(default)]
    config_states: Vec<ConfigState>,
}

#[derive(Debug, Deserialize)]
struct ConfigState {
    #[serde(default)]
    apply_error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CachedTargetFile {
    path: String,
    #[serde(default)]
    hashes: Vec<CachedHash>,
}

#[derive(Debug, Deserialize)]
struct CachedHash {
    algorithm: String,
    hash: String,
}

/// Builds the poll response for the stored files and the client's request.
///
/// Files for products the client does not subscribe to are excluded, and
/// files the client already caches (matching path and sha256 digest) are
/// skipped so they are not served more than once.
pub(crate) fn poll_response(files: &[StoredConfigFile], request: &ConfigRequest) -> Value {
    // Surface client-reported errors in the test logs.
    if request.client.state.has_error {
        tracing::warn!(error = %request.client.state.error, "remote config client reported an error");
    }
    for state in &request.client.state.config_states {
        if let Some(error) = &state.apply_error {
            tracing::warn!(error = %error, "remote config client failed to apply a config");
        }
    }

    let mut targets = serde_json::Map::new();
    let mut target_files = Vec::new();
    let mut client_configs = Vec::new();

    for file in files
        .iter()
        .filter(|file| request.client.products.contains(&file.product))
    {
        let path = format!(
            "datadog/{}/{}/{}/{}",
            file.org_id, file.product, file.id, file.name
        );
        let digest = sha256_hex(file.config.as_bytes());

        let cached = request.cached_target_files.iter().any(|cached| {
            cached.path == path
                && cached
                    .hashes
                    .iter()
                    .any(|h| h.algorithm == "sha256" && h.hash == digest)
        });
        if cached {
            continue;
        }

        targets.insert(
            path.clone(),
            json!({
                "custom": { "v": 20 },
                "hashes": { "sha256": digest },
                "length": file.config.len(),
            }),
        );
        target_files.push(json!({ "path": path, "raw": BASE64.encode(&file.config) }));
        client_configs.push(path);
    }

    if client_configs.is_empty() {
        return json!({});
    }

    // The real response also carries a `roots` property, which tracers do not
    // read and which is omitted here.
    let signed = json!({
        "signed": {
            "custom": { "opaque_backend_state": "foo" },
            "targets": Value::Object(targets),
            "version": 12345,
        }
    });

    json!({
        "targets": BASE64.encode(signed.to_string()),
        "target_files": target_files,
        "client_configs": client_configs,
    })
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}
