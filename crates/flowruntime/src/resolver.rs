use async_trait::async_trait;
use flowcore::{FlowDefinition, FlowError};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;

/// URI prefix of definitions registered in-process.
pub const RESOURCE_PREFIX: &str = "res://flow:";
/// URI prefix of definitions loaded from JSON files.
pub const FILE_PREFIX: &str = "file://";

/// Maps flow URIs to shared, immutable definitions.
#[async_trait]
pub trait FlowResolver: Send + Sync {
    async fn get_flow(&self, uri: &str) -> Result<Option<Arc<FlowDefinition>>, FlowError>;

    /// Resource definitions are bound to an action once, at construction.
    fn is_resource(&self, uri: &str) -> bool {
        uri.starts_with(RESOURCE_PREFIX)
    }
}

/// Default resolver: registered resources plus lazily loaded, cached files.
pub struct FlowManager {
    resources: RwLock<HashMap<String, Arc<FlowDefinition>>>,
    files: RwLock<HashMap<String, Arc<FlowDefinition>>>,
}

impl FlowManager {
    pub fn new() -> Self {
        Self {
            resources: RwLock::new(HashMap::new()),
            files: RwLock::new(HashMap::new()),
        }
    }

    /// Register a definition; it becomes reachable as `res://flow:<id>`.
    pub async fn register_resource(
        &self,
        id: impl Into<String>,
        definition: FlowDefinition,
    ) -> Result<String, FlowError> {
        definition.validate()?;
        let uri = format!("{}{}", RESOURCE_PREFIX, id.into());
        tracing::info!("Registering flow resource: {}", uri);
        self.resources
            .write()
            .await
            .insert(uri.clone(), Arc::new(definition));
        Ok(uri)
    }

    async fn load_file(&self, uri: &str, path: &str) -> Result<Arc<FlowDefinition>, FlowError> {
        if let Some(def) = self.files.read().await.get(uri) {
            return Ok(def.clone());
        }

        let definition = Arc::new(load_definition(path).await?);
        let mut files = self.files.write().await;
        // Another run may have loaded it meanwhile; keep the first copy.
        Ok(files.entry(uri.to_string()).or_insert(definition).clone())
    }
}

impl Default for FlowManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FlowResolver for FlowManager {
    async fn get_flow(&self, uri: &str) -> Result<Option<Arc<FlowDefinition>>, FlowError> {
        if uri.starts_with(RESOURCE_PREFIX) {
            return Ok(self.resources.read().await.get(uri).cloned());
        }

        if let Some(path) = uri.strip_prefix(FILE_PREFIX) {
            return self.load_file(uri, path).await.map(Some);
        }

        Err(FlowError::Resolution(format!("unsupported flow URI: {}", uri)))
    }
}

/// Read and validate a JSON flow definition.
pub async fn load_definition(path: impl AsRef<Path>) -> Result<FlowDefinition, FlowError> {
    let path = path.as_ref();
    tracing::debug!("Loading flow definition from {}", path.display());
    let json = tokio::fs::read_to_string(path).await?;
    let definition: FlowDefinition = serde_json::from_str(&json)?;
    definition.validate()?;
    Ok(definition)
}
