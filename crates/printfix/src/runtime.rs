//! Process-wide wiring: one store, one registry, one orchestrator.

use std::sync::Arc;

use coordination::{JobStore, MemoryStore, RateLimiter, SharedMemoryStore};
use tracing::info;

use crate::artifacts::{ArtifactStore, FsArtifactStore};
use crate::config::PrintfixConfig;
use crate::errors::FixLoopError;
use crate::executor::FixExecutor;
use crate::integrity::SignatureValidator;
use crate::model_client::ChatPlanningModel;
use crate::orchestrator::Orchestrator;
use crate::planner::Planner;
use crate::services::{DiagnosisProvider, IntegrityValidator, Renderer};
use crate::tools::{ToolBackend, ToolRegistry};

/// External services the fix loop drives. Supplied by the embedding process.
#[derive(Clone)]
pub struct Services {
    pub diagnoser: Arc<dyn DiagnosisProvider>,
    pub renderer: Arc<dyn Renderer>,
    pub tool_backend: Arc<dyn ToolBackend>,
    /// Defaults to [`SignatureValidator`].
    pub validator: Option<Arc<dyn IntegrityValidator>>,
    /// Defaults to a [`FsArtifactStore`] under the configured storage dir.
    pub artifacts: Option<Arc<dyn ArtifactStore>>,
}

pub struct Runtime {
    pub config: PrintfixConfig,
    pub store: SharedMemoryStore,
    pub jobs: JobStore,
    pub rate_limiter: RateLimiter,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub registry: Arc<ToolRegistry>,
    pub orchestrator: Orchestrator,
}

impl Runtime {
    pub fn build(config: PrintfixConfig, services: Services) -> Result<Self, FixLoopError> {
        let store = MemoryStore::new().shared();
        let jobs = JobStore::new(store.clone(), config.job_store_config());
        let rate_limiter = RateLimiter::new(
            store.clone(),
            config.rate_limit.requests,
            config.rate_window(),
        );

        let artifacts: Arc<dyn ArtifactStore> = match services.artifacts {
            Some(artifacts) => artifacts,
            None => Arc::new(FsArtifactStore::new(&config.storage_dir)),
        };
        let validator: Arc<dyn IntegrityValidator> = match services.validator {
            Some(validator) => validator,
            None => Arc::new(SignatureValidator),
        };
        let registry = Arc::new(ToolRegistry::builtin(services.tool_backend));

        let planner = match &config.planning {
            Some(endpoint) => {
                let model = ChatPlanningModel::new(endpoint.clone(), config.ai_timeout())
                    .map_err(|e| FixLoopError::Configuration(e.to_string()))?;
                info!(url = %endpoint.url, model = %endpoint.model, "Model planning enabled");
                Planner::with_model(Arc::new(model), config.ai_timeout(), config.retry.policy())
            }
            None => Planner::rules_only(),
        };

        let executor = FixExecutor::new(
            registry.clone(),
            jobs.clone(),
            artifacts.clone(),
            services.renderer,
            validator,
        )
        .with_timeout(config.fix_timeout())
        .with_validation(config.validate_after_fix);

        let orchestrator = Orchestrator::new(
            jobs.clone(),
            artifacts.clone(),
            services.diagnoser,
            planner,
            executor,
        )
        .with_effort_presets(config.effort.clone())
        .with_retry_policy(config.retry.policy());

        Ok(Self {
            config,
            store,
            jobs,
            rate_limiter,
            artifacts,
            registry,
            orchestrator,
        })
    }
}
