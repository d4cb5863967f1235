use async_trait::async_trait;
use studio_types::{StudioError, StudioResult, TaskKind};

use crate::{PrepareRunOptions, PreparedRun, Runtime};

/// Container image tasks only run on the platform.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageRuntime;

#[async_trait]
impl Runtime for ImageRuntime {
    fn kind(&self) -> TaskKind {
        TaskKind::Image
    }

    fn supports_local_execution(&self) -> bool {
        false
    }

    async fn prepare_run(&self, _opts: &PrepareRunOptions) -> StudioResult<PreparedRun> {
        Err(StudioError::unsupported("cannot run image tasks locally"))
    }
}
