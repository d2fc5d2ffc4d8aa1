use std::sync::Arc;
use std::time::Duration;

use crate::credential::pool::CookiePool;
use crate::credential::session::SessionCookies;
use crate::extractor::manifest::Quality;
use crate::extractor::pipeline::ExtractionPipeline;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) pipeline: Arc<ExtractionPipeline>,
    pub(crate) pool: Arc<CookiePool>,
    pub(crate) session: Arc<SessionCookies>,
    pub(crate) default_quality: Quality,
    /// Upper bound for one extraction, from `pipeline_timeout`.
    pub(crate) pipeline_timeout: Duration,
}
