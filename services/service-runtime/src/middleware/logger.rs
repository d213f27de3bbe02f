//! Logger injection
//!
//! Binds the resolved logger to the call so every event emitted while the
//! call runs, including from the handler, goes to that subscriber.

use super::chain::{CallResult, Interceptor, Next};
use super::context::CallContext;
use async_trait::async_trait;
use tracing::Dispatch;
use tracing::instrument::WithSubscriber;

/// First interceptor of every chain.
#[derive(Clone)]
pub struct LoggerInterceptor {
    logger: Dispatch,
}

impl LoggerInterceptor {
    /// Bind `logger` to every call
    #[must_use]
    pub const fn new(logger: Dispatch) -> Self {
        Self { logger }
    }
}

#[async_trait]
impl Interceptor for LoggerInterceptor {
    fn name(&self) -> &str {
        "logger"
    }

    async fn intercept(&self, mut ctx: CallContext, next: Next<'_>) -> CallResult {
        ctx.set_logger(self.logger.clone());
        next.run(ctx).with_subscriber(self.logger.clone()).await
    }
}
