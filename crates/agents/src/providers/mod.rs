pub mod bedrock;

use std::sync::Arc;

use {conduit_config::SessionConfig, conduit_sigv4::SharedCredentialsProvider};

use crate::{error::Result, model::LlmProvider};

pub use bedrock::BedrockProvider;

/// Build the provider for the session's configured model.
pub fn build_provider(
    session: &SessionConfig,
    credentials: SharedCredentialsProvider,
) -> Result<Arc<dyn LlmProvider>> {
    let provider = BedrockProvider::new(
        session.model_id.clone(),
        session.region.clone(),
        credentials,
    )?;
    Ok(Arc::new(provider))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use conduit_sigv4::{AwsCredentials, StaticCredentialsProvider};

    use super::*;

    #[test]
    fn provider_uses_session_model() {
        let credentials: SharedCredentialsProvider = Arc::new(StaticCredentialsProvider::new(
            AwsCredentials::new("AKID", "secret", None),
        ));
        let session = SessionConfig::default();
        let provider = build_provider(&session, credentials).unwrap();
        assert_eq!(provider.name(), "bedrock");
        assert_eq!(provider.id(), session.model_id);
    }
}
