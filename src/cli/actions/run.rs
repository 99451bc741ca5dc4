use crate::cli::actions::{Action, server};
use anyhow::Result;

/// Run `action` to completion.
///
/// # Errors
/// Propagates the failure of the action itself.
pub async fn execute(action: Action) -> Result<()> {
    match action {
        Action::Server(args) => server::execute(args).await,
    }
}
