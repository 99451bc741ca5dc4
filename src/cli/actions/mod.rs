pub mod server;

mod run;

#[derive(Debug)]
pub enum Action {
    Server(server::Args),
}

impl Action {
    /// # Errors
    /// Returns whatever the action fails with.
    pub async fn execute(self) -> anyhow::Result<()> {
        run::execute(self).await
    }
}
