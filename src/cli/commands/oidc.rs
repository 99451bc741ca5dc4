use clap::{Arg, ArgAction, ArgMatches, Command};

pub const ARG_OIDC_ISSUER: &str = "oidc-issuer";
pub const ARG_OIDC_CLIENT_ID: &str = "oidc-client-id";
pub const ARG_INSECURE_VERIFIER: &str = "insecure-verifier";

#[derive(Debug, Clone)]
pub struct Options {
    pub issuer: Option<String>,
    pub client_id: Option<String>,
    pub insecure: bool,
}

impl Options {
    /// Parse verifier arguments from matches.
    ///
    /// # Errors
    /// Returns an error if only one of issuer and client id is set.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let get_non_empty = |id: &str| {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|v| !v.trim().is_empty())
        };

        let issuer = get_non_empty(ARG_OIDC_ISSUER);
        let client_id = get_non_empty(ARG_OIDC_CLIENT_ID);
        if issuer.is_some() != client_id.is_some() {
            anyhow::bail!("--{ARG_OIDC_ISSUER} and --{ARG_OIDC_CLIENT_ID} must be set together");
        }

        Ok(Self {
            issuer,
            client_id,
            insecure: matches.get_flag(ARG_INSECURE_VERIFIER),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_OIDC_ISSUER)
                .long(ARG_OIDC_ISSUER)
                .help("OIDC issuer URL used for discovery")
                .long_help(
                    "OIDC issuer URL. `/.well-known/openid-configuration` and the advertised JWKS are fetched\nonce at startup; identity tokens are then verified locally.",
                )
                .env("TEXGATE_OIDC_ISSUER"),
        )
        .arg(
            Arg::new(ARG_OIDC_CLIENT_ID)
                .long(ARG_OIDC_CLIENT_ID)
                .help("Expected audience (aud) of identity tokens")
                .env("TEXGATE_OIDC_CLIENT_ID"),
        )
        .arg(
            Arg::new(ARG_INSECURE_VERIFIER)
                .long(ARG_INSECURE_VERIFIER)
                .help("Accept identity tokens without signature checks (integration tests only)")
                .env("TEXGATE_INSECURE_VERIFIER")
                .action(ArgAction::SetTrue)
                .conflicts_with(ARG_OIDC_ISSUER),
        )
}
