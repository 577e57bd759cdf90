use thiserror::Error;

/// Failures setting up a node connection.
#[derive(Error, Debug)]
pub enum RpcError {
    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("cannot read {path}: {source}")]
    CredentialsFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The node config file lacks `rpcuser=` or `rpcpassword=`.
    #[error("node config does not contain an rpc {0}")]
    MissingCredential(&'static str),

    #[error("no rpc credentials configured and no node config file found")]
    NoCredentials,

    #[error("http client: {0}")]
    Http(#[from] reqwest::Error),
}
