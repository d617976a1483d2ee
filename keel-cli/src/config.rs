//! CLI configuration

#[derive(Debug, Clone)]
pub struct Config {
    /// URL of the Keel server used by remote commands
    pub server_url: String,
}
