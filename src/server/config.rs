use super::RequestsLoggingLevel;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub requests_logging_level: RequestsLoggingLevel,
    pub port: u16,
    /// Separate listener for `/metrics`; disabled when `None`
    pub metrics_port: Option<u16>,
    /// Reported in `GET /` and in `connected` frames
    pub server_version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            requests_logging_level: RequestsLoggingLevel::Path,
            port: 3001,
            metrics_port: None,
            server_version: env!("APP_VERSION").to_string(),
        }
    }
}
