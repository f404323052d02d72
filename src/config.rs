//! Configuration for the PostgreSQL driver
//!
//! Provides a builder pattern for configuring the connection pool.

use std::time::Duration;

/// Configuration for [`PostgresDriver`](crate::driver::PostgresDriver)
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// PostgreSQL database URL
    pub database_url: String,
    /// Maximum number of pooled connections (default: 10)
    pub max_connections: u32,
    /// How long to wait for a free connection (default: 30s)
    pub acquire_timeout: Duration,
    /// Whether sqlx logs every executed statement at debug level
    pub log_statements: bool,
}

impl PostgresConfig {
    /// Create a new configuration builder
    pub fn builder(database_url: impl Into<String>) -> PostgresConfigBuilder {
        PostgresConfigBuilder::new(database_url)
    }
}

/// Builder for PostgresConfig
#[derive(Debug)]
pub struct PostgresConfigBuilder {
    database_url: String,
    max_connections: u32,
    acquire_timeout: Duration,
    log_statements: bool,
}

impl PostgresConfigBuilder {
    /// Create a new builder with the database URL
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            max_connections: 10,
            acquire_timeout: Duration::from_secs(30),
            log_statements: false,
        }
    }

    /// Set the pool size (default: 10, minimum: 1)
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max.max(1);
        self
    }

    /// Set the connection acquire timeout (default: 30s)
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Enable or disable statement logging (default: false)
    pub fn log_statements(mut self, enabled: bool) -> Self {
        self.log_statements = enabled;
        self
    }

    /// Build the configuration
    pub fn build(self) -> PostgresConfig {
        PostgresConfig {
            database_url: self.database_url,
            max_connections: self.max_connections,
            acquire_timeout: self.acquire_timeout,
            log_statements: self.log_statements,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // Default Tests
    // =========================================================================

    #[test]
    fn test_default_config() {
        let config = PostgresConfig::builder("postgres://localhost/test").build();

        assert_eq!(config.database_url, "postgres://localhost/test");
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.acquire_timeout, Duration::from_secs(30));
        assert!(!config.log_statements);
    }

    #[test]
    fn test_builder_accepts_string() {
        let config = PostgresConfig::builder(String::from("postgres://localhost/db")).build();
        assert_eq!(config.database_url, "postgres://localhost/db");
    }

    // =========================================================================
    // Pool Configuration Tests
    // =========================================================================

    #[test]
    fn test_max_connections() {
        let config = PostgresConfig::builder("postgres://localhost/test")
            .max_connections(3)
            .build();
        assert_eq!(config.max_connections, 3);
    }

    #[test]
    fn test_max_connections_floor() {
        let config = PostgresConfig::builder("postgres://localhost/test")
            .max_connections(0)
            .build();
        assert_eq!(config.max_connections, 1);
    }

    #[test]
    fn test_acquire_timeout() {
        let config = PostgresConfig::builder("postgres://localhost/test")
            .acquire_timeout(Duration::from_millis(250))
            .build();
        assert_eq!(config.acquire_timeout, Duration::from_millis(250));
    }

    // =========================================================================
    // Chained Builder Tests
    // =========================================================================

    #[test]
    fn test_builder_order_independence() {
        let config1 = PostgresConfig::builder("postgres://localhost/test")
            .log_statements(true)
            .max_connections(4)
            .build();

        let config2 = PostgresConfig::builder("postgres://localhost/test")
            .max_connections(4)
            .log_statements(true)
            .build();

        assert_eq!(config1.max_connections, config2.max_connections);
        assert_eq!(config1.log_statements, config2.log_statements);
    }

    #[test]
    fn test_config_debug() {
        let config = PostgresConfig::builder("postgres://localhost/test").build();
        let debug_str = format!("{:?}", config);
        assert!(debug_str.contains("PostgresConfig"));
        assert!(debug_str.contains("database_url"));
    }
}
