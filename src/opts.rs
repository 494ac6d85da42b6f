//! Connection options.

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::PathBuf;
use std::time::Duration;


use crate::error::{Error, Result};

/// SSL connection mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslMode {
    /// Don't use SSL
    Disable,
    /// Try SSL, fall back to unencrypted if not supported
    #[default]
    Prefer,
    /// Require SSL connection
    Require,
}

/// Where a transport connects to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportTarget {
    Ipv4(Ipv4Addr, u16),
    Ipv6(Ipv6Addr, u16),
    Hostname(String, u16),
    UnixSocket(PathBuf),
}

impl std::fmt::Display for TransportTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportTarget::Ipv4(addr, port) => write!(f, "{addr}:{port}"),
            TransportTarget::Ipv6(addr, port) => write!(f, "[{addr}]:{port}"),
            TransportTarget::Hostname(host, port) => write!(f, "{host}:{port}"),
            TransportTarget::UnixSocket(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Connection options for PostgreSQL.
#[derive(Debug, Clone)]
pub struct Opts {
    /// Hostname or IP address.
    ///
    /// Default: `"localhost"`
    pub host: String,

    /// Port number for the PostgreSQL server.
    ///
    /// Default: `5432`
    pub port: u16,

    /// Unix socket path. Takes precedence over `host` and `port`.
    ///
    /// Default: `None`
    pub socket: Option<PathBuf>,

    /// Username for authentication.
    ///
    /// Default: `""`
    pub user: String,

    /// Password for authentication.
    ///
    /// Default: `None`
    pub password: Option<String>,

    /// Database name to use.
    ///
    /// Default: `None`
    pub database: Option<String>,

    /// Application name to report to the server.
    ///
    /// Default: `None`
    pub application_name: Option<String>,

    /// SSL connection mode.
    ///
    /// Default: `SslMode::Prefer`
    pub ssl_mode: SslMode,

    /// Runtime parameters sent in the startup message.
    ///
    /// Default: empty
    pub settings: BTreeMap<String, String>,

    /// When connected via TCP to loopback, upgrade to Unix socket for better performance.
    ///
    /// Default: `true`
    pub prefer_unix_socket: bool,

    /// Read and write timeout of the socket.
    ///
    /// Default: `None`
    pub io_timeout: Option<Duration>,
}

impl Default for Opts {
    fn default() -> Self {
        Self {
            host: String::from("localhost"),
            port: 5432,
            socket: None,
            user: String::new(),
            password: None,
            database: None,
            application_name: None,
            ssl_mode: SslMode::Prefer,
            settings: BTreeMap::new(),
            prefer_unix_socket: true,
            io_timeout: None,
        }
    }
}

impl Opts {
    /// Build options from key/value pairs.
    ///
    /// Keys: `user`, `password`, `database` (or `dbname`), `host`, `port`,
    /// `socket`, `application_name`, `sslmode`, `prefer_unix_socket`,
    /// `io_timeout` (seconds) and `settings.<name>`.
    ///
    /// ```
    /// let opts = postwire::Opts::from_pairs([
    ///     ("user", "app"),
    ///     ("dbname", "emp"),
    ///     ("settings.search_path", "app,public"),
    /// ])
    /// .unwrap();
    /// assert_eq!(opts.database.as_deref(), Some("emp"));
    /// ```
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut opts = Opts::default();
        for (key, value) in pairs {
            opts.set(key.as_ref(), value.as_ref())?;
        }
        Ok(opts)
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "user" => self.user = value.to_string(),
            "password" => self.password = Some(value.to_string()),
            "database" | "dbname" => self.database = Some(value.to_string()),
            "host" => self.host = value.to_string(),
            "port" => {
                self.port = value
                    .parse()
                    .map_err(|e| Error::Config(format!("invalid port {value:?}: {e}")))?;
            }
            "socket" => self.socket = Some(PathBuf::from(value)),
            "application_name" => self.application_name = Some(value.to_string()),
            "sslmode" => {
                self.ssl_mode = match value {
                    "disable" => SslMode::Disable,
                    "prefer" => SslMode::Prefer,
                    "require" => SslMode::Require,
                    _ => {
                        return Err(Error::Config(format!(
                            "invalid sslmode: expected one of ['disable', 'prefer', 'require'], got {value:?}"
                        )));
                    }
                };
            }
            "prefer_unix_socket" => {
                self.prefer_unix_socket = match value {
                    "true" | "True" | "1" | "yes" | "on" => true,
                    "false" | "False" | "0" | "no" | "off" => false,
                    _ => {
                        return Err(Error::Config(format!(
                            "invalid prefer_unix_socket: {value:?}"
                        )));
                    }
                };
            }
            "io_timeout" => {
                let secs: u64 = value
                    .parse()
                    .map_err(|e| Error::Config(format!("invalid io_timeout {value:?}: {e}")))?;
                self.io_timeout = (secs > 0).then(|| Duration::from_secs(secs));
            }
            _ => match key.strip_prefix("settings.") {
                Some(name) if !name.is_empty() => {
                    self.settings.insert(name.to_string(), value.to_string());
                }
                _ => return Err(Error::Config(format!("unknown option {key:?}"))),
            },
        }
        Ok(())
    }

    /// Resolve the transport this configuration connects to.
    pub fn target(&self) -> Result<TransportTarget> {
        if let Some(path) = &self.socket {
            return Ok(TransportTarget::UnixSocket(path.clone()));
        }
        if self.host.is_empty() {
            return Err(Error::Config("host is empty".into()));
        }
        let bare = self
            .host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(&self.host);
        Ok(match bare.parse::<IpAddr>() {
            Ok(IpAddr::V4(addr)) => TransportTarget::Ipv4(addr, self.port),
            Ok(IpAddr::V6(addr)) => TransportTarget::Ipv6(addr, self.port),
            Err(_) => TransportTarget::Hostname(self.host.clone(), self.port),
        })
    }

    /// Parameters of the StartupMessage, in send order.
    ///
    /// `settings` entries replace the built-in ones with the same name.
    pub fn startup_params(&self) -> Vec<(&str, &str)> {
        let mut params: Vec<(&str, &str)> = vec![("user", self.user.as_str())];
        if let Some(db) = &self.database {
            params.push(("database", db));
        }
        params.push(("client_encoding", "UTF8"));
        params.push(("DateStyle", "ISO, MDY"));
        if let Some(app) = &self.application_name {
            params.push(("application_name", app));
        }
        for (name, value) in &self.settings {
            match params.iter_mut().find(|(n, _)| *n == name.as_str()) {
                Some(entry) => entry.1 = value.as_str(),
                None => params.push((name.as_str(), value.as_str())),
            }
        }
        params
    }

    /// SSL mode to negotiate over `target`.
    ///
    /// Unix sockets never carry SSL. Without a TLS-enabled driver `Prefer`
    /// degrades to `Disable` and `Require` is refused before connecting.
    pub(crate) fn effective_ssl_mode(&self, target: &TransportTarget, tls_available: bool) -> Result<SslMode> {
        match (self.ssl_mode, target) {
            (_, TransportTarget::UnixSocket(_)) | (SslMode::Disable, _) => Ok(SslMode::Disable),
            (mode, _) if tls_available => Ok(mode),
            (SslMode::Prefer, _) => Ok(SslMode::Disable),
            (SslMode::Require, _) => Err(Error::Config(
                "sslmode=require needs the sync-tls or tokio-tls feature".into(),
            )),
        }
    }
}

impl TryFrom<&Opts> for Opts {
    type Error = Error;

    fn try_from(opts: &Opts) -> Result<Self> {
        Ok(opts.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_pairs() {
        let opts = Opts::from_pairs([
            ("user", "scott"),
            ("password", "tiger"),
            ("database", "emp"),
            ("host", "::1"),
            ("port", "6543"),
            ("sslmode", "disable"),
            ("prefer_unix_socket", "off"),
            ("io_timeout", "5"),
            ("settings.search_path", "hr"),
        ])
        .unwrap();
        assert_eq!(opts.user, "scott");
        assert_eq!(opts.port, 6543);
        assert_eq!(opts.ssl_mode, SslMode::Disable);
        assert!(!opts.prefer_unix_socket);
        assert_eq!(opts.io_timeout, Some(Duration::from_secs(5)));
        assert_eq!(
            opts.target().unwrap(),
            TransportTarget::Ipv6(Ipv6Addr::LOCALHOST, 6543)
        );
        assert_eq!(opts.settings.get("search_path").map(String::as_str), Some("hr"));
    }

    #[test]
    fn test_from_pairs_rejects() {
        assert!(matches!(
            Opts::from_pairs([("colour", "red")]),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            Opts::from_pairs([("port", "99999")]),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            Opts::from_pairs([("sslmode", "verify-full")]),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            Opts::from_pairs([("settings.", "x")]),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_target() {
        let mut opts = Opts::default();
        assert_eq!(
            opts.target().unwrap(),
            TransportTarget::Hostname("localhost".into(), 5432)
        );
        opts.host = "10.0.0.7".into();
        assert_eq!(
            opts.target().unwrap(),
            TransportTarget::Ipv4(Ipv4Addr::new(10, 0, 0, 7), 5432)
        );
        opts.socket = Some(PathBuf::from("/tmp/.s.PGSQL.5432"));
        assert_eq!(
            opts.target().unwrap().to_string(),
            "/tmp/.s.PGSQL.5432"
        );
    }

    #[test]
    fn test_startup_params_override() {
        let mut opts = Opts {
            user: "u".into(),
            application_name: Some("app".into()),
            ..Opts::default()
        };
        opts.settings.insert("DateStyle".into(), "ISO, DMY".into());
        opts.settings.insert("search_path".into(), "s".into());
        assert_eq!(
            opts.startup_params(),
            vec![
                ("user", "u"),
                ("client_encoding", "UTF8"),
                ("DateStyle", "ISO, DMY"),
                ("application_name", "app"),
                ("search_path", "s"),
            ]
        );
    }

    #[test]
    fn test_effective_ssl_mode() {
        let tcp = TransportTarget::Hostname("db".into(), 5432);
        let unix = TransportTarget::UnixSocket("/tmp/.s.PGSQL.5432".into());
        let mut opts = Opts::default();
        assert_eq!(opts.effective_ssl_mode(&tcp, true).unwrap(), SslMode::Prefer);
        assert_eq!(opts.effective_ssl_mode(&tcp, false).unwrap(), SslMode::Disable);
        opts.ssl_mode = SslMode::Require;
        assert_eq!(opts.effective_ssl_mode(&unix, true).unwrap(), SslMode::Disable);
        assert!(matches!(opts.effective_ssl_mode(&tcp, false), Err(Error::Config(_))));
    }
}
