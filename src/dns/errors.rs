//! Error types for listener grouping, server construction and upstream dialing

use std::error::Error;
use std::fmt;
use std::io;

/// Error raised while building listeners or talking to upstreams
#[derive(Debug)]
pub enum DnsError {
    /// Network I/O errors, mostly from dialing an upstream
    Network(NetworkError),
    /// An address or setting could not be understood
    Configuration(ConfigError),
}

#[derive(Debug)]
pub struct NetworkError {
    pub kind: NetworkErrorKind,
    pub endpoint: Option<String>,
    pub source: Option<io::Error>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkErrorKind {
    ConnectionRefused,
    ConnectionTimeout,
    AddressUnresolved,
    BindFailed,
    TlsHandshakeFailed,
    Other,
}

#[derive(Debug)]
pub struct ConfigError {
    pub parameter: String,
    pub value: String,
    pub reason: String,
    pub suggestion: String,
}

impl fmt::Display for DnsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DnsError::Network(e) => match (&e.endpoint, &e.source) {
                (Some(endpoint), Some(source)) => {
                    write!(f, "Network error: {:?} ({}): {}", e.kind, endpoint, source)
                }
                (Some(endpoint), None) => write!(f, "Network error: {:?} ({})", e.kind, endpoint),
                (None, Some(source)) => write!(f, "Network error: {:?}: {}", e.kind, source),
                (None, None) => write!(f, "Network error: {:?}", e.kind),
            },
            DnsError::Configuration(e) => {
                write!(f, "Configuration error: {} = {} ({})", e.parameter, e.value, e.reason)
            }
        }
    }
}

impl Error for DnsError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            DnsError::Network(NetworkError { source: Some(e), .. }) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for DnsError {
    fn from(err: io::Error) -> Self {
        DnsError::Network(NetworkError {
            kind: NetworkErrorKind::from(err.kind()),
            endpoint: None,
            source: Some(err),
        })
    }
}

impl From<io::ErrorKind> for NetworkErrorKind {
    fn from(kind: io::ErrorKind) -> Self {
        match kind {
            io::ErrorKind::ConnectionRefused => NetworkErrorKind::ConnectionRefused,
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => {
                NetworkErrorKind::ConnectionTimeout
            }
            io::ErrorKind::AddrInUse | io::ErrorKind::AddrNotAvailable => {
                NetworkErrorKind::BindFailed
            }
            _ => NetworkErrorKind::Other,
        }
    }
}

impl DnsError {
    /// Shorthand for a configuration error on a single parameter
    pub fn config(parameter: &str, value: &str, reason: impl Into<String>) -> Self {
        DnsError::Configuration(ConfigError {
            parameter: parameter.to_string(),
            value: value.to_string(),
            reason: reason.into(),
            suggestion: String::new(),
        })
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, DnsError::Configuration(_))
    }

    pub fn network_kind(&self) -> Option<NetworkErrorKind> {
        match self {
            DnsError::Network(e) => Some(e.kind),
            _ => None,
        }
    }
}

/// Result type alias for DNS operations
pub type DnsResult<T> = Result<T, DnsError>;

/// Builder for creating detailed error contexts
pub struct ErrorContext {
    error: DnsError,
}

impl ErrorContext {
    pub fn network(kind: NetworkErrorKind) -> Self {
        ErrorContext {
            error: DnsError::Network(NetworkError {
                kind,
                endpoint: None,
                source: None,
            }),
        }
    }

    /// Wrap an I/O error, keeping its kind mapping
    pub fn io(err: io::Error) -> Self {
        ErrorContext { error: err.into() }
    }

    pub fn config(parameter: &str, value: &str) -> Self {
        ErrorContext {
            error: DnsError::config(parameter, value, ""),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        if let DnsError::Network(ref mut e) = self.error {
            e.endpoint = Some(endpoint.into());
        }
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        if let DnsError::Configuration(ref mut e) = self.error {
            e.reason = reason.into();
        }
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        if let DnsError::Configuration(ref mut e) = self.error {
            e.suggestion = suggestion.into();
        }
        self
    }

    pub fn build(self) -> DnsError {
        self.error
    }
}
