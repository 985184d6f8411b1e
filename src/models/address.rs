use std::path::PathBuf;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use tracing::debug;
use url::Url;

use super::Dialect;
use crate::error::PipelineError;

/// Parsed source or destination address
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    /// `file://<path>`
    File(PathBuf),
    /// `http(s)://<url>`
    Http(Url),
    /// `raw://<text>` or `raw+base64://<text>`, already decoded
    Raw(Vec<u8>),
    /// A database URL whose scheme selects the dialect
    Database(DatabaseAddress),
}

/// Database address mapped to a driver-specific connection string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseAddress {
    pub dialect: Dialect,
    pub dsn: String,
}

impl Address {
    /// Parse an address by scheme
    pub fn parse(addr: &str) -> Result<Self, PipelineError> {
        if addr.trim().is_empty() {
            return Err(PipelineError::Address("blank address".to_string()));
        }

        if let Some(path) = addr.strip_prefix("file://") {
            if path.is_empty() {
                return Err(PipelineError::Address("file address without path".to_string()));
            }
            return Ok(Address::File(PathBuf::from(path)));
        }

        if addr.starts_with("http://") || addr.starts_with("https://") {
            return Ok(Address::Http(Url::parse(addr)?));
        }

        // Checked before raw:// since it shares the prefix.
        if let Some(encoded) = addr.strip_prefix("raw+base64://") {
            let decoded = BASE64_STANDARD.decode(encoded.trim())?;
            return Ok(Address::Raw(decoded));
        }

        if let Some(text) = addr.strip_prefix("raw://") {
            return Ok(Address::Raw(text.as_bytes().to_vec()));
        }

        DatabaseAddress::parse(addr).map(Address::Database)
    }

    /// Parse an address that must point at a database
    pub fn parse_database(addr: &str) -> Result<DatabaseAddress, PipelineError> {
        match Self::parse(addr)? {
            Address::Database(db) => Ok(db),
            _ => Err(PipelineError::Address(
                "destination must be a database address".to_string(),
            )),
        }
    }

    /// Address text that is safe to log
    pub fn describe(&self) -> String {
        match self {
            Address::File(path) => format!("file://{}", path.display()),
            Address::Http(url) => mask_credentials(url.as_str()),
            Address::Raw(bytes) => format!("raw ({} bytes)", bytes.len()),
            Address::Database(db) => db.masked(),
        }
    }
}

impl DatabaseAddress {
    pub fn parse(addr: &str) -> Result<Self, PipelineError> {
        let (scheme, rest) = addr.split_once("://").ok_or_else(|| {
            PipelineError::Address("cannot recognize driver from database address".to_string())
        })?;

        let dialect = Dialect::from_scheme(scheme).ok_or_else(|| {
            PipelineError::Address(format!("unsupported address scheme: {}", scheme))
        })?;

        let dsn = match dialect {
            Dialect::MySQL => {
                mysql_params(&format!("mysql://{}", unwrap_protocol(rest)?))?
            }
            Dialect::PostgreSQL => {
                let dsn = format!("postgres://{}", rest);
                Url::parse(&dsn)?;
                dsn
            }
            Dialect::SQLite => {
                if rest.is_empty() {
                    return Err(PipelineError::Address("sqlite address without path".to_string()));
                }
                rest.to_string()
            }
            Dialect::Oracle => format!("oracle://{}", rest),
            Dialect::SqlServer => format!("sqlserver://{}", rest),
        };

        Ok(Self { dialect, dsn })
    }

    /// Connection string with the password masked, for logs
    pub fn masked(&self) -> String {
        match self.dialect {
            Dialect::SQLite => format!("sqlite://{}", self.dsn),
            _ => mask_credentials(&self.dsn),
        }
    }
}

/// Host used when a MySQL address names none, as in `root@tcp/`
const DEFAULT_MYSQL_HOST: &str = "127.0.0.1:3306";

/// Query parameters mysql_async accepts under their own names
const MYSQL_URL_PARAMS: &[&str] = &[
    "pool_min",
    "pool_max",
    "inactive_connection_ttl",
    "ttl_check_interval",
    "conn_ttl",
    "abs_conn_ttl",
    "abs_conn_ttl_jitter",
    "tcp_keepalive",
    "max_allowed_packet",
    "wait_timeout",
    "enable_cleartext_plugin",
    "reset_connection",
    "tcp_nodelay",
    "stmt_cache_size",
    "prefer_socket",
    "secure_auth",
    "client_found_rows",
    "socket",
    "compression",
    "require_ssl",
    "verify_ca",
    "verify_identity",
    "built_in_roots",
];

/// Rewrite the driver-style `user:pass@tcp(host:port)/db` into a plain URL authority
fn unwrap_protocol(rest: &str) -> Result<String, PipelineError> {
    if rest.contains("unix(") {
        return Err(PipelineError::Address(
            "unix socket MySQL addresses are not supported".to_string(),
        ));
    }

    let authority_end = rest.find(['/', '?']).unwrap_or(rest.len());
    let (authority, path) = rest.split_at(authority_end);
    let (userinfo, host) = match authority.rfind('@') {
        Some(at) => authority.split_at(at + 1),
        None => ("", authority),
    };

    let host = match host.strip_prefix("tcp(") {
        Some(inner) => inner
            .strip_suffix(')')
            .ok_or_else(|| PipelineError::Address("unterminated tcp(...) in address".to_string()))?,
        None if host == "tcp" => "",
        None => host,
    };
    let host = if host.is_empty() { DEFAULT_MYSQL_HOST } else { host };

    Ok(format!("{}{}{}", userinfo, host, path))
}

/// Translate driver-style query parameters into the ones mysql_async knows,
/// dropping the rest
fn mysql_params(dsn: &str) -> Result<String, PipelineError> {
    let mut url = Url::parse(dsn)?;
    if url.query().is_none() {
        return Ok(dsn.to_string());
    }

    let mut kept: Vec<(String, String)> = Vec::new();
    for (key, value) in url.query_pairs().into_owned() {
        match key.as_str() {
            known if MYSQL_URL_PARAMS.contains(&known) => kept.push((key, value)),
            "maxAllowedPacket" => kept.push(("max_allowed_packet".to_string(), value)),
            "clientFoundRows" => kept.push(("client_found_rows".to_string(), value)),
            "tls" => match value.as_str() {
                "true" | "preferred" => kept.push(("require_ssl".to_string(), "true".to_string())),
                "skip-verify" => {
                    kept.push(("require_ssl".to_string(), "true".to_string()));
                    kept.push(("verify_ca".to_string(), "false".to_string()));
                    kept.push(("verify_identity".to_string(), "false".to_string()));
                }
                _ => debug!("Dropped MySQL address parameter tls={}", value),
            },
            _ => debug!("Dropped MySQL address parameter {}", key),
        }
    }

    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }
    Ok(url.to_string())
}

/// Mask credentials in connection URL for safe logging
pub fn mask_credentials(url: &str) -> String {
    if let Ok(parsed_url) = Url::parse(url) {
        let mut masked = parsed_url.clone();
        if parsed_url.password().is_some() {
            let _ = masked.set_password(Some("***"));
        }
        masked.to_string()
    } else {
        "[invalid-url]".to_string()
    }
}
