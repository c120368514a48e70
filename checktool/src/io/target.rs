//! Parsing of `--target` values.

use std::fmt;
use std::str::FromStr;

/// Where probes are executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// The machine checktool runs on.
    Local,
    /// `ssh://[user@]host[:port]`
    Ssh {
        user: Option<String>,
        host: String,
        port: Option<u16>,
    },
    /// `container:<id>`
    Container { id: String },
}

impl Target {
    /// `[user@]host` as passed to `ssh`.
    pub fn ssh_destination(&self) -> Option<String> {
        match self {
            Target::Ssh { user, host, .. } => Some(match user {
                Some(user) => format!("{user}@{host}"),
                None => host.clone(),
            }),
            _ => None,
        }
    }
}

impl FromStr for Target {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();
        if raw == "local" {
            return Ok(Target::Local);
        }
        if let Some(id) = raw.strip_prefix("container:") {
            if id.is_empty() || id.starts_with('-') || id.chars().any(char::is_whitespace) {
                return Err(format!("invalid container id in target '{raw}'"));
            }
            return Ok(Target::Container { id: id.to_string() });
        }
        if let Some(rest) = raw.strip_prefix("ssh://") {
            return parse_ssh(rest).map_err(|reason| format!("invalid ssh target '{raw}': {reason}"));
        }
        Err(format!(
            "unknown target '{raw}' (expected local, ssh://[user@]host[:port] or container:<id>)"
        ))
    }
}

fn parse_ssh(rest: &str) -> Result<Target, String> {
    let rest = rest.trim_end_matches('/');
    let (user, host_port) = match rest.rsplit_once('@') {
        Some((user, host_port)) => {
            if user.is_empty() {
                return Err("empty user".to_string());
            }
            (Some(user.to_string()), host_port)
        }
        None => (None, rest),
    };

    let (host, port) = if let Some(bracketed) = host_port.strip_prefix('[') {
        let (host, after) = bracketed
            .split_once(']')
            .ok_or_else(|| "unterminated '['".to_string())?;
        let port = match after.strip_prefix(':') {
            Some(port) => Some(parse_port(port)?),
            None if after.is_empty() => None,
            None => return Err(format!("unexpected '{after}' after host")),
        };
        (host, port)
    } else {
        match host_port.split_once(':') {
            Some((host, port)) => (host, Some(parse_port(port)?)),
            None => (host_port, None),
        }
    };

    if host.is_empty() {
        return Err("empty host".to_string());
    }
    if host.starts_with('-') || host.chars().any(char::is_whitespace) {
        return Err(format!("invalid host '{host}'"));
    }
    Ok(Target::Ssh {
        user,
        host: host.to_string(),
        port,
    })
}

fn parse_port(raw: &str) -> Result<u16, String> {
    match raw.parse::<u16>() {
        Ok(0) | Err(_) => Err(format!("invalid port '{raw}'")),
        Ok(port) => Ok(port),
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Local => f.write_str("local"),
            Target::Ssh { user, host, port } => {
                f.write_str("ssh://")?;
                if let Some(user) = user {
                    write!(f, "{user}@")?;
                }
                if host.contains(':') {
                    write!(f, "[{host}]")?;
                } else {
                    f.write_str(host)?;
                }
                if let Some(port) = port {
                    write!(f, ":{port}")?;
                }
                Ok(())
            }
            Target::Container { id } => write!(f, "container:{id}"),
        }
    }
}
