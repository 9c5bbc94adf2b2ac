//! Connection lifecycle stages.
//!
//! A freshly accepted socket starts in [`Stage::Connection`]; each frame it
//! sends advances the stage machine by at most one step, in order
//! `Connection -> Rsa -> Aes -> Online`. An already-named connection that
//! re-enters `Rsa` (to refresh its session key) skips back to `Online`
//! directly once the new key is in place, rather than repeating `Aes`.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Connection,
    Rsa,
    Aes,
    Online,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Connection => "connection",
            Stage::Rsa => "rsa",
            Stage::Aes => "aes",
            Stage::Online => "online",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn displays_lowercase_name() {
        assert_eq!(Stage::Connection.to_string(), "connection");
        assert_eq!(Stage::Online.to_string(), "online");
    }
}
