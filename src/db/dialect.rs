use crate::error::Error;

/// SQL dialect of a configured backend, derived from the connection URL.
///
/// Everything engine-specific (placeholder style, upsert syntax) lives here
/// so the repository layer above stays backend-agnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// Embedded file engine.
    Sqlite,
    /// Networked relational engine.
    Postgres,
    /// Embedded-server or networked engine, MariaDB included.
    MySql,
}

impl Dialect {
    pub fn from_url(url: &str) -> Result<Self, Error> {
        if url.starts_with("sqlite:") {
            Ok(Dialect::Sqlite)
        } else if url.starts_with("postgres:") || url.starts_with("postgresql:") {
            Ok(Dialect::Postgres)
        } else if url.starts_with("mysql:") || url.starts_with("mariadb:") {
            Ok(Dialect::MySql)
        } else {
            Err(Error::InvalidConfig(format!(
                "unrecognized database url scheme: {}",
                url.split(':').next().unwrap_or(url)
            )))
        }
    }

    /// Rewrite `?` placeholders into the dialect's native style.
    ///
    /// SQLite and MySQL take `?` as-is; Postgres wants numbered `$n`
    /// parameters. Repository SQL is written with `?` and passed through
    /// here before preparation.
    pub fn sql(&self, template: &str) -> String {
        match self {
            Dialect::Postgres => {
                let mut out = String::with_capacity(template.len() + 8);
                let mut n = 0u32;
                for ch in template.chars() {
                    if ch == '?' {
                        n += 1;
                        out.push('$');
                        out.push_str(&n.to_string());
                    } else {
                        out.push(ch);
                    }
                }
                out
            }
            _ => template.to_string(),
        }
    }

    /// Upsert for the player identity table; refreshes the display name and
    /// last-seen time when the uuid already exists.
    pub fn upsert_player_sql(&self) -> String {
        match self {
            Dialect::MySql => "INSERT INTO bw_players (uuid, username, last_seen_at) \
                 VALUES (?, ?, ?) \
                 ON DUPLICATE KEY UPDATE username = VALUES(username), last_seen_at = VALUES(last_seen_at)"
                .to_string(),
            _ => self.sql(
                "INSERT INTO bw_players (uuid, username, last_seen_at) \
                 VALUES (?, ?, ?) \
                 ON CONFLICT (uuid) DO UPDATE SET username = excluded.username, last_seen_at = excluded.last_seen_at",
            ),
        }
    }
}
