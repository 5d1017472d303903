// Environment variable overrides.
//
// Format: SHM_<SECTION>_<KEY>, e.g. SHM_SESSIONS_STRICT_IP=false.
// Precedence is env > file > defaults (applied after load_from_file).

use std::env;

use crate::schema::Config;

pub fn apply_env_overrides(config: &mut Config) {
    if let Ok(v) = env::var("SHM_TOP_MAX_HANDLERS_FOR_USER") {
        if let Ok(n) = v.parse() {
            config.top.max_handlers_for_user = n;
        }
    }
    if let Ok(v) = env::var("SHM_TOP_VERSION") {
        config.top.version = v;
    }
    if let Ok(v) = env::var("SHM_TOP_WEB_SERVER_NAME") {
        config.top.web_server_name = v;
    }
    if let Ok(v) = env::var("SHM_TOP_CACHE_LIFETIME") {
        if let Ok(n) = v.parse() {
            config.top.cache_lifetime = n;
        }
    }

    if let Ok(v) = env::var("SHM_BRUTE_BLOCK_ATTEMPTS") {
        if let Ok(n) = v.parse() {
            config.brute.block_attempts = n;
        }
    }
    if let Ok(v) = env::var("SHM_BRUTE_BAN_TIME") {
        if let Ok(n) = v.parse() {
            config.brute.ban_time = n;
        }
    }

    if let Ok(v) = env::var("SHM_JOURNAL_PATH") {
        config.journal.path = v;
    }
    if let Ok(v) = env::var("SHM_JOURNAL_CAPACITY") {
        if let Ok(n) = v.parse() {
            config.journal.capacity = n;
        }
    }

    if let Ok(v) = env::var("SHM_SESSIONS_SESSION_ID_KEY") {
        config.sessions.session_id_key = v;
    }
    if let Ok(v) = env::var("SHM_SESSIONS_SESSION_LIFE_TIME") {
        if let Ok(n) = v.parse() {
            config.sessions.session_life_time = n;
        }
    }
    if let Ok(v) = env::var("SHM_SESSIONS_STRICT_IP") {
        if let Ok(n) = v.parse() {
            config.sessions.strict_ip = n;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_strict_ip_from_env() {
        env::set_var("SHM_SESSIONS_STRICT_IP", "false");
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert!(!cfg.sessions.strict_ip);
        env::remove_var("SHM_SESSIONS_STRICT_IP");
    }

    #[test]
    fn leaves_defaults_when_unset() {
        env::remove_var("SHM_BRUTE_BAN_TIME");
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.brute.ban_time, 600);
    }
}
