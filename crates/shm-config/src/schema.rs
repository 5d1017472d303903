// Configuration schema for the admission pipeline's tunables.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub top: TopSection,
    #[serde(default)]
    pub brute: BruteSection,
    #[serde(default)]
    pub journal: JournalSection,
    #[serde(default)]
    pub sessions: SessionsSection,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            top: TopSection::default(),
            brute: BruteSection::default(),
            journal: JournalSection::default(),
            sessions: SessionsSection::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopSection {
    #[serde(default = "default_max_handlers")]
    pub max_handlers_for_user: usize,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_web_server_name")]
    pub web_server_name: String,
    #[serde(default)]
    pub cache_lifetime: u32,
}

impl Default for TopSection {
    fn default() -> Self {
        Self {
            max_handlers_for_user: default_max_handlers(),
            version: default_version(),
            web_server_name: default_web_server_name(),
            cache_lifetime: 0,
        }
    }
}

fn default_max_handlers() -> usize {
    30
}
fn default_version() -> String {
    "0.1.1alpha".to_string()
}
fn default_web_server_name() -> String {
    "SHM API server".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BruteSection {
    #[serde(default = "default_block_attempts")]
    pub block_attempts: u32,
    #[serde(default = "default_ban_time")]
    pub ban_time: i64,
}

impl Default for BruteSection {
    fn default() -> Self {
        Self {
            block_attempts: default_block_attempts(),
            ban_time: default_ban_time(),
        }
    }
}

fn default_block_attempts() -> u32 {
    10
}
fn default_ban_time() -> i64 {
    600
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DataEncoding {
    #[serde(rename = "mspack")]
    Mspack,
    #[serde(rename = "json")]
    Json,
}

impl Default for DataEncoding {
    fn default() -> Self {
        DataEncoding::Mspack
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalSection {
    #[serde(default = "default_journal_path")]
    pub path: String,
    #[serde(default = "default_bucket")]
    pub bucket_for_operations: String,
    #[serde(default = "default_capacity")]
    pub capacity: i64,
    #[serde(default)]
    pub data_encoding: DataEncoding,
}

impl Default for JournalSection {
    fn default() -> Self {
        Self {
            path: default_journal_path(),
            bucket_for_operations: default_bucket(),
            capacity: default_capacity(),
            data_encoding: DataEncoding::default(),
        }
    }
}

fn default_journal_path() -> String {
    "./db/journal.db".to_string()
}
fn default_bucket() -> String {
    "Operations".to_string()
}
fn default_capacity() -> i64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsSection {
    #[serde(default = "default_session_id_key")]
    pub session_id_key: String,
    #[serde(default = "default_session_id_key_length")]
    pub session_id_key_length: usize,
    #[serde(default = "default_session_life_time")]
    pub session_life_time: i64,
    #[serde(default = "default_strict_ip")]
    pub strict_ip: bool,
}

impl Default for SessionsSection {
    fn default() -> Self {
        Self {
            session_id_key: default_session_id_key(),
            session_id_key_length: default_session_id_key_length(),
            session_life_time: default_session_life_time(),
            strict_ip: default_strict_ip(),
        }
    }
}

fn default_session_id_key() -> String {
    "sessionID".to_string()
}
fn default_session_id_key_length() -> usize {
    24
}
fn default_session_life_time() -> i64 {
    1800
}
fn default_strict_ip() -> bool {
    true
}
