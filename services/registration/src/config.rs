use std::net::SocketAddr;

use anyhow::{bail, Context, Result};

use crate::balance::{SolidarityConfig, DEFAULT_SOLI_AMOUNT};
use crate::db::DbConfig;

/// Storage backend selected at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Postgres,
    Memory,
}

impl StoreKind {
    fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "postgres" => Ok(StoreKind::Postgres),
            "memory" => Ok(StoreKind::Memory),
            other => bail!("FESTREG_STORE must be 'postgres' or 'memory', got '{other}'"),
        }
    }
}

/// Settings the request handlers read.
#[derive(Debug, Clone)]
pub struct AppSettings {
    pub solidarity: SolidarityConfig,
    pub jwt_secret: String,
    /// Shared password that gates self-registration.
    pub site_password: String,
    /// Username of the protected super admin.
    pub super_admin: String,
    pub admin_password: String,
    /// Base of links that hit this API (verification).
    pub api_base_url: String,
    /// Base of links into the web frontend (password reset, redirects).
    pub frontend_base_url: String,
    /// Marks the session cookie `Secure`.
    pub production: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            solidarity: SolidarityConfig::default(),
            jwt_secret: "testing_secret".to_string(),
            site_password: "schoenfeld_wird_supa".to_string(),
            super_admin: "p@p.com".to_string(),
            admin_password: "TEST_PASSWORD".to_string(),
            api_base_url: "http://localhost:8080".to_string(),
            frontend_base_url: "http://localhost:5173".to_string(),
            production: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub log_level: String,
    pub dev_mode: bool,
    pub store: StoreKind,
    pub database: DbConfig,
    pub app: AppSettings,
}

fn flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| v == "1" || v.to_lowercase() == "true")
        .unwrap_or(false)
}

fn string_or(name: &str, default: String) -> String {
    std::env::var(name).unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let listen_addr = std::env::var("FESTREG_LISTEN_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
            .parse()
            .context("FESTREG_LISTEN_ADDR is not a socket address")?;

        let log_level = std::env::var("FESTREG_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let dev_mode = flag("FESTREG_DEV");

        let store = match std::env::var("FESTREG_STORE") {
            Ok(kind) => StoreKind::parse(&kind)?,
            Err(_) => StoreKind::Postgres,
        };

        let global_amount = match std::env::var("FESTREG_SOLI_AMOUNT") {
            Ok(v) => v
                .parse()
                .with_context(|| format!("FESTREG_SOLI_AMOUNT '{v}' is not an integer"))?,
            Err(_) => DEFAULT_SOLI_AMOUNT,
        };

        let defaults = AppSettings::default();
        let app = AppSettings {
            solidarity: SolidarityConfig { global_amount },
            jwt_secret: string_or("FESTREG_JWT_SECRET", defaults.jwt_secret),
            site_password: string_or("FESTREG_SITE_PASSWORD", defaults.site_password),
            super_admin: string_or("FESTREG_ADMIN_USERNAME", defaults.super_admin).to_lowercase(),
            admin_password: string_or("FESTREG_ADMIN_PASSWORD", defaults.admin_password),
            api_base_url: string_or("FESTREG_API_BASE_URL", defaults.api_base_url),
            frontend_base_url: string_or("FESTREG_FRONTEND_BASE_URL", defaults.frontend_base_url),
            production: flag("FESTREG_PRODUCTION"),
        };

        Ok(Self {
            listen_addr,
            log_level,
            dev_mode,
            store,
            database: DbConfig::from_env(),
            app,
        })
    }
}
