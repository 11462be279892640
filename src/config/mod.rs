use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt::Display;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// The name the server uses for itself in greetings and replies
    pub hostname: String,

    /// Text appended to the hostname in the 220 greeting
    pub banner: String,

    /// The address to bind the SMTP server to
    pub smtp_bind_address: String,

    /// The port to bind the SMTP server to
    pub smtp_port: u16,

    /// Seconds of client inactivity before the connection is dropped with a 421
    pub timeout_secs: u64,

    /// Maximum message size in bytes, advertised through the SIZE extension
    pub max_size: Option<usize>,

    /// Clients must authenticate before MAIL
    pub require_authentication: bool,

    /// Ask the policy about every MAIL FROM address
    pub validate_sender: bool,

    /// Ask the policy about every RCPT TO address
    pub validate_recipients: bool,

    /// Allow MAIL/RCPT/DATA/AUTH on a plaintext channel
    pub ignore_tls: bool,

    /// Skip the MX lookup for sender and recipient domains
    pub disable_dns_validation: bool,

    /// Perform the TLS handshake immediately on accept instead of via STARTTLS
    pub secure_connection: bool,

    /// Answer EHLO as an unknown command
    pub disable_ehlo: bool,

    /// PEM certificate chain; a self-signed certificate is generated when unset
    pub tls_cert_path: Option<String>,

    /// PEM private key matching `tls_cert_path`
    pub tls_key_path: Option<String>,

    /// Credentials accepted by the bundled logging policy
    pub auth_username: Option<String>,

    #[serde(skip_serializing)]
    pub auth_password: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            hostname: default_hostname(),
            banner: "ESMTP mail-warden".to_string(),
            smtp_bind_address: "0.0.0.0".to_string(),
            smtp_port: 2525,
            timeout_secs: 60,
            max_size: None,
            require_authentication: false,
            validate_sender: false,
            validate_recipients: false,
            ignore_tls: false,
            disable_dns_validation: false,
            secure_connection: false,
            disable_ehlo: false,
            tls_cert_path: None,
            tls_key_path: None,
            auth_username: None,
            auth_password: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (optional)
        let _ = dotenv::dotenv();

        let defaults = Config::default();

        let hostname = string_var("MAIL_WARDEN_HOSTNAME", defaults.hostname);
        let banner = string_var("MAIL_WARDEN_BANNER", defaults.banner);
        let smtp_bind_address = string_var("MAIL_WARDEN_BIND_ADDRESS", defaults.smtp_bind_address);
        let smtp_port = parsed_var("MAIL_WARDEN_PORT", defaults.smtp_port)?;
        let timeout_secs = parsed_var("MAIL_WARDEN_TIMEOUT_SECS", defaults.timeout_secs)?;

        let max_size = match env::var("MAIL_WARDEN_MAX_SIZE") {
            Ok(val) => Some(parse_value::<usize>("MAIL_WARDEN_MAX_SIZE", &val)?),
            Err(_) => None,
        };
        log::info!("Config: Using max_size: {:?}", max_size);

        let require_authentication = flag_var("MAIL_WARDEN_REQUIRE_AUTH")?;
        let validate_sender = flag_var("MAIL_WARDEN_VALIDATE_SENDER")?;
        let validate_recipients = flag_var("MAIL_WARDEN_VALIDATE_RECIPIENTS")?;
        let ignore_tls = flag_var("MAIL_WARDEN_IGNORE_TLS")?;
        let disable_dns_validation = flag_var("MAIL_WARDEN_DISABLE_DNS_VALIDATION")?;
        let secure_connection = flag_var("MAIL_WARDEN_SECURE_CONNECTION")?;
        let disable_ehlo = flag_var("MAIL_WARDEN_DISABLE_EHLO")?;

        let tls_cert_path = env::var("MAIL_WARDEN_TLS_CERT").ok();
        let tls_key_path = env::var("MAIL_WARDEN_TLS_KEY").ok();
        if tls_cert_path.is_some() != tls_key_path.is_some() {
            let err_msg = "MAIL_WARDEN_TLS_CERT and MAIL_WARDEN_TLS_KEY must be set together";
            log::error!("{}", err_msg);
            return Err(anyhow!(err_msg));
        }
        log::info!("Config: Using tls_cert_path: {:?}", tls_cert_path);

        let auth_username = env::var("MAIL_WARDEN_AUTH_USERNAME").ok();
        let auth_password = env::var("MAIL_WARDEN_AUTH_PASSWORD").ok();
        // Never log the password itself
        log::info!(
            "Config: Using auth_username: {:?} (password {})",
            auth_username,
            if auth_password.is_some() { "set" } else { "unset" }
        );

        Ok(Config {
            hostname,
            banner,
            smtp_bind_address,
            smtp_port,
            timeout_secs,
            max_size,
            require_authentication,
            validate_sender,
            validate_recipients,
            ignore_tls,
            disable_dns_validation,
            secure_connection,
            disable_ehlo,
            tls_cert_path,
            tls_key_path,
            auth_username,
            auth_password,
        })
    }

    /// Whether MAIL/RCPT/DATA/AUTH demand an encrypted channel.
    pub fn requires_tls(&self) -> bool {
        !self.ignore_tls
    }
}

fn default_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "127.0.0.1".to_string())
}

fn string_var(name: &str, default_val: String) -> String {
    env::var(name)
        .map(|val| {
            log::info!("Config: Using {} from env: {}", name, val);
            val
        })
        .unwrap_or_else(|_| {
            log::info!("Config: Using default {}: {}", name, default_val);
            default_val
        })
}

fn parsed_var<T>(name: &str, default_val: T) -> Result<T>
where
    T: FromStr + Display,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let value = match env::var(name) {
        Ok(val) => parse_value(name, &val)?,
        Err(_) => default_val,
    };
    log::info!("Config: Using {}: {}", name, value);
    Ok(value)
}

fn parse_value<T>(name: &str, val: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    val.parse::<T>().map_err(|e| {
        let err_msg = format!("{} ('{}') must be a valid number", name, val);
        log::error!("{}: {}", err_msg, e);
        anyhow!(e).context(err_msg)
    })
}

fn flag_var(name: &str) -> Result<bool> {
    let value = match env::var(name) {
        Ok(val) => match val.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" | "" => false,
            _ => {
                let err_msg = format!("{} ('{}') must be a boolean", name, val);
                log::error!("{}", err_msg);
                return Err(anyhow!(err_msg));
            }
        },
        Err(_) => false,
    };
    log::info!("Config: Using {}: {}", name, value);
    Ok(value)
}

#[cfg(test)]
mod tests;
