//! The asynchronous validation pipeline shared by `MAIL` and `RCPT`.
//!
//! After the argument has parsed, an address goes through two stages:
//! 1. MX resolution of its domain (skipped when DNS validation is disabled).
//!    A failed lookup or an empty answer rejects with `450`.
//! 2. The matching policy hook, if validation for that role is enabled.
//!    A refusal rejects with `550`, or with the hook's own reply.
//!
//! Each stage is terminal for the command; nothing is retried.

use super::address::MailPath;
use super::{Envelope, Reply, Services};
use crate::config::Config;
use log::{debug, warn};

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum AddressRole {
    Sender,
    Recipient,
}

impl AddressRole {
    fn label(self) -> &'static str {
        match self {
            AddressRole::Sender => "Sender",
            AddressRole::Recipient => "Recipient",
        }
    }

    fn table(self) -> &'static str {
        match self {
            AddressRole::Sender => "sender",
            AddressRole::Recipient => "recipient",
        }
    }

    fn hook_enabled(self, config: &Config) -> bool {
        match self {
            AddressRole::Sender => config.validate_sender,
            AddressRole::Recipient => config.validate_recipients,
        }
    }
}

/// Runs `path` through the pipeline. On success returns the normalized
/// address (domain lower-cased); on failure, the reply to send.
pub async fn validate_address(
    role: AddressRole,
    path: &MailPath,
    envelope: &Envelope,
    config: &Config,
    services: &Services,
) -> Result<String, Reply> {
    let email = &path.address;

    if !config.disable_dns_validation {
        let domain = path.domain();
        let found = match services.resolver.resolve_mx(&domain).await {
            Ok(exchanges) => !exchanges.is_empty(),
            Err(e) => {
                debug!("MX resolution for {} failed: {:#}", domain, e);
                false
            }
        };
        if !found {
            warn!("{} domain {} has no MX records", role.label(), domain);
            return Err(Reply::new(
                450,
                format!(
                    "4.1.8 <{}>: {} address rejected: Domain not found",
                    email,
                    role.label()
                ),
            ));
        }
    }

    if role.hook_enabled(config) {
        let verdict = match role {
            AddressRole::Sender => services.policy.validate_sender(envelope, email).await,
            AddressRole::Recipient => services.policy.validate_recipient(envelope, email).await,
        };
        if let Err(rejection) = verdict {
            warn!("{} <{}> refused by policy: {}", role.label(), email, rejection);
            return Err(rejection.reply().cloned().unwrap_or_else(|| {
                Reply::new(
                    550,
                    format!(
                        "5.1.1 <{}>: {} address rejected: User unknown in local {} table",
                        email,
                        role.label(),
                        role.table()
                    ),
                )
            }));
        }
    }

    Ok(path.normalized())
}
