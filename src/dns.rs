//! MX resolution used as a deliverability sanity check on envelope addresses.

use anyhow::{Context, Result};
use async_trait::async_trait;
use hickory_resolver::TokioResolver;
use log::debug;

/// Looks up the mail exchangers of a domain.
///
/// A lookup that fails or returns no records makes the address undeliverable
/// for the purposes of `MAIL`/`RCPT` validation.
#[async_trait]
pub trait MxResolver: Send + Sync {
    /// Returns the exchange host names, most preferred first.
    async fn resolve_mx(&self, domain: &str) -> Result<Vec<String>>;
}

/// [`MxResolver`] backed by the system's DNS configuration.
pub struct DnsResolver {
    resolver: TokioResolver,
}

impl DnsResolver {
    pub fn from_system_conf() -> Result<Self> {
        let resolver = TokioResolver::builder_tokio()
            .context("Failed to read system resolver configuration")?
            .build();
        Ok(Self { resolver })
    }
}

#[async_trait]
impl MxResolver for DnsResolver {
    async fn resolve_mx(&self, domain: &str) -> Result<Vec<String>> {
        let lookup = self
            .resolver
            .mx_lookup(domain)
            .await
            .with_context(|| format!("MX lookup for {} failed", domain))?;

        let mut records: Vec<(u16, String)> = lookup
            .iter()
            .map(|mx| {
                (
                    mx.preference(),
                    mx.exchange().to_string().trim_end_matches('.').to_string(),
                )
            })
            .collect();
        records.sort_by_key(|(preference, _)| *preference);
        debug!("MX records for {}: {:?}", domain, records);

        Ok(records.into_iter().map(|(_, host)| host).collect())
    }
}
