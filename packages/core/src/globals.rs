//! Headers and credentials applied to every request, optionally per host.

use std::collections::{BTreeMap, HashMap};

use crate::types::Credentials;

/// Headers sent with every request, with per-host overrides.
#[derive(Debug, Clone, Default)]
pub struct GlobalHeaders {
    all_hosts: BTreeMap<String, String>,
    per_host: HashMap<String, BTreeMap<String, String>>,
}

impl GlobalHeaders {
    /// Set or remove (`value == None`) one header, for `host` or for all hosts.
    pub fn set_header(&mut self, name: &str, value: Option<&str>, host: Option<&str>) {
        let headers = match host {
            Some(host) => self.per_host.entry(host.to_string()).or_default(),
            None => &mut self.all_hosts,
        };
        match value {
            Some(value) => {
                headers.insert(name.to_string(), value.to_string());
            }
            None => {
                headers.remove(name);
            }
        }
    }

    /// Replace the whole header set for `host`, or for all hosts.
    pub fn set_headers(&mut self, headers: BTreeMap<String, String>, host: Option<&str>) {
        match host {
            Some(host) => {
                self.per_host.insert(host.to_string(), headers);
            }
            None => self.all_hosts = headers,
        }
    }

    /// Headers for `host`: the all-hosts set with host-specific entries on top.
    pub fn headers_for_host(&self, host: Option<&str>) -> BTreeMap<String, String> {
        let mut headers = self.all_hosts.clone();
        if let Some(specific) = host.and_then(|host| self.per_host.get(host)) {
            headers.extend(specific.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        headers
    }
}

/// Credentials used for every request, with per-host overrides.
#[derive(Debug, Clone, Default)]
pub struct GlobalCredentials {
    all_hosts: Option<Credentials>,
    per_host: HashMap<String, Credentials>,
}

impl GlobalCredentials {
    pub fn set_credentials(&mut self, credentials: Option<Credentials>, host: Option<&str>) {
        match (host, credentials) {
            (Some(host), Some(credentials)) => {
                self.per_host.insert(host.to_string(), credentials);
            }
            (Some(host), None) => {
                self.per_host.remove(host);
            }
            (None, credentials) => self.all_hosts = credentials,
        }
    }

    /// Host-specific credentials if present, otherwise the all-hosts ones.
    pub fn credentials_for_host(&self, host: Option<&str>) -> Option<Credentials> {
        host.and_then(|host| self.per_host.get(host))
            .or(self.all_hosts.as_ref())
            .cloned()
    }
}
