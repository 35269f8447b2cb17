//! Consistency rules for domain configuration files
//!
//! Everything here works on the lines of a configuration file, so the rules
//! can be exercised without touching the filesystem. The only exception is
//! [`missing_key_files`], which checks referenced paths for existence.

use std::path::PathBuf;
use thiserror::Error;

use super::{Domain, KEY_FILE_EXTENSION};
use crate::config::CertConfig;

const SERVER_NAME: &str = "server_name";
const SSL_CERTIFICATE_KEY: &str = "ssl_certificate_key";

/// Reason a configuration file is not eligible for renewal
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("not a valid domain name")]
    InvalidName,

    #[error("check ssl_certificate_key failed, expected a key file ending in {expected}")]
    KeyFileMismatch { expected: String },

    #[error("primary domain was not the first domain for property server_name")]
    PrimaryNotFirst,

    #[error("property server_name contains {name} which is outside the primary domain")]
    ForeignName { name: String },

    #[error("property server_name contains duplicate entry {name}")]
    DuplicateName { name: String },
}

impl Rejection {
    /// Stable identifier for structured logs
    pub fn code(&self) -> &'static str {
        match self {
            Rejection::InvalidName => "invalid_name",
            Rejection::KeyFileMismatch { .. } => "key_file_mismatch",
            Rejection::PrimaryNotFirst => "primary_not_first",
            Rejection::ForeignName { .. } => "foreign_name",
            Rejection::DuplicateName { .. } => "duplicate_name",
        }
    }
}

/// Expected location of a domain's private key: `<root>/<domain>/<key>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyFileRef {
    pub root: String,
    pub key_file: String,
}

impl KeyFileRef {
    pub fn new(root: impl Into<String>, key_file: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            key_file: key_file.into(),
        }
    }

    pub fn from_config(cert: &CertConfig) -> Self {
        Self::new(cert.domain_path.clone(), cert.private_key.clone())
    }

    pub fn expected_path(&self, identity: &str) -> String {
        format!("{}/{}/{}", self.root.trim_end_matches('/'), identity, self.key_file)
    }
}

/// Syntactic FQDN check
///
/// Labels are 1-63 ASCII alphanumerics or hyphens without a leading or
/// trailing hyphen, at least two labels, at most 253 characters, and the
/// top-level label is not purely numeric.
pub fn is_fqdn(name: &str) -> bool {
    if name.is_empty() || name.len() > 253 {
        return false;
    }

    let labels: Vec<&str> = name.split('.').collect();
    if labels.len() < 2 || !labels.iter().all(|label| is_valid_label(label)) {
        return false;
    }

    labels
        .last()
        .map(|tld| !tld.chars().all(|c| c.is_ascii_digit()))
        .unwrap_or(false)
}

fn is_valid_label(label: &str) -> bool {
    !label.is_empty()
        && label.len() <= 63
        && !label.starts_with('-')
        && !label.ends_with('-')
        && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

/// Line with surrounding whitespace and the statement terminator removed
fn statement(line: &str) -> &str {
    line.trim().trim_end_matches(';').trim_end()
}

/// Arguments of `keyword arg1 arg2 ...;` when the line is that directive
fn directive_args<'a>(line: &'a str, keyword: &str) -> Option<Vec<&'a str>> {
    let mut tokens = statement(line).split_whitespace();
    if tokens.next()? != keyword {
        return None;
    }
    Some(tokens.collect())
}

/// Rule 2: some `ssl_certificate_key` line points into the domain's own
/// certificate directory
fn check_key_file(lines: &[String], identity: &str, key_ref: &KeyFileRef) -> Result<(), Rejection> {
    let expected = key_ref.expected_path(identity);
    let found = lines
        .iter()
        .filter_map(|line| directive_args(line, SSL_CERTIFICATE_KEY))
        .any(|args| args.first().is_some_and(|path| path.ends_with(&expected)));

    if found {
        Ok(())
    } else {
        Err(Rejection::KeyFileMismatch { expected })
    }
}

/// Apply rules 1 to 5 and derive the domain record
///
/// Rules, first failure wins:
/// 1. the identity is a valid FQDN
/// 2. an `ssl_certificate_key` line names `<root>/<identity>/<key>`
/// 3. a `server_name` line lists the identity first
/// 4. every `server_name` entry ends with the identity
/// 5. no `server_name` line contains duplicates
pub fn validate(identity: &str, lines: &[String], key_ref: &KeyFileRef) -> Result<Domain, Rejection> {
    if !is_fqdn(identity) {
        return Err(Rejection::InvalidName);
    }

    check_key_file(lines, identity, key_ref)?;

    let server_names: Vec<Vec<&str>> = lines
        .iter()
        .filter_map(|line| directive_args(line, SERVER_NAME))
        .collect();

    let primary_line = server_names
        .iter()
        .find(|names| names.first() == Some(&identity))
        .ok_or(Rejection::PrimaryNotFirst)?;

    for names in &server_names {
        if let Some(name) = names.iter().find(|name| !name.ends_with(identity)) {
            return Err(Rejection::ForeignName {
                name: name.to_string(),
            });
        }
    }

    for names in &server_names {
        let mut seen = vec![SERVER_NAME];
        for name in names {
            if seen.contains(name) {
                return Err(Rejection::DuplicateName {
                    name: name.to_string(),
                });
            }
            seen.push(*name);
        }
    }

    Ok(Domain {
        primary: primary_line[0].to_string(),
        optional: primary_line[1..].iter().map(|name| name.to_string()).collect(),
    })
}

/// Paths of all certificate files a configuration references
///
/// Any line ending in `.pem` (terminator stripped) counts; the path is the
/// text after the first whitespace, or the whole line without one.
pub fn referenced_key_files(lines: &[String]) -> Vec<PathBuf> {
    lines
        .iter()
        .filter_map(|line| {
            let stmt = statement(line);
            if !stmt.ends_with(KEY_FILE_EXTENSION) {
                return None;
            }
            let path = match stmt.split_once(char::is_whitespace) {
                Some((_, rest)) => rest.trim(),
                None => stmt,
            };
            Some(PathBuf::from(path))
        })
        .collect()
}

/// Rule 6: referenced certificate files that do not exist on disk
pub fn missing_key_files(lines: &[String]) -> Vec<PathBuf> {
    referenced_key_files(lines)
        .into_iter()
        .filter(|path| !path.exists())
        .collect()
}
