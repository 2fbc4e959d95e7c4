//! Certificate pairs minted with the local CA.

use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use berth_config::GlobalConfig;
use berth_config::project::ROUTER_CONTAINER;
use berth_runner::{CommandSpec, ProcessRunner};
use berth_utils::atomic_write::write_file_atomic;
use berth_utils::error::{BerthError, ContainerError};
use berth_utils::signature::{SignatureStatus, check_signature_or_no_file, with_signature};

use crate::docker::GLOBAL_NETWORK;

const MKCERT_TIMEOUT: Duration = Duration::from_secs(60);

/// Base name of the fallback pair served for unknown hosts.
pub const DEFAULT_CERT_BASE: &str = "default";

/// What happened to a cert pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertOutcome {
    Minted,
    /// At least one member lacks the signature; both are left as they are.
    UserManaged,
    /// No local CA is configured, or ACME issues certificates instead.
    Skipped,
}

/// `<base>.crt` and `<base>.key`; the default pair uses its historical names.
#[must_use]
pub fn pair_names(base: &str) -> (String, String) {
    if base == DEFAULT_CERT_BASE {
        ("default_cert.crt".to_string(), "default_key.key".to_string())
    } else {
        (format!("{base}.crt"), format!("{base}.key"))
    }
}

/// Names every certificate covers in addition to the project's own.
#[must_use]
pub fn base_names(tld: &str) -> Vec<String> {
    vec![
        format!("*.{tld}"),
        "127.0.0.1".to_string(),
        "localhost".to_string(),
        ROUTER_CONTAINER.to_string(),
        format!("{ROUTER_CONTAINER}.{GLOBAL_NETWORK}"),
    ]
}

/// Mint `<dir>/<base>.{crt,key}` for `hostnames` plus the `tld` wildcard,
/// honouring the signature policy for the pair as a whole.
pub fn ensure_pair(
    runner: &dyn ProcessRunner,
    global: &GlobalConfig,
    dir: &Path,
    base: &str,
    tld: &str,
    hostnames: &[String],
) -> Result<CertOutcome, BerthError> {
    let (crt, key) = pair_names(base);
    let (crt, key) = (dir.join(crt), dir.join(key));
    for f in [&crt, &key] {
        if check_signature_or_no_file(f)? == SignatureStatus::UserManaged {
            debug!(file = %f.display(), "keeping user-managed certificate pair");
            return Ok(CertOutcome::UserManaged);
        }
    }
    let Some(caroot) = global.mkcert_caroot.as_deref().filter(|_| !global.use_letsencrypt) else {
        return Ok(CertOutcome::Skipped);
    };
    if caroot.is_empty() {
        return Ok(CertOutcome::Skipped);
    }

    let mut names = base_names(tld);
    for h in hostnames {
        if !names.contains(h) {
            names.push(h.clone());
        }
    }
    let spec = CommandSpec::new("mkcert")
        .arg("--cert-file")
        .arg(crt.as_os_str())
        .arg("--key-file")
        .arg(key.as_os_str())
        .args(&names)
        .env("CAROOT", caroot);
    debug!(command = %spec, "minting certificate");
    let out = runner.run(&spec, MKCERT_TIMEOUT)?;
    if !out.success() {
        return Err(ContainerError::CommandFailed {
            command: spec.to_string(),
            output: out.combined_output().trim().to_string(),
        }
        .into());
    }

    for f in [&crt, &key] {
        let pem = std::fs::read_to_string(f)?;
        write_file_atomic(f, &with_signature(&pem))?;
    }
    info!(cert = %crt.display(), names = names.len(), "minted certificate");
    Ok(CertOutcome::Minted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use berth_runner::{FakeRunner, ProcessOutput};
    use berth_utils::signature::SIGNATURE;
    use tempfile::TempDir;

    fn global_with_ca() -> GlobalConfig {
        GlobalConfig {
            mkcert_caroot: Some("/home/dev/.local/share/mkcert".into()),
            ..GlobalConfig::default()
        }
    }

    /// mkcert double that writes the files it was asked for.
    fn mkcert() -> FakeRunner {
        let fake = FakeRunner::new();
        fake.on_with(&["mkcert"], |spec| {
            let argv = spec.argv();
            for flag in ["--cert-file", "--key-file"] {
                let i = argv.iter().position(|a| a == flag).unwrap();
                std::fs::write(&argv[i + 1], "-----BEGIN PEM-----\n").unwrap();
            }
            Ok(ProcessOutput::ok(""))
        });
        fake
    }

    #[test]
    fn test_minted_pair_is_signed() {
        let dir = TempDir::new().unwrap();
        let fake = mkcert();
        let hosts = vec!["alpha.ddev.site".to_string()];
        let outcome = ensure_pair(&fake, &global_with_ca(), dir.path(), "alpha", "ddev.site", &hosts).unwrap();
        assert_eq!(outcome, CertOutcome::Minted);
        for f in ["alpha.crt", "alpha.key"] {
            let body = std::fs::read_to_string(dir.path().join(f)).unwrap();
            assert!(body.starts_with(SIGNATURE));
        }
        let line = &fake.commands()[0];
        assert!(line.contains("*.ddev.site"));
        assert!(line.ends_with("alpha.ddev.site"));
    }

    #[test]
    fn test_minted_pair_covers_project_tld() {
        let dir = TempDir::new().unwrap();
        let fake = mkcert();
        let hosts = vec!["alpha.dev.test".to_string()];
        ensure_pair(&fake, &global_with_ca(), dir.path(), "alpha", "dev.test", &hosts).unwrap();
        let line = &fake.commands()[0];
        assert!(line.contains("*.dev.test"));
        assert!(!line.contains("*.ddev.site"));
    }

    #[test]
    fn test_unsigned_member_preserves_both() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("alpha.crt"), "my own cert\n").unwrap();
        std::fs::write(dir.path().join("alpha.key"), with_signature("old key\n")).unwrap();
        let fake = mkcert();
        let outcome = ensure_pair(&fake, &global_with_ca(), dir.path(), "alpha", "ddev.site", &[]).unwrap();
        assert_eq!(outcome, CertOutcome::UserManaged);
        assert!(fake.calls().is_empty());
        assert!(std::fs::read_to_string(dir.path().join("alpha.key")).unwrap().contains("old key"));
    }

    #[test]
    fn test_no_ca_or_acme_skips() {
        let dir = TempDir::new().unwrap();
        let fake = mkcert();
        let outcome = ensure_pair(&fake, &GlobalConfig::default(), dir.path(), "alpha", "ddev.site", &[]).unwrap();
        assert_eq!(outcome, CertOutcome::Skipped);

        let mut acme = global_with_ca();
        acme.use_letsencrypt = true;
        let outcome = ensure_pair(&fake, &acme, dir.path(), "alpha", "ddev.site", &[]).unwrap();
        assert_eq!(outcome, CertOutcome::Skipped);
        assert!(fake.calls().is_empty());
    }

    #[test]
    fn test_default_pair_names() {
        assert_eq!(
            pair_names(DEFAULT_CERT_BASE),
            ("default_cert.crt".to_string(), "default_key.key".to_string())
        );
    }
}
