//! Certificate Manager (`4.A`): validates the configured cert/key pair on
//! startup and regenerates a fresh self-signed RSA-2048 pair when any check
//! fails.

use std::fs;
use std::io::Cursor;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::time::SystemTime;

use data_encoding::BASE32_NOPAD;
use rand::RngCore;
use rcgen::{
	CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, Ia5String,
	KeyUsagePurpose, SanType, SerialNumber,
};
use rsa::pkcs8::EncodePrivateKey;
use sha2::{Digest, Sha256};

use crate::config::CertSubject;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("certificate file {0:?} does not exist")]
	CertMissing(String),
	#[error("key file {0:?} does not exist")]
	KeyMissing(String),
	#[error("certificate file {path:?} is not readable: {source}")]
	CertUnreadable {
		path: String,
		#[source]
		source: std::io::Error,
	},
	#[error("certificate file {0:?} contains no decodable CERTIFICATE PEM block")]
	CertUndecodable(String),
	#[error("certificate {0:?} has expired")]
	Expired(String),
	#[error("certificate subject has no hosts configured")]
	NoHosts,
	#[error("RSA key generation failed: {0}")]
	KeyGeneration(String),
	#[error("certificate generation failed: {0}")]
	Rcgen(#[from] rcgen::Error),
	#[error("failed to write {path:?}: {source}")]
	Write {
		path: String,
		#[source]
		source: std::io::Error,
	},
	#[error("re-read of {path:?} produced no CERTIFICATE blocks")]
	NoFingerprints { path: String },
}

/// `SHA256/` + unpadded standard base32 of `sha256(der)`, one per
/// `CERTIFICATE` PEM block in the written cert file.
pub type Fingerprint = String;

/// Validates the configured cert/key pair, regenerating a fresh self-signed
/// pair if any check fails. Returns the fingerprints of the certificate that
/// ends up on disk (the existing one, or the freshly generated one).
pub fn ensure(cert_path: &str, key_path: &str, subject: &CertSubject) -> Result<Vec<Fingerprint>, Error> {
	match validate(cert_path, key_path) {
		Ok(()) => {
			tracing::info!(cert = cert_path, "existing certificate is valid");
			fingerprints(cert_path)
		},
		Err(reason) => {
			tracing::warn!(cert = cert_path, %reason, "regenerating self-signed certificate");
			make(cert_path, key_path, &subject.hosts, &subject.org, &subject.mail)
		},
	}
}

fn validate(cert_path: &str, key_path: &str) -> Result<(), Error> {
	if !std::path::Path::new(cert_path).exists() {
		return Err(Error::CertMissing(cert_path.to_string()));
	}
	if !std::path::Path::new(key_path).exists() {
		return Err(Error::KeyMissing(key_path.to_string()));
	}
	let pem = fs::read(cert_path).map_err(|source| Error::CertUnreadable {
		path: cert_path.to_string(),
		source,
	})?;
	let mut reader = Cursor::new(pem);
	let der = rustls_pemfile::certs(&mut reader)
		.next()
		.and_then(|r| r.ok())
		.ok_or_else(|| Error::CertUndecodable(cert_path.to_string()))?;
	let (_, parsed) = x509_parser::parse_x509_certificate(&der)
		.map_err(|_| Error::CertUndecodable(cert_path.to_string()))?;
	let not_after: SystemTime = parsed.validity().not_after.to_datetime().into();
	if not_after <= SystemTime::now() {
		return Err(Error::Expired(cert_path.to_string()));
	}
	Ok(())
}

/// Generates a self-signed RSA-2048 certificate/key pair and writes them to
/// `cert_path`/`key_path`, then re-reads the cert file to compute fingerprints.
pub fn make(
	cert_path: &str,
	key_path: &str,
	hosts: &[String],
	org: &str,
	mail: &str,
) -> Result<Vec<Fingerprint>, Error> {
	if hosts.is_empty() {
		return Err(Error::NoHosts);
	}

	let rsa_key = rsa::RsaPrivateKey::new(&mut rand::rng(), 2048)
		.map_err(|e| Error::KeyGeneration(e.to_string()))?;
	let pkcs8_der = rsa_key
		.to_pkcs8_der()
		.map_err(|e| Error::KeyGeneration(e.to_string()))?;
	let key_pair = rcgen::KeyPair::from_der(pkcs8_der.as_bytes())?;

	let mut params = CertificateParams::default();
	let mut serial = [0u8; 16];
	rand::rng().fill_bytes(&mut serial);
	params.serial_number = Some(SerialNumber::from_slice(&serial));

	let mut dn = DistinguishedName::new();
	dn.push(DnType::CommonName, org);
	dn.push(DnType::OrganizationName, org);
	params.distinguished_name = dn;

	let mut sans = Vec::with_capacity(hosts.len() + 1);
	for host in hosts {
		let host = host.trim();
		if host.is_empty() {
			continue;
		}
		if let Ok(ip) = host.parse() {
			sans.push(SanType::IpAddress(ip));
		} else {
			sans.push(SanType::DnsName(Ia5String::try_from(host.to_string())?));
		}
	}
	if !mail.is_empty() {
		sans.push(SanType::Rfc822Name(Ia5String::try_from(mail.to_string())?));
	}
	params.subject_alt_names = sans;

	let now = time::OffsetDateTime::now_utc();
	params.not_before = now;
	params.not_after = now + time::Duration::days(5 * 365);

	params.key_usages = vec![KeyUsagePurpose::DigitalSignature, KeyUsagePurpose::KeyEncipherment];
	params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];

	let cert = params.self_signed(&key_pair)?;

	fs::write(cert_path, cert.pem()).map_err(|source| Error::Write {
		path: cert_path.to_string(),
		source,
	})?;
	fs::write(key_path, key_pair.serialize_pem()).map_err(|source| Error::Write {
		path: key_path.to_string(),
		source,
	})?;
	set_owner_read_write(key_path)?;

	tracing::info!(cert = cert_path, key = key_path, org, %mail, "wrote self-signed certificate");
	fingerprints(cert_path)
}

#[cfg(unix)]
fn set_owner_read_write(path: &str) -> Result<(), Error> {
	fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|source| Error::Write {
		path: path.to_string(),
		source,
	})
}

#[cfg(not(unix))]
fn set_owner_read_write(_path: &str) -> Result<(), Error> {
	Ok(())
}

fn fingerprints(cert_path: &str) -> Result<Vec<Fingerprint>, Error> {
	let pem = fs::read(cert_path).map_err(|source| Error::Write {
		path: cert_path.to_string(),
		source,
	})?;
	let mut reader = Cursor::new(pem);
	let ders: Vec<_> = rustls_pemfile::certs(&mut reader)
		.collect::<Result<_, _>>()
		.map_err(|_| Error::NoFingerprints {
			path: cert_path.to_string(),
		})?;
	if ders.is_empty() {
		return Err(Error::NoFingerprints {
			path: cert_path.to_string(),
		});
	}
	Ok(ders.iter().map(|der| fingerprint(der)).collect())
}

fn fingerprint(der: &[u8]) -> Fingerprint {
	let digest = Sha256::digest(der);
	format!("SHA256/{}", BASE32_NOPAD.encode(&digest))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn fingerprint_has_expected_shape() {
		let fp = fingerprint(b"not a real certificate");
		assert!(fp.starts_with("SHA256/"));
		// sha256 is 32 bytes -> ceil(32*8/5) = 52 base32 characters, no padding.
		assert_eq!(fp.len(), "SHA256/".len() + 52);
		assert!(fp["SHA256/".len()..].chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
	}

	#[test]
	fn make_writes_cert_and_key_with_fingerprint() {
		let dir = tempfile::tempdir().unwrap();
		let cert_path = dir.path().join("hub.crt");
		let key_path = dir.path().join("hub.key");
		let fps = make(
			cert_path.to_str().unwrap(),
			key_path.to_str().unwrap(),
			&["localhost".to_string()],
			"Verlihub",
			"verlihub@localhost",
		)
		.unwrap();
		assert_eq!(fps.len(), 1);
		assert!(fps[0].starts_with("SHA256/"));
		assert!(cert_path.exists());
		assert!(key_path.exists());

		#[cfg(unix)]
		{
			use std::os::unix::fs::PermissionsExt;
			let mode = fs::metadata(&key_path).unwrap().permissions().mode();
			assert_eq!(mode & 0o777, 0o600);
		}
	}

	#[test]
	fn ensure_regenerates_when_cert_missing() {
		let dir = tempfile::tempdir().unwrap();
		let cert_path = dir.path().join("missing.crt");
		let key_path = dir.path().join("missing.key");
		let subject = CertSubject::default();
		let fps = ensure(cert_path.to_str().unwrap(), key_path.to_str().unwrap(), &subject).unwrap();
		assert!(!fps.is_empty());
		assert!(cert_path.exists());
	}

	#[test]
	fn ensure_keeps_valid_existing_cert() {
		let dir = tempfile::tempdir().unwrap();
		let cert_path = dir.path().join("hub.crt");
		let key_path = dir.path().join("hub.key");
		make(
			cert_path.to_str().unwrap(),
			key_path.to_str().unwrap(),
			&["localhost".to_string()],
			"Verlihub",
			"verlihub@localhost",
		)
		.unwrap();
		let before = fs::read(&cert_path).unwrap();

		let subject = CertSubject::default();
		ensure(cert_path.to_str().unwrap(), key_path.to_str().unwrap(), &subject).unwrap();
		let after = fs::read(&cert_path).unwrap();
		assert_eq!(before, after, "valid cert should not be rewritten");
	}
}
