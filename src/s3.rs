//! Minimal Amazon S3 client.
//!
//! Talks to the S3 REST API directly with AWS Signature V4, using only
//! pure-Rust dependencies (`hmac`, `sha2`). Supports exactly what the sync
//! needs:
//!
//! - `PutObject` with a content type and optional `public-read` ACL;
//! - a one-key `ListObjectsV2` to ask whether a prefix holds anything.
//!
//! Buckets are addressed virtual-host style
//! (`<bucket>.s3.<region>.amazonaws.com`) unless a custom `endpoint_url` is
//! configured, in which case path style (`<endpoint>/<bucket>/<key>`) is
//! used, as MinIO and LocalStack expect.
//!
//! # Environment Variables
//!
//! - `AWS_ACCESS_KEY_ID` (required)
//! - `AWS_SECRET_ACCESS_KEY` (required)
//! - `AWS_SESSION_TOKEN` (optional)

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::config::S3SinkConfig;
use crate::probe::PrefixLister;

type HmacSha256 = Hmac<Sha256>;

/// AWS credentials loaded from environment variables.
#[derive(Clone)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl AwsCredentials {
    pub fn from_env() -> Result<Self> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID")
            .context("AWS_ACCESS_KEY_ID environment variable not set")?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
            .context("AWS_SECRET_ACCESS_KEY environment variable not set")?;
        let session_token = std::env::var("AWS_SESSION_TOKEN").ok();

        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token,
        })
    }
}

/// Signed client for one bucket.
#[derive(Clone)]
pub struct S3Client {
    bucket: String,
    region: String,
    endpoint_url: Option<String>,
    creds: AwsCredentials,
    http: reqwest::Client,
}

impl S3Client {
    pub fn new(config: &S3SinkConfig, creds: AwsCredentials) -> Self {
        Self {
            bucket: config.bucket.clone(),
            region: config.region.clone(),
            endpoint_url: config
                .endpoint_url
                .as_ref()
                .map(|e| e.trim_end_matches('/').to_string()),
            creds,
            http: reqwest::Client::new(),
        }
    }

    pub fn from_env(config: &S3SinkConfig) -> Result<Self> {
        Ok(Self::new(config, AwsCredentials::from_env()?))
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Anonymous HTTPS URL of an object in a public-read bucket.
    pub fn public_url(&self, key: &str) -> String {
        match &self.endpoint_url {
            Some(endpoint) => format!("{}/{}/{}", endpoint, self.bucket, key),
            None => format!("https://{}.s3.amazonaws.com/{}", self.bucket, key),
        }
    }

    /// Upload `body` at `key`, overwriting any existing object.
    pub async fn put_object(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
        public_read: bool,
    ) -> Result<()> {
        let mut extra = vec![("content-type".to_string(), content_type.to_string())];
        if public_read {
            extra.push(("x-amz-acl".to_string(), "public-read".to_string()));
        }

        let payload_hash = hex_sha256(&body);
        let (url, canonical_uri, host) = self.object_location(key);
        let headers = self.sign(
            "PUT",
            &canonical_uri,
            "",
            &host,
            extra,
            &payload_hash,
            Utc::now(),
        );

        let mut req = self.http.put(&url).body(body);
        for (k, v) in &headers {
            if k != "host" {
                req = req.header(k, v);
            }
        }

        let resp = req
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to put s3://{}/{}: {}", self.bucket, key, e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!(
                "S3 PutObject failed (HTTP {}) for key '{}': {}",
                status,
                key,
                body.chars().take(500).collect::<String>()
            );
        }
        Ok(())
    }

    /// Whether at least one object key starts with `prefix`.
    pub async fn has_objects(&self, prefix: &str) -> Result<bool> {
        let mut params = vec![
            ("list-type".to_string(), "2".to_string()),
            ("max-keys".to_string(), "1".to_string()),
            ("prefix".to_string(), prefix.to_string()),
        ];
        params.sort_by(|a, b| a.0.cmp(&b.0));
        let canonical_querystring: String = params
            .iter()
            .map(|(k, v)| format!("{}={}", uri_encode(k), uri_encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let (base_url, canonical_uri, host) = self.bucket_location();
        let payload_hash = hex_sha256(b"");
        let headers = self.sign(
            "GET",
            &canonical_uri,
            &canonical_querystring,
            &host,
            Vec::new(),
            &payload_hash,
            Utc::now(),
        );

        let mut req = self
            .http
            .get(format!("{}?{}", base_url, canonical_querystring));
        for (k, v) in &headers {
            if k != "host" {
                req = req.header(k, v);
            }
        }

        let resp = req.send().await.map_err(|e| {
            anyhow::anyhow!(
                "Failed to list s3://{}/{}: {}",
                self.bucket,
                prefix,
                e
            )
        })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!(
                "S3 ListObjectsV2 failed (HTTP {}): {}",
                status,
                body.chars().take(500).collect::<String>()
            );
        }

        let xml = resp.text().await?;
        Ok(list_response_has_keys(&xml))
    }

    /// `(url, canonical_uri, host)` of the bucket root.
    fn bucket_location(&self) -> (String, String, String) {
        match &self.endpoint_url {
            Some(endpoint) => {
                let uri = format!("/{}/", uri_encode(&self.bucket));
                (
                    format!("{}{}", endpoint, uri),
                    uri,
                    strip_scheme(endpoint).to_string(),
                )
            }
            None => {
                let host = format!("{}.s3.{}.amazonaws.com", self.bucket, self.region);
                (format!("https://{}/", host), "/".to_string(), host)
            }
        }
    }

    /// `(url, canonical_uri, host)` of one object.
    fn object_location(&self, key: &str) -> (String, String, String) {
        let encoded_key = key.split('/').map(uri_encode).collect::<Vec<_>>().join("/");
        match &self.endpoint_url {
            Some(endpoint) => {
                let uri = format!("/{}/{}", uri_encode(&self.bucket), encoded_key);
                (
                    format!("{}{}", endpoint, uri),
                    uri,
                    strip_scheme(endpoint).to_string(),
                )
            }
            None => {
                let host = format!("{}.s3.{}.amazonaws.com", self.bucket, self.region);
                let uri = format!("/{}", encoded_key);
                (format!("https://{}{}", host, uri), uri, host)
            }
        }
    }

    /// Compute SigV4 headers for a request. Returns every signed header plus
    /// `authorization`.
    #[allow(clippy::too_many_arguments)]
    fn sign(
        &self,
        method: &str,
        canonical_uri: &str,
        canonical_querystring: &str,
        host: &str,
        extra_headers: Vec<(String, String)>,
        payload_hash: &str,
        now: DateTime<Utc>,
    ) -> Vec<(String, String)> {
        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();

        let mut headers = vec![
            ("host".to_string(), host.to_string()),
            ("x-amz-content-sha256".to_string(), payload_hash.to_string()),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        if let Some(ref token) = self.creds.session_token {
            headers.push(("x-amz-security-token".to_string(), token.clone()));
        }
        headers.extend(extra_headers);
        headers.sort_by(|a, b| a.0.cmp(&b.0));

        let signed_headers: String = headers
            .iter()
            .map(|(k, _)| k.as_str())
            .collect::<Vec<_>>()
            .join(";");

        let canonical_headers: String = headers
            .iter()
            .map(|(k, v)| format!("{}:{}\n", k, v.trim()))
            .collect();

        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            method,
            canonical_uri,
            canonical_querystring,
            canonical_headers,
            signed_headers,
            payload_hash
        );

        let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, self.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            credential_scope,
            hex_sha256(canonical_request.as_bytes())
        );

        let signing_key = derive_signing_key(
            &self.creds.secret_access_key,
            &date_stamp,
            &self.region,
            "s3",
        );
        let signature = hex_hmac_sha256(&signing_key, string_to_sign.as_bytes());

        headers.push((
            "authorization".to_string(),
            format!(
                "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
                self.creds.access_key_id, credential_scope, signed_headers, signature
            ),
        ));
        headers
    }
}

#[async_trait]
impl PrefixLister for S3Client {
    async fn has_objects(&self, prefix: &str) -> Result<bool> {
        S3Client::has_objects(self, prefix).await
    }
}

fn strip_scheme(endpoint: &str) -> &str {
    endpoint
        .trim_start_matches("https://")
        .trim_start_matches("http://")
}

/// A `ListObjectsV2` body lists at least one key.
fn list_response_has_keys(xml: &str) -> bool {
    if let Some(count) = extract_xml_value(xml, "KeyCount").and_then(|v| v.parse::<u64>().ok()) {
        return count > 0;
    }
    xml.contains("<Contents>")
}

/// Extract the text content of an XML tag (simple, non-nested).
fn extract_xml_value(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)?;
    Some(xml[start..start + end].to_string())
}

fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn hex_hmac_sha256(key: &[u8], data: &[u8]) -> String {
    hex::encode(hmac_sha256(key, data))
}

/// Derive the AWS SigV4 signing key for a given date, region, and service.
///
/// ```text
/// kDate    = HMAC("AWS4" + secret, dateStamp)
/// kRegion  = HMAC(kDate, region)
/// kService = HMAC(kRegion, service)
/// kSigning = HMAC(kService, "aws4_request")
/// ```
fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(
        format!("AWS4{}", secret_key).as_bytes(),
        date_stamp.as_bytes(),
    );
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// URI-encode per RFC 3986, leaving only `A-Z a-z 0-9 - _ . ~` unescaped.
pub(crate) fn uri_encode(s: &str) -> String {
    let mut result = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    result
}
