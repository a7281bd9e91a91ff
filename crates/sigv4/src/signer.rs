//! SigV4 canonical request construction and signing.

use {
    chrono::{DateTime, Utc},
    hmac::{Hmac, Mac},
    reqwest::header::{HeaderName, HeaderValue},
    sha2::{Digest, Sha256},
    url::Url,
};

use crate::{
    credentials::{AwsCredentials, SharedCredentialsProvider},
    error::{Error, Result},
};

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const AMZ_DATE_FORMAT: &str = "%Y%m%dT%H%M%SZ";
const SHORT_DATE_FORMAT: &str = "%Y%m%d";

/// Signs outgoing requests for one service in one region.
#[derive(Clone)]
pub struct SigV4Signer {
    region: String,
    service: String,
    credentials: SharedCredentialsProvider,
}

impl SigV4Signer {
    pub fn new(
        region: impl Into<String>,
        service: impl Into<String>,
        credentials: SharedCredentialsProvider,
    ) -> Self {
        Self {
            region: region.into(),
            service: service.into(),
            credentials,
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Resolve credentials and add `x-amz-date`, `x-amz-security-token` and
    /// `authorization` to a built request.
    pub async fn sign(&self, request: &mut reqwest::Request) -> Result<()> {
        let credentials = self.credentials.credentials().await?;
        self.sign_with(request, &credentials, Utc::now())
    }

    pub fn sign_with(
        &self,
        request: &mut reqwest::Request,
        credentials: &AwsCredentials,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let body = match request.body() {
            Some(body) => body.as_bytes().ok_or_else(|| Error::Unsignable {
                reason: "streaming bodies are not supported".into(),
            })?,
            None => b"".as_slice(),
        };

        let extra: Vec<(String, String)> = request
            .headers()
            .iter()
            .filter(|(name, _)| *name == reqwest::header::CONTENT_TYPE)
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let extra_refs: Vec<(&str, &str)> = extra
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();

        let headers = self.sign_parts(
            request.method().as_str(),
            request.url(),
            &extra_refs,
            body,
            credentials,
            now,
        )?;

        for (name, value) in headers {
            let name = HeaderName::from_static(name);
            let value = HeaderValue::from_str(&value).map_err(|source| {
                Error::external(format!("invalid value for header {name}"), source)
            })?;
            request.headers_mut().insert(name, value);
        }
        Ok(())
    }

    /// Compute the signing headers for a request described by its parts.
    ///
    /// `host` and `x-amz-date` (plus `x-amz-security-token` when a session
    /// token is present) are always signed in addition to `headers`.
    pub fn sign_parts(
        &self,
        method: &str,
        url: &Url,
        headers: &[(&str, &str)],
        body: &[u8],
        credentials: &AwsCredentials,
        now: DateTime<Utc>,
    ) -> Result<Vec<(&'static str, String)>> {
        let amz_date = now.format(AMZ_DATE_FORMAT).to_string();
        let short_date = now.format(SHORT_DATE_FORMAT).to_string();

        let mut signed: Vec<(String, String)> = headers
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), normalize_header_value(v)))
            .collect();
        signed.push(("host".into(), host_header(url)?));
        signed.push(("x-amz-date".into(), amz_date.clone()));
        if let Some(token) = credentials.token() {
            signed.push(("x-amz-security-token".into(), token.to_string()));
        }
        signed.sort_by(|a, b| a.0.cmp(&b.0));
        signed.dedup_by(|a, b| a.0 == b.0);

        let canonical_headers: String = signed
            .iter()
            .map(|(k, v)| format!("{k}:{v}\n"))
            .collect();
        let signed_headers = signed
            .iter()
            .map(|(k, _)| k.as_str())
            .collect::<Vec<_>>()
            .join(";");

        let canonical_request = format!(
            "{method}\n{}\n{}\n{canonical_headers}\n{signed_headers}\n{}",
            canonical_uri(url),
            canonical_query(url),
            hex::encode(Sha256::digest(body)),
        );

        let scope = format!(
            "{short_date}/{}/{}/aws4_request",
            self.region, self.service
        );
        let string_to_sign = format!(
            "{ALGORITHM}\n{amz_date}\n{scope}\n{}",
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );

        let key = derive_signing_key(credentials.secret(), &short_date, &self.region, &self.service);
        let signature = hex::encode(hmac(&key, string_to_sign.as_bytes()));

        let mut out = vec![
            ("x-amz-date", amz_date),
            (
                "authorization",
                format!(
                    "{ALGORITHM} Credential={}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
                    credentials.access_key_id
                ),
            ),
        ];
        if let Some(token) = credentials.token() {
            out.push(("x-amz-security-token", token.to_string()));
        }
        Ok(out)
    }
}

/// Derive the per-day, per-scope signing key.
pub fn derive_signing_key(secret: &str, short_date: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac(format!("AWS4{secret}").as_bytes(), short_date.as_bytes());
    let k_region = hmac(&k_date, region.as_bytes());
    let k_service = hmac(&k_region, service.as_bytes());
    hmac(&k_service, b"aws4_request")
}

fn hmac(key: &[u8], data: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length.
    let mut mac = match HmacSha256::new_from_slice(key) {
        Ok(mac) => mac,
        Err(_) => return Vec::new(),
    };
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn host_header(url: &Url) -> Result<String> {
    let host = url.host_str().ok_or_else(|| Error::Unsignable {
        reason: format!("URL has no host: {url}"),
    })?;
    Ok(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

/// Each path segment of the already-encoded path is encoded again.
fn canonical_uri(url: &Url) -> String {
    let path = url.path();
    if path.is_empty() {
        return "/".into();
    }
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn canonical_query(url: &Url) -> String {
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            (
                urlencoding::encode(&k).into_owned(),
                urlencoding::encode(&v).into_owned(),
            )
        })
        .collect();
    pairs.sort();
    pairs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

fn normalize_header_value(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}
