//! Blob storage over the REST API.
//!
//! Two ways to authenticate:
//! - a managed identity bearer token against an account URL
//! - Shared Key signing with the account key from a connection string
//!
//! Reference: https://learn.microsoft.com/rest/api/storageservices/authorize-with-shared-key

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, IF_NONE_MATCH};
use reqwest::{Client, Request, StatusCode};
use sha2::Sha256;
use tracing::info;
use url::Url;

use crate::azure::credential::{preview, ManagedIdentityCredential};
use crate::backend::BlobStore;
use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

const STORAGE_RESOURCE: &str = "https://storage.azure.com/";
const STORAGE_API_VERSION: &str = "2023-11-03";

const DEV_ACCOUNT_NAME: &str = "devstoreaccount1";
const DEV_ACCOUNT_KEY: &str =
    "Eby8vdM02xNOcqFlqUwJPLlmEtlCDXJ1OUzFT50uSRZ6IFsuFq2UVErCz4I6tq/K1SZFPTOtr/KBHBeksoGMGw==";
const DEV_BLOB_ENDPOINT: &str = "http://127.0.0.1:10000/devstoreaccount1";

/// Account details pulled out of a storage connection string.
#[derive(Debug, Clone)]
pub struct StorageConnection {
    pub account_name: String,
    pub account_key: Vec<u8>,
    pub blob_endpoint: String,
}

impl StorageConnection {
    /// Parse `Key=Value;Key=Value` connection strings, including
    /// `UseDevelopmentStorage=true` for Azurite.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut account_name = None;
        let mut account_key = None;
        let mut blob_endpoint = None;
        let mut protocol = "https".to_string();
        let mut suffix = "core.windows.net".to_string();
        let mut development = false;
        let mut dev_proxy = None;

        for part in raw.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = part.split_once('=').ok_or_else(|| {
                Error::Configuration("storage connection string has a part without '='".into())
            })?;

            match key {
                "AccountName" => account_name = Some(value.to_string()),
                "AccountKey" => account_key = Some(value.to_string()),
                "BlobEndpoint" => blob_endpoint = Some(value.to_string()),
                "DefaultEndpointsProtocol" => protocol = value.to_string(),
                "EndpointSuffix" => suffix = value.to_string(),
                "UseDevelopmentStorage" => development = value.eq_ignore_ascii_case("true"),
                "DevelopmentStorageProxyUri" => dev_proxy = Some(value.to_string()),
                _ => {}
            }
        }

        if development {
            let blob_endpoint = match dev_proxy {
                Some(proxy) => format!("{}/{}", proxy.trim_end_matches('/'), DEV_ACCOUNT_NAME),
                None => DEV_BLOB_ENDPOINT.to_string(),
            };
            return Ok(Self {
                account_name: DEV_ACCOUNT_NAME.to_string(),
                account_key: decode_key(DEV_ACCOUNT_KEY)?,
                blob_endpoint,
            });
        }

        let (account_name, account_key) = match (account_name, account_key) {
            (Some(name), Some(key)) => (name, key),
            _ => {
                return Err(Error::Configuration(
                    "storage connection string needs AccountName and AccountKey".into(),
                ))
            }
        };

        let blob_endpoint = blob_endpoint
            .unwrap_or_else(|| format!("{}://{}.blob.{}", protocol, account_name, suffix));

        Ok(Self {
            account_key: decode_key(&account_key)?,
            account_name,
            blob_endpoint,
        })
    }
}

fn decode_key(key: &str) -> Result<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(key)
        .map_err(|e| Error::Configuration(format!("storage account key is not base64: {}", e)))
}

/// How requests are authorized.
enum BlobAuth {
    Bearer(ManagedIdentityCredential),
    SharedKey { account: String, key: Vec<u8> },
}

/// Minimal blob client: whole-object download and block blob upload.
pub struct BlobClient {
    http: Client,
    endpoint: Url,
    auth: BlobAuth,
    timeout: Duration,
}

impl BlobClient {
    /// Client for `account_url` authorized with a managed identity.
    pub fn with_identity(
        http: Client,
        account_url: &str,
        credential: ManagedIdentityCredential,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            http,
            endpoint: parse_endpoint(account_url)?,
            auth: BlobAuth::Bearer(credential),
            timeout,
        })
    }

    /// Client authorized with Shared Key from a connection string.
    pub fn from_connection_string(http: Client, raw: &str, timeout: Duration) -> Result<Self> {
        let conn = StorageConnection::parse(raw)?;
        Ok(Self {
            http,
            endpoint: parse_endpoint(&conn.blob_endpoint)?,
            auth: BlobAuth::SharedKey {
                account: conn.account_name,
                key: conn.account_key,
            },
            timeout,
        })
    }

    /// URL of `container/key`, each key segment percent-encoded.
    pub fn blob_url(&self, container: &str, key: &str) -> Result<Url> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| Error::Configuration(format!("invalid blob endpoint: {}", self.endpoint)))?
            .pop_if_empty()
            .push(container)
            .extend(key.split('/'));
        Ok(url)
    }

    async fn authorize(&self, request: &mut Request) -> Result<()> {
        let value = match &self.auth {
            BlobAuth::Bearer(credential) => {
                format!("Bearer {}", credential.token(STORAGE_RESOURCE).await?)
            }
            BlobAuth::SharedKey { account, key } => {
                let mut mac = HmacSha256::new_from_slice(key)
                    .map_err(|e| Error::Configuration(format!("invalid account key: {}", e)))?;
                mac.update(string_to_sign(request, account).as_bytes());
                let signature = base64::engine::general_purpose::STANDARD
                    .encode(mac.finalize().into_bytes());
                format!("SharedKey {}:{}", account, signature)
            }
        };

        let value: HeaderValue = value
            .parse()
            .map_err(|_| Error::upstream("blob", "authorization header is not valid ASCII"))?;
        request.headers_mut().insert(AUTHORIZATION, value);
        Ok(())
    }

    async fn send(&self, mut request: Request) -> Result<reqwest::Response> {
        self.authorize(&mut request).await?;
        self.http
            .execute(request)
            .await
            .map_err(|e| Error::upstream("blob", e))
    }
}

#[async_trait]
impl BlobStore for BlobClient {
    async fn download(&self, container: &str, key: &str) -> Result<Vec<u8>> {
        let url = self.blob_url(container, key)?;

        let request = self
            .http
            .get(url)
            .header("x-ms-version", STORAGE_API_VERSION)
            .header("x-ms-date", rfc1123_now())
            .timeout(self.timeout)
            .build()
            .map_err(|e| Error::upstream("blob", e))?;

        let response = self.send(request).await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::upstream(
                "blob",
                format!("GET {}/{} returned status {}: {}", container, key, status, preview(&body)),
            ));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::upstream("blob", e))?;

        info!(
            container = container,
            blob = key,
            size = bytes.len(),
            "blob_downloaded"
        );

        Ok(bytes.to_vec())
    }

    async fn upload(
        &self,
        container: &str,
        name: &str,
        bytes: Vec<u8>,
        content_type: &str,
        overwrite: bool,
    ) -> Result<String> {
        let url = self.blob_url(container, name)?;
        let size = bytes.len();

        let mut builder = self
            .http
            .put(url.clone())
            .header("x-ms-version", STORAGE_API_VERSION)
            .header("x-ms-date", rfc1123_now())
            .header("x-ms-blob-type", "BlockBlob")
            .header(CONTENT_TYPE, content_type)
            .header(CONTENT_LENGTH, size)
            .timeout(self.timeout);

        if !overwrite {
            builder = builder.header(IF_NONE_MATCH, "*");
        }

        let request = builder
            .body(bytes)
            .build()
            .map_err(|e| Error::upstream("blob", e))?;

        let response = self.send(request).await?;

        let status = response.status();
        if status == StatusCode::CONFLICT && !overwrite {
            return Err(Error::upstream(
                "blob",
                format!("{}/{} already exists", container, name),
            ));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::upstream(
                "blob",
                format!("PUT {}/{} returned status {}: {}", container, name, status, preview(&body)),
            ));
        }

        info!(
            container = container,
            blob = name,
            size = size,
            content_type = content_type,
            "blob_uploaded"
        );

        Ok(url.to_string())
    }
}

fn parse_endpoint(raw: &str) -> Result<Url> {
    Url::parse(raw.trim())
        .map_err(|e| Error::Configuration(format!("invalid storage endpoint {:?}: {}", raw, e)))
}

fn rfc1123_now() -> String {
    chrono::Utc::now()
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

/// Canonical string-to-sign for Shared Key (service version 2015-02-21+).
fn string_to_sign(request: &Request, account: &str) -> String {
    let headers = request.headers();

    // A zero length is signed as empty
    let content_length = match header(headers, "content-length") {
        "0" => "",
        v => v,
    };

    let mut lines: Vec<&str> = vec![
        request.method().as_str(),
        header(headers, "content-encoding"),
        header(headers, "content-language"),
        content_length,
        header(headers, "content-md5"),
        header(headers, "content-type"),
        header(headers, "date"),
        header(headers, "if-modified-since"),
        header(headers, "if-match"),
        header(headers, "if-none-match"),
        header(headers, "if-unmodified-since"),
        header(headers, "range"),
    ];

    // Ordered by header name alone; `:` sorts after `-`
    let mut ms_pairs: Vec<(&str, &str)> = headers
        .iter()
        .filter(|(name, _)| name.as_str().starts_with("x-ms-"))
        .map(|(name, value)| (name.as_str(), value.to_str().unwrap_or("").trim()))
        .collect();
    ms_pairs.sort_by(|a, b| a.0.cmp(b.0));
    let ms_headers: Vec<String> = ms_pairs
        .iter()
        .map(|(name, value)| format!("{}:{}", name, value))
        .collect();

    let mut resource = format!("/{}{}", account, request.url().path());
    let mut params: Vec<(String, String)> = request
        .url()
        .query_pairs()
        .map(|(k, v)| (k.to_lowercase(), v.into_owned()))
        .collect();
    params.sort();
    for (k, v) in params {
        resource.push_str(&format!("\n{}:{}", k, v));
    }

    lines.extend(ms_headers.iter().map(String::as_str));
    lines.push(&resource);
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    const ACCOUNT_KEY: &str = "c2VjcmV0LWtleQ==";

    #[test]
    fn test_parse_connection_string() {
        let conn = StorageConnection::parse(&format!(
            "DefaultEndpointsProtocol=https;AccountName=lemreceipts;AccountKey={};EndpointSuffix=core.windows.net",
            ACCOUNT_KEY
        ))
        .unwrap();

        assert_eq!(conn.account_name, "lemreceipts");
        assert_eq!(conn.account_key, b"secret-key".to_vec());
        assert_eq!(conn.blob_endpoint, "https://lemreceipts.blob.core.windows.net");
    }

    #[test]
    fn test_parse_connection_string_explicit_endpoint() {
        let conn = StorageConnection::parse(&format!(
            "AccountName=acct;AccountKey={};BlobEndpoint=https://blobs.example.net/",
            ACCOUNT_KEY
        ))
        .unwrap();

        assert_eq!(conn.blob_endpoint, "https://blobs.example.net/");
    }

    #[test]
    fn test_parse_development_storage() {
        let conn = StorageConnection::parse("UseDevelopmentStorage=true").unwrap();

        assert_eq!(conn.account_name, DEV_ACCOUNT_NAME);
        assert_eq!(conn.blob_endpoint, DEV_BLOB_ENDPOINT);
        assert!(!conn.account_key.is_empty());
    }

    #[test]
    fn test_parse_connection_string_missing_key() {
        let err = StorageConnection::parse("AccountName=acct;EndpointSuffix=core.windows.net")
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_parse_connection_string_bad_key() {
        let err = StorageConnection::parse("AccountName=acct;AccountKey=!!not base64!!")
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    fn shared_key_client(raw: &str) -> BlobClient {
        BlobClient::from_connection_string(Client::new(), raw, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_blob_url_encodes_segments() {
        let client = shared_key_client(&format!("AccountName=acct;AccountKey={}", ACCOUNT_KEY));

        let url = client.blob_url("raw", "2024/june receipt.jpg").unwrap();

        assert_eq!(
            url.as_str(),
            "https://acct.blob.core.windows.net/raw/2024/june%20receipt.jpg"
        );
    }

    #[test]
    fn test_blob_url_keeps_endpoint_path() {
        let client = shared_key_client("UseDevelopmentStorage=true");

        let url = client.blob_url("raw", "a.jpg").unwrap();

        assert_eq!(url.as_str(), "http://127.0.0.1:10000/devstoreaccount1/raw/a.jpg");
    }

    #[test]
    fn test_string_to_sign_put() {
        let request = Client::new()
            .put("https://acct.blob.core.windows.net/out/photo.jpg.receipt.json")
            .header("x-ms-version", STORAGE_API_VERSION)
            .header("x-ms-date", "Mon, 01 Jan 2024 00:00:00 GMT")
            .header("x-ms-blob-type", "BlockBlob")
            .header(CONTENT_TYPE, "application/json")
            .header(CONTENT_LENGTH, 2)
            .body("{}")
            .build()
            .unwrap();

        let expected = [
            "PUT",
            "",
            "",
            "2",
            "",
            "application/json",
            "",
            "",
            "",
            "",
            "",
            "",
            "x-ms-blob-type:BlockBlob",
            "x-ms-date:Mon, 01 Jan 2024 00:00:00 GMT",
            "x-ms-version:2023-11-03",
            "/acct/out/photo.jpg.receipt.json",
        ]
        .join("\n");

        assert_eq!(string_to_sign(&request, "acct"), expected);
    }

    #[test]
    fn test_string_to_sign_get_with_query_and_path_style() {
        let request = Client::new()
            .get("http://127.0.0.1:10000/devstoreaccount1/raw/a.jpg?timeout=30&Comp=metadata")
            .header("x-ms-version", STORAGE_API_VERSION)
            .header(IF_NONE_MATCH, "*")
            .build()
            .unwrap();

        let signed = string_to_sign(&request, "devstoreaccount1");

        assert!(signed.starts_with("GET\n"));
        assert!(signed.contains("\n*\n"));
        assert!(signed.ends_with(
            "/devstoreaccount1/devstoreaccount1/raw/a.jpg\ncomp:metadata\ntimeout:30"
        ));
    }

    #[test]
    fn test_string_to_sign_orders_ms_headers_by_name() {
        let request = Client::new()
            .put("https://acct.blob.core.windows.net/out/a.json")
            .header("x-ms-meta-doc-id", "7")
            .header("x-ms-meta-doc", "receipt")
            .header("x-ms-version", STORAGE_API_VERSION)
            .build()
            .unwrap();

        let signed = string_to_sign(&request, "acct");

        assert!(signed.contains(
            "\nx-ms-meta-doc:receipt\nx-ms-meta-doc-id:7\nx-ms-version:2023-11-03\n"
        ));
    }

    #[tokio::test]
    async fn test_shared_key_authorization_header() {
        let client = shared_key_client(&format!("AccountName=acct;AccountKey={}", ACCOUNT_KEY));
        let mut request = Client::new()
            .get("https://acct.blob.core.windows.net/raw/a.jpg")
            .header("x-ms-version", STORAGE_API_VERSION)
            .build()
            .unwrap();

        client.authorize(&mut request).await.unwrap();

        let auth = request.headers().get(AUTHORIZATION).unwrap().to_str().unwrap();
        assert!(auth.starts_with("SharedKey acct:"));
        // base64 of a 32-byte HMAC-SHA256 digest
        assert_eq!(auth.len(), "SharedKey acct:".len() + 44);
    }
}
