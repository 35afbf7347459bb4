//! Bilibili dynamic publisher
//!
//! Publishing is two-phase: every image is uploaded to the picture store
//! first, then one "create dynamic" call references all of them. Uploaded
//! but unreferenced pictures are invisible, so a failure at any point before
//! the final call leaves no post behind.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, COOKIE, REFERER};
use reqwest::multipart::{Form, Part};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::DestinationConfig;
use crate::error::{PlatformError, RelayError, Result};
use crate::platforms::{Publisher, BROWSER_USER_AGENT};
use crate::types::ImageMimeType;

const API_BASE_URL: &str = "https://api.bilibili.com";
const MAX_PICTURES: usize = 9;

/// Envelope shared by all API responses
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub code: i64,
    #[serde(default)]
    pub message: String,
    pub data: Option<T>,
}

/// Picture store entry returned by the upload endpoint
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct UploadedPicture {
    pub image_url: String,
    pub image_width: u64,
    pub image_height: u64,
    /// Size in KiB
    #[serde(default)]
    pub img_size: f64,
}

#[derive(Debug, Deserialize)]
struct CreatedDynamic {
    #[serde(default)]
    dyn_id_str: Option<String>,
    #[serde(default)]
    dyn_id: Option<u64>,
}

pub struct BilibiliPublisher {
    client: reqwest::Client,
    headers: HeaderMap,
    csrf: SecretString,
    base_url: String,
}

impl BilibiliPublisher {
    pub fn new(sessdata: &SecretString, bili_jct: &SecretString, buvid3: Option<&str>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .user_agent(BROWSER_USER_AGENT)
            .build()
            .map_err(|e| PlatformError::Network(format!("Failed to create HTTP client: {}", e)))?;

        let mut cookie = format!(
            "SESSDATA={}; bili_jct={}",
            sessdata.expose_secret(),
            bili_jct.expose_secret()
        );
        if let Some(buvid3) = buvid3 {
            cookie.push_str(&format!("; buvid3={}", buvid3));
        }
        let mut cookie = HeaderValue::from_str(&cookie).map_err(|_| {
            PlatformError::Authentication(
                "Bilibili cookie contains characters not allowed in a header".to_string(),
            )
        })?;
        cookie.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, cookie);
        headers.insert(REFERER, HeaderValue::from_static("https://t.bilibili.com/"));

        Ok(Self {
            client,
            headers,
            csrf: SecretString::from(bili_jct.expose_secret().to_string()),
            base_url: API_BASE_URL.to_string(),
        })
    }

    pub fn from_config(config: &DestinationConfig) -> Result<Self> {
        Self::new(&config.sessdata, &config.bili_jct, config.buvid3.as_deref())
    }

    async fn upload_picture(&self, path: &Path) -> Result<UploadedPicture> {
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            PlatformError::Posting(format!("Cannot read staged image {}: {}", path.display(), e))
        })?;

        let mime = path
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(ImageMimeType::from_extension)
            .unwrap_or(ImageMimeType::Jpeg);
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| format!("image.{}", mime.extension()));

        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(mime.as_str())
            .map_err(|e| PlatformError::Posting(format!("Invalid MIME type: {}", e)))?;

        let form = Form::new()
            .part("file_up", part)
            .text("biz", "new_dyn")
            .text("category", "daily")
            .text("csrf", self.csrf.expose_secret().to_string());

        let response = self
            .client
            .post(format!("{}/x/dynamic/feed/draw/upload_bfs", self.base_url))
            .headers(self.headers.clone())
            .multipart(form)
            .send()
            .await
            .map_err(|e| PlatformError::Network(format!("picture upload failed: {}", e)))?;

        let picture: UploadedPicture = read_api_response(response, "picture upload").await?;
        tracing::debug!(url = %picture.image_url, "Uploaded picture");
        Ok(picture)
    }

    async fn create_dynamic(&self, text: &str, pictures: &[UploadedPicture]) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/x/dynamic/feed/create/dyn", self.base_url))
            .headers(self.headers.clone())
            .query(&[("csrf", self.csrf.expose_secret())])
            .json(&dynamic_request(text, pictures))
            .send()
            .await
            .map_err(|e| PlatformError::Network(format!("create dynamic failed: {}", e)))?;

        let created: CreatedDynamic = read_api_response(response, "create dynamic").await?;
        created
            .dyn_id_str
            .or_else(|| created.dyn_id.map(|id| id.to_string()))
            .ok_or_else(|| PlatformError::Parse("create dynamic returned no id".to_string()).into())
    }
}

#[async_trait]
impl Publisher for BilibiliPublisher {
    fn name(&self) -> &str {
        "bilibili"
    }

    fn max_attachments(&self) -> usize {
        MAX_PICTURES
    }

    fn is_configured(&self) -> bool {
        !self.csrf.expose_secret().is_empty()
    }

    async fn publish(&self, text: &str, media: &[PathBuf]) -> Result<String> {
        let mut pictures = Vec::with_capacity(media.len().min(MAX_PICTURES));
        for path in media.iter().take(MAX_PICTURES) {
            pictures.push(self.upload_picture(path).await?);
        }
        self.create_dynamic(text, &pictures).await
    }
}

/// JSON body for the create-dynamic endpoint
///
/// Scene 1 is a text-only dynamic, scene 2 a dynamic with pictures.
pub fn dynamic_request(text: &str, pictures: &[UploadedPicture]) -> Value {
    let pics: Vec<Value> = pictures
        .iter()
        .map(|p| {
            serde_json::json!({
                "img_src": p.image_url,
                "img_width": p.image_width,
                "img_height": p.image_height,
                "img_size": p.img_size,
            })
        })
        .collect();

    let scene = if pics.is_empty() { 1 } else { 2 };
    let mut request = serde_json::json!({
        "dyn_req": {
            "content": {
                "contents": [{ "raw_text": text, "type": 1, "biz_id": "" }]
            },
            "scene": scene,
            "meta": {
                "app_meta": { "from": "create.dynamic.web", "mobi_app": "web" }
            }
        }
    });
    if !pics.is_empty() {
        request["dyn_req"]["pics"] = Value::Array(pics);
    }
    request
}

async fn read_api_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    context: &str,
) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        return Err(PlatformError::from_status(status.as_u16(), context, PlatformError::Posting).into());
    }

    let body: ApiResponse<T> = response
        .json()
        .await
        .map_err(|e| PlatformError::Parse(format!("{} response unreadable: {}", context, e)))?;

    into_data(body, context)
}

/// Unwrap the `data` of a successful envelope, mapping API error codes
pub fn into_data<T>(body: ApiResponse<T>, context: &str) -> Result<T> {
    if body.code != 0 {
        let message = format!("{} rejected (code {}): {}", context, body.code, body.message);
        let error = match body.code {
            -101 | -111 => PlatformError::Authentication(message),
            -412 | -509 => PlatformError::RateLimit(message),
            _ => PlatformError::Posting(message),
        };
        return Err(RelayError::Platform(error));
    }

    body.data
        .ok_or_else(|| PlatformError::Parse(format!("{} response has no data", context)).into())
}
