use crate::models::{BlockRecord, NoteRecord};
use crate::state::note_sync::SyncStrategy;
use crate::storage::load_token_from_storage;
use crate::util::now_iso;
use reqwest::Method;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum ApiErrorKind {
    Unauthorized,
    Network,
    Http,
    Parse,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct ApiError {
    pub kind: ApiErrorKind,
    pub message: String,
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ApiError {}

impl ApiError {
    fn network(e: reqwest::Error) -> Self {
        Self {
            kind: ApiErrorKind::Network,
            message: e.to_string(),
        }
    }

    pub(crate) fn parse(e: impl std::fmt::Display) -> Self {
        Self {
            kind: ApiErrorKind::Parse,
            message: e.to_string(),
        }
    }

    pub(crate) fn unauthorized() -> Self {
        Self {
            kind: ApiErrorKind::Unauthorized,
            message: "Unauthorized".to_string(),
        }
    }

    pub(crate) fn http(status: u16, body: String, ctx: &str) -> Self {
        Self {
            kind: ApiErrorKind::Http,
            message: format!("{ctx} ({status}): {body}"),
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.kind == ApiErrorKind::Unauthorized
    }
}

pub(crate) type ApiResult<T> = Result<T, ApiError>;

#[derive(Serialize, Deserialize, Clone, Debug)]
pub(crate) struct EnvConfig {
    pub api_url: String,
    pub sync_strategy: SyncStrategy,
}

impl EnvConfig {
    pub const DEFAULT_API_URL: &'static str = "http://localhost:8080";

    pub fn new() -> Self {
        let mut cfg = Self {
            api_url: Self::DEFAULT_API_URL.to_string(),
            sync_strategy: SyncStrategy::default(),
        };

        #[cfg(target_arch = "wasm32")]
        {
            // `window.ENV.API_URL` first, `window.ENV.api_url` as fallback.
            if let Some(v) = read_window_env(&["API_URL", "api_url"]) {
                cfg.api_url = v;
            }
            if let Some(v) = read_window_env(&["SYNC_STRATEGY", "sync_strategy"]) {
                match v.parse::<SyncStrategy>() {
                    Ok(s) => cfg.sync_strategy = s,
                    Err(_) => log::warn!("event=config module=api status=ignored key=SYNC_STRATEGY value={v}"),
                }
            }
        }

        cfg
    }
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(target_arch = "wasm32")]
fn read_window_env(keys: &[&str]) -> Option<String> {
    let env = web_sys::window()?.get("ENV")?;
    if env.is_undefined() || !env.is_object() {
        return None;
    }
    keys.iter().find_map(|k| {
        js_sys::Reflect::get(&env, &(*k).into())
            .ok()
            .and_then(|v| v.as_string())
    })
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SyncBlocksRequest {
    pub note_children: Vec<BlockRecord>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateTextBlockRequest {
    pub note_id: String,
    pub text: String,
    pub position: i64,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub(crate) struct EditTextBlockRequest {
    pub note_id: String,
    pub text_entry_id: String,
    pub new_text: String,
    pub position: i64,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DeleteTextBlockRequest {
    pub note_id: String,
    pub text_entry_id: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub(crate) struct EditTitleRequest {
    pub note_id: String,
    pub title: String,
    pub last_interacted_with: String,
}

/// A file picked by the user, handed over for upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct ImageUpload {
    pub file_name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

/// Remote ordered-list store backing the editor.
///
/// Futures are not `Send`: the editor runs on one logical thread.
#[allow(async_fn_in_trait)]
pub(crate) trait NoteStore {
    async fn get_blocks(&self, note_id: &str) -> ApiResult<Vec<BlockRecord>>;

    /// Bulk reconcile. The response is the authoritative sequence.
    async fn sync_blocks(&self, note_id: &str, blocks: &[BlockRecord]) -> ApiResult<Vec<BlockRecord>>;

    /// Returns the id of the created block.
    async fn create_text_block(&self, note_id: &str, content: &str, position: usize) -> ApiResult<String>;

    async fn edit_text_block(&self, note_id: &str, id: &str, content: &str, position: usize) -> ApiResult<()>;

    async fn delete_text_block(&self, note_id: &str, id: &str) -> ApiResult<()>;

    async fn edit_title(&self, note_id: &str, title: &str) -> ApiResult<NoteRecord>;

    /// Uploads an image for `block_id` and returns its stored path.
    async fn request_image_upload(&self, note_id: &str, block_id: &str, upload: ImageUpload) -> ApiResult<String>;
}

#[derive(Clone, Debug)]
pub(crate) struct ApiClient {
    pub(crate) base_url: String,
    pub(crate) token: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url,
            token: None,
        }
    }

    /// Client for the configured API, carrying the stored bearer token.
    pub fn load_from_storage() -> Self {
        Self {
            base_url: EnvConfig::new().api_url,
            token: load_token_from_storage(),
        }
    }

    pub fn set_token(&mut self, token: String) {
        self.token = Some(token);
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    fn get_auth_header(&self) -> Option<String> {
        self.token.as_ref().map(|t| format!("Bearer {}", t))
    }

    /// Displayable URL for a stored image path. Pure; no request is made.
    pub fn resolve_image_url(&self, image_path: &str) -> String {
        let file_name = image_path
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(image_path);
        format!(
            "{}/notatky/{}",
            self.base_url.trim_end_matches('/'),
            urlencoding::encode(file_name)
        )
    }

    fn with_auth_headers(&self, mut req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(header) = self.get_auth_header() {
            req = req.header("Authorization", header);
        }
        req
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> ApiResult<reqwest::Response> {
        let res = self.with_auth_headers(req).send().await.map_err(ApiError::network)?;

        if res.status().is_success() {
            Ok(res)
        } else if res.status().as_u16() == 401 {
            Err(ApiError::unauthorized())
        } else {
            let status = res.status().as_u16();
            let body = res.text().await.unwrap_or_default();
            Err(ApiError::http(status, body, "Request failed"))
        }
    }

    async fn request_json<T: serde::de::DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&impl Serialize>,
    ) -> ApiResult<T> {
        let client = reqwest::Client::new();
        let mut req = client.request(method, format!("{}{}", self.base_url, path));
        if let Some(b) = body {
            req = req.json(b);
        }
        let res = self.send(req).await?;
        res.json().await.map_err(ApiError::parse)
    }

    /// For endpoints that answer with a plain status message.
    async fn request_text(
        &self,
        method: Method,
        path: &str,
        body: Option<&impl Serialize>,
    ) -> ApiResult<String> {
        let client = reqwest::Client::new();
        let mut req = client.request(method, format!("{}{}", self.base_url, path));
        if let Some(b) = body {
            req = req.json(b);
        }
        let res = self.send(req).await?;
        res.text().await.map_err(ApiError::network)
    }

    /// Extracts a created id from the shapes the backend has been seen to return.
    pub(crate) fn parse_created_id(body: &str) -> Option<String> {
        let data: serde_json::Value = serde_json::from_str(body).ok()?;
        data.get("id")
            .or_else(|| data.get("textEntryId"))
            .or_else(|| data.get("data").and_then(|d| d.get("id")))
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
            .map(|s| s.to_string())
    }

    /// Accepts a bare list or a `{ "data": [...] }` / `{ "noteChildren": [...] }`
    /// envelope. Anything else is an error, never an empty list: the bulk
    /// reply replaces the whole document.
    pub(crate) fn parse_block_list_response(data: serde_json::Value) -> ApiResult<Vec<BlockRecord>> {
        let list = match data {
            serde_json::Value::Array(_) => data,
            serde_json::Value::Object(mut obj) => match obj.remove("data").or_else(|| obj.remove("noteChildren")) {
                Some(inner @ serde_json::Value::Array(_)) => inner,
                _ => return Err(ApiError::parse("Block list response carries no list")),
            },
            other => {
                return Err(ApiError::parse(format!(
                    "Block list response is not a list: {other}"
                )))
            }
        };
        serde_json::from_value(list).map_err(ApiError::parse)
    }

    /// Note record from an edit-title answer, falling back to what was sent
    /// when the backend replies with a plain message.
    pub(crate) fn parse_note_response(body: &str, note_id: &str, title: &str, sent_at: &str) -> NoteRecord {
        let from_json = serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .map(|v| v.get("data").cloned().unwrap_or(v))
            .and_then(|v| serde_json::from_value::<NoteRecord>(v).ok());

        from_json.unwrap_or_else(|| NoteRecord {
            id: note_id.to_string(),
            title: title.to_string(),
            last_interacted_with: sent_at.to_string(),
        })
    }

    /// Notes of the signed-in user. Used to show the open note's title.
    pub async fn get_notes(&self) -> ApiResult<Vec<NoteRecord>> {
        let data: serde_json::Value = self
            .request_json(Method::GET, "/notatky/notes", None::<&()>)
            .await?;
        let list = match data {
            serde_json::Value::Object(mut obj) => obj
                .remove("data")
                .unwrap_or(serde_json::Value::Array(vec![])),
            other => other,
        };
        serde_json::from_value(list).map_err(ApiError::parse)
    }

    /// Image path of `block_id` in an upload reply. Other blocks' images are
    /// never taken.
    pub(crate) fn image_path_for(records: &[BlockRecord], block_id: &str) -> Option<String> {
        records
            .iter()
            .find(|r| r.id.as_deref() == Some(block_id))
            .and_then(|r| r.image_node.as_ref())
            .map(|img| img.image_path.clone())
            .filter(|p| !p.is_empty())
    }
}

impl NoteStore for ApiClient {
    async fn get_blocks(&self, note_id: &str) -> ApiResult<Vec<BlockRecord>> {
        let data: serde_json::Value = self
            .request_json(
                Method::GET,
                &format!("/notatky/note-children/all/{}", urlencoding::encode(note_id)),
                None::<&()>,
            )
            .await?;
        Self::parse_block_list_response(data)
    }

    async fn sync_blocks(&self, note_id: &str, blocks: &[BlockRecord]) -> ApiResult<Vec<BlockRecord>> {
        let data: serde_json::Value = self
            .request_json(
                Method::POST,
                &format!("/notatky/note-children/sync/{}", urlencoding::encode(note_id)),
                Some(&SyncBlocksRequest {
                    note_children: blocks.to_vec(),
                }),
            )
            .await?;
        Self::parse_block_list_response(data)
    }

    async fn create_text_block(&self, note_id: &str, content: &str, position: usize) -> ApiResult<String> {
        let body = self
            .request_text(
                Method::POST,
                "/notatky/text/create",
                Some(&CreateTextBlockRequest {
                    note_id: note_id.to_string(),
                    text: content.to_string(),
                    position: position as i64,
                }),
            )
            .await?;

        Self::parse_created_id(&body).ok_or_else(|| {
            ApiError::parse(format!("Create text block succeeded but response is missing id: {body}"))
        })
    }

    async fn edit_text_block(&self, note_id: &str, id: &str, content: &str, position: usize) -> ApiResult<()> {
        self.request_text(
            Method::PUT,
            "/notatky/text/edit",
            Some(&EditTextBlockRequest {
                note_id: note_id.to_string(),
                text_entry_id: id.to_string(),
                new_text: content.to_string(),
                position: position as i64,
            }),
        )
        .await
        .map(|_| ())
    }

    async fn delete_text_block(&self, note_id: &str, id: &str) -> ApiResult<()> {
        self.request_text(
            Method::DELETE,
            "/notatky/text/delete",
            Some(&DeleteTextBlockRequest {
                note_id: note_id.to_string(),
                text_entry_id: id.to_string(),
            }),
        )
        .await
        .map(|_| ())
    }

    async fn edit_title(&self, note_id: &str, title: &str) -> ApiResult<NoteRecord> {
        let sent_at = now_iso();
        let body = self
            .request_text(
                Method::PUT,
                "/notatky/edit",
                Some(&EditTitleRequest {
                    note_id: note_id.to_string(),
                    title: title.to_string(),
                    last_interacted_with: sent_at.clone(),
                }),
            )
            .await?;
        Ok(Self::parse_note_response(&body, note_id, title, &sent_at))
    }

    async fn request_image_upload(&self, note_id: &str, block_id: &str, upload: ImageUpload) -> ApiResult<String> {
        let part = reqwest::multipart::Part::bytes(upload.bytes)
            .file_name(upload.file_name)
            .mime_str(&upload.mime)
            .map_err(ApiError::parse)?;
        let form = reqwest::multipart::Form::new().part("image", part);

        let client = reqwest::Client::new();
        let req = client
            .post(format!(
                "{}/notatky/note-children/upload/{}/{}",
                self.base_url,
                urlencoding::encode(note_id),
                urlencoding::encode(block_id)
            ))
            .multipart(form);

        let res = self.send(req).await?;
        let data: serde_json::Value = res.json().await.map_err(ApiError::parse)?;
        let records = Self::parse_block_list_response(data)?;
        Self::image_path_for(&records, block_id)
            .ok_or_else(|| ApiError::parse("Upload succeeded but response carries no image path"))
    }
}
